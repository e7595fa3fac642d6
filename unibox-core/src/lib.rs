//! Core types and traits for unibox
//!
//! This crate provides the foundational types, traits, and utilities
//! used by all other unibox components: the error taxonomy, config
//! schema and loader, logging setup, the retry policy, inbox message
//! shapes, and the real-time event hub.

pub mod config;
pub mod error;
pub mod events;
pub mod inbox;
pub mod logging;
pub mod retry;

pub use error::{Error, ErrorKind, Result};
