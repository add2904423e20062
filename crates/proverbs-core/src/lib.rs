//! Core types, config, errors, and the AG-UI wire protocol for Proverbs.

pub mod config;
pub mod error;
pub mod protocol;
