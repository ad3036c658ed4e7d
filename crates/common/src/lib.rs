//! Common utilities and types shared across the mesh signaling components.

#![warn(clippy::pedantic)]

/// Module for common data types
pub mod types;

/// Module for common configuration
pub mod config;
