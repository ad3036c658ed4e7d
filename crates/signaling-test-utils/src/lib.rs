//! # Signaling Test Utilities
//!
//! Shared test utilities for the signaling service.
//!
//! This crate provides:
//! - Server test harness (`TestSignalingServer` for E2E tests)
//! - WebSocket client (`TestClient`) that speaks the wire protocol
//!
//! ## Usage
//!
//! ```rust,ignore
//! use signaling_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() -> Result<(), anyhow::Error> {
//!     let server = TestSignalingServer::spawn().await?;
//!     let mut alice = TestClient::connect(&server).await?;
//!
//!     alice.send("join room", serde_json::json!("r1")).await?;
//!     let users = alice.expect_event("all users").await?;
//!     assert_eq!(users, serde_json::json!([]));
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod server_harness;

// Re-export commonly used items
pub use client::*;
pub use server_harness::*;
