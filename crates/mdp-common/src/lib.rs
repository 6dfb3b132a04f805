//! MDP Common Library
//!
//! Shared types, utilities, and error handling for the MDP project.
//!
//! # Overview
//!
//! This crate provides common functionality used across all MDP workspace members:
//!
//! - **Error Handling**: Custom error types and result types
//! - **Logging**: Centralized tracing setup (console/file targets, rotation)
//! - **Types**: Shared domain types for museum visitor-interaction records
//!
//! # Example
//!
//! ```no_run
//! use mdp_common::{Result, MdpError};
//! use mdp_common::types::ExhibitionCode;
//!
//! fn lookup(code: &str) -> Result<ExhibitionCode> {
//!     let code: ExhibitionCode = code.parse().map_err(MdpError::from)?;
//!     Ok(code)
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{MdpError, Result};
