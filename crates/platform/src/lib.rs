//! # cellsh platform
//!
//! Types shared by every cellsh crate.
//!
//! This crate provides the unified error type ([`CellshError`]) and result
//! alias ([`CellshResult`]) used throughout the SSH client engine.
//!
//! # Examples
//!
//! ```
//! use cellsh_platform::{CellshError, CellshResult};
//!
//! fn check_length(len: u32) -> CellshResult<u32> {
//!     if len < 5 {
//!         return Err(CellshError::Protocol(format!("packet too short: {}", len)));
//!     }
//!     Ok(len)
//! }
//!
//! # fn main() -> CellshResult<()> {
//! assert_eq!(check_length(12)?, 12);
//! assert!(check_length(1).is_err());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod error;

pub use error::{CellshError, CellshResult};

/// Platform version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
