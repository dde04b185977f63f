//! NEM Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared building blocks for the NEM dispatch pipeline crates.
//!
//! - **Error Handling**: [`NemError`] and the crate-wide [`Result`] alias
//! - **Checksums**: deterministic content hashing for files and directory trees
//! - **Timestamps**: the textual forms a persisted watermark may take
//! - **Logging**: tracing subscriber bootstrap shared by every binary
//!
//! # Example
//!
//! ```no_run
//! use nem_common::checksum::hash_path;
//!
//! fn main() -> nem_common::Result<()> {
//!     let digest = hash_path("data/raw/dispatch_inbox")?;
//!     println!("{} ({} bytes)", digest.sha256, digest.size_bytes);
//!     Ok(())
//! }
//! ```

pub mod checksum;
pub mod error;
pub mod logging;
pub mod timestamp;

pub use error::{NemError, Result};
