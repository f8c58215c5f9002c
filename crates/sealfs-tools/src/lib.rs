//! Offline sealfs tools.
//!
//! Everything here runs without a sealing session: provisioning a new
//! seal, verifying a sealed tree against its keystreams, and listing a
//! log. The verifier shares no state with the writer beyond the files on
//! disk.
//!
//! # Components
//!
//! - [`prep::prepare`]: create a log and the alpha/beta keystream pair
//! - [`verify::verify`]: keystream consistency, key replay, placement and
//!   coverage checks
//! - [`dump::dump`], [`dump::stats`]: unverified listings

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod desc;
pub mod dump;
pub mod error;
pub mod log_reader;
pub mod prep;
pub mod reorder;
pub mod scan;
pub mod verify;

pub use error::{ToolError, VerifyError};
pub use verify::{Region, VerifyOptions, VerifyReport, verify};
