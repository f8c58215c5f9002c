//! Sealfs sealing engine.
//!
//! Runs next to a host that appends to files in a directory tree. For every
//! committed write it takes a one-time key derived from a pre-provisioned
//! keystream, writes a fingerprinted entry to the log, and later burns the
//! keystream region the key came from.
//!
//! # Architecture
//!
//! ```text
//!   host write ──▶ Session::seal_write ──▶ SealLog (positional write)
//!                      ▲          │
//!             KeyQueue │          └── served ──▶ BurnScheduler ──▶ KeyStore
//!                      │                                            ▲
//!               KeyProducer ── read_chunk ──────────────────────────┘
//! ```
//!
//! # Components
//!
//! - [`KeyStore`]: keystream access ([`FileKeyStore`], [`ChaoticKeyStore`])
//! - [`KeyQueue`]: bounded SPSC hand-off of pre-derived keys
//! - [`Session`]: write path, drain and shutdown
//! - [`SealLog`]: positional log writer
//! - [`SealedTree`]: append-only host adapter over a directory
//!
//! Threads: one ratchet producer (`sealfs-ratchet`) and one thread per burn
//! actor (`sealfs-burn-N`). Writers call into the session from their own
//! threads.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod burn;
mod config;
mod error;
pub mod keystore;
mod log;
mod producer;
mod queue;
mod session;
mod tree;

pub use burn::{MAX_BURN_BATCH, slow_period};
pub use config::{
    BurnConfig, DEFAULT_BURN_ACTORS, DEFAULT_NRATCHET, DEFAULT_QUEUE_CAPACITY, SessionConfig,
};
pub use error::SealError;
pub use keystore::{ChaoticKeyStore, Chunk, FileKeyStore, KeyStore};
pub use log::SealLog;
pub use queue::KeyQueue;
pub use session::Session;
pub use tree::SealedTree;
