//! Sealfs command line tools.
//!
//! # Usage
//!
//! ```bash
//! # Provision a tree with 1 MiB of key material; keep k1 somewhere safe
//! sealfs prep /srv/audit k1 k2 1048576
//!
//! # Seal an append (demonstration host)
//! sealfs append /srv/audit k2 events.log "user login"
//!
//! # Verify the tree against the preserved copy and the live keystream
//! sealfs verify /srv/audit k1 k2
//!
//! # Inspect the log without verifying it
//! sealfs dump /srv/audit
//! sealfs stats /srv/audit
//! ```

use std::{
    io::{self, Write},
    path::PathBuf,
    process::ExitCode,
};

use clap::{Parser, Subcommand};
use sealfs_core::{DEFAULT_NRATCHET, SealedTree, SessionConfig};
use sealfs_proto::DEFAULT_LOG_NAME;
use sealfs_tools::{
    Region, ToolError, VerifyOptions, dump, prep, reorder::DEFAULT_REORDER_CAPACITY, scan::Renames,
    verify,
};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Tamper-evident append-only logging tools
#[derive(Parser, Debug)]
#[command(name = "sealfs")]
#[command(about = "Provision, seal, verify and inspect sealfs trees")]
#[command(version)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the log and a pair of identical keystreams
    Prep {
        /// Tree directory (created if missing)
        dir: PathBuf,
        /// Keystream copy to keep offline
        alpha: PathBuf,
        /// Keystream handed to the sealing session
        beta: PathBuf,
        /// Bytes of key material
        size: u64,
    },

    /// Verify a sealed tree
    Verify {
        /// Tree directory
        dir: PathBuf,
        /// Keystream copy kept offline
        alpha: PathBuf,
        /// Live keystream
        beta: PathBuf,
        /// Log file name inside the tree
        #[arg(short = 'n', long, default_value = DEFAULT_LOG_NAME)]
        log_name: String,
        /// Only verify writes to INODE touching [BEGIN, END]
        #[arg(short = 'i', long, num_args = 3, value_names = ["INODE", "BEGIN", "END"])]
        region: Option<Vec<u64>>,
        /// File now at inode OLD was sealed as inode NEW (repeatable)
        #[arg(long = "rename", num_args = 2, value_names = ["OLD", "NEW"])]
        renames: Vec<u64>,
        /// Out-of-order writes tolerated per file
        #[arg(long, default_value_t = DEFAULT_REORDER_CAPACITY)]
        reorder_capacity: usize,
    },

    /// Print log entries without verifying them
    Dump {
        /// Log file or tree directory
        path: PathBuf,
    },

    /// Print write statistics for a log
    Stats {
        /// Log file or tree directory
        path: PathBuf,
    },

    /// Seal one append through a short-lived session
    Append {
        /// Tree directory
        dir: PathBuf,
        /// Live keystream
        keystream: PathBuf,
        /// File inside the tree
        file: PathBuf,
        /// Text to append
        text: String,
        /// Keys derived per keystream chunk
        #[arg(long, default_value_t = DEFAULT_NRATCHET)]
        nratchet: i64,
        /// Make every write durable before returning
        #[arg(long)]
        sync_io: bool,
    },
}

fn verify_options(
    dir: PathBuf,
    alpha: PathBuf,
    beta: PathBuf,
    log_name: String,
    region: Option<Vec<u64>>,
    renames: &[u64],
    reorder_capacity: usize,
) -> Result<VerifyOptions, ToolError> {
    let mut options = VerifyOptions::new(dir, alpha, beta)
        .with_log_name(log_name)
        .with_reorder_capacity(reorder_capacity)
        .with_renames(renames.chunks_exact(2).map(|pair| (pair[0], pair[1])).collect::<Renames>());

    if let Some(region) = region {
        let [inode, begin, end] = region[..] else {
            return Err(ToolError::InvalidArgument("region needs INODE BEGIN END".to_string()));
        };
        if end != 0 && begin > end {
            return Err(ToolError::InvalidArgument(format!("region begin {begin} is after end {end}")));
        }
        options = options.with_region(Region { inode, begin, end });
    }
    Ok(options)
}

fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer().with_writer(io::stderr)).with(filter).init();

    let mut out = io::stdout().lock();
    match args.command {
        Command::Prep { dir, alpha, beta, size } => {
            let prov = prep::prepare(&dir, &alpha, &beta, size)?;
            writeln!(out, "magic: {:#018x}", prov.magic)?;
            writeln!(out, "log: {}", prov.log.display())?;
            writeln!(out, "keystream: {} bytes", prov.keystream_bytes)?;
        },
        Command::Verify { dir, alpha, beta, log_name, region, renames, reorder_capacity } => {
            let options =
                verify_options(dir, alpha, beta, log_name, region, &renames, reorder_capacity)?;
            match verify(&options) {
                Ok(report) => {
                    writeln!(out, "beta burnt: {}", report.burnt)?;
                    writeln!(
                        out,
                        "nratchet: {}, drain entries: {}",
                        report.nratchet, report.fake_entries
                    )?;
                    writeln!(out, "{report}")?;
                },
                Err(e) => {
                    tracing::error!(error = %e, "verification failed");
                    writeln!(io::stderr().lock(), "verification failed: {e}")?;
                    return Ok(ExitCode::FAILURE);
                },
            }
        },
        Command::Dump { path } => {
            dump::dump(&path, &mut out)?;
        },
        Command::Stats { path } => {
            writeln!(out, "stats: {}", dump::stats(&path)?)?;
        },
        Command::Append { dir, keystream, file, text, nratchet, sync_io } => {
            let config =
                SessionConfig::new(dir, keystream).with_nratchet(nratchet).with_sync_io(sync_io);
            let tree = SealedTree::open(&config)?;
            let sealed = tree.append(&file, text.as_bytes());
            let closed = tree.close();
            let entry = sealed?;
            closed?;
            writeln!(out, "{entry}")?;
        },
    }
    Ok(ExitCode::SUCCESS)
}
