//! Burn scheduler
//!
//! Background actors that overwrite served keystream chunks with fresh
//! randomness and persist the `burnt` watermark.
//!
//! ```text
//! write path ── served (atomic) ──▶ fast actor (1s, woken by writes) ─┐
//!                                 ├▶ slow actor (11s)                  ├─▶ keystream
//!                                 └▶ slow actor (17s)                  ┘
//! ```
//!
//! Each actor keeps its own `unburnt` cursor and burns `[unburnt, served)`
//! in batches of at most [`MAX_BURN_BATCH`] chunks under the shared burn
//! lock, then syncs. Only the fast actor persists the header, and only
//! after the sync. Slow actors exist to catch up if the fast one stalls;
//! their periods come from a table of primes so that wakeups across hosts
//! rarely line up.
//!
//! # Crash Safety
//!
//! The header write is the only commit. A crash anywhere before it leaves
//! the old watermark on disk; burning again over already-random bytes is
//! harmless. Every actor starts from the keystream header offset, so a new
//! session re-burns the whole served prefix.

use std::{
    sync::{
        Arc, Condvar, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use sealfs_proto::{CHUNK_SIZE, KeyFileHeader};

use crate::{config::BurnConfig, error::SealError, keystore::KeyStore};

/// Most chunks overwritten per write call.
pub const MAX_BURN_BATCH: usize = 16;

/// Slow actor periods, in seconds.
const SLOW_PERIODS: [u64; 10] = [11, 17, 31, 37, 43, 59, 73, 97, 139, 157];

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Poll period of slow actor `index` (1-based; actor 0 is the fast one).
pub fn slow_period(index: usize) -> Duration {
    Duration::from_secs(SLOW_PERIODS[(index.saturating_sub(1)) % SLOW_PERIODS.len()])
}

/// State shared by the write path and every burn actor.
pub(crate) struct BurnShared<S: KeyStore> {
    store: Arc<S>,
    magic: u64,
    /// End of the last chunk handed to the write path
    served: AtomicU64,
    /// Highest watermark persisted by this session
    persisted: Mutex<u64>,
    /// Serializes batch writes and their sync across actors
    burn_lock: Mutex<()>,
    wake_lock: Mutex<()>,
    wake: Condvar,
    shutdown: AtomicBool,
}

impl<S: KeyStore> BurnShared<S> {
    pub(crate) fn new(store: Arc<S>, magic: u64, served: u64, persisted: u64) -> Self {
        Self {
            store,
            magic,
            served: AtomicU64::new(served),
            persisted: Mutex::new(persisted),
            burn_lock: Mutex::new(()),
            wake_lock: Mutex::new(()),
            wake: Condvar::new(),
            shutdown: AtomicBool::new(false),
        }
    }

    /// Current served watermark.
    pub(crate) fn served(&self) -> u64 {
        self.served.load(Ordering::Acquire)
    }

    /// Record that the chunk at `key_offset` has been handed out.
    pub(crate) fn mark_served(&self, key_offset: u64) {
        self.served.fetch_max(key_offset + CHUNK_SIZE as u64, Ordering::AcqRel);
    }

    /// Best-effort wakeup. A missed one is covered by the actor's poll.
    pub(crate) fn wake(&self) {
        self.wake.notify_all();
    }

    /// Overwrite `[from, to)` with randomness and sync it. Returns how far
    /// the range was burnt.
    pub(crate) fn burn_range(&self, from: u64, to: u64) -> Result<u64, SealError> {
        let _guard = lock(&self.burn_lock);
        let mut buf = [0u8; MAX_BURN_BATCH * CHUNK_SIZE];
        let mut pos = from;

        while pos < to {
            let chunks = ((to - pos) / CHUNK_SIZE as u64).min(MAX_BURN_BATCH as u64) as usize;
            if chunks == 0 {
                break;
            }
            let batch = &mut buf[..chunks * CHUNK_SIZE];
            getrandom::fill(batch).map_err(|e| SealError::Io(format!("random source: {e}")))?;
            self.store.overwrite(pos, batch)?;
            pos += batch.len() as u64;
        }

        if pos != from {
            self.store.sync()?;
        }
        Ok(pos)
    }

    /// Persist `burnt` unless an equal or higher value already was.
    pub(crate) fn persist(&self, burnt: u64) -> Result<(), SealError> {
        let mut persisted = lock(&self.persisted);
        if burnt <= *persisted {
            return Ok(());
        }
        let mut header = KeyFileHeader::new(self.magic);
        header.set_burnt(burnt);
        self.store.write_header(&header)?;
        *persisted = burnt;
        tracing::debug!(burnt, "keystream header persisted");
        Ok(())
    }

    /// Highest watermark persisted so far.
    pub(crate) fn persisted(&self) -> u64 {
        *lock(&self.persisted)
    }

    fn wait(&self, period: Duration, unburnt: u64, backoff: bool) {
        let guard = lock(&self.wake_lock);
        if self.shutdown.load(Ordering::Acquire) || (!backoff && self.served() != unburnt) {
            return;
        }
        let _ = self.wake.wait_timeout(guard, period).unwrap_or_else(PoisonError::into_inner);
    }
}

struct BurnActor {
    index: usize,
    period: Duration,
    updates_header: bool,
}

fn run_actor<S: KeyStore>(shared: &BurnShared<S>, actor: &BurnActor) {
    let mut unburnt = KeyFileHeader::SIZE as u64;

    loop {
        let served = shared.served();
        let mut backoff = false;

        match shared.burn_range(unburnt, served) {
            Ok(burnt) => {
                if burnt != unburnt {
                    tracing::debug!(actor = actor.index, from = unburnt, to = burnt, "burnt");
                    if actor.updates_header
                        && let Err(e) = shared.persist(burnt)
                    {
                        tracing::error!(actor = actor.index, error = %e, "cannot persist burnt watermark");
                    }
                }
                unburnt = burnt;
            },
            Err(e) => {
                tracing::error!(actor = actor.index, error = %e, "cannot burn keystream");
                backoff = true;
            },
        }

        if shared.shutdown.load(Ordering::Acquire) && (backoff || unburnt >= shared.served()) {
            break;
        }
        shared.wait(actor.period, unburnt, backoff);
    }
    tracing::debug!(actor = actor.index, unburnt, "burn actor done");
}

/// Running set of burn actors.
pub(crate) struct BurnScheduler<S: KeyStore> {
    shared: Arc<BurnShared<S>>,
    handles: Vec<JoinHandle<()>>,
}

impl<S: KeyStore> BurnScheduler<S> {
    pub(crate) fn start(shared: Arc<BurnShared<S>>, config: &BurnConfig) -> Result<Self, SealError> {
        let mut handles = Vec::with_capacity(config.actors);
        for index in 0..config.actors {
            let actor = if index == 0 {
                BurnActor { index, period: config.fast_period, updates_header: true }
            } else {
                BurnActor { index, period: slow_period(index), updates_header: false }
            };
            let shared = Arc::clone(&shared);
            let handle = thread::Builder::new()
                .name(format!("sealfs-burn-{index}"))
                .spawn(move || run_actor(&shared, &actor))?;
            handles.push(handle);
        }
        Ok(Self { shared, handles })
    }

    /// Ask every actor to finish. Each one catches up with the served
    /// watermark before exiting.
    pub(crate) fn stop(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);
        {
            let _guard = lock(&self.shared.wake_lock);
            self.shared.wake.notify_all();
        }
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                tracing::error!("burn actor panicked");
            }
        }
    }
}

impl<S: KeyStore> Drop for BurnScheduler<S> {
    fn drop(&mut self) {
        self.stop();
    }
}
