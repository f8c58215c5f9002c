//! Sealing session and sealed entry writer
//!
//! A `Session` owns one keystream/log pair for its whole life. It starts the
//! ratchet producer and the burn actors, hands one-time keys to writers,
//! and on shutdown drains the current chain so no derived key is left
//! outstanding.
//!
//! # Write Path
//!
//! ```text
//! KeyRequested → KeyDelivered → Fingerprinted → Appended → BurnSignaled
//! ```
//!
//! Taking a key is serialized by the writer lock; fingerprinting and the
//! log write happen outside it, so entries for different writers may reach
//! the log in any order. Their positions are fixed by the key coordinates.
//!
//! # Failure
//!
//! Once a key has been handed out, the only way forward is to write its
//! entry. Exhaustion, a failed or short log write, or keystream I/O errors
//! are recorded as fatal and returned to every later writer.

use std::sync::{
    Arc, Mutex, MutexGuard, PoisonError,
    atomic::{AtomicU8, Ordering},
};

use sealfs_crypto::{OneTimeKey, fingerprint};
use sealfs_proto::{FAKE_INODE, LogEntry, LogFileHeader, MAX_WRITE_COUNT, chunk_offset};

use crate::{
    burn::{BurnScheduler, BurnShared},
    config::SessionConfig,
    error::SealError,
    keystore::{FileKeyStore, KeyStore},
    log::SealLog,
    producer::KeyProducer,
    queue::KeyQueue,
};

const RUNNING: u8 = 0;
const DRAINING: u8 = 1;
const CLOSED: u8 = 2;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Write-path bookkeeping guarded by the writer lock.
struct WriterState {
    /// Ratchet offset of the next key to be handed out
    next_ratchet_offset: u64,
}

/// A running seal over one keystream and one log file.
///
/// Share it between writer threads behind an `Arc`; every operation takes
/// `&self`.
pub struct Session<S: KeyStore = FileKeyStore> {
    store: Arc<S>,
    log: SealLog,
    queue: Arc<KeyQueue>,
    burn: Arc<BurnShared<S>>,
    nratchet: u64,
    state: AtomicU8,
    writer: Mutex<WriterState>,
    fatal: Mutex<Option<SealError>>,
    producer: Mutex<Option<KeyProducer>>,
    scheduler: Mutex<Option<BurnScheduler<S>>>,
}

impl Session<FileKeyStore> {
    /// Open the keystream and log named by `config` and start sealing.
    pub fn open(config: &SessionConfig) -> Result<Self, SealError> {
        config.validate()?;
        let store = FileKeyStore::open(&config.keystream_path)?;
        Self::with_store(config, store)
    }
}

impl<S: KeyStore> Session<S> {
    /// Start sealing over an already opened keystream store.
    ///
    /// The read cursor resumes after the persisted watermark, or after the
    /// last chain the log already holds entries for, whichever is further.
    pub fn with_store(config: &SessionConfig, store: S) -> Result<Self, SealError> {
        config.validate()?;
        let nratchet = config.nratchet();
        let header = store.header()?;
        let log = SealLog::open(config.log_path(), config.sync_io)?;
        LogFileHeader::new(log.magic()).ensure_matches(&header)?;

        let used_chunks = log.entry_slots()?.div_ceil(nratchet);
        let cursor = header.burnt().max(chunk_offset(used_chunks)?);
        if cursor > header.burnt() {
            tracing::warn!(
                burnt = header.burnt(),
                resume = cursor,
                "log holds entries past the persisted watermark, resuming after them"
            );
        }

        let store = Arc::new(store);
        let queue = Arc::new(KeyQueue::new(config.queue_capacity()));
        let burn =
            Arc::new(BurnShared::new(Arc::clone(&store), header.magic(), cursor, header.burnt()));
        let scheduler = BurnScheduler::start(Arc::clone(&burn), &config.burn)?;
        let producer = KeyProducer::spawn(Arc::clone(&store), Arc::clone(&queue), cursor, nratchet)?;

        tracing::info!(
            magic = header.magic(),
            nratchet,
            koffset = cursor,
            keystream_size = store.size()?,
            "sealing session started"
        );

        Ok(Self {
            store,
            log,
            queue,
            burn,
            nratchet,
            state: AtomicU8::new(RUNNING),
            writer: Mutex::new(WriterState { next_ratchet_offset: 0 }),
            fatal: Mutex::new(None),
            producer: Mutex::new(Some(producer)),
            scheduler: Mutex::new(Some(scheduler)),
        })
    }

    /// Keys derived per chunk.
    pub fn nratchet(&self) -> u64 {
        self.nratchet
    }

    /// End of the last chunk handed to a writer.
    pub fn served(&self) -> u64 {
        self.burn.served()
    }

    /// Underlying keystream store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Whether writes are still accepted.
    pub fn is_running(&self) -> bool {
        self.state.load(Ordering::Acquire) == RUNNING
    }

    /// Seal a write that the host has already committed to storage.
    ///
    /// Takes the next one-time key, fingerprints `(metadata, payload)` with
    /// it, writes the entry at its deterministic position, zeroizes the key
    /// and wakes the burn scheduler.
    ///
    /// # Errors
    ///
    /// - `ReservedInode`, `CountMismatch`, `WriteTooLarge`: rejected before
    ///   any key is taken
    /// - `ShutDown`: the session is draining or closed
    /// - `KeystreamExhausted`, `ShortLogWrite`, `Io`: fatal, the write is
    ///   not sealed and the session accepts no further writes
    pub fn seal_write(
        &self,
        inode: u64,
        offset: u64,
        count: u64,
        payload: &[u8],
    ) -> Result<LogEntry, SealError> {
        if inode == FAKE_INODE {
            return Err(SealError::ReservedInode(inode));
        }
        if payload.len() as u64 != count {
            return Err(SealError::CountMismatch { count, payload: payload.len() });
        }
        if count > MAX_WRITE_COUNT {
            return Err(SealError::WriteTooLarge { count, max: MAX_WRITE_COUNT });
        }

        let key = {
            let mut writer = lock(&self.writer);
            if !self.is_running() {
                return Err(SealError::ShutDown);
            }
            self.take_key(&mut writer)?
        };
        self.append(key, inode, offset, payload)
    }

    /// Drain the current chain with synthetic entries, stop the background
    /// actors, and persist the final watermark.
    ///
    /// Idempotent: later calls return `Ok(())` without doing anything.
    pub fn drain_and_seal(&self) -> Result<(), SealError> {
        if self
            .state
            .compare_exchange(RUNNING, DRAINING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(());
        }

        let drained = self.drain_ratchet();
        self.stop_background();
        let finished = self.finish();
        self.state.store(CLOSED, Ordering::Release);

        let fakes = drained?;
        finished?;
        tracing::info!(fake_entries = fakes, burnt = self.burn.persisted(), "session sealed");
        Ok(())
    }

    fn take_key(&self, writer: &mut WriterState) -> Result<OneTimeKey, SealError> {
        if let Some(err) = lock(&self.fatal).clone() {
            return Err(err);
        }

        match self.queue.pop() {
            Ok(key) => {
                if key.ratchet_offset() == 0 {
                    self.burn.mark_served(key.key_offset());
                }
                writer.next_ratchet_offset = (key.ratchet_offset() + 1) % self.nratchet;
                Ok(key)
            },
            Err(e) => {
                if e.is_fatal() {
                    self.record_fatal(&e);
                }
                Err(e)
            },
        }
    }

    fn append(
        &self,
        key: OneTimeKey,
        inode: u64,
        offset: u64,
        payload: &[u8],
    ) -> Result<LogEntry, SealError> {
        let mut entry = LogEntry::new(
            key.ratchet_offset(),
            inode,
            offset,
            payload.len() as u64,
            key.key_offset(),
        );
        entry.set_fingerprint(fingerprint(key.key(), &entry, payload));
        drop(key);

        if let Err(e) = self.log.write_entry(&entry, self.nratchet) {
            tracing::error!(entry = %entry, error = %e, "entry not sealed");
            self.record_fatal(&e);
            return Err(e);
        }

        self.burn.wake();
        tracing::debug!(entry = %entry, "sealed");
        Ok(entry)
    }

    fn record_fatal(&self, err: &SealError) {
        let mut fatal = lock(&self.fatal);
        if fatal.is_none() {
            tracing::error!(error = %err, "sealing session failed, no further writes will be sealed");
            *fatal = Some(err.clone());
        }
    }

    fn drain_ratchet(&self) -> Result<u64, SealError> {
        let mut writer = lock(&self.writer);
        let mut fakes = 0;
        while writer.next_ratchet_offset != 0 {
            let key = self.take_key(&mut writer)?;
            self.append(key, FAKE_INODE, 0, &[])?;
            fakes += 1;
        }
        Ok(fakes)
    }

    fn stop_background(&self) {
        self.queue.close();
        if let Some(mut producer) = lock(&self.producer).take() {
            producer.join();
        }
        self.queue.clear();
        if let Some(mut scheduler) = lock(&self.scheduler).take() {
            scheduler.stop();
        }
    }

    /// Burn whatever the actors left behind and persist the watermark.
    /// The header only ever covers a range this call or an actor has
    /// overwritten and synced.
    fn finish(&self) -> Result<(), SealError> {
        self.log.sync()?;
        let served = self.burn.served();
        let burnt = self.burn.burn_range(self.burn.persisted(), served).inspect_err(|e| {
            tracing::error!(served, error = %e, "served chunks left unburnt, watermark not advanced");
        })?;
        self.store.sync()?;
        self.burn.persist(burnt)
    }
}

impl<S: KeyStore> Drop for Session<S> {
    fn drop(&mut self) {
        if self.state.swap(CLOSED, Ordering::AcqRel) == RUNNING {
            tracing::warn!("session dropped without drain_and_seal, current chain left open");
            self.stop_background();
            if let Err(e) = self.finish() {
                tracing::error!(error = %e, "cannot persist burnt watermark");
            }
        }
    }
}
