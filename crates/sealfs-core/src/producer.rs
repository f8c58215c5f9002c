//! Ratchet engine thread.
//!
//! Keeps the key delivery queue topped up: at the start of each chain it
//! reads the chunk at the read cursor and advances the cursor; within a
//! chain it derives the next one-time key from the previous one. Chunk
//! reads never go below the cursor, so a chunk is read at most once per
//! session.

use std::{
    sync::Arc,
    thread::{self, JoinHandle},
};

use sealfs_crypto::ChunkRatchet;
use sealfs_proto::CHUNK_SIZE;

use crate::{error::SealError, keystore::KeyStore, queue::KeyQueue};

/// Handle on the running producer thread.
pub(crate) struct KeyProducer {
    handle: Option<JoinHandle<()>>,
}

impl KeyProducer {
    /// Start producing chains of `nratchet` keys from `cursor` onwards.
    pub(crate) fn spawn<S: KeyStore>(
        store: Arc<S>,
        queue: Arc<KeyQueue>,
        cursor: u64,
        nratchet: u64,
    ) -> Result<Self, SealError> {
        let handle = thread::Builder::new()
            .name("sealfs-ratchet".to_string())
            .spawn(move || produce(store.as_ref(), &queue, cursor, nratchet))?;
        Ok(Self { handle: Some(handle) })
    }

    /// Wait for the thread to exit. The queue must have been closed.
    pub(crate) fn join(&mut self) {
        if let Some(handle) = self.handle.take()
            && handle.join().is_err()
        {
            tracing::error!("ratchet producer thread panicked");
        }
    }
}

fn produce<S: KeyStore>(store: &S, queue: &KeyQueue, mut cursor: u64, nratchet: u64) {
    let mut chain: Option<ChunkRatchet> = None;

    while !queue.is_closed() {
        let key = match chain.as_mut().and_then(ChunkRatchet::next_key) {
            Some(key) => key,
            None => {
                let next = store
                    .read_chunk(cursor)
                    .and_then(|chunk| Ok(ChunkRatchet::new(&chunk, cursor, nratchet)?));
                match next {
                    Ok(ratchet) => {
                        tracing::debug!(koffset = cursor, "ratchet seeded from chunk");
                        chain = Some(ratchet);
                        cursor += CHUNK_SIZE as u64;
                        continue;
                    },
                    Err(e) => {
                        tracing::warn!(koffset = cursor, error = %e, "ratchet producer stopped");
                        queue.fail(e);
                        return;
                    },
                }
            },
        };

        // A closed queue hands the key back; dropping it zeroizes it
        if queue.push(key).is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use sealfs_proto::KeyFileHeader;

    use super::*;
    use crate::keystore::FileKeyStore;

    fn store_with_chunks(chunks: usize) -> (tempfile::NamedTempFile, Arc<FileKeyStore>) {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        file.write_all(&KeyFileHeader::new(1).to_bytes()).expect("header");
        file.write_all(&vec![0x5A; chunks * CHUNK_SIZE]).expect("body");
        let store = Arc::new(FileKeyStore::open(file.path()).expect("open"));
        (file, store)
    }

    #[test]
    fn produces_whole_chains_then_reports_exhaustion() {
        let (_file, store) = store_with_chunks(2);
        let queue = Arc::new(KeyQueue::new(4));
        let mut producer =
            KeyProducer::spawn(store, Arc::clone(&queue), 16, 3).expect("spawn producer");

        let mut seen = Vec::new();
        loop {
            match queue.pop() {
                Ok(key) => seen.push((key.key_offset(), key.ratchet_offset())),
                Err(e) => {
                    assert_eq!(e, SealError::KeystreamExhausted { offset: 80, len: 80 });
                    break;
                },
            }
        }
        assert_eq!(seen, vec![(16, 0), (16, 1), (16, 2), (48, 0), (48, 1), (48, 2)]);

        queue.close();
        producer.join();
    }

    #[test]
    fn close_stops_producer_with_full_queue() {
        let (_file, store) = store_with_chunks(64);
        let queue = Arc::new(KeyQueue::new(2));
        let mut producer =
            KeyProducer::spawn(store, Arc::clone(&queue), 16, 1).expect("spawn producer");

        while queue.len() < 2 {
            thread::yield_now();
        }
        queue.close();
        producer.join();
        queue.clear();
        assert!(queue.is_closed());
    }
}
