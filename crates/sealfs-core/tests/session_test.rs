//! End-to-end sealing sessions against real files
//!
//! Every test provisions a keystream, keeps a pristine copy of it (alpha)
//! and a fresh log inside a temporary tree, then replays the resulting log
//! against alpha as an oracle:
//! - every entry's fingerprint matches the payload it describes
//! - the log holds whole chains only
//! - each (key offset, ratchet offset) pair is used exactly once
//! - everything below the persisted watermark differs from alpha

use std::{
    collections::{HashMap, HashSet},
    fs,
    os::unix::fs::MetadataExt,
    path::{Path, PathBuf},
    sync::Arc,
    thread,
    time::Duration,
};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use sealfs_core::{
    BurnConfig, ChaoticKeyStore, FileKeyStore, KeyStore, SealError, SealedTree, Session,
    SessionConfig,
};
use sealfs_crypto::{Fingerprinter, KeyCache};
use sealfs_proto::{CHUNK_SIZE, DEFAULT_LOG_NAME, KeyFileHeader, LogEntry, LogFileHeader};
use tempfile::TempDir;

const MAGIC: u64 = 0x5EA1_F5;

struct Provisioned {
    _dir: TempDir,
    tree: PathBuf,
    keystream: PathBuf,
    alpha: Vec<u8>,
}

impl Provisioned {
    fn new(chunks: usize, seed: u64) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let tree = dir.path().join("tree");
        fs::create_dir(&tree).expect("create tree");

        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut alpha = KeyFileHeader::new(MAGIC).to_bytes().to_vec();
        let mut body = vec![0u8; chunks * CHUNK_SIZE];
        rng.fill(&mut body[..]);
        alpha.extend_from_slice(&body);

        let keystream = dir.path().join("k1");
        fs::write(&keystream, &alpha).expect("write keystream");
        fs::write(tree.join(DEFAULT_LOG_NAME), LogFileHeader::new(MAGIC).to_bytes())
            .expect("write log");

        Self { _dir: dir, tree, keystream, alpha }
    }

    fn config(&self, nratchet: i64) -> SessionConfig {
        SessionConfig::new(&self.tree, &self.keystream)
            .with_nratchet(nratchet)
            .with_burn(BurnConfig { actors: 2, fast_period: Duration::from_millis(10) })
    }

    fn log_entries(&self) -> Vec<LogEntry> {
        let bytes = fs::read(self.tree.join(DEFAULT_LOG_NAME)).expect("read log");
        bytes[LogFileHeader::SIZE..]
            .chunks(LogEntry::SIZE)
            .map(|raw| *LogEntry::from_bytes(raw).expect("whole entry"))
            .collect()
    }

    fn alpha_chunk(&self, koff: u64) -> Result<[u8; 32], SealError> {
        let start = koff as usize;
        let mut chunk = [0u8; 32];
        chunk.copy_from_slice(&self.alpha[start..start + CHUNK_SIZE]);
        Ok(chunk)
    }

    /// Replay the log against alpha. Returns the number of real entries.
    fn replay(&self, nratchet: u64, payload_of: impl Fn(&LogEntry) -> Vec<u8>) -> usize {
        let entries = self.log_entries();
        assert_eq!(entries.len() as u64 % nratchet, 0, "log must hold whole chains");

        let mut cache = KeyCache::new();
        let mut real = 0;
        for (index, entry) in entries.iter().enumerate() {
            assert_eq!(entry.key_offset(), 16 + (index as u64 / nratchet) * 32);
            assert_eq!(entry.ratchet_offset(), index as u64 % nratchet);

            let key = cache.key_for(entry, nratchet, |koff| self.alpha_chunk(koff)).expect("key");
            let payload = if entry.is_fake() { Vec::new() } else { payload_of(entry) };
            let mut fp = Fingerprinter::new(key, entry);
            fp.update(&payload);
            assert!(fp.verify(entry.fingerprint()), "entry {index} does not verify: {entry}");

            if !entry.is_fake() {
                real += 1;
            }
        }
        real
    }

    fn keystream_now(&self) -> Vec<u8> {
        fs::read(&self.keystream).expect("read keystream")
    }
}

fn file_payload(tree: &Path) -> impl Fn(&LogEntry) -> Vec<u8> {
    let mut by_inode = HashMap::new();
    for dirent in fs::read_dir(tree).expect("read tree") {
        let path = dirent.expect("dirent").path();
        let ino = fs::metadata(&path).expect("metadata").ino();
        by_inode.insert(ino, path);
    }
    move |entry: &LogEntry| {
        let data = fs::read(&by_inode[&entry.inode()]).expect("sealed file");
        data[entry.offset() as usize..entry.end() as usize].to_vec()
    }
}

#[test]
fn three_writes_are_sealed_and_drained() {
    let env = Provisioned::new(16, 1);
    let session = Session::open(&env.config(4)).expect("open session");

    let payloads: Vec<Vec<u8>> = [10usize, 20, 30].iter().map(|&n| vec![n as u8; n]).collect();
    let mut offset = 0;
    for payload in &payloads {
        let entry = session.seal_write(7, offset, payload.len() as u64, payload).expect("seal");
        assert_eq!(entry.offset(), offset);
        offset += payload.len() as u64;
    }
    session.drain_and_seal().expect("drain");

    let entries = env.log_entries();
    assert_eq!(entries.len(), 4);
    assert!(entries[3].is_fake());

    let by_offset: HashMap<u64, Vec<u8>> =
        [(0, payloads[0].clone()), (10, payloads[1].clone()), (30, payloads[2].clone())].into();
    assert_eq!(env.replay(4, |e| by_offset[&e.offset()].clone()), 3);
}

#[test]
fn exhaustion_fails_write_without_entry() {
    let chunks = 3;
    let env = Provisioned::new(chunks, 2);
    let session = Session::open(&env.config(1)).expect("open session");

    for i in 0..chunks as u64 {
        session.seal_write(7, i, 1, &[i as u8]).expect("seal within keystream");
    }
    let err = session.seal_write(7, 3, 1, &[3]).expect_err("keystream is exhausted");
    assert!(matches!(err, SealError::KeystreamExhausted { .. }), "got {err:?}");

    // Fatal: later writes fail the same way
    assert_eq!(session.seal_write(7, 4, 1, &[4]), Err(err));
    session.drain_and_seal().expect("drain");

    assert_eq!(env.log_entries().len(), chunks);
    assert_eq!(env.replay(1, |e| vec![e.offset() as u8]), chunks);
    assert_eq!(
        KeyFileHeader::from_bytes(&env.keystream_now()).expect("header").burnt(),
        16 + (chunks * CHUNK_SIZE) as u64
    );
}

#[test]
fn crash_before_header_persist_is_recovered() {
    let env = Provisioned::new(8, 3);
    let config = env.config(1);

    {
        let store = ChaoticKeyStore::losing_headers(
            FileKeyStore::open(&env.keystream).expect("open keystream"),
        );
        let session = Session::with_store(&config, store).expect("open session");
        for i in 0..3u64 {
            session.seal_write(7, i, 1, &[i as u8]).expect("seal");
        }
        // Chunks are burnt and synced, but the header write is lost
        assert!(matches!(session.drain_and_seal(), Err(SealError::Io(_))));
        assert!(session.store().lost_headers() >= 1);
    }

    let crashed = env.keystream_now();
    assert_eq!(KeyFileHeader::from_bytes(&crashed).expect("header").burnt(), 16);
    assert_ne!(crashed[16..112], env.alpha[16..112]);
    assert_eq!(crashed[112..], env.alpha[112..], "unserved chunks must survive");

    // Restart resumes after the entries already in the log
    let session = Session::open(&config).expect("reopen session");
    let entry = session.seal_write(7, 3, 1, &[3]).expect("seal after restart");
    assert_eq!(entry.key_offset(), 112);
    session.drain_and_seal().expect("drain");

    let recovered = env.keystream_now();
    assert_eq!(KeyFileHeader::from_bytes(&recovered).expect("header").burnt(), 144);
    assert_ne!(recovered[16..144], env.alpha[16..144]);
    assert_eq!(recovered[144..], env.alpha[144..]);
    assert_eq!(env.replay(1, |e| vec![e.offset() as u8]), 4);
}

#[test]
fn failed_burn_leaves_watermark_in_place() {
    let env = Provisioned::new(8, 10);
    let config = env.config(4);

    let store = ChaoticKeyStore::with_seed(
        FileKeyStore::open(&env.keystream).expect("open keystream"),
        1.0,
        0.0,
        42,
    );
    let session = Session::with_store(&config, store).expect("open session");
    session.seal_write(7, 0, 1, &[1]).expect("seal");
    assert_eq!(session.served(), 48);

    assert!(matches!(session.drain_and_seal(), Err(SealError::Io(_))));
    let header = session.store().inner().header().expect("header");
    assert_eq!(header.burnt(), 16, "watermark must not cover unburnt chunks");
    assert_eq!(env.keystream_now()[16..48], env.alpha[16..48]);
}

#[test]
fn with_store_rejects_invalid_config() {
    let env = Provisioned::new(4, 11);
    let config = env.config(1).with_burn(BurnConfig { actors: 0, fast_period: Duration::from_millis(10) });
    let store = FileKeyStore::open(&env.keystream).expect("open keystream");

    let err = Session::with_store(&config, store).err().expect("no burn actors");
    assert!(matches!(err, SealError::Config(_)), "got {err:?}");
}

#[test]
fn concurrent_appends_use_each_key_once() {
    let env = Provisioned::new(64, 4);
    let nratchet = 3;
    let tree = Arc::new(SealedTree::open(&env.config(nratchet)).expect("open tree"));

    let writers: Vec<_> = (0..4u64)
        .map(|w| {
            let tree = Arc::clone(&tree);
            thread::spawn(move || {
                let mut rng = ChaCha8Rng::seed_from_u64(w);
                let mut keys = Vec::new();
                for _ in 0..25 {
                    let mut data = vec![0u8; rng.gen_range(1..200)];
                    rng.fill(&mut data[..]);
                    let entry = tree.append(format!("file{w}"), &data).expect("append");
                    keys.push((entry.key_offset(), entry.ratchet_offset()));
                }
                keys
            })
        })
        .collect();

    let mut seen = HashSet::new();
    for writer in writers {
        for key in writer.join().expect("writer thread") {
            assert!(seen.insert(key), "key {key:?} used twice");
        }
    }
    assert_eq!(seen.len(), 100);
    tree.close().expect("close");

    // 100 writes in chains of 3: 34 chains, two drain entries
    assert_eq!(env.log_entries().len(), 102);
    assert_eq!(env.replay(nratchet as u64, file_payload(&env.tree)), 100);
}

#[test]
fn burnt_prefix_differs_from_alpha() {
    let env = Provisioned::new(32, 5);
    let tree = SealedTree::open(&env.config(2)).expect("open tree");
    for i in 0..9u8 {
        tree.append("audit.log", &[i; 12]).expect("append");
    }
    tree.close().expect("close");

    let now = env.keystream_now();
    let burnt = KeyFileHeader::from_bytes(&now).expect("header").burnt() as usize;
    assert_eq!(burnt, 16 + 5 * CHUNK_SIZE);
    for chunk in (16..burnt).step_by(CHUNK_SIZE) {
        assert_ne!(now[chunk..chunk + CHUNK_SIZE], env.alpha[chunk..chunk + CHUNK_SIZE]);
    }
    assert_eq!(now[burnt..], env.alpha[burnt..]);
}

#[test]
fn tree_refuses_non_append_writes() {
    let env = Provisioned::new(8, 6);
    let tree = SealedTree::open(&env.config(1)).expect("open tree");

    tree.append("data", &[1; 10]).expect("append");
    let err = tree.write_at("data", 3, &[2; 4]).expect_err("overwrite refused");
    assert!(matches!(err, SealError::PermissionDenied(_)));
    tree.write_at("data", 10, &[3; 4]).expect("append at end");

    for rejected in [".hidden", DEFAULT_LOG_NAME, "../escape", "/etc/passwd", ""] {
        let err = tree.append(rejected, &[0]).expect_err("path refused");
        assert!(matches!(err, SealError::PermissionDenied(_)), "{rejected}: {err:?}");
    }
    tree.close().expect("close");

    assert_eq!(fs::read(env.tree.join("data")).expect("data"), [[1u8; 10].as_slice(), &[3; 4]].concat());
    assert_eq!(env.replay(1, file_payload(&env.tree)), 2);
}

#[test]
fn failed_append_gives_its_offset_back() {
    let full = Path::new("/dev/full");
    if !full.exists() {
        return;
    }
    let env = Provisioned::new(8, 12);
    std::os::unix::fs::symlink(full, env.tree.join("full")).expect("symlink");
    let tree = SealedTree::open(&env.config(1)).expect("open tree");

    let err = tree.append("full", &[1; 8]).expect_err("device is full");
    assert!(matches!(err, SealError::Io(_)), "{err:?}");
    // The reservation was released, so offset 0 is still the append point
    let err = tree.write_at("full", 0, &[1; 8]).expect_err("device is full");
    assert!(matches!(err, SealError::Io(_)), "{err:?}");

    tree.append("data", &[2; 4]).expect("append elsewhere");
    tree.close().expect("close");
    assert_eq!(env.log_entries().len(), 1);
}

#[test]
fn writes_after_drain_are_refused() {
    let env = Provisioned::new(8, 7);
    let session = Session::open(&env.config(2)).expect("open session");
    session.seal_write(7, 0, 1, &[1]).expect("seal");
    session.drain_and_seal().expect("drain");
    session.drain_and_seal().expect("second drain is a no-op");

    assert!(!session.is_running());
    assert_eq!(session.seal_write(7, 1, 1, &[2]), Err(SealError::ShutDown));
    assert_eq!(env.log_entries().len(), 2);
}

#[test]
fn reject_mismatched_magic() {
    let env = Provisioned::new(4, 8);
    fs::write(env.tree.join(DEFAULT_LOG_NAME), LogFileHeader::new(MAGIC + 1).to_bytes())
        .expect("rewrite log");
    let err = Session::open(&env.config(1)).err().expect("magic mismatch");
    assert!(matches!(err, SealError::Protocol(_)), "got {err:?}");
}

#[test]
fn reject_reserved_inode_and_bad_counts() {
    let env = Provisioned::new(4, 9);
    let session = Session::open(&env.config(1)).expect("open session");
    assert_eq!(session.seal_write(u64::MAX, 0, 0, &[]), Err(SealError::ReservedInode(u64::MAX)));
    assert!(matches!(session.seal_write(7, 0, 3, &[1]), Err(SealError::CountMismatch { .. })));
    session.drain_and_seal().expect("drain");
    assert!(env.log_entries().is_empty());
    assert!(session.store().size().expect("size") > 0);
}
