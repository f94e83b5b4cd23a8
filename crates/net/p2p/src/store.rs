//! Persistence of dial candidates across restarts.

use crate::error::StoreError;
use les_network_types::{PeerId, Reputation, DEFAULT_REPUTATION};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    fmt,
    io::{self, ErrorKind},
    net::SocketAddr,
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};
use tracing::{info, trace};

/// What is remembered about a dial candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateRecord {
    /// Where to reach the candidate.
    pub address: SocketAddr,
    /// Unix timestamp in seconds of the last successful connection.
    pub last_seen: Option<u64>,
    /// Consecutive dial failures.
    pub fail_streak: u32,
    /// Reputation at the time of the last update.
    pub reputation: Reputation,
}

impl CandidateRecord {
    /// A fresh record for a newly discovered candidate.
    pub const fn new(address: SocketAddr) -> Self {
        Self { address, last_seen: None, fail_streak: 0, reputation: DEFAULT_REPUTATION }
    }

    /// Marks the candidate as seen now.
    pub fn touch(&mut self) {
        self.last_seen =
            SystemTime::now().duration_since(UNIX_EPOCH).ok().map(|elapsed| elapsed.as_secs());
    }
}

/// A key-value store of candidate records, keyed by peer id.
///
/// The pool reads all records once at startup and writes a record on every update.
#[auto_impl::auto_impl(&, Arc, Box)]
pub trait CandidateStore: fmt::Debug + Send + Sync {
    /// Loads all persisted records.
    fn load(&self) -> Result<HashMap<PeerId, CandidateRecord>, StoreError>;

    /// Inserts or replaces the record of a candidate.
    fn store(&self, peer_id: PeerId, record: CandidateRecord) -> Result<(), StoreError>;
}

/// A [`CandidateStore`] that keeps records in memory only.
#[derive(Debug, Default)]
pub struct MemoryCandidateStore {
    records: Mutex<HashMap<PeerId, CandidateRecord>>,
}

impl MemoryCandidateStore {
    /// Returns the record of a candidate.
    pub fn get(&self, peer_id: &PeerId) -> Option<CandidateRecord> {
        self.records.lock().get(peer_id).copied()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Returns `true` if no record is stored.
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

impl CandidateStore for MemoryCandidateStore {
    fn load(&self) -> Result<HashMap<PeerId, CandidateRecord>, StoreError> {
        Ok(self.records.lock().clone())
    }

    fn store(&self, peer_id: PeerId, record: CandidateRecord) -> Result<(), StoreError> {
        self.records.lock().insert(peer_id, record);
        Ok(())
    }
}

/// Entry of the candidates file.
#[derive(Serialize, Deserialize)]
struct StoredCandidate {
    id: PeerId,
    #[serde(flatten)]
    record: CandidateRecord,
}

/// A [`CandidateStore`] backed by a JSON file.
///
/// All records are cached in memory. Every update rewrites the file through a temporary file
/// that is renamed into place, so a crash never leaves a truncated file behind.
#[derive(Debug)]
pub struct FileCandidateStore {
    path: PathBuf,
    records: Mutex<HashMap<PeerId, CandidateRecord>>,
}

impl FileCandidateStore {
    /// Opens the store at `path`. A missing file is an empty store.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let records = match std::fs::File::open(&path) {
            Ok(file) => {
                let reader = io::BufReader::new(file);
                let stored: Vec<StoredCandidate> = serde_json::from_reader(reader)?;
                info!(target: "net::store", file = %path.display(), candidates = stored.len(), "Loading saved candidates");
                stored.into_iter().map(|entry| (entry.id, entry.record)).collect()
            }
            Err(err) if err.kind() == ErrorKind::NotFound => HashMap::new(),
            Err(err) => return Err(err.into()),
        };
        Ok(Self { path, records: Mutex::new(records) })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write(&self, records: &HashMap<PeerId, CandidateRecord>) -> Result<(), StoreError> {
        let stored = records
            .iter()
            .map(|(id, record)| StoredCandidate { id: *id, record: *record })
            .collect::<Vec<_>>();

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("tmp");
        let file = std::fs::File::create(&tmp)?;
        serde_json::to_writer_pretty(io::BufWriter::new(file), &stored)?;
        std::fs::rename(&tmp, &self.path)?;

        trace!(target: "net::store", file = %self.path.display(), candidates = stored.len(), "wrote candidates");
        Ok(())
    }
}

impl CandidateStore for FileCandidateStore {
    fn load(&self) -> Result<HashMap<PeerId, CandidateRecord>, StoreError> {
        Ok(self.records.lock().clone())
    }

    fn store(&self, peer_id: PeerId, record: CandidateRecord) -> Result<(), StoreError> {
        let mut records = self.records.lock();
        records.insert(peer_id, record);
        self.write(&records)
    }
}
