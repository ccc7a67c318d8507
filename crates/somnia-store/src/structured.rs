use std::collections::{BTreeSet, HashMap};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use somnia_types::{Collection, StoredValue};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::error::{StoreError, StoreResult};
use crate::memory::Rows;
use crate::selector::StorageMode;
use crate::traits::{key_of, RecordBackend};

/// Header size: 4 bytes length + 4 bytes CRC.
const HEADER_SIZE: usize = 8;
const META_FILE: &str = "meta.json";

/// Tuning for the structured store.
#[derive(Clone, Debug)]
pub struct StructuredConfig {
    /// `fsync` after every append and rewrite.
    pub fsync: bool,
    /// Rewrite a collection log once this many operations were appended
    /// since the last rewrite. `0` disables automatic compaction.
    pub compact_after: usize,
}

impl Default for StructuredConfig {
    fn default() -> Self {
        Self {
            fsync: false,
            compact_after: 256,
        }
    }
}

/// Persisted store metadata (`meta.json`).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreMeta {
    /// Schema version the collections conform to. `0` for a fresh store.
    pub schema_version: u32,
    /// Collections that have been created.
    pub collections: BTreeSet<Collection>,
}

/// One logged mutation.
///
/// On-disk framing of each entry:
/// ```text
/// [4 bytes: payload length (little-endian u32)]
/// [4 bytes: CRC32 of payload (little-endian u32)]
/// [N bytes: payload (JSON-serialized LogOp)]
/// ```
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum LogOp {
    Put { value: StoredValue },
    Delete { id: String },
}

struct CollectionLog {
    path: PathBuf,
    writer: BufWriter<File>,
    rows: Rows,
    /// Operations appended since the last rewrite.
    appended: usize,
}

struct Replay {
    rows: Rows,
    entries: usize,
    /// `false` when damaged or torn entries were found.
    clean: bool,
}

/// Durable record store: one append-only log per collection.
///
/// Every mutation is framed with a length prefix and a CRC32 checksum and
/// appended to `<root>/<collection>.log`. On open each log is replayed into
/// an in-memory index; entries failing the CRC check are skipped (torn
/// writes from a crash) and a damaged log is rewritten from what survived.
/// Rewrites (compaction and [`RecordBackend::replace`]) stage the new log in
/// a temporary file and rename it over the live one, so a collection is
/// never observed half-replaced.
pub struct StructuredStore {
    root: PathBuf,
    config: StructuredConfig,
    logs: Mutex<HashMap<Collection, CollectionLog>>,
    meta: Mutex<StoreMeta>,
}

impl StructuredStore {
    /// Open (or create) a store rooted at `root`.
    ///
    /// Fails if the directory cannot be created or written to.
    pub fn open(root: &Path, config: StructuredConfig) -> StoreResult<Self> {
        fs::create_dir_all(root)?;
        // Writability probe.
        drop(NamedTempFile::new_in(root)?);

        let meta = read_meta(root)?;
        let mut logs = HashMap::new();
        for &collection in &meta.collections {
            logs.insert(collection, load_log(root, collection, &config)?);
        }

        info!(
            root = %root.display(),
            schema_version = meta.schema_version,
            collections = meta.collections.len(),
            "structured store opened"
        );

        Ok(Self {
            root: root.to_path_buf(),
            config,
            logs: Mutex::new(logs),
            meta: Mutex::new(meta),
        })
    }

    /// Directory holding the logs and `meta.json`.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn schema_version(&self) -> u32 {
        self.meta.lock().expect("meta mutex poisoned").schema_version
    }

    /// Persist a new schema version.
    pub fn set_schema_version(&self, version: u32) -> StoreResult<()> {
        let mut meta = self.meta.lock().expect("meta mutex poisoned");
        let mut next = meta.clone();
        next.schema_version = version;
        write_meta(&self.root, &next, self.config.fsync)?;
        *meta = next;
        debug!(version, "schema version persisted");
        Ok(())
    }

    pub fn has_collection(&self, collection: Collection) -> bool {
        self.logs
            .lock()
            .expect("log mutex poisoned")
            .contains_key(&collection)
    }

    /// Collections created so far.
    pub fn collections(&self) -> Vec<Collection> {
        self.meta
            .lock()
            .expect("meta mutex poisoned")
            .collections
            .iter()
            .copied()
            .collect()
    }

    /// Create a collection if it does not exist. Returns `true` if created.
    pub fn ensure_collection(&self, collection: Collection) -> StoreResult<bool> {
        let mut logs = self.logs.lock().expect("log mutex poisoned");
        if logs.contains_key(&collection) {
            return Ok(false);
        }
        let log = load_log(&self.root, collection, &self.config)?;

        let mut meta = self.meta.lock().expect("meta mutex poisoned");
        let mut next = meta.clone();
        next.collections.insert(collection);
        write_meta(&self.root, &next, self.config.fsync)?;
        *meta = next;

        logs.insert(collection, log);
        info!(%collection, "collection created");
        Ok(true)
    }

    /// Rewrite a collection log so it holds exactly one entry per value.
    pub fn compact(&self, collection: Collection) -> StoreResult<()> {
        let mut logs = self.logs.lock().expect("log mutex poisoned");
        if let Some(log) = logs.get_mut(&collection) {
            self.rewrite(log)?;
            debug!(%collection, values = log.rows.len(), "collection log compacted");
        }
        Ok(())
    }

    /// Path of a collection's log file.
    pub fn log_path(&self, collection: Collection) -> PathBuf {
        log_path(&self.root, collection)
    }

    fn append(&self, log: &mut CollectionLog, ops: &[LogOp]) -> StoreResult<()> {
        for op in ops {
            log.writer.write_all(&encode_frame(op)?)?;
        }
        log.writer.flush()?;
        if self.config.fsync {
            log.writer.get_ref().sync_all()?;
        }
        log.appended += ops.len();
        Ok(())
    }

    fn rewrite(&self, log: &mut CollectionLog) -> StoreResult<()> {
        log.writer = write_log(&self.root, &log.path, log.rows.values(), self.config.fsync)?;
        log.appended = 0;
        Ok(())
    }

    fn maybe_compact(&self, collection: Collection, log: &mut CollectionLog) -> StoreResult<()> {
        if self.config.compact_after > 0 && log.appended >= self.config.compact_after {
            self.rewrite(log)?;
            debug!(%collection, values = log.rows.len(), "collection log compacted");
        }
        Ok(())
    }
}

impl RecordBackend for StructuredStore {
    fn mode(&self) -> StorageMode {
        StorageMode::StructuredStore
    }

    fn get(&self, collection: Collection, id: &str) -> StoreResult<Option<StoredValue>> {
        let logs = self.logs.lock().expect("log mutex poisoned");
        Ok(logs
            .get(&collection)
            .and_then(|log| log.rows.get(id))
            .cloned())
    }

    fn get_all(&self, collection: Collection) -> StoreResult<Vec<StoredValue>> {
        let logs = self.logs.lock().expect("log mutex poisoned");
        Ok(logs
            .get(&collection)
            .map(|log| log.rows.values().to_vec())
            .unwrap_or_default())
    }

    fn put(&self, collection: Collection, value: &StoredValue) -> StoreResult<()> {
        self.put_batch(collection, std::slice::from_ref(value))
    }

    fn put_batch(&self, collection: Collection, values: &[StoredValue]) -> StoreResult<()> {
        for value in values {
            key_of(value)?;
        }
        let mut logs = self.logs.lock().expect("log mutex poisoned");
        let log = logs
            .get_mut(&collection)
            .ok_or(StoreError::MissingCollection(collection))?;

        let ops: Vec<LogOp> = values
            .iter()
            .map(|value| LogOp::Put {
                value: value.clone(),
            })
            .collect();
        self.append(log, &ops)?;
        for value in values {
            log.rows.upsert(value.clone());
        }
        self.maybe_compact(collection, log)
    }

    fn delete(&self, collection: Collection, id: &str) -> StoreResult<bool> {
        let mut logs = self.logs.lock().expect("log mutex poisoned");
        let Some(log) = logs.get_mut(&collection) else {
            return Ok(false);
        };
        if log.rows.get(id).is_none() {
            return Ok(false);
        }
        self.append(log, &[LogOp::Delete { id: id.to_string() }])?;
        log.rows.remove(id);
        self.maybe_compact(collection, log)?;
        Ok(true)
    }

    fn replace(&self, collection: Collection, values: &[StoredValue]) -> StoreResult<()> {
        for value in values {
            key_of(value)?;
        }
        let mut logs = self.logs.lock().expect("log mutex poisoned");
        let log = logs
            .get_mut(&collection)
            .ok_or(StoreError::MissingCollection(collection))?;

        let rows = Rows::from_values(values.to_vec());
        log.writer = write_log(&self.root, &log.path, rows.values(), self.config.fsync)?;
        log.rows = rows;
        log.appended = 0;
        debug!(%collection, count = log.rows.len(), "collection replaced");
        Ok(())
    }

    fn count(&self, collection: Collection) -> StoreResult<usize> {
        let logs = self.logs.lock().expect("log mutex poisoned");
        Ok(logs.get(&collection).map(|log| log.rows.len()).unwrap_or(0))
    }
}

impl std::fmt::Debug for StructuredStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StructuredStore")
            .field("root", &self.root)
            .field("schema_version", &self.schema_version())
            .finish()
    }
}

fn log_path(root: &Path, collection: Collection) -> PathBuf {
    root.join(format!("{}.log", collection.as_str()))
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

fn encode_frame(op: &LogOp) -> StoreResult<Vec<u8>> {
    let payload = serde_json::to_vec(op)?;
    let length = u32::try_from(payload.len())
        .map_err(|_| StoreError::Serialization("log entry exceeds 4 GiB".into()))?;
    let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len());
    frame.extend_from_slice(&length.to_le_bytes());
    frame.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

fn replay(path: &Path) -> StoreResult<Replay> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
        Err(e) => return Err(e.into()),
    };
    let mut rows = Rows::default();
    let mut entries = 0;
    let mut clean = true;
    let mut offset = 0usize;

    while offset + HEADER_SIZE <= bytes.len() {
        let length = read_u32(&bytes, offset) as usize;
        let expected_crc = read_u32(&bytes, offset + 4);

        if length == 0 || offset + HEADER_SIZE + length > bytes.len() {
            warn!(
                path = %path.display(),
                offset,
                length,
                "invalid log entry length; stopping replay"
            );
            clean = false;
            break;
        }

        let payload = &bytes[offset + HEADER_SIZE..offset + HEADER_SIZE + length];
        offset += HEADER_SIZE + length;

        let actual_crc = crc32fast::hash(payload);
        if actual_crc != expected_crc {
            warn!(
                path = %path.display(),
                offset,
                expected = expected_crc,
                actual = actual_crc,
                "CRC mismatch; skipping log entry"
            );
            clean = false;
            continue;
        }

        match serde_json::from_slice::<LogOp>(payload) {
            Ok(LogOp::Put { value }) => rows.upsert(value),
            Ok(LogOp::Delete { id }) => {
                rows.remove(&id);
            }
            Err(e) => {
                warn!(path = %path.display(), offset, error = %e, "undecodable log entry; skipping");
                clean = false;
                continue;
            }
        }
        entries += 1;
    }

    if clean && offset < bytes.len() {
        warn!(path = %path.display(), trailing = bytes.len() - offset, "torn log tail");
        clean = false;
    }

    Ok(Replay {
        rows,
        entries,
        clean,
    })
}

fn load_log(root: &Path, collection: Collection, config: &StructuredConfig) -> StoreResult<CollectionLog> {
    let path = log_path(root, collection);
    let replayed = replay(&path)?;
    let writer = if replayed.clean {
        open_append(&path)?
    } else {
        info!(%collection, survivors = replayed.rows.len(), "rewriting damaged collection log");
        write_log(root, &path, replayed.rows.values(), config.fsync)?
    };
    debug!(%collection, entries = replayed.entries, values = replayed.rows.len(), "collection log replayed");

    Ok(CollectionLog {
        path,
        writer,
        appended: replayed.entries.saturating_sub(replayed.rows.len()),
        rows: replayed.rows,
    })
}

fn open_append(path: &Path) -> io::Result<BufWriter<File>> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(BufWriter::new(file))
}

/// Stage a log holding one `Put` per value and rename it over `path`.
fn write_log(root: &Path, path: &Path, values: &[StoredValue], fsync: bool) -> StoreResult<BufWriter<File>> {
    let mut staged = NamedTempFile::new_in(root)?;
    {
        let mut writer = BufWriter::new(staged.as_file_mut());
        for value in values {
            let frame = encode_frame(&LogOp::Put {
                value: value.clone(),
            })?;
            writer.write_all(&frame)?;
        }
        writer.flush()?;
    }
    if fsync {
        staged.as_file().sync_all()?;
    }
    staged.persist(path).map_err(|e| e.error)?;
    Ok(open_append(path)?)
}

fn read_meta(root: &Path) -> StoreResult<StoreMeta> {
    match fs::read(root.join(META_FILE)) {
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(StoreMeta::default()),
        Err(e) => Err(e.into()),
    }
}

fn write_meta(root: &Path, meta: &StoreMeta, fsync: bool) -> StoreResult<()> {
    let mut staged = NamedTempFile::new_in(root)?;
    serde_json::to_writer_pretty(staged.as_file_mut(), meta)?;
    if fsync {
        staged.as_file().sync_all()?;
    }
    staged.persist(root.join(META_FILE)).map_err(|e| e.error)?;
    Ok(())
}
