use std::{
    collections::BTreeMap,
    fmt, fs,
    io::{self, Write},
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex, MutexGuard, PoisonError,
    },
};

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::{
    alarm::AlarmRecord,
    error::{Error, PersistError, Result},
};

/// Alarms by id, written to disk as a plain list.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(from = "Vec<AlarmRecord>", into = "Vec<AlarmRecord>")]
struct Alarms(BTreeMap<String, AlarmRecord>);

impl From<Vec<AlarmRecord>> for Alarms {
    fn from(records: Vec<AlarmRecord>) -> Self {
        Self(
            records
                .into_iter()
                .map(|record| (record.id.clone(), record))
                .collect(),
        )
    }
}

impl From<Alarms> for Vec<AlarmRecord> {
    fn from(alarms: Alarms) -> Self {
        alarms.0.into_values().collect()
    }
}

/// On-disk layout of the store file.
#[derive(Debug, Serialize, Deserialize, Default)]
struct StoreFile {
    #[serde(default)]
    alarms: Alarms,
}

/// What this process last read from or wrote to the store file.
#[derive(Debug, Default)]
struct Snapshot {
    alarms: Alarms,
    /// raw file contents `alarms` was parsed from, `None` if there was no file
    contents: Option<String>,
}

/// Durable home of every [`AlarmRecord`].
///
/// The collection is rewritten to a TOML file on every change. A write goes to
/// a sibling temporary file first and is renamed over the real one, so a crash
/// leaves either the old or the new contents.
///
/// Other processes may share the file: every transaction takes an exclusive
/// lock on `<path>.lock` and picks up what was written since the last one.
#[derive(Debug)]
pub struct AlarmStore {
    path: PathBuf,
    snapshot: Mutex<Snapshot>,
    changed_elsewhere: AtomicBool,
}

impl AlarmStore {
    /// Load the store at `path`, a missing file is an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let snapshot = read_snapshot(&path).map_err(|e| storage(&path, e))?;
        info!(
            "opened alarm store {} with {} alarms",
            path.display(),
            snapshot.alarms.0.len()
        );
        Ok(Self {
            path,
            snapshot: Mutex::new(snapshot),
            changed_elsewhere: AtomicBool::new(false),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Exclusive access to the store, for this and every other process, until
    /// the returned guard is dropped.
    pub fn begin(&self) -> Result<StoreTxn<'_>> {
        let mut snapshot = self.snapshot.lock().unwrap_or_else(PoisonError::into_inner);
        let lock = lock_file(&self.path).map_err(|e| storage(&self.path, e))?;
        let contents = read_contents(&self.path).map_err(|e| storage(&self.path, e))?;
        if contents != snapshot.contents {
            *snapshot = parse_snapshot(contents).map_err(|e| storage(&self.path, e))?;
            debug!("{} was changed by another process", self.path.display());
            self.changed_elsewhere.store(true, Ordering::Release);
        }
        Ok(StoreTxn {
            path: &self.path,
            snapshot,
            _lock: lock,
        })
    }

    /// Catch up with the file and report whether another process changed it
    /// since the last call.
    pub fn sync(&self) -> Result<bool> {
        drop(self.begin()?);
        Ok(self.changed_elsewhere.swap(false, Ordering::AcqRel))
    }

    /// Insert or replace the record with the same id.
    pub fn put(&self, record: AlarmRecord) -> Result<Option<AlarmRecord>> {
        self.begin()?.put(record)
    }

    pub fn get(&self, id: &str) -> Result<AlarmRecord> {
        self.begin()?
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    /// Remove the record, returning it if it was there.
    pub fn delete(&self, id: &str) -> Result<Option<AlarmRecord>> {
        self.begin()?.delete(id)
    }

    pub fn list(&self) -> Result<Vec<AlarmRecord>> {
        Ok(self.begin()?.list())
    }
}

/// A locked view of an [`AlarmStore`].
///
/// Changes are durable by the time `put`/`delete` return; if the write fails
/// the in-memory contents are left as they were.
pub struct StoreTxn<'a> {
    path: &'a Path,
    snapshot: MutexGuard<'a, Snapshot>,
    _lock: FileLock,
}

impl fmt::Debug for StoreTxn<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreTxn")
            .field("path", &self.path)
            .field("alarms", &self.snapshot.alarms)
            .finish_non_exhaustive()
    }
}

impl StoreTxn<'_> {
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&AlarmRecord> {
        self.snapshot.alarms.0.get(id)
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.snapshot.alarms.0.contains_key(id)
    }

    #[must_use]
    pub fn list(&self) -> Vec<AlarmRecord> {
        self.snapshot.alarms.0.values().cloned().collect()
    }

    pub fn put(&mut self, record: AlarmRecord) -> Result<Option<AlarmRecord>> {
        let mut next = self.snapshot.alarms.clone();
        let previous = next.0.insert(record.id.clone(), record);
        self.commit(next)?;
        Ok(previous)
    }

    pub fn delete(&mut self, id: &str) -> Result<Option<AlarmRecord>> {
        if !self.contains(id) {
            return Ok(None);
        }
        let mut next = self.snapshot.alarms.clone();
        let removed = next.0.remove(id);
        self.commit(next)?;
        Ok(removed)
    }

    fn commit(&mut self, next: Alarms) -> Result<()> {
        let file = StoreFile { alarms: next };
        let contents = write_atomically(self.path, &file).map_err(|e| storage(self.path, e))?;
        debug!(
            "wrote {} alarms to {}",
            file.alarms.0.len(),
            self.path.display()
        );
        *self.snapshot = Snapshot {
            alarms: file.alarms,
            contents: Some(contents),
        };
        Ok(())
    }
}

#[cfg(unix)]
type FileLock = nix::fcntl::Flock<fs::File>;
#[cfg(not(unix))]
type FileLock = fs::File;

fn lock_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".lock");
    PathBuf::from(name)
}

/// Blocks until no other process holds the lock of the store at `path`.
fn lock_file(path: &Path) -> Result<FileLock, PersistError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(lock_path(path))?;
    #[cfg(unix)]
    let file = nix::fcntl::Flock::lock(file, nix::fcntl::FlockArg::LockExclusive)
        .map_err(|(_, errno)| io::Error::from(errno))?;
    Ok(file)
}

fn read_contents(path: &Path) -> Result<Option<String>, PersistError> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(Some(contents)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn parse_snapshot(contents: Option<String>) -> Result<Snapshot, PersistError> {
    let alarms = match &contents {
        Some(contents) => toml::from_str::<StoreFile>(contents)?.alarms,
        None => Alarms::default(),
    };
    Ok(Snapshot { alarms, contents })
}

fn read_snapshot(path: &Path) -> Result<Snapshot, PersistError> {
    parse_snapshot(read_contents(path)?)
}

/// Returns what was written.
fn write_atomically(path: &Path, file: &StoreFile) -> Result<String, PersistError> {
    let contents = toml::to_string(file)?;
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp = PathBuf::from(tmp_name);
    let mut out = fs::File::create(&tmp)?;
    out.write_all(contents.as_bytes())?;
    out.sync_all()?;
    drop(out);
    fs::rename(&tmp, path)?;
    Ok(contents)
}

fn storage(path: &Path, source: impl Into<PersistError>) -> Error {
    Error::StorageFailure {
        path: path.to_path_buf(),
        source: source.into(),
    }
}
