//! Durable overflow store
//!
//! A JSON-lines file holding requests that could not go to the in-memory
//! queue because the dispatcher was not connected. Three write paths:
//!
//! - **append**: one line, `fsync`ed before returning
//! - **overwrite**: write a temp file, `fsync`, rename over the original
//! - **load_and_clear**: rename to `<file>.consumed`, read it, delete it
//!
//! A `.consumed` marker that survives a crash is picked up (ahead of the
//! live file) by the next load, so a kill between read and clear never
//! drops records. Lines that fail to parse are skipped with a warning.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::UNIX_EPOCH;

use tracing::{debug, warn};

use super::QueuedRequest;
use crate::error::{Error, Result};

/// File-backed store of undelivered requests.
///
/// Every operation is serialized through one mutex. Callers that need
/// several operations to appear atomic take [`lock`](Self::lock) and use the
/// returned guard.
#[derive(Debug)]
pub struct OverflowStore {
    path: PathBuf,
    consumed_path: PathBuf,
    lock: Mutex<()>,
}

/// Exclusive access to an [`OverflowStore`].
pub struct OverflowGuard<'a> {
    store: &'a OverflowStore,
    _guard: MutexGuard<'a, ()>,
}

impl OverflowStore {
    /// Open (creating if absent) the store at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| Error::Overflow(format!("invalid overflow path: {}", path.display())))?
            .to_string();

        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        OpenOptions::new().create(true).append(true).open(&path)?;

        let consumed_path = path.with_file_name(format!("{}.consumed", file_name));
        debug!(path = %path.display(), "Opened overflow store");

        Ok(Self {
            path,
            consumed_path,
            lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lock(&self) -> OverflowGuard<'_> {
        OverflowGuard {
            store: self,
            _guard: self.lock.lock().unwrap_or_else(PoisonError::into_inner),
        }
    }

    pub fn append(&self, request: &QueuedRequest) -> Result<()> {
        self.lock().append(request)
    }

    pub fn load_and_clear(&self) -> Result<Vec<QueuedRequest>> {
        self.lock().load_and_clear()
    }

    pub fn overwrite(&self, requests: &[QueuedRequest]) -> Result<()> {
        self.lock().overwrite(requests)
    }

    pub fn read_all(&self) -> Result<Vec<QueuedRequest>> {
        self.lock().read_all()
    }

    /// Number of readable records currently stored
    pub fn len(&self) -> Result<usize> {
        Ok(self.read_all()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

impl OverflowGuard<'_> {
    /// Append one record and flush it to disk.
    pub fn append(&self, request: &QueuedRequest) -> Result<()> {
        let mut line = serde_json::to_vec(request)?;
        line.push(b'\n');

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.store.path)?;
        terminate_partial_line(&mut file)?;
        file.write_all(&line)?;
        file.sync_all()?;
        Ok(())
    }

    /// Take every stored record, oldest first, leaving the store empty.
    pub fn load_and_clear(&self) -> Result<Vec<QueuedRequest>> {
        let live = &self.store.path;
        let consumed = &self.store.consumed_path;

        if live.exists() {
            if consumed.exists() {
                // An earlier load was interrupted; fold the live file into the marker
                let mut records = read_records(consumed)?;
                records.extend(read_records(live)?);
                write_atomic(consumed, &records)?;
                File::create(live)?;
            } else {
                fs::rename(live, consumed)?;
                File::create(live)?;
            }
        }

        let records = read_records(consumed)?;
        remove_if_exists(consumed)?;
        Ok(records)
    }

    /// Replace the store's contents with `requests`.
    pub fn overwrite(&self, requests: &[QueuedRequest]) -> Result<()> {
        write_atomic(&self.store.path, requests)?;
        remove_if_exists(&self.store.consumed_path)?;
        Ok(())
    }

    /// Every stored record without consuming anything.
    pub fn read_all(&self) -> Result<Vec<QueuedRequest>> {
        let mut records = read_records(&self.store.consumed_path)?;
        records.extend(read_records(&self.store.path)?);
        Ok(records)
    }
}

/// Parse a JSON-lines file; a missing file reads as empty.
fn read_records(path: &Path) -> Result<Vec<QueuedRequest>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut records = Vec::new();
    for (index, line) in BufReader::new(file).split(b'\n').enumerate() {
        let line = line?;
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        match serde_json::from_slice::<QueuedRequest>(&line) {
            Ok(record) => records.push(record),
            Err(e) => warn!(
                path = %path.display(),
                line = index + 1,
                error = %e,
                "Skipping malformed overflow record"
            ),
        }
    }
    Ok(records)
}

/// If the file ends mid-line (torn write), end that line so the next
/// record starts clean.
fn terminate_partial_line(file: &mut File) -> io::Result<()> {
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(());
    }
    file.seek(SeekFrom::Start(len - 1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    if last[0] != b'\n' {
        file.write_all(b"\n")?;
    }
    Ok(())
}

fn write_atomic(path: &Path, requests: &[QueuedRequest]) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| Error::Overflow(format!("invalid overflow path: {}", path.display())))?;
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| Error::Overflow(format!("invalid overflow path: {}", path.display())))?;

    let mut content = Vec::new();
    for request in requests {
        serde_json::to_writer(&mut content, request)?;
        content.push(b'\n');
    }

    let tmp_path = dir.join(format!(
        ".{}.tmp.{}",
        file_name,
        std::time::SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos()
    ));

    let write_result = (|| -> io::Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&tmp_path)?;
        file.write_all(&content)?;
        file.sync_all()?;

        fs::rename(&tmp_path, path)?;

        if let Ok(parent_dir) = File::open(dir) {
            let _ = parent_dir.sync_all();
        }
        Ok(())
    })();

    if let Err(err) = write_result {
        let _ = fs::remove_file(&tmp_path);
        return Err(err.into());
    }
    Ok(())
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
