use crate::storage_traits::WriteBatch;
use bincode;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use televault_core::error::StorageError;

/// Largest record the log writes or accepts on replay
pub const MAX_RECORD_LEN: u64 = 16 * 1024 * 1024;

/// A committed batch as recorded in the write-ahead log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WALEntry {
    /// Position of this batch in commit order
    pub sequence: u64,

    /// When the batch was recorded (unix milliseconds)
    pub timestamp: i64,

    pub batch: WriteBatch,
}

/// Entry type in the WAL
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WALRecord {
    /// A committed batch
    Batch(WALEntry),

    /// Marks that a snapshot with this root was written; entries after it
    /// apply on top of that snapshot
    Checkpoint { sequence: u64, state_root: [u8; 32] },
}

/// Outcome of reading a log from disk
#[derive(Debug, Default)]
pub struct WALReplay {
    pub records: Vec<WALRecord>,

    /// The log ended in a partially written record, which was ignored
    pub torn_tail: bool,
}

/// Append-only file log of committed batches
pub struct FileWriteAheadLog {
    /// Path to the WAL file
    path: PathBuf,

    /// File handle for writing
    file: Mutex<BufWriter<File>>,
}

impl FileWriteAheadLog {
    /// Open or create the log at `path`
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        let file = Self::open_for_append(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(BufWriter::new(file)),
        })
    }

    fn open_for_append(path: &Path) -> Result<File, StorageError> {
        OpenOptions::new()
            .create(true)
            .append(true)
            .read(true)
            .open(path)
            .map_err(|e| StorageError::WAL(format!("Failed to open WAL file: {}", e)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current time in unix milliseconds
    pub fn current_timestamp() -> i64 {
        Utc::now().timestamp_millis()
    }

    /// Durably append a record
    pub fn append(&self, record: &WALRecord) -> Result<(), StorageError> {
        let mut file = self
            .file
            .lock()
            .map_err(|e| StorageError::WAL(format!("Failed to acquire lock: {}", e)))?;

        let serialized = bincode::serialize(record)?;

        // Write the entry length and data
        let entry_len = serialized.len() as u64;
        if entry_len > MAX_RECORD_LEN {
            return Err(StorageError::WAL(format!(
                "Record of {} bytes exceeds the {} byte limit",
                entry_len, MAX_RECORD_LEN
            )));
        }
        file.write_all(&entry_len.to_le_bytes())?;
        file.write_all(&serialized)?;
        file.flush()?;
        file.get_ref().sync_data()?;

        Ok(())
    }

    /// Drop every record and start the log over with `first`
    pub fn reset(&self, first: &WALRecord) -> Result<(), StorageError> {
        {
            let mut file = self
                .file
                .lock()
                .map_err(|e| StorageError::WAL(format!("Failed to acquire lock: {}", e)))?;
            file.flush()?;
            let truncated = OpenOptions::new()
                .write(true)
                .truncate(true)
                .open(&self.path)
                .map_err(|e| StorageError::WAL(format!("Failed to truncate WAL file: {}", e)))?;
            truncated.sync_all()?;
            *file = BufWriter::new(Self::open_for_append(&self.path)?);
        }
        self.append(first)
    }

    /// Read every complete record from the log
    pub fn read_all(&self) -> Result<WALReplay, StorageError> {
        let file = File::open(&self.path)?;
        let remaining = file.metadata()?.len();
        let mut iterator = WALRecordIterator {
            reader: BufReader::new(file),
            remaining,
            torn: false,
        };

        let mut replay = WALReplay::default();
        for record in iterator.by_ref() {
            replay.records.push(record?);
        }
        replay.torn_tail = iterator.torn;
        Ok(replay)
    }
}

/// Iterator over WAL records
struct WALRecordIterator {
    reader: BufReader<File>,

    /// Bytes of the file not read yet
    remaining: u64,
    torn: bool,
}

impl WALRecordIterator {
    /// Fill `buf`, returning false if the file ends first
    fn read_full(&mut self, buf: &mut [u8]) -> Result<bool, StorageError> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.reader.read(&mut buf[filled..]) {
                Ok(0) => return Ok(false),
                Ok(n) => {
                    filled += n;
                    self.remaining = self.remaining.saturating_sub(n as u64);
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(StorageError::from(e)),
            }
        }
        Ok(true)
    }
}

impl Iterator for WALRecordIterator {
    type Item = Result<WALRecord, StorageError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.torn {
            return None;
        }

        // Read the entry length
        let mut len_buf = [0u8; 8];
        let mut first = [0u8; 1];
        match self.read_full(&mut first) {
            Ok(false) => return None,
            Ok(true) => len_buf[0] = first[0],
            Err(e) => return Some(Err(e)),
        }
        match self.read_full(&mut len_buf[1..]) {
            Ok(true) => {}
            Ok(false) => {
                self.torn = true;
                return None;
            }
            Err(e) => return Some(Err(e)),
        }

        let entry_len = u64::from_le_bytes(len_buf);
        if entry_len > MAX_RECORD_LEN {
            self.torn = true;
            return Some(Err(StorageError::Corrupted(format!(
                "WAL record length {} exceeds the {} byte limit",
                entry_len, MAX_RECORD_LEN
            ))));
        }
        if entry_len > self.remaining {
            self.torn = true;
            return None;
        }

        // Read the entry data
        let mut entry_data = vec![0u8; entry_len as usize];
        match self.read_full(&mut entry_data) {
            Ok(true) => {}
            Ok(false) => {
                self.torn = true;
                return None;
            }
            Err(e) => return Some(Err(e)),
        }

        Some(bincode::deserialize(&entry_data).map_err(StorageError::from))
    }
}
