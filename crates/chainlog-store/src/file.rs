//! JSON Lines implementation of `LedgerStore`.
//!
//! One entry per line, appended and `fsync`ed before `append` returns.  The
//! file is the source of truth; an in-memory `LedgerIndex` rebuilt on open
//! serves reads.
//!
//! Recovery rules on open:
//! - A trailing line without its newline is a torn write from a crash.  It
//!   is discarded (with a warning) and the file is truncated back to the
//!   last complete line.
//! - A complete line that does not parse is corruption and fails the open.
//!
//! A failed append truncates the file back to its previous length so a
//! partial line never precedes the next entry.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use tracing::{debug, info, warn};

use chainlog_contracts::{
    entry::LogEntry,
    error::{LedgerError, LedgerResult},
    query::LedgerQuery,
};
use chainlog_core::traits::LedgerStore;

use crate::memory::{check_required, LedgerIndex, MemoryLedgerStore};

fn io_error(path: &Path, action: &str, e: std::io::Error) -> LedgerError {
    LedgerError::Storage {
        reason: format!("failed to {} {}: {}", action, path.display(), e),
    }
}

struct FileState {
    file: File,
    /// Length of the file up to the end of the last complete line.
    len: u64,
}

/// A durable ledger store backed by a JSON Lines file.
pub struct JsonlLedgerStore {
    path: PathBuf,
    file: Mutex<FileState>,
    index: MemoryLedgerStore,
}

impl JsonlLedgerStore {
    /// Open (or create) the ledger file at `path` and rebuild the index.
    pub fn open(path: impl AsRef<Path>) -> LedgerResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| io_error(&path, "open", e))?;

        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)
            .map_err(|e| io_error(&path, "read", e))?;

        let (index, len) = load(&path, &bytes)?;

        if len < bytes.len() as u64 {
            warn!(
                path = %path.display(),
                discarded_bytes = bytes.len() as u64 - len,
                "discarding torn trailing line"
            );
            file.set_len(len)
                .map_err(|e| io_error(&path, "truncate", e))?;
            file.sync_data()
                .map_err(|e| io_error(&path, "sync", e))?;
        }

        info!(
            path = %path.display(),
            entries = index.entries.len(),
            "ledger file opened"
        );

        let store = MemoryLedgerStore::new();
        *store.write()? = index;

        Ok(Self {
            path,
            file: Mutex::new(FileState { file, len }),
            index: store,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write one line at the end of the file and flush it to disk.
    fn write_line(&self, state: &mut FileState, line: &[u8]) -> std::io::Result<()> {
        state.file.seek(SeekFrom::Start(state.len))?;
        state.file.write_all(line)?;
        state.file.sync_data()
    }
}

/// Parse `bytes` into an index.  Returns the index and the byte length of
/// the complete lines it was built from.
fn load(path: &Path, bytes: &[u8]) -> LedgerResult<(LedgerIndex, u64)> {
    let mut index = LedgerIndex::default();
    let mut offset = 0usize;
    let mut line_no = 0usize;

    while offset < bytes.len() {
        let Some(end) = bytes[offset..].iter().position(|b| *b == b'\n') else {
            // No newline: torn write.
            break;
        };
        let line = &bytes[offset..offset + end];
        line_no += 1;

        if !line.iter().all(u8::is_ascii_whitespace) {
            let entry: LogEntry = serde_json::from_slice(line).map_err(|e| LedgerError::Storage {
                reason: format!("{}:{}: malformed ledger line: {}", path.display(), line_no, e),
            })?;
            index.insert(entry).map_err(|e| LedgerError::Storage {
                reason: format!("{}:{}: {}", path.display(), line_no, e),
            })?;
        }
        offset += end + 1;
    }

    Ok((index, offset as u64))
}

impl LedgerStore for JsonlLedgerStore {
    fn append(&self, entry: &LogEntry) -> LedgerResult<()> {
        check_required(entry)?;

        let mut state = self.file.lock().map_err(|e: PoisonError<_>| LedgerError::Storage {
            reason: format!("ledger file lock poisoned: {}", e),
        })?;

        if self.index.read()?.contains(entry.sequence) {
            return Err(LedgerError::DuplicateSequence {
                sequence: entry.sequence,
            });
        }

        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');

        if let Err(e) = self.write_line(&mut state, &line) {
            let len = state.len;
            if let Err(trunc) = state.file.set_len(len) {
                warn!(
                    path = %self.path.display(),
                    error = %trunc,
                    "could not roll back partial ledger line"
                );
            }
            return Err(io_error(&self.path, "append to", e));
        }
        state.len += line.len() as u64;

        self.index.write()?.insert(entry.clone())?;
        debug!(sequence = entry.sequence, "entry appended to ledger file");
        Ok(())
    }

    fn get(&self, sequence: u64) -> LedgerResult<Option<LogEntry>> {
        self.index.get(sequence)
    }

    fn range(&self, from: u64, to: u64) -> LedgerResult<Vec<LogEntry>> {
        self.index.range(from, to)
    }

    fn query(&self, query: &LedgerQuery) -> LedgerResult<Vec<LogEntry>> {
        self.index.query(query)
    }

    fn last(&self) -> LedgerResult<Option<LogEntry>> {
        self.index.last()
    }

    fn count(&self) -> LedgerResult<u64> {
        self.index.count()
    }
}
