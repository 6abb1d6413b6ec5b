//! File-backed transaction log
//!
//! ## File Format
//!
//! One entry per line:
//!
//! ```text
//! <crc32 as 8 hex digits> <sequence> <tx json>\n
//! ```
//!
//! The checksum covers everything after the first space. On open the file is
//! scanned front to back; the first line that is incomplete, fails its
//! checksum or does not decode ends the log. That tail is the remnant of a
//! write interrupted by a crash: it is logged, dropped and truncated so new
//! appends start on a clean line.
//!
//! An append that fails part way truncates the file back to its last good
//! length, so a failed write never leaves a torn line ahead of later entries.
//!
//! ## Durability
//!
//! - `Strict` - fsync after every append
//! - `Buffered` - written to the OS on every append, fsync on close

use super::LogState;
use crate::adapter::{CommittedTx, TxAdapter};
use doctx_concurrency::Sequence;
use doctx_core::{Class, DocError, FindOptions, FindResult, Hierarchy, Query, Ref, Result, Tx};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// When appended entries reach the disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Durability {
    /// fsync after every append
    Strict,
    /// flush after every append, fsync on close
    #[default]
    Buffered,
}

/// Write side of the log file
trait LogFile: Write {
    fn truncate(&mut self, len: u64) -> io::Result<()>;

    fn sync(&mut self) -> io::Result<()>;
}

impl LogFile for File {
    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }

    fn sync(&mut self) -> io::Result<()> {
        self.sync_all()
    }
}

/// Log file plus the length of its last complete line
struct LogWriter<F> {
    file: F,
    len: u64,
}

impl<F: LogFile> LogWriter<F> {
    /// Write one complete line; on failure the file is cut back to `len`
    fn append_line(&mut self, line: &[u8], strict: bool) -> io::Result<()> {
        let written = self.file.write_all(line).and_then(|_| self.file.flush()).and_then(|_| {
            if strict {
                self.file.sync()
            } else {
                Ok(())
            }
        });
        match written {
            Ok(()) => {
                self.len += line.len() as u64;
                Ok(())
            }
            Err(err) => {
                if let Err(cut) = self.file.truncate(self.len) {
                    warn!(
                        target: "doctx::storage",
                        len = self.len,
                        error = %cut,
                        "failed to truncate log after failed append"
                    );
                }
                Err(err)
            }
        }
    }
}

/// Transaction log persisted as checksummed JSON lines
pub struct FileTxLog {
    path: PathBuf,
    durability: Durability,
    writer: Mutex<LogWriter<File>>,
    state: RwLock<LogState>,
    sequence: Sequence,
}

impl std::fmt::Debug for FileTxLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileTxLog")
            .field("path", &self.path)
            .field("durability", &self.durability)
            .field("last_sequence", &self.sequence.current())
            .finish()
    }
}

fn encode_line(sequence: u64, tx: &Tx) -> Result<String> {
    let body = format!("{} {}", sequence, serde_json::to_string(tx)?);
    let crc = crc32fast::hash(body.as_bytes());
    Ok(format!("{:08x} {}\n", crc, body))
}

fn decode_line(line: &str) -> Option<CommittedTx> {
    let (crc, body) = line.split_once(' ')?;
    let crc = u32::from_str_radix(crc, 16).ok()?;
    if crc32fast::hash(body.as_bytes()) != crc {
        return None;
    }
    let (sequence, json) = body.split_once(' ')?;
    let sequence = sequence.parse().ok()?;
    let tx = Tx::from_json(json).ok()?;
    Some(CommittedTx { sequence, tx })
}

impl FileTxLog {
    /// Open an existing log or create an empty one
    ///
    /// Creates parent directories if they don't exist.
    pub fn open<P: AsRef<Path>>(path: P, durability: Durability) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;

        let mut state = LogState::default();
        let mut good_len: u64 = 0;
        let mut last: u64 = 0;
        {
            let mut reader = BufReader::new(&file);
            let mut line: Vec<u8> = Vec::new();
            loop {
                line.clear();
                let read = reader.read_until(b'\n', &mut line)?;
                if read == 0 {
                    break;
                }
                let decoded = line
                    .strip_suffix(b"\n")
                    .and_then(|bytes| std::str::from_utf8(bytes).ok())
                    .and_then(decode_line);
                let entry = match decoded {
                    Some(entry) if entry.sequence > last => entry,
                    _ => {
                        warn!(
                            target: "doctx::storage",
                            path = %path.display(),
                            offset = good_len,
                            "corrupt or incomplete log tail ignored"
                        );
                        break;
                    }
                };
                last = entry.sequence;
                state.push(entry)?;
                good_len += read as u64;
            }
        }

        if file.metadata()?.len() > good_len {
            file.set_len(good_len)?;
        }

        info!(
            target: "doctx::storage",
            path = %path.display(),
            entries = state.len(),
            last_sequence = last,
            "transaction log opened"
        );

        Ok(FileTxLog {
            path,
            durability,
            writer: Mutex::new(LogWriter { file, len: good_len }),
            state: RwLock::new(state),
            sequence: Sequence::starting_after(last),
        })
    }

    /// Log file location
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Configured durability
    pub fn durability(&self) -> Durability {
        self.durability
    }

    /// Flush and fsync
    pub fn sync(&self) -> Result<()> {
        let mut writer = self.writer.lock();
        writer.file.flush()?;
        writer.file.sync()?;
        Ok(())
    }
}

impl TxAdapter for FileTxLog {
    fn append(&self, tx: &Tx) -> Result<u64> {
        let mut state = self.state.write();
        let sequence = self.sequence.current() + 1;
        let line = encode_line(sequence, tx)?;
        self.writer
            .lock()
            .append_line(line.as_bytes(), self.durability == Durability::Strict)
            .map_err(|e| DocError::storage(format!("failed to append entry {}: {}", sequence, e)))?;
        self.sequence.allocate();
        state.push(CommittedTx {
            sequence,
            tx: tx.clone(),
        })?;
        debug!(target: "doctx::storage", sequence, tx = %tx.id(), "appended");
        Ok(sequence)
    }

    fn load(&self, after: u64) -> Result<Vec<CommittedTx>> {
        Ok(self.state.read().after(after))
    }

    fn get_model(&self) -> Result<Vec<CommittedTx>> {
        Ok(self.state.read().model())
    }

    fn find_all(
        &self,
        hierarchy: &Hierarchy,
        class: &Ref<Class>,
        query: &Query,
        options: &FindOptions,
    ) -> Result<FindResult> {
        self.state.read().find_all(hierarchy, class, query, options)
    }

    fn last_sequence(&self) -> u64 {
        self.sequence.current()
    }

    fn close(&self) -> Result<()> {
        self.sync()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use doctx_core::{Attributes, TxFactory};

    fn sample(id: &str) -> Tx {
        TxFactory::new(Ref::new("alice")).create_tx_create_doc(
            Ref::new("test:class:Task"),
            Ref::new("sp"),
            Attributes::new(),
            Some(Ref::new(id)),
        )
    }

    #[test]
    fn test_line_checksum_detects_flip() {
        let line = encode_line(7, &sample("t1")).unwrap();
        let line = line.trim_end_matches('\n');
        let entry = decode_line(line).unwrap();
        assert_eq!(entry.sequence, 7);

        let tampered = line.replacen("t1", "t2", 1);
        assert!(decode_line(&tampered).is_none());
    }

    /// In-memory file that accepts `budget` more bytes, then fails
    struct ShortFile {
        data: Vec<u8>,
        budget: usize,
        fail_sync: bool,
    }

    impl Write for ShortFile {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.budget == 0 {
                return Err(io::Error::new(io::ErrorKind::Other, "disk full"));
            }
            let n = buf.len().min(self.budget);
            self.data.extend_from_slice(&buf[..n]);
            self.budget -= n;
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl LogFile for ShortFile {
        fn truncate(&mut self, len: u64) -> io::Result<()> {
            self.data.truncate(len as usize);
            Ok(())
        }

        fn sync(&mut self) -> io::Result<()> {
            if self.fail_sync {
                Err(io::Error::new(io::ErrorKind::Other, "fsync failed"))
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn test_failed_append_leaves_no_torn_line() {
        let first = encode_line(1, &sample("t1")).unwrap();
        let second = encode_line(2, &sample("t2")).unwrap();
        let mut writer = LogWriter {
            file: ShortFile {
                data: Vec::new(),
                budget: first.len() + 10,
                fail_sync: false,
            },
            len: 0,
        };

        writer.append_line(first.as_bytes(), false).unwrap();
        assert!(writer.append_line(second.as_bytes(), false).is_err());
        assert_eq!(writer.file.data, first.as_bytes());
        assert_eq!(writer.len, first.len() as u64);

        writer.file.budget = usize::MAX;
        writer.append_line(second.as_bytes(), false).unwrap();
        assert_eq!(writer.file.data, [first.as_bytes(), second.as_bytes()].concat());
    }

    #[test]
    fn test_failed_sync_removes_the_written_line() {
        let line = encode_line(1, &sample("t1")).unwrap();
        let mut writer = LogWriter {
            file: ShortFile {
                data: Vec::new(),
                budget: usize::MAX,
                fail_sync: true,
            },
            len: 0,
        };
        assert!(writer.append_line(line.as_bytes(), true).is_err());
        assert!(writer.file.data.is_empty());
        assert_eq!(writer.len, 0);
    }
}
