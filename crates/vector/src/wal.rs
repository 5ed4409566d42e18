//! Append-only record log and collection metadata on disk
//!
//! `<dir>/records.log` holds one JSON `LogEntry` per line. Replaying the log in
//! order rebuilds the record map. `<dir>/meta.json` holds `CollectionMeta` and
//! is replaced atomically (write temp file, fsync, rename).

use parking_lot::Mutex;
use semsearch_common::{Result, SemsearchError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::types::{CollectionMeta, Record};

const LOG_FILE: &str = "records.log";
const META_FILE: &str = "meta.json";

/// One durable mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum LogEntry {
    Upsert { record: Record },
    Delete { id: String },
    Clear,
}

/// Result of replaying a log
#[derive(Debug, Default)]
pub struct Replay {
    /// Live records, sorted by id
    pub records: Vec<Record>,

    /// Entries applied
    pub entries: usize,

    /// Whether a torn trailing line was cut off
    pub truncated_tail: bool,
}

pub struct RecordLog {
    dir: PathBuf,
    writer: Mutex<BufWriter<File>>,
    #[cfg(test)]
    appends_left: std::sync::atomic::AtomicUsize,
}

impl RecordLog {
    /// Open (creating if needed) the log in `dir` and replay it
    pub fn open(dir: &Path) -> Result<(Self, Replay)> {
        fs::create_dir_all(dir).map_err(|e| {
            SemsearchError::storage(format!(
                "Failed to create collection directory {}: {}",
                dir.display(),
                e
            ))
        })?;

        let path = dir.join(LOG_FILE);
        let replay = if path.exists() {
            replay_file(&path)?
        } else {
            Replay::default()
        };

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        info!(
            "Record log opened: {} ({} entries, {} live records)",
            path.display(),
            replay.entries,
            replay.records.len()
        );

        Ok((
            Self {
                dir: dir.to_path_buf(),
                writer: Mutex::new(BufWriter::new(file)),
                #[cfg(test)]
                appends_left: std::sync::atomic::AtomicUsize::new(usize::MAX),
            },
            replay,
        ))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Append one entry and hand it to the OS
    pub fn append(&self, entry: &LogEntry) -> Result<()> {
        #[cfg(test)]
        {
            use std::sync::atomic::Ordering;
            if self
                .appends_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_err()
            {
                return Err(SemsearchError::storage("log is not accepting appends"));
            }
        }

        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');

        let mut writer = self.writer.lock();
        writer.write_all(&line)?;
        writer.flush()?;
        Ok(())
    }

    /// Flush buffered bytes and fsync
    pub fn sync(&self) -> Result<()> {
        let mut writer = self.writer.lock();
        writer.flush()?;
        writer.get_ref().sync_data()?;
        Ok(())
    }

    /// Replace the log with one upsert per live record
    ///
    /// Callers must hold off concurrent appends for the duration.
    pub fn compact(&self, records: &[Record]) -> Result<()> {
        let path = self.dir.join(LOG_FILE);
        let tmp = self.dir.join(format!("{}.tmp", LOG_FILE));

        let mut writer = self.writer.lock();
        writer.flush()?;

        {
            let mut out = BufWriter::new(File::create(&tmp)?);
            for record in records {
                serde_json::to_writer(
                    &mut out,
                    &LogEntry::Upsert {
                        record: record.clone(),
                    },
                )?;
                out.write_all(b"\n")?;
            }
            out.flush()?;
            out.get_ref().sync_all()?;
        }
        fs::rename(&tmp, &path)?;

        let file = OpenOptions::new().append(true).open(&path)?;
        *writer = BufWriter::new(file);

        info!("Record log compacted: {} live records", records.len());
        Ok(())
    }

    /// Let `n` more appends through, then fail every following one
    #[cfg(test)]
    pub(crate) fn fail_appends_after(&self, n: usize) {
        self.appends_left
            .store(n, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn read_meta(&self) -> Result<Option<CollectionMeta>> {
        let path = self.dir.join(META_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let data = fs::read_to_string(&path)?;
        let meta = serde_json::from_str(&data).map_err(|e| {
            SemsearchError::storage(format!("Corrupt metadata {}: {}", path.display(), e))
        })?;
        Ok(Some(meta))
    }

    pub fn write_meta(&self, meta: &CollectionMeta) -> Result<()> {
        let path = self.dir.join(META_FILE);
        let tmp = self.dir.join(format!("{}.tmp", META_FILE));
        {
            let mut out = BufWriter::new(File::create(&tmp)?);
            serde_json::to_writer_pretty(&mut out, meta)?;
            out.flush()?;
            out.get_ref().sync_all()?;
        }
        fs::rename(&tmp, &path)?;
        debug!("Collection metadata written: {}", path.display());
        Ok(())
    }
}

fn replay_file(path: &Path) -> Result<Replay> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);

    let mut records: HashMap<String, Record> = HashMap::new();
    let mut entries = 0;
    let mut offset: u64 = 0;
    let mut line_no = 0;
    let mut pending_error: Option<(usize, u64, String)> = None;
    let mut buf = String::new();

    loop {
        buf.clear();
        let read = reader.read_line(&mut buf)?;
        if read == 0 {
            break;
        }
        line_no += 1;
        let line_start = offset;
        offset += read as u64;

        if let Some((bad_line, _, err)) = pending_error.take() {
            // A bad line followed by more data is corruption, not a torn append
            return Err(SemsearchError::storage(format!(
                "Corrupt record log {} at line {}: {}",
                path.display(),
                bad_line,
                err
            )));
        }

        let trimmed = buf.trim();
        if trimmed.is_empty() {
            continue;
        }

        match serde_json::from_str::<LogEntry>(trimmed) {
            Ok(entry) => {
                entries += 1;
                match entry {
                    LogEntry::Upsert { record } => {
                        records.insert(record.id.clone(), record);
                    }
                    LogEntry::Delete { id } => {
                        records.remove(&id);
                    }
                    LogEntry::Clear => records.clear(),
                }
            }
            Err(e) => pending_error = Some((line_no, line_start, e.to_string())),
        }
    }

    let mut truncated_tail = false;
    if let Some((bad_line, cut_at, err)) = pending_error {
        warn!(
            "Dropping torn tail of record log {} at line {}: {}",
            path.display(),
            bad_line,
            err
        );
        OpenOptions::new().write(true).open(path)?.set_len(cut_at)?;
        truncated_tail = true;
    }

    let mut records: Vec<Record> = records.into_values().collect();
    records.sort_by(|a, b| a.id.cmp(&b.id));

    Ok(Replay {
        records,
        entries,
        truncated_tail,
    })
}
