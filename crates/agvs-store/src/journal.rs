//! ---
//! agvs_section: "04-fleet-store"
//! agvs_subsection: "module"
//! agvs_type: "source"
//! agvs_scope: "code"
//! agvs_description: "Append-only JSONL journal of fleet events."
//! agvs_version: "v0.1.0-alpha"
//! agvs_owner: "tbd"
//! ---
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::model::TravelStatus;
use crate::{Result, StoreError};

/// Journal format version, bumped on incompatible layout changes.
pub const JOURNAL_VERSION: u16 = 1;

/// Journal file header stored as the first line.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct JournalHeader {
    version: u16,
    created_at: DateTime<Utc>,
}

impl JournalHeader {
    fn new() -> Self {
        Self {
            version: JOURNAL_VERSION,
            created_at: Utc::now(),
        }
    }
}

/// Coordinator-level events worth keeping for post-mortem analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum FleetEvent {
    /// A command was published and registered as pending.
    CommandIssued {
        /// Correlation id of the command.
        command_id: String,
        /// Wire action string.
        action: String,
        /// Target vehicle.
        vehicle_id: i64,
        /// Ordered waypoint ids.
        waypoints: Vec<i64>,
    },
    /// A pending command aged past the timeout and was evicted unanswered.
    CommandExpired {
        /// Correlation id of the command.
        command_id: String,
        /// Wire action string.
        action: String,
        /// Target vehicle.
        vehicle_id: i64,
    },
    /// A travel moved to a new lifecycle state.
    TravelStatusChanged {
        /// Travel row id.
        travel_id: i64,
        /// Owning vehicle.
        vehicle_id: i64,
        /// New status.
        status: TravelStatus,
    },
    /// One state sample was persisted.
    StateRecorded {
        /// Reporting vehicle.
        vehicle_id: i64,
        /// Position, metres.
        x: f64,
        /// Position, metres.
        y: f64,
        /// Whether the vehicle was navigating.
        navigating: bool,
    },
    /// One alarm row was materialized from an alert.
    AlarmRaised {
        /// Alert origin label.
        origin: String,
        /// Alert severity label.
        level: String,
        /// Whether the level resolved to an alarm type.
        resolved_type: bool,
        /// Whether the origin resolved to an origin record.
        resolved_origin: bool,
    },
}

/// One journal line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    /// Sequential identifier assigned when appending.
    pub sequence: u64,
    /// Timestamp when the event was recorded.
    pub timestamp: DateTime<Utc>,
    /// The recorded event.
    pub event: FleetEvent,
}

struct JournalInner {
    writer: BufWriter<File>,
    next_sequence: u64,
}

/// Append-only, share-safe journal writer.
///
/// Appends serialize on an internal lock so any coordinator task can record
/// through a shared handle.
pub struct EventJournal {
    path: PathBuf,
    inner: Mutex<JournalInner>,
}

impl EventJournal {
    /// Open a journal for appending, writing a header if the file is new.
    /// Reopening an existing journal continues its sequence numbering.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let exists = path.exists();
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut writer = BufWriter::new(file);

        let next_sequence = if !exists || is_empty(path)? {
            let line = serde_json::to_string(&JournalHeader::new())?;
            writer.write_all(line.as_bytes())?;
            writer.write_all(b"\n")?;
            writer.flush()?;
            0
        } else {
            last_sequence(path)?
        };

        Ok(Self {
            path: path.to_path_buf(),
            inner: Mutex::new(JournalInner {
                writer,
                next_sequence,
            }),
        })
    }

    /// Append one event, returning its assigned sequence number.
    pub fn record(&self, event: FleetEvent) -> Result<u64> {
        let mut inner = self.inner.lock();
        inner.next_sequence += 1;
        let entry = JournalEntry {
            sequence: inner.next_sequence,
            timestamp: Utc::now(),
            event,
        };
        let line = serde_json::to_string(&entry)?;
        inner.writer.write_all(line.as_bytes())?;
        inner.writer.write_all(b"\n")?;
        inner.writer.flush()?;
        Ok(entry.sequence)
    }

    /// Flush buffered writes to the underlying file handle.
    pub fn flush(&self) -> Result<()> {
        self.inner.lock().writer.flush()?;
        Ok(())
    }

    /// The journal path on disk.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn is_empty(path: &Path) -> Result<bool> {
    Ok(fs::metadata(path)?.len() == 0)
}

fn last_sequence(path: &Path) -> Result<u64> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut last = 0u64;
    for line in reader.lines().skip(1) {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        if let Ok(entry) = serde_json::from_str::<JournalEntry>(&line) {
            last = entry.sequence;
        }
    }
    Ok(last)
}

/// Replay the journal in order, invoking the callback for each entry.
pub fn replay<F>(path: &Path, mut handler: F) -> Result<usize>
where
    F: FnMut(JournalEntry) -> Result<()>,
{
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut count = 0usize;
    for line in reader.lines().skip(1) {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let entry: JournalEntry = serde_json::from_str(&line)?;
        handler(entry)?;
        count += 1;
    }
    Ok(count)
}

/// Streaming iterator over journal entries.
pub struct JournalReader {
    lines: std::io::Lines<BufReader<File>>,
}

impl JournalReader {
    /// Open the journal for sequential reading.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        let mut first_line = String::new();
        reader.read_line(&mut first_line)?; // discard header
        Ok(Self {
            lines: reader.lines(),
        })
    }
}

impl Iterator for JournalReader {
    type Item = Result<JournalEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.lines.next()? {
            Ok(line) if line.trim().is_empty() => self.next(),
            Ok(line) => Some(serde_json::from_str(&line).map_err(StoreError::from)),
            Err(err) => Some(Err(err.into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn record_and_replay_in_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("fleet-events.log");
        let journal = EventJournal::open(&path).unwrap();

        journal
            .record(FleetEvent::CommandIssued {
                command_id: "PLAN_ROUTE_REQUEST-1".to_owned(),
                action: "PLAN_ROUTE_REQUEST".to_owned(),
                vehicle_id: 7,
                waypoints: vec![3, 5],
            })
            .unwrap();
        journal
            .record(FleetEvent::TravelStatusChanged {
                travel_id: 1,
                vehicle_id: 7,
                status: TravelStatus::InProgress,
            })
            .unwrap();

        let mut kinds = Vec::new();
        let count = replay(&path, |entry| {
            kinds.push(entry.event);
            Ok(())
        })
        .unwrap();

        assert_eq!(count, 2);
        assert!(matches!(kinds[0], FleetEvent::CommandIssued { .. }));
        assert!(matches!(
            kinds[1],
            FleetEvent::TravelStatusChanged {
                status: TravelStatus::InProgress,
                ..
            }
        ));
    }

    #[test]
    fn reopening_continues_the_sequence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("fleet-events.log");

        {
            let journal = EventJournal::open(&path).unwrap();
            let seq = journal
                .record(FleetEvent::StateRecorded {
                    vehicle_id: 2,
                    x: 0.0,
                    y: 0.0,
                    navigating: true,
                })
                .unwrap();
            assert_eq!(seq, 1);
        }

        let journal = EventJournal::open(&path).unwrap();
        let seq = journal
            .record(FleetEvent::StateRecorded {
                vehicle_id: 2,
                x: 1.0,
                y: 0.0,
                navigating: false,
            })
            .unwrap();
        assert_eq!(seq, 2);

        let reader = JournalReader::open(&path).unwrap();
        let sequences: Vec<_> = reader.map(|entry| entry.unwrap().sequence).collect();
        assert_eq!(sequences, vec![1, 2]);
    }
}
