//! Persistent per-target outcome records.
//!
//! The [`ResultStore`] is a JSON object mapping target keys to
//! [`OutcomeRecord`]s. It is loaded once at startup, updated in memory after
//! every target, and written back whole through a temp file and rename so a
//! crash never leaves a half-written store behind.
//!
//! A missing file is an empty store. A file that exists but does not parse,
//! or holds a record that breaks the success/filename invariant, is
//! [`StoreError::Corrupt`] and must stop the run.
//!
//! Records hold no timestamps, so processing a target again with the same
//! outcome writes the same bytes.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument};

/// Outcome of the most recent run over a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// Resolution could not run (broken target or renderer).
    NotAttempted,
    /// The page was checked and no document link was found.
    NoLinkFound,
    /// Links were found but no download succeeded.
    DownloadFailed,
    /// At least one document was written to disk.
    Success,
}

impl OutcomeStatus {
    /// Every status, in display order.
    pub const ALL: [Self; 4] = [
        Self::Success,
        Self::DownloadFailed,
        Self::NoLinkFound,
        Self::NotAttempted,
    ];

    /// The serialized name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotAttempted => "not_attempted",
            Self::NoLinkFound => "no_link_found",
            Self::DownloadFailed => "download_failed",
            Self::Success => "success",
        }
    }
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stored outcome for one target.
///
/// `status == Success` exactly when `downloaded_filename` is set. The
/// constructors keep that true; [`ResultStore::load`] rejects files where it
/// is not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeRecord {
    /// The target page URL.
    pub source_url: String,
    /// Outcome of the last run.
    pub status: OutcomeStatus,
    /// First resolved candidate URL.
    #[serde(default)]
    pub download_url: Option<String>,
    /// Basename of the first file written.
    #[serde(default)]
    pub downloaded_filename: Option<String>,
    /// Every resolved candidate URL.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub candidate_urls: Vec<String>,
    /// Basenames of every file written.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub downloaded_filenames: Vec<String>,
    /// Last failure reason, for operators.
    #[serde(default)]
    pub last_error: Option<String>,
    /// Runs that processed this key while a give-up policy was active.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub runs: u32,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_zero(value: &u32) -> bool {
    *value == 0
}

impl OutcomeRecord {
    fn base(source_url: impl Into<String>, status: OutcomeStatus) -> Self {
        Self {
            source_url: source_url.into(),
            status,
            download_url: None,
            downloaded_filename: None,
            candidate_urls: Vec::new(),
            downloaded_filenames: Vec::new(),
            last_error: None,
            runs: 0,
        }
    }

    /// Resolution or fetching could not run to completion, for `reason`.
    #[must_use]
    pub fn not_attempted(source_url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            last_error: Some(reason.into()),
            ..Self::base(source_url, OutcomeStatus::NotAttempted)
        }
    }

    /// The page had no document link.
    #[must_use]
    pub fn no_link_found(source_url: impl Into<String>) -> Self {
        Self::base(source_url, OutcomeStatus::NoLinkFound)
    }

    /// Builds the record after fetching every candidate.
    ///
    /// Any written file makes it a success; otherwise it is a download
    /// failure carrying `last_error`.
    #[must_use]
    pub fn from_fetches(
        source_url: impl Into<String>,
        candidate_urls: Vec<String>,
        downloaded_filenames: Vec<String>,
        last_error: Option<String>,
    ) -> Self {
        let status = if downloaded_filenames.is_empty() {
            OutcomeStatus::DownloadFailed
        } else {
            OutcomeStatus::Success
        };
        Self {
            download_url: candidate_urls.first().cloned(),
            downloaded_filename: downloaded_filenames.first().cloned(),
            candidate_urls,
            downloaded_filenames,
            last_error: if status == OutcomeStatus::Success {
                None
            } else {
                last_error
            },
            ..Self::base(source_url, status)
        }
    }

    /// True when the record satisfies the success/filename invariant.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        (self.status == OutcomeStatus::Success) == self.downloaded_filename.is_some()
    }
}

/// Which stored outcomes count as done.
///
/// Run counting only happens while `give_up_after_runs` is set; under the
/// default policy a re-run with unchanged outcomes leaves the file
/// byte-identical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResumePolicy {
    /// Treat `no_link_found` as done once a key has been processed this many runs.
    /// `None` retries it forever.
    pub give_up_after_runs: Option<u32>,
}

impl ResumePolicy {
    /// True if `record` should be skipped on this run.
    #[must_use]
    pub fn is_terminal(&self, record: &OutcomeRecord) -> bool {
        match record.status {
            OutcomeStatus::Success => true,
            OutcomeStatus::NoLinkFound => self
                .give_up_after_runs
                .is_some_and(|limit| record.runs >= limit),
            OutcomeStatus::NotAttempted | OutcomeStatus::DownloadFailed => false,
        }
    }
}

/// Errors from loading or saving the result store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// File system error reading or writing the store.
    #[error("result store IO error at {path}: {source}")]
    Io {
        /// The store or temp file path.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The store exists but cannot be trusted.
    #[error(
        "result store {path} is corrupt: {reason}\n  Suggestion: fix or move the file aside; it still holds earlier progress"
    )]
    Corrupt {
        /// The store path.
        path: PathBuf,
        /// What was wrong.
        reason: String,
    },

    /// The in-memory records could not be serialized.
    #[error("cannot serialize result store {path}: {source}")]
    Serialize {
        /// The store path.
        path: PathBuf,
        /// The underlying serde error.
        #[source]
        source: serde_json::Error,
    },
}

/// Per-status record counts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreSummary {
    /// Count per status; missing statuses are zero.
    pub counts: BTreeMap<OutcomeStatus, usize>,
}

impl StoreSummary {
    /// Count for `status`.
    #[must_use]
    pub fn count(&self, status: OutcomeStatus) -> usize {
        self.counts.get(&status).copied().unwrap_or(0)
    }

    /// Total records.
    #[must_use]
    pub fn total(&self) -> usize {
        self.counts.values().sum()
    }
}

impl fmt::Display for StoreSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = OutcomeStatus::ALL
            .iter()
            .map(|s| format!("{}={}", s, self.count(*s)))
            .collect();
        write!(f, "{} ({} total)", parts.join(" "), self.total())
    }
}

/// JSON-file-backed map of target key to outcome record.
#[derive(Debug)]
pub struct ResultStore {
    path: PathBuf,
    policy: ResumePolicy,
    records: BTreeMap<String, OutcomeRecord>,
}

impl ResultStore {
    /// Loads the store at `path`, or starts empty if the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Corrupt`] if the file is not a JSON object of
    /// valid records, and [`StoreError::Io`] if it cannot be read.
    #[instrument(skip(path, policy), fields(path = %path.display()))]
    pub fn load(path: &Path, policy: ResumePolicy) -> Result<Self, StoreError> {
        let records = match std::fs::read_to_string(path) {
            Ok(raw) => parse_records(path, &raw)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("no result store yet; starting empty");
                BTreeMap::new()
            }
            Err(source) => {
                return Err(StoreError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        info!(records = records.len(), "result store loaded");
        Ok(Self {
            path: path.to_path_buf(),
            policy,
            records,
        })
    }

    /// Writes every record to disk, replacing the previous file atomically.
    ///
    /// The JSON is built in memory; the temp file write, sync and rename go
    /// through `tokio::fs` so the runtime is not blocked.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when serialization or any file operation fails.
    pub async fn save(&self) -> Result<(), StoreError> {
        let bytes = self.to_json()?;

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| StoreError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        let temp_path = temp_path_for(&self.path);
        let io_err = |source| StoreError::Io {
            path: temp_path.clone(),
            source,
        };

        let mut file = tokio::fs::File::create(&temp_path).await.map_err(io_err)?;
        file.write_all(&bytes).await.map_err(io_err)?;
        file.sync_all().await.map_err(io_err)?;
        drop(file);

        tokio::fs::rename(&temp_path, &self.path)
            .await
            .map_err(|source| StoreError::Io {
                path: self.path.clone(),
                source,
            })?;
        debug!(path = %self.path.display(), records = self.records.len(), "result store saved");
        Ok(())
    }

    /// The file contents: 4-space indented JSON with non-ASCII kept literal.
    fn to_json(&self) -> Result<Vec<u8>, StoreError> {
        let mut buffer = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut buffer, formatter);
        self.records
            .serialize(&mut serializer)
            .map_err(|source| StoreError::Serialize {
                path: self.path.clone(),
                source,
            })?;
        buffer.push(b'\n');
        Ok(buffer)
    }

    /// Upserts the outcome for `key`.
    ///
    /// The run count is carried forward, and only advanced while the resume
    /// policy has a give-up limit.
    pub fn record(&mut self, key: &str, mut record: OutcomeRecord) -> &OutcomeRecord {
        let previous_runs = self.records.get(key).map_or(0, |r| r.runs);
        record.runs = if self.policy.give_up_after_runs.is_some() {
            previous_runs.saturating_add(1)
        } else {
            previous_runs
        };
        self.records.insert(key.to_string(), record);
        &self.records[key]
    }

    /// True if `key` has an outcome the resume policy treats as done.
    #[must_use]
    pub fn contains_terminal(&self, key: &str) -> bool {
        self.records
            .get(key)
            .is_some_and(|record| self.policy.is_terminal(record))
    }

    /// Returns the record for `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&OutcomeRecord> {
        self.records.get(key)
    }

    /// Number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True if the store holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Iterates records in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &OutcomeRecord)> {
        self.records.iter()
    }

    /// Per-status counts over every stored record.
    #[must_use]
    pub fn summary(&self) -> StoreSummary {
        let mut summary = StoreSummary::default();
        for record in self.records.values() {
            *summary.counts.entry(record.status).or_insert(0) += 1;
        }
        summary
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The resume policy in effect.
    #[must_use]
    pub fn policy(&self) -> ResumePolicy {
        self.policy
    }
}

fn parse_records(path: &Path, raw: &str) -> Result<BTreeMap<String, OutcomeRecord>, StoreError> {
    if raw.trim().is_empty() {
        return Err(StoreError::Corrupt {
            path: path.to_path_buf(),
            reason: "file is empty".to_string(),
        });
    }
    let records: BTreeMap<String, OutcomeRecord> =
        serde_json::from_str(raw).map_err(|e| StoreError::Corrupt {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
    if let Some((key, record)) = records.iter().find(|(_, r)| !r.is_consistent()) {
        return Err(StoreError::Corrupt {
            path: path.to_path_buf(),
            reason: format!(
                "record '{key}' has status {} but downloaded_filename is {}",
                record.status,
                if record.downloaded_filename.is_some() { "set" } else { "missing" }
            ),
        });
    }
    Ok(records)
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(std::ffi::OsStr::to_os_string)
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
