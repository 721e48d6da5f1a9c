//! Audit and usage-metrics sinks
//!
//! Call outcomes are recorded as flat key-value records. The storage
//! format stays behind the [`AuditSink`] trait so the line-delimited
//! JSON file can be swapped for another store without touching the
//! resilience or service layers.

use std::fs::{File, OpenOptions};
use std::io::Write as IoWrite;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::InfraError;

/// Outcome classification for an audited call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Failure,
    RateLimited,
    Rejected,
}

/// One audited call, serialized as a single JSON line
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    pub correlation_id: String,
    pub client_id: String,
    pub operation: String,
    pub outcome: AuditOutcome,
    /// Free-form detail: error text, token counts, endpoint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl AuditRecord {
    pub fn new(
        correlation_id: impl Into<String>,
        client_id: impl Into<String>,
        operation: impl Into<String>,
        outcome: AuditOutcome,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            correlation_id: correlation_id.into(),
            client_id: client_id.into(),
            operation: operation.into(),
            outcome,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Capability to record audit events
///
/// Implementations must be append-only; a sink never rewrites history.
pub trait AuditSink: Send + Sync {
    fn append(&self, record: &AuditRecord) -> Result<(), InfraError>;
}

/// Append-only, line-delimited JSON file sink
pub struct JsonlAuditSink {
    file: Mutex<File>,
    path: PathBuf,
}

impl JsonlAuditSink {
    /// Open (or create) the audit log at the given path
    pub fn open(path: impl AsRef<Path>) -> Result<Self, InfraError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self { file: Mutex::new(file), path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AuditSink for JsonlAuditSink {
    fn append(&self, record: &AuditRecord) -> Result<(), InfraError> {
        let line = serde_json::to_string(record)?;
        let mut file = self.file.lock().map_err(|_| {
            InfraError::Io(std::io::Error::other("audit sink lock poisoned"))
        })?;
        writeln!(file, "{line}")?;
        Ok(())
    }
}

/// In-memory sink for tests
#[derive(Default)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl AuditSink for MemoryAuditSink {
    fn append(&self, record: &AuditRecord) -> Result<(), InfraError> {
        if let Ok(mut records) = self.records.lock() {
            records.push(record.clone());
        }
        Ok(())
    }
}

/// Running usage totals for cost monitoring
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageStats {
    pub total_requests: u64,
    pub total_tokens: u64,
    pub total_cost: f64,
    pub last_updated: Option<DateTime<Utc>>,
}

/// Write the usage snapshot to a JSON metrics file, replacing the
/// previous snapshot
pub fn write_usage_snapshot(path: impl AsRef<Path>, stats: &UsageStats) -> Result<(), InfraError> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let mut snapshot = stats.clone();
    snapshot.last_updated = Some(Utc::now());
    let body = serde_json::to_string_pretty(&snapshot)?;
    std::fs::write(path, body)?;
    Ok(())
}
