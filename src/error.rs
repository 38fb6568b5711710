//! Error handling for the pattern agent
//!
//! This module provides:
//! - The crate-wide `PatternError` taxonomy
//! - Stable error codes with categories and retry hints
//! - Error telemetry counters shared by the apply path

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;

pub type Result<T, E = PatternError> = std::result::Result<T, E>;

// =============================================================================
// ERROR TYPE
// =============================================================================

#[derive(Debug, Error)]
pub enum PatternError {
    /// Malformed A1 label or out-of-range row/column index.
    #[error("invalid reference: {0}")]
    InvalidReference(String),

    /// User-facing input problem caught at the edit boundary.
    #[error("invalid {field}: {message}")]
    Validation {
        field: &'static str,
        message: String,
    },

    /// The spreadsheet backend rejected one step during apply.
    #[error("step {seq} failed: {message}")]
    StepExecution { seq: usize, message: String },

    /// Job infrastructure fault on the remote apply path.
    #[error("apply job error: {0}")]
    Job(String),

    #[error("an apply run is already in progress")]
    ApplyInProgress,

    #[error("no failed apply run to retry")]
    NothingToRetry,

    #[error("pattern store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("pattern store serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PatternError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: message.into(),
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            PatternError::InvalidReference(_) => ErrorCode::InvalidReference,
            PatternError::Validation { .. } => ErrorCode::ValidationError,
            PatternError::StepExecution { .. } => ErrorCode::StepExecutionError,
            PatternError::Job(_) => ErrorCode::JobError,
            PatternError::ApplyInProgress => ErrorCode::ApplyInProgress,
            PatternError::NothingToRetry => ErrorCode::NothingToRetry,
            PatternError::Io(_) => ErrorCode::IoError,
            PatternError::Serialization(_) => ErrorCode::SerializationError,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.code().is_retryable()
    }

    /// Add this error to telemetry
    pub fn track(&self, operation: Option<&str>) {
        ERROR_METRICS.record_error(&self.code(), operation);
    }
}

// =============================================================================
// ERROR CODES
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum ErrorCode {
    InvalidReference = -32001,
    ValidationError = -32002,
    StepExecutionError = -32003,
    JobError = -32004,
    ApplyInProgress = -32005,
    NothingToRetry = -32006,
    IoError = -32007,
    SerializationError = -32008,
}

impl ErrorCode {
    /// Get the integer code
    pub fn code(&self) -> i32 {
        *self as i32
    }

    /// Only execution-time failures can be retried; input errors never are.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorCode::StepExecutionError | ErrorCode::JobError)
    }

    /// Get the error category for metrics
    pub fn category(&self) -> &'static str {
        match self {
            ErrorCode::InvalidReference | ErrorCode::ValidationError => "input_error",
            ErrorCode::StepExecutionError => "step_error",
            ErrorCode::JobError => "job_error",
            ErrorCode::ApplyInProgress | ErrorCode::NothingToRetry => "state_error",
            ErrorCode::IoError | ErrorCode::SerializationError => "storage_error",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self, self.code())
    }
}

// =============================================================================
// ERROR TELEMETRY
// =============================================================================

/// Error counters keyed by code, operation and category
#[derive(Debug)]
pub struct ErrorMetrics {
    error_counts: RwLock<HashMap<ErrorCode, AtomicU64>>,
    operation_errors: RwLock<HashMap<String, AtomicU64>>,
    category_counts: RwLock<HashMap<&'static str, AtomicU64>>,
}

impl ErrorMetrics {
    pub fn new() -> Self {
        Self {
            error_counts: RwLock::new(HashMap::new()),
            operation_errors: RwLock::new(HashMap::new()),
            category_counts: RwLock::new(HashMap::new()),
        }
    }

    /// Record an error occurrence
    pub fn record_error(&self, code: &ErrorCode, operation: Option<&str>) {
        bump(&self.error_counts, *code);
        if let Some(operation) = operation {
            bump(&self.operation_errors, operation.to_string());
        }
        let category = code.category();
        bump(&self.category_counts, category);

        tracing::debug!(
            error_code = %code,
            operation = operation,
            category = category,
            "error recorded"
        );
    }

    pub fn get_error_count(&self, code: &ErrorCode) -> u64 {
        read(&self.error_counts, code)
    }

    pub fn get_operation_error_count(&self, operation: &str) -> u64 {
        self.operation_errors
            .read()
            .get(operation)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn get_category_count(&self, category: &str) -> u64 {
        self.category_counts
            .read()
            .get(category)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn get_stats(&self) -> ErrorStats {
        ErrorStats {
            error_counts: snapshot(&self.error_counts),
            operation_errors: snapshot(&self.operation_errors),
            category_counts: snapshot(&self.category_counts)
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        }
    }

    pub fn reset(&self) {
        self.error_counts.write().clear();
        self.operation_errors.write().clear();
        self.category_counts.write().clear();
    }
}

impl Default for ErrorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

fn bump<K>(map: &RwLock<HashMap<K, AtomicU64>>, key: K)
where
    K: Eq + std::hash::Hash,
{
    {
        let guard = map.read();
        if let Some(counter) = guard.get(&key) {
            counter.fetch_add(1, Ordering::Relaxed);
            return;
        }
    }
    map.write()
        .entry(key)
        .or_insert_with(|| AtomicU64::new(0))
        .fetch_add(1, Ordering::Relaxed);
}

fn read<K>(map: &RwLock<HashMap<K, AtomicU64>>, key: &K) -> u64
where
    K: Eq + std::hash::Hash,
{
    map.read()
        .get(key)
        .map(|c| c.load(Ordering::Relaxed))
        .unwrap_or(0)
}

fn snapshot<K>(map: &RwLock<HashMap<K, AtomicU64>>) -> HashMap<K, u64>
where
    K: Eq + std::hash::Hash + Clone,
{
    map.read()
        .iter()
        .map(|(k, v)| (k.clone(), v.load(Ordering::Relaxed)))
        .collect()
}

/// Error statistics snapshot
#[derive(Debug, Clone, Serialize)]
pub struct ErrorStats {
    pub error_counts: HashMap<ErrorCode, u64>,
    pub operation_errors: HashMap<String, u64>,
    pub category_counts: HashMap<String, u64>,
}

/// Global error metrics instance
pub static ERROR_METRICS: once_cell::sync::Lazy<ErrorMetrics> =
    once_cell::sync::Lazy::new(ErrorMetrics::new);
