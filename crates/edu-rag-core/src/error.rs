//! Error taxonomy shared by every layer of edu-rag.
//!
//! [`Error`] is what public operations return. [`BackendError`] is what the
//! external collaborators (object store, indexing backend) report; the
//! importer and router translate it into [`Error`] once retries are spent.
//!
//! | Kind | Raised by | Retried |
//! |------|-----------|---------|
//! | `InvalidCoordinate` | codec, importer | never |
//! | `UnparseableLocation` / `UnparseableCorpusId` | codec | never |
//! | `InvalidFilter` / `InvalidMetadata` | catalog, importer | never |
//! | `UnknownCorpus` / `EmptyScope` | catalog, router | never |
//! | `UnknownFile` | importer | never |
//! | `BackendUnavailable` | importer, router | transient causes only |
//! | `IngestionRejected` | importer | never |
//! | `AllTargetsFailed` / `Cancelled` | router | never |

use std::fmt;

use serde::Serialize;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Which part of a coordinate (or derived name) failed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinateField {
    Board,
    Grade,
    Subject,
    Filename,
    Location,
}

impl fmt::Display for CoordinateField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CoordinateField::Board => "board",
            CoordinateField::Grade => "grade",
            CoordinateField::Subject => "subject",
            CoordinateField::Filename => "filename",
            CoordinateField::Location => "location",
        };
        f.write_str(name)
    }
}

/// One corpus that could not be searched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetFailure {
    pub corpus_id: String,
    pub reason: String,
}

impl fmt::Display for TargetFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.corpus_id, self.reason)
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid {field} '{value}': {reason}{}", suggestion_hint(.suggestion))]
    InvalidCoordinate {
        field: CoordinateField,
        value: String,
        reason: String,
        suggestion: Option<String>,
    },

    #[error("unparseable location '{location}': {reason}")]
    UnparseableLocation { location: String, reason: String },

    #[error("unparseable corpus id '{corpus_id}': {reason}")]
    UnparseableCorpusId { corpus_id: String, reason: String },

    #[error("invalid filter '{filter}': {reason}")]
    InvalidFilter { filter: String, reason: String },

    #[error("invalid metadata field '{field}': {reason}")]
    InvalidMetadata { field: String, reason: String },

    #[error("unknown corpus '{corpus_id}'")]
    UnknownCorpus { corpus_id: String },

    #[error("no corpora match scope {scope}")]
    EmptyScope { scope: String },

    #[error("corpus '{corpus_id}' has no imported file '{location}'")]
    UnknownFile { corpus_id: String, location: String },

    #[error("backend unavailable during {operation} on '{target}': {source}")]
    BackendUnavailable {
        operation: &'static str,
        target: String,
        source: BackendError,
    },

    #[error("ingestion of '{location}' rejected: {reason}")]
    IngestionRejected { location: String, reason: String },

    #[error("all {} target corpora failed ({})", .failures.len(), join_failures(.failures))]
    AllTargetsFailed { failures: Vec<TargetFailure> },

    #[error("search cancelled")]
    Cancelled,
}

fn suggestion_hint(suggestion: &Option<String>) -> String {
    match suggestion {
        Some(s) => format!(" (did you mean '{s}'?)"),
        None => String::new(),
    }
}

fn join_failures(failures: &[TargetFailure]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Machine-readable discriminant of [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidCoordinate,
    UnparseableLocation,
    UnparseableCorpusId,
    InvalidFilter,
    InvalidMetadata,
    UnknownCorpus,
    EmptyScope,
    UnknownFile,
    BackendUnavailable,
    IngestionRejected,
    AllTargetsFailed,
    Cancelled,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidCoordinate { .. } => ErrorKind::InvalidCoordinate,
            Error::UnparseableLocation { .. } => ErrorKind::UnparseableLocation,
            Error::UnparseableCorpusId { .. } => ErrorKind::UnparseableCorpusId,
            Error::InvalidFilter { .. } => ErrorKind::InvalidFilter,
            Error::InvalidMetadata { .. } => ErrorKind::InvalidMetadata,
            Error::UnknownCorpus { .. } => ErrorKind::UnknownCorpus,
            Error::EmptyScope { .. } => ErrorKind::EmptyScope,
            Error::UnknownFile { .. } => ErrorKind::UnknownFile,
            Error::BackendUnavailable { .. } => ErrorKind::BackendUnavailable,
            Error::IngestionRejected { .. } => ErrorKind::IngestionRejected,
            Error::AllTargetsFailed { .. } => ErrorKind::AllTargetsFailed,
            Error::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// True for errors caused by caller input rather than by a backend.
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::InvalidCoordinate
                | ErrorKind::UnparseableLocation
                | ErrorKind::UnparseableCorpusId
                | ErrorKind::InvalidFilter
                | ErrorKind::InvalidMetadata
                | ErrorKind::UnknownCorpus
                | ErrorKind::EmptyScope
                | ErrorKind::UnknownFile
        )
    }

    pub(crate) fn invalid(
        field: CoordinateField,
        value: impl Into<String>,
        reason: impl Into<String>,
        suggestion: Option<String>,
    ) -> Self {
        Error::InvalidCoordinate {
            field,
            value: value.into(),
            reason: reason.into(),
            suggestion,
        }
    }

    pub(crate) fn unparseable_location(location: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::UnparseableLocation {
            location: location.into(),
            reason: reason.into(),
        }
    }
}

/// Failure reported by an external collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// Timeouts, throttling, 5xx. Safe to retry.
    #[error("transient failure: {0}")]
    Transient(String),
    /// The request was understood and refused (bad file, unsupported type).
    #[error("rejected: {0}")]
    Rejected(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("unavailable: {0}")]
    Unavailable(String),
}

impl BackendError {
    pub fn is_transient(&self) -> bool {
        matches!(self, BackendError::Transient(_))
    }
}
