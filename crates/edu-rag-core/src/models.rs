//! Core data models for edu-rag.
//!
//! These types flow between the codec, the catalog, the importer, and the
//! query router:
//!
//! ```text
//! LogicalCoordinate ──encode──▶ ObjectLocation ──import──▶ ImportRecord
//!        │                                                      │
//!        └──encode──▶ CorpusId ◀──── CorpusRecord.members ──────┘
//!
//! IndexBackend hit ──▶ SearchResult ──aggregate──▶ CitedResult
//! ```
//!
//! Coordinates and corpus ids are validated on construction, so holding one
//! means holding a canonical value.

use std::borrow::Borrow;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};

use crate::codec;
use crate::error::{Error, Result};

/// A position in the curriculum hierarchy: board → grade → subject.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct LogicalCoordinate {
    board: String,
    grade: u8,
    subject: String,
}

impl LogicalCoordinate {
    /// Validate and build a coordinate. Non-canonical input is rejected with
    /// a suggested canonical form, never silently coerced.
    pub fn new(board: impl Into<String>, grade: u8, subject: impl Into<String>) -> Result<Self> {
        let board = board.into();
        let subject = subject.into();
        codec::validate_board(&board)?;
        codec::validate_grade(grade)?;
        codec::validate_subject(&subject)?;
        Ok(Self {
            board,
            grade,
            subject,
        })
    }

    pub fn board(&self) -> &str {
        &self.board
    }

    pub fn grade(&self) -> u8 {
        self.grade
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Human-readable name, e.g. `CBSE Grade 5 Mathematics`.
    pub fn display_name(&self) -> String {
        let subject = self
            .subject
            .split('-')
            .map(|word| {
                let mut chars = word.chars();
                match chars.next() {
                    Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join(" ");
        format!(
            "{} Grade {} {}",
            self.board.to_ascii_uppercase(),
            self.grade,
            subject
        )
    }
}

impl fmt::Display for LogicalCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/grade-{}/{}", self.board, self.grade, self.subject)
    }
}

/// Where a file lives in the object store.
///
/// Rendered as `gs://{bucket}/{path...}/{filename}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectLocation {
    pub bucket: String,
    pub path: Vec<String>,
    pub filename: String,
}

impl ObjectLocation {
    /// Object key inside the bucket, e.g. `grade-5/mathematics/chapter-1.pdf`.
    pub fn key(&self) -> String {
        let mut parts: Vec<&str> = self.path.iter().map(String::as_str).collect();
        parts.push(&self.filename);
        parts.join("/")
    }

    pub fn uri(&self) -> String {
        format!("{}://{}/{}", codec::URI_SCHEME, self.bucket, self.key())
    }
}

impl fmt::Display for ObjectLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.uri())
    }
}

impl FromStr for ObjectLocation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        codec::parse_location_uri(s)
    }
}

impl Serialize for ObjectLocation {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.uri())
    }
}

/// Identifier of a corpus, `{board}-grade-{grade}-{subject}`.
///
/// Equality, ordering and hashing use the rendered string only, so a
/// `BTreeMap<CorpusId, _>` can be queried with a `&str`.
#[derive(Debug, Clone)]
pub struct CorpusId {
    id: String,
    coordinate: LogicalCoordinate,
}

impl CorpusId {
    pub(crate) fn from_parts(id: String, coordinate: LogicalCoordinate) -> Self {
        Self { id, coordinate }
    }

    /// Strictly decode an id string.
    pub fn parse(s: &str) -> Result<Self> {
        let coordinate = codec::decode_corpus_id(s)?;
        Ok(Self {
            id: s.to_string(),
            coordinate,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.id
    }

    pub fn coordinate(&self) -> &LogicalCoordinate {
        &self.coordinate
    }
}

impl PartialEq for CorpusId {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for CorpusId {}

impl Hash for CorpusId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl PartialOrd for CorpusId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CorpusId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id.cmp(&other.id)
    }
}

impl Borrow<str> for CorpusId {
    fn borrow(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for CorpusId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

impl FromStr for CorpusId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for CorpusId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.id)
    }
}

/// Provenance link between an object-store file and the corpus that
/// indexed it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImportRecord {
    pub source_location: ObjectLocation,
    pub imported_at: DateTime<Utc>,
    /// Backend handle of the indexed file.
    pub backend_file_ref: String,
}

/// Snapshot of one corpus known to the catalog.
#[derive(Debug, Clone, Serialize)]
pub struct CorpusRecord {
    pub id: CorpusId,
    pub coordinate: LogicalCoordinate,
    pub description: String,
    /// Backend handle of the corpus (resource name, or id).
    pub backend_ref: String,
    pub created_at: DateTime<Utc>,
    #[serde(serialize_with = "serialize_members")]
    pub members: BTreeMap<ObjectLocation, ImportRecord>,
}

fn serialize_members<S: Serializer>(
    members: &BTreeMap<ObjectLocation, ImportRecord>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_seq(members.values())
}

/// One hit from one corpus, resolved to its object-store location.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub corpus_id: CorpusId,
    pub source_location: ObjectLocation,
    pub snippet: String,
    pub score: f64,
    /// Backend chunk handle; `prefix:start-end` spans are compared for overlap.
    pub chunk_ref: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
}

/// A merged result carrying its rendered citation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CitedResult {
    #[serde(flatten)]
    pub result: SearchResult,
    pub citation: String,
}
