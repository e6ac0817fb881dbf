//! Identifier codec: logical coordinates ⇄ object locations and corpus ids.
//!
//! All functions are pure. Encoding is total over valid coordinates and
//! injective; decoding is strict and accepts exactly the strings encoding
//! can produce.
//!
//! | Name | Shape | Example |
//! |------|-------|---------|
//! | bucket | `adk-{board}-education` | `adk-cbse-education` |
//! | path | `grade-{grade}/{subject}` | `grade-5/mathematics` |
//! | URI | `gs://{bucket}/{path}/{filename}` | `gs://adk-cbse-education/grade-5/mathematics/chapter-1.pdf` |
//! | corpus id | `{board}-grade-{grade}-{subject}` | `cbse-grade-5-mathematics` |
//!
//! Tokens (`board`, `subject`) are lowercase ASCII alphanumeric segments
//! joined by single hyphens. No segment may be the word `grade`, which makes
//! the corpus id split point unique.

use crate::error::{CoordinateField, Error, Result};
use crate::models::{CorpusId, LogicalCoordinate, ObjectLocation};

pub const BUCKET_PREFIX: &str = "adk-";
pub const BUCKET_SUFFIX: &str = "-education";
pub const URI_SCHEME: &str = "gs";
pub const MIN_GRADE: u8 = 1;
pub const MAX_GRADE: u8 = 12;

const GRADE_WORD: &str = "grade";
const MAX_BUCKET_LEN: usize = 63;
const MAX_BOARD_LEN: usize = MAX_BUCKET_LEN - BUCKET_PREFIX.len() - BUCKET_SUFFIX.len();
const MAX_FILENAME_LEN: usize = 255;

// ============ Validation ============

pub(crate) fn validate_board(board: &str) -> Result<()> {
    validate_token(CoordinateField::Board, board)?;
    if board.len() > MAX_BOARD_LEN {
        return Err(Error::invalid(
            CoordinateField::Board,
            board,
            format!("longer than {MAX_BOARD_LEN} characters"),
            None,
        ));
    }
    Ok(())
}

pub(crate) fn validate_subject(subject: &str) -> Result<()> {
    validate_token(CoordinateField::Subject, subject)
}

pub(crate) fn validate_grade(grade: u8) -> Result<()> {
    if !(MIN_GRADE..=MAX_GRADE).contains(&grade) {
        return Err(Error::invalid(
            CoordinateField::Grade,
            grade.to_string(),
            format!("must be between {MIN_GRADE} and {MAX_GRADE}"),
            None,
        ));
    }
    Ok(())
}

fn validate_token(field: CoordinateField, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(Error::invalid(field, value, "must not be empty", None));
    }
    if !is_canonical_token(value) {
        return Err(Error::invalid(
            field,
            value,
            "must be lowercase letters and digits in hyphen-separated segments",
            suggest_token(value),
        ));
    }
    if value.split('-').any(|segment| segment == GRADE_WORD) {
        return Err(Error::invalid(
            field,
            value,
            "must not contain the segment 'grade'",
            None,
        ));
    }
    Ok(())
}

fn is_canonical_token(value: &str) -> bool {
    !value.is_empty()
        && value.split('-').all(|segment| {
            !segment.is_empty()
                && segment
                    .bytes()
                    .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
        })
}

/// Validate a filename as it will appear as the last location segment.
pub fn validate_filename(filename: &str) -> Result<()> {
    let reason = if filename.is_empty() {
        Some("must not be empty")
    } else if filename == "." || filename == ".." {
        Some("must not be a relative path component")
    } else if filename.len() > MAX_FILENAME_LEN {
        Some("is too long")
    } else if filename
        .chars()
        .any(|c| c == '/' || c == '#' || c == '?' || c.is_control())
    {
        Some("must not contain '/', '#', '?' or control characters")
    } else {
        None
    };
    match reason {
        Some(reason) => Err(Error::invalid(CoordinateField::Filename, filename, reason, None)),
        None => Ok(()),
    }
}

/// Canonical form of free-form input, for error hints only.
///
/// `"Social Studies"` → `social-studies`, `"EVS & Science"` → `evs-science`.
/// Returns `None` when nothing canonical is left or the input is already
/// canonical.
pub fn suggest_token(raw: &str) -> Option<String> {
    let mut out = String::with_capacity(raw.len());
    let mut pending_hyphen = false;
    for c in raw.trim().chars() {
        if c.is_ascii_alphanumeric() {
            if pending_hyphen && !out.is_empty() {
                out.push('-');
            }
            pending_hyphen = false;
            out.push(c.to_ascii_lowercase());
        } else {
            pending_hyphen = true;
        }
    }
    if out.is_empty() || out == raw {
        None
    } else {
        Some(out)
    }
}

// ============ Buckets ============

/// Bucket name for a board, validating the board token.
pub fn bucket_for(board: &str) -> Result<String> {
    validate_board(board)?;
    Ok(format!("{BUCKET_PREFIX}{board}{BUCKET_SUFFIX}"))
}

/// Board token encoded in a bucket name.
pub fn board_from_bucket(bucket: &str) -> Result<String> {
    let board = bucket
        .strip_prefix(BUCKET_PREFIX)
        .and_then(|rest| rest.strip_suffix(BUCKET_SUFFIX))
        .ok_or_else(|| {
            Error::unparseable_location(
                bucket,
                format!("bucket must look like {BUCKET_PREFIX}<board>{BUCKET_SUFFIX}"),
            )
        })?;
    validate_board(board).map_err(|e| Error::unparseable_location(bucket, e.to_string()))?;
    Ok(board.to_string())
}

// ============ Locations ============

pub fn encode_location(coordinate: &LogicalCoordinate, filename: &str) -> Result<ObjectLocation> {
    validate_filename(filename)?;
    Ok(ObjectLocation {
        bucket: bucket_for(coordinate.board())?,
        path: vec![
            format!("{GRADE_WORD}-{}", coordinate.grade()),
            coordinate.subject().to_string(),
        ],
        filename: filename.to_string(),
    })
}

pub fn decode_location(location: &ObjectLocation) -> Result<LogicalCoordinate> {
    let uri = location.uri();
    let board = board_from_bucket(&location.bucket)
        .map_err(|e| Error::unparseable_location(&uri, reason_of(e)))?;

    let [grade_segment, subject] = location.path.as_slice() else {
        return Err(Error::unparseable_location(
            uri,
            "path must be grade-<n>/<subject>",
        ));
    };
    let grade = grade_segment
        .strip_prefix("grade-")
        .and_then(parse_grade)
        .ok_or_else(|| Error::unparseable_location(&uri, format!("bad grade segment '{grade_segment}'")))?;

    validate_filename(&location.filename).map_err(|e| Error::unparseable_location(&uri, reason_of(e)))?;
    LogicalCoordinate::new(board, grade, subject.clone())
        .map_err(|e| Error::unparseable_location(&uri, reason_of(e)))
}

/// Strict grade parse: digits only, no leading zero, within range.
pub(crate) fn parse_grade(s: &str) -> Option<u8> {
    if s.is_empty() || s.starts_with('0') || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let grade: u8 = s.parse().ok()?;
    (MIN_GRADE..=MAX_GRADE).contains(&grade).then_some(grade)
}

fn reason_of(err: Error) -> String {
    match err {
        Error::UnparseableLocation { reason, .. } => reason,
        other => other.to_string(),
    }
}

/// Parse a `gs://bucket/a/b/file` URI into a location.
///
/// Only checks the URI shape; use [`decode_location`] to check that it
/// matches the curriculum layout.
pub fn parse_location_uri(uri: &str) -> Result<ObjectLocation> {
    let prefix = format!("{URI_SCHEME}://");
    let rest = uri
        .strip_prefix(&prefix)
        .ok_or_else(|| Error::unparseable_location(uri, format!("expected {prefix} scheme")))?;
    let (bucket, key) = rest
        .split_once('/')
        .ok_or_else(|| Error::unparseable_location(uri, "missing object key"))?;
    if bucket.is_empty() {
        return Err(Error::unparseable_location(uri, "empty bucket"));
    }
    location_from_key(bucket, key).map_err(|e| Error::unparseable_location(uri, reason_of(e)))
}

/// Build a location from a bucket and a `/`-separated object key.
pub fn location_from_key(bucket: &str, key: &str) -> Result<ObjectLocation> {
    let mut segments: Vec<String> = key.split('/').map(str::to_string).collect();
    if segments.iter().any(String::is_empty) {
        return Err(Error::unparseable_location(
            format!("{URI_SCHEME}://{bucket}/{key}"),
            "empty path segment",
        ));
    }
    // split always yields at least one element
    let filename = segments.pop().unwrap_or_default();
    Ok(ObjectLocation {
        bucket: bucket.to_string(),
        path: segments,
        filename,
    })
}

/// Split a trailing `#page=N` fragment off a backend URI.
pub fn split_page_fragment(uri: &str) -> (&str, Option<u32>) {
    match uri.split_once('#') {
        Some((base, fragment)) => {
            let page = fragment
                .strip_prefix("page=")
                .and_then(|n| n.parse::<u32>().ok());
            (base, page)
        }
        None => (uri, None),
    }
}

// ============ Corpus ids ============

pub fn encode_corpus_id(coordinate: &LogicalCoordinate) -> CorpusId {
    let id = format!(
        "{}-{GRADE_WORD}-{}-{}",
        coordinate.board(),
        coordinate.grade(),
        coordinate.subject()
    );
    CorpusId::from_parts(id, coordinate.clone())
}

pub fn decode_corpus_id(id: &str) -> Result<LogicalCoordinate> {
    let unparseable = |reason: String| Error::UnparseableCorpusId {
        corpus_id: id.to_string(),
        reason,
    };

    let segments: Vec<&str> = id.split('-').collect();
    let grade_positions: Vec<usize> = segments
        .iter()
        .enumerate()
        .filter(|(_, s)| **s == GRADE_WORD)
        .map(|(i, _)| i)
        .collect();
    let &[pos] = grade_positions.as_slice() else {
        return Err(unparseable(
            "expected exactly one 'grade' segment".to_string(),
        ));
    };
    if pos == 0 || pos + 2 >= segments.len() {
        return Err(unparseable(
            "expected <board>-grade-<n>-<subject>".to_string(),
        ));
    }

    let grade = parse_grade(segments[pos + 1])
        .ok_or_else(|| unparseable(format!("bad grade '{}'", segments[pos + 1])))?;
    let board = segments[..pos].join("-");
    let subject = segments[pos + 2..].join("-");
    LogicalCoordinate::new(board, grade, subject).map_err(|e| unparseable(e.to_string()))
}
