//! Corpus selection filters.
//!
//! Text form (CLI and config):
//!
//! | Text | Filter |
//! |------|--------|
//! | `all` | [`CorpusFilter::All`] |
//! | `subject=science` | [`CorpusFilter::BySubject`] |
//! | `board=cbse,grade=5` | [`CorpusFilter::ByCoordinate`] (any subset of keys) |

use std::fmt;
use std::str::FromStr;

use crate::codec;
use crate::error::{Error, Result};
use crate::models::LogicalCoordinate;

/// A partial coordinate; `None` matches anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoordinatePattern {
    pub board: Option<String>,
    pub grade: Option<u8>,
    pub subject: Option<String>,
}

impl CoordinatePattern {
    pub fn matches(&self, coordinate: &LogicalCoordinate) -> bool {
        self.board.as_deref().map_or(true, |b| b == coordinate.board())
            && self.grade.map_or(true, |g| g == coordinate.grade())
            && self
                .subject
                .as_deref()
                .map_or(true, |s| s == coordinate.subject())
    }
}

impl fmt::Display for CoordinatePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(b) = &self.board {
            parts.push(format!("board={b}"));
        }
        if let Some(g) = self.grade {
            parts.push(format!("grade={g}"));
        }
        if let Some(s) = &self.subject {
            parts.push(format!("subject={s}"));
        }
        f.write_str(&parts.join(","))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorpusFilter {
    All,
    BySubject(String),
    ByCoordinate(CoordinatePattern),
}

impl CorpusFilter {
    /// Reject values that could never match a canonical coordinate.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| Error::InvalidFilter {
            filter: self.to_string(),
            reason,
        };
        match self {
            CorpusFilter::All => Ok(()),
            CorpusFilter::BySubject(subject) => {
                codec::validate_subject(subject).map_err(|e| invalid(e.to_string()))
            }
            CorpusFilter::ByCoordinate(pattern) => {
                if pattern.board.is_none() && pattern.grade.is_none() && pattern.subject.is_none() {
                    return Err(invalid("at least one of board, grade, subject is required".into()));
                }
                if let Some(b) = &pattern.board {
                    codec::validate_board(b).map_err(|e| invalid(e.to_string()))?;
                }
                if let Some(g) = pattern.grade {
                    codec::validate_grade(g).map_err(|e| invalid(e.to_string()))?;
                }
                if let Some(s) = &pattern.subject {
                    codec::validate_subject(s).map_err(|e| invalid(e.to_string()))?;
                }
                Ok(())
            }
        }
    }

    pub fn matches(&self, coordinate: &LogicalCoordinate) -> bool {
        match self {
            CorpusFilter::All => true,
            CorpusFilter::BySubject(subject) => coordinate.subject() == subject,
            CorpusFilter::ByCoordinate(pattern) => pattern.matches(coordinate),
        }
    }
}

impl fmt::Display for CorpusFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CorpusFilter::All => f.write_str("all"),
            CorpusFilter::BySubject(s) => write!(f, "subject={s}"),
            CorpusFilter::ByCoordinate(p) => write!(f, "{p}"),
        }
    }
}

impl FromStr for CorpusFilter {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let text = s.trim();
        let invalid = |reason: &str| Error::InvalidFilter {
            filter: s.to_string(),
            reason: reason.to_string(),
        };
        if text.eq_ignore_ascii_case("all") {
            return Ok(CorpusFilter::All);
        }

        let mut pattern = CoordinatePattern::default();
        for pair in text.split(',') {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| invalid("expected key=value pairs"))?;
            let value = value.trim();
            match key.trim() {
                "board" if pattern.board.is_none() => pattern.board = Some(value.to_string()),
                "subject" if pattern.subject.is_none() => pattern.subject = Some(value.to_string()),
                "grade" if pattern.grade.is_none() => {
                    pattern.grade = Some(
                        codec::parse_grade(value)
                            .ok_or_else(|| invalid("grade must be a whole number from 1 to 12"))?,
                    )
                }
                "board" | "subject" | "grade" => return Err(invalid("duplicate key")),
                _ => return Err(invalid("unknown key; expected board, grade or subject")),
            }
        }

        let filter = match pattern {
            CoordinatePattern {
                board: None,
                grade: None,
                subject: Some(subject),
            } => CorpusFilter::BySubject(subject),
            pattern => CorpusFilter::ByCoordinate(pattern),
        };
        filter.validate()?;
        Ok(filter)
    }
}
