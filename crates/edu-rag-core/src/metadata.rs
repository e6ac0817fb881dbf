//! Per-file metadata attached to imports.
//!
//! `board`, `grade` and `subject` always come from the coordinate; the
//! remaining fields are optional and supplied by the caller.
//!
//! [`MetadataFilter`] narrows a search to files whose stored fields match.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::LogicalCoordinate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Theory,
    Exercises,
    Solutions,
    Examples,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Theory => "theory",
            ContentType::Exercises => "exercises",
            ContentType::Solutions => "solutions",
            ContentType::Examples => "examples",
        }
    }
}

impl FromStr for ContentType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "theory" => Ok(ContentType::Theory),
            "exercises" => Ok(ContentType::Exercises),
            "solutions" => Ok(ContentType::Solutions),
            "examples" => Ok(ContentType::Examples),
            other => Err(Error::InvalidMetadata {
                field: "content_type".into(),
                reason: format!(
                    "'{other}' is not one of theory, exercises, solutions, examples"
                ),
            }),
        }
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Basic,
    Medium,
    Advanced,
}

impl Difficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Basic => "basic",
            Difficulty::Medium => "medium",
            Difficulty::Advanced => "advanced",
        }
    }
}

impl FromStr for Difficulty {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "basic" => Ok(Difficulty::Basic),
            "medium" => Ok(Difficulty::Medium),
            "advanced" => Ok(Difficulty::Advanced),
            other => Err(Error::InvalidMetadata {
                field: "difficulty".into(),
                reason: format!("'{other}' is not one of basic, medium, advanced"),
            }),
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Optional descriptive fields for one file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub term: Option<String>,
    pub chapter: Option<String>,
    pub chapter_number: Option<u32>,
    pub publisher: Option<String>,
    pub edition: Option<String>,
    pub language: Option<String>,
    pub content_type: Option<ContentType>,
    pub difficulty: Option<Difficulty>,
}

impl FileMetadata {
    /// Trim free-text fields; a field that is present but blank is an error.
    pub fn normalized(mut self) -> Result<Self> {
        for (name, value) in [
            ("term", &mut self.term),
            ("chapter", &mut self.chapter),
            ("publisher", &mut self.publisher),
            ("edition", &mut self.edition),
            ("language", &mut self.language),
        ] {
            if let Some(v) = value.as_mut() {
                let trimmed = v.trim();
                if trimmed.is_empty() {
                    return Err(Error::InvalidMetadata {
                        field: name.to_string(),
                        reason: "must not be blank".into(),
                    });
                }
                *v = trimmed.to_string();
            }
        }
        if self.chapter_number == Some(0) {
            return Err(Error::InvalidMetadata {
                field: "chapter_number".into(),
                reason: "must be at least 1".into(),
            });
        }
        Ok(self)
    }

    /// Flat string map sent to the indexing backend, including the
    /// coordinate-derived required fields.
    pub fn to_fields(&self, coordinate: &LogicalCoordinate) -> BTreeMap<String, String> {
        let mut fields = BTreeMap::new();
        fields.insert("board".to_string(), coordinate.board().to_ascii_uppercase());
        fields.insert("grade".to_string(), coordinate.grade().to_string());
        fields.insert("subject".to_string(), coordinate.subject().to_string());

        let optional = [
            ("term", self.term.clone()),
            ("chapter", self.chapter.clone()),
            ("chapter_number", self.chapter_number.map(|n| n.to_string())),
            ("publisher", self.publisher.clone()),
            ("edition", self.edition.clone()),
            ("language", self.language.clone()),
            ("content_type", self.content_type.map(|c| c.to_string())),
            ("difficulty", self.difficulty.map(|d| d.to_string())),
        ];
        for (key, value) in optional {
            if let Some(value) = value {
                fields.insert(key.to_string(), value);
            }
        }
        fields
    }
}

/// Equality constraints on the optional per-file fields. An empty filter
/// matches every file.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetadataFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub term: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chapter_number: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<ContentType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<Difficulty>,
}

impl MetadataFilter {
    pub fn is_empty(&self) -> bool {
        self.fields().is_empty()
    }

    /// Same trimming rules as [`FileMetadata::normalized`].
    pub fn normalized(self) -> Result<Self> {
        let meta = FileMetadata {
            term: self.term,
            chapter_number: self.chapter_number,
            language: self.language,
            content_type: self.content_type,
            difficulty: self.difficulty,
            ..Default::default()
        }
        .normalized()?;
        Ok(Self {
            term: meta.term,
            chapter_number: meta.chapter_number,
            language: meta.language,
            content_type: meta.content_type,
            difficulty: meta.difficulty,
        })
    }

    /// The constrained fields, keyed and formatted as in
    /// [`FileMetadata::to_fields`].
    pub fn fields(&self) -> BTreeMap<String, String> {
        [
            ("term", self.term.clone()),
            ("chapter_number", self.chapter_number.map(|n| n.to_string())),
            ("language", self.language.clone()),
            ("content_type", self.content_type.map(|c| c.to_string())),
            ("difficulty", self.difficulty.map(|d| d.to_string())),
        ]
        .into_iter()
        .filter_map(|(key, value)| Some((key.to_string(), value?)))
        .collect()
    }

    pub fn matches(&self, metadata: &BTreeMap<String, String>) -> bool {
        self.fields()
            .iter()
            .all(|(key, value)| metadata.get(key) == Some(value))
    }
}

impl fmt::Display for MetadataFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .fields()
            .into_iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect();
        f.write_str(&parts.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enum_parsing_is_case_insensitive() {
        assert_eq!(" Theory ".parse::<ContentType>().unwrap(), ContentType::Theory);
        assert_eq!("ADVANCED".parse::<Difficulty>().unwrap(), Difficulty::Advanced);
        let err = "homework".parse::<ContentType>().unwrap_err();
        assert!(matches!(err, Error::InvalidMetadata { ref field, .. } if field == "content_type"));
    }

    #[test]
    fn test_normalized_trims_and_rejects_blank() {
        let meta = FileMetadata {
            chapter: Some("  Fractions ".into()),
            ..Default::default()
        }
        .normalized()
        .unwrap();
        assert_eq!(meta.chapter.as_deref(), Some("Fractions"));

        let blank = FileMetadata {
            publisher: Some("   ".into()),
            ..Default::default()
        };
        assert!(blank.normalized().is_err());
    }

    #[test]
    fn test_to_fields_includes_required_fields() {
        let coordinate = LogicalCoordinate::new("cbse", 5, "mathematics").unwrap();
        let meta = FileMetadata {
            chapter_number: Some(3),
            difficulty: Some(Difficulty::Basic),
            ..Default::default()
        };
        let fields = meta.to_fields(&coordinate);
        assert_eq!(fields["board"], "CBSE");
        assert_eq!(fields["grade"], "5");
        assert_eq!(fields["subject"], "mathematics");
        assert_eq!(fields["chapter_number"], "3");
        assert_eq!(fields["difficulty"], "basic");
        assert!(!fields.contains_key("term"));
    }

    #[test]
    fn test_metadata_filter_matches_stored_fields() {
        let coordinate = LogicalCoordinate::new("cbse", 5, "mathematics").unwrap();
        let stored = FileMetadata {
            chapter_number: Some(2),
            content_type: Some(ContentType::Exercises),
            difficulty: Some(Difficulty::Medium),
            ..Default::default()
        }
        .to_fields(&coordinate);

        assert!(MetadataFilter::default().matches(&stored));
        assert!(MetadataFilter::default().is_empty());

        let exercises = MetadataFilter {
            content_type: Some(ContentType::Exercises),
            chapter_number: Some(2),
            ..Default::default()
        };
        assert!(exercises.matches(&stored));
        assert_eq!(exercises.to_string(), "chapter_number=2,content_type=exercises");

        let theory = MetadataFilter {
            content_type: Some(ContentType::Theory),
            ..Default::default()
        };
        assert!(!theory.matches(&stored));

        let by_language = MetadataFilter {
            language: Some("hindi".into()),
            ..Default::default()
        };
        assert!(!by_language.matches(&stored));
    }

    #[test]
    fn test_metadata_filter_normalizes_like_metadata() {
        let filter = MetadataFilter {
            term: Some(" term-1 ".into()),
            ..Default::default()
        }
        .normalized()
        .unwrap();
        assert_eq!(filter.term.as_deref(), Some("term-1"));

        let blank = MetadataFilter {
            language: Some(" ".into()),
            ..Default::default()
        };
        assert!(matches!(
            blank.normalized(),
            Err(Error::InvalidMetadata { ref field, .. }) if field == "language"
        ));
    }
}
