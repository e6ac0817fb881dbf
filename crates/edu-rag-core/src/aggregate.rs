//! Merging per-corpus result pages into one cited, ranked list.
//!
//! # Algorithm
//!
//! 1. Flatten all pages.
//! 2. Sort by score (desc), corpus id (asc), rendered location (asc),
//!    chunk ref (asc). NaN scores sort last.
//! 3. Drop any result whose location matches an already kept result and
//!    whose chunk overlaps it (the kept one has the higher rank).
//! 4. Truncate to `limit`.
//! 5. Attach a citation to each survivor.
//!
//! Scores from different corpora are compared as-is; no re-ranking.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::Serialize;

use crate::models::{CitedResult, CorpusId, ObjectLocation, SearchResult};

pub fn merge(per_corpus: &BTreeMap<CorpusId, Vec<SearchResult>>, limit: usize) -> Vec<CitedResult> {
    let mut all: Vec<&SearchResult> = per_corpus.values().flatten().collect();
    all.sort_by(|a, b| rank(a, b));

    let mut kept: Vec<&SearchResult> = Vec::new();
    for candidate in all {
        if kept.len() >= limit {
            break;
        }
        let duplicate = kept.iter().any(|k| {
            k.source_location == candidate.source_location
                && chunks_overlap(&k.chunk_ref, &candidate.chunk_ref)
        });
        if !duplicate {
            kept.push(candidate);
        }
    }

    kept.into_iter()
        .map(|r| CitedResult {
            citation: citation(&r.corpus_id, &r.source_location, r.page),
            result: r.clone(),
        })
        .collect()
}

fn comparable_score(score: f64) -> f64 {
    if score.is_nan() {
        f64::NEG_INFINITY
    } else {
        score
    }
}

fn rank(a: &SearchResult, b: &SearchResult) -> Ordering {
    comparable_score(b.score)
        .partial_cmp(&comparable_score(a.score))
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.corpus_id.cmp(&b.corpus_id))
        .then_with(|| a.source_location.uri().cmp(&b.source_location.uri()))
        .then_with(|| a.chunk_ref.cmp(&b.chunk_ref))
}

/// A `prefix:start-end` chunk span.
struct ChunkSpan<'a> {
    prefix: &'a str,
    start: u64,
    end: u64,
}

impl<'a> ChunkSpan<'a> {
    fn parse(chunk_ref: &'a str) -> Option<Self> {
        let (prefix, range) = chunk_ref.rsplit_once(':')?;
        let (start, end) = range.split_once('-')?;
        let start: u64 = start.parse().ok()?;
        let end: u64 = end.parse().ok()?;
        (start < end).then_some(Self { prefix, start, end })
    }
}

/// Whether two chunk refs cover overlapping text of the same file.
pub fn chunks_overlap(a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }
    match (ChunkSpan::parse(a), ChunkSpan::parse(b)) {
        (Some(x), Some(y)) => x.prefix == y.prefix && x.start < y.end && y.start < x.end,
        _ => false,
    }
}

/// `[Source: CBSE Grade 5 Mathematics (cbse-grade-5-mathematics)] File: chapter-1.pdf Page: 3`
pub fn citation(corpus_id: &CorpusId, location: &ObjectLocation, page: Option<u32>) -> String {
    let mut text = format!(
        "[Source: {} ({})] File: {}",
        corpus_id.coordinate().display_name(),
        corpus_id,
        location.filename
    );
    if let Some(page) = page {
        text.push_str(&format!(" Page: {page}"));
    }
    text
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CorpusHits {
    pub corpus_id: String,
    pub count: usize,
}

/// Hit counts per corpus, ascending by corpus id.
pub fn citation_summary(results: &[CitedResult]) -> Vec<CorpusHits> {
    let mut counts: BTreeMap<&CorpusId, usize> = BTreeMap::new();
    for r in results {
        *counts.entry(&r.result.corpus_id).or_default() += 1;
    }
    counts
        .into_iter()
        .map(|(id, count)| CorpusHits {
            corpus_id: id.to_string(),
            count,
        })
        .collect()
}
