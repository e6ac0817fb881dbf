//! Command runners for the `erag` binary.
//!
//! Each runner validates its inputs first, then connects to the configured
//! backends. Commands that read corpora rebuild the catalog from the
//! indexing backend before doing anything else.
//!
//! Results go to stdout; warnings and progress go to stderr.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use edu_rag_core::aggregate::{self, CorpusHits};
use edu_rag_core::backend::ImportOptions;
use edu_rag_core::catalog::Catalog;
use edu_rag_core::codec;
use edu_rag_core::filter::CorpusFilter;
use edu_rag_core::metadata::{FileMetadata, MetadataFilter};
use edu_rag_core::models::{LogicalCoordinate, ObjectLocation};
use edu_rag_core::Error;

use crate::backends::{build_backends, Backends};
use crate::config::Config;
use crate::importer::Importer;
use crate::progress::ProgressMode;
use crate::reconcile::{drift_for_board, rebuild_catalog};
use crate::retry::RetryPolicy;
use crate::router::{QueryRouter, RouterSettings, Scope, SearchResponse};
use crate::storage;
use crate::sync::sync_board;

/// How a command finished when it did not fail outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Complete,
    /// Output was produced but some targets could not be reached.
    Partial,
}

impl Outcome {
    pub fn exit_code(self) -> u8 {
        match self {
            Outcome::Complete => 0,
            Outcome::Partial => 3,
        }
    }
}

/// Caller mistakes exit 1, backend trouble exits 2.
pub fn exit_code_for(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<Error>() {
        Some(e) if e.is_caller_error() => 1,
        Some(_) => 2,
        None => 1,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Connected backends plus the catalog they were reconciled into.
pub struct App {
    pub config: Config,
    pub backends: Backends,
    pub catalog: Arc<Catalog>,
    pub retry: RetryPolicy,
}

impl App {
    /// Build backends without reading any corpora.
    pub fn connect(config: &Config) -> Result<Self> {
        let backends = build_backends(config).context("Failed to initialise backends")?;
        Ok(Self {
            config: config.clone(),
            backends,
            catalog: Arc::new(Catalog::new()),
            retry: RetryPolicy::from_config(&config.import),
        })
    }

    /// Build backends and rebuild the catalog from the indexing backend.
    pub async fn start(config: &Config) -> Result<Self> {
        let app = Self::connect(config)?;
        let report = rebuild_catalog(&app.catalog, app.backends.index.as_ref(), &app.retry).await?;
        for name in &report.skipped_corpora {
            tracing::debug!(name = %name, "ignoring corpus not managed by erag");
        }
        for uri in &report.foreign_files {
            tracing::warn!(uri = %uri, "indexed file does not belong to its corpus");
        }
        Ok(app)
    }

    pub fn importer(&self) -> Importer {
        Importer::new(
            Arc::clone(&self.catalog),
            Arc::clone(&self.backends.index),
            self.retry.clone(),
        )
    }

    pub fn router(&self) -> QueryRouter {
        QueryRouter::new(
            Arc::clone(&self.catalog),
            Arc::clone(&self.backends.index),
            RouterSettings::from_config(&self.config.search),
        )
    }
}

// ============ Storage ============

pub async fn run_create_bucket(config: &Config, board: &str) -> Result<Outcome> {
    codec::bucket_for(board)?;
    let app = App::connect(config)?;
    let bucket = storage::create_bucket(app.backends.object_store.as_ref(), board, &app.retry).await?;
    println!("Bucket ready: {}", bucket);
    Ok(Outcome::Complete)
}

pub async fn run_upload_file(
    config: &Config,
    coordinate: &LogicalCoordinate,
    filename: &str,
    file: &Path,
) -> Result<Outcome> {
    codec::encode_location(coordinate, filename)?;
    let bytes = std::fs::read(file)
        .with_context(|| format!("Failed to read file: {}", file.display()))?;

    let app = App::connect(config)?;
    let location = storage::upload_file(
        app.backends.object_store.as_ref(),
        coordinate,
        filename,
        bytes,
        &app.retry,
    )
    .await?;
    println!("Uploaded {}", location);
    Ok(Outcome::Complete)
}

// ============ Corpora ============

pub async fn run_create_corpus(
    config: &Config,
    coordinate: &LogicalCoordinate,
    description: Option<&str>,
) -> Result<Outcome> {
    let app = App::start(config).await?;
    let record = app.importer().create_corpus(coordinate, description).await?;
    println!("Corpus ready: {}", record.id);
    println!("  description: {}", record.description);
    println!("  backend ref: {}", record.backend_ref);
    Ok(Outcome::Complete)
}

pub async fn run_corpora_list(config: &Config, format: OutputFormat) -> Result<Outcome> {
    let app = App::start(config).await?;
    let records = app.catalog.records();

    if format == OutputFormat::Json {
        let rows: Vec<serde_json::Value> = records
            .iter()
            .map(|r| {
                serde_json::json!({
                    "id": r.id,
                    "description": r.description,
                    "backend_ref": r.backend_ref,
                    "files": r.members.len(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(Outcome::Complete);
    }

    if records.is_empty() {
        println!("No corpora.");
        return Ok(Outcome::Complete);
    }
    println!("{:<40} {:>6}  DESCRIPTION", "CORPUS", "FILES");
    for record in &records {
        println!(
            "{:<40} {:>6}  {}",
            record.id.as_str(),
            record.members.len(),
            record.description
        );
    }
    Ok(Outcome::Complete)
}

pub async fn run_corpora_show(config: &Config, corpus_id: &str, format: OutputFormat) -> Result<Outcome> {
    let app = App::start(config).await?;
    let record = app.catalog.record_for(corpus_id)?;

    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&record)?);
        return Ok(Outcome::Complete);
    }

    println!("--- Corpus ---");
    println!("id:           {}", record.id);
    println!("name:         {}", record.coordinate.display_name());
    println!("description:  {}", record.description);
    println!("backend_ref:  {}", record.backend_ref);
    println!("created_at:   {}", record.created_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!();
    println!("--- Files ({}) ---", record.members.len());
    for import in record.members.values() {
        println!(
            "{}  {}  {}",
            import.imported_at.format("%Y-%m-%d"),
            import.source_location,
            import.backend_file_ref
        );
    }
    Ok(Outcome::Complete)
}

pub async fn run_corpora_delete(config: &Config, corpus_id: &str) -> Result<Outcome> {
    let app = App::start(config).await?;
    let record = app.importer().delete_corpus(corpus_id).await?;
    println!(
        "Deleted corpus {} ({} files unlinked)",
        record.id,
        record.members.len()
    );
    Ok(Outcome::Complete)
}

/// Remove one file (by `gs://` URI) from a corpus.
pub async fn run_corpora_remove_file(config: &Config, corpus_id: &str, uri: &str) -> Result<Outcome> {
    let location = codec::parse_location_uri(uri)?;
    let app = App::start(config).await?;
    let import = app.importer().remove_file(corpus_id, &location).await?;
    println!(
        "Removed {} from {} (file ref {})",
        import.source_location, corpus_id, import.backend_file_ref
    );
    Ok(Outcome::Complete)
}

// ============ Import ============

/// Import flags beyond the coordinate and filename.
#[derive(Debug, Clone, Default)]
pub struct ImportArgs {
    pub metadata: FileMetadata,
    pub chunk_size: Option<u32>,
    pub chunk_overlap: Option<u32>,
}

impl ImportArgs {
    /// Options for the backend, falling back to `[import]` chunking.
    pub fn options(self, config: &Config, coordinate: &LogicalCoordinate) -> edu_rag_core::Result<ImportOptions> {
        let metadata = self.metadata.normalized()?;
        let options = ImportOptions {
            chunk_size: Some(self.chunk_size.unwrap_or(config.import.chunk_size)),
            chunk_overlap: Some(self.chunk_overlap.unwrap_or(config.import.chunk_overlap)),
            metadata: metadata.to_fields(coordinate),
        };
        options.validate()?;
        Ok(options)
    }
}

pub async fn run_import_file(
    config: &Config,
    coordinate: &LogicalCoordinate,
    filename: &str,
    args: ImportArgs,
) -> Result<Outcome> {
    let location = codec::encode_location(coordinate, filename)?;
    let options = args.options(config, coordinate)?;

    let app = App::start(config).await?;
    let record = app.importer().import_file(&location, &options).await?;
    println!(
        "Imported {} into {}",
        record.source_location,
        codec::encode_corpus_id(coordinate)
    );
    println!("  file ref: {}", record.backend_file_ref);
    Ok(Outcome::Complete)
}

// ============ Drift & sync ============

pub async fn run_drift(config: &Config, board: &str, format: OutputFormat) -> Result<Outcome> {
    codec::bucket_for(board)?;
    let app = App::start(config).await?;
    let report = drift_for_board(
        &app.catalog,
        app.backends.object_store.as_ref(),
        board,
        &app.retry,
    )
    .await?;

    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(Outcome::Complete);
    }

    if report.is_clean() {
        println!("{}: in sync", report.bucket);
        return Ok(Outcome::Complete);
    }
    print_locations("Not indexed", &report.unindexed);
    print_locations("Missing from bucket", &report.missing);
    print_locations("Not a curriculum path", &report.undecodable);
    if !report.unreadable_keys.is_empty() {
        println!("Unreadable keys ({}):", report.unreadable_keys.len());
        for key in &report.unreadable_keys {
            println!("  {}", key);
        }
    }
    Ok(Outcome::Complete)
}

fn print_locations(title: &str, locations: &[ObjectLocation]) {
    if locations.is_empty() {
        return;
    }
    println!("{} ({}):", title, locations.len());
    for location in locations {
        println!("  {}", location);
    }
}

/// Import every un-indexed object of a board's bucket.
///
/// Files the backend rejects are reported and skipped; the run then ends
/// as [`Outcome::Partial`]. Any other failure stops the run.
pub async fn run_sync(config: &Config, board: &str, progress: ProgressMode) -> Result<Outcome> {
    codec::bucket_for(board)?;
    let reporter = progress.reporter();
    let app = App::start(config).await?;
    let report = sync_board(
        &app.backends,
        &app.catalog,
        &config.import,
        &app.retry,
        board,
        reporter.as_ref(),
    )
    .await?;

    println!(
        "sync {}: {} imported, {} rejected",
        report.bucket,
        report.imported.len(),
        report.rejected.len()
    );
    for rejected in &report.rejected {
        println!("  rejected {}: {}", rejected.uri, rejected.reason);
    }
    if report.skipped > 0 {
        println!("  skipped {} objects outside the curriculum layout", report.skipped);
    }
    Ok(report.outcome())
}

// ============ Search ============

/// Scope for `search-all`: everything, or a `--filter` expression.
pub fn scope_from_filter(filter: Option<&str>) -> edu_rag_core::Result<Scope> {
    match filter {
        None => Ok(Scope::All),
        Some(text) => {
            let filter: CorpusFilter = text.parse()?;
            Ok(Scope::from(filter))
        }
    }
}

/// Scope for `search-subject`. The subject is taken as one token, never
/// as filter text.
pub fn subject_scope(subject: &str) -> edu_rag_core::Result<Scope> {
    let filter = CorpusFilter::BySubject(subject.to_string());
    filter.validate()?;
    Ok(Scope::from(filter))
}

pub async fn run_search(
    config: &Config,
    query: &str,
    scope: Scope,
    filter: MetadataFilter,
    format: OutputFormat,
    cancel: &CancellationToken,
) -> Result<Outcome> {
    let filter = filter.normalized()?;
    let app = App::start(config).await?;
    let response = app
        .router()
        .search_filtered(query, &scope, &filter, cancel)
        .await?;

    for warning in &response.warnings {
        eprintln!("warning: {}", warning);
    }
    match format {
        OutputFormat::Json => print_search_json(&response)?,
        OutputFormat::Text => print_search_text(&response),
    }

    Ok(if response.is_partial() {
        Outcome::Partial
    } else {
        Outcome::Complete
    })
}

#[derive(Serialize)]
struct SearchOutput<'a> {
    #[serde(flatten)]
    response: &'a SearchResponse,
    summary: Vec<CorpusHits>,
}

fn print_search_json(response: &SearchResponse) -> Result<()> {
    let output = SearchOutput {
        response,
        summary: aggregate::citation_summary(&response.results),
    };
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn print_search_text(response: &SearchResponse) {
    if response.results.is_empty() {
        println!("No results.");
        return;
    }

    for (i, cited) in response.results.iter().enumerate() {
        let result = &cited.result;
        println!(
            "{}. [{:.2}] {} / {}",
            i + 1,
            result.score,
            result.corpus_id,
            result.source_location.filename
        );
        println!("    {}", result.snippet.replace('\n', " "));
        println!("    {}", cited.citation);
        println!();
    }

    println!("Sources:");
    for hits in aggregate::citation_summary(&response.results) {
        let noun = if hits.count == 1 { "result" } else { "results" };
        println!("  {}: {} {}", hits.corpus_id, hits.count, noun);
    }
}
