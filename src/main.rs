//! # erag CLI
//!
//! Command-line interface for curriculum storage and corpus search.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `erag create-bucket` | Create the object-store bucket for a board |
//! | `erag upload-file` | Upload a file to its canonical curriculum location |
//! | `erag create-corpus` | Create the corpus for a board/grade/subject |
//! | `erag import-file` | Import an uploaded file into its corpus |
//! | `erag search-all` | Search every corpus (or a filtered subset) |
//! | `erag search-corpus` | Search one corpus by id |
//! | `erag search-subject` | Search every corpus of one subject |
//! | `erag corpora` | List, show, or delete corpora; remove one file |
//! | `erag drift` | Compare a board bucket with the indexed files |
//! | `erag sync` | Import every un-indexed file of a board bucket |
//!
//! ## Exit codes
//!
//! | Code | Meaning |
//! |------|---------|
//! | 0 | Success |
//! | 1 | Invalid input, unknown corpus, empty scope, bad flags or config |
//! | 2 | Backend unavailable, ingestion rejected, every target failed, cancelled |
//! | 3 | Partial results: some corpora could not be searched or imported |
//!
//! ## Configuration
//!
//! All commands accept `--config <path>` (default: `./config/erag.toml`).
//! `RUST_LOG` overrides `[logging].filter`.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use edu_rag::commands::{self, ImportArgs, OutputFormat, Outcome};
use edu_rag::config;
use edu_rag::progress::ProgressMode;
use edu_rag::router::Scope;
use edu_rag_core::metadata::{ContentType, Difficulty, FileMetadata, MetadataFilter};
use edu_rag_core::models::LogicalCoordinate;

/// erag: curriculum files in, cited answers out.
///
/// Stores curriculum files in per-board buckets, keeps one search corpus
/// per board/grade/subject, and routes queries across corpora.
#[derive(Parser)]
#[command(name = "erag", version, about)]
struct Cli {
    /// Path to the configuration file.
    #[arg(long, global = true, default_value = "./config/erag.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Board, grade and subject flags shared by several commands.
#[derive(Args, Debug, Clone)]
struct CoordinateArgs {
    /// Education board (e.g. `cbse`, `icse`).
    #[arg(long)]
    board: String,

    /// Grade, 1 to 12.
    #[arg(long)]
    grade: u8,

    /// Subject (e.g. `mathematics`, `social-studies`).
    #[arg(long)]
    subject: String,
}

impl CoordinateArgs {
    fn coordinate(&self) -> edu_rag_core::Result<LogicalCoordinate> {
        LogicalCoordinate::new(self.board.as_str(), self.grade, self.subject.as_str())
    }
}

/// Restrict search results to files imported with matching metadata.
#[derive(Args, Debug, Clone, Default)]
struct MetadataFilterArgs {
    /// Only files of this content type (theory, exercises, solutions, examples).
    #[arg(long)]
    content_type: Option<String>,

    /// Only files of this difficulty (basic, medium, advanced).
    #[arg(long)]
    difficulty: Option<String>,

    /// Only files of this academic term.
    #[arg(long)]
    term: Option<String>,

    /// Only files of this chapter number.
    #[arg(long)]
    chapter_number: Option<u32>,

    #[arg(long)]
    language: Option<String>,
}

impl MetadataFilterArgs {
    fn filter(self) -> edu_rag_core::Result<MetadataFilter> {
        Ok(MetadataFilter {
            term: self.term,
            chapter_number: self.chapter_number,
            language: self.language,
            content_type: self.content_type.as_deref().map(str::parse::<ContentType>).transpose()?,
            difficulty: self.difficulty.as_deref().map(str::parse::<Difficulty>).transpose()?,
        })
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create the bucket for a board.
    ///
    /// Bucket names follow `adk-<board>-education`. An existing bucket is
    /// not an error.
    CreateBucket {
        /// Education board.
        #[arg(long)]
        board: String,
    },

    /// Upload a local file to `gs://adk-<board>-education/grade-<n>/<subject>/<filename>`.
    UploadFile {
        #[command(flatten)]
        coordinate: CoordinateArgs,

        /// Object filename inside the grade/subject folder.
        #[arg(long)]
        filename: String,

        /// Local file to upload.
        #[arg(long)]
        file: PathBuf,
    },

    /// Create (or adopt) the corpus for a board/grade/subject.
    CreateCorpus {
        #[command(flatten)]
        coordinate: CoordinateArgs,

        /// Corpus description (default: "CBSE Grade 5 Mathematics" style name).
        #[arg(long)]
        description: Option<String>,
    },

    /// Import an uploaded file into the corpus for its coordinate.
    ///
    /// Creates the corpus on first import. Re-importing the same file is a
    /// no-op in the catalog.
    ImportFile {
        #[command(flatten)]
        coordinate: CoordinateArgs,

        /// Object filename inside the grade/subject folder.
        #[arg(long)]
        filename: String,

        /// Academic term (e.g. `term-1`).
        #[arg(long)]
        term: Option<String>,

        /// Chapter title.
        #[arg(long)]
        chapter: Option<String>,

        /// Chapter number, starting at 1.
        #[arg(long)]
        chapter_number: Option<u32>,

        #[arg(long)]
        publisher: Option<String>,

        #[arg(long)]
        edition: Option<String>,

        #[arg(long)]
        language: Option<String>,

        /// One of: theory, exercises, solutions, examples.
        #[arg(long)]
        content_type: Option<String>,

        /// One of: basic, medium, advanced.
        #[arg(long)]
        difficulty: Option<String>,

        /// Chunk size in tokens (default: `[import].chunk_size`).
        #[arg(long)]
        chunk_size: Option<u32>,

        /// Chunk overlap in tokens (default: `[import].chunk_overlap`).
        #[arg(long)]
        chunk_overlap: Option<u32>,
    },

    /// Search every corpus, or those matching `--filter`.
    ///
    /// Corpora that fail are reported as warnings; results from the rest
    /// are still printed (exit code 3).
    SearchAll {
        /// Query text.
        query: String,

        /// `all`, `subject=<s>`, or `board=<b>,grade=<n>,subject=<s>` (any subset).
        #[arg(long)]
        filter: Option<String>,

        #[command(flatten)]
        metadata: MetadataFilterArgs,

        /// Output format.
        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Search one corpus by id (e.g. `cbse-grade-5-mathematics`).
    SearchCorpus {
        /// Corpus id.
        #[arg(long)]
        corpus_id: String,

        /// Query text.
        query: String,

        #[command(flatten)]
        metadata: MetadataFilterArgs,

        /// Output format.
        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Search every corpus of one subject, across boards and grades.
    SearchSubject {
        /// Subject.
        #[arg(long)]
        subject: String,

        /// Query text.
        query: String,

        #[command(flatten)]
        metadata: MetadataFilterArgs,

        /// Output format.
        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Manage corpora.
    Corpora {
        #[command(subcommand)]
        action: CorporaAction,
    },

    /// Compare a board's bucket with the indexed files.
    Drift {
        /// Education board.
        #[arg(long)]
        board: String,

        /// Output format.
        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Import every un-indexed file in a board's bucket.
    Sync {
        /// Education board.
        #[arg(long)]
        board: String,

        /// Progress on stderr (default: human when stderr is a TTY, else off).
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },
}

/// Corpus management subcommands.
#[derive(Subcommand)]
enum CorporaAction {
    /// List corpora with their file counts.
    List {
        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
    /// Show one corpus and its imported files.
    Show {
        /// Corpus id.
        corpus_id: String,

        #[arg(long, value_enum, default_value = "text")]
        format: OutputFormat,
    },
    /// Delete a corpus in the backend and forget its files.
    Delete {
        /// Corpus id.
        corpus_id: String,
    },
    /// Remove one imported file from a corpus; the corpus stays.
    RemoveFile {
        /// Corpus id.
        corpus_id: String,

        /// `gs://` URI of the imported file.
        uri: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::from(1)
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    let cfg = match config::load_config(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return ExitCode::from(1);
        }
    };
    init_tracing(&cfg.logging.filter);

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    match run(cli.command, &cfg, &cancel).await {
        Ok(outcome) => ExitCode::from(outcome.exit_code()),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(commands::exit_code_for(&e))
        }
    }
}

fn init_tracing(configured: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(configured))
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .try_init()
        .ok();
}

async fn run(command: Commands, cfg: &config::Config, cancel: &CancellationToken) -> anyhow::Result<Outcome> {
    match command {
        Commands::CreateBucket { board } => commands::run_create_bucket(cfg, &board).await,
        Commands::UploadFile {
            coordinate,
            filename,
            file,
        } => {
            let coordinate = coordinate.coordinate()?;
            commands::run_upload_file(cfg, &coordinate, &filename, &file).await
        }
        Commands::CreateCorpus {
            coordinate,
            description,
        } => {
            let coordinate = coordinate.coordinate()?;
            commands::run_create_corpus(cfg, &coordinate, description.as_deref()).await
        }
        Commands::ImportFile {
            coordinate,
            filename,
            term,
            chapter,
            chapter_number,
            publisher,
            edition,
            language,
            content_type,
            difficulty,
            chunk_size,
            chunk_overlap,
        } => {
            let coordinate = coordinate.coordinate()?;
            let metadata = FileMetadata {
                term,
                chapter,
                chapter_number,
                publisher,
                edition,
                language,
                content_type: content_type.as_deref().map(str::parse::<ContentType>).transpose()?,
                difficulty: difficulty.as_deref().map(str::parse::<Difficulty>).transpose()?,
            };
            let args = ImportArgs {
                metadata,
                chunk_size,
                chunk_overlap,
            };
            commands::run_import_file(cfg, &coordinate, &filename, args).await
        }
        Commands::SearchAll {
            query,
            filter,
            metadata,
            format,
        } => {
            let scope = commands::scope_from_filter(filter.as_deref())?;
            commands::run_search(cfg, &query, scope, metadata.filter()?, format, cancel).await
        }
        Commands::SearchCorpus {
            corpus_id,
            query,
            metadata,
            format,
        } => {
            let scope = Scope::Single(corpus_id);
            commands::run_search(cfg, &query, scope, metadata.filter()?, format, cancel).await
        }
        Commands::SearchSubject {
            subject,
            query,
            metadata,
            format,
        } => {
            let scope = commands::subject_scope(&subject)?;
            commands::run_search(cfg, &query, scope, metadata.filter()?, format, cancel).await
        }
        Commands::Corpora { action } => match action {
            CorporaAction::List { format } => commands::run_corpora_list(cfg, format).await,
            CorporaAction::Show { corpus_id, format } => {
                commands::run_corpora_show(cfg, &corpus_id, format).await
            }
            CorporaAction::Delete { corpus_id } => {
                commands::run_corpora_delete(cfg, &corpus_id).await
            }
            CorporaAction::RemoveFile { corpus_id, uri } => {
                commands::run_corpora_remove_file(cfg, &corpus_id, &uri).await
            }
        },
        Commands::Drift { board, format } => commands::run_drift(cfg, &board, format).await,
        Commands::Sync { board, progress } => {
            let progress = progress.unwrap_or_else(ProgressMode::default_for_tty);
            commands::run_sync(cfg, &board, progress).await
        }
    }
}
