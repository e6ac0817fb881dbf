//! # edu-rag
//!
//! Curriculum files stored per board, indexed per board/grade/subject, and
//! searched with citations back to the stored files.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  upload   ┌──────────────────────────────┐
//! │  erag CLI    │──────────▶│ Object store                  │
//! │              │           │ gs://adk-<board>-education/   │
//! │              │           │   grade-<n>/<subject>/<file>  │
//! │              │           └──────────────┬───────────────┘
//! │              │  import                  │ uri
//! │              │──────────▶ Importer ─────▼───────────────┐
//! │              │            (catalog)   Indexing backend   │
//! │              │  search                 one corpus per    │
//! │              │──────────▶ QueryRouter ─▶ board/grade/    │
//! └──────────────┘            fan-out      subject           │
//!                             + merge     ───────────────────┘
//! ```
//!
//! The pure parts (identifier codec, catalog, filters, result merging,
//! backend traits, in-memory backends) live in [`edu_rag_core`]. This crate
//! adds configuration, the S3-compatible and HTTP backends, retries, the
//! importer, the router, and the CLI command runners.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`backends`] | Backend construction from config |
//! | [`store_s3`] | S3-compatible object store (SigV4) |
//! | [`index_http`] | HTTP/JSON indexing backend |
//! | [`http`] | Status and transport error mapping |
//! | [`retry`] | Bounded exponential backoff |
//! | [`storage`] | Bucket creation and uploads |
//! | [`importer`] | File import into corpora |
//! | [`router`] | Concurrent multi-corpus search |
//! | [`reconcile`] | Catalog rebuild and drift reports |
//! | [`sync`] | Importing a bucket's un-indexed files |
//! | [`progress`] | Sync progress on stderr |
//! | [`commands`] | CLI command runners |

pub mod backends;
pub mod commands;
pub mod config;
pub mod http;
pub mod importer;
pub mod index_http;
pub mod progress;
pub mod reconcile;
pub mod retry;
pub mod router;
pub mod storage;
pub mod store_s3;
pub mod sync;
