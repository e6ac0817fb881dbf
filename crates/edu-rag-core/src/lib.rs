//! # edu-rag core
//!
//! Pure mapping logic for edu-rag: the identifier codec, the catalog of
//! corpora, result aggregation with citations, and the traits through
//! which the application talks to the object store and the indexing
//! backend.
//!
//! This crate performs no network or filesystem I/O. It has no tokio
//! dependency outside of tests; the in-memory backends return
//! immediately-ready futures.

pub mod aggregate;
pub mod backend;
pub mod catalog;
pub mod codec;
pub mod error;
pub mod filter;
pub mod metadata;
pub mod models;

pub use error::{BackendError, Error, ErrorKind, Result};
