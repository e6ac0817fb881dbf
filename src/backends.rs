//! Backend construction from configuration.
//!
//! | `object_store.kind` | `index.kind` | Object store | Index |
//! |---------------------|--------------|--------------|-------|
//! | `memory` | `memory` | [`MemoryObjectStore`] | [`MemoryIndex`] over the same store |
//! | `memory` | `http` | [`MemoryObjectStore`] | [`HttpIndex`] |
//! | `s3` | `http` | [`S3ObjectStore`] | [`HttpIndex`] |
//!
//! `s3` + `memory` is rejected by [`crate::config::load_config`].

use std::sync::Arc;

use anyhow::Result;

use edu_rag_core::backend::memory::{MemoryIndex, MemoryObjectStore};
use edu_rag_core::backend::{IndexBackend, ObjectStore};

use crate::config::{Config, IndexKind, ObjectStoreKind};
use crate::index_http::HttpIndex;
use crate::store_s3::S3ObjectStore;

#[derive(Clone)]
pub struct Backends {
    pub object_store: Arc<dyn ObjectStore>,
    pub index: Arc<dyn IndexBackend>,
}

pub fn build_backends(config: &Config) -> Result<Backends> {
    match (config.object_store.kind, config.index.kind) {
        (ObjectStoreKind::Memory, IndexKind::Memory) => {
            let store = Arc::new(MemoryObjectStore::new());
            let index = Arc::new(MemoryIndex::new(Arc::clone(&store)));
            Ok(Backends {
                object_store: store,
                index,
            })
        }
        (ObjectStoreKind::Memory, IndexKind::Http) => Ok(Backends {
            object_store: Arc::new(MemoryObjectStore::new()),
            index: Arc::new(HttpIndex::new(&config.index)?),
        }),
        (ObjectStoreKind::S3, IndexKind::Http) => Ok(Backends {
            object_store: Arc::new(S3ObjectStore::new(&config.object_store)?),
            index: Arc::new(HttpIndex::new(&config.index)?),
        }),
        (ObjectStoreKind::S3, IndexKind::Memory) => {
            anyhow::bail!("index.kind = \"memory\" requires object_store.kind = \"memory\"")
        }
    }
}
