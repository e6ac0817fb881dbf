//! In-memory [`ObjectStore`] and [`IndexBackend`] for tests and local runs.
//!
//! Uses `BTreeMap`s behind `std::sync::RwLock`. The index reads file bytes
//! from an attached [`MemoryObjectStore`], splits them on blank lines, and
//! scores chunks by the fraction of query terms they contain. Import
//! metadata is kept per file and checked against the search's
//! metadata filter.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{
    BackendCorpus, BackendError, BackendFile, BackendResult, Hit, ImportOptions, IndexBackend,
    ObjectStore, SearchOptions,
};
use crate::codec;

/// Extensions the in-memory index accepts.
const SUPPORTED_EXTENSIONS: &[&str] = &["pdf", "txt", "md", "html", "htm", "json", "csv"];

const SNIPPET_CHARS: usize = 240;

#[derive(Default)]
pub struct MemoryObjectStore {
    containers: RwLock<BTreeMap<String, BTreeMap<String, Vec<u8>>>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_object(&self, container: &str, key: &str) -> Option<Vec<u8>> {
        let containers = self.containers.read().unwrap_or_else(PoisonError::into_inner);
        containers.get(container)?.get(key).cloned()
    }

    /// Remove an object; used to simulate out-of-band deletions.
    pub fn delete_object(&self, container: &str, key: &str) -> bool {
        let mut containers = self.containers.write().unwrap_or_else(PoisonError::into_inner);
        containers
            .get_mut(container)
            .is_some_and(|objects| objects.remove(key).is_some())
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn create_container(&self, name: &str) -> BackendResult<()> {
        let mut containers = self.containers.write().unwrap_or_else(PoisonError::into_inner);
        containers.entry(name.to_string()).or_default();
        Ok(())
    }

    async fn put_object(&self, container: &str, key: &str, bytes: Vec<u8>) -> BackendResult<()> {
        let mut containers = self.containers.write().unwrap_or_else(PoisonError::into_inner);
        let objects = containers
            .get_mut(container)
            .ok_or_else(|| BackendError::NotFound(format!("container {container}")))?;
        objects.insert(key.to_string(), bytes);
        Ok(())
    }

    async fn object_exists(&self, container: &str, key: &str) -> BackendResult<bool> {
        let containers = self.containers.read().unwrap_or_else(PoisonError::into_inner);
        let objects = containers
            .get(container)
            .ok_or_else(|| BackendError::NotFound(format!("container {container}")))?;
        Ok(objects.contains_key(key))
    }

    async fn list_objects(&self, container: &str, prefix: &str) -> BackendResult<Vec<String>> {
        let containers = self.containers.read().unwrap_or_else(PoisonError::into_inner);
        let objects = containers
            .get(container)
            .ok_or_else(|| BackendError::NotFound(format!("container {container}")))?;
        Ok(objects
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

struct IndexedChunk {
    start: usize,
    end: usize,
    text: String,
}

struct IndexedFile {
    file_ref: String,
    imported_at: DateTime<Utc>,
    metadata: BTreeMap<String, String>,
    chunks: Vec<IndexedChunk>,
}

struct MemoryCorpus {
    description: String,
    next_file: u64,
    /// Keyed by source URI.
    files: BTreeMap<String, IndexedFile>,
}

/// In-memory semantic index stand-in. Corpus handles are the corpus names.
pub struct MemoryIndex {
    store: Arc<MemoryObjectStore>,
    corpora: RwLock<BTreeMap<String, MemoryCorpus>>,
}

impl MemoryIndex {
    pub fn new(store: Arc<MemoryObjectStore>) -> Self {
        Self {
            store,
            corpora: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn file_count(&self, corpus_ref: &str) -> usize {
        let corpora = self.corpora.read().unwrap_or_else(PoisonError::into_inner);
        corpora.get(corpus_ref).map_or(0, |c| c.files.len())
    }
}

fn split_paragraphs(text: &str) -> Vec<IndexedChunk> {
    let mut chunks = Vec::new();
    let mut offset = 0;
    for part in text.split("\n\n") {
        let trimmed = part.trim();
        if !trimmed.is_empty() {
            let lead = part.len() - part.trim_start().len();
            let start = offset + lead;
            chunks.push(IndexedChunk {
                start,
                end: start + trimmed.len(),
                text: trimmed.to_string(),
            });
        }
        offset += part.len() + 2;
    }
    chunks
}

fn terms(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 2)
        .map(str::to_lowercase)
        .collect()
}

#[async_trait]
impl IndexBackend for MemoryIndex {
    async fn create_corpus(&self, name: &str, description: &str) -> BackendResult<String> {
        let mut corpora = self.corpora.write().unwrap_or_else(PoisonError::into_inner);
        corpora.entry(name.to_string()).or_insert_with(|| MemoryCorpus {
            description: description.to_string(),
            next_file: 1,
            files: BTreeMap::new(),
        });
        Ok(name.to_string())
    }

    async fn import_object(
        &self,
        corpus_ref: &str,
        uri: &str,
        options: &ImportOptions,
    ) -> BackendResult<String> {
        let location = codec::parse_location_uri(uri)
            .map_err(|e| BackendError::Rejected(e.to_string()))?;
        let extension = location
            .filename
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default();
        if !SUPPORTED_EXTENSIONS.contains(&extension.as_str()) {
            return Err(BackendError::Rejected(format!("unsupported file type: {uri}")));
        }
        let bytes = self
            .store
            .get_object(&location.bucket, &location.key())
            .ok_or_else(|| BackendError::Rejected(format!("object not found: {uri}")))?;
        let chunks = split_paragraphs(&String::from_utf8_lossy(&bytes));
        if chunks.is_empty() {
            return Err(BackendError::Rejected(format!("no extractable text: {uri}")));
        }

        let mut corpora = self.corpora.write().unwrap_or_else(PoisonError::into_inner);
        let corpus = corpora
            .get_mut(corpus_ref)
            .ok_or_else(|| BackendError::NotFound(format!("corpus {corpus_ref}")))?;
        let file_ref = match corpus.files.get(uri) {
            Some(existing) => existing.file_ref.clone(),
            None => {
                let file_ref = format!("{corpus_ref}/files/{}", corpus.next_file);
                corpus.next_file += 1;
                file_ref
            }
        };
        corpus.files.insert(
            uri.to_string(),
            IndexedFile {
                file_ref: file_ref.clone(),
                imported_at: Utc::now(),
                metadata: options.metadata.clone(),
                chunks,
            },
        );
        Ok(file_ref)
    }

    async fn search_corpus(
        &self,
        corpus_ref: &str,
        query: &str,
        options: &SearchOptions,
    ) -> BackendResult<Vec<Hit>> {
        let query_terms = terms(query);
        let corpora = self.corpora.read().unwrap_or_else(PoisonError::into_inner);
        let corpus = corpora
            .get(corpus_ref)
            .ok_or_else(|| BackendError::NotFound(format!("corpus {corpus_ref}")))?;
        if query_terms.is_empty() {
            return Ok(Vec::new());
        }

        let mut hits: Vec<Hit> = corpus
            .files
            .iter()
            .filter(|(_, file)| options.metadata_filter.matches(&file.metadata))
            .flat_map(|(uri, file)| {
                file.chunks.iter().map(move |chunk| (uri, file, chunk))
            })
            .filter_map(|(uri, file, chunk)| {
                let chunk_terms = terms(&chunk.text);
                let matched = query_terms.intersection(&chunk_terms).count();
                if matched == 0 {
                    return None;
                }
                let score = matched as f64 / query_terms.len() as f64;
                if let Some(threshold) = options.distance_threshold {
                    if 1.0 - score > threshold {
                        return None;
                    }
                }
                Some(Hit {
                    snippet: chunk.text.chars().take(SNIPPET_CHARS).collect(),
                    score,
                    chunk_ref: format!("{}:{}-{}", file.file_ref, chunk.start, chunk.end),
                    uri: uri.clone(),
                    metadata: file.metadata.clone(),
                })
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk_ref.cmp(&b.chunk_ref))
        });
        hits.truncate(options.top_k);
        Ok(hits)
    }

    async fn list_corpora(&self) -> BackendResult<Vec<BackendCorpus>> {
        let corpora = self.corpora.read().unwrap_or_else(PoisonError::into_inner);
        Ok(corpora
            .iter()
            .map(|(name, corpus)| BackendCorpus {
                corpus_ref: name.clone(),
                name: name.clone(),
                description: corpus.description.clone(),
            })
            .collect())
    }

    async fn list_files(&self, corpus_ref: &str) -> BackendResult<Vec<BackendFile>> {
        let corpora = self.corpora.read().unwrap_or_else(PoisonError::into_inner);
        let corpus = corpora
            .get(corpus_ref)
            .ok_or_else(|| BackendError::NotFound(format!("corpus {corpus_ref}")))?;
        Ok(corpus
            .files
            .iter()
            .map(|(uri, file)| BackendFile {
                file_ref: file.file_ref.clone(),
                uri: uri.clone(),
                imported_at: Some(file.imported_at),
            })
            .collect())
    }

    async fn delete_file(&self, corpus_ref: &str, file_ref: &str) -> BackendResult<()> {
        let mut corpora = self.corpora.write().unwrap_or_else(PoisonError::into_inner);
        let corpus = corpora
            .get_mut(corpus_ref)
            .ok_or_else(|| BackendError::NotFound(format!("corpus {corpus_ref}")))?;
        let before = corpus.files.len();
        corpus.files.retain(|_, file| file.file_ref != file_ref);
        if corpus.files.len() == before {
            return Err(BackendError::NotFound(format!("file {file_ref}")));
        }
        Ok(())
    }

    async fn delete_corpus(&self, corpus_ref: &str) -> BackendResult<()> {
        let mut corpora = self.corpora.write().unwrap_or_else(PoisonError::into_inner);
        corpora
            .remove(corpus_ref)
            .map(|_| ())
            .ok_or_else(|| BackendError::NotFound(format!("corpus {corpus_ref}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{ContentType, MetadataFilter};

    const URI: &str = "gs://adk-cbse-education/grade-5/science/plants.txt";

    async fn seeded() -> (Arc<MemoryObjectStore>, MemoryIndex) {
        let store = Arc::new(MemoryObjectStore::new());
        store.create_container("adk-cbse-education").await.unwrap();
        store
            .put_object(
                "adk-cbse-education",
                "grade-5/science/plants.txt",
                b"Plants make food by photosynthesis.\n\nRoots absorb water from soil.".to_vec(),
            )
            .await
            .unwrap();
        let index = MemoryIndex::new(Arc::clone(&store));
        index.create_corpus("cbse-grade-5-science", "CBSE Grade 5 Science").await.unwrap();
        (store, index)
    }

    fn opts(top_k: usize) -> SearchOptions {
        SearchOptions {
            top_k,
            distance_threshold: None,
            metadata_filter: MetadataFilter::default(),
        }
    }

    #[tokio::test]
    async fn test_object_store_listing() {
        let store = MemoryObjectStore::new();
        assert!(store.put_object("missing", "k", vec![]).await.is_err());
        store.create_container("b").await.unwrap();
        store.create_container("b").await.unwrap();
        store.put_object("b", "grade-5/x.pdf", vec![1]).await.unwrap();
        store.put_object("b", "grade-6/y.pdf", vec![2]).await.unwrap();
        assert_eq!(store.list_objects("b", "grade-5/").await.unwrap(), vec!["grade-5/x.pdf"]);
        assert!(store.object_exists("b", "grade-6/y.pdf").await.unwrap());
        assert!(!store.object_exists("b", "nope").await.unwrap());
    }

    #[tokio::test]
    async fn test_import_and_search() {
        let (_store, index) = seeded().await;
        let file_ref = index
            .import_object("cbse-grade-5-science", URI, &ImportOptions::default())
            .await
            .unwrap();
        assert_eq!(file_ref, "cbse-grade-5-science/files/1");

        let hits = index
            .search_corpus("cbse-grade-5-science", "photosynthesis", &opts(5))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].uri, URI);
        assert_eq!(hits[0].chunk_ref, "cbse-grade-5-science/files/1:0-35");
        assert!((hits[0].score - 1.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_reimport_keeps_file_ref() {
        let (_store, index) = seeded().await;
        let a = index
            .import_object("cbse-grade-5-science", URI, &ImportOptions::default())
            .await
            .unwrap();
        let b = index
            .import_object("cbse-grade-5-science", URI, &ImportOptions::default())
            .await
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(index.file_count("cbse-grade-5-science"), 1);
    }

    #[tokio::test]
    async fn test_import_rejections() {
        let (_store, index) = seeded().await;
        let missing = index
            .import_object(
                "cbse-grade-5-science",
                "gs://adk-cbse-education/grade-5/science/none.pdf",
                &ImportOptions::default(),
            )
            .await;
        assert!(matches!(missing, Err(BackendError::Rejected(_))));

        let unsupported = index
            .import_object(
                "cbse-grade-5-science",
                "gs://adk-cbse-education/grade-5/science/tool.exe",
                &ImportOptions::default(),
            )
            .await;
        assert!(matches!(unsupported, Err(BackendError::Rejected(_))));

        let unknown = index
            .import_object("no-such-corpus", URI, &ImportOptions::default())
            .await;
        assert!(matches!(unknown, Err(BackendError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_distance_threshold_filters_weak_hits() {
        let (_store, index) = seeded().await;
        index
            .import_object("cbse-grade-5-science", URI, &ImportOptions::default())
            .await
            .unwrap();
        let strict = SearchOptions {
            top_k: 5,
            distance_threshold: Some(0.2),
            ..opts(5)
        };
        let hits = index
            .search_corpus("cbse-grade-5-science", "roots absorb sunlight", &strict)
            .await
            .unwrap();
        assert!(hits.is_empty());
        let loose = index
            .search_corpus("cbse-grade-5-science", "roots absorb sunlight", &opts(5))
            .await
            .unwrap();
        assert_eq!(loose.len(), 1);
    }

    #[tokio::test]
    async fn test_list_and_delete() {
        let (_store, index) = seeded().await;
        index
            .import_object("cbse-grade-5-science", URI, &ImportOptions::default())
            .await
            .unwrap();
        let corpora = index.list_corpora().await.unwrap();
        assert_eq!(corpora.len(), 1);
        assert_eq!(corpora[0].description, "CBSE Grade 5 Science");
        let files = index.list_files("cbse-grade-5-science").await.unwrap();
        assert_eq!(files[0].uri, URI);
        index.delete_corpus("cbse-grade-5-science").await.unwrap();
        assert!(index.list_corpora().await.unwrap().is_empty());
        assert!(matches!(
            index.delete_corpus("cbse-grade-5-science").await,
            Err(BackendError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_metadata_filter_excludes_other_files() {
        let (store, index) = seeded().await;
        store
            .put_object(
                "adk-cbse-education",
                "grade-5/science/plants-exercises.txt",
                b"Name three plants that make food by photosynthesis.".to_vec(),
            )
            .await
            .unwrap();
        let theory = ImportOptions {
            metadata: [("content_type".to_string(), "theory".to_string())].into(),
            ..Default::default()
        };
        let exercises = ImportOptions {
            metadata: [("content_type".to_string(), "exercises".to_string())].into(),
            ..Default::default()
        };
        index.import_object("cbse-grade-5-science", URI, &theory).await.unwrap();
        index
            .import_object(
                "cbse-grade-5-science",
                "gs://adk-cbse-education/grade-5/science/plants-exercises.txt",
                &exercises,
            )
            .await
            .unwrap();

        let all = index
            .search_corpus("cbse-grade-5-science", "photosynthesis", &opts(5))
            .await
            .unwrap();
        assert_eq!(all.len(), 2);

        let filtered = SearchOptions {
            metadata_filter: MetadataFilter {
                content_type: Some(ContentType::Exercises),
                ..Default::default()
            },
            ..opts(5)
        };
        let hits = index
            .search_corpus("cbse-grade-5-science", "photosynthesis", &filtered)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].uri.ends_with("plants-exercises.txt"));
        assert_eq!(hits[0].metadata["content_type"], "exercises");
    }

    #[tokio::test]
    async fn test_delete_file_by_ref() {
        let (_store, index) = seeded().await;
        let file_ref = index
            .import_object("cbse-grade-5-science", URI, &ImportOptions::default())
            .await
            .unwrap();
        index.delete_file("cbse-grade-5-science", &file_ref).await.unwrap();
        assert_eq!(index.file_count("cbse-grade-5-science"), 0);
        assert!(matches!(
            index.delete_file("cbse-grade-5-science", &file_ref).await,
            Err(BackendError::NotFound(_))
        ));
    }
}
