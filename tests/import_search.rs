//! Import and search flows over the in-memory backends, with a wrapping
//! index that counts calls and injects failures.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use edu_rag::backends::Backends;
use edu_rag::commands::Outcome;
use edu_rag::config::ImportConfig;
use edu_rag::importer::Importer;
use edu_rag::progress::{SyncProgressEvent, SyncProgressReporter};
use edu_rag::reconcile::{drift_for_board, rebuild_catalog};
use edu_rag::retry::RetryPolicy;
use edu_rag::router::{QueryRouter, RouterSettings, Scope, SearchWarning};
use edu_rag::storage;
use edu_rag::sync::sync_board;
use edu_rag_core::backend::memory::{MemoryIndex, MemoryObjectStore};
use edu_rag_core::backend::{
    BackendCorpus, BackendFile, BackendResult, Hit, ImportOptions, IndexBackend, ObjectStore,
    SearchOptions,
};
use edu_rag_core::catalog::Catalog;
use edu_rag_core::metadata::{ContentType, FileMetadata, MetadataFilter};
use edu_rag_core::models::{LogicalCoordinate, ObjectLocation};
use edu_rag_core::{codec, BackendError, Error};

// ============ Test index ============

#[derive(Default)]
struct Faults {
    /// Corpus refs whose searches fail.
    failing: HashSet<String>,
    /// Corpus refs whose searches hang for a long time.
    slow: HashSet<String>,
    /// Search every file regardless of the metadata filter.
    ignore_metadata_filter: bool,
}

/// Counts a slow call that was dropped before it finished.
struct AbandonGuard<'a> {
    abandoned: &'a AtomicUsize,
    finished: bool,
}

impl Drop for AbandonGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.abandoned.fetch_add(1, Ordering::SeqCst);
        }
    }
}

struct TestIndex {
    inner: MemoryIndex,
    faults: Mutex<Faults>,
    create_calls: AtomicUsize,
    import_calls: AtomicUsize,
    search_calls: AtomicUsize,
    /// Slow searches that ran to completion.
    slow_finished: AtomicUsize,
    /// Slow searches dropped while still sleeping.
    slow_abandoned: AtomicUsize,
    /// Remaining imports that fail with a transient error.
    transient_imports: AtomicU32,
}

impl TestIndex {
    fn new(store: Arc<MemoryObjectStore>) -> Self {
        Self {
            inner: MemoryIndex::new(store),
            faults: Mutex::new(Faults::default()),
            create_calls: AtomicUsize::new(0),
            import_calls: AtomicUsize::new(0),
            search_calls: AtomicUsize::new(0),
            slow_finished: AtomicUsize::new(0),
            slow_abandoned: AtomicUsize::new(0),
            transient_imports: AtomicU32::new(0),
        }
    }

    fn fail_searches(&self, corpus_ref: &str) {
        self.faults.lock().unwrap().failing.insert(corpus_ref.to_string());
    }

    fn slow_searches(&self, corpus_ref: &str) {
        self.faults.lock().unwrap().slow.insert(corpus_ref.to_string());
    }
}

#[async_trait]
impl IndexBackend for TestIndex {
    async fn create_corpus(&self, name: &str, description: &str) -> BackendResult<String> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        // Widen the window in which a racing importer could double-create.
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.inner.create_corpus(name, description).await
    }

    async fn import_object(
        &self,
        corpus_ref: &str,
        uri: &str,
        options: &ImportOptions,
    ) -> BackendResult<String> {
        self.import_calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.transient_imports.load(Ordering::SeqCst);
        if remaining > 0 {
            self.transient_imports.store(remaining - 1, Ordering::SeqCst);
            return Err(BackendError::Transient("503 service unavailable".into()));
        }
        self.inner.import_object(corpus_ref, uri, options).await
    }

    async fn search_corpus(
        &self,
        corpus_ref: &str,
        query: &str,
        options: &SearchOptions,
    ) -> BackendResult<Vec<Hit>> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        let (failing, slow, ignore_filter) = {
            let faults = self.faults.lock().unwrap();
            (
                faults.failing.contains(corpus_ref),
                faults.slow.contains(corpus_ref),
                faults.ignore_metadata_filter,
            )
        };
        if failing {
            return Err(BackendError::Unavailable("connection reset".into()));
        }
        if slow {
            let mut guard = AbandonGuard {
                abandoned: &self.slow_abandoned,
                finished: false,
            };
            tokio::time::sleep(Duration::from_secs(30)).await;
            guard.finished = true;
            self.slow_finished.fetch_add(1, Ordering::SeqCst);
        }
        if ignore_filter {
            let unfiltered = SearchOptions {
                metadata_filter: MetadataFilter::default(),
                ..options.clone()
            };
            return self.inner.search_corpus(corpus_ref, query, &unfiltered).await;
        }
        self.inner.search_corpus(corpus_ref, query, options).await
    }

    async fn list_corpora(&self) -> BackendResult<Vec<BackendCorpus>> {
        self.inner.list_corpora().await
    }

    async fn list_files(&self, corpus_ref: &str) -> BackendResult<Vec<BackendFile>> {
        self.inner.list_files(corpus_ref).await
    }

    async fn delete_file(&self, corpus_ref: &str, file_ref: &str) -> BackendResult<()> {
        self.inner.delete_file(corpus_ref, file_ref).await
    }

    async fn delete_corpus(&self, corpus_ref: &str) -> BackendResult<()> {
        self.inner.delete_corpus(corpus_ref).await
    }
}

// ============ Fixtures ============

struct Harness {
    store: Arc<MemoryObjectStore>,
    index: Arc<TestIndex>,
    catalog: Arc<Catalog>,
    importer: Importer,
    retry: RetryPolicy,
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 4,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(4),
        attempt_timeout: Duration::from_secs(5),
    }
}

fn harness() -> Harness {
    let store = Arc::new(MemoryObjectStore::new());
    let index = Arc::new(TestIndex::new(Arc::clone(&store)));
    let catalog = Arc::new(Catalog::new());
    let retry = fast_retry();
    let importer = Importer::new(
        Arc::clone(&catalog),
        Arc::clone(&index) as Arc<dyn IndexBackend>,
        retry.clone(),
    );
    Harness {
        store,
        index,
        catalog,
        importer,
        retry,
    }
}

fn settings() -> RouterSettings {
    RouterSettings {
        top_k_per_corpus: 5,
        top_k_single: 10,
        final_limit: 12,
        per_call_timeout: Duration::from_secs(5),
        distance_threshold: None,
    }
}

impl Harness {
    fn backends(&self) -> Backends {
        Backends {
            object_store: Arc::clone(&self.store) as Arc<dyn ObjectStore>,
            index: Arc::clone(&self.index) as Arc<dyn IndexBackend>,
        }
    }

    fn router(&self, settings: RouterSettings) -> QueryRouter {
        QueryRouter::new(
            Arc::clone(&self.catalog),
            Arc::clone(&self.index) as Arc<dyn IndexBackend>,
            settings,
        )
    }

    async fn upload(&self, board: &str, grade: u8, subject: &str, filename: &str, text: &str) -> ObjectLocation {
        storage::create_bucket(self.store.as_ref(), board, &self.retry)
            .await
            .unwrap();
        let coordinate = LogicalCoordinate::new(board, grade, subject).unwrap();
        storage::upload_file(
            self.store.as_ref(),
            &coordinate,
            filename,
            text.as_bytes().to_vec(),
            &self.retry,
        )
        .await
        .unwrap()
    }

    async fn upload_and_import(&self, board: &str, grade: u8, subject: &str, filename: &str, text: &str) -> ObjectLocation {
        let location = self.upload(board, grade, subject, filename, text).await;
        self.importer
            .import_file(&location, &ImportOptions::default())
            .await
            .unwrap();
        location
    }
}

const PHOTOSYNTHESIS: &str = "Photosynthesis is how green plants make food from sunlight.\n\nLeaves contain chlorophyll.";

// ============ Import ============

#[tokio::test]
async fn test_import_records_provenance_at_canonical_location() {
    let h = harness();
    let coordinate = LogicalCoordinate::new("cbse", 5, "mathematics").unwrap();
    let location = codec::encode_location(&coordinate, "chapter-1.pdf").unwrap();
    assert_eq!(location.bucket, "adk-cbse-education");
    assert_eq!(location.key(), "grade-5/mathematics/chapter-1.pdf");
    assert_eq!(codec::encode_corpus_id(&coordinate).as_str(), "cbse-grade-5-mathematics");

    h.upload_and_import("cbse", 5, "mathematics", "chapter-1.pdf", "Fractions are parts of a whole.")
        .await;

    let record = h.catalog.record_for("cbse-grade-5-mathematics").unwrap();
    assert_eq!(record.members.len(), 1);
    let import = record.members.values().next().unwrap();
    assert_eq!(
        import.source_location.to_string(),
        "gs://adk-cbse-education/grade-5/mathematics/chapter-1.pdf"
    );
    assert_eq!(record.description, "CBSE Grade 5 Mathematics");
}

#[tokio::test]
async fn test_reimport_is_idempotent() {
    let h = harness();
    let location = h
        .upload_and_import("cbse", 5, "science", "plants.txt", PHOTOSYNTHESIS)
        .await;
    let first = h.catalog.record_for("cbse-grade-5-science").unwrap();

    let again = h
        .importer
        .import_file(&location, &ImportOptions::default())
        .await
        .unwrap();

    let second = h.catalog.record_for("cbse-grade-5-science").unwrap();
    assert_eq!(second.members.len(), 1);
    assert_eq!(first.members, second.members);
    assert_eq!(again.backend_file_ref, first.members[&location].backend_file_ref);
    assert_eq!(h.index.inner.file_count("cbse-grade-5-science"), 1);
    assert_eq!(h.index.create_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_transient_import_failures_are_retried() {
    let h = harness();
    let location = h.upload("cbse", 6, "science", "cells.md", "Cells are units of life.").await;
    h.index.transient_imports.store(2, Ordering::SeqCst);

    h.importer
        .import_file(&location, &ImportOptions::default())
        .await
        .unwrap();

    assert_eq!(h.index.import_calls.load(Ordering::SeqCst), 3);
    assert!(h.catalog.contains(&location));
}

#[tokio::test]
async fn test_exhausted_retries_leave_catalog_unchanged() {
    let h = harness();
    let location = h.upload("cbse", 6, "science", "cells.md", "Cells are units of life.").await;
    h.index.transient_imports.store(10, Ordering::SeqCst);

    let err = h
        .importer
        .import_file(&location, &ImportOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::BackendUnavailable { .. }), "{err}");
    assert_eq!(h.index.import_calls.load(Ordering::SeqCst), 4);
    assert!(h.catalog.is_empty());
}

#[tokio::test]
async fn test_rejected_import_leaves_catalog_unchanged() {
    let h = harness();
    let location = h
        .upload("cbse", 5, "science", "worksheet.docx", "Label the parts of a flower.")
        .await;

    let err = h
        .importer
        .import_file(&location, &ImportOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::IngestionRejected { .. }), "{err}");
    assert!(!err.is_caller_error());
    assert!(!h.catalog.contains(&location));
    assert!(matches!(
        h.catalog.record_for("cbse-grade-5-science"),
        Err(Error::UnknownCorpus { .. })
    ));
    // Rejections are permanent.
    assert_eq!(h.index.import_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_import_of_undecodable_location_makes_no_backend_call() {
    let h = harness();
    let location = ObjectLocation {
        bucket: "adk-cbse-education".into(),
        path: vec!["misc".into()],
        filename: "notes.txt".into(),
    };

    let err = h
        .importer
        .import_file(&location, &ImportOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::InvalidCoordinate { .. }), "{err}");
    assert_eq!(h.index.create_calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.index.import_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_concurrent_first_imports_create_one_corpus() {
    let h = harness();
    let a = h.upload("icse", 8, "history", "mughals.txt", "The Mughal empire.").await;
    let b = h.upload("icse", 8, "history", "marathas.txt", "The Maratha confederacy.").await;

    let options = ImportOptions::default();
    let (ra, rb) = tokio::join!(
        h.importer.import_file(&a, &options),
        h.importer.import_file(&b, &options)
    );
    ra.unwrap();
    rb.unwrap();

    assert_eq!(h.index.create_calls.load(Ordering::SeqCst), 1);
    let record = h.catalog.record_for("icse-grade-8-history").unwrap();
    assert_eq!(record.members.len(), 2);
}

#[tokio::test]
async fn test_delete_corpus_purges_catalog() {
    let h = harness();
    h.upload_and_import("cbse", 5, "science", "plants.txt", PHOTOSYNTHESIS)
        .await;

    let removed = h.importer.delete_corpus("cbse-grade-5-science").await.unwrap();
    assert_eq!(removed.members.len(), 1);
    assert!(h.catalog.is_empty());
    assert!(h.index.list_corpora().await.unwrap().is_empty());
}

// ============ Search ============

async fn three_science_corpora(h: &Harness) {
    h.upload_and_import("cbse", 5, "science", "plants.txt", PHOTOSYNTHESIS)
        .await;
    h.upload_and_import("cbse", 6, "science", "leaves.txt", PHOTOSYNTHESIS)
        .await;
    h.upload_and_import("icse", 7, "science", "energy.txt", PHOTOSYNTHESIS)
        .await;
}

#[tokio::test]
async fn test_search_all_dispatches_once_per_corpus() {
    let h = harness();
    three_science_corpora(&h).await;
    h.index.search_calls.store(0, Ordering::SeqCst);

    let router = h.router(RouterSettings {
        final_limit: 2,
        ..settings()
    });
    let response = router.search("What is photosynthesis?", &Scope::All).await.unwrap();

    assert_eq!(h.index.search_calls.load(Ordering::SeqCst), 3);
    assert_eq!(response.searched.len(), 3);
    assert_eq!(response.results.len(), 2);
    assert!(response.warnings.is_empty());
    for cited in &response.results {
        assert!(cited.citation.starts_with("[Source: "), "{}", cited.citation);
        assert!(cited.result.snippet.contains("Photosynthesis"));
    }
}

#[tokio::test]
async fn test_equal_scores_order_by_corpus_id() {
    let h = harness();
    h.upload_and_import("icse", 7, "science", "energy.txt", PHOTOSYNTHESIS)
        .await;
    h.upload_and_import("cbse", 7, "science", "energy.txt", PHOTOSYNTHESIS)
        .await;

    let response = h
        .router(settings())
        .search("photosynthesis", &Scope::All)
        .await
        .unwrap();

    let order: Vec<&str> = response
        .results
        .iter()
        .map(|r| r.result.corpus_id.as_str())
        .collect();
    assert_eq!(order, vec!["cbse-grade-7-science", "icse-grade-7-science"]);
}

#[tokio::test]
async fn test_subject_scope_only_searches_that_subject() {
    let h = harness();
    three_science_corpora(&h).await;
    h.upload_and_import("cbse", 5, "mathematics", "sums.txt", "Photosynthesis has nothing to do with sums.")
        .await;
    h.index.search_calls.store(0, Ordering::SeqCst);

    let response = h
        .router(settings())
        .search("photosynthesis", &Scope::BySubject("science".into()))
        .await
        .unwrap();

    assert_eq!(h.index.search_calls.load(Ordering::SeqCst), 3);
    assert!(response
        .results
        .iter()
        .all(|r| r.result.corpus_id.coordinate().subject() == "science"));
}

#[tokio::test]
async fn test_single_corpus_search() {
    let h = harness();
    three_science_corpora(&h).await;

    let response = h
        .router(settings())
        .search("chlorophyll", &Scope::Single("cbse-grade-6-science".into()))
        .await
        .unwrap();

    assert_eq!(response.searched.len(), 1);
    assert_eq!(response.results.len(), 1);
    assert_eq!(
        response.results[0].result.source_location.uri(),
        "gs://adk-cbse-education/grade-6/science/leaves.txt"
    );
}

#[tokio::test]
async fn test_unknown_corpus_and_empty_scope() {
    let h = harness();
    three_science_corpora(&h).await;
    h.index.search_calls.store(0, Ordering::SeqCst);
    let router = h.router(settings());

    let err = router
        .search("photosynthesis", &Scope::Single("cbse-grade-9-history".into()))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UnknownCorpus { .. }), "{err}");

    let err = router
        .search("photosynthesis", &Scope::BySubject("history".into()))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::EmptyScope { .. }), "{err}");
    assert!(err.is_caller_error());

    assert_eq!(h.index.search_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_one_failing_corpus_of_five_is_partial() {
    let h = harness();
    for grade in 4..=8 {
        h.upload_and_import("cbse", grade, "science", "plants.txt", PHOTOSYNTHESIS)
            .await;
    }
    h.index.fail_searches("cbse-grade-6-science");

    let response = h
        .router(settings())
        .search("photosynthesis", &Scope::All)
        .await
        .unwrap();

    assert!(response.is_partial());
    assert_eq!(response.searched.len(), 5);
    assert_eq!(response.warnings.len(), 1);
    match &response.warnings[0] {
        SearchWarning::PartialFailure { corpus_id, .. } => {
            assert_eq!(corpus_id, "cbse-grade-6-science")
        }
        other => panic!("unexpected warning {other:?}"),
    }
    assert!(!response.results.is_empty());
    assert!(response
        .results
        .iter()
        .all(|r| r.result.corpus_id.as_str() != "cbse-grade-6-science"));
}

#[tokio::test]
async fn test_all_targets_failed() {
    let h = harness();
    three_science_corpora(&h).await;
    for id in ["cbse-grade-5-science", "cbse-grade-6-science", "icse-grade-7-science"] {
        h.index.fail_searches(id);
    }

    let err = h
        .router(settings())
        .search("photosynthesis", &Scope::All)
        .await
        .unwrap_err();

    match err {
        Error::AllTargetsFailed { failures } => assert_eq!(failures.len(), 3),
        other => panic!("unexpected error {other}"),
    }
}

#[tokio::test]
async fn test_slow_corpus_times_out_as_partial() {
    let h = harness();
    three_science_corpora(&h).await;
    h.index.slow_searches("icse-grade-7-science");

    let response = h
        .router(RouterSettings {
            per_call_timeout: Duration::from_millis(100),
            ..settings()
        })
        .search("photosynthesis", &Scope::All)
        .await
        .unwrap();

    assert!(response.is_partial());
    match &response.warnings[0] {
        SearchWarning::PartialFailure { corpus_id, reason } => {
            assert_eq!(corpus_id, "icse-grade-7-science");
            assert!(reason.contains("timed out"), "{reason}");
        }
        other => panic!("unexpected warning {other:?}"),
    }
    assert_eq!(response.results.len(), 2);
}

#[tokio::test]
async fn test_cancellation_aborts_search() {
    let h = harness();
    three_science_corpora(&h).await;
    h.index.slow_searches("cbse-grade-5-science");

    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let started = std::time::Instant::now();
    let err = h
        .router(settings())
        .search_with_cancel("photosynthesis", &Scope::All, &token)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Cancelled), "{err}");
    assert!(started.elapsed() < Duration::from_secs(5));

    // The in-flight backend call is dropped, not left running.
    tokio::time::timeout(Duration::from_secs(2), async {
        while h.index.slow_abandoned.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("slow search was never dropped");
    assert_eq!(h.index.slow_abandoned.load(Ordering::SeqCst), 1);
    assert_eq!(h.index.slow_finished.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_blank_query_returns_no_results() {
    let h = harness();
    three_science_corpora(&h).await;
    h.index.search_calls.store(0, Ordering::SeqCst);

    let response = h.router(settings()).search("   ", &Scope::All).await.unwrap();
    assert!(response.results.is_empty());
    assert_eq!(h.index.search_calls.load(Ordering::SeqCst), 0);
}

async fn import_with_content_type(h: &Harness, location: &ObjectLocation, content_type: ContentType) {
    let coordinate = codec::decode_location(location).unwrap();
    let options = ImportOptions {
        metadata: FileMetadata {
            content_type: Some(content_type),
            ..Default::default()
        }
        .to_fields(&coordinate),
        ..Default::default()
    };
    h.importer.import_file(location, &options).await.unwrap();
}

async fn theory_and_exercises(h: &Harness) -> (ObjectLocation, ObjectLocation) {
    let theory = h.upload("cbse", 5, "science", "plants.txt", PHOTOSYNTHESIS).await;
    let exercises = h
        .upload("cbse", 5, "science", "plants-exercises.txt", "Explain photosynthesis in two sentences.")
        .await;
    import_with_content_type(h, &theory, ContentType::Theory).await;
    import_with_content_type(h, &exercises, ContentType::Exercises).await;
    (theory, exercises)
}

fn exercises_only() -> MetadataFilter {
    MetadataFilter {
        content_type: Some(ContentType::Exercises),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_metadata_filter_excludes_other_content() {
    let h = harness();
    let (_theory, exercises) = theory_and_exercises(&h).await;
    let router = h.router(settings());

    let everything = router.search("photosynthesis", &Scope::All).await.unwrap();
    assert_eq!(everything.results.len(), 2);

    let response = router
        .search_filtered("photosynthesis", &Scope::All, &exercises_only(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(response.results.len(), 1);
    assert_eq!(response.results[0].result.source_location, exercises);
    assert!(response.warnings.is_empty());
}

#[tokio::test]
async fn test_metadata_filter_applies_when_backend_ignores_it() {
    let h = harness();
    let (_theory, exercises) = theory_and_exercises(&h).await;
    h.index.faults.lock().unwrap().ignore_metadata_filter = true;

    let response = h
        .router(settings())
        .search_filtered(
            "photosynthesis",
            &Scope::Single("cbse-grade-5-science".into()),
            &exercises_only(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(response.results.len(), 1);
    assert_eq!(response.results[0].result.source_location, exercises);
}

#[tokio::test]
async fn test_removed_file_leaves_search_and_reappears_in_drift() {
    let h = harness();
    let kept = h
        .upload_and_import("cbse", 5, "science", "plants.txt", PHOTOSYNTHESIS)
        .await;
    let removed = h
        .upload_and_import("cbse", 5, "science", "leaves.txt", "Photosynthesis happens in leaves.")
        .await;

    let import = h
        .importer
        .remove_file("cbse-grade-5-science", &removed)
        .await
        .unwrap();
    assert_eq!(import.source_location, removed);

    let record = h.catalog.record_for("cbse-grade-5-science").unwrap();
    assert_eq!(record.members.keys().collect::<Vec<_>>(), vec![&kept]);
    assert_eq!(h.index.inner.file_count("cbse-grade-5-science"), 1);

    let response = h
        .router(settings())
        .search("photosynthesis", &Scope::Single("cbse-grade-5-science".into()))
        .await
        .unwrap();
    assert_eq!(response.results.len(), 1);
    assert_eq!(response.results[0].result.source_location, kept);

    let report = drift_for_board(&h.catalog, h.store.as_ref(), "cbse", &h.retry)
        .await
        .unwrap();
    assert_eq!(report.unindexed, vec![removed.clone()]);
    assert!(report.missing.is_empty());

    let err = h
        .importer
        .remove_file("cbse-grade-5-science", &removed)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UnknownFile { .. }), "{err}");
    assert!(err.is_caller_error());
}

// ============ Reconcile & drift ============

#[tokio::test]
async fn test_rebuild_catalog_from_index() {
    let h = harness();
    three_science_corpora(&h).await;
    h.index
        .create_corpus("scratch-notes", "not managed by erag")
        .await
        .unwrap();

    let fresh = Catalog::new();
    let report = rebuild_catalog(&fresh, h.index.as_ref(), &h.retry).await.unwrap();

    assert_eq!(report.corpora, 3);
    assert_eq!(report.imports, 3);
    assert_eq!(report.skipped_corpora, vec!["scratch-notes".to_string()]);
    assert!(report.foreign_files.is_empty());

    let original = h.catalog.record_for("cbse-grade-6-science").unwrap();
    let rebuilt = fresh.record_for("cbse-grade-6-science").unwrap();
    assert_eq!(original.backend_ref, rebuilt.backend_ref);
    assert_eq!(
        original.members.keys().collect::<Vec<_>>(),
        rebuilt.members.keys().collect::<Vec<_>>()
    );
}

#[tokio::test]
async fn test_drift_reports_unindexed_and_missing() {
    let h = harness();
    let indexed = h
        .upload_and_import("cbse", 5, "science", "plants.txt", PHOTOSYNTHESIS)
        .await;
    let pending = h.upload("cbse", 5, "science", "animals.txt", "Animals eat plants.").await;
    h.store.delete_object(&indexed.bucket, &indexed.key());
    h.store
        .put_object("adk-cbse-education", "readme.txt", b"hello".to_vec())
        .await
        .unwrap();
    h.store
        .put_object("adk-cbse-education", "grade-5//stray.txt", b"hello".to_vec())
        .await
        .unwrap();

    let report = drift_for_board(&h.catalog, h.store.as_ref(), "cbse", &h.retry)
        .await
        .unwrap();

    assert_eq!(report.bucket, "adk-cbse-education");
    assert_eq!(report.unindexed, vec![pending]);
    assert_eq!(report.missing, vec![indexed]);
    assert_eq!(report.undecodable.len(), 1);
    assert_eq!(report.unreadable_keys, vec!["grade-5//stray.txt".to_string()]);
    assert!(!report.is_clean());
}

// ============ Sync ============

#[derive(Default)]
struct RecordingProgress {
    events: Mutex<Vec<SyncProgressEvent>>,
}

impl SyncProgressReporter for RecordingProgress {
    fn report(&self, event: SyncProgressEvent) {
        self.events.lock().unwrap().push(event);
    }
}

impl RecordingProgress {
    fn events(&self) -> Vec<SyncProgressEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[tokio::test]
async fn test_sync_imports_only_unindexed_objects() {
    let h = harness();
    let indexed = h
        .upload_and_import("cbse", 5, "science", "plants.txt", PHOTOSYNTHESIS)
        .await;
    let animals = h.upload("cbse", 5, "science", "animals.txt", "Animals eat plants.").await;
    let sums = h.upload("cbse", 6, "mathematics", "sums.md", "Add the numbers together.").await;
    h.store
        .put_object("adk-cbse-education", "readme.txt", b"hello".to_vec())
        .await
        .unwrap();
    h.index.import_calls.store(0, Ordering::SeqCst);

    let progress = RecordingProgress::default();
    let report = sync_board(
        &h.backends(),
        &h.catalog,
        &ImportConfig::default(),
        &h.retry,
        "cbse",
        &progress,
    )
    .await
    .unwrap();

    assert_eq!(report.imported, vec![animals.clone(), sums.clone()]);
    assert!(report.rejected.is_empty());
    assert_eq!(report.skipped, 1);
    assert_eq!(report.outcome(), Outcome::Complete);
    assert_eq!(h.index.import_calls.load(Ordering::SeqCst), 2);
    assert!(h.catalog.contains(&indexed));
    assert!(h.catalog.contains(&animals));
    assert!(h.catalog.contains(&sums));

    let events = progress.events();
    assert_eq!(events.len(), 3);
    assert_eq!(
        events[0],
        SyncProgressEvent::Scanning {
            bucket: "adk-cbse-education".into()
        }
    );
    assert_eq!(
        events[2],
        SyncProgressEvent::Importing {
            bucket: "adk-cbse-education".into(),
            done: 2,
            total: 2,
            uri: sums.uri(),
        }
    );
}

#[tokio::test]
async fn test_sync_with_rejected_file_is_partial() {
    let h = harness();
    let good = h.upload("cbse", 5, "science", "good.txt", PHOTOSYNTHESIS).await;
    let bad = h
        .upload("cbse", 5, "science", "worksheet.docx", "Label the parts of a flower.")
        .await;

    let progress = RecordingProgress::default();
    let report = sync_board(
        &h.backends(),
        &h.catalog,
        &ImportConfig::default(),
        &h.retry,
        "cbse",
        &progress,
    )
    .await
    .unwrap();

    assert_eq!(report.imported, vec![good]);
    assert_eq!(report.rejected.len(), 1);
    assert_eq!(report.rejected[0].uri, bad.uri());
    assert!(!h.catalog.contains(&bad));
    assert_eq!(report.outcome(), Outcome::Partial);
    assert_eq!(report.outcome().exit_code(), 3);
    assert_eq!(progress.events().len(), 3);
}

#[tokio::test]
async fn test_sync_of_missing_bucket_is_backend_error() {
    let h = harness();
    let err = sync_board(
        &h.backends(),
        &h.catalog,
        &ImportConfig::default(),
        &h.retry,
        "cbse",
        &RecordingProgress::default(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, Error::BackendUnavailable { .. }), "{err}");
}
