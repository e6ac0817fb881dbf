//! HTTP/JSON indexing backend client.
//!
//! Speaks a small REST contract that a managed RAG service (or a thin
//! adapter in front of one) exposes:
//!
//! | Operation | Request | Response |
//! |-----------|---------|----------|
//! | create corpus | `POST /corpora` `{name, description}` | `{corpus_ref}` |
//! | import file | `POST /corpora/{ref}/files` `{uri, chunk_size?, chunk_overlap?, metadata}` | `{file_ref}` |
//! | search | `POST /corpora/{ref}/search` `{query, top_k, distance_threshold?, metadata_filter?}` | `{hits: [{snippet, score, chunk_ref, uri, metadata?}]}` |
//! | list corpora | `GET /corpora` | `{corpora: [{corpus_ref, name, description}]}` |
//! | list files | `GET /corpora/{ref}/files` | `{files: [{file_ref, uri, imported_at?}]}` |
//! | delete file | `DELETE /corpora/{ref}/files/{file_ref}` | any |
//! | delete corpus | `DELETE /corpora/{ref}` | any |
//!
//! `metadata_filter` is a flat object of field equalities, using the same
//! keys as the import `metadata`.
//!
//! Corpus refs are sent as single percent-encoded path segments. When
//! `index.api_key_env` is set, its value is sent as a bearer token.
//! Status codes map onto [`BackendError`] as described in
//! [`crate::http`]; the importer decides whether to retry.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Url;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use edu_rag_core::backend::{
    BackendCorpus, BackendFile, BackendResult, Hit, ImportOptions, IndexBackend, SearchOptions,
};
use edu_rag_core::BackendError;

use crate::config::IndexConfig;
use crate::http::{classify_transport, error_from_response};

pub struct HttpIndex {
    client: reqwest::Client,
    base_url: Url,
    api_key: Option<String>,
}

#[derive(Serialize)]
struct CreateCorpusRequest<'a> {
    name: &'a str,
    description: &'a str,
}

#[derive(Deserialize)]
struct CreateCorpusResponse {
    corpus_ref: String,
}

#[derive(Serialize)]
struct ImportRequest<'a> {
    uri: &'a str,
    #[serde(flatten)]
    options: &'a ImportOptions,
}

#[derive(Deserialize)]
struct ImportResponse {
    file_ref: String,
}

#[derive(Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
    #[serde(flatten)]
    options: &'a SearchOptions,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    hits: Vec<Hit>,
}

#[derive(Deserialize)]
struct ListCorporaResponse {
    #[serde(default)]
    corpora: Vec<BackendCorpus>,
}

#[derive(Deserialize)]
struct ListFilesResponse {
    #[serde(default)]
    files: Vec<BackendFile>,
}

impl HttpIndex {
    /// Build a client from config.
    ///
    /// # Errors
    ///
    /// Returns an error if `base_url` is missing or invalid, or if
    /// `api_key_env` names a variable that is not set.
    pub fn new(config: &IndexConfig) -> Result<Self> {
        let raw = config
            .base_url
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("index.base_url required for the http index"))?;
        let base_url =
            Url::parse(raw).with_context(|| format!("Invalid index.base_url: {}", raw))?;
        if base_url.cannot_be_a_base() {
            anyhow::bail!("index.base_url cannot be used as a base URL: {}", raw);
        }

        let api_key = match &config.api_key_env {
            Some(var) => Some(
                std::env::var(var).with_context(|| format!("{} environment variable not set", var))?,
            ),
            None => None,
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url,
            api_key,
        })
    }

    fn url(&self, segments: &[&str]) -> BackendResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| BackendError::Unavailable("index base URL cannot take a path".into()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, method: reqwest::Method, url: Url) -> reqwest::RequestBuilder {
        let req = self.client.request(method, url);
        match &self.api_key {
            Some(key) => req.bearer_auth(key),
            None => req,
        }
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        req: reqwest::RequestBuilder,
        what: &str,
    ) -> BackendResult<T> {
        let resp = req.send().await.map_err(|e| classify_transport(&e))?;
        if !resp.status().is_success() {
            return Err(error_from_response(resp).await);
        }
        resp.json::<T>()
            .await
            .map_err(|e| BackendError::Unavailable(format!("invalid {what} response: {e}")))
    }

    async fn send_delete(&self, url: Url) -> BackendResult<()> {
        let resp = self
            .request(reqwest::Method::DELETE, url)
            .send()
            .await
            .map_err(|e| classify_transport(&e))?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(error_from_response(resp).await)
        }
    }
}

#[async_trait]
impl IndexBackend for HttpIndex {
    async fn create_corpus(&self, name: &str, description: &str) -> BackendResult<String> {
        let url = self.url(&["corpora"])?;
        let req = self
            .request(reqwest::Method::POST, url)
            .json(&CreateCorpusRequest { name, description });
        let resp: CreateCorpusResponse = self.send_json(req, "create corpus").await?;
        Ok(resp.corpus_ref)
    }

    async fn import_object(
        &self,
        corpus_ref: &str,
        uri: &str,
        options: &ImportOptions,
    ) -> BackendResult<String> {
        let url = self.url(&["corpora", corpus_ref, "files"])?;
        let req = self
            .request(reqwest::Method::POST, url)
            .json(&ImportRequest { uri, options });
        let resp: ImportResponse = self.send_json(req, "import").await?;
        Ok(resp.file_ref)
    }

    async fn search_corpus(
        &self,
        corpus_ref: &str,
        query: &str,
        options: &SearchOptions,
    ) -> BackendResult<Vec<Hit>> {
        let url = self.url(&["corpora", corpus_ref, "search"])?;
        let req = self
            .request(reqwest::Method::POST, url)
            .json(&SearchRequest { query, options });
        let resp: SearchResponse = self.send_json(req, "search").await?;
        Ok(resp.hits)
    }

    async fn list_corpora(&self) -> BackendResult<Vec<BackendCorpus>> {
        let url = self.url(&["corpora"])?;
        let resp: ListCorporaResponse = self
            .send_json(self.request(reqwest::Method::GET, url), "list corpora")
            .await?;
        Ok(resp.corpora)
    }

    async fn list_files(&self, corpus_ref: &str) -> BackendResult<Vec<BackendFile>> {
        let url = self.url(&["corpora", corpus_ref, "files"])?;
        let resp: ListFilesResponse = self
            .send_json(self.request(reqwest::Method::GET, url), "list files")
            .await?;
        Ok(resp.files)
    }

    async fn delete_file(&self, corpus_ref: &str, file_ref: &str) -> BackendResult<()> {
        let url = self.url(&["corpora", corpus_ref, "files", file_ref])?;
        self.send_delete(url).await
    }

    async fn delete_corpus(&self, corpus_ref: &str) -> BackendResult<()> {
        let url = self.url(&["corpora", corpus_ref])?;
        self.send_delete(url).await
    }
}
