//! S3-compatible object store.
//!
//! Talks the S3 REST API with AWS Signature V4 and path-style addressing
//! (`{endpoint}/{bucket}/{key}`), which works against the GCS XML
//! interoperability endpoint, MinIO, and S3 itself.
//!
//! Signing uses only pure-Rust dependencies (`hmac`, `sha2`, `hex`).
//!
//! # Configuration
//!
//! ```toml
//! [object_store]
//! kind = "s3"
//! endpoint = "https://storage.googleapis.com"
//! region = "auto"
//! access_key_env = "ERAG_ACCESS_KEY_ID"
//! secret_key_env = "ERAG_SECRET_ACCESS_KEY"
//! # session_token_env = "ERAG_SESSION_TOKEN"
//! ```
//!
//! # Requests
//!
//! | Operation | Request |
//! |-----------|---------|
//! | create bucket | `PUT /{bucket}` |
//! | upload | `PUT /{bucket}/{key}` |
//! | exists | `HEAD /{bucket}/{key}` |
//! | list | `GET /{bucket}?list-type=2&prefix=…` (paginated) |

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::{Method, Url};
use sha2::{Digest, Sha256};

use edu_rag_core::backend::{BackendResult, ObjectStore};
use edu_rag_core::BackendError;

use crate::config::ObjectStoreConfig;
use crate::http::{classify_transport, error_from_response};

type HmacSha256 = Hmac<Sha256>;

const SERVICE: &str = "s3";

// ============ Credentials ============

struct Credentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
}

impl Credentials {
    /// Read credentials from the environment variables named in config.
    fn from_env(config: &ObjectStoreConfig) -> Result<Self> {
        let access_key_id = std::env::var(&config.access_key_env)
            .with_context(|| format!("{} environment variable not set", config.access_key_env))?;
        let secret_access_key = std::env::var(&config.secret_key_env)
            .with_context(|| format!("{} environment variable not set", config.secret_key_env))?;
        let session_token = config
            .session_token_env
            .as_ref()
            .and_then(|name| std::env::var(name).ok());

        Ok(Self {
            access_key_id,
            secret_access_key,
            session_token,
        })
    }
}

// ============ Store ============

pub struct S3ObjectStore {
    client: reqwest::Client,
    endpoint: Url,
    host: String,
    region: String,
    creds: Credentials,
}

impl S3ObjectStore {
    pub fn new(config: &ObjectStoreConfig) -> Result<Self> {
        let creds = Credentials::from_env(config)?;
        let endpoint = Url::parse(config.endpoint.trim_end_matches('/'))
            .with_context(|| format!("Invalid object_store.endpoint: {}", config.endpoint))?;
        let host = match (endpoint.host_str(), endpoint.port()) {
            (Some(h), Some(p)) => format!("{h}:{p}"),
            (Some(h), None) => h.to_string(),
            (None, _) => anyhow::bail!("object_store.endpoint has no host: {}", config.endpoint),
        };
        let client = reqwest::Client::builder().build()?;

        Ok(Self {
            client,
            endpoint,
            host,
            region: config.region.clone(),
            creds,
        })
    }

    /// Build, sign and send one request.
    async fn send(
        &self,
        method: Method,
        bucket: &str,
        key: Option<&str>,
        query: &[(&str, &str)],
        body: Vec<u8>,
    ) -> BackendResult<reqwest::Response> {
        let canonical_uri = match key {
            Some(key) => format!("/{}/{}", uri_encode(bucket), encode_key(key)),
            None => format!("/{}", uri_encode(bucket)),
        };
        let canonical_query = canonical_query_string(query);
        let payload_hash = hex_sha256(&body);
        let signed = sign_request(
            &SigningInput {
                method: method.as_str(),
                host: &self.host,
                canonical_uri: &canonical_uri,
                canonical_query: &canonical_query,
                payload_hash: &payload_hash,
                region: &self.region,
                access_key_id: &self.creds.access_key_id,
                secret_access_key: &self.creds.secret_access_key,
                session_token: self.creds.session_token.as_deref(),
            },
            Utc::now(),
        );

        let base = self.endpoint.as_str().trim_end_matches('/');
        let url = if canonical_query.is_empty() {
            format!("{base}{canonical_uri}")
        } else {
            format!("{base}{canonical_uri}?{canonical_query}")
        };

        let mut req = self
            .client
            .request(method, &url)
            .header("Authorization", &signed.authorization)
            .header("x-amz-content-sha256", &payload_hash)
            .header("x-amz-date", &signed.amz_date);
        if let Some(token) = &self.creds.session_token {
            req = req.header("x-amz-security-token", token);
        }
        if !body.is_empty() {
            req = req.body(body);
        }

        req.send().await.map_err(|e| classify_transport(&e))
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn create_container(&self, name: &str) -> BackendResult<()> {
        let resp = self.send(Method::PUT, name, None, &[], Vec::new()).await?;
        if resp.status().is_success() {
            tracing::info!(bucket = name, "created bucket");
            return Ok(());
        }
        Err(error_from_response(resp).await)
    }

    async fn put_object(&self, container: &str, key: &str, bytes: Vec<u8>) -> BackendResult<()> {
        let size = bytes.len();
        let resp = self.send(Method::PUT, container, Some(key), &[], bytes).await?;
        if resp.status().is_success() {
            tracing::debug!(bucket = container, key, size, "uploaded object");
            return Ok(());
        }
        Err(error_from_response(resp).await)
    }

    async fn object_exists(&self, container: &str, key: &str) -> BackendResult<bool> {
        let resp = self.send(Method::HEAD, container, Some(key), &[], Vec::new()).await?;
        match resp.status().as_u16() {
            200..=299 => Ok(true),
            404 => Ok(false),
            _ => Err(error_from_response(resp).await),
        }
    }

    async fn list_objects(&self, container: &str, prefix: &str) -> BackendResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut query = vec![("list-type", "2"), ("max-keys", "1000")];
            if !prefix.is_empty() {
                query.push(("prefix", prefix));
            }
            if let Some(token) = continuation_token.as_deref() {
                query.push(("continuation-token", token));
            }

            let resp = self.send(Method::GET, container, None, &query, Vec::new()).await?;
            if !resp.status().is_success() {
                return Err(error_from_response(resp).await);
            }
            let xml = resp.text().await.map_err(|e| classify_transport(&e))?;
            let page = parse_list_objects_response(&xml)
                .map_err(|e| BackendError::Unavailable(format!("invalid ListObjectsV2 response: {e}")))?;
            keys.extend(page.keys);

            match (page.is_truncated, page.next_token) {
                (true, Some(token)) => continuation_token = Some(token),
                _ => break,
            }
        }

        keys.sort();
        Ok(keys)
    }
}

// ============ AWS SigV4 ============

struct SigningInput<'a> {
    method: &'a str,
    host: &'a str,
    canonical_uri: &'a str,
    canonical_query: &'a str,
    payload_hash: &'a str,
    region: &'a str,
    access_key_id: &'a str,
    secret_access_key: &'a str,
    session_token: Option<&'a str>,
}

struct Signed {
    authorization: String,
    amz_date: String,
}

/// Sign one request (header-based SigV4).
fn sign_request(input: &SigningInput<'_>, now: DateTime<Utc>) -> Signed {
    let date_stamp = now.format("%Y%m%d").to_string();
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();

    let mut headers = vec![
        ("host", input.host.to_string()),
        ("x-amz-content-sha256", input.payload_hash.to_string()),
        ("x-amz-date", amz_date.clone()),
    ];
    if let Some(token) = input.session_token {
        headers.push(("x-amz-security-token", token.to_string()));
    }
    headers.sort_by_key(|(k, _)| *k);

    let signed_headers = headers
        .iter()
        .map(|(k, _)| *k)
        .collect::<Vec<_>>()
        .join(";");
    let canonical_headers: String = headers
        .iter()
        .map(|(k, v)| format!("{}:{}\n", k, v.trim()))
        .collect();

    let canonical_request = format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        input.method,
        input.canonical_uri,
        input.canonical_query,
        canonical_headers,
        signed_headers,
        input.payload_hash
    );

    let credential_scope = format!("{}/{}/{}/aws4_request", date_stamp, input.region, SERVICE);
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{}\n{}\n{}",
        amz_date,
        credential_scope,
        hex_sha256(canonical_request.as_bytes())
    );

    let signing_key = derive_signing_key(input.secret_access_key, &date_stamp, input.region, SERVICE);
    let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes()));

    Signed {
        authorization: format!(
            "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
            input.access_key_id, credential_scope, signed_headers, signature
        ),
        amz_date,
    }
}

fn canonical_query_string(params: &[(&str, &str)]) -> String {
    let mut encoded: Vec<(String, String)> = params
        .iter()
        .map(|(k, v)| (uri_encode(k), uri_encode(v)))
        .collect();
    encoded.sort();
    encoded
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

fn hex_sha256(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

/// ```text
/// kDate    = HMAC("AWS4" + secret, dateStamp)
/// kRegion  = HMAC(kDate, region)
/// kService = HMAC(kRegion, service)
/// kSigning = HMAC(kService, "aws4_request")
/// ```
fn derive_signing_key(secret_key: &str, date_stamp: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(format!("AWS4{}", secret_key).as_bytes(), date_stamp.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

/// RFC 3986 encoding of everything except `A-Z a-z 0-9 - _ . ~`.
fn uri_encode(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char);
            }
            _ => result.push_str(&format!("%{:02X}", byte)),
        }
    }
    result
}

fn encode_key(key: &str) -> String {
    key.split('/').map(uri_encode).collect::<Vec<_>>().join("/")
}

// ============ ListObjectsV2 ============

#[derive(Debug, Default)]
struct ListPage {
    keys: Vec<String>,
    is_truncated: bool,
    next_token: Option<String>,
}

fn parse_list_objects_response(xml: &str) -> Result<ListPage, String> {
    use quick_xml::events::Event;

    let mut reader = quick_xml::Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut page = ListPage::default();
    let mut path: Vec<String> = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                path.push(String::from_utf8_lossy(e.local_name().as_ref()).into_owned());
            }
            Ok(Event::End(_)) => {
                path.pop();
            }
            Ok(Event::Text(t)) => {
                let text = t.unescape().map_err(|e| e.to_string())?.into_owned();
                let in_contents = path.iter().any(|p| p == "Contents");
                match path.last().map(String::as_str) {
                    // trailing-slash keys are folder placeholders
                    Some("Key") if in_contents && !text.ends_with('/') => page.keys.push(text),
                    Some("IsTruncated") => page.is_truncated = text == "true",
                    Some("NextContinuationToken") => page.next_token = Some(text),
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(e.to_string()),
            _ => {}
        }
    }

    Ok(page)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_signing_key_matches_aws_example() {
        let key = derive_signing_key(
            "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY",
            "20120215",
            "us-east-1",
            "iam",
        );
        assert_eq!(
            hex::encode(key),
            "f4780e2d9f65fa895f9c67b32ce1baf0b0d8a43505a000a1a9e090d414db404d"
        );
    }

    #[test]
    fn test_uri_encode_reserved() {
        assert_eq!(uri_encode("grade-5"), "grade-5");
        assert_eq!(uri_encode("unit 1.pdf"), "unit%201.pdf");
        assert_eq!(encode_key("grade-5/maths/a b.pdf"), "grade-5/maths/a%20b.pdf");
    }

    #[test]
    fn test_canonical_query_sorted() {
        assert_eq!(
            canonical_query_string(&[("prefix", "grade-5/"), ("list-type", "2")]),
            "list-type=2&prefix=grade-5%2F"
        );
    }

    #[test]
    fn test_sign_request_shape() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let signed = sign_request(
            &SigningInput {
                method: "GET",
                host: "storage.googleapis.com",
                canonical_uri: "/adk-cbse-education",
                canonical_query: "list-type=2",
                payload_hash: &hex_sha256(b""),
                region: "auto",
                access_key_id: "AKID",
                secret_access_key: "secret",
                session_token: None,
            },
            now,
        );
        assert_eq!(signed.amz_date, "20240601T120000Z");
        assert!(signed.authorization.starts_with(
            "AWS4-HMAC-SHA256 Credential=AKID/20240601/auto/s3/aws4_request, SignedHeaders=host;x-amz-content-sha256;x-amz-date, Signature="
        ));
    }

    #[test]
    fn test_parse_list_objects_response() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<ListBucketResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
  <Name>adk-cbse-education</Name>
  <IsTruncated>true</IsTruncated>
  <NextContinuationToken>abc123</NextContinuationToken>
  <Contents><Key>grade-5/mathematics/chapter-1.pdf</Key><Size>10</Size></Contents>
  <Contents><Key>grade-5/mathematics/</Key><Size>0</Size></Contents>
  <Contents><Key>grade-5/science/a &amp; b.pdf</Key><Size>3</Size></Contents>
</ListBucketResult>"#;
        let page = parse_list_objects_response(xml).unwrap();
        assert_eq!(
            page.keys,
            vec!["grade-5/mathematics/chapter-1.pdf", "grade-5/science/a & b.pdf"]
        );
        assert!(page.is_truncated);
        assert_eq!(page.next_token.as_deref(), Some("abc123"));
    }
}
