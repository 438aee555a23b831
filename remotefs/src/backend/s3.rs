//! S3-compatible object store.
//!
//! Talks to AWS S3 or any S3-compatible API (MinIO, B2) using reqwest with
//! manual AWS Signature V4 signing, so no SDK dependency is needed. Buckets
//! are addressed path-style so one client serves every bucket.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use hmac::{Hmac, Mac};
use reqwest::header::HeaderMap;
use reqwest::{Client, Method, RequestBuilder, Response};
use sha2::{Digest, Sha256};
use tracing::debug;

use remotefs_common::{
    ListPage, ObjectEntry, ObjectHandle, ObjectHeaders, ObjectLister, ObjectReader, ObjectWriter,
    ReadConditions, StorageError,
};

type HmacSha256 = Hmac<Sha256>;

const HTTP_DATE: &str = "%a, %d %b %Y %H:%M:%S GMT";

#[derive(Clone)]
pub struct S3Config {
    pub region: String,
    pub endpoint: Option<String>, // Custom endpoint for B2 or other S3-compatible APIs
    pub access_key_id: String,
    pub secret_access_key: String,
    pub storage_class: Option<String>,
    pub timeout: Duration,
}

impl std::fmt::Debug for S3Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Config")
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .field("access_key_id", &self.access_key_id)
            .field("storage_class", &self.storage_class)
            .finish_non_exhaustive()
    }
}

pub struct S3Store {
    config: S3Config,
    client: Client,
}

/// Pieces of a request that take part in the signature.
struct SignedRequest {
    method: Method,
    canonical_uri: String,
    query: String,
    body_hash: String,
    extra_headers: Vec<(&'static str, String)>,
}

impl S3Store {
    pub fn new(config: S3Config) -> Result<Self, StorageError> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { config, client })
    }

    fn endpoint(&self) -> String {
        match &self.config.endpoint {
            Some(ep) => ep.trim_end_matches('/').to_string(),
            None => format!("https://s3.{}.amazonaws.com", self.config.region),
        }
    }

    fn canonical_uri(bucket: &str, key: &str) -> String {
        let encoded: Vec<String> = key.split('/').map(|s| urlencoding::encode(s).into_owned()).collect();
        format!("/{}/{}", urlencoding::encode(bucket), encoded.join("/"))
    }

    /// Build a signed request; the caller attaches unsigned headers and a body.
    fn request(&self, req: SignedRequest) -> RequestBuilder {
        let now = Utc::now();
        let date_time = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date = now.format("%Y%m%d").to_string();
        let endpoint = self.endpoint();

        let mut headers = BTreeMap::new();
        headers.insert("host".to_string(), url_host(&endpoint));
        headers.insert("x-amz-content-sha256".to_string(), req.body_hash.clone());
        headers.insert("x-amz-date".to_string(), date_time.clone());
        for (name, value) in &req.extra_headers {
            headers.insert(name.to_string(), value.clone());
        }

        let auth = self.sign(&req.method, &req.canonical_uri, &req.query, &headers, &req.body_hash, &date_time, &date);

        let mut url = format!("{}{}", endpoint, req.canonical_uri);
        if !req.query.is_empty() {
            url.push('?');
            url.push_str(&req.query);
        }

        let mut builder = self
            .client
            .request(req.method, &url)
            .header("x-amz-date", &date_time)
            .header("x-amz-content-sha256", &req.body_hash)
            .header("Authorization", &auth);
        for (name, value) in req.extra_headers {
            builder = builder.header(name, value);
        }
        builder
    }

    /// Compute AWS Signature V4 for a request.
    #[allow(clippy::too_many_arguments)]
    fn sign(
        &self,
        method: &Method,
        canonical_uri: &str,
        query: &str,
        headers: &BTreeMap<String, String>,
        body_hash: &str,
        date_time: &str,
        date: &str,
    ) -> String {
        // Canonical request
        let canonical_headers: String = headers
            .iter()
            .map(|(k, v)| format!("{}:{}\n", k, v.trim()))
            .collect();
        let signed_headers: String = headers.keys().cloned().collect::<Vec<_>>().join(";");

        let canonical_request = format!(
            "{}\n{}\n{}\n{}\n{}\n{}",
            method.as_str(), canonical_uri, query, canonical_headers, signed_headers, body_hash
        );

        // String to sign
        let cr_hash = hex::encode(Sha256::digest(canonical_request.as_bytes()));
        let credential_scope = format!("{}/{}/s3/aws4_request", date, self.config.region);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            date_time, credential_scope, cr_hash
        );

        // Signing key
        let signing_key = derive_signing_key(&self.config.secret_access_key, date, &self.config.region);
        let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes()));

        format!(
            "AWS4-HMAC-SHA256 Credential={}/{},SignedHeaders={},Signature={}",
            self.config.access_key_id, credential_scope, signed_headers, signature
        )
    }
}

fn derive_signing_key(secret: &str, date: &str, region: &str) -> Vec<u8> {
    let key = format!("AWS4{}", secret);
    let k_date = hmac_sha256(key.as_bytes(), date.as_bytes());
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, b"s3");
    hmac_sha256(&k_service, b"aws4_request")
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC key length ok");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn body_hash(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Turn a non-success response into a typed error.
async fn check_status(resp: Response, key: &str) -> Result<Response, StorageError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(StorageError::from_status(status.as_u16(), key, body))
}

fn parse_headers(headers: &HeaderMap) -> ObjectHeaders {
    let get = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
    ObjectHeaders {
        content_type: get("content-type").map(str::to_string),
        content_length: get("content-length").and_then(|v| v.parse().ok()),
        last_modified: get("last-modified")
            .and_then(|v| DateTime::parse_from_rfc2822(v).ok())
            .map(|d| d.with_timezone(&Utc)),
    }
}

#[async_trait]
impl ObjectLister for S3Store {
    async fn list(
        &self,
        bucket: &str,
        prefix: &str,
        continuation: Option<&str>,
    ) -> Result<ListPage, StorageError> {
        // Query parameters must be sorted for the canonical request
        let mut query = String::new();
        if let Some(token) = continuation {
            query.push_str(&format!("continuation-token={}&", urlencoding::encode(token)));
        }
        query.push_str(&format!("list-type=2&prefix={}", urlencoding::encode(prefix)));

        let resp = self
            .request(SignedRequest {
                method: Method::GET,
                canonical_uri: format!("/{}", urlencoding::encode(bucket)),
                query,
                body_hash: body_hash(b""),
                extra_headers: Vec::new(),
            })
            .send()
            .await?;
        let resp = check_status(resp, bucket).await?;

        let body = resp.text().await?;
        let page = parse_list_page(&body)?;
        debug!(bucket = %bucket, prefix = %prefix, count = page.entries.len(), truncated = page.truncated, "S3 list complete");
        Ok(page)
    }
}

#[async_trait]
impl ObjectReader for S3Store {
    async fn open(
        &self,
        bucket: &str,
        key: &str,
        conditions: &ReadConditions,
    ) -> Result<ObjectHandle, StorageError> {
        let mut req = self.request(SignedRequest {
            method: Method::GET,
            canonical_uri: Self::canonical_uri(bucket, key),
            query: String::new(),
            body_hash: body_hash(b""),
            extra_headers: Vec::new(),
        });
        if let Some(since) = conditions.if_modified_since {
            req = req.header("If-Modified-Since", since.format(HTTP_DATE).to_string());
        }
        if let Some(since) = conditions.if_unmodified_since {
            req = req.header("If-Unmodified-Since", since.format(HTTP_DATE).to_string());
        }

        let resp = check_status(req.send().await?, key).await?;
        let headers = parse_headers(resp.headers());
        let body = resp.bytes_stream().map(|chunk| chunk.map_err(StorageError::from)).boxed();

        debug!(bucket = %bucket, key = %key, length = ?headers.content_length, "S3 object opened");
        Ok(ObjectHandle { headers, body })
    }
}

#[async_trait]
impl ObjectWriter for S3Store {
    async fn put(&self, bucket: &str, key: &str, data: Bytes) -> Result<(), StorageError> {
        let content_type = mime_guess::from_path(key)
            .first()
            .map(|m| m.to_string())
            .unwrap_or_else(|| "application/octet-stream".to_string());

        let mut extra_headers = vec![
            ("content-length", data.len().to_string()),
            ("content-type", content_type),
        ];
        if let Some(ref sc) = self.config.storage_class {
            extra_headers.push(("x-amz-storage-class", sc.clone()));
        }

        let resp = self
            .request(SignedRequest {
                method: Method::PUT,
                canonical_uri: Self::canonical_uri(bucket, key),
                query: String::new(),
                body_hash: body_hash(&data),
                extra_headers,
            })
            .body(data)
            .send()
            .await?;
        check_status(resp, key).await?;

        debug!(bucket = %bucket, key = %key, "S3 put complete");
        Ok(())
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<(), StorageError> {
        let resp = self
            .request(SignedRequest {
                method: Method::DELETE,
                canonical_uri: Self::canonical_uri(bucket, key),
                query: String::new(),
                body_hash: body_hash(b""),
                extra_headers: Vec::new(),
            })
            .send()
            .await?;

        match check_status(resp, key).await {
            Ok(_) | Err(StorageError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        debug!(bucket = %bucket, key = %key, "S3 delete complete");
        Ok(())
    }
}

/// Parse a ListObjectsV2 XML response.
fn parse_list_page(xml: &str) -> Result<ListPage, StorageError> {
    let mut entries = Vec::new();
    for contents in tag_blocks(xml, "Contents") {
        let key = tag_value(contents, "Key")
            .ok_or_else(|| StorageError::InvalidResponse("<Contents> without <Key>".to_string()))?;
        let last_modified = tag_value(contents, "LastModified")
            .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_else(|| DateTime::<Utc>::from(std::time::UNIX_EPOCH));
        let size = tag_value(contents, "Size").and_then(|v| v.parse().ok()).unwrap_or(0);
        entries.push(ObjectEntry { key: xml_unescape(key), last_modified, size });
    }

    // <Prefix> also appears inside <CommonPrefixes>; the first one is the echo
    Ok(ListPage {
        prefix: tag_value(xml, "Prefix").map(xml_unescape).unwrap_or_default(),
        entries,
        truncated: tag_value(xml, "IsTruncated") == Some("true"),
        next_continuation: tag_value(xml, "NextContinuationToken").map(xml_unescape),
    })
}

/// Inner text of every `<tag>…</tag>` element, in document order.
fn tag_blocks<'a>(xml: &'a str, tag: &str) -> Vec<&'a str> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let mut blocks = Vec::new();
    let mut remaining = xml;
    while let Some(start) = remaining.find(&open) {
        remaining = &remaining[start + open.len()..];
        match remaining.find(&close) {
            Some(end) => {
                blocks.push(&remaining[..end]);
                remaining = &remaining[end + close.len()..];
            }
            None => break,
        }
    }
    blocks
}

/// Inner text of the first `<tag>…</tag>` element.
fn tag_value<'a>(xml: &'a str, tag: &str) -> Option<&'a str> {
    tag_blocks(xml, tag).into_iter().next()
}

fn xml_unescape(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Extract the host part from a URL for use in signing.
fn url_host(url: &str) -> String {
    // Strip scheme and path, return just host[:port]
    let without_scheme = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .unwrap_or(url);
    without_scheme.split('/').next().unwrap_or(without_scheme).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(endpoint: Option<&str>) -> S3Store {
        S3Store::new(S3Config {
            region: "us-east-1".to_string(),
            endpoint: endpoint.map(str::to_string),
            access_key_id: "AKIDEXAMPLE".to_string(),
            secret_access_key: "secret".to_string(),
            storage_class: None,
            timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    #[test]
    fn test_parse_list_page() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<ListBucketResult>
  <Name>bucket</Name>
  <Prefix>docs/</Prefix>
  <IsTruncated>true</IsTruncated>
  <NextContinuationToken>1ueGcxLPRx1Tr/XYExHnhbYLgveDs2J/wm36Hy4vbOwM=</NextContinuationToken>
  <Contents><Key>docs/a.md</Key><LastModified>2024-01-02T03:04:05.000Z</LastModified><Size>42</Size></Contents>
  <Contents><Key>docs/b &amp; c.md</Key><LastModified>2024-01-02T03:04:06.000Z</LastModified><Size>7</Size></Contents>
</ListBucketResult>"#;
        let page = parse_list_page(xml).unwrap();
        assert_eq!(page.prefix, "docs/");
        assert!(page.truncated);
        assert_eq!(page.next_continuation.as_deref(), Some("1ueGcxLPRx1Tr/XYExHnhbYLgveDs2J/wm36Hy4vbOwM="));
        assert_eq!(page.entries.len(), 2);
        assert_eq!(page.entries[0].key, "docs/a.md");
        assert_eq!(page.entries[0].size, 42);
        assert_eq!(page.entries[0].last_modified.timestamp(), 1_704_164_645);
        assert_eq!(page.entries[1].key, "docs/b & c.md");
    }

    #[test]
    fn test_parse_empty_list() {
        let xml = "<ListBucketResult><Prefix></Prefix><IsTruncated>false</IsTruncated></ListBucketResult>";
        let page = parse_list_page(xml).unwrap();
        assert!(page.entries.is_empty());
        assert!(!page.truncated);
        assert_eq!(page.next_continuation, None);
    }

    #[test]
    fn test_parse_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", "text/markdown".parse().unwrap());
        headers.insert("content-length", "42".parse().unwrap());
        headers.insert("last-modified", "Tue, 02 Jan 2024 03:04:05 GMT".parse().unwrap());
        let parsed = parse_headers(&headers);
        assert_eq!(parsed.content_type.as_deref(), Some("text/markdown"));
        assert_eq!(parsed.content_length, Some(42));
        assert_eq!(parsed.last_modified.map(|d| d.timestamp()), Some(1_704_164_645));
    }

    #[test]
    fn test_canonical_uri() {
        assert_eq!(S3Store::canonical_uri("bucket", "docs/a b.md"), "/bucket/docs/a%20b.md");
        assert_eq!(S3Store::canonical_uri("bucket", "photos/"), "/bucket/photos/");
    }

    #[test]
    fn test_endpoint() {
        assert_eq!(store(None).endpoint(), "https://s3.us-east-1.amazonaws.com");
        assert_eq!(store(Some("http://localhost:9000/")).endpoint(), "http://localhost:9000");
    }

    #[test]
    fn test_url_host() {
        assert_eq!(url_host("https://s3.us-east-1.amazonaws.com/bucket"), "s3.us-east-1.amazonaws.com");
        assert_eq!(url_host("http://localhost:9000"), "localhost:9000");
    }

    #[test]
    fn test_signature_shape() {
        let s = store(None);
        let mut headers = BTreeMap::new();
        headers.insert("host".to_string(), "s3.us-east-1.amazonaws.com".to_string());
        let auth = s.sign(&Method::GET, "/bucket", "list-type=2&prefix=", &headers, &body_hash(b""), "20240102T030405Z", "20240102");
        assert!(auth.starts_with("AWS4-HMAC-SHA256 Credential=AKIDEXAMPLE/20240102/us-east-1/s3/aws4_request,"));
        assert!(auth.contains("SignedHeaders=host,"));
        let signature = auth.rsplit("Signature=").next().unwrap();
        assert_eq!(signature.len(), 64);
    }

    #[test]
    fn test_hmac_sha256() {
        let result = hmac_sha256(b"secret", b"data");
        assert_eq!(result.len(), 32);
    }

    #[test]
    fn test_request_keeps_method() {
        let s = store(None);
        let request = s
            .request(SignedRequest {
                method: Method::DELETE,
                canonical_uri: S3Store::canonical_uri("bucket", "a.txt"),
                query: String::new(),
                body_hash: body_hash(b""),
                extra_headers: Vec::new(),
            })
            .build()
            .unwrap();
        assert_eq!(request.method(), &Method::DELETE);
        assert_eq!(request.url().path(), "/bucket/a.txt");
        assert!(request.headers().contains_key("authorization"));
    }
}
