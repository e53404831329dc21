//! Azure blob storage uploads over the REST API.

use super::{BlobStore, StorageError, StorageResult};
use crate::config::StorageConfig;
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use sha2::Sha256;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;
use url::Url;

const API_VERSION: &str = "2021-08-06";
const DEFAULT_ENDPOINT_SUFFIX: &str = "core.windows.net";

/// Parsed Azure storage connection string.
#[derive(Clone, PartialEq)]
pub struct ConnectionString {
    pub account_name: String,
    pub account_key: Option<String>,
    pub sas_token: Option<String>,
    pub blob_endpoint: Url,
}

impl std::fmt::Debug for ConnectionString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionString")
            .field("account_name", &self.account_name)
            .field("blob_endpoint", &self.blob_endpoint.as_str())
            .field("shared_key", &self.account_key.is_some())
            .field("sas", &self.sas_token.is_some())
            .finish()
    }
}

impl ConnectionString {
    /// Parse `Key=Value;...` pairs.
    ///
    /// Requires an account name and either an account key or a shared access
    /// signature. The blob endpoint defaults to
    /// `<protocol>://<account>.blob.<suffix>`.
    pub fn parse(raw: &str) -> StorageResult<Self> {
        let mut parts = BTreeMap::new();
        for pair in raw.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').ok_or_else(|| {
                StorageError::Configuration("malformed connection string".to_string())
            })?;
            parts.insert(key.trim().to_ascii_lowercase(), value.trim().to_string());
        }

        let account_name = parts
            .get("accountname")
            .cloned()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| StorageError::Configuration("connection string has no AccountName".to_string()))?;
        let account_key = parts.get("accountkey").cloned().filter(|v| !v.is_empty());
        let sas_token = parts
            .get("sharedaccesssignature")
            .map(|v| v.trim_start_matches('?').to_string())
            .filter(|v| !v.is_empty());

        if account_key.is_none() && sas_token.is_none() {
            return Err(StorageError::Configuration(
                "connection string needs AccountKey or SharedAccessSignature".to_string(),
            ));
        }

        let endpoint = match parts.get("blobendpoint") {
            Some(endpoint) => endpoint.trim_end_matches('/').to_string(),
            None => {
                let protocol = parts
                    .get("defaultendpointsprotocol")
                    .map(String::as_str)
                    .unwrap_or("https");
                let suffix = parts
                    .get("endpointsuffix")
                    .map(String::as_str)
                    .unwrap_or(DEFAULT_ENDPOINT_SUFFIX);
                format!("{}://{}.blob.{}", protocol, account_name, suffix)
            }
        };
        let blob_endpoint = Url::parse(&format!("{}/", endpoint))
            .map_err(|e| StorageError::Configuration(format!("invalid blob endpoint '{}': {}", endpoint, e)))?;

        Ok(Self {
            account_name,
            account_key,
            sas_token,
            blob_endpoint,
        })
    }
}

/// Uploads files to one container with single-shot Put Blob requests.
#[derive(Debug, Clone)]
pub struct AzureBlobStore {
    http: reqwest::Client,
    connection: ConnectionString,
    container: String,
}

impl AzureBlobStore {
    /// Create a store for `config.container`.
    pub fn from_config(config: &StorageConfig) -> StorageResult<Self> {
        if config.container.trim().is_empty() {
            return Err(StorageError::Configuration("container is empty".to_string()));
        }
        let connection = ConnectionString::parse(&config.data_storage_cs)?;
        let http = reqwest::Client::builder().build()?;
        Ok(Self {
            http,
            connection,
            container: config.container.clone(),
        })
    }

    /// URL of `remote_path` in the container, without credentials.
    pub fn blob_url(&self, remote_path: &str) -> StorageResult<Url> {
        let mut url = self.connection.blob_endpoint.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                StorageError::Configuration("blob endpoint cannot be a base".to_string())
            })?;
            segments.pop_if_empty().push(&self.container);
            segments.extend(remote_path.split('/').filter(|s| !s.is_empty()));
        }
        Ok(url)
    }
}

#[async_trait]
impl BlobStore for AzureBlobStore {
    async fn save_file(&self, local: &Path, remote_path: &str) -> StorageResult<()> {
        let body = tokio::fs::read(local).await?;
        let url = self.blob_url(remote_path)?;
        let content_type = content_type(remote_path);
        let date = http_date(Utc::now());
        let length = body.len();

        let (target, authorization) = match (&self.connection.account_key, &self.connection.sas_token) {
            (Some(key), _) => {
                let to_sign = put_blob_string_to_sign(
                    &self.connection.account_name,
                    &url,
                    length,
                    content_type,
                    &date,
                );
                let signature = sign(key, &to_sign)?;
                let header = format!("SharedKey {}:{}", self.connection.account_name, signature);
                (url, Some(header))
            }
            (None, Some(sas)) => {
                let mut signed = url;
                signed.set_query(Some(sas));
                (signed, None)
            }
            (None, None) => {
                return Err(StorageError::Configuration(
                    "no credentials to authorize the upload".to_string(),
                ));
            }
        };

        let mut request = self
            .http
            .put(target)
            .header("x-ms-blob-type", "BlockBlob")
            .header("x-ms-date", &date)
            .header("x-ms-version", API_VERSION)
            .header(CONTENT_TYPE, content_type);
        if let Some(authorization) = authorization {
            request = request.header(AUTHORIZATION, authorization);
        }

        let response = request.body(body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(StorageError::Upload {
                status: status.as_u16(),
                message: message.chars().take(500).collect(),
            });
        }

        debug!(container = %self.container, path = remote_path, bytes = length, "uploaded blob");
        Ok(())
    }
}

fn content_type(remote_path: &str) -> &'static str {
    if remote_path.ends_with(".gz") {
        "application/gzip"
    } else if remote_path.ends_with(".json") || remote_path.ends_with(".jsonl") {
        "application/json"
    } else {
        "application/octet-stream"
    }
}

/// RFC 1123 date as required by `x-ms-date`.
pub(crate) fn http_date(now: DateTime<Utc>) -> String {
    now.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Shared Key string-to-sign for a Put Blob request.
pub(crate) fn put_blob_string_to_sign(
    account: &str,
    url: &Url,
    content_length: usize,
    content_type: &str,
    date: &str,
) -> String {
    let length = if content_length == 0 {
        String::new()
    } else {
        content_length.to_string()
    };

    let canonical_headers = format!(
        "x-ms-blob-type:BlockBlob\nx-ms-date:{}\nx-ms-version:{}\n",
        date, API_VERSION
    );

    let mut canonical_resource = format!("/{}{}", account, url.path());
    let mut query: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.to_ascii_lowercase(), v.into_owned()))
        .collect();
    query.sort();
    for (key, value) in query {
        canonical_resource.push_str(&format!("\n{}:{}", key, value));
    }

    [
        "PUT",
        "",
        "",
        length.as_str(),
        "",
        content_type,
        "",
        "",
        "",
        "",
        "",
        "",
    ]
    .join("\n")
        + "\n"
        + &canonical_headers
        + &canonical_resource
}

/// Base64 HMAC-SHA256 of `to_sign` keyed with the decoded account key.
pub(crate) fn sign(account_key: &str, to_sign: &str) -> StorageResult<String> {
    let key = BASE64
        .decode(account_key)
        .map_err(|_| StorageError::Configuration("AccountKey is not valid base64".to_string()))?;
    let mut mac = Hmac::<Sha256>::new_from_slice(&key)
        .map_err(|e| StorageError::Configuration(format!("invalid AccountKey: {}", e)))?;
    mac.update(to_sign.as_bytes());
    Ok(BASE64.encode(mac.finalize().into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const CS: &str = "DefaultEndpointsProtocol=https;AccountName=acme;AccountKey=c2VjcmV0LWtleQ==;EndpointSuffix=core.windows.net";

    fn store() -> AzureBlobStore {
        AzureBlobStore::from_config(&StorageConfig {
            data_storage_cs: CS.to_string(),
            container: "data-feature".to_string(),
        })
        .unwrap()
    }

    #[test]
    fn test_parse_account_key_connection_string() {
        let cs = ConnectionString::parse(CS).unwrap();

        assert_eq!(cs.account_name, "acme");
        assert_eq!(cs.account_key.as_deref(), Some("c2VjcmV0LWtleQ=="));
        assert!(cs.sas_token.is_none());
        assert_eq!(cs.blob_endpoint.as_str(), "https://acme.blob.core.windows.net/");
    }

    #[test]
    fn test_parse_sas_connection_string() {
        let err = ConnectionString::parse(
            "BlobEndpoint=https://acme.blob.core.windows.net/;SharedAccessSignature=?sv=2021-08-06&sig=abc%3D",
        )
        .unwrap_err();
        // account name is still required
        assert!(matches!(err, StorageError::Configuration(_)));

        let cs = ConnectionString::parse(
            "AccountName=acme;BlobEndpoint=http://127.0.0.1:10000/acme;SharedAccessSignature=?sv=2021-08-06&sig=abc%3D",
        )
        .unwrap();
        assert_eq!(cs.sas_token.as_deref(), Some("sv=2021-08-06&sig=abc%3D"));
        assert_eq!(cs.blob_endpoint.as_str(), "http://127.0.0.1:10000/acme/");
    }

    #[test]
    fn test_parse_rejects_missing_credentials() {
        let err = ConnectionString::parse("AccountName=acme").unwrap_err();
        assert!(err.to_string().contains("AccountKey"));
        assert!(ConnectionString::parse("garbage").is_err());
    }

    #[test]
    fn test_debug_hides_secrets() {
        let cs = ConnectionString::parse(CS).unwrap();
        assert!(!format!("{:?}", cs).contains("c2VjcmV0"));
    }

    #[test]
    fn test_blob_url() {
        let url = store().blob_url("db2/video_entities/a.jsonl.gz").unwrap();
        assert_eq!(
            url.as_str(),
            "https://acme.blob.core.windows.net/data-feature/db2/video_entities/a.jsonl.gz"
        );
    }

    #[test]
    fn test_empty_container_is_rejected() {
        let result = AzureBlobStore::from_config(&StorageConfig {
            data_storage_cs: CS.to_string(),
            container: String::new(),
        });
        assert!(matches!(result, Err(StorageError::Configuration(_))));
    }

    #[test]
    fn test_http_date() {
        let date = Utc.with_ymd_and_hms(2009, 10, 11, 21, 49, 13).unwrap();
        assert_eq!(http_date(date), "Sun, 11 Oct 2009 21:49:13 GMT");
    }

    #[test]
    fn test_put_blob_string_to_sign() {
        let url = Url::parse("https://acme.blob.core.windows.net/data/db2/a.jsonl.gz").unwrap();

        let to_sign = put_blob_string_to_sign(
            "acme",
            &url,
            42,
            "application/gzip",
            "Sun, 11 Oct 2009 21:49:13 GMT",
        );

        assert_eq!(
            to_sign,
            "PUT\n\n\n42\n\napplication/gzip\n\n\n\n\n\n\n\
             x-ms-blob-type:BlockBlob\n\
             x-ms-date:Sun, 11 Oct 2009 21:49:13 GMT\n\
             x-ms-version:2021-08-06\n\
             /acme/data/db2/a.jsonl.gz"
        );
    }

    #[test]
    fn test_zero_length_is_blank_in_string_to_sign() {
        let url = Url::parse("https://acme.blob.core.windows.net/data/empty").unwrap();
        let to_sign = put_blob_string_to_sign("acme", &url, 0, "application/octet-stream", "d");
        assert!(to_sign.starts_with("PUT\n\n\n\n\napplication/octet-stream\n"));
    }

    #[test]
    fn test_sign_is_hmac_sha256() {
        // HMAC-SHA256("key", "The quick brown fox jumps over the lazy dog")
        let key = BASE64.encode("key");
        let signature = sign(&key, "The quick brown fox jumps over the lazy dog").unwrap();
        assert_eq!(signature, "97yD9DBThCSxMpjmqm+xQ+9NWaFJRhdZl0edvC0aPNg=");
    }

    #[test]
    fn test_sign_rejects_invalid_key() {
        assert!(sign("not base64!", "x").is_err());
    }

    #[test]
    fn test_content_type() {
        assert_eq!(content_type("a.jsonl.gz"), "application/gzip");
        assert_eq!(content_type("a.json"), "application/json");
        assert_eq!(content_type("a.bin"), "application/octet-stream");
    }
}
