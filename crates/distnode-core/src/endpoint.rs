//! Storage-node endpoints: validation and API path construction.
//!
//! The directory hands out node *roots*; everything here works on the derived
//! `<root>/api/v1` base. Only http and https are accepted.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;
use url::Url;

use crate::logging::LogThrottle;
use crate::object::ObjectId;

/// Endpoint exactly as published by the directory, before validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEndpoint {
    pub bucket_id: String,
    /// Node root URL; `None` when the operator never set one.
    pub node_endpoint: Option<String>,
}

#[derive(Debug, Error)]
pub enum EndpointError {
    #[error("invalid endpoint URL {url:?}: {source}")]
    Parse {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("invalid endpoint protocol: {0}")]
    UnsupportedScheme(String),
}

/// A validated storage-node API base (`.../api/v1`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    url: Url,
    bucket_id: String,
}

impl Endpoint {
    /// Parse an API base URL. Rejects anything that is not http(s).
    pub fn parse(api_url: &str, bucket_id: impl Into<String>) -> Result<Self, EndpointError> {
        let url = Url::parse(api_url).map_err(|source| EndpointError::Parse {
            url: api_url.to_string(),
            source,
        })?;
        match url.scheme() {
            "http" | "https" => Ok(Self {
                url,
                bucket_id: bucket_id.into(),
            }),
            other => Err(EndpointError::UnsupportedScheme(other.to_string())),
        }
    }

    /// Build from a node root by appending `api/v1`.
    pub fn from_node_root(root: &str, bucket_id: impl Into<String>) -> Result<Self, EndpointError> {
        Self::parse(&api_base(root), bucket_id)
    }

    /// Canonical string form; used as the response-time key.
    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn bucket_id(&self) -> &str {
        &self.bucket_id
    }

    pub fn version_url(&self) -> String {
        self.join("state/version")
    }

    pub fn file_url(&self, object_id: &ObjectId) -> String {
        self.join(&format!("files/{object_id}"))
    }

    fn join(&self, path: &str) -> String {
        format!("{}/{}", self.url.as_str().trim_end_matches('/'), path)
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `<root>/api/v1`, inserting the separator only when `root` lacks one.
pub fn api_base(root: &str) -> String {
    if root.ends_with('/') {
        format!("{root}api/v1")
    } else {
        format!("{root}/api/v1")
    }
}

/// Validate raw directory endpoints, dropping (and logging) the bad ones.
/// Order of the surviving entries is preserved.
pub fn filter_valid(
    raw: impl IntoIterator<Item = RawEndpoint>,
    throttle: &LogThrottle,
) -> Vec<Endpoint> {
    raw.into_iter()
        .filter_map(|entry| {
            let root = entry.node_endpoint.as_deref().unwrap_or_default();
            match Endpoint::from_node_root(root, entry.bucket_id.clone()) {
                Ok(endpoint) => Some(endpoint),
                Err(err) => {
                    if throttle.allow(&format!("invalid-endpoint:{}", entry.bucket_id)) {
                        warn!(
                            bucket_id = %entry.bucket_id,
                            node_endpoint = root,
                            error = %err,
                            "invalid storage endpoint, skipping"
                        );
                    }
                    None
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn raw(bucket: &str, root: Option<&str>) -> RawEndpoint {
        RawEndpoint {
            bucket_id: bucket.to_string(),
            node_endpoint: root.map(str::to_string),
        }
    }

    #[test]
    fn api_base_adds_separator_once() {
        assert_eq!(api_base("https://node.example"), "https://node.example/api/v1");
        assert_eq!(api_base("https://node.example/"), "https://node.example/api/v1");
        assert_eq!(
            api_base("https://node.example/storage/"),
            "https://node.example/storage/api/v1"
        );
    }

    #[test]
    fn request_urls() {
        let ep = Endpoint::from_node_root("http://10.0.0.1:3333/", "7").unwrap();
        assert_eq!(ep.as_str(), "http://10.0.0.1:3333/api/v1");
        assert_eq!(ep.version_url(), "http://10.0.0.1:3333/api/v1/state/version");
        assert_eq!(
            ep.file_url(&ObjectId::from("42")),
            "http://10.0.0.1:3333/api/v1/files/42"
        );
        assert_eq!(ep.bucket_id(), "7");
    }

    #[test]
    fn rejects_non_http_schemes() {
        assert!(matches!(
            Endpoint::from_node_root("ftp://node.example", "1"),
            Err(EndpointError::UnsupportedScheme(s)) if s == "ftp"
        ));
        assert!(matches!(
            Endpoint::from_node_root("", "1"),
            Err(EndpointError::Parse { .. })
        ));
    }

    #[test]
    fn filter_valid_drops_bad_entries_and_keeps_order() {
        let throttle = LogThrottle::new(Duration::from_secs(60));
        let out = filter_valid(
            vec![
                raw("1", Some("https://b.example")),
                raw("2", Some("ftp://x.example")),
                raw("3", None),
                raw("4", Some("http://a.example/")),
            ],
            &throttle,
        );
        let urls: Vec<&str> = out.iter().map(|e| e.as_str()).collect();
        assert_eq!(urls, ["https://b.example/api/v1", "http://a.example/api/v1"]);
    }
}
