// src/fetch/types.rs
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::cache::CacheKey;
use crate::error::ProviderError;

/// One logical fetch: a normalized URL or a query fingerprint for a provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AcquisitionTask {
    pub identifier: String,
    pub provider: String,
    pub round: u32,
}

impl AcquisitionTask {
    /// Task for a page URL. `None` if the URL is not absolute http(s).
    pub fn url(provider: &str, raw_url: &str, round: u32) -> Option<Self> {
        Some(Self {
            identifier: normalize_url(raw_url)?,
            provider: provider.to_string(),
            round,
        })
    }

    /// Task for a search query. `None` if the query is blank.
    pub fn query(provider: &str, query: &str, round: u32) -> Option<Self> {
        let identifier = query_fingerprint(query);
        if identifier.is_empty() {
            return None;
        }
        Some(Self {
            identifier,
            provider: provider.to_string(),
            round,
        })
    }

    pub fn cache_key(&self) -> CacheKey {
        CacheKey::for_identifier(&format!("{}\n{}", self.provider, self.identifier))
    }
}

/// Lowercase scheme and host (the `Url` parser does that), drop the fragment
/// and a lone trailing slash.
pub fn normalize_url(raw: &str) -> Option<String> {
    let mut url = reqwest::Url::parse(raw.trim()).ok()?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return None;
    }
    url.set_fragment(None);
    let mut s = url.to_string();
    if url.path() == "/" && url.query().is_none() && s.ends_with('/') {
        s.pop();
    }
    Some(s)
}

/// Case-folded, whitespace-collapsed query text.
pub fn query_fingerprint(query: &str) -> String {
    query
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Raw provider response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

impl Payload {
    pub fn new(bytes: impl Into<Vec<u8>>, content_type: impl Into<String>) -> Self {
        Self {
            bytes: bytes.into(),
            content_type: content_type.into(),
        }
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }

    fn mime(&self) -> String {
        self.content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase()
    }

    pub fn is_html(&self) -> bool {
        let m = self.mime();
        if m == "text/html" || m == "application/xhtml+xml" {
            return true;
        }
        // Servers often omit or mislabel the type.
        if m.is_empty() || m == "application/octet-stream" {
            let head = String::from_utf8_lossy(&self.bytes[..self.bytes.len().min(512)]).to_lowercase();
            return head.contains("<html") || head.contains("<body") || head.contains("<div");
        }
        false
    }

    pub fn is_pdf(&self) -> bool {
        self.mime() == "application/pdf" || self.bytes.starts_with(b"%PDF-")
    }

    pub fn is_docx(&self) -> bool {
        self.mime() == "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
    }

    pub fn is_json(&self) -> bool {
        let m = self.mime();
        m == "application/json" || m.ends_with("+json")
    }

    pub fn is_textual(&self) -> bool {
        let m = self.mime();
        m.starts_with("text/")
            || self.is_json()
            || m == "application/xml"
            || (m.is_empty() && std::str::from_utf8(&self.bytes).is_ok())
    }
}

/// A content provider reached over the network.
///
/// Implementations do exactly one call per invocation and classify any
/// failure; retries, pacing and caching happen around them.
#[async_trait]
pub trait Provider: Send + Sync {
    async fn fetch(&self, task: &AcquisitionTask) -> Result<Payload, ProviderError>;
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_normalization() {
        assert_eq!(
            normalize_url("  HTTPS://Example.COM/a/b#section ").as_deref(),
            Some("https://example.com/a/b")
        );
        assert_eq!(
            normalize_url("https://example.com/").as_deref(),
            Some("https://example.com")
        );
        assert!(normalize_url("ftp://example.com/x").is_none());
        assert!(normalize_url("not a url").is_none());
    }

    #[test]
    fn query_fingerprint_is_stable() {
        assert_eq!(query_fingerprint("  Climate   CHANGE\tpolicy "), "climate change policy");
        assert!(AcquisitionTask::query("brave", "   ", 0).is_none());
        let a = AcquisitionTask::query("brave", "Climate change", 0).unwrap();
        let b = AcquisitionTask::query("brave", "climate  change", 1).unwrap();
        assert_eq!(a.cache_key(), b.cache_key());
        let c = AcquisitionTask::query("semantic_scholar", "climate change", 0).unwrap();
        assert_ne!(a.cache_key(), c.cache_key());
    }

    #[test]
    fn payload_kinds() {
        assert!(Payload::new("<p>x</p>", "text/html; charset=utf-8").is_html());
        assert!(Payload::new("<html><body>x", "").is_html());
        assert!(Payload::new("{}", "application/json").is_json());
        assert!(Payload::new("plain", "text/plain").is_textual());
        assert!(!Payload::new(vec![0x25, 0x50, 0x44, 0x46], "application/pdf").is_textual());
        assert!(Payload::new("%PDF-1.4\n", "application/octet-stream").is_pdf());
        assert!(!Payload::new("<p>x</p>", "text/html").is_pdf());
    }
}
