// src/fetch/providers/semantic_scholar.rs
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::error::ProviderError;
use crate::fetch::types::{AcquisitionTask, Payload, Provider};
use crate::sanitize::{validate_source_url, Provenance, Sanitizer};

pub const PROVIDER: &str = "semantic_scholar";
pub const ENDPOINT: &str = "https://api.semanticscholar.org/graph/v1/paper/search";
pub const FIELDS: &str = "title,abstract,url,year,venue,authors,citationCount,openAccessPdf";

/// Abstracts at least this long are used as the paper body directly;
/// shorter ones make the pipeline try the full text.
pub const MIN_ABSTRACT_CHARS: usize = 200;

#[derive(Clone)]
pub struct SemanticScholar {
    client: Client,
    api_key: Option<String>,
    endpoint: String,
    limit: usize,
}

impl std::fmt::Debug for SemanticScholar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SemanticScholar")
            .field("endpoint", &self.endpoint)
            .field("keyed", &self.api_key.is_some())
            .field("limit", &self.limit)
            .finish()
    }
}

impl SemanticScholar {
    pub fn new(client: Client, api_key: Option<String>) -> Self {
        Self {
            client,
            api_key,
            endpoint: ENDPOINT.to_string(),
            limit: 10,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit.max(1);
        self
    }
}

#[async_trait]
impl Provider for SemanticScholar {
    async fn fetch(&self, task: &AcquisitionTask) -> Result<Payload, ProviderError> {
        let limit = self.limit.to_string();
        let mut request = self.client.get(&self.endpoint).query(&[
            ("query", task.identifier.as_str()),
            ("limit", limit.as_str()),
            ("fields", FIELDS),
        ]);
        if let Some(key) = &self.api_key {
            request = request.header("x-api-key", key);
        }
        super::send(request).await
    }

    fn name(&self) -> &str {
        PROVIDER
    }
}

#[derive(Debug, Deserialize, Default)]
struct SearchResponse {
    #[serde(default)]
    data: Vec<RawPaper>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPaper {
    title: Option<String>,
    #[serde(rename = "abstract")]
    abstract_text: Option<String>,
    url: Option<String>,
    year: Option<i32>,
    venue: Option<String>,
    #[serde(default)]
    authors: Vec<RawAuthor>,
    citation_count: Option<u64>,
    open_access_pdf: Option<RawPdf>,
}

#[derive(Debug, Deserialize)]
struct RawAuthor {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawPdf {
    url: Option<String>,
}

/// Whitelisted paper metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Paper {
    pub title: String,
    pub abstract_text: Option<String>,
    /// Open-access PDF if available, else the landing page.
    pub url: Option<String>,
    pub year: Option<i32>,
    pub venue: Option<String>,
    pub citations: u64,
    pub authors: Vec<String>,
    pub open_access: bool,
}

impl Paper {
    pub fn has_substantial_abstract(&self) -> bool {
        self.abstract_text
            .as_deref()
            .is_some_and(|a| a.chars().count() >= MIN_ABSTRACT_CHARS)
    }

    /// Stable identifier used to correlate the paper with its record.
    pub fn source_id(&self) -> String {
        self.url
            .clone()
            .unwrap_or_else(|| format!("{PROVIDER}:{}", self.title.to_lowercase()))
    }

    pub fn provenance(&self, round: u32) -> Provenance {
        Provenance {
            provider: PROVIDER.to_string(),
            round,
            url: self.url.clone(),
            content_type: "application/json".to_string(),
            title: Some(self.title.clone()),
            year: self.year,
            venue: self.venue.clone(),
            citations: Some(self.citations),
            authors: self.authors.clone(),
            open_access: Some(self.open_access),
            ..Provenance::default()
        }
    }
}

/// Extract papers with at least `min_citations` citations (missing counts as 0).
pub fn parse_papers(payload: &Payload, min_citations: u64, sanitizer: &Sanitizer) -> Vec<Paper> {
    let parsed: SearchResponse = match serde_json::from_slice(&payload.bytes) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(target: "fetch", provider = PROVIDER, error = %e, "unparseable paper search response");
            return Vec::new();
        }
    };
    parsed
        .data
        .into_iter()
        .filter_map(|p| {
            let citations = p.citation_count.unwrap_or(0);
            if citations < min_citations {
                tracing::debug!(
                    target: "fetch",
                    title = p.title.as_deref().unwrap_or("?"),
                    citations,
                    "paper below citation threshold"
                );
                return None;
            }
            let pdf = p
                .open_access_pdf
                .as_ref()
                .and_then(|o| o.url.as_deref())
                .and_then(validate_source_url);
            let open_access = p.open_access_pdf.is_some();
            let url = pdf.or_else(|| p.url.as_deref().and_then(validate_source_url));
            let title = p
                .title
                .map(|t| sanitizer.sanitize_field(&t, 300))
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| "No Title".to_string());
            Some(Paper {
                title,
                abstract_text: p.abstract_text.filter(|a| !a.trim().is_empty()),
                url,
                year: p.year,
                venue: p.venue.filter(|v| !v.trim().is_empty()),
                citations,
                authors: p.authors.into_iter().filter_map(|a| a.name).collect(),
                open_access,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &str = r#"{"total": 3, "data": [
        {"title": "Grid storage", "abstract": "Short.", "url": "https://www.semanticscholar.org/paper/1",
         "year": 2021, "venue": "Energy", "authors": [{"name": "A. Author"}, {"name": null}],
         "citationCount": 12, "openAccessPdf": {"url": "https://arxiv.org/pdf/1.pdf"}},
        {"title": "Obscure", "citationCount": 1},
        {"title": "No count"}
    ]}"#;

    #[test]
    fn citation_threshold_and_best_url() {
        let papers = parse_papers(&Payload::new(BODY, "application/json"), 3, &Sanitizer::default());
        assert_eq!(papers.len(), 1);
        let p = &papers[0];
        assert_eq!(p.url.as_deref(), Some("https://arxiv.org/pdf/1.pdf"));
        assert!(p.open_access);
        assert_eq!(p.authors, vec!["A. Author".to_string()]);
        assert!(!p.has_substantial_abstract());
        assert_eq!(p.provenance(2).citations, Some(12));

        let all = parse_papers(&Payload::new(BODY, "application/json"), 0, &Sanitizer::default());
        assert_eq!(all.len(), 3);
        assert!(all[2].url.is_none());
        assert_eq!(all[2].source_id(), "semantic_scholar:no count");
    }
}
