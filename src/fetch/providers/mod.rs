// src/fetch/providers/mod.rs
//! HTTP providers. Each does one request per call and maps the outcome onto
//! `ProviderError`; retries and pacing live in the retry engine.

pub mod brave;
pub mod semantic_scholar;
pub mod web;

use reqwest::header::{CONTENT_TYPE, RETRY_AFTER};
use reqwest::{Client, RequestBuilder, Response};
use std::time::Duration;

use crate::error::{parse_retry_after, ProviderError};
use crate::fetch::types::Payload;

pub use brave::{BraveSearch, SearchHit};
pub use semantic_scholar::{Paper, SemanticScholar};
pub use web::WebPage;

/// Hard cap on a response body we are willing to keep.
pub const MAX_BODY_BYTES: usize = 5 * 1024 * 1024;

/// Shared client. Only connection setup is bounded here; each call's total
/// time is bounded by the retry engine with the provider's own timeout.
pub fn http_client(user_agent: &str, connect_timeout: Duration) -> Result<Client, ProviderError> {
    Client::builder()
        .user_agent(user_agent)
        .connect_timeout(connect_timeout)
        .build()
        .map_err(|e| ProviderError::Fatal(format!("http client: {e}")))
}

/// Send a prepared request and classify the response.
pub(crate) async fn send(request: RequestBuilder) -> Result<Payload, ProviderError> {
    let rsp = request
        .send()
        .await
        .map_err(|e| ProviderError::from_reqwest(&e))?;

    let status = rsp.status();
    if !status.is_success() {
        let retry_after = rsp
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);
        let reason = status.canonical_reason().unwrap_or_default();
        return Err(ProviderError::from_status(status.as_u16(), retry_after, reason));
    }

    let content_type = rsp
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let bytes = read_capped(rsp, MAX_BODY_BYTES).await?;
    Ok(Payload::new(bytes, content_type))
}

/// Stream the body, keeping at most `cap` bytes. Reading stops at the cap,
/// so an oversized body never sits in memory in full.
pub(crate) async fn read_capped(mut rsp: Response, cap: usize) -> Result<Vec<u8>, ProviderError> {
    let hint = rsp.content_length().map_or(0, |n| n as usize);
    let mut bytes = Vec::with_capacity(hint.min(cap));
    while let Some(chunk) = rsp
        .chunk()
        .await
        .map_err(|e| ProviderError::from_reqwest(&e))?
    {
        let room = cap - bytes.len();
        if chunk.len() >= room {
            bytes.extend_from_slice(&chunk[..room]);
            tracing::debug!(target: "fetch", cap, "response body truncated at cap");
            break;
        }
        bytes.extend_from_slice(&chunk);
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(body: Vec<u8>) -> Response {
        Response::from(http::Response::new(body))
    }

    #[tokio::test]
    async fn body_is_cut_at_cap() {
        let body = vec![b'a'; 64 * 1024];
        let out = read_capped(response(body), 1_000).await.unwrap();
        assert_eq!(out.len(), 1_000);
    }

    #[tokio::test]
    async fn small_body_is_read_whole() {
        let out = read_capped(response(b"{\"ok\":true}".to_vec()), MAX_BODY_BYTES)
            .await
            .unwrap();
        assert_eq!(out, b"{\"ok\":true}");
    }

    #[tokio::test]
    async fn zero_cap_reads_nothing() {
        let out = read_capped(response(vec![1, 2, 3]), 0).await.unwrap();
        assert!(out.is_empty());
    }
}
