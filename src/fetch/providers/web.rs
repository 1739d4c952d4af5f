// src/fetch/providers/web.rs
use async_trait::async_trait;
use reqwest::Client;

use crate::error::ProviderError;
use crate::fetch::types::{AcquisitionTask, Payload, Provider};

pub const PROVIDER: &str = "web";

/// Plain page fetch; the task identifier is the normalized URL.
#[derive(Debug, Clone)]
pub struct WebPage {
    client: Client,
}

impl WebPage {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Provider for WebPage {
    async fn fetch(&self, task: &AcquisitionTask) -> Result<Payload, ProviderError> {
        let request = self.client.get(&task.identifier).header(
            "Accept",
            "text/html,application/xhtml+xml,text/plain;q=0.9,*/*;q=0.5",
        );
        super::send(request).await
    }

    fn name(&self) -> &str {
        PROVIDER
    }
}
