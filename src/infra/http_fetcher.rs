use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use tokio::sync::Semaphore;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::app::ports::{FetchOptions, FetchPolicy, FetchResult, Fetcher};
use crate::error::Result;

/// Production fetcher backed by reqwest. The policy is baked in at
/// construction; callers never see the networking profile.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
    policy: FetchPolicy,
}

impl HttpFetcher {
    pub fn new(policy: FetchPolicy) -> Result<Self> {
        let client = Client::builder()
            .user_agent(policy.user_agent.clone())
            .timeout(policy.timeout)
            .build()?;
        Ok(Self { client, policy })
    }

    async fn fetch_serial(&self, urls: &[String], options: &FetchOptions) -> Vec<FetchResult> {
        let mut results = Vec::with_capacity(urls.len());
        for (index, url) in urls.iter().enumerate() {
            if index > 0 && !self.policy.delay.is_zero() {
                sleep(self.policy.delay).await;
            }
            results.push(self.fetch(url, options).await);
        }
        results
    }

    async fn fetch_bounded(&self, urls: &[String], options: &FetchOptions) -> Vec<FetchResult> {
        let semaphore = Arc::new(Semaphore::new(self.policy.concurrency));
        let mut handles = Vec::with_capacity(urls.len());
        for (index, url) in urls.iter().enumerate() {
            let semaphore = Arc::clone(&semaphore);
            let fetcher = self.clone();
            let url = url.clone();
            let options = options.clone();
            handles.push(tokio::spawn(async move {
                let result = match semaphore.acquire_owned().await {
                    Ok(_permit) => fetcher.fetch(&url, &options).await,
                    Err(_) => FetchResult::failure(&url, "fetch pool closed"),
                };
                (index, result)
            }));
        }

        // Completion order is arbitrary; results land by input index.
        let mut slots: Vec<Option<FetchResult>> = urls.iter().map(|_| None).collect();
        for handle in handles {
            match handle.await {
                Ok((index, result)) => slots[index] = Some(result),
                Err(e) => warn!(error = %e, "fetch task aborted"),
            }
        }
        slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.unwrap_or_else(|| FetchResult::failure(&urls[index], "fetch task aborted"))
            })
            .collect()
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str, options: &FetchOptions) -> FetchResult {
        debug!(url = %url, "fetching");
        let mut request = self.client.get(url);
        for (name, value) in &options.headers {
            request = request.header(name, value);
        }
        if let Some(timeout) = options.timeout {
            request = request.timeout(timeout);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                debug!(url = %url, error = %e, "request failed");
                return FetchResult::failure(url, e.to_string());
            }
        };

        let status = response.status();
        let mut headers = HashMap::new();
        for (name, value) in response.headers() {
            if let Ok(value) = value.to_str() {
                headers.insert(name.as_str().to_string(), value.to_string());
            }
        }

        match response.text().await {
            Ok(content) => {
                let success = status.is_success();
                if !success {
                    debug!(url = %url, status = status.as_u16(), "non-success status");
                }
                FetchResult {
                    url: url.to_string(),
                    content,
                    status: Some(status.as_u16()),
                    headers,
                    timestamp: Utc::now(),
                    success,
                    error: (!success).then(|| format!("HTTP {}", status.as_u16())),
                }
            }
            Err(e) => FetchResult {
                url: url.to_string(),
                content: String::new(),
                status: Some(status.as_u16()),
                headers,
                timestamp: Utc::now(),
                success: false,
                error: Some(format!("failed to read body: {e}")),
            },
        }
    }

    async fn fetch_many(&self, urls: &[String], options: &FetchOptions) -> Vec<FetchResult> {
        if urls.is_empty() {
            return Vec::new();
        }
        if self.policy.concurrency <= 1 {
            self.fetch_serial(urls, options).await
        } else {
            self.fetch_bounded(urls, options).await
        }
    }
}
