use anyhow::Result;
use std::time::Duration;

use crate::cache::{CacheLookup, CacheStatus, RequestKey, ResponseCache};
use crate::config::SourcePage;
use crate::error::{FetchErrorKind, FetchFailure};

const ACCEPT_LANGUAGE: &str = "en-US,en;q=0.9";

/// Body of a fetched source page.
#[derive(Debug, Clone)]
pub struct PageContent {
    pub source_id: String,
    pub body: String,
    pub cache_status: CacheStatus,
}

/// Single-attempt HTTP GET through the response cache. Without a cache every
/// request goes to the network.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: reqwest::Client,
    cache: Option<ResponseCache>,
    user_agent: String,
}

impl Fetcher {
    pub fn new(cache: Option<ResponseCache>, timeout: Duration, user_agent: impl Into<String>) -> Result<Self> {
        let user_agent = user_agent.into();
        let client = reqwest::Client::builder()
            .user_agent(user_agent.as_str())
            .redirect(reqwest::redirect::Policy::limited(10))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            cache,
            user_agent,
        })
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// Fetch one source. Failures are tagged with the source id so the caller
    /// can skip the source and keep going.
    pub async fn fetch(&self, source: &SourcePage) -> Result<PageContent, FetchFailure> {
        if source.url.starts_with("file://") {
            let body = self.read_local(source).await?;
            return Ok(PageContent {
                source_id: source.id.clone(),
                body,
                cache_status: CacheStatus::Bypassed,
            });
        }

        let lookup = match &self.cache {
            Some(cache) => {
                // The User-Agent header follows the catalog and is left out of the key.
                let key = RequestKey::new("GET", &source.url, &[("accept-language", ACCEPT_LANGUAGE)]);
                cache.get_or_fetch(&key, || self.get(source)).await?
            }
            None => CacheLookup {
                body: self.get(source).await?,
                status: CacheStatus::Bypassed,
            },
        };

        tracing::info!(
            source = %source.id,
            url = %source.url,
            status = ?lookup.status,
            bytes = lookup.body.len(),
            "fetched source page"
        );

        Ok(PageContent {
            source_id: source.id.clone(),
            body: lookup.body,
            cache_status: lookup.status,
        })
    }

    async fn get(&self, source: &SourcePage) -> Result<String, FetchFailure> {
        let resp = self
            .client
            .get(&source.url)
            .header("Accept-Language", ACCEPT_LANGUAGE)
            .send()
            .await
            .map_err(|e| FetchFailure::from_reqwest(&source.id, &e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchFailure::new(&source.id, FetchErrorKind::Status(status.as_u16())));
        }

        resp.text()
            .await
            .map_err(|e| FetchFailure::from_reqwest(&source.id, &e))
    }

    async fn read_local(&self, source: &SourcePage) -> Result<String, FetchFailure> {
        let path = reqwest::Url::parse(&source.url)
            .ok()
            .and_then(|u| u.to_file_path().ok())
            .ok_or_else(|| {
                FetchFailure::new(&source.id, FetchErrorKind::Io(format!("bad file url {}", source.url)))
            })?;
        tracing::info!(source = %source.id, path = %path.display(), "reading local source page");
        tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| FetchFailure::new(&source.id, FetchErrorKind::Io(e.to_string())))
    }
}
