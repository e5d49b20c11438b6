//! On-disk response cache.
//!
//! One JSON record per request key under the cache directory. Freshness is an
//! explicit TTL check against the record's fetch timestamp; a stale record is
//! kept around so it can be served when a refetch fails.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Stable signature of a request: SHA-256 over method, URL and parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
    digest: String,
    url: String,
}

impl RequestKey {
    pub fn new(method: &str, url: &str, params: &[(&str, &str)]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(method.as_bytes());
        hasher.update(b"\n");
        hasher.update(url.as_bytes());
        for (name, value) in params {
            hasher.update(b"\n");
            hasher.update(name.to_ascii_lowercase().as_bytes());
            hasher.update(b"=");
            hasher.update(value.as_bytes());
        }
        Self {
            digest: format!("{:x}", hasher.finalize()),
            url: url.to_string(),
        }
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.digest[..16])
    }
}

/// A persisted response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CachedResponse {
    pub key: String,
    pub url: String,
    pub body: String,
    pub fetched_at: DateTime<Utc>,
    /// TTL in force when the record was written. Informational only.
    pub ttl_secs: u64,
}

impl CachedResponse {
    /// Stale once `ttl` has fully elapsed. Timestamps from the future count as stale.
    pub fn is_stale(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        (now - self.fetched_at)
            .to_std()
            .map(|elapsed| elapsed >= ttl)
            .unwrap_or(true)
    }
}

/// Where a body came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// Fresh record, no network access.
    Hit,
    /// Fetched now and stored.
    Fetched,
    /// Fetch failed; an expired record was served instead.
    StaleFallback,
    /// Cache not consulted: local file source, or no usable cache directory.
    Bypassed,
}

#[derive(Debug, Clone)]
pub struct CacheLookup {
    pub body: String,
    pub status: CacheStatus,
}

/// Key-value response store with an explicit TTL.
#[derive(Debug, Clone)]
pub struct ResponseCache {
    dir: PathBuf,
    ttl: Duration,
}

impl ResponseCache {
    pub fn new(dir: impl Into<PathBuf>, ttl: Duration) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create cache dir: {}", dir.display()))?;
        Ok(Self { dir, ttl })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn record_path(&self, key: &RequestKey) -> PathBuf {
        self.dir.join(format!("{}.json", key.digest()))
    }

    /// Read a record regardless of freshness. Undecodable records count as absent.
    pub async fn load(&self, key: &RequestKey) -> Option<CachedResponse> {
        let path = self.record_path(key);
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "cache record unreadable");
                return None;
            }
        };
        match serde_json::from_str::<CachedResponse>(&raw) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "cache record corrupt, ignoring");
                None
            }
        }
    }

    /// Write a record stamped with the current time.
    pub async fn store(&self, key: &RequestKey, body: &str) -> Result<CachedResponse> {
        let record = CachedResponse {
            key: key.digest().to_string(),
            url: key.url().to_string(),
            body: body.to_string(),
            fetched_at: Utc::now(),
            ttl_secs: self.ttl.as_secs(),
        };
        let path = self.record_path(key);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_vec(&record)?;
        tokio::fs::write(&tmp, json)
            .await
            .with_context(|| format!("failed to write cache record: {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .with_context(|| format!("failed to commit cache record: {}", path.display()))?;
        Ok(record)
    }

    /// Serve a fresh record, else run `fetch` and store its body. If `fetch`
    /// fails and an expired record exists, that record is served as a
    /// `StaleFallback`; with no record the fetch error is returned.
    pub async fn get_or_fetch<F, Fut, E>(&self, key: &RequestKey, fetch: F) -> Result<CacheLookup, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String, E>>,
        E: fmt::Display,
    {
        let existing = self.load(key).await;

        if let Some(record) = &existing {
            if !record.is_stale(self.ttl, Utc::now()) {
                tracing::debug!(key = %key, url = key.url(), "cache hit");
                return Ok(CacheLookup {
                    body: record.body.clone(),
                    status: CacheStatus::Hit,
                });
            }
        }

        match fetch().await {
            Ok(body) => {
                if let Err(e) = self.store(key, &body).await {
                    tracing::warn!(key = %key, error = %e, "could not persist response");
                }
                Ok(CacheLookup {
                    body,
                    status: CacheStatus::Fetched,
                })
            }
            Err(err) => match existing {
                Some(record) => {
                    tracing::warn!(
                        key = %key,
                        url = key.url(),
                        fetched_at = %record.fetched_at,
                        error = %err,
                        "StaleFallback: refetch failed, serving expired response"
                    );
                    Ok(CacheLookup {
                        body: record.body,
                        status: CacheStatus::StaleFallback,
                    })
                }
                None => Err(err),
            },
        }
    }

    /// Delete every expired or corrupt record and any half-written temp file.
    /// Returns how many files were removed.
    pub async fn purge_expired(&self) -> Result<usize> {
        let mut removed = 0;
        let now = Utc::now();
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .with_context(|| format!("failed to list cache dir: {}", self.dir.display()))?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.ends_with(".json.tmp") {
                // Left behind by an interrupted store.
                tokio::fs::remove_file(&path)
                    .await
                    .with_context(|| format!("failed to remove {}", path.display()))?;
                removed += 1;
                continue;
            }
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let expired = match tokio::fs::read_to_string(&path).await {
                Ok(raw) => serde_json::from_str::<CachedResponse>(&raw)
                    .map(|record| record.is_stale(self.ttl, now))
                    .unwrap_or(true),
                Err(_) => true,
            };
            if expired {
                tokio::fs::remove_file(&path)
                    .await
                    .with_context(|| format!("failed to remove {}", path.display()))?;
                removed += 1;
            }
        }

        tracing::info!(removed, dir = %self.dir.display(), "pruned cache");
        Ok(removed)
    }
}
