//! One full run: fetch every source, extract, normalize, merge, persist.
//!
//! Sources are fetched concurrently and never share state; a failed source is
//! recorded as skipped and the others carry on. Nothing touches the catalog
//! file until every source has been processed, so an aborted run leaves it
//! as it was.

use futures::future::join_all;
use std::fmt;

use crate::cache::{CacheStatus, ResponseCache};
use crate::catalog::{merge, Catalog};
use crate::config::{Config, SourcePage};
use crate::error::PipelineError;
use crate::extractor::extract;
use crate::fetcher::{Fetcher, PageContent};
use crate::index::BrowserIndex;
use crate::normalize::{normalize, CanonicalUA, Plausibility, ProductTokenCheck, Rejection};

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Compute everything but write nothing.
    pub dry_run: bool,
}

/// Rejection counts by reason.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Rejections {
    pub empty: usize,
    pub too_short: usize,
    pub invalid_character: usize,
}

impl Rejections {
    fn record(&mut self, reason: Rejection) {
        match reason {
            Rejection::Empty => self.empty += 1,
            Rejection::TooShort { .. } => self.too_short += 1,
            Rejection::InvalidCharacter(_) => self.invalid_character += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.empty + self.too_short + self.invalid_character
    }

    fn add(&mut self, other: &Rejections) {
        self.empty += other.empty;
        self.too_short += other.too_short;
        self.invalid_character += other.invalid_character;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceOutcome {
    Processed {
        source_id: String,
        cache_status: CacheStatus,
        extracted: usize,
        rejected: Rejections,
        implausible: usize,
        accepted: usize,
    },
    Skipped {
        source_id: String,
        reason: String,
    },
}

impl SourceOutcome {
    pub fn source_id(&self) -> &str {
        match self {
            SourceOutcome::Processed { source_id, .. } | SourceOutcome::Skipped { source_id, .. } => source_id,
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, SourceOutcome::Skipped { .. })
    }
}

/// Terminal state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Unchanged,
    Written { added: usize, total: usize },
    /// Dry run with pending changes; nothing was written.
    WouldWrite { added: usize, total: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub sources: Vec<SourceOutcome>,
    pub outcome: RunOutcome,
    pub catalog_len: usize,
    pub index_written: bool,
}

impl RunSummary {
    pub fn sources_fetched(&self) -> usize {
        self.sources.iter().filter(|s| !s.is_skipped()).count()
    }

    pub fn skipped_sources(&self) -> Vec<&str> {
        self.sources
            .iter()
            .filter(|s| s.is_skipped())
            .map(SourceOutcome::source_id)
            .collect()
    }

    fn count_status(&self, wanted: CacheStatus) -> usize {
        self.sources
            .iter()
            .filter(|s| matches!(s, SourceOutcome::Processed { cache_status, .. } if *cache_status == wanted))
            .count()
    }

    pub fn cache_hits(&self) -> usize {
        self.count_status(CacheStatus::Hit)
    }

    pub fn stale_fallbacks(&self) -> usize {
        self.count_status(CacheStatus::StaleFallback)
    }

    pub fn candidates_extracted(&self) -> usize {
        self.processed().map(|(extracted, _, _)| extracted).sum()
    }

    pub fn rejections(&self) -> Rejections {
        let mut total = Rejections::default();
        for (_, rejected, _) in self.processed() {
            total.add(&rejected);
        }
        total
    }

    pub fn implausible(&self) -> usize {
        self.processed().map(|(_, _, implausible)| implausible).sum()
    }

    pub fn changed(&self) -> bool {
        !matches!(self.outcome, RunOutcome::Unchanged)
    }

    fn processed(&self) -> impl Iterator<Item = (usize, Rejections, usize)> + '_ {
        self.sources.iter().filter_map(|s| match s {
            SourceOutcome::Processed {
                extracted,
                rejected,
                implausible,
                ..
            } => Some((*extracted, *rejected, *implausible)),
            SourceOutcome::Skipped { .. } => None,
        })
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let skipped = self.skipped_sources();
        write!(f, "sources:    {} fetched, {} skipped", self.sources_fetched(), skipped.len())?;
        if !skipped.is_empty() {
            write!(f, " ({})", skipped.join(", "))?;
        }
        writeln!(f)?;
        writeln!(
            f,
            "cache:      {} hits, {} stale fallbacks",
            self.cache_hits(),
            self.stale_fallbacks()
        )?;
        let rejected = self.rejections();
        writeln!(
            f,
            "candidates: {} extracted, {} rejected (empty {}, too short {}, invalid chars {}), {} implausible",
            self.candidates_extracted(),
            rejected.total(),
            rejected.empty,
            rejected.too_short,
            rejected.invalid_character,
            self.implausible()
        )?;
        match self.outcome {
            RunOutcome::Unchanged => write!(f, "catalog:    unchanged ({} entries)", self.catalog_len),
            RunOutcome::Written { added, total } => write!(f, "catalog:    written (+{}, {} entries)", added, total),
            RunOutcome::WouldWrite { added, total } => {
                write!(f, "catalog:    would write (+{}, {} entries), dry run", added, total)
            }
        }
    }
}

/// Extract, normalize and filter one fetched page.
pub fn process_page(
    content: &PageContent,
    source: &SourcePage,
    min_len: usize,
    checks: &[Box<dyn Plausibility>],
) -> (SourceOutcome, Vec<CanonicalUA>) {
    let candidates = extract(content, &source.rule);
    let mut rejected = Rejections::default();
    let mut implausible = 0;
    let mut accepted = Vec::with_capacity(candidates.len());

    for candidate in &candidates {
        match normalize(candidate, min_len) {
            Ok(ua) if checks.iter().all(|c| c.is_plausible(&ua)) => accepted.push(ua),
            Ok(ua) => {
                tracing::debug!(source = %source.id, ua = %ua, "implausible entry dropped");
                implausible += 1;
            }
            Err(reason) => rejected.record(reason),
        }
    }

    if rejected.total() > 0 {
        tracing::info!(
            source = %source.id,
            rejected = rejected.total(),
            "ValidationRejected: dropped malformed candidates"
        );
    }

    let outcome = SourceOutcome::Processed {
        source_id: source.id.clone(),
        cache_status: content.cache_status,
        extracted: candidates.len(),
        rejected,
        implausible,
        accepted: accepted.len(),
    };
    (outcome, accepted)
}

/// Pipeline entry point. Holds the run configuration and the plausibility
/// checks every normalized entry must pass.
pub struct Pipeline<'a> {
    config: &'a Config,
    checks: Vec<Box<dyn Plausibility>>,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: &'a Config) -> Self {
        let mut checks: Vec<Box<dyn Plausibility>> = Vec::new();
        if config.require_product_token {
            checks.push(Box::new(ProductTokenCheck));
        }
        Self { config, checks }
    }

    /// Add an external sanity check.
    pub fn with_check(mut self, check: impl Plausibility + 'static) -> Self {
        self.checks.push(Box::new(check));
        self
    }

    pub async fn run(&self, options: RunOptions) -> Result<RunSummary, PipelineError> {
        let config = self.config;

        let loaded = Catalog::load(&config.catalog_path)?;
        let catalog_exists = loaded.is_some();
        let existing = loaded.unwrap_or_default();
        tracing::info!(
            path = %config.catalog_path.display(),
            entries = existing.len(),
            exists = catalog_exists,
            "loaded catalog"
        );

        let user_agent = BrowserIndex::build(&existing).default_user_agent().to_string();
        let cache = match ResponseCache::new(&config.cache_dir, config.cache_ttl) {
            Ok(cache) => Some(cache),
            Err(e) => {
                tracing::warn!(error = %e, "⚠️ response cache unavailable, fetching without it");
                None
            }
        };
        let fetcher = Fetcher::new(cache, config.timeout, user_agent)?;

        let fetches = join_all(config.sources.iter().map(|source| fetcher.fetch(source))).await;

        let mut outcomes = Vec::with_capacity(config.sources.len());
        let mut incoming = Vec::new();
        for (source, fetched) in config.sources.iter().zip(fetches) {
            match fetched {
                Ok(content) => {
                    let (outcome, accepted) = process_page(&content, source, config.min_ua_length, &self.checks);
                    incoming.extend(accepted);
                    outcomes.push(outcome);
                }
                Err(failure) => {
                    tracing::warn!(source = %source.id, error = %failure, "⚠️ FetchFailure: skipping source");
                    outcomes.push(SourceOutcome::Skipped {
                        source_id: source.id.clone(),
                        reason: failure.kind.to_string(),
                    });
                }
            }
        }

        let fetched = outcomes.iter().filter(|o| !o.is_skipped()).count();
        if fetched == 0 && !catalog_exists {
            return Err(PipelineError::AllSourcesFailed(config.sources.len()));
        }

        let merged = merge(&existing, incoming);
        let total = merged.catalog.len();
        let outcome = if !merged.changed {
            RunOutcome::Unchanged
        } else if options.dry_run {
            RunOutcome::WouldWrite {
                added: merged.added,
                total,
            }
        } else {
            merged.catalog.persist(&config.catalog_path)?;
            tracing::info!(
                path = %config.catalog_path.display(),
                added = merged.added,
                total,
                "✅ catalog written"
            );
            RunOutcome::Written {
                added: merged.added,
                total,
            }
        };

        let mut index_written = false;
        match &config.index_path {
            Some(index_path) if !options.dry_run => {
                match BrowserIndex::build(&merged.catalog).write_if_changed(index_path) {
                    Ok(written) => {
                        index_written = written;
                        if written {
                            tracing::info!(path = %index_path.display(), "browser index written");
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "⚠️ browser index not written"),
                }
            }
            _ => {}
        }

        let summary = RunSummary {
            sources: outcomes,
            outcome,
            catalog_len: total,
            index_written,
        };
        tracing::info!(
            fetched = summary.sources_fetched(),
            skipped = summary.skipped_sources().len(),
            extracted = summary.candidates_extracted(),
            rejected = summary.rejections().total(),
            changed = summary.changed(),
            "run finished"
        );
        Ok(summary)
    }
}
