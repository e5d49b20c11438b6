pub mod cache;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod error;
pub mod extractor;
pub mod fetcher;
pub mod index;
pub mod normalize;
pub mod pipeline;

pub use catalog::{merge, Catalog, MergeOutcome};
pub use config::{Config, SourcePage};
pub use error::{CatalogError, ConfigError, FetchFailure, IndexError, PipelineError};
pub use extractor::{CandidateUA, ExtractionRule};
pub use normalize::{normalize, CanonicalUA, Plausibility};
pub use pipeline::{Pipeline, RunOptions, RunOutcome, RunSummary};
