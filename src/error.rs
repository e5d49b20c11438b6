use std::fmt;
use std::path::PathBuf;

/// Why a single source could not be fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchErrorKind {
    Timeout,
    Status(u16),
    Connection(String),
    Io(String),
}

impl fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchErrorKind::Timeout => write!(f, "request timed out"),
            FetchErrorKind::Status(code) => write!(f, "HTTP status {}", code),
            FetchErrorKind::Connection(msg) => write!(f, "connection error: {}", msg),
            FetchErrorKind::Io(msg) => write!(f, "read error: {}", msg),
        }
    }
}

/// A per-source failure. Recovered by the pipeline: the source is skipped.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("fetch failed for source '{source_id}': {kind}")]
pub struct FetchFailure {
    pub source_id: String,
    pub kind: FetchErrorKind,
}

impl FetchFailure {
    pub fn new(source_id: impl Into<String>, kind: FetchErrorKind) -> Self {
        Self {
            source_id: source_id.into(),
            kind,
        }
    }

    pub(crate) fn from_reqwest(source_id: &str, err: &reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            FetchErrorKind::Timeout
        } else if let Some(status) = err.status() {
            FetchErrorKind::Status(status.as_u16())
        } else {
            FetchErrorKind::Connection(err.to_string())
        };
        Self::new(source_id, kind)
    }
}

/// I/O on the persisted catalog. Always fatal.
#[derive(thiserror::Error, Debug)]
pub enum CatalogError {
    #[error("cannot read catalog {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot write catalog {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// I/O on the derived browser index. A run logs it and carries on.
#[derive(thiserror::Error, Debug)]
pub enum IndexError {
    #[error("cannot read browser index {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot write browser index {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("no sources configured")]
    NoSources,

    #[error("source '{source_id}': invalid url '{url}'")]
    InvalidUrl { source_id: String, url: String },

    #[error("source '{source_id}': invalid extraction rule: {reason}")]
    InvalidRule { source_id: String, reason: String },

    #[error("invalid value for {name}: {value}")]
    InvalidEnv { name: &'static str, value: String },
}

/// Errors that end a run with a non-zero exit code.
#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("all {0} sources failed to fetch and no existing catalog was found")]
    AllSourcesFailed(usize),

    /// The HTTP client could not be built.
    #[error(transparent)]
    Setup(#[from] anyhow::Error),
}
