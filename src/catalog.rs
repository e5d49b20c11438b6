use std::collections::BTreeSet;
use std::io::Write;
use std::path::Path;

use crate::error::CatalogError;
use crate::normalize::CanonicalUA;

/// The persisted list of User-Agents. After a merge it is sorted and unique;
/// a freshly loaded catalog keeps the file's order so a hand-edited file is
/// detected as changed and rewritten in canonical form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
    entries: Vec<CanonicalUA>,
    /// Some line was altered by canonicalization when the file was parsed.
    rewritten: bool,
}

/// Result of merging candidates into a catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    pub catalog: Catalog,
    pub changed: bool,
    /// Entries in the result that were not in the existing catalog.
    pub added: usize,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[CanonicalUA] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CanonicalUA> {
        self.entries.iter()
    }

    pub fn is_sorted_unique(&self) -> bool {
        self.entries.windows(2).all(|w| w[0] < w[1])
    }

    /// Parse catalog text: one entry per line, blank lines ignored. Lines are
    /// canonicalized like fresh candidates minus the length floor; a line that
    /// fails validation is kept verbatim and logged.
    pub fn parse(text: &str) -> Self {
        let mut rewritten = false;
        let entries = text
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| match CanonicalUA::from_stored_line(line) {
                Ok(ua) => {
                    if ua.as_str() != line {
                        tracing::debug!(line, canonical = %ua, "catalog line canonicalized");
                        rewritten = true;
                    }
                    ua
                }
                Err((kept, reason)) => {
                    tracing::warn!(line, %reason, "catalog line fails validation, keeping it verbatim");
                    kept
                }
            })
            .collect();
        Self { entries, rewritten }
    }

    /// Serialized form: one entry per line with a trailing newline.
    pub fn render(&self) -> String {
        let mut out = String::with_capacity(self.entries.iter().map(|e| e.as_str().len() + 1).sum());
        for entry in &self.entries {
            out.push_str(entry.as_str());
            out.push('\n');
        }
        out
    }

    /// Load the catalog file. `Ok(None)` means the file does not exist yet.
    pub fn load(path: &Path) -> Result<Option<Self>, CatalogError> {
        match std::fs::read_to_string(path) {
            Ok(text) => Ok(Some(Self::parse(&text))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(CatalogError::Read {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Replace the file at `path` atomically.
    pub fn persist(&self, path: &Path) -> Result<(), CatalogError> {
        write_atomic(path, self.render().as_bytes()).map_err(|source| CatalogError::Write {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Union `incoming` into `existing`, dedup by exact equality and sort.
/// `changed` is false exactly when the result equals `existing` entry for entry
/// and no loaded line needed canonicalizing.
pub fn merge<I>(existing: &Catalog, incoming: I) -> MergeOutcome
where
    I: IntoIterator<Item = CanonicalUA>,
{
    let known: BTreeSet<CanonicalUA> = existing.entries.iter().cloned().collect();
    let mut union = known.clone();
    union.extend(incoming);

    let added = union.len() - known.len();
    let entries: Vec<CanonicalUA> = union.into_iter().collect();
    let changed = existing.rewritten || entries != existing.entries;

    MergeOutcome {
        catalog: Catalog {
            entries,
            rewritten: false,
        },
        changed,
        added,
    }
}

/// Write to a temp file in the target directory, then rename over the target.
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
