//! Browser index: the catalog grouped by browser and OS family.
//!
//! JSON layout:
//!
//! ```text
//! { "@modern": { browser: { os: [ua, ...] } },
//!   browser:   { os: ua | null } }
//! ```
//!
//! `linux`, `macosx`, `windows` and `win10` are always present per browser,
//! `win10` mirrors `windows`, and `ie` mirrors `edge`. The single pick per
//! slot is the greatest entry in catalog order so reruns are byte-identical.

use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::path::Path;

use crate::catalog::{write_atomic, Catalog};
use crate::error::IndexError;

/// Used when the catalog has no chrome-on-linux entry.
pub const FALLBACK_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/107.0.0.0 Safari/537.36";

const REQUIRED_OS: [&str; 4] = ["linux", "macosx", "windows", "win10"];

pub fn browser_family(ua: &str) -> &'static str {
    if ["Edg/", "Edge/", "EdgA/", "EdgiOS/"].iter().any(|t| ua.contains(t)) {
        "edge"
    } else if ua.contains("OPR/") || ua.contains("Opera") {
        "opera"
    } else if ua.contains("SamsungBrowser/") {
        "samsung"
    } else if ua.contains("Firefox/") || ua.contains("FxiOS/") {
        "firefox"
    } else if ua.contains("Chrome/") || ua.contains("CriOS/") {
        "chrome"
    } else if ua.contains("Safari/") {
        "safari"
    } else if ua.contains("Android") {
        "android"
    } else {
        "other"
    }
}

pub fn os_family(ua: &str) -> &'static str {
    if ua.contains("Windows") {
        "windows"
    } else if ua.contains("iPhone") || ua.contains("iPad") || ua.contains("iPod") {
        "ios"
    } else if ua.contains("Macintosh") || ua.contains("Mac OS X") {
        "macosx"
    } else if ua.contains("Android") {
        "android"
    } else if ["Linux", "X11", "Ubuntu", "Fedora", "CrOS"].iter().any(|t| ua.contains(t)) {
        "linux"
    } else {
        "other"
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BrowserIndex {
    groups: BTreeMap<&'static str, BTreeMap<&'static str, Vec<String>>>,
}

impl BrowserIndex {
    pub fn build(catalog: &Catalog) -> Self {
        let mut groups: BTreeMap<&'static str, BTreeMap<&'static str, Vec<String>>> = BTreeMap::new();
        for entry in catalog.iter() {
            let ua = entry.as_str();
            groups
                .entry(browser_family(ua))
                .or_default()
                .entry(os_family(ua))
                .or_default()
                .push(ua.to_string());
        }
        for by_os in groups.values_mut() {
            for list in by_os.values_mut() {
                list.sort();
            }
        }
        Self { groups }
    }

    /// Every entry for a browser/OS pair. `win10` is an alias of `windows`.
    pub fn entries(&self, browser: &str, os: &str) -> &[String] {
        let os = if os == "win10" { "windows" } else { os };
        self.groups
            .get(browser)
            .and_then(|by_os| by_os.get(os))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn pick(&self, browser: &str, os: &str) -> Option<&str> {
        self.entries(browser, os).last().map(String::as_str)
    }

    /// Chrome on Linux, or the built-in fallback.
    pub fn default_user_agent(&self) -> &str {
        self.pick("chrome", "linux").unwrap_or(FALLBACK_USER_AGENT)
    }

    pub fn to_json(&self) -> Value {
        let mut modern = Map::new();
        let mut root = Map::new();

        for (browser, by_os) in &self.groups {
            let mut lists = Map::new();
            let mut picks = Map::new();
            let os_keys = by_os.keys().copied().chain(REQUIRED_OS);
            for os in os_keys {
                let entries = self.entries(browser, os);
                lists.insert(os.to_string(), json!(entries));
                picks.insert(os.to_string(), json!(entries.last()));
            }
            modern.insert(browser.to_string(), Value::Object(lists));
            root.insert(browser.to_string(), Value::Object(picks));
        }

        if let Some(edge) = root.get("edge").cloned() {
            root.insert("ie".to_string(), edge);
        }
        root.insert("@modern".to_string(), Value::Object(modern));
        Value::Object(root)
    }

    pub fn render(&self) -> String {
        let mut text = serde_json::to_string_pretty(&self.to_json()).unwrap_or_else(|_| "{}".to_string());
        text.push('\n');
        text
    }

    /// Write the index unless the file already holds identical content.
    /// Returns whether the file was written.
    pub fn write_if_changed(&self, path: &Path) -> Result<bool, IndexError> {
        let rendered = self.render();
        match std::fs::read_to_string(path) {
            Ok(current) if current == rendered => return Ok(false),
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(source) => {
                return Err(IndexError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        }
        write_atomic(path, rendered.as_bytes()).map_err(|source| IndexError::Write {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(true)
    }
}
