use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};

use crate::fetcher::PageContent;

// ============================================================================
// Rules
// ============================================================================

/// How User-Agent text is located inside one source page.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExtractionRule {
    /// useragents.me layout: `div.container` blocks with an `h2` whose id
    /// contains `-useragent`, each holding a table with a `useragent` column.
    UseragentsMe,
    /// A named column of every table matching `table`.
    TableColumn { table: String, header: String },
    /// Text of every element matching `selector`.
    Selector { selector: String },
    /// Plain text, one User-Agent per line. `#` starts a comment line.
    Lines,
    /// Every match of `regex` over the raw body; capture group 1 if present.
    Pattern { regex: String },
}

/// A raw string pulled out of a page, not yet normalized.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CandidateUA(pub String);

impl CandidateUA {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CandidateUA {
    fn from(s: &str) -> Self {
        CandidateUA(s.to_string())
    }
}

static CONTAINER: Lazy<Selector> = Lazy::new(|| Selector::parse("div.container").unwrap());
static HEADING: Lazy<Selector> = Lazy::new(|| Selector::parse("h2").unwrap());
static HEADER_CELL: Lazy<Selector> = Lazy::new(|| Selector::parse("thead th").unwrap());
static BODY_ROW: Lazy<Selector> = Lazy::new(|| Selector::parse("tbody tr").unwrap());
static ANY_ROW: Lazy<Selector> = Lazy::new(|| Selector::parse("tr").unwrap());
static TH: Lazy<Selector> = Lazy::new(|| Selector::parse("th").unwrap());
static TD: Lazy<Selector> = Lazy::new(|| Selector::parse("td").unwrap());

const USERAGENT_COLUMN: &str = "useragent";

impl ExtractionRule {
    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            ExtractionRule::UseragentsMe => "useragents_me",
            ExtractionRule::TableColumn { .. } => "table_column",
            ExtractionRule::Selector { .. } => "selector",
            ExtractionRule::Lines => "lines",
            ExtractionRule::Pattern { .. } => "pattern",
        }
    }

    /// Check selectors and patterns up front so a typo fails config loading
    /// instead of silently matching nothing.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            ExtractionRule::UseragentsMe | ExtractionRule::Lines => Ok(()),
            ExtractionRule::TableColumn { table, header } => {
                Selector::parse(table).map_err(|e| format!("bad table selector '{}': {}", table, e))?;
                if header.trim().is_empty() {
                    return Err("table_column header must not be empty".to_string());
                }
                Ok(())
            }
            ExtractionRule::Selector { selector } => Selector::parse(selector)
                .map(|_| ())
                .map_err(|e| format!("bad selector '{}': {}", selector, e)),
            ExtractionRule::Pattern { regex } => Regex::new(regex)
                .map(|_| ())
                .map_err(|e| format!("bad regex '{}': {}", regex, e)),
        }
    }

    /// Run the rule over a page body. Order of the result carries no meaning.
    pub fn extract(&self, body: &str) -> Vec<CandidateUA> {
        match self {
            ExtractionRule::UseragentsMe => extract_useragents_me(body),
            ExtractionRule::TableColumn { table, header } => extract_table_column(body, table, header),
            ExtractionRule::Selector { selector } => extract_selector(body, selector),
            ExtractionRule::Lines => extract_lines(body),
            ExtractionRule::Pattern { regex } => extract_pattern(body, regex),
        }
    }
}

/// Extract candidates from fetched content. Zero matches is logged as
/// `NoMatchesFound` and yields an empty list.
pub fn extract(content: &PageContent, rule: &ExtractionRule) -> Vec<CandidateUA> {
    let candidates = rule.extract(&content.body);
    if candidates.is_empty() {
        tracing::warn!(
            source = %content.source_id,
            rule = rule.name(),
            body_bytes = content.body.len(),
            "NoMatchesFound: page structure did not match extraction rule"
        );
    } else {
        tracing::debug!(
            source = %content.source_id,
            rule = rule.name(),
            count = candidates.len(),
            "extracted candidates"
        );
    }
    candidates
}

// ============================================================================
// Rule implementations
// ============================================================================

fn element_text(el: &ElementRef) -> String {
    el.text().collect::<String>()
}

fn extract_useragents_me(body: &str) -> Vec<CandidateUA> {
    let document = Html::parse_document(body);
    let mut out = Vec::new();

    for container in document.select(&CONTAINER) {
        let Some(heading) = container.select(&HEADING).next() else {
            continue;
        };
        let Some(category_id) = heading.value().attr("id") else {
            continue;
        };
        if !category_id.contains("-useragent") {
            continue;
        }

        let headers: Vec<String> = container
            .select(&HEADER_CELL)
            .map(|th| element_text(&th).trim().to_lowercase())
            .collect();
        if headers.iter().all(|h| h.is_empty()) {
            continue;
        }
        let Some(column) = headers.iter().position(|h| h == USERAGENT_COLUMN) else {
            tracing::debug!(category = category_id, ?headers, "no useragent column");
            continue;
        };

        for row in container.select(&BODY_ROW) {
            if let Some(cell) = row.select(&TD).nth(column) {
                out.push(CandidateUA(element_text(&cell)));
            }
        }
    }

    out
}

fn extract_table_column(body: &str, table: &str, header: &str) -> Vec<CandidateUA> {
    let Ok(table_selector) = Selector::parse(table) else {
        tracing::warn!(selector = table, "unparseable table selector");
        return Vec::new();
    };
    let document = Html::parse_document(body);
    let wanted = header.trim().to_lowercase();
    let mut out = Vec::new();

    for table_el in document.select(&table_selector) {
        let column = table_el
            .select(&TH)
            .position(|th| element_text(&th).trim().to_lowercase() == wanted);
        let Some(column) = column else {
            continue;
        };

        for row in table_el.select(&ANY_ROW) {
            if let Some(cell) = row.select(&TD).nth(column) {
                out.push(CandidateUA(element_text(&cell)));
            }
        }
    }

    out
}

fn extract_selector(body: &str, selector: &str) -> Vec<CandidateUA> {
    let Ok(selector) = Selector::parse(selector) else {
        tracing::warn!(selector, "unparseable selector");
        return Vec::new();
    };
    let document = Html::parse_document(body);
    document
        .select(&selector)
        .map(|el| CandidateUA(element_text(&el)))
        .collect()
}

fn extract_lines(body: &str) -> Vec<CandidateUA> {
    body.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(CandidateUA::from)
        .collect()
}

fn extract_pattern(body: &str, pattern: &str) -> Vec<CandidateUA> {
    let re = match Regex::new(pattern) {
        Ok(re) => re,
        Err(e) => {
            tracing::warn!(pattern, error = %e, "unparseable pattern");
            return Vec::new();
        }
    };
    re.captures_iter(body)
        .filter_map(|caps| caps.get(1).or_else(|| caps.get(0)))
        .map(|m| CandidateUA::from(m.as_str()))
        .collect()
}
