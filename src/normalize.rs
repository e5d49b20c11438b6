use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;

use crate::extractor::CandidateUA;

/// A validated, normalized User-Agent. Exact string equality is the dedup key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CanonicalUA(String);

impl CanonicalUA {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// Wrap a line read back from the persisted catalog as-is.
    pub(crate) fn from_catalog_line(line: &str) -> Self {
        CanonicalUA(line.to_string())
    }

    /// Canonicalize a catalog line with no length floor. A line that fails
    /// character validation is kept verbatim so loading never drops data.
    pub(crate) fn from_stored_line(line: &str) -> Result<Self, (Self, Rejection)> {
        normalize(&CandidateUA::from(line), 0).map_err(|reason| (Self::from_catalog_line(line), reason))
    }
}

impl fmt::Display for CanonicalUA {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CanonicalUA {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Why a candidate was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    Empty,
    TooShort { len: usize, min: usize },
    InvalidCharacter(char),
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::Empty => write!(f, "empty"),
            Rejection::TooShort { len, min } => write!(f, "too short ({} < {})", len, min),
            Rejection::InvalidCharacter(c) => write!(f, "invalid character {:?}", c),
        }
    }
}

/// Canonicalize a candidate:
/// control characters are stripped, whitespace is trimmed and collapsed, and a
/// token that immediately repeats its predecessor is dropped. Token casing is
/// kept as-is.
pub fn normalize(candidate: &CandidateUA, min_len: usize) -> Result<CanonicalUA, Rejection> {
    let stripped: String = candidate
        .as_str()
        .chars()
        .filter_map(|c| {
            if c.is_whitespace() {
                Some(' ')
            } else if c.is_control() {
                None
            } else {
                Some(c)
            }
        })
        .collect();

    let mut tokens: Vec<&str> = Vec::new();
    for token in stripped.split_whitespace() {
        if tokens.last() != Some(&token) {
            tokens.push(token);
        }
    }
    let joined = tokens.join(" ");

    if joined.is_empty() {
        return Err(Rejection::Empty);
    }
    if let Some(bad) = joined.chars().find(|c| !is_ua_char(*c)) {
        return Err(Rejection::InvalidCharacter(bad));
    }
    let len = joined.chars().count();
    if len < min_len {
        return Err(Rejection::TooShort { len, min: min_len });
    }

    Ok(CanonicalUA(joined))
}

/// Printable ASCII, space included.
fn is_ua_char(c: char) -> bool {
    matches!(c, ' '..='~')
}

// ============================================================================
// Plausibility predicate
// ============================================================================

/// External sanity check consulted for every normalized entry before merge.
pub trait Plausibility: Send + Sync {
    fn is_plausible(&self, ua: &CanonicalUA) -> bool;
}

impl<F> Plausibility for F
where
    F: Fn(&CanonicalUA) -> bool + Send + Sync,
{
    fn is_plausible(&self, ua: &CanonicalUA) -> bool {
        self(ua)
    }
}

/// Default predicate: everything passes.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl Plausibility for AcceptAll {
    fn is_plausible(&self, _ua: &CanonicalUA) -> bool {
        true
    }
}

static PRODUCT_TOKEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9._+-]*/[0-9A-Za-z][0-9A-Za-z._+-]*(\s|$)").unwrap());

/// Requires a leading `product/version` token, e.g. `Mozilla/5.0`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProductTokenCheck;

impl Plausibility for ProductTokenCheck {
    fn is_plausible(&self, ua: &CanonicalUA) -> bool {
        PRODUCT_TOKEN.is_match(ua.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn norm(s: &str) -> Result<CanonicalUA, Rejection> {
        normalize(&CandidateUA::from(s), 10)
    }

    #[test]
    fn trims_and_collapses_whitespace() {
        let ua = norm("  Mozilla/5.0 \t(X11;\n  Linux x86_64)  ").unwrap();
        assert_eq!(ua.as_str(), "Mozilla/5.0 (X11; Linux x86_64)");
    }

    #[test]
    fn strips_control_characters() {
        let ua = norm("Mozilla/5.0\u{0} (Windows\u{7f} NT 10.0)").unwrap();
        assert_eq!(ua.as_str(), "Mozilla/5.0 (Windows NT 10.0)");
    }

    #[test]
    fn drops_immediately_repeated_tokens_only() {
        let ua = norm("Mozilla/5.0 Mozilla/5.0 (X11) Gecko Firefox/1 Gecko").unwrap();
        assert_eq!(ua.as_str(), "Mozilla/5.0 (X11) Gecko Firefox/1 Gecko");
    }

    #[test]
    fn keeps_token_casing() {
        let ua = norm("Mozilla/5.0 (iPhone; CPU iPhone OS 17_4 like Mac OS X)").unwrap();
        assert!(ua.as_str().contains("iPhone"));
    }

    #[test]
    fn rejects_exactly_the_invalid_ones() {
        let inputs = [
            ("Mozilla/5.0 (Valid A)", true),
            ("   ", false),
            ("", false),
            ("short", false),
            ("Mozilla/5.0 (Ünïcode)", false),
            ("Opera/9.80 (Valid B)", true),
            ("\u{1}\u{2}\u{3}", false),
        ];
        for (input, valid) in inputs {
            assert_eq!(norm(input).is_ok(), valid, "input {:?}", input);
        }
        assert_eq!(norm("  ").unwrap_err(), Rejection::Empty);
        assert_eq!(norm("short").unwrap_err(), Rejection::TooShort { len: 5, min: 10 });
        assert_eq!(
            norm("Mozilla/5.0 (Ünïcode)").unwrap_err(),
            Rejection::InvalidCharacter('Ü')
        );
    }

    #[test]
    fn valid_candidates_round_trip_modulo_whitespace() {
        let raw = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15";
        assert_eq!(norm(raw).unwrap().as_str(), raw);
    }

    #[test]
    fn stored_lines_are_canonicalized_without_length_floor() {
        let ua = CanonicalUA::from_stored_line(" Mozilla/5.0  (B)\t").unwrap();
        assert_eq!(ua.as_str(), "Mozilla/5.0 (B)");
        assert_eq!(CanonicalUA::from_stored_line("abc").unwrap().as_str(), "abc");

        let (kept, reason) = CanonicalUA::from_stored_line("Mozilla/5.0 (Ünïcode)").unwrap_err();
        assert_eq!(kept.as_str(), "Mozilla/5.0 (Ünïcode)");
        assert_eq!(reason, Rejection::InvalidCharacter('Ü'));
    }

    #[test]
    fn product_token_check() {
        let check = ProductTokenCheck;
        assert!(check.is_plausible(&norm("Mozilla/5.0 (X11; Linux)").unwrap()));
        assert!(check.is_plausible(&norm("curl/8.4.0 extra").unwrap()));
        assert!(!check.is_plausible(&norm("Copy to clipboard").unwrap()));
        assert!(!check.is_plausible(&norm("/5.0 (leading slash)").unwrap()));
    }

    #[test]
    fn closures_are_predicates() {
        let no_bots = |ua: &CanonicalUA| !ua.as_str().contains("bot");
        assert!(no_bots.is_plausible(&norm("Mozilla/5.0 (X11)").unwrap()));
        assert!(!no_bots.is_plausible(&norm("Mozilla/5.0 (compatible; somebot)").unwrap()));
        assert!(AcceptAll.is_plausible(&norm("anything at all").unwrap()));
    }
}
