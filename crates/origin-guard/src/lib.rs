//! # origin-guard
//!
//! Origin allowlisting for the edgegate proxy. Browser clients declare the
//! page origin on cross-origin requests; this crate decides whether that
//! origin may go through the gateway at all.
//!
//! Configured entries come in two shapes:
//!
//! - **exact** -- the origin string must match byte-for-byte
//!   (`https://app.example.com`);
//! - **wildcard** -- any entry containing `*`, where `*` matches any
//!   sequence of characters (including the empty one) and everything else
//!   matches literally (`https://*.example.com`).
//!
//! Wildcard entries are compiled into anchored regexes once, at startup.
//! Requests without an `Origin` header (curl, server-to-server callers) are
//! always allowed: origin filtering only scopes browser CORS, the token gate
//! is the actual security boundary.

use std::collections::HashSet;

use regex::Regex;
use tracing::warn;

/// Compiled origin allowlist.
///
/// Construction is best-effort: entries whose wildcard pattern fails to
/// compile are skipped with a warning rather than failing startup.
#[derive(Debug, Default)]
pub struct OriginAllowlist {
    exact: HashSet<String>,
    patterns: Vec<Regex>,
}

/// Translate a wildcard entry into an anchored regex. Literal portions are
/// escaped so that `.`, `+`, and friends in the entry never gain regex
/// meaning; each `*` becomes `.*`.
fn compile_wildcard(entry: &str) -> Result<Regex, regex::Error> {
    let escaped: Vec<String> = entry.split('*').map(regex::escape).collect();
    Regex::new(&format!("^{}$", escaped.join(".*")))
}

impl OriginAllowlist {
    /// Compile the configured entries into an allowlist.
    ///
    /// Entries are trimmed; empty entries and entries that do not compile
    /// are dropped (logged at warn level, never fatal).
    pub fn compile<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut exact = HashSet::new();
        let mut patterns = Vec::new();

        for entry in entries {
            let entry = entry.as_ref().trim();
            if entry.is_empty() {
                continue;
            }

            if entry.contains('*') {
                match compile_wildcard(entry) {
                    Ok(re) => patterns.push(re),
                    Err(err) => {
                        warn!(%entry, %err, "skipping unparseable origin pattern");
                    }
                }
            } else {
                exact.insert(entry.to_string());
            }
        }

        Self { exact, patterns }
    }

    /// Decide whether a request with the given declared origin may proceed.
    ///
    /// `None` means the request carried no `Origin` header and is allowed
    /// unconditionally. A present origin is allowed iff it equals an exact
    /// entry or matches at least one wildcard pattern; the result is a pure
    /// OR across all rules, so entry order never matters.
    pub fn allows(&self, origin: Option<&str>) -> bool {
        let origin = match origin {
            None => return true,
            Some(o) => o,
        };

        if self.exact.contains(origin) {
            return true;
        }

        self.patterns.iter().any(|re| re.is_match(origin))
    }

    /// Number of rules that survived compilation.
    pub fn len(&self) -> usize {
        self.exact.len() + self.patterns.len()
    }

    /// True when no rules are configured.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(entries: &[&str]) -> OriginAllowlist {
        OriginAllowlist::compile(entries.iter().copied())
    }

    // -----------------------------------------------------------------------
    // allows
    // -----------------------------------------------------------------------

    #[test]
    fn absent_origin_is_always_allowed() {
        assert!(list(&[]).allows(None));
        assert!(list(&["https://app.example.com"]).allows(None));
    }

    #[test]
    fn exact_entries_allow_exactly() {
        let allowlist = list(&["https://app.example.com", "https://other.test"]);
        assert!(allowlist.allows(Some("https://app.example.com")));
        assert!(allowlist.allows(Some("https://other.test")));
        assert!(!allowlist.allows(Some("https://app.example.com.evil.com")));
        assert!(!allowlist.allows(Some("http://app.example.com")));
    }

    #[test]
    fn unmatched_origin_is_denied() {
        let allowlist = list(&["https://app.example.com", "https://*.example.com"]);
        assert!(!allowlist.allows(Some("https://gamma.com")));
    }

    #[test]
    fn subdomain_wildcard() {
        let allowlist = list(&["https://*.example.com"]);
        assert!(allowlist.allows(Some("https://a.example.com")));
        // `*` matches any sequence, so nested subdomains match too.
        assert!(allowlist.allows(Some("https://a.b.example.com")));
        // The bare apex lacks the literal `.` boundary the pattern requires.
        assert!(!allowlist.allows(Some("https://example.com")));
        assert!(!allowlist.allows(Some("http://a.example.com")));
    }

    #[test]
    fn wildcard_literal_dots_do_not_match_any_character() {
        // Without escaping, `.` would match any byte and widen the rule.
        let allowlist = list(&["https://*.example.com"]);
        assert!(!allowlist.allows(Some("https://a.exampleXcom")));
    }

    #[test]
    fn multiple_wildcards_in_one_entry() {
        let allowlist = list(&["https://*.example.*"]);
        assert!(allowlist.allows(Some("https://app.example.com")));
        assert!(allowlist.allows(Some("https://app.example.org")));
        assert!(!allowlist.allows(Some("https://example.org")));
    }

    #[test]
    fn star_matches_empty_sequence() {
        let allowlist = list(&["https://app*.example.com"]);
        assert!(allowlist.allows(Some("https://app.example.com")));
        assert!(allowlist.allows(Some("https://app-staging.example.com")));
    }

    #[test]
    fn result_is_independent_of_entry_order() {
        let forward = list(&["https://a.test", "https://*.b.test"]);
        let reverse = list(&["https://*.b.test", "https://a.test"]);
        for origin in ["https://a.test", "https://x.b.test", "https://c.test"] {
            assert_eq!(forward.allows(Some(origin)), reverse.allows(Some(origin)));
        }
    }

    // -----------------------------------------------------------------------
    // compile
    // -----------------------------------------------------------------------

    #[test]
    fn blank_entries_are_dropped() {
        let allowlist = list(&["", "  ", "https://app.example.com"]);
        assert_eq!(allowlist.len(), 1);
    }

    #[test]
    fn entries_are_trimmed() {
        let allowlist = list(&[" https://app.example.com ", " https://*.b.test "]);
        assert!(allowlist.allows(Some("https://app.example.com")));
        assert!(allowlist.allows(Some("https://x.b.test")));
    }

    #[test]
    fn empty_allowlist_denies_all_present_origins() {
        let allowlist = list(&[]);
        assert!(allowlist.is_empty());
        assert!(!allowlist.allows(Some("https://anywhere.test")));
    }
}
