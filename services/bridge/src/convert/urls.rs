//! Free-text URL detection.
//!
//! Matches absolute `http(s)://` URLs and bare domains whose TLD is on the
//! approved list; bare-domain matches get `http://` prepended so Slack
//! renders them as links.

/// TLDs accepted for protocol-less matches. Deliberately short: false
/// positives turn ordinary prose into links.
const APPROVED_TLDS: &[&str] = &[
    "com", "org", "net", "edu", "gov", "int", "mil", "io", "dev", "app", "co", "me", "info",
    "biz", "xyz", "ai", "gg", "tv", "sh", "fm",
];

/// One detected URL within a text run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlMatch {
    pub start: usize,
    pub end: usize,
    /// Normalized target (protocol always present).
    pub url: String,
}

/// Scan `text` for URLs. Offsets are byte offsets into `text`.
pub fn find_urls(text: &str) -> Vec<UrlMatch> {
    let mut matches = Vec::new();
    let mut offset = 0;
    for token in text.split(|c: char| c.is_whitespace()) {
        let start = match text[offset..].find(token) {
            Some(i) if !token.is_empty() => offset + i,
            _ => {
                continue;
            }
        };
        offset = start + token.len();

        let trimmed = token.trim_end_matches(['.', ',', ';', ':', '!', '?', ')', ']']);
        if trimmed.is_empty() {
            continue;
        }
        let end = start + trimmed.len();

        if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            if trimmed.len() > "https://".len() {
                matches.push(UrlMatch {
                    start,
                    end,
                    url: trimmed.to_owned(),
                });
            }
            continue;
        }
        if is_bare_domain(trimmed) {
            matches.push(UrlMatch {
                start,
                end,
                url: format!("http://{}", trimmed),
            });
        }
    }
    matches
}

/// `example.com` or `example.com/path`, with an approved TLD.
fn is_bare_domain(token: &str) -> bool {
    if token.contains('@') {
        // Looks like an email address.
        return false;
    }
    let host = token.split('/').next().unwrap_or(token);
    let mut labels = host.split('.');
    let Some(first) = labels.next() else {
        return false;
    };
    if first.is_empty() {
        return false;
    }
    let rest: Vec<&str> = labels.collect();
    let Some(tld) = rest.last() else {
        return false;
    };
    if !APPROVED_TLDS.contains(tld) {
        return false;
    }
    // Every label must be alphanumeric-or-dash and non-empty.
    std::iter::once(first)
        .chain(rest.iter().copied())
        .all(|label| {
            !label.is_empty()
                && label
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-')
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absolute_urls_match() {
        let found = find_urls("see https://example.org/page for details");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].url, "https://example.org/page");
        assert_eq!(&"see https://example.org/page for details"[found[0].start..found[0].end],
                   "https://example.org/page");
    }

    #[test]
    fn bare_domain_gets_http_prefix() {
        let found = find_urls("check example.com today");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].url, "http://example.com");
    }

    #[test]
    fn unapproved_tld_is_ignored() {
        assert!(find_urls("see example.pizza now").is_empty());
        assert!(find_urls("version 1.2 released").is_empty());
    }

    #[test]
    fn trailing_punctuation_is_excluded() {
        let found = find_urls("go to example.com.");
        assert_eq!(found[0].url, "http://example.com");
    }

    #[test]
    fn emails_are_not_urls() {
        assert!(find_urls("mail me at user@example.com").is_empty());
    }
}
