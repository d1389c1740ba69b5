// ABOUTME: Parser for ad-block style filter-list lines and list header metadata.
// ABOUTME: Produces NetworkRule values; cosmetic, comment and unsupported lines are reported as skipped.

use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::content::ResourceType;

static EXPIRES_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^!\s*expires\s*:\s*(\d+)\s*(day|days|d|hour|hours|h)\b").expect("valid regex")
});

static LAST_MODIFIED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^!\s*last\s+modified\s*:\s*(.+?)\s*$").expect("valid regex"));

/// Informational metadata from a list's header comments. Not enforced anywhere.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterListMeta {
    pub expires: Option<Duration>,
    pub last_modified: Option<String>,
}

/// Read `! Expires:` and `! Last modified:` from the comment block at the top of a list.
pub fn parse_meta(text: &str) -> FilterListMeta {
    let mut meta = FilterListMeta::default();
    for line in text.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('[') {
            continue;
        }
        if !line.starts_with('!') {
            break;
        }
        if let Some(caps) = EXPIRES_RE.captures(line) {
            let unit_secs: u64 = if caps[2].to_lowercase().starts_with('h') { 3600 } else { 86_400 };
            // out-of-range values leave the line unread
            if let Some(secs) = caps[1]
                .parse::<u64>()
                .ok()
                .and_then(|n| n.checked_mul(unit_secs))
            {
                meta.expires = Some(Duration::from_secs(secs));
            }
        } else if let Some(caps) = LAST_MODIFIED_RE.captures(line) {
            meta.last_modified = Some(caps[1].to_string());
        }
    }
    meta
}

/// Why a line did not become a network rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    Empty,
    Comment,
    Cosmetic,
    UnsupportedOption(String),
    InvalidPattern,
}

/// Where the first pattern part is pinned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anchor {
    None,
    /// `|` - start of the URL.
    Start,
    /// `||` - start of the host or of one of its labels.
    Domain,
}

/// A compiled URL pattern.
#[derive(Debug, Clone)]
pub enum Pattern {
    Glob {
        anchor: Anchor,
        end_anchor: bool,
        /// Pattern bytes; `*` is a wildcard and `^` a separator.
        body: Vec<u8>,
    },
    Regex(Regex),
}

/// Request constraints carried by a rule's `$options`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleOptions {
    /// Bitset of allowed resource types; 0 allows every type.
    pub include_types: u16,
    pub exclude_types: u16,
    pub third_party: Option<bool>,
    pub include_domains: Vec<String>,
    pub exclude_domains: Vec<String>,
    pub match_case: bool,
}

/// A blocking or exception rule that applies to requests.
#[derive(Debug, Clone)]
pub struct NetworkRule {
    pub raw: String,
    pub exception: bool,
    pub pattern: Pattern,
    pub options: RuleOptions,
}

fn type_bit(name: &str) -> Option<u16> {
    let t = match name {
        "script" => ResourceType::Script,
        "image" => ResourceType::Image,
        "stylesheet" | "css" => ResourceType::Stylesheet,
        "xmlhttprequest" | "xhr" => ResourceType::Xhr,
        "subdocument" | "frame" => ResourceType::Subdocument,
        "font" => ResourceType::Font,
        "media" => ResourceType::Media,
        "object" | "object-subrequest" => ResourceType::Object,
        "websocket" => ResourceType::Websocket,
        "ping" => ResourceType::Ping,
        "other" => ResourceType::Other,
        "document" | "doc" => ResourceType::Document,
        _ => return None,
    };
    Some(t.bit())
}

fn parse_options(raw: &str) -> Result<RuleOptions, SkipReason> {
    let mut options = RuleOptions::default();
    for opt in raw.split(',').map(str::trim).filter(|o| !o.is_empty()) {
        let lower = opt.to_lowercase();
        let (negated, name) = match lower.strip_prefix('~') {
            Some(rest) => (true, rest),
            None => (false, lower.as_str()),
        };
        if let Some(bit) = type_bit(name) {
            if negated {
                options.exclude_types |= bit;
            } else {
                options.include_types |= bit;
            }
            continue;
        }
        match name {
            "third-party" | "3p" => options.third_party = Some(!negated),
            "first-party" | "1p" => options.third_party = Some(negated),
            "match-case" => options.match_case = true,
            "important" => {}
            _ if name.starts_with("domain=") => {
                for domain in name["domain=".len()..].split('|').filter(|d| !d.is_empty()) {
                    match domain.strip_prefix('~') {
                        Some(d) => options.exclude_domains.push(d.to_string()),
                        None => options.include_domains.push(domain.to_string()),
                    }
                }
            }
            _ => return Err(SkipReason::UnsupportedOption(opt.to_string())),
        }
    }
    Ok(options)
}

/// Split `pattern$options`; a `$` inside a regex pattern is not a separator.
fn split_options(line: &str) -> (&str, Option<&str>) {
    if line.starts_with('/') {
        if let Some(idx) = line.rfind("/$") {
            if idx > 0 {
                return (&line[..=idx], Some(&line[idx + 2..]));
            }
        }
    }
    match line.rfind('$') {
        Some(idx) if !line[idx + 1..].contains('/') => (&line[..idx], Some(&line[idx + 1..])),
        _ => (line, None),
    }
}

/// Parse one filter-list line.
pub fn parse_rule(line: &str) -> Result<NetworkRule, SkipReason> {
    let line = line.trim();
    if line.is_empty() {
        return Err(SkipReason::Empty);
    }
    if line.starts_with('!') || line.starts_with('[') {
        return Err(SkipReason::Comment);
    }
    if line.contains("##") || line.contains("#@#") || line.contains("#?#") || line.contains("#$#") {
        return Err(SkipReason::Cosmetic);
    }

    let (exception, body) = match line.strip_prefix("@@") {
        Some(rest) => (true, rest),
        None => (false, line),
    };
    let (pattern_src, options_src) = split_options(body);
    let options = match options_src {
        Some(raw) => parse_options(raw)?,
        None => RuleOptions::default(),
    };

    let pattern = compile_pattern(pattern_src, options.match_case)?;
    Ok(NetworkRule {
        raw: line.to_string(),
        exception,
        pattern,
        options,
    })
}

fn compile_pattern(src: &str, match_case: bool) -> Result<Pattern, SkipReason> {
    if src.len() > 2 && src.starts_with('/') && src.ends_with('/') {
        let inner = &src[1..src.len() - 1];
        return regex::RegexBuilder::new(inner)
            .case_insensitive(!match_case)
            .size_limit(1 << 20)
            .build()
            .map(Pattern::Regex)
            .map_err(|_| SkipReason::InvalidPattern);
    }

    let (anchor, rest) = if let Some(rest) = src.strip_prefix("||") {
        (Anchor::Domain, rest)
    } else if let Some(rest) = src.strip_prefix('|') {
        (Anchor::Start, rest)
    } else {
        (Anchor::None, src)
    };
    let (end_anchor, rest) = match rest.strip_suffix('|') {
        Some(r) => (true, r),
        None => (false, rest),
    };

    let mut body = if match_case {
        rest.as_bytes().to_vec()
    } else {
        rest.to_lowercase().into_bytes()
    };
    // Collapse runs of wildcards.
    body.dedup_by(|a, b| *a == b'*' && *b == b'*');

    if body.is_empty() || body.iter().all(|&b| b == b'*') {
        // Matches everything; only meaningful together with narrowing options.
        if anchor != Anchor::None || end_anchor {
            return Err(SkipReason::InvalidPattern);
        }
    }

    Ok(Pattern::Glob {
        anchor,
        end_anchor,
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_header_metadata() {
        let text = "[Adblock Plus 2.0]\n! Title: EasyList\n! Last modified: 19 Oct 2026 10:00 UTC\n! Expires: 4 days (update frequency)\n||ads.example^\n! Expires: 1 hours\n";
        let meta = parse_meta(text);
        assert_eq!(meta.expires, Some(Duration::from_secs(4 * 86_400)));
        assert_eq!(meta.last_modified.as_deref(), Some("19 Oct 2026 10:00 UTC"));
    }

    #[test]
    fn oversized_expiry_is_ignored() {
        let meta = parse_meta("! Expires: 999999999999999999 days\n! Last modified: today\n||a.example^\n");
        assert_eq!(meta.expires, None);
        assert_eq!(meta.last_modified.as_deref(), Some("today"));

        let meta = parse_meta("! Expires: 99999999999999999999999 hours\n");
        assert_eq!(meta.expires, None);

        let meta = parse_meta("! Expires: 12 hours\n");
        assert_eq!(meta.expires, Some(Duration::from_secs(12 * 3600)));
    }

    #[test]
    fn skips_comments_and_cosmetics() {
        assert_eq!(parse_rule("! comment").unwrap_err(), SkipReason::Comment);
        assert_eq!(parse_rule("[Adblock Plus 2.0]").unwrap_err(), SkipReason::Comment);
        assert_eq!(parse_rule("example.com##.ad").unwrap_err(), SkipReason::Cosmetic);
        assert_eq!(parse_rule("example.com#@#.ad").unwrap_err(), SkipReason::Cosmetic);
        assert_eq!(parse_rule("   ").unwrap_err(), SkipReason::Empty);
    }

    #[test]
    fn parses_domain_anchor_and_options() {
        let rule = parse_rule("||ads.example.com^$script,third-party,domain=news.com|~blog.news.com")
            .unwrap();
        assert!(!rule.exception);
        match rule.pattern {
            Pattern::Glob { anchor, ref body, .. } => {
                assert_eq!(anchor, Anchor::Domain);
                assert_eq!(body, b"ads.example.com^");
            }
            Pattern::Regex(_) => panic!("expected glob"),
        }
        assert_eq!(rule.options.include_types, ResourceType::Script.bit());
        assert_eq!(rule.options.third_party, Some(true));
        assert_eq!(rule.options.include_domains, vec!["news.com".to_string()]);
        assert_eq!(rule.options.exclude_domains, vec!["blog.news.com".to_string()]);
    }

    #[test]
    fn parses_exception_and_negated_types() {
        let rule = parse_rule("@@||cdn.example.com/ads.js$~image,first-party").unwrap();
        assert!(rule.exception);
        assert_eq!(rule.options.exclude_types, ResourceType::Image.bit());
        assert_eq!(rule.options.third_party, Some(false));
    }

    #[test]
    fn regex_rules_keep_dollar_inside_pattern() {
        let rule = parse_rule(r"/banner\d+\.gif$/$image").unwrap();
        assert!(matches!(rule.pattern, Pattern::Regex(_)));
        assert_eq!(rule.options.include_types, ResourceType::Image.bit());
    }

    #[test]
    fn unsupported_options_are_skipped() {
        assert_eq!(
            parse_rule("||example.com^$redirect=noop.js").unwrap_err(),
            SkipReason::UnsupportedOption("redirect=noop.js".to_string())
        );
    }

    #[test]
    fn path_with_dollar_is_not_options() {
        let rule = parse_rule("ads$track/pixel.gif").unwrap();
        assert_eq!(rule.options, RuleOptions::default());
    }
}
