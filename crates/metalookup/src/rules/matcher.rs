// ABOUTME: Immutable compiled matcher over network rules, indexed by literal URL tokens.
// ABOUTME: Evaluates (url, source host, resource type) queries; exceptions override blocks.

use std::collections::HashMap;

use crate::content::{registrable_domain, ResourceType};
use crate::rules::parse::{Anchor, NetworkRule, Pattern};

/// One request to test against the rules.
#[derive(Debug, Clone, Copy)]
pub struct RequestQuery<'a> {
    pub url: &'a str,
    /// Host name of the page that issued the request.
    pub source_host: &'a str,
    pub resource_type: ResourceType,
}

/// Outcome of a match; `Blocked` carries the raw text of the blocking rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchDecision {
    NoMatch,
    Blocked(String),
    /// A blocking rule matched but an exception rule allowed the request.
    Allowed(String),
}

impl MatchDecision {
    pub fn is_blocked(&self) -> bool {
        matches!(self, MatchDecision::Blocked(_))
    }
}

#[derive(Debug, Default)]
struct RuleIndex {
    rules: Vec<NetworkRule>,
    by_token: HashMap<String, Vec<usize>>,
    untokenized: Vec<usize>,
}

impl RuleIndex {
    fn insert(&mut self, rule: NetworkRule) {
        let id = self.rules.len();
        match index_token(&rule) {
            Some(token) => self.by_token.entry(token).or_default().push(id),
            None => self.untokenized.push(id),
        }
        self.rules.push(rule);
    }

    fn find(&self, tokens: &[&str], ctx: &MatchContext<'_>) -> Option<&NetworkRule> {
        let candidates = tokens
            .iter()
            .filter_map(|t| self.by_token.get(*t))
            .flatten()
            .chain(self.untokenized.iter());
        candidates
            .map(|&id| &self.rules[id])
            .find(|rule| rule_matches(rule, ctx))
    }
}

/// Compiled, immutable matcher. Safe to share across threads.
#[derive(Debug, Default)]
pub struct Matcher {
    blocking: RuleIndex,
    exceptions: RuleIndex,
}

struct MatchContext<'a> {
    url: &'a str,
    url_lower: &'a str,
    host: &'a str,
    source_host: &'a str,
    resource_type: ResourceType,
    third_party: bool,
}

impl Matcher {
    pub(crate) fn compile(rules: impl IntoIterator<Item = NetworkRule>) -> Self {
        let mut matcher = Matcher::default();
        for rule in rules {
            if rule.exception {
                matcher.exceptions.insert(rule);
            } else {
                matcher.blocking.insert(rule);
            }
        }
        matcher
    }

    pub fn blocking_len(&self) -> usize {
        self.blocking.rules.len()
    }

    pub fn exception_len(&self) -> usize {
        self.exceptions.rules.len()
    }

    pub fn check(&self, query: &RequestQuery<'_>) -> MatchDecision {
        let url_lower = query.url.to_lowercase();
        let host = url::Url::parse(query.url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_lowercase))
            .unwrap_or_default();
        let source_host = query.source_host.to_lowercase();
        let third_party = !source_host.is_empty()
            && !host.is_empty()
            && registrable_domain(&host) != registrable_domain(&source_host);
        let ctx = MatchContext {
            url: query.url,
            url_lower: &url_lower,
            host: &host,
            source_host: &source_host,
            resource_type: query.resource_type,
            third_party,
        };
        let tokens = tokenize(&url_lower);

        let Some(block) = self.blocking.find(&tokens, &ctx) else {
            return MatchDecision::NoMatch;
        };
        match self.exceptions.find(&tokens, &ctx) {
            Some(exception) => MatchDecision::Allowed(exception.raw.clone()),
            None => MatchDecision::Blocked(block.raw.clone()),
        }
    }
}

fn is_token_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'%'
}

/// Maximal runs of token bytes, deduplicated.
fn tokenize(url_lower: &str) -> Vec<&str> {
    let mut tokens: Vec<&str> = url_lower
        .split(|c: char| !(c.is_ascii_alphanumeric() || c == '%'))
        .filter(|t| t.len() >= 2)
        .collect();
    tokens.sort_unstable();
    tokens.dedup();
    tokens
}

/// Longest literal token that must appear as a whole URL token whenever the rule matches.
fn index_token(rule: &NetworkRule) -> Option<String> {
    let Pattern::Glob {
        anchor,
        end_anchor,
        ref body,
    } = rule.pattern
    else {
        return None;
    };
    if rule.options.match_case {
        return None;
    }

    let mut best: Option<(usize, usize)> = None;
    let mut i = 0;
    while i < body.len() {
        if !is_token_byte(body[i]) {
            i += 1;
            continue;
        }
        let start = i;
        while i < body.len() && is_token_byte(body[i]) {
            i += 1;
        }
        let end = i;
        let left_ok = if start == 0 {
            anchor != Anchor::None
        } else {
            body[start - 1] != b'*'
        };
        let right_ok = if end == body.len() {
            end_anchor
        } else {
            body[end] != b'*'
        };
        if left_ok && right_ok && end - start >= 2 && best.map_or(true, |(s, e)| end - start > e - s) {
            best = Some((start, end));
        }
    }
    best.map(|(s, e)| String::from_utf8_lossy(&body[s..e]).into_owned())
}

fn rule_matches(rule: &NetworkRule, ctx: &MatchContext<'_>) -> bool {
    options_match(rule, ctx) && pattern_matches(rule, ctx)
}

fn options_match(rule: &NetworkRule, ctx: &MatchContext<'_>) -> bool {
    let opts = &rule.options;
    let bit = ctx.resource_type.bit();
    if opts.include_types != 0 && opts.include_types & bit == 0 {
        return false;
    }
    if opts.exclude_types & bit != 0 {
        return false;
    }
    if let Some(third_party) = opts.third_party {
        if third_party != ctx.third_party {
            return false;
        }
    }
    let on_domain = |d: &String| {
        ctx.source_host == d.as_str() || ctx.source_host.ends_with(&format!(".{}", d))
    };
    if !opts.include_domains.is_empty() && !opts.include_domains.iter().any(on_domain) {
        return false;
    }
    if opts.exclude_domains.iter().any(on_domain) {
        return false;
    }
    true
}

fn pattern_matches(rule: &NetworkRule, ctx: &MatchContext<'_>) -> bool {
    match &rule.pattern {
        Pattern::Regex(re) => re.is_match(ctx.url),
        Pattern::Glob {
            anchor,
            end_anchor,
            body,
        } => {
            let hay = if rule.options.match_case {
                ctx.url.as_bytes()
            } else {
                ctx.url_lower.as_bytes()
            };
            match anchor {
                Anchor::Start => glob_at(body, hay, *end_anchor),
                Anchor::None => (0..=hay.len()).any(|i| glob_at(body, &hay[i..], *end_anchor)),
                Anchor::Domain => domain_starts(hay, ctx.host)
                    .into_iter()
                    .any(|i| glob_at(body, &hay[i..], *end_anchor)),
            }
        }
    }
}

/// Byte offsets in `url` where the host or one of its labels begins.
fn domain_starts(url: &[u8], host: &str) -> Vec<usize> {
    if host.is_empty() {
        return Vec::new();
    }
    let Some(scheme_end) = url.windows(3).position(|w| w == b"://") else {
        return Vec::new();
    };
    let mut host_start = scheme_end + 3;
    // Skip credentials.
    if let Some(at) = url[host_start..]
        .iter()
        .take_while(|&&b| b != b'/')
        .position(|&b| b == b'@')
    {
        host_start += at + 1;
    }
    let host_len = host.len().min(url.len().saturating_sub(host_start));
    let mut starts = vec![host_start];
    for (offset, &b) in url[host_start..host_start + host_len].iter().enumerate() {
        if b == b'.' {
            starts.push(host_start + offset + 1);
        }
    }
    starts
}

fn is_separator(b: u8) -> bool {
    !(b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.' | b'%'))
}

/// Match `pattern` at the start of `hay`; with `to_end` the match must consume all of `hay`.
///
/// `*` matches any run, `^` a single separator byte or the end of input.
fn glob_at(pattern: &[u8], hay: &[u8], to_end: bool) -> bool {
    let (mut p, mut h) = (0usize, 0usize);
    let mut star: Option<(usize, usize)> = None;
    loop {
        if p == pattern.len() {
            if !to_end || h == hay.len() {
                return true;
            }
        } else if pattern[p] == b'*' {
            star = Some((p, h));
            p += 1;
            continue;
        } else if h < hay.len() {
            let ok = match pattern[p] {
                b'^' => is_separator(hay[h]),
                c => c == hay[h],
            };
            if ok {
                p += 1;
                h += 1;
                continue;
            }
        } else if pattern[p..].iter().all(|&c| c == b'^' || c == b'*') {
            // A trailing separator also matches the end of the URL.
            return true;
        }

        match star {
            Some((sp, sh)) if sh < hay.len() => {
                star = Some((sp, sh + 1));
                p = sp + 1;
                h = sh + 1;
            }
            _ => return false,
        }
    }
}
