// ABOUTME: Ad-block style rule engine: merges filter lists into one immutable, shareable rule set.
// ABOUTME: The merge is a deduplicated line union, so list order and repetition do not matter.

//! Ad-block style URL matching.
//!
//! A [`FilterRuleSet`] is compiled once from the union of one or more
//! filter lists and then only read. Lines are deduplicated and sorted
//! before compiling, which makes merging lists commutative and idempotent.

pub mod lists;
pub mod matcher;
pub mod parse;

use std::collections::BTreeSet;

use crate::content::ObservedRequest;

pub use lists::{cache_file_name, FilterList, FilterListSource};
pub use matcher::{MatchDecision, Matcher, RequestQuery};
pub use parse::{parse_meta, parse_rule, FilterListMeta, NetworkRule, SkipReason};

/// Counts gathered while compiling a rule set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildStats {
    pub lines: usize,
    pub blocking: usize,
    pub exceptions: usize,
    pub comments: usize,
    pub cosmetic: usize,
    pub unsupported: usize,
    pub invalid: usize,
}

/// A blocked sub-request found by [`FilterRuleSet::scan`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleHit {
    pub url: String,
    pub rule: String,
}

/// Compiled, immutable set of network rules.
#[derive(Debug)]
pub struct FilterRuleSet {
    lines: BTreeSet<String>,
    matcher: Matcher,
    stats: BuildStats,
}

impl FilterRuleSet {
    /// Build from already downloaded lists.
    pub fn from_lists(lists: &[FilterList]) -> Self {
        Self::from_texts(lists.iter().map(|l| l.text.as_str()))
    }

    /// Build from raw list bodies.
    pub fn from_texts<'a>(texts: impl IntoIterator<Item = &'a str>) -> Self {
        let lines: BTreeSet<String> = texts
            .into_iter()
            .flat_map(str::lines)
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();

        let mut stats = BuildStats {
            lines: lines.len(),
            ..Default::default()
        };
        let mut rules = Vec::new();
        for line in &lines {
            match parse_rule(line) {
                Ok(rule) => rules.push(rule),
                Err(SkipReason::Empty) => {}
                Err(SkipReason::Comment) => stats.comments += 1,
                Err(SkipReason::Cosmetic) => stats.cosmetic += 1,
                Err(SkipReason::UnsupportedOption(_)) => stats.unsupported += 1,
                Err(SkipReason::InvalidPattern) => stats.invalid += 1,
            }
        }
        let matcher = Matcher::compile(rules);
        stats.blocking = matcher.blocking_len();
        stats.exceptions = matcher.exception_len();

        Self {
            lines,
            matcher,
            stats,
        }
    }

    /// The deduplicated source lines, sorted.
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(String::as_str)
    }

    pub fn stats(&self) -> &BuildStats {
        &self.stats
    }

    pub fn is_empty(&self) -> bool {
        self.stats.blocking == 0
    }

    pub fn check(&self, query: &RequestQuery<'_>) -> MatchDecision {
        self.matcher.check(query)
    }

    /// Test sub-requests in order and return the blocked ones.
    ///
    /// Scanning stops once more than `limit` hits were found.
    pub fn scan(
        &self,
        requests: &[ObservedRequest],
        source_host: &str,
        limit: usize,
    ) -> Vec<RuleHit> {
        let mut hits = Vec::new();
        for request in requests {
            let query = RequestQuery {
                url: &request.url,
                source_host,
                resource_type: request.resource_type,
            };
            if let MatchDecision::Blocked(rule) = self.matcher.check(&query) {
                hits.push(RuleHit {
                    url: request.url.clone(),
                    rule,
                });
                if hits.len() > limit {
                    break;
                }
            }
        }
        hits
    }
}
