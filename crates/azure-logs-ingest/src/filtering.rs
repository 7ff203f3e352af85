// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Record filtering driven by the `FILTER_CONFIG` string.
//!
//! The configuration is a `;`-separated list of `name=value` entries:
//!
//! ```text
//! FILTER.GLOBAL.MIN_LOG_LEVEL=Warning;
//! FILTER.RESOURCE_TYPE.CONTAINS_PATTERN.MICROSOFT.WEB/SITES=*error* | *timeout*;
//! FILTER.RESOURCE_ID.MIN_LOG_LEVEL./SUBSCRIPTIONS/.../SITES/MY-APP=2
//! ```
//!
//! Filters of the record's resource id take precedence over those of its
//! resource type, which take precedence over the global ones.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::OnceLock;

use globset::{GlobBuilder, GlobMatcher};
use regex::Regex;
use tracing::{debug, info, warn};

use crate::record::{
    NormalizedRecord, CONTENT_ATTRIBUTE, RESOURCE_ID_ATTRIBUTE, RESOURCE_TYPE_ATTRIBUTE,
    SEVERITY_ATTRIBUTE,
};
use crate::resource::{level_for_severity, LOG_LEVELS};

pub const GLOBAL_SCOPE: &str = "global";

const GLOBAL_FILTER_PREFIX: &str = "filter.global.";
const SCOPED_FILTER_PREFIXES: [&str; 4] = [
    "filter.resource_type.min_log_level.",
    "filter.resource_type.contains_pattern.",
    "filter.resource_id.min_log_level.",
    "filter.resource_id.contains_pattern.",
];
const MIN_LOG_LEVEL: &str = "min_log_level";
const CONTAINS_PATTERN: &str = "contains_pattern";

/// A single check a record must pass to be kept.
#[derive(Debug, Clone)]
pub enum FilterPredicate {
    /// Severity must be one of the accepted names.
    MinLogLevel(HashSet<&'static str>),
    /// Whole content must match the glob.
    ContainsPattern(GlobMatcher),
}

impl FilterPredicate {
    fn is_pattern(&self) -> bool {
        matches!(self, Self::ContainsPattern(_))
    }

    fn passes(&self, severity: &str, content: &str) -> bool {
        match self {
            Self::MinLogLevel(levels) => levels.contains(severity),
            Self::ContainsPattern(glob) => glob.is_match(content),
        }
    }
}

/// Decides whether a record passes a scope's predicates.
///
/// With more than one pattern predicate the patterns form an OR group; every
/// other predicate must pass on its own. With at most one pattern, all
/// predicates are AND-ed. An empty AND group passes.
#[must_use]
pub fn passes_all(predicates: &[FilterPredicate], severity: &str, content: &str) -> bool {
    let (patterns, others): (Vec<&FilterPredicate>, Vec<&FilterPredicate>) =
        predicates.iter().partition(|predicate| predicate.is_pattern());

    if patterns.len() > 1 {
        let any_pattern = patterns
            .iter()
            .any(|predicate| predicate.passes(severity, content));
        let all_others = others
            .iter()
            .all(|predicate| predicate.passes(severity, content));
        any_pattern && all_others
    } else {
        predicates
            .iter()
            .all(|predicate| predicate.passes(severity, content))
    }
}

fn filter_entry_regex() -> Option<&'static Regex> {
    static ENTRY: OnceLock<Option<Regex>> = OnceLock::new();
    ENTRY
        .get_or_init(|| Regex::new(r"([^;\s].+?)=([^;]*)").ok())
        .as_ref()
}

/// Maps a filter name to its scope: `global`, a resource type or a resource id.
fn scope_of(filter_name: &str) -> Option<String> {
    if filter_name.starts_with(GLOBAL_FILTER_PREFIX) {
        return Some(GLOBAL_SCOPE.to_string());
    }
    SCOPED_FILTER_PREFIXES
        .iter()
        .find_map(|prefix| filter_name.strip_prefix(prefix))
        .filter(|scope| !scope.is_empty())
        .map(str::to_lowercase)
}

fn capitalize(value: &str) -> String {
    let lower = value.to_lowercase();
    let mut chars = lower.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Severities at or above `min_log_level`, given as a level number or name.
fn accepted_levels(min_log_level: &str) -> HashSet<&'static str> {
    let threshold = if !min_log_level.is_empty() && min_log_level.chars().all(|c| c.is_ascii_digit()) {
        min_log_level.parse::<u64>().unwrap_or(u64::MAX)
    } else if let Some(level) = level_for_severity(&capitalize(min_log_level)) {
        level
    } else {
        warn!("Incorrect log level in FILTER_CONFIG: {min_log_level}.");
        return HashSet::new();
    };

    LOG_LEVELS
        .iter()
        .filter(|(level, _)| *level <= threshold)
        .map(|(_, severity)| *severity)
        .collect()
}

fn glob_matcher(pattern: &str) -> Option<GlobMatcher> {
    match GlobBuilder::new(pattern)
        .literal_separator(false)
        .backslash_escape(false)
        .build()
    {
        Ok(glob) => Some(glob.compile_matcher()),
        Err(e) => {
            warn!("Incorrect pattern in FILTER_CONFIG: {pattern}. {e}");
            None
        }
    }
}

/// Parsed `FILTER_CONFIG`, grouped by scope.
#[derive(Debug, Clone, Default)]
pub struct LogFilter {
    filters: HashMap<String, Vec<FilterPredicate>>,
}

impl LogFilter {
    /// Parses a filter configuration. Unknown or malformed entries are
    /// ignored; a later entry with the same name in the same scope replaces
    /// an earlier one.
    #[must_use]
    pub fn new(filter_config: &str) -> Self {
        info!("Filter config: {filter_config}");
        let Some(entry_regex) = filter_entry_regex() else {
            return Self::default();
        };

        // scope -> filter name -> pattern alternatives
        let mut grouped: BTreeMap<String, BTreeMap<String, Vec<String>>> = BTreeMap::new();
        for captures in entry_regex.captures_iter(filter_config) {
            let name = captures[1].trim().to_lowercase();
            let value = captures[2].trim();
            let Some(scope) = scope_of(&name) else {
                debug!("Ignoring unsupported filter '{name}'");
                continue;
            };
            let alternatives = if value.contains('|') {
                value.split('|').map(|v| v.trim().to_string()).collect()
            } else {
                vec![value.to_string()]
            };
            grouped.entry(scope).or_default().insert(name, alternatives);
        }

        let mut filters = HashMap::new();
        let mut parsed_names = Vec::new();
        for (scope, named_values) in grouped {
            let mut predicates = Vec::new();
            for (name, values) in named_values {
                if name.contains(MIN_LOG_LEVEL) {
                    let levels = match values.as_slice() {
                        [level] => accepted_levels(level),
                        _ => {
                            warn!("Incorrect log level in FILTER_CONFIG: {}.", values.join("|"));
                            HashSet::new()
                        }
                    };
                    if !levels.is_empty() {
                        predicates.push(FilterPredicate::MinLogLevel(levels));
                        parsed_names.push(name.clone());
                    }
                }
                if name.contains(CONTAINS_PATTERN) {
                    for pattern in &values {
                        if let Some(glob) = glob_matcher(pattern) {
                            predicates.push(FilterPredicate::ContainsPattern(glob));
                            parsed_names.push(name.clone());
                        }
                    }
                }
            }
            if !predicates.is_empty() {
                filters.insert(scope, predicates);
            }
        }
        info!("Successfully parsed filters: {parsed_names:?}");

        Self { filters }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Predicates of the most specific scope that has any.
    #[must_use]
    pub fn filters_for(&self, resource_id: &str, resource_type: &str) -> &[FilterPredicate] {
        [resource_id.to_lowercase(), resource_type.to_lowercase()]
            .iter()
            .filter(|scope| !scope.is_empty())
            .find_map(|scope| self.filters.get(scope.as_str()))
            .or_else(|| self.filters.get(GLOBAL_SCOPE))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// `true` when the record fails the filters of its scope.
    #[must_use]
    pub fn should_filter_out_record(&self, record: &NormalizedRecord) -> bool {
        if self.filters.is_empty() {
            return false;
        }
        let field = |name: &str| record.get(name).map_or("", String::as_str);

        let predicates = self.filters_for(field(RESOURCE_ID_ATTRIBUTE), field(RESOURCE_TYPE_ATTRIBUTE));
        !passes_all(predicates, field(SEVERITY_ATTRIBUTE), field(CONTENT_ATTRIBUTE))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESOURCE_ID: &str = "/SUBSCRIPTIONS/69B51384-146C-4685-9DAB-5AE01877D7B8/RESOURCEGROUPS/LOGS-INGEST-FUNCTION/PROVIDERS/MICROSOFT.WEB/SITES/INGEST-LOGS-FUNCTION";

    fn record() -> NormalizedRecord {
        [
            ("cloud.provider", "Azure"),
            (SEVERITY_ATTRIBUTE, "Informational"),
            (
                CONTENT_ATTRIBUTE,
                "Executed \"Functions.logs_ingest\" (Succeeded, Id=26849b40-bba5-41ee-9521-fc3205a39b5e, Duration=50ms)",
            ),
            (RESOURCE_ID_ATTRIBUTE, RESOURCE_ID),
            ("azure.subscription", "69B51384-146C-4685-9DAB-5AE01877D7B8"),
            ("azure.resource.group", "LOGS-INGEST-FUNCTION"),
            ("azure.resource.name", "INGEST-LOGS-FUNCTION"),
            (RESOURCE_TYPE_ATTRIBUTE, "MICROSOFT.WEB/SITES"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    fn filtered_out(config: &str) -> bool {
        LogFilter::new(config).should_filter_out_record(&record())
    }

    #[test]
    fn test_wrong_filter_config() {
        for config in ["", ";", ";=", "FILTER.TEST.MIN_LOG_LEVEL=2", "FILTER.RESOURCE_ID.MIN_LOG_LEVEL.=2"] {
            let filter = LogFilter::new(config);
            assert!(filter.is_empty(), "config: {config}");
            assert!(!filter.should_filter_out_record(&record()));
        }
    }

    #[test]
    fn test_filter_config_with_spaces() {
        assert!(!filtered_out(
            "FILTER.GLOBAL.MIN_LOG_LEVEL=  informational; FILTER.GLOBAL.CONTAINS_PATTERN = *logs_ingest*"
        ));
    }

    #[test]
    fn test_record_without_severity_under_level_filter() {
        let filter = LogFilter::new("FILTER.RESOURCE_TYPE.MIN_LOG_LEVEL.MICROSOFT.WEB/SITES=2");
        let record: NormalizedRecord = [
            (RESOURCE_ID_ATTRIBUTE, RESOURCE_ID),
            (RESOURCE_TYPE_ATTRIBUTE, "MICROSOFT.WEB/SITES"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        assert!(filter.should_filter_out_record(&record));
    }

    #[test]
    fn test_global_min_log_level() {
        assert!(filtered_out("FILTER.GLOBAL.MIN_LOG_LEVEL=warning"));
        assert!(filtered_out("FILTER.GLOBAL.MIN_LOG_LEVEL=WARNING"));
        assert!(filtered_out("FILTER.GLOBAL.MIN_LOG_LEVEL=3"));
        assert!(!filtered_out("FILTER.GLOBAL.MIN_LOG_LEVEL=4"));
        assert!(!filtered_out("FILTER.GLOBAL.MIN_LOG_LEVEL=Informational"));
    }

    #[test]
    fn test_global_incorrect_min_log_level() {
        assert!(!filtered_out("FILTER.GLOBAL.MIN_LOG_LEVEL=Info"));
        assert!(!filtered_out("FILTER.GLOBAL.MIN_LOG_LEVEL=20"));
    }

    #[test]
    fn test_global_contains_pattern() {
        assert!(!filtered_out("FILTER.GLOBAL.CONTAINS_PATTERN=*logs_ingest*"));
        assert!(filtered_out("FILTER.GLOBAL.CONTAINS_PATTERN=*SQL*"));
        // matching is case sensitive
        assert!(filtered_out("FILTER.GLOBAL.CONTAINS_PATTERN=*LOGS_INGEST*"));
    }

    #[test]
    fn test_global_log_level_and_contains_pattern() {
        assert!(!filtered_out(
            "FILTER.GLOBAL.MIN_LOG_LEVEL=4;FILTER.GLOBAL.CONTAINS_PATTERN=*logs_ingest*"
        ));
        assert!(filtered_out(
            "FILTER.GLOBAL.MIN_LOG_LEVEL=4;FILTER.GLOBAL.CONTAINS_PATTERN=*SQL*"
        ));
    }

    #[test]
    fn test_repeated_filter_name_last_wins() {
        assert!(!filtered_out(
            "FILTER.GLOBAL.CONTAINS_PATTERN=*SQL*;FILTER.GLOBAL.CONTAINS_PATTERN=*logs_ingest*"
        ));
        assert!(filtered_out(
            "FILTER.GLOBAL.CONTAINS_PATTERN=*Microsoft.Web/sites/functions/log*;FILTER.GLOBAL.CONTAINS_PATTERN=*SQL*"
        ));
    }

    #[test]
    fn test_resource_type_overrides_global() {
        assert!(!filtered_out(
            "FILTER.GLOBAL.MIN_LOG_LEVEL=2;FILTER.RESOURCE_TYPE.MIN_LOG_LEVEL.microsoft.web/sites=4"
        ));
        assert!(!filtered_out(
            "FILTER.GLOBAL.MIN_LOG_LEVEL=2;FILTER.RESOURCE_TYPE.CONTAINS_PATTERN.MICROSOFT.WEB/SITES=*logs_ingest*"
        ));
        // a scope without valid predicates falls through to global
        assert!(filtered_out(
            "FILTER.GLOBAL.MIN_LOG_LEVEL=2;FILTER.RESOURCE_TYPE.MIN_LOG_LEVEL.MICROSOFT.WEB/SITES=Info"
        ));
    }

    #[test]
    fn test_resource_id_overrides_resource_type() {
        let config = format!(
            "FILTER.GLOBAL.MIN_LOG_LEVEL=2;FILTER.RESOURCE_TYPE.MIN_LOG_LEVEL.MICROSOFT.WEB/SITES=Critical;FILTER.RESOURCE_ID.MIN_LOG_LEVEL.{RESOURCE_ID}=Informational"
        );
        assert!(!filtered_out(&config));

        let config = format!(
            "FILTER.RESOURCE_TYPE.MIN_LOG_LEVEL.MICROSOFT.WEB/SITES=4;FILTER.RESOURCE_ID.CONTAINS_PATTERN.{RESOURCE_ID}=*pattern*"
        );
        assert!(filtered_out(&config));
    }

    #[test]
    fn test_or_patterns() {
        assert!(!filtered_out(
            "FILTER.GLOBAL.CONTAINS_PATTERN=*logs_ingest* | *Succeeded*"
        ));
        assert!(!filtered_out(
            "FILTER.GLOBAL.CONTAINS_PATTERN=*bad* | *Succeeded*"
        ));
        assert!(filtered_out(
            "FILTER.GLOBAL.CONTAINS_PATTERN=*bad* | *not_fitting_anything*"
        ));
    }

    #[test]
    fn test_or_patterns_and_level() {
        assert!(filtered_out(
            "FILTER.GLOBAL.MIN_LOG_LEVEL=3;FILTER.GLOBAL.CONTAINS_PATTERN=Executed* | *Functions* | *not_fitting*"
        ));
        assert!(!filtered_out(
            "FILTER.GLOBAL.MIN_LOG_LEVEL=4;FILTER.GLOBAL.CONTAINS_PATTERN=Executed* | *not_fitting*"
        ));
    }

    #[test]
    fn test_passes_all_evaluator() {
        let level = FilterPredicate::MinLogLevel(["Error", "Critical"].into_iter().collect());
        let glob = |p: &str| FilterPredicate::ContainsPattern(glob_matcher(p).unwrap());

        assert!(passes_all(&[], "Informational", "anything"));
        assert!(passes_all(&[level.clone()], "Error", ""));
        assert!(!passes_all(&[level.clone(), glob("*x*")], "Error", "abc"));
        assert!(passes_all(&[level.clone(), glob("*x*"), glob("*b*")], "Error", "abc"));
        assert!(!passes_all(&[level, glob("*x*"), glob("*b*")], "Warning", "abc"));
        assert!(passes_all(&[glob("*x*"), glob("*b*")], "", "abc"));
    }

    #[test]
    fn test_glob_matches_across_separators() {
        let glob = glob_matcher("*web/sites\\functions*").unwrap();
        assert!(glob.is_match("microsoft.web/sites\\functions/log"));
    }

    #[test]
    fn test_accepted_levels() {
        assert_eq!(accepted_levels("2"), ["Critical", "Error"].into_iter().collect());
        assert_eq!(accepted_levels("0"), HashSet::new());
        assert_eq!(accepted_levels("warning").len(), 3);
        assert!(accepted_levels("Info").is_empty());
        assert!(accepted_levels("").is_empty());
    }
}
