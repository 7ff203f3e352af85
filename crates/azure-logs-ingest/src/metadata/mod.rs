// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Declarative rules mapping raw Azure records onto common attributes.
//!
//! A rule set file looks like:
//!
//! ```json
//! {
//!   "name": "Function App",
//!   "rules": [
//!     {
//!       "sources": [{"source": "category", "condition": "$eq('FunctionAppLogs')"}],
//!       "attributes": [{"key": "faas.name", "pattern": "properties.functionName"}]
//!     }
//!   ]
//! }
//! ```
//!
//! Patterns are JMESPath expressions evaluated against the raw record. Rules
//! are tried in load order and the first one whose sources all match is
//! applied; the rule set named `default` is used when none matches.

pub mod functions;
pub mod matcher;

use std::fmt;
use std::path::Path;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{ResourceError, RuleError};
use crate::record::{is_truthy, ParsedRecord, RawRecord};
use crate::{throttled_error, throttled_warn};

pub use matcher::{Comparator, SourceField, SourceMatcher};

pub const DEFAULT_RULE_NAME: &str = "default";

/// Rule sets shipped with the crate, in file-name order.
const BUNDLED_RULE_SETS: [(&str, &str); 8] = [
    (
        "activity_logs.json",
        include_str!("../../resources/rules/activity_logs.json"),
    ),
    (
        "api_management.json",
        include_str!("../../resources/rules/api_management.json"),
    ),
    (
        "container_service.json",
        include_str!("../../resources/rules/container_service.json"),
    ),
    (
        "default.json",
        include_str!("../../resources/rules/default.json"),
    ),
    (
        "event_hub_namespace.json",
        include_str!("../../resources/rules/event_hub_namespace.json"),
    ),
    (
        "function_app.json",
        include_str!("../../resources/rules/function_app.json"),
    ),
    (
        "sql_database.json",
        include_str!("../../resources/rules/sql_database.json"),
    ),
    (
        "sql_managed_instance.json",
        include_str!("../../resources/rules/sql_managed_instance.json"),
    ),
];

#[derive(Debug, Default, Deserialize)]
struct RuleSetDocument {
    #[serde(default)]
    name: String,
    #[serde(default)]
    rules: Vec<RuleDocument>,
}

#[derive(Debug, Default, Deserialize)]
struct RuleDocument {
    #[serde(default)]
    sources: Vec<SourceDocument>,
    #[serde(default)]
    attributes: Vec<AttributeDocument>,
}

#[derive(Debug, Default, Deserialize)]
struct SourceDocument {
    source: Option<String>,
    condition: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct AttributeDocument {
    key: Option<String>,
    pattern: Option<String>,
}

/// Attribute extracted by a rule: `key` is set to the result of `pattern`.
pub struct Attribute {
    key: String,
    pattern: String,
    expression: jmespath::Expression<'static>,
}

impl Attribute {
    /// # Errors
    ///
    /// Returns the compile error if `pattern` is not valid JMESPath.
    pub fn new(key: &str, pattern: &str) -> Result<Self, jmespath::JmespathError> {
        Ok(Self {
            key: key.to_string(),
            pattern: pattern.to_string(),
            expression: functions::compile(pattern)?,
        })
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    #[must_use]
    pub fn pattern(&self) -> &str {
        &self.pattern
    }
}

impl fmt::Debug for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attribute")
            .field("key", &self.key)
            .field("pattern", &self.pattern)
            .finish()
    }
}

#[derive(Debug)]
pub struct ConfigRule {
    pub entity_type_name: String,
    pub source_matchers: Vec<SourceMatcher>,
    pub attributes: Vec<Attribute>,
}

impl ConfigRule {
    fn applies(&self, record: &RawRecord, parsed: &ParsedRecord) -> bool {
        self.source_matchers
            .iter()
            .all(|matcher| matcher.matches(record, parsed))
    }

    fn apply(&self, record: &RawRecord, parsed: &mut ParsedRecord) {
        for attribute in &self.attributes {
            let value = attribute
                .expression
                .search(record)
                .map_err(|e| e.to_string())
                .and_then(|result| serde_json::to_value(&*result).map_err(|e| e.to_string()));
            match value {
                Ok(value) if is_truthy(&value) => {
                    parsed.insert(attribute.key.clone(), value);
                }
                Ok(_) => {}
                Err(e) => {
                    throttled_error!(
                        "rule-attribute-evaluation-exception",
                        "Encountered exception when evaluating attribute {attribute:?} of rule for {}: {e}",
                        self.entity_type_name
                    );
                }
            }
        }
    }

    fn from_document(name: &str, document: RuleDocument) -> Result<Self, RuleError> {
        let is_default = name == DEFAULT_RULE_NAME;
        if !is_default && document.sources.is_empty() {
            return Err(RuleError::MissingSources(name.to_string()));
        }

        let source_matchers = create_sources(document.sources);
        if !is_default && source_matchers.is_empty() {
            return Err(RuleError::InvalidSources(name.to_string()));
        }

        Ok(Self {
            entity_type_name: name.to_string(),
            source_matchers,
            attributes: create_attributes(document.attributes),
        })
    }
}

/// One invalid source empties the whole list, so the rule is never applied
/// with only part of its conditions.
fn create_sources(sources: Vec<SourceDocument>) -> Vec<SourceMatcher> {
    let mut result = Vec::with_capacity(sources.len());
    for source in sources {
        let matcher = match (&source.source, &source.condition) {
            (Some(field), Some(condition)) if !field.is_empty() && !condition.is_empty() => {
                SourceMatcher::parse(field, condition)
            }
            _ => Err(RuleError::IncompleteSource {
                source_name: source.source.clone(),
                condition: source.condition.clone(),
            }),
        };
        match matcher {
            Ok(matcher) => result.push(matcher),
            Err(e) => {
                throttled_warn!("invalid-rule-source-warning", "Encountered invalid rule source: {e}");
                return Vec::new();
            }
        }
    }
    result
}

fn create_attributes(attributes: Vec<AttributeDocument>) -> Vec<Attribute> {
    attributes
        .into_iter()
        .filter_map(|attribute| match (attribute.key, attribute.pattern) {
            (Some(key), Some(pattern)) if !key.is_empty() && !pattern.is_empty() => {
                match Attribute::new(&key, &pattern) {
                    Ok(attribute) => Some(attribute),
                    Err(e) => {
                        throttled_warn!(
                            "attribute-pattern-compile-warning",
                            "Invalid pattern for attribute '{key}': {e}"
                        );
                        None
                    }
                }
            }
            (key, pattern) => {
                throttled_warn!(
                    "attribute-missing-parameter-warning",
                    "Encountered invalid rule attribute with missing parameter, parameters were: key = {key:?}, pattern = {pattern:?}"
                );
                None
            }
        })
        .collect()
}

/// Immutable set of rules, built once and shared by every invocation.
#[derive(Debug, Default)]
pub struct MetadataEngine {
    rules: Vec<ConfigRule>,
    default_rule: Option<ConfigRule>,
}

impl MetadataEngine {
    /// Engine with the rule sets shipped with the crate.
    #[must_use]
    pub fn bundled() -> Self {
        Self::from_rule_sets(BUNDLED_RULE_SETS)
    }

    /// Builds an engine from `(file name, JSON)` pairs, in iteration order.
    ///
    /// Files that are not valid JSON are logged and skipped, as are rules that
    /// fail validation.
    pub fn from_rule_sets<I, N, J>(rule_sets: I) -> Self
    where
        I: IntoIterator<Item = (N, J)>,
        N: AsRef<str>,
        J: AsRef<str>,
    {
        let mut engine = Self::default();
        for (file_name, json) in rule_sets {
            let file_name = file_name.as_ref();
            match serde_json::from_str::<RuleSetDocument>(json.as_ref()) {
                Ok(document) => engine.add_rule_set(file_name, document),
                Err(e) => {
                    let error = ResourceError::Json {
                        name: file_name.to_string(),
                        source: e,
                    };
                    throttled_error!(
                        "config-file-loading-exception",
                        "Failed to load configuration file: {error}"
                    );
                }
            }
        }
        engine
    }

    /// Loads every `*.json` file of `dir`, in file-name order.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be listed. Unreadable or
    /// invalid files are logged and skipped.
    pub fn load_from_dir(dir: &Path) -> Result<Self, ResourceError> {
        let io_error = |source| ResourceError::Io {
            path: dir.display().to_string(),
            source,
        };
        let mut paths = std::fs::read_dir(dir)
            .map_err(io_error)?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "json"))
            .collect::<Vec<_>>();
        paths.sort();

        let rule_sets = paths.into_iter().filter_map(|path| {
            match std::fs::read_to_string(&path) {
                Ok(json) => Some((path.display().to_string(), json)),
                Err(e) => {
                    warn!("Failed to read configuration file '{}': {e}", path.display());
                    None
                }
            }
        });
        Ok(Self::from_rule_sets(rule_sets))
    }

    fn add_rule_set(&mut self, file_name: &str, document: RuleSetDocument) {
        let name = document.name;
        let mut rules = document
            .rules
            .into_iter()
            .filter_map(|rule| match ConfigRule::from_document(&name, rule) {
                Ok(rule) => Some(rule),
                Err(e) => {
                    throttled_warn!("invalid-rule-warning", "Skipping rule from '{file_name}': {e}");
                    None
                }
            })
            .collect::<Vec<_>>();

        if name == DEFAULT_RULE_NAME {
            if rules.is_empty() {
                warn!("Default rule set in '{file_name}' has no rules");
            } else {
                self.default_rule = Some(rules.swap_remove(0));
            }
        } else {
            debug!("Loaded {} rules from '{file_name}'", rules.len());
            self.rules.extend(rules);
        }
    }

    #[must_use]
    pub fn rules(&self) -> &[ConfigRule] {
        &self.rules
    }

    #[must_use]
    pub fn default_rule(&self) -> Option<&ConfigRule> {
        self.default_rule.as_ref()
    }

    /// Applies the first matching rule, or the default rule, to `parsed`.
    pub fn apply(&self, record: &RawRecord, parsed: &mut ParsedRecord) {
        let rule = self
            .rules
            .iter()
            .find(|rule| rule.applies(record, parsed))
            .or(self.default_rule.as_ref());
        if let Some(rule) = rule {
            rule.apply(record, parsed);
        }
    }
}
