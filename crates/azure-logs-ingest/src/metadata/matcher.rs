// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

use crate::error::RuleError;
use crate::record::{value_to_string, ParsedRecord, RawRecord, RESOURCE_TYPE_ATTRIBUTE};

/// Record field a rule condition is evaluated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceField {
    /// `azure.resource.type` as parsed from the resource id.
    ResourceType,
    /// `category` of the raw record.
    Category,
}

impl SourceField {
    fn parse(source: &str) -> Option<Self> {
        match source.to_lowercase().as_str() {
            "resourcetype" => Some(Self::ResourceType),
            "category" => Some(Self::Category),
            _ => None,
        }
    }

    fn extract(self, record: &RawRecord, parsed: &ParsedRecord) -> String {
        let value = match self {
            Self::ResourceType => parsed.get(RESOURCE_TYPE_ATTRIBUTE),
            Self::Category => record.get("category"),
        };
        match value {
            None | Some(Value::Null) => String::new(),
            Some(value) => value_to_string(value),
        }
    }
}

/// Case-insensitive comparison applied between a source value and the
/// condition operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    Eq,
    In,
    Prefix,
    Contains,
}

impl Comparator {
    const PREFIXES: [(&'static str, Comparator); 4] = [
        ("$eq", Comparator::Eq),
        ("$in", Comparator::In),
        ("$prefix", Comparator::Prefix),
        ("$contains", Comparator::Contains),
    ];

    fn parse(condition: &str) -> Option<Self> {
        let condition = condition.to_lowercase();
        Self::PREFIXES
            .iter()
            .find(|(prefix, _)| condition.starts_with(prefix))
            .map(|(_, comparator)| *comparator)
    }

    /// `operand` is expected lowercase.
    fn evaluate(self, value: &str, operand: &str) -> bool {
        let value = value.to_lowercase();
        match self {
            Self::Eq => value == operand,
            Self::In => operand.split(',').any(|candidate| candidate == value),
            Self::Prefix => value.starts_with(operand),
            Self::Contains => value.contains(operand),
        }
    }
}

fn operand_regex() -> Option<&'static Regex> {
    static OPERAND: OnceLock<Option<Regex>> = OnceLock::new();
    OPERAND
        .get_or_init(|| Regex::new(r"(?s)'(.*?)'").ok())
        .as_ref()
}

/// One `{source, condition}` entry of a rule, e.g.
/// `{"source": "category", "condition": "$in('alert', 'policy')"}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceMatcher {
    source: SourceField,
    comparator: Comparator,
    operand: String,
}

impl SourceMatcher {
    /// Parses a condition of the form `$op('a', 'b', ...)`.
    ///
    /// All single-quoted operands are joined with `,`.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown source field, an unknown comparator or
    /// a condition without a non-empty quoted operand.
    pub fn parse(source: &str, condition: &str) -> Result<Self, RuleError> {
        let source_field = SourceField::parse(source)
            .ok_or_else(|| RuleError::UnsupportedSource(source.to_string()))?;

        let invalid_condition = || RuleError::InvalidCondition(condition.to_string());
        let comparator = Comparator::parse(condition).ok_or_else(invalid_condition)?;
        let operand = operand_regex()
            .ok_or_else(invalid_condition)?
            .captures_iter(condition)
            .filter_map(|captures| captures.get(1))
            .map(|operand| operand.as_str())
            .collect::<Vec<_>>()
            .join(",");
        if operand.is_empty() {
            return Err(invalid_condition());
        }

        Ok(Self {
            source: source_field,
            comparator,
            operand: operand.to_lowercase(),
        })
    }

    #[must_use]
    pub fn source(&self) -> SourceField {
        self.source
    }

    #[must_use]
    pub fn comparator(&self) -> Comparator {
        self.comparator
    }

    #[must_use]
    pub fn operand(&self) -> &str {
        &self.operand
    }

    #[must_use]
    pub fn matches(&self, record: &RawRecord, parsed: &ParsedRecord) -> bool {
        let value = self.source.extract(record, parsed);
        self.comparator.evaluate(&value, &self.operand)
    }
}
