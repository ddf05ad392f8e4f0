//! Rule table: plain patterns and keyed conditions
//!
//! Patterns keep insertion order for display and never hold duplicates.
//! Conditions are keyed by id; iteration runs in ascending id order.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Condition identifier
pub type ConditionId = u32;

/// What a satisfied condition does
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    /// Write the action payload back to the transport
    Command,
    /// Raise a "pattern detected" notification carrying the payload
    Event,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Command => write!(f, "Command"),
            Self::Event => write!(f, "Event"),
        }
    }
}

impl FromStr for ActionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "command" | "cmd" => Ok(Self::Command),
            "event" | "evt" => Ok(Self::Event),
            other => Err(format!("unknown action kind: {other}")),
        }
    }
}

/// A conditional rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    /// Substring that triggers the rule
    pub pattern: String,
    /// Command text or event payload
    pub action: String,
    /// How the action is carried out
    pub kind: ActionKind,
}

impl Condition {
    /// Create a condition
    pub fn new(pattern: impl Into<String>, action: impl Into<String>, kind: ActionKind) -> Self {
        Self {
            pattern: pattern.into(),
            action: action.into(),
            kind,
        }
    }

    /// Check if the line contains the condition's pattern
    pub fn matches(&self, line: &str) -> bool {
        line.contains(self.pattern.as_str())
    }
}

/// Patterns and conditions evaluated against every line
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleTable {
    patterns: Vec<String>,
    conditions: BTreeMap<ConditionId, Condition>,
}

impl RuleTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a pattern unless it is already present.
    ///
    /// Returns `true` if the pattern was added.
    pub fn add_pattern(&mut self, text: impl Into<String>) -> bool {
        let text = text.into();
        if self.patterns.contains(&text) {
            return false;
        }
        self.patterns.push(text);
        true
    }

    /// Replace every pattern; duplicates after the first are dropped
    pub fn set_patterns<I, S>(&mut self, patterns: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.patterns.clear();
        for pattern in patterns {
            self.add_pattern(pattern);
        }
    }

    /// Remove every pattern
    pub fn clear_patterns(&mut self) {
        self.patterns.clear();
    }

    /// Patterns in insertion order
    pub fn patterns(&self) -> Vec<String> {
        self.patterns.clone()
    }

    /// Insert a condition, returning the one it replaced
    pub fn add_condition(&mut self, id: ConditionId, condition: Condition) -> Option<Condition> {
        self.conditions.insert(id, condition)
    }

    /// Remove a condition; absent ids are ignored
    pub fn remove_condition(&mut self, id: ConditionId) -> Option<Condition> {
        self.conditions.remove(&id)
    }

    /// Remove every condition
    pub fn clear_conditions(&mut self) {
        self.conditions.clear();
    }

    /// Look up one condition
    pub fn condition(&self, id: ConditionId) -> Option<Condition> {
        self.conditions.get(&id).cloned()
    }

    /// All conditions, ascending by id
    pub fn conditions(&self) -> Vec<(ConditionId, Condition)> {
        self.conditions
            .iter()
            .map(|(id, c)| (*id, c.clone()))
            .collect()
    }

    /// True when there is nothing to match
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty() && self.conditions.is_empty()
    }

    pub(crate) fn iter_patterns(&self) -> impl Iterator<Item = &str> {
        self.patterns.iter().map(String::as_str)
    }

    pub(crate) fn iter_conditions(&self) -> impl Iterator<Item = (ConditionId, &Condition)> {
        self.conditions.iter().map(|(id, c)| (*id, c))
    }
}
