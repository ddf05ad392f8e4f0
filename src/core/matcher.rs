//! Line matching against the rule table
//!
//! Matching is case-sensitive substring containment. Every satisfied
//! condition produces exactly one [`FiredAction`]; nothing short-circuits.

use super::rules::{ActionKind, ConditionId, RuleTable};
use serde::Serialize;

/// Verdict for one line
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MatchResult {
    /// True if any pattern or condition matched
    pub matched: bool,
    /// Ids of the conditions that fired, ascending
    pub triggered: Vec<ConditionId>,
}

impl MatchResult {
    /// First condition that fired, if any
    pub fn triggered_condition(&self) -> Option<ConditionId> {
        self.triggered.first().copied()
    }
}

/// Side effect requested by a satisfied condition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FiredAction {
    /// Condition that fired
    pub condition_id: ConditionId,
    /// Command or event
    pub kind: ActionKind,
    /// Command text or event payload
    pub payload: String,
}

/// Verdict plus the actions to carry out, in condition order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Evaluation {
    /// Match verdict
    pub result: MatchResult,
    /// Actions for every satisfied condition
    pub actions: Vec<FiredAction>,
}

/// Evaluate one line against the table
pub fn evaluate(rules: &RuleTable, line: &str) -> Evaluation {
    let pattern_hit = rules.iter_patterns().any(|p| line.contains(p));

    let mut evaluation = Evaluation::default();
    for (id, condition) in rules.iter_conditions() {
        if condition.matches(line) {
            evaluation.result.triggered.push(id);
            evaluation.actions.push(FiredAction {
                condition_id: id,
                kind: condition.kind,
                payload: condition.action.clone(),
            });
        }
    }

    evaluation.result.matched = pattern_hit || !evaluation.actions.is_empty();
    evaluation
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::rules::Condition;

    #[test]
    fn test_empty_table_never_matches() {
        let rules = RuleTable::new();
        let evaluation = evaluate(&rules, "anything at all");
        assert!(!evaluation.result.matched);
        assert!(evaluation.actions.is_empty());
        assert_eq!(evaluation.result.triggered_condition(), None);
    }

    #[test]
    fn test_plain_pattern_is_substring_and_case_sensitive() {
        let mut rules = RuleTable::new();
        rules.set_patterns(["panic", "ERROR"]);

        assert!(evaluate(&rules, "kernel panic - not syncing").result.matched);
        assert!(evaluate(&rules, "[ERROR] bad").result.matched);
        assert!(!evaluate(&rules, "error in lower case").result.matched);
        assert!(!evaluate(&rules, "Panic!").result.matched);
    }

    #[test]
    fn test_all_conditions_fire() {
        let mut rules = RuleTable::new();
        rules.add_condition(1, Condition::new("ERR", "notify-err", ActionKind::Event));
        rules.add_condition(2, Condition::new("ERR", "log-err", ActionKind::Command));
        rules.add_condition(3, Condition::new("WARN", "never", ActionKind::Event));

        let evaluation = evaluate(&rules, "ERR: disk full");
        assert!(evaluation.result.matched);
        assert_eq!(evaluation.result.triggered, vec![1, 2]);
        assert_eq!(
            evaluation.actions,
            vec![
                FiredAction {
                    condition_id: 1,
                    kind: ActionKind::Event,
                    payload: "notify-err".to_string(),
                },
                FiredAction {
                    condition_id: 2,
                    kind: ActionKind::Command,
                    payload: "log-err".to_string(),
                },
            ]
        );
    }

    #[test]
    fn test_pattern_and_condition_together() {
        let mut rules = RuleTable::new();
        rules.add_pattern("boot");
        rules.add_condition(7, Condition::new("login:", "root", ActionKind::Command));

        let evaluation = evaluate(&rules, "boot complete, login:");
        assert!(evaluation.result.matched);
        assert_eq!(evaluation.result.triggered_condition(), Some(7));

        let evaluation = evaluate(&rules, "boot complete");
        assert!(evaluation.result.matched);
        assert!(evaluation.actions.is_empty());
    }
}
