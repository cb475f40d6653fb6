//! # Condition Sets
//!
//! Each kind declares the conditions its readiness depends on. `Ready` is
//! derived from those dependents whenever one of them is marked, so it is
//! never written independently.

use crate::crd::{ConditionStatus, Conditions};

/// Aggregate condition derived from a kind's dependents
pub const READY: &str = "Ready";

/// Set by the reconcile loop for every kind
pub const SINK_RESOLVED: &str = "SinkResolved";

#[derive(Debug, Clone, Copy)]
pub struct ConditionSet {
    dependents: &'static [&'static str],
}

impl ConditionSet {
    pub const fn new(dependents: &'static [&'static str]) -> Self {
        Self { dependents }
    }

    pub fn dependents(&self) -> &'static [&'static str] {
        self.dependents
    }

    /// Add every missing dependent as Unknown and refresh `Ready`.
    pub fn initialize(&self, conditions: &mut Conditions) -> bool {
        let mut changed = false;
        for dependent in self.dependents {
            if conditions.get(dependent).is_none() {
                changed |= conditions.set(dependent, ConditionStatus::Unknown, None, None);
            }
        }
        changed | self.recompute(conditions)
    }

    pub fn mark_true(&self, conditions: &mut Conditions, condition_type: &str) -> bool {
        self.mark(conditions, condition_type, ConditionStatus::True, None, None)
    }

    pub fn mark_false(
        &self,
        conditions: &mut Conditions,
        condition_type: &str,
        reason: &str,
        message: impl Into<String>,
    ) -> bool {
        self.mark(
            conditions,
            condition_type,
            ConditionStatus::False,
            Some(reason.to_string()),
            Some(message.into()),
        )
    }

    pub fn mark_unknown(
        &self,
        conditions: &mut Conditions,
        condition_type: &str,
        reason: &str,
        message: impl Into<String>,
    ) -> bool {
        self.mark(
            conditions,
            condition_type,
            ConditionStatus::Unknown,
            Some(reason.to_string()),
            Some(message.into()),
        )
    }

    fn mark(
        &self,
        conditions: &mut Conditions,
        condition_type: &str,
        status: ConditionStatus,
        reason: Option<String>,
        message: Option<String>,
    ) -> bool {
        let changed = conditions.set(condition_type, status, reason, message);
        changed | self.recompute(conditions)
    }

    /// All dependents True makes True, any False makes False, otherwise Unknown.
    pub fn readiness(&self, conditions: &Conditions) -> ConditionStatus {
        let mut aggregate = ConditionStatus::True;
        for dependent in self.dependents {
            match conditions.status_of(dependent) {
                ConditionStatus::False => return ConditionStatus::False,
                ConditionStatus::Unknown => aggregate = ConditionStatus::Unknown,
                ConditionStatus::True => {}
            }
        }
        aggregate
    }

    pub fn is_ready(&self, conditions: &Conditions) -> bool {
        self.readiness(conditions) == ConditionStatus::True
    }

    fn recompute(&self, conditions: &mut Conditions) -> bool {
        let status = self.readiness(conditions);
        // Ready carries the reason of the first dependent holding it back.
        let blocker = self
            .dependents
            .iter()
            .filter_map(|d| conditions.get(d))
            .find(|c| c.status == status && status != ConditionStatus::True);
        let (reason, message) = match blocker {
            Some(c) => (c.reason.clone(), c.message.clone()),
            None => (None, None),
        };
        conditions.set(READY, status, reason, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SET: ConditionSet = ConditionSet::new(&[SINK_RESOLVED, "TopicReady"]);

    #[test]
    fn test_initialize_sets_unknown() {
        let mut conditions = Conditions::default();
        assert!(SET.initialize(&mut conditions));
        assert_eq!(conditions.status_of(SINK_RESOLVED), ConditionStatus::Unknown);
        assert_eq!(conditions.status_of(READY), ConditionStatus::Unknown);
        assert!(!SET.initialize(&mut conditions));
    }

    #[test]
    fn test_all_true_is_ready() {
        let mut conditions = Conditions::default();
        SET.initialize(&mut conditions);
        SET.mark_true(&mut conditions, SINK_RESOLVED);
        assert!(!SET.is_ready(&conditions));
        SET.mark_true(&mut conditions, "TopicReady");
        assert!(SET.is_ready(&conditions));
        assert_eq!(conditions.status_of(READY), ConditionStatus::True);
    }

    #[test]
    fn test_false_wins_over_unknown() {
        let mut conditions = Conditions::default();
        SET.initialize(&mut conditions);
        SET.mark_false(&mut conditions, "TopicReady", "TopicFailed", "quota");
        assert_eq!(SET.readiness(&conditions), ConditionStatus::False);
        let ready = conditions.get(READY).unwrap();
        assert_eq!(ready.status, ConditionStatus::False);
        assert_eq!(ready.reason.as_deref(), Some("TopicFailed"));
    }

    #[test]
    fn test_marking_same_value_twice_reports_no_change() {
        let mut conditions = Conditions::default();
        SET.initialize(&mut conditions);
        assert!(SET.mark_false(&mut conditions, SINK_RESOLVED, "NotFound", "missing"));
        let snapshot = conditions.clone();
        assert!(!SET.mark_false(&mut conditions, SINK_RESOLVED, "NotFound", "missing"));
        assert_eq!(snapshot, conditions);
    }
}
