//! Status types shared by every source kind.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Tri-state value of a [`Condition`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    Unknown,
}

impl ConditionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::True => "True",
            Self::False => "False",
            Self::Unknown => "Unknown",
        }
    }
}

/// Condition represents a status condition for the resource
///
/// Used to track readiness, errors, and other state information.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition
    pub r#type: String,
    /// Status of condition (True, False, Unknown)
    pub status: ConditionStatus,
    /// Machine-readable reason for the last transition
    #[serde(default)]
    pub reason: Option<String>,
    /// Message describing condition
    #[serde(default)]
    pub message: Option<String>,
    /// Last transition time (RFC 3339)
    #[serde(default)]
    pub last_transition_time: Option<String>,
}

/// Conditions keyed by type.
///
/// Serialized as a list sorted by type; duplicate types collapse onto the
/// last entry when deserializing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(from = "Vec<Condition>", into = "Vec<Condition>")]
pub struct Conditions(BTreeMap<String, Condition>);

impl Conditions {
    pub fn get(&self, condition_type: &str) -> Option<&Condition> {
        self.0.get(condition_type)
    }

    pub fn status_of(&self, condition_type: &str) -> ConditionStatus {
        self.get(condition_type)
            .map_or(ConditionStatus::Unknown, |c| c.status)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Condition> {
        self.0.values()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Overwrite the condition of the given type.
    ///
    /// Returns `false` when status, reason and message already match, in which
    /// case nothing (including the transition time) is touched. A status flip
    /// stamps a new transition time; a reason or message change alone keeps it.
    pub fn set(
        &mut self,
        condition_type: &str,
        status: ConditionStatus,
        reason: Option<String>,
        message: Option<String>,
    ) -> bool {
        match self.0.get_mut(condition_type) {
            Some(existing)
                if existing.status == status
                    && existing.reason == reason
                    && existing.message == message =>
            {
                false
            }
            Some(existing) if existing.status == status => {
                existing.reason = reason;
                existing.message = message;
                true
            }
            _ => {
                self.0.insert(
                    condition_type.to_string(),
                    Condition {
                        r#type: condition_type.to_string(),
                        status,
                        reason,
                        message,
                        last_transition_time: Some(now_rfc3339()),
                    },
                );
                true
            }
        }
    }
}

impl From<Vec<Condition>> for Conditions {
    fn from(list: Vec<Condition>) -> Self {
        Self(list.into_iter().map(|c| (c.r#type.clone(), c)).collect())
    }
}

impl From<Conditions> for Vec<Condition> {
    fn from(conditions: Conditions) -> Self {
        conditions.0.into_values().collect()
    }
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

/// Status fields every source carries
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SourceStatus {
    /// Generation of the spec this status was computed from
    #[serde(default)]
    pub observed_generation: Option<i64>,
    /// Latest observation per condition type
    #[serde(default)]
    #[schemars(with = "Vec<Condition>")]
    pub conditions: Conditions,
    /// URI the sink reference resolved to
    #[serde(default)]
    pub sink_uri: Option<String>,
    /// Project the external resources live in
    #[serde(default)]
    pub project_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_same_values_is_noop() {
        let mut conditions = Conditions::default();
        assert!(conditions.set("TopicReady", ConditionStatus::True, None, None));
        let before = conditions.clone();
        assert!(!conditions.set("TopicReady", ConditionStatus::True, None, None));
        assert_eq!(before, conditions);
    }

    #[test]
    fn test_reason_change_keeps_transition_time() {
        let mut conditions = Conditions::default();
        conditions.set(
            "SinkResolved",
            ConditionStatus::False,
            Some("NotFound".into()),
            None,
        );
        let first = conditions
            .get("SinkResolved")
            .and_then(|c| c.last_transition_time.clone());

        assert!(conditions.set(
            "SinkResolved",
            ConditionStatus::False,
            Some("NoAddress".into()),
            Some("no address".into()),
        ));
        let condition = conditions.get("SinkResolved").unwrap();
        assert_eq!(condition.reason.as_deref(), Some("NoAddress"));
        assert_eq!(condition.last_transition_time, first);
    }

    #[test]
    fn test_serialized_as_sorted_list_without_duplicates() {
        let mut conditions = Conditions::default();
        conditions.set("Ready", ConditionStatus::Unknown, None, None);
        conditions.set("Deployed", ConditionStatus::True, None, None);
        conditions.set("Deployed", ConditionStatus::False, Some("X".into()), None);

        let value = serde_json::to_value(&conditions).unwrap();
        let list = value.as_array().unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0]["type"], "Deployed");
        assert_eq!(list[0]["status"], "False");
        assert_eq!(list[1]["type"], "Ready");
    }

    #[test]
    fn test_deserialize_collapses_duplicate_types() {
        let conditions: Conditions = serde_json::from_value(serde_json::json!([
            {"type": "Subscribed", "status": "False"},
            {"type": "Subscribed", "status": "True"}
        ]))
        .unwrap();
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions.status_of("Subscribed"), ConditionStatus::True);
        assert_eq!(conditions.status_of("Missing"), ConditionStatus::Unknown);
    }
}
