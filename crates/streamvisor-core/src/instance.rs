//! Persisted record of one managed device container.
//!
//! `updated_at >= created_at` holds for every `Instance` value: the
//! constructors, the status transition and deserialization all reject a
//! pair that violates it, so a store never receives one.

use crate::{CoreError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceStatus {
    Active,
    Inactive,
    Paused,
}

impl InstanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceStatus::Active => "ACTIVE",
            InstanceStatus::Inactive => "INACTIVE",
            InstanceStatus::Paused => "PAUSED",
        }
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstanceStatus {
    type Err = CoreError;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "ACTIVE" => Ok(InstanceStatus::Active),
            "INACTIVE" => Ok(InstanceStatus::Inactive),
            "PAUSED" => Ok(InstanceStatus::Paused),
            other => Err(CoreError::InvalidStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "InstanceRecord")]
pub struct Instance {
    id: String,
    status: InstanceStatus,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Instance {
    pub fn new(
        id: impl Into<String>,
        status: InstanceStatus,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Result<Self> {
        let instance = Self {
            id: id.into(),
            status,
            created_at,
            updated_at,
        };
        instance.validate()?;
        Ok(instance)
    }

    /// A freshly created, active instance stamped with the current time.
    pub fn activated(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            status: InstanceStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn status(&self) -> InstanceStatus {
        self.status
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Returns a copy moved to `status` as of `at`.
    pub fn transition(&self, status: InstanceStatus, at: DateTime<Utc>) -> Result<Self> {
        Self::new(self.id.clone(), status, self.created_at, at)
    }

    pub fn validate(&self) -> Result<()> {
        if self.updated_at < self.created_at {
            return Err(CoreError::InvalidTimestamps {
                instance_id: self.id.clone(),
            });
        }
        Ok(())
    }
}

#[derive(Deserialize)]
struct InstanceRecord {
    id: String,
    status: InstanceStatus,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<InstanceRecord> for Instance {
    type Error = CoreError;

    fn try_from(record: InstanceRecord) -> Result<Self> {
        Instance::new(
            record.id,
            record.status,
            record.created_at,
            record.updated_at,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_test::{assert_tokens, Token};

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(secs, 0).unwrap()
    }

    #[test]
    fn test_new_accepts_equal_timestamps() {
        let instance = Instance::new("cam-1", InstanceStatus::Active, at(100), at(100)).unwrap();
        assert_eq!(instance.id(), "cam-1");
        assert_eq!(instance.status(), InstanceStatus::Active);
        assert_eq!(instance.created_at(), instance.updated_at());
    }

    #[test]
    fn test_new_rejects_updated_before_created() {
        let result = Instance::new("cam-1", InstanceStatus::Active, at(100), at(99));
        assert_eq!(
            result,
            Err(CoreError::InvalidTimestamps {
                instance_id: "cam-1".to_string()
            })
        );
    }

    #[test]
    fn test_activated_is_active_and_consistent() {
        let instance = Instance::activated("cam-2");
        assert_eq!(instance.status(), InstanceStatus::Active);
        assert!(instance.validate().is_ok());
    }

    #[test]
    fn test_transition_keeps_identity_and_created_at() {
        let instance = Instance::new("cam-1", InstanceStatus::Active, at(100), at(100)).unwrap();
        let paused = instance
            .transition(InstanceStatus::Paused, at(100) + Duration::seconds(5))
            .unwrap();

        assert_eq!(paused.id(), "cam-1");
        assert_eq!(paused.created_at(), at(100));
        assert_eq!(paused.updated_at(), at(105));
        assert_eq!(paused.status(), InstanceStatus::Paused);
    }

    #[test]
    fn test_transition_rejects_time_travel() {
        let instance = Instance::new("cam-1", InstanceStatus::Active, at(100), at(200)).unwrap();
        assert!(instance.transition(InstanceStatus::Paused, at(50)).is_err());
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [
            InstanceStatus::Active,
            InstanceStatus::Inactive,
            InstanceStatus::Paused,
        ] {
            assert_eq!(status.as_str().parse::<InstanceStatus>().unwrap(), status);
        }
        assert!("RUNNING".parse::<InstanceStatus>().is_err());
    }

    #[test]
    fn test_status_serde_tokens() {
        assert_tokens(
            &InstanceStatus::Inactive,
            &[Token::UnitVariant {
                name: "InstanceStatus",
                variant: "INACTIVE",
            }],
        );
    }

    #[test]
    fn test_deserialize_rejects_inverted_timestamps() {
        let json = r#"{
            "id": "cam-1",
            "status": "ACTIVE",
            "created_at": "2024-01-02T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z"
        }"#;
        let result: std::result::Result<Instance, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }

    #[test]
    fn test_serialize_then_deserialize_is_identity() {
        let instance = Instance::new("cam-9", InstanceStatus::Paused, at(10), at(20)).unwrap();
        let json = serde_json::to_string(&instance).unwrap();
        let back: Instance = serde_json::from_str(&json).unwrap();
        assert_eq!(instance, back);
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(200))]

            #[test]
            fn property_inverted_timestamps_always_rejected(
                created in 1_000i64..2_000_000_000,
                gap in 1i64..1_000_000,
            ) {
                let result = Instance::new("dev", InstanceStatus::Active, at(created), at(created - gap));
                prop_assert!(result.is_err());
            }

            #[test]
            fn property_ordered_timestamps_always_accepted(
                created in 0i64..2_000_000_000,
                gap in 0i64..1_000_000,
            ) {
                let result = Instance::new("dev", InstanceStatus::Inactive, at(created), at(created + gap));
                prop_assert!(result.is_ok());
            }
        }
    }
}
