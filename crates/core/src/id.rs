//! Strongly-typed identifiers used across the worker.
//!
//! Both identifiers are producer-owned strings: the worker never generates them,
//! it only validates what it reads back from the store.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// Identifier of a job record (assigned by the producer).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

/// Name of a queue lane (e.g. `high`, `default`, `low`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueueName(String);

macro_rules! impl_string_newtype {
    ($t:ty, $name:literal, $validate:expr) => {
        impl $t {
            /// Create a validated identifier.
            pub fn new(value: impl Into<String>) -> Result<Self, DomainError> {
                let value = value.into();
                let validate: fn(&str) -> Result<(), String> = $validate;
                validate(&value).map_err(|e| DomainError::invalid_id(format!("{}: {}", $name, e)))?;
                Ok(Self(value))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $t {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl From<$t> for String {
            fn from(value: $t) -> Self {
                value.0
            }
        }
    };
}

impl_string_newtype!(JobId, "JobId", |s| {
    if s.trim().is_empty() {
        return Err("must not be empty".to_string());
    }
    Ok(())
});

impl_string_newtype!(QueueName, "QueueName", |s| {
    if s.is_empty() {
        return Err("must not be empty".to_string());
    }
    if s.chars().any(|c| c.is_whitespace() || c == ':') {
        return Err(format!("'{s}' contains whitespace or ':'"));
    }
    Ok(())
});

/// Ordered, duplicate-free set of lanes scanned by a worker.
///
/// The first lane has the highest priority. A lane is only polled in a cycle
/// once every lane before it came back empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<QueueName>", into = "Vec<QueueName>")]
pub struct LaneOrder(Vec<QueueName>);

impl LaneOrder {
    pub fn new(lanes: Vec<QueueName>) -> DomainResult<Self> {
        if lanes.is_empty() {
            return Err(DomainError::validation("lane order must contain at least one lane"));
        }
        for (i, lane) in lanes.iter().enumerate() {
            if lanes[..i].contains(lane) {
                return Err(DomainError::validation(format!("lane '{lane}' listed twice")));
            }
        }
        Ok(Self(lanes))
    }

    pub fn lanes(&self) -> &[QueueName] {
        &self.0
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueueName> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Default for LaneOrder {
    /// `high, default, low`.
    fn default() -> Self {
        Self(
            ["high", "default", "low"]
                .into_iter()
                .map(|s| QueueName(s.to_string()))
                .collect(),
        )
    }
}

impl FromStr for LaneOrder {
    type Err = DomainError;

    /// Parse a comma-separated list, e.g. `"high, default, low"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lanes = s
            .split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(QueueName::new)
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(lanes)
    }
}

impl TryFrom<Vec<QueueName>> for LaneOrder {
    type Error = DomainError;

    fn try_from(value: Vec<QueueName>) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<LaneOrder> for Vec<QueueName> {
    fn from(value: LaneOrder) -> Self {
        value.0
    }
}

impl core::fmt::Display for LaneOrder {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        for (i, lane) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            f.write_str(lane.as_str())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_id_rejects_blank() {
        assert!(JobId::new("").is_err());
        assert!(JobId::new("   ").is_err());
        assert_eq!(JobId::new("j1").unwrap().as_str(), "j1");
    }

    #[test]
    fn queue_name_rejects_separators() {
        assert!(QueueName::new("high").is_ok());
        assert!(matches!(
            QueueName::new("rq:high"),
            Err(DomainError::InvalidId(msg)) if msg.starts_with("QueueName")
        ));
        assert!(QueueName::new("two words").is_err());
    }

    #[test]
    fn lane_order_parses_in_given_order() {
        let order: LaneOrder = " high ,default,low ".parse().unwrap();
        let names: Vec<&str> = order.iter().map(QueueName::as_str).collect();
        assert_eq!(names, vec!["high", "default", "low"]);
        assert_eq!(order.to_string(), "high,default,low");
    }

    #[test]
    fn lane_order_rejects_duplicates_and_empty() {
        assert!("high,high".parse::<LaneOrder>().is_err());
        assert!(" , ".parse::<LaneOrder>().is_err());
    }

    #[test]
    fn default_lane_order_is_high_default_low() {
        assert_eq!(LaneOrder::default(), "high,default,low".parse().unwrap());
    }

    #[test]
    fn lane_order_serde_validates() {
        let order: LaneOrder = serde_json::from_str(r#"["high","low"]"#).unwrap();
        assert_eq!(order.len(), 2);
        assert!(serde_json::from_str::<LaneOrder>(r#"["low","low"]"#).is_err());
    }
}
