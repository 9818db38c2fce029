//! Identifiers and tags shared by every component.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::StartError;

/// Opaque identifier of one calculation (a report id or a simulation id).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CalcId(String);

impl CalcId {
    /// Build an id, rejecting blank input.
    pub fn new(id: impl Into<String>) -> Result<Self, StartError> {
        let id = id.into();
        let trimmed = id.trim();
        if trimmed.is_empty() {
            return Err(StartError::InvalidConfig("calculation id is empty".into()));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Borrow the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CalcId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for CalcId {
    type Error = StartError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<CalcId> for String {
    fn from(id: CalcId) -> Self {
        id.0
    }
}

impl AsRef<str> for CalcId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Scope a calculation is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CalculationTarget {
    /// Report-level calculation (economy impact, or a whole report).
    Report,
    /// Simulation-level calculation (one household simulation).
    Simulation,
}

impl CalculationTarget {
    /// Lowercase name used in cache keys and file names.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Report => "report",
            Self::Simulation => "simulation",
        }
    }
}

impl fmt::Display for CalculationTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CalculationTarget {
    type Err = StartError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "report" => Ok(Self::Report),
            "simulation" => Ok(Self::Simulation),
            other => Err(StartError::InvalidConfig(format!(
                "unknown target type: {other:?}"
            ))),
        }
    }
}

/// Kind of remote computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CalcKind {
    /// Single-household impact calculation.
    Household,
    /// Population-wide impact calculation.
    Economy,
}

impl CalcKind {
    /// Lowercase name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Household => "household",
            Self::Economy => "economy",
        }
    }
}

impl fmt::Display for CalcKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CalcKind {
    type Err = StartError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "household" => Ok(Self::Household),
            // Older clients call population-wide runs "society-wide".
            "economy" | "societywide" | "society-wide" => Ok(Self::Economy),
            other => Err(StartError::InvalidConfig(format!(
                "unknown calculation kind: {other:?}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn calc_id_trims_and_rejects_blank() {
        assert_eq!(CalcId::new("  r1 ").unwrap().as_str(), "r1");
        assert!(CalcId::new("").is_err());
        assert!(CalcId::new("   ").is_err());
    }

    #[test]
    fn target_parses_case_insensitively() {
        assert_eq!(
            "Report".parse::<CalculationTarget>().unwrap(),
            CalculationTarget::Report
        );
        assert_eq!(
            "simulation".parse::<CalculationTarget>().unwrap(),
            CalculationTarget::Simulation
        );
        assert!("household".parse::<CalculationTarget>().is_err());
    }

    #[test]
    fn kind_accepts_society_wide_alias() {
        assert_eq!("societyWide".parse::<CalcKind>().unwrap(), CalcKind::Economy);
        assert_eq!("household".parse::<CalcKind>().unwrap(), CalcKind::Household);
        assert!("geography".parse::<CalcKind>().is_err());
    }

    #[test]
    fn serde_uses_lowercase_tags() {
        let json = serde_json::to_string(&CalculationTarget::Simulation).unwrap();
        assert_eq!(json, "\"simulation\"");
        let id: CalcId = serde_json::from_str("\"abc\"").unwrap();
        assert_eq!(id.to_string(), "abc");
        assert!(serde_json::from_str::<CalcId>("\" \"").is_err());
    }
}
