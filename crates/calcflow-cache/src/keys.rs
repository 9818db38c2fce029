//! Query keys: ordered string segments, matched by prefix.

use std::fmt;

use serde::{Deserialize, Serialize};

use calcflow_core::{CalcId, CalculationTarget};

/// Root segment of calculation status keys.
pub const CALCULATIONS: &str = "calculations";
/// Root segment of the report list.
pub const REPORTS: &str = "reports";
/// Root segment of report associations.
pub const REPORT_ASSOCIATIONS: &str = "report-associations";

/// Cache key made of ordered segments.
///
/// # Example
/// ```
/// use calcflow_cache::keys::QueryKey;
/// use calcflow_core::{CalcId, CalculationTarget};
///
/// let id = CalcId::new("42").unwrap();
/// let key = QueryKey::calculation(CalculationTarget::Report, &id);
/// assert_eq!(key.to_string(), "calculations/report/42");
/// assert!(key.starts_with(&QueryKey::calculations_all()));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryKey(Vec<String>);

impl QueryKey {
    /// Build a key from segments.
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    /// `["calculations", target, id]`
    #[must_use]
    pub fn calculation(target: CalculationTarget, calc_id: &CalcId) -> Self {
        Self::new([CALCULATIONS, target.as_str(), calc_id.as_str()])
    }

    /// `["calculations"]`
    #[must_use]
    pub fn calculations_all() -> Self {
        Self::new([CALCULATIONS])
    }

    /// `["reports"]`
    #[must_use]
    pub fn reports_all() -> Self {
        Self::new([REPORTS])
    }

    /// `["report-associations"]`
    #[must_use]
    pub fn report_associations_all() -> Self {
        Self::new([REPORT_ASSOCIATIONS])
    }

    /// Segments of the key.
    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Whether `prefix` matches the leading segments of this key.
    #[must_use]
    pub fn starts_with(&self, prefix: &QueryKey) -> bool {
        self.0.starts_with(&prefix.0)
    }

    /// Whether either key is a prefix of the other.
    #[must_use]
    pub fn overlaps(&self, other: &QueryKey) -> bool {
        self.starts_with(other) || other.starts_with(self)
    }

    /// Parse a calculation key back into target and id.
    #[must_use]
    pub fn as_calculation(&self) -> Option<(CalculationTarget, CalcId)> {
        match self.0.as_slice() {
            [root, target, id] if root == CALCULATIONS => {
                Some((target.parse().ok()?, CalcId::new(id.as_str()).ok()?))
            }
            _ => None,
        }
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("/"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn calculation_key_layout() {
        let id = CalcId::new("sim-7").unwrap();
        let key = QueryKey::calculation(CalculationTarget::Simulation, &id);
        assert_eq!(key.segments(), ["calculations", "simulation", "sim-7"]);
    }

    #[test]
    fn prefix_matching() {
        let id = CalcId::new("1").unwrap();
        let key = QueryKey::calculation(CalculationTarget::Report, &id);
        assert!(key.starts_with(&QueryKey::calculations_all()));
        assert!(key.starts_with(&key));
        assert!(!key.starts_with(&QueryKey::reports_all()));
        assert!(!QueryKey::calculations_all().starts_with(&key));
        assert!(QueryKey::calculations_all().overlaps(&key));
    }

    #[test]
    fn segment_boundaries_respected() {
        let a = QueryKey::new(["reports"]);
        let b = QueryKey::new(["reports-old"]);
        assert!(!b.starts_with(&a));
    }

    #[test]
    fn parses_calculation_key() {
        let id = CalcId::new("9").unwrap();
        let key = QueryKey::calculation(CalculationTarget::Report, &id);
        assert_eq!(key.as_calculation(), Some((CalculationTarget::Report, id)));
        assert!(QueryKey::reports_all().as_calculation().is_none());
    }
}
