//! Validated start configuration.
//!
//! `StartRequest` is the loose shape callers send (strings everywhere);
//! `StartConfig` is the closed union the orchestrator accepts. Invalid
//! combinations are rejected when the config is built, not deep inside a
//! handler.

use serde::{Deserialize, Serialize};

use crate::calculation::{CalcId, CalcKind, CalculationTarget};
use crate::error::StartError;

/// Baseline and optional reform policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyIds {
    /// Baseline policy id.
    pub baseline: String,
    /// Reform policy id, when comparing against a reform.
    pub reform: Option<String>,
}

impl PolicyIds {
    /// Policy the remote service should simulate (reform if any, else baseline).
    #[must_use]
    pub fn effective(&self) -> &str {
        self.reform.as_deref().unwrap_or(&self.baseline)
    }
}

/// Parent report of a simulation-level calculation.
///
/// When every listed simulation completes, their outputs are combined into
/// the report's result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportLink {
    /// Parent report id.
    pub report_id: CalcId,
    /// All simulations feeding the report, in output order.
    pub simulation_ids: Vec<CalcId>,
}

/// What a calculation is attached to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TargetSpec {
    /// Report-level calculation.
    Report {
        /// Report id, also the calculation id.
        report_id: CalcId,
    },
    /// Simulation-level calculation.
    Simulation {
        /// Simulation id, also the calculation id.
        simulation_id: CalcId,
        /// Parent report, if the simulation belongs to one.
        parent: Option<ReportLink>,
    },
}

impl TargetSpec {
    /// Calculation id for this target.
    #[must_use]
    pub fn calc_id(&self) -> &CalcId {
        match self {
            Self::Report { report_id } => report_id,
            Self::Simulation { simulation_id, .. } => simulation_id,
        }
    }

    /// Target tag.
    #[must_use]
    pub fn target_type(&self) -> CalculationTarget {
        match self {
            Self::Report { .. } => CalculationTarget::Report,
            Self::Simulation { .. } => CalculationTarget::Simulation,
        }
    }

    /// Parent report link, for simulation targets.
    #[must_use]
    pub fn parent(&self) -> Option<&ReportLink> {
        match self {
            Self::Report { .. } => None,
            Self::Simulation { parent, .. } => parent.as_ref(),
        }
    }
}

/// Parameters forwarded to the remote service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalcParams {
    /// Country model id (e.g. `us`, `uk`).
    pub country_id: String,
    /// Household id or geography id.
    pub population_id: String,
    /// Policies to simulate.
    pub policies: PolicyIds,
    /// Region code for economy calculations.
    pub region: Option<String>,
    /// Simulation year.
    pub year: Option<String>,
}

/// Validated start configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StartConfig {
    kind: CalcKind,
    target: TargetSpec,
    params: CalcParams,
}

impl StartConfig {
    /// Build and validate a config.
    pub fn new(kind: CalcKind, target: TargetSpec, params: CalcParams) -> Result<Self, StartError> {
        require("country id", &params.country_id)?;
        require("population id", &params.population_id)?;
        require("baseline policy id", &params.policies.baseline)?;

        if kind == CalcKind::Economy && target.target_type() == CalculationTarget::Simulation {
            return Err(StartError::InvalidConfig(
                "economy calculations must target a report".into(),
            ));
        }

        if let TargetSpec::Simulation {
            simulation_id,
            parent: Some(link),
        } = &target
        {
            if !link.simulation_ids.contains(simulation_id) {
                return Err(StartError::InvalidConfig(format!(
                    "simulation {simulation_id} is not listed in report {}",
                    link.report_id
                )));
            }
        }

        Ok(Self {
            kind,
            target,
            params,
        })
    }

    /// Household calculation.
    pub fn household(target: TargetSpec, params: CalcParams) -> Result<Self, StartError> {
        Self::new(CalcKind::Household, target, params)
    }

    /// Economy calculation for a report.
    pub fn economy(report_id: CalcId, params: CalcParams) -> Result<Self, StartError> {
        Self::new(CalcKind::Economy, TargetSpec::Report { report_id }, params)
    }

    /// Calculation kind.
    #[must_use]
    pub fn kind(&self) -> CalcKind {
        self.kind
    }

    /// Target description.
    #[must_use]
    pub fn target(&self) -> &TargetSpec {
        &self.target
    }

    /// Calculation id.
    #[must_use]
    pub fn calc_id(&self) -> &CalcId {
        self.target.calc_id()
    }

    /// Target tag.
    #[must_use]
    pub fn target_type(&self) -> CalculationTarget {
        self.target.target_type()
    }

    /// Remote parameters.
    #[must_use]
    pub fn params(&self) -> &CalcParams {
        &self.params
    }
}

fn require(what: &str, value: &str) -> Result<(), StartError> {
    if value.trim().is_empty() {
        Err(StartError::InvalidConfig(format!("{what} is empty")))
    } else {
        Ok(())
    }
}

/// Loose start request, as received from callers or JSON.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StartRequest {
    /// Report or simulation id.
    pub calc_id: String,
    /// `report` or `simulation`.
    pub target_type: String,
    /// `household` or `economy`.
    pub calc_kind: String,
    /// Country model id.
    pub country_id: String,
    /// Household or geography id; economy requests fall back to region, then country.
    pub population_id: String,
    /// Baseline policy id.
    pub baseline_policy_id: String,
    /// Reform policy id.
    pub reform_policy_id: Option<String>,
    /// Region code.
    pub region: Option<String>,
    /// Simulation year.
    pub year: Option<String>,
    /// Parent report of a simulation-level calculation.
    pub parent_report_id: Option<String>,
    /// Every simulation of the parent report (including this one).
    pub report_simulation_ids: Vec<String>,
}

impl TryFrom<&StartRequest> for StartConfig {
    type Error = StartError;

    fn try_from(req: &StartRequest) -> Result<Self, Self::Error> {
        let target_type: CalculationTarget = req.target_type.parse()?;
        let kind: CalcKind = req.calc_kind.parse()?;
        let calc_id = CalcId::new(req.calc_id.as_str())?;

        let target = match target_type {
            CalculationTarget::Report => TargetSpec::Report { report_id: calc_id },
            CalculationTarget::Simulation => {
                let parent = match &req.parent_report_id {
                    Some(report_id) => Some(ReportLink {
                        report_id: CalcId::new(report_id.as_str())?,
                        simulation_ids: req
                            .report_simulation_ids
                            .iter()
                            .map(|id| CalcId::new(id.as_str()))
                            .collect::<Result<_, _>>()?,
                    }),
                    None => None,
                };
                TargetSpec::Simulation {
                    simulation_id: calc_id,
                    parent,
                }
            }
        };

        let population_id = if req.population_id.trim().is_empty() && kind == CalcKind::Economy {
            req.region
                .clone()
                .unwrap_or_else(|| req.country_id.clone())
        } else {
            req.population_id.clone()
        };

        let params = CalcParams {
            country_id: req.country_id.clone(),
            population_id,
            policies: PolicyIds {
                baseline: req.baseline_policy_id.clone(),
                reform: req.reform_policy_id.clone().filter(|r| !r.trim().is_empty()),
            },
            region: req.region.clone(),
            year: req.year.clone(),
        };

        Self::new(kind, target, params)
    }
}

impl TryFrom<StartRequest> for StartConfig {
    type Error = StartError;

    fn try_from(req: StartRequest) -> Result<Self, Self::Error> {
        Self::try_from(&req)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> CalcParams {
        CalcParams {
            country_id: "us".into(),
            population_id: "hh-1".into(),
            policies: PolicyIds {
                baseline: "p-base".into(),
                reform: Some("p-reform".into()),
            },
            region: None,
            year: Some("2025".into()),
        }
    }

    fn request() -> StartRequest {
        StartRequest {
            calc_id: "sim-1".into(),
            target_type: "simulation".into(),
            calc_kind: "household".into(),
            country_id: "us".into(),
            population_id: "hh-1".into(),
            baseline_policy_id: "p-base".into(),
            ..Default::default()
        }
    }

    #[test]
    fn household_simulation_is_valid() {
        let target = TargetSpec::Simulation {
            simulation_id: CalcId::new("sim-1").unwrap(),
            parent: None,
        };
        let config = StartConfig::household(target, params()).unwrap();
        assert_eq!(config.kind(), CalcKind::Household);
        assert_eq!(config.target_type(), CalculationTarget::Simulation);
        assert_eq!(config.calc_id().as_str(), "sim-1");
        assert_eq!(config.params().policies.effective(), "p-reform");
    }

    #[test]
    fn economy_simulation_is_rejected() {
        let target = TargetSpec::Simulation {
            simulation_id: CalcId::new("sim-1").unwrap(),
            parent: None,
        };
        let err = StartConfig::new(CalcKind::Economy, target, params()).unwrap_err();
        assert!(matches!(err, StartError::InvalidConfig(_)));
    }

    #[test]
    fn missing_baseline_is_rejected() {
        let mut p = params();
        p.policies.baseline = "  ".into();
        let err = StartConfig::economy(CalcId::new("r1").unwrap(), p).unwrap_err();
        assert!(err.to_string().contains("baseline"));
    }

    #[test]
    fn parent_link_must_list_simulation() {
        let target = TargetSpec::Simulation {
            simulation_id: CalcId::new("sim-3").unwrap(),
            parent: Some(ReportLink {
                report_id: CalcId::new("r1").unwrap(),
                simulation_ids: vec![CalcId::new("sim-1").unwrap(), CalcId::new("sim-2").unwrap()],
            }),
        };
        assert!(StartConfig::household(target, params()).is_err());
    }

    #[test]
    fn request_converts_to_config() {
        let config = StartConfig::try_from(&request()).unwrap();
        assert_eq!(config.kind(), CalcKind::Household);
        assert!(config.target().parent().is_none());
    }

    #[test]
    fn request_with_unknown_target_is_rejected() {
        let mut req = request();
        req.target_type = "household".into();
        let err = StartConfig::try_from(&req).unwrap_err();
        assert!(err.to_string().contains("unknown target type"));
    }

    #[test]
    fn request_with_parent_report_builds_link() {
        let mut req = request();
        req.parent_report_id = Some("r9".into());
        req.report_simulation_ids = vec!["sim-1".into(), "sim-2".into()];
        let config = StartConfig::try_from(req).unwrap();
        let link = config.target().parent().unwrap();
        assert_eq!(link.report_id.as_str(), "r9");
        assert_eq!(link.simulation_ids.len(), 2);
    }

    #[test]
    fn economy_request_falls_back_to_region() {
        let req = StartRequest {
            calc_id: "r1".into(),
            target_type: "report".into(),
            calc_kind: "economy".into(),
            country_id: "uk".into(),
            baseline_policy_id: "p1".into(),
            region: Some("uk/scotland".into()),
            ..Default::default()
        };
        let config = StartConfig::try_from(&req).unwrap();
        assert_eq!(config.params().population_id, "uk/scotland");
    }

    #[test]
    fn request_deserializes_camel_case() {
        let req: StartRequest = serde_json::from_str(
            r#"{"calcId":"r1","targetType":"report","calcKind":"economy",
                "countryId":"us","baselinePolicyId":"2"}"#,
        )
        .unwrap();
        assert_eq!(req.calc_id, "r1");
        assert!(StartConfig::try_from(&req).is_ok());
    }
}
