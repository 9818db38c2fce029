//! Turn CLI flags into the set of calculations to start.

use calcflow_core::{CalcId, CalcKind, CalculationTarget, StartConfig, StartError, StartRequest};
use calcflow_orchestration::ReportSummary;

use crate::config::AppConfig;

/// One calculation of a run.
#[derive(Debug, Clone)]
pub struct PlannedCalc {
    /// Display label.
    pub label: String,
    /// Validated configuration.
    pub config: StartConfig,
    /// Raw request handed to the service.
    pub request: StartRequest,
}

/// Everything a run starts and watches.
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub kind: CalcKind,
    pub calculations: Vec<PlannedCalc>,
    /// Reports handed to the pending-report monitor.
    pub reports: Vec<ReportSummary>,
}

impl RunPlan {
    /// Build and validate the plan described by `config`.
    pub fn build(config: &AppConfig) -> Result<Self, StartError> {
        let kind: CalcKind = config.kind.parse()?;
        if config.reports == 0 {
            return Err(StartError::InvalidConfig("at least one report is required".into()));
        }
        if kind == CalcKind::Household && config.simulations == 0 {
            return Err(StartError::InvalidConfig(
                "a household report needs at least one simulation".into(),
            ));
        }

        let mut calculations = Vec::new();
        let mut reports = Vec::new();
        for r in 1..=config.reports {
            let report_id = format!("report-{r}");
            match kind {
                CalcKind::Household => {
                    let sims: Vec<String> = (1..=config.simulations)
                        .map(|s| format!("{report_id}-sim-{s}"))
                        .collect();
                    for sim in &sims {
                        let request = StartRequest {
                            calc_id: sim.clone(),
                            target_type: CalculationTarget::Simulation.to_string(),
                            calc_kind: kind.to_string(),
                            parent_report_id: Some(report_id.clone()),
                            report_simulation_ids: sims.clone(),
                            ..base_request(config, kind)
                        };
                        calculations.push(planned(sim.clone(), request)?);
                    }
                    reports.push(ReportSummary::pending(report_id));
                }
                CalcKind::Economy => {
                    let request = StartRequest {
                        calc_id: report_id.clone(),
                        target_type: CalculationTarget::Report.to_string(),
                        calc_kind: kind.to_string(),
                        region: config.region.clone(),
                        ..base_request(config, kind)
                    };
                    let calc = planned(report_id.clone(), request)?;
                    reports.push(
                        ReportSummary::pending(report_id).with_calculation(calc.config.clone()),
                    );
                    calculations.push(calc);
                }
            }
        }
        Ok(Self {
            kind,
            calculations,
            reports,
        })
    }

    /// Target type shared by every calculation of the plan.
    #[must_use]
    pub fn target(&self) -> CalculationTarget {
        match self.kind {
            CalcKind::Household => CalculationTarget::Simulation,
            CalcKind::Economy => CalculationTarget::Report,
        }
    }

    /// Calculation ids in start order.
    #[must_use]
    pub fn ids(&self) -> Vec<CalcId> {
        self.calculations
            .iter()
            .map(|c| c.config.calc_id().clone())
            .collect()
    }
}

fn base_request(config: &AppConfig, kind: CalcKind) -> StartRequest {
    StartRequest {
        country_id: config.country.clone(),
        baseline_policy_id: config.baseline.clone(),
        reform_policy_id: config.reform.clone(),
        population_id: match kind {
            CalcKind::Household => "household-1".into(),
            CalcKind::Economy => String::new(),
        },
        ..StartRequest::default()
    }
}

fn planned(label: String, request: StartRequest) -> Result<PlannedCalc, StartError> {
    let config = StartConfig::try_from(&request)?;
    Ok(PlannedCalc {
        label,
        config,
        request,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn config(args: &[&str]) -> AppConfig {
        let mut argv = vec!["calcflow"];
        argv.extend_from_slice(args);
        AppConfig::try_parse_from(argv).unwrap()
    }

    #[test]
    fn household_plan_links_simulations() {
        let plan = RunPlan::build(&config(&["-r", "2", "-s", "3"])).unwrap();
        assert_eq!(plan.calculations.len(), 6);
        assert_eq!(plan.reports.len(), 2);
        assert_eq!(plan.target(), CalculationTarget::Simulation);
        let link = plan.calculations[0].config.target().parent().unwrap();
        assert_eq!(link.report_id.as_str(), "report-1");
        assert_eq!(link.simulation_ids.len(), 3);
        assert!(plan.reports.iter().all(|r| r.calculation.is_none()));
    }

    #[test]
    fn economy_plan_targets_reports() {
        let plan =
            RunPlan::build(&config(&["-k", "economy", "-r", "2", "--region", "ca"])).unwrap();
        assert_eq!(plan.target(), CalculationTarget::Report);
        assert_eq!(plan.ids().len(), 2);
        assert_eq!(plan.calculations[0].config.params().population_id, "ca");
        assert!(plan.reports.iter().all(|r| r.calculation.is_some()));
    }

    #[test]
    fn rejects_unknown_kind() {
        let err = RunPlan::build(&config(&["-k", "galaxy"])).unwrap_err();
        assert!(matches!(err, StartError::InvalidConfig(_)));
    }

    #[test]
    fn rejects_empty_runs() {
        assert!(RunPlan::build(&config(&["-r", "0"])).is_err());
        assert!(RunPlan::build(&config(&["-s", "0"])).is_err());
    }
}
