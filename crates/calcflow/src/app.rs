//! Application entry point and dispatch.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use calcflow_cache::{CacheEvent, QueryKey};
use calcflow_cli::output::write_json;
use calcflow_cli::{ui, CliStatusPresenter, ProgressBoard, StatusPresenter};
use calcflow_core::{CalcId, CalcStatus, CancellationToken, Settings};
use calcflow_orchestration::{
    AggregatedCalcStatus, CalculationService, JsonFileStore, SimulatedBehavior, SimulatedRemote,
    StartOutcome,
};

use crate::config::AppConfig;
use crate::errors::AppError;
use crate::plan::RunPlan;
use crate::version;

/// Floor for the remote poll interval derived from the job duration.
const MIN_REMOTE_POLL: Duration = Duration::from_millis(50);

/// How long to wait for report lists to refresh after the last calculation.
const REPORT_GRACE: Duration = Duration::from_secs(2);

/// What a finished run looked like.
#[derive(Debug)]
pub struct RunReport {
    pub summary: AggregatedCalcStatus,
    /// Final status of each calculation, labelled.
    pub statuses: Vec<(String, CalcStatus)>,
    /// Report list refreshes observed while running.
    pub report_refreshes: usize,
    pub elapsed: Duration,
}

/// Run the application.
pub fn run(config: &AppConfig) -> Result<()> {
    if let Some(shell) = config.completion {
        let mut cmd = <AppConfig as clap::CommandFactory>::command();
        calcflow_cli::completion::generate_completion(&mut cmd, shell, &mut std::io::stdout());
        return Ok(());
    }

    let settings = load_settings(config)?;
    let plan = RunPlan::build(config).map_err(AppError::from)?;
    let service = build_service(config, settings)?;

    let cancel = CancellationToken::new();
    ctrlc_handler(cancel.clone())?;

    if !config.quiet {
        ui::print_header(&format!(
            "{}: {} {} calculation(s)",
            version::full_version(),
            plan.calculations.len(),
            plan.kind
        ));
    }

    let timeout = config.timeout_duration().map_err(AppError::Config)?;
    let report = execute(&service, &plan, &cancel, timeout, config.quiet)?;
    present(config, &report)?;

    if report.summary.is_error() {
        let failed = report.statuses.iter().filter(|(_, s)| s.is_error()).count();
        return Err(AppError::CalculationsFailed {
            failed,
            total: report.statuses.len(),
        }
        .into());
    }
    Ok(())
}

/// Settings from `--config`, or defaults tuned to the simulated job duration.
pub fn load_settings(config: &AppConfig) -> Result<Settings, AppError> {
    if let Some(path) = &config.config {
        let settings = Settings::from_file(path)?;
        debug!(path = %path.display(), "loaded settings file");
        return Ok(settings.normalize());
    }

    let run_time = config.duration().map_err(AppError::Config)?
        + config.queue_time().map_err(AppError::Config)?;
    let defaults = Settings::default();
    Ok(Settings {
        household_estimated_duration: run_time,
        economy_estimated_duration: run_time,
        remote_poll_interval: (run_time / 4).clamp(MIN_REMOTE_POLL, defaults.remote_poll_interval),
        ..defaults
    }
    .normalize())
}

/// Service backed by a simulated remote configured from the flags.
pub fn build_service(
    config: &AppConfig,
    settings: Settings,
) -> Result<CalculationService, AppError> {
    let run_time = config.duration().map_err(AppError::Config)?;
    let mut behavior = SimulatedBehavior {
        queue_time: config.queue_time().map_err(AppError::Config)?,
        household_duration: run_time,
        economy_duration: run_time,
        report_progress: true,
        ..SimulatedBehavior::default()
    };
    for raw in &config.fail {
        let id = CalcId::new(raw.as_str()).map_err(AppError::from)?;
        behavior.failing.insert(id);
    }

    let mut builder =
        CalculationService::builder(Arc::new(SimulatedRemote::new(behavior))).settings(settings);
    if let Some(dir) = &config.output_dir {
        builder = builder.store(Arc::new(JsonFileStore::new(dir)));
    }
    Ok(builder.build())
}

/// Start every planned calculation and follow it until all are terminal.
pub fn execute(
    service: &CalculationService,
    plan: &RunPlan,
    cancel: &CancellationToken,
    timeout: Duration,
    quiet: bool,
) -> Result<RunReport, AppError> {
    let started = Instant::now();
    let refreshes = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&refreshes);
    let subscription = service.subscribe(
        QueryKey::reports_all(),
        Arc::new(move |event: &CacheEvent| {
            if matches!(event, CacheEvent::Invalidated { .. }) {
                counter.fetch_add(1, Ordering::Relaxed);
            }
        }),
    );

    for calc in &plan.calculations {
        match service.start_calculation(&calc.request)? {
            StartOutcome::Started => info!(calc_id = %calc.label, "calculation started"),
            StartOutcome::AlreadyRunning => {
                debug!(calc_id = %calc.label, "calculation already running");
            }
        }
    }
    let monitor = service.monitor_pending_reports(&plan.reports);

    let mut board = ProgressBoard::new(quiet);
    for calc in &plan.calculations {
        board.add(&calc.label);
    }
    let watched = watch(service, plan, &board, cancel, timeout, started);
    board.finish();
    let summary = match watched {
        Ok(summary) => summary,
        Err(err) => {
            monitor.stop();
            service.unsubscribe(subscription);
            service.cleanup();
            return Err(err);
        }
    };

    let deadline = Instant::now() + REPORT_GRACE;
    while !monitor.tracked_ids().is_empty() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    if !monitor.tracked_ids().is_empty() {
        warn!(
            pending = monitor.tracked_ids().len(),
            "reports still pending after all calculations finished"
        );
    }
    monitor.stop();
    service.unsubscribe(subscription);
    service.cleanup();

    let statuses = plan
        .calculations
        .iter()
        .map(|c| c.label.clone())
        .zip(summary.calculations.iter().cloned())
        .collect();
    Ok(RunReport {
        summary,
        statuses,
        report_refreshes: refreshes.load(Ordering::Relaxed),
        elapsed: started.elapsed(),
    })
}

fn watch(
    service: &CalculationService,
    plan: &RunPlan,
    board: &ProgressBoard,
    cancel: &CancellationToken,
    timeout: Duration,
    started: Instant,
) -> Result<AggregatedCalcStatus, AppError> {
    let ids = plan.ids();
    let target = plan.target();
    let interval = service.settings().update_interval;
    loop {
        let summary = service.get_aggregated_status(&ids, target);
        for (calc, status) in plan.calculations.iter().zip(&summary.calculations) {
            board.update(&calc.label, status);
        }
        if summary.calculations.iter().all(CalcStatus::is_terminal) {
            return Ok(summary);
        }
        if cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }
        if started.elapsed() >= timeout {
            return Err(AppError::Timeout(timeout));
        }
        thread::sleep(interval);
    }
}

fn present(config: &AppConfig, report: &RunReport) -> Result<()> {
    let presenter = CliStatusPresenter::new(config.verbose, config.quiet);
    for (label, status) in &report.statuses {
        presenter.present_status(label, status);
    }
    presenter.present_summary(&report.summary, report.elapsed);
    if config.verbose {
        println!("Report list refreshes: {}", report.report_refreshes);
    }

    let json = serde_json::to_value(&report.summary).context("serializing run summary")?;
    if config.json {
        println!("{}", serde_json::to_string_pretty(&json)?);
    }
    if let Some(dir) = &config.output_dir {
        let path = dir.join("summary.json");
        write_json(&path, &json).with_context(|| format!("writing {}", path.display()))?;
    }
    Ok(())
}

fn ctrlc_handler(cancel: CancellationToken) -> Result<()> {
    ctrlc::set_handler(move || {
        cancel.cancel();
    })
    .context("failed to install Ctrl+C handler")
}
