//! Durable storage of completed results.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tracing::{debug, info, warn};

use calcflow_cache::{CalcCache, QueryKey};
use calcflow_core::constants::PERSIST_RETRY_DELAY;
use calcflow_core::{CalcError, CalcId, CalcStatus, CalculationTarget, ReportLink, StartConfig};

/// Errors of a result store.
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    /// Filesystem failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The result could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    /// A linked report result was requested before its simulations finished.
    #[error("report {0} has incomplete simulations")]
    MissingReport(String),
    /// The store refused the write.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Durable destination for results, distinct from the status cache.
pub trait ResultStore: Send + Sync {
    /// Save a result.
    fn save(
        &self,
        target: CalculationTarget,
        calc_id: &CalcId,
        result: &Value,
    ) -> Result<(), PersistError>;

    /// Load a previously saved result.
    fn load(
        &self,
        target: CalculationTarget,
        calc_id: &CalcId,
    ) -> Result<Option<Value>, PersistError>;
}

/// In-memory store.
#[derive(Default)]
pub struct MemoryResultStore {
    results: RwLock<HashMap<(CalculationTarget, CalcId), Value>>,
}

impl MemoryResultStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored results.
    #[must_use]
    pub fn len(&self) -> usize {
        self.results.read().len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.results.read().is_empty()
    }
}

impl ResultStore for MemoryResultStore {
    fn save(
        &self,
        target: CalculationTarget,
        calc_id: &CalcId,
        result: &Value,
    ) -> Result<(), PersistError> {
        self.results
            .write()
            .insert((target, calc_id.clone()), result.clone());
        Ok(())
    }

    fn load(
        &self,
        target: CalculationTarget,
        calc_id: &CalcId,
    ) -> Result<Option<Value>, PersistError> {
        Ok(self.results.read().get(&(target, calc_id.clone())).cloned())
    }
}

/// One pretty-printed JSON file per result: `<dir>/<target>/<id>.json`.
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    /// Store rooted at `dir`. Directories are created on first write.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Root directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File path for a result.
    #[must_use]
    pub fn path_for(&self, target: CalculationTarget, calc_id: &CalcId) -> PathBuf {
        let name: String = calc_id
            .as_str()
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(target.as_str()).join(format!("{name}.json"))
    }
}

impl ResultStore for JsonFileStore {
    fn save(
        &self,
        target: CalculationTarget,
        calc_id: &CalcId,
        result: &Value,
    ) -> Result<(), PersistError> {
        let path = self.path_for(target, calc_id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(result)?)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn load(
        &self,
        target: CalculationTarget,
        calc_id: &CalcId,
    ) -> Result<Option<Value>, PersistError> {
        let path = self.path_for(target, calc_id);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Writes completed results to a [`ResultStore`] and settles linked reports.
///
/// Store failures never touch the cache: the terminal status stays as written.
pub struct ResultPersister {
    store: Arc<dyn ResultStore>,
    cache: Arc<CalcCache>,
    retry_delay: Duration,
    combine: Mutex<()>,
}

impl ResultPersister {
    /// Persister with the default retry delay.
    #[must_use]
    pub fn new(store: Arc<dyn ResultStore>, cache: Arc<CalcCache>) -> Self {
        Self::with_retry_delay(store, cache, PERSIST_RETRY_DELAY)
    }

    /// Persister with an explicit retry delay.
    #[must_use]
    pub fn with_retry_delay(
        store: Arc<dyn ResultStore>,
        cache: Arc<CalcCache>,
        retry_delay: Duration,
    ) -> Self {
        Self {
            store,
            cache,
            retry_delay,
            combine: Mutex::new(()),
        }
    }

    /// Save one result, retrying once after the retry delay.
    pub fn persist(
        &self,
        target: CalculationTarget,
        calc_id: &CalcId,
        result: &Value,
    ) -> Result<(), PersistError> {
        match self.store.save(target, calc_id, result) {
            Ok(()) => {
                debug!(calc_id = %calc_id, target = %target, "result persisted");
                Ok(())
            }
            Err(first) => {
                warn!(
                    calc_id = %calc_id,
                    target = %target,
                    error = %first,
                    "persist failed, retrying once"
                );
                thread::sleep(self.retry_delay);
                self.store.save(target, calc_id, result).inspect_err(|e| {
                    warn!(calc_id = %calc_id, target = %target, error = %e, "persist retry failed");
                })
            }
        }
    }

    /// Settle the linked report, then persist a completed calculation and,
    /// once every sibling is complete, the combined report.
    ///
    /// The report's cache entry is written before any durable write, so a
    /// store failure never changes what readers see. Errors are logged;
    /// nothing is returned to the polling loop.
    pub fn on_complete(&self, config: &StartConfig, result: &Value) {
        let link = config.target().parent();
        if let Some(link) = link {
            self.settle_report(link);
        }
        let _ = self.persist(config.target_type(), config.calc_id(), result);
        if let Some(link) = link {
            if let Err(e) = self.persist_report(link) {
                warn!(report_id = %link.report_id, error = %e, "report result not persisted");
            }
        }
    }

    /// Fail the linked report with the first sibling error.
    ///
    /// A report that is already terminal keeps its entry, so concurrent
    /// siblings race on the cache write and the first one wins.
    pub fn on_error(&self, config: &StartConfig, error: &CalcError) {
        let Some(link) = config.target().parent() else {
            return;
        };
        let written = self.cache.set(
            QueryKey::calculation(CalculationTarget::Report, &link.report_id),
            CalcStatus::Error(error.clone()),
        );
        if written {
            warn!(
                report_id = %link.report_id,
                simulation_id = %config.calc_id(),
                code = %error.code,
                "linked simulation failed, report failed"
            );
        }
    }

    /// Mark the report complete in the cache once every linked simulation
    /// is complete. Returns whether the entry was written.
    pub fn settle_report(&self, link: &ReportLink) -> bool {
        let Some(outputs) = self.linked_outputs(link) else {
            debug!(report_id = %link.report_id, "linked simulations still running");
            return false;
        };
        let written = self.cache.set(
            QueryKey::calculation(CalculationTarget::Report, &link.report_id),
            CalcStatus::complete(Value::Array(outputs)),
        );
        if written {
            info!(
                report_id = %link.report_id,
                simulations = link.simulation_ids.len(),
                "report complete"
            );
        }
        written
    }

    /// Persist the combined report result if every linked simulation is
    /// complete. Returns `Ok(true)` when the report was written.
    pub fn persist_report(&self, link: &ReportLink) -> Result<bool, PersistError> {
        let _guard = self.combine.lock();
        let combined = match self.combined_report(link) {
            Ok(combined) => combined,
            Err(PersistError::MissingReport(_)) => return Ok(false),
            Err(e) => return Err(e),
        };
        if self.store.load(CalculationTarget::Report, &link.report_id)?.as_ref() == Some(&combined)
        {
            return Ok(false);
        }
        self.persist(CalculationTarget::Report, &link.report_id, &combined)?;
        info!(
            report_id = %link.report_id,
            simulations = link.simulation_ids.len(),
            "report result persisted"
        );
        Ok(true)
    }

    /// Outputs of every linked simulation, in link order.
    pub fn combined_report(&self, link: &ReportLink) -> Result<Value, PersistError> {
        self.linked_outputs(link)
            .map(Value::Array)
            .ok_or_else(|| PersistError::MissingReport(link.report_id.to_string()))
    }

    /// Combined outputs, or `None` while any linked simulation is not complete.
    fn linked_outputs(&self, link: &ReportLink) -> Option<Vec<Value>> {
        link.simulation_ids
            .iter()
            .map(|sim| {
                match self.cache.get(&QueryKey::calculation(CalculationTarget::Simulation, sim)) {
                    Some(CalcStatus::Complete { result }) => Some(result),
                    _ => None,
                }
            })
            .collect()
    }

    /// Load a stored result.
    pub fn load(
        &self,
        target: CalculationTarget,
        calc_id: &CalcId,
    ) -> Result<Option<Value>, PersistError> {
        self.store.load(target, calc_id)
    }
}
