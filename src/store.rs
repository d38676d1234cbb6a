use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use chrono::Utc;
use error_stack::{Report, ResultExt};
use uuid::Uuid;

use crate::error::{StoreError, ValidationError};
use crate::model::{Alert, AlertStatus, Direction, StatusFilter};

/// Optional fields applied by a partial update.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlertUpdate {
    pub threshold_price: Option<f64>,
    pub direction: Option<Direction>,
    pub persistent: Option<bool>,
}

impl AlertUpdate {
    pub fn is_empty(&self) -> bool {
        self.threshold_price.is_none() && self.direction.is_none() && self.persistent.is_none()
    }
}

/// File-backed store owning the authoritative alert collection.
///
/// Every mutation is a load-modify-save of the whole collection under an
/// internal mutex, so a monitor batch save never interleaves with a CRUD
/// command's save. Saves go through a temp file plus rename, so an
/// interrupted write never replaces the canonical file.
pub struct AlertStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl AlertStore {
    /// Open a store backed by the JSON file at `path`, creating the parent
    /// directory if needed. The file itself is created on first save.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, Report<StoreError>> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .change_context(StoreError::Write)
                .attach_with(|| format!("cannot create data directory: {}", parent.display()))?;
        }
        Ok(Self {
            path,
            lock: Mutex::new(()),
        })
    }

    /// Read the persisted collection. A missing file is an empty store;
    /// unparseable content or records violating invariants are corrupt.
    pub fn load(&self) -> Result<Vec<Alert>, Report<StoreError>> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.read_collection()
    }

    /// Replace the persisted collection wholesale.
    pub fn save(&self, alerts: &[Alert]) -> Result<(), Report<StoreError>> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.write_atomic(alerts)
    }

    /// Validate inputs, append a fresh `active` alert, and persist it.
    pub fn create(
        &self,
        ticker: &str,
        threshold_price: f64,
        direction: Direction,
        persistent: bool,
    ) -> Result<Alert, Report<StoreError>> {
        let ticker = normalize_ticker(ticker).change_context(StoreError::Validation)?;
        validate_price(threshold_price).change_context(StoreError::Validation)?;

        let alert = Alert {
            id: Uuid::new_v4().to_string(),
            ticker,
            threshold_price,
            direction,
            persistent,
            status: AlertStatus::Active,
            created_at: Utc::now(),
            last_checked: None,
            triggered_at: None,
        };

        self.mutate(|alerts| {
            alerts.push(alert.clone());
            Ok(())
        })?;

        Ok(alert)
    }

    pub fn get(&self, id: &str) -> Result<Alert, Report<StoreError>> {
        let alerts = self.load()?;
        alerts
            .into_iter()
            .find(|a| a.id == id)
            .ok_or_else(|| Report::new(StoreError::NotFound { id: id.to_owned() }))
    }

    /// Apply only the fields named by `update`, re-validate, and persist.
    /// The alert's status is never touched here; a triggered alert stays
    /// triggered until explicitly re-enabled.
    pub fn update(&self, id: &str, update: AlertUpdate) -> Result<Alert, Report<StoreError>> {
        if update.is_empty() {
            return Err(
                Report::new(ValidationError::EmptyUpdate).change_context(StoreError::Validation)
            );
        }
        if let Some(price) = update.threshold_price {
            validate_price(price).change_context(StoreError::Validation)?;
        }

        self.mutate(|alerts| {
            let alert = find_mut(alerts, id)?;
            if let Some(price) = update.threshold_price {
                alert.threshold_price = price;
            }
            if let Some(direction) = update.direction {
                alert.direction = direction;
            }
            if let Some(persistent) = update.persistent {
                alert.persistent = persistent;
            }
            Ok(alert.clone())
        })
    }

    /// Delete by id and persist.
    pub fn remove(&self, id: &str) -> Result<(), Report<StoreError>> {
        self.mutate(|alerts| {
            let before = alerts.len();
            alerts.retain(|a| a.id != id);
            if alerts.len() == before {
                return Err(Report::new(StoreError::NotFound { id: id.to_owned() }));
            }
            Ok(())
        })
    }

    /// Enable/disable path. The monitor is the only writer of `Triggered`,
    /// so that status is rejected here.
    pub fn set_status(&self, id: &str, status: AlertStatus) -> Result<Alert, Report<StoreError>> {
        if status == AlertStatus::Triggered {
            return Err(Report::new(ValidationError::ReservedStatus {
                status: status.to_string(),
            })
            .change_context(StoreError::Validation));
        }

        self.mutate(|alerts| {
            let alert = find_mut(alerts, id)?;
            alert.status = status;
            Ok(alert.clone())
        })
    }

    /// List alerts in creation order, optionally filtered by status and by
    /// exact (case-normalized) ticker.
    pub fn list(
        &self,
        status: StatusFilter,
        ticker: Option<&str>,
    ) -> Result<Vec<Alert>, Report<StoreError>> {
        let ticker = ticker.map(|t| t.trim().to_uppercase());
        let alerts = self.load()?;
        Ok(alerts
            .into_iter()
            .filter(|a| status.matches(a.status))
            .filter(|a| ticker.as_deref().is_none_or(|t| a.ticker == t))
            .collect())
    }

    /// Batch write-back from a monitor cycle: replace stored records by id
    /// in a single save. Ids no longer present in the store (removed while
    /// the cycle ran) are skipped, not resurrected.
    pub fn apply_evaluations(&self, evaluated: &[Alert]) -> Result<(), Report<StoreError>> {
        if evaluated.is_empty() {
            return Ok(());
        }
        let by_id: HashMap<&str, &Alert> =
            evaluated.iter().map(|a| (a.id.as_str(), a)).collect();

        self.mutate(|alerts| {
            for stored in alerts.iter_mut() {
                if let Some(updated) = by_id.get(stored.id.as_str()) {
                    *stored = (*updated).clone();
                }
            }
            Ok(())
        })
    }

    /// Run a load-modify-save sequence under the store lock. The save only
    /// happens when the closure succeeds, so failed operations leave the
    /// file untouched.
    fn mutate<T>(
        &self,
        f: impl FnOnce(&mut Vec<Alert>) -> Result<T, Report<StoreError>>,
    ) -> Result<T, Report<StoreError>> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut alerts = self.read_collection()?;
        let value = f(&mut alerts)?;
        self.write_atomic(&alerts)?;
        Ok(value)
    }

    fn read_collection(&self) -> Result<Vec<Alert>, Report<StoreError>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e)
                    .change_context(StoreError::Read)
                    .attach_with(|| format!("path: {}", self.path.display()));
            }
        };

        let alerts: Vec<Alert> =
            serde_json::from_str(&content).change_context(StoreError::Corrupt {
                path: self.path.display().to_string(),
            })?;

        check_invariants(&alerts).change_context(StoreError::Corrupt {
            path: self.path.display().to_string(),
        })?;

        Ok(alerts)
    }

    fn write_atomic(&self, alerts: &[Alert]) -> Result<(), Report<StoreError>> {
        let json = serde_json::to_string_pretty(alerts).change_context(StoreError::Write)?;

        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json.as_bytes())
            .change_context(StoreError::Write)
            .attach_with(|| format!("path: {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .change_context(StoreError::Write)
            .attach_with(|| format!("path: {}", self.path.display()))?;

        Ok(())
    }
}

fn find_mut<'a>(
    alerts: &'a mut [Alert],
    id: &str,
) -> Result<&'a mut Alert, Report<StoreError>> {
    alerts
        .iter_mut()
        .find(|a| a.id == id)
        .ok_or_else(|| Report::new(StoreError::NotFound { id: id.to_owned() }))
}

fn normalize_ticker(ticker: &str) -> Result<String, Report<ValidationError>> {
    let trimmed = ticker.trim();
    if trimmed.is_empty() {
        return Err(Report::new(ValidationError::EmptyTicker));
    }
    Ok(trimmed.to_uppercase())
}

fn validate_price(price: f64) -> Result<(), Report<ValidationError>> {
    if !(price.is_finite() && price > 0.0) {
        return Err(Report::new(ValidationError::NonPositivePrice {
            value: price,
        }));
    }
    Ok(())
}

/// Reject collections a well-behaved writer could never have produced.
fn check_invariants(alerts: &[Alert]) -> Result<(), Report<ValidationError>> {
    let mut seen = HashSet::new();
    for alert in alerts {
        if !seen.insert(alert.id.as_str()) {
            return Err(Report::new(ValidationError::DuplicateId {
                id: alert.id.clone(),
            }));
        }
        if alert.ticker.trim().is_empty() {
            return Err(Report::new(ValidationError::EmptyTicker));
        }
        if !(alert.threshold_price.is_finite() && alert.threshold_price > 0.0) {
            return Err(Report::new(ValidationError::NonPositivePrice {
                value: alert.threshold_price,
            }));
        }
    }
    Ok(())
}
