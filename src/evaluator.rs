use chrono::{DateTime, Utc};

use crate::model::{Alert, AlertStatus, Direction};

/// Result of evaluating an active alert against a fetched price.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub alert: Alert,
    pub fired: bool,
}

/// Evaluate an active alert against a successfully fetched price.
///
/// Callers only invoke this when a price was actually obtained; a failed
/// fetch skips evaluation entirely so `last_checked` is untouched. The
/// threshold comparison is inclusive on both sides.
pub fn evaluate(mut alert: Alert, price: f64, now: DateTime<Utc>) -> Evaluation {
    alert.last_checked = Some(now);

    let fired = match alert.direction {
        Direction::Above => price >= alert.threshold_price,
        Direction::Below => price <= alert.threshold_price,
    };

    if fired {
        alert.triggered_at = Some(now);
        if !alert.persistent {
            alert.status = AlertStatus::Triggered;
        }
    }

    Evaluation { alert, fired }
}
