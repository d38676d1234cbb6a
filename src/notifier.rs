pub mod desktop;

use error_stack::Report;

use crate::error::NotifyError;

/// Sink for alert notifications.
///
/// Delivery is best-effort: the monitor logs every firing itself and treats
/// a notify failure as a debug-level event, never as a cycle failure.
pub trait Notifier: Send + Sync {
    fn notify(&self, title: &str, message: &str) -> Result<(), Report<NotifyError>>;
}

/// Fallback used when desktop notifications are disabled or the platform
/// cannot display them; firings are still logged by the monitor.
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn notify(&self, _title: &str, _message: &str) -> Result<(), Report<NotifyError>> {
        Ok(())
    }
}
