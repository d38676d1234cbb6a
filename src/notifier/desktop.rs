use error_stack::{Report, ResultExt};
use notify_rust::Notification;

use crate::error::NotifyError;
use crate::notifier::Notifier;

pub struct DesktopNotifier;

impl Notifier for DesktopNotifier {
    fn notify(&self, title: &str, message: &str) -> Result<(), Report<NotifyError>> {
        Notification::new()
            .summary(title)
            .body(message)
            .show()
            .change_context(NotifyError::Send)?;
        Ok(())
    }
}

/// Probe whether the current session can display desktop notifications.
///
/// On Linux this needs a DBus session or at least a display; without one,
/// attempting delivery would fail on every firing, so the caller picks the
/// no-op notifier once at startup instead.
pub fn desktop_available() -> bool {
    if cfg!(target_os = "linux") {
        std::env::var_os("DBUS_SESSION_BUS_ADDRESS").is_some()
            || std::env::var_os("DISPLAY").is_some()
            || std::env::var_os("WAYLAND_DISPLAY").is_some()
    } else {
        true
    }
}
