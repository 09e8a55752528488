//! Notifications
//!
//! Alert payloads and the sinks that put them on screen.

use crate::condition::ConditionKind;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum NotifyError {
    /// The notification subsystem is not ready (e.g. tray icon not created yet)
    #[cfg(windows)]
    #[error("notification subsystem unavailable: {0}")]
    Unavailable(String),

    #[error("notification delivery failed: {0}")]
    Delivery(String),
}

/// Button attached to an alert; `payload` is a URL or path opened on click
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationAction {
    pub label: String,
    pub payload: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub app_id: String,
    pub action: Option<NotificationAction>,
}

impl Notification {
    pub fn for_condition(
        kind: ConditionKind,
        app_id: &str,
        action: Option<NotificationAction>,
    ) -> Self {
        Self {
            title: kind.title().to_string(),
            app_id: app_id.to_string(),
            action,
        }
    }
}

/// Puts a notification on screen. Failures are reported, never panicked on.
pub trait NotificationSink {
    fn deliver(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// freedesktop / macOS notifications
#[cfg(not(windows))]
pub struct DesktopSink;

#[cfg(not(windows))]
impl NotificationSink for DesktopSink {
    fn deliver(&self, notification: &Notification) -> Result<(), NotifyError> {
        let mut toast = notify_rust::Notification::new();
        toast.summary(&notification.title).appname(&notification.app_id);
        attach_action(&mut toast, notification.action.as_ref());

        let handle = toast
            .show()
            .map_err(|e| NotifyError::Delivery(e.to_string()))?;
        follow_action(handle, notification.action.clone());

        Ok(())
    }
}

#[cfg(all(unix, not(target_os = "macos")))]
const ACTION_ID: &str = "open";

#[cfg(all(unix, not(target_os = "macos")))]
fn attach_action(toast: &mut notify_rust::Notification, action: Option<&NotificationAction>) {
    if let Some(action) = action {
        toast.action(ACTION_ID, &action.label);
    }
}

/// Waits for the click on a helper thread so delivery itself never blocks
#[cfg(all(unix, not(target_os = "macos")))]
fn follow_action(handle: notify_rust::NotificationHandle, action: Option<NotificationAction>) {
    let Some(action) = action else {
        return;
    };
    std::thread::spawn(move || {
        handle.wait_for_action(|id| {
            if id == ACTION_ID {
                open_payload(&action.payload);
            }
        });
    });
}

#[cfg(all(not(windows), not(all(unix, not(target_os = "macos")))))]
fn attach_action(_toast: &mut notify_rust::Notification, _action: Option<&NotificationAction>) {}

#[cfg(all(not(windows), not(all(unix, not(target_os = "macos")))))]
fn follow_action<H>(_handle: H, _action: Option<NotificationAction>) {}

/// Opens an action payload with the platform's default handler
pub fn open_payload(payload: &str) {
    #[cfg(windows)]
    let result = std::process::Command::new("cmd")
        .args(["/C", "start", "", payload])
        .spawn();
    #[cfg(target_os = "macos")]
    let result = std::process::Command::new("open").arg(payload).spawn();
    #[cfg(all(unix, not(target_os = "macos")))]
    let result = std::process::Command::new("xdg-open").arg(payload).spawn();

    match result {
        Ok(_) => info!("Opened {}", payload),
        Err(e) => warn!("Could not open {}: {}", payload, e),
    }
}

/// Shows start info (log only)
pub fn show_start_notification(endpoint: &str, watched: &[ConditionKind]) {
    let names: Vec<_> = watched.iter().map(ConditionKind::name).collect();
    info!("=== CFW Helper started ===");
    info!("Watching controller {}", endpoint);
    info!("Alert on: {:?}", names);
}

/// Shows stop info (log only)
pub fn show_stop_notification() {
    info!("=== CFW Helper ended ===");
}
