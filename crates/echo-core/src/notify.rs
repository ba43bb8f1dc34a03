use crate::model::Experiment;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NotificationLevel {
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notification {
    pub level: NotificationLevel,
    pub title: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experiment_id: Option<String>,
}

impl Notification {
    /// Summary of a completed experiment: success when every case passed,
    /// error when none did, warning otherwise (including an empty dataset).
    pub fn for_experiment(exp: &Experiment) -> Self {
        let passed = exp.passed_count();
        let total = exp.total_cases;
        let level = if total > 0 && passed == total {
            NotificationLevel::Success
        } else if total > 0 && passed == 0 {
            NotificationLevel::Error
        } else {
            NotificationLevel::Warning
        };
        Self {
            level,
            title: "Experiment completed".into(),
            message: format!("{}/{} test cases passed", passed, total),
            experiment_id: Some(exp.id.clone()),
        }
    }

    pub fn warning(title: &str, message: String) -> Self {
        Self {
            level: NotificationLevel::Warning,
            title: title.to_string(),
            message,
            experiment_id: None,
        }
    }
}

pub trait Notifier: Send + Sync {
    fn notify(&self, notification: &Notification);
}

/// Default sink: one structured log line per notification.
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, n: &Notification) {
        let experiment = n.experiment_id.as_deref().unwrap_or("none");
        match n.level {
            NotificationLevel::Success => tracing::info!(
                event = "echo.notify",
                level = "success",
                experiment = %experiment,
                "{}: {}", n.title, n.message
            ),
            NotificationLevel::Warning => tracing::warn!(
                event = "echo.notify",
                level = "warning",
                experiment = %experiment,
                "{}: {}", n.title, n.message
            ),
            NotificationLevel::Error => tracing::error!(
                event = "echo.notify",
                level = "error",
                experiment = %experiment,
                "{}: {}", n.title, n.message
            ),
        }
    }
}

/// Forwards notifications into a channel.
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<Notification>,
}

impl ChannelNotifier {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, n: &Notification) {
        // receiver gone means nobody is listening anymore
        let _ = self.tx.send(n.clone());
    }
}
