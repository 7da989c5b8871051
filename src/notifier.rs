//! User-visible notifications
//!
//! Tasks report "compiled" and "failed" events through a [`Notifier`]. The
//! console implementation prints timestamped, coloured lines to stderr.

use std::sync::Arc;

use console::style;

/// Severity of a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Success,
    Error,
}

/// A single user-visible notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub level: Level,
    pub message: String,
}

impl Notification {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            level: Level::Success,
            message: message.into(),
        }
    }

    /// Error notifications always carry the `Error:` prefix.
    pub fn error(message: impl AsRef<str>) -> Self {
        Self {
            level: Level::Error,
            message: format!("Error: {}", message.as_ref()),
        }
    }
}

/// Sink for notifications
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: Notification);
}

pub type SharedNotifier = Arc<dyn Notifier>;

/// Prints notifications to stderr
#[derive(Debug, Default, Clone)]
pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn notify(&self, notification: Notification) {
        let stamp = chrono::Local::now().format("%H:%M:%S");
        let stamp = style(format!("[{stamp}]")).dim();

        match notification.level {
            Level::Success => {
                eprintln!("{} {} {}", stamp, style("✨").green(), notification.message)
            }
            Level::Error => eprintln!(
                "{} {}",
                stamp,
                style(&notification.message).red().bold()
            ),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_prefix() {
        let n = Notification::error("expected \";\"");
        assert_eq!(n.level, Level::Error);
        assert!(n.message.starts_with("Error: "));
    }
}
