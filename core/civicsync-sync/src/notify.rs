//! User-visible notification delivery.

use tracing::info;

/// Where "new items" and "back online" notices go.
///
/// Delivery is best-effort. When permission has not been granted the
/// coordinator skips the call entirely.
pub trait NotificationSink: Send + Sync {
    /// Whether the host has allowed notifications.
    fn is_permitted(&self) -> bool;

    /// Shows one notification.
    fn notify(&self, title: &str, body: &str);
}

/// Writes notifications to the log.
#[derive(Debug, Clone, Copy)]
pub struct LogNotifier {
    permitted: bool,
}

impl LogNotifier {
    pub fn new(permitted: bool) -> Self {
        Self { permitted }
    }
}

impl Default for LogNotifier {
    fn default() -> Self {
        Self::new(true)
    }
}

impl NotificationSink for LogNotifier {
    fn is_permitted(&self) -> bool {
        self.permitted
    }

    fn notify(&self, title: &str, body: &str) {
        info!(target: "civicsync::notify", %title, %body, "notification");
    }
}

/// A notifier that records what it was asked to show.
pub mod mock {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Mutex, PoisonError};

    #[derive(Debug)]
    pub struct RecordingNotifier {
        permitted: AtomicBool,
        shown: Mutex<Vec<(String, String)>>,
    }

    impl RecordingNotifier {
        pub fn new() -> Self {
            Self {
                permitted: AtomicBool::new(true),
                shown: Mutex::new(Vec::new()),
            }
        }

        /// A notifier whose permission was denied.
        pub fn denied() -> Self {
            let notifier = Self::new();
            notifier.set_permitted(false);
            notifier
        }

        pub fn set_permitted(&self, permitted: bool) {
            self.permitted.store(permitted, Ordering::SeqCst);
        }

        /// Every `(title, body)` shown so far.
        pub fn shown(&self) -> Vec<(String, String)> {
            self.shown
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }

        pub fn count(&self) -> usize {
            self.shown
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .len()
        }
    }

    impl Default for RecordingNotifier {
        fn default() -> Self {
            Self::new()
        }
    }

    impl NotificationSink for RecordingNotifier {
        fn is_permitted(&self) -> bool {
            self.permitted.load(Ordering::SeqCst)
        }

        fn notify(&self, title: &str, body: &str) {
            self.shown
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push((title.to_owned(), body.to_owned()));
        }
    }
}
