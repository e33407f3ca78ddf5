//! User-visible error reporting.

use std::path::Path;

/// Maximum length of a reported message.
const MAX_MESSAGE_LEN: usize = 4096;

/// Sink for compile failures shown to the user.
pub trait Notifier: Send + Sync {
    fn report_error(&self, message: &str, path: &Path);
}

/// Strip control characters (except newline/tab) and cap the length of a
/// message produced by a plugin or an external tool.
pub fn sanitize_message(message: &str) -> String {
    let cleaned: String = message
        .trim_end()
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .take(MAX_MESSAGE_LEN)
        .collect();
    if message.trim_end().chars().count() > MAX_MESSAGE_LEN {
        format!("{cleaned}… (truncated)")
    } else {
        cleaned
    }
}

/// Reports errors through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn report_error(&self, message: &str, path: &Path) {
        tracing::error!(file = %path.display(), "{}", sanitize_message(message));
    }
}
