use core_model::{Notifier, NotifyError};

pub mod render;
pub mod telegram;

pub use render::{render_failure, render_report};
pub use telegram::TelegramNotifier;

/// Writes messages to stdout. Used for dry runs and when no channel is
/// configured.
#[derive(Debug, Default)]
pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn channel(&self) -> &'static str {
        "console"
    }

    fn send(&self, text: &str) -> Result<(), NotifyError> {
        println!("{text}");
        Ok(())
    }
}
