//! Where tracker output goes.

use std::io::Write;

use tracing::{info, warn};

/// Receives text for the user.
///
/// `show` replaces the main display (address, loading text, idle hint).
/// `notify` is a transient status message such as location availability.
pub trait DisplaySink: Send + Sync + 'static {
    fn show(&self, text: &str);

    fn notify(&self, text: &str) {
        info!("{text}");
    }
}

/// Prints each displayed text as a block to stdout, stamped with the UTC time
/// it was shown.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalSink;

impl DisplaySink for TerminalSink {
    fn show(&self, text: &str) {
        let block = format_block(text, crate::fix::now_epoch_secs());
        let mut out = std::io::stdout().lock();
        if let Err(e) = out.write_all(block.as_bytes()).and_then(|()| out.flush()) {
            warn!("stdout write failed: {e}");
        }
    }

    fn notify(&self, text: &str) {
        let mut out = std::io::stdout().lock();
        if let Err(e) = writeln!(out, "* {text}") {
            warn!("stdout write failed: {e}");
        }
    }
}

fn format_block(text: &str, epoch_secs: u64) -> String {
    let secs_of_day = epoch_secs % 86_400;
    format!(
        "{text}\nTimestamp: {:02}:{:02}:{:02} UTC\n\n",
        secs_of_day / 3600,
        (secs_of_day % 3600) / 60,
        secs_of_day % 60
    )
}
