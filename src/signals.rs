//! Ctrl-C / SIGTERM handling for long runs

use anyhow::{Context, Result};
use reconcile::CancelToken;
use signal_hook::consts::signal::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;

/// Exit status for a second interrupt (128 + SIGINT)
const FORCED_EXIT: i32 = 130;

/// Cancel `token` on the first SIGINT/SIGTERM and exit on the second
///
/// Cancellation stops dispatching new directories; operations already
/// running are allowed to finish so no directory is left half-configured.
pub fn cancel_on_signal(token: &CancelToken) -> Result<()> {
    let mut signals =
        Signals::new([SIGINT, SIGTERM]).context("Failed to set up signal handlers")?;
    let token = token.clone();

    std::thread::Builder::new()
        .name("signals".to_string())
        .spawn(move || {
            for signal in signals.forever() {
                if token.is_cancelled() {
                    log::warn!("Received signal {signal} again, exiting");
                    std::process::exit(FORCED_EXIT);
                }
                log::warn!("Received signal {signal}, finishing in-flight operations");
                token.cancel();
            }
        })
        .context("Failed to spawn signal thread")?;

    Ok(())
}
