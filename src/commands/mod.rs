pub mod apply;
pub mod check;
pub mod diff;

use anyhow::Result;
use reconcile::ExecuteOptions;

use crate::Context;
use crate::config::Config;
use crate::paths;

/// Load the config file selected by `--config` or the default location
pub fn load_config(ctx: &Context) -> Result<Config> {
    let path = paths::config_file(ctx.config.as_deref())?;
    Config::load(&path)
}

/// Config run options with command-line overrides applied
pub fn execute_options(
    config: &Config,
    jobs: Option<usize>,
    timeout: Option<u64>,
) -> ExecuteOptions {
    let mut options = config.options();
    if let Some(jobs) = jobs {
        options.concurrency = jobs;
    }
    if let Some(secs) = timeout {
        options.timeout = crate::config::timeout_from_secs(secs);
    }
    options
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_execute_options_overrides() {
        let config = Config::parse("[run]\nconcurrency = 4\ntimeout_secs = 30").unwrap();

        let options = execute_options(&config, None, None);
        assert_eq!(options.concurrency, 4);
        assert_eq!(options.timeout, Some(Duration::from_secs(30)));

        let options = execute_options(&config, Some(2), Some(0));
        assert_eq!(options.concurrency, 2);
        assert_eq!(options.timeout, None);
    }
}
