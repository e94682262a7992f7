//! Merge rules: defaults first, later sources override earlier ones key by key.

use config::Config;
use config::ConfigBuilder;
use config::ConfigError;

/// Create a Config builder with merge policy defaults applied.
pub fn builder_with_defaults() -> Result<ConfigBuilder<config::builder::DefaultState>, ConfigError>
{
    Config::builder()
        .set_default("node.url", "http://127.0.0.1:3456")?
        .set_default("node.connect_timeout_secs", 10)?
        .set_default("node.request_timeout_secs", 300)?
        .set_default("sync.no_change_policy", "skip_unchanged")?
        .set_default("sync.max_concurrent_reconciles", 8)?
        .set_default("logging.level", "info")
}
