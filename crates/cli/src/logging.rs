use anyhow::{anyhow, Context, Result};
use spendgate_core::config::{LogFormat, LoggingConfig};
use tracing_subscriber::EnvFilter;

/// Installs the global subscriber. Logs go to stderr so command payloads on
/// stdout stay machine-readable. `RUST_LOG` wins over the configured level.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level)
            .with_context(|| format!("invalid log level `{}`", config.level))?,
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    let installed = match config.format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };

    installed.map_err(|error| anyhow!("failed to install tracing subscriber: {error}"))
}

#[cfg(test)]
mod tests {
    use spendgate_core::config::{LogFormat, LoggingConfig};

    use super::init;

    #[test]
    fn unparseable_levels_are_reported() {
        if std::env::var_os("RUST_LOG").is_some() {
            return;
        }
        let config =
            LoggingConfig { level: "spendgate=verbose".to_string(), format: LogFormat::Json };

        let error = init(&config).expect_err("level should be rejected");
        assert!(error.to_string().contains("invalid log level"));
    }
}
