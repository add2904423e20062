//! Tracing subscriber setup from the `logging` config section.

use proverbs_core::config::LoggingConfig;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

/// Filter directives when `RUST_LOG` is not set.
///
/// `--verbose` forces debug; otherwise the configured level (default info)
/// followed by per-target filters.
pub fn default_directives(config: Option<&LoggingConfig>, verbose: bool) -> String {
    let level = if verbose {
        "debug".to_string()
    } else {
        config
            .and_then(|c| c.level.clone())
            .unwrap_or_else(|| "info".to_string())
    };

    let mut directives = vec![level];
    if let Some(config) = config {
        directives.extend(config.filters.iter().cloned());
    }
    directives.join(",")
}

pub fn init(config: Option<&LoggingConfig>, verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(config, verbose)));

    let writer = match config.map(|c| c.output.as_str()) {
        Some("stdout") => BoxMakeWriter::new(std::io::stdout),
        _ => BoxMakeWriter::new(std::io::stderr),
    };

    let json = config.is_some_and(|c| c.format == "json");
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(writer)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(writer)
            .init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn logging(level: Option<&str>, filters: &[&str]) -> LoggingConfig {
        LoggingConfig {
            format: "plain".into(),
            level: level.map(str::to_string),
            filters: filters.iter().map(|f| f.to_string()).collect(),
            output: "stderr".into(),
        }
    }

    #[test]
    fn test_default_is_info() {
        assert_eq!(default_directives(None, false), "info");
    }

    #[test]
    fn test_verbose_forces_debug() {
        let config = logging(Some("warn"), &[]);
        assert_eq!(default_directives(Some(&config), true), "debug");
    }

    #[test]
    fn test_level_and_filters() {
        let config = logging(Some("warn"), &["proverbs_gateway=debug", "hyper=off"]);
        assert_eq!(
            default_directives(Some(&config), false),
            "warn,proverbs_gateway=debug,hyper=off"
        );
    }
}
