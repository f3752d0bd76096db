use tracing_subscriber::EnvFilter;

/// Output format of the command-line interface, selected with
/// `--cli-format`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum CliFormat {
    /// Human-readable log lines.
    #[default]
    Human,
    /// One JSON object per log line, for machine consumption.
    Json,
}

/// Install the global tracing subscriber for a binary.
///
/// `RUST_LOG` overrides the default `info` filter.
pub fn init(format: CliFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);

    match format {
        CliFormat::Human => builder.init(),
        CliFormat::Json => builder.json().init(),
    }
}
