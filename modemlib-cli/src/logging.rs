use tracing_subscriber::{EnvFilter, filter::LevelFilter, prelude::*};

/// Install the stderr logger.
///
/// `level` wins over `RUST_LOG`; without either, `info` and above is shown.
pub fn init(level: Option<&str>) -> anyhow::Result<()> {
    let filter = match level {
        Some(directives) => EnvFilter::try_new(directives)?,
        None => EnvFilter::builder()
            .with_default_directive(LevelFilter::INFO.into())
            .from_env_lossy(),
    };

    let stderr_log = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(stderr_log.with_filter(filter))
        .try_init()?;
    Ok(())
}
