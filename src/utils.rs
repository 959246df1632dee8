use std::fmt::Display;
use std::time::Instant;

use console::Style;
use indicatif::ProgressStyle;

const ANSI_BLUE: Style = Style::new().blue();

pub fn as_overhead(s: Instant) -> impl Display {
    let e = Instant::now();
    let f = format!("(+{}ms)", e.duration_since(s).as_millis());
    ANSI_BLUE.apply_to(f)
}

/// Bar style for a whole plan.
pub(crate) fn get_style_plan() -> ProgressStyle {
    ProgressStyle::with_template(
        "{spinner:.green} [{elapsed}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
    )
    .map(|style| style.progress_chars("=>-"))
    .unwrap_or_else(|_| ProgressStyle::default_bar())
}

/// Spinner style for a single running function.
pub(crate) fn get_style_task() -> ProgressStyle {
    ProgressStyle::with_template("  {spinner:.blue} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

/// Sets up a global subscriber printing through the progress bars.
///
/// `RUST_LOG` takes precedence over `verbosity`: 0 shows warnings and the
/// summary of each run, 1 adds the resolution and skip decisions, 2 and above
/// shows everything.
#[cfg(feature = "logging")]
pub fn init_logging(verbosity: u8) -> anyhow::Result<()> {
    use tracing_indicatif::IndicatifLayer;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::{EnvFilter, fmt};

    let default = match verbosity {
        0 => "warn,keisan=info",
        1 => "info,keisan=debug",
        _ => "debug,keisan=trace",
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let indicatif_layer = IndicatifLayer::new();

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_writer(indicatif_layer.get_stderr_writer()),
        )
        .with(indicatif_layer)
        .try_init()?;

    Ok(())
}
