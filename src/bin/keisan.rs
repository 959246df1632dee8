use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::Parser;
use keisan::config::{Override, apply_overrides};
use keisan::{
    Calculation, ExecuteOptions, Mode, ModelError, Path, ResolveOptions, ValueStore, models,
};

/// Fits an engine map from measured data points.
///
/// Inputs are JSON documents holding the engine parameters under `engine` and
/// the measured vectors under `data`, e.g. `{"engine": {"capacity": 1998},
/// "data": {"rpm": [...], "t": [...], "fc": [...]}}`.
#[derive(Parser, Debug, Clone)]
#[command(name = "keisan", version, about)]
struct Args {
    /// Input JSON document, merged in the order given; `-` reads stdin.
    #[arg(short, long, value_name = "FILE")]
    ifile: Vec<Utf8PathBuf>,

    /// Where to write the results, stdout by default.
    #[arg(short, long, value_name = "FILE")]
    ofile: Option<Utf8PathBuf>,

    /// Override a model value; relative paths are resolved against `/engine/`.
    #[arg(short = 'm', value_name = "MODEL_PATH=VALUE", value_parser = Override::parse)]
    overrides: Vec<Override>,

    /// Path to calculate, the engine map by default.
    #[arg(short, long, value_name = "PATH")]
    want: Vec<String>,

    /// Recalculate values even if they were given.
    #[arg(long)]
    force: bool,

    /// Stop at the first failing function.
    #[arg(long)]
    abort_on_failure: bool,

    /// Run independent functions concurrently.
    #[arg(long)]
    parallel: bool,

    /// Prefer the outlier tolerant fit.
    #[arg(long)]
    robust: bool,

    /// Print the outcome of every function as a Mermaid diagram to stderr.
    #[arg(long)]
    graph: bool,

    /// Log everything and print full error details.
    #[arg(long)]
    debug: bool,

    /// Raise the log level, can be repeated.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> ExitCode {
    let args = Args::parse();

    let verbosity = if args.debug { u8::MAX } else { args.verbose };
    if let Err(err) = keisan::utils::init_logging(verbosity) {
        eprintln!("keisan: couldn't set up logging: {err}");
    }

    match run(&args) {
        Ok(code) => code,
        Err(err) if err.downcast_ref::<ModelError>().is_some() => {
            eprintln!("keisan: Model validation failed due to: {err}\n        for help use --help");
            ExitCode::from(4)
        }
        Err(err) => {
            if args.debug {
                eprintln!("keisan: {err:?}");
            } else {
                eprintln!("keisan: {err:#}\n        for help use --help");
            }
            ExitCode::from(3)
        }
    }
}

fn run(args: &Args) -> anyhow::Result<ExitCode> {
    let graph = models::standard_registry()?;

    let mut store = models::base_model();
    for file in &args.ifile {
        store.merge(keisan::io::read_values(file)?);
    }
    apply_overrides(&mut store, args.overrides.iter().cloned());
    models::validate(&store)?;

    let desired: Vec<Path> = if args.want.is_empty() {
        models::ENGINE_MAP.iter().map(Path::new).collect()
    } else {
        args.want.iter().map(Path::new).collect()
    };

    let mut resolve = ResolveOptions::default().force_recompute(args.force);
    if args.robust {
        resolve = resolve.prefer_mode(Mode::Robust);
    }

    let execute = ExecuteOptions::default()
        .force_recompute(args.force)
        .abort_on_first_failure(args.abort_on_failure)
        .parallel(args.parallel);

    let mut calc = Calculation::new(&graph, store, desired.iter().cloned());

    let plan = calc.resolve(&resolve)?;
    tracing::info!("plan: {}", plan.names(&graph).join(" -> "));

    let report = calc.execute(&execute)?;
    if args.graph {
        eprintln!("{}", report.render_mermaid(&graph));
    }
    for failure in &report.failed {
        tracing::error!("{}", failure.error);
    }
    let partial = report.partial_failure();

    let store = calc.into_store();
    let results: ValueStore = desired
        .iter()
        .filter_map(|path| store.get(path).map(|value| (path.clone(), value.clone())))
        .collect();

    keisan::io::write_values(args.ofile.as_deref(), &results)?;

    match partial {
        Some(partial) => {
            tracing::warn!("{partial}");
            Ok(ExitCode::from(1))
        }
        None => Ok(ExitCode::SUCCESS),
    }
}
