// Reports the divisions in a lir program that may divide by zero.

use std::io::Read;
use std::path::PathBuf;

use clap::Parser;
use log::info;

use divzero::middle_end::analysis::div_zero::{analyze, analyze_program, Report};
use divzero::middle_end::analysis::points_to::{AliasOracle, PointsTo};
use divzero::middle_end::lir::{func_id, Program};
use divzero::Config;

#[derive(Debug, Parser)]
#[command(author, version)]
struct Cli {
    /// The lir program to analyze; reads stdin when absent.
    #[arg(value_name = "FILE")]
    input: Option<PathBuf>,

    /// JSON configuration file.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Track values through memory using points-to information.
    #[arg(long)]
    pointers: bool,

    /// Only analyze this function.
    #[arg(long, value_name = "NAME")]
    function: Option<String>,

    /// Print the reports as JSON.
    #[arg(long)]
    json: bool,

    /// Give up on a function after this many iterations.
    #[arg(long, value_name = "INT")]
    max_iterations: Option<usize>,

    /// More log output (repeat for more).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    let args = Cli::parse();

    let level = match args.verbose {
        0 => simplelog::LevelFilter::Warn,
        1 => simplelog::LevelFilter::Info,
        2 => simplelog::LevelFilter::Debug,
        _ => simplelog::LevelFilter::Trace,
    };
    simplelog::TermLogger::init(
        level,
        simplelog::Config::default(),
        simplelog::TerminalMode::Stderr,
        simplelog::ColorChoice::Auto,
    )?;

    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    config.pointer_analysis |= args.pointers;
    if args.max_iterations.is_some() {
        config.max_iterations = args.max_iterations;
    }
    info!("config = {config:?}");

    let code = match &args.input {
        Some(path) => std::fs::read_to_string(path)?,
        None => {
            let mut code = String::new();
            std::io::stdin().read_to_string(&mut code)?;
            code
        }
    };
    let program = code.parse::<Program>()?.validate()?;

    let reports: Vec<Report> = match &args.function {
        Some(name) => {
            let id = func_id(name);
            let points_to = match program.inner().functions.get(&id) {
                Some(f) if config.pointer_analysis => Some(PointsTo::new(f)),
                _ => None,
            };
            let oracle = points_to.as_ref().map(|pts| pts as &dyn AliasOracle);
            vec![analyze(&program, &id, &config, oracle)?]
        }
        None => analyze_program(&program, &config)?,
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        for report in &reports {
            print!("{report}");
        }
    }

    if reports.iter().any(|report| !report.findings.is_empty()) {
        std::process::exit(1);
    }
    Ok(())
}
