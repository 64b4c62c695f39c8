use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mdao_core::cancel::CancellationToken;
use mdao_core::model::SolveSettings;
use mdao_core::request::{
    solve_multi_discipline, solve_problem, DriverInput, MultiDisciplineRequest, ProblemRequest,
    SolveOutcome,
};
use serde::de::DeserializeOwned;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(name = "mdao")]
#[command(version)]
#[command(about = "Assemble and solve multidisciplinary design optimization problems")]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// JSON file with solver settings, overriding the request's own
    #[arg(short, long, global = true)]
    settings: Option<PathBuf>,

    /// Print warnings and the optimizer report alongside the results
    #[arg(long, global = true)]
    full: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Solve a multi-discipline request as written
    Evaluate {
        /// Request document (JSON)
        file: PathBuf,
    },
    /// Solve a multi-discipline request in optimize mode
    Optimize {
        /// Request document (JSON)
        file: PathBuf,
        /// Optimizer to use when the request names none
        #[arg(long, default_value = "SLSQP")]
        optimizer: String,
    },
    /// Solve a single-component connected request
    Problem {
        /// Request document (JSON)
        file: PathBuf,
    },
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("failed to parse {}", path.display()))
}

fn run(args: &Args) -> Result<SolveOutcome> {
    let settings: Option<SolveSettings> = args.settings.as_deref().map(read_json).transpose()?;
    let cancel = CancellationToken::new();

    let outcome = match &args.command {
        Commands::Evaluate { file } => {
            let mut request: MultiDisciplineRequest = read_json(file)?;
            if let Some(settings) = settings {
                request.settings = settings;
            }
            solve_multi_discipline(&request, &cancel)
        }
        Commands::Optimize { file, optimizer } => {
            let mut request: MultiDisciplineRequest = read_json(file)?;
            if let Some(settings) = settings {
                request.settings = settings;
            }
            let driver = request.driver.get_or_insert_with(|| DriverInput {
                id: None,
                optimizer: optimizer.clone(),
                optimize: true,
            });
            driver.optimize = true;
            solve_multi_discipline(&request, &cancel)
        }
        Commands::Problem { file } => {
            let mut request: ProblemRequest = read_json(file)?;
            if let Some(settings) = settings {
                request.settings = settings;
            }
            solve_problem(&request, &cancel)
        }
    };
    outcome.context("solve failed")
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    log::debug!("{:?}", args);

    let outcome = run(&args)?;
    for warning in &outcome.warnings {
        log::warn!("{warning}");
    }
    let json = if args.full {
        serde_json::to_string_pretty(&outcome)?
    } else {
        serde_json::to_string_pretty(&outcome.results)?
    };
    println!("{json}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn parses_subcommands_and_global_flags() {
        let args = Args::try_parse_from(["mdao", "optimize", "req.json", "--settings", "s.json"])
            .unwrap();
        assert_eq!(args.settings, Some(PathBuf::from("s.json")));
        match args.command {
            Commands::Optimize { file, optimizer } => {
                assert_eq!(file, PathBuf::from("req.json"));
                assert_eq!(optimizer, "SLSQP");
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn missing_files_carry_context() {
        let err = read_json::<SolveSettings>(Path::new("/nonexistent/settings.json")).unwrap_err();
        assert!(err.to_string().contains("failed to read"), "{err}");
    }
}
