use std::io;
use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};

use bmm_bench::config::{Backend, BenchConfig};
use bmm_bench::driver::Driver;
use bmm_bench::executor::build_executor;
use bmm_bench::logging::init_logging;
use bmm_bench::report::{summarize, write_summary, Reporter};

/// Batched matmul dispatch benchmark
#[derive(Parser, Debug)]
#[command(name = "bmm-bench")]
#[command(about = "Benchmark batched matrix multiplication across CPU and accelerator strategies")]
#[command(version)]
struct Cli {
    /// Configuration file path (defaults are used when omitted)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the benchmark grid and print results
    Run {
        /// Override the execution backend
        #[arg(long, value_enum)]
        backend: Option<Backend>,

        /// Override the workload seed
        #[arg(long)]
        seed: Option<u64>,

        /// Override the number of repetitions per cell
        #[arg(long)]
        repetitions: Option<usize>,

        /// Override the repeat count of every job
        #[arg(long)]
        repeats: Option<usize>,
    },
    /// Execute one job folder and record its outcome there
    Worker {
        /// Job folder written by the submitting process
        dir: PathBuf,
    },
    /// Write the default configuration and exit
    InitConfig {
        /// Destination path
        #[arg(default_value = "bmm-bench.toml")]
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            backend,
            seed,
            repetitions,
            repeats,
        } => {
            let mut config = match &cli.config {
                Some(path) => BenchConfig::load(path)
                    .with_context(|| format!("loading {}", path.display()))?,
                None => BenchConfig::default(),
            };
            if let Some(backend) = backend {
                config.executor.backend = backend;
            }
            if seed.is_some() {
                config.grid.seed = seed;
            }
            if let Some(repetitions) = repetitions {
                config.grid.repetitions = repetitions;
            }
            if let Some(repeats) = repeats {
                config.grid.repeats = repeats;
                config.grid.multi_accelerator_repeats = repeats;
            }
            if let Some(level) = &cli.log_level {
                config.logging.level = level.clone();
            }
            config.validate()?;
            init_logging(&config.logging.level)?;
            run(&config)
        }
        Command::Worker { dir } => {
            init_logging(cli.log_level.as_deref().unwrap_or("info"))?;
            bmm_dispatch::cluster::run_job_dir(&dir)
                .with_context(|| format!("worker failed for {}", dir.display()))?;
            Ok(())
        }
        Command::InitConfig { path, force } => {
            if path.exists() && !force {
                bail!("{} already exists (use --force to overwrite)", path.display());
            }
            BenchConfig::default().save(&path)?;
            println!("Generated default configuration at: {}", path.display());
            println!("\nEdit it and then run the benchmark with:");
            println!("  bmm-bench --config {} run", path.display());
            Ok(())
        }
    }
}

fn run(config: &BenchConfig) -> anyhow::Result<()> {
    let executor = build_executor(&config.executor)?;
    let mut driver = Driver::from_config(executor.as_ref(), config);
    let mut reporter = Reporter::new(io::stdout().lock());

    let results = driver.run(|result| Ok(reporter.result(result)?))?;

    let mut stdout = reporter.into_inner();
    write_summary(&mut stdout, &summarize(results))?;
    Ok(())
}
