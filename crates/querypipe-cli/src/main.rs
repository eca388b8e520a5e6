//! querypipe CLI: run, validate and explain YAML pipelines.

use clap::{Parser, Subcommand};
use querypipe_core::config::EngineConfig;
use querypipe_exec::{memory_endpoints, resolve_config, JsonlSink, PipelineExecutor, RunSummary, Sink};
use querypipe_planner::{explain, parse_yaml_pipeline, validate_parsed, ParsedPipeline};
use querypipe_stream::ExecContext;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "querypipe")]
#[command(about = "querypipe: streaming joins over SQL sources with bounded memory", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a pipeline from a YAML file, writing rows as JSON lines
    Run {
        /// Path to the pipeline YAML file
        #[arg(short, long)]
        pipeline: PathBuf,

        /// Rows per cursor read (overrides config)
        #[arg(long)]
        fetch_size: Option<usize>,

        /// Fail joins whose key columns have no common type
        #[arg(long)]
        strict_keys: bool,

        /// Output file (defaults to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Give up after this many seconds
        #[arg(long, default_value = "300")]
        timeout_secs: u64,
    },

    /// Validate a pipeline YAML file
    Validate {
        /// Path to the pipeline YAML file
        #[arg(short, long)]
        pipeline: PathBuf,
    },

    /// Show the pipeline tree with join keys and watermarks
    Explain {
        /// Path to the pipeline YAML file
        #[arg(short, long)]
        pipeline: PathBuf,
    },
}

fn main() {
    init_logging();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            pipeline,
            fetch_size,
            strict_keys,
            output,
            timeout_secs,
        } => {
            let overrides = RunOverrides {
                fetch_size,
                strict_keys,
            };
            if let Err(e) = run_pipeline(&pipeline, &overrides, output, timeout_secs) {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
        Commands::Validate { pipeline } => {
            if let Err(e) = validate_pipeline(&pipeline) {
                eprintln!("Validation failed: {}", e);
                std::process::exit(1);
            }
            println!("✓ Pipeline is valid");
        }
        Commands::Explain { pipeline } => {
            if let Err(e) = explain_pipeline(&pipeline) {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
    }
}

/// Log to stderr so stdout stays clean for row output. `RUST_LOG` overrides the default.
fn init_logging() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Command-line settings that win over the pipeline's config block and the environment.
#[derive(Debug, Default)]
struct RunOverrides {
    fetch_size: Option<usize>,
    strict_keys: bool,
}

fn apply_overrides(cfg: &mut EngineConfig, overrides: &RunOverrides) {
    if let Some(n) = overrides.fetch_size {
        cfg.fetch_size = n;
    }
    if overrides.strict_keys {
        cfg.strict_key_comparison = true;
    }
}

fn load(pipeline_path: &PathBuf) -> Result<ParsedPipeline, Box<dyn std::error::Error>> {
    let yaml_content = fs::read_to_string(pipeline_path)?;
    let parsed = parse_yaml_pipeline(&yaml_content)?;
    validate_parsed(&parsed)?;
    Ok(parsed)
}

fn run_pipeline(
    pipeline_path: &PathBuf,
    overrides: &RunOverrides,
    output: Option<PathBuf>,
    timeout_secs: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    let parsed = load(pipeline_path)?;

    let mut config = resolve_config(&parsed.pipeline);
    apply_overrides(&mut config, overrides);
    config.validate()?;

    let endpoints = memory_endpoints(&parsed.endpoints)?;
    let batch = config.output_batch_size;
    let executor = PipelineExecutor::new(ExecContext::new(), config, endpoints);
    let timeout = Duration::from_secs(timeout_secs);

    let summary = match output {
        Some(path) => {
            let path = path.to_string_lossy().into_owned();
            let sink = Arc::new(JsonlSink::to_path(&path, batch)?);
            execute(&executor, &parsed, sink, timeout)?
        }
        None => {
            let sink = Arc::new(JsonlSink::new(std::io::stdout(), batch));
            execute(&executor, &parsed, sink, timeout)?
        }
    };

    eprintln!("✓ Pipeline executed successfully");
    eprintln!("  Rows: {}", summary.rows);
    eprintln!("  Duration: {}ms", summary.elapsed_ms);
    Ok(())
}

fn execute<W: Write + Send + 'static>(
    executor: &PipelineExecutor,
    parsed: &ParsedPipeline,
    sink: Arc<JsonlSink<W>>,
    timeout: Duration,
) -> Result<RunSummary, Box<dyn std::error::Error>> {
    let as_sink: Arc<dyn Sink> = sink.clone();
    let summary = executor.run_blocking(&parsed.pipeline, as_sink, timeout)?;
    let mut writer = sink.take_writer()?;
    writer.flush()?;
    Ok(summary)
}

fn validate_pipeline(pipeline_path: &PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let parsed = load(pipeline_path)?;
    resolve_config(&parsed.pipeline).validate()?;
    memory_endpoints(&parsed.endpoints)?;
    Ok(())
}

fn explain_pipeline(pipeline_path: &PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let parsed = load(pipeline_path)?;
    let config = resolve_config(&parsed.pipeline);
    print!("{}", explain(&parsed.pipeline.body, &config));
    Ok(())
}
