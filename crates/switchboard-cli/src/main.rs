//! Switchboard CLI - multi-provider AI request routing

mod simulator;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use switchboard_core::catalog::ProviderCatalog;
use switchboard_core::config::Config;
use switchboard_core::execution::ExecutionInterface;
use switchboard_core::routing::{ContentType, Priority, RoutingDecision, RoutingRequest};
use switchboard_core::tracker::{SimulatedMetricsSource, TrackerMode};
use switchboard_core::{Error, RoutingEngine};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::simulator::SimulatedExecutor;

#[derive(Parser)]
#[command(name = "switchboard")]
#[command(author, version, about = "Route AI requests across multiple providers", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Provider catalog file (TOML); overrides `catalog.path`
    #[arg(long, global = true)]
    catalog: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Show providers with their live metrics and health
    Providers,

    /// Compute a routing decision without calling any provider
    Route(RouteArgs),

    /// Execute simulated requests through the engine
    Simulate {
        /// Number of requests to run
        #[arg(short = 'n', long, default_value = "100")]
        requests: usize,

        /// Probability that any single provider call fails
        #[arg(long, default_value = "0.05")]
        failure_rate: f64,

        /// Make every call to this provider fail (repeatable)
        #[arg(long = "fail", value_name = "PROVIDER")]
        failing: Vec<String>,

        /// Refresh metrics from the simulated source every N requests (0 = never)
        #[arg(long, default_value = "0")]
        refresh_every: usize,

        /// Seed for reproducible runs
        #[arg(long)]
        seed: Option<u64>,

        #[command(flatten)]
        request: RouteArgs,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Args, Clone, Debug)]
struct RouteArgs {
    /// Task type (coding, creative, analytical, conversational, reasoning, ...)
    #[arg(short, long)]
    task: Option<String>,

    /// Content type (text, code, image, audio)
    #[arg(long, default_value = "text")]
    content: ContentType,

    /// Request priority (low, medium, high, critical)
    #[arg(short, long, default_value = "medium")]
    priority: Priority,

    /// Estimated input tokens
    #[arg(long = "input", default_value = "1000")]
    input_tokens: u32,

    /// Estimated output tokens
    #[arg(long = "output", default_value = "500")]
    output_tokens: u32,

    /// Maximum estimated cost in USD
    #[arg(long)]
    max_cost: Option<f64>,

    /// Maximum estimated latency in milliseconds
    #[arg(long)]
    max_latency_ms: Option<u64>,

    /// Minimum expected quality (0.0 to 1.0)
    #[arg(long)]
    min_quality: Option<f64>,

    /// Required capability (repeatable)
    #[arg(long = "require", value_name = "CAPABILITY")]
    required: Vec<String>,

    /// Preferred provider (repeatable)
    #[arg(long = "prefer", value_name = "PROVIDER")]
    preferred: Vec<String>,

    /// Provider to avoid (repeatable)
    #[arg(long = "avoid", value_name = "PROVIDER")]
    avoided: Vec<String>,
}

impl RouteArgs {
    fn to_request(&self) -> RoutingRequest {
        let mut request = RoutingRequest::new(self.input_tokens, self.output_tokens)
            .with_content_type(self.content)
            .with_priority(self.priority);
        if let Some(task) = &self.task {
            request = request.with_task_type(task.as_str());
        }
        if let Some(max_cost) = self.max_cost {
            request = request.with_max_cost(max_cost);
        }
        if let Some(max_latency_ms) = self.max_latency_ms {
            request = request.with_max_latency_ms(max_latency_ms);
        }
        if let Some(min_quality) = self.min_quality {
            request = request.with_min_quality(min_quality);
        }
        for capability in &self.required {
            request = request.require_capability(capability.as_str());
        }
        for provider in &self.preferred {
            request = request.prefer_provider(provider.as_str());
        }
        for provider in &self.avoided {
            request = request.avoid_provider(provider.as_str());
        }
        request
    }
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a configuration value
    Get {
        /// Configuration key (e.g., routing.max_fallbacks)
        key: String,
    },
    /// Set a configuration value
    Set {
        /// Configuration key
        key: String,
        /// Value to set
        value: String,
    },
    /// List all configuration values
    List,
    /// Reset configuration to defaults
    Reset,
    /// Show configuration file path
    Path,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("switchboard=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Providers => cmd_providers(cli.catalog, cli.format),
        Commands::Route(args) => cmd_route(cli.catalog, &args, cli.format),
        Commands::Simulate {
            requests,
            failure_rate,
            failing,
            refresh_every,
            seed,
            request,
        } => {
            let options = SimulateOptions {
                requests,
                failure_rate,
                failing,
                refresh_every,
                seed,
            };
            cmd_simulate(cli.catalog, &options, &request, cli.format, cli.quiet).await
        }
        Commands::Config { action } => cmd_config(action, cli.quiet),
    }
}

/// Load the catalog from the flag, then the config file, then built-ins
fn load_catalog(flag: Option<PathBuf>, config: &Config) -> anyhow::Result<ProviderCatalog> {
    let catalog = match flag.or_else(|| config.catalog.path.clone()) {
        Some(path) => ProviderCatalog::load(&path)?,
        None => ProviderCatalog::with_defaults(),
    };
    Ok(catalog)
}

/// Engine for one-shot commands: no background refresh
fn build_engine(
    catalog_flag: Option<PathBuf>,
    executor: Arc<dyn ExecutionInterface>,
    seed: Option<u64>,
) -> anyhow::Result<RoutingEngine> {
    let config = Config::load()?;
    let catalog = Arc::new(load_catalog(catalog_flag, &config)?);

    let mut builder = RoutingEngine::builder().catalog(catalog).executor(executor);
    if config.tracker.mode == TrackerMode::Simulated
        && let Some(seed) = seed
    {
        builder = builder.metrics_source(Arc::new(SimulatedMetricsSource::seeded(seed)));
    }
    Ok(builder.config(config).build()?)
}

fn report(err: Error) -> anyhow::Error {
    if let Some(suggestion) = err.suggestion() {
        eprintln!("Hint: {}", suggestion);
    }
    anyhow::anyhow!("[{}] {}", err.code(), err)
}

fn cmd_providers(catalog: Option<PathBuf>, format: OutputFormat) -> anyhow::Result<()> {
    let engine = build_engine(catalog, Arc::new(SimulatedExecutor::new(0.0, None)), None)?;
    let snapshots = engine.provider_metrics();

    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&snapshots)?);
        return Ok(());
    }

    if snapshots.is_empty() {
        println!("No providers registered.");
        return Ok(());
    }

    println!(
        "{:<12} {:<12} {:<9} {:>8} {:>10} {:>8} {:>9}  MODELS",
        "PROVIDER", "STATUS", "HEALTH", "SUCCESS", "LATENCY", "QUALITY", "LOAD"
    );
    for snapshot in &snapshots {
        let provider = &snapshot.provider;
        let perf = &provider.performance;
        let models: Vec<&str> = provider.models.iter().map(|m| m.id.as_str()).collect();
        println!(
            "{:<12} {:<12} {:<9} {:>7.1}% {:>8.0}ms {:>8.2} {:>4}/{:<4}  {}",
            provider.id,
            perf.status.to_string(),
            snapshot.health.to_string(),
            perf.success_rate,
            perf.average_latency_ms,
            perf.quality_score,
            perf.current_load,
            perf.max_concurrency,
            models.join(", ")
        );
    }
    Ok(())
}

fn cmd_route(catalog: Option<PathBuf>, args: &RouteArgs, format: OutputFormat) -> anyhow::Result<()> {
    let engine = build_engine(catalog, Arc::new(SimulatedExecutor::new(0.0, None)), None)?;
    let decision = engine.route(&args.to_request()).map_err(report)?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&decision)?),
        OutputFormat::Text => print_decision(&decision),
    }
    Ok(())
}

fn print_decision(decision: &RoutingDecision) {
    println!("Request:    {}", decision.request_id);
    println!(
        "Selected:   {}/{} (score {:.3})",
        decision.selected_provider, decision.selected_model, decision.score
    );
    println!("Est. cost:  ${:.6}", decision.estimated_cost);
    println!("Est. time:  {:.0}ms", decision.estimated_latency_ms);
    println!("Quality:    {:.2}", decision.expected_quality);
    println!("Eligible:   {}", decision.eligible_candidates);
    println!("Reasoning:  {}", decision.reasoning);

    if decision.fallback_chain.is_empty() {
        println!("Fallbacks:  none");
    } else {
        println!("Fallbacks:");
        for (i, entry) in decision.fallback_chain.iter().enumerate() {
            println!(
                "  {}. {}/{} (score {:.3}, ${:.6}, {:.0}ms)",
                i + 1,
                entry.provider_id,
                entry.model_id,
                entry.score,
                entry.estimated_cost,
                entry.estimated_latency_ms
            );
        }
    }
}

#[derive(Debug, Clone)]
struct SimulateOptions {
    requests: usize,
    failure_rate: f64,
    failing: Vec<String>,
    refresh_every: usize,
    seed: Option<u64>,
}

/// Aggregate outcome of a simulation run
#[derive(Debug, Default, serde::Serialize)]
struct SimulationSummary {
    requests: usize,
    succeeded: usize,
    used_fallback: usize,
    exhausted: usize,
    rejected: usize,
    total_cost: f64,
    served_by: BTreeMap<String, usize>,
}

async fn run_simulation(
    engine: &RoutingEngine,
    options: &SimulateOptions,
    request: &RouteArgs,
) -> anyhow::Result<SimulationSummary> {
    let mut summary = SimulationSummary {
        requests: options.requests,
        ..Default::default()
    };

    for i in 0..options.requests {
        if options.refresh_every > 0 && i > 0 && i % options.refresh_every == 0 {
            let refreshed = engine.tracker().refresh().await?;
            debug!(after = i, providers = refreshed, "Simulated metrics refreshed");
        }

        match engine.execute(&request.to_request(), CancellationToken::new()).await {
            Ok(result) => {
                summary.succeeded += 1;
                if result.used_fallback() {
                    summary.used_fallback += 1;
                }
                summary.total_cost += result.total_cost;
                *summary
                    .served_by
                    .entry(result.served_by.provider_id.clone())
                    .or_default() += 1;
            }
            Err(Error::AllCandidatesExhausted { .. }) => summary.exhausted += 1,
            Err(Error::NoEligibleProvider { .. }) => summary.rejected += 1,
            Err(e) => return Err(report(e)),
        }
    }
    Ok(summary)
}

async fn cmd_simulate(
    catalog: Option<PathBuf>,
    options: &SimulateOptions,
    request: &RouteArgs,
    format: OutputFormat,
    quiet: bool,
) -> anyhow::Result<()> {
    if !(0.0..=1.0).contains(&options.failure_rate) {
        anyhow::bail!("--failure-rate must be between 0.0 and 1.0");
    }

    let mut executor = SimulatedExecutor::new(options.failure_rate, options.seed);
    for provider in &options.failing {
        executor = executor.with_failing_provider(provider.as_str());
    }
    let engine = build_engine(catalog, Arc::new(executor), options.seed)?;
    info!(
        requests = options.requests,
        failure_rate = options.failure_rate,
        failing = ?options.failing,
        "Starting simulation"
    );

    let summary = run_simulation(&engine, options, request).await?;
    let health = engine.health_report();

    if format == OutputFormat::Json {
        let output = serde_json::json!({
            "summary": summary,
            "providers": health,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!(
        "Requests: {}  succeeded: {}  via fallback: {}  exhausted: {}  rejected: {}",
        summary.requests, summary.succeeded, summary.used_fallback, summary.exhausted, summary.rejected
    );
    println!("Total cost: ${:.6}", summary.total_cost);

    if !quiet {
        println!();
        println!("Served by:");
        for (provider, count) in &summary.served_by {
            println!("  {:<12} {}", provider, count);
        }
        println!();
        println!(
            "{:<12} {:<12} {:<9} {:>8} {:>10} {:>6} {:>6}",
            "PROVIDER", "STATUS", "HEALTH", "SUCCESS", "LATENCY", "CALLS", "FAILED"
        );
        for entry in &health {
            println!(
                "{:<12} {:<12} {:<9} {:>7.1}% {:>8.0}ms {:>6} {:>6}",
                entry.provider_id,
                entry.status.to_string(),
                entry.health.to_string(),
                entry.success_rate,
                entry.average_latency_ms,
                entry.total_requests,
                entry.failed_requests
            );
        }
    }
    Ok(())
}

fn cmd_config(action: ConfigAction, quiet: bool) -> anyhow::Result<()> {
    match action {
        ConfigAction::Get { key } => {
            let config = Config::load()?;
            println!("{}", config.get(&key)?);
        }
        ConfigAction::Set { key, value } => {
            let mut config = Config::load()?;
            config.set(&key, &value)?;
            config.save()?;
            if !quiet {
                println!("Set {} = {}", key, value);
            }
        }
        ConfigAction::List => {
            let config = Config::load()?;
            for (key, value) in config.list()? {
                println!("{} = {}", key, value);
            }
        }
        ConfigAction::Reset => {
            Config::reset()?;
            if !quiet {
                println!("Configuration reset to defaults.");
            }
        }
        ConfigAction::Path => {
            println!("{}", Config::config_path()?.display());
        }
    }
    Ok(())
}
