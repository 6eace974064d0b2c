//! CLI argument parsing and command handling

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sonic_bench_cluster::KubeCluster;
use sonic_bench_core::{
    BenchConfig, ExperimentPlan, ExperimentSequencer, JobDispatcher, OrchestrationContext,
    RunSummary,
};
use sonic_bench_samplers::PrometheusClient;
use sonic_bench_storage::RunDirectory;

/// sonic-bench - load-testing orchestrator for autoscaled inference servers
#[derive(Parser, Debug)]
#[command(name = "sonic-bench")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to the YAML configuration file (defaults apply when omitted)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Kubernetes namespace of the inference server
    #[arg(long, global = true, env = "SONIC_NAMESPACE")]
    pub namespace: Option<String>,

    /// Prometheus base URL
    #[arg(long, global = true, env = "PROMETHEUS_URL")]
    pub prometheus_url: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run every sequence of a sequence file
    Run {
        /// Path to the sequence file
        #[arg(short, long)]
        sequence: PathBuf,

        /// Directory that receives the run directory
        #[arg(short, long, default_value = "results")]
        output_dir: PathBuf,
    },
    /// Validate configuration and a sequence file without touching the cluster
    Validate {
        /// Path to the sequence file
        #[arg(short, long)]
        sequence: PathBuf,
    },
    /// Delete leftover load-generator batches
    Cleanup,
}

impl Cli {
    /// Dispatch the selected command
    pub async fn run(&self) -> Result<()> {
        match &self.command {
            Commands::Run {
                sequence,
                output_dir,
            } => self.run_sequences(sequence, output_dir).await,
            Commands::Validate { sequence } => self.validate(sequence),
            Commands::Cleanup => self.cleanup().await,
        }
    }

    fn load_config(&self) -> Result<BenchConfig> {
        let mut config = BenchConfig::load(self.config.as_deref()).with_context(|| {
            match &self.config {
                Some(path) => format!("Failed to load configuration from: {}", path.display()),
                None => "Failed to build default configuration".to_string(),
            }
        })?;
        if let Some(ns) = &self.namespace {
            config = config.with_namespace(ns.clone());
        }
        if let Some(url) = &self.prometheus_url {
            config = config.with_prometheus_url(url.clone());
        }
        config.validate().context("Invalid configuration")?;
        Ok(config)
    }

    fn load_plan(path: &Path) -> Result<ExperimentPlan> {
        ExperimentPlan::from_file(path)
            .with_context(|| format!("Failed to load sequence file: {}", path.display()))
    }

    async fn connect(config: BenchConfig) -> Result<Arc<OrchestrationContext>> {
        let cluster = KubeCluster::connect(&config.cluster.namespace, &config.cluster.scaled_object)
            .await
            .context("Failed to connect to the Kubernetes API")?;
        let prometheus = PrometheusClient::new(
            config.telemetry.prometheus_url.clone(),
            config.telemetry.request_timeout,
        )
        .context("Failed to create Prometheus client")?;

        let ctx = OrchestrationContext::builder()
            .config(config)
            .cluster(Arc::new(cluster))
            .monitoring(Arc::new(prometheus))
            .build()?;
        Ok(Arc::new(ctx))
    }

    async fn run_sequences(&self, sequence: &Path, output_dir: &Path) -> Result<()> {
        let config = self.load_config()?;
        let plan = Self::load_plan(sequence)?;

        print_banner(&config, &plan);

        let ctx = Self::connect(config).await?;
        let mut run_dir = RunDirectory::create(output_dir).with_context(|| {
            format!("Failed to create run directory under: {}", output_dir.display())
        })?;
        run_dir.write_plan(&plan)?;

        let sequencer = ExperimentSequencer::new(ctx);
        let summary = sequencer
            .run_with_signal_handling(&plan, &mut run_dir)
            .await
            .with_context(|| {
                format!(
                    "Experiment run failed; partial results are in {}",
                    run_dir.root().display()
                )
            })?;

        print_summary(&summary, run_dir.root());
        Ok(())
    }

    fn validate(&self, sequence: &Path) -> Result<()> {
        let config = self.load_config()?;
        let plan = Self::load_plan(sequence)?;

        println!("Configuration OK (namespace: {})", config.cluster.namespace);
        println!("Sequence file OK: {} steps\n", plan.total_steps());

        for seq in &plan.sequences {
            println!("[{}] repetitions: {}", seq.label, seq.repetitions.unwrap_or(1));
            println!(
                "  {:>4}  {:<8} {:>8} {:>8} {:>9} {:>8} {:>4}",
                "#", "mode", "clients", "workers", "requests", "restart", "rep"
            );
            for (idx, step) in seq.expand().iter().enumerate() {
                println!(
                    "  {:>4}  {:<8} {:>8} {:>8} {:>9} {:>8} {:>4}",
                    idx,
                    step.mode.as_str(),
                    step.client_count,
                    step.worker_count,
                    step.request_count,
                    step.restart_workers,
                    step.repetition_index
                );
            }
            println!();
        }
        Ok(())
    }

    async fn cleanup(&self) -> Result<()> {
        let config = self.load_config()?;
        let ctx = Self::connect(config).await?;

        let report = JobDispatcher::new(&ctx)
            .cleanup_stale()
            .await
            .context("Failed to clean up stale batches")?;

        println!(
            "Deleted {} stale batches and {} stray tasks in namespace {}",
            report.batches,
            report.pods,
            ctx.config().cluster.namespace
        );
        Ok(())
    }
}

fn print_banner(config: &BenchConfig, plan: &ExperimentPlan) {
    println!("\n{}", "=".repeat(70));
    println!("   sonic-bench - Autoscaled Inference Load Testing");
    println!("{}", "=".repeat(70));
    println!();
    println!("Configuration:");
    println!("  Namespace:    {}", config.cluster.namespace);
    println!("  Deployment:   {}", config.cluster.deployment);
    println!("  Prometheus:   {}", config.telemetry.prometheus_url);
    println!("  Model:        {}", config.load_generator.model);
    println!("  Sequences:    {}", plan.sequences.len());
    println!("  Steps:        {}", plan.total_steps());
    println!("{}", "=".repeat(70));
    println!();
}

fn print_summary(summary: &RunSummary, root: &Path) {
    println!("\n{}", "=".repeat(70));
    println!("   Results Summary");
    println!("{}", "=".repeat(70));
    if let Some(cleanup) = summary.stale_cleanup {
        println!("  Stale batches removed:  {}", cleanup.batches);
    }
    for seq in &summary.sequences {
        println!();
        println!("  [{}]", seq.label);
        println!("    Steps:            {}", seq.steps.len());
        println!("    Result rows:      {}", seq.total_rows());
        println!("    Failed batches:   {}", seq.failed_batches());
        println!("    Degraded steps:   {}", seq.degraded_steps());
        println!("    Duration:         {:.1}s", seq.elapsed.as_secs_f64());
    }
    println!();
    println!("  Total steps:  {}", summary.total_steps());
    println!("  Total rows:   {}", summary.total_rows());
    println!("  Duration:     {:.1}s", summary.elapsed.as_secs_f64());
    println!("  Output:       {}", root.display());
    println!("{}", "=".repeat(70));
}
