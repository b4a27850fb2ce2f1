//! CLI entry point (§4.14, §6): `clap`-derived subcommands wrapping the
//! dispatch engine for standalone operation — `api`, `test`, `load`,
//! `status`, `cleanup`, `demo`. Ported from `original_source/src/main.py`'s
//! `click` command group; exit code 0 on success, 1 on uncaught error (§6).

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use dispatch_engine::config::DispatchConfig;
use dispatch_engine::load_generator::{ArrivalReport, LoadGenerator};
use dispatch_engine::{DispatchEngine, DispatchError};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "dispatch-engine", about = "Call-to-agent dispatch engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the HTTP front-end.
    Api {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
    /// Drive one of three built-in test scenarios.
    Test {
        #[arg(long, conflicts_with = "stress")]
        quick: bool,
        #[arg(long, value_name = "MINUTES")]
        stress: Option<u64>,
        #[arg(long)]
        calls: Option<usize>,
        #[arg(long)]
        agents: Option<usize>,
    },
    /// Realistic sustained load pattern.
    Load {
        #[arg(long, default_value_t = 60)]
        duration: u64,
        #[arg(long = "calls-per-minute", default_value_t = 100)]
        calls_per_minute: u64,
        #[arg(long, default_value_t = 20)]
        agents: usize,
    },
    /// Print current system status.
    Status,
    /// Clear in-memory state and durable-tier test rows.
    Cleanup,
    /// Seed a small population and run one assignment round end-to-end.
    Demo,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "application error");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = DispatchConfig::default();

    match cli.command {
        Command::Api { host, port } => run_api(config, host, port).await,
        Command::Test { quick, stress, calls, agents } => run_test(config, quick, stress, calls, agents).await,
        Command::Load { duration, calls_per_minute, agents } => run_load(config, duration, calls_per_minute, agents).await,
        Command::Status => run_status(config).await,
        Command::Cleanup => run_cleanup(config).await,
        Command::Demo => run_demo(config).await,
    }
}

async fn build_engine(config: DispatchConfig) -> anyhow::Result<Arc<DispatchEngine>> {
    DispatchEngine::new(config).await.map_err(|e: DispatchError| e.into())
}

async fn run_api(mut config: DispatchConfig, host: Option<String>, port: Option<u16>) -> anyhow::Result<()> {
    if let Some(host) = host {
        config.general.api_host = host;
    }
    if let Some(port) = port {
        config.general.api_port = port;
    }
    let addr = config.general.bind_addr()?;
    let engine = build_engine(config).await?;

    info!(%addr, "starting call assignment API");
    let app = dispatch_engine::api::router(engine);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn run_test(
    config: DispatchConfig,
    quick: bool,
    stress: Option<u64>,
    calls: Option<usize>,
    agents: Option<usize>,
) -> anyhow::Result<()> {
    let engine = build_engine(config.clone()).await?;
    let generator = LoadGenerator::new(engine.clone());

    if let Some(minutes) = stress {
        println!("Running {minutes}-minute performance stress test...");
        generator.make_agents(30).await?;
        let report = run_realistic_load(&generator, minutes * 60, 200).await;
        print_load_report("stress", &report, &config);
    } else if quick {
        println!("Running quick validation test...");
        run_full_suite(&generator, &config, 5, 20).await?;
    } else {
        let num_calls = calls.unwrap_or(config.test_num_calls);
        let num_agents = agents.unwrap_or(config.test_num_agents);
        println!("Running full test suite: {num_calls} calls, {num_agents} agents...");
        run_full_suite(&generator, &config, num_agents, num_calls).await?;
    }

    generator.stop();
    Ok(())
}

async fn run_full_suite(
    generator: &LoadGenerator,
    config: &DispatchConfig,
    num_agents: usize,
    num_calls: usize,
) -> anyhow::Result<()> {
    let agents = generator.make_agents(num_agents).await?;
    let calls = generator.make_calls(num_calls);

    let arrival_rate = (num_calls as f64 / 60.0).clamp(2.0, 5.0);
    println!("Simulating {num_calls} calls at {arrival_rate:.1} calls/sec across {num_agents} agents...");

    let churn = tokio::spawn({
        let generator = LoadGenerator::new(generator.engine());
        let agents = agents.clone();
        async move { generator.churn_agents(agents, 0.5).await }
    });

    let report = generator.drive_arrivals(calls, arrival_rate, 10).await;
    generator.drain(Duration::from_secs(600)).await;
    generator.stop();
    let _ = churn.await;

    print_load_report("full", &report, config);
    Ok(())
}

async fn run_realistic_load(generator: &LoadGenerator, duration_seconds: u64, calls_per_minute: u64) -> ArrivalReport {
    let calls_per_second = calls_per_minute as f64 / 60.0;
    let total_calls = (duration_seconds as f64 * calls_per_second) as usize;
    let calls = generator.make_calls(total_calls.max(1));
    generator.drive_arrivals(calls, calls_per_second, 50).await
}

fn print_load_report(label: &str, report: &ArrivalReport, config: &DispatchConfig) {
    let metrics = report.performance_metrics(config.assignment.max_assignment_time_ms as f64);
    println!("\n{label} test results:");
    println!("  Calls generated:        {}", report.total_calls);
    println!("  Successful assignments: {}", report.successful_assignments);
    println!("  Failed assignments:     {}", report.failed_assignments);
    println!("  Saturated calls:        {}", report.saturated_calls);
    println!("  Wall duration:          {:.2}s", report.wall_duration_seconds);
    if !report.assignment_times_ms.is_empty() {
        println!("  Avg assignment time:    {:.2}ms", metrics.avg_assignment_time_ms);
        println!("  p95 assignment time:    {:.2}ms", metrics.p95_assignment_time_ms);
        println!("  Success rate:           {:.1}%", metrics.success_rate * 100.0);
        println!("  Performance compliance: {:.1}%", metrics.performance_compliance * 100.0);
    }
}

async fn run_load(config: DispatchConfig, duration: u64, calls_per_minute: u64, agents: usize) -> anyhow::Result<()> {
    println!("Running load test: {calls_per_minute} calls/min for {duration} seconds across {agents} agents");
    let engine = build_engine(config.clone()).await?;
    let generator = LoadGenerator::new(engine);
    generator.make_agents(agents).await?;

    let report = run_realistic_load(&generator, duration, calls_per_minute).await;
    print_load_report("load", &report, &config);
    Ok(())
}

async fn run_status(config: DispatchConfig) -> anyhow::Result<()> {
    let engine = build_engine(config).await?;
    let status = engine.system_status().await;
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

async fn run_cleanup(config: DispatchConfig) -> anyhow::Result<()> {
    let engine = build_engine(config).await?;
    engine.cleanup().await?;
    println!("test data cleanup completed");
    Ok(())
}

async fn run_demo(config: DispatchConfig) -> anyhow::Result<()> {
    let engine = build_engine(config.clone()).await?;
    let generator = LoadGenerator::new(engine.clone());

    println!("Starting call assignment system demo");
    println!("{}", "=".repeat(50));

    println!("Creating demo agents...");
    let agents = generator.make_agents(4).await?;
    for agent in &agents {
        println!("  created {} ({})", agent.name, agent.agent_type);
    }

    println!("\nSimulating calls...");
    for call_type in config.call_types.iter().take(2) {
        let call = dispatch_engine::types::Call::new("+15550000", call_type.clone());
        println!("  assigning call {} ({})...", call.phone_number, call.call_type);
        let result = engine.assign_call(call).await;
        if result.success {
            let agent_name = result.agent.map(|a| a.name).unwrap_or_default();
            println!("    assigned in {:.2}ms to {}", result.assignment_time_ms, agent_name);
        } else {
            println!("    assignment failed: {}", result.message);
        }
    }

    tokio::time::sleep(Duration::from_secs(2)).await;

    let status = engine.system_status().await;
    println!("\nCurrent system status:");
    println!("{}", serde_json::to_string_pretty(&status)?);
    println!("\nDemo complete.");
    Ok(())
}
