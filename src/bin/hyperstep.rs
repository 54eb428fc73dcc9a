//! hyperstep CLI - run plain-text API scenarios against a server.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use hyperstep::{load_scenarios, run_scenario, AppConfig, ScenarioReport, SessionConfig, TestSession};
use std::path::PathBuf;
use std::process::exit;
use std::time::Instant;
use tracing::{debug, error, info};
use tracing_subscriber::{fmt, EnvFilter};

/// Run Given/When/Then scenario files against a REST API.
#[derive(Parser, Debug)]
#[command(name = "hyperstep", version, about)]
struct Cli {
    /// Scenario files to run, in order.
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Base URL of the API under test.
    #[arg(short = 'b', long = "base-url", env = "HYPERSTEP_BASE_URL")]
    base_url: Option<String>,

    /// YAML file with the app config (public_key, jwt_algorithm).
    #[arg(short = 'c', long = "app-config")]
    app_config: Option<PathBuf>,

    /// Enable verbose logging.
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,
}

/// `RUST_LOG` wins; otherwise `-v` picks debug over info for this crate.
fn init_tracing(verbose: bool) {
    let fallback = if verbose { "hyperstep=debug" } else { "hyperstep=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

fn print_report(report: &ScenarioReport) {
    let verdict = if report.success { "ok" } else { "FAILED" };
    info!("scenario {:?} ... {} in {} ms", report.name, verdict, report.duration_ms);

    let Some(failed) = report.steps.iter().position(|step| !step.success) else {
        debug!("{} step(s) passed", report.steps.len());
        return;
    };
    for step in &report.steps[..failed] {
        debug!("  passed: {}", step.name);
    }
    let step = &report.steps[failed];
    error!("  failed at step {}: {}", failed + 1, step.name);
    if let Some(message) = &step.error {
        for line in message.lines() {
            error!("    {}", line);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.verbose);

    let mut config = SessionConfig::from_env();
    if let Some(base_url) = args.base_url {
        config = config.with_base_url(base_url);
    }
    let app_config = match &args.app_config {
        Some(path) => AppConfig::load(path)
            .context(format!("Failed to load app config: {}", path.display()))?,
        None => AppConfig::new(),
    };
    debug!("Session config: {:?}", config);

    let mut scenarios = Vec::new();
    for file in &args.files {
        scenarios.extend(load_scenarios(file)?);
    }
    if scenarios.is_empty() {
        return Err(anyhow!("No scenarios found"));
    }

    let mut session = TestSession::new(config, app_config);
    let total_start = Instant::now();
    let (mut passed, mut failed) = (0, 0);

    info!("Running {} scenario(s)...", scenarios.len());
    for scenario in &scenarios {
        let report = run_scenario(&mut session, scenario).await;
        print_report(&report);
        if report.success {
            passed += 1;
        } else {
            failed += 1;
        }
    }

    info!(
        "{} passed, {} failed, {} total ({} ms)",
        passed,
        failed,
        passed + failed,
        total_start.elapsed().as_millis()
    );

    if failed > 0 {
        exit(1);
    }
    Ok(())
}
