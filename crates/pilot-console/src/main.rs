mod commands;
mod config;
mod logging;
mod surfaces;

use anyhow::Context;
use clap::{Parser, Subcommand};
use commands::{parse_command_line, ConsoleCommand, HELP};
use config::{env_true, resolve_config, ConfigOverrides};
use logging::{init_logging, LogSettings};
use pilot_core::StrategyId;
use pilot_orchestrator::{ControlApi, HttpControl, Orchestrator, OrchestratorHandle, PilotConfig};
use std::path::PathBuf;
use std::sync::Arc;
use surfaces::{dialog_surface, notice_channel, notification_layer, render_status};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "strategy-pilot", about = "Start and follow remote trading strategies")]
struct Args {
    #[arg(long, default_value = "", global = true)]
    server: String,
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[arg(long, default_value = "", global = true)]
    log_dir: String,
    #[arg(long, default_value_t = false, global = true)]
    debug: bool,
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Initialize a strategy and follow its lifecycle.
    Start { strategy_id: StrategyId },
    /// Attach to a strategy that may already be running.
    Watch { strategy_id: StrategyId },
    /// Print the remote status once.
    Status { strategy_id: StrategyId },
    /// Ask the remote to stop a strategy.
    Stop { strategy_id: StrategyId },
}

impl Mode {
    fn strategy_id(&self) -> StrategyId {
        match self {
            Mode::Start { strategy_id }
            | Mode::Watch { strategy_id }
            | Mode::Status { strategy_id }
            | Mode::Stop { strategy_id } => *strategy_id,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let overrides = ConfigOverrides {
        config_path: args.config.clone(),
        server_url: args.server.clone(),
        log_dir: args.log_dir.clone(),
    };
    let config = resolve_config(&overrides).context("failed to resolve configuration")?;
    let strategy_id = args.mode.strategy_id();
    let _log_guard = init_logging(&LogSettings {
        log_dir: &config.log_dir,
        component: &strategy_id.to_string(),
        debug: args.debug,
        mirror_stdout: env_true("PILOT_LOG_STDOUT"),
    });
    info!(event = "console_started", strategy_id = %strategy_id, server = %config.server_url);

    match args.mode {
        Mode::Status { strategy_id } => {
            let status = http_control(&config)?
                .query_status(strategy_id)
                .await
                .with_context(|| format!("status request for strategy {strategy_id} failed"))?;
            println!("strategy {strategy_id}: {status}");
            Ok(())
        }
        Mode::Stop { strategy_id } => {
            http_control(&config)?
                .stop(strategy_id)
                .await
                .with_context(|| format!("stop request for strategy {strategy_id} failed"))?;
            println!("strategy {strategy_id}: stop requested");
            Ok(())
        }
        Mode::Start { strategy_id } => interactive(&config, strategy_id, true).await,
        Mode::Watch { strategy_id } => interactive(&config, strategy_id, false).await,
    }
}

fn http_control(config: &PilotConfig) -> anyhow::Result<HttpControl> {
    HttpControl::from_config(config).context("failed to set up control client")
}

async fn interactive(
    config: &PilotConfig,
    strategy_id: StrategyId,
    start: bool,
) -> anyhow::Result<()> {
    let (notifier, notices) = notice_channel();
    let (orchestrator, handle) = Orchestrator::with_http(config, Arc::new(notifier))
        .context("failed to set up orchestrator")?;
    let orchestrator_task = tokio::spawn(orchestrator.run());

    let (failure_tx, failure_rx) = watch::channel(None);
    tokio::spawn(notification_layer(notices, failure_tx));
    tokio::spawn(dialog_surface(handle.subscribe()));

    if start {
        handle.start(strategy_id).await?;
    } else {
        handle.reconcile(strategy_id).await?;
    }
    println!("{HELP}");

    let result = command_loop(&handle, &failure_rx).await;
    let _ = handle.shutdown().await;
    orchestrator_task
        .await
        .context("orchestrator task failed")?;
    info!(event = "console_stopped", strategy_id = %strategy_id);
    result
}

async fn command_loop(
    handle: &OrchestratorHandle,
    last_failure: &watch::Receiver<Option<String>>,
) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => match parse_command_line(&line) {
                    Ok(None) => {}
                    Ok(Some(ConsoleCommand::Quit)) => return Ok(()),
                    Ok(Some(ConsoleCommand::Help)) => println!("{HELP}"),
                    Ok(Some(ConsoleCommand::Status)) => println!("{}", render_status(&handle.view())),
                    Ok(Some(ConsoleCommand::Copy)) => {
                        let report = handle
                            .view()
                            .failure
                            .map(|report| report.copy_text())
                            .or_else(|| last_failure.borrow().clone());
                        match report {
                            Some(report) => println!("{report}"),
                            None => println!("no failure to copy"),
                        }
                    }
                    Ok(Some(ConsoleCommand::Orchestrator(command))) => handle.send(command).await?,
                    Err(err) => eprintln!("{err}"),
                },
                Ok(None) => stdin_open = false,
                Err(err) => {
                    warn!(event = "stdin_read_error", error = %err);
                    stdin_open = false;
                }
            },
            _ = tokio::signal::ctrl_c() => return Ok(()),
        }
    }
}
