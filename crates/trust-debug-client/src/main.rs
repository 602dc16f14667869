use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use trust_debug_client::{
    ClientConfig, DebugController, DebugSession, DebuggerModel, ProcessConnector, SessionState,
    CONFIG_FILE,
};

/// Register a file with a kernel debugger, set breakpoints and report stops.
#[derive(Debug, Parser)]
#[command(name = "trust-debug-client", version)]
struct Cli {
    /// Config file (defaults to ./trust-debug.toml when present).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Breakpoint line; repeat for several.
    #[arg(long = "break", value_name = "LINE")]
    breakpoints: Vec<u32>,
    /// Seconds to wait for stops before disconnecting.
    #[arg(long, value_name = "SECS", default_value_t = 5)]
    wait: u64,
    file: PathBuf,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => ClientConfig::from_path(path)?,
        None => ClientConfig::load(Path::new(CONFIG_FILE)),
    };
    let code = std::fs::read_to_string(&cli.file)
        .with_context(|| format!("failed to read {}", cli.file.display()))?;

    let session = DebugSession::new(ProcessConnector::from_config(&config.adapter))
        .with_request_timeout(config.client.request_timeout);
    let controller = DebugController::new(config.controller_options());
    controller.set_session(Some(Arc::new(session)));
    let mut states = controller.state_changed().subscribe();

    info!(adapter = %config.adapter.command, "starting debug session");
    controller
        .restore_state(true)
        .await
        .context("failed to start the debug session")?;
    let source = controller
        .update_breakpoints(&code, &cli.breakpoints)
        .await
        .context("failed to set breakpoints")?;
    let model = controller.model().context("no debugger model attached")?;

    println!("{} -> {source}", cli.file.display());
    for breakpoint in model.breakpoints.get_breakpoints(&source) {
        let id = breakpoint
            .id
            .map_or_else(|| "-".to_string(), |id| id.to_string());
        let status = if breakpoint.verified { "verified" } else { "pending" };
        println!("  breakpoint {id} line {} ({status})", breakpoint.line);
    }

    let deadline = tokio::time::sleep(Duration::from_secs(cli.wait));
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            () = &mut deadline => break,
            state = states.recv() => match state {
                Some(SessionState::Stopped) => print_stop(&model),
                Some(SessionState::Terminated) | None => break,
                Some(_) => {}
            },
        }
    }

    if controller.is_started() {
        controller.stop().await?;
    }
    Ok(())
}

fn print_stop(model: &DebuggerModel) {
    println!("stopped");
    for frame in model.callstack.frames() {
        println!("  #{} {} line {}", frame.id, frame.name, frame.line);
    }
    for scope in model.variables.scopes() {
        match scope.variables {
            Some(variables) => {
                println!("  {}:", scope.name);
                for variable in variables {
                    println!("    {} = {}", variable.name, variable.value);
                }
            }
            None => println!("  {}: (not loaded)", scope.name),
        }
    }
}
