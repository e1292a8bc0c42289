//! `lyrebird-streamd` binary entrypoint. Thin over the core library: parse
//! arguments, init logging, dispatch to the one subcommand requested
//! (spec.md §1 — the dispatcher itself is out of scope, named only here).

mod app;
mod cli;
mod commands;
mod service_unit;

use clap::Parser;
use cli::{Cli, Command, RulesCommand};
use streamd_core::config::LOG_LEVEL_ENV_VAR;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_LEVEL_ENV_VAR)
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    init_tracing();
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Run { config } => run_daemon(&config).await,
        Command::Status { config, json } => run_status(&config, json),
        Command::Update {
            config: _,
            release_index_url,
            current_version,
            check_only,
        } => commands::update(&release_index_url, &current_version, check_only)
            .await
            .map_err(|e| e.to_string()),
        Command::MigrateConfig { input, output } => commands::migrate_config(&input, &output)
            .map_err(|e| format!("migration failed: {e}")),
        Command::Rules {
            action: RulesCommand::Emit { config, output, reload },
        } => run_emit_rules(&config, &output, reload),
    };

    match result {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "streamd exited with an error");
            std::process::ExitCode::FAILURE
        }
    }
}

async fn run_daemon(config_path: &std::path::Path) -> Result<(), String> {
    let config = commands::load_config(config_path).map_err(|e| e.to_string())?;
    app::run(config).await.map_err(|e| e.to_string())
}

fn run_status(config_path: &std::path::Path, json: bool) -> Result<(), String> {
    let config = commands::load_config(config_path).map_err(|e| e.to_string())?;
    commands::status(&config, json);
    Ok(())
}

fn run_emit_rules(
    config_path: &std::path::Path,
    output: &std::path::Path,
    reload: bool,
) -> Result<(), String> {
    let config = commands::load_config(config_path).map_err(|e| e.to_string())?;
    commands::emit_rules(&config, output, reload).map_err(|e| e.to_string())
}
