// src/main.rs
mod cli;
mod config;
mod csv_codec;
mod error;
mod generator;
mod lock;
mod models;
mod notify;
mod remote;
mod tui;
mod vault;

use clap::Parser;

fn main() -> Result<(), error::AppError> {
    env_logger::init(); // Initialize logger
    log::info!("Starting PassVault application");

    let cli_args = cli::Cli::parse();
    let config = config::load_config(cli_args.config.as_deref());

    match cli::handle_cli_command(cli_args, &config) {
        Ok(should_run_tui) => {
            if should_run_tui {
                if let Err(e) = tui::run_tui(&config) {
                    log::error!("Application TUI error: {:#?}", e);
                    eprintln!("Error: {}", e);
                    return Err(e);
                }
            } else {
                log::info!("CLI command processed.");
            }
        }
        Err(e) => {
            log::error!("Application failed: {:#?}", e);
            eprintln!("Error: {}", e);
            return Err(e);
        }
    }

    log::info!("PassVault application finished successfully.");
    Ok(())
}
