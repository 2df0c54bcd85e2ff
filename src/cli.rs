// src/cli.rs
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::lock::LockGate;
use crate::models::{DueStatus, Section};
use crate::remote::SupabaseStore;
use crate::vault::Vault;
use chrono::Local;
use log;
use rpassword;

/// Terminal client for a hosted personal vault of passwords, vehicles and insurances.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
#[clap(arg_required_else_help = false)] // Allow no subcommand to default to TUI
pub struct Cli {
    /// Path to an alternative config file
    #[clap(long, global = true, value_parser)]
    pub config: Option<PathBuf>,

    #[clap(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Commands {
    /// List the records of one section, or of all sections
    List {
        /// social, personal, insurance or misc
        #[clap(short, long, value_parser = parse_section)]
        section: Option<Section>,
    },
    /// Export records as CSV files
    Export {
        /// Export a single section
        #[clap(short, long, value_parser = parse_section, conflicts_with = "all")]
        section: Option<Section>,
        /// Export every record into one combined file
        #[clap(short, long)]
        all: bool,
        /// Directory to write into (defaults to export_dir from the config)
        #[clap(short, long, value_parser)]
        out: Option<PathBuf>,
    },
    /// Import records from a CSV file
    Import {
        #[clap(value_parser)]
        file: PathBuf,
    },
    /// Launch the Terminal User Interface (TUI)
    Tui,
}

fn parse_section(value: &str) -> Result<Section, String> {
    match value.trim().to_lowercase().as_str() {
        "social" => Ok(Section::Social),
        "personal" => Ok(Section::Personal),
        "insurance" | "insurances" => Ok(Section::Insurance),
        "misc" | "miscellaneous" | "vehicles" => Ok(Section::Miscellaneous),
        other => Err(format!(
            "unknown section '{}' (expected social, personal, insurance or misc)",
            other
        )),
    }
}

/// Prompts for the PIN, then connects and loads every list.
fn open_vault(config: &Config) -> AppResult<Vault<SupabaseStore>> {
    let mut gate = LockGate::new(config.unlock_pin.clone());
    let pin = rpassword::prompt_password("Enter PIN: ").map_err(|e| {
        log::error!("Failed to read PIN: {}", e);
        AppError::Cli(format!("Failed to read PIN: {}", e))
    })?;
    if !gate.try_unlock(&pin) {
        return Err(AppError::Cli("Authentication failed: invalid PIN.".to_string()));
    }

    let store = SupabaseStore::new(&config.remote)?;
    let mut vault = Vault::new(store);
    vault.load_all(Local::now().date_naive())?;
    Ok(vault)
}

fn print_section(vault: &Vault<SupabaseStore>, section: Section) {
    println!("{} ({}):", section.title(), vault.count(section));
    let today = Local::now().date_naive();
    match section.category() {
        Some(category) => {
            for entry in vault.credentials_in(category) {
                println!("  - Service: {}, Username: {}", entry.service, entry.username);
            }
        }
        None if section == Section::Insurance => {
            for policy in vault.insurances() {
                let status = match policy.due_status(today) {
                    DueStatus::PastDue => " (past due)",
                    DueStatus::DueSoon => " (due soon)",
                    _ => "",
                };
                println!(
                    "  - {}: due {}{}, premium {}, {}",
                    policy.name,
                    policy.due_date,
                    status,
                    policy.premium,
                    if policy.is_paid { "paid" } else { "unpaid" }
                );
            }
        }
        None => {
            for vehicle in vault.vehicles() {
                println!(
                    "  - {} ({}): last service {}, next service {}",
                    vehicle.name,
                    vehicle.vehicle_type.as_str(),
                    vehicle.last_service,
                    vehicle.next_service
                );
            }
        }
    }
}

/// Handles the parsed CLI command.
/// Returns `Ok(true)` if the TUI should run, `Ok(false)` if a CLI command was handled and TUI should not run.
pub fn handle_cli_command(cli: Cli, config: &Config) -> AppResult<bool> {
    log::debug!("Handling CLI command: {:?}", cli.command);
    match cli.command {
        Some(Commands::List { section }) => {
            log::info!("Executing 'list' command for section: {:?}", section);
            let vault = open_vault(config)?;
            match section {
                Some(section) => print_section(&vault, section),
                None => Section::ALL.iter().for_each(|s| print_section(&vault, *s)),
            }
            Ok(false)
        }
        Some(Commands::Export { section, all, out }) => {
            if section.is_none() && !all {
                return Err(AppError::Cli("Specify --section <name> or --all.".to_string()));
            }
            let vault = open_vault(config)?;
            let export = match section {
                Some(section) => vault.export_section(section),
                None => vault.export_all(),
            };
            let Some(export) = export else {
                println!("Nothing to export.");
                log::info!("Export skipped: no records.");
                return Ok(false);
            };
            let dir = out.unwrap_or_else(|| config.export_dir.clone());
            let path = export.write_to(&dir)?;
            println!("Exported to {}", path.display());
            Ok(false)
        }
        Some(Commands::Import { file }) => {
            log::info!("Executing 'import' command for file: {:?}", file);
            if !file.exists() {
                let msg = format!("Import file not found at: {:?}", file);
                log::error!("Import command: {}", msg);
                return Err(AppError::Cli(msg));
            }
            let mut vault = open_vault(config)?;
            let batches = vault.import_file(&file, Local::now().date_naive())?;
            if batches.is_empty() {
                println!("No records found in {:?}.", file);
            } else {
                println!(
                    "Imported {} passwords, {} vehicles, {} insurances ({} rows skipped).",
                    batches.credentials.len(),
                    batches.vehicles.len(),
                    batches.insurances.len(),
                    batches.skipped
                );
            }
            Ok(false)
        }
        Some(Commands::Tui) => {
            log::info!("'tui' command given, preparing to launch TUI.");
            Ok(true)
        }
        None => {
            log::info!("No CLI command given, preparing to launch TUI by default.");
            Ok(true)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_section_aliases() {
        assert_eq!(parse_section("Social"), Ok(Section::Social));
        assert_eq!(parse_section("misc"), Ok(Section::Miscellaneous));
        assert_eq!(parse_section("insurances"), Ok(Section::Insurance));
        assert!(parse_section("cars").is_err());
    }

    #[test]
    fn test_no_subcommand_runs_tui() {
        let cli = Cli::try_parse_from(["passvault"]).unwrap();
        assert!(cli.command.is_none());
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_export_flags() {
        let cli = Cli::try_parse_from(["passvault", "export", "--section", "personal", "--out", "/tmp/x"]).unwrap();
        assert_eq!(
            cli.command,
            Some(Commands::Export {
                section: Some(Section::Personal),
                all: false,
                out: Some(PathBuf::from("/tmp/x")),
            })
        );
        assert!(Cli::try_parse_from(["passvault", "export", "--all", "--section", "social"]).is_err());
    }

    #[test]
    fn test_global_config_flag() {
        let cli = Cli::try_parse_from(["passvault", "import", "data.csv", "--config", "alt.toml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("alt.toml")));
        assert_eq!(cli.command, Some(Commands::Import { file: PathBuf::from("data.csv") }));
    }

    #[test]
    fn test_export_without_target_is_rejected_before_prompting() {
        let cli = Cli::try_parse_from(["passvault", "export"]).unwrap();
        let err = handle_cli_command(cli, &Config::default()).unwrap_err();
        assert!(matches!(err, AppError::Cli(_)));
    }
}
