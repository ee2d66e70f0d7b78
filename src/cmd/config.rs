//! Configuration view and validation commands: `draftline config`.

use anyhow::{Context, Result};
use draftline::config::DraftlineToml;

use super::super::ConfigCommands;
use super::Workspace;

pub fn cmd_config(workspace: &Workspace, command: Option<ConfigCommands>) -> Result<()> {
    let config_path = &workspace.config_path;

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No draftline.toml found at {}", config_path.display());
                println!("Using default configuration.");
            }
            println!("Database:    {}", workspace.database_path().display());
            println!();
            let rendered = toml::to_string_pretty(&workspace.config)
                .context("Failed to render configuration")?;
            println!("{}", rendered);
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            let warnings = workspace.config.validate();
            let missing = workspace.config.missing_secrets();
            if warnings.is_empty() && missing.is_empty() {
                println!("Configuration is valid.");
            } else {
                if !warnings.is_empty() {
                    println!("Configuration warnings:");
                    for warning in warnings {
                        println!("  - {}", warning);
                    }
                }
                for var in missing {
                    println!("  - {} is not set", var);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("draftline.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }
            if let Some(parent) = config_path.parent()
                && !parent.as_os_str().is_empty()
            {
                std::fs::create_dir_all(parent)?;
            }

            DraftlineToml::default().save(config_path)?;

            println!("Created draftline.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [ai] provider, base URLs and request timeout");
            println!("  - [retry] attempts, backoff and step timeout");
            println!("  - [notify] completion email delivery");
            println!();
        }
    }

    Ok(())
}
