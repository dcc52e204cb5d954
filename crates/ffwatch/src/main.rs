mod cli;
mod config;
mod error;
mod monitor;
mod output;

use std::io::BufRead;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use ffwatch_core::{AdapterAction, Console, MemoryStore};

use crate::cli::{Cli, Command, ConfigCommand, GlobalOpts};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_tracing(cli.global.verbose);

    if let Err(err) = run(cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

fn init_tracing(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    // stdout carries the monitor output
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        // Config commands don't need a console connection
        Command::Config(args) => config_command(&args.command, &cli.global),

        Command::Adapter(args) => {
            let action: AdapterAction = args.action.into();
            console(&cli.global)?
                .adapter_action(&args.configuration, &args.name, action)
                .await?;
            println!("{}/{}: {action} requested", args.configuration, args.name);
            Ok(())
        }

        Command::Status(args) => monitor::status(&console(&cli.global)?, &args).await,

        Command::Watch(args) => monitor::watch(&console(&cli.global)?, &args).await,
    }
}

fn console(global: &GlobalOpts) -> Result<Console, CliError> {
    let config = config::build_console_config(global)?;
    tracing::debug!(url = %config.url, push = config.push_enabled, "console configured");
    Ok(Console::new(config, Arc::new(MemoryStore::new()))?)
}

fn config_command(command: &ConfigCommand, global: &GlobalOpts) -> Result<(), CliError> {
    match command {
        ConfigCommand::Path => {
            println!("{}", config::config_file(global).display());
        }
        ConfigCommand::Profiles => {
            let cfg = config::load(global)?;
            let active = config::active_profile_name(global, &cfg);
            let mut names: Vec<&String> = cfg.profiles.keys().collect();
            names.sort();
            for name in names {
                let marker = if *name == active { "*" } else { " " };
                println!("{marker} {name:<16} {}", cfg.profiles[name].url);
            }
        }
        ConfigCommand::SetPassword => {
            let cfg = config::load(global)?;
            let profile = config::active_profile_name(global, &cfg);
            let mut password = String::new();
            std::io::stdin().lock().read_line(&mut password)?;
            let password = password.trim_end_matches(['\r', '\n']);
            if password.is_empty() {
                return Err(CliError::Validation {
                    field: "password".into(),
                    reason: "empty password on stdin".into(),
                });
            }
            ffwatch_config::store_password(&profile, password)?;
            println!("Password stored for profile '{profile}'");
        }
    }
    Ok(())
}
