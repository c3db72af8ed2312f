use std::process::ExitCode;

use clap::Parser;
use prettytable::{row, Table};
use serde_json::Value;
use tracing_subscriber::{fmt, EnvFilter};

use staydb::config::{CliArgs, Command, Config, LoggingConfig};
use staydb::{EntityKey, EntityType, Registry, StorageError};

fn init_logging(config: &LoggingConfig) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let builder = fmt().with_env_filter(env_filter).with_writer(std::io::stderr);
    let _ = if config.json {
        builder.json().try_init()
    } else {
        builder.compact().try_init()
    };
}

fn main() -> ExitCode {
    let cli = CliArgs::parse();
    let config = Config::load(&cli);
    init_logging(&config.logging);

    match run(&config, &cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Command failed");
            ExitCode::FAILURE
        }
    }
}

fn run(config: &Config, command: &Command) -> Result<(), StorageError> {
    let registry = Registry::from_config(&config.storage)?;

    match command {
        Command::Count { entity_type: Some(t) } => {
            println!("{}", registry.count(Some(*t))?);
        }
        Command::Count { entity_type: None } => {
            let mut table = Table::new();
            table.add_row(row!["Type", "Count"]);
            for t in EntityType::ALL {
                table.add_row(row![t, registry.count(Some(t))?]);
            }
            table.add_row(row!["Total", registry.count(None)?]);
            table.printstd();
        }
        Command::List { entity_type } => {
            for entity in registry.all(*entity_type)?.values() {
                println!("{}", Value::Object(registry.encode(entity)));
            }
        }
        Command::Show { entity_type, id } => match registry.get(*entity_type, id)? {
            Some(entity) => {
                let encoded = Value::Object(registry.encode(&entity));
                let pretty = serde_json::to_string_pretty(&encoded)
                    .map_err(|e| StorageError::Other(e.to_string()))?;
                println!("{}", pretty);
            }
            None => println!("** no instance found **"),
        },
        Command::Delete { entity_type, id } => match registry.get(*entity_type, id)? {
            Some(entity) => {
                registry.remove(&entity)?;
                tracing::info!(key = %entity.key(), "Entity deleted");
            }
            None => println!("** no instance found: {} **", EntityKey::new(*entity_type, id.as_str())),
        },
    }
    Ok(())
}
