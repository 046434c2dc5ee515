//! Config validation CLI tool
//!
//! Validates a diagportd configuration file and reports any errors.

use diagport_config::{ConfigError, CURRENT_CONFIG_VERSION, load_config};
use diagport_ipc::ConnectionMode;
use diagport_util::default_config_path;
use std::path::PathBuf;
use std::process::ExitCode;

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();

    let config_path = match args.get(1) {
        Some(path) => PathBuf::from(path),
        None => {
            let default_path = default_config_path();
            eprintln!("Usage: validate-config [config-file]");
            eprintln!();
            eprintln!("Validates a diagportd configuration file.");
            eprintln!();
            eprintln!("If no path is provided, uses: {}", default_path.display());
            eprintln!();
            eprintln!("Example:");
            eprintln!("  validate-config {}", default_path.display());
            eprintln!("  validate-config diagport.example.toml");
            return ExitCode::from(2);
        }
    };

    if !config_path.exists() {
        eprintln!("Error: Configuration file not found: {}", config_path.display());
        return ExitCode::from(1);
    }

    match load_config(&config_path) {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!();
            println!("Summary:");
            println!("  Config version: {}", CURRENT_CONFIG_VERSION);
            println!(
                "  Default listen socket: {}",
                if config.server.default_listen {
                    "enabled"
                } else {
                    "disabled"
                }
            );
            println!("  Socket directory: {}", config.server.socket_dir.display());
            println!(
                "  Backoff: {}ms to {}ms, factor {}",
                config.backoff.min.as_millis(),
                config.backoff.max.as_millis(),
                config.backoff.falloff_factor
            );
            println!("  Ports: {}", config.ports.len());

            if !config.ports.is_empty() {
                println!();
                println!("Ports:");
                for port in &config.ports {
                    let mode = match port.mode {
                        ConnectionMode::Server => "listen",
                        ConnectionMode::Client => "connect",
                    };
                    println!("  - [{}] {}", mode, port.name);
                }
            }

            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("✗ Configuration validation failed");
            eprintln!();
            match &e {
                ConfigError::ReadError(io_err) => {
                    eprintln!("Failed to read file: {}", io_err);
                }
                ConfigError::ParseError(parse_err) => {
                    eprintln!("TOML parse error:");
                    eprintln!("  {}", parse_err);
                }
                ConfigError::PortList(list_err) => {
                    eprintln!("Invalid port list: {}", list_err);
                }
                ConfigError::ValidationFailed { errors } => {
                    eprintln!("Validation errors ({}):", errors.len());
                    for err in errors {
                        eprintln!("  - {}", err);
                    }
                }
                ConfigError::UnsupportedVersion(ver) => {
                    eprintln!(
                        "Unsupported config version: {} (expected {})",
                        ver, CURRENT_CONFIG_VERSION
                    );
                }
            }
            ExitCode::from(1)
        }
    }
}
