//! Config validation CLI tool
//!
//! Validates a rollcalld configuration file and reports any errors.

use rollcall_api::LeaveDeadlineRule;
use rollcall_util::default_config_path;
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
            eprintln!("Validates a rollcalld configuration file.");
            eprintln!();
            eprintln!("If no path is provided, uses: {}", default_path.display());
            return ExitCode::from(2);
        }
    };

    if !config_path.exists() {
        eprintln!("Error: Configuration file not found: {}", config_path.display());
        return ExitCode::from(1);
    }

    match rollcall_config::load_config(&config_path) {
        Ok(policy) => {
            let engine = &policy.engine;
            let offsets = &engine.default_offsets;

            println!("✓ Configuration is valid");
            println!();
            println!("Summary:");
            println!("  Config version: {}", rollcall_config::CURRENT_CONFIG_VERSION);
            println!("  Socket: {}", policy.service.socket_path.display());
            println!("  Data dir: {}", policy.service.data_dir.display());
            println!(
                "  Check-in window: {} min before to {} min after start",
                offsets.checkin_pre_minutes, offsets.checkin_post_minutes
            );
            match offsets.auto_absent_after_minutes {
                Some(minutes) => println!("  Auto-absent after: {} min", minutes),
                None => println!("  Auto-absent: off"),
            }
            match offsets.leave_deadline {
                LeaveDeadlineRule::AtStart => println!("  Leave deadline: at start"),
                LeaveDeadlineRule::BeforeStart { minutes } => {
                    println!("  Leave deadline: {} min before start", minutes)
                }
            }
            println!(
                "  Verification: opens {} min after start, {} min default, {} min max",
                engine.verification_min_delay_minutes,
                engine.verification_default_minutes,
                engine.verification_max_minutes
            );
            println!("  Max location distance: {} m", engine.max_location_distance_m);

            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("✗ Configuration validation failed");
            eprintln!();
            match &e {
                rollcall_config::ConfigError::ReadError(io_err) => {
                    eprintln!("Failed to read file: {}", io_err);
                }
                rollcall_config::ConfigError::ParseError(parse_err) => {
                    eprintln!("TOML parse error:");
                    eprintln!("  {}", parse_err);
                }
                rollcall_config::ConfigError::ValidationFailed { errors } => {
                    eprintln!("Validation errors ({}):", errors.len());
                    for err in errors {
                        eprintln!("  - {}", err);
                    }
                }
                rollcall_config::ConfigError::UnsupportedVersion(ver) => {
                    eprintln!(
                        "Unsupported config version: {} (expected {})",
                        ver,
                        rollcall_config::CURRENT_CONFIG_VERSION
                    );
                }
            }
            ExitCode::from(1)
        }
    }
}
