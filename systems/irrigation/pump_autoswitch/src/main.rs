//! Pump auto-switch binary
use clap::Parser;
use irrigo::{components::prelude::*, logging};
use std::process::ExitCode;
use tracing::error;

/// Arguments required for starting the program from the command line.
/// Flags given here win over the config file.
#[derive(Parser, Debug)]
struct Args {
    /// Path to the config file for the Pump Autoswitch Component.
    #[arg(short, long)]
    filepath: Option<String>,
    /// MQTT broker url, i.e. tcp://sarah.fritz.box:1883.
    #[arg(short, long)]
    broker: Option<String>,
    /// DEBUG, INFO, WARN, ERROR.
    #[arg(short, long)]
    log_level: Option<String>,
    /// User for Pushover notifications.
    #[arg(long)]
    pushover_user: Option<String>,
    /// Token for Pushover notifications.
    #[arg(long)]
    pushover_token: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let overrides = ConfigOverrides {
        broker: args.broker,
        log_level: args.log_level,
        pushover_user: args.pushover_user,
        pushover_token: args.pushover_token,
    };

    let config = match PumpAutoswitchConfig::load(args.filepath.as_deref(), overrides) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = logging::init(&config.log_level) {
        eprintln!("{e}");
        return ExitCode::FAILURE;
    }

    let component = PumpAutoswitch::new(config);
    match PumpAutoswitchController::start(component).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "pump auto-switch stopped with an error");
            ExitCode::FAILURE
        }
    }
}
