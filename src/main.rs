use clap::Parser;
use std::error::Error;
use std::path::PathBuf;
use std::sync::mpsc;
use tankmon_service::config::{Credentials, ServiceConfig};
use tankmon_service::ingest::create_client;
use tankmon_service::logging::init_logging;
use tankmon_service::poll::{Coordinator, PollSettings, describe_tank};
use tankmon_service::regions::validate_profile;
use tankmon_service::store::JsonFileStore;
use tankmon_service::verify::{print_summary, verify_account};
use tracing::{debug, info, warn};

#[derive(Parser, Debug)]
#[command(name = "tankmon", about = "Propane tank consumption monitor")]
struct Cli {
    /// Path to the TOML service configuration
    #[arg(long, default_value = "tankmon.toml")]
    config: PathBuf,

    /// Run a single poll cycle, print the snapshot as JSON and exit
    #[arg(long)]
    once: bool,

    /// Check the account against the portal and exit
    #[arg(long, conflicts_with = "once")]
    verify: bool,
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    let config = ServiceConfig::load(&cli.config)?;
    init_logging(config.log_level()?, config.logging.file.as_deref(), config.logging.timestamps)?;

    let profile = config.profile()?;
    for warning in validate_profile(profile) {
        warn!(region = %profile.region, "{}", warning);
    }

    let credentials = Credentials::from_env()?;
    let client = create_client(profile, credentials)?;

    if cli.verify {
        let report = verify_account(client.as_ref());
        print_summary(&report);
        println!("{}", serde_json::to_string_pretty(&report)?);
        client.close();
        return Ok(());
    }

    let store = JsonFileStore::new(config.state_path.clone());
    let settings = PollSettings::from_config(&config, profile);
    let mut coordinator = Coordinator::new(client, config.threshold_policy(), Box::new(store), settings);
    let restored = coordinator.load_state()?;
    info!(region = %profile.region, restored, state = %config.state_path.display(), "Service starting");

    if cli.once {
        let outcome = coordinator.run_cycle(chrono::Utc::now())?;
        for tank in &outcome.snapshot().tanks {
            info!("{}", describe_tank(tank, profile));
        }
        println!("{}", serde_json::to_string_pretty(outcome.snapshot())?);
        return Ok(());
    }

    // The sender lives for the whole process; the loop only ends on an
    // authentication failure.
    let (_shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
    coordinator.run(&shutdown_rx, |outcome| {
        let snapshot = outcome.snapshot();
        info!(
            tanks = snapshot.tanks.len(),
            stale = outcome.is_stale(),
            fetched_at = %snapshot.fetched_at,
            "Snapshot published"
        );
        for tank in &snapshot.tanks {
            debug!("{}", describe_tank(tank, profile));
        }
    })?;
    Ok(())
}
