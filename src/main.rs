use clap::{Parser, Subcommand};
use cooling_auto_adjust::config::{self, Config};
use cooling_auto_adjust::engine::{Engine, EngineHandle};
use cooling_auto_adjust::error::Result;
use cooling_auto_adjust::events::EnglishCatalog;
use cooling_auto_adjust::hub::{MemoryHub, MqttHub};
use cooling_auto_adjust::settings::{CoolingConfig, SettingsStore};
use cooling_auto_adjust::simulation::{self, DEMO_OUTDOOR_PATH};
use log::{error, info};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;

#[derive(Parser)]
#[command(name = "cooling-auto-adjust")]
#[command(about = "Keeps cooling setpoints in step with the outdoor temperature")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the engine against the MQTT hub (default)
    Run {
        /// Outdoor source as deviceId:capabilityId
        #[arg(long)]
        capability_path: Option<String>,

        /// Enable automatic adjustment
        #[arg(long, conflicts_with = "disabled")]
        enabled: bool,

        /// Disable automatic adjustment
        #[arg(long)]
        disabled: bool,
    },
    /// Print candidate outdoor temperature sources and exit
    Sensors {
        /// Time to wait for the hub directory, in milliseconds
        #[arg(long, default_value_t = 2000)]
        wait_ms: u64,
    },
    /// Run the engine against an in-memory demo hub
    Simulate {
        /// Interval between simulated outdoor readings, in milliseconds
        #[arg(long, default_value_t = 5000)]
        period_ms: u64,
    },
}

fn init_logger() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
}

fn main() -> ExitCode {
    config::load_dotenv();
    init_logger();
    let cli = Cli::parse();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to start runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let command = cli.command.unwrap_or(Commands::Run {
        capability_path: None,
        enabled: false,
        disabled: false,
    });
    let config = Config::from_env();

    let result = runtime.block_on(async move {
        match command {
            Commands::Run {
                capability_path,
                enabled,
                disabled,
            } => {
                let enabled = match (enabled, disabled) {
                    (true, _) => Some(true),
                    (_, true) => Some(false),
                    _ => None,
                };
                run(config, capability_path, enabled).await
            }
            Commands::Sensors { wait_ms } => sensors(config, Duration::from_millis(wait_ms)).await,
            Commands::Simulate { period_ms } => {
                simulate(config, Duration::from_millis(period_ms)).await
            }
        }
    });

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{} ({})", e, e.event_name());
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config, capability_path: Option<String>, enabled: Option<bool>) -> Result<()> {
    info!("Starting cooling auto-adjust");
    info!("  Settings: {}", config.settings_path.display());
    info!(
        "  MQTT broker: {}:{}",
        config.mqtt.broker_host, config.mqtt.broker_port
    );

    let settings = Arc::new(SettingsStore::open(config.settings_path.clone()));
    if capability_path.is_some() || enabled.is_some() {
        let current = settings.config();
        let requested = CoolingConfig {
            capability_path: capability_path.unwrap_or(current.capability_path),
            enabled: enabled.unwrap_or(current.enabled),
        };
        requested.validate()?;
        // Applied by the start-up reload
        settings.set_config(&requested);
    }

    let (hub, hub_events, mqtt_task) = MqttHub::start(&config.mqtt);
    let engine = Engine::new(hub, settings, Arc::new(EnglishCatalog), config.engine);
    let (handle, engine_task) = engine.spawn(hub_events);

    info!("Cooling auto-adjust is running, press Ctrl+C to exit");
    wait_for_shutdown(&handle).await;

    let _ = engine_task.await;
    mqtt_task.abort();
    info!("Cooling auto-adjust stopped");
    Ok(())
}

async fn sensors(config: Config, wait: Duration) -> Result<()> {
    let (hub, _hub_events, mqtt_task) = MqttHub::start(&config.mqtt);
    tokio::time::sleep(wait).await;
    info!("{} device(s) discovered", hub.device_count());

    let engine = Engine::new(
        hub,
        Arc::new(SettingsStore::in_memory()),
        Arc::new(EnglishCatalog),
        config.engine,
    );
    let result = engine.list_temperature_sensors().await;
    mqtt_task.abort();

    for sensor in result? {
        println!("{}\t{}", sensor.capability_path, sensor.capability_name);
    }
    Ok(())
}

async fn simulate(config: Config, period: Duration) -> Result<()> {
    info!("Starting simulation (outdoor reading every {:?})", period);

    let (hub, hub_events) = MemoryHub::new();
    simulation::populate(&hub);
    let settings = Arc::new(SettingsStore::in_memory());
    settings.set_config(&CoolingConfig::new(DEMO_OUTDOOR_PATH, true));

    let engine = Engine::new(
        hub.clone(),
        settings,
        Arc::new(EnglishCatalog),
        config.engine,
    );
    let (handle, engine_task) = engine.spawn(hub_events);
    let sim_task = simulation::run_simulation(hub, period);

    wait_for_shutdown(&handle).await;
    sim_task.abort();
    let _ = engine_task.await;
    Ok(())
}

async fn wait_for_shutdown(handle: &EngineHandle) {
    match signal::ctrl_c().await {
        Ok(()) => info!("Received shutdown signal"),
        Err(e) => error!("Failed to listen for shutdown signal: {}", e),
    }
    if let Err(e) = handle.shutdown().await {
        error!("Error during shutdown: {}", e);
    }
}
