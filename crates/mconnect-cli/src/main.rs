//! mconnect-ctl: watch and manage the devices of the mconnect service.

mod terminal;

use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use mconnect_bus::ServiceBus;
use mconnect_core::setup::load_config;
use mconnect_core::{
    project, ActionGate, AppContext, AppEvent, Config, ContextEvent, DeviceRegistry,
    GateOutcome, IndicatorSettings, Projection, RegistryEvent,
};
use mconnect_types::{DeviceId, Transition};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::terminal::{format_view, LineRenderer, TerminalPrompt};

#[derive(Parser)]
#[command(
    name = "mconnect-ctl",
    about = "Watch and manage mconnect devices",
    version,
    propagate_version = true
)]
struct Cli {
    /// Path to configuration file.
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Follow the service and its devices until interrupted.
    Watch,

    /// List the devices known to the service.
    Devices,

    /// Grant trust to a device.
    Allow {
        /// Device id or name.
        device: String,
        /// Do not ask for confirmation.
        #[arg(short, long)]
        yes: bool,
    },

    /// Revoke trust from a device, cancelling any pairing in progress.
    Disallow {
        /// Device id or name.
        device: String,
        /// Do not ask for confirmation.
        #[arg(short, long)]
        yes: bool,
    },

    /// Grant or revoke trust depending on the device's current state.
    Toggle {
        /// Device id or name.
        device: String,
        /// Do not ask for confirmation.
        #[arg(short, long)]
        yes: bool,
    },

    /// Ring a device so it can be found.
    Locate {
        /// Device id or name.
        device: String,
    },

    /// Ask the session bus to launch the service.
    StartDaemon,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.service.log_level)),
        )
        .init();

    let bus = connect(&config).await?;

    match cli.command {
        Commands::Watch => watch_service(bus, config).await?,
        Commands::Devices => list_devices(bus, &config).await?,
        Commands::Allow { device, yes } => {
            gated(bus, &config, &device, Some(Transition::Allow), yes).await?;
        }
        Commands::Disallow { device, yes } => {
            gated(bus, &config, &device, Some(Transition::Disallow), yes).await?;
        }
        Commands::Toggle { device, yes } => gated(bus, &config, &device, None, yes).await?,
        Commands::Locate { device } => {
            let conn = Connection::open(bus, &config).await?;
            let id = resolve(&conn.registry, &device)?;
            conn.registry.locate(&id).await?;
            println!("Ringing {device}.");
            conn.close();
        }
        Commands::StartDaemon => {
            bus.start_service(&config.service.bus_name).await?;
            println!("Requested start of {}.", config.service.bus_name);
        }
    }

    Ok(())
}

#[cfg(feature = "dbus")]
async fn connect(config: &Config) -> anyhow::Result<Arc<dyn ServiceBus>> {
    let bus = mconnect_bus::dbus::ZbusServiceBus::session(config.service.bus_name.clone())
        .await
        .context("failed to connect to the session bus")?;
    Ok(Arc::new(bus))
}

#[cfg(not(feature = "dbus"))]
async fn connect(_config: &Config) -> anyhow::Result<Arc<dyn ServiceBus>> {
    bail!("mconnect-ctl was built without session-bus support")
}

/// A registry for one-shot commands, kept current by a signal pump.
struct Connection {
    registry: DeviceRegistry,
    pump: JoinHandle<()>,
}

impl Connection {
    async fn open(bus: Arc<dyn ServiceBus>, config: &Config) -> anyhow::Result<Self> {
        let mut signals = bus
            .subscribe_devices()
            .await
            .context("mconnect service is not running (try `mconnect-ctl start-daemon`)")?;
        let registry =
            DeviceRegistry::open(bus, 1, config.service.transition_timeout()).await?;

        let pump_registry = registry.clone();
        let pump = tokio::spawn(async move {
            while let Some(signal) = signals.recv().await {
                if let Err(e) = pump_registry.handle_signal(signal) {
                    warn!(error = %e, "stopped applying device signals");
                    break;
                }
            }
        });

        Ok(Self { registry, pump })
    }

    fn close(self) {
        self.pump.abort();
        self.registry.destroy();
    }
}

/// Find a device by exact id, or by case-insensitive name.
fn resolve(registry: &DeviceRegistry, needle: &str) -> anyhow::Result<DeviceId> {
    let sessions = registry.sessions()?;
    if let Some(session) = sessions.iter().find(|s| s.id().as_str() == needle) {
        return Ok(session.id().clone());
    }
    let matches: Vec<_> = sessions
        .iter()
        .filter(|s| s.snapshot().name.eq_ignore_ascii_case(needle))
        .collect();
    match matches.as_slice() {
        [session] => Ok(session.id().clone()),
        [] => bail!("no device named {needle:?}"),
        _ => bail!("{needle:?} matches several devices; use the device id"),
    }
}

async fn gated(
    bus: Arc<dyn ServiceBus>,
    config: &Config,
    device: &str,
    transition: Option<Transition>,
    assume_yes: bool,
) -> anyhow::Result<()> {
    let conn = Connection::open(bus, config).await?;
    let id = resolve(&conn.registry, device)?;
    let gate = ActionGate::new(Arc::new(TerminalPrompt { assume_yes }));

    let outcome = match transition {
        Some(t) => gate.request(&conn.registry, &id, t).await?,
        None => gate.toggle(&conn.registry, &id).await?,
    };

    match outcome {
        GateOutcome::Cancelled(_) => println!("Cancelled. Nothing was sent."),
        GateOutcome::Dispatched { request, pending } => {
            println!("Sent {} for {device}, waiting for the service...", request.transition);
            pending.wait().await?;
            println!("Done.");
        }
    }

    conn.close();
    Ok(())
}

async fn list_devices(bus: Arc<dyn ServiceBus>, config: &Config) -> anyhow::Result<()> {
    let conn = Connection::open(bus, config).await?;
    let sessions = conn.registry.sessions()?;
    if sessions.is_empty() {
        println!("No devices.");
    }
    for session in sessions {
        let view = project(&session.snapshot(), &config.indicator);
        println!("{}", format_view(session.id(), &view));
    }
    conn.close();
    Ok(())
}

async fn watch_service(bus: Arc<dyn ServiceBus>, config: Config) -> anyhow::Result<()> {
    let mut ctx = AppContext::new(config, bus, Arc::new(TerminalPrompt { assume_yes: false }));
    let settings = ctx.settings_receiver();
    ctx.subscribe(move |event: &AppEvent| print_event(event, &settings));

    let sender = ctx.event_sender();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = sender.send(ContextEvent::Shutdown).await;
        }
    });

    ctx.run().await?;
    Ok(())
}

fn print_event(event: &AppEvent, settings: &watch::Receiver<IndicatorSettings>) {
    match event {
        AppEvent::ServiceAppeared { generation } => {
            println!("service appeared (generation {generation})");
        }
        AppEvent::ServiceVanished => println!("service vanished"),
        AppEvent::Registry(RegistryEvent::Added(session)) => {
            let renderer = LineRenderer {
                id: session.id().clone(),
            };
            if let Err(e) = Projection::attach(session, settings.clone(), renderer) {
                warn!(device = %session.id(), error = %e, "could not follow device");
            }
        }
        AppEvent::Registry(RegistryEvent::Removed(id)) => println!("device removed: {id}"),
        AppEvent::BindFailed { generation, error } => {
            eprintln!("could not read devices (generation {generation}): {error}");
        }
        AppEvent::TransitionFailed { id, error, .. } => {
            eprintln!("trust change for {id} failed: {error}");
        }
        AppEvent::Registry(RegistryEvent::Changed { .. } | RegistryEvent::Destroyed)
        | AppEvent::ShutDown => {}
    }
}
