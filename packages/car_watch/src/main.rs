use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info};
use tracing_subscriber::prelude::*;

use car_sync::{
    ApiClient, AutoFit, CreateShareRequest, InteractionKind, LiveSync, MapInteraction,
    PollOptions, SubscriptionKey, SyncConfig, ViewportCommand, build_client, spawn_polling,
};

mod config;
mod render;

#[derive(Parser)]
#[command(name = "car-watch")]
#[command(about = "Follow a car's live telemetry from the terminal")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to ./car-watch.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Telemetry API origin, overrides the config file
    #[arg(long, global = true)]
    api_base_url: Option<String>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Follow the live stream of a car or a share link
    Stream(StreamArgs),

    /// Follow a car by polling its state endpoint
    Poll(PollArgs),

    /// List the cars visible to the admin
    Cars,

    /// Create a share token for a car
    Share(ShareArgs),
}

#[derive(Parser)]
struct StreamArgs {
    /// Car id (admin stream)
    #[arg(long, conflicts_with = "token")]
    car: Option<i64>,

    /// Share token, exchanged for a session before connecting
    #[arg(long)]
    token: Option<String>,

    /// Print map viewport commands
    #[arg(long)]
    map: bool,
}

#[derive(Parser)]
struct PollArgs {
    /// Car id
    car: i64,

    /// Base poll interval, overrides admin_poll_ms
    #[arg(long)]
    interval_ms: Option<u64>,
}

#[derive(Parser)]
struct ShareArgs {
    /// Car id
    car: i64,

    /// Expire the share after this many minutes
    #[arg(long)]
    expires_in_min: Option<i64>,

    /// End the share once the car is this close to its destination
    #[arg(long)]
    arrive_radius_m: Option<u32>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_directive = if cli.debug {
        "car_watch=debug,car_sync=debug,warn"
    } else {
        "car_watch=info,car_sync=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();

    let config_path = cli
        .config
        .unwrap_or_else(|| PathBuf::from(config::DEFAULT_CONFIG_FILE));
    let config = config::resolve(&config_path, cli.api_base_url)?;
    debug!(api = %config.api_base_url, "configuration loaded");

    match cli.command {
        Commands::Stream(args) => stream(config, args).await,
        Commands::Poll(args) => poll(config, args).await,
        Commands::Cars => list_cars(config).await,
        Commands::Share(args) => share(config, args).await,
    }
}

async fn stream(config: SyncConfig, args: StreamArgs) -> Result<()> {
    let key = match args.car {
        Some(id) => SubscriptionKey::Car(id),
        None => SubscriptionKey::share(args.token),
    };
    let mut autofit = AutoFit::new(&config.map);
    let mut sync = LiveSync::new(config).context("starting sync engine")?;
    let mut state = sync.state();
    let mut status = sync.status();

    sync.subscribe(key).await;
    if args.map {
        println!("map: mode {} (enter: c = cycle, p = pan)", autofit.mode().label());
    }

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = args.map;
    let mut tick = tokio::time::interval(std::time::Duration::from_secs(1));
    let mut last_view: Option<ViewportCommand> = None;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = state.borrow_and_update().clone();
                match &current {
                    Some(s) => println!("{}", render::state_line(s, Utc::now().timestamp_millis())),
                    None => println!("no data"),
                }
                if args.map {
                    let view = autofit.on_state(current.as_ref());
                    if view.is_some() && view != last_view {
                        if let Some(cmd) = &view {
                            println!("{}", render::viewport_line(cmd));
                        }
                    }
                    last_view = view;
                }
            }
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let line = render::status_line(&status.borrow_and_update());
                println!("status: {line}");
            }
            line = stdin.next_line(), if stdin_open => {
                match line {
                    Ok(Some(line)) => {
                        let mode = match line.trim() {
                            "c" => Some(autofit.cycle()),
                            "p" => autofit.on_interaction(MapInteraction::surface(InteractionKind::PointerDown)),
                            _ => None,
                        };
                        if let Some(mode) = mode {
                            println!("map: mode {}", mode.label());
                            last_view = None;
                        }
                    }
                    _ => stdin_open = false,
                }
            }
            _ = tick.tick(), if args.map => {
                if let Some(mode) = autofit.tick() {
                    println!("map: mode {} (idle)", mode.label());
                    last_view = None;
                }
            }
        }
    }

    info!("shutting down");
    sync.unsubscribe().await;
    Ok(())
}

async fn poll(mut config: SyncConfig, args: PollArgs) -> Result<()> {
    if let Some(ms) = args.interval_ms {
        if ms == 0 {
            bail!("--interval-ms must be greater than zero");
        }
        config.admin_poll_ms = ms;
    }
    let api = ApiClient::new(build_client()?, &config);
    let car = args.car;
    let handle = spawn_polling(PollOptions::from_config(&config), move || {
        let api = api.clone();
        async move { api.car_state(car).await }
    });
    let mut value = handle.value();
    let mut status = handle.status();
    info!(car, interval_ms = config.admin_poll_ms, "polling");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = value.changed() => {
                if changed.is_err() {
                    break;
                }
                if let Some(s) = value.borrow_and_update().as_ref() {
                    println!("{}", render::state_line(s, Utc::now().timestamp_millis()));
                }
            }
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                if let Some(line) = render::poll_line(&status.borrow_and_update()) {
                    println!("{line}");
                }
            }
        }
    }

    handle.stop().await;
    Ok(())
}

async fn list_cars(config: SyncConfig) -> Result<()> {
    let api = ApiClient::new(build_client()?, &config);
    let cars = api.list_cars().await.context("listing cars")?;
    if cars.is_empty() {
        println!("no cars");
    }
    for car in cars {
        match car.display_name {
            Some(name) => println!("{}\t{}", car.id, name),
            None => println!("{}", car.id),
        }
    }
    Ok(())
}

async fn share(config: SyncConfig, args: ShareArgs) -> Result<()> {
    let api = ApiClient::new(build_client()?, &config);
    let mut req = CreateShareRequest::new(args.car);
    req.expires_at = args
        .expires_in_min
        .map(|m| Utc::now() + chrono::Duration::minutes(m));
    req.arrive_radius_m = args.arrive_radius_m;

    let created = api.create_share(&req).await.context("creating share")?;
    println!("{}", created.token);
    Ok(())
}
