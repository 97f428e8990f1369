//! Warband probe: connects to a game server, optionally sends one command,
//! and logs every network event until the connection drops.
//!
//! Run with: `cargo run -p warband-probe -- --server 127.0.0.1:7777 --command 12`

use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn};
use warband_config::{CliArgs, Config, default_config_dir};
use warband_net::{ClientConfig, CommandId, Dispatcher, NetClient};

/// CLI arguments for the probe binary.
#[derive(Parser, Debug)]
#[command(name = "warband-probe", about = "Warband network probe")]
struct ProbeArgs {
    #[command(flatten)]
    common: CliArgs,

    /// Command id to send once connected.
    #[arg(long)]
    command: Option<CommandId>,

    /// Payload of the command, sent as a string.
    #[arg(long, default_value = "")]
    payload: String,

    /// Send the command over the HTTP fallback instead of the socket.
    #[arg(long)]
    http: bool,

    /// Stop after this many ticks (0 runs until the connection drops).
    #[arg(long, default_value_t = 0)]
    ticks: u64,

    /// Pump rate in ticks per second.
    #[arg(long, default_value_t = 30)]
    tick_rate: u32,
}

/// Flags set by event handlers and read by the tick loop.
#[derive(Default)]
struct Status {
    connected: Cell<bool>,
    finished: Cell<bool>,
}

fn main() {
    let args = ProbeArgs::parse();

    let config_dir = args.common.config.clone().unwrap_or_else(default_config_dir);
    let mut config = match Config::load_or_create(&config_dir) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", config_dir.display());
            Config::default()
        }
    };
    config.apply_cli_overrides(&args.common);

    let log_file = warband_log::init_logging(
        Some(&config_dir.join("logs")),
        cfg!(debug_assertions),
        Some(&config),
    );
    if let Some(path) = log_file {
        info!("Session log: {}", path.display());
    }

    if let Err(e) = run(&args, &config) {
        error!("Probe failed: {e}");
        std::process::exit(1);
    }
}

fn run(args: &ProbeArgs, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("warband-net")
        .build()?;
    let client = NetClient::new(ClientConfig::from_config(config), runtime.handle().clone())?;

    let status = Rc::new(Status::default());
    let mut dispatcher = Dispatcher::new();
    register_logging(&mut dispatcher, &status);

    if args.http {
        let command = args.command.ok_or("--http requires --command")?;
        let token = client.http_post(command, &args.payload, false)?;
        info!("HTTP call {token} for command {command} started");
    } else {
        info!(
            "Connecting to {} over {:?}",
            config.network.address, config.network.transport
        );
        client.connect()?;
    }

    let tick = Duration::from_secs_f64(1.0 / f64::from(args.tick_rate.max(1)));
    let mut pending_command = args.command.filter(|_| !args.http);
    let mut ticks = 0u64;

    while !status.finished.get() && (args.ticks == 0 || ticks < args.ticks) {
        client.pump(&mut dispatcher);

        if status.connected.get()
            && let Some(command) = pending_command.take()
        {
            match client.send_sync(command, &args.payload, false) {
                Ok(token) => info!("Sent command {command} ({token})"),
                Err(e) => warn!("Failed to send command {command}: {e}"),
            }
        }

        ticks += 1;
        std::thread::sleep(tick);
    }

    client.disconnect();
    client.pump(&mut dispatcher);
    info!("Probe finished after {ticks} ticks");
    Ok(())
}

fn register_logging(dispatcher: &mut Dispatcher, status: &Rc<Status>) {
    let s = Rc::clone(status);
    dispatcher.on_connection(move |success, error| {
        if success {
            info!("Connected");
            s.connected.set(true);
        } else {
            warn!("Connection failed: {}", error.unwrap_or("unknown error"));
            s.finished.set(true);
        }
    });

    let s = Rc::clone(status);
    dispatcher.on_connection_lost(move || {
        info!("Connection lost");
        s.connected.set(false);
        s.finished.set(true);
    });

    dispatcher
        .on_debug_message(|text| warn!("Server debug: {text}"))
        .on_response(|command_id, payload| {
            info!("Response for command {command_id}: {} bytes", payload.len());
        })
        .on_http_response(|command_id, text| {
            info!("HTTP response for command {command_id}: {text}");
        })
        .on_http_error(|error, token| warn!("HTTP call {token} failed: {error}"));

    let s = Rc::clone(status);
    dispatcher.on_http_close(move |token| {
        info!("HTTP call {token} closed");
        s.finished.set(true);
    });
}
