//! protomux echo service.
//!
//! A complete service on the framework: echoes typed messages back to
//! every client, sweeps idle connections, and answers `stats` on stdin.

use std::path::PathBuf;

use clap::Parser;
use protomux_server::{
    control_channel, run_server, Command, Conn, Context, Module, ModuleRegistry, Options,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;
mod logging;
mod messages;

use config::load_options;
use logging::EchoLogFormatter;
use messages::{EchoBlob, EchoProbe, EchoProto};

/// Echo service with optional inactivity sweeps
#[derive(Parser, Debug)]
#[command(name = "protomux-echo", version, about = "protomux echo service")]
struct Args {
    /// Path to a YAML config file with an `options:` map
    #[arg(long)]
    config: Option<PathBuf>,

    /// Listen address (overrides config)
    #[arg(long)]
    ip: Option<String>,

    /// Listen port (overrides config)
    #[arg(long)]
    port: Option<u16>,

    /// Idle client disconnect threshold, e.g. 30s; 0s disables the sweep
    #[arg(long, default_value = "30s")]
    idle_timeout: humantime::Duration,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

struct EchoService {
    idle_timeout: std::time::Duration,
    probes_seen: u64,
    peak_clients: usize,
}

impl EchoService {
    fn new(idle_timeout: std::time::Duration) -> Self {
        Self {
            idle_timeout,
            probes_seen: 0,
            peak_clients: 0,
        }
    }
}

impl Module for EchoService {
    type Protocol = EchoProto;

    fn register(reg: &mut ModuleRegistry<Self>) {
        reg.on_reply(|service: &mut Self, _cx, _conn, probe: EchoProbe| {
            service.probes_seen += 1;
            probe
        });
        reg.on_reply(|_service, _cx, _conn, blob: EchoBlob| blob);
    }

    fn on_initialized(&mut self, cx: &mut Context<Self>) {
        info!("echo service starting");
        let threshold = self.idle_timeout;
        if !threshold.is_zero() {
            cx.schedule_every(threshold, move |_service, cx| {
                cx.async_disconnect_inactive_clients(threshold);
            });
        }
    }

    fn on_deinitialized(&mut self, _cx: &mut Context<Self>) {
        info!(
            "echo service stopping; {} probes echoed, {} clients at peak",
            self.probes_seen, self.peak_clients
        );
    }

    fn on_configuration(&mut self, _cx: &mut Context<Self>, opts: &Options) {
        for (key, value) in opts {
            info!("option {} = {}", key, value);
        }
    }

    fn on_connected(&mut self, cx: &mut Context<Self>, conn: Conn) {
        if conn.is_client() {
            self.peak_clients = self.peak_clients.max(cx.client_count());
            info!("client connected ({} up)", cx.client_count());
        }
    }

    fn on_disconnected(&mut self, cx: &mut Context<Self>, conn: Conn) {
        if conn.is_client() {
            info!("client disconnected ({} up)", cx.client_count());
        }
    }

    fn on_command(&mut self, cx: &mut Context<Self>, cmd: &Command) {
        if cmd.name() == "stats" {
            println!(
                "clients={} probes={} unhandled={}",
                cx.client_count(),
                self.probes_seen,
                cx.unhandled_messages()
            );
        }
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .event_format(EchoLogFormatter::new("protomux-echo"))
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(args.log_level.clone())),
        )
        .init();

    let mut opts = load_options(args.config.as_deref())?;
    if let Some(ip) = args.ip {
        opts.insert("Ip".into(), ip);
    }
    if let Some(port) = args.port {
        opts.insert("Port".into(), port.to_string());
    }

    let (_handle, ctrl) = control_channel();
    let service = EchoService::new(*args.idle_timeout);
    run_server(service, &opts, ctrl)?;
    Ok(())
}
