//! NHRP route daemon
//!
//! Connects to zebra, mirrors redistributed routes and keeps the session
//! alive across zebra restarts. The NHRP protocol layer links the library
//! directly; this binary runs the route core on its own with the interface
//! registry seeded from configuration.

use anyhow::Context;
use clap::Parser;
use futures::{SinkExt, StreamExt};
use nhrp_types::IpPrefix;
use nhrpd_route::{
    BindingCache, Collaborators, IfIndex, InterfaceEvent, InterfaceTable, NhrpRouting,
    RoutedConfig, ZapiCodec,
};
use std::path::PathBuf;
use tokio::net::UnixStream;
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "nhrp-routed", version, about = "NHRP route-resolution daemon")]
struct Args {
    /// Configuration file
    #[arg(short, long, default_value = nhrpd_route::config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log level, overrides the configuration file
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = RoutedConfig::load_or_default(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    config.validate().context("invalid configuration")?;

    let level = args.log_level.as_deref().unwrap_or(&config.logging.level);
    init_logging(level)?;

    info!(socket = %config.zebra.socket_path, "nhrp-routed: Starting");

    match run_daemon(config).await {
        Ok(()) => {
            info!("nhrp-routed: Daemon exiting normally");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "nhrp-routed: Daemon exiting with error");
            Err(e)
        }
    }
}

/// Initialize structured logging; `RUST_LOG` wins over `level`.
fn init_logging(level: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .compact()
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to set logger: {e}"))
}

/// Cancelled on SIGINT
fn setup_signal_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();

    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("nhrp-routed: Received SIGINT");
            child.cancel();
        }
    });

    token
}

struct Daemon {
    routing: NhrpRouting,
    interfaces: InterfaceTable,
    cache: BindingCache,
}

async fn run_daemon(config: RoutedConfig) -> anyhow::Result<()> {
    let shutdown = setup_signal_handler();

    let mut daemon = Daemon {
        routing: NhrpRouting::new(config.zebra.instance),
        interfaces: config.interface_table()?,
        cache: BindingCache::new(),
    };
    daemon.routing.init();
    info!(interfaces = daemon.interfaces.len(), "nhrp-routed: Route core ready");

    loop {
        let connect = tokio::select! {
            _ = shutdown.cancelled() => break,
            res = UnixStream::connect(&config.zebra.socket_path) => res,
        };

        match connect {
            Ok(stream) => {
                info!("nhrp-routed: Connected to zebra");
                daemon.serve(stream, &shutdown).await?;
                if shutdown.is_cancelled() {
                    break;
                }
            }
            Err(e) => warn!(error = %e, "nhrp-routed: zebra connect failed"),
        }

        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(config.reconnect_interval()) => {}
        }
    }

    daemon.routing.shutdown();
    info!("nhrp-routed: Graceful shutdown complete");
    Ok(())
}

impl Daemon {
    /// Pumps one zebra connection until it drops or shutdown is requested.
    async fn serve(
        &mut self,
        stream: UnixStream,
        shutdown: &CancellationToken,
    ) -> anyhow::Result<()> {
        let (mut sink, mut frames) = Framed::new(stream, ZapiCodec).split();
        let (tx, mut rx) = mpsc::unbounded_channel();
        self.routing.attach(tx)?;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                Some(frame) = rx.recv() => {
                    if let Err(e) = sink.send(frame).await {
                        warn!(error = %e, "nhrp-routed: zebra write failed");
                        break;
                    }
                }
                inbound = frames.next() => match inbound {
                    Some(Ok(frame)) => self.dispatch(&frame),
                    Some(Err(e)) => {
                        warn!(error = %e, "nhrp-routed: zebra stream error");
                        break;
                    }
                    None => {
                        warn!("nhrp-routed: zebra closed the connection");
                        break;
                    }
                },
            }
        }

        self.routing.detach();
        Ok(())
    }

    fn dispatch(&mut self, frame: &nhrpd_route::ZapiFrame) {
        let mut on_prefix = |prefix: &IpPrefix, deleted: bool| {
            debug!(prefix = %prefix, deleted, "Shortcut prefix change");
        };
        let mut on_event = |ifindex: IfIndex, event: InterfaceEvent| {
            info!(ifindex, ?event, "Interface event");
        };
        let mut collab = Collaborators {
            interfaces: &mut self.interfaces,
            cache: &mut self.cache,
            shortcuts: &mut on_prefix,
            notifier: &mut on_event,
        };

        if let Err(e) = self.routing.handle_frame(&mut collab, frame) {
            warn!(error = %e, frame = %frame, "nhrp-routed: Dropping zebra message");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_defaults() {
        let args = Args::parse_from(["nhrp-routed"]);
        assert_eq!(args.config, PathBuf::from("/etc/frr/nhrp-routed.toml"));
        assert!(args.log_level.is_none());
    }

    #[test]
    fn test_args_overrides() {
        let args = Args::parse_from(["nhrp-routed", "-c", "/tmp/r.toml", "--log-level", "debug"]);
        assert_eq!(args.config, PathBuf::from("/tmp/r.toml"));
        assert_eq!(args.log_level.as_deref(), Some("debug"));
    }
}
