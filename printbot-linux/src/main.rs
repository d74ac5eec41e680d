// PrintBot Linux daemon: peer transport, print queue control loop, print job runner.

mod config;
mod control;
mod link;
mod runner;
mod session;
mod transport;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use printbot_core::{BotConfig, DirSpool, PrintBot};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() -> anyhow::Result<()> {
    let mut snapshot_arg = None;
    for arg in std::env::args().skip(1) {
        if arg == "--version" || arg == "-V" {
            println!("printbot-linux {}", VERSION);
            return Ok(());
        }
        snapshot_arg = Some(PathBuf::from(arg));
    }

    let mut cfg = config::load()?;
    if let Some(path) = snapshot_arg {
        cfg.snapshot_path = path;
    }
    init_logging(&cfg.log_level)?;

    let state = session::load_or_create(&cfg.snapshot_path, &cfg.name)?;
    let keypair = Arc::new(state.keypair());
    info!(public_key = %keypair.public_key(), name = %state.name, "PrintBot starting");

    let spool = DirSpool::open(&cfg.spool_dir)
        .with_context(|| format!("opening spool directory {}", cfg.spool_dir.display()))?;
    let runner = runner::CommandRunner::new(&cfg.print, spool.dir().to_path_buf());
    let bot = PrintBot::new(
        spool,
        BotConfig {
            accepted_suffix: cfg.accepted_suffix.clone(),
            report_failures: cfg.report_failures,
        },
    );
    let bootstrap_key = cfg.bootstrap.key()?;
    let bootstrap_addr = format!("{}:{}", cfg.bootstrap.host, cfg.bootstrap.port);

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let listener = tokio::net::TcpListener::bind(("0.0.0.0", cfg.listen_port))
            .await
            .with_context(|| format!("binding port {}", cfg.listen_port))?;
        let link = link::NetLink::new(keypair.clone(), state, bootstrap_addr, bootstrap_key);
        let inbound = link.inbound();
        tokio::spawn(async move {
            if let Err(e) = transport::run_listener(listener, keypair, inbound).await {
                warn!("listener stopped: {e}");
            }
        });
        let control = control::ControlLoop::new(
            bot,
            link,
            runner,
            cfg.snapshot_path.clone(),
            Duration::from_millis(cfg.tick_ms.max(1)),
        );
        control.run(shutdown_signal()).await;
        anyhow::Ok(())
    })
}

/// `RUST_LOG` if set, otherwise the configured filter.
fn init_logging(default_filter: &str) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(e) => {
            if std::env::var(EnvFilter::DEFAULT_ENV).is_ok() {
                anyhow::bail!("RUST_LOG was not understood: {e}");
            }
            EnvFilter::try_new(default_filter)
                .with_context(|| format!("log filter {default_filter:?} was not understood"))?
        }
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                warn!("cannot listen for SIGTERM: {e}");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
