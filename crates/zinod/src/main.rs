//! Zino daemon entry point.
//!
//! Wires configuration, persisted state, the SNMP backend, the scheduler,
//! trap dispatch and the legacy API servers together on a single
//! current-thread runtime, then runs until a termination signal arrives
//! and performs the final synchronous state dump.

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use zino_core::config::{read_configuration, Configuration, DEFAULT_CONFIG_FILE};
use zino_core::config::secrets::read_users;
use zino_core::persist;
use zino_core::ZinoState;

use zinod::api::{ZinoServer, API_PORT, NOTIFY_PORT};
use zinod::dns::NullResolver;
use zinod::engine::Engine;
use zinod::registry::DeviceRegistry;
use zinod::scheduler::Scheduler;
use zinod::snmp::{agent::UptimeAgent, backend_by_name};
use zinod::trapd::TrapDispatcher;

/// Zino is not OpenView.
#[derive(Parser, Debug)]
#[command(name = "zinod", version, about = "Stateful SNMP network monitor")]
struct Args {
    /// Path to the pollfile.
    #[arg(long)]
    polldevs: Option<String>,

    /// Path to the zino configuration file.
    #[arg(long)]
    config_file: Option<String>,

    /// Set the global log level to DEBUG. Very verbose.
    #[arg(long, default_value_t = false)]
    debug: bool,

    /// Stop zino after N seconds.
    #[arg(long, value_name = "N")]
    stop_in: Option<u64>,

    /// UDP port to listen for traps on; 0 disables trap reception.
    #[arg(long, value_name = "PORT")]
    trap_port: Option<u16>,

    /// Switch to this user after binding privileged ports (applied by
    /// external process tooling).
    #[arg(long, value_name = "USER")]
    user: Option<String>,
}

fn main() -> ExitCode {
    let args = Args::parse();
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("zinod: cannot build runtime: {err}");
            return ExitCode::from(1);
        }
    };
    runtime.block_on(run(args))
}

fn init_logging(config: &Configuration, debug: bool) {
    let directives = if debug {
        "debug".to_string()
    } else {
        config.logging.filter.clone()
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&directives));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}

async fn run(args: Args) -> ExitCode {
    let config_path = args
        .config_file
        .clone()
        .or_else(|| Path::new(DEFAULT_CONFIG_FILE).exists().then(|| DEFAULT_CONFIG_FILE.to_string()));
    let config = match read_configuration(
        config_path.as_deref().map(Path::new),
        args.polldevs.as_deref(),
    ) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("zinod: {err}");
            return ExitCode::from(1);
        }
    };
    init_logging(&config, args.debug);

    if let Err(err) = read_users(Path::new(&config.authentication.file)) {
        warn!(%err, file = %config.authentication.file, "cannot read secrets file");
    }
    if let Some(user) = args.user.as_ref().or(config.process.user.as_ref()) {
        debug!(user, "privilege dropping is delegated to process tooling");
    }

    let state = match persist::load_state_from_file(Path::new(&config.persistence.file)) {
        Ok(Some(state)) => state,
        Ok(None) => ZinoState::new(),
        Err(err) => {
            error!(%err, "persisted state is unreadable");
            return ExitCode::from(1);
        }
    };

    let registry = match DeviceRegistry::load(Path::new(&config.polling.file)) {
        Ok(registry) => registry,
        Err(err) => {
            error!(%err, "cannot load pollfile");
            return ExitCode::from(1);
        }
    };
    info!(devices = registry.len(), "pollfile loaded");

    let snmp = match backend_by_name(&config.snmp.backend) {
        Ok(backend) => backend,
        Err(err) => {
            error!(%err, "cannot initialize SNMP backend");
            return ExitCode::from(1);
        }
    };

    let persistence_file = config.persistence.file.clone();
    let trap_port = args.trap_port.unwrap_or(config.snmp.trap.port);
    let agent_config = config.snmp.agent.clone();

    let engine = Engine::new(state, registry, config, snmp.clone(), Arc::new(NullResolver));
    let scheduler = Scheduler::new(engine.clone());
    let token = scheduler.root_token();

    if trap_port != 0 {
        match snmp.open_trap_receiver(trap_port).await {
            Ok(rx) => {
                info!(port = trap_port, "trap receiver listening");
                let dispatcher = TrapDispatcher::new(engine.clone(), scheduler.clone());
                let trap_token = token.clone();
                tokio::spawn(async move { dispatcher.run(rx, trap_token).await });
            }
            Err(err) => {
                error!(port = trap_port, %err, "cannot open trap receiver");
                return ExitCode::from(2);
            }
        }
    }

    let server = match ZinoServer::bind(
        engine.clone(),
        scheduler.clone(),
        "127.0.0.1",
        API_PORT,
        NOTIFY_PORT,
    )
    .await
    {
        Ok(server) => server,
        Err(err) => {
            error!(%err, "cannot bind API servers");
            return ExitCode::from(2);
        }
    };
    let server_token = token.clone();
    tokio::spawn(async move { server.run(server_token).await });

    if agent_config.enabled {
        let agent = Arc::new(UptimeAgent::new(format!("zino {}", zinod::VERSION)));
        let agent_backend = snmp.clone();
        tokio::spawn(async move {
            if let Err(err) = agent_backend.serve_agent(&agent_config, agent).await {
                warn!(%err, "uptime agent stopped");
            }
        });
    }

    scheduler.start();

    if let Some(seconds) = args.stop_in {
        info!(seconds, "instructed to stop after a deadline");
        let stop_token = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(seconds)).await;
            stop_token.cancel();
        });
    }

    wait_for_shutdown(&token).await;
    info!("shutting down, performing final state dump");
    scheduler.cancel_all();
    let final_dump = {
        let state = engine.state();
        persist::dump_state_to_file(&state, Path::new(&persistence_file))
    };
    if let Err(err) = final_dump {
        error!(%err, "final state dump failed");
    }
    ExitCode::SUCCESS
}

async fn wait_for_shutdown(token: &tokio_util::sync::CancellationToken) {
    #[cfg(unix)]
    {
        let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(signal) => signal,
            Err(err) => {
                warn!(%err, "cannot install SIGTERM handler");
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = token.cancelled() => {}
                }
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("interrupted"),
            _ = sigterm.recv() => info!("terminated"),
            _ = token.cancelled() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("interrupted"),
            _ = token.cancelled() => {}
        }
    }
}
