//! `fleetsyncd`: loads the configuration, opens the database and drives
//! GitOps sweeps and environment health probes until interrupted.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use log::info;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use fleetsync::audit::{AuditSink, QueuedAuditSink, SqliteAuditSink};
use fleetsync::config::loader::validate_config;
use fleetsync::config::{load_config, FleetConfig};
use fleetsync::docker::CliDockerEngine;
use fleetsync::edge::TunnelRegistry;
use fleetsync::environment::store::EnvironmentStore;
use fleetsync::gitops::{
    CliGitClient, GitOpsReconciler, GitOpsStore, ReconcilerSettings, SyncScheduler,
};
use fleetsync::projects::{ComposeProvisioner, ProjectStore};
use fleetsync::worker::BackgroundQueue;
use fleetsync::{
    resolve_secret, Database, EdgeDispatcher, EnvironmentService, FleetError, HealthProber,
    HeartbeatReconciler, TokenEncryptor, TunnelHub,
};

const CONFIG_ENV_VAR: &str = "FLEETSYNC_CONFIG";

fn main() {
    if let Err(e) = run() {
        eprintln!("fleetsyncd: {}", e);
        std::process::exit(1);
    }
}

fn config_path() -> Option<PathBuf> {
    std::env::args()
        .nth(1)
        .or_else(|| std::env::var(CONFIG_ENV_VAR).ok())
        .map(PathBuf::from)
        .or_else(|| {
            dirs::home_dir()
                .map(|home| home.join(".fleetsync").join("config.json"))
                .filter(|path| path.is_file())
        })
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = match config_path() {
        Some(path) => load_config(&path).map_err(FleetError::from)?,
        None => {
            let config = FleetConfig::default();
            validate_config(&config).map_err(FleetError::from)?;
            config
        }
    };
    fleetsync::logging::init_logging(&config.logging)?;
    info!("Starting fleetsyncd v{}", env!("CARGO_PKG_VERSION"));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(serve(config))?;
    Ok(())
}

async fn serve(config: FleetConfig) -> Result<(), FleetError> {
    let db_path = config.database_path().ok_or_else(|| {
        FleetError::Config(fleetsync::ConfigError::Validation {
            message: "could not determine database path".to_string(),
        })
    })?;
    let db = Database::open(&db_path)?;

    let key = resolve_secret(
        config.encryption.key.as_deref(),
        config.encryption.key_file.as_deref(),
        Some(&config.encryption.key_env_var),
    )?;
    let encryptor = Arc::new(TokenEncryptor::from_secret(&key)?);

    let (queue, queue_worker) = BackgroundQueue::start(config.background.queue_capacity);
    let audit: Arc<dyn AuditSink> = Arc::new(QueuedAuditSink::new(
        queue.clone(),
        Arc::new(SqliteAuditSink::new(db.clone())),
    ));

    let environments: Arc<dyn EnvironmentStore> = Arc::new(db.clone());
    let gitops_store: Arc<dyn GitOpsStore> = Arc::new(db.clone());
    let project_store: Arc<dyn ProjectStore> = Arc::new(db.clone());

    let tunnels = Arc::new(TunnelHub::new());
    let registry: Arc<dyn TunnelRegistry> = tunnels.clone();
    let dispatcher = Arc::new(EdgeDispatcher::new(registry)?);
    let prober = Arc::new(HealthProber::new(
        Arc::clone(&environments),
        Arc::clone(&dispatcher),
        Arc::new(CliDockerEngine::new()),
        Arc::clone(&audit),
        config.timeouts.health(),
    ));
    let environment_service = EnvironmentService::new(
        Arc::clone(&environments),
        Arc::clone(&gitops_store),
        Arc::clone(&dispatcher),
        Arc::clone(&prober),
        Arc::clone(&audit),
        config.timeouts.proxy(),
    );
    environment_service.ensure_local_environment()?;
    let heartbeats = HeartbeatReconciler::new(
        Arc::clone(&environments),
        Duration::from_secs(config.heartbeat.stale_after_secs),
    )
    .with_queue(queue.clone());

    let provisioner = Arc::new(ComposeProvisioner::new(
        project_store,
        Arc::clone(&environments),
        Arc::clone(&dispatcher),
        Arc::clone(&audit),
        config.projects_dir(),
        config.timeouts.deploy(),
    ));
    let git = Arc::new(CliGitClient::new(
        config.workspace_dir(),
        config.timeouts.git(),
    ));
    let reconciler = Arc::new(GitOpsReconciler::new(
        gitops_store,
        Arc::clone(&environments),
        git,
        provisioner,
        encryptor,
        Arc::clone(&audit),
        ReconcilerSettings {
            git_timeout: config.timeouts.git(),
            drift_buffer: Duration::from_secs(config.gitops.drift_buffer_secs),
            max_concurrent: config.gitops.max_concurrent_syncs,
        },
    ));

    let shutdown = CancellationToken::new();
    let handler_token = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        handler_token.cancel();
    }) {
        log::warn!("Failed to install Ctrl-C handler: {}", e);
    }

    let sweep_interval = Duration::from_secs(config.gitops.sweep_interval_secs);
    let scheduler = SyncScheduler::new(reconciler, sweep_interval);
    let (trigger_tx, trigger_rx) = broadcast::channel(4);
    let scheduler_task = scheduler.start(trigger_rx);
    // Run one sweep right away instead of waiting a full interval.
    let _ = trigger_tx.send(());

    let probe_task = tokio::spawn(probe_loop(
        environments,
        prober,
        heartbeats,
        tunnels,
        sweep_interval,
        shutdown.clone(),
    ));

    info!(
        "fleetsyncd running: sweeping every {}s, database {}",
        sweep_interval.as_secs(),
        db_path.display()
    );
    shutdown.cancelled().await;

    scheduler.stop();
    if let Err(e) = scheduler_task.await {
        log::error!("GitOps scheduler task failed: {}", e);
    }
    if let Err(e) = probe_task.await {
        log::error!("Health probe task failed: {}", e);
    }

    // The worker exits once the last queue handle is gone.
    drop(scheduler);
    drop(environment_service);
    drop(audit);
    drop(queue);
    match tokio::time::timeout(Duration::from_secs(5), queue_worker).await {
        Ok(Err(e)) => log::error!("Background queue worker failed: {}", e),
        Err(_) => log::warn!("Background queue did not drain before shutdown"),
        Ok(Ok(())) => {}
    }
    info!("fleetsyncd stopped");
    Ok(())
}

/// Probes every enabled environment once per `interval`. An open edge
/// tunnel also counts as an agent keep-alive.
async fn probe_loop(
    environments: Arc<dyn EnvironmentStore>,
    prober: Arc<HealthProber>,
    heartbeats: HeartbeatReconciler,
    tunnels: Arc<TunnelHub>,
    interval: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let envs = match environments.list() {
            Ok(envs) => envs,
            Err(e) => {
                log::error!("Failed to list environments: {}", e);
                continue;
            }
        };
        for env in envs.into_iter().filter(|env| env.enabled) {
            if shutdown.is_cancelled() {
                break;
            }
            if env.is_edge && tunnels.has_active_tunnel(&env.id) {
                heartbeats.touch_in_background(&env.id);
            }
            match prober.probe(&env.id).await {
                Ok(outcome) => log::debug!("Probed {}: {:?}", env.name, outcome),
                Err(e) => log::warn!("Health probe of {} failed: {}", env.name, e),
            }
        }
    }
}
