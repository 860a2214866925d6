use std::fmt::Debug;
use std::time::Duration;

use flowhub::actors::RootActor;
use flowhub::rpc::server::start_rpc;
use flowhub::rpc::webhook::start_webhook;
use flowhub::store::Store;
use flowhub::tasks;
use flowhub::{start_hub, Config};
use tracing::{info, info_span, warn};
use tracing_subscriber::{fmt, EnvFilter};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

pub struct ExitMessage(String);

#[tokio::main]
pub async fn main() -> Result<(), ExitMessage> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .pretty()
        .try_init()
        .map_err(|err| ExitMessage(format!("failed to initialize logger: {}", err)))?;

    info!(
        "Starting hub with git version {} ({})",
        flowhub::get_git_version(),
        flowhub::get_git_commit_info()
    );

    let config = Config::parse();
    let _span = info_span!("hub", principal = config.hub.principal.as_str()).entered();

    let store_path = config
        .hub
        .store_path()
        .map_err(|err| ExitMessage(format!("failed to prepare store directory: {}", err)))?;
    let store = Store::new(store_path).map_err(ExitMessage)?;

    let token = tasks::shutdown_token();
    let root_actor = RootActor::start(tasks::task_tracker(), token.clone())
        .await
        .map_err(|err| ExitMessage(format!("failed to start root actor: {}", err)))?;

    let (service, _sweeper) = start_hub(
        &config.hub,
        &config.settlement,
        store,
        root_actor.get_cell(),
    )
    .await
    .map_err(|err| ExitMessage(format!("failed to start hub: {}", err)))?;

    let (rpc_handle, _) = start_rpc(&config.rpc, service.clone())
        .await
        .map_err(|err| ExitMessage(format!("rpc server failed to start: {}", err)))?;

    match config.rpc.webhook_listening_addr.as_deref() {
        Some(addr) => {
            start_webhook(addr, service, token.clone())
                .await
                .map_err(|err| ExitMessage(format!("webhook server failed to start: {}", err)))?;
        }
        None => info!("Webhook listening address not set, settlement events are not received"),
    }

    tokio::select! {
        _ = signal_listener() => {}
        _ = token.cancelled() => warn!("Hub is shutting down on its own"),
    }
    rpc_handle
        .stop()
        .map_err(|err| ExitMessage(format!("failed to stop rpc server: {}", err)))?;
    rpc_handle.stopped().await;
    if !tasks::shutdown(SHUTDOWN_GRACE).await {
        return Err(ExitMessage("background tasks did not stop in time".to_string()));
    }
    info!("Hub stopped");
    Ok(())
}

impl Debug for ExitMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Exit because {}", self.0)
    }
}

#[cfg(target_family = "unix")]
async fn signal_listener() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate()).expect("listen for SIGTERM");
    let mut sigint = signal(SignalKind::interrupt()).expect("listen for SIGINT");

    tokio::select! {
        _ = sigterm.recv() => info!("SIGTERM received, shutting down"),
        _ = sigint.recv() => info!("SIGINT received, shutting down"),
    };
}

#[cfg(not(target_family = "unix"))]
async fn signal_listener() {
    tokio::signal::ctrl_c()
        .await
        .expect("listen for Ctrl-c signal");
    info!("Ctrl-c received, shutting down");
}
