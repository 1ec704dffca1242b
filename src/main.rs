//! WiFi Provisioning Service - Main Entry Point

use std::{path::Path, process::ExitCode, sync::Arc};

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use wifi_provisioning_service::{
    CredentialStore, EventDispatcher, ProvisioningOrchestrator, SetupError,
    backend::WifiCtrlBackend,
    config::{CliArgs, Settings},
    core::error::LinkError,
    transport::{
        ble::BleLinkStack,
        unix_socket::{RequestHandler, UnixSocketServer},
    },
};

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,wifi_provisioning_service=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Parse CLI arguments
    let args = CliArgs::parse();
    info!(?args, "Starting WiFi provisioning service");

    match run(Settings::from(args)).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run(settings: Settings) -> Result<(), SetupError> {
    settings.validate()?;

    let store = CredentialStore::new(&settings.store_path);
    store.prepare().await?;

    let network = WifiCtrlBackend::new(settings.interface.clone()).await?;
    info!("Network stack initialized for interface: {}", settings.interface);

    let link = Arc::new(BleLinkStack::new(settings.device_name.clone()).await?);

    let (orchestrator, reports) =
        ProvisioningOrchestrator::new(network, store.clone(), settings.verify);
    let restore = settings.restore_on_start.then(|| orchestrator.clone());

    let (dispatcher, mut dispatcher_task) =
        EventDispatcher::start(link, orchestrator, reports, settings.exchange).await?;

    if let Some(orchestrator) = restore {
        match orchestrator.restore_from_store().await {
            Ok(true) => info!("Re-applying stored network"),
            Ok(false) => info!("No stored network to restore"),
            Err(e) => warn!("Stored network not restored: {}", e),
        }
    }

    // Start status socket, preferring a listener handed over by systemd
    let handler = RequestHandler::new(dispatcher.clone(), store);
    let server = match UnixSocketServer::inherited(handler.clone(), dispatcher.clone())? {
        Some(server) => Some(server),
        None if settings.enable_unix_socket => Some(
            UnixSocketServer::bind(
                Path::new(&settings.socket_path),
                settings.socket_mode,
                handler,
                dispatcher.clone(),
            )
            .await?,
        ),
        None => None,
    };
    let socket_task = server.map(|server| tokio::spawn(server.run()));

    #[cfg(feature = "systemd")]
    if let Err(e) = sd_notify::notify(false, &[sd_notify::NotifyState::Ready]) {
        warn!("sd_notify READY failed: {}", e);
    }

    info!("Service started successfully");

    // Wait for shutdown signal
    let result = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received SIGINT (Ctrl+C), shutting down gracefully");
            Ok(())
        }
        _ = shutdown_signal() => {
            info!("Received SIGTERM, shutting down gracefully");
            Ok(())
        }
        joined = &mut dispatcher_task => match joined {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(SetupError::Link(e)),
            Err(e) => Err(SetupError::Link(LinkError::Unavailable(e.to_string()))),
        },
    };

    #[cfg(feature = "systemd")]
    let _ = sd_notify::notify(false, &[sd_notify::NotifyState::Stopping]);

    info!("Shutting down...");
    dispatcher.shutdown().await;
    if let Some(task) = socket_task {
        task.abort();
    }
    result
}

async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            warn!("Cannot listen for SIGTERM: {}", e);
            std::future::pending::<()>().await
        }
    }
}
