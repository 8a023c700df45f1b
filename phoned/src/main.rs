//! phoned: keeps a session with the selected phone and exports it as
//! `org.tizen.Phone` on the session bus.

use std::sync::Arc;

use anyhow::Context;
use phoned::records::RecordStore;
use phoned::selection::SelectionStore;
use phoned::{service, Config, Orchestrator};
use phoned_dbus::DbusTransport;
use tokio::sync::mpsc;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("phoned=info".parse()?)
                .add_directive("phoned_dbus=info".parse()?),
        )
        .init();

    let config = Config::load_default().context("Failed to load configuration")?;
    config.validate()?;
    tracing::info!("Starting phoned v{}", env!("CARGO_PKG_VERSION"));

    let transport = DbusTransport::connect()
        .await
        .context("Failed to connect to the message buses")?;

    let selection = SelectionStore::new(config.state_file_path());
    if let Some(path) = selection.path() {
        tracing::debug!("Selected device is remembered in {}", path.display());
    }

    let (notifier, notifications) = mpsc::unbounded_channel();
    let (mut orchestrator, inbox) = Orchestrator::new(
        Arc::new(transport),
        &config,
        selection,
        RecordStore::default(),
        notifier,
    );
    orchestrator.start().await;

    let connection = service::serve(&config.service, orchestrator.sender())
        .await
        .context("Failed to export the phone service")?;
    tokio::spawn(service::forward_notifications(
        connection.clone(),
        config.service.object_path.clone(),
        notifications,
    ));

    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .context("Failed to create SIGTERM handler")?;
    let shutdown = async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => tracing::info!("Received SIGINT (Ctrl+C)"),
            _ = sigterm.recv() => tracing::info!("Received SIGTERM"),
        }
    };

    orchestrator.run(inbox, shutdown).await;
    drop(connection);
    Ok(())
}
