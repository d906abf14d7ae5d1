//! Foreground monitor
//!
//! - Prints a tooltip line (or a JSON event) whenever a device changes
//! - SIGUSR1 forces a battery refresh of every device
//! - SIGHUP reloads the settings file
//! - Ctrl-C shuts down cleanly

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use hidtray::{
    DeviceManager, DeviceTable, EventPublisher, PollContext, PowerSupplyExporter, Settings,
    SharedSettings,
};
use hidtray_transport::{BoxedBackend, HidApiBackend};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub async fn run(
    settings_path: PathBuf,
    json: bool,
    export_dir: Option<PathBuf>,
) -> anyhow::Result<()> {
    info!("Loading settings from {}", settings_path.display());
    let settings = Settings::load_or_init(&settings_path)?.into_shared();
    let backend: BoxedBackend = Arc::new(HidApiBackend::new().context("initializing hidapi")?);

    let publisher = Arc::new(EventPublisher::new());
    let mut events = publisher.subscribe();

    // Set up Ctrl-C handler
    let shutdown = CancellationToken::new();
    let ctrl_c = shutdown.clone();
    ctrlc::set_handler(move || ctrl_c.cancel()).context("installing Ctrl-C handler")?;

    let manager = DeviceManager::new(
        backend,
        PollContext::new(publisher, Arc::clone(&settings)),
        Handle::current(),
        shutdown.clone(),
    );
    manager.start().context("starting device discovery")?;
    spawn_signal_handlers(&manager, &settings, &settings_path, &shutdown)?;

    let mut exporter = export_dir
        .map(PowerSupplyExporter::new)
        .transpose()
        .context("creating export directory")?;
    let mut table = DeviceTable::new();

    eprintln!("Ready. Ctrl+C to stop.");
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            event = events.recv() => {
                let Some(event) = event else {
                    break;
                };
                if json {
                    println!("{}", serde_json::to_string(&event)?);
                }
                let Some(status) = table.apply(&event) else {
                    continue;
                };
                if !json {
                    println!("{}", status.tooltip());
                }
                if let Some(exporter) = exporter.as_mut() {
                    if let Err(e) = exporter.sync(status) {
                        warn!(device = %status.device_id, "Export failed: {}", e);
                    }
                }
            }
        }
    }

    info!("Shutting down");
    let stopping = Arc::clone(&manager);
    tokio::task::spawn_blocking(move || stopping.shutdown()).await?;
    Ok(())
}

fn reload_settings(settings: &SharedSettings, path: &Path) {
    match Settings::load(path) {
        Ok(fresh) => {
            *settings.write() = fresh;
            info!("Settings reloaded from {}", path.display());
        }
        Err(e) => warn!("Keeping current settings: {e:#}"),
    }
}

#[cfg(unix)]
fn spawn_signal_handlers(
    manager: &Arc<DeviceManager>,
    settings: &SharedSettings,
    path: &Path,
    shutdown: &CancellationToken,
) -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut refresh = signal(SignalKind::user_defined1()).context("installing SIGUSR1 handler")?;
    let mut reload = signal(SignalKind::hangup()).context("installing SIGHUP handler")?;

    let manager = Arc::clone(manager);
    let settings = Arc::clone(settings);
    let path = path.to_path_buf();
    let shutdown = shutdown.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                Some(()) = refresh.recv() => {
                    info!("Refresh requested");
                    manager.force_battery_updates().await;
                }
                Some(()) = reload.recv() => reload_settings(&settings, &path),
            }
        }
    });
    Ok(())
}

#[cfg(not(unix))]
fn spawn_signal_handlers(
    _manager: &Arc<DeviceManager>,
    _settings: &SharedSettings,
    _path: &Path,
    _shutdown: &CancellationToken,
) -> anyhow::Result<()> {
    Ok(())
}
