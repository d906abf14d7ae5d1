//! Hotplug notifier
//!
//! Each registration runs on its own named thread, so callbacks are
//! always invoked from a thread the caller does not control. On Linux
//! the thread listens to udev `hidraw` events; elsewhere it diffs the
//! enumeration once per second.

use std::collections::HashMap;
use std::sync::mpsc;
use std::thread::JoinHandle;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::TransportError;
use crate::hid_native::{enumerate_matching, SharedApi};
use crate::types::{HotplugEvent, HotplugFilter, HotplugKind, InterfaceInfo};
use crate::HotplugCallback;

/// Active hotplug registration; dropping it stops the watcher thread
pub struct HotplugRegistration {
    cancel: CancellationToken,
    thread: Option<JoinHandle<()>>,
}

impl HotplugRegistration {
    /// Registration backed by a watcher thread
    pub fn new(cancel: CancellationToken, thread: JoinHandle<()>) -> Self {
        Self {
            cancel,
            thread: Some(thread),
        }
    }

    /// Registration without a thread of its own (the caller drives events)
    pub fn detached(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            thread: None,
        }
    }

    /// Token observed by the watcher
    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Stop the watcher and wait for its thread to exit
    pub fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Hotplug watcher thread panicked");
            }
        }
    }
}

impl Drop for HotplugRegistration {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Interfaces known to a watcher, keyed by path
///
/// Removal notifications only carry the node path; the vendor/product
/// recorded on arrival lets `Left` callbacks honour the filter.
#[derive(Default)]
struct KnownInterfaces {
    by_path: HashMap<String, (u16, u16)>,
}

impl KnownInterfaces {
    fn insert(&mut self, info: &InterfaceInfo) -> bool {
        self.by_path
            .insert(info.path.clone(), (info.vendor_id, info.product_id))
            .is_none()
    }

    fn remove(&mut self, path: &str) -> Option<InterfaceInfo> {
        self.by_path
            .remove(path)
            .map(|(vendor_id, product_id)| InterfaceInfo {
                path: path.to_string(),
                vendor_id,
                product_id,
                interface_number: -1,
                ..Default::default()
            })
    }
}

struct Watcher {
    api: SharedApi,
    filter: HotplugFilter,
    kind: HotplugKind,
    callback: HotplugCallback,
    known: KnownInterfaces,
}

impl Watcher {
    /// Record what is already attached, reporting it if asked to
    fn seed(&mut self, enumerate_existing: bool) -> Result<(), TransportError> {
        for info in enumerate_matching(&self.api, self.filter)? {
            self.known.insert(&info);
            if enumerate_existing && self.kind == HotplugKind::Arrived {
                self.emit(HotplugKind::Arrived, info);
            }
        }
        Ok(())
    }

    fn emit(&self, kind: HotplugKind, interface: InterfaceInfo) {
        if kind != self.kind {
            return;
        }
        debug!(?kind, path = %interface.path, "Hotplug event");
        (self.callback)(HotplugEvent { kind, interface });
    }

    /// A node appeared: report every matching collection it exposes
    fn on_added(&mut self, path: &str) {
        let interfaces = match enumerate_matching(&self.api, self.filter) {
            Ok(list) => list,
            Err(e) => {
                warn!(path, "Enumeration after hotplug add failed: {}", e);
                return;
            }
        };
        for info in interfaces.into_iter().filter(|i| i.path == path) {
            self.known.insert(&info);
            self.emit(HotplugKind::Arrived, info);
        }
    }

    fn on_removed(&mut self, path: &str) {
        if let Some(info) = self.known.remove(path) {
            self.emit(HotplugKind::Left, info);
        }
    }
}

/// Start a watcher thread and wait until it is listening
pub(crate) fn spawn_watcher(
    api: SharedApi,
    filter: HotplugFilter,
    kind: HotplugKind,
    enumerate_existing: bool,
    callback: HotplugCallback,
) -> Result<HotplugRegistration, TransportError> {
    let cancel = CancellationToken::new();
    let (ready_tx, ready_rx) = mpsc::channel::<Result<(), TransportError>>();

    let watcher = Watcher {
        api,
        filter,
        kind,
        callback,
        known: KnownInterfaces::default(),
    };
    let token = cancel.clone();
    let thread = std::thread::Builder::new()
        .name(format!("hid-hotplug-{:04x}", filter.vendor_id))
        .spawn(move || run_watcher(watcher, enumerate_existing, token, ready_tx))
        .map_err(|e| TransportError::Hotplug(format!("spawn watcher: {e}")))?;

    match ready_rx.recv() {
        Ok(Ok(())) => {
            info!(
                "Hotplug {:?} registered for {:04X}:{:04X}",
                kind, filter.vendor_id, filter.product_id
            );
            Ok(HotplugRegistration::new(cancel, thread))
        }
        Ok(Err(e)) => {
            let _ = thread.join();
            Err(e)
        }
        Err(_) => Err(TransportError::Hotplug(
            "watcher exited before starting".into(),
        )),
    }
}

#[cfg(all(target_os = "linux", feature = "hotplug"))]
fn run_watcher(
    mut watcher: Watcher,
    enumerate_existing: bool,
    cancel: CancellationToken,
    ready: mpsc::Sender<Result<(), TransportError>>,
) {
    use futures::StreamExt;
    use tokio_udev::{AsyncMonitorSocket, EventType, MonitorBuilder};

    let rt = match tokio::runtime::Builder::new_current_thread()
        .enable_io()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            let _ = ready.send(Err(e.into()));
            return;
        }
    };

    // Listen before seeding so nothing attached in between is missed
    let socket = {
        let _guard = rt.enter();
        MonitorBuilder::new()
            .and_then(|b| b.match_subsystem("hidraw"))
            .and_then(|b| b.listen())
            .and_then(AsyncMonitorSocket::new)
    };
    let mut socket = match socket {
        Ok(socket) => socket,
        Err(e) => {
            let _ = ready.send(Err(e.into()));
            return;
        }
    };

    if let Err(e) = watcher.seed(enumerate_existing) {
        let _ = ready.send(Err(e));
        return;
    }
    let _ = ready.send(Ok(()));

    rt.block_on(async {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = socket.next() => {
                    let event = match event {
                        Some(Ok(event)) => event,
                        Some(Err(e)) => {
                            warn!("udev monitor error: {}", e);
                            continue;
                        }
                        None => break,
                    };
                    let Some(path) = event
                        .device()
                        .devnode()
                        .map(|p| p.to_string_lossy().to_string())
                    else {
                        continue;
                    };
                    match event.event_type() {
                        EventType::Add => watcher.on_added(&path),
                        EventType::Remove => watcher.on_removed(&path),
                        _ => {}
                    }
                }
            }
        }
    });
    debug!("Hotplug watcher stopped");
}

#[cfg(not(all(target_os = "linux", feature = "hotplug")))]
fn run_watcher(
    mut watcher: Watcher,
    enumerate_existing: bool,
    cancel: CancellationToken,
    ready: mpsc::Sender<Result<(), TransportError>>,
) {
    use std::collections::HashSet;
    use std::time::Duration;

    const POLL_INTERVAL: Duration = Duration::from_secs(1);

    if let Err(e) = watcher.seed(enumerate_existing) {
        let _ = ready.send(Err(e));
        return;
    }
    let _ = ready.send(Ok(()));

    let collection_key = |i: &InterfaceInfo| (i.path.clone(), i.usage_page, i.usage);
    let mut seen: HashSet<(String, u16, u16)> = match enumerate_matching(&watcher.api, watcher.filter)
    {
        Ok(list) => list.iter().map(collection_key).collect(),
        Err(_) => HashSet::new(),
    };

    while !cancel.is_cancelled() {
        std::thread::sleep(POLL_INTERVAL);
        let current = match enumerate_matching(&watcher.api, watcher.filter) {
            Ok(list) => list,
            Err(e) => {
                debug!("Enumeration poll failed: {}", e);
                continue;
            }
        };

        let present: HashSet<String> = current.iter().map(|i| i.path.clone()).collect();
        let gone: Vec<String> = watcher
            .known
            .by_path
            .keys()
            .filter(|p| !present.contains(*p))
            .cloned()
            .collect();
        for path in gone {
            watcher.on_removed(&path);
        }

        let mut next_seen = HashSet::with_capacity(current.len());
        for info in current {
            let key = collection_key(&info);
            if !seen.contains(&key) {
                watcher.known.insert(&info);
                watcher.emit(HotplugKind::Arrived, info);
            }
            next_seen.insert(key);
        }
        seen = next_seen;
    }
    debug!("Hotplug watcher stopped");
}
