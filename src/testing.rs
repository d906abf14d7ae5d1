//! In-memory HID backend for tests

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use hidtray_transport::{
    ContainerId, HidBackend, HidHandle, HotplugCallback, HotplugEvent, HotplugFilter, HotplugKind,
    HotplugRegistration, InterfaceInfo, SharedHandle, TransportError,
};
use hidtray_transport::protocol::hidpp::{
    feature, function, ERROR_10, LONG_LEN, REPORT_LONG, REPORT_SHORT, SHORT_LEN,
};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

/// Produces the input reports a device sends back for one write
pub type Responder = Box<dyn FnMut(&[u8]) -> Vec<Vec<u8>> + Send>;

/// Ordered record of what a mock handle was asked to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Io {
    InputReport(u8),
    Write(Vec<u8>),
}

pub struct MockHandle {
    path: String,
    container: ContainerId,
    responder: Mutex<Responder>,
    pending: Mutex<VecDeque<Vec<u8>>>,
    log: Mutex<Vec<Io>>,
    closed: AtomicBool,
}

impl MockHandle {
    pub fn new(path: &str, container: ContainerId) -> Self {
        Self {
            path: path.to_string(),
            container,
            responder: Mutex::new(Box::new(|_| Vec::new())),
            pending: Mutex::new(VecDeque::new()),
            log: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn with_responder(
        self,
        responder: impl FnMut(&[u8]) -> Vec<Vec<u8>> + Send + 'static,
    ) -> Self {
        *self.responder.lock() = Box::new(responder);
        self
    }

    pub fn log(&self) -> Vec<Io> {
        self.log.lock().clone()
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.log
            .lock()
            .iter()
            .filter_map(|io| match io {
                Io::Write(bytes) => Some(bytes.clone()),
                Io::InputReport(_) => None,
            })
            .collect()
    }

    fn check_open(&self) -> Result<(), TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(TransportError::Disconnected)
        } else {
            Ok(())
        }
    }
}

impl HidHandle for MockHandle {
    fn path(&self) -> &str {
        &self.path
    }

    fn write(&self, data: &[u8]) -> Result<usize, TransportError> {
        self.check_open()?;
        self.log.lock().push(Io::Write(data.to_vec()));
        let replies = {
            let mut responder = self.responder.lock();
            (&mut **responder)(data)
        };
        self.pending.lock().extend(replies);
        Ok(data.len())
    }

    fn read_timeout(&self, buf: &mut [u8], timeout_ms: i32) -> Result<usize, TransportError> {
        self.check_open()?;
        let next = self.pending.lock().pop_front();
        match next {
            Some(report) => {
                let n = report.len().min(buf.len());
                buf[..n].copy_from_slice(&report[..n]);
                Ok(n)
            }
            None => {
                let wait = timeout_ms.clamp(0, 10) as u64;
                std::thread::sleep(Duration::from_millis(wait));
                Ok(0)
            }
        }
    }

    fn get_input_report(&self, buf: &mut [u8]) -> Result<usize, TransportError> {
        self.check_open()?;
        self.log.lock().push(Io::InputReport(buf.first().copied().unwrap_or(0)));
        Ok(buf.len())
    }

    fn container_id(&self) -> Result<ContainerId, TransportError> {
        self.check_open()?;
        Ok(self.container)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

type Registered = (HotplugFilter, HotplugKind, HotplugCallback);

/// Runs after a successful `open_path`, before the handle is returned
pub type OpenHook = Arc<dyn Fn(&str) + Send + Sync>;

/// Backend serving a fixed set of interfaces and handles
#[derive(Default)]
pub struct MockBackend {
    interfaces: Mutex<Vec<InterfaceInfo>>,
    handles: Mutex<HashMap<String, Arc<MockHandle>>>,
    opened: Mutex<Vec<String>>,
    callbacks: Mutex<Vec<Registered>>,
    on_open: Mutex<Option<OpenHook>>,
}

impl MockBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make an interface enumerable and openable
    pub fn add(&self, info: InterfaceInfo, handle: Arc<MockHandle>) {
        self.handles.lock().insert(info.path.clone(), handle);
        self.interfaces.lock().push(info);
    }

    /// Make an interface enumerable without a handle behind it
    pub fn add_unopenable(&self, info: InterfaceInfo) {
        self.interfaces.lock().push(info);
    }

    pub fn unplug(&self, path: &str) {
        self.interfaces.lock().retain(|i| i.path != path);
    }

    /// Paths passed to `open_path`, in call order
    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().clone()
    }

    pub fn set_on_open(&self, hook: Option<OpenHook>) {
        *self.on_open.lock() = hook;
    }

    pub fn registration_count(&self) -> usize {
        self.callbacks.lock().len()
    }

    /// Deliver a hotplug event to every matching registration
    pub fn fire(&self, kind: HotplugKind, interface: InterfaceInfo) {
        let targets: Vec<HotplugCallback> = self
            .callbacks
            .lock()
            .iter()
            .filter(|(filter, k, _)| {
                *k == kind && filter.matches(interface.vendor_id, interface.product_id)
            })
            .map(|(_, _, cb)| Arc::clone(cb))
            .collect();
        for callback in targets {
            callback(HotplugEvent {
                kind,
                interface: interface.clone(),
            });
        }
    }
}

impl HidBackend for MockBackend {
    fn enumerate(
        &self,
        vendor_id: u16,
        product_id: u16,
    ) -> Result<Vec<InterfaceInfo>, TransportError> {
        let filter = HotplugFilter {
            vendor_id,
            product_id,
        };
        Ok(self
            .interfaces
            .lock()
            .iter()
            .filter(|i| filter.matches(i.vendor_id, i.product_id))
            .cloned()
            .collect())
    }

    fn open_path(&self, path: &str) -> Result<SharedHandle, TransportError> {
        self.opened.lock().push(path.to_string());
        let handle = match self.handles.lock().get(path) {
            Some(handle) => Arc::clone(handle) as SharedHandle,
            None => return Err(TransportError::DeviceNotFound(path.to_string())),
        };
        let hook = self.on_open.lock().clone();
        if let Some(hook) = hook {
            hook(path);
        }
        Ok(handle)
    }

    fn register_hotplug(
        &self,
        filter: HotplugFilter,
        kind: HotplugKind,
        enumerate_existing: bool,
        callback: HotplugCallback,
    ) -> Result<HotplugRegistration, TransportError> {
        self.callbacks
            .lock()
            .push((filter, kind, Arc::clone(&callback)));
        if enumerate_existing && kind == HotplugKind::Arrived {
            let existing = self.enumerate(filter.vendor_id, filter.product_id)?;
            for interface in existing {
                callback(HotplugEvent { kind, interface });
            }
        }
        Ok(HotplugRegistration::detached(CancellationToken::new()))
    }
}

/// Sub-device answered by [`hidpp_responder`]
#[derive(Clone)]
pub struct FakeHidpp {
    pub name: &'static str,
    pub kind: u8,
    pub battery: u8,
    pub unified: bool,
}

/// Emulates a receiver (or a direct device at 0xFF)
pub fn hidpp_responder(devices: HashMap<u8, FakeHidpp>) -> impl FnMut(&[u8]) -> Vec<Vec<u8>> + Send {
    move |req: &[u8]| {
        let (index, feat, fn_byte) = (req[1], req[2], req[3]);
        let params = &req[4..];
        let reply = |payload: &[u8]| {
            let mut r = vec![0u8; LONG_LEN];
            r[0] = REPORT_LONG;
            r[1] = index;
            r[2] = feat;
            r[3] = fn_byte;
            r[4..4 + payload.len()].copy_from_slice(payload);
            r
        };
        let error = || {
            let mut r = vec![0u8; SHORT_LEN];
            r[0] = REPORT_SHORT;
            r[1] = index;
            r[2] = ERROR_10;
            r[3] = feat;
            r[4] = fn_byte;
            r[5] = 0x01;
            r
        };

        let Some(device) = devices.get(&index) else {
            return vec![error()];
        };
        let report = match (feat, fn_byte >> 4) {
            (0, function::ROOT_PING) => reply(&[4, 2, params[2]]),
            (0, function::ROOT_GET_FEATURE) => {
                let fi = match u16::from_be_bytes([params[0], params[1]]) {
                    feature::DEVICE_NAME => 1,
                    feature::UNIFIED_BATTERY if device.unified => 2,
                    feature::BATTERY_STATUS if !device.unified => 2,
                    _ => 0,
                };
                reply(&[fi, 0, 0])
            }
            (1, function::NAME_GET_COUNT) => reply(&[device.name.len() as u8]),
            (1, function::NAME_GET_NAME) => {
                let bytes = device.name.as_bytes();
                let start = usize::from(params[0]).min(bytes.len());
                let end = (start + 16).min(bytes.len());
                reply(&bytes[start..end])
            }
            (1, function::NAME_GET_TYPE) => reply(&[device.kind]),
            (2, function::UNIFIED_GET_STATUS) if device.unified => {
                reply(&[device.battery, 0, 1])
            }
            (2, function::BATTERY_GET_LEVEL) if !device.unified => {
                reply(&[device.battery, 0, 0])
            }
            _ => error(),
        };
        vec![report]
    }
}

pub fn mouse() -> FakeHidpp {
    FakeHidpp {
        name: "MX Master 3",
        kind: 3,
        battery: 80,
        unified: true,
    }
}

pub fn keyboard() -> FakeHidpp {
    FakeHidpp {
        name: "G915 TKL LIGHTSPEED Wireless RGB Mechanical Gaming Keyboard",
        kind: 0,
        battery: 55,
        unified: false,
    }
}

/// Interface descriptor shorthand
pub fn interface(path: &str, vendor_id: u16, product_id: u16, usage_page: u16, usage: u16) -> InterfaceInfo {
    InterfaceInfo {
        path: path.to_string(),
        vendor_id,
        product_id,
        usage,
        usage_page,
        interface_number: -1,
        ..Default::default()
    }
}
