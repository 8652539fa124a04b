//! Bluetooth device registry entry.

use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::{Adapter, Address, Context, Transport};
use std::sync::Arc;

pub(crate) struct DeviceInner {
    ctx: Context,
    adapter: Adapter,
    address: Address,
    dbus_path: String,
    /// Transports of this device, keyed by the D-Bus path of the platform
    /// daemon's transport object. The table entry is the registry reference
    /// of a transport; dropping it makes the transport unreachable.
    transports: Mutex<HashMap<String, Transport>>,
}

/// Remote Bluetooth device with audio transports.
#[derive(Clone)]
pub struct Device {
    inner: Arc<DeviceInner>,
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "Device {{ {} }}", self.address())
    }
}

impl Device {
    /// Creates a registry entry for a remote device.
    pub fn new(ctx: &Context, adapter: &Adapter, address: Address) -> Self {
        let dbus_path =
            format!("/org/bluepcm/{}/dev_{}", adapter.name(), address.to_string().replace(':', "_"));
        Self {
            inner: Arc::new(DeviceInner {
                ctx: ctx.clone(),
                adapter: adapter.clone(),
                address,
                dbus_path,
                transports: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// The adapter the device is connected through.
    pub fn adapter(&self) -> &Adapter {
        &self.inner.adapter
    }

    /// Address of the device.
    pub fn address(&self) -> Address {
        self.inner.address
    }

    pub(crate) fn context(&self) -> &Context {
        &self.inner.ctx
    }

    /// Identity root under which the PCM endpoints of this device are
    /// published.
    pub fn dbus_path(&self) -> &str {
        &self.inner.dbus_path
    }

    /// Looks up a transport by the D-Bus path of its platform daemon
    /// object. The returned handle is a new transport reference.
    pub async fn transport(&self, dbus_path: &str) -> Option<Transport> {
        self.inner.transports.lock().await.get(dbus_path).cloned()
    }

    /// All transports of this device.
    pub async fn transports(&self) -> Vec<Transport> {
        self.inner.transports.lock().await.values().cloned().collect()
    }

    pub(crate) async fn insert_transport(&self, dbus_path: String, transport: Transport) {
        self.inner.transports.lock().await.insert(dbus_path, transport);
    }

    pub(crate) async fn remove_transport(&self, dbus_path: &str) -> Option<Transport> {
        self.inner.transports.lock().await.remove(dbus_path)
    }
}
