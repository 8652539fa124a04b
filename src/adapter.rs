//! Bluetooth adapter facts consulted by the transport core.

use std::sync::Arc;

use crate::Address;

struct AdapterInner {
    id: u16,
    name: String,
    address: Address,
    esco_supported: bool,
}

/// Local Bluetooth adapter.
///
/// Filled in by the adapter enumeration of the embedding daemon; the
/// transport core consults it for the adapter address of SCO links and for
/// eSCO support, which gates voice codecs other than CVSD.
#[derive(Clone)]
pub struct Adapter {
    inner: Arc<AdapterInner>,
}

impl std::fmt::Debug for Adapter {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "Adapter {{ name: {} }}", self.name())
    }
}

impl Adapter {
    /// Creates an adapter description from its HCI index.
    pub fn new(id: u16, address: Address, esco_supported: bool) -> Self {
        Self { inner: Arc::new(AdapterInner { id, name: format!("hci{}", id), address, esco_supported }) }
    }

    /// HCI device index.
    pub fn id(&self) -> u16 {
        self.inner.id
    }

    /// Adapter name, for example `hci0`.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Address of the adapter.
    pub fn address(&self) -> Address {
        self.inner.address
    }

    /// Whether the adapter supports eSCO links.
    pub fn esco_supported(&self) -> bool {
        self.inner.esco_supported
    }
}
