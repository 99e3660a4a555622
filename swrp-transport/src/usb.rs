//! USB bulk transport over a host-to-host link cable.
//!
//! The link is a pair of bulk endpoints on a bridge chip. Transfers are
//! ordered and reliable at the USB layer; each bulk transfer carries one or
//! more whole SWRP packets.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use nusb::transfer::RequestBuffer;
use nusb::Device;

use crate::error::TransportError;

/// A supported USB link cable bridge chip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsbDeviceId {
    pub vendor_id: u16,
    pub product_id: u16,
    pub name: &'static str,
}

/// Supported bridge chips, by VID:PID.
pub const SUPPORTED_USB_DEVICES: &[UsbDeviceId] = &[
    UsbDeviceId {
        vendor_id: 0x067B,
        product_id: 0x27A1,
        name: "Prolific PL27A1",
    },
    UsbDeviceId {
        vendor_id: 0x05E3,
        product_id: 0x0751,
        name: "Genesys GL3523",
    },
    UsbDeviceId {
        vendor_id: 0x2109,
        product_id: 0x0822,
        name: "VIA VL822",
    },
];

/// Bulk OUT endpoint address (host to peer).
const ENDPOINT_OUT: u8 = 0x01;

/// Bulk IN endpoint address (peer to host).
const ENDPOINT_IN: u8 = 0x81;

/// Bulk transfer buffer size (64 KiB).
const TRANSFER_SIZE: usize = 65536;

/// Bulk-in timeout.
const RECV_TIMEOUT_MS: u64 = 5000;

/// USB bulk transport over a supported link cable.
pub struct UsbTransport {
    interface: Arc<nusb::Interface>,
    connected: Arc<AtomicBool>,
}

impl std::fmt::Debug for UsbTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsbTransport")
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl UsbTransport {
    /// Opens the first supported link cable found on the bus.
    pub async fn open() -> Result<Self, TransportError> {
        let device = Self::find_device()?;
        Self::from_device(device)
    }

    fn find_device() -> Result<Device, TransportError> {
        let devices = nusb::list_devices().map_err(|e| TransportError::Usb(e.to_string()))?;
        for info in devices {
            let matched = SUPPORTED_USB_DEVICES
                .iter()
                .find(|d| d.vendor_id == info.vendor_id() && d.product_id == info.product_id());
            if let Some(id) = matched {
                tracing::info!(
                    "found {} ({:04X}:{:04X})",
                    id.name,
                    id.vendor_id,
                    id.product_id
                );
                return info.open().map_err(|e| TransportError::Usb(e.to_string()));
            }
        }
        Err(TransportError::DeviceNotFound)
    }

    fn from_device(device: Device) -> Result<Self, TransportError> {
        // Link cables expose their bulk endpoints on interface 0.
        let interface = device
            .claim_interface(0)
            .map_err(|e| TransportError::Usb(e.to_string()))?;

        Ok(Self {
            interface: Arc::new(interface),
            connected: Arc::new(AtomicBool::new(true)),
        })
    }

    pub async fn send(&self, data: Bytes) -> Result<(), TransportError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::Disconnected);
        }

        let completion = self.interface.bulk_out(ENDPOINT_OUT, data.to_vec()).await;
        match completion.status {
            Ok(_) => Ok(()),
            Err(e) => {
                self.connected.store(false, Ordering::SeqCst);
                Err(TransportError::Usb(e.to_string()))
            }
        }
    }

    pub async fn recv(&self) -> Result<Bytes, TransportError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::Disconnected);
        }

        let request = RequestBuffer::new(TRANSFER_SIZE);
        let result = tokio::time::timeout(
            Duration::from_millis(RECV_TIMEOUT_MS),
            self.interface.bulk_in(ENDPOINT_IN, request),
        )
        .await;

        match result {
            Ok(completion) => match completion.status {
                Ok(_) => Ok(Bytes::from(completion.data)),
                Err(e) => {
                    self.connected.store(false, Ordering::SeqCst);
                    Err(TransportError::Usb(e.to_string()))
                }
            },
            Err(_) => Err(TransportError::Timeout {
                duration_ms: RECV_TIMEOUT_MS,
            }),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub async fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}
