/// USB transport for ANT+ dongles. Device discovery, kernel-driver detach,
/// endpoint detection and interface claiming all happen once at
/// construction; bulk reads run on a dedicated worker thread that hands
/// bytes back over a channel, so the poll loop never blocks on the bus.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

pub use rusb::{Context, UsbContext};
use rusb::{DeviceHandle, Direction, TransferType};

use crate::error::AntError;
use crate::transport::{pad_frame, Transport};
use crate::Result;
use log::{debug, error};

// Dynastream/Garmin ANT+ sticks all share the vendor id; the product id
// varies by stick generation.
const VENDOR_ID: u16 = 0x0FCF;
const RX_BUF_SIZE: usize = 255;
const READ_TIMEOUT: Duration = Duration::from_millis(100);
const WRITE_TIMEOUT: Duration = Duration::from_secs(1);

struct Endpoints {
    interface: u8,
    ep_in: u8,
    ep_out: u8,
}

/// UsbTransport owns the claimed device handle plus the reader worker.
/// The worker is the producer side of a single-producer byte queue; the
/// poll loop drains it through `read`.
pub struct UsbTransport {
    handle: Arc<DeviceHandle<Context>>,
    endpoints: Endpoints,
    inbound: crossbeam_channel::Receiver<Vec<u8>>,
    stop: Arc<AtomicBool>,
    reader: Option<JoinHandle<()>>,
    detached_kernel_driver: bool,
}

impl UsbTransport {
    /// Find and claim the first ANT+ dongle on the bus. Fails when no
    /// matching device is present or the interface cannot be claimed.
    pub fn open(ctx: &mut Context) -> Result<UsbTransport> {
        for device in ctx.devices()?.iter() {
            let device_desc = device.device_descriptor()?;
            if device_desc.vendor_id() != VENDOR_ID {
                continue;
            }
            debug!(
                "found ANT+ dongle {:04x}:{:04x}",
                device_desc.vendor_id(),
                device_desc.product_id()
            );
            // Some sticks enumerate extra interfaces with no data
            // endpoints; keep scanning past devices we cannot drive.
            let endpoints = match Self::find_endpoints(&device) {
                Ok(endpoints) => endpoints,
                Err(_) => {
                    debug!("no usable endpoints, skipping device");
                    continue;
                }
            };
            let mut handle = device.open()?;
            let mut detached = false;
            if handle.kernel_driver_active(endpoints.interface).unwrap_or(false) {
                handle.detach_kernel_driver(endpoints.interface)?;
                detached = true;
            }
            handle.claim_interface(endpoints.interface)?;
            return Ok(Self::spawn_reader(handle, endpoints, detached));
        }
        Err(AntError::NoDevice)
    }

    /// Walk the active configuration for the bulk/interrupt in and out
    /// endpoints of the dongle's data interface.
    fn find_endpoints(device: &rusb::Device<Context>) -> Result<Endpoints> {
        let config = device.active_config_descriptor()?;
        for interface in config.interfaces() {
            for descriptor in interface.descriptors() {
                let mut ep_in = None;
                let mut ep_out = None;
                for endpoint in descriptor.endpoint_descriptors() {
                    match (endpoint.transfer_type(), endpoint.direction()) {
                        (TransferType::Bulk, Direction::In)
                        | (TransferType::Interrupt, Direction::In) => {
                            ep_in = Some(endpoint.address())
                        }
                        (TransferType::Bulk, Direction::Out)
                        | (TransferType::Interrupt, Direction::Out) => {
                            ep_out = Some(endpoint.address())
                        }
                        _ => {}
                    }
                }
                if let (Some(ep_in), Some(ep_out)) = (ep_in, ep_out) {
                    return Ok(Endpoints {
                        interface: descriptor.interface_number(),
                        ep_in,
                        ep_out,
                    });
                }
            }
        }
        Err(AntError::NoDevice)
    }

    fn spawn_reader(
        handle: DeviceHandle<Context>,
        endpoints: Endpoints,
        detached_kernel_driver: bool,
    ) -> UsbTransport {
        let handle = Arc::new(handle);
        let stop = Arc::new(AtomicBool::new(false));
        let (tx, rx) = crossbeam_channel::unbounded();

        let reader_handle = Arc::clone(&handle);
        let reader_stop = Arc::clone(&stop);
        let ep_in = endpoints.ep_in;
        let reader = std::thread::spawn(move || {
            let mut buf = [0u8; RX_BUF_SIZE];
            while !reader_stop.load(Ordering::Relaxed) {
                match reader_handle.read_bulk(ep_in, &mut buf, READ_TIMEOUT) {
                    Ok(len) => {
                        if len > 0 && tx.send(buf[..len].to_vec()).is_err() {
                            break;
                        }
                    }
                    Err(rusb::Error::Timeout) => {}
                    Err(e) => {
                        error!("usb read failed: {}", e);
                        break;
                    }
                }
            }
        });

        UsbTransport {
            handle,
            endpoints,
            inbound: rx,
            stop,
            reader: Some(reader),
            detached_kernel_driver,
        }
    }
}

impl Transport for UsbTransport {
    fn is_valid(&self) -> bool {
        self.reader
            .as_ref()
            .map(|r| !r.is_finished())
            .unwrap_or(false)
    }

    fn write(&mut self, bytes: &[u8]) -> Result<usize> {
        let framed = pad_frame(bytes);
        self.handle
            .write_bulk(self.endpoints.ep_out, &framed, WRITE_TIMEOUT)?;
        // Report the frame length, not the padded transfer length.
        Ok(bytes.len())
    }

    fn read(&mut self) -> Vec<u8> {
        let mut bytes = Vec::new();
        while let Ok(chunk) = self.inbound.try_recv() {
            bytes.extend_from_slice(&chunk);
        }
        bytes
    }
}

impl Drop for UsbTransport {
    // Ordered shutdown: stop the worker, join it, only then release the
    // hardware so the worker never touches a closed handle.
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
        if let Some(handle) = Arc::get_mut(&mut self.handle) {
            let _ = handle.release_interface(self.endpoints.interface);
            if self.detached_kernel_driver {
                let _ = handle.attach_kernel_driver(self.endpoints.interface);
            }
        }
    }
}
