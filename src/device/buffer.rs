use std::sync::Arc;

use parking_lot::RwLock;

use super::{Addressing, Device, DeviceError};
use crate::stream::{DeviceStream, StreamError};

pub(crate) type Bytes = Arc<RwLock<Box<[u8]>>>;

/// Allocation record of one byte region; releases its reservation on drop.
#[derive(Debug)]
struct Region {
    data: Bytes,
    owner: Device,
    size: usize,
}

impl Drop for Region {
    fn drop(&mut self) {
        self.owner.release(self.size);
    }
}

/// A contiguous byte region resident on one device.
///
/// Unified aliases of one region share the same bytes; cloning a buffer
/// never copies. All copy primitives move bytes only; versioning is owned
/// entirely by the storage layer.
#[derive(Debug, Clone)]
pub struct DeviceBuffer {
    device: Device,
    region: Arc<Region>,
}

impl DeviceBuffer {
    /// Allocates a zero-initialized region of `size` bytes on `device`.
    pub fn alloc(device: &Device, size: usize) -> Result<Self, DeviceError> {
        device.reserve(size)?;
        let region = Region {
            data: Arc::new(RwLock::new(vec![0u8; size].into_boxed_slice())),
            owner: device.clone(),
            size,
        };
        Ok(Self {
            device: device.clone(),
            region: Arc::new(region),
        })
    }

    /// Allocates on `device` and synchronously seeds the region from host
    /// bytes. Used when a storage is created from existing host elements.
    pub fn from_host(device: &Device, bytes: &[u8]) -> Result<Self, DeviceError> {
        let buffer = Self::alloc(device, bytes.len())?;
        buffer.region.data.write().copy_from_slice(bytes);
        Ok(buffer)
    }

    /// Re-homes the same byte region on another unified device of the same
    /// address space. This is the zero-copy replica path.
    pub fn alias_on(&self, device: &Device) -> Self {
        debug_assert_eq!(device.addressing(), Addressing::Unified);
        Self {
            device: device.clone(),
            region: self.region.clone(),
        }
    }

    #[inline]
    pub fn device(&self) -> &Device {
        &self.device
    }

    #[inline]
    pub fn addressing(&self) -> Addressing {
        self.device.addressing()
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.region.size
    }

    /// `true` when both buffers alias one byte region.
    #[inline]
    pub fn shares_region(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.region, &other.region)
    }

    /// Enqueues an asynchronous clear of the region.
    pub fn zero(&self, stream: &DeviceStream) {
        let data = self.region.data.clone();
        stream.enqueue(move || {
            data.write().fill(0);
            Ok(())
        });
    }

    /// Enqueues a copy from another buffer: peer on one service, or between
    /// a device and the host address space. Two discrete buffers on
    /// different services have no direct path and must stage through the
    /// host.
    pub fn copy_async_from(&self, from: &DeviceBuffer, stream: &DeviceStream) {
        debug_assert!(
            self.device.same_service(from.device())
                || self.addressing() == Addressing::Unified
                || from.addressing() == Addressing::Unified
        );
        debug_assert_eq!(self.size(), from.size());
        if self.shares_region(from) {
            return;
        }
        self.device.platform().note_copy(self.size());
        let src = from.region.data.clone();
        let dst = self.region.data.clone();
        stream.enqueue(move || {
            // staging through a scratch vec keeps at most one region locked
            let bytes = src.read().to_vec();
            dst.write().copy_from_slice(&bytes);
            Ok(())
        });
    }

    /// Enqueues an asynchronous host-to-device copy.
    pub fn copy_async_from_host(&self, from: Arc<[u8]>, stream: &DeviceStream) {
        debug_assert_eq!(self.size(), from.len());
        self.device.platform().note_copy(self.size());
        let dst = self.region.data.clone();
        stream.enqueue(move || {
            dst.write().copy_from_slice(&from);
            Ok(())
        });
    }

    /// Synchronous drain: enqueues a device-to-host copy and waits for it.
    pub fn copy_to_host(&self, stream: &DeviceStream) -> Result<Vec<u8>, StreamError> {
        self.device.platform().note_copy(self.size());
        let (sender, receiver) = flume::bounded(1);
        let src = self.region.data.clone();
        stream.enqueue(move || {
            let _ = sender.send(src.read().to_vec());
            Ok(())
        });
        match stream.timeout() {
            None => receiver.recv().map_err(|_| stream.drain_error()),
            Some(timeout) => receiver.recv_timeout(timeout).map_err(|err| match err {
                flume::RecvTimeoutError::Timeout => StreamError::TimedOut(timeout),
                flume::RecvTimeoutError::Disconnected => stream.drain_error(),
            }),
        }
    }

    /// Immediate copy on the calling thread, used by the host staging path.
    pub(crate) fn fill_from(&self, from: &DeviceBuffer) {
        debug_assert_eq!(self.size(), from.size());
        if self.shares_region(from) {
            return;
        }
        self.device.platform().note_copy(self.size());
        let bytes = from.region.data.read().to_vec();
        self.region.data.write().copy_from_slice(&bytes);
    }

    pub(crate) fn bytes(&self) -> Bytes {
        self.region.data.clone()
    }

    /// Snapshot of the region on the calling thread.
    pub(crate) fn read_bytes(&self) -> Vec<u8> {
        self.region.data.read().to_vec()
    }
}
