use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use derive_more::Display;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod buffer;

pub use buffer::DeviceBuffer;

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("device unavailable: {0}")]
    Unavailable(DeviceKey),
    #[error("allocation failure: {0} bytes on {1} exceeds limit {2}")]
    Allocation(usize, DeviceKey, usize),
    #[error("remote platform not supported: {0}")]
    Remote(String),
}

/// How a device addresses memory. Unified devices share the host address
/// space; replicas on them can alias host bytes without copying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
pub enum Addressing {
    Unified,
    Discrete,
}

/// Identifies one device as `(service_id, device_id)`.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize,
)]
#[display("({service}, {device})")]
pub struct DeviceKey {
    pub service: usize,
    pub device: usize,
}

impl DeviceKey {
    #[inline]
    pub const fn new(service: usize, device: usize) -> Self {
        Self { service, device }
    }
}

#[derive(Debug)]
struct DeviceInfo {
    /// Live allocation in bytes, tracked against `memory_limit`.
    allocated: AtomicUsize,
}

#[derive(Debug)]
struct ServiceInfo {
    name: String,
    addressing: Addressing,
    memory_limit: Option<usize>,
    devices: Vec<DeviceInfo>,
}

#[derive(Debug)]
struct PlatformInner {
    services: Vec<ServiceInfo>,
    service_priority: Vec<usize>,
    device_id_priority: Vec<usize>,
    timeout: Option<Duration>,
    /// Bytes scheduled for inter-replica transfer, for migration accounting.
    copies: AtomicUsize,
}

/// Enumerates the services and devices of one process.
///
/// The host cpu service (one unified device) always exists. Additional
/// services are registered through [`PlatformBuilder`]; without an
/// accelerator driver in the core they are simulated discrete address
/// spaces, which is all the replica cache can observe anyway.
#[derive(Debug, Clone)]
pub struct Platform(Arc<PlatformInner>);

impl Default for Platform {
    fn default() -> Self {
        PlatformBuilder::new().build()
    }
}

impl Platform {
    /// The host cpu device, guaranteed to exist.
    #[inline]
    pub fn host(&self) -> Device {
        Device {
            platform: self.clone(),
            key: DeviceKey::new(0, 0),
        }
    }

    /// Looks up a device by key.
    pub fn device(&self, key: DeviceKey) -> Result<Device, DeviceError> {
        let service = self
            .0
            .services
            .get(key.service)
            .ok_or(DeviceError::Unavailable(key))?;
        match key.device < service.devices.len() {
            true => Ok(Device {
                platform: self.clone(),
                key,
            }),
            false => Err(DeviceError::Unavailable(key)),
        }
    }

    /// Walks the service priority list and returns the first present
    /// device: the one at `device_id_priority[0]` if the service has it,
    /// else that id modulo the service's device count. Falls back to the
    /// host cpu.
    pub fn default_device(&self) -> Device {
        let preferred = self.0.device_id_priority.first().copied().unwrap_or(0);
        for &service in &self.0.service_priority {
            let Some(info) = self.0.services.get(service) else {
                continue;
            };
            if info.devices.is_empty() {
                continue;
            }
            let device = match preferred < info.devices.len() {
                true => preferred,
                false => preferred % info.devices.len(),
            };
            return Device {
                platform: self.clone(),
                key: DeviceKey::new(service, device),
            };
        }
        self.host()
    }

    /// Remote platforms are specified by URL but not implemented in the core.
    pub fn open_remote(&self, url: &str) -> Result<Device, DeviceError> {
        log::error!("remote platform requested: {url}");
        Err(DeviceError::Remote(url.into()))
    }

    pub fn service_count(&self) -> usize {
        self.0.services.len()
    }

    pub fn device_count(&self, service: usize) -> usize {
        self.0
            .services
            .get(service)
            .map(|s| s.devices.len())
            .unwrap_or(0)
    }

    /// Total bytes scheduled for inter-replica copies since construction.
    #[inline]
    pub fn copied_bytes(&self) -> usize {
        self.0.copies.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn note_copy(&self, bytes: usize) {
        self.0.copies.fetch_add(bytes, Ordering::Relaxed);
    }

    fn service(&self, key: DeviceKey) -> &ServiceInfo {
        &self.0.services[key.service]
    }
}

/// Builds a [`Platform`] with explicit services, priorities, and limits.
#[derive(Debug)]
pub struct PlatformBuilder {
    services: Vec<ServiceInfo>,
    device_id_priority: Vec<usize>,
    timeout: Option<Duration>,
}

impl Default for PlatformBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PlatformBuilder {
    pub fn new() -> Self {
        let cpu = ServiceInfo {
            name: "cpu".into(),
            addressing: Addressing::Unified,
            memory_limit: None,
            devices: vec![DeviceInfo {
                allocated: AtomicUsize::new(0),
            }],
        };
        Self {
            services: vec![cpu],
            device_id_priority: vec![0],
            timeout: None,
        }
    }

    /// Registers a discrete service with `devices` simulated devices.
    pub fn service(mut self, name: impl Into<String>, devices: usize) -> Self {
        let devices = (0..devices)
            .map(|_| DeviceInfo {
                allocated: AtomicUsize::new(0),
            })
            .collect();
        self.services.push(ServiceInfo {
            name: name.into(),
            addressing: Addressing::Discrete,
            memory_limit: None,
            devices,
        });
        self
    }

    /// Caps the live allocation of every device of the last registered
    /// service.
    pub fn memory_limit(mut self, limit: usize) -> Self {
        if let Some(service) = self.services.last_mut() {
            service.memory_limit = Some(limit);
        }
        self
    }

    /// Blocking-wait deadline inherited by every device. `None` waits
    /// forever.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Preferred device id per service when selecting defaults.
    pub fn device_id_priority(mut self, priority: impl Into<Vec<usize>>) -> Self {
        self.device_id_priority = priority.into();
        self
    }

    pub fn build(self) -> Platform {
        // accelerators first, the guaranteed cpu service last
        let mut service_priority: Vec<usize> = (1..self.services.len()).collect();
        service_priority.push(0);
        Platform(Arc::new(PlatformInner {
            services: self.services,
            service_priority,
            device_id_priority: self.device_id_priority,
            timeout: self.timeout,
            copies: AtomicUsize::new(0),
        }))
    }
}

/// A lightweight handle to one device of a platform.
#[derive(Debug, Clone)]
pub struct Device {
    platform: Platform,
    key: DeviceKey,
}

impl PartialEq for Device {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.platform.0, &other.platform.0) && self.key == other.key
    }
}

impl Eq for Device {}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = &self.platform.service(self.key).name;
        write!(f, "{}:{}", name, self.key.device)
    }
}

impl Device {
    #[inline]
    pub fn key(&self) -> DeviceKey {
        self.key
    }

    #[inline]
    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    #[inline]
    pub fn addressing(&self) -> Addressing {
        self.platform.service(self.key).addressing
    }

    #[inline]
    pub fn is_unified(&self) -> bool {
        self.addressing() == Addressing::Unified
    }

    /// Blocking-wait deadline for streams and events on this device.
    #[inline]
    pub fn timeout(&self) -> Option<Duration> {
        self.platform.0.timeout
    }

    #[inline]
    pub fn same_service(&self, other: &Device) -> bool {
        self.key.service == other.key.service
    }

    /// Live allocation in bytes.
    pub fn allocated(&self) -> usize {
        self.platform.service(self.key).devices[self.key.device]
            .allocated
            .load(Ordering::Relaxed)
    }

    pub(crate) fn reserve(&self, bytes: usize) -> Result<(), DeviceError> {
        let service = self.platform.service(self.key);
        let info = &service.devices[self.key.device];
        let allocated = info.allocated.fetch_add(bytes, Ordering::Relaxed) + bytes;
        match service.memory_limit {
            Some(limit) if allocated > limit => {
                info.allocated.fetch_sub(bytes, Ordering::Relaxed);
                Err(DeviceError::Allocation(bytes, self.key, limit))
            }
            _ => Ok(()),
        }
    }

    pub(crate) fn release(&self, bytes: usize) {
        self.platform.service(self.key).devices[self.key.device]
            .allocated
            .fetch_sub(bytes, Ordering::Relaxed);
    }
}
