use std::sync::Arc;

use derive_more::Display;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    device::{Addressing, Device, DeviceBuffer, DeviceError, DeviceKey, Platform},
    num::DataType,
    stream::{DeviceStream, StreamError, StreamEvent, StreamId},
};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("read-only violation: storage {0} wraps a read-only reference")]
    ReadOnly(StorageId),
    #[error(transparent)]
    Device(#[from] DeviceError),
    #[error(transparent)]
    Stream(#[from] StreamError),
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize,
)]
#[display("{_0}")]
#[serde(transparent)]
#[repr(transparent)]
pub struct StorageId(uuid::Uuid);

impl StorageId {
    fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

/// Never-written replicas carry this version.
const UNINITIALIZED: i64 = -1;

#[derive(Debug, Clone)]
struct Replica {
    buffer: DeviceBuffer,
    /// The `master_version` this replica last satisfied.
    version: i64,
}

#[derive(Debug, Default)]
struct StorageState {
    master: Option<DeviceKey>,
    master_version: i64,
    replicas: FxHashMap<DeviceKey, Replica>,
    /// Completion of the most recent mutating access, tagged with the
    /// stream that will signal it.
    write_completion: Option<(StreamId, StreamEvent)>,
    /// Set by view-level access when copy-on-write replaced the storage.
    last_access_mutated_view: bool,
}

/// Logical backing of a tensor: one byte region replicated lazily across
/// devices and kept consistent through versioning.
///
/// The master replica carries `master_version`; stale replicas are repaired
/// the next time they are accessed, choosing between zero-copy aliasing,
/// host-staged, peer, and direct transfers. All bookkeeping happens inside a
/// short mutex with the actual byte movement scheduled on the accessing
/// stream.
#[derive(Debug)]
pub struct Storage {
    id: StorageId,
    platform: Platform,
    data_type: DataType,
    count: usize,
    read_only: bool,
    state: Mutex<StorageState>,
}

impl Storage {
    /// Creates a storage with no replicas. The first access lazily
    /// allocates a zero-filled replica.
    pub fn empty(platform: &Platform, data_type: DataType, count: usize) -> Arc<Self> {
        Arc::new(Self {
            id: StorageId::new(),
            platform: platform.clone(),
            data_type,
            count,
            read_only: false,
            state: Mutex::new(StorageState::default()),
        })
    }

    /// Creates a storage seeded from host bytes; the host replica becomes
    /// the master at version zero.
    pub fn from_host_bytes(
        platform: &Platform,
        data_type: DataType,
        count: usize,
        bytes: &[u8],
    ) -> Result<Arc<Self>, StorageError> {
        Self::seeded(platform, data_type, count, bytes, false)
    }

    /// Wraps host bytes as a read-only reference: `read_write` fails with a
    /// read-only violation for the life of the storage.
    pub fn from_host_bytes_read_only(
        platform: &Platform,
        data_type: DataType,
        count: usize,
        bytes: &[u8],
    ) -> Result<Arc<Self>, StorageError> {
        Self::seeded(platform, data_type, count, bytes, true)
    }

    fn seeded(
        platform: &Platform,
        data_type: DataType,
        count: usize,
        bytes: &[u8],
        read_only: bool,
    ) -> Result<Arc<Self>, StorageError> {
        assert_eq!(bytes.len(), count * data_type.size());
        let host = platform.host();
        let buffer = DeviceBuffer::from_host(&host, bytes)?;
        let mut state = StorageState::default();
        state.replicas.insert(host.key(), Replica { buffer, version: 0 });
        state.master = Some(host.key());
        Ok(Arc::new(Self {
            id: StorageId::new(),
            platform: platform.clone(),
            data_type,
            count,
            read_only,
            state: Mutex::new(state),
        }))
    }

    /// Allocates a new storage seeded from `source`'s master contents, with
    /// its master replica on `stream`'s device. This is the copy-on-write
    /// clone path: the copy is scheduled asynchronously and gated by a fresh
    /// write-completion event.
    pub fn clone_on(
        source: &Arc<Storage>,
        stream: &DeviceStream,
    ) -> Result<Arc<Self>, StorageError> {
        let device = stream.device().clone();
        let clone = Self::empty(&source.platform, source.data_type, source.count);
        let src_state = source.state.lock();

        // a write still in flight on another stream must land first
        if let Some((writer, event)) = &src_state.write_completion {
            if *writer != stream.id() {
                stream.wait_for(event);
            }
        }

        let mut state = clone.state.lock();
        if let Some(master_key) = src_state.master {
            let master = src_state.replicas[&master_key].clone();
            let target = DeviceBuffer::alloc(&device, clone.byte_size())?;
            schedule_transfer(&master.buffer, &target, None, 0, stream, |key, replica| {
                state.replicas.insert(key, replica);
            })?;
            state.replicas.insert(device.key(), Replica { buffer: target, version: 0 });
            state.master = Some(device.key());
            state.master_version = 0;
            let event = stream.record(stream.create_event());
            state.write_completion = Some((stream.id(), event));
        }
        drop(state);
        drop(src_state);
        Ok(clone)
    }

    /// Synchronous clone for stream-less host mutation: drains pending
    /// writes, stages the master to the host, and seeds a fresh storage.
    pub fn clone_host(source: &Arc<Storage>) -> Result<Arc<Self>, StorageError> {
        let buffer = source.read_host()?;
        Self::from_host_bytes(
            &source.platform,
            source.data_type,
            source.count,
            &buffer.read_bytes(),
        )
    }

    #[inline]
    pub fn id(&self) -> StorageId {
        self.id
    }

    #[inline]
    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    #[inline]
    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    /// Logical element capacity of the storage.
    #[inline]
    pub fn count(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn byte_size(&self) -> usize {
        self.count * self.data_type.size()
    }

    #[inline]
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn master_version(&self) -> i64 {
        self.state.lock().master_version
    }

    pub fn master(&self) -> Option<DeviceKey> {
        self.state.lock().master
    }

    pub fn replica_version(&self, key: DeviceKey) -> Option<i64> {
        self.state.lock().replicas.get(&key).map(|r| r.version)
    }

    pub fn replica_count(&self) -> usize {
        self.state.lock().replicas.len()
    }

    /// Number of replicas whose version matches the master's.
    pub fn current_replica_count(&self) -> usize {
        let state = self.state.lock();
        state
            .replicas
            .values()
            .filter(|r| r.version == state.master_version && state.master.is_some())
            .count()
    }

    pub fn last_access_mutated_view(&self) -> bool {
        self.state.lock().last_access_mutated_view
    }

    /// The completion event of the most recent scheduled write, if still
    /// pending. Re-recording it on the writer stream places the barrier at
    /// the stream's current tail.
    pub fn write_completion(&self) -> Option<StreamEvent> {
        self.state.lock().write_completion.as_ref().map(|(_, event)| event.clone())
    }

    pub(crate) fn set_last_access_mutated_view(&self, mutated: bool) {
        self.state.lock().last_access_mutated_view = mutated;
    }

    /// Resolves a read-only replica on `stream`'s device, migrating stale
    /// bytes asynchronously on that stream.
    pub fn read_only(&self, stream: &DeviceStream) -> Result<DeviceBuffer, StorageError> {
        self.access(stream, false)
    }

    /// Resolves a mutable replica on `stream`'s device: waits for the
    /// pending write, repairs staleness, promotes the replica to master,
    /// advances the version, and gates later readers on a fresh completion
    /// event.
    pub fn read_write(&self, stream: &DeviceStream) -> Result<DeviceBuffer, StorageError> {
        if self.read_only {
            return Err(StorageError::ReadOnly(self.id));
        }
        self.access(stream, true)
    }

    /// Host fetch without a stream: blocks the caller until pending writes
    /// land, then stages the master to the host synchronously.
    pub fn read_host(&self) -> Result<DeviceBuffer, StorageError> {
        self.host_access(false)
    }

    /// Host mutation without a stream; synchronous counterpart of
    /// [`Storage::read_write`].
    pub fn write_host(&self) -> Result<DeviceBuffer, StorageError> {
        if self.read_only {
            return Err(StorageError::ReadOnly(self.id));
        }
        self.host_access(true)
    }

    fn access(&self, stream: &DeviceStream, mutating: bool) -> Result<DeviceBuffer, StorageError> {
        let device = stream.device().clone();
        let key = device.key();
        let mut state = self.state.lock();

        if let Some((writer, event)) = &state.write_completion {
            // same-stream submissions are already ordered by the FIFO
            if *writer != stream.id() {
                stream.wait_for(event);
            }
        }

        self.ensure_replica(&mut state, &device)?;
        self.migrate(&mut state, &device, stream)?;

        // only mutating access records a completion; migrations are ordered
        // by the accessing stream's FIFO and the wait above
        if mutating {
            state.master_version += 1;
            state.master = Some(key);
            let version = state.master_version;
            state
                .replicas
                .get_mut(&key)
                .expect("replica resolved above")
                .version = version;
            let event = stream.record(stream.create_event());
            state.write_completion = Some((stream.id(), event));
        }
        Ok(state.replicas[&key].buffer.clone())
    }

    fn host_access(&self, mutating: bool) -> Result<DeviceBuffer, StorageError> {
        let host = self.platform.host();
        let key = host.key();
        let mut state = self.state.lock();

        if let Some((_, event)) = state.write_completion.take() {
            event.wait(host.timeout())?;
        }

        self.ensure_replica(&mut state, &host)?;
        if let Some(master_key) = state.master {
            let master_version = state.master_version;
            if master_key != key && state.replicas[&key].version != master_version {
                let master = state.replicas[&master_key].clone();
                let target = state.replicas.get_mut(&key).expect("replica resolved above");
                target.buffer.fill_from(&master.buffer);
                target.version = master_version;
            }
        }
        if mutating {
            state.master_version += 1;
            state.master = Some(key);
            let version = state.master_version;
            state
                .replicas
                .get_mut(&key)
                .expect("replica resolved above")
                .version = version;
        }
        Ok(state.replicas[&key].buffer.clone())
    }

    /// Resolves or lazily creates the replica for `device`. Creation on a
    /// unified device aliases a unified master zero-copy; otherwise a fresh
    /// uninitialized region is allocated.
    fn ensure_replica(
        &self,
        state: &mut StorageState,
        device: &Device,
    ) -> Result<(), DeviceError> {
        let key = device.key();
        if state.replicas.contains_key(&key) {
            return Ok(());
        }
        if device.is_unified() {
            if let Some(master_key) = state.master {
                let master = &state.replicas[&master_key];
                if master.buffer.addressing() == Addressing::Unified {
                    let replica = Replica {
                        buffer: master.buffer.alias_on(device),
                        version: master.version,
                    };
                    state.replicas.insert(key, replica);
                    return Ok(());
                }
            }
        }
        let buffer = DeviceBuffer::alloc(device, self.byte_size())?;
        state.replicas.insert(
            key,
            Replica {
                buffer,
                version: UNINITIALIZED,
            },
        );
        Ok(())
    }

    /// Repairs a stale replica from the master, scheduling byte movement on
    /// `stream`.
    fn migrate(
        &self,
        state: &mut StorageState,
        device: &Device,
        stream: &DeviceStream,
    ) -> Result<(), StorageError> {
        let key = device.key();
        let Some(master_key) = state.master else {
            // never written: any replica is a valid zero initializer
            return Ok(());
        };
        let master_version = state.master_version;
        if master_key == key || state.replicas[&key].version == master_version {
            return Ok(());
        }

        let master = state.replicas[&master_key].clone();
        let target = state.replicas[&key].clone();
        match (master.buffer.addressing(), target.buffer.addressing()) {
            (Addressing::Unified, Addressing::Unified) => {
                // same address space: re-point instead of copying
                let replica = Replica {
                    buffer: master.buffer.alias_on(device),
                    version: master_version,
                };
                state.replicas.insert(key, replica);
            }
            _ => {
                let host_key = self.platform.host().key();
                let reuse = state.replicas.get(&host_key).map(|r| r.buffer.clone());
                let mut staged = Vec::new();
                schedule_transfer(
                    &master.buffer,
                    &target.buffer,
                    reuse,
                    master_version,
                    stream,
                    |key, replica| staged.push((key, replica)),
                )?;
                for (key, replica) in staged {
                    state.replicas.insert(key, replica);
                }
                let target = state.replicas.get_mut(&key).expect("replica resolved above");
                target.version = master_version;
            }
        }
        log::trace!(
            "storage {} replica {key} repaired to version {master_version}",
            self.id,
        );
        Ok(())
    }
}

/// Schedules byte movement from `master` to `target` on `stream`. Direct
/// when the transfer is peer, host-to-device, or device-to-host; a
/// cross-service discrete pair stages through the host, reusing `reuse`
/// when the caller already holds a host region. The staged replica is
/// reported through `stage` so the caller retains it up to date.
fn schedule_transfer(
    master: &DeviceBuffer,
    target: &DeviceBuffer,
    reuse: Option<DeviceBuffer>,
    master_version: i64,
    stream: &DeviceStream,
    mut stage: impl FnMut(DeviceKey, Replica),
) -> Result<(), StorageError> {
    let direct = master.device().same_service(target.device())
        || master.addressing() == Addressing::Unified
        || target.addressing() == Addressing::Unified;
    if direct {
        target.copy_async_from(master, stream);
        return Ok(());
    }
    // discrete ↔ discrete across services: master → host, then host → target
    let host = master.device().platform().host();
    let buffer = match reuse {
        Some(buffer) => buffer,
        None => DeviceBuffer::alloc(&host, master.size())?,
    };
    buffer.copy_async_from(master, stream);
    target.copy_async_from(&buffer, stream);
    stage(
        host.key(),
        Replica {
            buffer,
            version: master_version,
        },
    );
    Ok(())
}

impl Drop for Storage {
    /// Queued writes must land before the replicas are freed.
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if let Some((_, event)) = state.write_completion.take() {
            if let Err(err) = event.wait(None) {
                log::error!("storage {} dropped with failed writes: {err}", self.id);
            }
        }
    }
}
