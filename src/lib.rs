//! `weft` is the tensor runtime core of a small numeric-computing framework:
//! it owns element storage, replicates it lazily across heterogeneous compute
//! devices, schedules asynchronous work on per-device command streams, and
//! presents shape-aware views with copy-on-write semantics.
//!
//! ## Key Components
//! 1. **Replica Storage**:
//!    - One logical tensor maps to per-device byte buffers ([`Storage`]).
//!    - Consistency through a monotonic master version; stale replicas are
//!      repaired lazily with zero-copy, host-staged, or peer transfers.
//! 2. **Streams and Events**:
//!    - Single-producer FIFOs of closures per device ([`DeviceStream`]).
//!    - One-shot [`StreamEvent`] barriers carry happens-before edges across
//!      streams; failures poison the stream and surface at joins.
//! 3. **View Algebra**:
//!    - Shapes, strides, padding, repetition, and transposition ([`Shape`],
//!      [`Tensor`]) without materializing intermediate storage.
//!    - Rank-specialized and general index iterators map view coordinates to
//!      buffer offsets under normal, repeated, and padded traversal.
//! 4. **Devices**:
//!    - A [`Platform`] enumerates services and devices; buffers know their
//!      address space, so unified replicas alias instead of copying.
//!
//! ## Design Principles
//! - **Submission never blocks**: the application thread only waits when it
//!   explicitly fetches values to the host or joins a stream.
//! - **FIFO is the order**: within a stream, submission order is the
//!   happens-before order; across streams, events are the only edges.
//! - **Versioning over copying**: replicas migrate only when a consumer
//!   actually touches stale bytes.

pub mod codec;
pub mod device;
pub mod iter;
pub mod num;
pub mod shape;
pub mod storage;
pub mod stream;
pub mod tensor;
pub mod values;

pub use codec::{CodecError, TensorRecord};
pub use device::{
    Addressing, Device, DeviceBuffer, DeviceError, DeviceKey, Platform, PlatformBuilder,
};
pub use iter::{ExtentBounds, IndexIter, IndexStep, PaddedIter, StridedIter};
pub use num::{Bool, Composite, DataType, One, Rgb, Rgba, Scalar, Stereo, Zero};
pub use shape::{Coord, Padding, Shape, ShapeError};
pub use storage::{Storage, StorageError, StorageId};
pub use stream::{DeviceStream, StreamError, StreamEvent, StreamId};
pub use tensor::{Tensor, TensorError, Traversal};
pub use values::{Values, ValuesMut};
