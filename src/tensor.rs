use std::sync::Arc;

use itertools::izip;
use thiserror::Error;

use crate::{
    device::{DeviceBuffer, Platform},
    iter::{ExtentBounds, IndexIter, MatrixIter, PaddedIter, VectorIter, VolumeIter},
    num::{Composite, Scalar},
    shape::{Coord, Padding, Shape, ShapeError},
    storage::{Storage, StorageError},
    stream::{DeviceStream, StreamError, StreamEvent},
    values::{Values, ValuesMut},
};

#[derive(Debug, Error)]
pub enum TensorError {
    #[error(transparent)]
    Shape(#[from] ShapeError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Stream(#[from] StreamError),
    #[error("composite reinterpretation requires an unpadded view")]
    PaddedComposite,
}

/// How view coordinates map to data offsets.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Traversal {
    /// Strides apply directly.
    #[default]
    Normal,
    /// Data wraps by `data_extent` after an alignment shift, repeating a
    /// smaller source across the view without materializing it.
    Repeated,
}

/// A shape-and-offset aperture into a shared storage.
///
/// Copying a view is cheap: the struct clones and the shared-owner count on
/// the storage bumps. Non-shared views copy their storage on the first write
/// while other views still reference it; views marked shared alias freely.
#[derive(Debug, Clone)]
pub struct Tensor<T: Scalar> {
    storage: Arc<Storage>,
    /// View extents with the physical data strides.
    shape: Shape,
    /// Extents of the backing data; differs from `shape` under repetition.
    data_shape: Shape,
    /// Base element offset into the storage.
    offset: usize,
    padding: Option<Vec<Padding>>,
    pad_value: T,
    /// Per-axis repetition phase, all zeros for normal traversal.
    align: Vec<usize>,
    traversal: Traversal,
    is_shared: bool,
}

impl<T: Scalar> Tensor<T> {
    /// Creates a tensor of `shape` from row-major elements on the host.
    pub fn new(
        platform: &Platform,
        shape: Shape,
        elements: &[T],
    ) -> Result<Self, TensorError> {
        if elements.len() != shape.element_count() {
            return Err(ShapeError::Count(elements.len(), shape).into());
        }
        let storage = Storage::from_host_bytes(
            platform,
            T::DATA_TYPE,
            elements.len(),
            bytemuck::cast_slice(elements),
        )?;
        Ok(Self::over(storage, shape))
    }

    /// Creates a zero-filled tensor; replicas materialize lazily on first
    /// access.
    pub fn zeros(platform: &Platform, shape: Shape) -> Self {
        let storage = Storage::empty(platform, T::DATA_TYPE, shape.element_count());
        Self::over(storage, shape)
    }

    /// Wraps host elements as a read-only reference; any write access fails
    /// with a read-only violation.
    pub fn reference_to(
        platform: &Platform,
        shape: Shape,
        elements: &[T],
    ) -> Result<Self, TensorError> {
        if elements.len() != shape.element_count() {
            return Err(ShapeError::Count(elements.len(), shape).into());
        }
        let storage = Storage::from_host_bytes_read_only(
            platform,
            T::DATA_TYPE,
            elements.len(),
            bytemuck::cast_slice(elements),
        )?;
        Ok(Self::over(storage, shape))
    }

    /// A rank-1 view holding a single value.
    pub fn scalar(platform: &Platform, value: T) -> Result<Self, TensorError> {
        Self::new(platform, Shape::new([1]), &[value])
    }

    pub fn vector(platform: &Platform, elements: &[T]) -> Result<Self, TensorError> {
        Self::new(platform, Shape::new([elements.len()]), elements)
    }

    pub fn matrix(
        platform: &Platform,
        extents: [usize; 2],
        elements: &[T],
    ) -> Result<Self, TensorError> {
        Self::new(platform, Shape::new(extents), elements)
    }

    /// Imports elements laid out column-major; iteration remains row-major.
    pub fn matrix_column_major(
        platform: &Platform,
        extents: [usize; 2],
        elements: &[T],
    ) -> Result<Self, TensorError> {
        Self::new(platform, Shape::column_major(extents), elements)
    }

    pub fn volume(
        platform: &Platform,
        extents: [usize; 3],
        elements: &[T],
    ) -> Result<Self, TensorError> {
        Self::new(platform, Shape::new(extents), elements)
    }

    /// Rank-4 view in batch, channel, height, width order.
    pub fn nchw(
        platform: &Platform,
        extents: [usize; 4],
        elements: &[T],
    ) -> Result<Self, TensorError> {
        Self::new(platform, Shape::new(extents), elements)
    }

    /// Rank-4 view in batch, height, width, channel order.
    pub fn nhwc(
        platform: &Platform,
        extents: [usize; 4],
        elements: &[T],
    ) -> Result<Self, TensorError> {
        Self::new(platform, Shape::new(extents), elements)
    }

    fn over(storage: Arc<Storage>, shape: Shape) -> Self {
        let rank = shape.rank();
        Self {
            storage,
            data_shape: shape.clone(),
            shape,
            offset: 0,
            padding: None,
            pad_value: T::zero(),
            align: vec![0; rank],
            traversal: Traversal::Normal,
            is_shared: false,
        }
    }

    /// Produces a view of `extents` repeating `source`'s data without
    /// copying: coordinates wrap by the source extent on every axis.
    pub fn repeating(extents: &[usize], source: &Tensor<T>) -> Result<Self, TensorError> {
        if extents.len() != source.shape.rank() {
            return Err(ShapeError::Rank(source.shape.rank(), extents.len()).into());
        }
        let shape = Shape::with_strides(extents, source.shape.strides())?;
        Ok(Self {
            storage: source.storage.clone(),
            shape,
            data_shape: source.data_shape.clone(),
            offset: source.offset,
            padding: source.padding.clone(),
            pad_value: source.pad_value,
            align: source.align.clone(),
            traversal: Traversal::Repeated,
            is_shared: source.is_shared,
        })
    }

    /// A sub-aperture at `offset` with `extents`, borrowing the parent's
    /// strides. `is_reference` marks the result shared so that writes
    /// through it skip copy-on-write.
    pub fn sub_view(
        &self,
        offset: &[usize],
        extents: &[usize],
        is_reference: bool,
    ) -> Result<Self, TensorError> {
        let rank = self.shape.rank();
        if offset.len() != rank || extents.len() != rank {
            return Err(ShapeError::Rank(rank, offset.len().max(extents.len())).into());
        }
        let inside = izip!(offset, extents, self.shape.extents()).all(|(&o, &e, &v)| o + e <= v);
        if !inside {
            return Err(ShapeError::Bounds(
                Coord::from(offset),
                Coord::from(extents),
                self.shape.clone(),
            )
            .into());
        }
        let shape = Shape::with_strides(extents, self.shape.strides())?;
        let mut view = Self {
            storage: self.storage.clone(),
            shape,
            data_shape: self.data_shape.clone(),
            offset: self.offset,
            padding: None,
            pad_value: self.pad_value,
            align: self.align.clone(),
            traversal: self.traversal,
            is_shared: self.is_shared || is_reference,
        };
        match self.traversal {
            Traversal::Normal => {
                view.offset += izip!(offset, self.shape.strides())
                    .map(|(&o, &s)| o * s)
                    .sum::<usize>();
                view.data_shape = view.shape.clone();
            }
            // a repeated aperture shifts its phase instead of its base
            Traversal::Repeated => {
                for (align, &o) in izip!(&mut view.align, offset) {
                    *align += o;
                }
            }
        }
        Ok(view)
    }

    /// Swaps the two inner axes of the view and its data window.
    pub fn transposed(&self) -> Result<Self, TensorError> {
        let rank = self.shape.rank();
        let shape = self.shape.transposed()?;
        let data_shape = self.data_shape.transposed()?;
        let mut align = self.align.clone();
        align.swap(rank - 2, rank - 1);
        let padding = self.padding.clone().map(|mut padding| {
            padding.swap(rank - 2, rank - 1);
            padding
        });
        Ok(Self {
            storage: self.storage.clone(),
            shape,
            data_shape,
            offset: self.offset,
            padding,
            pad_value: self.pad_value,
            align,
            traversal: self.traversal,
            is_shared: self.is_shared,
        })
    }

    /// Collapses the axes above `axis`; legal only for an unpadded,
    /// non-repeated view with a contiguous tail.
    pub fn flattened(&self, axis: usize) -> Result<Self, TensorError> {
        if self.padding.is_some() || self.traversal == Traversal::Repeated {
            return Err(ShapeError::Flatten(axis, self.shape.clone()).into());
        }
        let shape = self.shape.flattened(axis)?;
        Ok(Self {
            storage: self.storage.clone(),
            data_shape: shape.clone(),
            shape,
            offset: self.offset,
            padding: None,
            pad_value: self.pad_value,
            align: self.align.clone(),
            traversal: Traversal::Normal,
            is_shared: self.is_shared,
        })
    }

    /// Adds a padding region around the data: padded positions read as
    /// `pad_value` and absorb writes. All-zero pairs leave the view on the
    /// unpadded traversal.
    pub fn padded(&self, padding: &[Padding], pad_value: T) -> Result<Self, TensorError> {
        let padding = Padding::resolve(padding, self.shape.rank())?;
        let mut view = self.clone();
        view.padding = crate::shape::has_padding(&padding).then_some(padding);
        view.pad_value = pad_value;
        Ok(view)
    }

    /// A deep copy: the same aperture over a fresh storage seeded from this
    /// view's master replica, with the copy scheduled on `stream`.
    pub fn copied(&self, stream: &DeviceStream) -> Result<Self, TensorError> {
        let mut view = self.clone();
        view.storage = Storage::clone_on(&self.storage, stream)?;
        view.is_shared = false;
        Ok(view)
    }

    /// Reinterprets a composite-element view as its component scalar: a
    /// zero-copy reshape appending the component axis.
    pub fn into_components(self) -> Result<Tensor<T::Component>, TensorError>
    where
        T: Composite,
    {
        if self.padding.is_some() {
            return Err(TensorError::PaddedComposite);
        }
        let scale = |shape: &Shape| {
            let mut extents = shape.extents().to_vec();
            extents.push(T::COMPONENTS);
            let mut strides: Vec<usize> =
                shape.strides().iter().map(|s| s * T::COMPONENTS).collect();
            strides.push(1);
            Shape::with_strides(extents, strides)
        };
        let mut align = self.align.clone();
        align.push(0);
        Ok(Tensor {
            storage: self.storage,
            shape: scale(&self.shape)?,
            data_shape: scale(&self.data_shape)?,
            offset: self.offset * T::COMPONENTS,
            padding: None,
            pad_value: <T::Component as crate::num::Zero>::zero(),
            align,
            traversal: self.traversal,
            is_shared: self.is_shared,
        })
    }

    #[inline]
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    #[inline]
    pub fn data_shape(&self) -> &Shape {
        &self.data_shape
    }

    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    #[inline]
    pub fn traversal(&self) -> Traversal {
        self.traversal
    }

    #[inline]
    pub fn is_shared(&self) -> bool {
        self.is_shared
    }

    #[inline]
    pub fn pad_value(&self) -> T {
        self.pad_value
    }

    #[inline]
    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    /// Logical element count of the view, padding excluded.
    #[inline]
    pub fn count(&self) -> usize {
        self.shape.element_count()
    }

    /// Per-axis extents of the traversal, padding included.
    pub fn padded_extents(&self) -> Vec<usize> {
        match &self.padding {
            None => self.shape.extents().to_vec(),
            Some(padding) => izip!(self.shape.extents(), padding)
                .map(|(&e, p)| e + p.total())
                .collect(),
        }
    }

    /// Sequence length of a traversal, padding included.
    pub fn padded_count(&self) -> usize {
        self.padded_extents().iter().product()
    }

    /// `true` while this view is the only holder of its storage.
    pub fn is_unique(&self) -> bool {
        Arc::strong_count(&self.storage) == 1
    }

    /// The pending write-completion barrier of the storage, if any.
    pub fn write_completion(&self) -> Option<StreamEvent> {
        self.storage.write_completion()
    }

    /// Builds the index traversal for this view: rank-specialized when the
    /// view is unpadded and of small rank, the general padded traversal
    /// otherwise.
    pub fn index_iter(&self) -> IndexIter {
        let repeated = self.traversal == Traversal::Repeated;
        let bounds = |axis: usize| ExtentBounds {
            align: self.align[axis],
            view_extent: self.shape.extents()[axis],
            data_extent: self.data_shape.extents()[axis].max(1),
            data_stride: self.shape.strides()[axis],
        };
        match (&self.padding, self.shape.rank()) {
            (None, 1) => IndexIter::Vector(VectorIter::new([bounds(0)], self.offset, repeated)),
            (None, 2) => IndexIter::Matrix(MatrixIter::new(
                [bounds(0), bounds(1)],
                self.offset,
                repeated,
            )),
            (None, 3) => IndexIter::Volume(VolumeIter::new(
                [bounds(0), bounds(1), bounds(2)],
                self.offset,
                repeated,
            )),
            (padding, _) => {
                let zeros = vec![Padding::default(); self.shape.rank()];
                let padding = padding.as_deref().unwrap_or(&zeros);
                IndexIter::General(PaddedIter::new(
                    self.shape.extents(),
                    self.data_shape.extents(),
                    self.shape.strides(),
                    self.offset,
                    padding,
                    &self.align,
                ))
            }
        }
    }

    /// Resolves a read-only replica on the stream's device, scheduling any
    /// migration on that stream.
    pub fn read_buffer(&self, stream: &DeviceStream) -> Result<DeviceBuffer, TensorError> {
        let buffer = self.storage.read_only(stream)?;
        self.storage.set_last_access_mutated_view(false);
        Ok(buffer)
    }

    /// Resolves a mutable replica, copying the storage first if other
    /// non-shared views still reference it.
    pub fn write_buffer(&mut self, stream: &DeviceStream) -> Result<DeviceBuffer, TensorError> {
        let mutated = self.make_unique(stream)?;
        let buffer = self.storage.read_write(stream)?;
        self.storage.set_last_access_mutated_view(mutated);
        Ok(buffer)
    }

    /// Returns a view aliasing the same storage with the shared flag set,
    /// forcing the storage unique up front so writes through either alias
    /// stay coherent.
    pub fn reference(&mut self, stream: &DeviceStream) -> Result<Self, TensorError> {
        self.make_unique(stream)?;
        self.is_shared = true;
        Ok(self.clone())
    }

    /// Migrates to the stream's device and returns the read-only element
    /// sequence. Drains the stream so the caller observes settled bytes.
    pub fn values(&self, stream: &DeviceStream) -> Result<Values<T>, TensorError> {
        let buffer = self.read_buffer(stream)?;
        stream.block_until_idle()?;
        Ok(Values::over(&buffer, self.index_iter(), self.pad_value))
    }

    /// Mutable counterpart of [`Tensor::values`].
    pub fn mutable_values(&mut self, stream: &DeviceStream) -> Result<ValuesMut<T>, TensorError> {
        let buffer = self.write_buffer(stream)?;
        stream.block_until_idle()?;
        Ok(ValuesMut::over(&buffer, self.index_iter(), self.pad_value))
    }

    /// Element sequence over an already-resolved replica, for kernels
    /// running inside stream closures.
    pub fn buffer_values(&self, buffer: &DeviceBuffer) -> Values<T> {
        Values::over(buffer, self.index_iter(), self.pad_value)
    }

    /// Mutable counterpart of [`Tensor::buffer_values`].
    pub fn buffer_values_mut(&self, buffer: &DeviceBuffer) -> ValuesMut<T> {
        ValuesMut::over(buffer, self.index_iter(), self.pad_value)
    }

    /// Host fetch of the element sequence without a stream; blocks until
    /// pending writes land.
    pub fn host_values(&self) -> Result<Values<T>, TensorError> {
        let buffer = self.storage.read_host()?;
        Ok(Values::over(&buffer, self.index_iter(), self.pad_value))
    }

    /// Reads one element of the data region by coordinate.
    pub fn value(&self, coord: &[usize]) -> Result<T, TensorError> {
        let data_index = self.data_index(coord)?;
        let buffer = self.storage.read_host()?;
        let bytes = buffer.bytes();
        let bytes = bytes.read();
        let size = size_of::<T>();
        Ok(bytemuck::pod_read_unaligned(
            &bytes[data_index * size..][..size],
        ))
    }

    /// Writes one element of the data region by coordinate, copying the
    /// storage first if other non-shared views still reference it.
    pub fn set(&mut self, coord: &[usize], value: T) -> Result<(), TensorError> {
        let data_index = self.data_index(coord)?;
        let mutated = self.make_unique_host()?;
        let buffer = self.storage.write_host()?;
        self.storage.set_last_access_mutated_view(mutated);
        let bytes = buffer.bytes();
        let mut bytes = bytes.write();
        let size = size_of::<T>();
        bytes[data_index * size..][..size].copy_from_slice(bytemuck::bytes_of(&value));
        Ok(())
    }

    fn data_index(&self, coord: &[usize]) -> Result<usize, TensorError> {
        let rank = self.shape.rank();
        if coord.len() != rank {
            return Err(ShapeError::Rank(rank, coord.len()).into());
        }
        let inside = izip!(coord, self.shape.extents()).all(|(&c, &e)| c < e);
        if !inside {
            return Err(ShapeError::Bounds(
                Coord::from(coord),
                Coord::from(self.shape.extents()),
                self.shape.clone(),
            )
            .into());
        }
        let index = match self.traversal {
            Traversal::Normal => izip!(coord, self.shape.strides())
                .map(|(&c, &s)| c * s)
                .sum::<usize>(),
            Traversal::Repeated => {
                izip!(coord, &self.align, self.data_shape.extents(), self.shape.strides())
                    .map(|(&c, &a, &e, &s)| ((c + a) % e.max(1)) * s)
                    .sum::<usize>()
            }
        };
        Ok(self.offset + index)
    }

    fn make_unique(&mut self, stream: &DeviceStream) -> Result<bool, TensorError> {
        if self.is_shared || self.is_unique() {
            return Ok(false);
        }
        self.storage = Storage::clone_on(&self.storage, stream)?;
        Ok(true)
    }

    fn make_unique_host(&mut self) -> Result<bool, TensorError> {
        if self.is_shared || self.is_unique() {
            return Ok(false);
        }
        self.storage = Storage::clone_host(&self.storage)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Platform;

    fn iota(n: usize) -> Vec<f32> {
        (0..n).map(|i| i as f32).collect()
    }

    fn read_all<T: Scalar>(tensor: &Tensor<T>) -> Vec<T> {
        tensor.host_values().unwrap().collect()
    }

    #[test]
    fn test_matrix_row_major_values() {
        let platform = Platform::default();
        let m = Tensor::matrix(&platform, [2, 3], &iota(6)).unwrap();
        assert_eq!(read_all(&m), iota(6));
        assert_eq!(m.value(&[1, 2]).unwrap(), 5.0);
    }

    #[test]
    fn test_scalar_holds_one_value() {
        let platform = Platform::default();
        let s = Tensor::scalar(&platform, 4.5f32).unwrap();
        assert_eq!(s.shape().extents(), &[1]);
        assert_eq!(s.count(), 1);
        assert_eq!(s.value(&[0]).unwrap(), 4.5);
        assert_eq!(read_all(&s), vec![4.5]);
    }

    #[test]
    fn test_nchw_layout() {
        let platform = Platform::default();
        let n = Tensor::nchw(&platform, [2, 3, 2, 2], &iota(24)).unwrap();
        assert_eq!(n.shape().strides(), &[12, 4, 2, 1]);
        assert_eq!(read_all(&n), iota(24));
        // batch 1, channel 2, row 1, column 0
        assert_eq!(n.value(&[1, 2, 1, 0]).unwrap(), 22.0);
    }

    #[test]
    fn test_nhwc_layout() {
        let platform = Platform::default();
        let n = Tensor::nhwc(&platform, [2, 2, 2, 3], &iota(24)).unwrap();
        assert_eq!(n.shape().strides(), &[12, 6, 3, 1]);
        assert_eq!(read_all(&n), iota(24));
        // batch 1, row 0, column 1, channel 2
        assert_eq!(n.value(&[1, 0, 1, 2]).unwrap(), 17.0);
    }

    #[test]
    fn test_column_major_import_iterates_row_major() {
        let platform = Platform::default();
        let elements = [0.0f32, 2.0, 4.0, 1.0, 3.0, 5.0];
        let m = Tensor::matrix_column_major(&platform, [3, 2], &elements).unwrap();
        assert_eq!(read_all(&m), iota(6));
    }

    #[test]
    fn test_transpose_involution() {
        let platform = Platform::default();
        let m = Tensor::matrix(&platform, [2, 3], &iota(6)).unwrap();
        let t = m.transposed().unwrap();
        assert_eq!(t.shape().extents(), &[3, 2]);
        assert_eq!(t.value(&[2, 1]).unwrap(), 5.0);
        let back = t.transposed().unwrap();
        assert_eq!(back.shape(), m.shape());
        assert_eq!(read_all(&back), read_all(&m));
    }

    #[test]
    fn test_sub_view_windows_parent() {
        let platform = Platform::default();
        let m = Tensor::matrix(&platform, [3, 3], &iota(9)).unwrap();
        let sub = m.sub_view(&[1, 1], &[2, 2], false).unwrap();
        assert_eq!(read_all(&sub), vec![4.0, 5.0, 7.0, 8.0]);
        assert!(!sub.is_shared());

        let reference = m.sub_view(&[0, 0], &[1, 3], true).unwrap();
        assert!(reference.is_shared());
        assert!(m.sub_view(&[2, 2], &[2, 1], false).is_err());
        assert!(m.sub_view(&[0], &[1], false).is_err());
    }

    #[test]
    fn test_repeating_shares_storage() {
        let platform = Platform::default();
        let row = Tensor::matrix(&platform, [1, 4], &iota(4)).unwrap();
        let big = Tensor::repeating(&[3, 4], &row).unwrap();
        assert_eq!(big.storage().count(), 4);
        assert_eq!(big.count(), 12);
        assert_eq!(read_all(&big), [iota(4), iota(4), iota(4)].concat());
        assert_eq!(big.value(&[2, 3]).unwrap(), 3.0);
        assert!(Tensor::repeating(&[3, 4, 1], &row).is_err());
    }

    #[test]
    fn test_repeated_sub_view_shifts_phase() {
        let platform = Platform::default();
        let row = Tensor::matrix(&platform, [1, 4], &iota(4)).unwrap();
        let big = Tensor::repeating(&[4, 4], &row).unwrap();
        let sub = big.sub_view(&[1, 1], &[2, 2], false).unwrap();
        assert_eq!(read_all(&sub), vec![1.0, 2.0, 1.0, 2.0]);
    }

    #[test]
    fn test_flattened_values() {
        let platform = Platform::default();
        let v = Tensor::volume(&platform, [2, 2, 2], &iota(8)).unwrap();
        let flat = v.flattened(0).unwrap();
        assert_eq!(flat.shape().extents(), &[8, 1, 1]);
        assert_eq!(read_all(&flat), iota(8));
        assert!(v.transposed().unwrap().flattened(1).is_err());
    }

    #[test]
    fn test_padded_view_values() {
        let platform = Platform::default();
        let v = Tensor::vector(&platform, &[1.0f32, 2.0, 3.0]).unwrap();
        let padded = v.padded(&[Padding::new(1, 2)], 0.0).unwrap();
        assert_eq!(padded.padded_count(), 6);
        assert_eq!(read_all(&padded), vec![0.0, 1.0, 2.0, 3.0, 0.0, 0.0]);
        // the data region is untouched by padding
        assert_eq!(padded.value(&[1]).unwrap(), 2.0);
    }

    #[test]
    fn test_copy_on_write_preserves_values() {
        let platform = Platform::default();
        let stream = DeviceStream::new(platform.host());
        let mut a = Tensor::vector(&platform, &iota(4)).unwrap();
        let b = a.clone();
        assert!(!a.is_unique());

        a.write_buffer(&stream).unwrap();
        assert!(a.is_unique());
        assert!(b.is_unique());
        assert!(a.storage().last_access_mutated_view());
        stream.block_until_idle().unwrap();
        assert_eq!(read_all(&a), iota(4));
        assert_eq!(read_all(&b), iota(4));
    }

    #[test]
    fn test_shared_reference_skips_copy_on_write() {
        let platform = Platform::default();
        let stream = DeviceStream::new(platform.host());
        let mut a = Tensor::vector(&platform, &iota(4)).unwrap();
        let mut alias = a.reference(&stream).unwrap();
        assert!(alias.is_shared());

        alias.write_buffer(&stream).unwrap();
        // both views still observe one storage
        assert!(Arc::ptr_eq(a.storage(), alias.storage()));
        alias.set(&[0], 9.0).unwrap();
        assert_eq!(a.value(&[0]).unwrap(), 9.0);
        stream.block_until_idle().unwrap();
    }

    #[test]
    fn test_read_only_reference_rejects_mutation() {
        let platform = Platform::default();
        let stream = DeviceStream::new(platform.host());
        let mut r = Tensor::reference_to(&platform, Shape::new([2]), &[1.0f32, 2.0]).unwrap();
        assert!(matches!(
            r.write_buffer(&stream),
            Err(TensorError::Storage(StorageError::ReadOnly(_))),
        ));
        assert_eq!(r.value(&[1]).unwrap(), 2.0);
    }

    #[test]
    fn test_set_copies_shared_storage() {
        let platform = Platform::default();
        let mut a = Tensor::vector(&platform, &iota(3)).unwrap();
        let b = a.clone();
        a.set(&[1], 7.0).unwrap();
        assert_eq!(a.value(&[1]).unwrap(), 7.0);
        assert_eq!(b.value(&[1]).unwrap(), 1.0);
        assert!(a.storage().last_access_mutated_view());
    }

    #[test]
    fn test_composite_reinterpret_is_zero_copy() {
        use crate::num::Rgb;
        let platform = Platform::default();
        let pixels = [Rgb([1.0, 2.0, 3.0]), Rgb([4.0, 5.0, 6.0])];
        let image = Tensor::vector(&platform, &pixels).unwrap();
        let id = image.storage().id();
        let components = image.into_components().unwrap();
        assert_eq!(components.storage().id(), id);
        assert_eq!(components.shape().extents(), &[2, 3]);
        assert_eq!(
            read_all(&components),
            vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0],
        );
        assert_eq!(components.value(&[1, 2]).unwrap(), 6.0);
    }

    #[test]
    fn test_rgba_components_round_trip() {
        use crate::num::Rgba;
        let platform = Platform::default();
        let pixels = [
            Rgba([1.0, 2.0, 3.0, 4.0]),
            Rgba([5.0, 6.0, 7.0, 8.0]),
            Rgba([9.0, 10.0, 11.0, 12.0]),
        ];
        let image = Tensor::matrix(&platform, [3, 1], &pixels).unwrap();
        let id = image.storage().id();
        let components = image.into_components().unwrap();
        assert_eq!(components.storage().id(), id);
        assert_eq!(components.shape().extents(), &[3, 1, 4]);
        assert_eq!(read_all(&components), (1..=12).map(|i| i as f32).collect::<Vec<_>>());
        assert_eq!(components.value(&[2, 0, 3]).unwrap(), 12.0);
    }

    #[test]
    fn test_stereo_components_write_back() {
        use crate::num::Stereo;
        let platform = Platform::default();
        let frames = [Stereo([0.5, -0.5]), Stereo([0.25, -0.25])];
        let clip = Tensor::vector(&platform, &frames).unwrap();
        let id = clip.storage().id();
        let mut components = clip.into_components().unwrap();
        assert_eq!(components.storage().id(), id);
        assert_eq!(components.shape().extents(), &[2, 2]);
        assert_eq!(read_all(&components), vec![0.5, -0.5, 0.25, -0.25]);

        // the reinterpreted view is the sole holder: writes land in place
        components.set(&[1, 1], -1.0).unwrap();
        assert_eq!(components.value(&[1, 1]).unwrap(), -1.0);
        assert_eq!(components.value(&[0, 1]).unwrap(), -0.5);
    }

    #[test]
    fn test_copied_detaches_storage() {
        let platform = Platform::default();
        let stream = DeviceStream::new(platform.host());
        let a = Tensor::vector(&platform, &iota(3)).unwrap();
        let mut b = a.copied(&stream).unwrap();
        stream.block_until_idle().unwrap();
        assert_ne!(a.storage().id(), b.storage().id());
        assert_eq!(read_all(&b), iota(3));

        b.set(&[0], 9.0).unwrap();
        assert_eq!(a.value(&[0]).unwrap(), 0.0);
        assert_eq!(b.value(&[0]).unwrap(), 9.0);
    }

    #[test]
    fn test_zeros_reads_zero() {
        let platform = Platform::default();
        let z = Tensor::<f32>::zeros(&platform, Shape::new([2, 2]));
        assert_eq!(read_all(&z), vec![0.0; 4]);
    }
}
