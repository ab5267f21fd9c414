use parking_lot::{
    RawRwLock,
    lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard},
};

use crate::{
    device::DeviceBuffer,
    iter::{IndexIter, IndexStep},
    num::Scalar,
};

#[inline]
fn read_element<T: Scalar>(bytes: &[u8], data_index: usize) -> T {
    let size = size_of::<T>();
    bytemuck::pod_read_unaligned(&bytes[data_index * size..][..size])
}

#[inline]
fn write_element<T: Scalar>(bytes: &mut [u8], data_index: usize, value: T) {
    let size = size_of::<T>();
    bytes[data_index * size..][..size].copy_from_slice(bytemuck::bytes_of(&value));
}

/// A read-only element sequence over one replica's bytes.
///
/// Padded positions synthesize the view's pad value; everything else reads
/// through the traversal's data offsets. The byte region stays read-locked
/// for the life of the sequence.
pub struct Values<T: Scalar> {
    guard: ArcRwLockReadGuard<RawRwLock, Box<[u8]>>,
    start: IndexIter,
    cursor: IndexIter,
    pad_value: T,
}

impl<T: Scalar> Values<T> {
    /// Adapts a traversal to an already-resolved replica's bytes. Kernels
    /// running inside stream closures build their sequences this way.
    pub fn over(buffer: &DeviceBuffer, iter: IndexIter, pad_value: T) -> Self {
        Self {
            guard: buffer.bytes().read_arc(),
            start: iter.clone(),
            cursor: iter,
            pad_value,
        }
    }

    /// Total sequence length, padding included.
    #[inline]
    pub fn count(&self) -> usize {
        self.start.clone().count()
    }

    /// Random access by dense view index, independent of the cursor.
    pub fn value_at(&self, view_index: usize) -> Option<T> {
        let step = self.start.clone().advanced(view_index).next()?;
        Some(self.resolve(step))
    }

    fn resolve(&self, step: IndexStep) -> T {
        match step.pad {
            true => self.pad_value,
            false => read_element(&self.guard, step.data_index),
        }
    }
}

impl<T: Scalar> Iterator for Values<T> {
    type Item = T;

    fn next(&mut self) -> Option<Self::Item> {
        let step = self.cursor.next()?;
        Some(self.resolve(step))
    }

    fn nth(&mut self, n: usize) -> Option<Self::Item> {
        let step = self.cursor.nth(n)?;
        Some(self.resolve(step))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.cursor.size_hint()
    }
}

impl<T: Scalar> ExactSizeIterator for Values<T> {}

/// A mutable element sequence over one replica's bytes.
///
/// Writes land at the traversal's data offsets; writes to padded positions
/// are silently absorbed. The byte region stays write-locked for the life
/// of the sequence.
pub struct ValuesMut<T: Scalar> {
    guard: ArcRwLockWriteGuard<RawRwLock, Box<[u8]>>,
    start: IndexIter,
    pad_value: T,
}

impl<T: Scalar> ValuesMut<T> {
    /// Adapts a traversal to an already-resolved replica's bytes, write
    /// side. See [`Values::over`].
    pub fn over(buffer: &DeviceBuffer, iter: IndexIter, pad_value: T) -> Self {
        Self {
            guard: buffer.bytes().write_arc(),
            start: iter,
            pad_value,
        }
    }

    /// Total sequence length, padding included.
    #[inline]
    pub fn count(&self) -> usize {
        self.start.clone().count()
    }

    pub fn value_at(&self, view_index: usize) -> Option<T> {
        let step = self.start.clone().advanced(view_index).next()?;
        Some(match step.pad {
            true => self.pad_value,
            false => read_element(&self.guard, step.data_index),
        })
    }

    /// Writes one element by dense view index. A padded position absorbs
    /// the write.
    pub fn set_at(&mut self, view_index: usize, value: T) {
        if let Some(step) = self.start.clone().advanced(view_index).next() {
            if !step.pad {
                write_element(&mut self.guard, step.data_index, value);
            }
        }
    }

    /// Fills every non-padded position with `value`.
    pub fn fill(&mut self, value: T) {
        self.fill_with(|_| value);
    }

    /// Fills non-padded positions from a function of the dense view index.
    pub fn fill_with(&mut self, mut f: impl FnMut(usize) -> T) {
        for step in self.start.clone() {
            if !step.pad {
                write_element(&mut self.guard, step.data_index, f(step.view_index));
            }
        }
    }

    /// Applies `f` to every non-padded element in place.
    pub fn update(&mut self, mut f: impl FnMut(usize, T) -> T) {
        for step in self.start.clone() {
            if !step.pad {
                let value = read_element(&self.guard, step.data_index);
                write_element(&mut self.guard, step.data_index, f(step.view_index, value));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        device::Platform,
        iter::{PaddedIter, VectorIter, ExtentBounds},
        shape::Padding,
    };

    fn buffer_of(platform: &Platform, values: &[f32]) -> DeviceBuffer {
        DeviceBuffer::from_host(&platform.host(), bytemuck::cast_slice(values)).unwrap()
    }

    fn vector_iter(count: usize) -> IndexIter {
        IndexIter::Vector(VectorIter::new(
            [ExtentBounds {
                align: 0,
                view_extent: count,
                data_extent: count,
                data_stride: 1,
            }],
            0,
            false,
        ))
    }

    #[test]
    fn test_values_read_in_order() {
        let platform = Platform::default();
        let buffer = buffer_of(&platform, &[1.0, 2.0, 3.0]);
        let values = Values::<f32>::over(&buffer, vector_iter(3), 0.0);
        assert_eq!(Values::count(&values), 3);
        assert_eq!(values.collect::<Vec<_>>(), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_padded_values_synthesize() {
        let platform = Platform::default();
        let buffer = buffer_of(&platform, &[1.0, 2.0, 3.0]);
        let iter = IndexIter::General(PaddedIter::new(
            &[3],
            &[3],
            &[1],
            0,
            &[Padding::new(1, 2)],
            &[0],
        ));
        let values = Values::<f32>::over(&buffer, iter, 0.0);
        assert_eq!(
            values.collect::<Vec<_>>(),
            vec![0.0, 1.0, 2.0, 3.0, 0.0, 0.0],
        );
    }

    #[test]
    fn test_mutable_values_absorb_padded_writes() {
        let platform = Platform::default();
        let buffer = buffer_of(&platform, &[1.0, 2.0, 3.0]);
        let iter = IndexIter::General(PaddedIter::new(
            &[3],
            &[3],
            &[1],
            0,
            &[Padding::new(1, 0)],
            &[0],
        ));
        {
            let mut values = ValuesMut::<f32>::over(&buffer, iter, 0.0);
            values.set_at(0, 9.0); // padding: absorbed
            values.set_at(1, 9.0);
            assert_eq!(values.value_at(0), Some(0.0));
        }
        let values = Values::<f32>::over(&buffer, vector_iter(3), 0.0);
        assert_eq!(values.collect::<Vec<_>>(), vec![9.0, 2.0, 3.0]);
    }

    #[test]
    fn test_update_and_fill() {
        let platform = Platform::default();
        let buffer = buffer_of(&platform, &[1.0, 2.0, 3.0, 4.0]);
        {
            let mut values = ValuesMut::<f32>::over(&buffer, vector_iter(4), 0.0);
            values.update(|_, v| v * 2.0);
        }
        {
            let values = Values::<f32>::over(&buffer, vector_iter(4), 0.0);
            assert_eq!(values.collect::<Vec<_>>(), vec![2.0, 4.0, 6.0, 8.0]);
        }
        {
            let mut values = ValuesMut::<f32>::over(&buffer, vector_iter(4), 0.0);
            values.fill_with(|i| i as f32);
        }
        let values = Values::<f32>::over(&buffer, vector_iter(4), 0.0);
        assert_eq!(values.collect::<Vec<_>>(), vec![0.0, 1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_random_access() {
        let platform = Platform::default();
        let buffer = buffer_of(&platform, &[5.0, 6.0, 7.0]);
        let values = Values::<f32>::over(&buffer, vector_iter(3), 0.0);
        assert_eq!(values.value_at(2), Some(7.0));
        assert_eq!(values.value_at(0), Some(5.0));
        assert_eq!(values.value_at(3), None);
    }
}
