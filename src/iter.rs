use itertools::izip;

use crate::shape::Padding;

/// One step of a traversal: the dense position in view space, the physical
/// element offset it maps to, and whether the position is padding. Padded
/// positions synthesize the pad value on read and absorb writes; their
/// `data_index` is not meaningful.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexStep {
    pub view_index: usize,
    pub data_index: usize,
    pub pad: bool,
}

/// Per-axis bounds of a rank-specialized traversal.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ExtentBounds {
    /// Non-negative repetition phase shift.
    pub align: usize,
    pub view_extent: usize,
    pub data_extent: usize,
    pub data_stride: usize,
}

/// Unpadded traversal specialized by rank.
///
/// The data offset is recomputed on every step: `Σ coord · stride` for
/// normal traversal, `Σ ((coord + align) mod data_extent) · stride` when the
/// view repeats its data.
#[derive(Debug, Clone)]
pub struct StridedIter<const N: usize> {
    bounds: [ExtentBounds; N],
    coord: [usize; N],
    view_index: usize,
    count: usize,
    offset: usize,
    repeated: bool,
}

/// Rank-1 traversal over a single element.
pub type ScalarIter = StridedIter<1>;
pub type VectorIter = StridedIter<1>;
pub type MatrixIter = StridedIter<2>;
pub type VolumeIter = StridedIter<3>;

impl<const N: usize> StridedIter<N> {
    pub fn new(bounds: [ExtentBounds; N], offset: usize, repeated: bool) -> Self {
        let count = bounds.iter().map(|b| b.view_extent).product();
        debug_assert!(!repeated || bounds.iter().all(|b| b.data_extent > 0));
        Self {
            bounds,
            coord: [0; N],
            view_index: 0,
            count,
            offset,
            repeated,
        }
    }

    #[inline]
    pub fn count(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn view_index(&self) -> usize {
        self.view_index
    }

    fn data_index(&self) -> usize {
        let axes = izip!(&self.coord, &self.bounds);
        self.offset
            + match self.repeated {
                false => axes.map(|(&c, b)| c * b.data_stride).sum::<usize>(),
                true => axes
                    .map(|(&c, b)| ((c + b.align) % b.data_extent) * b.data_stride)
                    .sum::<usize>(),
            }
    }

    fn increment(&mut self) {
        for axis in (0..N).rev() {
            self.coord[axis] += 1;
            if self.coord[axis] < self.bounds[axis].view_extent || axis == 0 {
                return;
            }
            self.coord[axis] = 0;
        }
    }

    /// Jumps `by` positions forward with repeated divmod instead of
    /// stepping.
    pub fn advanced(mut self, by: usize) -> Self {
        self.view_index = (self.view_index + by).min(self.count);
        let mut rem = self.view_index;
        for axis in (0..N).rev() {
            let extent = self.bounds[axis].view_extent.max(1);
            self.coord[axis] = rem % extent;
            rem /= extent;
        }
        self
    }
}

impl<const N: usize> Iterator for StridedIter<N> {
    type Item = IndexStep;

    fn next(&mut self) -> Option<Self::Item> {
        if self.view_index >= self.count {
            return None;
        }
        let step = IndexStep {
            view_index: self.view_index,
            data_index: self.data_index(),
            pad: false,
        };
        self.view_index += 1;
        self.increment();
        Some(step)
    }

    fn nth(&mut self, n: usize) -> Option<Self::Item> {
        *self = self.clone().advanced(n);
        self.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.count - self.view_index;
        (remaining, Some(remaining))
    }
}

impl<const N: usize> ExactSizeIterator for StridedIter<N> {}

/// Per-axis cursor of the general padded traversal. All `view_*` fields are
/// absolute positions in the dense padded view space; `data_*` fields are
/// absolute element offsets.
#[derive(Debug, Default, Clone, Copy)]
struct ExtentPosition {
    view_stride: usize,
    padded_extent: usize,
    before: usize,
    extent: usize,
    align: usize,
    data_extent: usize,
    data_stride: usize,

    view_current: usize,
    view_end: usize,
    pad_lower: usize,
    pad_upper: usize,
    data_current: usize,
    data_end: usize,
    current_is_pad: bool,
    parent_is_pad: bool,
}

impl ExtentPosition {
    #[inline]
    fn data_span(&self) -> usize {
        self.data_extent * self.data_stride
    }
}

/// General n-dimensional traversal with padding and broadcast wrap.
///
/// The innermost axis advances through the dense padded view space; when a
/// sweep completes, the parent increments and the axis rebases its bounds
/// and data window on the new parent position. Data offsets advance only
/// through non-padded positions and wrap at the end of the data window,
/// which is what makes repetition free of materialization.
#[derive(Debug, Clone)]
pub struct PaddedIter {
    axes: Vec<ExtentPosition>,
    view_index: usize,
    count: usize,
    offset: usize,
}

impl PaddedIter {
    /// Builds a padded traversal. `view_extents`, `data_extents`,
    /// `data_strides`, `padding`, and `align` are all per-axis and of equal
    /// rank; `offset` is the view's base element offset.
    pub fn new(
        view_extents: &[usize],
        data_extents: &[usize],
        data_strides: &[usize],
        offset: usize,
        padding: &[Padding],
        align: &[usize],
    ) -> Self {
        let rank = view_extents.len();
        debug_assert_eq!(data_extents.len(), rank);
        debug_assert_eq!(data_strides.len(), rank);
        debug_assert_eq!(padding.len(), rank);
        debug_assert_eq!(align.len(), rank);

        let mut axes: Vec<ExtentPosition> = izip!(view_extents, data_extents, data_strides, padding, align)
            .map(|(&extent, &data_extent, &data_stride, &pad, &align)| ExtentPosition {
                padded_extent: extent + pad.total(),
                before: pad.before,
                extent,
                align,
                data_extent: data_extent.max(1),
                data_stride,
                ..Default::default()
            })
            .collect();
        // dense strides over the padded view space
        let mut view_stride = 1;
        for axis in (0..rank).rev() {
            axes[axis].view_stride = view_stride;
            view_stride *= axes[axis].padded_extent;
        }
        let count = match rank {
            0 => 0,
            _ => axes.iter().map(|a| a.padded_extent).product(),
        };

        let mut iter = Self {
            axes,
            view_index: 0,
            count,
            offset,
        };
        if count > 0 {
            iter.seek(0);
        }
        iter
    }

    #[inline]
    pub fn count(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn view_index(&self) -> usize {
        self.view_index
    }

    /// Jumps `by` positions forward, reconstructing every axis cursor with
    /// divmod instead of stepping.
    pub fn advanced(mut self, by: usize) -> Self {
        let target = (self.view_index + by).min(self.count);
        self.view_index = target;
        if target < self.count {
            self.seek(target);
        }
        self
    }

    /// Parent context of `axis`: its sweep base in view space, the data
    /// window base, and whether every inner position is padded.
    fn parent(&self, axis: usize) -> (usize, usize, bool) {
        match axis {
            0 => (0, self.offset, false),
            _ => {
                let parent = &self.axes[axis - 1];
                (parent.view_current, parent.data_current, parent.current_is_pad)
            }
        }
    }

    /// Restarts `axis` at its parent's current position.
    fn rebase(&mut self, axis: usize) {
        let (view_base, data_base, parent_pad) = self.parent(axis);
        let a = &mut self.axes[axis];
        a.view_current = view_base;
        a.view_end = view_base + a.padded_extent * a.view_stride;
        a.pad_lower = view_base + a.before * a.view_stride;
        a.pad_upper = view_base + (a.before + a.extent) * a.view_stride;
        a.parent_is_pad = parent_pad;
        a.data_current = data_base + (a.align % a.data_extent) * a.data_stride;
        a.data_end = data_base + a.data_span();
        a.current_is_pad =
            parent_pad || a.view_current < a.pad_lower || a.view_current >= a.pad_upper;
    }

    fn increment(&mut self, axis: usize) {
        let a = &mut self.axes[axis];
        a.view_current += a.view_stride;
        if axis > 0 && a.view_current == a.view_end {
            self.increment(axis - 1);
            self.rebase(axis);
            return;
        }
        // data advances only out of non-padded positions; the wrap at the
        // window end is what repeats broadcast data
        if !a.current_is_pad {
            a.data_current += a.data_stride;
            if a.data_current == a.data_end {
                a.data_current -= a.data_span();
            }
        }
        a.current_is_pad =
            a.parent_is_pad || a.view_current < a.pad_lower || a.view_current >= a.pad_upper;
    }

    /// Positions every axis cursor at the padded-space index `target`.
    fn seek(&mut self, target: usize) {
        debug_assert!(target < self.count);
        for axis in 0..self.axes.len() {
            let (view_base, data_base, parent_pad) = self.parent(axis);
            let a = &mut self.axes[axis];
            let coord = (target / a.view_stride) % a.padded_extent;
            a.view_current = view_base + coord * a.view_stride;
            a.view_end = view_base + a.padded_extent * a.view_stride;
            a.pad_lower = view_base + a.before * a.view_stride;
            a.pad_upper = view_base + (a.before + a.extent) * a.view_stride;
            a.parent_is_pad = parent_pad;
            a.current_is_pad = parent_pad || coord < a.before || coord >= a.before + a.extent;
            // the data cursor holds at its base through before-padding and
            // is unobservable through after-padding
            let axis_coord = coord.saturating_sub(a.before).min(a.extent.saturating_sub(1));
            a.data_current = data_base + ((axis_coord + a.align) % a.data_extent) * a.data_stride;
            a.data_end = data_base + a.data_span();
        }
        self.view_index = target;
    }
}

impl Iterator for PaddedIter {
    type Item = IndexStep;

    fn next(&mut self) -> Option<Self::Item> {
        if self.view_index >= self.count {
            return None;
        }
        let inner = self.axes.last().expect("rank is at least one");
        let step = IndexStep {
            view_index: self.view_index,
            data_index: inner.data_current,
            pad: inner.current_is_pad,
        };
        self.view_index += 1;
        if self.view_index < self.count {
            self.increment(self.axes.len() - 1);
        }
        Some(step)
    }

    fn nth(&mut self, n: usize) -> Option<Self::Item> {
        *self = self.clone().advanced(n);
        self.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.count - self.view_index.min(self.count);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for PaddedIter {}

/// A traversal of either family behind one interface, chosen by rank and
/// padding at view-access time.
#[derive(Debug, Clone)]
pub enum IndexIter {
    Vector(VectorIter),
    Matrix(MatrixIter),
    Volume(VolumeIter),
    General(PaddedIter),
}

impl IndexIter {
    pub fn count(&self) -> usize {
        match self {
            IndexIter::Vector(iter) => iter.count(),
            IndexIter::Matrix(iter) => iter.count(),
            IndexIter::Volume(iter) => iter.count(),
            IndexIter::General(iter) => iter.count(),
        }
    }

    pub fn advanced(self, by: usize) -> Self {
        match self {
            IndexIter::Vector(iter) => IndexIter::Vector(iter.advanced(by)),
            IndexIter::Matrix(iter) => IndexIter::Matrix(iter.advanced(by)),
            IndexIter::Volume(iter) => IndexIter::Volume(iter.advanced(by)),
            IndexIter::General(iter) => IndexIter::General(iter.advanced(by)),
        }
    }
}

impl Iterator for IndexIter {
    type Item = IndexStep;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            IndexIter::Vector(iter) => iter.next(),
            IndexIter::Matrix(iter) => iter.next(),
            IndexIter::Volume(iter) => iter.next(),
            IndexIter::General(iter) => iter.next(),
        }
    }

    fn nth(&mut self, n: usize) -> Option<Self::Item> {
        match self {
            IndexIter::Vector(iter) => iter.nth(n),
            IndexIter::Matrix(iter) => iter.nth(n),
            IndexIter::Volume(iter) => iter.nth(n),
            IndexIter::General(iter) => iter.nth(n),
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match self {
            IndexIter::Vector(iter) => iter.size_hint(),
            IndexIter::Matrix(iter) => iter.size_hint(),
            IndexIter::Volume(iter) => iter.size_hint(),
            IndexIter::General(iter) => iter.size_hint(),
        }
    }
}

impl ExactSizeIterator for IndexIter {}
