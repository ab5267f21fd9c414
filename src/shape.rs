use derive_more::Display;
use itertools::{Itertools, izip};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ShapeError {
    #[error("shape rank error: expected rank {0}, found {1}")]
    Rank(usize, usize),
    #[error("shape bounds error: offset {0} with extents {1} exceeds {2}")]
    Bounds(Coord, Coord, Shape),
    #[error("shape flatten error: axes above {0} of {1} are not contiguous")]
    Flatten(usize, Shape),
    #[error("shape transpose error: {0} has no inner axis pair")]
    Transpose(Shape),
    #[error("shape count error: {0} elements do not fill {1}")]
    Count(usize, Shape),
    #[error("padding rank error: {0} pairs for rank {1}")]
    Padding(usize, usize),
}

/// Per-axis `(before, after)` padding amounts, in elements.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize,
)]
#[display("({before}, {after})")]
pub struct Padding {
    pub before: usize,
    pub after: usize,
}

impl Padding {
    #[inline]
    pub const fn new(before: usize, after: usize) -> Self {
        Self { before, after }
    }

    #[inline]
    pub const fn total(self) -> usize {
        self.before + self.after
    }

    #[inline]
    pub const fn is_zero(self) -> bool {
        self.before == 0 && self.after == 0
    }

    /// Expands a padding list to one pair per axis. A single pair applies
    /// to every axis; otherwise the list must carry exactly `rank` pairs.
    pub fn resolve(padding: &[Padding], rank: usize) -> Result<Vec<Padding>, ShapeError> {
        match padding.len() {
            1 => Ok(vec![padding[0]; rank]),
            n if n == rank => Ok(padding.to_vec()),
            n => Err(ShapeError::Padding(n, rank)),
        }
    }
}

/// An n-dimensional coordinate, printed like a shape.
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[display("[{}]", _0.iter().format(", "))]
pub struct Coord(pub Vec<usize>);

impl From<&[usize]> for Coord {
    #[inline]
    fn from(value: &[usize]) -> Self {
        Self(value.to_vec())
    }
}

/// Extents and strides of one tensor aperture.
///
/// Strides are in element units and non-negative; default construction is
/// row-major. An empty (rank-0) shape holds no elements.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[display("[{}]/[{}]", extents.iter().format(", "), strides.iter().format(", "))]
pub struct Shape {
    extents: Vec<usize>,
    strides: Vec<usize>,
}

fn default_strides(extents: &[usize]) -> Vec<usize> {
    let mut strides = vec![1; extents.len()];
    for i in (0..extents.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * extents[i + 1];
    }
    strides
}

impl Shape {
    /// Creates a row-major shape from extents.
    pub fn new(extents: impl Into<Vec<usize>>) -> Self {
        let extents = extents.into();
        let strides = default_strides(&extents);
        Self { extents, strides }
    }

    /// Creates a column-major shape: the two inner axes are swapped before
    /// the default stride computation and the strides swapped back.
    pub fn column_major(extents: impl Into<Vec<usize>>) -> Self {
        let extents = extents.into();
        let rank = extents.len();
        if rank < 2 {
            return Self::new(extents);
        }
        let mut swapped = extents.clone();
        swapped.swap(rank - 2, rank - 1);
        let mut strides = default_strides(&swapped);
        strides.swap(rank - 2, rank - 1);
        Self { extents, strides }
    }

    /// Creates a shape with explicit strides.
    pub fn with_strides(
        extents: impl Into<Vec<usize>>,
        strides: impl Into<Vec<usize>>,
    ) -> Result<Self, ShapeError> {
        let extents = extents.into();
        let strides = strides.into();
        if extents.len() != strides.len() {
            return Err(ShapeError::Rank(extents.len(), strides.len()));
        }
        Ok(Self { extents, strides })
    }

    #[inline]
    pub fn rank(&self) -> usize {
        self.extents.len()
    }

    #[inline]
    pub fn extents(&self) -> &[usize] {
        &self.extents
    }

    #[inline]
    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    /// Logical element count. Empty shapes hold no elements.
    #[inline]
    pub fn element_count(&self) -> usize {
        match self.extents.is_empty() {
            true => 0,
            false => self.extents.iter().product(),
        }
    }

    /// Physical range covered by the shape: `1 + Σ (extent - 1) · stride`.
    pub fn span_count(&self) -> usize {
        match self.element_count() {
            0 => 0,
            _ => {
                1 + izip!(&self.extents, &self.strides)
                    .map(|(&e, &s)| (e - 1) * s)
                    .sum::<usize>()
            }
        }
    }

    /// A shape is contiguous when every physical position inside its span is
    /// covered by exactly one logical element.
    #[inline]
    pub fn is_contiguous(&self) -> bool {
        self.element_count() == self.span_count()
    }

    /// Maps a coordinate to its physical element offset. The coordinate must
    /// lie inside the extents.
    #[inline]
    pub fn linear_index(&self, coord: &[usize]) -> usize {
        debug_assert_eq!(coord.len(), self.rank());
        debug_assert!(izip!(coord, &self.extents).all(|(&c, &e)| c < e));
        izip!(coord, &self.strides).map(|(&c, &s)| c * s).sum()
    }

    /// Swaps the two inner axes of both extents and strides.
    pub fn transposed(&self) -> Result<Self, ShapeError> {
        let rank = self.rank();
        if rank < 2 {
            return Err(ShapeError::Transpose(self.clone()));
        }
        let mut extents = self.extents.clone();
        let mut strides = self.strides.clone();
        extents.swap(rank - 2, rank - 1);
        strides.swap(rank - 2, rank - 1);
        Ok(Self { extents, strides })
    }

    /// Collapses the axes strictly above `axis` into it. Legal only when the
    /// tail region starting at `axis` is contiguous.
    pub fn flattened(&self, axis: usize) -> Result<Self, ShapeError> {
        if axis >= self.rank() {
            return Err(ShapeError::Rank(self.rank(), axis));
        }
        let tail = default_strides(&self.extents[axis..]);
        if self.strides[axis..] != tail {
            return Err(ShapeError::Flatten(axis, self.clone()));
        }
        let mut extents = self.extents.clone();
        let mut strides = self.strides.clone();
        extents[axis] = self.extents[axis..].iter().product();
        strides[axis] = 1;
        for i in axis + 1..self.rank() {
            extents[i] = 1;
            strides[i] = 1;
        }
        Ok(Self { extents, strides })
    }

    /// Expands each extent by its padding pair. Strides propagate unchanged
    /// so data-region offsets stay valid.
    pub fn padded(&self, padding: &[Padding]) -> Result<Self, ShapeError> {
        let padding = Padding::resolve(padding, self.rank())?;
        let extents = izip!(&self.extents, &padding)
            .map(|(&e, p)| e + p.total())
            .collect();
        let strides = self.strides.clone();
        Ok(Self { extents, strides })
    }

    /// Dense row-major strides over these extents, used as the view-space
    /// strides of padded traversal.
    pub fn dense_strides(&self) -> Vec<usize> {
        default_strides(&self.extents)
    }
}

/// Returns `true` if any axis carries a non-zero padding pair.
pub fn has_padding(padding: &[Padding]) -> bool {
    padding.iter().any(|p| !p.is_zero())
}
