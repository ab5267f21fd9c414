use bytemuck::{Pod, Zeroable};
use derive_more::Display;
use half::f16;
use serde::{Deserialize, Serialize};

/// The closed set of element kinds a storage can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
pub enum DataType {
    U8,
    U16,
    I16,
    I32,
    I64,
    U64,
    F16,
    F32,
    F64,
    Bool,
    Rgb,
    Rgba,
    Stereo,
}

impl DataType {
    /// Returns the number of scalar components packed in one element.
    pub const fn count(self) -> usize {
        match self {
            DataType::U8 => 1,
            DataType::U16 => 1,
            DataType::I16 => 1,
            DataType::I32 => 1,
            DataType::I64 => 1,
            DataType::U64 => 1,
            DataType::F16 => 1,
            DataType::F32 => 1,
            DataType::F64 => 1,
            DataType::Bool => 1,
            DataType::Rgb => 3,
            DataType::Rgba => 4,
            DataType::Stereo => 2,
        }
    }

    /// Returns the canonical byte size of one element.
    pub const fn size(self) -> usize {
        match self {
            DataType::U8 => 1,
            DataType::U16 => 2,
            DataType::I16 => 2,
            DataType::I32 => 4,
            DataType::I64 => 8,
            DataType::U64 => 8,
            DataType::F16 => 2,
            DataType::F32 => 4,
            DataType::F64 => 8,
            DataType::Bool => 1,
            DataType::Rgb => 12,
            DataType::Rgba => 16,
            DataType::Stereo => 8,
        }
    }

    /// Returns the component kind of a composite, or the kind itself for scalars.
    pub const fn component(self) -> DataType {
        match self {
            DataType::Rgb | DataType::Rgba | DataType::Stereo => DataType::F32,
            kind => kind,
        }
    }

    /// Returns `true` for fixed-size vector composites.
    pub const fn is_composite(self) -> bool {
        self.count() > 1
    }
}

macro_rules! impl_bytemuck {
    ($ty:ty) => {
        unsafe impl ::bytemuck::Zeroable for $ty {}
        unsafe impl ::bytemuck::Pod for $ty {}
    };
}

/// One-byte boolean element. `bool` itself has invalid bit patterns and
/// cannot be `Pod`; any non-zero byte reads back as `true`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct Bool(pub u8);

impl Bool {
    pub const FALSE: Self = Self(0);
    pub const TRUE: Self = Self(1);

    #[inline]
    pub const fn value(self) -> bool {
        self.0 != 0
    }
}

impl From<bool> for Bool {
    #[inline]
    fn from(value: bool) -> Self {
        Self(value as u8)
    }
}

/// Three consecutive `f32` color components.
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[repr(C)]
pub struct Rgb(pub [f32; 3]);

/// Four consecutive `f32` color components.
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[repr(C)]
pub struct Rgba(pub [f32; 4]);

/// A two-channel `f32` audio frame.
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[repr(C)]
pub struct Stereo(pub [f32; 2]);

impl_bytemuck!(Bool);
impl_bytemuck!(Rgb);
impl_bytemuck!(Rgba);
impl_bytemuck!(Stereo);

pub trait Zero {
    fn zero() -> Self;
}

impl Zero for u8 {
    fn zero() -> Self {
        0
    }
}

impl Zero for u16 {
    fn zero() -> Self {
        0
    }
}

impl Zero for i16 {
    fn zero() -> Self {
        0
    }
}

impl Zero for i32 {
    fn zero() -> Self {
        0
    }
}

impl Zero for i64 {
    fn zero() -> Self {
        0
    }
}

impl Zero for u64 {
    fn zero() -> Self {
        0
    }
}

impl Zero for f16 {
    fn zero() -> Self {
        Self::ZERO
    }
}

impl Zero for f32 {
    fn zero() -> Self {
        0.0
    }
}

impl Zero for f64 {
    fn zero() -> Self {
        0.0
    }
}

impl Zero for Bool {
    fn zero() -> Self {
        Self::FALSE
    }
}

impl Zero for Rgb {
    fn zero() -> Self {
        Self([0.0; 3])
    }
}

impl Zero for Rgba {
    fn zero() -> Self {
        Self([0.0; 4])
    }
}

impl Zero for Stereo {
    fn zero() -> Self {
        Self([0.0; 2])
    }
}

pub trait One {
    fn one() -> Self;
}

impl One for u8 {
    fn one() -> Self {
        1
    }
}

impl One for u16 {
    fn one() -> Self {
        1
    }
}

impl One for i16 {
    fn one() -> Self {
        1
    }
}

impl One for i32 {
    fn one() -> Self {
        1
    }
}

impl One for i64 {
    fn one() -> Self {
        1
    }
}

impl One for u64 {
    fn one() -> Self {
        1
    }
}

impl One for f16 {
    fn one() -> Self {
        Self::ONE
    }
}

impl One for f32 {
    fn one() -> Self {
        1.0
    }
}

impl One for f64 {
    fn one() -> Self {
        1.0
    }
}

impl One for Bool {
    fn one() -> Self {
        Self::TRUE
    }
}

impl One for Rgb {
    fn one() -> Self {
        Self([1.0; 3])
    }
}

impl One for Rgba {
    fn one() -> Self {
        Self([1.0; 4])
    }
}

impl One for Stereo {
    fn one() -> Self {
        Self([1.0; 2])
    }
}

pub trait Scalar:
    Sized + Zeroable + Pod + Zero + One + PartialEq + std::fmt::Debug + Send + Sync
{
    const DATA_TYPE: DataType;
}

impl Scalar for u8 {
    const DATA_TYPE: DataType = DataType::U8;
}

impl Scalar for u16 {
    const DATA_TYPE: DataType = DataType::U16;
}

impl Scalar for i16 {
    const DATA_TYPE: DataType = DataType::I16;
}

impl Scalar for i32 {
    const DATA_TYPE: DataType = DataType::I32;
}

impl Scalar for i64 {
    const DATA_TYPE: DataType = DataType::I64;
}

impl Scalar for u64 {
    const DATA_TYPE: DataType = DataType::U64;
}

impl Scalar for f16 {
    const DATA_TYPE: DataType = DataType::F16;
}

impl Scalar for f32 {
    const DATA_TYPE: DataType = DataType::F32;
}

impl Scalar for f64 {
    const DATA_TYPE: DataType = DataType::F64;
}

impl Scalar for Bool {
    const DATA_TYPE: DataType = DataType::Bool;
}

impl Scalar for Rgb {
    const DATA_TYPE: DataType = DataType::Rgb;
}

impl Scalar for Rgba {
    const DATA_TYPE: DataType = DataType::Rgba;
}

impl Scalar for Stereo {
    const DATA_TYPE: DataType = DataType::Stereo;
}

/// A fixed-size vector element whose memory layout is `COMPONENTS`
/// consecutive components. Reinterpreting a composite tensor as its
/// component scalar is a pure reshape, never a data copy.
pub trait Composite: Scalar {
    type Component: Scalar;
    const COMPONENTS: usize;
}

impl Composite for Rgb {
    type Component = f32;
    const COMPONENTS: usize = 3;
}

impl Composite for Rgba {
    type Component = f32;
    const COMPONENTS: usize = 4;
}

impl Composite for Stereo {
    type Component = f32;
    const COMPONENTS: usize = 2;
}
