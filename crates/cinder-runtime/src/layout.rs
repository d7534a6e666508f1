//! Layout descriptors: element type, memory format and shape
//!
//! A [`Layout`] is immutable. Anything that needs a different shape (for
//! example resolving a dynamic layout once the real sizes are known) builds
//! a new one with [`Layout::with_shape`].

use serde::{Deserialize, Serialize};
use std::fmt;

// ================================================================================================
// Data Types
// ================================================================================================

/// Element data type of a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    F16,
    F32,
    I8,
    I16,
    I32,
    I64,
    U8,
}

impl DataType {
    /// Every supported data type
    pub const ALL: [DataType; 7] = [
        DataType::F16,
        DataType::F32,
        DataType::I8,
        DataType::I16,
        DataType::I32,
        DataType::I64,
        DataType::U8,
    ];

    /// Size of one element in bytes
    pub const fn size_of(self) -> usize {
        match self {
            DataType::I8 | DataType::U8 => 1,
            DataType::F16 | DataType::I16 => 2,
            DataType::F32 | DataType::I32 => 4,
            DataType::I64 => 8,
        }
    }

    pub const fn is_floating_point(self) -> bool {
        matches!(self, DataType::F16 | DataType::F32)
    }

    /// Short lowercase name (`"f32"`, `"i64"`, ...)
    pub const fn name(self) -> &'static str {
        match self {
            DataType::F16 => "f16",
            DataType::F32 => "f32",
            DataType::I8 => "i8",
            DataType::I16 => "i16",
            DataType::I32 => "i32",
            DataType::I64 => "i64",
            DataType::U8 => "u8",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|dt| dt.name() == name)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Host element types that can be viewed inside locked memory
pub trait Element: bytemuck::Pod + Send + Sync {
    const DATA_TYPE: DataType;
}

macro_rules! impl_element {
    ($($ty:ty => $dt:ident),+ $(,)?) => {
        $(impl Element for $ty {
            const DATA_TYPE: DataType = DataType::$dt;
        })+
    };
}

impl_element! {
    half::f16 => F16,
    f32 => F32,
    i8 => I8,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    u8 => U8,
}

// ================================================================================================
// Formats
// ================================================================================================

/// Memory format: the ordering convention of buffer elements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    /// batch, feature, y, x
    Bfyx,
    /// batch, feature, z, y, x
    Bfzyx,
    /// batch, feature, w, z, y, x
    Bfwzyx,
    /// batch, y, x, feature
    Byxf,
    /// y, x, feature, batch
    Yxfb,
}

impl Format {
    pub const ALL: [Format; 5] = [Format::Bfyx, Format::Bfzyx, Format::Bfwzyx, Format::Byxf, Format::Yxfb];

    /// Number of dimensions the format orders
    pub const fn dimension(self) -> usize {
        match self {
            Format::Bfyx | Format::Byxf | Format::Yxfb => 4,
            Format::Bfzyx => 5,
            Format::Bfwzyx => 6,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Format::Bfyx => "bfyx",
            Format::Bfzyx => "bfzyx",
            Format::Bfwzyx => "bfwzyx",
            Format::Byxf => "byxf",
            Format::Yxfb => "yxfb",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|format| format.name() == name)
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ================================================================================================
// Shapes
// ================================================================================================

/// One dimension of a shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dimension {
    Static(usize),
    Dynamic,
}

impl Dimension {
    pub const fn get(self) -> Option<usize> {
        match self {
            Dimension::Static(n) => Some(n),
            Dimension::Dynamic => None,
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dimension::Static(n) => write!(f, "{n}"),
            Dimension::Dynamic => f.write_str("?"),
        }
    }
}

/// Possibly-dynamic tensor shape. An empty shape is a scalar.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Shape {
    dims: Vec<Dimension>,
}

impl Shape {
    /// Fully static shape
    pub fn new(dims: &[usize]) -> Self {
        Self {
            dims: dims.iter().copied().map(Dimension::Static).collect(),
        }
    }

    pub fn from_dims(dims: Vec<Dimension>) -> Self {
        Self { dims }
    }

    pub fn scalar() -> Self {
        Self::default()
    }

    /// Shape of the given rank with every dimension unknown
    pub fn dynamic(rank: usize) -> Self {
        Self {
            dims: vec![Dimension::Dynamic; rank],
        }
    }

    pub fn dims(&self) -> &[Dimension] {
        &self.dims
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn is_dynamic(&self) -> bool {
        self.dims.iter().any(|d| matches!(d, Dimension::Dynamic))
    }

    /// Element count, `None` while any dimension is dynamic or the product overflows
    pub fn count(&self) -> Option<usize> {
        self.dims.iter().try_fold(1usize, |acc, d| acc.checked_mul(d.get()?))
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, dim) in self.dims.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{dim}")?;
        }
        f.write_str("]")
    }
}

// ================================================================================================
// Layout
// ================================================================================================

/// Immutable buffer descriptor
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Layout {
    data_type: DataType,
    format: Format,
    shape: Shape,
}

impl Layout {
    pub fn new(data_type: DataType, format: Format, shape: Shape) -> Self {
        Self {
            data_type,
            format,
            shape,
        }
    }

    /// Static layout from plain dimensions
    pub fn from_dims(data_type: DataType, format: Format, dims: &[usize]) -> Self {
        Self::new(data_type, format, Shape::new(dims))
    }

    /// Single-element layout
    pub fn scalar(data_type: DataType, format: Format) -> Self {
        Self::new(data_type, format, Shape::scalar())
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn is_dynamic(&self) -> bool {
        self.shape.is_dynamic()
    }

    pub fn count(&self) -> Option<usize> {
        self.shape.count()
    }

    /// Byte size, `None` while dynamic or when it does not fit in `usize`
    pub fn bytes_count(&self) -> Option<usize> {
        self.count()?.checked_mul(self.data_type.size_of())
    }

    pub fn is_scalar(&self) -> bool {
        self.count() == Some(1)
    }

    /// Same type and format, different shape
    pub fn with_shape(&self, shape: Shape) -> Self {
        Self::new(self.data_type, self.format, shape)
    }
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.data_type, self.format, self.shape)
    }
}
