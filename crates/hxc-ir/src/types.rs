//! Shading-language type descriptors.

use std::fmt;

use crate::arena::Handle;
use crate::var::{Binding, StorageAccess};

/// The fundamental kind of a scalar value.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ScalarKind {
    Bool,
    Sint,
    Uint,
    Float,
}

/// A scalar type: kind plus byte width. Half precision is `Float` of width 2.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Scalar {
    pub kind: ScalarKind,
    pub width: u8,
}

impl Scalar {
    pub const BOOL: Self = Self {
        kind: ScalarKind::Bool,
        width: 1,
    };
    pub const I32: Self = Self {
        kind: ScalarKind::Sint,
        width: 4,
    };
    pub const U32: Self = Self {
        kind: ScalarKind::Uint,
        width: 4,
    };
    pub const F16: Self = Self {
        kind: ScalarKind::Float,
        width: 2,
    };
    pub const F32: Self = Self {
        kind: ScalarKind::Float,
        width: 4,
    };

    /// `true` for half-precision floats.
    pub const fn is_half(self) -> bool {
        matches!(self.kind, ScalarKind::Float) && self.width == 2
    }

    /// `true` for floats of any width.
    pub const fn is_float(self) -> bool {
        matches!(self.kind, ScalarKind::Float)
    }

    /// `true` for signed and unsigned integers.
    pub const fn is_integer(self) -> bool {
        matches!(self.kind, ScalarKind::Sint | ScalarKind::Uint)
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match (self.kind, self.width) {
            (ScalarKind::Bool, _) => "bool",
            (ScalarKind::Sint, _) => "int",
            (ScalarKind::Uint, _) => "uint",
            (ScalarKind::Float, 2) => "half",
            (ScalarKind::Float, _) => "float",
        })
    }
}

/// Number of components in a vector, or columns/rows of a matrix.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum VectorSize {
    Bi = 2,
    Tri = 3,
    Quad = 4,
}

impl VectorSize {
    /// Component count as an integer.
    pub const fn len(self) -> u32 {
        self as u32
    }

    /// Maps 2..=4 to a vector size.
    pub const fn from_len(len: u32) -> Option<Self> {
        match len {
            2 => Some(Self::Bi),
            3 => Some(Self::Tri),
            4 => Some(Self::Quad),
            _ => None,
        }
    }
}

/// Dimensionality of a texture or image.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ImageDim {
    D1,
    D2,
    D3,
    Cube,
}

/// What operations a texture-like object supports.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ImageClass {
    /// A read-only texture sampled through a sampler state.
    Sampled { multisampled: bool },
    /// A depth texture usable with comparison samplers.
    Depth { multisampled: bool },
    /// A read/write image (`RWTexture*`).
    Storage { access: StorageAccess },
}

/// A member of a struct type.
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StructMember {
    pub name: String,
    pub ty: Handle<Type>,
    /// Source-level binding annotation, e.g. `TEXCOORD0`.
    pub semantic: Option<String>,
    /// Target binding assigned by entry-point synthesis.
    pub binding: Option<Binding>,
}

impl StructMember {
    /// A plain member with no semantic or binding.
    pub fn new(name: impl Into<String>, ty: Handle<Type>) -> Self {
        Self {
            name: name.into(),
            ty,
            semantic: None,
            binding: None,
        }
    }

    /// A member annotated with a source semantic.
    pub fn with_semantic(name: impl Into<String>, ty: Handle<Type>, semantic: &str) -> Self {
        Self {
            semantic: Some(semantic.to_string()),
            ..Self::new(name, ty)
        }
    }
}

/// The shape of a type.
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TypeInner {
    Scalar(Scalar),
    Vector {
        size: VectorSize,
        scalar: Scalar,
    },
    Matrix {
        columns: VectorSize,
        rows: VectorSize,
        scalar: Scalar,
    },
    Array {
        base: Handle<Type>,
        size: u32,
    },
    /// `packed` structs use the source constant-buffer layout.
    Struct {
        members: Vec<StructMember>,
        packed: bool,
    },
    Image {
        dim: ImageDim,
        arrayed: bool,
        class: ImageClass,
        scalar: Scalar,
    },
    Sampler {
        comparison: bool,
    },
    /// A typed or structured buffer; `writable` buffers are UAVs.
    Buffer {
        base: Handle<Type>,
        writable: bool,
    },
    /// A tessellation input/output patch.
    Patch {
        base: Handle<Type>,
        size: u32,
    },
}

impl TypeInner {
    /// Scalar component type of scalars, vectors and matrices.
    pub fn scalar(&self) -> Option<Scalar> {
        match *self {
            Self::Scalar(s) | Self::Vector { scalar: s, .. } | Self::Matrix { scalar: s, .. } => {
                Some(s)
            }
            _ => None,
        }
    }

    /// Number of scalar components of scalars, vectors and matrices.
    pub fn component_count(&self) -> Option<u32> {
        match *self {
            Self::Scalar(_) => Some(1),
            Self::Vector { size, .. } => Some(size.len()),
            Self::Matrix { columns, rows, .. } => Some(columns.len() * rows.len()),
            _ => None,
        }
    }

    /// The same shape with its scalar component replaced.
    ///
    /// Returns `None` for types without a scalar component.
    pub fn with_scalar(&self, scalar: Scalar) -> Option<Self> {
        match *self {
            Self::Scalar(_) => Some(Self::Scalar(scalar)),
            Self::Vector { size, .. } => Some(Self::Vector { size, scalar }),
            Self::Matrix { columns, rows, .. } => Some(Self::Matrix {
                columns,
                rows,
                scalar,
            }),
            _ => None,
        }
    }

    /// `true` for scalar, vector and matrix types.
    pub fn is_numeric(&self) -> bool {
        self.scalar().is_some()
    }

    /// `true` for textures, samplers and buffers, which never live in
    /// ordinary memory.
    pub fn is_opaque(&self) -> bool {
        matches!(
            self,
            Self::Image { .. } | Self::Sampler { .. } | Self::Buffer { .. }
        )
    }

    /// `true` for storage images and writable buffers.
    pub fn is_writable_resource(&self) -> bool {
        matches!(
            self,
            Self::Image {
                class: ImageClass::Storage { .. },
                ..
            } | Self::Buffer { writable: true, .. }
        )
    }
}

/// An interned type.
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Type {
    pub name: Option<String>,
    pub inner: TypeInner,
}

impl Type {
    /// An anonymous type.
    pub fn anonymous(inner: TypeInner) -> Self {
        Self { name: None, inner }
    }
}
