//! Variables, storage modes and target bindings.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use crate::arena::Handle;
use crate::expr::Expression;
use crate::types::Type;

/// Where a variable's storage lives.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum StorageMode {
    /// Stage input or `in` parameter.
    Input,
    /// Stage output or `out` parameter.
    Output,
    /// `inout` parameter.
    InOut,
    /// Uniform constant, sampler, texture or buffer.
    Uniform,
    /// Compiler-introduced temporary.
    Temporary,
    /// `groupshared` memory.
    Shared,
    /// Ordinary local or `static` global.
    Auto,
}

impl fmt::Display for StorageMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Input => "in",
            Self::Output => "out",
            Self::InOut => "inout",
            Self::Uniform => "uniform",
            Self::Temporary => "temporary",
            Self::Shared => "shared",
            Self::Auto => "auto",
        })
    }
}

/// Declared access of a storage image, as a bit set.
#[derive(Clone, Copy, Debug, Default, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StorageAccess(u8);

impl StorageAccess {
    pub const LOAD: Self = Self(0x1);
    pub const STORE: Self = Self(0x2);

    /// Returns `true` if every bit in `other` is set in `self`.
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for StorageAccess {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for StorageAccess {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// A fixed-function value with a platform-defined binding.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BuiltIn {
    VertexIndex,
    InstanceIndex,
    /// Clip-space position out of a vertex stage, window position into a
    /// pixel stage.
    Position,
    PointSize,
    ClipDistance(u8),
    RenderTargetArrayIndex,
    ViewportArrayIndex,
    FrontFacing,
    SampleIndex,
    SampleMask,
    Depth,
    GlobalInvocationId,
    WorkGroupId,
    LocalInvocationId,
    LocalInvocationIndex,
}

/// A target binding attached by entry-point synthesis.
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Binding {
    BuiltIn(BuiltIn),
    /// Vertex fetch slot.
    Attribute(u32),
    /// Generic interpolated varying keyed by semantic name.
    User(String),
    /// Render target output.
    Color(u32),
    /// The single aggregate input of a stage.
    StageIn,
}

/// A named, typed storage location.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Variable {
    pub name: Option<String>,
    pub ty: Handle<Type>,
    pub mode: StorageMode,
    /// Source binding annotation.
    pub semantic: Option<String>,
    /// Target binding, set on synthesized interface variables.
    pub binding: Option<Binding>,
    pub read_only: bool,
    /// Constant initializer.
    pub init: Option<Handle<Expression>>,
    pub used: bool,
}

impl Variable {
    /// A named variable with no annotations.
    pub fn new(name: impl Into<String>, ty: Handle<Type>, mode: StorageMode) -> Self {
        Self {
            name: Some(name.into()),
            ty,
            mode,
            semantic: None,
            binding: None,
            read_only: false,
            init: None,
            used: false,
        }
    }

    /// An anonymous compiler temporary.
    pub fn temporary(ty: Handle<Type>) -> Self {
        Self {
            name: None,
            ..Self::new(String::new(), ty, StorageMode::Temporary)
        }
    }

    /// Builder-style semantic annotation.
    pub fn with_semantic(mut self, semantic: &str) -> Self {
        self.semantic = Some(semantic.to_string());
        self
    }

    /// Declared name, or `"<anonymous>"`.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("<anonymous>")
    }
}

/// A source `cbuffer`: a named group of uniform variables.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct UniformBlock {
    pub name: String,
    pub members: Vec<Handle<Variable>>,
}
