//! Functions, signatures and shader stages.

use std::fmt;
use std::ops::BitOr;

use crate::arena::Handle;
use crate::stmt::Block;
use crate::types::Type;
use crate::var::Variable;

/// Signature flags, as a bit set.
#[derive(Clone, Copy, Debug, Default, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FunctionFlags(u8);

impl FunctionFlags {
    /// The signature has a body.
    pub const DEFINED: Self = Self(0x1);
    /// The signature is the program's entry point.
    pub const ENTRY_POINT: Self = Self(0x2);
    /// The signature is provided by the compiler.
    pub const INTRINSIC: Self = Self(0x4);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }
}

impl BitOr for FunctionFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Return type of a signature and its semantic.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FunctionResult {
    pub ty: Handle<Type>,
    pub semantic: Option<String>,
}

/// One signature. Overloads are distinct functions sharing a name.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Function {
    pub name: String,
    /// Parameter variables; their storage mode gives the direction.
    pub parameters: Vec<Handle<Variable>>,
    pub result: Option<FunctionResult>,
    pub body: Block,
    pub flags: FunctionFlags,
    /// `[numthreads(x, y, z)]` of a compute entry point.
    pub workgroup_size: Option<[u32; 3]>,
}

impl Function {
    /// A defined function with an empty body.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameters: Vec::new(),
            result: None,
            body: Vec::new(),
            flags: FunctionFlags::DEFINED,
            workgroup_size: None,
        }
    }

    pub fn is_entry_point(&self) -> bool {
        self.flags.contains(FunctionFlags::ENTRY_POINT)
    }

    pub fn is_defined(&self) -> bool {
        self.flags.contains(FunctionFlags::DEFINED)
    }

    pub fn is_intrinsic(&self) -> bool {
        self.flags.contains(FunctionFlags::INTRINSIC)
    }

    /// Defined by the program rather than provided by the compiler.
    pub fn is_user_defined(&self) -> bool {
        self.is_defined() && !self.is_intrinsic()
    }
}

/// A shading stage.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Stage {
    Vertex,
    Pixel,
    Compute,
    Geometry,
    Hull,
    Domain,
}

impl Stage {
    /// Single-letter tag used in generated resource names.
    pub fn tag(self) -> char {
        match self {
            Self::Vertex => 'v',
            Self::Pixel => 'p',
            Self::Compute => 'c',
            Self::Geometry => 'g',
            Self::Hull => 'h',
            Self::Domain => 'd',
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Vertex => "vertex",
            Self::Pixel => "pixel",
            Self::Compute => "compute",
            Self::Geometry => "geometry",
            Self::Hull => "hull",
            Self::Domain => "domain",
        })
    }
}

impl std::str::FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, String> {
        match s {
            "vertex" | "vs" => Ok(Self::Vertex),
            "pixel" | "fragment" | "ps" => Ok(Self::Pixel),
            "compute" | "cs" => Ok(Self::Compute),
            "geometry" | "gs" => Ok(Self::Geometry),
            "hull" | "hs" => Ok(Self::Hull),
            "domain" | "ds" => Ok(Self::Domain),
            _ => Err(format!("unknown shader stage '{s}'")),
        }
    }
}
