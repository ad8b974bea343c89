//! Packed-array placement and HLSL constant-buffer footprints.
//!
//! All sizes and offsets are in 4-byte components. A constant-buffer
//! register holds four components.

use std::collections::BTreeMap;
use std::fmt;

use hxc_ir::{Handle, Scalar, ScalarKind, Stage, Type, TypeInner, UniqueArena};

use crate::PackError;

/// One precision-keyed packed uniform array.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub enum PackedArray {
    Float,
    Half,
    Int,
    Uint,
    Bool,
}

impl PackedArray {
    pub const ALL: [Self; 5] = [Self::Float, Self::Half, Self::Int, Self::Uint, Self::Bool];

    /// Single-letter code used in variable names and layout headers.
    pub fn code(self) -> char {
        match self {
            Self::Float => 'h',
            Self::Half => 'm',
            Self::Int => 'i',
            Self::Uint => 'u',
            Self::Bool => 'b',
        }
    }

    pub fn for_scalar(scalar: Scalar) -> Self {
        match scalar.kind {
            ScalarKind::Float if scalar.is_half() => Self::Half,
            ScalarKind::Float => Self::Float,
            ScalarKind::Sint => Self::Int,
            ScalarKind::Uint => Self::Uint,
            ScalarKind::Bool => Self::Bool,
        }
    }

    /// Element type of the array.
    pub fn element(self) -> Scalar {
        match self {
            Self::Float => Scalar::F32,
            Self::Half => Scalar::F16,
            Self::Int => Scalar::I32,
            Self::Uint => Scalar::U32,
            Self::Bool => Scalar::BOOL,
        }
    }

    /// Name of the array variable for `stage`, e.g. `pu_h`.
    pub fn variable_name(self, stage: Stage) -> String {
        format!("{}u_{}", stage.tag(), self.code())
    }
}

impl fmt::Display for PackedArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Distance between consecutive array elements: whole registers.
pub fn register_stride(footprint: u32) -> u32 {
    footprint.div_ceil(4) * 4
}

fn inner_of<'a>(types: &'a UniqueArena<Type>, ty: Handle<Type>) -> Result<&'a TypeInner, PackError> {
    types.try_get(ty).map(|t| &t.inner).ok_or_else(|| {
        PackError::Internal(hxc_ir::IrError::BadHandle {
            kind: "type",
            index: ty.index(),
            size: types.len(),
        })
    })
}

/// Components a value occupies in a constant buffer: array elements and
/// matrix columns take whole registers except the last one.
pub fn footprint(types: &UniqueArena<Type>, inner: &TypeInner) -> Result<u32, PackError> {
    Ok(match *inner {
        TypeInner::Scalar(_) => 1,
        TypeInner::Vector { size, .. } => size.len(),
        TypeInner::Matrix { columns, rows, .. } => (columns.len() - 1) * 4 + rows.len(),
        TypeInner::Array { base, size } => {
            if size == 0 {
                return Ok(0);
            }
            let element = footprint(types, inner_of(types, base)?)?;
            (size - 1) * register_stride(element) + element
        }
        TypeInner::Struct { ref members, .. } => {
            let mut cursor = Cursor::default();
            for member in members {
                let inner = inner_of(types, member.ty)?;
                cursor.place(footprint(types, inner)?, starts_register(inner));
            }
            cursor.offset
        }
        _ => {
            return Err(PackError::UnsupportedUniform {
                name: String::new(),
                ty: format!("{inner:?}"),
            })
        }
    })
}

fn starts_register(inner: &TypeInner) -> bool {
    matches!(
        inner,
        TypeInner::Array { .. } | TypeInner::Matrix { .. } | TypeInner::Struct { .. }
    )
}

/// Running offset while laying out constant-buffer members.
#[derive(Debug, Default)]
pub struct Cursor {
    pub offset: u32,
}

impl Cursor {
    /// Places a member of `size` components and returns its offset. A
    /// member never straddles a register; aggregates start a new one.
    pub fn place(&mut self, size: u32, aggregate: bool) -> u32 {
        let used = self.offset % 4;
        if used != 0 && (aggregate || used + size > 4) {
            self.offset = register_stride(self.offset);
        }
        let at = self.offset;
        self.offset += size;
        at
    }
}

/// Offsets of consecutive members in a constant buffer.
pub fn member_offsets(types: &UniqueArena<Type>, members: &[Handle<Type>]) -> Result<Vec<u32>, PackError> {
    let mut cursor = Cursor::default();
    members
        .iter()
        .map(|&ty| {
            let inner = inner_of(types, ty)?;
            Ok(cursor.place(footprint(types, inner)?, starts_register(inner)))
        })
        .collect()
}

/// A packable piece of a uniform: the whole value, or one leaf field of a
/// flattened structure.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Leaf {
    /// Field indices from the uniform down to this leaf.
    pub path: Vec<u32>,
    /// `Var` or `Var.field.sub`.
    pub name: String,
    pub ty: Handle<Type>,
    pub array: PackedArray,
    pub size: u32,
    /// Offset relative to the start of the uniform in constant-buffer layout.
    pub source_offset: u32,
}

/// Splits a uniform of type `ty` into leaves.
pub fn leaves(
    types: &UniqueArena<Type>,
    name: &str,
    ty: Handle<Type>,
    flatten_structs: bool,
) -> Result<Vec<Leaf>, PackError> {
    let mut out = Vec::new();
    collect_leaves(types, name, ty, flatten_structs, &mut Vec::new(), 0, &mut out)?;
    Ok(out)
}

fn collect_leaves(
    types: &UniqueArena<Type>,
    name: &str,
    ty: Handle<Type>,
    flatten_structs: bool,
    path: &mut Vec<u32>,
    source_offset: u32,
    out: &mut Vec<Leaf>,
) -> Result<(), PackError> {
    let inner = inner_of(types, ty)?;
    if let TypeInner::Struct { ref members, .. } = *inner {
        if !flatten_structs {
            return Err(PackError::StructUniform(name.to_string()));
        }
        let offsets = member_offsets(types, &members.iter().map(|m| m.ty).collect::<Vec<_>>())?;
        for (i, (member, offset)) in members.iter().zip(offsets).enumerate() {
            path.push(i as u32);
            let field = format!("{name}.{}", member.name);
            collect_leaves(
                types,
                &field,
                member.ty,
                flatten_structs,
                path,
                source_offset + offset,
                out,
            )?;
            path.pop();
        }
        return Ok(());
    }

    let scalar = packable_scalar(types, inner).ok_or_else(|| PackError::UnsupportedUniform {
        name: name.to_string(),
        ty: hxc_ir::format_type_inner(inner, types),
    })?;
    out.push(Leaf {
        path: path.clone(),
        name: name.to_string(),
        ty,
        array: PackedArray::for_scalar(scalar),
        size: footprint(types, inner)?,
        source_offset,
    });
    Ok(())
}

/// Scalar type of a scalar, vector, matrix, or (nested) array of those.
fn packable_scalar(types: &UniqueArena<Type>, inner: &TypeInner) -> Option<Scalar> {
    match *inner {
        TypeInner::Scalar(s) | TypeInner::Vector { scalar: s, .. } | TypeInner::Matrix { scalar: s, .. } => {
            Some(s)
        }
        TypeInner::Array { base, .. } => packable_scalar(types, &types.try_get(base)?.inner),
        _ => None,
    }
}

/// Dense allocation of components within each packed array.
#[derive(Debug, Default)]
pub struct ArrayAllocator {
    totals: BTreeMap<PackedArray, u32>,
}

impl ArrayAllocator {
    /// Reserves `size` components at the end of `array`.
    pub fn allocate(&mut self, array: PackedArray, size: u32) -> u32 {
        let total = self.totals.entry(array).or_default();
        let offset = *total;
        *total += size;
        offset
    }

    /// Non-empty arrays with their total sizes, in code order.
    pub fn totals(&self) -> impl Iterator<Item = (PackedArray, u32)> + '_ {
        self.totals
            .iter()
            .filter(|&(_, &size)| size > 0)
            .map(|(&array, &size)| (array, size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hxc_ir::{StructMember, VectorSize};

    fn vec_ty(types: &mut UniqueArena<Type>, n: VectorSize) -> Handle<Type> {
        types.insert(Type::anonymous(TypeInner::Vector {
            size: n,
            scalar: Scalar::F32,
        }))
    }

    #[test]
    fn array_and_matrix_footprints() {
        let mut types = UniqueArena::new();
        let f = types.insert(Type::anonymous(TypeInner::Scalar(Scalar::F32)));
        let v3 = vec_ty(&mut types, VectorSize::Tri);
        let floats = TypeInner::Array { base: f, size: 3 };
        let vecs = TypeInner::Array { base: v3, size: 2 };
        let mat = TypeInner::Matrix {
            columns: VectorSize::Quad,
            rows: VectorSize::Tri,
            scalar: Scalar::F32,
        };
        assert_eq!(footprint(&types, &floats).unwrap(), 9);
        assert_eq!(footprint(&types, &vecs).unwrap(), 7);
        assert_eq!(footprint(&types, &mat).unwrap(), 15);
    }

    #[test]
    fn members_do_not_straddle_registers() {
        let mut types = UniqueArena::new();
        let f = types.insert(Type::anonymous(TypeInner::Scalar(Scalar::F32)));
        let v2 = vec_ty(&mut types, VectorSize::Bi);
        let v3 = vec_ty(&mut types, VectorSize::Tri);
        // float3, float, float2, float3 -> 0, 3, 4, 8
        assert_eq!(member_offsets(&types, &[v3, f, v2, v3]).unwrap(), [0, 3, 4, 8]);
        // float, float, float3 -> the vector moves to the next register
        assert_eq!(member_offsets(&types, &[f, f, v3]).unwrap(), [0, 1, 4]);
    }

    #[test]
    fn struct_leaves_carry_paths_and_offsets() {
        let mut types = UniqueArena::new();
        let f = types.insert(Type::anonymous(TypeInner::Scalar(Scalar::F32)));
        let i = types.insert(Type::anonymous(TypeInner::Scalar(Scalar::I32)));
        let v4 = vec_ty(&mut types, VectorSize::Quad);
        let light = types.insert(Type {
            name: Some("Light".into()),
            inner: TypeInner::Struct {
                members: vec![
                    StructMember::new("Color", v4),
                    StructMember::new("Range", f),
                    StructMember::new("Kind", i),
                ],
                packed: false,
            },
        });
        let found = leaves(&types, "Sun", light, true).unwrap();
        let summary: Vec<_> = found
            .iter()
            .map(|l| (l.name.as_str(), l.path.clone(), l.array, l.size, l.source_offset))
            .collect();
        assert_eq!(
            summary,
            [
                ("Sun.Color", vec![0], PackedArray::Float, 4, 0),
                ("Sun.Range", vec![1], PackedArray::Float, 1, 4),
                ("Sun.Kind", vec![2], PackedArray::Int, 1, 5),
            ]
        );
        assert_eq!(
            leaves(&types, "Sun", light, false),
            Err(PackError::StructUniform("Sun".into()))
        );
    }

    #[test]
    fn allocation_is_dense() {
        let mut alloc = ArrayAllocator::default();
        assert_eq!(alloc.allocate(PackedArray::Float, 4), 0);
        assert_eq!(alloc.allocate(PackedArray::Int, 1), 0);
        assert_eq!(alloc.allocate(PackedArray::Float, 3), 4);
        let totals: Vec<_> = alloc.totals().collect();
        assert_eq!(totals, [(PackedArray::Float, 7), (PackedArray::Int, 1)]);
        assert_eq!(PackedArray::Half.variable_name(Stage::Pixel), "pu_m");
    }
}
