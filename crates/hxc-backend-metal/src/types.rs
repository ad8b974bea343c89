//! Metal spelling of IR types.

use std::collections::HashSet;

use hxc_backend_core::BackendError;
use hxc_ir::names::sanitize;
use hxc_ir::{Handle, ImageClass, ImageDim, Module, Scalar, ScalarKind, StorageAccess, Type, TypeInner};

/// Name of the struct declared for `ty`.
pub fn struct_name(module: &Module, ty: Handle<Type>) -> String {
    match module.types[ty].name.as_deref() {
        Some(name) if !name.is_empty() => sanitize(name),
        _ => format!("_Struct{}", ty.index()),
    }
}

/// Spells `ty`. With `atomic`, integer scalars become `atomic_int` and
/// `atomic_uint`, also inside arrays and buffers.
pub fn type_name(module: &Module, ty: Handle<Type>, atomic: bool) -> Result<String, BackendError> {
    let inner = module.resolver().type_inner(ty)?;
    match *inner {
        TypeInner::Struct { .. } => Ok(struct_name(module, ty)),
        ref other => inner_name(module, other, atomic),
    }
}

/// Spells an anonymous type shape.
pub fn inner_name(module: &Module, inner: &TypeInner, atomic: bool) -> Result<String, BackendError> {
    Ok(match *inner {
        TypeInner::Scalar(scalar) if atomic && scalar.is_integer() => format!("atomic_{scalar}"),
        TypeInner::Scalar(scalar) => scalar.to_string(),
        TypeInner::Vector { size, scalar } => format!("{scalar}{}", size.len()),
        TypeInner::Matrix {
            columns,
            rows,
            scalar,
        } => format!("{scalar}{}x{}", columns.len(), rows.len()),
        TypeInner::Array { base, size } => {
            format!("array<{}, {size}>", type_name(module, base, atomic)?)
        }
        TypeInner::Struct { .. } => {
            return Err(BackendError::Unsupported("anonymous struct type".into()))
        }
        TypeInner::Image {
            dim,
            arrayed,
            class,
            scalar,
        } => texture_name(dim, arrayed, class, scalar)?,
        TypeInner::Sampler { .. } => "sampler".to_string(),
        // Buffers are declared as pointers; this is the pointee.
        TypeInner::Buffer { base, .. } => type_name(module, base, atomic)?,
        TypeInner::Patch { .. } => {
            return Err(BackendError::Unsupported("tessellation patches".into()))
        }
    })
}

fn texture_name(dim: ImageDim, arrayed: bool, class: ImageClass, scalar: Scalar) -> Result<String, BackendError> {
    let array = if arrayed { "_array" } else { "" };
    let dim_name = match dim {
        ImageDim::D1 => "1d",
        ImageDim::D2 => "2d",
        ImageDim::D3 => "3d",
        ImageDim::Cube => "cube",
    };
    let unsupported = |what: &str| {
        Err(BackendError::Unsupported(format!(
            "{what} {dim_name}{array} textures"
        )))
    };
    match class {
        ImageClass::Sampled { multisampled } => {
            let ms = if multisampled {
                if dim != ImageDim::D2 {
                    return unsupported("multisampled");
                }
                "_ms"
            } else {
                ""
            };
            if arrayed && dim == ImageDim::D3 {
                return unsupported("arrayed");
            }
            Ok(format!("texture{dim_name}{ms}{array}<{scalar}>"))
        }
        ImageClass::Depth { multisampled } => {
            if !matches!(dim, ImageDim::D2 | ImageDim::Cube) || (multisampled && dim == ImageDim::Cube) {
                return unsupported("depth");
            }
            let ms = if multisampled { "_ms" } else { "" };
            Ok(format!("depth{dim_name}{ms}{array}<float>"))
        }
        ImageClass::Storage { access } => {
            let access = if access.contains(StorageAccess::LOAD | StorageAccess::STORE) {
                "read_write"
            } else if access.contains(StorageAccess::STORE) {
                "write"
            } else {
                "read"
            };
            Ok(format!("texture{dim_name}{array}<{scalar}, access::{access}>"))
        }
    }
}

/// Struct member spelling: packed block layouts use `packed_` vectors of
/// three components.
pub fn member_name(module: &Module, ty: Handle<Type>, packed: bool) -> Result<String, BackendError> {
    let inner = module.resolver().type_inner(ty)?;
    match *inner {
        TypeInner::Vector { size, scalar } if packed && size.len() == 3 => {
            Ok(format!("packed_{scalar}3"))
        }
        _ => type_name(module, ty, false),
    }
}

/// The value every component of `inner` is zero in, e.g. `float4(0)`.
pub fn zero_value(module: &Module, inner: &TypeInner) -> Result<String, BackendError> {
    Ok(match *inner {
        TypeInner::Scalar(Scalar {
            kind: ScalarKind::Bool,
            ..
        }) => "false".to_string(),
        TypeInner::Vector {
            size,
            scalar:
                Scalar {
                    kind: ScalarKind::Bool,
                    ..
                },
        } => format!("bool{}(false)", size.len()),
        TypeInner::Scalar(_) | TypeInner::Vector { .. } => {
            format!("{}(0)", inner_name(module, inner, false)?)
        }
        // A single scalar would only set the diagonal.
        TypeInner::Matrix {
            columns,
            rows,
            scalar,
        } => {
            let column = format!("{scalar}{}(0)", rows.len());
            let columns = vec![column; columns.len() as usize].join(", ");
            format!("{}({columns})", inner_name(module, inner, false)?)
        }
        _ => format!("{}{{}}", inner_name(module, inner, false)?),
    })
}

/// Zero of a named type; structs value-initialize.
pub fn zero_of(module: &Module, ty: Handle<Type>) -> Result<String, BackendError> {
    match *module.resolver().type_inner(ty)? {
        TypeInner::Struct { .. } => Ok(format!("{}{{}}", struct_name(module, ty))),
        ref inner => zero_value(module, inner),
    }
}

/// Layout-header code of a varying type, e.g. `f4`, `f4x4` or `u1[2]`.
pub fn type_code(module: &Module, ty: Handle<Type>) -> Result<String, BackendError> {
    let inner = module.resolver().type_inner(ty)?;
    let kind = |scalar: Scalar| match scalar.kind {
        ScalarKind::Bool => 'b',
        ScalarKind::Sint => 'i',
        ScalarKind::Uint => 'u',
        ScalarKind::Float => 'f',
    };
    Ok(match *inner {
        TypeInner::Scalar(scalar) => format!("{}1", kind(scalar)),
        TypeInner::Vector { size, scalar } => format!("{}{}", kind(scalar), size.len()),
        TypeInner::Matrix {
            columns,
            rows,
            scalar,
        } => format!("{}{}x{}", kind(scalar), columns.len(), rows.len()),
        TypeInner::Array { base, size } => format!("{}[{size}]", type_code(module, base)?),
        ref other => {
            return Err(BackendError::Unsupported(format!(
                "stage boundary value of type {}",
                hxc_ir::format_type_inner(other, &module.types)
            )))
        }
    })
}

/// Every struct reachable from `roots`, dependencies first.
pub fn struct_closure(module: &Module, roots: impl IntoIterator<Item = Handle<Type>>) -> Vec<Handle<Type>> {
    let mut seen = HashSet::new();
    let mut order = Vec::new();
    for root in roots {
        visit(module, root, &mut seen, &mut order);
    }
    order
}

fn visit(module: &Module, ty: Handle<Type>, seen: &mut HashSet<Handle<Type>>, order: &mut Vec<Handle<Type>>) {
    let Some(t) = module.types.try_get(ty) else {
        return;
    };
    match t.inner {
        TypeInner::Array { base, .. } | TypeInner::Buffer { base, .. } | TypeInner::Patch { base, .. } => {
            visit(module, base, seen, order)
        }
        TypeInner::Struct { ref members, .. } => {
            if !seen.insert(ty) {
                return;
            }
            for member in members {
                visit(module, member.ty, seen, order);
            }
            order.push(ty);
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hxc_ir::{StructMember, VectorSize};

    fn vec(module: &mut Module, size: VectorSize, scalar: Scalar) -> Handle<Type> {
        module.add_type(TypeInner::Vector { size, scalar })
    }

    #[test]
    fn spells_numeric_types() {
        let mut module = Module::default();
        let half2 = vec(&mut module, VectorSize::Bi, Scalar::F16);
        let mat = module.add_type(TypeInner::Matrix {
            columns: VectorSize::Quad,
            rows: VectorSize::Tri,
            scalar: Scalar::F32,
        });
        let uint = module.add_type(TypeInner::Scalar(Scalar::U32));
        let counters = module.add_type(TypeInner::Array { base: uint, size: 16 });
        assert_eq!(type_name(&module, half2, false).unwrap(), "half2");
        assert_eq!(type_name(&module, mat, false).unwrap(), "float4x3");
        assert_eq!(type_name(&module, counters, false).unwrap(), "array<uint, 16>");
        assert_eq!(type_name(&module, counters, true).unwrap(), "array<atomic_uint, 16>");
    }

    #[test]
    fn spells_textures() {
        let sampled = |dim, arrayed, multisampled| {
            texture_name(dim, arrayed, ImageClass::Sampled { multisampled }, Scalar::F32)
        };
        assert_eq!(sampled(ImageDim::D2, false, false).unwrap(), "texture2d<float>");
        assert_eq!(sampled(ImageDim::Cube, true, false).unwrap(), "texturecube_array<float>");
        assert_eq!(sampled(ImageDim::D2, true, true).unwrap(), "texture2d_ms_array<float>");
        assert!(sampled(ImageDim::D3, false, true).is_err());
        assert_eq!(
            texture_name(ImageDim::D2, true, ImageClass::Depth { multisampled: false }, Scalar::F32).unwrap(),
            "depth2d_array<float>"
        );
        assert_eq!(
            texture_name(
                ImageDim::D3,
                false,
                ImageClass::Storage {
                    access: StorageAccess::STORE
                },
                Scalar::U32
            )
            .unwrap(),
            "texture3d<uint, access::write>"
        );
    }

    #[test]
    fn zero_values() {
        let module = Module::default();
        let zero = |inner: TypeInner| zero_value(&module, &inner).unwrap();
        assert_eq!(zero(TypeInner::Scalar(Scalar::BOOL)), "false");
        assert_eq!(
            zero(TypeInner::Vector {
                size: VectorSize::Tri,
                scalar: Scalar::I32
            }),
            "int3(0)"
        );
        assert_eq!(
            zero(TypeInner::Matrix {
                columns: VectorSize::Bi,
                rows: VectorSize::Bi,
                scalar: Scalar::F16
            }),
            "half2x2(half2(0), half2(0))"
        );
    }

    #[test]
    fn closure_orders_dependencies_first() {
        let mut module = Module::default();
        let float4 = vec(&mut module, VectorSize::Quad, Scalar::F32);
        let light = module.add_named_type(
            "Light",
            TypeInner::Struct {
                members: vec![StructMember::new("Color", float4)],
                packed: false,
            },
        );
        let lights = module.add_type(TypeInner::Array { base: light, size: 4 });
        let scene = module.add_named_type(
            "Scene",
            TypeInner::Struct {
                members: vec![StructMember::new("Lights", lights), StructMember::new("Sun", light)],
                packed: false,
            },
        );
        let buffer = module.add_type(TypeInner::Buffer {
            base: scene,
            writable: false,
        });
        assert_eq!(struct_closure(&module, [buffer, float4, light]), vec![light, scene]);
        assert!(type_code(&module, lights).is_err());
        assert_eq!(type_code(&module, float4).unwrap(), "f4");
    }
}
