//! Rewrites references to packed uniforms and to members of aggregated
//! uniform blocks.

use std::collections::{BTreeMap, HashMap};

use hxc_ir::visit::{ExpressionRewriter, RewriteContext, Role};
use hxc_ir::{
    BinaryOp, Expression, Handle, Literal, Module, Scalar, ScalarKind, Type, TypeInner, Variable,
};

use crate::layout::{footprint, register_stride, PackedArray};

/// Where the components of a packed uniform live.
#[derive(Clone, Debug)]
pub(crate) enum Placement {
    /// The whole value, starting at `offset`.
    Value { array: PackedArray, offset: u32 },
    /// A flattened structure: one start per leaf path.
    Fields(HashMap<Vec<u32>, (PackedArray, u32)>),
}

/// A dereference chain resolved against the packed layout.
enum Location {
    Packed {
        ty: Handle<Type>,
        array: PackedArray,
        offset: u32,
        /// Extra component offset computed at run time.
        dynamic: Option<Handle<Expression>>,
    },
    Fields {
        var: Handle<Variable>,
        path: Vec<u32>,
        ty: Handle<Type>,
    },
}

enum Step {
    Constant(u32),
    Dynamic(Handle<Expression>),
}

/// Interns the scalar and column-vector types that [`PackedRewriter`]
/// needs to rebuild values of type `ty`.
pub(crate) fn intern_parts(module: &mut Module, ty: Handle<Type>) {
    let Some(inner) = module.types.try_get(ty).map(|t| t.inner.clone()) else {
        return;
    };
    match inner {
        TypeInner::Vector { scalar, .. } => {
            module.add_type(TypeInner::Scalar(scalar));
        }
        TypeInner::Matrix { rows, scalar, .. } => {
            module.add_type(TypeInner::Vector { size: rows, scalar });
            module.add_type(TypeInner::Scalar(scalar));
        }
        TypeInner::Array { base, .. } => intern_parts(module, base),
        TypeInner::Struct { members, .. } => {
            for member in members {
                intern_parts(module, member.ty);
            }
        }
        _ => {}
    }
}

pub(crate) struct PackedRewriter<'a> {
    pub placements: &'a HashMap<Handle<Variable>, Placement>,
    pub arrays: &'a BTreeMap<PackedArray, Handle<Variable>>,
    /// Block member -> (aggregate variable, field index).
    pub members: &'a HashMap<Handle<Variable>, (Handle<Variable>, u32)>,
}

fn anonymous(ctx: &RewriteContext<'_>, inner: TypeInner) -> Option<Handle<Type>> {
    ctx.types.get(&Type::anonymous(inner))
}

fn literal(ctx: &mut RewriteContext<'_>, value: u32) -> Handle<Expression> {
    ctx.expressions
        .append(Expression::Literal(Literal::U32(value)))
}

impl PackedRewriter<'_> {
    fn locate(&self, ctx: &mut RewriteContext<'_>, handle: Handle<Expression>) -> Option<Location> {
        match ctx.expressions[handle] {
            Expression::Variable(var) => {
                let ty = ctx.variables[var].ty;
                Some(match *self.placements.get(&var)? {
                    Placement::Value { array, offset } => Location::Packed {
                        ty,
                        array,
                        offset,
                        dynamic: None,
                    },
                    Placement::Fields(_) => Location::Fields {
                        var,
                        path: Vec::new(),
                        ty,
                    },
                })
            }
            Expression::AccessIndex { base, index } => {
                let location = self.locate(ctx, base)?;
                self.step(ctx, location, Step::Constant(index))
            }
            Expression::Access { base, index } => {
                let location = self.locate(ctx, base)?;
                self.step(ctx, location, Step::Dynamic(index))
            }
            _ => None,
        }
    }

    fn step(&self, ctx: &mut RewriteContext<'_>, location: Location, step: Step) -> Option<Location> {
        match location {
            Location::Fields { var, mut path, ty } => {
                let Step::Constant(field) = step else {
                    return None;
                };
                let TypeInner::Struct { ref members, .. } = ctx.types.try_get(ty)?.inner else {
                    return None;
                };
                let member_ty = members.get(field as usize)?.ty;
                path.push(field);
                let Placement::Fields(ref leaves) = *self.placements.get(&var)? else {
                    return None;
                };
                Some(match leaves.get(&path) {
                    Some(&(array, offset)) => Location::Packed {
                        ty: member_ty,
                        array,
                        offset,
                        dynamic: None,
                    },
                    None => Location::Fields {
                        var,
                        path,
                        ty: member_ty,
                    },
                })
            }
            Location::Packed {
                ty,
                array,
                offset,
                dynamic,
            } => {
                let (element, stride) = match ctx.types.try_get(ty)?.inner {
                    TypeInner::Array { base, .. } => {
                        let inner = &ctx.types.try_get(base)?.inner;
                        (base, register_stride(footprint(ctx.types, inner).ok()?))
                    }
                    TypeInner::Vector { scalar, .. } => {
                        (anonymous(ctx, TypeInner::Scalar(scalar))?, 1)
                    }
                    TypeInner::Matrix { rows, scalar, .. } => {
                        (anonymous(ctx, TypeInner::Vector { size: rows, scalar })?, 4)
                    }
                    _ => return None,
                };
                Some(match step {
                    Step::Constant(k) => Location::Packed {
                        ty: element,
                        array,
                        offset: offset + k * stride,
                        dynamic,
                    },
                    Step::Dynamic(index) => {
                        let scalar = ctx.resolver().resolve_scalar(index).ok();
                        let index = match scalar {
                            Some(Scalar::U32) => index,
                            _ => ctx.expressions.append(Expression::As {
                                expr: index,
                                kind: ScalarKind::Uint,
                                width: 4,
                            }),
                        };
                        let scaled = if stride == 1 {
                            index
                        } else {
                            let stride = literal(ctx, stride);
                            ctx.expressions.append(Expression::Binary {
                                op: BinaryOp::Multiply,
                                left: index,
                                right: stride,
                            })
                        };
                        let dynamic = match dynamic {
                            Some(d) => ctx.expressions.append(Expression::Binary {
                                op: BinaryOp::Add,
                                left: d,
                                right: scaled,
                            }),
                            None => scaled,
                        };
                        Location::Packed {
                            ty: element,
                            array,
                            offset,
                            dynamic: Some(dynamic),
                        }
                    }
                })
            }
        }
    }

    /// One component read from a packed array.
    fn component(
        &self,
        ctx: &mut RewriteContext<'_>,
        array: PackedArray,
        offset: u32,
        dynamic: Option<Handle<Expression>>,
    ) -> Option<Handle<Expression>> {
        let base = ctx
            .expressions
            .append(Expression::Variable(*self.arrays.get(&array)?));
        Some(match dynamic {
            None => ctx.expressions.append(Expression::AccessIndex {
                base,
                index: offset,
            }),
            Some(dynamic) => {
                let index = if offset == 0 {
                    dynamic
                } else {
                    let offset = literal(ctx, offset);
                    ctx.expressions.append(Expression::Binary {
                        op: BinaryOp::Add,
                        left: dynamic,
                        right: offset,
                    })
                };
                ctx.expressions.append(Expression::Access { base, index })
            }
        })
    }

    /// Rebuilds a value of type `ty` from consecutive packed components.
    fn build(
        &self,
        ctx: &mut RewriteContext<'_>,
        ty: Handle<Type>,
        array: PackedArray,
        offset: u32,
        dynamic: Option<Handle<Expression>>,
    ) -> Option<Handle<Expression>> {
        let inner = ctx.types.try_get(ty)?.inner.clone();
        let mut components = Vec::new();
        match inner {
            TypeInner::Scalar(_) => return self.component(ctx, array, offset, dynamic),
            TypeInner::Vector { size, .. } => {
                for i in 0..size.len() {
                    components.push(self.component(ctx, array, offset + i, dynamic)?);
                }
            }
            TypeInner::Matrix {
                columns,
                rows,
                scalar,
            } => {
                let column = anonymous(ctx, TypeInner::Vector { size: rows, scalar })?;
                for c in 0..columns.len() {
                    components.push(self.build(ctx, column, array, offset + c * 4, dynamic)?);
                }
            }
            TypeInner::Array { base, size } => {
                let stride = register_stride(footprint(ctx.types, &ctx.types.try_get(base)?.inner).ok()?);
                for i in 0..size {
                    components.push(self.build(ctx, base, array, offset + i * stride, dynamic)?);
                }
            }
            _ => return None,
        }
        Some(ctx.expressions.append(Expression::Compose { ty, components }))
    }

    /// Rebuilds a (sub-)structure of a flattened uniform from its leaves.
    fn build_fields(
        &self,
        ctx: &mut RewriteContext<'_>,
        var: Handle<Variable>,
        path: &mut Vec<u32>,
        ty: Handle<Type>,
    ) -> Option<Handle<Expression>> {
        let TypeInner::Struct { ref members, .. } = ctx.types.try_get(ty)?.inner else {
            return None;
        };
        let member_types: Vec<_> = members.iter().map(|m| m.ty).collect();
        let Placement::Fields(ref leaves) = *self.placements.get(&var)? else {
            return None;
        };
        let mut components = Vec::with_capacity(member_types.len());
        for (i, member_ty) in member_types.into_iter().enumerate() {
            path.push(i as u32);
            let component = match leaves.get(path.as_slice()) {
                Some(&(array, offset)) => self.build(ctx, member_ty, array, offset, None),
                None => self.build_fields(ctx, var, path, member_ty),
            };
            path.pop();
            components.push(component?);
        }
        Some(ctx.expressions.append(Expression::Compose { ty, components }))
    }
}

impl ExpressionRewriter for PackedRewriter<'_> {
    fn rewrite(
        &mut self,
        ctx: &mut RewriteContext<'_>,
        handle: Handle<Expression>,
        role: Role,
    ) -> Option<Handle<Expression>> {
        if role.is_write() {
            return None;
        }
        if let Expression::Variable(var) = ctx.expressions[handle] {
            if let Some(&(aggregate, field)) = self.members.get(&var) {
                let base = ctx.expressions.append(Expression::Variable(aggregate));
                return Some(ctx.expressions.append(Expression::AccessIndex { base, index: field }));
            }
        }
        match self.locate(ctx, handle)? {
            Location::Packed {
                ty,
                array,
                offset,
                dynamic,
            } => self.build(ctx, ty, array, offset, dynamic),
            Location::Fields { var, mut path, ty } => self.build_fields(ctx, var, &mut path, ty),
        }
    }
}
