//! Static type derivation for expressions.
//!
//! Every expression's type follows from its operator and operands; this
//! module computes it on demand. A failure here is an internal error.

use crate::arena::{Arena, Handle, UniqueArena};
use crate::error::IrError;
use crate::expr::{BinaryOp, Expression, ImageQuery, MathFunction};
use crate::types::{ImageClass, ImageDim, Scalar, Type, TypeInner, VectorSize};
use crate::var::Variable;

/// Resolves expression types against a module's arenas.
#[derive(Clone, Copy)]
pub struct TypeResolver<'a> {
    types: &'a UniqueArena<Type>,
    variables: &'a Arena<Variable>,
    expressions: &'a Arena<Expression>,
}

impl<'a> TypeResolver<'a> {
    pub fn new(
        types: &'a UniqueArena<Type>,
        variables: &'a Arena<Variable>,
        expressions: &'a Arena<Expression>,
    ) -> Self {
        Self {
            types,
            variables,
            expressions,
        }
    }

    /// Inner type behind a type handle.
    pub fn type_inner(&self, ty: Handle<Type>) -> Result<&'a TypeInner, IrError> {
        self.types
            .try_get(ty)
            .map(|t| &t.inner)
            .ok_or(IrError::BadHandle {
                kind: "type",
                index: ty.index(),
                size: self.types.len(),
            })
    }

    /// Scalar component type of a numeric expression.
    pub fn resolve_scalar(&self, handle: Handle<Expression>) -> Result<Scalar, IrError> {
        let inner = self.resolve(handle)?;
        inner
            .scalar()
            .ok_or_else(|| fail(handle, format!("{inner:?} is not numeric")))
    }

    /// Derives the type of `handle`.
    pub fn resolve(&self, handle: Handle<Expression>) -> Result<TypeInner, IrError> {
        let expr = self
            .expressions
            .try_get(handle)
            .ok_or(IrError::BadHandle {
                kind: "expression",
                index: handle.index(),
                size: self.expressions.len(),
            })?;
        match *expr {
            Expression::Literal(lit) => Ok(TypeInner::Scalar(lit.scalar())),
            Expression::Compose { ty, .. } | Expression::ZeroValue(ty) => {
                self.type_inner(ty).cloned()
            }
            Expression::Variable(var) => {
                let var = self.variables.try_get(var).ok_or(IrError::BadHandle {
                    kind: "variable",
                    index: var.index(),
                    size: self.variables.len(),
                })?;
                self.type_inner(var.ty).cloned()
            }
            Expression::Access { base, .. } => self.element(handle, base, None),
            Expression::AccessIndex { base, index } => self.element(handle, base, Some(index)),
            Expression::Swizzle { size, vector, .. } => {
                let scalar = self.resolve_scalar(vector)?;
                Ok(TypeInner::Vector { size, scalar })
            }
            Expression::Unary { expr, .. } => self.resolve(expr),
            Expression::Binary { op, left, right } => self.binary(handle, op, left, right),
            Expression::Select { accept, reject, .. } => {
                Ok(combine(&self.resolve(accept)?, &self.resolve(reject)?))
            }
            Expression::Math { fun, arg, arg1, .. } => self.math(handle, fun, arg, arg1),
            Expression::As { expr, kind, width } => {
                let inner = self.resolve(expr)?;
                inner
                    .with_scalar(Scalar { kind, width })
                    .ok_or_else(|| fail(handle, format!("cannot convert {inner:?}")))
            }
            Expression::ImageSample { image, gather, .. } => match self.resolve(image)? {
                TypeInner::Image {
                    class: ImageClass::Depth { .. },
                    ..
                } if gather.is_none() => {
                    Ok(TypeInner::Scalar(Scalar::F32))
                }
                TypeInner::Image { scalar, .. } => Ok(TypeInner::Vector {
                    size: VectorSize::Quad,
                    scalar,
                }),
                other => Err(fail(handle, format!("sampling non-image {other:?}"))),
            },
            Expression::ImageLoad { image, .. } => match self.resolve(image)? {
                TypeInner::Image { scalar, .. } => Ok(TypeInner::Vector {
                    size: VectorSize::Quad,
                    scalar,
                }),
                other => Err(fail(handle, format!("loading from non-image {other:?}"))),
            },
            Expression::ImageQuery { image, query } => match (self.resolve(image)?, query) {
                (_, ImageQuery::NumLevels) => Ok(TypeInner::Scalar(Scalar::U32)),
                (TypeInner::Image { dim, arrayed, .. }, ImageQuery::Size { .. }) => {
                    let dims = match dim {
                        ImageDim::D1 => 1,
                        ImageDim::D2 | ImageDim::Cube => 2,
                        ImageDim::D3 => 3,
                    } + u32::from(arrayed);
                    Ok(match VectorSize::from_len(dims) {
                        Some(size) => TypeInner::Vector {
                            size,
                            scalar: Scalar::U32,
                        },
                        None => TypeInner::Scalar(Scalar::U32),
                    })
                }
                (other, _) => Err(fail(handle, format!("querying non-image {other:?}"))),
            },
        }
    }

    fn element(
        &self,
        handle: Handle<Expression>,
        base: Handle<Expression>,
        index: Option<u32>,
    ) -> Result<TypeInner, IrError> {
        let base_ty = self.resolve(base)?;
        let out_of_range = |len: u32| match index {
            Some(i) if i >= len => Err(IrError::InvalidAccess {
                base: format!("{base_ty:?}"),
                index: i,
            }),
            _ => Ok(()),
        };
        match base_ty {
            TypeInner::Vector { size, scalar } => {
                out_of_range(size.len())?;
                Ok(TypeInner::Scalar(scalar))
            }
            TypeInner::Matrix {
                columns,
                rows,
                scalar,
            } => {
                out_of_range(columns.len())?;
                Ok(TypeInner::Vector { size: rows, scalar })
            }
            TypeInner::Array { base, size } | TypeInner::Patch { base, size } => {
                out_of_range(size)?;
                self.type_inner(base).cloned()
            }
            TypeInner::Buffer { base, .. } => self.type_inner(base).cloned(),
            TypeInner::Struct { ref members, .. } => match index {
                Some(i) => match members.get(i as usize) {
                    Some(member) => self.type_inner(member.ty).cloned(),
                    None => Err(IrError::InvalidAccess {
                        base: format!("{base_ty:?}"),
                        index: i,
                    }),
                },
                None => Err(fail(handle, "dynamic index into a struct".into())),
            },
            ref other => Err(fail(handle, format!("cannot index into {other:?}"))),
        }
    }

    fn binary(
        &self,
        handle: Handle<Expression>,
        op: BinaryOp,
        left: Handle<Expression>,
        right: Handle<Expression>,
    ) -> Result<TypeInner, IrError> {
        let l = self.resolve(left)?;
        let r = self.resolve(right)?;
        if op.is_reduction() {
            return Ok(TypeInner::Scalar(Scalar::BOOL));
        }
        if op.is_comparison() || op.is_logical() {
            let shape = combine(&l, &r);
            return shape
                .with_scalar(Scalar::BOOL)
                .ok_or_else(|| fail(handle, format!("comparing {shape:?}")));
        }
        match (op, &l, &r) {
            (
                BinaryOp::Multiply,
                &TypeInner::Matrix { rows, scalar, .. },
                &TypeInner::Vector { .. },
            ) => Ok(TypeInner::Vector { size: rows, scalar }),
            (
                BinaryOp::Multiply,
                &TypeInner::Vector { scalar, .. },
                &TypeInner::Matrix { columns, .. },
            ) => Ok(TypeInner::Vector {
                size: columns,
                scalar,
            }),
            (
                BinaryOp::Multiply,
                &TypeInner::Matrix { rows, scalar, .. },
                &TypeInner::Matrix { columns, .. },
            ) => Ok(TypeInner::Matrix {
                columns,
                rows,
                scalar,
            }),
            (BinaryOp::ShiftLeft | BinaryOp::ShiftRight, _, _) => Ok(l),
            _ => Ok(combine(&l, &r)),
        }
    }

    fn math(
        &self,
        handle: Handle<Expression>,
        fun: MathFunction,
        arg: Handle<Expression>,
        arg1: Option<Handle<Expression>>,
    ) -> Result<TypeInner, IrError> {
        let a = self.resolve(arg)?;
        let scalar = a
            .scalar()
            .ok_or_else(|| fail(handle, format!("{fun:?} of {a:?}")))?;
        let reshape = |s: Scalar| {
            a.with_scalar(s)
                .ok_or_else(|| fail(handle, format!("{fun:?} of {a:?}")))
        };
        match fun {
            MathFunction::Dot
            | MathFunction::Length
            | MathFunction::Distance
            | MathFunction::Determinant => Ok(TypeInner::Scalar(scalar)),
            MathFunction::Any | MathFunction::All => Ok(TypeInner::Scalar(Scalar::BOOL)),
            MathFunction::IsNan | MathFunction::IsInf => reshape(Scalar::BOOL),
            MathFunction::CountBits => reshape(Scalar::U32),
            MathFunction::AsInt => reshape(Scalar::I32),
            MathFunction::AsUint => reshape(Scalar::U32),
            MathFunction::AsFloat => reshape(Scalar::F32),
            MathFunction::Transpose => match a {
                TypeInner::Matrix {
                    columns,
                    rows,
                    scalar,
                } => Ok(TypeInner::Matrix {
                    columns: rows,
                    rows: columns,
                    scalar,
                }),
                _ => Err(fail(handle, "transpose of a non-matrix".into())),
            },
            _ => match arg1 {
                Some(other) if fun.argument_count() >= 2 => Ok(combine(&a, &self.resolve(other)?)),
                _ => Ok(a),
            },
        }
    }
}

/// Result shape of a component-wise operation: vectors win over scalars and
/// the wider of two float precisions wins.
pub fn combine(l: &TypeInner, r: &TypeInner) -> TypeInner {
    let shape = match (l, r) {
        (TypeInner::Scalar(_), other) => other.clone(),
        (other, _) => other.clone(),
    };
    match (l.scalar(), r.scalar()) {
        (Some(a), Some(b)) if a.kind == b.kind && a.width != b.width => {
            let wide = if a.width > b.width { a } else { b };
            shape.with_scalar(wide).unwrap_or(shape)
        }
        _ => shape,
    }
}

fn fail(handle: Handle<Expression>, reason: String) -> IrError {
    IrError::TypeResolution {
        expression: handle.index(),
        reason,
    }
}
