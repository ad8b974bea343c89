//! Value-producing nodes.

use std::hash::{Hash, Hasher};

use crate::arena::Handle;
use crate::types::{Scalar, ScalarKind, Type, VectorSize};
use crate::var::Variable;

/// A vector swizzle component.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SwizzleComponent {
    X = 0,
    Y = 1,
    Z = 2,
    W = 3,
}

impl SwizzleComponent {
    pub const ALL: [Self; 4] = [Self::X, Self::Y, Self::Z, Self::W];

    pub fn letter(self) -> char {
        ['x', 'y', 'z', 'w'][self as usize]
    }
}

/// A scalar literal. Float literals compare and hash by bit pattern.
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Literal {
    Bool(bool),
    I32(i32),
    U32(u32),
    F16(f32),
    F32(f32),
}

impl Literal {
    /// The scalar type of this literal.
    pub fn scalar(&self) -> Scalar {
        match *self {
            Self::Bool(_) => Scalar::BOOL,
            Self::I32(_) => Scalar::I32,
            Self::U32(_) => Scalar::U32,
            Self::F16(_) => Scalar::F16,
            Self::F32(_) => Scalar::F32,
        }
    }

    /// The zero value of `scalar`.
    pub fn zero(scalar: Scalar) -> Self {
        match scalar.kind {
            ScalarKind::Bool => Self::Bool(false),
            ScalarKind::Sint => Self::I32(0),
            ScalarKind::Uint => Self::U32(0),
            ScalarKind::Float if scalar.width == 2 => Self::F16(0.0),
            ScalarKind::Float => Self::F32(0.0),
        }
    }

    fn bits(&self) -> u64 {
        match *self {
            Self::Bool(b) => b as u64,
            Self::I32(v) => v as u32 as u64,
            Self::U32(v) => v as u64,
            Self::F16(v) | Self::F32(v) => v.to_bits() as u64,
        }
    }
}

impl PartialEq for Literal {
    fn eq(&self, other: &Self) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other) && self.bits() == other.bits()
    }
}

impl Eq for Literal {}

impl Hash for Literal {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        self.bits().hash(state);
    }
}

#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum UnaryOp {
    Negate,
    LogicalNot,
    BitwiseNot,
}

#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    /// Scalar `true` if every component compares equal.
    AllEqual,
    /// Scalar `true` if any component differs.
    AnyNotEqual,
    LogicalAnd,
    LogicalOr,
    LogicalXor,
    BitwiseAnd,
    BitwiseOr,
    BitwiseXor,
    ShiftLeft,
    ShiftRight,
}

impl BinaryOp {
    /// Component-wise comparisons producing booleans of the operand shape.
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            Self::Equal
                | Self::NotEqual
                | Self::Less
                | Self::LessEqual
                | Self::Greater
                | Self::GreaterEqual
        )
    }

    pub fn is_logical(self) -> bool {
        matches!(self, Self::LogicalAnd | Self::LogicalOr | Self::LogicalXor)
    }

    pub fn is_reduction(self) -> bool {
        matches!(self, Self::AllEqual | Self::AnyNotEqual)
    }
}

/// Built-in math and geometric functions.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MathFunction {
    // unary, component-wise
    Abs,
    Sign,
    Saturate,
    Rcp,
    Sqrt,
    Rsqrt,
    Exp,
    Exp2,
    Log,
    Log2,
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Sinh,
    Cosh,
    Tanh,
    Floor,
    Ceil,
    Round,
    Trunc,
    Fract,
    Ddx,
    Ddy,
    IsNan,
    IsInf,
    CountBits,
    ReverseBits,
    FirstBitHigh,
    FirstBitLow,
    AsInt,
    AsUint,
    AsFloat,
    // unary, reducing or reshaping
    Length,
    Normalize,
    Any,
    All,
    Transpose,
    Determinant,
    // binary
    Min,
    Max,
    Pow,
    Step,
    Atan2,
    Fmod,
    Dot,
    Cross,
    Distance,
    Reflect,
    // ternary
    Clamp,
    Lerp,
    SmoothStep,
    Fma,
    Refract,
    // quaternary
    Bfi,
}

impl MathFunction {
    /// Number of operands.
    pub fn argument_count(self) -> usize {
        match self {
            Self::Min
            | Self::Max
            | Self::Pow
            | Self::Step
            | Self::Atan2
            | Self::Fmod
            | Self::Dot
            | Self::Cross
            | Self::Distance
            | Self::Reflect => 2,
            Self::Clamp | Self::Lerp | Self::SmoothStep | Self::Fma | Self::Refract => 3,
            Self::Bfi => 4,
            _ => 1,
        }
    }
}

/// Which level of detail a texture sample uses.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SampleLevel {
    Auto,
    Zero,
    Exact(Handle<Expression>),
    Bias(Handle<Expression>),
    Gradient {
        x: Handle<Expression>,
        y: Handle<Expression>,
    },
}

#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ImageQuery {
    Size { level: Option<Handle<Expression>> },
    NumLevels,
}

/// A value-producing node.
///
/// Expressions form a DAG rooted at statements; a handle may be shared by
/// several parents but never refers back to an ancestor.
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Expression {
    Literal(Literal),
    /// Constructs a vector, matrix, array or struct from components.
    Compose {
        ty: Handle<Type>,
        components: Vec<Handle<Expression>>,
    },
    ZeroValue(Handle<Type>),
    /// Dereference of a variable. Usable as an lvalue.
    Variable(Handle<Variable>),
    /// Dynamic array, vector or matrix element.
    Access {
        base: Handle<Expression>,
        index: Handle<Expression>,
    },
    /// Struct field or constant element.
    AccessIndex {
        base: Handle<Expression>,
        index: u32,
    },
    Swizzle {
        size: VectorSize,
        vector: Handle<Expression>,
        pattern: [SwizzleComponent; 4],
    },
    Unary {
        op: UnaryOp,
        expr: Handle<Expression>,
    },
    Binary {
        op: BinaryOp,
        left: Handle<Expression>,
        right: Handle<Expression>,
    },
    /// `condition ? accept : reject`.
    Select {
        condition: Handle<Expression>,
        accept: Handle<Expression>,
        reject: Handle<Expression>,
    },
    Math {
        fun: MathFunction,
        arg: Handle<Expression>,
        arg1: Option<Handle<Expression>>,
        arg2: Option<Handle<Expression>>,
        arg3: Option<Handle<Expression>>,
    },
    /// Numeric conversion keeping the operand's shape.
    As {
        expr: Handle<Expression>,
        kind: ScalarKind,
        width: u8,
    },
    /// Texture sample or gather through a sampler state.
    ImageSample {
        image: Handle<Expression>,
        sampler: Handle<Expression>,
        coordinate: Handle<Expression>,
        array_index: Option<Handle<Expression>>,
        offset: Option<Handle<Expression>>,
        level: SampleLevel,
        depth_ref: Option<Handle<Expression>>,
        /// Gathers the given component instead of filtering.
        gather: Option<SwizzleComponent>,
    },
    /// Unfiltered texel fetch.
    ImageLoad {
        image: Handle<Expression>,
        coordinate: Handle<Expression>,
        array_index: Option<Handle<Expression>>,
        level: Option<Handle<Expression>>,
    },
    ImageQuery {
        image: Handle<Expression>,
        query: ImageQuery,
    },
}

impl Expression {
    /// Direct operands, in evaluation order.
    pub fn operands(&self) -> Vec<Handle<Expression>> {
        let mut out = Vec::new();
        self.for_each_operand(|h| out.push(h));
        out
    }

    /// Calls `f` on every direct operand.
    pub fn for_each_operand(&self, mut f: impl FnMut(Handle<Expression>)) {
        match *self {
            Self::Literal(_) | Self::ZeroValue(_) | Self::Variable(_) => {}
            Self::Compose { ref components, .. } => components.iter().copied().for_each(f),
            Self::Access { base, index } => {
                f(base);
                f(index);
            }
            Self::AccessIndex { base, .. } => f(base),
            Self::Swizzle { vector, .. } => f(vector),
            Self::Unary { expr, .. } | Self::As { expr, .. } => f(expr),
            Self::Binary { left, right, .. } => {
                f(left);
                f(right);
            }
            Self::Select {
                condition,
                accept,
                reject,
            } => {
                f(condition);
                f(accept);
                f(reject);
            }
            Self::Math {
                arg,
                arg1,
                arg2,
                arg3,
                ..
            } => {
                f(arg);
                [arg1, arg2, arg3].into_iter().flatten().for_each(f);
            }
            Self::ImageSample {
                image,
                sampler,
                coordinate,
                array_index,
                offset,
                level,
                depth_ref,
                ..
            } => {
                f(image);
                f(sampler);
                f(coordinate);
                [array_index, offset].into_iter().flatten().for_each(&mut f);
                match level {
                    SampleLevel::Auto | SampleLevel::Zero => {}
                    SampleLevel::Exact(h) | SampleLevel::Bias(h) => f(h),
                    SampleLevel::Gradient { x, y } => {
                        f(x);
                        f(y);
                    }
                }
                if let Some(d) = depth_ref {
                    f(d);
                }
            }
            Self::ImageLoad {
                image,
                coordinate,
                array_index,
                level,
            } => {
                f(image);
                f(coordinate);
                [array_index, level].into_iter().flatten().for_each(f);
            }
            Self::ImageQuery { image, query } => {
                f(image);
                if let ImageQuery::Size { level: Some(l) } = query {
                    f(l);
                }
            }
        }
    }

    /// Mutable references to every direct operand, in the same order as
    /// [`Expression::operands`].
    pub fn operands_mut(&mut self) -> Vec<&mut Handle<Expression>> {
        match self {
            Self::Literal(_) | Self::ZeroValue(_) | Self::Variable(_) => Vec::new(),
            Self::Compose { components, .. } => components.iter_mut().collect(),
            Self::Access { base, index } => vec![base, index],
            Self::AccessIndex { base, .. } => vec![base],
            Self::Swizzle { vector, .. } => vec![vector],
            Self::Unary { expr, .. } | Self::As { expr, .. } => vec![expr],
            Self::Binary { left, right, .. } => vec![left, right],
            Self::Select {
                condition,
                accept,
                reject,
            } => vec![condition, accept, reject],
            Self::Math {
                arg,
                arg1,
                arg2,
                arg3,
                ..
            } => {
                let mut v = vec![arg];
                v.extend(arg1.as_mut());
                v.extend(arg2.as_mut());
                v.extend(arg3.as_mut());
                v
            }
            Self::ImageSample {
                image,
                sampler,
                coordinate,
                array_index,
                offset,
                level,
                depth_ref,
                ..
            } => {
                let mut v = vec![image, sampler, coordinate];
                v.extend(array_index.as_mut());
                v.extend(offset.as_mut());
                match level {
                    SampleLevel::Auto | SampleLevel::Zero => {}
                    SampleLevel::Exact(h) | SampleLevel::Bias(h) => v.push(h),
                    SampleLevel::Gradient { x, y } => {
                        v.push(x);
                        v.push(y);
                    }
                }
                v.extend(depth_ref.as_mut());
                v
            }
            Self::ImageLoad {
                image,
                coordinate,
                array_index,
                level,
            } => {
                let mut v = vec![image, coordinate];
                v.extend(array_index.as_mut());
                v.extend(level.as_mut());
                v
            }
            Self::ImageQuery { image, query } => {
                let mut v = vec![image];
                if let ImageQuery::Size { level: Some(l) } = query {
                    v.push(l);
                }
                v
            }
        }
    }

    /// `true` for nodes that can appear as the target of an assignment.
    pub fn is_lvalue_shape(&self) -> bool {
        matches!(
            self,
            Self::Variable(_) | Self::Access { .. } | Self::AccessIndex { .. } | Self::Swizzle { .. }
        )
    }

    /// `true` for texture operations, whose result depends on bound state
    /// rather than only on operands.
    pub fn is_image_op(&self) -> bool {
        matches!(
            self,
            Self::ImageSample { .. } | Self::ImageLoad { .. } | Self::ImageQuery { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::Arena;

    #[test]
    fn float_literals_compare_by_bits() {
        assert_eq!(Literal::F32(1.0), Literal::F32(1.0));
        assert_ne!(Literal::F32(0.0), Literal::F32(-0.0));
        assert_ne!(Literal::F32(1.0), Literal::F16(1.0));
        assert_eq!(Literal::F32(f32::NAN), Literal::F32(f32::NAN));
    }

    #[test]
    fn operands_and_operands_mut_agree() {
        let mut arena: Arena<Expression> = Arena::new();
        let a = arena.append(Expression::Literal(Literal::F32(1.0)));
        let b = arena.append(Expression::Literal(Literal::F32(2.0)));
        let c = arena.append(Expression::Literal(Literal::F32(3.0)));
        let mut expr = Expression::Math {
            fun: MathFunction::Clamp,
            arg: a,
            arg1: Some(b),
            arg2: Some(c),
            arg3: None,
        };
        let read = expr.operands();
        let write: Vec<_> = expr.operands_mut().into_iter().map(|h| *h).collect();
        assert_eq!(read, vec![a, b, c]);
        assert_eq!(read, write);
    }

    #[test]
    fn operands_mut_rewrites_slot() {
        let mut arena: Arena<Expression> = Arena::new();
        let a = arena.append(Expression::Literal(Literal::I32(1)));
        let b = arena.append(Expression::Literal(Literal::I32(2)));
        let mut expr = Expression::Binary {
            op: BinaryOp::Add,
            left: a,
            right: a,
        };
        *expr.operands_mut()[1] = b;
        assert_eq!(expr.operands(), vec![a, b]);
    }

    #[test]
    fn math_arity() {
        assert_eq!(MathFunction::Rcp.argument_count(), 1);
        assert_eq!(MathFunction::Dot.argument_count(), 2);
        assert_eq!(MathFunction::Lerp.argument_count(), 3);
        assert_eq!(MathFunction::Bfi.argument_count(), 4);
    }
}
