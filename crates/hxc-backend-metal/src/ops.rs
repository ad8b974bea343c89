//! Operator dispatch: how each IR operator is spelled in Metal, keyed by
//! operator and operand type.

use hxc_ir::{BinaryOp, MathFunction, Scalar, ScalarKind, TypeInner, UnaryOp};

/// Spelling of a binary operator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinaryForm {
    /// `a op b`.
    Infix(&'static str),
    /// `name(a, b)`.
    Call(&'static str),
    /// `reduce(a op b)`, e.g. `all(a == b)`.
    Reduce(&'static str, &'static str),
    /// Logical operators on bool vectors go through integer arithmetic:
    /// `bool<n>(uint<n>(a) op uint<n>(b))`.
    VectorLogic(&'static str),
}

/// Form of `op` for operands shaped like `left`.
pub fn binary(op: BinaryOp, left: &TypeInner) -> BinaryForm {
    let vector = matches!(left, TypeInner::Vector { .. });
    let float = left.scalar().is_some_and(Scalar::is_float);
    match op {
        BinaryOp::Add => BinaryForm::Infix("+"),
        BinaryOp::Subtract => BinaryForm::Infix("-"),
        BinaryOp::Multiply => BinaryForm::Infix("*"),
        BinaryOp::Divide => BinaryForm::Infix("/"),
        BinaryOp::Modulo if float => BinaryForm::Call("fmod"),
        BinaryOp::Modulo => BinaryForm::Infix("%"),
        BinaryOp::Equal => BinaryForm::Infix("=="),
        BinaryOp::NotEqual => BinaryForm::Infix("!="),
        BinaryOp::Less => BinaryForm::Infix("<"),
        BinaryOp::LessEqual => BinaryForm::Infix("<="),
        BinaryOp::Greater => BinaryForm::Infix(">"),
        BinaryOp::GreaterEqual => BinaryForm::Infix(">="),
        BinaryOp::AllEqual if vector => BinaryForm::Reduce("all", "=="),
        BinaryOp::AllEqual => BinaryForm::Infix("=="),
        BinaryOp::AnyNotEqual if vector => BinaryForm::Reduce("any", "!="),
        BinaryOp::AnyNotEqual => BinaryForm::Infix("!="),
        BinaryOp::LogicalAnd if vector => BinaryForm::VectorLogic("*"),
        BinaryOp::LogicalAnd => BinaryForm::Infix("&&"),
        BinaryOp::LogicalOr if vector => BinaryForm::VectorLogic("+"),
        BinaryOp::LogicalOr => BinaryForm::Infix("||"),
        BinaryOp::LogicalXor => BinaryForm::Infix("!="),
        BinaryOp::BitwiseAnd => BinaryForm::Infix("&"),
        BinaryOp::BitwiseOr => BinaryForm::Infix("|"),
        BinaryOp::BitwiseXor => BinaryForm::Infix("^"),
        BinaryOp::ShiftLeft => BinaryForm::Infix("<<"),
        BinaryOp::ShiftRight => BinaryForm::Infix(">>"),
    }
}

pub fn unary(op: UnaryOp) -> &'static str {
    match op {
        UnaryOp::Negate => "-",
        UnaryOp::LogicalNot => "!",
        UnaryOp::BitwiseNot => "~",
    }
}

/// Spelling of a math function.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MathForm {
    /// `name(args...)`.
    Call(&'static str),
    /// `(T(1.0) / (x))`.
    Reciprocal,
    /// `as_type<T>(x)`, keeping the operand's shape.
    Bitcast(ScalarKind),
    /// `(31 - clz(x))`; all ones for zero, like the source intrinsic.
    FindMsb,
    /// `any`/`all` over the components' truth values.
    Truth(&'static str),
    /// `insert_bits(base, insert, offset, width)` from the source operand
    /// order `(width, offset, insert, base)`.
    InsertBits,
}

/// Form of `fun` whose first argument has component type `scalar`.
pub fn math(fun: MathFunction, scalar: Scalar) -> MathForm {
    use MathFunction as Mf;

    let float = scalar.is_float();
    MathForm::Call(match fun {
        Mf::Abs if float => "fabs",
        Mf::Abs => "abs",
        Mf::Min if float => "fmin",
        Mf::Min => "min",
        Mf::Max if float => "fmax",
        Mf::Max => "max",
        Mf::Rcp => return MathForm::Reciprocal,
        Mf::AsInt => return MathForm::Bitcast(ScalarKind::Sint),
        Mf::AsUint => return MathForm::Bitcast(ScalarKind::Uint),
        Mf::AsFloat => return MathForm::Bitcast(ScalarKind::Float),
        Mf::FirstBitHigh => return MathForm::FindMsb,
        Mf::Any => return MathForm::Truth("any"),
        Mf::All => return MathForm::Truth("all"),
        Mf::Bfi => return MathForm::InsertBits,
        Mf::Sign => "sign",
        Mf::Saturate => "saturate",
        Mf::Sqrt => "sqrt",
        Mf::Rsqrt => "rsqrt",
        Mf::Exp => "exp",
        Mf::Exp2 => "exp2",
        Mf::Log => "log",
        Mf::Log2 => "log2",
        Mf::Sin => "sin",
        Mf::Cos => "cos",
        Mf::Tan => "tan",
        Mf::Asin => "asin",
        Mf::Acos => "acos",
        Mf::Atan => "atan",
        Mf::Sinh => "sinh",
        Mf::Cosh => "cosh",
        Mf::Tanh => "tanh",
        Mf::Floor => "floor",
        Mf::Ceil => "ceil",
        // Round half to even.
        Mf::Round => "rint",
        Mf::Trunc => "trunc",
        Mf::Fract => "fract",
        Mf::Ddx => "dfdx",
        Mf::Ddy => "dfdy",
        Mf::IsNan => "isnan",
        Mf::IsInf => "isinf",
        Mf::CountBits => "popcount",
        Mf::ReverseBits => "reverse_bits",
        Mf::FirstBitLow => "ctz",
        Mf::Length => "length",
        Mf::Normalize => "normalize",
        Mf::Transpose => "transpose",
        Mf::Determinant => "determinant",
        Mf::Pow => "pow",
        Mf::Step => "step",
        Mf::Atan2 => "atan2",
        Mf::Fmod => "fmod",
        Mf::Dot => "dot",
        Mf::Cross => "cross",
        Mf::Distance => "distance",
        Mf::Reflect => "reflect",
        Mf::Clamp => "clamp",
        Mf::Lerp => "mix",
        Mf::SmoothStep => "smoothstep",
        Mf::Fma => "fma",
        Mf::Refract => "refract",
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use hxc_ir::VectorSize;

    const FLOAT: TypeInner = TypeInner::Scalar(Scalar::F32);
    const INT: TypeInner = TypeInner::Scalar(Scalar::I32);
    const BOOL3: TypeInner = TypeInner::Vector {
        size: VectorSize::Tri,
        scalar: Scalar::BOOL,
    };

    #[test]
    fn modulo_depends_on_operand_kind() {
        assert_eq!(binary(BinaryOp::Modulo, &FLOAT), BinaryForm::Call("fmod"));
        assert_eq!(binary(BinaryOp::Modulo, &INT), BinaryForm::Infix("%"));
    }

    #[test]
    fn reductions_collapse_on_scalars() {
        assert_eq!(binary(BinaryOp::AllEqual, &INT), BinaryForm::Infix("=="));
        assert_eq!(binary(BinaryOp::AnyNotEqual, &BOOL3), BinaryForm::Reduce("any", "!="));
    }

    #[test]
    fn vector_logic_uses_integer_arithmetic() {
        assert_eq!(binary(BinaryOp::LogicalAnd, &BOOL3), BinaryForm::VectorLogic("*"));
        assert_eq!(binary(BinaryOp::LogicalOr, &BOOL3), BinaryForm::VectorLogic("+"));
        assert_eq!(binary(BinaryOp::LogicalOr, &TypeInner::Scalar(Scalar::BOOL)), BinaryForm::Infix("||"));
    }

    #[test]
    fn float_variants_of_math_functions() {
        assert_eq!(math(MathFunction::Abs, Scalar::F16), MathForm::Call("fabs"));
        assert_eq!(math(MathFunction::Abs, Scalar::I32), MathForm::Call("abs"));
        assert_eq!(math(MathFunction::Max, Scalar::F32), MathForm::Call("fmax"));
        assert_eq!(math(MathFunction::Min, Scalar::U32), MathForm::Call("min"));
        assert_eq!(math(MathFunction::Rcp, Scalar::F32), MathForm::Reciprocal);
        assert_eq!(math(MathFunction::Lerp, Scalar::F32), MathForm::Call("mix"));
        assert_eq!(
            math(MathFunction::AsFloat, Scalar::U32),
            MathForm::Bitcast(ScalarKind::Float)
        );
    }
}
