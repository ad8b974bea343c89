//! Redundant conversion collapsing.

use hxc_ir::visit::{rewrite_module, ExpressionRewriter, RewriteContext, Role};
use hxc_ir::{Expression, Handle, IrError, Module, Scalar, ScalarKind};

use crate::Pass;

/// Removes identity conversions and lossless `A -> B -> A` round trips.
#[derive(Debug)]
pub struct RedundantCasts;

impl Pass for RedundantCasts {
    fn name(&self) -> &str {
        "redundant-casts"
    }

    fn run(&self, module: &mut Module) -> Result<bool, IrError> {
        Ok(rewrite_module(module, &mut CastCollapser))
    }
}

struct CastCollapser;

impl ExpressionRewriter for CastCollapser {
    fn rewrite(
        &mut self,
        ctx: &mut RewriteContext<'_>,
        handle: Handle<Expression>,
        _role: Role,
    ) -> Option<Handle<Expression>> {
        let Expression::As { expr, kind, width } = ctx.expressions[handle] else {
            return None;
        };
        let target = Scalar { kind, width };
        let resolver = ctx.resolver();
        let middle = resolver.resolve_scalar(expr).ok()?;
        if middle == target {
            return Some(expr);
        }
        let Expression::As { expr: source, .. } = ctx.expressions[expr] else {
            return None;
        };
        let origin = resolver.resolve_scalar(source).ok()?;
        (origin == target && is_round_trip(origin, middle)).then_some(source)
    }
}

/// Conversions from `a` to `b` and back that the optimizer may drop.
fn is_round_trip(a: Scalar, b: Scalar) -> bool {
    match (a.kind, b.kind) {
        (ScalarKind::Float, ScalarKind::Float) => true,
        (ScalarKind::Sint | ScalarKind::Uint, ScalarKind::Sint | ScalarKind::Uint) => {
            a.width == b.width
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::*;
    use hxc_ir::*;

    fn cast(module: &mut Module, expr: Handle<Expression>, to: Scalar) -> Handle<Expression> {
        module.add_expression(Expression::As {
            expr,
            kind: to.kind,
            width: to.width,
        })
    }

    fn returning(module: &mut Module, main: Handle<Function>, value: Handle<Expression>) {
        module.functions[main].body = vec![Statement::Return { value: Some(value) }];
    }

    fn returned(module: &Module, main: Handle<Function>) -> Handle<Expression> {
        match module.functions[main].body[0] {
            Statement::Return { value: Some(v) } => v,
            ref other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn collapses_half_round_trip() {
        let (mut module, main) = with_entry();
        let f32_ty = scalar(&mut module, Scalar::F32);
        let x = module.add_global(Variable::new("x", f32_ty, StorageMode::Uniform));
        let x = load(&mut module, x);
        let narrowed = cast(&mut module, x, Scalar::F16);
        let widened = cast(&mut module, narrowed, Scalar::F32);
        returning(&mut module, main, widened);

        assert_eq!(RedundantCasts.run(&mut module), Ok(true));
        assert_eq!(returned(&module, main), x);
        assert_eq!(RedundantCasts.run(&mut module), Ok(false));
    }

    #[test]
    fn removes_identity_cast() {
        let (mut module, main) = with_entry();
        let i32_ty = scalar(&mut module, Scalar::I32);
        let n = module.add_global(Variable::new("n", i32_ty, StorageMode::Uniform));
        let n = load(&mut module, n);
        let same = cast(&mut module, n, Scalar::I32);
        returning(&mut module, main, same);
        assert_eq!(RedundantCasts.run(&mut module), Ok(true));
        assert_eq!(returned(&module, main), n);
    }

    #[test]
    fn keeps_float_int_round_trip() {
        let (mut module, main) = with_entry();
        let f32_ty = scalar(&mut module, Scalar::F32);
        let x = module.add_global(Variable::new("x", f32_ty, StorageMode::Uniform));
        let x = load(&mut module, x);
        let truncated = cast(&mut module, x, Scalar::I32);
        let back = cast(&mut module, truncated, Scalar::F32);
        returning(&mut module, main, back);
        assert_eq!(RedundantCasts.run(&mut module), Ok(false));
        assert_eq!(returned(&module, main), back);
    }

    #[test]
    fn collapses_sign_round_trip() {
        assert!(is_round_trip(Scalar::I32, Scalar::U32));
        assert!(!is_round_trip(Scalar::BOOL, Scalar::U32));
    }
}
