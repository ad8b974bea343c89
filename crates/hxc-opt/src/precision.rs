//! Precision-change isolation.
//!
//! Every place where half and float values meet implicitly (binary operands,
//! select arms, math arguments, constructor components, assignments, returns
//! and `in` arguments) gets an explicit `As` conversion.

use hxc_ir::visit::{rewrite_module, ExpressionRewriter, RewriteContext, Role};
use hxc_ir::{
    Expression, Handle, IrError, Module, Scalar, ScalarKind, Statement, StorageMode,
    TypeResolver,
};

use crate::Pass;

#[derive(Debug)]
pub struct PrecisionIsolation;

impl Pass for PrecisionIsolation {
    fn name(&self) -> &str {
        "precision-isolation"
    }

    fn run(&self, module: &mut Module) -> Result<bool, IrError> {
        let mut changed = false;
        // Replacements are not revisited, so nested mixes need another walk.
        while rewrite_module(module, &mut MixIsolator) {
            changed = true;
        }

        let mut body = std::mem::take(&mut module.global_body);
        let result = isolate_block(module, &mut body, None);
        module.global_body = body;
        changed |= result?;

        let functions: Vec<_> = module.functions.handles().collect();
        for function in functions {
            let wanted = match module.functions[function].result {
                Some(ref r) => module.resolver().type_inner(r.ty)?.scalar(),
                None => None,
            };
            let mut body = std::mem::take(&mut module.functions[function].body);
            let result = isolate_block(module, &mut body, wanted);
            module.functions[function].body = body;
            changed |= result?;
        }
        Ok(changed)
    }
}

fn float_scalar(resolver: &TypeResolver<'_>, handle: Handle<Expression>) -> Option<Scalar> {
    resolver
        .resolve(handle)
        .ok()
        .and_then(|t| t.scalar())
        .filter(|s| s.kind == ScalarKind::Float)
}

fn widest(scalars: impl Iterator<Item = Scalar>) -> Option<Scalar> {
    scalars.max_by_key(|s| s.width)
}

struct MixIsolator;

impl MixIsolator {
    /// Positions of the operands of `expr` that must agree on float width.
    fn balanced_operands(expr: &Expression) -> Vec<usize> {
        use hxc_ir::BinaryOp as B;
        match *expr {
            Expression::Binary { op, .. } if !matches!(op, B::ShiftLeft | B::ShiftRight) => {
                vec![0, 1]
            }
            Expression::Select { .. } => vec![1, 2],
            Expression::Math { .. } => (0..expr.operands().len()).collect(),
            _ => Vec::new(),
        }
    }
}

impl ExpressionRewriter for MixIsolator {
    fn rewrite(
        &mut self,
        ctx: &mut RewriteContext<'_>,
        handle: Handle<Expression>,
        role: Role,
    ) -> Option<Handle<Expression>> {
        if role.is_write() {
            return None;
        }
        let expr = ctx.expressions[handle].clone();
        let operands = expr.operands();
        let resolver = ctx.resolver();

        // (operand position, target width)
        let plan: Vec<(usize, u8)> = if let Expression::Compose { ty, .. } = expr {
            let want = resolver.type_inner(ty).ok()?.scalar()?;
            operands
                .iter()
                .enumerate()
                .filter_map(|(i, &c)| {
                    let have = float_scalar(&resolver, c)?;
                    (want.is_float() && have.width != want.width).then_some((i, want.width))
                })
                .collect()
        } else {
            let positions = Self::balanced_operands(&expr);
            let floats: Vec<(usize, Scalar)> = positions
                .iter()
                .filter_map(|&i| Some((i, float_scalar(&resolver, *operands.get(i)?)?)))
                .collect();
            let want = widest(floats.iter().map(|&(_, s)| s))?;
            floats
                .iter()
                .filter(|(_, s)| s.width != want.width)
                .map(|&(i, _)| (i, want.width))
                .collect()
        };
        if plan.is_empty() {
            return None;
        }

        let mut isolated = expr;
        let mut slots = isolated.operands_mut();
        for (position, width) in plan {
            let slot = &mut slots[position];
            **slot = ctx.expressions.append(Expression::As {
                expr: **slot,
                kind: ScalarKind::Float,
                width,
            });
        }
        drop(slots);
        Some(ctx.expressions.append(isolated))
    }
}

/// Converts the value in `slot` to the float width of `want`.
fn convert_slot(
    module: &mut Module,
    slot: &mut Handle<Expression>,
    want: Option<Scalar>,
) -> bool {
    let Some(want) = want.filter(|s| s.is_float()) else {
        return false;
    };
    let Some(have) = float_scalar(&module.resolver(), *slot) else {
        return false;
    };
    if have.width == want.width {
        return false;
    }
    *slot = module.add_expression(Expression::As {
        expr: *slot,
        kind: ScalarKind::Float,
        width: want.width,
    });
    true
}

fn isolate_block(
    module: &mut Module,
    block: &mut [Statement],
    result: Option<Scalar>,
) -> Result<bool, IrError> {
    let mut changed = false;
    for statement in block.iter_mut() {
        match statement {
            Statement::Assign { target, value } => {
                let want = module.resolver().resolve(*target)?.scalar();
                changed |= convert_slot(module, value, want);
            }
            Statement::Return { value: Some(value) } => {
                changed |= convert_slot(module, value, result);
            }
            Statement::Call {
                function,
                arguments,
                ..
            } => {
                let parameters = module
                    .functions
                    .try_get(*function)
                    .map(|f| f.parameters.clone())
                    .unwrap_or_default();
                for (argument, parameter) in arguments.iter_mut().zip(parameters) {
                    let parameter = &module.variables[parameter];
                    if matches!(parameter.mode, StorageMode::Output | StorageMode::InOut) {
                        continue;
                    }
                    let want = module.resolver().type_inner(parameter.ty)?.scalar();
                    changed |= convert_slot(module, argument, want);
                }
            }
            _ => {}
        }
        for nested in statement.blocks_mut() {
            changed |= isolate_block(module, nested, result)?;
        }
    }
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::*;
    use hxc_ir::*;

    #[test]
    fn widens_half_operand() {
        let (mut module, main) = with_entry();
        let f16_ty = scalar(&mut module, Scalar::F16);
        let f32_ty = scalar(&mut module, Scalar::F32);
        let h = module.add_global(Variable::new("h", f16_ty, StorageMode::Uniform));
        let f = module.add_global(Variable::new("f", f32_ty, StorageMode::Uniform));
        let (h, f) = (load(&mut module, h), load(&mut module, f));
        let sum = binary(&mut module, BinaryOp::Add, h, f);
        module.functions[main].body = vec![Statement::Expression(sum)];

        assert_eq!(PrecisionIsolation.run(&mut module), Ok(true));
        let Statement::Expression(rewritten) = module.functions[main].body[0] else {
            unreachable!()
        };
        assert_eq!(format_expr(&module, rewritten), "(Float32(h[0]) + f[1])");
        assert_eq!(PrecisionIsolation.run(&mut module), Ok(false));
    }

    #[test]
    fn nested_mixes_are_all_isolated() {
        let (mut module, main) = with_entry();
        let f16_ty = scalar(&mut module, Scalar::F16);
        let f32_ty = scalar(&mut module, Scalar::F32);
        let h = module.add_global(Variable::new("h", f16_ty, StorageMode::Uniform));
        let f = module.add_global(Variable::new("f", f32_ty, StorageMode::Uniform));
        let (h, f) = (load(&mut module, h), load(&mut module, f));
        let inner = binary(&mut module, BinaryOp::Multiply, h, f);
        let outer = binary(&mut module, BinaryOp::Add, inner, h);
        module.functions[main].body = vec![Statement::Expression(outer)];

        PrecisionIsolation.run(&mut module).unwrap();
        let Statement::Expression(rewritten) = module.functions[main].body[0] else {
            unreachable!()
        };
        assert_eq!(
            format_expr(&module, rewritten),
            "((Float32(h[0]) * f[1]) + Float32(h[0]))"
        );
    }

    #[test]
    fn assignment_to_half_narrows() {
        let (mut module, main) = with_entry();
        let f16_ty = scalar(&mut module, Scalar::F16);
        let f32_ty = scalar(&mut module, Scalar::F32);
        let h = module.add_variable(Variable::new("h", f16_ty, StorageMode::Auto));
        let f = module.add_global(Variable::new("f", f32_ty, StorageMode::Uniform));
        let (target, value) = (load(&mut module, h), load(&mut module, f));
        module.functions[main].body = vec![
            Statement::Declare(h),
            Statement::Loop {
                body: vec![Statement::Assign { target, value }, Statement::Break],
                continuing: Vec::new(),
            },
        ];
        assert_eq!(PrecisionIsolation.run(&mut module), Ok(true));
        let dump = dump_module(&module);
        assert!(dump.contains("h[0] = Float16(f[1])"), "{dump}");
    }

    #[test]
    fn integer_mixes_are_left_alone() {
        let (mut module, main) = with_entry();
        let i32_ty = scalar(&mut module, Scalar::I32);
        let f32_ty = scalar(&mut module, Scalar::F32);
        let i = module.add_global(Variable::new("i", i32_ty, StorageMode::Uniform));
        let f = module.add_global(Variable::new("f", f32_ty, StorageMode::Uniform));
        let (i, f) = (load(&mut module, i), load(&mut module, f));
        let shifted = binary(&mut module, BinaryOp::ShiftLeft, i, i);
        let scaled = binary(&mut module, BinaryOp::Multiply, f, f);
        module.functions[main].body = vec![
            Statement::Expression(shifted),
            Statement::Expression(scaled),
        ];
        assert_eq!(PrecisionIsolation.run(&mut module), Ok(false));
    }
}
