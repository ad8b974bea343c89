//! IR validation.
//!
//! Checks the structural invariants every later stage relies on. A
//! violation is an internal compiler error, not a user diagnostic.

use hxc_ir::{Block, Expression, IrError, Module, Statement, TypeInner};

use crate::Pass;

/// Validates IR structural invariants. Never modifies the module.
#[derive(Debug)]
pub struct IrValidation;

impl Pass for IrValidation {
    fn name(&self) -> &str {
        "ir-validation"
    }

    fn run(&self, module: &mut Module) -> Result<bool, IrError> {
        validate(module)?;
        Ok(false)
    }
}

/// Checks handle bounds, type derivability, assignment targets and the
/// placement of `break`/`continue`.
pub fn validate(module: &Module) -> Result<(), IrError> {
    for (_, ty) in module.types.iter() {
        match ty.inner {
            TypeInner::Array { base, .. }
            | TypeInner::Buffer { base, .. }
            | TypeInner::Patch { base, .. } => module.types.check_contains(base, "type")?,
            TypeInner::Struct { ref members, .. } => {
                for member in members {
                    module.types.check_contains(member.ty, "type")?;
                }
            }
            _ => {}
        }
    }
    for (_, var) in module.variables.iter() {
        module.types.check_contains(var.ty, "type")?;
        if let Some(init) = var.init {
            module.expressions.check_contains(init, "expression")?;
        }
    }
    for (handle, expr) in module.expressions.iter() {
        for operand in expr.operands() {
            module.expressions.check_contains(operand, "expression")?;
            if operand >= handle {
                return Err(IrError::InvalidShape(format!(
                    "expression {handle:?} refers forward to {operand:?}"
                )));
            }
        }
        match *expr {
            Expression::Variable(var) => module.variables.check_contains(var, "variable")?,
            Expression::Compose { ty, .. } | Expression::ZeroValue(ty) => {
                module.types.check_contains(ty, "type")?
            }
            _ => {}
        }
    }
    for &global in &module.globals {
        module.variables.check_contains(global, "variable")?;
    }
    for block in &module.uniform_blocks {
        for &member in &block.members {
            module.variables.check_contains(member, "variable")?;
        }
    }

    let entries = module.entry_points();
    if entries.len() > 1 {
        return Err(IrError::EntryPointCount(entries.len()));
    }

    validate_block(module, &module.global_body, 0)?;
    for (_, function) in module.functions.iter() {
        for &param in &function.parameters {
            module.variables.check_contains(param, "variable")?;
        }
        if let Some(ref result) = function.result {
            module.types.check_contains(result.ty, "type")?;
        }
        if let Some(size) = function.workgroup_size {
            if size.contains(&0) {
                return Err(IrError::InvalidShape(format!(
                    "function '{}' has a zero workgroup dimension {size:?}",
                    function.name
                )));
            }
        }
        validate_block(module, &function.body, 0)?;
    }
    Ok(())
}

fn validate_block(module: &Module, block: &Block, loop_depth: usize) -> Result<(), IrError> {
    let resolver = module.resolver();
    for statement in block {
        for expr in statement.expressions() {
            module.expressions.check_contains(expr, "expression")?;
            resolver.resolve(expr)?;
        }
        match *statement {
            Statement::Declare(var) => module.variables.check_contains(var, "variable")?,
            Statement::Assign { target, .. } => {
                if !module.expressions[target].is_lvalue_shape() {
                    return Err(IrError::InvalidShape(format!(
                        "assignment target {target:?} is not an lvalue"
                    )));
                }
            }
            Statement::Call {
                function,
                ref arguments,
                ..
            } => {
                module.functions.check_contains(function, "function")?;
                let callee = &module.functions[function];
                if callee.is_defined() && callee.parameters.len() != arguments.len() {
                    return Err(IrError::InvalidShape(format!(
                        "call to '{}' passes {} argument(s), expected {}",
                        callee.name,
                        arguments.len(),
                        callee.parameters.len()
                    )));
                }
            }
            Statement::Break | Statement::Continue if loop_depth == 0 => {
                return Err(IrError::InvalidShape(
                    "break or continue outside of a loop".into(),
                ));
            }
            _ => {}
        }
        let depth = match statement {
            Statement::Loop { .. } => loop_depth + 1,
            _ => loop_depth,
        };
        for nested in statement.blocks() {
            validate_block(module, nested, depth)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::*;
    use hxc_ir::*;

    #[test]
    fn accepts_well_formed_module() {
        let (mut module, main) = with_entry();
        let f32_ty = scalar(&mut module, Scalar::F32);
        let v = module.add_variable(Variable::new("v", f32_ty, StorageMode::Auto));
        let one = module.add_expression(Expression::Literal(Literal::F32(1.0)));
        let target = load(&mut module, v);
        module.functions[main].body = vec![
            Statement::Declare(v),
            Statement::Loop {
                body: vec![Statement::Assign { target, value: one }, Statement::Break],
                continuing: Vec::new(),
            },
        ];
        assert_eq!(validate(&module), Ok(()));
    }

    #[test]
    fn rejects_break_outside_loop() {
        let (mut module, main) = with_entry();
        module.functions[main].body = vec![Statement::Break];
        assert!(matches!(validate(&module), Err(IrError::InvalidShape(_))));
    }

    #[test]
    fn rejects_non_lvalue_target() {
        let (mut module, main) = with_entry();
        let one = module.add_expression(Expression::Literal(Literal::F32(1.0)));
        module.functions[main].body = vec![Statement::Assign {
            target: one,
            value: one,
        }];
        assert!(matches!(validate(&module), Err(IrError::InvalidShape(_))));
    }

    #[test]
    fn rejects_ill_typed_expression() {
        let (mut module, main) = with_entry();
        let sampler_ty = module.add_type(TypeInner::Sampler { comparison: false });
        let s = module.add_global(Variable::new("s", sampler_ty, StorageMode::Uniform));
        let s = load(&mut module, s);
        let compared = binary(&mut module, BinaryOp::Less, s, s);
        module.functions[main].body = vec![Statement::Expression(compared)];
        assert!(validate(&module).is_err());
    }

    #[test]
    fn rejects_two_entry_points() {
        let (mut module, _) = with_entry();
        let mut other = Function::new("Other");
        other.flags.insert(FunctionFlags::ENTRY_POINT);
        module.add_function(other);
        assert_eq!(validate(&module), Err(IrError::EntryPointCount(2)));
    }
}
