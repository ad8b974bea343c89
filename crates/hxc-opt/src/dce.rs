//! Dead code elimination.
//!
//! Removes, in order:
//! - bodies of user functions that the entry point can never call;
//! - statements after `return`/`break`/`continue` and expression statements
//!   (expressions have no side effects);
//! - declarations of, and stores to, variables that are never read.
//!
//! Program-scope variables are only touched when every reachable call
//! targets a defined or intrinsic function. An unresolved callee might read
//! any global, so in that case globals are left alone.

use std::collections::HashSet;

use hxc_ir::visit::{splice_block, walk_block, walk_initializers, Role, Splice, Visitor};
use hxc_ir::{
    Block, Function, FunctionFlags, Handle, IrError, Module, Statement, StorageMode, Variable,
};

use crate::Pass;

#[derive(Debug)]
pub struct DeadCodeElimination;

impl Pass for DeadCodeElimination {
    fn name(&self) -> &str {
        "dce"
    }

    fn run(&self, module: &mut Module) -> Result<bool, IrError> {
        let reachable = reachable_functions(module);
        let mut changed = false;

        for (handle, function) in module.functions.iter_mut() {
            if reachable.contains(&handle) {
                continue;
            }
            if function.is_user_defined() {
                log::debug!("dce: dropping unreachable function '{}'", function.name);
                function.body.clear();
                function.flags.remove(FunctionFlags::DEFINED);
                changed = true;
            }
        }

        changed |= prune_block(&mut module.global_body);
        for &f in &reachable {
            changed |= prune_block(&mut module.functions[f].body);
        }

        let dead = dead_variables(module, &reachable);
        if dead.is_empty() {
            return Ok(changed);
        }
        log::debug!("dce: removing {} dead variable(s)", dead.len());

        let mut body = std::mem::take(&mut module.global_body);
        splice_block(&mut body, &mut |s| remove_dead(module, &dead, s));
        module.global_body = body;
        for &f in &reachable {
            let mut body = std::mem::take(&mut module.functions[f].body);
            splice_block(&mut body, &mut |s| remove_dead(module, &dead, s));
            module.functions[f].body = body;
        }
        module.globals.retain(|g| !dead.contains(g));
        Ok(true)
    }
}

/// Functions callable from the entry point, or every function when there is
/// no single entry point yet.
fn reachable_functions(module: &Module) -> Vec<Handle<Function>> {
    match module.entry_point() {
        Ok(entry) => module.reachable_from(entry),
        Err(_) => module.functions.handles().collect(),
    }
}

fn prune_block(block: &mut Block) -> bool {
    let mut changed = false;
    let exit = block.iter().position(|s| {
        matches!(
            s,
            Statement::Return { .. } | Statement::Break | Statement::Continue
        )
    });
    if let Some(exit) = exit {
        if exit + 1 < block.len() {
            block.truncate(exit + 1);
            changed = true;
        }
    }
    let before = block.len();
    block.retain(|s| !matches!(s, Statement::Expression(_)));
    changed |= block.len() != before;
    for statement in block.iter_mut() {
        for nested in statement.blocks_mut() {
            changed |= prune_block(nested);
        }
    }
    changed
}

#[derive(Default)]
struct Usage {
    read: HashSet<Handle<Variable>>,
    declared: Vec<Handle<Variable>>,
    unresolved_call: bool,
}

impl Visitor for Usage {
    fn visit_statement(&mut self, module: &Module, statement: &Statement) -> bool {
        match *statement {
            Statement::Declare(var) => self.declared.push(var),
            Statement::Call {
                function,
                ref arguments,
                ..
            } => {
                let resolved = module
                    .functions
                    .try_get(function)
                    .is_some_and(|f| f.is_defined() || f.is_intrinsic());
                self.unresolved_call |= !resolved;
                // Arguments cannot be dropped, so whatever they name stays.
                self.read
                    .extend(arguments.iter().filter_map(|&a| module.root_variable(a)));
            }
            _ => {}
        }
        true
    }

    fn visit_variable(&mut self, _module: &Module, variable: Handle<Variable>, role: Role) {
        if role.is_read() {
            self.read.insert(variable);
        }
    }
}

fn is_candidate(var: &Variable) -> bool {
    matches!(var.mode, StorageMode::Auto | StorageMode::Temporary)
}

fn dead_variables(module: &Module, reachable: &[Handle<Function>]) -> HashSet<Handle<Variable>> {
    let mut usage = Usage::default();
    walk_initializers(module, &mut usage);
    walk_block(module, &module.global_body, &mut usage);
    for &f in reachable {
        walk_block(module, &module.functions[f].body, &mut usage);
    }

    let mut dead: HashSet<_> = usage
        .declared
        .iter()
        .copied()
        .filter(|v| is_candidate(&module.variables[*v]) && !usage.read.contains(v))
        .collect();
    if usage.unresolved_call {
        log::debug!("dce: unresolved call sites, keeping program-scope variables");
    } else {
        dead.extend(
            module
                .globals
                .iter()
                .copied()
                .filter(|g| is_candidate(&module.variables[*g]) && !usage.read.contains(g)),
        );
    }
    dead
}

fn remove_dead(module: &Module, dead: &HashSet<Handle<Variable>>, statement: &mut Statement) -> Splice {
    let is_dead = |h| module.root_variable(h).is_some_and(|v| dead.contains(&v));
    match statement {
        Statement::Declare(var) if dead.contains(var) => Splice::remove(),
        Statement::Assign { target, .. } if is_dead(*target) => Splice::remove(),
        Statement::Call { result, .. } | Statement::Atomic { result, .. }
            if result.is_some_and(is_dead) =>
        {
            *result = None;
            Splice::keep()
        }
        _ => Splice::keep(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::*;
    use hxc_ir::*;

    #[test]
    fn removes_unread_local() {
        let (mut module, main) = with_entry();
        let f32_ty = scalar(&mut module, Scalar::F32);
        let tmp = module.add_variable(Variable::new("tmp", f32_ty, StorageMode::Auto));
        let one = module.add_expression(Expression::Literal(Literal::F32(1.0)));
        let target = load(&mut module, tmp);
        module.functions[main].body = vec![
            Statement::Declare(tmp),
            Statement::Assign { target, value: one },
            Statement::Return { value: None },
        ];
        assert_eq!(DeadCodeElimination.run(&mut module), Ok(true));
        assert_eq!(
            module.functions[main].body,
            vec![Statement::Return { value: None }]
        );
        assert_eq!(DeadCodeElimination.run(&mut module), Ok(false));
    }

    #[test]
    fn keeps_globals_read_by_another_global_initializer() {
        let (mut module, main) = with_entry();
        let f32_ty = scalar(&mut module, Scalar::F32);
        let base = module.add_global(Variable::new("base", f32_ty, StorageMode::Auto));
        let mut derived = Variable::new("derived", f32_ty, StorageMode::Auto);
        derived.init = Some(load(&mut module, base));
        let derived = module.add_global(derived);
        let value = load(&mut module, derived);
        module.functions[main].body = vec![Statement::Return { value: Some(value) }];

        DeadCodeElimination.run(&mut module).unwrap();
        assert_eq!(module.globals, vec![base, derived]);
    }

    #[test]
    fn keeps_outputs_and_read_locals() {
        let (mut module, main) = with_entry();
        let f32_ty = scalar(&mut module, Scalar::F32);
        let out = module.add_variable(Variable::new("color", f32_ty, StorageMode::Output));
        module.functions[main].parameters.push(out);
        let tmp = module.add_variable(Variable::new("tmp", f32_ty, StorageMode::Auto));
        let one = module.add_expression(Expression::Literal(Literal::F32(1.0)));
        let (tmp_w, tmp_r, out_w) = (
            load(&mut module, tmp),
            load(&mut module, tmp),
            load(&mut module, out),
        );
        module.functions[main].body = vec![
            Statement::Declare(tmp),
            Statement::Assign { target: tmp_w, value: one },
            Statement::Assign { target: out_w, value: tmp_r },
        ];
        assert_eq!(DeadCodeElimination.run(&mut module), Ok(false));
        assert_eq!(module.functions[main].body.len(), 3);
    }

    #[test]
    fn drops_code_after_return() {
        let (mut module, main) = with_entry();
        let condition = module.add_expression(Expression::Literal(Literal::Bool(true)));
        module.functions[main].body = vec![
            Statement::If {
                condition,
                accept: vec![Statement::Return { value: None }, Statement::Discard],
                reject: Vec::new(),
            },
            Statement::Discard,
        ];
        assert_eq!(DeadCodeElimination.run(&mut module), Ok(true));
        let Statement::If { ref accept, .. } = module.functions[main].body[0] else {
            unreachable!()
        };
        assert_eq!(accept.len(), 1);
        assert_eq!(module.functions[main].body.len(), 2);
    }

    fn module_with_global_and_call(callee_defined: bool) -> (Module, Handle<Variable>) {
        let (mut module, main) = with_entry();
        let f32_ty = scalar(&mut module, Scalar::F32);
        let g = module.add_global(Variable::new("g_scratch", f32_ty, StorageMode::Auto));
        let one = module.add_expression(Expression::Literal(Literal::F32(1.0)));
        let target = load(&mut module, g);
        let mut callee = Function::new("External");
        if !callee_defined {
            callee.flags.remove(FunctionFlags::DEFINED);
        }
        let callee = module.add_function(callee);
        module.functions[main].body = vec![
            Statement::Assign { target, value: one },
            Statement::Call {
                function: callee,
                arguments: Vec::new(),
                result: None,
            },
        ];
        (module, g)
    }

    #[test]
    fn globals_removed_when_all_calls_resolved() {
        let (mut module, g) = module_with_global_and_call(true);
        assert_eq!(DeadCodeElimination.run(&mut module), Ok(true));
        assert!(!module.globals.contains(&g));
    }

    #[test]
    fn unresolved_call_keeps_globals() {
        let (mut module, g) = module_with_global_and_call(false);
        assert_eq!(DeadCodeElimination.run(&mut module), Ok(false));
        assert!(module.globals.contains(&g));
    }

    #[test]
    fn unreachable_function_is_dropped() {
        let (mut module, _) = with_entry();
        let mut orphan = Function::new("Orphan");
        orphan.body.push(Statement::Discard);
        let orphan = module.add_function(orphan);
        assert_eq!(DeadCodeElimination.run(&mut module), Ok(true));
        assert!(!module.functions[orphan].is_defined());
        assert!(module.functions[orphan].body.is_empty());
    }
}
