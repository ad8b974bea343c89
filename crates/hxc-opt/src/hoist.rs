//! Global hoisting.
//!
//! Moves global-scope statements, and the initializers of mutable `static`
//! globals, to the head of the entry point when the program has exactly one
//! user-defined function. With more functions the statements stay put and
//! entry-point synthesis runs them at the head of `main`.

use hxc_ir::{Expression, IrError, Module, Statement, StorageMode};

use crate::Pass;

#[derive(Debug)]
pub struct GlobalHoisting;

impl Pass for GlobalHoisting {
    fn name(&self) -> &str {
        "global-hoisting"
    }

    fn run(&self, module: &mut Module) -> Result<bool, IrError> {
        let initialized: Vec<_> = module
            .globals
            .iter()
            .copied()
            .filter(|&g| {
                let var = &module.variables[g];
                var.mode == StorageMode::Auto && !var.read_only && var.init.is_some()
            })
            .collect();
        if module.global_body.is_empty() && initialized.is_empty() {
            return Ok(false);
        }

        let user_defined = module
            .functions
            .iter()
            .filter(|(_, f)| f.is_user_defined())
            .count();
        if user_defined != 1 {
            log::debug!("hoisting skipped: {user_defined} user-defined functions");
            return Ok(false);
        }
        let Ok(entry) = module.entry_point() else {
            log::debug!("hoisting skipped: no single entry point");
            return Ok(false);
        };
        if !module.functions[entry].is_user_defined() {
            return Ok(false);
        }

        let mut head = Vec::with_capacity(initialized.len() + module.global_body.len());
        for global in initialized {
            let Some(value) = module.variables[global].init.take() else {
                continue;
            };
            let target = module.add_expression(Expression::Variable(global));
            head.push(Statement::Assign { target, value });
        }
        head.append(&mut module.global_body);
        log::debug!(
            "hoisting {} global statement(s) into '{}'",
            head.len(),
            module.functions[entry].name
        );
        module.functions[entry].body.splice(0..0, head);
        Ok(true)
    }
}
