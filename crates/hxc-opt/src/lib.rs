//! Structural optimization passes for hxc.
//!
//! Provides a [`Pass`] trait, a [`PassManager`] with fixed-point iteration,
//! and the built-in passes: global hoisting, precision isolation, redundant
//! cast collapsing, dead code elimination and (opt-in) local common
//! subexpression elimination.

mod casts;
mod cse;
mod dce;
mod hoist;
mod precision;
mod validation;

pub use casts::RedundantCasts;
pub use cse::CommonSubexprElimination;
pub use dce::DeadCodeElimination;
pub use hoist::GlobalHoisting;
pub use precision::PrecisionIsolation;
pub use validation::{validate, IrValidation};

use std::fmt::Debug;

use hxc_ir::{IrError, Module};

/// An optimization pass that transforms an IR module.
pub trait Pass: Debug {
    /// Human-readable name of the pass.
    fn name(&self) -> &str;

    /// Run the pass on a module. Returns `true` if anything was modified.
    ///
    /// On error the module may be left half-rewritten; [`PassManager`] only
    /// commits the result of a pass that succeeded.
    fn run(&self, module: &mut Module) -> Result<bool, IrError>;
}

/// Optimization level.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum OptLevel {
    /// Validation only.
    O0,
    /// Hoisting, precision isolation, cast collapsing and DCE.
    #[default]
    O1,
    /// O1 plus local CSE.
    O2,
}

impl std::str::FromStr for OptLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, String> {
        match s {
            "0" | "O0" => Ok(Self::O0),
            "1" | "O1" => Ok(Self::O1),
            "2" | "O2" => Ok(Self::O2),
            _ => Err(format!("unknown optimization level '{s}'")),
        }
    }
}

/// Maximum number of fixed-point iterations before giving up.
const MAX_ITERATIONS: usize = 10;

/// Runs passes in sequence with fixed-point iteration.
#[derive(Debug)]
pub struct PassManager {
    passes: Vec<Box<dyn Pass>>,
}

impl Default for PassManager {
    fn default() -> Self {
        Self::new()
    }
}

impl PassManager {
    /// Creates an empty pass manager with no passes.
    pub fn new() -> Self {
        Self { passes: Vec::new() }
    }

    /// Creates a pass manager with passes appropriate for the given level.
    pub fn for_level(level: OptLevel) -> Self {
        let mut pm = Self::new();
        pm.add_pass(Box::new(IrValidation));
        if level >= OptLevel::O1 {
            pm.add_pass(Box::new(GlobalHoisting));
            pm.add_pass(Box::new(PrecisionIsolation));
            pm.add_pass(Box::new(RedundantCasts));
            pm.add_pass(Box::new(DeadCodeElimination));
        }
        if level >= OptLevel::O2 {
            pm.add_pass(Box::new(CommonSubexprElimination));
        }
        pm
    }

    /// Adds a pass to the pipeline.
    pub fn add_pass(&mut self, pass: Box<dyn Pass>) {
        self.passes.push(pass);
    }

    /// Names of the scheduled passes, in order.
    pub fn pass_names(&self) -> Vec<&str> {
        self.passes.iter().map(|p| p.name()).collect()
    }

    /// Runs all passes until a fixed point is reached or the iteration limit.
    /// Returns `true` if the module changed.
    ///
    /// Each pass works on a copy of the module that replaces the original
    /// only when the pass succeeds and reports a change.
    pub fn run(&self, module: &mut Module) -> Result<bool, IrError> {
        let mut any = false;
        for iteration in 0..MAX_ITERATIONS {
            let mut changed = false;
            for pass in &self.passes {
                let mut working = module.clone();
                if pass.run(&mut working)? {
                    log::debug!("pass '{}' changed the module (iteration {iteration})", pass.name());
                    *module = working;
                    changed = true;
                }
            }
            if !changed {
                return Ok(any);
            }
            any = true;
        }
        log::warn!("optimizer did not converge after {MAX_ITERATIONS} iterations");
        Ok(any)
    }
}

/// Convenience function: runs the passes of `level` on a module.
pub fn optimize(module: &mut Module, level: OptLevel) -> Result<bool, IrError> {
    PassManager::for_level(level).run(module)
}


#[cfg(test)]
mod tests {
    use super::test_util::*;
    use super::*;
    use hxc_ir::*;

    #[test]
    fn optimize_empty_module() {
        let mut module = Module::default();
        assert_eq!(optimize(&mut module, OptLevel::O1), Ok(false));
        assert!(module.functions.is_empty());
    }

    #[test]
    fn pass_manager_o0_only_validates() {
        let pm = PassManager::for_level(OptLevel::O0);
        assert_eq!(pm.pass_names(), ["ir-validation"]);
    }

    #[test]
    fn o2_adds_cse() {
        let names = PassManager::for_level(OptLevel::O2).pass_names().join(",");
        assert!(names.ends_with(",cse"), "{names}");
        assert!(!PassManager::for_level(OptLevel::O1)
            .pass_names()
            .contains(&"cse"));
    }

    #[test]
    fn opt_level_parses() {
        assert_eq!("2".parse::<OptLevel>(), Ok(OptLevel::O2));
        assert_eq!("O0".parse::<OptLevel>(), Ok(OptLevel::O0));
        assert!("fast".parse::<OptLevel>().is_err());
    }

    #[derive(Debug)]
    struct Broken;

    impl Pass for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        fn run(&self, module: &mut Module) -> Result<bool, IrError> {
            module.global_body.push(Statement::Discard);
            Err(IrError::InvalidShape("broken".into()))
        }
    }

    #[test]
    fn failing_pass_leaves_module_untouched() {
        let mut pm = PassManager::new();
        pm.add_pass(Box::new(Broken));
        let mut module = Module::default();
        assert!(pm.run(&mut module).is_err());
        assert!(module.global_body.is_empty());
    }

    fn shader_with_dead_code() -> Module {
        let (mut module, main) = with_entry();
        let f32_ty = scalar(&mut module, Scalar::F32);
        let f16_ty = scalar(&mut module, Scalar::F16);
        let input = module.add_global(Variable::new("Input", f32_ty, StorageMode::Uniform));
        let dead = module.add_variable(Variable::new("unused", f32_ty, StorageMode::Auto));
        let h = module.add_variable(Variable::new("h", f16_ty, StorageMode::Auto));

        let a = load(&mut module, input);
        let dead_target = load(&mut module, dead);
        let a2 = load(&mut module, input);
        let sum = binary(&mut module, BinaryOp::Add, a, a2);
        let h_target = load(&mut module, h);
        let h_read = load(&mut module, h);
        let mixed = binary(&mut module, BinaryOp::Multiply, h_read, a);

        module.functions[main].result = Some(FunctionResult {
            ty: f32_ty,
            semantic: Some("SV_Target".into()),
        });
        module.functions[main].body = vec![
            Statement::Declare(dead),
            Statement::Assign {
                target: dead_target,
                value: sum,
            },
            Statement::Declare(h),
            Statement::Assign {
                target: h_target,
                value: a,
            },
            Statement::Return { value: Some(mixed) },
        ];
        module
    }

    #[test]
    fn optimizer_reaches_fixed_point() {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut module = shader_with_dead_code();
        assert_eq!(optimize(&mut module, OptLevel::O2), Ok(true));
        let once = module.clone();
        assert_eq!(optimize(&mut module, OptLevel::O2), Ok(false));
        assert_eq!(dump_module(&once), dump_module(&module));
    }

    #[test]
    fn o1_removes_dead_store_and_isolates_precision() {
        let mut module = shader_with_dead_code();
        optimize(&mut module, OptLevel::O1).unwrap();
        let dump = dump_module(&module);
        assert!(!dump.contains("unused"), "{dump}");
        assert!(dump.contains("h[2] = Float16(Input[0])"), "{dump}");
        assert!(dump.contains("return (Float32(h[2]) * Input[0])"), "{dump}");
    }
}
