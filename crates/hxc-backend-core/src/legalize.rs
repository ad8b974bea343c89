//! Platform legalization: target restrictions checked (and a few fixed up)
//! after the entry point is synthesized and before emission.

use std::collections::HashMap;

use hxc_ir::visit::{walk_block, walk_initializers, Role, Visitor};
use hxc_ir::{
    DiagnosticLog, Expression, Handle, ImageClass, IrError, Module, ScalarKind, Stage, Statement,
    TypeInner, Variable,
};

/// What a target allows.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CapabilityProfile {
    /// Writable images and buffers are allowed outside compute shaders.
    pub graphics_writes: bool,
    /// One shader may both read and write the same storage image.
    pub read_write_images: bool,
    /// Image coordinates must be unsigned integers.
    pub unsigned_coordinates: bool,
}

impl CapabilityProfile {
    /// No restrictions and no rewrites.
    pub const UNRESTRICTED: Self = Self {
        graphics_writes: true,
        read_write_images: true,
        unsigned_coordinates: false,
    };
}

/// Errors raised by [`legalize`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LegalizeError {
    /// The shader violates the target's restrictions; details are in the log.
    #[error("shader violates platform restrictions ({0} error(s))")]
    Rejected(usize),
    /// Internal compiler error.
    #[error(transparent)]
    Internal(#[from] IrError),
}

const READ: u8 = 1;
const WRITE: u8 = 2;

/// Collects how each resource variable is accessed.
#[derive(Default)]
struct Accesses(HashMap<Handle<Variable>, u8>);

impl Visitor for Accesses {
    fn visit_variable(&mut self, _module: &Module, variable: Handle<Variable>, role: Role) {
        let bits = self.0.entry(variable).or_default();
        if role.is_read() {
            *bits |= READ;
        }
        if role.is_write() {
            *bits |= WRITE;
        }
    }
}

/// Checks `module` against `profile` for `stage` and applies the required
/// rewrites. Every violation is logged as an error before returning
/// [`LegalizeError::Rejected`].
///
/// Only code the entry point can execute is checked: global scope and the
/// functions reachable from the entry point through calls.
pub fn legalize(
    module: &mut Module,
    stage: Stage,
    profile: &CapabilityProfile,
    log: &mut DiagnosticLog,
) -> Result<(), LegalizeError> {
    let entry = module.entry_point()?;
    let mut accesses = Accesses::default();
    walk_initializers(module, &mut accesses);
    walk_block(module, &module.global_body, &mut accesses);
    for function in module.reachable_from(entry) {
        walk_block(module, &module.functions[function].body, &mut accesses);
    }
    // Declaration order keeps the diagnostics stable.
    let mut used: Vec<_> = accesses.0.into_iter().collect();
    used.sort_by_key(|&(var, _)| var);

    let errors_before = log.error_count();
    for (var, bits) in used {
        let variable = &module.variables[var];
        let inner = module.resolver().type_inner(variable.ty)?;
        let name = variable.display_name();
        if stage != Stage::Compute {
            if inner.is_writable_resource() && !profile.graphics_writes {
                log.error(format!(
                    "writable resource '{name}' is not allowed in {stage} shaders"
                ));
            }
            continue;
        }
        let storage_image = matches!(
            *inner,
            TypeInner::Image {
                class: ImageClass::Storage { .. },
                ..
            }
        );
        if storage_image && bits == READ | WRITE && !profile.read_write_images {
            log.error(format!(
                "simultaneous read and write of storage image '{name}' is not supported"
            ));
        }
    }
    let errors = log.error_count() - errors_before;
    if errors > 0 {
        return Err(LegalizeError::Rejected(errors));
    }

    if profile.unsigned_coordinates {
        let converted = unsigned_coordinates(module)?;
        log::debug!("legalize: {converted} signed image coordinate(s) made unsigned");
    }
    Ok(())
}

/// Wraps signed image load and store coordinates in a conversion to uint.
fn unsigned_coordinates(module: &mut Module) -> Result<usize, IrError> {
    let loads: Vec<_> = module
        .expressions
        .iter()
        .filter_map(|(h, e)| match *e {
            Expression::ImageLoad { coordinate, .. } => Some((h, coordinate)),
            _ => None,
        })
        .collect();
    let mut count = 0;
    for (load, coordinate) in loads {
        if let Some(unsigned) = to_unsigned(module, coordinate)? {
            if let Expression::ImageLoad {
                ref mut coordinate, ..
            } = module.expressions[load]
            {
                *coordinate = unsigned;
                count += 1;
            }
        }
    }

    let mut blocks = vec![std::mem::take(&mut module.global_body)];
    let mut handles = Vec::new();
    for (handle, function) in module.functions.iter_mut() {
        handles.push(handle);
        blocks.push(std::mem::take(&mut function.body));
    }
    let mut result = Ok(());
    for block in &mut blocks {
        if let Err(e) = fix_stores(module, block, &mut count) {
            result = Err(e);
            break;
        }
    }
    let mut blocks = blocks.into_iter();
    module.global_body = blocks.next().unwrap_or_default();
    for (handle, body) in handles.into_iter().zip(blocks) {
        module.functions[handle].body = body;
    }
    result.map(|()| count)
}

fn fix_stores(module: &mut Module, block: &mut [Statement], count: &mut usize) -> Result<(), IrError> {
    for statement in block {
        if let Statement::ImageStore {
            ref mut coordinate, ..
        } = *statement
        {
            if let Some(unsigned) = to_unsigned(module, *coordinate)? {
                *coordinate = unsigned;
                *count += 1;
            }
        }
        for nested in statement.blocks_mut() {
            fix_stores(module, nested, count)?;
        }
    }
    Ok(())
}

fn to_unsigned(module: &mut Module, coordinate: Handle<Expression>) -> Result<Option<Handle<Expression>>, IrError> {
    let scalar = module.resolver().resolve_scalar(coordinate)?;
    if scalar.kind != ScalarKind::Sint {
        return Ok(None);
    }
    Ok(Some(module.add_expression(Expression::As {
        expr: coordinate,
        kind: ScalarKind::Uint,
        width: scalar.width,
    })))
}
