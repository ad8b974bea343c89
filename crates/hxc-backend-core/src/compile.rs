//! The compile driver: every stage, in order, over one module.

use hxc_entry::{resolve_entry_point, synthesize, EntryError, EntryInterface};
use hxc_ir::{DiagnosticLog, FunctionFlags, IrError, Module, Stage};
use hxc_opt::{CommonSubexprElimination, OptLevel, PassManager};
use hxc_pack::{pack, PackError, PackOptions, ResourceLayout};

use crate::legalize::{legalize, LegalizeError};
use crate::{Backend, BackendError, BackendOptions, BackendOutput};

/// Everything a backend needs besides the lowered module.
#[derive(Debug)]
pub struct EmitContext<'a> {
    /// Stage being compiled.
    pub stage: Stage,
    /// Options of this compilation.
    pub options: &'a BackendOptions,
    /// Resource indices, packed arrays and the copy plan.
    pub layout: &'a ResourceLayout,
    /// The synthesized entry point and its boundary.
    pub interface: &'a EntryInterface,
}

/// Why a compilation produced no source.
#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    /// The shader is invalid for the target; `log` holds at least one error.
    #[error("compilation failed with {} error(s)", log.error_count())]
    Rejected {
        /// Every diagnostic of the compilation.
        log: DiagnosticLog,
    },
    /// Internal compiler error.
    #[error("internal compiler error: {0}")]
    Internal(#[from] IrError),
}

/// A stage failure: either already described in the log, or internal.
enum Failure {
    Reported,
    Internal(IrError),
}

impl From<IrError> for Failure {
    fn from(e: IrError) -> Self {
        Self::Internal(e)
    }
}

fn report_entry(log: &mut DiagnosticLog, e: EntryError) -> Failure {
    match e {
        EntryError::Internal(e) => Failure::Internal(e),
        e => {
            log.error(e.to_string());
            Failure::Reported
        }
    }
}

fn report_pack(log: &mut DiagnosticLog, e: PackError) -> Failure {
    match e {
        PackError::Internal(e) => Failure::Internal(e),
        e => {
            log.error(e.to_string());
            Failure::Reported
        }
    }
}

/// Compiles the function `entry` of `module` as a `stage` shader with
/// `backend`.
///
/// Runs entry resolution, optimization, resource packing, entry-point
/// synthesis, legalization and emission. User errors are collected into the
/// log carried by [`CompileError::Rejected`]; warnings of a successful
/// compilation end up in [`BackendOutput::diagnostics`].
pub fn compile(
    backend: &dyn Backend,
    mut module: Module,
    entry: &str,
    stage: Stage,
    options: &BackendOptions,
) -> Result<BackendOutput, CompileError> {
    log::debug!(
        "compiling '{entry}' as {stage} shader for {} with {options}",
        backend.name()
    );
    let mut log = DiagnosticLog::new();
    match lower_and_emit(backend, &mut module, entry, stage, options, &mut log) {
        Ok(mut output) if !log.has_errors() => {
            output.diagnostics.extend(log.into_vec());
            Ok(output)
        }
        Ok(_) | Err(Failure::Reported) => Err(CompileError::Rejected { log }),
        Err(Failure::Internal(e)) => Err(CompileError::Internal(e)),
    }
}

fn lower_and_emit(
    backend: &dyn Backend,
    module: &mut Module,
    entry: &str,
    stage: Stage,
    options: &BackendOptions,
    log: &mut DiagnosticLog,
) -> Result<BackendOutput, Failure> {
    let entry = resolve_entry_point(module, entry).map_err(|e| report_entry(log, e))?;
    for (handle, function) in module.functions.iter_mut() {
        if handle == entry {
            function.flags.insert(FunctionFlags::ENTRY_POINT);
        } else {
            function.flags.remove(FunctionFlags::ENTRY_POINT);
        }
    }

    let mut passes = PassManager::for_level(options.opt_level);
    if options.cse && options.opt_level < OptLevel::O2 {
        passes.add_pass(Box::new(CommonSubexprElimination));
    }
    let changed = passes.run(module)?;
    log::debug!("optimizer ({:?}) changed the module: {changed}", options.opt_level);

    let pack_options = PackOptions {
        flatten_buffers: options.flatten_buffers,
        flatten_structs: options.flatten_structs,
        bounds_checks: options.bounds_checks,
        limits: backend.limits(options.profile),
        ..PackOptions::new(stage)
    };
    let layout = pack(module, &pack_options).map_err(|e| report_pack(log, e))?;

    let table = backend.system_values(stage, options.profile);
    let interface = synthesize(module, entry, stage, &table, log).map_err(|e| report_entry(log, e))?;

    match legalize(module, stage, &backend.capabilities(options.profile), log) {
        Ok(()) => {}
        Err(LegalizeError::Rejected(_)) => return Err(Failure::Reported),
        Err(LegalizeError::Internal(e)) => return Err(Failure::Internal(e)),
    }
    if log.has_errors() {
        return Err(Failure::Reported);
    }

    let ctx = EmitContext {
        stage,
        options,
        layout: &layout,
        interface: &interface,
    };
    backend.emit(module, &ctx).map_err(|e| match e {
        BackendError::Internal(e) => Failure::Internal(e),
        e @ BackendError::Unsupported(_) => {
            log.error(e.to_string());
            Failure::Reported
        }
    })
}
