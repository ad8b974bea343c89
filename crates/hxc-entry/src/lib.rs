//! Entry-point synthesis for hxc.
//!
//! Turns the user's entry function into an ordinary helper and generates a
//! canonical `Main` around it: stage inputs arrive as one aggregate plus
//! loose system values, outputs leave as one `StageOut` aggregate, and the
//! body converts between the two shapes around a call to the original.
//!
//! Which semantics are system values is target specific and supplied as a
//! [`SystemValueTable`].

mod scan;
mod system_values;
mod wrapper;

pub use system_values::{
    is_system_semantic, split_index, Direction, SystemValue, SystemValueTable, ValueType,
};

use hxc_ir::{Binding, DiagnosticLog, Function, Handle, IrError, Module, Stage, Type, Variable};

/// Errors raised while resolving or wrapping the entry point.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EntryError {
    #[error("entry point '{0}' not found")]
    NotFound(String),

    #[error("entry point '{name}' is ambiguous: {count} signatures share the name")]
    Ambiguous { name: String, count: usize },

    /// A parameter (or array) without a semantic.
    #[error("'{0}' does not specify a semantic")]
    MissingSemantic(String),

    #[error("field '{field}' in structure '{structure}' does not specify a semantic")]
    MissingFieldSemantic { field: String, structure: String },

    #[error("entry point '{0}' returns a value without a semantic")]
    MissingReturnSemantic(String),

    #[error("{0} shaders are not supported by this target")]
    UnsupportedStage(Stage),

    #[error("semantic '{0}' is bound to more than one stage input")]
    DuplicateStageIn(String),

    #[error("semantic '{0}' is bound to more than one stage output")]
    DuplicateOutput(String),

    /// Compute entry points only exchange system values.
    #[error("compute shader varying '{0}' must be a system value")]
    ComputeVarying(String),

    #[error(transparent)]
    Internal(#[from] IrError),
}

impl EntryError {
    /// `true` for compiler bugs, `false` for problems in the shader.
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::Internal(_))
    }
}

/// A user varying crossing the stage boundary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Varying {
    /// Member name in the boundary aggregate, e.g. `in_ATTRIBUTE0`.
    pub name: String,
    pub semantic: String,
    /// Boundary type, after half promotion.
    pub ty: Handle<Type>,
    pub binding: Binding,
}

/// What the synthesized `Main` exposes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntryInterface {
    pub stage: Stage,
    /// The synthesized wrapper.
    pub main: Handle<Function>,
    /// The user function it calls.
    pub entry: Handle<Function>,
    /// User varyings in, in declaration order.
    pub inputs: Vec<Varying>,
    /// User varyings out, in declaration order.
    pub outputs: Vec<Varying>,
    /// The aggregate `stage_in` parameter.
    pub stage_in: Option<Handle<Variable>>,
    /// Loose system-value parameters.
    pub system_inputs: Vec<Handle<Variable>>,
    /// `StageOut`, when anything is returned.
    pub output_type: Option<Handle<Type>>,
    /// `[numthreads]` of a compute entry point.
    pub num_threads: Option<[u32; 3]>,
}

/// Finds the single defined, non-intrinsic function called `name`.
pub fn resolve_entry_point(module: &Module, name: &str) -> Result<Handle<Function>, EntryError> {
    let candidates: Vec<_> = module
        .functions
        .iter()
        .filter(|(_, f)| f.name == name && f.is_defined() && !f.is_intrinsic())
        .map(|(h, _)| h)
        .collect();
    match candidates.as_slice() {
        [] => Err(EntryError::NotFound(name.to_string())),
        [one] => Ok(*one),
        many => Err(EntryError::Ambiguous {
            name: name.to_string(),
            count: many.len(),
        }),
    }
}

/// Generates `Main` for `entry` and makes it the module's only entry point.
///
/// Warnings (e.g. unrecognized system values) go to `log`; anything that
/// prevents a correct wrapper is returned as an error and leaves `module`
/// untouched.
pub fn synthesize(
    module: &mut Module,
    entry: Handle<Function>,
    stage: Stage,
    table: &SystemValueTable,
    log: &mut DiagnosticLog,
) -> Result<EntryInterface, EntryError> {
    if !matches!(stage, Stage::Vertex | Stage::Pixel | Stage::Compute) {
        return Err(EntryError::UnsupportedStage(stage));
    }
    module.functions.check_contains(entry, "function")?;

    let plan = wrapper::Plan::build(module, entry, stage, table, log)?;
    let interface = plan.emit(module);
    log::debug!(
        "synthesized {} entry '{}': {} input(s), {} output(s), {} system input(s)",
        stage,
        module.functions[entry].name,
        interface.inputs.len(),
        interface.outputs.len(),
        interface.system_inputs.len()
    );
    Ok(interface)
}
