#![warn(missing_docs)]
//! Backend trait and compile pipeline for hxc.
//!
//! Defines the [`Backend`] trait that target code emitters implement, along
//! with supporting types ([`BackendOptions`], [`BackendOutput`],
//! [`BackendError`]), a [`BackendRegistry`] for CLI dispatch, the platform
//! legalizer and the [`compile`] driver that runs every stage in order.

mod compile;
pub mod legalize;

pub use compile::{compile, CompileError, EmitContext};
pub use legalize::{legalize, CapabilityProfile, LegalizeError};

use std::fmt::{self, Debug};

use hxc_entry::SystemValueTable;
use hxc_ir::{Diagnostic, IrError, Module, Stage};
use hxc_opt::OptLevel;
use hxc_pack::ResourceLimits;

/// Device family a shader is compiled for.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum TargetProfile {
    /// Desktop GPUs: more texture slots, coverage masks.
    #[default]
    Desktop,
    /// Mobile GPUs.
    Mobile,
}

impl TargetProfile {
    /// Index ceilings of this profile.
    pub fn limits(self) -> ResourceLimits {
        match self {
            Self::Desktop => ResourceLimits::DESKTOP,
            Self::Mobile => ResourceLimits::MOBILE,
        }
    }

    /// `true` for [`TargetProfile::Desktop`].
    pub fn is_desktop(self) -> bool {
        self == Self::Desktop
    }
}

impl fmt::Display for TargetProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Desktop => "desktop",
            Self::Mobile => "mobile",
        })
    }
}

impl std::str::FromStr for TargetProfile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, String> {
        match s {
            "desktop" | "mac" | "macos" => Ok(Self::Desktop),
            "mobile" | "ios" => Ok(Self::Mobile),
            _ => Err(format!("unknown target profile '{s}'")),
        }
    }
}

/// A backend that turns a lowered hxc module into target source.
///
/// The pipeline asks the backend for its target conventions (system values,
/// capabilities, index ceilings) before lowering, then hands it the lowered
/// module through [`Backend::emit`].
pub trait Backend: Debug + Send + Sync {
    /// Human-readable name (e.g. "Metal").
    fn name(&self) -> &str;

    /// Target identifiers this backend handles (for `--target` dispatch).
    fn targets(&self) -> &[&str];

    /// System-value semantics understood by `stage` on `profile`.
    fn system_values(&self, _stage: Stage, _profile: TargetProfile) -> SystemValueTable {
        SystemValueTable::new()
    }

    /// Platform restrictions enforced before emission.
    fn capabilities(&self, _profile: TargetProfile) -> CapabilityProfile {
        CapabilityProfile::UNRESTRICTED
    }

    /// Resource index ceilings.
    fn limits(&self, profile: TargetProfile) -> ResourceLimits {
        profile.limits()
    }

    /// Emits the lowered module.
    fn emit(&self, module: &Module, ctx: &EmitContext<'_>) -> Result<BackendOutput, BackendError>;
}

/// Options for one compilation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackendOptions {
    /// Desktop or mobile tables and ceilings.
    pub profile: TargetProfile,
    /// Optimization level.
    pub opt_level: OptLevel,
    /// Schedule common subexpression elimination below `O2` too.
    pub cse: bool,
    /// Zero-initialize scalar, vector and matrix locals.
    pub zero_initialize: bool,
    /// Guard buffer accesses against the element counts in a side table.
    pub bounds_checks: bool,
    /// Dissolve uniform blocks into packed arrays.
    pub flatten_buffers: bool,
    /// Split struct uniforms into one packed entry per field.
    pub flatten_structs: bool,
}

impl Default for BackendOptions {
    fn default() -> Self {
        Self {
            profile: TargetProfile::Desktop,
            opt_level: OptLevel::O1,
            cse: false,
            zero_initialize: false,
            bounds_checks: false,
            flatten_buffers: false,
            flatten_structs: false,
        }
    }
}

impl fmt::Display for BackendOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "BackendOptions {{ profile: {}, opt_level: {:?}, cse: {}, zero_init: {}, bounds_checks: {}, flatten_buffers: {}, flatten_structs: {} }}",
            self.profile,
            self.opt_level,
            self.cse,
            self.zero_initialize,
            self.bounds_checks,
            self.flatten_buffers,
            self.flatten_structs
        )
    }
}

/// The output produced by a backend.
#[derive(Clone, Debug, Default)]
pub struct BackendOutput {
    /// Generated files; the Metal backend produces exactly one.
    pub files: Vec<OutputFile>,
    /// Non-fatal diagnostics of the whole compilation.
    pub diagnostics: Vec<Diagnostic>,
}

impl BackendOutput {
    /// A single text file.
    pub fn single(name: impl Into<String>, content: String) -> Self {
        Self {
            files: vec![OutputFile {
                name: name.into(),
                content,
            }],
            diagnostics: Vec::new(),
        }
    }
}

impl fmt::Display for BackendOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} file(s), {} diagnostic(s)",
            self.files.len(),
            self.diagnostics.len()
        )
    }
}

/// A single generated source file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputFile {
    /// Suggested filename (e.g. "shader.metal").
    pub name: String,
    /// UTF-8 source text.
    pub content: String,
}

impl fmt::Display for OutputFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} chars)", self.name, self.content.len())
    }
}

/// Errors raised by [`Backend::emit`].
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// The module uses a construct the target cannot express.
    #[error("unsupported: {0}")]
    Unsupported(String),
    /// Internal compiler error.
    #[error(transparent)]
    Internal(#[from] IrError),
}

/// Registry of available backends, used for CLI `--target` dispatch.
pub struct BackendRegistry {
    backends: Vec<Box<dyn Backend>>,
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl BackendRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            backends: Vec::new(),
        }
    }

    /// Creates a registry pre-populated with built-in backends.
    pub fn with_builtins() -> Self {
        let mut reg = Self::new();
        reg.register(Box::new(IrDumpBackend));
        reg
    }

    /// Registers a backend.
    pub fn register(&mut self, backend: Box<dyn Backend>) {
        self.backends.push(backend);
    }

    /// Finds a backend that handles the given target identifier.
    pub fn find(&self, target: &str) -> Option<&dyn Backend> {
        self.backends
            .iter()
            .find(|b| b.targets().contains(&target))
            .map(|b| &**b)
    }

    /// Lists all supported target identifiers.
    pub fn list_targets(&self) -> Vec<&str> {
        self.backends
            .iter()
            .flat_map(|b| b.targets().iter().copied())
            .collect()
    }
}

/// Built-in backend that dumps the lowered IR using [`hxc_ir::dump_module`].
#[derive(Debug)]
pub struct IrDumpBackend;

impl Backend for IrDumpBackend {
    fn name(&self) -> &str {
        "IR Dump"
    }

    fn targets(&self) -> &[&str] {
        &["ir-dump", "ir"]
    }

    fn emit(&self, module: &Module, _ctx: &EmitContext<'_>) -> Result<BackendOutput, BackendError> {
        Ok(BackendOutput::single("module.ir", hxc_ir::dump_module(module)))
    }
}
