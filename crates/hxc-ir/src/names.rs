//! Unique name generation for emitted variables.

use std::collections::{HashMap, HashSet};

use crate::arena::Handle;
use crate::types::{ScalarKind, TypeInner};
use crate::var::{StorageMode, Variable};
use crate::Module;

/// Assigns each variable one stable name for the duration of an emission
/// pass.
///
/// Temporaries and autos get short synthesized names whose prefix encodes
/// the type; other variables keep their declared name, suffixed when a
/// different variable already claimed it in the same scope.
#[derive(Debug, Default)]
pub struct Namer {
    cache: HashMap<Handle<Variable>, String>,
    global_names: HashSet<String>,
    local_names: HashSet<String>,
    temp_id: u32,
    global_id: u32,
}

impl Namer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a new function scope: local names may be reused and the
    /// temporary counter restarts. Global names are kept.
    pub fn begin_function(&mut self) {
        self.temp_id = 0;
        self.local_names.clear();
    }

    /// Pins `name` for `variable`, e.g. for bindings whose name is part of
    /// the runtime contract.
    pub fn reserve(&mut self, variable: Handle<Variable>, name: impl Into<String>) {
        let name = name.into();
        self.global_names.insert(name.clone());
        self.cache.insert(variable, name);
    }

    /// Previously assigned name of `variable`.
    pub fn get(&self, variable: Handle<Variable>) -> Option<&str> {
        self.cache.get(&variable).map(String::as_str)
    }

    /// Returns the name of `variable`, assigning one on first use.
    /// `global_scope` selects the program-wide namespace.
    pub fn name(&mut self, module: &Module, variable: Handle<Variable>, global_scope: bool) -> String {
        if let Some(name) = self.cache.get(&variable) {
            return name.clone();
        }
        let var = &module.variables[variable];
        let synthesize = matches!(var.mode, StorageMode::Temporary | StorageMode::Auto)
            && (global_scope || !is_parameter(module, variable))
            || var.name.as_deref().map_or(true, str::is_empty);
        let name = if synthesize {
            let prefix = if global_scope {
                "g"
            } else {
                type_prefix(module, var)
            };
            loop {
                let id = if global_scope {
                    &mut self.global_id
                } else {
                    &mut self.temp_id
                };
                let candidate = format!("{prefix}{id}");
                *id += 1;
                if !self.is_taken(&candidate) {
                    break candidate;
                }
            }
        } else {
            let base = sanitize(var.display_name());
            let mut candidate = base.clone();
            let mut suffix = 1;
            while self.is_taken(&candidate) {
                candidate = format!("{base}_{suffix}");
                suffix += 1;
            }
            candidate
        };
        if global_scope {
            self.global_names.insert(name.clone());
        } else {
            self.local_names.insert(name.clone());
        }
        log::trace!("variable {variable:?} named '{name}'");
        self.cache.insert(variable, name.clone());
        name
    }

    fn is_taken(&self, name: &str) -> bool {
        self.global_names.contains(name) || self.local_names.contains(name)
    }
}

fn is_parameter(module: &Module, variable: Handle<Variable>) -> bool {
    module
        .functions
        .iter()
        .any(|(_, f)| f.parameters.contains(&variable))
}

fn type_prefix(module: &Module, var: &Variable) -> &'static str {
    match module.types.try_get(var.ty).map(|t| &t.inner) {
        Some(TypeInner::Matrix { .. }) => "m",
        Some(TypeInner::Vector { .. }) => "v",
        Some(TypeInner::Scalar(s)) => match s.kind {
            ScalarKind::Bool => "b",
            ScalarKind::Uint => "u",
            ScalarKind::Sint => "i",
            ScalarKind::Float if s.width == 2 => "h",
            ScalarKind::Float => "f",
        },
        _ => "t",
    }
}

/// Replaces characters that are not valid in identifiers.
pub fn sanitize(name: &str) -> String {
    let mut out: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if out.is_empty() || out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}
