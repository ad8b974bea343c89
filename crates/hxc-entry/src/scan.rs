//! Splits entry-point parameters and results into semantic-carrying leaves.

use hxc_ir::{DiagnosticLog, Handle, Module, Type, TypeInner};

use crate::system_values::split_index;
use crate::EntryError;

/// A scalar, vector or matrix piece of a boundary value with its semantic.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Leaf {
    /// Constant field or element indices from the value down to the leaf.
    pub path: Vec<u32>,
    pub semantic: String,
    pub ty: Handle<Type>,
}

/// Collects the leaves of a value of type `ty`. `owner` names the value in
/// error messages.
pub(crate) fn leaves(
    module: &Module,
    ty: Handle<Type>,
    semantic: Option<&str>,
    owner: &str,
    log: &mut DiagnosticLog,
) -> Result<Vec<Leaf>, EntryError> {
    let mut out = Vec::new();
    collect(module, ty, semantic, owner, &mut Vec::new(), log, &mut out)?;
    Ok(out)
}

fn collect(
    module: &Module,
    ty: Handle<Type>,
    semantic: Option<&str>,
    owner: &str,
    path: &mut Vec<u32>,
    log: &mut DiagnosticLog,
    out: &mut Vec<Leaf>,
) -> Result<(), EntryError> {
    let resolved = module.resolver().type_inner(ty)?;
    match *resolved {
        TypeInner::Struct { ref members, .. } => {
            let structure = module.types[ty].name.clone().unwrap_or_default();
            for (i, member) in members.iter().enumerate() {
                let field_semantic = match (semantic, member.semantic.as_deref()) {
                    (Some(parent), Some(own)) => {
                        let derived = format!("{parent}{i}");
                        log.warning(format!(
                            "semantic '{own}' of field '{}' is overridden by enclosing semantic '{parent}'",
                            member.name
                        ));
                        Some(derived)
                    }
                    (Some(parent), None) => {
                        let derived = format!("{parent}{i}");
                        log.warning(format!(
                            "creating semantic '{derived}' for struct field '{}'",
                            member.name
                        ));
                        Some(derived)
                    }
                    (None, own) => own.map(str::to_string),
                };
                let nested = matches!(module.types[member.ty].inner, TypeInner::Struct { .. });
                if field_semantic.is_none() && !nested {
                    return Err(EntryError::MissingFieldSemantic {
                        field: member.name.clone(),
                        structure,
                    });
                }
                path.push(i as u32);
                collect(
                    module,
                    member.ty,
                    field_semantic.as_deref(),
                    &member.name,
                    path,
                    log,
                    out,
                )?;
                path.pop();
            }
        }
        TypeInner::Array { base, size } => {
            let semantic = semantic.ok_or_else(|| EntryError::MissingSemantic(owner.to_string()))?;
            let (name, first) = split_index(semantic);
            for i in 0..size {
                path.push(i);
                let element = format!("{name}{}", first + i);
                collect(module, base, Some(&element), owner, path, log, out)?;
                path.pop();
            }
        }
        _ => {
            let semantic = semantic.ok_or_else(|| EntryError::MissingSemantic(owner.to_string()))?;
            out.push(Leaf {
                path: path.clone(),
                semantic: semantic.to_string(),
                ty,
            });
        }
    }
    Ok(())
}
