//! Plans and generates the `Main` wrapper.

use hxc_ir::{
    BinaryOp, Binding, BuiltIn, DiagnosticLog, Expression, Function, FunctionFlags,
    FunctionResult, Handle, Literal, Module, Scalar, Stage, Statement, StorageMode, StructMember,
    Type, TypeInner, Variable,
};

use crate::scan::{leaves, Leaf};
use crate::system_values::{is_system_semantic, split_index};
use crate::{Direction, EntryError, EntryInterface, SystemValue, SystemValueTable, ValueType, Varying};

/// Which value of the user entry point a leaf belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Slot {
    Parameter(usize),
    Result,
}

#[derive(Clone, Debug)]
enum Target {
    System(SystemValue),
    User { name: String, binding: Binding },
}

impl Target {
    fn name(&self) -> &str {
        match self {
            Self::System(sv) => &sv.name,
            Self::User { name, .. } => name,
        }
    }
}

#[derive(Clone, Debug)]
struct Route {
    slot: Slot,
    leaf: Leaf,
    target: Target,
}

/// Everything decided about the wrapper before the module is touched.
pub(crate) struct Plan {
    stage: Stage,
    entry: Handle<Function>,
    inputs: Vec<Route>,
    outputs: Vec<Route>,
    num_threads: Option<[u32; 3]>,
}

fn classify(
    stage: Stage,
    table: &SystemValueTable,
    semantic: &str,
    direction: Direction,
    log: &mut DiagnosticLog,
) -> Result<Target, EntryError> {
    if let Some(sv) = table.lookup(semantic, direction) {
        return Ok(Target::System(sv.clone()));
    }
    if is_system_semantic(semantic) {
        let side = match direction {
            Direction::Input => "input",
            Direction::Output => "output",
        };
        log.warning(format!("unrecognized system value {side} '{semantic}'"));
    }
    if stage == Stage::Compute {
        return Err(EntryError::ComputeVarying(semantic.to_string()));
    }
    Ok(match direction {
        Direction::Input if stage == Stage::Vertex => {
            let (name, index) = split_index(semantic);
            if name.eq_ignore_ascii_case("ATTRIBUTE") {
                Target::User {
                    name: format!("in_ATTRIBUTE{index}"),
                    binding: Binding::Attribute(index),
                }
            } else {
                log.warning(format!("unrecognized input attribute '{semantic}'"));
                Target::User {
                    name: format!("in_{semantic}"),
                    binding: Binding::User(semantic.to_string()),
                }
            }
        }
        Direction::Input => Target::User {
            name: format!("in_{semantic}"),
            binding: Binding::User(semantic.to_string()),
        },
        Direction::Output => Target::User {
            name: format!("out_{semantic}"),
            binding: Binding::User(semantic.to_string()),
        },
    })
}

impl Plan {
    pub(crate) fn build(
        module: &Module,
        entry: Handle<Function>,
        stage: Stage,
        table: &SystemValueTable,
        log: &mut DiagnosticLog,
    ) -> Result<Self, EntryError> {
        let function = &module.functions[entry];
        let mut inputs = Vec::new();
        let mut outputs = Vec::new();

        for (i, &param) in function.parameters.iter().enumerate() {
            let var = &module.variables[param];
            let reads = var.mode != StorageMode::Output;
            let writes = matches!(var.mode, StorageMode::Output | StorageMode::InOut);
            for leaf in leaves(module, var.ty, var.semantic.as_deref(), var.display_name(), log)? {
                if reads {
                    let target = classify(stage, table, &leaf.semantic, Direction::Input, log)?;
                    inputs.push(Route {
                        slot: Slot::Parameter(i),
                        leaf: leaf.clone(),
                        target,
                    });
                }
                if writes {
                    let target = classify(stage, table, &leaf.semantic, Direction::Output, log)?;
                    outputs.push(Route {
                        slot: Slot::Parameter(i),
                        leaf,
                        target,
                    });
                }
            }
        }

        if let Some(ref result) = function.result {
            let is_struct = matches!(module.types[result.ty].inner, TypeInner::Struct { .. });
            if result.semantic.is_none() && !is_struct {
                return Err(EntryError::MissingReturnSemantic(function.name.clone()));
            }
            for leaf in leaves(module, result.ty, result.semantic.as_deref(), &function.name, log)? {
                let target = classify(stage, table, &leaf.semantic, Direction::Output, log)?;
                outputs.push(Route {
                    slot: Slot::Result,
                    leaf,
                    target,
                });
            }
        }

        for (i, route) in inputs.iter().enumerate() {
            if let Target::User { ref name, .. } = route.target {
                let clash = inputs[..i]
                    .iter()
                    .any(|r| matches!(r.target, Target::User { name: ref n, .. } if n == name));
                if clash {
                    return Err(EntryError::DuplicateStageIn(route.leaf.semantic.clone()));
                }
            }
        }
        for (i, route) in outputs.iter().enumerate() {
            if outputs[..i]
                .iter()
                .any(|r| r.target.name() == route.target.name())
            {
                return Err(EntryError::DuplicateOutput(route.leaf.semantic.clone()));
            }
        }

        let num_threads = match (stage, function.workgroup_size) {
            (Stage::Compute, Some(size)) => Some(size),
            (Stage::Compute, None) => {
                log.warning(format!(
                    "compute entry point '{}' has no [numthreads]; using 1, 1, 1",
                    function.name
                ));
                Some([1, 1, 1])
            }
            _ => None,
        };

        Ok(Self {
            stage,
            entry,
            inputs,
            outputs,
            num_threads,
        })
    }

    /// Adds the stage aggregates and `Main` to `module`.
    pub(crate) fn emit(self, module: &mut Module) -> EntryInterface {
        let function = module.functions[self.entry].clone();

        // Boundary values: the stage-in aggregate and loose system values.
        let mut stage_in_members = Vec::new();
        let mut inputs = Vec::new();
        let mut system_inputs: Vec<(String, Handle<Variable>)> = Vec::new();
        let mut sources = Vec::with_capacity(self.inputs.len());
        for route in &self.inputs {
            match route.target {
                Target::System(ref sv) => {
                    let existing = system_inputs
                        .iter()
                        .find(|(name, _)| *name == sv.name)
                        .map(|&(_, v)| v);
                    let var = match existing {
                        Some(var) => var,
                        None => {
                            let ty = boundary_type(module, sv.ty, route.leaf.ty);
                            let mut var = Variable::new(sv.name.clone(), ty, StorageMode::Input);
                            var.semantic = Some(route.leaf.semantic.clone());
                            var.binding = Some(sv.binding.clone());
                            var.read_only = true;
                            let var = module.add_variable(var);
                            system_inputs.push((sv.name.clone(), var));
                            var
                        }
                    };
                    sources.push(Source::Parameter(var));
                }
                Target::User {
                    ref name,
                    ref binding,
                } => {
                    let ty = promote(module, route.leaf.ty);
                    sources.push(Source::Member(stage_in_members.len() as u32, ty));
                    stage_in_members.push(StructMember {
                        name: name.clone(),
                        ty,
                        semantic: Some(route.leaf.semantic.clone()),
                        binding: Some(binding.clone()),
                    });
                    inputs.push(Varying {
                        name: name.clone(),
                        semantic: route.leaf.semantic.clone(),
                        ty,
                        binding: binding.clone(),
                    });
                }
            }
        }
        let stage_in = if stage_in_members.is_empty() {
            None
        } else {
            let name = match self.stage {
                Stage::Vertex => "VertexAttributes",
                _ => "StageIn",
            };
            let ty = module.add_named_type(
                name,
                TypeInner::Struct {
                    members: stage_in_members,
                    packed: false,
                },
            );
            let mut var = Variable::new("stage_in", ty, StorageMode::Input);
            var.binding = Some(Binding::StageIn);
            var.read_only = true;
            Some(module.add_variable(var))
        };

        let mut out_members = Vec::new();
        let mut outputs = Vec::new();
        for route in &self.outputs {
            let (ty, binding) = match route.target {
                Target::System(ref sv) => (boundary_type(module, sv.ty, route.leaf.ty), sv.binding.clone()),
                Target::User { ref binding, .. } => (promote(module, route.leaf.ty), binding.clone()),
            };
            if let Target::User { ref name, .. } = route.target {
                outputs.push(Varying {
                    name: name.clone(),
                    semantic: route.leaf.semantic.clone(),
                    ty,
                    binding: binding.clone(),
                });
            }
            out_members.push(StructMember {
                name: route.target.name().to_string(),
                ty,
                semantic: Some(route.leaf.semantic.clone()),
                binding: Some(binding),
            });
        }
        let output_type = (!out_members.is_empty()).then(|| {
            module.add_named_type(
                "StageOut",
                TypeInner::Struct {
                    members: out_members,
                    packed: false,
                },
            )
        });

        // (1) leftover global statements
        let mut body = std::mem::take(&mut module.global_body);

        // (2) temporaries for every parameter, the result and the output
        let temps: Vec<_> = function
            .parameters
            .iter()
            .map(|&p| {
                let ty = module.variables[p].ty;
                module.add_variable(Variable::temporary(ty))
            })
            .collect();
        let result_temp = function
            .result
            .as_ref()
            .map(|r| module.add_variable(Variable::temporary(r.ty)));
        let stage_out = output_type.map(|ty| module.add_variable(Variable::new("stage_out", ty, StorageMode::Auto)));
        body.extend(temps.iter().chain(&result_temp).chain(&stage_out).map(|&v| Statement::Declare(v)));

        let slot_var = |slot: Slot| match slot {
            Slot::Parameter(i) => Some(temps[i]),
            Slot::Result => result_temp,
        };

        // (3) input conversions
        for (route, source) in self.inputs.iter().zip(&sources) {
            let Some(temp) = slot_var(route.slot) else {
                continue;
            };
            let (value, from) = match *source {
                Source::Parameter(var) => (
                    module.add_expression(Expression::Variable(var)),
                    module.variables[var].ty,
                ),
                Source::Member(index, ty) => {
                    let Some(stage_in) = stage_in else {
                        continue;
                    };
                    let base = module.add_expression(Expression::Variable(stage_in));
                    (module.add_expression(Expression::AccessIndex { base, index }), ty)
                }
            };
            let value = convert(module, value, from, route.leaf.ty);
            let target = access_path(module, temp, &route.leaf.path);
            body.push(Statement::Assign { target, value });

            let is_position = matches!(route.target, Target::System(ref sv)
                if sv.binding == Binding::BuiltIn(BuiltIn::Position));
            if self.stage == Stage::Pixel && is_position {
                if let Some(fix) = reciprocal_w(module, temp, &route.leaf) {
                    body.push(fix);
                }
            }
        }

        // (4) the call
        let arguments = temps
            .iter()
            .map(|&t| module.add_expression(Expression::Variable(t)))
            .collect();
        let result = result_temp.map(|t| module.add_expression(Expression::Variable(t)));
        body.push(Statement::Call {
            function: self.entry,
            arguments,
            result,
        });

        // (5) output conversions
        if let Some(stage_out) = stage_out {
            for (index, route) in self.outputs.iter().enumerate() {
                let Some(temp) = slot_var(route.slot) else {
                    continue;
                };
                let member_ty = match module.types[module.variables[stage_out].ty].inner {
                    TypeInner::Struct { ref members, .. } => members[index].ty,
                    _ => continue,
                };
                let value = access_path(module, temp, &route.leaf.path);
                let value = convert(module, value, route.leaf.ty, member_ty);
                let base = module.add_expression(Expression::Variable(stage_out));
                let target = module.add_expression(Expression::AccessIndex {
                    base,
                    index: index as u32,
                });
                body.push(Statement::Assign { target, value });
            }
        }

        // (6) return the output aggregate
        let value = stage_out.map(|v| module.add_expression(Expression::Variable(v)));
        body.push(Statement::Return { value });

        let mut main = Function::new("Main");
        main.flags.insert(FunctionFlags::ENTRY_POINT);
        main.parameters = stage_in
            .into_iter()
            .chain(system_inputs.iter().map(|&(_, v)| v))
            .collect();
        main.result = output_type.map(|ty| FunctionResult { ty, semantic: None });
        main.workgroup_size = self.num_threads;
        main.body = body;
        module.functions[self.entry]
            .flags
            .remove(FunctionFlags::ENTRY_POINT);
        let main = module.add_function(main);

        EntryInterface {
            stage: self.stage,
            main,
            entry: self.entry,
            inputs,
            outputs,
            stage_in,
            system_inputs: system_inputs.into_iter().map(|(_, v)| v).collect(),
            output_type,
            num_threads: self.num_threads,
        }
    }
}

#[derive(Clone, Copy, Debug)]
enum Source {
    Parameter(Handle<Variable>),
    /// Member index in the stage-in aggregate, with its type.
    Member(u32, Handle<Type>),
}

/// Half-precision values cross the boundary as float.
fn promote(module: &mut Module, ty: Handle<Type>) -> Handle<Type> {
    let inner = &module.types[ty].inner;
    match inner.scalar() {
        Some(scalar) if scalar.is_half() => match inner.with_scalar(Scalar::F32) {
            Some(wide) => module.add_type(wide),
            None => ty,
        },
        _ => ty,
    }
}

fn boundary_type(module: &mut Module, value: ValueType, declared: Handle<Type>) -> Handle<Type> {
    match value {
        ValueType::Declared => promote(module, declared),
        ValueType::Scalar(scalar) => module.add_type(TypeInner::Scalar(scalar)),
        ValueType::Vector(size, scalar) => module.add_type(TypeInner::Vector { size, scalar }),
    }
}

/// Converts `value` of type `from` to the scalar type of `to` when they differ.
fn convert(module: &mut Module, value: Handle<Expression>, from: Handle<Type>, to: Handle<Type>) -> Handle<Expression> {
    let from = module.types[from].inner.scalar();
    let to = module.types[to].inner.scalar();
    match (from, to) {
        (Some(from), Some(to)) if from != to => module.add_expression(Expression::As {
            expr: value,
            kind: to.kind,
            width: to.width,
        }),
        _ => value,
    }
}

fn access_path(module: &mut Module, var: Handle<Variable>, path: &[u32]) -> Handle<Expression> {
    let base = module.add_expression(Expression::Variable(var));
    path.iter().fold(base, |base, &index| {
        module.add_expression(Expression::AccessIndex { base, index })
    })
}

/// `pos.w = 1 / pos.w` for a pixel position leaf of four components.
fn reciprocal_w(module: &mut Module, temp: Handle<Variable>, leaf: &Leaf) -> Option<Statement> {
    let TypeInner::Vector { size, scalar } = module.types[leaf.ty].inner else {
        return None;
    };
    if size.len() != 4 {
        return None;
    }
    let mut w_path = leaf.path.clone();
    w_path.push(3);
    let target = access_path(module, temp, &w_path);
    let w = access_path(module, temp, &w_path);
    let one = module.add_expression(Expression::Literal(if scalar.is_half() {
        Literal::F16(1.0)
    } else {
        Literal::F32(1.0)
    }));
    let value = module.add_expression(Expression::Binary {
        op: BinaryOp::Divide,
        left: one,
        right: w,
    });
    Some(Statement::Assign { target, value })
}
