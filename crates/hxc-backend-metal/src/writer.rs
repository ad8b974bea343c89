//! Walks the lowered module and writes Metal source.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt::Write;

use indexmap::IndexSet;

use hxc_backend_core::{BackendError, EmitContext};
use hxc_ir::names::{sanitize, Namer};
use hxc_ir::visit::{walk_block, walk_expression, Role, Visitor};
use hxc_ir::{
    AtomicFunction, Barrier, Expression, Function, Handle, ImageClass, ImageDim, ImageQuery,
    IrError, Literal, Module, SampleLevel, Scalar, ScalarKind, Stage, Statement, StorageMode,
    SwizzleComponent, Type, TypeInner, Variable, VectorSize,
};
use hxc_pack::{ResourceKind, ResourceSlot};

use crate::header::write_header;
use crate::ops::{self, BinaryForm, MathForm};
use crate::semantics::attribute;
use crate::types::{inner_name, member_name, struct_closure, type_name, zero_of, zero_value};

const INDENT: &str = "    ";
const RELAXED: &str = "memory_order_relaxed";

/// What a function body references.
#[derive(Default)]
struct BodyUses {
    variables: BTreeSet<Handle<Variable>>,
    types: Vec<Handle<Type>>,
    calls: IndexSet<Handle<Function>>,
    atomics: Vec<Handle<Variable>>,
}

impl Visitor for BodyUses {
    fn visit_statement(&mut self, module: &Module, statement: &Statement) -> bool {
        match *statement {
            Statement::Declare(var) => {
                if let Some(v) = module.variables.try_get(var) {
                    self.types.push(v.ty);
                }
            }
            Statement::Call { function, .. } => {
                self.calls.insert(function);
            }
            Statement::Atomic { target, .. } => self.atomics.extend(module.root_variable(target)),
            _ => {}
        }
        true
    }

    fn visit_expression(&mut self, module: &Module, handle: Handle<Expression>, _role: Role) -> bool {
        if let Some(Expression::Compose { ty, .. } | Expression::ZeroValue(ty)) = module.expressions.try_get(handle) {
            self.types.push(*ty);
        }
        true
    }

    fn visit_variable(&mut self, module: &Module, variable: Handle<Variable>, _role: Role) {
        self.variables.insert(variable);
        if let Some(v) = module.variables.try_get(variable) {
            self.types.push(v.ty);
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum GlobalKind {
    /// Bound through a `[[ buffer ]]`, `[[ texture ]]` or `[[ sampler ]]`
    /// parameter of `Main`.
    Resource,
    /// Program-scope `constant`.
    Constant,
    /// Declared at the top of `Main` and passed to helpers by reference.
    Mutable,
}

#[derive(Clone, Copy)]
enum Index {
    Dynamic(Handle<Expression>),
    Constant(u32),
}

/// A buffer access guarded by the side table.
#[derive(Clone, Copy)]
struct Bound {
    index: Index,
    slot: u32,
}

fn shape(message: String) -> BackendError {
    BackendError::Internal(IrError::InvalidShape(message))
}

fn literal(literal: Literal) -> String {
    fn float(v: f32, suffix: &str) -> String {
        if v.is_nan() {
            "NAN".to_string()
        } else if v.is_infinite() {
            if v > 0.0 { "INFINITY" } else { "(-INFINITY)" }.to_string()
        } else {
            format!("{v:?}{suffix}")
        }
    }
    match literal {
        Literal::Bool(b) => b.to_string(),
        Literal::I32(i32::MIN) => "(-2147483647 - 1)".to_string(),
        Literal::I32(v) => v.to_string(),
        Literal::U32(v) => format!("{v}u"),
        Literal::F16(v) => float(v, "h"),
        Literal::F32(v) => float(v, ""),
    }
}

pub struct Writer<'a> {
    module: &'a Module,
    ctx: &'a EmitContext<'a>,
    out: String,
    namer: Namer,
    function_names: HashMap<Handle<Function>, String>,
    /// Variables targeted by atomic statements.
    atomics: HashSet<Handle<Variable>>,
    /// Globals passed to each function after its own parameters.
    captures: HashMap<Handle<Function>, Vec<Handle<Variable>>>,
    scope_depth: usize,
    expression_depth: usize,
    temp_id: u32,
}

impl<'a> Writer<'a> {
    pub fn new(module: &'a Module, ctx: &'a EmitContext<'a>) -> Self {
        Self {
            module,
            ctx,
            out: String::new(),
            namer: Namer::new(),
            function_names: HashMap::new(),
            atomics: HashSet::new(),
            captures: HashMap::new(),
            scope_depth: 0,
            expression_depth: 0,
            temp_id: 0,
        }
    }

    /// Emits the whole shader.
    pub fn write(mut self) -> Result<String, BackendError> {
        let main = self.ctx.interface.main;
        let mut uses = HashMap::new();
        let mut order = Vec::new();
        self.visit_function(main, &mut HashSet::new(), &mut uses, &mut order)?;
        self.atomics = uses
            .values()
            .flat_map(|u: &BodyUses| u.atomics.iter().copied())
            .collect();
        self.compute_captures(&order, &uses);
        let constants = self.used_constants(&uses);
        self.name_functions(&order);
        self.name_globals();

        self.out.push_str("// Compiled by hxc\n");
        write_header(&mut self.out, self.module, self.ctx)?;
        self.out.push_str("#include <metal_stdlib>\n");
        if self.ctx.stage == Stage::Compute {
            self.out.push_str("#include <metal_compute>\n");
        }
        self.out.push_str("using namespace metal;\n\n");

        let structs = self.write_structs(&order, &uses, &constants)?;
        self.write_constants(&constants)?;
        for &function in &order {
            self.write_function(function)?;
        }
        log::debug!(
            "metal: emitted {} function(s), {} struct(s), {} constant(s)",
            order.len(),
            structs,
            constants.len()
        );
        Ok(self.out)
    }

    // -----------------------------------------------------------------------
    // Analysis
    // -----------------------------------------------------------------------

    /// Post-order walk of the call graph: callees before callers.
    fn visit_function(
        &self,
        function: Handle<Function>,
        visiting: &mut HashSet<Handle<Function>>,
        uses: &mut HashMap<Handle<Function>, BodyUses>,
        order: &mut Vec<Handle<Function>>,
    ) -> Result<(), BackendError> {
        if uses.contains_key(&function) {
            return Ok(());
        }
        self.module.functions.check_contains(function, "function")?;
        let f = &self.module.functions[function];
        if !visiting.insert(function) {
            return Err(BackendError::Unsupported(format!(
                "recursive call to '{}'",
                f.name
            )));
        }
        if !f.is_defined() {
            return Err(BackendError::Unsupported(format!(
                "function '{}' is declared but never defined",
                f.name
            )));
        }
        let mut body = BodyUses::default();
        walk_block(self.module, &f.body, &mut body);
        let callees: Vec<_> = body.calls.iter().copied().collect();
        for callee in callees {
            self.visit_function(callee, visiting, uses, order)?;
        }
        visiting.remove(&function);
        uses.insert(function, body);
        order.push(function);
        Ok(())
    }

    fn global_kind(&self, var: Handle<Variable>) -> GlobalKind {
        let v = &self.module.variables[var];
        match v.mode {
            StorageMode::Uniform => GlobalKind::Resource,
            StorageMode::Shared => GlobalKind::Mutable,
            _ if v.read_only && v.init.is_some() => GlobalKind::Constant,
            _ => GlobalKind::Mutable,
        }
    }

    fn compute_captures(&mut self, order: &[Handle<Function>], uses: &HashMap<Handle<Function>, BodyUses>) {
        let module = self.module;
        let position: HashMap<_, _> = module.globals.iter().enumerate().map(|(i, &g)| (g, i)).collect();
        let side_table = self.ctx.layout.side_table.as_ref().map(|t| t.variable);
        for &function in order {
            let Some(body) = uses.get(&function) else {
                continue;
            };
            let mut needed: HashSet<_> = body
                .variables
                .iter()
                .copied()
                .filter(|v| position.contains_key(v) && self.global_kind(*v) != GlobalKind::Constant)
                .collect();
            if let Some(table) = side_table {
                if needed.iter().any(|&v| self.ctx.layout.size_slot(v).is_some()) {
                    needed.insert(table);
                }
            }
            for callee in &body.calls {
                if let Some(captured) = self.captures.get(callee) {
                    needed.extend(captured.iter().copied());
                }
            }
            let mut needed: Vec<_> = needed.into_iter().collect();
            needed.sort_by_key(|v| position[v]);
            self.captures.insert(function, needed);
        }
    }

    /// Program-scope constants referenced by emitted code, in declaration
    /// order, including those their initializers reference.
    fn used_constants(&self, uses: &HashMap<Handle<Function>, BodyUses>) -> Vec<Handle<Variable>> {
        struct Refs(Vec<Handle<Variable>>);
        impl Visitor for Refs {
            fn visit_variable(&mut self, _module: &Module, variable: Handle<Variable>, _role: Role) {
                self.0.push(variable);
            }
        }

        let module = self.module;
        let is_constant = |v: Handle<Variable>| module.is_global(v) && self.global_kind(v) == GlobalKind::Constant;
        let mut found: HashSet<_> = uses
            .values()
            .flat_map(|u| u.variables.iter().copied())
            .filter(|&v| is_constant(v))
            .collect();
        let mut pending: Vec<_> = found.iter().copied().collect();
        while let Some(var) = pending.pop() {
            let Some(init) = module.variables[var].init else {
                continue;
            };
            let mut refs = Refs(Vec::new());
            walk_expression(module, init, Role::Read, &mut refs);
            for v in refs.0 {
                if is_constant(v) && found.insert(v) {
                    pending.push(v);
                }
            }
        }
        module.globals.iter().copied().filter(|g| found.contains(g)).collect()
    }

    fn name_functions(&mut self, order: &[Handle<Function>]) {
        let main = self.ctx.interface.main;
        let mut taken = HashSet::from(["Main".to_string()]);
        for &function in order {
            if function == main {
                self.function_names.insert(function, "Main".to_string());
                continue;
            }
            let base = sanitize(&self.module.functions[function].name);
            let mut candidate = base.clone();
            let mut suffix = 1;
            while !taken.insert(candidate.clone()) {
                candidate = format!("{base}_{suffix}");
                suffix += 1;
            }
            log::trace!("function {function:?} emitted as '{candidate}'");
            self.function_names.insert(function, candidate);
        }
    }

    /// Names every global before any local can claim a name. Samplers that
    /// share a slot share one parameter.
    fn name_globals(&mut self) {
        let module = self.module;
        let mut samplers: HashMap<ResourceSlot, Handle<Variable>> = HashMap::new();
        for &g in &module.globals {
            if let Some(slot @ ResourceSlot::Sampler(_)) = self.ctx.layout.slot(g) {
                if let Some(&first) = samplers.get(&slot) {
                    let name = self.namer.name(module, first, true);
                    self.namer.reserve(g, name);
                    continue;
                }
                samplers.insert(slot, g);
            }
            self.namer.name(module, g, true);
        }
    }

    // -----------------------------------------------------------------------
    // Declarations
    // -----------------------------------------------------------------------

    fn write_structs(
        &mut self,
        order: &[Handle<Function>],
        uses: &HashMap<Handle<Function>, BodyUses>,
        constants: &[Handle<Variable>],
    ) -> Result<usize, BackendError> {
        let module = self.module;
        let mut roots = Vec::new();
        for function in order {
            let f = &module.functions[*function];
            roots.extend(f.parameters.iter().map(|&p| module.variables[p].ty));
            roots.extend(f.result.as_ref().map(|r| r.ty));
            if let Some(body) = uses.get(function) {
                roots.extend(body.types.iter().copied());
            }
        }
        roots.extend(self.ctx.layout.slots().map(|(v, _)| module.variables[v].ty));
        roots.extend(constants.iter().map(|&v| module.variables[v].ty));

        let structs = struct_closure(module, roots);
        for &ty in &structs {
            let TypeInner::Struct { ref members, packed } = module.types[ty].inner else {
                continue;
            };
            let _ = writeln!(self.out, "struct {} {{", crate::types::struct_name(module, ty));
            for member in members {
                let spelled = member_name(module, member.ty, packed)?;
                let _ = write!(self.out, "{INDENT}{spelled} {}", sanitize(&member.name));
                if let Some(binding) = &member.binding {
                    let _ = write!(self.out, " {}", attribute(binding));
                }
                self.out.push_str(";\n");
            }
            self.out.push_str("};\n\n");
        }
        Ok(structs.len())
    }

    fn write_constants(&mut self, constants: &[Handle<Variable>]) -> Result<(), BackendError> {
        let module = self.module;
        for &var in constants {
            let v = &module.variables[var];
            let Some(init) = v.init else {
                continue;
            };
            let ty = type_name(module, v.ty, false)?;
            let name = self.namer.name(module, var, true);
            let _ = write!(self.out, "constant {ty} {name} = ");
            self.write_operand(init)?;
            self.out.push_str(";\n");
        }
        if !constants.is_empty() {
            self.out.push('\n');
        }
        Ok(())
    }

    /// `constant float* pu_h`, `texture2d<float> Tex`, ...
    fn resource_declaration(&mut self, var: Handle<Variable>) -> Result<String, BackendError> {
        let module = self.module;
        let v = &module.variables[var];
        let name = self.namer.name(module, var, true);
        let inner = module.resolver().type_inner(v.ty)?;
        Ok(match ResourceKind::of(inner) {
            ResourceKind::Value => match *inner {
                TypeInner::Array { base, .. } => {
                    format!("constant {}* {name}", type_name(module, base, false)?)
                }
                _ => format!("constant {}& {name}", type_name(module, v.ty, false)?),
            },
            ResourceKind::Texture | ResourceKind::StorageImage | ResourceKind::Sampler => {
                format!("{} {name}", type_name(module, v.ty, false)?)
            }
            ResourceKind::ReadBuffer => {
                format!("const device {}* {name}", type_name(module, v.ty, false)?)
            }
            ResourceKind::WriteBuffer => {
                let atomic = self.atomics.contains(&var);
                format!("device {}* {name}", type_name(module, v.ty, atomic)?)
            }
        })
    }

    fn capture_parameter(&mut self, var: Handle<Variable>) -> Result<String, BackendError> {
        if self.global_kind(var) == GlobalKind::Resource {
            return self.resource_declaration(var);
        }
        let module = self.module;
        let v = &module.variables[var];
        let space = if v.mode == StorageMode::Shared {
            "threadgroup"
        } else {
            "thread"
        };
        let ty = type_name(module, v.ty, self.atomics.contains(&var))?;
        let name = self.namer.name(module, var, true);
        Ok(format!("{space} {ty}& {name}"))
    }

    fn main_parameters(&mut self) -> Result<Vec<String>, BackendError> {
        let module = self.module;
        let main = &module.functions[self.ctx.interface.main];
        let mut params = Vec::new();
        for &p in &main.parameters {
            let v = &module.variables[p];
            let ty = type_name(module, v.ty, false)?;
            let name = self.namer.name(module, p, false);
            match &v.binding {
                Some(binding) => params.push(format!("{ty} {name} {}", attribute(binding))),
                None => params.push(format!("{ty} {name}")),
            }
        }
        let mut bound = HashSet::new();
        let slots: Vec<_> = self.ctx.layout.slots().collect();
        for (var, slot) in slots {
            if !bound.insert(slot) {
                continue;
            }
            let declaration = self.resource_declaration(var)?;
            let attribute = match slot {
                ResourceSlot::Buffer(i) => format!("[[ buffer({i}) ]]"),
                ResourceSlot::Texture(i) => format!("[[ texture({i}) ]]"),
                ResourceSlot::Sampler(i) => format!("[[ sampler({i}) ]]"),
            };
            params.push(format!("{declaration} {attribute}"));
        }
        Ok(params)
    }

    fn helper_parameter(&mut self, var: Handle<Variable>) -> Result<String, BackendError> {
        let module = self.module;
        let v = &module.variables[var];
        let ty = type_name(module, v.ty, false)?;
        let name = self.namer.name(module, var, false);
        Ok(match v.mode {
            StorageMode::Output | StorageMode::InOut => format!("thread {ty}& {name}"),
            _ => format!("{ty} {name}"),
        })
    }

    fn write_function(&mut self, function: Handle<Function>) -> Result<(), BackendError> {
        let module = self.module;
        let f = &module.functions[function];
        let is_main = function == self.ctx.interface.main;
        self.namer.begin_function();

        let result = match &f.result {
            Some(r) => type_name(module, r.ty, false)?,
            None => "void".to_string(),
        };
        let name = self.function_names[&function].clone();
        if is_main {
            let qualifier = match self.ctx.stage {
                Stage::Vertex => "vertex",
                Stage::Pixel => "fragment",
                Stage::Compute => "kernel",
                other => return Err(BackendError::Unsupported(format!("{other} shaders"))),
            };
            let params = self.main_parameters()?;
            let _ = write!(self.out, "{qualifier} {result} {name}(");
            for (i, param) in params.iter().enumerate() {
                let sep = if i == 0 { "\n" } else { ",\n" };
                let _ = write!(self.out, "{sep}{INDENT}{param}");
            }
            self.out.push_str(")\n{\n");
        } else {
            let mut params = Vec::new();
            for &p in &f.parameters {
                params.push(self.helper_parameter(p)?);
            }
            let captured = self.captures.get(&function).cloned().unwrap_or_default();
            for g in captured {
                params.push(self.capture_parameter(g)?);
            }
            let _ = writeln!(self.out, "{result} {name}({})\n{{", params.join(", "));
        }

        self.scope_depth = 1;
        if is_main {
            let captured = self.captures.get(&function).cloned().unwrap_or_default();
            for g in captured {
                if self.global_kind(g) == GlobalKind::Mutable {
                    self.write_declaration(g, true)?;
                }
            }
        }
        self.write_block(&f.body)?;
        self.scope_depth = 0;
        self.out.push_str("}\n\n");
        Ok(())
    }

    fn write_declaration(&mut self, var: Handle<Variable>, global: bool) -> Result<(), BackendError> {
        let module = self.module;
        let v = &module.variables[var];
        let atomic = self.atomics.contains(&var);
        let ty = type_name(module, v.ty, atomic)?;
        let name = self.namer.name(module, var, global);
        self.indent();
        if v.mode == StorageMode::Shared {
            let _ = writeln!(self.out, "threadgroup {ty} {name};");
            return Ok(());
        }
        let _ = write!(self.out, "{ty} {name}");
        if let Some(init) = v.init {
            self.out.push_str(" = ");
            self.write_operand(init)?;
        } else if self.ctx.options.zero_initialize && !atomic {
            let inner = module.resolver().type_inner(v.ty)?;
            if inner.is_numeric() {
                let _ = write!(self.out, " = {}", zero_value(module, inner)?);
            }
        }
        self.out.push_str(";\n");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Statements
    // -----------------------------------------------------------------------

    fn indent(&mut self) {
        for _ in 0..self.scope_depth {
            self.out.push_str(INDENT);
        }
    }

    fn line(&mut self, text: &str) {
        self.indent();
        self.out.push_str(text);
        self.out.push('\n');
    }

    fn write_block(&mut self, block: &[Statement]) -> Result<(), BackendError> {
        for statement in block {
            self.write_statement(statement)?;
        }
        Ok(())
    }

    fn write_nested(&mut self, block: &[Statement]) -> Result<(), BackendError> {
        self.scope_depth += 1;
        let result = self.write_block(block);
        self.scope_depth -= 1;
        result
    }

    fn write_statement(&mut self, statement: &Statement) -> Result<(), BackendError> {
        match *statement {
            Statement::Declare(var) => {
                // Globals are declared at the top of `Main`.
                if !self.module.is_global(var) {
                    self.write_declaration(var, false)?;
                }
            }
            Statement::Assign { target, value } => self.write_guarded(target, |w| {
                w.indent();
                if w.is_atomic_place(target)? {
                    w.out.push_str("atomic_store_explicit(&");
                    w.write_place(target)?;
                    w.out.push_str(", ");
                    w.write_operand(value)?;
                    let _ = writeln!(w.out, ", {RELAXED});");
                } else {
                    w.write_place(target)?;
                    w.out.push_str(" = ");
                    w.write_operand(value)?;
                    w.out.push_str(";\n");
                }
                Ok(())
            })?,
            Statement::Expression(expr) => {
                self.indent();
                self.write_operand(expr)?;
                self.out.push_str(";\n");
            }
            Statement::Call {
                function,
                ref arguments,
                result,
            } => self.write_call(function, arguments, result)?,
            Statement::If {
                condition,
                ref accept,
                ref reject,
            } => {
                self.indent();
                self.out.push_str("if (");
                self.write_operand(condition)?;
                self.out.push_str(") {\n");
                self.write_nested(accept)?;
                if !reject.is_empty() {
                    self.line("} else {");
                    self.write_nested(reject)?;
                }
                self.line("}");
            }
            Statement::Loop {
                ref body,
                ref continuing,
            } => {
                if continuing.is_empty() {
                    self.line("while (true) {");
                    self.write_nested(body)?;
                } else {
                    // `continue` re-enters at the top, which runs the
                    // continuing block on every iteration but the first.
                    let flag = format!("loop_init_{}", self.temp_id);
                    self.temp_id += 1;
                    self.line(&format!("bool {flag} = true;"));
                    self.line("while (true) {");
                    self.scope_depth += 1;
                    self.line(&format!("if (!{flag}) {{"));
                    self.write_nested(continuing)?;
                    self.line("}");
                    self.line(&format!("{flag} = false;"));
                    self.write_block(body)?;
                    self.scope_depth -= 1;
                }
                self.line("}");
            }
            Statement::Break => self.line("break;"),
            Statement::Continue => self.line("continue;"),
            Statement::Return { value: None } => self.line("return;"),
            Statement::Return { value: Some(value) } => {
                self.indent();
                self.out.push_str("return ");
                self.write_operand(value)?;
                self.out.push_str(";\n");
            }
            Statement::Discard => self.line("discard_fragment();"),
            Statement::Atomic {
                target,
                fun,
                value,
                result,
            } => self.write_guarded(target, |w| w.write_atomic(target, fun, value, result))?,
            Statement::ImageStore {
                image,
                coordinate,
                array_index,
                value,
            } => self.write_image_store(image, coordinate, array_index, value)?,
            Statement::Barrier(barrier) => {
                let mut flags = Vec::new();
                if barrier.contains(Barrier::STORAGE) {
                    flags.push("mem_flags::mem_device");
                }
                if barrier.contains(Barrier::WORK_GROUP) {
                    flags.push("mem_flags::mem_threadgroup");
                }
                if barrier.contains(Barrier::TEXTURE) {
                    flags.push("mem_flags::mem_texture");
                }
                if flags.is_empty() {
                    flags.push("mem_flags::mem_none");
                }
                self.line(&format!("threadgroup_barrier({});", flags.join(" | ")));
            }
        }
        Ok(())
    }

    fn write_call(
        &mut self,
        function: Handle<Function>,
        arguments: &[Handle<Expression>],
        result: Option<Handle<Expression>>,
    ) -> Result<(), BackendError> {
        let module = self.module;
        let callee = &module.functions[function];
        let name = self
            .function_names
            .get(&function)
            .cloned()
            .ok_or_else(|| shape(format!("call to '{}' outside the call graph", callee.name)))?;
        self.indent();
        if let Some(result) = result {
            self.write_place(result)?;
            self.out.push_str(" = ");
        }
        let _ = write!(self.out, "{name}(");
        for (i, &argument) in arguments.iter().enumerate() {
            if i > 0 {
                self.out.push_str(", ");
            }
            let by_reference = callee
                .parameters
                .get(i)
                .and_then(|&p| module.variables.try_get(p))
                .is_some_and(|p| matches!(p.mode, StorageMode::Output | StorageMode::InOut));
            if by_reference {
                self.write_place(argument)?;
            } else {
                self.write_operand(argument)?;
            }
        }
        let captured = self.captures.get(&function).cloned().unwrap_or_default();
        for (i, g) in captured.into_iter().enumerate() {
            if i > 0 || !arguments.is_empty() {
                self.out.push_str(", ");
            }
            let name = self.namer.name(module, g, true);
            self.out.push_str(&name);
        }
        self.out.push_str(");\n");
        Ok(())
    }

    fn write_atomic(
        &mut self,
        target: Handle<Expression>,
        fun: AtomicFunction,
        value: Handle<Expression>,
        result: Option<Handle<Expression>>,
    ) -> Result<(), BackendError> {
        let name = match fun {
            AtomicFunction::Add => "atomic_fetch_add_explicit",
            AtomicFunction::Subtract => "atomic_fetch_sub_explicit",
            AtomicFunction::And => "atomic_fetch_and_explicit",
            AtomicFunction::InclusiveOr => "atomic_fetch_or_explicit",
            AtomicFunction::ExclusiveOr => "atomic_fetch_xor_explicit",
            AtomicFunction::Min => "atomic_fetch_min_explicit",
            AtomicFunction::Max => "atomic_fetch_max_explicit",
            AtomicFunction::Exchange { compare: None } => "atomic_exchange_explicit",
            AtomicFunction::Exchange {
                compare: Some(compare),
            } => return self.write_compare_exchange(target, compare, value, result),
        };
        self.indent();
        if let Some(result) = result {
            self.write_place(result)?;
            self.out.push_str(" = ");
        }
        let _ = write!(self.out, "{name}(&");
        self.write_place(target)?;
        self.out.push_str(", ");
        self.write_operand(value)?;
        let _ = writeln!(self.out, ", {RELAXED});");
        Ok(())
    }

    /// A strong compare-exchange from the weak one: retry while the failure
    /// was spurious.
    fn write_compare_exchange(
        &mut self,
        target: Handle<Expression>,
        compare: Handle<Expression>,
        value: Handle<Expression>,
        result: Option<Handle<Expression>>,
    ) -> Result<(), BackendError> {
        let ty = inner_name(self.module, &self.module.resolver().resolve(compare)?, false)?;
        let expected = format!("expected_{}", self.temp_id);
        self.temp_id += 1;
        self.line("{");
        self.scope_depth += 1;
        self.indent();
        let _ = write!(self.out, "{ty} {expected} = ");
        self.write_operand(compare)?;
        self.out.push_str(";\n");
        self.indent();
        self.out.push_str("while (!atomic_compare_exchange_weak_explicit(&");
        self.write_place(target)?;
        let _ = write!(self.out, ", &{expected}, ");
        self.write_operand(value)?;
        let _ = write!(self.out, ", {RELAXED}, {RELAXED}) && {expected} == ");
        self.write_operand(compare)?;
        self.out.push_str(") {\n");
        self.line("}");
        if let Some(result) = result {
            self.indent();
            self.write_place(result)?;
            let _ = writeln!(self.out, " = {expected};");
        }
        self.scope_depth -= 1;
        self.line("}");
        Ok(())
    }

    fn write_image_store(
        &mut self,
        image: Handle<Expression>,
        coordinate: Handle<Expression>,
        array_index: Option<Handle<Expression>>,
        value: Handle<Expression>,
    ) -> Result<(), BackendError> {
        let texel = self.module.resolver().resolve(value)?;
        self.indent();
        self.write_place(image)?;
        self.out.push_str(".write(");
        // Texture writes always take four components.
        match texel {
            TypeInner::Scalar(scalar) => {
                let _ = write!(self.out, "{scalar}4(");
                self.write_operand(value)?;
                self.out.push(')');
            }
            TypeInner::Vector { size, scalar } if size != VectorSize::Quad => {
                let _ = write!(self.out, "{scalar}4(");
                self.write_operand(value)?;
                let padding = if size == VectorSize::Bi { ", 0, 0" } else { ", 0" };
                let _ = write!(self.out, "{padding})");
            }
            _ => self.write_operand(value)?,
        }
        self.out.push_str(", ");
        self.write_operand(coordinate)?;
        if let Some(index) = array_index {
            self.out.push_str(", ");
            self.write_array_index(index)?;
        }
        self.out.push_str(");\n");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Bounds checks and atomics
    // -----------------------------------------------------------------------

    /// Side-table slot of `base` when it names a checked buffer.
    fn checked_buffer(&self, base: Handle<Expression>) -> Option<u32> {
        let Expression::Variable(var) = *self.module.expressions.try_get(base)? else {
            return None;
        };
        let v = self.module.variables.try_get(var)?;
        match self.module.types.try_get(v.ty)?.inner {
            TypeInner::Buffer { .. } => self.ctx.layout.size_slot(var),
            _ => None,
        }
    }

    /// The checked buffer access inside the place `expr`, if any.
    fn bounds_guard(&self, mut expr: Handle<Expression>) -> Option<Bound> {
        loop {
            match *self.module.expressions.try_get(expr)? {
                Expression::Access { base, index } => {
                    if let Some(slot) = self.checked_buffer(base) {
                        return Some(Bound {
                            index: Index::Dynamic(index),
                            slot,
                        });
                    }
                    expr = base;
                }
                Expression::AccessIndex { base, index } => {
                    if let Some(slot) = self.checked_buffer(base) {
                        return Some(Bound {
                            index: Index::Constant(index),
                            slot,
                        });
                    }
                    expr = base;
                }
                Expression::Swizzle { vector, .. } => expr = vector,
                _ => return None,
            }
        }
    }

    fn write_bound_test(&mut self, bound: Bound) -> Result<(), BackendError> {
        match bound.index {
            Index::Dynamic(index) => {
                self.out.push_str("uint(");
                self.write_operand(index)?;
                self.out.push(')');
            }
            Index::Constant(index) => {
                let _ = write!(self.out, "{index}u");
            }
        }
        let table = self
            .ctx
            .layout
            .side_table
            .as_ref()
            .map(|t| t.variable)
            .ok_or_else(|| shape("bounds check without a side table".into()))?;
        let sizes = self.namer.name(self.module, table, true);
        let _ = write!(self.out, " < {sizes}[{}]", bound.slot);
        Ok(())
    }

    /// Runs `body` under an `if` when `place` writes into a checked buffer.
    fn write_guarded(
        &mut self,
        place: Handle<Expression>,
        body: impl FnOnce(&mut Self) -> Result<(), BackendError>,
    ) -> Result<(), BackendError> {
        let Some(bound) = self.bounds_guard(place) else {
            return body(self);
        };
        self.indent();
        self.out.push_str("if (");
        self.write_bound_test(bound)?;
        self.out.push_str(") {\n");
        self.scope_depth += 1;
        body(self)?;
        self.scope_depth -= 1;
        self.line("}");
        Ok(())
    }

    fn is_atomic_place(&self, expr: Handle<Expression>) -> Result<bool, BackendError> {
        let atomic = self
            .module
            .root_variable(expr)
            .is_some_and(|v| self.atomics.contains(&v));
        if !atomic {
            return Ok(false);
        }
        Ok(matches!(
            self.module.resolver().resolve(expr)?,
            TypeInner::Scalar(s) if s.is_integer()
        ))
    }

    // -----------------------------------------------------------------------
    // Expressions
    // -----------------------------------------------------------------------

    /// Writes `expr` in a position that needs no parentheses: an argument,
    /// an index, a right-hand side.
    fn write_operand(&mut self, expr: Handle<Expression>) -> Result<(), BackendError> {
        let depth = std::mem::replace(&mut self.expression_depth, 0);
        let result = self.write_expr(expr);
        self.expression_depth = depth;
        result
    }

    /// Writes `expr` as an operand of an operator.
    fn write_expr(&mut self, expr: Handle<Expression>) -> Result<(), BackendError> {
        self.expression_depth += 1;
        let result = self.write_expr_inner(expr);
        self.expression_depth -= 1;
        result
    }

    fn write_place(&mut self, expr: Handle<Expression>) -> Result<(), BackendError> {
        self.write_access(expr, false)
    }

    fn write_expr_inner(&mut self, handle: Handle<Expression>) -> Result<(), BackendError> {
        let module = self.module;
        module.expressions.check_contains(handle, "expression")?;
        let nested = self.expression_depth > 1;
        match module.expressions[handle] {
            Expression::Literal(value) => self.out.push_str(&literal(value)),
            Expression::Compose { ty, ref components } => {
                let spelled = type_name(module, ty, false)?;
                let (open, close) = match module.resolver().type_inner(ty)? {
                    TypeInner::Struct { .. } | TypeInner::Array { .. } => ('{', '}'),
                    _ => ('(', ')'),
                };
                self.out.push_str(&spelled);
                self.out.push(open);
                self.write_list(components)?;
                self.out.push(close);
            }
            Expression::ZeroValue(ty) => self.out.push_str(&zero_of(module, ty)?),
            Expression::Variable(_)
            | Expression::Access { .. }
            | Expression::AccessIndex { .. }
            | Expression::Swizzle { .. } => self.write_access(handle, true)?,
            Expression::Unary { op, expr } => {
                self.out.push_str(ops::unary(op));
                // `- -x` must not become `--x`.
                if matches!(
                    module.expressions.try_get(expr),
                    Some(Expression::Unary { .. } | Expression::Literal(_))
                ) {
                    self.out.push('(');
                    self.write_operand(expr)?;
                    self.out.push(')');
                } else {
                    self.write_expr(expr)?;
                }
            }
            Expression::Binary { op, left, right } => {
                let resolver = module.resolver();
                let operands = hxc_ir::combine(&resolver.resolve(left)?, &resolver.resolve(right)?);
                match ops::binary(op, &operands) {
                    BinaryForm::Infix(symbol) => {
                        if nested {
                            self.out.push('(');
                        }
                        self.write_expr(left)?;
                        let _ = write!(self.out, " {symbol} ");
                        self.write_expr(right)?;
                        if nested {
                            self.out.push(')');
                        }
                    }
                    BinaryForm::Call(name) => {
                        let _ = write!(self.out, "{name}(");
                        self.write_list(&[left, right])?;
                        self.out.push(')');
                    }
                    BinaryForm::Reduce(name, symbol) => {
                        let _ = write!(self.out, "{name}(");
                        self.write_expr(left)?;
                        let _ = write!(self.out, " {symbol} ");
                        self.write_expr(right)?;
                        self.out.push(')');
                    }
                    BinaryForm::VectorLogic(symbol) => {
                        let n = match operands {
                            TypeInner::Vector { size, .. } => size.len(),
                            _ => 1,
                        };
                        let _ = write!(self.out, "bool{n}(uint{n}(");
                        self.write_operand(left)?;
                        let _ = write!(self.out, ") {symbol} uint{n}(");
                        self.write_operand(right)?;
                        self.out.push_str("))");
                    }
                }
            }
            Expression::Select {
                condition,
                accept,
                reject,
            } => {
                if let TypeInner::Vector { .. } = module.resolver().resolve(condition)? {
                    self.out.push_str("select(");
                    self.write_list(&[reject, accept, condition])?;
                    self.out.push(')');
                } else {
                    if nested {
                        self.out.push('(');
                    }
                    self.write_expr(condition)?;
                    self.out.push_str(" ? ");
                    self.write_expr(accept)?;
                    self.out.push_str(" : ");
                    self.write_expr(reject)?;
                    if nested {
                        self.out.push(')');
                    }
                }
            }
            Expression::Math {
                fun,
                arg,
                arg1,
                arg2,
                arg3,
            } => {
                let args: Vec<_> = std::iter::once(arg).chain([arg1, arg2, arg3].into_iter().flatten()).collect();
                self.write_math(fun, &args)?;
            }
            Expression::As { expr, kind, width } => {
                let source = module.resolver().resolve(expr)?;
                let target = source
                    .with_scalar(Scalar { kind, width })
                    .ok_or_else(|| shape(format!("conversion of non-numeric [{}]", expr.index())))?;
                let _ = write!(self.out, "{}(", inner_name(module, &target, false)?);
                self.write_operand(expr)?;
                self.out.push(')');
            }
            Expression::ImageSample {
                image,
                sampler,
                coordinate,
                array_index,
                offset,
                level,
                depth_ref,
                gather,
            } => {
                let TypeInner::Image { dim, .. } = module.resolver().resolve(image)? else {
                    return Err(shape(format!("sampling non-image [{}]", image.index())));
                };
                self.write_place(image)?;
                let method = match (gather, depth_ref) {
                    (Some(_), Some(_)) => "gather_compare",
                    (Some(_), None) => "gather",
                    (None, Some(_)) => "sample_compare",
                    (None, None) => "sample",
                };
                let _ = write!(self.out, ".{method}(");
                self.write_list(&[sampler, coordinate])?;
                if let Some(index) = array_index {
                    self.out.push_str(", ");
                    self.write_array_index(index)?;
                }
                if let Some(reference) = depth_ref {
                    self.out.push_str(", ");
                    self.write_operand(reference)?;
                }
                if gather.is_none() {
                    self.write_sample_level(level, dim)?;
                }
                if let Some(offset) = offset {
                    self.out.push_str(", ");
                    self.write_operand(offset)?;
                }
                if let Some(component) = gather.filter(|&c| c != SwizzleComponent::X) {
                    if depth_ref.is_none() {
                        if offset.is_none() {
                            self.out.push_str(", int2(0)");
                        }
                        let _ = write!(self.out, ", component::{}", component.letter());
                    }
                }
                self.out.push(')');
            }
            Expression::ImageLoad {
                image,
                coordinate,
                array_index,
                level,
            } => {
                let TypeInner::Image { class, .. } = module.resolver().resolve(image)? else {
                    return Err(shape(format!("loading from non-image [{}]", image.index())));
                };
                // Depth reads are scalar; the IR always loads four components.
                let depth = matches!(class, ImageClass::Depth { .. });
                if depth {
                    self.out.push_str("float4(");
                }
                self.write_place(image)?;
                self.out.push_str(".read(");
                self.write_operand(coordinate)?;
                if let Some(index) = array_index {
                    self.out.push_str(", ");
                    self.write_array_index(index)?;
                }
                if let Some(level) = level {
                    self.out.push_str(", uint(");
                    self.write_operand(level)?;
                    self.out.push(')');
                }
                self.out.push(')');
                if depth {
                    self.out.push(')');
                }
            }
            Expression::ImageQuery { image, query } => self.write_image_query(image, query)?,
        }
        Ok(())
    }

    fn write_list(&mut self, items: &[Handle<Expression>]) -> Result<(), BackendError> {
        for (i, &item) in items.iter().enumerate() {
            if i > 0 {
                self.out.push_str(", ");
            }
            self.write_operand(item)?;
        }
        Ok(())
    }

    /// Writes a place (or, with `read`, the value it holds).
    fn write_access(&mut self, handle: Handle<Expression>, read: bool) -> Result<(), BackendError> {
        let module = self.module;
        if read && self.is_atomic_place(handle)? {
            self.out.push_str("atomic_load_explicit(&");
            self.write_access(handle, false)?;
            let _ = write!(self.out, ", {RELAXED})");
            return Ok(());
        }
        match module.expressions[handle] {
            Expression::Variable(var) => {
                let name = self.namer.name(module, var, module.is_global(var));
                self.out.push_str(&name);
            }
            Expression::Access { base, index } => self.write_element(base, Index::Dynamic(index), read)?,
            Expression::AccessIndex { base, index } => match module.resolver().resolve(base)? {
                TypeInner::Struct { ref members, .. } => {
                    let member = members.get(index as usize).ok_or_else(|| {
                        BackendError::Internal(IrError::InvalidAccess {
                            base: format!("struct [{}]", base.index()),
                            index,
                        })
                    })?;
                    self.write_access(base, read)?;
                    let _ = write!(self.out, ".{}", sanitize(&member.name));
                }
                TypeInner::Vector { .. } => {
                    let component = SwizzleComponent::ALL.get(index as usize).ok_or_else(|| {
                        BackendError::Internal(IrError::InvalidAccess {
                            base: format!("vector [{}]", base.index()),
                            index,
                        })
                    })?;
                    self.write_access(base, read)?;
                    let _ = write!(self.out, ".{}", component.letter());
                }
                _ => self.write_element(base, Index::Constant(index), read)?,
            },
            Expression::Swizzle {
                size,
                vector,
                pattern,
            } => {
                let letters: String = pattern[..size.len() as usize].iter().map(|c| c.letter()).collect();
                match module.resolver().resolve(vector)? {
                    // Scalars have no swizzles; `x.xxx` is a splat.
                    TypeInner::Scalar(scalar) => {
                        let _ = write!(self.out, "{scalar}{}(", size.len());
                        self.write_operand(vector)?;
                        self.out.push(')');
                    }
                    _ => {
                        self.write_access(vector, read)?;
                        let _ = write!(self.out, ".{letters}");
                    }
                }
            }
            // A computed base, e.g. `(a + b).x`.
            _ => {
                let depth = std::mem::replace(&mut self.expression_depth, 1);
                let result = self.write_expr(handle);
                self.expression_depth = depth;
                result?;
            }
        }
        Ok(())
    }

    fn write_element(&mut self, base: Handle<Expression>, index: Index, read: bool) -> Result<(), BackendError> {
        let checked = if read { self.checked_buffer(base) } else { None };
        if let Some(slot) = checked {
            let element = match self.module.expressions[base] {
                Expression::Variable(var) => match self.module.types[self.module.variables[var].ty].inner {
                    TypeInner::Buffer { base, .. } => Some(base),
                    _ => None,
                },
                _ => None,
            }
            .ok_or_else(|| shape("checked access into a non-buffer".into()))?;
            self.out.push('(');
            self.write_bound_test(Bound { index, slot })?;
            self.out.push_str(" ? ");
            self.write_access(base, false)?;
            self.write_index(index)?;
            let _ = write!(self.out, " : {})", zero_of(self.module, element)?);
            return Ok(());
        }
        self.write_access(base, read)?;
        self.write_index(index)
    }

    fn write_index(&mut self, index: Index) -> Result<(), BackendError> {
        match index {
            Index::Dynamic(index) => {
                self.out.push('[');
                self.write_operand(index)?;
                self.out.push(']');
            }
            Index::Constant(index) => {
                let _ = write!(self.out, "[{index}]");
            }
        }
        Ok(())
    }

    /// Array slices are unsigned; float slices round to nearest.
    fn write_array_index(&mut self, index: Handle<Expression>) -> Result<(), BackendError> {
        let scalar = self.module.resolver().resolve_scalar(index)?;
        match scalar.kind {
            ScalarKind::Uint => self.write_operand(index),
            ScalarKind::Float => {
                self.out.push_str("uint(rint(");
                self.write_operand(index)?;
                self.out.push_str("))");
                Ok(())
            }
            _ => {
                self.out.push_str("uint(");
                self.write_operand(index)?;
                self.out.push(')');
                Ok(())
            }
        }
    }

    fn write_sample_level(&mut self, level: SampleLevel, dim: ImageDim) -> Result<(), BackendError> {
        match level {
            SampleLevel::Auto => {}
            SampleLevel::Zero => self.out.push_str(", level(0)"),
            SampleLevel::Exact(lod) => {
                self.out.push_str(", level(");
                self.write_operand(lod)?;
                self.out.push(')');
            }
            SampleLevel::Bias(bias) => {
                self.out.push_str(", bias(");
                self.write_operand(bias)?;
                self.out.push(')');
            }
            SampleLevel::Gradient { x, y } => {
                let gradient = match dim {
                    ImageDim::D2 => "gradient2d",
                    ImageDim::D3 => "gradient3d",
                    ImageDim::Cube => "gradientcube",
                    ImageDim::D1 => {
                        return Err(BackendError::Unsupported(
                            "explicit gradients on 1D textures".into(),
                        ))
                    }
                };
                let _ = write!(self.out, ", {gradient}(");
                self.write_list(&[x, y])?;
                self.out.push(')');
            }
        }
        Ok(())
    }

    fn write_image_query(&mut self, image: Handle<Expression>, query: ImageQuery) -> Result<(), BackendError> {
        let TypeInner::Image {
            dim,
            arrayed,
            class,
            ..
        } = self.module.resolver().resolve(image)?
        else {
            return Err(shape(format!("querying non-image [{}]", image.index())));
        };
        let level = match query {
            ImageQuery::NumLevels => {
                self.write_place(image)?;
                self.out.push_str(".get_num_mip_levels()");
                return Ok(());
            }
            ImageQuery::Size { level } => level,
        };
        let mipmapped = matches!(
            class,
            ImageClass::Sampled {
                multisampled: false
            } | ImageClass::Depth {
                multisampled: false
            }
        ) && dim != ImageDim::D1;
        let mut methods = vec!["get_width"];
        match dim {
            ImageDim::D1 => {}
            ImageDim::D2 | ImageDim::Cube => methods.push("get_height"),
            ImageDim::D3 => methods.extend(["get_height", "get_depth"]),
        }
        let count = methods.len() + usize::from(arrayed);
        if count > 1 {
            let _ = write!(self.out, "uint{count}(");
        }
        for (i, method) in methods.into_iter().enumerate() {
            if i > 0 {
                self.out.push_str(", ");
            }
            self.write_place(image)?;
            let _ = write!(self.out, ".{method}(");
            if let Some(level) = level.filter(|_| mipmapped) {
                self.out.push_str("uint(");
                self.write_operand(level)?;
                self.out.push(')');
            }
            self.out.push(')');
        }
        if arrayed {
            self.out.push_str(", ");
            self.write_place(image)?;
            self.out.push_str(".get_array_size()");
        }
        if count > 1 {
            self.out.push(')');
        }
        Ok(())
    }

    fn write_math(&mut self, fun: hxc_ir::MathFunction, args: &[Handle<Expression>]) -> Result<(), BackendError> {
        let module = self.module;
        let first = module.resolver().resolve(args[0])?;
        let scalar = first
            .scalar()
            .ok_or_else(|| shape(format!("{fun:?} of a non-numeric value")))?;
        match ops::math(fun, scalar) {
            MathForm::Call(name) => {
                let _ = write!(self.out, "{name}(");
                self.write_list(args)?;
                self.out.push(')');
            }
            MathForm::Reciprocal => {
                let _ = write!(self.out, "({}(1.0) / ", inner_name(module, &first, false)?);
                self.expression_depth += 1;
                let result = self.write_expr(args[0]);
                self.expression_depth -= 1;
                result?;
                self.out.push(')');
            }
            MathForm::Bitcast(kind) => {
                let target = first
                    .with_scalar(Scalar { kind, width: 4 })
                    .ok_or_else(|| shape(format!("bitcast of [{}]", args[0].index())))?;
                let _ = write!(self.out, "as_type<{}>(", inner_name(module, &target, false)?);
                self.write_operand(args[0])?;
                self.out.push(')');
            }
            MathForm::FindMsb => {
                let _ = write!(self.out, "({}(31) - clz(", inner_name(module, &first, false)?);
                self.write_operand(args[0])?;
                self.out.push_str("))");
            }
            MathForm::Truth(name) => match first {
                TypeInner::Vector { size, scalar } => {
                    let _ = write!(self.out, "{name}(");
                    if scalar.kind == ScalarKind::Bool {
                        self.write_operand(args[0])?;
                    } else {
                        let _ = write!(self.out, "bool{}(", size.len());
                        self.write_operand(args[0])?;
                        self.out.push(')');
                    }
                    self.out.push(')');
                }
                _ => {
                    self.out.push_str("bool(");
                    self.write_operand(args[0])?;
                    self.out.push(')');
                }
            },
            MathForm::InsertBits => {
                let &[width, offset, insert, base] = args else {
                    return Err(shape(format!("{fun:?} takes four arguments, got {}", args.len())));
                };
                self.out.push_str("insert_bits(");
                self.write_list(&[base, insert, offset, width])?;
                self.out.push(')');
            }
        }
        Ok(())
    }
}
