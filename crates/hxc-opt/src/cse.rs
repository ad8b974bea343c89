//! Local common subexpression elimination.
//!
//! Within each straight-line block, a pure expression subtree that occurs in
//! two or more places while its inputs stay unchanged is computed once into a
//! fresh temporary declared just before the first use. Larger subtrees win
//! over the subtrees they contain.

use std::cmp::Reverse;
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::hash::{Hash, Hasher};

use hxc_ir::{
    AtomicFunction, Block, Expression, Handle, IrError, Module, Statement, StorageMode, TypeInner,
    Variable,
};

use crate::Pass;

/// Common subexpression elimination over straight-line blocks.
#[derive(Debug)]
pub struct CommonSubexprElimination;

impl Pass for CommonSubexprElimination {
    fn name(&self) -> &str {
        "cse"
    }

    fn run(&self, module: &mut Module) -> Result<bool, IrError> {
        let mut body = std::mem::take(&mut module.global_body);
        let result = run_on_block(module, &mut body);
        module.global_body = body;
        let mut changed = result?;

        let functions: Vec<_> = module.functions.handles().collect();
        for function in functions {
            let mut body = std::mem::take(&mut module.functions[function].body);
            let result = run_on_block(module, &mut body);
            module.functions[function].body = body;
            changed |= result?;
        }
        Ok(changed)
    }
}

fn run_on_block(module: &mut Module, block: &mut Block) -> Result<bool, IrError> {
    let mut changed = false;
    while let Some(group) = best_group(module, block) {
        materialize(module, block, group)?;
        changed = true;
    }
    for statement in block.iter_mut() {
        for nested in statement.blocks_mut() {
            changed |= run_on_block(module, nested)?;
        }
    }
    Ok(changed)
}

/// Equivalent occurrences of one expression while its inputs are live.
#[derive(Debug)]
struct Group {
    hash: u64,
    repr: Handle<Expression>,
    size: usize,
    reads: HashSet<Handle<Variable>>,
    has_image_op: bool,
    /// `(statement index, node)` pairs.
    occurrences: Vec<(usize, Handle<Expression>)>,
}

struct Scanner<'a> {
    module: &'a Module,
    placeholder: Handle<Expression>,
    hashes: HashMap<Handle<Expression>, u64>,
    live: Vec<Group>,
    finished: Vec<Group>,
}

fn best_group(module: &Module, block: &Block) -> Option<Group> {
    let placeholder = module.expressions.handles().next()?;
    let mut scanner = Scanner {
        module,
        placeholder,
        hashes: HashMap::new(),
        live: Vec::new(),
        finished: Vec::new(),
    };
    for (index, statement) in block.iter().enumerate() {
        for root in read_roots(module, statement) {
            scanner.scan(index, root);
        }
        scanner.kill(statement);
    }
    let Scanner {
        mut finished, live, ..
    } = scanner;
    finished.extend(live);
    finished
        .into_iter()
        .filter(|g| g.occurrences.len() >= 2)
        .max_by_key(|g| (g.size, Reverse(g.occurrences[0].0)))
}

/// Expressions evaluated for their value by `statement`, excluding nested
/// blocks. Write targets contribute only their index operands.
fn read_roots(module: &Module, statement: &Statement) -> Vec<Handle<Expression>> {
    let mut roots = Vec::new();
    match *statement {
        Statement::Assign { target, value } => {
            roots.push(value);
            lvalue_indices(module, target, &mut roots);
        }
        Statement::Expression(e) => roots.push(e),
        Statement::Call {
            function,
            ref arguments,
            result,
        } => {
            let params = module
                .functions
                .try_get(function)
                .map(|f| f.parameters.as_slice())
                .unwrap_or_default();
            for (i, &arg) in arguments.iter().enumerate() {
                let by_value = params.get(i).map_or(true, |&p| {
                    !matches!(
                        module.variables[p].mode,
                        StorageMode::Output | StorageMode::InOut
                    )
                });
                if by_value {
                    roots.push(arg);
                } else {
                    lvalue_indices(module, arg, &mut roots);
                }
            }
            if let Some(result) = result {
                lvalue_indices(module, result, &mut roots);
            }
        }
        Statement::If { condition, .. } => roots.push(condition),
        Statement::Return { value } => roots.extend(value),
        Statement::Atomic {
            target,
            fun,
            value,
            result,
        } => {
            roots.push(value);
            if let AtomicFunction::Exchange { compare: Some(c) } = fun {
                roots.push(c);
            }
            lvalue_indices(module, target, &mut roots);
            if let Some(result) = result {
                lvalue_indices(module, result, &mut roots);
            }
        }
        Statement::ImageStore {
            coordinate,
            array_index,
            value,
            ..
        } => {
            roots.push(coordinate);
            roots.extend(array_index);
            roots.push(value);
        }
        Statement::Declare(_)
        | Statement::Loop { .. }
        | Statement::Break
        | Statement::Continue
        | Statement::Discard
        | Statement::Barrier(_) => {}
    }
    roots
}

fn lvalue_indices(module: &Module, mut target: Handle<Expression>, out: &mut Vec<Handle<Expression>>) {
    loop {
        match module.expressions.try_get(target) {
            Some(&Expression::Access { base, index }) => {
                out.push(index);
                target = base;
            }
            Some(&Expression::AccessIndex { base, .. }) => target = base,
            Some(&Expression::Swizzle { vector, .. }) => target = vector,
            _ => return,
        }
    }
}

fn is_candidate(expr: &Expression) -> bool {
    matches!(
        expr,
        Expression::Unary { .. }
            | Expression::Binary { .. }
            | Expression::Select { .. }
            | Expression::Math { .. }
            | Expression::As { .. }
            | Expression::ImageSample { .. }
            | Expression::ImageLoad { .. }
            | Expression::ImageQuery { .. }
    )
}

impl Scanner<'_> {
    fn scan(&mut self, statement: usize, handle: Handle<Expression>) {
        let module = self.module;
        let Some(expr) = module.expressions.try_get(handle) else {
            return;
        };
        for operand in expr.operands() {
            self.scan(statement, operand);
        }
        if !is_candidate(expr) {
            return;
        }
        let numeric = matches!(
            module.resolver().resolve(handle),
            Ok(TypeInner::Scalar(_) | TypeInner::Vector { .. } | TypeInner::Matrix { .. })
        );
        if !numeric {
            return;
        }

        let hash = structural_hash(module, handle, self.placeholder, &mut self.hashes);
        if let Some(group) = self
            .live
            .iter_mut()
            .find(|g| g.hash == hash && structurally_equal(module, g.repr, handle))
        {
            group.occurrences.push((statement, handle));
            return;
        }

        let mut group = Group {
            hash,
            repr: handle,
            size: 0,
            reads: HashSet::new(),
            has_image_op: false,
            occurrences: vec![(statement, handle)],
        };
        summarize(module, handle, &mut group);
        self.live.push(group);
    }

    fn kill(&mut self, statement: &Statement) {
        let module = self.module;
        let root = |h| module.root_variable(h);
        match *statement {
            Statement::Declare(var) => self.kill_readers(Some(var)),
            Statement::Assign { target, .. } => self.kill_readers(root(target)),
            Statement::Atomic { target, result, .. } => {
                self.kill_readers(root(target));
                if let Some(result) = result {
                    self.kill_readers(root(result));
                }
            }
            Statement::ImageStore { image, .. } => {
                let image = root(image);
                self.kill_where(|g| g.has_image_op || image.map_or(true, |v| g.reads.contains(&v)));
            }
            Statement::Expression(_) => {}
            Statement::Call { .. }
            | Statement::If { .. }
            | Statement::Loop { .. }
            | Statement::Barrier(_)
            | Statement::Return { .. }
            | Statement::Break
            | Statement::Continue
            | Statement::Discard => self.kill_where(|_| true),
        }
    }

    /// Ends the groups that read `var`, or all of them when the written
    /// variable is unknown.
    fn kill_readers(&mut self, var: Option<Handle<Variable>>) {
        match var {
            Some(var) => self.kill_where(|g| g.reads.contains(&var)),
            None => self.kill_where(|_| true),
        }
    }

    fn kill_where(&mut self, pred: impl Fn(&Group) -> bool) {
        let (dead, live): (Vec<_>, Vec<_>) = std::mem::take(&mut self.live)
            .into_iter()
            .partition(|g| pred(g));
        self.live = live;
        self.finished.extend(dead);
    }
}

fn summarize(module: &Module, handle: Handle<Expression>, group: &mut Group) {
    let Some(expr) = module.expressions.try_get(handle) else {
        return;
    };
    group.size += 1;
    group.has_image_op |= expr.is_image_op();
    if let Expression::Variable(var) = *expr {
        group.reads.insert(var);
    }
    for operand in expr.operands() {
        summarize(module, operand, group);
    }
}

/// Hash of the canonical structure of a subtree: each node's fields with
/// operands replaced by a fixed placeholder, followed by the operands' hashes.
fn structural_hash(
    module: &Module,
    handle: Handle<Expression>,
    placeholder: Handle<Expression>,
    memo: &mut HashMap<Handle<Expression>, u64>,
) -> u64 {
    if let Some(&hash) = memo.get(&handle) {
        return hash;
    }
    let mut hasher = DefaultHasher::new();
    if let Some(expr) = module.expressions.try_get(handle) {
        let mut shape = expr.clone();
        for slot in shape.operands_mut() {
            *slot = placeholder;
        }
        shape.hash(&mut hasher);
        for operand in expr.operands() {
            structural_hash(module, operand, placeholder, memo).hash(&mut hasher);
        }
    }
    let hash = hasher.finish();
    memo.insert(handle, hash);
    hash
}

/// Deep structural comparison, used to confirm hash matches.
fn structurally_equal(module: &Module, a: Handle<Expression>, b: Handle<Expression>) -> bool {
    if a == b {
        return true;
    }
    let (Some(ea), Some(eb)) = (module.expressions.try_get(a), module.expressions.try_get(b))
    else {
        return false;
    };
    let b_operands = eb.operands();
    let mut probe = ea.clone();
    let slots = probe.operands_mut();
    if slots.len() != b_operands.len() {
        return false;
    }
    for (slot, &operand) in slots.into_iter().zip(&b_operands) {
        *slot = operand;
    }
    probe == *eb
        && ea
            .operands()
            .into_iter()
            .zip(b_operands)
            .all(|(x, y)| structurally_equal(module, x, y))
}

fn materialize(module: &mut Module, block: &mut Block, group: Group) -> Result<(), IrError> {
    let inner = module.resolver().resolve(group.repr)?;
    let ty = module.add_type(inner);
    let temp = module.add_variable(Variable::temporary(ty));
    let load = module.add_expression(Expression::Variable(temp));
    let target = module.add_expression(Expression::Variable(temp));
    log::trace!(
        "cse: {} occurrences of {} into a temporary",
        group.occurrences.len(),
        hxc_ir::format_expr(module, group.repr)
    );

    let nodes: HashSet<_> = group.occurrences.iter().map(|&(_, h)| h).collect();
    let statements: BTreeSet<_> = group.occurrences.iter().map(|&(s, _)| s).collect();
    for &index in &statements {
        let mut memo = HashMap::new();
        for slot in block[index].expressions_mut() {
            *slot = replace(module, *slot, &nodes, load, &mut memo);
        }
    }

    let first = group.occurrences[0].0;
    block.splice(
        first..first,
        [
            Statement::Declare(temp),
            Statement::Assign {
                target,
                value: group.repr,
            },
        ],
    );
    Ok(())
}

fn replace(
    module: &mut Module,
    handle: Handle<Expression>,
    nodes: &HashSet<Handle<Expression>>,
    with: Handle<Expression>,
    memo: &mut HashMap<Handle<Expression>, Handle<Expression>>,
) -> Handle<Expression> {
    if nodes.contains(&handle) {
        return with;
    }
    if let Some(&done) = memo.get(&handle) {
        return done;
    }
    let mut expr = module.expressions[handle].clone();
    let mut modified = false;
    for slot in expr.operands_mut() {
        let new = replace(module, *slot, nodes, with, memo);
        if new != *slot {
            *slot = new;
            modified = true;
        }
    }
    let result = if modified {
        module.add_expression(expr)
    } else {
        handle
    };
    memo.insert(handle, result);
    result
}
