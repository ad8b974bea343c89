//! Structural traversal of the IR.
//!
//! Three traversal shapes cover every pass:
//!
//! - [`Visitor`] with [`walk_module`] and friends: read-only, recursing into
//!   children by default.
//! - [`ExpressionRewriter`] with [`rewrite_module`]: pre-order visits that may
//!   replace an expression in its parent slot.
//! - [`splice_block`]: visits that insert statements immediately before or
//!   after the statement being visited, or remove it.

use std::collections::HashMap;

use crate::arena::{Arena, Handle, UniqueArena};
use crate::expr::Expression;
use crate::func::Function;
use crate::stmt::{AtomicFunction, Block, Statement};
use crate::typifier::TypeResolver;
use crate::types::Type;
use crate::var::{StorageMode, Variable};
use crate::Module;

/// How an expression slot is used by its parent.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum Role {
    Read,
    Write,
    /// `inout` arguments and atomic targets.
    ReadWrite,
}

impl Role {
    pub fn is_read(self) -> bool {
        matches!(self, Self::Read | Self::ReadWrite)
    }

    pub fn is_write(self) -> bool {
        matches!(self, Self::Write | Self::ReadWrite)
    }
}

/// Roles of the operands of `expr`, aligned with
/// [`Expression::operands`]. The base of a dereference chain inherits the
/// parent's role; indices and everything else are reads.
pub fn operand_roles(expr: &Expression, role: Role) -> Vec<Role> {
    match expr {
        Expression::Access { .. } => vec![role, Role::Read],
        Expression::AccessIndex { .. } | Expression::Swizzle { .. } => vec![role],
        _ => {
            let mut count = 0;
            expr.for_each_operand(|_| count += 1);
            vec![Role::Read; count]
        }
    }
}

fn parameter_role(mode: StorageMode) -> Role {
    match mode {
        StorageMode::Output => Role::Write,
        StorageMode::InOut => Role::ReadWrite,
        _ => Role::Read,
    }
}

/// Per-callee argument roles, derived from parameter storage modes.
#[derive(Debug, Default)]
pub struct CallRoles {
    roles: HashMap<Handle<Function>, Vec<Role>>,
}

impl CallRoles {
    pub fn new(functions: &Arena<Function>, variables: &Arena<Variable>) -> Self {
        let roles = functions
            .iter()
            .map(|(h, f)| {
                let roles = f
                    .parameters
                    .iter()
                    .map(|&p| {
                        variables
                            .try_get(p)
                            .map_or(Role::Read, |v| parameter_role(v.mode))
                    })
                    .collect();
                (h, roles)
            })
            .collect();
        Self { roles }
    }

    /// Role of argument `index` of a call to `function`.
    pub fn argument(&self, function: Handle<Function>, index: usize) -> Role {
        self.roles
            .get(&function)
            .and_then(|r| r.get(index))
            .copied()
            .unwrap_or(Role::Read)
    }
}

// ---------------------------------------------------------------------------
// Read-only visits
// ---------------------------------------------------------------------------

/// A read-only IR visitor. Every method recurses into children by default.
pub trait Visitor {
    /// Called before a statement's operands and nested blocks. Return
    /// `false` to skip them.
    fn visit_statement(&mut self, _module: &Module, _statement: &Statement) -> bool {
        true
    }

    /// Called before an expression's operands. Return `false` to skip them.
    fn visit_expression(
        &mut self,
        _module: &Module,
        _handle: Handle<Expression>,
        _role: Role,
    ) -> bool {
        true
    }

    /// Called for every dereferenced variable.
    fn visit_variable(&mut self, _module: &Module, _variable: Handle<Variable>, _role: Role) {}
}

/// Walks global initializers and global-scope statements, then every
/// function body.
pub fn walk_module<V: Visitor + ?Sized>(module: &Module, visitor: &mut V) {
    walk_initializers(module, visitor);
    walk_block(module, &module.global_body, visitor);
    for (_, function) in module.functions.iter() {
        walk_block(module, &function.body, visitor);
    }
}

/// Walks the initializer of every global that has one, in declaration order.
pub fn walk_initializers<V: Visitor + ?Sized>(module: &Module, visitor: &mut V) {
    for &global in &module.globals {
        if let Some(init) = module.variables[global].init {
            walk_expression(module, init, Role::Read, visitor);
        }
    }
}

/// Walks the body of one function.
pub fn walk_function<V: Visitor + ?Sized>(
    module: &Module,
    function: Handle<Function>,
    visitor: &mut V,
) {
    walk_block(module, &module.functions[function].body, visitor);
}

pub fn walk_block<V: Visitor + ?Sized>(module: &Module, block: &[Statement], visitor: &mut V) {
    for statement in block {
        walk_statement(module, statement, visitor);
    }
}

pub fn walk_statement<V: Visitor + ?Sized>(
    module: &Module,
    statement: &Statement,
    visitor: &mut V,
) {
    if !visitor.visit_statement(module, statement) {
        return;
    }
    match *statement {
        Statement::Declare(var) => {
            if let Some(init) = module.variables[var].init {
                walk_expression(module, init, Role::Read, visitor);
            }
        }
        Statement::Assign { target, value } => {
            walk_expression(module, value, Role::Read, visitor);
            walk_expression(module, target, Role::Write, visitor);
        }
        Statement::Expression(expr) => walk_expression(module, expr, Role::Read, visitor),
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
                let role = params
                    .get(i)
                    .and_then(|&p| module.variables.try_get(p))
                    .map_or(Role::Read, |v| parameter_role(v.mode));
                walk_expression(module, arg, role, visitor);
            }
            if let Some(result) = result {
                walk_expression(module, result, Role::Write, visitor);
            }
        }
        Statement::If {
            condition,
            ref accept,
            ref reject,
        } => {
            walk_expression(module, condition, Role::Read, visitor);
            walk_block(module, accept, visitor);
            walk_block(module, reject, visitor);
        }
        Statement::Loop {
            ref body,
            ref continuing,
        } => {
            walk_block(module, body, visitor);
            walk_block(module, continuing, visitor);
        }
        Statement::Return { value } => {
            if let Some(value) = value {
                walk_expression(module, value, Role::Read, visitor);
            }
        }
        Statement::Atomic {
            target,
            fun,
            value,
            result,
        } => {
            walk_expression(module, value, Role::Read, visitor);
            if let AtomicFunction::Exchange { compare: Some(c) } = fun {
                walk_expression(module, c, Role::Read, visitor);
            }
            walk_expression(module, target, Role::ReadWrite, visitor);
            if let Some(result) = result {
                walk_expression(module, result, Role::Write, visitor);
            }
        }
        Statement::ImageStore {
            image,
            coordinate,
            array_index,
            value,
        } => {
            walk_expression(module, coordinate, Role::Read, visitor);
            if let Some(index) = array_index {
                walk_expression(module, index, Role::Read, visitor);
            }
            walk_expression(module, value, Role::Read, visitor);
            walk_expression(module, image, Role::Write, visitor);
        }
        Statement::Break | Statement::Continue | Statement::Discard | Statement::Barrier(_) => {}
    }
}

pub fn walk_expression<V: Visitor + ?Sized>(
    module: &Module,
    handle: Handle<Expression>,
    role: Role,
    visitor: &mut V,
) {
    if !visitor.visit_expression(module, handle, role) {
        return;
    }
    let Some(expr) = module.expressions.try_get(handle) else {
        return;
    };
    if let Expression::Variable(var) = *expr {
        visitor.visit_variable(module, var, role);
        return;
    }
    let roles = operand_roles(expr, role);
    for (operand, operand_role) in expr.operands().into_iter().zip(roles) {
        walk_expression(module, operand, operand_role, visitor);
    }
}

// ---------------------------------------------------------------------------
// Rvalue rewriting
// ---------------------------------------------------------------------------

/// What a rewriter can see and extend while rewriting.
pub struct RewriteContext<'a> {
    pub expressions: &'a mut Arena<Expression>,
    pub types: &'a UniqueArena<Type>,
    pub variables: &'a Arena<Variable>,
}

impl RewriteContext<'_> {
    /// A type resolver over the current expression arena.
    pub fn resolver(&self) -> TypeResolver<'_> {
        TypeResolver::new(self.types, self.variables, self.expressions)
    }
}

/// A pre-order expression rewriter.
pub trait ExpressionRewriter {
    /// Returns a replacement for `handle`, or `None` to keep the node and
    /// descend into its operands. Replacements are not revisited.
    fn rewrite(
        &mut self,
        ctx: &mut RewriteContext<'_>,
        handle: Handle<Expression>,
        role: Role,
    ) -> Option<Handle<Expression>>;
}

/// Rewrites every expression slot reachable from global initializers,
/// global-scope statements and function bodies. Returns `true` if any slot
/// changed.
///
/// Nodes whose operands change are copied rather than mutated, so a shared
/// node keeps its meaning for parents that are not rewritten. Replacements
/// are memoized per `(node, role)` for the whole walk.
pub fn rewrite_module<R: ExpressionRewriter + ?Sized>(module: &mut Module, rewriter: &mut R) -> bool {
    let mut body = std::mem::take(&mut module.global_body);
    let mut bodies: Vec<Block> = module
        .functions
        .iter_mut()
        .map(|(_, f)| std::mem::take(&mut f.body))
        .collect();
    let globals = module.globals.clone();
    let changed = with_walk(module, rewriter, |walk| {
        for &global in &globals {
            walk.initializer(global);
        }
        walk.block(&mut body);
        for b in bodies.iter_mut() {
            walk.block(b);
        }
    });
    module.global_body = body;
    for ((_, f), b) in module.functions.iter_mut().zip(bodies) {
        f.body = b;
    }
    changed
}

/// Rewrites the expression slots of a single function body.
pub fn rewrite_function<R: ExpressionRewriter + ?Sized>(
    module: &mut Module,
    function: Handle<Function>,
    rewriter: &mut R,
) -> bool {
    let mut body = std::mem::take(&mut module.functions[function].body);
    let changed = rewrite_detached_block(module, &mut body, rewriter);
    module.functions[function].body = body;
    changed
}

/// Rewrites statements that have been taken out of `module`, e.g. with
/// `std::mem::take` on a function body, so the caller can keep mutable
/// access to both.
pub fn rewrite_detached_block<R: ExpressionRewriter + ?Sized>(
    module: &mut Module,
    block: &mut [Statement],
    rewriter: &mut R,
) -> bool {
    with_walk(module, rewriter, |walk| walk.block(block))
}

fn with_walk<R: ExpressionRewriter + ?Sized>(
    module: &mut Module,
    rewriter: &mut R,
    f: impl FnOnce(&mut RewriteWalk<'_, '_, R>),
) -> bool {
    let roles = CallRoles::new(&module.functions, &module.variables);
    let mut ctx = RewriteContext {
        expressions: &mut module.expressions,
        types: &module.types,
        variables: &module.variables,
    };
    let mut walk = RewriteWalk {
        ctx: &mut ctx,
        roles: &roles,
        rewriter,
        memo: HashMap::new(),
        inits: Vec::new(),
        changed: false,
    };
    f(&mut walk);
    let RewriteWalk { inits, changed, .. } = walk;
    for (var, init) in inits {
        module.variables[var].init = Some(init);
    }
    changed
}

struct RewriteWalk<'c, 'a, R: ?Sized> {
    ctx: &'c mut RewriteContext<'a>,
    roles: &'c CallRoles,
    rewriter: &'c mut R,
    memo: HashMap<(Handle<Expression>, Role), Handle<Expression>>,
    /// Initializers that changed; written back once the variable arena is
    /// no longer borrowed.
    inits: Vec<(Handle<Variable>, Handle<Expression>)>,
    changed: bool,
}

impl<R: ExpressionRewriter + ?Sized> RewriteWalk<'_, '_, R> {
    fn block(&mut self, block: &mut [Statement]) {
        for statement in block.iter_mut() {
            self.statement(statement);
        }
    }

    fn slot(&mut self, slot: &mut Handle<Expression>, role: Role) {
        *slot = self.expression(*slot, role);
    }

    fn initializer(&mut self, var: Handle<Variable>) {
        let Some(init) = self.ctx.variables[var].init else {
            return;
        };
        let rewritten = self.expression(init, Role::Read);
        if rewritten != init {
            self.inits.push((var, rewritten));
        }
    }

    fn statement(&mut self, statement: &mut Statement) {
        match statement {
            Statement::Declare(var) => self.initializer(*var),
            Statement::Break
            | Statement::Continue
            | Statement::Discard
            | Statement::Barrier(_) => {}
            Statement::Assign { target, value } => {
                self.slot(value, Role::Read);
                self.slot(target, Role::Write);
            }
            Statement::Expression(expr) => self.slot(expr, Role::Read),
            Statement::Call {
                function,
                arguments,
                result,
            } => {
                let function = *function;
                for (i, arg) in arguments.iter_mut().enumerate() {
                    let role = self.roles.argument(function, i);
                    self.slot(arg, role);
                }
                if let Some(result) = result {
                    self.slot(result, Role::Write);
                }
            }
            Statement::If {
                condition,
                accept,
                reject,
            } => {
                self.slot(condition, Role::Read);
                self.block(accept);
                self.block(reject);
            }
            Statement::Loop { body, continuing } => {
                self.block(body);
                self.block(continuing);
            }
            Statement::Return { value } => {
                if let Some(value) = value {
                    self.slot(value, Role::Read);
                }
            }
            Statement::Atomic {
                target,
                fun,
                value,
                result,
            } => {
                self.slot(value, Role::Read);
                if let AtomicFunction::Exchange { compare: Some(c) } = fun {
                    self.slot(c, Role::Read);
                }
                self.slot(target, Role::ReadWrite);
                if let Some(result) = result {
                    self.slot(result, Role::Write);
                }
            }
            Statement::ImageStore {
                image,
                coordinate,
                array_index,
                value,
            } => {
                self.slot(coordinate, Role::Read);
                if let Some(index) = array_index {
                    self.slot(index, Role::Read);
                }
                self.slot(value, Role::Read);
                self.slot(image, Role::Write);
            }
        }
    }

    fn expression(&mut self, handle: Handle<Expression>, role: Role) -> Handle<Expression> {
        if let Some(&done) = self.memo.get(&(handle, role)) {
            return done;
        }
        let result = match self.rewriter.rewrite(self.ctx, handle, role) {
            Some(replacement) => {
                self.changed = true;
                replacement
            }
            None => {
                let mut expr = self.ctx.expressions[handle].clone();
                let roles = operand_roles(&expr, role);
                let mut modified = false;
                for (operand, operand_role) in expr.operands_mut().into_iter().zip(roles) {
                    let new = self.expression(*operand, operand_role);
                    if new != *operand {
                        *operand = new;
                        modified = true;
                    }
                }
                if modified {
                    self.ctx.expressions.append(expr)
                } else {
                    handle
                }
            }
        };
        self.memo.insert((handle, role), result);
        result
    }
}

// ---------------------------------------------------------------------------
// Statement splicing
// ---------------------------------------------------------------------------

/// Statements to insert around, or instead of, a visited statement.
#[derive(Debug, Default)]
pub struct Splice {
    pub before: Vec<Statement>,
    pub after: Vec<Statement>,
    pub remove: bool,
}

impl Splice {
    /// Leave the statement alone.
    pub fn keep() -> Self {
        Self::default()
    }

    /// Drop the statement.
    pub fn remove() -> Self {
        Self {
            remove: true,
            ..Self::default()
        }
    }

    fn is_noop(&self) -> bool {
        self.before.is_empty() && self.after.is_empty() && !self.remove
    }
}

/// Visits every statement of `block` (outer statements before their nested
/// blocks) and applies the returned [`Splice`]. Inserted statements are not
/// visited. Returns `true` if the block changed.
pub fn splice_block(block: &mut Block, f: &mut dyn FnMut(&mut Statement) -> Splice) -> bool {
    let old = std::mem::take(block);
    block.reserve(old.len());
    let mut changed = false;
    for mut statement in old {
        let splice = f(&mut statement);
        changed |= !splice.is_noop();
        block.extend(splice.before);
        if !splice.remove {
            for nested in statement.blocks_mut() {
                changed |= splice_block(nested, f);
            }
            block.push(statement);
        }
        block.extend(splice.after);
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BinaryOp, Literal, Scalar, TypeInner};

    fn float_module() -> (Module, Handle<Variable>, Handle<Variable>) {
        let mut module = Module::default();
        let f32_ty = module.add_type(TypeInner::Scalar(Scalar::F32));
        let a = module.add_global(Variable::new("a", f32_ty, StorageMode::Uniform));
        let b = module.add_global(Variable::new("b", f32_ty, StorageMode::Auto));
        (module, a, b)
    }

    #[derive(Default)]
    struct Uses {
        reads: Vec<Handle<Variable>>,
        writes: Vec<Handle<Variable>>,
    }

    impl Visitor for Uses {
        fn visit_variable(&mut self, _: &Module, variable: Handle<Variable>, role: Role) {
            if role.is_read() {
                self.reads.push(variable);
            }
            if role.is_write() {
                self.writes.push(variable);
            }
        }
    }

    #[test]
    fn visitor_distinguishes_reads_and_writes() {
        let (mut module, a, b) = float_module();
        let load_a = module.add_expression(Expression::Variable(a));
        let target_b = module.add_expression(Expression::Variable(b));
        let mut f = Function::new("main");
        f.body.push(Statement::Assign {
            target: target_b,
            value: load_a,
        });
        module.add_function(f);

        let mut uses = Uses::default();
        walk_module(&module, &mut uses);
        assert_eq!(uses.reads, vec![a]);
        assert_eq!(uses.writes, vec![b]);
    }

    #[test]
    fn access_index_on_lvalue_stays_write() {
        let mut module = Module::default();
        let f32_ty = module.add_type(TypeInner::Scalar(Scalar::F32));
        let arr = module.add_type(TypeInner::Array {
            base: f32_ty,
            size: 4,
        });
        let v = module.add_global(Variable::new("arr", arr, StorageMode::Auto));
        let i = module.add_global(Variable::new("i", f32_ty, StorageMode::Auto));
        let base = module.add_expression(Expression::Variable(v));
        let index = module.add_expression(Expression::Variable(i));
        let elem = module.add_expression(Expression::Access { base, index });
        let one = module.add_expression(Expression::Literal(Literal::F32(1.0)));
        module.global_body.push(Statement::Assign {
            target: elem,
            value: one,
        });

        let mut uses = Uses::default();
        walk_module(&module, &mut uses);
        assert_eq!(uses.writes, vec![v]);
        assert_eq!(uses.reads, vec![i]);
    }

    struct ReplaceVariable {
        from: Handle<Variable>,
        to: Handle<Expression>,
    }

    impl ExpressionRewriter for ReplaceVariable {
        fn rewrite(
            &mut self,
            ctx: &mut RewriteContext<'_>,
            handle: Handle<Expression>,
            role: Role,
        ) -> Option<Handle<Expression>> {
            match ctx.expressions[handle] {
                Expression::Variable(v) if v == self.from && role == Role::Read => Some(self.to),
                _ => None,
            }
        }
    }

    #[test]
    fn rewriter_replaces_nested_slot_and_copies_parent() {
        let (mut module, a, b) = float_module();
        let load_a = module.add_expression(Expression::Variable(a));
        let sum = module.add_expression(Expression::Binary {
            op: BinaryOp::Add,
            left: load_a,
            right: load_a,
        });
        let target = module.add_expression(Expression::Variable(b));
        module.global_body.push(Statement::Assign { target, value: sum });
        let two = module.add_expression(Expression::Literal(Literal::F32(2.0)));

        let changed = rewrite_module(&mut module, &mut ReplaceVariable { from: a, to: two });
        assert!(changed);
        let Statement::Assign { value, .. } = module.global_body[0] else {
            panic!("expected assignment");
        };
        assert_ne!(value, sum, "parent must be copied, not mutated");
        assert_eq!(
            module.expressions[value],
            Expression::Binary {
                op: BinaryOp::Add,
                left: two,
                right: two
            }
        );
        // The original node is untouched.
        assert_eq!(module.expressions[sum].operands(), vec![load_a, load_a]);
    }

    #[test]
    fn initializers_are_walked_and_rewritten() {
        let (mut module, a, b) = float_module();
        let f32_ty = module.variables[a].ty;
        let global_init = module.add_expression(Expression::Variable(a));
        module.variables[b].init = Some(global_init);
        let local = module.add_variable(Variable::new("local", f32_ty, StorageMode::Auto));
        let local_init = module.add_expression(Expression::Variable(a));
        module.variables[local].init = Some(local_init);
        let mut f = Function::new("main");
        f.body.push(Statement::Declare(local));
        module.add_function(f);

        let mut uses = Uses::default();
        walk_module(&module, &mut uses);
        assert_eq!(uses.reads, vec![a, a]);

        let two = module.add_expression(Expression::Literal(Literal::F32(2.0)));
        assert!(rewrite_module(&mut module, &mut ReplaceVariable { from: a, to: two }));
        assert_eq!(module.variables[b].init, Some(two));
        assert_eq!(module.variables[local].init, Some(two));
    }

    #[test]
    fn rewriter_without_match_reports_no_change() {
        let (mut module, a, b) = float_module();
        let load_b = module.add_expression(Expression::Variable(b));
        module.global_body.push(Statement::Expression(load_b));
        let two = module.add_expression(Expression::Literal(Literal::F32(2.0)));
        assert!(!rewrite_module(
            &mut module,
            &mut ReplaceVariable { from: a, to: two }
        ));
    }

    #[test]
    fn splice_inserts_before_and_after_nested() {
        let mut block = vec![
            Statement::Break,
            Statement::If {
                condition: Handle::new(0),
                accept: vec![Statement::Discard],
                reject: Vec::new(),
            },
        ];
        let changed = splice_block(&mut block, &mut |s| match s {
            Statement::Discard => Splice {
                before: vec![Statement::Continue],
                after: vec![Statement::Break],
                remove: false,
            },
            Statement::Break => Splice::remove(),
            _ => Splice::keep(),
        });
        assert!(changed);
        assert_eq!(block.len(), 1);
        let Statement::If { accept, .. } = &block[0] else {
            panic!("expected if");
        };
        assert_eq!(
            accept,
            &vec![Statement::Continue, Statement::Discard, Statement::Break]
        );
    }
}
