//! hxc intermediate representation.
//!
//! An arena-based shader IR: interned types, variables with storage modes
//! and semantics, expression DAGs, and statement blocks grouped into
//! functions. All nodes of one compilation live in a single [`Module`].

pub mod arena;
mod diag;
mod display;
mod error;
mod expr;
mod func;
pub mod names;
mod stmt;
mod typifier;
mod types;
mod var;
pub mod visit;

pub use arena::{Arena, Handle, UniqueArena};
pub use diag::{Diagnostic, DiagnosticLevel, DiagnosticLog};
pub use display::{dump_module, format_expr, format_type, format_type_inner};
pub use error::IrError;
pub use expr::{
    BinaryOp, Expression, ImageQuery, Literal, MathFunction, SampleLevel, SwizzleComponent,
    UnaryOp,
};
pub use func::{Function, FunctionFlags, FunctionResult, Stage};
pub use stmt::{AtomicFunction, Barrier, Block, Statement};
pub use typifier::{combine, TypeResolver};
pub use types::{
    ImageClass, ImageDim, Scalar, ScalarKind, StructMember, Type, TypeInner, VectorSize,
};
pub use var::{Binding, BuiltIn, StorageAccess, StorageMode, UniformBlock, Variable};

/// One compilation's worth of IR.
#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Module {
    /// Deduplicated type arena.
    pub types: UniqueArena<Type>,
    /// Every variable: globals, parameters and locals.
    pub variables: Arena<Variable>,
    /// Every expression of every function and of global scope.
    pub expressions: Arena<Expression>,
    pub functions: Arena<Function>,
    /// Program-scope variables, in declaration order.
    pub globals: Vec<Handle<Variable>>,
    /// Statements that appear outside any function body.
    pub global_body: Block,
    #[cfg_attr(feature = "serde", serde(default))]
    pub uniform_blocks: Vec<UniformBlock>,
}

impl Module {
    /// Interns an anonymous type.
    pub fn add_type(&mut self, inner: TypeInner) -> Handle<Type> {
        self.types.insert(Type::anonymous(inner))
    }

    /// Interns a named type.
    pub fn add_named_type(&mut self, name: impl Into<String>, inner: TypeInner) -> Handle<Type> {
        self.types.insert(Type {
            name: Some(name.into()),
            inner,
        })
    }

    pub fn add_expression(&mut self, expr: Expression) -> Handle<Expression> {
        self.expressions.append(expr)
    }

    /// Adds a variable without declaring it at program scope.
    pub fn add_variable(&mut self, var: Variable) -> Handle<Variable> {
        self.variables.append(var)
    }

    /// Adds a program-scope variable.
    pub fn add_global(&mut self, var: Variable) -> Handle<Variable> {
        let handle = self.variables.append(var);
        self.globals.push(handle);
        handle
    }

    pub fn add_function(&mut self, function: Function) -> Handle<Function> {
        self.functions.append(function)
    }

    pub fn is_global(&self, var: Handle<Variable>) -> bool {
        self.globals.contains(&var)
    }

    /// Index of the uniform block declaring `var`.
    pub fn uniform_block_of(&self, var: Handle<Variable>) -> Option<usize> {
        self.uniform_blocks
            .iter()
            .position(|b| b.members.contains(&var))
    }

    /// Every function flagged as entry point.
    pub fn entry_points(&self) -> Vec<Handle<Function>> {
        self.functions
            .iter()
            .filter(|(_, f)| f.is_entry_point())
            .map(|(h, _)| h)
            .collect()
    }

    /// The single entry point.
    pub fn entry_point(&self) -> Result<Handle<Function>, IrError> {
        match self.entry_points().as_slice() {
            [one] => Ok(*one),
            many => Err(IrError::EntryPointCount(many.len())),
        }
    }

    /// `entry` followed by every function it calls directly or transitively,
    /// in discovery order. Calls to handles outside the arena are ignored.
    pub fn reachable_from(&self, entry: Handle<Function>) -> Vec<Handle<Function>> {
        let mut seen = std::collections::HashSet::from([entry]);
        let mut order = vec![entry];
        let mut stack = vec![entry];
        let mut callees = Vec::new();
        while let Some(f) = stack.pop() {
            callees.clear();
            collect_calls(&self.functions[f].body, &mut callees);
            for &callee in &callees {
                if self.functions.try_get(callee).is_some() && seen.insert(callee) {
                    order.push(callee);
                    stack.push(callee);
                }
            }
        }
        order
    }

    /// The variable at the root of a dereference chain, e.g. `tex` in
    /// `tex[i]` or `s` in `s.field.xy`.
    pub fn root_variable(&self, mut expr: Handle<Expression>) -> Option<Handle<Variable>> {
        loop {
            match *self.expressions.try_get(expr)? {
                Expression::Variable(v) => return Some(v),
                Expression::Access { base, .. } | Expression::AccessIndex { base, .. } => {
                    expr = base
                }
                Expression::Swizzle { vector, .. } => expr = vector,
                _ => return None,
            }
        }
    }

    /// A type resolver over this module.
    pub fn resolver(&self) -> TypeResolver<'_> {
        TypeResolver::new(&self.types, &self.variables, &self.expressions)
    }
}

fn collect_calls(block: &[Statement], out: &mut Vec<Handle<Function>>) {
    for statement in block {
        if let Statement::Call { function, .. } = *statement {
            out.push(function);
        }
        for nested in statement.blocks() {
            collect_calls(nested, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn types_are_interned() {
        let mut module = Module::default();
        let a = module.add_type(TypeInner::Scalar(Scalar::F32));
        let b = module.add_type(TypeInner::Scalar(Scalar::F32));
        let c = module.add_named_type("Light", TypeInner::Scalar(Scalar::F32));
        assert_eq!(a, b);
        assert_ne!(a, c, "named types are distinct from anonymous ones");
    }

    #[test]
    fn entry_point_requires_exactly_one() {
        let mut module = Module::default();
        assert_eq!(module.entry_point(), Err(IrError::EntryPointCount(0)));
        let mut f = Function::new("Main");
        f.flags.insert(FunctionFlags::ENTRY_POINT);
        let h = module.add_function(f.clone());
        assert_eq!(module.entry_point(), Ok(h));
        module.add_function(f);
        assert_eq!(module.entry_point(), Err(IrError::EntryPointCount(2)));
    }

    #[test]
    fn reachable_from_follows_nested_calls_only() {
        let mut module = Module::default();
        let leaf = module.add_function(Function::new("Leaf"));
        let unused = module.add_function(Function::new("Unused"));
        let mut helper = Function::new("Helper");
        helper.body.push(Statement::Loop {
            body: vec![Statement::Call {
                function: leaf,
                arguments: Vec::new(),
                result: None,
            }],
            continuing: Vec::new(),
        });
        let helper = module.add_function(helper);
        let mut main = Function::new("Main");
        main.body.push(Statement::Call {
            function: helper,
            arguments: Vec::new(),
            result: None,
        });
        let main = module.add_function(main);

        let reachable = module.reachable_from(main);
        assert_eq!(reachable, vec![main, helper, leaf]);
        assert!(!reachable.contains(&unused));
    }

    #[test]
    fn root_variable_walks_dereferences() {
        let mut module = Module::default();
        let f4 = module.add_type(TypeInner::Vector {
            size: VectorSize::Quad,
            scalar: Scalar::F32,
        });
        let arr = module.add_type(TypeInner::Array { base: f4, size: 2 });
        let v = module.add_global(Variable::new("colors", arr, StorageMode::Uniform));
        let base = module.add_expression(Expression::Variable(v));
        let elem = module.add_expression(Expression::AccessIndex { base, index: 1 });
        let swz = module.add_expression(Expression::Swizzle {
            size: VectorSize::Bi,
            vector: elem,
            pattern: [SwizzleComponent::X, SwizzleComponent::Y, SwizzleComponent::X, SwizzleComponent::X],
        });
        let lit = module.add_expression(Expression::Literal(Literal::I32(0)));
        assert_eq!(module.root_variable(swz), Some(v));
        assert_eq!(module.root_variable(lit), None);
    }
}
