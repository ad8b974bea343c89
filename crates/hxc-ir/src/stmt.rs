//! Statements and blocks.

use std::ops::BitOr;

use crate::arena::Handle;
use crate::expr::Expression;
use crate::func::Function;
use crate::var::Variable;

/// Memory barrier scope, as a bit set.
#[derive(Clone, Copy, Debug, Default, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Barrier(u8);

impl Barrier {
    pub const STORAGE: Self = Self(0x1);
    pub const WORK_GROUP: Self = Self(0x2);
    pub const TEXTURE: Self = Self(0x4);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for Barrier {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Read-modify-write atomic operations.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum AtomicFunction {
    Add,
    Subtract,
    And,
    InclusiveOr,
    ExclusiveOr,
    Min,
    Max,
    Exchange { compare: Option<Handle<Expression>> },
}

/// An ordered statement sequence.
pub type Block = Vec<Statement>;

/// A statement node.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Statement {
    /// Declares a local variable, initialized from its constant `init`.
    Declare(Handle<Variable>),
    Assign {
        target: Handle<Expression>,
        value: Handle<Expression>,
    },
    /// Evaluates an expression for its side effects.
    Expression(Handle<Expression>),
    Call {
        function: Handle<Function>,
        arguments: Vec<Handle<Expression>>,
        /// Lvalue receiving the return value.
        result: Option<Handle<Expression>>,
    },
    If {
        condition: Handle<Expression>,
        accept: Block,
        reject: Block,
    },
    /// Runs `body` then `continuing` forever; exits only through `Break`
    /// or `Return`. `Continue` jumps to `continuing`.
    Loop {
        body: Block,
        continuing: Block,
    },
    Break,
    Continue,
    Return {
        value: Option<Handle<Expression>>,
    },
    Discard,
    Atomic {
        target: Handle<Expression>,
        fun: AtomicFunction,
        value: Handle<Expression>,
        /// Lvalue receiving the original value.
        result: Option<Handle<Expression>>,
    },
    ImageStore {
        image: Handle<Expression>,
        coordinate: Handle<Expression>,
        array_index: Option<Handle<Expression>>,
        value: Handle<Expression>,
    },
    Barrier(Barrier),
}

impl Statement {
    /// Nested blocks, in source order.
    pub fn blocks(&self) -> Vec<&Block> {
        match self {
            Self::If { accept, reject, .. } => vec![accept, reject],
            Self::Loop { body, continuing } => vec![body, continuing],
            _ => Vec::new(),
        }
    }

    pub fn blocks_mut(&mut self) -> Vec<&mut Block> {
        match self {
            Self::If { accept, reject, .. } => vec![accept, reject],
            Self::Loop { body, continuing } => vec![body, continuing],
            _ => Vec::new(),
        }
    }

    /// Root expressions consumed directly by this statement, excluding
    /// nested blocks.
    pub fn expressions(&self) -> Vec<Handle<Expression>> {
        match *self {
            Self::Declare(_)
            | Self::Break
            | Self::Continue
            | Self::Discard
            | Self::Barrier(_)
            | Self::Loop { .. } => Vec::new(),
            Self::Assign { target, value } => vec![target, value],
            Self::Expression(e) => vec![e],
            Self::Call {
                ref arguments,
                result,
                ..
            } => arguments.iter().copied().chain(result).collect(),
            Self::If { condition, .. } => vec![condition],
            Self::Return { value } => value.into_iter().collect(),
            Self::Atomic {
                target,
                fun,
                value,
                result,
            } => {
                let mut v = vec![target, value];
                if let AtomicFunction::Exchange { compare: Some(c) } = fun {
                    v.push(c);
                }
                v.extend(result);
                v
            }
            Self::ImageStore {
                image,
                coordinate,
                array_index,
                value,
            } => {
                let mut v = vec![image, coordinate];
                v.extend(array_index);
                v.push(value);
                v
            }
        }
    }

    /// Mutable references to the slots returned by [`Statement::expressions`],
    /// in the same order.
    pub fn expressions_mut(&mut self) -> Vec<&mut Handle<Expression>> {
        match self {
            Self::Declare(_)
            | Self::Break
            | Self::Continue
            | Self::Discard
            | Self::Barrier(_)
            | Self::Loop { .. } => Vec::new(),
            Self::Assign { target, value } => vec![target, value],
            Self::Expression(e) => vec![e],
            Self::Call {
                arguments, result, ..
            } => arguments.iter_mut().chain(result.as_mut()).collect(),
            Self::If { condition, .. } => vec![condition],
            Self::Return { value } => value.as_mut().into_iter().collect(),
            Self::Atomic {
                target,
                fun,
                value,
                result,
            } => {
                let mut v = vec![target, value];
                if let AtomicFunction::Exchange { compare: Some(c) } = fun {
                    v.push(c);
                }
                v.extend(result.as_mut());
                v
            }
            Self::ImageStore {
                image,
                coordinate,
                array_index,
                value,
            } => {
                let mut v = vec![image, coordinate];
                v.extend(array_index.as_mut());
                v.push(value);
                v
            }
        }
    }

    /// `true` for statements that end a block's control flow.
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Self::Break | Self::Continue | Self::Return { .. } | Self::Discard
        )
    }
}
