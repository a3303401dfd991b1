use thiserror::Error;

use crate::expression::NodeId;
use crate::number::{Number, NumberKind};

/// Failures of tree construction, tree mutation and evaluation.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExpressionError {
    #[error("no value yet")]
    NoValueYet,
    #[error("a group has no value of its own")]
    GroupHasNoValue,
    #[error("multiple values for the same variable {name}: {registered} != {provided}")]
    ConflictingVariableValue {
        name: String,
        registered: Number,
        provided: Number,
    },
    #[error("left side of an assignment must be a variable")]
    InvalidAssignmentTarget,
    #[error("parent can't be contained in its own child")]
    CyclicParent,
    #[error("invalid parent: {0}")]
    InvalidParent(&'static str),
    #[error("unsupported numeric kind: expected {expected}, found {found}")]
    UnsupportedNumericKind {
        expected: NumberKind,
        found: NumberKind,
    },
    #[error("integer division by zero")]
    DivisionByZero,
    #[error("null value: use clear_value to remove a variable's value")]
    NullValue,
    #[error("node {0} no longer exists")]
    StaleNode(NodeId),
    #[error("node {0} is not a binary expression")]
    NotBinary(NodeId),
    #[error("node {0} is not a group")]
    NotGroup(NodeId),
}

/// Failures of [`ExpressionParser`](crate::ExpressionParser).
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    #[error("missing operand")]
    MissingOperand,
    #[error("unbalanced parentheses")]
    UnbalancedParentheses,
    #[error("malformed assignment: {0}")]
    MalformedAssignment(String),
    #[error("invalid {kind} literal: {literal}")]
    InvalidLiteral { literal: String, kind: NumberKind },
    #[error("syntax error: {0}")]
    Syntax(String),
    #[error("null input")]
    NullArgument,
    #[error(transparent)]
    Expression(#[from] ExpressionError),
}

/// Failures of [`ExpressionsModel`](crate::ExpressionsModel) operations.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Expression(#[from] ExpressionError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("expression not found in model")]
    NotFound,
    #[error("unsupported number kind: {0}")]
    UnsupportedNumberKind(String),
    #[error("null argument")]
    NullArgument,
}
