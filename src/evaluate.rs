use crate::error::ExpressionError;
use crate::expression::{BinaryRule, ExpressionArena, Node, NodeId};
use crate::number::Number;

impl ExpressionArena {
    /// Whether [`Self::value`] can produce a value for `node`.
    ///
    /// Constants always have one, variables when their registry entry does,
    /// binaries when both operands do. A group has a value when all of its
    /// children do, even though the group itself never yields a number.
    pub fn has_value(&self, node: NodeId) -> bool {
        let Ok(current) = self.node(node) else {
            return false;
        };
        match current {
            Node::Constant(_) => true,
            Node::Variable(name) => self.registry().get(name).is_some(),
            Node::Binary {
                rule: BinaryRule::Assignment,
                left,
                right,
            } => left.is_some() && right.is_some_and(|right| self.has_value(right)),
            Node::Binary { left, right, .. } => {
                left.is_some_and(|left| self.has_value(left))
                    && right.is_some_and(|right| self.has_value(right))
            }
            Node::Group(children) => children.iter().all(|child| self.has_value(*child)),
        }
    }

    /// Evaluates `node`.
    ///
    /// Evaluating an assignment stores the result into its target variable.
    pub fn value(&self, node: NodeId) -> Result<Number, ExpressionError> {
        match self.node(node)? {
            Node::Constant(value) => Ok(*value),
            Node::Variable(name) => self.registry().get(name).ok_or(ExpressionError::NoValueYet),
            Node::Binary { rule, left, right } => {
                let (Some(left), Some(right)) = (left, right) else {
                    return Err(ExpressionError::NoValueYet);
                };
                if *rule == BinaryRule::Assignment {
                    let value = self.value(*right)?;
                    if let Some(target) = self.assignment_target(node) {
                        self.registry().set(target, Some(value))?;
                    }
                    return Ok(value);
                }
                Number::operate(*rule, self.value(*left)?, self.value(*right)?)
            }
            Node::Group(_) => {
                if self.has_value(node) {
                    Err(ExpressionError::GroupHasNoValue)
                } else {
                    Err(ExpressionError::NoValueYet)
                }
            }
        }
    }

    /// Like [`Self::value`], but a missing value is `Ok(None)` instead of an
    /// error. Arithmetic failures still surface.
    pub fn try_value(&self, node: NodeId) -> Result<Option<Number>, ExpressionError> {
        if !self.has_value(node) {
            return Ok(None);
        }
        self.value(node).map(Some)
    }
}
