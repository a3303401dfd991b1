use std::collections::BTreeSet;
use std::fmt::{self, Write};

use crate::error::ExpressionError;
use crate::number::Number;
use crate::registry::VariableRegistry;

/// Label rendered for group nodes.
pub const GROUP_LABEL: &str = "Expressions";

/// Binary operators, from lowest to highest priority.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BinaryRule {
    Assignment,
    Addition,
    Subtraction,
    Multiplication,
    Division,
    Power,
}

impl BinaryRule {
    pub const ALL: [BinaryRule; 6] = [
        BinaryRule::Assignment,
        BinaryRule::Addition,
        BinaryRule::Subtraction,
        BinaryRule::Multiplication,
        BinaryRule::Division,
        BinaryRule::Power,
    ];

    /// Binding strength used for parenthesization when rendering.
    pub fn priority(self) -> u8 {
        match self {
            Self::Assignment => 0,
            Self::Addition | Self::Subtraction => 1,
            Self::Multiplication | Self::Division => 2,
            Self::Power => 3,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Self::Assignment => "=",
            Self::Addition => "+",
            Self::Subtraction => "-",
            Self::Multiplication => "*",
            Self::Division => "/",
            Self::Power => "^",
        }
    }

    pub fn is_right_associative(self) -> bool {
        matches!(self, Self::Assignment | Self::Power)
    }
}

impl fmt::Display for BinaryRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Operator criterion of the model's filter.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum OperatorFilter {
    #[default]
    Any,
    Rule(BinaryRule),
}

/// Kinds of terminal expressions, used by the model's operand filter.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum TerminalType {
    #[default]
    All,
    Constants,
    Variables,
}

impl fmt::Display for TerminalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::All => "All",
            Self::Constants => "Constants",
            Self::Variables => "Variables",
        })
    }
}

/// Handle to a node of an [`ExpressionArena`].
///
/// Handles carry the generation of their slot, so a handle to a removed node
/// never aliases a node allocated later in the same slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    index: u32,
    generation: u32,
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}.{}", self.index, self.generation)
    }
}

/// An expression node.
#[derive(Clone, Debug, PartialEq)]
pub enum Node {
    /// Always has a value.
    Constant(Number),
    /// Value lives in the arena's [`VariableRegistry`], keyed by name.
    Variable(String),
    Binary {
        rule: BinaryRule,
        left: Option<NodeId>,
        right: Option<NodeId>,
    },
    /// Parentless container of top level expressions.
    Group(Vec<NodeId>),
}

impl Node {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Constant(_) | Self::Variable(_))
    }

    pub fn rule(&self) -> Option<BinaryRule> {
        match self {
            Self::Binary { rule, .. } => Some(*rule),
            _ => None,
        }
    }

    pub fn is_assignment(&self) -> bool {
        self.rule() == Some(BinaryRule::Assignment)
    }

    pub fn children(&self) -> Vec<NodeId> {
        match self {
            Self::Binary { left, right, .. } => left.iter().chain(right.iter()).copied().collect(),
            Self::Group(children) => children.clone(),
            Self::Constant(_) | Self::Variable(_) => Vec::new(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Side {
    Left,
    Right,
}

#[derive(Debug)]
struct Slot {
    node: Node,
    parent: Option<NodeId>,
}

#[derive(Debug)]
struct Entry {
    generation: u32,
    slot: Option<Slot>,
}

/// Owns expression nodes and keeps parent links consistent with child links.
///
/// Every mutation goes through this type: attaching a node anywhere first
/// detaches it from its previous parent, and assignment nodes keep the
/// registry value of their target variable in sync with their right operand.
#[derive(Debug)]
pub struct ExpressionArena {
    entries: Vec<Entry>,
    free: Vec<u32>,
    registry: VariableRegistry,
}

impl ExpressionArena {
    pub fn new(registry: VariableRegistry) -> Self {
        Self {
            entries: Vec::new(),
            free: Vec::new(),
            registry,
        }
    }

    pub fn registry(&self) -> &VariableRegistry {
        &self.registry
    }

    /// Number of live nodes.
    pub fn len(&self) -> usize {
        self.entries.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes every node. Handles to them stay stale, since slots keep
    /// their generations.
    pub fn clear(&mut self) {
        for (index, entry) in self.entries.iter_mut().enumerate() {
            if entry.slot.take().is_some() {
                entry.generation = entry.generation.wrapping_add(1);
                self.free.push(index as u32);
            }
        }
    }

    pub fn exists(&self, id: NodeId) -> bool {
        self.slot(id).is_ok()
    }

    pub fn node(&self, id: NodeId) -> Result<&Node, ExpressionError> {
        self.slot(id).map(|slot| &slot.node)
    }

    pub fn parent(&self, id: NodeId) -> Result<Option<NodeId>, ExpressionError> {
        self.slot(id).map(|slot| slot.parent)
    }

    fn slot(&self, id: NodeId) -> Result<&Slot, ExpressionError> {
        self.entries
            .get(id.index as usize)
            .filter(|entry| entry.generation == id.generation)
            .and_then(|entry| entry.slot.as_ref())
            .ok_or(ExpressionError::StaleNode(id))
    }

    fn slot_mut(&mut self, id: NodeId) -> Result<&mut Slot, ExpressionError> {
        self.entries
            .get_mut(id.index as usize)
            .filter(|entry| entry.generation == id.generation)
            .and_then(|entry| entry.slot.as_mut())
            .ok_or(ExpressionError::StaleNode(id))
    }

    fn allocate(&mut self, node: Node) -> NodeId {
        let slot = Some(Slot { node, parent: None });
        if let Some(index) = self.free.pop() {
            let entry = &mut self.entries[index as usize];
            entry.slot = slot;
            return NodeId {
                index,
                generation: entry.generation,
            };
        }
        self.entries.push(Entry {
            generation: 0,
            slot,
        });
        NodeId {
            index: (self.entries.len() - 1) as u32,
            generation: 0,
        }
    }

    fn release(&mut self, id: NodeId) {
        if let Some(entry) = self.entries.get_mut(id.index as usize) {
            if entry.generation == id.generation && entry.slot.take().is_some() {
                entry.generation = entry.generation.wrapping_add(1);
                self.free.push(id.index);
            }
        }
    }

    pub fn constant(&mut self, value: Number) -> NodeId {
        self.allocate(Node::Constant(value))
    }

    /// Creates a variable sharing the registry entry of `name`.
    ///
    /// Fails when `value` conflicts with a value already registered for
    /// `name`.
    pub fn variable(&mut self, name: &str, value: Option<Number>) -> Result<NodeId, ExpressionError> {
        self.registry.resolve(name, value)?;
        Ok(self.allocate(Node::Variable(name.to_string())))
    }

    /// Creates a binary node and adopts the provided operands.
    ///
    /// Nothing changes when an operand can't be adopted. Operands attached
    /// elsewhere are moved.
    pub fn binary(
        &mut self,
        rule: BinaryRule,
        left: Option<NodeId>,
        right: Option<NodeId>,
    ) -> Result<NodeId, ExpressionError> {
        if left.is_some() && left == right {
            return Err(ExpressionError::InvalidParent("the same node can't be both operands"));
        }
        let assigned = if rule == BinaryRule::Assignment {
            if let Some(left) = left {
                if !matches!(self.node(left)?, Node::Variable(_)) {
                    return Err(ExpressionError::InvalidAssignmentTarget);
                }
            }
            self.assigned_value(right)?
        } else {
            None
        };

        let id = self.allocate(Node::Binary {
            rule,
            left: None,
            right: None,
        });
        let checked = [left, right]
            .into_iter()
            .flatten()
            .try_for_each(|child| self.check_parent(child, id));
        if let Err(error) = checked {
            self.release(id);
            return Err(error);
        }

        self.link(id, Side::Left, left)?;
        self.link(id, Side::Right, right)?;
        if rule == BinaryRule::Assignment {
            self.push_assignment(id, assigned)?;
        }
        Ok(id)
    }

    /// Shorthand for an assignment of `value` to the variable `target`.
    pub fn assignment(&mut self, target: NodeId, value: NodeId) -> Result<NodeId, ExpressionError> {
        self.binary(BinaryRule::Assignment, Some(target), Some(value))
    }

    pub fn empty_group(&mut self) -> NodeId {
        self.allocate(Node::Group(Vec::new()))
    }

    pub fn group(&mut self, children: &[NodeId]) -> Result<NodeId, ExpressionError> {
        let id = self.empty_group();
        let checked = children
            .iter()
            .try_for_each(|child| self.check_parent(*child, id));
        if let Err(error) = checked {
            self.release(id);
            return Err(error);
        }
        for child in children {
            self.group_push(id, *child)?;
        }
        Ok(id)
    }

    pub fn operands(&self, binary: NodeId) -> Result<(Option<NodeId>, Option<NodeId>), ExpressionError> {
        match self.node(binary)? {
            Node::Binary { left, right, .. } => Ok((*left, *right)),
            _ => Err(ExpressionError::NotBinary(binary)),
        }
    }

    pub fn left(&self, binary: NodeId) -> Result<Option<NodeId>, ExpressionError> {
        self.operands(binary).map(|(left, _)| left)
    }

    pub fn right(&self, binary: NodeId) -> Result<Option<NodeId>, ExpressionError> {
        self.operands(binary).map(|(_, right)| right)
    }

    fn rule(&self, binary: NodeId) -> Result<BinaryRule, ExpressionError> {
        self.node(binary)?
            .rule()
            .ok_or(ExpressionError::NotBinary(binary))
    }

    /// Replaces the left operand of `binary`.
    ///
    /// On an assignment the operand must be a variable, and it immediately
    /// takes the value of the right operand when that one has a value.
    pub fn set_left(&mut self, binary: NodeId, child: Option<NodeId>) -> Result<(), ExpressionError> {
        let rule = self.rule(binary)?;
        if rule == BinaryRule::Assignment {
            let is_variable = match child {
                Some(child) => matches!(self.node(child)?, Node::Variable(_)),
                None => false,
            };
            if !is_variable {
                return Err(ExpressionError::InvalidAssignmentTarget);
            }
        }
        if let Some(child) = child {
            self.check_parent(child, binary)?;
        }
        let assigned = if rule == BinaryRule::Assignment {
            self.assigned_value(self.right(binary)?)?
        } else {
            None
        };

        self.link(binary, Side::Left, child)?;
        if assigned.is_some() {
            self.push_assignment(binary, assigned)?;
        }
        Ok(())
    }

    /// Replaces the right operand of `binary`.
    ///
    /// On an assignment the target variable takes the new operand's value,
    /// or loses its value when the operand has none.
    pub fn set_right(&mut self, binary: NodeId, child: Option<NodeId>) -> Result<(), ExpressionError> {
        let rule = self.rule(binary)?;
        if let Some(child) = child {
            self.check_parent(child, binary)?;
        }
        let assigned = if rule == BinaryRule::Assignment {
            self.assigned_value(child)?
        } else {
            None
        };

        self.link(binary, Side::Right, child)?;
        if rule == BinaryRule::Assignment {
            self.push_assignment(binary, assigned)?;
        }
        Ok(())
    }

    /// Moves `child` under `parent`, or detaches it when `parent` is `None`.
    ///
    /// A binary parent adopts the child in its first free operand slot, a
    /// group appends it. Groups never accept a parent, not even `None`.
    pub fn set_parent(&mut self, child: NodeId, parent: Option<NodeId>) -> Result<(), ExpressionError> {
        if matches!(self.node(child)?, Node::Group(_)) {
            return Err(ExpressionError::InvalidParent("a group can't have a parent"));
        }
        let Some(parent) = parent else {
            return self.detach(child);
        };
        self.check_parent(child, parent)?;
        if matches!(self.node(parent)?, Node::Group(_)) {
            return self.group_push(parent, child);
        }
        match self.operands(parent)? {
            (None, _) => self.set_left(parent, Some(child)),
            (_, None) => self.set_right(parent, Some(child)),
            _ => Err(ExpressionError::InvalidParent("both operands are already set")),
        }
    }

    /// Rejects parent links that break node kind rules or create a cycle.
    fn check_parent(&self, child: NodeId, parent: NodeId) -> Result<(), ExpressionError> {
        let parent_node = self.node(parent)?;
        match self.node(child)? {
            Node::Group(_) => Err(ExpressionError::InvalidParent("a group can't have a parent")),
            Node::Constant(_) | Node::Variable(_) => {
                if parent_node.is_terminal() {
                    return Err(ExpressionError::InvalidParent("parent is a terminal expression"));
                }
                Ok(())
            }
            Node::Binary { rule, .. } => {
                if parent_node.is_terminal() {
                    return Err(ExpressionError::InvalidParent("parent is a terminal expression"));
                }
                if *rule == BinaryRule::Assignment && parent_node.rule().is_some() {
                    return Err(ExpressionError::InvalidParent("an assignment is always a root expression"));
                }
                if self.contains(child, parent) {
                    return Err(ExpressionError::CyclicParent);
                }
                Ok(())
            }
        }
    }

    /// Whether `other` is `node` itself or one of its descendants.
    pub fn contains(&self, node: NodeId, other: NodeId) -> bool {
        let mut pending = vec![node];
        while let Some(current) = pending.pop() {
            if current == other {
                return true;
            }
            if let Ok(current) = self.node(current) {
                pending.extend(current.children());
            }
        }
        false
    }

    fn link(&mut self, binary: NodeId, side: Side, child: Option<NodeId>) -> Result<(), ExpressionError> {
        if let Some(child) = child {
            if self.parent(child)? == Some(binary) && self.operand(binary, side)? == Some(child) {
                return Ok(());
            }
            self.detach(child)?;
        }
        if let Some(previous) = self.operand(binary, side)? {
            self.slot_mut(previous)?.parent = None;
        }
        match &mut self.slot_mut(binary)?.node {
            Node::Binary { left, .. } if side == Side::Left => *left = child,
            Node::Binary { right, .. } => *right = child,
            _ => return Err(ExpressionError::NotBinary(binary)),
        }
        if let Some(child) = child {
            self.slot_mut(child)?.parent = Some(binary);
        }
        Ok(())
    }

    fn operand(&self, binary: NodeId, side: Side) -> Result<Option<NodeId>, ExpressionError> {
        let (left, right) = self.operands(binary)?;
        Ok(match side {
            Side::Left => left,
            Side::Right => right,
        })
    }

    /// Unlinks `child` from its parent, if any.
    fn detach(&mut self, child: NodeId) -> Result<(), ExpressionError> {
        let Some(parent) = self.parent(child)? else {
            return Ok(());
        };
        let mut cleared_assignment = false;
        match &mut self.slot_mut(parent)?.node {
            Node::Binary { rule, left, right } => {
                if *left == Some(child) {
                    *left = None;
                }
                if *right == Some(child) {
                    *right = None;
                    cleared_assignment = *rule == BinaryRule::Assignment;
                }
            }
            Node::Group(children) => children.retain(|existing| *existing != child),
            Node::Constant(_) | Node::Variable(_) => {}
        }
        self.slot_mut(child)?.parent = None;
        if cleared_assignment {
            self.push_assignment(parent, None)?;
        }
        Ok(())
    }

    /// Value an assignment would push for the right operand `right`.
    fn assigned_value(&self, right: Option<NodeId>) -> Result<Option<Number>, ExpressionError> {
        match right {
            Some(right) => self.try_value(right),
            None => Ok(None),
        }
    }

    /// Stores `value` into the target variable of `assignment`, or clears it.
    fn push_assignment(&self, assignment: NodeId, value: Option<Number>) -> Result<(), ExpressionError> {
        let Some(target) = self.assignment_target(assignment) else {
            return Ok(());
        };
        match value {
            Some(value) => self.registry.set(target, Some(value)),
            None => {
                self.registry.clear_value(target);
                Ok(())
            }
        }
    }

    /// Name of the variable assigned by `node` when it is an assignment.
    pub fn assignment_target(&self, node: NodeId) -> Option<&str> {
        match self.node(node).ok()? {
            Node::Binary {
                rule: BinaryRule::Assignment,
                left: Some(left),
                ..
            } => match self.node(*left).ok()? {
                Node::Variable(name) => Some(name.as_str()),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn group_children(&self, group: NodeId) -> Result<&[NodeId], ExpressionError> {
        match self.node(group)? {
            Node::Group(children) => Ok(children),
            _ => Err(ExpressionError::NotGroup(group)),
        }
    }

    /// Appends `child` to `group`, moving it out of any previous parent.
    pub fn group_push(&mut self, group: NodeId, child: NodeId) -> Result<(), ExpressionError> {
        self.group_children(group)?;
        self.check_parent(child, group)?;
        self.detach(child)?;
        if let Node::Group(children) = &mut self.slot_mut(group)?.node {
            children.push(child);
        }
        self.slot_mut(child)?.parent = Some(group);
        Ok(())
    }

    /// Detaches `child` from `group`. Returns whether it was a member.
    pub fn group_remove(&mut self, group: NodeId, child: NodeId) -> Result<bool, ExpressionError> {
        self.group_children(group)?;
        if self.parent(child)? != Some(group) {
            return Ok(false);
        }
        self.detach(child)?;
        Ok(true)
    }

    /// Detaches every child of `group`.
    pub fn group_clear(&mut self, group: NodeId) -> Result<(), ExpressionError> {
        let children = self.group_children(group)?.to_vec();
        for child in children {
            self.detach(child)?;
        }
        Ok(())
    }

    /// Detaches `node` and frees it together with all of its descendants.
    pub fn remove(&mut self, node: NodeId) -> Result<(), ExpressionError> {
        self.detach(node)?;
        let mut pending = vec![node];
        while let Some(current) = pending.pop() {
            if let Ok(current_node) = self.node(current) {
                pending.extend(current_node.children());
            }
            self.release(current);
        }
        Ok(())
    }

    /// Equality of shape, operators, constants and variable names.
    pub fn structurally_equal(&self, a: NodeId, b: NodeId) -> bool {
        let (Ok(lhs), Ok(rhs)) = (self.node(a), self.node(b)) else {
            return false;
        };
        match (lhs, rhs) {
            (Node::Constant(lhs), Node::Constant(rhs)) => lhs == rhs,
            (Node::Variable(lhs), Node::Variable(rhs)) => lhs == rhs,
            (
                Node::Binary {
                    rule: lhs_rule,
                    left: lhs_left,
                    right: lhs_right,
                },
                Node::Binary {
                    rule: rhs_rule,
                    left: rhs_left,
                    right: rhs_right,
                },
            ) => {
                lhs_rule == rhs_rule
                    && self.operands_equal(*lhs_left, *rhs_left)
                    && self.operands_equal(*lhs_right, *rhs_right)
            }
            (Node::Group(lhs), Node::Group(rhs)) => {
                lhs.len() == rhs.len()
                    && lhs
                        .iter()
                        .zip(rhs)
                        .all(|(lhs, rhs)| self.structurally_equal(*lhs, *rhs))
            }
            _ => false,
        }
    }

    fn operands_equal(&self, a: Option<NodeId>, b: Option<NodeId>) -> bool {
        match (a, b) {
            (None, None) => true,
            (Some(a), Some(b)) => self.structurally_equal(a, b),
            _ => false,
        }
    }

    /// Whether a variable called `name` appears in `node`'s subtree.
    pub fn contains_variable(&self, node: NodeId, name: &str) -> bool {
        self.any_node(node, |node| matches!(node, Node::Variable(existing) if existing == name))
    }

    /// Whether a terminal of the requested type appears in `node`'s subtree.
    pub fn contains_terminal(&self, node: NodeId, terminal: TerminalType) -> bool {
        self.any_node(node, |node| match terminal {
            TerminalType::All => node.is_terminal(),
            TerminalType::Constants => matches!(node, Node::Constant(_)),
            TerminalType::Variables => matches!(node, Node::Variable(_)),
        })
    }

    /// Names of all variables in `node`'s subtree.
    pub fn variable_names(&self, node: NodeId) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        self.any_node(node, |node| {
            if let Node::Variable(name) = node {
                names.insert(name.clone());
            }
            false
        });
        names
    }

    fn any_node(&self, node: NodeId, mut predicate: impl FnMut(&Node) -> bool) -> bool {
        let mut pending = vec![node];
        while let Some(current) = pending.pop() {
            let Ok(current) = self.node(current) else {
                continue;
            };
            if predicate(current) {
                return true;
            }
            pending.extend(current.children());
        }
        false
    }

    /// Renders `node` the way the parser reads it back.
    pub fn display(&self, node: NodeId) -> ExpressionDisplay<'_> {
        ExpressionDisplay { arena: self, node }
    }

    pub fn render(&self, node: NodeId) -> String {
        self.display(node).to_string()
    }
}

/// [`fmt::Display`] adapter returned by [`ExpressionArena::display`].
pub struct ExpressionDisplay<'a> {
    arena: &'a ExpressionArena,
    node: NodeId,
}

impl ExpressionDisplay<'_> {
    fn write_node(&self, f: &mut fmt::Formatter<'_>, node: NodeId) -> fmt::Result {
        match self.arena.node(node) {
            Err(_) => f.write_str("<removed>"),
            Ok(Node::Constant(value)) => f.write_str(&value.source()),
            Ok(Node::Variable(name)) => f.write_str(name),
            Ok(Node::Group(_)) => f.write_str(GROUP_LABEL),
            Ok(Node::Binary { rule, left, right }) => {
                if let Some(left) = left {
                    let parenthesize = self.operand_priority(*left).is_some_and(|priority| {
                        priority < rule.priority()
                            || (priority == rule.priority() && rule.is_right_associative())
                    });
                    self.write_operand(f, *left, parenthesize)?;
                    f.write_char(' ')?;
                }
                f.write_str(rule.symbol())?;
                if let Some(right) = right {
                    f.write_char(' ')?;
                    let parenthesize = self
                        .operand_priority(*right)
                        .is_some_and(|priority| priority <= rule.priority());
                    self.write_operand(f, *right, parenthesize)?;
                }
                Ok(())
            }
        }
    }

    fn write_operand(&self, f: &mut fmt::Formatter<'_>, node: NodeId, parenthesize: bool) -> fmt::Result {
        if parenthesize {
            f.write_char('(')?;
            self.write_node(f, node)?;
            f.write_char(')')
        } else {
            self.write_node(f, node)
        }
    }

    fn operand_priority(&self, node: NodeId) -> Option<u8> {
        self.arena.node(node).ok()?.rule().map(BinaryRule::priority)
    }
}

impl fmt::Display for ExpressionDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_node(f, self.node)
    }
}
