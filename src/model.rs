//! The canonical list of top level expressions and everything derived from it.

use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use log::{debug, trace, warn};

use crate::error::ModelError;
use crate::expression::{ExpressionArena, NodeId, OperatorFilter, TerminalType};
use crate::number::{Number, NumberKind};
use crate::parse::{Draft, ExpressionParser, DEFAULT_SEPARATOR};
use crate::registry::VariableRegistry;

/// Keyword starting the optional number kind line of saved files.
const TYPE_KEYWORD: &str = "type";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ModelConfig {
    /// Numeric kind of every expression in the model.
    pub kind: NumberKind,
    /// Separator between expressions in parsed text.
    pub separator: char,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            kind: NumberKind::Int,
            separator: DEFAULT_SEPARATOR,
        }
    }
}

/// Owns a list of expression trees without duplicates, the variables they
/// share and the filters applied to the list.
///
/// Every structural change rebuilds the [root group](Self::root) and bumps
/// [`Self::version`], which is all a front end needs to observe.
#[derive(Debug)]
pub struct ExpressionsModel {
    config: ModelConfig,
    registry: VariableRegistry,
    parser: ExpressionParser,
    arena: ExpressionArena,
    expressions: Vec<NodeId>,
    root: NodeId,
    operator_filter: OperatorFilter,
    operand_filter: TerminalType,
    name_filter: Option<String>,
    file: Option<PathBuf>,
    version: u64,
}

impl Default for ExpressionsModel {
    fn default() -> Self {
        Self::new(ModelConfig::default())
    }
}

impl ExpressionsModel {
    pub fn new(config: ModelConfig) -> Self {
        let registry = VariableRegistry::new();
        let mut arena = ExpressionArena::new(registry.clone());
        let root = arena.empty_group();
        Self {
            config,
            parser: ExpressionParser::new(config.kind, registry.clone()).with_separator(config.separator),
            registry,
            arena,
            expressions: Vec::new(),
            root,
            operator_filter: OperatorFilter::Any,
            operand_filter: TerminalType::All,
            name_filter: None,
            file: None,
            version: 0,
        }
    }

    pub fn with_kind(kind: NumberKind) -> Self {
        Self::new(ModelConfig {
            kind,
            ..ModelConfig::default()
        })
    }

    pub fn kind(&self) -> NumberKind {
        self.config.kind
    }

    pub fn separator(&self) -> char {
        self.config.separator
    }

    /// Nodes of the model, for rendering and evaluation.
    pub fn arena(&self) -> &ExpressionArena {
        &self.arena
    }

    pub fn registry(&self) -> &VariableRegistry {
        &self.registry
    }

    /// Every expression, in insertion order.
    pub fn all_expressions(&self) -> &[NodeId] {
        &self.expressions
    }

    /// Expressions accepted by the current filters, in insertion order.
    pub fn expressions(&self) -> Vec<NodeId> {
        self.expressions
            .iter()
            .copied()
            .filter(|id| self.accepts(*id))
            .collect()
    }

    /// Snapshot of every known variable and its value.
    pub fn variables(&self) -> BTreeMap<String, Option<Number>> {
        self.registry.snapshot()
    }

    pub fn render(&self, id: NodeId) -> String {
        self.arena.render(id)
    }

    /// Synthetic group holding every expression.
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Incremented by every change to the list, the variables or the filters.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn file(&self) -> Option<&Path> {
        self.file.as_deref()
    }

    pub fn has_file(&self) -> bool {
        self.file.is_some()
    }

    pub fn reset_file(&mut self) {
        self.file = None;
        self.version += 1;
    }

    pub fn operator_filter(&self) -> OperatorFilter {
        self.operator_filter
    }

    pub fn set_operator_filter(&mut self, filter: OperatorFilter) {
        self.operator_filter = filter;
        self.version += 1;
    }

    pub fn operand_filter(&self) -> TerminalType {
        self.operand_filter
    }

    pub fn set_operand_filter(&mut self, filter: TerminalType) {
        self.operand_filter = filter;
        self.version += 1;
    }

    pub fn name_filter(&self) -> Option<&str> {
        self.name_filter.as_deref()
    }

    pub fn set_name_filter(&mut self, filter: Option<&str>) {
        self.name_filter = filter.map(str::to_string);
        self.version += 1;
    }

    fn accepts(&self, id: NodeId) -> bool {
        let rendered = self.arena.render(id);
        let operator_ok = match self.operator_filter {
            OperatorFilter::Any => true,
            OperatorFilter::Rule(rule) => rendered.contains(rule.symbol()),
        };
        let operand_ok = match self.operand_filter {
            TerminalType::All => true,
            terminal => self.arena.contains_terminal(id, terminal),
        };
        let name_ok = match self.name_filter.as_deref() {
            None | Some("") => true,
            Some(name) => rendered.contains(name),
        };
        operator_ok && operand_ok && name_ok
    }

    /// Forgets every expression and variable.
    pub fn clear(&mut self) {
        debug!("Clearing {} expressions", self.expressions.len());
        self.expressions.clear();
        self.registry.reset();
        self.arena.clear();
        self.root = self.arena.empty_group();
        self.version += 1;
    }

    /// Switches every expression to `kind` by reparsing the model's text.
    ///
    /// This is lossy: expressions or values that can't be written in the
    /// new kind are lost, and the reparse error is returned. Returns whether
    /// the kind changed.
    pub fn set_number_kind(&mut self, kind: NumberKind) -> Result<bool, ModelError> {
        if kind == self.config.kind {
            return Ok(false);
        }
        debug!("Switching number kind from {} to {kind}", self.config.kind);
        let text = self.to_string();
        self.clear();
        self.config.kind = kind;
        self.parser = ExpressionParser::new(kind, self.registry.clone()).with_separator(self.config.separator);
        if !text.is_empty() {
            self.parse(&text)?;
        }
        Ok(true)
    }

    /// Parses `text` and appends the expressions not already in the model.
    ///
    /// Segments are merged in order; when one fails, the previous ones stay
    /// merged and the error is returned. Returns whether the list changed.
    pub fn parse(&mut self, text: &str) -> Result<bool, ModelError> {
        debug!("Parsing {text:?}");
        let parser = self.parser.clone();
        let mut added = false;
        let mut outcome = Ok(());
        for draft in parser.segments(text) {
            match draft.map_err(ModelError::from).and_then(|draft| self.merge(&draft)) {
                Ok(merged) => added |= merged,
                Err(error) => {
                    warn!("Failed to parse {text:?}: {error}");
                    outcome = Err(error);
                    break;
                }
            }
        }
        if added {
            self.refresh_root()?;
        }
        outcome.map(|()| added)
    }

    /// Like [`Self::parse`], with absent text reported as
    /// [`ModelError::NullArgument`].
    pub fn parse_optional(&mut self, text: Option<&str>) -> Result<bool, ModelError> {
        self.parse(text.ok_or(ModelError::NullArgument)?)
    }

    /// Grafts `draft` and appends it unless an equal expression exists.
    fn merge(&mut self, draft: &Draft) -> Result<bool, ModelError> {
        let id = self.arena.graft(draft)?;
        let duplicate = self
            .expressions
            .iter()
            .any(|existing| self.arena.structurally_equal(*existing, id));
        if duplicate {
            trace!("Skipping duplicate {}", self.arena.display(id));
            self.arena.remove(id)?;
            return Ok(false);
        }
        trace!("Adding {}", self.arena.display(id));
        self.expressions.push(id);
        Ok(true)
    }

    /// Replaces `id` with the expressions parsed from `text`.
    ///
    /// The first parsed expression takes the place of `id`, the others are
    /// merged. Absent or blank text removes `id`. Nothing changes when `text`
    /// doesn't parse.
    pub fn reparse(&mut self, id: NodeId, text: Option<&str>) -> Result<bool, ModelError> {
        let index = self.position(id).ok_or(ModelError::NotFound)?;
        let Some(text) = text.filter(|text| !text.trim().is_empty()) else {
            return self.remove(id);
        };
        debug!("Reparsing {} as {text:?}", self.arena.display(id));
        let drafts = self.parser.parse(text)?;
        let Some((first, rest)) = drafts.split_first() else {
            return self.remove(id);
        };

        let replacement = self.arena.graft(first)?;
        self.arena.remove(id)?;
        self.expressions[index] = replacement;
        let mut outcome = Ok(());
        for draft in rest {
            if let Err(error) = self.merge(draft) {
                warn!("Failed to merge the rest of {text:?}: {error}");
                outcome = Err(error);
                break;
            }
        }
        self.prune_variables();
        self.refresh_root()?;
        outcome.map(|()| true)
    }

    /// Removes `id` from the list. Returns `false` when it isn't there.
    pub fn remove(&mut self, id: NodeId) -> Result<bool, ModelError> {
        let Some(index) = self.position(id) else {
            return Ok(false);
        };
        debug!("Removing {}", self.arena.display(id));
        self.expressions.remove(index);
        self.arena.remove(id)?;
        self.prune_variables();
        self.refresh_root()?;
        Ok(true)
    }

    fn position(&self, id: NodeId) -> Option<usize> {
        self.expressions.iter().position(|existing| *existing == id)
    }

    /// Forgets the variables no expression refers to anymore.
    fn prune_variables(&mut self) -> bool {
        let mut pruned = false;
        for name in self.registry.names() {
            let referenced = self
                .expressions
                .iter()
                .any(|id| self.arena.contains_variable(*id, &name));
            if !referenced {
                trace!("Forgetting variable {name}");
                pruned |= self.registry.unregister(&name);
            }
        }
        pruned
    }

    /// Rebuilds the root group from the expression list.
    pub fn refresh_root(&mut self) -> Result<(), ModelError> {
        self.arena.group_clear(self.root)?;
        for id in &self.expressions {
            self.arena.group_push(self.root, *id)?;
        }
        self.version += 1;
        Ok(())
    }

    /// The top level assignment to `name`, if any.
    pub fn assignment_for(&self, name: &str) -> Option<NodeId> {
        self.expressions
            .iter()
            .copied()
            .find(|id| self.arena.assignment_target(*id) == Some(name))
    }

    /// Assignments for valued variables that no expression assigns.
    fn synthesized_assignments(&self) -> Vec<String> {
        self.registry
            .snapshot()
            .into_iter()
            .filter(|(name, _)| self.assignment_for(name).is_none())
            .filter_map(|(name, value)| value.map(|value| format!("{name} = {}", value.source())))
            .collect()
    }

    /// Reads expressions from `path`, replacing or extending the current ones.
    ///
    /// An optional first line `type int|float|double` selects the number
    /// kind; when appending it must match the current kind. Every other
    /// non-blank line holds one or more separated expressions. Returns
    /// whether the expressions or the variables changed.
    pub fn load(&mut self, path: impl AsRef<Path>, append: bool) -> Result<bool, ModelError> {
        let path = path.as_ref();
        debug!("Loading {} (append: {append})", path.display());
        let content = fs::read_to_string(path)?;
        if !append {
            self.clear();
        }
        let expressions_before = self.rendered_expressions();
        let variables_before = self.variables();

        let mut first = true;
        for line in content.lines().map(str::trim).filter(|line| !line.is_empty()) {
            let is_type_line = first && line.split_whitespace().next() == Some(TYPE_KEYWORD);
            first = false;
            if !is_type_line {
                self.parse(line)?;
                continue;
            }
            let name = line.split_whitespace().last().unwrap_or_default();
            let kind: NumberKind = name.parse()?;
            if append && kind != self.config.kind {
                return Err(ModelError::UnsupportedNumberKind(name.to_string()));
            }
            self.set_number_kind(kind)?;
        }

        self.file = Some(path.to_path_buf());
        self.version += 1;
        Ok(self.rendered_expressions() != expressions_before || self.variables() != variables_before)
    }

    fn rendered_expressions(&self) -> Vec<String> {
        self.expressions.iter().map(|id| self.arena.render(*id)).collect()
    }

    /// Writes the number kind, then the synthesized assignments, then one
    /// expression per line.
    pub fn save(&mut self, path: impl AsRef<Path>) -> Result<(), ModelError> {
        let path = path.as_ref();
        debug!("Saving {} expressions to {}", self.expressions.len(), path.display());
        let mut writer = BufWriter::new(File::create(path)?);
        writeln!(writer, "{TYPE_KEYWORD} {}", self.config.kind)?;
        for assignment in self.synthesized_assignments() {
            writeln!(writer, "{assignment}")?;
        }
        for id in &self.expressions {
            writeln!(writer, "{}", self.arena.display(*id))?;
        }
        writer.flush()?;
        self.file = Some(path.to_path_buf());
        self.version += 1;
        Ok(())
    }

    /// Saves to the file the model was last loaded from or saved to.
    pub fn save_current(&mut self) -> Result<(), ModelError> {
        let path = self.file.clone().ok_or(ModelError::NullArgument)?;
        self.save(path)
    }
}

/// Synthesized assignments then every expression, joined by the separator.
impl fmt::Display for ExpressionsModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        let rendered = self
            .synthesized_assignments()
            .into_iter()
            .chain(self.rendered_expressions());
        for text in rendered {
            if !first {
                write!(f, "{}", self.config.separator)?;
            }
            first = false;
            f.write_str(&text)?;
        }
        Ok(())
    }
}
