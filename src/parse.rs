use crate::error::{ExpressionError, ParseError};
use crate::expression::{BinaryRule, ExpressionArena, NodeId};
use crate::number::{Number, NumberKind};
use crate::registry::VariableRegistry;

use log::trace;
use once_cell::sync::Lazy;
use pest::error::{ErrorVariant, InputLocation};
use pest::iterators::{Pair, Pairs};
use pest::pratt_parser::{Assoc, Op, PrattParser};
use pest::Parser;
use pest_derive::Parser;

#[derive(Parser)]
#[grammar = "grammar.pest"] // relative to project `src`
struct ExpressionGrammar;

/// Separator between expressions when none is configured.
pub const DEFAULT_SEPARATOR: char = ';';

/// A parsed expression that doesn't live in an arena yet.
///
/// Use [`ExpressionArena::graft`] to turn it into linked nodes.
#[derive(Clone, Debug, PartialEq)]
pub enum Draft {
    Constant(Number),
    Variable(String),
    Binary(BinaryRule, Box<Draft>, Box<Draft>),
}

impl Draft {
    fn is_assignment(&self) -> bool {
        matches!(self, Self::Binary(BinaryRule::Assignment, _, _))
    }
}

static PRATT_PARSER: Lazy<PrattParser<Rule>> = Lazy::new(|| {
    use Assoc::*;
    use Rule::*;

    PrattParser::new()
        .op(Op::infix(assign, Right))
        .op(Op::infix(add, Left) | Op::infix(subtract, Left))
        .op(Op::infix(multiply, Left) | Op::infix(divide, Left))
        .op(Op::infix(power, Right))
        .op(Op::prefix(neg))
});

/// Turns text into expression drafts of a single numeric kind.
///
/// Variable names are registered in the parser's registry as they are read,
/// left to right, even when a later part of the same segment fails.
#[derive(Clone, Debug)]
pub struct ExpressionParser {
    kind: NumberKind,
    separator: char,
    registry: VariableRegistry,
}

impl ExpressionParser {
    pub fn new(kind: NumberKind, registry: VariableRegistry) -> Self {
        Self {
            kind,
            separator: DEFAULT_SEPARATOR,
            registry,
        }
    }

    pub fn with_separator(mut self, separator: char) -> Self {
        self.separator = separator;
        self
    }

    pub fn kind(&self) -> NumberKind {
        self.kind
    }

    pub fn separator(&self) -> char {
        self.separator
    }

    /// Parses each separated segment of `text` lazily, in order.
    pub fn segments<'a>(&'a self, text: &'a str) -> impl Iterator<Item = Result<Draft, ParseError>> + 'a {
        text.split(self.separator)
            .map(move |segment| self.parse_segment(segment))
    }

    /// Parses every segment of `text`, failing on the first bad one.
    pub fn parse(&self, text: &str) -> Result<Vec<Draft>, ParseError> {
        self.segments(text).collect()
    }

    /// Like [`Self::parse`], with absent input reported as
    /// [`ParseError::NullArgument`].
    pub fn parse_optional(&self, text: Option<&str>) -> Result<Vec<Draft>, ParseError> {
        self.parse(text.ok_or(ParseError::NullArgument)?)
    }

    /// Parses a single expression. `segment` must not contain the separator.
    pub fn parse_segment(&self, segment: &str) -> Result<Draft, ParseError> {
        trace!("Parsing segment {segment:?} as {}", self.kind);
        if segment.trim().is_empty() {
            return Err(ParseError::MissingOperand);
        }
        if !parentheses_balanced(segment) {
            return Err(ParseError::UnbalancedParentheses);
        }
        let mut pairs = ExpressionGrammar::parse(Rule::calculation, segment)
            .map_err(|error| classify(segment, error))?;
        let expr = pairs.next().ok_or(ParseError::MissingOperand)?;
        self.climb(expr.into_inner())
    }

    fn climb(&self, pairs: Pairs<Rule>) -> Result<Draft, ParseError> {
        // Once a primary fails, later ones are not read, so names to the
        // right of an error stay unregistered.
        let mut failure: Option<ParseError> = None;
        PRATT_PARSER
            .map_primary(|pair| {
                if let Some(error) = &failure {
                    return Err(error.clone());
                }
                let result = self.primary(pair);
                if let Err(error) = &result {
                    failure = Some(error.clone());
                }
                result
            })
            .map_prefix(|op, operand| negate(self.kind, op, operand?))
            .map_infix(|lhs, op, rhs| combine(lhs?, op, rhs?))
            .parse(pairs)
    }

    fn primary(&self, pair: Pair<Rule>) -> Result<Draft, ParseError> {
        match pair.as_rule() {
            Rule::expr => self.climb(pair.into_inner()),
            Rule::number => self.kind.parse_literal(pair.as_str()).map(Draft::Constant),
            Rule::identifier => {
                let name = pair.as_str();
                self.registry.resolve(name, None)?;
                Ok(Draft::Variable(name.to_string()))
            }
            x => Err(ParseError::Syntax(format!("unexpected {x:?}"))),
        }
    }
}

fn negate(kind: NumberKind, op: Pair<Rule>, operand: Draft) -> Result<Draft, ParseError> {
    if op.as_rule() != Rule::neg {
        return Err(ParseError::Syntax(format!("unexpected prefix {:?}", op.as_rule())));
    }
    match operand {
        Draft::Constant(value) => Ok(Draft::Constant(value.negate())),
        operand if operand.is_assignment() => Err(ParseError::MalformedAssignment(
            "an assignment can't be negated".into(),
        )),
        operand => Ok(Draft::Binary(
            BinaryRule::Multiplication,
            Box::new(Draft::Constant(kind.one().negate())),
            Box::new(operand),
        )),
    }
}

fn combine(lhs: Draft, op: Pair<Rule>, rhs: Draft) -> Result<Draft, ParseError> {
    let rule = match op.as_rule() {
        Rule::assign => BinaryRule::Assignment,
        Rule::add => BinaryRule::Addition,
        Rule::subtract => BinaryRule::Subtraction,
        Rule::multiply => BinaryRule::Multiplication,
        Rule::divide => BinaryRule::Division,
        Rule::power => BinaryRule::Power,
        x => return Err(ParseError::Syntax(format!("unexpected operator {x:?}"))),
    };
    if lhs.is_assignment() || rhs.is_assignment() {
        return Err(ParseError::MalformedAssignment(format!(
            "an assignment can't be an operand of `{}`",
            rule.symbol()
        )));
    }
    if rule == BinaryRule::Assignment && !matches!(lhs, Draft::Variable(_)) {
        return Err(ParseError::MalformedAssignment(
            "left side of `=` must be a variable".into(),
        ));
    }
    Ok(Draft::Binary(rule, Box::new(lhs), Box::new(rhs)))
}

fn parentheses_balanced(segment: &str) -> bool {
    let mut depth = 0usize;
    for c in segment.chars() {
        match c {
            '(' => depth += 1,
            ')' if depth == 0 => return false,
            ')' => depth -= 1,
            _ => {}
        }
    }
    depth == 0
}

/// Maps a grammar failure onto the parse error taxonomy.
fn classify(segment: &str, error: pest::error::Error<Rule>) -> ParseError {
    let position = match error.location {
        InputLocation::Pos(position) => position,
        InputLocation::Span((start, _)) => start,
    };
    if let ErrorVariant::ParsingError { positives, .. } = &error.variant {
        let expects_operand = positives
            .iter()
            .any(|rule| matches!(rule, Rule::number | Rule::identifier | Rule::neg));
        let at_end = segment
            .get(position..)
            .is_some_and(|rest| rest.trim().is_empty());
        if expects_operand && at_end {
            return ParseError::MissingOperand;
        }
    }
    let error = error.renamed_rules(|rule| match rule {
        Rule::number => "number".into(),
        Rule::identifier => "variable".into(),
        Rule::EOI => "end of expression".into(),
        Rule::neg | Rule::subtract => "`-`".into(),
        Rule::assign => "`=`".into(),
        Rule::add => "`+`".into(),
        Rule::multiply => "`*`".into(),
        Rule::divide => "`/`".into(),
        Rule::power => "`^`".into(),
        x => format!("{x:?}"),
    });
    ParseError::Syntax(format!(
        "{} at position {}",
        error.variant.message(),
        position + 1
    ))
}

impl ExpressionArena {
    /// Builds linked nodes for `draft` and returns the root.
    ///
    /// Nodes are created through the regular mutation API, so assignments
    /// store their value in the registry. Nothing is left behind on failure.
    pub fn graft(&mut self, draft: &Draft) -> Result<NodeId, ExpressionError> {
        match draft {
            Draft::Constant(value) => Ok(self.constant(*value)),
            Draft::Variable(name) => self.variable(name, None),
            Draft::Binary(rule, lhs, rhs) => {
                let left = self.graft(lhs)?;
                let right = match self.graft(rhs) {
                    Ok(right) => right,
                    Err(error) => {
                        self.remove(left)?;
                        return Err(error);
                    }
                };
                match self.binary(*rule, Some(left), Some(right)) {
                    Ok(binary) => Ok(binary),
                    Err(error) => {
                        self.remove(left)?;
                        self.remove(right)?;
                        Err(error)
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parser(kind: NumberKind) -> ExpressionParser {
        ExpressionParser::new(kind, VariableRegistry::new())
    }

    fn int(value: i32) -> Box<Draft> {
        Box::new(Draft::Constant(Number::Int(value)))
    }

    fn var(name: &str) -> Box<Draft> {
        Box::new(Draft::Variable(name.into()))
    }

    #[test]
    fn precedence() {
        let parsed = parser(NumberKind::Int).parse_segment("a + 2 * b").unwrap();
        assert_eq!(
            parsed,
            Draft::Binary(
                BinaryRule::Addition,
                var("a"),
                Box::new(Draft::Binary(BinaryRule::Multiplication, int(2), var("b")))
            )
        );
    }

    #[test]
    fn subtraction_is_left_associative() {
        let parsed = parser(NumberKind::Int).parse_segment("8 - 3 - 2").unwrap();
        assert_eq!(
            parsed,
            Draft::Binary(
                BinaryRule::Subtraction,
                Box::new(Draft::Binary(BinaryRule::Subtraction, int(8), int(3))),
                int(2)
            )
        );
    }

    #[test]
    fn power_is_right_associative() {
        let parsed = parser(NumberKind::Int).parse_segment("4 ^ 3 ^ 2").unwrap();
        assert_eq!(
            parsed,
            Draft::Binary(
                BinaryRule::Power,
                int(4),
                Box::new(Draft::Binary(BinaryRule::Power, int(3), int(2)))
            )
        );
    }

    #[test]
    fn parentheses_group() {
        let parsed = parser(NumberKind::Int).parse_segment("(a + 1) * 2").unwrap();
        assert_eq!(
            parsed,
            Draft::Binary(
                BinaryRule::Multiplication,
                Box::new(Draft::Binary(BinaryRule::Addition, var("a"), int(1))),
                int(2)
            )
        );
    }

    #[test]
    fn unary_minus() {
        let parser = parser(NumberKind::Int);
        assert_eq!(parser.parse_segment("-3").unwrap(), *int(-3));
        assert_eq!(
            parser.parse_segment("-a").unwrap(),
            Draft::Binary(BinaryRule::Multiplication, int(-1), var("a"))
        );
        assert_eq!(
            parser.parse_segment("2 - -3").unwrap(),
            Draft::Binary(BinaryRule::Subtraction, int(2), int(-3))
        );
        assert_eq!(
            parser.parse_segment("a-2").unwrap(),
            Draft::Binary(BinaryRule::Subtraction, var("a"), int(2))
        );
        assert_eq!(parser.parse_segment("- 3").unwrap(), *int(-3));
        assert_eq!(parser.parse_segment("--3").unwrap(), *int(3));
        // Signed literals are read whole, so the smallest int is reachable.
        assert_eq!(parser.parse_segment("-2147483648").unwrap(), *int(i32::MIN));
        assert!(parser.parse_segment("- 2147483648").is_err());
    }

    #[test]
    fn assignments() {
        let parser = parser(NumberKind::Double);
        assert_eq!(
            parser.parse_segment("x = 2.5").unwrap(),
            Draft::Binary(
                BinaryRule::Assignment,
                var("x"),
                Box::new(Draft::Constant(Number::Double(2.5)))
            )
        );
        for text in ["a + b = 3", "1 = 2", "a = b = 1", "(a = 1) + 2", "-(a = 1)"] {
            assert!(
                matches!(parser.parse_segment(text), Err(ParseError::MalformedAssignment(_))),
                "{text}"
            );
        }
    }

    #[test]
    fn error_classification() {
        let parser = parser(NumberKind::Int);
        assert_eq!(parser.parse_segment(""), Err(ParseError::MissingOperand));
        assert_eq!(parser.parse_segment("   "), Err(ParseError::MissingOperand));
        assert_eq!(parser.parse_segment("a +"), Err(ParseError::MissingOperand));
        assert_eq!(parser.parse_segment("a * (b - "), Err(ParseError::UnbalancedParentheses));
        assert_eq!(parser.parse_segment("a+(b-3"), Err(ParseError::UnbalancedParentheses));
        assert_eq!(parser.parse_segment("a)("), Err(ParseError::UnbalancedParentheses));
        assert!(matches!(parser.parse_segment("a!b"), Err(ParseError::Syntax(_))));
        assert!(matches!(parser.parse_segment("a b"), Err(ParseError::Syntax(_))));
        assert!(matches!(parser.parse_segment("()"), Err(ParseError::Syntax(_))));
    }

    #[test]
    fn literals_follow_the_kind() {
        let parser = parser(NumberKind::Int);
        assert_eq!(
            parser.parse_segment("c = 3.3"),
            Err(ParseError::InvalidLiteral {
                literal: "3.3".into(),
                kind: NumberKind::Int
            })
        );
        // Names read before the failure stay registered.
        assert!(parser.registry.is_registered("c"));

        let float = ExpressionParser::new(NumberKind::Float, VariableRegistry::new());
        assert_eq!(
            float.parse_segment("1e3").unwrap(),
            Draft::Constant(Number::Float(1000.0))
        );
    }

    #[test]
    fn names_after_a_failure_are_not_registered() {
        let parser = parser(NumberKind::Int);
        assert!(parser.parse_segment("a + 1.5 + b").is_err());
        assert!(parser.registry.is_registered("a"));
        assert!(!parser.registry.is_registered("b"));
    }

    #[test]
    fn segments() {
        let parser = parser(NumberKind::Int);
        let results: Vec<_> = parser.segments("a+b;a=1;b=2;c = 3.3").collect();
        assert_eq!(results.len(), 4);
        assert!(results[..3].iter().all(Result::is_ok));
        assert!(results[3].is_err());
        assert!(parser.parse("a;;b").is_err());
        assert_eq!(parser.parse_optional(None), Err(ParseError::NullArgument));

        let commas = ExpressionParser::new(NumberKind::Int, VariableRegistry::new()).with_separator(',');
        assert_eq!(commas.parse("1, 2").unwrap(), vec![*int(1), *int(2)]);
    }

    #[test]
    fn graft_links_nodes_and_assigns() {
        let registry = VariableRegistry::new();
        let parser = ExpressionParser::new(NumberKind::Int, registry.clone());
        let mut arena = ExpressionArena::new(registry.clone());
        let draft = parser.parse_segment("a = 2 * (3 + 4)").unwrap();
        let root = arena.graft(&draft).unwrap();
        assert_eq!(arena.render(root), "a = 2 * (3 + 4)");
        assert_eq!(registry.get("a"), Some(Number::Int(14)));
    }

    #[test]
    fn failed_graft_leaves_nothing_behind() {
        let registry = VariableRegistry::new();
        let parser = ExpressionParser::new(NumberKind::Int, registry.clone());
        let mut arena = ExpressionArena::new(registry);
        let draft = parser.parse_segment("a = 1 / 0").unwrap();
        assert_eq!(arena.graft(&draft), Err(ExpressionError::DivisionByZero));
        assert!(arena.is_empty());
    }

    #[test]
    fn rendering_parses_back() {
        let registry = VariableRegistry::new();
        let parser = ExpressionParser::new(NumberKind::Double, registry.clone());
        let mut arena = ExpressionArena::new(registry);
        for text in [
            "a - (b - c)",
            "(a ^ b) ^ c",
            "a ^ (b ^ c)",
            "-1.0 * (x + y)",
            "x = y / (2.0 * z)",
            "(a + b) * (c - d) / e",
        ] {
            let root = arena.graft(&parser.parse_segment(text).unwrap()).unwrap();
            let rendered = arena.render(root);
            assert_eq!(rendered, text);
            assert_eq!(parser.parse_segment(&rendered).unwrap(), parser.parse_segment(text).unwrap());
        }
    }
}
