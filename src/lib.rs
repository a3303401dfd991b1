//! Arithmetic expression trees with shared variables.
//!
//! # Why?
//!
//! Editing a list of expressions interactively means trees are constantly
//! rebuilt, re-parented and thrown away, while every occurrence of a variable
//! must agree on a single value. Nodes therefore live in an
//! [`ExpressionArena`] with checked parent links, and variables resolve their
//! values through a [`VariableRegistry`] shared by every tree of a model.
//! Assignments write into that registry as soon as their right side can be
//! evaluated.
//!
//! # Example
//!
//! ```rust
//! use expression_model::*;
//!
//! let mut model = ExpressionsModel::with_kind(NumberKind::Int);
//! model.parse("a = 2; b = a * (3 + 4); b ^ 2").unwrap();
//!
//! let last = model.all_expressions()[2];
//! assert_eq!(model.render(last), "b ^ 2");
//! assert_eq!(model.arena().value(last).unwrap(), Number::Int(196));
//! assert_eq!(model.variables()["b"], Some(Number::Int(14)));
//! ```

mod error;
mod evaluate;
mod expression;
mod model;
mod number;
mod parse;
mod registry;

/// Uses the [`pest`] parsing expression grammar language.
///
/// ```text
#[doc = include_str!("grammar.pest")]
/// ```
pub mod grammar_doc {}

pub use error::*;
pub use expression::*;
pub use model::*;
pub use number::*;
pub use parse::{Draft, ExpressionParser, DEFAULT_SEPARATOR};
pub use registry::VariableRegistry;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn evaluate(kind: NumberKind, text: &str) -> Result<Number, ExpressionError> {
        let registry = VariableRegistry::new();
        let parser = ExpressionParser::new(kind, registry.clone());
        let mut arena = ExpressionArena::new(registry);
        let mut last = None;
        for draft in parser.parse(text).unwrap() {
            last = Some(arena.graft(&draft)?);
        }
        arena.value(last.unwrap())
    }

    #[test]
    fn op_precedence() {
        assert_eq!(evaluate(NumberKind::Int, "1 * 2 + 3 * 4"), Ok(Number::Int(14)));
        assert_eq!(evaluate(NumberKind::Int, "8 / 4 * 3"), Ok(Number::Int(6)));
        assert_eq!(evaluate(NumberKind::Int, "4 ^ 3 ^ 2"), Ok(Number::Int(262144)));
        assert_eq!(evaluate(NumberKind::Int, "-2 ^ 2"), Ok(Number::Int(4)));
        assert_eq!(evaluate(NumberKind::Int, "-(2 ^ 2)"), Ok(Number::Int(-4)));
        assert_eq!(evaluate(NumberKind::Float, "7 / 2"), Ok(Number::Float(3.5)));
        assert_eq!(evaluate(NumberKind::Int, "7 / 2"), Ok(Number::Int(3)));
    }

    #[test]
    fn variables_flow_between_segments() {
        assert_eq!(
            evaluate(NumberKind::Double, "x = 1.5; y = x * 2; y - x"),
            Ok(Number::Double(1.5))
        );
        assert_eq!(
            evaluate(NumberKind::Int, "a = 1; a = 2; a"),
            Ok(Number::Int(2))
        );
        assert_eq!(evaluate(NumberKind::Int, "z + 1"), Err(ExpressionError::NoValueYet));
        assert_eq!(evaluate(NumberKind::Int, "1 / (2 - 2)"), Err(ExpressionError::DivisionByZero));
    }

    #[test]
    fn conflicting_variable_values() {
        let mut arena = ExpressionArena::new(VariableRegistry::new());
        let first = arena.variable("n", Some(Number::Int(1))).unwrap();
        assert!(matches!(
            arena.variable("n", Some(Number::Int(2))),
            Err(ExpressionError::ConflictingVariableValue { .. })
        ));
        let second = arena.variable("n", Some(Number::Int(1))).unwrap();
        for id in [first, second] {
            assert!(arena.has_value(id));
            assert_eq!(arena.value(id).unwrap(), Number::Int(1));
        }
    }

    #[test]
    fn registries_are_independent() {
        let mut first = ExpressionsModel::default();
        let second = ExpressionsModel::default();
        first.parse("shared = 3").unwrap();
        assert!(second.variables().is_empty());
        assert_eq!(first.variables()["shared"], Some(Number::Int(3)));
    }

    fn rule() -> impl Strategy<Value = BinaryRule> {
        prop::sample::select(BinaryRule::ALL.to_vec())
    }

    proptest! {
        #[test]
        fn binaries_render_their_symbol_and_refuse_cycles(rule in rule(), inner in rule(), value in -100i32..100) {
            let mut arena = ExpressionArena::new(VariableRegistry::new());
            let x = arena.variable("x", None).unwrap();
            let constant = arena.constant(Number::Int(value));
            let e = arena.binary(rule, Some(x), Some(constant)).unwrap();
            prop_assert!(arena.render(e).contains(rule.symbol()));

            // Assignments can't be operands at all, so only other rules nest.
            if rule != BinaryRule::Assignment && inner != BinaryRule::Assignment {
                let y = arena.variable("y", None).unwrap();
                let descendant = arena.binary(inner, Some(y), None).unwrap();
                arena.set_right(e, Some(descendant)).unwrap();
                prop_assert_eq!(arena.set_parent(e, Some(descendant)), Err(ExpressionError::CyclicParent));
                prop_assert_eq!(arena.parent(e).unwrap(), None);
            }
        }

        #[test]
        fn rendering_parses_back_to_the_same_tree(a in 0i32..50, b in 0i32..50, c in 1i32..50, rules in prop::collection::vec(rule(), 3)) {
            let rules: Vec<_> = rules.into_iter().filter(|rule| *rule != BinaryRule::Assignment).collect();
            prop_assume!(rules.len() == 3);
            let text = format!(
                "x {} {a} {} ({b} {} {c})",
                rules[0].symbol(),
                rules[1].symbol(),
                rules[2].symbol()
            );
            let registry = VariableRegistry::new();
            let parser = ExpressionParser::new(NumberKind::Int, registry.clone());
            let mut arena = ExpressionArena::new(registry);
            let draft = parser.parse_segment(&text).unwrap();
            let root = arena.graft(&draft).unwrap();
            prop_assert_eq!(parser.parse_segment(&arena.render(root)).unwrap(), draft);
        }
    }
}
