use std::fmt;
use std::str::FromStr;

use num_traits::Float;

use crate::error::{ExpressionError, ModelError, ParseError};
use crate::expression::BinaryRule;

/// The numeric kind selected for a whole parser or model (the "specimen").
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum NumberKind {
    /// 32 bit signed integers.
    #[default]
    Int,
    /// Single precision floats.
    Float,
    /// Double precision floats.
    Double,
}

impl NumberKind {
    pub const ALL: [NumberKind; 3] = [NumberKind::Int, NumberKind::Float, NumberKind::Double];

    /// Name used in `type` lines of saved files.
    pub fn name(self) -> &'static str {
        match self {
            Self::Int => "int",
            Self::Float => "float",
            Self::Double => "double",
        }
    }

    pub fn one(self) -> Number {
        match self {
            Self::Int => Number::Int(1),
            Self::Float => Number::Float(1.0),
            Self::Double => Number::Double(1.0),
        }
    }

    /// Converts a numeric literal according to this kind's literal grammar.
    ///
    /// Integer literals must not carry a fraction or an exponent, and must fit
    /// in 32 bits. Float literals must stay finite.
    pub fn parse_literal(self, literal: &str) -> Result<Number, ParseError> {
        let invalid = || ParseError::InvalidLiteral {
            literal: literal.to_string(),
            kind: self,
        };
        match self {
            Self::Int => literal.parse::<i32>().map(Number::Int).map_err(|_| invalid()),
            Self::Float => literal
                .parse::<f32>()
                .ok()
                .filter(|value| value.is_finite())
                .map(Number::Float)
                .ok_or_else(invalid),
            Self::Double => literal
                .parse::<f64>()
                .ok()
                .filter(|value| value.is_finite())
                .map(Number::Double)
                .ok_or_else(invalid),
        }
    }
}

impl fmt::Display for NumberKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for NumberKind {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "int" => Ok(Self::Int),
            "float" => Ok(Self::Float),
            "double" => Ok(Self::Double),
            _ => Err(ModelError::UnsupportedNumberKind(s.to_string())),
        }
    }
}

/// A value of one of the supported numeric kinds.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Number {
    Int(i32),
    Float(f32),
    Double(f64),
}

impl Number {
    pub fn kind(self) -> NumberKind {
        match self {
            Self::Int(_) => NumberKind::Int,
            Self::Float(_) => NumberKind::Float,
            Self::Double(_) => NumberKind::Double,
        }
    }

    /// Unary minus with the kind's native semantics (integers wrap).
    pub fn negate(self) -> Self {
        match self {
            Self::Int(value) => Self::Int(value.wrapping_neg()),
            Self::Float(value) => Self::Float(-value),
            Self::Double(value) => Self::Double(-value),
        }
    }

    /// Applies `rule` to two operands of the same kind.
    ///
    /// Assignment yields the right operand. Integer arithmetic wraps on
    /// overflow and refuses to divide by zero; floats follow IEEE 754.
    pub fn operate(rule: BinaryRule, lhs: Self, rhs: Self) -> Result<Self, ExpressionError> {
        match (lhs, rhs) {
            (Self::Int(lhs), Self::Int(rhs)) => integer_op(rule, lhs, rhs).map(Self::Int),
            (Self::Float(lhs), Self::Float(rhs)) => Ok(Self::Float(float_op(rule, lhs, rhs))),
            (Self::Double(lhs), Self::Double(rhs)) => Ok(Self::Double(float_op(rule, lhs, rhs))),
            (lhs, rhs) => Err(ExpressionError::UnsupportedNumericKind {
                expected: lhs.kind(),
                found: rhs.kind(),
            }),
        }
    }

    /// Text the parser reads back as this value.
    ///
    /// Non finite floats have no literal, so they are written as a
    /// parenthesized division that evaluates to them.
    pub fn source(self) -> String {
        match self {
            Self::Float(value) => float_source(value),
            Self::Double(value) => float_source(value),
            Self::Int(_) => self.to_string(),
        }
    }
}

fn float_source<F: Float + fmt::Debug>(value: F) -> String {
    if value.is_nan() {
        "(0.0 / 0.0)".into()
    } else if value.is_infinite() && value.is_sign_negative() {
        "(-1.0 / 0.0)".into()
    } else if value.is_infinite() {
        "(1.0 / 0.0)".into()
    } else {
        format!("{value:?}")
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Debug output of floats always keeps a fraction or an exponent.
        match self {
            Self::Int(value) => write!(f, "{value}"),
            Self::Float(value) => write!(f, "{value:?}"),
            Self::Double(value) => write!(f, "{value:?}"),
        }
    }
}

fn integer_op(rule: BinaryRule, lhs: i32, rhs: i32) -> Result<i32, ExpressionError> {
    match rule {
        BinaryRule::Assignment => Ok(rhs),
        BinaryRule::Addition => Ok(lhs.wrapping_add(rhs)),
        BinaryRule::Subtraction => Ok(lhs.wrapping_sub(rhs)),
        BinaryRule::Multiplication => Ok(lhs.wrapping_mul(rhs)),
        BinaryRule::Division => {
            if rhs == 0 {
                return Err(ExpressionError::DivisionByZero);
            }
            Ok(lhs.wrapping_div(rhs))
        }
        BinaryRule::Power => integer_power(lhs, rhs),
    }
}

fn integer_power(base: i32, exponent: i32) -> Result<i32, ExpressionError> {
    if exponent >= 0 {
        return Ok(base.wrapping_pow(exponent as u32));
    }
    // Negative exponents truncate toward zero.
    match base {
        0 => Err(ExpressionError::DivisionByZero),
        1 => Ok(1),
        -1 if exponent % 2 == 0 => Ok(1),
        -1 => Ok(-1),
        _ => Ok(0),
    }
}

fn float_op<F: Float>(rule: BinaryRule, lhs: F, rhs: F) -> F {
    match rule {
        BinaryRule::Assignment => rhs,
        BinaryRule::Addition => lhs + rhs,
        BinaryRule::Subtraction => lhs - rhs,
        BinaryRule::Multiplication => lhs * rhs,
        BinaryRule::Division => lhs / rhs,
        BinaryRule::Power => lhs.powf(rhs),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_arithmetic() {
        use BinaryRule::*;
        let op = |rule, lhs, rhs| Number::operate(rule, Number::Int(lhs), Number::Int(rhs));
        assert_eq!(op(Addition, 2, 3).unwrap(), Number::Int(5));
        assert_eq!(op(Subtraction, 2, 3).unwrap(), Number::Int(-1));
        assert_eq!(op(Multiplication, 4, 3).unwrap(), Number::Int(12));
        assert_eq!(op(Division, 7, 2).unwrap(), Number::Int(3));
        assert_eq!(op(Division, -7, 2).unwrap(), Number::Int(-3));
        assert_eq!(op(Power, 2, 10).unwrap(), Number::Int(1024));
        assert_eq!(op(Power, 2, -1).unwrap(), Number::Int(0));
        assert_eq!(op(Power, -1, -3).unwrap(), Number::Int(-1));
        assert_eq!(op(Addition, i32::MAX, 1).unwrap(), Number::Int(i32::MIN));
        assert_eq!(op(Division, i32::MIN, -1).unwrap(), Number::Int(i32::MIN));
    }

    #[test]
    fn integer_division_by_zero_fails() {
        let result = Number::operate(BinaryRule::Division, Number::Int(1), Number::Int(0));
        assert!(matches!(result, Err(ExpressionError::DivisionByZero)));
        let result = Number::operate(BinaryRule::Power, Number::Int(0), Number::Int(-2));
        assert!(matches!(result, Err(ExpressionError::DivisionByZero)));
    }

    #[test]
    fn float_division_by_zero_is_not_an_error() {
        let result =
            Number::operate(BinaryRule::Division, Number::Double(1.0), Number::Double(0.0))
                .unwrap();
        assert_eq!(result, Number::Double(f64::INFINITY));
        let result =
            Number::operate(BinaryRule::Division, Number::Float(0.0), Number::Float(0.0)).unwrap();
        match result {
            Number::Float(value) => assert!(value.is_nan()),
            other => panic!("Unexpected {other:?}"),
        }
    }

    #[test]
    fn float_power() {
        let result =
            Number::operate(BinaryRule::Power, Number::Double(4.0), Number::Double(0.5)).unwrap();
        assert_eq!(result, Number::Double(2.0));
    }

    #[test]
    fn mixed_kinds_are_rejected() {
        let result = Number::operate(BinaryRule::Addition, Number::Int(1), Number::Float(1.0));
        assert!(matches!(
            result,
            Err(ExpressionError::UnsupportedNumericKind {
                expected: NumberKind::Int,
                found: NumberKind::Float
            })
        ));
    }

    #[test]
    fn literals_follow_the_kind() {
        assert_eq!(NumberKind::Int.parse_literal("42").unwrap(), Number::Int(42));
        assert!(NumberKind::Int.parse_literal("3.3").is_err());
        assert!(NumberKind::Int.parse_literal("1e3").is_err());
        assert!(NumberKind::Int.parse_literal("99999999999").is_err());
        assert_eq!(NumberKind::Int.parse_literal("-2147483648").unwrap(), Number::Int(i32::MIN));
        assert!(NumberKind::Double.parse_literal("1e999").is_err());
        assert!(NumberKind::Float.parse_literal("1e39").is_err());
        assert_eq!(NumberKind::Float.parse_literal("3.3").unwrap(), Number::Float(3.3));
        assert_eq!(NumberKind::Double.parse_literal(".5").unwrap(), Number::Double(0.5));
        assert_eq!(NumberKind::Double.parse_literal("2").unwrap(), Number::Double(2.0));
    }

    #[test]
    fn rendering() {
        assert_eq!(Number::Int(-3).to_string(), "-3");
        assert_eq!(Number::Float(3.3).to_string(), "3.3");
        assert_eq!(Number::Double(1.0).to_string(), "1.0");
        assert_eq!(Number::Double(1.0).source(), "1.0");
        assert_eq!(Number::Int(i32::MIN).source(), "-2147483648");
        assert_eq!(Number::Double(f64::INFINITY).source(), "(1.0 / 0.0)");
        assert_eq!(Number::Float(f32::NEG_INFINITY).source(), "(-1.0 / 0.0)");
        assert_eq!(Number::Double(f64::NAN).source(), "(0.0 / 0.0)");
    }

    #[test]
    fn kind_names() {
        for kind in NumberKind::ALL {
            assert_eq!(kind.name().parse::<NumberKind>().unwrap(), kind);
        }
        assert_eq!(" Double ".parse::<NumberKind>().unwrap(), NumberKind::Double);
        assert!("long".parse::<NumberKind>().is_err());
    }
}
