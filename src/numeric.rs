// ABOUTME: The exact integer / exact rational / inexact float numeric tower

use std::cmp::Ordering;
use std::fmt;

use num_bigint::BigInt;
use num_rational::BigRational;
use num_traits::{Signed, ToPrimitive, Zero};

use crate::error::SchemeError;

#[derive(Debug, Clone)]
pub enum Number {
    Integer(BigInt),
    Rational(BigRational),
    Real(f64),
}

/// A hashable, exactly-comparable projection of `Number`, used as a
/// `HashMap` key. Floats hash via their bit pattern; this means `1.0` and
/// `1` are distinct keys, matching `eqv?` rather than `=`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NumberKey {
    Integer(BigInt),
    Rational(BigInt, BigInt),
    Real(u64),
}

impl Number {
    pub fn from_i64(v: i64) -> Number {
        Number::Integer(BigInt::from(v))
    }

    pub fn key(&self) -> NumberKey {
        match self {
            Number::Integer(i) => NumberKey::Integer(i.clone()),
            Number::Rational(r) => NumberKey::Rational(r.numer().clone(), r.denom().clone()),
            Number::Real(f) => NumberKey::Real(f.to_bits()),
        }
    }

    pub fn is_exact(&self) -> bool {
        !matches!(self, Number::Real(_))
    }

    pub fn to_f64(&self) -> f64 {
        match self {
            Number::Integer(i) => i.to_f64().unwrap_or(f64::NAN),
            Number::Rational(r) => r.to_f64().unwrap_or(f64::NAN),
            Number::Real(f) => *f,
        }
    }

    pub fn is_zero(&self) -> bool {
        match self {
            Number::Integer(i) => i.is_zero(),
            Number::Rational(r) => r.is_zero(),
            Number::Real(f) => *f == 0.0,
        }
    }

    pub fn is_negative(&self) -> bool {
        match self {
            Number::Integer(i) => i.is_negative(),
            Number::Rational(r) => r.is_negative(),
            Number::Real(f) => *f < 0.0,
        }
    }

    fn as_rational(&self) -> Option<BigRational> {
        match self {
            Number::Integer(i) => Some(BigRational::from_integer(i.clone())),
            Number::Rational(r) => Some(r.clone()),
            Number::Real(_) => None,
        }
    }

    fn contagion(a: &Number, b: &Number) -> bool {
        matches!(a, Number::Real(_)) || matches!(b, Number::Real(_))
    }

    /// Collapse an exact rational with denominator 1 back to an integer, the
    /// way every Scheme numeric tower normalizes exact arithmetic results.
    fn normalize(r: BigRational) -> Number {
        if r.denom().is_one_signed() {
            Number::Integer(r.numer().clone())
        } else {
            Number::Rational(r)
        }
    }

    pub fn add(&self, other: &Number) -> Number {
        if Self::contagion(self, other) {
            Number::Real(self.to_f64() + other.to_f64())
        } else {
            Self::normalize(self.as_rational().unwrap() + other.as_rational().unwrap())
        }
    }

    pub fn sub(&self, other: &Number) -> Number {
        if Self::contagion(self, other) {
            Number::Real(self.to_f64() - other.to_f64())
        } else {
            Self::normalize(self.as_rational().unwrap() - other.as_rational().unwrap())
        }
    }

    pub fn mul(&self, other: &Number) -> Number {
        if Self::contagion(self, other) {
            Number::Real(self.to_f64() * other.to_f64())
        } else {
            Self::normalize(self.as_rational().unwrap() * other.as_rational().unwrap())
        }
    }

    pub fn div(&self, other: &Number) -> Result<Number, SchemeError> {
        if other.is_zero() && !Self::contagion(self, other) {
            return Err(SchemeError::DivisionByZero);
        }
        if Self::contagion(self, other) {
            Ok(Number::Real(self.to_f64() / other.to_f64()))
        } else {
            Ok(Self::normalize(self.as_rational().unwrap() / other.as_rational().unwrap()))
        }
    }

    pub fn quotient(&self, other: &Number) -> Result<Number, SchemeError> {
        match (self, other) {
            (Number::Integer(a), Number::Integer(b)) => {
                if b.is_zero() {
                    return Err(SchemeError::DivisionByZero);
                }
                Ok(Number::Integer(a / b))
            }
            _ => {
                if other.is_zero() {
                    return Err(SchemeError::DivisionByZero);
                }
                Ok(Number::Real((self.to_f64() / other.to_f64()).trunc()))
            }
        }
    }

    pub fn remainder(&self, other: &Number) -> Result<Number, SchemeError> {
        match (self, other) {
            (Number::Integer(a), Number::Integer(b)) => {
                if b.is_zero() {
                    return Err(SchemeError::DivisionByZero);
                }
                Ok(Number::Integer(a % b))
            }
            _ => {
                if other.is_zero() {
                    return Err(SchemeError::DivisionByZero);
                }
                Ok(Number::Real(self.to_f64() % other.to_f64()))
            }
        }
    }

    pub fn modulo(&self, other: &Number) -> Result<Number, SchemeError> {
        let r = self.remainder(other)?;
        if !r.is_zero() && r.is_negative() != other.is_negative() {
            Ok(r.add(other))
        } else {
            Ok(r)
        }
    }

    pub fn compare(&self, other: &Number) -> Ordering {
        if Self::contagion(self, other) {
            self.to_f64().partial_cmp(&other.to_f64()).unwrap_or(Ordering::Equal)
        } else {
            self.as_rational().unwrap().cmp(&other.as_rational().unwrap())
        }
    }

    pub fn numerically_equal(&self, other: &Number) -> bool {
        self.compare(other) == Ordering::Equal
    }
}

trait IsOneSigned {
    fn is_one_signed(&self) -> bool;
}

impl IsOneSigned for BigInt {
    fn is_one_signed(&self) -> bool {
        *self == BigInt::from(1)
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Number::Integer(i) => write!(f, "{i}"),
            Number::Rational(r) => write!(f, "{}/{}", r.numer(), r.denom()),
            Number::Real(v) => {
                if v.fract() == 0.0 && v.is_finite() {
                    write!(f, "{v:.1}")
                } else {
                    write!(f, "{v}")
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_rational_reduces_to_integer() {
        let a = Number::Integer(BigInt::from(4));
        let b = Number::Integer(BigInt::from(2));
        let result = a.div(&b).unwrap();
        assert!(matches!(result, Number::Integer(_)));
    }

    #[test]
    fn float_contagion_spreads() {
        let a = Number::Integer(BigInt::from(1));
        let b = Number::Real(2.0);
        assert!(matches!(a.add(&b), Number::Real(_)));
    }

    #[test]
    fn division_by_exact_zero_errors() {
        let a = Number::Integer(BigInt::from(1));
        let b = Number::Integer(BigInt::from(0));
        assert!(a.div(&b).is_err());
    }

    #[test]
    fn modulo_takes_divisor_sign() {
        let a = Number::Integer(BigInt::from(-7));
        let b = Number::Integer(BigInt::from(3));
        let m = a.modulo(&b).unwrap();
        assert_eq!(m.compare(&Number::Integer(BigInt::from(2))), Ordering::Equal);
    }
}
