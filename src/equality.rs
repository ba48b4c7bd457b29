// ABOUTME: eq?/eqv?/equal? predicates shared by the evaluator, falsey set, and primitives

use std::rc::Rc;

use crate::datum::{CharValue, Datum};

/// Identity-ish comparison: same object for heap types, same bits for
/// immediates. Used by `eq?`.
pub fn eq(a: &Datum, b: &Datum) -> bool {
    match (a, b) {
        (Datum::Symbol(x), Datum::Symbol(y)) => x == y,
        (Datum::Boolean(x), Datum::Boolean(y)) => x == y,
        (Datum::EmptyList, Datum::EmptyList) => true,
        (Datum::Void, Datum::Void) => true,
        (Datum::Character(x), Datum::Character(y)) => x == y,
        (Datum::Number(x), Datum::Number(y)) => x.is_exact() == y.is_exact() && x.numerically_equal(y),
        (Datum::Pair(x), Datum::Pair(y)) => Rc::ptr_eq(x, y),
        (Datum::Vector(x), Datum::Vector(y)) => Rc::ptr_eq(x, y),
        (Datum::Str(x), Datum::Str(y)) => Rc::ptr_eq(x, y),
        (Datum::HashMap(x), Datum::HashMap(y)) => Rc::ptr_eq(x, y),
        (Datum::Procedure(x), Datum::Procedure(y)) => Rc::ptr_eq(x, y),
        (Datum::Delay(x), Datum::Delay(y)) => Rc::ptr_eq(x, y),
        (Datum::Port(x), Datum::Port(y)) => Rc::ptr_eq(x, y),
        (Datum::Object(x), Datum::Object(y)) => Rc::ptr_eq(x, y),
        _ => false,
    }
}

/// `eqv?`: like `eq?` but numbers and characters compare by value
/// regardless of representation identity (spec.md 6 hashable-key rules rely
/// on this distinction too).
pub fn eqv(a: &Datum, b: &Datum) -> bool {
    eq(a, b)
}

/// Deep structural equality, with cycle safety via a visited-pointer set
/// mirroring the printer's cycle guard.
pub fn equal(a: &Datum, b: &Datum) -> bool {
    equal_rec(a, b, &mut Vec::new())
}

fn equal_rec(a: &Datum, b: &Datum, seen: &mut Vec<(*const (), *const ())>) -> bool {
    match (a, b) {
        (Datum::Str(x), Datum::Str(y)) => *x.borrow() == *y.borrow(),
        (Datum::Pair(x), Datum::Pair(y)) => {
            let key = (Rc::as_ptr(x) as *const (), Rc::as_ptr(y) as *const ());
            if seen.contains(&key) {
                return true;
            }
            seen.push(key);
            equal_rec(&x.car.borrow(), &y.car.borrow(), seen) && equal_rec(&x.cdr.borrow(), &y.cdr.borrow(), seen)
        }
        (Datum::Vector(x), Datum::Vector(y)) => {
            let xb = x.borrow();
            let yb = y.borrow();
            xb.len() == yb.len() && xb.iter().zip(yb.iter()).all(|(p, q)| equal_rec(p, q, seen))
        }
        (Datum::Character(CharValue::Ch(x)), Datum::Character(CharValue::Ch(y))) => x == y,
        _ => eqv(a, b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datum::cons;
    use crate::numeric::Number;

    #[test]
    fn equal_sees_through_structure() {
        let a = cons(Datum::Number(Number::from_i64(1)), Datum::EmptyList);
        let b = cons(Datum::Number(Number::from_i64(1)), Datum::EmptyList);
        assert!(equal(&a, &b));
        assert!(!eq(&a, &b));
    }

    #[test]
    fn eqv_compares_numbers_by_value() {
        let a = Datum::Number(Number::from_i64(5));
        let b = Datum::Number(Number::from_i64(5));
        assert!(eqv(&a, &b));
    }
}
