// ABOUTME: The small primitive set the core needs to run itself, plus the minimal arithmetic/list/predicate surface spec.md's end-to-end scenarios exercise

use std::rc::Rc;

use crate::datum::{cons, intern, list_to_vec, vec_to_list, Datum, PrimitiveProcedure, Procedure, Symbol};
use crate::env::Environment;
use crate::equality::{eq, equal, eqv};
use crate::error::SchemeError;
use crate::numeric::Number;

fn install_one(env: &Rc<Environment>, name: &str, func: fn(&mut Vec<Datum>, &Rc<Environment>) -> Result<Datum, SchemeError>) {
    let sym: Symbol = intern(name);
    let proc = Procedure::Primitive(Rc::new(PrimitiveProcedure { name: sym.clone(), func }));
    env.define(sym, Datum::Procedure(Rc::new(proc)));
}

/// Install every primitive this core needs into `env` (normally the global
/// environment, but `null-environment`-style resets use this too).
pub fn install(env: &Rc<Environment>) {
    // The handful the core itself requires (spec.md 1, 6).
    install_one(env, "apply", prim_apply);
    install_one(env, "force", prim_force);
    install_one(env, "eval", prim_eval);
    install_one(env, "cons", prim_cons);
    install_one(env, "list", prim_list);

    // Arithmetic.
    install_one(env, "+", prim_add);
    install_one(env, "-", prim_sub);
    install_one(env, "*", prim_mul);
    install_one(env, "/", prim_div);
    install_one(env, "=", prim_num_eq);
    install_one(env, "<", prim_lt);
    install_one(env, ">", prim_gt);
    install_one(env, "<=", prim_le);
    install_one(env, ">=", prim_ge);
    install_one(env, "zero?", prim_zero_p);
    install_one(env, "even?", prim_even_p);
    install_one(env, "odd?", prim_odd_p);
    install_one(env, "quotient", prim_quotient);
    install_one(env, "remainder", prim_remainder);
    install_one(env, "modulo", prim_modulo);

    // List predicates/accessors.
    install_one(env, "cons?", prim_pair_p);
    install_one(env, "pair?", prim_pair_p);
    install_one(env, "null?", prim_null_p);
    install_one(env, "car", prim_car);
    install_one(env, "cdr", prim_cdr);
    install_one(env, "set-car!", prim_set_car);
    install_one(env, "set-cdr!", prim_set_cdr);
    install_one(env, "length", prim_length);
    install_one(env, "reverse", prim_reverse);
    install_one(env, "append", prim_append);
    install_one(env, "memv", prim_memv);
    install_one(env, "list->vector", prim_list_to_vector);
    install_one(env, "vector->list", prim_vector_to_list);

    // Streams (spec.md 4.1 scons/stream).
    install_one(env, "scar", prim_scar);
    install_one(env, "scdr", prim_scdr);

    // Equality.
    install_one(env, "eq?", prim_eq_p);
    install_one(env, "eqv?", prim_eqv_p);
    install_one(env, "equal?", prim_equal_p);

    // Type predicates.
    install_one(env, "number?", prim_number_p);
    install_one(env, "string?", prim_string_p);
    install_one(env, "symbol?", prim_symbol_p);
    install_one(env, "boolean?", prim_boolean_p);
    install_one(env, "char?", prim_char_p);
    install_one(env, "vector?", prim_vector_p);
    install_one(env, "procedure?", prim_procedure_p);
    install_one(env, "hash-map?", prim_hash_map_p);
    install_one(env, "void?", prim_void_p);

    // Falsey-set configuration (spec.md 3, 8 property 6).
    install_one(env, "set-falsey!", prim_set_falsey);
    install_one(env, "set-truthy!", prim_set_truthy);

    // Non-local control flow (spec.md 5, 7).
    install_one(env, "exit", prim_exit);
    install_one(env, "jump!", prim_jump);
    install_one(env, "error", prim_error);
}

fn want_n(name: &str, args: &[Datum], n: usize) -> Result<(), SchemeError> {
    if args.len() != n {
        return Err(SchemeError::arity(name, &n.to_string(), args.len()));
    }
    Ok(())
}

fn as_number<'a>(d: &'a Datum, context: &str) -> Result<&'a Number, SchemeError> {
    match d {
        Datum::Number(n) => Ok(n),
        other => Err(SchemeError::type_error("number", other, context)),
    }
}

fn prim_add(args: &mut Vec<Datum>, _env: &Rc<Environment>) -> Result<Datum, SchemeError> {
    let mut acc = Number::from_i64(0);
    for a in args.iter() {
        acc = acc.add(as_number(a, "+")?);
    }
    Ok(Datum::Number(acc))
}

fn prim_sub(args: &mut Vec<Datum>, _env: &Rc<Environment>) -> Result<Datum, SchemeError> {
    if args.is_empty() {
        return Err(SchemeError::arity("-", "at least 1", 0));
    }
    let first = as_number(&args[0], "-")?.clone();
    if args.len() == 1 {
        return Ok(Datum::Number(Number::from_i64(0).sub(&first)));
    }
    let mut acc = first;
    for a in &args[1..] {
        acc = acc.sub(as_number(a, "-")?);
    }
    Ok(Datum::Number(acc))
}

fn prim_mul(args: &mut Vec<Datum>, _env: &Rc<Environment>) -> Result<Datum, SchemeError> {
    let mut acc = Number::from_i64(1);
    for a in args.iter() {
        acc = acc.mul(as_number(a, "*")?);
    }
    Ok(Datum::Number(acc))
}

fn prim_div(args: &mut Vec<Datum>, _env: &Rc<Environment>) -> Result<Datum, SchemeError> {
    if args.is_empty() {
        return Err(SchemeError::arity("/", "at least 1", 0));
    }
    let first = as_number(&args[0], "/")?.clone();
    if args.len() == 1 {
        return Ok(Datum::Number(Number::from_i64(1).div(&first)?));
    }
    let mut acc = first;
    for a in &args[1..] {
        acc = acc.div(as_number(a, "/")?)?;
    }
    Ok(Datum::Number(acc))
}

fn chained_compare(name: &str, args: &[Datum], ok: impl Fn(std::cmp::Ordering) -> bool) -> Result<Datum, SchemeError> {
    for pair in args.windows(2) {
        let a = as_number(&pair[0], name)?;
        let b = as_number(&pair[1], name)?;
        if !ok(a.compare(b)) {
            return Ok(Datum::Boolean(false));
        }
    }
    Ok(Datum::Boolean(true))
}

fn prim_num_eq(args: &mut Vec<Datum>, _env: &Rc<Environment>) -> Result<Datum, SchemeError> {
    chained_compare("=", args, |o| o == std::cmp::Ordering::Equal)
}
fn prim_lt(args: &mut Vec<Datum>, _env: &Rc<Environment>) -> Result<Datum, SchemeError> {
    chained_compare("<", args, |o| o == std::cmp::Ordering::Less)
}
fn prim_gt(args: &mut Vec<Datum>, _env: &Rc<Environment>) -> Result<Datum, SchemeError> {
    chained_compare(">", args, |o| o == std::cmp::Ordering::Greater)
}
fn prim_le(args: &mut Vec<Datum>, _env: &Rc<Environment>) -> Result<Datum, SchemeError> {
    chained_compare("<=", args, |o| o != std::cmp::Ordering::Greater)
}
fn prim_ge(args: &mut Vec<Datum>, _env: &Rc<Environment>) -> Result<Datum, SchemeError> {
    chained_compare(">=", args, |o| o != std::cmp::Ordering::Less)
}

fn prim_zero_p(args: &mut Vec<Datum>, _env: &Rc<Environment>) -> Result<Datum, SchemeError> {
    want_n("zero?", args, 1)?;
    Ok(Datum::Boolean(as_number(&args[0], "zero?")?.is_zero()))
}

fn prim_even_p(args: &mut Vec<Datum>, _env: &Rc<Environment>) -> Result<Datum, SchemeError> {
    want_n("even?", args, 1)?;
    let n = as_number(&args[0], "even?")?;
    Ok(Datum::Boolean(n.modulo(&Number::from_i64(2))?.is_zero()))
}

fn prim_odd_p(args: &mut Vec<Datum>, _env: &Rc<Environment>) -> Result<Datum, SchemeError> {
    want_n("odd?", args, 1)?;
    let n = as_number(&args[0], "odd?")?;
    Ok(Datum::Boolean(!n.modulo(&Number::from_i64(2))?.is_zero()))
}

fn prim_quotient(args: &mut Vec<Datum>, _env: &Rc<Environment>) -> Result<Datum, SchemeError> {
    want_n("quotient", args, 2)?;
    Ok(Datum::Number(as_number(&args[0], "quotient")?.quotient(as_number(&args[1], "quotient")?)?))
}

fn prim_remainder(args: &mut Vec<Datum>, _env: &Rc<Environment>) -> Result<Datum, SchemeError> {
    want_n("remainder", args, 2)?;
    Ok(Datum::Number(as_number(&args[0], "remainder")?.remainder(as_number(&args[1], "remainder")?)?))
}

fn prim_modulo(args: &mut Vec<Datum>, _env: &Rc<Environment>) -> Result<Datum, SchemeError> {
    want_n("modulo", args, 2)?;
    Ok(Datum::Number(as_number(&args[0], "modulo")?.modulo(as_number(&args[1], "modulo")?)?))
}

fn prim_cons(args: &mut Vec<Datum>, _env: &Rc<Environment>) -> Result<Datum, SchemeError> {
    want_n("cons", args, 2)?;
    let cdr = args.pop().unwrap();
    let car = args.pop().unwrap();
    Ok(cons(car, cdr))
}

fn prim_list(args: &mut Vec<Datum>, _env: &Rc<Environment>) -> Result<Datum, SchemeError> {
    Ok(vec_to_list(std::mem::take(args)))
}

fn prim_pair_p(args: &mut Vec<Datum>, _env: &Rc<Environment>) -> Result<Datum, SchemeError> {
    want_n("pair?", args, 1)?;
    Ok(Datum::Boolean(args[0].is_pair()))
}

fn prim_null_p(args: &mut Vec<Datum>, _env: &Rc<Environment>) -> Result<Datum, SchemeError> {
    want_n("null?", args, 1)?;
    Ok(Datum::Boolean(matches!(args[0], Datum::EmptyList)))
}

fn prim_car(args: &mut Vec<Datum>, _env: &Rc<Environment>) -> Result<Datum, SchemeError> {
    want_n("car", args, 1)?;
    match &args[0] {
        Datum::Pair(p) => Ok(p.car.borrow().clone()),
        other => Err(SchemeError::type_error("pair", other, "car")),
    }
}

fn prim_cdr(args: &mut Vec<Datum>, _env: &Rc<Environment>) -> Result<Datum, SchemeError> {
    want_n("cdr", args, 1)?;
    match &args[0] {
        Datum::Pair(p) => Ok(p.cdr.borrow().clone()),
        other => Err(SchemeError::type_error("pair", other, "cdr")),
    }
}

fn prim_set_car(args: &mut Vec<Datum>, _env: &Rc<Environment>) -> Result<Datum, SchemeError> {
    want_n("set-car!", args, 2)?;
    match &args[0] {
        Datum::Pair(p) => {
            *p.car.borrow_mut() = args[1].clone();
            Ok(Datum::Void)
        }
        other => Err(SchemeError::type_error("pair", other, "set-car!")),
    }
}

fn prim_set_cdr(args: &mut Vec<Datum>, _env: &Rc<Environment>) -> Result<Datum, SchemeError> {
    want_n("set-cdr!", args, 2)?;
    match &args[0] {
        Datum::Pair(p) => {
            *p.cdr.borrow_mut() = args[1].clone();
            Ok(Datum::Void)
        }
        other => Err(SchemeError::type_error("pair", other, "set-cdr!")),
    }
}

fn prim_length(args: &mut Vec<Datum>, _env: &Rc<Environment>) -> Result<Datum, SchemeError> {
    want_n("length", args, 1)?;
    if let crate::datum::ListShape::Cyclic = args[0].list_shape() {
        return Err(SchemeError::Cycle("length".to_string()));
    }
    Ok(Datum::Number(Number::from_i64(list_to_vec(&args[0])?.len() as i64)))
}

fn prim_reverse(args: &mut Vec<Datum>, _env: &Rc<Environment>) -> Result<Datum, SchemeError> {
    want_n("reverse", args, 1)?;
    let mut items = list_to_vec(&args[0])?;
    items.reverse();
    Ok(vec_to_list(items))
}

fn prim_append(args: &mut Vec<Datum>, _env: &Rc<Environment>) -> Result<Datum, SchemeError> {
    if args.is_empty() {
        return Ok(Datum::EmptyList);
    }
    let last = args.pop().unwrap();
    let mut items = Vec::new();
    for a in args.iter() {
        items.extend(list_to_vec(a)?);
    }
    Ok(crate::datum::vec_to_improper_list(items, last))
}

fn prim_memv(args: &mut Vec<Datum>, _env: &Rc<Environment>) -> Result<Datum, SchemeError> {
    want_n("memv", args, 2)?;
    let needle = args[0].clone();
    let mut cur = args[1].clone();
    loop {
        match cur {
            Datum::Pair(p) => {
                if eqv(&p.car.borrow(), &needle) {
                    return Ok(Datum::Pair(p));
                }
                let next = p.cdr.borrow().clone();
                cur = next;
            }
            _ => return Ok(Datum::Boolean(false)),
        }
    }
}

fn prim_list_to_vector(args: &mut Vec<Datum>, _env: &Rc<Environment>) -> Result<Datum, SchemeError> {
    want_n("list->vector", args, 1)?;
    Ok(Datum::vector(list_to_vec(&args[0])?))
}

fn prim_vector_to_list(args: &mut Vec<Datum>, _env: &Rc<Environment>) -> Result<Datum, SchemeError> {
    want_n("vector->list", args, 1)?;
    match &args[0] {
        Datum::Vector(v) => Ok(vec_to_list(v.borrow().clone())),
        other => Err(SchemeError::type_error("vector", other, "vector->list")),
    }
}

/// `(scar s)` / `(scdr s)`: stream accessors, forcing the promise in the cdr
/// half of an `scons` pair (spec.md 4.1, 8's `scons`/`scar`/`scdr` scenario).
fn prim_scar(args: &mut Vec<Datum>, _env: &Rc<Environment>) -> Result<Datum, SchemeError> {
    want_n("scar", args, 1)?;
    match &args[0] {
        Datum::Pair(p) => crate::eval::force(&p.car.borrow()),
        other => Err(SchemeError::type_error("stream pair", other, "scar")),
    }
}

fn prim_scdr(args: &mut Vec<Datum>, _env: &Rc<Environment>) -> Result<Datum, SchemeError> {
    want_n("scdr", args, 1)?;
    match &args[0] {
        Datum::Pair(p) => crate::eval::force(&p.cdr.borrow()),
        other => Err(SchemeError::type_error("stream pair", other, "scdr")),
    }
}

fn prim_eq_p(args: &mut Vec<Datum>, _env: &Rc<Environment>) -> Result<Datum, SchemeError> {
    want_n("eq?", args, 2)?;
    Ok(Datum::Boolean(eq(&args[0], &args[1])))
}

fn prim_eqv_p(args: &mut Vec<Datum>, _env: &Rc<Environment>) -> Result<Datum, SchemeError> {
    want_n("eqv?", args, 2)?;
    Ok(Datum::Boolean(eqv(&args[0], &args[1])))
}

fn prim_equal_p(args: &mut Vec<Datum>, _env: &Rc<Environment>) -> Result<Datum, SchemeError> {
    want_n("equal?", args, 2)?;
    Ok(Datum::Boolean(equal(&args[0], &args[1])))
}

fn type_pred(name: &'static str, check: fn(&Datum) -> bool) -> impl Fn(&mut Vec<Datum>, &Rc<Environment>) -> Result<Datum, SchemeError> {
    move |args: &mut Vec<Datum>, _env: &Rc<Environment>| {
        want_n(name, args, 1)?;
        Ok(Datum::Boolean(check(&args[0])))
    }
}

fn prim_number_p(args: &mut Vec<Datum>, env: &Rc<Environment>) -> Result<Datum, SchemeError> {
    type_pred("number?", |d| matches!(d, Datum::Number(_)))(args, env)
}
fn prim_string_p(args: &mut Vec<Datum>, env: &Rc<Environment>) -> Result<Datum, SchemeError> {
    type_pred("string?", |d| matches!(d, Datum::Str(_)))(args, env)
}
fn prim_symbol_p(args: &mut Vec<Datum>, env: &Rc<Environment>) -> Result<Datum, SchemeError> {
    type_pred("symbol?", |d| matches!(d, Datum::Symbol(_)))(args, env)
}
fn prim_boolean_p(args: &mut Vec<Datum>, env: &Rc<Environment>) -> Result<Datum, SchemeError> {
    type_pred("boolean?", |d| matches!(d, Datum::Boolean(_)))(args, env)
}
fn prim_char_p(args: &mut Vec<Datum>, env: &Rc<Environment>) -> Result<Datum, SchemeError> {
    type_pred("char?", |d| matches!(d, Datum::Character(_)))(args, env)
}
fn prim_vector_p(args: &mut Vec<Datum>, env: &Rc<Environment>) -> Result<Datum, SchemeError> {
    type_pred("vector?", |d| matches!(d, Datum::Vector(_)))(args, env)
}
fn prim_procedure_p(args: &mut Vec<Datum>, env: &Rc<Environment>) -> Result<Datum, SchemeError> {
    type_pred("procedure?", |d| matches!(d, Datum::Procedure(_)))(args, env)
}
fn prim_hash_map_p(args: &mut Vec<Datum>, env: &Rc<Environment>) -> Result<Datum, SchemeError> {
    type_pred("hash-map?", |d| matches!(d, Datum::HashMap(_)))(args, env)
}
fn prim_void_p(args: &mut Vec<Datum>, env: &Rc<Environment>) -> Result<Datum, SchemeError> {
    type_pred("void?", |d| matches!(d, Datum::Void))(args, env)
}

fn prim_set_falsey(args: &mut Vec<Datum>, _env: &Rc<Environment>) -> Result<Datum, SchemeError> {
    want_n("set-falsey!", args, 1)?;
    crate::env::set_falsey(args[0].clone())?;
    Ok(Datum::Void)
}

fn prim_set_truthy(args: &mut Vec<Datum>, _env: &Rc<Environment>) -> Result<Datum, SchemeError> {
    want_n("set-truthy!", args, 1)?;
    crate::env::set_truthy(&args[0])?;
    Ok(Datum::Void)
}

fn prim_exit(args: &mut Vec<Datum>, _env: &Rc<Environment>) -> Result<Datum, SchemeError> {
    let code = match args.first() {
        Some(Datum::Number(n)) => n.to_f64() as i32,
        _ => 0,
    };
    Err(SchemeError::Exit(code))
}

fn prim_jump(args: &mut Vec<Datum>, _env: &Rc<Environment>) -> Result<Datum, SchemeError> {
    let v = args.first().cloned().unwrap_or(Datum::Void);
    Err(SchemeError::Jump(v))
}

fn prim_error(args: &mut Vec<Datum>, _env: &Rc<Environment>) -> Result<Datum, SchemeError> {
    let msg = args.iter().map(|d| d.to_string()).collect::<Vec<_>>().join(" ");
    Err(SchemeError::Custom(msg))
}

/// `apply`'s own tail-flag argument (spec.md 4.4/6): always applied
/// non-tail here since a primitive has no trampoline of its own to drive.
fn prim_apply(args: &mut Vec<Datum>, env: &Rc<Environment>) -> Result<Datum, SchemeError> {
    if args.len() < 2 {
        return Err(SchemeError::arity("apply", "at least 2", args.len()));
    }
    let proc = match args.remove(0) {
        Datum::Procedure(p) => p,
        other => return Err(SchemeError::NotCallable(format!("{other}"))),
    };
    let last = args.pop().unwrap();
    let mut call_args = std::mem::take(args);
    call_args.extend(list_to_vec(&last)?);
    crate::eval::trampoline(crate::eval::apply(&proc, call_args, env, false)?)
}

/// Forces a `Delay`, memoizing (spec.md 3/4: `Delay`); a non-promise datum
/// forces to itself.
fn prim_force(args: &mut Vec<Datum>, _env: &Rc<Environment>) -> Result<Datum, SchemeError> {
    want_n("force", args, 1)?;
    crate::eval::force(&args[0])
}

/// `(eval expr env)` / `(eval expr)`: re-enters `analyze` on an already-quoted
/// syntax tree, the hook both `core-syntax`'s analysis-time evaluation and
/// user metaprogramming depend on (spec.md 1, 6).
fn prim_eval(args: &mut Vec<Datum>, env: &Rc<Environment>) -> Result<Datum, SchemeError> {
    if args.is_empty() || args.len() > 2 {
        return Err(SchemeError::arity("eval", "1 or 2", args.len()));
    }
    let target_env = env.clone();
    let exec = crate::analyze::analyze(&args[0], false, false)?;
    exec(&target_env)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::parse_one;

    fn run(src: &str) -> Datum {
        let env = Environment::new_global();
        install(&env);
        let form = parse_one(src).unwrap();
        let exec = crate::analyze::analyze(&form, false, false).unwrap();
        crate::eval::trampoline(exec(&env).unwrap()).unwrap()
    }

    #[test]
    fn arithmetic_basics() {
        assert!(matches!(run("(+ 1 2 3)"), Datum::Number(n) if n.to_f64() == 6.0));
        assert!(matches!(run("(- 10 3 2)"), Datum::Number(n) if n.to_f64() == 5.0));
        assert!(matches!(run("(* 2 3 4)"), Datum::Number(n) if n.to_f64() == 24.0));
    }

    #[test]
    fn factorial_30_is_exact_bignum() {
        let def = "(define (fact n) (if (= n 0) 1 (* n (fact (- n 1)))))";
        let env = Environment::new_global();
        install(&env);
        let form = parse_one(def).unwrap();
        crate::analyze::analyze(&form, false, false).unwrap()(&env).unwrap();
        let call = parse_one("(fact 30)").unwrap();
        let result = crate::analyze::analyze(&call, false, false).unwrap()(&env).unwrap();
        assert_eq!(result.to_string(), "265252859812191058636308480000000");
    }

    #[test]
    fn apply_spreads_trailing_list() {
        assert!(matches!(run("(apply + (list 1 2 3))"), Datum::Number(n) if n.to_f64() == 6.0));
    }

    #[test]
    fn scons_stream_scar_scdr() {
        let v = run("(scdr (scons 1 (scons 2 '())))");
        assert!(matches!(v, Datum::Pair(_)));
        let v2 = run("(scar (scdr (scons 1 (scons 2 '()))))");
        assert!(matches!(v2, Datum::Number(n) if n.to_f64() == 2.0));
    }

    #[test]
    fn equality_predicates_distinguish_identity_and_structure() {
        assert!(matches!(run("(equal? (list 1 2) (list 1 2))"), Datum::Boolean(true)));
        assert!(matches!(run("(eq? (list 1 2) (list 1 2))"), Datum::Boolean(false)));
    }
}
