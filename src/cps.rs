// ABOUTME: Source-to-source CPS conversion (scm->cps) and its peephole optimizer

use crate::datum::{cons, intern, list_to_vec, list_to_vec_dotted, vec_to_list, Datum, Symbol};
use crate::error::SchemeError;
use crate::gensym::{cps_continuation_symbol, cps_symbol};

/// Head symbol marking an application site the CPS transform already
/// converted, so `analyze_cps_application` can tell a "plain" call (whose
/// target must be applied normally and have its result handed to the
/// trailing continuation) apart from a call into CPS-aware code (whose
/// target expects the continuation as a real trailing argument) — spec.md
/// 4.3's "application tag distinguishes CPS-applied sites".
pub const APPLICATION_CPS_TAG: &str = "heist:core:application-cps-tag";

fn sym(name: &str) -> Datum {
    Datum::Symbol(intern(name))
}

fn head_is(expr: &Datum, name: &str) -> bool {
    matches!(list_to_vec_dotted(expr).0.first(), Some(Datum::Symbol(s)) if &**s == name)
}

fn is_special_head(s: &str) -> bool {
    matches!(
        s,
        "quote" | "if" | "lambda" | "set!" | "define" | "begin" | "and" | "or" | "cond" | "case" | "let" | "let*" | "letrec" | "letrec*" | "do"
    )
}

/// True if `expr` can be substituted for its own continuation invocation
/// without reordering effects: literals, quoted data, variable references,
/// and lambda expressions (whose body is transformed but which is itself a
/// value, not a computation).
fn is_trivial(expr: &Datum) -> bool {
    match expr {
        Datum::Number(_) | Datum::Str(_) | Datum::Boolean(_) | Datum::Character(_) | Datum::EmptyList => true,
        Datum::Symbol(s) => !is_special_head(s),
        _ if head_is(expr, "quote") => true,
        _ if head_is(expr, "lambda") => true,
        _ => false,
    }
}

fn direct_value(expr: &Datum) -> Result<Datum, SchemeError> {
    if head_is(expr, "lambda") {
        cps_lambda(expr)
    } else {
        Ok(expr.clone())
    }
}

fn apply_k(k: &Datum, v: Datum) -> Datum {
    vec_to_list(vec![k.clone(), v])
}

/// Append a fresh continuation parameter to a lambda's formal parameter
/// list, preserving a dotted rest parameter if present (`(x y . rest)` ->
/// `(x y k . rest)`).
fn append_cont_param(params: &Datum, k: &Symbol) -> Datum {
    match params {
        Datum::Symbol(rest) => {
            // `(lambda args ...)` fully variadic form: `(lambda (k . args) ...)`.
            cons(Datum::Symbol(k.clone()), Datum::Symbol(rest.clone()))
        }
        _ => {
            let (fixed, tail) = list_to_vec_dotted(params);
            let mut new_fixed = fixed;
            new_fixed.push(Datum::Symbol(k.clone()));
            crate::datum::vec_to_improper_list(new_fixed, tail)
        }
    }
}

fn cps_lambda(expr: &Datum) -> Result<Datum, SchemeError> {
    let items = list_to_vec_dotted(expr).0;
    let params = items.get(1).cloned().unwrap_or(Datum::EmptyList);
    let body = &items[2..];
    let k = cps_continuation_symbol();
    let new_params = append_cont_param(&params, &k);
    let new_body = cps_seq(body, &Datum::Symbol(k))?;
    Ok(vec_to_list(vec![sym("lambda"), new_params, new_body]))
}

fn cps_seq(exprs: &[Datum], k: &Datum) -> Result<Datum, SchemeError> {
    match exprs.len() {
        0 => Ok(apply_k(k, Datum::Boolean(false))),
        1 => cps(&exprs[0], k),
        _ => {
            let ignored = cps_symbol("_");
            let rest = cps_seq(&exprs[1..], k)?;
            let rest_k = vec_to_list(vec![sym("lambda"), vec_to_list(vec![Datum::Symbol(ignored)]), rest]);
            cps(&exprs[0], &rest_k)
        }
    }
}

fn cps_if(test: &Datum, then: &Datum, els: &Datum, k: &Datum) -> Result<Datum, SchemeError> {
    let (k_ref, needs_bind) = match k {
        Datum::Symbol(_) => (k.clone(), false),
        _ => (Datum::Symbol(cps_symbol("k")), true),
    };
    let t = cps_symbol("t");
    let branch = vec_to_list(vec![
        sym("if"),
        Datum::Symbol(t.clone()),
        cps(then, &k_ref)?,
        cps(els, &k_ref)?,
    ]);
    let test_k = vec_to_list(vec![sym("lambda"), vec_to_list(vec![Datum::Symbol(t)]), branch]);
    let inner = cps(test, &test_k)?;
    if needs_bind {
        Ok(vec_to_list(vec![
            sym("let"),
            vec_to_list(vec![vec_to_list(vec![k_ref, k.clone()])]),
            inner,
        ]))
    } else {
        Ok(inner)
    }
}

fn cps_set(var: &Symbol, val: &Datum, k: &Datum) -> Result<Datum, SchemeError> {
    let v = cps_symbol("v");
    let void_expr = vec_to_list(vec![sym("if"), Datum::Boolean(false), Datum::Boolean(false)]);
    let body = vec_to_list(vec![
        sym("begin"),
        vec_to_list(vec![sym("set!"), Datum::Symbol(var.clone()), Datum::Symbol(v.clone())]),
        apply_k(k, void_expr),
    ]);
    let val_k = vec_to_list(vec![sym("lambda"), vec_to_list(vec![Datum::Symbol(v)]), body]);
    cps(val, &val_k)
}

fn cps_define(var: &Symbol, val: &Datum, k: &Datum) -> Result<Datum, SchemeError> {
    let v = cps_symbol("v");
    let void_expr = vec_to_list(vec![sym("if"), Datum::Boolean(false), Datum::Boolean(false)]);
    let body = vec_to_list(vec![
        sym("begin"),
        vec_to_list(vec![sym("define"), Datum::Symbol(var.clone()), Datum::Symbol(v.clone())]),
        apply_k(k, void_expr),
    ]);
    let val_k = vec_to_list(vec![sym("lambda"), vec_to_list(vec![Datum::Symbol(v)]), body]);
    cps(val, &val_k)
}

fn cps_application(items: &[Datum], k: &Datum) -> Result<Datum, SchemeError> {
    fn seq(items: &[Datum], idx: usize, vals: Vec<Datum>, k: &Datum) -> Result<Datum, SchemeError> {
        if idx == items.len() {
            let mut call_items = vec![sym(APPLICATION_CPS_TAG)];
            call_items.extend(vals.iter().cloned());
            call_items.push(k.clone());
            return Ok(vec_to_list(call_items));
        }
        if is_trivial(&items[idx]) {
            let mut vals2 = vals;
            vals2.push(direct_value(&items[idx])?);
            seq(items, idx + 1, vals2, k)
        } else {
            let v = cps_symbol("a");
            let mut vals2 = vals;
            vals2.push(Datum::Symbol(v.clone()));
            let inner = seq(items, idx + 1, vals2, k)?;
            let cont = vec_to_list(vec![sym("lambda"), vec_to_list(vec![Datum::Symbol(v)]), inner]);
            cps(&items[idx], &cont)
        }
    }
    seq(items, 0, Vec::new(), k)
}

/// `(and a b ...)` rewrites to nested `if`, short-circuiting on the first
/// falsey clause (spec.md 4.3: "rewrite to nested if").
fn desugar_and(clauses: &[Datum]) -> Datum {
    match clauses {
        [] => Datum::Boolean(true),
        [only] => only.clone(),
        [first, rest @ ..] => vec_to_list(vec![sym("if"), first.clone(), desugar_and(rest), Datum::Boolean(false)]),
    }
}

/// `(or a b ...)` rewrites to a self-invoking lambda per clause so the
/// tested value (not just its truthiness) survives into the result
/// (spec.md 4.3: "self-invoking lambda for `or` to preserve the tested value").
fn desugar_or(clauses: &[Datum]) -> Datum {
    match clauses {
        [] => Datum::Boolean(false),
        [only] => only.clone(),
        [first, rest @ ..] => {
            let t = cps_symbol("t");
            let body = vec_to_list(vec![sym("if"), Datum::Symbol(t.clone()), Datum::Symbol(t.clone()), desugar_or(rest)]);
            let thunk = vec_to_list(vec![sym("lambda"), vec_to_list(vec![Datum::Symbol(t)]), body]);
            vec_to_list(vec![thunk, first.clone()])
        }
    }
}

/// `(letrec ((v e) ...) body ...)` rewrites to a `let` pre-binding every `v`
/// to an unspecified placeholder, then `set!`ing each in turn before `body`
/// runs — the same pre-bind-then-assign shape `analyze_letrec` evaluates
/// directly, expressed here as a `Datum` so it can be re-CPS'd.
fn desugar_letrec(rest: &[Datum]) -> Result<Datum, SchemeError> {
    let bindings = list_to_vec(rest.first().unwrap_or(&Datum::EmptyList))?;
    let placeholder = cons(sym("quote"), cons(Datum::Undefined, Datum::EmptyList));
    let mut let_bindings = Vec::new();
    let mut assignments = Vec::new();
    for b in &bindings {
        let parts = list_to_vec(b)?;
        let name = parts
            .first()
            .cloned()
            .ok_or_else(|| SchemeError::Syntax("letrec binding must start with a symbol".to_string()))?;
        let init = parts.get(1).cloned().unwrap_or(Datum::Undefined);
        let_bindings.push(vec_to_list(vec![name.clone(), placeholder.clone()]));
        assignments.push(vec_to_list(vec![sym("set!"), name, init]));
    }
    let mut let_form = vec![sym("let"), vec_to_list(let_bindings)];
    let_form.extend(assignments);
    let_form.extend(rest[1..].iter().cloned());
    Ok(vec_to_list(let_form))
}

/// Transform `expr` into continuation-passing style, invoking `k` (a
/// variable reference or literal lambda, valid in operator position) with
/// its result instead of returning directly.
pub fn cps(expr: &Datum, k: &Datum) -> Result<Datum, SchemeError> {
    if is_trivial(expr) && !head_is(expr, "lambda") {
        return Ok(apply_k(k, direct_value(expr)?));
    }
    match expr {
        _ if head_is(expr, "lambda") => Ok(apply_k(k, direct_value(expr)?)),
        _ if head_is(expr, "quote") => Ok(apply_k(k, expr.clone())),
        _ if head_is(expr, "if") => {
            let items = list_to_vec(expr).unwrap_or_default();
            let test = items.get(1).cloned().unwrap_or(Datum::Boolean(false));
            let then = items.get(2).cloned().unwrap_or(Datum::Boolean(false));
            let els = items.get(3).cloned().unwrap_or(Datum::Boolean(false));
            cps_if(&test, &then, &els, k)
        }
        _ if head_is(expr, "set!") => {
            let items = list_to_vec(expr).unwrap_or_default();
            if let (Some(Datum::Symbol(var)), Some(val)) = (items.get(1), items.get(2)) {
                cps_set(var, val, k)
            } else {
                Ok(apply_k(k, Datum::Boolean(false)))
            }
        }
        _ if head_is(expr, "define") => {
            let items = list_to_vec(expr).unwrap_or_default();
            if let (Some(Datum::Symbol(var)), Some(val)) = (items.get(1), items.get(2)) {
                cps_define(var, val, k)
            } else {
                Ok(apply_k(k, Datum::Boolean(false)))
            }
        }
        _ if head_is(expr, "begin") => {
            let items = list_to_vec(expr).unwrap_or_default();
            cps_seq(&items[1..], k)
        }
        // Host special forms not tagged by the transform: left for the
        // analyzer's own desugaring, then re-CPS'd (spec.md 4.3).
        _ if head_is(expr, "and") => {
            let items = list_to_vec(expr).unwrap_or_default();
            cps(&desugar_and(&items[1..]), k)
        }
        _ if head_is(expr, "or") => {
            let items = list_to_vec(expr).unwrap_or_default();
            cps(&desugar_or(&items[1..]), k)
        }
        _ if head_is(expr, "cond") => cps(&crate::analyze::desugar_cond(expr)?, k),
        _ if head_is(expr, "case") => cps(&crate::analyze::desugar_case(expr)?, k),
        _ if head_is(expr, "let") => cps(&crate::analyze::desugar_let(expr)?, k),
        _ if head_is(expr, "let*") => cps(&crate::analyze::desugar_let_star(expr)?, k),
        _ if head_is(expr, "letrec") || head_is(expr, "letrec*") => {
            let items = list_to_vec(expr).unwrap_or_default();
            cps(&desugar_letrec(&items[1..])?, k)
        }
        _ if head_is(expr, "do") => cps(&crate::analyze::desugar_do(expr)?, k),
        _ => {
            let items = list_to_vec(expr).unwrap_or_else(|_| vec![expr.clone()]);
            cps_application(&items, k)
        }
    }
}

fn substitute_symbol(expr: &Datum, from: &Symbol, to: &Datum) -> Datum {
    match expr {
        Datum::Symbol(s) if s == from => to.clone(),
        Datum::Pair(_) | Datum::EmptyList => {
            let (items, tail) = list_to_vec_dotted(expr);
            let new_items = items.iter().map(|i| substitute_symbol(i, from, to)).collect();
            let new_tail = substitute_symbol(&tail, from, to);
            crate::datum::vec_to_improper_list(new_items, new_tail)
        }
        other => other.clone(),
    }
}

fn occurs_free(expr: &Datum, name: &Symbol) -> bool {
    match expr {
        Datum::Symbol(s) => s == name,
        Datum::Pair(p) => occurs_free(&p.car.borrow(), name) || occurs_free(&p.cdr.borrow(), name),
        _ => false,
    }
}

fn count_occurrences(expr: &Datum, name: &Symbol) -> usize {
    match expr {
        Datum::Symbol(s) if s == name => 1,
        Datum::Pair(p) => count_occurrences(&p.car.borrow(), name) + count_occurrences(&p.cdr.borrow(), name),
        _ => 0,
    }
}

/// One bottom-up rewrite pass. Returns the rewritten expression and whether
/// anything changed, so the caller can iterate to a fixpoint.
fn optimize_once(expr: &Datum) -> (Datum, bool) {
    let (items, tail) = match expr {
        Datum::Pair(_) | Datum::EmptyList => list_to_vec_dotted(expr),
        other => return (other.clone(), false),
    };
    if items.is_empty() {
        return (expr.clone(), false);
    }

    let mut changed = false;
    let rebuilt: Vec<Datum> = items
        .iter()
        .map(|i| {
            let (new_i, c) = optimize_once(i);
            changed |= c;
            new_i
        })
        .collect();
    let mut expr = crate::datum::vec_to_improper_list(rebuilt, tail);

    // Pass 1: beta-reduce `((lambda (v) body) val)` when val is trivial (a
    // symbol reference, literal, or quoted datum) — safe since v is always
    // a gensym and cannot capture anything in val.
    if let Datum::Pair(p) = &expr {
        let op = p.car.borrow().clone();
        let rest = list_to_vec(&p.cdr.borrow()).unwrap_or_default();
        if head_is(&op, "lambda") && rest.len() == 1 {
            let op_items = list_to_vec(&op).unwrap_or_default();
            if op_items.len() == 3 {
                if let Datum::Symbol(param) = &op_items[1] {
                    let val = &rest[0];
                    if matches!(val, Datum::Symbol(_) | Datum::Number(_) | Datum::Str(_) | Datum::Boolean(_)) || head_is(val, "quote") {
                        expr = substitute_symbol(&op_items[2], param, val);
                        changed = true;
                    }
                } else if let Ok(params) = list_to_vec(&op_items[1]) {
                    if params.is_empty() {
                        expr = op_items[2].clone();
                        changed = true;
                    }
                }
            }
        }
    }

    // Pass 2: eta-reduce `(lambda (v) (f v))` to `f` when `v` does not occur
    // free in `f` and is used exactly once.
    if head_is(&expr, "lambda") {
        let items = list_to_vec(&expr).unwrap_or_default();
        if items.len() == 3 {
            if let Ok(params) = list_to_vec(&items[1]) {
                if params.len() == 1 {
                    if let Datum::Symbol(v) = &params[0] {
                        if let Datum::Pair(bp) = &items[2] {
                            let body_items = list_to_vec(&items[2]).unwrap_or_default();
                            if body_items.len() >= 2 {
                                let f = body_items[0].clone();
                                let args = &body_items[1..];
                                if args.len() == 1 && matches!(&args[0], Datum::Symbol(s) if s == v) && !occurs_free(&f, v) {
                                    let _ = bp;
                                    expr = f;
                                    changed = true;
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    // Pass 3: flatten a single-form `(begin x)` to `x`.
    if head_is(&expr, "begin") {
        let items = list_to_vec(&expr).unwrap_or_default();
        if items.len() == 2 {
            expr = items[1].clone();
            changed = true;
        }
    }

    // Pass 4: fold `(begin (begin a ...) b ...)` into one flat `begin`.
    if head_is(&expr, "begin") {
        let items = list_to_vec(&expr).unwrap_or_default();
        if items.len() > 1 && head_is(&items[1], "begin") {
            let inner = list_to_vec(&items[1]).unwrap_or_default();
            let mut flat = vec![items[0].clone()];
            flat.extend(inner[1..].iter().cloned());
            flat.extend(items[2..].iter().cloned());
            expr = vec_to_list(flat);
            changed = true;
        }
    }

    // Pass 5: constant-fold an `if` whose test is a literal boolean.
    if head_is(&expr, "if") {
        let items = list_to_vec(&expr).unwrap_or_default();
        if items.len() == 4 {
            match &items[1] {
                Datum::Boolean(true) => {
                    expr = items[2].clone();
                    changed = true;
                }
                Datum::Boolean(false) => {
                    expr = items[3].clone();
                    changed = true;
                }
                _ => {}
            }
        }
    }

    let _ = count_occurrences;
    (expr, changed)
}

pub fn optimize(mut expr: Datum) -> Datum {
    for _ in 0..64 {
        let (next, changed) = optimize_once(&expr);
        expr = next;
        if !changed {
            break;
        }
    }
    expr
}

/// `(scm->cps body ...)`: returns a procedure-of-one-continuation-argument
/// representing the CPS-converted block (spec.md 4.3).
pub fn transform_block(body: &[Datum]) -> Result<Datum, SchemeError> {
    let k = cps_continuation_symbol();
    let transformed = cps_seq(body, &Datum::Symbol(k))?;
    let transformed = optimize(transformed);
    Ok(vec_to_list(vec![sym("lambda"), vec_to_list(vec![Datum::Symbol(k)]), transformed]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::parse_one;

    #[test]
    fn cps_of_literal_invokes_continuation() {
        let e = parse_one("42").unwrap();
        let k = Datum::Symbol(intern("k"));
        let out = cps(&e, &k).unwrap();
        let items = list_to_vec(&out).unwrap();
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn transform_block_produces_single_arg_lambda() {
        let body = vec![parse_one("(+ 1 2)").unwrap()];
        let out = transform_block(&body).unwrap();
        let items = list_to_vec(&out).unwrap();
        assert!(matches!(&items[0], Datum::Symbol(s) if &**s == "lambda"));
        let params = list_to_vec(&items[1]).unwrap();
        assert_eq!(params.len(), 1);
    }

    #[test]
    fn cps_of_cond_does_not_leave_a_bare_cond_head() {
        let e = parse_one("(cond ((> 1 0) 'yes) (else 'no))").unwrap();
        let k = Datum::Symbol(intern("k"));
        let out = cps(&e, &k).unwrap();
        assert!(!format!("{out}").split_whitespace().any(|tok| tok.trim_start_matches('(') == "cond"));
    }

    #[test]
    fn cps_of_let_does_not_leave_a_bare_let_head() {
        let e = parse_one("(let ((x 1)) x)").unwrap();
        let k = Datum::Symbol(intern("k"));
        let out = cps(&e, &k).unwrap();
        assert!(!format!("{out}").split_whitespace().any(|tok| tok.trim_start_matches('(') == "let"));
    }

    #[test]
    fn cps_of_named_let_does_not_leave_a_bare_letrec_head() {
        let e = parse_one("(let loop ((i 0)) (if (= i 0) 'done (loop (- i 1))))").unwrap();
        let k = Datum::Symbol(intern("k"));
        let out = cps(&e, &k).unwrap();
        let rendered = format!("{out}");
        assert!(!rendered.split_whitespace().any(|tok| tok.trim_start_matches('(') == "letrec"));
    }

    #[test]
    fn cps_of_and_or_do_reach_a_fixpoint_without_bare_heads() {
        for src in [
            "(and (> 1 0) (> 2 1))",
            "(or #f (> 2 1))",
            "(do ((i 0 (+ i 1))) ((= i 3) i))",
            "(case 1 ((1) 'one) (else 'other))",
            "(let* ((x 1) (y (+ x 1))) y)",
        ] {
            let e = parse_one(src).unwrap();
            let k = Datum::Symbol(intern("k"));
            let out = cps(&e, &k).unwrap();
            let rendered = format!("{out}");
            for head in ["and", "or", "do", "case", "let*", "cond"] {
                assert!(
                    !rendered.split_whitespace().any(|tok| tok.trim_start_matches('(') == head),
                    "{src} left a bare `{head}` head: {rendered}"
                );
            }
        }
    }

    #[test]
    fn optimizer_reaches_fixpoint_on_simple_if() {
        let e = parse_one("(if #t 1 2)").unwrap();
        let items = list_to_vec(&e).unwrap();
        let wrapped = vec_to_list(vec![sym("if"), items[1].clone(), items[2].clone(), items[3].clone()]);
        let out = optimize(wrapped);
        assert!(matches!(out, Datum::Number(_)));
    }
}
