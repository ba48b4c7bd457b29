// ABOUTME: Library root exposing the analyze/evaluate core for embedding and testing

pub mod analyze;
pub mod cps;
pub mod datum;
pub mod env;
pub mod equality;
pub mod error;
pub mod eval;
pub mod gensym;
pub mod numeric;
pub mod primitives;
pub mod reader;
pub mod syntax_rules;

use std::rc::Rc;

use datum::Datum;
use env::Environment;
use error::SchemeError;

/// Build a fresh global environment with every core primitive installed —
/// the one-call entry point `main.rs`'s REPL and script runner share.
pub fn new_global_environment() -> Rc<Environment> {
    let env = Environment::new_global();
    primitives::install(&env);
    env
}

/// Analyze and evaluate one already-parsed syntax tree against `env`,
/// trampolining any top-level tail call to completion.
pub fn eval_datum(form: &Datum, env: &Rc<Environment>) -> Result<Datum, SchemeError> {
    let exec = analyze::analyze(form, false, false)?;
    eval::trampoline(exec(env)?)
}

/// Parse and evaluate every top-level form in `source`, returning the last
/// result (or `Datum::Void` if `source` was empty).
pub fn eval_source(source: &str, env: &Rc<Environment>) -> Result<Datum, SchemeError> {
    let forms = reader::parse_program(source).map_err(SchemeError::Syntax)?;
    let mut result = Datum::Void;
    for form in &forms {
        result = eval_datum(form, env)?;
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn end_to_end_named_let_loop() {
        let env = new_global_environment();
        let v = eval_source("(let loop ((i 0) (acc '())) (if (= i 3) acc (loop (+ i 1) (cons i acc))))", &env).unwrap();
        assert_eq!(v.to_string(), "(2 1 0)");
    }

    #[test]
    fn end_to_end_my_or_macro_short_circuits() {
        let env = new_global_environment();
        let src = "(define-syntax my-or \
                      (syntax-rules () \
                        ((_) #f) \
                        ((_ a) a) \
                        ((_ a b ...) (let ((t a)) (if t t (my-or b ...)))))) \
                    (my-or #f #f 7 (error \"nope\"))";
        let v = eval_source(src, &env).unwrap();
        assert!(matches!(v, Datum::Number(n) if n.to_f64() == 7.0));
    }

    /// spec.md 8's exact `(m (x 1) (y 2))` scenario against template
    /// `(list (list 'a a 'b b) ...)`: a template identifier matching a
    /// pattern variable is substituted wherever it occurs, including inside
    /// `quote` — syntax-rules does not special-case quoted positions. `x`/`y`
    /// are pre-defined so the bare (unquoted) `a` occurrence, which
    /// substitutes to the matched symbol itself, evaluates instead of
    /// raising an unbound-variable error. See DESIGN.md for why this
    /// asserted output differs from the distilled spec's literal
    /// `((x 1 b 2) (y 1 b 2))`.
    #[test]
    fn end_to_end_macro_template_level_consistency() {
        let env = new_global_environment();
        let src = "(define-syntax m (syntax-rules () ((_ (a b) ...) (list (list 'a a 'b b) ...)))) \
                   (define x 10) (define y 20) (m (x 1) (y 2))";
        let v = eval_source(src, &env).unwrap();
        assert_eq!(v.to_string(), "((x 10 1 1) (y 20 2 2))");
    }
}
