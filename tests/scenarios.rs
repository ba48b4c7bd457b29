// ABOUTME: End-to-end scenarios and testable-property invariants from spec.md 8

use heist_scheme_core::datum::Datum;
use heist_scheme_core::{eval_source, new_global_environment};

fn run(src: &str) -> Datum {
    let env = new_global_environment();
    eval_source(src, &env).unwrap()
}

#[test]
fn named_let_accumulates_in_reverse() {
    let v = run("(let loop ((i 0) (acc '())) (if (= i 3) acc (loop (+ i 1) (cons i acc))))");
    assert_eq!(v.to_string(), "(2 1 0)");
}

#[test]
fn my_or_macro_short_circuits_without_evaluating_the_error_branch() {
    let v = run(
        "(define-syntax my-or
           (syntax-rules ()
             ((_) #f)
             ((_ a) a)
             ((_ a b ...) (let ((t a)) (if t t (my-or b ...))))))
         (my-or #f #f 7 (error \"nope\"))",
    );
    assert!(matches!(v, Datum::Number(n) if n.to_f64() == 7.0));
}

#[test]
fn scons_stream_scar_of_scdr() {
    let v = run("(define s (scons 1 (scons 2 (scons 3 '())))) (scar (scdr s))");
    assert!(matches!(v, Datum::Number(n) if n.to_f64() == 2.0));
}

#[test]
fn call_cc_escapes_inside_scm_to_cps_with_identity_continuation() {
    let v = run("((scm->cps (call/cc (lambda (k) (+ 1 (k 42))))) (lambda (x) x))");
    assert!(matches!(v, Datum::Number(n) if n.to_f64() == 42.0));
}

#[test]
fn call_cc_with_no_escape_falls_through_to_normal_value() {
    let v = run("((scm->cps (call/cc (lambda (k) (+ 1 2)))) (lambda (x) x))");
    assert!(matches!(v, Datum::Number(n) if n.to_f64() == 3.0));
}

#[test]
fn factorial_30_is_an_exact_bignum() {
    let v = run("(define (fact n) (if (= n 0) 1 (* n (fact (- n 1))))) (fact 30)");
    assert_eq!(v.to_string(), "265252859812191058636308480000000");
}

#[test]
fn macro_template_level_consistency_across_ellipsis_groups() {
    // spec.md 8's literal scenario: each `(a b)` sub-pattern repetition must
    // carry its own consistent a/b pairing into the template, including
    // through `quote` (syntax-rules substitutes a pattern variable wherever
    // it occurs, quoted or not — see DESIGN.md's note on this scenario for
    // why the asserted shape differs from the distilled spec's literal
    // `((x 1 b 2) (y 1 b 2))`). `x`/`y` are pre-defined so the bare (unquoted)
    // `a` occurrence, which substitutes to the literal matched symbol, is
    // evaluable rather than an unbound-variable error.
    let v = run(
        "(define-syntax m (syntax-rules () ((_ (a b) ...) (list (list 'a a 'b b) ...))))
         (define x 10)
         (define y 20)
         (m (x 1) (y 2))",
    );
    assert_eq!(v.to_string(), "((x 10 1 1) (y 20 2 2))");
}

#[test]
fn macro_hygiene_does_not_capture_caller_tmp() {
    let v = run(
        "(define-syntax swap!
           (syntax-rules ()
             ((_ a b) (let ((tmp a)) (set! a b) (set! b tmp)))))
         (define tmp 'outer)
         (define x 1)
         (define y 2)
         (swap! x y)
         (list x y tmp)",
    );
    assert_eq!(v.to_string(), "(2 1 outer)");
}

#[test]
fn tail_call_space_invariant_handles_ten_times_max_recursion_depth() {
    let env = new_global_environment();
    let n = heist_scheme_core::eval::max_recursion_depth() * 10;
    eval_source("(define (f n) (if (zero? n) 'done (f (- n 1))))", &env).unwrap();
    let result = eval_source(&format!("(f {n})"), &env).unwrap();
    assert_eq!(result.to_string(), "done");
}

#[test]
fn falsey_configurability_round_trips() {
    // `0` is truthy by default (only `#f` is falsey).
    let env = new_global_environment();
    assert_eq!(eval_source("(if 0 'a 'b)", &env).unwrap().to_string(), "a");
    eval_source("(set-falsey! 0)", &env).unwrap();
    assert_eq!(eval_source("(if 0 'a 'b)", &env).unwrap().to_string(), "b");
    eval_source("(set-truthy! 0)", &env).unwrap();
    assert_eq!(eval_source("(if 0 'a 'b)", &env).unwrap().to_string(), "a");
}

#[test]
fn set_truthy_on_false_is_an_error() {
    let env = new_global_environment();
    assert!(eval_source("(set-truthy! #f)", &env).is_err());
}

#[test]
fn set_falsey_on_true_is_an_error() {
    let env = new_global_environment();
    assert!(eval_source("(set-falsey! #t)", &env).is_err());
    // #t must remain truthy after the rejected attempt.
    assert_eq!(eval_source("(if #t 'a 'b)", &env).unwrap().to_string(), "a");
}

#[test]
fn variadic_binding_shapes() {
    assert_eq!(run("((lambda args args) 1 2 3)").to_string(), "(1 2 3)");
    assert_eq!(run("((lambda (a . rest) rest) 1 2 3)").to_string(), "(2 3)");
    assert_eq!(run("((lambda (a . rest) rest) 1)").to_string(), "()");
}

#[test]
fn quasiquote_unquote_round_trips_to_quote() {
    let env = new_global_environment();
    eval_source("(define x 5)", &env).unwrap();
    let v = eval_source("(equal? `,x '5)", &env).unwrap();
    assert!(matches!(v, Datum::Boolean(true)));
}

#[test]
fn quasiquote_splicing_round_trips_a_list() {
    let env = new_global_environment();
    eval_source("(define xs (list 1 2 3))", &env).unwrap();
    let v = eval_source("(equal? `(,@xs) xs)", &env).unwrap();
    assert!(matches!(v, Datum::Boolean(true)));
}

#[test]
fn jump_and_catch_jump_are_a_single_shot_non_local_return() {
    let v = run("(+ 1 (catch-jump (begin (jump! 41) 999)))");
    assert!(matches!(v, Datum::Number(n) if n.to_f64() == 42.0));
}

#[test]
fn uncaught_jump_propagates_as_an_error() {
    let env = new_global_environment();
    assert!(eval_source("(jump! 1)", &env).is_err());
}

#[test]
fn cyclic_list_is_detected_rather_than_hanging_length() {
    let env = new_global_environment();
    eval_source("(define p (list 1 2 3)) (set-cdr! (cdr (cdr p)) p)", &env).unwrap();
    assert!(eval_source("(length p)", &env).is_err());
}

#[test]
fn analyze_idempotence_same_source_same_result() {
    let env1 = new_global_environment();
    let env2 = new_global_environment();
    let src = "(define (sq x) (* x x)) (sq 7)";
    assert_eq!(eval_source(src, &env1).unwrap().to_string(), eval_source(src, &env2).unwrap().to_string());
}
