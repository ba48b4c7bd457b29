// ABOUTME: The analyzer - walks syntax once and compiles it into a reusable Executor closure

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use crate::datum::{
    cons, intern, list_to_vec, list_to_vec_dotted, vec_to_list, CompoundProcedure, DelayObj, Datum, ParamList, Procedure, Symbol,
    SyntaxRulesObj,
};
use crate::env::Environment;
use crate::error::SchemeError;

/// A compiled, reusable piece of code: given an environment, produce a
/// value (or, in tail position, a `Datum::TailCall` sentinel for the
/// trampoline to continue).
pub type Executor = Rc<dyn Fn(&Rc<Environment>) -> Result<Datum, SchemeError>>;

thread_local! {
    // Local lexical macro scopes from nested let-syntax/letrec-syntax forms,
    // innermost last. analyze() has no environment parameter, so this stack
    // (pushed/popped symmetrically around a single synchronous recursive
    // analyze call) stands in for a lexical macro environment.
    static MACRO_SCOPES: RefCell<Vec<HashMap<Symbol, Rc<SyntaxRulesObj>>>> = RefCell::new(Vec::new());
    // define-syntax macros: effectively global, since top-level define-syntax
    // has no enclosing lexical scope of its own.
    static RUNTIME_MACROS: RefCell<HashMap<Symbol, Rc<SyntaxRulesObj>>> = RefCell::new(HashMap::new());
    // core-syntax macros: pre-registered, analysis-time, global (spec.md 4.2's
    // third macro scope).
    static CORE_SYNTAX: RefCell<HashMap<Symbol, Rc<SyntaxRulesObj>>> = RefCell::new(HashMap::new());
}

fn lookup_macro_for_analysis(name: &Symbol) -> Option<Rc<SyntaxRulesObj>> {
    let from_stack = MACRO_SCOPES.with(|stack| {
        stack
            .borrow()
            .iter()
            .rev()
            .find_map(|scope| scope.get(name).cloned())
    });
    if from_stack.is_some() {
        return from_stack;
    }
    if let Some(m) = RUNTIME_MACROS.with(|m| m.borrow().get(name).cloned()) {
        return Some(m);
    }
    CORE_SYNTAX.with(|m| m.borrow().get(name).cloned())
}

fn push_macro_scope(bindings: HashMap<Symbol, Rc<SyntaxRulesObj>>) {
    MACRO_SCOPES.with(|s| s.borrow_mut().push(bindings));
}

fn pop_macro_scope() {
    MACRO_SCOPES.with(|s| {
        s.borrow_mut().pop();
    });
}

fn sym(name: &str) -> Datum {
    Datum::Symbol(intern(name))
}

fn head(expr: &Datum) -> Option<Symbol> {
    match expr {
        Datum::Pair(p) => match &*p.car.borrow() {
            Datum::Symbol(s) => Some(s.clone()),
            _ => None,
        },
        _ => None,
    }
}

/// Reserved words that `analyze_application` must never treat as a
/// rebindable macro/procedure use, even if shadowed in user code.
const SPECIAL_FORMS: &[&str] = &[
    "quote", "quasiquote", "if", "and", "or", "set!", "define", "lambda", "begin", "cond", "case", "let", "let*", "letrec", "letrec*",
    "do", "delay", "scons", "syntax-rules", "define-syntax", "let-syntax", "letrec-syntax", "core-syntax", "scm->cps", "cps-quote",
    "catch-jump", "call/ce",
];

pub fn analyze(syntax: &Datum, tail: bool, cps_block: bool) -> Result<Executor, SchemeError> {
    match syntax {
        Datum::Symbol(s) => analyze_variable(s.clone()),
        Datum::Pair(_) => {
            let h = head(syntax);
            match h.as_deref() {
                Some("quote") => analyze_quoted(syntax),
                Some("quasiquote") => analyze_quasiquote(syntax, tail, cps_block),
                Some("if") => analyze_if(syntax, tail, cps_block),
                Some("and") => analyze_and(syntax, tail, cps_block),
                Some("or") => analyze_or(syntax, tail, cps_block),
                Some("set!") => analyze_assignment(syntax),
                Some("define") => analyze_definition(syntax, cps_block),
                Some("lambda") => analyze_lambda(syntax, cps_block),
                Some("begin") => analyze_sequence_form(syntax, tail, cps_block),
                Some("cond") => analyze(&desugar_cond(syntax)?, tail, cps_block),
                Some("case") => analyze(&desugar_case(syntax)?, tail, cps_block),
                Some("let") => analyze(&desugar_let(syntax)?, tail, cps_block),
                Some("let*") => analyze(&desugar_let_star(syntax)?, tail, cps_block),
                Some("letrec") | Some("letrec*") => analyze_letrec(syntax, tail, cps_block),
                Some("do") => analyze(&desugar_do(syntax)?, tail, cps_block),
                Some("delay") => analyze_delay(syntax),
                Some("scons") => analyze_scons(syntax),
                Some("syntax-rules") => analyze_syntax_rules_literal(syntax),
                Some("define-syntax") => analyze_define_syntax(syntax),
                Some("let-syntax") => analyze_let_syntax(syntax, tail, cps_block, false),
                Some("letrec-syntax") => analyze_let_syntax(syntax, tail, cps_block, true),
                Some("core-syntax") => analyze_core_syntax(syntax),
                Some("scm->cps") => analyze_scm_cps(syntax, tail),
                Some("cps-quote") => analyze_cps_quote(syntax, tail),
                Some("catch-jump") => analyze_catch_jump(syntax, cps_block),
                Some("call/ce") => analyze_call_ce(syntax, tail, cps_block),
                Some(crate::cps::APPLICATION_CPS_TAG) => analyze_cps_application(syntax, tail),
                Some(name) if lookup_macro_for_analysis(&intern(name)).is_some() => {
                    let transformer = lookup_macro_for_analysis(&intern(name)).unwrap();
                    let expansion = crate::syntax_rules::expand(&transformer, syntax)?;
                    analyze(&expansion, tail, cps_block)
                }
                _ => analyze_application(syntax, tail, cps_block),
            }
        }
        other => analyze_self_evaluating(other.clone()),
    }
}

fn analyze_self_evaluating(value: Datum) -> Result<Executor, SchemeError> {
    Ok(Rc::new(move |_env: &Rc<Environment>| Ok(value.clone())))
}

fn analyze_variable(name: Symbol) -> Result<Executor, SchemeError> {
    Ok(Rc::new(move |env: &Rc<Environment>| env.lookup(&name)))
}

fn analyze_quoted(syntax: &Datum) -> Result<Executor, SchemeError> {
    let items = list_to_vec(syntax)?;
    let quoted = items
        .get(1)
        .cloned()
        .ok_or_else(|| SchemeError::Syntax("quote requires exactly one datum".to_string()))?;
    Ok(Rc::new(move |_env: &Rc<Environment>| Ok(quoted.clone())))
}

fn qq_expand(d: &Datum, depth: u32) -> Datum {
    match d {
        Datum::Pair(p) => {
            let car = p.car.borrow().clone();
            let cdr = p.cdr.borrow().clone();
            if let Datum::Symbol(s) = &car {
                if &**s == "unquote" {
                    let arg = list_to_vec(&cdr).ok().and_then(|v| v.into_iter().next()).unwrap_or(Datum::EmptyList);
                    return if depth == 1 {
                        arg
                    } else {
                        vec_to_list(vec![sym("list"), quote_lit(sym("unquote")), qq_expand(&arg, depth - 1)])
                    };
                }
                if &**s == "quasiquote" {
                    let arg = list_to_vec(&cdr).ok().and_then(|v| v.into_iter().next()).unwrap_or(Datum::EmptyList);
                    return vec_to_list(vec![sym("list"), quote_lit(sym("quasiquote")), qq_expand(&arg, depth + 1)]);
                }
            }
            if let Datum::Pair(inner) = &car {
                if let Datum::Symbol(s) = &*inner.car.borrow() {
                    if &**s == "unquote-splicing" && depth == 1 {
                        let arg = list_to_vec(&inner.cdr.borrow()).ok().and_then(|v| v.into_iter().next()).unwrap_or(Datum::EmptyList);
                        return vec_to_list(vec![sym("append"), arg, qq_expand(&cdr, depth)]);
                    }
                }
            }
            vec_to_list(vec![sym("cons"), qq_expand(&car, depth), qq_expand(&cdr, depth)])
        }
        Datum::Vector(v) => {
            let items: Vec<Datum> = v.borrow().clone();
            let as_list = crate::datum::vec_to_list(items);
            vec_to_list(vec![sym("list->vector"), qq_expand(&as_list, depth)])
        }
        Datum::EmptyList => quote_lit(Datum::EmptyList),
        other => quote_lit(other.clone()),
    }
}

fn quote_lit(d: Datum) -> Datum {
    cons(sym("quote"), cons(d, Datum::EmptyList))
}

fn analyze_quasiquote(syntax: &Datum, tail: bool, cps_block: bool) -> Result<Executor, SchemeError> {
    let items = list_to_vec(syntax)?;
    let body = items.get(1).cloned().unwrap_or(Datum::EmptyList);
    analyze(&qq_expand(&body, 1), tail, cps_block)
}

fn analyze_if(syntax: &Datum, tail: bool, cps_block: bool) -> Result<Executor, SchemeError> {
    let items = list_to_vec(syntax)?;
    if items.len() < 3 || items.len() > 4 {
        return Err(SchemeError::Syntax("if requires (if test then [else])".to_string()));
    }
    let test = analyze(&items[1], false, cps_block)?;
    let then = analyze(&items[2], tail, cps_block)?;
    let els = if items.len() == 4 {
        Some(analyze(&items[3], tail, cps_block)?)
    } else {
        None
    };
    Ok(Rc::new(move |env: &Rc<Environment>| {
        let t = test(env)?;
        if crate::env::is_falsey(&t) {
            match &els {
                Some(e) => e(env),
                None => Ok(Datum::Void),
            }
        } else {
            then(env)
        }
    }))
}

/// `(and)` => `#t`, `(or)` => `#f` — the sentinel boundary values (DESIGN.md
/// Open Question 1).
fn analyze_and(syntax: &Datum, tail: bool, cps_block: bool) -> Result<Executor, SchemeError> {
    let items = list_to_vec(syntax)?;
    let clauses = items[1..]
        .iter()
        .enumerate()
        .map(|(i, c)| analyze(c, tail && i == items.len() - 2, cps_block))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Rc::new(move |env: &Rc<Environment>| {
        let mut result = Datum::Boolean(true);
        for clause in &clauses {
            result = clause(env)?;
            if crate::env::is_falsey(&result) {
                return Ok(result);
            }
        }
        Ok(result)
    }))
}

fn analyze_or(syntax: &Datum, tail: bool, cps_block: bool) -> Result<Executor, SchemeError> {
    let items = list_to_vec(syntax)?;
    let clauses = items[1..]
        .iter()
        .enumerate()
        .map(|(i, c)| analyze(c, tail && i == items.len() - 2, cps_block))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Rc::new(move |env: &Rc<Environment>| {
        for clause in &clauses {
            let v = clause(env)?;
            if !crate::env::is_falsey(&v) {
                return Ok(v);
            }
        }
        Ok(Datum::Boolean(false))
    }))
}

fn analyze_assignment(syntax: &Datum) -> Result<Executor, SchemeError> {
    let items = list_to_vec(syntax)?;
    if items.len() != 3 {
        return Err(SchemeError::Syntax("set! requires (set! var value)".to_string()));
    }
    let name = match &items[1] {
        Datum::Symbol(s) => s.clone(),
        _ => return Err(SchemeError::Syntax("set! target must be a symbol".to_string())),
    };
    let value_exec = analyze(&items[2], false, false)?;
    Ok(Rc::new(move |env: &Rc<Environment>| {
        let v = value_exec(env)?;
        env.set(&name, v)?;
        Ok(Datum::Void)
    }))
}

fn analyze_definition(syntax: &Datum, cps_block: bool) -> Result<Executor, SchemeError> {
    let items = list_to_vec(syntax)?;
    if items.len() < 2 {
        return Err(SchemeError::Syntax("define requires a target".to_string()));
    }
    match &items[1] {
        // (define (name . params) body...) sugar for (define name (lambda params body...))
        Datum::Pair(p) => {
            let name = match &*p.car.borrow() {
                Datum::Symbol(s) => s.clone(),
                _ => return Err(SchemeError::Syntax("define target must be a symbol".to_string())),
            };
            let params = p.cdr.borrow().clone();
            let mut lambda_form = vec![sym("lambda"), params];
            lambda_form.extend(items[2..].iter().cloned());
            let value_exec = analyze_lambda(&vec_to_list(lambda_form), cps_block)?;
            Ok(make_define_executor(name, value_exec))
        }
        Datum::Symbol(s) => {
            let name = s.clone();
            let value_exec = if let Some(v) = items.get(2) {
                analyze(v, false, cps_block)?
            } else {
                Rc::new(|_: &Rc<Environment>| Ok(Datum::Undefined))
            };
            Ok(make_define_executor(name, value_exec))
        }
        _ => Err(SchemeError::Syntax("malformed define".to_string())),
    }
}

fn make_define_executor(name: Symbol, value_exec: Executor) -> Executor {
    Rc::new(move |env: &Rc<Environment>| {
        let v = value_exec(env)?;
        if let Datum::Procedure(p) = &v {
            if let Procedure::Compound(c) = p.as_ref() {
                if c.name.borrow().is_none() {
                    *c.name.borrow_mut() = Some(name.clone());
                }
            }
        }
        env.define(name.clone(), v);
        Ok(Datum::Void)
    })
}

fn parse_param_list(params: &Datum) -> ParamList {
    match params {
        Datum::EmptyList => ParamList::Fixed(Vec::new()),
        Datum::Symbol(s) => ParamList::Variadic { fixed: Vec::new(), rest: s.clone() },
        _ => {
            let (items, tail) = list_to_vec_dotted(params);
            let fixed: Vec<Symbol> = items
                .into_iter()
                .filter_map(|d| match d {
                    Datum::Symbol(s) => Some(s),
                    _ => None,
                })
                .collect();
            match tail {
                Datum::Symbol(rest) => ParamList::Variadic { fixed, rest },
                _ => ParamList::Fixed(fixed),
            }
        }
    }
}

fn analyze_lambda(syntax: &Datum, cps_block: bool) -> Result<Executor, SchemeError> {
    let items = list_to_vec(syntax)?;
    if items.len() < 2 {
        return Err(SchemeError::Syntax("lambda requires a parameter list".to_string()));
    }
    let mut params = parse_param_list(&items[1]);
    // A trailing parameter is only the continuation `cps::append_cont_param`
    // appended — never an ordinary trailing parameter or a CPS-internal
    // temporary a scaffolding lambda happens to declare — when its name
    // carries the continuation prefix (spec.md 6 Sentinels).
    let trailing_is_cont = cps_block
        && match &params {
            ParamList::Fixed(v) => v.last().map(|s| crate::gensym::is_continuation_name(s)).unwrap_or(false),
            ParamList::Variadic { fixed, .. } => fixed.last().map(|s| crate::gensym::is_continuation_name(s)).unwrap_or(false),
            ParamList::Sentinel => false,
        };
    let cont_param = if trailing_is_cont {
        match &mut params {
            ParamList::Fixed(v) => v.pop(),
            ParamList::Variadic { fixed, .. } => fixed.pop(),
            ParamList::Sentinel => None,
        }
    } else {
        None
    };
    let body_exec = analyze_body(&items[2..], true, cps_block)?;
    Ok(Rc::new(move |env: &Rc<Environment>| {
        let proc = CompoundProcedure {
            params: params.clone(),
            cont_param: cont_param.clone(),
            body: body_exec.clone(),
            env: env.clone(),
            recursion_depth: Cell::new(0),
            name: RefCell::new(None),
            inlines_call: false,
        };
        Ok(Datum::Procedure(Rc::new(Procedure::Compound(Rc::new(proc)))))
    }))
}

fn analyze_body(body: &[Datum], tail: bool, cps_block: bool) -> Result<Executor, SchemeError> {
    if body.is_empty() {
        return Ok(Rc::new(|_: &Rc<Environment>| Ok(Datum::Void)));
    }
    let execs: Vec<Executor> = body
        .iter()
        .enumerate()
        .map(|(i, e)| analyze(e, tail && i == body.len() - 1, cps_block))
        .collect::<Result<_, _>>()?;
    Ok(Rc::new(move |env: &Rc<Environment>| {
        let mut result = Datum::Void;
        for (i, exec) in execs.iter().enumerate() {
            if i + 1 == execs.len() {
                return exec(env);
            }
            result = exec(env)?;
        }
        Ok(result)
    }))
}

fn analyze_sequence_form(syntax: &Datum, tail: bool, cps_block: bool) -> Result<Executor, SchemeError> {
    let items = list_to_vec(syntax)?;
    analyze_body(&items[1..], tail, cps_block)
}

fn analyze_letrec(syntax: &Datum, tail: bool, cps_block: bool) -> Result<Executor, SchemeError> {
    let items = list_to_vec(syntax)?;
    let bindings = list_to_vec(&items[1])?;
    let mut names = Vec::new();
    let mut init_execs = Vec::new();
    for b in &bindings {
        let parts = list_to_vec(b)?;
        let name = match parts.first() {
            Some(Datum::Symbol(s)) => s.clone(),
            _ => return Err(SchemeError::Syntax("letrec binding must start with a symbol".to_string())),
        };
        let init = parts.get(1).cloned().unwrap_or(Datum::Undefined);
        names.push(name);
        init_execs.push(analyze(&init, false, cps_block)?);
    }
    let body_exec = analyze_body(&items[2..], tail, cps_block)?;
    Ok(Rc::new(move |env: &Rc<Environment>| {
        let inner = env.extend();
        for name in &names {
            inner.define(name.clone(), Datum::Undefined);
        }
        for (name, init) in names.iter().zip(init_execs.iter()) {
            let v = init(&inner)?;
            inner.set(name, v)?;
        }
        body_exec(&inner)
    }))
}

fn analyze_delay(syntax: &Datum) -> Result<Executor, SchemeError> {
    let items = list_to_vec(syntax)?;
    let body_exec = analyze_body(&items[1..], true, false)?;
    Ok(Rc::new(move |env: &Rc<Environment>| {
        Ok(Datum::Delay(Rc::new(RefCell::new(DelayObj {
            thunk: Some(body_exec.clone()),
            env: env.clone(),
            forced: false,
            value: Datum::Void,
        }))))
    }))
}

/// `(scons a b)` => a pair whose cdr is a promise, the minimal stream
/// constructor (spec.md supplemented "scons/stream" form).
fn analyze_scons(syntax: &Datum) -> Result<Executor, SchemeError> {
    let items = list_to_vec(syntax)?;
    if items.len() != 3 {
        return Err(SchemeError::Syntax("scons requires exactly two arguments".to_string()));
    }
    let car_exec = analyze(&items[1], false, false)?;
    let delay_form = vec_to_list(vec![sym("delay"), items[2].clone()]);
    let cdr_exec = analyze_delay(&delay_form)?;
    Ok(Rc::new(move |env: &Rc<Environment>| {
        let a = car_exec(env)?;
        let b = cdr_exec(env)?;
        Ok(cons(a, b))
    }))
}

fn analyze_syntax_rules_literal(syntax: &Datum) -> Result<Executor, SchemeError> {
    let items = list_to_vec(syntax)?;
    let sr = crate::syntax_rules::build_syntax_rules(&items, None)?;
    Ok(Rc::new(move |_env: &Rc<Environment>| Ok(Datum::SyntaxRules(sr.clone()))))
}

fn extract_syntax_rules(name: &Symbol, transformer_form: &Datum) -> Result<Rc<SyntaxRulesObj>, SchemeError> {
    let items = list_to_vec(transformer_form)?;
    if head(transformer_form).as_deref() != Some("syntax-rules") {
        return Err(SchemeError::Macro(format!("{name} is not bound to a syntax-rules transformer")));
    }
    crate::syntax_rules::build_syntax_rules(&items, Some(name.clone()))
}

fn analyze_define_syntax(syntax: &Datum) -> Result<Executor, SchemeError> {
    let items = list_to_vec(syntax)?;
    if items.len() != 3 {
        return Err(SchemeError::Syntax("define-syntax requires (define-syntax name transformer)".to_string()));
    }
    let name = match &items[1] {
        Datum::Symbol(s) => s.clone(),
        _ => return Err(SchemeError::Syntax("define-syntax target must be a symbol".to_string())),
    };
    let sr = extract_syntax_rules(&name, &items[2])?;
    RUNTIME_MACROS.with(|m| m.borrow_mut().insert(name, sr));
    Ok(Rc::new(|_: &Rc<Environment>| Ok(Datum::Void)))
}

fn analyze_core_syntax(syntax: &Datum) -> Result<Executor, SchemeError> {
    let items = list_to_vec(syntax)?;
    if items.len() != 3 {
        return Err(SchemeError::Syntax("core-syntax requires (core-syntax name transformer)".to_string()));
    }
    let name = match &items[1] {
        Datum::Symbol(s) => s.clone(),
        _ => return Err(SchemeError::Syntax("core-syntax target must be a symbol".to_string())),
    };
    let sr = extract_syntax_rules(&name, &items[2])?;
    CORE_SYNTAX.with(|m| m.borrow_mut().insert(name, sr));
    Ok(Rc::new(|_: &Rc<Environment>| Ok(Datum::Void)))
}

fn analyze_let_syntax(syntax: &Datum, tail: bool, cps_block: bool, _recursive: bool) -> Result<Executor, SchemeError> {
    let items = list_to_vec(syntax)?;
    let bindings = list_to_vec(&items[1])?;
    let mut scope = HashMap::new();
    for b in &bindings {
        let parts = list_to_vec(b)?;
        let name = match parts.first() {
            Some(Datum::Symbol(s)) => s.clone(),
            _ => return Err(SchemeError::Syntax("let-syntax binding must start with a symbol".to_string())),
        };
        let sr = extract_syntax_rules(&name, parts.get(1).ok_or_else(|| SchemeError::Syntax("missing transformer".to_string()))?)?;
        scope.insert(name, sr);
    }
    push_macro_scope(scope);
    let result = analyze_body(&items[2..], tail, cps_block);
    pop_macro_scope();
    result
}

fn analyze_scm_cps(syntax: &Datum, tail: bool) -> Result<Executor, SchemeError> {
    let items = list_to_vec(syntax)?;
    let transformed = crate::cps::transform_block(&items[1..])?;
    analyze(&transformed, tail, true)
}

/// `(cps-quote expr)` escapes back to ordinary direct-style analysis for
/// `expr`, ignoring any enclosing `scm->cps` conversion.
fn analyze_cps_quote(syntax: &Datum, tail: bool) -> Result<Executor, SchemeError> {
    let items = list_to_vec(syntax)?;
    analyze_body(&items[1..], tail, false)
}

/// True if `proc` is "CPS-aware": a compound procedure defined inside a
/// `scm->cps` block (its trailing parameter is a real continuation, per
/// `analyze_lambda`'s `is_continuation_name` check). Anything else — a
/// primitive, or a compound procedure defined outside any CPS block — is
/// "direct-style" and expects to be applied without a continuation argument
/// (spec.md 4.3's call-time distinction).
fn is_cps_aware(proc: &Procedure) -> bool {
    matches!(proc, Procedure::Compound(c) if c.cont_param.is_some())
}

fn as_procedure(d: &Datum) -> Result<Rc<Procedure>, SchemeError> {
    match d {
        Datum::Procedure(p) => Ok(p.clone()),
        other => Err(SchemeError::NotCallable(format!("{other}"))),
    }
}

/// `(heist:core:application-cps-tag proc arg... k)`: an application site the
/// CPS transform already converted. At call time, a direct-style target
/// (primitive, or a procedure defined outside any CPS block) is applied to
/// `arg...` alone and its result handed to `k`; a CPS-aware target (a
/// procedure defined inside a CPS block) receives `arg...` and `k` together,
/// as ordinary trailing arguments (spec.md 4.3, 4.5).
fn analyze_cps_application(syntax: &Datum, tail: bool) -> Result<Executor, SchemeError> {
    let items = list_to_vec(syntax)?;
    let rest = &items[1..];
    if rest.len() < 2 {
        return Err(SchemeError::Syntax("malformed CPS application".to_string()));
    }

    if let Datum::Symbol(s) = &rest[0] {
        if &**s == "call/cc" || &**s == "call-with-current-continuation" {
            return analyze_call_cc(rest, tail);
        }
    }

    let op_exec = analyze(&rest[0], false, true)?;
    let arg_execs: Vec<Executor> = rest[1..rest.len() - 1].iter().map(|a| analyze(a, false, true)).collect::<Result<_, _>>()?;
    let k_exec = analyze(&rest[rest.len() - 1], false, true)?;
    Ok(Rc::new(move |env: &Rc<Environment>| {
        let proc = as_procedure(&op_exec(env)?)?;
        let mut args = Vec::with_capacity(arg_execs.len());
        for a in &arg_execs {
            args.push(a(env)?);
        }
        let k_val = k_exec(env)?;
        if is_cps_aware(&proc) {
            args.push(k_val);
            crate::eval::apply(&proc, args, env, tail)
        } else {
            let result = crate::eval::trampoline(crate::eval::apply(&proc, args, env, false)?)?;
            let k_proc = as_procedure(&k_val)?;
            crate::eval::apply(&k_proc, vec![result], env, tail)
        }
    }))
}

/// `(call/cc f)` realized through the CPS transform alone (spec.md
/// Non-goal: no general partial continuation support, just the escaping,
/// invoked-at-most-once shape the transform can express structurally): `f`
/// (itself CPS-converted, since it was a literal `lambda` in source
/// position) is invoked with an escape procedure and the ambient
/// continuation. Invoking the escape procedure abandons whatever
/// continuation it would otherwise return to and jumps straight to the
/// ambient continuation captured here; returning normally from `f` instead
/// flows to that same ambient continuation, exactly as if `call/cc` were
/// not there.
fn analyze_call_cc(rest: &[Datum], tail: bool) -> Result<Executor, SchemeError> {
    if rest.len() != 3 {
        return Err(SchemeError::Syntax("call/cc requires exactly one procedure argument".to_string()));
    }
    let f_exec = analyze(&rest[1], false, true)?;
    let k_exec = analyze(&rest[2], false, true)?;
    let escape_value_name = intern("heist:core:escape-value");
    let escape_cont_name = crate::gensym::cps_continuation_symbol();
    Ok(Rc::new(move |env: &Rc<Environment>| {
        let f_proc = as_procedure(&f_exec(env)?)?;
        let k_val = k_exec(env)?;
        let k_proc = as_procedure(&k_val)?;

        let escaped_k = k_proc.clone();
        let value_name = escape_value_name.clone();
        let escape_body: Executor = Rc::new(move |call_env: &Rc<Environment>| {
            let v = call_env.lookup(&value_name)?;
            crate::eval::apply(&escaped_k, vec![v], call_env, true)
        });
        let escape = CompoundProcedure {
            params: ParamList::Fixed(vec![escape_value_name.clone()]),
            cont_param: Some(escape_cont_name.clone()),
            body: escape_body,
            env: env.clone(),
            recursion_depth: Cell::new(0),
            name: RefCell::new(Some(intern("continuation"))),
            inlines_call: false,
        };
        let escape_val = Datum::Procedure(Rc::new(Procedure::Compound(Rc::new(escape))));

        if is_cps_aware(&f_proc) {
            crate::eval::apply(&f_proc, vec![escape_val, k_val], env, tail)
        } else {
            let result = crate::eval::trampoline(crate::eval::apply(&f_proc, vec![escape_val], env, false)?)?;
            crate::eval::apply(&k_proc, vec![result], env, tail)
        }
    }))
}

/// `(catch-jump body ...)`: evaluates `body` and converts the innermost
/// `(jump! v)` thrown from within it into `v` (spec.md 5, 7's single-shot
/// non-local-return channel). Never itself in tail position: it must stay on
/// the Rust stack to intercept the error the trampoline would otherwise
/// propagate past it.
fn analyze_catch_jump(syntax: &Datum, cps_block: bool) -> Result<Executor, SchemeError> {
    let items = list_to_vec(syntax)?;
    let body_exec = analyze_body(&items[1..], false, cps_block)?;
    Ok(Rc::new(move |env: &Rc<Environment>| match body_exec(env) {
        Err(SchemeError::Jump(v)) => Ok(v),
        other => other,
    }))
}

/// `(call/ce proc arg ...)`: applies `proc` with the caller's frame chain
/// spliced in regardless of `proc`'s own `inlines-call?` flag — the
/// call-site opt-in to dynamic scoping (spec.md 4.4, 9's `call/ce`).
fn analyze_call_ce(syntax: &Datum, tail: bool, cps_block: bool) -> Result<Executor, SchemeError> {
    let items = list_to_vec(syntax)?;
    if items.len() < 2 {
        return Err(SchemeError::Syntax("call/ce requires a procedure to call".to_string()));
    }
    let op_exec = analyze(&items[1], false, cps_block)?;
    let arg_execs: Vec<Executor> = items[2..].iter().map(|a| analyze(a, false, cps_block)).collect::<Result<_, _>>()?;
    Ok(Rc::new(move |env: &Rc<Environment>| {
        let proc = as_procedure(&op_exec(env)?)?;
        let mut args = Vec::with_capacity(arg_execs.len());
        for a in &arg_execs {
            args.push(a(env)?);
        }
        crate::eval::apply_dynamic(&proc, args, env, tail)
    }))
}

fn analyze_application(syntax: &Datum, tail: bool, cps_block: bool) -> Result<Executor, SchemeError> {
    let items = list_to_vec(syntax)?;
    if items.is_empty() {
        return Err(SchemeError::Syntax("empty application".to_string()));
    }
    let op_exec = analyze(&items[0], false, cps_block)?;
    let arg_execs: Vec<Executor> = items[1..].iter().map(|a| analyze(a, false, cps_block)).collect::<Result<_, _>>()?;
    Ok(Rc::new(move |env: &Rc<Environment>| {
        let proc_val = op_exec(env)?;
        let proc = match &proc_val {
            Datum::Procedure(p) => p.clone(),
            other => return Err(SchemeError::NotCallable(format!("{other}"))),
        };
        let mut args = Vec::with_capacity(arg_execs.len());
        for a in &arg_execs {
            args.push(a(env)?);
        }
        crate::eval::apply(&proc, args, env, tail)
    }))
}

pub(crate) fn desugar_let(syntax: &Datum) -> Result<Datum, SchemeError> {
    let items = list_to_vec(syntax)?;
    if let Some(Datum::Symbol(name)) = items.get(1) {
        // Named let: ((letrec ((name (lambda (vars...) body...))) name) inits...)
        let bindings = list_to_vec(&items[2])?;
        let mut vars = Vec::new();
        let mut inits = Vec::new();
        for b in &bindings {
            let parts = list_to_vec(b)?;
            vars.push(parts[0].clone());
            inits.push(parts.get(1).cloned().unwrap_or(Datum::Void));
        }
        let mut lambda_form = vec![sym("lambda"), vec_to_list(vars)];
        lambda_form.extend(items[3..].iter().cloned());
        let binding = vec_to_list(vec![Datum::Symbol(name.clone()), vec_to_list(lambda_form)]);
        let letrec_form = vec_to_list(vec![sym("letrec"), vec_to_list(vec![binding]), Datum::Symbol(name.clone())]);
        let mut call = vec![letrec_form];
        call.extend(inits);
        Ok(vec_to_list(call))
    } else {
        let bindings = list_to_vec(&items[1])?;
        let mut vars = Vec::new();
        let mut inits = Vec::new();
        for b in &bindings {
            let parts = list_to_vec(b)?;
            vars.push(parts[0].clone());
            inits.push(parts.get(1).cloned().unwrap_or(Datum::Void));
        }
        let mut lambda_form = vec![sym("lambda"), vec_to_list(vars)];
        lambda_form.extend(items[2..].iter().cloned());
        let mut call = vec![vec_to_list(lambda_form)];
        call.extend(inits);
        Ok(vec_to_list(call))
    }
}

pub(crate) fn desugar_let_star(syntax: &Datum) -> Result<Datum, SchemeError> {
    let items = list_to_vec(syntax)?;
    let bindings = list_to_vec(&items[1])?;
    if bindings.is_empty() {
        let mut form = vec![sym("let"), Datum::EmptyList];
        form.extend(items[2..].iter().cloned());
        return Ok(vec_to_list(form));
    }
    let mut body: Vec<Datum> = items[2..].to_vec();
    for b in bindings.into_iter().rev() {
        let mut let_form = vec![sym("let"), vec_to_list(vec![b])];
        let_form.extend(body);
        body = vec![vec_to_list(let_form)];
    }
    Ok(body.into_iter().next().unwrap())
}

pub(crate) fn desugar_cond(syntax: &Datum) -> Result<Datum, SchemeError> {
    let items = list_to_vec(syntax)?;
    desugar_cond_clauses(&items[1..])
}

fn desugar_cond_clauses(clauses: &[Datum]) -> Result<Datum, SchemeError> {
    if clauses.is_empty() {
        return Ok(Datum::Void);
    }
    let parts = list_to_vec(&clauses[0])?;
    let test = parts.first().cloned().unwrap_or(Datum::Boolean(false));
    if matches!(&test, Datum::Symbol(s) if &**s == "else") {
        let mut body = vec![sym("begin")];
        body.extend(parts[1..].iter().cloned());
        return Ok(vec_to_list(body));
    }
    let mut then_body = vec![sym("begin")];
    then_body.extend(parts[1..].iter().cloned());
    let then = if parts.len() > 1 { vec_to_list(then_body) } else { test.clone() };
    let rest = desugar_cond_clauses(&clauses[1..])?;
    Ok(vec_to_list(vec![sym("if"), test, then, rest]))
}

pub(crate) fn desugar_case(syntax: &Datum) -> Result<Datum, SchemeError> {
    let items = list_to_vec(syntax)?;
    let key = items.get(1).cloned().ok_or_else(|| SchemeError::Syntax("case requires a key expression".to_string()))?;
    let caseval = intern("heist:core:case-key");
    let mut cond_clauses = Vec::new();
    for clause in &items[2..] {
        let parts = list_to_vec(clause)?;
        let datums = parts.first().cloned().unwrap_or(Datum::Boolean(false));
        if matches!(&datums, Datum::Symbol(s) if &**s == "else") {
            cond_clauses.push(clause.clone());
            continue;
        }
        let quoted_datums = quote_lit(datums);
        let test = vec_to_list(vec![sym("memv"), Datum::Symbol(caseval.clone()), quoted_datums]);
        let mut new_clause = vec![test];
        new_clause.extend(parts[1..].iter().cloned());
        cond_clauses.push(vec_to_list(new_clause));
    }
    let mut cond_form = vec![sym("cond")];
    cond_form.extend(cond_clauses);
    let binding = vec_to_list(vec![Datum::Symbol(caseval), key]);
    Ok(vec_to_list(vec![sym("let"), vec_to_list(vec![binding]), vec_to_list(cond_form)]))
}

pub(crate) fn desugar_do(syntax: &Datum) -> Result<Datum, SchemeError> {
    let items = list_to_vec(syntax)?;
    let specs = list_to_vec(&items[1])?;
    let test_clause = list_to_vec(&items[2])?;
    let test = test_clause.first().cloned().unwrap_or(Datum::Boolean(false));
    let result_body = &test_clause[1..];
    let commands = &items[3..];

    let loop_name = intern("heist:core:do-loop");
    let mut vars = Vec::new();
    let mut inits = Vec::new();
    let mut steps = Vec::new();
    for spec in &specs {
        let parts = list_to_vec(spec)?;
        let var = parts[0].clone();
        let init = parts.get(1).cloned().unwrap_or(Datum::Void);
        let step = parts.get(2).cloned().unwrap_or_else(|| var.clone());
        vars.push(var);
        inits.push(init);
        steps.push(step);
    }

    let mut result_form = vec![sym("begin")];
    result_form.extend(result_body.iter().cloned());

    let mut recur_call = vec![Datum::Symbol(loop_name.clone())];
    recur_call.extend(steps);

    let mut loop_body = vec![sym("begin")];
    loop_body.extend(commands.iter().cloned());
    loop_body.push(vec_to_list(recur_call));

    let if_form = vec_to_list(vec![sym("if"), test, vec_to_list(result_form), vec_to_list(loop_body)]);

    let bindings: Vec<Datum> = vars
        .iter()
        .zip(inits.iter())
        .map(|(v, i)| vec_to_list(vec![v.clone(), i.clone()]))
        .collect();

    let let_form = vec![sym("let"), Datum::Symbol(loop_name), vec_to_list(bindings), if_form];
    Ok(vec_to_list(let_form))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::parse_one;

    fn run(src: &str) -> Datum {
        let env = Environment::new_global();
        crate::primitives::install(&env);
        let form = parse_one(src).unwrap();
        let exec = analyze(&form, false, false).unwrap();
        exec(&env).unwrap()
    }

    #[test]
    fn self_evaluating_number() {
        assert!(matches!(run("42"), Datum::Number(_)));
    }

    #[test]
    fn if_picks_branch() {
        assert!(matches!(run("(if #t 1 2)"), Datum::Number(n) if n.to_f64() == 1.0));
    }

    #[test]
    fn and_or_sentinels() {
        assert!(matches!(run("(and)"), Datum::Boolean(true)));
        assert!(matches!(run("(or)"), Datum::Boolean(false)));
    }

    #[test]
    fn let_binds_locally() {
        assert!(matches!(run("(let ((x 5)) (+ x 1))"), Datum::Number(n) if n.to_f64() == 6.0));
    }

    #[test]
    fn named_let_loops() {
        let v = run("(let loop ((i 0) (acc 0)) (if (= i 5) acc (loop (+ i 1) (+ acc i))))");
        assert!(matches!(v, Datum::Number(n) if n.to_f64() == 10.0));
    }

    #[test]
    fn quasiquote_splices() {
        let v = run("`(1 ,(+ 1 1) ,@(list 3 4))");
        let items = list_to_vec(&v).unwrap();
        assert_eq!(items.len(), 4);
    }

    #[test]
    fn catch_jump_converts_innermost_jump_to_its_value() {
        let v = run("(catch-jump (+ 1 (jump! 42)) 99)");
        assert!(matches!(v, Datum::Number(n) if n.to_f64() == 42.0));
    }

    #[test]
    fn catch_jump_passes_through_normal_value() {
        assert!(matches!(run("(catch-jump (+ 1 2))"), Datum::Number(n) if n.to_f64() == 3.0));
    }

    #[test]
    fn call_ce_splices_caller_frame_into_callee() {
        let env = Environment::new_global();
        crate::primitives::install(&env);
        let caller_def = parse_one("(define (caller) (define z 10) (call/ce callee))").unwrap();
        let callee_def = parse_one("(define (callee) z)").unwrap();
        analyze(&callee_def, false, false).unwrap()(&env).unwrap();
        analyze(&caller_def, false, false).unwrap()(&env).unwrap();
        let call = parse_one("(caller)").unwrap();
        let v = analyze(&call, false, false).unwrap()(&env).unwrap();
        assert!(matches!(v, Datum::Number(n) if n.to_f64() == 10.0));
    }

    #[test]
    fn macro_expands_before_application() {
        let env = Environment::new_global();
        crate::primitives::install(&env);
        let def = parse_one("(define-syntax my-or (syntax-rules () ((_ a b) (if a a b))))").unwrap();
        analyze(&def, false, false).unwrap()(&env).unwrap();
        let call = parse_one("(my-or #f 7)").unwrap();
        let v = analyze(&call, false, false).unwrap()(&env).unwrap();
        assert!(matches!(v, Datum::Number(n) if n.to_f64() == 7.0));
    }
}
