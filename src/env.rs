// ABOUTME: Lexical environments as leaf-first frame chains, supporting dynamic-scope splicing

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::datum::{intern, Datum, Symbol};
use crate::error::SchemeError;

/// One lexical scope's bindings. Macro bindings are kept in a side table
/// since `define-syntax` macros and ordinary variables never collide (spec.md
/// 4.2 keeps the runtime macro scope separate from the variable scope).
#[derive(Debug, Default)]
pub struct Frame {
    vars: RefCell<HashMap<Symbol, Datum>>,
    macros: RefCell<HashMap<Symbol, Datum>>,
}

impl Frame {
    pub fn new() -> Rc<Frame> {
        Rc::new(Frame::default())
    }
}

/// A chain of frames, leaf (innermost) first. Ordinary lexical extension
/// prepends a single new frame; dynamic-scope splicing (`inlines-call?`)
/// instead prepends a new frame *and* the caller's entire chain ahead of the
/// callee's captured base, so lookups see the caller's bindings too
/// (spec.md 4.4).
#[derive(Debug, Clone)]
pub struct Environment {
    frames: Vec<Rc<Frame>>,
}

impl Environment {
    pub fn new_global() -> Rc<Environment> {
        Rc::new(Environment { frames: vec![Frame::new()] })
    }

    /// Ordinary lexical extension: one fresh frame ahead of `self`.
    pub fn extend(self: &Rc<Environment>) -> Rc<Environment> {
        let mut frames = Vec::with_capacity(self.frames.len() + 1);
        frames.push(Frame::new());
        frames.extend(self.frames.iter().cloned());
        Rc::new(Environment { frames })
    }

    /// Dynamic-scope splice: `caller`'s whole frame chain is inserted between
    /// a fresh leaf frame and `self` (the callee closure's captured base),
    /// realizing `call/ce`/`inlines-call?` (spec.md 4.4).
    pub fn extend_dynamic(self: &Rc<Environment>, caller: &Rc<Environment>) -> Rc<Environment> {
        let mut frames = Vec::with_capacity(1 + caller.frames.len() + self.frames.len());
        frames.push(Frame::new());
        frames.extend(caller.frames.iter().cloned());
        frames.extend(self.frames.iter().cloned());
        Rc::new(Environment { frames })
    }

    fn leaf(&self) -> &Rc<Frame> {
        &self.frames[0]
    }

    pub fn define(&self, name: Symbol, value: Datum) {
        self.leaf().vars.borrow_mut().insert(name, value);
    }

    pub fn lookup(&self, name: &str) -> Result<Datum, SchemeError> {
        for frame in &self.frames {
            if let Some(v) = frame.vars.borrow().get(name) {
                if matches!(v, Datum::Undefined) {
                    return Err(SchemeError::UndefinedVariable(name.to_string()));
                }
                return Ok(v.clone());
            }
        }
        Err(SchemeError::UnboundVariable(name.to_string()))
    }

    pub fn set(&self, name: &str, value: Datum) -> Result<(), SchemeError> {
        for frame in &self.frames {
            let mut vars = frame.vars.borrow_mut();
            if vars.contains_key(name) {
                vars.insert(intern(name), value);
                return Ok(());
            }
        }
        Err(SchemeError::UnboundVariable(name.to_string()))
    }

    pub fn define_macro(&self, name: Symbol, transformer: Datum) {
        self.leaf().macros.borrow_mut().insert(name, transformer);
    }

    pub fn lookup_macro(&self, name: &str) -> Option<Datum> {
        for frame in &self.frames {
            if let Some(v) = frame.macros.borrow().get(name) {
                return Some(v.clone());
            }
        }
        None
    }

    /// Reset to a brand-new top-level environment, the `null-environment`
    /// idiom used by `eval` with an explicit environment and by nested
    /// sandboxed evaluation (spec.md 5, supplemented from
    /// `original_source`'s `G::GLOBAL_ENVIRONMENT_POINTER` reset pattern).
    pub fn fresh_global() -> Rc<Environment> {
        Environment::new_global()
    }
}

thread_local! {
    static FALSEY: RefCell<Vec<Datum>> = RefCell::new(vec![Datum::Boolean(false)]);
}

/// Whether `v` is treated as false by `if`/`and`/`or`/`cond`/etc. The set is
/// runtime-mutable via `set-falsey!`/`set-truthy!` (spec.md 3), and always
/// contains at least `#f`: `set-truthy!` on `#f` is a `SchemeError` rather
/// than silently emptying the set.
pub fn is_falsey(v: &Datum) -> bool {
    FALSEY.with(|set| {
        set.borrow().iter().any(|f| crate::equality::eqv(f, v))
    })
}

pub fn set_falsey(v: Datum) -> Result<(), SchemeError> {
    if crate::equality::eqv(&v, &Datum::Boolean(true)) {
        return Err(SchemeError::Custom(
            "cannot mark #t as falsey: #t must always remain truthy".to_string(),
        ));
    }
    FALSEY.with(|set| {
        let mut set = set.borrow_mut();
        if !set.iter().any(|f| crate::equality::eqv(f, &v)) {
            set.push(v);
        }
    });
    Ok(())
}

pub fn set_truthy(v: &Datum) -> Result<(), SchemeError> {
    if crate::equality::eqv(v, &Datum::Boolean(false)) {
        return Err(SchemeError::Custom(
            "cannot mark #f as truthy: the falsey set must always contain #f".to_string(),
        ));
    }
    FALSEY.with(|set| {
        set.borrow_mut().retain(|f| !crate::equality::eqv(f, v));
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_falls_through_frame_chain() {
        let global = Environment::new_global();
        global.define(intern("x"), Datum::Boolean(true));
        let inner = global.extend();
        assert!(matches!(inner.lookup("x"), Ok(Datum::Boolean(true))));
    }

    #[test]
    fn set_requires_existing_binding() {
        let global = Environment::new_global();
        assert!(global.set("y", Datum::Boolean(true)).is_err());
    }

    #[test]
    fn dynamic_extend_sees_caller_frame() {
        let callee_base = Environment::new_global();
        let caller = Environment::new_global();
        caller.define(intern("z"), Datum::Boolean(true));
        let spliced = callee_base.extend_dynamic(&caller);
        assert!(matches!(spliced.lookup("z"), Ok(Datum::Boolean(true))));
    }

    #[test]
    fn falsey_set_always_contains_false() {
        assert!(set_truthy(&Datum::Boolean(false)).is_err());
    }
}
