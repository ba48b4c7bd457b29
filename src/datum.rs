// ABOUTME: Datum - the tagged union of every runtime value the core manipulates

use std::cell::{Cell, RefCell};
use std::cell::RefCell as Rf;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::env::Environment;
use crate::error::SchemeError;
use crate::numeric::Number;

/// Interned symbol name. `Rc<str>` already compares by content, so interning
/// here is purely an allocation-sharing optimization, not a correctness
/// requirement.
pub type Symbol = Rc<str>;

thread_local! {
    static INTERNER: RefCell<HashMap<String, Symbol>> = RefCell::new(HashMap::new());
}

pub fn intern(name: &str) -> Symbol {
    INTERNER.with(|tbl| {
        if let Some(existing) = tbl.borrow().get(name) {
            return existing.clone();
        }
        let sym: Symbol = Rc::from(name);
        tbl.borrow_mut().insert(name.to_string(), sym.clone());
        sym
    })
}

/// A character datum. The EOF object is a distinct character value rather
/// than its own `Datum` case (spec.md 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CharValue {
    Ch(char),
    Eof,
}

impl fmt::Display for CharValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CharValue::Ch(c) => write!(f, "#\\{c}"),
            CharValue::Eof => write!(f, "#\\eof"),
        }
    }
}

/// A mutable cons cell.
#[derive(Debug)]
pub struct PairCell {
    pub car: RefCell<Datum>,
    pub cdr: RefCell<Datum>,
}

pub type PairRef = Rc<PairCell>;

pub fn cons(car: Datum, cdr: Datum) -> Datum {
    Datum::Pair(Rc::new(PairCell {
        car: RefCell::new(car),
        cdr: RefCell::new(cdr),
    }))
}

/// Parameter list shape for a compound procedure (spec.md 4.1, 4.4).
#[derive(Debug, Clone)]
pub enum ParamList {
    /// `((lambda () ...))` invoked with the argless sentinel.
    Sentinel,
    Fixed(Vec<Symbol>),
    Variadic { fixed: Vec<Symbol>, rest: Symbol },
}

pub struct CompoundProcedure {
    pub params: ParamList,
    /// Present only for lambdas analyzed inside a CPS block: the trailing
    /// continuation parameter appended to the parameter list (spec.md 4.3).
    pub cont_param: Option<Symbol>,
    pub body: crate::analyze::Executor,
    pub env: Rc<Environment>,
    /// Shared across every invocation of *this* closure value (spec.md 3).
    pub recursion_depth: Cell<usize>,
    /// Cosmetic name assigned by `define`/`set!`, used only in error/trace output.
    pub name: Rf<Option<Symbol>>,
    /// Enables dynamic-scope frame splicing at call sites (spec.md 4.4).
    pub inlines_call: bool,
}

impl fmt::Debug for CompoundProcedure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompoundProcedure")
            .field("name", &self.name.borrow())
            .field("params", &self.params)
            .finish()
    }
}

pub struct PrimitiveProcedure {
    pub name: Symbol,
    /// The environment is always passed through; most primitives ignore it.
    /// `apply`/`eval`/`force` are the ones that need it to recurse back into
    /// the interpreter.
    pub func: fn(&mut Vec<Datum>, &Rc<Environment>) -> Result<Datum, SchemeError>,
}

impl fmt::Debug for PrimitiveProcedure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrimitiveProcedure").field("name", &self.name).finish()
    }
}

#[derive(Debug)]
pub enum Procedure {
    Compound(Rc<CompoundProcedure>),
    Primitive(Rc<PrimitiveProcedure>),
}

impl Procedure {
    pub fn name(&self) -> Option<Symbol> {
        match self {
            Procedure::Compound(c) => c.name.borrow().clone(),
            Procedure::Primitive(p) => Some(p.name.clone()),
        }
    }
}

/// A `syntax-rules` macro transformer (spec.md 4.2).
#[derive(Debug)]
pub struct SyntaxRulesObj {
    pub label: Option<Symbol>,
    pub ellipsis: Symbol,
    pub literals: Vec<Symbol>,
    pub rules: Vec<crate::syntax_rules::Rule>,
}

#[derive(Debug)]
pub struct DelayObj {
    pub thunk: Option<crate::analyze::Executor>,
    pub env: Rc<Environment>,
    pub forced: bool,
    pub value: Datum,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortDirection {
    Input,
    Output,
}

/// Minimal port interface (the I/O primitives behind it are out of scope;
/// spec.md 1/6 name the registry only so the core can reason about the
/// `Port` datum case and its open/closed lifecycle).
#[derive(Debug)]
pub struct PortObj {
    pub direction: PortDirection,
    pub is_file: bool,
    pub open: bool,
    pub buffer: RefCell<String>,
}

#[derive(Debug)]
pub struct ClassProto {
    pub members: Vec<Symbol>,
    pub methods: Vec<(Symbol, Datum)>,
    pub super_proto: Option<Rc<ClassProto>>,
}

#[derive(Debug)]
pub struct ObjectObj {
    pub proto: Rc<ClassProto>,
    pub member_values: RefCell<HashMap<Symbol, Datum>>,
}

/// A hashable key for `Datum::HashMap` (spec.md 3: "hashable keys are
/// string/number/character/symbol/boolean/nil").
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HashKey {
    Str(String),
    Number(crate::numeric::NumberKey),
    Char(CharValue),
    Symbol(Symbol),
    Bool(bool),
    Nil,
}

impl HashKey {
    pub fn from_datum(d: &Datum) -> Option<HashKey> {
        match d {
            Datum::Str(s) => Some(HashKey::Str(s.borrow().clone())),
            Datum::Number(n) => Some(HashKey::Number(n.key())),
            Datum::Character(c) => Some(HashKey::Char(*c)),
            Datum::Symbol(s) => Some(HashKey::Symbol(s.clone())),
            Datum::Boolean(b) => Some(HashKey::Bool(*b)),
            Datum::EmptyList => Some(HashKey::Nil),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Datum {
    Number(Number),
    Character(CharValue),
    Str(Rc<RefCell<String>>),
    Symbol(Symbol),
    Boolean(bool),
    Pair(PairRef),
    Vector(Rc<RefCell<Vec<Datum>>>),
    HashMap(Rc<RefCell<HashMap<HashKey, Datum>>>),
    Procedure(Rc<Procedure>),
    SyntaxRules(Rc<SyntaxRulesObj>),
    Delay(Rc<RefCell<DelayObj>>),
    Port(Rc<RefCell<PortObj>>),
    Object(Rc<RefCell<ObjectObj>>),
    ClassPrototype(Rc<ClassProto>),
    /// A raw, not-yet-analyzed syntax tree node (nested expression vectors).
    Expression(Rc<Vec<Datum>>),
    /// Internal trampoline record: an executor/environment pair the outer
    /// evaluation loop must re-invoke instead of treating as a final value
    /// (spec.md 4.4, 9 — "tail-call trampoline record").
    TailCall(Rc<(crate::analyze::Executor, Rc<Environment>)>),
    EmptyList,
    Void,
    Undefined,
    /// "Does not exist" — distinct from `Undefined` (a letrec pre-binding)
    /// and from an absent key lookup.
    Dne,
}

impl Datum {
    pub fn string(s: impl Into<String>) -> Datum {
        Datum::Str(Rc::new(RefCell::new(s.into())))
    }

    pub fn symbol(name: &str) -> Datum {
        Datum::Symbol(intern(name))
    }

    pub fn vector(items: Vec<Datum>) -> Datum {
        Datum::Vector(Rc::new(RefCell::new(items)))
    }

    pub fn is_pair(&self) -> bool {
        matches!(self, Datum::Pair(_))
    }

    pub fn is_expression(&self) -> bool {
        matches!(self, Datum::Expression(_))
    }

    /// View this datum as a syntax-tree node's children, if it is one.
    pub fn as_expr(&self) -> Option<&[Datum]> {
        match self {
            Datum::Expression(v) => Some(v),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Datum::Number(_) => "number",
            Datum::Character(_) => "character",
            Datum::Str(_) => "string",
            Datum::Symbol(_) => "symbol",
            Datum::Boolean(_) => "boolean",
            Datum::Pair(_) => "pair",
            Datum::Vector(_) => "vector",
            Datum::HashMap(_) => "hash-map",
            Datum::Procedure(_) => "procedure",
            Datum::SyntaxRules(_) => "syntax-rules",
            Datum::Delay(_) => "promise",
            Datum::Port(_) => "port",
            Datum::Object(_) => "object",
            Datum::ClassPrototype(_) => "class-prototype",
            Datum::Expression(_) => "expression",
            Datum::TailCall(_) => "tail-call",
            Datum::EmptyList => "empty-list",
            Datum::Void => "void",
            Datum::Undefined => "undefined",
            Datum::Dne => "dne",
        }
    }

    /// Proper/dotted/cyclic list-shape classification via Floyd's
    /// tortoise-and-hare (spec.md 3, 9).
    pub fn list_shape(&self) -> ListShape {
        let mut slow = self.clone();
        let mut fast = self.clone();
        loop {
            match &fast {
                Datum::EmptyList => return ListShape::Ok,
                Datum::Pair(p) => {
                    fast = p.cdr.borrow().clone();
                }
                _ => return ListShape::NoNull,
            }
            match &fast {
                Datum::EmptyList => return ListShape::Ok,
                Datum::Pair(p) => {
                    fast = p.cdr.borrow().clone();
                }
                _ => return ListShape::NoNull,
            }
            slow = match &slow {
                Datum::Pair(p) => p.cdr.borrow().clone(),
                _ => return ListShape::NoNull,
            };
            if let (Datum::Pair(a), Datum::Pair(b)) = (&slow, &fast) {
                if Rc::ptr_eq(a, b) {
                    return ListShape::Cyclic;
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListShape {
    Ok,
    NoNull,
    Cyclic,
}

/// Collect a proper list into a `Vec`, the way `analyze` and the macro
/// expander index into syntax by position rather than walking cons chains
/// by hand.
pub fn list_to_vec(d: &Datum) -> Result<Vec<Datum>, SchemeError> {
    let mut out = Vec::new();
    let mut cur = d.clone();
    loop {
        match cur {
            Datum::EmptyList => return Ok(out),
            Datum::Pair(p) => {
                out.push(p.car.borrow().clone());
                cur = p.cdr.borrow().clone();
            }
            other => return Err(SchemeError::type_error("proper list", &other, "list_to_vec")),
        }
    }
}

/// Like [`list_to_vec`] but tolerates (and reports) a dotted tail, returning
/// the improper final cdr alongside the collected prefix.
pub fn list_to_vec_dotted(d: &Datum) -> (Vec<Datum>, Datum) {
    let mut out = Vec::new();
    let mut cur = d.clone();
    loop {
        match cur {
            Datum::Pair(p) => {
                out.push(p.car.borrow().clone());
                cur = p.cdr.borrow().clone();
            }
            other => return (out, other),
        }
    }
}

pub fn vec_to_list(items: Vec<Datum>) -> Datum {
    vec_to_improper_list(items, Datum::EmptyList)
}

pub fn vec_to_improper_list(items: Vec<Datum>, tail: Datum) -> Datum {
    let mut result = tail;
    for item in items.into_iter().rev() {
        result = cons(item, result);
    }
    result
}

impl fmt::Display for Datum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_datum(self, f, &mut Vec::new())
    }
}

fn write_datum(d: &Datum, f: &mut fmt::Formatter<'_>, seen: &mut Vec<*const PairCell>) -> fmt::Result {
    match d {
        Datum::Number(n) => write!(f, "{n}"),
        Datum::Character(c) => write!(f, "{c}"),
        Datum::Str(s) => write!(f, "\"{}\"", s.borrow()),
        Datum::Symbol(s) => write!(f, "{s}"),
        Datum::Boolean(b) => write!(f, "{}", if *b { "#t" } else { "#f" }),
        Datum::EmptyList => write!(f, "()"),
        Datum::Void => write!(f, ""),
        Datum::Undefined => write!(f, "#<undefined>"),
        Datum::Dne => write!(f, "#<dne>"),
        Datum::Pair(p) => {
            let ptr = Rc::as_ptr(p);
            if seen.contains(&ptr) {
                return write!(f, "#<cycle>");
            }
            seen.push(ptr);
            write!(f, "(")?;
            write_datum(&p.car.borrow(), f, seen)?;
            let mut cur = p.cdr.borrow().clone();
            loop {
                match cur {
                    Datum::EmptyList => break,
                    Datum::Pair(ref np) => {
                        let nptr = Rc::as_ptr(np);
                        if seen.contains(&nptr) {
                            write!(f, " . #<cycle>")?;
                            break;
                        }
                        seen.push(nptr);
                        write!(f, " ")?;
                        write_datum(&np.car.borrow(), f, seen)?;
                        cur = np.cdr.borrow().clone();
                    }
                    other => {
                        write!(f, " . ")?;
                        write_datum(&other, f, seen)?;
                        break;
                    }
                }
            }
            write!(f, ")")
        }
        Datum::Vector(v) => {
            write!(f, "#(")?;
            for (i, item) in v.borrow().iter().enumerate() {
                if i > 0 {
                    write!(f, " ")?;
                }
                write_datum(item, f, seen)?;
            }
            write!(f, ")")
        }
        Datum::HashMap(_) => write!(f, "#<hash-map>"),
        Datum::Procedure(p) => match p.as_ref() {
            Procedure::Compound(c) => match &*c.name.borrow() {
                Some(n) => write!(f, "#<procedure {n}>"),
                None => write!(f, "#<procedure anonymous>"),
            },
            Procedure::Primitive(p) => write!(f, "#<primitive {}>", p.name),
        },
        Datum::SyntaxRules(s) => match &s.label {
            Some(l) => write!(f, "#<syntax-rules {l}>"),
            None => write!(f, "#<syntax-rules>"),
        },
        Datum::Delay(_) => write!(f, "#<promise>"),
        Datum::Port(p) => write!(f, "#<port {:?}>", p.borrow().direction),
        Datum::Object(_) => write!(f, "#<object>"),
        Datum::ClassPrototype(_) => write!(f, "#<class-prototype>"),
        Datum::Expression(_) => write!(f, "#<expression>"),
        Datum::TailCall(_) => write!(f, "#<tail-call>"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_shares_allocation_by_value() {
        let a = intern("foo");
        let b = intern("foo");
        assert_eq!(a, b);
    }

    #[test]
    fn cyclic_pair_is_detected() {
        let p = Rc::new(PairCell {
            car: RefCell::new(Datum::Number(Number::from_i64(1))),
            cdr: RefCell::new(Datum::EmptyList),
        });
        *p.cdr.borrow_mut() = Datum::Pair(p.clone());
        assert_eq!(Datum::Pair(p).list_shape(), ListShape::Cyclic);
    }

    #[test]
    fn proper_list_is_ok() {
        let lst = cons(Datum::Number(Number::from_i64(1)), cons(Datum::Number(Number::from_i64(2)), Datum::EmptyList));
        assert_eq!(lst.list_shape(), ListShape::Ok);
    }

    #[test]
    fn dotted_list_is_no_null() {
        let lst = cons(Datum::Number(Number::from_i64(1)), Datum::Number(Number::from_i64(2)));
        assert_eq!(lst.list_shape(), ListShape::NoNull);
    }
}
