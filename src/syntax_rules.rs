// ABOUTME: Hygienic syntax-rules pattern matching, template substitution, and macro expansion

use std::collections::HashMap;
use std::rc::Rc;

use crate::datum::{cons, intern, list_to_vec_dotted, vec_to_improper_list, Datum, Symbol, SyntaxRulesObj};
use crate::error::SchemeError;
use crate::gensym::hygienic_rename;

#[derive(Debug, Clone)]
pub struct Rule {
    pub pattern: Datum,
    pub template: Datum,
}

/// A pattern variable's capture: either a single matched datum, or (under an
/// ellipsis) the sequence of captures from each repetition.
#[derive(Debug, Clone)]
enum Binding {
    One(Datum),
    Many(Vec<Binding>),
}

type Bindings = HashMap<Symbol, Binding>;

/// Forms whose first subform-list is a set of `(name init)` bindings that a
/// template may introduce fresh names inside of. Grounded in the original's
/// gensym-based (not full sets-of-scope) approach to macro hygiene: only
/// identifiers actually bound by the template are renamed, not every free
/// identifier it mentions.
const BINDING_FORMS: &[&str] = &["let", "let*", "letrec"];

pub fn expand(sr: &SyntaxRulesObj, call_form: &Datum) -> Result<Datum, SchemeError> {
    for rule in &sr.rules {
        if let Some(bindings) = match_top(&rule.pattern, call_form, &sr.literals, &sr.ellipsis) {
            let mut renames = HashMap::new();
            collect_introduced_bindings(&rule.template, &bindings, &sr.ellipsis, &mut renames);
            return substitute(&rule.template, &bindings, &renames, &sr.ellipsis);
        }
    }
    Err(SchemeError::Macro(format!(
        "no syntax-rules pattern matched for {}",
        sr.label.as_deref().unwrap_or("macro use")
    )))
}

fn match_top(pattern: &Datum, form: &Datum, literals: &[Symbol], ellipsis: &Symbol) -> Option<Bindings> {
    let (pat_items, pat_tail) = list_to_vec_dotted(pattern);
    let (form_items, form_tail) = list_to_vec_dotted(form);
    if pat_items.is_empty() {
        return None;
    }
    let mut bindings = Bindings::new();
    if !match_sequence(&pat_items[1..], &form_items[1..], literals, ellipsis, &mut bindings) {
        return None;
    }
    if !match_one(&pat_tail, &form_tail, literals, ellipsis, &mut bindings) {
        return None;
    }
    Some(bindings)
}

fn match_sequence(pats: &[Datum], forms: &[Datum], literals: &[Symbol], ellipsis: &Symbol, out: &mut Bindings) -> bool {
    let mut pi = 0;
    let mut fi = 0;
    while pi < pats.len() {
        let has_ellipsis_next = pi + 1 < pats.len() && is_ellipsis(&pats[pi + 1], ellipsis);
        if has_ellipsis_next {
            let remaining_fixed = pats.len() - pi - 2;
            let available = forms.len().saturating_sub(fi);
            if available < remaining_fixed {
                return false;
            }
            let repeat_count = available - remaining_fixed;
            let vars = pattern_vars(&pats[pi], literals, ellipsis);
            let mut per_var: HashMap<Symbol, Vec<Binding>> = vars.iter().cloned().map(|v| (v, Vec::new())).collect();
            for _ in 0..repeat_count {
                let mut sub = Bindings::new();
                if !match_one(&pats[pi], &forms[fi], literals, ellipsis, &mut sub) {
                    return false;
                }
                for v in &vars {
                    if let Some(b) = sub.remove(v) {
                        per_var.get_mut(v).unwrap().push(b);
                    }
                }
                fi += 1;
            }
            for (v, seq) in per_var {
                out.insert(v, Binding::Many(seq));
            }
            pi += 2;
        } else {
            if fi >= forms.len() {
                return false;
            }
            if !match_one(&pats[pi], &forms[fi], literals, ellipsis, out) {
                return false;
            }
            pi += 1;
            fi += 1;
        }
    }
    fi == forms.len()
}

fn match_one(pat: &Datum, form: &Datum, literals: &[Symbol], ellipsis: &Symbol, out: &mut Bindings) -> bool {
    match pat {
        Datum::Symbol(s) if &**s == "_" => true,
        Datum::Symbol(s) if literals.contains(s) => matches!(form, Datum::Symbol(f) if f == s),
        Datum::Symbol(s) => {
            out.insert(s.clone(), Binding::One(form.clone()));
            true
        }
        Datum::Pair(_) | Datum::EmptyList => {
            let (pat_items, pat_tail) = list_to_vec_dotted(pat);
            let (form_items, form_tail) = list_to_vec_dotted(form);
            match_sequence(&pat_items, &form_items, literals, ellipsis, out) && match_one(&pat_tail, &form_tail, literals, ellipsis, out)
        }
        Datum::Vector(pv) => match form {
            Datum::Vector(fv) => {
                let pitems = pv.borrow().clone();
                let fitems = fv.borrow().clone();
                match_sequence(&pitems, &fitems, literals, ellipsis, out)
            }
            _ => false,
        },
        Datum::Number(pn) => matches!(form, Datum::Number(fn_) if pn.numerically_equal(fn_)),
        Datum::Boolean(pb) => matches!(form, Datum::Boolean(fb) if pb == fb),
        Datum::Str(ps) => matches!(form, Datum::Str(fs) if *ps.borrow() == *fs.borrow()),
        Datum::Character(pc) => matches!(form, Datum::Character(fc) if pc == fc),
        _ => false,
    }
}

fn is_ellipsis(d: &Datum, ellipsis: &Symbol) -> bool {
    matches!(d, Datum::Symbol(s) if s == ellipsis)
}

fn pattern_vars(pat: &Datum, literals: &[Symbol], ellipsis: &Symbol) -> Vec<Symbol> {
    let mut out = Vec::new();
    collect_pattern_vars(pat, literals, ellipsis, &mut out);
    out
}

fn collect_pattern_vars(pat: &Datum, literals: &[Symbol], ellipsis: &Symbol, out: &mut Vec<Symbol>) {
    match pat {
        Datum::Symbol(s) if &**s == "_" || s == ellipsis || literals.contains(s) => {}
        Datum::Symbol(s) => out.push(s.clone()),
        Datum::Pair(p) => {
            collect_pattern_vars(&p.car.borrow(), literals, ellipsis, out);
            collect_pattern_vars(&p.cdr.borrow(), literals, ellipsis, out);
        }
        Datum::Vector(v) => {
            for item in v.borrow().iter() {
                collect_pattern_vars(item, literals, ellipsis, out);
            }
        }
        _ => {}
    }
}

fn collect_introduced_bindings(template: &Datum, bindings: &Bindings, ellipsis: &Symbol, renames: &mut HashMap<Symbol, Symbol>) {
    if let Datum::Pair(p) = template {
        let car = p.car.borrow().clone();
        if let Datum::Symbol(head) = &car {
            if BINDING_FORMS.contains(&head.as_ref()) {
                let (items, _) = list_to_vec_dotted(template);
                if let Some(binding_list) = items.get(1) {
                    let (bind_pairs, _) = list_to_vec_dotted(binding_list);
                    for bp in &bind_pairs {
                        let (parts, _) = list_to_vec_dotted(bp);
                        if let Some(Datum::Symbol(name)) = parts.first() {
                            if !bindings.contains_key(name) && !renames.contains_key(name) {
                                renames.insert(name.clone(), hygienic_rename(name));
                            }
                        }
                    }
                }
            } else if &**head == "lambda" {
                let (items, _) = list_to_vec_dotted(template);
                if let Some(params) = items.get(1) {
                    let (fixed, tail) = list_to_vec_dotted(params);
                    for p in fixed.iter().chain(std::iter::once(&tail)) {
                        if let Datum::Symbol(name) = p {
                            if !bindings.contains_key(name) && !renames.contains_key(name) {
                                renames.insert(name.clone(), hygienic_rename(name));
                            }
                        }
                    }
                }
            }
        }
        collect_introduced_bindings(&p.car.borrow(), bindings, ellipsis, renames);
        collect_introduced_bindings(&p.cdr.borrow(), bindings, ellipsis, renames);
    }
}

fn substitute(template: &Datum, bindings: &Bindings, renames: &HashMap<Symbol, Symbol>, ellipsis: &Symbol) -> Result<Datum, SchemeError> {
    match template {
        Datum::Symbol(s) => {
            if let Some(b) = bindings.get(s) {
                match b {
                    Binding::One(d) => Ok(d.clone()),
                    Binding::Many(_) => Err(SchemeError::Macro(format!("pattern variable {s} used without ellipsis"))),
                }
            } else if let Some(renamed) = renames.get(s) {
                Ok(Datum::Symbol(renamed.clone()))
            } else {
                Ok(Datum::Symbol(s.clone()))
            }
        }
        Datum::Pair(_) | Datum::EmptyList => {
            let (items, tail) = list_to_vec_dotted(template);
            let mut out = Vec::new();
            let mut i = 0;
            while i < items.len() {
                let followed_by_ellipsis = i + 1 < items.len() && is_ellipsis(&items[i + 1], ellipsis);
                if followed_by_ellipsis {
                    let vars = template_ellipsis_vars(&items[i], bindings);
                    let count = vars
                        .iter()
                        .filter_map(|v| bindings.get(v))
                        .find_map(|b| match b {
                            Binding::Many(seq) => Some(seq.len()),
                            _ => None,
                        })
                        .unwrap_or(0);
                    for idx in 0..count {
                        let mut sub_bindings = bindings.clone();
                        for v in &vars {
                            if let Some(Binding::Many(seq)) = bindings.get(v) {
                                if let Some(item) = seq.get(idx) {
                                    sub_bindings.insert(v.clone(), item.clone());
                                }
                            }
                        }
                        out.push(substitute(&items[i], &sub_bindings, renames, ellipsis)?);
                    }
                    i += 2;
                } else {
                    out.push(substitute(&items[i], bindings, renames, ellipsis)?);
                    i += 1;
                }
            }
            let sub_tail = substitute(&tail, bindings, renames, ellipsis)?;
            Ok(vec_to_improper_list(out, sub_tail))
        }
        Datum::Vector(v) => {
            let items = v.borrow().clone();
            let mut out = Vec::new();
            let mut i = 0;
            while i < items.len() {
                let followed_by_ellipsis = i + 1 < items.len() && is_ellipsis(&items[i + 1], ellipsis);
                if followed_by_ellipsis {
                    let vars = template_ellipsis_vars(&items[i], bindings);
                    let count = vars
                        .iter()
                        .filter_map(|v| bindings.get(v))
                        .find_map(|b| match b {
                            Binding::Many(seq) => Some(seq.len()),
                            _ => None,
                        })
                        .unwrap_or(0);
                    for idx in 0..count {
                        let mut sub_bindings = bindings.clone();
                        for v in &vars {
                            if let Some(Binding::Many(seq)) = bindings.get(v) {
                                if let Some(item) = seq.get(idx) {
                                    sub_bindings.insert(v.clone(), item.clone());
                                }
                            }
                        }
                        out.push(substitute(&items[i], &sub_bindings, renames, ellipsis)?);
                    }
                    i += 2;
                } else {
                    out.push(substitute(&items[i], bindings, renames, ellipsis)?);
                    i += 1;
                }
            }
            Ok(Datum::vector(out))
        }
        other => Ok(other.clone()),
    }
}

fn template_ellipsis_vars(sub: &Datum, bindings: &Bindings) -> Vec<Symbol> {
    let mut out = Vec::new();
    collect_template_symbols(sub, &mut out);
    out.into_iter().filter(|s| bindings.contains_key(s)).collect()
}

fn collect_template_symbols(d: &Datum, out: &mut Vec<Symbol>) {
    match d {
        Datum::Symbol(s) => out.push(s.clone()),
        Datum::Pair(p) => {
            collect_template_symbols(&p.car.borrow(), out);
            collect_template_symbols(&p.cdr.borrow(), out);
        }
        Datum::Vector(v) => {
            for item in v.borrow().iter() {
                collect_template_symbols(item, out);
            }
        }
        _ => {}
    }
}

/// Validate a `(syntax-rules (lit ...) (pattern template) ...)` form and
/// build the runtime transformer object.
pub fn build_syntax_rules(form_items: &[Datum], label: Option<Symbol>) -> Result<Rc<SyntaxRulesObj>, SchemeError> {
    let mut idx = 1;
    let ellipsis = if let Some(Datum::Symbol(s)) = form_items.get(idx) {
        if form_items.get(idx + 1).map(is_literal_list_ish).unwrap_or(false) {
            idx += 1;
            s.clone()
        } else {
            intern("...")
        }
    } else {
        intern("...")
    };
    let literals_form = form_items
        .get(idx)
        .ok_or_else(|| SchemeError::Macro("syntax-rules missing literal list".to_string()))?;
    idx += 1;
    let (lit_items, _) = list_to_vec_dotted(literals_form);
    let mut literals = Vec::new();
    for l in lit_items {
        if let Datum::Symbol(s) = l {
            literals.push(s);
        } else {
            return Err(SchemeError::Macro("syntax-rules literal list must contain symbols".to_string()));
        }
    }

    let mut rules = Vec::new();
    for rule_form in &form_items[idx..] {
        let (parts, _) = list_to_vec_dotted(rule_form);
        if parts.len() != 2 {
            return Err(SchemeError::Macro("each syntax-rules rule must be (pattern template)".to_string()));
        }
        rules.push(Rule {
            pattern: parts[0].clone(),
            template: parts[1].clone(),
        });
    }
    if rules.is_empty() {
        return Err(SchemeError::Macro("syntax-rules requires at least one rule".to_string()));
    }

    Ok(Rc::new(SyntaxRulesObj { label, ellipsis, literals, rules }))
}

fn is_literal_list_ish(d: &Datum) -> bool {
    matches!(d, Datum::Pair(_) | Datum::EmptyList)
}

pub fn quote_wrap(d: Datum) -> Datum {
    cons(Datum::Symbol(intern("quote")), cons(d, Datum::EmptyList))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::parse_one;

    fn build(src: &str) -> Rc<SyntaxRulesObj> {
        let form = parse_one(src).unwrap();
        let (items, _) = list_to_vec_dotted(&form);
        build_syntax_rules(&items, Some(intern("test-macro"))).unwrap()
    }

    #[test]
    fn expands_simple_template() {
        let sr = build("(syntax-rules () ((_ a b) (+ a b)))");
        let call = parse_one("(m 1 2)").unwrap();
        let expanded = expand(&sr, &call).unwrap();
        let items = crate::datum::list_to_vec(&expanded).unwrap();
        assert_eq!(items.len(), 3);
    }

    #[test]
    fn expands_ellipsis_body() {
        let sr = build("(syntax-rules () ((_ a ...) (list a ...)))");
        let call = parse_one("(m 1 2 3)").unwrap();
        let expanded = expand(&sr, &call).unwrap();
        let items = crate::datum::list_to_vec(&expanded).unwrap();
        assert_eq!(items.len(), 4);
    }

    #[test]
    fn hygienically_renames_introduced_let_binding() {
        let sr = build("(syntax-rules () ((_ a b) (let ((tmp a)) (set! a b) (set! b tmp))))");
        let call = parse_one("(swap! x y)").unwrap();
        let expanded = expand(&sr, &call).unwrap();
        let rendered = format!("{expanded}");
        assert!(!rendered.contains("(tmp "));
    }
}
