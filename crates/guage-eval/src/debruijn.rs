//! Conversion from named variables to De Bruijn indices.
//!
//! After conversion, a bare number denotes a variable reference: index 0 is
//! the innermost parameter, and each enclosing parameter list adds its
//! count to the depth. Source-level number literals are wrapped as
//! `(quote n)` so the two readings never collide.
//!
//! A converted lambda is marked `(:λ-converted (params…) body′)`; the
//! evaluator builds a closure from the marker directly, and the converter
//! leaves marked forms alone so a second pass cannot convert twice.
//!
//! Parameter lists may contain, besides plain names: the generic-parameter
//! marker `⊳` followed by a name and an optional `:Capitalized` constraint
//! symbol, and `name : type` annotations. Markers, constraints, and
//! annotations are binding-invisible; only names consume an index.

use guage_atom::Atom;
use guage_util::intern::{sym, Symbol};

/// The generic-parameter marker in parameter lists.
const GENERIC_PARAM: &str = "⊳";

/// One scope's parameter names, chained towards the root.
pub struct NameContext<'a> {
    names: Vec<&'static str>,
    parent: Option<&'a NameContext<'a>>,
}

impl<'a> NameContext<'a> {
    /// The empty root scope.
    pub fn root() -> NameContext<'static> {
        NameContext {
            names: Vec::new(),
            parent: None,
        }
    }

    /// A scope extending `parent` with `names`.
    pub fn nested(names: Vec<&'static str>, parent: &'a NameContext<'a>) -> Self {
        Self {
            names,
            parent: Some(parent),
        }
    }

    /// Cumulative De Bruijn index of `name`, inner scopes first.
    pub fn lookup(&self, name: &str) -> Option<usize> {
        let mut depth = 0;
        let mut current = Some(self);
        while let Some(ctx) = current {
            if let Some(i) = ctx.names.iter().position(|&n| n == name) {
                return Some(depth + i);
            }
            depth += ctx.names.len();
            current = ctx.parent;
        }
        None
    }
}

/// Extract the binding names from a parameter list, skipping markers,
/// constraints, and type annotations.
pub fn param_names(params: &Atom) -> Vec<&'static str> {
    fn split(list: &Atom) -> Option<(Atom, Atom)> {
        list.pair().map(|(h, t)| (h.clone(), t.clone()))
    }

    let mut names = Vec::new();
    let mut cur = params.clone();
    while let Some((item, mut rest)) = split(&cur) {
        if let Some(item_sym) = item.as_symbol() {
            if item_sym.as_str() == GENERIC_PARAM {
                // ⊳ name [:Constraint]
                if let Some((name, after)) = split(&rest) {
                    if let Some(name_sym) = name.as_symbol() {
                        names.push(name_sym.as_str());
                    }
                    rest = after;
                    if let Some((maybe, after)) = split(&rest) {
                        if is_constraint(&maybe) {
                            rest = after;
                        }
                    }
                }
                cur = rest;
                continue;
            }
            names.push(item_sym.as_str());
            // name : type
            if let Some((maybe, after)) = split(&rest) {
                if maybe.as_symbol().map(|s| s.as_str()) == Some(":") {
                    rest = after;
                    if let Some((_ty, after)) = split(&rest) {
                        rest = after;
                    }
                }
            }
        }
        cur = rest;
    }
    names
}

/// `:Capitalized` constraint symbols.
fn is_constraint(atom: &Atom) -> bool {
    atom.as_symbol()
        .map(|s| {
            let mut chars = s.as_str().chars();
            chars.next() == Some(':') && chars.next().is_some_and(|c| c.is_ascii_uppercase())
        })
        .unwrap_or(false)
}

fn is_lambda_head(sym: Symbol) -> bool {
    sym.id() == sym::LAMBDA || sym.as_str() == "lambda"
}

/// Convert `expr` under `ctx`.
pub fn convert(expr: &Atom, ctx: &NameContext<'_>) -> Atom {
    // Bound symbols become indices; free symbols (primitives, globals)
    // stay symbols and resolve at evaluation time.
    if let Some(s) = expr.as_symbol() {
        return match ctx.lookup(s.as_str()) {
            Some(index) => Atom::number_at(index as f64, expr.span()),
            None => expr.clone(),
        };
    }

    // A source-level number literal: wrap so it stays distinguishable from
    // an index.
    if expr.is_number() {
        let quote = Atom::symbol_at(Symbol::intern("quote"), expr.span());
        return Atom::cons_at(quote, Atom::cons(expr.clone(), Atom::nil()), expr.span());
    }

    // Other self-evaluating atoms pass through.
    if expr.is_bool() || expr.is_nil() || expr.is_string() || expr.is_integer() {
        return expr.clone();
    }

    if let Some((head, rest)) = expr.pair() {
        if let Some(head_sym) = head.as_symbol() {
            // Already-converted lambdas are left alone.
            if head_sym.id() == sym::LAMBDA_CONV {
                return expr.clone();
            }
            if is_lambda_head(head_sym) {
                return convert_lambda(expr, rest, ctx);
            }
        }
        // Application or special form: element-wise.
        let converted_head = convert(head, ctx);
        let converted_rest = convert_list(rest, ctx);
        return Atom::cons_at(converted_head, converted_rest, expr.span());
    }

    log::warn!("unknown expression shape in conversion: {}", expr);
    expr.clone()
}

fn convert_list(list: &Atom, ctx: &NameContext<'_>) -> Atom {
    if list.is_nil() {
        return Atom::nil();
    }
    match list.pair() {
        Some((head, tail)) => Atom::cons_at(convert(head, ctx), convert_list(tail, ctx), list.span()),
        None => convert(list, ctx),
    }
}

/// `(λ (params…) body)` becomes `(:λ-converted (params…) body′)`.
fn convert_lambda(expr: &Atom, rest: &Atom, ctx: &NameContext<'_>) -> Atom {
    let Some((params, after)) = rest.pair() else {
        return expr.clone();
    };
    let Some(body) = after.car() else {
        return expr.clone();
    };

    let names = param_names(params);
    let nested = NameContext::nested(names, ctx);
    let converted_body = convert(&body, &nested);

    let marker = Atom::symbol_at(
        Symbol::intern(guage_util::intern::RESERVED_FORMS[sym::LAMBDA_CONV as usize]),
        expr.span(),
    );
    Atom::cons_at(
        marker,
        Atom::cons(params.clone(), Atom::cons(converted_body, Atom::nil())),
        expr.span(),
    )
}
