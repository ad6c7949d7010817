//! The tree-walking evaluator.
//!
//! Dispatch is by interned id: a pair whose head is a reserved symbol goes
//! straight to the special-form table (a single `match` over the 16-bit
//! id), everything else is a call. Variables in converted code are bare
//! numbers resolved by indexed fetch into the environment vector; free
//! symbols resolve through the global binding map and the primitive table.
//!
//! Errors are first-class atoms. Any step that receives one short-circuits
//! and propagates it, appending the current span to the error's circular
//! return trace.
//!
//! Every lambda application records heat for the body expression; once the
//! tier has native code for it and the call shape is all-doubles, the
//! native entry runs instead of the walker. A deopt falls back to the
//! walker transparently.

use guage_atom::{Atom, Env};
use guage_jit::{Jit, NativeOutcome};
use guage_util::intern::{sym, Symbol, RESERVED_COUNT, RESERVED_FORMS};
use guage_util::span::Span;
use rustc_hash::FxHashMap;

use crate::debruijn::{convert, param_names, NameContext};

/// Names resolvable without a global binding.
pub const PRIMITIVE_NAMES: &[&str] = &[
    "⊕", "+", "⊖", "-", "⊗", "*", "⊘", "/", "%", "<", "≤", "<=", ">", "≥", ">=", "≡", "equal?",
    "car", "cdr", "cons", "list", "null?", "pair?", "number?", "integer?", "symbol?", "string?",
    "procedure?", "not", "display", "newline", "error",
];

fn is_primitive(name: &str) -> bool {
    PRIMITIVE_NAMES.contains(&name)
}

/// Evaluation result with the recur signal threaded through tail
/// positions.
enum Flow {
    Value(Atom),
    /// `(∇ args…)`: re-enter the current lambda with fresh arguments.
    Recur(Vec<Atom>),
}

/// One interpreter instance: globals, the tiered compiler, and the cached
/// ids of the ASCII aliases.
pub struct Interp {
    globals: FxHashMap<u16, Atom>,
    jit: Jit,
    quote_id: u16,
    lambda_alt_id: u16,
}

impl Interp {
    pub fn new() -> Self {
        Self::with_jit(Jit::new())
    }

    /// Use a preconfigured tier (tests lower the hot threshold).
    pub fn with_jit(jit: Jit) -> Self {
        Self {
            globals: FxHashMap::default(),
            jit,
            quote_id: Symbol::intern("quote").id(),
            lambda_alt_id: Symbol::intern("lambda").id(),
        }
    }

    pub fn jit(&self) -> &Jit {
        &self.jit
    }

    pub fn jit_mut(&mut self) -> &mut Jit {
        &mut self.jit
    }

    /// Bind `name` globally.
    pub fn define(&mut self, name: &str, value: Atom) {
        self.globals.insert(Symbol::intern(name).id(), value);
    }

    pub fn global(&self, name: &str) -> Option<Atom> {
        self.globals.get(&Symbol::intern(name).id()).cloned()
    }

    /// Evaluate `expr` under `env`.
    pub fn eval(&mut self, env: &Env, expr: &Atom) -> Atom {
        self.eval_value(env, expr)
    }

    /// Evaluate a top-level form under the empty environment.
    pub fn eval_toplevel(&mut self, expr: &Atom) -> Atom {
        self.eval_value(&Env::empty(), expr)
    }

    fn eval_value(&mut self, env: &Env, expr: &Atom) -> Atom {
        match self.eval_flow(env, expr) {
            Flow::Value(v) => v,
            Flow::Recur(_) => Atom::error("∇ outside a lambda tail position", expr.span()),
        }
    }

    fn eval_flow(&mut self, env: &Env, expr: &Atom) -> Flow {
        if expr.is_error() {
            expr.push_trace(expr.span().lo());
            return Flow::Value(expr.clone());
        }

        // Bare number after conversion: indexed environment fetch. An
        // index outside the frame is an unconverted literal and stands for
        // itself.
        if let Some(n) = expr.as_number() {
            if n >= 0.0 && n.fract() == 0.0 {
                if let Some(slot) = env.get(n as usize) {
                    return Flow::Value(slot.clone());
                }
            }
            return Flow::Value(expr.clone());
        }

        if expr.is_integer()
            || expr.is_bool()
            || expr.is_nil()
            || expr.is_string()
            || expr.is_vector()
            || expr.is_lambda()
        {
            return Flow::Value(expr.clone());
        }

        if let Some(s) = expr.as_symbol() {
            return Flow::Value(self.resolve_symbol(s, expr));
        }

        let Some((head_ref, rest_ref)) = expr.pair() else {
            return Flow::Value(expr.clone());
        };
        let head = head_ref.clone();
        let rest = rest_ref.clone();

        if let Some(head_sym) = head.as_symbol() {
            if let Some(id) = self.form_id(head_sym) {
                return self.eval_special(env, id, expr, &rest);
            }
        }

        // Application: head to a callable, arguments in textual order.
        let callee = self.eval_value(env, &head);
        if callee.is_error() {
            callee.push_trace(expr.span().lo());
            return Flow::Value(callee);
        }
        let mut args = Vec::new();
        for arg_expr in rest.iter() {
            let value = self.eval_value(env, arg_expr);
            if value.is_error() {
                value.push_trace(expr.span().lo());
                return Flow::Value(value);
            }
            args.push(value);
        }
        Flow::Value(self.apply(&callee, args, expr.span()))
    }

    /// Reserved-form id for a head symbol, folding the ASCII aliases onto
    /// their glyph forms.
    fn form_id(&self, head: Symbol) -> Option<u16> {
        let id = head.id();
        if id < RESERVED_COUNT {
            return Some(id);
        }
        if id == self.quote_id {
            return Some(sym::QUOTE);
        }
        if id == self.lambda_alt_id {
            return Some(sym::LAMBDA);
        }
        None
    }

    fn eval_special(&mut self, env: &Env, id: u16, expr: &Atom, rest: &Atom) -> Flow {
        match id {
            sym::QUOTE => Flow::Value(rest.car().unwrap_or_else(Atom::nil)),

            sym::QUASIQUOTE | sym::QUASIQUOTE_ALT => {
                let template = rest.car().unwrap_or_else(Atom::nil);
                Flow::Value(self.eval_quasiquote(env, &template))
            }

            sym::UNQUOTE | sym::UNQUOTE_ALT => Flow::Value(Atom::error(
                "unquote outside quasiquote",
                expr.span(),
            )),

            sym::DEFINE => {
                let Some(name) = rest.car().and_then(|n| n.as_symbol()) else {
                    return Flow::Value(Atom::error("≔ expects a symbol name", expr.span()));
                };
                let value_expr = rest
                    .cdr()
                    .and_then(|r| r.car())
                    .unwrap_or_else(Atom::nil);
                let value = self.eval_value(env, &value_expr);
                if value.is_error() {
                    value.push_trace(expr.span().lo());
                    return Flow::Value(value);
                }
                self.globals.insert(name.id(), value);
                Flow::Value(Atom::nil())
            }

            sym::LAMBDA => {
                // Convert on first evaluation; the marker form below takes
                // over afterwards. A malformed lambda converts to itself,
                // which must not loop.
                let converted = convert(expr, &NameContext::root());
                let is_marker = converted
                    .car()
                    .and_then(|h| h.as_symbol())
                    .map(|s| s.id() == sym::LAMBDA_CONV)
                    .unwrap_or(false);
                if !is_marker {
                    return Flow::Value(Atom::error(
                        "malformed lambda: expected (λ (params…) body)",
                        expr.span(),
                    ));
                }
                self.eval_flow(env, &converted)
            }

            sym::LAMBDA_CONV => {
                let Some(params) = rest.car() else {
                    return Flow::Value(Atom::error("malformed lambda", expr.span()));
                };
                let Some(body) = rest.cdr().and_then(|r| r.car()) else {
                    return Flow::Value(Atom::error("lambda without a body", expr.span()));
                };
                Flow::Value(Atom::lambda(params, body, env.clone(), expr.span()))
            }

            sym::IF => {
                let Some(cond_expr) = rest.car() else {
                    return Flow::Value(Atom::error("? expects a condition", expr.span()));
                };
                let cond = self.eval_value(env, &cond_expr);
                if cond.is_error() {
                    cond.push_trace(expr.span().lo());
                    return Flow::Value(cond);
                }
                let branches = rest.cdr().unwrap_or_else(Atom::nil);
                let branch = if cond.is_truthy() {
                    branches.car()
                } else {
                    branches.cdr().and_then(|r| r.car())
                };
                match branch {
                    Some(b) => self.eval_flow(env, &b),
                    None => Flow::Value(Atom::nil()),
                }
            }

            sym::SEQUENCE => {
                let mut last_pair: Option<(Atom, Atom)> = None;
                let mut cur = rest.clone();
                loop {
                    let Some((head, tail)) = cur.pair().map(|(h, t)| (h.clone(), t.clone()))
                    else {
                        break;
                    };
                    if tail.is_nil() {
                        last_pair = Some((head, tail));
                        break;
                    }
                    let value = self.eval_value(env, &head);
                    if value.is_error() {
                        value.push_trace(expr.span().lo());
                        return Flow::Value(value);
                    }
                    cur = tail;
                }
                match last_pair {
                    // The final form is a tail position.
                    Some((last, _)) => self.eval_flow(env, &last),
                    None => Flow::Value(Atom::nil()),
                }
            }

            sym::RECUR => {
                let mut args = Vec::new();
                for arg_expr in rest.iter() {
                    let value = self.eval_value(env, arg_expr);
                    if value.is_error() {
                        value.push_trace(expr.span().lo());
                        return Flow::Value(value);
                    }
                    args.push(value);
                }
                Flow::Recur(args)
            }

            sym::AND => {
                let mut cur = rest.clone();
                if cur.is_nil() {
                    return Flow::Value(Atom::bool(true));
                }
                loop {
                    let Some((head, tail)) = cur.pair().map(|(h, t)| (h.clone(), t.clone()))
                    else {
                        return Flow::Value(Atom::bool(true));
                    };
                    if tail.is_nil() {
                        return self.eval_flow(env, &head);
                    }
                    let value = self.eval_value(env, &head);
                    if value.is_error() || !value.is_truthy() {
                        return Flow::Value(value);
                    }
                    cur = tail;
                }
            }

            sym::OR => {
                let mut cur = rest.clone();
                if cur.is_nil() {
                    return Flow::Value(Atom::bool(false));
                }
                loop {
                    let Some((head, tail)) = cur.pair().map(|(h, t)| (h.clone(), t.clone()))
                    else {
                        return Flow::Value(Atom::bool(false));
                    };
                    if tail.is_nil() {
                        return self.eval_flow(env, &head);
                    }
                    let value = self.eval_value(env, &head);
                    if value.is_error() || value.is_truthy() {
                        return Flow::Value(value);
                    }
                    cur = tail;
                }
            }

            sym::PIPE => {
                // (⊸ x f g …): thread the value left to right.
                let Some(seed) = rest.car() else {
                    return Flow::Value(Atom::error("⊸ expects a value", expr.span()));
                };
                let mut value = self.eval_value(env, &seed);
                if value.is_error() {
                    value.push_trace(expr.span().lo());
                    return Flow::Value(value);
                }
                let mut cur = rest.cdr().unwrap_or_else(Atom::nil);
                while let Some((f_expr, tail)) = cur.pair().map(|(h, t)| (h.clone(), t.clone()))
                {
                    let callee = self.eval_value(env, &f_expr);
                    if callee.is_error() {
                        callee.push_trace(expr.span().lo());
                        return Flow::Value(callee);
                    }
                    value = self.apply(&callee, vec![value], expr.span());
                    if value.is_error() {
                        value.push_trace(expr.span().lo());
                        return Flow::Value(value);
                    }
                    cur = tail;
                }
                Flow::Value(value)
            }

            sym::TRY_PROPAGATE => {
                // (⚡? e): catch an error as data instead of propagating.
                let Some(inner) = rest.car() else {
                    return Flow::Value(Atom::error("⚡? expects an expression", expr.span()));
                };
                let value = self.eval_value(env, &inner);
                if let Some(err) = value.as_error() {
                    let message = err.message.clone();
                    return Flow::Value(Atom::cons(Atom::bool(false), Atom::string(message)));
                }
                Flow::Value(value)
            }

            // Macro, type, and effect machinery is reserved in the id
            // space but not part of this runtime.
            other => Flow::Value(Atom::error(
                format!(
                    "special form `{}` is not supported by this runtime",
                    RESERVED_FORMS
                        .get(other as usize)
                        .copied()
                        .unwrap_or("<unknown>")
                ),
                expr.span(),
            )),
        }
    }

    fn eval_quasiquote(&mut self, env: &Env, template: &Atom) -> Atom {
        if let Some((head, tail)) = template.pair() {
            if let Some(head_sym) = head.as_symbol() {
                if head_sym.id() == sym::UNQUOTE || head_sym.id() == sym::UNQUOTE_ALT {
                    let inner = tail.car().unwrap_or_else(Atom::nil);
                    return self.eval_value(env, &inner);
                }
            }
            let head = head.clone();
            let tail = tail.clone();
            return Atom::cons_at(
                self.eval_quasiquote(env, &head),
                self.eval_quasiquote(env, &tail),
                template.span(),
            );
        }
        template.clone()
    }

    fn resolve_symbol(&mut self, s: Symbol, expr: &Atom) -> Atom {
        if let Some(value) = self.globals.get(&s.id()) {
            return value.clone();
        }
        // Primitives are values: they flow through ⊸ and higher-order
        // calls and apply by name.
        if is_primitive(s.as_str()) {
            return expr.clone();
        }
        self.undefined_variable(s, expr.span())
    }

    fn undefined_variable(&self, s: Symbol, span: Span) -> Atom {
        let name = s.as_str();
        let globals = &self.globals;
        let candidates = globals
            .keys()
            .filter_map(|&id| guage_util::intern::INTERN.lookup_id(id))
            .map(|sym| sym.as_str())
            .chain(PRIMITIVE_NAMES.iter().copied());
        let suggestion = guage_util::diagnostic::suggest_name(
            name,
            candidates,
            guage_util::diagnostic::DEFAULT_SUGGEST_BUDGET,
        );
        Atom::error_with(
            format!("undefined variable `{}`", name),
            suggestion.map(Atom::string),
            None,
            span,
        )
    }

    fn apply(&mut self, callee: &Atom, args: Vec<Atom>, span: Span) -> Atom {
        if callee.is_error() {
            callee.push_trace(span.lo());
            return callee.clone();
        }

        if let Some(lam) = callee.as_lambda() {
            let names = param_names(&lam.params);
            if names.len() != args.len() {
                return Atom::error(
                    format!(
                        "arity error: expected {} argument{}, got {}",
                        names.len(),
                        if names.len() == 1 { "" } else { "s" },
                        args.len()
                    ),
                    span,
                );
            }
            let argc = names.len();
            let body = lam.body.clone();
            let captured = lam.env.clone();

            self.jit.record_call(&body);

            let mut env = Env::extend(args, &captured);
            loop {
                // Native entry only for the all-doubles call shape; the
                // helpers deopt on anything else anyway, this just skips
                // the round trip.
                if env.slots()[..argc].iter().all(Atom::is_number) {
                    match self.jit.try_execute(&body, &env) {
                        NativeOutcome::Value(v) => return v,
                        NativeOutcome::Deopted | NativeOutcome::NoTrace => {}
                    }
                }
                match self.eval_flow(&env, &body) {
                    Flow::Value(v) => return v,
                    Flow::Recur(new_args) => {
                        if new_args.len() != argc {
                            return Atom::error(
                                format!(
                                    "arity error: ∇ expected {} argument{}, got {}",
                                    argc,
                                    if argc == 1 { "" } else { "s" },
                                    new_args.len()
                                ),
                                span,
                            );
                        }
                        env = Env::extend(new_args, &captured);
                    }
                }
            }
        }

        if let Some(s) = callee.as_symbol() {
            if is_primitive(s.as_str()) {
                return self.apply_primitive(s, args, span);
            }
        }

        Atom::error(format!("not callable: {}", callee), span)
    }

    fn apply_primitive(&mut self, s: Symbol, args: Vec<Atom>, span: Span) -> Atom {
        let name = s.as_str();
        match name {
            "⊕" | "+" => fold_arith(name, &args, span, |a, b| a + b, i64::checked_add),
            "⊖" | "-" => fold_arith(name, &args, span, |a, b| a - b, i64::checked_sub),
            "⊗" | "*" => fold_arith(name, &args, span, |a, b| a * b, i64::checked_mul),
            "⊘" | "/" => {
                // Division always works in doubles; IEEE handles zero.
                let mut acc = match number_operand(name, args.first(), span) {
                    Ok(n) => n,
                    Err(e) => return e,
                };
                if args.len() < 2 {
                    return arity_at_least(name, 2, args.len(), span);
                }
                for arg in &args[1..] {
                    match number_operand(name, Some(arg), span) {
                        Ok(n) => acc /= n,
                        Err(e) => return e,
                    }
                }
                Atom::number(acc)
            }
            "%" => {
                if args.len() != 2 {
                    return arity_exact(name, 2, args.len(), span);
                }
                match (args[0].as_integer(), args[1].as_integer()) {
                    (Some(a), Some(b)) => {
                        if b == 0 {
                            Atom::error("division by zero", span)
                        } else {
                            Atom::integer(a % b)
                        }
                    }
                    _ => {
                        let a = match number_operand(name, args.first(), span) {
                            Ok(n) => n,
                            Err(e) => return e,
                        };
                        let b = match number_operand(name, args.get(1), span) {
                            Ok(n) => n,
                            Err(e) => return e,
                        };
                        Atom::number(a % b)
                    }
                }
            }

            "<" | "≤" | "<=" | ">" | "≥" | ">=" => {
                if args.len() != 2 {
                    return arity_exact(name, 2, args.len(), span);
                }
                let a = match number_operand(name, args.first(), span) {
                    Ok(n) => n,
                    Err(e) => return e,
                };
                let b = match number_operand(name, args.get(1), span) {
                    Ok(n) => n,
                    Err(e) => return e,
                };
                let result = match name {
                    "<" => a < b,
                    "≤" | "<=" => a <= b,
                    ">" => a > b,
                    _ => a >= b,
                };
                Atom::bool(result)
            }

            "≡" | "equal?" => {
                if args.len() != 2 {
                    return arity_exact(name, 2, args.len(), span);
                }
                Atom::bool(args[0].structural_eq(&args[1]))
            }

            "car" | "cdr" => {
                if args.len() != 1 {
                    return arity_exact(name, 1, args.len(), span);
                }
                let taken = if name == "car" {
                    args[0].car()
                } else {
                    args[0].cdr()
                };
                taken.unwrap_or_else(|| {
                    Atom::error(format!("type error: {} expects a pair", name), span)
                })
            }

            "cons" => {
                if args.len() != 2 {
                    return arity_exact(name, 2, args.len(), span);
                }
                Atom::cons(args[0].clone(), args[1].clone())
            }

            "list" => Atom::list(args),

            "null?" => unary_pred(name, &args, span, Atom::is_nil),
            "pair?" => unary_pred(name, &args, span, Atom::is_pair),
            "number?" => unary_pred(name, &args, span, Atom::is_number),
            "integer?" => unary_pred(name, &args, span, Atom::is_integer),
            "symbol?" => unary_pred(name, &args, span, Atom::is_symbol),
            "string?" => unary_pred(name, &args, span, Atom::is_string),
            "procedure?" => unary_pred(name, &args, span, |a| {
                a.is_lambda() || a.as_symbol().map(|s| is_primitive(s.as_str())).unwrap_or(false)
            }),

            "not" => {
                if args.len() != 1 {
                    return arity_exact(name, 1, args.len(), span);
                }
                Atom::bool(!args[0].is_truthy())
            }

            "display" => {
                for arg in &args {
                    print!("{}", arg.display_string());
                }
                Atom::nil()
            }

            "newline" => {
                println!();
                Atom::nil()
            }

            "error" => {
                let message = args
                    .first()
                    .map(|a| a.display_string())
                    .unwrap_or_else(|| "error".to_owned());
                Atom::error_with(message, args.get(1).cloned(), None, span)
            }

            _ => Atom::error(format!("unknown primitive `{}`", name), span),
        }
    }
}

impl Default for Interp {
    fn default() -> Self {
        Self::new()
    }
}

/// Numeric accumulator that keeps integers integral until a double joins.
enum Num {
    Int(i64),
    Dbl(f64),
}

fn classify(name: &str, atom: &Atom, span: Span) -> Result<Num, Atom> {
    if let Some(i) = atom.as_integer() {
        return Ok(Num::Int(i));
    }
    if let Some(n) = atom.as_number() {
        return Ok(Num::Dbl(n));
    }
    Err(type_error(name, atom, span))
}

fn type_error(name: &str, atom: &Atom, span: Span) -> Atom {
    let at = if atom.span().is_none() { span } else { atom.span() };
    Atom::error(
        format!("type error: {} expects numbers, got {}", name, atom),
        at,
    )
}

fn arity_exact(name: &str, want: usize, got: usize, span: Span) -> Atom {
    Atom::error(
        format!("arity error: {} expects {} arguments, got {}", name, want, got),
        span,
    )
}

fn arity_at_least(name: &str, want: usize, got: usize, span: Span) -> Atom {
    Atom::error(
        format!(
            "arity error: {} expects at least {} arguments, got {}",
            name, want, got
        ),
        span,
    )
}

fn number_operand(name: &str, atom: Option<&Atom>, span: Span) -> Result<f64, Atom> {
    match atom {
        Some(a) => a
            .as_f64_lossy()
            .ok_or_else(|| type_error(name, a, span)),
        None => Err(arity_at_least(name, 2, 0, span)),
    }
}

fn fold_arith(
    name: &str,
    args: &[Atom],
    span: Span,
    dbl: impl Fn(f64, f64) -> f64,
    int: impl Fn(i64, i64) -> Option<i64>,
) -> Atom {
    if args.len() < 2 {
        return arity_at_least(name, 2, args.len(), span);
    }
    let mut acc = match classify(name, &args[0], span) {
        Ok(n) => n,
        Err(e) => return e,
    };
    for arg in &args[1..] {
        let next = match classify(name, arg, span) {
            Ok(n) => n,
            Err(e) => return e,
        };
        acc = match (acc, next) {
            // Integer overflow falls over to doubles rather than wrapping.
            (Num::Int(a), Num::Int(b)) => match int(a, b) {
                Some(v) => Num::Int(v),
                None => Num::Dbl(dbl(a as f64, b as f64)),
            },
            (Num::Int(a), Num::Dbl(b)) => Num::Dbl(dbl(a as f64, b)),
            (Num::Dbl(a), Num::Int(b)) => Num::Dbl(dbl(a, b as f64)),
            (Num::Dbl(a), Num::Dbl(b)) => Num::Dbl(dbl(a, b)),
        };
    }
    match acc {
        Num::Int(i) => Atom::integer(i),
        Num::Dbl(d) => Atom::number(d),
    }
}

fn unary_pred(name: &str, args: &[Atom], span: Span, pred: impl Fn(&Atom) -> bool) -> Atom {
    if args.len() != 1 {
        return arity_exact(name, 1, args.len(), span);
    }
    Atom::bool(pred(&args[0]))
}
