//! Normalization by evaluation: untyped syntax is evaluated into a
//! semantic value domain, compared there for judgmental equality, and
//! quoted back into beta-normal syntax.

use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use num_bigint::{BigInt, BigUint, Sign};

use crate::ast::{renote, Builtin, Chunks, Const, Expr, Import, Projection, RawDouble, Var};
use crate::internal_error;


/// Evaluation environment: a persistent snoc list of binder frames.
/// `Skip` frames stand for binders whose value is abstract (conversion
/// and quotation descend under binders this way); `Extend` frames carry
/// a value produced by a `let` or an application.
#[derive(Debug, Clone)]
pub struct Env(Rc<EnvNode>);

#[derive(Debug)]
enum EnvNode {
    Empty,
    Skip(Env, String),
    Extend(Env, String, Val),
}

impl Env {
    pub fn new() -> Env {
        Env(Rc::new(EnvNode::Empty))
    }

    pub fn skip(&self, name: &str) -> Env {
        Env(Rc::new(EnvNode::Skip(self.clone(), name.to_owned())))
    }

    pub fn extend(&self, name: &str, v: Val) -> Env {
        Env(Rc::new(EnvNode::Extend(self.clone(), name.to_owned(), v)))
    }

    /// Number of frames bound to `name`. Fresh rigid variables are
    /// numbered with this count so they cannot shadow an existing one.
    pub fn count(&self, name: &str) -> usize {
        let mut n = 0;
        let mut env = self.clone();
        loop {
            let next = match &*env.0 {
                EnvNode::Empty => return n,
                EnvNode::Skip(rest, x) => {
                    if x.as_str() == name {
                        n += 1;
                    }
                    rest.clone()
                }
                EnvNode::Extend(rest, x, _) => {
                    if x.as_str() == name {
                        n += 1;
                    }
                    rest.clone()
                }
            };
            env = next;
        }
    }

    /// Resolve a variable. Falling off the end of the environment yields
    /// a rigid variable with negative level; that only happens for
    /// ill-scoped input, which is tolerated but not beautified.
    fn lookup(&self, var: &Var) -> Val {
        let mut env = self.clone();
        let mut k = var.index;
        loop {
            let next = match &*env.0 {
                EnvNode::Empty => return Val::Var(var.name.clone(), -(k as isize) - 1),
                EnvNode::Extend(rest, x, v) => {
                    if x.as_str() == var.name {
                        if k == 0 {
                            return v.clone();
                        }
                        k -= 1;
                    }
                    rest.clone()
                }
                EnvNode::Skip(rest, x) => {
                    if x.as_str() == var.name {
                        if k == 0 {
                            return Val::Var(var.name.clone(), rest.count(&var.name) as isize);
                        }
                        k -= 1;
                    }
                    rest.clone()
                }
            };
            env = next;
        }
    }
}

impl Default for Env {
    fn default() -> Env {
        Env::new()
    }
}

/// A suspended function body paired with its capture-time environment.
#[derive(Debug, Clone)]
pub struct Closure {
    name: String,
    env: Env,
    body: Rc<Expr>,
}

impl Closure {
    fn new(name: &str, env: &Env, body: Rc<Expr>) -> Closure {
        Closure {
            name: name.to_owned(),
            env: env.clone(),
            body,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Instantiate the bound variable with `v` and evaluate the body.
    pub fn apply(&self, v: Val) -> Val {
        eval(&self.env.extend(&self.name, v), &self.body)
    }
}

/// Text chunks over values.
#[derive(Debug, Clone)]
pub struct VChunks {
    pub interpolations: Vec<(String, Val)>,
    pub suffix: String,
}

impl VChunks {
    fn plain(s: impl Into<String>) -> VChunks {
        VChunks {
            interpolations: Vec::new(),
            suffix: s.into(),
        }
    }
}

/// A record projection target in the value domain. Label sets are kept
/// canonically sorted and deduplicated.
#[derive(Debug, Clone)]
pub enum ValProjection {
    Labels(BTreeSet<String>),
    Type(Rc<Val>),
}

/// The semantic domain. Mirrors `Expr` head-for-head: literal forms,
/// stuck forms whose children are values, and builtins carrying the
/// arguments collected so far. Record and union maps are sorted by
/// label regardless of source order.
#[derive(Debug, Clone)]
pub enum Val {
    Const(Const),
    /// A rigid variable: name and level. Negative levels mark variables
    /// of ill-scoped input that fell off the environment.
    Var(String, isize),
    Lam(Rc<Val>, Closure),
    Pi(Rc<Val>, Closure),
    /// Stuck application of a non-builtin head.
    App(Rc<Val>, Rc<Val>),
    /// A builtin and its argument spine. Reduction fires when the spine
    /// reaches the builtin's arity. The environment is the one in scope
    /// where the builtin occurred; conversion-based reduction rules
    /// consult it so that fresh-variable counting lines up.
    Prim(Builtin, Env, Vec<Val>),
    BoolLit(bool),
    BoolAnd(Rc<Val>, Rc<Val>),
    BoolOr(Rc<Val>, Rc<Val>),
    BoolEq(Rc<Val>, Rc<Val>),
    BoolNe(Rc<Val>, Rc<Val>),
    BoolIf(Rc<Val>, Rc<Val>, Rc<Val>),
    NaturalLit(BigUint),
    NaturalPlus(Rc<Val>, Rc<Val>),
    NaturalTimes(Rc<Val>, Rc<Val>),
    IntegerLit(BigInt),
    DoubleLit(RawDouble),
    TextLit(VChunks),
    /// The annotation is the full list type, present only when the
    /// literal is empty.
    ListLit(Option<Rc<Val>>, Vec<Val>),
    ListAppend(Rc<Val>, Rc<Val>),
    Some(Rc<Val>),
    Record(BTreeMap<String, Val>),
    RecordLit(BTreeMap<String, Val>),
    Union(BTreeMap<String, Option<Val>>),
    Combine(Rc<Val>, Rc<Val>),
    CombineTypes(Rc<Val>, Rc<Val>),
    Prefer(Rc<Val>, Rc<Val>),
    /// An injection into a union: the alternatives, the selected label,
    /// and the payload once the constructor has been applied.
    Inject(BTreeMap<String, Option<Val>>, String, Option<Rc<Val>>),
    Merge(Rc<Val>, Rc<Val>, Option<Rc<Val>>),
    ToMap(Rc<Val>, Option<Rc<Val>>),
    Field(Rc<Val>, String),
    Project(Rc<Val>, ValProjection),
    With(Rc<Val>, Vec<String>, Rc<Val>),
    Assert(Rc<Val>),
    Equivalent(Rc<Val>, Rc<Val>),
    Embed(Import),
}

fn prim0(b: Builtin) -> Val {
    Val::Prim(b, Env::new(), Vec::new())
}

/// Evaluate under an environment. Head-normalizing: the result always
/// has a value-level head, though subterms may be stuck on rigid
/// variables.
pub fn eval(env: &Env, e: &Expr) -> Val {
    match e {
        Expr::Const(c) => Val::Const(*c),
        Expr::Var(v) => env.lookup(v),
        Expr::Lam(x, a, b) => Val::Lam(Rc::new(eval(env, a)), Closure::new(x, env, b.clone())),
        Expr::Pi(x, a, b) => Val::Pi(Rc::new(eval(env, a)), Closure::new(x, env, b.clone())),
        Expr::App(f, a) => app(eval(env, f), eval(env, a)),
        Expr::Let(x, _, a, b) => eval(&env.extend(x, eval(env, a)), b),
        Expr::Annot(t, _) => eval(env, t),
        Expr::Builtin(b) => Val::Prim(*b, env.clone(), Vec::new()),
        Expr::BoolLit(b) => Val::BoolLit(*b),
        Expr::BoolAnd(l, r) => bool_and(env, eval(env, l), eval(env, r)),
        Expr::BoolOr(l, r) => bool_or(env, eval(env, l), eval(env, r)),
        Expr::BoolEq(l, r) => bool_eq(env, eval(env, l), eval(env, r)),
        Expr::BoolNe(l, r) => bool_ne(env, eval(env, l), eval(env, r)),
        Expr::BoolIf(c, t, f) => bool_if(env, eval(env, c), eval(env, t), eval(env, f)),
        Expr::NaturalLit(n) => Val::NaturalLit(n.clone()),
        Expr::NaturalPlus(l, r) => natural_plus(eval(env, l), eval(env, r)),
        Expr::NaturalTimes(l, r) => natural_times(eval(env, l), eval(env, r)),
        Expr::IntegerLit(n) => Val::IntegerLit(n.clone()),
        Expr::DoubleLit(d) => Val::DoubleLit(*d),
        Expr::TextLit(chunks) => eval_chunks(env, chunks),
        Expr::TextAppend(l, r) => {
            // `l ++ r` is the two-splice interpolation `"${l}${r}"`.
            let desugared = Chunks {
                interpolations: vec![(String::new(), l.clone()), (String::new(), r.clone())],
                suffix: String::new(),
            };
            eval_chunks(env, &desugared)
        }
        Expr::ListLit(t, xs) => {
            if xs.is_empty() {
                Val::ListLit(t.as_ref().map(|t| Rc::new(eval(env, t))), Vec::new())
            } else {
                Val::ListLit(None, xs.iter().map(|x| eval(env, x)).collect())
            }
        }
        Expr::ListAppend(l, r) => list_append(eval(env, l), eval(env, r)),
        Expr::Some(e) => Val::Some(Rc::new(eval(env, e))),
        Expr::Record(kts) => Val::Record(
            kts.iter()
                .map(|(k, t)| (k.clone(), eval(env, t)))
                .collect(),
        ),
        Expr::RecordLit(kvs) => Val::RecordLit(
            kvs.iter()
                .map(|(k, v)| (k.clone(), eval(env, v)))
                .collect(),
        ),
        Expr::Union(kts) => Val::Union(
            kts.iter()
                .map(|(k, t)| (k.clone(), t.as_ref().map(|t| eval(env, t))))
                .collect(),
        ),
        Expr::Combine(l, r) => combine(eval(env, l), eval(env, r)),
        Expr::CombineTypes(l, r) => combine_types(eval(env, l), eval(env, r)),
        Expr::Prefer(l, r) => prefer(env, eval(env, l), eval(env, r)),
        Expr::RecordCompletion(t, u) => {
            // `t :: u` is `(t.default // u) : t.Type`; the annotation is
            // transparent here.
            prefer(env, vfield(eval(env, t), "default"), eval(env, u))
        }
        Expr::Merge(t, u, annot) => merge(
            eval(env, t),
            eval(env, u),
            annot.as_ref().map(|t| eval(env, t)),
        ),
        Expr::ToMap(t, annot) => to_map(eval(env, t), annot.as_ref().map(|t| eval(env, t))),
        Expr::Field(t, k) => vfield(eval(env, t), k),
        Expr::Project(t, Projection::Labels(ks)) => {
            let ks = ks.iter().cloned().collect();
            project_labels(env, eval(env, t), ks)
        }
        Expr::Project(t, Projection::Type(ty)) => project_type(env, eval(env, t), eval(env, ty)),
        Expr::With(t, path, v) => vwith(eval(env, t), path, eval(env, v)),
        Expr::Assert(t) => Val::Assert(Rc::new(eval(env, t))),
        Expr::Equivalent(l, r) => {
            Val::Equivalent(Rc::new(eval(env, l)), Rc::new(eval(env, r)))
        }
        Expr::Note(_, e) => eval(env, e),
        Expr::ImportAlt(l, _) => eval(env, l),
        Expr::Embed(i) => Val::Embed(i.clone()),
    }
}

/// Apply one value to another. Builtin spines grow here and reduce on
/// saturation; applying a non-function leaves a stuck application.
pub fn app(f: Val, a: Val) -> Val {
    match f {
        Val::Lam(_, cl) => cl.apply(a),
        Val::Prim(b, env, mut args) => {
            args.push(a);
            apply_prim(b, env, args)
        }
        Val::Inject(m, k, None) => {
            if matches!(m.get(&k), Some(Some(_))) {
                Val::Inject(m, k, Some(Rc::new(a)))
            } else {
                Val::App(Rc::new(Val::Inject(m, k, None)), Rc::new(a))
            }
        }
        f => Val::App(Rc::new(f), Rc::new(a)),
    }
}

/// Builtin reduction, attempted exactly when the spine reaches the
/// builtin's arity. A rule whose scrutinee is not literal leaves the
/// saturated spine stuck.
fn apply_prim(b: Builtin, env: Env, args: Vec<Val>) -> Val {
    if b.arity() != Some(args.len()) {
        return Val::Prim(b, env, args);
    }
    match b {
        Builtin::NaturalFold => match &args[..] {
            [Val::NaturalLit(n), _, succ, zero] => {
                let mut acc = zero.clone();
                let mut i = BigUint::ZERO;
                while &i < n {
                    acc = app(succ.clone(), acc);
                    i += 1u32;
                }
                acc
            }
            _ => Val::Prim(b, env, args),
        },
        Builtin::NaturalBuild => {
            // Build/fold fusion: a directly supplied fold cancels.
            if let [Val::Prim(Builtin::NaturalFold, _, fargs)] = &args[..] {
                if fargs.len() == 1 {
                    return fargs[0].clone();
                }
            }
            let g = args[0].clone();
            let succ = Val::Lam(
                Rc::new(prim0(Builtin::Natural)),
                Closure::new(
                    "x",
                    &Env::new(),
                    Rc::new(Expr::NaturalPlus(Expr::v("x"), Expr::natural(1))),
                ),
            );
            app(
                app(app(g, prim0(Builtin::Natural)), succ),
                Val::NaturalLit(BigUint::ZERO),
            )
        }
        Builtin::NaturalIsZero => match &args[..] {
            [Val::NaturalLit(n)] => Val::BoolLit(*n == BigUint::ZERO),
            _ => Val::Prim(b, env, args),
        },
        Builtin::NaturalEven => match &args[..] {
            [Val::NaturalLit(n)] => Val::BoolLit(n % 2u32 == BigUint::ZERO),
            _ => Val::Prim(b, env, args),
        },
        Builtin::NaturalOdd => match &args[..] {
            [Val::NaturalLit(n)] => Val::BoolLit(n % 2u32 != BigUint::ZERO),
            _ => Val::Prim(b, env, args),
        },
        Builtin::NaturalToInteger => match &args[..] {
            [Val::NaturalLit(n)] => Val::IntegerLit(BigInt::from(n.clone())),
            _ => Val::Prim(b, env, args),
        },
        Builtin::NaturalShow => match &args[..] {
            [Val::NaturalLit(n)] => Val::TextLit(VChunks::plain(n.to_string())),
            _ => Val::Prim(b, env, args),
        },
        Builtin::NaturalSubtract => match &args[..] {
            [Val::NaturalLit(m), _] if *m == BigUint::ZERO => args[1].clone(),
            [Val::NaturalLit(m), Val::NaturalLit(n)] => {
                if n >= m {
                    Val::NaturalLit(n - m)
                } else {
                    Val::NaturalLit(BigUint::ZERO)
                }
            }
            [_, Val::NaturalLit(n)] if *n == BigUint::ZERO => Val::NaturalLit(BigUint::ZERO),
            [m, n] if conv(&env, m, n) => Val::NaturalLit(BigUint::ZERO),
            _ => Val::Prim(b, env, args),
        },
        Builtin::IntegerShow => match &args[..] {
            [Val::IntegerLit(i)] => {
                let shown = match i.sign() {
                    Sign::Minus => i.to_string(),
                    _ => format!("+{}", i),
                };
                Val::TextLit(VChunks::plain(shown))
            }
            _ => Val::Prim(b, env, args),
        },
        Builtin::IntegerToDouble => match &args[..] {
            [Val::IntegerLit(i)] => {
                // Round-trip through the decimal representation for a
                // correctly rounded conversion.
                let d = match i.to_string().parse::<f64>() {
                    Ok(d) => d,
                    Err(_) => internal_error("integer decimal form failed to parse as a double"),
                };
                Val::DoubleLit(RawDouble(d))
            }
            _ => Val::Prim(b, env, args),
        },
        Builtin::DoubleShow => match &args[..] {
            [Val::DoubleLit(d)] => Val::TextLit(VChunks::plain(show_double(d.0))),
            _ => Val::Prim(b, env, args),
        },
        Builtin::TextShow => match &args[..] {
            [Val::TextLit(chunks)] if chunks.interpolations.is_empty() => {
                Val::TextLit(VChunks::plain(text_show(&chunks.suffix)))
            }
            _ => Val::Prim(b, env, args),
        },
        Builtin::ListBuild => {
            if let [_, Val::Prim(Builtin::ListFold, _, fargs)] = &args[..] {
                if fargs.len() == 2 {
                    return fargs[1].clone();
                }
            }
            let a = args[0].clone();
            let g = args[1].clone();
            let list_a = Val::Prim(Builtin::List, Env::new(), vec![a.clone()]);
            let cons_env = Env::new().extend("A", a.clone());
            let cons_body = Expr::lam(
                "as",
                Expr::app(Expr::builtin(Builtin::List), Expr::v("A")),
                Rc::new(Expr::ListAppend(Expr::list(vec![Expr::v("a")]), Expr::v("as"))),
            );
            let cons = Val::Lam(Rc::new(a), Closure::new("a", &cons_env, cons_body));
            let nil = Val::ListLit(Some(Rc::new(list_a.clone())), Vec::new());
            app(app(app(g, list_a), cons), nil)
        }
        Builtin::ListFold => match &args[..] {
            [_, Val::ListLit(_, xs), _, cons, nil] => {
                let mut acc = nil.clone();
                for x in xs.iter().rev() {
                    acc = app(app(cons.clone(), x.clone()), acc);
                }
                acc
            }
            _ => Val::Prim(b, env, args),
        },
        Builtin::ListLength => match &args[..] {
            [_, Val::ListLit(_, xs)] => Val::NaturalLit(BigUint::from(xs.len())),
            _ => Val::Prim(b, env, args),
        },
        Builtin::ListHead => match &args[..] {
            [a, Val::ListLit(_, xs)] => match xs.first() {
                Option::Some(x) => Val::Some(Rc::new(x.clone())),
                Option::None => Val::Prim(Builtin::OptionalNone, Env::new(), vec![a.clone()]),
            },
            _ => Val::Prim(b, env, args),
        },
        Builtin::ListLast => match &args[..] {
            [a, Val::ListLit(_, xs)] => match xs.last() {
                Option::Some(x) => Val::Some(Rc::new(x.clone())),
                Option::None => Val::Prim(Builtin::OptionalNone, Env::new(), vec![a.clone()]),
            },
            _ => Val::Prim(b, env, args),
        },
        Builtin::ListIndexed => match &args[..] {
            [a, Val::ListLit(_, xs)] => {
                if xs.is_empty() {
                    let mut entry = BTreeMap::new();
                    entry.insert("index".to_owned(), prim0(Builtin::Natural));
                    entry.insert("value".to_owned(), a.clone());
                    let ty = Val::Prim(Builtin::List, Env::new(), vec![Val::Record(entry)]);
                    Val::ListLit(Option::Some(Rc::new(ty)), Vec::new())
                } else {
                    let out = xs
                        .iter()
                        .enumerate()
                        .map(|(i, x)| {
                            let mut entry = BTreeMap::new();
                            entry.insert("index".to_owned(), Val::NaturalLit(BigUint::from(i)));
                            entry.insert("value".to_owned(), x.clone());
                            Val::RecordLit(entry)
                        })
                        .collect();
                    Val::ListLit(Option::None, out)
                }
            }
            _ => Val::Prim(b, env, args),
        },
        Builtin::ListReverse => match &args[..] {
            [_, Val::ListLit(t, xs)] => {
                Val::ListLit(t.clone(), xs.iter().rev().cloned().collect())
            }
            _ => Val::Prim(b, env, args),
        },
        Builtin::OptionalFold => match &args[..] {
            [_, Val::Some(x), _, some, _] => app(some.clone(), (**x).clone()),
            [_, Val::Prim(Builtin::OptionalNone, _, nargs), _, _, none] if nargs.len() == 1 => {
                none.clone()
            }
            _ => Val::Prim(b, env, args),
        },
        Builtin::OptionalBuild => {
            if let [_, Val::Prim(Builtin::OptionalFold, _, fargs)] = &args[..] {
                if fargs.len() == 2 {
                    return fargs[1].clone();
                }
            }
            let a = args[0].clone();
            let g = args[1].clone();
            let opt_a = Val::Prim(Builtin::Optional, Env::new(), vec![a.clone()]);
            let some_fn = Val::Lam(
                Rc::new(a.clone()),
                Closure::new("a", &Env::new(), Expr::some(Expr::v("a"))),
            );
            let none_a = Val::Prim(Builtin::OptionalNone, Env::new(), vec![a]);
            app(app(app(g, opt_a), some_fn), none_a)
        }
        _ => Val::Prim(b, env, args),
    }
}

fn bool_and(env: &Env, l: Val, r: Val) -> Val {
    if let Val::BoolLit(true) = l {
        return r;
    }
    if let Val::BoolLit(true) = r {
        return l;
    }
    if matches!(l, Val::BoolLit(false)) || matches!(r, Val::BoolLit(false)) {
        return Val::BoolLit(false);
    }
    if conv(env, &l, &r) {
        return l;
    }
    Val::BoolAnd(Rc::new(l), Rc::new(r))
}

fn bool_or(env: &Env, l: Val, r: Val) -> Val {
    if let Val::BoolLit(false) = l {
        return r;
    }
    if let Val::BoolLit(false) = r {
        return l;
    }
    if matches!(l, Val::BoolLit(true)) || matches!(r, Val::BoolLit(true)) {
        return Val::BoolLit(true);
    }
    if conv(env, &l, &r) {
        return l;
    }
    Val::BoolOr(Rc::new(l), Rc::new(r))
}

fn bool_eq(env: &Env, l: Val, r: Val) -> Val {
    if let Val::BoolLit(true) = l {
        return r;
    }
    if let Val::BoolLit(true) = r {
        return l;
    }
    if conv(env, &l, &r) {
        return Val::BoolLit(true);
    }
    Val::BoolEq(Rc::new(l), Rc::new(r))
}

fn bool_ne(env: &Env, l: Val, r: Val) -> Val {
    if let Val::BoolLit(false) = l {
        return r;
    }
    if let Val::BoolLit(false) = r {
        return l;
    }
    if conv(env, &l, &r) {
        return Val::BoolLit(false);
    }
    Val::BoolNe(Rc::new(l), Rc::new(r))
}

fn bool_if(env: &Env, c: Val, t: Val, f: Val) -> Val {
    if let Val::BoolLit(b) = c {
        return if b { t } else { f };
    }
    if matches!(t, Val::BoolLit(true)) && matches!(f, Val::BoolLit(false)) {
        return c;
    }
    if conv(env, &t, &f) {
        return t;
    }
    Val::BoolIf(Rc::new(c), Rc::new(t), Rc::new(f))
}

fn natural_plus(l: Val, r: Val) -> Val {
    if matches!(&l, Val::NaturalLit(n) if *n == BigUint::ZERO) {
        return r;
    }
    if matches!(&r, Val::NaturalLit(n) if *n == BigUint::ZERO) {
        return l;
    }
    if let (Val::NaturalLit(a), Val::NaturalLit(b)) = (&l, &r) {
        return Val::NaturalLit(a + b);
    }
    Val::NaturalPlus(Rc::new(l), Rc::new(r))
}

fn natural_times(l: Val, r: Val) -> Val {
    let one = BigUint::from(1u32);
    if matches!(&l, Val::NaturalLit(n) if *n == one) {
        return r;
    }
    if matches!(&r, Val::NaturalLit(n) if *n == one) {
        return l;
    }
    if matches!(&l, Val::NaturalLit(n) if *n == BigUint::ZERO)
        || matches!(&r, Val::NaturalLit(n) if *n == BigUint::ZERO)
    {
        return Val::NaturalLit(BigUint::ZERO);
    }
    if let (Val::NaturalLit(a), Val::NaturalLit(b)) = (&l, &r) {
        return Val::NaturalLit(a * b);
    }
    Val::NaturalTimes(Rc::new(l), Rc::new(r))
}

fn list_append(l: Val, r: Val) -> Val {
    match (l, r) {
        (Val::ListLit(_, xs), r) if xs.is_empty() => r,
        (l, Val::ListLit(_, xs)) if xs.is_empty() => l,
        (Val::ListLit(_, mut xs), Val::ListLit(_, ys)) => {
            xs.extend(ys);
            Val::ListLit(None, xs)
        }
        (l, r) => Val::ListAppend(Rc::new(l), Rc::new(r)),
    }
}

/// Interpolation evaluation with inline flattening: a spliced text
/// literal merges into the surrounding chunks, and a lone bare splice
/// collapses to the spliced value. Accumulation is iterative to keep
/// stack use flat.
fn eval_chunks(env: &Env, chunks: &Chunks) -> Val {
    let mut out: Vec<(String, Val)> = Vec::new();
    let mut lit = String::new();
    for (prefix, e) in &chunks.interpolations {
        lit.push_str(prefix);
        match eval(env, e) {
            Val::TextLit(sub) => {
                for (p, v) in sub.interpolations {
                    lit.push_str(&p);
                    out.push((std::mem::take(&mut lit), v));
                }
                lit.push_str(&sub.suffix);
            }
            v => out.push((std::mem::take(&mut lit), v)),
        }
    }
    lit.push_str(&chunks.suffix);
    if out.len() == 1 && out[0].0.is_empty() && lit.is_empty() {
        return out.remove(0).1;
    }
    Val::TextLit(VChunks {
        interpolations: out,
        suffix: lit,
    })
}

/// `Text/show` rendering: the input wrapped in quotes with the escapes
/// the language standard mandates.
pub fn text_show(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '$' => out.push_str("\\u0024"),
            '\\' => out.push_str("\\\\"),
            '\u{8}' => out.push_str("\\b"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{c}' => out.push_str("\\f"),
            c if (c as u32) <= 0x1f => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

fn show_double(d: f64) -> String {
    if d.is_nan() {
        "NaN".to_owned()
    } else if d == f64::INFINITY {
        "Infinity".to_owned()
    } else if d == f64::NEG_INFINITY {
        "-Infinity".to_owned()
    } else {
        format!("{:?}", d)
    }
}

fn combine(l: Val, r: Val) -> Val {
    match (l, r) {
        (Val::RecordLit(m), r) if m.is_empty() => r,
        (l, Val::RecordLit(m)) if m.is_empty() => l,
        (Val::RecordLit(ml), Val::RecordLit(mr)) => {
            let mut out = ml;
            for (k, v) in mr {
                let merged = match out.remove(&k) {
                    Option::Some(existing) => combine(existing, v),
                    Option::None => v,
                };
                out.insert(k, merged);
            }
            Val::RecordLit(out)
        }
        (l, r) => Val::Combine(Rc::new(l), Rc::new(r)),
    }
}

fn combine_types(l: Val, r: Val) -> Val {
    match (l, r) {
        (Val::Record(m), r) if m.is_empty() => r,
        (l, Val::Record(m)) if m.is_empty() => l,
        (Val::Record(ml), Val::Record(mr)) => {
            let mut out = ml;
            for (k, t) in mr {
                let merged = match out.remove(&k) {
                    Option::Some(existing) => combine_types(existing, t),
                    Option::None => t,
                };
                out.insert(k, merged);
            }
            Val::Record(out)
        }
        (l, r) => Val::CombineTypes(Rc::new(l), Rc::new(r)),
    }
}

fn prefer(env: &Env, l: Val, r: Val) -> Val {
    match (l, r) {
        (Val::RecordLit(m), r) if m.is_empty() => r,
        (l, Val::RecordLit(m)) if m.is_empty() => l,
        (Val::RecordLit(mut ml), Val::RecordLit(mr)) => {
            for (k, v) in mr {
                ml.insert(k, v);
            }
            Val::RecordLit(ml)
        }
        (l, r) => {
            if conv(env, &l, &r) {
                l
            } else {
                Val::Prefer(Rc::new(l), Rc::new(r))
            }
        }
    }
}

fn merge(handlers: Val, scrutinee: Val, annot: Option<Val>) -> Val {
    if let Val::RecordLit(m) = &handlers {
        match &scrutinee {
            Val::Inject(_, k, Option::Some(payload)) => {
                let handler = m.get(k).cloned().unwrap_or_else(|| {
                    internal_error(format!("merge: no handler for alternative `{k}`"))
                });
                return app(handler, (**payload).clone());
            }
            Val::Inject(_, k, Option::None) => {
                return m.get(k).cloned().unwrap_or_else(|| {
                    internal_error(format!("merge: no handler for alternative `{k}`"))
                });
            }
            Val::Some(payload) => {
                let handler = m.get("Some").cloned().unwrap_or_else(|| {
                    internal_error("merge: no handler for alternative `Some`")
                });
                return app(handler, (**payload).clone());
            }
            Val::Prim(Builtin::OptionalNone, _, nargs) if nargs.len() == 1 => {
                return m.get("None").cloned().unwrap_or_else(|| {
                    internal_error("merge: no handler for alternative `None`")
                });
            }
            _ => {}
        }
    }
    Val::Merge(Rc::new(handlers), Rc::new(scrutinee), annot.map(Rc::new))
}

fn to_map(t: Val, annot: Option<Val>) -> Val {
    match t {
        Val::RecordLit(m) if !m.is_empty() => {
            let out = m
                .into_iter()
                .map(|(k, v)| {
                    let mut entry = BTreeMap::new();
                    entry.insert("mapKey".to_owned(), Val::TextLit(VChunks::plain(k)));
                    entry.insert("mapValue".to_owned(), v);
                    Val::RecordLit(entry)
                })
                .collect();
            Val::ListLit(None, out)
        }
        Val::RecordLit(_) => match annot {
            Option::Some(ty) => Val::ListLit(Option::Some(Rc::new(ty)), Vec::new()),
            Option::None => internal_error("toMap of an empty record requires a type annotation"),
        },
        t => Val::ToMap(Rc::new(t), annot.map(Rc::new)),
    }
}

/// Field access, with the selection pushdowns: through projections,
/// through `//` and `/\` when one side is a literal, and into unions
/// where it selects a constructor or tag.
fn vfield(t: Val, k: &str) -> Val {
    match t {
        Val::Union(m) => {
            if m.contains_key(k) {
                Val::Inject(m, k.to_owned(), None)
            } else {
                internal_error(format!("field access: union has no alternative `{k}`"))
            }
        }
        Val::RecordLit(mut m) => match m.remove(k) {
            Option::Some(v) => v,
            Option::None => internal_error(format!("field access: record has no field `{k}`")),
        },
        Val::Project(inner, _) => vfield((*inner).clone(), k),
        Val::Prefer(l, r) => {
            if let Val::RecordLit(m) = &*r {
                match m.get(k) {
                    Option::Some(v) => v.clone(),
                    Option::None => vfield((*l).clone(), k),
                }
            } else if let Val::RecordLit(m) = &*l {
                match m.get(k) {
                    Option::Some(v) => {
                        let single = BTreeMap::from([(k.to_owned(), v.clone())]);
                        Val::Field(
                            Rc::new(Val::Prefer(Rc::new(Val::RecordLit(single)), r)),
                            k.to_owned(),
                        )
                    }
                    Option::None => vfield((*r).clone(), k),
                }
            } else {
                Val::Field(Rc::new(Val::Prefer(l, r)), k.to_owned())
            }
        }
        Val::Combine(l, r) => {
            if let Val::RecordLit(m) = &*l {
                match m.get(k) {
                    Option::Some(v) => {
                        let single = BTreeMap::from([(k.to_owned(), v.clone())]);
                        Val::Field(
                            Rc::new(Val::Combine(Rc::new(Val::RecordLit(single)), r)),
                            k.to_owned(),
                        )
                    }
                    Option::None => vfield((*r).clone(), k),
                }
            } else if let Val::RecordLit(m) = &*r {
                match m.get(k) {
                    Option::Some(v) => {
                        let single = BTreeMap::from([(k.to_owned(), v.clone())]);
                        Val::Field(
                            Rc::new(Val::Combine(l, Rc::new(Val::RecordLit(single)))),
                            k.to_owned(),
                        )
                    }
                    Option::None => vfield((*l).clone(), k),
                }
            } else {
                Val::Field(Rc::new(Val::Combine(l, r)), k.to_owned())
            }
        }
        t => Val::Field(Rc::new(t), k.to_owned()),
    }
}

fn project_labels(env: &Env, t: Val, ks: BTreeSet<String>) -> Val {
    if ks.is_empty() {
        return Val::RecordLit(BTreeMap::new());
    }
    match t {
        Val::RecordLit(mut m) => {
            m.retain(|k, _| ks.contains(k));
            Val::RecordLit(m)
        }
        Val::Project(inner, _) => project_labels(env, (*inner).clone(), ks),
        Val::Prefer(l, r) => {
            if let Val::RecordLit(m) = &*r {
                let (on_right, on_left): (BTreeSet<String>, BTreeSet<String>) =
                    ks.into_iter().partition(|k| m.contains_key(k));
                let mut right = m.clone();
                right.retain(|k, _| on_right.contains(k));
                prefer(
                    env,
                    project_labels(env, (*l).clone(), on_left),
                    Val::RecordLit(right),
                )
            } else {
                Val::Project(
                    Rc::new(Val::Prefer(l, r)),
                    ValProjection::Labels(ks),
                )
            }
        }
        t => Val::Project(Rc::new(t), ValProjection::Labels(ks)),
    }
}

fn project_type(env: &Env, t: Val, ty: Val) -> Val {
    if let Val::Record(kts) = &ty {
        let ks = kts.keys().cloned().collect();
        return project_labels(env, t, ks);
    }
    Val::Project(Rc::new(t), ValProjection::Type(Rc::new(ty)))
}

/// Nested record update. Missing intermediate fields materialize as
/// empty records; a non-literal target leaves the update stuck.
fn vwith(t: Val, path: &[String], v: Val) -> Val {
    match t {
        Val::RecordLit(mut m) => match path {
            [] => internal_error("with: empty update path"),
            [k] => {
                m.insert(k.clone(), v);
                Val::RecordLit(m)
            }
            [k, rest @ ..] => {
                let sub = m
                    .remove(k)
                    .unwrap_or_else(|| Val::RecordLit(BTreeMap::new()));
                m.insert(k.clone(), vwith(sub, rest, v));
                Val::RecordLit(m)
            }
        },
        t => Val::With(Rc::new(t), path.to_vec(), Rc::new(v)),
    }
}

fn fresh(env: &Env, name: &str) -> Val {
    Val::Var(name.to_owned(), env.count(name) as isize)
}

fn eq_list_by(env: &Env, ls: &[Val], rs: &[Val]) -> bool {
    ls.len() == rs.len() && ls.iter().zip(rs).all(|(l, r)| conv(env, l, r))
}

fn eq_map_by(env: &Env, ls: &BTreeMap<String, Val>, rs: &BTreeMap<String, Val>) -> bool {
    ls.len() == rs.len()
        && ls
            .iter()
            .zip(rs)
            .all(|((k, l), (j, r))| k == j && conv(env, l, r))
}

fn eq_maybe_by(env: &Env, l: Option<&Val>, r: Option<&Val>) -> bool {
    match (l, r) {
        (Option::None, Option::None) => true,
        (Option::Some(l), Option::Some(r)) => conv(env, l, r),
        _ => false,
    }
}

fn eq_union_by(
    env: &Env,
    ls: &BTreeMap<String, Option<Val>>,
    rs: &BTreeMap<String, Option<Val>>,
) -> bool {
    ls.len() == rs.len()
        && ls
            .iter()
            .zip(rs)
            .all(|((k, l), (j, r))| k == j && eq_maybe_by(env, l.as_ref(), r.as_ref()))
}

fn eq_chunks_by(env: &Env, ls: &VChunks, rs: &VChunks) -> bool {
    ls.interpolations.len() == rs.interpolations.len()
        && ls
            .interpolations
            .iter()
            .zip(&rs.interpolations)
            .all(|((p, l), (q, r))| p == q && conv(env, l, r))
        && ls.suffix == rs.suffix
}

/// Decide judgmental equality of two values. The environment only
/// supplies name counts for fresh rigid variables; descending under a
/// binder pushes a `Skip` frame so the counts stay aligned with the
/// enclosing scope.
pub fn conv(env: &Env, l: &Val, r: &Val) -> bool {
    match (l, r) {
        (Val::Const(a), Val::Const(b)) => a == b,
        (Val::Var(x, i), Val::Var(y, j)) => x == y && i == j,
        (Val::Lam(_, cl), Val::Lam(_, cr)) => {
            let x = fresh(env, cl.name());
            conv(&env.skip(cl.name()), &cl.apply(x.clone()), &cr.apply(x))
        }
        // Eta at function type: apply both sides to the same fresh
        // rigid variable, whatever the other head is.
        (Val::Lam(_, cl), r) => {
            let x = fresh(env, cl.name());
            conv(&env.skip(cl.name()), &cl.apply(x.clone()), &app(r.clone(), x))
        }
        (l, Val::Lam(_, cr)) => {
            let x = fresh(env, cr.name());
            conv(&env.skip(cr.name()), &app(l.clone(), x.clone()), &cr.apply(x))
        }
        (Val::Pi(al, cl), Val::Pi(ar, cr)) => {
            if !conv(env, al, ar) {
                return false;
            }
            let x = fresh(env, cl.name());
            conv(&env.skip(cl.name()), &cl.apply(x.clone()), &cr.apply(x))
        }
        (Val::App(f, a), Val::App(g, b)) => conv(env, f, g) && conv(env, a, b),
        (Val::Prim(a, _, ls), Val::Prim(b, _, rs)) => a == b && eq_list_by(env, ls, rs),
        (Val::BoolLit(a), Val::BoolLit(b)) => a == b,
        (Val::BoolAnd(a, b), Val::BoolAnd(c, d)) => conv(env, a, c) && conv(env, b, d),
        (Val::BoolOr(a, b), Val::BoolOr(c, d)) => conv(env, a, c) && conv(env, b, d),
        (Val::BoolEq(a, b), Val::BoolEq(c, d)) => conv(env, a, c) && conv(env, b, d),
        (Val::BoolNe(a, b), Val::BoolNe(c, d)) => conv(env, a, c) && conv(env, b, d),
        (Val::BoolIf(a, b, c), Val::BoolIf(d, e, f)) => {
            conv(env, a, d) && conv(env, b, e) && conv(env, c, f)
        }
        (Val::NaturalLit(a), Val::NaturalLit(b)) => a == b,
        (Val::NaturalPlus(a, b), Val::NaturalPlus(c, d)) => conv(env, a, c) && conv(env, b, d),
        (Val::NaturalTimes(a, b), Val::NaturalTimes(c, d)) => {
            conv(env, a, c) && conv(env, b, d)
        }
        (Val::IntegerLit(a), Val::IntegerLit(b)) => a == b,
        (Val::DoubleLit(a), Val::DoubleLit(b)) => a == b,
        (Val::TextLit(a), Val::TextLit(b)) => eq_chunks_by(env, a, b),
        (Val::ListLit(at, ls), Val::ListLit(bt, rs)) => {
            eq_maybe_by(env, at.as_deref(), bt.as_deref()) && eq_list_by(env, ls, rs)
        }
        (Val::ListAppend(a, b), Val::ListAppend(c, d)) => conv(env, a, c) && conv(env, b, d),
        (Val::Some(a), Val::Some(b)) => conv(env, a, b),
        (Val::Record(a), Val::Record(b)) => eq_map_by(env, a, b),
        (Val::RecordLit(a), Val::RecordLit(b)) => eq_map_by(env, a, b),
        (Val::Union(a), Val::Union(b)) => eq_union_by(env, a, b),
        (Val::Combine(a, b), Val::Combine(c, d)) => conv(env, a, c) && conv(env, b, d),
        (Val::CombineTypes(a, b), Val::CombineTypes(c, d)) => {
            conv(env, a, c) && conv(env, b, d)
        }
        (Val::Prefer(a, b), Val::Prefer(c, d)) => conv(env, a, c) && conv(env, b, d),
        (Val::Inject(m, k, a), Val::Inject(n, j, b)) => {
            k == j && eq_union_by(env, m, n) && eq_maybe_by(env, a.as_deref(), b.as_deref())
        }
        (Val::Merge(a, b, _), Val::Merge(c, d, _)) => conv(env, a, c) && conv(env, b, d),
        (Val::ToMap(a, _), Val::ToMap(b, _)) => conv(env, a, b),
        (Val::Field(a, k), Val::Field(b, j)) => k == j && conv(env, a, b),
        (
            Val::Project(a, ValProjection::Labels(ks)),
            Val::Project(b, ValProjection::Labels(js)),
        ) => ks == js && conv(env, a, b),
        (Val::Project(a, ValProjection::Type(s)), Val::Project(b, ValProjection::Type(t))) => {
            conv(env, a, b) && conv(env, s, t)
        }
        (Val::With(a, p, v), Val::With(b, q, w)) => {
            p == q && conv(env, a, b) && conv(env, v, w)
        }
        (Val::Assert(a), Val::Assert(b)) => conv(env, a, b),
        (Val::Equivalent(a, b), Val::Equivalent(c, d)) => {
            conv(env, a, c) && conv(env, b, d)
        }
        (Val::Embed(a), Val::Embed(b)) => a == b,
        _ => false,
    }
}

/// Name-counting environment for quotation: the binder names in scope,
/// innermost last.
#[derive(Debug, Clone)]
pub struct Names(Rc<NamesNode>);

#[derive(Debug)]
enum NamesNode {
    Empty,
    Bind(Names, String),
}

impl Names {
    pub fn new() -> Names {
        Names(Rc::new(NamesNode::Empty))
    }

    pub fn bind(&self, name: &str) -> Names {
        Names(Rc::new(NamesNode::Bind(self.clone(), name.to_owned())))
    }

    pub fn count(&self, name: &str) -> usize {
        let mut n = 0;
        let mut names = self.clone();
        loop {
            let next = match &*names.0 {
                NamesNode::Empty => return n,
                NamesNode::Bind(rest, x) => {
                    if x.as_str() == name {
                        n += 1;
                    }
                    rest.clone()
                }
            };
            names = next;
        }
    }
}

impl Default for Names {
    fn default() -> Names {
        Names::new()
    }
}

fn fresh_quote(names: &Names, name: &str) -> Val {
    Val::Var(name.to_owned(), names.count(name) as isize)
}

fn quote_binder(names: &Names, cl: &Closure) -> Rc<Expr> {
    let x = fresh_quote(names, cl.name());
    quote(&names.bind(cl.name()), &cl.apply(x))
}

/// Read a value back into beta-normal syntax. Rigid-variable levels are
/// re-indexed against the names in scope; closures are instantiated at
/// fresh rigid variables; builtin spines come back as iterated
/// applications.
pub fn quote(names: &Names, v: &Val) -> Rc<Expr> {
    match v {
        Val::Const(c) => Rc::new(Expr::Const(*c)),
        Val::Var(x, level) => {
            let index = names.count(x) as isize - level - 1;
            let index = usize::try_from(index)
                .unwrap_or_else(|_| internal_error("rigid variable escaped its scope"));
            Expr::var(x, index)
        }
        Val::Lam(a, cl) => Rc::new(Expr::Lam(
            cl.name().to_owned(),
            quote(names, a),
            quote_binder(names, cl),
        )),
        Val::Pi(a, cl) => Rc::new(Expr::Pi(
            cl.name().to_owned(),
            quote(names, a),
            quote_binder(names, cl),
        )),
        Val::App(f, a) => Rc::new(Expr::App(quote(names, f), quote(names, a))),
        Val::Prim(b, _, args) => args
            .iter()
            .fold(Expr::builtin(*b), |f, a| Rc::new(Expr::App(f, quote(names, a)))),
        Val::BoolLit(b) => Rc::new(Expr::BoolLit(*b)),
        Val::BoolAnd(l, r) => Rc::new(Expr::BoolAnd(quote(names, l), quote(names, r))),
        Val::BoolOr(l, r) => Rc::new(Expr::BoolOr(quote(names, l), quote(names, r))),
        Val::BoolEq(l, r) => Rc::new(Expr::BoolEq(quote(names, l), quote(names, r))),
        Val::BoolNe(l, r) => Rc::new(Expr::BoolNe(quote(names, l), quote(names, r))),
        Val::BoolIf(c, t, f) => Rc::new(Expr::BoolIf(
            quote(names, c),
            quote(names, t),
            quote(names, f),
        )),
        Val::NaturalLit(n) => Rc::new(Expr::NaturalLit(n.clone())),
        Val::NaturalPlus(l, r) => {
            Rc::new(Expr::NaturalPlus(quote(names, l), quote(names, r)))
        }
        Val::NaturalTimes(l, r) => {
            Rc::new(Expr::NaturalTimes(quote(names, l), quote(names, r)))
        }
        Val::IntegerLit(n) => Rc::new(Expr::IntegerLit(n.clone())),
        Val::DoubleLit(d) => Rc::new(Expr::DoubleLit(*d)),
        Val::TextLit(chunks) => Rc::new(Expr::TextLit(Chunks {
            interpolations: chunks
                .interpolations
                .iter()
                .map(|(s, v)| (s.clone(), quote(names, v)))
                .collect(),
            suffix: chunks.suffix.clone(),
        })),
        Val::ListLit(t, xs) => Rc::new(Expr::ListLit(
            t.as_ref().map(|t| quote(names, t)),
            xs.iter().map(|x| quote(names, x)).collect(),
        )),
        Val::ListAppend(l, r) => Rc::new(Expr::ListAppend(quote(names, l), quote(names, r))),
        Val::Some(a) => Rc::new(Expr::Some(quote(names, a))),
        Val::Record(m) => Rc::new(Expr::Record(
            m.iter().map(|(k, t)| (k.clone(), quote(names, t))).collect(),
        )),
        Val::RecordLit(m) => Rc::new(Expr::RecordLit(
            m.iter().map(|(k, v)| (k.clone(), quote(names, v))).collect(),
        )),
        Val::Union(m) => Rc::new(Expr::Union(quote_union(names, m))),
        Val::Combine(l, r) => Rc::new(Expr::Combine(quote(names, l), quote(names, r))),
        Val::CombineTypes(l, r) => {
            Rc::new(Expr::CombineTypes(quote(names, l), quote(names, r)))
        }
        Val::Prefer(l, r) => Rc::new(Expr::Prefer(quote(names, l), quote(names, r))),
        Val::Inject(m, k, payload) => {
            let union = Rc::new(Expr::Union(quote_union(names, m)));
            let ctor = Rc::new(Expr::Field(union, k.clone()));
            match payload {
                Option::None => ctor,
                Option::Some(a) => Rc::new(Expr::App(ctor, quote(names, a))),
            }
        }
        Val::Merge(l, r, annot) => Rc::new(Expr::Merge(
            quote(names, l),
            quote(names, r),
            annot.as_ref().map(|t| quote(names, t)),
        )),
        Val::ToMap(t, annot) => Rc::new(Expr::ToMap(
            quote(names, t),
            annot.as_ref().map(|t| quote(names, t)),
        )),
        Val::Field(t, k) => Rc::new(Expr::Field(quote(names, t), k.clone())),
        Val::Project(t, ValProjection::Labels(ks)) => Rc::new(Expr::Project(
            quote(names, t),
            Projection::Labels(ks.iter().cloned().collect()),
        )),
        Val::Project(t, ValProjection::Type(ty)) => Rc::new(Expr::Project(
            quote(names, t),
            Projection::Type(quote(names, ty)),
        )),
        Val::With(t, path, v) => Rc::new(Expr::With(
            quote(names, t),
            path.clone(),
            quote(names, v),
        )),
        Val::Assert(t) => Rc::new(Expr::Assert(quote(names, t))),
        Val::Equivalent(l, r) => {
            Rc::new(Expr::Equivalent(quote(names, l), quote(names, r)))
        }
        Val::Embed(i) => Rc::new(Expr::Embed(i.clone())),
    }
}

fn quote_union(
    names: &Names,
    m: &BTreeMap<String, Option<Val>>,
) -> Vec<(String, Option<Rc<Expr>>)> {
    m.iter()
        .map(|(k, t)| (k.clone(), t.as_ref().map(|t| quote(names, t))))
        .collect()
}

/// Normalize an expression: strip notes, evaluate in the empty
/// environment, and quote back. The result is beta-normal and carries
/// no notes.
pub fn normalize(e: &Expr) -> Rc<Expr> {
    renote(quote(&Names::new(), &eval(&Env::new(), &e.denote())))
}

/// Decide judgmental equality of two expressions without rebuilding
/// their normal forms.
pub fn judgmentally_equal(l: &Expr, r: &Expr) -> bool {
    let env = Env::new();
    let lv = eval(&env, &l.denote());
    let rv = eval(&env, &r.denote());
    conv(&env, &lv, &rv)
}
