use std::fmt;
use std::rc::Rc;

use num_bigint::{BigInt, BigUint};

use crate::internal_error;

/// Universe constants: `Type : Kind : Sort`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Const {
    Type,
    Kind,
    Sort,
}

impl Const {
    pub fn name(self) -> &'static str {
        match self {
            Const::Type => "Type",
            Const::Kind => "Kind",
            Const::Sort => "Sort",
        }
    }

    pub fn from_name(name: &str) -> Option<Const> {
        match name {
            "Type" => Some(Const::Type),
            "Kind" => Some(Const::Kind),
            "Sort" => Some(Const::Sort),
            _ => None,
        }
    }
}

impl fmt::Display for Const {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A variable reference: source name plus a count-based de Bruijn index.
/// The index counts only enclosing binders of the same name, innermost
/// first; an index past the outermost same-named binder is a free
/// variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Var {
    pub name: String,
    pub index: usize,
}

impl Var {
    pub fn new(name: &str, index: usize) -> Var {
        Var {
            name: name.to_owned(),
            index,
        }
    }
}

/// The builtin surface recognized by the kernel. `name`/`from_name` are
/// the seam the parser programs against; `arity` is the argument count
/// at which the evaluator attempts reduction (`None` for type formers
/// and `None` itself, which never reduce).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Bool,
    Natural,
    Integer,
    Double,
    Text,
    List,
    Optional,
    OptionalNone,
    NaturalFold,
    NaturalBuild,
    NaturalIsZero,
    NaturalEven,
    NaturalOdd,
    NaturalToInteger,
    NaturalShow,
    NaturalSubtract,
    IntegerShow,
    IntegerToDouble,
    DoubleShow,
    TextShow,
    ListBuild,
    ListFold,
    ListLength,
    ListHead,
    ListLast,
    ListIndexed,
    ListReverse,
    OptionalFold,
    OptionalBuild,
}

impl Builtin {
    pub fn name(self) -> &'static str {
        match self {
            Builtin::Bool => "Bool",
            Builtin::Natural => "Natural",
            Builtin::Integer => "Integer",
            Builtin::Double => "Double",
            Builtin::Text => "Text",
            Builtin::List => "List",
            Builtin::Optional => "Optional",
            Builtin::OptionalNone => "None",
            Builtin::NaturalFold => "Natural/fold",
            Builtin::NaturalBuild => "Natural/build",
            Builtin::NaturalIsZero => "Natural/isZero",
            Builtin::NaturalEven => "Natural/even",
            Builtin::NaturalOdd => "Natural/odd",
            Builtin::NaturalToInteger => "Natural/toInteger",
            Builtin::NaturalShow => "Natural/show",
            Builtin::NaturalSubtract => "Natural/subtract",
            Builtin::IntegerShow => "Integer/show",
            Builtin::IntegerToDouble => "Integer/toDouble",
            Builtin::DoubleShow => "Double/show",
            Builtin::TextShow => "Text/show",
            Builtin::ListBuild => "List/build",
            Builtin::ListFold => "List/fold",
            Builtin::ListLength => "List/length",
            Builtin::ListHead => "List/head",
            Builtin::ListLast => "List/last",
            Builtin::ListIndexed => "List/indexed",
            Builtin::ListReverse => "List/reverse",
            Builtin::OptionalFold => "Optional/fold",
            Builtin::OptionalBuild => "Optional/build",
        }
    }

    pub fn from_name(name: &str) -> Option<Builtin> {
        let b = match name {
            "Bool" => Builtin::Bool,
            "Natural" => Builtin::Natural,
            "Integer" => Builtin::Integer,
            "Double" => Builtin::Double,
            "Text" => Builtin::Text,
            "List" => Builtin::List,
            "Optional" => Builtin::Optional,
            "None" => Builtin::OptionalNone,
            "Natural/fold" => Builtin::NaturalFold,
            "Natural/build" => Builtin::NaturalBuild,
            "Natural/isZero" => Builtin::NaturalIsZero,
            "Natural/even" => Builtin::NaturalEven,
            "Natural/odd" => Builtin::NaturalOdd,
            "Natural/toInteger" => Builtin::NaturalToInteger,
            "Natural/show" => Builtin::NaturalShow,
            "Natural/subtract" => Builtin::NaturalSubtract,
            "Integer/show" => Builtin::IntegerShow,
            "Integer/toDouble" => Builtin::IntegerToDouble,
            "Double/show" => Builtin::DoubleShow,
            "Text/show" => Builtin::TextShow,
            "List/build" => Builtin::ListBuild,
            "List/fold" => Builtin::ListFold,
            "List/length" => Builtin::ListLength,
            "List/head" => Builtin::ListHead,
            "List/last" => Builtin::ListLast,
            "List/indexed" => Builtin::ListIndexed,
            "List/reverse" => Builtin::ListReverse,
            "Optional/fold" => Builtin::OptionalFold,
            "Optional/build" => Builtin::OptionalBuild,
            _ => return None,
        };
        Some(b)
    }

    pub fn arity(self) -> Option<usize> {
        match self {
            Builtin::Bool
            | Builtin::Natural
            | Builtin::Integer
            | Builtin::Double
            | Builtin::Text
            | Builtin::List
            | Builtin::Optional
            | Builtin::OptionalNone => None,
            Builtin::NaturalFold => Some(4),
            Builtin::NaturalBuild => Some(1),
            Builtin::NaturalIsZero => Some(1),
            Builtin::NaturalEven => Some(1),
            Builtin::NaturalOdd => Some(1),
            Builtin::NaturalToInteger => Some(1),
            Builtin::NaturalShow => Some(1),
            Builtin::NaturalSubtract => Some(2),
            Builtin::IntegerShow => Some(1),
            Builtin::IntegerToDouble => Some(1),
            Builtin::DoubleShow => Some(1),
            Builtin::TextShow => Some(1),
            Builtin::ListBuild => Some(2),
            Builtin::ListFold => Some(5),
            Builtin::ListLength => Some(2),
            Builtin::ListHead => Some(2),
            Builtin::ListLast => Some(2),
            Builtin::ListIndexed => Some(2),
            Builtin::ListReverse => Some(2),
            Builtin::OptionalFold => Some(5),
            Builtin::OptionalBuild => Some(2),
        }
    }
}

impl fmt::Display for Builtin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A `Double` literal. Equality is bitwise so that NaN equals itself
/// under definitional equality.
#[derive(Debug, Clone, Copy)]
pub struct RawDouble(pub f64);

impl PartialEq for RawDouble {
    fn eq(&self, other: &RawDouble) -> bool {
        self.0.to_bits() == other.0.to_bits()
    }
}

impl Eq for RawDouble {}

impl From<f64> for RawDouble {
    fn from(d: f64) -> RawDouble {
        RawDouble(d)
    }
}

/// A text literal: interleaved (literal prefix, interpolated expression)
/// segments followed by a trailing literal suffix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunks {
    pub interpolations: Vec<(String, Rc<Expr>)>,
    pub suffix: String,
}

impl Chunks {
    pub fn plain(s: impl Into<String>) -> Chunks {
        Chunks {
            interpolations: Vec::new(),
            suffix: s.into(),
        }
    }
}

/// Source span recorded by the parser. Transparent to evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

/// Opaque payload of an unresolved import. Owned by the import layer;
/// the kernel only carries it through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Import {
    pub target: String,
}

/// A record projection target: an explicit label set, or a record type
/// whose labels are projected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Projection {
    Labels(Vec<String>),
    Type(Rc<Expr>),
}

/// Abstract syntax. The parser produces this; the type checker validates
/// it; the evaluator consumes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Const(Const),
    Var(Var),
    /// `λ(x : A) → b`
    Lam(String, Rc<Expr>, Rc<Expr>),
    /// `∀(x : A) → B`
    Pi(String, Rc<Expr>, Rc<Expr>),
    App(Rc<Expr>, Rc<Expr>),
    /// `let x : A = a in b` (the annotation is optional)
    Let(String, Option<Rc<Expr>>, Rc<Expr>, Rc<Expr>),
    /// `t : A`
    Annot(Rc<Expr>, Rc<Expr>),
    Builtin(Builtin),
    BoolLit(bool),
    BoolAnd(Rc<Expr>, Rc<Expr>),
    BoolOr(Rc<Expr>, Rc<Expr>),
    BoolEq(Rc<Expr>, Rc<Expr>),
    BoolNe(Rc<Expr>, Rc<Expr>),
    BoolIf(Rc<Expr>, Rc<Expr>, Rc<Expr>),
    NaturalLit(BigUint),
    NaturalPlus(Rc<Expr>, Rc<Expr>),
    NaturalTimes(Rc<Expr>, Rc<Expr>),
    IntegerLit(BigInt),
    DoubleLit(RawDouble),
    TextLit(Chunks),
    TextAppend(Rc<Expr>, Rc<Expr>),
    /// The annotation is the full list type, present only on empty
    /// literals.
    ListLit(Option<Rc<Expr>>, Vec<Rc<Expr>>),
    ListAppend(Rc<Expr>, Rc<Expr>),
    Some(Rc<Expr>),
    /// Record type `{ k : T, … }`, in source order.
    Record(Vec<(String, Rc<Expr>)>),
    /// Record literal `{ k = v, … }`, in source order.
    RecordLit(Vec<(String, Rc<Expr>)>),
    /// Union type `< k : T | k2 >`, in source order.
    Union(Vec<(String, Option<Rc<Expr>>)>),
    /// `l ∧ r`
    Combine(Rc<Expr>, Rc<Expr>),
    /// `l ⩓ r`
    CombineTypes(Rc<Expr>, Rc<Expr>),
    /// `l ⫽ r`
    Prefer(Rc<Expr>, Rc<Expr>),
    /// `t :: u`, sugar for `(t.default ⫽ u) : t.Type`
    RecordCompletion(Rc<Expr>, Rc<Expr>),
    Merge(Rc<Expr>, Rc<Expr>, Option<Rc<Expr>>),
    ToMap(Rc<Expr>, Option<Rc<Expr>>),
    Field(Rc<Expr>, String),
    Project(Rc<Expr>, Projection),
    /// `t with k1.….kn = v`
    With(Rc<Expr>, Vec<String>, Rc<Expr>),
    Assert(Rc<Expr>),
    /// `l ≡ r`
    Equivalent(Rc<Expr>, Rc<Expr>),
    /// Source-span wrapper; semantically transparent.
    Note(Span, Rc<Expr>),
    /// Evaluation selects the left arm; the right arm is the fallback
    /// consumed by the import layer.
    ImportAlt(Rc<Expr>, Rc<Expr>),
    Embed(Import),
}

// Helper constructors for hand-built terms.
impl Expr {
    pub fn var(name: &str, index: usize) -> Rc<Expr> {
        Rc::new(Expr::Var(Var::new(name, index)))
    }

    pub fn v(name: &str) -> Rc<Expr> {
        Expr::var(name, 0)
    }

    pub fn lam(name: &str, domain: Rc<Expr>, body: Rc<Expr>) -> Rc<Expr> {
        Rc::new(Expr::Lam(name.to_owned(), domain, body))
    }

    pub fn pi(name: &str, domain: Rc<Expr>, body: Rc<Expr>) -> Rc<Expr> {
        Rc::new(Expr::Pi(name.to_owned(), domain, body))
    }

    pub fn app(f: Rc<Expr>, a: Rc<Expr>) -> Rc<Expr> {
        Rc::new(Expr::App(f, a))
    }

    pub fn apps(f: Rc<Expr>, args: impl IntoIterator<Item = Rc<Expr>>) -> Rc<Expr> {
        args.into_iter().fold(f, Expr::app)
    }

    pub fn let_(name: &str, value: Rc<Expr>, body: Rc<Expr>) -> Rc<Expr> {
        Rc::new(Expr::Let(name.to_owned(), None, value, body))
    }

    pub fn builtin(b: Builtin) -> Rc<Expr> {
        Rc::new(Expr::Builtin(b))
    }

    pub fn boolean(b: bool) -> Rc<Expr> {
        Rc::new(Expr::BoolLit(b))
    }

    pub fn natural(n: u64) -> Rc<Expr> {
        Rc::new(Expr::NaturalLit(BigUint::from(n)))
    }

    pub fn integer(n: i64) -> Rc<Expr> {
        Rc::new(Expr::IntegerLit(BigInt::from(n)))
    }

    pub fn double(d: f64) -> Rc<Expr> {
        Rc::new(Expr::DoubleLit(RawDouble(d)))
    }

    pub fn text(s: &str) -> Rc<Expr> {
        Rc::new(Expr::TextLit(Chunks::plain(s)))
    }

    pub fn list(elems: Vec<Rc<Expr>>) -> Rc<Expr> {
        Rc::new(Expr::ListLit(None, elems))
    }

    pub fn empty_list(list_type: Rc<Expr>) -> Rc<Expr> {
        Rc::new(Expr::ListLit(Some(list_type), Vec::new()))
    }

    pub fn some(e: Rc<Expr>) -> Rc<Expr> {
        Rc::new(Expr::Some(e))
    }

    pub fn record_type(fields: Vec<(&str, Rc<Expr>)>) -> Rc<Expr> {
        Rc::new(Expr::Record(
            fields.into_iter().map(|(k, t)| (k.to_owned(), t)).collect(),
        ))
    }

    pub fn record_lit(fields: Vec<(&str, Rc<Expr>)>) -> Rc<Expr> {
        Rc::new(Expr::RecordLit(
            fields.into_iter().map(|(k, v)| (k.to_owned(), v)).collect(),
        ))
    }

    pub fn union_type(alts: Vec<(&str, Option<Rc<Expr>>)>) -> Rc<Expr> {
        Rc::new(Expr::Union(
            alts.into_iter().map(|(k, t)| (k.to_owned(), t)).collect(),
        ))
    }

    pub fn field(e: Rc<Expr>, k: &str) -> Rc<Expr> {
        Rc::new(Expr::Field(e, k.to_owned()))
    }

    pub fn project(e: Rc<Expr>, labels: Vec<&str>) -> Rc<Expr> {
        Rc::new(Expr::Project(
            e,
            Projection::Labels(labels.into_iter().map(str::to_owned).collect()),
        ))
    }
}

impl Expr {
    /// Recursively strip all `Note` wrappers.
    pub fn denote(&self) -> Rc<Expr> {
        match self {
            Expr::Note(_, e) => e.denote(),
            Expr::Const(c) => Rc::new(Expr::Const(*c)),
            Expr::Var(v) => Rc::new(Expr::Var(v.clone())),
            Expr::Lam(x, a, b) => Rc::new(Expr::Lam(x.clone(), a.denote(), b.denote())),
            Expr::Pi(x, a, b) => Rc::new(Expr::Pi(x.clone(), a.denote(), b.denote())),
            Expr::App(f, a) => Rc::new(Expr::App(f.denote(), a.denote())),
            Expr::Let(x, t, a, b) => Rc::new(Expr::Let(
                x.clone(),
                t.as_ref().map(|t| t.denote()),
                a.denote(),
                b.denote(),
            )),
            Expr::Annot(t, a) => Rc::new(Expr::Annot(t.denote(), a.denote())),
            Expr::Builtin(b) => Rc::new(Expr::Builtin(*b)),
            Expr::BoolLit(b) => Rc::new(Expr::BoolLit(*b)),
            Expr::BoolAnd(l, r) => Rc::new(Expr::BoolAnd(l.denote(), r.denote())),
            Expr::BoolOr(l, r) => Rc::new(Expr::BoolOr(l.denote(), r.denote())),
            Expr::BoolEq(l, r) => Rc::new(Expr::BoolEq(l.denote(), r.denote())),
            Expr::BoolNe(l, r) => Rc::new(Expr::BoolNe(l.denote(), r.denote())),
            Expr::BoolIf(c, t, f) => Rc::new(Expr::BoolIf(c.denote(), t.denote(), f.denote())),
            Expr::NaturalLit(n) => Rc::new(Expr::NaturalLit(n.clone())),
            Expr::NaturalPlus(l, r) => Rc::new(Expr::NaturalPlus(l.denote(), r.denote())),
            Expr::NaturalTimes(l, r) => Rc::new(Expr::NaturalTimes(l.denote(), r.denote())),
            Expr::IntegerLit(n) => Rc::new(Expr::IntegerLit(n.clone())),
            Expr::DoubleLit(d) => Rc::new(Expr::DoubleLit(*d)),
            Expr::TextLit(chunks) => Rc::new(Expr::TextLit(Chunks {
                interpolations: chunks
                    .interpolations
                    .iter()
                    .map(|(s, e)| (s.clone(), e.denote()))
                    .collect(),
                suffix: chunks.suffix.clone(),
            })),
            Expr::TextAppend(l, r) => Rc::new(Expr::TextAppend(l.denote(), r.denote())),
            Expr::ListLit(t, xs) => Rc::new(Expr::ListLit(
                t.as_ref().map(|t| t.denote()),
                xs.iter().map(|x| x.denote()).collect(),
            )),
            Expr::ListAppend(l, r) => Rc::new(Expr::ListAppend(l.denote(), r.denote())),
            Expr::Some(e) => Rc::new(Expr::Some(e.denote())),
            Expr::Record(kts) => Rc::new(Expr::Record(
                kts.iter().map(|(k, t)| (k.clone(), t.denote())).collect(),
            )),
            Expr::RecordLit(kvs) => Rc::new(Expr::RecordLit(
                kvs.iter().map(|(k, v)| (k.clone(), v.denote())).collect(),
            )),
            Expr::Union(kts) => Rc::new(Expr::Union(
                kts.iter()
                    .map(|(k, t)| (k.clone(), t.as_ref().map(|t| t.denote())))
                    .collect(),
            )),
            Expr::Combine(l, r) => Rc::new(Expr::Combine(l.denote(), r.denote())),
            Expr::CombineTypes(l, r) => Rc::new(Expr::CombineTypes(l.denote(), r.denote())),
            Expr::Prefer(l, r) => Rc::new(Expr::Prefer(l.denote(), r.denote())),
            Expr::RecordCompletion(l, r) => {
                Rc::new(Expr::RecordCompletion(l.denote(), r.denote()))
            }
            Expr::Merge(l, r, t) => Rc::new(Expr::Merge(
                l.denote(),
                r.denote(),
                t.as_ref().map(|t| t.denote()),
            )),
            Expr::ToMap(e, t) => Rc::new(Expr::ToMap(e.denote(), t.as_ref().map(|t| t.denote()))),
            Expr::Field(e, k) => Rc::new(Expr::Field(e.denote(), k.clone())),
            Expr::Project(e, Projection::Labels(ks)) => {
                Rc::new(Expr::Project(e.denote(), Projection::Labels(ks.clone())))
            }
            Expr::Project(e, Projection::Type(t)) => {
                Rc::new(Expr::Project(e.denote(), Projection::Type(t.denote())))
            }
            Expr::With(e, path, v) => Rc::new(Expr::With(e.denote(), path.clone(), v.denote())),
            Expr::Assert(e) => Rc::new(Expr::Assert(e.denote())),
            Expr::Equivalent(l, r) => Rc::new(Expr::Equivalent(l.denote(), r.denote())),
            Expr::ImportAlt(l, r) => Rc::new(Expr::ImportAlt(l.denote(), r.denote())),
            Expr::Embed(i) => Rc::new(Expr::Embed(i.clone())),
        }
    }

    /// Peel only the outermost `Note` wrappers.
    pub fn shallow_denote(&self) -> &Expr {
        let mut e = self;
        while let Expr::Note(_, inner) = e {
            e = inner;
        }
        e
    }
}

/// Re-source-annotation seam: the payload of a note-free expression is
/// returned unchanged, ready for a caller to attach fresh spans.
pub fn renote(e: Rc<Expr>) -> Rc<Expr> {
    e
}

impl Expr {
    /// Shift the indices of free occurrences of `name` by `d`, ignoring
    /// occurrences with index below `cutoff`. The cutoff tracks how many
    /// same-named binders have been crossed.
    pub fn shift(&self, d: isize, name: &str, cutoff: usize) -> Rc<Expr> {
        match self {
            Expr::Var(v) => {
                if v.name == name && v.index >= cutoff {
                    let shifted = usize::try_from(v.index as isize + d).unwrap_or_else(|_| {
                        internal_error("variable index went negative during shift")
                    });
                    Expr::var(&v.name, shifted)
                } else {
                    Rc::new(Expr::Var(v.clone()))
                }
            }
            Expr::Lam(x, a, b) => Rc::new(Expr::Lam(
                x.clone(),
                a.shift(d, name, cutoff),
                b.shift(d, name, cutoff + usize::from(x.as_str() == name)),
            )),
            Expr::Pi(x, a, b) => Rc::new(Expr::Pi(
                x.clone(),
                a.shift(d, name, cutoff),
                b.shift(d, name, cutoff + usize::from(x.as_str() == name)),
            )),
            Expr::Let(x, t, a, b) => Rc::new(Expr::Let(
                x.clone(),
                t.as_ref().map(|t| t.shift(d, name, cutoff)),
                a.shift(d, name, cutoff),
                b.shift(d, name, cutoff + usize::from(x.as_str() == name)),
            )),
            Expr::Const(c) => Rc::new(Expr::Const(*c)),
            Expr::App(f, a) => Rc::new(Expr::App(f.shift(d, name, cutoff), a.shift(d, name, cutoff))),
            Expr::Annot(t, a) => {
                Rc::new(Expr::Annot(t.shift(d, name, cutoff), a.shift(d, name, cutoff)))
            }
            Expr::Builtin(b) => Rc::new(Expr::Builtin(*b)),
            Expr::BoolLit(b) => Rc::new(Expr::BoolLit(*b)),
            Expr::BoolAnd(l, r) => {
                Rc::new(Expr::BoolAnd(l.shift(d, name, cutoff), r.shift(d, name, cutoff)))
            }
            Expr::BoolOr(l, r) => {
                Rc::new(Expr::BoolOr(l.shift(d, name, cutoff), r.shift(d, name, cutoff)))
            }
            Expr::BoolEq(l, r) => {
                Rc::new(Expr::BoolEq(l.shift(d, name, cutoff), r.shift(d, name, cutoff)))
            }
            Expr::BoolNe(l, r) => {
                Rc::new(Expr::BoolNe(l.shift(d, name, cutoff), r.shift(d, name, cutoff)))
            }
            Expr::BoolIf(c, t, f) => Rc::new(Expr::BoolIf(
                c.shift(d, name, cutoff),
                t.shift(d, name, cutoff),
                f.shift(d, name, cutoff),
            )),
            Expr::NaturalLit(n) => Rc::new(Expr::NaturalLit(n.clone())),
            Expr::NaturalPlus(l, r) => Rc::new(Expr::NaturalPlus(
                l.shift(d, name, cutoff),
                r.shift(d, name, cutoff),
            )),
            Expr::NaturalTimes(l, r) => Rc::new(Expr::NaturalTimes(
                l.shift(d, name, cutoff),
                r.shift(d, name, cutoff),
            )),
            Expr::IntegerLit(n) => Rc::new(Expr::IntegerLit(n.clone())),
            Expr::DoubleLit(x) => Rc::new(Expr::DoubleLit(*x)),
            Expr::TextLit(chunks) => Rc::new(Expr::TextLit(Chunks {
                interpolations: chunks
                    .interpolations
                    .iter()
                    .map(|(s, e)| (s.clone(), e.shift(d, name, cutoff)))
                    .collect(),
                suffix: chunks.suffix.clone(),
            })),
            Expr::TextAppend(l, r) => Rc::new(Expr::TextAppend(
                l.shift(d, name, cutoff),
                r.shift(d, name, cutoff),
            )),
            Expr::ListLit(t, xs) => Rc::new(Expr::ListLit(
                t.as_ref().map(|t| t.shift(d, name, cutoff)),
                xs.iter().map(|x| x.shift(d, name, cutoff)).collect(),
            )),
            Expr::ListAppend(l, r) => Rc::new(Expr::ListAppend(
                l.shift(d, name, cutoff),
                r.shift(d, name, cutoff),
            )),
            Expr::Some(e) => Rc::new(Expr::Some(e.shift(d, name, cutoff))),
            Expr::Record(kts) => Rc::new(Expr::Record(
                kts.iter()
                    .map(|(k, t)| (k.clone(), t.shift(d, name, cutoff)))
                    .collect(),
            )),
            Expr::RecordLit(kvs) => Rc::new(Expr::RecordLit(
                kvs.iter()
                    .map(|(k, v)| (k.clone(), v.shift(d, name, cutoff)))
                    .collect(),
            )),
            Expr::Union(kts) => Rc::new(Expr::Union(
                kts.iter()
                    .map(|(k, t)| (k.clone(), t.as_ref().map(|t| t.shift(d, name, cutoff))))
                    .collect(),
            )),
            Expr::Combine(l, r) => {
                Rc::new(Expr::Combine(l.shift(d, name, cutoff), r.shift(d, name, cutoff)))
            }
            Expr::CombineTypes(l, r) => Rc::new(Expr::CombineTypes(
                l.shift(d, name, cutoff),
                r.shift(d, name, cutoff),
            )),
            Expr::Prefer(l, r) => {
                Rc::new(Expr::Prefer(l.shift(d, name, cutoff), r.shift(d, name, cutoff)))
            }
            Expr::RecordCompletion(l, r) => Rc::new(Expr::RecordCompletion(
                l.shift(d, name, cutoff),
                r.shift(d, name, cutoff),
            )),
            Expr::Merge(l, r, t) => Rc::new(Expr::Merge(
                l.shift(d, name, cutoff),
                r.shift(d, name, cutoff),
                t.as_ref().map(|t| t.shift(d, name, cutoff)),
            )),
            Expr::ToMap(e, t) => Rc::new(Expr::ToMap(
                e.shift(d, name, cutoff),
                t.as_ref().map(|t| t.shift(d, name, cutoff)),
            )),
            Expr::Field(e, k) => Rc::new(Expr::Field(e.shift(d, name, cutoff), k.clone())),
            Expr::Project(e, Projection::Labels(ks)) => Rc::new(Expr::Project(
                e.shift(d, name, cutoff),
                Projection::Labels(ks.clone()),
            )),
            Expr::Project(e, Projection::Type(t)) => Rc::new(Expr::Project(
                e.shift(d, name, cutoff),
                Projection::Type(t.shift(d, name, cutoff)),
            )),
            Expr::With(e, path, v) => Rc::new(Expr::With(
                e.shift(d, name, cutoff),
                path.clone(),
                v.shift(d, name, cutoff),
            )),
            Expr::Assert(e) => Rc::new(Expr::Assert(e.shift(d, name, cutoff))),
            Expr::Equivalent(l, r) => Rc::new(Expr::Equivalent(
                l.shift(d, name, cutoff),
                r.shift(d, name, cutoff),
            )),
            Expr::Note(span, e) => Rc::new(Expr::Note(*span, e.shift(d, name, cutoff))),
            Expr::ImportAlt(l, r) => Rc::new(Expr::ImportAlt(
                l.shift(d, name, cutoff),
                r.shift(d, name, cutoff),
            )),
            Expr::Embed(i) => Rc::new(Expr::Embed(i.clone())),
        }
    }

    /// Substitute `value` for the variable `name@index`. The substituted
    /// term is shifted when crossing binders so that its own free
    /// variables cannot be captured.
    pub fn subst(&self, name: &str, index: usize, value: &Rc<Expr>) -> Rc<Expr> {
        match self {
            Expr::Var(v) => {
                if v.name == name && v.index == index {
                    value.clone()
                } else {
                    Rc::new(Expr::Var(v.clone()))
                }
            }
            Expr::Lam(x, a, b) => {
                let inner = value.shift(1, x, 0);
                Rc::new(Expr::Lam(
                    x.clone(),
                    a.subst(name, index, value),
                    b.subst(name, index + usize::from(x.as_str() == name), &inner),
                ))
            }
            Expr::Pi(x, a, b) => {
                let inner = value.shift(1, x, 0);
                Rc::new(Expr::Pi(
                    x.clone(),
                    a.subst(name, index, value),
                    b.subst(name, index + usize::from(x.as_str() == name), &inner),
                ))
            }
            Expr::Let(x, t, a, b) => {
                let inner = value.shift(1, x, 0);
                Rc::new(Expr::Let(
                    x.clone(),
                    t.as_ref().map(|t| t.subst(name, index, value)),
                    a.subst(name, index, value),
                    b.subst(name, index + usize::from(x.as_str() == name), &inner),
                ))
            }
            Expr::Const(c) => Rc::new(Expr::Const(*c)),
            Expr::App(f, a) => Rc::new(Expr::App(
                f.subst(name, index, value),
                a.subst(name, index, value),
            )),
            Expr::Annot(t, a) => Rc::new(Expr::Annot(
                t.subst(name, index, value),
                a.subst(name, index, value),
            )),
            Expr::Builtin(b) => Rc::new(Expr::Builtin(*b)),
            Expr::BoolLit(b) => Rc::new(Expr::BoolLit(*b)),
            Expr::BoolAnd(l, r) => Rc::new(Expr::BoolAnd(
                l.subst(name, index, value),
                r.subst(name, index, value),
            )),
            Expr::BoolOr(l, r) => Rc::new(Expr::BoolOr(
                l.subst(name, index, value),
                r.subst(name, index, value),
            )),
            Expr::BoolEq(l, r) => Rc::new(Expr::BoolEq(
                l.subst(name, index, value),
                r.subst(name, index, value),
            )),
            Expr::BoolNe(l, r) => Rc::new(Expr::BoolNe(
                l.subst(name, index, value),
                r.subst(name, index, value),
            )),
            Expr::BoolIf(c, t, f) => Rc::new(Expr::BoolIf(
                c.subst(name, index, value),
                t.subst(name, index, value),
                f.subst(name, index, value),
            )),
            Expr::NaturalLit(n) => Rc::new(Expr::NaturalLit(n.clone())),
            Expr::NaturalPlus(l, r) => Rc::new(Expr::NaturalPlus(
                l.subst(name, index, value),
                r.subst(name, index, value),
            )),
            Expr::NaturalTimes(l, r) => Rc::new(Expr::NaturalTimes(
                l.subst(name, index, value),
                r.subst(name, index, value),
            )),
            Expr::IntegerLit(n) => Rc::new(Expr::IntegerLit(n.clone())),
            Expr::DoubleLit(x) => Rc::new(Expr::DoubleLit(*x)),
            Expr::TextLit(chunks) => Rc::new(Expr::TextLit(Chunks {
                interpolations: chunks
                    .interpolations
                    .iter()
                    .map(|(s, e)| (s.clone(), e.subst(name, index, value)))
                    .collect(),
                suffix: chunks.suffix.clone(),
            })),
            Expr::TextAppend(l, r) => Rc::new(Expr::TextAppend(
                l.subst(name, index, value),
                r.subst(name, index, value),
            )),
            Expr::ListLit(t, xs) => Rc::new(Expr::ListLit(
                t.as_ref().map(|t| t.subst(name, index, value)),
                xs.iter().map(|x| x.subst(name, index, value)).collect(),
            )),
            Expr::ListAppend(l, r) => Rc::new(Expr::ListAppend(
                l.subst(name, index, value),
                r.subst(name, index, value),
            )),
            Expr::Some(e) => Rc::new(Expr::Some(e.subst(name, index, value))),
            Expr::Record(kts) => Rc::new(Expr::Record(
                kts.iter()
                    .map(|(k, t)| (k.clone(), t.subst(name, index, value)))
                    .collect(),
            )),
            Expr::RecordLit(kvs) => Rc::new(Expr::RecordLit(
                kvs.iter()
                    .map(|(k, v)| (k.clone(), v.subst(name, index, value)))
                    .collect(),
            )),
            Expr::Union(kts) => Rc::new(Expr::Union(
                kts.iter()
                    .map(|(k, t)| (k.clone(), t.as_ref().map(|t| t.subst(name, index, value))))
                    .collect(),
            )),
            Expr::Combine(l, r) => Rc::new(Expr::Combine(
                l.subst(name, index, value),
                r.subst(name, index, value),
            )),
            Expr::CombineTypes(l, r) => Rc::new(Expr::CombineTypes(
                l.subst(name, index, value),
                r.subst(name, index, value),
            )),
            Expr::Prefer(l, r) => Rc::new(Expr::Prefer(
                l.subst(name, index, value),
                r.subst(name, index, value),
            )),
            Expr::RecordCompletion(l, r) => Rc::new(Expr::RecordCompletion(
                l.subst(name, index, value),
                r.subst(name, index, value),
            )),
            Expr::Merge(l, r, t) => Rc::new(Expr::Merge(
                l.subst(name, index, value),
                r.subst(name, index, value),
                t.as_ref().map(|t| t.subst(name, index, value)),
            )),
            Expr::ToMap(e, t) => Rc::new(Expr::ToMap(
                e.subst(name, index, value),
                t.as_ref().map(|t| t.subst(name, index, value)),
            )),
            Expr::Field(e, k) => Rc::new(Expr::Field(e.subst(name, index, value), k.clone())),
            Expr::Project(e, Projection::Labels(ks)) => Rc::new(Expr::Project(
                e.subst(name, index, value),
                Projection::Labels(ks.clone()),
            )),
            Expr::Project(e, Projection::Type(t)) => Rc::new(Expr::Project(
                e.subst(name, index, value),
                Projection::Type(t.subst(name, index, value)),
            )),
            Expr::With(e, path, v) => Rc::new(Expr::With(
                e.subst(name, index, value),
                path.clone(),
                v.subst(name, index, value),
            )),
            Expr::Assert(e) => Rc::new(Expr::Assert(e.subst(name, index, value))),
            Expr::Equivalent(l, r) => Rc::new(Expr::Equivalent(
                l.subst(name, index, value),
                r.subst(name, index, value),
            )),
            Expr::Note(span, e) => Rc::new(Expr::Note(*span, e.subst(name, index, value))),
            Expr::ImportAlt(l, r) => Rc::new(Expr::ImportAlt(
                l.subst(name, index, value),
                r.subst(name, index, value),
            )),
            Expr::Embed(i) => Rc::new(Expr::Embed(i.clone())),
        }
    }

    /// Rename every binder to `_`, re-pointing variable references so
    /// that alpha-equivalent expressions become syntactically identical.
    pub fn alpha_normalize(&self) -> Rc<Expr> {
        match self {
            Expr::Lam(x, a, b) => Rc::new(Expr::Lam(
                "_".to_owned(),
                a.alpha_normalize(),
                alpha_body(x, b),
            )),
            Expr::Pi(x, a, b) => Rc::new(Expr::Pi(
                "_".to_owned(),
                a.alpha_normalize(),
                alpha_body(x, b),
            )),
            Expr::Let(x, t, a, b) => Rc::new(Expr::Let(
                "_".to_owned(),
                t.as_ref().map(|t| t.alpha_normalize()),
                a.alpha_normalize(),
                alpha_body(x, b),
            )),
            Expr::Const(c) => Rc::new(Expr::Const(*c)),
            Expr::Var(v) => Rc::new(Expr::Var(v.clone())),
            Expr::App(f, a) => Rc::new(Expr::App(f.alpha_normalize(), a.alpha_normalize())),
            Expr::Annot(t, a) => Rc::new(Expr::Annot(t.alpha_normalize(), a.alpha_normalize())),
            Expr::Builtin(b) => Rc::new(Expr::Builtin(*b)),
            Expr::BoolLit(b) => Rc::new(Expr::BoolLit(*b)),
            Expr::BoolAnd(l, r) => {
                Rc::new(Expr::BoolAnd(l.alpha_normalize(), r.alpha_normalize()))
            }
            Expr::BoolOr(l, r) => Rc::new(Expr::BoolOr(l.alpha_normalize(), r.alpha_normalize())),
            Expr::BoolEq(l, r) => Rc::new(Expr::BoolEq(l.alpha_normalize(), r.alpha_normalize())),
            Expr::BoolNe(l, r) => Rc::new(Expr::BoolNe(l.alpha_normalize(), r.alpha_normalize())),
            Expr::BoolIf(c, t, f) => Rc::new(Expr::BoolIf(
                c.alpha_normalize(),
                t.alpha_normalize(),
                f.alpha_normalize(),
            )),
            Expr::NaturalLit(n) => Rc::new(Expr::NaturalLit(n.clone())),
            Expr::NaturalPlus(l, r) => Rc::new(Expr::NaturalPlus(
                l.alpha_normalize(),
                r.alpha_normalize(),
            )),
            Expr::NaturalTimes(l, r) => Rc::new(Expr::NaturalTimes(
                l.alpha_normalize(),
                r.alpha_normalize(),
            )),
            Expr::IntegerLit(n) => Rc::new(Expr::IntegerLit(n.clone())),
            Expr::DoubleLit(x) => Rc::new(Expr::DoubleLit(*x)),
            Expr::TextLit(chunks) => Rc::new(Expr::TextLit(Chunks {
                interpolations: chunks
                    .interpolations
                    .iter()
                    .map(|(s, e)| (s.clone(), e.alpha_normalize()))
                    .collect(),
                suffix: chunks.suffix.clone(),
            })),
            Expr::TextAppend(l, r) => Rc::new(Expr::TextAppend(
                l.alpha_normalize(),
                r.alpha_normalize(),
            )),
            Expr::ListLit(t, xs) => Rc::new(Expr::ListLit(
                t.as_ref().map(|t| t.alpha_normalize()),
                xs.iter().map(|x| x.alpha_normalize()).collect(),
            )),
            Expr::ListAppend(l, r) => Rc::new(Expr::ListAppend(
                l.alpha_normalize(),
                r.alpha_normalize(),
            )),
            Expr::Some(e) => Rc::new(Expr::Some(e.alpha_normalize())),
            Expr::Record(kts) => Rc::new(Expr::Record(
                kts.iter()
                    .map(|(k, t)| (k.clone(), t.alpha_normalize()))
                    .collect(),
            )),
            Expr::RecordLit(kvs) => Rc::new(Expr::RecordLit(
                kvs.iter()
                    .map(|(k, v)| (k.clone(), v.alpha_normalize()))
                    .collect(),
            )),
            Expr::Union(kts) => Rc::new(Expr::Union(
                kts.iter()
                    .map(|(k, t)| (k.clone(), t.as_ref().map(|t| t.alpha_normalize())))
                    .collect(),
            )),
            Expr::Combine(l, r) => {
                Rc::new(Expr::Combine(l.alpha_normalize(), r.alpha_normalize()))
            }
            Expr::CombineTypes(l, r) => Rc::new(Expr::CombineTypes(
                l.alpha_normalize(),
                r.alpha_normalize(),
            )),
            Expr::Prefer(l, r) => Rc::new(Expr::Prefer(l.alpha_normalize(), r.alpha_normalize())),
            Expr::RecordCompletion(l, r) => Rc::new(Expr::RecordCompletion(
                l.alpha_normalize(),
                r.alpha_normalize(),
            )),
            Expr::Merge(l, r, t) => Rc::new(Expr::Merge(
                l.alpha_normalize(),
                r.alpha_normalize(),
                t.as_ref().map(|t| t.alpha_normalize()),
            )),
            Expr::ToMap(e, t) => Rc::new(Expr::ToMap(
                e.alpha_normalize(),
                t.as_ref().map(|t| t.alpha_normalize()),
            )),
            Expr::Field(e, k) => Rc::new(Expr::Field(e.alpha_normalize(), k.clone())),
            Expr::Project(e, Projection::Labels(ks)) => Rc::new(Expr::Project(
                e.alpha_normalize(),
                Projection::Labels(ks.clone()),
            )),
            Expr::Project(e, Projection::Type(t)) => Rc::new(Expr::Project(
                e.alpha_normalize(),
                Projection::Type(t.alpha_normalize()),
            )),
            Expr::With(e, path, v) => Rc::new(Expr::With(
                e.alpha_normalize(),
                path.clone(),
                v.alpha_normalize(),
            )),
            Expr::Assert(e) => Rc::new(Expr::Assert(e.alpha_normalize())),
            Expr::Equivalent(l, r) => Rc::new(Expr::Equivalent(
                l.alpha_normalize(),
                r.alpha_normalize(),
            )),
            Expr::Note(span, e) => Rc::new(Expr::Note(*span, e.alpha_normalize())),
            Expr::ImportAlt(l, r) => Rc::new(Expr::ImportAlt(
                l.alpha_normalize(),
                r.alpha_normalize(),
            )),
            Expr::Embed(i) => Rc::new(Expr::Embed(i.clone())),
        }
    }
}

// Rename the bound variable `x` of `body` to `_`: make room for the new
// `_`, redirect `x@0` to it, then drop the now-unused `x` slot.
fn alpha_body(x: &str, body: &Rc<Expr>) -> Rc<Expr> {
    if x == "_" {
        return body.alpha_normalize();
    }
    body.shift(1, "_", 0)
        .subst(x, 0, &Expr::var("_", 0))
        .shift(-1, x, 0)
        .alpha_normalize()
}
