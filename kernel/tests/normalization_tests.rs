use std::rc::Rc;

use kernel::{normalize, Builtin, Expr};

fn nat_ty() -> Rc<Expr> {
    Expr::builtin(Builtin::Natural)
}

/// A small corpus of well-formed expressions exercising most heads.
fn corpus() -> Vec<Rc<Expr>> {
    vec![
        Expr::app(
            Expr::lam(
                "x",
                nat_ty(),
                Rc::new(Expr::NaturalPlus(Expr::v("x"), Expr::natural(1))),
            ),
            Expr::natural(2),
        ),
        Expr::lam("x", nat_ty(), Expr::v("x")),
        Expr::record_lit(vec![("b", Expr::natural(2)), ("a", Expr::natural(1))]),
        Rc::new(Expr::BoolIf(
            Expr::v("c"),
            Expr::boolean(true),
            Expr::boolean(false),
        )),
        Expr::apps(
            Expr::builtin(Builtin::ListFold),
            [
                nat_ty(),
                Expr::list(vec![Expr::natural(1), Expr::natural(2)]),
                nat_ty(),
                Expr::lam(
                    "x",
                    nat_ty(),
                    Expr::lam(
                        "acc",
                        nat_ty(),
                        Rc::new(Expr::NaturalPlus(Expr::v("x"), Expr::v("acc"))),
                    ),
                ),
                Expr::natural(0),
            ],
        ),
        Rc::new(Expr::TextLit(kernel::Chunks {
            interpolations: vec![("a".to_owned(), Expr::v("x"))],
            suffix: "b".to_owned(),
        })),
        Expr::project(
            Expr::record_lit(vec![
                ("a", Expr::natural(1)),
                ("b", Expr::natural(2)),
                ("c", Expr::natural(3)),
            ]),
            vec!["a", "c"],
        ),
        Expr::app(Expr::builtin(Builtin::NaturalSubtract), Expr::natural(0)),
        Expr::apps(
            Expr::builtin(Builtin::NaturalFold),
            [Expr::natural(2), nat_ty(), Expr::v("s"), Expr::v("z")],
        ),
    ]
}

#[test]
fn beta_reduction_of_an_applied_lambda() {
    // (\x:Natural. x + 1) 2  =>  3
    let e = Expr::app(
        Expr::lam(
            "x",
            nat_ty(),
            Rc::new(Expr::NaturalPlus(Expr::v("x"), Expr::natural(1))),
        ),
        Expr::natural(2),
    );
    assert_eq!(normalize(&e), Expr::natural(3));
}

#[test]
fn list_length_of_a_literal() {
    // List/length Natural [1, 2, 3]  =>  3
    let e = Expr::apps(
        Expr::builtin(Builtin::ListLength),
        [
            nat_ty(),
            Expr::list(vec![Expr::natural(1), Expr::natural(2), Expr::natural(3)]),
        ],
    );
    assert_eq!(normalize(&e), Expr::natural(3));
}

#[test]
fn merge_dispatches_on_some() {
    // merge { Some = \x:Natural. x, None = 0 } (Some 5)  =>  5
    let handlers = Expr::record_lit(vec![
        ("Some", Expr::lam("x", nat_ty(), Expr::v("x"))),
        ("None", Expr::natural(0)),
    ]);
    let e = Rc::new(Expr::Merge(handlers, Expr::some(Expr::natural(5)), None));
    assert_eq!(normalize(&e), Expr::natural(5));
}

#[test]
fn prefer_keeps_the_right_fields_sorted() {
    // { a = 1, b = 2 } // { b = 3, c = 4 }  =>  { a = 1, b = 3, c = 4 }
    let e = Rc::new(Expr::Prefer(
        Expr::record_lit(vec![("a", Expr::natural(1)), ("b", Expr::natural(2))]),
        Expr::record_lit(vec![("b", Expr::natural(3)), ("c", Expr::natural(4))]),
    ));
    let expected = Expr::record_lit(vec![
        ("a", Expr::natural(1)),
        ("b", Expr::natural(3)),
        ("c", Expr::natural(4)),
    ]);
    assert_eq!(normalize(&e), expected);
}

#[test]
fn natural_subtract_clamps_and_requotes() {
    let sub = |m, n| {
        Expr::apps(
            Expr::builtin(Builtin::NaturalSubtract),
            [Expr::natural(m), Expr::natural(n)],
        )
    };
    assert_eq!(normalize(&sub(3, 5)), Expr::natural(2));
    assert_eq!(normalize(&sub(5, 3)), Expr::natural(0));

    let partial = Expr::app(Expr::builtin(Builtin::NaturalSubtract), Expr::natural(0));
    assert_eq!(normalize(&partial), partial);
}

#[test]
fn if_with_a_literal_condition() {
    // if True then ((\x:Bool. x) False) else True  =>  False
    let e = Rc::new(Expr::BoolIf(
        Expr::boolean(true),
        Expr::app(
            Expr::lam("x", Expr::builtin(Builtin::Bool), Expr::v("x")),
            Expr::boolean(false),
        ),
        Expr::boolean(true),
    ));
    assert_eq!(normalize(&e), Expr::boolean(false));
}

#[test]
fn normalization_is_deterministic() {
    for e in corpus() {
        assert_eq!(normalize(&e), normalize(&e));
    }
}

#[test]
fn normalization_is_idempotent() {
    for e in corpus() {
        let once = normalize(&e);
        let twice = normalize(&once);
        assert_eq!(
            twice.alpha_normalize(),
            once.alpha_normalize(),
            "re-normalizing changed: {:?}",
            e
        );
    }
}

#[test]
fn record_field_order_is_irrelevant() {
    let a = Expr::record_lit(vec![
        ("x", Expr::natural(1)),
        ("y", Expr::natural(2)),
        ("z", Expr::natural(3)),
    ]);
    let b = Expr::record_lit(vec![
        ("z", Expr::natural(3)),
        ("x", Expr::natural(1)),
        ("y", Expr::natural(2)),
    ]);
    assert_eq!(normalize(&a), normalize(&b));
}

#[test]
fn alpha_normalization_commutes_with_normalization() {
    let samples = vec![
        Expr::lam(
            "y",
            nat_ty(),
            Rc::new(Expr::NaturalPlus(Expr::v("y"), Expr::natural(0))),
        ),
        Expr::lam(
            "x",
            nat_ty(),
            Expr::lam(
                "y",
                nat_ty(),
                Expr::app(Expr::lam("z", nat_ty(), Expr::v("z")), Expr::v("x")),
            ),
        ),
        Expr::app(
            Expr::lam("x", nat_ty(), Expr::lam("y", nat_ty(), Expr::v("x"))),
            Expr::natural(1),
        ),
    ];
    for e in samples {
        assert_eq!(
            normalize(&e).alpha_normalize(),
            normalize(&e.alpha_normalize()),
            "alpha-normalization did not commute for {:?}",
            e
        );
    }
}

#[test]
fn let_bindings_agree_with_substitution() {
    // normalize(let x = e1 in e2) == normalize(e2[x := e1])
    let body = Rc::new(Expr::NaturalPlus(Expr::v("x"), Expr::v("x")));
    let e = Expr::let_("x", Expr::natural(5), body.clone());
    assert_eq!(normalize(&e), normalize(&body.subst("x", 0, &Expr::natural(5))));

    // The substituted term is shifted under binders, so a free `y`
    // cannot be captured.
    let body = Expr::lam(
        "y",
        nat_ty(),
        Rc::new(Expr::NaturalPlus(Expr::v("x"), Expr::v("y"))),
    );
    let e = Expr::let_("x", Expr::v("y"), body.clone());
    assert_eq!(normalize(&e), normalize(&body.subst("x", 0, &Expr::v("y"))));
}

#[test]
fn build_fold_fusion_identities() {
    // Natural
    let e = Expr::app(
        Expr::builtin(Builtin::NaturalBuild),
        Expr::app(Expr::builtin(Builtin::NaturalFold), Expr::v("n")),
    );
    assert_eq!(normalize(&e), normalize(&Expr::v("n")));

    // List, with a literal argument
    let lit = Expr::list(vec![Expr::natural(1), Expr::natural(2)]);
    let e = Expr::apps(
        Expr::builtin(Builtin::ListBuild),
        [
            nat_ty(),
            Expr::apps(Expr::builtin(Builtin::ListFold), [nat_ty(), lit.clone()]),
        ],
    );
    assert_eq!(normalize(&e), normalize(&lit));

    // Optional
    let e = Expr::apps(
        Expr::builtin(Builtin::OptionalBuild),
        [
            nat_ty(),
            Expr::apps(
                Expr::builtin(Builtin::OptionalFold),
                [nat_ty(), Expr::some(Expr::natural(1))],
            ),
        ],
    );
    assert_eq!(normalize(&e), normalize(&Expr::some(Expr::natural(1))));
}
