//! Observable properties of the analysis pipeline.
//!
//! These tests pin the guarantees lowering relies on: typing is
//! idempotent once quiescent, narrowing is monotone, enumeration
//! cardinality is exactly the product of the axis widths, inheritance
//! chains are acyclic and rooted, protocol implementation agrees with
//! compatibility, and qualified names round-trip through the member
//! hierarchy.

use indexmap::IndexMap;
use lirac_sem::alternate::alternate;
use lirac_sem::ast::{BinOp, Node, NodeKind};
use lirac_sem::builtins;
use lirac_sem::collect::{CollectPass, CollectStage};
use lirac_sem::transform::TransformPass;
use lirac_sem::typing::TypingPass;
use lirac_sem::{check, Env, FnTy, Ty, TyDef};
use lirac_util::symbol::{TY_BOOLEAN, TY_NUMBER, TY_OBJECT, TY_STRING};
use lirac_util::Symbol;

fn sym(s: &str) -> Symbol {
    Symbol::intern(s)
}

fn identity_program() -> Node {
    Node::block(vec![
        Node::function("id", vec![Node::param("x", None)], None, Node::variable("x")),
        Node::binary(
            BinOp::Add,
            Node::invoke(Node::variable("id"), vec![Node::number(1.0)]),
            Node::invoke(Node::variable("id"), vec![Node::number(2.0)]),
        ),
    ])
}

// ============================================================================
// Idempotence of typing
// ============================================================================

#[test]
fn typing_is_idempotent_after_quiescence() {
    let mut ast = identity_program();
    let semantic = check(&mut ast).unwrap();

    // Rebuild the live environment from the result tables and run the
    // typing pass once more: zero progress, no mutation
    let mut env = Env {
        scope: semantic.scope,
        functions: semantic.functions,
        types: semantic.types,
    };
    let before = ast.clone();
    let progress = TypingPass::run(&mut env, &mut ast).unwrap();
    assert_eq!(progress, 0);
    assert_eq!(ast, before);
}

// ============================================================================
// Monotone narrowing
// ============================================================================

/// Lattice width of an inferred type: `Any` is the whole lattice, a
/// union is its member count, anything concrete is one.
fn width(ty: &Ty) -> usize {
    match ty {
        Ty::Any => usize::MAX,
        Ty::Union(members) => members.len(),
        _ => 1,
    }
}

fn id_param_width(ast: &Node) -> Option<usize> {
    let NodeKind::Block(stmts) = &ast.kind else {
        return None;
    };
    let NodeKind::Function(decl) = &stmts[0].kind else {
        return None;
    };
    decl.params[0].ty.as_ref().map(width)
}

#[test]
fn narrowing_is_monotone_across_passes() {
    let mut ast = identity_program();
    let mut env = Env::new();
    builtins::install(&mut env);
    CollectPass::new(CollectStage::Collect)
        .run(&mut env, &mut ast)
        .unwrap();
    CollectPass::new(CollectStage::Link)
        .run(&mut env, &mut ast)
        .unwrap();

    let mut widths: Vec<usize> = Vec::new();
    let note = |ast: &Node, widths: &mut Vec<usize>| {
        if let Some(w) = id_param_width(ast) {
            widths.push(w);
        }
    };

    loop {
        let progress = TypingPass::run(&mut env, &mut ast).unwrap();
        note(&ast, &mut widths);
        if progress == 0 {
            break;
        }
    }
    let collected = TransformPass::collect_functions(&ast);
    TransformPass::guess_arguments(&mut env, &mut ast, &collected).unwrap();
    note(&ast, &mut widths);
    loop {
        let progress = TypingPass::run(&mut env, &mut ast).unwrap();
        note(&ast, &mut widths);
        if progress == 0 {
            break;
        }
    }

    assert!(!widths.is_empty());
    for pair in widths.windows(2) {
        assert!(
            pair[1] <= pair[0],
            "inferred type widened: {} -> {}",
            pair[0],
            pair[1]
        );
    }
    // And narrowing actually happened: three atoms survive for x
    assert_eq!(*widths.last().unwrap(), 3);
}

// ============================================================================
// Alternative cardinality
// ============================================================================

#[test]
fn alternative_count_is_product_of_axis_widths() {
    let number = Ty::Simple(TY_NUMBER);
    let string = Ty::Simple(TY_STRING);
    let boolean = Ty::Simple(TY_BOOLEAN);

    let shapes: Vec<(Vec<Ty>, Ty, usize)> = vec![
        (vec![], number.clone(), 1),
        (vec![number.clone()], number.clone(), 1),
        (
            vec![Ty::Union(vec![number.clone(), string.clone()])],
            number.clone(),
            2,
        ),
        (
            vec![
                Ty::Union(vec![number.clone(), string.clone()]),
                boolean.clone(),
                Ty::Union(vec![number.clone(), string.clone(), boolean.clone()]),
            ],
            Ty::Union(vec![number.clone(), string.clone()]),
            12,
        ),
    ];

    for (params, ret, expected) in shapes {
        let params: IndexMap<Symbol, Ty> = params
            .into_iter()
            .enumerate()
            .map(|(i, t)| (Symbol::intern(&format!("p{i}")), t))
            .collect();
        let fun = FnTy::new(sym("f"), params, ret);
        assert_eq!(alternate(&fun).count(), expected);
    }
}

// ============================================================================
// Inheritance acyclicity
// ============================================================================

#[test]
fn parent_chains_reach_object_without_revisits() {
    let mut ast = Node::block(vec![
        Node::type_decl("A", None, vec![]),
        Node::type_decl("B", Some("A"), vec![]),
        Node::type_decl("C", Some("B"), vec![]),
    ]);
    let semantic = check(&mut ast).unwrap();

    let object = semantic.types.id(TY_OBJECT).unwrap();
    for (id, def) in semantic.types.iter() {
        let TyDef::Composite(comp) = def else {
            continue;
        };
        if comp.protocol {
            continue;
        }
        let mut seen = vec![id];
        let mut cursor = comp.parent;
        while let Some(cur) = cursor {
            assert!(!seen.contains(&cur), "revisited {cur:?} from {id:?}");
            seen.push(cur);
            cursor = semantic.types.composite(cur).and_then(|c| c.parent);
        }
        assert_eq!(
            *seen.last().unwrap(),
            object,
            "chain of {} does not end at object",
            def.name()
        );
    }
}

// ============================================================================
// Protocol implementation consistency
// ============================================================================

#[test]
fn implementation_agrees_with_compatibility() {
    let mut ast = Node::block(vec![
        Node::protocol_decl(
            "Speaker",
            None,
            vec![Node::function(
                "speak",
                vec![],
                Some("string"),
                Node::block(vec![]),
            )],
        ),
        Node::type_decl(
            "Dog",
            None,
            vec![
                Node::function("speak", vec![], Some("string"), Node::string("woof")),
                Node::function(
                    "@ctor",
                    vec![],
                    None,
                    Node::block(vec![Node::variable("@self")]),
                ),
            ],
        ),
        Node::type_decl("Rock", None, vec![]),
    ]);
    let semantic = check(&mut ast).unwrap();

    let speaker = semantic.types.id(sym("Speaker")).unwrap();
    for (id, def) in semantic.types.iter() {
        let TyDef::Composite(comp) = def else {
            continue;
        };
        if comp.protocol {
            continue;
        }
        let implemented = semantic.types.implemented_by(speaker, id);
        let compatible = semantic.types.compatible(
            &Ty::Named(sym("Speaker")),
            &semantic.types.ty_of(id),
            false,
        );
        assert_eq!(
            implemented,
            compatible,
            "disagreement on {}",
            def.name()
        );
    }
    assert!(semantic
        .types
        .implemented_by(speaker, semantic.types.id(sym("Dog")).unwrap()));
    assert!(!semantic
        .types
        .implemented_by(speaker, semantic.types.id(sym("Rock")).unwrap()));
}

// ============================================================================
// Qualified-name round-trip
// ============================================================================

#[test]
fn qualified_names_round_trip_through_the_hierarchy() {
    let mut ast = Node::block(vec![Node::type_decl(
        "Point",
        None,
        vec![
            Node::param("x", Some("number")),
            Node::function("getX", vec![], None, Node::variable("x")),
            Node::function(
                "@ctor",
                vec![Node::param("x", Some("number"))],
                None,
                Node::block(vec![Node::variable("@self")]),
            ),
        ],
    )]);
    let semantic = check(&mut ast).unwrap();

    // The environment entry under the dotted path equals the entry
    // found by walking the composite hierarchy
    let by_path = &semantic.functions[&sym("Point.getX")];
    let by_walk = &semantic
        .types
        .composite_by_name(sym("Point"))
        .unwrap()
        .methods[&sym("getX")];
    assert_eq!(by_path, by_walk);

    // Attributes resolve the same way
    assert_eq!(
        semantic
            .types
            .composite_by_name(sym("Point"))
            .unwrap()
            .attributes[&sym("x")],
        Ty::Simple(TY_NUMBER)
    );
}

#[test]
fn nested_declarations_resolve_under_short_and_qualified_names() {
    let mut ast = Node::block(vec![Node::type_decl(
        "Outer",
        None,
        vec![
            Node::type_decl("Inner", None, vec![]),
            Node::function(
                "@ctor",
                vec![],
                None,
                Node::block(vec![Node::variable("@self")]),
            ),
        ],
    )]);
    let semantic = check(&mut ast).unwrap();

    assert!(semantic.types.contains(sym("Outer.Inner")));
    assert_eq!(
        semantic.types.id(sym("Inner")),
        semantic.types.id(sym("Outer.Inner"))
    );
}
