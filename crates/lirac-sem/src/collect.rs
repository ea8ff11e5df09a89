//! The collect pass.
//!
//! Two walks over the program root. Stage COLLECT introduces every
//! user-declared name as a stub (an empty composite or protocol in the
//! registry, an unconstrained signature in the function table) so that
//! later stages can resolve forward references. Stage LINK runs the
//! same traversal again and fills the stubs in: parent links, parameter
//! and return annotations, attribute and method maps.
//!
//! Plain expression statements are not declarations; both stages skip
//! them.

use crate::ast::{Node, NodeKind, TypeRef};
use crate::env::{qualify, Env};
use crate::error::{ErrorKind, Result, SemanticError};
use crate::types::{CompositeTy, FnTy, Ty, TyDef};
use indexmap::IndexMap;
use lirac_util::symbol::TY_OBJECT;
use lirac_util::{Span, Symbol};

/// The two stages of the pass, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectStage {
    Collect,
    Link,
}

/// Member map harvested from a declaration body: name → type, with
/// functions carried as `Ty::Function`
type Members = IndexMap<Symbol, Ty>;

/// Resolve a syntactic type reference against the registry
pub fn resolve_annotation(env: &Env, tr: &TypeRef) -> Result<Ty> {
    let base = env.types.ty_for(tr.name).ok_or_else(|| {
        SemanticError::new(tr.span, ErrorKind::UnknownType(tr.name.to_string()))
    })?;
    Ok(if tr.vector {
        Ty::Vector(Box::new(base))
    } else {
        base
    })
}

pub struct CollectPass {
    stage: CollectStage,
}

impl CollectPass {
    pub fn new(stage: CollectStage) -> Self {
        Self { stage }
    }

    /// Walk the whole program root with an empty prefix path
    pub fn run(&self, env: &mut Env, root: &mut Node) -> Result<()> {
        self.visit(env, root, None)?;
        Ok(())
    }

    fn visit(&self, env: &mut Env, node: &mut Node, owner: Option<Symbol>) -> Result<Members> {
        let span = node.span;
        match &mut node.kind {
            NodeKind::Block(stmts) => {
                let mut acc = Members::new();
                for stmt in stmts {
                    acc.extend(self.visit(env, stmt, owner)?);
                }
                Ok(acc)
            }

            NodeKind::Function(decl) => {
                self.function(env, span, decl.name, &decl.params, &decl.annotation, owner)
            }

            NodeKind::Type(decl) => {
                self.composite(env, span, decl.name, decl.parent, &mut decl.body, false, owner)
            }

            NodeKind::Protocol(decl) => {
                self.composite(env, span, decl.name, decl.parent, &mut decl.body, true, owner)
            }

            NodeKind::Let(binding) => {
                // Top-level lets may bind functions; their declarations
                // must be visible to the transform pass
                for param in &mut binding.params {
                    self.visit(env, param, owner)?;
                }
                Ok(Members::new())
            }

            NodeKind::Param(param) => {
                let name = param.name;
                let ty = match self.stage {
                    CollectStage::Collect => Ty::Any,
                    CollectStage::Link => match &param.annotation {
                        Some(tr) => resolve_annotation(env, tr)?,
                        None => Ty::Any,
                    },
                };
                if let Some(value) = &mut param.value {
                    self.visit(env, value, owner)?;
                }
                let mut members = Members::new();
                members.insert(name, ty);
                Ok(members)
            }

            // Plain expressions declare nothing
            _ => Ok(Members::new()),
        }
    }

    fn function(
        &self,
        env: &mut Env,
        span: Span,
        name: Symbol,
        params: &[Node],
        annotation: &Option<TypeRef>,
        owner: Option<Symbol>,
    ) -> Result<Members> {
        let qualified = qualify(owner, name);
        let fun = match self.stage {
            CollectStage::Collect => {
                if env.contains_name(qualified) {
                    return Err(SemanticError::new(
                        span,
                        ErrorKind::Redefinition(qualified.to_string()),
                    ));
                }
                let fun = FnTy::stub(name);
                env.define_function(qualified, fun.clone());
                fun
            }
            CollectStage::Link => {
                let mut fun = env.function(qualified).cloned().ok_or_else(|| {
                    SemanticError::new(span, ErrorKind::UnknownVariable(qualified.to_string()))
                })?;
                let mut linked: IndexMap<Symbol, Ty> = IndexMap::new();
                for pnode in params {
                    let NodeKind::Param(p) = &pnode.kind else {
                        return Err(SemanticError::new(
                            pnode.span,
                            ErrorKind::FallThrough("parameter list holds a non-parameter".into()),
                        ));
                    };
                    if linked.contains_key(&p.name) {
                        return Err(SemanticError::new(
                            pnode.span,
                            ErrorKind::DuplicateParameterName(p.name.to_string()),
                        ));
                    }
                    let ty = match &p.annotation {
                        Some(tr) => resolve_annotation(env, tr)?,
                        None => Ty::Any,
                    };
                    linked.insert(p.name, ty);
                }
                fun.params = linked;
                fun.ret = match annotation {
                    Some(tr) => resolve_annotation(env, tr)?,
                    None => Ty::Any,
                };
                env.functions.insert(qualified, fun.clone());
                fun
            }
        };
        let mut members = Members::new();
        members.insert(name, Ty::Function(Box::new(fun)));
        Ok(members)
    }

    #[allow(clippy::too_many_arguments)]
    fn composite(
        &self,
        env: &mut Env,
        span: Span,
        name: Symbol,
        parent: Option<Symbol>,
        body: &mut Vec<Node>,
        protocol: bool,
        owner: Option<Symbol>,
    ) -> Result<Members> {
        let qualified = qualify(owner, name);
        match self.stage {
            CollectStage::Collect => {
                if env.types.contains(qualified) {
                    return Err(SemanticError::new(
                        span,
                        ErrorKind::Redefinition(qualified.to_string()),
                    ));
                }
                let id = env
                    .types
                    .define(qualified, TyDef::Composite(CompositeTy::stub(qualified, protocol)));
                if qualified != name {
                    env.types.alias(name, id);
                }
                for stmt in body {
                    self.visit(env, stmt, Some(qualified))?;
                }
            }
            CollectStage::Link => {
                let id = env.types.id(qualified).ok_or_else(|| {
                    SemanticError::new(span, ErrorKind::UnknownType(qualified.to_string()))
                })?;

                // Non-protocol chains default to the builtin root
                let parent_name = parent.or(if protocol { None } else { Some(TY_OBJECT) });
                if let Some(pname) = parent_name {
                    let pid = env.types.id(pname).ok_or_else(|| {
                        SemanticError::new(span, ErrorKind::UnknownType(pname.to_string()))
                    })?;
                    match env.types.def(pid) {
                        TyDef::Simple(_) => {
                            return Err(SemanticError::new(
                                span,
                                ErrorKind::ProtocolParentMismatch(format!(
                                    "'{qualified}' can not inherit from '{pname}'"
                                )),
                            ));
                        }
                        TyDef::Composite(pc) => {
                            if protocol && !pc.protocol {
                                return Err(SemanticError::new(
                                    span,
                                    ErrorKind::ProtocolParentMismatch(format!(
                                        "protocol '{qualified}' can not extend type '{pname}'"
                                    )),
                                ));
                            }
                            if !protocol && pc.protocol {
                                return Err(SemanticError::new(
                                    span,
                                    ErrorKind::ProtocolParentMismatch(format!(
                                        "type '{qualified}' can not inherit from protocol '{pname}'"
                                    )),
                                ));
                            }
                        }
                    }
                    if env.types.circular(id, pid) {
                        return Err(SemanticError::new(
                            span,
                            ErrorKind::CyclicInheritance(qualified.to_string()),
                        ));
                    }
                    if let Some(comp) = env.types.composite_mut(id) {
                        comp.parent = Some(pid);
                    }
                }

                // Harvest the body members
                let mut members = Members::new();
                for stmt in body {
                    let stmt_span = stmt.span;
                    for (mname, mty) in self.visit(env, stmt, Some(qualified))? {
                        if members.contains_key(&mname) {
                            return Err(SemanticError::new(
                                stmt_span,
                                ErrorKind::Redefinition(
                                    qualify(Some(qualified), mname).to_string(),
                                ),
                            ));
                        }
                        members.insert(mname, mty);
                    }
                }
                if let Some(comp) = env.types.composite_mut(id) {
                    comp.attributes.clear();
                    comp.methods.clear();
                    for (mname, mty) in members {
                        match mty {
                            Ty::Function(f) => {
                                comp.methods.insert(mname, *f);
                            }
                            other => {
                                comp.attributes.insert(mname, other);
                            }
                        }
                    }
                }
            }
        }
        Ok(Members::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtins;
    use lirac_util::symbol::TY_NUMBER;

    fn sym(s: &str) -> Symbol {
        Symbol::intern(s)
    }

    fn collected(ast: &mut Node) -> Result<Env> {
        let mut env = Env::new();
        builtins::install(&mut env);
        CollectPass::new(CollectStage::Collect).run(&mut env, ast)?;
        CollectPass::new(CollectStage::Link).run(&mut env, ast)?;
        Ok(env)
    }

    #[test]
    fn test_function_stub_then_link() {
        let mut ast = Node::block(vec![Node::function(
            "dist",
            vec![
                Node::param("dx", Some("number")),
                Node::param("dy", None),
            ],
            Some("number"),
            Node::number(0.0),
        )]);
        let env = collected(&mut ast).unwrap();

        let f = env.function(sym("dist")).unwrap();
        assert_eq!(f.params.len(), 2);
        assert_eq!(f.params[&sym("dx")], Ty::Simple(TY_NUMBER));
        assert_eq!(f.params[&sym("dy")], Ty::Any);
        assert_eq!(f.ret, Ty::Simple(TY_NUMBER));
    }

    #[test]
    fn test_function_redefinition_is_fatal() {
        let mut ast = Node::block(vec![
            Node::function("f", vec![], None, Node::number(1.0)),
            Node::function("f", vec![], None, Node::number(2.0)).at(2, 1),
        ]);
        let err = collected(&mut ast).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Redefinition("f".into()));
        assert_eq!(err.line, 2);
    }

    #[test]
    fn test_duplicate_parameter_name() {
        let mut ast = Node::block(vec![Node::function(
            "f",
            vec![Node::param("a", None), Node::param("a", None).at(1, 9)],
            None,
            Node::number(1.0),
        )]);
        let err = collected(&mut ast).unwrap_err();
        assert_eq!(err.kind, ErrorKind::DuplicateParameterName("a".into()));
    }

    #[test]
    fn test_type_members_split_into_attributes_and_methods() {
        let mut ast = Node::block(vec![Node::type_decl(
            "Point",
            None,
            vec![
                Node::param("x", Some("number")),
                Node::param("y", Some("number")),
                Node::function("getX", vec![], None, Node::variable("x")),
                Node::function("@ctor", vec![], None, Node::block(vec![])),
            ],
        )]);
        let env = collected(&mut ast).unwrap();

        let comp = env.types.composite_by_name(sym("Point")).unwrap();
        assert_eq!(comp.attributes.len(), 2);
        assert_eq!(comp.attributes[&sym("x")], Ty::Simple(TY_NUMBER));
        assert_eq!(comp.methods.len(), 2);
        assert!(comp.methods.contains_key(&sym("getX")));

        // Parent defaults to object
        let pid = comp.parent.unwrap();
        assert_eq!(env.types.def(pid).name(), lirac_util::symbol::TY_OBJECT);

        // Methods are also in scope under their qualified names
        assert!(env.function(sym("Point.getX")).is_some());
        assert!(env.function(sym("Point.@ctor")).is_some());
    }

    #[test]
    fn test_unknown_parent_type() {
        let mut ast = Node::block(vec![Node::type_decl("A", Some("Ghost"), vec![])]);
        let err = collected(&mut ast).unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnknownType("Ghost".into()));
    }

    #[test]
    fn test_unknown_annotation_type() {
        let mut ast = Node::block(vec![Node::function(
            "f",
            vec![Node::param("a", Some("Ghost"))],
            None,
            Node::number(1.0),
        )]);
        let err = collected(&mut ast).unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnknownType("Ghost".into()));
    }

    #[test]
    fn test_self_inheritance_is_cyclic() {
        let mut ast = Node::block(vec![Node::type_decl("Cycle", Some("Cycle"), vec![])]);
        let err = collected(&mut ast).unwrap_err();
        assert_eq!(err.kind, ErrorKind::CyclicInheritance("Cycle".into()));
    }

    #[test]
    fn test_type_inheriting_protocol_is_rejected() {
        let mut ast = Node::block(vec![Node::type_decl("A", Some("printable"), vec![])]);
        let err = collected(&mut ast).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::ProtocolParentMismatch(_)));
    }

    #[test]
    fn test_protocol_extending_type_is_rejected() {
        let mut ast = Node::block(vec![Node::protocol_decl("P", Some("object"), vec![])]);
        let err = collected(&mut ast).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::ProtocolParentMismatch(_)));
    }

    #[test]
    fn test_protocol_extends_protocol() {
        let mut ast = Node::block(vec![Node::protocol_decl("P", Some("printable"), vec![])]);
        let env = collected(&mut ast).unwrap();
        let comp = env.types.composite_by_name(sym("P")).unwrap();
        assert!(comp.protocol);
        assert!(comp.parent.is_some());
    }

    #[test]
    fn test_nested_type_registered_under_both_names() {
        let mut ast = Node::block(vec![Node::type_decl(
            "Outer",
            None,
            vec![
                Node::type_decl("Mid", None, vec![]),
                Node::function("@ctor", vec![], None, Node::block(vec![])),
            ],
        )]);
        let env = collected(&mut ast).unwrap();
        assert!(env.types.contains(sym("Outer.Mid")));
        assert_eq!(env.types.id(sym("Mid")), env.types.id(sym("Outer.Mid")));
    }

    #[test]
    fn test_let_bound_function_is_collected() {
        let mut ast = Node::block(vec![Node::let_in(
            vec![Node::var_param(
                "f",
                None,
                Node::function("f", vec![Node::param("x", None)], None, Node::variable("x")),
            )],
            Node::number(1.0),
        )]);
        let env = collected(&mut ast).unwrap();
        assert!(env.function(sym("f")).is_some());
    }

    #[test]
    fn test_duplicate_member_in_type_body() {
        let mut ast = Node::block(vec![Node::type_decl(
            "T",
            None,
            vec![
                Node::param("x", Some("number")),
                Node::param("x", Some("string")).at(3, 3),
            ],
        )]);
        let err = collected(&mut ast).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Redefinition("T.x".into()));
    }

    #[test]
    fn test_plain_expressions_are_skipped() {
        let mut ast = Node::block(vec![
            Node::binary(
                crate::ast::BinOp::Add,
                Node::number(1.0),
                Node::number(2.0),
            ),
            Node::function("f", vec![], None, Node::string("ok")),
        ]);
        let env = collected(&mut ast).unwrap();
        assert!(env.function(sym("f")).is_some());
        assert_eq!(env.function(sym("f")).unwrap().ret, Ty::Any);
    }
}
