//! The typing pass.
//!
//! One [`TypingPass::run`] is a single child-before-parent walk over the
//! tree: every node gets a type computed for it, the type is written
//! onto the node, and the pass reports how many `ty` slots strictly
//! changed. The transform schedule re-runs the pass until a run reports
//! zero progress; termination follows because narrowing is monotone
//! (an `Any` becomes a union once, unions only lose members) and the
//! lattice is finite.
//!
//! Two deliberate asymmetries against a classical checker:
//!
//! - *Interim leniency.* While a base type is still wide (`Any` or a
//!   union none of whose members carries the accessed field), member
//!   access and invocation yield `Any` instead of failing. Trial checks
//!   see concrete bases, so real errors still surface, in the transform
//!   stage where they mean "this hypothesis is wrong".
//! - *Overload selection.* Once every argument is concrete, a call
//!   selects against the target's enumerated alternatives by exact
//!   parameter match (falling back to a unique castable candidate);
//!   before that, arguments are only checked laxly against the
//!   canonical union axes.

use crate::ast::{
    Assign, BinOp, Binary, Conditional, FunctionDecl, Invoke, Let, Lit, New, Node, NodeKind,
    Param, UnOp, Unary, While,
};
use crate::collect::resolve_annotation;
use crate::env::{qualify, Env};
use crate::error::{ErrorKind, Result, SemanticError};
use crate::types::{merge, FnTy, Ty, TyDef};
use lirac_util::symbol::{
    ID_BASE, ID_CTOR, ID_CTOR_BASE, ID_CTOR_SELF, ID_SELF, TY_BOOLEAN, TY_NUMBER, TY_OBJECT,
    TY_PRINTABLE, TY_STRING,
};
use lirac_util::{FxHashSet, Span, Symbol};

fn err(span: Span, kind: ErrorKind) -> SemanticError {
    SemanticError::new(span, kind)
}

fn boolean() -> Ty {
    Ty::Simple(TY_BOOLEAN)
}

fn number() -> Ty {
    Ty::Simple(TY_NUMBER)
}

fn string() -> Ty {
    Ty::Simple(TY_STRING)
}

pub struct TypingPass {
    progress: usize,
}

impl TypingPass {
    /// Run one full pass over the program root; returns the number of
    /// AST sites whose inferred type strictly changed.
    pub fn run(env: &mut Env, root: &mut Node) -> Result<usize> {
        let mut pass = TypingPass { progress: 0 };
        pass.visit(env, root, None)?;
        Ok(pass.progress)
    }

    /// Type-check a subtree under a hypothetical environment. The
    /// caller owns the snapshot; an `Err` means the hypothesis does not
    /// type-check.
    pub fn trial(env: &mut Env, node: &mut Node, compose: Option<Symbol>) -> Result<()> {
        let mut pass = TypingPass { progress: 0 };
        pass.visit(env, node, compose).map(|_| ())
    }

    fn record(&mut self, slot: &mut Option<Ty>, ty: &Ty) {
        if slot.as_ref() != Some(ty) {
            *slot = Some(ty.clone());
            self.progress += 1;
        }
    }

    fn visit(&mut self, env: &mut Env, node: &mut Node, compose: Option<Symbol>) -> Result<Ty> {
        let span = node.span;
        let ty = self.compute(env, span, &mut node.kind, compose)?;
        self.record(&mut node.ty, &ty);
        Ok(ty)
    }

    fn compute(
        &mut self,
        env: &mut Env,
        span: Span,
        kind: &mut NodeKind,
        compose: Option<Symbol>,
    ) -> Result<Ty> {
        match kind {
            NodeKind::Constant(lit) => Ok(match lit {
                Lit::Boolean(_) => boolean(),
                Lit::Number(_) => number(),
                Lit::Str(_) => string(),
            }),

            NodeKind::Variable(name) => env.value(*name).ok_or_else(|| {
                err(span, ErrorKind::UnknownVariable(name.to_string()))
            }),

            NodeKind::TypeName(tr) => Err(err(
                span,
                ErrorKind::FallThrough(format!(
                    "type reference '{}' outside 'as'/'is'",
                    tr.name
                )),
            )),

            NodeKind::Binary(binary) => self.binary(env, span, binary, compose),

            NodeKind::Unary(unary) => self.unary(env, span, unary, compose),

            NodeKind::Block(stmts) => {
                let mut last = Ty::Any;
                for stmt in stmts {
                    last = self.visit(env, stmt, compose)?;
                }
                Ok(last)
            }

            NodeKind::Conditional(cond) => self.conditional(env, cond, compose),

            NodeKind::While(wh) => self.while_loop(env, wh, compose),

            NodeKind::Let(binding) => self.let_in(env, binding),

            NodeKind::Param(param) => self.param(env, span, param, compose),

            NodeKind::ClassAccess(access) => {
                let base_ty = self.visit(env, &mut access.base, compose)?;
                self.access(env, span, &base_ty, access.field)
            }

            NodeKind::Assign(assign) => self.assign_expr(env, assign, compose),

            NodeKind::Invoke(invoke) => self.invoke(env, span, invoke, compose),

            NodeKind::New(new) => self.new_value(env, span, new, compose),

            NodeKind::Function(decl) => self.function(env, span, decl, compose),

            NodeKind::Type(decl) => {
                let name = decl.name;
                let parent = decl.parent;
                self.composite(env, span, name, parent, &mut decl.body, false, compose)
            }

            NodeKind::Protocol(decl) => {
                let name = decl.name;
                let parent = decl.parent;
                self.composite(env, span, name, parent, &mut decl.body, true, compose)
            }
        }
    }

    // ------------------------------------------------------------------------
    // Operators
    // ------------------------------------------------------------------------

    fn binary(
        &mut self,
        env: &mut Env,
        span: Span,
        binary: &mut Binary,
        compose: Option<Symbol>,
    ) -> Result<Ty> {
        match binary.op {
            BinOp::As | BinOp::Is => {
                let target = match &binary.rhs.kind {
                    NodeKind::TypeName(tr) => resolve_annotation(env, tr).map_err(|mut e| {
                        // A dummy reference span falls back to the operator's
                        if e.line == 0 && e.column == 0 {
                            e.line = span.line;
                            e.column = span.column;
                        }
                        e
                    })?,
                    _ => {
                        return Err(err(
                            binary.rhs.span,
                            ErrorKind::FallThrough(format!(
                                "right operand of '{}' must be a type reference",
                                binary.op.token()
                            )),
                        ));
                    }
                };
                self.visit(env, &mut binary.lhs, compose)?;
                self.record(&mut binary.rhs.ty, &target);
                Ok(if binary.op == BinOp::As {
                    target
                } else {
                    boolean()
                })
            }

            BinOp::Concat | BinOp::ConcatSpace => {
                let want = Ty::union_of(vec![number(), string(), Ty::Named(TY_PRINTABLE)]);
                self.operand(env, &mut binary.lhs, &want, compose)?;
                self.operand(env, &mut binary.rhs, &want, compose)?;
                Ok(string())
            }

            BinOp::Eq | BinOp::Ne => {
                let want = Ty::union_of(vec![number(), boolean()]);
                self.operand(env, &mut binary.lhs, &want, compose)?;
                self.operand(env, &mut binary.rhs, &want, compose)?;
                Ok(boolean())
            }

            BinOp::And | BinOp::Or => {
                let want = boolean();
                self.operand(env, &mut binary.lhs, &want, compose)?;
                self.operand(env, &mut binary.rhs, &want, compose)?;
                Ok(boolean())
            }

            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod => {
                let want = number();
                self.operand(env, &mut binary.lhs, &want, compose)?;
                self.operand(env, &mut binary.rhs, &want, compose)?;
                Ok(number())
            }

            BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge => {
                let want = number();
                self.operand(env, &mut binary.lhs, &want, compose)?;
                self.operand(env, &mut binary.rhs, &want, compose)?;
                Ok(boolean())
            }
        }
    }

    /// Visit one operand and require compatibility with the operator's
    /// expected type
    fn operand(
        &mut self,
        env: &mut Env,
        node: &mut Node,
        want: &Ty,
        compose: Option<Symbol>,
    ) -> Result<Ty> {
        let got = self.visit(env, node, compose)?;
        if !env.types.compatible(&got, want, false) {
            return Err(err(
                node.span,
                ErrorKind::IncompatibleTypes(got.to_string(), want.to_string()),
            ));
        }
        Ok(got)
    }

    fn unary(
        &mut self,
        env: &mut Env,
        span: Span,
        unary: &mut Unary,
        compose: Option<Symbol>,
    ) -> Result<Ty> {
        match unary.op {
            UnOp::Not => {
                self.operand(env, &mut unary.arg, &boolean(), compose)?;
                Ok(boolean())
            }
            other => Err(err(
                span,
                ErrorKind::UnknownOperator(other.token().to_string()),
            )),
        }
    }

    // ------------------------------------------------------------------------
    // Control flow
    // ------------------------------------------------------------------------

    fn conditional(
        &mut self,
        env: &mut Env,
        cond: &mut Conditional,
        compose: Option<Symbol>,
    ) -> Result<Ty> {
        self.operand(env, &mut cond.cond, &boolean(), compose)?;
        let direct = self.visit(env, &mut cond.direct, compose)?;
        let reverse = self.visit(env, &mut cond.reverse, compose)?;
        if !env.types.compatible(&direct, &reverse, false) {
            return Err(err(
                cond.reverse.span,
                ErrorKind::IncompatibleTypes(reverse.to_string(), direct.to_string()),
            ));
        }
        Ok(merge(&direct, &reverse))
    }

    fn while_loop(
        &mut self,
        env: &mut Env,
        wh: &mut While,
        compose: Option<Symbol>,
    ) -> Result<Ty> {
        self.operand(env, &mut wh.cond, &boolean(), compose)?;
        self.visit(env, &mut wh.body, compose)
    }

    fn let_in(&mut self, env: &mut Env, binding: &mut Let) -> Result<Ty> {
        let saved = env.scope.clone();
        let result = (|| {
            let mut seen: FxHashSet<Symbol> = FxHashSet::default();
            for pnode in &mut binding.params {
                let pspan = pnode.span;
                let pty = self.visit(env, pnode, None)?;
                let NodeKind::Param(p) = &pnode.kind else {
                    return Err(err(
                        pspan,
                        ErrorKind::FallThrough("let binds a non-parameter".into()),
                    ));
                };
                if !seen.insert(p.name) {
                    return Err(err(pspan, ErrorKind::Redefinition(p.name.to_string())));
                }
                env.scope.insert(p.name, pty);
            }
            self.visit(env, &mut binding.body, None)
        })();
        env.scope = saved;
        result
    }

    // ------------------------------------------------------------------------
    // Bindings
    // ------------------------------------------------------------------------

    fn param(
        &mut self,
        env: &mut Env,
        span: Span,
        param: &mut Param,
        compose: Option<Symbol>,
    ) -> Result<Ty> {
        // Inside a type body the context is the attribute's current
        // type; elsewhere it is the annotation.
        let base = match compose {
            Some(owner) => {
                let attr = env
                    .types
                    .id(owner)
                    .and_then(|id| env.types.composite(id))
                    .and_then(|c| c.attributes.get(&param.name).cloned());
                match attr {
                    Some(ty) => ty,
                    None => match &param.annotation {
                        Some(tr) => resolve_annotation(env, tr)?,
                        None => Ty::Any,
                    },
                }
            }
            None => match &param.annotation {
                Some(tr) => resolve_annotation(env, tr)?,
                None => Ty::Any,
            },
        };

        match &mut param.value {
            Some(value) => {
                let vty = self.visit(env, value, None)?;
                if matches!(base, Ty::Any) {
                    // Unannotated binding: the initializer decides
                    Ok(if matches!(vty, Ty::Any) {
                        env.derive(&Ty::Any)
                    } else {
                        vty
                    })
                } else {
                    let declared = env.derive(&base);
                    if !env.types.compatible(&vty, &declared, false) {
                        return Err(err(
                            span,
                            ErrorKind::IncompatibleTypes(
                                vty.to_string(),
                                declared.to_string(),
                            ),
                        ));
                    }
                    Ok(if matches!(vty, Ty::Any) { declared } else { vty })
                }
            }
            None => Ok(env.derive(&base)),
        }
    }

    // ------------------------------------------------------------------------
    // Access and assignment
    // ------------------------------------------------------------------------

    fn access(&mut self, env: &Env, span: Span, base_ty: &Ty, field: Symbol) -> Result<Ty> {
        match base_ty {
            // Not narrowed yet; trial checks will see a concrete base
            Ty::Any => Ok(Ty::Any),

            Ty::Named(name) => {
                let id = env
                    .types
                    .id(*name)
                    .ok_or_else(|| err(span, ErrorKind::UnknownType(name.to_string())))?;
                if env.types.composite(id).is_none() {
                    return Err(err(
                        span,
                        ErrorKind::IncompatibleTypes(name.to_string(), "a composite".into()),
                    ));
                }
                env.types.member(id, field).ok_or_else(|| {
                    err(
                        span,
                        ErrorKind::UnknownField {
                            base: name.to_string(),
                            field: field.to_string(),
                        },
                    )
                })
            }

            Ty::Union(members) => {
                let mut found = Vec::new();
                for member in members {
                    if let Some(name) = member.name() {
                        if let Some(id) = env.types.id(name) {
                            if let Some(ty) = env.types.member(id, field) {
                                found.push(ty);
                            }
                        }
                    }
                }
                if found.is_empty() {
                    // Still wide; defer judgement to the narrowing stages
                    Ok(Ty::Any)
                } else {
                    Ok(found.iter().fold(Ty::Any, |acc, ty| merge(&acc, ty)))
                }
            }

            other => Err(err(
                span,
                ErrorKind::IncompatibleTypes(other.to_string(), "a composite".into()),
            )),
        }
    }

    fn assign_expr(
        &mut self,
        env: &mut Env,
        assign: &mut Assign,
        compose: Option<Symbol>,
    ) -> Result<Ty> {
        if !matches!(
            assign.target.kind,
            NodeKind::Variable(_) | NodeKind::ClassAccess(_)
        ) {
            return Err(err(
                assign.target.span,
                ErrorKind::FallThrough("assignment target is not addressable".into()),
            ));
        }
        let target = self.visit(env, &mut assign.target, compose)?;
        let value = self.visit(env, &mut assign.value, compose)?;
        if !env.types.compatible(&target, &value, false) {
            return Err(err(
                assign.value.span,
                ErrorKind::IncompatibleTypes(value.to_string(), target.to_string()),
            ));
        }
        Ok(merge(&target, &value))
    }

    // ------------------------------------------------------------------------
    // Calls and construction
    // ------------------------------------------------------------------------

    fn invoke(
        &mut self,
        env: &mut Env,
        span: Span,
        invoke: &mut Invoke,
        compose: Option<Symbol>,
    ) -> Result<Ty> {
        let mut args = Vec::with_capacity(invoke.args.len());
        for arg in &mut invoke.args {
            args.push(self.visit(env, arg, compose)?);
        }
        let target = self.visit(env, &mut invoke.target, compose)?;
        match target {
            Ty::Function(fun) => self.select_overload(env, span, &fun, &args),
            // An unresolved target; the narrowing stages decide
            Ty::Any => Ok(Ty::Any),
            other => Err(err(
                span,
                ErrorKind::IncompatibleTypes(other.to_string(), "a function".into()),
            )),
        }
    }

    fn select_overload(
        &mut self,
        env: &Env,
        span: Span,
        fun: &FnTy,
        args: &[Ty],
    ) -> Result<Ty> {
        if fun.params.len() != args.len() {
            return Err(err(
                span,
                ErrorKind::ArgumentCountMismatch {
                    name: fun.name.to_string(),
                    expected: fun.params.len(),
                    got: args.len(),
                },
            ));
        }

        if args.iter().all(Ty::is_concrete) {
            let alternatives = fun.alternatives();
            let exact: Vec<&FnTy> = alternatives
                .iter()
                .filter(|alt| {
                    alt.params
                        .values()
                        .zip(args)
                        .all(|(p, a)| env.types.compatible(a, p, true))
                })
                .collect();
            if !exact.is_empty() {
                // Exact matches can differ only in return type
                return Ok(exact
                    .iter()
                    .fold(Ty::Any, |acc, alt| merge(&acc, &alt.ret)));
            }
            let castable: Vec<&FnTy> = alternatives
                .iter()
                .filter(|alt| {
                    alt.params
                        .values()
                        .zip(args)
                        .all(|(p, a)| env.types.compatible(a, p, false))
                })
                .collect();
            if castable.len() == 1 {
                return Ok(castable[0].ret.clone());
            }
            let shown = args
                .iter()
                .map(Ty::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            return Err(err(
                span,
                ErrorKind::NoOverloadCandidate(fun.name.to_string(), shown),
            ));
        }

        // Arguments still carry unions; only lax compatibility against
        // the canonical axes is decidable here
        for (arg, param) in args.iter().zip(fun.params.values()) {
            if !env.types.compatible(arg, param, false) {
                return Err(err(
                    span,
                    ErrorKind::IncompatibleTypes(arg.to_string(), param.to_string()),
                ));
            }
        }
        Ok(fun.ret.clone())
    }

    fn new_value(
        &mut self,
        env: &mut Env,
        span: Span,
        new: &mut New,
        compose: Option<Symbol>,
    ) -> Result<Ty> {
        let mut args = Vec::with_capacity(new.args.len());
        for arg in &mut new.args {
            args.push(self.visit(env, arg, compose)?);
        }

        let id = env
            .types
            .id(new.type_name)
            .ok_or_else(|| err(span, ErrorKind::UnknownType(new.type_name.to_string())))?;
        let def = env.types.def(id);
        if def.is_protocol() {
            return Err(err(
                span,
                ErrorKind::CannotInstantiateProtocol(new.type_name.to_string()),
            ));
        }
        if matches!(def, TyDef::Simple(_)) {
            return Err(err(
                span,
                ErrorKind::IncompatibleTypes(new.type_name.to_string(), "a composite".into()),
            ));
        }

        let ctor = match env.types.member(id, ID_CTOR) {
            Some(Ty::Function(ctor)) => ctor,
            _ => {
                return Err(err(
                    span,
                    ErrorKind::FallThrough(format!(
                        "type '{}' has no constructor",
                        new.type_name
                    )),
                ));
            }
        };
        if ctor.params.len() != args.len() {
            return Err(err(
                span,
                ErrorKind::ArgumentCountMismatch {
                    name: new.type_name.to_string(),
                    expected: ctor.params.len(),
                    got: args.len(),
                },
            ));
        }
        for (arg, param) in args.iter().zip(ctor.params.values()) {
            if !env.types.compatible(arg, param, false) {
                return Err(err(
                    span,
                    ErrorKind::IncompatibleTypes(arg.to_string(), param.to_string()),
                ));
            }
        }
        Ok(env.types.ty_of(id))
    }

    // ------------------------------------------------------------------------
    // Declarations
    // ------------------------------------------------------------------------

    fn function(
        &mut self,
        env: &mut Env,
        span: Span,
        decl: &mut FunctionDecl,
        compose: Option<Symbol>,
    ) -> Result<Ty> {
        let short = decl.name;
        let qualified = qualify(compose, short);
        let mut fun = env.function(qualified).cloned().ok_or_else(|| {
            err(span, ErrorKind::UnknownVariable(qualified.to_string()))
        })?;

        let saved = env.scope.clone();
        let result: Result<()> = (|| {
            // Methods see the owner's members by unqualified name and
            // the receiver; the constructor gets the receiver under the
            // synthetic names that cannot shadow user parameters
            if let Some(owner) = compose {
                if let Some(owner_id) = env.types.id(owner) {
                    let (attrs, methods) = match env.types.composite(owner_id) {
                        Some(comp) => (
                            comp.attributes
                                .iter()
                                .map(|(n, t)| (*n, t.clone()))
                                .collect::<Vec<_>>(),
                            comp.methods
                                .iter()
                                .map(|(n, f)| (*n, f.clone()))
                                .collect::<Vec<_>>(),
                        ),
                        None => (Vec::new(), Vec::new()),
                    };
                    for (n, t) in attrs {
                        env.scope.insert(n, t);
                    }
                    for (n, f) in methods {
                        env.scope.insert(n, Ty::Function(Box::new(f)));
                    }
                    let (self_name, base_name) = if short == ID_CTOR {
                        (ID_CTOR_SELF, ID_CTOR_BASE)
                    } else {
                        (ID_SELF, ID_BASE)
                    };
                    env.scope.insert(self_name, env.types.ty_of(owner_id));
                    if let Some(pid) = env.types.composite(owner_id).and_then(|c| c.parent) {
                        env.scope.insert(base_name, env.types.ty_of(pid));
                    }
                }
            }

            let names: Vec<Symbol> = fun.params.keys().copied().collect();
            for (index, name) in names.iter().enumerate() {
                let current = fun.params.get(name).cloned().unwrap_or(Ty::Any);
                let derived = env.derive(&current);
                fun.params.insert(*name, derived.clone());
                if let Some(pnode) = decl.params.get_mut(index) {
                    self.record(&mut pnode.ty, &derived);
                }
                env.scope.insert(*name, derived);
            }

            let body_ty = self.visit(env, &mut decl.body, None)?;
            if !env.types.compatible(&body_ty, &fun.ret, false) {
                return Err(err(
                    span,
                    ErrorKind::IncompatibleTypes(body_ty.to_string(), fun.ret.to_string()),
                ));
            }
            if !matches!(body_ty, Ty::Any) {
                fun.ret = body_ty;
            }
            Ok(())
        })();
        env.scope = saved;
        result?;

        env.set_function(qualified, fun.clone());
        Ok(Ty::Function(Box::new(fun)))
    }

    #[allow(clippy::too_many_arguments)]
    fn composite(
        &mut self,
        env: &mut Env,
        span: Span,
        name: Symbol,
        parent: Option<Symbol>,
        body: &mut Vec<Node>,
        protocol: bool,
        compose: Option<Symbol>,
    ) -> Result<Ty> {
        let qualified = qualify(compose, name);
        let id = env
            .types
            .id(qualified)
            .ok_or_else(|| err(span, ErrorKind::UnknownType(qualified.to_string())))?;

        // Re-validate the parent relationship; the cycle check guards
        // against programs the collect pass accepted piecemeal
        let parent_name = parent.or(if protocol { None } else { Some(TY_OBJECT) });
        if let Some(pname) = parent_name {
            let pid = env
                .types
                .id(pname)
                .ok_or_else(|| err(span, ErrorKind::UnknownType(pname.to_string())))?;
            match env.types.def(pid) {
                TyDef::Simple(_) => {
                    return Err(err(
                        span,
                        ErrorKind::ProtocolParentMismatch(format!(
                            "'{qualified}' can not inherit from '{pname}'"
                        )),
                    ));
                }
                TyDef::Composite(pc) => {
                    if protocol && !pc.protocol {
                        return Err(err(
                            span,
                            ErrorKind::ProtocolParentMismatch(format!(
                                "protocol '{qualified}' can not extend type '{pname}'"
                            )),
                        ));
                    }
                    if !protocol && pc.protocol {
                        return Err(err(
                            span,
                            ErrorKind::ProtocolParentMismatch(format!(
                                "type '{qualified}' can not inherit from protocol '{pname}'"
                            )),
                        ));
                    }
                }
            }
            if env.types.circular(id, pid) {
                return Err(err(span, ErrorKind::CyclicInheritance(qualified.to_string())));
            }
            if let Some(comp) = env.types.composite_mut(id) {
                comp.parent = Some(pid);
            }
        }

        // The body sees attributes and methods by unqualified name
        let saved = env.scope.clone();
        let result: Result<()> = (|| {
            let (attrs, methods) = match env.types.composite(id) {
                Some(comp) => (
                    comp.attributes
                        .iter()
                        .map(|(n, t)| (*n, t.clone()))
                        .collect::<Vec<_>>(),
                    comp.methods
                        .iter()
                        .map(|(n, f)| (*n, f.clone()))
                        .collect::<Vec<_>>(),
                ),
                None => (Vec::new(), Vec::new()),
            };
            for (n, t) in attrs {
                env.scope.insert(n, t);
            }
            for (n, f) in methods {
                env.scope.insert(n, Ty::Function(Box::new(f)));
            }
            for stmt in body.iter_mut() {
                self.visit(env, stmt, Some(qualified))?;
            }
            Ok(())
        })();
        env.scope = saved;
        result?;

        Ok(env.types.ty_of(id))
    }
}
