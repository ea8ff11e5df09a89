//! The transform pass.
//!
//! A multi-stage rewriter over the collected program. Each sub-stage is
//! one entry of [`TransformStage`]; the orchestrator pairs a collect
//! sub-stage with a transform sub-stage (see [`SCHEDULE`]) and runs the
//! typing pass to quiescence after each pair.
//!
//! - `CollectFunctions` maps every qualified function name to its
//!   declaration site; attribute trimming uses it to find constructors
//!   and signature guessing uses it as its worklist.
//! - `TrimAttributes` rewrites each field-with-default into a plain
//!   attribute plus a synthetic `@self.field := value` statement in the
//!   constructor, just before its trailing statement.
//! - `CollectParams` maps every qualified attribute name to the list of
//!   concrete types it could take (protocols expanded to implementors,
//!   `Any` to the universe).
//! - `GuessParams` tries each attribute combination against the type
//!   body and narrows every attribute to the merge of the survivors.
//! - `GuessArguments` enumerates a function's signature alternatives,
//!   trial-checks the body under each, narrows the axes to the merges
//!   of the survivors, and records the surviving concrete signatures as
//!   the function's overload variants.
//!
//! Trial checks run against an environment snapshot and treat a
//! `SemanticError` as "this hypothesis is wrong": the one place in the
//! core where an error is data instead of a failure.

use crate::alternate::Cartesian;
use crate::ast::{Node, NodeKind};
use crate::env::{qualify, Env};
use crate::error::{ErrorKind, Result, SemanticError};
use crate::types::{FnTy, Ty};
use crate::typing::TypingPass;
use indexmap::IndexMap;
use lirac_util::symbol::ID_CTOR;
use lirac_util::{FxHashMap, Span, Symbol};

/// The transform sub-stages, in the order the schedule may invoke them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransformStage {
    CollectFunctions,
    TrimAttributes,
    CollectParams,
    GuessParams,
    GuessArguments,
}

/// The fixed four-stage schedule. `CollectFunctions`/`CollectParams`
/// are the paired collect sub-stages the orchestrator runs before each
/// entry; the ordering is load-bearing: defaults are hoisted before any
/// signature is guessed, and signatures are re-guessed after attribute
/// narrowing may have shifted member types.
pub const SCHEDULE: [TransformStage; 4] = [
    TransformStage::TrimAttributes,
    TransformStage::GuessArguments,
    TransformStage::GuessParams,
    TransformStage::GuessArguments,
];

/// Qualified function name → declaration site
pub type CollectedFunctions = FxHashMap<Symbol, Span>;

/// Qualified attribute name → candidate types
pub type CollectedParams = FxHashMap<Symbol, Vec<Ty>>;

pub struct TransformPass;

impl TransformPass {
    // ------------------------------------------------------------------------
    // COLLECT_FUNCTIONS
    // ------------------------------------------------------------------------

    /// Map every reachable function declaration to its site. Protocol
    /// bodies are declared contracts, not inferable code, and are not
    /// walked.
    pub fn collect_functions(root: &Node) -> CollectedFunctions {
        let mut acc = CollectedFunctions::default();
        Self::walk_functions(root, None, &mut acc);
        acc
    }

    fn walk_functions(node: &Node, owner: Option<Symbol>, acc: &mut CollectedFunctions) {
        match &node.kind {
            NodeKind::Block(stmts) => {
                for stmt in stmts {
                    Self::walk_functions(stmt, owner, acc);
                }
            }
            NodeKind::Function(decl) => {
                acc.insert(qualify(owner, decl.name), node.span);
            }
            NodeKind::Type(decl) => {
                let qualified = qualify(owner, decl.name);
                for stmt in &decl.body {
                    Self::walk_functions(stmt, Some(qualified), acc);
                }
            }
            NodeKind::Let(binding) => {
                for param in &binding.params {
                    Self::walk_functions(param, owner, acc);
                }
            }
            NodeKind::Param(param) => {
                if let Some(value) = &param.value {
                    Self::walk_functions(value, owner, acc);
                }
            }
            _ => {}
        }
    }

    // ------------------------------------------------------------------------
    // TRIM_ATTRIBUTES
    // ------------------------------------------------------------------------

    /// Hoist every field default into the owning constructor
    pub fn trim_attributes(root: &mut Node, collected: &CollectedFunctions) -> Result<()> {
        Self::walk_trim(root, None, collected)
    }

    fn walk_trim(
        node: &mut Node,
        owner: Option<Symbol>,
        collected: &CollectedFunctions,
    ) -> Result<()> {
        match &mut node.kind {
            NodeKind::Block(stmts) => {
                for stmt in stmts {
                    Self::walk_trim(stmt, owner, collected)?;
                }
                Ok(())
            }
            NodeKind::Type(decl) => {
                let qualified = qualify(owner, decl.name);
                let span = node.span;

                // Pull the initializers out, leaving plain attributes
                let mut inits: Vec<(Symbol, Node)> = Vec::new();
                for stmt in &mut decl.body {
                    if let NodeKind::Param(param) = &mut stmt.kind {
                        if let Some(value) = param.value.take() {
                            inits.push((param.name, *value));
                        }
                    }
                }

                if !inits.is_empty() {
                    let ctor_name = qualify(Some(qualified), ID_CTOR);
                    if !collected.contains_key(&ctor_name) {
                        return Err(SemanticError::new(
                            span,
                            ErrorKind::FallThrough(format!(
                                "type '{qualified}' has no constructor"
                            )),
                        ));
                    }
                    let ctor = decl
                        .body
                        .iter_mut()
                        .find_map(|stmt| match &mut stmt.kind {
                            NodeKind::Function(f) if f.name == ID_CTOR => Some(f),
                            _ => None,
                        })
                        .ok_or_else(|| {
                            SemanticError::new(
                                span,
                                ErrorKind::FallThrough(format!(
                                    "type '{qualified}' has no constructor"
                                )),
                            )
                        })?;
                    let NodeKind::Block(stmts) = &mut ctor.body.kind else {
                        return Err(SemanticError::new(
                            span,
                            ErrorKind::FallThrough(
                                "constructor body is not a block".into(),
                            ),
                        ));
                    };
                    for (name, value) in inits {
                        let vspan = value.span;
                        let mut assignment = Node::assign(
                            Node::class_access(Node::variable("@self"), name.as_str()),
                            value,
                        );
                        assignment.span = vspan;
                        let at = stmts.len().saturating_sub(1);
                        stmts.insert(at, assignment);
                    }
                }

                for stmt in &mut decl.body {
                    Self::walk_trim(stmt, Some(qualified), collected)?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    // ------------------------------------------------------------------------
    // COLLECT_PARAMS
    // ------------------------------------------------------------------------

    /// Map every attribute of every type to its candidate list
    pub fn collect_params(env: &Env, root: &Node) -> CollectedParams {
        let mut acc = CollectedParams::default();
        Self::walk_params(env, root, None, &mut acc);
        acc
    }

    fn walk_params(env: &Env, node: &Node, owner: Option<Symbol>, acc: &mut CollectedParams) {
        match &node.kind {
            NodeKind::Block(stmts) => {
                for stmt in stmts {
                    Self::walk_params(env, stmt, owner, acc);
                }
            }
            NodeKind::Type(decl) => {
                let qualified = qualify(owner, decl.name);
                if let Some(comp) = env.types.composite_by_name(qualified) {
                    for (name, ty) in &comp.attributes {
                        acc.insert(qualify(Some(qualified), *name), env.candidates(ty));
                    }
                }
                for stmt in &decl.body {
                    Self::walk_params(env, stmt, Some(qualified), acc);
                }
            }
            _ => {}
        }
    }

    // ------------------------------------------------------------------------
    // GUESS_PARAMS
    // ------------------------------------------------------------------------

    /// Narrow every attribute to the merge of the candidate types under
    /// which the type body trial-checks
    pub fn guess_params(
        env: &mut Env,
        root: &mut Node,
        collected: &CollectedParams,
    ) -> Result<()> {
        Self::walk_guess_params(env, root, None, collected)
    }

    fn walk_guess_params(
        env: &mut Env,
        node: &mut Node,
        owner: Option<Symbol>,
        collected: &CollectedParams,
    ) -> Result<()> {
        if matches!(node.kind, NodeKind::Type(_)) {
            Self::guess_type(env, node, owner, collected)?;
        }
        match &mut node.kind {
            NodeKind::Block(stmts) => {
                for stmt in stmts {
                    Self::walk_guess_params(env, stmt, owner, collected)?;
                }
                Ok(())
            }
            NodeKind::Type(decl) => {
                let qualified = qualify(owner, decl.name);
                for stmt in &mut decl.body {
                    Self::walk_guess_params(env, stmt, Some(qualified), collected)?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn guess_type(
        env: &mut Env,
        node: &mut Node,
        owner: Option<Symbol>,
        collected: &CollectedParams,
    ) -> Result<()> {
        let span = node.span;
        let NodeKind::Type(decl) = &node.kind else {
            return Ok(());
        };
        let qualified = qualify(owner, decl.name);
        let Some(id) = env.types.id(qualified) else {
            return Ok(());
        };

        let attributes: Vec<(Symbol, Ty)> = match env.types.composite(id) {
            Some(comp) => comp
                .attributes
                .iter()
                .map(|(n, t)| (*n, t.clone()))
                .collect(),
            None => Vec::new(),
        };
        if attributes.is_empty() {
            return Ok(());
        }

        let axes: Vec<Vec<Ty>> = attributes
            .iter()
            .map(|(name, current)| {
                collected
                    .get(&qualify(Some(qualified), *name))
                    .cloned()
                    .unwrap_or_else(|| vec![current.clone()])
            })
            .collect();

        let mut survivors: Vec<Vec<Ty>> = vec![Vec::new(); attributes.len()];
        for combo in Cartesian::new(axes.clone()) {
            let mut trial = env.snapshot();
            if let Some(comp) = trial.types.composite_mut(id) {
                for ((name, _), ty) in attributes.iter().zip(&combo) {
                    comp.attributes.insert(*name, ty.clone());
                }
            }
            if TypingPass::trial(&mut trial, node, owner).is_ok() {
                for (slot, ty) in survivors.iter_mut().zip(&combo) {
                    if !slot.iter().any(|s| s.key() == ty.key()) {
                        slot.push(ty.clone());
                    }
                }
            }
        }

        for (index, (name, _)) in attributes.iter().enumerate() {
            if survivors[index].is_empty() {
                return Err(SemanticError::new(
                    span,
                    ErrorKind::CannotGuessAttribute {
                        name: qualify(Some(qualified), *name).to_string(),
                        candidates: describe_candidates(&axes[index]),
                    },
                ));
            }
        }

        if let Some(comp) = env.types.composite_mut(id) {
            for ((name, _), slot) in attributes.iter().zip(survivors) {
                comp.attributes.insert(*name, Ty::union_of(slot));
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // GUESS_ARGUMENTS
    // ------------------------------------------------------------------------

    /// Narrow every collected function to the signatures its body
    /// admits
    pub fn guess_arguments(
        env: &mut Env,
        root: &mut Node,
        collected: &CollectedFunctions,
    ) -> Result<()> {
        Self::walk_guess_arguments(env, root, None, collected)
    }

    fn walk_guess_arguments(
        env: &mut Env,
        node: &mut Node,
        owner: Option<Symbol>,
        collected: &CollectedFunctions,
    ) -> Result<()> {
        if matches!(node.kind, NodeKind::Function(_)) {
            Self::guess_function(env, node, owner, collected)?;
            return Ok(());
        }
        match &mut node.kind {
            NodeKind::Block(stmts) => {
                for stmt in stmts {
                    Self::walk_guess_arguments(env, stmt, owner, collected)?;
                }
                Ok(())
            }
            NodeKind::Type(decl) => {
                let qualified = qualify(owner, decl.name);
                for stmt in &mut decl.body {
                    Self::walk_guess_arguments(env, stmt, Some(qualified), collected)?;
                }
                Ok(())
            }
            NodeKind::Let(binding) => {
                for param in &mut binding.params {
                    Self::walk_guess_arguments(env, param, owner, collected)?;
                }
                Ok(())
            }
            NodeKind::Param(param) => {
                if let Some(value) = &mut param.value {
                    Self::walk_guess_arguments(env, value, owner, collected)?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn guess_function(
        env: &mut Env,
        node: &mut Node,
        owner: Option<Symbol>,
        collected: &CollectedFunctions,
    ) -> Result<()> {
        let span = node.span;
        let qualified = {
            let NodeKind::Function(decl) = &node.kind else {
                return Ok(());
            };
            qualify(owner, decl.name)
        };
        if !collected.contains_key(&qualified) {
            return Ok(());
        }
        let Some(fun) = env.function(qualified).cloned() else {
            return Ok(());
        };

        let names: Vec<Symbol> = fun.params.keys().copied().collect();
        let mut axes: Vec<Vec<Ty>> = fun.params.values().map(|t| env.candidates(t)).collect();
        axes.push(env.candidates(&fun.ret));

        let mut survivors: Vec<FnTy> = Vec::new();
        for mut combo in Cartesian::new(axes) {
            let ret = combo.pop().expect("return axis is always present");
            let params: IndexMap<Symbol, Ty> = names.iter().copied().zip(combo).collect();
            let alternative = FnTy::new(fun.name, params, ret);

            let mut trial = env.snapshot();
            trial.set_function(qualified, alternative.clone());
            if TypingPass::trial(&mut trial, node, owner).is_ok() {
                survivors.push(alternative);
            }
        }

        if survivors.is_empty() {
            return Err(SemanticError::new(
                span,
                ErrorKind::CannotGuessSignature(qualified.to_string()),
            ));
        }

        // Narrow each axis to the merge of its surviving members and
        // keep the correlated signatures as the overload set
        let ret = Ty::union_of(survivors.iter().map(|s| s.ret.clone()).collect());
        let mut params: IndexMap<Symbol, Ty> = IndexMap::new();
        for (index, name) in names.iter().enumerate() {
            let observed: Vec<Ty> = survivors
                .iter()
                .filter_map(|s| s.params.get_index(index).map(|(_, t)| t.clone()))
                .collect();
            params.insert(*name, Ty::union_of(observed));
        }
        let mut updated = FnTy::new(fun.name, params.clone(), ret);
        updated.variants = survivors;

        if let NodeKind::Function(decl) = &mut node.kind {
            for (index, pnode) in decl.params.iter_mut().enumerate() {
                if let Some((_, ty)) = params.get_index(index) {
                    pnode.ty = Some(ty.clone());
                }
            }
        }
        env.set_function(qualified, updated);
        Ok(())
    }
}

/// "a, b or c": the shape complaint messages use
pub fn describe_candidates(candidates: &[Ty]) -> String {
    match candidates {
        [] => String::from("none"),
        [only] => only.to_string(),
        [head @ .., last] => {
            let head = head
                .iter()
                .map(Ty::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            format!("{head} or {last}")
        }
    }
}
