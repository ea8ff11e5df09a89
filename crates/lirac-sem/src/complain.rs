//! The complain pass.
//!
//! The final walk over the program. After the transform schedule has
//! run to quiescence, every attribute of every type must have narrowed
//! to a single type; an attribute still carrying a union is reported
//! with its candidate list. Any other residual ambiguity is a bug in
//! the transform schedule, not a user error, so nothing else is
//! checked here.

use crate::ast::{Node, NodeKind};
use crate::env::{qualify, Env};
use crate::error::{ErrorKind, Result, SemanticError};
use crate::transform::describe_candidates;
use crate::types::Ty;
use lirac_util::Symbol;

pub struct ComplainPass;

impl ComplainPass {
    pub fn run(env: &Env, root: &Node) -> Result<()> {
        Self::visit(env, root, None)
    }

    fn visit(env: &Env, node: &Node, owner: Option<Symbol>) -> Result<()> {
        match &node.kind {
            NodeKind::Block(stmts) => {
                for stmt in stmts {
                    Self::visit(env, stmt, owner)?;
                }
                Ok(())
            }

            NodeKind::Type(decl) => {
                let qualified = qualify(owner, decl.name);
                for stmt in &decl.body {
                    Self::visit(env, stmt, Some(qualified))?;
                }
                Ok(())
            }

            NodeKind::Param(param) => {
                let Some(owner) = owner else {
                    return Ok(());
                };
                if let Some(comp) = env.types.composite_by_name(owner) {
                    if let Some(Ty::Union(members)) = comp.attributes.get(&param.name) {
                        return Err(SemanticError::new(
                            node.span,
                            ErrorKind::CannotGuessAttribute {
                                name: qualify(Some(owner), param.name).to_string(),
                                candidates: describe_candidates(members),
                            },
                        ));
                    }
                }
                Ok(())
            }

            _ => Ok(()),
        }
    }
}
