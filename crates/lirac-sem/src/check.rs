//! The pass driver.
//!
//! [`SemanticCheck`] wires the passes together in the fixed order the
//! analysis depends on: builtins, the two collect stages, the four
//! transform stages each followed by a typing fixed point, and the
//! final complaint walk. The ordering is load-bearing and documented on
//! [`crate::transform::SCHEDULE`].

use crate::ast::{Node, NodeKind};
use crate::builtins;
use crate::collect::{CollectPass, CollectStage};
use crate::complain::ComplainPass;
use crate::env::Env;
use crate::error::{ErrorKind, Result, SemanticError};
use crate::transform::{TransformPass, TransformStage, SCHEDULE};
use crate::types::{FnTy, Ty, TypeTable};
use crate::typing::TypingPass;
use indexmap::IndexMap;
use lirac_util::Symbol;

/// The resolved program: the final environment tables, handed to
/// lowering together with the (now fully typed) AST.
#[derive(Debug)]
pub struct Semantic {
    /// Variable name → type
    pub scope: IndexMap<Symbol, Ty>,
    /// Qualified function name → narrowed signature with its overload
    /// variants
    pub functions: IndexMap<Symbol, FnTy>,
    /// The type registry
    pub types: TypeTable,
}

pub struct SemanticCheck;

impl SemanticCheck {
    /// Analyze a program. On success every typed AST node carries its
    /// inferred type and the returned tables hold every declared and
    /// built-in name.
    pub fn check(ast: &mut Node) -> Result<Semantic> {
        if !matches!(ast.kind, NodeKind::Block(_)) {
            return Err(SemanticError::new(
                ast.span,
                ErrorKind::FallThrough("program root must be a block".into()),
            ));
        }

        let mut env = Env::new();
        builtins::install(&mut env);

        CollectPass::new(CollectStage::Collect).run(&mut env, ast)?;
        CollectPass::new(CollectStage::Link).run(&mut env, ast)?;

        for stage in SCHEDULE {
            match stage {
                TransformStage::TrimAttributes => {
                    let functions = TransformPass::collect_functions(ast);
                    TransformPass::trim_attributes(ast, &functions)?;
                }
                TransformStage::GuessArguments => {
                    let functions = TransformPass::collect_functions(ast);
                    TransformPass::guess_arguments(&mut env, ast, &functions)?;
                }
                TransformStage::GuessParams => {
                    let params = TransformPass::collect_params(&env, ast);
                    TransformPass::guess_params(&mut env, ast, &params)?;
                }
                // The collect sub-stages never appear as schedule
                // entries on their own; they pair into the arms above
                TransformStage::CollectFunctions | TransformStage::CollectParams => {}
            }
            loop {
                if TypingPass::run(&mut env, ast)? == 0 {
                    break;
                }
            }
        }

        ComplainPass::run(&env, ast)?;

        Ok(Semantic {
            scope: env.scope,
            functions: env.functions,
            types: env.types,
        })
    }
}

/// Analyze a program; the single entry point of the crate
pub fn check(ast: &mut Node) -> Result<Semantic> {
    SemanticCheck::check(ast)
}
