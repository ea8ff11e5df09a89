//! lirac-util - Core Utilities and Foundation Types
//!
//! This crate provides the foundation types shared by every phase of the
//! Lira compiler:
//!
//! - [`Symbol`]: interned string handles with O(1) comparison, backed by
//!   a global lock-free string table. All Lira keywords, builtin type and
//!   value names, and the synthetic receiver names are pre-interned with
//!   stable indices.
//! - [`Span`]: source locations as byte ranges plus 1-based line/column
//!   information for diagnostics.
//! - [`IndexVec`] / [`Idx`]: vectors with typed indices, so an index into
//!   the type arena can never be confused with an index into anything
//!   else. New index types are declared with [`define_idx!`].
//!
//! All of these are zero-cost abstractions: a `Symbol` is a `u32`, a
//! typed index compiles to the underlying integer, and `Span` is a plain
//! `Copy` struct.

pub mod index_vec;
pub mod span;
pub mod symbol;

pub use index_vec::{Idx, IndexVec};
pub use span::Span;
pub use symbol::Symbol;

// Re-export commonly used hash maps
pub use rustc_hash::FxHashMap;
pub use rustc_hash::FxHashSet;
