//! The semantic environment.
//!
//! One [`Env`] lives for the duration of a compilation unit. It holds
//! the two name tables of the analysis, the scope and the type
//! registry, with the scope split in two: `scope` maps variable names
//! to value types and is *layered* (child scopes are snapshots that are
//! dropped on exit), while `functions` maps qualified function names to
//! signatures and is never layered, so a narrowing recorded while
//! typing inside a child scope survives it. The two tables form one
//! namespace for redefinition purposes.
//!
//! A full [`Env::snapshot`] (scope + functions + registry) is what
//! trial type-checking runs against, so a failed hypothesis cannot
//! contaminate the live environment.

use crate::types::{FnTy, Ty, TypeTable};
use indexmap::IndexMap;
use lirac_util::Symbol;

/// Join a declaration name onto its enclosing qualified path
pub fn qualify(owner: Option<Symbol>, name: Symbol) -> Symbol {
    match owner {
        None => name,
        Some(owner) => Symbol::intern(&format!("{}.{}", owner, name)),
    }
}

/// The scope and type registry of one compilation unit
#[derive(Debug, Clone, Default)]
pub struct Env {
    /// Variable name → value type (layered)
    pub scope: IndexMap<Symbol, Ty>,
    /// Qualified function name → signature (never layered)
    pub functions: IndexMap<Symbol, FnTy>,
    /// The type registry and arena
    pub types: TypeTable,
}

impl Env {
    pub fn new() -> Self {
        Self::default()
    }

    /// A full copy for trial type-checking
    pub fn snapshot(&self) -> Env {
        self.clone()
    }

    /// Entries present in `self` but not in `parent`. Harvests the
    /// body-local declarations a nested walk introduced.
    pub fn diff(&self, parent: &Env) -> Env {
        let mut out = Env::new();
        for (name, ty) in &self.scope {
            if !parent.scope.contains_key(name) {
                out.scope.insert(*name, ty.clone());
            }
        }
        for (name, fun) in &self.functions {
            if !parent.functions.contains_key(name) {
                out.functions.insert(*name, fun.clone());
            }
        }
        for (_, def) in self.types.iter() {
            if !parent.types.contains(def.name()) {
                out.types.define(def.name(), def.clone());
            }
        }
        out
    }

    /// True when `name` is already taken by a variable or a function
    pub fn contains_name(&self, name: Symbol) -> bool {
        self.scope.contains_key(&name) || self.functions.contains_key(&name)
    }

    /// Look a value name up: variables first, then functions
    pub fn value(&self, name: Symbol) -> Option<Ty> {
        if let Some(ty) = self.scope.get(&name) {
            return Some(ty.clone());
        }
        self.functions
            .get(&name)
            .map(|f| Ty::Function(Box::new(f.clone())))
    }

    pub fn function(&self, name: Symbol) -> Option<&FnTy> {
        self.functions.get(&name)
    }

    /// Bind a variable, returning the previous binding from either
    /// table (a function colliding with a variable is a redefinition)
    pub fn define_value(&mut self, name: Symbol, ty: Ty) -> Option<Ty> {
        let was = self.value(name);
        self.scope.insert(name, ty);
        was
    }

    /// Register a function signature under its qualified name
    pub fn define_function(&mut self, name: Symbol, fun: FnTy) -> Option<Ty> {
        let was = self.value(name);
        self.functions.insert(name, fun);
        was
    }

    /// Write a (possibly narrowed) signature back, keeping the owning
    /// composite's method table in sync for qualified method names.
    pub fn set_function(&mut self, qualified: Symbol, fun: FnTy) {
        if let Some((owner, short)) = qualified.as_str().rsplit_once('.') {
            let owner = Symbol::intern(owner);
            let short = Symbol::intern(short);
            if let Some(id) = self.types.id(owner) {
                if let Some(comp) = self.types.composite_mut(id) {
                    if comp.methods.contains_key(&short) {
                        comp.methods.insert(short, fun.clone());
                    }
                }
            }
        }
        self.functions.insert(qualified, fun);
    }

    // ------------------------------------------------------------------------
    // Narrowing support
    // ------------------------------------------------------------------------

    /// Resolve what an unconstrained position may stand for: `Any`
    /// becomes the union of the candidate universe; everything else is
    /// itself.
    pub fn derive(&self, ty: &Ty) -> Ty {
        match ty {
            Ty::Any => Ty::union_of(self.types.universe()),
            _ => ty.clone(),
        }
    }

    /// The concrete types a position may take, one list entry per
    /// alternative. Protocols expand to their implementors here, the
    /// point where structural typing meets concrete emission, and the
    /// list is empty when nothing implements the protocol.
    pub fn candidates(&self, ty: &Ty) -> Vec<Ty> {
        match ty {
            Ty::Any => self.types.universe(),
            Ty::Union(members) => members.clone(),
            Ty::Named(name) => match self.types.id(*name) {
                Some(id) if self.types.def(id).is_protocol() => self.types.implementors(id),
                _ => vec![ty.clone()],
            },
            _ => vec![ty.clone()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtins;
    use crate::types::{CompositeTy, TyDef};
    use lirac_util::symbol::{TY_NUMBER, TY_STRING};

    fn sym(s: &str) -> Symbol {
        Symbol::intern(s)
    }

    fn env_with_builtins() -> Env {
        let mut env = Env::new();
        builtins::install(&mut env);
        env
    }

    #[test]
    fn test_qualify() {
        assert_eq!(qualify(None, sym("f")), sym("f"));
        assert_eq!(qualify(Some(sym("Point")), sym("getX")), sym("Point.getX"));
        assert_eq!(
            qualify(Some(sym("A.B")), sym("c")),
            sym("A.B.c")
        );
    }

    #[test]
    fn test_value_lookup_checks_both_tables() {
        let mut env = Env::new();
        env.define_value(sym("x"), Ty::Simple(TY_NUMBER));
        env.define_function(sym("f"), FnTy::stub(sym("f")));

        assert_eq!(env.value(sym("x")), Some(Ty::Simple(TY_NUMBER)));
        assert!(matches!(env.value(sym("f")), Some(Ty::Function(_))));
        assert_eq!(env.value(sym("missing")), None);

        // The namespace is shared
        assert!(env.define_value(sym("f"), Ty::Simple(TY_NUMBER)).is_some());
    }

    #[test]
    fn test_snapshot_is_independent() {
        let mut env = env_with_builtins();
        let snap = env.snapshot();
        env.define_value(sym("fresh"), Ty::Simple(TY_NUMBER));
        assert!(env.value(sym("fresh")).is_some());
        assert!(snap.value(sym("fresh")).is_none());
    }

    #[test]
    fn test_diff_returns_child_only_entries() {
        let parent = env_with_builtins();
        let mut child = parent.snapshot();
        child.define_value(sym("local"), Ty::Simple(TY_STRING));
        child.define_function(sym("g"), FnTy::stub(sym("g")));

        let diff = child.diff(&parent);
        assert_eq!(diff.scope.len(), 1);
        assert!(diff.scope.contains_key(&sym("local")));
        assert_eq!(diff.functions.len(), 1);
        assert!(diff.functions.contains_key(&sym("g")));
    }

    #[test]
    fn test_derive_expands_any_to_universe() {
        let env = env_with_builtins();
        let derived = env.derive(&Ty::Any);
        match derived {
            Ty::Union(members) => {
                assert!(members.contains(&Ty::Simple(TY_NUMBER)));
                // The root is not a candidate
                assert!(!members.iter().any(|m| m.key() == "object"));
            }
            other => panic!("expected a union, got {other}"),
        }
        // Concrete types derive to themselves
        assert_eq!(env.derive(&Ty::Simple(TY_NUMBER)), Ty::Simple(TY_NUMBER));
    }

    #[test]
    fn test_candidates_expand_protocols_to_implementors() {
        let mut env = env_with_builtins();

        // An empty protocol and one composite implementing it trivially
        let proto = sym("Marker");
        env.types
            .define(proto, TyDef::Composite(CompositeTy::stub(proto, true)));
        let point = sym("Point");
        let mut c = CompositeTy::stub(point, false);
        c.parent = env.types.id(lirac_util::symbol::TY_OBJECT);
        env.types.define(point, TyDef::Composite(c));

        let cands = env.candidates(&Ty::Named(proto));
        assert!(cands.contains(&Ty::Named(point)));
        // A protocol nothing could implement yields an empty list
        let lonely = sym("Lonely");
        let mut p = CompositeTy::stub(lonely, true);
        p.methods
            .insert(sym("impossible"), FnTy::stub(sym("impossible")));
        env.types.define(lonely, TyDef::Composite(p));
        assert!(env.candidates(&Ty::Named(lonely)).is_empty());
    }

    #[test]
    fn test_set_function_syncs_method_copy() {
        let mut env = env_with_builtins();
        let point = sym("Point2");
        let mut c = CompositeTy::stub(point, false);
        c.methods.insert(sym("getX"), FnTy::stub(sym("getX")));
        let id = env.types.define(point, TyDef::Composite(c));

        let mut narrowed = FnTy::stub(sym("getX"));
        narrowed.ret = Ty::Simple(TY_NUMBER);
        env.set_function(sym("Point2.getX"), narrowed.clone());

        assert_eq!(env.function(sym("Point2.getX")), Some(&narrowed));
        let comp = env.types.composite(id).unwrap();
        assert_eq!(comp.methods.get(&sym("getX")), Some(&narrowed));
    }
}
