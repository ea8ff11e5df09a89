//! The type algebra.
//!
//! [`Ty`] is the value-level representation every pass trades in: cheap
//! to clone, compared by semantic identity. The bodies of user types
//! (attributes, methods, parent links) live exactly once, in the
//! [`TypeTable`] arena, and a `Ty::Named` is a handle into it. Parent
//! links are arena indices ([`TypeId`]), never back-pointers.
//!
//! The two operations everything else is built on:
//!
//! - [`TypeTable::compatible`]: the lax/strict compatibility predicate
//!   used for name resolution, overload selection, and every unification
//!   point in the typing pass.
//! - [`merge`]: the join of two types: lift both sides to a union,
//!   deduplicate members by canonical key, collapse singletons.

use indexmap::IndexMap;
use lirac_util::{define_idx, symbol, IndexVec, Symbol};
use std::fmt;

define_idx!(
    /// Arena slot of a definition inside the [`TypeTable`]
    pub TypeId
);

/// A type, by value.
///
/// Two types compare equal when their structural contract matches;
/// union equality is set equality over member keys, independent of
/// member order.
#[derive(Debug, Clone)]
pub enum Ty {
    /// Top type for unconstrained positions
    Any,
    /// Built-in atoms: `boolean`, `number`, `string`
    Simple(Symbol),
    /// A composite or protocol, resolved through the [`TypeTable`]
    Named(Symbol),
    /// A function signature
    Function(Box<FnTy>),
    /// At least two distinct members, deduplicated by key
    Union(Vec<Ty>),
    /// Vector of an element type; carried opaquely by the inference core
    Vector(Box<Ty>),
}

/// A function signature.
///
/// `params` preserves declaration order. `variants` is the set of
/// concrete signatures that survived trial checking; when it is empty,
/// the Cartesian enumeration of the union axes is the overload set.
#[derive(Debug, Clone, PartialEq)]
pub struct FnTy {
    pub name: Symbol,
    pub params: IndexMap<Symbol, Ty>,
    pub ret: Ty,
    pub variants: Vec<FnTy>,
}

impl FnTy {
    /// A fresh signature with the given parameters and return type
    pub fn new(name: Symbol, params: IndexMap<Symbol, Ty>, ret: Ty) -> Self {
        Self {
            name,
            params,
            ret,
            variants: Vec::new(),
        }
    }

    /// A signature with every position unconstrained
    pub fn stub(name: Symbol) -> Self {
        Self::new(name, IndexMap::new(), Ty::Any)
    }

    /// The overload set callers select against: trial-validated
    /// variants if any were recorded, else the Cartesian enumeration
    /// of the union axes.
    pub fn alternatives(&self) -> Vec<FnTy> {
        if self.variants.is_empty() {
            crate::alternate::alternate(self).collect()
        } else {
            self.variants.clone()
        }
    }
}

impl fmt::Display for FnTy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        for (i, (name, ty)) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}: {}", name, ty)?;
        }
        write!(f, ") -> {}", self.ret)
    }
}

impl Ty {
    /// Canonical key used to deduplicate union members
    pub fn key(&self) -> String {
        match self {
            Ty::Any => "any".to_string(),
            Ty::Simple(n) | Ty::Named(n) => n.as_str().to_string(),
            Ty::Function(f) => f.name.as_str().to_string(),
            Ty::Union(ms) => {
                let mut keys: Vec<_> = ms.iter().map(Ty::key).collect();
                keys.sort();
                keys.join(" | ")
            }
            Ty::Vector(e) => format!("{}[]", e.key()),
        }
    }

    /// The name this type is known by, if it has one
    pub fn name(&self) -> Option<Symbol> {
        match self {
            Ty::Simple(n) | Ty::Named(n) => Some(*n),
            Ty::Function(f) => Some(f.name),
            _ => None,
        }
    }

    /// The members a join or an enumeration ranges over: union members
    /// for a union, the type itself otherwise.
    pub fn branches(&self) -> Vec<&Ty> {
        match self {
            Ty::Union(ms) => ms.iter().collect(),
            other => vec![other],
        }
    }

    /// True when narrowing is finished for this position: no `Any` and
    /// no union at the top level.
    pub fn is_concrete(&self) -> bool {
        !matches!(self, Ty::Any | Ty::Union(_))
    }

    /// Build a union from members, flattening nested unions and
    /// deduplicating by key. A would-be singleton collapses to its
    /// member; an empty list is `Any`.
    pub fn union_of(members: Vec<Ty>) -> Ty {
        let mut seen: IndexMap<String, Ty> = IndexMap::new();
        for m in members {
            match m {
                Ty::Union(inner) => {
                    for t in inner {
                        seen.entry(t.key()).or_insert(t);
                    }
                }
                t => {
                    seen.entry(t.key()).or_insert(t);
                }
            }
        }
        let mut out: Vec<Ty> = seen.into_values().collect();
        match out.len() {
            0 => Ty::Any,
            1 => out.pop().unwrap(),
            _ => Ty::Union(out),
        }
    }

}

impl PartialEq for Ty {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Ty::Any, Ty::Any) => true,
            (Ty::Simple(a), Ty::Simple(b)) => a == b,
            (Ty::Named(a), Ty::Named(b)) => a == b,
            (Ty::Function(a), Ty::Function(b)) => a == b,
            (Ty::Vector(a), Ty::Vector(b)) => a == b,
            (Ty::Union(a), Ty::Union(b)) => {
                if a.len() != b.len() {
                    return false;
                }
                // Set equality by canonical key, order-independent
                a.iter().all(|m| {
                    let k = m.key();
                    b.iter().any(|n| n.key() == k)
                })
            }
            _ => false,
        }
    }
}

impl Eq for Ty {}

impl fmt::Display for Ty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ty::Any => write!(f, "any"),
            Ty::Simple(n) | Ty::Named(n) => write!(f, "{}", n),
            Ty::Function(fun) => write!(f, "{}", fun),
            Ty::Union(ms) => {
                for (i, m) in ms.iter().enumerate() {
                    if i > 0 {
                        write!(f, " | ")?;
                    }
                    write!(f, "{}", m)?;
                }
                Ok(())
            }
            Ty::Vector(e) => write!(f, "{}[]", e),
        }
    }
}

/// Combine two types into a single covering type.
///
/// `Any` means "not yet constrained" and is the identity of the join.
pub fn merge(a: &Ty, b: &Ty) -> Ty {
    match (a, b) {
        (Ty::Any, other) | (other, Ty::Any) => other.clone(),
        _ => {
            let mut members: Vec<Ty> = Vec::new();
            members.extend(a.branches().into_iter().cloned());
            members.extend(b.branches().into_iter().cloned());
            Ty::union_of(members)
        }
    }
}

// ============================================================================
// TYPE ARENA
// ============================================================================

/// One arena slot: a named atom or a composite/protocol body.
#[derive(Debug, Clone, PartialEq)]
pub enum TyDef {
    /// A built-in atom (`boolean`, `number`, `string`)
    Simple(Symbol),
    /// A user-declared composite or protocol
    Composite(CompositeTy),
}

impl TyDef {
    /// The primary (qualified) name of this definition
    pub fn name(&self) -> Symbol {
        match self {
            TyDef::Simple(n) => *n,
            TyDef::Composite(c) => c.name,
        }
    }

    /// True for protocol definitions
    pub fn is_protocol(&self) -> bool {
        matches!(self, TyDef::Composite(c) if c.protocol)
    }
}

/// A user-declared nominal type or structural protocol.
///
/// `parent` is an index into the owning [`TypeTable`]; the chain is
/// acyclic and, for non-protocols, terminates at the builtin `object`.
#[derive(Debug, Clone, PartialEq)]
pub struct CompositeTy {
    /// Qualified name (dotted path of enclosing types)
    pub name: Symbol,
    pub attributes: IndexMap<Symbol, Ty>,
    pub methods: IndexMap<Symbol, FnTy>,
    pub parent: Option<TypeId>,
    pub protocol: bool,
}

impl CompositeTy {
    /// An empty composite shell, as the collect pass introduces it
    pub fn stub(name: Symbol, protocol: bool) -> Self {
        Self {
            name,
            attributes: IndexMap::new(),
            methods: IndexMap::new(),
            parent: None,
            protocol,
        }
    }
}

/// The type registry: a flat arena of definitions plus a name index.
///
/// The name index maps both the qualified and, when unambiguous, the
/// short form of every declaration to the same arena slot, so `A.B` and
/// `B` resolve to one definition.
#[derive(Debug, Clone, Default)]
pub struct TypeTable {
    defs: IndexVec<TypeId, TyDef>,
    names: IndexMap<Symbol, TypeId>,
}

impl TypeTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a definition under its primary name
    pub fn define(&mut self, name: Symbol, def: TyDef) -> TypeId {
        let id = self.defs.push(def);
        self.names.insert(name, id);
        id
    }

    /// Register an extra name for an existing slot. First registration
    /// wins; an alias never shadows a primary definition.
    pub fn alias(&mut self, name: Symbol, id: TypeId) {
        self.names.entry(name).or_insert(id);
    }

    /// True when `name` resolves to a definition
    pub fn contains(&self, name: Symbol) -> bool {
        self.names.contains_key(&name)
    }

    /// Resolve a name to its arena slot
    pub fn id(&self, name: Symbol) -> Option<TypeId> {
        self.names.get(&name).copied()
    }

    pub fn def(&self, id: TypeId) -> &TyDef {
        &self.defs[id]
    }

    pub fn lookup(&self, name: Symbol) -> Option<&TyDef> {
        self.id(name).map(|id| &self.defs[id])
    }

    /// The composite body behind an arena slot, if it is one
    pub fn composite(&self, id: TypeId) -> Option<&CompositeTy> {
        match &self.defs[id] {
            TyDef::Composite(c) => Some(c),
            TyDef::Simple(_) => None,
        }
    }

    pub fn composite_mut(&mut self, id: TypeId) -> Option<&mut CompositeTy> {
        match &mut self.defs[id] {
            TyDef::Composite(c) => Some(c),
            TyDef::Simple(_) => None,
        }
    }

    pub fn composite_by_name(&self, name: Symbol) -> Option<&CompositeTy> {
        self.id(name).and_then(|id| self.composite(id))
    }

    /// The `Ty` value denoting a registered definition
    pub fn ty_of(&self, id: TypeId) -> Ty {
        match &self.defs[id] {
            TyDef::Simple(n) => Ty::Simple(*n),
            TyDef::Composite(c) => Ty::Named(c.name),
        }
    }

    /// Resolve a name to its `Ty` value
    pub fn ty_for(&self, name: Symbol) -> Option<Ty> {
        self.id(name).map(|id| self.ty_of(id))
    }

    /// Iterate over every definition in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (TypeId, &TyDef)> {
        self.defs.iter_enumerated()
    }

    // ------------------------------------------------------------------------
    // Member lookup
    // ------------------------------------------------------------------------

    /// Look a field or method up through the inheritance chain:
    /// attributes first, then methods, then the parent.
    pub fn member(&self, id: TypeId, field: Symbol) -> Option<Ty> {
        let mut cursor = Some(id);
        let mut fuel = self.defs.len() + 1;
        while let Some(cur) = cursor {
            let comp = self.composite(cur)?;
            if let Some(ty) = comp.attributes.get(&field) {
                return Some(ty.clone());
            }
            if let Some(fun) = comp.methods.get(&field) {
                return Some(Ty::Function(Box::new(fun.clone())));
            }
            cursor = comp.parent;
            // A malformed cycle must not hang the lookup
            fuel -= 1;
            if fuel == 0 {
                return None;
            }
        }
        None
    }

    // ------------------------------------------------------------------------
    // Inheritance walks
    // ------------------------------------------------------------------------

    /// True when `from` can be used where `to` is expected by walking
    /// `from`'s parent chain.
    pub fn castable(&self, from: TypeId, to: TypeId) -> bool {
        let mut cursor = Some(from);
        let mut fuel = self.defs.len() + 1;
        while let Some(cur) = cursor {
            if cur == to {
                return true;
            }
            cursor = self.composite(cur).and_then(|c| c.parent);
            fuel -= 1;
            if fuel == 0 {
                return false;
            }
        }
        false
    }

    /// Would setting `parent` on `of` close a cycle?
    pub fn circular(&self, of: TypeId, parent: TypeId) -> bool {
        let mut cursor = Some(parent);
        let mut fuel = self.defs.len() + 1;
        while let Some(cur) = cursor {
            if cur == of {
                return true;
            }
            cursor = self.composite(cur).and_then(|c| c.parent);
            fuel -= 1;
            if fuel == 0 {
                return true;
            }
        }
        false
    }

    // ------------------------------------------------------------------------
    // Protocol implementation
    // ------------------------------------------------------------------------

    /// Structural implementation check: every attribute and method of
    /// the protocol must be covered by the candidate (through its
    /// parent chain), and the protocol's own parent must be covered
    /// too. Methods compare by arity, parameter types, and return type;
    /// the implicit receiver is never part of a parameter list.
    pub fn implemented_by(&self, proto: TypeId, candidate: TypeId) -> bool {
        let Some(p) = self.composite(proto) else {
            return false;
        };
        for (name, want) in &p.attributes {
            match self.member(candidate, *name) {
                Some(have) => {
                    if !self.compatible(&have, want, false) {
                        return false;
                    }
                }
                None => return false,
            }
        }
        for (name, want) in &p.methods {
            match self.member(candidate, *name) {
                Some(Ty::Function(have)) => {
                    if !self.fn_compatible(&have, want, false) {
                        return false;
                    }
                }
                _ => return false,
            }
        }
        match p.parent {
            Some(pp) => self.implemented_by(pp, candidate),
            None => true,
        }
    }

    fn fn_compatible(&self, a: &FnTy, b: &FnTy, strict: bool) -> bool {
        a.params.len() == b.params.len()
            && self.compatible(&a.ret, &b.ret, strict)
            && a.params
                .values()
                .zip(b.params.values())
                .all(|(x, y)| self.compatible(x, y, strict))
    }

    // ------------------------------------------------------------------------
    // Compatibility
    // ------------------------------------------------------------------------

    /// The key predicate of the core.
    ///
    /// Lax mode answers "can these two meet at one program position";
    /// strict mode is semantic identity (name equality for named types,
    /// set equality for unions).
    pub fn compatible(&self, a: &Ty, b: &Ty, strict: bool) -> bool {
        match (a, b) {
            (Ty::Any, Ty::Any) => true,
            (Ty::Any, _) | (_, Ty::Any) => !strict,

            (Ty::Union(xs), Ty::Union(ys)) if strict => {
                xs.len() == ys.len()
                    && xs.iter().all(|x| ys.iter().any(|y| self.compatible(x, y, true)))
            }
            // Strict compatibility never crosses the union boundary
            (Ty::Union(_), _) | (_, Ty::Union(_)) if strict => false,
            (Ty::Union(xs), other) => xs.iter().any(|x| self.compatible(x, other, false)),
            (other, Ty::Union(ys)) => ys.iter().any(|y| self.compatible(other, y, false)),

            (Ty::Simple(m), Ty::Simple(n)) => m == n,

            (Ty::Function(f), Ty::Function(g)) => self.fn_compatible(f, g, strict),

            (Ty::Vector(x), Ty::Vector(y)) => self.compatible(x, y, strict),

            // Named pairs resolve through the arena
            _ => self.named_compatible(a, b, strict),
        }
    }

    fn named_compatible(&self, a: &Ty, b: &Ty, strict: bool) -> bool {
        let (Some(na), Some(nb)) = (a.name(), b.name()) else {
            return false;
        };
        let (ia, ib) = match (self.id(na), self.id(nb)) {
            (Some(x), Some(y)) => (x, y),
            // Unresolved references fall back to name identity
            _ => return na == nb,
        };
        if strict {
            return ia == ib;
        }
        let pa = self.defs[ia].is_protocol();
        let pb = self.defs[ib].is_protocol();
        match (pa, pb) {
            // Protocol ~ Protocol: structural coverage
            (true, true) => ia == ib || self.implemented_by(ia, ib),
            // Protocol ~ Composite (either side): implementation
            (true, false) => self.implemented_by(ia, ib),
            (false, true) => self.implemented_by(ib, ia),
            // Composite ~ Composite: castable either direction
            (false, false) => self.castable(ia, ib) || self.castable(ib, ia),
        }
    }

    // ------------------------------------------------------------------------
    // Candidate universes
    // ------------------------------------------------------------------------

    /// Every inhabitable named type: non-protocol definitions minus the
    /// inheritance root `object`. This is what an unconstrained (`Any`)
    /// position can stand for.
    pub fn universe(&self) -> Vec<Ty> {
        self.defs
            .iter_enumerated()
            .filter(|(_, def)| !def.is_protocol() && def.name() != symbol::TY_OBJECT)
            .map(|(id, _)| self.ty_of(id))
            .collect()
    }

    /// The composites known to implement a protocol
    pub fn implementors(&self, proto: TypeId) -> Vec<Ty> {
        self.defs
            .iter_enumerated()
            .filter(|&(id, def)| match def {
                TyDef::Composite(c) => !c.protocol && self.implemented_by(proto, id),
                TyDef::Simple(_) => false,
            })
            .map(|(id, _)| self.ty_of(id))
            .collect()
    }
}
