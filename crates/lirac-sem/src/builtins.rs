//! Built-in names pre-installed into every environment.
//!
//! The checker's precondition (every built-in name present under both
//! tables) is established here: the `object` root composite with its
//! `@ctor`, the three atoms, the `iterable` and `printable` protocols,
//! the math constants and functions, and the I/O and string helpers.

use crate::env::Env;
use crate::types::{CompositeTy, FnTy, Ty, TyDef};
use indexmap::IndexMap;
use lirac_util::symbol::{
    ID_CONCAT, ID_COS, ID_CTOR, ID_CURRENT, ID_E, ID_EXP, ID_LOG, ID_NEXT, ID_PI, ID_POW,
    ID_PRINT, ID_RAND, ID_SIN, ID_SITOS, ID_SQRT, ID_TOSTRING, TY_BOOLEAN, TY_ITERABLE,
    TY_NUMBER, TY_OBJECT, TY_PRINTABLE, TY_STRING,
};
use lirac_util::Symbol;

fn number() -> Ty {
    Ty::Simple(TY_NUMBER)
}

fn string() -> Ty {
    Ty::Simple(TY_STRING)
}

fn boolean() -> Ty {
    Ty::Simple(TY_BOOLEAN)
}

fn params(pairs: &[(&str, Ty)]) -> IndexMap<Symbol, Ty> {
    pairs
        .iter()
        .map(|(n, t)| (Symbol::intern(n), t.clone()))
        .collect()
}

/// Install every built-in name into a fresh environment
pub fn install(env: &mut Env) {
    // The root composite, with the default constructor every user type
    // ultimately inherits
    let mut object = CompositeTy::stub(TY_OBJECT, false);
    object.methods.insert(
        ID_CTOR,
        FnTy::new(ID_CTOR, IndexMap::new(), Ty::Named(TY_OBJECT)),
    );
    env.types.define(TY_OBJECT, TyDef::Composite(object));

    // Atoms
    env.types.define(TY_BOOLEAN, TyDef::Simple(TY_BOOLEAN));
    env.types.define(TY_NUMBER, TyDef::Simple(TY_NUMBER));
    env.types.define(TY_STRING, TyDef::Simple(TY_STRING));

    // protocol iterable { current(): any; next(a): boolean; }
    let mut iterable = CompositeTy::stub(TY_ITERABLE, true);
    iterable.methods.insert(
        ID_CURRENT,
        FnTy::new(ID_CURRENT, IndexMap::new(), Ty::Any),
    );
    iterable.methods.insert(
        ID_NEXT,
        FnTy::new(ID_NEXT, params(&[("a", Ty::Any)]), boolean()),
    );
    env.types.define(TY_ITERABLE, TyDef::Composite(iterable));

    // protocol printable { tostring(): string; }
    let mut printable = CompositeTy::stub(TY_PRINTABLE, true);
    printable.methods.insert(
        ID_TOSTRING,
        FnTy::new(ID_TOSTRING, IndexMap::new(), string()),
    );
    env.types.define(TY_PRINTABLE, TyDef::Composite(printable));

    // Constants
    env.scope.insert(ID_E, number());
    env.scope.insert(ID_PI, number());

    // Math functions
    for name in [ID_COS, ID_SIN, ID_EXP, ID_SQRT] {
        env.functions
            .insert(name, FnTy::new(name, params(&[("n", number())]), number()));
    }
    for name in [ID_LOG, ID_POW] {
        env.functions.insert(
            name,
            FnTy::new(name, params(&[("n", number()), ("n2", number())]), number()),
        );
    }
    env.functions
        .insert(ID_RAND, FnTy::new(ID_RAND, IndexMap::new(), number()));

    // I/O and string helpers
    let num_or_str = Ty::Union(vec![number(), string()]);
    env.functions.insert(
        ID_PRINT,
        FnTy::new(ID_PRINT, params(&[("x", num_or_str.clone())]), boolean()),
    );
    env.functions.insert(
        ID_CONCAT,
        FnTy::new(
            ID_CONCAT,
            params(&[("a", string()), ("b", string())]),
            string(),
        ),
    );
    env.functions.insert(
        ID_SITOS,
        FnTy::new(ID_SITOS, params(&[("x", num_or_str)]), string()),
    );
}
