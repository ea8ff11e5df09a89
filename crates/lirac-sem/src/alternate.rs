//! Alternative enumeration.
//!
//! A union-parameterized signature stands for a whole family of
//! concrete signatures: one per element of the Cartesian product of its
//! union axes. [`alternate`] enumerates that family lazily, yielding
//! each concrete [`FnTy`] exactly once. The axis order is observable:
//! parameters vary in declaration order with the first parameter as the
//! innermost (fastest) axis and the return type as the outermost.
//!
//! The same odometer ([`Cartesian`]) drives attribute-combination
//! enumeration in the transform pass.

use crate::types::{FnTy, Ty};
use indexmap::IndexMap;
use lirac_util::Symbol;

/// The leaf behavior of enumeration: a union yields once per member,
/// anything else yields once as itself.
pub fn axis(ty: &Ty) -> Vec<Ty> {
    match ty {
        Ty::Union(members) => members.clone(),
        other => vec![other.clone()],
    }
}

/// Lazy odometer over a list of axes.
///
/// Yields one `Vec<Ty>` per element of the Cartesian product, with
/// axis 0 varying fastest. An empty axis makes the whole product
/// empty; an empty axis *list* yields a single empty combination.
pub struct Cartesian {
    axes: Vec<Vec<Ty>>,
    index: Vec<usize>,
    done: bool,
}

impl Cartesian {
    pub fn new(axes: Vec<Vec<Ty>>) -> Self {
        let done = axes.iter().any(|a| a.is_empty());
        let index = vec![0; axes.len()];
        Self { axes, index, done }
    }

    /// The number of combinations this odometer will yield
    pub fn count_total(&self) -> usize {
        if self.axes.iter().any(|a| a.is_empty()) {
            0
        } else {
            self.axes.iter().map(Vec::len).product()
        }
    }
}

impl Iterator for Cartesian {
    type Item = Vec<Ty>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let combo: Vec<Ty> = self
            .index
            .iter()
            .zip(&self.axes)
            .map(|(&i, axis)| axis[i].clone())
            .collect();

        // Advance the odometer, axis 0 fastest
        let mut pos = 0;
        loop {
            if pos == self.axes.len() {
                self.done = true;
                break;
            }
            self.index[pos] += 1;
            if self.index[pos] < self.axes[pos].len() {
                break;
            }
            self.index[pos] = 0;
            pos += 1;
        }

        Some(combo)
    }
}

/// Enumerate the concrete signatures of a union-parameterized function.
///
/// The yielded count equals the product of the axis widths (each
/// non-union axis counting as 1), and every yielded signature keeps the
/// parameter names and their order.
pub fn alternate(fun: &FnTy) -> impl Iterator<Item = FnTy> + '_ {
    let mut axes: Vec<Vec<Ty>> = fun.params.values().map(axis).collect();
    axes.push(axis(&fun.ret));
    let names: Vec<Symbol> = fun.params.keys().copied().collect();
    let name = fun.name;

    Cartesian::new(axes).map(move |mut combo| {
        let ret = combo.pop().expect("return axis is always present");
        let params: IndexMap<Symbol, Ty> = names.iter().copied().zip(combo).collect();
        FnTy::new(name, params, ret)
    })
}
