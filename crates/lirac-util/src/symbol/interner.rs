//! String interner implementation.
//!
//! Two lock-free maps back the [`Symbol`] type:
//!
//! - `names` goes from the interned string to its index. Keying by the
//!   string itself (rather than a precomputed hash) lets DashMap's own
//!   buckets absorb collisions, so there is no probing logic here.
//! - `strings` goes from the index back to the string, which makes
//!   `Symbol::as_str` a constant-time lookup.
//!
//! Interned strings are leaked to get `'static` lifetimes; the table
//! lives for the whole process and entries are never removed, so the
//! leak is bounded by the number of distinct names in the input.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::LazyLock;

use super::{InternerStats, Symbol};

type Map<K, V> = DashMap<K, V, ahash::RandomState>;

/// Global string table instance
///
/// Initialized on first use via `LazyLock`; Lira's known symbols are
/// seeded into the reserved index range at that point, matching the
/// constants in `symbol::*`.
pub static STRING_TABLE: LazyLock<StringTable> = LazyLock::new(StringTable::seeded);

/// Number of indices reserved for known names
///
/// Must match `symbol::RESERVED_SYMBOLS_END`.
const RESERVED_SYMBOLS_END: u32 = 256;

/// Thread-safe, append-only string table
pub struct StringTable {
    /// Interned string → symbol index
    names: Map<&'static str, u32>,

    /// Symbol index → interned string
    strings: Map<u32, &'static str>,

    /// Next free index; starts past the reserved range
    next_index: AtomicU32,

    /// Lookups that found an existing entry
    hits: AtomicUsize,

    /// Lookups that had to allocate
    misses: AtomicUsize,
}

/// Leak a string to obtain the `'static` lifetime the table stores
fn leak(string: &str) -> &'static str {
    Box::leak(string.to_owned().into_boxed_str())
}

impl StringTable {
    fn seeded() -> Self {
        let table = Self {
            names: Map::with_capacity_and_hasher(256, ahash::RandomState::default()),
            strings: Map::with_capacity_and_hasher(256, ahash::RandomState::default()),
            next_index: AtomicU32::new(RESERVED_SYMBOLS_END),
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
        };
        table.seed_known_symbols();
        table
    }

    /// Pre-intern the language's known names at their reserved indices.
    ///
    /// The order of this list defines the indices and must match the
    /// constants declared in `symbol/mod.rs`.
    fn seed_known_symbols(&self) {
        let known_symbols = [
            // Keywords
            "function", "let", "in", "if", "elif", "else", "while", "for",
            "type", "new", "inherits", "protocol", "extends", "is", "as",
            "true", "false",
            // Builtin type names
            "object", "boolean", "number", "string", "iterable", "printable",
            // Builtin constants and functions
            "E", "PI", "cos", "sin", "exp", "sqrt", "log", "pow", "rand",
            "print", "concat", "sitos",
            // Protocol member names
            "current", "next", "tostring",
            // Receiver names
            "self", "base", "@ctor", "@self", "@base",
        ];
        debug_assert!(known_symbols.len() <= RESERVED_SYMBOLS_END as usize);

        for (index, name) in known_symbols.into_iter().enumerate() {
            let stored = leak(name);
            self.strings.insert(index as u32, stored);
            self.names.insert(stored, index as u32);
        }
    }

    /// Intern a string, returning its symbol
    ///
    /// The same string always yields the same symbol, from any thread.
    /// Two threads racing to intern a brand-new string agree on one
    /// winner through the entry lock; the loser's allocation is wasted,
    /// which the leak-forever model already tolerates.
    pub fn intern(&self, string: &str) -> Symbol {
        if let Some(found) = self.names.get(string) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Symbol { index: *found };
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let stored = leak(string);
        match self.names.entry(stored) {
            dashmap::mapref::entry::Entry::Occupied(entry) => Symbol {
                index: *entry.get(),
            },
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                let index = self.next_index.fetch_add(1, Ordering::Relaxed);
                // Publish the reverse mapping before the name becomes
                // visible, so a symbol handed out is always resolvable
                self.strings.insert(index, stored);
                slot.insert(index);
                Symbol { index }
            }
        }
    }

    /// Resolve a symbol back to its string in constant time
    pub fn get(&self, symbol: Symbol) -> Option<&'static str> {
        self.strings.get(&symbol.index).map(|entry| *entry.value())
    }

    /// Snapshot the table's counters for profiling
    pub fn stats(&self) -> InternerStats {
        InternerStats {
            count: self.names.len(),
            capacity: self.names.capacity(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}
