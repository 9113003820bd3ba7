// names.rs — Fresh binder names for extracted and synthesized IR
//
// Names are allocated deterministically: `base`, then `base_1`, `base_2`, ...
// skipping anything already reserved, so repeated compilation of the same
// round yields byte-identical output.

use std::collections::HashSet;

use crate::ir::Expr;

/// Allocator for binder names that must not collide with names already
/// present in a round.
#[derive(Debug, Default, Clone)]
pub struct NameAllocator {
    used: HashSet<String>,
}

impl NameAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocator that avoids every name bound or referenced in `expr`.
    pub fn avoiding(expr: &Expr) -> Self {
        let mut alloc = Self::new();
        alloc.reserve_all(expr);
        alloc
    }

    pub fn reserve(&mut self, name: impl Into<String>) {
        self.used.insert(name.into());
    }

    pub fn reserve_all(&mut self, expr: &Expr) {
        expr.visit(&mut |e| {
            for name in e.binder_names() {
                self.used.insert(name.to_string());
            }
        });
    }

    pub fn is_reserved(&self, name: &str) -> bool {
        self.used.contains(name)
    }

    pub fn fresh(&mut self, base: &str) -> String {
        if self.used.insert(base.to_string()) {
            return base.to_string();
        }
        let mut n = 1u32;
        loop {
            let candidate = format!("{base}_{n}");
            if self.used.insert(candidate.clone()) {
                return candidate;
            }
            n += 1;
        }
    }
}
