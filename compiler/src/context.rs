// context.rs — Abstract type bindings
//
// The named abstract types of a template (S, D, C, U, V, A, R, X, B_I, B_O,
// A_I, A_O, T, O) bound while matching or validating one form. Each matcher
// or validator run owns its own context.
//
// Preconditions: none.
// Postconditions: a name is bound at most once per context.
// Failure modes: none; rebinding is reported by `bind`.
// Side effects: `debug!` per binding.

use std::collections::BTreeMap;
use std::fmt;

use log::debug;

use crate::forms::Template;
use crate::types::Type;

#[derive(Debug, Clone)]
pub(crate) struct TypeContext {
    template: Template,
    bindings: BTreeMap<&'static str, Type>,
}

impl TypeContext {
    pub fn new(template: Template) -> Self {
        Self {
            template,
            bindings: BTreeMap::new(),
        }
    }

    /// Bind `name` and return the bound type. An existing binding is kept
    /// and returned instead, so callers compare against the first binding.
    pub fn bind(&mut self, name: &'static str, ty: Type) -> Type {
        if let Some(existing) = self.bindings.get(name) {
            return existing.clone();
        }
        debug!("{}: {name} := {ty}", self.template);
        self.bindings.insert(name, ty.clone());
        ty
    }

    pub fn get(&self, name: &str) -> Option<&Type> {
        self.bindings.get(name)
    }

    /// Bound type or the empty tuple.
    pub fn ty(&self, name: &str) -> Type {
        self.get(name).cloned().unwrap_or_else(Type::empty)
    }
}

impl fmt::Display for TypeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .bindings
            .iter()
            .map(|(n, t)| format!("{n} = {t}"))
            .collect();
        write!(f, "[{}]", parts.join(", "))
    }
}
