//! Generic lexical scope chain, shared by the validator's type environment
//! and (via `Frame`, see `evaluator.rs`) the interpreter's variable scopes.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt::Debug;
use std::rc::Rc;

pub type Node<T> = Rc<T>;

/// A single level of lexical scope, chained to its lexical parent.
///
/// Lookups walk outward through `parent` until a binding is found or the
/// chain is exhausted. This is the mechanism spec.md §4.4 calls "lexical
/// variable resolution from outer inputs": a callee's frame cannot see its
/// caller's locals, but an inner block sees the enclosing function's inputs.
pub struct Env<T> {
    scope: RefCell<HashMap<String, Node<T>>>,
    parent: Option<Node<Env<T>>>,
}

impl<T> Env<T>
where
    T: Clone + Debug,
{
    fn new(parent: Option<Node<Env<T>>>) -> Env<T> {
        Env { scope: RefCell::new(HashMap::new()), parent }
    }

    pub fn root() -> Env<T> {
        Self::new(None)
    }

    pub fn chain(parent: &Node<Env<T>>) -> Env<T> {
        Self::new(Some(parent.clone()))
    }

    /// Look up an identifier from anywhere in the scope chain.
    pub fn get(&self, key: &str) -> Option<Node<T>> {
        if let Some(value) = self.scope.borrow().get(key) {
            Some(value.clone())
        } else if let Some(env) = &self.parent {
            env.get(key)
        } else {
            None
        }
    }

    /// True if `key` is bound in this scope only (not the parent chain).
    pub fn is_local(&self, key: &str) -> bool {
        self.scope.borrow().contains_key(key)
    }

    /// Bind a value in the current scope, shadowing any outer binding.
    pub fn define(&self, key: &str, value: &Node<T>) {
        self.scope.borrow_mut().insert(key.to_string(), value.clone());
    }

    /// Import a batch of name/value pairs into the current scope, in order.
    pub fn import<'a, I>(&self, bindings: I)
    where
        I: IntoIterator<Item = (&'a String, &'a Node<T>)>,
    {
        for (k, v) in bindings {
            self.define(k, v)
        }
    }
}
