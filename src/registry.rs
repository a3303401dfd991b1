//! Shared name → optional value table.
//!
//! Every variable node resolves its value through a [`VariableRegistry`], so
//! all variables with the same name observe the same value. The registry is a
//! handle: clones share one table. It is `!Send`; a model and all of its
//! trees live on one thread.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use crate::error::ExpressionError;
use crate::number::Number;

#[derive(Clone, Debug, Default)]
pub struct VariableRegistry {
    values: Rc<RefCell<BTreeMap<String, Option<Number>>>>,
}

impl VariableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `name` (if needed) and returns its shared value.
    ///
    /// A registered empty entry adopts `value`. A registered value that
    /// differs from a provided `value` is a
    /// [`ConflictingVariableValue`](ExpressionError::ConflictingVariableValue).
    pub fn resolve(&self, name: &str, value: Option<Number>) -> Result<Option<Number>, ExpressionError> {
        let mut values = self.values.borrow_mut();
        let Some(registered) = values.get_mut(name) else {
            values.insert(name.to_string(), value);
            return Ok(value);
        };
        match (*registered, value) {
            (None, Some(provided)) => {
                *registered = Some(provided);
                Ok(Some(provided))
            }
            (Some(existing), Some(provided)) if existing != provided => {
                Err(ExpressionError::ConflictingVariableValue {
                    name: name.to_string(),
                    registered: existing,
                    provided,
                })
            }
            (existing, _) => Ok(existing),
        }
    }

    /// Current value of `name`, `None` when unknown or valueless.
    pub fn get(&self, name: &str) -> Option<Number> {
        self.values.borrow().get(name).copied().flatten()
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.values.borrow().contains_key(name)
    }

    /// Overwrites the value of `name`. Use [`Self::clear_value`] to remove one.
    pub fn set(&self, name: &str, value: Option<Number>) -> Result<(), ExpressionError> {
        let value = value.ok_or(ExpressionError::NullValue)?;
        self.values.borrow_mut().insert(name.to_string(), Some(value));
        Ok(())
    }

    /// Keeps `name` registered without a value.
    pub fn clear_value(&self, name: &str) {
        self.values.borrow_mut().insert(name.to_string(), None);
    }

    pub fn clear_all_values(&self) {
        for value in self.values.borrow_mut().values_mut() {
            *value = None;
        }
    }

    /// Forgets `name` entirely. Returns whether it was registered.
    pub fn unregister(&self, name: &str) -> bool {
        self.values.borrow_mut().remove(name).is_some()
    }

    /// Forgets every name.
    pub fn reset(&self) {
        self.values.borrow_mut().clear();
    }

    /// Registered names in lexicographic order.
    pub fn names(&self) -> Vec<String> {
        self.values.borrow().keys().cloned().collect()
    }

    pub fn snapshot(&self) -> BTreeMap<String, Option<Number>> {
        self.values.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.values.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.borrow().is_empty()
    }
}
