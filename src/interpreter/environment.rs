use std::cell::RefCell;
use std::fmt::Debug;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use super::Value;

/// One link in the lexical environment chain. Environments are shared via
/// `Rc` because closures and bound methods keep their defining environment
/// alive after the block that created it has exited.
#[derive(Default)]
pub struct Environment {
    values: FxHashMap<String, Value>,
    enclosing: Option<Rc<RefCell<Environment>>>,
}

impl Environment {
    pub fn nested(enclosing: Rc<RefCell<Environment>>) -> Rc<RefCell<Environment>> {
        Rc::new(RefCell::new(Environment {
            values: FxHashMap::default(),
            enclosing: Some(enclosing),
        }))
    }

    pub fn define(&mut self, name: String, value: Value) {
        self.values.insert(name, value);
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.values.get(name) {
            return Some(value.clone());
        }
        self.enclosing
            .as_ref()
            .and_then(|enclosing| enclosing.borrow().get(name))
    }

    pub fn assign(&mut self, name: &str, value: Value) -> bool {
        if let Some(binding) = self.values.get_mut(name) {
            *binding = value;
            return true;
        }
        match &self.enclosing {
            Some(enclosing) => enclosing.borrow_mut().assign(name, value),
            None => false,
        }
    }

    /// Reads a binding in the environment exactly `distance` links up the
    /// chain, without searching further. The resolver guarantees the binding
    /// lives there.
    pub fn get_at(
        environment: &Rc<RefCell<Environment>>,
        distance: usize,
        name: &str,
    ) -> Option<Value> {
        let environment = Self::ancestor(environment, distance);
        let value = environment.borrow().values.get(name).cloned();
        value
    }

    pub fn assign_at(
        environment: &Rc<RefCell<Environment>>,
        distance: usize,
        name: &str,
        value: Value,
    ) {
        let environment = Self::ancestor(environment, distance);
        environment
            .borrow_mut()
            .values
            .insert(name.to_string(), value);
    }

    fn ancestor(
        environment: &Rc<RefCell<Environment>>,
        distance: usize,
    ) -> Rc<RefCell<Environment>> {
        let mut environment = environment.clone();
        for _ in 0..distance {
            let enclosing = environment.borrow().enclosing.clone();
            environment = match enclosing {
                Some(enclosing) => enclosing,
                None => return environment,
            };
        }
        environment
    }
}

impl Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // The parent link is skipped: chains are cyclic through closure
        // captures and would recurse forever.
        f.debug_struct(format!("Environment<{:?}>", std::ptr::from_ref(self)).as_str())
            .field(
                "values",
                &self
                    .values
                    .iter()
                    .map(|(name, value)| (name.clone(), value.to_string()))
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_define_and_get() {
        let mut environment = Environment::default();
        environment.define("a".to_string(), Value::Number(1.0));
        assert!(matches!(environment.get("a"), Some(Value::Number(n)) if n == 1.0));
        assert!(environment.get("b").is_none());
    }

    #[test]
    fn test_get_walks_the_chain() {
        let root = Rc::new(RefCell::new(Environment::default()));
        root.borrow_mut()
            .define("a".to_string(), Value::Number(1.0));
        let child = Environment::nested(root);
        assert!(matches!(
            child.borrow().get("a"),
            Some(Value::Number(n)) if n == 1.0
        ));
    }

    #[test]
    fn test_assign_writes_the_declaring_environment() {
        let root = Rc::new(RefCell::new(Environment::default()));
        root.borrow_mut()
            .define("a".to_string(), Value::Number(1.0));
        let child = Environment::nested(root.clone());
        assert!(child.borrow_mut().assign("a", Value::Number(2.0)));
        assert!(matches!(
            root.borrow().get("a"),
            Some(Value::Number(n)) if n == 2.0
        ));
        assert!(!child.borrow_mut().assign("missing", Value::Nil));
    }

    #[test]
    fn test_get_at_ignores_nearer_shadows() {
        let root = Rc::new(RefCell::new(Environment::default()));
        root.borrow_mut()
            .define("a".to_string(), Value::Number(1.0));
        let child = Environment::nested(root);
        child
            .borrow_mut()
            .define("a".to_string(), Value::Number(2.0));
        assert!(matches!(
            Environment::get_at(&child, 1, "a"),
            Some(Value::Number(n)) if n == 1.0
        ));
        assert!(matches!(
            Environment::get_at(&child, 0, "a"),
            Some(Value::Number(n)) if n == 2.0
        ));
    }
}
