use std::rc::Rc;

use rustc_hash::FxHashMap;

use super::callable::Function;
use super::Value;

pub struct Class {
    pub name: String,
    pub superclass: Option<Rc<Class>>,
    pub methods: FxHashMap<String, Function>,
    pub statics: FxHashMap<String, Function>,
}

impl Class {
    /// Instance method lookup walks the inheritance chain; the nearest
    /// definition wins.
    pub fn find_method(&self, name: &str) -> Option<&Function> {
        self.methods.get(name).or_else(|| {
            self.superclass
                .as_ref()
                .and_then(|superclass| superclass.find_method(name))
        })
    }

    // Static methods are not inherited; only this class's table is checked.
    pub fn find_static(&self, name: &str) -> Option<&Function> {
        self.statics.get(name)
    }
}

impl std::fmt::Debug for Class {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Class")
            .field("name", &self.name)
            .field(
                "superclass",
                &self.superclass.as_ref().map(|c| c.name.clone()),
            )
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .field("statics", &self.statics.keys().collect::<Vec<_>>())
            .finish()
    }
}

pub struct Instance {
    pub class: Rc<Class>,
    pub fields: FxHashMap<String, Value>,
}

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance")
            .field("class", &self.class.name)
            .field(
                "fields",
                &self
                    .fields
                    .iter()
                    .map(|(name, value)| (name.clone(), value.to_string()))
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}
