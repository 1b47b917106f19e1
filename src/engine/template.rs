//! Host-side blueprints for engine objects.

use crate::engine::value::{JsValue, NativeFunction};

/// One slot of an [`ObjectTemplate`].
#[derive(Debug, Clone)]
pub enum TemplateValue {
    Value(JsValue),
    Function(NativeFunction),
    Object(ObjectTemplate),
}

/// Description of an object the engine can instantiate on any isolate.
///
/// Used both for the global object of a new context and for host modules.
/// Entries keep their insertion order; setting an existing name replaces it.
#[derive(Debug, Clone, Default)]
pub struct ObjectTemplate {
    entries: Vec<(String, TemplateValue)>,
    read_only: bool,
}

impl ObjectTemplate {
    pub fn new() -> Self {
        ObjectTemplate::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: TemplateValue) -> &mut Self {
        let name = name.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
        self
    }

    pub fn set_value(&mut self, name: impl Into<String>, value: impl Into<JsValue>) -> &mut Self {
        self.set(name, TemplateValue::Value(value.into()))
    }

    pub fn set_function(&mut self, name: impl Into<String>, func: NativeFunction) -> &mut Self {
        self.set(name, TemplateValue::Function(func))
    }

    pub fn set_object(&mut self, name: impl Into<String>, template: ObjectTemplate) -> &mut Self {
        self.set(name, TemplateValue::Object(template))
    }

    /// Instances reject property writes after instantiation.
    pub fn set_read_only(&mut self, read_only: bool) -> &mut Self {
        self.read_only = read_only;
        self
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn get(&self, name: &str) -> Option<&TemplateValue> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &TemplateValue)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
