//! Captured path parameters.

use serde_json::{Map, Value};
use smallvec::SmallVec;

/// Parameters stored inline before spilling to the heap.
pub const INLINE_PARAM_COUNT: usize = 8;

/// One captured parameter. `value` is `None` for an optional parameter the
/// request did not supply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathParam {
    pub name: String,
    pub value: Option<String>,
}

/// Path parameters in template order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathParams {
    params: SmallVec<[PathParam; INLINE_PARAM_COUNT]>,
}

impl PathParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, name: &str, value: Option<String>) {
        self.params.push(PathParam {
            name: name.to_string(),
            value,
        });
    }

    /// Value of a parameter. `None` both for unknown names and unset optionals.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|p| p.name == name)
            .and_then(|p| p.value.as_deref())
    }

    /// Get parameter and parse as type T.
    pub fn get_parsed<T: std::str::FromStr>(&self, name: &str) -> Option<Result<T, T::Err>> {
        self.get(name).map(|v| v.parse())
    }

    /// Whether the template declares `name`, set or not.
    pub fn contains(&self, name: &str) -> bool {
        self.params.iter().any(|p| p.name == name)
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PathParam> {
        self.params.iter()
    }

    /// JSON object of the parameters, unset optionals as `null`.
    pub fn to_json(&self) -> Value {
        let map: Map<String, Value> = self
            .params
            .iter()
            .map(|p| {
                let value = p.value.clone().map(Value::String).unwrap_or(Value::Null);
                (p.name.clone(), value)
            })
            .collect();
        Value::Object(map)
    }
}
