//! Core data types shared by the engine and its callers.

use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CascadeError;

/// Effect payloads are shared so that reference identity survives the trip
/// from a transition handler to an effect handler.
pub type Payload = Arc<Value>;

// ---------------------------------------------------------------------------
// EffectKind
// ---------------------------------------------------------------------------

/// Identifier of an effect handler, e.g. `"dispatch-later"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EffectKind(String);

impl EffectKind {
    pub fn new(kind: impl Into<String>) -> Self {
        Self(kind.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EffectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for EffectKind {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for EffectKind {
    fn from(kind: &str) -> Self {
        Self(kind.to_string())
    }
}

impl From<String> for EffectKind {
    fn from(kind: String) -> Self {
        Self(kind)
    }
}

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// An event vector: `[id, arg, arg, ...]`.
///
/// Serializes as a plain JSON array. The id is always a string, so an
/// `Event` can never be empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct Event {
    id: String,
    args: Vec<Value>,
}

impl Event {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            args: Vec::new(),
        }
    }

    pub fn with_arg(mut self, arg: impl Into<Value>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn with_args<I, V>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Validate a JSON value as an event vector without consuming it.
    pub fn from_value(value: &Value) -> Result<Self, CascadeError> {
        let Value::Array(items) = value else {
            return Err(CascadeError::MalformedEvent(format!(
                "expected an array, got {}",
                describe(value)
            )));
        };
        let Some((first, rest)) = items.split_first() else {
            return Err(CascadeError::MalformedEvent(
                "event vector is empty".to_string(),
            ));
        };
        let Value::String(id) = first else {
            return Err(CascadeError::MalformedEvent(format!(
                "event id must be a string, got {}",
                describe(first)
            )));
        };
        Ok(Self {
            id: id.clone(),
            args: rest.to_vec(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }

    pub fn arg(&self, index: usize) -> Option<&Value> {
        self.args.get(index)
    }

    pub fn to_value(&self) -> Value {
        Value::from(self.clone())
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_value())
    }
}

impl TryFrom<Value> for Event {
    type Error = CascadeError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Self::from_value(&value)
    }
}

impl From<Event> for Value {
    fn from(event: Event) -> Self {
        let mut items = Vec::with_capacity(event.args.len() + 1);
        items.push(Value::String(event.id));
        items.extend(event.args);
        Value::Array(items)
    }
}

/// Short type name of a JSON value, for diagnostics.
pub fn describe(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// ---------------------------------------------------------------------------
// EffectMap
// ---------------------------------------------------------------------------

/// Effects requested by one transition handler, keyed by effect kind.
///
/// Keys are unique: inserting an existing kind replaces its payload.
/// Iteration follows insertion order, which callers must not rely on.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EffectMap {
    entries: Vec<(EffectKind, Payload)>,
}

impl EffectMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, kind: impl Into<EffectKind>, payload: impl Into<Value>) -> Self {
        self.insert(kind, payload);
        self
    }

    /// Builder form of [`EffectMap::insert_shared`].
    pub fn with_shared(mut self, kind: impl Into<EffectKind>, payload: Payload) -> Self {
        self.insert_shared(kind, payload);
        self
    }

    /// Request a `db` effect with an existing snapshot, keeping its identity.
    pub fn with_db(self, db: Payload) -> Self {
        self.with_shared("db", db)
    }

    pub fn insert(&mut self, kind: impl Into<EffectKind>, payload: impl Into<Value>) -> Option<Payload> {
        self.insert_shared(kind, Arc::new(payload.into()))
    }

    pub fn insert_shared(&mut self, kind: impl Into<EffectKind>, payload: Payload) -> Option<Payload> {
        let kind = kind.into();
        match self.entries.iter_mut().find(|(k, _)| *k == kind) {
            Some((_, existing)) => Some(std::mem::replace(existing, payload)),
            None => {
                self.entries.push((kind, payload));
                None
            }
        }
    }

    pub fn get(&self, kind: &str) -> Option<&Payload> {
        self.entries
            .iter()
            .find(|(k, _)| k.as_str() == kind)
            .map(|(_, payload)| payload)
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.get(kind).is_some()
    }

    pub fn remove(&mut self, kind: &str) -> Option<Payload> {
        let pos = self.entries.iter().position(|(k, _)| k.as_str() == kind)?;
        Some(self.entries.remove(pos).1)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&EffectKind, &Payload)> {
        self.entries.iter().map(|(k, v)| (k, v))
    }

    pub fn kinds(&self) -> impl Iterator<Item = &EffectKind> {
        self.entries.iter().map(|(k, _)| k)
    }
}

impl IntoIterator for EffectMap {
    type Item = (EffectKind, Payload);
    type IntoIter = std::vec::IntoIter<(EffectKind, Payload)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<K, V> FromIterator<(K, V)> for EffectMap
where
    K: Into<EffectKind>,
    V: Into<Value>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (kind, payload) in iter {
            map.insert(kind, payload);
        }
        map
    }
}

impl From<serde_json::Map<String, Value>> for EffectMap {
    fn from(object: serde_json::Map<String, Value>) -> Self {
        object.into_iter().collect()
    }
}

impl TryFrom<Value> for EffectMap {
    type Error = CascadeError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(object) => Ok(object.into()),
            Value::Null => Ok(Self::new()),
            other => Err(CascadeError::Anyhow(anyhow::anyhow!(
                "effect map must be an object, got {}",
                describe(&other)
            ))),
        }
    }
}
