// Copyright Motia LLC and/or licensed to Motia LLC under one or more
// contributor license agreements. Licensed under the Elastic License 2.0;
// you may not use this file except in compliance with the Elastic License 2.0.
// This software is patent protected. We welcome discussions - reach out at support@motia.dev
// See LICENSE and PATENTS files for details.

//! Sparse updates and their projection onto fully populated values.
//!
//! A sparse update is a struct whose every field is `Option<_>`: `None` means
//! "leave this field alone", `Some(v)` means "the field becomes `v`". Deriving
//! [`SparseUpdate`](crate::SparseUpdate) checks that shape when the type is
//! compiled, so no runtime reflection is needed on the write path.

use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};

use crate::error::{Result, StoreError};

/// A value that can describe a partial update of a stored object.
pub trait SparseUpdate {
    /// Set fields as a merge patch. Unset fields are absent, never `null`.
    fn to_patch(&self) -> Result<Patch>;

    /// True when no field is set
    fn is_unset(&self) -> bool {
        matches!(self.to_patch(), Ok(patch) if patch.is_empty())
    }
}

/// Conversion between a sparse update and the concrete type it mirrors.
pub trait Projection: SparseUpdate + Sized {
    type Normal;

    /// Copies every set field onto `normal`. Unset fields are left as they are.
    fn project_into(&self, normal: &mut Self::Normal);

    /// Wraps every field of `normal` as set.
    fn from_normal(normal: Self::Normal) -> Self;
}

/// The set fields of a sparse update, keyed by their stored member names.
///
/// A member whose value is `null` is written as `null`. A derived update gets
/// one from an `Option<Option<T>>` field set to `Some(None)`; a dynamic patch
/// gets one only through [`Patch::insert_value`], because
/// [`Patch::from_value`] reads `null` as unset.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Patch(Map<String, Value>);

impl Patch {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Builds a patch from a dynamic document. The document must be a JSON
    /// object; `null` members are treated as unset and dropped. Use
    /// [`Patch::insert_value`] with `Value::Null` to store an explicit `null`.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self(
                map.into_iter().filter(|(_, v)| !v.is_null()).collect(),
            )),
            other => Err(StoreError::ShapeViolation(format!(
                "merge patch must be a JSON object, found {}",
                json_kind(&other)
            ))),
        }
    }

    /// Serializes `value` and sets it as `field`.
    pub fn insert_value<T: Serialize + ?Sized>(&mut self, field: &str, value: &T) -> Result<()> {
        let value = serde_json::to_value(value).map_err(|e| {
            StoreError::ShapeViolation(format!("field `{}` could not be serialized: {}", field, e))
        })?;
        self.0.insert(field.to_string(), value);
        Ok(())
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Shallow overlay: every patch member replaces the document's member of
    /// the same name. Nested objects are replaced wholesale.
    pub fn apply_to(&self, document: &mut Map<String, Value>) {
        for (field, value) in &self.0 {
            document.insert(field.clone(), value.clone());
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.0)?)
    }

    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }
}

impl SparseUpdate for Patch {
    fn to_patch(&self) -> Result<Patch> {
        Ok(self.clone())
    }

    fn is_unset(&self) -> bool {
        self.is_empty()
    }
}

/// Normalizes a value into its optional form. An `Option<T>` is returned as
/// is; a bare `T` becomes `Some(T)`.
pub fn wrap<T>(value: impl Into<Option<T>>) -> Option<T> {
    value.into()
}

/// Copies the set fields of `sparse` onto `normal`.
pub fn project<S: Projection>(sparse: &S, normal: &mut S::Normal) {
    sparse.project_into(normal);
}

/// Projection for types without a derived [`Projection`], going through their
/// serde representation.
///
/// Fails before touching `normal` if it does not serialize to a JSON object
/// or if the patch names a member `normal` does not have. Fails without
/// touching `normal` if the overlaid document no longer deserializes.
pub fn project_value<N>(patch: &Patch, normal: &mut N) -> Result<()>
where
    N: Serialize + DeserializeOwned,
{
    let mut document = match serde_json::to_value(&*normal) {
        Ok(Value::Object(map)) => map,
        Ok(other) => {
            return Err(StoreError::ShapeViolation(format!(
                "projection target must serialize to a JSON object, found {}",
                json_kind(&other)
            )));
        }
        Err(e) => {
            return Err(StoreError::ShapeViolation(format!(
                "projection target could not be serialized: {}",
                e
            )));
        }
    };

    if let Some(field) = patch.fields().find(|f| !document.contains_key(*f)) {
        tracing::warn!(field = %field, "Sparse field has no counterpart on projection target");
        return Err(StoreError::ShapeViolation(format!(
            "field `{}` does not exist on the projection target",
            field
        )));
    }

    patch.apply_to(&mut document);
    *normal = serde_json::from_value(Value::Object(document))?;
    Ok(())
}

pub(crate) fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
