//! Values held by property and reference features.

use crate::error::{Error, Result};
use crate::ids::NodeId;
use crate::schema::PropertyType;
use serde::{Deserialize, Serialize};

/// A property value.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PropertyValue {
    Boolean(bool),
    Integer(i64),
    String(String),
    /// Key of an enumeration literal.
    Enumeration(String),
}

impl PropertyValue {
    pub fn property_type(&self) -> PropertyType {
        match self {
            PropertyValue::Boolean(_) => PropertyType::Boolean,
            PropertyValue::Integer(_) => PropertyType::Integer,
            PropertyValue::String(_) => PropertyType::String,
            PropertyValue::Enumeration(_) => PropertyType::Enumeration,
        }
    }

    /// String form used on the wire.
    pub fn to_wire(&self) -> String {
        match self {
            PropertyValue::Boolean(b) => b.to_string(),
            PropertyValue::Integer(i) => i.to_string(),
            PropertyValue::String(s) | PropertyValue::Enumeration(s) => s.clone(),
        }
    }

    /// Parse the wire form of a property of type `ty`.
    pub fn from_wire(ty: PropertyType, raw: &str, property: &str) -> Result<Self> {
        match ty {
            PropertyType::Boolean => match raw {
                "true" => Ok(PropertyValue::Boolean(true)),
                "false" => Ok(PropertyValue::Boolean(false)),
                other => Err(Error::InvalidPropertyValue {
                    property: property.to_string(),
                    reason: format!("'{}' is not a boolean", other),
                }),
            },
            PropertyType::Integer => {
                raw.parse::<i64>()
                    .map(PropertyValue::Integer)
                    .map_err(|e| Error::InvalidPropertyValue {
                        property: property.to_string(),
                        reason: e.to_string(),
                    })
            }
            PropertyType::String => Ok(PropertyValue::String(raw.to_string())),
            PropertyType::Enumeration => Ok(PropertyValue::Enumeration(raw.to_string())),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropertyValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            PropertyValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::String(s) | PropertyValue::Enumeration(s) => Some(s),
            _ => None,
        }
    }
}

impl From<bool> for PropertyValue {
    fn from(b: bool) -> Self {
        PropertyValue::Boolean(b)
    }
}

impl From<i64> for PropertyValue {
    fn from(i: i64) -> Self {
        PropertyValue::Integer(i)
    }
}

impl From<&str> for PropertyValue {
    fn from(s: &str) -> Self {
        PropertyValue::String(s.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(s: String) -> Self {
        PropertyValue::String(s)
    }
}

/// One entry of a reference feature.
///
/// Reference targets are not owned, so they are held by id: the target may
/// live in another partition or not be loaded at all. `resolve_info` is the
/// display string used when the target cannot be resolved.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReferenceValue {
    pub target: Option<NodeId>,
    pub resolve_info: Option<String>,
}

impl ReferenceValue {
    pub fn to(target: impl Into<NodeId>) -> Self {
        Self {
            target: Some(target.into()),
            resolve_info: None,
        }
    }

    pub fn unresolved(resolve_info: impl Into<String>) -> Self {
        Self {
            target: None,
            resolve_info: Some(resolve_info.into()),
        }
    }

    pub fn with_resolve_info(mut self, resolve_info: impl Into<String>) -> Self {
        self.resolve_info = Some(resolve_info.into());
        self
    }
}
