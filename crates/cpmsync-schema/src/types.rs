//! Identifier and pin types shared by every layer of the reconciler.
//!
//! `PackageId` serializes as a plain string. Equality is exact and
//! case-sensitive; the lowercase form is only ever used as a registry key.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;

/// Case-sensitive identifier of an internally-owned package.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PackageId(String);

impl PackageId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }

    /// Lowercase form used as the registry lookup key.
    pub fn lookup_key(&self) -> String {
        self.0.to_lowercase()
    }

    pub fn has_prefix(&self, prefix: &str) -> bool {
        self.0.starts_with(prefix)
    }
}

impl Deref for PackageId {
    type Target = str;
    fn deref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for PackageId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for PackageId {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for PackageId {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

impl From<String> for PackageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for PackageId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// How a pin binds its identifier relative to the parent manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PinMode {
    /// Introduces the pin (`Include="..."`).
    Define,
    /// Overrides a pin the parent already defines (`Update="..."`).
    Override,
}

impl PinMode {
    /// Attribute that carries the identifier on a `PackageVersion` node.
    pub fn attribute(self) -> &'static str {
        match self {
            PinMode::Define => "Include",
            PinMode::Override => "Update",
        }
    }

    pub fn from_attribute(name: &str) -> Option<Self> {
        match name {
            "Include" => Some(PinMode::Define),
            "Update" => Some(PinMode::Override),
            _ => None,
        }
    }

    /// `Override` when the parent defines the identifier, else `Define`.
    pub fn for_parent(parent_defines: bool) -> Self {
        if parent_defines {
            PinMode::Override
        } else {
            PinMode::Define
        }
    }
}

impl fmt::Display for PinMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PinMode::Define => f.write_str("define"),
            PinMode::Override => f.write_str("override"),
        }
    }
}

/// A fixed version assignment for one identifier inside a manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionPin {
    pub id: PackageId,
    pub version: String,
    pub mode: PinMode,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn package_id_is_case_sensitive() {
        assert_ne!(PackageId::new("Acme.Widgets"), PackageId::new("acme.widgets"));
        assert_eq!(PackageId::new("Acme.Widgets").lookup_key(), "acme.widgets");
    }

    #[test]
    fn package_id_serializes_as_plain_string() {
        let id = PackageId::new("Acme.Widgets");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"Acme.Widgets\"");
        let back: PackageId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn package_id_prefix() {
        assert!(PackageId::from("Coven.Core").has_prefix("Coven."));
        assert!(!PackageId::from("Newtonsoft.Json").has_prefix("Coven."));
    }

    #[test]
    fn pin_mode_attribute_mapping() {
        assert_eq!(PinMode::Define.attribute(), "Include");
        assert_eq!(PinMode::Override.attribute(), "Update");
        assert_eq!(PinMode::from_attribute("Update"), Some(PinMode::Override));
        assert_eq!(PinMode::from_attribute("Version"), None);
    }

    #[test]
    fn pin_mode_follows_parent() {
        assert_eq!(PinMode::for_parent(true), PinMode::Override);
        assert_eq!(PinMode::for_parent(false), PinMode::Define);
    }

    #[test]
    fn pin_mode_serde_lowercase() {
        assert_eq!(serde_json::to_string(&PinMode::Override).unwrap(), "\"override\"");
    }
}
