//! Entry and DN model
//!
//! The unit stored in the master table: a distinguished name plus a set of
//! attributes, each with one or more values.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::decode::LargeValue;
use crate::error::Result;

/// Identifier of one entry in the master table. Assigned monotonically and
/// never reused while any index or external reference to it exists.
pub type EntryId = u64;

/// A normalized distinguished name.
///
/// Normalization lowercases and trims each RDN so that comparison, the DN
/// table, and scope matching all see one canonical form.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Dn(String);

impl Dn {
    pub fn new(dn: impl AsRef<str>) -> Self {
        let normalized = dn
            .as_ref()
            .split(',')
            .map(|rdn| rdn.trim().to_lowercase())
            .filter(|rdn| !rdn.is_empty())
            .collect::<Vec<_>>()
            .join(",");
        Self(normalized)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// Number of RDN components
    pub fn component_count(&self) -> usize {
        if self.0.is_empty() {
            0
        } else {
            self.0.split(',').count()
        }
    }

    /// Whether `self` is `base` or lies somewhere under it
    pub fn is_descendant_of(&self, base: &Dn) -> bool {
        self == base || self.0.ends_with(&format!(",{}", base.0))
    }
}

impl std::fmt::Display for Dn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One directory entry: a DN plus attributes. Attribute ids are normalized
/// to lowercase; values are opaque bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    dn: Dn,
    attrs: BTreeMap<String, Vec<Vec<u8>>>,
}

impl Entry {
    pub fn new(dn: Dn) -> Self {
        Self {
            dn,
            attrs: BTreeMap::new(),
        }
    }

    pub fn dn(&self) -> &Dn {
        &self.dn
    }

    /// Add one value under an attribute
    pub fn add(&mut self, attr: impl AsRef<str>, value: impl Into<Vec<u8>>) -> &mut Self {
        self.attrs
            .entry(attr.as_ref().to_lowercase())
            .or_default()
            .push(value.into());
        self
    }

    /// Add a value arriving through the large-value input path, reading a
    /// spooled value from disk if it exceeded the decode limit.
    pub fn add_large(&mut self, attr: impl AsRef<str>, value: LargeValue) -> Result<&mut Self> {
        let bytes = value.into_bytes()?;
        Ok(self.add(attr, bytes))
    }

    /// Values of one attribute, if present
    pub fn get(&self, attr: &str) -> Option<&[Vec<u8>]> {
        self.attrs.get(&attr.to_lowercase()).map(|v| v.as_slice())
    }

    pub fn has_value(&self, attr: &str, value: &[u8]) -> bool {
        self.get(attr)
            .is_some_and(|values| values.iter().any(|v| v == value))
    }

    /// Iterate over (attribute, values) pairs in attribute order
    pub fn attrs(&self) -> impl Iterator<Item = (&str, &[Vec<u8>])> {
        self.attrs.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Copy with only the named attributes retained (DN always kept)
    pub fn project(&self, attr_ids: &[&str]) -> Entry {
        let wanted: Vec<String> = attr_ids.iter().map(|a| a.to_lowercase()).collect();
        Entry {
            dn: self.dn.clone(),
            attrs: self
                .attrs
                .iter()
                .filter(|(k, _)| wanted.iter().any(|w| w == *k))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}
