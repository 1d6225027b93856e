//! Feature key registry and flat feature maps.
//!
//! Keys are assigned contiguous indices once at startup; per-bar feature
//! maps are flat `Vec<f64>` slots addressed by index. Lookup by name only
//! happens at the edges (strategy parameter resolution, event logging);
//! the hot path works in indices. Unknown keys error instead of silently
//! returning nothing.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::error::{PerpLabError, Result};

/// Index of a feature key in its registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FeatureId(pub usize);

/// Immutable allow-list of feature keys with contiguous indices.
#[derive(Debug, Clone, Default)]
pub struct FeatureRegistry {
    keys: Vec<String>,
    index: HashMap<String, FeatureId>,
}

impl FeatureRegistry {
    /// Build a registry from declared keys. Duplicate declarations are a
    /// configuration error.
    pub fn from_keys<I, S>(keys: I) -> Result<Arc<Self>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut registry = FeatureRegistry::default();
        for key in keys {
            let key = key.into();
            if registry.index.contains_key(&key) {
                return Err(PerpLabError::InvalidPolicy(format!(
                    "feature key '{key}' declared twice"
                )));
            }
            let id = FeatureId(registry.keys.len());
            registry.index.insert(key.clone(), id);
            registry.keys.push(key);
        }
        Ok(Arc::new(registry))
    }

    /// Resolve a key to its index. Unknown key is an error, preserving the
    /// strict allow-list semantics.
    pub fn resolve(&self, key: &str) -> Result<FeatureId> {
        self.index
            .get(key)
            .copied()
            .ok_or_else(|| PerpLabError::UnknownFeature(key.to_string()))
    }

    pub fn key(&self, id: FeatureId) -> &str {
        &self.keys[id.0]
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Flat per-snapshot feature values. Unset slots are NaN; `get` surfaces
/// them as `None` so strategies never see a half-computed value.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMap {
    values: Vec<f64>,
}

impl FeatureMap {
    pub fn new(len: usize) -> Self {
        Self {
            values: vec![f64::NAN; len],
        }
    }

    pub fn set(&mut self, id: FeatureId, value: f64) {
        self.values[id.0] = value;
    }

    pub fn clear(&mut self, id: FeatureId) {
        self.values[id.0] = f64::NAN;
    }

    pub fn get(&self, id: FeatureId) -> Option<f64> {
        let v = self.values[id.0];
        v.is_finite().then_some(v)
    }

    /// Named view of all set values, for event logging and debugging.
    pub fn to_named(&self, registry: &FeatureRegistry) -> BTreeMap<String, f64> {
        self.values
            .iter()
            .enumerate()
            .filter(|(_, v)| v.is_finite())
            .map(|(i, v)| (registry.key(FeatureId(i)).to_string(), *v))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_known_and_unknown() {
        let registry = FeatureRegistry::from_keys(["ema_fast", "ema_slow", "rsi"]).unwrap();
        assert_eq!(registry.resolve("ema_slow").unwrap(), FeatureId(1));
        let err = registry.resolve("wma").unwrap_err();
        assert_eq!(err.kind(), "unknown_feature");
    }

    #[test]
    fn duplicate_key_is_error() {
        let err = FeatureRegistry::from_keys(["rsi", "rsi"]).unwrap_err();
        assert_eq!(err.kind(), "invalid_policy");
    }

    #[test]
    fn unset_values_read_as_none() {
        let registry = FeatureRegistry::from_keys(["atr"]).unwrap();
        let mut map = FeatureMap::new(registry.len());
        let id = registry.resolve("atr").unwrap();
        assert_eq!(map.get(id), None);
        map.set(id, 123.0);
        assert_eq!(map.get(id), Some(123.0));
        map.clear(id);
        assert_eq!(map.get(id), None);
    }

    #[test]
    fn named_view_skips_unset() {
        let registry = FeatureRegistry::from_keys(["a", "b"]).unwrap();
        let mut map = FeatureMap::new(registry.len());
        map.set(registry.resolve("b").unwrap(), 2.0);
        let named = map.to_named(&registry);
        assert_eq!(named.len(), 1);
        assert_eq!(named["b"], 2.0);
    }
}
