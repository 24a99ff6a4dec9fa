//! Request-scoped record cache.

use crate::query::FieldMap;
use crate::value::Value;
use std::collections::HashMap;

/// Field values of records loaded by one environment, keyed by model and id.
///
/// Entries are written by reads and dropped by writes; there is no eviction.
#[derive(Debug, Default, Clone)]
pub struct Cache {
    records: HashMap<(String, i64), FieldMap>,
}

impl Cache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn contains(&self, model: &str, id: i64) -> bool {
        self.records.contains_key(&(model.to_string(), id))
    }

    pub fn record(&self, model: &str, id: i64) -> Option<&FieldMap> {
        self.records.get(&(model.to_string(), id))
    }

    pub fn get(&self, model: &str, id: i64, field: &str) -> Option<&Value> {
        self.record(model, id).and_then(|values| values.get(field))
    }

    /// Merge `values` into the cached record.
    pub fn update(&mut self, model: &str, id: i64, values: FieldMap) {
        self.records
            .entry((model.to_string(), id))
            .or_default()
            .extend(values);
    }

    pub fn invalidate(&mut self, model: &str, ids: &[i64]) {
        for &id in ids {
            self.records.remove(&(model.to_string(), id));
        }
    }

    pub fn invalidate_model(&mut self, model: &str) {
        self.records.retain(|(m, _), _| m != model);
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}
