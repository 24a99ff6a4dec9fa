//! Model descriptors.

use super::field::{FieldDescriptor, FieldType};
use heck::ToSnakeCase;
use std::collections::HashMap;
use std::sync::Arc;

/// A model: its table and its fields in declaration order.
///
/// Every model carries an implicit `id` primary key as its first field.
#[derive(Debug, Clone)]
pub struct ModelDescriptor {
    name: String,
    table: String,
    fields: Vec<Arc<FieldDescriptor>>,
    by_name: HashMap<String, usize>,
    by_json: HashMap<String, usize>,
    by_snake: HashMap<String, usize>,
    default_order: Vec<String>,
    parent_field: Option<String>,
}

impl ModelDescriptor {
    /// A model named `name` stored in table `snake_case(name)`.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let table = name.replace('.', "_").to_snake_case();
        let mut model = Self {
            name,
            table,
            fields: Vec::new(),
            by_name: HashMap::new(),
            by_json: HashMap::new(),
            by_snake: HashMap::new(),
            default_order: vec!["id".to_string()],
            parent_field: None,
        };
        model.push_field(FieldDescriptor::id_field());
        model
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    /// Add a field. A field with the same name replaces the earlier one.
    pub fn field(mut self, field: FieldDescriptor) -> Self {
        self.push_field(field);
        self
    }

    /// Default order, as field names optionally followed by `desc`.
    pub fn with_default_order<I, S>(mut self, order: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.default_order = order.into_iter().map(Into::into).collect();
        self
    }

    /// Declare the self-referencing `Many2One` that `child_of` follows.
    pub fn with_parent(mut self, field: impl Into<String>) -> Self {
        self.parent_field = Some(field.into());
        self
    }

    fn push_field(&mut self, field: FieldDescriptor) {
        if let Some(&idx) = self.by_name.get(&field.name) {
            self.by_json.remove(&self.fields[idx].json);
            self.by_json.insert(field.json.clone(), idx);
            self.fields[idx] = Arc::new(field);
            return;
        }
        let idx = self.fields.len();
        self.by_name.insert(field.name.clone(), idx);
        self.by_json.insert(field.json.clone(), idx);
        self.by_snake.insert(field.name.to_snake_case(), idx);
        self.fields.push(Arc::new(field));
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Fields in declaration order, `id` first.
    pub fn fields(&self) -> &[Arc<FieldDescriptor>] {
        &self.fields
    }

    /// Look a field up by name, json name, or snake-cased name.
    pub fn get_field(&self, key: &str) -> Option<&Arc<FieldDescriptor>> {
        self.by_name
            .get(key)
            .or_else(|| self.by_json.get(key))
            .or_else(|| self.by_snake.get(key))
            .map(|&idx| &self.fields[idx])
    }

    pub fn default_order(&self) -> &[String] {
        &self.default_order
    }

    /// The parent relation followed by `child_of`, if it is a `Many2One`
    /// back to this model.
    pub fn parent_field(&self) -> Option<&Arc<FieldDescriptor>> {
        let key = self.parent_field.as_deref()?;
        self.get_field(key).filter(|f| {
            f.field_type == FieldType::Many2One && f.relation.as_deref() == Some(self.name.as_str())
        })
    }

    pub(crate) fn declared_parent(&self) -> Option<&str> {
        self.parent_field.as_deref()
    }

    /// Stored columns in declaration order.
    pub fn columns(&self) -> impl Iterator<Item = &Arc<FieldDescriptor>> {
        self.fields.iter().filter(|f| f.is_column())
    }
}
