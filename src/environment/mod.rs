//! Environments: one unit of work.
//!
//! An [`Environment`] bundles the cursor of one transaction with the acting
//! user, a JSON context, a record cache and a recursion counter. It is
//! created by [`EnvironmentManager`] for each attempt of a unit of work and
//! is never shared between units of work, so its state lives in plain
//! `Cell`/`RefCell`s.

pub mod cache;
pub mod cursor;
pub mod manager;
mod prepare;

pub use cache::Cache;
pub use cursor::Cursor;
pub use manager::EnvironmentManager;

use crate::adapter::{is_valid_identifier, DbAdapter};
use crate::condition::FieldPath;
use crate::config::EnvironmentConfig;
use crate::error::{ConditionError, OrmError, ResolutionError};
use crate::executor::Row;
use crate::query::{FieldMap, Query, QueryCompiler, Statement};
use crate::schema::Registry;
use crate::value::{Kind, Value};
use serde_json::{Map, Value as JsonValue};
use std::cell::{Cell, Ref, RefCell};
use std::sync::Arc;

pub struct Environment {
    cursor: Cursor,
    uid: i64,
    context: RefCell<Map<String, JsonValue>>,
    cache: RefCell<Cache>,
    recursion_depth: Cell<u32>,
    registry: Arc<Registry>,
    adapter: Arc<dyn DbAdapter>,
    config: EnvironmentConfig,
}

/// Holds one level of the recursion counter; released on drop.
#[must_use = "the recursion level is released as soon as the guard is dropped"]
pub struct RecursionGuard<'a> {
    depth: &'a Cell<u32>,
}

impl Drop for RecursionGuard<'_> {
    fn drop(&mut self) {
        self.depth.set(self.depth.get().saturating_sub(1));
    }
}

impl Environment {
    pub(crate) fn new(
        cursor: Cursor,
        uid: i64,
        context: Map<String, JsonValue>,
        registry: Arc<Registry>,
        adapter: Arc<dyn DbAdapter>,
        config: EnvironmentConfig,
    ) -> Self {
        Self {
            cursor,
            uid,
            context: RefCell::new(context),
            cache: RefCell::new(Cache::new()),
            recursion_depth: Cell::new(0),
            registry,
            adapter,
            config,
        }
    }

    /// Acting user id.
    pub fn uid(&self) -> i64 {
        self.uid
    }

    pub fn context(&self) -> Ref<'_, Map<String, JsonValue>> {
        self.context.borrow()
    }

    pub fn cache(&self) -> Ref<'_, Cache> {
        self.cache.borrow()
    }

    pub fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn adapter(&self) -> &dyn DbAdapter {
        self.adapter.as_ref()
    }

    pub fn compiler(&self) -> QueryCompiler<'_> {
        QueryCompiler::new(&self.registry, self.adapter.as_ref())
            .with_max_substitutions(self.config.max_path_substitutions)
    }

    pub fn recursion_depth(&self) -> u32 {
        self.recursion_depth.get()
    }

    /// Enter one level of nested business logic.
    ///
    /// # Errors
    ///
    /// `OrmError::Recursion` when the configured depth is exceeded.
    pub fn enter(&self) -> Result<RecursionGuard<'_>, OrmError> {
        let depth = self.recursion_depth.get() + 1;
        let limit = self.config.max_recursion_depth;
        if depth > limit {
            return Err(OrmError::Recursion { depth, limit });
        }
        self.recursion_depth.set(depth);
        Ok(RecursionGuard {
            depth: &self.recursion_depth,
        })
    }

    pub(crate) fn into_cursor(self) -> Cursor {
        self.cursor
    }

    /// Ids of the records matching `query`, context filter included.
    pub fn search(&self, query: &Query) -> Result<Vec<i64>, OrmError> {
        let _guard = self.enter()?;
        self.ids(query, true)
    }

    fn ids(&self, query: &Query, with_context: bool) -> Result<Vec<i64>, OrmError> {
        let query = self.prepare_query(query)?;
        let statement = self
            .compiler()
            .select(&query, &[FieldPath::parse("id")], with_context)?;
        Ok(self
            .cursor
            .select(&statement)?
            .iter()
            .filter_map(|row| row.get("id").and_then(Value::as_id))
            .collect())
    }

    /// Read `fields` of the records matching `query` and cache them.
    pub fn search_read(&self, query: &Query, fields: &[FieldPath]) -> Result<Vec<Row>, OrmError> {
        let _guard = self.enter()?;
        let query = self.prepare_query(query)?;
        let statement = self.compiler().select(&query, fields, true)?;
        let rows = self.cursor.select(&statement)?;

        let mut cache = self.cache.borrow_mut();
        for row in &rows {
            let Some(id) = row.get("id").and_then(Value::as_id) else {
                continue;
            };
            let values: FieldMap = row
                .iter()
                .filter(|(column, _)| *column != "id")
                .map(|(column, value)| (column.to_string(), value.clone()))
                .collect();
            cache.update(query.model(), id, values);
        }
        Ok(rows)
    }

    /// Grouped read; every row carries a `__count` column.
    pub fn read_group(&self, query: &Query, fields: &[FieldPath]) -> Result<Vec<Row>, OrmError> {
        let _guard = self.enter()?;
        let query = self.prepare_query(query)?;
        let statement = self.compiler().select_grouped(&query, fields, true)?;
        self.cursor.select(&statement)
    }

    pub fn search_count(&self, query: &Query) -> Result<u64, OrmError> {
        let _guard = self.enter()?;
        let query = self.prepare_query(query)?;
        let statement = self.compiler().count(&query, true)?;
        let row = self.cursor.get(&statement)?;
        Ok(row
            .get("count")
            .and_then(Value::as_id)
            .map_or(0, |n| u64::try_from(n).unwrap_or(0)))
    }

    /// Split a write into stored columns and many-to-many assignments.
    fn split_links(&self, model: &str, data: FieldMap) -> Result<(FieldMap, Vec<(String, Vec<i64>)>), OrmError> {
        let descriptor = self.registry.model(model)?;
        let mut columns = FieldMap::new();
        let mut links = Vec::new();
        for (key, value) in data {
            let field = descriptor
                .get_field(&key)
                .ok_or_else(|| ResolutionError::UnknownField {
                    model: model.to_string(),
                    segment: key.clone(),
                })?;
            if field.field_type.is_m2m() {
                let ids = match value.coerce_to(Kind::RelationList) {
                    Value::RelationIds(ids) => ids,
                    Value::Null => Vec::new(),
                    Value::RelationId(id) => vec![id],
                    other => {
                        return Err(ConditionError::KindMismatch {
                            field: field.json.clone(),
                            expected: Kind::RelationList,
                            found: other.kind(),
                        }
                        .into())
                    }
                };
                links.push((field.name.clone(), ids));
            } else {
                columns.insert(key, value);
            }
        }
        Ok((columns, links))
    }

    fn write_links(&self, model: &str, ids: &[i64], links: &[(String, Vec<i64>)]) -> Result<(), OrmError> {
        let compiler = self.compiler();
        for (field, targets) in links {
            for statement in compiler.link_statements(model, ids, field, targets)? {
                self.cursor.execute(&statement)?;
            }
        }
        Ok(())
    }

    /// Insert one record and return its id.
    pub fn create(&self, model: &str, data: FieldMap) -> Result<i64, OrmError> {
        let _guard = self.enter()?;
        let (columns, links) = self.split_links(model, data)?;
        let statement = self.compiler().insert(model, &columns)?;
        let row = self.cursor.get(&statement)?;
        let id = row
            .get("id")
            .and_then(Value::as_id)
            .ok_or_else(|| OrmError::Other(format!("insert into {model} returned no id")))?;
        let links: Vec<_> = links.into_iter().filter(|(_, targets)| !targets.is_empty()).collect();
        self.write_links(model, &[id], &links)?;
        Ok(id)
    }

    /// Update the records matching `query` (context filter excluded) and
    /// return how many were matched.
    pub fn write(&self, query: &Query, data: FieldMap) -> Result<u64, OrmError> {
        let _guard = self.enter()?;
        let (columns, links) = self.split_links(query.model(), data)?;
        if columns.is_empty() && links.is_empty() {
            return Err(ResolutionError::NothingToWrite {
                model: query.model().to_string(),
            }
            .into());
        }
        let ids = self.ids(query, false)?;
        if ids.is_empty() {
            return Ok(0);
        }
        if !columns.is_empty() {
            let statement = self
                .compiler()
                .update(&Query::new(query.model()).for_ids(&ids), &columns)?;
            self.cursor.execute(&statement)?;
        }
        self.write_links(query.model(), &ids, &links)?;
        self.cache.borrow_mut().invalidate(query.model(), &ids);
        Ok(ids.len() as u64)
    }

    /// Delete the records matching `query` (context filter excluded) and
    /// return how many were matched.
    pub fn unlink(&self, query: &Query) -> Result<u64, OrmError> {
        let _guard = self.enter()?;
        let ids = self.ids(query, false)?;
        if ids.is_empty() {
            return Ok(0);
        }
        let statement = self.compiler().delete(&Query::new(query.model()).for_ids(&ids))?;
        self.cursor.execute(&statement)?;
        self.cache.borrow_mut().invalidate(query.model(), &ids);
        Ok(ids.len() as u64)
    }

    /// Run `f` with `key` set in the context, then restore the previous
    /// context entry.
    pub fn with_context<R>(&self, key: &str, value: JsonValue, f: impl FnOnce(&Environment) -> R) -> R {
        let previous = self.context.borrow_mut().insert(key.to_string(), value);
        let result = f(self);
        let mut context = self.context.borrow_mut();
        match previous {
            Some(previous) => context.insert(key.to_string(), previous),
            None => context.remove(key),
        };
        result
    }

    fn sequence_statement(&self, name: &str, sql: impl FnOnce(&dyn DbAdapter) -> String) -> Result<Statement, OrmError> {
        if !is_valid_identifier(name) {
            return Err(OrmError::Other(format!("invalid sequence name '{name}'")));
        }
        Ok(Statement::new(sql(self.adapter.as_ref()), Vec::new()))
    }

    pub fn create_sequence(&self, name: &str, increment: i64, start: i64) -> Result<(), OrmError> {
        let statement = self.sequence_statement(name, |a| a.create_sequence_sql(name, increment, start))?;
        self.cursor.execute(&statement).map(|_| ())
    }

    pub fn alter_sequence(&self, name: &str, increment: i64, restart: Option<i64>) -> Result<(), OrmError> {
        let statement = self.sequence_statement(name, |a| a.alter_sequence_sql(name, increment, restart))?;
        self.cursor.execute(&statement).map(|_| ())
    }

    pub fn drop_sequence(&self, name: &str) -> Result<(), OrmError> {
        let statement = self.sequence_statement(name, |a| a.drop_sequence_sql(name))?;
        self.cursor.execute(&statement).map(|_| ())
    }

    pub fn next_sequence_value(&self, name: &str) -> Result<i64, OrmError> {
        let statement = self.sequence_statement(name, |a| a.next_sequence_value_sql(name))?;
        self.cursor
            .get(&statement)?
            .get("value")
            .and_then(Value::as_id)
            .ok_or_else(|| OrmError::Other(format!("sequence {name} returned no value")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::{Condition, DeferredValue, Operator};
    use crate::test_helpers::{manager, row, MockDatabase};

    fn recurse(env: &Environment, levels: &mut u32) -> Result<(), OrmError> {
        let _guard = env.enter()?;
        *levels += 1;
        recurse(env, levels)
    }

    #[test]
    fn test_recursion_guard_trips_above_limit() {
        let db = MockDatabase::new();
        let mut levels = 0;
        let err = manager(&db)
            .run_unit_of_work(1, |env| {
                levels = 0;
                let err = recurse(env, &mut levels).unwrap_err();
                assert_eq!(env.recursion_depth(), 0);
                Err::<(), _>(err)
            })
            .unwrap_err();
        assert!(matches!(err, OrmError::Recursion { depth: 101, limit: 100 }));
        assert_eq!(levels, 100);
        assert_eq!(db.begins(), 1);
    }

    #[test]
    fn test_guard_releases_level_on_drop() {
        let db = MockDatabase::new();
        manager(&db)
            .run_unit_of_work(1, |env| {
                {
                    let _outer = env.enter()?;
                    let _inner = env.enter()?;
                    assert_eq!(env.recursion_depth(), 2);
                }
                assert_eq!(env.recursion_depth(), 0);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_child_of_expands_to_descendants() {
        let db = MockDatabase::new();
        db.push_result(vec![
            row(&[("id", Value::Integer(1))]),
            row(&[("id", Value::Integer(3))]),
        ]);
        db.push_result(vec![row(&[("id", Value::Integer(10))])]);

        let query = Query::new("Product").filter(Condition::new().field("Category").child_of(1));
        let ids = manager(&db).run_unit_of_work(1, |env| env.search(&query)).unwrap();

        assert_eq!(ids, vec![10]);
        let executed = db.executed();
        assert!(executed[0].starts_with("WITH RECURSIVE"));
        assert!(executed[0].ends_with("[1]"));
        assert!(executed[1].contains("WHERE \"category_id\" IN ($1, $2)"));
        assert!(executed[1].ends_with("[1, 3]"));
    }

    #[test]
    fn test_child_of_without_parent_compares_ids() {
        let db = MockDatabase::new();
        let query = Query::new("Person").filter(Condition::new().field("Manager").child_of(5));
        manager(&db).run_unit_of_work(1, |env| env.search(&query)).unwrap();
        let executed = db.executed();
        assert_eq!(executed.len(), 1);
        assert!(executed[0].contains("WHERE \"manager_id\" = $1"));
    }

    #[test]
    fn test_deferred_argument_sees_environment() {
        let db = MockDatabase::new();
        let query = Query::new("Person").filter(
            Condition::new()
                .field("Age")
                .apply_deferred(Operator::Equals, DeferredValue::new(|env| Ok(Value::Integer(env.uid())))),
        );
        manager(&db).run_unit_of_work(42, |env| env.search(&query)).unwrap();
        assert!(db.executed()[0].ends_with("[42]"));
    }

    #[test]
    fn test_search_read_fills_cache_and_write_invalidates() {
        let db = MockDatabase::new();
        db.push_result(vec![row(&[("id", Value::Integer(4)), ("name", "Ann".into())])]);
        db.push_result(vec![row(&[("id", Value::Integer(4))])]);

        manager(&db)
            .run_unit_of_work(1, |env| {
                let query = Query::new("Person").for_ids(&[4]);
                env.search_read(&query, &[FieldPath::parse("Name")])?;
                assert_eq!(env.cache().get("Person", 4, "name"), Some(&Value::Text("Ann".into())));

                let mut data = FieldMap::new();
                data.insert("Age".into(), 31.into());
                data.insert("Tags".into(), vec![7, 8].into());
                assert_eq!(env.write(&query, data)?, 1);
                assert!(!env.cache().contains("Person", 4));
                Ok(())
            })
            .unwrap();

        let committed = db.committed();
        assert_eq!(committed.len(), 5);
        assert!(committed[2].starts_with("UPDATE \"person\" SET \"age\" = $1 WHERE \"id\" IN"));
        assert!(committed[3].starts_with("DELETE FROM \"person_tag_rel\" WHERE \"person_id\" IN ($1)"));
        assert!(committed[4].starts_with("INSERT INTO \"person_tag_rel\" (\"person_id\", \"tag_id\") VALUES ($1, $2), ($3, $4)"));
    }

    #[test]
    fn test_write_with_no_match_sends_no_update() {
        let db = MockDatabase::new();
        let affected = manager(&db)
            .run_unit_of_work(1, |env| {
                let mut data = FieldMap::new();
                data.insert("Age".into(), 31.into());
                env.write(&Query::new("Person"), data)
            })
            .unwrap();
        assert_eq!(affected, 0);
        assert_eq!(db.executed().len(), 1);
    }

    #[test]
    fn test_create_with_links() {
        let db = MockDatabase::new();
        db.push_result(vec![row(&[("id", Value::Integer(9))])]);
        let id = manager(&db)
            .run_unit_of_work(1, |env| {
                let mut data = FieldMap::new();
                data.insert("Name".into(), "Bob".into());
                data.insert("Manager".into(), Value::RelationId(0));
                data.insert("Tags".into(), Value::RelationIds(vec![2]));
                env.create("Person", data)
            })
            .unwrap();
        assert_eq!(id, 9);
        let committed = db.committed();
        assert_eq!(committed.len(), 3);
        assert!(committed[0].starts_with("INSERT INTO \"person\" (\"name\") VALUES ($1)"));
        assert!(committed[2].ends_with("[9, 2]"));
    }

    #[test]
    fn test_unlink_deletes_matched_ids() {
        let db = MockDatabase::new();
        db.push_result(vec![row(&[("id", Value::Integer(2))]), row(&[("id", Value::Integer(5))])]);
        let removed = manager(&db)
            .run_unit_of_work(1, |env| {
                env.unlink(&Query::new("Person").filter(Condition::new().field("Active").equals(false)))
            })
            .unwrap();
        assert_eq!(removed, 2);
        let committed = db.committed();
        assert!(committed[1].starts_with("DELETE FROM \"person\" WHERE \"id\" IN"));
        assert!(committed[1].ends_with("[2, 5]"));
    }

    #[test]
    fn test_search_count() {
        let db = MockDatabase::new();
        db.push_result(vec![row(&[("count", Value::Integer(12))])]);
        let count = manager(&db)
            .run_unit_of_work(1, |env| env.search_count(&Query::new("Person")))
            .unwrap();
        assert_eq!(count, 12);
    }

    #[test]
    fn test_with_context_restores_previous_value() {
        let db = MockDatabase::new();
        let mut context = Map::new();
        context.insert("lang".into(), JsonValue::from("en_US"));
        manager(&db)
            .run_unit_of_work_with_context(1, context, |env| {
                let inner = env.with_context("lang", JsonValue::from("fr_FR"), |env| {
                    env.context().get("lang").cloned()
                });
                assert_eq!(inner, Some(JsonValue::from("fr_FR")));
                env.with_context("tz", JsonValue::from("UTC"), |_| ());
                assert_eq!(env.context().get("lang"), Some(&JsonValue::from("en_US")));
                assert!(env.context().get("tz").is_none());
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_sequences() {
        let db = MockDatabase::new();
        db.push_result(vec![row(&[("value", Value::Integer(100))])]);
        let value = manager(&db)
            .run_unit_of_work(1, |env| {
                env.create_sequence("invoice_seq", 1, 100)?;
                env.next_sequence_value("invoice_seq")
            })
            .unwrap();
        assert_eq!(value, 100);

        let err = manager(&db)
            .run_unit_of_work(1, |env| env.drop_sequence("x; DROP TABLE person"))
            .unwrap_err();
        assert!(matches!(err, OrmError::Other(_)));
    }
}
