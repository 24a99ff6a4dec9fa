//! Statement compilation.
//!
//! Select statements are compiled in two layers. The inner query joins
//! every table the field references need and keeps one row per base record
//! with `DISTINCT ON (id)`, ordered by id and then by the query's context
//! order. The outer query applies the caller's order, limit and offset to
//! that result, so context ordering never competes with user ordering.

use super::join::{ColumnRef, JoinPlan};
use super::statement::Statement;
use super::where_clause::WhereCompiler;
use super::{FieldMap, OrderField, Query};
use crate::adapter::DbAdapter;
use crate::condition::FieldPath;
use crate::error::{OrmError, ResolutionError};
use crate::schema::{
    resolve, FieldDescriptor, ModelDescriptor, Registry, ResolvedPath,
    DEFAULT_MAX_PATH_SUBSTITUTIONS,
};
use crate::value::Value;
use std::sync::Arc;

const SUBQUERY_ALIAS: &str = "q";
const COUNT_ALIAS: &str = "__count";

/// A requested output column.
struct Output {
    path: ResolvedPath,
    alias: String,
}

/// Joins, WHERE clause and parameters shared by every statement on a query.
struct Base {
    plan: JoinPlan,
    where_sql: String,
    params: Vec<Value>,
}

impl Base {
    fn where_clause(&self) -> String {
        if self.where_sql.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.where_sql)
        }
    }
}

pub struct QueryCompiler<'a> {
    registry: &'a Registry,
    adapter: &'a dyn DbAdapter,
    max_substitutions: usize,
}

impl<'a> QueryCompiler<'a> {
    pub fn new(registry: &'a Registry, adapter: &'a dyn DbAdapter) -> Self {
        Self {
            registry,
            adapter,
            max_substitutions: DEFAULT_MAX_PATH_SUBSTITUTIONS,
        }
    }

    pub fn with_max_substitutions(mut self, max_substitutions: usize) -> Self {
        self.max_substitutions = max_substitutions;
        self
    }

    fn q(&self, ident: &str) -> String {
        self.adapter.quote_identifier(ident)
    }

    fn resolve(&self, model: &str, path: &FieldPath) -> Result<ResolvedPath, OrmError> {
        Ok(resolve(self.registry, model, path, self.max_substitutions)?)
    }

    fn where_compiler<'m>(&'m self, model: &'m str) -> WhereCompiler<'m> {
        WhereCompiler {
            registry: self.registry,
            adapter: self.adapter,
            model,
            max_substitutions: self.max_substitutions,
        }
    }

    /// Plan joins for `extra` paths plus every condition leaf, then render
    /// the WHERE clause against the complete plan.
    fn base(
        &self,
        query: &Query,
        with_context: bool,
        extra: &[&ResolvedPath],
    ) -> Result<Base, OrmError> {
        let model = self.registry.model(query.model())?;
        let cond = query.effective_condition(with_context);
        cond.validate()?;

        let mut plan = JoinPlan::new(model.table(), self.adapter.max_identifier_length());
        for path in extra {
            plan.add_path(self.registry, path)?;
        }
        let wc = self.where_compiler(query.model());
        wc.register(&cond, &mut plan)?;

        let mut params = Vec::new();
        let where_sql = wc.compile(&cond, &mut plan, &mut params)?;
        Ok(Base {
            plan,
            where_sql,
            params,
        })
    }

    fn column(&self, plan: &mut JoinPlan, path: &ResolvedPath) -> Result<String, OrmError> {
        let column: ColumnRef = plan.add_path(self.registry, path)?;
        Ok(plan.render_column(self.adapter, &column))
    }

    /// Output alias: the json names of the requested segments, joined by
    /// `__`. Related fields keep their own name rather than the one they
    /// delegate to.
    fn output_alias(&self, model: &str, path: &FieldPath) -> Result<String, OrmError> {
        let mut names = Vec::with_capacity(path.len());
        let mut current = model.to_string();
        for (idx, segment) in path.segments().iter().enumerate() {
            let descriptor = self.registry.model(&current)?;
            let field = descriptor
                .get_field(segment.name())
                .or_else(|| descriptor.get_field(segment.json()))
                .ok_or_else(|| ResolutionError::UnknownField {
                    model: current.clone(),
                    segment: segment.name().to_string(),
                })?;
            names.push(field.json.clone());
            if idx + 1 < path.len() {
                let prefix = FieldPath::new(path.segments()[..=idx].to_vec());
                let reached = self.resolve(model, &prefix)?;
                current = reached.terminal().field.relation.clone().ok_or_else(|| {
                    ResolutionError::NotARelation {
                        model: current.clone(),
                        segment: segment.name().to_string(),
                    }
                })?;
            }
        }
        Ok(names.join("__"))
    }

    /// Resolve requested fields, `id` first, without duplicates.
    fn outputs(&self, model: &ModelDescriptor, fields: &[FieldPath]) -> Result<Vec<Output>, OrmError> {
        let requested: Vec<FieldPath> = if fields.is_empty() {
            model
                .columns()
                .map(|f| FieldPath::parse(&f.json))
                .collect()
        } else {
            std::iter::once(FieldPath::parse("id"))
                .chain(fields.iter().cloned())
                .collect()
        };
        let mut outputs: Vec<Output> = Vec::with_capacity(requested.len());
        for path in &requested {
            let alias = self.output_alias(model.name(), path)?;
            if outputs.iter().any(|o| o.alias == alias) {
                continue;
            }
            outputs.push(Output {
                path: self.resolve(model.name(), path)?,
                alias,
            });
        }
        Ok(outputs)
    }

    fn order_fields(&self, query: &Query, model: &ModelDescriptor) -> Result<Vec<OrderField>, OrmError> {
        if !query.order_fields().is_empty() {
            return Ok(query.order_fields().to_vec());
        }
        Ok(OrderField::parse_list(&model.default_order().join(", "))?)
    }

    fn limit_offset(&self, query: &Query) -> String {
        let mut sql = String::new();
        if let Some(limit) = query.limit_value() {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        if query.offset_value() > 0 {
            sql.push_str(&format!(" OFFSET {}", query.offset_value()));
        }
        sql
    }

    fn direction(descending: bool) -> &'static str {
        if descending {
            " DESC"
        } else {
            ""
        }
    }

    /// Inner `SELECT DISTINCT ON (id)` over `outputs`.
    fn distinct_select(
        &self,
        query: &Query,
        with_context: bool,
        outputs: &[Output],
    ) -> Result<(String, Vec<Value>), OrmError> {
        let context_order: Vec<ResolvedPath> = query
            .context_order()
            .iter()
            .map(|o| self.resolve(query.model(), &o.path))
            .collect::<Result<_, _>>()?;
        let group: Vec<ResolvedPath> = query
            .group_fields()
            .iter()
            .map(|p| self.resolve(query.model(), p))
            .collect::<Result<_, _>>()?;
        let extra: Vec<&ResolvedPath> = outputs
            .iter()
            .map(|o| &o.path)
            .chain(context_order.iter())
            .chain(group.iter())
            .collect();

        let mut base = self.base(query, with_context, &extra)?;
        let base_id = base.plan.base_id();
        let id = base.plan.render_column(self.adapter, &base_id);

        let mut columns = Vec::with_capacity(outputs.len());
        for output in outputs {
            let col = self.column(&mut base.plan, &output.path)?;
            columns.push(format!("{col} AS {}", self.q(&output.alias)));
        }

        let mut order = id.clone();
        for (field, path) in query.context_order().iter().zip(&context_order) {
            let col = self.column(&mut base.plan, path)?;
            order.push_str(&format!(", {col}{}", Self::direction(field.descending)));
        }

        let sql = format!(
            "SELECT DISTINCT ON ({id}) {} FROM {}{} ORDER BY {order}",
            columns.join(", "),
            base.plan.render(self.adapter),
            base.where_clause(),
        );
        Ok((sql, base.params))
    }

    /// Compile a select of `fields` (all stored columns when empty).
    ///
    /// Output columns are named by [`FieldPath::alias`]-style json paths,
    /// e.g. `manager_id__name`. The base `id` is always selected.
    ///
    /// # Errors
    ///
    /// Resolution and condition errors.
    pub fn select(
        &self,
        query: &Query,
        fields: &[FieldPath],
        with_context: bool,
    ) -> Result<Statement, OrmError> {
        let model = self.registry.model(query.model())?;
        let order = self.order_fields(query, model)?;

        let mut outputs = self.outputs(model, fields)?;
        let mut order_aliases = Vec::with_capacity(order.len());
        for field in &order {
            let alias = self.output_alias(model.name(), &field.path)?;
            if !outputs.iter().any(|o| o.alias == alias) {
                outputs.push(Output {
                    path: self.resolve(model.name(), &field.path)?,
                    alias: alias.clone(),
                });
            }
            order_aliases.push(format!("{}{}", self.q(&alias), Self::direction(field.descending)));
        }

        let (inner, params) = self.distinct_select(query, with_context, &outputs)?;
        let mut sql = format!("SELECT * FROM ({inner}) AS {}", self.q(SUBQUERY_ALIAS));
        if !order_aliases.is_empty() {
            sql.push_str(&format!(" ORDER BY {}", order_aliases.join(", ")));
        }
        sql.push_str(&self.limit_offset(query));
        Ok(Statement::new(sql, params))
    }

    /// Compile a grouped select.
    ///
    /// Group fields are selected as is; other requested fields are wrapped
    /// in their aggregate (`sum` for numeric fields unless configured) and
    /// left out when they have none. A `count(1)` column named `__count`
    /// reports the number of records per group.
    ///
    /// # Errors
    ///
    /// Resolution and condition errors.
    pub fn select_grouped(
        &self,
        query: &Query,
        fields: &[FieldPath],
        with_context: bool,
    ) -> Result<Statement, OrmError> {
        let model = self.registry.model(query.model())?;

        let mut outputs: Vec<Output> = Vec::new();
        // One GROUP BY expression per group field, even a repeated one;
        // the selected columns are distinct.
        let mut grouped = Vec::with_capacity(query.group_fields().len());
        let mut group_aliases = Vec::with_capacity(query.group_fields().len());
        for path in query.group_fields() {
            let alias = self.output_alias(model.name(), path)?;
            if !outputs.iter().any(|o| o.alias == alias) {
                outputs.push(Output {
                    path: self.resolve(model.name(), path)?,
                    alias: alias.clone(),
                });
            }
            grouped.push(self.q(&alias));
            if !group_aliases.contains(&alias) {
                group_aliases.push(alias);
            }
        }

        let mut aggregates = Vec::new();
        for path in fields {
            let alias = self.output_alias(model.name(), path)?;
            if group_aliases.contains(&alias) || aggregates.iter().any(|(a, _)| *a == alias) {
                continue;
            }
            let resolved = self.resolve(model.name(), path)?;
            let field: Arc<FieldDescriptor> = Arc::clone(&resolved.terminal().field);
            let Some(aggregate) = field.effective_aggregate() else {
                log::debug!("no aggregate for {}, left out of grouped select", alias);
                continue;
            };
            aggregates.push((alias.clone(), aggregate));
            outputs.push(Output { path: resolved, alias });
        }

        let (inner, params) = self.distinct_select(query, with_context, &outputs)?;

        let mut columns: Vec<String> = group_aliases.iter().map(|a| self.q(a)).collect();
        for (alias, aggregate) in &aggregates {
            columns.push(format!(
                "{}({}) AS {}",
                aggregate.function(),
                self.q(alias),
                self.q(alias)
            ));
        }
        columns.push(format!("count(1) AS {}", self.q(COUNT_ALIAS)));

        let mut sql = format!(
            "SELECT {} FROM ({inner}) AS {}",
            columns.join(", "),
            self.q(SUBQUERY_ALIAS)
        );
        if !grouped.is_empty() {
            sql.push_str(&format!(" GROUP BY {}", grouped.join(", ")));
        }

        let mut order = Vec::new();
        for field in query.order_fields() {
            let alias = self.output_alias(model.name(), &field.path)?;
            if group_aliases.contains(&alias) || aggregates.iter().any(|(a, _)| *a == alias) {
                order.push(format!("{}{}", self.q(&alias), Self::direction(field.descending)));
            } else {
                log::debug!("order by {} ignored: not grouped or aggregated", alias);
            }
        }
        if order.is_empty() {
            order = group_aliases.iter().map(|a| self.q(a)).collect();
        }
        if !order.is_empty() {
            sql.push_str(&format!(" ORDER BY {}", order.join(", ")));
        }
        sql.push_str(&self.limit_offset(query));
        Ok(Statement::new(sql, params))
    }

    /// Number of distinct base records matching the query. Limit and offset
    /// are ignored.
    pub fn count(&self, query: &Query, with_context: bool) -> Result<Statement, OrmError> {
        let model = self.registry.model(query.model())?;
        let id = self.resolve(model.name(), &FieldPath::parse("id"))?;
        let outputs = vec![Output {
            path: id,
            alias: "id".to_string(),
        }];
        let (inner, params) = self.distinct_select(query, with_context, &outputs)?;
        Ok(Statement::new(
            format!(
                "SELECT COUNT(*) AS {} FROM ({inner}) AS {}",
                self.q("count"),
                self.q(SUBQUERY_ALIAS)
            ),
            params,
        ))
    }

    /// `SELECT id` of the records matching the query's own filter.
    fn id_subquery(&self, query: &Query) -> Result<Option<(String, Vec<Value>)>, OrmError> {
        if query.condition().is_empty() {
            return Ok(None);
        }
        let base = self.base(query, false, &[])?;
        let id = base.plan.render_column(self.adapter, &base.plan.base_id());
        let sql = format!(
            "SELECT {id} FROM {}{}",
            base.plan.render(self.adapter),
            base.where_clause()
        );
        Ok(Some((sql, base.params)))
    }

    fn column_field<'m>(
        &self,
        model: &'m ModelDescriptor,
        key: &str,
    ) -> Result<&'m Arc<FieldDescriptor>, ResolutionError> {
        let field = model
            .get_field(key)
            .ok_or_else(|| ResolutionError::UnknownField {
                model: model.name().to_string(),
                segment: key.to_string(),
            })?;
        if !field.is_column() {
            return Err(ResolutionError::NotAColumn {
                model: model.name().to_string(),
                field: field.name.clone(),
            });
        }
        Ok(field)
    }

    /// Compile an `INSERT ... RETURNING id`.
    ///
    /// Nullable foreign keys holding the absent sentinel are left out; null
    /// values are written as a literal `NULL`.
    ///
    /// # Errors
    ///
    /// `UnknownField` and `NotAColumn` for keys that are not stored columns.
    pub fn insert(&self, model: &str, data: &FieldMap) -> Result<Statement, OrmError> {
        let descriptor = self.registry.model(model)?;
        let mut columns = Vec::with_capacity(data.len());
        let mut marks = Vec::with_capacity(data.len());
        let mut params = Vec::new();
        for (key, value) in data {
            let field = self.column_field(descriptor, key)?;
            let value = column_value(field, value.clone());
            if field.field_type.is_fk() && !field.required && value.is_absent_relation() {
                continue;
            }
            columns.push(self.q(&field.json));
            if value.is_null() {
                marks.push("NULL".to_string());
            } else {
                marks.push("?".to_string());
                params.push(value);
            }
        }

        let table = self.q(descriptor.table());
        let sql = if columns.is_empty() {
            format!("INSERT INTO {table} DEFAULT VALUES{}", self.adapter.returning_id())
        } else {
            format!(
                "INSERT INTO {table} ({}) VALUES ({}){}",
                columns.join(", "),
                marks.join(", "),
                self.adapter.returning_id()
            )
        };
        Ok(Statement::new(sql, params))
    }

    /// Compile an `UPDATE` of the records matching the query's filter.
    ///
    /// A foreign key set to the zero sentinel is left untouched, while an
    /// explicit null clears it.
    ///
    /// # Errors
    ///
    /// `NothingToWrite` when no column remains to be set, plus the errors of
    /// [`QueryCompiler::insert`].
    pub fn update(&self, query: &Query, data: &FieldMap) -> Result<Statement, OrmError> {
        let descriptor = self.registry.model(query.model())?;
        let mut sets = Vec::with_capacity(data.len());
        let mut params = Vec::new();
        for (key, value) in data {
            let field = self.column_field(descriptor, key)?;
            let value = column_value(field, value.clone());
            if field.json == "id" {
                continue;
            }
            if value.is_null() {
                sets.push(format!("{} = NULL", self.q(&field.json)));
                continue;
            }
            if field.field_type.is_fk() && !field.required && value.is_absent_relation() {
                continue;
            }
            sets.push(format!("{} = ?", self.q(&field.json)));
            params.push(value);
        }
        if sets.is_empty() {
            return Err(ResolutionError::NothingToWrite {
                model: descriptor.name().to_string(),
            }
            .into());
        }

        let mut sql = format!("UPDATE {} SET {}", self.q(descriptor.table()), sets.join(", "));
        if let Some((ids, where_params)) = self.id_subquery(query)? {
            sql.push_str(&format!(" WHERE {} IN ({ids})", self.q("id")));
            params.extend(where_params);
        }
        Ok(Statement::new(sql, params))
    }

    /// Compile a `DELETE` of the records matching the query's filter.
    pub fn delete(&self, query: &Query) -> Result<Statement, OrmError> {
        let descriptor = self.registry.model(query.model())?;
        let mut sql = format!("DELETE FROM {}", self.q(descriptor.table()));
        let mut params = Vec::new();
        if let Some((ids, where_params)) = self.id_subquery(query)? {
            sql.push_str(&format!(" WHERE {} IN ({ids})", self.q("id")));
            params = where_params;
        }
        Ok(Statement::new(sql, params))
    }

    /// Statements replacing the targets of many-to-many `field` on
    /// `records`: one `DELETE` from the link table, then one multi-row
    /// `INSERT` when `targets` is not empty.
    ///
    /// # Errors
    ///
    /// `UnknownField`, or `NotARelation` when `field` is not many-to-many.
    pub fn link_statements(
        &self,
        model: &str,
        records: &[i64],
        field: &str,
        targets: &[i64],
    ) -> Result<Vec<Statement>, OrmError> {
        let descriptor = self.registry.model(model)?;
        let field_desc = descriptor
            .get_field(field)
            .ok_or_else(|| ResolutionError::UnknownField {
                model: model.to_string(),
                segment: field.to_string(),
            })?;
        let link = match (&field_desc.link, field_desc.field_type.is_m2m()) {
            (Some(link), true) => link,
            _ => {
                return Err(ResolutionError::NotARelation {
                    model: model.to_string(),
                    segment: field.to_string(),
                }
                .into())
            }
        };
        if records.is_empty() {
            return Ok(Vec::new());
        }

        let table = self.q(&link.table);
        let ours = self.q(&link.our_fk);
        let theirs = self.q(&link.their_fk);
        let marks = vec!["?"; records.len()].join(", ");
        let mut statements = vec![Statement::new(
            format!("DELETE FROM {table} WHERE {ours} IN ({marks})"),
            records.iter().copied().map(Value::RelationId).collect(),
        )];

        if !targets.is_empty() {
            let mut rows = Vec::with_capacity(records.len() * targets.len());
            let mut params = Vec::with_capacity(rows.capacity() * 2);
            for &record in records {
                for &target in targets {
                    rows.push("(?, ?)");
                    params.push(Value::RelationId(record));
                    params.push(Value::RelationId(target));
                }
            }
            statements.push(Statement::new(
                format!("INSERT INTO {table} ({ours}, {theirs}) VALUES {}", rows.join(", ")),
                params,
            ));
        }
        Ok(statements)
    }
}

/// Coerce a written value to the column's kind.
fn column_value(field: &FieldDescriptor, value: Value) -> Value {
    match value {
        Value::Bool(false) if field.field_type.is_fk() => Value::Null,
        other => other.coerce_to(field.field_type.kind()),
    }
}
