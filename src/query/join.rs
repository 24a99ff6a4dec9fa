//! Table join planning.
//!
//! A [`JoinPlan`] starts with the query's base table and grows one
//! `LEFT JOIN` per relation hop. Aliases are the base table followed by the
//! json names of the hops, joined by `__`, so the same hop reached from two
//! field references maps to the same alias and is joined once. Aliases
//! longer than the dialect's identifier limit are replaced by `f<N>`.

use crate::adapter::DbAdapter;
use crate::error::ResolutionError;
use crate::schema::{FieldDescriptor, Registry, ResolvedPath};
use std::collections::HashMap;

const ALIAS_SEPARATOR: &str = "__";
const LINK_SUFFIX: &str = "rel";

/// One table of a join plan.
///
/// For joined tables the condition is
/// `alias.join_field = other_table.other_field`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableJoin {
    pub table_name: String,
    pub alias: String,
    pub join_field: String,
    pub other_table: String,
    pub other_field: String,
    /// False only for the base table
    pub is_joined: bool,
}

/// A column of some table in the plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnRef {
    pub alias: String,
    pub column: String,
}

#[derive(Debug, Clone)]
pub struct JoinPlan {
    joins: Vec<TableJoin>,
    /// Long alias to position in `joins`
    index: HashMap<String, usize>,
    max_identifier_length: usize,
    next_short: usize,
}

impl JoinPlan {
    pub fn new(base_table: &str, max_identifier_length: usize) -> Self {
        let mut plan = Self {
            joins: Vec::new(),
            index: HashMap::new(),
            max_identifier_length,
            next_short: 0,
        };
        let alias = plan.short_alias(base_table);
        plan.index.insert(base_table.to_string(), 0);
        plan.joins.push(TableJoin {
            table_name: base_table.to_string(),
            alias,
            join_field: String::new(),
            other_table: String::new(),
            other_field: String::new(),
            is_joined: false,
        });
        plan
    }

    pub fn joins(&self) -> &[TableJoin] {
        &self.joins
    }

    pub fn len(&self) -> usize {
        self.joins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joins.is_empty()
    }

    pub fn base(&self) -> &TableJoin {
        &self.joins[0]
    }

    /// Columns need a table qualifier only once something is joined.
    pub fn is_qualified(&self) -> bool {
        self.joins.len() > 1
    }

    /// Long alias to the alias used in SQL, for every shortened alias.
    pub fn shortened_aliases(&self) -> impl Iterator<Item = (&str, &str)> {
        self.index.iter().filter_map(move |(long, &idx)| {
            let alias = self.joins[idx].alias.as_str();
            (alias != long).then_some((long.as_str(), alias))
        })
    }

    /// Add the joins `path` needs and return the column it compares.
    ///
    /// Idempotent: adding the same path twice adds no join the second time.
    /// A terminal one-to-many joins its target and yields the target id; a
    /// terminal many-to-many joins only the link table and yields its
    /// `their_fk` column.
    ///
    /// # Errors
    ///
    /// `IncompleteRelation` when a relation hop lacks join metadata and
    /// `UnknownModel` when its target is not registered.
    pub fn add_path(
        &mut self,
        registry: &Registry,
        path: &ResolvedPath,
    ) -> Result<ColumnRef, ResolutionError> {
        let mut long = self.joins[0].table_name.clone();
        let mut current = self.joins[0].alias.clone();

        for step in path.hops() {
            let (next_long, alias) = self.add_hop(registry, &step.model, &step.field, &long, &current)?;
            long = next_long;
            current = alias;
        }

        let terminal = path.terminal();
        let field = &terminal.field;
        if field.field_type.is_reverse_fk() {
            let (_, alias) = self.add_hop(registry, &terminal.model, field, &long, &current)?;
            return Ok(ColumnRef {
                alias,
                column: "id".to_string(),
            });
        }
        if field.field_type.is_m2m() {
            let link = field.link.as_ref().ok_or_else(|| incomplete(&terminal.model, field))?;
            let link_long = link_alias(&long, field);
            let alias = self.join(
                &link_long,
                &link.table,
                &link.our_fk,
                &current,
                "id",
            );
            return Ok(ColumnRef {
                alias,
                column: link.their_fk.clone(),
            });
        }
        Ok(ColumnRef {
            alias: current,
            column: field.json.clone(),
        })
    }

    /// Join the target of relation `field` reached from `from`.
    /// Returns the target's long and SQL aliases.
    fn add_hop(
        &mut self,
        registry: &Registry,
        model: &str,
        field: &FieldDescriptor,
        long: &str,
        from: &str,
    ) -> Result<(String, String), ResolutionError> {
        let target_name = field.relation.as_deref().ok_or_else(|| incomplete(model, field))?;
        let target = registry.model(target_name)?;
        let target_long = format!("{long}{ALIAS_SEPARATOR}{}", field.json);

        let alias = if field.field_type.is_fk() {
            self.join(&target_long, target.table(), "id", from, &field.json)
        } else if field.field_type.is_reverse_fk() {
            let fk = field.reverse_fk.as_deref().ok_or_else(|| incomplete(model, field))?;
            self.join(&target_long, target.table(), fk, from, "id")
        } else if field.field_type.is_m2m() {
            let link = field.link.as_ref().ok_or_else(|| incomplete(model, field))?;
            let link_alias = self.join(&link_alias(long, field), &link.table, &link.our_fk, from, "id");
            self.join(&target_long, target.table(), "id", &link_alias, &link.their_fk)
        } else {
            return Err(ResolutionError::NotARelation {
                model: model.to_string(),
                segment: field.name.clone(),
            });
        };
        Ok((target_long, alias))
    }

    /// Add a join unless its long alias is already planned.
    fn join(
        &mut self,
        long: &str,
        table: &str,
        join_field: &str,
        other_table: &str,
        other_field: &str,
    ) -> String {
        if let Some(&idx) = self.index.get(long) {
            return self.joins[idx].alias.clone();
        }
        let alias = self.short_alias(long);
        self.index.insert(long.to_string(), self.joins.len());
        self.joins.push(TableJoin {
            table_name: table.to_string(),
            alias: alias.clone(),
            join_field: join_field.to_string(),
            other_table: other_table.to_string(),
            other_field: other_field.to_string(),
            is_joined: true,
        });
        alias
    }

    fn short_alias(&mut self, long: &str) -> String {
        if long.len() <= self.max_identifier_length {
            return long.to_string();
        }
        let alias = format!("f{}", self.next_short);
        self.next_short += 1;
        alias
    }

    /// Render the FROM clause body.
    pub fn render(&self, adapter: &dyn DbAdapter) -> String {
        let q = |s: &str| adapter.quote_identifier(s);
        let mut sql = String::new();
        for join in &self.joins {
            let table = if join.alias == join.table_name {
                q(&join.table_name)
            } else {
                format!("{} AS {}", q(&join.table_name), q(&join.alias))
            };
            if join.is_joined {
                sql.push_str(&format!(
                    " LEFT JOIN {} ON {}.{} = {}.{}",
                    table,
                    q(&join.alias),
                    q(&join.join_field),
                    q(&join.other_table),
                    q(&join.other_field)
                ));
            } else {
                sql.push_str(&table);
            }
        }
        sql
    }

    /// Render a column, qualified when the plan joins anything.
    pub fn render_column(&self, adapter: &dyn DbAdapter, column: &ColumnRef) -> String {
        if self.is_qualified() {
            format!(
                "{}.{}",
                adapter.quote_identifier(&column.alias),
                adapter.quote_identifier(&column.column)
            )
        } else {
            adapter.quote_identifier(&column.column)
        }
    }

    /// The base table's id column.
    pub fn base_id(&self) -> ColumnRef {
        ColumnRef {
            alias: self.joins[0].alias.clone(),
            column: "id".to_string(),
        }
    }
}

fn link_alias(long: &str, field: &FieldDescriptor) -> String {
    format!("{long}{ALIAS_SEPARATOR}{}{ALIAS_SEPARATOR}{LINK_SUFFIX}", field.json)
}

fn incomplete(model: &str, field: &FieldDescriptor) -> ResolutionError {
    ResolutionError::IncompleteRelation {
        model: model.to_string(),
        field: field.name.clone(),
    }
}

/// Plan the joins of a single resolved path.
///
/// # Errors
///
/// See [`JoinPlan::add_path`].
pub fn plan_joins(
    registry: &Registry,
    base_table: &str,
    path: &ResolvedPath,
    max_identifier_length: usize,
) -> Result<Vec<TableJoin>, ResolutionError> {
    let mut plan = JoinPlan::new(base_table, max_identifier_length);
    plan.add_path(registry, path)?;
    Ok(plan.joins)
}
