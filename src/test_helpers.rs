//! In-memory [`Database`] for unit-of-work tests.
//!
//! Transactions buffer every statement they run. Commit appends the buffer
//! to the committed log; rollback and drop discard it. Failures and result
//! rows can be scripted per attempt, where attempt N is the N-th `begin`.

use crate::adapter::PostgresAdapter;
use crate::environment::EnvironmentManager;
use crate::executor::{Database, DbError, Executor, Row, TransactionHandle};
use crate::schema::{FieldDescriptor, FieldType, LinkTable, ModelDescriptor, Registry};
use crate::transaction::{IsolationLevel, TransactionError};
use crate::value::Value;
use may_postgres::types::ToSql;
use sha2::{Digest, Sha256};
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct MockState {
    committed: Vec<String>,
    executed: Vec<String>,
    begins: u32,
    commits: u32,
    rollbacks: u32,
    isolation_levels: Vec<IsolationLevel>,
    begin_failures: HashMap<u32, TransactionError>,
    commit_failures: HashMap<u32, DbError>,
    execute_failures: HashMap<u32, DbError>,
    results: VecDeque<Vec<Row>>,
}

#[derive(Clone, Default)]
pub struct MockDatabase {
    state: Arc<Mutex<MockState>>,
}

impl MockDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the given attempt before its transaction opens.
    pub fn fail_begin_on(&self, attempt: u32, err: TransactionError) {
        self.state.lock().unwrap().begin_failures.insert(attempt, err);
    }

    /// Fail the commit of the given attempt.
    pub fn fail_commit_on(&self, attempt: u32, err: DbError) {
        self.state.lock().unwrap().commit_failures.insert(attempt, err);
    }

    /// Fail the first statement of the given attempt.
    pub fn fail_execute_on(&self, attempt: u32, err: DbError) {
        self.state.lock().unwrap().execute_failures.insert(attempt, err);
    }

    /// Queue the rows returned by the next query.
    pub fn push_result(&self, rows: Vec<Row>) {
        self.state.lock().unwrap().results.push_back(rows);
    }

    pub fn committed(&self) -> Vec<String> {
        self.state.lock().unwrap().committed.clone()
    }

    /// Every statement sent, committed or not.
    pub fn executed(&self) -> Vec<String> {
        self.state.lock().unwrap().executed.clone()
    }

    pub fn begins(&self) -> u32 {
        self.state.lock().unwrap().begins
    }

    pub fn commits(&self) -> u32 {
        self.state.lock().unwrap().commits
    }

    pub fn rollbacks(&self) -> u32 {
        self.state.lock().unwrap().rollbacks
    }

    pub fn isolation_levels(&self) -> Vec<IsolationLevel> {
        self.state.lock().unwrap().isolation_levels.clone()
    }

    /// SHA-256 over the committed log.
    pub fn checksum(&self) -> String {
        let mut hasher = Sha256::new();
        for statement in &self.state.lock().unwrap().committed {
            hasher.update(statement.as_bytes());
            hasher.update(b"\n");
        }
        format!("{:x}", hasher.finalize())
    }
}

impl Database for MockDatabase {
    fn begin(&self, isolation_level: IsolationLevel) -> Result<Box<dyn TransactionHandle>, TransactionError> {
        let mut state = self.state.lock().unwrap();
        state.begins += 1;
        let attempt = state.begins;
        if let Some(err) = state.begin_failures.remove(&attempt) {
            return Err(err);
        }
        state.isolation_levels.push(isolation_level);
        Ok(Box::new(MockTransaction {
            state: Arc::clone(&self.state),
            attempt: state.begins,
            pending: RefCell::new(Vec::new()),
            closed: false,
        }))
    }
}

struct MockTransaction {
    state: Arc<Mutex<MockState>>,
    attempt: u32,
    pending: RefCell<Vec<String>>,
    closed: bool,
}

impl MockTransaction {
    fn run(&self, query: &str, params: &[&dyn ToSql]) -> Result<(), DbError> {
        let line = format!("{query} {params:?}");
        let mut state = self.state.lock().unwrap();
        state.executed.push(line.clone());
        if let Some(err) = state.execute_failures.remove(&self.attempt) {
            return Err(err);
        }
        self.pending.borrow_mut().push(line);
        Ok(())
    }
}

impl Executor for MockTransaction {
    fn execute(&self, query: &str, params: &[&dyn ToSql]) -> Result<u64, DbError> {
        self.run(query, params)?;
        Ok(1)
    }

    fn query_all(&self, query: &str, params: &[&dyn ToSql]) -> Result<Vec<Row>, DbError> {
        self.run(query, params)?;
        Ok(self.state.lock().unwrap().results.pop_front().unwrap_or_default())
    }
}

impl TransactionHandle for MockTransaction {
    fn commit(mut self: Box<Self>) -> Result<(), TransactionError> {
        self.closed = true;
        let mut state = self.state.lock().unwrap();
        if let Some(err) = state.commit_failures.remove(&self.attempt) {
            state.rollbacks += 1;
            return Err(TransactionError::Database(err));
        }
        let pending = std::mem::take(&mut *self.pending.borrow_mut());
        state.committed.extend(pending);
        state.commits += 1;
        Ok(())
    }

    fn rollback(mut self: Box<Self>) -> Result<(), TransactionError> {
        self.closed = true;
        self.state.lock().unwrap().rollbacks += 1;
        Ok(())
    }
}

impl Drop for MockTransaction {
    fn drop(&mut self) {
        if !self.closed {
            self.state.lock().unwrap().rollbacks += 1;
        }
    }
}

/// A row of `(column, value)` pairs.
pub fn row(pairs: &[(&str, Value)]) -> Row {
    Row::new(
        pairs.iter().map(|(c, _)| c.to_string()).collect(),
        pairs.iter().map(|(_, v)| v.clone()).collect(),
    )
}

pub fn conflict() -> DbError {
    DbError::Postgres {
        sqlstate: Some("40001".into()),
        message: "could not serialize access due to concurrent update".into(),
    }
}

/// People with managers and tags, and products filed under a category tree.
pub fn registry() -> Arc<Registry> {
    let registry = Registry::builder()
        .model(
            ModelDescriptor::new("Person")
                .field(FieldDescriptor::new("Name", FieldType::Char).required())
                .field(FieldDescriptor::new("Age", FieldType::Integer))
                .field(FieldDescriptor::new("Active", FieldType::Boolean))
                .field(FieldDescriptor::many2one("Manager", "Person"))
                .field(FieldDescriptor::many2many(
                    "Tags",
                    "Tag",
                    LinkTable::new("person_tag_rel", "person_id", "tag_id"),
                )),
        )
        .model(ModelDescriptor::new("Tag").field(FieldDescriptor::new("Name", FieldType::Char)))
        .model(
            ModelDescriptor::new("Category")
                .field(FieldDescriptor::new("Name", FieldType::Char))
                .field(FieldDescriptor::many2one("Parent", "Category"))
                .with_parent("Parent"),
        )
        .model(
            ModelDescriptor::new("Product")
                .field(FieldDescriptor::new("Name", FieldType::Char))
                .field(FieldDescriptor::many2one("Category", "Category")),
        )
        .build()
        .unwrap();
    Arc::new(registry)
}

pub fn manager(db: &MockDatabase) -> EnvironmentManager {
    EnvironmentManager::new(Arc::new(db.clone()), Arc::new(PostgresAdapter::new()), registry())
}
