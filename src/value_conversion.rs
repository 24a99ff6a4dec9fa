//! Value conversion utilities for SeaQuery to may_postgres.
//!
//! Compiled statements carry their parameters as `sea_query::Values`. This
//! module turns them into `ToSql` trait objects that `may_postgres` can bind.
//!
//! The conversion follows a two-pass pattern:
//! 1. First pass: collect all values into typed vectors
//! 2. Second pass: create references to the stored values
//!
//! This pattern ensures that references remain valid within the closure scope.

use crate::executor::DbError;
use chrono::{NaiveDate, NaiveDateTime};
use may_postgres::types::ToSql;
use sea_query::Value;

/// Convert SeaQuery values to may_postgres ToSql parameters and run `f` with them.
///
/// # Errors
///
/// Returns `DbError::Other` if an unsupported value type is encountered, or
/// whatever `f` returns.
pub(crate) fn with_converted_params<F, R>(values: &sea_query::Values, f: F) -> Result<R, DbError>
where
    F: FnOnce(&[&dyn ToSql]) -> Result<R, DbError>,
{
    let mut bools: Vec<bool> = Vec::new();
    let mut ints: Vec<i32> = Vec::new();
    let mut big_ints: Vec<i64> = Vec::new();
    let mut strings: Vec<String> = Vec::new();
    let mut doubles: Vec<f64> = Vec::new();
    let mut dates: Vec<NaiveDate> = Vec::new();
    let mut datetimes: Vec<NaiveDateTime> = Vec::new();
    let mut nulls: Vec<Option<i64>> = Vec::new();

    // First pass: collect all values into typed vectors
    for value in values.iter() {
        match value {
            Value::Bool(Some(b)) => bools.push(*b),
            Value::Int(Some(i)) => ints.push(*i),
            Value::BigInt(Some(i)) => big_ints.push(*i),
            Value::String(Some(s)) => strings.push(s.clone()),
            Value::Double(Some(d)) => doubles.push(*d),
            Value::ChronoDate(Some(d)) => dates.push(NaiveDate::clone(d)),
            Value::ChronoDateTime(Some(dt)) => datetimes.push(NaiveDateTime::clone(dt)),
            Value::Json(Some(j)) => {
                strings.push(serde_json::to_string(&**j).map_err(|e| {
                    DbError::Other(format!("Failed to serialize JSON: {}", e))
                })?);
            }
            Value::Bool(None)
            | Value::Int(None)
            | Value::BigInt(None)
            | Value::String(None)
            | Value::Double(None)
            | Value::ChronoDate(None)
            | Value::ChronoDateTime(None)
            | Value::Json(None) => nulls.push(None),
            _ => {
                return Err(DbError::Other(format!(
                    "Unsupported value type in query: {:?}",
                    value
                )));
            }
        }
    }

    // Second pass: create references to the stored values
    let mut bool_idx = 0;
    let mut int_idx = 0;
    let mut big_int_idx = 0;
    let mut string_idx = 0;
    let mut double_idx = 0;
    let mut date_idx = 0;
    let mut datetime_idx = 0;
    let mut null_idx = 0;

    let mut params: Vec<&dyn ToSql> = Vec::with_capacity(values.0.len());

    for value in values.iter() {
        match value {
            Value::Bool(Some(_)) => {
                params.push(&bools[bool_idx] as &dyn ToSql);
                bool_idx += 1;
            }
            Value::Int(Some(_)) => {
                params.push(&ints[int_idx] as &dyn ToSql);
                int_idx += 1;
            }
            Value::BigInt(Some(_)) => {
                params.push(&big_ints[big_int_idx] as &dyn ToSql);
                big_int_idx += 1;
            }
            Value::String(Some(_)) | Value::Json(Some(_)) => {
                params.push(&strings[string_idx] as &dyn ToSql);
                string_idx += 1;
            }
            Value::Double(Some(_)) => {
                params.push(&doubles[double_idx] as &dyn ToSql);
                double_idx += 1;
            }
            Value::ChronoDate(Some(_)) => {
                params.push(&dates[date_idx] as &dyn ToSql);
                date_idx += 1;
            }
            Value::ChronoDateTime(Some(_)) => {
                params.push(&datetimes[datetime_idx] as &dyn ToSql);
                datetime_idx += 1;
            }
            _ => {
                params.push(&nulls[null_idx] as &dyn ToSql);
                null_idx += 1;
            }
        }
    }

    f(&params)
}
