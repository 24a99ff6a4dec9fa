//! SQL generation through the public API.
//!
//! Compiles queries against a fixture registry without a database:
//!
//! - Employee belongs_to Department and to a manager Employee (many-to-one)
//! - Department has_many Employees (one-to-many)
//! - Employee has_many Skills through `employee_skill_rel` (many-to-many)

use berth::condition::{Condition, DomainTerm, FieldPath, Operator};
use berth::query::{OrderField, Query, QueryCompiler};
use berth::schema::{Aggregate, FieldDescriptor, FieldType, LinkTable, ModelDescriptor, Registry};
use berth::{PostgresAdapter, Value};
use serde_json::json;

// ============================================================================
// Fixture
// ============================================================================

fn registry() -> Registry {
    Registry::builder()
        .model(
            ModelDescriptor::new("Employee")
                .field(FieldDescriptor::new("Name", FieldType::Char).with_size(128).required())
                .field(FieldDescriptor::new("Age", FieldType::Integer))
                .field(FieldDescriptor::new("Active", FieldType::Boolean))
                .field(FieldDescriptor::new("Salary", FieldType::Float).with_aggregate(Aggregate::Max))
                .field(FieldDescriptor::many2one("Manager", "Employee"))
                .field(FieldDescriptor::many2one("Department", "Department"))
                .field(FieldDescriptor::new("DepartmentName", FieldType::Char).related("Department.Name"))
                .field(FieldDescriptor::many2many(
                    "Skills",
                    "Skill",
                    LinkTable::new("employee_skill_rel", "employee_id", "skill_id"),
                ))
                .with_default_order(["name"]),
        )
        .model(
            ModelDescriptor::new("Department")
                .field(FieldDescriptor::new("Name", FieldType::Char))
                .field(FieldDescriptor::one2many("Employees", "Employee", "department_id")),
        )
        .model(ModelDescriptor::new("Skill").field(FieldDescriptor::new("Name", FieldType::Char)))
        .build()
        .expect("fixture registry is consistent")
}

fn fields(items: &[&str]) -> Vec<FieldPath> {
    items.iter().map(|s| FieldPath::parse(s)).collect()
}

// ============================================================================
// Domains
// ============================================================================

#[test]
fn test_single_predicate_domain() {
    let cond = Condition::new().and().field("Age").greater_or_equal(12);
    assert_eq!(cond.to_domain_json().unwrap(), json!([["age", ">=", 12]]));
}

#[test]
fn test_or_domain() {
    let cond = Condition::new()
        .field("Name").equals("John")
        .or().field("Name").equals("Jane");
    assert_eq!(
        cond.to_domain_json().unwrap(),
        json!(["|", ["name", "=", "John"], ["name", "=", "Jane"]])
    );
}

#[test]
fn test_domain_from_remote_caller_compiles() {
    let reg = registry();
    let adapter = PostgresAdapter::new();
    let domain = json!(["|", ["department_id.name", "ilike", "sales"], "!", ["active", "=", true]]);
    let cond = Condition::from_domain_json(&domain).unwrap();
    let query = Query::new("Employee").filter(cond);
    let stmt = QueryCompiler::new(&reg, &adapter)
        .select(&query, &fields(&["Name"]), false)
        .unwrap();
    assert!(stmt.sql.contains(
        "WHERE \"employee__department_id\".\"name\" ILIKE ? OR NOT (\"employee\".\"active\" = ?)"
    ));
    assert_eq!(stmt.params, vec![Value::Text("sales".into()), Value::Bool(true)]);
}

#[test]
fn test_domain_terms_parse_operators() {
    let terms = vec![DomainTerm::leaf("age", Operator::NotIn, vec![1, 2])];
    let cond = Condition::deserialize(&terms).unwrap();
    assert_eq!(cond.predicates()[0].operator(), Operator::NotIn);
}

// ============================================================================
// WHERE clause
// ============================================================================

#[test]
fn test_null_foreign_key_is_plain_is_null() {
    let reg = registry();
    let adapter = PostgresAdapter::new();
    let query = Query::new("Employee").filter(Condition::new().field("Manager").equals(Value::Null));
    let stmt = QueryCompiler::new(&reg, &adapter).count(&query, false).unwrap();
    assert!(stmt.sql.contains("WHERE \"manager_id\" IS NULL"));
    assert!(stmt.params.is_empty());
}

#[test]
fn test_not_equals_matches_null() {
    let reg = registry();
    let adapter = PostgresAdapter::new();
    let query = Query::new("Employee").filter(Condition::new().field("Active").not_equals(true));
    let stmt = QueryCompiler::new(&reg, &adapter).count(&query, false).unwrap();
    assert!(stmt.sql.contains("WHERE (\"active\" IS NULL OR \"active\" != ?)"));
    assert_eq!(stmt.params, vec![Value::Bool(true)]);
}

#[test]
fn test_unknown_field_fails_before_sql() {
    let reg = registry();
    let adapter = PostgresAdapter::new();
    let query = Query::new("Employee").filter(Condition::new().field("Nickname").equals("x"));
    let err = QueryCompiler::new(&reg, &adapter).count(&query, false).unwrap_err();
    assert!(err.to_string().contains("Nickname"));
}

// ============================================================================
// Joins
// ============================================================================

#[test]
fn test_shared_hop_is_joined_once() {
    let reg = registry();
    let adapter = PostgresAdapter::new();
    let query = Query::new("Employee")
        .filter(Condition::new().field("Department.Name").ilike("r%"))
        .order_by(OrderField::asc("Department.Name"));
    let stmt = QueryCompiler::new(&reg, &adapter)
        .select(&query, &fields(&["DepartmentName", "Department.Name"]), false)
        .unwrap();
    assert_eq!(stmt.sql.matches("LEFT JOIN").count(), 1);
    assert!(stmt.sql.contains("\"employee__department_id\".\"name\" AS \"department_name\""));
    assert!(stmt.sql.contains("\"employee__department_id\".\"name\" AS \"department_id__name\""));
    assert!(stmt.sql.ends_with("ORDER BY \"department_id__name\""));
}

#[test]
fn test_many_to_many_then_target() {
    let reg = registry();
    let adapter = PostgresAdapter::new();
    let query = Query::new("Employee").filter(Condition::new().field("Skills.Name").equals("rust"));
    let stmt = QueryCompiler::new(&reg, &adapter).count(&query, false).unwrap();
    assert!(stmt.sql.contains(
        "LEFT JOIN \"employee_skill_rel\" AS \"employee__skills_ids__rel\" \
         ON \"employee__skills_ids__rel\".\"employee_id\" = \"employee\".\"id\""
    ));
    assert!(stmt.sql.contains(
        "LEFT JOIN \"skill\" AS \"employee__skills_ids\" \
         ON \"employee__skills_ids\".\"id\" = \"employee__skills_ids__rel\".\"skill_id\""
    ));
}

#[test]
fn test_one_to_many_from_department() {
    let reg = registry();
    let adapter = PostgresAdapter::new();
    let query = Query::new("Department").filter(Condition::new().field("Employees.Age").greater(60));
    let stmt = QueryCompiler::new(&reg, &adapter)
        .select(&query, &fields(&["Name"]), false)
        .unwrap();
    assert!(stmt.sql.contains(
        "LEFT JOIN \"employee\" AS \"department__employees_ids\" \
         ON \"department__employees_ids\".\"department_id\" = \"department\".\"id\""
    ));
    assert!(stmt.sql.starts_with("SELECT * FROM (SELECT DISTINCT ON (\"department\".\"id\")"));
}

// ============================================================================
// Grouping, writes
// ============================================================================

#[test]
fn test_group_by_emits_one_expression_per_group_field() {
    let reg = registry();
    let adapter = PostgresAdapter::new();
    let query = Query::new("Employee").group_by("Department").group_by("Active");
    let stmt = QueryCompiler::new(&reg, &adapter)
        .select_grouped(&query, &fields(&["Age", "Salary"]), false)
        .unwrap();
    assert!(stmt.sql.contains("GROUP BY \"department_id\", \"active\" ORDER BY"));
    assert!(stmt.sql.contains("sum(\"age\") AS \"age\""));
    assert!(stmt.sql.contains("max(\"salary\") AS \"salary\""));
    assert!(stmt.sql.contains("count(1) AS \"__count\""));
}

#[test]
fn test_placeholders_match_params_for_every_statement() {
    let reg = registry();
    let adapter = PostgresAdapter::new();
    let compiler = QueryCompiler::new(&reg, &adapter);
    let query = Query::new("Employee")
        .filter(
            Condition::new()
                .field("Age").is_in(vec![30, 40])
                .or().field("Name").contains("an")
                .field("Department").not_equals(Value::RelationId(3)),
        )
        .limit(5);

    let mut data = berth::query::FieldMap::new();
    data.insert("Salary".into(), 1000.0.into());

    for stmt in [
        compiler.select(&query, &[], false).unwrap(),
        compiler.select_grouped(&query.clone().group_by("Manager"), &[], false).unwrap(),
        compiler.count(&query, false).unwrap(),
        compiler.update(&query, &data).unwrap(),
        compiler.delete(&query).unwrap(),
    ] {
        assert_eq!(stmt.placeholder_count(), stmt.params.len(), "{}", stmt.sql);
    }
}
