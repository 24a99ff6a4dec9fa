//! Field path resolution.
//!
//! A path resolves to the field descriptor of every segment, with related
//! (delegated) fields replaced by the path they delegate to.

use super::field::FieldDescriptor;
use super::registry::Registry;
use crate::condition::{FieldName, FieldPath};
use crate::error::ResolutionError;
use std::collections::VecDeque;
use std::sync::Arc;

/// One resolved segment: the field and the model it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathStep {
    pub model: String,
    pub field: Arc<FieldDescriptor>,
}

/// A path whose every segment names a stored field of the model reached by
/// the previous segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    root: String,
    steps: Vec<PathStep>,
}

impl ResolvedPath {
    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn steps(&self) -> &[PathStep] {
        &self.steps
    }

    /// The field the path ends on.
    pub fn terminal(&self) -> &PathStep {
        // Resolution never yields an empty path.
        &self.steps[self.steps.len() - 1]
    }

    /// Steps before the terminal one. Each is a relation.
    pub fn hops(&self) -> &[PathStep] {
        &self.steps[..self.steps.len() - 1]
    }

    /// The canonical path of json names. Resolving it again yields `self`.
    pub fn to_field_path(&self) -> FieldPath {
        FieldPath::new(
            self.steps
                .iter()
                .map(|s| FieldName::new(s.field.name.clone(), s.field.json.clone()))
                .collect(),
        )
    }
}

/// Resolve `path` on `model`.
///
/// Each segment is looked up by name, json name or snake-cased name. A
/// related field is replaced by its delegation target; at most
/// `max_substitutions` replacements happen before the path is rejected as
/// cyclic.
///
/// # Errors
///
/// `EmptyPath`, `UnknownModel`, `UnknownField`, `NotARelation` for a
/// non-terminal scalar, and `DelegationCycle`.
pub fn resolve(
    registry: &Registry,
    model: &str,
    path: &FieldPath,
    max_substitutions: usize,
) -> Result<ResolvedPath, ResolutionError> {
    if path.is_empty() {
        return Err(ResolutionError::EmptyPath {
            model: model.to_string(),
        });
    }

    let mut current = registry.model(model)?;
    let mut pending: VecDeque<FieldName> = path.segments().iter().cloned().collect();
    let mut steps = Vec::with_capacity(pending.len());
    let mut substitutions = 0;

    while let Some(segment) = pending.pop_front() {
        let field = current
            .get_field(segment.name())
            .or_else(|| current.get_field(segment.json()))
            .ok_or_else(|| ResolutionError::UnknownField {
                model: current.name().to_string(),
                segment: segment.name().to_string(),
            })?;

        if let Some(related) = &field.related_path {
            substitutions += 1;
            if substitutions > max_substitutions {
                return Err(ResolutionError::DelegationCycle {
                    model: model.to_string(),
                    path: path.name_path(),
                    limit: max_substitutions,
                });
            }
            let parts: Vec<&str> = related.split('.').filter(|s| !s.is_empty()).collect();
            if parts.is_empty() {
                return Err(ResolutionError::EmptyPath {
                    model: current.name().to_string(),
                });
            }
            for part in parts.into_iter().rev() {
                pending.push_front(FieldName::from(part));
            }
            continue;
        }

        steps.push(PathStep {
            model: current.name().to_string(),
            field: Arc::clone(field),
        });

        if !pending.is_empty() {
            let target = match (&field.relation, field.field_type.is_relation()) {
                (Some(target), true) => target,
                _ => {
                    return Err(ResolutionError::NotARelation {
                        model: current.name().to_string(),
                        segment: segment.name().to_string(),
                    })
                }
            };
            current = registry.model(target)?;
        }
    }

    Ok(ResolvedPath {
        root: model.to_string(),
        steps,
    })
}

/// Dotted json names of `path` on `model`, as remote callers spell it
/// (`Manager.Name` becomes `manager_id.name`).
///
/// Unlike [`resolve`], related fields are kept as written rather than
/// replaced by their targets.
///
/// # Errors
///
/// `EmptyPath`, `UnknownModel`, `UnknownField` and `NotARelation`.
pub fn domain_key(registry: &Registry, model: &str, path: &FieldPath) -> Result<String, ResolutionError> {
    if path.is_empty() {
        return Err(ResolutionError::EmptyPath {
            model: model.to_string(),
        });
    }
    let mut current = registry.model(model)?;
    let mut keys = Vec::with_capacity(path.len());
    let segments = path.segments();
    for (i, segment) in segments.iter().enumerate() {
        let field = current
            .get_field(segment.name())
            .or_else(|| current.get_field(segment.json()))
            .ok_or_else(|| ResolutionError::UnknownField {
                model: current.name().to_string(),
                segment: segment.name().to_string(),
            })?;
        keys.push(field.json.clone());
        if i + 1 < segments.len() {
            let target = field
                .relation
                .as_deref()
                .filter(|_| field.field_type.is_relation())
                .ok_or_else(|| ResolutionError::NotARelation {
                    model: current.name().to_string(),
                    segment: segment.name().to_string(),
                })?;
            current = registry.model(target)?;
        }
    }
    Ok(keys.join("."))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::field::{FieldDescriptor, FieldType};
    use crate::schema::model::ModelDescriptor;

    fn registry() -> Registry {
        Registry::builder()
            .model(
                ModelDescriptor::new("Person")
                    .field(FieldDescriptor::new("Name", FieldType::Char))
                    .field(FieldDescriptor::new("Age", FieldType::Integer))
                    .field(FieldDescriptor::many2one("Manager", "Person"))
                    .field(FieldDescriptor::many2one("Company", "Company"))
                    .field(FieldDescriptor::new("ManagerName", FieldType::Char).related("Manager.Name"))
                    .field(FieldDescriptor::new("CompanyCity", FieldType::Char).related("Company.City")),
            )
            .model(
                ModelDescriptor::new("Company")
                    .field(FieldDescriptor::new("City", FieldType::Char))
                    .field(FieldDescriptor::new("Loop", FieldType::Char).related("Loop"))
                    .field(FieldDescriptor::new("Blank", FieldType::Char).related("")),
            )
            .build()
            .unwrap()
    }

    fn jsons(path: &ResolvedPath) -> Vec<&str> {
        path.steps().iter().map(|s| s.field.json.as_str()).collect()
    }

    #[test]
    fn test_resolve_simple_field() {
        let path = resolve(&registry(), "Person", &"Name".into(), 16).unwrap();
        assert_eq!(jsons(&path), vec!["name"]);
        assert_eq!(path.terminal().model, "Person");
    }

    #[test]
    fn test_resolve_through_relation() {
        let path = resolve(&registry(), "Person", &"Company.City".into(), 16).unwrap();
        assert_eq!(jsons(&path), vec!["company_id", "city"]);
        assert_eq!(path.terminal().model, "Company");
        assert_eq!(path.hops().len(), 1);
    }

    #[test]
    fn test_resolve_accepts_json_names() {
        let path = resolve(&registry(), "Person", &"manager_id.name".into(), 16).unwrap();
        assert_eq!(jsons(&path), vec!["manager_id", "name"]);
    }

    #[test]
    fn test_related_field_is_substituted() {
        let path = resolve(&registry(), "Person", &"ManagerName".into(), 16).unwrap();
        assert_eq!(jsons(&path), vec!["manager_id", "name"]);
        let path = resolve(&registry(), "Person", &"Manager.CompanyCity".into(), 16).unwrap();
        assert_eq!(jsons(&path), vec!["manager_id", "company_id", "city"]);
    }

    #[test]
    fn test_resolution_is_idempotent() {
        let reg = registry();
        for raw in ["ManagerName", "Manager.Manager.Age", "Company.City", "manager_id"] {
            let once = resolve(&reg, "Person", &raw.into(), 16).unwrap();
            let twice = resolve(&reg, "Person", &once.to_field_path(), 16).unwrap();
            assert_eq!(once, twice, "path {raw}");
        }
    }

    #[test]
    fn test_scalar_cannot_be_traversed() {
        let err = resolve(&registry(), "Person", &"Name.Foo".into(), 16).unwrap_err();
        assert!(matches!(err, ResolutionError::NotARelation { ref segment, .. } if segment == "Name"));
    }

    #[test]
    fn test_unknown_field() {
        let err = resolve(&registry(), "Person", &"Salary".into(), 16).unwrap_err();
        assert!(matches!(err, ResolutionError::UnknownField { .. }));
    }

    #[test]
    fn test_delegation_cycle_is_bounded() {
        let err = resolve(&registry(), "Person", &"Company.Loop".into(), 16).unwrap_err();
        assert!(matches!(err, ResolutionError::DelegationCycle { limit: 16, .. }));
    }

    #[test]
    fn test_empty_path() {
        let err = resolve(&registry(), "Person", &FieldPath::default(), 16).unwrap_err();
        assert!(matches!(err, ResolutionError::EmptyPath { .. }));
    }

    #[test]
    fn test_blank_related_path_is_rejected() {
        let err = resolve(&registry(), "Person", &"Company.Blank".into(), 16).unwrap_err();
        assert!(matches!(err, ResolutionError::EmptyPath { ref model } if model == "Company"));
    }

    #[test]
    fn test_domain_key_uses_storage_names() {
        let reg = registry();
        assert_eq!(domain_key(&reg, "Person", &"Manager".into()).unwrap(), "manager_id");
        assert_eq!(domain_key(&reg, "Person", &"Manager.Company.City".into()).unwrap(), "manager_id.company_id.city");
        assert_eq!(domain_key(&reg, "Person", &"ManagerName".into()).unwrap(), "manager_name");
        assert!(matches!(
            domain_key(&reg, "Person", &"Name.City".into()),
            Err(ResolutionError::NotARelation { .. })
        ));
    }
}
