//! The model registry.
//!
//! Models are declared on a [`RegistryBuilder`] during bootstrap and frozen
//! into an immutable [`Registry`], which is then shared behind an `Arc` by
//! every environment. Nothing mutates a registry after `build`.

use super::model::ModelDescriptor;
use super::resolver::{self, ResolvedPath};
use crate::condition::FieldPath;
use crate::error::ResolutionError;
use std::collections::HashMap;

/// Default bound on related-field substitutions per path.
pub const DEFAULT_MAX_PATH_SUBSTITUTIONS: usize = 16;

#[derive(Debug, Default)]
pub struct RegistryBuilder {
    models: Vec<ModelDescriptor>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a model. Redeclaring a name replaces the earlier model.
    pub fn model(mut self, model: ModelDescriptor) -> Self {
        self.models.retain(|m| m.name() != model.name());
        self.models.push(model);
        self
    }

    /// Validate cross-model references and freeze the registry.
    ///
    /// # Errors
    ///
    /// Returns `ResolutionError::UnknownModel` when a relation targets an
    /// undeclared model, `IncompleteRelation` when a relation lacks its
    /// join metadata and `UnknownField` for an undeclared parent field.
    pub fn build(self) -> Result<Registry, ResolutionError> {
        let models: HashMap<String, ModelDescriptor> = self
            .models
            .into_iter()
            .map(|m| (m.name().to_string(), m))
            .collect();

        for model in models.values() {
            for field in model.fields() {
                let incomplete = || ResolutionError::IncompleteRelation {
                    model: model.name().to_string(),
                    field: field.name.clone(),
                };
                if !field.field_type.is_relation() || field.related_path.is_some() {
                    continue;
                }
                let target = field.relation.as_deref().ok_or_else(incomplete)?;
                if !models.contains_key(target) {
                    return Err(ResolutionError::UnknownModel(target.to_string()));
                }
                if field.field_type.is_reverse_fk() && field.reverse_fk.is_none() {
                    return Err(incomplete());
                }
                if field.field_type.is_m2m() && field.link.is_none() {
                    return Err(incomplete());
                }
            }
            if let Some(parent) = model.declared_parent() {
                if model.parent_field().is_none() {
                    return Err(ResolutionError::UnknownField {
                        model: model.name().to_string(),
                        segment: parent.to_string(),
                    });
                }
            }
        }

        log::debug!("registry frozen with {} models", models.len());
        Ok(Registry { models })
    }
}

/// Immutable set of model descriptors.
#[derive(Debug)]
pub struct Registry {
    models: HashMap<String, ModelDescriptor>,
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Look a model up by name.
    ///
    /// # Errors
    ///
    /// Returns `ResolutionError::UnknownModel` if no such model is declared.
    pub fn model(&self, name: &str) -> Result<&ModelDescriptor, ResolutionError> {
        self.models
            .get(name)
            .ok_or_else(|| ResolutionError::UnknownModel(name.to_string()))
    }

    pub fn models(&self) -> impl Iterator<Item = &ModelDescriptor> {
        self.models.values()
    }

    /// Resolve a field path on `model` with the default substitution bound.
    pub fn resolve(&self, model: &str, path: &FieldPath) -> Result<ResolvedPath, ResolutionError> {
        resolver::resolve(self, model, path, DEFAULT_MAX_PATH_SUBSTITUTIONS)
    }
}
