//! Merging of partial element declarations.
//!
//! The merger folds an unordered element stream into one element per id.
//! Declarations are gathered by [ElemId] first and each group is folded by
//! kind-specific rules, so the result does not depend on source order; the
//! only asymmetry inside a group is base-vs-update, decided by the reserved
//! marker type and never by position. Merged elements are emitted sorted by
//! full name, which makes the output identical for every permutation of the
//! input.
//!
//! Structural failures are returned as [MergeError] values, never thrown.
use crate::element::{
    Element, ElemId, Field, IdType, InstanceElement, ObjectType, TypeRef, DEFAULT_ANNOTATION,
};
use crate::value::Value;
use indexmap::IndexMap;
use std::collections::{BTreeMap, HashMap, HashSet};

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum MergeError {
    #[error("Error merging {elem_id}: update has no base definition")]
    NoBaseDefinition { elem_id: ElemId },
    #[error("Error merging {elem_id}: multiple base definitions")]
    MultipleBaseDefinitions { elem_id: ElemId },
    #[error("Error merging {elem_id}: duplicate annotation `{key}` in field definition")]
    DuplicateAnnotationFieldDefinition { elem_id: ElemId, key: String },
    #[error("Error merging {elem_id}: duplicate annotation type `{key}`")]
    DuplicateAnnotationType { elem_id: ElemId, key: String },
    #[error("Error merging {elem_id}: duplicate annotation `{key}`")]
    DuplicateAnnotation { elem_id: ElemId, key: String },
    #[error("Error merging {elem_id}: duplicate key `{key}`")]
    DuplicateInstanceKey { elem_id: ElemId, key: String },
    #[error("Error merging {elem_id}: merging multiple primitive type definitions is not supported")]
    MultiplePrimitiveTypesUnsupported { elem_id: ElemId },
    #[error("Error merging {elem_id}: duplicate variable name")]
    DuplicateVariableName { elem_id: ElemId },
}

impl MergeError {
    pub fn elem_id(&self) -> &ElemId {
        match self {
            MergeError::NoBaseDefinition { elem_id }
            | MergeError::MultipleBaseDefinitions { elem_id }
            | MergeError::DuplicateAnnotationFieldDefinition { elem_id, .. }
            | MergeError::DuplicateAnnotationType { elem_id, .. }
            | MergeError::DuplicateAnnotation { elem_id, .. }
            | MergeError::DuplicateInstanceKey { elem_id, .. }
            | MergeError::MultiplePrimitiveTypesUnsupported { elem_id }
            | MergeError::DuplicateVariableName { elem_id } => elem_id,
        }
    }
}

#[derive(Debug, Default)]
pub struct MergeResult {
    pub merged: Vec<Element>,
    pub errors: Vec<MergeError>,
}

/// Folds `elements` into at most one element per id.
///
/// After the raw fold, instances receive default values for missing fields
/// from their (merged) type definitions.
pub fn merge_elements(elements: impl IntoIterator<Item = Element>) -> MergeResult {
    // group key carries a kind tag so a pathological object/primitive name
    // clash folds per kind instead of mixing rules
    let mut groups: BTreeMap<(String, u8), Vec<Element>> = BTreeMap::new();
    for element in elements {
        let key = (element.elem_id().full_name(), kind_tag(&element));
        groups.entry(key).or_default().push(element);
    }

    let mut errors = Vec::new();
    let mut merged = Vec::new();
    for ((full_name, _), group) in groups {
        tracing::trace!(elem_id = %full_name, members = group.len(), "merging group");
        if let Some(element) = merge_group(group, &mut errors) {
            merged.push(element);
        }
    }

    let types: HashMap<String, Element> = merged
        .iter()
        .filter(|e| matches!(e, Element::Object(_) | Element::Primitive(_)))
        .map(|e| (e.elem_id().full_name(), e.clone()))
        .collect();
    for element in &mut merged {
        if let Element::Instance(instance) = element {
            inject_defaults(instance, &types);
        }
    }

    MergeResult { merged, errors }
}

fn kind_tag(element: &Element) -> u8 {
    match element {
        Element::Primitive(_) => 0,
        Element::Object(_) => 1,
        Element::Instance(_) => 2,
        Element::Variable(_) => 3,
    }
}

fn merge_group(mut group: Vec<Element>, errors: &mut Vec<MergeError>) -> Option<Element> {
    if group.len() == 1 {
        return group.pop();
    }
    match kind_tag(&group[0]) {
        1 => {
            let objects = group
                .into_iter()
                .filter_map(|e| match e {
                    Element::Object(o) => Some(o),
                    _ => None,
                })
                .collect();
            merge_object_definitions(objects, errors).map(Element::Object)
        }
        2 => {
            let instances = group
                .into_iter()
                .filter_map(|e| match e {
                    Element::Instance(i) => Some(i),
                    _ => None,
                })
                .collect();
            merge_instance_definitions(instances, errors).map(Element::Instance)
        }
        0 => {
            errors.push(MergeError::MultiplePrimitiveTypesUnsupported {
                elem_id: group[0].elem_id().clone(),
            });
            group.truncate(1);
            group.pop()
        }
        _ => {
            errors.push(MergeError::DuplicateVariableName {
                elem_id: group[0].elem_id().clone(),
            });
            group.truncate(1);
            group.pop()
        }
    }
}

/// A declaration is an update when every field it declares carries the
/// reserved marker type. A declaration with no fields composes onto some
/// base (annotation-only updates are common), so it counts as an update too.
fn is_update_definition(object: &ObjectType) -> bool {
    object.fields.values().all(|field| field.type_ref.elem_id().is_update_marker())
}

fn merge_object_definitions(
    definitions: Vec<ObjectType>,
    errors: &mut Vec<MergeError>,
) -> Option<ObjectType> {
    let elem_id = definitions[0].elem_id.clone();
    let (mut bases, updates): (Vec<_>, Vec<_>) =
        definitions.into_iter().partition(|object| !is_update_definition(object));

    if bases.is_empty() {
        errors.push(MergeError::NoBaseDefinition { elem_id });
        return None;
    }
    if bases.len() > 1 {
        errors.push(MergeError::MultipleBaseDefinitions { elem_id });
        return None;
    }

    let mut base = bases.swap_remove(0);
    let mut missing_field = false;
    for update in updates {
        for (name, update_field) in update.fields {
            let Some(base_field) = base.fields.get_mut(&name) else {
                tracing::debug!(elem_id = %base.elem_id, field = %name, "update for unknown field");
                errors.push(MergeError::NoBaseDefinition {
                    elem_id: base.elem_id.nested(IdType::Field, &name),
                });
                missing_field = true;
                continue;
            };
            // the update's own field type is the marker, so the base type is
            // kept; updates contribute field annotations
            for (key, value) in update_field.annotations {
                if base_field.annotations.contains_key(&key) {
                    errors.push(MergeError::DuplicateAnnotationFieldDefinition {
                        elem_id: base_field.elem_id(),
                        key,
                    });
                } else {
                    base_field.annotations.insert(key, value);
                }
            }
        }
        for (key, type_ref) in update.annotation_types {
            if base.annotation_types.contains_key(&key) {
                errors.push(MergeError::DuplicateAnnotationType {
                    elem_id: base.elem_id.clone(),
                    key,
                });
            } else {
                base.annotation_types.insert(key, type_ref);
            }
        }
        for (key, value) in update.annotations {
            if base.annotations.contains_key(&key) {
                errors.push(MergeError::DuplicateAnnotation { elem_id: base.elem_id.clone(), key });
            } else {
                base.annotations.insert(key, value);
            }
        }
    }

    // an update that names a missing field invalidates the whole definition
    if missing_field {
        return None;
    }
    Some(base)
}

fn merge_instance_definitions(
    mut definitions: Vec<InstanceElement>,
    errors: &mut Vec<MergeError>,
) -> Option<InstanceElement> {
    let mut base = definitions.remove(0);
    for other in definitions {
        merge_value_maps(&mut base.value, other.value, &base.elem_id, errors);
        for (key, value) in other.annotations {
            if base.annotations.contains_key(&key) {
                errors.push(MergeError::DuplicateAnnotation {
                    elem_id: base.elem_id.clone(),
                    key,
                });
            } else {
                base.annotations.insert(key, value);
            }
        }
    }
    Some(base)
}

/// Deep-merges `source` into `target`. Two maps merge key-wise; any other
/// collision is a duplicate-key conflict and the first-seen value is kept.
fn merge_value_maps(
    target: &mut IndexMap<String, Value>,
    source: IndexMap<String, Value>,
    path_id: &ElemId,
    errors: &mut Vec<MergeError>,
) {
    for (key, value) in source {
        match target.get_mut(&key) {
            None => {
                target.insert(key, value);
            }
            Some(Value::Map(existing)) => {
                if let Value::Map(incoming) = value {
                    merge_value_maps(
                        existing,
                        incoming,
                        &path_id.nested(IdType::Instance, &key),
                        errors,
                    );
                } else {
                    errors.push(MergeError::DuplicateInstanceKey {
                        elem_id: path_id.clone(),
                        key,
                    });
                }
            }
            Some(_) => {
                errors.push(MergeError::DuplicateInstanceKey { elem_id: path_id.clone(), key });
            }
        }
    }
}

/// Fills missing instance fields from `_default` annotations. The field's
/// own annotation wins over its type's.
fn inject_defaults(instance: &mut InstanceElement, types: &HashMap<String, Element>) {
    let Some(Element::Object(object)) = types.get(&instance.type_ref.elem_id().full_name()) else {
        return;
    };
    let mut visited = HashSet::new();
    visited.insert(object.elem_id.full_name());
    for (name, field) in &object.fields {
        if instance.value.contains_key(name) {
            continue;
        }
        if let Some(value) = field_default(field, types, &mut visited) {
            tracing::trace!(elem_id = %instance.elem_id, field = %name, "injecting default");
            instance.value.insert(name.clone(), value);
        }
    }
}

fn field_default(
    field: &Field,
    types: &HashMap<String, Element>,
    visited: &mut HashSet<String>,
) -> Option<Value> {
    if let Some(value) = field.annotations.get(DEFAULT_ANNOTATION) {
        return Some(value.clone());
    }
    type_default(&field.type_ref, types, visited)
}

fn type_default(
    type_ref: &TypeRef,
    types: &HashMap<String, Element>,
    visited: &mut HashSet<String>,
) -> Option<Value> {
    if type_ref.is_list() {
        return None;
    }
    let full_name = type_ref.elem_id().full_name();
    match types.get(&full_name)? {
        Element::Primitive(primitive) => primitive.annotations.get(DEFAULT_ANNOTATION).cloned(),
        Element::Object(object) => {
            if let Some(value) = object.annotations.get(DEFAULT_ANNOTATION) {
                return Some(value.clone());
            }
            // recursive types terminate here instead of descending forever
            if !visited.insert(full_name.clone()) {
                return None;
            }
            let mut value = IndexMap::new();
            for (name, field) in &object.fields {
                if let Some(field_value) = field_default(field, types, visited) {
                    value.insert(name.clone(), field_value);
                }
            }
            visited.remove(&full_name);
            if value.is_empty() {
                None
            } else {
                Some(Value::Map(value))
            }
        }
        _ => None,
    }
}

/// Builds a fresh instance of `object` whose value holds every field-level
/// `_default` annotation, and nothing else.
pub fn create_default_instance_from_type(name: &str, object: &ObjectType) -> InstanceElement {
    let mut instance = InstanceElement::new(object.elem_id.clone(), name);
    for (field_name, field) in &object.fields {
        if let Some(value) = field.annotations.get(DEFAULT_ANNOTATION) {
            instance.value.insert(field_name.clone(), value.clone());
        }
    }
    instance
}
