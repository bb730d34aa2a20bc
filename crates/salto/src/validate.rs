//! Validation of the merged element graph.
//!
//! The validator walks every merged element, checks instance values against
//! their type definitions and chases symbolic references through the merged
//! set. All findings are returned as data; only unresolved references are
//! classified [Severity::Error], every other kind is a warning.
use crate::element::{
    Element, ElemId, Field, IdType, ObjectType, Primitive, TypeRef, REQUIRED_ANNOTATION,
};
use crate::value::{ReferenceExpression, Value};
use crate::visit::walk_values;
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Error => f.write_str("Error"),
            Severity::Warning => f.write_str("Warning"),
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Error validating {elem_id}: unresolved reference `{target}`")]
    UnresolvedReference { elem_id: ElemId, target: String },
    #[error("Error validating {elem_id}: invalid value type, expected {expected} but found {actual}")]
    InvalidValueType { elem_id: ElemId, expected: String, actual: String },
    #[error("Error validating {elem_id}: circular reference `{target}`")]
    CircularReference { elem_id: ElemId, target: String },
    #[error("Error validating {elem_id}: missing required field `{field}`")]
    MissingRequiredField { elem_id: ElemId, field: String },
}

impl ValidationError {
    pub fn elem_id(&self) -> &ElemId {
        match self {
            ValidationError::UnresolvedReference { elem_id, .. }
            | ValidationError::InvalidValueType { elem_id, .. }
            | ValidationError::CircularReference { elem_id, .. }
            | ValidationError::MissingRequiredField { elem_id, .. } => elem_id,
        }
    }

    /// Severity is a function of the error kind alone.
    pub fn severity(&self) -> Severity {
        match self {
            ValidationError::UnresolvedReference { .. } => Severity::Error,
            _ => Severity::Warning,
        }
    }
}

pub fn validate_elements(elements: &[Element]) -> Vec<ValidationError> {
    let validator = Validator::new(elements);
    let mut errors = Vec::new();
    for element in elements {
        match element {
            Element::Object(object) => validator.validate_object(object, &mut errors),
            Element::Primitive(primitive) => {
                validator.validate_annotations(
                    &primitive.elem_id,
                    &primitive.annotations,
                    &primitive.annotation_types,
                    &mut errors,
                );
            }
            Element::Instance(instance) => validator.validate_instance(instance, &mut errors),
            Element::Variable(variable) => {
                validator.validate_value_refs(&variable.elem_id, &variable.value, &mut errors)
            }
        }
    }
    errors
}

struct Validator<'a> {
    elements: &'a [Element],
    by_name: HashMap<String, usize>,
}

impl<'a> Validator<'a> {
    fn new(elements: &'a [Element]) -> Self {
        let by_name = elements
            .iter()
            .enumerate()
            .map(|(index, element)| (element.elem_id().full_name(), index))
            .collect();
        Self { elements, by_name }
    }

    fn validate_object(&self, object: &ObjectType, errors: &mut Vec<ValidationError>) {
        for field in object.fields.values() {
            self.check_type_ref(&field.elem_id(), &field.type_ref, errors);
            self.validate_value_refs(&field.elem_id(), &Value::Map(field.annotations.clone()), errors);
        }
        self.validate_annotations(&object.elem_id, &object.annotations, &object.annotation_types, errors);
    }

    fn validate_annotations(
        &self,
        elem_id: &ElemId,
        annotations: &IndexMap<String, Value>,
        annotation_types: &IndexMap<String, TypeRef>,
        errors: &mut Vec<ValidationError>,
    ) {
        for (name, type_ref) in annotation_types {
            self.check_type_ref(&elem_id.nested(IdType::Annotation, name), type_ref, errors);
        }
        for (name, value) in annotations {
            let annotation_id = elem_id.nested(IdType::Attr, name);
            match annotation_types.get(name) {
                Some(type_ref) => self.validate_value(&annotation_id, value, type_ref, errors),
                None => self.validate_value_refs(&annotation_id, value, errors),
            }
        }
    }

    fn validate_instance(&self, instance: &crate::element::InstanceElement, errors: &mut Vec<ValidationError>) {
        let Some(object) = self.check_type_ref(&instance.elem_id, &instance.type_ref, errors) else {
            // no type to check shapes against, but references must still hold
            self.validate_value_refs(&instance.elem_id, &Value::Map(instance.value.clone()), errors);
            return;
        };
        let Element::Object(object) = object else {
            self.validate_value_refs(&instance.elem_id, &Value::Map(instance.value.clone()), errors);
            return;
        };
        self.validate_object_value(&instance.elem_id, &instance.value, object, &mut HashSet::new(), errors);
        self.validate_value_refs(&instance.elem_id, &Value::Map(instance.annotations.clone()), errors);
    }

    /// Checks a value map against an object type: required fields present,
    /// declared fields shaped by their type, undeclared keys scanned for
    /// references so every leaf is still visited once.
    fn validate_object_value(
        &self,
        path_id: &ElemId,
        value: &IndexMap<String, Value>,
        object: &ObjectType,
        visited_types: &mut HashSet<String>,
        errors: &mut Vec<ValidationError>,
    ) {
        for (name, field) in &object.fields {
            match value.get(name) {
                Some(field_value) => self.validate_field_value(
                    &path_id.nested(IdType::Instance, name),
                    field_value,
                    field,
                    visited_types,
                    errors,
                ),
                None => {
                    if field.annotations.get(REQUIRED_ANNOTATION) == Some(&Value::Boolean(true)) {
                        errors.push(ValidationError::MissingRequiredField {
                            elem_id: path_id.clone(),
                            field: name.clone(),
                        });
                    }
                }
            }
        }
        for (name, extra) in value.iter().filter(|(name, _)| !object.fields.contains_key(*name)) {
            self.validate_value_refs(&path_id.nested(IdType::Instance, name), extra, errors);
        }
    }

    fn validate_field_value(
        &self,
        path_id: &ElemId,
        value: &Value,
        field: &Field,
        visited_types: &mut HashSet<String>,
        errors: &mut Vec<ValidationError>,
    ) {
        self.validate_value_inner(path_id, value, &field.type_ref, visited_types, errors)
    }

    fn validate_value(
        &self,
        path_id: &ElemId,
        value: &Value,
        type_ref: &TypeRef,
        errors: &mut Vec<ValidationError>,
    ) {
        self.validate_value_inner(path_id, value, type_ref, &mut HashSet::new(), errors)
    }

    fn validate_value_inner(
        &self,
        path_id: &ElemId,
        value: &Value,
        type_ref: &TypeRef,
        visited_types: &mut HashSet<String>,
        errors: &mut Vec<ValidationError>,
    ) {
        // explicit nulls are an intentional "no value" and shape-exempt
        if matches!(value, Value::Null) {
            return;
        }
        if let Value::Reference(reference) = value {
            self.check_reference(path_id, reference, errors);
            return;
        }
        if let TypeRef::List(inner) = type_ref {
            let Value::List(items) = value else {
                errors.push(ValidationError::InvalidValueType {
                    elem_id: path_id.clone(),
                    expected: type_ref.full_name(),
                    actual: value.kind().to_string(),
                });
                // still scan the mistyped subtree for references
                self.validate_value_refs(path_id, value, errors);
                return;
            };
            for (index, item) in items.iter().enumerate() {
                self.validate_value_inner(
                    &path_id.nested(IdType::Instance, &index.to_string()),
                    item,
                    inner,
                    visited_types,
                    errors,
                );
            }
            return;
        }

        match type_ref.resolved().map(|index| &self.elements[index]) {
            None => {
                // unresolved field types are reported on the definition,
                // values under them can only be scanned for references
                self.validate_value_refs(path_id, value, errors);
            }
            Some(Element::Primitive(primitive)) => {
                let valid = matches!(
                    (primitive.primitive, value),
                    (Primitive::String, Value::String(_))
                        | (Primitive::Number, Value::Integer(_))
                        | (Primitive::Number, Value::Decimal(_))
                        | (Primitive::Boolean, Value::Boolean(_))
                );
                if !valid {
                    errors.push(ValidationError::InvalidValueType {
                        elem_id: path_id.clone(),
                        expected: primitive.primitive.as_str().to_string(),
                        actual: value.kind().to_string(),
                    });
                }
            }
            Some(Element::Object(object)) => {
                let Value::Map(map) = value else {
                    errors.push(ValidationError::InvalidValueType {
                        elem_id: path_id.clone(),
                        expected: object.elem_id.full_name(),
                        actual: value.kind().to_string(),
                    });
                    self.validate_value_refs(path_id, value, errors);
                    return;
                };
                // recursive object types stop the typed descent
                if visited_types.insert(object.elem_id.full_name()) {
                    self.validate_object_value(path_id, map, object, visited_types, errors);
                    visited_types.remove(&object.elem_id.full_name());
                } else {
                    self.validate_value_refs(path_id, value, errors);
                }
            }
            Some(_) => self.validate_value_refs(path_id, value, errors),
        }
    }

    /// Scans a value subtree for reference expressions without shape checks.
    fn validate_value_refs(&self, path_id: &ElemId, value: &Value, errors: &mut Vec<ValidationError>) {
        walk_values(value, &mut |path, leaf| {
            if let Value::Reference(reference) = leaf {
                let mut leaf_id = path_id.clone();
                for part in path {
                    leaf_id = leaf_id.nested(IdType::Instance, part);
                }
                self.check_reference(&leaf_id, reference, errors);
            }
        });
    }

    fn check_type_ref(
        &self,
        elem_id: &ElemId,
        type_ref: &TypeRef,
        errors: &mut Vec<ValidationError>,
    ) -> Option<&'a Element> {
        match type_ref.resolved() {
            Some(index) => Some(&self.elements[index]),
            None => {
                errors.push(ValidationError::UnresolvedReference {
                    elem_id: elem_id.clone(),
                    target: type_ref.elem_id().full_name(),
                });
                None
            }
        }
    }

    /// Follows a reference chain through the merged set. The root is the
    /// longest dotted prefix naming a merged element; the rest of the path
    /// traverses into its value. A path visited twice is a cycle.
    fn check_reference(
        &self,
        elem_id: &ElemId,
        reference: &ReferenceExpression,
        errors: &mut Vec<ValidationError>,
    ) {
        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(reference.dotted());
        let mut current = reference.clone();
        loop {
            match self.dereference(&current) {
                None => {
                    errors.push(ValidationError::UnresolvedReference {
                        elem_id: elem_id.clone(),
                        target: current.dotted(),
                    });
                    return;
                }
                Some(Some(Value::Reference(next))) => {
                    if !visited.insert(next.dotted()) {
                        errors.push(ValidationError::CircularReference {
                            elem_id: elem_id.clone(),
                            target: reference.dotted(),
                        });
                        return;
                    }
                    current = next.clone();
                }
                // landed on an element or a concrete value
                Some(_) => return,
            }
        }
    }

    /// `None`: the path resolves to nothing. `Some(None)`: the path names an
    /// element itself. `Some(Some(value))`: the path reaches a value node.
    fn dereference(&self, reference: &ReferenceExpression) -> Option<Option<&'a Value>> {
        let segments = &reference.traversal;
        let (root, rest) = (1..=segments.len()).rev().find_map(|length| {
            let prefix = segments[..length].join(".");
            self.by_name.get(&prefix).map(|index| (&self.elements[*index], &segments[length..]))
        })?;

        if rest.is_empty() {
            return Some(None);
        }
        let (mut value, remaining) = match root {
            Element::Instance(instance) => (instance.value.get(&rest[0])?, &rest[1..]),
            Element::Object(object) => (object.annotations.get(&rest[0])?, &rest[1..]),
            Element::Primitive(primitive) => (primitive.annotations.get(&rest[0])?, &rest[1..]),
            Element::Variable(variable) => (&variable.value, rest),
        };
        for segment in remaining {
            // an intermediate reference counts as reaching a value; the
            // chase loop picks it up from there
            if matches!(value, Value::Reference(_)) {
                return Some(Some(value));
            }
            value = match value {
                Value::Map(map) => map.get(segment)?,
                Value::List(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(Some(value))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::element::{builtin, InstanceElement};
    use crate::merge::merge_elements;
    use crate::resolve::resolve_type_refs;
    use pretty_assertions::assert_eq;

    fn object(name: &str, fields: &[(&str, TypeRef, bool)]) -> Element {
        let elem_id = ElemId::new("salto", name);
        let mut map = IndexMap::new();
        for (field_name, type_ref, required) in fields {
            let mut annotations = IndexMap::new();
            if *required {
                annotations.insert(REQUIRED_ANNOTATION.to_string(), Value::Boolean(true));
            }
            map.insert(
                field_name.to_string(),
                Field {
                    parent_id: elem_id.clone(),
                    name: field_name.to_string(),
                    type_ref: type_ref.clone(),
                    annotations,
                },
            );
        }
        Element::Object(ObjectType {
            elem_id,
            fields: map,
            annotations: IndexMap::new(),
            annotation_types: IndexMap::new(),
            is_settings: false,
        })
    }

    fn instance(type_name: &str, name: &str, value: &[(&str, Value)]) -> Element {
        let mut instance = InstanceElement::new(ElemId::new("salto", type_name), name);
        for (key, val) in value {
            instance.value.insert(key.to_string(), val.clone());
        }
        Element::Instance(instance)
    }

    fn validate(extra: Vec<Element>) -> Vec<ValidationError> {
        let mut elements = builtin::all();
        elements.extend(extra);
        let mut merged = merge_elements(elements).merged;
        resolve_type_refs(&mut merged);
        validate_elements(&merged)
    }

    fn string_ref() -> TypeRef {
        TypeRef::unresolved(builtin::string_type())
    }

    #[test]
    fn valid_instance_has_no_errors() {
        let errors = validate(vec![
            object("obj", &[("name", string_ref(), true)]),
            instance("obj", "main", &[("name", Value::from("a name"))]),
        ]);
        assert_eq!(errors, vec![]);
    }

    #[test]
    fn wrong_primitive_shape_is_a_warning() {
        let errors = validate(vec![
            object("obj", &[("name", string_ref(), false)]),
            instance("obj", "main", &[("name", Value::from(42i64))]),
        ]);
        assert_eq!(
            errors,
            vec![ValidationError::InvalidValueType {
                elem_id: ElemId::from_full_name("salto.obj.instance.main.name").unwrap(),
                expected: "string".to_string(),
                actual: "number".to_string(),
            }]
        );
        assert_eq!(errors[0].severity(), Severity::Warning);
    }

    #[test]
    fn missing_required_field_is_reported() {
        let errors = validate(vec![
            object("obj", &[("name", string_ref(), true)]),
            instance("obj", "main", &[]),
        ]);
        assert_eq!(
            errors,
            vec![ValidationError::MissingRequiredField {
                elem_id: ElemId::from_full_name("salto.obj.instance.main").unwrap(),
                field: "name".to_string(),
            }]
        );
        assert_eq!(errors[0].severity(), Severity::Warning);
    }

    #[test]
    fn list_values_check_the_inner_type() {
        let list_field = TypeRef::list_of(string_ref());
        let errors = validate(vec![
            object("obj", &[("names", list_field, false)]),
            instance(
                "obj",
                "main",
                &[("names", Value::List(vec![Value::from("ok"), Value::from(5i64)]))],
            ),
        ]);
        assert_eq!(
            errors,
            vec![ValidationError::InvalidValueType {
                elem_id: ElemId::from_full_name("salto.obj.instance.main.names.1").unwrap(),
                expected: "string".to_string(),
                actual: "number".to_string(),
            }]
        );
    }

    #[test]
    fn non_list_where_list_expected() {
        let errors = validate(vec![
            object("obj", &[("names", TypeRef::list_of(string_ref()), false)]),
            instance("obj", "main", &[("names", Value::from("just one"))]),
        ]);
        assert_eq!(
            errors,
            vec![ValidationError::InvalidValueType {
                elem_id: ElemId::from_full_name("salto.obj.instance.main.names").unwrap(),
                expected: "list<salto.string>".to_string(),
                actual: "string".to_string(),
            }]
        );
    }

    #[test]
    fn unresolved_instance_type_is_an_error() {
        let errors = validate(vec![instance("nosuch", "main", &[])]);
        assert_eq!(
            errors,
            vec![ValidationError::UnresolvedReference {
                elem_id: ElemId::from_full_name("salto.nosuch.instance.main").unwrap(),
                target: "salto.nosuch".to_string(),
            }]
        );
        assert_eq!(errors[0].severity(), Severity::Error);
    }

    #[test]
    fn unresolved_reference_value_is_an_error() {
        let errors = validate(vec![
            object("obj", &[("name", string_ref(), false)]),
            instance(
                "obj",
                "main",
                &[(
                    "name",
                    Value::Reference(ReferenceExpression::from_dotted("salto.gone.instance.x.f")),
                )],
            ),
        ]);
        assert_eq!(
            errors,
            vec![ValidationError::UnresolvedReference {
                elem_id: ElemId::from_full_name("salto.obj.instance.main.name").unwrap(),
                target: "salto.gone.instance.x.f".to_string(),
            }]
        );
    }

    #[test]
    fn reference_to_existing_value_resolves() {
        let errors = validate(vec![
            object("obj", &[("name", string_ref(), false)]),
            instance("obj", "main", &[("name", Value::from("x"))]),
            instance(
                "obj",
                "copy",
                &[(
                    "name",
                    Value::Reference(ReferenceExpression::from_dotted(
                        "salto.obj.instance.main.name",
                    )),
                )],
            ),
        ]);
        assert_eq!(errors, vec![]);
    }

    #[test]
    fn self_reference_is_circular() {
        let errors = validate(vec![
            object("obj", &[("name", string_ref(), false)]),
            instance(
                "obj",
                "main",
                &[(
                    "name",
                    Value::Reference(ReferenceExpression::from_dotted(
                        "salto.obj.instance.main.name",
                    )),
                )],
            ),
        ]);
        assert_eq!(
            errors,
            vec![ValidationError::CircularReference {
                elem_id: ElemId::from_full_name("salto.obj.instance.main.name").unwrap(),
                target: "salto.obj.instance.main.name".to_string(),
            }]
        );
        assert_eq!(errors[0].severity(), Severity::Warning);
    }

    #[test]
    fn mutual_references_are_circular() {
        let errors = validate(vec![
            object("obj", &[("name", string_ref(), false)]),
            instance(
                "obj",
                "a",
                &[("name", Value::Reference(ReferenceExpression::from_dotted("salto.obj.instance.b.name")))],
            ),
            instance(
                "obj",
                "b",
                &[("name", Value::Reference(ReferenceExpression::from_dotted("salto.obj.instance.a.name")))],
            ),
        ]);
        assert_eq!(errors.len(), 2);
        assert!(errors
            .iter()
            .all(|e| matches!(e, ValidationError::CircularReference { .. })));
    }

    #[test]
    fn unresolved_field_type_is_reported_on_the_field() {
        let errors = validate(vec![object(
            "obj",
            &[("broken", TypeRef::unresolved(ElemId::new("salto", "gone")), false)],
        )]);
        assert_eq!(
            errors,
            vec![ValidationError::UnresolvedReference {
                elem_id: ElemId::from_full_name("salto.obj.field.broken").unwrap(),
                target: "salto.gone".to_string(),
            }]
        );
    }

    #[test]
    fn reference_to_a_variable_resolves() {
        let errors = validate(vec![
            object("obj", &[("name", string_ref(), false)]),
            instance(
                "obj",
                "main",
                &[("name", Value::Reference(ReferenceExpression::from_dotted("var.scale")))],
            ),
            Element::Variable(crate::element::Variable {
                elem_id: ElemId::variable("scale"),
                value: Value::from("large"),
            }),
        ]);
        assert_eq!(errors, vec![]);
    }
}
