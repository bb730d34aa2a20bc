//! visitor pattern helpers
//!
//! Two walks cover every embedded reference in the model: [VisitTypeRefsMut]
//! touches each [TypeRef] an element stores (field types, annotation types,
//! instance types, list inners) and [walk_values] touches every value leaf.
use crate::element::{Element, InstanceElement, ObjectType, PrimitiveType, TypeRef, Variable};
use crate::value::Value;

/// Visitor that visits its subjects mutably
pub trait VisitMut<T> {
    fn visit_mut(&mut self, value: &mut T);
}

// blanket impl for FnMut
impl<T, F> VisitMut<T> for F
where
    F: FnMut(&mut T),
{
    fn visit_mut(&mut self, value: &mut T) {
        self(value)
    }
}

/// Recursively visit all [TypeRef]s stored in a structure, mutably.
///
/// List wrappers are unwrapped so the visitor always sees `TypeRef::Id`
/// nodes; an element's own refs are visited exactly once each.
pub trait VisitTypeRefsMut {
    fn visit_type_refs_mut(&mut self, visitor: &mut dyn VisitMut<TypeRef>);
}

impl VisitTypeRefsMut for TypeRef {
    fn visit_type_refs_mut(&mut self, visitor: &mut dyn VisitMut<TypeRef>) {
        match self {
            TypeRef::Id { .. } => visitor.visit_mut(self),
            TypeRef::List(inner) => inner.visit_type_refs_mut(visitor),
        }
    }
}

impl VisitTypeRefsMut for ObjectType {
    fn visit_type_refs_mut(&mut self, visitor: &mut dyn VisitMut<TypeRef>) {
        for field in self.fields.values_mut() {
            field.type_ref.visit_type_refs_mut(visitor);
        }
        for type_ref in self.annotation_types.values_mut() {
            type_ref.visit_type_refs_mut(visitor);
        }
    }
}

impl VisitTypeRefsMut for PrimitiveType {
    fn visit_type_refs_mut(&mut self, visitor: &mut dyn VisitMut<TypeRef>) {
        for type_ref in self.annotation_types.values_mut() {
            type_ref.visit_type_refs_mut(visitor);
        }
    }
}

impl VisitTypeRefsMut for InstanceElement {
    fn visit_type_refs_mut(&mut self, visitor: &mut dyn VisitMut<TypeRef>) {
        self.type_ref.visit_type_refs_mut(visitor);
    }
}

impl VisitTypeRefsMut for Variable {
    fn visit_type_refs_mut(&mut self, _visitor: &mut dyn VisitMut<TypeRef>) {}
}

impl VisitTypeRefsMut for Element {
    fn visit_type_refs_mut(&mut self, visitor: &mut dyn VisitMut<TypeRef>) {
        match self {
            Element::Primitive(p) => p.visit_type_refs_mut(visitor),
            Element::Object(o) => o.visit_type_refs_mut(visitor),
            Element::Instance(i) => i.visit_type_refs_mut(visitor),
            Element::Variable(v) => v.visit_type_refs_mut(visitor),
        }
    }
}

/// Walk every node of a value tree depth first, reporting the dotted path
/// of each node relative to the walk root.
///
/// Each leaf (and each inner node) is visited exactly once.
pub fn walk_values<'a>(value: &'a Value, f: &mut impl FnMut(&[String], &'a Value)) {
    fn walk<'a>(value: &'a Value, path: &mut Vec<String>, f: &mut impl FnMut(&[String], &'a Value)) {
        f(path, value);
        match value {
            Value::List(items) => {
                for (index, item) in items.iter().enumerate() {
                    path.push(index.to_string());
                    walk(item, path, f);
                    path.pop();
                }
            }
            Value::Map(map) => {
                for (key, item) in map {
                    path.push(key.clone());
                    walk(item, path, f);
                    path.pop();
                }
            }
            _ => {}
        }
    }

    let mut path = Vec::new();
    walk(value, &mut path, f);
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::element::{builtin, ElemId, Field, IdType};
    use indexmap::IndexMap;

    #[test]
    fn visits_list_inner_refs() {
        let mut object = ObjectType {
            elem_id: ElemId::new("a", "t"),
            fields: IndexMap::new(),
            annotations: IndexMap::new(),
            annotation_types: IndexMap::new(),
            is_settings: false,
        };
        object.fields.insert(
            "names".to_string(),
            Field {
                parent_id: object.elem_id.clone(),
                name: "names".to_string(),
                type_ref: TypeRef::list_of(TypeRef::unresolved(builtin::string_type())),
                annotations: IndexMap::new(),
            },
        );
        object
            .annotation_types
            .insert("anno".to_string(), TypeRef::unresolved(builtin::number_type()));

        let mut seen = Vec::new();
        object.visit_type_refs_mut(&mut |type_ref: &mut TypeRef| {
            seen.push(type_ref.elem_id().full_name());
        });
        assert_eq!(seen, vec!["salto.string".to_string(), "salto.number".to_string()]);
    }

    #[test]
    fn walk_touches_every_leaf_once() {
        let mut inner = IndexMap::new();
        inner.insert("x".to_string(), Value::from(1i64));
        let value = Value::Map(IndexMap::from_iter([
            ("flat".to_string(), Value::from("s")),
            ("nested".to_string(), Value::Map(inner)),
            ("items".to_string(), Value::from(vec![true, false])),
        ]));

        let mut leaves = Vec::new();
        walk_values(&value, &mut |path, value| {
            if !matches!(value, Value::Map(_) | Value::List(_)) {
                leaves.push(path.join("."));
            }
        });
        assert_eq!(leaves, vec!["flat", "nested.x", "items.0", "items.1"]);
    }

    #[test]
    fn instance_type_ref_is_visited() {
        let mut instance = crate::element::InstanceElement::new(ElemId::new("a", "t"), "i");
        let mut count = 0;
        instance.visit_type_refs_mut(&mut |_: &mut TypeRef| count += 1);
        assert_eq!(count, 1);
        assert_eq!(instance.elem_id.id_type(), IdType::Instance);
    }
}
