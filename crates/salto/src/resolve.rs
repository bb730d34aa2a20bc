//! Post-merge type-reference resolution.
//!
//! A single pass over the merged arena replaces every type placeholder with
//! a handle (arena index) to the merged type of the same id. References to
//! ids with no merged type keep their placeholder for the validator to
//! report. The pass never follows the references it resolves, so cyclic
//! type graphs terminate trivially.
use crate::element::{Element, TypeRef};
use crate::visit::{VisitMut, VisitTypeRefsMut};
use std::collections::HashMap;

struct Resolver<'a> {
    types_by_name: &'a HashMap<String, usize>,
}

impl VisitMut<TypeRef> for Resolver<'_> {
    fn visit_mut(&mut self, type_ref: &mut TypeRef) {
        if let TypeRef::Id { elem_id, resolved } = type_ref {
            let target = self.types_by_name.get(&elem_id.full_name()).copied();
            if target.is_none() {
                tracing::debug!(elem_id = %elem_id, "type reference left unresolved");
            }
            *resolved = target;
        }
    }
}

/// Resolves every [TypeRef] embedded in `elements` against `elements` itself.
///
/// Running the pass twice is a no-op: handles are overwritten with the same
/// indices.
pub fn resolve_type_refs(elements: &mut [Element]) {
    let types_by_name: HashMap<String, usize> = elements
        .iter()
        .enumerate()
        .filter(|(_, element)| matches!(element, Element::Object(_) | Element::Primitive(_)))
        .map(|(index, element)| (element.elem_id().full_name(), index))
        .collect();

    let mut resolver = Resolver { types_by_name: &types_by_name };
    for element in elements.iter_mut() {
        element.visit_type_refs_mut(&mut resolver);
    }
}
