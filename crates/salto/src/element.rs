//! The element model: identifiers, types, instances and variables.
//!
//! Everything a blueprint declares becomes an [Element] keyed by an [ElemId].
//! Elements reference each other by id only ([TypeRef]); the resolver fills
//! in arena handles after merge so that cyclic type graphs need no `Rc` webs.
use crate::value::Value;
use indexmap::IndexMap;

/// Reserved adapter name of the variable namespace
pub const VAR_NAMESPACE: &str = "var";

/// Adapter name owning all built-in elements
pub const BUILTIN_ADAPTER: &str = "salto";

/// Reserved instance name marking an adapter configuration instance
pub const CONFIG_NAME: &str = "_config";

/// Annotation key holding a default value
pub const DEFAULT_ANNOTATION: &str = "_default";

/// Annotation key marking a field as required
pub const REQUIRED_ANNOTATION: &str = "_required";

/// Type name of the field-update marker type
pub const UPDATE_MARKER: &str = "update";

/// Namespace an [ElemId] points into
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IdType {
    Type,
    Field,
    Attr,
    Instance,
    Annotation,
    Var,
}

impl IdType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdType::Type => "type",
            IdType::Field => "field",
            IdType::Attr => "attr",
            IdType::Instance => "instance",
            IdType::Annotation => "annotation",
            IdType::Var => "var",
        }
    }

    fn from_str(s: &str) -> Option<IdType> {
        match s {
            "field" => Some(IdType::Field),
            "attr" => Some(IdType::Attr),
            "instance" => Some(IdType::Instance),
            "annotation" => Some(IdType::Annotation),
            _ => None,
        }
    }
}

/// Hierarchical element identifier: `(adapter, type name, id type, name parts)`.
///
/// The canonical dotted rendering omits the id-type segment for top-level
/// types and variables, so `salto.office` is a type, `salto.office.field.name`
/// is a field of it and `var.scale` is a variable.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ElemId {
    adapter: String,
    type_name: String,
    id_type: IdType,
    name_parts: Vec<String>,
}

impl ElemId {
    pub fn new(adapter: &str, type_name: &str) -> Self {
        Self {
            adapter: adapter.to_string(),
            type_name: type_name.to_string(),
            id_type: IdType::Type,
            name_parts: Vec::new(),
        }
    }

    pub fn variable(name: &str) -> Self {
        Self {
            adapter: VAR_NAMESPACE.to_string(),
            type_name: name.to_string(),
            id_type: IdType::Var,
            name_parts: Vec::new(),
        }
    }

    /// Derives a nested id under `self`, switching into `id_type`'s namespace
    /// when `self` is a top-level type id.
    pub fn nested(&self, id_type: IdType, part: &str) -> Self {
        let mut name_parts = self.name_parts.clone();
        name_parts.push(part.to_string());
        Self {
            adapter: self.adapter.clone(),
            type_name: self.type_name.clone(),
            id_type: if self.id_type == IdType::Type { id_type } else { self.id_type },
            name_parts,
        }
    }

    /// Parses a canonical dotted name back into an id.
    ///
    /// Accepts the shorthand forms produced by [full_name](Self::full_name):
    /// bare built-in names (`string`), `adapter.type`, `var.name` and
    /// `adapter.type.<idtype>.parts...`.
    pub fn from_full_name(full_name: &str) -> Result<Self, InvalidElemIdError> {
        let parts: Vec<&str> = full_name.split('.').filter(|p| !p.is_empty()).collect();
        match parts.as_slice() {
            [] => Err(InvalidElemIdError { input: full_name.to_string() }),
            [single] => Ok(ElemId::new(BUILTIN_ADAPTER, single)),
            [ns, name] if *ns == VAR_NAMESPACE => Ok(ElemId::variable(name)),
            [adapter, type_name] => Ok(ElemId::new(adapter, type_name)),
            [adapter, type_name, id_type, rest @ ..] => {
                let Some(id_type) = IdType::from_str(id_type) else {
                    return Err(InvalidElemIdError { input: full_name.to_string() });
                };
                if rest.is_empty() {
                    return Err(InvalidElemIdError { input: full_name.to_string() });
                }
                Ok(Self {
                    adapter: adapter.to_string(),
                    type_name: type_name.to_string(),
                    id_type,
                    name_parts: rest.iter().map(|p| p.to_string()).collect(),
                })
            }
        }
    }

    pub fn full_name(&self) -> String {
        let mut segments = vec![self.adapter.as_str(), self.type_name.as_str()];
        if !matches!(self.id_type, IdType::Type | IdType::Var) {
            segments.push(self.id_type.as_str());
        }
        segments.extend(self.name_parts.iter().map(String::as_str));
        segments.join(".")
    }

    pub fn adapter(&self) -> &str {
        &self.adapter
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn id_type(&self) -> IdType {
        self.id_type
    }

    pub fn name_parts(&self) -> &[String] {
        &self.name_parts
    }

    /// Last name segment; the type name itself for top-level ids.
    pub fn name(&self) -> &str {
        self.name_parts.last().map(String::as_str).unwrap_or(&self.type_name)
    }

    /// Containing id, or `None` for top-level types and variables.
    pub fn parent(&self) -> Option<ElemId> {
        match self.name_parts.len() {
            0 => None,
            1 if self.id_type == IdType::Instance => None,
            1 => Some(ElemId::new(&self.adapter, &self.type_name)),
            _ => {
                let mut parent = self.clone();
                parent.name_parts.pop();
                Some(parent)
            }
        }
    }

    /// Depth below the owning top-level element.
    pub fn nesting_level(&self) -> usize {
        match self.id_type {
            IdType::Type | IdType::Var => self.name_parts.len(),
            IdType::Instance => self.name_parts.len().saturating_sub(1),
            _ => self.name_parts.len(),
        }
    }

    /// The id of the top-level element this id lives in.
    pub fn top_level(&self) -> ElemId {
        match self.id_type {
            IdType::Type | IdType::Var => {
                let mut id = self.clone();
                id.name_parts.clear();
                id
            }
            IdType::Instance => Self {
                adapter: self.adapter.clone(),
                type_name: self.type_name.clone(),
                id_type: IdType::Instance,
                name_parts: self.name_parts.first().cloned().into_iter().collect(),
            },
            _ => ElemId::new(&self.adapter, &self.type_name),
        }
    }

    /// Whether this id names an adapter configuration instance.
    pub fn is_config(&self) -> bool {
        self.id_type == IdType::Instance
            && self.name_parts.first().map(String::as_str) == Some(CONFIG_NAME)
    }

    /// Whether this id is the reserved field-update marker type.
    pub fn is_update_marker(&self) -> bool {
        self.id_type == IdType::Type
            && self.name_parts.is_empty()
            && self.type_name == UPDATE_MARKER
            && self.adapter == BUILTIN_ADAPTER
    }
}

impl std::fmt::Display for ElemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.full_name())
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
#[error("invalid element id `{input}`")]
pub struct InvalidElemIdError {
    pub input: String,
}

/// Reference to a type by id, optionally carrying a handle into the merged
/// element arena once the resolver has run.
///
/// `List` wraps an inner reference; two list refs are equal iff their inner
/// references are equal.
#[derive(Debug, Clone)]
pub enum TypeRef {
    Id {
        elem_id: ElemId,
        /// Index into the merged element arena, populated by the resolver.
        resolved: Option<usize>,
    },
    List(Box<TypeRef>),
}

impl TypeRef {
    pub fn unresolved(elem_id: ElemId) -> Self {
        TypeRef::Id { elem_id, resolved: None }
    }

    pub fn list_of(inner: TypeRef) -> Self {
        TypeRef::List(Box::new(inner))
    }

    /// The referenced element id; for lists, the innermost one.
    pub fn elem_id(&self) -> &ElemId {
        match self {
            TypeRef::Id { elem_id, .. } => elem_id,
            TypeRef::List(inner) => inner.elem_id(),
        }
    }

    pub fn resolved(&self) -> Option<usize> {
        match self {
            TypeRef::Id { resolved, .. } => *resolved,
            TypeRef::List(inner) => inner.resolved(),
        }
    }

    pub fn is_list(&self) -> bool {
        matches!(self, TypeRef::List(_))
    }

    /// Canonical rendering (`list<...>` for lists).
    pub fn full_name(&self) -> String {
        match self {
            TypeRef::Id { elem_id, .. } => elem_id.full_name(),
            TypeRef::List(inner) => format!("list<{}>", inner.full_name()),
        }
    }
}

// Resolution state is a cache, not identity.
impl PartialEq for TypeRef {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (TypeRef::Id { elem_id: a, .. }, TypeRef::Id { elem_id: b, .. }) => a == b,
            (TypeRef::List(a), TypeRef::List(b)) => a == b,
            _ => false,
        }
    }
}

pub type Annotations = IndexMap<String, Value>;
pub type AnnotationTypes = IndexMap<String, TypeRef>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Primitive {
    String,
    Number,
    Boolean,
}

impl Primitive {
    pub fn as_str(&self) -> &'static str {
        match self {
            Primitive::String => "string",
            Primitive::Number => "number",
            Primitive::Boolean => "boolean",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PrimitiveType {
    pub elem_id: ElemId,
    pub primitive: Primitive,
    pub annotations: Annotations,
    pub annotation_types: AnnotationTypes,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub parent_id: ElemId,
    pub name: String,
    pub type_ref: TypeRef,
    pub annotations: Annotations,
}

impl Field {
    pub fn elem_id(&self) -> ElemId {
        self.parent_id.nested(IdType::Field, &self.name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObjectType {
    pub elem_id: ElemId,
    pub fields: IndexMap<String, Field>,
    pub annotations: Annotations,
    pub annotation_types: AnnotationTypes,
    pub is_settings: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InstanceElement {
    pub elem_id: ElemId,
    pub type_ref: TypeRef,
    pub value: IndexMap<String, Value>,
    pub annotations: Annotations,
}

impl InstanceElement {
    pub fn new(type_id: ElemId, name: &str) -> Self {
        Self {
            elem_id: type_id.nested(IdType::Instance, name),
            type_ref: TypeRef::unresolved(type_id),
            value: IndexMap::new(),
            annotations: IndexMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub elem_id: ElemId,
    pub value: Value,
}

/// Any top-level element of the merged graph
#[derive(Debug, Clone, PartialEq)]
pub enum Element {
    Primitive(PrimitiveType),
    Object(ObjectType),
    Instance(InstanceElement),
    Variable(Variable),
}

impl Element {
    pub fn elem_id(&self) -> &ElemId {
        match self {
            Element::Primitive(p) => &p.elem_id,
            Element::Object(o) => &o.elem_id,
            Element::Instance(i) => &i.elem_id,
            Element::Variable(v) => &v.elem_id,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectType> {
        match self {
            Element::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_instance(&self) -> Option<&InstanceElement> {
        match self {
            Element::Instance(i) => Some(i),
            _ => None,
        }
    }
}

/// Built-in elements appended to every workspace state rebuild
pub mod builtin {
    use super::*;

    pub fn string_type() -> ElemId {
        ElemId::new(BUILTIN_ADAPTER, "string")
    }

    pub fn number_type() -> ElemId {
        ElemId::new(BUILTIN_ADAPTER, "number")
    }

    pub fn boolean_type() -> ElemId {
        ElemId::new(BUILTIN_ADAPTER, "boolean")
    }

    pub fn update_marker() -> ElemId {
        ElemId::new(BUILTIN_ADAPTER, UPDATE_MARKER)
    }

    fn primitive(elem_id: ElemId, primitive: Primitive) -> Element {
        Element::Primitive(PrimitiveType {
            elem_id,
            primitive,
            annotations: IndexMap::new(),
            annotation_types: IndexMap::new(),
        })
    }

    /// The workspace configuration object type (`salto.config`)
    pub fn salto_config_type() -> Element {
        let elem_id = ElemId::new(BUILTIN_ADAPTER, "config");
        let mut fields = IndexMap::new();
        for (name, type_ref, required) in [
            ("uid", TypeRef::unresolved(string_type()), true),
            ("name", TypeRef::unresolved(string_type()), true),
            (
                "additional_blueprints",
                TypeRef::list_of(TypeRef::unresolved(string_type())),
                false,
            ),
        ] {
            let mut annotations = IndexMap::new();
            if required {
                annotations.insert(REQUIRED_ANNOTATION.to_string(), Value::Boolean(true));
            }
            fields.insert(
                name.to_string(),
                Field {
                    parent_id: elem_id.clone(),
                    name: name.to_string(),
                    type_ref,
                    annotations,
                },
            );
        }
        Element::Object(ObjectType {
            elem_id,
            fields,
            annotations: IndexMap::new(),
            annotation_types: IndexMap::new(),
            is_settings: true,
        })
    }

    /// All built-ins, in the order they are appended to the element stream
    pub fn all() -> Vec<Element> {
        vec![
            primitive(string_type(), Primitive::String),
            primitive(number_type(), Primitive::Number),
            primitive(boolean_type(), Primitive::Boolean),
            primitive(update_marker(), Primitive::String),
            salto_config_type(),
        ]
    }
}
