//! Blueprint parsing.
//!
//! The coordinator only depends on the [Parser] trait: a buffer and its
//! filename go in, elements plus a source map plus parse errors come out.
//! [HclParser] is the bundled implementation; blueprints are HCL bodies
//! whose root blocks map to elements:
//!
//! ```hcl
//! type "salesforce.lead" {
//!   label = "Lead"                      # annotation value
//!   annotations { label = "string" }    # annotation type declarations
//!   field "string" "status" {           # field: type label, name label
//!     _required = true
//!   }
//! }
//!
//! settings "salesforce.settings" {}     # object type with is_settings set
//! primitive "salesforce.id" "string" {}
//!
//! instance "salesforce.lead" "main" {
//!   status = "Open"
//!   owner  = salesforce.lead.instance.other.owner   # reference expression
//! }
//!
//! variables {
//!   scale = 4
//! }
//! ```
//!
//! Positions are 1-based line/column plus a 0-based byte offset.
use crate::element::{
    Element, ElemId, Field, IdType, InstanceElement, ObjectType, Primitive, PrimitiveType, TypeRef,
    Variable,
};
use crate::value::{ReferenceExpression, Value};
use hcl_edit::expr::{Expression, ObjectKey, Traversal, TraversalOperator};
use hcl_edit::structure::{Block, Body, Structure};
use hcl_edit::Span;
use indexmap::IndexMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourcePos {
    pub line: usize,
    pub col: usize,
    pub byte: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRange {
    pub filename: String,
    pub start: SourcePos,
    pub end: SourcePos,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub subject: SourceRange,
    pub detail: String,
}

impl std::error::Error for ParseError {}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}:{}: {}",
            self.subject.filename, self.subject.start.line, self.subject.start.col, self.detail
        )
    }
}

pub type SourceMap = IndexMap<String, Vec<SourceRange>>;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParseResult {
    pub elements: Vec<Element>,
    pub source_map: SourceMap,
    pub errors: Vec<ParseError>,
}

/// The parsing interface the workspace consumes
pub trait Parser {
    fn parse(&self, buffer: &str, filename: &str) -> ParseResult;
}

/// HCL-backed blueprint parser
#[derive(Debug, Default)]
pub struct HclParser;

impl Parser for HclParser {
    fn parse(&self, buffer: &str, filename: &str) -> ParseResult {
        let body = match hcl_edit::parser::parse_body(buffer) {
            Ok(body) => body,
            Err(error) => {
                return ParseResult {
                    elements: Vec::new(),
                    source_map: SourceMap::new(),
                    errors: vec![ParseError {
                        subject: zero_range(filename),
                        detail: format!("invalid blueprint syntax: {error}"),
                    }],
                }
            }
        };
        FileParser { buffer, filename, result: ParseResult::default() }.parse_body(body)
    }
}

struct FileParser<'a> {
    buffer: &'a str,
    filename: &'a str,
    result: ParseResult,
}

impl FileParser<'_> {
    fn parse_body(mut self, body: Body) -> ParseResult {
        for structure in body.into_iter() {
            match structure {
                Structure::Attribute(attribute) => {
                    let range = self.range(attribute.span());
                    self.error(range, "attributes are not allowed at the top level");
                }
                Structure::Block(block) => self.parse_block(block),
            }
        }
        self.result
    }

    fn parse_block(&mut self, block: Block) {
        let range = self.range(block.span());
        match block.ident.value().as_str() {
            "type" => self.parse_object(block, false),
            "settings" => self.parse_object(block, true),
            "primitive" => self.parse_primitive(block),
            "instance" => self.parse_instance(block),
            "variables" => self.parse_variables(block),
            other => {
                self.error(range, format!("unknown block type `{other}`"));
            }
        }
    }

    fn parse_object(&mut self, block: Block, is_settings: bool) {
        let range = self.range(block.span());
        let Some(elem_id) = self.single_label_id(&block, &range) else {
            return;
        };

        let mut object = ObjectType {
            elem_id: elem_id.clone(),
            fields: IndexMap::new(),
            annotations: IndexMap::new(),
            annotation_types: IndexMap::new(),
            is_settings,
        };
        for attribute in block.body.attributes() {
            let attribute_range = self.range(attribute.span());
            match self.value(&attribute.value, &attribute_range) {
                Some(value) => {
                    object.annotations.insert(attribute.key.value().as_str().to_string(), value);
                }
                None => continue,
            }
        }
        for nested in block.body.blocks() {
            let nested_range = self.range(nested.span());
            match nested.ident.value().as_str() {
                "annotations" => self.parse_annotation_types(nested, &mut object.annotation_types),
                "field" => self.parse_field(nested, &mut object),
                other => {
                    self.error(nested_range, format!("unknown block type `{other}` in type block"));
                }
            }
        }
        self.record(&elem_id, range);
        self.result.elements.push(Element::Object(object));
    }

    fn parse_field(&mut self, block: &Block, object: &mut ObjectType) {
        let range = self.range(block.span());
        if block.labels.len() != 2 {
            self.error(range, "field blocks need a type label and a name label");
            return;
        }
        let Some(type_ref) = self.type_ref(block.labels[0].as_str(), &range) else {
            return;
        };
        let name = block.labels[1].as_str().to_string();
        if object.fields.contains_key(&name) {
            self.error(range, format!("duplicate field `{name}`"));
            return;
        }

        let mut annotations = IndexMap::new();
        for attribute in block.body.attributes() {
            let attribute_range = self.range(attribute.span());
            if let Some(value) = self.value(&attribute.value, &attribute_range) {
                annotations.insert(attribute.key.value().as_str().to_string(), value);
            }
        }
        let field = Field { parent_id: object.elem_id.clone(), name: name.clone(), type_ref, annotations };
        self.record(&field.elem_id(), range);
        object.fields.insert(name, field);
    }

    fn parse_annotation_types(&mut self, block: &Block, annotation_types: &mut IndexMap<String, TypeRef>) {
        for attribute in block.body.attributes() {
            let range = self.range(attribute.span());
            let Expression::String(type_name) = &attribute.value else {
                self.error(range, "annotation types must be written as type name strings");
                continue;
            };
            if let Some(type_ref) = self.type_ref(type_name.value(), &range) {
                annotation_types.insert(attribute.key.value().as_str().to_string(), type_ref);
            }
        }
    }

    fn parse_primitive(&mut self, block: Block) {
        let range = self.range(block.span());
        if block.labels.len() != 2 {
            self.error(range, "primitive blocks need an id label and a kind label");
            return;
        }
        let Some(elem_id) = self.elem_id(block.labels[0].as_str(), &range) else {
            return;
        };
        let primitive = match block.labels[1].as_str() {
            "string" => Primitive::String,
            "number" => Primitive::Number,
            "boolean" => Primitive::Boolean,
            other => {
                self.error(range, format!("unknown primitive kind `{other}`"));
                return;
            }
        };

        let mut element = PrimitiveType {
            elem_id: elem_id.clone(),
            primitive,
            annotations: IndexMap::new(),
            annotation_types: IndexMap::new(),
        };
        for attribute in block.body.attributes() {
            let attribute_range = self.range(attribute.span());
            if let Some(value) = self.value(&attribute.value, &attribute_range) {
                element.annotations.insert(attribute.key.value().as_str().to_string(), value);
            }
        }
        for nested in block.body.blocks() {
            let nested_range = self.range(nested.span());
            match nested.ident.value().as_str() {
                "annotations" => self.parse_annotation_types(nested, &mut element.annotation_types),
                other => {
                    self.error(
                        nested_range,
                        format!("unknown block type `{other}` in primitive block"),
                    );
                }
            }
        }
        self.record(&elem_id, range);
        self.result.elements.push(Element::Primitive(element));
    }

    fn parse_instance(&mut self, block: Block) {
        let range = self.range(block.span());
        if block.labels.len() != 2 {
            self.error(range, "instance blocks need a type label and a name label");
            return;
        }
        let Some(type_id) = self.elem_id(block.labels[0].as_str(), &range) else {
            return;
        };

        let mut instance = InstanceElement::new(type_id, block.labels[1].as_str());
        for attribute in block.body.attributes() {
            let attribute_range = self.range(attribute.span());
            if let Some(value) = self.value(&attribute.value, &attribute_range) {
                instance.value.insert(attribute.key.value().as_str().to_string(), value);
            }
        }
        for nested in block.body.blocks() {
            let nested_range = self.range(nested.span());
            self.error(nested_range, "instance values must be attributes, not blocks");
        }
        let elem_id = instance.elem_id.clone();
        self.record(&elem_id, range);
        self.result.elements.push(Element::Instance(instance));
    }

    fn parse_variables(&mut self, block: Block) {
        for attribute in block.body.attributes() {
            let range = self.range(attribute.span());
            let Some(value) = self.value(&attribute.value, &range) else {
                continue;
            };
            let variable = Variable {
                elem_id: ElemId::variable(attribute.key.value().as_str()),
                value,
            };
            let elem_id = variable.elem_id.clone();
            self.record(&elem_id, range);
            self.result.elements.push(Element::Variable(variable));
        }
        for nested in block.body.blocks() {
            let nested_range = self.range(nested.span());
            self.error(nested_range, "variables must be attributes, not blocks");
        }
    }

    fn value(&mut self, expression: &Expression, range: &SourceRange) -> Option<Value> {
        match value_from_expression(expression) {
            Ok(value) => Some(value),
            Err(detail) => {
                self.error(range.clone(), detail);
                None
            }
        }
    }

    fn single_label_id(&mut self, block: &Block, range: &SourceRange) -> Option<ElemId> {
        if block.labels.len() != 1 {
            self.error(range.clone(), "expected exactly one element id label");
            return None;
        }
        self.elem_id(block.labels[0].as_str(), range)
    }

    fn elem_id(&mut self, text: &str, range: &SourceRange) -> Option<ElemId> {
        match ElemId::from_full_name(text) {
            Ok(elem_id) => Some(elem_id),
            Err(error) => {
                self.error(range.clone(), error.to_string());
                None
            }
        }
    }

    fn type_ref(&mut self, text: &str, range: &SourceRange) -> Option<TypeRef> {
        if let Some(inner) = text.strip_prefix("list<").and_then(|t| t.strip_suffix('>')) {
            return Some(TypeRef::list_of(self.type_ref(inner, range)?));
        }
        Some(TypeRef::unresolved(self.elem_id(text, range)?))
    }

    fn record(&mut self, elem_id: &ElemId, range: SourceRange) {
        self.result.source_map.entry(elem_id.full_name()).or_default().push(range);
    }

    fn error(&mut self, subject: SourceRange, detail: impl Into<String>) {
        let error = ParseError { subject, detail: detail.into() };
        tracing::trace!(%error, "blueprint issue");
        self.result.errors.push(error);
    }

    fn range(&self, span: Option<std::ops::Range<usize>>) -> SourceRange {
        match span {
            Some(span) => SourceRange {
                filename: self.filename.to_string(),
                start: position_at(self.buffer, span.start),
                end: position_at(self.buffer, span.end),
            },
            None => zero_range(self.filename),
        }
    }
}

fn zero_range(filename: &str) -> SourceRange {
    SourceRange {
        filename: filename.to_string(),
        start: SourcePos { line: 1, col: 1, byte: 0 },
        end: SourcePos { line: 1, col: 1, byte: 0 },
    }
}

fn position_at(buffer: &str, byte: usize) -> SourcePos {
    let byte = byte.min(buffer.len());
    let before = &buffer[..byte];
    let line = before.bytes().filter(|b| *b == b'\n').count() + 1;
    let col = byte - before.rfind('\n').map(|at| at + 1).unwrap_or(0) + 1;
    SourcePos { line, col, byte }
}

fn value_from_expression(expression: &Expression) -> Result<Value, String> {
    match expression {
        Expression::Null(_) => Ok(Value::Null),
        Expression::Bool(value) => Ok(Value::Boolean(*value.value())),
        Expression::Number(value) => {
            let number = value.value();
            if let Some(int) = number.as_i64() {
                return Ok(Value::Integer(int));
            }
            number
                .as_f64()
                .map(Value::Decimal)
                .ok_or_else(|| "unsupported numeric literal".to_string())
        }
        Expression::String(value) => Ok(Value::String(value.value().clone())),
        Expression::Array(array) => Ok(Value::List(
            array.iter().map(value_from_expression).collect::<Result<_, _>>()?,
        )),
        Expression::Object(object) => {
            let mut map = IndexMap::new();
            for (key, value) in object.iter() {
                let key = match key {
                    ObjectKey::Ident(ident) => ident.value().as_str().to_string(),
                    ObjectKey::Expression(Expression::String(s)) => s.value().clone(),
                    _ => return Err("object keys must be identifiers or strings".to_string()),
                };
                map.insert(key, value_from_expression(value.expr())?);
            }
            Ok(Value::Map(map))
        }
        Expression::Variable(variable) => Ok(Value::Reference(ReferenceExpression::new(vec![
            variable.value().as_str().to_string(),
        ]))),
        Expression::Traversal(traversal) => reference_from_traversal(traversal),
        _ => Err("unsupported expression in blueprint".to_string()),
    }
}

fn reference_from_traversal(traversal: &Traversal) -> Result<Value, String> {
    let Expression::Variable(root) = &traversal.expr else {
        return Err("references must start with an identifier".to_string());
    };
    let mut path = vec![root.value().as_str().to_string()];
    for operator in traversal.operators.iter() {
        match operator.value() {
            TraversalOperator::GetAttr(ident) => path.push(ident.value().as_str().to_string()),
            TraversalOperator::Index(Expression::Number(number)) => {
                let index = number
                    .value()
                    .as_i64()
                    .ok_or_else(|| "reference indices must be integers".to_string())?;
                path.push(index.to_string());
            }
            TraversalOperator::Index(Expression::String(key)) => path.push(key.value().clone()),
            _ => return Err("unsupported reference form".to_string()),
        }
    }
    Ok(Value::Reference(ReferenceExpression::new(path)))
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(buffer: &str) -> ParseResult {
        HclParser.parse(buffer, "test.bp")
    }

    #[test]
    fn parses_a_type_with_fields_and_annotations() {
        let result = parse(
            r#"
type "salesforce.lead" {
  label = "Lead"
  annotations {
    label = "string"
  }
  field "string" "status" {
    _required = true
    _default = "New"
  }
  field "list<string>" "tags" {}
}
"#,
        );
        assert_eq!(result.errors, vec![]);
        assert_eq!(result.elements.len(), 1);
        let object = result.elements[0].as_object().expect("type block yields an object");
        assert_eq!(object.elem_id.full_name(), "salesforce.lead");
        assert_eq!(object.annotations["label"], Value::from("Lead"));
        assert_eq!(object.annotation_types["label"].elem_id().full_name(), "salto.string");
        assert_eq!(object.fields["status"].annotations["_default"], Value::from("New"));
        assert!(object.fields["tags"].type_ref.is_list());
        assert!(result.source_map.contains_key("salesforce.lead"));
        assert!(result.source_map.contains_key("salesforce.lead.field.status"));
    }

    #[test]
    fn parses_instances_with_references() {
        let result = parse(
            r#"
instance "salesforce.lead" "main" {
  status = "Open"
  owner = salesforce.lead.instance.other.owner
  scores = [1, 2.5]
  extra = { nested = true }
}
"#,
        );
        assert_eq!(result.errors, vec![]);
        let instance = result.elements[0].as_instance().expect("instance block");
        assert_eq!(instance.elem_id.full_name(), "salesforce.lead.instance.main");
        assert_eq!(
            instance.value["owner"],
            Value::Reference(ReferenceExpression::from_dotted(
                "salesforce.lead.instance.other.owner"
            ))
        );
        assert_eq!(
            instance.value["scores"],
            Value::List(vec![Value::Integer(1), Value::Decimal(2.5)])
        );
        assert_eq!(
            instance.value["extra"],
            Value::Map(IndexMap::from_iter([("nested".to_string(), Value::Boolean(true))]))
        );
    }

    #[test]
    fn parses_settings_primitives_and_variables() {
        let result = parse(
            r#"
settings "salesforce.config" {}
primitive "salesforce.id" "string" {
  _default = "000"
}
variables {
  scale = 4
}
"#,
        );
        assert_eq!(result.errors, vec![]);
        assert_eq!(result.elements.len(), 3);
        assert!(matches!(&result.elements[0], Element::Object(o) if o.is_settings));
        assert!(matches!(&result.elements[1], Element::Primitive(_)));
        assert!(
            matches!(&result.elements[2], Element::Variable(v) if v.elem_id.full_name() == "var.scale")
        );
    }

    #[test]
    fn update_declarations_use_the_update_marker() {
        let result = parse(
            r#"
type "salesforce.lead" {
  field "update" "status" {
    label = "better label"
  }
}
"#,
        );
        assert_eq!(result.errors, vec![]);
        let object = result.elements[0].as_object().expect("object");
        assert!(object.fields["status"].type_ref.elem_id().is_update_marker());
    }

    #[test]
    fn syntax_errors_are_reported_with_the_filename() {
        let result = parse("type \"missing.brace\" {");
        assert_eq!(result.elements, vec![]);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].subject.filename, "test.bp");
        assert!(result.errors[0].detail.contains("invalid blueprint syntax"));
    }

    #[test]
    fn top_level_attributes_and_unknown_blocks_error() {
        let result = parse("stray = 1\nwhat \"ever\" {}\n");
        assert_eq!(result.elements, vec![]);
        let details: Vec<_> = result.errors.iter().map(|e| e.detail.clone()).collect();
        assert_eq!(
            details,
            vec![
                "attributes are not allowed at the top level".to_string(),
                "unknown block type `what`".to_string(),
            ]
        );
        assert_eq!(result.errors[1].subject.start.line, 2);
    }

    #[test]
    fn positions_count_lines_and_columns_from_one() {
        let buffer = "a\nbc\nd";
        assert_eq!(position_at(buffer, 0), SourcePos { line: 1, col: 1, byte: 0 });
        assert_eq!(position_at(buffer, 2), SourcePos { line: 2, col: 1, byte: 2 });
        assert_eq!(position_at(buffer, 4), SourcePos { line: 2, col: 3, byte: 4 });
        assert_eq!(position_at(buffer, 5), SourcePos { line: 3, col: 1, byte: 5 });
    }

    #[test]
    fn duplicate_fields_in_one_block_are_rejected() {
        let result = parse(
            r#"
type "salesforce.lead" {
  field "string" "status" {}
  field "number" "status" {}
}
"#,
        );
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].detail.contains("duplicate field"));
        let object = result.elements[0].as_object().expect("object still produced");
        assert_eq!(object.fields["status"].type_ref.elem_id().full_name(), "salto.string");
    }
}
