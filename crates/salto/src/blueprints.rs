//! Blueprint containers.
//!
//! A [Blueprint] is a filename plus its text buffer; a [ParsedBlueprint]
//! additionally carries the parse output. The workspace keeps the buffer
//! verbatim so flushing writes back exactly what was set.
use crate::parser::{ParseResult, Parser};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blueprint {
    pub filename: String,
    pub buffer: String,
}

impl Blueprint {
    pub fn new(filename: impl Into<String>, buffer: impl Into<String>) -> Self {
        Self { filename: filename.into(), buffer: buffer.into() }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedBlueprint {
    pub filename: String,
    pub buffer: String,
    pub parsed: ParseResult,
}

impl ParsedBlueprint {
    pub fn parse(parser: &dyn Parser, blueprint: Blueprint) -> Self {
        let parsed = parser.parse(&blueprint.buffer, &blueprint.filename);
        Self { filename: blueprint.filename, buffer: blueprint.buffer, parsed }
    }

    pub fn from_cache(blueprint: Blueprint, parsed: ParseResult) -> Self {
        Self { filename: blueprint.filename, buffer: blueprint.buffer, parsed }
    }
}

/// Utility macro to create a list of [Blueprint]s
///
/// Create a single unnamed blueprint
/// ```
/// # use salto::blueprints;
/// blueprints!("type \"salesforce.lead\" {}");
/// ```
///
/// Create multiple blueprints (filename required)
/// ```
/// # use salto::blueprints;
/// blueprints! {
///   "one.bp" => "type \"salesforce.lead\" {}",
///   "two.bp" => "type \"salesforce.account\" {}"
/// };
/// ```
#[macro_export]
macro_rules! blueprints {
    // single blueprint without filename
    { $buffer:expr } => {
        vec![$crate::blueprints::Blueprint::new("main.bp", $buffer)]
    };
    // multi blueprint with filenames
    { $($filename:expr => $buffer:expr),+ $(,)? } => {
        vec![ $( $crate::blueprints::Blueprint::new($filename, $buffer) ),+ ]
    };
}

#[cfg(test)]
mod test {
    use crate::parser::{HclParser, Parser};

    #[test]
    fn macro_builds_blueprints() {
        let single = blueprints!("variables { a = 1 }");
        assert_eq!(single.len(), 1);
        assert_eq!(single[0].filename, "main.bp");

        let multiple = blueprints! {
            "one.bp" => "variables { a = 1 }",
            "two.bp" => "variables { b = 2 }",
        };
        assert_eq!(multiple.len(), 2);
        assert_eq!(multiple[1].filename, "two.bp");
    }

    #[test]
    fn parse_attaches_the_result() {
        let blueprint = blueprints!("variables { a = 1 }").remove(0);
        let parsed = super::ParsedBlueprint::parse(&HclParser, blueprint);
        assert_eq!(parsed.parsed.elements.len(), 1);
        assert_eq!(parsed.buffer, "variables { a = 1 }");
        let reparsed = HclParser.parse(&parsed.buffer, &parsed.filename);
        assert_eq!(reparsed, parsed.parsed);
    }
}
