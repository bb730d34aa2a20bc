//! # salto - blueprint workspace core
//!
//! ## Introduction for developers
//!
//! Read this to understand how the workspace core works internally.
//!
//! ### Blueprint terms
//!
//! Quick introduction to terms used to describe a workspace.
//!
//! - a `blueprint` is a text file (`*.bp`) declaring configuration
//!   elements in an HCL-shaped DSL
//! - an `element` is anything with an identity: an object type, a
//!   primitive type, an instance of a type, or a variable
//! - an `ElemId` is the hierarchical identity
//!   `(adapter, type name, id type, name parts)`; its canonical dotted
//!   rendering (`salesforce.lead.field.status`) is used everywhere
//! - a single element may be declared across many files; the partial
//!   declarations are `merged` into one element per id
//!
//! This is a valid blueprint:
//!
//! ```hcl
//! type "salesforce.lead" {
//!   label = "Lead"
//!   field "string" "status" {
//!     _default = "New"
//!   }
//! }
//!
//! instance "salesforce.lead" "main" {
//!   status = "Open"
//! }
//! ```
//!
//! ### Loading files
//!
//! A [workspace::Workspace] gathers blueprints from its base directory
//! (recursively, skipping dot-prefixed directories), parses each through
//! the [parser::Parser] interface (optionally via the advisory
//! [cache::ParseCache]) and keeps them as
//! [blueprints::ParsedBlueprint]s: the verbatim buffer plus elements,
//! per-file source map and parse errors.
//!
//! ### Merging
//!
//! see [merge::merge_elements]
//!
//! The element streams of all blueprints are folded by id. Object types
//! distinguish one *base* declaration from *update* declarations (every
//! field typed with the reserved `update` marker); updates contribute
//! field annotations, annotation types and annotation values. Instances
//! deep-merge their values. All duplicate contributions are reported as
//! [merge::MergeError] values and missing instance fields are filled from
//! `_default` annotations.
//!
//! ### Resolving and validating
//!
//! Merged elements reference types by id only. [resolve::resolve_type_refs]
//! replaces each placeholder with a handle into the merged arena, then
//! [validate::validate_elements] checks value shapes against type
//! definitions and chases reference expressions, producing
//! [validate::ValidationError]s with a severity per kind.
//!
//! ### Editing and flushing
//!
//! Edits replace parsed blueprints wholesale and re-derive the state
//! (see [workspace::create_workspace_state]); there is no incremental
//! merge. Dirty filenames are tracked and [workspace::Workspace::flush]
//! persists them: deleted blueprints are removed from disk, credential
//! blueprints are routed under local storage, everything else is written
//! under the base directory. [workspace::Workspace::get_workspace_errors]
//! projects parse, merge and validation errors onto the source fragments
//! they point at.
pub mod blueprints;
pub mod bp_update;
pub mod cache;
pub mod config;
pub mod element;
pub mod files;
pub mod merge;
pub mod parser;
pub mod resolve;
pub mod validate;
pub mod value;
mod visit;
pub mod workspace;
