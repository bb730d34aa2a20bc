//! Pure helpers for splicing detailed changes into blueprint buffers.
//!
//! The workspace maps each change to a buffer position through the source
//! map, groups the results by filename and applies them back to front so
//! earlier positions stay valid. Rendering element data into blueprint
//! text is the formatter's job; changes arrive with their text payload.
use crate::element::ElemId;
use crate::parser::{SourcePos, SourceRange};
use std::collections::BTreeMap;

/// Fallback file for additions whose id has no located ancestor
pub const UNSORTED_FILENAME: &str = "unsorted.bp";

/// Union of the per-file source maps, keyed by element full name
pub type WorkspaceSourceMap = BTreeMap<String, Vec<SourceRange>>;

/// A structured add/modify/remove targeting one element id
#[derive(Debug, Clone, PartialEq)]
pub struct DetailedChange {
    pub id: ElemId,
    pub action: ChangeAction,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChangeAction {
    /// Insert pre-rendered blueprint text for a new element
    Add { text: String },
    /// Replace the located declaration with pre-rendered text
    Modify { text: String },
    /// Delete the located declaration
    Remove,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChangeLocation {
    pub change: DetailedChange,
    pub location: SourceRange,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum UpdateError {
    #[error("no source location is known for {elem_id}")]
    UnknownElement { elem_id: ElemId },
    #[error("change position {byte} is not a valid buffer position")]
    InvalidPosition { byte: usize },
}

/// Maps a change onto buffer positions.
///
/// Modifications and removals target every recorded declaration of the id.
/// Additions are placed just before the closing brace of the nearest
/// located ancestor, or appended to [UNSORTED_FILENAME] when the id has no
/// located ancestor at all.
pub fn get_change_locations(
    change: &DetailedChange,
    source_map: &WorkspaceSourceMap,
) -> Result<Vec<ChangeLocation>, UpdateError> {
    match &change.action {
        ChangeAction::Modify { .. } | ChangeAction::Remove => {
            let ranges = source_map
                .get(&change.id.full_name())
                .filter(|ranges| !ranges.is_empty())
                .ok_or_else(|| UpdateError::UnknownElement { elem_id: change.id.clone() })?;
            Ok(ranges
                .iter()
                .map(|range| ChangeLocation { change: change.clone(), location: range.clone() })
                .collect())
        }
        ChangeAction::Add { .. } => {
            let mut ancestor = change.id.parent();
            while let Some(id) = &ancestor {
                if let Some(range) = source_map.get(&id.full_name()).and_then(|r| r.last()) {
                    // zero-width position just inside the ancestor's block
                    let at = SourcePos {
                        line: range.end.line,
                        col: range.end.col.saturating_sub(1),
                        byte: range.end.byte.saturating_sub(1),
                    };
                    return Ok(vec![ChangeLocation {
                        change: change.clone(),
                        location: SourceRange {
                            filename: range.filename.clone(),
                            start: at,
                            end: at,
                        },
                    }]);
                }
                ancestor = id.parent();
            }
            let eof = SourcePos { line: usize::MAX, col: usize::MAX, byte: usize::MAX };
            Ok(vec![ChangeLocation {
                change: change.clone(),
                location: SourceRange {
                    filename: UNSORTED_FILENAME.to_string(),
                    start: eof,
                    end: eof,
                },
            }])
        }
    }
}

/// Applies located changes to one buffer. Positions past the end of the
/// buffer mean "append".
pub fn update_blueprint_data(
    buffer: &str,
    mut changes: Vec<ChangeLocation>,
) -> Result<String, UpdateError> {
    // apply back to front so byte positions stay stable
    changes.sort_by(|a, b| b.location.start.byte.cmp(&a.location.start.byte));

    let mut updated = buffer.to_string();
    for located in changes {
        let start = located.location.start.byte.min(updated.len());
        let end = located.location.end.byte.min(updated.len()).max(start);
        if !updated.is_char_boundary(start) {
            return Err(UpdateError::InvalidPosition { byte: start });
        }
        if !updated.is_char_boundary(end) {
            return Err(UpdateError::InvalidPosition { byte: end });
        }
        match located.change.action {
            ChangeAction::Add { text } => updated.insert_str(start, &text),
            ChangeAction::Modify { text } => updated.replace_range(start..end, &text),
            ChangeAction::Remove => updated.replace_range(start..end, ""),
        }
    }
    Ok(updated)
}
