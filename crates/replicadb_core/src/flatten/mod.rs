//! Flattening of nested records and schemas.
//!
//! Sub-paths promoted with `asModels` become virtual collections linked to
//! their parent through the synthetic `_fid`/`_fpid` keys. Sub-paths listed
//! in `asFields` are inlined into their parent under an escaped column name.
//!
//! Records and schemas are flattened by the same traversal, so every row a
//! record produces has a matching flat collection.

mod fields;
mod options;
mod record;
mod resolved;

pub use fields::{flatten_schema, FlatCollection};
pub use options::{
    resolve_auto, resolve_manual, AsFieldSpec, FlattenMode, FlattenOptions, ManualFlattenOptions,
};
pub use record::{flatten_record, FlatRow};
pub use resolved::{ResolvedCollection, ResolvedSchema};

use crate::path;

/// Synthetic primary key of virtual collection rows.
pub const FID: &str = "_fid";

/// Synthetic reference from a virtual row to its parent row.
pub const FPID: &str = "_fpid";

/// A top-level model and the options that live below it.
#[derive(Debug, PartialEq)]
struct ModelGroup<'a> {
    path: &'a str,
    models: Vec<&'a str>,
    fields: Vec<&'a str>,
}

/// Options of one level split into top-level models and remaining fields.
#[derive(Debug, PartialEq)]
struct Partition<'a> {
    models: Vec<ModelGroup<'a>>,
    fields: Vec<&'a str>,
}

/// Splits sorted option lists into top-level models (each carrying the
/// relative paths of its descendants) and the fields of the current level.
///
/// A path belongs to a model only if that model sorts before it, which the
/// sorted input guarantees for every true ancestor.
fn partition<'a>(as_fields: &[&'a str], as_models: &[&'a str]) -> Partition<'a> {
    let mut models: Vec<ModelGroup<'a>> = Vec::new();
    for &model in as_models {
        let parent = models
            .iter_mut()
            .find_map(|g| path::strip_ancestor(model, g.path).map(|rest| (g, rest)));
        match parent {
            Some((group, rest)) => group.models.push(rest),
            None => models.push(ModelGroup {
                path: model,
                models: Vec::new(),
                fields: Vec::new(),
            }),
        }
    }

    let mut fields = Vec::new();
    for &field in as_fields {
        let parent = models
            .iter_mut()
            .find_map(|g| path::strip_ancestor(field, g.path).map(|rest| (g, rest)));
        match parent {
            Some((group, rest)) => group.fields.push(rest),
            None => fields.push(field),
        }
    }

    Partition { models, fields }
}
