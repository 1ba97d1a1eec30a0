//! Field and collection schemas.
//!
//! A collection schema is a tree: leaves become columns, objects nest,
//! arrays describe one element type. Flattening turns the tree into one
//! or more flat collections whose fields are all leaves or JSON columns.

mod collection;
mod field;

pub use collection::{element_fields, lookup, remove_path, CollectionSchema, VALUE_FIELD};
pub(crate) use collection::clear_primary_keys;
pub use field::{Field, FieldMap, LeafField, Reference};
