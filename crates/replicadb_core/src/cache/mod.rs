//! The physical cache: writing producer data and reading it back.

mod reader;
mod target;

pub use reader::{
    AggregateOperation, AggregateResult, Aggregation, CacheReader, CollectionReader,
};
pub use target::{ApplyStats, CacheTarget};
