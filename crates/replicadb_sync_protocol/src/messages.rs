//! Pages and batches returned by producers.

use crate::entry::{Cursor, Entry};
use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};

/// One page of a full snapshot.
///
/// The two variants make the cursor rules explicit: a page that announces
/// more pages must carry the cursor for the next one, and only the final
/// page may hand over a delta cursor.
#[derive(Debug, Clone, PartialEq)]
pub enum PullDumpResponse {
    /// More pages follow.
    More {
        /// Records on this page.
        entries: Vec<Entry>,
        /// Cursor to pass back as `previous_dump_state`.
        next_dump_state: Cursor,
    },
    /// This is the last page.
    Done {
        /// Records on this page.
        entries: Vec<Entry>,
        /// Cursor a subsequent delta should continue from.
        next_delta_state: Option<Cursor>,
    },
}

impl PullDumpResponse {
    /// Creates a page announcing more pages.
    #[must_use]
    pub fn more(entries: Vec<Entry>, next_dump_state: Cursor) -> Self {
        PullDumpResponse::More {
            entries,
            next_dump_state,
        }
    }

    /// Creates a final page.
    #[must_use]
    pub fn done(entries: Vec<Entry>, next_delta_state: Option<Cursor>) -> Self {
        PullDumpResponse::Done {
            entries,
            next_delta_state,
        }
    }

    /// Builds a page from the loose `{more, entries, nextDumpState, nextDeltaState}` shape.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MissingDumpState`] when `more` is set without a
    /// next dump state.
    pub fn from_parts(
        more: bool,
        entries: Vec<Entry>,
        next_dump_state: Option<Cursor>,
        next_delta_state: Option<Cursor>,
    ) -> ProtocolResult<Self> {
        if more {
            let next_dump_state = next_dump_state.ok_or(ProtocolError::MissingDumpState)?;
            Ok(Self::more(entries, next_dump_state))
        } else {
            Ok(Self::done(entries, next_delta_state))
        }
    }

    /// Returns true if more pages follow.
    pub fn has_more(&self) -> bool {
        matches!(self, PullDumpResponse::More { .. })
    }

    /// Returns the records on this page.
    pub fn entries(&self) -> &[Entry] {
        match self {
            PullDumpResponse::More { entries, .. } | PullDumpResponse::Done { entries, .. } => {
                entries
            }
        }
    }
}

/// One batch of an incremental pull.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullDeltaResponse {
    /// Whether another batch is immediately available.
    pub more: bool,
    /// Cursor to persist and pass back on the next call.
    pub next_delta_state: Cursor,
    /// Records created or updated since the previous cursor.
    pub new_or_updated_entries: Vec<Entry>,
    /// Predicate records of deleted rows.
    pub deleted_entries: Vec<Entry>,
}

impl PullDeltaResponse {
    /// Creates a delta batch.
    #[must_use]
    pub fn new(
        more: bool,
        next_delta_state: Cursor,
        new_or_updated_entries: Vec<Entry>,
        deleted_entries: Vec<Entry>,
    ) -> Self {
        Self {
            more,
            next_delta_state,
            new_or_updated_entries,
            deleted_entries,
        }
    }

    /// Creates a batch with no changes that keeps the cursor where it is.
    #[must_use]
    pub fn unchanged(cursor: Cursor) -> Self {
        Self::new(false, cursor, Vec::new(), Vec::new())
    }
}

/// A change set applied to the cache as one unit.
///
/// Pushed batches arrive from the producer at arbitrary times; pulled
/// delta responses are converted into this shape before being applied.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeltaBatch {
    /// Records created or updated.
    pub new_or_updated_entries: Vec<Entry>,
    /// Predicate records of deleted rows.
    pub deleted_entries: Vec<Entry>,
    /// Cursor to persist once the batch is applied.
    pub next_delta_state: Option<Cursor>,
}

impl DeltaBatch {
    /// Creates a batch.
    #[must_use]
    pub fn new(
        new_or_updated_entries: Vec<Entry>,
        deleted_entries: Vec<Entry>,
        next_delta_state: Option<Cursor>,
    ) -> Self {
        Self {
            new_or_updated_entries,
            deleted_entries,
            next_delta_state,
        }
    }

    /// Returns true if the batch carries no changes.
    pub fn is_empty(&self) -> bool {
        self.new_or_updated_entries.is_empty() && self.deleted_entries.is_empty()
    }

    /// Returns the number of entries in the batch.
    pub fn len(&self) -> usize {
        self.new_or_updated_entries.len() + self.deleted_entries.len()
    }

    /// Appends `other` after this batch.
    ///
    /// Entries are concatenated in order; the last non-null cursor wins.
    pub fn merge(&mut self, other: DeltaBatch) {
        self.new_or_updated_entries
            .extend(other.new_or_updated_entries);
        self.deleted_entries.extend(other.deleted_entries);
        if let Some(state) = other.next_delta_state.filter(|s| !s.is_null()) {
            self.next_delta_state = Some(state);
        }
    }
}

impl From<PullDeltaResponse> for DeltaBatch {
    fn from(response: PullDeltaResponse) -> Self {
        Self {
            new_or_updated_entries: response.new_or_updated_entries,
            deleted_entries: response.deleted_entries,
            next_delta_state: Some(response.next_delta_state),
        }
    }
}
