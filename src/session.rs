//src/session.rs
use crate::db::{self, ExerciseEntry, NewEntry, WorkoutSheet};
use rusqlite::Connection;
use std::fmt;
use thiserror::Error;
use tracing::{debug, error, info};

pub const DEFAULT_SERIES_SPEC: &str = "3x10";

/// Identifies an entry inside an edit buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryRef {
    /// Entry already stored, by its entry ID.
    Persisted(i64),
    /// Entry added in this buffer, numbered from 1.
    Draft(u32),
}

impl fmt::Display for EntryRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Persisted(id) => write!(f, "#{id}"),
            Self::Draft(n) => write!(f, "new-{n}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveDirection {
    Up,
    Down,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("No edit in progress. Start editing the sheet first.")]
    NotEditing,
    #[error("Sheet ID {0} is already being edited in this session.")]
    AlreadyEditing(i64),
    #[error("Entry {0} is not part of the sheet being edited.")]
    UnknownEntry(EntryRef),
    #[error(transparent)]
    Storage(#[from] db::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryDraft {
    pub entry_ref: EntryRef,
    pub catalog_exercise_id: i64,
    pub display_name: String,
    pub series_spec: String,
}

/// Working copy of one sheet. Nothing here touches storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditBuffer {
    sheet_id: i64,
    title: String,
    entries: Vec<EntryDraft>,
    next_draft: u32,
}

impl EditBuffer {
    pub fn from_snapshot(sheet: &WorkoutSheet, entries: &[ExerciseEntry]) -> Self {
        Self {
            sheet_id: sheet.id,
            title: sheet.title.clone(),
            entries: entries
                .iter()
                .map(|e| EntryDraft {
                    entry_ref: EntryRef::Persisted(e.id),
                    catalog_exercise_id: e.catalog_exercise_id,
                    display_name: e.exercise_name.clone(),
                    series_spec: e.series_spec.clone(),
                })
                .collect(),
            next_draft: 1,
        }
    }

    pub fn sheet_id(&self) -> i64 {
        self.sheet_id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn entries(&self) -> &[EntryDraft] {
        &self.entries
    }

    fn position(&self, entry_ref: EntryRef) -> Result<usize, Error> {
        self.entries
            .iter()
            .position(|e| e.entry_ref == entry_ref)
            .ok_or(Error::UnknownEntry(entry_ref))
    }

    pub fn contains(&self, entry_ref: EntryRef) -> bool {
        self.entries.iter().any(|e| e.entry_ref == entry_ref)
    }

    pub fn rename(&mut self, title: &str) {
        debug!(sheet_id = self.sheet_id, title, "buffer rename");
        self.title = title.to_string();
    }

    pub fn set_series(&mut self, entry_ref: EntryRef, series_spec: &str) -> Result<(), Error> {
        let idx = self.position(entry_ref)?;
        self.entries[idx].series_spec = series_spec.to_string();
        debug!(sheet_id = self.sheet_id, %entry_ref, series_spec, "buffer set series");
        Ok(())
    }

    /// Swaps the entry with its neighbour. Moving past either end leaves the order as is.
    pub fn move_entry(&mut self, entry_ref: EntryRef, direction: MoveDirection) -> Result<(), Error> {
        let idx = self.position(entry_ref)?;
        let target = match direction {
            MoveDirection::Up => idx.checked_sub(1),
            MoveDirection::Down => Some(idx + 1).filter(|&i| i < self.entries.len()),
        };
        if let Some(target) = target {
            self.entries.swap(idx, target);
            debug!(sheet_id = self.sheet_id, %entry_ref, ?direction, "buffer move");
        }
        Ok(())
    }

    pub fn remove_entry(&mut self, entry_ref: EntryRef) -> Result<EntryDraft, Error> {
        let idx = self.position(entry_ref)?;
        debug!(sheet_id = self.sheet_id, %entry_ref, "buffer remove");
        Ok(self.entries.remove(idx))
    }

    /// Appends a new entry and returns its draft reference. `series_spec` falls back to `DEFAULT_SERIES_SPEC`.
    pub fn add_entry(
        &mut self,
        catalog_exercise_id: i64,
        display_name: &str,
        series_spec: Option<&str>,
    ) -> EntryRef {
        let entry_ref = EntryRef::Draft(self.next_draft);
        self.next_draft += 1;
        self.entries.push(EntryDraft {
            entry_ref,
            catalog_exercise_id,
            display_name: display_name.to_string(),
            series_spec: series_spec.unwrap_or(DEFAULT_SERIES_SPEC).to_string(),
        });
        debug!(sheet_id = self.sheet_id, %entry_ref, catalog_exercise_id, "buffer add");
        entry_ref
    }

    /// Changes which catalog exercise an entry points at. Series and position are kept.
    pub fn replace_entry_catalog_ref(
        &mut self,
        entry_ref: EntryRef,
        catalog_exercise_id: i64,
        display_name: &str,
    ) -> Result<(), Error> {
        let idx = self.position(entry_ref)?;
        let entry = &mut self.entries[idx];
        entry.catalog_exercise_id = catalog_exercise_id;
        entry.display_name = display_name.to_string();
        debug!(sheet_id = self.sheet_id, %entry_ref, catalog_exercise_id, "buffer replace");
        Ok(())
    }

    fn to_new_entries(&self) -> Vec<NewEntry<'_>> {
        self.entries
            .iter()
            .map(|e| NewEntry {
                catalog_exercise_id: e.catalog_exercise_id,
                series_spec: &e.series_spec,
            })
            .collect()
    }
}

#[derive(Debug)]
enum State {
    Viewing,
    Editing(EditBuffer),
}

/// Editing state for one (user, sheet) pair, owned by whoever drives the UI.
#[derive(Debug)]
pub struct EditSession {
    user_id: i64,
    sheet_id: i64,
    state: State,
}

impl EditSession {
    pub fn new(user_id: i64, sheet_id: i64) -> Self {
        Self {
            user_id,
            sheet_id,
            state: State::Viewing,
        }
    }

    pub fn user_id(&self) -> i64 {
        self.user_id
    }

    pub fn sheet_id(&self) -> i64 {
        self.sheet_id
    }

    pub fn is_editing(&self) -> bool {
        matches!(self.state, State::Editing(_))
    }

    pub fn buffer(&self) -> Option<&EditBuffer> {
        match &self.state {
            State::Editing(buffer) => Some(buffer),
            State::Viewing => None,
        }
    }

    /// # Errors
    /// - `Error::NotEditing` while viewing.
    pub fn buffer_mut(&mut self) -> Result<&mut EditBuffer, Error> {
        match &mut self.state {
            State::Editing(buffer) => Ok(buffer),
            State::Viewing => Err(Error::NotEditing),
        }
    }

    /// Snapshots the sheet and its entries into a fresh buffer.
    ///
    /// # Errors
    /// - `Error::AlreadyEditing` if a buffer is already open.
    /// - `Error::Storage(SheetNotFound)` if the sheet is missing or owned by someone else.
    pub fn begin(&mut self, conn: &Connection) -> Result<&mut EditBuffer, Error> {
        if self.is_editing() {
            return Err(Error::AlreadyEditing(self.sheet_id));
        }
        let sheet = db::get_sheet(conn, self.sheet_id)?;
        if sheet.owner_user_id != self.user_id {
            return Err(db::Error::SheetNotFound(self.sheet_id).into());
        }
        let entries = db::get_entries(conn, self.sheet_id)?;
        debug!(sheet_id = self.sheet_id, entries = entries.len(), "edit started");
        self.state = State::Editing(EditBuffer::from_snapshot(&sheet, &entries));
        self.buffer_mut()
    }

    /// Writes the buffer back as one replace-all. The session returns to viewing
    /// whether or not the write succeeds.
    ///
    /// # Errors
    /// - `Error::NotEditing` if no buffer is open.
    /// - `Error::Storage` if the write failed; storage is left unchanged.
    pub fn save(&mut self, conn: &mut Connection) -> Result<(), Error> {
        let buffer = match std::mem::replace(&mut self.state, State::Viewing) {
            State::Editing(buffer) => buffer,
            State::Viewing => return Err(Error::NotEditing),
        };
        let entries = buffer.to_new_entries();
        match db::replace_sheet(conn, buffer.sheet_id, &buffer.title, &entries) {
            Ok(()) => {
                info!(sheet_id = buffer.sheet_id, entries = entries.len(), "sheet saved");
                Ok(())
            }
            Err(e) => {
                error!(sheet_id = buffer.sheet_id, error = %e, "saving sheet failed, edits discarded");
                Err(e.into())
            }
        }
    }

    /// Drops the buffer, returning it to the caller. Storage is not touched.
    pub fn cancel(&mut self) -> Result<EditBuffer, Error> {
        match std::mem::replace(&mut self.state, State::Viewing) {
            State::Editing(buffer) => {
                debug!(sheet_id = buffer.sheet_id, "edit cancelled");
                Ok(buffer)
            }
            State::Viewing => Err(Error::NotEditing),
        }
    }
}
