//src/picker.rs
use crate::db::{self, CatalogExercise};
use crate::session::{EditSession, EntryRef, Error};
use rusqlite::Connection;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PickMode {
    Add,
    Replace(EntryRef),
}

/// An open catalog picker. Dropping it without calling `complete` is the "back" action.
#[must_use = "a pick request does nothing until completed"]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PickRequest {
    mode: PickMode,
    series_spec: Option<String>,
}

impl PickRequest {
    pub fn add() -> Self {
        Self {
            mode: PickMode::Add,
            series_spec: None,
        }
    }

    pub fn replace(target: EntryRef) -> Self {
        Self {
            mode: PickMode::Replace(target),
            series_spec: None,
        }
    }

    /// Series for an added entry. Ignored in replace mode.
    pub fn with_series(mut self, series_spec: impl Into<String>) -> Self {
        self.series_spec = Some(series_spec.into());
        self
    }

    /// Sets the series only if none was chosen yet.
    pub fn or_series(mut self, series_spec: &str) -> Self {
        if self.series_spec.is_none() {
            self.series_spec = Some(series_spec.to_string());
        }
        self
    }

    pub fn mode(&self) -> PickMode {
        self.mode
    }

    /// Resolves `catalog_exercise_id` and applies it to the session's buffer.
    ///
    /// Preconditions are checked before anything changes, so a failed completion
    /// leaves the buffer as it was.
    ///
    /// # Errors
    /// - `Error::NotEditing` if the session has no open buffer.
    /// - `Error::UnknownEntry` if the replace target is not in the buffer.
    /// - `Error::Storage(CatalogExerciseNotFound)` for an unknown selection.
    pub fn complete(
        self,
        session: &mut EditSession,
        conn: &Connection,
        catalog_exercise_id: i64,
    ) -> Result<CatalogExercise, Error> {
        let buffer = session.buffer_mut()?;
        if let PickMode::Replace(target) = self.mode {
            if !buffer.contains(target) {
                return Err(Error::UnknownEntry(target));
            }
        }
        let exercise = db::get_catalog_exercise(conn, catalog_exercise_id)?
            .ok_or(db::Error::CatalogExerciseNotFound(catalog_exercise_id))?;

        match self.mode {
            PickMode::Add => {
                let entry_ref =
                    buffer.add_entry(exercise.id, &exercise.name, self.series_spec.as_deref());
                debug!(%entry_ref, exercise = %exercise.name, "picked exercise added");
            }
            PickMode::Replace(target) => {
                buffer.replace_entry_catalog_ref(target, exercise.id, &exercise.name)?;
                debug!(entry_ref = %target, exercise = %exercise.name, "picked exercise replaced");
            }
        }
        Ok(exercise)
    }
}
