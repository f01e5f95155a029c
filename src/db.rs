//src/db.rs
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

// Extended result codes from sqlite3.h
const SQLITE_CONSTRAINT_FOREIGNKEY: i32 = 787;
const SQLITE_CONSTRAINT_UNIQUE: i32 = 2067;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub const DEFAULT_ROLE: &str = "user";
const SEEDED_ROLES: &[&str] = &["user", "admin"];

/// Shared exercise catalog, seeded on every `init_db`.
const CATALOG_SEED: &[(&str, &str)] = &[
    ("Supino Reto (Barra)", "Peito"),
    ("Supino Reto (Halteres)", "Peito"),
    ("Supino Inclinado (Barra)", "Peito"),
    ("Supino Inclinado (Halteres)", "Peito"),
    ("Supino Declinado (Barra)", "Peito"),
    ("Crucifixo (Halteres)", "Peito"),
    ("Crucifixo (Polia)", "Peito"),
    ("Peck Deck (Máquina)", "Peito"),
    ("Paralelas (Dips)", "Peito"),
    ("Flexão", "Peito"),
    ("Barra Fixa", "Costas"),
    ("Puxada Alta (Frontal)", "Costas"),
    ("Remada Curvada (Barra)", "Costas"),
    ("Remada Cavalinho", "Costas"),
    ("Remada Unilateral (Serrote)", "Costas"),
    ("Pulldown (Braços Estendidos)", "Costas"),
    ("Remada Sentada (Polia)", "Costas"),
    ("Agachamento Livre", "Pernas"),
    ("Leg Press 45°", "Pernas"),
    ("Afundo (Passada)", "Pernas"),
    ("Agachamento Búlgaro", "Pernas"),
    ("Cadeira Extensora", "Pernas"),
    ("Stiff (Romeno)", "Pernas"),
    ("Cadeira Flexora", "Pernas"),
    ("Mesa Flexora", "Pernas"),
    ("Elevação Pélvica", "Pernas"),
    ("Panturrilha em Pé (Gêmeos)", "Pernas"),
    ("Panturrilha Sentado (Sóleo)", "Pernas"),
    ("Desenvolvimento (Halteres)", "Ombros"),
    ("Desenvolvimento (Barra)", "Ombros"),
    ("Elevação Lateral (Halteres)", "Ombros"),
    ("Elevação Lateral (Polia)", "Ombros"),
    ("Elevação Frontal (Halteres)", "Ombros"),
    ("Crucifixo Invertido (Halteres)", "Ombros"),
    ("Crucifixo Invertido (Peck Deck)", "Ombros"),
    ("Remada Alta", "Ombros"),
    ("Rosca Direta (Barra)", "Bíceps"),
    ("Rosca Direta (Barra W)", "Bíceps"),
    ("Rosca Alternada (Halteres)", "Bíceps"),
    ("Rosca Scott", "Bíceps"),
    ("Rosca Concentrada", "Bíceps"),
    ("Tríceps Testa (Polia)", "Tríceps"),
    ("Tríceps Testa (Barra W)", "Tríceps"),
    ("Tríceps Corda (Polia)", "Tríceps"),
    ("Mergulho no Banco", "Tríceps"),
    ("Tríceps Francês (Halter)", "Tríceps"),
    ("Abdominal Supra", "Abdômen"),
    ("Abdominal Infra (na paralela)", "Abdômen"),
    ("Prancha", "Abdômen"),
    ("Elevação de Pernas", "Abdômen"),
];

type DefaultSheet = (&'static str, &'static [(&'static str, &'static str)]);

/// Sheets every user starts with: (title, [(catalog name, series spec)]).
pub const DEFAULT_SHEETS: &[DefaultSheet] = &[
    (
        "Treino A: Peito e Tríceps",
        &[
            ("Supino Reto (Barra)", "4x8-10"),
            ("Supino Inclinado (Halteres)", "3x10-12"),
            ("Paralelas (Dips)", "3x10-12"),
            ("Crucifixo (Polia)", "3x12-15"),
            ("Tríceps Testa (Polia)", "4x10-12"),
            ("Tríceps Corda (Polia)", "3x12-15"),
        ],
    ),
    (
        "Treino B: Quadríceps",
        &[
            ("Agachamento Livre", "4x8-10"),
            ("Leg Press 45°", "3x10-12"),
            ("Afundo (Passada)", "3x10-12 (por perna)"),
            ("Cadeira Extensora", "3x15"),
            ("Panturrilha em Pé (Gêmeos)", "4x15-20"),
            ("Panturrilha Sentado (Sóleo)", "3x15-20"),
        ],
    ),
    (
        "Treino C: Costas e Bíceps",
        &[
            ("Barra Fixa", "4x10-12 (ou falha)"),
            ("Remada Curvada (Barra)", "4x8-10"),
            ("Remada Unilateral (Serrote)", "3x10-12"),
            ("Pulldown (Braços Estendidos)", "3x12-15"),
            ("Rosca Direta (Barra W)", "4x10-12"),
            ("Rosca Alternada (Halteres)", "3x10-12"),
        ],
    ),
    (
        "Treino D: Ombro e Posterior",
        &[
            ("Desenvolvimento (Halteres)", "4x8-10"),
            ("Elevação Lateral (Halteres)", "4x12-15"),
            ("Crucifixo Invertido (Halteres)", "3x12-15"),
            ("Elevação Frontal (Halteres)", "3x10-12"),
            ("Stiff (Romeno)", "4x10-12"),
            ("Cadeira Flexora", "3x12-15"),
        ],
    ),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogExercise {
    pub id: i64,
    pub name: String,
    pub muscle_group: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkoutSheet {
    pub id: i64,
    pub owner_user_id: i64,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExerciseEntry {
    pub id: i64,
    pub sheet_id: i64,
    pub catalog_exercise_id: i64,
    pub exercise_name: String, // Populated by JOIN
    pub series_spec: String,
}

/// One row to insert through `replace_sheet`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NewEntry<'a> {
    pub catalog_exercise_id: i64,
    pub series_spec: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub is_verified: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Stored login material for one user, as needed by credential checks.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub user_id: i64,
    pub password_hash: String,
    pub is_active: bool,
}

/// Coarse classification of storage errors for callers deciding what to show.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    StorageFailure,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Database connection failed")]
    Connection(#[from] rusqlite::Error),
    #[error("Failed to get application data directory")]
    DataDir,
    #[error("I/O error accessing database file")]
    Io(#[from] std::io::Error),
    #[error("Database query failed: {0}")]
    QueryFailed(rusqlite::Error),
    #[error("Database update failed: {0}")]
    UpdateFailed(rusqlite::Error),
    #[error("Database insert failed: {0}")]
    InsertFailed(rusqlite::Error),
    #[error("Database delete failed: {0}")]
    DeleteFailed(rusqlite::Error),
    #[error("Database transaction failed: {0}")]
    TransactionFailed(rusqlite::Error),
    #[error("Workout sheet not found: ID {0}")]
    SheetNotFound(i64),
    #[error("Sheet entry not found: ID {0}")]
    EntryNotFound(i64),
    #[error("Catalog exercise not found: ID {0}")]
    CatalogExerciseNotFound(i64),
    #[error("User not found: ID {0}")]
    UserNotFound(i64),
    #[error("Username or email already registered: {0}")]
    UserAlreadyExists(String),
    #[error("Role '{0}' is missing from the roles table")]
    RoleMissing(String),
}

impl Error {
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::SheetNotFound(_)
            | Self::EntryNotFound(_)
            | Self::CatalogExerciseNotFound(_)
            | Self::UserNotFound(_) => ErrorKind::NotFound,
            Self::UserAlreadyExists(_) => ErrorKind::Conflict,
            _ => ErrorKind::StorageFailure,
        }
    }
}

fn extended_code(err: &rusqlite::Error) -> Option<i32> {
    match err {
        rusqlite::Error::SqliteFailure(ffi_err, _) => Some(ffi_err.extended_code),
        _ => None,
    }
}

/// Maps an entry insert/update failure, turning a dangling catalog reference into `CatalogExerciseNotFound`.
fn entry_write_error(err: rusqlite::Error, catalog_exercise_id: i64, insert: bool) -> Error {
    if extended_code(&err) == Some(SQLITE_CONSTRAINT_FOREIGNKEY) {
        return Error::CatalogExerciseNotFound(catalog_exercise_id);
    }
    if insert {
        Error::InsertFailed(err)
    } else {
        Error::UpdateFailed(err)
    }
}

pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    // Fixed width so stored timestamps compare correctly as text
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

const DB_FILE_NAME: &str = "gym_sheets.sqlite";
const APP_DATA_DIR: &str = "gym-sheets";

/// Gets the path to the SQLite database file within the app's data directory.
pub fn get_db_path() -> Result<PathBuf, Error> {
    let data_dir = dirs::data_dir().ok_or(Error::DataDir)?;
    let app_dir = data_dir.join(APP_DATA_DIR);
    if !app_dir.exists() {
        std::fs::create_dir_all(&app_dir)?;
    }
    Ok(app_dir.join(DB_FILE_NAME))
}

/// Opens a connection with foreign keys enforced and a busy timeout for competing writers.
pub fn open_db<P: AsRef<Path>>(path: P) -> Result<Connection, Error> {
    let conn = Connection::open(path).map_err(Error::Connection)?;
    conn.busy_timeout(BUSY_TIMEOUT).map_err(Error::Connection)?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")
        .map_err(Error::Connection)?;
    Ok(conn)
}

/// Creates the tables if they don't exist and seeds roles and the exercise catalog.
pub fn init_db(conn: &Connection) -> Result<(), Error> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")
        .map_err(Error::Connection)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users (
            user_id INTEGER PRIMARY KEY AUTOINCREMENT,
            username TEXT NOT NULL UNIQUE COLLATE NOCASE,
            email TEXT NOT NULL UNIQUE COLLATE NOCASE,
            password_hash TEXT NOT NULL,
            is_verified INTEGER NOT NULL DEFAULT 0,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL -- RFC3339, UTC
        )",
        [],
    )
    .map_err(Error::Connection)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS roles (
            role_id INTEGER PRIMARY KEY AUTOINCREMENT,
            role_name TEXT NOT NULL UNIQUE
        )",
        [],
    )
    .map_err(Error::Connection)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS user_roles (
            user_id INTEGER NOT NULL REFERENCES users(user_id),
            role_id INTEGER NOT NULL REFERENCES roles(role_id),
            PRIMARY KEY (user_id, role_id)
        )",
        [],
    )
    .map_err(Error::Connection)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS user_tokens (
            token_id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL REFERENCES users(user_id),
            token_hash TEXT NOT NULL UNIQUE, -- SHA-256 of the raw token, never the token itself
            token_type TEXT NOT NULL,
            created_at TEXT NOT NULL,
            expires_at TEXT NOT NULL
        )",
        [],
    )
    .map_err(Error::Connection)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS catalog_exercises (
            catalog_exercise_id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            muscle_group TEXT NOT NULL
        )",
        [],
    )
    .map_err(Error::Connection)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS workout_sheets (
            sheet_id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL REFERENCES users(user_id),
            title TEXT NOT NULL
        )",
        [],
    )
    .map_err(Error::Connection)?;

    // AUTOINCREMENT keeps ids monotonic, and id order is the sheet's display order
    conn.execute(
        "CREATE TABLE IF NOT EXISTS sheet_entries (
            entry_id INTEGER PRIMARY KEY AUTOINCREMENT,
            sheet_id INTEGER NOT NULL REFERENCES workout_sheets(sheet_id),
            catalog_exercise_id INTEGER NOT NULL REFERENCES catalog_exercises(catalog_exercise_id),
            series TEXT NOT NULL
        )",
        [],
    )
    .map_err(Error::Connection)?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_workout_sheets_user ON workout_sheets(user_id)",
        [],
    )
    .map_err(Error::Connection)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_sheet_entries_sheet ON sheet_entries(sheet_id)",
        [],
    )
    .map_err(Error::Connection)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_user_tokens_user ON user_tokens(user_id)",
        [],
    )
    .map_err(Error::Connection)?;

    seed_reference_data(conn)
}

fn seed_reference_data(conn: &Connection) -> Result<(), Error> {
    let tx = conn
        .unchecked_transaction()
        .map_err(Error::TransactionFailed)?;
    for role in SEEDED_ROLES {
        tx.execute(
            "INSERT OR IGNORE INTO roles (role_name) VALUES (?1)",
            params![role],
        )
        .map_err(Error::InsertFailed)?;
    }
    let mut seeded = 0;
    for (name, muscle_group) in CATALOG_SEED {
        seeded += tx
            .execute(
                "INSERT OR IGNORE INTO catalog_exercises (name, muscle_group) VALUES (?1, ?2)",
                params![name, muscle_group],
            )
            .map_err(Error::InsertFailed)?;
    }
    tx.commit().map_err(Error::TransactionFailed)?;
    if seeded > 0 {
        info!(count = seeded, "seeded exercise catalog");
    }
    Ok(())
}

// ---- Catalog ----

fn map_row_to_catalog_exercise(row: &Row) -> Result<CatalogExercise, rusqlite::Error> {
    Ok(CatalogExercise {
        id: row.get(0)?,
        name: row.get(1)?,
        muscle_group: row.get(2)?,
    })
}

/// Lists the whole catalog grouped by muscle group, groups and names in ascending order.
pub fn list_catalog(conn: &Connection) -> Result<BTreeMap<String, Vec<CatalogExercise>>, Error> {
    let mut stmt = conn
        .prepare(
            "SELECT catalog_exercise_id, name, muscle_group FROM catalog_exercises
             ORDER BY muscle_group ASC, name ASC",
        )
        .map_err(Error::QueryFailed)?;
    let rows = stmt
        .query_map([], map_row_to_catalog_exercise)
        .map_err(Error::QueryFailed)?;

    let mut grouped: BTreeMap<String, Vec<CatalogExercise>> = BTreeMap::new();
    for row in rows {
        let exercise = row.map_err(Error::QueryFailed)?;
        grouped
            .entry(exercise.muscle_group.clone())
            .or_default()
            .push(exercise);
    }
    Ok(grouped)
}

/// Lists one muscle group (case-insensitive match), ordered by name.
pub fn list_catalog_group(conn: &Connection, muscle_group: &str) -> Result<Vec<CatalogExercise>, Error> {
    let mut stmt = conn
        .prepare(
            "SELECT catalog_exercise_id, name, muscle_group FROM catalog_exercises
             WHERE muscle_group = ?1 COLLATE NOCASE ORDER BY name ASC",
        )
        .map_err(Error::QueryFailed)?;
    let rows = stmt
        .query_map(params![muscle_group], map_row_to_catalog_exercise)
        .map_err(Error::QueryFailed)?;
    rows.collect::<Result<Vec<_>, _>>()
        .map_err(Error::QueryFailed)
}

pub fn get_catalog_exercise(conn: &Connection, id: i64) -> Result<Option<CatalogExercise>, Error> {
    conn.query_row(
        "SELECT catalog_exercise_id, name, muscle_group FROM catalog_exercises
         WHERE catalog_exercise_id = ?1",
        params![id],
        map_row_to_catalog_exercise,
    )
    .optional()
    .map_err(Error::QueryFailed)
}

// ---- Workout sheets ----

fn map_row_to_sheet(row: &Row) -> Result<WorkoutSheet, rusqlite::Error> {
    Ok(WorkoutSheet {
        id: row.get(0)?,
        owner_user_id: row.get(1)?,
        title: row.get(2)?,
    })
}

fn query_sheets(conn: &Connection, user_id: i64) -> Result<Vec<WorkoutSheet>, Error> {
    let mut stmt = conn
        .prepare(
            "SELECT sheet_id, user_id, title FROM workout_sheets
             WHERE user_id = ?1 ORDER BY sheet_id ASC",
        )
        .map_err(Error::QueryFailed)?;
    let rows = stmt
        .query_map(params![user_id], map_row_to_sheet)
        .map_err(Error::QueryFailed)?;
    rows.collect::<Result<Vec<_>, _>>()
        .map_err(Error::QueryFailed)
}

fn user_exists(conn: &Connection, user_id: i64) -> Result<bool, Error> {
    conn.query_row(
        "SELECT 1 FROM users WHERE user_id = ?1",
        params![user_id],
        |_| Ok(()),
    )
    .optional()
    .map(|found| found.is_some())
    .map_err(Error::QueryFailed)
}

/// Inserts the `DEFAULT_SHEETS` for a user. Caller owns the transaction.
fn provision_default_sheets(conn: &Connection, user_id: i64) -> Result<usize, Error> {
    for &(title, exercises) in DEFAULT_SHEETS {
        conn.execute(
            "INSERT INTO workout_sheets (user_id, title) VALUES (?1, ?2)",
            params![user_id, title],
        )
        .map_err(Error::InsertFailed)?;
        let sheet_id = conn.last_insert_rowid();

        for &(exercise_name, series) in exercises {
            let catalog_id: Option<i64> = conn
                .query_row(
                    "SELECT catalog_exercise_id FROM catalog_exercises WHERE name = ?1",
                    params![exercise_name],
                    |row| row.get(0),
                )
                .optional()
                .map_err(Error::QueryFailed)?;
            match catalog_id {
                Some(catalog_id) => {
                    conn.execute(
                        "INSERT INTO sheet_entries (sheet_id, catalog_exercise_id, series) VALUES (?1, ?2, ?3)",
                        params![sheet_id, catalog_id, series],
                    )
                    .map_err(|e| entry_write_error(e, catalog_id, true))?;
                }
                None => warn!(exercise = exercise_name, "default sheet exercise missing from catalog, skipped"),
            }
        }
    }
    Ok(DEFAULT_SHEETS.len())
}

/// Lists a user's sheets in creation order, provisioning the default set when the user has none.
///
/// Provisioning runs in an IMMEDIATE transaction and re-counts under the write lock,
/// so racing callers on separate connections insert the defaults exactly once.
pub fn list_sheets(conn: &mut Connection, user_id: i64) -> Result<Vec<WorkoutSheet>, Error> {
    let existing = query_sheets(conn, user_id)?;
    if !existing.is_empty() {
        return Ok(existing);
    }

    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(Error::TransactionFailed)?;
    if !user_exists(&tx, user_id)? {
        return Err(Error::UserNotFound(user_id));
    }
    let count: i64 = tx
        .query_row(
            "SELECT COUNT(*) FROM workout_sheets WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )
        .map_err(Error::QueryFailed)?;
    if count == 0 {
        let created = provision_default_sheets(&tx, user_id)?;
        info!(user_id, sheets = created, "provisioned default workout sheets");
    }
    tx.commit().map_err(Error::TransactionFailed)?;

    query_sheets(conn, user_id)
}

pub fn get_sheet(conn: &Connection, sheet_id: i64) -> Result<WorkoutSheet, Error> {
    conn.query_row(
        "SELECT sheet_id, user_id, title FROM workout_sheets WHERE sheet_id = ?1",
        params![sheet_id],
        map_row_to_sheet,
    )
    .optional()
    .map_err(Error::QueryFailed)?
    .ok_or(Error::SheetNotFound(sheet_id))
}

/// Creates an empty sheet. Returns its ID.
pub fn create_sheet(conn: &Connection, user_id: i64, title: &str) -> Result<i64, Error> {
    if !user_exists(conn, user_id)? {
        return Err(Error::UserNotFound(user_id));
    }
    conn.execute(
        "INSERT INTO workout_sheets (user_id, title) VALUES (?1, ?2)",
        params![user_id, title],
    )
    .map_err(Error::InsertFailed)?;
    Ok(conn.last_insert_rowid())
}

/// Replaces a sheet's title and its whole entry list in one transaction.
///
/// Existing entries are deleted and `entries` inserted in the given order; any
/// failure rolls back and leaves the sheet as it was.
pub fn replace_sheet(
    conn: &mut Connection,
    sheet_id: i64,
    title: &str,
    entries: &[NewEntry],
) -> Result<(), Error> {
    let tx = conn.transaction().map_err(Error::TransactionFailed)?;

    let updated = tx
        .execute(
            "UPDATE workout_sheets SET title = ?1 WHERE sheet_id = ?2",
            params![title, sheet_id],
        )
        .map_err(Error::UpdateFailed)?;
    if updated == 0 {
        return Err(Error::SheetNotFound(sheet_id));
    }

    tx.execute(
        "DELETE FROM sheet_entries WHERE sheet_id = ?1",
        params![sheet_id],
    )
    .map_err(Error::DeleteFailed)?;

    {
        let mut stmt = tx
            .prepare("INSERT INTO sheet_entries (sheet_id, catalog_exercise_id, series) VALUES (?1, ?2, ?3)")
            .map_err(Error::InsertFailed)?;
        for entry in entries {
            stmt.execute(params![sheet_id, entry.catalog_exercise_id, entry.series_spec])
                .map_err(|e| entry_write_error(e, entry.catalog_exercise_id, true))?;
        }
    }

    tx.commit().map_err(Error::TransactionFailed)?;
    debug!(sheet_id, entries = entries.len(), "replaced sheet contents");
    Ok(())
}

// ---- Sheet entries ----

fn map_row_to_entry(row: &Row) -> Result<ExerciseEntry, rusqlite::Error> {
    Ok(ExerciseEntry {
        id: row.get(0)?,
        sheet_id: row.get(1)?,
        catalog_exercise_id: row.get(2)?,
        exercise_name: row.get(3)?,
        series_spec: row.get(4)?,
    })
}

/// Lists a sheet's entries in display order (ascending entry id).
pub fn get_entries(conn: &Connection, sheet_id: i64) -> Result<Vec<ExerciseEntry>, Error> {
    get_sheet(conn, sheet_id)?;
    query_entries(conn, sheet_id)
}

/// Like `get_entries` without the existence check: a missing sheet yields an empty list.
/// For callers that have already loaded the sheet.
pub fn query_entries(conn: &Connection, sheet_id: i64) -> Result<Vec<ExerciseEntry>, Error> {
    let mut stmt = conn
        .prepare(
            "SELECT se.entry_id, se.sheet_id, se.catalog_exercise_id, ce.name, se.series
             FROM sheet_entries se
             JOIN catalog_exercises ce ON se.catalog_exercise_id = ce.catalog_exercise_id
             WHERE se.sheet_id = ?1
             ORDER BY se.entry_id ASC",
        )
        .map_err(Error::QueryFailed)?;
    let rows = stmt
        .query_map(params![sheet_id], map_row_to_entry)
        .map_err(Error::QueryFailed)?;
    rows.collect::<Result<Vec<_>, _>>()
        .map_err(Error::QueryFailed)
}

pub fn get_entry(conn: &Connection, entry_id: i64) -> Result<ExerciseEntry, Error> {
    conn.query_row(
        "SELECT se.entry_id, se.sheet_id, se.catalog_exercise_id, ce.name, se.series
         FROM sheet_entries se
         JOIN catalog_exercises ce ON se.catalog_exercise_id = ce.catalog_exercise_id
         WHERE se.entry_id = ?1",
        params![entry_id],
        map_row_to_entry,
    )
    .optional()
    .map_err(Error::QueryFailed)?
    .ok_or(Error::EntryNotFound(entry_id))
}

/// Appends an entry to a sheet outside the buffered edit flow. Returns the new entry ID.
pub fn add_entry(
    conn: &Connection,
    sheet_id: i64,
    catalog_exercise_id: i64,
    series_spec: &str,
) -> Result<i64, Error> {
    get_sheet(conn, sheet_id)?;
    conn.execute(
        "INSERT INTO sheet_entries (sheet_id, catalog_exercise_id, series) VALUES (?1, ?2, ?3)",
        params![sheet_id, catalog_exercise_id, series_spec],
    )
    .map_err(|e| entry_write_error(e, catalog_exercise_id, true))?;
    Ok(conn.last_insert_rowid())
}

pub fn update_entry_series(conn: &Connection, entry_id: i64, series_spec: &str) -> Result<(), Error> {
    let rows_affected = conn
        .execute(
            "UPDATE sheet_entries SET series = ?1 WHERE entry_id = ?2",
            params![series_spec, entry_id],
        )
        .map_err(Error::UpdateFailed)?;
    if rows_affected == 0 {
        return Err(Error::EntryNotFound(entry_id));
    }
    Ok(())
}

/// Points an entry at a different catalog exercise, keeping its series and position.
pub fn replace_entry_exercise(
    conn: &Connection,
    entry_id: i64,
    catalog_exercise_id: i64,
) -> Result<(), Error> {
    let rows_affected = conn
        .execute(
            "UPDATE sheet_entries SET catalog_exercise_id = ?1 WHERE entry_id = ?2",
            params![catalog_exercise_id, entry_id],
        )
        .map_err(|e| entry_write_error(e, catalog_exercise_id, false))?;
    if rows_affected == 0 {
        return Err(Error::EntryNotFound(entry_id));
    }
    Ok(())
}

pub fn remove_entry(conn: &Connection, entry_id: i64) -> Result<(), Error> {
    let rows_affected = conn
        .execute(
            "DELETE FROM sheet_entries WHERE entry_id = ?1",
            params![entry_id],
        )
        .map_err(Error::DeleteFailed)?;
    if rows_affected == 0 {
        return Err(Error::EntryNotFound(entry_id));
    }
    Ok(())
}

// ---- Users and roles ----

/// Inserts a user, assigns the default role, and provisions default sheets in one transaction.
pub fn register_user(
    conn: &mut Connection,
    username: &str,
    email: &str,
    password_hash: &str,
) -> Result<i64, Error> {
    let tx = conn.transaction().map_err(Error::TransactionFailed)?;

    // Login accepts either column, so a value may not appear in either of them twice
    let taken: Option<i64> = tx
        .query_row(
            "SELECT user_id FROM users
             WHERE username IN (?1, ?2) OR email IN (?1, ?2)
             LIMIT 1",
            params![username, email],
            |row| row.get(0),
        )
        .optional()
        .map_err(Error::QueryFailed)?;
    if taken.is_some() {
        return Err(Error::UserAlreadyExists(username.to_string()));
    }

    tx.execute(
        "INSERT INTO users (username, email, password_hash, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![username, email, password_hash, format_timestamp(Utc::now())],
    )
    .map_err(|e| {
        if extended_code(&e) == Some(SQLITE_CONSTRAINT_UNIQUE) {
            Error::UserAlreadyExists(username.to_string())
        } else {
            Error::InsertFailed(e)
        }
    })?;
    let user_id = tx.last_insert_rowid();

    let role_id: i64 = tx
        .query_row(
            "SELECT role_id FROM roles WHERE role_name = ?1",
            params![DEFAULT_ROLE],
            |row| row.get(0),
        )
        .optional()
        .map_err(Error::QueryFailed)?
        .ok_or_else(|| Error::RoleMissing(DEFAULT_ROLE.to_string()))?;
    tx.execute(
        "INSERT INTO user_roles (user_id, role_id) VALUES (?1, ?2)",
        params![user_id, role_id],
    )
    .map_err(Error::InsertFailed)?;

    provision_default_sheets(&tx, user_id)?;

    tx.commit().map_err(Error::TransactionFailed)?;
    info!(user_id, "registered user");
    Ok(user_id)
}

fn map_row_to_user(row: &Row) -> Result<User, rusqlite::Error> {
    let created_at_str: String = row.get(5)?;
    let created_at = DateTime::parse_from_rfc3339(&created_at_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
        })?;
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        is_verified: row.get(3)?,
        is_active: row.get(4)?,
        created_at,
    })
}

pub fn get_user(conn: &Connection, user_id: i64) -> Result<User, Error> {
    conn.query_row(
        "SELECT user_id, username, email, is_verified, is_active, created_at
         FROM users WHERE user_id = ?1",
        params![user_id],
        map_row_to_user,
    )
    .optional()
    .map_err(Error::QueryFailed)?
    .ok_or(Error::UserNotFound(user_id))
}

/// Looks up stored credentials by username or email (case-insensitive).
pub fn find_credentials(conn: &Connection, identifier: &str) -> Result<Option<Credentials>, Error> {
    conn.query_row(
        "SELECT user_id, password_hash, is_active FROM users WHERE username = ?1 OR email = ?1",
        params![identifier],
        |row| {
            Ok(Credentials {
                user_id: row.get(0)?,
                password_hash: row.get(1)?,
                is_active: row.get(2)?,
            })
        },
    )
    .optional()
    .map_err(Error::QueryFailed)
}

pub fn list_user_roles(conn: &Connection, user_id: i64) -> Result<Vec<String>, Error> {
    let mut stmt = conn
        .prepare(
            "SELECT r.role_name FROM user_roles ur
             JOIN roles r ON ur.role_id = r.role_id
             WHERE ur.user_id = ?1 ORDER BY r.role_name ASC",
        )
        .map_err(Error::QueryFailed)?;
    let rows = stmt
        .query_map(params![user_id], |row| row.get(0))
        .map_err(Error::QueryFailed)?;
    rows.collect::<Result<Vec<String>, _>>()
        .map_err(Error::QueryFailed)
}

// ---- Auth tokens ----

pub fn insert_token(
    conn: &Connection,
    user_id: i64,
    token_hash: &str,
    token_type: &str,
    expires_at: DateTime<Utc>,
) -> Result<i64, Error> {
    if !user_exists(conn, user_id)? {
        return Err(Error::UserNotFound(user_id));
    }
    conn.execute(
        "INSERT INTO user_tokens (user_id, token_hash, token_type, created_at, expires_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            user_id,
            token_hash,
            token_type,
            format_timestamp(Utc::now()),
            format_timestamp(expires_at)
        ],
    )
    .map_err(Error::InsertFailed)?;
    Ok(conn.last_insert_rowid())
}

/// Returns the owner of an unexpired token of the given type.
pub fn find_token_owner(
    conn: &Connection,
    token_hash: &str,
    token_type: &str,
    now: DateTime<Utc>,
) -> Result<Option<i64>, Error> {
    conn.query_row(
        "SELECT user_id FROM user_tokens
         WHERE token_hash = ?1 AND token_type = ?2 AND expires_at > ?3",
        params![token_hash, token_type, format_timestamp(now)],
        |row| row.get(0),
    )
    .optional()
    .map_err(Error::QueryFailed)
}

pub fn delete_token(conn: &Connection, token_hash: &str) -> Result<usize, Error> {
    conn.execute(
        "DELETE FROM user_tokens WHERE token_hash = ?1",
        params![token_hash],
    )
    .map_err(Error::DeleteFailed)
}

pub fn purge_expired_tokens(conn: &Connection, now: DateTime<Utc>) -> Result<usize, Error> {
    conn.execute(
        "DELETE FROM user_tokens WHERE expires_at <= ?1",
        params![format_timestamp(now)],
    )
    .map_err(Error::DeleteFailed)
}
