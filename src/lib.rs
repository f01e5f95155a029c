// src/lib.rs
use anyhow::{bail, Context, Result};
use chrono::{Duration, Utc};
use rusqlite::Connection;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

// --- Declare modules ---
pub mod auth;
mod config;
pub mod db;
pub mod picker;
pub mod session;

// --- Expose public types ---
pub use config::{
    get_config_path as get_config_path_util, load_config as load_config_util, parse_color,
    save_config as save_config_util, Config, Error as ConfigError, StandardColor, Theme,
};
pub use db::{
    get_db_path as get_db_path_util, CatalogExercise, Error as DbError, ErrorKind, ExerciseEntry,
    User, WorkoutSheet,
};
pub use picker::{PickMode, PickRequest};
pub use session::{
    EditBuffer, EditSession, EntryDraft, EntryRef, Error as SessionError, MoveDirection,
    DEFAULT_SERIES_SPEC,
};

pub struct AppService {
    pub config: Config,
    pub conn: Connection,
    pub db_path: PathBuf,
    pub config_path: PathBuf,
}

/// Maps storage errors whose message already says everything straight through, and adds context to the rest.
fn storage_error(err: DbError, context: impl FnOnce() -> String) -> anyhow::Error {
    match err.kind() {
        ErrorKind::NotFound | ErrorKind::Conflict => anyhow::anyhow!(err),
        ErrorKind::StorageFailure => anyhow::Error::new(err).context(context()),
    }
}

fn session_error(err: SessionError, context: impl FnOnce() -> String) -> anyhow::Error {
    match err {
        SessionError::Storage(db_err) => storage_error(db_err, context),
        other => anyhow::anyhow!(other),
    }
}

impl AppService {
    /// Initializes the application service.
    /// # Errors
    /// Returns `anyhow::Error` if config/db path determination, loading, or initialization fails.
    pub fn initialize() -> Result<Self> {
        let config_path =
            config::get_config_path().context("Failed to determine configuration file path")?;
        let config = config::load_config(&config_path)
            .with_context(|| format!("Failed to load config from {config_path:?}"))?;

        let db_path = match &config.database_path {
            Some(path) => path.clone(),
            None => db::get_db_path().context("Failed to determine database path")?,
        };
        let conn = db::open_db(&db_path)
            .with_context(|| format!("Failed to open database at {db_path:?}"))?;

        db::init_db(&conn).context("Failed to initialize database schema")?;
        let purged = db::purge_expired_tokens(&conn, Utc::now())
            .context("Failed to purge expired tokens")?;
        if purged > 0 {
            debug!(purged, "removed expired tokens");
        }

        Ok(Self {
            config,
            conn,
            db_path,
            config_path,
        })
    }

    pub fn get_config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn get_db_path(&self) -> &Path {
        &self.db_path
    }

    /// Saves the current configuration state.
    /// # Errors
    /// Returns `ConfigError` if saving fails.
    pub fn save_config(&self) -> Result<(), ConfigError> {
        config::save_config(&self.config_path, &self.config)
    }

    /// Sets the series used for exercises added without one.
    /// # Errors
    /// - `ConfigError::InvalidSeries` if `spec` is blank.
    /// - `ConfigError` variants if saving fails.
    pub fn set_default_series(&mut self, spec: &str) -> Result<(), ConfigError> {
        let trimmed = spec.trim();
        if trimmed.is_empty() {
            return Err(ConfigError::InvalidSeries);
        }
        self.config.default_series = trimmed.to_string();
        self.save_config()
    }

    /// # Errors
    /// - `ConfigError::InvalidColor` for an unknown colour name.
    pub fn set_header_color(&mut self, color: &str) -> Result<(), ConfigError> {
        let parsed = parse_color(color)?;
        self.config.theme.header_color = format!("{parsed:?}");
        self.save_config()
    }

    /// # Errors
    /// - `ConfigError::InvalidTokenTtl` if `days` is 0.
    pub fn set_token_ttl(&mut self, days: u32) -> Result<(), ConfigError> {
        if days == 0 {
            return Err(ConfigError::InvalidTokenTtl(days));
        }
        self.config.token_ttl_days = days;
        self.save_config()
    }

    // --- Accounts ---

    /// Registers a user with role `user` and the default sheets.
    /// # Errors
    /// Returns `anyhow::Error` if a field is empty, the username or email is taken, or storage fails.
    pub fn register_user(&mut self, username: &str, email: &str, password: &str) -> Result<i64> {
        let username = username.trim();
        let email = email.trim();
        if username.is_empty() || email.is_empty() || password.is_empty() {
            bail!("Username, email and password are all required.");
        }
        let password_hash = auth::hash_password(password);
        db::register_user(&mut self.conn, username, email, &password_hash)
            .map_err(|e| storage_error(e, || format!("Failed to register user '{username}'")))
    }

    /// Returns the user ID when `identifier` (username or email) and `password` match an active account.
    /// # Errors
    /// Returns `anyhow::Error` only if the lookup itself fails.
    pub fn verify_credentials(&self, identifier: &str, password: &str) -> Result<Option<i64>> {
        let identifier = identifier.trim();
        if identifier.is_empty() {
            return Ok(None);
        }
        let creds = db::find_credentials(&self.conn, identifier)
            .context("Failed to look up credentials")?;
        Ok(creds.and_then(|c| {
            if !c.is_active {
                warn!(user_id = c.user_id, "login attempt for inactive user");
                None
            } else if auth::verify_password(password, &c.password_hash) {
                Some(c.user_id)
            } else {
                None
            }
        }))
    }

    /// Issues a token and returns the raw value. Only its hash is stored.
    /// # Errors
    /// Returns `anyhow::Error` if the user doesn't exist or the insert fails.
    pub fn issue_token(&self, user_id: i64, token_type: &str, ttl: Duration) -> Result<String> {
        let token = auth::generate_token();
        db::insert_token(
            &self.conn,
            user_id,
            &auth::hash_token(&token),
            token_type,
            Utc::now() + ttl,
        )
        .map_err(|e| storage_error(e, || format!("Failed to issue token for user {user_id}")))?;
        Ok(token)
    }

    /// Returns the owner of an unexpired token.
    /// # Errors
    /// Returns `anyhow::Error` if the lookup fails.
    pub fn resolve_token(&self, token: &str, token_type: &str) -> Result<Option<i64>> {
        db::find_token_owner(&self.conn, &auth::hash_token(token), token_type, Utc::now())
            .context("Failed to resolve token")
    }

    /// Returns whether a token was removed.
    /// # Errors
    /// Returns `anyhow::Error` if the delete fails.
    pub fn revoke_token(&self, token: &str) -> Result<bool> {
        let removed = db::delete_token(&self.conn, &auth::hash_token(token))
            .context("Failed to revoke token")?;
        Ok(removed > 0)
    }

    /// # Errors
    /// Returns `anyhow::Error` if the delete fails.
    pub fn purge_expired_tokens(&self) -> Result<usize> {
        db::purge_expired_tokens(&self.conn, Utc::now()).context("Failed to purge expired tokens")
    }

    /// Verifies credentials, then stores a fresh login token in the config.
    /// # Errors
    /// Returns `anyhow::Error` for bad credentials or if the token or config can't be written.
    pub fn login(&mut self, identifier: &str, password: &str) -> Result<i64> {
        let Some(user_id) = self.verify_credentials(identifier, password)? else {
            bail!("Invalid username/email or password.");
        };
        let ttl = Duration::days(i64::from(self.config.token_ttl_days));
        let token = self.issue_token(user_id, auth::LOGIN_TOKEN, ttl)?;
        if let Some(previous) = self.config.login_token.replace(token) {
            self.revoke_token(&previous)?;
        }
        self.save_config().context("Failed to save login token")?;
        info!(user_id, "logged in");
        Ok(user_id)
    }

    /// Revokes and forgets the stored login token. Returns false if nobody was logged in.
    /// # Errors
    /// Returns `anyhow::Error` if the revoke or config save fails.
    pub fn logout(&mut self) -> Result<bool> {
        let Some(token) = self.config.login_token.take() else {
            return Ok(false);
        };
        self.revoke_token(&token)?;
        self.save_config().context("Failed to clear login token")?;
        Ok(true)
    }

    /// The user behind the stored login token.
    /// # Errors
    /// - `ConfigError::NotLoggedIn` if there's no token or it no longer resolves.
    pub fn current_user_id(&self) -> Result<i64> {
        let token = self
            .config
            .login_token
            .as_deref()
            .ok_or(ConfigError::NotLoggedIn)?;
        match self.resolve_token(token, auth::LOGIN_TOKEN)? {
            Some(user_id) => Ok(user_id),
            None => bail!(ConfigError::NotLoggedIn),
        }
    }

    /// # Errors
    /// Returns `anyhow::Error` if the user doesn't exist or the query fails.
    pub fn get_user(&self, user_id: i64) -> Result<User> {
        db::get_user(&self.conn, user_id)
            .map_err(|e| storage_error(e, || format!("Failed to load user {user_id}")))
    }

    /// # Errors
    /// Returns `anyhow::Error` if the query fails.
    pub fn user_roles(&self, user_id: i64) -> Result<Vec<String>> {
        db::list_user_roles(&self.conn, user_id)
            .with_context(|| format!("Failed to list roles for user {user_id}"))
    }

    // --- Catalog ---

    /// # Errors
    /// Returns `anyhow::Error` if the query fails.
    pub fn list_catalog(&self) -> Result<BTreeMap<String, Vec<CatalogExercise>>> {
        db::list_catalog(&self.conn).context("Failed to list exercise catalog")
    }

    /// # Errors
    /// Returns `anyhow::Error` if the query fails.
    pub fn list_catalog_group(&self, muscle_group: &str) -> Result<Vec<CatalogExercise>> {
        db::list_catalog_group(&self.conn, muscle_group.trim())
            .with_context(|| format!("Failed to list catalog group '{muscle_group}'"))
    }

    /// # Errors
    /// Returns `anyhow::Error` if the query fails.
    pub fn get_catalog_exercise(&self, id: i64) -> Result<Option<CatalogExercise>> {
        db::get_catalog_exercise(&self.conn, id)
            .with_context(|| format!("Failed to look up catalog exercise {id}"))
    }

    // --- Sheets ---

    /// Lists the user's sheets, provisioning the defaults for a user with none.
    /// # Errors
    /// Returns `anyhow::Error` if the user doesn't exist or storage fails.
    pub fn list_sheets(&mut self, user_id: i64) -> Result<Vec<WorkoutSheet>> {
        db::list_sheets(&mut self.conn, user_id)
            .map_err(|e| storage_error(e, || format!("Failed to list sheets for user {user_id}")))
    }

    /// Loads a sheet, treating someone else's sheet as missing.
    /// # Errors
    /// Returns `DbError::SheetNotFound` (wrapped) if the sheet is missing or not owned by `user_id`.
    pub fn get_sheet(&self, user_id: i64, sheet_id: i64) -> Result<WorkoutSheet> {
        let sheet = db::get_sheet(&self.conn, sheet_id)
            .map_err(|e| storage_error(e, || format!("Failed to load sheet {sheet_id}")))?;
        if sheet.owner_user_id != user_id {
            bail!(DbError::SheetNotFound(sheet_id));
        }
        Ok(sheet)
    }

    /// # Errors
    /// Returns `anyhow::Error` if the sheet is missing, not owned, or the query fails.
    pub fn get_entries(&self, user_id: i64, sheet_id: i64) -> Result<Vec<ExerciseEntry>> {
        self.get_sheet(user_id, sheet_id)?;
        db::query_entries(&self.conn, sheet_id)
            .map_err(|e| storage_error(e, || format!("Failed to load entries of sheet {sheet_id}")))
    }

    /// # Errors
    /// Returns `anyhow::Error` if the title is empty or the insert fails.
    pub fn create_sheet(&self, user_id: i64, title: &str) -> Result<i64> {
        let title = title.trim();
        if title.is_empty() {
            bail!("Sheet title cannot be empty.");
        }
        db::create_sheet(&self.conn, user_id, title)
            .map_err(|e| storage_error(e, || format!("Failed to create sheet '{title}'")))
    }

    // --- Direct entry edits ---

    /// Loads an entry and checks its sheet belongs to `user_id`; otherwise `EntryNotFound`.
    fn owned_entry(&self, user_id: i64, entry_id: i64) -> Result<ExerciseEntry> {
        let entry = db::get_entry(&self.conn, entry_id)
            .map_err(|e| storage_error(e, || format!("Failed to load entry {entry_id}")))?;
        let sheet = db::get_sheet(&self.conn, entry.sheet_id)
            .map_err(|e| storage_error(e, || format!("Failed to load sheet {}", entry.sheet_id)))?;
        if sheet.owner_user_id != user_id {
            bail!(DbError::EntryNotFound(entry_id));
        }
        Ok(entry)
    }

    /// # Errors
    /// Returns `anyhow::Error` if the series is empty, the entry is missing or not owned, or the update fails.
    pub fn update_entry_series(&self, user_id: i64, entry_id: i64, series_spec: &str) -> Result<()> {
        let series_spec = series_spec.trim();
        if series_spec.is_empty() {
            bail!(ConfigError::InvalidSeries);
        }
        self.owned_entry(user_id, entry_id)?;
        db::update_entry_series(&self.conn, entry_id, series_spec)
            .map_err(|e| storage_error(e, || format!("Failed to update entry {entry_id}")))
    }

    /// Appends an entry to a sheet; the configured default series is used when `series_spec` is `None`.
    /// # Errors
    /// Returns `anyhow::Error` if the sheet or catalog exercise is missing, or the insert fails.
    pub fn add_entry(
        &self,
        user_id: i64,
        sheet_id: i64,
        catalog_exercise_id: i64,
        series_spec: Option<&str>,
    ) -> Result<i64> {
        self.get_sheet(user_id, sheet_id)?;
        let series_spec = series_spec
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(self.config.default_series.as_str());
        db::add_entry(&self.conn, sheet_id, catalog_exercise_id, series_spec)
            .map_err(|e| storage_error(e, || format!("Failed to add entry to sheet {sheet_id}")))
    }

    /// # Errors
    /// Returns `anyhow::Error` if the entry is missing or not owned, or the delete fails.
    pub fn remove_entry(&self, user_id: i64, entry_id: i64) -> Result<()> {
        self.owned_entry(user_id, entry_id)?;
        db::remove_entry(&self.conn, entry_id)
            .map_err(|e| storage_error(e, || format!("Failed to remove entry {entry_id}")))
    }

    /// # Errors
    /// Returns `anyhow::Error` if the entry or catalog exercise is missing, or the update fails.
    pub fn replace_entry_exercise(
        &self,
        user_id: i64,
        entry_id: i64,
        catalog_exercise_id: i64,
    ) -> Result<()> {
        self.owned_entry(user_id, entry_id)?;
        db::replace_entry_exercise(&self.conn, entry_id, catalog_exercise_id)
            .map_err(|e| storage_error(e, || format!("Failed to replace exercise of entry {entry_id}")))
    }

    // --- Edit sessions ---

    /// Opens `session`'s sheet for editing.
    /// # Errors
    /// Returns `anyhow::Error` wrapping `SessionError::AlreadyEditing` or a storage error.
    pub fn begin_edit<'s>(&self, session: &'s mut EditSession) -> Result<&'s mut EditBuffer> {
        let sheet_id = session.sheet_id();
        session
            .begin(&self.conn)
            .map_err(|e| session_error(e, || format!("Failed to start editing sheet {sheet_id}")))
    }

    /// Completes a catalog pick into the session's buffer, with the configured default series.
    /// # Errors
    /// Returns `anyhow::Error` wrapping `SessionError` for a missing buffer, unknown target, or unknown exercise.
    pub fn pick_exercise(
        &self,
        session: &mut EditSession,
        request: PickRequest,
        catalog_exercise_id: i64,
    ) -> Result<CatalogExercise> {
        request
            .or_series(&self.config.default_series)
            .complete(session, &self.conn, catalog_exercise_id)
            .map_err(|e| {
                session_error(e, || {
                    format!("Failed to pick catalog exercise {catalog_exercise_id}")
                })
            })
    }

    /// Commits the session's buffer. The session is back in viewing afterwards either way.
    /// # Errors
    /// Returns `anyhow::Error` wrapping `SessionError` if nothing was being edited or the commit failed.
    pub fn save_edit(&mut self, session: &mut EditSession) -> Result<()> {
        let sheet_id = session.sheet_id();
        session
            .save(&mut self.conn)
            .map_err(|e| session_error(e, || format!("Failed to save sheet {sheet_id}")))
    }

    /// # Errors
    /// Returns `anyhow::Error` wrapping `SessionError::NotEditing` if nothing was being edited.
    pub fn cancel_edit(&self, session: &mut EditSession) -> Result<EditBuffer> {
        session.cancel().map_err(anyhow::Error::new)
    }
}
