use anyhow::Result;
use chrono::Duration;
use gym_sheets_lib::db::{self, NewEntry};
use gym_sheets_lib::{
    AppService, Config, ConfigError, DbError, EditSession, ErrorKind, PickRequest,
};
use rusqlite::{params, Connection};
use tempfile::TempDir;

// In-memory database plus a throwaway config file for login tests
fn create_test_service() -> Result<(AppService, TempDir)> {
    let conn = Connection::open_in_memory()?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    db::init_db(&conn)?;
    let dir = tempfile::tempdir()?;
    let service = AppService {
        config: Config::default(),
        conn,
        db_path: ":memory:".into(),
        config_path: dir.path().join("config.toml"),
    };
    Ok((service, dir))
}

// A user row with no sheets, skipping registration's provisioning
fn insert_bare_user(conn: &Connection, username: &str) -> Result<i64> {
    conn.execute(
        "INSERT INTO users (username, email, password_hash, created_at) VALUES (?1, ?2, 'x$y', '2024-01-01T00:00:00Z')",
        params![username, format!("{username}@example.com")],
    )?;
    Ok(conn.last_insert_rowid())
}

fn catalog_id(conn: &Connection, name: &str) -> Result<i64> {
    Ok(conn.query_row(
        "SELECT catalog_exercise_id FROM catalog_exercises WHERE name = ?1",
        params![name],
        |row| row.get(0),
    )?)
}

#[test]
fn test_catalog_is_seeded_and_grouped() -> Result<()> {
    let (service, _dir) = create_test_service()?;
    let catalog = service.list_catalog()?;

    let groups: Vec<&str> = catalog.keys().map(String::as_str).collect();
    assert_eq!(
        groups,
        vec!["Abdômen", "Bíceps", "Costas", "Ombros", "Peito", "Pernas", "Tríceps"]
    );
    assert_eq!(catalog.values().map(Vec::len).sum::<usize>(), 50);
    assert_eq!(catalog["Peito"].len(), 10);
    assert_eq!(catalog["Pernas"].len(), 11);
    for exercises in catalog.values() {
        assert!(exercises.windows(2).all(|w| w[0].name <= w[1].name));
    }
    Ok(())
}

#[test]
fn test_init_db_is_idempotent() -> Result<()> {
    let (service, _dir) = create_test_service()?;
    db::init_db(&service.conn)?;
    db::init_db(&service.conn)?;
    let total: usize = service.list_catalog()?.values().map(Vec::len).sum();
    assert_eq!(total, 50);
    Ok(())
}

#[test]
fn test_catalog_group_and_lookup() -> Result<()> {
    let (service, _dir) = create_test_service()?;
    let biceps = service.list_catalog_group("bíceps")?;
    assert_eq!(biceps.len(), 5);
    assert!(biceps.iter().all(|e| e.muscle_group == "Bíceps"));

    let first = &biceps[0];
    let found = service.get_catalog_exercise(first.id)?;
    assert_eq!(found.as_ref(), Some(first));
    assert!(service.get_catalog_exercise(99_999)?.is_none());
    assert!(service.list_catalog_group("Antebraço")?.is_empty());
    Ok(())
}

#[test]
fn test_register_provisions_default_sheets() -> Result<()> {
    let (mut service, _dir) = create_test_service()?;
    let user_id = service.register_user("ana", "ana@example.com", "segredo")?;

    let sheets = service.list_sheets(user_id)?;
    let titles: Vec<&str> = sheets.iter().map(|s| s.title.as_str()).collect();
    assert_eq!(
        titles,
        vec![
            "Treino A: Peito e Tríceps",
            "Treino B: Quadríceps",
            "Treino C: Costas e Bíceps",
            "Treino D: Ombro e Posterior",
        ]
    );

    let entries = service.get_entries(user_id, sheets[0].id)?;
    assert_eq!(entries.len(), 6);
    assert_eq!(entries[0].exercise_name, "Supino Reto (Barra)");
    assert_eq!(entries[0].series_spec, "4x8-10");
    assert_eq!(entries[5].exercise_name, "Tríceps Corda (Polia)");
    assert!(entries.windows(2).all(|w| w[0].id < w[1].id));

    let legs = service.get_entries(user_id, sheets[1].id)?;
    assert_eq!(legs[2].series_spec, "3x10-12 (por perna)");

    assert_eq!(service.user_roles(user_id)?, vec!["user".to_string()]);
    Ok(())
}

#[test]
fn test_list_sheets_provisions_once() -> Result<()> {
    let (mut service, _dir) = create_test_service()?;
    let user_id = insert_bare_user(&service.conn, "bia")?;

    let first = service.list_sheets(user_id)?;
    let second = service.list_sheets(user_id)?;
    assert_eq!(first.len(), 4);
    assert_eq!(first, second);
    Ok(())
}

#[test]
fn test_list_sheets_unknown_user() -> Result<()> {
    let (mut service, _dir) = create_test_service()?;
    let err = service.list_sheets(404).unwrap_err();
    assert!(matches!(err.downcast_ref::<DbError>(), Some(DbError::UserNotFound(404))));

    let count: i64 = service
        .conn
        .query_row("SELECT COUNT(*) FROM workout_sheets", [], |row| row.get(0))?;
    assert_eq!(count, 0);
    Ok(())
}

#[test]
fn test_concurrent_first_listing_provisions_once() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("race.sqlite");
    let user_id = {
        let conn = db::open_db(&path)?;
        db::init_db(&conn)?;
        insert_bare_user(&conn, "caio")?
    };

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let path = path.clone();
            std::thread::spawn(move || -> Result<usize, DbError> {
                let mut conn = db::open_db(&path)?;
                Ok(db::list_sheets(&mut conn, user_id)?.len())
            })
        })
        .collect();
    for handle in handles {
        let listed = handle.join().expect("listing thread panicked")?;
        assert_eq!(listed, 4);
    }

    let conn = db::open_db(&path)?;
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM workout_sheets WHERE user_id = ?1",
        params![user_id],
        |row| row.get(0),
    )?;
    assert_eq!(count, 4);
    Ok(())
}

#[test]
fn test_register_conflicts() -> Result<()> {
    let (mut service, _dir) = create_test_service()?;
    service.register_user("ana", "ana@example.com", "segredo")?;

    let err = service
        .register_user("ANA", "outra@example.com", "x")
        .unwrap_err();
    let db_err = err.downcast_ref::<DbError>().expect("expected DbError");
    assert!(matches!(db_err, DbError::UserAlreadyExists(_)));
    assert_eq!(db_err.kind(), ErrorKind::Conflict);

    assert!(service
        .register_user("outra", "Ana@Example.com", "x")
        .is_err());
    // Login matches either column, so an existing email can't become a username
    assert!(service
        .register_user("ana@example.com", "nova@example.com", "x")
        .is_err());

    let err = service.register_user("  ", "a@b.c", "x").unwrap_err();
    assert!(err.to_string().contains("required"));

    let users: i64 = service
        .conn
        .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
    assert_eq!(users, 1);
    Ok(())
}

#[test]
fn test_register_rejects_identifier_used_in_other_column() -> Result<()> {
    let (mut service, _dir) = create_test_service()?;
    let alice = service.register_user("alice", "shared@x.io", "pw-a")?;

    // A new username equal to an existing email
    let err = service
        .register_user("Shared@X.io", "bob@x.io", "pw-b")
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<DbError>(),
        Some(DbError::UserAlreadyExists(_))
    ));
    // A new email equal to an existing username
    let err = service
        .register_user("carol", "ALICE", "pw-c")
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<DbError>(),
        Some(DbError::UserAlreadyExists(_))
    ));

    assert_eq!(service.verify_credentials("shared@x.io", "pw-a")?, Some(alice));
    assert_eq!(service.verify_credentials("shared@x.io", "pw-b")?, None);
    let users: i64 = service
        .conn
        .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
    assert_eq!(users, 1);
    Ok(())
}

#[test]
fn test_query_entries_skips_sheet_check() -> Result<()> {
    let (mut service, _dir) = create_test_service()?;
    let user_id = service.register_user("ana", "ana@example.com", "segredo")?;
    let sheet_id = service.list_sheets(user_id)?[0].id;

    assert_eq!(
        db::query_entries(&service.conn, sheet_id)?,
        db::get_entries(&service.conn, sheet_id)?
    );
    assert_eq!(service.get_entries(user_id, sheet_id)?.len(), 6);
    assert!(db::query_entries(&service.conn, 9_999)?.is_empty());
    assert!(matches!(
        db::get_entries(&service.conn, 9_999),
        Err(DbError::SheetNotFound(9_999))
    ));
    Ok(())
}

#[test]
fn test_verify_credentials() -> Result<()> {
    let (mut service, _dir) = create_test_service()?;
    let user_id = service.register_user("ana", "ana@example.com", "segredo")?;

    assert_eq!(service.verify_credentials("ana", "segredo")?, Some(user_id));
    assert_eq!(service.verify_credentials("ana@example.com", "segredo")?, Some(user_id));
    assert_eq!(service.verify_credentials("ana", "errada")?, None);
    assert_eq!(service.verify_credentials("ninguem", "segredo")?, None);

    service.conn.execute(
        "UPDATE users SET is_active = 0 WHERE user_id = ?1",
        params![user_id],
    )?;
    assert_eq!(service.verify_credentials("ana", "segredo")?, None);
    Ok(())
}

#[test]
fn test_login_logout_round_trip() -> Result<()> {
    let (mut service, _dir) = create_test_service()?;
    let user_id = service.register_user("ana", "ana@example.com", "segredo")?;

    let err = service.current_user_id().unwrap_err();
    assert!(matches!(err.downcast_ref::<ConfigError>(), Some(ConfigError::NotLoggedIn)));

    assert!(service.login("ana", "errada").is_err());
    assert_eq!(service.login("ana", "segredo")?, user_id);
    assert_eq!(service.current_user_id()?, user_id);

    // The token survives a reload of the config file
    let reloaded = gym_sheets_lib::load_config_util(&service.config_path)?;
    assert_eq!(reloaded.login_token, service.config.login_token);

    let token = service.config.login_token.clone().expect("token stored");
    assert!(service.logout()?);
    assert!(!service.logout()?);
    assert!(service.resolve_token(&token, "login")?.is_none());
    assert!(service.current_user_id().is_err());
    Ok(())
}

#[test]
fn test_token_expiry_and_revocation() -> Result<()> {
    let (mut service, _dir) = create_test_service()?;
    let user_id = service.register_user("ana", "ana@example.com", "segredo")?;

    let expired = service.issue_token(user_id, "login", Duration::seconds(-60))?;
    let valid = service.issue_token(user_id, "login", Duration::days(1))?;

    assert_eq!(service.resolve_token(&expired, "login")?, None);
    assert_eq!(service.resolve_token(&valid, "login")?, Some(user_id));
    assert_eq!(service.resolve_token(&valid, "verify")?, None);

    assert_eq!(service.purge_expired_tokens()?, 1);
    assert!(service.revoke_token(&valid)?);
    assert!(!service.revoke_token(&valid)?);
    assert_eq!(service.resolve_token(&valid, "login")?, None);

    assert!(service.issue_token(404, "login", Duration::days(1)).is_err());
    Ok(())
}

#[test]
fn test_replace_sheet_with_empty_list_clears() -> Result<()> {
    let (mut service, _dir) = create_test_service()?;
    let user_id = service.register_user("ana", "ana@example.com", "segredo")?;
    let sheet_id = service.list_sheets(user_id)?[0].id;

    db::replace_sheet(&mut service.conn, sheet_id, "Vazio", &[])?;
    assert!(service.get_entries(user_id, sheet_id)?.is_empty());
    assert_eq!(service.get_sheet(user_id, sheet_id)?.title, "Vazio");
    Ok(())
}

#[test]
fn test_replace_sheet_rolls_back_on_bad_reference() -> Result<()> {
    let (mut service, _dir) = create_test_service()?;
    let user_id = service.register_user("ana", "ana@example.com", "segredo")?;
    let sheet = service.list_sheets(user_id)?.remove(0);
    let before = service.get_entries(user_id, sheet.id)?;

    let prancha = catalog_id(&service.conn, "Prancha")?;
    let entries = [
        NewEntry {
            catalog_exercise_id: prancha,
            series_spec: "3x60s",
        },
        NewEntry {
            catalog_exercise_id: 99_999,
            series_spec: "3x10",
        },
    ];
    let err = db::replace_sheet(&mut service.conn, sheet.id, "Novo", &entries).unwrap_err();
    assert!(matches!(err, DbError::CatalogExerciseNotFound(99_999)));
    assert_eq!(err.kind(), ErrorKind::NotFound);

    assert_eq!(service.get_entries(user_id, sheet.id)?, before);
    assert_eq!(service.get_sheet(user_id, sheet.id)?.title, sheet.title);
    Ok(())
}

#[test]
fn test_replace_sheet_missing_sheet() -> Result<()> {
    let (mut service, _dir) = create_test_service()?;
    let err = db::replace_sheet(&mut service.conn, 77, "X", &[]).unwrap_err();
    assert!(matches!(err, DbError::SheetNotFound(77)));
    assert!(matches!(
        db::get_entries(&service.conn, 77),
        Err(DbError::SheetNotFound(77))
    ));
    Ok(())
}

#[test]
fn test_direct_entry_edits() -> Result<()> {
    let (mut service, _dir) = create_test_service()?;
    let user_id = service.register_user("ana", "ana@example.com", "segredo")?;
    let sheet_id = service.create_sheet(user_id, "  Extra  ")?;
    assert_eq!(service.get_sheet(user_id, sheet_id)?.title, "Extra");

    let prancha = catalog_id(&service.conn, "Prancha")?;
    let flexao = catalog_id(&service.conn, "Flexão")?;

    let entry_id = service.add_entry(user_id, sheet_id, prancha, None)?;
    let entry = db::get_entry(&service.conn, entry_id)?;
    assert_eq!(entry.series_spec, "3x10");
    assert_eq!(entry.exercise_name, "Prancha");

    service.update_entry_series(user_id, entry_id, "4x45s")?;
    service.replace_entry_exercise(user_id, entry_id, flexao)?;
    let entry = db::get_entry(&service.conn, entry_id)?;
    assert_eq!(entry.exercise_name, "Flexão");
    assert_eq!(entry.series_spec, "4x45s");

    let err = service.add_entry(user_id, sheet_id, 99_999, Some("1x1")).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<DbError>(),
        Some(DbError::CatalogExerciseNotFound(99_999))
    ));
    assert!(service.update_entry_series(user_id, entry_id, "  ").is_err());

    service.remove_entry(user_id, entry_id)?;
    let err = service.remove_entry(user_id, entry_id).unwrap_err();
    assert!(matches!(err.downcast_ref::<DbError>(), Some(DbError::EntryNotFound(_))));
    assert!(service.get_entries(user_id, sheet_id)?.is_empty());
    Ok(())
}

#[test]
fn test_add_entry_uses_configured_default_series() -> Result<()> {
    let (mut service, _dir) = create_test_service()?;
    let user_id = service.register_user("ana", "ana@example.com", "segredo")?;
    let sheet_id = service.create_sheet(user_id, "Extra")?;
    service.set_default_series("5x5")?;

    let prancha = catalog_id(&service.conn, "Prancha")?;
    let entry_id = service.add_entry(user_id, sheet_id, prancha, Some(" "))?;
    assert_eq!(db::get_entry(&service.conn, entry_id)?.series_spec, "5x5");

    assert!(matches!(
        service.set_default_series(""),
        Err(ConfigError::InvalidSeries)
    ));
    Ok(())
}

#[test]
fn test_other_users_sheets_are_hidden() -> Result<()> {
    let (mut service, _dir) = create_test_service()?;
    let ana = service.register_user("ana", "ana@example.com", "segredo")?;
    let bia = service.register_user("bia", "bia@example.com", "segredo")?;
    let ana_sheet = service.list_sheets(ana)?[0].id;
    let ana_entry = service.get_entries(ana, ana_sheet)?[0].id;

    let err = service.get_sheet(bia, ana_sheet).unwrap_err();
    assert!(matches!(err.downcast_ref::<DbError>(), Some(DbError::SheetNotFound(_))));
    assert!(service.get_entries(bia, ana_sheet).is_err());

    let err = service.update_entry_series(bia, ana_entry, "1x1").unwrap_err();
    assert!(matches!(err.downcast_ref::<DbError>(), Some(DbError::EntryNotFound(_))));
    assert!(service.remove_entry(bia, ana_entry).is_err());

    let mut session = EditSession::new(bia, ana_sheet);
    assert!(service.begin_edit(&mut session).is_err());
    assert!(!session.is_editing());
    Ok(())
}

#[test]
fn test_pick_exercise_applies_default_series() -> Result<()> {
    let (mut service, _dir) = create_test_service()?;
    let user_id = service.register_user("ana", "ana@example.com", "segredo")?;
    let sheet_id = service.create_sheet(user_id, "Extra")?;
    service.config.default_series = "4x12".to_string();
    let prancha = catalog_id(&service.conn, "Prancha")?;

    let mut session = EditSession::new(user_id, sheet_id);
    service.begin_edit(&mut session)?;
    service.pick_exercise(&mut session, PickRequest::add(), prancha)?;
    service.pick_exercise(&mut session, PickRequest::add().with_series("2x20"), prancha)?;
    service.save_edit(&mut session)?;

    let series: Vec<String> = service
        .get_entries(user_id, sheet_id)?
        .into_iter()
        .map(|e| e.series_spec)
        .collect();
    assert_eq!(series, vec!["4x12".to_string(), "2x20".to_string()]);
    Ok(())
}

#[test]
fn test_config_setters() -> Result<()> {
    let (mut service, _dir) = create_test_service()?;
    service.set_header_color("darkcyan")?;
    assert_eq!(service.config.theme.header_color, "DarkCyan");
    assert!(matches!(
        service.set_header_color("rainbow"),
        Err(ConfigError::InvalidColor(_))
    ));
    assert!(matches!(service.set_token_ttl(0), Err(ConfigError::InvalidTokenTtl(0))));
    service.set_token_ttl(7)?;

    let reloaded = gym_sheets_lib::load_config_util(&service.config_path)?;
    assert_eq!(reloaded.token_ttl_days, 7);
    assert_eq!(reloaded.theme.header_color, "DarkCyan");
    Ok(())
}
