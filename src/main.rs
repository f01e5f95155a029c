//src/main.rs
mod cli;

use anyhow::{bail, Context, Result};
use comfy_table::{presets::UTF8_FULL, Attribute, Cell, Color, ContentArrangement, Table};
use std::io::{self, stdin, stdout, BufRead, Write};
use tracing_subscriber::EnvFilter;

use gym_sheets_lib::{
    AppService, CatalogExercise, DbError, EditBuffer, EditSession, EntryRef, ExerciseEntry,
    MoveDirection, PickRequest, WorkoutSheet,
};

fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli_args = cli::parse_args();
    let export_csv = cli_args.export_csv;

    if let cli::Commands::GenerateCompletion { shell } = cli_args.command {
        let mut cmd = cli::build_cli_command();
        let bin_name = cmd.get_name().to_string();
        eprintln!("Generating completion script for {shell}...");
        clap_complete::generate(shell, &mut cmd, bin_name, &mut stdout());
        return Ok(());
    }

    // Logging must be up before the service seeds or migrates anything
    let log_level = gym_sheets_lib::get_config_path_util()
        .ok()
        .and_then(|path| gym_sheets_lib::load_config_util(&path).ok())
        .map_or_else(|| "warn".to_string(), |config| config.log_level);
    init_tracing(&log_level);

    let mut service =
        AppService::initialize().context("Failed to initialize application service")?;
    let header_color = gym_sheets_lib::parse_color(&service.config.theme.header_color)
        .map(Color::from)
        .unwrap_or(Color::Green);

    match cli_args.command {
        cli::Commands::GenerateCompletion { .. } => {}
        // --- Accounts ---
        cli::Commands::Register {
            username,
            email,
            password,
        } => {
            let user_id = service
                .register_user(&username, &email, &password)
                .map_err(|e| anyhow::anyhow!("Error registering: {e}"))?;
            println!("Registered '{}' (user ID {user_id}).", username.trim());
            println!("Log in with: gym-sheets login {} --password <password>", username.trim());
        }
        cli::Commands::Login {
            identifier,
            password,
        } => {
            let user_id = service
                .login(&identifier, &password)
                .map_err(|e| anyhow::anyhow!("Error logging in: {e}"))?;
            let user = service.get_user(user_id)?;
            println!("Logged in as '{}'.", user.username);
        }
        cli::Commands::Logout => {
            if service.logout()? {
                println!("Logged out.");
            } else {
                println!("Not logged in.");
            }
        }
        cli::Commands::Whoami => {
            let user_id = service.current_user_id()?;
            let user = service.get_user(user_id)?;
            let roles = service.user_roles(user_id)?;
            println!("{} <{}> (ID {})", user.username, user.email, user.id);
            println!("Roles: {}", roles.join(", "));
            println!("Member since: {}", user.created_at.format("%Y-%m-%d"));
        }
        // --- Sheets ---
        cli::Commands::Sheets => {
            let user_id = service.current_user_id()?;
            let sheets = service.list_sheets(user_id)?;
            if export_csv {
                print_sheets_csv(&sheets)?;
            } else {
                print_sheets_table(&sheets, header_color);
            }
        }
        cli::Commands::Show { sheet_id } => {
            let user_id = service.current_user_id()?;
            let sheet = service.get_sheet(user_id, sheet_id)?;
            let entries = service.get_entries(user_id, sheet_id)?;
            if export_csv {
                print_entries_csv(&entries)?;
            } else {
                println!("{} (ID {})", sheet.title, sheet.id);
                if entries.is_empty() {
                    println!("No exercises yet. Add some with 'add-entry' or 'edit'.");
                } else {
                    print_entries_table(&entries, header_color);
                }
            }
        }
        cli::Commands::NewSheet { title } => {
            let user_id = service.current_user_id()?;
            let id = service.create_sheet(user_id, &title)?;
            println!("Created sheet '{}' (ID {id}).", title.trim());
        }
        cli::Commands::Catalog { group } => {
            let exercises: Vec<CatalogExercise> = match group {
                Some(group) => {
                    let found = service.list_catalog_group(&group)?;
                    if found.is_empty() {
                        println!("No exercises in muscle group '{group}'.");
                        return Ok(());
                    }
                    found
                }
                None => service.list_catalog()?.into_values().flatten().collect(),
            };
            if export_csv {
                print_catalog_csv(&exercises)?;
            } else {
                print_catalog_table(&exercises, header_color);
            }
        }
        cli::Commands::Edit { sheet_id } => {
            let user_id = service.current_user_id()?;
            run_edit_session(&mut service, user_id, sheet_id, header_color)?;
        }
        // --- Direct entry edits ---
        cli::Commands::SetSeries { entry_id, series } => {
            let user_id = service.current_user_id()?;
            service.update_entry_series(user_id, entry_id, &series)?;
            println!("Entry {entry_id} series set to '{}'.", series.trim());
        }
        cli::Commands::AddEntry {
            sheet_id,
            catalog_id,
            series,
        } => {
            let user_id = service.current_user_id()?;
            match service.add_entry(user_id, sheet_id, catalog_id, series.as_deref()) {
                Ok(id) => println!("Added entry {id} to sheet {sheet_id}."),
                Err(e) => {
                    if let Some(DbError::CatalogExerciseNotFound(id)) = e.downcast_ref::<DbError>() {
                        bail!("Catalog exercise {id} does not exist. See 'gym-sheets catalog'.");
                    }
                    bail!("Error adding entry: {e}");
                }
            }
        }
        cli::Commands::RemoveEntry { entry_id } => {
            let user_id = service.current_user_id()?;
            service.remove_entry(user_id, entry_id)?;
            println!("Removed entry {entry_id}.");
        }
        cli::Commands::ReplaceEntry {
            entry_id,
            catalog_id,
        } => {
            let user_id = service.current_user_id()?;
            service.replace_entry_exercise(user_id, entry_id, catalog_id)?;
            println!("Entry {entry_id} now uses catalog exercise {catalog_id}.");
        }
        // --- Config ---
        cli::Commands::SetDefaultSeries { series } => {
            service.set_default_series(&series)?;
            println!(
                "Default series set to '{}' in {:?}.",
                service.config.default_series,
                service.get_config_path()
            );
        }
        cli::Commands::SetHeaderColor { color } => {
            service.set_header_color(&color)?;
            println!("Header color set to {}.", service.config.theme.header_color);
        }
        cli::Commands::DbPath => {
            println!("Database file is located at: {:?}", service.get_db_path());
        }
        cli::Commands::ConfigPath => {
            println!("Config file is located at: {:?}", service.get_config_path());
        }
    }

    Ok(())
}

// --- Interactive editing ---

const EDIT_HELP: &str = "\
Commands (positions start at 1):
  show                     list the sheet being edited
  rename <title>           change the sheet title
  series <pos> <spec>      change the series of an entry
  up <pos> | down <pos>    move an entry
  rm <pos>                 remove an entry
  add <catalog_id> [spec]  append a catalog exercise
  replace <pos> <id>       swap an entry's exercise, keeping its series
  save                     store all changes and exit
  cancel                   discard all changes and exit
  help                     show this list";

fn parse_number<T: std::str::FromStr>(arg: Option<&str>, what: &str) -> Result<T> {
    let Some(raw) = arg else {
        bail!("Missing {what}.");
    };
    raw.parse()
        .map_err(|_| anyhow::anyhow!("Invalid {what}: '{raw}'"))
}

fn entry_at(buffer: &EditBuffer, pos: usize) -> Result<EntryRef> {
    pos.checked_sub(1)
        .and_then(|idx| buffer.entries().get(idx))
        .map(|draft| draft.entry_ref)
        .ok_or_else(|| anyhow::anyhow!("No entry at position {pos}."))
}

enum EditOutcome {
    Continue,
    Finished,
}

fn run_edit_session(
    service: &mut AppService,
    user_id: i64,
    sheet_id: i64,
    header_color: Color,
) -> Result<()> {
    let mut session = EditSession::new(user_id, sheet_id);
    service.begin_edit(&mut session)?;
    if let Some(buffer) = session.buffer() {
        print_buffer_table(buffer, header_color);
    }
    println!("Editing. Type 'help' for commands.");

    let stdin = stdin();
    let mut lines = stdin.lock().lines();
    loop {
        print!("edit> ");
        stdout().flush().context("Failed to flush stdout")?;
        let Some(line) = lines.next() else {
            // End of input
            service.cancel_edit(&mut session)?;
            println!("\nInput closed, changes discarded.");
            return Ok(());
        };
        let line = line.context("Failed to read input")?;
        match apply_edit_command(service, &mut session, line.trim(), header_color) {
            Ok(EditOutcome::Continue) => {}
            Ok(EditOutcome::Finished) => return Ok(()),
            // A failed save has already closed the buffer
            Err(e) if !session.is_editing() => return Err(e),
            Err(e) => println!("Error: {e}"),
        }
    }
}

fn apply_edit_command(
    service: &mut AppService,
    session: &mut EditSession,
    line: &str,
    header_color: Color,
) -> Result<EditOutcome> {
    let (command, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let rest = rest.trim();
    let mut args = rest.split_whitespace();

    match command {
        "" => {}
        "help" => println!("{EDIT_HELP}"),
        "show" => {
            if let Some(buffer) = session.buffer() {
                print_buffer_table(buffer, header_color);
            }
        }
        "rename" => {
            if rest.is_empty() {
                bail!("Usage: rename <title>");
            }
            session.buffer_mut()?.rename(rest);
            println!("Title set to '{rest}'.");
        }
        "series" => {
            let pos: usize = parse_number(args.next(), "position")?;
            let spec = args.collect::<Vec<_>>().join(" ");
            if spec.is_empty() {
                bail!("Usage: series <pos> <spec>");
            }
            let buffer = session.buffer_mut()?;
            let entry_ref = entry_at(buffer, pos)?;
            buffer.set_series(entry_ref, &spec)?;
        }
        "up" | "down" => {
            let pos: usize = parse_number(args.next(), "position")?;
            let direction = if command == "up" {
                MoveDirection::Up
            } else {
                MoveDirection::Down
            };
            let buffer = session.buffer_mut()?;
            let entry_ref = entry_at(buffer, pos)?;
            buffer.move_entry(entry_ref, direction)?;
            print_buffer_table(buffer, header_color);
        }
        "rm" => {
            let pos: usize = parse_number(args.next(), "position")?;
            let buffer = session.buffer_mut()?;
            let entry_ref = entry_at(buffer, pos)?;
            let removed = buffer.remove_entry(entry_ref)?;
            println!("Removed '{}'.", removed.display_name);
        }
        "add" => {
            let catalog_id: i64 = parse_number(args.next(), "catalog ID")?;
            let spec = args.collect::<Vec<_>>().join(" ");
            let mut request = PickRequest::add();
            if !spec.is_empty() {
                request = request.with_series(spec);
            }
            let exercise = service.pick_exercise(session, request, catalog_id)?;
            println!("Added '{}'.", exercise.name);
        }
        "replace" => {
            let pos: usize = parse_number(args.next(), "position")?;
            let catalog_id: i64 = parse_number(args.next(), "catalog ID")?;
            let target = entry_at(session.buffer_mut()?, pos)?;
            let exercise = service.pick_exercise(session, PickRequest::replace(target), catalog_id)?;
            println!("Position {pos} is now '{}'.", exercise.name);
        }
        "save" => {
            service.save_edit(session)?;
            println!("Sheet saved.");
            return Ok(EditOutcome::Finished);
        }
        "cancel" => {
            service.cancel_edit(session)?;
            println!("Changes discarded.");
            return Ok(EditOutcome::Finished);
        }
        other => println!("Unknown command '{other}'. Type 'help' for commands."),
    }
    Ok(EditOutcome::Continue)
}

// --- Output ---

fn header(labels: &[&str], header_color: Color) -> Vec<Cell> {
    labels
        .iter()
        .map(|label| Cell::new(label).fg(header_color).add_attribute(Attribute::Bold))
        .collect()
}

fn new_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

fn print_sheets_table(sheets: &[WorkoutSheet], header_color: Color) {
    let mut table = new_table();
    table.set_header(header(&["ID", "Title"], header_color));
    for sheet in sheets {
        table.add_row(vec![Cell::new(sheet.id), Cell::new(&sheet.title)]);
    }
    println!("{table}");
}

fn print_entries_table(entries: &[ExerciseEntry], header_color: Color) {
    let mut table = new_table();
    table.set_header(header(&["#", "Entry ID", "Exercise", "Series"], header_color));
    for (pos, entry) in entries.iter().enumerate() {
        table.add_row(vec![
            Cell::new(pos + 1),
            Cell::new(entry.id),
            Cell::new(&entry.exercise_name),
            Cell::new(&entry.series_spec),
        ]);
    }
    println!("{table}");
}

fn print_buffer_table(buffer: &EditBuffer, header_color: Color) {
    println!("{} (editing sheet {})", buffer.title(), buffer.sheet_id());
    if buffer.entries().is_empty() {
        println!("(no exercises)");
        return;
    }
    let mut table = new_table();
    table.set_header(header(&["#", "Ref", "Exercise", "Series"], header_color));
    for (pos, draft) in buffer.entries().iter().enumerate() {
        table.add_row(vec![
            Cell::new(pos + 1),
            Cell::new(draft.entry_ref),
            Cell::new(&draft.display_name),
            Cell::new(&draft.series_spec),
        ]);
    }
    println!("{table}");
}

fn print_catalog_table(exercises: &[CatalogExercise], header_color: Color) {
    let mut table = new_table();
    table.set_header(header(&["ID", "Exercise", "Muscle Group"], header_color));
    for exercise in exercises {
        table.add_row(vec![
            Cell::new(exercise.id),
            Cell::new(&exercise.name),
            Cell::new(&exercise.muscle_group),
        ]);
    }
    println!("{table}");
}

fn print_sheets_csv(sheets: &[WorkoutSheet]) -> Result<()> {
    let mut writer = csv::Writer::from_writer(io::stdout());
    writer.write_record(["id", "title"])?;
    for sheet in sheets {
        writer.write_record([sheet.id.to_string(), sheet.title.clone()])?;
    }
    writer.flush()?;
    Ok(())
}

fn print_entries_csv(entries: &[ExerciseEntry]) -> Result<()> {
    let mut writer = csv::Writer::from_writer(io::stdout());
    writer.write_record(["entry_id", "sheet_id", "catalog_exercise_id", "exercise", "series"])?;
    for entry in entries {
        writer.write_record([
            entry.id.to_string(),
            entry.sheet_id.to_string(),
            entry.catalog_exercise_id.to_string(),
            entry.exercise_name.clone(),
            entry.series_spec.clone(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

fn print_catalog_csv(exercises: &[CatalogExercise]) -> Result<()> {
    let mut writer = csv::Writer::from_writer(io::stdout());
    writer.write_record(["id", "name", "muscle_group"])?;
    for exercise in exercises {
        writer.write_record([
            exercise.id.to_string(),
            exercise.name.clone(),
            exercise.muscle_group.clone(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}
