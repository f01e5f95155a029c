// src/cli.rs
use clap::{Command, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

#[derive(Parser, Debug)]
#[command(author, version, about = "Track and edit your gym workout sheets", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Print list output as CSV instead of a table
    #[arg(long, global = true)]
    pub export_csv: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create an account (comes with four default sheets)
    Register {
        #[arg(short, long)]
        username: String,
        #[arg(short, long)]
        email: String,
        #[arg(short, long)]
        password: String,
    },
    /// Log in with a username or email and remember the session
    Login {
        identifier: String,
        #[arg(short, long)]
        password: String,
    },
    Logout,
    /// Show the logged-in user
    Whoami,
    /// List your workout sheets
    Sheets,
    /// Show the exercises of one sheet
    Show {
        sheet_id: i64,
    },
    /// Create an empty sheet
    NewSheet {
        title: String,
    },
    /// List the exercise catalog
    Catalog {
        /// Only this muscle group (e.g. "Peito")
        #[arg(short, long)]
        group: Option<String>,
    },
    /// Edit a sheet interactively; nothing is stored until 'save'
    Edit {
        sheet_id: i64,
    },
    /// Change the series of one entry
    SetSeries {
        entry_id: i64,
        series: String,
    },
    /// Append a catalog exercise to a sheet
    AddEntry {
        sheet_id: i64,
        catalog_id: i64,
        /// Series spec (e.g. "4x8-10"); defaults to the configured default series
        #[arg(short, long)]
        series: Option<String>,
    },
    RemoveEntry {
        entry_id: i64,
    },
    /// Point an entry at a different catalog exercise
    ReplaceEntry {
        entry_id: i64,
        catalog_id: i64,
    },
    /// Set the series used when none is given
    SetDefaultSeries {
        series: String,
    },
    /// Set the table header colour (e.g. Green, DarkCyan)
    SetHeaderColor {
        color: String,
    },
    /// Show the path to the database file
    DbPath,
    /// Show the path to the config file
    ConfigPath,
    /// Print a shell completion script
    GenerateCompletion {
        #[arg(value_enum)]
        shell: Shell,
    },
}

pub fn parse_args() -> Cli {
    Cli::parse()
}

pub fn build_cli_command() -> Command {
    Cli::command()
}
