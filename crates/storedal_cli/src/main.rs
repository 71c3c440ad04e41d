//! Command-line front end for a category store.
//!
//! # Responsibility
//! - Exercise the repository contract against a SQLite file from a shell.
//! - Report conflicts with the ids and versions needed to retry by hand.
//!
//! Usage: `storedal_cli <db_path> list | add <name> | rename <id> <name> | delete <id> <version_hex>`
//!
//! Exit codes: 2 usage, 3 conflict, 4 not found, 1 any other failure.

use std::process::ExitCode;
use storedal_core::db::open_db;
use storedal_core::{
    core_version, init_logging, Category, CategoryRepository, EntityId, ExecutionStrategy,
    LogTarget, RepoError, Repository, RowVersion,
};

const USAGE: &str =
    "usage: storedal_cli <db_path> list | add <name> | rename <id> <name> | delete <id> <version_hex>";

const NOT_FOUND_EXIT_CODE: u8 = 4;

enum Command {
    List,
    Add(String),
    Rename(EntityId, String),
    Delete(EntityId, RowVersion),
}

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.is_empty() {
        println!("storedal_core ping={}", storedal_core::ping());
        println!("storedal_core version={}", core_version());
        return ExitCode::SUCCESS;
    }

    if let Err(err) = init_logging("warn", LogTarget::Stderr) {
        eprintln!("logging disabled: {err}");
    }

    let (path, command) = match parse_args(&args) {
        Ok(parsed) => parsed,
        Err(message) => {
            eprintln!("{message}\n{USAGE}");
            return ExitCode::from(2);
        }
    };

    match run(path, command) {
        Ok(code) => code,
        Err(RepoError::Concurrency(conflict)) => {
            for entry in &conflict.entries {
                let current = entry
                    .current_version
                    .as_ref()
                    .map_or_else(|| "gone".to_string(), RowVersion::to_string);
                eprintln!("conflict: id={} current_version={current}", entry.id);
            }
            ExitCode::from(3)
        }
        Err(err) => {
            eprintln!("error[{}]: {err}", err.code());
            ExitCode::FAILURE
        }
    }
}

fn parse_args(args: &[String]) -> Result<(&str, Command), String> {
    let path = args[0].as_str();
    let rest: Vec<&str> = args[1..].iter().map(String::as_str).collect();
    let command = match rest.as_slice() {
        ["list"] => Command::List,
        ["add", name] => Command::Add((*name).to_string()),
        ["rename", id, name] => Command::Rename(parse_id(id)?, (*name).to_string()),
        ["delete", id, version] => Command::Delete(
            parse_id(id)?,
            RowVersion::from_hex(version).ok_or_else(|| format!("invalid version `{version}`"))?,
        ),
        _ => return Err("unrecognized command".to_string()),
    };
    Ok((path, command))
}

fn parse_id(raw: &str) -> Result<EntityId, String> {
    raw.parse::<EntityId>()
        .map_err(|_| format!("invalid id `{raw}`"))
}

fn run(path: &str, command: Command) -> Result<ExitCode, RepoError> {
    let mut repo = CategoryRepository::try_new(open_db(path)?, ExecutionStrategy::default())?;

    match command {
        Command::List => {
            for category in repo.get_all_by_name()? {
                print_category(&category);
            }
        }
        Command::Add(name) => {
            let mut category = Category::new(name);
            repo.add(&mut category, true)?;
            print_category(&category);
        }
        Command::Rename(id, name) => {
            let Some(category) = rename_category(&mut repo, id, name)? else {
                eprintln!("not found: id={id}");
                return Ok(ExitCode::from(NOT_FOUND_EXIT_CODE));
            };
            print_category(&category);
        }
        Command::Delete(id, version) => {
            let rows = repo.delete_by_id(id, Some(version), true)?;
            println!("deleted rows={rows}");
        }
    }

    repo.dispose();
    Ok(ExitCode::SUCCESS)
}

/// Renames the stored category `id`; `None` when no such row exists.
fn rename_category(
    repo: &mut CategoryRepository,
    id: EntityId,
    name: String,
) -> Result<Option<Category>, RepoError> {
    let Some(mut category) = repo.find(id)? else {
        return Ok(None);
    };
    category.name = name;
    repo.update(&mut category, true)?;
    Ok(Some(category))
}

fn print_category(category: &Category) {
    let version = category
        .version
        .as_ref()
        .map_or_else(|| "-".to_string(), RowVersion::to_string);
    println!("{}\t{}\t{}", category.id, version, category.name);
}

#[cfg(test)]
mod tests {
    use super::rename_category;
    use storedal_core::db::open_db_in_memory;
    use storedal_core::{Category, CategoryRepository, ExecutionStrategy, Repository};

    fn setup() -> CategoryRepository {
        CategoryRepository::try_new(open_db_in_memory().unwrap(), ExecutionStrategy::none())
            .unwrap()
    }

    #[test]
    fn rename_of_missing_row_reports_not_found() {
        let mut repo = setup();
        let renamed = rename_category(&mut repo, 42, "Bar".to_string()).unwrap();
        assert!(renamed.is_none());
        assert!(!repo.has_changes());
    }

    #[test]
    fn rename_updates_stored_row() {
        let mut repo = setup();
        let mut category = Category::new("Foo");
        repo.add(&mut category, true).unwrap();

        let renamed = rename_category(&mut repo, category.id, "Bar".to_string())
            .unwrap()
            .unwrap();

        assert_eq!(renamed.name, "Bar");
        assert_ne!(renamed.version, category.version);
    }
}
