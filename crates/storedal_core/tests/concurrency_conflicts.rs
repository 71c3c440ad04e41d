use storedal_core::db::{open_db, open_db_in_memory};
use storedal_core::{
    Category, CategoryRepository, ConflictOperation, EntityState, ExecutionStrategy, RepoError,
    Repository, RowVersion,
};
use std::path::Path;

fn open_repo(path: &Path) -> CategoryRepository {
    CategoryRepository::try_new(open_db(path).unwrap(), ExecutionStrategy::default()).unwrap()
}

fn seeded(repo: &mut CategoryRepository, name: &str) -> Category {
    let mut category = Category::new(name);
    repo.add(&mut category, true).unwrap();
    category
}

#[test]
fn stale_writer_gets_conflict_naming_the_row() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.db");
    let mut setup = open_repo(&path);
    let id = seeded(&mut setup, "Foo").id;

    let mut first = open_repo(&path);
    let mut second = open_repo(&path);
    let mut first_copy = first.find(id).unwrap().unwrap();
    let mut second_copy = second.find(id).unwrap().unwrap();
    let loaded_version = second_copy.version.clone();

    first_copy.name = "First".to_string();
    assert_eq!(first.update(&mut first_copy, true).unwrap(), 1);
    assert_ne!(first_copy.version, loaded_version);

    second_copy.name = "Second".to_string();
    let err = second.update(&mut second_copy, true).unwrap_err();

    let conflict = err.as_conflict().expect("stale update must be a conflict");
    assert_eq!(conflict.ids(), vec![id]);
    assert_eq!(conflict.entries[0].operation, ConflictOperation::Update);
    assert_eq!(conflict.entries[0].expected_version, loaded_version);
    assert_eq!(conflict.entries[0].current_version, first_copy.version);

    // Nothing was applied and the change is still pending for a reload-and-retry.
    assert_eq!(second.state_of(&second_copy), EntityState::Modified);
    assert_eq!(first.find(id).unwrap().unwrap().name, "First");
}

#[test]
fn conflicts_are_not_retried() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.db");
    let mut setup = open_repo(&path);
    let category = seeded(&mut setup, "Foo");

    let mut stale = category.clone();
    let mut fresh = category;
    fresh.name = "Fresh".to_string();
    setup.update(&mut fresh, true).unwrap();

    let mut other = open_repo(&path);
    other.find(stale.id).unwrap();
    stale.name = "Stale".to_string();
    let err = other.update(&mut stale, true).unwrap_err();

    assert!(matches!(err, RepoError::Concurrency(_)));
}

#[test]
fn failed_batch_applies_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.db");
    let mut setup = open_repo(&path);
    let keep = seeded(&mut setup, "Keep");
    let contested = seeded(&mut setup, "Contested");

    let mut writer = open_repo(&path);
    let mut contested_copy = writer.find(contested.id).unwrap().unwrap();
    contested_copy.name = "Moved on".to_string();
    writer.update(&mut contested_copy, true).unwrap();

    let mut stale = open_repo(&path);
    let mut keep_copy = stale.find(keep.id).unwrap().unwrap();
    keep_copy.name = "Keep edited".to_string();
    stale.update(&mut keep_copy, false).unwrap();
    stale.delete(&contested, false).unwrap();
    stale.add(&mut Category::new("New"), false).unwrap();

    let err = stale.save_changes().unwrap_err();
    let conflict = err.as_conflict().unwrap();
    assert_eq!(conflict.ids(), vec![contested.id]);
    assert_eq!(conflict.entries[0].operation, ConflictOperation::Delete);

    let mut reader = open_repo(&path);
    let names: Vec<String> = reader
        .get_all_by_name()
        .unwrap()
        .into_iter()
        .map(|category| category.name)
        .collect();
    assert_eq!(names, vec!["Keep".to_string(), "Moved on".to_string()]);
    assert!(stale.has_changes());
}

#[test]
fn delete_by_id_with_matching_version_removes_row() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.db");
    let mut setup = open_repo(&path);
    let category = seeded(&mut setup, "foo");

    let mut other = open_repo(&path);
    let affected = other
        .delete_by_id(category.id, category.version.clone(), true)
        .unwrap();

    assert_eq!(affected, 1);
    assert_eq!(other.count().unwrap(), 0);
}

#[test]
fn delete_by_id_with_stale_version_reports_exactly_that_row() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.db");
    let mut setup = open_repo(&path);
    let mut category = seeded(&mut setup, "foo");
    let stale_version = category.version.clone();
    category.name = "bar".to_string();
    setup.update(&mut category, true).unwrap();

    let mut other = open_repo(&path);
    let err = other
        .delete_by_id(category.id, stale_version.clone(), true)
        .unwrap_err();

    let conflict = err.as_conflict().unwrap();
    assert_eq!(conflict.entries.len(), 1);
    assert_eq!(conflict.entries[0].id, category.id);
    assert_eq!(conflict.entries[0].expected_version, stale_version);
    assert_eq!(other.count().unwrap(), 1);
}

#[test]
fn delete_by_id_without_version_is_always_rejected() {
    let mut repo =
        CategoryRepository::try_new(open_db_in_memory().unwrap(), ExecutionStrategy::none())
            .unwrap();
    let category = seeded(&mut repo, "foo");
    repo.detach(&category).unwrap();

    let err = repo.delete_by_id(category.id, None, true).unwrap_err();

    let conflict = err.as_conflict().unwrap();
    assert_eq!(conflict.ids(), vec![category.id]);
    assert!(conflict.entries[0].expected_version.is_none());
    assert_eq!(repo.count().unwrap(), 1);
}

#[test]
fn delete_by_id_checks_tracked_copy_before_store() {
    let mut repo =
        CategoryRepository::try_new(open_db_in_memory().unwrap(), ExecutionStrategy::none())
            .unwrap();
    let category = seeded(&mut repo, "foo");
    let wrong = RowVersion::from_bytes(vec![0; 8]);

    let err = repo
        .delete_by_id(category.id, Some(wrong.clone()), true)
        .unwrap_err();
    let conflict = err.as_conflict().unwrap();
    assert_eq!(conflict.entries[0].expected_version, Some(wrong));
    assert_eq!(conflict.entries[0].current_version, category.version);
    assert_eq!(repo.state_of(&category), EntityState::Unchanged);

    let affected = repo
        .delete_by_id(category.id, category.version.clone(), true)
        .unwrap();
    assert_eq!(affected, 1);
    assert_eq!(repo.state_of(&category), EntityState::Detached);
}

#[test]
fn delete_by_id_of_missing_row_is_a_conflict() {
    let mut repo =
        CategoryRepository::try_new(open_db_in_memory().unwrap(), ExecutionStrategy::none())
            .unwrap();

    let err = repo
        .delete_by_id(99, Some(RowVersion::from_bytes(vec![1; 8])), true)
        .unwrap_err();

    let conflict = err.as_conflict().unwrap();
    assert_eq!(conflict.ids(), vec![99]);
    assert!(conflict.entries[0].current_version.is_none());
}

#[test]
fn conflict_report_serializes_for_callers() {
    let mut repo =
        CategoryRepository::try_new(open_db_in_memory().unwrap(), ExecutionStrategy::none())
            .unwrap();
    let err = repo.delete_by_id(7, None, false).unwrap_err();

    let json = serde_json::to_value(err.as_conflict().unwrap()).unwrap();
    assert_eq!(json["table"], "categories");
    assert_eq!(json["entries"][0]["id"], 7);
    assert_eq!(json["entries"][0]["operation"], "delete");
    assert!(json["entries"][0]["expected_version"].is_null());
}
