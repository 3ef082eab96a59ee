//! Database integration tests.
//!
//! These tests require a running `PostgreSQL` instance.
//! Run with: `cargo test --test db_integration -- --ignored`
//!
//! Environment variables:
//!   `TEST_DB_HOST` (default: localhost)
//!   `TEST_DB_PORT` (default: 5433)
//!   `TEST_DB_USER` (default: `notes_test`)
//!   `TEST_DB_PASSWORD` (default: `notes_test`)
//!   `TEST_DB_NAME` (default: `notes_test`)

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use chrono::{Duration, Utc};
use notes_common::AppError;
use notes_db::entities::{file, note, user};
use notes_db::repositories::{FileRepository, NoteRepository, UserRepository};
use notes_db::test_utils::TestDatabase;
use sea_orm::{DatabaseConnection, Set, TransactionTrait};

async fn seed_user(db: &Arc<DatabaseConnection>, id: &str) -> user::Model {
    let now = Utc::now().into();
    UserRepository::new(db.clone())
        .create(user::ActiveModel {
            id: Set(id.to_string()),
            name: Set("Alice".to_string()),
            email: Set(format!("{id}@example.com")),
            password_hash: Set("hash".to_string()),
            created_at: Set(now),
            updated_at: Set(now),
        })
        .await
        .unwrap()
}

fn note_model(id: &str, user_id: &str, minutes_ago: i64) -> note::ActiveModel {
    let at = (Utc::now() - Duration::minutes(minutes_ago)).into();
    note::ActiveModel {
        id: Set(id.to_string()),
        user_id: Set(user_id.to_string()),
        title: Set(format!("note {id}")),
        content: Set(String::new()),
        created_at: Set(at),
        updated_at: Set(at),
        deleted_at: Set(None),
    }
}

fn file_model(id: &str, note_id: &str, key: &str) -> file::ActiveModel {
    let now = Utc::now().into();
    file::ActiveModel {
        id: Set(id.to_string()),
        note_id: Set(note_id.to_string()),
        original_object_key: Set(key.to_string()),
        processed_object_key: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
        deleted_at: Set(None),
    }
}

#[tokio::test]
#[ignore = "requires running PostgreSQL instance"]
async fn test_note_delete_cascades_to_files() {
    let test_db = TestDatabase::new().await.unwrap();
    let db = Arc::new(test_db.conn);
    seed_user(&db, "user1").await;

    let notes = NoteRepository::new(db.clone());
    let files = FileRepository::new(db.clone());
    notes.create(note_model("note1", "user1", 0)).await.unwrap();
    files
        .create_in(db.as_ref(), file_model("file1", "note1", "original/a.jpg"))
        .await
        .unwrap();

    let txn = db.begin().await.unwrap();
    notes.delete_in(&txn, "note1").await.unwrap();
    txn.commit().await.unwrap();

    assert!(files.find_by_note_id("note1").await.unwrap().is_empty());
}

#[tokio::test]
#[ignore = "requires running PostgreSQL instance"]
async fn test_rolled_back_transaction_leaves_no_rows() {
    let test_db = TestDatabase::new().await.unwrap();
    let db = Arc::new(test_db.conn);
    seed_user(&db, "user1").await;

    let notes = NoteRepository::new(db.clone());
    let files = FileRepository::new(db.clone());

    let txn = db.begin().await.unwrap();
    notes
        .create_in(&txn, note_model("note1", "user1", 0))
        .await
        .unwrap();
    files
        .create_in(&txn, file_model("file1", "note1", "original/a.jpg"))
        .await
        .unwrap();
    let duplicate = files
        .create_in(&txn, file_model("file2", "note1", "original/a.jpg"))
        .await;
    assert!(matches!(duplicate, Err(AppError::DuplicateRecord(_))));
    txn.rollback().await.unwrap();

    assert!(notes.find_by_id("note1").await.unwrap().is_none());
    assert!(files.find_by_note_id("note1").await.unwrap().is_empty());
}

#[tokio::test]
#[ignore = "requires running PostgreSQL instance"]
async fn test_unknown_owner_is_foreign_key_error() {
    let test_db = TestDatabase::new().await.unwrap();
    let db = Arc::new(test_db.conn);

    let result = NoteRepository::new(db)
        .create(note_model("note1", "nobody", 0))
        .await;

    assert!(matches!(result, Err(AppError::ForeignKeyConstraint(_))));
}

#[tokio::test]
#[ignore = "requires running PostgreSQL instance"]
async fn test_processed_key_update_is_repeatable() {
    let test_db = TestDatabase::new().await.unwrap();
    let db = Arc::new(test_db.conn);
    seed_user(&db, "user1").await;

    let notes = NoteRepository::new(db.clone());
    let files = FileRepository::new(db.clone());
    notes.create(note_model("note1", "user1", 0)).await.unwrap();
    files
        .create_in(db.as_ref(), file_model("file1", "note1", "original/a.jpg"))
        .await
        .unwrap();

    for _ in 0..2 {
        files
            .update_processed_key_in(db.as_ref(), "original/a.jpg", "processed-photos/b.jpg")
            .await
            .unwrap();
    }

    let file = files
        .find_by_original_key("original/a.jpg")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        file.processed_object_key.as_deref(),
        Some("processed-photos/b.jpg")
    );
}

#[tokio::test]
#[ignore = "requires running PostgreSQL instance"]
async fn test_listing_pages_and_trash() {
    let test_db = TestDatabase::new().await.unwrap();
    let db = Arc::new(test_db.conn);
    seed_user(&db, "user1").await;

    let notes = NoteRepository::new(db.clone());
    for (id, age) in [("a", 3), ("b", 2), ("c", 1)] {
        notes.create(note_model(id, "user1", age)).await.unwrap();
    }
    notes.soft_delete("b").await.unwrap();

    let first = notes
        .list_by_user("user1", Utc::now().into(), 1)
        .await
        .unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(first[0].id, "c");

    let second = notes
        .list_by_user("user1", first[0].updated_at, 20)
        .await
        .unwrap();
    let ids: Vec<_> = second.iter().map(|n| n.id.as_str()).collect();
    assert_eq!(ids, ["a"]);

    let trash = notes
        .list_trash_by_user("user1", Utc::now().into(), 20)
        .await
        .unwrap();
    assert_eq!(trash.len(), 1);
    assert_eq!(trash[0].id, "b");

    // Trashing twice is a not-found.
    assert!(matches!(
        notes.soft_delete("b").await,
        Err(AppError::NoteNotFound(_))
    ));
    notes.restore("b").await.unwrap();
    assert!(
        notes
            .list_trash_by_user("user1", Utc::now().into(), 20)
            .await
            .unwrap()
            .is_empty()
    );
}
