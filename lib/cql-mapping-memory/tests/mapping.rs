//! Record mapping against the in-memory store: saves, reads, partial updates,
//! collections, counters, static columns, TTLs and batches.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use cql_mapping::{
    CqlEnum, Entity, Filter, MappingError, MappingSession, Statement, StatementBody,
    StatementFactory, Timestamp, Value, WriteOptions, metadata_for,
};
use cql_mapping_memory::MemoryDriver;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const KEYSPACE: &str = "ledger";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, CqlEnum)]
enum Category {
    Food,
    Travel,
    Lodging,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, CqlEnum)]
#[serde(rename_all = "lowercase")]
enum Status {
    Pending,
    Approved,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Entity)]
#[entity(table = "expenses")]
#[serde(rename_all = "camelCase")]
struct Expense {
    #[column(partition_key)]
    user_id: String,
    #[column(clustering_key, order = "desc")]
    expense_id: i32,
    amount: f64,
    #[column(enum_ordinal)]
    category: Category,
    #[column(enum_name)]
    status: Status,
    #[column(index = "expense_tags_idx")]
    tags: HashSet<String>,
    notes: Vec<String>,
    limits: HashMap<String, i32>,
    created: Timestamp,
    memo: Option<String>,
}

fn expense(user_id: &str, expense_id: i32) -> Expense {
    Expense {
        user_id: user_id.to_string(),
        expense_id,
        amount: 42.5,
        category: Category::Travel,
        status: Status::Approved,
        tags: HashSet::from(["work".to_string(), "q3".to_string()]),
        notes: vec!["taxi".to_string(), "airport".to_string()],
        limits: HashMap::from([("daily".to_string(), 100), ("weekly".to_string(), 500)]),
        created: Timestamp::from_millis(1_700_000_000_123),
        memo: None,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Entity)]
#[entity(table = "accounts")]
struct Account {
    #[column(partition_key)]
    id: String,
    owner: String,
    #[column(version)]
    version: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Entity)]
#[entity(table = "playlists")]
struct Playlist {
    #[column(partition_key)]
    name: String,
    tracks: Vec<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Entity)]
#[entity(table = "page_views")]
struct PageViews {
    #[column(partition_key)]
    page: String,
    #[column(counter)]
    views: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Entity)]
#[entity(table = "messages")]
struct Message {
    #[column(partition_key)]
    room: String,
    #[column(clustering_key)]
    sent: i64,
    #[column(static_column)]
    topic: String,
    body: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Entity)]
#[entity(table = "visits")]
struct Visit {
    #[column(partition_key, auto)]
    id: Uuid,
    #[column(clustering_key, timeuuid, auto)]
    event: Uuid,
    path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Entity)]
#[entity(table = "otp_codes", ttl = 1)]
struct OneTimeCode {
    #[column(partition_key)]
    user: String,
    code: String,
}

fn session() -> MappingSession<MemoryDriver> {
    MappingSession::new(KEYSPACE, MemoryDriver::new().with_keyspace(KEYSPACE))
}

#[tokio::test]
async fn saved_records_read_back_equal() {
    let session = session();
    let record = expense("ada", 7);

    let saved = session.save(&record).await.unwrap().saved().unwrap();
    assert_eq!(saved, record);

    let loaded: Expense = session.get(("ada", 7)).await.unwrap().unwrap();
    assert_eq!(loaded, record);

    let missing: Option<Expense> = session.get(("ada", 8)).await.unwrap();
    assert!(missing.is_none());
}

#[tokio::test]
async fn enums_are_stored_by_ordinal_and_by_name() {
    let session = session();
    session.save(&expense("ada", 1)).await.unwrap();

    let metadata = metadata_for::<Expense>().unwrap();
    let select = StatementFactory::new(KEYSPACE, &metadata)
        .select(&("ada", 1).into())
        .unwrap();
    let result = session.execute(&select).await.unwrap();
    let row = result.first().unwrap();

    assert_eq!(row.get("category"), Some(&Value::Int(1)));
    assert_eq!(row.get("status"), Some(&Value::from("approved")));
    assert_eq!(Category::Lodging.ordinal(), 2);
}

#[tokio::test]
async fn changing_a_key_writes_a_separate_row() {
    let session = session();
    let original = expense("ada", 1);
    session.save(&original).await.unwrap();

    let moved = Expense {
        expense_id: 2,
        amount: 1.0,
        ..original.clone()
    };
    session.save(&moved).await.unwrap();

    let first: Expense = session.get(("ada", 1)).await.unwrap().unwrap();
    let second: Expense = session.get(("ada", 2)).await.unwrap().unwrap();
    assert_eq!(first.amount, 42.5);
    assert_eq!(second.amount, 1.0);

    let err = session
        .update_value::<Expense>(("ada", 1), "expense_id", 3)
        .await
        .unwrap_err();
    assert!(matches!(err, MappingError::InvalidOperation(_)));
}

#[tokio::test]
async fn key_prefix_lookup_returns_first_row_in_clustering_order() {
    let session = session();
    session.save(&expense("ada", 1)).await.unwrap();
    session.save(&expense("ada", 5)).await.unwrap();

    let first: Expense = session.get("ada").await.unwrap().unwrap();
    assert_eq!(first.expense_id, 5);

    let err = session.get::<Expense>(("ada", 1, 2)).await.unwrap_err();
    assert!(matches!(err, MappingError::InvalidKey { .. }));
}

#[tokio::test]
async fn versioned_saves_reject_stale_records() {
    let session = session();
    let account = Account {
        id: "acc-1".to_string(),
        owner: "ada".to_string(),
        version: 0,
    };

    let first = session.save(&account).await.unwrap().saved().unwrap();
    assert_eq!(first.version, 1);

    let renamed = Account {
        owner: "grace".to_string(),
        ..first.clone()
    };
    let second = session.save(&renamed).await.unwrap().saved().unwrap();
    assert_eq!(second.version, 2);

    let stale = Account {
        owner: "mallory".to_string(),
        ..first
    };
    let outcome = session.save(&stale).await.unwrap();
    assert!(!outcome.is_saved());

    let stored: Account = session.get("acc-1").await.unwrap().unwrap();
    assert_eq!(stored.version, 2);
    assert_eq!(stored.owner, "grace");
}

#[tokio::test]
async fn versioned_update_of_a_missing_row_is_not_saved() {
    let session = session();
    let ghost = Account {
        id: "ghost".to_string(),
        owner: "nobody".to_string(),
        version: 4,
    };
    assert!(!session.save(&ghost).await.unwrap().is_saved());
    assert!(session.get::<Account>("ghost").await.unwrap().is_none());
}

#[tokio::test]
async fn appends_do_not_read_before_writing() {
    let session = session();
    session.save(&expense("ada", 1)).await.unwrap();
    session.driver().clear_history();

    session
        .append::<Expense>(("ada", 1), "notes", "hotel")
        .await
        .unwrap();
    session
        .append::<Expense>(("ada", 1), "tags", "travel")
        .await
        .unwrap();
    session
        .append::<Expense>(
            ("ada", 1),
            "limits",
            Value::Map(vec![(Value::from("monthly"), Value::Int(900))]),
        )
        .await
        .unwrap();

    let executed = session.driver().executed();
    assert_eq!(executed.len(), 3);
    assert!(executed.iter().all(|cql| !cql.starts_with("SELECT")));

    let loaded: Expense = session.get(("ada", 1)).await.unwrap().unwrap();
    assert_eq!(loaded.notes, vec!["taxi", "airport", "hotel"]);
    assert!(loaded.tags.contains("travel"));
    assert_eq!(loaded.limits.get("monthly"), Some(&900));
    assert_eq!(loaded.limits.len(), 3);
}

#[tokio::test]
async fn prepend_replace_and_clear_lists() {
    let session = session();
    let playlist = Playlist {
        name: "road trip".to_string(),
        tracks: vec![1, 2],
    };
    session.save(&playlist).await.unwrap();

    session
        .prepend::<Playlist>("road trip", "tracks", vec![5, 6])
        .await
        .unwrap();
    let loaded: Playlist = session.get("road trip").await.unwrap().unwrap();
    assert_eq!(loaded.tracks, vec![5, 6, 1, 2]);

    session
        .replace_at::<Playlist>("road trip", "tracks", 9, 1)
        .await
        .unwrap();
    let loaded: Playlist = session.get("road trip").await.unwrap().unwrap();
    assert_eq!(loaded.tracks, vec![5, 9, 1, 2]);

    let err = session
        .replace_at::<Playlist>("road trip", "tracks", 0, 10)
        .await
        .unwrap_err();
    assert!(matches!(err, MappingError::Driver(_)));

    session
        .delete_value::<Playlist>("road trip", "tracks")
        .await
        .unwrap();
    let loaded: Playlist = session.get("road trip").await.unwrap().unwrap();
    assert!(loaded.tracks.is_empty());
}

#[tokio::test]
async fn update_values_touches_only_named_columns() {
    let session = session();
    session.save(&expense("ada", 3)).await.unwrap();

    session
        .update_values::<Expense, _, _>(
            ("ada", 3),
            [("amount", Value::from(12.5)), ("memo", Value::from("refund"))],
        )
        .await
        .unwrap();

    let loaded: Expense = session.get(("ada", 3)).await.unwrap().unwrap();
    assert_eq!(loaded.amount, 12.5);
    assert_eq!(loaded.memo.as_deref(), Some("refund"));
    assert_eq!(loaded.notes, vec!["taxi", "airport"]);

    let err = session
        .update_value::<Expense>(("ada", 3), "no_such_column", 1)
        .await
        .unwrap_err();
    assert!(matches!(err, MappingError::UnknownColumn { .. }));
}

#[tokio::test]
async fn counters_accumulate() {
    let session = session();
    session
        .increment::<PageViews>("/home", "views", 3)
        .await
        .unwrap();
    session
        .increment::<PageViews>("/home", "views", 2)
        .await
        .unwrap();

    let views: PageViews = session.get("/home").await.unwrap().unwrap();
    assert_eq!(views.views, 5);

    let err = session
        .update_value::<PageViews>("/home", "views", 1)
        .await
        .unwrap_err();
    assert!(matches!(err, MappingError::InvalidOperation(_)));
}

#[tokio::test]
async fn static_columns_are_shared_by_the_partition() {
    let session = session();
    let mut message = Message {
        room: "lobby".to_string(),
        sent: 1,
        topic: "hello".to_string(),
        body: "first".to_string(),
    };
    session.save(&message).await.unwrap();

    message.sent = 2;
    message.topic = "updated".to_string();
    message.body = "second".to_string();
    session.save(&message).await.unwrap();

    let first: Message = session.get(("lobby", 1_i64)).await.unwrap().unwrap();
    assert_eq!(first.body, "first");
    assert_eq!(first.topic, "updated");
}

#[tokio::test]
async fn auto_keys_are_generated_on_save() {
    let session = session();
    let visit = Visit {
        id: Uuid::nil(),
        event: Uuid::nil(),
        path: "/pricing".to_string(),
    };

    let saved = session.save(&visit).await.unwrap().saved().unwrap();
    assert!(!saved.id.is_nil());
    assert_eq!(saved.id.get_version_num(), 4);
    assert_eq!(saved.event.get_version_num(), 1);

    let loaded: Visit = session.get((saved.id, saved.event)).await.unwrap().unwrap();
    assert_eq!(loaded, saved);
}

#[tokio::test]
async fn ttl_expires_records() {
    let session = session();
    let code = OneTimeCode {
        user: "ada".to_string(),
        code: "123456".to_string(),
    };
    session.save(&code).await.unwrap();

    let mut short = expense("ada", 9);
    short.memo = Some("temporary".to_string());
    session
        .save_with(&short, &WriteOptions::new().ttl(1))
        .await
        .unwrap();
    session.save(&expense("ada", 10)).await.unwrap();

    assert!(session.get::<OneTimeCode>("ada").await.unwrap().is_some());
    tokio::time::sleep(Duration::from_millis(1500)).await;

    assert!(session.get::<OneTimeCode>("ada").await.unwrap().is_none());
    assert!(session.get::<Expense>(("ada", 9)).await.unwrap().is_none());
    assert!(session.get::<Expense>(("ada", 10)).await.unwrap().is_some());
}

#[tokio::test]
async fn deletes_remove_rows() {
    let session = session();
    let record = expense("ada", 4);
    session.save(&record).await.unwrap();
    session.save(&expense("ada", 5)).await.unwrap();

    session.delete(&record).await.unwrap();
    assert!(session.get::<Expense>(("ada", 4)).await.unwrap().is_none());

    session.delete_by_key::<Expense>(("ada", 5)).await.unwrap();
    assert!(session.get::<Expense>("ada").await.unwrap().is_none());

    // deleting again is fine
    session.delete(&record).await.unwrap();
}

#[tokio::test]
async fn batches_apply_together() {
    let session = session();
    let stale = expense("ada", 1);
    session.save(&stale).await.unwrap();

    let mut batch = session.with_batch();
    batch
        .save(&expense("ada", 2))
        .unwrap()
        .save(&expense("grace", 1))
        .unwrap()
        .delete(&stale)
        .unwrap();
    assert_eq!(batch.len(), 3);
    assert!(batch.execute().await.unwrap());

    assert!(session.get::<Expense>(("ada", 1)).await.unwrap().is_none());
    assert!(session.get::<Expense>(("ada", 2)).await.unwrap().is_some());
    assert!(session.get::<Expense>(("grace", 1)).await.unwrap().is_some());

    assert!(session.with_batch().execute().await.unwrap());
}

#[tokio::test]
async fn batched_saves_report_generated_keys_and_versions() {
    let session = session();
    let account = Account {
        id: "acc-3".to_string(),
        owner: "ada".to_string(),
        version: 0,
    };
    let visit = Visit {
        id: Uuid::nil(),
        event: Uuid::nil(),
        path: "/docs".to_string(),
    };

    let mut batch = session.with_batch();
    batch.save(&account).unwrap().save(&visit).unwrap();
    let accounts: Vec<Account> = batch.saved().unwrap();
    let visits: Vec<Visit> = batch.saved().unwrap();
    assert!(batch.saved::<Expense>().unwrap().is_empty());
    assert!(batch.execute().await.unwrap());

    assert_eq!(accounts.len(), 1);
    assert_eq!(accounts[0].version, 1);
    let stored: Account = session.get("acc-3").await.unwrap().unwrap();
    assert_eq!(stored, accounts[0]);

    let saved = &visits[0];
    assert!(!saved.id.is_nil());
    assert_eq!(saved.event.get_version_num(), 1);
    let loaded: Visit = session.get((saved.id, saved.event)).await.unwrap().unwrap();
    assert_eq!(&loaded, saved);
}

#[tokio::test]
async fn failed_batches_apply_nothing() {
    let session = session();
    session.save(&expense("ada", 1)).await.unwrap();
    session.driver().fail_statements_containing("DELETE");

    let mut batch = session.with_batch();
    batch
        .save(&expense("ada", 2))
        .unwrap()
        .delete(&expense("ada", 1))
        .unwrap();
    assert!(batch.execute().await.is_err());

    session.driver().clear_failures();
    assert!(session.get::<Expense>(("ada", 1)).await.unwrap().is_some());
    assert!(session.get::<Expense>(("ada", 2)).await.unwrap().is_none());
}

#[tokio::test]
async fn rejected_conditions_cancel_the_batch() {
    let session = session();
    let account = Account {
        id: "acc-9".to_string(),
        owner: "ada".to_string(),
        version: 0,
    };
    let current = session.save(&account).await.unwrap().saved().unwrap();
    session.save(&current).await.unwrap();

    let fresh = Account {
        id: "acc-9".to_string(),
        owner: "fresh".to_string(),
        version: 3,
    };
    let mut batch = session.with_batch();
    batch.save(&current).unwrap().save(&fresh).unwrap();
    assert!(!batch.execute().await.unwrap());

    let stored: Account = session.get("acc-9").await.unwrap().unwrap();
    assert_eq!(stored.version, 2);
    assert_eq!(stored.owner, "ada");
}

#[tokio::test]
async fn indexed_collections_can_be_queried() {
    let session = session();
    session.save(&expense("ada", 1)).await.unwrap();
    let mut other = expense("grace", 2);
    other.tags = HashSet::from(["personal".to_string()]);
    session.save(&other).await.unwrap();

    let metadata = metadata_for::<Expense>().unwrap();
    let factory = StatementFactory::new(KEYSPACE, &metadata);

    let query = factory
        .select_where(vec![Filter::contains("tags", "work")])
        .unwrap();
    assert!(!query.cql().contains("ALLOW FILTERING"));
    let found: Vec<Expense> = session.get_by_query(query).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].user_id, "ada");

    let query = factory
        .select_where(vec![Filter::gt("amount", 10)])
        .unwrap();
    assert!(query.cql().ends_with("ALLOW FILTERING"));
    let found: Vec<Expense> = session.get_by_query(query).await.unwrap();
    assert_eq!(found.len(), 2);
}

#[tokio::test]
async fn partial_rows_map_with_defaults() {
    let session = session();
    session.save(&expense("ada", 1)).await.unwrap();

    let projection = Statement::new(
        KEYSPACE,
        StatementBody::Select {
            table: "expenses".to_string(),
            columns: vec![
                "user_id".to_string(),
                "expense_id".to_string(),
                "amount".to_string(),
            ],
            filters: vec![Filter::eq("user_id", "ada")],
            limit: None,
            allow_filtering: false,
        },
    );
    let result = session.execute(&projection).await.unwrap();
    assert_eq!(result.first().map(|row| row.len()), Some(3));

    let records: Vec<Expense> = session.get_from_rows(result.rows()).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].amount, 42.5);
    assert_eq!(records[0].category, Category::Food);
    assert!(records[0].tags.is_empty());
    assert!(records[0].memo.is_none());

    let from_set: Vec<Expense> = session.get_from_result_set(result).unwrap();
    assert_eq!(from_set, records);
}

#[tokio::test]
async fn records_read_back_through_raw_cql() {
    let session = session();
    session.save(&expense("ada", 1)).await.unwrap();
    session.save(&expense("ada", 2)).await.unwrap();
    session.save(&expense("grace", 1)).await.unwrap();

    let found: Vec<Expense> = session
        .get_by_cql(
            "SELECT * FROM ledger.expenses WHERE user_id = ? AND expense_id = ?",
            vec![Value::from("ada"), Value::Int(2)],
        )
        .await
        .unwrap();
    assert_eq!(found, vec![expense("ada", 2)]);

    // rows carry only some columns; the rest take their defaults
    let partial: Vec<Expense> = session
        .get_by_cql(
            "SELECT user_id, expense_id, amount FROM expenses WHERE user_id = 'ada' LIMIT 5",
            Vec::new(),
        )
        .await
        .unwrap();
    assert_eq!(partial.len(), 2);
    assert_eq!(partial[0].expense_id, 2);
    assert_eq!(partial[0].amount, 42.5);
    assert!(partial[0].notes.is_empty());
    assert_eq!(partial[0].category, Category::Food);

    let err = session
        .get_by_cql::<Expense>("TRUNCATE ledger.expenses", Vec::new())
        .await
        .unwrap_err();
    assert!(matches!(err, MappingError::Driver(_)));
}

#[tokio::test]
async fn prepared_statements_are_reused() {
    let session = session();
    session.save(&expense("ada", 1)).await.unwrap();
    let prepared = session.driver().prepare_count();

    session.save(&expense("ada", 2)).await.unwrap();
    session.save(&expense("ada", 3)).await.unwrap();
    assert_eq!(session.driver().prepare_count(), prepared);
}

#[test]
fn derived_descriptors_validate() {
    let metadata = metadata_for::<Expense>().unwrap();
    assert_eq!(metadata.table_name(), "expenses");
    assert_eq!(metadata.primary_key_len(), 2);
    assert_eq!(metadata.index_for("tags"), Some("expense_tags_idx"));
    assert!(metadata.column("userId").is_some());

    let views = metadata_for::<PageViews>().unwrap();
    assert!(views.has_counters());
    assert_eq!(OneTimeCode::descriptor().table, "otp_codes");
}
