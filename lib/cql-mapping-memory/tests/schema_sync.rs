//! Schema synchronization against the in-memory store.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::any::TypeId;

use cql_mapping::{
    ColumnKind, ConnectionConfig, Driver, DriverConnection, Entity, MappingError, MappingSession,
    SchemaSync, SessionConfig, SyncFlags, SyncOptions, TableDefinition, metadata_for,
};
use cql_mapping_memory::MemoryDriver;
use serde::{Deserialize, Serialize};

const KEYSPACE: &str = "accounts";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Entity)]
#[entity(table = "profiles")]
struct ProfileV1 {
    #[column(partition_key)]
    id: String,
    #[column(index = "profile_name_idx")]
    name: String,
    email: String,
    age: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Entity)]
#[entity(table = "profiles")]
struct ProfileV2 {
    #[column(partition_key)]
    id: String,
    name: String,
    phone: Option<String>,
    age: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Entity)]
#[entity(table = "profiles")]
struct ProfileRenamedIndex {
    #[column(partition_key)]
    id: String,
    #[column(index = "profile_display_idx")]
    name: String,
    email: String,
    age: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Entity)]
#[entity(table = "profiles")]
struct ProfileWithoutIndex {
    #[column(partition_key)]
    id: String,
    #[column(index = "")]
    name: String,
    email: String,
    age: i32,
}

fn driver() -> MemoryDriver {
    MemoryDriver::new().with_keyspace(KEYSPACE)
}

fn profile() -> ProfileV1 {
    ProfileV1 {
        id: "p-1".to_string(),
        name: "Ada".to_string(),
        email: "ada@example.com".to_string(),
        age: 36,
    }
}

async fn synced_v1() -> MemoryDriver {
    let driver = driver();
    let metadata = metadata_for::<ProfileV1>().unwrap();
    SchemaSync::new()
        .sync(&driver, KEYSPACE, &metadata, SyncFlags::default())
        .await
        .unwrap();
    driver
}

async fn live_profiles(driver: &MemoryDriver) -> TableDefinition {
    driver
        .table_definition(KEYSPACE, "profiles")
        .await
        .unwrap()
        .expect("profiles table exists")
}

async fn sync_cql<T: Entity>(driver: &MemoryDriver, flags: SyncFlags) -> Vec<String> {
    let metadata = metadata_for::<T>().unwrap();
    SchemaSync::new()
        .sync(driver, KEYSPACE, &metadata, flags)
        .await
        .unwrap()
        .iter()
        .map(|statement| statement.cql())
        .collect()
}

#[tokio::test]
async fn first_use_creates_table_and_indexes() {
    let session = MappingSession::new(KEYSPACE, driver());
    session.save(&profile()).await.unwrap();

    let executed = session.driver().executed();
    assert!(executed[0].starts_with("CREATE TABLE IF NOT EXISTS accounts.profiles"));
    assert_eq!(
        executed[1],
        "CREATE INDEX IF NOT EXISTS profile_name_idx ON accounts.profiles (name)"
    );
    assert!(executed[2].starts_with("INSERT INTO accounts.profiles"));

    let table = live_profiles(session.driver()).await;
    assert_eq!(table.index_on("name").map(|i| i.name.as_str()), Some("profile_name_idx"));
    assert_eq!(
        table.column("id").map(|c| c.kind),
        Some(ColumnKind::PartitionKey)
    );
}

#[tokio::test]
async fn synchronization_is_idempotent() {
    let driver = synced_v1().await;
    assert!(sync_cql::<ProfileV1>(&driver, SyncFlags::default()).await.is_empty());

    let session = MappingSession::new(KEYSPACE, driver);
    assert_eq!(session.sync_script::<ProfileV1>().await.unwrap(), "");

    session.maybe_sync::<ProfileV1>().await.unwrap();
    session.driver().clear_history();
    session.maybe_sync::<ProfileV1>().await.unwrap();
    session.save(&profile()).await.unwrap();
    let executed = session.driver().executed();
    assert_eq!(executed.len(), 1);
    assert!(executed[0].starts_with("INSERT"));
}

#[tokio::test]
async fn divergent_declarations_add_alter_and_drop() {
    let driver = synced_v1().await;
    let executed = sync_cql::<ProfileV2>(&driver, SyncFlags::default()).await;

    assert_eq!(
        executed,
        vec![
            "DROP INDEX IF EXISTS accounts.profile_name_idx".to_string(),
            "ALTER TABLE accounts.profiles ADD phone text".to_string(),
            "ALTER TABLE accounts.profiles ALTER age TYPE bigint".to_string(),
            "ALTER TABLE accounts.profiles DROP email".to_string(),
        ]
    );

    let table = live_profiles(&driver).await;
    assert!(table.column("email").is_none());
    assert_eq!(table.column("age").map(|c| c.cql_type.as_str()), Some("bigint"));
    assert!(table.indexes.is_empty());
}

#[tokio::test]
async fn policy_flags_gate_additions_and_removals() {
    let driver = synced_v1().await;
    let keep = SyncFlags {
        do_not_drop_columns: true,
        do_not_drop_custom_index: true,
        ..SyncFlags::default()
    };
    let executed = sync_cql::<ProfileV2>(&driver, keep).await;
    assert!(executed.iter().any(|cql| cql.contains("ADD phone")));
    assert!(!executed.iter().any(|cql| cql.contains("DROP")));
    let table = live_profiles(&driver).await;
    assert!(table.column("email").is_some());
    assert!(table.index_on("name").is_some());

    let driver = synced_v1().await;
    let no_add = SyncFlags {
        do_not_add_columns: true,
        ..SyncFlags::default()
    };
    let executed = sync_cql::<ProfileV2>(&driver, no_add).await;
    assert!(!executed.iter().any(|cql| cql.contains("ADD")));
    assert!(executed.iter().any(|cql| cql.ends_with("DROP email")));
}

#[tokio::test]
async fn per_type_options_combine_with_global_flags() {
    let session = MappingSession::new(KEYSPACE, synced_v1().await);
    session.set_sync_options(SyncOptions::default().with_type::<ProfileV2>(SyncFlags {
        do_not_drop_columns: true,
        ..SyncFlags::default()
    }));

    let script = session.sync_script::<ProfileV2>().await.unwrap();
    assert!(script.contains("ADD phone text;"));
    assert!(!script.contains("DROP email"));
    assert!(script.contains("DROP INDEX IF EXISTS accounts.profile_name_idx;"));
}

#[tokio::test]
async fn index_renames_and_removals() {
    let driver = synced_v1().await;
    let executed = sync_cql::<ProfileRenamedIndex>(&driver, SyncFlags::default()).await;
    assert_eq!(
        executed,
        vec![
            "DROP INDEX IF EXISTS accounts.profile_name_idx".to_string(),
            "CREATE INDEX IF NOT EXISTS profile_display_idx ON accounts.profiles (name)"
                .to_string(),
        ]
    );

    let executed = sync_cql::<ProfileWithoutIndex>(&driver, SyncFlags::default()).await;
    assert_eq!(
        executed,
        vec!["DROP INDEX IF EXISTS accounts.profile_display_idx".to_string()]
    );
    assert!(live_profiles(&driver).await.indexes.is_empty());
}

#[tokio::test]
async fn sync_script_has_no_side_effects() {
    let session = MappingSession::new(KEYSPACE, driver());
    let script = session.sync_script::<ProfileV1>().await.unwrap();

    assert_eq!(script.lines().count(), 2);
    assert!(script.starts_with("CREATE TABLE IF NOT EXISTS accounts.profiles"));
    assert!(session.driver().executed().is_empty());
    assert!(
        !session
            .schema_sync()
            .is_synced(TypeId::of::<ProfileV1>(), KEYSPACE)
            .await
    );
}

#[tokio::test]
async fn failed_sync_is_retried_on_next_use() {
    let session = MappingSession::new(KEYSPACE, driver());
    session.driver().fail_statements_containing("CREATE INDEX");

    let err = session.maybe_sync::<ProfileV1>().await.unwrap_err();
    assert!(matches!(err, MappingError::SchemaSync { .. }));
    assert!(
        !session
            .schema_sync()
            .is_synced(TypeId::of::<ProfileV1>(), KEYSPACE)
            .await
    );

    session.driver().clear_failures();
    session.driver().clear_history();
    session.save(&profile()).await.unwrap();
    let executed = session.driver().executed();
    assert!(executed[0].starts_with("CREATE INDEX"));
    assert!(executed[1].starts_with("INSERT"));
    assert!(
        session
            .schema_sync()
            .is_synced(TypeId::of::<ProfileV1>(), KEYSPACE)
            .await
    );
}

#[tokio::test]
async fn dropping_resets_sync_state() {
    let session = MappingSession::new(KEYSPACE, driver());
    session.save(&profile()).await.unwrap();

    session.drop::<ProfileV1>().await.unwrap();
    assert!(
        !session
            .schema_sync()
            .is_synced(TypeId::of::<ProfileV1>(), KEYSPACE)
            .await
    );
    assert!(
        session
            .driver()
            .table_definition(KEYSPACE, "profiles")
            .await
            .unwrap()
            .is_none()
    );

    // the next use re-creates the table
    assert!(session.get::<ProfileV1>("p-1").await.unwrap().is_none());
    session.save(&profile()).await.unwrap();
    assert!(session.get::<ProfileV1>("p-1").await.unwrap().is_some());

    let all = vec![metadata_for::<ProfileV1>().unwrap()];
    session.drop_all(&all).await.unwrap();
    session.sync_all(&all).await.unwrap();
    assert!(session.get::<ProfileV1>("p-1").await.unwrap().is_none());

    // the shared coordinator drops tables directly as well
    session
        .schema_sync()
        .drop_table(session.driver(), KEYSPACE, &all[0])
        .await
        .unwrap();
    assert!(
        !session
            .schema_sync()
            .is_synced(TypeId::of::<ProfileV1>(), KEYSPACE)
            .await
    );
    assert!(live_profiles_missing(session.driver()).await);
}

async fn live_profiles_missing(driver: &MemoryDriver) -> bool {
    driver
        .table_definition(KEYSPACE, "profiles")
        .await
        .unwrap()
        .is_none()
}

#[tokio::test]
async fn disabled_sync_uses_the_schema_as_is() {
    let session = MappingSession::new(KEYSPACE, driver());
    session.set_sync_options(SyncOptions::new(SyncFlags {
        do_not_sync: true,
        ..SyncFlags::default()
    }));

    let err = session.save(&profile()).await.unwrap_err();
    assert!(matches!(err, MappingError::Driver(_)));
    assert!(session.driver().executed()[0].starts_with("INSERT"));
}

#[tokio::test]
async fn missing_keyspaces_fail_synchronization() {
    let session = MappingSession::new("nowhere", driver());
    let err = session.maybe_sync::<ProfileV1>().await.unwrap_err();
    assert!(matches!(err, MappingError::Driver(_)));
}

#[tokio::test]
async fn sessions_build_from_configuration() {
    let config = SessionConfig::from_json(
        r#"{ "keyspace": "accounts", "sync": { "do_not_drop_columns": true }, "cache_capacity": 4 }"#,
    )
    .unwrap();
    let driver = MemoryDriver::connect(
        ConnectionConfig::new("127.0.0.1:9042").keyspace(config.keyspace.clone()),
    )
    .await
    .unwrap();
    let session = MappingSession::from_config(config, driver);

    assert!(session.sync_options().global().do_not_drop_columns);
    session.save(&profile()).await.unwrap();
    let loaded: ProfileV1 = session.get("p-1").await.unwrap().unwrap();
    assert_eq!(loaded, profile());
}
