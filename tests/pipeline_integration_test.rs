// ABOUTME: End-to-end pipeline tests against an in-memory object store
// ABOUTME: A scripted source database writes export files so all three phases run for real

use async_trait::async_trait;
use object_store::memory::InMemory;
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;
use stage_migrator::config::MigrationConfig;
use stage_migrator::database::{DatabaseConnector, DatabaseError, SqlSession};
use stage_migrator::manifest::TableList;
use stage_migrator::migration::{MigrationPipeline, Operation, Phase, PhaseSet, TableOutcome};
use stage_migrator::storage::ObjectStoreClient;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

const MIB: usize = 1024 * 1024;

fn config_text(export_dir: &Path, delete_staged: bool) -> String {
    format!(
        r#"
        SOURCE_DRIVER = "postgres"
        SOURCE_DATABASE_HOST_NAME = "source.test"
        SOURCE_DATABASE_PORT = 50000
        SOURCE_USE_SSL_CONNECTION = false
        SOURCE_DATABASE_NAME = "SRC"
        SOURCE_DATABASE_USERNAME = "exporter"
        SOURCE_DATABASE_PASSWORD = "pw"
        TARGET_DRIVER = "postgres"
        TARGET_DATABASE_HOST_NAME = "target.test"
        TARGET_DATABASE_PORT = 50001
        TARGET_USE_SSL_CONNECTION = true
        TARGET_DATABASE_NAME = "DST"
        TARGET_DATABASE_USERNAME = "loader"
        TARGET_DATABASE_PASSWORD = "pw"
        TARGET_USE_TIMESTAMP_FORMAT = false
        TARGET_LOAD_ARGS = "DELIMITER '|'"
        TABLE_NAMES_FILE = "tables.txt"
        EXPORT_FILE_LOCATION = {:?}
        BUCKET_NAME = "staging"
        API_KEY = "ak"
        SERVICE_INSTANCE_ID = "sk"
        SERVICE_ENDPOINT = "s3.test.example.com"
        LOCATION = "us-east"
        IAM_ENDPOINT = "https://iam.test.example.com/identity/token"
        CLIENT_TIMEOUT = 1000
        ACCESS_KEY_ID = "hmac-ak"
        SECRET_ACCESS_KEY = "hmac-sk"
        CHUNK_SIZE_MB = 5
        DELETE_STAGED_OBJECTS = {}
        "#,
        export_dir.display().to_string(),
        delete_staged
    )
}

/// Deterministic export contents: `size` bytes derived from the table name
fn export_bytes(table: &str, size: usize) -> Vec<u8> {
    table.bytes().cycle().take(size).collect()
}

/// Plays the part of the source server (writes export files) and of the
/// target server (records the load statements it receives)
struct ScriptedDatabases {
    export_dir: PathBuf,
    export_sizes: Vec<(String, usize)>,
    loads: Arc<Mutex<Vec<String>>>,
}

struct ScriptedSession {
    export_dir: PathBuf,
    export_sizes: Vec<(String, usize)>,
    loads: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl SqlSession for ScriptedSession {
    async fn query_count(&self, sql: &str) -> Result<u64, DatabaseError> {
        let table = sql
            .rsplit("select * from ")
            .next()
            .unwrap()
            .trim_end_matches("')");
        let size = self
            .export_sizes
            .iter()
            .find(|(name, _)| name == table)
            .map(|(_, size)| *size)
            .ok_or_else(|| DatabaseError::SqlExecution(format!("SQL0204N {} not found", table)))?;

        std::fs::write(
            self.export_dir.join(format!("{}.csv", table)),
            export_bytes(table, size),
        )
        .unwrap();
        Ok(size as u64 / 10)
    }

    async fn execute(&self, sql: &str) -> Result<u64, DatabaseError> {
        self.loads.lock().unwrap().push(sql.to_string());
        Ok(42)
    }
}

#[async_trait]
impl DatabaseConnector for ScriptedDatabases {
    async fn connect_source(&self) -> Result<Box<dyn SqlSession>, DatabaseError> {
        Ok(Box::new(self.session()))
    }

    async fn connect_target(&self) -> Result<Box<dyn SqlSession>, DatabaseError> {
        Ok(Box::new(self.session()))
    }
}

impl ScriptedDatabases {
    fn session(&self) -> ScriptedSession {
        ScriptedSession {
            export_dir: self.export_dir.clone(),
            export_sizes: self.export_sizes.clone(),
            loads: self.loads.clone(),
        }
    }
}

async fn object_bytes(store: &InMemory, key: &str) -> Option<Vec<u8>> {
    match store.get(&ObjectPath::from(key)).await {
        Ok(result) => Some(result.bytes().await.unwrap().to_vec()),
        Err(object_store::Error::NotFound { .. }) => None,
        Err(e) => panic!("unexpected store error: {}", e),
    }
}

#[tokio::test]
async fn test_runall_stages_and_loads_every_table() {
    let export_dir = tempfile::tempdir().unwrap();
    let config = MigrationConfig::from_toml_str(&config_text(export_dir.path(), false)).unwrap();
    assert_eq!(config.store.chunk_size, 5 * MIB);

    let sizes = vec![
        ("ORDERS".to_string(), 12 * MIB),
        ("ITEMS".to_string(), 5 * MIB),
        ("EMPTY".to_string(), 0),
    ];
    let databases = ScriptedDatabases {
        export_dir: export_dir.path().to_path_buf(),
        export_sizes: sizes.clone(),
        loads: Arc::default(),
    };
    let memory = Arc::new(InMemory::new());
    let store = ObjectStoreClient::with_store("staging", memory.clone());
    let tables = TableList::parse("ORDERS\nITEMS\nEMPTY\n").unwrap();

    let report = MigrationPipeline::new(&config, &tables, &databases, &store)
        .run(&PhaseSet::from_operations(&[Operation::Runall]).unwrap())
        .await;

    assert!(!report.has_failures(), "{:?}", report.summary_lines());

    let parts: Vec<(String, u32)> = report
        .entries()
        .iter()
        .filter_map(|entry| match &entry.outcome {
            TableOutcome::Transferred(result) => Some((entry.table.clone(), result.part_count)),
            _ => None,
        })
        .collect();
    assert_eq!(
        parts,
        vec![
            ("ORDERS".to_string(), 3),
            ("ITEMS".to_string(), 1),
            ("EMPTY".to_string(), 0),
        ]
    );

    for (table, size) in &sizes {
        let staged = object_bytes(&memory, &format!("{}.csv", table))
            .await
            .expect("object should be staged");
        assert_eq!(staged, export_bytes(table, *size), "contents of {}", table);
    }

    let loads = databases.loads.lock().unwrap().clone();
    assert_eq!(loads.len(), 3);
    assert!(loads[0].starts_with("insert into ORDERS select * from external 'ORDERS.csv'"));
    assert!(loads[0].contains("'hmac-ak', 'hmac-sk', 'staging'"));
    assert!(loads[2].starts_with("insert into EMPTY "));
}

#[tokio::test]
async fn test_unknown_table_fails_alone_and_others_still_load() {
    let export_dir = tempfile::tempdir().unwrap();
    let config = MigrationConfig::from_toml_str(&config_text(export_dir.path(), false)).unwrap();
    let databases = ScriptedDatabases {
        export_dir: export_dir.path().to_path_buf(),
        export_sizes: vec![("A".to_string(), 1024), ("C".to_string(), 2048)],
        loads: Arc::default(),
    };
    let memory = Arc::new(InMemory::new());
    let store = ObjectStoreClient::with_store("staging", memory.clone());
    let tables = TableList::parse("A\nB\nC\n").unwrap();
    // Left over from an earlier run; must not be staged after B's export fails
    std::fs::write(export_dir.path().join("B.csv"), b"stale").unwrap();

    let report = MigrationPipeline::new(&config, &tables, &databases, &store)
        .run(&PhaseSet::from_operations(&[Operation::Export, Operation::Put]).unwrap())
        .await;

    let failures: Vec<(Phase, String)> = report
        .failures()
        .map(|f| (f.phase, f.table.clone()))
        .collect();
    assert_eq!(failures, vec![(Phase::Export, "B".to_string())]);
    let skipped: Vec<(Phase, String)> = report
        .skipped()
        .map(|s| (s.phase, s.table.clone()))
        .collect();
    assert_eq!(skipped, vec![(Phase::Transfer, "B".to_string())]);
    assert_eq!(report.succeeded(Phase::Transfer), 2);
    assert!(object_bytes(&memory, "A.csv").await.is_some());
    assert!(object_bytes(&memory, "B.csv").await.is_none());
    assert!(object_bytes(&memory, "C.csv").await.is_some());
    assert!(databases.loads.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_load_removes_staged_objects_when_configured() {
    let export_dir = tempfile::tempdir().unwrap();
    let config = MigrationConfig::from_toml_str(&config_text(export_dir.path(), true)).unwrap();
    let databases = ScriptedDatabases {
        export_dir: export_dir.path().to_path_buf(),
        export_sizes: vec![("T1".to_string(), 100)],
        loads: Arc::default(),
    };
    let memory = Arc::new(InMemory::new());
    let store = ObjectStoreClient::with_store("staging", memory.clone());
    let tables = TableList::parse("T1").unwrap();

    let report = MigrationPipeline::new(&config, &tables, &databases, &store)
        .run(&PhaseSet::all())
        .await;

    assert!(!report.has_failures());
    assert_eq!(report.succeeded(Phase::Load), 1);
    assert!(object_bytes(&memory, "T1.csv").await.is_none());
}
