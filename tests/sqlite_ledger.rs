//! End-to-end ledger runs against a real SQLite database.

use schema_ledger::{
    ChangeId, ChangeRecord, DefaultValue, Direction, FieldSpec, FieldType, LedgerEngine,
    LedgerError, LedgerStore, Operation, ReferentialAction, SqliteExecutor, StaticSource,
};
use sqlx::Row;
use tempfile::TempDir;

async fn connect(dir: &TempDir) -> SqliteExecutor {
    let db_path = dir.path().join("ledger.db");
    SqliteExecutor::connect(&format!("sqlite:{}", db_path.display()))
        .await
        .unwrap()
}

async fn table_names(pool: &sqlx::SqlitePool) -> Vec<String> {
    sqlx::query("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
        .fetch_all(pool)
        .await
        .unwrap()
        .iter()
        .map(|row| row.try_get::<String, _>("name").unwrap())
        .collect()
}

async fn column_names(pool: &sqlx::SqlitePool, table: &str) -> Vec<String> {
    sqlx::query("SELECT name FROM pragma_table_info(?1) ORDER BY cid")
        .bind(table)
        .fetch_all(pool)
        .await
        .unwrap()
        .iter()
        .map(|row| row.try_get::<String, _>("name").unwrap())
        .collect()
}

fn id(s: &str) -> ChangeId {
    ChangeId::new(s).unwrap()
}

/// The change series of a small school-administration database.
fn school_records() -> Vec<ChangeRecord> {
    vec![
        ChangeRecord::new(
            id("m20240101_000001_create_students"),
            "create students",
            vec![Operation::CreateEntity {
                entity: "students".to_string(),
                fields: vec![
                    FieldSpec::new("id", FieldType::Integer).primary_key(),
                    FieldSpec::new("full_name", FieldType::Text),
                    FieldSpec::new("enrolled_on", FieldType::Date).nullable(),
                ],
            }],
            vec![Operation::DropEntity {
                entity: "students".to_string(),
            }],
        ),
        ChangeRecord::new(
            id("m20240115_000002_create_guardians_and_payments"),
            "create guardians and payments",
            vec![
                Operation::CreateEntity {
                    entity: "guardians".to_string(),
                    fields: vec![
                        FieldSpec::new("id", FieldType::Integer).primary_key(),
                        FieldSpec::new("full_name", FieldType::Text),
                        FieldSpec::new("email", FieldType::Text).nullable().unique(),
                    ],
                },
                Operation::CreateEntity {
                    entity: "payments".to_string(),
                    fields: vec![
                        FieldSpec::new("id", FieldType::Integer).primary_key(),
                        FieldSpec::new("student_id", FieldType::Integer),
                        FieldSpec::new(
                            "amount",
                            FieldType::Decimal {
                                precision: 10,
                                scale: 2,
                            },
                        ),
                        FieldSpec::new("paid_on", FieldType::Date).nullable(),
                    ],
                },
                // Same record as the entity creation it depends on.
                Operation::AddRelation {
                    entity: "payments".to_string(),
                    name: "fk_payments_student".to_string(),
                    field: "student_id".to_string(),
                    references: "students".to_string(),
                    referenced_field: "id".to_string(),
                    on_delete: ReferentialAction::Cascade,
                },
            ],
            vec![
                Operation::DropEntity {
                    entity: "guardians".to_string(),
                },
                Operation::DropEntity {
                    entity: "payments".to_string(),
                },
                Operation::DropRelation {
                    entity: "payments".to_string(),
                    name: "fk_payments_student".to_string(),
                },
            ],
        ),
        ChangeRecord::new(
            id("m20240201_000003_add_student_contact"),
            "add student contact",
            vec![
                Operation::AddField {
                    entity: "students".to_string(),
                    field: FieldSpec::new("guardian_phone", FieldType::Text)
                        .nullable()
                        .max_length(32),
                },
                Operation::CreateIndex {
                    entity: "students".to_string(),
                    name: "idx_students_guardian_phone".to_string(),
                    fields: vec!["guardian_phone".to_string()],
                    unique: false,
                },
            ],
            vec![
                Operation::DropField {
                    entity: "students".to_string(),
                    field: "guardian_phone".to_string(),
                },
                Operation::DropIndex {
                    entity: "students".to_string(),
                    name: "idx_students_guardian_phone".to_string(),
                },
            ],
        ),
        ChangeRecord::new(
            id("m20240301_000004_rename_guardian_phone"),
            "rename guardian phone",
            vec![Operation::RenameField {
                entity: "students".to_string(),
                from: "guardian_phone".to_string(),
                to: "contact_phone".to_string(),
            }],
            vec![Operation::RenameField {
                entity: "students".to_string(),
                from: "contact_phone".to_string(),
                to: "guardian_phone".to_string(),
            }],
        ),
    ]
}

#[tokio::test]
async fn test_full_series_up_down_up() {
    let dir = TempDir::new().unwrap();
    let engine = LedgerEngine::new(StaticSource::new(school_records()), connect(&dir).await);

    let applied = engine.migrate(Direction::Up, None).await.unwrap();
    assert_eq!(applied.len(), 4);
    assert_eq!(engine.executor().entries().await.unwrap().len(), 4);

    let pool = engine.executor().pool();
    let tables = table_names(pool).await;
    assert!(tables.contains(&"students".to_string()));
    assert!(tables.contains(&"guardians".to_string()));
    assert!(tables.contains(&"payments".to_string()));

    let student_columns = column_names(pool, "students").await;
    assert_eq!(
        student_columns,
        vec!["id", "full_name", "enrolled_on", "contact_phone"]
    );

    // Down to the first change: only the original students table remains.
    let first = id("m20240101_000001_create_students");
    let reverted = engine.migrate(Direction::Down, Some(&first)).await.unwrap();
    assert_eq!(reverted.len(), 3);
    assert_eq!(engine.executor().entries().await.unwrap().len(), 1);

    let tables = table_names(pool).await;
    assert!(tables.contains(&"students".to_string()));
    assert!(!tables.contains(&"guardians".to_string()));
    assert!(!tables.contains(&"payments".to_string()));
    assert_eq!(
        column_names(pool, "students").await,
        vec!["id", "full_name", "enrolled_on"]
    );

    // Back up: both up endpoints produce the same shape.
    engine.migrate(Direction::Up, None).await.unwrap();
    assert_eq!(
        column_names(pool, "students").await,
        vec!["id", "full_name", "enrolled_on", "contact_phone"]
    );
    assert_eq!(engine.executor().entries().await.unwrap().len(), 4);
}

#[tokio::test]
async fn test_relation_bookkeeping_follows_ledger() {
    let dir = TempDir::new().unwrap();
    let engine = LedgerEngine::new(StaticSource::new(school_records()), connect(&dir).await);
    engine.migrate(Direction::Up, None).await.unwrap();

    let pool = engine.executor().pool();
    let row = sqlx::query(
        "SELECT on_delete FROM schema_relation WHERE entity = 'payments' AND name = 'fk_payments_student'",
    )
    .fetch_one(pool)
    .await
    .unwrap();
    let on_delete: String = row.try_get("on_delete").unwrap();
    assert_eq!(on_delete, "cascade");

    let first = id("m20240101_000001_create_students");
    engine.migrate(Direction::Down, Some(&first)).await.unwrap();

    let rows = sqlx::query("SELECT name FROM schema_relation")
        .fetch_all(pool)
        .await
        .unwrap();
    assert!(rows.is_empty());
}

#[tokio::test]
async fn test_apply_out_of_order_fails_and_ledger_stays_empty() {
    let dir = TempDir::new().unwrap();
    let engine = LedgerEngine::new(StaticSource::new(school_records()), connect(&dir).await);

    // The relation in the second record references students, which the
    // skipped first record would have created.
    let second = school_records().remove(1);
    let err = engine.apply(&second).await.unwrap_err();
    match err {
        LedgerError::ChangeFailed { source, .. } => {
            assert!(matches!(*source, LedgerError::DependencyMissing(_)));
        }
        other => panic!("expected ChangeFailed, got {:?}", other),
    }
    assert!(engine.executor().entries().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_alter_field_type_rebuild_preserves_rows() {
    let dir = TempDir::new().unwrap();
    let records = vec![
        ChangeRecord::new(
            id("m20240501_000001_create_scores"),
            "create scores",
            vec![Operation::CreateEntity {
                entity: "scores".to_string(),
                fields: vec![
                    FieldSpec::new("id", FieldType::Integer).primary_key(),
                    FieldSpec::new("student_email", FieldType::Text).unique(),
                    FieldSpec::new("points", FieldType::Text),
                ],
            }],
            vec![Operation::DropEntity {
                entity: "scores".to_string(),
            }],
        ),
        ChangeRecord::new(
            id("m20240502_000002_points_to_integer"),
            "store points as integers",
            vec![Operation::AlterFieldType {
                entity: "scores".to_string(),
                field: "points".to_string(),
                field_type: FieldType::Integer,
                nullable: false,
            }],
            vec![Operation::AlterFieldType {
                entity: "scores".to_string(),
                field: "points".to_string(),
                field_type: FieldType::Text,
                nullable: false,
            }],
        ),
    ];
    let engine = LedgerEngine::new(StaticSource::new(records), connect(&dir).await);

    let first = id("m20240501_000001_create_scores");
    engine.migrate(Direction::Up, Some(&first)).await.unwrap();

    let pool = engine.executor().pool();
    sqlx::query("INSERT INTO scores (id, student_email, points) VALUES (1, 'ada@school.example', '95')")
        .execute(pool)
        .await
        .unwrap();

    engine.migrate(Direction::Up, None).await.unwrap();

    // The row survived the rebuild and now reads back as an integer.
    let row = sqlx::query("SELECT points FROM scores WHERE id = 1")
        .fetch_one(pool)
        .await
        .unwrap();
    let points: i64 = row.try_get("points").unwrap();
    assert_eq!(points, 95);

    let row = sqlx::query("SELECT type FROM pragma_table_info('scores') WHERE name = 'points'")
        .fetch_one(pool)
        .await
        .unwrap();
    let type_name: String = row.try_get("type").unwrap();
    assert_eq!(type_name.to_lowercase(), "integer");

    // The inline UNIQUE constraint on student_email survived the rebuild.
    let duplicate = sqlx::query(
        "INSERT INTO scores (id, student_email, points) VALUES (2, 'ada@school.example', 80)",
    )
    .execute(pool)
    .await;
    assert!(duplicate.is_err());
}

#[tokio::test]
async fn test_conflicting_create_surfaces_and_stops_migration() {
    let dir = TempDir::new().unwrap();
    let records = vec![
        ChangeRecord::new(
            id("m20240601_000001_create_homework"),
            "create homework",
            vec![Operation::CreateEntity {
                entity: "homework".to_string(),
                fields: vec![FieldSpec::new("id", FieldType::Integer).primary_key()],
            }],
            vec![Operation::DropEntity {
                entity: "homework".to_string(),
            }],
        ),
        // Authoring mistake: creates the same entity again.
        ChangeRecord::new(
            id("m20240602_000002_create_homework_again"),
            "create homework again",
            vec![Operation::CreateEntity {
                entity: "homework".to_string(),
                fields: vec![FieldSpec::new("id", FieldType::Integer).primary_key()],
            }],
            vec![Operation::DropEntity {
                entity: "homework".to_string(),
            }],
        ),
    ];
    let engine = LedgerEngine::new(StaticSource::new(records), connect(&dir).await);

    let err = engine.migrate(Direction::Up, None).await.unwrap_err();
    match err {
        LedgerError::ChangeFailed {
            change, source, ..
        } => {
            assert_eq!(change, "m20240602_000002_create_homework_again");
            assert!(matches!(*source, LedgerError::OperationConflict(_)));
        }
        other => panic!("expected ChangeFailed, got {:?}", other),
    }

    // The first record stays applied; the ledger reflects exactly what ran.
    let entries = engine.executor().entries().await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(
        entries[0].change_id.as_str(),
        "m20240601_000001_create_homework"
    );
}

#[tokio::test]
async fn test_default_backfill_applies_on_revert() {
    let dir = TempDir::new().unwrap();
    // A reversed drop that backfills with an empty string: the known lossy
    // reversal shape. It must execute (with a warning), not be refused.
    let records = vec![
        ChangeRecord::new(
            id("m20240701_000001_create_teachers"),
            "create teachers",
            vec![Operation::CreateEntity {
                entity: "teachers".to_string(),
                fields: vec![
                    FieldSpec::new("id", FieldType::Integer).primary_key(),
                    FieldSpec::new("subject", FieldType::Text),
                ],
            }],
            vec![Operation::DropEntity {
                entity: "teachers".to_string(),
            }],
        ),
        ChangeRecord::new(
            id("m20240702_000002_drop_subject"),
            "drop subject",
            vec![Operation::DropField {
                entity: "teachers".to_string(),
                field: "subject".to_string(),
            }],
            vec![Operation::AddField {
                entity: "teachers".to_string(),
                field: FieldSpec::new("subject", FieldType::Text)
                    .default_value(DefaultValue::Text(String::new())),
            }],
        ),
    ];
    let engine = LedgerEngine::new(StaticSource::new(records), connect(&dir).await);
    engine.migrate(Direction::Up, None).await.unwrap();

    let pool = engine.executor().pool();
    sqlx::query("INSERT INTO teachers (id) VALUES (1)")
        .execute(pool)
        .await
        .unwrap();

    let first = id("m20240701_000001_create_teachers");
    engine.migrate(Direction::Down, Some(&first)).await.unwrap();

    // The column is back, backfilled with the constant default.
    let row = sqlx::query("SELECT subject FROM teachers WHERE id = 1")
        .fetch_one(pool)
        .await
        .unwrap();
    let subject: String = row.try_get("subject").unwrap();
    assert_eq!(subject, "");
}
