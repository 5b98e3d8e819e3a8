use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use docflat_api::{Column, ColumnType, Document, FlatValue, Scalar};
use docflat_core::codec;
use docflat_core::driver::ColumnChange;
use docflat_core::{DriverConfig, IngestError, IngestionDriver, ManualClock};
use store_memory::MemoryStore;

fn t(name: &str) -> ColumnType {
    name.parse().unwrap()
}

fn s(text: &str) -> Scalar {
    Scalar::String(text.to_string())
}

struct Fixture {
    store: Arc<MemoryStore>,
    clock: Arc<ManualClock>,
    driver: IngestionDriver,
}

async fn fixture(table: &str, columns: Vec<Column>, config: DriverConfig) -> Fixture {
    let store = Arc::new(MemoryStore::new());
    store.create_table(table, columns).await;
    let clock = Arc::new(ManualClock::new());
    let driver =
        IngestionDriver::new(store.clone(), store.clone(), clock.clone(), config).unwrap();
    Fixture { store, clock, driver }
}

fn store_doc(day: NaiveDate) -> Document {
    Document::new()
        .with("id", 3)
        .with("historydate", day)
        .with("Offer", Document::new().with("price", 5).with("count", 1))
        .with(
            "Images",
            vec![
                Document::new().with("file", "a").with("size", 400),
                Document::new().with("file", "b").with("size", 500),
            ],
        )
}

fn column_names(columns: &[Column]) -> Vec<&str> {
    columns.iter().map(|c| c.name.as_str()).collect()
}

#[tokio::test]
async fn test_store_document_evolves_table() {
    let day = NaiveDate::from_ymd_opt(2019, 6, 7).unwrap();
    let f = fixture(
        "docs",
        vec![Column::new("id", t("Int64")), Column::new("historydate", t("Date"))],
        DriverConfig::default(),
    )
    .await;

    let report = f.driver.store_documents("docs", &[store_doc(day)]).await.unwrap();

    assert_eq!(report.rows, 1);
    assert!(report.schema_refreshed);
    assert_eq!(
        report.changes,
        vec![
            ColumnChange { name: "Offer_price".into(), from: None, to: t("Int8") },
            ColumnChange { name: "Offer_count".into(), from: None, to: t("Int8") },
            ColumnChange { name: "Images_file".into(), from: None, to: t("Array(String)") },
            ColumnChange { name: "Images_size".into(), from: None, to: t("Array(Int16)") },
        ]
    );

    let table = f.store.table_columns("docs").await.unwrap();
    assert_eq!(
        table,
        vec![
            Column::new("id", t("Int64")),
            Column::new("historydate", t("Date")),
            Column::new("Offer_price", t("Int8")),
            Column::new("Offer_count", t("Int8")),
            Column::new("Images_file", t("Array(String)")),
            Column::new("Images_size", t("Array(Int16)")),
        ]
    );

    let inserts = f.store.inserts("docs").await;
    assert_eq!(inserts.len(), 1);
    assert_eq!(inserts[0].rows, vec!["3\t2019-06-07\t5\t1\t['a','b']\t[400,500]"]);

    let decoded = codec::decode(&inserts[0].rows[0], &inserts[0].columns).unwrap();
    assert!(decoded.is_clean());
    assert_eq!(decoded.row.get("historydate"), Some(&FlatValue::Scalar(Scalar::Date(day))));
    assert_eq!(
        decoded.row.get("Images_file"),
        Some(&FlatValue::Array(vec![s("a"), s("b")]))
    );
}

#[tokio::test]
async fn test_snapshot_reused_within_ttl() {
    let f = fixture("docs", vec![], DriverConfig::default()).await;
    let doc = Document::new().with("n", 1);

    let first = f.driver.store_documents("docs", &[doc.clone()]).await.unwrap();
    let second = f.driver.store_documents("docs", &[doc.clone()]).await.unwrap();

    assert!(first.schema_refreshed);
    assert!(!second.schema_refreshed);
    // The cache was updated by the first batch's evolution.
    assert!(second.changes.is_empty());
    assert_eq!(f.store.column_fetches(), 1);
    assert_eq!(f.driver.cached_columns("docs"), Some(vec![Column::new("n", t("Int8"))]));

    f.clock.advance(Duration::from_secs(61));
    let third = f.driver.store_documents("docs", &[doc]).await.unwrap();
    assert!(third.schema_refreshed);
    assert_eq!(f.store.column_fetches(), 2);
}

#[tokio::test]
async fn test_snapshot_expires_exactly_at_ttl() {
    let f = fixture("docs", vec![], DriverConfig::default().with_schema_update_time(30)).await;
    let doc = Document::new().with("n", 1);

    f.driver.store_documents("docs", &[doc.clone()]).await.unwrap();

    f.clock.advance(Duration::from_secs(29));
    let before = f.driver.store_documents("docs", &[doc.clone()]).await.unwrap();
    assert!(!before.schema_refreshed);
    assert_eq!(f.store.column_fetches(), 1);

    f.clock.advance(Duration::from_secs(1));
    let at = f.driver.store_documents("docs", &[doc]).await.unwrap();
    assert!(at.schema_refreshed);
    assert_eq!(f.store.column_fetches(), 2);
}

#[tokio::test]
async fn test_zero_ttl_fetches_every_batch() {
    let f = fixture("docs", vec![], DriverConfig::default().with_schema_update_time(0)).await;
    let doc = Document::new().with("n", 1);

    for _ in 0..3 {
        let report = f.driver.store_documents("docs", &[doc.clone()]).await.unwrap();
        assert!(report.schema_refreshed);
    }
    assert_eq!(f.store.column_fetches(), 3);
}

#[tokio::test]
async fn test_invalidate_forces_fetch() {
    let f = fixture("docs", vec![], DriverConfig::default()).await;
    let doc = Document::new().with("n", 1);

    f.driver.store_documents("docs", &[doc.clone()]).await.unwrap();
    f.driver.invalidate("docs");
    assert_eq!(f.driver.cached_columns("docs"), None);

    let report = f.driver.store_documents("docs", &[doc]).await.unwrap();
    assert!(report.schema_refreshed);
    assert_eq!(f.store.column_fetches(), 2);
}

#[tokio::test]
async fn test_existing_column_is_widened() {
    let f = fixture("docs", vec![Column::new("n", t("Int8"))], DriverConfig::default()).await;

    let report = f
        .driver
        .store_documents("docs", &[Document::new().with("n", 0.5)])
        .await
        .unwrap();

    assert_eq!(
        report.changes,
        vec![ColumnChange { name: "n".into(), from: Some(t("Int8")), to: t("Float64") }]
    );
    assert_eq!(
        f.store.table_columns("docs").await.unwrap(),
        vec![Column::new("n", t("Float64"))]
    );
    assert_eq!(f.store.inserts("docs").await[0].rows, vec!["0.5"]);
}

#[tokio::test]
async fn test_wider_table_column_is_kept() {
    let f = fixture("docs", vec![Column::new("n", t("Int64"))], DriverConfig::default()).await;

    let report = f
        .driver
        .store_documents("docs", &[Document::new().with("n", 7)])
        .await
        .unwrap();

    assert!(report.changes.is_empty());
    assert_eq!(report.columns, vec![Column::new("n", t("Int64"))]);
}

#[tokio::test]
async fn test_deeply_nested_array_goes_to_json_column() {
    let f = fixture("docs", vec![], DriverConfig::default()).await;
    let doc = Document::new().with("id", 3).with(
        "Images",
        vec![
            Document::new().with("file", "a").with("tags", vec!["cool", "Nikon"]),
            Document::new().with("file", "b"),
        ],
    );

    let report = f.driver.store_documents("docs", &[doc]).await.unwrap();

    assert_eq!(column_names(&report.columns), ["id", "Images_json"]);
    assert_eq!(report.columns[1].column_type, t("String"));
    let inserts = f.store.inserts("docs").await;
    let decoded = codec::decode(&inserts[0].rows[0], &inserts[0].columns).unwrap();
    assert_eq!(
        decoded.row.get("Images_json"),
        Some(&FlatValue::Scalar(s(
            r#"[{"file":"a","tags":["cool","Nikon"]},{"file":"b"}]"#
        )))
    );
}

#[tokio::test]
async fn test_shape_conflict_within_batch_reroutes_to_json() {
    let f = fixture("docs", vec![], DriverConfig::default()).await;
    let docs = [
        Document::new().with("id", 1).with("x", 1),
        Document::new().with("id", 2).with("x", vec![1, 2]),
    ];

    let report = f.driver.store_documents("docs", &docs).await.unwrap();

    assert_eq!(report.json_fallbacks, vec!["x"]);
    assert_eq!(
        report.columns,
        vec![Column::new("id", t("Int8")), Column::new("x_json", t("String"))]
    );
    assert_eq!(f.store.inserts("docs").await[0].rows, vec!["1\t1", "2\t[1,2]"]);
}

#[tokio::test]
async fn test_shape_conflict_with_table_reroutes_to_json() {
    let f = fixture(
        "docs",
        vec![Column::new("tags", t("Array(String)"))],
        DriverConfig::default(),
    )
    .await;

    let report = f
        .driver
        .store_documents("docs", &[Document::new().with("tags", "solo")])
        .await
        .unwrap();

    assert_eq!(report.json_fallbacks, vec!["tags"]);
    assert_eq!(report.columns, vec![Column::new("tags_json", t("String"))]);
    assert_eq!(f.store.inserts("docs").await[0].rows, vec![r#""solo""#]);
    // The existing array column is untouched.
    assert_eq!(
        f.store.table_columns("docs").await.unwrap()[0],
        Column::new("tags", t("Array(String)"))
    );
}

#[tokio::test]
async fn test_failed_evolution_fails_batch() {
    let f = fixture("docs", vec![Column::new("n", t("Int8"))], DriverConfig::default()).await;
    f.store.freeze_column("docs", "n").await;

    let err = f
        .driver
        .store_documents("docs", &[Document::new().with("n", 1_000)])
        .await
        .unwrap_err();

    match err {
        IngestError::SchemaEvolution { table, column, column_type, .. } => {
            assert_eq!(table, "docs");
            assert_eq!(column, "n");
            assert_eq!(column_type, t("Int16"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(f.store.inserts("docs").await.is_empty());
    assert_eq!(f.driver.cached_columns("docs"), None);
}

#[tokio::test]
async fn test_unknown_table_is_fetch_error() {
    let f = fixture("docs", vec![], DriverConfig::default()).await;

    let err = f
        .driver
        .store_documents("missing", &[Document::new().with("n", 1)])
        .await
        .unwrap_err();

    assert!(matches!(err, IngestError::SchemaFetch { ref table, .. } if table == "missing"));
}

#[tokio::test]
async fn test_inserts_are_chunked() {
    let config = DriverConfig { insert_batch_size: 2, ..DriverConfig::default() };
    let f = fixture("docs", vec![], config).await;
    let docs: Vec<Document> = (0..5).map(|i| Document::new().with("n", i)).collect();

    let report = f.driver.store_documents("docs", &docs).await.unwrap();

    assert_eq!(report.rows, 5);
    let sizes: Vec<usize> = f.store.inserts("docs").await.iter().map(|b| b.rows.len()).collect();
    assert_eq!(sizes, [2, 2, 1]);
}

#[tokio::test]
async fn test_empty_batch_touches_nothing() {
    let f = fixture("docs", vec![], DriverConfig::default()).await;

    let report = f.driver.store_documents("docs", &[]).await.unwrap();

    assert_eq!(report.rows, 0);
    assert_eq!(f.store.column_fetches(), 0);
    assert!(f.store.inserts("docs").await.is_empty());
}

#[tokio::test]
async fn test_missing_fields_are_null() {
    let f = fixture("docs", vec![], DriverConfig::default()).await;
    let docs = [
        Document::new().with("a", 1),
        Document::new().with("b", "x"),
    ];

    f.driver.store_documents("docs", &docs).await.unwrap();

    assert_eq!(f.store.inserts("docs").await[0].rows, vec!["1\t\\N", "\\N\tx"]);
}

#[tokio::test]
async fn test_store_json() {
    let f = fixture("docs", vec![], DriverConfig::default()).await;
    let values = vec![
        serde_json::json!({"id": 1, "meta": {"ok": true}}),
        serde_json::json!({"id": 2, "meta": {"ok": false}, "score": 1.5}),
    ];

    let report = f.driver.store_json("docs", values).await.unwrap();

    assert_eq!(column_names(&report.columns), ["id", "meta_ok", "score"]);
    assert_eq!(f.store.inserts("docs").await[0].rows, vec!["1\t1\t\\N", "2\t0\t1.5"]);

    let err = f
        .driver
        .store_json("docs", vec![serde_json::json!([1, 2])])
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::InvalidDocument(_)));
}

#[tokio::test]
async fn test_store_json_keeps_field_order() {
    let f = fixture("docs", vec![], DriverConfig::default()).await;
    let values = vec![serde_json::json!({
        "zeta": 1,
        "alpha": "a",
        "Images": [{"tags": ["x"], "file": "f"}],
    })];

    let report = f.driver.store_json("docs", values).await.unwrap();

    assert_eq!(column_names(&report.columns), ["zeta", "alpha", "Images_json"]);
    assert_eq!(
        f.store.inserts("docs").await[0].rows,
        vec!["1\ta\t[{\"tags\":[\"x\"],\"file\":\"f\"}]"]
    );
}
