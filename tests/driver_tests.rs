//! End-to-end tests of the driver session on the embedded engine, plus the
//! PostgreSQL-only paths driven through a scripted transport.

#[cfg(test)]
mod tests {
    use pgdriver::core::db::schema::TableKey;
    use pgdriver::core::db::transport::RawResult;
    use pgdriver::core::db::ColumnInfo;
    use pgdriver::test_utils::{scripted_database, DatabaseFixture, ScriptedTransport, DBTEST_ROWS};
    use pgdriver::{CursorState, Database, DriverError, TransactionState, Value};
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, Deserialize, PartialEq)]
    struct DbTest {
        id: i64,
        title: String,
        start_date: String,
        description: String,
    }

    fn init_tracing() {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    }

    fn expected(index: usize) -> DbTest {
        let (id, title, description) = DBTEST_ROWS[index];
        DbTest {
            id,
            title: title.to_string(),
            start_date: "1980-04-18 00:00:00".to_string(),
            description: description.to_string(),
        }
    }

    /// Catalog row for the serial sequence behind `jos_dbtest.id`
    fn dbtest_sequence() -> RawResult {
        RawResult::new(
            ["sequence", "schema", "table", "column", "data_type", "start_value", "minimum_value", "maximum_value", "increment", "cycle_option"]
                .iter()
                .map(|name| ColumnInfo::new(*name, "text"))
                .collect(),
            vec![["jos_dbtest_id_seq", "public", "jos_dbtest", "id", "bigint", "1", "1", "9223372036854775807", "1", "NO"]
                .iter()
                .map(|v| Value::from(*v))
                .collect()],
        )
    }

    /// Statements without the long catalog lookups
    fn without_catalog(statements: Vec<String>) -> Vec<String> {
        statements
            .into_iter()
            .filter(|sql| !sql.starts_with("SELECT s.relname"))
            .collect()
    }

    fn select_all(db: &mut Database) {
        db.set_query("SELECT * FROM #__dbtest ORDER BY id");
    }

    fn count_where(db: &mut Database, description: &str) -> usize {
        let sql = format!(
            "SELECT * FROM jos_dbtest WHERE description = {}",
            db.quote(description, true)
        );
        db.set_query(sql);
        db.load_row_list().unwrap().len()
    }

    #[test]
    fn test_load_next_object_exhaustion_is_terminal() {
        init_tracing();
        let mut fixture = DatabaseFixture::new().unwrap();
        select_all(&mut fixture.db);
        fixture.db.execute().unwrap();

        for index in 0..4 {
            assert_eq!(fixture.db.load_next_object::<DbTest>().unwrap(), Some(expected(index)));
        }
        for _ in 0..3 {
            assert_eq!(fixture.db.load_next_object::<DbTest>().unwrap(), None);
        }
        assert_eq!(fixture.db.cursor().unwrap().state(), CursorState::Exhausted);
    }

    #[test]
    fn test_load_object_then_next_objects_share_position() {
        let mut fixture = DatabaseFixture::new().unwrap();
        select_all(&mut fixture.db);

        assert_eq!(fixture.db.load_object::<DbTest>().unwrap(), Some(expected(0)));
        assert_eq!(fixture.db.load_next_object::<DbTest>().unwrap(), Some(expected(1)));
        assert_eq!(fixture.db.load_next_object::<DbTest>().unwrap(), Some(expected(2)));
        assert_eq!(fixture.db.load_next_object::<DbTest>().unwrap(), Some(expected(3)));
        assert_eq!(fixture.db.load_next_object::<DbTest>().unwrap(), None);
    }

    #[test]
    fn test_mixed_accessors_never_skip_rows() {
        let mut fixture = DatabaseFixture::new().unwrap();
        select_all(&mut fixture.db);

        let first = fixture.db.load_next_row().unwrap().unwrap();
        assert_eq!(first[0], Value::Integer(1));

        let second = fixture.db.load_assoc().unwrap().unwrap();
        assert_eq!(second.get("title"), Some(&Value::from("Testing2")));

        assert_eq!(fixture.db.load_result().unwrap(), Some(Value::Integer(3)));

        let rest = fixture.db.load_row_list().unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0][1], Value::from("Testing4"));

        assert!(fixture.db.load_row().unwrap().is_none());
        assert!(fixture.db.load_column().unwrap().is_empty());
    }

    #[test]
    fn test_set_query_starts_a_fresh_cursor() {
        let mut fixture = DatabaseFixture::new().unwrap();
        select_all(&mut fixture.db);
        assert_eq!(fixture.db.load_row_list().unwrap().len(), 4);
        assert!(fixture.db.load_next_row().unwrap().is_none());

        select_all(&mut fixture.db);
        assert_eq!(fixture.db.load_next_row().unwrap().unwrap()[0], Value::Integer(1));
    }

    #[test]
    fn test_loaders_render_timestamps() {
        let mut fixture = DatabaseFixture::new().unwrap();
        fixture.db.set_query("SELECT * FROM jos_dbtest WHERE id = 3");
        let row = fixture.db.load_row().unwrap().unwrap();
        assert_eq!(row[2].to_string(), "1980-04-18 00:00:00");

        fixture.db.set_query("SELECT start_date FROM jos_dbtest WHERE id = 3");
        let assoc = fixture.db.load_assoc().unwrap().unwrap();
        assert_eq!(assoc.get("start_date").unwrap().to_string(), "1980-04-18 00:00:00");
    }

    #[test]
    fn test_list_loaders() {
        let mut fixture = DatabaseFixture::new().unwrap();

        fixture.db.set_query("SELECT title FROM jos_dbtest ORDER BY id");
        let titles: Vec<String> = fixture
            .db
            .load_assoc_list()
            .unwrap()
            .iter()
            .map(|assoc| assoc.get("title").unwrap().to_string())
            .collect();
        assert_eq!(titles, ["Testing", "Testing2", "Testing3", "Testing4"]);

        fixture.db.set_query("SELECT title FROM jos_dbtest ORDER BY id");
        assert_eq!(
            fixture.db.load_column().unwrap(),
            vec![
                Value::from("Testing"),
                Value::from("Testing2"),
                Value::from("Testing3"),
                Value::from("Testing4")
            ]
        );

        select_all(&mut fixture.db);
        let objects: Vec<DbTest> = fixture.db.load_object_list().unwrap();
        assert_eq!(objects, (0..4).map(expected).collect::<Vec<_>>());

        select_all(&mut fixture.db);
        let keyed = fixture.db.load_assoc_list_by("id").unwrap();
        assert_eq!(keyed[3].0, "4");
        assert_eq!(keyed[3].1.get("description"), Some(&Value::from("four")));

        select_all(&mut fixture.db);
        assert_eq!(fixture.db.load_column_at(3).unwrap()[2], Value::from("three"));
    }

    #[test]
    fn test_cursor_iterator() {
        let mut fixture = DatabaseFixture::new().unwrap();
        let cursor = fixture.db.query("SELECT id FROM jos_dbtest ORDER BY id").unwrap();
        let ids: Vec<i64> = cursor.filter_map(|row| row.get(0).and_then(Value::as_i64)).collect();
        assert_eq!(ids, [1, 2, 3, 4]);
    }

    #[test]
    fn test_rollback_to_savepoint_then_commit() {
        init_tracing();
        let mut fixture = DatabaseFixture::new().unwrap();
        let db = &mut fixture.db;

        db.transaction_start().unwrap();
        db.query("INSERT INTO jos_dbtest (id, title, start_date, description) VALUES (7, 'testRollback', '1970-01-01', 'testRollbackSp')")
            .unwrap();
        db.transaction_savepoint("transactionSavepoint").unwrap();
        db.query("INSERT INTO jos_dbtest (id, title, start_date, description) VALUES (8, 'testRollback', '1972-01-01', 'testRollbackSp')")
            .unwrap();

        db.transaction_rollback(Some("transactionSavepoint")).unwrap();
        assert_eq!(db.transaction_state(), TransactionState::Active);
        assert!(db.savepoints().is_empty());
        db.transaction_commit().unwrap();

        assert_eq!(count_where(db, "testRollbackSp"), 1);
    }

    #[test]
    fn test_savepoint_undoes_only_later_work() {
        let mut fixture = DatabaseFixture::new().unwrap();
        let db = &mut fixture.db;

        db.transaction_start().unwrap();
        db.transaction_savepoint("a").unwrap();
        db.query("INSERT INTO jos_dbtest (title, start_date, description) VALUES ('X', '1970-01-01', 'sp')")
            .unwrap();
        db.transaction_rollback(Some("a")).unwrap();
        db.transaction_commit().unwrap();

        assert_eq!(count_where(db, "sp"), 0);
    }

    #[test]
    fn test_full_rollback_ignores_savepoints() {
        let mut fixture = DatabaseFixture::new().unwrap();
        let db = &mut fixture.db;

        db.transaction_start().unwrap();
        db.query("INSERT INTO jos_dbtest (title, start_date, description) VALUES ('Y', '1970-01-01', 'full')")
            .unwrap();
        db.transaction_savepoint("a").unwrap();
        db.query("INSERT INTO jos_dbtest (title, start_date, description) VALUES ('Z', '1970-01-01', 'full')")
            .unwrap();
        db.transaction_rollback(None).unwrap();

        assert_eq!(db.transaction_state(), TransactionState::Autocommit);
        assert_eq!(count_where(db, "full"), 0);
    }

    #[test]
    fn test_nested_savepoints_pop_as_a_stack() {
        let mut fixture = DatabaseFixture::new().unwrap();
        let db = &mut fixture.db;

        db.transaction_start().unwrap();
        db.transaction_savepoint("outer").unwrap();
        db.query("INSERT INTO jos_dbtest (title, start_date, description) VALUES ('A', '1970-01-01', 'nested')")
            .unwrap();
        db.transaction_savepoint("middle").unwrap();
        db.query("INSERT INTO jos_dbtest (title, start_date, description) VALUES ('B', '1970-01-01', 'nested')")
            .unwrap();
        db.transaction_savepoint("inner").unwrap();
        assert_eq!(db.savepoints(), ["outer", "middle", "inner"]);

        db.transaction_rollback(Some("middle")).unwrap();
        assert_eq!(db.savepoints(), ["outer"]);
        assert!(matches!(
            db.release_transaction_savepoint("inner"),
            Err(DriverError::Transaction { .. })
        ));

        db.release_transaction_savepoint("outer").unwrap();
        db.transaction_commit().unwrap();
        assert_eq!(count_where(db, "nested"), 1);
    }

    #[test]
    fn test_transaction_error_leaves_transaction_open() {
        let mut fixture = DatabaseFixture::new().unwrap();
        let db = &mut fixture.db;

        db.transaction_start().unwrap();
        match db.release_transaction_savepoint("nope") {
            Err(DriverError::Transaction { savepoint, .. }) => assert_eq!(savepoint.as_deref(), Some("nope")),
            other => panic!("Expected Transaction error, got {:?}", other),
        }
        assert_eq!(db.transaction_state(), TransactionState::Active);
        db.transaction_rollback(None).unwrap();
    }

    #[test]
    fn test_file_backed_database() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("driver.db");
        let path = path.to_str().unwrap();

        {
            let mut fixture = DatabaseFixture::open(path).unwrap();
            fixture.db.query("DELETE FROM jos_dbtest WHERE id > 2").unwrap();
            assert_eq!(fixture.db.affected_rows(), 2);
        }

        let mut db = Database::connect(pgdriver::config::DatabaseConfig::sqlite(path)).unwrap();
        db.set_query("SELECT COUNT(*) FROM jos_dbtest");
        assert_eq!(db.load_result().unwrap(), Some(Value::Integer(2)));
        db.disconnect().unwrap();
    }

    #[test]
    fn test_scripted_postgres_rename_table() {
        init_tracing();
        let transport = ScriptedTransport::new()
            .respond_column("SELECT table_name", "table_name", &["jos_assets", "jos_dbtest"])
            .respond("SELECT s.relname", dbtest_sequence())
            .respond_column("SELECT indexname", "indexname", &["jos_dbtest_pkey", "idx_other"]);
        let (mut db, log) = scripted_database(transport);

        db.rename_table("jos_dbtest", "bak_jos_dbtest").unwrap();

        let renames: Vec<String> = log
            .statements()
            .into_iter()
            .filter(|sql| sql.starts_with("ALTER"))
            .collect();
        assert_eq!(
            renames,
            [
                r#"ALTER SEQUENCE "jos_dbtest_id_seq" RENAME TO "bak_jos_dbtest_id_seq""#,
                r#"ALTER INDEX "jos_dbtest_pkey" RENAME TO "bak_jos_dbtest_pkey""#,
                r#"ALTER TABLE "jos_dbtest" RENAME TO "bak_jos_dbtest""#,
            ]
        );
    }

    #[test]
    fn test_scripted_postgres_insert_id_is_fenced_in_transactions() {
        let transport = ScriptedTransport::new()
            .respond("SELECT s.relname", dbtest_sequence())
            .fail_on("currval");
        let (mut db, log) = scripted_database(transport);

        db.transaction_start().unwrap();
        db.query("INSERT INTO jos_dbtest (title) VALUES ('x')").unwrap();
        assert_eq!(db.insert_id(), 0);
        db.transaction_commit().unwrap();

        assert_eq!(
            without_catalog(log.statements()),
            [
                "BEGIN",
                "INSERT INTO jos_dbtest (title) VALUES ('x')",
                r#"SAVEPOINT "pgdriver_insert_id""#,
                r#"SELECT currval('"public"."jos_dbtest_id_seq"')"#,
                r#"ROLLBACK TO SAVEPOINT "pgdriver_insert_id""#,
                r#"RELEASE SAVEPOINT "pgdriver_insert_id""#,
                "COMMIT",
            ]
        );
    }

    #[test]
    fn test_scripted_postgres_insert_id_outside_transaction() {
        let transport = ScriptedTransport::new()
            .respond("SELECT s.relname", dbtest_sequence())
            .respond_column("SELECT currval", "currval", &["42"]);
        let (mut db, log) = scripted_database(transport);

        db.query("INSERT INTO #__dbtest (title) VALUES ('x')").unwrap();
        assert_eq!(db.insert_id(), 42);
        assert_eq!(db.insert_id(), 42);
        assert_eq!(
            without_catalog(log.statements()),
            [
                "INSERT INTO jos_dbtest (title) VALUES ('x')",
                r#"SELECT currval('"public"."jos_dbtest_id_seq"')"#,
            ]
        );
    }

    #[test]
    fn test_scripted_postgres_insert_id_ignores_later_sequences() {
        let transport = ScriptedTransport::new()
            .respond("SELECT s.relname", dbtest_sequence())
            .respond_column("SELECT nextval", "nextval", &["900"])
            .respond_column("SELECT lastval", "lastval", &["900"])
            .respond_column("SELECT currval", "currval", &["5"]);
        let (mut db, log) = scripted_database(transport);

        db.query("INSERT INTO #__dbtest (title) VALUES ('x')").unwrap();
        db.query("SELECT nextval('#__other_seq')").unwrap();
        assert_eq!(db.insert_id(), 5);
        assert!(!log.statements().iter().any(|sql| sql.contains("lastval")));
    }

    #[test]
    fn test_scripted_postgres_insert_id_without_sequence_is_zero() {
        let (mut db, _log) = scripted_database(ScriptedTransport::new());
        db.query("INSERT INTO jos_plain (name) VALUES ('x')").unwrap();
        assert_eq!(db.insert_id(), 0);
    }

    #[test]
    fn test_scripted_postgres_savepoint_names_are_quoted() {
        let (mut db, log) = scripted_database(ScriptedTransport::new());
        db.transaction_start().unwrap();
        db.transaction_savepoint("sp one").unwrap();
        db.release_transaction_savepoint("sp one").unwrap();
        db.transaction_rollback(None).unwrap();

        assert_eq!(
            log.statements(),
            ["BEGIN", r#"SAVEPOINT "sp one""#, r#"RELEASE SAVEPOINT "sp one""#, "ROLLBACK"]
        );
    }

    #[test]
    fn test_scripted_postgres_keys_and_explain() {
        let transport = ScriptedTransport::new()
            .respond(
                "SELECT indexname::text AS idx_name",
                RawResult::new(
                    vec![
                        ColumnInfo::new("idx_name", "text"),
                        ColumnInfo::new("is_primary", "bool"),
                        ColumnInfo::new("is_unique", "bool"),
                        ColumnInfo::new("query", "text"),
                    ],
                    vec![vec![
                        Value::from("jos_assets_pkey"),
                        Value::Bool(true),
                        Value::Bool(true),
                        Value::from("ALTER TABLE jos_assets ADD PRIMARY KEY (id)"),
                    ]],
                ),
            )
            .respond_column("EXPLAIN", "QUERY PLAN", &["Seq Scan on jos_dbtest  (cost=0.00..1.04 rows=4 width=72)"]);
        let (mut db, log) = scripted_database(transport);

        let keys = db.table_keys("jos_assets").unwrap();
        assert_eq!(
            keys,
            [TableKey {
                idx_name: "jos_assets_pkey".to_string(),
                is_primary: true,
                is_unique: true,
                query: "ALTER TABLE jos_assets ADD PRIMARY KEY (id)".to_string(),
            }]
        );

        db.set_query("SELECT * FROM #__dbtest");
        let plan = db.explain().unwrap();
        assert!(plan[0].starts_with("Seq Scan on jos_dbtest"));
        assert_eq!(log.statements().last().unwrap(), "EXPLAIN SELECT * FROM jos_dbtest");
    }

    #[test]
    fn test_scripted_connection_loss_is_fatal() {
        let (mut db, _log) = scripted_database(ScriptedTransport::new());
        db.disconnect().unwrap();
        let error = db.query("SELECT 1").unwrap_err();
        assert!(error.is_fatal());
    }
}
