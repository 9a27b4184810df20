use anyhow::Result;
use rstest::rstest;
use sqlite_ctx::{named_params, params, Error, ExecutionContext, Schema, Select, SqliteConfig, Value};
use tempfile::TempDir;

const PERSON_SCHEMA: &str = r#"
    CREATE TABLE person (
        ID INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT UNIQUE NOT NULL,
        age INTEGER
    );
    CREATE INDEX idx_person_age ON person(age);
"#;

// Helper function to create an in-memory schema for testing
fn create_test_db() -> Schema {
    let mut db = Schema::in_memory();
    initialize_schema(&mut db);
    db
}

// Helper function to create a schema backed by a temporary file
fn create_temp_db() -> (Schema, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let mut db = Schema::new(dir.path().join("people.db"));
    initialize_schema(&mut db);
    (db, dir)
}

fn create_db(on_disk: bool) -> (Schema, Option<TempDir>) {
    if on_disk {
        let (db, dir) = create_temp_db();
        (db, Some(dir))
    } else {
        (create_test_db(), None)
    }
}

fn initialize_schema(db: &mut Schema) {
    db.add_script(PERSON_SCHEMA)
        .add_table("person", ["ID", "name", "age"], ["ID"]);
}

fn count(ctx: &ExecutionContext) -> Result<i64> {
    Ok(ctx
        .query_scalar::<i64>("SELECT count(*) FROM person", ())?
        .unwrap_or(0))
}

#[rstest]
#[case::memory(false)]
#[case::file(true)]
fn person_scenario(#[case] on_disk: bool) -> Result<()> {
    let (db, _dir) = create_db(on_disk);
    let mut ctx = db.context()?;

    let ada = ctx.insert("person", &[("name", "Ada".into()), ("age", 30.into())])?;
    let bo = ctx.insert("person", &[("name", "Bo".into()), ("age", 40.into())])?;
    assert_eq!(ada, Some(1));
    assert_eq!(bo, Some(2));

    let older = ctx.select("person", &Select::new().filter("age > ?", [35]))?;
    assert_eq!(older.len(), 1);
    assert_eq!(older[0]["name"], Value::from("Bo"));
    assert_eq!(older[0]["ID"], Value::Integer(2));

    let changed = ctx.update("person", "age = age + 1", Some("name = ?"), ["Ada"])?;
    assert_eq!(changed, 1);
    let ada = ctx.select("person", &Select::new().filter("name = ?", ["Ada"]))?;
    assert_eq!(ada[0].get_as::<i64, _>("age")?, 31);
    let bo = ctx.select("person", &Select::new().filter("name = ?", ["Bo"]))?;
    assert_eq!(bo[0].get_as::<i64, _>("age")?, 40);

    ctx.close()?;
    Ok(())
}

#[test]
fn insert_then_select_returns_generated_id() -> Result<()> {
    let db = create_test_db();
    let ctx = db.context()?;

    let id = ctx.insert("person", &[("name", "Ada".into()), ("age", 30.into())])?;
    let rows = ctx.select("person", &Select::new().filter("ID = ?", [id.unwrap()]))?;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].columns(), ["ID", "name", "age"]);
    assert_eq!(rows[0].values(), [Value::Integer(1), "Ada".into(), Value::Integer(30)]);
    Ok(())
}

#[test]
fn insert_into_table_without_integer_key_returns_none() -> Result<()> {
    let mut db = Schema::in_memory();
    db.add_script("CREATE TABLE tag (label TEXT PRIMARY KEY, weight REAL)");
    let ctx = db.context()?;

    let id = ctx.insert("tag", &[("label", "rust".into()), ("weight", 1.5.into())])?;
    assert_eq!(id, None);
    assert_eq!(ctx.rowid_alias("tag")?, None);
    Ok(())
}

#[test]
fn without_rowid_integer_key_is_not_generated() -> Result<()> {
    let mut db = Schema::in_memory();
    db.add_script("CREATE TABLE kv (k INTEGER PRIMARY KEY, v TEXT) WITHOUT ROWID");
    let ctx = db.context()?;

    assert_eq!(ctx.rowid_alias("kv")?, None);
    let id = ctx.insert("kv", &[("k", 7.into()), ("v", "seven".into())])?;
    assert_eq!(id, None);
    Ok(())
}

#[test]
fn update_and_delete_touch_only_matching_rows() -> Result<()> {
    let db = create_test_db();
    let ctx = db.context()?;
    for (name, age) in [("A", 10), ("B", 20), ("C", 30), ("D", 40)] {
        ctx.insert("person", &[("name", name.into()), ("age", age.into())])?;
    }

    assert_eq!(ctx.update("person", "age = 0", Some("age >= ?"), [30])?, 2);
    let ages: Vec<i64> = ctx
        .select("person", &Select::new().columns(["age"]).order_by("ID"))?
        .iter()
        .map(|r| r.get_as(0))
        .collect::<Result<_, _>>()?;
    assert_eq!(ages, vec![10, 20, 0, 0]);

    assert_eq!(ctx.delete("person", Some("age = ?"), [0])?, 2);
    let names: Vec<String> = ctx
        .select("person", &Select::new().columns(["name"]).order_by("name"))?
        .iter()
        .map(|r| r.get_as(0))
        .collect::<Result<_, _>>()?;
    assert_eq!(names, vec!["A", "B"]);

    assert_eq!(ctx.delete("person", None, ())?, 2);
    assert_eq!(count(&ctx)?, 0);
    Ok(())
}

#[test]
fn update_record_binds_set_values_before_filter_values() -> Result<()> {
    let db = create_test_db();
    let ctx = db.context()?;
    ctx.insert("person", &[("name", "Ada".into()), ("age", 30.into())])?;
    ctx.insert("person", &[("name", "Bo".into()), ("age", 40.into())])?;

    let changed = ctx.update_record(
        "person",
        &[("name", "Ada Lovelace".into()), ("age", 36.into())],
        Some("name = ?"),
        ["Ada"],
    )?;
    assert_eq!(changed, 1);

    let changed = ctx.update_record(
        "person",
        &[("age", 41.into())],
        Some("name = :name"),
        sqlite_ctx::named_params! {"name" => "Bo"},
    )?;
    assert_eq!(changed, 1);

    let rows = ctx.select("person", &Select::new().order_by("ID"))?;
    assert_eq!(rows[0]["name"], Value::from("Ada Lovelace"));
    assert_eq!(rows[0]["age"], Value::Integer(36));
    assert_eq!(rows[1]["age"], Value::Integer(41));
    Ok(())
}

#[test]
fn select_iter_matches_select() -> Result<()> {
    let db = create_test_db();
    let ctx = db.context()?;
    for i in 0..20 {
        ctx.insert("person", &[("name", format!("P{i:02}").into()), ("age", (i % 7).into())])?;
    }
    let select = Select::new().filter("age > ?", [2]).order_by("age, name");

    let eager = ctx.select("person", &select)?;
    let mut cursor = ctx.select_iter("person", &select)?;
    let lazy: Vec<_> = cursor.rows().collect::<Result<_, _>>()?;
    assert_eq!(eager, lazy);
    assert!(!eager.is_empty());

    // A second pass re-executes the statement.
    let again: Vec<_> = cursor.rows().collect::<Result<_, _>>()?;
    assert_eq!(again, lazy);
    Ok(())
}

#[test]
fn select_iter_steps_one_row_at_a_time() -> Result<()> {
    let db = create_test_db();
    let ctx = db.context()?;

    // The third row overflows, so only a lazy reader sees the first two.
    let sql = "WITH RECURSIVE n(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM n WHERE x < 5)
               SELECT CASE WHEN x < 3 THEN x ELSE abs(-9223372036854775805 - x) END FROM n";
    assert!(ctx.query_all(sql, ()).is_err());

    let mut cursor = ctx.query(sql, ())?;
    let mut rows = cursor.rows();
    assert_eq!(rows.next().unwrap()?[0], Value::Integer(1));
    assert_eq!(rows.next().unwrap()?[0], Value::Integer(2));
    assert!(matches!(rows.next(), Some(Err(Error::Query { .. }))));
    assert!(rows.next().is_none());
    Ok(())
}

#[test]
fn select_supports_limit_offset_and_columns() -> Result<()> {
    let db = create_test_db();
    let ctx = db.context()?;
    for (name, age) in [("A", 1), ("B", 2), ("C", 3), ("D", 4)] {
        ctx.insert("person", &[("name", name.into()), ("age", age.into())])?;
    }
    let rows = ctx.select(
        "person",
        &Select::new().columns(["name"]).order_by("age DESC").limit(2).offset(1),
    )?;
    let names: Vec<&Value> = rows.iter().map(|r| &r[0]).collect();
    assert_eq!(names, [&Value::from("C"), &Value::from("B")]);
    assert_eq!(rows[0].columns(), ["name"]);
    Ok(())
}

#[test]
fn query_helpers() -> Result<()> {
    let db = Schema::in_memory();
    let ctx = db.context()?;
    assert_eq!(ctx.query_scalar::<i64>("SELECT 42", ())?, Some(42));
    assert_eq!(ctx.query_scalar::<i64>("SELECT 42 + ?", [1])?, Some(43));
    assert!(ctx.query_row("SELECT 1 WHERE 0", ())?.is_none());
    let row = ctx.query_row("SELECT 'x' AS a, NULL AS b", ())?.unwrap();
    assert_eq!(row.get_as::<Option<String>, _>("b")?, None);
    assert_eq!(row.get_as::<String, _>("a")?, "x");
    Ok(())
}

#[test]
fn failed_statement_reports_statement_and_params() {
    let db = Schema::new("");
    let ctx = db.context().unwrap();
    let err = ctx
        .execute("INSERT INTO test VALUES(?, ?)", params!["a person", 50])
        .unwrap_err();
    match err {
        Error::Query {
            statement, params, ..
        } => {
            assert_eq!(statement, "INSERT INTO test VALUES(?, ?)");
            assert_eq!(params, params!["a person", 50]);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn wrong_parameter_count_is_a_query_error() {
    let db = create_test_db();
    let ctx = db.context().unwrap();
    let err = ctx
        .execute("INSERT INTO person (name, age) VALUES (?, ?)", ["only one"])
        .unwrap_err();
    assert!(matches!(
        err.sqlite_error(),
        Some(rusqlite::Error::InvalidParameterCount(1, 2))
    ));
}

#[test]
fn named_parameters_must_cover_every_placeholder() -> Result<()> {
    let db = create_test_db();
    let ctx = db.context()?;
    let err = ctx
        .execute(
            "INSERT INTO person (name, age) VALUES (:name, :age)",
            named_params! {"name" => "Ada"},
        )
        .unwrap_err();
    assert!(matches!(
        err.sqlite_error(),
        Some(rusqlite::Error::InvalidParameterName(name)) if name == ":age"
    ));
    assert_eq!(count(&ctx)?, 0);

    ctx.execute(
        "INSERT INTO person (name, age) VALUES (:name, :age)",
        named_params! {"name" => "Ada", ":age" => 30},
    )?;
    assert_eq!(count(&ctx)?, 1);
    Ok(())
}

#[test]
fn constraint_violation_is_detected() {
    let db = create_test_db();
    let ctx = db.context().unwrap();
    ctx.insert("person", &[("name", "Ada".into())]).unwrap();
    let err = ctx.insert("person", &[("name", "Ada".into())]).unwrap_err();
    assert!(err.is_constraint_violation());
}

#[test]
fn closed_context_rejects_operations() -> Result<()> {
    let db = create_test_db();
    let mut ctx = db.context()?;
    assert!(ctx.is_open());
    ctx.close()?;
    assert!(!ctx.is_open());
    assert!(matches!(ctx.execute("SELECT 1", ()), Err(Error::ContextClosed)));
    assert!(matches!(ctx.commit(), Err(Error::ContextClosed)));
    // Closing again is harmless.
    ctx.close()?;
    Ok(())
}

#[test]
fn double_reads_while_writing() -> Result<()> {
    let mut db = Schema::from_config(SqliteConfig::default().with_auto_commit(false));
    initialize_schema(&mut db);
    let mut ctx = db.context()?;
    for (name, age) in [("A", 1), ("B", 2), ("C", 3)] {
        ctx.insert("person", &[("name", name.into()), ("age", age.into())])?;
    }

    let mut ids = ctx.double().query("SELECT ID FROM person ORDER BY ID", ())?;
    for row in ids.rows() {
        let id: i64 = row?.get_as(0)?;
        ctx.execute("UPDATE person SET age = age * 10 WHERE ID = ?", [id])?;
    }
    drop(ids);
    assert!(ctx.in_transaction()?);
    ctx.close()?;

    let ctx = db.context()?;
    let ages: Vec<i64> = ctx
        .query_all("SELECT age FROM person ORDER BY ID", ())?
        .iter()
        .map(|r| r.get_as(0))
        .collect::<Result<_, _>>()?;
    assert_eq!(ages, vec![10, 20, 30]);
    Ok(())
}

#[test]
fn script_and_file_execution() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let script = dir.path().join("insert.sql");
    std::fs::write(
        &script,
        "INSERT INTO person (name, age) VALUES ('Zeus', 3722);
         INSERT INTO person (name, age) VALUES ('Thor', 1503);",
    )?;
    let db = create_test_db();
    let ctx = db.context()?;
    ctx.execute_file(&script)?;
    ctx.execute_script("INSERT INTO person (name, age) VALUES ('Odin', 10000);")?;
    assert_eq!(count(&ctx)?, 3);

    let missing = ctx.execute_file(dir.path().join("missing.sql")).unwrap_err();
    assert!(matches!(missing, Error::Script { .. }));
    Ok(())
}
