#![allow(clippy::manual_async_fn)]

use std::collections::VecDeque;
use std::sync::Mutex;

use asupersync::runtime::RuntimeBuilder;
use asupersync::types::CancelKind;
use asupersync::{Cx, Outcome};

use relset_core::{
    ColumnDef, Connection, DataSet, DataSource, DataType, Error, Model, ModelBuilder, Row,
    SortDirection, Value,
};
use relset_query::DbTable;
use relset_session::{Session, SessionConfig};

/// Records every statement and answers queries from a queue of canned rows.
/// With `cancel_on`, executing a statement containing that text cancels the
/// context.
#[derive(Default)]
struct FakeConnection {
    log: Mutex<Vec<(String, Vec<Value>)>>,
    results: Mutex<VecDeque<Vec<Row>>>,
    cancel_on: Option<&'static str>,
}

impl FakeConnection {
    fn with_results(results: Vec<Vec<Row>>) -> Self {
        Self {
            log: Mutex::new(Vec::new()),
            results: Mutex::new(results.into()),
            cancel_on: None,
        }
    }

    fn cancelling_on(marker: &'static str, results: Vec<Vec<Row>>) -> Self {
        Self {
            cancel_on: Some(marker),
            ..Self::with_results(results)
        }
    }

    fn statements(&self) -> Vec<String> {
        self.log.lock().unwrap().iter().map(|(s, _)| s.clone()).collect()
    }

    fn params(&self, index: usize) -> Vec<Value> {
        self.log.lock().unwrap()[index].1.clone()
    }
}

impl Connection for FakeConnection {
    fn query(
        &self,
        _cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl std::future::Future<Output = Outcome<Vec<Row>, Error>> + Send {
        self.log.lock().unwrap().push((sql.to_string(), params.to_vec()));
        let rows = self.results.lock().unwrap().pop_front().unwrap_or_default();
        async move { Outcome::Ok(rows) }
    }

    fn execute(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl std::future::Future<Output = Outcome<u64, Error>> + Send {
        self.log.lock().unwrap().push((sql.to_string(), params.to_vec()));
        if self.cancel_on.is_some_and(|marker| sql.contains(marker)) {
            cx.cancel_with(CancelKind::User, Some("stop requested"));
        }
        async { Outcome::Ok(1) }
    }
}

fn unwrap_outcome<T>(outcome: Outcome<T, Error>) -> T {
    match outcome {
        Outcome::Ok(v) => v,
        Outcome::Err(e) => panic!("unexpected error: {e}"),
        Outcome::Cancelled(r) => panic!("cancelled: {r:?}"),
        Outcome::Panicked(p) => panic!("panicked: {p:?}"),
    }
}

fn run<F: std::future::Future>(f: F) -> F::Output {
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    rt.block_on(f)
}

fn orders() -> (Model, Model) {
    let line = ModelBuilder::new("Line")
        .table("lines")
        .column(ColumnDef::new("order_id", DataType::Int))
        .column(ColumnDef::new("line_no", DataType::Int))
        .column(ColumnDef::new("qty", DataType::Int).nullable())
        .primary_key(
            "PK_Line",
            &[
                ("order_id", SortDirection::Ascending),
                ("line_no", SortDirection::Ascending),
            ],
        )
        .build()
        .unwrap();
    let order = ModelBuilder::new("Order")
        .table("orders")
        .column(ColumnDef::new("id", DataType::Int))
        .column(ColumnDef::new("note", DataType::Text).nullable())
        .primary_key("PK_Order", &[("id", SortDirection::Ascending)])
        .child("lines", &line, &[("order_id", "id")])
        .build()
        .unwrap();
    (order, line)
}

fn order_row(id: i32, note: Option<&str>) -> Row {
    Row::from_pairs([
        ("id", Value::Int(id)),
        ("note", note.map_or(Value::Null, Value::from)),
    ])
}

fn line_row(order_id: i32, line_no: i32, qty: Option<i32>) -> Row {
    Row::from_pairs([
        ("order_id", Value::Int(order_id)),
        ("line_no", Value::Int(line_no)),
        ("qty", qty.map_or(Value::Null, Value::Int)),
    ])
}

#[test]
fn test_to_dataset_fills_children_through_sequential_key() {
    let (order, line) = orders();
    let conn = FakeConnection::with_results(vec![
        vec![order_row(1, Some("first")), order_row(2, None)],
        vec![
            line_row(1, 1, Some(3)),
            line_row(2, 1, Some(5)),
            line_row(2, 2, None),
        ],
    ]);
    let session = Session::new(conn);
    let query = DbTable::new(&order).query().unwrap();
    let cx = Cx::for_testing();

    let data = run(async { unwrap_outcome(session.to_dataset(&cx, &query).await) });

    assert_eq!(data.len(), 2);
    assert!(data.provenance().original().unwrap().ptr_eq(query.provenance()));
    let note = order.column("note").unwrap();
    assert_eq!(data.get(0, &note).unwrap(), Value::from("first"));
    assert_eq!(data.get(1, &note).unwrap(), Value::Null);

    let qty = line.column("qty").unwrap();
    let first = data.row(0).unwrap().child("lines").unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(first.get(0, &qty).unwrap(), Value::Int(3));
    let second = data.row(1).unwrap().child("lines").unwrap();
    assert_eq!(second.len(), 2);
    assert_eq!(second.get(1, &qty).unwrap(), Value::Null);

    let key_table = format!("tmp_orders_{}", order.id().get());
    let statements = session.connection().statements();
    assert_eq!(statements.len(), 5);
    assert!(statements[0].starts_with("SELECT t0.\"id\" AS \"id\""));
    assert!(statements[1].starts_with(&format!("CREATE TEMPORARY TABLE \"{}\"", key_table)));
    assert!(statements[2].starts_with(&format!("INSERT INTO \"{}\" (\"id\")", key_table)));
    assert!(statements[3].contains(&format!("INNER JOIN \"{}\" AS t1", key_table)));
    assert_eq!(statements[4], format!("DROP TABLE IF EXISTS \"{}\"", key_table));
}

#[test]
fn test_cancelled_fill_drops_sequential_key_table() {
    let (order, _line) = orders();
    let key_table = format!("tmp_orders_{}", order.id().get());
    let query = DbTable::new(&order).query().unwrap();

    for (marker, issued) in [("CREATE TEMPORARY", 3), ("INSERT INTO", 4)] {
        let session = Session::new(FakeConnection::cancelling_on(
            marker,
            vec![vec![order_row(1, None)]],
        ));
        let cx = Cx::for_testing();
        let outcome = run(async { session.to_dataset(&cx, &query).await });
        assert!(matches!(outcome, Outcome::Cancelled(_)), "cancel at {marker}");

        let statements = session.connection().statements();
        assert_eq!(statements.len(), issued, "cancel at {marker}");
        assert_eq!(
            statements.last().unwrap(),
            &format!("DROP TABLE IF EXISTS \"{}\"", key_table)
        );
    }
}

#[test]
fn test_to_dataset_skips_children_when_disabled_or_empty() {
    let (order, _line) = orders();
    let cx = Cx::for_testing();

    let session = Session::with_config(
        FakeConnection::with_results(vec![vec![order_row(1, None)]]),
        SessionConfig::default().fill_children(false),
    );
    let query = DbTable::new(&order).query().unwrap();
    let data = run(async { unwrap_outcome(session.to_dataset(&cx, &query).await) });
    assert_eq!(data.len(), 1);
    assert!(data.row(0).unwrap().child("lines").unwrap().is_empty());
    assert_eq!(session.connection().statements().len(), 1);

    let session = Session::new(FakeConnection::default());
    let data = run(async { unwrap_outcome(session.to_dataset(&cx, &query).await) });
    assert!(data.is_empty());
    assert_eq!(session.connection().statements().len(), 1);
}

#[test]
fn test_missing_result_column_is_query_error() {
    let (order, _line) = orders();
    let conn = FakeConnection::with_results(vec![vec![Row::from_pairs([(
        "id",
        Value::Int(1),
    )])]]);
    let session = Session::new(conn);
    let query = DbTable::new(&order).query().unwrap();
    let cx = Cx::for_testing();
    let outcome = run(async { session.to_dataset(&cx, &query).await });
    assert!(matches!(outcome, Outcome::Err(Error::Query(_))));
}

#[test]
fn test_mutations_bump_target_revision() {
    let (order, _line) = orders();
    let staging = DbTable::temporary(&order.clone_schema().unwrap(), "orders_staging");
    let target = DbTable::new(&order);
    let session = Session::new(FakeConnection::default());
    let cx = Cx::for_testing();
    let source = staging.query().unwrap();

    run(async {
        unwrap_outcome(session.create_temp_table(&cx, &staging).await);
        assert_eq!(unwrap_outcome(session.insert(&cx, &source, &target, None).await), 1);
        assert_eq!(unwrap_outcome(session.update(&cx, &source, &target).await), 1);
        assert_eq!(unwrap_outcome(session.delete(&cx, &source, &target).await), 1);
    });
    assert_eq!(target.provenance().revision(), 3);

    let statements = session.connection().statements();
    assert!(statements[0].starts_with("CREATE TEMPORARY TABLE \"orders_staging\""));
    assert!(statements[1].starts_with("INSERT INTO \"orders\""));
    assert!(statements[2].starts_with("UPDATE \"orders\" AS t0 SET \"note\" = t1.\"note\""));
    assert!(statements[3].starts_with("DELETE FROM \"orders\" AS t0 WHERE EXISTS"));
}

#[test]
fn test_create_temp_table_rejects_regular_table() {
    let (order, _line) = orders();
    let session = Session::new(FakeConnection::default());
    let cx = Cx::for_testing();
    let outcome = run(async { session.create_temp_table(&cx, &DbTable::new(&order)).await });
    assert!(matches!(outcome, Outcome::Err(Error::Argument(_))));
    assert!(session.connection().statements().is_empty());
}

fn sample_orders(order: &Model, line: &Model) -> DataSet {
    let id = order.column("id").unwrap();
    let note = order.column("note").unwrap();
    let order_id = line.column("order_id").unwrap();
    let line_no = line.column("line_no").unwrap();
    let mut data = DataSet::new(order);
    let r = data.add_row();
    data.set(r, &id, 7).unwrap();
    data.set(r, &note, "rush").unwrap();
    let lines = data.row_mut(r).unwrap().child_mut("lines").unwrap();
    for n in 1..=2 {
        let l = lines.add_row();
        lines.set(l, &order_id, 7).unwrap();
        lines.set(l, &line_no, n).unwrap();
    }
    data
}

#[test]
fn test_insert_dataset_writes_parents_before_children() {
    let (order, line) = orders();
    let data = sample_orders(&order, &line);
    let target = DbTable::new(&order);
    let session = Session::new(FakeConnection::default());
    let cx = Cx::for_testing();

    let n = run(async { unwrap_outcome(session.insert_dataset(&cx, &data, &target).await) });
    assert_eq!(n, 3);
    assert_eq!(target.provenance().revision(), 1);

    let conn = session.connection();
    let statements = conn.statements();
    assert_eq!(
        statements[0],
        "INSERT INTO \"orders\" (\"id\", \"note\") VALUES ($1, $2)"
    );
    assert_eq!(conn.params(0), vec![Value::Int(7), Value::from("rush")]);
    assert_eq!(
        statements[1],
        "INSERT INTO \"lines\" (\"order_id\", \"line_no\", \"qty\") VALUES ($1, $2, $3)"
    );
    assert_eq!(conn.params(2), vec![Value::Int(7), Value::Int(2), Value::Null]);
}

/// Orders whose id is generated by the database, and their lines.
fn generated_orders() -> (Model, Model, DataSet) {
    let (_, line) = orders();
    let order = ModelBuilder::new("Order")
        .table("orders")
        .column(ColumnDef::new("id", DataType::Int).auto_increment())
        .column(ColumnDef::new("note", DataType::Text).nullable())
        .primary_key("PK_Order", &[("id", SortDirection::Ascending)])
        .child("lines", &line, &[("order_id", "id")])
        .build()
        .unwrap();
    let line = order.child("lines").unwrap().model().clone();
    let note = order.column("note").unwrap();
    let line_no = line.column("line_no").unwrap();
    let mut data = DataSet::new(&order);
    let r = data.add_row();
    data.set(r, &note, "rush").unwrap();
    let lines = data.row_mut(r).unwrap().child_mut("lines").unwrap();
    for n in 1..=2 {
        let l = lines.add_row();
        lines.set(l, &line_no, n).unwrap();
    }
    (order, line, data)
}

#[test]
fn test_insert_dataset_propagates_generated_keys_to_children() {
    let (order, _line, data) = generated_orders();
    let target = DbTable::new(&order);
    let session = Session::new(FakeConnection::with_results(vec![vec![Row::from_pairs([(
        "id",
        Value::BigInt(41),
    )])]]));
    let cx = Cx::for_testing();

    let n = run(async { unwrap_outcome(session.insert_dataset(&cx, &data, &target).await) });
    assert_eq!(n, 3);

    let conn = session.connection();
    let statements = conn.statements();
    assert_eq!(
        statements[0],
        "INSERT INTO \"orders\" (\"note\") VALUES ($1) RETURNING \"id\""
    );
    assert_eq!(conn.params(0), vec![Value::from("rush")]);
    assert_eq!(conn.params(1), vec![Value::Int(41), Value::Int(1), Value::Null]);
    assert_eq!(conn.params(2), vec![Value::Int(41), Value::Int(2), Value::Null]);
}

#[test]
fn test_insert_dataset_reads_mysql_insert_id() {
    let (order, _line, data) = generated_orders();
    let target = DbTable::new(&order);
    let session = Session::with_config(
        FakeConnection::with_results(vec![vec![Row::from_pairs([("id", Value::BigInt(9))])]]),
        SessionConfig::default().dialect(relset_query::Dialect::Mysql),
    );
    let cx = Cx::for_testing();

    run(async { unwrap_outcome(session.insert_dataset(&cx, &data, &target).await) });
    let conn = session.connection();
    let statements = conn.statements();
    assert_eq!(statements[0], "INSERT INTO `orders` (`note`) VALUES (?)");
    assert_eq!(statements[1], "SELECT LAST_INSERT_ID() AS `id`");
    assert_eq!(
        statements[2],
        "INSERT INTO `lines` (`order_id`, `line_no`, `qty`) VALUES (?, ?, ?)"
    );
    assert_eq!(conn.params(2)[0], Value::Int(9));
}

#[test]
fn test_insert_dataset_without_returned_key_is_query_error() {
    let (order, _line, data) = generated_orders();
    let session = Session::new(FakeConnection::default());
    let cx = Cx::for_testing();
    let outcome = run(async { session.insert_dataset(&cx, &data, &DbTable::new(&order)).await });
    assert!(matches!(outcome, Outcome::Err(Error::Query(_))));
    assert_eq!(session.connection().statements().len(), 1);
}

#[test]
fn test_update_and_delete_dataset_match_on_primary_key() {
    let (order, line) = orders();
    let data = sample_orders(&order, &line);
    let target = DbTable::new(&order);
    let session = Session::with_config(
        FakeConnection::default(),
        SessionConfig::default().dialect(relset_query::Dialect::Sqlite),
    );
    let cx = Cx::for_testing();

    run(async {
        unwrap_outcome(session.update_dataset(&cx, &data, &target).await);
        unwrap_outcome(session.delete_dataset(&cx, &data, &target).await);
    });
    let conn = session.connection();
    let statements = conn.statements();
    assert_eq!(statements[0], "UPDATE \"orders\" SET \"note\" = ?1 WHERE \"id\" = ?2");
    assert_eq!(conn.params(0), vec![Value::from("rush"), Value::Int(7)]);
    assert_eq!(statements[1], "DELETE FROM \"orders\" WHERE \"id\" = ?1");
    assert_eq!(target.provenance().revision(), 2);
}
