//! Statement composition and the SQL it renders.

use std::sync::Arc;

use relset_core::{
    Column, ColumnDef, ColumnSort, DataSource, DataType, Error, Model, ModelBuilder,
    SortDirection, Value,
};
use relset_query::{
    Dialect, DbQuery, DbTable, QueryBuilder, SqlGenerator, delete_statement, insert_statement,
    needs_parent_join, update_statement,
};

fn contacts() -> Model {
    ModelBuilder::new("Contact")
        .table("contacts")
        .column(ColumnDef::new("id", DataType::Int))
        .column(ColumnDef::new("name", DataType::Text))
        .column(ColumnDef::new("age", DataType::Int).nullable())
        .primary_key("PK_Contact", &[("id", SortDirection::Ascending)])
        .build()
        .unwrap()
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
    let line = order.child("lines").unwrap().model().clone();
    (order, line)
}

fn sql(query: &DbQuery) -> (String, Vec<Value>) {
    query.to_sql(Dialect::Postgres).unwrap()
}

const CONTACT_COLUMNS: &str = "t0.\"id\" AS \"id\", t0.\"name\" AS \"name\", t0.\"age\" AS \"age\"";

#[test]
fn test_table_query_selects_every_column() {
    let m = contacts();
    let (text, params) = sql(&DbTable::new(&m).query().unwrap());
    assert_eq!(
        text,
        format!("SELECT {} FROM \"contacts\" AS t0", CONTACT_COLUMNS)
    );
    assert!(params.is_empty());
}

#[test]
fn test_filters_merge_into_one_where_clause() {
    let m = contacts();
    let age = m.column("age").unwrap();
    let name = m.column("name").unwrap();
    let q = DbTable::new(&m)
        .query()
        .unwrap()
        .filter(&age.greater_than(&Column::param(30).unwrap()).unwrap())
        .unwrap()
        .filter(&name.equal(&Column::constant("Ann").unwrap()).unwrap())
        .unwrap();
    let (text, params) = sql(&q);
    assert_eq!(
        text,
        format!(
            "SELECT {} FROM \"contacts\" AS t0 WHERE ((t0.\"age\" > $1) AND (t0.\"name\" = 'Ann'))",
            CONTACT_COLUMNS
        )
    );
    assert_eq!(params, vec![Value::Int(30)]);
}

#[test]
fn test_filter_rejects_foreign_and_non_boolean_columns() {
    let m = contacts();
    let other = contacts();
    let q = DbTable::new(&m).query().unwrap();

    let foreign = other.column("age").unwrap().is_null();
    assert!(matches!(q.filter(&foreign), Err(Error::Scope(_))));

    let age = m.column("age").unwrap();
    assert!(matches!(q.filter(&age), Err(Error::Argument(_))));
}

#[test]
fn test_paged_query_is_wrapped_as_derived_table() {
    let m = contacts();
    let age = m.column("age").unwrap();
    let name = m.column("name").unwrap();
    let top = DbTable::new(&m)
        .query()
        .unwrap()
        .order_by(&[ColumnSort::desc(&age)])
        .unwrap()
        .take(10)
        .unwrap();
    let inner = "SELECT t1.\"id\" AS \"id\", t1.\"name\" AS \"name\", t1.\"age\" AS \"age\" \
                 FROM \"contacts\" AS t1 ORDER BY t1.\"age\" DESC, t1.\"id\" ASC LIMIT 10";
    assert_eq!(
        sql(&top).0,
        format!(
            "SELECT {} FROM \"contacts\" AS t0 ORDER BY t0.\"age\" DESC, t0.\"id\" ASC LIMIT 10",
            CONTACT_COLUMNS
        )
    );

    let filtered = top
        .filter(&name.equal(&Column::param("Ann").unwrap()).unwrap())
        .unwrap();
    let (text, params) = sql(&filtered);
    assert_eq!(
        text,
        format!(
            "SELECT {} FROM ({}) AS t0 WHERE (t0.\"name\" = $1)",
            CONTACT_COLUMNS, inner
        )
    );
    assert_eq!(params, vec![Value::from("Ann")]);
}

#[test]
fn test_skip_without_order_sorts_by_primary_key() {
    let m = contacts();
    let q = DbTable::new(&m).query().unwrap().skip(5).unwrap();
    assert_eq!(
        sql(&q).0,
        format!(
            "SELECT {} FROM \"contacts\" AS t0 ORDER BY t0.\"id\" ASC OFFSET 5",
            CONTACT_COLUMNS
        )
    );
    let (sqlite, _) = q.to_sql(Dialect::Sqlite).unwrap();
    assert!(sqlite.ends_with("ORDER BY t0.\"id\" ASC LIMIT -1 OFFSET 5"));
}

fn notes() -> Model {
    ModelBuilder::new("Note")
        .table("notes")
        .column(ColumnDef::new("body", DataType::Text))
        .column(ColumnDef::new("tag", DataType::Text).nullable())
        .build()
        .unwrap()
}

#[test]
fn test_keyless_paging_orders_by_every_stored_column() {
    let m = notes();
    let tag = m.column("tag").unwrap();
    let table = DbTable::new(&m);
    let columns = "t0.\"body\" AS \"body\", t0.\"tag\" AS \"tag\"";

    let first = table.query().unwrap().take(5).unwrap();
    assert_eq!(
        sql(&first).0,
        format!(
            "SELECT {} FROM \"notes\" AS t0 ORDER BY t0.\"body\" ASC, t0.\"tag\" ASC LIMIT 5",
            columns
        )
    );

    let by_tag = table
        .query()
        .unwrap()
        .order_by(&[ColumnSort::desc(&tag)])
        .unwrap()
        .skip(5)
        .unwrap();
    assert_eq!(
        sql(&by_tag).0,
        format!(
            "SELECT {} FROM \"notes\" AS t0 ORDER BY t0.\"tag\" DESC, t0.\"body\" ASC OFFSET 5",
            columns
        )
    );
}

#[test]
fn test_skip_then_take_share_one_statement() {
    let m = contacts();
    let name = m.column("name").unwrap();
    let q = DbTable::new(&m)
        .query()
        .unwrap()
        .order_by(&[ColumnSort::asc(&name)])
        .unwrap()
        .skip(20)
        .unwrap()
        .take(10)
        .unwrap();
    assert_eq!(
        sql(&q).0,
        format!(
            "SELECT {} FROM \"contacts\" AS t0 ORDER BY t0.\"name\" ASC, t0.\"id\" ASC \
             LIMIT 10 OFFSET 20",
            CONTACT_COLUMNS
        )
    );
}

#[test]
fn test_union_all_renders_both_sides() {
    let m = contacts();
    let age = m.column("age").unwrap();
    let table = DbTable::new(&m);
    let young = table
        .query()
        .unwrap()
        .filter(&age.less_than(&Column::param(18).unwrap()).unwrap())
        .unwrap();
    let old = table
        .query()
        .unwrap()
        .filter(&age.greater_than(&Column::param(65).unwrap()).unwrap())
        .unwrap();
    let both = young.union_all(&old).unwrap();
    assert_ne!(both.model(), &m);
    assert!(both.model().is_schema_compatible(&m));
    assert!(both.provenance().original().is_none());
    assert_eq!(both.provenance().original_revision(), Some(-1));

    let (text, params) = sql(&both);
    let side = |alias: &str, op: &str, n: usize| {
        format!(
            "SELECT {a}.\"id\" AS \"id\", {a}.\"name\" AS \"name\", {a}.\"age\" AS \"age\" \
             FROM \"contacts\" AS {a} WHERE ({a}.\"age\" {op} ${n})",
            a = alias,
            op = op,
            n = n
        )
    };
    assert_eq!(
        text,
        format!(
            "SELECT * FROM ({}) AS t1 UNION ALL SELECT * FROM ({}) AS t3",
            side("t0", "<", 1),
            side("t2", ">", 2)
        )
    );
    assert_eq!(params, vec![Value::Int(18), Value::Int(65)]);

    let (order, _) = orders();
    let err = young.union(&DbTable::new(&order).query().unwrap()).unwrap_err();
    assert!(matches!(err, Error::Argument(_)));
}

#[test]
fn test_builder_requires_from_source() {
    let m = contacts();
    let err = QueryBuilder::new(&m).build_select().unwrap_err();
    assert!(matches!(err, Error::InvalidState(_)));

    let table = DbTable::new(&m);
    let err = QueryBuilder::new(&m)
        .from_table(&table)
        .unwrap()
        .from_table(&table)
        .unwrap_err();
    assert!(matches!(err, Error::InvalidState(_)));
}

#[test]
fn test_filter_rejects_aggregates() {
    let (order, line) = orders();
    let total = line.column("qty").unwrap().sum().unwrap();
    let predicate = total.greater_than(&Column::constant(10).unwrap()).unwrap();
    let q = DbTable::new(&order).query().unwrap();
    assert!(q.filter(&predicate).is_err());
}

#[test]
fn test_first_and_last_are_rejected_when_building() {
    let (_order, line) = orders();
    let summary = ModelBuilder::new("LineSummary")
        .column(ColumnDef::new("qty", DataType::Int).nullable())
        .build()
        .unwrap();
    let target = summary.column("qty").unwrap();
    let qty = line.column("qty").unwrap();
    let lines = DbTable::new(&line);
    let from_lines = || QueryBuilder::new(&summary).from_table(&lines).unwrap();

    for aggregate in [qty.first().unwrap(), qty.last().unwrap()] {
        let err = from_lines().select(&aggregate, &target).unwrap_err();
        assert!(matches!(err, Error::Argument(_)));
    }
    let nested = qty.first().unwrap().add(&Column::constant(1).unwrap()).unwrap();
    assert!(matches!(
        from_lines().select(&nested, &target),
        Err(Error::Argument(_))
    ));
    assert!(from_lines().select(&qty.max().unwrap(), &target).is_ok());
}

#[test]
fn test_insert_update_delete_from_staging_table() {
    let m = contacts();
    let staging_model = m.clone_schema().unwrap();
    let staging = DbTable::temporary(&staging_model, "contacts_staging");
    let target = DbTable::new(&m);
    let source = staging.query().unwrap();

    let insert = insert_statement(&source, &target, None, true).unwrap();
    let (text, _) = SqlGenerator::new(Dialect::Postgres).insert(&insert).unwrap();
    assert_eq!(
        text,
        "INSERT INTO \"contacts\" (\"id\", \"name\", \"age\") \
         SELECT t0.\"id\", t0.\"name\", t0.\"age\" FROM \"contacts_staging\" AS t0"
    );

    let update = update_statement(&source, &target).unwrap();
    let (text, _) = SqlGenerator::new(Dialect::Postgres).update(&update).unwrap();
    assert_eq!(
        text,
        "UPDATE \"contacts\" AS t0 SET \"name\" = t1.\"name\", \"age\" = t1.\"age\" \
         FROM \"contacts_staging\" AS t1 WHERE (t1.\"id\" = t0.\"id\")"
    );
    let (text, _) = SqlGenerator::new(Dialect::Mysql).update(&update).unwrap();
    assert_eq!(
        text,
        "UPDATE `contacts` AS t0 INNER JOIN `contacts_staging` AS t1 ON (t1.`id` = t0.`id`) \
         SET t0.`name` = t1.`name`, t0.`age` = t1.`age`"
    );

    let age = staging_model.column("age").unwrap();
    let retired = source
        .filter(&age.greater_than(&Column::constant(65).unwrap()).unwrap())
        .unwrap();
    let delete = delete_statement(&retired, &target).unwrap();
    let (text, _) = SqlGenerator::new(Dialect::Postgres).delete(&delete).unwrap();
    assert_eq!(
        text,
        "DELETE FROM \"contacts\" AS t0 WHERE EXISTS (SELECT 1 FROM \"contacts_staging\" AS t1 \
         WHERE (t1.\"id\" = t0.\"id\") AND (t1.\"age\" > 65))"
    );
}

#[test]
fn test_update_and_delete_from_a_query_over_the_target_table() {
    let m = contacts();
    let table = DbTable::new(&m);
    let age = m.column("age").unwrap();
    let source = table
        .query()
        .unwrap()
        .filter(&age.greater_than(&Column::param(30).unwrap()).unwrap())
        .unwrap();

    let update = update_statement(&source, &table).unwrap();
    let (text, params) = SqlGenerator::new(Dialect::Postgres).update(&update).unwrap();
    assert_eq!(
        text,
        "UPDATE \"contacts\" AS t0 SET \"name\" = t1.\"name\", \"age\" = t1.\"age\" \
         FROM \"contacts\" AS t1 WHERE (t1.\"id\" = t0.\"id\") AND (t1.\"age\" > $1)"
    );
    assert_eq!(params, vec![Value::Int(30)]);

    let delete = delete_statement(&source, &table).unwrap();
    let (text, params) = SqlGenerator::new(Dialect::Postgres).delete(&delete).unwrap();
    assert_eq!(
        text,
        "DELETE FROM \"contacts\" AS t0 WHERE EXISTS (SELECT 1 FROM \"contacts\" AS t1 \
         WHERE (t1.\"id\" = t0.\"id\") AND (t1.\"age\" > $1))"
    );
    assert_eq!(params, vec![Value::Int(30)]);
    assert_eq!(delete.target().name(), "contacts");
}

#[test]
fn test_child_insert_joins_parent_table() {
    let (_order, line) = orders();
    let staging_model = line.clone_schema().unwrap();
    let staging = DbTable::temporary(&staging_model, "line_staging");
    let insert =
        insert_statement(&staging.query().unwrap(), &DbTable::new(&line), None, true).unwrap();
    let (text, _) = SqlGenerator::new(Dialect::Postgres).insert(&insert).unwrap();
    assert_eq!(
        text,
        "INSERT INTO \"lines\" (\"order_id\", \"line_no\", \"qty\") \
         SELECT t0.\"order_id\", t0.\"line_no\", t0.\"qty\" FROM \"line_staging\" AS t0 \
         INNER JOIN \"orders\" AS t1 ON (t0.\"order_id\" = t1.\"id\")"
    );
}

#[test]
fn test_parent_join_skipped_only_while_origin_is_unchanged() {
    let (order, _) = orders();
    let parent = DbTable::new(&order);
    let note = order.column("note").unwrap();
    let derived = parent
        .query()
        .unwrap()
        .filter(&note.is_not_null())
        .unwrap();
    assert!(!needs_parent_join(&derived, &parent));
    assert!(needs_parent_join(&derived, &DbTable::new(&order)));

    parent.provenance().bump();
    assert!(needs_parent_join(&derived, &parent));
}

#[test]
fn test_sequential_key_and_child_query() {
    let (order, line) = orders();
    let note = order.column("note").unwrap();
    let q = DbTable::new(&order)
        .query()
        .unwrap()
        .order_by(&[ColumnSort::desc(&note)])
        .unwrap()
        .take(2)
        .unwrap();

    let key = q.sequential_key("tmp_").unwrap();
    assert!(Arc::ptr_eq(&key, &q.sequential_key("other_").unwrap()));
    assert!(Arc::ptr_eq(&key, &q.clone().sequential_key("tmp_").unwrap()));
    let table = format!("tmp_orders_{}", order.id().get());
    assert_eq!(key.table().name(), table);
    assert!(key.table().is_temporary());

    let (populate, _) = SqlGenerator::new(Dialect::Postgres)
        .insert(key.populate())
        .unwrap();
    assert_eq!(
        populate,
        format!(
            "INSERT INTO \"{}\" (\"id\") SELECT t0.\"id\" FROM \"orders\" AS t0 \
             ORDER BY t0.\"note\" DESC, t0.\"id\" ASC LIMIT 2",
            table
        )
    );
    assert_eq!(
        SqlGenerator::new(Dialect::Postgres).create_table(key.table()),
        format!(
            "CREATE TEMPORARY TABLE \"{}\" (\"sys_row_id\" BIGINT GENERATED BY DEFAULT AS IDENTITY, \
             \"id\" INTEGER NOT NULL, PRIMARY KEY (\"sys_row_id\"))",
            table
        )
    );
    assert_eq!(
        SqlGenerator::new(Dialect::Sqlite).create_table(key.table()),
        format!(
            "CREATE TEMPORARY TABLE \"{}\" (\"sys_row_id\" INTEGER PRIMARY KEY AUTOINCREMENT, \
             \"id\" INTEGER NOT NULL)",
            table
        )
    );

    let lines = q.child_query("lines", "tmp_").unwrap();
    assert_eq!(lines.model(), &line);
    assert!(lines.provenance().original().unwrap().ptr_eq(q.provenance()));
    assert_eq!(
        sql(&lines).0,
        format!(
            "SELECT t0.\"order_id\" AS \"order_id\", t0.\"line_no\" AS \"line_no\", t0.\"qty\" AS \"qty\" \
             FROM \"lines\" AS t0 INNER JOIN \"{}\" AS t1 ON (t0.\"order_id\" = t1.\"id\") \
             ORDER BY t1.\"sys_row_id\" ASC, t0.\"order_id\" ASC, t0.\"line_no\" ASC",
            table
        )
    );

    assert!(matches!(
        q.child_query("missing", "tmp_"),
        Err(Error::Argument(_))
    ));
}

#[test]
fn test_keyless_sequential_key_stores_every_column() {
    let m = notes();
    let q = DbTable::new(&m).query().unwrap().take(3).unwrap();
    let key = q.sequential_key("tmp_").unwrap();
    let table = format!("tmp_notes_{}", m.id().get());
    assert_eq!(key.key_columns().len(), 2);
    assert_eq!(
        SqlGenerator::new(Dialect::Postgres).create_table(key.table()),
        format!(
            "CREATE TEMPORARY TABLE \"{}\" (\"sys_row_id\" BIGINT GENERATED BY DEFAULT AS IDENTITY, \
             \"body\" TEXT NOT NULL, \"tag\" TEXT, PRIMARY KEY (\"sys_row_id\"))",
            table
        )
    );
    let (populate, _) = SqlGenerator::new(Dialect::Postgres)
        .insert(key.populate())
        .unwrap();
    assert_eq!(
        populate,
        format!(
            "INSERT INTO \"{}\" (\"body\", \"tag\") SELECT t0.\"body\", t0.\"tag\" \
             FROM \"notes\" AS t0 ORDER BY t0.\"body\" ASC, t0.\"tag\" ASC LIMIT 3",
            table
        )
    );

    let bare = ModelBuilder::new("Empty").build().unwrap();
    let q = DbTable::new(&bare).query().unwrap();
    assert!(matches!(q.sequential_key("tmp_"), Err(Error::Argument(_))));
    assert!(matches!(q.take(1), Err(Error::Argument(_))));
}
