#![allow(clippy::manual_async_fn)]

use asupersync::runtime::RuntimeBuilder;
use relset::prelude::*;

#[derive(Debug)]
struct DummyConnection;

impl Connection for DummyConnection {
    fn query(
        &self,
        _cx: &Cx,
        _sql: &str,
        _params: &[Value],
    ) -> impl std::future::Future<Output = Outcome<Vec<Row>, Error>> + Send {
        async {
            Outcome::Ok(vec![
                Row::from_pairs([("id", Value::Int(2)), ("age", Value::Int(40))]),
                Row::from_pairs([("id", Value::Int(1)), ("age", Value::Null)]),
            ])
        }
    }

    fn execute(
        &self,
        _cx: &Cx,
        _sql: &str,
        _params: &[Value],
    ) -> impl std::future::Future<Output = Outcome<u64, Error>> + Send {
        async { Outcome::Ok(0) }
    }
}

fn contact() -> Model {
    ModelBuilder::new("Contact")
        .column(ColumnDef::new("id", DataType::Int))
        .column(ColumnDef::new("age", DataType::Int).nullable())
        .primary_key("PK_Contact", &[("id", SortDirection::Ascending)])
        .build()
        .unwrap()
}

#[test]
fn prelude_composes_loads_and_sorts() {
    let model = contact();
    let age = model.require_column("age").unwrap();
    let adults = DbTable::new(&model)
        .query()
        .unwrap()
        .filter(
            &age.greater_equal(&Column::param(18).unwrap())
                .unwrap(),
        )
        .unwrap();

    let session = Session::new(DummyConnection);
    let rt = RuntimeBuilder::current_thread()
        .build()
        .expect("create asupersync runtime");
    let cx = Cx::for_testing();
    let mut data = rt.block_on(async {
        match session.to_dataset(&cx, &adults).await {
            Outcome::Ok(data) => data,
            Outcome::Err(e) => panic!("unexpected error: {e}"),
            Outcome::Cancelled(r) => panic!("cancelled: {r:?}"),
            Outcome::Panicked(p) => panic!("panicked: {p:?}"),
        }
    });
    assert_eq!(data.len(), 2);

    let id = model.require_column("id").unwrap();
    data.sort(&RowComparer::asc(&id).unwrap()).unwrap();
    assert_eq!(data.get(0, &id).unwrap(), Value::Int(1));
    assert_eq!(
        data.to_json().unwrap(),
        r#"[{"id":1,"age":null},{"id":2,"age":40}]"#
    );
}
