//! Expressions, aggregates, sorting and JSON over a parent/child data set.

use relset_core::{
    Column, ColumnDef, DataSet, DataType, JsonFilter, Model, ModelBuilder, RowComparer,
    SortDirection, Value,
};

fn invoices() -> (Model, Model) {
    let line = ModelBuilder::new("InvoiceLine")
        .column(ColumnDef::new("invoice_id", DataType::Int))
        .column(ColumnDef::new("qty", DataType::Int))
        .column(ColumnDef::new("price", DataType::Int).nullable())
        .build()
        .unwrap();
    let invoice = ModelBuilder::new("Invoice")
        .column(ColumnDef::new("id", DataType::Int))
        .column(ColumnDef::new("customer", DataType::Text))
        .primary_key("PK_Invoice", &[("id", SortDirection::Ascending)])
        .child("lines", &line, &[("invoice_id", "id")])
        .build()
        .unwrap();
    (invoice, line)
}

/// Invoice 1 ("b") with lines (2, 10), (1, NULL), (2, NULL); invoice 2 ("a")
/// with line (3, 5).
fn sample(invoice: &Model, line: &Model) -> DataSet {
    let id = invoice.column("id").unwrap();
    let customer = invoice.column("customer").unwrap();
    let invoice_id = line.column("invoice_id").unwrap();
    let qty = line.column("qty").unwrap();
    let price = line.column("price").unwrap();

    let mut data = DataSet::new(invoice);
    for (n, who, lines) in [
        (1, "b", vec![(2, Value::Int(10)), (1, Value::Null), (2, Value::Null)]),
        (2, "a", vec![(3, Value::Int(5))]),
    ] {
        let r = data.add_row();
        data.set(r, &id, n).unwrap();
        data.set(r, &customer, who).unwrap();
        let set = data.row_mut(r).unwrap().child_mut("lines").unwrap();
        for (q, p) in lines {
            let l = set.add_row();
            set.set(l, &invoice_id, n).unwrap();
            set.set(l, &qty, q).unwrap();
            set.set(l, &price, p).unwrap();
        }
    }
    data
}

#[test]
fn test_line_amounts_and_invoice_totals() {
    let (invoice, line) = invoices();
    let data = sample(&invoice, &line);
    let qty = line.column("qty").unwrap();
    let price = line.column("price").unwrap();

    let amount = qty.mul(&price).unwrap();
    let lines = data.row(0).unwrap().child("lines").unwrap();
    let amounts: Vec<Value> = lines
        .rows()
        .iter()
        .map(|r| amount.eval(r).unwrap())
        .collect();
    assert_eq!(amounts, vec![Value::Int(20), Value::Null, Value::Null]);

    let total = qty.sum().unwrap();
    assert_eq!(data.get(0, &total).unwrap(), Value::Int(5));
    assert_eq!(data.get(1, &total).unwrap(), Value::Int(3));
    assert_eq!(data.aggregate(&total).unwrap(), Value::Int(8));
    assert_eq!(data.get(0, &price.count().unwrap()).unwrap(), Value::BigInt(1));
}

#[test]
fn test_predicates_use_three_valued_logic() {
    let (invoice, line) = invoices();
    let data = sample(&invoice, &line);
    let qty = line.column("qty").unwrap();
    let price = line.column("price").unwrap();

    let pricey = price.greater_than(&Column::constant(5).unwrap()).unwrap();
    let bulk = qty.greater_than(&Column::constant(1).unwrap()).unwrap();
    let both = pricey.and(&bulk).unwrap();
    let lines = data.row(0).unwrap().child("lines").unwrap();
    let results: Vec<Value> = lines
        .rows()
        .iter()
        .map(|r| both.eval(r).unwrap())
        .collect();
    assert_eq!(
        results,
        vec![Value::Bool(true), Value::Bool(false), Value::Null]
    );
}

#[test]
fn test_sorted_primary_keys_as_json() {
    let (invoice, line) = invoices();
    let mut data = sample(&invoice, &line);
    let customer = invoice.column("customer").unwrap();
    data.sort(&RowComparer::asc(&customer).unwrap()).unwrap();

    assert_eq!(
        data.to_json_filtered(&JsonFilter::PrimaryKeyOnly).unwrap(),
        r#"[{"id":2},{"id":1}]"#
    );
    let ordinals: Vec<Option<usize>> = data.rows().iter().map(|r| r.ordinal()).collect();
    assert_eq!(ordinals, vec![Some(0), Some(1)]);

    let back = DataSet::from_json(&invoice, &data.to_json().unwrap()).unwrap();
    assert_eq!(back.len(), 2);
    assert_eq!(back.row(1).unwrap().child("lines").unwrap().len(), 3);
}
