//! Distributing child rows into their parent rows.

use std::collections::HashMap;

use relset_core::{ChildModel, DataSet, Error, Result, ValueKey};

/// Copy every row of `children` into the `child` data set of the parent row
/// whose relationship key it carries. Rows without a parent are skipped.
///
/// Returns the number of rows placed.
pub(crate) fn distribute(parent: &mut DataSet, child: &ChildModel, children: &DataSet) -> Result<usize> {
    let mut index: HashMap<ValueKey, usize> = HashMap::with_capacity(parent.len());
    for (i, row) in parent.rows().iter().enumerate() {
        let key = child
            .relationship()
            .iter()
            .map(|pair| row.get(pair.target()))
            .collect::<Result<Vec<_>>>()?;
        index.entry(ValueKey(key)).or_insert(i);
    }

    let mut placed = 0;
    for row in children.rows() {
        let key = child
            .relationship()
            .iter()
            .map(|pair| row.get(pair.source()))
            .collect::<Result<Vec<_>>>()?;
        let Some(&ordinal) = index.get(&ValueKey(key)) else {
            tracing::warn!(
                child = %child.name(),
                parent = %parent.model().type_name(),
                "Child row has no parent row, skipped"
            );
            continue;
        };
        let target = parent
            .row_mut(ordinal)
            .and_then(|r| r.child_mut(child.name()))
            .ok_or_else(|| {
                Error::invalid_state(format!("parent row has no child data set '{}'", child.name()))
            })?;
        target.append_copy(row)?;
        placed += 1;
    }
    tracing::trace!(child = %child.name(), rows = placed, "Distributed child rows");
    Ok(placed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use relset_core::{ColumnDef, DataType, ModelBuilder, SortDirection, Value};

    #[test]
    fn test_rows_follow_their_parent_key() {
        let line = ModelBuilder::new("Line")
            .column(ColumnDef::new("order_id", DataType::Int))
            .column(ColumnDef::new("qty", DataType::Int))
            .build()
            .unwrap();
        let order = ModelBuilder::new("Order")
            .column(ColumnDef::new("id", DataType::Int))
            .primary_key("PK_Order", &[("id", SortDirection::Ascending)])
            .child("lines", &line, &[("order_id", "id")])
            .build()
            .unwrap();
        let id = order.column("id").unwrap();
        let order_id = line.column("order_id").unwrap();
        let qty = line.column("qty").unwrap();

        let mut parents = DataSet::new(&order);
        for v in [10, 20] {
            let r = parents.add_row();
            parents.set(r, &id, v).unwrap();
        }
        let mut lines = DataSet::new(&line);
        for (o, q) in [(20, 1), (10, 2), (20, 3), (99, 4)] {
            let r = lines.add_row();
            lines.set(r, &order_id, o).unwrap();
            lines.set(r, &qty, q).unwrap();
        }

        let child = order.child("lines").unwrap().clone();
        assert_eq!(distribute(&mut parents, &child, &lines).unwrap(), 3);

        let first = parents.row(0).unwrap().child("lines").unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first.get(0, &qty).unwrap(), Value::Int(2));
        let second = parents.row(1).unwrap().child("lines").unwrap();
        let quantities: Vec<Value> = (0..second.len())
            .map(|i| second.get(i, &qty).unwrap())
            .collect();
        assert_eq!(quantities, vec![Value::Int(1), Value::Int(3)]);
    }
}
