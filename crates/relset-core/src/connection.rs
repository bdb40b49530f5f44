//! The backend contract.
//!
//! A `Connection` executes SQL text produced by `relset-query` and hands rows
//! back. Every call takes a [`Cx`] so drivers can observe cancellation at their
//! own suspension points; callers check `cx.cancel_reason()` around each call.

use std::future::Future;

use asupersync::{Cx, Outcome};

use crate::error::Error;
use crate::row::Row;
use crate::value::Value;

/// A database connection able to run parameterized statements.
pub trait Connection: Send + Sync {
    /// Run a statement that returns rows.
    fn query(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<Vec<Row>, Error>> + Send;

    /// Run a statement and return the number of affected rows.
    fn execute(
        &self,
        cx: &Cx,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = Outcome<u64, Error>> + Send;

    /// Run several statements in order, stopping at the first failure.
    fn batch(
        &self,
        cx: &Cx,
        statements: &[(String, Vec<Value>)],
    ) -> impl Future<Output = Outcome<Vec<u64>, Error>> + Send {
        async move {
            let mut counts = Vec::with_capacity(statements.len());
            for (sql, params) in statements {
                match self.execute(cx, sql, params).await {
                    Outcome::Ok(n) => counts.push(n),
                    Outcome::Err(e) => return Outcome::Err(e),
                    Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                    Outcome::Panicked(p) => return Outcome::Panicked(p),
                }
            }
            Outcome::Ok(counts)
        }
    }
}
