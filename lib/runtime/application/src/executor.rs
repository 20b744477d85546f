use std::collections::BTreeMap;

use fluxgauge_domain::{MetricQuery, QueryError, QueryOutcome, Row, ScalarResult};

use crate::connection::ConnectionHandle;
use crate::pool::{PoolError, WorkerPool};

/// Column that only numbers a row's table; never useful as an attribute.
const TABLE_COLUMN: &str = "table";

#[derive(Debug, Clone)]
pub struct QueryExecutor {
    pool: WorkerPool,
}

impl QueryExecutor {
    pub fn new(pool: WorkerPool) -> Self {
        Self { pool }
    }

    /// Execute the metric's query on the worker pool and extract its scalar.
    pub async fn run(
        &self,
        handle: &ConnectionHandle,
        metric: &MetricQuery,
    ) -> Result<QueryOutcome, QueryError> {
        let client = handle.client();
        let query = metric.query.clone();
        let rows = self
            .pool
            .run(move || client.query(&query))
            .await
            .map_err(|err| match err {
                PoolError::Timeout(after) => QueryError::Timeout(after),
                PoolError::Closed => QueryError::PoolClosed,
            })??;
        extract_scalar(rows, &metric.value_field)
    }
}

/// Take `value_field` from the first row; every other column of that row
/// becomes a string attribute.
pub fn extract_scalar(rows: Vec<Row>, value_field: &str) -> Result<QueryOutcome, QueryError> {
    let Some(row) = rows.into_iter().next() else {
        return Ok(QueryOutcome::NoData);
    };
    let value = row
        .get(value_field)
        .cloned()
        .ok_or_else(|| QueryError::MissingField {
            field: value_field.to_string(),
        })?;
    let attributes: BTreeMap<String, String> = row
        .fields()
        .filter(|(name, _)| *name != value_field && *name != TABLE_COLUMN)
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .collect();
    Ok(QueryOutcome::Scalar(ScalarResult { value, attributes }))
}
