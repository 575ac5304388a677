//! Runs a normalized query against the target MSSQL database and
//! drives it as a row stream, honoring `MSSQL_QUERY_TIMEOUT` and
//! handing rows to the caller in page-sized batches so an unbounded
//! result set never has to sit fully in memory (module H's "drive a
//! DB cursor" and "fetch next batch" steps).

use std::time::Duration;

use async_trait::async_trait;
use futures::TryStreamExt;
use tiberius::{Column, ColumnType, Row};

use crate::cell::CellValue;
use crate::error::SqlError;
use crate::pool::MssqlPool;

/// What a `BatchSink` tells the stream driver to do next.
pub enum BatchControl {
    /// Keep pulling rows from the cursor.
    Continue,
    /// Stop fetching further rows — either the row cap was reached or
    /// cooperative cancellation was observed. Any buffered rows in the
    /// batch that triggered the stop have already been delivered.
    Stop,
}

/// Receives page-sized row batches as `execute_streaming` pulls them
/// off the cursor. Implemented by the worker loop, which folds each
/// batch into the chunk encoder and checks cooperative cancellation
/// and the row cap between batches (module H, steps 7a-7f). A trait
/// rather than a plain closure so the per-batch body can freely hold
/// `&mut` state across `.await` points the way `JobStore`'s
/// `#[async_trait]` methods already do elsewhere in this workspace.
#[async_trait]
pub trait BatchSink: Send {
    async fn on_batch(&mut self, batch: Vec<Vec<CellValue>>) -> Result<BatchControl, SqlError>;
}

/// Execute `sql` against the pool and feed `sink` page-sized batches
/// of rows (plus one final partial batch), never materializing the
/// whole result set at once. `query_timeout` bounds the entire cursor
/// lifetime, matching `MSSQL_QUERY_TIMEOUT`'s scope over the worker's
/// `SELECT` in the Python original. Returns the cursor's column names,
/// captured before the first row is consumed.
pub async fn execute_streaming(
    pool: &MssqlPool,
    sql: &str,
    query_timeout: Duration,
    page_size: usize,
    sink: &mut dyn BatchSink,
) -> Result<Vec<String>, SqlError> {
    let mut conn = pool.acquire().await?;
    let page_size = page_size.max(1);

    let run = async {
        let mut stream = conn.query(sql, &[]).await?;
        let columns = stream
            .columns()
            .await?
            .map(|cols| cols.iter().map(Column::name).map(str::to_string).collect())
            .unwrap_or_default();

        let mut row_stream = stream.into_row_stream();
        let mut batch: Vec<Vec<CellValue>> = Vec::with_capacity(page_size);

        loop {
            match row_stream.try_next().await? {
                Some(row) => {
                    batch.push(row_to_cells(&row));
                    if batch.len() >= page_size {
                        let ready = std::mem::replace(&mut batch, Vec::with_capacity(page_size));
                        if matches!(sink.on_batch(ready).await?, BatchControl::Stop) {
                            return Ok::<_, SqlError>(columns);
                        }
                    }
                }
                None => {
                    if !batch.is_empty() {
                        sink.on_batch(batch).await?;
                    }
                    return Ok(columns);
                }
            }
        }
    };

    tokio::time::timeout(query_timeout, run)
        .await
        .map_err(|_| SqlError::Timeout(query_timeout))?
}

fn row_to_cells(row: &Row) -> Vec<CellValue> {
    row.columns()
        .iter()
        .enumerate()
        .map(|(i, col)| cell_at(row, i, col.column_type()))
        .collect()
}

fn cell_at(row: &Row, i: usize, column_type: ColumnType) -> CellValue {
    use ColumnType::*;
    match column_type {
        Bit | Bitn => row.get::<bool, _>(i).map(CellValue::Bool).unwrap_or(CellValue::Null),
        Int1 | Int2 | Int4 | Int8 | Intn => {
            row.get::<i64, _>(i).map(CellValue::Int).unwrap_or(CellValue::Null)
        }
        Float4 | Float8 | Floatn => {
            row.get::<f64, _>(i).map(CellValue::Float).unwrap_or(CellValue::Null)
        }
        Datetime | Datetime2 | Datetimen => row
            .get::<chrono::NaiveDateTime, _>(i)
            .map(CellValue::DateTime)
            .unwrap_or(CellValue::Null),
        Daten => row
            .get::<chrono::NaiveDate, _>(i)
            .map(CellValue::Date)
            .unwrap_or(CellValue::Null),
        Timen => row
            .get::<chrono::NaiveTime, _>(i)
            .map(CellValue::Time)
            .unwrap_or(CellValue::Null),
        BigVarBin | BigBinary | Image => row
            .get::<&[u8], _>(i)
            .map(|b| CellValue::Bytes(b.to_vec()))
            .unwrap_or(CellValue::Null),
        _ => row
            .get::<&str, _>(i)
            .map(|s| CellValue::Text(s.to_string()))
            .unwrap_or(CellValue::Null),
    }
}
