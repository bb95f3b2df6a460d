//! SQL Server executor implementation using tiberius
//!
//! Runs statements on a pooled connection with bound parameters and converts
//! result rows into [`Record`]s.

use crate::context::OpContext;
use crate::db::executor::Executor;
use crate::db::pool::TdsConnectionManager;
use crate::db::query::{CellValue, Param, Record, Statement};
use crate::error::{Error, Result};
use async_trait::async_trait;
use tiberius::{Column, ColumnType, Row, ToSql};

pub type TdsPool = bb8::Pool<TdsConnectionManager>;

/// Executor over a bb8 pool of tiberius connections
#[derive(Clone)]
pub struct SqlServerExecutor {
    pool: TdsPool,
}

impl SqlServerExecutor {
    pub fn new(pool: TdsPool) -> Self {
        Self { pool }
    }

    async fn checkout(&self) -> Result<bb8::PooledConnection<'_, TdsConnectionManager>> {
        self.pool.get().await.map_err(|e| match e {
            bb8::RunError::User(err) => err,
            bb8::RunError::TimedOut => {
                Error::Transient("timed out waiting for a pooled connection".to_string())
            }
        })
    }
}

fn bind(params: &[Param]) -> Vec<&dyn ToSql> {
    params
        .iter()
        .map(|p| match p {
            Param::Str(s) => s as &dyn ToSql,
            Param::Int(i) => i as &dyn ToSql,
        })
        .collect()
}

#[async_trait]
impl Executor for SqlServerExecutor {
    async fn execute(&self, ctx: &OpContext, stmt: &Statement) -> Result<u64> {
        tracing::debug!(sql = %stmt, params = stmt.params.len(), "execute");
        ctx.run(async {
            let mut conn = self.checkout().await?;
            let params = bind(&stmt.params);
            conn.in_flight = true;
            let result = conn.client.execute(stmt.sql.as_str(), &params).await;
            conn.in_flight = false;
            Ok(result.map_err(Error::from_driver)?.total())
        })
        .await
    }

    async fn query(&self, ctx: &OpContext, stmt: &Statement) -> Result<Vec<Record>> {
        tracing::debug!(sql = %stmt, params = stmt.params.len(), "query");
        ctx.run(async {
            let mut conn = self.checkout().await?;
            let params = bind(&stmt.params);
            conn.in_flight = true;
            let rows = async {
                conn.client
                    .query(stmt.sql.as_str(), &params)
                    .await?
                    .into_first_result()
                    .await
            }
            .await;
            conn.in_flight = false;
            let rows = rows.map_err(Error::from_driver)?;
            Ok(rows.iter().map(record_from_row).collect())
        })
        .await
    }
}

// ---- row conversion ----

fn record_from_row(row: &Row) -> Record {
    let values = row
        .columns()
        .iter()
        .enumerate()
        .map(|(i, col)| extract_cell_value(row, i, col))
        .collect();
    Record::new(values)
}

fn extract_cell_value(row: &Row, index: usize, col: &Column) -> CellValue {
    match col.column_type() {
        ColumnType::Null => CellValue::Null,
        ColumnType::Bit | ColumnType::Bitn => row
            .try_get::<bool, _>(index)
            .ok()
            .flatten()
            .map(CellValue::Bool)
            .unwrap_or(CellValue::Null),
        ColumnType::Int1 => row
            .try_get::<u8, _>(index)
            .ok()
            .flatten()
            .map(|v| CellValue::Int(v as i64))
            .unwrap_or(CellValue::Null),
        ColumnType::Int2 => row
            .try_get::<i16, _>(index)
            .ok()
            .flatten()
            .map(|v| CellValue::Int(v as i64))
            .unwrap_or(CellValue::Null),
        ColumnType::Int4 => row
            .try_get::<i32, _>(index)
            .ok()
            .flatten()
            .map(|v| CellValue::Int(v as i64))
            .unwrap_or(CellValue::Null),
        ColumnType::Int8 => row
            .try_get::<i64, _>(index)
            .ok()
            .flatten()
            .map(CellValue::Int)
            .unwrap_or(CellValue::Null),
        // Intn carries its width in the data; try the widest first
        ColumnType::Intn => {
            if let Some(v) = row.try_get::<i64, _>(index).ok().flatten() {
                return CellValue::Int(v);
            }
            if let Some(v) = row.try_get::<i32, _>(index).ok().flatten() {
                return CellValue::Int(v as i64);
            }
            if let Some(v) = row.try_get::<i16, _>(index).ok().flatten() {
                return CellValue::Int(v as i64);
            }
            row.try_get::<u8, _>(index)
                .ok()
                .flatten()
                .map(|v| CellValue::Int(v as i64))
                .unwrap_or(CellValue::Null)
        }
        ColumnType::BigVarChar
        | ColumnType::BigChar
        | ColumnType::NVarchar
        | ColumnType::NChar
        | ColumnType::Text
        | ColumnType::NText => row
            .try_get::<&str, _>(index)
            .ok()
            .flatten()
            .map(|v| CellValue::String(v.to_string()))
            .unwrap_or(CellValue::Null),
        ColumnType::Guid => row
            .try_get::<tiberius::Uuid, _>(index)
            .ok()
            .flatten()
            .map(|v| CellValue::String(v.to_string()))
            .unwrap_or(CellValue::Null),
        ColumnType::BigVarBin | ColumnType::BigBinary | ColumnType::Image => row
            .try_get::<&[u8], _>(index)
            .ok()
            .flatten()
            .map(|v| CellValue::Binary(v.to_vec()))
            .unwrap_or(CellValue::Null),
        _ => {
            if let Some(v) = row.try_get::<&str, _>(index).ok().flatten() {
                return CellValue::String(v.to_string());
            }
            if let Some(v) = row.try_get::<i64, _>(index).ok().flatten() {
                return CellValue::Int(v);
            }
            CellValue::String(format!("<{:?}>", col.column_type()))
        }
    }
}
