//! Startup descriptor-cache population (Table Descriptor Cache, §4.3).
//!
//! On startup the writer's descriptor cache is empty, but the database
//! already remembers everything a prior run knew: `titles` maps each
//! variable id to its `tid`, and each data table's information-schema
//! columns say how many fields it holds and how wide its type is. This
//! module rebuilds one [`TableDescriptor`] per existing variable from that
//! state, and repairs any column whose name no longer matches the canonical
//! form for the table's current column count — the only schema-repair
//! performed outside the write path.

use crate::descriptor::{digit_width, CachedMeta, DescriptorCache, TableDescriptor};
use crate::encoding::{sql_type_from_pg, SqlType};
use crate::error::SqlError;
use sqlx::{PgPool, Row};

const MASTER_TABLE: &str = "titles";

/// Scans `titles` and every existing data table's information schema,
/// inserting a descriptor for each variable found into `cache`.
pub async fn populate(pool: &PgPool, cache: &DescriptorCache) -> Result<(), SqlError> {
    let rows = sqlx::query(&format!("SELECT name, tid FROM {MASTER_TABLE}"))
        .fetch_all(pool)
        .await
        .map_err(|source| SqlError::Statement {
            statement: format!("SELECT FROM {MASTER_TABLE}"),
            source,
        })?;

    let mut scanned = 0usize;
    for row in &rows {
        let name: String = row.try_get("name").unwrap_or_default();
        let tid: i64 = row.try_get("tid").unwrap_or_default();
        if name.is_empty() {
            continue;
        }
        if let Some(desc) = scan_variable(pool, &name, tid).await? {
            cache.insert(desc);
            scanned += 1;
        }
    }
    tracing::info!(total = rows.len(), rebuilt = scanned, "descriptor cache rebuilt from database");
    Ok(())
}

/// Rebuilds a single variable's descriptor from its data table's columns and
/// its most recent metadata row, repairing non-canonical column names along
/// the way. Returns `None` if the variable has no data table yet (it was
/// registered in `titles` but never received a non-empty first sample).
async fn scan_variable(pool: &PgPool, id: &str, tid: i64) -> Result<Option<TableDescriptor>, SqlError> {
    let table = format!("var_{tid:06}");
    let cols = sqlx::query(
        "SELECT column_name, data_type, character_maximum_length \
         FROM information_schema.columns WHERE table_name = $1 ORDER BY ordinal_position",
    )
    .bind(&table)
    .fetch_all(pool)
    .await
    .map_err(|source| SqlError::Statement {
        statement: format!("information_schema.columns for {table}"),
        source,
    })?;

    if cols.is_empty() {
        return Ok(None);
    }

    let mut data_cols: Vec<(String, String, Option<i32>)> = Vec::new();
    for row in &cols {
        let name: String = row.try_get("column_name").unwrap_or_default();
        if name == "time" || name == "age" {
            continue;
        }
        let data_type: String = row.try_get("data_type").unwrap_or_default();
        let char_len: Option<i32> = row.try_get::<Option<i32>, _>("character_maximum_length").unwrap_or(None);
        data_cols.push((name, data_type, char_len));
    }

    let col_count = data_cols.len();
    if col_count == 0 {
        return Ok(Some(TableDescriptor::new(id, tid, 0, SqlType::Integer)));
    }

    let sql_type = sql_type_from_pg(&data_cols[0].1, data_cols[0].2);

    let width = digit_width(col_count);
    for (i, (name, _, _)) in data_cols.iter().enumerate() {
        let canonical = format!("c{:0w$}", i, w = width);
        if *name != canonical {
            let stmt = format!("ALTER TABLE {table} RENAME COLUMN {name} TO {canonical}");
            sqlx::query(&stmt).execute(pool).await.map_err(|source| SqlError::Statement {
                statement: stmt.clone(),
                source,
            })?;
            tracing::info!(id, from = %name, to = %canonical, "repaired column name to canonical form");
        }
    }

    let mut descriptor = TableDescriptor::new(id, tid, col_count, sql_type);
    descriptor.meta = fetch_latest_meta(pool, tid).await?;
    Ok(Some(descriptor))
}

/// Fetches the most recent metadata row for `tid`, if its metadata table
/// exists and has any rows yet.
async fn fetch_latest_meta(pool: &PgPool, tid: i64) -> Result<Option<CachedMeta>, SqlError> {
    let meta_table = format!("var_{tid:06}_meta");
    let exists: bool =
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM information_schema.tables WHERE table_name = $1)")
            .bind(&meta_table)
            .fetch_one(pool)
            .await
            .map_err(|source| SqlError::Statement {
                statement: "information_schema.tables".to_string(),
                source,
            })?;
    if !exists {
        return Ok(None);
    }

    let row = sqlx::query(&format!(
        "SELECT serial, sampling, ndim, shape, unit FROM {meta_table} ORDER BY serial DESC LIMIT 1"
    ))
    .fetch_optional(pool)
    .await
    .map_err(|source| SqlError::Statement {
        statement: format!("SELECT latest from {meta_table}"),
        source,
    })?;

    let Some(row) = row else {
        return Ok(None);
    };

    let serial: i64 = row.try_get("serial").unwrap_or(0);
    let sampling: i32 = row.try_get("sampling").unwrap_or(1);
    let ndim: i16 = row.try_get("ndim").unwrap_or(0);
    let shape_text: Option<String> = row.try_get::<Option<String>, _>("shape").unwrap_or(None);
    let unit: Option<String> = row.try_get::<Option<String>, _>("unit").unwrap_or(None);

    let shape: Vec<usize> = shape_text
        .as_deref()
        .map(|s| s.split(',').filter_map(|p| p.trim().parse().ok()).collect())
        .unwrap_or_default();

    Ok(Some(CachedMeta {
        version: serial,
        sampling: sampling.max(1) as u32,
        ndim: ndim.max(0) as usize,
        shape,
        unit,
    }))
}
