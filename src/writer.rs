//! SQL Writer — the single consumer of the queue. Resolves or creates a
//! variable's table, evolves its schema as the observed shape/type changes,
//! and appends a data row plus an optional metadata row, transactionally.

use crate::descriptor::{digit_width, CachedMeta, DescriptorCache, TableDescriptor};
use crate::encoding::{self, ElementType, SqlType};
use crate::error::{SqlError, WriterError};
use crate::grabber::Variable;
use crate::queue::QueueReceiver;
use crate::rules::sample_count;
use sqlx::PgPool;
use std::sync::Arc;

/// Master mapping table.
const MASTER_TABLE: &str = "titles";

/// TimescaleDB hypertable chunk width.
const HYPERTABLE_CHUNK: &str = "3 days";

pub struct Writer {
    pool: PgPool,
    descriptors: Arc<DescriptorCache>,
    use_hyper_tables: bool,
    /// Serializes the several transactions a schema change + row append may
    /// need, grouping them into one atomic unit of work. With exactly one
    /// writer task this is never contended; it documents the intended
    /// grouping rather than adding real concurrency control.
    tx_guard: tokio::sync::Mutex<()>,
}

impl Writer {
    pub fn new(pool: PgPool, descriptors: Arc<DescriptorCache>, use_hyper_tables: bool) -> Self {
        Writer {
            pool,
            descriptors,
            use_hyper_tables,
            tx_guard: tokio::sync::Mutex::new(()),
        }
    }

    /// Consumes samples off the queue until the channel closes. There is
    /// exactly one consumer.
    pub async fn run(self, mut queue: QueueReceiver, max_size: u64) {
        while let Some(sample) = queue.dequeue().await {
            let id = sample.id.clone();
            if let Err(e) = self.process(sample, max_size).await {
                tracing::error!(id = %id, error = %e, "sample dropped after write failure");
            }
        }
        tracing::info!("writer loop exiting: queue closed");
    }

    /// Processes one dequeued sample end to end: resolve or create its
    /// table, widen or grow columns as needed, then insert the row.
    async fn process(&self, sample: Variable, max_size: u64) -> Result<(), WriterError> {
        let _guard = self.tx_guard.lock().await;

        let field_count = sample_count(sample.field_count(), sample.sampling);

        // Drop oversized non-forced samples before touching the DB.
        if !sample.force {
            let bytes_per_elem = bytes_per_element(sample.element_type);
            if (field_count as u64) * bytes_per_elem > max_size {
                tracing::debug!(id = %sample.id, field_count, "oversized sample dropped at writer");
                return Ok(());
            }
        }

        // Resolve or create the descriptor.
        let mut descriptor = match self.descriptors.get(&sample.id) {
            Some(d) => d,
            None => self.first_sight(&sample, field_count).await?,
        };

        if field_count > 0 && descriptor.cols == 0 {
            // The variable was registered in `titles` (possibly on a prior,
            // empty first sample) but never got a data/metadata table,
            // since table creation is skipped whenever `n=0`. This sample
            // is the first with any fields, so create the table set now
            // instead of trying to ALTER a table that doesn't exist.
            let encoded = encoding::sql_type_for(sample.element_type);
            self.create_tables(descriptor.tid, field_count, &encoded).await?;
            descriptor.cols = field_count;
            descriptor.sql_type = encoded;
        } else if field_count > 0 {
            let encoded = encoding::sql_type_for(sample.element_type);

            // String width check.
            if matches!(sample.element_type, ElementType::VarString | ElementType::FixedString(_)) {
                let max_len = sample.payload.len();
                let required = encoding::string_column_type(max_len);
                if encoding::is_wider(&required, &descriptor.sql_type) {
                    self.widen_columns(&descriptor, &required).await?;
                    descriptor.sql_type = required;
                }
            } else if encoding::is_wider(&encoded, &descriptor.sql_type) {
                // Numeric widening.
                self.widen_columns(&descriptor, &encoded).await?;
                descriptor.sql_type = encoded;
            }

            // Grow columns if the sample carries more fields than we have
            // columns for.
            if field_count > descriptor.cols {
                self.grow_columns(&descriptor, field_count).await?;
                descriptor.cols = field_count;
            }
        }

        // Single transaction for the data row plus optional metadata row.
        self.insert_row_and_metadata(&mut descriptor, &sample, field_count)
            .await?;

        self.descriptors.insert(descriptor);
        Ok(())
    }

    /// Creates the DB-side table set for a variable seen for the first
    /// time: the `titles` row, the data table, its unique time index, and
    /// its metadata table, all inside the one transaction this function
    /// opens. A failure partway through rolls back the `titles` insert too,
    /// so there is never a `titles` row left pointing at a `tid` with no
    /// data/metadata table (invariant I1).
    async fn first_sight(&self, sample: &Variable, field_count: usize) -> Result<TableDescriptor, WriterError> {
        let mut tx = self.pool.begin().await.map_err(SqlError::Connection)?;

        let tid: i64 = sqlx::query_scalar(&format!(
            "INSERT INTO {MASTER_TABLE}(name, tid) VALUES($1, DEFAULT) RETURNING tid"
        ))
        .bind(&sample.id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|source| SqlError::Statement {
            statement: format!("INSERT INTO {MASTER_TABLE}"),
            source,
        })?;

        let sql_type = encoding::sql_type_for(sample.element_type);

        if field_count > 0 {
            create_tables_in(&mut tx, self.use_hyper_tables, tid, field_count, &sql_type).await?;
        }

        tx.commit().await.map_err(SqlError::Connection)?;

        Ok(TableDescriptor::new(&sample.id, tid, field_count, sql_type))
    }

    /// Creates a variable's data table, unique time index, and metadata
    /// table in its own transaction. Used when a variable that was
    /// registered empty (`n=0`, so `first_sight` skipped table creation)
    /// later receives its first non-empty sample.
    async fn create_tables(&self, tid: i64, field_count: usize, sql_type: &SqlType) -> Result<(), WriterError> {
        let mut tx = self.pool.begin().await.map_err(SqlError::Connection)?;
        create_tables_in(&mut tx, self.use_hyper_tables, tid, field_count, sql_type).await?;
        tx.commit().await.map_err(SqlError::Connection)?;
        Ok(())
    }

    /// Widens every data column to `new_type`, in its own transaction ahead
    /// of the data/metadata transaction.
    async fn widen_columns(&self, descriptor: &TableDescriptor, new_type: &SqlType) -> Result<(), WriterError> {
        if descriptor.cols == 0 {
            return Ok(());
        }
        let table = table_name(descriptor.tid)?;
        let mut tx = self.pool.begin().await.map_err(SqlError::Connection)?;
        let width = descriptor.digit_width();
        for i in 0..descriptor.cols {
            let col = format!("c{:0w$}", i, w = width);
            let stmt = format!("ALTER TABLE {table} ALTER COLUMN {col} TYPE {new_type}");
            exec(&mut tx, &stmt).await?;
        }
        tx.commit().await.map_err(SqlError::Connection)?;
        tracing::info!(id = %descriptor.id, new_type = %new_type, "widened data columns");
        Ok(())
    }

    /// Grows a data table to `new_count` columns: if the new count needs
    /// wider canonical names, rename existing columns first, then add the
    /// new ones.
    async fn grow_columns(&self, descriptor: &TableDescriptor, new_count: usize) -> Result<(), WriterError> {
        let table = table_name(descriptor.tid)?;
        let old_width = descriptor.digit_width();
        let new_width = digit_width(new_count);

        let mut tx = self.pool.begin().await.map_err(SqlError::Connection)?;

        if new_width != old_width {
            for i in 0..descriptor.cols {
                let old_name = format!("c{:0w$}", i, w = old_width);
                let new_name = format!("c{:0w$}", i, w = new_width);
                if old_name != new_name {
                    let stmt = format!("ALTER TABLE {table} RENAME COLUMN {old_name} TO {new_name}");
                    exec(&mut tx, &stmt).await?;
                }
            }
        }

        for i in descriptor.cols..new_count {
            let name = format!("c{:0w$}", i, w = new_width);
            let stmt = format!("ALTER TABLE {table} ADD COLUMN {name} {}", descriptor.sql_type);
            exec(&mut tx, &stmt).await?;
        }

        tx.commit().await.map_err(SqlError::Connection)?;
        tracing::info!(id = %descriptor.id, from = descriptor.cols, to = new_count, "grew data columns");
        Ok(())
    }

    /// Inserts the data row and, if the metadata changed, a metadata row,
    /// in one transaction.
    async fn insert_row_and_metadata(
        &self,
        descriptor: &mut TableDescriptor,
        sample: &Variable,
        field_count: usize,
    ) -> Result<(), WriterError> {
        let table = table_name(descriptor.tid)?;
        let age = (sample.grab_time - sample.update_time).num_seconds();

        let mut tx = self.pool.begin().await.map_err(SqlError::Connection)?;

        if field_count > 0 {
            let values = sampled_values(sample, field_count);
            let mut stmt = format!(
                "INSERT INTO {table}(time, age{}) VALUES('{}', {}",
                column_list(descriptor, field_count),
                format_timestamp(sample.grab_time),
                age
            );
            for v in &values {
                stmt.push_str(", ");
                stmt.push_str(v);
            }
            stmt.push(')');
            exec(&mut tx, &stmt).await?;
        }

        let canonical_ndim = if sample.ndim <= 1 && sample.shape.first().copied().unwrap_or(0) <= 1 {
            0
        } else {
            sample.ndim
        };
        let canonical_shape: Vec<usize> = sample.shape.iter().take(canonical_ndim).copied().collect();
        let new_meta = CachedMeta {
            version: descriptor.meta.as_ref().map(|m| m.version + 1).unwrap_or(0),
            sampling: sample.sampling,
            ndim: canonical_ndim,
            shape: canonical_shape.clone(),
            unit: sample.unit.clone(),
        };

        let needs_meta_row = match &descriptor.meta {
            None => true,
            Some(prev) => {
                prev.sampling != new_meta.sampling
                    || prev.ndim != new_meta.ndim
                    || prev.shape != new_meta.shape
                    || prev.unit != new_meta.unit
            }
        };

        if needs_meta_row && field_count > 0 {
            let meta_table = meta_table_name(descriptor.tid)?;
            let shape_text = if canonical_shape.is_empty() {
                "NULL".to_string()
            } else {
                encoding::format_string(
                    &canonical_shape
                        .iter()
                        .map(|d| d.to_string())
                        .collect::<Vec<_>>()
                        .join(","),
                )
            };
            let unit_text = match &sample.unit {
                Some(u) => encoding::format_string(u),
                None => "NULL".to_string(),
            };
            let stmt = format!(
                "INSERT INTO {meta_table}(time, sampling, ndim, shape, unit) VALUES('{}', {}, {}, {}, {})",
                format_timestamp(sample.grab_time),
                new_meta.sampling,
                new_meta.ndim,
                shape_text,
                unit_text
            );
            exec(&mut tx, &stmt).await?;
            descriptor.meta = Some(new_meta);
        }

        tx.commit().await.map_err(SqlError::Connection)?;
        Ok(())
    }
}

/// Number of columns present in the descriptor's insert list, rendered as
/// `, c0, c1, ...` so the caller can splice it into the column clause.
fn column_list(descriptor: &TableDescriptor, field_count: usize) -> String {
    let width = digit_width(field_count.max(descriptor.cols).max(1));
    (0..field_count)
        .map(|i| format!(", c{:0w$}", i, w = width))
        .collect::<String>()
}

/// Samples every `sampling`-th element starting at index 0 and formats each
/// as a SQL literal per the element type.
fn sampled_values(sample: &Variable, field_count: usize) -> Vec<String> {
    let stride = sample.sampling.max(1) as usize;
    (0..field_count)
        .map(|i| format_element(sample, i * stride))
        .collect()
}

fn format_element(sample: &Variable, index: usize) -> String {
    match sample.element_type {
        ElementType::Boolean => {
            let byte = sample.payload.get(index).copied().unwrap_or(0);
            encoding::format_bool(byte != 0).to_string()
        }
        ElementType::Int8 => read_int::<1>(sample, index, i8::from_le_bytes as fn([u8; 1]) -> i8).to_string(),
        ElementType::Int16 => encoding::format_int(read_le::<2>(sample, index, i16::from_le_bytes) as i64),
        ElementType::Int32 => encoding::format_int(read_le::<4>(sample, index, i32::from_le_bytes) as i64),
        ElementType::Int64 => encoding::format_int(read_le::<8>(sample, index, i64::from_le_bytes)),
        ElementType::Float => encoding::format_float(read_le::<4>(sample, index, f32::from_le_bytes)),
        ElementType::Double => encoding::format_double(read_le::<8>(sample, index, f64::from_le_bytes)),
        ElementType::FixedString(width) => {
            // Fixed-width char array: element i occupies bytes [i*width, (i+1)*width),
            // NUL-terminated within its slot.
            let width = width.max(1);
            let start = index * width;
            let slot = sample.payload.get(start..start + width).unwrap_or(&[]);
            let end = slot.iter().position(|&b| b == 0).unwrap_or(slot.len());
            encoding::format_string(&String::from_utf8_lossy(&slot[..end]))
        }
        ElementType::VarString => {
            // Variable-length strings have no fixed stride, so an array of
            // them is stored as a NUL-delimited list; `index` picks the
            // element-th entry in that list.
            let text = String::from_utf8_lossy(&sample.payload);
            let element = text.split('\0').nth(index).unwrap_or("");
            encoding::format_string(element)
        }
    }
}

fn read_int<const N: usize>(sample: &Variable, index: usize, f: fn([u8; N]) -> i8) -> i8 {
    read_le(sample, index, f)
}

fn read_le<const N: usize, T>(sample: &Variable, index: usize, f: fn([u8; N]) -> T) -> T
where
    T: Default,
{
    let start = index * N;
    match sample.payload.get(start..start + N) {
        Some(slice) => {
            let mut buf = [0u8; N];
            buf.copy_from_slice(slice);
            f(buf)
        }
        None => T::default(),
    }
}

/// Bytes consumed by one element of `elem`, for the `max_size` check.
fn bytes_per_element(elem: ElementType) -> u64 {
    match elem {
        ElementType::Boolean | ElementType::Int8 => 1,
        ElementType::Int16 => 2,
        ElementType::Int32 | ElementType::Float => 4,
        ElementType::Int64 | ElementType::Double => 8,
        ElementType::FixedString(n) => n.max(1) as u64,
        ElementType::VarString => 1,
    }
}

/// Formats a UTC timestamp as `YYYY-MM-DD HH:MM:SS UTC` (the text is
/// returned without quotes; callers splice it between single quotes).
fn format_timestamp(ts: chrono::DateTime<chrono::Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

/// Data table name for a tid: `var_{tid:06d}`.
fn table_name(tid: i64) -> Result<String, SqlError> {
    assert_safe_tid(tid)?;
    Ok(format!("var_{tid:06}"))
}

/// Metadata table name for a tid: `var_{tid:06d}_meta`.
fn meta_table_name(tid: i64) -> Result<String, SqlError> {
    Ok(format!("{}_meta", table_name(tid)?))
}

/// Identifiers we interpolate into DDL (`var_{tid:06d}`, column names) can
/// never be parameterized the way values can. Since `tid` is always a
/// `SERIAL` we generated ourselves, this is a sanity assertion rather than
/// a defense against attacker input.
fn assert_safe_tid(tid: i64) -> Result<(), SqlError> {
    if tid < 0 {
        return Err(SqlError::UnsafeIdentifier(tid.to_string()));
    }
    Ok(())
}

/// Raw DDL for a variable's data table, unique time index, and metadata
/// table, issued against an already-open transaction. Callers own the
/// transaction's begin/commit so this can be grouped with other statements
/// (the `titles` insert in [`Writer::first_sight`]) or run standalone
/// ([`Writer::create_tables`]).
async fn create_tables_in(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    use_hyper_tables: bool,
    tid: i64,
    field_count: usize,
    sql_type: &SqlType,
) -> Result<(), WriterError> {
    let table = table_name(tid)?;

    let mut create = format!("CREATE TABLE {table} (time TIMESTAMPTZ PRIMARY KEY, age INTEGER");
    let width = digit_width(field_count);
    for i in 0..field_count {
        create.push_str(&format!(", c{:0w$} {sql_type}", i, w = width));
    }
    create.push(')');
    exec(tx, &create).await?;

    if use_hyper_tables {
        let hyper = format!("SELECT create_hypertable('{table}', by_range('time', INTERVAL '{HYPERTABLE_CHUNK}'))");
        exec(tx, &hyper).await?;
    }

    let index = format!("CREATE UNIQUE INDEX {table}_index_time ON {table}(time)");
    exec(tx, &index).await?;

    let meta_table = meta_table_name(tid)?;
    let create_meta = format!(
        "CREATE TABLE {meta_table} (serial SERIAL PRIMARY KEY, time TIMESTAMPTZ NOT NULL, \
         sampling INTEGER DEFAULT 1, ndim SMALLINT DEFAULT 0, shape VARCHAR(256), unit VARCHAR(32))"
    );
    exec(tx, &create_meta).await?;

    Ok(())
}

async fn exec(tx: &mut sqlx::Transaction<'_, sqlx::Postgres>, stmt: &str) -> Result<(), SqlError> {
    sqlx::query(stmt)
        .execute(&mut **tx)
        .await
        .map(|_| ())
        .map_err(|source| SqlError::Statement {
            statement: stmt.to_string(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample(element_type: ElementType, payload: Vec<u8>, ndim: usize, shape: Vec<usize>) -> Variable {
        Variable {
            id: "a:b".into(),
            payload,
            element_type,
            ndim,
            shape,
            unit: Some("m".into()),
            update_time: chrono::Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            grab_time: chrono::Utc.timestamp_opt(1_700_000_060, 0).unwrap(),
            sampling: 1,
            force: false,
        }
    }

    #[test]
    fn table_name_matches_zero_padded_pattern() {
        assert_eq!(table_name(1).unwrap(), "var_000001");
        assert_eq!(meta_table_name(1).unwrap(), "var_000001_meta");
    }

    #[test]
    fn timestamp_formats_as_utc_string() {
        let ts = chrono::Utc.timestamp_opt(1_700_000_060, 0).unwrap();
        assert_eq!(format_timestamp(ts), "2023-11-14 22:14:20 UTC");
    }

    #[test]
    fn sampled_values_take_every_nth_element() {
        let mut v = sample(ElementType::Int32, vec![], 1, vec![10]);
        v.payload = (0..10i32).flat_map(|n| n.to_le_bytes()).collect();
        v.sampling = 3;
        let fc = sample_count(v.field_count(), v.sampling);
        assert_eq!(fc, 4);
        let values = sampled_values(&v, fc);
        assert_eq!(values, vec!["0", "3", "6", "9"]);
    }

    #[test]
    fn bytes_per_element_matches_encoded_width() {
        assert_eq!(bytes_per_element(ElementType::Int64), 8);
        assert_eq!(bytes_per_element(ElementType::Boolean), 1);
        assert_eq!(bytes_per_element(ElementType::Double), 8);
    }

    #[test]
    fn column_list_zero_pads_consistently() {
        let d = TableDescriptor::new("a:b", 1, 4, SqlType::Integer);
        assert_eq!(column_list(&d, 4), ", c0, c1, c2, c3");
    }

    #[test]
    fn fixed_string_array_extracts_distinct_slots() {
        let mut payload = vec![0u8; 24];
        payload[0..3].copy_from_slice(b"foo");
        payload[8..11].copy_from_slice(b"bar");
        payload[16..19].copy_from_slice(b"baz");
        let v = sample(ElementType::FixedString(8), payload, 1, vec![3]);
        let values = sampled_values(&v, 3);
        assert_eq!(values, vec!["'foo'", "'bar'", "'baz'"]);
    }

    #[test]
    fn var_string_array_splits_on_nul() {
        let payload = b"first\0second\0third".to_vec();
        let v = sample(ElementType::VarString, payload, 1, vec![3]);
        let values = sampled_values(&v, 3);
        assert_eq!(values, vec!["'first'", "'second'", "'third'"]);
    }
}
