//! SMA-X source-store adapter.
//!
//! SMA-X itself is an external collaborator, but the daemon needs a
//! concrete client to compile and run against. This wraps a Redis
//! connection with the three conventions the collector relies on: a
//! `<timestamps>` hash scanned by pattern for per-variable update times, a
//! parallel `<units>` hash, and a pipelined bulk value fetch keyed by id.

use crate::error::SmaxError;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;

const TIMESTAMPS_TABLE: &str = "<timestamps>";
const UNITS_TABLE: &str = "<units>";

/// Per-variable metadata and payload returned by a bulk fetch.
#[derive(Debug, Clone)]
pub struct RawRecord {
    pub id: String,
    pub data: Vec<u8>,
    /// SMA-X type tag as reported by the store (e.g. `"int32"`, `"string"`).
    pub type_tag: String,
    pub ndim: usize,
    pub shape: Vec<usize>,
    pub update_time: DateTime<Utc>,
}

/// Thin async client over the SMA-X Redis-like store.
#[derive(Clone)]
pub struct SmaxClient {
    conn: ConnectionManager,
}

impl SmaxClient {
    pub async fn connect(addr: &str) -> Result<Self, SmaxError> {
        let client = redis::Client::open(addr)?;
        let conn = client.get_connection_manager().await?;
        Ok(SmaxClient { conn })
    }

    /// Reads the source store's clock.
    pub async fn server_time(&self) -> Result<DateTime<Utc>, SmaxError> {
        let mut conn = self.conn.clone();
        let parts: (i64, i64) = redis::cmd("TIME").query_async(&mut conn).await?;
        let (secs, micros) = parts;
        Ok(DateTime::from_timestamp(secs, (micros * 1000) as u32).unwrap_or_else(Utc::now))
    }

    /// Scans the `<timestamps>` hash for fields matching `pattern`, skipping
    /// keys that start with `_` or `<`. Returns `(id, update_time)`.
    pub async fn scan_timestamps(&self, pattern: &str) -> Result<Vec<(String, DateTime<Utc>)>, SmaxError> {
        let raw = self.scan_hash(TIMESTAMPS_TABLE, pattern).await?;
        Ok(raw
            .into_iter()
            .filter(|(k, _)| !k.starts_with('_') && !k.starts_with('<'))
            .filter_map(|(k, v)| {
                v.parse::<f64>()
                    .ok()
                    .and_then(|secs| DateTime::from_timestamp(secs.trunc() as i64, ((secs.fract()) * 1e9) as u32))
                    .map(|ts| (k, ts))
            })
            .collect())
    }

    /// Scans the `<units>` hash for physical-unit strings matching `pattern`.
    pub async fn scan_units(&self, pattern: &str) -> Result<Vec<(String, String)>, SmaxError> {
        self.scan_hash(UNITS_TABLE, pattern).await
    }

    async fn scan_hash(&self, table: &str, pattern: &str) -> Result<Vec<(String, String)>, SmaxError> {
        let mut conn = self.conn.clone();
        let mut out = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, chunk): (u64, Vec<(String, String)>) = redis::cmd("HSCAN")
                .arg(table)
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(1000)
                .query_async(&mut conn)
                .await
                .map_err(|source| SmaxError::Scan {
                    table: table.to_string(),
                    source,
                })?;
            out.extend(chunk);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        Ok(out)
    }

    /// Bulk-fetches per-variable records for `ids`, pipelined into one round
    /// trip, bounded by `timeout`.
    pub async fn bulk_fetch(&self, ids: &[String], timeout: Duration) -> Result<Vec<Option<RawRecord>>, SmaxError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        for id in ids {
            pipe.cmd("HGETALL").arg(format!("smax:record:{id}"));
        }
        let results: Vec<std::collections::HashMap<String, String>> =
            tokio::time::timeout(timeout, pipe.query_async(&mut conn))
                .await
                .map_err(|_| SmaxError::FetchTimeout(timeout))??;

        Ok(ids
            .iter()
            .zip(results)
            .map(|(id, fields)| decode_record(id, fields))
            .collect())
    }
}

fn decode_record(id: &str, fields: std::collections::HashMap<String, String>) -> Option<RawRecord> {
    if fields.is_empty() {
        return None;
    }
    let type_tag = fields.get("type")?.clone();
    let ndim: usize = fields.get("ndim").and_then(|s| s.parse().ok()).unwrap_or(0);
    let shape: Vec<usize> = fields
        .get("shape")
        .map(|s| s.split(',').filter_map(|p| p.trim().parse().ok()).collect())
        .unwrap_or_default();
    let update_time = fields
        .get("update_time")
        .and_then(|s| s.parse::<f64>().ok())
        .and_then(|secs| DateTime::from_timestamp(secs.trunc() as i64, 0))
        .unwrap_or_else(Utc::now);
    let data = fields
        .get("data")
        .map(|s| s.as_bytes().to_vec())
        .unwrap_or_default();

    Some(RawRecord {
        id: id.to_string(),
        data,
        type_tag,
        ndim,
        shape,
        update_time,
    })
}
