//! Grabber — the single background poller that distinguishes snapshot vs
//! incremental cycles, scans the source store, applies the Rule Engine, and
//! hands off samples to the Queue.

use crate::encoding::ElementType;
use crate::queue::QueueSender;
use crate::rules::RuleEngine;
use crate::smax::SmaxClient;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

/// The unit of work flowing through the queue. Single-owner: the Grabber
/// constructs it, the SQL Writer consumes and drops it.
#[derive(Debug, Clone)]
pub struct Variable {
    pub id: String,
    pub payload: Vec<u8>,
    pub element_type: ElementType,
    pub ndim: usize,
    pub shape: Vec<usize>,
    pub unit: Option<String>,
    pub update_time: DateTime<Utc>,
    pub grab_time: DateTime<Utc>,
    pub sampling: u32,
    /// Whether a `force` rule matched this id at grab time: forced samples
    /// bypass the `max_size` drop even at the writer.
    pub force: bool,
}

impl Variable {
    /// Number of scalar elements in the sample: 1 for a scalar (`ndim ==
    /// 0`), otherwise the product of the array's shape. An array reported
    /// with a zero-length dimension legitimately has zero fields — this is
    /// the "variable has no values yet" case the writer's first-sight path
    /// handles by skipping data-table creation (§4.4).
    pub fn field_count(&self) -> usize {
        if self.ndim == 0 {
            1
        } else {
            self.shape.iter().product::<usize>()
        }
    }
}

/// Maps a raw SMA-X type tag to our [`ElementType`], demoting anything
/// unrecognized ("raw binary types") to a single-element string rather than
/// rejecting the sample outright.
pub fn finalize_element_type(type_tag: &str, max_string_len: usize) -> ElementType {
    match type_tag {
        "boolean" | "bool" => ElementType::Boolean,
        "int8" => ElementType::Int8,
        "int16" | "short" => ElementType::Int16,
        "int32" | "int" => ElementType::Int32,
        "int64" | "long" => ElementType::Int64,
        "float" | "float32" => ElementType::Float,
        "double" | "float64" => ElementType::Double,
        "string" => ElementType::VarString,
        "char" if max_string_len > 0 => ElementType::FixedString(max_string_len),
        _ => ElementType::VarString,
    }
}

/// Tracks the last successful grab time for a variable group. A single
/// group with pattern `*` is the only one constructed today; the type
/// stays generic over future multi-group configurations.
pub struct VariableGroup {
    pub pattern: String,
    pub last_update: Option<DateTime<Utc>>,
}

impl VariableGroup {
    pub fn new(pattern: impl Into<String>) -> Self {
        VariableGroup {
            pattern: pattern.into(),
            last_update: None,
        }
    }
}

/// Runs the grabber's main loop forever: sleeps until the next wall-clock
/// instant that is a multiple of `update_interval` seconds, then grabs each
/// variable group, logging and continuing past any single failed cycle.
pub async fn run(
    smax: SmaxClient,
    rules: Arc<RuleEngine>,
    sender: QueueSender,
    update_interval: i64,
    snapshot_interval: i64,
    max_size: u64,
) {
    let mut group = VariableGroup::new("*");
    loop {
        let target = sleep_until_aligned(update_interval).await;
        let is_snapshot = is_snapshot_cycle(target.timestamp(), update_interval, snapshot_interval);

        tracing::debug!(?target, is_snapshot, "grab cycle starting");
        crate::notify::status(if is_snapshot { "SNAPSHOT" } else { "UPDATE" });
        if let Err(e) = grab(&smax, &rules, &sender, &mut group, target, is_snapshot, max_size).await {
            tracing::error!(error = %e, "grab cycle failed, will retry next cycle");
        }
        crate::notify::status("IDLE");
    }
}

/// Decides whether the grab cycle waking at `target_epoch` is a snapshot:
/// true iff snapshots are enabled and `target_epoch` falls within the first
/// `update_interval` seconds of a `snapshot_interval`-aligned boundary.
fn is_snapshot_cycle(target_epoch: i64, update_interval: i64, snapshot_interval: i64) -> bool {
    snapshot_interval > 0 && target_epoch % snapshot_interval < update_interval.max(1)
}

/// Sleeps until the next wall-clock second that is a multiple of
/// `interval_secs`, absorbing sub-second slack so the wakeup lands on the
/// round boundary. Returns the intended wakeup instant.
async fn sleep_until_aligned(interval_secs: i64) -> DateTime<Utc> {
    let interval = interval_secs.max(1);
    let now = Utc::now();
    let epoch = now.timestamp();
    let next_epoch = ((epoch / interval) + 1) * interval;
    let target = DateTime::from_timestamp(next_epoch, 0).unwrap_or(now);
    let delta = (target - now).to_std().unwrap_or(Duration::from_millis(0));
    tokio::time::sleep(delta).await;
    target
}

/// One grab cycle for a variable group: advances its last-update watermark
/// and scans for everything that changed since the previous cycle.
async fn grab(
    smax: &SmaxClient,
    rules: &RuleEngine,
    sender: &QueueSender,
    group: &mut VariableGroup,
    target: DateTime<Utc>,
    is_snapshot: bool,
    max_size: u64,
) -> Result<(), crate::error::SmaxError> {
    let from = match group.last_update {
        Some(t) if !is_snapshot => t,
        _ => DateTime::<Utc>::UNIX_EPOCH,
    };

    let start = smax.server_time().await?;
    update_changed(smax, rules, sender, &group.pattern, from, target, max_size).await?;
    group.last_update = Some(start);
    Ok(())
}

/// Scans for changed variables and hands qualifying samples to the queue.
async fn update_changed(
    smax: &SmaxClient,
    rules: &RuleEngine,
    sender: &QueueSender,
    pattern: &str,
    from: DateTime<Utc>,
    grab_time: DateTime<Utc>,
    max_size: u64,
) -> Result<(), crate::error::SmaxError> {
    // isLogging's max_age check uses the daemon's own wall clock, not the
    // source store's, matching the original logger's isLogging().
    let now = Utc::now();
    let timestamps = smax.scan_timestamps(pattern).await?;
    let units = smax.scan_units(pattern).await?;
    let units: std::collections::HashMap<_, _> = units.into_iter().collect();

    let candidates: Vec<String> = timestamps
        .into_iter()
        .filter(|(_, ts)| *ts >= from)
        .filter(|(id, ts)| rules.is_logging(id, *ts, now))
        .map(|(id, _)| id)
        .collect();

    if candidates.is_empty() {
        return Ok(());
    }

    let fetched = smax
        .bulk_fetch(&candidates, Duration::from_secs(10))
        .await?;

    for record in fetched.into_iter().flatten() {
        let props = rules.get_properties(&record.id);
        let element_type = finalize_element_type(&record.type_tag, record.data.len());
        let sample = Variable {
            unit: units.get(&record.id).cloned(),
            id: record.id,
            payload: record.data,
            element_type,
            ndim: record.ndim,
            shape: record.shape,
            update_time: record.update_time,
            grab_time,
            sampling: props.sampling,
            force: props.force,
        };

        // Re-apply the force/max_size check at submission time: force
        // bypasses the size drop entirely.
        if !props.force {
            let bytes = sample.payload.len();
            if bytes as u64 > max_size {
                tracing::debug!(id = %sample.id, bytes, "oversized sample dropped at submission");
                continue;
            }
        }

        if sender.enqueue(sample).await.is_err() {
            tracing::warn!("queue receiver dropped, grabber stopping submission for this cycle");
            break;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unrecognized_type_demotes_to_varstring() {
        assert_eq!(finalize_element_type("weird-binary-blob", 0), ElementType::VarString);
    }

    #[test]
    fn recognized_scalar_types_map_directly() {
        assert_eq!(finalize_element_type("int32", 0), ElementType::Int32);
        assert_eq!(finalize_element_type("double", 0), ElementType::Double);
        assert_eq!(finalize_element_type("boolean", 0), ElementType::Boolean);
    }

    #[test]
    fn field_count_scalar_is_one() {
        let v = Variable {
            id: "a".into(),
            payload: vec![],
            element_type: ElementType::Int32,
            ndim: 0,
            shape: vec![],
            unit: None,
            update_time: Utc::now(),
            grab_time: Utc::now(),
            sampling: 1,
            force: false,
        };
        assert_eq!(v.field_count(), 1);
    }

    #[test]
    fn field_count_array_is_shape_product() {
        let v = Variable {
            id: "a".into(),
            payload: vec![],
            element_type: ElementType::Int32,
            ndim: 2,
            shape: vec![3, 4],
            unit: None,
            update_time: Utc::now(),
            grab_time: Utc::now(),
            sampling: 1,
            force: false,
        };
        assert_eq!(v.field_count(), 12);
    }

    #[test]
    fn snapshot_cadence_matches_spec_example() {
        // update_interval=60, snapshot_interval=300.
        assert!(is_snapshot_cycle(1_700_000_400, 60, 300));
        assert!(!is_snapshot_cycle(1_700_000_460, 60, 300));
    }

    #[test]
    fn snapshot_disabled_never_triggers() {
        assert!(!is_snapshot_cycle(1_700_000_400, 60, -1));
    }

    #[test]
    fn field_count_zero_length_array_is_zero() {
        let v = Variable {
            id: "a".into(),
            payload: vec![],
            element_type: ElementType::Int32,
            ndim: 1,
            shape: vec![0],
            unit: None,
            update_time: Utc::now(),
            grab_time: Utc::now(),
            sampling: 1,
            force: false,
        };
        assert_eq!(v.field_count(), 0);
    }
}
