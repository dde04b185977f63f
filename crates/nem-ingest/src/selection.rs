// Watermark gate and candidate selection

use crate::models::RemoteObject;
use chrono::{Duration, NaiveDateTime};
use std::fmt;

/// Where the effective gate came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateSource {
    Override,
    Backfill,
    Watermark,
    Unbounded,
}

impl fmt::Display for GateSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            GateSource::Override => "override",
            GateSource::Backfill => "backfill",
            GateSource::Watermark => "watermark",
            GateSource::Unbounded => "unbounded",
        };
        f.write_str(label)
    }
}

/// The cutoff a candidate must be strictly newer than
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Gate {
    pub cutoff: Option<NaiveDateTime>,
    pub source: GateSource,
}

impl Gate {
    pub fn admits(&self, ts: &NaiveDateTime) -> bool {
        self.cutoff.is_none_or(|cutoff| *ts > cutoff)
    }
}

/// First of: explicit override, `now - backfill_days`, stored watermark, nothing
///
/// A backfill window reaching past the representable calendar admits everything.
pub fn effective_gate(
    override_ts: Option<NaiveDateTime>,
    backfill_days: Option<u32>,
    watermark: Option<NaiveDateTime>,
    now: NaiveDateTime,
) -> Gate {
    if let Some(ts) = override_ts {
        return Gate {
            cutoff: Some(ts),
            source: GateSource::Override,
        };
    }
    if let Some(days) = backfill_days {
        let cutoff = Duration::try_days(i64::from(days)).and_then(|window| now.checked_sub_signed(window));
        return Gate {
            cutoff,
            source: GateSource::Backfill,
        };
    }
    match watermark {
        Some(ts) => Gate {
            cutoff: Some(ts),
            source: GateSource::Watermark,
        },
        None => Gate {
            cutoff: None,
            source: GateSource::Unbounded,
        },
    }
}

/// Gate, order ascending by `(timestamp, name)` and cap at `limit`
pub fn select_candidates(objects: &[RemoteObject], gate: &Gate, limit: usize) -> Vec<RemoteObject> {
    let mut selected: Vec<RemoteObject> = objects
        .iter()
        .filter(|o| gate.admits(&o.timestamp))
        .cloned()
        .collect();
    selected.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.name.cmp(&b.name)));
    selected.truncate(limit);
    selected
}
