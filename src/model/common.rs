use chrono::{DateTime, SubsecRound, TimeZone, Utc};
use uuid::Uuid;

pub type Id = Uuid;

pub fn generate_id() -> Id {
    Uuid::new_v4()
}

/// Normalize a client-supplied timestamp to UTC, truncated to whole seconds.
pub fn normalize_timestamp<Tz: TimeZone>(timestamp: &DateTime<Tz>) -> DateTime<Utc> {
    timestamp.with_timezone(&Utc).trunc_subsecs(0)
}

/// Truncate to the microsecond precision Postgres keeps for `timestamptz`.
pub fn storage_precision(timestamp: DateTime<Utc>) -> DateTime<Utc> {
    timestamp.trunc_subsecs(6)
}
