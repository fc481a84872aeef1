use time::{OffsetDateTime, format_description::well_known::Rfc3339};

use crate::dao::models::EpochMillis;

pub mod health;
pub mod session;
pub mod sse;
pub mod validation;

fn format_epoch_millis(millis: EpochMillis) -> String {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000)
        .ok()
        .and_then(|time| time.format(&Rfc3339).ok())
        .unwrap_or_else(|| "invalid-timestamp".into())
}
