//! `Last-Modified` / `If-Modified-Since` timestamps (RFC 7231 IMF-fixdate).

use std::time::{SystemTime, UNIX_EPOCH};

use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};

macro_rules! imf_fixdate {
    () => {
        format_description!(
            "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
        )
    };
}

pub fn format(at: SystemTime) -> String {
    OffsetDateTime::from(at)
        .format(imf_fixdate!())
        .unwrap_or_else(|_| "Thu, 01 Jan 1970 00:00:00 GMT".to_owned())
}

pub fn parse(text: &str) -> Option<SystemTime> {
    let parsed = PrimitiveDateTime::parse(text.trim(), imf_fixdate!()).ok()?;
    Some(parsed.assume_utc().into())
}

/// Whole seconds since the epoch; HTTP dates carry no finer resolution.
pub fn unix_secs(at: SystemTime) -> u64 {
    at.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
