//! Local wall-clock helpers.
//!
//! The greenhouse runs on a fixed UTC+9 offset; there is no timezone
//! database lookup.  Dates are stored as zero-padded `YYYY/MM/DD` strings and
//! timestamps as `YYYY/MM/DD HH:MM`, so lexical order equals calendar order.

use time::macros::{format_description, offset, time};
use time::{Date, Duration, OffsetDateTime, PrimitiveDateTime, Time, UtcOffset};

pub const LOCAL_OFFSET: UtcOffset = offset!(+9);

/// Last minute of a day, used to close intervals on past dates.
pub const END_OF_DAY: Time = time!(23:59);

pub fn local_now() -> PrimitiveDateTime {
    let now = OffsetDateTime::now_utc().to_offset(LOCAL_OFFSET);
    PrimitiveDateTime::new(now.date(), now.time())
}

/// `now` truncated to the minute, matching stored timestamp resolution.
pub fn local_now_minute() -> PrimitiveDateTime {
    let now = local_now();
    now.replace_second(0)
        .and_then(|t| t.replace_nanosecond(0))
        .unwrap_or(now)
}

pub fn format_date(d: Date) -> String {
    format!("{:04}/{:02}/{:02}", d.year(), d.month() as u8, d.day())
}

pub fn format_hhmm(t: Time) -> String {
    format!("{:02}:{:02}", t.hour(), t.minute())
}

pub fn format_datetime(dt: PrimitiveDateTime) -> String {
    format!("{} {}", format_date(dt.date()), format_hhmm(dt.time()))
}

pub fn parse_date(s: &str) -> Result<Date, time::error::Parse> {
    Date::parse(s.trim(), format_description!("[year]/[month]/[day]"))
}

pub fn parse_datetime(s: &str) -> Result<PrimitiveDateTime, time::error::Parse> {
    PrimitiveDateTime::parse(
        s.trim(),
        format_description!("[year]/[month]/[day] [hour]:[minute]"),
    )
}

pub fn parse_hhmm(s: &str) -> Result<Time, time::error::Parse> {
    Time::parse(s.trim(), format_description!("[hour]:[minute]"))
}

/// First day of an `n`-day window ending at `to` (inclusive), or `None` when
/// the window reaches past the earliest representable date.
pub fn window_start(to: Date, days: u32) -> Option<Date> {
    to.checked_sub(Duration::days(i64::from(days.max(1)) - 1))
}
