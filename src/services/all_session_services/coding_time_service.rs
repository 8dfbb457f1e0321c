use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Offset, TimeDelta, Utc};

use crate::models::session_models::CodingTimeSegment;

/// Coding time is reported per calendar day in UTC+08:00.
pub const REPORTING_UTC_OFFSET_SECS: i32 = 8 * 60 * 60;

pub fn reporting_offset() -> FixedOffset {
    FixedOffset::east_opt(REPORTING_UTC_OFFSET_SECS).unwrap_or_else(|| Utc.fix())
}

/// Midnight that opens `day` in `offset`, as an instant.
fn start_of_day(day: NaiveDate, offset: FixedOffset) -> DateTime<Utc> {
    let local_midnight = NaiveDateTime::new(day, NaiveTime::MIN);
    let utc = local_midnight - TimeDelta::seconds(i64::from(offset.local_minus_utc()));
    utc.and_utc()
}

fn whole_minutes(span: TimeDelta) -> u32 {
    u32::try_from(span.num_minutes()).unwrap_or(0)
}

/// Splits `[start, end]` into one segment per calendar day it touches, in order.
///
/// Durations are truncated to whole minutes. Zero-minute segments are kept; filtering them
/// is up to the caller. An inverted interval yields nothing.
pub fn split_by_day(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    lab_id: u64,
    student_id: u64,
    offset: FixedOffset,
) -> Vec<CodingTimeSegment> {
    if end < start {
        return Vec::new();
    }
    let segment = |day: NaiveDate, from: DateTime<Utc>, to: DateTime<Utc>| CodingTimeSegment {
        lab_id,
        student_id,
        duration_minutes: whole_minutes(to - from),
        day_bucket: day,
        segment_start: from,
    };

    let start_day = start.with_timezone(&offset).date_naive();
    let end_day = end.with_timezone(&offset).date_naive();
    if start_day == end_day {
        return vec![segment(start_day, start, end)];
    }

    let mut segments = Vec::new();
    let mut day = start_day;
    let mut from = start;
    while day < end_day {
        let Some(next_day) = day.succ_opt() else {
            break;
        };
        let next_midnight = start_of_day(next_day, offset);
        segments.push(segment(day, from, next_midnight));
        day = next_day;
        from = next_midnight;
    }
    segments.push(segment(end_day, from, end));
    segments
}
