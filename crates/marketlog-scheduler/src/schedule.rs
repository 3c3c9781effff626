use chrono::{DateTime, Duration, LocalResult, NaiveDateTime, TimeZone};

use crate::types::Cadence;

/// Compute the next fire time for `cadence` strictly *after* `from`.
///
/// `DailyAt` is resolved in `from`'s time zone. On a daylight-saving
/// transition an ambiguous wall-clock time resolves to its earlier instant (the
/// job fires once) and a skipped one moves forward to the first valid minute.
///
/// `None` when the next instant is not representable.
pub fn next_fire<Tz: TimeZone>(cadence: &Cadence, from: &DateTime<Tz>) -> Option<DateTime<Tz>> {
    match *cadence {
        Cadence::Interval { every_secs } => {
            let period = Duration::try_seconds(i64::try_from(every_secs).ok()?)?;
            from.clone().checked_add_signed(period)
        }

        Cadence::DailyAt { hour, minute } => {
            let tz = from.timezone();
            let today = from.date_naive();
            // Today's slot if still ahead, otherwise tomorrow's. The third day
            // only matters when both slots fall into a DST gap.
            (0..3).find_map(|offset| {
                let day = today.checked_add_days(chrono::Days::new(offset))?;
                let wall = day.and_hms_opt(hour as u32, minute as u32, 0)?;
                resolve_local(&tz, wall).filter(|candidate| candidate > from)
            })
        }
    }
}

fn resolve_local<Tz: TimeZone>(tz: &Tz, wall: NaiveDateTime) -> Option<DateTime<Tz>> {
    match tz.from_local_datetime(&wall) {
        LocalResult::Single(t) => Some(t),
        LocalResult::Ambiguous(earliest, _) => Some(earliest),
        LocalResult::None => {
            // Wall time falls in a gap; walk forward a minute at a time (gaps are ≤ 2h).
            (1..=120).find_map(|m| {
                let shifted = wall.checked_add_signed(Duration::minutes(m))?;
                tz.from_local_datetime(&shifted).earliest()
            })
        }
    }
}
