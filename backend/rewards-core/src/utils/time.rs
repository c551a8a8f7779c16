use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};

const CET_OFFSET_SECS: i64 = 3_600;
const CEST_OFFSET_SECS: i64 = 7_200;

/// Last Sunday of the given month at 01:00 UTC, the instant EU clocks switch.
fn dst_switch_utc(year: i32, month: u32) -> Option<DateTime<Utc>> {
    // Both switch months (March, October) have 31 days.
    let last_day = NaiveDate::from_ymd_opt(year, month, 31)?;
    let back = i64::from(last_day.weekday().num_days_from_sunday());
    let sunday = last_day - Duration::days(back);
    let at_one = sunday.and_hms_opt(1, 0, 0)?;
    Some(Utc.from_utc_datetime(&at_one))
}

/// UTC offset of Europe/Paris at the given instant, in seconds.
///
/// CEST (+02:00) runs from the last Sunday of March 01:00 UTC to the last
/// Sunday of October 01:00 UTC, CET (+01:00) the rest of the year.
pub fn paris_offset_secs(at: DateTime<Utc>) -> i64 {
    match (dst_switch_utc(at.year(), 3), dst_switch_utc(at.year(), 10)) {
        (Some(dst_start), Some(dst_end)) if at >= dst_start && at < dst_end => CEST_OFFSET_SECS,
        _ => CET_OFFSET_SECS,
    }
}

/// Calendar day in Europe/Paris for the given instant, as "YYYY-MM-DD".
pub fn day_key_paris(at: DateTime<Utc>) -> String {
    let local = at + Duration::seconds(paris_offset_secs(at));
    local.format("%Y-%m-%d").to_string()
}

/// Today's Paris day key. Daily quests and day-stat rollups share this
/// notion of "today", so a session straddling Paris midnight lands on the
/// day its write happens.
pub fn today_key_paris() -> String {
    day_key_paris(Utc::now())
}

/// Paris day keys for `days` consecutive days ending at `from`, newest first.
pub fn day_keys_back(from: DateTime<Utc>, days: u32) -> Vec<String> {
    let local_date = (from + Duration::seconds(paris_offset_secs(from))).date_naive();
    (0..i64::from(days))
        .map(|i| (local_date - Duration::days(i)).format("%Y-%m-%d").to_string())
        .collect()
}
