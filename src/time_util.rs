use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, Offset, TimeZone, Utc};

/// 根据秒级偏移构造时区，非法偏移回退到 UTC
pub fn offset_from_secs(utc_offset_secs: i32) -> FixedOffset {
    FixedOffset::east_opt(utc_offset_secs).unwrap_or_else(|| Utc.fix())
}

/// UTC 时间转换为本地墙上时间（时:分:秒）
pub fn local_time_of_day(now: DateTime<Utc>, utc_offset_secs: i32) -> NaiveTime {
    now.with_timezone(&offset_from_secs(utc_offset_secs)).time()
}

/// UTC 时间所在的本地自然日
pub fn local_date(now: DateTime<Utc>, utc_offset_secs: i32) -> NaiveDate {
    now.with_timezone(&offset_from_secs(utc_offset_secs)).date_naive()
}

/// 本地自然日对应的 UTC 区间 [start, end)
pub fn local_day_bounds(date: NaiveDate, utc_offset_secs: i32) -> (DateTime<Utc>, DateTime<Utc>) {
    let offset = offset_from_secs(utc_offset_secs);
    let start_local = date.and_time(NaiveTime::MIN);
    let start = offset
        .from_local_datetime(&start_local)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.from_utc_datetime(&start_local));
    (start, start + Duration::days(1))
}

/// "今天" 的 UTC 区间（按给定时区的自然日）
pub fn today_bounds(now: DateTime<Utc>, utc_offset_secs: i32) -> (DateTime<Utc>, DateTime<Utc>) {
    local_day_bounds(local_date(now, utc_offset_secs), utc_offset_secs)
}

pub fn to_millis(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

pub fn from_millis(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_day_bounds_riyadh() {
        // 2024-03-05 22:30 UTC 在 +03:00 已经是 3 月 6 日
        let now = Utc.with_ymd_and_hms(2024, 3, 5, 22, 30, 0).unwrap();
        let (start, end) = today_bounds(now, 3 * 3600);
        assert_eq!(start, Utc.with_ymd_and_hms(2024, 3, 5, 21, 0, 0).unwrap());
        assert_eq!(end, Utc.with_ymd_and_hms(2024, 3, 6, 21, 0, 0).unwrap());
        assert!(start <= now && now < end);
    }

    #[test]
    fn test_local_time_of_day() {
        let now = Utc.with_ymd_and_hms(2024, 3, 5, 6, 0, 0).unwrap();
        assert_eq!(local_time_of_day(now, 3 * 3600), NaiveTime::from_hms_opt(9, 0, 0).unwrap());
    }

    #[test]
    fn test_millis_roundtrip() {
        let now = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(from_millis(to_millis(now)), Some(now));
    }
}
