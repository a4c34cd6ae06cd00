use chrono::{DateTime, Days, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::error::{AppError, AppResult};

/// Computes business-day boundaries: the accounting day starts at a fixed
/// local cutover hour (06:00 Tashkent by default), not at wall-clock midnight.
///
/// Pure and side-effect free; every method takes the reference instant
/// explicitly so boundaries are testable against fixed timestamps.
#[derive(Debug, Clone, Copy)]
pub struct BusinessDayClock {
    tz: Tz,
    cutover: NaiveTime,
}

impl BusinessDayClock {
    pub fn new(tz: Tz, cutover_hour: u32) -> AppResult<Self> {
        let cutover = NaiveTime::from_hms_opt(cutover_hour, 0, 0)
            .ok_or_else(|| AppError::Config(format!("cutover hour out of range: {}", cutover_hour)))?;
        Ok(Self { tz, cutover })
    }

    /// Start instant of the business day containing `now`.
    ///
    /// Exactly at the cutover instant belongs to the new day.
    pub fn day_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let local_date = now.with_timezone(&self.tz).date_naive();
        let today_cutover = self.cutover_on(local_date);
        if now < today_cutover {
            self.cutover_on(local_date - Days::new(1))
        } else {
            today_cutover
        }
    }

    /// The `[start, end)` window of the business day beginning at `start`.
    ///
    /// The end bound is the next calendar day's cutover in the configured
    /// timezone, so DST transitions produce 23h/25h windows instead of
    /// shifting the cutover hour.
    pub fn window(&self, start: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        let local_date = start.with_timezone(&self.tz).date_naive();
        (start, self.cutover_on(local_date + Days::new(1)))
    }

    /// Window of the business day containing `now`.
    pub fn current_window(&self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        self.window(self.day_start(now))
    }

    /// Cutover instant of the business day labelled by the given local date.
    pub fn cutover_on(&self, date: NaiveDate) -> DateTime<Utc> {
        let naive = date.and_time(self.cutover);
        // A DST gap can swallow the local cutover; take the earliest valid
        // instant at or after it.
        for shift in 0..3 {
            let candidate = naive + Duration::hours(shift);
            if let Some(local) = self.tz.from_local_datetime(&candidate).earliest() {
                return local.with_timezone(&Utc);
            }
        }
        Utc.from_utc_datetime(&naive)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::Tz;

    fn tashkent() -> BusinessDayClock {
        BusinessDayClock::new(Tz::Asia__Tashkent, 6).unwrap()
    }

    // Tashkent is UTC+5 year-round, so 06:00 local == 01:00 UTC.

    #[test]
    fn before_cutover_belongs_to_previous_day() {
        let clock = tashkent();
        // 2025-03-10 05:59:59 local == 00:59:59 UTC
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 0, 59, 59).unwrap();
        let start = clock.day_start(now);
        assert_eq!(start, Utc.with_ymd_and_hms(2025, 3, 9, 1, 0, 0).unwrap());
    }

    #[test]
    fn cutover_instant_belongs_to_new_day() {
        let clock = tashkent();
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 1, 0, 0).unwrap();
        let start = clock.day_start(now);
        assert_eq!(start, now);
    }

    #[test]
    fn one_second_after_cutover_belongs_to_new_day() {
        let clock = tashkent();
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 1, 0, 1).unwrap();
        let start = clock.day_start(now);
        assert_eq!(start, Utc.with_ymd_and_hms(2025, 3, 10, 1, 0, 0).unwrap());
    }

    #[test]
    fn late_evening_belongs_to_same_day() {
        let clock = tashkent();
        // 23:30 local == 18:30 UTC
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 18, 30, 0).unwrap();
        let start = clock.day_start(now);
        assert_eq!(start, Utc.with_ymd_and_hms(2025, 3, 10, 1, 0, 0).unwrap());
    }

    #[test]
    fn window_is_24h_without_dst() {
        let clock = tashkent();
        let start = Utc.with_ymd_and_hms(2025, 3, 10, 1, 0, 0).unwrap();
        let (s, e) = clock.window(start);
        assert_eq!(s, start);
        assert_eq!(e - s, Duration::hours(24));
    }

    #[test]
    fn dst_spring_forward_yields_23h_window() {
        // Berlin jumps 02:00 -> 03:00 on 2025-03-30
        let clock = BusinessDayClock::new(Tz::Europe__Berlin, 6).unwrap();
        // 2025-03-29 06:00 CET == 05:00 UTC
        let start = clock.cutover_on(NaiveDate::from_ymd_opt(2025, 3, 29).unwrap());
        assert_eq!(start, Utc.with_ymd_and_hms(2025, 3, 29, 5, 0, 0).unwrap());
        let (_, end) = clock.window(start);
        // 2025-03-30 06:00 CEST == 04:00 UTC
        assert_eq!(end, Utc.with_ymd_and_hms(2025, 3, 30, 4, 0, 0).unwrap());
        assert_eq!(end - start, Duration::hours(23));
    }

    #[test]
    fn dst_fall_back_yields_25h_window() {
        // Berlin falls back 03:00 -> 02:00 on 2025-10-26
        let clock = BusinessDayClock::new(Tz::Europe__Berlin, 6).unwrap();
        let start = clock.cutover_on(NaiveDate::from_ymd_opt(2025, 10, 25).unwrap());
        let (_, end) = clock.window(start);
        assert_eq!(end - start, Duration::hours(25));
    }

    #[test]
    fn cutover_inside_dst_gap_resolves_forward() {
        // Berlin 2025-03-30 02:00 does not exist; a 2-o'clock cutover must
        // resolve to the earliest valid instant instead of panicking.
        let clock = BusinessDayClock::new(Tz::Europe__Berlin, 2).unwrap();
        let cutover = clock.cutover_on(NaiveDate::from_ymd_opt(2025, 3, 30).unwrap());
        // 03:00 CEST == 01:00 UTC
        assert_eq!(cutover, Utc.with_ymd_and_hms(2025, 3, 30, 1, 0, 0).unwrap());
    }

    #[test]
    fn rejects_invalid_cutover_hour() {
        assert!(BusinessDayClock::new(Tz::Asia__Tashkent, 24).is_err());
    }
}
