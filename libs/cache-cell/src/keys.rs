use chrono::{DateTime, Duration, NaiveDate, Utc};
use uuid::Uuid;

/// Deterministic cache keys, pure functions of the query parameters.

pub fn day_schedule(practitioner_id: Uuid, date: NaiveDate) -> String {
    format!("schedule:{}:{}", practitioner_id, date)
}

pub fn date_range(
    practitioner_id: Uuid,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    status: Option<&str>,
) -> String {
    format!(
        "appointments:{}:{}:{}:{}",
        practitioner_id,
        from.format("%Y%m%dT%H%M%S"),
        to.format("%Y%m%dT%H%M%S"),
        status.unwrap_or("all")
    )
}

/// Invalidation tag for everything cached about one practitioner-day.
pub fn day_tag(practitioner_id: Uuid, date: NaiveDate) -> String {
    format!("sched-keys:{}:{}", practitioner_id, date)
}

/// Every UTC calendar day a half-open `[from, to)` range touches. Keys
/// register under each of these tags; writes invalidate the days their
/// appointment spans, so the two sides must agree on UTC days.
pub fn days_in_range(from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<NaiveDate> {
    let mut days = Vec::new();
    let mut day = from.date_naive();
    let last = (to - Duration::nanoseconds(1)).date_naive();
    while day <= last {
        days.push(day);
        day += Duration::days(1);
    }
    if days.is_empty() {
        days.push(from.date_naive());
    }
    days
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn keys_are_deterministic() {
        let practitioner = Uuid::new_v4();
        let from = Utc.with_ymd_and_hms(2025, 3, 10, 9, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2025, 3, 10, 17, 0, 0).unwrap();

        assert_eq!(
            date_range(practitioner, from, to, None),
            date_range(practitioner, from, to, None)
        );
        assert_ne!(
            date_range(practitioner, from, to, Some("scheduled")),
            date_range(practitioner, from, to, None)
        );
    }

    #[test]
    fn range_days_cover_span() {
        let from = Utc.with_ymd_and_hms(2025, 3, 10, 22, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2025, 3, 12, 2, 0, 0).unwrap();

        let days = days_in_range(from, to);
        assert_eq!(days.len(), 3);
        assert_eq!(days[0], NaiveDate::from_ymd_opt(2025, 3, 10).unwrap());
        assert_eq!(days[2], NaiveDate::from_ymd_opt(2025, 3, 12).unwrap());
    }

    #[test]
    fn range_day_boundary_is_half_open() {
        let from = Utc.with_ymd_and_hms(2025, 3, 10, 9, 0, 0).unwrap();
        let to = Utc.with_ymd_and_hms(2025, 3, 11, 0, 0, 0).unwrap();

        // Ending exactly at midnight does not touch the next day.
        let days = days_in_range(from, to);
        assert_eq!(days.len(), 1);
    }
}
