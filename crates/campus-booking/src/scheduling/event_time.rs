use chrono::{Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use super::intervals::{Span, Timestamp};
use crate::ids::{EventTimeId, ProductId, VisitId};

/// Outcome of the last availability check for an event time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    Available,
    Blocked,
    Assigned,
}

impl ResourceStatus {
    pub const fn code(self) -> u8 {
        match self {
            ResourceStatus::Available => 1,
            ResourceStatus::Blocked => 2,
            ResourceStatus::Assigned => 3,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            ResourceStatus::Available => "Resources available",
            ResourceStatus::Blocked => "Blocked by missing resources",
            ResourceStatus::Assigned => "Resources assigned",
        }
    }

    pub const fn short_label(self) -> &'static str {
        match self {
            ResourceStatus::Available => "Available",
            ResourceStatus::Blocked => "Blocked",
            ResourceStatus::Assigned => "Assigned",
        }
    }

    pub const fn css_class(self) -> &'static str {
        match self {
            ResourceStatus::Available => "primary",
            ResourceStatus::Blocked => "danger",
            ResourceStatus::Assigned => "success",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventTime {
    pub id: EventTimeId,
    pub product: ProductId,
    pub visit: Option<VisitId>,
    pub bookable: bool,
    pub resource_status: ResourceStatus,
    pub start: Option<Timestamp>,
    pub end: Option<Timestamp>,
    pub has_specific_time: bool,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub has_notified_start: bool,
    #[serde(default)]
    pub has_notified_end: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventTimeDraft {
    pub start: Option<Timestamp>,
    #[serde(default)]
    pub end: Option<Timestamp>,
    /// Alternative to `start`/`end`, e.g. `"24.03.2030 10:00 - 12:00"`.
    #[serde(default)]
    pub interval: Option<String>,
    #[serde(default = "default_bookable")]
    pub bookable: bool,
    #[serde(default)]
    pub notes: String,
}

fn default_bookable() -> bool {
    true
}

impl EventTime {
    pub fn new(id: EventTimeId, product: ProductId) -> Self {
        Self {
            id,
            product,
            visit: None,
            bookable: true,
            resource_status: ResourceStatus::Available,
            start: None,
            end: None,
            has_specific_time: true,
            notes: String::new(),
            has_notified_start: false,
            has_notified_end: false,
        }
    }

    /// The booked interval, when both ends are known.
    pub fn span(&self) -> Option<Span> {
        match (self.start, self.end) {
            (Some(start), Some(end)) if start <= end => Some(Span::new(start, end)),
            _ => None,
        }
    }

    pub fn duration_in_minutes(&self) -> i64 {
        match (self.start, self.end) {
            (Some(start), Some(end)) => (end - start).num_minutes(),
            _ => 0,
        }
    }

    /// Fills in a missing end from the product duration.
    pub fn set_calculated_end_time(&mut self, product_duration_minutes: u32) {
        if self.end.is_some() {
            return;
        }
        let Some(start) = self.start else {
            return;
        };
        if product_duration_minutes > 0 {
            self.end = Some(start + Duration::minutes(i64::from(product_duration_minutes)));
        }
    }

    /// A whole-day slot starting at midnight has no specific time.
    pub fn calculated_has_specific_time(&self) -> bool {
        let Some(start) = self.start else {
            return true;
        };
        !(start.time() == NaiveTime::MIN && self.duration_in_minutes() == 24 * 60)
    }

    pub fn duration_matches_product(&self, product_duration_minutes: u32) -> bool {
        let minutes = self.duration_in_minutes();
        minutes > 0 && minutes == i64::from(product_duration_minutes)
    }

    pub fn can_be_deleted(&self) -> bool {
        self.visit.is_none()
    }

    pub fn expired(&self, now: Timestamp) -> bool {
        self.start.is_some_and(|start| start < now)
    }

    pub fn ended_before(&self, now: Timestamp) -> bool {
        self.end.is_some_and(|end| end < now)
    }

    pub fn interval_display(&self) -> String {
        const DATE: &str = "%d.%m.%Y";
        const DATETIME: &str = "%d.%m.%Y %H:%M";

        let Some(start) = self.start else {
            return "<no time set>".to_string();
        };
        let Some(end) = self.end else {
            return if self.has_specific_time {
                start.format(DATETIME).to_string()
            } else {
                start.format(DATE).to_string()
            };
        };

        let same_day = start.date_naive() == end.date_naive();
        match (self.has_specific_time, same_day) {
            (true, true) => format!("{} - {}", start.format(DATETIME), end.format("%H:%M")),
            (true, false) => format!("{} - {}", start.format(DATETIME), end.format(DATETIME)),
            (false, true) => start.format(DATE).to_string(),
            (false, false) => {
                let last_day = end - Duration::days(1);
                if last_day.date_naive() == start.date_naive() {
                    start.format(DATE).to_string()
                } else {
                    format!("{} - {}", start.format(DATE), last_day.format(DATE))
                }
            }
        }
    }
}

struct IntervalPatterns {
    date: Regex,
    date_with_times: Regex,
    dates: Regex,
    dates_with_times: Regex,
}

fn patterns() -> &'static IntervalPatterns {
    static PATTERNS: OnceLock<IntervalPatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| IntervalPatterns {
        date: Regex::new(r"^(\d{2}).(\d{2}).(\d{4})$").expect("static regex"),
        date_with_times: Regex::new(
            r"^(\d{2}).(\d{2}).(\d{4})\s+(\d{2}):(\d{2})\s+-\s+(\d{2}):(\d{2})$",
        )
        .expect("static regex"),
        dates: Regex::new(r"^(\d{2}).(\d{2}).(\d{4})\s+-\s+(\d{2}).(\d{2}).(\d{4})$")
            .expect("static regex"),
        dates_with_times: Regex::new(
            r"^(\d{2}).(\d{2}).(\d{4})\s+(\d{2}):(\d{2})\s+-\s+(\d{2}).(\d{2}).(\d{4})\s+(\d{2}):(\d{2})$",
        )
        .expect("static regex"),
    })
}

fn number(caps: &regex::Captures<'_>, index: usize) -> Option<u32> {
    caps.get(index)?.as_str().parse().ok()
}

fn timestamp(day: u32, month: u32, year: u32, hour: u32, minute: u32) -> Option<Timestamp> {
    let date = NaiveDate::from_ymd_opt(i32::try_from(year).ok()?, month, day)?;
    let time = NaiveTime::from_hms_opt(hour, minute, 0)?;
    Utc.from_local_datetime(&date.and_time(time)).single()
}

/// Parses the interval notation used on listing pages.
///
/// Accepted forms are `dd.mm.yyyy`, `dd.mm.yyyy HH:MM - HH:MM`,
/// `dd.mm.yyyy - dd.mm.yyyy` and `dd.mm.yyyy HH:MM - dd.mm.yyyy HH:MM`.
/// Date-only forms end at midnight after the last day.
pub fn parse_human_readable_interval(input: &str) -> Option<Span> {
    let input = input.trim();
    let p = patterns();

    if let Some(c) = p.date.captures(input) {
        let start = timestamp(number(&c, 1)?, number(&c, 2)?, number(&c, 3)?, 0, 0)?;
        return Some(Span::new(start, start + Duration::days(1)));
    }

    if let Some(c) = p.date_with_times.captures(input) {
        let (day, month, year) = (number(&c, 1)?, number(&c, 2)?, number(&c, 3)?);
        let start = timestamp(day, month, year, 0, 0)?;
        let from = start
            + Duration::hours(i64::from(number(&c, 4)?))
            + Duration::minutes(i64::from(number(&c, 5)?));
        let to = start
            + Duration::hours(i64::from(number(&c, 6)?))
            + Duration::minutes(i64::from(number(&c, 7)?));
        return (from <= to).then(|| Span::new(from, to));
    }

    if let Some(c) = p.dates.captures(input) {
        let from = timestamp(number(&c, 1)?, number(&c, 2)?, number(&c, 3)?, 0, 0)?;
        let last = timestamp(number(&c, 4)?, number(&c, 5)?, number(&c, 6)?, 0, 0)?;
        let to = last + Duration::days(1);
        return (from <= to).then(|| Span::new(from, to));
    }

    if let Some(c) = p.dates_with_times.captures(input) {
        let from = timestamp(
            number(&c, 1)?,
            number(&c, 2)?,
            number(&c, 3)?,
            number(&c, 4)?,
            number(&c, 5)?,
        )?;
        let to = timestamp(
            number(&c, 6)?,
            number(&c, 7)?,
            number(&c, 8)?,
            number(&c, 9)?,
            number(&c, 10)?,
        )?;
        return (from <= to).then(|| Span::new(from, to));
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(day: u32, hour: u32, minute: u32) -> Timestamp {
        Utc.with_ymd_and_hms(2030, 3, day, hour, minute, 0)
            .single()
            .expect("valid timestamp")
    }

    #[test]
    fn parses_single_date_as_whole_day() {
        let span = parse_human_readable_interval("04.03.2030").expect("parses");
        assert_eq!(span, Span::new(ts(4, 0, 0), ts(5, 0, 0)));
    }

    #[test]
    fn parses_date_with_times() {
        let span = parse_human_readable_interval("04.03.2030 09:30 - 11:15").expect("parses");
        assert_eq!(span, Span::new(ts(4, 9, 30), ts(4, 11, 15)));
    }

    #[test]
    fn parses_date_range_inclusive_of_last_day() {
        let span = parse_human_readable_interval("04.03.2030 - 06.03.2030").expect("parses");
        assert_eq!(span, Span::new(ts(4, 0, 0), ts(7, 0, 0)));
    }

    #[test]
    fn parses_datetime_range() {
        let span =
            parse_human_readable_interval("04.03.2030 22:00 - 05.03.2030 02:00").expect("parses");
        assert_eq!(span, Span::new(ts(4, 22, 0), ts(5, 2, 0)));
    }

    #[test]
    fn rejects_garbage_and_impossible_dates() {
        assert!(parse_human_readable_interval("next tuesday").is_none());
        assert!(parse_human_readable_interval("31.02.2030").is_none());
    }

    #[test]
    fn end_is_only_calculated_when_missing() {
        let mut time = EventTime::new(EventTimeId(1), ProductId(1));
        time.start = Some(ts(4, 10, 0));
        time.set_calculated_end_time(90);
        assert_eq!(time.end, Some(ts(4, 11, 30)));
        time.set_calculated_end_time(30);
        assert_eq!(time.end, Some(ts(4, 11, 30)));
        assert!(time.duration_matches_product(90));
    }

    #[test]
    fn whole_day_slot_has_no_specific_time() {
        let mut time = EventTime::new(EventTimeId(1), ProductId(1));
        time.start = Some(ts(4, 0, 0));
        time.end = Some(ts(5, 0, 0));
        assert!(!time.calculated_has_specific_time());
        time.has_specific_time = false;
        assert_eq!(time.interval_display(), "04.03.2030");
        time.end = Some(ts(4, 12, 0));
        assert!(time.calculated_has_specific_time());
    }

    #[test]
    fn interval_display_covers_missing_values() {
        let mut time = EventTime::new(EventTimeId(1), ProductId(1));
        assert_eq!(time.interval_display(), "<no time set>");
        time.start = Some(ts(4, 10, 0));
        time.end = Some(ts(4, 12, 0));
        assert_eq!(time.interval_display(), "04.03.2030 10:00 - 12:00");
        assert_eq!(time.duration_in_minutes(), 120);
        assert!(time.expired(ts(4, 10, 1)));
        assert!(!time.ended_before(ts(4, 12, 0)));
    }
}
