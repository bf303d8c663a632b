use chrono::{Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use serde::{Deserialize, Serialize};

use crate::ids::{CalendarEventId, CalendarId, ProductId, ResourceId, VisitId};
use crate::scheduling::intervals::{has_gap, merge_overlapping, subtract_intervals, Span, Timestamp};
use crate::store::BookingStore;
use crate::visits::WorkflowStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum CalendarOwner {
    Resource(ResourceId),
    Product(ProductId),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Calendar {
    pub id: CalendarId,
    pub owner: CalendarOwner,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalendarAvailability {
    Available,
    NotAvailable,
}

impl CalendarAvailability {
    pub const fn label(self) -> &'static str {
        match self {
            CalendarAvailability::Available => "Available",
            CalendarAvailability::NotAvailable => "Not available",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecurrenceFrequency {
    Daily,
    Weekly,
}

/// Repetition rule for a calendar event. Occurrences keep the event's time of day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recurrence {
    pub frequency: RecurrenceFrequency,
    #[serde(default = "default_interval")]
    pub interval: u32,
    #[serde(default)]
    pub weekdays: Vec<Weekday>,
    #[serde(default)]
    pub until: Option<NaiveDate>,
    #[serde(default)]
    pub count: Option<u32>,
}

fn default_interval() -> u32 {
    1
}

impl Recurrence {
    fn matches(&self, first: NaiveDate, date: NaiveDate) -> bool {
        if date < first {
            return false;
        }
        let interval = i64::from(self.interval.max(1));
        match self.frequency {
            RecurrenceFrequency::Daily => (date - first).num_days() % interval == 0,
            RecurrenceFrequency::Weekly => {
                let week_of = |d: NaiveDate| {
                    d - Duration::days(i64::from(d.weekday().num_days_from_monday()))
                };
                let weeks = (week_of(date) - week_of(first)).num_days() / 7;
                let on_day = if self.weekdays.is_empty() {
                    date.weekday() == first.weekday()
                } else {
                    self.weekdays.contains(&date.weekday())
                };
                on_day && weeks % interval == 0
            }
        }
    }

    /// Occurrence dates inside `[window_start, window_end]`.
    fn dates(&self, first: NaiveDate, window_start: NaiveDate, window_end: NaiveDate) -> Vec<NaiveDate> {
        let last = match self.until {
            Some(until) => until.min(window_end),
            None => window_end,
        };
        // Counting needs every occurrence since the first one.
        let mut cursor = match self.count {
            Some(_) => first,
            None => first.max(window_start),
        };
        let mut seen = 0u32;
        let mut dates = Vec::new();
        while cursor <= last {
            if self.matches(first, cursor) {
                seen += 1;
                if self.count.is_some_and(|limit| seen > limit) {
                    break;
                }
                if cursor >= window_start {
                    dates.push(cursor);
                }
            }
            match cursor.succ_opt() {
                Some(next) => cursor = next,
                None => break,
            }
        }
        dates
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub id: CalendarEventId,
    pub calendar: CalendarId,
    pub title: String,
    pub availability: CalendarAvailability,
    pub start: Timestamp,
    pub end: Timestamp,
    #[serde(default)]
    pub recurrence: Option<Recurrence>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CalendarEventDraft {
    pub title: String,
    pub availability: CalendarAvailability,
    pub start: Timestamp,
    pub end: Timestamp,
    #[serde(default)]
    pub recurrence: Option<Recurrence>,
}

/// Where an availability marker comes from. Callers exclude sources they are
/// asking on behalf of, e.g. the visit being re-planned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum InstanceSource {
    Event(CalendarEventId),
    Visit(VisitId),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CalendarEventInstance {
    pub start: Timestamp,
    pub end: Timestamp,
    pub available: bool,
    pub source: InstanceSource,
    pub calendar: CalendarId,
}

/// Placement of an instance inside one day of a calendar grid, in twelfths of a day.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DayMarker {
    pub start: Timestamp,
    pub end: Timestamp,
    pub time_interval: String,
    pub available_class: &'static str,
    pub top_offset: f64,
    pub height: f64,
}

const SECONDS_PER_EM: f64 = 24.0 * 60.0 * 60.0 / 12.0;

impl CalendarEventInstance {
    pub fn span(&self) -> Span {
        Span::new(self.start, self.end)
    }

    fn excluded(&self, exclude: &[VisitId]) -> bool {
        matches!(self.source, InstanceSource::Visit(visit) if exclude.contains(&visit))
    }

    pub fn day_marker(&self, date: NaiveDate) -> DayMarker {
        let day_start = Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN));
        let day_end = day_start + Duration::days(1);
        let start = self.start.max(day_start);
        let end = self.end.min(day_end);

        let time_interval = if end == day_end {
            format!("{} - 24:00", start.format("%H:%M"))
        } else {
            format!("{} - {}", start.format("%H:%M"), end.format("%H:%M"))
        };

        let top = (start - day_start).num_seconds() as f64 / SECONDS_PER_EM;
        let height = (end - start).num_seconds() as f64 / SECONDS_PER_EM;

        DayMarker {
            start,
            end,
            time_interval,
            available_class: if self.available {
                "available"
            } else {
                "unavailable"
            },
            top_offset: (top * 100.0).round() / 100.0,
            height: (height * 100.0).round() / 100.0,
        }
    }
}

impl CalendarEvent {
    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    fn instance(&self, start: Timestamp, end: Timestamp) -> CalendarEventInstance {
        CalendarEventInstance {
            start,
            end,
            available: self.availability == CalendarAvailability::Available,
            source: InstanceSource::Event(self.id),
            calendar: self.calendar,
        }
    }

    /// Instances overlapping `window`. Recurring events search a window widened
    /// by the event duration so occurrences starting before it are still found.
    pub fn between(&self, window: &Span) -> Vec<CalendarEventInstance> {
        let Some(rule) = &self.recurrence else {
            if self.end > window.start && self.start < window.end {
                return vec![self.instance(self.start, self.end)];
            }
            return Vec::new();
        };

        let duration = self.duration();
        let search_start = (window.start - duration).date_naive();
        let search_end = (window.end + duration).date_naive();
        let time_of_day = self.start.time();

        rule.dates(self.start.date_naive(), search_start, search_end)
            .into_iter()
            .filter_map(|date| {
                let start = Utc.from_utc_datetime(&date.and_time(time_of_day));
                let end = start + duration;
                (end > window.start && start < window.end).then(|| self.instance(start, end))
            })
            .collect()
    }
}

fn sort_instances(instances: &mut [CalendarEventInstance]) {
    instances.sort_by(|a, b| a.start.cmp(&b.start).then(a.end.cmp(&b.end)));
}

/// Some available instance covers `span` and nothing outside `exclude` blocks it.
pub fn is_available_between(
    available: &[CalendarEventInstance],
    unavailable: &[CalendarEventInstance],
    span: &Span,
    exclude: &[VisitId],
) -> bool {
    let covered = available
        .iter()
        .filter(|x| !x.excluded(exclude))
        .any(|x| x.span().covers(span));
    covered && unavailable.iter().all(|x| x.excluded(exclude))
}

/// A free stretch of `minutes` exists inside one available instance.
pub fn has_available_time(
    available: &[CalendarEventInstance],
    unavailable: &[CalendarEventInstance],
    window: &Span,
    minutes: i64,
) -> bool {
    let needed = Duration::minutes(minutes);
    let blockers: Vec<Span> = unavailable.iter().map(CalendarEventInstance::span).collect();
    available.iter().any(|x| {
        let start = x.start.max(window.start);
        let end = x.end.min(window.end);
        start < end && has_gap(&Span::new(start, end), &blockers, needed)
    })
}

/// Merged available intervals with all unavailable time removed.
pub fn available_intervals(
    available: &[CalendarEventInstance],
    unavailable: &[CalendarEventInstance],
) -> Vec<Span> {
    let free: Vec<Span> = available.iter().map(CalendarEventInstance::span).collect();
    let blocked: Vec<Span> = unavailable.iter().map(CalendarEventInstance::span).collect();
    subtract_intervals(&merge_overlapping(&free), &merge_overlapping(&blocked))
}

impl BookingStore {
    fn calendar_events_with(
        &self,
        calendar: CalendarId,
        availability: CalendarAvailability,
        window: &Span,
    ) -> Vec<CalendarEventInstance> {
        self.calendar_events
            .values()
            .filter(|event| event.calendar == calendar && event.availability == availability)
            .flat_map(|event| event.between(window))
            .collect()
    }

    pub fn calendar_available_list(
        &self,
        calendar: CalendarId,
        window: &Span,
    ) -> Vec<CalendarEventInstance> {
        let mut list =
            self.calendar_events_with(calendar, CalendarAvailability::Available, window);
        sort_instances(&mut list);
        list
    }

    /// Not-available events plus everything the calendar's owner is already booked for.
    pub fn calendar_unavailable_list(
        &self,
        calendar: CalendarId,
        window: &Span,
    ) -> Vec<CalendarEventInstance> {
        let mut list =
            self.calendar_events_with(calendar, CalendarAvailability::NotAvailable, window);

        let occupied = match self.calendars.get(&calendar).map(|cal| cal.owner) {
            Some(CalendarOwner::Resource(resource)) => {
                self.occupied_event_times(resource, Some(window))
            }
            Some(CalendarOwner::Product(product)) => self.product_occupied_event_times(product, window),
            None => Vec::new(),
        };
        for time in occupied.iter().filter_map(|id| self.event_times.get(id)) {
            if let (Some(span), Some(visit)) = (time.span(), time.visit) {
                list.push(CalendarEventInstance {
                    start: span.start,
                    end: span.end,
                    available: false,
                    source: InstanceSource::Visit(visit),
                    calendar,
                });
            }
        }

        sort_instances(&mut list);
        list
    }

    fn product_occupied_event_times(
        &self,
        product: ProductId,
        window: &Span,
    ) -> Vec<crate::ids::EventTimeId> {
        self.event_times
            .values()
            .filter(|time| time.product == product)
            .filter(|time| time.span().is_some_and(|span| span.overlaps(window)))
            .filter(|time| {
                time.visit
                    .and_then(|visit| self.visits.get(&visit))
                    .is_some_and(|visit| visit.workflow_status != WorkflowStatus::Cancelled)
            })
            .map(|time| time.id)
            .collect()
    }

    pub fn calendar_is_available_between(
        &self,
        calendar: CalendarId,
        span: &Span,
        exclude: &[VisitId],
    ) -> bool {
        is_available_between(
            &self.calendar_available_list(calendar, span),
            &self.calendar_unavailable_list(calendar, span),
            span,
            exclude,
        )
    }

    pub fn calendar_has_available_time(
        &self,
        calendar: CalendarId,
        window: &Span,
        minutes: i64,
    ) -> bool {
        has_available_time(
            &self.calendar_available_list(calendar, window),
            &self.calendar_unavailable_list(calendar, window),
            window,
            minutes,
        )
    }

    pub fn calendar_available_intervals(&self, calendar: CalendarId, window: &Span) -> Vec<Span> {
        available_intervals(
            &self.calendar_available_list(calendar, window),
            &self.calendar_unavailable_list(calendar, window),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(day: u32, hour: u32) -> Timestamp {
        Utc.with_ymd_and_hms(2030, 3, day, hour, 0, 0)
            .single()
            .expect("valid timestamp")
    }

    fn event(availability: CalendarAvailability, recurrence: Option<Recurrence>) -> CalendarEvent {
        // 2030-03-04 is a Monday.
        CalendarEvent {
            id: CalendarEventId(1),
            calendar: CalendarId(1),
            title: "Office hours".to_string(),
            availability,
            start: ts(4, 8),
            end: ts(4, 16),
            recurrence,
        }
    }

    fn weekly(weekdays: Vec<Weekday>) -> Recurrence {
        Recurrence {
            frequency: RecurrenceFrequency::Weekly,
            interval: 1,
            weekdays,
            until: None,
            count: None,
        }
    }

    #[test]
    fn single_event_yields_when_overlapping() {
        let ev = event(CalendarAvailability::Available, None);
        assert_eq!(ev.between(&Span::new(ts(4, 15), ts(4, 18))).len(), 1);
        assert!(ev.between(&Span::new(ts(4, 16), ts(4, 18))).is_empty());
    }

    #[test]
    fn weekly_rule_repeats_on_listed_days() {
        let ev = event(
            CalendarAvailability::Available,
            Some(weekly(vec![Weekday::Mon, Weekday::Wed])),
        );
        let found = ev.between(&Span::new(ts(4, 0), ts(11, 0)));
        let days: Vec<u32> = found.iter().map(|x| x.start.day()).collect();
        assert_eq!(days, vec![4, 6]);
        assert!(found.iter().all(|x| x.end - x.start == Duration::hours(8)));
    }

    #[test]
    fn count_limits_occurrences_from_the_first() {
        let rule = Recurrence {
            frequency: RecurrenceFrequency::Daily,
            interval: 2,
            weekdays: Vec::new(),
            until: None,
            count: Some(3),
        };
        let ev = event(CalendarAvailability::Available, Some(rule));
        let found = ev.between(&Span::new(ts(7, 0), ts(20, 0)));
        let days: Vec<u32> = found.iter().map(|x| x.start.day()).collect();
        assert_eq!(days, vec![8]);
    }

    #[test]
    fn occurrence_started_before_window_is_found() {
        let ev = event(
            CalendarAvailability::Available,
            Some(Recurrence {
                frequency: RecurrenceFrequency::Daily,
                interval: 1,
                weekdays: Vec::new(),
                until: None,
                count: None,
            }),
        );
        let found = ev.between(&Span::new(ts(5, 12), ts(5, 13)));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].start, ts(5, 8));
    }

    #[test]
    fn availability_requires_cover_and_no_blockers() {
        let avail = event(CalendarAvailability::Available, None).between(&Span::new(ts(4, 0), ts(5, 0)));
        let blocker = CalendarEventInstance {
            start: ts(4, 10),
            end: ts(4, 11),
            available: false,
            source: InstanceSource::Visit(VisitId(9)),
            calendar: CalendarId(1),
        };
        let span = Span::new(ts(4, 9), ts(4, 12));
        assert!(is_available_between(&avail, &[], &span, &[]));
        assert!(!is_available_between(&avail, &[blocker.clone()], &span, &[]));
        assert!(is_available_between(&avail, &[blocker.clone()], &span, &[VisitId(9)]));
        assert!(!is_available_between(&avail, &[], &Span::new(ts(4, 7), ts(4, 9)), &[]));
        assert!(has_available_time(&avail, &[blocker.clone()], &span, 60));
        let intervals = available_intervals(&avail, &[blocker]);
        assert_eq!(
            intervals,
            vec![Span::new(ts(4, 8), ts(4, 10)), Span::new(ts(4, 11), ts(4, 16))]
        );
    }

    #[test]
    fn day_marker_runs_to_midnight() {
        let instance = CalendarEventInstance {
            start: ts(4, 18),
            end: ts(5, 6),
            available: true,
            source: InstanceSource::Event(CalendarEventId(1)),
            calendar: CalendarId(1),
        };
        let marker = instance.day_marker(NaiveDate::from_ymd_opt(2030, 3, 4).expect("date"));
        assert_eq!(marker.time_interval, "18:00 - 24:00");
        assert_eq!(marker.top_offset, 9.0);
        assert_eq!(marker.height, 3.0);
        assert_eq!(marker.available_class, "available");
    }
}
