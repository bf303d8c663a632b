//! Event times and the resource availability that decides whether they can be booked.

pub mod availability;
pub mod event_time;
pub mod intervals;

pub use availability::AvailabilitySubject;
pub use event_time::{parse_human_readable_interval, EventTime, EventTimeDraft, ResourceStatus};
pub use intervals::{Span, Timestamp};
