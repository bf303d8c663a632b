//! Rooms, staff and equipment that products need, grouped into pools.

pub mod calendar;
pub mod pool;

pub use calendar::{
    Calendar, CalendarAvailability, CalendarEvent, CalendarEventDraft, CalendarEventInstance,
    CalendarOwner, DayMarker, InstanceSource, Recurrence, RecurrenceFrequency,
};
pub use pool::{
    Resource, ResourceKind, ResourcePool, ResourceRequirement, Room, VisitResource,
};
