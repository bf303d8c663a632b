//! Identifier newtypes shared by every entity in the booking store.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! entity_id {
    ($($(#[$meta:meta])* $name:ident),+ $(,)?) => {
        $(
            $(#[$meta])*
            #[derive(
                Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
            )]
            #[serde(transparent)]
            pub struct $name(pub u64);

            impl fmt::Display for $name {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    write!(f, "{}", self.0)
                }
            }
        )+
    };
}

entity_id!(
    /// Organizational unit (faculty, institute, department).
    UnitId,
    UserId,
    ProductId,
    RoomId,
    ResourceId,
    PoolId,
    RequirementId,
    CalendarId,
    CalendarEventId,
    EventTimeId,
    VisitId,
    VisitResourceId,
    GuestId,
    BookingId,
    TemplateId,
    MessageId,
    LogEntryId,
);
