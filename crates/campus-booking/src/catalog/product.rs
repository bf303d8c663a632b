use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::ids::{CalendarId, ProductId, RoomId, UnitId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductKind {
    StudentForADay,
    GroupVisit,
    TeacherEducation,
    OpenHouse,
    AssignmentHelp,
    StudyMaterial,
    StudyProject,
    OtherOffers,
}

impl ProductKind {
    pub const fn label(self) -> &'static str {
        match self {
            ProductKind::StudentForADay => "Student for a day",
            ProductKind::GroupVisit => "Group visit",
            ProductKind::TeacherEducation => "Teacher education",
            ProductKind::OpenHouse => "Open house",
            ProductKind::AssignmentHelp => "Assignment help",
            ProductKind::StudyMaterial => "Study material",
            ProductKind::StudyProject => "Study project",
            ProductKind::OtherOffers => "Other offers",
        }
    }
}

/// How event times for a product come about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeMode {
    None,
    ResourceControlled,
    ResourceControlledAutoassign,
    SpecificTimes,
    GuestSuggested,
    NoBooking,
}

impl TimeMode {
    pub const fn label(self) -> &'static str {
        match self {
            TimeMode::None => "No time management",
            TimeMode::ResourceControlled => "Controlled by resources",
            TimeMode::ResourceControlledAutoassign => {
                "Controlled by resources with automatic assignment"
            }
            TimeMode::SpecificTimes => "Specific times",
            TimeMode::GuestSuggested => "Suggested by guest",
            TimeMode::NoBooking => "Not bookable",
        }
    }

    pub const fn is_resource_controlled(self) -> bool {
        matches!(
            self,
            TimeMode::ResourceControlled | TimeMode::ResourceControlledAutoassign
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductState {
    Created,
    Active,
    Discontinued,
}

impl ProductState {
    pub const fn label(self) -> &'static str {
        match self {
            ProductState::Created => "Under development",
            ProductState::Active => "Active",
            ProductState::Discontinued => "Discontinued",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub title: String,
    pub teaser: String,
    pub description: String,
    pub unit: UnitId,
    pub kind: ProductKind,
    pub time_mode: TimeMode,
    pub state: ProductState,
    pub duration_minutes: u32,
    pub minimum_visitors: u32,
    pub maximum_visitors: Option<u32>,
    pub waiting_list_enabled: bool,
    pub waiting_list_length: u32,
    pub fixed_waiting_list_capacity: Option<u32>,
    pub rooms_needed: bool,
    pub rooms: BTreeSet<RoomId>,
    pub needed_hosts: u32,
    pub needed_teachers: u32,
    pub potential_hosts: BTreeSet<UserId>,
    pub potential_teachers: BTreeSet<UserId>,
    pub coordinator: Option<UserId>,
    pub room_responsible: Vec<String>,
    pub calendar: Option<CalendarId>,
}

impl Product {
    pub fn is_resource_controlled(&self) -> bool {
        self.time_mode.is_resource_controlled()
    }

    pub fn is_bookable(&self) -> bool {
        self.state == ProductState::Active && self.time_mode != TimeMode::NoBooking
    }

    pub fn waiting_list_capacity(&self) -> u32 {
        if !self.waiting_list_enabled {
            return 0;
        }
        self.fixed_waiting_list_capacity
            .unwrap_or(self.waiting_list_length)
    }
}

/// Editable product fields accepted from callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductDraft {
    pub title: String,
    #[serde(default)]
    pub teaser: String,
    #[serde(default)]
    pub description: String,
    pub unit: UnitId,
    pub kind: ProductKind,
    pub time_mode: TimeMode,
    #[serde(default = "default_state")]
    pub state: ProductState,
    #[serde(default)]
    pub duration_minutes: u32,
    #[serde(default)]
    pub minimum_visitors: u32,
    #[serde(default)]
    pub maximum_visitors: Option<u32>,
    #[serde(default)]
    pub waiting_list_enabled: bool,
    #[serde(default)]
    pub waiting_list_length: u32,
    #[serde(default)]
    pub fixed_waiting_list_capacity: Option<u32>,
    #[serde(default)]
    pub rooms_needed: bool,
    #[serde(default)]
    pub rooms: BTreeSet<RoomId>,
    #[serde(default)]
    pub needed_hosts: u32,
    #[serde(default)]
    pub needed_teachers: u32,
    #[serde(default)]
    pub potential_hosts: BTreeSet<UserId>,
    #[serde(default)]
    pub potential_teachers: BTreeSet<UserId>,
    #[serde(default)]
    pub coordinator: Option<UserId>,
    #[serde(default)]
    pub room_responsible: Vec<String>,
}

fn default_state() -> ProductState {
    ProductState::Created
}

impl ProductDraft {
    pub fn into_product(self, id: ProductId, calendar: Option<CalendarId>) -> Product {
        Product {
            id,
            title: self.title,
            teaser: self.teaser,
            description: self.description,
            unit: self.unit,
            kind: self.kind,
            time_mode: self.time_mode,
            state: self.state,
            duration_minutes: self.duration_minutes,
            minimum_visitors: self.minimum_visitors,
            maximum_visitors: self.maximum_visitors,
            waiting_list_enabled: self.waiting_list_enabled,
            waiting_list_length: self.waiting_list_length,
            fixed_waiting_list_capacity: self.fixed_waiting_list_capacity,
            rooms_needed: self.rooms_needed,
            rooms: self.rooms,
            needed_hosts: self.needed_hosts,
            needed_teachers: self.needed_teachers,
            potential_hosts: self.potential_hosts,
            potential_teachers: self.potential_teachers,
            coordinator: self.coordinator,
            room_responsible: self.room_responsible,
            calendar,
        }
    }
}
