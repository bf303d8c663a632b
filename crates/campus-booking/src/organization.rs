use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::ids::UnitId;

/// Kind of organizational unit. Faculties sit at the top of the hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    Faculty,
    Institute,
    Other,
}

impl UnitKind {
    pub const fn label(self) -> &'static str {
        match self {
            UnitKind::Faculty => "Faculty",
            UnitKind::Institute => "Institute",
            UnitKind::Other => "Other",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganizationalUnit {
    pub id: UnitId,
    pub name: String,
    pub kind: UnitKind,
    pub parent: Option<UnitId>,
}

/// Walks parent links starting at `unit`'s parent. Stops on a cycle or a dangling link.
pub fn ancestors(units: &BTreeMap<UnitId, OrganizationalUnit>, unit: UnitId) -> Vec<UnitId> {
    let mut chain = Vec::new();
    let mut cursor = units.get(&unit).and_then(|u| u.parent);
    while let Some(id) = cursor {
        if id == unit || chain.contains(&id) {
            break;
        }
        chain.push(id);
        cursor = units.get(&id).and_then(|u| u.parent);
    }
    chain
}

/// True when `root` is `unit` itself or one of its ancestors.
pub fn is_within(units: &BTreeMap<UnitId, OrganizationalUnit>, unit: UnitId, root: UnitId) -> bool {
    unit == root || ancestors(units, unit).contains(&root)
}

/// The closest faculty above (or at) `unit`.
pub fn faculty_of(
    units: &BTreeMap<UnitId, OrganizationalUnit>,
    unit: UnitId,
) -> Option<UnitId> {
    std::iter::once(unit)
        .chain(ancestors(units, unit))
        .find(|id| {
            units
                .get(id)
                .is_some_and(|u| u.kind == UnitKind::Faculty)
        })
}
