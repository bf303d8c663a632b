use serde::{Deserialize, Serialize};

use crate::ids::{UnitId, UserId};
use crate::organization::OrganizationalUnit;

/// Role of a staff user. Guests are not users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Teacher,
    Host,
    Coordinator,
    Administrator,
    FacultyEditor,
    None,
}

/// Roles allowed to edit products and visits within their units.
pub const EDIT_ROLES: [UserRole; 3] = [
    UserRole::Administrator,
    UserRole::FacultyEditor,
    UserRole::Coordinator,
];

impl UserRole {
    pub const fn code(self) -> u8 {
        match self {
            UserRole::Teacher => 0,
            UserRole::Host => 1,
            UserRole::Coordinator => 2,
            UserRole::Administrator => 3,
            UserRole::FacultyEditor => 4,
            UserRole::None => 5,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            UserRole::Teacher => "Teacher",
            UserRole::Host => "Host",
            UserRole::Coordinator => "Coordinator",
            UserRole::Administrator => "Administrator",
            UserRole::FacultyEditor => "Faculty editor",
            UserRole::None => "None",
        }
    }

    pub fn is_editor(self) -> bool {
        EDIT_ROLES.contains(&self)
    }

    /// Roles a user with this role may hand out to others.
    pub const fn available_roles(self) -> &'static [UserRole] {
        match self {
            UserRole::None | UserRole::Teacher | UserRole::Host => &[],
            UserRole::Coordinator => &[UserRole::Teacher, UserRole::Host, UserRole::Coordinator],
            UserRole::FacultyEditor => &[
                UserRole::Teacher,
                UserRole::Host,
                UserRole::Coordinator,
                UserRole::FacultyEditor,
            ],
            UserRole::Administrator => &[
                UserRole::Teacher,
                UserRole::Host,
                UserRole::Coordinator,
                UserRole::FacultyEditor,
                UserRole::Administrator,
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: UserId,
    pub username: String,
    pub full_name: String,
    pub email: String,
    pub role: UserRole,
    pub unit: Option<UnitId>,
    #[serde(default)]
    pub availability_text: String,
}

impl UserProfile {
    /// Whether this user may work inside `unit`.
    ///
    /// Administrators reach every unit. Faculty editors reach their own unit
    /// and the units directly below it. Everyone else only reaches their own.
    pub fn unit_access(&self, unit: &OrganizationalUnit) -> bool {
        match self.role {
            UserRole::Administrator => true,
            role if role.is_editor() => {
                let Some(own) = self.unit else {
                    return false;
                };
                if own == unit.id {
                    return true;
                }
                role == UserRole::FacultyEditor && unit.parent == Some(own)
            }
            _ => false,
        }
    }

    pub fn can_edit(&self, unit: Option<&OrganizationalUnit>) -> bool {
        if self.role == UserRole::Administrator {
            return true;
        }
        match unit {
            Some(unit) => self.role.is_editor() && self.unit_access(unit),
            None => false,
        }
    }

    pub fn can_edit_units(&self) -> bool {
        matches!(self.role, UserRole::Administrator | UserRole::FacultyEditor)
    }

    pub fn can_assign_role(&self, target: UserRole) -> bool {
        self.role.available_roles().contains(&target)
    }

    pub fn is_host(&self) -> bool {
        self.role == UserRole::Host
    }

    pub fn is_teacher(&self) -> bool {
        self.role == UserRole::Teacher
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::organization::UnitKind;

    fn profile(role: UserRole, unit: Option<u64>) -> UserProfile {
        UserProfile {
            id: UserId(1),
            username: "user".to_string(),
            full_name: "Some User".to_string(),
            email: "user@example.org".to_string(),
            role,
            unit: unit.map(UnitId),
            availability_text: String::new(),
        }
    }

    fn unit(id: u64, parent: Option<u64>) -> OrganizationalUnit {
        OrganizationalUnit {
            id: UnitId(id),
            name: format!("unit {id}"),
            kind: UnitKind::Institute,
            parent: parent.map(UnitId),
        }
    }

    #[test]
    fn role_table_matches_hierarchy() {
        assert!(UserRole::Host.available_roles().is_empty());
        assert!(!UserRole::Coordinator
            .available_roles()
            .contains(&UserRole::FacultyEditor));
        assert_eq!(UserRole::Administrator.available_roles().len(), 5);
        assert!(profile(UserRole::FacultyEditor, Some(1)).can_assign_role(UserRole::Coordinator));
        assert!(!profile(UserRole::FacultyEditor, Some(1)).can_assign_role(UserRole::Administrator));
    }

    #[test]
    fn faculty_editor_reaches_child_units_only() {
        let editor = profile(UserRole::FacultyEditor, Some(1));
        assert!(editor.unit_access(&unit(1, None)));
        assert!(editor.unit_access(&unit(2, Some(1))));
        assert!(!editor.unit_access(&unit(3, Some(2))));
    }

    #[test]
    fn coordinators_edit_their_own_unit() {
        let coordinator = profile(UserRole::Coordinator, Some(2));
        assert!(coordinator.can_edit(Some(&unit(2, Some(1)))));
        assert!(!coordinator.can_edit(Some(&unit(1, None))));
        assert!(!coordinator.can_edit(None));
        assert!(!coordinator.unit_access(&unit(3, Some(2))));
        assert!(!profile(UserRole::Teacher, Some(2)).unit_access(&unit(2, Some(1))));
    }

    #[test]
    fn hosts_never_edit() {
        let host = profile(UserRole::Host, Some(2));
        assert!(!host.can_edit(Some(&unit(2, None))));
        assert!(profile(UserRole::Administrator, None).can_edit(None));
    }
}
