use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Admin,
    Pilot,
    Agency,
}

/// Answers the questions the booking lifecycle asks before any write.
pub trait Permissions: Send + Sync {
    fn role(&self) -> Role;
    fn can_edit_booking(&self, creator_id: &str) -> bool;
    fn can_delete_booking(&self, creator_id: &str) -> bool;

    /// Admins bypass the edit window and capacity limits.
    fn is_privileged(&self) -> bool {
        self.role() == Role::Admin
    }
}

/// The signed-in user acting on the schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: String,
    pub user_name: String,
    pub role: Role,
}

impl Actor {
    pub fn new(user_id: impl Into<String>, user_name: impl Into<String>, role: Role) -> Self {
        Self {
            user_id: user_id.into(),
            user_name: user_name.into(),
            role,
        }
    }

    /// Source recorded on bookings this actor submits without naming one.
    pub fn default_booking_source(&self) -> String {
        match self.role {
            Role::Agency => self.user_name.clone(),
            Role::Admin | Role::Pilot => "direct".to_string(),
        }
    }
}

impl Permissions for Actor {
    fn role(&self) -> Role {
        self.role
    }

    /// Pilots work the whole schedule; agencies only their own bookings.
    fn can_edit_booking(&self, creator_id: &str) -> bool {
        match self.role {
            Role::Admin | Role::Pilot => true,
            Role::Agency => creator_id == self.user_id,
        }
    }

    fn can_delete_booking(&self, creator_id: &str) -> bool {
        match self.role {
            Role::Admin => true,
            Role::Pilot => false,
            Role::Agency => creator_id == self.user_id,
        }
    }
}
