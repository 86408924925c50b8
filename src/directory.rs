use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::model::UserId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Employee,
    Admin,
}

/// The identity an operation runs as. Trusted as given.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: UserId,
    pub role: Role,
}

impl Actor {
    pub fn employee(id: impl Into<UserId>) -> Self {
        Self { id: id.into(), role: Role::Employee }
    }

    pub fn admin(id: impl Into<UserId>) -> Self {
        Self { id: id.into(), role: Role::Admin }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// User/auth collaborator.
pub trait Directory: Send + Sync {
    /// Map a login to an actor. `None` means the login is refused.
    fn resolve(&self, login: &str) -> Option<Actor>;

    fn active_admins(&self) -> Vec<UserId>;
}

#[derive(Debug, Clone, Copy)]
struct Member {
    role: Role,
    active: bool,
}

/// Directory seeded from configuration. Unknown logins are employees;
/// deactivated members are refused.
#[derive(Debug, Default)]
pub struct StaticDirectory {
    members: DashMap<UserId, Member>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_admins<I, S>(admins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<UserId>,
    {
        let dir = Self::new();
        for a in admins {
            dir.add(a, Role::Admin);
        }
        dir
    }

    pub fn add(&self, login: impl Into<UserId>, role: Role) {
        self.members.insert(login.into(), Member { role, active: true });
    }

    pub fn deactivate(&self, login: &str) -> bool {
        match self.members.get_mut(login) {
            Some(mut m) => {
                m.active = false;
                true
            }
            None => false,
        }
    }
}

impl Directory for StaticDirectory {
    fn resolve(&self, login: &str) -> Option<Actor> {
        match self.members.get(login) {
            Some(m) if !m.active => None,
            Some(m) => Some(Actor { id: login.to_string(), role: m.role }),
            None => Some(Actor::employee(login)),
        }
    }

    fn active_admins(&self) -> Vec<UserId> {
        let mut admins: Vec<UserId> = self
            .members
            .iter()
            .filter(|e| e.value().active && e.value().role == Role::Admin)
            .map(|e| e.key().clone())
            .collect();
        admins.sort();
        admins
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_roles() {
        let dir = StaticDirectory::with_admins(["root"]);
        dir.add("sam", Role::Employee);
        assert_eq!(dir.resolve("root"), Some(Actor::admin("root")));
        assert_eq!(dir.resolve("sam"), Some(Actor::employee("sam")));
        assert_eq!(dir.resolve("stranger"), Some(Actor::employee("stranger")));
    }

    #[test]
    fn deactivated_members_are_refused_and_not_listed() {
        let dir = StaticDirectory::with_admins(["ana", "bo"]);
        assert_eq!(dir.active_admins(), vec!["ana".to_string(), "bo".to_string()]);
        assert!(dir.deactivate("bo"));
        assert_eq!(dir.resolve("bo"), None);
        assert_eq!(dir.active_admins(), vec!["ana".to_string()]);
        assert!(!dir.deactivate("nobody"));
    }
}
