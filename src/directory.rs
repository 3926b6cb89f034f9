//! User directory consulted by the engine and the read-side projections
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    pub active: bool,
}

impl User {
    pub fn new(id: impl Into<String>, name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            email: email.into(),
            active: true,
        }
    }
    pub fn deactivated(mut self) -> Self {
        self.active = false;
        self
    }
}

/// Lookup surface of whatever system owns user accounts.
pub trait UserDirectory {
    fn user_by_id(&self, id: &str) -> Option<User>;
    fn user_by_email(&self, email: &str) -> Option<User>;
    fn active_users(&self) -> Vec<User>;
    /// The signed in user, if the directory tracks a session.
    fn current_user(&self) -> Option<User>;
}

/// Directory held entirely in memory. Credentials are not its concern.
#[derive(Debug, Clone, Default)]
pub struct MemoryDirectory {
    users: BTreeMap<String, User>,
    current: Option<String>,
}

impl MemoryDirectory {
    pub fn new<I: IntoIterator<Item = User>>(users: I) -> Self {
        Self {
            users: users.into_iter().map(|u| (u.id.clone(), u)).collect(),
            current: None,
        }
    }
    pub fn insert(&mut self, user: User) {
        self.users.insert(user.id.clone(), user);
    }
    /// Selects the session user. Unknown ids clear the session.
    pub fn sign_in_as(&mut self, id: &str) {
        self.current = self.users.contains_key(id).then(|| id.to_string());
    }
    pub fn sign_out(&mut self) {
        self.current = None;
    }
}

impl UserDirectory for MemoryDirectory {
    fn user_by_id(&self, id: &str) -> Option<User> {
        self.users.get(id).cloned()
    }
    fn user_by_email(&self, email: &str) -> Option<User> {
        self.users
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned()
    }
    fn active_users(&self) -> Vec<User> {
        self.users.values().filter(|u| u.active).cloned().collect()
    }
    fn current_user(&self) -> Option<User> {
        self.current.as_deref().and_then(|id| self.user_by_id(id))
    }
}
