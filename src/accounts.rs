//! Shared login/registration account store.
//!
//! Combines the in-memory `username -> password` map and the registration path's
//! database insert behind a single lock, so the existence check and the insert run
//! as one critical section. This closes a TOCTOU race between two concurrent
//! registrations of the same name (see DESIGN.md).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use mysql::prelude::Queryable;
use mysql::Conn;

use crate::dbpool::DbPool;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    Success,
    Collision,
    DbError,
}

#[derive(Debug)]
pub struct Accounts {
    users: Mutex<HashMap<String, String>>,
    db: Arc<DbPool<Conn>>,
}

impl Accounts {
    pub fn new(db: Arc<DbPool<Conn>>, initial: HashMap<String, String>) -> Arc<Self> {
        Arc::new(Accounts { users: Mutex::new(initial), db })
    }

    /// Loads the full `user` table through a leased connection, once at startup, to
    /// seed the in-memory map.
    pub fn load(db: &Arc<DbPool<Conn>>) -> Result<HashMap<String, String>, mysql::Error> {
        let mut conn = db.acquire();
        let rows: Vec<(String, String)> = conn.query("SELECT username, password FROM user")?;
        Ok(rows.into_iter().collect())
    }

    /// `true` if the password matches exactly. Passwords are stored and compared in
    /// plaintext; see DESIGN.md OQ-3.
    pub fn check(&self, username: &str, password: &str) -> bool {
        self.users.lock().unwrap().get(username).is_some_and(|p| p == password)
    }

    /// Registers a new account. If the username isn't already taken, the account is
    /// inserted into both the database and the in-memory map unconditionally; only the
    /// reported outcome (and thus the redirect target the caller picks) depends on
    /// whether the database insert itself succeeded. This mirrors the mechanism it is
    /// grounded on, which updates its in-memory map regardless of the query's return
    /// code — preserved rather than silently hardened into an all-or-nothing insert.
    pub fn register(&self, username: &str, password: &str) -> RegisterOutcome {
        let mut guard = self.users.lock().unwrap();
        if guard.contains_key(username) {
            return RegisterOutcome::Collision;
        }

        let mut conn = self.db.acquire();
        let query = format!(
            "INSERT INTO user(username, password) VALUES('{}', '{}')",
            escape_literal(username),
            escape_literal(password),
        );
        let outcome = match conn.query_drop(query) {
            Ok(()) => RegisterOutcome::Success,
            Err(_) => RegisterOutcome::DbError,
        };
        guard.insert(username.to_string(), password.to_string());
        outcome
    }
}

fn escape_literal(s: &str) -> String {
    s.replace('\\', "\\\\").replace('\'', "\\'")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_pool() -> Arc<DbPool<Conn>> {
        DbPool::new(Vec::new())
    }

    #[test]
    fn check_matches_exact_plaintext_password() {
        let mut initial = HashMap::new();
        initial.insert("alice".to_string(), "pw".to_string());
        let accounts = Accounts::new(empty_pool(), initial);

        assert!(accounts.check("alice", "pw"));
        assert!(!accounts.check("alice", "wrong"));
        assert!(!accounts.check("nobody", "pw"));
    }

    #[test]
    fn register_reports_collision_without_touching_the_database() {
        let mut initial = HashMap::new();
        initial.insert("bob".to_string(), "existing".to_string());
        let accounts = Accounts::new(empty_pool(), initial);

        // The database pool is empty, so any attempt to acquire a connection here
        // would deadlock; reaching `DbError`/`Success` would hang the test, proving
        // the collision check really does short-circuit before leasing a connection.
        assert_eq!(accounts.register("bob", "whatever"), RegisterOutcome::Collision);
    }
}
