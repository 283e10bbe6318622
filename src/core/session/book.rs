use serde::Serialize;

use super::model::{Account, Session, SyncStatus};

/// What happened to the active pointer after a removal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "change", content = "account_id", rename_all = "snake_case")]
pub enum ActiveChange {
    Unchanged,
    /// The active account was removed and this one took over.
    Promoted(String),
    /// The list is empty; the login surface must be shown.
    Cleared,
}

/// Ordered account list with a single active pointer.
///
/// Invariants: one entry per username, and exactly one active entry whenever
/// the list is non-empty.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AccountBook {
    accounts: Vec<Account>,
}

impl AccountBook {
    pub fn accounts(&self) -> &[Account] {
        &self.accounts
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Account> {
        self.accounts.iter().find(|a| a.id == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Account> {
        self.accounts.iter_mut().find(|a| a.id == id)
    }

    pub fn active(&self) -> Option<&Account> {
        self.accounts.iter().find(|a| a.is_active)
    }

    /// Insert or replace by username. A replaced account keeps its position
    /// and active flag; the first account ever added becomes active.
    pub fn upsert(&mut self, session: Session) -> Account {
        let id = Account::id_for(&session.username);
        if let Some(existing) = self.get_mut(&id) {
            existing.session = session;
            existing.sync = SyncStatus::Local;
            return existing.clone();
        }

        let mut account = Account::new(session);
        account.is_active = self.active().is_none();
        self.accounts.push(account.clone());
        account
    }

    /// Make `id` the only active account. Returns false if it is unknown.
    pub fn set_active(&mut self, id: &str) -> bool {
        if self.get(id).is_none() {
            return false;
        }
        for account in &mut self.accounts {
            account.is_active = account.id == id;
        }
        true
    }

    pub fn remove(&mut self, id: &str) -> Option<(Account, ActiveChange)> {
        let index = self.accounts.iter().position(|a| a.id == id)?;
        let removed = self.accounts.remove(index);
        let change = self.repair_active(removed.is_active);
        Some((removed, change))
    }

    /// Remove every listed id in one pass; the active pointer is repaired once.
    pub fn remove_many(&mut self, ids: &[String]) -> (Vec<Account>, ActiveChange) {
        let (removed, kept): (Vec<Account>, Vec<Account>) = std::mem::take(&mut self.accounts)
            .into_iter()
            .partition(|a| ids.contains(&a.id));
        self.accounts = kept;
        let active_removed = removed.iter().any(|a| a.is_active);
        let change = self.repair_active(active_removed);
        (removed, change)
    }

    fn repair_active(&mut self, active_removed: bool) -> ActiveChange {
        if !active_removed {
            return ActiveChange::Unchanged;
        }
        match self.accounts.first_mut() {
            Some(first) => {
                first.is_active = true;
                ActiveChange::Promoted(first.id.clone())
            }
            None => ActiveChange::Cleared,
        }
    }
}
