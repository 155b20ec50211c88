//! Confirm-before-acting bookkeeping
//!
//! An action is armed by a first press and performed by a second press
//! before its deadline. Entries disappear on confirmation or expiry.

use std::collections::HashMap;

use tokio::time::Instant;

#[derive(Debug, Default)]
pub struct ConfirmationTable {
    armed: HashMap<String, Instant>,
}

impl ConfirmationTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_armed(&self, action: &str) -> bool {
        self.armed.contains_key(action)
    }

    /// Arm `action` until `deadline`
    pub fn arm(&mut self, action: &str, deadline: Instant) {
        self.armed.insert(action.to_string(), deadline);
    }

    /// Disarm `action`, returning whether it was armed
    pub fn disarm(&mut self, action: &str) -> bool {
        self.armed.remove(action).is_some()
    }

    /// Earliest pending deadline
    pub fn next_deadline(&self) -> Option<Instant> {
        self.armed.values().min().copied()
    }

    /// Disarm and return every action whose deadline has passed
    pub fn expire(&mut self, now: Instant) -> Vec<String> {
        let expired: Vec<String> = self
            .armed
            .iter()
            .filter(|&(_, &deadline)| deadline <= now)
            .map(|(action, _)| action.clone())
            .collect();
        for action in &expired {
            self.armed.remove(action);
        }
        expired
    }

    pub fn is_empty(&self) -> bool {
        self.armed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_arm_and_disarm() {
        let mut table = ConfirmationTable::new();
        assert!(!table.is_armed("shutdown"));
        table.arm("shutdown", Instant::now() + Duration::from_secs(5));
        assert!(table.is_armed("shutdown"));
        assert!(table.disarm("shutdown"));
        assert!(!table.disarm("shutdown"));
        assert!(table.is_empty());
    }

    #[test]
    fn test_expire_only_due_entries() {
        let now = Instant::now();
        let mut table = ConfirmationTable::new();
        table.arm("shutdown", now + Duration::from_secs(5));
        table.arm("reboot", now + Duration::from_secs(8));
        assert_eq!(table.next_deadline(), Some(now + Duration::from_secs(5)));

        assert!(table.expire(now + Duration::from_secs(4)).is_empty());
        assert_eq!(table.expire(now + Duration::from_secs(5)), vec!["shutdown"]);
        assert!(table.is_armed("reboot"));
        assert_eq!(table.next_deadline(), Some(now + Duration::from_secs(8)));
    }
}
