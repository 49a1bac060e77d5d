// Root ownership state machine

use crate::relay::session::SessionId;

/// Who, if anyone, holds root
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootOwner {
    /// No login has succeeded since start
    Unassigned,
    Owned(SessionId),
    /// The holder left; root is not handed out automatically again
    Vacated,
}

/// Tracks the single root session
#[derive(Debug)]
pub struct PrivilegeManager {
    owner: RootOwner,
}

impl PrivilegeManager {
    pub fn new() -> Self {
        Self {
            owner: RootOwner::Unassigned,
        }
    }

    pub fn owner(&self) -> RootOwner {
        self.owner
    }

    /// Grant root to `id` if nobody has ever held it. Returns true when granted.
    pub fn assign_if_first(&mut self, id: SessionId) -> bool {
        if self.owner == RootOwner::Unassigned {
            self.owner = RootOwner::Owned(id);
            tracing::info!("Root assigned to session {}", id);
            true
        } else {
            false
        }
    }

    pub fn is_root(&self, id: SessionId) -> bool {
        self.owner == RootOwner::Owned(id)
    }

    pub fn can_kick(&self, id: SessionId) -> bool {
        self.is_root(id)
    }

    pub fn can_reassign_root(&self, id: SessionId) -> bool {
        self.is_root(id)
    }

    /// Hand root to an already resolved session
    pub fn transfer_to(&mut self, id: SessionId) {
        tracing::info!("Root transferred to session {}", id);
        self.owner = RootOwner::Owned(id);
    }

    /// Called whenever a session leaves. Returns true if it held root.
    pub fn release(&mut self, id: SessionId) -> bool {
        if self.is_root(id) {
            tracing::info!("Root holder {} left, root vacated", id);
            self.owner = RootOwner::Vacated;
            true
        } else {
            false
        }
    }
}

impl Default for PrivilegeManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_login_wins() {
        let mut privileges = PrivilegeManager::new();
        let a = SessionId::new();
        let b = SessionId::new();

        assert_eq!(privileges.owner(), RootOwner::Unassigned);
        assert!(privileges.assign_if_first(a));
        assert!(!privileges.assign_if_first(b));
        assert_eq!(privileges.owner(), RootOwner::Owned(a));
        assert!(privileges.can_kick(a));
        assert!(!privileges.can_kick(b));
    }

    #[test]
    fn test_transfer_moves_ownership() {
        let mut privileges = PrivilegeManager::new();
        let a = SessionId::new();
        let b = SessionId::new();
        privileges.assign_if_first(a);

        privileges.transfer_to(b);
        assert!(privileges.can_reassign_root(b));
        assert!(!privileges.is_root(a));
    }

    #[test]
    fn test_release_vacates_without_reassigning() {
        let mut privileges = PrivilegeManager::new();
        let a = SessionId::new();
        let b = SessionId::new();
        privileges.assign_if_first(a);

        assert!(!privileges.release(b));
        assert!(privileges.release(a));
        assert_eq!(privileges.owner(), RootOwner::Vacated);
        assert!(!privileges.assign_if_first(b));
    }
}
