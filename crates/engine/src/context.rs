//! Per-request session context

use doctx_core::classes::ACCOUNT_SYSTEM;
use doctx_core::{Account, Ref};

/// Who is calling and how deep in trigger fan-out the call is
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    /// Calling account
    pub account: Ref<Account>,
    /// Connection session id
    pub session_id: String,
    /// 0 for client requests, n for the n-th round of trigger output
    pub derived_depth: usize,
}

impl SessionContext {
    /// New session for `account`
    pub fn new(account: Ref<Account>) -> Self {
        SessionContext {
            account,
            session_id: uuid::Uuid::new_v4().simple().to_string(),
            derived_depth: 0,
        }
    }

    /// Session of the system account
    pub fn system() -> Self {
        Self::new(ACCOUNT_SYSTEM)
    }

    /// True for the system account, which bypasses space security
    pub fn is_system(&self) -> bool {
        self.account == ACCOUNT_SYSTEM
    }

    /// Context for re-submitting trigger output: system account, one level
    /// deeper, same session
    pub fn derived(&self) -> Self {
        SessionContext {
            account: ACCOUNT_SYSTEM,
            session_id: self.session_id.clone(),
            derived_depth: self.derived_depth + 1,
        }
    }
}
