use uuid::Uuid;

/// Who is asking: threaded through every mutating ledger call and stamped on the
/// audit records it produces
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerContext {
    pub request_id: Uuid,
    pub user_id: Option<String>,
    pub wallet_id: Option<String>,
}

impl CallerContext {
    pub fn new(user_id: Option<String>, wallet_id: Option<String>) -> CallerContext {
        CallerContext {
            request_id: Uuid::new_v4(),
            user_id,
            wallet_id,
        }
    }

    /// Scheduler jobs, the CLI and other ledger-internal callers
    pub fn system() -> CallerContext {
        CallerContext::new(None, None)
    }

    pub fn for_wallet(wallet_id: &str) -> CallerContext {
        CallerContext::new(None, Some(wallet_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_each_context_gets_a_request_id() {
        let a = CallerContext::for_wallet("w");
        let b = CallerContext::for_wallet("w");
        assert_ne!(a.request_id, b.request_id);
        assert_eq!(a.wallet_id.as_deref(), Some("w"));
        assert!(CallerContext::system().wallet_id.is_none());
    }
}
