use crate::error::ActionError;
use async_trait::async_trait;
use serde_json::Value;

/// One remote entity acted upon during a job (a contact, a content item, a
/// group), identified the way the remote service identifies it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub id: String,
}

impl Target {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// Thin contract for invoking one remote operation on behalf of an account.
///
/// Implementations wrap the social-network API's individual methods; this
/// core only depends on the error classification, which drives the job
/// executor's per-target failure policy.
#[async_trait]
pub trait RemoteActionClient: Send + Sync {
    async fn invoke(
        &self,
        account_id: i64,
        action: &str,
        target: &Target,
    ) -> Result<Value, ActionError>;
}
