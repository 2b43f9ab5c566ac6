use crate::error::ActionError;
use crate::remote::{RemoteActionClient, Target};
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// One registered automation operation: knows how to resolve the concrete
/// target list for a job's parameters, which quota bucket its actions count
/// against, and how to perform the remote call for one target.
///
/// The core is polymorphic over this trait and never hard-codes operation
/// kinds beyond dispatch.
#[async_trait]
pub trait Operation: Send + Sync {
    /// Operation kind used for dispatch (e.g. "like_feed", "mass_message").
    fn kind(&self) -> &str;

    /// Quota action kind this operation consumes (e.g. "like", "message").
    fn action_kind(&self) -> &str;

    /// Resolve the ordered list of targets for this job.
    async fn resolve_targets(&self, account_id: i64, params: &Value) -> Result<Vec<Target>>;

    /// Act on a single target through the remote action client.
    async fn perform(&self, account_id: i64, target: &Target) -> Result<Value, ActionError>;
}

/// Injected mapping from operation kind to its implementation.
pub struct OperationRegistry {
    ops: HashMap<String, Arc<dyn Operation>>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self {
            ops: HashMap::new(),
        }
    }

    pub fn register(&mut self, op: Arc<dyn Operation>) {
        self.ops.insert(op.kind().to_string(), op);
    }

    pub fn get(&self, kind: &str) -> Option<Arc<dyn Operation>> {
        self.ops.get(kind).cloned()
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.ops.contains_key(kind)
    }

    pub fn kinds(&self) -> Vec<String> {
        self.ops.keys().cloned().collect()
    }
}

impl Default for OperationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolves the target list for one operation kind. Split from the action so
/// listing (feed scan, dialog fetch) and acting can come from different
/// remote surfaces.
#[async_trait]
pub trait TargetResolver: Send + Sync {
    async fn resolve(&self, account_id: i64, params: &Value) -> Result<Vec<Target>>;
}

/// Standard operation shape: resolve targets through a [`TargetResolver`],
/// act on each through a [`RemoteActionClient`]. Most operation kinds are an
/// instance of this rather than a bespoke [`Operation`] impl.
pub struct ClientOperation {
    kind: String,
    action_kind: String,
    resolver: Arc<dyn TargetResolver>,
    client: Arc<dyn RemoteActionClient>,
}

impl ClientOperation {
    pub fn new(
        kind: impl Into<String>,
        action_kind: impl Into<String>,
        resolver: Arc<dyn TargetResolver>,
        client: Arc<dyn RemoteActionClient>,
    ) -> Self {
        Self {
            kind: kind.into(),
            action_kind: action_kind.into(),
            resolver,
            client,
        }
    }
}

#[async_trait]
impl Operation for ClientOperation {
    fn kind(&self) -> &str {
        &self.kind
    }

    fn action_kind(&self) -> &str {
        &self.action_kind
    }

    async fn resolve_targets(&self, account_id: i64, params: &Value) -> Result<Vec<Target>> {
        self.resolver.resolve(account_id, params).await
    }

    async fn perform(&self, account_id: i64, target: &Target) -> Result<Value, ActionError> {
        self.client.invoke(account_id, &self.action_kind, target).await
    }
}
