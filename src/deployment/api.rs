use super::state::{StackDescription, StackStatus};
use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct StackApiError(pub String);

/// Remote service creating stacks from templates.
#[async_trait]
pub trait StackApi: Send + Sync {
    /// Request creation of `stack_name` from `template_url`. Returns the
    /// provider's stack id once the request is accepted.
    async fn provision(
        &self,
        template_url: &str,
        stack_name: &str,
        params: &HashMap<String, String>,
    ) -> Result<String, StackApiError>;

    async fn status(&self, stack_name: &str) -> Result<StackStatus, StackApiError>;

    /// Outputs and resources of the stack, `None` when it does not exist.
    async fn describe(&self, stack_name: &str) -> Result<Option<StackDescription>, StackApiError>;

    /// Instance ids currently running in a server group.
    async fn group_instances(&self, group: &str) -> Result<Vec<String>, StackApiError>;
}
