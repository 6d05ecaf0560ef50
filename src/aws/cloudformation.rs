/// References to CloudFormation stacks owned by other tooling
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::client::CloudFormationApi;
use crate::error::Result;

/// A VPC stack whose outputs list subnet IDs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudFormationStack {
    pub name: String,
}

impl CloudFormationStack {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Private subnet IDs exported by the stack
    ///
    /// Reads outputs whose key contains `PrivateSubnet` (e.g. `PrivateSubnets`,
    /// `PrivateSubnet01`); values may be comma-separated lists. The lookup is
    /// made on every call.
    pub async fn private_subnets<C>(&self, client: &C) -> Result<Vec<String>>
    where
        C: CloudFormationApi + ?Sized,
    {
        debug!("Getting private subnets from stack: {}", self.name);
        let outputs = client.stack_outputs(&self.name).await?;

        let mut subnets: Vec<String> = Vec::new();
        for (key, value) in &outputs {
            if !key.to_lowercase().contains("privatesubnet") {
                continue;
            }
            for id in value.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                if !subnets.iter().any(|s| s == id) {
                    subnets.push(id.to_string());
                }
            }
        }

        debug!("Private subnets: {:?}", subnets);
        Ok(subnets)
    }
}
