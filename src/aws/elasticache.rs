/// ElastiCache cache subnet groups
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::client::{CloudFormationApi, ElastiCacheApi};
use super::cloudformation::CloudFormationStack;
use super::models::{CacheSubnetGroupRequest, CacheSubnetGroupState, Tag};
use crate::error::{Error, Result};
use crate::resource::{Lifecycle, Resource};

const RESOURCE_TYPE: &str = "CacheSubnetGroup";
const MAX_NAME_LEN: usize = 255;

/// Declared cache subnet group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheSubnetGroup {
    /// Group name, stored lowercase by ElastiCache
    pub name: String,

    /// Defaults to "Created for {name}"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Explicit VPC subnet IDs; take precedence over `vpc_stack`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet_ids: Option<Vec<String>>,

    /// Stack to take private subnets from when `subnet_ids` is not set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vpc_stack: Option<CloudFormationStack>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<Tag>,
}

impl CacheSubnetGroup {
    /// Build and validate a subnet group declaration
    pub fn new(name: impl Into<String>) -> CacheSubnetGroupBuilder {
        CacheSubnetGroupBuilder {
            group: CacheSubnetGroup {
                name: name.into(),
                description: None,
                subnet_ids: None,
                vpc_stack: None,
                tags: Vec::new(),
            },
        }
    }

    /// Subnet IDs for this call: explicit list, otherwise the stack's private subnets
    async fn resolve_subnet_ids<C>(&self, client: &C) -> Result<Vec<String>>
    where
        C: CloudFormationApi + ?Sized,
    {
        if let Some(ids) = &self.subnet_ids {
            return Ok(ids.clone());
        }
        match &self.vpc_stack {
            Some(stack) => {
                debug!("Getting private subnet_ids from vpc stack");
                let ids = stack.private_subnets(client).await?;
                if ids.is_empty() {
                    return Err(Error::missing(
                        "subnet_ids",
                        format!("stack {} exports no private subnets", stack.name),
                    ));
                }
                Ok(ids)
            }
            None => Err(Error::missing(
                "subnet_ids",
                "provide subnet_ids or a vpc_stack",
            )),
        }
    }

    async fn request<C>(&self, client: &C) -> Result<CacheSubnetGroupRequest>
    where
        C: CloudFormationApi + ?Sized,
    {
        Ok(CacheSubnetGroupRequest {
            name: self.name.clone(),
            description: self
                .description
                .clone()
                .unwrap_or_else(|| format!("Created for {}", self.name)),
            subnet_ids: self.resolve_subnet_ids(client).await?,
            tags: self.tags.clone(),
        })
    }
}

/// Builder returned by [`CacheSubnetGroup::new`]
pub struct CacheSubnetGroupBuilder {
    group: CacheSubnetGroup,
}

impl CacheSubnetGroupBuilder {
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.group.description = Some(description.into());
        self
    }

    pub fn subnet_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.group.subnet_ids = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    pub fn vpc_stack(mut self, stack: CloudFormationStack) -> Self {
        self.group.vpc_stack = Some(stack);
        self
    }

    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.group.tags.push(Tag {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    pub fn build(self) -> Result<CacheSubnetGroup> {
        self.group.validate()
    }
}

impl Resource for CacheSubnetGroup {
    type State = CacheSubnetGroupState;

    /// Validate the declaration and normalize the name to lowercase
    fn validate(mut self) -> Result<Self> {
        if self.name.is_empty() {
            return Err(Error::validation(RESOURCE_TYPE, "name cannot be empty"));
        }
        if self.name.len() > MAX_NAME_LEN {
            return Err(Error::validation(
                RESOURCE_TYPE,
                format!("name must be at most {} characters", MAX_NAME_LEN),
            ));
        }
        if !self
            .name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-')
        {
            return Err(Error::validation(
                RESOURCE_TYPE,
                format!(
                    "name '{}' may only contain alphanumeric characters or hyphens",
                    self.name
                ),
            ));
        }
        if self.subnet_ids.is_none() && self.vpc_stack.is_none() {
            return Err(Error::validation(
                RESOURCE_TYPE,
                "either subnet_ids or vpc_stack is required",
            ));
        }
        if matches!(&self.subnet_ids, Some(ids) if ids.is_empty()) {
            return Err(Error::validation(RESOURCE_TYPE, "subnet_ids cannot be empty"));
        }
        self.name = self.name.to_lowercase();
        Ok(self)
    }

    fn resource_type(&self) -> &'static str {
        RESOURCE_TYPE
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[async_trait]
impl<C> Lifecycle<C> for CacheSubnetGroup
where
    C: ElastiCacheApi + CloudFormationApi + ?Sized,
{
    async fn create(&self, client: &C) -> Result<CacheSubnetGroupState> {
        let request = self.request(client).await?;
        client.create_cache_subnet_group(&request).await
    }

    async fn read(&self, client: &C) -> Result<Option<CacheSubnetGroupState>> {
        let groups = client.describe_cache_subnet_groups(&self.name).await?;
        Ok(groups.into_iter().find(|g| g.name == self.name))
    }

    async fn update(&self, client: &C) -> Result<CacheSubnetGroupState> {
        let request = self.request(client).await?;
        client.modify_cache_subnet_group(&request).await
    }

    async fn delete(&self, client: &C) -> Result<()> {
        client.delete_cache_subnet_group(&self.name).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::Managed;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// ElastiCache + CloudFormation stand-in
    #[derive(Default)]
    struct MockAws {
        groups: Mutex<Vec<CacheSubnetGroupState>>,
        requests: Mutex<Vec<CacheSubnetGroupRequest>>,
        stack_lookups: AtomicUsize,
        fail_create: bool,
    }

    #[async_trait]
    impl ElastiCacheApi for MockAws {
        async fn create_cache_subnet_group(
            &self,
            request: &CacheSubnetGroupRequest,
        ) -> Result<CacheSubnetGroupState> {
            if self.fail_create {
                return Err(Error::provider("aws", "InvalidSubnet"));
            }
            self.requests.lock().unwrap().push(request.clone());
            let state = CacheSubnetGroupState {
                name: request.name.clone(),
                description: Some(request.description.clone()),
                vpc_id: Some("vpc-123".to_string()),
                subnet_ids: request.subnet_ids.clone(),
                arn: Some(format!("arn:aws:elasticache:::subnetgroup:{}", request.name)),
            };
            self.groups.lock().unwrap().push(state.clone());
            Ok(state)
        }

        async fn modify_cache_subnet_group(
            &self,
            request: &CacheSubnetGroupRequest,
        ) -> Result<CacheSubnetGroupState> {
            let mut groups = self.groups.lock().unwrap();
            let group = groups
                .iter_mut()
                .find(|g| g.name == request.name)
                .ok_or_else(|| Error::not_found(RESOURCE_TYPE, &request.name))?;
            group.description = Some(request.description.clone());
            group.subnet_ids = request.subnet_ids.clone();
            Ok(group.clone())
        }

        async fn describe_cache_subnet_groups(
            &self,
            name: &str,
        ) -> Result<Vec<CacheSubnetGroupState>> {
            let groups = self.groups.lock().unwrap().clone();
            if groups.is_empty() {
                return Err(Error::not_found(RESOURCE_TYPE, name));
            }
            Ok(groups)
        }

        async fn delete_cache_subnet_group(&self, name: &str) -> Result<()> {
            let mut groups = self.groups.lock().unwrap();
            let before = groups.len();
            groups.retain(|g| g.name != name);
            if groups.len() == before {
                return Err(Error::not_found(RESOURCE_TYPE, name));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl CloudFormationApi for MockAws {
        async fn stack_outputs(&self, _stack_name: &str) -> Result<BTreeMap<String, String>> {
            self.stack_lookups.fetch_add(1, Ordering::SeqCst);
            Ok([("PrivateSubnets".to_string(), "subnet-p1,subnet-p2".to_string())]
                .into_iter()
                .collect())
        }
    }

    fn state(name: &str) -> CacheSubnetGroupState {
        CacheSubnetGroupState {
            name: name.to_string(),
            description: None,
            vpc_id: None,
            subnet_ids: vec![],
            arn: None,
        }
    }

    #[test]
    fn test_missing_name_is_validation_error() {
        let result = CacheSubnetGroup::new("").subnet_ids(["a"]).build();
        assert!(matches!(result, Err(Error::Validation { .. })));
    }

    #[test]
    fn test_name_rules() {
        assert!(CacheSubnetGroup::new("redis_group")
            .subnet_ids(["a"])
            .build()
            .is_err());
        assert!(CacheSubnetGroup::new("x".repeat(256))
            .subnet_ids(["a"])
            .build()
            .is_err());

        let group = CacheSubnetGroup::new("Redis-Group")
            .subnet_ids(["a"])
            .build()
            .unwrap();
        assert_eq!(group.name, "redis-group");
    }

    #[test]
    fn test_subnets_or_stack_required() {
        let result = CacheSubnetGroup::new("redis").build();
        assert!(matches!(result, Err(Error::Validation { .. })));

        let empty: [&str; 0] = [];
        assert!(CacheSubnetGroup::new("redis").subnet_ids(empty).build().is_err());
    }

    #[tokio::test]
    async fn test_create_then_read_returns_created_group() {
        let aws = MockAws::default();
        let group = CacheSubnetGroup::new("redis")
            .subnet_ids(["subnet-a", "subnet-b"])
            .tag("env", "dev")
            .build()
            .unwrap();

        let mut managed = Managed::new(group.clone()).unwrap();
        assert!(managed.create(&aws).await.is_success());
        let created = managed.active().cloned();

        let mut fresh = Managed::new(group).unwrap();
        assert_eq!(fresh.read(&aws).await.cloned(), created);

        let requests = aws.requests.lock().unwrap();
        assert_eq!(requests[0].description, "Created for redis");
        assert_eq!(requests[0].tags.len(), 1);
    }

    #[tokio::test]
    async fn test_explicit_subnets_skip_stack_lookup() {
        let aws = MockAws::default();
        let group = CacheSubnetGroup::new("redis")
            .subnet_ids(["a", "b"])
            .vpc_stack(CloudFormationStack::new("vpc"))
            .build()
            .unwrap();

        Managed::new(group).unwrap().create(&aws).await;

        assert_eq!(aws.stack_lookups.load(Ordering::SeqCst), 0);
        assert_eq!(aws.requests.lock().unwrap()[0].subnet_ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_stack_subnets_looked_up_per_call() {
        let aws = MockAws::default();
        let group = CacheSubnetGroup::new("redis")
            .vpc_stack(CloudFormationStack::new("vpc"))
            .build()
            .unwrap();

        let mut managed = Managed::new(group).unwrap().with_use_cache(false);
        assert!(managed.create(&aws).await.is_success());
        assert!(managed.update(&aws).await.is_success());

        assert_eq!(aws.stack_lookups.load(Ordering::SeqCst), 2);
        assert_eq!(
            aws.requests.lock().unwrap()[0].subnet_ids,
            vec!["subnet-p1", "subnet-p2"]
        );
    }

    #[tokio::test]
    async fn test_read_scans_for_exact_name() {
        let aws = MockAws::default();
        aws.groups
            .lock()
            .unwrap()
            .extend([state("redis-prod"), state("redis"), state("redis-dev")]);

        let group = CacheSubnetGroup::new("redis").subnet_ids(["a"]).build().unwrap();
        let mut managed = Managed::new(group).unwrap();
        let found = managed.read(&aws).await.cloned().unwrap();
        assert_eq!(found.name, "redis");

        let other = CacheSubnetGroup::new("memcached")
            .subnet_ids(["a"])
            .build()
            .unwrap();
        assert!(Managed::new(other).unwrap().read(&aws).await.is_none());
    }

    #[tokio::test]
    async fn test_read_miss_is_none() {
        let aws = MockAws::default();
        let group = CacheSubnetGroup::new("redis").subnet_ids(["a"]).build().unwrap();
        let mut managed = Managed::new(group).unwrap();
        assert!(tokio_test::assert_ok!(managed.refresh(&aws).await).is_none());
    }

    #[tokio::test]
    async fn test_delete_never_created_reports_failure() {
        let aws = MockAws::default();
        let group = CacheSubnetGroup::new("redis").subnet_ids(["a"]).build().unwrap();
        let outcome = Managed::new(group).unwrap().delete(&aws).await;
        assert!(!outcome.is_success());
    }

    #[tokio::test]
    async fn test_create_failure_leaves_group_inactive() {
        let aws = MockAws {
            fail_create: true,
            ..Default::default()
        };
        let group = CacheSubnetGroup::new("redis").subnet_ids(["a"]).build().unwrap();
        let mut managed = Managed::new(group).unwrap();
        assert!(!managed.create(&aws).await.is_success());
        assert!(!managed.is_active());
    }
}
