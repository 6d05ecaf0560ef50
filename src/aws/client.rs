/// AWS API client and the capability traits resources are written against
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_cloudformation::Client as CloudFormationClient;
use aws_sdk_elasticache::Client as ElastiCacheClient;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use chrono::DateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use super::models::{CacheSubnetGroupRequest, CacheSubnetGroupState, ObjectSummary};
use crate::error::{Error, Result};

/// S3 accepts at most this many keys per DeleteObjects call
const DELETE_BATCH_SIZE: usize = 1000;

/// ElastiCache operations used by cache resources
#[async_trait]
pub trait ElastiCacheApi: Send + Sync {
    async fn create_cache_subnet_group(
        &self,
        request: &CacheSubnetGroupRequest,
    ) -> Result<CacheSubnetGroupState>;

    async fn modify_cache_subnet_group(
        &self,
        request: &CacheSubnetGroupRequest,
    ) -> Result<CacheSubnetGroupState>;

    /// Describe subnet groups; the provider may return more than the one asked for
    async fn describe_cache_subnet_groups(&self, name: &str) -> Result<Vec<CacheSubnetGroupState>>;

    async fn delete_cache_subnet_group(&self, name: &str) -> Result<()>;
}

/// CloudFormation lookups used to resolve references to other stacks
#[async_trait]
pub trait CloudFormationApi: Send + Sync {
    /// Stack outputs keyed by output name
    async fn stack_outputs(&self, stack_name: &str) -> Result<BTreeMap<String, String>>;
}

/// Object storage operations used by datasets
#[async_trait]
pub trait ObjectStoreApi: Send + Sync {
    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectSummary>>;

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<()>;

    async fn delete_objects(&self, bucket: &str, keys: &[String]) -> Result<()>;
}

/// AWS connection settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AwsConfig {
    /// AWS region (falls back to AWS_REGION / the default provider chain)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,

    /// Named profile from the shared credentials file
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
}

/// AWS API client shared by every AWS resource
#[derive(Clone)]
pub struct AwsApiClient {
    elasticache: ElastiCacheClient,
    cloudformation: CloudFormationClient,
    s3: S3Client,
}

impl AwsApiClient {
    /// Create a new AWS client from the default credential chain
    pub async fn new(config: &AwsConfig) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = &config.region {
            loader = loader.region(Region::new(region.clone()));
        }
        if let Some(profile) = &config.profile {
            loader = loader.profile_name(profile);
        }
        let sdk_config = loader.load().await;

        Self {
            elasticache: ElastiCacheClient::new(&sdk_config),
            cloudformation: CloudFormationClient::new(&sdk_config),
            s3: S3Client::new(&sdk_config),
        }
    }
}

fn cache_subnet_group_state(
    group: &aws_sdk_elasticache::types::CacheSubnetGroup,
) -> CacheSubnetGroupState {
    CacheSubnetGroupState {
        name: group.cache_subnet_group_name().unwrap_or_default().to_string(),
        description: group.cache_subnet_group_description().map(str::to_string),
        vpc_id: group.vpc_id().map(str::to_string),
        subnet_ids: group
            .subnets()
            .iter()
            .filter_map(|s| s.subnet_identifier().map(str::to_string))
            .collect(),
        arn: group.arn().map(str::to_string),
    }
}

fn elasticache_tags(request: &CacheSubnetGroupRequest) -> Option<Vec<aws_sdk_elasticache::types::Tag>> {
    if request.tags.is_empty() {
        return None;
    }
    Some(
        request
            .tags
            .iter()
            .map(|t| {
                aws_sdk_elasticache::types::Tag::builder()
                    .key(&t.key)
                    .value(&t.value)
                    .build()
            })
            .collect(),
    )
}

fn aws_error(err: impl std::error::Error) -> Error {
    Error::provider("aws", aws_sdk_s3::error::DisplayErrorContext(err).to_string())
}

#[async_trait]
impl ElastiCacheApi for AwsApiClient {
    async fn create_cache_subnet_group(
        &self,
        request: &CacheSubnetGroupRequest,
    ) -> Result<CacheSubnetGroupState> {
        let response = self
            .elasticache
            .create_cache_subnet_group()
            .cache_subnet_group_name(&request.name)
            .cache_subnet_group_description(&request.description)
            .set_subnet_ids(Some(request.subnet_ids.clone()))
            .set_tags(elasticache_tags(request))
            .send()
            .await
            .map_err(aws_error)?;
        debug!("create_response: {:?}", response);

        response
            .cache_subnet_group()
            .map(cache_subnet_group_state)
            .ok_or_else(|| Error::provider("aws", "CreateCacheSubnetGroup returned no group"))
    }

    async fn modify_cache_subnet_group(
        &self,
        request: &CacheSubnetGroupRequest,
    ) -> Result<CacheSubnetGroupState> {
        let response = self
            .elasticache
            .modify_cache_subnet_group()
            .cache_subnet_group_name(&request.name)
            .cache_subnet_group_description(&request.description)
            .set_subnet_ids(Some(request.subnet_ids.clone()))
            .send()
            .await
            .map_err(aws_error)?;
        debug!("modify_response: {:?}", response);

        response
            .cache_subnet_group()
            .map(cache_subnet_group_state)
            .ok_or_else(|| Error::provider("aws", "ModifyCacheSubnetGroup returned no group"))
    }

    async fn describe_cache_subnet_groups(&self, name: &str) -> Result<Vec<CacheSubnetGroupState>> {
        match self
            .elasticache
            .describe_cache_subnet_groups()
            .cache_subnet_group_name(name)
            .send()
            .await
        {
            Ok(response) => {
                debug!("describe_response: {:?}", response);
                Ok(response
                    .cache_subnet_groups()
                    .iter()
                    .map(cache_subnet_group_state)
                    .collect())
            }
            Err(err)
                if err
                    .as_service_error()
                    .is_some_and(|e| e.is_cache_subnet_group_not_found_fault()) =>
            {
                Err(Error::not_found("CacheSubnetGroup", name))
            }
            Err(err) => Err(aws_error(err)),
        }
    }

    async fn delete_cache_subnet_group(&self, name: &str) -> Result<()> {
        match self
            .elasticache
            .delete_cache_subnet_group()
            .cache_subnet_group_name(name)
            .send()
            .await
        {
            Ok(response) => {
                debug!("delete_response: {:?}", response);
                Ok(())
            }
            Err(err)
                if err
                    .as_service_error()
                    .is_some_and(|e| e.is_cache_subnet_group_not_found_fault()) =>
            {
                Err(Error::not_found("CacheSubnetGroup", name))
            }
            Err(err) => Err(aws_error(err)),
        }
    }
}

#[async_trait]
impl CloudFormationApi for AwsApiClient {
    async fn stack_outputs(&self, stack_name: &str) -> Result<BTreeMap<String, String>> {
        let response = self
            .cloudformation
            .describe_stacks()
            .stack_name(stack_name)
            .send()
            .await
            .map_err(aws_error)?;

        let stack = response
            .stacks()
            .first()
            .ok_or_else(|| Error::not_found("CloudFormationStack", stack_name))?;

        Ok(stack
            .outputs()
            .iter()
            .filter_map(|o| Some((o.output_key()?.to_string(), o.output_value()?.to_string())))
            .collect())
    }
}

#[async_trait]
impl ObjectStoreApi for AwsApiClient {
    async fn list_objects(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectSummary>> {
        let mut objects = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let response = self
                .s3
                .list_objects_v2()
                .bucket(bucket)
                .prefix(prefix)
                .set_continuation_token(continuation_token.take())
                .send()
                .await
                .map_err(aws_error)?;

            for object in response.contents() {
                objects.push(ObjectSummary {
                    key: object.key().unwrap_or_default().to_string(),
                    size: object.size().unwrap_or_default(),
                    last_modified: object
                        .last_modified()
                        .and_then(|t| DateTime::from_timestamp(t.secs(), t.subsec_nanos())),
                });
            }

            match response.next_continuation_token() {
                Some(token) => continuation_token = Some(token.to_string()),
                None => break,
            }
        }

        Ok(objects)
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<()> {
        self.s3
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(body))
            .content_type(content_type)
            .send()
            .await
            .map_err(aws_error)?;
        Ok(())
    }

    async fn delete_objects(&self, bucket: &str, keys: &[String]) -> Result<()> {
        use aws_sdk_s3::types::{Delete, ObjectIdentifier};

        for batch in keys.chunks(DELETE_BATCH_SIZE) {
            let objects = batch
                .iter()
                .map(|key| ObjectIdentifier::builder().key(key).build())
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(aws_error)?;
            let delete = Delete::builder()
                .set_objects(Some(objects))
                .quiet(true)
                .build()
                .map_err(aws_error)?;

            let response = self
                .s3
                .delete_objects()
                .bucket(bucket)
                .delete(delete)
                .send()
                .await
                .map_err(aws_error)?;
            check_delete_errors(bucket, response.errors())?;
        }
        Ok(())
    }
}

/// Per-key failures are reported in the body of a successful DeleteObjects call
fn check_delete_errors(bucket: &str, errors: &[aws_sdk_s3::types::Error]) -> Result<()> {
    if errors.is_empty() {
        return Ok(());
    }
    let failed = errors
        .iter()
        .map(|e| {
            format!(
                "{} ({})",
                e.key().unwrap_or("?"),
                e.code().or(e.message()).unwrap_or("unknown error")
            )
        })
        .collect::<Vec<_>>();
    Err(Error::provider(
        "aws",
        format!(
            "failed to delete {} object(s) in {}: {}",
            failed.len(),
            bucket,
            failed.join(", ")
        ),
    ))
}
