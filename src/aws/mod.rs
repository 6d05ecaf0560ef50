/// AWS resources: cache subnet groups, CloudFormation references and S3 datasets
pub mod client;
pub mod cloudformation;
pub mod elasticache;
pub mod models;
pub mod s3;

pub use client::{AwsApiClient, AwsConfig, CloudFormationApi, ElastiCacheApi, ObjectStoreApi};
pub use cloudformation::CloudFormationStack;
pub use elasticache::CacheSubnetGroup;
pub use s3::{S3CsvDataset, WriteMode};
