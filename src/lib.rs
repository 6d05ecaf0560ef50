/// Berth - declarative infrastructure resources
///
/// Resource wrappers for AWS (ElastiCache, CloudFormation, S3), Kubernetes and
/// Docker with a shared create/read/update/delete lifecycle.
pub mod app;
pub mod assistant;
pub mod aws;
pub mod config;
pub mod docker;
pub mod error;
pub mod k8s;
pub mod resource;
pub mod utils;

pub use error::{Error, Result};
pub use resource::{Lifecycle, Managed, Outcome, Resource};
