/// Kubernetes manifests and the kubectl-backed client
pub mod client;
pub mod manifest;
pub mod object;

pub use client::{KubeApi, KubeConfig, KubectlClient, ObjectRef};
pub use object::K8sObject;
