/// Docker containers and the docker CLI client
pub mod client;
pub mod container;

pub use client::{DockerApi, DockerCliClient, DockerConfig};
pub use container::{ContainerState, DockerContainer, HostPort};
