use std::collections::HashMap;

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{ListContainersOptions, RemoveContainerOptions};
use bollard::errors::Error as BollardError;
use futures_util::future::try_join_all;
use tracing::{debug, info, warn};

use crate::models::{
    error_models::RuntimeError,
    session_models::{SESSION_CONTAINER_PREFIX, SessionContainer, SessionIdentity},
};

/// What the sweeper needs from the container runtime.
#[async_trait]
pub trait SessionRuntime: Send + Sync {
    /// Running IDE session containers.
    async fn list_sessions(&self) -> Result<Vec<SessionContainer>, RuntimeError>;

    /// Force-removes all `names`. Containers that are already gone count as removed.
    async fn remove_containers(&self, names: &[String]) -> Result<(), RuntimeError>;
}

pub struct DockerSessionRuntime {
    docker: Docker,
}

impl DockerSessionRuntime {
    pub fn connect() -> Result<Self, RuntimeError> {
        let docker = Docker::connect_with_local_defaults()?;
        info!("connected to docker for session containers");
        Ok(DockerSessionRuntime { docker })
    }
}

/// Keeps the containers whose names parse as session identities.
pub fn parse_session_names<'a>(names: impl IntoIterator<Item = &'a str>) -> Vec<SessionContainer> {
    names
        .into_iter()
        .filter_map(|raw| {
            let name = raw.trim_start_matches('/');
            match name.parse::<SessionIdentity>() {
                Ok(identity) => Some(SessionContainer {
                    name: name.to_string(),
                    identity,
                }),
                Err(err) => {
                    warn!(container = name, error = %err, "skipping unrecognised container");
                    None
                }
            }
        })
        .collect()
}

fn is_not_found(err: &BollardError) -> bool {
    matches!(
        err,
        BollardError::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

#[async_trait]
impl SessionRuntime for DockerSessionRuntime {
    async fn list_sessions(&self) -> Result<Vec<SessionContainer>, RuntimeError> {
        let filters = HashMap::from([(
            "name".to_string(),
            vec![format!("{SESSION_CONTAINER_PREFIX}-")],
        )]);
        let containers = self
            .docker
            .list_containers(Some(ListContainersOptions::<String> {
                all: false,
                filters,
                ..Default::default()
            }))
            .await?;

        // the name filter is a substring match, so parse every name
        let names: Vec<String> = containers
            .into_iter()
            .filter_map(|summary| summary.names)
            .filter_map(|names| names.into_iter().next())
            .filter(|name| {
                name.trim_start_matches('/')
                    .starts_with(SESSION_CONTAINER_PREFIX)
            })
            .collect();
        Ok(parse_session_names(names.iter().map(String::as_str)))
    }

    async fn remove_containers(&self, names: &[String]) -> Result<(), RuntimeError> {
        let removals = names.iter().map(|name| async move {
            let options = RemoveContainerOptions {
                force: true,
                ..Default::default()
            };
            match self.docker.remove_container(name, Some(options)).await {
                Ok(()) => Ok(()),
                Err(err) if is_not_found(&err) => {
                    debug!(container = %name, "container already removed");
                    Ok(())
                }
                Err(err) => Err(RuntimeError::Docker(err)),
            }
        });
        try_join_all(removals).await?;
        info!(count = names.len(), "removed session containers");
        Ok(())
    }
}
