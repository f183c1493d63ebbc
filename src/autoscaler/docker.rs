use std::collections::HashMap;

use async_trait::async_trait;
use bollard::models::{ContainerCreateBody, HostConfig};
use bollard::query_parameters::{
    CreateContainerOptions, ListContainersOptionsBuilder, StartContainerOptions,
    StopContainerOptionsBuilder,
};
use bollard::Docker;

use crate::autoscaler::Scaler;
use crate::error::Result;

const LABEL_KEY: &str = "jobplane";
const LABEL_VALUE: &str = "worker";
const STOP_GRACE_SECS: i32 = 10;

/// Docker-backed scaler. Worker containers carry the `jobplane=worker` label
/// so listing sees only containers this control plane started.
pub struct DockerScaler {
    client: Docker,
    image: String,
    api_url: String,
    worker_endpoint: String,
    execution_binary: String,
}

impl DockerScaler {
    pub fn new(image: String) -> Result<Self> {
        let client = Docker::connect_with_local_defaults()?;
        Ok(Self {
            client,
            image,
            api_url: "http://host.docker.internal:8080".to_string(),
            worker_endpoint: "http://container:9090".to_string(),
            execution_binary: "/app/runner".to_string(),
        })
    }
}

#[async_trait]
impl Scaler for DockerScaler {
    async fn start_worker(&self) -> Result<String> {
        let body = ContainerCreateBody {
            image: Some(self.image.clone()),
            env: Some(vec![
                format!("API_URL={}", self.api_url),
                format!("WORKER_ENDPOINT={}", self.worker_endpoint),
                format!("EXECUTION_BINARY={}", self.execution_binary),
            ]),
            labels: Some(HashMap::from([(
                LABEL_KEY.to_string(),
                LABEL_VALUE.to_string(),
            )])),
            host_config: Some(HostConfig {
                auto_remove: Some(true),
                ..Default::default()
            }),
            ..Default::default()
        };

        let created = self
            .client
            .create_container(None::<CreateContainerOptions>, body)
            .await?;
        self.client
            .start_container(&created.id, None::<StartContainerOptions>)
            .await?;
        Ok(created.id)
    }

    async fn stop_worker(&self, container_id: &str) -> Result<()> {
        let options = StopContainerOptionsBuilder::default()
            .t(STOP_GRACE_SECS)
            .build();
        self.client
            .stop_container(container_id, Some(options))
            .await?;
        Ok(())
    }

    async fn worker_container_ids(&self) -> Result<Vec<String>> {
        let filters = HashMap::from([(
            "label".to_string(),
            vec![format!("{LABEL_KEY}={LABEL_VALUE}")],
        )]);
        let options = ListContainersOptionsBuilder::default()
            .filters(&filters)
            .build();
        let containers = self.client.list_containers(Some(options)).await?;
        Ok(containers.into_iter().filter_map(|c| c.id).collect())
    }
}
