//! Actions driving one container from record to running unit.

use super::RunContainerArgs;
use crate::container::{Container, ContainerStatus};
use crate::errors::Result;
use crate::pipeline::Action;
use crate::provision::CreateSpec;
use async_trait::async_trait;
use tracing::{debug, error};

/// Persists a fresh container record.
///
/// Deploy containers start in `building`, every other container in
/// `created`. The incoming value is ignored.
#[derive(Debug, Clone, Copy, Default)]
pub struct InsertContainer;

#[async_trait]
impl Action<RunContainerArgs, Container> for InsertContainer {
    fn name(&self) -> &str {
        "insert-empty-container"
    }

    async fn forward(&self, args: &RunContainerArgs, _previous: Container) -> Result<Container> {
        args.cancellation.check().await?;
        let status = if args.is_deploy {
            ContainerStatus::Building
        } else {
            ContainerStatus::Created
        };
        let mut container = Container::new(args.app.name(), &args.process_name).with_status(status);
        container.platform = args.app.platform().to_string();
        container.image.clone_from(&args.image);
        container.building_image.clone_from(&args.building_image);
        container.exposed_port.clone_from(&args.exposed_port);

        if let Err(err) = args.provisioner.store.insert(&container).await {
            error!(container = %container.name, error = %err, "error inserting container into store");
            return Err(err);
        }
        Ok(container)
    }

    async fn backward(&self, args: &RunContainerArgs, result: &Container) {
        if let Err(err) = args.provisioner.store.delete(&result.name).await {
            error!(container = %result.name, error = %err, "failed to delete container record");
        }
    }
}

/// Persists the whole in-memory record.
#[derive(Debug, Clone, Copy, Default)]
pub struct UpdateContainerInStore;

#[async_trait]
impl Action<RunContainerArgs, Container> for UpdateContainerInStore {
    fn name(&self) -> &str {
        "update-database-container"
    }

    async fn forward(&self, args: &RunContainerArgs, previous: Container) -> Result<Container> {
        args.cancellation.check().await?;
        if let Err(err) = args
            .provisioner
            .store
            .update(&previous.name, &previous)
            .await
        {
            error!(container = %previous.name, error = %err, "error updating container in store");
            return Err(err);
        }
        Ok(previous)
    }
}

/// Materializes the runtime container.
#[derive(Debug, Clone, Copy, Default)]
pub struct CreateContainer;

#[async_trait]
impl Action<RunContainerArgs, Container> for CreateContainer {
    fn name(&self) -> &str {
        "create-container"
    }

    async fn forward(&self, args: &RunContainerArgs, previous: Container) -> Result<Container> {
        args.cancellation.check().await?;
        let mut container = previous;
        let spec = CreateSpec {
            name: container.name.clone(),
            app_name: container.app_name.clone(),
            process_name: container.process_name.clone(),
            image: args.image.clone(),
            commands: args.commands.clone(),
            deploy: args.is_deploy,
            building: args.building_image.is_some(),
            destination_hosts: args.destination_hosts.clone(),
            exposed_port: args.exposed_port.clone(),
        };
        debug!(
            app = %spec.app_name,
            image = %spec.image,
            commands = ?spec.commands,
            "creating container"
        );
        match args.provisioner.runtime.create(&spec).await {
            Ok(id) => {
                container.id = id;
                Ok(container)
            }
            Err(err) => {
                error!(app = %spec.app_name, error = %err, "error creating container");
                Err(err)
            }
        }
    }

    async fn backward(&self, args: &RunContainerArgs, result: &Container) {
        if let Err(err) = args.provisioner.runtime.remove(&result.id).await {
            error!(container = %result.id, error = %err, "failed to remove the container");
        }
    }
}

/// Persists the runtime-assigned id against the record.
#[derive(Debug, Clone, Copy, Default)]
pub struct SetContainerId;

#[async_trait]
impl Action<RunContainerArgs, Container> for SetContainerId {
    fn name(&self) -> &str {
        "set-container-id"
    }

    async fn forward(&self, args: &RunContainerArgs, previous: Container) -> Result<Container> {
        args.cancellation.check().await?;
        if let Err(err) = args
            .provisioner
            .store
            .update(&previous.name, &previous)
            .await
        {
            error!(container = %previous.name, error = %err, "error setting container id");
            return Err(err);
        }
        Ok(previous)
    }
}

/// Records the container as stopped instead of starting it.
#[derive(Debug, Clone, Copy, Default)]
pub struct StopContainer;

#[async_trait]
impl Action<RunContainerArgs, Container> for StopContainer {
    fn name(&self) -> &str {
        "stop-container"
    }

    async fn forward(&self, args: &RunContainerArgs, previous: Container) -> Result<Container> {
        let mut container = previous;
        container.set_status(ContainerStatus::Stopped)?;
        args.provisioner
            .store
            .update(&container.name, &container)
            .await?;
        Ok(container)
    }

    async fn backward(&self, args: &RunContainerArgs, result: &Container) {
        let mut container = result.clone();
        if container.set_status(ContainerStatus::Created).is_err() {
            return;
        }
        if let Err(err) = args
            .provisioner
            .store
            .update(&container.name, &container)
            .await
        {
            error!(container = %container.name, error = %err, "failed to restore container status");
        }
    }
}

/// Records where the runtime attached the container.
#[derive(Debug, Clone, Copy, Default)]
pub struct SetNetworkInfo;

#[async_trait]
impl Action<RunContainerArgs, Container> for SetNetworkInfo {
    fn name(&self) -> &str {
        "set-network-info"
    }

    async fn forward(&self, args: &RunContainerArgs, previous: Container) -> Result<Container> {
        let mut container = previous;
        let info = args.provisioner.runtime.network_info(&container.id).await?;
        container.set_network_info(info);
        Ok(container)
    }
}

/// Starts the runtime container.
#[derive(Debug, Clone, Copy, Default)]
pub struct StartContainer;

#[async_trait]
impl Action<RunContainerArgs, Container> for StartContainer {
    fn name(&self) -> &str {
        "start-container"
    }

    async fn forward(&self, args: &RunContainerArgs, previous: Container) -> Result<Container> {
        args.cancellation.check().await?;
        let mut container = previous;
        debug!(container = %container.id, "starting container");
        if let Err(err) = args
            .provisioner
            .runtime
            .start(&container.id, args.is_deploy)
            .await
        {
            error!(container = %container.id, error = %err, "error starting container");
            return Err(err);
        }
        if !args.is_deploy {
            container.set_status(ContainerStatus::Started)?;
        }
        Ok(container)
    }

    async fn backward(&self, args: &RunContainerArgs, result: &Container) {
        let grace = args.provisioner.config.stop_grace_period_secs;
        if let Err(err) = args.provisioner.runtime.stop(&result.id, grace).await {
            error!(container = %result.id, error = %err, "failed to stop the container");
        }
    }
}
