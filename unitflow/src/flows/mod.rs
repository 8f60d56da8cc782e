//! Pipeline builders for each provisioning flow.
//!
//! Every call returns a freshly built pipeline; actions are stateless, so
//! concurrent runs over disjoint containers share nothing.

#[cfg(test)]
mod scenario_tests;

use crate::actions::{
    AddNewRoutes, AddUnitsToHost, BindAndHealthcheck, ChangeUnitsArgs, CreateContainer,
    FollowLogsAndCommit, InsertContainer, RemoveOldRoutes, RemoveOldUnits, RunContainerArgs,
    SetContainerId, SetNetworkInfo, SetRouterHealthcheck, StartContainer, StopContainer,
    UnbindOldUnits, UnitChange, UpdateAppImage, UpdateContainerInStore,
};
use crate::container::Container;
use crate::errors::{ProvisionError, Result};
use crate::pipeline::Pipeline;
use tracing::info;

/// Builds the pipeline bringing one unit up.
///
/// With `stopped`, the unit is recorded as stopped instead of started.
#[must_use]
pub fn run_container_actions(stopped: bool) -> Pipeline<RunContainerArgs, Container> {
    let pipeline = Pipeline::new(if stopped {
        "run-stopped-container"
    } else {
        "run-container"
    })
    .then(InsertContainer)
    .then(CreateContainer)
    .then(SetContainerId);
    if stopped {
        pipeline.then(StopContainer).then(UpdateContainerInStore)
    } else {
        pipeline
            .then(StartContainer)
            .then(SetNetworkInfo)
            .then(UpdateContainerInStore)
    }
}

/// Builds the pipeline running a deploy container and committing its image.
#[must_use]
pub fn build_image_actions() -> Pipeline<RunContainerArgs, Container> {
    Pipeline::new("build-image")
        .then(InsertContainer)
        .then(CreateContainer)
        .then(SetContainerId)
        .then(StartContainer)
        .then(UpdateContainerInStore)
        .then(FollowLogsAndCommit)
}

/// Builds the pipeline replacing an application's units.
#[must_use]
pub fn change_units_actions() -> Pipeline<ChangeUnitsArgs, UnitChange> {
    Pipeline::new("change-units")
        .then(AddUnitsToHost)
        .then(BindAndHealthcheck)
        .then(AddNewRoutes)
        .then(SetRouterHealthcheck)
        .then(RemoveOldRoutes)
        .then(UpdateAppImage)
        .then(RemoveOldUnits)
        .then(UnbindOldUnits)
}

/// Builds the pipeline tearing down an application's units.
#[must_use]
pub fn destroy_units_actions() -> Pipeline<ChangeUnitsArgs, UnitChange> {
    Pipeline::new("destroy-units")
        .then(RemoveOldRoutes)
        .then(RemoveOldUnits)
        .then(UnbindOldUnits)
}

/// Brings one unit up.
pub async fn run_container(args: &RunContainerArgs, stopped: bool) -> Result<Container> {
    run_container_actions(stopped)
        .execute(args, Container::default())
        .await
}

/// Runs a build and returns the build container carrying the new image.
pub async fn build_image(args: &RunContainerArgs) -> Result<Container> {
    if !args.is_deploy || args.building_image.is_none() {
        return Err(ProvisionError::Config(
            "a build needs deploy arguments with a target image".to_string(),
        ));
    }
    let built = build_image_actions()
        .execute(args, Container::default())
        .await?;
    info!(app = %args.app.name(), image = %built.image, "image built");
    Ok(built)
}

/// Moves an application to a new generation of units.
///
/// Returns the new units.
pub async fn change_units(args: &ChangeUnitsArgs) -> Result<Vec<Container>> {
    let change = change_units_actions()
        .execute(args, UnitChange::default())
        .await?;
    info!(
        app = %args.app.name(),
        added = change.added.len(),
        removed = args.to_remove.len(),
        "units changed"
    );
    Ok(change.added)
}

/// Removes the units in `args.to_remove` as part of destroying the app.
pub async fn destroy_units(args: &ChangeUnitsArgs) -> Result<()> {
    let args = args.clone().for_app_destroy();
    destroy_units_actions()
        .execute(&args, UnitChange::default())
        .await?;
    Ok(())
}
