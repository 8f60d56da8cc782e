//! Command lines for unit containers.
//!
//! Units either run the command the image declares for their process, or,
//! for legacy images declaring none, hand control to the unit agent.

use crate::config::ProvisionConfig;
use crate::errors::{ProvisionError, Result};
use crate::provision::{App, ImageService};

const UNIT_AGENT: &str = "tsuru_unit_agent";
const APP_TOKEN_ENV: &str = "TSURU_APP_TOKEN";
const APP_DIR_PREAMBLE: &str = "[ -d /home/application/current ] && cd /home/application/current; ";
const DEFAULT_PROCESS: &str = "web";

/// Returns the command line of a deploy container.
#[must_use]
pub fn deploy_cmds(app: &dyn App, config: &ProvisionConfig, params: &[&str]) -> Vec<String> {
    let mut deploy = vec![config.deploy_cmd.as_str()];
    deploy.extend_from_slice(params);
    let token = app.env(APP_TOKEN_ENV).unwrap_or_default();
    let agent = [
        UNIT_AGENT,
        config.host.as_str(),
        token.as_str(),
        app.name(),
        format!("\"{}\"", deploy.join(" ")).as_str(),
        "deploy",
    ]
    .join(" ");
    vec!["/bin/sh".to_string(), "-lc".to_string(), agent]
}

/// Returns the command line of a deploy from an archive URL.
#[must_use]
pub fn archive_deploy_cmds(app: &dyn App, config: &ProvisionConfig, archive_url: &str) -> Vec<String> {
    deploy_cmds(app, config, &["archive", archive_url])
}

/// Legacy units hand their process over to the unit agent.
fn run_with_agent_cmds(app: &dyn App, config: &ProvisionConfig) -> Result<Vec<String>> {
    let run_cmd = config
        .run_cmd
        .as_deref()
        .ok_or_else(|| ProvisionError::Config("run_cmd is not configured".to_string()))?;
    let token = app.env(APP_TOKEN_ENV).unwrap_or_default();
    Ok(vec![
        UNIT_AGENT.to_string(),
        config.host.clone(),
        token,
        app.name().to_string(),
        run_cmd.to_string(),
    ])
}

/// Resolves the command of `process_name` in `image`.
///
/// An empty name selects the image's only process. Returns the command and
/// the resolved process name, both empty when the image declares no
/// processes.
pub async fn process_cmd_for_image(
    images: &dyn ImageService,
    process_name: &str,
    image: &str,
) -> Result<(String, String)> {
    let data = images.custom_data(image).await?;
    let name = if process_name.is_empty() {
        let mut names = data.processes.keys();
        match (names.next(), names.next()) {
            (None, _) => return Ok((String::new(), String::new())),
            (Some(only), None) => only.clone(),
            (Some(_), Some(_)) => {
                return Err(ProvisionError::InvalidProcess(
                    "no process name specified and more than one declared in Procfile".to_string(),
                ))
            }
        }
    } else {
        process_name.to_string()
    };
    match data.processes.get(&name) {
        Some(cmd) if !cmd.is_empty() => Ok((cmd.clone(), name)),
        _ => Err(ProvisionError::InvalidProcess(format!(
            "no command declared in Procfile for process \"{name}\""
        ))),
    }
}

/// Returns the command line of a unit and the process it runs.
pub async fn lean_container_cmds(
    images: &dyn ImageService,
    config: &ProvisionConfig,
    app: &dyn App,
    process_name: &str,
    image: &str,
) -> Result<(Vec<String>, String)> {
    lean_container_cmds_with_extra(images, config, app, process_name, image, &[]).await
}

/// Like [`lean_container_cmds`], running `extra` before the restart hooks.
pub async fn lean_container_cmds_with_extra(
    images: &dyn ImageService,
    config: &ProvisionConfig,
    app: &dyn App,
    process_name: &str,
    image: &str,
    extra: &[String],
) -> Result<(Vec<String>, String)> {
    let (cmd, name) = process_cmd_for_image(images, process_name, image).await?;
    if cmd.is_empty() {
        return Ok((run_with_agent_cmds(app, config)?, String::new()));
    }

    let manifest = images.manifest(image).await?;
    let mut before: Vec<&str> = extra.iter().map(String::as_str).collect();
    before.extend(manifest.hooks.restart.before.iter().map(String::as_str));
    let mut before = before.join(" && ");
    if !before.is_empty() {
        before.push_str(" && ");
    }
    let name = if name.is_empty() {
        DEFAULT_PROCESS.to_string()
    } else {
        name
    };
    Ok((
        vec![
            "/bin/sh".to_string(),
            "-lc".to_string(),
            format!("{APP_DIR_PREAMBLE}{before}exec {cmd}"),
        ],
        name,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provision::{AppManifest, ImageMetadata};
    use crate::testing::{FakeApp, FakeImages};
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;

    fn processes(entries: &[(&str, &str)]) -> ImageMetadata {
        ImageMetadata {
            processes: entries
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    fn config() -> ProvisionConfig {
        ProvisionConfig::default()
            .with_host("http://tsuru.example.com")
            .with_run_cmd("/usr/local/bin/circusd")
    }

    #[test]
    fn test_deploy_cmds() {
        let app = FakeApp::new("myapp");
        let cmds = archive_deploy_cmds(&app, &config(), "https://s3/archive.tar.gz");

        assert_eq!(
            cmds,
            vec![
                "/bin/sh".to_string(),
                "-lc".to_string(),
                "tsuru_unit_agent http://tsuru.example.com app-token myapp \
                 \"/var/lib/tsuru/deploy archive https://s3/archive.tar.gz\" deploy"
                    .to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_process_cmd_single_process_is_selected() {
        let images = FakeImages::new();
        images.set_custom_data("img", processes(&[("worker", "python worker.py")]));

        let (cmd, name) = process_cmd_for_image(&images, "", "img").await.unwrap();

        assert_eq!(cmd, "python worker.py");
        assert_eq!(name, "worker");
    }

    #[tokio::test]
    async fn test_process_cmd_ambiguous_process() {
        let images = FakeImages::new();
        images.set_custom_data("img", processes(&[("web", "gunicorn"), ("worker", "celery")]));

        let err = process_cmd_for_image(&images, "", "img").await.unwrap_err();

        assert_eq!(
            err.to_string(),
            "invalid process: no process name specified and more than one declared in Procfile"
        );
    }

    #[tokio::test]
    async fn test_process_cmd_unknown_process() {
        let images = FakeImages::new();
        images.set_custom_data("img", processes(&[("web", "gunicorn")]));

        let err = process_cmd_for_image(&images, "clock", "img").await.unwrap_err();

        assert!(matches!(err, ProvisionError::InvalidProcess(msg) if msg.contains("\"clock\"")));
    }

    #[tokio::test]
    async fn test_lean_cmds_prefix_restart_hooks() {
        let images = FakeImages::new();
        images.set_custom_data("img", processes(&[("web", "gunicorn app:app")]));
        let mut manifest = AppManifest::default();
        manifest.hooks.restart.before = vec!["migrate".into(), "collectstatic".into()];
        images.set_manifest("img", manifest);
        let app = FakeApp::new("myapp");

        let (cmds, name) =
            lean_container_cmds_with_extra(&images, &config(), &app, "web", "img", &["echo hi".into()])
                .await
                .unwrap();

        assert_eq!(name, "web");
        assert_eq!(
            cmds[2],
            "[ -d /home/application/current ] && cd /home/application/current; \
             echo hi && migrate && collectstatic && exec gunicorn app:app"
        );
    }

    #[tokio::test]
    async fn test_lean_cmds_legacy_image_uses_unit_agent() {
        let images = FakeImages::new();
        images.set_custom_data("img", ImageMetadata::default());
        let app = FakeApp::new("myapp");

        let (cmds, name) = lean_container_cmds(&images, &config(), &app, "", "img")
            .await
            .unwrap();

        assert_eq!(name, "");
        assert_eq!(
            cmds,
            vec![
                "tsuru_unit_agent",
                "http://tsuru.example.com",
                "app-token",
                "myapp",
                "/usr/local/bin/circusd"
            ]
        );
    }

    #[tokio::test]
    async fn test_lean_cmds_legacy_image_requires_run_cmd() {
        let images = FakeImages::new();
        images.set_custom_data("img", ImageMetadata::default());
        let app = FakeApp::new("myapp");

        let err = lean_container_cmds(&images, &ProvisionConfig::default(), &app, "", "img")
            .await
            .unwrap_err();

        assert!(matches!(err, ProvisionError::Config(_)));
    }
}
