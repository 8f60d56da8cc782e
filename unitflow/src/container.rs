//! Containers backing application units.

use crate::errors::{ProvisionError, Result};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

const SHORT_ID_LEN: usize = 12;
const NAME_SUFFIX_LEN: usize = 10;

/// Lifecycle status of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerStatus {
    /// Record persisted, runtime container not started.
    #[default]
    Created,
    /// Build-time container producing a new image.
    Building,
    /// Container exists but is not running.
    Stopped,
    /// Container is running.
    Started,
    /// Container is in a failed state.
    Error,
}

impl ContainerStatus {
    /// Returns whether moving from `self` to `next` is allowed.
    ///
    /// `stopped -> created` is the compensation of a stop.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        use ContainerStatus::{Building, Created, Error, Started, Stopped};
        if self == next {
            return true;
        }
        match self {
            Created => matches!(next, Building | Stopped | Started | Error),
            Building => matches!(next, Started | Error),
            Stopped => matches!(next, Started | Created | Error),
            Started => matches!(next, Stopped | Error),
            Error => false,
        }
    }
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Building => write!(f, "building"),
            Self::Stopped => write!(f, "stopped"),
            Self::Started => write!(f, "started"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Network attachment reported by the runtime.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInfo {
    /// Address of the container host.
    pub ip: String,
    /// Host port mapped to the exposed port.
    pub host_port: String,
}

/// One container-runtime unit backing an application process.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    /// Runtime-assigned id, empty until created.
    #[serde(default)]
    pub id: String,
    /// Unique name, the persistence key.
    pub name: String,
    /// Owning application.
    pub app_name: String,
    /// Process this unit runs.
    pub process_name: String,
    /// Application platform.
    #[serde(default)]
    pub platform: String,
    /// Lifecycle status.
    #[serde(default)]
    pub status: ContainerStatus,
    /// Host address, empty until network info is known.
    #[serde(default)]
    pub ip: String,
    /// Host port, empty until network info is known.
    #[serde(default)]
    pub host_port: String,
    /// Whether a route was registered for this unit.
    #[serde(default)]
    pub routable: bool,
    /// Image the container runs.
    #[serde(default)]
    pub image: String,
    /// Image being produced; set only during a build.
    #[serde(default)]
    pub building_image: Option<String>,
    /// Port exposed by the process, if not the platform default.
    #[serde(default)]
    pub exposed_port: Option<String>,
}

impl Container {
    /// Creates a not-yet-persisted container for a process.
    #[must_use]
    pub fn new(app_name: impl Into<String>, process_name: impl Into<String>) -> Self {
        let app_name = app_name.into();
        Self {
            name: random_name(&app_name),
            app_name,
            process_name: process_name.into(),
            ..Self::default()
        }
    }

    /// Sets the status.
    #[must_use]
    pub fn with_status(mut self, status: ContainerStatus) -> Self {
        self.status = status;
        self
    }

    /// Returns the first characters of the runtime id.
    #[must_use]
    pub fn short_id(&self) -> &str {
        match self.id.char_indices().nth(SHORT_ID_LEN) {
            Some((idx, _)) => &self.id[..idx],
            None => &self.id,
        }
    }

    /// Returns whether the container can receive routed traffic.
    #[must_use]
    pub fn valid_addr(&self) -> bool {
        !self.ip.is_empty() && !self.host_port.is_empty() && self.host_port != "0"
    }

    /// Returns the routable address of the container.
    #[must_use]
    pub fn address(&self) -> String {
        format!("http://{}:{}", self.ip, self.host_port)
    }

    /// Records network information.
    pub fn set_network_info(&mut self, info: NetworkInfo) {
        self.ip = info.ip;
        self.host_port = info.host_port;
    }

    /// Moves the container to `next`, enforcing the state machine.
    pub fn set_status(&mut self, next: ContainerStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(ProvisionError::Internal(format!(
                "container {} cannot move from {} to {}",
                self.name, self.status, next
            )));
        }
        self.status = next;
        Ok(())
    }

    /// Describes the container as an application unit.
    #[must_use]
    pub fn as_unit(&self) -> Unit {
        Unit {
            id: self.id.clone(),
            name: self.name.clone(),
            app_name: self.app_name.clone(),
            process_name: self.process_name.clone(),
            ip: self.ip.clone(),
            address: self.valid_addr().then(|| self.address()),
            status: self.status,
        }
    }
}

/// An application's view of a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unit {
    /// Runtime id.
    pub id: String,
    /// Container name.
    pub name: String,
    /// Owning application.
    pub app_name: String,
    /// Process name.
    pub process_name: String,
    /// Host address.
    pub ip: String,
    /// Routable address, when known.
    pub address: Option<String>,
    /// Lifecycle status.
    pub status: ContainerStatus,
}

fn random_name(app_name: &str) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(NAME_SUFFIX_LEN)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect();
    format!("{app_name}-{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_container_name() {
        let c = Container::new("myapp", "web");
        assert!(c.name.starts_with("myapp-"));
        assert_eq!(c.name.len(), "myapp-".len() + NAME_SUFFIX_LEN);
        assert_eq!(c.status, ContainerStatus::Created);
        assert_ne!(c.name, Container::new("myapp", "web").name);
    }

    #[test]
    fn test_short_id() {
        let mut c = Container::new("myapp", "web");
        assert_eq!(c.short_id(), "");
        c.id = "abc".into();
        assert_eq!(c.short_id(), "abc");
        c.id = "0123456789abcdef".into();
        assert_eq!(c.short_id(), "0123456789ab");
    }

    #[test]
    fn test_valid_addr() {
        let mut c = Container::new("myapp", "web");
        assert!(!c.valid_addr());

        c.set_network_info(NetworkInfo {
            ip: "10.0.0.1".into(),
            host_port: "0".into(),
        });
        assert!(!c.valid_addr());

        c.host_port = "32768".into();
        assert!(c.valid_addr());
        assert_eq!(c.address(), "http://10.0.0.1:32768");
        assert_eq!(c.as_unit().address.as_deref(), Some("http://10.0.0.1:32768"));
    }

    #[test]
    fn test_state_machine() {
        use ContainerStatus::*;
        assert!(Created.can_transition_to(Building));
        assert!(Created.can_transition_to(Stopped));
        assert!(Created.can_transition_to(Started));
        assert!(Building.can_transition_to(Started));
        assert!(Stopped.can_transition_to(Started));
        assert!(Stopped.can_transition_to(Created));
        assert!(Started.can_transition_to(Error));

        assert!(!Started.can_transition_to(Created));
        assert!(!Building.can_transition_to(Stopped));
        assert!(!Error.can_transition_to(Started));
    }

    #[test]
    fn test_set_status_rejects_invalid_transition() {
        let mut c = Container::new("myapp", "web").with_status(ContainerStatus::Started);
        assert!(c.set_status(ContainerStatus::Created).is_err());
        assert_eq!(c.status, ContainerStatus::Started);
        assert!(c.set_status(ContainerStatus::Stopped).is_ok());
    }

    #[test]
    fn test_status_serde() {
        let json = serde_json::to_string(&ContainerStatus::Building).unwrap();
        assert_eq!(json, "\"building\"");
    }
}
