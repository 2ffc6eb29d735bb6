// ABOUTME: Engine-independent description of a container to create.
// ABOUTME: Builder with volume attach/detach and deep, independent cloning.

use serde::Deserialize;
use std::collections::BTreeMap;
use thiserror::Error;

/// Tag used when none is given.
pub const DEFAULT_TAG: &str = "latest";

/// Mount mode used when none is given (SELinux private relabel).
pub const DEFAULT_VOLUME_MODE: &str = "Z";

/// Caller-side mistakes in a [`ContainerSpec`].
#[derive(Debug, Error)]
pub enum SpecError {
    #[error("image name cannot be empty")]
    EmptyImage,

    #[error("image tag cannot be empty")]
    EmptyTag,

    #[error("no volume attached at host path: {0}")]
    VolumeNotAttached(String),

    #[error("invalid port mapping: {0}")]
    InvalidPort(String),

    #[error("invalid volume mapping: {0}")]
    InvalidVolume(String),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Where a host path is mounted inside the container, and how.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct VolumeBinding {
    pub bind: String,
    #[serde(default = "default_mode")]
    pub mode: String,
}

impl VolumeBinding {
    pub fn new(bind: impl Into<String>, mode: Option<&str>) -> Self {
        Self {
            bind: bind.into(),
            mode: mode.unwrap_or(DEFAULT_VOLUME_MODE).to_string(),
        }
    }
}

fn default_mode() -> String {
    DEFAULT_VOLUME_MODE.to_string()
}

fn default_tag() -> String {
    DEFAULT_TAG.to_string()
}

fn default_detached() -> bool {
    true
}

/// Desired container, independent of any engine.
///
/// Ports are keyed by container port and valued by host port. Volumes are
/// keyed by host path. Maps are ordered so that the arguments an engine
/// receives are the same from run to run.
///
/// ```
/// use berth::spec::ContainerSpec;
///
/// let mut spec = ContainerSpec::new("busybox")
///     .with_tag("1.36")
///     .with_port("80", "8080")
///     .with_command(["sleep", "30"]);
/// spec.attach_volume("/srv/data", "/data", None);
///
/// assert_eq!(spec.image_repotag(), "busybox:1.36");
/// assert_eq!(spec.volumes()["/srv/data"].mode, "Z");
/// ```
#[derive(Debug, PartialEq, Eq, Deserialize)]
pub struct ContainerSpec {
    image: String,
    #[serde(default = "default_tag")]
    tag: String,
    #[serde(default)]
    environment: BTreeMap<String, String>,
    #[serde(default)]
    ports: BTreeMap<String, String>,
    #[serde(default)]
    volumes: BTreeMap<String, VolumeBinding>,
    #[serde(default)]
    entrypoint: Option<String>,
    #[serde(default)]
    command: Vec<String>,
    #[serde(default = "default_detached")]
    detached: bool,
}

impl ContainerSpec {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            tag: default_tag(),
            environment: BTreeMap::new(),
            ports: BTreeMap::new(),
            volumes: BTreeMap::new(),
            entrypoint: None,
            command: Vec::new(),
            detached: true,
        }
    }

    /// Parse a spec from YAML. Omitted fields take the same defaults as
    /// [`ContainerSpec::new`].
    pub fn from_yaml(yaml: &str) -> Result<Self, SpecError> {
        let spec: Self = serde_yaml::from_str(yaml)?;
        spec.validate()?;
        Ok(spec)
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(key.into(), value.into());
        self
    }

    /// Publish `container_port` on `host_port`.
    pub fn with_port(
        mut self,
        container_port: impl Into<String>,
        host_port: impl Into<String>,
    ) -> Self {
        self.ports.insert(container_port.into(), host_port.into());
        self
    }

    pub fn with_volume(
        mut self,
        host_path: impl Into<String>,
        container_path: impl Into<String>,
        mode: Option<&str>,
    ) -> Self {
        self.attach_volume(host_path, container_path, mode);
        self
    }

    pub fn with_entrypoint(mut self, entrypoint: impl Into<String>) -> Self {
        self.entrypoint = Some(entrypoint.into());
        self
    }

    pub fn with_command<I, S>(mut self, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command = command.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_detached(mut self, detached: bool) -> Self {
        self.detached = detached;
        self
    }

    pub fn set_tag(&mut self, tag: impl Into<String>) {
        self.tag = tag.into();
    }

    /// Mount `host_path` at `container_path`, replacing any existing
    /// binding for the same host path.
    pub fn attach_volume(
        &mut self,
        host_path: impl Into<String>,
        container_path: impl Into<String>,
        mode: Option<&str>,
    ) {
        self.volumes
            .insert(host_path.into(), VolumeBinding::new(container_path, mode));
    }

    /// Remove the binding for `host_path`, returning it.
    pub fn detach_volume(&mut self, host_path: &str) -> Result<VolumeBinding, SpecError> {
        self.volumes
            .remove(host_path)
            .ok_or_else(|| SpecError::VolumeNotAttached(host_path.to_string()))
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// The pull reference, `{image}:{tag}`.
    pub fn image_repotag(&self) -> String {
        format!("{}:{}", self.image, self.tag)
    }

    pub fn environment(&self) -> &BTreeMap<String, String> {
        &self.environment
    }

    pub fn environment_mut(&mut self) -> &mut BTreeMap<String, String> {
        &mut self.environment
    }

    pub fn ports(&self) -> &BTreeMap<String, String> {
        &self.ports
    }

    pub fn ports_mut(&mut self) -> &mut BTreeMap<String, String> {
        &mut self.ports
    }

    pub fn volumes(&self) -> &BTreeMap<String, VolumeBinding> {
        &self.volumes
    }

    pub fn entrypoint(&self) -> Option<&str> {
        self.entrypoint.as_deref()
    }

    pub fn command(&self) -> &[String] {
        &self.command
    }

    pub fn command_mut(&mut self) -> &mut Vec<String> {
        &mut self.command
    }

    pub fn is_detached(&self) -> bool {
        self.detached
    }

    /// Check the fields every engine needs before it is contacted.
    pub fn validate(&self) -> Result<(), SpecError> {
        if self.image.trim().is_empty() {
            return Err(SpecError::EmptyImage);
        }
        if self.tag.trim().is_empty() {
            return Err(SpecError::EmptyTag);
        }
        for (container_port, host_port) in &self.ports {
            check_container_port(container_port)?;
            check_host_port(host_port)?;
        }
        for (host_path, binding) in &self.volumes {
            check_volume(host_path, binding)?;
        }
        Ok(())
    }
}

const PROTOCOLS: [&str; 3] = ["tcp", "udp", "sctp"];

/// `80` or `80/udp`.
fn check_container_port(key: &str) -> Result<(), SpecError> {
    let (port, protocol) = key.split_once('/').unwrap_or((key, "tcp"));
    let valid = matches!(port.parse::<u16>(), Ok(p) if p > 0) && PROTOCOLS.contains(&protocol);
    if valid {
        Ok(())
    } else {
        Err(SpecError::InvalidPort(key.to_string()))
    }
}

/// `8080`, `127.0.0.1:8080`, or an empty port for one the engine picks.
fn check_host_port(value: &str) -> Result<(), SpecError> {
    let (ip, port) = match value.rsplit_once(':') {
        Some((ip, port)) => (Some(ip), port),
        None => (None, value),
    };
    let ip_ok = ip.is_none_or(|ip| !ip.is_empty() && !ip.contains(':'));
    let port_ok = port.is_empty() || port.parse::<u16>().is_ok();
    if ip_ok && port_ok {
        Ok(())
    } else {
        Err(SpecError::InvalidPort(value.to_string()))
    }
}

/// Both engines split mount arguments on `:`, so no part may contain one.
fn check_volume(host_path: &str, binding: &VolumeBinding) -> Result<(), SpecError> {
    let valid = !host_path.is_empty()
        && !host_path.contains(':')
        && binding.bind.starts_with('/')
        && !binding.bind.contains(':')
        && !binding.mode.contains(':');
    if valid {
        Ok(())
    } else {
        Err(SpecError::InvalidVolume(format!(
            "{}:{}:{}",
            host_path, binding.bind, binding.mode
        )))
    }
}

impl Clone for ContainerSpec {
    fn clone(&self) -> Self {
        Self {
            image: self.image.clone(),
            tag: self.tag.clone(),
            environment: self.environment.clone(),
            ports: self.ports.clone(),
            volumes: self
                .volumes
                .iter()
                .map(|(host, binding)| (host.clone(), binding.clone()))
                .collect(),
            entrypoint: self.entrypoint.clone(),
            command: self.command.clone(),
            detached: self.detached,
        }
    }
}
