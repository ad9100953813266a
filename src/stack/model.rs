//! Typed, normalized stack manifest
//!
//! A [`Manifest`] is produced once by the resolver and is read-only from then
//! on: it only hands out shared references to its contents.

use indexmap::{IndexMap, IndexSet};
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Validated deployment manifest
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Manifest {
    #[serde(skip_serializing_if = "Option::is_none")]
    version: Option<String>,
    services: IndexMap<String, ServiceSpec>,
    networks: IndexMap<String, NetworkSpec>,
    volumes: IndexMap<String, VolumeSpec>,
}

impl Manifest {
    pub(crate) fn new(
        version: Option<String>,
        services: IndexMap<String, ServiceSpec>,
        networks: IndexMap<String, NetworkSpec>,
        volumes: IndexMap<String, VolumeSpec>,
    ) -> Self {
        Self {
            version,
            services,
            networks,
            volumes,
        }
    }

    /// Declared file format version
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Services in declaration order
    pub fn services(&self) -> &IndexMap<String, ServiceSpec> {
        &self.services
    }

    pub fn service(&self, name: &str) -> Option<&ServiceSpec> {
        self.services.get(name)
    }

    pub fn networks(&self) -> &IndexMap<String, NetworkSpec> {
        &self.networks
    }

    pub fn volumes(&self) -> &IndexMap<String, VolumeSpec> {
        &self.volumes
    }

    /// Service names ordered so that every service comes after its dependencies
    pub fn start_order(&self) -> Vec<String> {
        dependency_order(&self.services).0
    }
}

/// One service entry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceSpec {
    #[serde(skip)]
    pub name: String,
    /// Image reference
    pub image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<CommandSpec>,
    /// `None` values are taken from the orchestrator's environment
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub environment: IndexMap<String, Option<String>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<PortMapping>,
    /// Dependencies in the order they were declared
    #[serde(skip_serializing_if = "IndexSet::is_empty")]
    pub depends_on: IndexSet<String>,
    #[serde(skip_serializing_if = "Resources::is_empty")]
    pub resources: Resources,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restart: Option<RestartSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replicas: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<DeployMode>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub placement: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<VolumeMount>,
    #[serde(skip_serializing_if = "BTreeSet::is_empty")]
    pub networks: BTreeSet<String>,
}

impl ServiceSpec {
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            command: None,
            environment: IndexMap::new(),
            ports: Vec::new(),
            depends_on: IndexSet::new(),
            resources: Resources::default(),
            restart: None,
            replicas: None,
            mode: None,
            placement: Vec::new(),
            volumes: Vec::new(),
            networks: BTreeSet::new(),
        }
    }
}

/// Command to run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum CommandSpec {
    /// Shell command string
    Shell(String),
    /// Exec form array
    Exec(Vec<String>),
}

/// Deployment mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeployMode {
    Replicated,
    Global,
}

impl FromStr for DeployMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "replicated" => Ok(DeployMode::Replicated),
            "global" => Ok(DeployMode::Global),
            other => Err(format!(
                "unknown deploy mode '{}' (expected replicated or global)",
                other
            )),
        }
    }
}

/// Resource limits and reservations
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Resources {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limits: Option<ResourceSpec>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reservations: Option<ResourceSpec>,
}

impl Resources {
    pub fn is_empty(&self) -> bool {
        self.limits.is_none() && self.reservations.is_none()
    }
}

/// CPU fraction and memory in bytes
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResourceSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpus: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<u64>,
}

/// Restart policy condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestartPolicy {
    OnFailure,
    Always,
    None,
}

impl RestartPolicy {
    /// Parse the service level `restart` value
    pub fn from_restart(s: &str) -> Result<Self, String> {
        match s {
            "no" => Ok(RestartPolicy::None),
            "always" | "unless-stopped" => Ok(RestartPolicy::Always),
            "on-failure" => Ok(RestartPolicy::OnFailure),
            other => Err(format!(
                "unknown restart value '{}' (expected no, always, on-failure or unless-stopped)",
                other
            )),
        }
    }

    /// Parse `deploy.restart_policy.condition`
    pub fn from_condition(s: &str) -> Result<Self, String> {
        match s {
            "none" => Ok(RestartPolicy::None),
            "any" => Ok(RestartPolicy::Always),
            "on-failure" => Ok(RestartPolicy::OnFailure),
            other => Err(format!(
                "unknown restart condition '{}' (expected none, on-failure or any)",
                other
            )),
        }
    }
}

/// Restart policy with its optional tuning knobs
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RestartSpec {
    pub condition: RestartPolicy,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delay: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub window: Option<String>,
}

impl RestartSpec {
    pub fn new(condition: RestartPolicy) -> Self {
        Self {
            condition,
            delay: None,
            max_attempts: None,
            window: None,
        }
    }
}

/// Port protocol
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Protocol::Tcp),
            "udp" => Ok(Protocol::Udp),
            other => Err(format!("unknown protocol '{}' (expected tcp or udp)", other)),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Udp => write!(f, "udp"),
        }
    }
}

/// Host to container port mapping
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortMapping {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_ip: Option<String>,
    /// Host port; `None` lets the orchestrator pick one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published: Option<u16>,
    /// Container port
    pub target: u16,
    pub protocol: Protocol,
}

impl PortMapping {
    /// Container-only mapping, as written `- 80`
    pub fn container(target: u16) -> Self {
        Self {
            host_ip: None,
            published: None,
            target,
            protocol: Protocol::Tcp,
        }
    }
}

/// Parse a single port number
pub fn parse_port(s: &str) -> Result<u16, String> {
    if s.contains('-') {
        return Err(format!("port ranges are not supported: '{}'", s));
    }
    let port: u16 = s
        .trim()
        .parse()
        .map_err(|_| format!("invalid port '{}'", s))?;
    if port == 0 {
        return Err("port 0 is not allowed".to_string());
    }
    Ok(port)
}

impl FromStr for PortMapping {
    type Err = String;

    /// Short syntax: `[[host_ip:]published:]target[/protocol]`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (spec, protocol) = match s.rsplit_once('/') {
            Some((spec, proto)) => (spec, proto.parse::<Protocol>()?),
            None => (s, Protocol::Tcp),
        };

        let mut parts = spec.rsplitn(3, ':');
        let target = parse_port(parts.next().unwrap_or_default())?;
        let published = match parts.next() {
            Some(host) if !host.is_empty() => Some(parse_port(host)?),
            _ => None,
        };
        let host_ip = parts
            .next()
            .filter(|ip| !ip.is_empty())
            .map(|ip| ip.trim_start_matches('[').trim_end_matches(']').to_string());

        Ok(PortMapping {
            host_ip,
            published,
            target,
            protocol,
        })
    }
}

/// Source of a volume mount
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "source", rename_all = "lowercase")]
pub enum VolumeSource {
    /// Host path
    Bind(PathBuf),
    /// Named volume declared under top-level `volumes`
    Volume(String),
    /// In-memory filesystem
    Tmpfs,
}

impl VolumeSource {
    /// Paths look like paths; anything else names a volume
    pub fn classify(source: &str) -> Self {
        if source.starts_with('/')
            || source.starts_with('.')
            || source.starts_with('~')
            || source.contains('/')
        {
            VolumeSource::Bind(PathBuf::from(source))
        } else {
            VolumeSource::Volume(source.to_string())
        }
    }
}

/// Volume mount for a service
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VolumeMount {
    /// `None` for an anonymous volume
    #[serde(flatten)]
    pub source: Option<VolumeSource>,
    /// Path inside the container
    pub target: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub read_only: bool,
}

const MOUNT_FLAGS: &[&str] = &[
    "ro", "rw", "z", "Z", "cached", "delegated", "consistent", "nocopy",
];

impl FromStr for VolumeMount {
    type Err = String;

    /// Short syntax: `[source:]target[:mode]`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        let (source, target, mode) = match parts.as_slice() {
            [target] => (None, *target, None),
            [source, target] => (Some(*source), *target, None),
            [source, target, mode] => (Some(*source), *target, Some(*mode)),
            _ => return Err(format!("invalid volume specification '{}'", s)),
        };

        if !target.starts_with('/') {
            return Err(format!("container path '{}' must be absolute", target));
        }

        let mut read_only = false;
        if let Some(mode) = mode {
            for flag in mode.split(',') {
                if !MOUNT_FLAGS.contains(&flag) {
                    return Err(format!("unknown volume mode '{}'", flag));
                }
                read_only |= flag == "ro";
            }
        }

        let source = match source {
            Some("") => return Err(format!("empty volume source in '{}'", s)),
            Some(src) => Some(VolumeSource::classify(src)),
            None => None,
        };

        Ok(VolumeMount {
            source,
            target: target.to_string(),
            read_only,
        })
    }
}

/// Declared network
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkSpec {
    #[serde(skip)]
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub driver: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub external: bool,
}

impl NetworkSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            driver: None,
            external: false,
        }
    }
}

/// Declared named volume
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VolumeSpec {
    #[serde(skip)]
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub driver: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub external: bool,
}

impl VolumeSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            driver: None,
            external: false,
        }
    }
}

/// Parse a memory quantity such as `50M`, `1.5g` or `512kb` into bytes
pub fn parse_memory(s: &str) -> Result<u64, String> {
    let s = s.trim();
    let split = s
        .find(|c: char| c.is_ascii_alphabetic())
        .unwrap_or(s.len());
    let (number, unit) = s.split_at(split);

    let value: f64 = number
        .trim()
        .parse()
        .map_err(|_| format!("invalid memory quantity '{}'", s))?;
    let multiplier: u64 = match unit.to_ascii_lowercase().as_str() {
        "" | "b" => 1,
        "k" | "kb" => 1 << 10,
        "m" | "mb" => 1 << 20,
        "g" | "gb" => 1 << 30,
        "t" | "tb" => 1 << 40,
        _ => return Err(format!("unknown memory unit in '{}'", s)),
    };

    let bytes = (value * multiplier as f64).round();
    if !bytes.is_finite() || bytes < 1.0 {
        return Err(format!("memory quantity '{}' must be at least one byte", s));
    }
    if bytes >= u64::MAX as f64 {
        return Err(format!("memory quantity '{}' is too large", s));
    }

    Ok(bytes as u64)
}

/// Parse a CPU fraction such as `0.5`
pub fn parse_cpus(s: &str) -> Result<f64, String> {
    let cpus: f64 = s
        .trim()
        .parse()
        .map_err(|_| format!("invalid cpu quantity '{}'", s))?;
    if !cpus.is_finite() || cpus <= 0.0 {
        return Err(format!("cpu quantity '{}' must be positive", s));
    }
    Ok(cpus)
}

/// Depth-first walk of `depends_on` edges in declaration order.
///
/// Returns the start order and the first cycle found, written as the chain of
/// service names that closes on itself.
pub(crate) fn dependency_order(
    services: &IndexMap<String, ServiceSpec>,
) -> (Vec<String>, Option<Vec<String>>) {
    let mut order = Vec::new();
    let mut visited = HashSet::new();
    let mut stack = Vec::new();
    let mut cycle = None;

    for name in services.keys() {
        visit(name, services, &mut visited, &mut stack, &mut order, &mut cycle);
    }

    (order, cycle)
}

fn visit<'a>(
    name: &'a str,
    services: &'a IndexMap<String, ServiceSpec>,
    visited: &mut HashSet<&'a str>,
    stack: &mut Vec<&'a str>,
    order: &mut Vec<String>,
    cycle: &mut Option<Vec<String>>,
) {
    if visited.contains(name) {
        return;
    }
    let Some(spec) = services.get(name) else {
        return;
    };

    if let Some(pos) = stack.iter().position(|s| *s == name) {
        if cycle.is_none() {
            let mut chain: Vec<String> = stack[pos..].iter().map(|s| s.to_string()).collect();
            chain.push(name.to_string());
            *cycle = Some(chain);
        }
        return;
    }

    stack.push(name);
    for dep in &spec.depends_on {
        visit(dep, services, visited, stack, order, cycle);
    }
    stack.pop();

    visited.insert(name);
    order.push(name.to_string());
}
