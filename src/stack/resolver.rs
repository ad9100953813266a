//! Builds the typed [`Manifest`] from a validated tree

use super::model::{
    dependency_order, parse_cpus, parse_memory, parse_port, CommandSpec, DeployMode, Manifest,
    NetworkSpec, PortMapping, Protocol, ResourceSpec, Resources, RestartPolicy, RestartSpec,
    ServiceSpec, VolumeMount, VolumeSource, VolumeSpec,
};
use super::node::{field, integer, scalar_str, section_names};
use crate::error::{ReferenceError, ReferenceKind, Result, StackError, ValidationError};
use indexmap::IndexMap;
use serde_yaml::{Mapping, Value};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

/// Network every service may attach to without declaring it
pub const DEFAULT_NETWORK: &str = "default";

/// Resolves references and produces an immutable manifest.
///
/// Relative bind-mount sources are resolved against `base_dir`.
#[derive(Debug, Clone)]
pub struct Resolver {
    base_dir: PathBuf,
}

impl Resolver {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Resolve a tree that already passed schema validation.
    ///
    /// Dangling names fail with [`StackError::Reference`]; port conflicts and
    /// dependency cycles fail with [`StackError::Validation`]. Dangling names
    /// are reported first.
    pub fn resolve(&self, doc: &Value) -> Result<Manifest> {
        let empty = Mapping::new();
        let root = doc.as_mapping().unwrap_or(&empty);

        let version = field(root, "version").and_then(scalar_str);
        let mut networks = declared(root, "networks", |name, attrs| NetworkSpec {
            name: name.to_string(),
            driver: attrs.and_then(|a| field(a, "driver")).and_then(scalar_str),
            external: flag(attrs, "external"),
        });
        let volumes = declared(root, "volumes", |name, attrs| VolumeSpec {
            name: name.to_string(),
            driver: attrs.and_then(|a| field(a, "driver")).and_then(scalar_str),
            external: flag(attrs, "external"),
        });

        let mut services = IndexMap::new();
        if let Some(map) = field(root, "services").and_then(Value::as_mapping) {
            for (key, node) in map {
                if let Some(name) = key.as_str() {
                    services.insert(name.to_string(), self.service(name, node));
                }
            }
        }

        let mut references = Vec::new();
        for spec in services.values() {
            for dep in &spec.depends_on {
                if !services.contains_key(dep) {
                    references.push(reference(spec, "depends_on", ReferenceKind::Service, dep));
                }
            }
            for net in &spec.networks {
                if networks.contains_key(net) {
                    continue;
                }
                if net == DEFAULT_NETWORK {
                    networks.insert(net.clone(), NetworkSpec::new(net.as_str()));
                } else {
                    references.push(reference(spec, "networks", ReferenceKind::Network, net));
                }
            }
            for mount in &spec.volumes {
                if let Some(VolumeSource::Volume(name)) = &mount.source {
                    if !volumes.contains_key(name) {
                        references.push(reference(spec, "volumes", ReferenceKind::Volume, name));
                    }
                }
            }
        }

        if !references.is_empty() {
            return Err(StackError::Reference(references));
        }

        let mut problems = port_conflicts(&services);
        if let (_, Some(chain)) = dependency_order(&services) {
            problems.push(ValidationError::new(
                format!("services.{}.depends_on", chain[0]),
                format!("circular dependency: {}", chain.join(" -> ")),
            ));
        }

        if !problems.is_empty() {
            return Err(StackError::Validation(problems));
        }

        tracing::debug!(
            "Resolved {} services, {} networks, {} volumes",
            services.len(),
            networks.len(),
            volumes.len()
        );

        Ok(Manifest::new(version, services, networks, volumes))
    }

    fn service(&self, name: &str, node: &Value) -> ServiceSpec {
        let empty = Mapping::new();
        let map = node.as_mapping().unwrap_or(&empty);

        let image = field(map, "image").and_then(Value::as_str).unwrap_or_default();
        let mut spec = ServiceSpec::new(name, image);

        spec.command = field(map, "command").and_then(command);
        spec.environment = field(map, "environment").map(environment).unwrap_or_default();
        spec.ports = sequence(map, "ports").filter_map(port).collect();
        spec.depends_on = field(map, "depends_on")
            .map(section_names)
            .unwrap_or_default()
            .into_iter()
            .collect();
        spec.networks = field(map, "networks")
            .map(section_names)
            .unwrap_or_default()
            .into_iter()
            .collect();
        spec.volumes = sequence(map, "volumes")
            .filter_map(|item| self.mount(item))
            .collect();

        let deploy = field(map, "deploy").and_then(Value::as_mapping);
        if let Some(deploy) = deploy {
            spec.replicas = field(deploy, "replicas")
                .and_then(integer)
                .and_then(|n| u32::try_from(n).ok());
            spec.mode = field(deploy, "mode")
                .and_then(Value::as_str)
                .and_then(|m| m.parse::<DeployMode>().ok());
            spec.placement = field(deploy, "placement")
                .and_then(Value::as_mapping)
                .map(|p| sequence(p, "constraints").filter_map(scalar_str).collect())
                .unwrap_or_default();
            if let Some(resources) = field(deploy, "resources").and_then(Value::as_mapping) {
                spec.resources = Resources {
                    limits: field(resources, "limits").and_then(resource_spec),
                    reservations: field(resources, "reservations").and_then(resource_spec),
                };
            }
        }

        let policy = deploy
            .and_then(|d| field(d, "restart_policy"))
            .and_then(Value::as_mapping);
        spec.restart = match policy {
            Some(policy) => Some(restart_spec(policy)),
            None => field(map, "restart")
                .and_then(Value::as_str)
                .and_then(|r| RestartPolicy::from_restart(r).ok())
                .map(RestartSpec::new),
        };

        spec
    }

    fn mount(&self, node: &Value) -> Option<VolumeMount> {
        let mut mount = match node {
            Value::String(s) => s.parse::<VolumeMount>().ok()?,
            Value::Mapping(map) => {
                let source = field(map, "source").and_then(Value::as_str);
                let source = match (field(map, "type").and_then(Value::as_str), source) {
                    (Some("tmpfs"), _) => Some(VolumeSource::Tmpfs),
                    (Some("bind"), Some(src)) => Some(VolumeSource::Bind(PathBuf::from(src))),
                    (Some("volume"), Some(src)) => Some(VolumeSource::Volume(src.to_string())),
                    (_, Some(src)) => Some(VolumeSource::classify(src)),
                    (_, None) => None,
                };
                VolumeMount {
                    source,
                    target: field(map, "target").and_then(scalar_str)?,
                    read_only: field(map, "read_only")
                        .and_then(Value::as_bool)
                        .unwrap_or(false),
                }
            }
            _ => return None,
        };

        if let Some(VolumeSource::Bind(path)) = &mount.source {
            mount.source = Some(VolumeSource::Bind(self.resolve_path(path)));
        }
        Some(mount)
    }

    /// Expand `~`, anchor relative paths at the base directory and drop `.`/`..`
    fn resolve_path(&self, path: &Path) -> PathBuf {
        let expanded = match path.strip_prefix("~") {
            Ok(rest) => match dirs::home_dir() {
                Some(home) => home.join(rest),
                None => path.to_path_buf(),
            },
            Err(_) => path.to_path_buf(),
        };

        let joined = if expanded.is_absolute() {
            expanded
        } else {
            self.base_dir.join(expanded)
        };

        let mut normalized = PathBuf::new();
        for component in joined.components() {
            match component {
                Component::CurDir => {}
                Component::ParentDir => {
                    normalized.pop();
                }
                other => normalized.push(other.as_os_str()),
            }
        }
        normalized
    }
}

fn declared<T>(
    root: &Mapping,
    section: &str,
    build: impl Fn(&str, Option<&Mapping>) -> T,
) -> IndexMap<String, T> {
    let Some(map) = field(root, section).and_then(Value::as_mapping) else {
        return IndexMap::new();
    };

    map.iter()
        .filter_map(|(key, attrs)| {
            let name = key.as_str()?;
            Some((name.to_string(), build(name, attrs.as_mapping())))
        })
        .collect()
}

fn flag(attrs: Option<&Mapping>, name: &str) -> bool {
    attrs
        .and_then(|a| field(a, name))
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

fn sequence<'a>(map: &'a Mapping, name: &str) -> impl Iterator<Item = &'a Value> {
    field(map, name)
        .and_then(Value::as_sequence)
        .into_iter()
        .flatten()
}

fn reference(
    spec: &ServiceSpec,
    section: &str,
    kind: ReferenceKind,
    name: &str,
) -> ReferenceError {
    ReferenceError {
        path: format!("services.{}.{}.{}", spec.name, section, name),
        kind,
        identifier: name.to_string(),
    }
}

fn command(node: &Value) -> Option<CommandSpec> {
    match node {
        Value::String(s) => Some(CommandSpec::Shell(s.clone())),
        Value::Sequence(items) => Some(CommandSpec::Exec(
            items.iter().filter_map(scalar_str).collect(),
        )),
        _ => None,
    }
}

fn environment(node: &Value) -> IndexMap<String, Option<String>> {
    match node {
        Value::Mapping(map) => map
            .iter()
            .filter_map(|(key, value)| Some((key.as_str()?.to_string(), scalar_str(value))))
            .collect(),
        Value::Sequence(items) => items
            .iter()
            .filter_map(Value::as_str)
            .map(|entry| match entry.split_once('=') {
                Some((key, value)) => (key.to_string(), Some(value.to_string())),
                None => (entry.to_string(), None),
            })
            .collect(),
        _ => IndexMap::new(),
    }
}

fn port(node: &Value) -> Option<PortMapping> {
    match node {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n
            .as_u64()
            .and_then(|p| u16::try_from(p).ok())
            .map(PortMapping::container),
        Value::Mapping(map) => Some(PortMapping {
            host_ip: field(map, "host_ip").and_then(scalar_str),
            published: field(map, "published").and_then(port_number),
            target: field(map, "target").and_then(port_number)?,
            protocol: field(map, "protocol")
                .and_then(Value::as_str)
                .and_then(|p| p.parse().ok())
                .unwrap_or(Protocol::Tcp),
        }),
        _ => None,
    }
}

fn port_number(node: &Value) -> Option<u16> {
    match node {
        Value::Number(n) => n.as_u64().and_then(|p| u16::try_from(p).ok()),
        Value::String(s) => parse_port(s).ok(),
        _ => None,
    }
}

fn resource_spec(node: &Value) -> Option<ResourceSpec> {
    let map = node.as_mapping()?;
    let cpus = field(map, "cpus").and_then(|v| match v {
        Value::String(s) => parse_cpus(s).ok(),
        other => other.as_f64(),
    });
    let memory = field(map, "memory").and_then(|v| match v {
        Value::String(s) => parse_memory(s).ok(),
        other => other.as_u64(),
    });
    Some(ResourceSpec { cpus, memory })
}

fn restart_spec(policy: &Mapping) -> RestartSpec {
    // `condition` defaults to `any`
    let condition = field(policy, "condition")
        .and_then(Value::as_str)
        .and_then(|c| RestartPolicy::from_condition(c).ok())
        .unwrap_or(RestartPolicy::Always);

    RestartSpec {
        condition,
        delay: field(policy, "delay").and_then(scalar_str),
        max_attempts: field(policy, "max_attempts")
            .and_then(integer)
            .and_then(|n| u32::try_from(n).ok()),
        window: field(policy, "window").and_then(scalar_str),
    }
}

/// First writer keeps a host port; every later mapping of it is an error
fn port_conflicts(services: &IndexMap<String, ServiceSpec>) -> Vec<ValidationError> {
    let mut owners: HashMap<(u16, Protocol), String> = HashMap::new();
    let mut conflicts = Vec::new();

    for spec in services.values() {
        for (i, port) in spec.ports.iter().enumerate() {
            let Some(host) = port.published else {
                continue;
            };
            let path = format!("services.{}.ports[{}]", spec.name, i);
            match owners.entry((host, port.protocol)) {
                Entry::Occupied(owner) => conflicts.push(ValidationError::new(
                    path,
                    format!(
                        "host port {}/{} is already published by {}",
                        host,
                        port.protocol,
                        owner.get()
                    ),
                )),
                Entry::Vacant(slot) => {
                    slot.insert(path);
                }
            }
        }
    }

    conflicts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack::parser::StackParser;
    use crate::stack::schema::SchemaValidator;

    fn resolve(yaml: &str) -> Result<Manifest> {
        let doc = StackParser::parse_str(yaml)?;
        SchemaValidator::validate(&doc)?;
        Resolver::new("/srv/app").resolve(&doc)
    }

    #[test]
    fn test_resolve_service_fields() {
        let manifest = resolve(
            r#"
version: "3"
services:
  web:
    image: web:latest
    command: ["gunicorn", "run:app"]
    environment: ["FLASK_ENV=production", "SECRET_KEY"]
    ports: ["5000:5000", {target: 53, published: 5353, protocol: udp}]
    depends_on: {db: {condition: service_started}}
    restart: always
    deploy:
      replicas: 2
      resources:
        limits: {cpus: "0.5", memory: 50M}
      restart_policy: {condition: on-failure, max_attempts: 3}
      placement: {constraints: ["node.role == worker"]}
    volumes:
      - ./static:/app/static:ro
      - data:/data
      - {type: tmpfs, target: /tmp}
    networks: [webnet]
  db:
    image: postgres
networks:
  webnet:
    driver: overlay
volumes:
  data:
"#,
        )
        .unwrap();

        assert_eq!(manifest.version(), Some("3"));
        let web = manifest.service("web").unwrap();
        assert_eq!(web.image, "web:latest");
        assert_eq!(
            web.command,
            Some(CommandSpec::Exec(vec!["gunicorn".into(), "run:app".into()]))
        );
        assert_eq!(web.environment["FLASK_ENV"], Some("production".to_string()));
        assert_eq!(web.environment["SECRET_KEY"], None);
        assert_eq!(web.ports[1].protocol, Protocol::Udp);
        assert_eq!(web.ports[1].published, Some(5353));
        assert!(web.depends_on.contains("db"));
        assert_eq!(web.replicas, Some(2));
        assert_eq!(web.placement, vec!["node.role == worker"]);

        let limits = web.resources.limits.as_ref().unwrap();
        assert_eq!(limits.cpus, Some(0.5));
        assert_eq!(limits.memory, Some(50 * 1024 * 1024));

        // deploy.restart_policy wins over restart
        let restart = web.restart.as_ref().unwrap();
        assert_eq!(restart.condition, RestartPolicy::OnFailure);
        assert_eq!(restart.max_attempts, Some(3));

        assert_eq!(
            web.volumes[0].source,
            Some(VolumeSource::Bind(PathBuf::from("/srv/app/static")))
        );
        assert!(web.volumes[0].read_only);
        assert_eq!(web.volumes[1].source, Some(VolumeSource::Volume("data".into())));
        assert_eq!(web.volumes[2].source, Some(VolumeSource::Tmpfs));

        assert_eq!(manifest.networks()["webnet"].driver.as_deref(), Some("overlay"));
    }

    #[test]
    fn test_resolve_is_idempotent() {
        let doc = StackParser::parse_str(include_str!("../../fixtures/docker-stack.yml")).unwrap();
        let resolver = Resolver::new("/srv/app");

        let first = resolver.resolve(&doc).unwrap();
        let second = resolver.resolve(&doc).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_undeclared_network() {
        let err = resolve(
            r#"
services:
  web:
    image: web
    networks: [webnet, backend]
networks:
  webnet:
"#,
        )
        .unwrap_err();

        match err {
            StackError::Reference(refs) => {
                assert_eq!(refs.len(), 1);
                assert_eq!(refs[0].identifier, "backend");
                assert_eq!(refs[0].kind, ReferenceKind::Network);
                assert_eq!(refs[0].path, "services.web.networks.backend");
            }
            other => panic!("expected reference error, got {:?}", other),
        }
    }

    #[test]
    fn test_all_dangling_references_collected() {
        let err = resolve(
            r#"
services:
  web:
    image: web
    depends_on: [db, cache]
    volumes: ["uploads:/uploads"]
"#,
        )
        .unwrap_err();

        match err {
            StackError::Reference(refs) => {
                let paths: Vec<_> = refs.iter().map(|r| r.path.as_str()).collect();
                assert_eq!(
                    paths,
                    vec![
                        "services.web.depends_on.db",
                        "services.web.depends_on.cache",
                        "services.web.volumes.uploads",
                    ]
                );
            }
            other => panic!("expected reference errors, got {:?}", other),
        }
    }

    #[test]
    fn test_default_network_is_implicit() {
        let manifest = resolve("services: {web: {image: web, networks: [default]}}").unwrap();
        assert!(manifest.networks().contains_key(DEFAULT_NETWORK));
    }

    #[test]
    fn test_duplicate_host_port() {
        let err = resolve(
            r#"
services:
  db:
    image: postgres
    ports: ["5432:5432"]
  replica:
    image: postgres
    ports: ["5432:5432"]
"#,
        )
        .unwrap_err();

        match err {
            StackError::Validation(errors) => {
                assert_eq!(errors.len(), 1);
                assert_eq!(errors[0].path, "services.replica.ports[0]");
                assert!(errors[0].reason.contains("5432/tcp"));
                assert!(errors[0].reason.contains("services.db.ports[0]"));
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_same_port_different_protocol() {
        let manifest = resolve(
            r#"
services:
  dns:
    image: coredns
    ports: ["53:53/udp", "53:53/tcp"]
"#,
        )
        .unwrap();
        assert_eq!(manifest.service("dns").unwrap().ports.len(), 2);
    }

    #[test]
    fn test_circular_dependency_detection() {
        let err = resolve(
            r#"
services:
  a:
    image: nginx
    depends_on: [b]
  b:
    image: nginx
    depends_on: [a]
"#,
        )
        .unwrap_err();

        match err {
            StackError::Validation(errors) => {
                assert_eq!(errors[0].path, "services.a.depends_on");
                assert!(errors[0].reason.contains("a -> b -> a"));
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_start_order_keeps_declared_dependency_order() {
        let manifest = resolve(
            r#"
services:
  web:
    image: web
    depends_on: [zeta, alpha]
  zeta:
    image: zeta
  alpha:
    image: alpha
"#,
        )
        .unwrap();

        assert_eq!(manifest.start_order(), vec!["zeta", "alpha", "web"]);
        let deps: Vec<_> = manifest.service("web").unwrap().depends_on.iter().collect();
        assert_eq!(deps, vec!["zeta", "alpha"]);
    }

    #[test]
    fn test_resolve_path_normalizes() {
        let resolver = Resolver::new("/srv/app/deploy");
        assert_eq!(
            resolver.resolve_path(Path::new("../data/./pg")),
            PathBuf::from("/srv/app/data/pg")
        );
        assert_eq!(
            resolver.resolve_path(Path::new("/var/log")),
            PathBuf::from("/var/log")
        );
    }
}
