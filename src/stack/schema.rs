//! Structural validation of stack documents
//!
//! [`SchemaValidator`] walks the generic tree produced by the parser and
//! records every deviation from the expected shape: missing required fields,
//! wrong node kinds, unknown keys and out-of-range values. It never stops at
//! the first problem.

use super::model::{
    parse_cpus, parse_memory, parse_port, DeployMode, PortMapping, Protocol, RestartPolicy,
    VolumeMount,
};
use super::node::{field, index, integer, is_extension, join, kind_name};
use crate::error::{Result, StackError, ValidationError};
use regex::Regex;
use serde_yaml::{Mapping, Value};
use std::sync::LazyLock;

const ROOT_KEYS: &[&str] = &["version", "services", "networks", "volumes"];

const SERVICE_KEYS: &[&str] = &[
    "image",
    "command",
    "environment",
    "ports",
    "depends_on",
    "restart",
    "volumes",
    "networks",
    "deploy",
];

const DEPLOY_KEYS: &[&str] = &[
    "replicas",
    "mode",
    "resources",
    "restart_policy",
    "placement",
    "labels",
];

const DEPENDS_ON_KEYS: &[&str] = &["condition", "restart", "required"];

const ATTACHMENT_KEYS: &[&str] = &["aliases", "ipv4_address", "ipv6_address"];

const PLACEMENT_KEYS: &[&str] = &["constraints"];

const RESOURCES_KEYS: &[&str] = &["limits", "reservations"];

const RESOURCE_SPEC_KEYS: &[&str] = &["cpus", "memory"];

const NETWORK_KEYS: &[&str] = &["driver", "external", "attachable", "internal", "labels"];

const VOLUME_KEYS: &[&str] = &["driver", "external", "labels"];

const DEPENDS_ON_CONDITIONS: &[&str] = &[
    "service_started",
    "service_healthy",
    "service_completed_successfully",
];

static SERVICE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9][a-zA-Z0-9_.-]*$").expect("service name pattern is valid")
});

static DURATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+(\.\d+)?(ns|us|ms|s|m|h))+$").expect("duration pattern is valid")
});

static ENV_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_.-]*$").expect("environment name pattern is valid")
});

/// Collects schema violations for one document
#[derive(Debug, Default)]
pub struct SchemaValidator {
    errors: Vec<ValidationError>,
}

impl SchemaValidator {
    /// Validate a document, failing with every violation found
    pub fn validate(doc: &Value) -> Result<()> {
        let errors = Self::check(doc);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(StackError::Validation(errors))
        }
    }

    /// All violations in document order
    pub fn check(doc: &Value) -> Vec<ValidationError> {
        let mut validator = Self::default();
        validator.root(doc);
        validator.errors
    }

    fn error(&mut self, path: &str, reason: impl Into<String>) {
        self.errors.push(ValidationError::new(path, reason));
    }

    fn wrong_kind(&mut self, path: &str, expected: &str, found: &Value) {
        self.error(
            path,
            format!("expected {}, found {}", expected, kind_name(found)),
        );
    }

    fn mapping<'a>(&mut self, path: &str, node: &'a Value) -> Option<&'a Mapping> {
        match node {
            Value::Mapping(map) => Some(map),
            other => {
                self.wrong_kind(path, "mapping", other);
                None
            }
        }
    }

    /// String-keyed entries of a mapping, reporting unknown and non-string keys
    fn fields<'a>(
        &mut self,
        path: &str,
        map: &'a Mapping,
        allowed: Option<&[&str]>,
    ) -> Vec<(String, &'a Value)> {
        let mut entries = Vec::new();

        for (key, value) in map {
            let Some(name) = key.as_str() else {
                self.error(
                    path,
                    format!("keys must be strings, found {}", kind_name(key)),
                );
                continue;
            };
            if let Some(allowed) = allowed {
                if is_extension(name) {
                    continue;
                }
                if !allowed.contains(&name) {
                    self.error(&join(path, name), "unknown key");
                    continue;
                }
            }
            entries.push((name.to_string(), value));
        }

        entries
    }

    fn string(&mut self, path: &str, node: &Value) -> Option<String> {
        match node {
            Value::String(s) => Some(s.clone()),
            other => {
                self.wrong_kind(path, "string", other);
                None
            }
        }
    }

    fn non_empty_string(&mut self, path: &str, node: &Value) -> Option<String> {
        let s = self.string(path, node)?;
        if s.trim().is_empty() {
            self.error(path, "must not be empty");
            return None;
        }
        Some(s)
    }

    fn boolean(&mut self, path: &str, node: &Value) {
        if !node.is_bool() {
            self.wrong_kind(path, "boolean", node);
        }
    }

    fn string_list(&mut self, path: &str, node: &Value) {
        match node {
            Value::Sequence(items) => {
                for (i, item) in items.iter().enumerate() {
                    self.string(&index(path, i), item);
                }
            }
            other => self.wrong_kind(path, "sequence of strings", other),
        }
    }

    fn one_of(&mut self, path: &str, node: &Value, choices: &[&str]) {
        if let Some(value) = self.string(path, node) {
            if !choices.contains(&value.as_str()) {
                self.error(
                    path,
                    format!("'{}' is not one of {}", value, choices.join(", ")),
                );
            }
        }
    }

    fn duration(&mut self, path: &str, node: &Value) {
        if let Some(value) = self.string(path, node) {
            if !DURATION.is_match(&value) {
                self.error(path, format!("invalid duration '{}'", value));
            }
        }
    }

    fn labels(&mut self, path: &str, node: &Value) {
        match node {
            Value::Mapping(map) => {
                for (key, value) in self.fields(path, map, None) {
                    if !matches!(value, Value::String(_) | Value::Number(_) | Value::Bool(_)) {
                        self.wrong_kind(&join(path, &key), "scalar", value);
                    }
                }
            }
            Value::Sequence(_) => self.string_list(path, node),
            other => self.wrong_kind(path, "mapping or sequence", other),
        }
    }

    fn root(&mut self, doc: &Value) {
        let Some(map) = self.mapping("document", doc) else {
            return;
        };
        let entries = self.fields("", map, Some(ROOT_KEYS));

        if field(map, "services").is_none() {
            self.error("services", "required field is missing");
        }

        for (key, value) in entries {
            match key.as_str() {
                "version" => {
                    if !matches!(value, Value::String(_) | Value::Number(_)) {
                        self.wrong_kind("version", "string", value);
                    }
                }
                "services" => self.services(value),
                "networks" => self.top_level("networks", value, NETWORK_KEYS),
                "volumes" => self.top_level("volumes", value, VOLUME_KEYS),
                _ => {}
            }
        }
    }

    fn services(&mut self, node: &Value) {
        let Some(map) = self.mapping("services", node) else {
            return;
        };
        for (name, service) in self.fields("services", map, None) {
            let path = join("services", &name);
            if !SERVICE_NAME.is_match(&name) {
                self.error(&path, "invalid service name");
            }
            self.service(&path, service);
        }
    }

    fn service(&mut self, path: &str, node: &Value) {
        let Some(map) = self.mapping(path, node) else {
            return;
        };
        let entries = self.fields(path, map, Some(SERVICE_KEYS));

        if field(map, "image").is_none() {
            self.error(&join(path, "image"), "required field is missing");
        }

        for (key, value) in entries {
            let child = join(path, &key);
            match key.as_str() {
                "image" => {
                    self.non_empty_string(&child, value);
                }
                "command" => match value {
                    Value::String(_) => {}
                    Value::Sequence(_) => self.string_list(&child, value),
                    other => self.wrong_kind(&child, "string or sequence", other),
                },
                "environment" => self.environment(&child, value),
                "ports" => self.ports(&child, value),
                "depends_on" => self.depends_on(&child, value),
                "restart" => {
                    if let Some(s) = self.string(&child, value) {
                        if let Err(reason) = RestartPolicy::from_restart(&s) {
                            self.error(&child, reason);
                        }
                    }
                }
                "volumes" => self.mounts(&child, value),
                "networks" => self.service_networks(&child, value),
                "deploy" => self.deploy(&child, value),
                _ => {}
            }
        }
    }

    fn environment(&mut self, path: &str, node: &Value) {
        match node {
            Value::Mapping(map) => {
                for (name, value) in self.fields(path, map, None) {
                    let child = join(path, &name);
                    if !ENV_NAME.is_match(&name) {
                        self.error(&child, "invalid environment variable name");
                    }
                    if !matches!(
                        value,
                        Value::String(_) | Value::Number(_) | Value::Bool(_) | Value::Null
                    ) {
                        self.wrong_kind(&child, "scalar", value);
                    }
                }
            }
            Value::Sequence(items) => {
                for (i, item) in items.iter().enumerate() {
                    let child = index(path, i);
                    if let Some(entry) = self.string(&child, item) {
                        let name = entry.split_once('=').map_or(entry.as_str(), |(k, _)| k);
                        if !ENV_NAME.is_match(name) {
                            self.error(&child, format!("invalid environment entry '{}'", entry));
                        }
                    }
                }
            }
            other => self.wrong_kind(path, "mapping or sequence", other),
        }
    }

    fn ports(&mut self, path: &str, node: &Value) {
        let Value::Sequence(items) = node else {
            self.wrong_kind(path, "sequence", node);
            return;
        };

        for (i, item) in items.iter().enumerate() {
            let child = index(path, i);
            match item {
                Value::String(s) => {
                    if let Err(reason) = s.parse::<PortMapping>() {
                        self.error(&child, reason);
                    }
                }
                Value::Number(n) => {
                    if !n.as_u64().is_some_and(|p| (1..=65535).contains(&p)) {
                        self.error(&child, format!("invalid port '{}'", n));
                    }
                }
                Value::Mapping(map) => self.port_long(&child, map),
                other => self.wrong_kind(&child, "string, number or mapping", other),
            }
        }
    }

    fn port_long(&mut self, path: &str, map: &Mapping) {
        const KEYS: &[&str] = &["target", "published", "protocol", "host_ip", "mode"];

        if field(map, "target").is_none() {
            self.error(&join(path, "target"), "required field is missing");
        }

        for (key, value) in self.fields(path, map, Some(KEYS)) {
            let child = join(path, &key);
            match key.as_str() {
                "target" | "published" => {
                    let valid = match value {
                        Value::Number(n) => n.as_u64().is_some_and(|p| (1..=65535).contains(&p)),
                        Value::String(s) => parse_port(s).is_ok(),
                        _ => false,
                    };
                    if !valid {
                        self.error(&child, "expected a port number between 1 and 65535");
                    }
                }
                "protocol" => {
                    if let Some(s) = self.string(&child, value) {
                        if let Err(reason) = s.parse::<Protocol>() {
                            self.error(&child, reason);
                        }
                    }
                }
                "host_ip" => {
                    self.string(&child, value);
                }
                "mode" => self.one_of(&child, value, &["host", "ingress"]),
                _ => {}
            }
        }
    }

    fn depends_on(&mut self, path: &str, node: &Value) {
        match node {
            Value::Sequence(_) => self.string_list(path, node),
            Value::Mapping(map) => {
                for (name, value) in self.fields(path, map, None) {
                    let child = join(path, &name);
                    let Some(condition) = self.mapping(&child, value) else {
                        continue;
                    };
                    for (key, value) in self.fields(&child, condition, Some(DEPENDS_ON_KEYS)) {
                        let leaf = join(&child, &key);
                        match key.as_str() {
                            "condition" => self.one_of(&leaf, value, DEPENDS_ON_CONDITIONS),
                            _ => self.boolean(&leaf, value),
                        }
                    }
                }
            }
            other => self.wrong_kind(path, "sequence or mapping", other),
        }
    }

    fn mounts(&mut self, path: &str, node: &Value) {
        let Value::Sequence(items) = node else {
            self.wrong_kind(path, "sequence", node);
            return;
        };

        for (i, item) in items.iter().enumerate() {
            let child = index(path, i);
            match item {
                Value::String(s) => {
                    if let Err(reason) = s.parse::<VolumeMount>() {
                        self.error(&child, reason);
                    }
                }
                Value::Mapping(map) => self.mount_long(&child, map),
                other => self.wrong_kind(&child, "string or mapping", other),
            }
        }
    }

    fn mount_long(&mut self, path: &str, map: &Mapping) {
        const KEYS: &[&str] = &["type", "source", "target", "read_only"];

        if field(map, "target").is_none() {
            self.error(&join(path, "target"), "required field is missing");
        }

        let mount_type = field(map, "type").and_then(Value::as_str);
        if mount_type != Some("tmpfs") && field(map, "source").is_none() {
            self.error(&join(path, "source"), "required field is missing");
        }

        for (key, value) in self.fields(path, map, Some(KEYS)) {
            let child = join(path, &key);
            match key.as_str() {
                "type" => self.one_of(&child, value, &["bind", "volume", "tmpfs"]),
                "source" => {
                    self.non_empty_string(&child, value);
                }
                "target" => {
                    if let Some(target) = self.string(&child, value) {
                        if !target.starts_with('/') {
                            self.error(
                                &child,
                                format!("container path '{}' must be absolute", target),
                            );
                        }
                    }
                }
                "read_only" => self.boolean(&child, value),
                _ => {}
            }
        }
    }

    fn service_networks(&mut self, path: &str, node: &Value) {
        match node {
            Value::Sequence(_) => self.string_list(path, node),
            Value::Mapping(map) => {
                for (name, value) in self.fields(path, map, None) {
                    let child = join(path, &name);
                    match value {
                        Value::Null => {}
                        Value::Mapping(attachment) => {
                            for (key, value) in
                                self.fields(&child, attachment, Some(ATTACHMENT_KEYS))
                            {
                                let leaf = join(&child, &key);
                                match key.as_str() {
                                    "aliases" => self.string_list(&leaf, value),
                                    _ => {
                                        self.string(&leaf, value);
                                    }
                                }
                            }
                        }
                        other => self.wrong_kind(&child, "mapping or null", other),
                    }
                }
            }
            other => self.wrong_kind(path, "sequence or mapping", other),
        }
    }

    fn deploy(&mut self, path: &str, node: &Value) {
        let Some(map) = self.mapping(path, node) else {
            return;
        };

        for (key, value) in self.fields(path, map, Some(DEPLOY_KEYS)) {
            let child = join(path, &key);
            match key.as_str() {
                "replicas" => self.replicas(&child, value),
                "mode" => {
                    if let Some(mode) = self.string(&child, value) {
                        match mode.parse::<DeployMode>() {
                            Ok(DeployMode::Global) if field(map, "replicas").is_some() => {
                                self.error(&child, "replicas cannot be set in global mode");
                            }
                            Ok(_) => {}
                            Err(reason) => self.error(&child, reason),
                        }
                    }
                }
                "resources" => self.resources(&child, value),
                "restart_policy" => self.restart_policy(&child, value),
                "placement" => {
                    if let Some(placement) = self.mapping(&child, value) {
                        for (key, value) in self.fields(&child, placement, Some(PLACEMENT_KEYS)) {
                            self.string_list(&join(&child, &key), value);
                        }
                    }
                }
                "labels" => self.labels(&child, value),
                _ => {}
            }
        }
    }

    fn replicas(&mut self, path: &str, node: &Value) {
        match integer(node) {
            Some(n) if n < 1 => self.error(path, format!("must be at least 1, found {}", n)),
            Some(n) if n > i64::from(u32::MAX) => self.error(path, format!("{} is too large", n)),
            Some(_) => {}
            None => self.wrong_kind(path, "positive integer", node),
        }
    }

    fn resources(&mut self, path: &str, node: &Value) {
        let Some(map) = self.mapping(path, node) else {
            return;
        };

        for (key, value) in self.fields(path, map, Some(RESOURCES_KEYS)) {
            let child = join(path, &key);
            let Some(spec) = self.mapping(&child, value) else {
                continue;
            };
            for (key, value) in self.fields(&child, spec, Some(RESOURCE_SPEC_KEYS)) {
                let leaf = join(&child, &key);
                match key.as_str() {
                    "cpus" => self.cpus(&leaf, value),
                    _ => self.memory(&leaf, value),
                }
            }
        }
    }

    fn cpus(&mut self, path: &str, node: &Value) {
        let result = match node {
            Value::String(s) => parse_cpus(s).map(|_| ()),
            Value::Number(n) => match n.as_f64() {
                Some(cpus) if cpus > 0.0 => Ok(()),
                _ => Err(format!("cpu quantity '{}' must be positive", n)),
            },
            other => {
                self.wrong_kind(path, "number or string", other);
                return;
            }
        };
        if let Err(reason) = result {
            self.error(path, reason);
        }
    }

    fn memory(&mut self, path: &str, node: &Value) {
        let result = match node {
            Value::String(s) => parse_memory(s).map(|_| ()),
            Value::Number(n) => match n.as_u64() {
                Some(bytes) if bytes > 0 => Ok(()),
                _ => Err(format!("memory quantity '{}' must be a positive integer", n)),
            },
            other => {
                self.wrong_kind(path, "string or integer", other);
                return;
            }
        };
        if let Err(reason) = result {
            self.error(path, reason);
        }
    }

    fn restart_policy(&mut self, path: &str, node: &Value) {
        const KEYS: &[&str] = &["condition", "delay", "max_attempts", "window"];

        let Some(map) = self.mapping(path, node) else {
            return;
        };

        for (key, value) in self.fields(path, map, Some(KEYS)) {
            let child = join(path, &key);
            match key.as_str() {
                "condition" => {
                    if let Some(s) = self.string(&child, value) {
                        if let Err(reason) = RestartPolicy::from_condition(&s) {
                            self.error(&child, reason);
                        }
                    }
                }
                "max_attempts" => {
                    if !integer(value).is_some_and(|n| (0..=i64::from(u32::MAX)).contains(&n)) {
                        self.wrong_kind(&child, "non-negative integer", value);
                    }
                }
                _ => self.duration(&child, value),
            }
        }
    }

    fn top_level(&mut self, section: &str, node: &Value, allowed: &[&str]) {
        let Some(map) = self.mapping(section, node) else {
            return;
        };

        for (name, value) in self.fields(section, map, None) {
            let path = join(section, &name);
            match value {
                Value::Null => {}
                Value::Mapping(attrs) => {
                    for (key, value) in self.fields(&path, attrs, Some(allowed)) {
                        let child = join(&path, &key);
                        match key.as_str() {
                            "driver" => {
                                self.non_empty_string(&child, value);
                            }
                            "labels" => self.labels(&child, value),
                            _ => self.boolean(&child, value),
                        }
                    }
                }
                other => self.wrong_kind(&path, "mapping or null", other),
            }
        }
    }
}
