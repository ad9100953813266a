//! Hand-off point to the external orchestrator
//!
//! Nothing in this crate starts, stops or networks containers. An
//! [`Orchestrator`] receives the validated manifest as its only input.

use super::model::{Manifest, ServiceSpec, VolumeSource};
use std::io::{self, Write};

/// Consumer of a validated manifest
pub trait Orchestrator {
    type Error;

    fn deploy(&mut self, manifest: &Manifest) -> Result<(), Self::Error>;
}

/// Writes the deployment plan instead of deploying: one line per service
/// in start order.
pub struct PlanPrinter<W> {
    out: W,
}

impl<W: Write> PlanPrinter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn describe(service: &ServiceSpec) -> String {
        let mut parts = vec![format!("image={}", service.image)];

        if let Some(replicas) = service.replicas {
            parts.push(format!("replicas={}", replicas));
        }
        if !service.ports.is_empty() {
            let ports: Vec<String> = service
                .ports
                .iter()
                .map(|p| match p.published {
                    Some(host) => format!("{}:{}/{}", host, p.target, p.protocol),
                    None => format!("{}/{}", p.target, p.protocol),
                })
                .collect();
            parts.push(format!("ports={}", ports.join(",")));
        }
        if !service.depends_on.is_empty() {
            let deps: Vec<&str> = service.depends_on.iter().map(String::as_str).collect();
            parts.push(format!("after={}", deps.join(",")));
        }
        if !service.networks.is_empty() {
            let nets: Vec<&str> = service.networks.iter().map(String::as_str).collect();
            parts.push(format!("networks={}", nets.join(",")));
        }
        let named: Vec<&str> = service
            .volumes
            .iter()
            .filter_map(|m| match &m.source {
                Some(VolumeSource::Volume(name)) => Some(name.as_str()),
                _ => None,
            })
            .collect();
        if !named.is_empty() {
            parts.push(format!("volumes={}", named.join(",")));
        }

        parts.join(" ")
    }
}

impl<W: Write> Orchestrator for PlanPrinter<W> {
    type Error = io::Error;

    fn deploy(&mut self, manifest: &Manifest) -> io::Result<()> {
        for (step, name) in manifest.start_order().iter().enumerate() {
            if let Some(service) = manifest.service(name) {
                writeln!(self.out, "{}. {} {}", step + 1, name, Self::describe(service))?;
            }
        }
        self.out.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack::loader::StackLoader;
    use std::collections::HashMap;

    #[test]
    fn test_plan_printer_start_order() {
        let manifest = StackLoader::new()
            .environment(HashMap::new())
            .project_directory("/srv/diet")
            .load_str(include_str!("../../fixtures/docker-stack.yml"))
            .unwrap();

        let mut printer = PlanPrinter::new(Vec::new());
        printer.deploy(&manifest).unwrap();
        let plan = String::from_utf8(printer.into_inner()).unwrap();
        let lines: Vec<&str> = plan.lines().collect();

        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("1. db image=postgres:13"));
        assert!(lines[0].contains("volumes=db-data"));
        assert!(lines[1].starts_with("2. web "));
        assert!(lines[1].contains("replicas=2"));
        assert!(lines[1].contains("after=db"));
        assert!(lines[2].starts_with("3. adminer "));
    }
}
