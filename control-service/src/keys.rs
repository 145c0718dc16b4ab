//! Store key layout.
//!
//! Service names must not contain [`KEY_SEPARATOR`]; callers are responsible for that
//! (see [`validate_service_name`]). Instance ids may contain it since they only ever
//! appear in the last segment.

use crate::error::{Error, Result};

pub const KEY_SEPARATOR: char = ':';
pub const DEFAULT_PREFIX: &str = "controlService:control";

/// All key patterns used by the control plane.
enum ControlKey<'a> {
    Services,
    Instances(&'a str),
    Instance { service: &'a str, id: &'a str },
    State(&'a str),
    Signal(&'a str),
}

impl ControlKey<'_> {
    fn resolve(&self, prefix: &str) -> String {
        match self {
            ControlKey::Services => format!("{prefix}:services"),
            ControlKey::Instances(service) => format!("{prefix}:service:{service}:instances"),
            ControlKey::Instance { service, id } => {
                format!("{prefix}:service:{service}:instance:{id}")
            }
            ControlKey::State(service) => format!("{prefix}:state:{service}"),
            ControlKey::Signal(service) => format!("{prefix}:signal:{service}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlKeys {
    prefix: String,
}

impl ControlKeys {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Set of every service name that ever registered.
    pub fn services(&self) -> String {
        ControlKey::Services.resolve(&self.prefix)
    }

    /// Set of active instance ids for `service`.
    pub fn instances(&self, service: &str) -> String {
        ControlKey::Instances(service).resolve(&self.prefix)
    }

    /// TTL'd JSON descriptor of one instance.
    pub fn instance(&self, service: &str, id: &str) -> String {
        ControlKey::Instance { service, id }.resolve(&self.prefix)
    }

    pub fn state(&self, service: &str) -> String {
        ControlKey::State(service).resolve(&self.prefix)
    }

    pub fn signal(&self, service: &str) -> String {
        ControlKey::Signal(service).resolve(&self.prefix)
    }
}

impl Default for ControlKeys {
    fn default() -> Self {
        Self::new(DEFAULT_PREFIX)
    }
}

pub fn validate_service_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains(KEY_SEPARATOR) {
        return Err(Error::InvalidServiceName(name.to_string()));
    }
    Ok(())
}
