//! Recursive named-children configuration tree.
//!
//! The textual parser and the on-disk format are out of scope for the
//! control core; this module only defines the shape the core is allowed
//! to consume once a collaborator has already parsed config text into
//! this tree. Leaves carry one of a fixed set of value kinds: booleans,
//! integers, floats, strings, durations (seconds), Celsius temperatures
//! and Kelvin deltas.

use std::collections::BTreeMap;

use hc_error::{Error, Result};

/// A single leaf value in the configuration tree.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    /// Duration expressed in whole seconds.
    Seconds(u64),
    /// A temperature expressed in degrees Celsius (core converts to its
    /// internal fixed-point unit on load).
    Celsius(f64),
    /// A temperature delta expressed in Kelvin.
    KelvinDelta(f64),
}

/// A node in the configuration tree: any number of named children, and
/// optionally a leaf value of its own (a node can be both a branch and a
/// scalar, e.g. `circuit.wtemp = 45` alongside `circuit.wtemp.max = 80`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigNode {
    pub value: Option<ConfigValue>,
    pub children: BTreeMap<String, ConfigNode>,
}

impl ConfigNode {
    pub fn leaf(value: ConfigValue) -> Self {
        ConfigNode {
            value: Some(value),
            children: BTreeMap::new(),
        }
    }

    pub fn branch() -> Self {
        ConfigNode::default()
    }

    pub fn with_child(mut self, name: impl Into<String>, child: ConfigNode) -> Self {
        self.children.insert(name.into(), child);
        self
    }

    pub fn child(&self, name: &str) -> Option<&ConfigNode> {
        self.children.get(name)
    }

    pub fn require_child(&self, name: &str) -> Result<&ConfigNode> {
        self.child(name)
            .ok_or_else(|| Error::not_configured(name.to_string()))
    }

    pub fn as_bool(&self) -> Result<bool> {
        match &self.value {
            Some(ConfigValue::Bool(b)) => Ok(*b),
            _ => Err(Error::Misconfigured("expected bool".into())),
        }
    }

    pub fn as_int(&self) -> Result<i64> {
        match &self.value {
            Some(ConfigValue::Int(i)) => Ok(*i),
            _ => Err(Error::Misconfigured("expected int".into())),
        }
    }

    pub fn as_float(&self) -> Result<f64> {
        match &self.value {
            Some(ConfigValue::Float(f)) => Ok(*f),
            Some(ConfigValue::Int(i)) => Ok(*i as f64),
            _ => Err(Error::Misconfigured("expected float".into())),
        }
    }

    pub fn as_str(&self) -> Result<&str> {
        match &self.value {
            Some(ConfigValue::Str(s)) => Ok(s.as_str()),
            _ => Err(Error::Misconfigured("expected string".into())),
        }
    }

    pub fn as_seconds(&self) -> Result<u64> {
        match &self.value {
            Some(ConfigValue::Seconds(s)) => Ok(*s),
            Some(ConfigValue::Int(i)) if *i >= 0 => Ok(*i as u64),
            _ => Err(Error::Misconfigured("expected duration in seconds".into())),
        }
    }

    pub fn as_celsius(&self) -> Result<f64> {
        match &self.value {
            Some(ConfigValue::Celsius(c)) => Ok(*c),
            Some(ConfigValue::Float(f)) => Ok(*f),
            _ => Err(Error::Misconfigured("expected Celsius temperature".into())),
        }
    }

    pub fn as_kelvin_delta(&self) -> Result<f64> {
        match &self.value {
            Some(ConfigValue::KelvinDelta(k)) => Ok(*k),
            Some(ConfigValue::Float(f)) => Ok(*f),
            _ => Err(Error::Misconfigured("expected Kelvin delta".into())),
        }
    }

    /// Optional child lookups, returning `None` rather than erroring when
    /// the key is absent -- used for parameters with code-level defaults.
    pub fn opt_float(&self, name: &str) -> Option<f64> {
        self.child(name).and_then(|c| c.as_float().ok())
    }

    pub fn opt_celsius(&self, name: &str) -> Option<f64> {
        self.child(name).and_then(|c| c.as_celsius().ok())
    }

    pub fn opt_seconds(&self, name: &str) -> Option<u64> {
        self.child(name).and_then(|c| c.as_seconds().ok())
    }

    pub fn opt_bool(&self, name: &str) -> Option<bool> {
        self.child(name).and_then(|c| c.as_bool().ok())
    }

    pub fn opt_str(&self, name: &str) -> Option<&str> {
        self.child(name).and_then(|c| c.as_str().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_and_reads_a_small_tree() {
        let root = ConfigNode::branch()
            .with_child("wtmax", ConfigNode::leaf(ConfigValue::Celsius(80.0)))
            .with_child("enabled", ConfigNode::leaf(ConfigValue::Bool(true)));
        assert_eq!(root.require_child("wtmax").unwrap().as_celsius().unwrap(), 80.0);
        assert!(root.require_child("enabled").unwrap().as_bool().unwrap());
        assert!(root.require_child("missing").is_err());
    }
}
