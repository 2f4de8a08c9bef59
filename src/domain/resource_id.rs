//! Typed ARM resource identifiers
//!
//! Parses `/subscriptions/{sub}/resourceGroups/{rg}/providers/{ns}/{type}/{name}`
//! (with optional nested `{child-type}/{child-name}` pairs) into a structured
//! path instead of indexing into `split('/')`.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A parsed ARM resource identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceId {
    subscription_id: String,
    resource_group: Option<String>,
    namespace: Option<String>,
    /// `(type, name)` pairs from outermost to innermost
    segments: Vec<(String, String)>,
}

impl ResourceId {
    /// Identifier of a subscription
    pub fn subscription(subscription_id: impl Into<String>) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            resource_group: None,
            namespace: None,
            segments: Vec::new(),
        }
    }

    /// Identifier of a resource group
    pub fn resource_group(subscription_id: impl Into<String>, resource_group: impl Into<String>) -> Self {
        Self {
            resource_group: Some(resource_group.into()),
            ..Self::subscription(subscription_id)
        }
    }

    /// Identifier of a top-level resource inside a resource group
    pub fn resource(
        subscription_id: impl Into<String>,
        resource_group: impl Into<String>,
        namespace: impl Into<String>,
        resource_type: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            resource_group: Some(resource_group.into()),
            namespace: Some(namespace.into()),
            segments: vec![(resource_type.into(), name.into())],
        }
    }

    /// Identifier of a child resource (e.g. a subnet of a virtual network)
    pub fn child(&self, resource_type: impl Into<String>, name: impl Into<String>) -> Result<Self> {
        if self.namespace.is_none() {
            return Err(Error::InvalidResourceId {
                id: self.to_string(),
                reason: "child resources require a provider namespace".into(),
            });
        }
        let mut child = self.clone();
        child.segments.push((resource_type.into(), name.into()));
        Ok(child)
    }

    /// Identifier of the enclosing resource, if any
    pub fn parent(&self) -> Option<Self> {
        let mut parent = self.clone();
        if parent.segments.len() > 1 {
            parent.segments.pop();
            Some(parent)
        } else if !parent.segments.is_empty() {
            parent.segments.clear();
            parent.namespace = None;
            Some(parent)
        } else if parent.resource_group.is_some() {
            parent.resource_group = None;
            Some(parent)
        } else {
            None
        }
    }

    pub fn subscription_id(&self) -> &str {
        &self.subscription_id
    }

    pub fn resource_group_name(&self) -> Option<&str> {
        self.resource_group.as_deref()
    }

    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// Innermost resource name, falling back to the group or subscription
    pub fn name(&self) -> &str {
        self.segments
            .last()
            .map(|(_, name)| name.as_str())
            .or(self.resource_group.as_deref())
            .unwrap_or(&self.subscription_id)
    }

    /// Innermost type segment (e.g. `networkInterfaces`)
    pub fn type_segment(&self) -> Option<&str> {
        self.segments.last().map(|(t, _)| t.as_str())
    }

    /// Fully qualified resource type (e.g. `Microsoft.Network/virtualNetworks/subnets`)
    pub fn resource_type(&self) -> Option<String> {
        let namespace = self.namespace.as_ref()?;
        let types: Vec<&str> = self.segments.iter().map(|(t, _)| t.as_str()).collect();
        Some(format!("{}/{}", namespace, types.join("/")))
    }

    pub fn segments(&self) -> &[(String, String)] {
        &self.segments
    }

    /// Case-insensitive comparison, the way ARM treats identifiers
    pub fn matches(&self, other: &ResourceId) -> bool {
        self.to_string().eq_ignore_ascii_case(&other.to_string())
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/subscriptions/{}", self.subscription_id)?;
        if let Some(rg) = &self.resource_group {
            write!(f, "/resourceGroups/{}", rg)?;
        }
        if let Some(ns) = &self.namespace {
            write!(f, "/providers/{}", ns)?;
        }
        for (resource_type, name) in &self.segments {
            write!(f, "/{}/{}", resource_type, name)?;
        }
        Ok(())
    }
}

impl FromStr for ResourceId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = |reason: &str| Error::InvalidResourceId {
            id: s.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = s.trim().trim_end_matches('/');
        let rest = trimmed
            .strip_prefix('/')
            .ok_or_else(|| invalid("must start with '/'"))?;
        let parts: Vec<&str> = rest.split('/').collect();
        if parts.iter().any(|p| p.is_empty()) {
            return Err(invalid("empty path segment"));
        }

        let mut iter = parts.into_iter();
        match iter.next() {
            Some(kw) if kw.eq_ignore_ascii_case("subscriptions") => {}
            _ => return Err(invalid("expected 'subscriptions' segment")),
        }
        let subscription_id = iter
            .next()
            .ok_or_else(|| invalid("missing subscription id"))?
            .to_string();

        let mut id = ResourceId::subscription(subscription_id);

        match iter.next() {
            None => return Ok(id),
            Some(kw) if kw.eq_ignore_ascii_case("resourceGroups") => {
                let rg = iter.next().ok_or_else(|| invalid("missing resource group name"))?;
                id.resource_group = Some(rg.to_string());
            }
            Some(_) => return Err(invalid("expected 'resourceGroups' segment")),
        }

        match iter.next() {
            None => return Ok(id),
            Some(kw) if kw.eq_ignore_ascii_case("providers") => {
                let ns = iter.next().ok_or_else(|| invalid("missing provider namespace"))?;
                id.namespace = Some(ns.to_string());
            }
            Some(_) => return Err(invalid("expected 'providers' segment")),
        }

        let remaining: Vec<&str> = iter.collect();
        if remaining.is_empty() {
            return Err(invalid("missing resource type and name"));
        }
        if remaining.len() % 2 != 0 {
            return Err(invalid("resource type without a name"));
        }
        id.segments = remaining
            .chunks(2)
            .map(|pair| (pair[0].to_string(), pair[1].to_string()))
            .collect();

        Ok(id)
    }
}

impl TryFrom<String> for ResourceId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<ResourceId> for String {
    fn from(id: ResourceId) -> Self {
        id.to_string()
    }
}
