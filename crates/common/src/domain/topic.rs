use crate::domain::{Category, DomainError, DomainResult};
use std::fmt;

/// Direction segment of a topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Data,
    Request,
    Response,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Data => "data",
            Self::Request => "request",
            Self::Response => "response",
        }
    }
}

/// Addressing scope of a topic: the legacy flat namespace or a
/// tenant-qualified one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicScope {
    Legacy,
    Tenant(String),
}

/// Hierarchical broker address of one device channel.
///
/// Legacy topics render as `{namespace}/{device_id}/{direction}`, tenant
/// topics as `tenants/{tenant_id}/devices/{device_id}/{namespace}/{direction}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topic {
    pub scope: TopicScope,
    pub device_id: String,
    pub category: Category,
}

fn namespace_of(category: Category) -> (&'static str, Direction) {
    match category {
        Category::TimeSeries => ("sensors", Direction::Data),
        Category::File => ("files", Direction::Data),
        Category::Event => ("events", Direction::Data),
        Category::Response => ("commands", Direction::Response),
        Category::Command => ("commands", Direction::Request),
    }
}

fn category_of(namespace: &str, direction: &str) -> Option<Category> {
    match (namespace, direction) {
        ("sensors", "data") => Some(Category::TimeSeries),
        ("files", "data") => Some(Category::File),
        ("events", "data") => Some(Category::Event),
        ("commands", "response") => Some(Category::Response),
        ("commands", "request") => Some(Category::Command),
        _ => None,
    }
}

/// True when `segment` can be embedded in a topic as a single level.
pub fn is_valid_topic_segment(segment: &str) -> bool {
    !segment.is_empty() && !segment.contains(['/', '+', '#'])
}

impl Topic {
    pub fn new(scope: TopicScope, device_id: impl Into<String>, category: Category) -> Self {
        Self {
            scope,
            device_id: device_id.into(),
            category,
        }
    }

    pub fn legacy(device_id: impl Into<String>, category: Category) -> Self {
        Self::new(TopicScope::Legacy, device_id, category)
    }

    pub fn tenant(
        tenant_id: impl Into<String>,
        device_id: impl Into<String>,
        category: Category,
    ) -> Self {
        Self::new(TopicScope::Tenant(tenant_id.into()), device_id, category)
    }

    pub fn direction(&self) -> Direction {
        namespace_of(self.category).1
    }

    pub fn tenant_id(&self) -> Option<&str> {
        match &self.scope {
            TopicScope::Legacy => None,
            TopicScope::Tenant(tenant_id) => Some(tenant_id),
        }
    }

    /// Parse a concrete (wildcard free) topic back into its parts.
    pub fn parse(topic: &str) -> DomainResult<Self> {
        let parts: Vec<&str> = topic.split('/').collect();

        let (scope, device_id, namespace, direction) = match parts.as_slice() {
            [namespace, device_id, direction] => (TopicScope::Legacy, *device_id, *namespace, *direction),
            ["tenants", tenant_id, "devices", device_id, namespace, direction] => {
                if !is_valid_topic_segment(tenant_id) {
                    return Err(DomainError::InvalidTopic(format!(
                        "empty or invalid tenant ID in topic '{}'",
                        topic
                    )));
                }
                (
                    TopicScope::Tenant(tenant_id.to_string()),
                    *device_id,
                    *namespace,
                    *direction,
                )
            }
            _ => {
                return Err(DomainError::InvalidTopic(format!(
                    "unrecognised topic layout '{}'",
                    topic
                )))
            }
        };

        if !is_valid_topic_segment(device_id) {
            return Err(DomainError::InvalidTopic(format!(
                "empty or invalid device ID in topic '{}'",
                topic
            )));
        }

        let category = category_of(namespace, direction).ok_or_else(|| {
            DomainError::InvalidTopic(format!(
                "unknown channel '{}/{}' in topic '{}'",
                namespace, direction, topic
            ))
        })?;

        Ok(Self::new(scope, device_id, category))
    }

    /// Wildcard filter matching this category across every legacy device.
    pub fn legacy_filter(category: Category) -> String {
        let (namespace, direction) = namespace_of(category);
        format!("{}/+/{}", namespace, direction.as_str())
    }

    /// Wildcard filter matching this category across every tenant and device.
    pub fn tenant_filter(category: Category) -> String {
        let (namespace, direction) = namespace_of(category);
        format!("tenants/+/devices/+/{}/{}", namespace, direction.as_str())
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (namespace, direction) = namespace_of(self.category);
        match &self.scope {
            TopicScope::Legacy => write!(
                f,
                "{}/{}/{}",
                namespace,
                self.device_id,
                direction.as_str()
            ),
            TopicScope::Tenant(tenant_id) => write!(
                f,
                "tenants/{}/devices/{}/{}/{}",
                tenant_id,
                self.device_id,
                namespace,
                direction.as_str()
            ),
        }
    }
}
