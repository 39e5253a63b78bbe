use std::path::Path;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::info;

use crate::{error::ResolverError, models::specification::NotificationSpecification};

/// Read path to stored notification specifications.
#[async_trait]
pub trait SpecificationResolver: Send + Sync {
    async fn get_by_notification_type(
        &self,
        notification_type: &str,
    ) -> Result<Option<NotificationSpecification>, ResolverError>;
}

/// Specifications held in process memory, optionally seeded from a JSON
/// array of specification documents.
#[derive(Debug, Default)]
pub struct InMemorySpecificationResolver {
    specifications: DashMap<String, NotificationSpecification>,
}

impl InMemorySpecificationResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, specification: NotificationSpecification) {
        self.specifications
            .insert(specification.notification_type().to_owned(), specification);
    }

    pub fn from_json(json: &str) -> Result<Self, ResolverError> {
        let specifications: Vec<NotificationSpecification> = serde_json::from_str(json)
            .map_err(|e| ResolverError::InvalidDocument(e.to_string()))?;

        let resolver = Self::new();
        for specification in specifications {
            resolver.insert(specification);
        }
        Ok(resolver)
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ResolverError> {
        let path = path.as_ref();
        let json = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ResolverError::Unavailable(format!("{}: {}", path.display(), e)))?;

        let resolver = Self::from_json(&json)?;
        info!(
            path = %path.display(),
            count = resolver.len(),
            "Notification specifications loaded"
        );
        Ok(resolver)
    }

    pub fn len(&self) -> usize {
        self.specifications.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specifications.is_empty()
    }
}

#[async_trait]
impl SpecificationResolver for InMemorySpecificationResolver {
    async fn get_by_notification_type(
        &self,
        notification_type: &str,
    ) -> Result<Option<NotificationSpecification>, ResolverError> {
        Ok(self
            .specifications
            .get(notification_type)
            .map(|entry| entry.value().clone()))
    }
}
