//! Narrow read/write access to one kind of custom resource.
//!
//! Reconcilers never talk to a `kube::Client` directly: each is handed a
//! [`ResourceStore`] per resource kind it manages, so that in-cluster and test
//! implementations are interchangeable.

use kube::{
    api::{Api, DeleteParams, PostParams},
    core::{DynamicObject, ErrorResponse},
    discovery::ApiResource,
    Client, ResourceExt,
};
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: String,
        namespace: String,
        name: String,
    },

    #[error("{kind} is missing a {field}")]
    MissingMetadata { kind: String, field: &'static str },

    #[error(transparent)]
    Kube(#[from] kube::Error),
}

/// Get/create/update/delete for a single resource kind.
#[async_trait::async_trait]
pub trait ResourceStore: Send + Sync {
    fn resource(&self) -> &ApiResource;

    async fn get(&self, namespace: &str, name: &str) -> Result<DynamicObject, StoreError>;

    async fn create(&self, obj: &DynamicObject) -> Result<DynamicObject, StoreError>;

    async fn update(&self, obj: &DynamicObject) -> Result<DynamicObject, StoreError>;

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), StoreError>;
}

/// Resolves a resource kind to a store.
pub trait StoreFactory {
    fn store(&self, resource: ApiResource) -> Arc<dyn ResourceStore>;
}

/// A [`ResourceStore`] backed by the Kubernetes API.
#[derive(Clone)]
pub struct ApiStore {
    client: Client,
    resource: ApiResource,
}

/// Builds [`ApiStore`]s from a shared client.
#[derive(Clone)]
pub struct ClientStores(Client);

// === impl StoreError ===

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    fn from_kube(error: kube::Error, resource: &ApiResource, namespace: &str, name: &str) -> Self {
        match error {
            kube::Error::Api(ErrorResponse { code: 404, .. }) => Self::NotFound {
                kind: resource.kind.clone(),
                namespace: namespace.to_string(),
                name: name.to_string(),
            },
            error => Self::Kube(error),
        }
    }
}

// === impl ApiStore ===

impl ApiStore {
    pub fn new(client: Client, resource: ApiResource) -> Self {
        Self { client, resource }
    }

    fn api(&self, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, &self.resource)
    }

    fn identity<'o>(&self, obj: &'o DynamicObject) -> Result<(String, &'o str), StoreError> {
        let namespace = obj.namespace().ok_or_else(|| StoreError::MissingMetadata {
            kind: self.resource.kind.clone(),
            field: "namespace",
        })?;
        let name = obj
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| StoreError::MissingMetadata {
                kind: self.resource.kind.clone(),
                field: "name",
            })?;
        Ok((namespace, name))
    }
}

#[async_trait::async_trait]
impl ResourceStore for ApiStore {
    fn resource(&self) -> &ApiResource {
        &self.resource
    }

    async fn get(&self, namespace: &str, name: &str) -> Result<DynamicObject, StoreError> {
        tracing::trace!(kind = %self.resource.kind, %namespace, %name, "Get");
        self.api(namespace)
            .get(name)
            .await
            .map_err(|e| StoreError::from_kube(e, &self.resource, namespace, name))
    }

    async fn create(&self, obj: &DynamicObject) -> Result<DynamicObject, StoreError> {
        let (namespace, name) = self.identity(obj)?;
        tracing::debug!(kind = %self.resource.kind, %namespace, %name, "Create");
        self.api(&namespace)
            .create(&PostParams::default(), obj)
            .await
            .map_err(|e| StoreError::from_kube(e, &self.resource, &namespace, name))
    }

    async fn update(&self, obj: &DynamicObject) -> Result<DynamicObject, StoreError> {
        let (namespace, name) = self.identity(obj)?;
        tracing::debug!(kind = %self.resource.kind, %namespace, %name, "Update");
        self.api(&namespace)
            .replace(name, &PostParams::default(), obj)
            .await
            .map_err(|e| StoreError::from_kube(e, &self.resource, &namespace, name))
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        tracing::debug!(kind = %self.resource.kind, %namespace, %name, "Delete");
        self.api(namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map_err(|e| StoreError::from_kube(e, &self.resource, namespace, name))?;
        Ok(())
    }
}

// === impl ClientStores ===

impl ClientStores {
    pub fn new(client: Client) -> Self {
        Self(client)
    }
}

impl StoreFactory for ClientStores {
    fn store(&self, resource: ApiResource) -> Arc<dyn ResourceStore> {
        Arc::new(ApiStore::new(self.0.clone(), resource))
    }
}

/// Describes a custom resource kind that has no generated bindings.
pub fn api_resource(group: &str, version: &str, kind: &str, plural: &str) -> ApiResource {
    ApiResource {
        group: group.to_string(),
        version: version.to_string(),
        api_version: if group.is_empty() {
            version.to_string()
        } else {
            format!("{group}/{version}")
        },
        kind: kind.to_string(),
        plural: plural.to_string(),
    }
}

/// Splits an `apiVersion` such as `getambassador.io/v2` into group and
/// version.
pub fn split_api_version(api_version: &str) -> (&str, &str) {
    match api_version.split_once('/') {
        Some((group, version)) => (group, version),
        None => ("", api_version),
    }
}
