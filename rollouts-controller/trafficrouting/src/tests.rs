mod appmesh;
mod traefik;

use async_trait::async_trait;
use parking_lot::Mutex;
use rollouts_controller_k8s_api::{
    store::StoreError, ApiResource, DynamicObject, ResourceExt, ResourceStore, StoreFactory,
};
use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

/// An in-memory [`ResourceStore`] that records every write.
pub struct MemoryStore {
    resource: ApiResource,
    objects: Mutex<BTreeMap<(String, String), DynamicObject>>,
    writes: Mutex<Vec<Write>>,
    failures: Mutex<HashMap<String, String>>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Write {
    Create(String),
    Update(String),
    Delete(String),
}

/// Hands out one [`MemoryStore`] per resource kind.
#[derive(Default)]
pub struct MemoryStores(Mutex<HashMap<String, Arc<MemoryStore>>>);

pub fn obj(value: serde_json::Value) -> DynamicObject {
    serde_json::from_value(value).expect("object must parse")
}

// === impl MemoryStore ===

impl MemoryStore {
    pub fn new(resource: ApiResource) -> Arc<Self> {
        Arc::new(Self {
            resource,
            objects: Mutex::default(),
            writes: Mutex::default(),
            failures: Mutex::default(),
        })
    }

    pub fn insert(&self, value: serde_json::Value) {
        let obj = obj(value);
        let key = (obj.namespace().expect("namespace"), obj.name_any());
        self.objects.lock().insert(key, obj);
    }

    pub fn data(&self, namespace: &str, name: &str) -> Option<serde_json::Value> {
        self.objects
            .lock()
            .get(&(namespace.to_string(), name.to_string()))
            .map(|o| o.data.clone())
    }

    pub fn writes(&self) -> Vec<Write> {
        self.writes.lock().clone()
    }

    /// Fails every subsequent call naming `name` with a server error.
    pub fn fail(&self, name: &str, message: &str) {
        self.failures
            .lock()
            .insert(name.to_string(), message.to_string());
    }

    fn check(&self, name: &str) -> Result<(), StoreError> {
        match self.failures.lock().get(name) {
            Some(message) => Err(StoreError::Kube(kube::Error::Api(
                kube::core::ErrorResponse {
                    status: "Failure".to_string(),
                    message: message.clone(),
                    reason: "InternalError".to_string(),
                    code: 500,
                },
            ))),
            None => Ok(()),
        }
    }

    fn not_found(&self, namespace: &str, name: &str) -> StoreError {
        StoreError::NotFound {
            kind: self.resource.kind.clone(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }
}

#[async_trait]
impl ResourceStore for MemoryStore {
    fn resource(&self) -> &ApiResource {
        &self.resource
    }

    async fn get(&self, namespace: &str, name: &str) -> Result<DynamicObject, StoreError> {
        self.check(name)?;
        self.objects
            .lock()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| self.not_found(namespace, name))
    }

    async fn create(&self, obj: &DynamicObject) -> Result<DynamicObject, StoreError> {
        let name = obj.name_any();
        self.check(&name)?;
        let key = (obj.namespace().unwrap_or_default(), name.clone());
        let mut objects = self.objects.lock();
        assert!(!objects.contains_key(&key), "{name} already exists");
        objects.insert(key, obj.clone());
        self.writes.lock().push(Write::Create(name));
        Ok(obj.clone())
    }

    async fn update(&self, obj: &DynamicObject) -> Result<DynamicObject, StoreError> {
        let name = obj.name_any();
        self.check(&name)?;
        let namespace = obj.namespace().unwrap_or_default();
        let mut objects = self.objects.lock();
        let Some(existing) = objects.get_mut(&(namespace.clone(), name.clone())) else {
            return Err(self.not_found(&namespace, &name));
        };
        *existing = obj.clone();
        self.writes.lock().push(Write::Update(name));
        Ok(obj.clone())
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        self.check(name)?;
        self.objects
            .lock()
            .remove(&(namespace.to_string(), name.to_string()))
            .ok_or_else(|| self.not_found(namespace, name))?;
        self.writes.lock().push(Write::Delete(name.to_string()));
        Ok(())
    }
}

// === impl MemoryStores ===

impl MemoryStores {
    pub fn get(&self, kind: &str) -> Arc<MemoryStore> {
        self.0
            .lock()
            .get(kind)
            .cloned()
            .unwrap_or_else(|| panic!("no store for {kind}"))
    }
}

impl StoreFactory for MemoryStores {
    fn store(&self, resource: ApiResource) -> Arc<dyn ResourceStore> {
        self.0
            .lock()
            .entry(resource.kind.clone())
            .or_insert_with(|| MemoryStore::new(resource))
            .clone()
    }
}
