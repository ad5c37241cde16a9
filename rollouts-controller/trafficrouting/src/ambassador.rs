//! Ambassador splits traffic with a second Mapping: for each base Mapping
//! routing to the stable service, a `<base>-canary` Mapping with the same
//! routing rules targets the canary service with a `weight`.

use crate::{Error, RolloutRef};
use anyhow::Result;
use rollouts_controller_core::{
    canary_name, fanout, TrafficRoutingReconciler, WeightDestination, WeightSplit,
    WeightVerification,
};
use rollouts_controller_k8s_api::{
    labels::managed_by_annotations,
    rollout::AmbassadorTrafficRouting,
    store::{api_resource, split_api_version},
    tree, ApiResource, DynamicObject, ObjectMeta, ResourceStore,
};
use serde_json::Value;
use std::{sync::Arc, time::Duration};

const KIND: &str = "Mapping";

pub struct Ambassador {
    store: Arc<dyn ResourceStore>,
    namespace: String,
    rollout: String,
    canary_service: String,
    mappings: Vec<String>,
    cleanup_delay: Duration,
}

pub fn resource(api_version: &str) -> ApiResource {
    let (group, version) = split_api_version(api_version);
    api_resource(group, version, KIND, "mappings")
}

// === impl Ambassador ===

impl Ambassador {
    pub fn new(
        store: Arc<dyn ResourceStore>,
        target: &RolloutRef,
        config: &AmbassadorTrafficRouting,
        cleanup_delay: Duration,
    ) -> Result<Self, Error> {
        let (canary_service, _) = target.services()?;
        Ok(Self {
            store,
            namespace: target.namespace.clone(),
            rollout: target.name.clone(),
            canary_service,
            mappings: config.mappings.clone(),
            cleanup_delay,
        })
    }

    async fn reconcile(&self, base_name: &str, weight: i32) -> Result<()> {
        // The base Mapping must exist even if there's nothing to do.
        let base = self.store.get(&self.namespace, base_name).await?;
        let name = canary_name(base_name);

        let mut canary = match self.store.get(&self.namespace, &name).await {
            Ok(canary) => canary,
            Err(error) if error.is_not_found() => {
                if weight == 0 {
                    tracing::debug!(mapping = %name, "No canary Mapping to remove");
                    return Ok(());
                }
                let canary = self.canary_mapping(&base, &name, weight)?;
                self.store.create(&canary).await?;
                tracing::info!(mapping = %name, weight, "Created canary Mapping");
                return Ok(());
            }
            Err(error) => return Err(error.into()),
        };

        let current = tree::int64(&canary.data, ["spec", "weight"]).ok();
        if current != Some(i64::from(weight)) {
            tree::set(&mut canary.data, ["spec", "weight"], Value::from(weight))
                .map_err(Error::invalid(KIND, &name))?;
            self.store.update(&canary).await?;
            tracing::info!(mapping = %name, weight, "Updated canary Mapping");
        }

        if weight == 0 {
            // Drain in-flight requests before the Mapping disappears.
            tokio::time::sleep(self.cleanup_delay).await;
            self.store.delete(&self.namespace, &name).await?;
            tracing::info!(mapping = %name, "Deleted canary Mapping");
        }
        Ok(())
    }

    fn canary_mapping(
        &self,
        base: &DynamicObject,
        name: &str,
        weight: i32,
    ) -> Result<DynamicObject, Error> {
        let invalid = Error::invalid(KIND, name);
        let mut data = base.data.clone();
        let base_service = tree::string(&data, ["spec", "service"]).map_err(invalid)?;
        let service = canary_host(base_service, &self.canary_service);
        tree::set(&mut data, ["spec", "service"], Value::from(service)).map_err(invalid)?;
        tree::set(&mut data, ["spec", "weight"], Value::from(weight)).map_err(invalid)?;
        Ok(DynamicObject {
            types: base.types.clone(),
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(self.namespace.clone()),
                annotations: Some(managed_by_annotations(&self.rollout)),
                ..Default::default()
            },
            data,
        })
    }
}

#[async_trait::async_trait]
impl TrafficRoutingReconciler for Ambassador {
    fn kind(&self) -> &'static str {
        "Ambassador"
    }

    async fn set_weight(&self, desired: i32, additional: &[WeightDestination]) -> Result<()> {
        WeightSplit::new(desired, additional)?;
        fanout::reconcile_all(self.mappings.iter().map(String::as_str), |name| {
            self.reconcile(name, desired)
        })
        .await
    }

    async fn verify_weight(&self, _: i32, _: &[WeightDestination]) -> Result<WeightVerification> {
        Ok(WeightVerification::NotApplicable)
    }
}

/// Replaces the host of a Mapping's `service`, keeping a numeric port
/// suffix.
fn canary_host(base_service: &str, canary_service: &str) -> String {
    match base_service.rsplit_once(':') {
        Some((_, port)) if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => {
            format!("{canary_service}:{port}")
        }
        _ => canary_service.to_string(),
    }
}
