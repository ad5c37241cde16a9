use crate::{
    backends::{Applied, Desired},
    Error, RolloutRef,
};
use anyhow::Result;
use rollouts_controller_core::{
    TrafficRoutingReconciler, WeightDestination, WeightSplit, WeightVerification,
};
use rollouts_controller_k8s_api::{
    rollout::TraefikTrafficRouting,
    store::api_resource,
    tree::Path,
    ApiResource, ResourceStore,
};
use serde_json::Value;
use std::sync::Arc;

const KIND: &str = "TraefikService";

/// Reconciles the `spec.weighted.services` of a weighted TraefikService.
pub struct Traefik {
    store: Arc<dyn ResourceStore>,
    namespace: String,
    name: String,
    canary_service: String,
    stable_service: String,
}

pub fn resource(group: &str) -> ApiResource {
    api_resource(group, "v1alpha1", KIND, "traefikservices")
}

// === impl Traefik ===

impl Traefik {
    pub fn new(
        store: Arc<dyn ResourceStore>,
        target: &RolloutRef,
        config: &TraefikTrafficRouting,
    ) -> Result<Self, Error> {
        let (canary_service, stable_service) = target.services()?;
        Ok(Self {
            store,
            namespace: target.namespace.clone(),
            name: config.weighted_traefik_service_name.clone(),
            canary_service,
            stable_service,
        })
    }

    fn apply(&self, data: &mut Value, split: WeightSplit<'_>) -> Result<Applied, Error> {
        let desired = Desired {
            canary_service: &self.canary_service,
            stable_service: &self.stable_service,
            split,
        };
        let applied = desired
            .apply(data, &Path::from(["spec", "weighted", "services"]), "name")
            .map_err(Error::invalid(KIND, &self.name))?;
        desired.require(&applied, KIND, &self.name)?;
        Ok(applied)
    }
}

#[async_trait::async_trait]
impl TrafficRoutingReconciler for Traefik {
    fn kind(&self) -> &'static str {
        "Traefik"
    }

    async fn set_weight(&self, desired: i32, additional: &[WeightDestination]) -> Result<()> {
        let split = WeightSplit::new(desired, additional)?;
        let mut svc = self.store.get(&self.namespace, &self.name).await?;
        if self.apply(&mut svc.data, split)?.changed {
            self.store.update(&svc).await?;
            tracing::info!(service = %self.name, weight = desired, "Updated TraefikService");
        }
        Ok(())
    }

    async fn verify_weight(
        &self,
        desired: i32,
        additional: &[WeightDestination],
    ) -> Result<WeightVerification> {
        let split = WeightSplit::new(desired, additional)?;
        let svc = self.store.get(&self.namespace, &self.name).await?;
        let mut data = svc.data;
        let applied = self.apply(&mut data, split)?;
        Ok(WeightVerification::from_matched(!applied.changed))
    }
}
