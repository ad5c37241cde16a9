#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

//! Traffic routing reconcilers for the providers a Rollout can be configured
//! with. Each provider manipulates its vendor resources as schemaless
//! documents through a [`ResourceStore`].

pub mod ambassador;
pub mod apisix;
pub mod appmesh;
mod backends;
pub mod gateway;
mod metrics;
pub mod openshift;
pub mod traefik;

#[cfg(test)]
mod tests;

pub use self::{
    ambassador::Ambassador,
    apisix::Apisix,
    appmesh::AppMesh,
    gateway::GatewayApi,
    metrics::{Instrumented, ReconcileMetrics},
    openshift::OpenShift,
    traefik::Traefik,
};
use rollouts_controller_core::{TrafficRoutingReconciler, WeightError};
use rollouts_controller_k8s_api::{
    store::StoreError, tree, ResourceExt, Rollout, StoreFactory,
};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("rollout is missing {0}")]
    MissingConfig(&'static str),

    #[error("{kind} {name} is invalid: {error}")]
    Invalid {
        kind: &'static str,
        name: String,
        error: tree::Error,
    },

    #[error("{role} service {service} not found in {kind} {name}")]
    ServiceNotFound {
        kind: &'static str,
        name: String,
        role: &'static str,
        service: String,
    },

    #[error("{kind} {name} has no route named {route}")]
    RouteNotFound {
        kind: &'static str,
        name: String,
        route: String,
    },

    #[error("route {route} in {kind} {name} has no supported route type")]
    UnsupportedRoute {
        kind: &'static str,
        name: String,
        route: String,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Weight(#[from] WeightError),
}

/// Provider settings that are not part of the Rollout itself.
#[derive(Clone, Debug)]
pub struct Config {
    pub ambassador_api_version: String,
    pub apisix_api_version: String,
    pub traefik_api_group: String,

    /// How long a canary Mapping set to zero weight is kept before it is
    /// deleted, so that in-flight requests drain.
    pub canary_mapping_cleanup_delay: Duration,
}

/// The Rollout-level facts a reconciler needs.
#[derive(Clone, Debug, Default)]
pub struct RolloutRef {
    pub name: String,
    pub namespace: String,
    pub canary_service: String,
    pub stable_service: String,
}

pub type Reconcilers = Vec<Box<dyn TrafficRoutingReconciler>>;

/// Builds one reconciler per provider configured on the Rollout.
pub fn new_reconcilers(
    rollout: &Rollout,
    stores: &dyn StoreFactory,
    config: &Config,
) -> Result<Reconcilers, Error> {
    let Some(routing) = rollout.traffic_routing() else {
        return Ok(Vec::new());
    };
    let target = RolloutRef::new(rollout)?;
    let managed_routes = routing
        .managed_route_names()
        .map(str::to_string)
        .collect::<Vec<_>>();

    let mut reconcilers: Reconcilers = Vec::new();
    if let Some(ambassador) = &routing.ambassador {
        let store = stores.store(ambassador::resource(&config.ambassador_api_version));
        reconcilers.push(Box::new(Ambassador::new(
            store,
            &target,
            ambassador,
            config.canary_mapping_cleanup_delay,
        )?));
    }
    if let Some(apisix) = &routing.apisix {
        let store = stores.store(apisix::resource(&config.apisix_api_version));
        reconcilers.push(Box::new(Apisix::new(
            store,
            &target,
            apisix,
            managed_routes.clone(),
        )?));
    }
    if let Some(app_mesh) = &routing.app_mesh {
        reconcilers.push(Box::new(AppMesh::new(
            stores.store(appmesh::virtual_service_resource()),
            stores.store(appmesh::virtual_router_resource()),
            stores.store(appmesh::virtual_node_resource()),
            &target,
            app_mesh,
        )?));
    }
    if let Some(traefik) = &routing.traefik {
        let store = stores.store(traefik::resource(&config.traefik_api_group));
        reconcilers.push(Box::new(Traefik::new(store, &target, traefik)?));
    }
    if let Some(openshift) = &routing.openshift {
        let store = stores.store(openshift::resource());
        reconcilers.push(Box::new(OpenShift::new(store, &target, openshift)?));
    }
    if let Some(gateway) = &routing.gateway_api {
        let store = stores.store(gateway::resource());
        reconcilers.push(Box::new(GatewayApi::new(store, &target, gateway)?));
    }

    tracing::debug!(
        rollout = %target.name,
        namespace = %target.namespace,
        kinds = ?reconcilers.iter().map(|r| r.kind()).collect::<Vec<_>>(),
        "Built traffic routing reconcilers"
    );
    Ok(reconcilers)
}

// === impl Error ===

impl Error {
    /// Attributes a document error to the named resource.
    pub(crate) fn invalid<'a>(
        kind: &'static str,
        name: &'a str,
    ) -> impl Fn(tree::Error) -> Self + Copy + 'a {
        move |error| Self::Invalid {
            kind,
            name: name.to_string(),
            error,
        }
    }
}

// === impl Config ===

impl Default for Config {
    fn default() -> Self {
        Self {
            ambassador_api_version: "getambassador.io/v2".to_string(),
            apisix_api_version: "apisix.apache.org/v2".to_string(),
            traefik_api_group: "traefik.containo.us".to_string(),
            canary_mapping_cleanup_delay: Duration::from_secs(5),
        }
    }
}

// === impl RolloutRef ===

impl RolloutRef {
    pub fn new(rollout: &Rollout) -> Result<Self, Error> {
        let canary = rollout
            .canary()
            .ok_or(Error::MissingConfig("spec.strategy.canary"))?;
        let namespace = rollout
            .namespace()
            .ok_or(Error::MissingConfig("metadata.namespace"))?;
        Ok(Self {
            name: rollout.name_any(),
            namespace,
            canary_service: canary.canary_service.clone().unwrap_or_default(),
            stable_service: canary.stable_service.clone().unwrap_or_default(),
        })
    }

    /// Returns the canary and stable service names, which name-based
    /// providers require.
    pub(crate) fn services(&self) -> Result<(String, String), Error> {
        if self.canary_service.is_empty() {
            return Err(Error::MissingConfig("spec.strategy.canary.canaryService"));
        }
        if self.stable_service.is_empty() {
            return Err(Error::MissingConfig("spec.strategy.canary.stableService"));
        }
        Ok((self.canary_service.clone(), self.stable_service.clone()))
    }
}
