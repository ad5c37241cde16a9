#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

//! Pre-flight consistency checks between a Rollout and the resources it
//! references.
//!
//! Validation has no side effects and never stops at the first finding: every
//! referenced object is checked and all findings are returned together.

mod analysis;
mod field;
mod ingress;
mod routers;
mod service;


pub use self::{
    analysis::{AnalysisTemplatesWithType, TemplateType},
    field::{ErrorType, FieldError},
    service::{ServiceType, ServiceWithType},
};
use rollouts_controller_k8s_api::{DynamicObject, Ingress, Rollout};

/// The objects a Rollout references, fetched by the caller.
#[derive(Clone, Debug, Default)]
pub struct ReferencedResources {
    pub services: Vec<ServiceWithType>,
    pub analysis_templates: Vec<AnalysisTemplatesWithType>,
    pub ingresses: Vec<Ingress>,
    pub ambassador_mappings: Vec<DynamicObject>,
    pub app_mesh_virtual_routers: Vec<DynamicObject>,
    pub http_routes: Vec<DynamicObject>,
}

pub fn validate_rollout_referenced_resources(
    rollout: &Rollout,
    referenced: &ReferencedResources,
) -> Vec<FieldError> {
    let mut errors = Vec::new();

    for svc in &referenced.services {
        errors.extend(service::validate(rollout, svc));
    }

    for templates in &referenced.analysis_templates {
        errors.extend(analysis::validate(rollout, templates));
    }

    if let Some(routing) = rollout.traffic_routing() {
        errors.extend(ingress::validate_exclusive_fields(routing));

        let stable = rollout
            .canary()
            .and_then(|c| c.stable_service.as_deref())
            .unwrap_or_default();
        for router in &referenced.app_mesh_virtual_routers {
            errors.extend(routers::validate_virtual_router(routing, router));
        }
        for mapping in &referenced.ambassador_mappings {
            errors.extend(routers::validate_mapping(routing, stable, mapping));
        }
        for route in &referenced.http_routes {
            errors.extend(routers::validate_http_route(routing, stable, route));
        }
    }

    for ingress in &referenced.ingresses {
        errors.extend(ingress::validate(rollout, ingress));
    }

    tracing::debug!(errors = errors.len(), "Validated referenced resources");
    errors
}
