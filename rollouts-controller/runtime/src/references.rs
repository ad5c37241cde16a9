//! Fetches the objects a Rollout references so that they can be validated
//! together.

use crate::{
    k8s::{
        rollout::AnalysisTemplateRef,
        store::ClientStores,
        AnalysisTemplate, Client, DynamicObject, Ingress, ResourceExt, Rollout,
        Service, StoreFactory,
    },
    trafficrouting::{ambassador, appmesh, gateway, AppMesh, Config, RolloutRef},
    validation::{
        AnalysisTemplatesWithType, ReferencedResources, ServiceType, ServiceWithType, TemplateType,
    },
};
use anyhow::{Context, Result};
use kube::Api;

pub(crate) async fn fetch(
    client: &Client,
    rollout: &Rollout,
    config: &Config,
) -> Result<ReferencedResources> {
    let namespace = rollout.namespace().context("Rollout has no namespace")?;
    let stores = ClientStores::new(client.clone());
    let mut referenced = ReferencedResources::default();

    let services = Api::<Service>::namespaced(client.clone(), &namespace);
    for (service_type, name) in service_refs(rollout) {
        let service = services
            .get(name)
            .await
            .with_context(|| format!("failed to get {service_type:?} service {name}"))?;
        referenced.services.push(ServiceWithType {
            service,
            service_type,
        });
    }

    let templates = Api::<AnalysisTemplate>::namespaced(client.clone(), &namespace);
    for (template_type, refs) in template_refs(rollout) {
        let mut fetched = Vec::with_capacity(refs.len());
        for r in refs {
            if r.cluster_scope.unwrap_or(false) {
                tracing::debug!(template = %r.template_name, "Skipping cluster-scoped template");
                continue;
            }
            let template = templates
                .get(&r.template_name)
                .await
                .with_context(|| format!("failed to get AnalysisTemplate {}", r.template_name))?;
            fetched.push(template);
        }
        referenced.analysis_templates.push(AnalysisTemplatesWithType {
            templates: fetched,
            template_type,
        });
    }

    let ingresses = Api::<Ingress>::namespaced(client.clone(), &namespace);
    for name in ingress_names(rollout) {
        let ingress = ingresses
            .get(name)
            .await
            .with_context(|| format!("failed to get Ingress {name}"))?;
        referenced.ingresses.push(ingress);
    }

    let Some(routing) = rollout.traffic_routing() else {
        return Ok(referenced);
    };

    if let Some(settings) = &routing.ambassador {
        let mappings = stores.store(ambassador::resource(&config.ambassador_api_version));
        for name in &settings.mappings {
            referenced
                .ambassador_mappings
                .push(mappings.get(&namespace, name).await?);
        }
    }

    if let Some(app_mesh) = &routing.app_mesh {
        let target = RolloutRef::new(rollout)?;
        let app_mesh = AppMesh::new(
            stores.store(appmesh::virtual_service_resource()),
            stores.store(appmesh::virtual_router_resource()),
            stores.store(appmesh::virtual_node_resource()),
            &target,
            app_mesh,
        )?;
        referenced
            .app_mesh_virtual_routers
            .push(app_mesh.virtual_router().await?);
    }

    if let Some(gateway_api) = &routing.gateway_api {
        let routes = stores.store(gateway::resource());
        let route_ns = gateway_api.namespace.as_deref().unwrap_or(&namespace);
        for name in gateway_api.route_names() {
            let route: DynamicObject = routes.get(route_ns, name).await?;
            referenced.http_routes.push(route);
        }
    }

    tracing::debug!(
        services = referenced.services.len(),
        analysis_templates = referenced.analysis_templates.len(),
        ingresses = referenced.ingresses.len(),
        mappings = referenced.ambassador_mappings.len(),
        virtual_routers = referenced.app_mesh_virtual_routers.len(),
        http_routes = referenced.http_routes.len(),
        "Fetched referenced resources"
    );
    Ok(referenced)
}

/// The services a Rollout's strategy names, by role.
fn service_refs(rollout: &Rollout) -> Vec<(ServiceType, &str)> {
    let strategy = &rollout.spec.strategy;
    let mut refs = Vec::new();
    if let Some(canary) = &strategy.canary {
        refs.extend(
            canary
                .canary_service
                .as_deref()
                .map(|name| (ServiceType::Canary, name)),
        );
        refs.extend(
            canary
                .stable_service
                .as_deref()
                .map(|name| (ServiceType::Stable, name)),
        );
    }
    if let Some(blue_green) = &strategy.blue_green {
        refs.push((ServiceType::Active, blue_green.active_service.as_str()));
        refs.extend(
            blue_green
                .preview_service
                .as_deref()
                .map(|name| (ServiceType::Preview, name)),
        );
    }
    refs.retain(|(_, name)| !name.is_empty());
    refs
}

/// Every place the Rollout references analysis templates.
fn template_refs(rollout: &Rollout) -> Vec<(TemplateType, &[AnalysisTemplateRef])> {
    let steps = rollout
        .canary()
        .and_then(|canary| canary.steps.as_deref())
        .unwrap_or_default();
    let inline = steps
        .iter()
        .enumerate()
        .filter(|(_, step)| step.analysis.is_some())
        .map(|(step, _)| TemplateType::Inline { step });

    [
        TemplateType::PrePromotion,
        TemplateType::PostPromotion,
        TemplateType::Background,
    ]
    .into_iter()
    .chain(inline)
    .filter_map(|template_type| {
        let analysis = template_type.analysis(rollout)?;
        Some((template_type, analysis.templates.as_slice()))
    })
    .collect()
}

/// The ingresses named by NGINX and ALB traffic routing.
fn ingress_names(rollout: &Rollout) -> Vec<&str> {
    let Some(routing) = rollout.traffic_routing() else {
        return Vec::new();
    };
    let mut names = Vec::new();
    if let Some(nginx) = &routing.nginx {
        names.extend(nginx.stable_ingress.as_deref());
        names.extend(nginx.stable_ingresses.iter().flatten().map(String::as_str));
    }
    if let Some(alb) = &routing.alb {
        names.extend(alb.ingress.as_deref());
        names.extend(alb.ingresses.iter().flatten().map(String::as_str));
    }
    names
}
