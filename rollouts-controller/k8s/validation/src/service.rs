use crate::FieldError;
use rollouts_controller_k8s_api::{
    labels::{self, POD_TEMPLATE_HASH},
    tree::Path,
    ResourceExt, Rollout, Service,
};

/// The role a Service plays for a Rollout.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ServiceType {
    Canary,
    Stable,
    Active,
    Preview,
}

#[derive(Clone, Debug)]
pub struct ServiceWithType {
    pub service: Service,
    pub service_type: ServiceType,
}

// === impl ServiceType ===

impl ServiceType {
    /// The Rollout field that names a Service with this role.
    pub fn field(self) -> Path {
        match self {
            Self::Canary => Path::from(["spec", "strategy", "canary", "canaryService"]),
            Self::Stable => Path::from(["spec", "strategy", "canary", "stableService"]),
            Self::Active => Path::from(["spec", "strategy", "blueGreen", "activeService"]),
            Self::Preview => Path::from(["spec", "strategy", "blueGreen", "previewService"]),
        }
    }
}

/// Checks that the Service is not owned by another Rollout and that its
/// selector matches the Rollout's pod template.
pub(crate) fn validate(rollout: &Rollout, svc: &ServiceWithType) -> Vec<FieldError> {
    let field = svc.service_type.field();
    let name = svc.service.name_any();

    if let Some(owner) = labels::managed_by(&svc.service.metadata) {
        if owner != rollout.name_any() {
            // A foreign owner's selector is not compared.
            return vec![FieldError::invalid(
                field,
                &name,
                format!("Service {name:?} is managed by another Rollout {owner:?}"),
            )];
        }
    }

    let Some(selector) = svc
        .service
        .spec
        .as_ref()
        .and_then(|spec| spec.selector.as_ref())
    else {
        return Vec::new();
    };
    let template = rollout.template_labels();
    selector
        .iter()
        .filter(|(key, _)| key.as_str() != POD_TEMPLATE_HASH)
        .filter(|(key, value)| template.and_then(|labels| labels.get(*key)) != Some(*value))
        .map(|(key, _)| {
            FieldError::invalid(
                field.clone(),
                &name,
                format!("Service {name:?} has unmatch label {key:?} in rollout"),
            )
        })
        .collect()
}
