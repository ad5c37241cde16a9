#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod analysis;
pub mod duration;
pub mod labels;
pub mod rollout;
pub mod store;
pub mod tree;

pub use self::{
    analysis::{AnalysisTemplate, AnalysisTemplateSpec},
    rollout::{Rollout, RolloutSpec},
    store::{ResourceStore, StoreError, StoreFactory},
};
pub use k8s_openapi::api::{
    self,
    core::v1::{Service, ServiceSpec},
    networking::v1::Ingress,
};
pub use kube::{
    api::{ObjectMeta, ResourceExt},
    core::DynamicObject,
    discovery::ApiResource,
    Client,
};
