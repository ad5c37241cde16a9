use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub use crate::rollout::ArgumentValueFrom;

/// A reusable set of metrics evaluated against a rollout.
#[derive(Clone, Debug, Default, kube::CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "argoproj.io",
    version = "v1alpha1",
    kind = "AnalysisTemplate",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisTemplateSpec {
    #[serde(default)]
    pub metrics: Vec<Metric>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<Argument>>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Metric {
    pub name: String,

    /// How often the metric is measured. Without an interval the metric is
    /// measured once.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_delay: Option<String>,

    /// Number of measurements. Unset or zero with an interval means the
    /// metric runs until it is terminated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<IntOrString>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success_condition: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_condition: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_limit: Option<IntOrString>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inconclusive_limit: Option<IntOrString>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consecutive_error_limit: Option<IntOrString>,

    /// Provider configuration, keyed by provider name (`prometheus`, `web`,
    /// `job`, ...). Providers are schemaless here.
    #[serde(default)]
    pub provider: BTreeMap<String, serde_json::Value>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Argument {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_from: Option<ArgumentValueFrom>,
}

// === impl Metric ===

impl Metric {
    /// The number of measurements the metric will take, or `None` if it runs
    /// indefinitely.
    pub fn effective_count(&self) -> Option<IntOrString> {
        match &self.count {
            Some(count) if !is_zero(count) => Some(count.clone()),
            _ if self.interval.as_deref().unwrap_or_default().is_empty() => {
                Some(IntOrString::Int(1))
            }
            _ => None,
        }
    }
}

fn is_zero(v: &IntOrString) -> bool {
    match v {
        IntOrString::Int(n) => *n == 0,
        IntOrString::String(s) => s.trim() == "0",
    }
}
