use crate::FieldError;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use regex::{Captures, Regex};
use rollouts_controller_k8s_api::{
    analysis::{Argument, Metric},
    duration,
    rollout::{AnalysisRunArgument, RolloutAnalysis},
    tree::Path,
    AnalysisTemplate, ResourceExt, Rollout,
};
use std::{collections::BTreeMap, sync::LazyLock};

/// Matches `{{args.name}}` references in a metric.
static ARG_REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*args\.([A-Za-z0-9_.\-]+)\s*\}\}").expect("pattern must compile")
});

/// Stands in for arguments whose values are only known when a run starts.
const VALUE_FROM_PLACEHOLDER: &str = "placeholder";

/// Where in the Rollout a set of templates is referenced.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum TemplateType {
    PrePromotion,
    PostPromotion,
    Background,
    Inline { step: usize },
}

#[derive(Clone, Debug)]
pub struct AnalysisTemplatesWithType {
    pub templates: Vec<AnalysisTemplate>,
    pub template_type: TemplateType,
}

// === impl TemplateType ===

impl TemplateType {
    pub fn field(self) -> Path {
        match self {
            Self::PrePromotion => {
                Path::from(["spec", "strategy", "blueGreen", "prePromotionAnalysis", "templates"])
            }
            Self::PostPromotion => {
                Path::from(["spec", "strategy", "blueGreen", "postPromotionAnalysis", "templates"])
            }
            Self::Background => Path::from(["spec", "strategy", "canary", "analysis", "templates"]),
            Self::Inline { step } => Path::from(["spec", "strategy", "canary", "steps"])
                .index(step)
                .field("analysis")
                .field("templates"),
        }
    }

    /// The Rollout's reference to the templates, which carries the arguments
    /// passed to them.
    pub fn analysis(self, rollout: &Rollout) -> Option<&RolloutAnalysis> {
        let strategy = &rollout.spec.strategy;
        match self {
            Self::PrePromotion => strategy.blue_green.as_ref()?.pre_promotion_analysis.as_ref(),
            Self::PostPromotion => strategy.blue_green.as_ref()?.post_promotion_analysis.as_ref(),
            Self::Background => strategy
                .canary
                .as_ref()?
                .analysis
                .as_ref()
                .map(|bg| &bg.analysis),
            Self::Inline { step } => strategy
                .canary
                .as_ref()?
                .steps
                .as_ref()?
                .get(step)?
                .analysis
                .as_ref(),
        }
    }
}

pub(crate) fn validate(rollout: &Rollout, refs: &AnalysisTemplatesWithType) -> Vec<FieldError> {
    let field = refs.template_type.field();
    let args = refs
        .template_type
        .analysis(rollout)
        .and_then(|analysis| analysis.args.as_deref())
        .unwrap_or_default();

    let mut errors = Vec::new();
    for template in &refs.templates {
        let name = template.name_any();

        for metric in &template.spec.metrics {
            if metric.effective_count().is_none() {
                errors.push(FieldError::invalid(
                    field.clone(),
                    &name,
                    format!(
                        "AnalysisTemplate {name} has metric {} which runs indefinitely. Invalid value for count: {}",
                        metric.name,
                        render_count(metric.count.as_ref()),
                    ),
                ));
            }
        }

        let template_args = template.spec.args.as_deref().unwrap_or_default();
        let values = match bind_args(template_args, args) {
            Ok(values) => values,
            Err(detail) => {
                errors.push(FieldError::invalid(field.clone(), &name, detail));
                continue;
            }
        };

        for (idx, metric) in template.spec.metrics.iter().enumerate() {
            if let Err(detail) = resolve_metric(metric, &values).and_then(|m| check_metric(&m)) {
                errors.push(FieldError::invalid(
                    field.clone(),
                    &name,
                    format!("metrics[{idx}] {}: {detail}", metric.name),
                ));
            }
        }
    }
    errors
}

/// Binds each template argument to a value. Values passed by the Rollout
/// take precedence over template defaults.
fn bind_args(
    template_args: &[Argument],
    rollout_args: &[AnalysisRunArgument],
) -> Result<BTreeMap<String, String>, String> {
    template_args
        .iter()
        .map(|arg| {
            let value = match rollout_args.iter().find(|a| a.name == arg.name) {
                Some(AnalysisRunArgument {
                    value: Some(value), ..
                }) => Some(value.clone()),
                Some(AnalysisRunArgument {
                    value_from: Some(_),
                    ..
                }) => Some(VALUE_FROM_PLACEHOLDER.to_string()),
                _ if arg.value_from.is_some() => Some(VALUE_FROM_PLACEHOLDER.to_string()),
                _ => arg.value.clone(),
            };
            value
                .map(|value| (arg.name.clone(), value))
                .ok_or_else(|| format!("args.{} was not resolved", arg.name))
        })
        .collect()
}

/// Substitutes `{{args.name}}` references throughout a metric.
fn resolve_metric(metric: &Metric, args: &BTreeMap<String, String>) -> Result<Metric, String> {
    let raw = serde_json::to_string(metric).map_err(|e| e.to_string())?;
    let mut unresolved = None;
    let resolved = ARG_REFERENCE.replace_all(&raw, |caps: &Captures<'_>| match args.get(&caps[1]) {
        Some(value) => json_escape(value),
        None => {
            unresolved.get_or_insert_with(|| caps[1].to_string());
            String::new()
        }
    });
    if let Some(name) = unresolved {
        return Err(format!("failed to resolve {{{{args.{name}}}}}"));
    }
    serde_json::from_str(&resolved).map_err(|e| e.to_string())
}

fn check_metric(metric: &Metric) -> Result<(), String> {
    let count = metric
        .effective_count()
        .map(|c| int_value(&c, "count"))
        .transpose()?;
    let limits = [
        ("failureLimit", &metric.failure_limit),
        ("inconclusiveLimit", &metric.inconclusive_limit),
        ("consecutiveErrorLimit", &metric.consecutive_error_limit),
    ]
    .into_iter()
    .map(|(name, limit)| {
        let value = limit.as_ref().map(|v| int_value(v, name)).transpose()?;
        match value {
            Some(v) if v < 0 => Err(format!("{name} must be >= 0")),
            _ => Ok((name, value.unwrap_or(0))),
        }
    })
    .collect::<Result<Vec<_>, _>>()?;

    if let Some(count) = count.filter(|c| *c > 0) {
        for (name, limit) in &limits[..2] {
            if count < *limit {
                return Err(format!("count must be >= {name}"));
            }
        }
    }

    let interval = metric.interval.as_deref().unwrap_or_default();
    if count.unwrap_or(0) > 1 && interval.is_empty() {
        return Err("interval must be specified when count > 1".to_string());
    }
    for (name, value) in [("interval", interval), ("initialDelay", metric.initial_delay.as_deref().unwrap_or_default())] {
        if !value.is_empty() {
            duration::parse(value).map_err(|e| format!("invalid {name} {value:?}: {e}"))?;
        }
    }

    match metric.provider.len() {
        0 => Err("no provider specified".to_string()),
        1 => Ok(()),
        _ => Err("multiple providers specified".to_string()),
    }
}

fn int_value(value: &IntOrString, name: &str) -> Result<i64, String> {
    match value {
        IntOrString::Int(n) => Ok(i64::from(*n)),
        IntOrString::String(s) => s
            .trim()
            .parse()
            .map_err(|_| format!("{name} {s:?} is not an integer")),
    }
}

fn render_count(count: Option<&IntOrString>) -> String {
    match count {
        Some(IntOrString::Int(n)) => n.to_string(),
        Some(IntOrString::String(s)) => s.clone(),
        None => "unset".to_string(),
    }
}

/// Escapes a value for substitution inside a JSON string.
fn json_escape(value: &str) -> String {
    let quoted = serde_json::Value::from(value).to_string();
    quoted[1..quoted.len() - 1].to_string()
}
