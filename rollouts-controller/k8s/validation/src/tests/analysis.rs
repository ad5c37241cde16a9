use super::*;
use pretty_assertions::assert_eq;
use rollouts_controller_k8s_api::AnalysisTemplate;

fn template(name: &str, spec: serde_json::Value) -> AnalysisTemplate {
    serde_json::from_value(json!({
        "apiVersion": "argoproj.io/v1alpha1",
        "kind": "AnalysisTemplate",
        "metadata": {"name": name, "namespace": "default"},
        "spec": spec,
    }))
    .expect("template must parse")
}

fn referenced(template_type: TemplateType, templates: Vec<AnalysisTemplate>) -> ReferencedResources {
    ReferencedResources {
        analysis_templates: vec![AnalysisTemplatesWithType {
            templates,
            template_type,
        }],
        ..Default::default()
    }
}

fn with_steps() -> Rollout {
    rollout(json!({"canary": {
        "steps": [
            {"setWeight": 20},
            {"analysis": {
                "templates": [{"templateName": "success-rate"}],
                "args": [{"name": "service", "value": "web"}],
            }},
        ],
    }}))
}

#[test]
fn unbounded_metric() {
    let rollout = with_steps();
    let forever = template(
        "success-rate",
        json!({"metrics": [{
            "name": "errors",
            "interval": "5m",
            "provider": {"prometheus": {"query": "sum(errors)"}},
        }]}),
    );

    let errors = validate(
        &rollout,
        referenced(TemplateType::Inline { step: 1 }, vec![forever]),
    );
    assert_eq!(
        errors,
        vec![FieldError {
            error_type: ErrorType::Invalid,
            field: TemplateType::Inline { step: 1 }.field(),
            bad_value: Some("success-rate".to_string()),
            detail: "AnalysisTemplate success-rate has metric errors which runs indefinitely. Invalid value for count: unset".to_string(),
        }]
    );
    assert_eq!(
        errors[0].field.to_string(),
        "spec.strategy.canary.steps[1].analysis.templates"
    );
}

#[test]
fn arguments_from_the_rollout_resolve_metrics() {
    let rollout = with_steps();
    let bounded = template(
        "success-rate",
        json!({
            "args": [{"name": "service"}],
            "metrics": [{
                "name": "errors",
                "count": 3,
                "interval": "1m",
                "provider": {"prometheus": {"query": "errors{service=\"{{args.service}}\"}"}},
            }],
        }),
    );
    assert_eq!(
        validate(
            &rollout,
            referenced(TemplateType::Inline { step: 1 }, vec![bounded.clone()])
        ),
        vec![]
    );

    // Without the Rollout's arguments, the template's argument is unbound.
    let errors = validate(&rollout, referenced(TemplateType::Background, vec![bounded]));
    assert_eq!(errors.len(), 1, "{errors:?}");
    assert_eq!(errors[0].detail, "args.service was not resolved");
    assert_eq!(
        errors[0].field.to_string(),
        "spec.strategy.canary.analysis.templates"
    );
}

#[test]
fn unknown_argument_reference() {
    let rollout = with_steps();
    let t = template(
        "success-rate",
        json!({"metrics": [{
            "name": "errors",
            "provider": {"web": {"url": "http://metrics/{{args.missing}}"}},
        }]}),
    );
    let errors = validate(&rollout, referenced(TemplateType::Inline { step: 1 }, vec![t]));
    assert_eq!(errors.len(), 1, "{errors:?}");
    assert_eq!(
        errors[0].detail,
        "metrics[0] errors: failed to resolve {{args.missing}}"
    );
}

#[test]
fn every_template_is_checked() {
    let rollout = rollout(json!({"blueGreen": {
        "activeService": "web-active",
        "prePromotionAnalysis": {"templates": [{"templateName": "a"}, {"templateName": "b"}]},
    }}));
    let a = template(
        "a",
        json!({"metrics": [{"name": "m", "count": 2, "provider": {"job": {}}}]}),
    );
    let b = template(
        "b",
        json!({"metrics": [{"name": "m", "provider": {}}]}),
    );
    let errors = validate(&rollout, referenced(TemplateType::PrePromotion, vec![a, b]));
    let details = errors.iter().map(|e| e.detail.as_str()).collect::<Vec<_>>();
    assert_eq!(
        details,
        vec![
            "metrics[0] m: interval must be specified when count > 1",
            "metrics[0] m: no provider specified",
        ]
    );
    assert_eq!(
        errors[0].field.to_string(),
        "spec.strategy.blueGreen.prePromotionAnalysis.templates"
    );
}
