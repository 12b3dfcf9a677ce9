//! Prompt rendering for evaluated jobs.

use crate::domain::RouterJob;
use crate::evaluator::EvaluatorConfig;

/// Constraints a dispatcher attaches to a prompt template beyond the job's
/// own fields; currently just a free-text addendum, kept separate from
/// `RouterJob` since it is dispatch-time policy, not job state.
#[derive(Debug, Clone, Default)]
pub struct DispatchConstraints {
    pub text: String,
}

/// `{task, context, issuer, constraints}` substituted into a tier's prompt
/// template.
pub fn render_prompt(template: &str, job: &RouterJob, context: &str, constraints: &DispatchConstraints) -> String {
    template
        .replace("{task}", &job.payload)
        .replace("{context}", context)
        .replace("{issuer}", &job.issuer)
        .replace("{constraints}", &constraints.text)
}

/// Resolve `(prompt, model)` for a job whose tier has already been set by
/// the evaluator.
pub fn dispatch(
    job: &RouterJob,
    context: &str,
    constraints: &DispatchConstraints,
    config: &EvaluatorConfig,
    template: &str,
) -> cortex_core::error::Result<(String, String)> {
    let tier_name = job
        .tier
        .as_deref()
        .ok_or_else(|| cortex_core::error::CortexError::invariant("job dispatched before evaluation set a tier"))?;
    let tier = config
        .tiers
        .get(tier_name)
        .ok_or_else(|| cortex_core::error::CortexError::config(format!("unknown tier {tier_name}")))?;

    let prompt = render_prompt(template, job, context, constraints);
    Ok((prompt, tier.model.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RouterJob;

    #[test]
    fn render_prompt_substitutes_all_placeholders() {
        let job = RouterJob::new("research", "agent:main:cortex", "weather in Bucharest");
        let constraints = DispatchConstraints { text: "respond in one paragraph".to_string() };
        let prompt = render_prompt(
            "Task: {task}\nContext: {context}\nIssuer: {issuer}\nConstraints: {constraints}",
            &job,
            "no prior context",
            &constraints,
        );
        assert!(prompt.contains("weather in Bucharest"));
        assert!(prompt.contains("agent:main:cortex"));
        assert!(prompt.contains("respond in one paragraph"));
    }

    #[test]
    fn dispatch_resolves_model_from_configured_tier() {
        let mut job = RouterJob::new("research", "issuer", "payload");
        job.tier = Some("sonnet".to_string());
        let config = crate::evaluator::EvaluatorConfig::default();
        let constraints = DispatchConstraints::default();

        let (prompt, model) = dispatch(&job, "ctx", &constraints, &config, "{task}").unwrap();
        assert_eq!(prompt, "payload");
        assert_eq!(model, "sonnet");
    }

    #[test]
    fn dispatch_rejects_job_without_tier() {
        let job = RouterJob::new("research", "issuer", "payload");
        let config = crate::evaluator::EvaluatorConfig::default();
        let constraints = DispatchConstraints::default();
        assert!(dispatch(&job, "ctx", &constraints, &config, "{task}").is_err());
    }
}
