use std::fmt::Write;

use jx_common::activity::PipelineActivity;
use jx_controller::{PromoteResult, workflow::ResolvedWorkflow};

/// Table of the steps of a resolved workflow.
pub fn render_workflow(workflow: &ResolvedWorkflow) -> String {
    let mut out = String::new();
    let origin = if workflow.synthesized {
        " (generated from environments)"
    } else {
        ""
    };
    let _ = writeln!(out, "Workflow {}{}", workflow.name, origin);
    let _ = writeln!(out, "{:<4} {:<20} {:<20} {}", "#", "STEP", "ENVIRONMENT", "AFTER");

    for step in &workflow.steps {
        let after = workflow.predecessor_environments(step).join(", ");
        let parallel = if step.parallel { " (parallel)" } else { "" };
        let _ = writeln!(
            out,
            "{:<4} {:<20} {:<20} {}{}",
            step.index, step.name, step.environment, after, parallel
        );
    }
    out
}

/// Activities with the status of each of their promote steps.
pub fn render_activities(activities: &[PipelineActivity]) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<40} {:<12} {:<12} {:<12} {}",
        "NAME", "VERSION", "STATUS", "WORKFLOW", "MESSAGE"
    );

    for activity in activities {
        let _ = writeln!(
            out,
            "{:<40} {:<12} {:<12} {:<12} {}",
            activity.name(),
            activity.spec.version,
            activity.spec.status.to_string(),
            activity.spec.workflow_status.to_string(),
            activity.spec.workflow_message.as_deref().unwrap_or_default()
        );
        for step in &activity.spec.steps {
            let detail = step
                .pull_request_url()
                .or(step.message.as_deref())
                .unwrap_or_default();
            let _ = writeln!(
                out,
                "  {:<38} {:<12} {:<12} {:<12} {}",
                format!("Promote: {}", step.environment),
                "",
                step.status.to_string(),
                "",
                detail
            );
        }
    }
    out
}

pub fn render_promote_result(application: &str, version: &str, result: &PromoteResult) -> String {
    match &result.pull_request {
        Some(pr) => format!(
            "{} {} to {} is {}: {}",
            application, version, result.environment, result.status, pr.url
        ),
        None => format!(
            "{} {} to {} is {}",
            application, version, result.environment, result.status
        ),
    }
}
