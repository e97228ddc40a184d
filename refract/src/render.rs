//! Markdown rendering of hover payloads.

use refract_core::HoverPayload;

/// Renders a hover payload: a role heading, the value as a YAML block,
/// and (for parameter lists) each resolved parameter.
pub fn hover_markdown(payload: &HoverPayload) -> String {
    let mut out = format!("### {} `{}`\n\n", payload.nominal, payload.name);
    push_yaml_block(&mut out, &payload.value);
    if let Some(parameters) = &payload.parameters {
        out.push_str("\nResolved parameters:\n\n");
        for parameter in parameters {
            push_yaml_block(&mut out, parameter);
        }
    }
    out
}

fn push_yaml_block(out: &mut String, value: &serde_json::Value) {
    out.push_str("```yaml\n");
    match serde_yaml::to_string(value) {
        Ok(yaml) => out.push_str(&yaml),
        Err(_) => out.push_str("~\n"),
    }
    out.push_str("```\n");
}
