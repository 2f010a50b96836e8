use crate::errors::ToolError;
use crate::utils::suggest::suggest;

/// `UNKNOWN_ACTION` error listing the known names and the closest matches.
pub fn unknown_action_error(scope: &str, given: &str, known: &[&str]) -> ToolError {
    let suggestions = suggest(given, known, 3);
    let mut hint = format!("Use one of: {}.", known.join(", "));
    if !suggestions.is_empty() {
        hint = format!("Did you mean: {}? {}", suggestions.join(", "), hint);
    }
    ToolError::unknown_action(format!("Unknown {} action: {}", scope, given))
        .with_hint(hint)
        .with_details(serde_json::json!({
            "known_actions": known,
            "did_you_mean": suggestions,
        }))
}
