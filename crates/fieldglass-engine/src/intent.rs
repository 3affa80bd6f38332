//! The deterministic intent parser: maps model reasoning text to a closed
//! `ActionKind`. Priority-ordered rules, no ML involved — this exists so the
//! `Act` node's behavior is reproducible given fixed inputs.

use fieldglass_providers::AppAllowlist;
use fieldglass_types::{ActionKind, ErrorRecord, MouseButton};

const KEY_TABLE: &[(&str, &str)] = &[
    ("enter", "Enter"),
    ("return", "Enter"),
    ("tab", "Tab"),
    ("escape", "Escape"),
    ("esc", "Escape"),
    ("up", "ArrowUp"),
    ("down", "ArrowDown"),
    ("left", "ArrowLeft"),
    ("right", "ArrowRight"),
    ("f1", "F1"),
    ("f2", "F2"),
    ("f3", "F3"),
    ("f4", "F4"),
    ("f5", "F5"),
    ("f6", "F6"),
    ("f7", "F7"),
    ("f8", "F8"),
    ("f9", "F9"),
    ("f10", "F10"),
    ("f11", "F11"),
    ("f12", "F12"),
];

/// Parse `reasoning_text` into an action, given the task's fallback text and
/// an allowlist collaborator for `LaunchApp` resolution.
pub fn parse_intent(
    reasoning_text: &str,
    context_text: Option<&str>,
    task_description: &str,
    allowlist: &dyn AppAllowlist,
) -> Result<ActionKind, ErrorRecord> {
    let lower = reasoning_text.to_lowercase();

    if let Some(app_name) = extract_launch_app(&lower, reasoning_text) {
        return if allowlist.resolve(&app_name).is_some() {
            Ok(ActionKind::LaunchApp { name: app_name })
        } else {
            Err(ErrorRecord::policy_violation(format!(
                "app '{app_name}' is not in the allowlist"
            )))
        };
    }

    if let Some(key) = extract_key(&lower) {
        return Ok(ActionKind::PressKey { key });
    }

    if is_type_command(&lower) {
        let text = extract_quoted(reasoning_text)
            .or_else(|| context_text.map(str::to_string))
            .or_else(|| Some(task_description.to_string()).filter(|s| !s.is_empty()));
        return Ok(match text {
            Some(text) => ActionKind::TypeText { text },
            None => ActionKind::NoAction { reason: "no text to type".to_string() },
        });
    }

    if lower.contains("click") {
        return Ok(match extract_click_coords(reasoning_text) {
            Some((x, y)) => ActionKind::Click { x: Some(x), y: Some(y), button: MouseButton::Left },
            None => ActionKind::Click { x: None, y: None, button: MouseButton::Left },
        });
    }

    if lower.contains("analyze") || lower.contains("look") || lower.contains("check") {
        return Ok(ActionKind::AnalyzeScreen { query: reasoning_text.to_string() });
    }

    if lower.contains("done") || lower.contains("finished") || lower.contains("complete") {
        return Ok(ActionKind::TaskComplete);
    }

    Ok(ActionKind::NoAction { reason: "no actionable command detected".to_string() })
}

fn extract_launch_app(lower: &str, original: &str) -> Option<String> {
    for marker in ["launch ", "open ", "start "] {
        if let Some(pos) = lower.find(marker) {
            let rest = original[pos + marker.len()..].trim();
            let name = rest.split(|c: char| c == '.' || c == ',' || c == '\n').next()?.trim();
            if !name.is_empty() {
                return Some(name.to_string());
            }
        }
    }
    None
}

fn is_type_command(lower: &str) -> bool {
    lower.contains("type ") || lower.contains("write ") || lower.contains("enter ")
}

fn extract_quoted(text: &str) -> Option<String> {
    let start = text.find(['"', '\''])?;
    let quote = text.as_bytes()[start] as char;
    let rest = &text[start + 1..];
    let end = rest.find(quote)?;
    Some(rest[..end].to_string())
}

fn extract_key(lower: &str) -> Option<String> {
    if !(lower.contains("press ") || lower.contains("hit ")) {
        return None;
    }
    for (needle, key) in KEY_TABLE {
        if lower.contains(needle) {
            return Some((*key).to_string());
        }
    }
    None
}

fn extract_click_coords(text: &str) -> Option<(i32, i32)> {
    let digits: Vec<i32> = text
        .split(|c: char| !c.is_ascii_digit() && c != '-')
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse().ok())
        .collect();
    if digits.len() >= 2 {
        Some((digits[0], digits[1]))
    } else {
        None
    }
}
