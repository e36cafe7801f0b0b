//! Lenient JSON recovery for LLM output (§9 "Lenient JSON parsing"):
//! strip an optional code fence, try a full parse, else extract the first
//! balanced `{…}` slice and parse that. Centralised here so no phase
//! reimplements it — Phases 1, 2, 3, 5, and 6 all parse LLM JSON through
//! [`lenient_parse`].

use serde::de::DeserializeOwned;

use crate::error::ExtractError;

/// Strip a leading/trailing ``` fence (with an optional `json` tag) if present.
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(after_open) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Skip an optional language tag (e.g. "json") up to the first newline.
    let after_tag = match after_open.find('\n') {
        Some(idx) => &after_open[idx + 1..],
        None => after_open,
    };
    after_tag.strip_suffix("```").unwrap_or(after_tag).trim()
}

/// Scan for the first balanced `{…}` slice, respecting string escaping so
/// braces inside string literals don't throw off the depth count.
fn first_balanced_object(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    let start = text.find('{')?;
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &byte) in bytes[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    let end = start + offset + 1;
                    return Some(&text[start..end]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Parse `raw` into `T`, tolerating code fences and surrounding chatter.
///
/// Order of attempts: (1) strip fence, full parse; (2) strip fence, parse the
/// first balanced `{…}` slice; (3) fail with [`ExtractError::UpstreamSchema`].
/// Callers that want the single-shot repair prompt behaviour of §4.4/§6
/// should catch that error, render [`repair_prompt`], re-invoke the LLM once,
/// and call this function again on the new output — this function itself
/// performs no I/O and is not recursive, keeping phase boundaries pure
/// functions of `(LLM output, inputs)` per §9.
pub fn lenient_parse<T: DeserializeOwned>(raw: &str) -> Result<T, ExtractError> {
    let stripped = strip_code_fence(raw);

    if let Ok(value) = serde_json::from_str::<T>(stripped) {
        return Ok(value);
    }

    if let Some(object) = first_balanced_object(stripped) {
        if let Ok(value) = serde_json::from_str::<T>(object) {
            return Ok(value);
        }
    }

    Err(ExtractError::UpstreamSchema(format!(
        "could not parse JSON from LLM output: {}",
        truncate_for_error(raw)
    )))
}

fn truncate_for_error(raw: &str) -> String {
    const MAX: usize = 200;
    if raw.len() <= MAX {
        raw.to_string()
    } else {
        let mut end = MAX;
        while !raw.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &raw[..end])
    }
}

/// Render the single-shot repair prompt: the raw (unparseable) output plus a
/// human-readable schema hint, per §4.4/§6.
pub fn repair_prompt(schema_hint: &str, raw_output: &str) -> String {
    format!(
        "Your previous response could not be parsed as JSON matching this schema:\n\n{schema_hint}\n\n\
         Your previous response was:\n\n{raw_output}\n\n\
         Respond again with ONLY valid JSON matching the schema above. Do not include \
         any commentary, explanation, or code fences."
    )
}
