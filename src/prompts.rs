//! Prompt templates for the phases that talk to the LLM (§4.4–§4.9).
//! Embedded `const` strings in the teacher's `chat/mod.rs::RAG_SYSTEM_PROMPT`
//! style — compiled into the binary, not loaded from disk — with `{token}`
//! placeholders the call sites `.replace()` before sending.

pub const ROUTER_PROMPT: &str = r#"You are a narrative text router. Given a chunk of story text, decide which entity types it plausibly describes or introduces.

Allowed entity types: {entity_types}

Context: {context}

Text:
{text}

Return up to {max_candidates} candidates as JSON:
{{"candidates": [{{"type": "character", "confidence": 0.9, "why": "introduces a named character"}}]}}

Only use types from the allowed list. Respond with JSON only, no commentary."#;

pub const ENTITY_EXTRACTOR_PROMPT: &str = r#"You extract {entity_type} entities from narrative text.

Context: {context}

Already found in this document ({entity_type}): {known_entities}

Text:
{text}

List up to {max_candidates} {entity_type} entities mentioned or introduced in this text that are not already covered above. For each, quote the exact evidence span from the text.

Return JSON only:
{{"entities": [{{"name": "...", "evidence": "exact substring from the text above", "summary": "one sentence description"}}]}}"#;

pub const ENTITY_MATCH_SELECTOR_PROMPT: &str = r#"You are matching a newly found entity against existing known entities to decide if they are the same thing.

New entity: {finding_name} — {finding_summary}

Candidates:
{candidates}

If one candidate is clearly the same entity, return its index (0-based) and a short reason. If none match, return {{"match": null}}.

Return JSON only: {{"match": {{"index": 0, "reason": "..."}}}} or {{"match": null}}"#;

pub const RELATION_DISCOVERY_PROMPT: &str = r#"You find relationships between {source_type} entities and {target_type} entities in narrative text.

Allowed relation types for ({source_type} -> {target_type}): {allowed_relation_types}
You may also use "custom:<name>" for a relationship not in the allowed list.

{source_type} entities found: {source_findings}
{target_type} entities found: {target_findings}

Text / spans:
{text}

For each relationship you find, cite the exact evidence quote and, if operating over spans, the span_id it came from.

Return JSON only:
{{"relations": [{{"source": {{"ref": "finding:character:0"}}, "target": {{"ref": "finding:location:1"}}, "relation_type": "located_in", "polarity": "asserted", "implicit": false, "confidence": 0.85, "evidence": {{"span_id": "s1", "quote": "..."}}}}]}}"#;

pub const CUSTOM_RELATION_SUMMARY_PROMPT: &str = r#"Describe the relationship "{relation_type}" between {source_name} and {target_name} in one short sentence, in the style of "{source_name} works alongside {target_name}"."#;

pub fn render(template: &str, tokens: &[(&str, &str)]) -> String {
    let mut rendered = template.to_string();
    for (key, value) in tokens {
        rendered = rendered.replace(&format!("{{{key}}}"), value);
    }
    rendered
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_substitutes_every_named_token() {
        let out = render("hello {name}, you are {age}", &[("name", "Aria"), ("age", "30")]);
        assert_eq!(out, "hello Aria, you are 30");
    }

    #[test]
    fn render_leaves_unknown_tokens_untouched() {
        let out = render("hello {name}", &[("other", "x")]);
        assert_eq!(out, "hello {name}");
    }
}
