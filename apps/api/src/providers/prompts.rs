// Prompt text for the three provider capabilities.
// Kept deliberately short: result quality is tuned elsewhere, this layer only
// needs every backend to answer in the same JSON shape.

use serde_json::Value;

/// System prompt fragment that enforces JSON-only output.
const JSON_ONLY: &str = "You MUST respond with valid JSON only. \
    Do NOT include any text outside the JSON object. \
    Do NOT use markdown code fences.";

pub const ANALYSIS_SYSTEM: &str = "You are an expert resume reviewer. \
    Respond with a JSON object: {\"overall_score\": 0-100, \"summary\": string, \
    \"strengths\": [string], \"weaknesses\": [string], \"keywords\": [string], \
    \"section_feedback\": [{\"section\": string, \"score\": 0-100, \"feedback\": string}]}. \
    You MUST respond with valid JSON only.";

pub const SUGGESTIONS_SYSTEM: &str = "You are an expert resume coach. \
    Respond with a JSON object: {\"suggestions\": [string]} where each suggestion \
    is one concrete, actionable edit. You MUST respond with valid JSON only.";

pub const MATCHING_SYSTEM: &str = "You compare resumes against job descriptions. \
    Respond with a JSON object: {\"match_score\": 0-100, \"matched_keywords\": [string], \
    \"missing_keywords\": [string], \"recommendations\": [string]}. \
    You MUST respond with valid JSON only.";

pub fn analysis_prompt(resume: &str, options: &Value) -> String {
    format!(
        "Analyze the following resume.\n{}\nRESUME:\n{resume}\n\n{JSON_ONLY}",
        options_block(options)
    )
}

pub fn suggestions_prompt(resume: &str, job_description: Option<&str>, options: &Value) -> String {
    let target = match job_description {
        Some(jd) => format!("Tailor the suggestions to this job description:\n{jd}\n"),
        None => String::new(),
    };
    format!(
        "Suggest improvements for the following resume.\n{target}{}\nRESUME:\n{resume}\n\n{JSON_ONLY}",
        options_block(options)
    )
}

pub fn matching_prompt(resume: &str, job_description: &str, options: &Value) -> String {
    format!(
        "Score how well the resume matches the job description.\n{}\n\
         JOB DESCRIPTION:\n{job_description}\n\nRESUME:\n{resume}\n\n{JSON_ONLY}",
        options_block(options)
    )
}

/// Caller options rendered as a JSON line, or nothing when there are none.
fn options_block(options: &Value) -> String {
    match options {
        Value::Null => String::new(),
        Value::Object(map) if map.is_empty() => String::new(),
        other => format!("Options: {other}\n"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_options_are_omitted() {
        let prompt = analysis_prompt("Rust engineer", &json!({}));
        assert!(!prompt.contains("Options:"));
        assert!(prompt.contains("Rust engineer"));
    }

    #[test]
    fn test_options_are_rendered() {
        let prompt = matching_prompt("cv", "jd", &json!({"industry": "fintech"}));
        assert!(prompt.contains(r#"Options: {"industry":"fintech"}"#));
        assert!(prompt.contains("JOB DESCRIPTION:\njd"));
    }

    #[test]
    fn test_suggestions_prompt_without_jd() {
        let prompt = suggestions_prompt("cv", None, &Value::Null);
        assert!(!prompt.contains("Tailor"));
    }
}
