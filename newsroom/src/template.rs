use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::types::{Aspect, ContentKind, GenerationRequest, PromptMessage, Result, WorkflowError};

/// Placeholders every platform prompt is expected to use.
pub const KNOWN_PLACEHOLDERS: [&str; 4] = ["brand_context", "ad_intensity_instruction", "language", "platform"];

/// A chat prompt loaded from a JSON file: a list of `{role, content}`
/// messages, or an object with a `messages` list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    pub messages: Vec<PromptMessage>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TemplateFile {
    Messages(Vec<PromptMessage>),
    Wrapped { messages: Vec<PromptMessage> },
}

impl PromptTemplate {
    pub fn from_json(raw: &str) -> Result<Self> {
        let messages = match serde_json::from_str::<TemplateFile>(raw)? {
            TemplateFile::Messages(messages) => messages,
            TemplateFile::Wrapped { messages } => messages,
        };
        if messages.is_empty() {
            return Err(WorkflowError::Configuration("Prompt template has no messages".to_string()));
        }
        Ok(Self { messages })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            WorkflowError::Configuration(format!("Cannot read prompt file {}: {}", path.display(), e))
        })?;
        let template = Self::from_json(&raw)?;
        info!("Loaded prompt template {} ({} messages)", path.display(), template.messages.len());
        Ok(template)
    }

    /// Substitute `{name}` placeholders. Unknown placeholders are left as is.
    pub fn render(&self, values: &BTreeMap<&str, String>) -> Vec<PromptMessage> {
        for name in KNOWN_PLACEHOLDERS {
            let used = self.messages.iter().any(|m| m.content.contains(&format!("{{{}}}", name)));
            if !used {
                warn!("Prompt template does not use placeholder {{{}}}", name);
            }
        }

        self.messages
            .iter()
            .map(|message| PromptMessage {
                role: message.role.clone(),
                content: substitute(&message.content, values),
            })
            .collect()
    }
}

fn substitute(text: &str, values: &BTreeMap<&str, String>) -> String {
    let mut out = text.to_string();
    for (name, value) in values {
        out = out.replace(&format!("{{{}}}", name), value);
    }
    out
}

/// Instruction text for an ad intensity percentage.
pub fn ad_intensity_instruction(percent: u8) -> String {
    let tier = match percent {
        0 => "Focus entirely on the news. Mention the brand only if it is essential to the story.",
        1..=20 => "Keep brand mentions subtle and brief; the news remains the main subject.",
        21..=50 => "Balance the news with the brand's relevance to it.",
        51..=80 => "Clearly connect the news to the brand and its benefits.",
        _ => "Make the brand central to the post, using the news as supporting context.",
    };
    format!("Advertising intensity: {}%. {}", percent.min(100), tier)
}

/// Brand context text. A missing or unreadable file yields an empty context.
pub fn load_brand_context(path: &Path) -> String {
    match std::fs::read_to_string(path) {
        Ok(text) => {
            debug!("Loaded brand context from {}", path.display());
            text.trim().to_string()
        }
        Err(e) => {
            warn!("Brand context file {} unavailable ({}), using empty context", path.display(), e);
            String::new()
        }
    }
}

/// Render a platform prompt with the standard placeholder values.
pub fn platform_instructions(
    template: &PromptTemplate,
    platform: &str,
    language: &str,
    brand_context: &str,
    ad_intensity: u8,
) -> Vec<PromptMessage> {
    let values = BTreeMap::from([
        ("brand_context", brand_context.to_string()),
        ("ad_intensity_instruction", ad_intensity_instruction(ad_intensity)),
        ("language", language.to_string()),
        ("platform", platform.to_string()),
    ]);
    template.render(&values)
}

/// One line per preserved and per rejected aspect of a request.
pub fn revision_notes(request: &GenerationRequest) -> Vec<String> {
    let mut notes: Vec<String> = request
        .preserve
        .iter()
        .map(|(aspect, value)| format!("Keep the approved {} unchanged: {}", aspect, value))
        .collect();
    notes.extend(
        request
            .revise
            .iter()
            .map(|(aspect, feedback)| format!("Aspect '{}' was rejected because: {}", aspect, feedback)),
    );
    notes
}

/// JSON field the model must fill for an aspect.
pub fn output_field(aspect: Aspect) -> &'static str {
    match aspect {
        Aspect::Summary => "summary",
        Aspect::Text => "post_text",
        Aspect::ImagePrompt => "image_prompt",
    }
}

/// The user message of a generation call.
pub fn generation_brief(request: &GenerationRequest) -> String {
    let mut brief = String::new();
    match request.kind {
        ContentKind::NewsDigest => {
            brief.push_str("Revise the following news digest. Keep every ARTICLE and SOURCE line.\n\n");
            brief.push_str(&request.source_text);
        }
        ContentKind::PlatformPost => {
            if let Some(platform) = &request.platform {
                brief.push_str(&format!("Platform: {}\n", platform));
            }
            brief.push_str(&format!("Language: {}\n\n", request.language));
            brief.push_str("Recent news:\n");
            brief.push_str(&request.source_text);
        }
    }

    let notes = revision_notes(request);
    if !notes.is_empty() {
        brief.push_str("\n\nThis is a revision of an earlier draft.\n");
        for note in notes {
            brief.push_str("- ");
            brief.push_str(&note);
            brief.push('\n');
        }
    }

    let fields: Vec<String> = request
        .kind
        .aspects()
        .iter()
        .map(|aspect| format!("\"{}\"", output_field(*aspect)))
        .collect();
    brief.push_str(&format!("\n\nRespond with a JSON object with the fields {}", fields.join(", ")));
    if request.kind == ContentKind::PlatformPost {
        brief.push_str(" and \"hashtags\" (a list of strings)");
    }
    brief.push('.');
    brief
}

#[cfg(test)]
mod tests {
    use super::*;

    fn post_request() -> GenerationRequest {
        GenerationRequest {
            kind: ContentKind::PlatformPost,
            platform: Some("Rednote".to_string()),
            language: "zh".to_string(),
            source_text: "ARTICLE 1: Prices fall".to_string(),
            instructions: vec![],
            preserve: BTreeMap::from([(Aspect::ImagePrompt, "a shopping cart".to_string())]),
            revise: BTreeMap::from([(Aspect::Text, "too long".to_string())]),
        }
    }

    #[test]
    fn parses_both_template_shapes() {
        let bare = r#"[{"role": "system", "content": "Write for {platform}"}]"#;
        let wrapped = r#"{"messages": [{"role": "system", "content": "Write for {platform}"}]}"#;
        assert_eq!(PromptTemplate::from_json(bare).unwrap(), PromptTemplate::from_json(wrapped).unwrap());
        assert!(PromptTemplate::from_json("[]").is_err());
    }

    #[test]
    fn renders_known_placeholders_and_keeps_unknown() {
        let template = PromptTemplate::from_json(
            r#"[{"role": "system", "content": "{brand_context} | {ad_intensity_instruction} | {language} | {platform} | {mood}"}]"#,
        )
        .unwrap();
        let messages = platform_instructions(&template, "Instagram", "en", "We bake bread.", 0);
        let content = &messages[0].content;
        assert!(content.starts_with("We bake bread. | Advertising intensity: 0%."));
        assert!(content.contains("| en | Instagram |"));
        assert!(content.ends_with("{mood}"));
    }

    #[test]
    fn ad_intensity_tiers() {
        assert!(ad_intensity_instruction(0).contains("entirely on the news"));
        assert!(ad_intensity_instruction(20).contains("subtle"));
        assert!(ad_intensity_instruction(21).contains("Balance"));
        assert!(ad_intensity_instruction(80).contains("Clearly connect"));
        assert!(ad_intensity_instruction(100).contains("central"));
    }

    #[test]
    fn revision_notes_name_each_aspect() {
        let notes = revision_notes(&post_request());
        assert_eq!(
            notes,
            vec![
                "Keep the approved image_prompt unchanged: a shopping cart".to_string(),
                "Aspect 'text' was rejected because: too long".to_string(),
            ]
        );
    }

    #[test]
    fn fresh_brief_has_no_revision_section() {
        let request = GenerationRequest {
            preserve: BTreeMap::new(),
            revise: BTreeMap::new(),
            ..post_request()
        };
        let brief = generation_brief(&request);
        assert!(!brief.contains("revision"));
        assert!(brief.contains("\"post_text\", \"image_prompt\""));
        assert!(brief.contains("hashtags"));
    }

    #[test]
    fn missing_brand_context_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(load_brand_context(&dir.path().join("nope.txt")), "");
    }
}
