use crate::chat::llm::ChatMessage;
use crate::db::models::SearchResult;
use crate::techniques::Technique;

fn or_not_available(joined: String) -> String {
    if joined.is_empty() {
        "Not available".to_string()
    } else {
        joined
    }
}

/// One context block: the technique's metadata around a piece of its description.
pub fn context_block(technique: &Technique, content: &str) -> String {
    let mitigations: Vec<String> = technique
        .mitigations
        .iter()
        .map(|m| {
            let name = if m.name.is_empty() { "No name" } else { &m.name };
            let description = if m.description.is_empty() {
                "Description not available"
            } else {
                &m.description
            };
            format!("- {name}: {description}")
        })
        .collect();

    let tactics = if technique.tactics.is_empty() {
        "Unknown".to_string()
    } else {
        technique.tactics_joined()
    };

    format!(
        "Technique: {} (ID: {})\n\
         Tactics: {}\n\
         Description: {}\n\
         Detection: {}\n\
         Data sources: {}\n\
         Required permissions: {}\n\
         Mitigation methods:\n{}\n\
         URL: {}\n",
        technique.display_name(),
        technique.display_id(),
        tactics,
        content,
        technique.detection_or_default(),
        or_not_available(technique.datasources_joined()),
        or_not_available(technique.permissions_joined()),
        mitigations.join("\n"),
        technique.url_or_default(),
    )
}

/// Concatenates the pinned technique (if any) and every retrieved chunk.
pub fn build_context(pinned: Option<&Technique>, results: &[SearchResult]) -> String {
    let pinned = pinned.map(|t| context_block(t, &t.description));
    pinned
        .into_iter()
        .chain(
            results
                .iter()
                .map(|r| context_block(&r.technique, &r.chunk_content)),
        )
        .collect::<Vec<_>>()
        .join("\n")
}

/// System prompt first, then one user message carrying history, context and question.
pub fn build_messages(
    system_prompt: &str,
    history: &str,
    context: &str,
    question: &str,
) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(system_prompt),
        ChatMessage::user(format!(
            "Conversation history:\n{history}\n\nRelevant context:\n{context}\n\nQuestion: {question}"
        )),
    ]
}
