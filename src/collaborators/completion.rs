//! Intent classification through a text-completion backend.

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;

use super::keyword::KeywordIntentClassifier;
use super::{Classification, CollaboratorError, IntentClassifier};
use crate::models::{Intent, Message, SlotField, Slots, Speaker};

/// Minimal text-completion port. Anything that turns a prompt into text can
/// back the classifier.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, prompt: &str) -> anyhow::Result<String>;
}

// ============================================================================
// Command-backed client
// ============================================================================

/// Runs an external CLI with the prompt as its final argument and reads the
/// completion from stdout.
#[derive(Debug, Clone)]
pub struct CommandCompletionClient {
    program: String,
    args: Vec<String>,
}

impl CommandCompletionClient {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Parse a whitespace separated command line, e.g. `llm -m small`.
    pub fn from_command_line(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self::new(program, parts.collect()))
    }
}

#[async_trait]
impl CompletionClient for CommandCompletionClient {
    async fn complete(&self, prompt: &str) -> anyhow::Result<String> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(prompt)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| anyhow::anyhow!("Failed to execute {}: {}", self.program, e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("{} exited with {}: {}", self.program, output.status, stderr.trim());
        }

        let response = String::from_utf8(output.stdout)
            .map_err(|e| anyhow::anyhow!("{} wrote non-UTF-8 output: {}", self.program, e))?;
        Ok(response.trim().to_string())
    }
}

// ============================================================================
// Classifier
// ============================================================================

#[derive(Debug, Deserialize)]
struct CompletionVerdict {
    intent: String,
    #[serde(default, alias = "reasoning")]
    rationale: String,
}

/// Classifier that asks a completion backend for a JSON verdict.
///
/// With `keyword_fallback` enabled (the default) an unreachable backend or an
/// unparseable answer degrades to the keyword rules instead of failing.
pub struct CompletionIntentClassifier<C: CompletionClient> {
    client: C,
    keyword_fallback: bool,
}

impl<C: CompletionClient> CompletionIntentClassifier<C> {
    pub fn new(client: C) -> Self {
        Self {
            client,
            keyword_fallback: true,
        }
    }

    pub fn with_keyword_fallback(mut self, enabled: bool) -> Self {
        self.keyword_fallback = enabled;
        self
    }

    fn fallback(
        &self,
        messages: &[Message],
        error: CollaboratorError,
    ) -> Result<Classification, CollaboratorError> {
        if !self.keyword_fallback {
            return Err(error);
        }
        tracing::warn!("Completion classifier degraded to keywords: {}", error);
        let mut classification = KeywordIntentClassifier::classify_messages(messages);
        classification.rationale = format!("fallback: {}", classification.rationale);
        Ok(classification)
    }
}

/// Build the classification prompt from the conversation and known slots.
pub fn build_prompt(messages: &[Message], slots: &Slots) -> String {
    let mut prompt = String::from(
        "You are the intent classifier for a dental clinic appointment assistant.\n\
         Classify the patient's latest message into exactly one intent:\n\
         - check_availability: asks whether a doctor or specialization has free slots\n\
         - book: wants a new appointment\n\
         - cancel: wants to cancel an existing appointment\n\
         - reschedule: wants to move an existing appointment\n\
         - general_info: greetings, questions about doctors, services or how things work\n\n\
         Respond with JSON only: {\"intent\": \"<intent>\", \"rationale\": \"<one sentence>\"}\n\n",
    );

    let known: Vec<String> = SlotField::ALL
        .iter()
        .filter_map(|f| slots.get(*f).map(|v| format!("{}={}", f, v)))
        .collect();
    if !known.is_empty() {
        prompt.push_str(&format!("Known details: {}\n\n", known.join(", ")));
    }

    prompt.push_str("Conversation:\n");
    for message in messages {
        let speaker = match message.speaker {
            Speaker::Patient => "patient",
            Speaker::Assistant => "assistant",
            Speaker::System => "system",
        };
        prompt.push_str(&format!("{}: {}\n", speaker, message.text));
    }
    prompt
}

/// Extract a JSON object from model output: a ```json fence if present,
/// otherwise the span from the first `{` to the last `}`.
pub fn extract_json_block(text: &str) -> Option<&str> {
    if let Some(start) = text.find("```json") {
        let body = &text[start + "```json".len()..];
        if let Some(end) = body.find("```") {
            return Some(body[..end].trim());
        }
    }

    if let Some(start) = text.find('{')
        && let Some(end) = text.rfind('}')
        && start < end
    {
        return Some(&text[start..=end]);
    }

    None
}

#[async_trait]
impl<C: CompletionClient> IntentClassifier for CompletionIntentClassifier<C> {
    async fn classify(
        &self,
        messages: &[Message],
        slots: &Slots,
    ) -> Result<Classification, CollaboratorError> {
        let prompt = build_prompt(messages, slots);

        let response = match self.client.complete(&prompt).await {
            Ok(response) => response,
            Err(e) => {
                return self.fallback(messages, CollaboratorError::Unavailable(e.to_string()));
            }
        };

        let verdict = extract_json_block(&response)
            .ok_or_else(|| CollaboratorError::Malformed("no JSON object in response".into()))
            .and_then(|json| {
                serde_json::from_str::<CompletionVerdict>(json)
                    .map_err(|e| CollaboratorError::Malformed(e.to_string()))
            });

        match verdict {
            Ok(verdict) => {
                if Intent::from_tag(&verdict.intent).is_none() {
                    tracing::debug!("Completion returned unknown intent '{}'", verdict.intent);
                }
                Ok(Classification::new(verdict.intent, verdict.rationale))
            }
            Err(e) => self.fallback(messages, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CannedClient(anyhow::Result<String>);

    #[async_trait]
    impl CompletionClient for CannedClient {
        async fn complete(&self, _prompt: &str) -> anyhow::Result<String> {
            match &self.0 {
                Ok(text) => Ok(text.clone()),
                Err(e) => Err(anyhow::anyhow!("{}", e)),
            }
        }
    }

    fn history() -> Vec<Message> {
        vec![Message::patient("please cancel my appointment with dr doe")]
    }

    #[test]
    fn test_extract_json_from_code_block() {
        let text = "Sure:\n```json\n{\"intent\": \"book\"}\n```\n";
        assert_eq!(extract_json_block(text), Some("{\"intent\": \"book\"}"));
    }

    #[test]
    fn test_extract_raw_json() {
        let text = r#"Answer: {"intent": "cancel", "rationale": "x"} done"#;
        assert_eq!(
            extract_json_block(text),
            Some(r#"{"intent": "cancel", "rationale": "x"}"#)
        );
        assert_eq!(extract_json_block("no json here"), None);
    }

    #[test]
    fn test_prompt_lists_known_slots() {
        let slots = Slots::default().with(SlotField::Doctor, "john doe");
        let prompt = build_prompt(&history(), &slots);
        assert!(prompt.contains("doctor=john doe"));
        assert!(prompt.contains("patient: please cancel"));
    }

    #[tokio::test]
    async fn test_parses_verdict() {
        let client = CannedClient(Ok(
            r#"```json
{"intent": "reschedule_appointment", "reasoning": "wants to move it"}
```"#
                .to_string(),
        ));
        let classification = CompletionIntentClassifier::new(client)
            .classify(&history(), &Slots::default())
            .await
            .unwrap();

        assert_eq!(classification.intent, "reschedule_appointment");
        assert_eq!(classification.rationale, "wants to move it");
    }

    #[tokio::test]
    async fn test_unavailable_backend_falls_back_to_keywords() {
        let client = CannedClient(Err(anyhow::anyhow!("connection refused")));
        let classification = CompletionIntentClassifier::new(client)
            .classify(&history(), &Slots::default())
            .await
            .unwrap();

        assert_eq!(classification.intent, "cancel");
        assert!(classification.rationale.starts_with("fallback"));
    }

    #[tokio::test]
    async fn test_malformed_answer_without_fallback_is_error() {
        let client = CannedClient(Ok("I think they want to cancel".to_string()));
        let result = CompletionIntentClassifier::new(client)
            .with_keyword_fallback(false)
            .classify(&history(), &Slots::default())
            .await;

        assert!(matches!(result, Err(CollaboratorError::Malformed(_))));
    }

    #[test]
    fn test_command_line_parsing() {
        let client = CommandCompletionClient::from_command_line("llm -m small").unwrap();
        assert_eq!(client.program, "llm");
        assert_eq!(client.args, vec!["-m", "small"]);
        assert!(CommandCompletionClient::from_command_line("   ").is_none());
    }
}
