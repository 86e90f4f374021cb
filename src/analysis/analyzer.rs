use crate::analysis::prompts;
use crate::config::Settings;
use crate::domain::model::{AnalysisMetadata, AnalysisReport, Category, Priority, Suggestion};
use crate::domain::ports::{CompletionRequest, ModelClient};
use crate::utils::error::{ProtocolError, Result};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

/// Reviews protocol text with the hosted model and returns prioritized suggestions.
pub struct ProtocolAnalyzer {
    client: Arc<dyn ModelClient>,
    max_tokens: u32,
    temperature: f32,
    max_content_chars: usize,
}

/// Analysis fields parsed from the model's reply, before request metadata is attached.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedAnalysis {
    pub summary: String,
    pub overall_score: Option<String>,
    pub total_issues: usize,
    pub suggestions: Vec<Suggestion>,
}

#[derive(Debug, Deserialize)]
struct RawAnalysis {
    #[serde(default)]
    summary: Option<Value>,
    #[serde(default)]
    overall_score: Option<Value>,
    #[serde(default)]
    total_issues: Option<Value>,
    #[serde(default)]
    suggestions: Option<Vec<RawSuggestion>>,
}

#[derive(Debug, Deserialize)]
struct RawSuggestion {
    #[serde(default)]
    category: Option<Value>,
    #[serde(default)]
    priority: Option<Value>,
    #[serde(default)]
    location: Option<Value>,
    #[serde(default, alias = "description")]
    issue: Option<Value>,
    #[serde(default)]
    suggestion: Option<Value>,
    #[serde(default)]
    example: Option<Value>,
}

impl ProtocolAnalyzer {
    pub fn new(client: Arc<dyn ModelClient>, settings: &Settings) -> Self {
        Self {
            client,
            max_tokens: settings.max_tokens(),
            temperature: settings.temperature(),
            max_content_chars: settings.max_content_chars(),
        }
    }

    pub async fn analyze(&self, protocol_text: &str, filename: &str) -> Result<AnalysisReport> {
        let protocol_length = protocol_text.chars().count();
        let content = truncate_content(protocol_text, self.max_content_chars);
        if content.len() < protocol_text.len() {
            warn!(
                "Protocol {} truncated from {} to {} characters before analysis",
                filename, protocol_length, self.max_content_chars
            );
        }

        info!(
            "🔬 Analyzing protocol {} ({} characters) with {}",
            if filename.is_empty() { "<unnamed>" } else { filename },
            protocol_length,
            self.client.model_name()
        );

        let completion = self
            .client
            .complete(&CompletionRequest {
                prompt: prompts::analysis_prompt(content, filename),
                max_tokens: self.max_tokens,
                temperature: self.temperature,
            })
            .await?;

        let parsed = parse_analysis_response(&completion.text)?;
        info!(
            "✅ Analysis found {} suggestions ({} tokens)",
            parsed.suggestions.len(),
            completion.tokens_used()
        );

        Ok(AnalysisReport {
            summary: parsed.summary,
            overall_score: parsed.overall_score,
            total_issues: parsed.total_issues,
            suggestions: parsed.suggestions,
            metadata: AnalysisMetadata {
                filename: filename.to_string(),
                model_used: self.client.model_name().to_string(),
                protocol_length,
                tokens_used: completion.tokens_used(),
            },
        })
    }
}

fn truncate_content(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => &text[..byte_index],
        None => text,
    }
}

/// Parses the JSON object embedded in a model reply.
///
/// The object is taken from the first `{` to the last `}` so that prose or
/// code fences around it are tolerated. Priorities outside HIGH/MEDIUM/LOW are
/// downgraded to LOW; suggestions are returned High first, keeping model order
/// within a priority.
pub fn parse_analysis_response(response_text: &str) -> Result<ParsedAnalysis> {
    let start = response_text.find('{');
    let end = response_text.rfind('}');

    let json_text = match (start, end) {
        (Some(start), Some(end)) if end > start => &response_text[start..=end],
        _ => {
            return Err(ProtocolError::MalformedResponse {
                message: "no JSON object found in model response".to_string(),
            })
        }
    };

    let raw: RawAnalysis =
        serde_json::from_str(json_text).map_err(|e| ProtocolError::MalformedResponse {
            message: format!("could not parse analysis JSON: {}", e),
        })?;

    let mut suggestions: Vec<Suggestion> = raw
        .suggestions
        .unwrap_or_default()
        .into_iter()
        .filter_map(normalize_suggestion)
        .collect();
    suggestions.sort_by_key(|s| s.priority.rank());

    let total_issues = raw
        .total_issues
        .as_ref()
        .and_then(leading_number)
        .unwrap_or(suggestions.len());

    let summary = raw
        .summary
        .as_ref()
        .and_then(value_text)
        .unwrap_or_else(|| "Analysis completed".to_string());

    Ok(ParsedAnalysis {
        summary,
        overall_score: raw.overall_score.as_ref().and_then(value_text),
        total_issues,
        suggestions,
    })
}

fn normalize_suggestion(raw: RawSuggestion) -> Option<Suggestion> {
    let description = raw.issue.as_ref().and_then(value_text).unwrap_or_default();
    let suggestion = raw
        .suggestion
        .as_ref()
        .and_then(value_text)
        .unwrap_or_default();

    if description.is_empty() && suggestion.is_empty() {
        warn!("Dropping suggestion without issue or recommendation text");
        return None;
    }

    let priority_text = raw.priority.as_ref().and_then(value_text).unwrap_or_default();
    let priority = Priority::parse(&priority_text).unwrap_or_else(|| {
        warn!("Unknown suggestion priority {:?}, treating as LOW", priority_text);
        Priority::Low
    });

    let category = raw
        .category
        .as_ref()
        .and_then(value_text)
        .map(|c| Category::parse(&c))
        .unwrap_or_else(|| Category::Other("general".to_string()));

    Some(Suggestion {
        category,
        priority,
        location: raw.location.as_ref().and_then(value_text).unwrap_or_default(),
        description,
        suggestion,
        example: raw.example.as_ref().and_then(value_text),
    })
}

/// Non-empty text form of a scalar JSON value.
fn value_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

fn leading_number(value: &Value) -> Option<usize> {
    match value {
        Value::Number(n) => n.as_u64().map(|n| n as usize),
        Value::String(s) => {
            let digits: String = s.trim().chars().take_while(|c| c.is_ascii_digit()).collect();
            digits.parse().ok()
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::testing::ScriptedModel;

    const MODEL_REPLY: &str = r#"Here is my review:
```json
{
  "summary": "A minimal PCR protocol missing key parameters.",
  "overall_score": 4,
  "total_issues": "3 issues",
  "suggestions": [
    {"category": "clarity", "priority": "low", "location": "Step 4", "issue": "Result check is vague", "suggestion": "Describe the gel electrophoresis check"},
    {"category": "Safety", "priority": "HIGH", "location": "Step 1", "issue": "No PPE listed", "suggestion": "Wear gloves", "example": "1. Wearing gloves, mix..."},
    {"category": "completeness", "priority": "Medium", "location": "Step 3", "issue": "Cycling program missing", "suggestion": "Specify 30 cycles of 95/55/72 °C"}
  ]
}
```"#;

    #[test]
    fn test_parse_sorts_by_priority() {
        let parsed = parse_analysis_response(MODEL_REPLY).unwrap();

        assert_eq!(parsed.summary, "A minimal PCR protocol missing key parameters.");
        assert_eq!(parsed.overall_score.as_deref(), Some("4"));
        assert_eq!(parsed.total_issues, 3);

        let priorities: Vec<Priority> = parsed.suggestions.iter().map(|s| s.priority).collect();
        assert_eq!(priorities, vec![Priority::High, Priority::Medium, Priority::Low]);
        assert_eq!(parsed.suggestions[0].category, Category::Safety);
        assert_eq!(parsed.suggestions[0].example.as_deref(), Some("1. Wearing gloves, mix..."));
    }

    #[test]
    fn test_parse_fills_defaults() {
        let parsed = parse_analysis_response(
            r#"{"suggestions": [{"category": "efficiency", "priority": "urgent", "issue": "Two incubations can overlap"}]}"#,
        )
        .unwrap();

        assert_eq!(parsed.summary, "Analysis completed");
        assert_eq!(parsed.total_issues, 1);
        assert_eq!(parsed.overall_score, None);
        // 未知優先順序一律視為 LOW
        assert_eq!(parsed.suggestions[0].priority, Priority::Low);
        assert_eq!(parsed.suggestions[0].category, Category::Efficiency);
    }

    #[test]
    fn test_parse_null_suggestions_and_empty_entries() {
        let parsed = parse_analysis_response(
            r#"{"summary": "Fine", "suggestions": null}"#,
        )
        .unwrap();
        assert!(parsed.suggestions.is_empty());

        let parsed = parse_analysis_response(
            r#"{"suggestions": [{"category": "clarity", "priority": "LOW"}]}"#,
        )
        .unwrap();
        assert!(parsed.suggestions.is_empty());
    }

    #[test]
    fn test_parse_rejects_non_json() {
        let err = parse_analysis_response("I could not review this protocol.").unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedResponse { .. }));

        let err = parse_analysis_response("{ summary: broken }").unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedResponse { .. }));
    }

    #[tokio::test]
    async fn test_analyze_attaches_metadata() {
        let model = Arc::new(ScriptedModel::new(vec![MODEL_REPLY]));
        let analyzer = ProtocolAnalyzer::new(model.clone(), &Settings::default());

        let report = analyzer.analyze("1. Mix all reagents", "pcr.pdf").await.unwrap();

        assert_eq!(report.metadata.filename, "pcr.pdf");
        assert_eq!(report.metadata.model_used, "scripted-model");
        assert_eq!(report.metadata.protocol_length, 19);
        assert_eq!(report.metadata.tokens_used, 150);
        assert_eq!(report.suggestions.len(), 3);

        let prompts = model.prompts();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("1. Mix all reagents"));
        assert!(prompts[0].contains("Protocol file: pcr.pdf"));
    }

    #[tokio::test]
    async fn test_analyze_truncates_long_protocols() {
        let model = Arc::new(ScriptedModel::new(vec![r#"{"suggestions": []}"#]));
        let mut settings = Settings::default();
        settings.model.max_content_chars = Some(10);
        let analyzer = ProtocolAnalyzer::new(model.clone(), &settings);

        let report = analyzer
            .analyze("0123456789ABCDEFGHIJ", "long.docx")
            .await
            .unwrap();

        assert_eq!(report.metadata.protocol_length, 20);
        let prompt = &model.prompts()[0];
        assert!(prompt.contains("0123456789"));
        assert!(!prompt.contains("ABCDEFGHIJ"));
    }

    #[tokio::test]
    async fn test_analyze_propagates_model_errors() {
        let model = Arc::new(ScriptedModel::failing(|| ProtocolError::RateLimited {
            retry_after: None,
        }));
        let analyzer = ProtocolAnalyzer::new(model, &Settings::default());

        let err = analyzer.analyze("text", "a.pdf").await.unwrap_err();
        assert!(matches!(err, ProtocolError::RateLimited { .. }));
    }
}
