//! Prompts sent to the hosted model.

use crate::domain::model::Suggestion;

/// Prompt for reviewing a protocol. Placeholders: `{file_line}`, `{content}`.
pub const ANALYSIS_PROMPT: &str = r#"You are an experienced laboratory protocol reviewer. Review the protocol below and find concrete, actionable improvements.
{file_line}
Report each problem with:
1. category: one of safety, clarity, completeness, efficiency, formatting, best_practices
2. priority: HIGH, MEDIUM or LOW
3. location: the step number or section it applies to
4. issue: what is wrong or missing
5. suggestion: the specific change that fixes it
6. example (optional): how the corrected text would read

Pay particular attention to:
- Safety: missing hazard warnings, PPE, waste disposal, biosafety level
- Clarity: ambiguous instructions, unclear units, vague timings
- Completeness: missing reagents, equipment, concentrations, volumes, temperatures
- Efficiency: redundant steps, steps that can run in parallel, wasted incubation time
- Formatting: inconsistent numbering, steps that are hard to follow
- Best practices: controls, replicates, documentation, quality checks

Respond with a single JSON object in exactly this shape:
{
  "summary": "Two or three sentences describing the protocol and its overall quality",
  "overall_score": 7,
  "total_issues": 3,
  "suggestions": [
    {
      "category": "safety",
      "priority": "HIGH",
      "location": "Step 3",
      "issue": "Phenol is handled without any mention of a fume hood",
      "suggestion": "Add a warning to perform the extraction in a fume hood wearing nitrile gloves",
      "example": "3. In a fume hood, add 500 µL phenol:chloroform (wear nitrile gloves)."
    }
  ]
}

Protocol:

{content}

Return only the JSON object, with no text before or after it."#;

/// Prompt for rewriting a protocol. Placeholders: `{improvements}`, `{content}`.
pub const IMPROVEMENT_PROMPT: &str = r#"You are a laboratory protocol editor. Rewrite the protocol below so that it incorporates these accepted improvements:

{improvements}

Keep the original structure, numbering style and tone. Integrate each improvement where it belongs instead of appending a list of changes. Do not introduce changes that were not requested.

Original protocol:
{content}

Return only the complete improved protocol."#;

pub fn analysis_prompt(content: &str, filename: &str) -> String {
    let file_line = if filename.is_empty() {
        String::new()
    } else {
        format!("\nProtocol file: {}\n", filename)
    };

    ANALYSIS_PROMPT
        .replace("{file_line}", &file_line)
        .replace("{content}", content)
}

pub fn improvement_prompt(content: &str, accepted: &[Suggestion]) -> String {
    let improvements = accepted
        .iter()
        .map(|s| {
            let location = if s.location.trim().is_empty() {
                "General"
            } else {
                s.location.trim()
            };
            let change = if s.suggestion.trim().is_empty() {
                s.description.trim()
            } else {
                s.suggestion.trim()
            };
            format!("- {}: {}", location, change)
        })
        .collect::<Vec<_>>()
        .join("\n");

    IMPROVEMENT_PROMPT
        .replace("{improvements}", &improvements)
        .replace("{content}", content)
}
