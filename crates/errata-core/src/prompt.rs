//! Reviewer and judge prompt construction.

use serde::Serialize;

use crate::backend::ChatMessage;
use crate::clean::clean_content;
use crate::{Annotation, PaperRecord, PredictedError};

pub const REVIEWER_SYSTEM_PROMPT: &str = r#"You are auditing a research paper for scientific rigor. The parsed contents of the paper follow. Report only flaws that directly undermine the scientific validity of its methods, analyses, or conclusions: errors in experimental design, data integrity, calculations, statistical inference, or reproducibility that call into question a specific claim, a paragraph, or the paper as a whole.

Do not report presentational, rhetorical, stylistic, or citation-practice issues.

Walk through the paper section by section first. Then answer in exactly this format, with no other keys or commentary:

<analysis>
{how you checked each section, figure, and table, and why you did or did not flag each potential flaw}
</analysis>

<response>
{
  "has_error": <true|false>,
  "errors": [
    {
      "location": "Section 2.1",
      "description": "The claim that all X are Y is contradicted by reference [5], which reports X that are not Y."
    },
    {
      "location": "Figure 3",
      "description": "The axis is labeled in seconds but the plotted values are in milliseconds, so the reported latency is off by 1000x."
    }
  ]
}
</response>

- Nothing outside the two tagged blocks.
- Be precise about where (section, figure, table, equation) and what the flaw is.
- Each description must give the scientific reason the content is wrong, not how it could be improved.

Begin your analysis now."#;

pub const JUDGE_SYSTEM_PROMPT: &str = r#"You are an expert judge. You will receive a JSON object with two arrays:

1. "annotations": ground-truth errors, each with "location" and "description".
2. "predictions": errors reported by a model, in the same format.

Task:
1. Compare every prediction against every annotation.
2. A prediction matches an annotation only when it identifies the same flaw at the same place. Location names may differ slightly, but the description must agree in substance.
3. Answer in exactly this format:

<analysis>
Your comparison of each prediction against each annotation.
</analysis>

<response>
{
  "matches": [
    {
      "location": "<location of the matched annotation>",
      "description": "<why the prediction matches this annotation>"
    }
  ]
}
</response>

Be rigorous: list a match only when you are confident the prediction and the annotation describe the same error."#;

/// Messages asking the reviewer to audit one paper.
pub fn reviewer_prompt(record: &PaperRecord) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(REVIEWER_SYSTEM_PROMPT),
        ChatMessage::user(clean_content(&record.content)),
    ]
}

/// The user message of a judge prompt.
///
/// Field order is fixed by the struct, so serialization is deterministic.
#[derive(Debug, Serialize)]
pub struct JudgePayload<'a> {
    pub annotations: Vec<Annotation>,
    pub predictions: &'a [PredictedError],
}

impl<'a> JudgePayload<'a> {
    pub fn new(record: &PaperRecord, predictions: &'a [PredictedError]) -> Self {
        Self {
            annotations: record.annotations(),
            predictions,
        }
    }

    pub fn to_json(&self) -> String {
        // Plain structs of strings always serialize.
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}

/// Messages asking the judge to match `predictions` against the paper's annotations.
pub fn judge_prompt(record: &PaperRecord, predictions: &[PredictedError]) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(JUDGE_SYSTEM_PROMPT),
        ChatMessage::user(JudgePayload::new(record, predictions).to_json()),
    ]
}
