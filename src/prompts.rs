//! Instruction text sent to the model.
//!
//! Every prompt fragment the pipeline sends is defined in this module.

use serde_json::Value;

/// Used when the request carries no `finalPrompt`.
pub const DEFAULT_FINAL_PROMPT: &str = "Merge the per-page extraction results below into one \
consolidated answer for the whole document. Combine information that spans pages, remove \
duplicates, and when pages disagree prefer the most complete value.";

/// Marker line between the final prompt and the serialised per-page results.
pub const AGGREGATION_MARKER: &str = "PER-PAGE RESULTS (JSON array, one entry per page, in page order):";

/// System instruction for page extraction when a page schema is given.
pub fn page_schema_instruction(schema: &Value) -> String {
    format!(
        "You extract information from a single document page image.\n\
Respond with ONLY one JSON value that strictly conforms to this JSON schema:\n\
{}\n\
Do not add explanations, comments, or markdown code fences. \
Use null for values that are not present on the page.",
        schema
    )
}

/// System instruction for the aggregation call when a final schema is given.
pub fn final_schema_instruction(schema: &Value) -> String {
    format!(
        "You merge per-page extraction results into one final answer.\n\
Respond with ONLY one JSON value that strictly conforms to this JSON schema:\n\
{}\n\
Do not add explanations, comments, or markdown code fences.",
        schema
    )
}

/// User text for the aggregation call.
pub fn aggregation_text(final_prompt: &str, page_results_json: &str) -> String {
    format!("{final_prompt}\n\n{AGGREGATION_MARKER}\n{page_results_json}")
}
