//! Prompt templates for the three workflow stages.
//!
//! The structured stages (classification, gap analysis) instruct the
//! model to answer with a single JSON object so the response can be
//! parsed without heuristics. The translation stage uses a
//! direction-specific system prompt, and its user prompt embeds the
//! committed gaps as annotation instructions.

use liaison_core::session::{Direction, Gap};

/// System prompt for perspective classification.
pub const CLASSIFY_SYSTEM: &str = "\
You read a short piece of workplace text and decide which role wrote it.
Answer with a single JSON object: {\"perspective\": \"pm\"} if it reads
like a product manager (user outcomes, business framing, feature asks),
or {\"perspective\": \"dev\"} if it reads like an engineer (implementation
detail, technical constraints, systems language). No other output.";

/// System prompt for gap analysis when translating PM text for engineers.
const GAPS_PM_TO_DEV_SYSTEM: &str = "\
You review a product request before it reaches engineers and list what is
missing for implementation: acceptance criteria, edge cases, constraints,
affected systems, rollout expectations. Answer with a single JSON object:
{\"gaps\": [{\"category\": \"...\", \"description\": \"...\"}],
\"suggestions\": [\"...\"]}. Both lists may be empty. No other output.";

/// System prompt for gap analysis when translating dev text for PMs.
const GAPS_DEV_TO_PM_SYSTEM: &str = "\
You review an engineering note before it reaches product stakeholders and
list what is missing for a product audience: user impact, timeline
implications, risk framing, what changes for customers. Answer with a
single JSON object: {\"gaps\": [{\"category\": \"...\", \"description\":
\"...\"}], \"suggestions\": [\"...\"]}. Both lists may be empty. No other
output.";

/// System prompt for the PM-to-dev translation stream.
const PM_TO_DEV_SYSTEM: &str = "\
You translate product language into engineering language. Restate the
request in technical implementation framing: concrete components, APIs,
data, and edge cases an engineer would plan around. Keep the original
intent exactly; do not invent requirements. Where the input left a noted
gap, mark the assumption explicitly rather than silently filling it.";

/// System prompt for the dev-to-PM translation stream.
const DEV_TO_PM_SYSTEM: &str = "\
You translate engineering language into product language. Restate the
note in terms of user impact, scope, and trade-offs a product manager
acts on. Drop implementation detail that does not change a product
decision. Keep the original meaning exactly; where the input left a noted
gap, call it out as an open question.";

/// Select the gap-analysis system prompt for a direction.
pub fn gap_system_prompt(direction: Direction) -> &'static str {
    match direction {
        Direction::PmToDev => GAPS_PM_TO_DEV_SYSTEM,
        Direction::DevToPm => GAPS_DEV_TO_PM_SYSTEM,
    }
}

/// Select the translation system prompt for a direction.
pub fn translate_system_prompt(direction: Direction) -> &'static str {
    match direction {
        Direction::PmToDev => PM_TO_DEV_SYSTEM,
        Direction::DevToPm => DEV_TO_PM_SYSTEM,
    }
}

/// Build the translation user prompt: content, optional context block,
/// and the committed gaps as annotation instructions.
pub fn build_translate_prompt(content: &str, context: Option<&str>, gaps: &[Gap]) -> String {
    let mut prompt = format!("Translate the following text:\n\n{content}");

    if let Some(ctx) = context {
        prompt.push_str("\n\nAdditional context:\n");
        prompt.push_str(ctx);
    }

    if !gaps.is_empty() {
        prompt.push_str(
            "\n\nThe input may be missing the following information; \
             annotate or flag these in the translation rather than \
             inventing answers:\n",
        );
        for gap in gaps {
            prompt.push_str("- ");
            prompt.push_str(&gap.description);
            prompt.push('\n');
        }
    }

    prompt
}
