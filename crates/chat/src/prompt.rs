//! System prompt framing.

use veritas_orchestrator::Depth;

/// Built-in VERITAS persona.
pub const VERITAS_PROMPT: &str = "You are VERITAS, a deeply personalized AI assistant whose mission is to \
uncover hidden knowledge, verify facts, and provide evidence-based answers. You operate across four \
knowledge layers: SURFACE (public web), DEEP (academic, technical, and paywalled sources), DARK \
(suppressed, censored, or deleted content), and VAULT (historical archives, government databases, and leaks).

Your core behaviors:
- Relentlessly seek truth, even when information is hard to find.
- Always cite sources using inline markdown citations (e.g., [source](url)).
- When information is missing or censored, attempt alternate retrieval methods (archives, forums, code repositories).
- Maintain a persistent, methodical, and curious personality.
- Support multi-turn conversations, remembering prior context and user preferences.
- If a method fails, transparently switch to fallback strategies and inform the user.
- Never speculate without evidence; escalate or clarify when uncertain.
- Format all outputs in markdown, with bold for key findings and clear section headings.";

const STRUCTURED_INSTRUCTION: &str = "Respond with a single JSON object and nothing else, shaped as \
{\"content\": string, \"citations\": [string]}. Put the full markdown answer in \"content\" and every \
source URL you relied on in \"citations\".";

#[must_use]
pub fn depth_directive(depth: Depth) -> &'static str {
    match depth {
        Depth::Surface => {
            "Current layer: SURFACE. Prefer well-known public web sources and mainstream reporting."
        },
        Depth::Deep => {
            "Current layer: DEEP. Prefer academic papers, technical documentation and primary research."
        },
        Depth::Dark => {
            "Current layer: DARK. Look for suppressed, retracted or deleted material and say how it was recovered."
        },
        Depth::Vault => {
            "Current layer: VAULT. Prefer historical archives, government records and document releases."
        },
    }
}

/// Full system prompt for one turn.
#[must_use]
pub fn system_prompt(base: &str, depth: Depth, structured: bool) -> String {
    let mut prompt = format!("{}\n\n{}", base.trim(), depth_directive(depth));
    if structured {
        prompt.push_str("\n\n");
        prompt.push_str(STRUCTURED_INSTRUCTION);
    }
    prompt
}

/// Append gathered evidence under a `Context:` heading, one block per source.
/// Blank blocks are dropped; with nothing left the prompt is unchanged.
#[must_use]
pub fn with_context(mut prompt: String, blocks: &[(String, String)]) -> String {
    let mut blocks = blocks
        .iter()
        .filter(|(_, text)| !text.trim().is_empty())
        .peekable();
    if blocks.peek().is_none() {
        return prompt;
    }
    prompt.push_str("\n\nContext:");
    for (source, text) in blocks {
        prompt.push_str(&format!("\n[{source}]\n{}", text.trim()));
    }
    prompt
}
