//! Prompt builders for every drafting step.
//!
//! Formatting is deterministic and runs outside memoized steps; only the
//! model call itself is wrapped.

use crate::ai::Prompt;
use crate::store::models::{LengthRange, Source};

const EDITOR_SYSTEM: &str = "You are a senior news editor. You write accurate, \
well-sourced copy and never invent facts that are not in the provided material.";

/// Output is wrapped in these tags and stripped afterwards.
pub const OUTPUT_OPEN: &str = "<output>";
pub const OUTPUT_CLOSE: &str = "</output>";

fn instructions_block(instructions: &str) -> String {
    if instructions.trim().is_empty() {
        String::new()
    } else {
        format!("\n<instructions>\n{}\n</instructions>\n", instructions.trim())
    }
}

pub fn format_source(source: &Source) -> String {
    let mut out = format!(
        "<source number=\"{}\" attribution=\"{}\"",
        source.number, source.attribution
    );
    if let Some(url) = &source.url {
        out.push_str(&format!(" url=\"{}\"", url));
    }
    if source.flags.is_primary_source {
        out.push_str(" primary=\"true\"");
    }
    out.push_str(">\n");
    if !source.description.is_empty() {
        out.push_str(&format!("<description>{}</description>\n", source.description));
    }
    out.push_str(&source.text);
    out.push_str("\n</source>");
    out
}

pub fn format_sources(sources: &[Source]) -> String {
    sources
        .iter()
        .map(format_source)
        .collect::<Vec<_>>()
        .join("\n\n")
}

// ── Fact gathering ────────────────────────────────────────────────────

pub fn extract_facts(source: &Source, instructions: &str) -> Prompt {
    Prompt::new(
        EDITOR_SYSTEM,
        format!(
            "List every verifiable fact, figure and direct quote in the source below. \
             Keep quotes exact and attribute each one.\n{}\n{}",
            instructions_block(instructions),
            format_source(source)
        ),
    )
}

pub fn summarize_facts(facts: &str, instructions: &str) -> Prompt {
    Prompt::new(
        EDITOR_SYSTEM,
        format!(
            "Summarize the extracted facts into a short brief ordered by news value.\n{}\n\
             <facts>\n{}\n</facts>",
            instructions_block(instructions),
            facts
        ),
    )
}

/// Second pass over one source, given what every source yielded on the
/// first pass, so the model can focus on what is unique to this one.
pub fn extract_facts_conditional(source: &Source, all_facts: &str, instructions: &str) -> Prompt {
    Prompt::new(
        EDITOR_SYSTEM,
        format!(
            "Here are the facts already extracted from all sources:\n<all-facts>\n{}\n</all-facts>\n\n\
             Split the facts of source {} into those it shares with other sources and those \
             only it reports.\n{}\n{}",
            all_facts,
            source.number,
            instructions_block(instructions),
            format_source(source)
        ),
    )
}

// ── Headline ──────────────────────────────────────────────────────────

pub fn generate_headline(digest: &str, number_of_blobs: u8, instructions: &str) -> Prompt {
    Prompt::new(
        EDITOR_SYSTEM,
        format!(
            "Write one punchy headline for the most newsworthy development, followed by \
             exactly {} short sentences covering the core highlights.\n{}\n<facts>\n{}\n</facts>",
            number_of_blobs,
            instructions_block(instructions),
            digest
        ),
    )
}

/// Turns the free-text headline answer into structured output without
/// rewording it.
pub fn structure_headline(raw: &str) -> Prompt {
    Prompt::new(
        "Do not change any word in the output. Just return the headline and blobs in the \
         specified format. Do not add any other text or commentary. Verbatim.",
        format!(
            "Output the headline and blobs in the specified format. Here is the raw output \
             from the AI: {}",
            raw
        ),
    )
}

// ── Drafting ──────────────────────────────────────────────────────────

pub fn create_outline(headline: &str, blobs: &[String], digest: &str, instructions: &str) -> Prompt {
    Prompt::new(
        EDITOR_SYSTEM,
        format!(
            "Outline an article under the headline \"{}\".\nKey points:\n- {}\n{}\n\
             <facts>\n{}\n</facts>",
            headline,
            blobs.join("\n- "),
            instructions_block(instructions),
            digest
        ),
    )
}

pub fn verbatim_rewrite(source: &Source, headline: &str, instructions: &str) -> Prompt {
    Prompt::new(
        "You reproduce source copy verbatim. Fix only formatting; do not reword, \
         reorder or summarize.",
        format!(
            "Reproduce the source below as an article under the headline \"{}\". Wrap the \
             article in {} tags.\n{}\n{}",
            headline,
            OUTPUT_OPEN,
            instructions_block(instructions),
            format_source(source)
        ),
    )
    .with_prefill(OUTPUT_OPEN)
}

pub fn draft_article(outline: &str, digest: &str, length: LengthRange, instructions: &str) -> Prompt {
    Prompt::new(
        EDITOR_SYSTEM,
        format!(
            "Write the article following the outline. Target length: {} words.\n{}\n\
             <outline>\n{}\n</outline>\n<facts>\n{}\n</facts>",
            length.as_str(),
            instructions_block(instructions),
            outline,
            digest
        ),
    )
}

pub fn revise_article(draft: &str, length: LengthRange, instructions: &str) -> Prompt {
    Prompt::new(
        EDITOR_SYSTEM,
        format!(
            "Tighten the draft below. Keep it within {} words and keep every fact.\n{}\n\
             <draft>\n{}\n</draft>",
            length.as_str(),
            instructions_block(instructions),
            draft
        ),
    )
}

pub fn add_source_attribution(article: &str, sources: &[Source]) -> Prompt {
    Prompt::new(
        EDITOR_SYSTEM,
        format!(
            "Add attribution to the article so every fact names the outlet that reported \
             it. Change nothing else.\n<article>\n{}\n</article>\n\n{}",
            article,
            format_sources(sources)
        ),
    )
}

// ── Aggregation extras ────────────────────────────────────────────────

pub fn apply_color_coding(article: &str, sources: &[Source]) -> Prompt {
    Prompt::new(
        "You mark up articles as HTML. Each paragraph is a <p>; each sentence is a \
         <span style=\"color:...\"> whose colour identifies the source it came from.",
        format!(
            "Colour-code the article by source. Use one distinct colour per source number.\n\
             <article>\n{}\n</article>\n\n{}",
            article,
            format_sources(sources)
        ),
    )
}

pub fn detect_rips(article_text: &str, sources: &[Source]) -> Prompt {
    Prompt::new(
        "You check articles for passages copied too closely from their sources \
         (\"rips\"). Quote exactly.",
        format!(
            "Compare the article with the sources. Score originality from 0 to 100 and \
             list every passage that copies a source too closely.\n<article>\n{}\n</article>\n\n{}",
            article_text,
            format_sources(sources)
        ),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::models::SourceFlags;

    fn source() -> Source {
        Source {
            number: 2,
            attribution: "Daily Ledger".into(),
            url: Some("https://ledger.example.com/a".into()),
            description: String::new(),
            text: "The council met on Tuesday.".into(),
            flags: SourceFlags {
                is_primary_source: true,
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_format_source_carries_number_and_flags() {
        let formatted = format_source(&source());
        assert!(formatted.starts_with("<source number=\"2\" attribution=\"Daily Ledger\""));
        assert!(formatted.contains("primary=\"true\""));
        assert!(formatted.contains("The council met on Tuesday."));
        assert!(!formatted.contains("<description>"));
    }

    #[test]
    fn test_empty_instructions_are_omitted() {
        let prompt = extract_facts(&source(), "  ");
        assert!(!prompt.user.contains("<instructions>"));
        let prompt = extract_facts(&source(), "Focus on money");
        assert!(prompt.user.contains("<instructions>\nFocus on money\n</instructions>"));
    }

    #[test]
    fn test_verbatim_rewrite_prefills_output_tag() {
        let prompt = verbatim_rewrite(&source(), "Budget passes", "");
        assert_eq!(prompt.assistant.as_deref(), Some(OUTPUT_OPEN));
        assert!(prompt.user.contains("\"Budget passes\""));
    }
}
