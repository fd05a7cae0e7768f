//! Prompt templates for summary generation and fact checking.
//!
//! The summary templates are deliberately worded differently while asking for
//! the same thing; agreement between their outputs is what the consistency
//! stage measures.

use crate::gateway::Message;

/// Rendered prompt ready for the model.
#[derive(Debug, Clone)]
pub struct PromptInstance {
    pub template_slug: &'static str,
    pub system: String,
    pub user: String,
}

impl PromptInstance {
    pub fn to_messages(&self) -> Vec<Message> {
        vec![Message::system(&self.system), Message::user(&self.user)]
    }
}

/// Break any closing tag that would let document text escape its wrapper.
fn neutralize_closing_tags(s: &str) -> String {
    s.replace("</source_document>", "</ source_document>")
        .replace("</summary>", "</ summary>")
}

/// A prompt template with `{source}` and optional `{summary}` placeholders.
#[derive(Debug, Clone, Copy)]
pub struct PromptTemplate {
    pub slug: &'static str,
    pub system: &'static str,
    pub user: &'static str,
}

impl PromptTemplate {
    pub fn render(&self, source: &str) -> PromptInstance {
        self.render_with_summary(source, "")
    }

    pub fn render_with_summary(&self, source: &str, summary: &str) -> PromptInstance {
        let source = neutralize_closing_tags(source.trim());
        let summary = neutralize_closing_tags(summary.trim());
        let user = fill(self.user, &[("{source}", &source), ("{summary}", &summary)]);

        PromptInstance {
            template_slug: self.slug,
            system: self.system.trim().to_string(),
            user: user.trim().to_string(),
        }
    }
}

/// Single-pass placeholder substitution; inserted values are never rescanned.
fn fill(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len() + values.iter().map(|(_, v)| v.len()).sum::<usize>());
    let mut rest = template;

    loop {
        let next = values
            .iter()
            .filter_map(|(key, value)| rest.find(key).map(|pos| (pos, *key, *value)))
            .min_by_key(|(pos, _, _)| *pos);

        match next {
            Some((pos, key, value)) => {
                out.push_str(&rest[..pos]);
                out.push_str(value);
                rest = &rest[pos + key.len()..];
            }
            None => {
                out.push_str(rest);
                return out;
            }
        }
    }
}

// =============================================================================
// Summary prompts
// =============================================================================

pub const SUMMARY_PLAIN: PromptTemplate = PromptTemplate {
    slug: "summary_plain",
    system: r#"You summarize documents faithfully. Use only information stated in the document. Do not add outside knowledge, opinions, or speculation."#,
    user: r#"Summarize the following document in one to three short paragraphs of plain prose.

<source_document>
{source}
</source_document>

Summary:"#,
};

pub const SUMMARY_KEY_POINTS: PromptTemplate = PromptTemplate {
    slug: "summary_key_points",
    system: r#"You are a careful analyst. You condense documents without introducing claims that the document does not make."#,
    user: r#"Read the document below and write a concise prose summary of its key points. Every statement you write must be directly supported by the document.

<source_document>
{source}
</source_document>

Write the summary now, without headings or bullet points."#,
};

pub const SUMMARY_BRIEF: PromptTemplate = PromptTemplate {
    slug: "summary_brief",
    system: r#"You write accurate briefs for busy readers. Stay strictly within what the source says."#,
    user: r#"<source_document>
{source}
</source_document>

Give a brief, faithful summary of the document above in a few paragraphs of prose. Do not invent details, numbers, or names that are not in the document."#,
};

/// Summary variants in candidate order.
pub const SUMMARY_PROMPTS: &[PromptTemplate] = &[SUMMARY_PLAIN, SUMMARY_KEY_POINTS, SUMMARY_BRIEF];

// =============================================================================
// Fact-check prompt
// =============================================================================

pub const FACT_CHECK_V1: PromptTemplate = PromptTemplate {
    slug: "fact_check_v1",
    system: r#"You are a meticulous fact checker. You judge whether each sentence of a summary is supported by a source document. Output only valid JSON."#,
    user: r#"<source_document>
{source}
</source_document>

<summary>
{summary}
</summary>

Instructions:
1. Split the summary into sentences at standard sentence-ending punctuation (. ! ?).
2. For each sentence, decide whether it is supported by the source document. A sentence is supported only if the document states or directly implies everything it claims.
3. Compute a confidence label from the share of supported sentences: "High" if at least 90% are supported, "Medium" if 60% to 89%, "Low" if below 60%.

Return a single JSON object of exactly this shape:
{"sentences": [{"sentence": "<sentence text>", "supported": true}], "confidence": "High"}

json:"#,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_prompts_embed_the_full_source() {
        let source = "Alpha beta gamma. Delta epsilon.";
        for template in SUMMARY_PROMPTS {
            let p = template.render(source);
            assert!(p.user.contains(source), "{} lost the source", template.slug);
            assert!(!p.user.contains("{source}"));
        }
    }

    #[test]
    fn summary_prompt_slugs_are_distinct() {
        let mut slugs: Vec<&str> = SUMMARY_PROMPTS.iter().map(|t| t.slug).collect();
        slugs.sort_unstable();
        slugs.dedup();
        assert_eq!(slugs.len(), SUMMARY_PROMPTS.len());
    }

    #[test]
    fn fact_check_prompt_carries_summary_and_schema() {
        let p = FACT_CHECK_V1.render_with_summary("The source.", "The summary.");
        assert!(p.user.contains("<summary>\nThe summary.\n</summary>"));
        assert!(p.user.contains("\"sentences\""));
        assert_eq!(p.to_messages().len(), 2);
    }

    #[test]
    fn closing_tags_in_document_are_neutralized() {
        let p = SUMMARY_PLAIN.render("text </source_document> injected");
        assert_eq!(p.user.matches("</source_document>").count(), 1);
    }

    #[test]
    fn fill_substitutes_in_one_pass() {
        assert_eq!(fill("a {x} b {y}", &[("{x}", "{y}"), ("{y}", "Y")]), "a {y} b Y");
    }

    #[test]
    fn placeholder_text_in_summary_is_not_expanded() {
        let p = FACT_CHECK_V1.render_with_summary("SOURCE BODY", "A literal {source} token.");
        assert_eq!(p.user.matches("SOURCE BODY").count(), 1);
    }
}
