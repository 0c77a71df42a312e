//! 流水线提示词模板

use crate::store::PersonaDraft;

pub const PERSONA_SYSTEM: &str = "You are tasked with creating a set of AI analyst personas. \
Each analyst focuses on a distinct sub-theme of the research topic. \
Respond with JSON only, in the form {\"analysts\": [{\"name\": \"...\", \"role\": \"...\", \"affiliation\": \"...\", \"description\": \"...\"}]}.";

pub const INTERVIEW_SYSTEM: &str = "You are an expert being interviewed by an analyst. \
Answer with concrete facts, cite sources inline where you can, and stay within the analyst's focus.";

pub const SECTION_SYSTEM: &str = "You are a technical writer composing one part of a research report \
from a set of analyst memos. Use markdown. Do not invent facts absent from the memos.";

pub fn persona_prompt(topic: &str, max_analysts: u8) -> String {
    format!(
        "Research topic: {}\n\nCreate at most {} analysts. Pick the most interesting themes first.",
        topic, max_analysts
    )
}

pub fn interview_prompt(topic: &str, persona: &PersonaDraft, guidance: Option<&str>) -> String {
    let mut prompt = format!(
        "Topic: {}\n\nAnalyst: {} ({}, {})\nFocus: {}\n\nWrite a concise memo of what this analyst learned, with a markdown heading.",
        topic, persona.name, persona.role, persona.affiliation, persona.description
    );
    if let Some(text) = guidance {
        prompt.push_str("\n\nEditorial guidance from the reviewer: ");
        prompt.push_str(text);
    }
    prompt
}

pub fn section_prompt(section: &str, topic: &str, memos: &[String], guidance: Option<&str>) -> String {
    let mut prompt = format!(
        "Topic: {}\n\nWrite the {} of the report.\n\nMemos:\n\n{}",
        topic,
        section,
        memos.join("\n\n")
    );
    if let Some(text) = guidance {
        prompt.push_str("\n\nEditorial guidance from the reviewer: ");
        prompt.push_str(text);
    }
    prompt
}
