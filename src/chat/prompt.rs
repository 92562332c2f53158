//! Prompt assembly and reply post-processing for the news assistant
//!
//! - System instruction: persona plus the numbered articles of the attached digest
//! - History: the most recent transcript messages mapped to model turns
//! - Follow-ups: the model ends its answer with a `FOLLOW_UPS:` section that is
//!   stripped from the visible text by [`FollowUpSplitter`]
//! - Citations: grounding sources, or digest articles referenced as `[n]`

use crate::chat::types::{Citation, GroundingSource, MessageRole};
use crate::genai::{GenerationRequest, Turn, TurnRole};
use crate::store::{ArticleNode, ChatMessageNode, DigestNode};
use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

pub const FOLLOW_UPS_MARKER: &str = "FOLLOW_UPS:";

pub const BASE_SYSTEM_PROMPT: &str = r#"You are the news assistant of a personalized daily digest service.
Answer questions about current events clearly and concisely, in the language of the question.
Prefer the articles provided below over general knowledge. When you use one, cite it with its
bracketed number, for example [2]. If the articles do not cover the question, say so before
answering from other sources. Never invent quotes, figures or URLs."#;

/// Summary length kept per article in the system instruction
const MAX_SUMMARY_CHARS: usize = 400;

static CITATION_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[(\d{1,3})\]").expect("valid citation regex"));

/// A digest together with its articles in digest order
#[derive(Debug, Clone)]
pub struct DigestContext {
    pub digest: DigestNode,
    pub articles: Vec<ArticleNode>,
}

/// Build the system instruction for a conversation
pub fn build_system_instruction(digest: Option<&DigestContext>, max_follow_ups: usize) -> String {
    let mut prompt = String::from(BASE_SYSTEM_PROMPT);

    if let Some(ctx) = digest {
        prompt.push_str(&format!(
            "\n\n## Digest: {} ({})\n",
            ctx.digest.title,
            ctx.digest.date.format("%Y-%m-%d")
        ));
        if let Some(ref summary) = ctx.digest.summary {
            prompt.push_str(summary.trim());
            prompt.push('\n');
        }
        prompt.push_str("\n## Articles\n");
        for (i, article) in ctx.articles.iter().enumerate() {
            prompt.push_str(&format_article(i + 1, article));
        }
    }

    if max_follow_ups > 0 {
        prompt.push_str(&format!(
            "\n\nAfter your answer, write a line containing only `{}` followed by up to {} short \
             follow-up questions the reader might ask next, one per line, each starting with \"- \".",
            FOLLOW_UPS_MARKER, max_follow_ups
        ));
    }

    prompt
}

fn format_article(number: usize, article: &ArticleNode) -> String {
    let mut entry = format!(
        "[{}] {} - {} ({})\n",
        number, article.title, article.source, article.url
    );
    if let Some(summary) = article.summary.as_deref().map(str::trim) {
        if !summary.is_empty() {
            let summary: String = summary.chars().take(MAX_SUMMARY_CHARS).collect();
            entry.push_str("    ");
            entry.push_str(&summary);
            entry.push('\n');
        }
    }
    entry
}

/// Map the last `limit` transcript messages to model turns.
///
/// Leading model turns are dropped and consecutive turns of the same role are
/// merged, so the result always starts with a user turn and alternates.
pub fn history_turns(transcript: &[ChatMessageNode], limit: usize) -> Vec<Turn> {
    let start = transcript.len().saturating_sub(limit);
    let mut turns: Vec<Turn> = Vec::new();

    for message in &transcript[start..] {
        let role = match message.role {
            MessageRole::User => TurnRole::User,
            MessageRole::Assistant => TurnRole::Model,
        };
        if turns.is_empty() && role == TurnRole::Model {
            continue;
        }
        match turns.last_mut() {
            Some(last) if last.role == role => {
                last.text.push_str("\n\n");
                last.text.push_str(&message.content);
            }
            _ => turns.push(Turn {
                role,
                text: message.content.clone(),
            }),
        }
    }

    turns
}

/// Assemble a full generation request
pub fn build_request(
    system_instruction: String,
    mut history: Vec<Turn>,
    user_text: &str,
    grounding: bool,
    temperature: f32,
) -> GenerationRequest {
    match history.last_mut() {
        Some(last) if last.role == TurnRole::User => {
            last.text.push_str("\n\n");
            last.text.push_str(user_text);
        }
        _ => history.push(Turn::user(user_text)),
    }

    GenerationRequest {
        system_instruction: Some(system_instruction),
        turns: history,
        grounding,
        temperature: Some(temperature),
    }
}

// ============================================================================
// Follow-up section splitting
// ============================================================================

/// Separates the visible answer from the trailing follow-up section while
/// text streams in. Never forwards a partial marker; trailing whitespace is
/// held back until more visible text arrives.
#[derive(Debug)]
pub struct FollowUpSplitter {
    pending: String,
    in_follow_ups: bool,
    follow_up_text: String,
    max_follow_ups: usize,
}

impl FollowUpSplitter {
    pub fn new(max_follow_ups: usize) -> Self {
        Self {
            pending: String::new(),
            in_follow_ups: false,
            follow_up_text: String::new(),
            max_follow_ups,
        }
    }

    /// Feed a delta, returning the text safe to show now (possibly empty)
    pub fn push(&mut self, delta: &str) -> String {
        if self.in_follow_ups {
            self.follow_up_text.push_str(delta);
            return String::new();
        }

        self.pending.push_str(delta);

        if let Some(idx) = self.pending.find(FOLLOW_UPS_MARKER) {
            let visible = self.pending[..idx].trim_end().to_string();
            self.follow_up_text
                .push_str(&self.pending[idx + FOLLOW_UPS_MARKER.len()..]);
            self.pending.clear();
            self.in_follow_ups = true;
            return visible;
        }

        let held = partial_marker_suffix(&self.pending);
        let candidate = &self.pending[..self.pending.len() - held];
        let emit_len = candidate.trim_end().len();
        let emitted = self.pending[..emit_len].to_string();
        self.pending.drain(..emit_len);
        emitted
    }

    /// Flush the stream: returns the remaining visible text and the parsed questions
    pub fn finish(mut self) -> (String, Vec<String>) {
        let rest = if self.in_follow_ups {
            String::new()
        } else {
            std::mem::take(&mut self.pending).trim_end().to_string()
        };
        let questions = parse_follow_ups(&self.follow_up_text, self.max_follow_ups);
        (rest, questions)
    }
}

/// Length of the longest suffix of `text` that is a proper prefix of the marker
fn partial_marker_suffix(text: &str) -> usize {
    (1..FOLLOW_UPS_MARKER.len())
        .rev()
        .find(|&k| text.ends_with(&FOLLOW_UPS_MARKER[..k]))
        .unwrap_or(0)
}

/// Parse the follow-up section: one question per line, bullets and numbering stripped
pub fn parse_follow_ups(section: &str, max: usize) -> Vec<String> {
    section
        .lines()
        .map(|line| {
            let line = line.trim();
            let line = line.trim_start_matches(['-', '*', '•']);
            let without_number = line
                .trim_start_matches(|c: char| c.is_ascii_digit())
                .strip_prefix(['.', ')']);
            without_number.unwrap_or(line).trim().to_string()
        })
        .filter(|q| !q.is_empty())
        .take(max)
        .collect()
}

/// Split a complete (non-streamed) answer into visible text and follow-ups
pub fn split_follow_ups(text: &str, max_follow_ups: usize) -> (String, Vec<String>) {
    let mut splitter = FollowUpSplitter::new(max_follow_ups);
    let mut visible = splitter.push(text);
    let (rest, questions) = splitter.finish();
    visible.push_str(&rest);
    (visible, questions)
}

// ============================================================================
// Citations
// ============================================================================

/// Grounding sources deduplicated by URL, in first-seen order
pub fn dedup_sources(sources: &[GroundingSource]) -> Vec<GroundingSource> {
    let mut seen = HashSet::new();
    sources
        .iter()
        .filter(|s| seen.insert(s.uri.clone()))
        .cloned()
        .collect()
}

/// Citations for an answer: grounding sources when the model returned any,
/// otherwise the digest articles referenced with `[n]` markers
pub fn collect_citations(
    sources: &[GroundingSource],
    answer: &str,
    digest: Option<&DigestContext>,
) -> Vec<Citation> {
    if !sources.is_empty() {
        return dedup_sources(sources)
            .into_iter()
            .map(Citation::from)
            .collect();
    }

    let Some(ctx) = digest else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    CITATION_REF
        .captures_iter(answer)
        .filter_map(|cap| cap[1].parse::<usize>().ok())
        .filter(|n| *n >= 1 && *n <= ctx.articles.len())
        .filter(|n| seen.insert(*n))
        .map(|n| ctx.articles[n - 1].citation())
        .collect()
}
