//! Prompt assembly for the generation call.
//!
//! A [`PromptTemplate`] is parsed once, at configuration time, into literal
//! pieces and placeholders. Assembly then writes the context block and the
//! question into the placeholder slots in a single pass, so text inside a
//! chunk or a question that happens to contain `{query_str}` is never
//! expanded again.

use serde::Serialize;

use crate::error::PromptError;

/// Placeholder replaced by the joined chunk texts.
pub const CONTEXT_PLACEHOLDER: &str = "{context_str}";
/// Placeholder replaced by the question text.
pub const QUERY_PLACEHOLDER: &str = "{query_str}";

/// Default system instruction.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are an expert acute ischemic stroke answering assistant.
Follow any instructions given in the user message exactly, especially:
- Answer directly.
- Return exactly ONE sentence (no line breaks).
- Use complete sentences with rationale.
- Always provide an answer.";

/// Default user-message template.
pub const DEFAULT_TEMPLATE: &str = "Guidelines:
---------------------
{context_str}
---------------------

Question: {query_str}";

/// Template used when answering without retrieval.
pub const BASELINE_TEMPLATE: &str = "Question: {query_str}";

/// Default separator between chunk texts inside the context block.
pub const DEFAULT_CHUNK_SEPARATOR: &str = "\n\n---\n\n";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Piece {
    Literal(String),
    Context,
    Query,
}

/// A parsed prompt template plus the system instruction that accompanies it.
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    system: String,
    pieces: Vec<Piece>,
    separator: String,
}

/// The fully assembled input for one generation call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Prompt {
    pub system: String,
    pub user: String,
    /// The joined chunk texts, empty when nothing survived retrieval.
    pub context_block: String,
}

impl PromptTemplate {
    /// Parse a retrieval template. Both placeholders must be present.
    pub fn new(
        system: impl Into<String>,
        template: &str,
        separator: impl Into<String>,
    ) -> Result<Self, PromptError> {
        let pieces = parse(template.trim());
        if !pieces.contains(&Piece::Context) {
            return Err(PromptError::MissingPlaceholder(CONTEXT_PLACEHOLDER));
        }
        if !pieces.contains(&Piece::Query) {
            return Err(PromptError::MissingPlaceholder(QUERY_PLACEHOLDER));
        }
        Ok(Self {
            system: system.into(),
            pieces,
            separator: separator.into(),
        })
    }

    /// The `Question: {query_str}` template used for ungrounded baselines.
    pub fn baseline(system: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            pieces: parse(BASELINE_TEMPLATE),
            separator: String::new(),
        }
    }

    pub fn system(&self) -> &str {
        &self.system
    }

    /// Build the prompt for `question` from chunk texts ordered best first.
    pub fn assemble<S: AsRef<str>>(&self, question: &str, ranked_chunks: &[S]) -> Prompt {
        let context_block = ranked_chunks
            .iter()
            .map(|c| c.as_ref())
            .collect::<Vec<_>>()
            .join(&self.separator);

        let mut user = String::new();
        for piece in &self.pieces {
            match piece {
                Piece::Literal(s) => user.push_str(s),
                Piece::Context => user.push_str(&context_block),
                Piece::Query => user.push_str(question),
            }
        }

        Prompt {
            system: self.system.clone(),
            user,
            context_block,
        }
    }
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self {
            system: DEFAULT_SYSTEM_PROMPT.to_string(),
            pieces: parse(DEFAULT_TEMPLATE),
            separator: DEFAULT_CHUNK_SEPARATOR.to_string(),
        }
    }
}

/// Split a template into pieces. Callers trim the template itself; values
/// substituted later are never trimmed.
fn parse(template: &str) -> Vec<Piece> {
    let mut pieces = Vec::new();
    let mut rest = template;
    loop {
        let next = [
            (rest.find(CONTEXT_PLACEHOLDER), CONTEXT_PLACEHOLDER, Piece::Context),
            (rest.find(QUERY_PLACEHOLDER), QUERY_PLACEHOLDER, Piece::Query),
        ]
        .into_iter()
        .filter_map(|(pos, token, piece)| pos.map(|p| (p, token, piece)))
        .min_by_key(|(p, _, _)| *p);

        match next {
            Some((pos, token, piece)) => {
                if pos > 0 {
                    pieces.push(Piece::Literal(rest[..pos].to_string()));
                }
                pieces.push(piece);
                rest = &rest[pos + token.len()..];
            }
            None => {
                if !rest.is_empty() {
                    pieces.push(Piece::Literal(rest.to_string()));
                }
                return pieces;
            }
        }
    }
}
