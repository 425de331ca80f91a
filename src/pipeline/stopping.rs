//! Stopping policy for streamed generation.
//!
//! Small on-device models loop, ramble and sometimes never emit an end
//! token. [`ResponseAccumulator`] collects the token stream and, after each
//! token, decides whether consumption should end. Rules in precedence order:
//!
//! 1. token ceiling reached
//! 2. degenerate repetition (last 10 words repeat the previous 10, or the
//!    last 5 words are identical)
//! 3. natural end: long enough, ends in terminal punctuation, and holds
//!    enough sentences
//! 4. character ceiling reached

use crate::config::GenerationConfig;
use std::fmt;

/// Words compared by the sequence-repetition rule.
const REPEAT_WINDOW_WORDS: usize = 10;
/// Identical trailing words that count as a run.
const RUN_WORDS: usize = 5;

/// Why consumption stopped before the stream closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StopReason {
    TokenLimit,
    Repetition,
    NaturalEnd,
    LengthLimit,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::TokenLimit => "token limit",
            Self::Repetition => "repetition",
            Self::NaturalEnd => "natural end",
            Self::LengthLimit => "length limit",
        };
        f.write_str(label)
    }
}

/// Result of feeding one token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenOutcome {
    Accepted,
    /// Blank token; counted but not appended.
    Skipped,
    /// Stop consuming. The token that triggered this was already applied.
    Stop(StopReason),
}

/// Accumulates generated text and applies the stopping policy.
#[derive(Debug, Clone)]
pub struct ResponseAccumulator {
    limits: GenerationConfig,
    text: String,
    tokens: usize,
    chars: usize,
}

impl ResponseAccumulator {
    pub fn new(limits: &GenerationConfig) -> Self {
        Self {
            limits: limits.clone(),
            text: String::new(),
            tokens: 0,
            chars: 0,
        }
    }

    /// Feed one token from the stream.
    pub fn push(&mut self, token: &str) -> TokenOutcome {
        self.tokens += 1;
        if token.trim().is_empty() {
            if self.tokens >= self.limits.max_tokens {
                return TokenOutcome::Stop(StopReason::TokenLimit);
            }
            return TokenOutcome::Skipped;
        }
        self.text.push_str(token);
        self.chars += token.chars().count();
        match self.stop_reason() {
            Some(reason) => TokenOutcome::Stop(reason),
            None => TokenOutcome::Accepted,
        }
    }

    fn stop_reason(&self) -> Option<StopReason> {
        if self.tokens >= self.limits.max_tokens {
            return Some(StopReason::TokenLimit);
        }
        if self.chars >= self.limits.spam_min_chars && is_repetitive(&self.text) {
            return Some(StopReason::Repetition);
        }
        if self.is_natural_end() {
            return Some(StopReason::NaturalEnd);
        }
        if self.chars >= self.limits.max_chars {
            return Some(StopReason::LengthLimit);
        }
        None
    }

    fn is_natural_end(&self) -> bool {
        if self.tokens < self.limits.natural_stop_min_tokens
            || self.chars <= self.limits.natural_stop_min_chars
        {
            return false;
        }
        let trimmed = self.text.trim();
        trimmed.ends_with(['.', '!', '?'])
            && sentence_count(trimmed) >= self.limits.natural_stop_sentences
    }

    /// Raw accumulated text.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Tokens consumed so far, blank ones included.
    pub fn tokens(&self) -> usize {
        self.tokens
    }

    pub fn chars(&self) -> usize {
        self.chars
    }

    /// Final response text, trimmed.
    pub fn finish(self) -> String {
        self.text.trim().to_owned()
    }
}

/// Detect a degenerate generation loop in the trailing words.
pub fn is_repetitive(text: &str) -> bool {
    let words: Vec<&str> = text.split_whitespace().collect();
    let n = words.len();

    if n >= 2 * REPEAT_WINDOW_WORDS {
        let last = &words[n - REPEAT_WINDOW_WORDS..];
        let previous = &words[n - 2 * REPEAT_WINDOW_WORDS..n - REPEAT_WINDOW_WORDS];
        if last == previous {
            return true;
        }
    }

    if n >= RUN_WORDS {
        let run = &words[n - RUN_WORDS..];
        if run.iter().all(|w| *w == run[0]) {
            return true;
        }
    }

    false
}

/// Count sentences delimited by runs of `.`, `!` or `?`.
pub fn sentence_count(text: &str) -> usize {
    text.split(['.', '!', '?'])
        .filter(|s| !s.trim().is_empty())
        .count()
}
