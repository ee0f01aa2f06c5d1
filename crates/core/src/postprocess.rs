use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::{AgentStyle, IntentContract};

// Leading filler phrases the model likes to open with. Each is stripped at
// most once, before any limits are applied.
static FILLER_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)^\s*(Понял|Хорошо|Отлично|Ясно|Конечно)[.!]?\s*",
        r"(?i)^\s*(Давайте уточн|Давайте посчита|Давайте разбер)[^.!]*[.!]?\s*",
        r"(?i)^\s*(Итак|По цене так|Есть несколько)[^.!]*[.!]?\s*",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("filler pattern"))
    .collect()
});

// One clause mentioning prepayment/advance-payment terms, up to the next
// sentence boundary.
static PREPAYMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)[^.!?\n]*(?:50\s*%|предоплат|аванс|оплат(?:а|ить|у)).*?[.!?\n]")
        .expect("prepayment pattern")
});

static MD_BOLD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\*\*").expect("bold pattern"));
static MD_UNDERLINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"__").expect("underline pattern"));
static MD_HEADER: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^#+\s*").expect("header pattern"));
static MD_LINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[([^\]]+)\]\([^)]+\)").expect("link pattern"));
static BLANK_LINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n\s*\n").expect("blank pattern"));

/// Rewrites a candidate reply to satisfy style and policy constraints.
///
/// Pure function over the input text; step order matters — markdown removal
/// before filler removal before limits, because the limits count on cleaned
/// text.
#[derive(Clone, Debug)]
pub struct Postprocessor {
    style: AgentStyle,
}

impl Postprocessor {
    pub fn new(style: &AgentStyle) -> Self {
        Self { style: style.clone() }
    }

    pub fn process(
        &self,
        text: &str,
        contract: Option<&IntentContract>,
        allow_prepayment: bool,
    ) -> String {
        if text.is_empty() {
            return String::new();
        }

        let mut result = text.to_string();

        if self.style.clean_text {
            result = remove_markdown(&result);
        }
        result = remove_fillers(&result);

        if let Some(contract) = contract {
            if !contract.forbidden.is_empty() {
                result = remove_forbidden_lines(&result, &contract.forbidden);
            }
        }

        result = enforce_sentence_limit(&result, self.style.max_sentences);
        result = enforce_question_limit(&result, self.style.max_questions);

        if !allow_prepayment {
            result = PREPAYMENT.replace_all(&result, "").into_owned();
        }

        clean_whitespace(&result)
    }
}

fn remove_markdown(text: &str) -> String {
    let text = MD_BOLD.replace_all(text, "");
    let text = MD_UNDERLINE.replace_all(&text, "");
    let text = MD_HEADER.replace_all(&text, "");
    let text = text.replace('`', "");
    MD_LINK.replace_all(&text, "$1").into_owned()
}

fn remove_fillers(text: &str) -> String {
    let mut result = text.to_string();
    for pattern in FILLER_PATTERNS.iter() {
        result = pattern.replace(&result, "").into_owned();
    }
    result.trim().to_string()
}

fn remove_forbidden_lines(text: &str, forbidden: &[String]) -> String {
    let needles: Vec<String> = forbidden.iter().map(|w| w.to_lowercase()).collect();
    text.lines()
        .filter(|line| {
            let lower = line.to_lowercase();
            !needles.iter().any(|needle| lower.contains(needle))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Split into (sentence, delimiter-run) pairs, delimiters being runs of
/// `.`, `!`, `?`. The final fragment may carry an empty delimiter.
fn split_sentences(text: &str) -> Vec<(String, String)> {
    let mut parts = Vec::new();
    let mut sentence = String::new();
    let mut delimiter = String::new();

    for ch in text.chars() {
        if matches!(ch, '.' | '!' | '?') {
            delimiter.push(ch);
        } else {
            if !delimiter.is_empty() {
                parts.push((std::mem::take(&mut sentence), std::mem::take(&mut delimiter)));
            }
            sentence.push(ch);
        }
    }
    if !sentence.is_empty() || !delimiter.is_empty() {
        parts.push((sentence, delimiter));
    }
    parts
}

fn enforce_sentence_limit(text: &str, max_sentences: usize) -> String {
    let mut kept = 0usize;
    let mut out = String::new();
    for (sentence, delimiter) in split_sentences(text) {
        if sentence.trim().is_empty() {
            continue;
        }
        kept += 1;
        if kept > max_sentences {
            break;
        }
        out.push_str(&sentence);
        out.push_str(&delimiter);
    }
    out.trim().to_string()
}

fn enforce_question_limit(text: &str, max_questions: usize) -> String {
    let mut count = 0usize;
    for (index, ch) in text.char_indices() {
        if ch == '?' {
            count += 1;
            if count >= max_questions {
                return text[..index + 1].trim().to_string();
            }
        }
    }
    text.to_string()
}

fn clean_whitespace(text: &str) -> String {
    BLANK_LINES.replace_all(text, "\n\n").trim().to_string()
}
