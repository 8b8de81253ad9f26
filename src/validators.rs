//! Caller input validation
//!
//! Everything here runs before a loop starts; failures never reach the
//! decision process.

use crate::error::AnalystError;
use crate::models::Language;
use crate::Result;
use lazy_static::lazy_static;
use regex::Regex;

pub const MAX_QUESTION_CHARS: usize = 1000;
pub const MIN_QUESTION_CHARS: usize = 2;
pub const MAX_CONVERSATION_ID_CHARS: usize = 100;

/// Symbols with the most complete upstream coverage.
pub const COMMON_SYMBOLS: &[&str] = &[
    "BTC", "ETH", "BNB", "XRP", "SOL", "ADA", "AVAX", "DOT", "DOGE", "MATIC",
    "LTC", "LINK", "UNI", "ATOM", "ETC", "XLM", "FIL", "ICP", "ALGO", "VET",
];

lazy_static! {
    static ref SYMBOL_RE: Regex = Regex::new(r"^[A-Z0-9]{1,10}$").unwrap();
    static ref CONVERSATION_ID_RE: Regex = Regex::new(r"^[a-zA-Z0-9_-]+$").unwrap();
    static ref UNSAFE_PATTERNS: Vec<Regex> = [
        r"(?i)<script.*?>",
        r"(?i)javascript:",
        r"(?i)onload=",
        r"(?i)onerror=",
        r"(?i)eval\(",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect();
}

pub fn validate_symbol(symbol: &str) -> Result<String> {
    let symbol = symbol.trim().to_uppercase();
    if symbol.is_empty() {
        return Err(AnalystError::Validation("symbol must not be empty".to_string()));
    }
    if !SYMBOL_RE.is_match(&symbol) {
        return Err(AnalystError::Validation(format!("invalid symbol: {}", symbol)));
    }
    Ok(symbol)
}

/// Empty input falls back to the default language.
pub fn validate_language(lang: &str) -> Result<Language> {
    match lang.trim().to_lowercase().as_str() {
        "" | "zh" => Ok(Language::Zh),
        "en" => Ok(Language::En),
        other => Err(AnalystError::Validation(format!(
            "unsupported language: {} (supported: zh, en)",
            other
        ))),
    }
}

pub fn validate_question(question: &str) -> Result<String> {
    let question = question.trim();
    if question.is_empty() {
        return Err(AnalystError::Validation("question must not be empty".to_string()));
    }

    let chars = question.chars().count();
    if chars < MIN_QUESTION_CHARS {
        return Err(AnalystError::Validation("question is too short".to_string()));
    }
    if chars > MAX_QUESTION_CHARS {
        return Err(AnalystError::Validation(format!(
            "question is too long (max {} characters)",
            MAX_QUESTION_CHARS
        )));
    }

    if UNSAFE_PATTERNS.iter().any(|re| re.is_match(question)) {
        return Err(AnalystError::Validation("question contains unsafe content".to_string()));
    }

    Ok(question.to_string())
}

/// `None` resolves to `max_limit`.
pub fn validate_limit(limit: Option<i64>, max_limit: u32) -> Result<u32> {
    match limit {
        None => Ok(max_limit),
        Some(l) if l <= 0 => Err(AnalystError::Validation("limit must be greater than 0".to_string())),
        Some(l) if l > max_limit as i64 => Err(AnalystError::Validation(format!(
            "limit must not exceed {}",
            max_limit
        ))),
        Some(l) => Ok(l as u32),
    }
}

pub fn validate_conversation_id(conversation_id: Option<&str>) -> Result<Option<String>> {
    let Some(id) = conversation_id.map(str::trim).filter(|id| !id.is_empty()) else {
        return Ok(None);
    };

    if id.chars().count() > MAX_CONVERSATION_ID_CHARS {
        return Err(AnalystError::Validation(format!(
            "conversation id is too long (max {} characters)",
            MAX_CONVERSATION_ID_CHARS
        )));
    }
    if !CONVERSATION_ID_RE.is_match(id) {
        return Err(AnalystError::Validation(
            "conversation id may only contain letters, digits, '_' and '-'".to_string(),
        ));
    }

    Ok(Some(id.to_string()))
}
