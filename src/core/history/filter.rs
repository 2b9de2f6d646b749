//! Noise filter for user transcripts.
//!
//! Speech-to-text on short utterances and false activations produces
//! single-word transcripts ("mmm", "ok", "...") that would otherwise pollute
//! the visible conversation.

/// Minimum length (in chars) of a displayable user turn.
const MIN_USER_TEXT_CHARS: usize = 2;

/// Low-information fillers: confirmations and hesitation sounds.
const FILLER_DENYLIST: &[&str] = &[
    "ok", "okay", "okey", "oki", "vale", "dale", "si", "sí", "no", "ya", "aja", "ajá", "eh",
    "ah", "uh", "um", "em", "hm", "hmm", "mm", "mmm", "mhm", "este", "bueno",
];

/// Whether a user transcript should be shown.
pub fn is_meaningful_user_text(text: &str) -> bool {
    let trimmed = text.trim();
    if trimmed.chars().count() < MIN_USER_TEXT_CHARS {
        return false;
    }

    // Pure punctuation
    if !trimmed.chars().any(char::is_alphanumeric) {
        return false;
    }

    let normalized = trimmed
        .trim_matches(|c: char| !c.is_alphanumeric())
        .to_lowercase();
    !FILLER_DENYLIST.contains(&normalized.as_str())
}
