//! Fallback token counting.
//!
//! Gemini normally reports exact counts in `usageMetadata`. When a count is
//! missing, the proxy approximates it as the number of whitespace-separated
//! words in the text. The estimate is deterministic and never zero for text
//! that contains anything other than whitespace; it undercounts relative to a
//! real subword tokenizer.

pub fn estimate_tokens(text: &str) -> u32 {
    let words = text.split_whitespace().count();
    u32::try_from(words).unwrap_or(u32::MAX)
}
