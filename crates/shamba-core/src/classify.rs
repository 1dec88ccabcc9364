//! Inbound message classification.
//!
//! Separates genuine farmer replies from carrier notifications, delivery
//! reports, short-code marketing, and spam before anything reaches the
//! conversation or command layers. Pure and deterministic: the same
//! `(sender, text)` always yields the same [`Decision`], so reprocessing a
//! rejected message is harmless.
//!
//! Checks run in a fixed priority order, cheapest and most certain first;
//! the first match wins.

use crate::phone::{self, PhoneNumber};
use regex::Regex;
use std::sync::LazyLock;

/// Outcome of classifying an inbound `(sender, text)` pair.
///
/// Only [`Decision::Accept`] proceeds to conversation tracking and the
/// command engine; everything else is logged at debug level and dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// A real farmer message.
    Accept,
    /// Our own outbound number echoed back by the gateway.
    SelfLoop,
    /// Sender matches a known carrier/system alias.
    SystemSender,
    /// Text matches system/delivery-report/marketing keywords.
    SystemContent,
    /// Trimmed text shorter than two characters.
    TooShort,
    /// Text is digits only (OTP echoes, balance codes).
    NumericOnly,
    /// Sender is a short code or alphanumeric mask.
    ShortCodeSender,
    /// Sender is not a routable subscriber number (wrong digit count).
    MalformedSender,
    /// Text matches a spam pattern.
    Spam,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accept => "accept",
            Self::SelfLoop => "self_loop",
            Self::SystemSender => "system_sender",
            Self::SystemContent => "system_content",
            Self::TooShort => "too_short",
            Self::NumericOnly => "numeric_only",
            Self::ShortCodeSender => "short_code_sender",
            Self::MalformedSender => "malformed_sender",
            Self::Spam => "spam",
        }
    }
}

/// Carrier and platform aliases whose traffic is never a farmer reply.
/// Matched case-insensitively as substrings of the raw sender field.
pub const DEFAULT_SYSTEM_SENDERS: &[&str] = &[
    "safaricom",
    "airtel",
    "telkom",
    "mpesa",
    "m-pesa",
    "fuliza",
    "okoa",
    "bonga",
];

/// Phrases that mark carrier/system/marketing content regardless of sender.
pub const DEFAULT_SYSTEM_KEYWORDS: &[&str] = &[
    "delivery report",
    "delivered to",
    "was not delivered",
    "your balance is",
    "airtime",
    "data bundle",
    "auto-reply",
    "auto reply",
    "dial *",
    "subscription renewed",
    "congratulations! you have won",
];

/// Urgent-money-request and link patterns. Compiled once.
static SPAM_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)\burgent(ly)?\b.{0,60}\b(money|cash|ksh|kes|mpesa|send)\b",
        r"(?i)\b(send|transfer|wire)\b.{0,40}\b(money|cash|ksh|kes)\b",
        r"(?i)\byou (have )?w[io]n\b.{0,40}\b(prize|cash|ksh|kes|award)\b",
        r"(?i)\b(claim|redeem)\b.{0,30}\b(prize|reward|voucher)\b",
        r"(?i)https?://",
        r"(?i)\bwww\.[a-z0-9-]+\.[a-z]{2,}",
        r"(?i)\bbit\.ly/",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("spam pattern must compile"))
    .collect()
});

/// Classify an inbound message. First matching check wins.
pub fn classify(
    self_number: &PhoneNumber,
    sender: &str,
    text: &str,
    system_senders: &[String],
    system_keywords: &[String],
) -> Decision {
    let normalized = phone::normalize(sender).ok();

    // 1. Self-loop: our own sends echoed back through the gateway.
    if normalized.as_ref() == Some(self_number) {
        return Decision::SelfLoop;
    }

    // 2. Known carrier/system aliases.
    let sender_lower = sender.trim().to_lowercase();
    if system_senders
        .iter()
        .any(|alias| sender_lower.contains(&alias.to_lowercase()))
    {
        return Decision::SystemSender;
    }

    // 3. Degenerate text.
    let trimmed = text.trim();
    if trimmed.chars().count() < 2 {
        return Decision::TooShort;
    }
    if !trimmed.is_empty() && trimmed.chars().all(|c| c.is_ascii_digit()) {
        return Decision::NumericOnly;
    }

    // 4. Short codes (3-6 digit senders) and alphanumeric masks.
    if is_short_code(&sender_lower) {
        return Decision::ShortCodeSender;
    }

    // 5. Whatever survives the sender checks must be a routable subscriber
    //    number; Accept guarantees a normalizable sender to downstream code.
    if normalized.is_none() {
        return Decision::MalformedSender;
    }

    // 6. System/marketing content.
    let text_lower = trimmed.to_lowercase();
    if system_keywords
        .iter()
        .any(|kw| text_lower.contains(&kw.to_lowercase()))
    {
        return Decision::SystemContent;
    }

    // 7. Spam patterns.
    if SPAM_PATTERNS.iter().any(|re| re.is_match(trimmed)) {
        return Decision::Spam;
    }

    Decision::Accept
}

/// A sender is a short code if it is a bare 3-6 digit number, or an
/// alphanumeric mask that starts with a letter instead of a digit or `+`.
fn is_short_code(sender: &str) -> bool {
    let stripped = sender.trim_start_matches('+');
    if stripped.len() >= 3 && stripped.len() <= 6 && stripped.chars().all(|c| c.is_ascii_digit()) {
        return true;
    }
    sender.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
}
