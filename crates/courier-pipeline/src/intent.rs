//! Booking-intent detection for reply events.
//!
//! A true flag never changes the transition target — replies always route
//! to human follow-up — but it is surfaced in the history notes so reviewers
//! can prioritize leads who sound ready to meet.

/// Single words that signal scheduling interest. Matched on word
/// boundaries so "technically" does not light up on "call".
const KEYWORDS: &[&str] = &[
    "book",
    "booking",
    "schedule",
    "scheduling",
    "meeting",
    "call",
    "demo",
    "calendar",
    "availability",
    "available",
];

/// Multi-word phrases matched as substrings of the normalized text.
const PHRASES: &[&str] = &["let's talk", "lets talk", "set up a time", "hop on a"];

/// Returns whether the reply text suggests the lead wants to book a call.
pub fn detect_booking_intent(text: &str) -> bool {
    let lowered = text.to_lowercase();
    if PHRASES.iter().any(|phrase| lowered.contains(phrase)) {
        return true;
    }
    lowered
        .split(|c: char| !c.is_alphanumeric())
        .any(|word| KEYWORDS.contains(&word))
}
