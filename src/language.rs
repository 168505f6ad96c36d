use crate::models::{ChatMessage, Sender};

/// Languages the journal speaks. Detection is script-based: any Cyrillic
/// content is treated as Ukrainian, everything else as English.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Language {
    #[default]
    Ukrainian,
    English,
}

impl Language {
    pub fn as_tag(self) -> &'static str {
        match self {
            Language::Ukrainian => "uk",
            Language::English => "en",
        }
    }

    pub fn from_tag(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "en" | "english" => Language::English,
            _ => Language::Ukrainian,
        }
    }
}

fn contains_cyrillic(text: &str) -> bool {
    text.chars().any(|c| ('\u{0400}'..='\u{04FF}').contains(&c))
}

fn language_of(text: &str) -> Language {
    if contains_cyrillic(text) {
        Language::Ukrainian
    } else {
        Language::English
    }
}

/// Pick the language for a single outbound request.
///
/// Order: an explicit English app setting wins; otherwise the current message
/// decides; with no current message, a majority vote over the last 10 user
/// turns; with no history either, the app setting.
pub fn detect_language(message: &str, history: &[ChatMessage], app_language: Language) -> Language {
    if app_language == Language::English {
        return Language::English;
    }

    let trimmed = message.trim();
    if !trimmed.is_empty() {
        return language_of(trimmed);
    }

    let recent_user: Vec<&ChatMessage> = history
        .iter()
        .rev()
        .filter(|m| m.sender == Sender::User)
        .take(10)
        .collect();
    if !recent_user.is_empty() {
        let english_votes = recent_user
            .iter()
            .filter(|m| language_of(&m.text) == Language::English)
            .count();
        let ratio = english_votes as f64 / recent_user.len() as f64;
        return if ratio >= 0.5 {
            Language::English
        } else {
            Language::Ukrainian
        };
    }

    app_language
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_setting_english_overrides_everything() {
        let lang = detect_language("Привіт", &[], Language::English);
        assert_eq!(lang, Language::English);
    }

    #[test]
    fn current_message_script_wins() {
        assert_eq!(
            detect_language("Як справи?", &[], Language::Ukrainian),
            Language::Ukrainian
        );
        assert_eq!(
            detect_language("How are you?", &[], Language::Ukrainian),
            Language::English
        );
    }

    #[test]
    fn empty_message_uses_majority_vote_over_user_turns() {
        let history = vec![
            ChatMessage::user("hello there"),
            ChatMessage::assistant("Привіт!"),
            ChatMessage::user("feeling better today"),
            ChatMessage::user("трохи втомлений"),
        ];
        // 2 of 3 user turns are English.
        assert_eq!(
            detect_language("", &history, Language::Ukrainian),
            Language::English
        );
    }

    #[test]
    fn assistant_turns_do_not_vote() {
        let history = vec![
            ChatMessage::assistant("Hi! How are you feeling?"),
            ChatMessage::user("все гаразд"),
        ];
        assert_eq!(
            detect_language("", &history, Language::Ukrainian),
            Language::Ukrainian
        );
    }

    #[test]
    fn no_signal_falls_back_to_app_language() {
        assert_eq!(detect_language("", &[], Language::Ukrainian), Language::Ukrainian);
    }
}
