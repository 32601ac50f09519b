use std::collections::HashMap;

use hiyori_types::{Locale, Message, Role};

/// Non-system turns kept when a conversation is forwarded to the backend.
pub const SERVER_HISTORY_TURNS: usize = 8;

const PROMPT_JA: &str = include_str!("prompts/ja.txt");
const PROMPT_ZH: &str = include_str!("prompts/zh.txt");
const PROMPT_EN: &str = include_str!("prompts/en.txt");

pub fn default_system_prompt(locale: Locale) -> &'static str {
    match locale {
        Locale::Ja => PROMPT_JA,
        Locale::Zh => PROMPT_ZH,
        Locale::En => PROMPT_EN,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Composition {
    pub locale: Locale,
    pub messages: Vec<Message>,
}

/// Binds a locale to its system prompt and bounds the forwarded history.
#[derive(Debug, Clone, Default)]
pub struct PromptComposer {
    overrides: HashMap<Locale, String>,
}

impl PromptComposer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a composer from configured prompt texts keyed by locale tag.
    /// Unknown tags and blank texts are ignored.
    pub fn with_overrides(raw: &HashMap<String, String>) -> Self {
        let mut overrides = HashMap::new();
        for (tag, text) in raw {
            let Some(locale) = Locale::from_tag(tag) else {
                tracing::warn!("ignoring prompt override for unsupported locale `{}`", tag);
                continue;
            };
            if text.trim().is_empty() {
                continue;
            }
            overrides.insert(locale, text.clone());
        }
        Self { overrides }
    }

    pub fn system_prompt(&self, locale: Locale) -> &str {
        self.overrides
            .get(&locale)
            .map(String::as_str)
            .unwrap_or_else(|| default_system_prompt(locale))
    }

    pub fn compose(&self, raw: &[Message], locale_key: Option<&str>) -> Composition {
        let locale = Locale::resolve(locale_key);
        let turns = raw
            .iter()
            .filter(|m| m.role != Role::System)
            .collect::<Vec<_>>();
        let start = turns.len().saturating_sub(SERVER_HISTORY_TURNS);

        let mut messages = Vec::with_capacity(turns.len() - start + 1);
        messages.push(Message::system(self.system_prompt(locale)));
        messages.extend(turns[start..].iter().map(|m| (*m).clone()));

        Composition { locale, messages }
    }
}

/// Composes with the bundled prompts.
pub fn compose(raw: &[Message], locale_key: Option<&str>) -> Vec<Message> {
    PromptComposer::new().compose(raw, locale_key).messages
}
