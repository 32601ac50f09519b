use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Locale {
    #[default]
    Ja,
    Zh,
    En,
}

pub const SUPPORTED_LOCALES: [Locale; 3] = [Locale::Ja, Locale::Zh, Locale::En];

impl Locale {
    pub const FALLBACK: Locale = Locale::Ja;

    pub fn as_str(self) -> &'static str {
        match self {
            Locale::Ja => "ja",
            Locale::Zh => "zh",
            Locale::En => "en",
        }
    }

    /// Exact tag match, ignoring case and surrounding whitespace.
    pub fn from_tag(tag: &str) -> Option<Locale> {
        let tag = tag.trim();
        SUPPORTED_LOCALES
            .into_iter()
            .find(|locale| tag.eq_ignore_ascii_case(locale.as_str()))
    }

    /// Prefix match so that region or script suffixed tags (`zh-TW`,
    /// `en_US.UTF-8`, `JA-jp`) map onto their base locale.
    pub fn from_prefix(tag: &str) -> Option<Locale> {
        let normalized = tag.trim().to_ascii_lowercase();
        SUPPORTED_LOCALES
            .into_iter()
            .find(|locale| normalized.starts_with(locale.as_str()))
    }

    /// Never fails: absent or unsupported keys resolve to [`Locale::FALLBACK`].
    pub fn resolve(key: Option<&str>) -> Locale {
        key.and_then(Locale::from_prefix).unwrap_or(Locale::FALLBACK)
    }

    /// Picks the startup locale of a client session.
    ///
    /// A previously saved tag wins when it is exactly one of the supported
    /// tags. Otherwise the system locale is matched by prefix, with a missing
    /// system locale treated as English.
    pub fn detect(saved: Option<&str>, system: Option<&str>) -> Locale {
        if let Some(locale) = saved.and_then(Locale::from_tag) {
            return locale;
        }
        let system = system
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or("en");
        Locale::from_prefix(system).unwrap_or(Locale::FALLBACK)
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn resolve_locale(key: Option<&str>) -> Locale {
    Locale::resolve(key)
}
