//! Language registry: every locale the pipeline knows how to name.
//!
//! Which of these a deployment actually serves is decided by configuration
//! (`SUPPORTED_LANGUAGES`); the registry only guarantees that a `Language`
//! always has a code and a human-readable name for prompts.

use crate::error::{CodeSwitchError, Result};
use std::sync::OnceLock;

/// Metadata for a known language.
#[derive(Debug, Clone)]
pub struct LanguageConfig {
    /// ISO 639-1 language code (e.g., "en", "sv")
    pub code: &'static str,

    /// English name of the language, used in completion prompts
    pub name: &'static str,

    /// Native name of the language
    pub native_name: &'static str,
}

pub struct LanguageRegistry {
    languages: Vec<LanguageConfig>,
}

static REGISTRY: OnceLock<LanguageRegistry> = OnceLock::new();

impl LanguageRegistry {
    pub fn get() -> &'static LanguageRegistry {
        REGISTRY.get_or_init(|| LanguageRegistry {
            languages: default_languages(),
        })
    }

    pub fn get_by_code(&self, code: &str) -> Option<&LanguageConfig> {
        self.languages.iter().find(|lang| lang.code == code)
    }

    pub fn list_all(&self) -> Vec<&LanguageConfig> {
        self.languages.iter().collect()
    }
}

const fn language(
    code: &'static str,
    name: &'static str,
    native_name: &'static str,
) -> LanguageConfig {
    LanguageConfig {
        code,
        name,
        native_name,
    }
}

fn default_languages() -> Vec<LanguageConfig> {
    vec![
        language("en", "English", "English"),
        language("sv", "Swedish", "Svenska"),
        language("es", "Spanish", "Español"),
        language("de", "German", "Deutsch"),
        language("fr", "French", "Français"),
        language("it", "Italian", "Italiano"),
        language("pt", "Portuguese", "Português"),
        language("nl", "Dutch", "Nederlands"),
        language("da", "Danish", "Dansk"),
        language("no", "Norwegian", "Norsk"),
        language("fi", "Finnish", "Suomi"),
    ]
}

/// A language validated against the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Language {
    code: &'static str,
}

impl Language {
    pub const ENGLISH: Language = Language { code: "en" };
    pub const SWEDISH: Language = Language { code: "sv" };

    /// Resolve a language code (case-insensitive) against the registry.
    pub fn from_code(code: &str) -> Result<Language> {
        let normalized = code.trim().to_lowercase();
        LanguageRegistry::get()
            .get_by_code(&normalized)
            .map(|config| Language { code: config.code })
            .ok_or_else(|| {
                CodeSwitchError::Validation(format!("unknown language code: '{}'", code))
            })
    }

    pub fn code(&self) -> &'static str {
        self.code
    }

    /// # Panics
    /// Never for a `Language` built through `from_code` or the constants.
    pub fn config(&self) -> &'static LanguageConfig {
        LanguageRegistry::get()
            .get_by_code(self.code)
            .expect("Language code should always be valid")
    }

    pub fn name(&self) -> &'static str {
        self.config().name
    }

    pub fn native_name(&self) -> &'static str {
        self.config().native_name
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code)
    }
}
