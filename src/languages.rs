use serde::Serialize;

use crate::job::AUTO_LANGUAGE;

/// A language the form offers, keyed by its ISO 639-3 code
#[derive(Debug, Clone, Copy, Serialize)]
pub struct Language {
    pub code: &'static str,
    pub name: &'static str,
}

pub const DEFAULT_TARGET: &str = "por";

pub const LANGUAGES: &[Language] = &[
    Language { code: "por", name: "Portuguese" },
    Language { code: "eng", name: "English" },
    Language { code: "spa", name: "Spanish" },
    Language { code: "fra", name: "French" },
    Language { code: "deu", name: "German" },
    Language { code: "ita", name: "Italian" },
    Language { code: "rus", name: "Russian" },
    Language { code: "jpn", name: "Japanese" },
    Language { code: "kor", name: "Korean" },
    Language { code: "zho", name: "Chinese" },
];

/// Source choices: automatic detection first, then every target language
pub fn source_languages() -> Vec<Language> {
    std::iter::once(Language { code: AUTO_LANGUAGE, name: "Detect automatically" })
        .chain(LANGUAGES.iter().copied())
        .collect()
}

pub fn find(code: &str) -> Option<&'static Language> {
    LANGUAGES.iter().find(|l| l.code.eq_ignore_ascii_case(code.trim()))
}
