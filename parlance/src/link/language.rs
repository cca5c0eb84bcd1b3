use serde::{Deserialize, Serialize};
use std::fmt;

/// Target languages accepted by the translation service
///
/// Serialized as the BCP-47 code (`"ja-JP"`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SupportedLanguage {
    #[serde(rename = "en-US")]
    EnglishUs,
    #[default]
    #[serde(rename = "ja-JP")]
    Japanese,
    #[serde(rename = "es-ES")]
    Spanish,
    #[serde(rename = "fr-FR")]
    French,
    #[serde(rename = "de-DE")]
    German,
    #[serde(rename = "it-IT")]
    Italian,
    #[serde(rename = "pt-BR")]
    PortugueseBrazil,
    #[serde(rename = "pt-PT")]
    PortuguesePortugal,
    #[serde(rename = "ru-RU")]
    Russian,
    #[serde(rename = "cmn-CN")]
    ChineseMandarin,
    #[serde(rename = "yue-HK")]
    ChineseCantonese,
    #[serde(rename = "ko-KR")]
    Korean,
    #[serde(rename = "hi-IN")]
    Hindi,
    #[serde(rename = "bn-IN")]
    Bengali,
    #[serde(rename = "ta-IN")]
    Tamil,
    #[serde(rename = "te-IN")]
    Telugu,
    #[serde(rename = "mr-IN")]
    Marathi,
    #[serde(rename = "gu-IN")]
    Gujarati,
    #[serde(rename = "th-TH")]
    Thai,
    #[serde(rename = "vi-VN")]
    Vietnamese,
    #[serde(rename = "id-ID")]
    Indonesian,
    #[serde(rename = "ms-MY")]
    Malay,
    #[serde(rename = "ar-XA")]
    Arabic,
    #[serde(rename = "he-IL")]
    Hebrew,
    #[serde(rename = "tr-TR")]
    Turkish,
    #[serde(rename = "fa-IR")]
    Persian,
    #[serde(rename = "nl-NL")]
    Dutch,
    #[serde(rename = "pl-PL")]
    Polish,
    #[serde(rename = "sv-SE")]
    Swedish,
    #[serde(rename = "nb-NO")]
    Norwegian,
    #[serde(rename = "da-DK")]
    Danish,
    #[serde(rename = "fi-FI")]
    Finnish,
    #[serde(rename = "cs-CZ")]
    Czech,
    #[serde(rename = "hu-HU")]
    Hungarian,
    #[serde(rename = "ro-RO")]
    Romanian,
    #[serde(rename = "el-GR")]
    Greek,
    #[serde(rename = "uk-UA")]
    Ukrainian,
}

use SupportedLanguage::*;

const ALL: [SupportedLanguage; 37] = [
    EnglishUs,
    Japanese,
    Spanish,
    French,
    German,
    Italian,
    PortugueseBrazil,
    PortuguesePortugal,
    Russian,
    ChineseMandarin,
    ChineseCantonese,
    Korean,
    Hindi,
    Bengali,
    Tamil,
    Telugu,
    Marathi,
    Gujarati,
    Thai,
    Vietnamese,
    Indonesian,
    Malay,
    Arabic,
    Hebrew,
    Turkish,
    Persian,
    Dutch,
    Polish,
    Swedish,
    Norwegian,
    Danish,
    Finnish,
    Czech,
    Hungarian,
    Romanian,
    Greek,
    Ukrainian,
];

impl SupportedLanguage {
    /// BCP-47 code sent in the session setup
    pub fn code(&self) -> &'static str {
        match self {
            EnglishUs => "en-US",
            Japanese => "ja-JP",
            Spanish => "es-ES",
            French => "fr-FR",
            German => "de-DE",
            Italian => "it-IT",
            PortugueseBrazil => "pt-BR",
            PortuguesePortugal => "pt-PT",
            Russian => "ru-RU",
            ChineseMandarin => "cmn-CN",
            ChineseCantonese => "yue-HK",
            Korean => "ko-KR",
            Hindi => "hi-IN",
            Bengali => "bn-IN",
            Tamil => "ta-IN",
            Telugu => "te-IN",
            Marathi => "mr-IN",
            Gujarati => "gu-IN",
            Thai => "th-TH",
            Vietnamese => "vi-VN",
            Indonesian => "id-ID",
            Malay => "ms-MY",
            Arabic => "ar-XA",
            Hebrew => "he-IL",
            Turkish => "tr-TR",
            Persian => "fa-IR",
            Dutch => "nl-NL",
            Polish => "pl-PL",
            Swedish => "sv-SE",
            Norwegian => "nb-NO",
            Danish => "da-DK",
            Finnish => "fi-FI",
            Czech => "cs-CZ",
            Hungarian => "hu-HU",
            Romanian => "ro-RO",
            Greek => "el-GR",
            Ukrainian => "uk-UA",
        }
    }

    /// Human-readable name
    pub fn display_name(&self) -> &'static str {
        match self {
            EnglishUs => "English (US)",
            Japanese => "Japanese",
            Spanish => "Spanish",
            French => "French",
            German => "German",
            Italian => "Italian",
            PortugueseBrazil => "Portuguese (Brazil)",
            PortuguesePortugal => "Portuguese (Portugal)",
            Russian => "Russian",
            ChineseMandarin => "Chinese (Mandarin)",
            ChineseCantonese => "Chinese (Cantonese)",
            Korean => "Korean",
            Hindi => "Hindi",
            Bengali => "Bengali",
            Tamil => "Tamil",
            Telugu => "Telugu",
            Marathi => "Marathi",
            Gujarati => "Gujarati",
            Thai => "Thai",
            Vietnamese => "Vietnamese",
            Indonesian => "Indonesian",
            Malay => "Malay",
            Arabic => "Arabic",
            Hebrew => "Hebrew",
            Turkish => "Turkish",
            Persian => "Persian",
            Dutch => "Dutch",
            Polish => "Polish",
            Swedish => "Swedish",
            Norwegian => "Norwegian",
            Danish => "Danish",
            Finnish => "Finnish",
            Czech => "Czech",
            Hungarian => "Hungarian",
            Romanian => "Romanian",
            Greek => "Greek",
            Ukrainian => "Ukrainian",
        }
    }

    /// Exact BCP-47 code lookup
    pub fn from_code(code: &str) -> Option<Self> {
        ALL.iter().copied().find(|lang| lang.code() == code)
    }

    /// Case-insensitive display name lookup
    pub fn from_name(name: &str) -> Option<Self> {
        ALL.iter()
            .copied()
            .find(|lang| lang.display_name().eq_ignore_ascii_case(name))
    }

    pub fn all() -> &'static [SupportedLanguage] {
        &ALL
    }
}

impl fmt::Display for SupportedLanguage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.display_name(), self.code())
    }
}
