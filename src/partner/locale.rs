use std::collections::BTreeMap;

use anyhow::Context;

/// Locale codes used in definition files and the language names the portal
/// keys localized strings by.
pub const LOCALES: [(&str, &str); 27] = [
    ("ar", "arabic"),
    ("bg", "bulgarian"),
    ("cs", "czech"),
    ("da", "danish"),
    ("de", "german"),
    ("el", "greek"),
    ("en", "english"),
    ("es", "spanish"),
    ("fi", "finnish"),
    ("fr", "french"),
    ("hu", "hungarian"),
    ("it", "italian"),
    ("ja", "japanese"),
    ("ko", "koreana"),
    ("nl", "dutch"),
    ("no", "norwegian"),
    ("pl", "polish"),
    ("pt", "portuguese"),
    ("pt-BR", "brazilian"),
    ("ro", "romanian"),
    ("ru", "russian"),
    ("sv", "swedish"),
    ("th", "thai"),
    ("tr", "turkish"),
    ("uk", "ukrainian"),
    ("zh-Hans", "schinese"),
    ("zh-Hant", "tchinese"),
];

pub fn portal_language(code: &str) -> Option<&'static str> {
    LOCALES
        .iter()
        .find(|(locale, _)| *locale == code)
        .map(|(_, language)| *language)
}

/// Builds the JSON object the portal expects for a localized field: one
/// entry per provided locale plus the synthetic `token` entry.
pub fn localized_payload(
    texts: &BTreeMap<String, String>,
    token: String,
) -> anyhow::Result<serde_json::Map<String, serde_json::Value>> {
    let mut payload = serde_json::Map::new();

    for (code, text) in texts {
        let language = portal_language(code)
            .with_context(|| format!("Unsupported locale code: {code}"))?;

        payload.insert(language.to_string(), serde_json::Value::String(text.clone()));
    }

    payload.insert("token".to_string(), serde_json::Value::String(token));

    Ok(payload)
}
