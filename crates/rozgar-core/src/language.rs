pub const DEFAULT_LANGUAGE: &str = "english";

const LANGUAGE_CODES: &[(&str, &str)] = &[
    ("as", "assamese"),
    ("bn", "bengali"),
    ("brx", "bodo"),
    ("doi", "dogri"),
    ("en", "english"),
    ("gu", "gujarati"),
    ("hi", "hindi"),
    ("kn", "kannada"),
    ("kok", "konkani"),
    ("ks", "kashmiri"),
    ("mai", "maithili"),
    ("ml", "malayalam"),
    ("mni", "manipuri"),
    ("mr", "marathi"),
    ("ne", "nepali"),
    ("or", "odia"),
    ("pa", "punjabi"),
    ("sa", "sanskrit"),
    ("sd", "sindhi"),
    ("ta", "tamil"),
    ("te", "telugu"),
    ("ur", "urdu"),
];

/// Lowercased language name used as part of the explanation key.
///
/// Short UI language codes are expanded to names; blank input falls back to
/// [`DEFAULT_LANGUAGE`].
pub fn canonical_language(input: Option<&str>) -> String {
    let lowered = input.unwrap_or_default().trim().to_lowercase();
    if lowered.is_empty() {
        return DEFAULT_LANGUAGE.to_string();
    }
    LANGUAGE_CODES
        .iter()
        .find(|(code, _)| *code == lowered)
        .map(|(_, name)| (*name).to_string())
        .unwrap_or(lowered)
}
