//! Kokoro v1.0 speaker table.

use std::path::Path;

/// Language family of a Kokoro voice, taken from the voice name prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceLanguage {
    AmericanEnglish,
    BritishEnglish,
    Spanish,
    French,
    Hindi,
    Italian,
    Japanese,
    BrazilianPortuguese,
    Mandarin,
}

impl VoiceLanguage {
    /// Human-readable language name.
    pub fn label(self) -> &'static str {
        match self {
            VoiceLanguage::AmericanEnglish => "American English",
            VoiceLanguage::BritishEnglish => "British English",
            VoiceLanguage::Spanish => "Spanish",
            VoiceLanguage::French => "French",
            VoiceLanguage::Hindi => "Hindi",
            VoiceLanguage::Italian => "Italian",
            VoiceLanguage::Japanese => "Japanese",
            VoiceLanguage::BrazilianPortuguese => "Portuguese BR",
            VoiceLanguage::Mandarin => "Mandarin Chinese",
        }
    }

    /// espeak-ng language for voices without a lexicon file; empty otherwise.
    pub fn espeak_lang(self) -> &'static str {
        match self {
            VoiceLanguage::Spanish => "es",
            VoiceLanguage::French => "fr",
            VoiceLanguage::Hindi => "hi",
            VoiceLanguage::Italian => "it",
            VoiceLanguage::Japanese => "ja",
            VoiceLanguage::BrazilianPortuguese => "pt-br",
            VoiceLanguage::AmericanEnglish | VoiceLanguage::BritishEnglish | VoiceLanguage::Mandarin => "",
        }
    }

    /// Comma-separated lexicon files inside the model directory.
    pub fn lexicon(self, model_dir: &Path) -> String {
        let file = |name: &str| model_dir.join(name).to_string_lossy().to_string();
        match self {
            VoiceLanguage::AmericanEnglish => file("lexicon-us-en.txt"),
            VoiceLanguage::BritishEnglish => file("lexicon-gb-en.txt"),
            // Chinese text often carries English words.
            VoiceLanguage::Mandarin => format!("{},{}", file("lexicon-us-en.txt"), file("lexicon-zh.txt")),
            _ => String::new(),
        }
    }

    fn from_prefix(prefix: &str) -> Option<Self> {
        Some(match prefix {
            "af" | "am" => VoiceLanguage::AmericanEnglish,
            "bf" | "bm" => VoiceLanguage::BritishEnglish,
            "ef" | "em" => VoiceLanguage::Spanish,
            "ff" => VoiceLanguage::French,
            "hf" | "hm" => VoiceLanguage::Hindi,
            "if" | "im" => VoiceLanguage::Italian,
            "jf" | "jm" => VoiceLanguage::Japanese,
            "pf" | "pm" => VoiceLanguage::BrazilianPortuguese,
            "zf" | "zm" => VoiceLanguage::Mandarin,
            _ => return None,
        })
    }
}

/// A named Kokoro speaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KokoroVoice {
    pub name: &'static str,
    pub speaker_id: i32,
    pub language: VoiceLanguage,
}

/// Voice names in speaker-id order.
const VOICE_NAMES: &[&str] = &[
    "af_alloy", "af_aoede", "af_bella", "af_heart", "af_jessica", "af_kore", "af_nicole", "af_nova", "af_river", "af_sarah",
    "af_sky", "am_adam", "am_echo", "am_eric", "am_fenrir", "am_liam", "am_michael", "am_onyx", "am_puck", "am_santa",
    "bf_alice", "bf_emma", "bf_isabella", "bf_lily", "bm_daniel", "bm_fable", "bm_george", "bm_lewis", "ef_dora", "em_alex",
    "ff_siwis", "hf_alpha", "hf_beta", "hm_omega", "hm_psi", "if_sara", "im_nicola", "jf_alpha", "jf_gongitsune", "jf_nezumi",
    "jf_tebukuro", "jm_kumo", "pf_dora", "pm_alex", "pm_santa", "zf_xiaobei", "zf_xiaoni", "zf_xiaoxiao", "zf_xiaoyi",
    "zm_yunjian", "zm_yunxi", "zm_yunxia", "zm_yunyang",
];

/// Look up a voice by name.
pub fn find_voice(name: &str) -> Option<KokoroVoice> {
    // Sorted by name, so the index doubles as the speaker id.
    let index = VOICE_NAMES.binary_search(&name).ok()?;
    let language = VoiceLanguage::from_prefix(name.get(..2)?)?;
    Some(KokoroVoice { name: VOICE_NAMES[index], speaker_id: index as i32, language })
}

/// All voices, in speaker-id order.
pub fn all_voices() -> impl Iterator<Item = KokoroVoice> {
    VOICE_NAMES.iter().filter_map(|name| find_voice(name))
}

/// Print the voice table for `--list-voices`.
pub fn print_voices() {
    println!("Kokoro v1.0 voices ({} total)", VOICE_NAMES.len());
    let mut language = None;
    for voice in all_voices() {
        if language != Some(voice.language) {
            println!("\n── {} ──", voice.language.label());
            language = Some(voice.language);
        }
        println!("  {:<15} {:>3}", voice.name, voice.speaker_id);
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_voice_ids() {
        assert_eq!(find_voice("af_alloy").map(|v| v.speaker_id), Some(0));
        assert_eq!(find_voice("af_bella").map(|v| v.speaker_id), Some(2));
        assert_eq!(find_voice("bf_emma").map(|v| v.speaker_id), Some(21));
        assert_eq!(find_voice("zm_yunyang").map(|v| v.speaker_id), Some(52));
    }

    #[test]
    fn test_unknown_voice() {
        assert!(find_voice("alloy").is_none());
        assert!(find_voice("").is_none());
    }

    #[test]
    fn test_table_is_sorted_and_complete() {
        assert!(VOICE_NAMES.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(all_voices().count(), 53);
    }

    #[test]
    fn test_language_from_prefix() {
        let voice = find_voice("jf_nezumi").unwrap();
        assert_eq!(voice.language, VoiceLanguage::Japanese);
        assert_eq!(voice.language.espeak_lang(), "ja");
        assert!(voice.language.lexicon(Path::new("/m")).is_empty());
        assert!(find_voice("bm_lewis").unwrap().language.lexicon(Path::new("/m")).ends_with("lexicon-gb-en.txt"));
    }
}
