//! Audio format names and encoder profiles.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Names the host library uses for a format, mapped onto the name encoders
/// are configured under.
const ALIASES: &[(&str, &str)] = &[("vorbis", "ogg"), ("windows media", "wma"), ("m4a", "aac")];

/// Canonical, lower-case name for a format tag.
///
/// ```
/// use shadow_config::normalize_format;
/// assert_eq!(normalize_format("MP3"), "mp3");
/// assert_eq!(normalize_format("Windows Media"), "wma");
/// assert_eq!(normalize_format(" Vorbis "), "ogg");
/// ```
pub fn normalize_format(format: &str) -> String {
    let lower = format.trim().to_lowercase();
    match ALIASES.iter().find(|(alias, _)| *alias == lower) {
        Some((_, canonical)) => (*canonical).to_string(),
        None => lower,
    }
}

/// How to produce a file in some format from any other.
///
/// `command` runs through `sh -c` with `$source` and `$dest` exported as
/// environment variables, so it should quote them: `ffmpeg -i "$source" "$dest"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncoderProfile {
    pub command: String,
    /// File extension of the output, without a leading dot.
    pub extension: String,
}
impl EncoderProfile {
    pub fn new(command: impl Into<String>, extension: impl Into<String>) -> Self {
        Self { command: command.into(), extension: extension.into() }
    }
}

pub(crate) fn default_encoders() -> BTreeMap<String, EncoderProfile> {
    [
        ("aac", r#"ffmpeg -i "$source" -y -vn -acodec aac -aq 1 "$dest""#, "m4a"),
        ("alac", r#"ffmpeg -i "$source" -y -vn -acodec alac "$dest""#, "m4a"),
        ("flac", r#"ffmpeg -i "$source" -y -vn -acodec flac "$dest""#, "flac"),
        ("mp3", r#"ffmpeg -i "$source" -y -vn -aq 2 "$dest""#, "mp3"),
        ("opus", r#"ffmpeg -i "$source" -y -vn -acodec libopus -ab 96k "$dest""#, "opus"),
        ("ogg", r#"ffmpeg -i "$source" -y -vn -acodec libvorbis -aq 3 "$dest""#, "ogg"),
        ("wma", r#"ffmpeg -i "$source" -y -vn -acodec wmav2 "$dest""#, "wma"),
    ]
    .into_iter()
    .map(|(name, command, ext)| (name.to_string(), EncoderProfile::new(command, ext)))
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("FLAC", "flac")]
    #[case("ogg", "ogg")]
    #[case("Vorbis", "ogg")]
    #[case("Windows Media", "wma")]
    #[case("M4A", "aac")]
    #[case("Opus", "opus")]
    fn test_normalize_format(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(normalize_format(input), expected);
    }

    #[test]
    fn test_every_default_encoder_is_canonical() {
        for name in default_encoders().keys() {
            assert_eq!(&normalize_format(name), name);
        }
    }
}
