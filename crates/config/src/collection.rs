//! Per-collection options and their validated form.

use crate::error::{ErrorKind, Result};
use crate::format::{EncoderProfile, normalize_format};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Sentinel format meaning "link to library files instead of storing them".
pub const LINK_FORMAT: &str = "link";

/// Collection options as written in the configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectionOptions {
    /// Collection root; relative paths resolve against the top-level `directory`.
    pub directory: Option<PathBuf>,
    pub paths: Option<PathOptions>,
    pub query: String,
    pub formats: Option<FormatList>,
    pub link_type: Option<String>,
    pub removable: Option<bool>,
    pub album_art_embed: Option<bool>,
    pub album_art_copy: Option<bool>,
    pub album_art_name: Option<String>,
    pub album_art_maxwidth: Option<u32>,
    pub album_art_format: Option<String>,
    pub album_art_deinterlace: Option<bool>,
    pub album_art_quality: Option<u32>,
}

/// Path templates, either as an ordered list or as a map.
///
/// Map keys are visited in order: query conditions lexically, then `comp`,
/// then `singleton`, with `default` always last.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathOptions {
    List(Vec<PathRuleOption>),
    Map(BTreeMap<String, String>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathRuleOption {
    pub when: String,
    pub template: String,
}

/// A format list, either `"aac mp3"` or `["aac", "mp3"]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FormatList {
    Words(String),
    List(Vec<String>),
}
impl FormatList {
    fn into_vec(self) -> Vec<String> {
        match self {
            Self::Words(s) => s.split_whitespace().map(str::to_string).collect(),
            Self::List(list) => list.iter().flat_map(|s| s.split_whitespace()).map(str::to_string).collect(),
        }
    }
}

/// When a path template applies to an item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    /// Fallback for every item.
    Default,
    /// Items that belong to no album.
    Singleton,
    /// Items on a compilation album.
    Comp,
    /// Items matching a selection expression.
    Query(String),
}
impl Condition {
    fn parse(s: &str) -> Self {
        match s.trim() {
            "default" => Self::Default,
            "singleton" => Self::Singleton,
            "comp" => Self::Comp,
            query => Self::Query(query.to_string()),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Query(_) => 0,
            Self::Comp => 1,
            Self::Singleton => 2,
            Self::Default => 3,
        }
    }
}

/// One path template and the condition under which it is used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathRule {
    pub condition: Condition,
    pub template: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkType {
    #[default]
    Absolute,
    /// Relative to the directory containing the link.
    Relative,
}

/// How items are materialized in a collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    /// Byte copy of every source file, whatever its format.
    Copy,
    /// Keep files whose format is in `formats`; transcode the rest to the
    /// first entry using `encoder`.
    Convert { formats: Vec<String>, encoder: EncoderProfile },
    /// Symbolic links to the library files.
    Link(LinkType),
}
impl Mode {
    /// Whether a file of `format` may live in the collection unchanged.
    pub fn accepts(&self, format: &str) -> bool {
        match self {
            Self::Copy | Self::Link(_) => true,
            Self::Convert { formats, .. } => formats.contains(&normalize_format(format)),
        }
    }

    /// Canonical transcode target, if this collection transcodes.
    pub fn target(&self) -> Option<&str> {
        match self {
            Self::Convert { formats, .. } => formats.first().map(String::as_str),
            _ => None,
        }
    }

    pub fn is_link(&self) -> bool {
        matches!(self, Self::Link(_))
    }
}

/// Image format album art is converted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtFormat {
    Jpeg,
    Png,
}
impl ArtFormat {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "png" => Some(Self::Png),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Jpeg => "jpg",
            Self::Png => "png",
        }
    }
}

/// Album art handling for a collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtOptions {
    /// Embed art into each stored file (ignored for link collections).
    pub embed: bool,
    /// Place art next to the items as a sidecar file.
    pub copy: bool,
    /// File stem of the sidecar.
    pub name: String,
    pub max_width: Option<u32>,
    pub format: Option<ArtFormat>,
    /// Force baseline (non-progressive) output.
    pub deinterlace: bool,
    /// Lossy quality 1-100; `None` leaves it to the image backend.
    pub quality: Option<u8>,
}
impl ArtOptions {
    /// Whether any processing step applies to the source image.
    pub fn needs_processing(&self) -> bool {
        self.max_width.is_some() || self.format.is_some() || self.deinterlace || self.quality.is_some()
    }
}
impl Default for ArtOptions {
    fn default() -> Self {
        Self {
            embed: true,
            copy: false,
            name: "cover".to_string(),
            max_width: None,
            format: None,
            deinterlace: false,
            quality: None,
        }
    }
}

/// A validated collection, ready to be reconciled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionSpec {
    pub name: String,
    /// Absolute collection root.
    pub directory: PathBuf,
    /// Path templates in evaluation order; the last one is always `default`.
    pub paths: Vec<PathRule>,
    /// Selection expression; empty selects every item.
    pub query: String,
    pub mode: Mode,
    /// Whether the root may legitimately be missing (an unplugged device).
    pub removable: bool,
    pub art: ArtOptions,
}
impl CollectionSpec {
    /// Whether any form of album art is maintained.
    pub fn art_enabled(&self) -> bool {
        (self.art.embed && !self.mode.is_link()) || self.art.copy
    }
}

pub(crate) const DEFAULT_TEMPLATE: &str = "{{ albumartist }}/{{ album }}/{{ track|pad }} {{ title }}";

impl CollectionOptions {
    /// Validate these options into a [`CollectionSpec`].
    ///
    /// `base` is the directory relative collection roots resolve against.
    pub fn validate(
        &self,
        name: &str,
        base: &Path,
        encoders: &BTreeMap<String, EncoderProfile>,
    ) -> Result<CollectionSpec> {
        let invalid = |reason: String| ErrorKind::invalid(name, reason);
        let directory = match &self.directory {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => base.join(dir),
            None => base.join(name),
        };
        let formats: Vec<String> = self.formats.clone().map(FormatList::into_vec).unwrap_or_default();
        let mode = if formats.iter().any(|f| f.eq_ignore_ascii_case(LINK_FORMAT)) {
            if formats.len() > 1 {
                exn::bail!(invalid(format!("'{LINK_FORMAT}' cannot be combined with other formats")));
            }
            let link_type = match self.link_type.as_deref().map(str::trim) {
                None | Some("absolute") => LinkType::Absolute,
                Some("relative") => LinkType::Relative,
                Some(other) => exn::bail!(invalid(format!("unknown link_type '{other}'"))),
            };
            Mode::Link(link_type)
        } else if let Some(first) = formats.first() {
            let formats: Vec<String> = formats.iter().map(|f| normalize_format(f)).collect();
            let target = normalize_format(first);
            let encoder = encoders
                .get(&target)
                .cloned()
                .ok_or_else(|| invalid(format!("no encoder configured for format '{target}'")))?;
            Mode::Convert { formats, encoder }
        } else {
            Mode::Copy
        };
        if self.link_type.is_some() && !mode.is_link() {
            tracing::warn!(collection = name, "link_type has no effect without the '{LINK_FORMAT}' format");
        }
        let quality = match self.album_art_quality {
            None | Some(0) => None,
            Some(q @ 1..=100) => Some(q as u8),
            Some(q) => exn::bail!(invalid(format!("album_art_quality must be between 0 and 100, got {q}"))),
        };
        let art_format = match self.album_art_format.as_deref() {
            None => None,
            Some(f) => Some(ArtFormat::parse(f).ok_or_else(|| invalid(format!("unsupported album_art_format '{f}'")))?),
        };
        let defaults = ArtOptions::default();
        let art = ArtOptions {
            embed: self.album_art_embed.unwrap_or(defaults.embed),
            copy: self.album_art_copy.unwrap_or(defaults.copy),
            name: self.album_art_name.clone().filter(|n| !n.trim().is_empty()).unwrap_or(defaults.name),
            max_width: self.album_art_maxwidth.filter(|w| *w > 0),
            format: art_format,
            deinterlace: self.album_art_deinterlace.unwrap_or(defaults.deinterlace),
            quality,
        };
        Ok(CollectionSpec {
            name: name.to_string(),
            directory,
            paths: self.path_rules(name)?,
            query: self.query.trim().to_string(),
            mode,
            removable: self.removable.unwrap_or(true),
            art,
        })
    }

    fn path_rules(&self, name: &str) -> Result<Vec<PathRule>> {
        let mut rules: Vec<PathRule> = match &self.paths {
            None => vec![],
            Some(PathOptions::List(list)) => list
                .iter()
                .map(|r| PathRule { condition: Condition::parse(&r.when), template: r.template.clone() })
                .collect(),
            Some(PathOptions::Map(map)) => {
                let mut rules: Vec<_> = map
                    .iter()
                    .map(|(when, template)| PathRule { condition: Condition::parse(when), template: template.clone() })
                    .collect();
                // BTreeMap iteration is already lexical; this only moves the
                // special conditions behind the queries.
                rules.sort_by_key(|r| r.condition.rank());
                rules
            },
        };
        match rules.iter().position(|r| r.condition == Condition::Default) {
            // Nothing after `default` could ever match.
            Some(i) => rules.truncate(i + 1),
            None if self.paths.is_none() => rules.push(PathRule {
                condition: Condition::Default,
                template: DEFAULT_TEMPLATE.to_string(),
            }),
            None => exn::bail!(ErrorKind::invalid(name, "paths must define a 'default' template")),
        }
        let syntax = upon::Engine::new();
        for rule in &rules {
            if let Err(e) = syntax.compile(rule.template.as_str()) {
                exn::bail!(ErrorKind::invalid(name, format!("invalid path template '{}': {e}", rule.template)));
            }
        }
        Ok(rules)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::default_encoders;
    use rstest::rstest;

    fn validate(options: CollectionOptions) -> Result<CollectionSpec> {
        options.validate("myplayer", Path::new("/music/alt"), &default_encoders())
    }

    fn formats(s: &str) -> Option<FormatList> {
        Some(FormatList::Words(s.to_string()))
    }

    #[test]
    fn test_defaults() {
        let spec = validate(CollectionOptions::default()).unwrap();
        assert_eq!(spec.directory, PathBuf::from("/music/alt/myplayer"));
        assert_eq!(spec.mode, Mode::Copy);
        assert!(spec.removable);
        assert!(spec.art.embed);
        assert!(!spec.art.copy);
        assert_eq!(spec.art.name, "cover");
        assert_eq!(spec.paths.len(), 1);
        assert_eq!(spec.paths[0].condition, Condition::Default);
        assert!(spec.art_enabled());
    }

    #[test]
    fn test_relative_directory() {
        let options = CollectionOptions { directory: Some("devices/phone".into()), ..Default::default() };
        assert_eq!(validate(options).unwrap().directory, PathBuf::from("/music/alt/devices/phone"));
        let options = CollectionOptions { directory: Some("/media/phone".into()), ..Default::default() };
        assert_eq!(validate(options).unwrap().directory, PathBuf::from("/media/phone"));
    }

    #[test]
    fn test_convert_mode() {
        let options = CollectionOptions { formats: formats("aac MP3"), ..Default::default() };
        let spec = validate(options).unwrap();
        assert_eq!(spec.mode.target(), Some("aac"));
        assert!(spec.mode.accepts("M4A"));
        assert!(spec.mode.accepts("mp3"));
        assert!(!spec.mode.accepts("ogg"));
        let Mode::Convert { encoder, .. } = spec.mode else { panic!("expected convert mode") };
        assert_eq!(encoder.extension, "m4a");
    }

    #[test]
    fn test_format_list() {
        let options = CollectionOptions {
            formats: Some(FormatList::List(vec!["ogg".into(), "mp3 flac".into()])),
            ..Default::default()
        };
        let Mode::Convert { formats, .. } = validate(options).unwrap().mode else { panic!("expected convert mode") };
        assert_eq!(formats, vec!["ogg", "mp3", "flac"]);
    }

    #[rstest]
    #[case(None, LinkType::Absolute)]
    #[case(Some("absolute"), LinkType::Absolute)]
    #[case(Some("relative"), LinkType::Relative)]
    fn test_link_mode(#[case] link_type: Option<&str>, #[case] expected: LinkType) {
        let options = CollectionOptions {
            formats: formats("link"),
            link_type: link_type.map(str::to_string),
            ..Default::default()
        };
        let spec = validate(options).unwrap();
        assert_eq!(spec.mode, Mode::Link(expected));
        // Nothing to embed into a link.
        assert!(!spec.art_enabled());
    }

    #[rstest]
    #[case::link_with_others(CollectionOptions { formats: formats("link mp3"), ..Default::default() })]
    #[case::unknown_link_type(CollectionOptions { formats: formats("link"), link_type: Some("Hylian".into()), ..Default::default() })]
    #[case::quality(CollectionOptions { album_art_quality: Some(101), ..Default::default() })]
    #[case::no_encoder(CollectionOptions { formats: formats("speex"), ..Default::default() })]
    #[case::art_format(CollectionOptions { album_art_format: Some("tiff".into()), ..Default::default() })]
    #[case::no_default(CollectionOptions {
        paths: Some(PathOptions::Map(BTreeMap::from([("singleton".to_string(), "{{ title }}".to_string())]))),
        ..Default::default()
    })]
    #[case::syntax(CollectionOptions {
        paths: Some(PathOptions::Map(BTreeMap::from([("default".to_string(), "{{ title".to_string())]))),
        ..Default::default()
    })]
    fn test_invalid(#[case] options: CollectionOptions) {
        let err = validate(options).unwrap_err();
        assert!(matches!(&*err, ErrorKind::Invalid { collection, .. } if collection == "myplayer"));
    }

    #[test]
    fn test_quality_zero_is_backend_default() {
        let options = CollectionOptions { album_art_quality: Some(0), ..Default::default() };
        assert_eq!(validate(options).unwrap().art.quality, None);
        let options = CollectionOptions { album_art_quality: Some(100), ..Default::default() };
        assert_eq!(validate(options).unwrap().art.quality, Some(100));
    }

    #[test]
    fn test_path_map_order() {
        let map = BTreeMap::from([
            ("default".to_string(), "{{ artist }}/{{ title }}".to_string()),
            ("singleton".to_string(), "singles/{{ title }}".to_string()),
            ("comp".to_string(), "va/{{ title }}".to_string()),
            ("genre:jazz".to_string(), "jazz/{{ title }}".to_string()),
        ]);
        let spec = validate(CollectionOptions { paths: Some(PathOptions::Map(map)), ..Default::default() }).unwrap();
        let conditions: Vec<_> = spec.paths.iter().map(|r| r.condition.clone()).collect();
        assert_eq!(
            conditions,
            vec![Condition::Query("genre:jazz".into()), Condition::Comp, Condition::Singleton, Condition::Default]
        );
    }

    #[test]
    fn test_path_list_keeps_order_and_drops_unreachable() {
        let list = vec![
            PathRuleOption { when: "singleton".into(), template: "s/{{ title }}".into() },
            PathRuleOption { when: "default".into(), template: "{{ title }}".into() },
            PathRuleOption { when: "comp".into(), template: "never".into() },
        ];
        let spec = validate(CollectionOptions { paths: Some(PathOptions::List(list)), ..Default::default() }).unwrap();
        assert_eq!(spec.paths.len(), 2);
        assert_eq!(spec.paths[0].condition, Condition::Singleton);
    }
}
