//! Item templates for collection paths and listings.
//!
//! Templates use [upon]'s Mustache-like syntax (`{{ variable }}`,
//! `{{ value|formatter }}`) over an item's [metadata view](crate::item_view),
//! extended with a few path-friendly helpers:
//!
//! - **`slug`** converts strings to URL-safe slugs, stripping quotation marks
//!   first to avoid artifacts like leading/trailing hyphens.
//! - **`truncate`** truncates strings to a maximum byte length at a character
//!   boundary, usable as either `truncate(value, n)` or `{{ value|truncate: n }}`.
//! - **`pad`** zero-pads numbers to two digits, so track `7` renders as `07`.
//!
//! Well-known tag fields are always defined (empty when the item lacks them).
//! Any other field an item does not carry is an error for that item only.
//!
//! # Example
//!
//! ```
//! use shadow_engine::{Metadata, PathGenerator};
//! use std::path::Path;
//!
//! let generator: PathGenerator = "{{ artist|slug }}/{{ track|pad }} {{ title }}".parse().unwrap();
//! let view = Metadata::new().with("artist", "Miles Davis").with("track", 4i64).with("title", "So What");
//! assert_eq!(generator.generate_with_ext(&view, "flac").unwrap(), Path::new("miles-davis/04 So What.flac"));
//! ```

use crate::error::{Error, ErrorKind, Result};
use crate::model::Metadata;
use exn::ResultExt;
use shadow_storage::validate_path;
use std::path::PathBuf;
use std::str::FromStr;
use upon::{Engine, Template};

/// Default line format of `list-tracks`.
pub const DEFAULT_LIST_FORMAT: &str = "{{ artist }} - {{ album }} - {{ title }}";

/// A compiled template over item metadata.
///
/// Constructed via [`FromStr`], which compiles the template eagerly so that
/// syntax errors surface at creation time rather than per item.
pub struct ItemTemplate {
    engine: Engine<'static>,
    template: Template<'static>,
}
impl FromStr for ItemTemplate {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let mut engine = Engine::new();
        addons::configure(&mut engine);
        let template = engine.compile(s.to_string()).or_raise(|| ErrorKind::Configuration)?;
        Ok(Self { engine, template })
    }
}
impl ItemTemplate {
    /// Render the template against an item's metadata view.
    pub fn render(&self, view: &Metadata) -> Result<String> {
        self.render_value(view.to_template())
    }

    fn render_value(&self, parameters: upon::Value) -> Result<String> {
        Ok(self.template.render(&self.engine, parameters).to_string().map_err(|e| ErrorKind::Template(e.to_string()))?)
    }
}

/// Renders collection-relative destination paths.
///
/// Path separators inside field values are replaced so that a title such as
/// `AC/DC` cannot open a directory of its own. Generated paths are normalized
/// (segments trimmed, empty segments dropped) and validated by
/// [`shadow_storage::validate_path`] so they never leave the collection root.
pub struct PathGenerator(ItemTemplate);
impl std::fmt::Debug for PathGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PathGenerator").finish_non_exhaustive()
    }
}
impl FromStr for PathGenerator {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}
impl PathGenerator {
    /// Render the path of an item, without any file extension.
    pub fn generate(&self, view: &Metadata) -> Result<PathBuf> {
        let path = self.0.render_value(sanitize(view.to_template()))?;
        Self::normalize(&path)
    }

    /// Render the path of an item and append `ext`.
    ///
    /// The extension is trimmed of leading/trailing dots, so both `"mp3"` and
    /// `".mp3"` produce the same result. An empty extension appends nothing.
    pub fn generate_with_ext(&self, view: &Metadata, ext: impl AsRef<str>) -> Result<PathBuf> {
        let path = self.generate(view)?;
        let ext = ext.as_ref().trim().trim_matches('.');
        if ext.is_empty() {
            return Ok(path);
        }
        let mut name = path.file_name().unwrap_or_default().to_os_string();
        name.push(".");
        name.push(ext);
        Ok(path.with_file_name(name))
    }

    fn normalize(s: &str) -> Result<PathBuf> {
        let path = s.trim().split('/').map(str::trim).collect::<Vec<_>>().join("/");
        validate_path(&path).or_raise(|| ErrorKind::Template(format!("'{path}' is not a valid collection path")))
    }
}

fn sanitize(value: upon::Value) -> upon::Value {
    match value {
        upon::Value::String(s) => upon::Value::String(s.replace(['/', '\\', '\0'], "_")),
        upon::Value::Map(map) => upon::Value::Map(map.into_iter().map(|(k, v)| (k, sanitize(v))).collect()),
        v => v,
    }
}

/// Custom [`upon`] extensions for path-safe string manipulation.
mod addons {
    use rslug::slugify;
    use std::fmt::Write;
    use upon::{Engine, Value, fmt as upon_fmt};

    /// Custom formatter that converts strings to URL-safe slugs.
    ///
    /// Strips quotation marks before slugifying to avoid awkward slug output
    /// like `"hello"` becoming `-hello-`.
    fn slug_formatter(f: &mut upon_fmt::Formatter<'_>, value: &Value) -> upon_fmt::Result {
        match value {
            Value::String(s) => {
                // Various quotation marks: '"''""„"`«»
                let marks = [
                    '\u{0027}', '\u{0022}', '\u{2018}', '\u{2019}', '\u{201C}', '\u{201D}', '\u{201E}', '\u{201B}',
                    '\u{0060}', '\u{00AB}', '\u{00BB}', '\u{2039}', '\u{203A}',
                ];
                let stripped: String = s.chars().filter(|c| !marks.contains(c)).collect();
                write!(f, "{}", slugify!(&stripped))?
            },
            v => upon_fmt::default(f, v)?,
        };
        Ok(())
    }

    /// Zero-pads integers (and integer-like strings) to two digits; anything
    /// else renders unchanged.
    fn pad_formatter(f: &mut upon_fmt::Formatter<'_>, value: &Value) -> upon_fmt::Result {
        match value {
            Value::Integer(i) => write!(f, "{i:02}")?,
            Value::String(s) => match s.trim().parse::<i64>() {
                Ok(i) => write!(f, "{i:02}")?,
                Err(_) => write!(f, "{s}")?,
            },
            v => upon_fmt::default(f, v)?,
        };
        Ok(())
    }

    /// Truncates a string to a maximum byte length at a character boundary.
    fn truncate_to_char_boundary(s: &str, max_bytes: usize) -> String {
        s[..s.floor_char_boundary(max_bytes)].to_string()
    }

    pub(crate) fn configure(engine: &mut Engine<'_>) {
        engine.add_formatter("slug", slug_formatter);
        engine.add_formatter("pad", pad_formatter);
        engine.add_function("truncate", truncate_to_char_boundary);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::path::Path;

    fn view() -> Metadata {
        Metadata::new()
            .with("albumartist", "Michael Jackson")
            .with("artist", "Michael Jackson")
            .with("album", "Thriller")
            .with("title", "Beat It")
            .with("track", 5i64)
            .with("year", 1982i64)
    }

    #[rstest]
    #[case("{{ albumartist }}/{{ album }}/{{ track|pad }} {{ title }}", "Michael Jackson/Thriller/05 Beat It")]
    #[case("{{ albumartist|slug }}/{{ year }}", "michael-jackson/1982")]
    #[case("{{ title|truncate: 4|slug }}", "beat")]
    #[case("{{ truncate(album, 5) }}", "Thril")]
    #[case("  {{ album }} / {{ composer }} / {{ title }} ", "Thriller/Beat It")]
    fn test_generate(#[case] template: &str, #[case] expected: &str) {
        let generator: PathGenerator = template.parse().unwrap();
        assert_eq!(generator.generate(&view()).unwrap(), Path::new(expected));
    }

    #[test]
    fn test_generate_with_ext() {
        let generator: PathGenerator = "{{ album }}/{{ title }}".parse().unwrap();
        assert_eq!(generator.generate_with_ext(&view(), ".mp3").unwrap(), Path::new("Thriller/Beat It.mp3"));
        assert_eq!(generator.generate_with_ext(&view(), "").unwrap(), Path::new("Thriller/Beat It"));
    }

    #[test]
    fn test_values_cannot_open_directories() {
        let generator: PathGenerator = "{{ artist }}/{{ title }}".parse().unwrap();
        let view = Metadata::new().with("artist", "AC/DC").with("title", "../../etc");
        assert_eq!(generator.generate(&view).unwrap(), Path::new("AC_DC/.._.._etc"));
    }

    #[test]
    fn test_pad_passes_non_numbers_through() {
        let generator: PathGenerator = "{{ track|pad }}".parse().unwrap();
        assert_eq!(generator.generate(&Metadata::new().with("track", "B2")).unwrap(), Path::new("B2"));
    }

    #[test]
    fn test_missing_flexible_field_fails_per_item() {
        let generator: PathGenerator = "{{ grouping }}/{{ mood }}".parse().unwrap();
        let err = generator.generate(&view()).unwrap_err();
        assert!(matches!(&*err, ErrorKind::Template(_)));
        assert!(generator.generate(&view().with("mood", "calm")).is_ok());
    }

    #[test]
    fn test_empty_path_is_an_error() {
        let generator: PathGenerator = "{{ composer }}".parse().unwrap();
        assert!(matches!(&*generator.generate(&view()).unwrap_err(), ErrorKind::Template(_)));
    }

    #[test]
    fn test_syntax_error_is_configuration() {
        let err = "{{ title".parse::<PathGenerator>().unwrap_err();
        assert!(matches!(&*err, ErrorKind::Configuration));
    }

    #[test]
    fn test_list_format() {
        let template: ItemTemplate = DEFAULT_LIST_FORMAT.parse().unwrap();
        assert_eq!(template.render(&view()).unwrap(), "Michael Jackson - Thriller - Beat It");
    }
}
