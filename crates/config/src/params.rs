//! Encoding parameters and the policy switches that drive command synthesis
//!
//! Every policy axis is a closed enum. Unknown values are rejected when a preset is
//! parsed, with two deliberate exceptions: [`LutInterp`] falls back to tetrahedral
//! interpolation, and [`LutOutputTags`] keeps the raw value so the output tagging
//! step can apply its documented Rec.709 fallback.

use serde::{de, Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// Error type for parameter parsing and validation
#[derive(Debug, Clone, PartialEq)]
pub enum ParamsError {
    /// A policy switch received a value outside its closed set
    UnknownVariant { field: &'static str, value: String },
    /// A field value is malformed
    Invalid {
        field: &'static str,
        value: String,
        reason: &'static str,
    },
}

impl fmt::Display for ParamsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamsError::UnknownVariant { field, value } => {
                write!(f, "Unknown value for {}: '{}'", field, value)
            }
            ParamsError::Invalid {
                field,
                value,
                reason,
            } => write!(f, "Invalid {} '{}': {}", field, value, reason),
        }
    }
}

impl std::error::Error for ParamsError {}

/// Declares a closed string-backed enum with `as_str`, `Display`, `FromStr` and serde
/// support through its string form.
macro_rules! string_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $field:literal {
            $( $(#[$vmeta:meta])* $variant:ident => $text:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub enum $name {
            $( $(#[$vmeta])* $variant ),+
        }

        impl $name {
            /// Canonical string form, as written to presets and the command line
            pub fn as_str(&self) -> &'static str {
                match self {
                    $( $name::$variant => $text ),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = ParamsError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_ascii_lowercase().as_str() {
                    $( $text => Ok($name::$variant), )+
                    _ => Err(ParamsError::UnknownVariant {
                        field: $field,
                        value: s.to_string(),
                    }),
                }
            }
        }

        impl TryFrom<String> for $name {
            type Error = ParamsError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                value.parse()
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.as_str().to_string()
            }
        }
    };
}

string_enum! {
    /// Single-stage delivery or two-stage mastering pipeline
    ProcessingMode, "processing_mode" {
        /// Source straight to the delivery file
        Fast => "fast",
        /// ProRes master first, then the delivery encode from the master
        Pro => "pro",
    }
}

string_enum! {
    /// How the output bit depth is chosen when no pixel format is forced
    BitDepthPolicy, "bit_depth_policy" {
        Preserve => "preserve",
        Force8Bit => "force_8bit",
        Auto => "auto",
    }
}

string_enum! {
    /// Dither mode for bit-depth reduction
    DitherMode, "dither" {
        None => "none",
        Ordered => "ordered",
        Random => "random",
        ErrorDiffusion => "error_diffusion",
    }
}

string_enum! {
    /// YUV<->RGB matrices the LUT stage may force
    ColorMatrix, "color_matrix" {
        Bt709 => "bt709",
        Smpte170m => "smpte170m",
        Bt470bg => "bt470bg",
        Bt2020nc => "bt2020nc",
        Bt2020c => "bt2020c",
    }
}

impl ColorMatrix {
    /// Map a probed colorspace tag onto the whitelist
    pub fn from_tag(tag: &str) -> Option<Self> {
        tag.parse().ok()
    }
}

impl Default for ProcessingMode {
    fn default() -> Self {
        Self::Fast
    }
}

impl Default for BitDepthPolicy {
    fn default() -> Self {
        Self::Preserve
    }
}

impl Default for DitherMode {
    fn default() -> Self {
        Self::None
    }
}

/// 3D LUT interpolation algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum LutInterp {
    Nearest,
    Trilinear,
    Tetrahedral,
    Pyramid,
    Prism,
    Cubic,
}

impl LutInterp {
    pub fn as_str(&self) -> &'static str {
        match self {
            LutInterp::Nearest => "nearest",
            LutInterp::Trilinear => "trilinear",
            LutInterp::Tetrahedral => "tetrahedral",
            LutInterp::Pyramid => "pyramid",
            LutInterp::Prism => "prism",
            LutInterp::Cubic => "cubic",
        }
    }

    /// Parse an interpolation name, using tetrahedral for anything unsupported
    pub fn parse_or_default(value: &str) -> Self {
        value.parse().unwrap_or_default()
    }
}

impl Default for LutInterp {
    fn default() -> Self {
        Self::Tetrahedral
    }
}

impl fmt::Display for LutInterp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LutInterp {
    type Err = ParamsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "nearest" => Ok(LutInterp::Nearest),
            "trilinear" => Ok(LutInterp::Trilinear),
            "tetrahedral" => Ok(LutInterp::Tetrahedral),
            "pyramid" => Ok(LutInterp::Pyramid),
            "prism" => Ok(LutInterp::Prism),
            "cubic" => Ok(LutInterp::Cubic),
            _ => Err(ParamsError::UnknownVariant {
                field: "lut_interp",
                value: s.to_string(),
            }),
        }
    }
}

impl From<String> for LutInterp {
    fn from(value: String) -> Self {
        Self::parse_or_default(&value)
    }
}

impl From<LutInterp> for String {
    fn from(value: LutInterp) -> Self {
        value.as_str().to_string()
    }
}

/// Which YUV<->RGB matrix to force before the LUT is applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum LutInputMatrix {
    /// Use the source's colorspace tag when it is on the whitelist
    Auto,
    /// Always force BT.709
    Bt709,
    /// Never force a matrix
    None,
    /// Force a specific whitelisted matrix
    Matrix(ColorMatrix),
}

impl LutInputMatrix {
    pub fn as_str(&self) -> &'static str {
        match self {
            LutInputMatrix::Auto => "auto",
            LutInputMatrix::Bt709 => "bt709",
            LutInputMatrix::None => "none",
            LutInputMatrix::Matrix(matrix) => matrix.as_str(),
        }
    }
}

impl Default for LutInputMatrix {
    fn default() -> Self {
        Self::Auto
    }
}

impl fmt::Display for LutInputMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LutInputMatrix {
    type Err = ParamsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "auto" => Ok(LutInputMatrix::Auto),
            "bt709" => Ok(LutInputMatrix::Bt709),
            "none" => Ok(LutInputMatrix::None),
            other => ColorMatrix::from_tag(other)
                .map(LutInputMatrix::Matrix)
                .ok_or_else(|| ParamsError::UnknownVariant {
                    field: "lut_input_matrix",
                    value: s.to_string(),
                }),
        }
    }
}

impl TryFrom<String> for LutInputMatrix {
    type Error = ParamsError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<LutInputMatrix> for String {
    fn from(value: LutInputMatrix) -> Self {
        value.as_str().to_string()
    }
}

/// Which color tags to write on the output when a LUT is applied
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum LutOutputTags {
    /// Rec.709 primaries/transfer/matrix, limited range
    Bt709,
    /// Copy the source tags (subject to `inherit_color_metadata`)
    Inherit,
    /// Write no color tags
    None,
    /// A value outside the known set; tagged as Rec.709 when resolved
    Unrecognized(UnknownTag),
}

/// Lower-cased, trimmed tag name that is not one of the known policies
///
/// Only built through `LutOutputTags::from`, so it always reads back as itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UnknownTag(String);

impl UnknownTag {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UnknownTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl LutOutputTags {
    pub fn as_str(&self) -> &str {
        match self {
            LutOutputTags::Bt709 => "bt709",
            LutOutputTags::Inherit => "inherit",
            LutOutputTags::None => "none",
            LutOutputTags::Unrecognized(value) => value.as_str(),
        }
    }
}

impl Default for LutOutputTags {
    fn default() -> Self {
        Self::Bt709
    }
}

impl fmt::Display for LutOutputTags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for LutOutputTags {
    fn from(value: &str) -> Self {
        let normalized = value.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "" | "bt709" => LutOutputTags::Bt709,
            "inherit" => LutOutputTags::Inherit,
            "none" => LutOutputTags::None,
            _ => LutOutputTags::Unrecognized(UnknownTag(normalized)),
        }
    }
}

impl From<String> for LutOutputTags {
    fn from(value: String) -> Self {
        LutOutputTags::from(value.as_str())
    }
}

impl From<LutOutputTags> for String {
    fn from(value: LutOutputTags) -> Self {
        value.as_str().to_string()
    }
}

/// Codec identifier passed to `-c:v` / `-c:a`
///
/// The `copy` sentinel means stream passthrough.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Codec(String);

impl Codec {
    /// Stream passthrough sentinel
    pub const COPY: &'static str = "copy";

    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into().trim().to_string())
    }

    pub fn copy() -> Self {
        Self(Self::COPY.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_copy(&self) -> bool {
        self.0 == Self::COPY
    }

    /// Encoders that can write 10-bit output
    pub fn supports_10bit(&self) -> bool {
        matches!(
            self.0.as_str(),
            "prores_ks" | "libx265" | "hevc_videotoolbox"
        )
    }

    /// Apple VideoToolbox hardware encoders
    pub fn is_videotoolbox(&self) -> bool {
        self.0.contains("videotoolbox")
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Codec {
    fn from(value: &str) -> Self {
        Codec::new(value)
    }
}

impl From<String> for Codec {
    fn from(value: String) -> Self {
        Codec::new(value)
    }
}

impl From<Codec> for String {
    fn from(value: Codec) -> Self {
        value.0
    }
}

/// A bitrate such as `8000k`, `12M` or `1.5G`
///
/// Keeps the unit suffix exactly as written so derived rates use the same unit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bitrate {
    value: f64,
    unit: Option<char>,
}

impl Bitrate {
    /// Parse `<number>[kKmMgG]`; the number must be positive
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        let (number, unit) = match text.chars().last() {
            Some(c) if matches!(c, 'k' | 'K' | 'm' | 'M' | 'g' | 'G') => {
                (&text[..text.len() - 1], Some(c))
            }
            _ => (text, None),
        };

        let mut parts = number.splitn(2, '.');
        let whole = parts.next().unwrap_or("");
        let fraction = parts.next();
        if whole.is_empty() || !whole.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        if let Some(fraction) = fraction {
            if fraction.is_empty() || !fraction.chars().all(|c| c.is_ascii_digit()) {
                return None;
            }
        }

        let value: f64 = number.parse().ok()?;
        if value <= 0.0 {
            return None;
        }
        Some(Self { value, unit })
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn unit(&self) -> Option<char> {
        self.unit
    }

    /// Multiply the value, keeping the unit
    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            value: self.value * factor,
            unit: self.unit,
        }
    }

    /// Value in kbit/s; a bare number has no known unit and yields `None`
    pub fn as_kbps(&self) -> Option<f64> {
        match self.unit.map(|c| c.to_ascii_lowercase()) {
            Some('k') => Some(self.value),
            Some('m') => Some(self.value * 1000.0),
            Some('g') => Some(self.value * 1000.0 * 1000.0),
            _ => None,
        }
    }
}

impl fmt::Display for Bitrate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if (self.value - self.value.round()).abs() < 1e-6 {
            write!(f, "{}", self.value.round() as i64)?;
        } else {
            write!(f, "{}", self.value)?;
        }
        if let Some(unit) = self.unit {
            write!(f, "{}", unit)?;
        }
        Ok(())
    }
}

/// Parse a frame rate written as a number or a fraction (`30000/1001`)
///
/// Returns `None` for empty text, `0/0`, zero denominators and garbage.
pub fn parse_frame_rate(text: &str) -> Option<f64> {
    let text = text.trim();
    if text.is_empty() || text == "0/0" {
        return None;
    }
    if let Some((numerator, denominator)) = text.split_once('/') {
        let numerator: f64 = numerator.trim().parse().ok()?;
        let denominator: f64 = denominator.trim().parse().ok()?;
        if denominator == 0.0 {
            return None;
        }
        return Some(numerator / denominator);
    }
    text.parse().ok()
}

/// Normalize a free-text override: trimmed, and `None` when empty
pub fn override_value(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn deserialize_override<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<String> = Option::deserialize(deserializer)?;
    Ok(value.as_deref().and_then(override_value))
}

/// Older presets store counts as strings ("30"), newer ones as numbers
fn deserialize_count<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum CountRepr {
        Number(u32),
        Text(String),
    }

    match Option::<CountRepr>::deserialize(deserializer)? {
        None => Ok(None),
        Some(CountRepr::Number(n)) => Ok(Some(n)),
        Some(CountRepr::Text(text)) => match override_value(&text) {
            None => Ok(None),
            Some(text) => text
                .parse::<u32>()
                .map(Some)
                .map_err(|_| de::Error::custom(format!("expected a count, got '{}'", text))),
        },
    }
}

fn default_video_codec() -> Codec {
    Codec::new("libx264")
}

fn default_audio_codec() -> Codec {
    Codec::new("aac")
}

/// User-chosen encoding options for one job
///
/// `None` overrides mean "derive from the source or leave to the encoder default".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncodingParameters {
    pub video_codec: Codec,
    pub audio_codec: Codec,
    #[serde(deserialize_with = "deserialize_override", skip_serializing_if = "Option::is_none")]
    pub pix_fmt: Option<String>,
    /// `WxH` or an ffmpeg size abbreviation
    #[serde(deserialize_with = "deserialize_override", skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
    #[serde(deserialize_with = "deserialize_override", skip_serializing_if = "Option::is_none")]
    pub bitrate: Option<String>,
    /// Output frame rate, a number or a fraction
    #[serde(deserialize_with = "deserialize_override", skip_serializing_if = "Option::is_none")]
    pub fps: Option<String>,
    #[serde(deserialize_with = "deserialize_override", skip_serializing_if = "Option::is_none")]
    pub crf: Option<String>,
    #[serde(deserialize_with = "deserialize_override", skip_serializing_if = "Option::is_none")]
    pub preset: Option<String>,
    #[serde(deserialize_with = "deserialize_override", skip_serializing_if = "Option::is_none")]
    pub tune: Option<String>,
    #[serde(deserialize_with = "deserialize_count", skip_serializing_if = "Option::is_none")]
    pub gop: Option<u32>,
    #[serde(deserialize_with = "deserialize_override", skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    #[serde(deserialize_with = "deserialize_override", skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    #[serde(deserialize_with = "deserialize_count", skip_serializing_if = "Option::is_none")]
    pub threads: Option<u32>,
    #[serde(deserialize_with = "deserialize_override", skip_serializing_if = "Option::is_none")]
    pub audio_bitrate: Option<String>,
    #[serde(deserialize_with = "deserialize_count", skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<u32>,
    #[serde(deserialize_with = "deserialize_count", skip_serializing_if = "Option::is_none")]
    pub channels: Option<u32>,
    pub faststart: bool,
    pub overwrite: bool,
    pub generate_cover: bool,
    pub processing_mode: ProcessingMode,
    pub bit_depth_policy: BitDepthPolicy,
    pub force_cfr: bool,
    pub inherit_color_metadata: bool,
    pub lut_interp: LutInterp,
    #[serde(alias = "zscale_dither")]
    pub dither: DitherMode,
    pub lut_input_matrix: LutInputMatrix,
    pub lut_output_tags: LutOutputTags,
}

impl Default for EncodingParameters {
    fn default() -> Self {
        Self {
            video_codec: default_video_codec(),
            audio_codec: default_audio_codec(),
            pix_fmt: None,
            resolution: None,
            bitrate: None,
            fps: None,
            crf: None,
            preset: None,
            tune: None,
            gop: None,
            profile: None,
            level: None,
            threads: None,
            audio_bitrate: None,
            sample_rate: None,
            channels: None,
            faststart: false,
            overwrite: true,
            generate_cover: false,
            processing_mode: ProcessingMode::Fast,
            bit_depth_policy: BitDepthPolicy::Preserve,
            force_cfr: true,
            inherit_color_metadata: true,
            lut_interp: LutInterp::Tetrahedral,
            dither: DitherMode::None,
            lut_input_matrix: LutInputMatrix::Auto,
            lut_output_tags: LutOutputTags::Bt709,
        }
    }
}

impl EncodingParameters {
    pub fn is_pro(&self) -> bool {
        self.processing_mode == ProcessingMode::Pro
    }

    /// Parsed explicit bitrate, if one is set and well-formed
    pub fn parsed_bitrate(&self) -> Option<Bitrate> {
        self.bitrate.as_deref().and_then(Bitrate::parse)
    }

    /// Parsed explicit output frame rate
    pub fn parsed_fps(&self) -> Option<f64> {
        self.fps.as_deref().and_then(parse_frame_rate)
    }

    /// Check that every override is representable on the command line
    pub fn validate(&self) -> Result<(), ParamsError> {
        if self.video_codec.as_str().is_empty() {
            return Err(invalid("video_codec", "", "codec must not be empty"));
        }
        if self.audio_codec.as_str().is_empty() {
            return Err(invalid("audio_codec", "", "codec must not be empty"));
        }

        if let Some(bitrate) = &self.bitrate {
            if Bitrate::parse(bitrate).is_none() {
                return Err(invalid(
                    "bitrate",
                    bitrate,
                    "expected a positive number with optional k/M/G suffix",
                ));
            }
        }

        if let Some(fps) = &self.fps {
            match parse_frame_rate(fps) {
                Some(rate) if rate > 0.0 => {}
                _ => return Err(invalid("fps", fps, "expected a positive rate or fraction")),
            }
        }

        if let Some(resolution) = &self.resolution {
            if !is_valid_resolution(resolution) {
                return Err(invalid(
                    "resolution",
                    resolution,
                    "expected WxH or a size abbreviation",
                ));
            }
        }

        for (field, value) in [
            ("gop", self.gop),
            ("sample_rate", self.sample_rate),
            ("channels", self.channels),
        ] {
            if value == Some(0) {
                return Err(invalid(field, "0", "must be greater than zero"));
            }
        }

        Ok(())
    }
}

fn invalid(field: &'static str, value: &str, reason: &'static str) -> ParamsError {
    ParamsError::Invalid {
        field,
        value: value.to_string(),
        reason,
    }
}

fn is_valid_resolution(text: &str) -> bool {
    if let Some((w, h)) = text.split_once('x') {
        return matches!(
            (w.parse::<u32>(), h.parse::<u32>()),
            (Ok(w), Ok(h)) if w > 0 && h > 0
        );
    }
    // ffmpeg size abbreviations such as "hd1080" or "vga"
    text.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
        && text.chars().all(|c| c.is_ascii_alphanumeric())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_defaults_match_delivery_profile() {
        let params = EncodingParameters::default();
        assert_eq!(params.video_codec.as_str(), "libx264");
        assert_eq!(params.audio_codec.as_str(), "aac");
        assert!(params.overwrite);
        assert!(params.force_cfr);
        assert!(params.inherit_color_metadata);
        assert_eq!(params.processing_mode, ProcessingMode::Fast);
        assert_eq!(params.bit_depth_policy, BitDepthPolicy::Preserve);
        assert_eq!(params.lut_interp, LutInterp::Tetrahedral);
        assert_eq!(params.lut_input_matrix, LutInputMatrix::Auto);
        assert_eq!(params.lut_output_tags, LutOutputTags::Bt709);
        assert!(params.validate().is_ok());
    }

    #[test]
    fn test_bitrate_parse_and_scale() {
        let rate = Bitrate::parse("8000k").unwrap();
        assert_eq!(rate.to_string(), "8000k");
        assert_eq!(rate.scaled(2.0).to_string(), "16000k");
        assert_eq!(rate.as_kbps(), Some(8000.0));

        let rate = Bitrate::parse("1.5M").unwrap();
        assert_eq!(rate.scaled(2.0).to_string(), "3M");
        assert_eq!(rate.as_kbps(), Some(1500.0));

        let rate = Bitrate::parse(" 2.5m ").unwrap();
        assert_eq!(rate.scaled(2.0).to_string(), "5m");
        assert_eq!(Bitrate::parse("1.25G").unwrap().scaled(2.0).to_string(), "2.5G");

        assert_eq!(Bitrate::parse("5000000").unwrap().as_kbps(), None);
        assert!(Bitrate::parse("").is_none());
        assert!(Bitrate::parse("0k").is_none());
        assert!(Bitrate::parse("fast").is_none());
        assert!(Bitrate::parse("10kb").is_none());
        assert!(Bitrate::parse(".5M").is_none());
        assert!(Bitrate::parse("5.M").is_none());
    }

    #[test]
    fn test_parse_frame_rate() {
        let ntsc = parse_frame_rate("30000/1001").unwrap();
        assert!((ntsc - 29.97).abs() < 0.001);
        assert_eq!(parse_frame_rate("25"), Some(25.0));
        assert_eq!(parse_frame_rate("23.976"), Some(23.976));
        assert_eq!(parse_frame_rate("0/0"), None);
        assert_eq!(parse_frame_rate("24/0"), None);
        assert_eq!(parse_frame_rate(""), None);
        assert_eq!(parse_frame_rate("abc"), None);
    }

    #[test]
    fn test_closed_enums_reject_unknown_values() {
        assert_eq!("pro".parse::<ProcessingMode>(), Ok(ProcessingMode::Pro));
        assert_eq!(
            "FORCE_8BIT".parse::<BitDepthPolicy>(),
            Ok(BitDepthPolicy::Force8Bit)
        );
        assert!("turbo".parse::<ProcessingMode>().is_err());
        assert!("12bit".parse::<BitDepthPolicy>().is_err());
        assert!("floyd".parse::<DitherMode>().is_err());

        let err = serde_json::from_str::<EncodingParameters>(r#"{"processing_mode": "turbo"}"#)
            .unwrap_err();
        assert!(err.to_string().contains("processing_mode"));
    }

    #[test]
    fn test_lut_input_matrix_parsing() {
        assert_eq!("auto".parse(), Ok(LutInputMatrix::Auto));
        assert_eq!("bt709".parse(), Ok(LutInputMatrix::Bt709));
        assert_eq!("none".parse(), Ok(LutInputMatrix::None));
        assert_eq!(
            "bt2020nc".parse(),
            Ok(LutInputMatrix::Matrix(ColorMatrix::Bt2020nc))
        );
        assert!("xyz".parse::<LutInputMatrix>().is_err());
    }

    #[test]
    fn test_lut_interp_falls_back_to_tetrahedral() {
        assert_eq!(LutInterp::parse_or_default("prism"), LutInterp::Prism);
        assert_eq!(LutInterp::parse_or_default("bicubic"), LutInterp::Tetrahedral);
        let params: EncodingParameters =
            serde_json::from_str(r#"{"lut_interp": "lanczos"}"#).unwrap();
        assert_eq!(params.lut_interp, LutInterp::Tetrahedral);
    }

    #[test]
    fn test_lut_output_tags_keeps_unrecognized_values() {
        assert_eq!(LutOutputTags::from("Inherit"), LutOutputTags::Inherit);
        assert_eq!(LutOutputTags::from(""), LutOutputTags::Bt709);
        let tags = LutOutputTags::from(" Rec2020 ");
        assert_eq!(tags.as_str(), "rec2020");
        assert!(matches!(tags, LutOutputTags::Unrecognized(_)));
    }

    #[test]
    fn test_json_values_are_normalized() {
        let params: EncodingParameters = serde_json::from_str(
            r#"{"video_codec": " libx265 ", "lut_output_tags": " P3 "}"#,
        )
        .unwrap();
        assert_eq!(params.video_codec.as_str(), "libx265");
        assert_eq!(params.lut_output_tags, LutOutputTags::from("p3"));

        let json = serde_json::to_string(&params).unwrap();
        let restored: EncodingParameters = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, params);

        let blank: EncodingParameters =
            serde_json::from_str(r#"{"video_codec": "   "}"#).unwrap();
        assert!(blank.validate().is_err());
    }

    #[test]
    fn test_legacy_preset_with_string_fields() {
        let json = r#"{
            "video_codec": "libx265",
            "pix_fmt": "",
            "bitrate": " 12M ",
            "gop": "48",
            "threads": "",
            "channels": 2,
            "zscale_dither": "ordered"
        }"#;
        let params: EncodingParameters = serde_json::from_str(json).unwrap();
        assert_eq!(params.video_codec.as_str(), "libx265");
        assert_eq!(params.pix_fmt, None);
        assert_eq!(params.bitrate.as_deref(), Some("12M"));
        assert_eq!(params.gop, Some(48));
        assert_eq!(params.threads, None);
        assert_eq!(params.channels, Some(2));
        assert_eq!(params.dither, DitherMode::Ordered);
        assert_eq!(params.audio_codec.as_str(), "aac");
    }

    #[test]
    fn test_validate_rejects_malformed_overrides() {
        let mut params = EncodingParameters::default();
        params.bitrate = Some("lots".to_string());
        assert!(params.validate().is_err());

        let mut params = EncodingParameters::default();
        params.fps = Some("0/0".to_string());
        assert!(params.validate().is_err());

        let mut params = EncodingParameters::default();
        params.resolution = Some("1920x".to_string());
        assert!(params.validate().is_err());

        let mut params = EncodingParameters::default();
        params.resolution = Some("hd1080".to_string());
        assert!(params.validate().is_ok());

        let mut params = EncodingParameters::default();
        params.gop = Some(0);
        assert!(params.validate().is_err());

        let mut params = EncodingParameters::default();
        params.video_codec = Codec::new("  ");
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_codec_capabilities() {
        assert!(Codec::copy().is_copy());
        assert!(Codec::new("libx265").supports_10bit());
        assert!(Codec::new("prores_ks").supports_10bit());
        assert!(!Codec::new("libx264").supports_10bit());
        assert!(Codec::new("h264_videotoolbox").is_videotoolbox());
    }

    fn optional_text() -> impl Strategy<Value = Option<String>> {
        prop::option::of("[a-z0-9:.]{1,12}")
    }

    fn params_strategy() -> impl Strategy<Value = EncodingParameters> {
        let codecs = (
            prop_oneof![Just("libx264"), Just("libx265"), Just("prores_ks"), Just("copy")],
            prop_oneof![Just("aac"), Just("copy"), Just("libopus")],
        );
        let text = (
            optional_text(),
            prop::option::of(Just("1920x1080".to_string())),
            prop::option::of("[1-9][0-9]{0,4}[kMG]?"),
            prop::option::of(Just("30000/1001".to_string())),
            optional_text(),
            optional_text(),
            optional_text(),
            optional_text(),
            optional_text(),
            optional_text(),
        );
        let counts = (
            prop::option::of(1u32..600),
            prop::option::of(0u32..64),
            prop::option::of(8000u32..192000),
            prop::option::of(1u32..8),
        );
        let flags = prop::collection::vec(any::<bool>(), 6);
        let policies = (
            prop_oneof![Just(ProcessingMode::Fast), Just(ProcessingMode::Pro)],
            prop_oneof![
                Just(BitDepthPolicy::Preserve),
                Just(BitDepthPolicy::Force8Bit),
                Just(BitDepthPolicy::Auto)
            ],
            prop_oneof![
                Just(LutInterp::Nearest),
                Just(LutInterp::Trilinear),
                Just(LutInterp::Tetrahedral),
                Just(LutInterp::Cubic)
            ],
            prop_oneof![Just(DitherMode::None), Just(DitherMode::ErrorDiffusion)],
            prop_oneof![
                Just(LutInputMatrix::Auto),
                Just(LutInputMatrix::None),
                Just(LutInputMatrix::Matrix(ColorMatrix::Bt2020nc))
            ],
            prop_oneof![
                Just(LutOutputTags::Bt709),
                Just(LutOutputTags::Inherit),
                Just(LutOutputTags::None),
                "[a-z]{3,8}".prop_map(|s| LutOutputTags::from(s.as_str()))
            ],
        );

        (codecs, text, counts, flags, policies).prop_map(
            |((video, audio), text, counts, flags, policies)| EncodingParameters {
                video_codec: Codec::new(video),
                audio_codec: Codec::new(audio),
                pix_fmt: text.0,
                resolution: text.1,
                bitrate: text.2,
                fps: text.3,
                crf: text.4,
                preset: text.5,
                tune: text.6,
                gop: counts.0,
                profile: text.7,
                level: text.8,
                threads: counts.1,
                audio_bitrate: text.9,
                sample_rate: counts.2,
                channels: counts.3,
                faststart: flags[0],
                overwrite: flags[1],
                generate_cover: flags[2],
                processing_mode: policies.0,
                bit_depth_policy: policies.1,
                force_cfr: flags[3],
                inherit_color_metadata: flags[4],
                lut_interp: policies.2,
                dither: policies.3,
                lut_input_matrix: policies.4,
                lut_output_tags: policies.5,
            },
        )
    }

    // Parameters -> preset JSON -> parameters is field-for-field equal
    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_preset_json_round_trip(params in params_strategy()) {
            let json = serde_json::to_string_pretty(&params).expect("serialize");
            let restored: EncodingParameters = serde_json::from_str(&json).expect("deserialize");
            prop_assert_eq!(restored, params);
        }

        #[test]
        fn prop_lut_output_tags_read_back(text in "[ A-Za-z0-9]{0,10}") {
            let tags = LutOutputTags::from(text.as_str());
            let json = serde_json::to_string(&tags).unwrap();
            let restored: LutOutputTags = serde_json::from_str(&json).unwrap();
            prop_assert_eq!(restored, tags);
        }

        #[test]
        fn prop_bitrate_scale_preserves_unit(value in 1u32..100_000, unit in prop_oneof![Just(""), Just("k"), Just("M"), Just("G")]) {
            let text = format!("{}{}", value, unit);
            let rate = Bitrate::parse(&text).expect("valid bitrate");
            prop_assert_eq!(rate.to_string(), text);
            prop_assert_eq!(rate.scaled(2.0).to_string(), format!("{}{}", value * 2, unit));
        }
    }
}
