//! Policy resolvers.
//!
//! Each resolver settles one encoding decision from the user parameters and the
//! (optional) source descriptor. They are pure: no I/O, no mutation of inputs, and
//! every decision carries the rationale note the synthesizer records for it.

use crate::probe::SourceDescriptor;
use lut_renderer_config::{
    BitDepthPolicy, Bitrate, ColorMatrix, EncodingParameters, LutInputMatrix, LutOutputTags,
};

/// Pixel format written by the mastering codec for 10-bit sources.
pub const MASTER_10BIT_PIX_FMT: &str = "yuv422p10le";
/// Pixel format for 10-bit delivery codecs.
pub const DELIVERY_10BIT_PIX_FMT: &str = "yuv420p10le";
/// 8-bit 4:2:0, the universal fallback.
pub const FALLBACK_8BIT_PIX_FMT: &str = "yuv420p";

/// Bitrate at which VideoToolbox encoders get a caution note.
const VIDEOTOOLBOX_CAUTION_KBPS: f64 = 50_000.0;

/// Frame timing applied to the output.
#[derive(Debug, Clone, PartialEq)]
pub enum TimingMode {
    /// `-fps_mode cfr`, with `-r <rate>` when a rate is known.
    Cfr { rate: Option<String> },
    /// `-fps_mode passthrough`: timestamps are left alone.
    Passthrough,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimingDecision {
    pub mode: TimingMode,
    /// Frame rate the output will run at, used for GOP derivation.
    pub output_fps: Option<f64>,
    pub note: String,
}

/// Resolve the output timing mode.
///
/// Timestamps are only rewritten when the user asks for a rate, when the source is
/// known to be VFR and CFR is forced, or when CFR is forced and nothing is known
/// about the source.
pub fn resolve_timing(
    params: &EncodingParameters,
    source: Option<&SourceDescriptor>,
) -> TimingDecision {
    if let Some(fps) = &params.fps {
        return TimingDecision {
            mode: TimingMode::Cfr {
                rate: Some(fps.clone()),
            },
            output_fps: params.parsed_fps(),
            note: format!("timing: fps_mode=cfr, output rate {}", fps),
        };
    }

    let source_fps = source.and_then(|s| s.fps);
    let source_is_vfr = source.is_some_and(|s| s.is_variable_frame_rate);

    if source_is_vfr && params.force_cfr {
        let nominal = source.and_then(|s| s.nominal_fps.or(s.fps));
        return match nominal {
            Some(rate) => {
                let text = format_rate(rate);
                TimingDecision {
                    note: format!("timing: source is VFR, forced CFR at {}", text),
                    mode: TimingMode::Cfr { rate: Some(text) },
                    output_fps: Some(rate),
                }
            }
            None => TimingDecision {
                mode: TimingMode::Cfr { rate: None },
                output_fps: None,
                note: "timing: source is VFR, forced CFR (rate unknown)".to_string(),
            },
        };
    }

    if params.force_cfr && source.is_none() {
        return TimingDecision {
            mode: TimingMode::Cfr { rate: None },
            output_fps: None,
            note: "timing: fps_mode=cfr (source not probed)".to_string(),
        };
    }

    let note = if source_is_vfr {
        "timing: source is VFR, fps_mode=passthrough (timestamps kept)"
    } else {
        "timing: source is CFR or unknown, fps_mode=passthrough"
    };
    TimingDecision {
        mode: TimingMode::Passthrough,
        output_fps: source_fps,
        note: note.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct PixelFormatDecision {
    pub pix_fmt: Option<String>,
    pub note: Option<String>,
}

/// Resolve the output pixel format from the bit-depth policy.
///
/// `force_8bit` always wins. Otherwise a manual pixel format wins, and without one a
/// 10-bit source keeps 10 bits when the codec can encode them.
pub fn resolve_pixel_format(
    params: &EncodingParameters,
    source: Option<&SourceDescriptor>,
) -> PixelFormatDecision {
    if params.bit_depth_policy == BitDepthPolicy::Force8Bit {
        let note = (params.pix_fmt.as_deref() != Some(FALLBACK_8BIT_PIX_FMT))
            .then(|| format!("bit depth force_8bit: pix_fmt={}", FALLBACK_8BIT_PIX_FMT));
        return PixelFormatDecision {
            pix_fmt: Some(FALLBACK_8BIT_PIX_FMT.to_string()),
            note,
        };
    }

    if params.pix_fmt.is_some() {
        return PixelFormatDecision {
            pix_fmt: params.pix_fmt.clone(),
            note: None,
        };
    }

    let deep_source = source
        .and_then(|s| s.bit_depth)
        .is_some_and(|depth| depth >= 10);
    if !deep_source {
        return PixelFormatDecision::default();
    }

    let codec = &params.video_codec;
    if codec.supports_10bit() {
        let pix_fmt = if codec.as_str() == "prores_ks" {
            MASTER_10BIT_PIX_FMT
        } else {
            DELIVERY_10BIT_PIX_FMT
        };
        PixelFormatDecision {
            pix_fmt: Some(pix_fmt.to_string()),
            note: Some(format!("bit depth preserve: 10-bit source, pix_fmt={}", pix_fmt)),
        }
    } else {
        PixelFormatDecision {
            pix_fmt: Some(FALLBACK_8BIT_PIX_FMT.to_string()),
            note: Some(format!(
                "bit depth preserve: {} cannot encode 10-bit, falling back to {}",
                codec, FALLBACK_8BIT_PIX_FMT
            )),
        }
    }
}

/// Resolve the YUV<->RGB matrix forced in front of the LUT, if any.
pub fn resolve_lut_input_matrix(
    policy: LutInputMatrix,
    source: Option<&SourceDescriptor>,
) -> Option<ColorMatrix> {
    match policy {
        LutInputMatrix::Bt709 => Some(ColorMatrix::Bt709),
        LutInputMatrix::Auto => source
            .and_then(|s| s.color_space.as_deref())
            .and_then(|tag| ColorMatrix::from_tag(&tag.to_ascii_lowercase())),
        LutInputMatrix::None => None,
        LutInputMatrix::Matrix(matrix) => Some(matrix),
    }
}

/// Range remap applied to full-range sources before the LUT.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeNormalization {
    /// Target range for `scale=in_range=pc:out_range=...`.
    pub out_range: String,
    /// Non-legacy pixel format with the source's chroma subsampling.
    pub intermediate_pix_fmt: &'static str,
}

/// Resolve range normalization for a full-range source.
///
/// The inherit branch reads the source's own range tag, as probed.
pub fn resolve_range_normalization(
    tags: &LutOutputTags,
    source: Option<&SourceDescriptor>,
) -> Option<RangeNormalization> {
    let source = source.filter(|s| s.is_full_range())?;

    let out_range = match tags {
        LutOutputTags::Bt709 | LutOutputTags::Unrecognized(_) => "tv".to_string(),
        LutOutputTags::Inherit => source
            .color_range
            .as_deref()
            .map(|range| range.trim().to_ascii_lowercase())
            .filter(|range| !range.is_empty())
            .unwrap_or_else(|| "pc".to_string()),
        LutOutputTags::None => "pc".to_string(),
    };

    let pix_fmt = source.pix_fmt.as_deref().unwrap_or("");
    let intermediate_pix_fmt = if pix_fmt.contains("444") {
        "yuv444p"
    } else if pix_fmt.contains("422") {
        "yuv422p"
    } else {
        "yuv420p"
    };

    Some(RangeNormalization {
        out_range,
        intermediate_pix_fmt,
    })
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ColorTagDecision {
    /// `(flag, value)` pairs in emission order.
    pub tags: Vec<(&'static str, String)>,
    pub note: Option<String>,
}

/// Resolve the color tags written on the output.
///
/// With a LUT the output-tagging policy decides; an unrecognized policy value is
/// tagged as Rec.709. Without a LUT the source tags are inherited when allowed.
pub fn resolve_output_tags(
    params: &EncodingParameters,
    lut_applied: bool,
    source: Option<&SourceDescriptor>,
) -> ColorTagDecision {
    if !lut_applied {
        return inherited_tags(params, source);
    }

    match &params.lut_output_tags {
        LutOutputTags::Bt709 => rec709_tags("LUT output tags: bt709/bt709/bt709, range=tv".to_string()),
        LutOutputTags::Unrecognized(value) => rec709_tags(format!(
            "LUT output tags: bt709/bt709/bt709, range=tv (fallback for '{}')",
            value
        )),
        LutOutputTags::Inherit => inherited_tags(params, source),
        LutOutputTags::None => ColorTagDecision {
            tags: Vec::new(),
            note: Some("LUT output tags: none (no color metadata written)".to_string()),
        },
    }
}

fn rec709_tags(note: String) -> ColorTagDecision {
    ColorTagDecision {
        tags: vec![
            ("-color_primaries", "bt709".to_string()),
            ("-color_trc", "bt709".to_string()),
            ("-colorspace", "bt709".to_string()),
            ("-color_range", "tv".to_string()),
        ],
        note: Some(note),
    }
}

fn inherited_tags(
    params: &EncodingParameters,
    source: Option<&SourceDescriptor>,
) -> ColorTagDecision {
    let source = match source {
        Some(source) if params.inherit_color_metadata => source,
        _ => return ColorTagDecision::default(),
    };

    let candidates = [
        ("-color_primaries", "primaries", &source.color_primaries),
        ("-color_trc", "trc", &source.color_transfer),
        ("-colorspace", "colorspace", &source.color_space),
        ("-color_range", "range", &source.color_range),
    ];

    let mut decision = ColorTagDecision::default();
    let mut items = Vec::new();
    for (flag, label, value) in candidates {
        if let Some(value) = value {
            decision.tags.push((flag, value.clone()));
            items.push(format!("{}={}", label, value));
        }
    }
    if !items.is_empty() {
        decision.note = Some(format!("inherited color metadata: {}", items.join(", ")));
    }
    decision
}

#[derive(Debug, Clone, PartialEq)]
pub struct GopDecision {
    pub gop: u32,
    /// Present only for derived values.
    pub note: Option<String>,
}

/// Resolve the keyframe interval: explicit value, else one second of frames.
pub fn resolve_gop(params: &EncodingParameters, output_fps: Option<f64>) -> Option<GopDecision> {
    if let Some(gop) = params.gop {
        return Some(GopDecision { gop, note: None });
    }
    let fps = output_fps.filter(|fps| *fps > 0.0)?;
    let gop = (fps.round() as u32).max(1);
    Some(GopDecision {
        gop,
        note: Some(format!("auto GOP={} (fps={})", gop, format_rate(fps))),
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct RateControlDecision {
    pub bitrate: String,
    /// `(maxrate, bufsize)`, absent when the bitrate cannot be parsed.
    pub vbv: Option<(String, String)>,
    pub note: Option<String>,
}

/// Resolve the bitrate safety net: maxrate equal to the bitrate, bufsize twice it.
pub fn resolve_rate_control(params: &EncodingParameters) -> Option<RateControlDecision> {
    let bitrate = params.bitrate.clone()?;
    let vbv = Bitrate::parse(&bitrate).map(|rate| (bitrate.clone(), rate.scaled(2.0).to_string()));
    let note = vbv
        .as_ref()
        .map(|(maxrate, bufsize)| format!("rate control: maxrate={}, bufsize={}", maxrate, bufsize));
    Some(RateControlDecision { bitrate, vbv, note })
}

/// Caution for VideoToolbox encoders driven at very high bitrates.
pub fn hardware_caution(
    params: &EncodingParameters,
    source: Option<&SourceDescriptor>,
) -> Option<String> {
    if !params.video_codec.is_videotoolbox() {
        return None;
    }
    let candidate = params
        .bitrate
        .as_deref()
        .or_else(|| source.and_then(|s| s.bitrate.as_deref()))?;
    let kbps = Bitrate::parse(candidate)?.as_kbps()?;
    (kbps >= VIDEOTOOLBOX_CAUTION_KBPS).then(|| {
        format!(
            "caution: {} at {} may show PTS reordering judder; libx264 or the pro pipeline is steadier",
            params.video_codec, candidate
        )
    })
}

/// Format a frame rate with at most three decimals and no trailing zeros.
pub fn format_rate(value: f64) -> String {
    let text = format!("{:.3}", value);
    text.trim_end_matches('0').trim_end_matches('.').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use lut_renderer_config::Codec;
    use proptest::prelude::*;

    fn cfr_source() -> SourceDescriptor {
        SourceDescriptor {
            width: Some(1920),
            height: Some(1080),
            bitrate: Some("20000k".to_string()),
            fps: Some(30000.0 / 1001.0),
            avg_fps: Some(30000.0 / 1001.0),
            nominal_fps: Some(30000.0 / 1001.0),
            pix_fmt: Some("yuv420p10le".to_string()),
            bit_depth: Some(10),
            color_space: Some("bt709".to_string()),
            ..SourceDescriptor::default()
        }
    }

    fn vfr_source() -> SourceDescriptor {
        SourceDescriptor {
            fps: Some(27.3),
            avg_fps: Some(27.3),
            nominal_fps: Some(30.0),
            is_variable_frame_rate: true,
            ..cfr_source()
        }
    }

    #[test]
    fn test_timing_explicit_fps_wins() {
        let params = EncodingParameters {
            fps: Some("24000/1001".to_string()),
            ..EncodingParameters::default()
        };
        let timing = resolve_timing(&params, Some(&vfr_source()));
        assert_eq!(
            timing.mode,
            TimingMode::Cfr {
                rate: Some("24000/1001".to_string())
            }
        );
        assert!((timing.output_fps.unwrap() - 23.976).abs() < 0.001);
    }

    #[test]
    fn test_timing_vfr_forced_to_nominal_rate() {
        let timing = resolve_timing(&EncodingParameters::default(), Some(&vfr_source()));
        assert_eq!(
            timing.mode,
            TimingMode::Cfr {
                rate: Some("30".to_string())
            }
        );
        assert_eq!(timing.output_fps, Some(30.0));

        let unknown_rate = SourceDescriptor {
            fps: None,
            nominal_fps: None,
            ..vfr_source()
        };
        let timing = resolve_timing(&EncodingParameters::default(), Some(&unknown_rate));
        assert_eq!(timing.mode, TimingMode::Cfr { rate: None });
    }

    #[test]
    fn test_timing_without_source_is_conservative_cfr() {
        let timing = resolve_timing(&EncodingParameters::default(), None);
        assert_eq!(timing.mode, TimingMode::Cfr { rate: None });

        let params = EncodingParameters {
            force_cfr: false,
            ..EncodingParameters::default()
        };
        assert_eq!(resolve_timing(&params, None).mode, TimingMode::Passthrough);
    }

    #[test]
    fn test_timing_passthrough_for_cfr_and_unforced_vfr() {
        let timing = resolve_timing(&EncodingParameters::default(), Some(&cfr_source()));
        assert_eq!(timing.mode, TimingMode::Passthrough);
        assert!((timing.output_fps.unwrap() - 29.97).abs() < 0.01);

        let params = EncodingParameters {
            force_cfr: false,
            ..EncodingParameters::default()
        };
        let timing = resolve_timing(&params, Some(&vfr_source()));
        assert_eq!(timing.mode, TimingMode::Passthrough);
        assert!(timing.note.contains("VFR"));
    }

    #[test]
    fn test_pixel_format_rules() {
        let source = cfr_source();

        let x265 = EncodingParameters {
            video_codec: Codec::new("libx265"),
            ..EncodingParameters::default()
        };
        assert_eq!(
            resolve_pixel_format(&x265, Some(&source)).pix_fmt.as_deref(),
            Some("yuv420p10le")
        );

        let prores = EncodingParameters {
            video_codec: Codec::new("prores_ks"),
            ..EncodingParameters::default()
        };
        assert_eq!(
            resolve_pixel_format(&prores, Some(&source)).pix_fmt.as_deref(),
            Some("yuv422p10le")
        );

        let x264 = EncodingParameters::default();
        let decision = resolve_pixel_format(&x264, Some(&source));
        assert_eq!(decision.pix_fmt.as_deref(), Some("yuv420p"));
        assert!(decision.note.unwrap().contains("falling back"));

        let manual = EncodingParameters {
            pix_fmt: Some("yuv444p".to_string()),
            ..EncodingParameters::default()
        };
        assert_eq!(
            resolve_pixel_format(&manual, Some(&source)).pix_fmt.as_deref(),
            Some("yuv444p")
        );

        let forced = EncodingParameters {
            pix_fmt: Some("yuv444p".to_string()),
            bit_depth_policy: BitDepthPolicy::Force8Bit,
            ..EncodingParameters::default()
        };
        assert_eq!(
            resolve_pixel_format(&forced, Some(&source)).pix_fmt.as_deref(),
            Some("yuv420p")
        );

        let eight_bit = SourceDescriptor {
            bit_depth: Some(8),
            ..cfr_source()
        };
        assert_eq!(resolve_pixel_format(&x265, Some(&eight_bit)).pix_fmt, None);
        assert_eq!(resolve_pixel_format(&x265, None).pix_fmt, None);
    }

    #[test]
    fn test_lut_input_matrix() {
        let source = SourceDescriptor {
            color_space: Some("BT2020NC".to_string()),
            ..SourceDescriptor::default()
        };
        assert_eq!(
            resolve_lut_input_matrix(LutInputMatrix::Auto, Some(&source)),
            Some(ColorMatrix::Bt2020nc)
        );
        assert_eq!(
            resolve_lut_input_matrix(LutInputMatrix::Bt709, None),
            Some(ColorMatrix::Bt709)
        );
        assert_eq!(resolve_lut_input_matrix(LutInputMatrix::None, Some(&source)), None);

        let odd = SourceDescriptor {
            color_space: Some("ycgco".to_string()),
            ..SourceDescriptor::default()
        };
        assert_eq!(resolve_lut_input_matrix(LutInputMatrix::Auto, Some(&odd)), None);
    }

    #[test]
    fn test_range_normalization() {
        let jpeg = SourceDescriptor {
            pix_fmt: Some("yuvj422p".to_string()),
            color_range: Some("pc".to_string()),
            ..SourceDescriptor::default()
        };
        let norm = resolve_range_normalization(&LutOutputTags::Bt709, Some(&jpeg)).unwrap();
        assert_eq!(norm.out_range, "tv");
        assert_eq!(norm.intermediate_pix_fmt, "yuv422p");

        let norm = resolve_range_normalization(&LutOutputTags::Inherit, Some(&jpeg)).unwrap();
        assert_eq!(norm.out_range, "pc");

        let norm = resolve_range_normalization(&LutOutputTags::None, Some(&jpeg)).unwrap();
        assert_eq!(norm.out_range, "pc");

        let limited = SourceDescriptor {
            pix_fmt: Some("yuv420p".to_string()),
            color_range: Some("tv".to_string()),
            ..SourceDescriptor::default()
        };
        assert!(resolve_range_normalization(&LutOutputTags::Bt709, Some(&limited)).is_none());
        assert!(resolve_range_normalization(&LutOutputTags::Bt709, None).is_none());
    }

    #[test]
    fn test_output_tags_inherit_respects_flag() {
        let source = SourceDescriptor {
            color_primaries: Some("bt2020".to_string()),
            color_range: Some("tv".to_string()),
            ..SourceDescriptor::default()
        };
        let params = EncodingParameters {
            lut_output_tags: LutOutputTags::Inherit,
            ..EncodingParameters::default()
        };
        let decision = resolve_output_tags(&params, true, Some(&source));
        assert_eq!(
            decision.tags,
            vec![
                ("-color_primaries", "bt2020".to_string()),
                ("-color_range", "tv".to_string())
            ]
        );

        let params = EncodingParameters {
            inherit_color_metadata: false,
            ..params
        };
        assert!(resolve_output_tags(&params, true, Some(&source)).tags.is_empty());
        assert!(resolve_output_tags(&params, false, Some(&source)).tags.is_empty());
    }

    #[test]
    fn test_gop_and_rate_control() {
        let params = EncodingParameters::default();
        assert_eq!(resolve_gop(&params, Some(29.97)).unwrap().gop, 30);
        assert_eq!(resolve_gop(&params, Some(0.3)).unwrap().gop, 1);
        assert_eq!(resolve_gop(&params, None), None);

        let params = EncodingParameters {
            gop: Some(250),
            bitrate: Some("6M".to_string()),
            ..EncodingParameters::default()
        };
        let gop = resolve_gop(&params, Some(25.0)).unwrap();
        assert_eq!(gop.gop, 250);
        assert_eq!(gop.note, None);

        let rate = resolve_rate_control(&params).unwrap();
        assert_eq!(rate.vbv, Some(("6M".to_string(), "12M".to_string())));
        assert!(resolve_rate_control(&EncodingParameters::default()).is_none());
    }

    #[test]
    fn test_hardware_caution_threshold() {
        let params = EncodingParameters {
            video_codec: Codec::new("h264_videotoolbox"),
            bitrate: Some("60M".to_string()),
            ..EncodingParameters::default()
        };
        assert!(hardware_caution(&params, None).is_some());

        let params = EncodingParameters {
            bitrate: None,
            ..params
        };
        let heavy = SourceDescriptor {
            bitrate: Some("80000k".to_string()),
            ..SourceDescriptor::default()
        };
        assert!(hardware_caution(&params, Some(&heavy)).is_some());
        assert!(hardware_caution(&params, Some(&cfr_source())).is_none());
        assert!(hardware_caution(&EncodingParameters::default(), Some(&heavy)).is_none());
    }

    #[test]
    fn test_format_rate() {
        assert_eq!(format_rate(30.0), "30");
        assert_eq!(format_rate(30000.0 / 1001.0), "29.97");
        assert_eq!(format_rate(23.976), "23.976");
        assert_eq!(format_rate(12.5), "12.5");
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_unrecognized_output_policy_tags_rec709(policy in "[a-z0-9]{3,10}") {
            prop_assume!(!matches!(policy.as_str(), "bt709" | "inherit" | "none"));
            let params = EncodingParameters {
                lut_output_tags: LutOutputTags::from(policy.as_str()),
                ..EncodingParameters::default()
            };
            let decision = resolve_output_tags(&params, true, Some(&cfr_source()));
            prop_assert_eq!(decision.tags.len(), 4);
            prop_assert!(decision.tags.iter().any(|(flag, v)| *flag == "-color_range" && v == "tv"));
        }

        #[test]
        fn prop_derived_gop_is_at_least_one(fps in 0.01f64..240.0) {
            let gop = resolve_gop(&EncodingParameters::default(), Some(fps)).unwrap();
            prop_assert!(gop.gop >= 1);
            prop_assert!((gop.gop as f64 - fps).abs() <= 0.5 || gop.gop == 1);
        }
    }
}
