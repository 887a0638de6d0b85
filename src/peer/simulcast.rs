//! Simulcast layers of the published camera video.

use tandem_sfu_proto::{VideoDimension, VideoLayer, VideoLayerSetting};

use crate::platform::RtpEncoding;

/// Frame size of the full quality layer.
pub const DEFAULT_VIDEO_DIMENSION: VideoDimension = VideoDimension {
    width: 1280,
    height: 720,
};

/// Frame rate of every layer.
const DEFAULT_FPS: u32 = 30;

/// `(rid, max_bitrate, scale_resolution_down_by)` of the full, half and
/// quarter quality layers.
const LAYERS: [(&str, u32, f64); 3] = [
    ("f", 1_000_000, 1.0),
    ("h", 500_000, 2.0),
    ("q", 300_000, 4.0),
];

/// Returns the initial [`RtpEncoding`]s of a simulcast video track, all
/// active.
#[must_use]
pub fn default_encodings() -> Vec<RtpEncoding> {
    LAYERS
        .iter()
        .map(|&(rid, max_bitrate, scale)| RtpEncoding {
            rid: rid.to_owned(),
            active: true,
            max_bitrate,
            scale_resolution_down_by: scale,
        })
        .collect()
}

/// Describes the provided [`RtpEncoding`]s as [`VideoLayer`]s announced to
/// the SFU.
#[must_use]
pub fn video_layers(encodings: &[RtpEncoding]) -> Vec<VideoLayer> {
    encodings
        .iter()
        .map(|enc| {
            let scale = enc.scale_resolution_down_by.max(1.0);
            VideoLayer {
                rid: enc.rid.clone(),
                video_dimension: VideoDimension {
                    width: (f64::from(DEFAULT_VIDEO_DIMENSION.width) / scale)
                        as u32,
                    height: (f64::from(DEFAULT_VIDEO_DIMENSION.height)
                        / scale) as u32,
                },
                bitrate: enc.max_bitrate,
                fps: DEFAULT_FPS,
            }
        })
        .collect()
}

/// Applies the publish quality requested by the SFU to the provided
/// [`RtpEncoding`]s.
///
/// Only the layers whose requested activity differs from the current one are
/// touched. Returns [`None`] if nothing changes.
#[must_use]
pub fn apply_publish_quality(
    current: &[RtpEncoding],
    requested: &[VideoLayerSetting],
) -> Option<Vec<RtpEncoding>> {
    let mut changed = false;
    let encodings = current
        .iter()
        .cloned()
        .map(|mut enc| {
            if let Some(layer) = requested.iter().find(|l| l.name == enc.rid) {
                if layer.active != enc.active {
                    enc.active = layer.active;
                    changed = true;
                }
            }
            enc
        })
        .collect();
    if changed {
        Some(encodings)
    } else {
        None
    }
}
