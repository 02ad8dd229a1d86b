//! High-dynamic-range formats (OpenEXR, Radiance RGBE).
//!
//! A naive 8-bit decode of these produces washed-out or clipped previews, so
//! the pipeline here is: decode to linear float samples, resize in float,
//! apply exposure compensation, compress to displayable range with the ACES
//! filmic fit, then gamma-encode to 8-bit.

use std::path::Path;

use image::{
	imageops::{self, FilterType},
	Rgba, RgbaImage,
};

use super::{fit_dimensions, PixelBuffer};
use crate::{error::DecodeError, ThumbSize};

/// ACES filmic tone mapping curve (Stephen Hill's fit), the same transform
/// the preview panel applies, so thumbnails and previews agree.
fn aces_filmic(x: f32) -> f32 {
	const A: f32 = 2.51;
	const B: f32 = 0.03;
	const C: f32 = 2.43;
	const D: f32 = 0.59;
	const E: f32 = 0.14;

	((x * (A * x + B)) / (x * (C * x + D) + E)).clamp(0.0, 1.0)
}

const INV_GAMMA: f32 = 1.0 / 2.2;

pub(crate) fn decode(
	path: &Path,
	size: ThumbSize,
	exposure_stops: f32,
) -> Result<PixelBuffer, DecodeError> {
	let linear = image::open(path)?.to_rgb32f();

	let (width, height) = linear.dimensions();
	let (target_w, target_h) = fit_dimensions(width, height, size);

	// Resize while still linear; scaling tone-mapped pixels would shift hues.
	let linear = if (target_w, target_h) == (width, height) {
		linear
	} else {
		imageops::resize(&linear, target_w, target_h, FilterType::Triangle)
	};

	// Exposure in stops, like a render view: each stop doubles brightness.
	let exposure_multiplier = 2.0_f32.powf(exposure_stops);

	#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
	let display = RgbaImage::from_fn(target_w, target_h, |x, y| {
		let px = linear.get_pixel(x, y);
		let map = |channel: f32| {
			(aces_filmic(channel * exposure_multiplier).powf(INV_GAMMA) * 255.0).round() as u8
		};
		Rgba([map(px[0]), map(px[1]), map(px[2]), 255])
	});

	Ok(PixelBuffer::from_image(display))
}
