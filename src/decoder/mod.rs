//! One decoding strategy per format family.
//!
//! Every decoder shares the same shape: read the source file, do whatever
//! family-specific transform it needs (tone mapping, frame extraction, page
//! rasterization, layer flattening), then scale to fit the target box.
//! Output is a raw RGBA8 pixel buffer, never a toolkit bitmap: bitmap
//! construction belongs to the coordinator task alone.

use std::{panic, path::Path};

use image::RgbaImage;

use crate::{error::DecodeError, format::FormatFamily, ThumbSize};

pub(crate) mod document;
pub(crate) mod hdr;
pub(crate) mod layered;
pub(crate) mod raster;
#[cfg(feature = "ffmpeg")]
pub(crate) mod video;

/// Raw RGBA8 pixels as handed across the worker/coordinator boundary.
#[derive(Debug)]
pub(crate) struct PixelBuffer {
	pub width: u32,
	pub height: u32,
	pub data: Vec<u8>,
}

impl PixelBuffer {
	pub(crate) fn from_image(image: RgbaImage) -> Self {
		let (width, height) = image.dimensions();
		Self {
			width,
			height,
			data: image.into_raw(),
		}
	}

	pub(crate) fn into_image(self) -> Result<RgbaImage, DecodeError> {
		RgbaImage::from_raw(self.width, self.height, self.data)
			.ok_or(DecodeError::InvalidLength)
	}
}

/// Scales `(width, height)` to fit inside the target box, preserving aspect
/// ratio and never upscaling. Always at least 1x1.
pub(crate) fn fit_dimensions(width: u32, height: u32, size: ThumbSize) -> (u32, u32) {
	if width == 0 || height == 0 {
		return (1, 1);
	}

	let scale = f64::from(size.width) / f64::from(width);
	let scale = scale.min(f64::from(size.height) / f64::from(height));
	let scale = scale.min(1.0);

	#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
	(
		((f64::from(width) * scale).round() as u32).max(1),
		((f64::from(height) * scale).round() as u32).max(1),
	)
}

/// Dispatches to the family's decoder. A panic inside third-party decode
/// code is contained here and surfaced as a typed error like any other
/// decode failure.
pub(crate) fn decode(
	path: &Path,
	family: FormatFamily,
	size: ThumbSize,
	hdr_exposure: f32,
) -> Result<PixelBuffer, DecodeError> {
	panic::catch_unwind(panic::AssertUnwindSafe(|| match family {
		FormatFamily::Raster => raster::decode(path, size),
		FormatFamily::HighDepth => hdr::decode(path, size, hdr_exposure),
		FormatFamily::Document => document::decode(path, size),
		FormatFamily::Layered => layered::decode(path, size),
		#[cfg(feature = "ffmpeg")]
		FormatFamily::Video => video::decode(path, size),
		#[cfg(not(feature = "ffmpeg"))]
		FormatFamily::Video => Err(DecodeError::Unsupported),
	}))
	.unwrap_or_else(|panic_payload| {
		let reason = panic_payload
			.downcast_ref::<&str>()
			.map(ToString::to_string)
			.or_else(|| panic_payload.downcast_ref::<String>().cloned())
			.unwrap_or_else(|| String::from("internal panic in third party decoder"));

		Err(DecodeError::Panic(reason))
	})
}
