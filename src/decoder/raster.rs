//! Standard 8-bit raster formats: straight decode and resize.

use std::path::Path;

use image::imageops::{self, FilterType};

use super::{fit_dimensions, PixelBuffer};
use crate::{error::DecodeError, ThumbSize};

pub(crate) fn decode(path: &Path, size: ThumbSize) -> Result<PixelBuffer, DecodeError> {
	let rgba = image::open(path)?.to_rgba8();

	let (width, height) = rgba.dimensions();
	let (target_w, target_h) = fit_dimensions(width, height, size);

	let rgba = if (target_w, target_h) == (width, height) {
		rgba
	} else {
		imageops::resize(&rgba, target_w, target_h, FilterType::Triangle)
	};

	Ok(PixelBuffer::from_image(rgba))
}
