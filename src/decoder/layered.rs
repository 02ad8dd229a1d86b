//! Layered image formats (PSD/PSB): flatten visible layers to one
//! composite, then resize.

use std::{fs, path::Path};

use image::{
	imageops::{self, FilterType},
	RgbaImage,
};
use psd::Psd;

use super::{fit_dimensions, PixelBuffer};
use crate::{error::DecodeError, ThumbSize};

pub(crate) fn decode(path: &Path, size: ThumbSize) -> Result<PixelBuffer, DecodeError> {
	let bytes = fs::read(path)?;

	let psd = Psd::from_bytes(&bytes).map_err(|e| DecodeError::Layered(e.to_string()))?;

	// Flattened composite of the visible layers, top of the layer stack down.
	let composite = psd.rgba();

	let flattened = RgbaImage::from_raw(psd.width(), psd.height(), composite)
		.ok_or(DecodeError::InvalidLength)?;

	let (width, height) = flattened.dimensions();
	let (target_w, target_h) = fit_dimensions(width, height, size);

	let flattened = if (target_w, target_h) == (width, height) {
		flattened
	} else {
		imageops::resize(&flattened, target_w, target_h, FilterType::Triangle)
	};

	Ok(PixelBuffer::from_image(flattened))
}
