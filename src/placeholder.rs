//! Deterministic fallback bitmaps.
//!
//! A failed or unsupported thumbnail is never a broken-image glyph; it is a
//! format-colored gradient tile, so the grid only ever looks "not yet
//! illustrated". Protected documents get their own fixed scheme so the UI
//! can tell "locked" apart from "broken".

use std::path::Path;

use image::{Rgba, RgbaImage};

use crate::ThumbSize;

/// Category of fallback delivered to the consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderKind {
	/// No decoder exists for this format family (3D scenes, scripts, ...).
	Unsupported,
	/// A decoder exists but the file could not be decoded.
	Corrupt,
	/// The document refused to open without credentials.
	Protected,
}

/// Scheme used for password-protected documents regardless of extension.
const PROTECTED_COLORS: (Rgba<u8>, Rgba<u8>) =
	(Rgba([90, 90, 105, 255]), Rgba([150, 150, 170, 255]));

const FALLBACK_COLORS: (Rgba<u8>, Rgba<u8>) =
	(Rgba([100, 100, 100, 255]), Rgba([150, 150, 150, 255]));

/// Gradient color pairs per extension; the palette the asset browser has
/// always used for its un-thumbnailable formats.
fn colors_for_extension(ext: &str) -> (Rgba<u8>, Rgba<u8>) {
	let (top, bottom) = match ext {
		"ma" => ([70, 130, 220], [100, 170, 255]),
		"mb" => ([50, 100, 180], [80, 140, 220]),
		"obj" | "dae" | "stl" => ([150, 80, 150], [200, 130, 200]),
		"fbx" => ([200, 180, 60], [255, 220, 100]),
		"abc" => ([80, 150, 80], [120, 200, 120]),
		"usd" => ([200, 80, 80], [255, 120, 120]),
		"hda" => ([180, 100, 60], [220, 140, 100]),
		"blend" => ([50, 120, 200], [80, 160, 240]),
		"sbsar" => ([220, 120, 40], [255, 160, 80]),
		"tif" | "tiff" => ([100, 180, 220], [140, 210, 255]),
		"jpg" | "jpeg" => ([220, 180, 100], [255, 210, 140]),
		"png" => ([180, 220, 180], [210, 255, 210]),
		"hdr" => ([255, 200, 100], [255, 230, 150]),
		"exr" => ([220, 140, 220], [255, 180, 255]),
		"tga" => ([180, 180, 220], [210, 210, 255]),
		"psd" | "psb" => ([60, 100, 190], [110, 160, 240]),
		"pdf" => ([200, 50, 50], [255, 100, 100]),
		"py" => ([60, 120, 180], [100, 160, 220]),
		"mel" => ([70, 160, 100], [100, 200, 140]),
		"txt" => ([160, 160, 160], [200, 200, 200]),
		_ => return FALLBACK_COLORS,
	};

	(
		Rgba([top[0], top[1], top[2], 255]),
		Rgba([bottom[0], bottom[1], bottom[2], 255]),
	)
}

/// Renders the placeholder for `path`: a top-to-bottom gradient in the
/// extension's colors with a darkened border. Pure function of its inputs,
/// so the same file always gets the same tile.
#[must_use]
pub fn placeholder(path: impl AsRef<Path>, kind: PlaceholderKind, size: ThumbSize) -> RgbaImage {
	let (top, bottom) = if kind == PlaceholderKind::Protected {
		PROTECTED_COLORS
	} else {
		path.as_ref()
			.extension()
			.and_then(|ext| ext.to_str())
			.map(str::to_ascii_lowercase)
			.map_or(FALLBACK_COLORS, |ext| colors_for_extension(&ext))
	};

	let width = size.width.max(1);
	let height = size.height.max(1);

	let mut image = RgbaImage::from_fn(width, height, |_, y| {
		let t = if height > 1 {
			f64::from(y) / f64::from(height - 1)
		} else {
			0.0
		};
		lerp(top, bottom, t)
	});

	// 2px darkened border so tiles read as tiles even on matching backdrops
	let border = 2.min(width).min(height);
	for y in 0..height {
		for x in 0..width {
			if x < border || y < border || x >= width - border || y >= height - border {
				let px = image.get_pixel_mut(x, y);
				px[0] = (u16::from(px[0]) * 3 / 4) as u8;
				px[1] = (u16::from(px[1]) * 3 / 4) as u8;
				px[2] = (u16::from(px[2]) * 3 / 4) as u8;
			}
		}
	}

	image
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn lerp(a: Rgba<u8>, b: Rgba<u8>, t: f64) -> Rgba<u8> {
	let mix = |x: u8, y: u8| (f64::from(x) + (f64::from(y) - f64::from(x)) * t).round() as u8;
	Rgba([mix(a[0], b[0]), mix(a[1], b[1]), mix(a[2], b[2]), 255])
}

#[cfg(test)]
mod tests {
	use super::*;

	const SIZE: ThumbSize = ThumbSize {
		width: 128,
		height: 128,
	};

	#[test]
	fn placeholder_is_deterministic() {
		let a = placeholder("/assets/rig.ma", PlaceholderKind::Unsupported, SIZE);
		let b = placeholder("/assets/rig.ma", PlaceholderKind::Unsupported, SIZE);
		assert_eq!(a.as_raw(), b.as_raw());
	}

	#[test]
	fn protected_differs_from_corrupt_for_same_file() {
		let protected = placeholder("/docs/manual.pdf", PlaceholderKind::Protected, SIZE);
		let corrupt = placeholder("/docs/manual.pdf", PlaceholderKind::Corrupt, SIZE);
		assert_ne!(protected.as_raw(), corrupt.as_raw());
	}

	#[test]
	fn different_formats_get_different_tiles() {
		let ma = placeholder("/a/rig.ma", PlaceholderKind::Unsupported, SIZE);
		let fbx = placeholder("/a/rig.fbx", PlaceholderKind::Unsupported, SIZE);
		assert_ne!(ma.as_raw(), fbx.as_raw());
	}

	#[test]
	fn requested_dimensions_are_honored() {
		let tile = placeholder(
			"/a/clip.mp4",
			PlaceholderKind::Corrupt,
			ThumbSize {
				width: 200,
				height: 150,
			},
		);
		assert_eq!(tile.dimensions(), (200, 150));
	}
}
