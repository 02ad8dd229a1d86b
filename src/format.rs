use std::path::Path;

/// Closed set of decoder families. Each family needs a fundamentally
/// different transform before the common resize step, so they stay separate
/// instead of hiding behind one generic decode path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatFamily {
	/// Common 8-bit raster formats, decoded directly by the `image` crate.
	Raster,
	/// High-dynamic-range / high-bit-depth formats that need tone mapping
	/// before they are displayable.
	HighDepth,
	/// Video containers; a single representative frame becomes the preview.
	Video,
	/// Paginated documents; only the first page is rendered.
	Document,
	/// Layered image formats, flattened to a composite.
	Layered,
}

impl FormatFamily {
	/// Resolves a file's family from its extension, once per request.
	/// `None` means we have no decoder for it and the consumer gets the
	/// generic placeholder without any decode work being dispatched.
	#[must_use]
	pub fn from_path(path: impl AsRef<Path>) -> Option<Self> {
		let ext = path.as_ref().extension()?.to_ascii_lowercase();

		Some(match ext.to_str()? {
			"jpg" | "jpeg" | "png" | "gif" | "bmp" | "webp" | "tga" | "tif" | "tiff" | "ico" => {
				Self::Raster
			}
			"exr" | "hdr" => Self::HighDepth,
			"mp4" | "mov" | "avi" | "mkv" | "webm" | "m4v" | "mpg" | "mpeg" | "wmv" | "flv" => {
				Self::Video
			}
			"pdf" => Self::Document,
			"psd" | "psb" => Self::Layered,
			_ => return None,
		})
	}
}
