//! Paginated documents, rendered through pdfium.
//!
//! Only the first page becomes the preview. Pdfium is bound lazily and
//! optionally at runtime; on hosts without the library every document simply
//! decodes to the placeholder instead of failing the whole pipeline.

use std::path::Path;

use image::imageops::{self, FilterType};
use once_cell::sync::Lazy;
use pdfium_render::prelude::*;
use tracing::error;

use super::{fit_dimensions, PixelBuffer};
use crate::{error::DecodeError, ThumbSize};

static PDFIUM: Lazy<Option<Pdfium>> = Lazy::new(|| {
	Pdfium::bind_to_system_library()
		.map(Pdfium::new)
		.map_err(|e| error!("Failed to bind pdfium: {e:#?}"))
		.ok()
});

pub(crate) fn decode(path: &Path, size: ThumbSize) -> Result<PixelBuffer, DecodeError> {
	let pdfium = PDFIUM.as_ref().ok_or(DecodeError::PdfiumBinding)?;

	let document = pdfium
		.load_pdf_from_file(path, None)
		.map_err(map_pdfium_error)?;

	#[allow(clippy::cast_possible_wrap)]
	let render_config = PdfRenderConfig::new()
		.set_target_width(size.width as i32)
		.set_maximum_height(size.height as i32)
		.rotate_if_landscape(PdfPageRenderRotation::Degrees90, true);

	let page_image = document
		.pages()
		.first()
		.map_err(map_pdfium_error)?
		.render_with_config(&render_config)
		.map_err(map_pdfium_error)?
		.as_image()
		.to_rgba8();

	let (width, height) = page_image.dimensions();
	let (target_w, target_h) = fit_dimensions(width, height, size);

	let page_image = if (target_w, target_h) == (width, height) {
		page_image
	} else {
		imageops::resize(&page_image, target_w, target_h, FilterType::Triangle)
	};

	Ok(PixelBuffer::from_image(page_image))
}

/// A password-protected document is a distinguished outcome, not a decode
/// failure; the consumer shows a "locked" tile, not a "broken" one.
fn map_pdfium_error(e: PdfiumError) -> DecodeError {
	match e {
		PdfiumError::PdfiumLibraryInternalError(PdfiumInternalError::PasswordError) => {
			DecodeError::Protected
		}
		other => DecodeError::Document(format!("{other:?}")),
	}
}
