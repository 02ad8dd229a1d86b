use std::{io, path::Path};

use thiserror::Error;

/// Pairs a filesystem error with the path it happened on, so log lines and
/// error chains always say *which* file misbehaved.
#[derive(Error, Debug)]
#[error("I/O error at '{}': {source}", .path.display())]
pub struct FileIOError {
	pub path: Box<Path>,
	#[source]
	pub source: io::Error,
}

impl<P: AsRef<Path>> From<(P, io::Error)> for FileIOError {
	fn from((path, source): (P, io::Error)) -> Self {
		Self {
			path: path.as_ref().into(),
			source,
		}
	}
}

#[derive(Error, Debug)]
pub enum ThumbnailerError {
	#[error(transparent)]
	FileIO(#[from] FileIOError),
	#[error("failed to encode webp")]
	WebpEncoding,
	#[error(transparent)]
	Decode(#[from] DecodeError),
	#[error("coordinator is shut down")]
	Shutdown,
}

/// Typed failure from the decoder set. None of these ever propagate past the
/// coordinator boundary; every variant maps to a fallback placeholder.
#[derive(Error, Debug)]
pub enum DecodeError {
	#[error("error while loading the image (via the `image` crate): {0}")]
	Image(#[from] image::ImageError),
	#[error("there was an i/o error: {0}")]
	Io(#[from] io::Error),
	#[error("the file's format family is unsupported")]
	Unsupported,
	#[error("the document is password protected")]
	Protected,
	#[error("pdfium library could not be bound")]
	PdfiumBinding,
	#[error("error while rendering the document: {0}")]
	Document(String),
	#[error("error while flattening the layered image: {0}")]
	Layered(String),
	#[error("the decoded buffer has an invalid length for its dimensions")]
	InvalidLength,
	#[error("panic while decoding: {0}")]
	Panic(String),
	#[error("decode timed out: {}", .0.display())]
	TimedOut(Box<Path>),
	#[cfg(feature = "ffmpeg")]
	#[error("no decodable video frame was found")]
	NoVideoFrame,
	#[cfg(feature = "ffmpeg")]
	#[error("error from ffmpeg: {0}")]
	Ffmpeg(String),
}

impl DecodeError {
	/// Protected documents get their own placeholder category; everything
	/// else renders as a generic decode failure.
	#[must_use]
	pub fn is_protected(&self) -> bool {
		matches!(self, Self::Protected)
	}
}
