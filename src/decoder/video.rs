//! Video containers: decode exactly one representative frame.
//!
//! The preview frame comes from the temporal midpoint of the stream, not
//! frame zero, because openings are so often black or mid-fade.

use std::path::Path;

use ffmpeg_next as ffmpeg;

use ffmpeg::{codec, format, frame, media, software::scaling};

use super::{fit_dimensions, PixelBuffer};
use crate::{error::DecodeError, ThumbSize};

fn ff(e: ffmpeg::Error) -> DecodeError {
	DecodeError::Ffmpeg(e.to_string())
}

pub(crate) fn decode(path: &Path, size: ThumbSize) -> Result<PixelBuffer, DecodeError> {
	ffmpeg::init().map_err(ff)?;

	let mut ictx = format::input(&path).map_err(ff)?;

	let stream = ictx
		.streams()
		.best(media::Type::Video)
		.ok_or(DecodeError::NoVideoFrame)?;
	let stream_index = stream.index();

	let mut decoder = codec::context::Context::from_parameters(stream.parameters())
		.map_err(ff)?
		.decoder()
		.video()
		.map_err(ff)?;

	// Midpoint seek; a stream that reports no duration just decodes from
	// the start instead.
	let duration = ictx.duration();
	if duration > 0 {
		let midpoint = duration / 2;
		ictx.seek(midpoint, ..midpoint).map_err(ff)?;
	}

	let (target_w, target_h) = fit_dimensions(decoder.width(), decoder.height(), size);

	let mut scaler = scaling::Context::get(
		decoder.format(),
		decoder.width(),
		decoder.height(),
		format::Pixel::RGBA,
		target_w,
		target_h,
		scaling::Flags::BILINEAR,
	)
	.map_err(ff)?;

	let mut frame = frame::Video::empty();

	for (stream, packet) in ictx.packets() {
		if stream.index() != stream_index {
			continue;
		}

		// Packets between the seek point and the next keyframe may refuse
		// to decode; keep feeding until one lands.
		if decoder.send_packet(&packet).is_err() {
			continue;
		}

		if decoder.receive_frame(&mut frame).is_ok() {
			return scale_frame(&mut scaler, &frame, target_w, target_h);
		}
	}

	decoder.send_eof().ok();
	if decoder.receive_frame(&mut frame).is_ok() {
		return scale_frame(&mut scaler, &frame, target_w, target_h);
	}

	Err(DecodeError::NoVideoFrame)
}

fn scale_frame(
	scaler: &mut scaling::Context,
	frame: &frame::Video,
	width: u32,
	height: u32,
) -> Result<PixelBuffer, DecodeError> {
	let mut rgba = frame::Video::empty();
	scaler.run(frame, &mut rgba).map_err(ff)?;

	// The frame's rows are padded to the stride; copy them out tight.
	let stride = rgba.stride(0);
	let row_len = width as usize * 4;
	let plane = rgba.data(0);

	let mut data = Vec::with_capacity(row_len * height as usize);
	for y in 0..height as usize {
		let start = y * stride;
		data.extend_from_slice(&plane[start..start + row_len]);
	}

	Ok(PixelBuffer {
		width,
		height,
		data,
	})
}
