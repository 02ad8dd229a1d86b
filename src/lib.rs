//! Asset-browser thumbnail pipeline: a two-tier cache (in-memory LRU over a
//! budgeted on-disk WebP store) fed by a background generation coordinator.
//!
//! The whole pipeline hangs off one [`Thumbnailer`] handle. Consumers request
//! a thumbnail for a `(path, size)` pair and get exactly one callback with
//! either a cached bitmap, a freshly decoded one, or a deterministic
//! placeholder tile when the source can't be decoded. Requests never block on
//! decoding; decode work runs on a bounded worker pool behind the
//! coordinator.

use std::{
	path::{Path, PathBuf},
	sync::Arc,
	time::SystemTime,
};

use async_channel as chan;
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::error;

pub mod config;
mod coordinator;
mod decoder;
pub mod disk;
mod error;
pub mod format;
pub mod key;
pub mod memory;
pub mod placeholder;

pub use config::ThumbnailerConfig;
pub use coordinator::ThumbnailerStats;
pub use error::{DecodeError, FileIOError, ThumbnailerError};
pub use format::FormatFamily;
pub use placeholder::PlaceholderKind;

use coordinator::{Coordinator, Message};
use disk::DiskCache;
use key::CacheKey;
use memory::MemoryCache;

/// Target bounding box for a thumbnail, in pixels. Decoded images are scaled
/// to fit inside it with aspect ratio preserved, never upscaled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ThumbSize {
	pub width: u32,
	pub height: u32,
}

impl ThumbSize {
	#[must_use]
	pub const fn new(width: u32, height: u32) -> Self {
		Self { width, height }
	}
}

/// Scheduling class for a request. Visible items jump to the front of the
/// generation queue so scrolling feels responsive; background prefetch fills
/// in behind them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
	Visible,
	Background,
}

/// Where a delivered bitmap came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThumbnailOrigin {
	/// Decoded just now by a worker.
	Fresh,
	/// Served from the in-memory tier.
	Memory,
	/// Served from the on-disk tier.
	Disk,
	/// The source couldn't be decoded; this is a generated tile, and it was
	/// deliberately not cached so the source gets another chance after the
	/// underlying problem is fixed.
	Placeholder(PlaceholderKind),
}

/// What a listener receives, exactly once per request.
#[derive(Debug, Clone)]
pub struct Thumbnail {
	pub path: PathBuf,
	pub size: ThumbSize,
	pub bitmap: Arc<RgbaImage>,
	pub origin: ThumbnailOrigin,
}

/// Handle to the thumbnail pipeline. Hold it in one place and pass
/// `&Thumbnailer` around; dropping it shuts the coordinator and its workers
/// down.
pub struct Thumbnailer {
	msg_tx: chan::Sender<Message>,
	cache_root: PathBuf,
	_cancel_guard: DropGuard,
}

impl Thumbnailer {
	/// Spawns the coordinator and its decode workers onto the current tokio
	/// runtime and opens (or creates) the disk cache directory.
	pub async fn new(config: ThumbnailerConfig) -> Result<Self, ThumbnailerError> {
		let workers = config.effective_workers();

		let disk = DiskCache::new(
			config.cache_dir.clone(),
			config.disk_budget_bytes,
			config.webp_quality,
		)
		.await?;
		let memory = MemoryCache::new(config.memory_capacity);

		let (msg_tx, msg_rx) = chan::unbounded();
		let (job_tx, job_rx) = chan::bounded(workers.max(1));
		let (completion_tx, completion_rx) = chan::bounded(workers.max(1));

		for worker_id in 0..workers {
			tokio::spawn(coordinator::worker(
				worker_id,
				job_rx.clone(),
				completion_tx.clone(),
				config.decode_timeout,
				config.hdr_exposure,
			));
		}

		let cancel_token = CancellationToken::new();
		tokio::spawn(
			Coordinator::new(memory, disk, workers, job_tx)
				.run(msg_rx, completion_rx, cancel_token.child_token()),
		);

		Ok(Self {
			msg_tx,
			cache_root: config.cache_dir,
			_cancel_guard: cancel_token.drop_guard(),
		})
	}

	/// Requests a thumbnail. Returns as soon as the request is queued;
	/// `on_complete` fires later, exactly once, from the coordinator task.
	/// Duplicate in-flight requests for the same `(path, size)` share a
	/// single decode.
	pub async fn request(
		&self,
		path: impl Into<PathBuf>,
		size: ThumbSize,
		priority: Priority,
		on_complete: impl FnOnce(Thumbnail) + Send + 'static,
	) {
		self.send(Message::Request {
			path: path.into(),
			size,
			priority,
			listener: Box::new(on_complete),
		})
		.await;
	}

	/// Best-effort cancellation of a previous request; the listener will not
	/// fire. A decode already running is left to finish and populate the
	/// caches.
	pub async fn cancel(&self, path: impl Into<PathBuf>, size: ThumbSize) {
		self.send(Message::Cancel {
			path: path.into(),
			size,
		})
		.await;
	}

	/// Drops any cached thumbnails for `path` at its current mtime. The next
	/// request will decode fresh.
	pub async fn invalidate(&self, path: impl Into<PathBuf>) {
		self.send(Message::Invalidate { path: path.into() }).await;
	}

	/// Empties both cache tiers.
	pub async fn clear_caches(&self) {
		self.send(Message::ClearCaches).await;
	}

	pub async fn stats(&self) -> ThumbnailerStats {
		let (reply, rx) = oneshot::channel();
		self.send(Message::Stats { reply }).await;
		rx.await.unwrap_or_default()
	}

	/// True when no disk entry exists for the file at the given mtime, i.e.
	/// the file is new or changed since its thumbnail was generated. Cheap
	/// enough to call per tile while scrolling: one existence check, no I/O
	/// on the entry itself.
	#[must_use]
	pub fn needs_refresh(&self, path: impl AsRef<Path>, mtime: SystemTime) -> bool {
		let path = path.as_ref();
		let path = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());

		!disk::entry_path(&self.cache_root, &CacheKey::new(path, mtime)).exists()
	}

	/// Graceful shutdown: the coordinator drains nothing, acknowledges, and
	/// exits; workers exit as their job channel closes. Dropping the handle
	/// without calling this achieves the same through the cancellation guard,
	/// just without the acknowledgement.
	pub async fn shutdown(self) {
		let (ack, rx) = oneshot::channel();
		if self.msg_tx.send(Message::Shutdown { ack }).await.is_ok() {
			rx.await.ok();
		}
	}

	async fn send(&self, message: Message) {
		if self.msg_tx.send(message).await.is_err() {
			error!("Thumbnail coordinator is dead, message dropped");
		}
	}
}
