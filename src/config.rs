use std::{path::PathBuf, time::Duration};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

pub const THUMBNAIL_CACHE_DIR_NAME: &str = "thumbnails";

/// Read-only after startup; every component takes what it needs by value at
/// construction time, so no locking is ever required around configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThumbnailerConfig {
	/// Root directory of the disk tier.
	pub cache_dir: PathBuf,
	/// Memory tier capacity as an entry count. Thumbnails are near-uniform
	/// in size, so a count bound is as good as a byte budget and simpler.
	pub memory_capacity: usize,
	/// Disk tier byte budget, enforced by the eviction sweep.
	pub disk_budget_bytes: u64,
	/// Lossy WebP quality for disk entries, 0-100.
	pub webp_quality: f32,
	/// Decode worker count. Zero means available parallelism.
	pub workers: usize,
	/// Upper bound on a single decode; a malformed file must not wedge a
	/// worker forever.
	pub decode_timeout: Duration,
	/// Exposure compensation for HDR previews, in stops.
	pub hdr_exposure: f32,
}

impl Default for ThumbnailerConfig {
	fn default() -> Self {
		Self {
			cache_dir: default_cache_dir(),
			memory_capacity: 1000,
			disk_budget_bytes: 500 * 1024 * 1024,
			webp_quality: 85.0,
			workers: 0,
			decode_timeout: Duration::from_secs(30),
			hdr_exposure: 0.0,
		}
	}
}

impl ThumbnailerConfig {
	#[must_use]
	pub fn effective_workers(&self) -> usize {
		if self.workers > 0 {
			self.workers
		} else {
			std::thread::available_parallelism().map_or(4, std::num::NonZeroUsize::get)
		}
	}
}

fn default_cache_dir() -> PathBuf {
	ProjectDirs::from("", "", "thumbkit").map_or_else(
		|| PathBuf::from(THUMBNAIL_CACHE_DIR_NAME),
		|dirs| dirs.cache_dir().join(THUMBNAIL_CACHE_DIR_NAME),
	)
}
