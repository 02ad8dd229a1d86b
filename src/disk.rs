//! Persistent thumbnail cache: one lossy-WebP file per cache key.
//!
//! Layout:
//!
//! ```text
//! thumbnails/
//! ├── 1a2/            # shard: first three hex chars of the key
//! │   └── 1a2b3c....webp
//! └── f00/
//!     └── f00d42....webp
//! ```
//!
//! There is no index file. Entry size and recency come straight from
//! filesystem metadata, so the files can never disagree with a ledger about
//! themselves. Recency is the access time, refreshed explicitly on every hit
//! because relatime mounts won't do it for us.

use std::{
	io::Write,
	ops::Deref,
	path::{Path, PathBuf},
	sync::Arc,
	time::SystemTime,
};

use filetime::FileTime;
use image::RgbaImage;
use tempfile::NamedTempFile;
use tokio::{fs, io, task};
use tracing::{debug, trace, warn};
use webp::{Decoder, Encoder};

use crate::{
	error::{FileIOError, ThumbnailerError},
	key::{get_shard_hex, CacheKey},
};

pub const WEBP_EXTENSION: &str = "webp";

/// After a sweep we aim for this fraction of the budget, leaving headroom so
/// we don't sweep again on every subsequent write.
const SWEEP_TARGET: f64 = 0.8;

pub(crate) fn entry_path(root: &Path, key: &CacheKey) -> PathBuf {
	let mut path = root.join(get_shard_hex(key));
	path.push(key.as_str());
	path.set_extension(WEBP_EXTENSION);
	path
}

pub struct DiskCache {
	root: PathBuf,
	budget_bytes: u64,
	quality: f32,
	/// Running total, seeded by a scan at startup and adjusted on every
	/// write and delete. The sweep re-walks the tree, so drift self-corrects.
	total_bytes: u64,
}

impl DiskCache {
	pub async fn new(
		root: PathBuf,
		budget_bytes: u64,
		quality: f32,
	) -> Result<Self, ThumbnailerError> {
		fs::create_dir_all(&root)
			.await
			.map_err(|e| FileIOError::from((&root, e)))?;

		let mut cache = Self {
			root,
			budget_bytes,
			quality,
			total_bytes: 0,
		};
		cache.total_bytes = cache.walk_entries().await?.iter().map(|e| e.len).sum();

		debug!(
			root = %cache.root.display(),
			total_bytes = cache.total_bytes,
			"Disk cache initialized"
		);

		Ok(cache)
	}

	/// Loads and decodes the entry for `key`, refreshing its access time for
	/// LRU bookkeeping. A corrupt entry (truncated write from a crash, bad
	/// sectors) is deleted on the spot and reported as a miss so it gets
	/// regenerated.
	pub async fn get(&mut self, key: &CacheKey) -> Option<Arc<RgbaImage>> {
		let path = entry_path(&self.root, key);

		let bytes = match fs::read(&path).await {
			Ok(bytes) => bytes,
			Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
			Err(e) => {
				warn!("Failed to read cached thumbnail {}: {e}", path.display());
				return None;
			}
		};

		let Some(decoded) = Decoder::new(&bytes).decode() else {
			warn!(
				"Corrupt cache entry {}, deleting for regeneration",
				path.display()
			);
			self.remove(key).await;
			return None;
		};

		if let Err(e) = filetime::set_file_atime(&path, FileTime::from_system_time(SystemTime::now()))
		{
			trace!("Failed to touch atime of {}: {e}", path.display());
		}

		Some(Arc::new(decoded.to_image().to_rgba8()))
	}

	/// Compresses the bitmap and writes it under the key-derived path via a
	/// temp file + atomic rename, so a concurrent reader can never see a
	/// half-written entry. Runs the eviction sweep when the write pushes the
	/// total over budget.
	pub async fn put(&mut self, key: &CacheKey, bitmap: &RgbaImage) -> Result<(), ThumbnailerError> {
		let path = entry_path(&self.root, key);

		let shard_dir = path
			.parent()
			.expect("entry path always has a shard parent");
		fs::create_dir_all(shard_dir)
			.await
			.map_err(|e| FileIOError::from((shard_dir, e)))?;

		let (width, height) = bitmap.dimensions();
		let raw = bitmap.as_raw().clone();
		let quality = self.quality;
		let root = self.root.clone();
		let dest = path.clone();

		let written = task::spawn_blocking(move || -> Result<u64, ThumbnailerError> {
			// Type WebPMemory is !Send, so we deref to `&[u8]` before it can
			// leak out of this closure.
			let webp = Encoder::from_rgba(&raw, width, height)
				.encode(quality)
				.deref()
				.to_vec();

			let mut tmp =
				NamedTempFile::new_in(&root).map_err(|e| FileIOError::from((&root, e)))?;
			tmp.write_all(&webp)
				.map_err(|e| FileIOError::from((tmp.path(), e)))?;
			tmp.persist(&dest)
				.map_err(|e| FileIOError::from((&dest, e.error)))?;

			Ok(webp.len() as u64)
		})
		.await
		.map_err(|_| ThumbnailerError::WebpEncoding)??;

		self.total_bytes += written;

		if self.total_bytes > self.budget_bytes {
			self.sweep().await?;
		}

		Ok(())
	}

	/// True when no entry exists for the path at its current mtime, i.e. the
	/// file is new or has changed since we last generated a thumbnail.
	#[must_use]
	pub fn needs_refresh(&self, path: impl AsRef<Path>, mtime: SystemTime) -> bool {
		!entry_path(&self.root, &CacheKey::new(path, mtime)).exists()
	}

	pub async fn remove(&mut self, key: &CacheKey) {
		let path = entry_path(&self.root, key);

		let len = fs::metadata(&path).await.map(|m| m.len()).unwrap_or(0);

		match fs::remove_file(&path).await {
			Ok(()) => self.total_bytes = self.total_bytes.saturating_sub(len),
			Err(e) if e.kind() == io::ErrorKind::NotFound => {}
			Err(e) => warn!("Failed to remove cache entry {}: {e}", path.display()),
		}
	}

	pub async fn clear(&mut self) -> Result<(), ThumbnailerError> {
		fs::remove_dir_all(&self.root)
			.await
			.map_err(|e| FileIOError::from((&self.root, e)))?;
		fs::create_dir_all(&self.root)
			.await
			.map_err(|e| FileIOError::from((&self.root, e)))?;
		self.total_bytes = 0;

		debug!(root = %self.root.display(), "Disk cache cleared");

		Ok(())
	}

	#[must_use]
	pub fn size_bytes(&self) -> u64 {
		self.total_bytes
	}

	#[must_use]
	pub fn root(&self) -> &Path {
		&self.root
	}

	/// Deletes least-recently-accessed entries until the total is at or
	/// under [`SWEEP_TARGET`] of the budget, then removes any shard
	/// directories left empty. Orphaned entries from stale keys get
	/// reclaimed here too, since they stop being touched.
	pub(crate) async fn sweep(&mut self) -> Result<(), ThumbnailerError> {
		let mut entries = self.walk_entries().await?;
		let mut total: u64 = entries.iter().map(|e| e.len).sum();
		let before = total;

		#[allow(clippy::cast_precision_loss, clippy::cast_sign_loss, clippy::cast_possible_truncation)]
		let target = (self.budget_bytes as f64 * SWEEP_TARGET) as u64;

		entries.sort_by_key(|e| e.last_access);

		let mut removed = 0_usize;
		for entry in &entries {
			if total <= target {
				break;
			}

			match fs::remove_file(&entry.path).await {
				Ok(()) => {
					total = total.saturating_sub(entry.len);
					removed += 1;
				}
				Err(e) => warn!("Failed to evict {}: {e}", entry.path.display()),
			}
		}

		self.remove_empty_shards().await;
		self.total_bytes = total;

		debug!(
			removed,
			before_bytes = before,
			after_bytes = total,
			"Disk cache eviction sweep finished"
		);

		Ok(())
	}

	async fn walk_entries(&self) -> Result<Vec<EntryMeta>, FileIOError> {
		let mut entries = Vec::new();

		let mut read_dir = fs::read_dir(&self.root)
			.await
			.map_err(|e| FileIOError::from((&self.root, e)))?;

		while let Some(shard) = read_dir
			.next_entry()
			.await
			.map_err(|e| FileIOError::from((&self.root, e)))?
		{
			let shard_path = shard.path();
			if !shard
				.metadata()
				.await
				.map_err(|e| FileIOError::from((&shard_path, e)))?
				.is_dir()
			{
				continue;
			}

			let mut shard_dir = fs::read_dir(&shard_path)
				.await
				.map_err(|e| FileIOError::from((&shard_path, e)))?;

			while let Some(entry) = shard_dir
				.next_entry()
				.await
				.map_err(|e| FileIOError::from((&shard_path, e)))?
			{
				let path = entry.path();
				if path
					.extension()
					.map_or(true, |ext| ext != WEBP_EXTENSION)
				{
					continue;
				}

				let Ok(metadata) = entry.metadata().await else {
					continue;
				};

				entries.push(EntryMeta {
					last_access: metadata
						.accessed()
						.or_else(|_| metadata.modified())
						.map(|t| FileTime::from_system_time(t))
						.unwrap_or(FileTime::zero()),
					len: metadata.len(),
					path,
				});
			}
		}

		Ok(entries)
	}

	async fn remove_empty_shards(&self) {
		let Ok(mut read_dir) = fs::read_dir(&self.root).await else {
			return;
		};

		while let Ok(Some(shard)) = read_dir.next_entry().await {
			let shard_path = shard.path();
			if !shard_path.is_dir() {
				continue;
			}

			let empty = match std::fs::read_dir(&shard_path) {
				Ok(mut iter) => iter.next().is_none(),
				Err(_) => false,
			};

			if empty {
				trace!("Removing empty shard directory {}", shard_path.display());
				fs::remove_dir(&shard_path).await.ok();
			}
		}
	}
}

struct EntryMeta {
	path: PathBuf,
	len: u64,
	last_access: FileTime,
}

#[cfg(test)]
mod tests {
	use super::*;

	use std::time::{Duration, UNIX_EPOCH};

	fn noisy_bitmap(seed: u32, size: u32) -> RgbaImage {
		// Poorly compressible content so entries have a meaningful size.
		RgbaImage::from_fn(size, size, |x, y| {
			let v = x
				.wrapping_mul(31)
				.wrapping_add(y.wrapping_mul(17))
				.wrapping_add(seed.wrapping_mul(97));
			image::Rgba([(v % 255) as u8, (v % 127) as u8, (v % 63) as u8, 255])
		})
	}

	fn test_key(n: u64) -> CacheKey {
		CacheKey::new(
			format!("/assets/file_{n}.jpg"),
			UNIX_EPOCH + Duration::from_secs(n),
		)
	}

	#[tokio::test]
	async fn put_then_get_roundtrips_under_lossy_compression() {
		let dir = tempfile::tempdir().unwrap();
		let mut cache = DiskCache::new(dir.path().to_path_buf(), u64::MAX, 85.0)
			.await
			.unwrap();

		let bitmap = RgbaImage::from_pixel(64, 48, image::Rgba([120, 60, 30, 255]));
		let key = test_key(1);

		cache.put(&key, &bitmap).await.unwrap();
		let loaded = cache.get(&key).await.expect("entry should hit");

		assert_eq!(loaded.dimensions(), (64, 48));
		// Lossy codec: demand the stored color is close, not identical.
		let px = loaded.get_pixel(32, 24);
		assert!((i32::from(px[0]) - 120).abs() < 16, "red drifted: {px:?}");
		assert!((i32::from(px[1]) - 60).abs() < 16, "green drifted: {px:?}");
	}

	#[tokio::test]
	async fn missing_key_is_a_miss() {
		let dir = tempfile::tempdir().unwrap();
		let mut cache = DiskCache::new(dir.path().to_path_buf(), u64::MAX, 85.0)
			.await
			.unwrap();

		assert!(cache.get(&test_key(9)).await.is_none());
	}

	#[tokio::test]
	#[tracing_test::traced_test]
	async fn corrupt_entry_self_heals() {
		let dir = tempfile::tempdir().unwrap();
		let mut cache = DiskCache::new(dir.path().to_path_buf(), u64::MAX, 85.0)
			.await
			.unwrap();

		let key = test_key(2);
		let path = entry_path(cache.root(), &key);
		std::fs::create_dir_all(path.parent().unwrap()).unwrap();
		std::fs::write(&path, b"definitely not a webp").unwrap();

		assert!(cache.get(&key).await.is_none());
		assert!(!path.exists(), "corrupt entry should have been deleted");
		assert!(logs_contain("Corrupt cache entry"));
	}

	#[tokio::test]
	async fn needs_refresh_tracks_mtime() {
		let dir = tempfile::tempdir().unwrap();
		let mut cache = DiskCache::new(dir.path().to_path_buf(), u64::MAX, 85.0)
			.await
			.unwrap();

		let source = "/assets/texture.png";
		let mtime_a = UNIX_EPOCH + Duration::from_secs(100);
		let mtime_b = UNIX_EPOCH + Duration::from_secs(200);

		assert!(cache.needs_refresh(source, mtime_a));

		cache
			.put(&CacheKey::new(source, mtime_a), &noisy_bitmap(0, 16))
			.await
			.unwrap();

		assert!(!cache.needs_refresh(source, mtime_a));
		assert!(
			cache.needs_refresh(source, mtime_b),
			"a changed mtime must look like a miss"
		);
	}

	#[tokio::test]
	async fn sweep_enforces_budget_and_keeps_recent_entries() {
		let dir = tempfile::tempdir().unwrap();
		let mut cache = DiskCache::new(dir.path().to_path_buf(), u64::MAX, 85.0)
			.await
			.unwrap();

		let mut paths = Vec::new();
		for n in 0..6 {
			let key = test_key(n);
			cache.put(&key, &noisy_bitmap(n as u32, 128)).await.unwrap();
			paths.push(entry_path(cache.root(), &key));
		}

		// Deterministic recency: entry n was accessed at t = n.
		for (n, path) in paths.iter().enumerate() {
			filetime::set_file_atime(path, FileTime::from_unix_time(1_000 + n as i64, 0))
				.unwrap();
		}

		let total = cache.size_bytes();
		assert!(total > 0);

		// Budget forces roughly half of the entries out.
		cache.budget_bytes = total / 2;
		cache.sweep().await.unwrap();

		assert!(
			cache.size_bytes() <= cache.budget_bytes,
			"sweep must land under budget: {} > {}",
			cache.size_bytes(),
			cache.budget_bytes
		);
		assert!(
			!paths[0].exists(),
			"least recently accessed entry must go first"
		);
		assert!(paths[5].exists(), "most recent entry must survive");
	}

	#[tokio::test]
	async fn put_triggers_sweep_when_over_budget() {
		let dir = tempfile::tempdir().unwrap();
		let mut cache = DiskCache::new(dir.path().to_path_buf(), 20_000, 85.0)
			.await
			.unwrap();

		for n in 0..12 {
			cache.put(&test_key(n), &noisy_bitmap(n as u32, 128)).await.unwrap();
		}

		assert!(
			cache.size_bytes() <= 20_000,
			"total after writes: {}",
			cache.size_bytes()
		);
	}

	#[tokio::test]
	async fn clear_removes_all_entries() {
		let dir = tempfile::tempdir().unwrap();
		let mut cache = DiskCache::new(dir.path().to_path_buf(), u64::MAX, 85.0)
			.await
			.unwrap();

		let key = test_key(7);
		cache.put(&key, &noisy_bitmap(7, 32)).await.unwrap();

		cache.clear().await.unwrap();

		assert_eq!(cache.size_bytes(), 0);
		assert!(cache.get(&key).await.is_none());
	}

	#[tokio::test]
	async fn restart_rescans_existing_entries() {
		let dir = tempfile::tempdir().unwrap();

		{
			let mut cache = DiskCache::new(dir.path().to_path_buf(), u64::MAX, 85.0)
				.await
				.unwrap();
			cache.put(&test_key(1), &noisy_bitmap(1, 64)).await.unwrap();
		}

		let reopened = DiskCache::new(dir.path().to_path_buf(), u64::MAX, 85.0)
			.await
			.unwrap();
		assert!(reopened.size_bytes() > 0, "startup scan should find entries");
	}
}
