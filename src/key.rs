use std::{
	path::Path,
	time::{Duration, SystemTime, UNIX_EPOCH},
};

/// Cache key derived from a file's absolute path and last-modified time.
///
/// Changing the mtime changes the key, which is the whole refresh mechanism:
/// the stale entry simply becomes unreachable under the new key and is later
/// reclaimed by the eviction sweep.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
	/// Pure function of its inputs; performs no I/O. The caller already paid
	/// for the stat that produced `mtime`.
	#[must_use]
	pub fn new(path: impl AsRef<Path>, mtime: SystemTime) -> Self {
		let stamp = mtime
			.duration_since(UNIX_EPOCH)
			.unwrap_or(Duration::ZERO);

		Self(
			blake3::hash(
				format!(
					"{}|{}.{:09}",
					path.as_ref().to_string_lossy(),
					stamp.as_secs(),
					stamp.subsec_nanos()
				)
				.as_bytes(),
			)
			.to_hex()
			.to_string(),
		)
	}

	#[must_use]
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

/// First three hex characters of the key, used as the shard directory name
/// in the disk tier. 4096 possible shards keeps any one directory small.
#[inline]
#[must_use]
pub fn get_shard_hex(key: &CacheKey) -> &str {
	&key.as_str()[0..3]
}
