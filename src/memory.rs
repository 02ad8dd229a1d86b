//! In-process thumbnail cache with strict LRU eviction.
//!
//! Owned exclusively by the coordinator task, so it needs no interior
//! locking. Misses are never errors; this tier is pure best-effort.

use std::{collections::HashMap, sync::Arc};

use image::RgbaImage;

use crate::key::CacheKey;

struct Entry {
	bitmap: Arc<RgbaImage>,
	/// Monotonic recency stamp; larger means more recently used.
	last_used: u64,
}

pub struct MemoryCache {
	entries: HashMap<CacheKey, Entry>,
	capacity: usize,
	tick: u64,
}

impl MemoryCache {
	#[must_use]
	pub fn new(capacity: usize) -> Self {
		Self {
			entries: HashMap::with_capacity(capacity.min(1024)),
			capacity: capacity.max(1),
			tick: 0,
		}
	}

	/// O(1); marks the entry most-recently-used on hit.
	pub fn get(&mut self, key: &CacheKey) -> Option<Arc<RgbaImage>> {
		self.tick += 1;
		let tick = self.tick;

		self.entries.get_mut(key).map(|entry| {
			entry.last_used = tick;
			Arc::clone(&entry.bitmap)
		})
	}

	/// Inserts or replaces. A new key pushed into a full cache evicts
	/// exactly the least-recently-used entry first.
	pub fn put(&mut self, key: CacheKey, bitmap: Arc<RgbaImage>) {
		self.tick += 1;

		if !self.entries.contains_key(&key) && self.entries.len() >= self.capacity {
			self.evict_lru();
		}

		self.entries.insert(
			key,
			Entry {
				bitmap,
				last_used: self.tick,
			},
		);
	}

	pub fn remove(&mut self, key: &CacheKey) {
		self.entries.remove(key);
	}

	pub fn clear(&mut self) {
		self.entries.clear();
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.entries.len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	fn evict_lru(&mut self) {
		if let Some(key) = self
			.entries
			.iter()
			.min_by_key(|(_, entry)| entry.last_used)
			.map(|(key, _)| key.clone())
		{
			self.entries.remove(&key);
		}
	}
}
