//! Generation coordinator: the single task that owns both cache tiers.
//!
//! Decode work runs on a pool of worker tasks, but workers only ever hand
//! back raw pixel buffers. Bitmap construction, cache population and
//! listener delivery all happen here, on one task — the affinity rule most
//! GUI toolkits impose on image objects, preserved as single ownership so
//! the caches never need a lock.

use std::{
	collections::{HashMap, VecDeque},
	path::PathBuf,
	pin::pin,
	sync::Arc,
	time::Duration,
};

use async_channel as chan;
use futures::FutureExt;
use futures_concurrency::stream::Merge;
use serde::Serialize;
use tokio::{fs, sync::oneshot, task, time::timeout};
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use crate::{
	decoder::{self, PixelBuffer},
	disk::DiskCache,
	error::DecodeError,
	format::FormatFamily,
	key::CacheKey,
	memory::MemoryCache,
	placeholder::{placeholder, PlaceholderKind},
	Priority, ThumbSize, Thumbnail, ThumbnailOrigin,
};

pub(crate) type Listener = Box<dyn FnOnce(Thumbnail) + Send + 'static>;

/// Identity of a generation job; at most one decode is ever in flight per
/// distinct value of this.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct JobKey {
	pub path: PathBuf,
	pub size: ThumbSize,
}

pub(crate) enum Message {
	Request {
		path: PathBuf,
		size: ThumbSize,
		priority: Priority,
		listener: Listener,
	},
	Cancel {
		path: PathBuf,
		size: ThumbSize,
	},
	Invalidate {
		path: PathBuf,
	},
	ClearCaches,
	Stats {
		reply: oneshot::Sender<ThumbnailerStats>,
	},
	Shutdown {
		ack: oneshot::Sender<()>,
	},
}

/// Counters surfaced to the browser's status bar.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ThumbnailerStats {
	pub memory_hits: u64,
	pub disk_hits: u64,
	pub generated: u64,
	pub failed: u64,
}

pub(crate) struct Job {
	pub key: JobKey,
	pub cache_key: CacheKey,
	pub family: FormatFamily,
}

pub(crate) struct Completion {
	pub job: Job,
	pub result: Result<PixelBuffer, DecodeError>,
}

pub(crate) struct Coordinator {
	memory: MemoryCache,
	disk: DiskCache,
	/// Jobs waiting for a worker slot. Visible-priority jobs enter at the
	/// front, background ones at the back.
	pending: VecDeque<Job>,
	/// Listeners per job key, pending and dispatched alike. Presence here is
	/// what deduplicates concurrent requests.
	in_flight: HashMap<JobKey, Vec<Listener>>,
	/// Jobs currently with workers; bounded by `workers`.
	dispatched: usize,
	workers: usize,
	job_tx: chan::Sender<Job>,
	stats: ThumbnailerStats,
}

impl Coordinator {
	pub(crate) fn new(
		memory: MemoryCache,
		disk: DiskCache,
		workers: usize,
		job_tx: chan::Sender<Job>,
	) -> Self {
		Self {
			memory,
			disk,
			pending: VecDeque::with_capacity(32),
			in_flight: HashMap::new(),
			dispatched: 0,
			workers,
			job_tx,
			stats: ThumbnailerStats::default(),
		}
	}

	pub(crate) async fn run(
		mut self,
		msg_rx: chan::Receiver<Message>,
		completion_rx: chan::Receiver<Completion>,
		cancel_token: CancellationToken,
	) {
		enum StreamMessage {
			Msg(Message),
			Done(Completion),
			Stop,
		}

		let cancel = pin!(cancel_token.cancelled());

		let mut msg_stream = pin!((
			msg_rx.map(StreamMessage::Msg),
			completion_rx.map(StreamMessage::Done),
			cancel.into_stream().map(|()| StreamMessage::Stop),
		)
			.merge());

		while let Some(msg) = msg_stream.next().await {
			match msg {
				StreamMessage::Msg(Message::Request {
					path,
					size,
					priority,
					listener,
				}) => self.handle_request(path, size, priority, listener).await,

				StreamMessage::Msg(Message::Cancel { path, size }) => {
					self.handle_cancel(path, size).await;
				}

				StreamMessage::Msg(Message::Invalidate { path }) => {
					self.handle_invalidate(path).await;
				}

				StreamMessage::Msg(Message::ClearCaches) => {
					self.memory.clear();
					if let Err(e) = self.disk.clear().await {
						error!("Failed to clear disk cache: {e:#?}");
					}
				}

				StreamMessage::Msg(Message::Stats { reply }) => {
					reply.send(self.stats).ok();
				}

				StreamMessage::Msg(Message::Shutdown { ack }) => {
					debug!("Thumbnail coordinator shutting down");
					ack.send(()).ok();
					break;
				}

				StreamMessage::Done(completion) => self.handle_completion(completion).await,

				StreamMessage::Stop => {
					debug!("Thumbnail coordinator cancelled");
					break;
				}
			}
		}
	}

	/// Memory hit answers immediately; disk hit also warms the memory tier;
	/// anything else becomes a generation job, deduplicated by `(path, size)`.
	pub(crate) async fn handle_request(
		&mut self,
		path: PathBuf,
		size: ThumbSize,
		priority: Priority,
		listener: Listener,
	) {
		// Stable keys need a stable spelling of the path.
		let path = fs::canonicalize(&path).await.unwrap_or(path);

		let mtime = match fs::metadata(&path).await.and_then(|m| m.modified()) {
			Ok(mtime) => mtime,
			Err(e) => {
				warn!("Failed to stat {}: {e}", path.display());
				self.stats.failed += 1;
				listener(make_placeholder(path, size, PlaceholderKind::Corrupt));
				return;
			}
		};

		let cache_key = CacheKey::new(&path, mtime);

		if let Some(bitmap) = self.memory.get(&cache_key) {
			self.stats.memory_hits += 1;
			listener(Thumbnail {
				path,
				size,
				bitmap,
				origin: ThumbnailOrigin::Memory,
			});
			return;
		}

		if let Some(bitmap) = self.disk.get(&cache_key).await {
			self.stats.disk_hits += 1;
			self.memory.put(cache_key, Arc::clone(&bitmap));
			listener(Thumbnail {
				path,
				size,
				bitmap,
				origin: ThumbnailOrigin::Disk,
			});
			return;
		}

		let Some(family) = FormatFamily::from_path(&path) else {
			// Not an error: scene files and the like just get their tile.
			listener(make_placeholder(path, size, PlaceholderKind::Unsupported));
			return;
		};

		let job_key = JobKey { path, size };

		if let Some(listeners) = self.in_flight.get_mut(&job_key) {
			trace!(
				"Identical job already in flight for {}, attaching listener",
				job_key.path.display()
			);
			listeners.push(listener);
			return;
		}

		self.in_flight.insert(job_key.clone(), vec![listener]);

		let job = Job {
			key: job_key,
			cache_key,
			family,
		};

		match priority {
			Priority::Visible => self.pending.push_front(job),
			Priority::Background => self.pending.push_back(job),
		}

		self.dispatch_pending().await;
	}

	pub(crate) async fn handle_completion(&mut self, Completion { job, result }: Completion) {
		self.dispatched = self.dispatched.saturating_sub(1);

		let listeners = self.in_flight.remove(&job.key).unwrap_or_default();

		match result.and_then(PixelBuffer::into_image) {
			Ok(image) => {
				let bitmap = Arc::new(image);

				self.memory.put(job.cache_key.clone(), Arc::clone(&bitmap));

				// A failed persist is only a lost cache entry; the consumer
				// still gets the freshly decoded bitmap.
				if let Err(e) = self.disk.put(&job.cache_key, &bitmap).await {
					warn!(
						"Failed to persist thumbnail for {}: {e}",
						job.key.path.display()
					);
				}

				self.stats.generated += 1;

				let delivery = Thumbnail {
					path: job.key.path,
					size: job.key.size,
					bitmap,
					origin: ThumbnailOrigin::Fresh,
				};
				for listener in listeners {
					listener(delivery.clone());
				}
			}

			Err(e) => {
				let kind = if e.is_protected() {
					PlaceholderKind::Protected
				} else if matches!(e, DecodeError::Unsupported) {
					PlaceholderKind::Unsupported
				} else {
					PlaceholderKind::Corrupt
				};

				self.stats.failed += 1;
				error!(
					"Failed to generate thumbnail for {}: {e}",
					job.key.path.display()
				);

				let delivery = make_placeholder(job.key.path, job.key.size, kind);
				for listener in listeners {
					listener(delivery.clone());
				}
			}
		}

		self.dispatch_pending().await;
	}

	/// Best-effort: a job still waiting in the queue is dropped outright; a
	/// job already with a worker runs to completion (the result is worth
	/// caching) but nobody is notified.
	pub(crate) async fn handle_cancel(&mut self, path: PathBuf, size: ThumbSize) {
		let path = fs::canonicalize(&path).await.unwrap_or(path);
		let job_key = JobKey { path, size };

		if let Some(index) = self.pending.iter().position(|job| job.key == job_key) {
			self.pending.remove(index);
			self.in_flight.remove(&job_key);
			trace!("Cancelled pending job for {}", job_key.path.display());
		} else if let Some(listeners) = self.in_flight.get_mut(&job_key) {
			listeners.clear();
			trace!(
				"Detached listeners from dispatched job for {}",
				job_key.path.display()
			);
		}
	}

	/// Drops the cache entries for the path's current key, so the next
	/// request decodes fresh even though the mtime hasn't moved.
	pub(crate) async fn handle_invalidate(&mut self, path: PathBuf) {
		let path = fs::canonicalize(&path).await.unwrap_or(path);

		if let Ok(mtime) = fs::metadata(&path).await.and_then(|m| m.modified()) {
			let cache_key = CacheKey::new(&path, mtime);
			self.memory.remove(&cache_key);
			self.disk.remove(&cache_key).await;
		}
	}

	async fn dispatch_pending(&mut self) {
		while self.dispatched < self.workers {
			let Some(job) = self.pending.pop_front() else {
				break;
			};

			if self.job_tx.send(job).await.is_err() {
				error!("Thumbnail workers are gone; dropping pending job");
				break;
			}
			self.dispatched += 1;
		}
	}

	#[cfg(test)]
	fn stats(&self) -> ThumbnailerStats {
		self.stats
	}
}

fn make_placeholder(path: PathBuf, size: ThumbSize, kind: PlaceholderKind) -> Thumbnail {
	Thumbnail {
		bitmap: Arc::new(placeholder(&path, kind, size)),
		origin: ThumbnailOrigin::Placeholder(kind),
		path,
		size,
	}
}

/// Decode worker: pull a job, run the family decoder on the blocking pool
/// under a timeout, hand the raw pixels back. Exits when the job channel
/// closes.
pub(crate) async fn worker(
	worker_id: usize,
	job_rx: chan::Receiver<Job>,
	completion_tx: chan::Sender<Completion>,
	decode_timeout: Duration,
	hdr_exposure: f32,
) {
	trace!(worker_id, "Thumbnail decode worker started");

	while let Ok(job) = job_rx.recv().await {
		let result = {
			let path = job.key.path.clone();
			let family = job.family;
			let size = job.key.size;

			match timeout(
				decode_timeout,
				task::spawn_blocking(move || decoder::decode(&path, family, size, hdr_exposure)),
			)
			.await
			{
				Ok(Ok(result)) => result,
				Ok(Err(join_error)) => Err(DecodeError::Panic(join_error.to_string())),
				Err(_) => Err(DecodeError::TimedOut(
					job.key.path.clone().into_boxed_path(),
				)),
			}
		};

		if completion_tx
			.send(Completion { job, result })
			.await
			.is_err()
		{
			break;
		}
	}

	trace!(worker_id, "Thumbnail decode worker stopped");
}
