//! End-to-end pipeline tests against the public handle: request, decode,
//! cache tiers, refresh detection and fallback delivery.

use std::time::{Duration, SystemTime};

use image::{Rgba, RgbaImage};

use thumbkit::{
	PlaceholderKind, Priority, ThumbSize, Thumbnail, ThumbnailOrigin, Thumbnailer,
	ThumbnailerConfig,
};

const SIZE: ThumbSize = ThumbSize {
	width: 200,
	height: 150,
};

fn config(root: &tempfile::TempDir) -> ThumbnailerConfig {
	ThumbnailerConfig {
		cache_dir: root.path().join("thumbnails"),
		workers: 2,
		..Default::default()
	}
}

fn write_png(root: &tempfile::TempDir, name: &str) -> std::path::PathBuf {
	let path = root.path().join(name);
	RgbaImage::from_pixel(400, 300, Rgba([10, 200, 30, 255]))
		.save(&path)
		.unwrap();
	path
}

async fn request_and_wait(
	thumbnailer: &Thumbnailer,
	path: impl Into<std::path::PathBuf>,
	priority: Priority,
) -> Thumbnail {
	let (tx, rx) = tokio::sync::oneshot::channel();

	thumbnailer
		.request(path, SIZE, priority, move |thumb| {
			tx.send(thumb).ok();
		})
		.await;

	tokio::time::timeout(Duration::from_secs(30), rx)
		.await
		.expect("no delivery within the deadline")
		.expect("listener dropped without delivery")
}

#[tokio::test]
async fn first_request_decodes_fresh_and_second_hits_memory() {
	let root = tempfile::tempdir().unwrap();
	let thumbnailer = Thumbnailer::new(config(&root)).await.unwrap();
	let source = write_png(&root, "photo.png");

	let fresh = request_and_wait(&thumbnailer, &source, Priority::Visible).await;
	assert_eq!(fresh.origin, ThumbnailOrigin::Fresh);
	assert_eq!(fresh.bitmap.dimensions(), (200, 150));
	assert_eq!(
		fresh.bitmap.get_pixel(100, 75)[1],
		200,
		"solid color must survive the resize"
	);

	let cached = request_and_wait(&thumbnailer, &source, Priority::Visible).await;
	assert_eq!(cached.origin, ThumbnailOrigin::Memory);

	let stats = thumbnailer.stats().await;
	assert_eq!(stats.generated, 1);
	assert_eq!(stats.memory_hits, 1);
}

#[tokio::test]
async fn disk_tier_survives_a_restart() {
	let root = tempfile::tempdir().unwrap();
	let source = write_png(&root, "photo.png");

	{
		let thumbnailer = Thumbnailer::new(config(&root)).await.unwrap();
		let fresh = request_and_wait(&thumbnailer, &source, Priority::Background).await;
		assert_eq!(fresh.origin, ThumbnailOrigin::Fresh);
		thumbnailer.shutdown().await;
	}

	// A new pipeline over the same cache directory: the memory tier is empty
	// but the disk tier still has the entry.
	let thumbnailer = Thumbnailer::new(config(&root)).await.unwrap();
	let reloaded = request_and_wait(&thumbnailer, &source, Priority::Visible).await;

	assert_eq!(reloaded.origin, ThumbnailOrigin::Disk);
	assert_eq!(reloaded.bitmap.dimensions(), (200, 150));
}

#[tokio::test]
async fn needs_refresh_tracks_source_mtime() {
	let root = tempfile::tempdir().unwrap();
	let thumbnailer = Thumbnailer::new(config(&root)).await.unwrap();
	let source = write_png(&root, "texture.png");

	let mtime = std::fs::metadata(&source).unwrap().modified().unwrap();
	assert!(
		thumbnailer.needs_refresh(&source, mtime),
		"nothing generated yet"
	);

	request_and_wait(&thumbnailer, &source, Priority::Visible).await;

	assert!(!thumbnailer.needs_refresh(&source, mtime));
	assert!(
		thumbnailer.needs_refresh(&source, mtime + Duration::from_secs(10)),
		"a changed mtime must demand regeneration"
	);
}

#[tokio::test]
async fn modified_file_is_regenerated_not_served_stale() {
	let root = tempfile::tempdir().unwrap();
	let thumbnailer = Thumbnailer::new(config(&root)).await.unwrap();
	let source = write_png(&root, "texture.png");

	let first = request_and_wait(&thumbnailer, &source, Priority::Visible).await;
	assert_eq!(first.origin, ThumbnailOrigin::Fresh);

	// Rewrite the file with a different mtime; the cache key changes with it.
	RgbaImage::from_pixel(400, 300, Rgba([200, 10, 30, 255]))
		.save(&source)
		.unwrap();
	filetime::set_file_mtime(
		&source,
		filetime::FileTime::from_system_time(SystemTime::now() + Duration::from_secs(30)),
	)
	.unwrap();

	let second = request_and_wait(&thumbnailer, &source, Priority::Visible).await;
	assert_eq!(second.origin, ThumbnailOrigin::Fresh);
	assert_eq!(
		second.bitmap.get_pixel(100, 75)[0],
		200,
		"must show the new content, not the cached old one"
	);
}

#[tokio::test]
async fn corrupt_source_delivers_a_corrupt_placeholder() {
	let root = tempfile::tempdir().unwrap();
	let thumbnailer = Thumbnailer::new(config(&root)).await.unwrap();

	let source = root.path().join("broken.png");
	std::fs::write(&source, b"not an image at all").unwrap();

	let thumb = request_and_wait(&thumbnailer, &source, Priority::Visible).await;
	assert_eq!(
		thumb.origin,
		ThumbnailOrigin::Placeholder(PlaceholderKind::Corrupt)
	);
	assert_eq!(thumb.bitmap.dimensions(), (200, 150));

	// Placeholders are never cached; the next request tries again.
	let again = request_and_wait(&thumbnailer, &source, Priority::Visible).await;
	assert_eq!(
		again.origin,
		ThumbnailOrigin::Placeholder(PlaceholderKind::Corrupt)
	);
}

#[tokio::test]
async fn unsupported_format_delivers_its_tile_without_decoding() {
	let root = tempfile::tempdir().unwrap();
	let thumbnailer = Thumbnailer::new(config(&root)).await.unwrap();

	let source = root.path().join("rig.ma");
	std::fs::write(&source, b"//Maya ASCII scene").unwrap();

	let thumb = request_and_wait(&thumbnailer, &source, Priority::Background).await;
	assert_eq!(
		thumb.origin,
		ThumbnailOrigin::Placeholder(PlaceholderKind::Unsupported)
	);

	let stats = thumbnailer.stats().await;
	assert_eq!(stats.generated, 0);
}

#[tokio::test]
async fn clear_caches_forces_fresh_decodes() {
	let root = tempfile::tempdir().unwrap();
	let thumbnailer = Thumbnailer::new(config(&root)).await.unwrap();
	let source = write_png(&root, "photo.png");

	request_and_wait(&thumbnailer, &source, Priority::Visible).await;
	thumbnailer.clear_caches().await;

	let thumb = request_and_wait(&thumbnailer, &source, Priority::Visible).await;
	assert_eq!(thumb.origin, ThumbnailOrigin::Fresh);
}

#[tokio::test]
async fn invalidate_drops_the_entry_for_an_unchanged_mtime() {
	let root = tempfile::tempdir().unwrap();
	let thumbnailer = Thumbnailer::new(config(&root)).await.unwrap();
	let source = write_png(&root, "photo.png");

	request_and_wait(&thumbnailer, &source, Priority::Visible).await;
	thumbnailer.invalidate(&source).await;

	let thumb = request_and_wait(&thumbnailer, &source, Priority::Visible).await;
	assert_eq!(
		thumb.origin,
		ThumbnailOrigin::Fresh,
		"invalidation must bypass both tiers even though the mtime is unchanged"
	);
}
