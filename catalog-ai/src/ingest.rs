//! Record loading and image resolution
//!
//! Records arrive as JSON (array or single object) or JSONL files. Before
//! enrichment every record needs a locally readable, decodable image:
//!
//! - `image_path` set: the file must exist, carry a supported extension and decode
//! - `image_url` set: the image is downloaded into the cache directory under a
//!   content-addressed name (`<slug>_<sha256[..10]><ext>`), reused if present,
//!   and removed again if it fails to decode
//! - neither set: `missing_image_source`

use crate::error::{ErrorType, IngestError};
use crate::types::{IngestedProductRecord, RawProductRecord};
use async_trait::async_trait;
use catalog_common::{AppConfig, Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Image extensions accepted for local files and downloads
pub const SUPPORTED_EXTENSIONS: [&str; 5] = [".jpg", ".jpeg", ".png", ".webp", ".bmp"];

const DEFAULT_EXTENSION: &str = ".jpg";

// ============================================================================
// Record files
// ============================================================================

/// Read a `.json` array or object, or a `.jsonl` file, into raw JSON objects
pub fn read_json_payload(path: &Path) -> Result<Vec<serde_json::Value>> {
    let suffix = extension_of(path);
    match suffix.as_str() {
        ".json" => {
            let text = fs::read_to_string(path)?;
            match serde_json::from_str::<serde_json::Value>(&text)? {
                serde_json::Value::Array(items) => Ok(items),
                item @ serde_json::Value::Object(_) => Ok(vec![item]),
                _ => Err(Error::InvalidInput(
                    "JSON file must contain a record or a list of records".to_string(),
                )),
            }
        }
        ".jsonl" => {
            let reader = BufReader::new(fs::File::open(path)?);
            let mut items = Vec::new();
            for line in reader.lines() {
                let line = line?;
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let item: serde_json::Value = serde_json::from_str(trimmed)?;
                if !item.is_object() {
                    return Err(Error::InvalidInput(
                        "Each JSONL line must decode to an object".to_string(),
                    ));
                }
                items.push(item);
            }
            Ok(items)
        }
        _ => Err(Error::InvalidInput(format!(
            "Unsupported file format for {}. Use .json or .jsonl inputs.",
            path.display()
        ))),
    }
}

/// Load and deserialize records from a `.json` or `.jsonl` file
pub fn load_records<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    read_json_payload(path)?
        .into_iter()
        .map(|item| serde_json::from_value(item).map_err(Error::from))
        .collect()
}

/// Write items as JSON lines, creating parent directories
pub fn write_jsonl<T, I>(path: &Path, items: I) -> Result<()>
where
    T: Serialize,
    I: IntoIterator<Item = T>,
{
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let mut writer = BufWriter::new(fs::File::create(path)?);
    for item in items {
        serde_json::to_writer(&mut writer, &item)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}

// ============================================================================
// Image resolution
// ============================================================================

/// Settings for one resolution pass
#[derive(Debug, Clone, PartialEq)]
pub struct ResolveOptions {
    pub cache_dir: PathBuf,
    pub timeout: Duration,
    /// Stop a bulk pass at the first failure
    pub fail_fast: bool,
}

impl ResolveOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            cache_dir: config.cache_dir.clone(),
            timeout: config.ingest_timeout,
            fail_fast: config.fail_fast,
        }
    }
}

/// Turns a raw record into one with a guaranteed local image
#[async_trait]
pub trait ImageResolver: Send + Sync {
    async fn resolve(
        &self,
        record: RawProductRecord,
        options: &ResolveOptions,
    ) -> std::result::Result<IngestedProductRecord, IngestError>;
}

/// Resolve a set of records, collecting per-record errors
///
/// With `fail_fast` the first error is returned instead.
pub async fn resolve_images(
    resolver: &dyn ImageResolver,
    records: Vec<RawProductRecord>,
    options: &ResolveOptions,
) -> std::result::Result<(Vec<IngestedProductRecord>, Vec<IngestError>), IngestError> {
    let mut ingested = Vec::with_capacity(records.len());
    let mut errors = Vec::new();

    for record in records {
        match resolver.resolve(record, options).await {
            Ok(item) => ingested.push(item),
            Err(err) if options.fail_fast => return Err(err),
            Err(err) => {
                tracing::warn!(
                    product_id = %err.product_id,
                    error_type = %err.error_type,
                    "Image resolution failed: {}",
                    err.message
                );
                errors.push(err);
            }
        }
    }

    Ok((ingested, errors))
}

/// Filesystem + HTTP image resolver
pub struct LocalImageResolver {
    http_client: reqwest::Client,
}

impl LocalImageResolver {
    pub fn new() -> std::result::Result<Self, IngestError> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("catalog-ai/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| IngestError::new("", ErrorType::NetworkError, e.to_string()))?;
        Ok(Self { http_client })
    }

    async fn validate_existing(
        &self,
        product_id: &str,
        path: PathBuf,
    ) -> std::result::Result<PathBuf, IngestError> {
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(IngestError::new(
                product_id,
                ErrorType::MissingLocalFile,
                format!("Local image not found: {}", path.display()),
            ));
        }
        let ext = extension_of(&path);
        if !SUPPORTED_EXTENSIONS.contains(&ext.as_str()) {
            return Err(IngestError::new(
                product_id,
                ErrorType::UnsupportedImageType,
                format!("Unsupported image type '{}'", ext),
            ));
        }
        verify_image(product_id, &path).await?;
        Ok(path)
    }

    async fn download(
        &self,
        product_id: &str,
        image_url: &str,
        options: &ResolveOptions,
    ) -> std::result::Result<PathBuf, IngestError> {
        let ext = infer_extension(image_url).map_err(|ext| {
            IngestError::new(
                product_id,
                ErrorType::UnsupportedImageType,
                format!("Unsupported image type '{}'", ext),
            )
        })?;
        let destination = options
            .cache_dir
            .join(cached_filename(product_id, image_url, &ext));

        if tokio::fs::try_exists(&destination).await.unwrap_or(false) {
            tracing::debug!(product_id = %product_id, path = %destination.display(), "Image cache hit");
            verify_image(product_id, &destination).await?;
            return Ok(destination);
        }

        tokio::fs::create_dir_all(&options.cache_dir)
            .await
            .map_err(|e| IngestError::new(product_id, ErrorType::NetworkError, e.to_string()))?;

        let network_error = |e: reqwest::Error| {
            IngestError::new(
                product_id,
                ErrorType::NetworkError,
                format!("Failed to download {}: {}", image_url, e),
            )
        };
        let bytes = self
            .http_client
            .get(image_url)
            .timeout(options.timeout)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(network_error)?
            .bytes()
            .await
            .map_err(network_error)?;

        tokio::fs::write(&destination, &bytes)
            .await
            .map_err(|e| IngestError::new(product_id, ErrorType::NetworkError, e.to_string()))?;

        if let Err(err) = verify_image(product_id, &destination).await {
            let _ = tokio::fs::remove_file(&destination).await;
            return Err(err);
        }

        tracing::debug!(
            product_id = %product_id,
            bytes = bytes.len(),
            path = %destination.display(),
            "Downloaded image"
        );
        Ok(destination)
    }
}

#[async_trait]
impl ImageResolver for LocalImageResolver {
    async fn resolve(
        &self,
        record: RawProductRecord,
        options: &ResolveOptions,
    ) -> std::result::Result<IngestedProductRecord, IngestError> {
        let image_local_path = if let Some(path) = record.image_path.as_deref() {
            self.validate_existing(&record.product_id, PathBuf::from(path))
                .await?
        } else if let Some(url) = record.image_url.as_deref() {
            self.download(&record.product_id, url, options).await?
        } else {
            return Err(IngestError::new(
                &record.product_id,
                ErrorType::MissingImageSource,
                "Record is missing both image_url and image_path",
            ));
        };

        Ok(IngestedProductRecord {
            record,
            image_local_path,
        })
    }
}

/// Decode the image off the async runtime
async fn verify_image(product_id: &str, path: &Path) -> std::result::Result<(), IngestError> {
    let owned = path.to_path_buf();
    let decoded = tokio::task::spawn_blocking(move || image::open(&owned).map(|_| ()))
        .await
        .map_err(|e| e.to_string())
        .and_then(|result| result.map_err(|e| e.to_string()));

    decoded.map_err(|reason| {
        IngestError::new(
            product_id,
            ErrorType::DecodeFailure,
            format!("Unable to decode image at {}: {}", path.display(), reason),
        )
    })
}

/// Lowercased extension with leading dot, or empty
fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|ext| format!(".{}", ext.to_string_lossy().to_lowercase()))
        .unwrap_or_default()
}

/// Extension of the URL path (query stripped); `Err` carries an unsupported extension
fn infer_extension(image_url: &str) -> std::result::Result<String, String> {
    let without_query = image_url.split(['?', '#']).next().unwrap_or(image_url);
    let last_segment = without_query.rsplit('/').next().unwrap_or(without_query);
    let ext = extension_of(Path::new(last_segment));
    if ext.is_empty() {
        return Ok(DEFAULT_EXTENSION.to_string());
    }
    if SUPPORTED_EXTENSIONS.contains(&ext.as_str()) {
        Ok(ext)
    } else {
        Err(ext)
    }
}

/// `<slug>_<sha256(url)[..10]><ext>`
fn cached_filename(product_id: &str, image_url: &str, ext: &str) -> String {
    let mut slug = String::with_capacity(product_id.len());
    for c in product_id.to_lowercase().chars() {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            slug.push(c);
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let slug = slug.trim_matches('-');
    let slug = if slug.is_empty() { "product" } else { slug };
    let digest = format!("{:x}", Sha256::digest(image_url.as_bytes()));
    format!("{}_{}{}", slug, &digest[..10], ext)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_png(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        image::RgbImage::from_pixel(4, 4, image::Rgb([200, 120, 40]))
            .save(&path)
            .unwrap();
        path
    }

    fn options(dir: &Path) -> ResolveOptions {
        ResolveOptions {
            cache_dir: dir.join("cache"),
            timeout: Duration::from_secs(1),
            fail_fast: false,
        }
    }

    fn record(id: &str) -> RawProductRecord {
        RawProductRecord {
            product_id: id.to_string(),
            title: "Sofa".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_cached_filename() {
        let name = cached_filename("SKU 12/Blue", "https://cdn/x.png", ".png");
        assert!(name.starts_with("sku-12-blue_"));
        assert!(name.ends_with(".png"));
        assert_eq!(name.len(), "sku-12-blue_".len() + 10 + 4);
        assert!(cached_filename("///", "u", ".jpg").starts_with("product_"));
    }

    #[test]
    fn test_infer_extension() {
        assert_eq!(infer_extension("https://cdn/a/b.PNG?x=1").unwrap(), ".png");
        assert_eq!(infer_extension("https://cdn/a/b").unwrap(), ".jpg");
        assert_eq!(infer_extension("https://cdn/a.b/c").unwrap(), ".jpg");
        assert_eq!(infer_extension("https://cdn/a/b.gif").unwrap_err(), ".gif");
    }

    #[tokio::test]
    async fn test_resolve_local_image() {
        let dir = TempDir::new().unwrap();
        let path = write_png(dir.path(), "p1.png");
        let mut raw = record("p1");
        raw.image_path = Some(path.to_string_lossy().to_string());

        let resolver = LocalImageResolver::new().unwrap();
        let ingested = resolver.resolve(raw, &options(dir.path())).await.unwrap();
        assert_eq!(ingested.image_local_path, path);
    }

    #[tokio::test]
    async fn test_resolve_error_tags() {
        let dir = TempDir::new().unwrap();
        let resolver = LocalImageResolver::new().unwrap();
        let opts = options(dir.path());

        let err = resolver.resolve(record("none"), &opts).await.unwrap_err();
        assert_eq!(err.error_type, ErrorType::MissingImageSource);

        let mut missing = record("missing");
        missing.image_path = Some(dir.path().join("nope.jpg").to_string_lossy().to_string());
        let err = resolver.resolve(missing, &opts).await.unwrap_err();
        assert_eq!(err.error_type, ErrorType::MissingLocalFile);

        let gif = dir.path().join("anim.gif");
        fs::write(&gif, b"GIF89a").unwrap();
        let mut unsupported = record("gif");
        unsupported.image_path = Some(gif.to_string_lossy().to_string());
        let err = resolver.resolve(unsupported, &opts).await.unwrap_err();
        assert_eq!(err.error_type, ErrorType::UnsupportedImageType);

        let corrupt = dir.path().join("corrupt.jpg");
        fs::write(&corrupt, b"not an image").unwrap();
        let mut bad = record("bad");
        bad.image_path = Some(corrupt.to_string_lossy().to_string());
        let err = resolver.resolve(bad, &opts).await.unwrap_err();
        assert_eq!(err.error_type, ErrorType::DecodeFailure);
        assert_eq!(err.product_id, "bad");

        let mut gif_url = record("gif-url");
        gif_url.image_url = Some("https://cdn.example/a.gif".to_string());
        let err = resolver.resolve(gif_url, &opts).await.unwrap_err();
        assert_eq!(err.error_type, ErrorType::UnsupportedImageType);
    }

    #[tokio::test]
    async fn test_download_cache_hit_skips_network() {
        let dir = TempDir::new().unwrap();
        let opts = options(dir.path());
        fs::create_dir_all(&opts.cache_dir).unwrap();

        // Unroutable host: only a cache hit can succeed
        let url = "http://127.0.0.1:9/images/p7.png";
        let cached = cached_filename("p7", url, ".png");
        write_png(&opts.cache_dir, &cached);

        let mut raw = record("p7");
        raw.image_url = Some(url.to_string());
        let ingested = LocalImageResolver::new()
            .unwrap()
            .resolve(raw, &opts)
            .await
            .unwrap();
        assert_eq!(ingested.image_local_path, opts.cache_dir.join(cached));
    }

    #[tokio::test]
    async fn test_resolve_images_fail_fast() {
        let dir = TempDir::new().unwrap();
        let resolver = LocalImageResolver::new().unwrap();
        let mut opts = options(dir.path());

        let records = vec![record("a"), record("b")];
        let (ok, errors) = resolve_images(&resolver, records.clone(), &opts).await.unwrap();
        assert!(ok.is_empty());
        assert_eq!(errors.len(), 2);

        opts.fail_fast = true;
        let err = resolve_images(&resolver, records, &opts).await.unwrap_err();
        assert_eq!(err.product_id, "a");
    }

    #[test]
    fn test_load_json_and_jsonl() {
        let dir = TempDir::new().unwrap();
        let json = dir.path().join("records.json");
        fs::write(&json, r#"[{"product_id": "p1", "title": "Sofa"}]"#).unwrap();
        let jsonl = dir.path().join("records.jsonl");
        fs::write(
            &jsonl,
            "{\"product_id\": \"p1\", \"title\": \"A\"}\n\n{\"product_id\": \"p2\", \"title\": \"B\"}\n",
        )
        .unwrap();

        let from_json: Vec<RawProductRecord> = load_records(&json).unwrap();
        let from_jsonl: Vec<RawProductRecord> = load_records(&jsonl).unwrap();
        assert_eq!(from_json.len(), 1);
        assert_eq!(from_jsonl[1].product_id, "p2");

        let single = dir.path().join("single.json");
        fs::write(&single, r#"{"product_id": "p9", "title": "Lamp"}"#).unwrap();
        let from_single: Vec<RawProductRecord> = load_records(&single).unwrap();
        assert_eq!(from_single.len(), 1);
        assert_eq!(from_single[0].product_id, "p9");

        let scalar = dir.path().join("scalar.json");
        fs::write(&scalar, "42").unwrap();
        assert!(matches!(
            load_records::<RawProductRecord>(&scalar),
            Err(Error::InvalidInput(_))
        ));

        let csv = dir.path().join("records.csv");
        fs::write(&csv, "product_id\n").unwrap();
        assert!(matches!(
            load_records::<RawProductRecord>(&csv),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_write_jsonl_roundtrip() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("nested/out.jsonl");
        write_jsonl(&out, vec![record("p1"), record("p2")]).unwrap();

        let loaded: Vec<RawProductRecord> = load_records(&out).unwrap();
        assert_eq!(loaded, vec![record("p1"), record("p2")]);
    }
}
