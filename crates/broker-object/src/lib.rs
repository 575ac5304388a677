//! Object-Store Uploader (module G).
//!
//! Wraps an `object_store::ObjectStore` (GCS in production) behind the
//! two operations the worker loop needs: upload a rotated result chunk,
//! and upload the final `manifest.json`. Each job gets its own prefix,
//! `jobs/<job_id>/`, matching the Python original's GCS URI layout
//! `gs://<bucket>/jobs/<job_id>/part-NNNNN.csv.gz`.

pub mod error;

use std::sync::Arc;

use bytes::Bytes;
use broker_core::Manifest;
use object_store::gcp::GoogleCloudStorageBuilder;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, PutPayload};

pub use error::ObjectError;
pub type Result<T> = std::result::Result<T, ObjectError>;

pub struct ObjectUploader {
    store: Arc<dyn ObjectStore>,
    bucket: String,
}

impl ObjectUploader {
    /// Build an uploader against a real GCS bucket. Authentication is
    /// resolved the way `object_store`'s GCS builder normally does
    /// (application-default credentials or `GOOGLE_APPLICATION_CREDENTIALS`).
    pub fn new_gcs(bucket: &str) -> anyhow::Result<Self> {
        let store = GoogleCloudStorageBuilder::new()
            .with_bucket_name(bucket)
            .build()?;
        Ok(Self {
            store: Arc::new(store),
            bucket: bucket.to_string(),
        })
    }

    /// Build an uploader against an arbitrary `ObjectStore` backend.
    /// Used directly by this crate's own tests against `InMemory`, and
    /// by other crates' worker-loop tests that need an uploader
    /// without a live GCS bucket.
    pub fn new_with_store(store: Arc<dyn ObjectStore>, bucket: &str) -> Self {
        Self {
            store,
            bucket: bucket.to_string(),
        }
    }

    fn prefix_for(&self, job_id: &str) -> String {
        format!("jobs/{job_id}")
    }

    fn chunk_path(&self, job_id: &str, part: u32) -> ObjectPath {
        ObjectPath::from(format!("{}/part-{:05}.csv.gz", self.prefix_for(job_id), part))
    }

    fn manifest_path(&self, job_id: &str) -> ObjectPath {
        ObjectPath::from(format!("{}/manifest.json", self.prefix_for(job_id)))
    }

    /// URI the broker returns to clients for a chunk, `gs://bucket/jobs/<id>/part-NNNNN.csv.gz`.
    pub fn chunk_uri(&self, job_id: &str, part: u32) -> String {
        format!("gs://{}/{}", self.bucket, self.chunk_path(job_id, part))
    }

    pub async fn upload_chunk(&self, job_id: &str, part: u32, gzipped_csv: Vec<u8>) -> Result<String> {
        let path = self.chunk_path(job_id, part);
        self.store
            .put(&path, PutPayload::from_bytes(Bytes::from(gzipped_csv)))
            .await?;
        Ok(self.chunk_uri(job_id, part))
    }

    pub async fn upload_manifest(&self, job_id: &str, manifest: &Manifest) -> Result<String> {
        let path = self.manifest_path(job_id);
        let body = serde_json::to_vec_pretty(manifest)?;
        self.store
            .put(&path, PutPayload::from_bytes(Bytes::from(body)))
            .await?;
        Ok(format!("gs://{}/{}", self.bucket, path))
    }

    /// Fetch and parse a job's uploaded `manifest.json` back out of the
    /// bucket. `GetResultManifest` only ever hands clients the stored
    /// URI and never calls this itself; it exists for callers (and
    /// tests) that need the manifest's actual contents.
    pub async fn download_manifest(&self, job_id: &str) -> Result<Manifest> {
        let path = self.manifest_path(job_id);
        let result = self.store.get(&path).await?;
        let bytes = result.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Builds a per-job `ObjectUploader` targeting whatever bucket that
/// job's own payload names (its `gcs_bucket` field), instead of fixing
/// one bucket for a worker process's entire lifetime.
pub trait UploaderFactory: Send + Sync {
    fn uploader_for(&self, bucket: &str) -> anyhow::Result<ObjectUploader>;
}

/// Production factory: builds a fresh GCS-backed uploader for each
/// bucket name a job requests.
pub struct GcsUploaderFactory;

impl UploaderFactory for GcsUploaderFactory {
    fn uploader_for(&self, bucket: &str) -> anyhow::Result<ObjectUploader> {
        ObjectUploader::new_gcs(bucket)
    }
}

/// Every bucket name maps to the same backing `ObjectStore`. Used by
/// tests (and any deployment backed by a single non-GCS store) to
/// exercise per-job bucket routing without live GCS credentials.
pub struct StaticUploaderFactory {
    store: Arc<dyn ObjectStore>,
}

impl StaticUploaderFactory {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }
}

impl UploaderFactory for StaticUploaderFactory {
    fn uploader_for(&self, bucket: &str) -> anyhow::Result<ObjectUploader> {
        Ok(ObjectUploader::new_with_store(self.store.clone(), bucket))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use broker_core::{ChunkDescriptor, ManifestMeta, ResultFormat};
    use object_store::memory::InMemory;

    fn uploader() -> ObjectUploader {
        ObjectUploader::new_with_store(Arc::new(InMemory::new()), "test-bucket")
    }

    #[test]
    fn chunk_uri_matches_expected_gcs_layout() {
        let uploader = uploader();
        assert_eq!(
            uploader.chunk_uri("job-1", 0),
            "gs://test-bucket/jobs/job-1/part-00000.csv.gz"
        );
        assert_eq!(
            uploader.chunk_uri("job-1", 12),
            "gs://test-bucket/jobs/job-1/part-00012.csv.gz"
        );
    }

    #[tokio::test]
    async fn upload_chunk_writes_under_job_prefix() {
        let uploader = uploader();
        let uri = uploader
            .upload_chunk("job-2", 0, b"fake gzip bytes".to_vec())
            .await
            .unwrap();
        assert_eq!(uri, "gs://test-bucket/jobs/job-2/part-00000.csv.gz");
    }

    #[tokio::test]
    async fn upload_manifest_roundtrips() {
        let uploader = uploader();
        let manifest = Manifest {
            columns: vec!["a".into(), "b".into()],
            row_count: 2,
            format: ResultFormat::Csv,
            compression: "gzip".into(),
            chunks: vec![ChunkDescriptor {
                uri: uploader.chunk_uri("job-3", 0),
                rows: 2,
                bytes: 42,
            }],
            meta: ManifestMeta::default(),
        };
        let uri = uploader.upload_manifest("job-3", &manifest).await.unwrap();
        assert_eq!(uri, "gs://test-bucket/jobs/job-3/manifest.json");

        let fetched = uploader.download_manifest("job-3").await.unwrap();
        assert_eq!(fetched.row_count, 2);
        assert_eq!(fetched.chunks.len(), 1);
    }

    #[test]
    fn static_factory_routes_different_buckets_to_the_same_store() {
        let factory = StaticUploaderFactory::new(Arc::new(InMemory::new()));
        let a = factory.uploader_for("bucket-a").unwrap();
        let b = factory.uploader_for("bucket-b").unwrap();
        assert_eq!(a.chunk_uri("job-1", 0), "gs://bucket-a/jobs/job-1/part-00000.csv.gz");
        assert_eq!(b.chunk_uri("job-1", 0), "gs://bucket-b/jobs/job-1/part-00000.csv.gz");
    }
}
