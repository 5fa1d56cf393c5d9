//! Download, rasterize, recognize, clean up.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dms_core::{FileType, ProcessingRoute, StorageLocator};
use dms_storage::ObjectStore;

use crate::engine::{Ghostscript, Rasterizer, Recognizer, Tesseract};
use crate::{OcrConfig, OcrError, Result, ScratchSpace, Stage, TRACING_TARGET_PIPELINE};

const RASTER_EXTENSION: &str = "png";

/// Text extracted from one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    /// Recognized text, possibly empty.
    pub text: String,
    /// Resolved locator of the processed blob.
    pub locator: StorageLocator,
    /// Route the document took through the pipeline.
    pub route: ProcessingRoute,
    /// Wall time of the whole run.
    pub elapsed: Duration,
}

impl Extraction {
    /// Returns `true` when recognition succeeded but found no text.
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// OCR pipeline turning a blob locator into text.
///
/// Every run works in its own [`ScratchSpace`], so concurrent runs never
/// share files and nothing is left behind once [`OcrPipeline::process`]
/// returns.
#[derive(Clone)]
pub struct OcrPipeline {
    store: ObjectStore,
    rasterizer: Arc<dyn Rasterizer>,
    recognizer: Arc<dyn Recognizer>,
    config: Arc<OcrConfig>,
}

impl OcrPipeline {
    /// Creates a pipeline with explicit engines.
    pub fn new(
        store: ObjectStore,
        rasterizer: Arc<dyn Rasterizer>,
        recognizer: Arc<dyn Recognizer>,
        config: OcrConfig,
    ) -> Self {
        Self {
            store,
            rasterizer,
            recognizer,
            config: Arc::new(config),
        }
    }

    /// Creates a pipeline running Ghostscript and Tesseract.
    pub fn from_config(store: ObjectStore, config: OcrConfig) -> Result<Self> {
        config.validate()?;
        let rasterizer = Arc::new(Ghostscript::new(&config));
        let recognizer = Arc::new(Tesseract::new(&config));
        Ok(Self::new(store, rasterizer, recognizer, config))
    }

    /// Returns the pipeline configuration.
    pub fn config(&self) -> &OcrConfig {
        &self.config
    }

    /// Extracts the text of the document at `locator`.
    #[tracing::instrument(skip(self), target = TRACING_TARGET_PIPELINE)]
    pub async fn process(&self, locator: &str) -> Result<Extraction> {
        let started = Instant::now();
        let result = self.run(locator, started).await;

        match &result {
            Ok(extraction) => tracing::info!(
                target: TRACING_TARGET_PIPELINE,
                locator = %extraction.locator,
                characters = extraction.text.chars().count(),
                empty = extraction.is_empty(),
                elapsed_ms = extraction.elapsed.as_millis() as u64,
                "Text extracted"
            ),
            Err(err) => tracing::error!(
                target: TRACING_TARGET_PIPELINE,
                locator,
                stage = %err.stage(),
                kind = %err.kind(),
                error = %err,
                "Text extraction failed"
            ),
        }
        result
    }

    async fn run(&self, locator: &str, started: Instant) -> Result<Extraction> {
        let locator = StorageLocator::parse_with_default(locator, &self.config.default_bucket)
            .map_err(OcrError::InvalidLocator)?;
        let file_name = locator.file_name().to_owned();
        let file_type = FileType::from_file_name(&file_name).map_err(OcrError::InvalidLocator)?;

        let route = file_type.processing_route();
        if route == ProcessingRoute::Unsupported {
            return Err(OcrError::UnsupportedFileType(file_type.to_string()));
        }

        let scratch = ScratchSpace::create(self.config.scratch_dir.as_deref())?;
        let result = self.run_in(&scratch, &locator, &file_name, route).await;
        scratch.close();

        result.map(|text| Extraction {
            text,
            locator,
            route,
            elapsed: started.elapsed(),
        })
    }

    async fn run_in(
        &self,
        scratch: &ScratchSpace,
        locator: &StorageLocator,
        file_name: &str,
        route: ProcessingRoute,
    ) -> Result<String> {
        let input = scratch.file(file_name);
        self.download(locator, &input).await?;

        let stem = Path::new(file_name)
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or(file_name);

        let image = match route {
            ProcessingRoute::Rasterize => {
                let image = scratch.file(&format!("{stem}.{RASTER_EXTENSION}"));
                self.rasterizer.rasterize(&input, &image).await?;
                tracing::debug!(
                    target: TRACING_TARGET_PIPELINE,
                    image = %image.display(),
                    "First page rasterized"
                );
                image
            }
            _ => input,
        };

        let text = self.recognizer.recognize(&image, &scratch.file(stem)).await?;
        Ok(text)
    }

    async fn download(&self, locator: &StorageLocator, target: &Path) -> Result<()> {
        let timeout = self.config.download_timeout();
        let get = self.store.get(locator.bucket(), locator.key());

        let data = tokio::time::timeout(timeout, get)
            .await
            .map_err(|_| OcrError::Timeout {
                stage: Stage::Download,
                timeout,
            })?
            .map_err(|source| OcrError::Download {
                locator: locator.to_string(),
                source,
            })?;

        tokio::fs::write(target, &data)
            .await
            .map_err(|e| OcrError::io(Stage::Download, "failed to write downloaded blob", e))?;

        tracing::debug!(
            target: TRACING_TARGET_PIPELINE,
            locator = %locator,
            size = data.len(),
            "Blob downloaded"
        );
        Ok(())
    }
}

impl std::fmt::Debug for OcrPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OcrPipeline")
            .field("store", &self.store)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Mutex;

    use bytes::Bytes;
    use dms_core::ErrorKind;

    use super::*;

    /// Records every path it touches and writes the files a real engine would.
    #[derive(Default)]
    struct FakeEngine {
        touched: Mutex<Vec<PathBuf>>,
        fail_recognition: bool,
        text: &'static str,
    }

    impl FakeEngine {
        fn touched(&self) -> Vec<PathBuf> {
            self.touched.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl Rasterizer for FakeEngine {
        async fn rasterize(&self, input: &Path, output: &Path) -> Result<()> {
            assert!(input.exists());
            tokio::fs::write(output, b"png").await.unwrap();
            self.touched
                .lock()
                .unwrap()
                .extend([input.to_path_buf(), output.to_path_buf()]);
            Ok(())
        }
    }

    #[async_trait::async_trait]
    impl Recognizer for FakeEngine {
        async fn recognize(&self, image: &Path, output_prefix: &Path) -> Result<String> {
            assert!(image.exists());
            let text_path = output_prefix.with_extension("txt");
            tokio::fs::write(&text_path, self.text).await.unwrap();
            self.touched
                .lock()
                .unwrap()
                .extend([image.to_path_buf(), text_path]);

            if self.fail_recognition {
                return Err(OcrError::ProcessFailed {
                    stage: Stage::Recognize,
                    tool: "tesseract",
                    status: "exit status: 1".into(),
                    stderr: "Error opening data file".into(),
                });
            }
            Ok(self.text.to_owned())
        }
    }

    async fn pipeline(engine: Arc<FakeEngine>, scratch: &Path) -> OcrPipeline {
        let store = ObjectStore::memory();
        store.create_bucket("uploads").await.unwrap();
        store
            .put("uploads", "report.pdf", Bytes::from_static(b"%PDF-1.7"), "application/pdf")
            .await
            .unwrap();
        store
            .put("uploads", "scan.png", Bytes::from_static(b"png"), "image/png")
            .await
            .unwrap();

        let config = OcrConfig::default().with_scratch_dir(scratch);
        OcrPipeline::new(store, engine.clone(), engine, config)
    }

    fn is_empty_dir(path: &Path) -> bool {
        std::fs::read_dir(path).unwrap().next().is_none()
    }

    #[tokio::test]
    async fn pdf_is_rasterized_recognized_and_cleaned_up() {
        let scratch = tempfile::tempdir().unwrap();
        let engine = Arc::new(FakeEngine {
            text: "Quarterly report",
            ..FakeEngine::default()
        });
        let pipeline = pipeline(engine.clone(), scratch.path()).await;

        let extraction = pipeline.process("minio://uploads/report.pdf").await.unwrap();
        assert_eq!(extraction.text, "Quarterly report");
        assert_eq!(extraction.route, ProcessingRoute::Rasterize);
        assert!(!extraction.is_empty());

        let names: Vec<_> = engine
            .touched()
            .iter()
            .map(|path| path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["report.pdf", "report.png", "report.png", "report.txt"]);

        assert!(engine.touched().iter().all(|path| !path.exists()));
        assert!(is_empty_dir(scratch.path()));
    }

    #[tokio::test]
    async fn images_skip_rasterization() {
        let scratch = tempfile::tempdir().unwrap();
        let engine = Arc::new(FakeEngine::default());
        let pipeline = pipeline(engine.clone(), scratch.path()).await;

        let extraction = pipeline.process("minio://uploads/scan.png").await.unwrap();
        assert_eq!(extraction.route, ProcessingRoute::RecognizeDirectly);
        assert!(extraction.is_empty());
        assert_eq!(engine.touched()[0].file_name().unwrap(), "scan.png");
        assert!(is_empty_dir(scratch.path()));
    }

    #[tokio::test]
    async fn scheme_less_locators_use_the_default_bucket() {
        let scratch = tempfile::tempdir().unwrap();
        let pipeline = pipeline(Arc::new(FakeEngine::default()), scratch.path()).await;

        let extraction = pipeline.process("/var/uploads/report.pdf").await.unwrap();
        assert_eq!(extraction.locator.bucket(), "uploads");
        assert_eq!(extraction.locator.key(), "report.pdf");
    }

    #[tokio::test]
    async fn recognition_failure_still_cleans_up() {
        let scratch = tempfile::tempdir().unwrap();
        let engine = Arc::new(FakeEngine {
            fail_recognition: true,
            ..FakeEngine::default()
        });
        let pipeline = pipeline(engine.clone(), scratch.path()).await;

        let err = pipeline.process("minio://uploads/report.pdf").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProcessFailed);
        assert_eq!(err.stage(), Stage::Recognize);
        assert!(engine.touched().iter().all(|path| !path.exists()));
        assert!(is_empty_dir(scratch.path()));
    }

    #[tokio::test]
    async fn missing_blob_is_not_found() {
        let scratch = tempfile::tempdir().unwrap();
        let pipeline = pipeline(Arc::new(FakeEngine::default()), scratch.path()).await;

        let err = pipeline.process("minio://uploads/missing.pdf").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.stage(), Stage::Download);
        assert!(is_empty_dir(scratch.path()));
    }

    #[tokio::test]
    async fn ineligible_documents_are_rejected_before_download() {
        let scratch = tempfile::tempdir().unwrap();
        let engine = Arc::new(FakeEngine::default());
        let pipeline = pipeline(engine.clone(), scratch.path()).await;

        let err = pipeline.process("minio://uploads/archive.zip").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unsupported);

        let err = pipeline.process("minio://uploads/").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);

        assert!(engine.touched().is_empty());
        assert!(is_empty_dir(scratch.path()));
    }
}
