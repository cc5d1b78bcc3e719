//! Mock converter for testing.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::converter::{ConversionJob, ConversionResult, Converter, ConverterError};

/// How the mock reacts to a given input file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockBehavior {
    /// Write a small output file where a real converter would.
    Success,
    /// Exit unsuccessfully with the given code.
    Fail(i32),
    /// Report a timeout as if the process had been killed.
    Timeout,
    /// Report success but leave no output behind.
    NoOutput,
    /// Fail to start at all.
    LaunchError,
}

/// A recorded conversion job for test assertions.
#[derive(Debug, Clone)]
pub struct RecordedConversion {
    /// The job that was submitted.
    pub job: ConversionJob,
    /// Whether the conversion succeeded.
    pub success: bool,
}

/// Mock implementation of the Converter trait.
///
/// Behavior is scripted per input file name, defaulting to
/// [`MockBehavior::Success`]. Every call is recorded, and the highest number
/// of overlapping calls is tracked so tests can check the parallelism bound.
///
/// # Example
///
/// ```rust,ignore
/// use docbatch_core::testing::{MockBehavior, MockConverter};
///
/// let converter = MockConverter::new();
/// converter.set_behavior("broken.docx", MockBehavior::Fail(1)).await;
/// converter.set_delay(Duration::from_millis(20)).await;
///
/// // ... run a batch ...
///
/// assert_eq!(converter.conversion_count().await, 3);
/// ```
#[derive(Debug)]
pub struct MockConverter {
    target_format: String,
    behaviors: Arc<RwLock<HashMap<String, MockBehavior>>>,
    conversions: Arc<RwLock<Vec<RecordedConversion>>>,
    /// Simulated conversion duration.
    delay: Arc<RwLock<Duration>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl Default for MockConverter {
    fn default() -> Self {
        Self::new()
    }
}

impl MockConverter {
    /// Create a new mock converter producing `pdf` files.
    pub fn new() -> Self {
        Self::with_format("pdf")
    }

    pub fn with_format(target_format: impl Into<String>) -> Self {
        Self {
            target_format: target_format.into(),
            behaviors: Arc::new(RwLock::new(HashMap::new())),
            conversions: Arc::new(RwLock::new(Vec::new())),
            delay: Arc::new(RwLock::new(Duration::ZERO)),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Script the behavior for inputs with this file name.
    pub async fn set_behavior(&self, file_name: impl Into<String>, behavior: MockBehavior) {
        self.behaviors.write().await.insert(file_name.into(), behavior);
    }

    /// Set the simulated conversion duration.
    pub async fn set_delay(&self, delay: Duration) {
        *self.delay.write().await = delay;
    }

    /// Get all recorded conversions.
    pub async fn recorded_conversions(&self) -> Vec<RecordedConversion> {
        self.conversions.read().await.clone()
    }

    /// Get the number of conversions performed.
    pub async fn conversion_count(&self) -> usize {
        self.conversions.read().await.len()
    }

    /// Profile directories handed to the converter, in call order.
    pub async fn profile_dirs(&self) -> Vec<PathBuf> {
        self.conversions
            .read()
            .await
            .iter()
            .map(|c| c.job.profile_dir.clone())
            .collect()
    }

    /// Highest number of conversions that ran at the same time.
    pub fn max_concurrency(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn behavior_for(&self, job: &ConversionJob) -> MockBehavior {
        let name = job
            .input_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.behaviors
            .read()
            .await
            .get(&name)
            .cloned()
            .unwrap_or(MockBehavior::Success)
    }

    async fn run(&self, job: &ConversionJob) -> Result<ConversionResult, ConverterError> {
        let started = Instant::now();
        let delay = *self.delay.read().await;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let output_path = job.expected_output(&self.target_format);
        match self.behavior_for(job).await {
            MockBehavior::Success => {
                let contents = format!("converted:{}", job.input_path.display());
                tokio::fs::create_dir_all(&job.output_dir).await?;
                tokio::fs::write(&output_path, contents.as_bytes()).await?;
                Ok(ConversionResult {
                    job_id: job.job_id.clone(),
                    unit_id: job.unit_id,
                    output_path,
                    output_size_bytes: contents.len() as u64,
                    duration_ms: started.elapsed().as_millis() as u64,
                })
            }
            MockBehavior::Fail(code) => Err(ConverterError::ConversionFailed {
                exit_code: Some(code),
                stderr: Some("mock conversion failure".to_string()),
            }),
            MockBehavior::Timeout => Err(ConverterError::Timeout {
                timeout: job.timeout,
            }),
            MockBehavior::NoOutput => Err(ConverterError::OutputMissing { path: output_path }),
            MockBehavior::LaunchError => Err(ConverterError::Launch(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "mock converter missing",
            ))),
        }
    }
}

#[async_trait]
impl Converter for MockConverter {
    fn name(&self) -> &str {
        "mock"
    }

    fn target_format(&self) -> &str {
        &self.target_format
    }

    async fn convert(&self, job: ConversionJob) -> Result<ConversionResult, ConverterError> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        let result = self.run(&job).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.conversions.write().await.push(RecordedConversion {
            job,
            success: result.is_ok(),
        });
        result
    }

    async fn validate(&self) -> Result<(), ConverterError> {
        Ok(())
    }
}
