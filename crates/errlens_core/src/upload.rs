//! crates/errlens_core/src/upload.rs
//!
//! The Upload Pipeline: validates a user-selected screenshot, recompresses it
//! when it is over the threshold, encodes it into a transport payload, and
//! submits it to the analysis backend with progress reporting and typed error
//! translation. Entitlement is re-read from the live Session snapshot at the
//! moment of submission, never cached from an earlier render.

use std::io::Cursor;
use std::sync::Arc;

use bytes::Bytes;
use image::imageops::FilterType;
use image::ImageFormat;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::{
    AnalysisRequest, AnalysisResult, ImageAsset, ImageKind, ResultSource, Solution,
    TransportPayload, ValidationOutcome, COMPRESSION_MAX_EDGE, COMPRESSION_THRESHOLD_BYTES,
    MAX_CONTEXT_CHARS, MAX_DIMENSION, MAX_IMAGE_BYTES, MIN_DIMENSION, MIN_IMAGE_BYTES,
};
use crate::errors::{CoreError, CoreResult};
use crate::ports::AnalysisBackend;
use crate::session::Synchronizer;

/// Share of overall progress reserved for the compression phase; encoding
/// takes the remainder up to 100.
const COMPRESSION_PROGRESS_CEILING: u8 = 70;

//=========================================================================================
// Pipeline State
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Empty,
    Validating,
    Ready,
    Compressing,
    Submitting,
    Succeeded,
    Failed,
}

/// Wraps a progress callback so reported values can never regress and never
/// exceed 100.
struct ProgressGuard<F: FnMut(u8)> {
    last: u8,
    emitted_any: bool,
    inner: F,
}

impl<F: FnMut(u8)> ProgressGuard<F> {
    fn new(inner: F) -> Self {
        Self {
            last: 0,
            emitted_any: false,
            inner,
        }
    }

    fn emit(&mut self, value: u8) {
        let value = value.min(100);
        if !self.emitted_any || value > self.last {
            self.last = value;
            self.emitted_any = true;
            (self.inner)(value);
        }
    }
}

//=========================================================================================
// Upload Pipeline
//=========================================================================================

/// One user-facing upload flow. `Empty → Validating → Ready → Compressing →
/// Submitting → {Succeeded | Failed}`, with `reset` returning to `Empty` from
/// any state.
pub struct UploadPipeline {
    backend: Arc<dyn AnalysisBackend>,
    synchronizer: Arc<Synchronizer>,
    state: PipelineState,
    asset: Option<ImageAsset>,
    validation: Option<ValidationOutcome>,
    result: Option<AnalysisResult>,
}

impl UploadPipeline {
    pub fn new(backend: Arc<dyn AnalysisBackend>, synchronizer: Arc<Synchronizer>) -> Self {
        Self {
            backend,
            synchronizer,
            state: PipelineState::Empty,
            asset: None,
            validation: None,
            result: None,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn asset(&self) -> Option<&ImageAsset> {
        self.asset.as_ref()
    }

    pub fn result(&self) -> Option<&AnalysisResult> {
        self.result.as_ref()
    }

    /// Releases the current selection and returns to the initial state.
    /// Safe to call in any state.
    pub fn reset(&mut self) {
        self.state = PipelineState::Empty;
        self.asset = None;
        self.validation = None;
        self.result = None;
    }

    //-------------------------------------------------------------------------------------
    // validate
    //-------------------------------------------------------------------------------------

    /// Validates a candidate file: byte-size bounds (inclusive), media-type
    /// allow-list via magic bytes, a mandatory decode probe, and pixel
    /// dimension bounds. A new selection replaces any previous one.
    pub fn validate(&mut self, bytes: Bytes) -> CoreResult<ValidationOutcome> {
        self.reset();
        self.state = PipelineState::Validating;

        let outcome = match probe_image(&bytes) {
            Ok((kind, outcome)) => {
                self.asset = Some(ImageAsset {
                    bytes,
                    media_type: kind,
                });
                self.validation = Some(outcome);
                self.state = PipelineState::Ready;
                outcome
            }
            Err(err) => {
                self.state = PipelineState::Empty;
                return Err(err);
            }
        };
        Ok(outcome)
    }

    //-------------------------------------------------------------------------------------
    // prepare_for_submission
    //-------------------------------------------------------------------------------------

    /// Recompresses the asset when flagged, then encodes the final bytes into
    /// the transport payload. Progress is reported monotonically from 0 to
    /// 100; compression owns the 0–70 range. A compression failure leaves the
    /// original asset untouched.
    pub fn prepare_for_submission(
        &mut self,
        progress: impl FnMut(u8),
    ) -> CoreResult<TransportPayload> {
        let (asset, validation) = match (&self.asset, &self.validation) {
            (Some(asset), Some(validation)) => (asset.clone(), *validation),
            _ => {
                return Err(CoreError::Validation(
                    "No validated image to prepare.".to_string(),
                ))
            }
        };

        let mut guard = ProgressGuard::new(progress);
        guard.emit(0);

        let final_bytes = if validation.needs_compression {
            self.state = PipelineState::Compressing;
            let compressed = compress(&asset, &mut guard);
            match compressed {
                Ok(bytes) => bytes,
                Err(err) => {
                    // The original selection survives a failed pass.
                    self.state = PipelineState::Ready;
                    return Err(err);
                }
            }
        } else {
            asset.bytes.clone()
        };
        guard.emit(COMPRESSION_PROGRESS_CEILING);

        let payload = encode_payload(&final_bytes, asset.media_type);
        guard.emit(100);

        self.state = PipelineState::Ready;
        Ok(payload)
    }

    //-------------------------------------------------------------------------------------
    // submit
    //-------------------------------------------------------------------------------------

    /// Submits the prepared payload. The entitlement check happens here, at
    /// the moment of the `Ready → Submitting` transition, because quota can
    /// change asynchronously. Usage is debited exactly once per attempt that
    /// reaches the backend or its offline-fallback substitute.
    pub async fn submit(
        &mut self,
        payload: &TransportPayload,
        context: Option<&str>,
    ) -> CoreResult<AnalysisResult> {
        if payload.data_url.is_empty() || !payload.is_image_data() {
            return Err(CoreError::Validation(
                "Submission payload is not image data.".to_string(),
            ));
        }
        if let Some(ctx) = context {
            if ctx.chars().count() > MAX_CONTEXT_CHARS {
                return Err(CoreError::Validation(
                    "Context must be 1000 characters or fewer.".to_string(),
                ));
            }
        }

        let session = self.synchronizer.snapshot();
        if !session.can_analyze() {
            // Rejected locally: no usage debit, no backend traffic.
            return Err(CoreError::Validation(
                "Analysis limit reached. Upgrade to Pro for unlimited analyses.".to_string(),
            ));
        }

        self.state = PipelineState::Submitting;
        let request = AnalysisRequest {
            image: payload.data_url.clone(),
            context: context.map(str::to_string),
            bearer: session.token().map(str::to_string),
        };

        match self.backend.analyze(&request).await {
            Ok(result) => {
                self.debit_usage().await;
                if result.analysis_id.is_none() {
                    warn!("analysis response missing identifier, continuing with degraded result");
                }
                self.state = PipelineState::Succeeded;
                self.result = Some(result.clone());
                Ok(result)
            }
            Err(CoreError::Unreachable(reason)) => {
                info!(%reason, "analysis backend unreachable, synthesizing offline fallback");
                let fallback = offline_fallback();
                self.debit_usage().await;
                self.state = PipelineState::Succeeded;
                self.result = Some(fallback.clone());
                Ok(fallback)
            }
            Err(err) => {
                self.state = PipelineState::Failed;
                Err(err)
            }
        }
    }

    /// The pipeline's single call into the usage counter.
    async fn debit_usage(&self) {
        if let Err(err) = self.synchronizer.increment_usage().await {
            warn!(%err, "usage counter update failed after submission");
        }
    }
}

//=========================================================================================
// Validation and Compression Helpers
//=========================================================================================

/// Magic-byte sniff plus a full decode probe. The decoded image is transient
/// and dropped on both paths; a well-typed header over garbage fails here.
/// Shared by screenshot validation and avatar uploads, which layer their own
/// size and dimension rules on top.
pub(crate) fn sniff_and_decode(bytes: &Bytes) -> CoreResult<(ImageKind, u32, u32)> {
    let kind = infer::get(bytes)
        .and_then(|t| ImageKind::from_mime(t.mime_type()))
        .ok_or_else(|| {
            CoreError::InvalidFile(
                "Unsupported file type. Use JPEG, PNG, GIF or WebP.".to_string(),
            )
        })?;

    let decoded = image::load_from_memory(bytes).map_err(|_| {
        CoreError::InvalidFile("This file is corrupted or not a valid image.".to_string())
    })?;

    Ok((kind, decoded.width(), decoded.height()))
}

fn probe_image(bytes: &Bytes) -> CoreResult<(ImageKind, ValidationOutcome)> {
    if bytes.len() < MIN_IMAGE_BYTES {
        return Err(CoreError::InvalidFile(
            "File is too small (minimum 1 KB).".to_string(),
        ));
    }
    if bytes.len() > MAX_IMAGE_BYTES {
        return Err(CoreError::InvalidFile(
            "File is too large (maximum 10 MB).".to_string(),
        ));
    }

    let (kind, width, height) = sniff_and_decode(bytes)?;
    if width < MIN_DIMENSION
        || height < MIN_DIMENSION
        || width > MAX_DIMENSION
        || height > MAX_DIMENSION
    {
        return Err(CoreError::InvalidFile(format!(
            "Image dimensions must be between {min}x{min} and {max}x{max} pixels (got {width}x{height}).",
            min = MIN_DIMENSION,
            max = MAX_DIMENSION,
        )));
    }

    Ok((
        kind,
        ValidationOutcome {
            width,
            height,
            needs_compression: bytes.len() >= COMPRESSION_THRESHOLD_BYTES,
        },
    ))
}

/// Lossy recompression pass: cap the longest edge, re-encode in the original
/// media type. Never produces more bytes than the input; if the re-encoding
/// comes out larger, the original bytes are kept.
fn compress<F: FnMut(u8)>(asset: &ImageAsset, guard: &mut ProgressGuard<F>) -> CoreResult<Bytes> {
    let decoded = image::load_from_memory(&asset.bytes)
        .map_err(|e| CoreError::Processing(format!("decode failed: {e}")))?;
    guard.emit(10);

    let resized = if decoded.width().max(decoded.height()) > COMPRESSION_MAX_EDGE {
        decoded.resize(COMPRESSION_MAX_EDGE, COMPRESSION_MAX_EDGE, FilterType::Lanczos3)
    } else {
        decoded
    };
    guard.emit(40);

    let mut out = Vec::new();
    match asset.media_type {
        ImageKind::Jpeg => {
            let mut cursor = Cursor::new(&mut out);
            let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut cursor, 75);
            resized
                .to_rgb8()
                .write_with_encoder(encoder)
                .map_err(|e| CoreError::Processing(format!("jpeg encode failed: {e}")))?;
        }
        ImageKind::Png => {
            resized
                .write_to(&mut Cursor::new(&mut out), ImageFormat::Png)
                .map_err(|e| CoreError::Processing(format!("png encode failed: {e}")))?;
        }
        ImageKind::Gif => {
            resized
                .write_to(&mut Cursor::new(&mut out), ImageFormat::Gif)
                .map_err(|e| CoreError::Processing(format!("gif encode failed: {e}")))?;
        }
        ImageKind::Webp => {
            resized
                .write_to(&mut Cursor::new(&mut out), ImageFormat::WebP)
                .map_err(|e| CoreError::Processing(format!("webp encode failed: {e}")))?;
        }
    }
    guard.emit(65);

    if out.len() >= asset.byte_size() {
        Ok(asset.bytes.clone())
    } else {
        Ok(Bytes::from(out))
    }
}

/// Base64 data-URL encoding of the final image bytes. Round-trips losslessly.
pub fn encode_payload(bytes: &[u8], kind: ImageKind) -> TransportPayload {
    use base64::Engine;
    let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
    TransportPayload {
        data_url: format!("data:{};base64,{}", kind.mime(), encoded),
        media_type: kind,
    }
}

/// Decodes a transport payload back to raw image bytes.
pub fn decode_payload(payload: &TransportPayload) -> CoreResult<Vec<u8>> {
    use base64::Engine;
    let data = payload
        .data_url
        .split_once(";base64,")
        .map(|(_, rest)| rest)
        .ok_or_else(|| CoreError::Processing("payload is not a base64 data URL".to_string()))?;
    base64::engine::general_purpose::STANDARD
        .decode(data)
        .map_err(|e| CoreError::Processing(format!("payload decode failed: {e}")))
}

/// The clearly-labeled placeholder returned when the backend cannot be
/// reached, so a user action never dead-ends. Distinguishable from a real
/// result by its source marker and identifier prefix.
fn offline_fallback() -> AnalysisResult {
    AnalysisResult {
        analysis_id: Some(format!("offline-{}", Uuid::new_v4())),
        problem: Some(
            "The analysis service could not be reached. This is a locally generated \
             placeholder, not a real diagnosis."
                .to_string(),
        ),
        category: Some("offline".to_string()),
        confidence: None,
        severity: None,
        solutions: vec![
            Solution {
                title: "Check your connection".to_string(),
                description: "The analysis service did not respond. Verify your network \
                              connection and retry the upload."
                    .to_string(),
                steps: vec![
                    "Confirm you are online.".to_string(),
                    "Retry the analysis in a few moments.".to_string(),
                ],
                difficulty: Some("easy".to_string()),
                success_rate: None,
                time_estimate: Some("1 minute".to_string()),
                requirements: None,
                warnings: None,
                references: None,
            },
            Solution {
                title: "Try again later".to_string(),
                description: "The service may be down for maintenance. Your screenshot was \
                              not analyzed."
                    .to_string(),
                steps: vec!["Re-submit the same screenshot later.".to_string()],
                difficulty: Some("easy".to_string()),
                success_rate: None,
                time_estimate: None,
                requirements: None,
                warnings: None,
                references: None,
            },
        ],
        prevention_tips: None,
        related_issues: None,
        source: ResultSource::OfflineFallback,
    }
}
