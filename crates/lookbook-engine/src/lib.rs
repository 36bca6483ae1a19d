use std::env;
use std::error::Error as StdError;
use std::fs;
use std::io::Cursor;
use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::{ImageFormat, Rgb, RgbImage};
use lookbook_contracts::assets::{ImageAsset, SceneReferenceSet, TargetSet};
use lookbook_contracts::error::BatchError;
use lookbook_contracts::events::EventWriter;
use lookbook_contracts::records::{GenerationRecord, RecordStatus};
use lookbook_contracts::SHOTS_PER_TARGET;
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};

pub const DEFAULT_MODEL: &str = "gemini-3-pro-image-preview";

/// Fixed generation parameters for every shot.
const ASPECT_RATIO: &str = "3:4";
const IMAGE_SIZE_TIER: &str = "1K";
const REQUEST_TIMEOUT_SECS: u64 = 120;
const RESPONSE_ERROR_SNIPPET_MAX_CHARS: usize = 600;

// ---------------------------------------------------------------------------
// Payload encoder
// ---------------------------------------------------------------------------

/// Reads an image file and returns its base64 payload plus media type.
pub fn encode_image_file(path: &Path) -> Result<(String, String), BatchError> {
    let bytes = fs::read(path).map_err(|source| BatchError::Encoding {
        path: path.to_path_buf(),
        source,
    })?;
    let mime = mime_for_path(path).unwrap_or("image/png");
    Ok((BASE64.encode(bytes), mime.to_string()))
}

/// Builds an [`ImageAsset`] from a file on disk. The display label is
/// the file stem; the encoded payload and media type are derived once
/// here and never recomputed.
pub fn import_asset(path: &Path) -> Result<ImageAsset, BatchError> {
    let (data, mime_type) = encode_image_file(path)?;
    let label = path
        .file_stem()
        .and_then(|value| value.to_str())
        .filter(|value| !value.is_empty())
        .unwrap_or("asset")
        .to_string();
    Ok(ImageAsset::new(label, path, data, mime_type))
}

pub fn mime_for_path(path: &Path) -> Option<&'static str> {
    let extension = path.extension()?.to_str()?.to_ascii_lowercase();
    match extension.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        _ => None,
    }
}

fn inline_image_part(asset: &ImageAsset) -> Value {
    json!({
        "inlineData": {
            "mimeType": asset.mime_type,
            "data": asset.data,
        }
    })
}

// ---------------------------------------------------------------------------
// Shot request builder
// ---------------------------------------------------------------------------

/// One generation call: a target garment rendered into a scene
/// reference with a unique model face. Pure function of its inputs.
#[derive(Debug, Clone)]
pub struct ShotRequest {
    pub model: String,
    pub shot_index: u32,
    pub scene_id: String,
    pub target_id: String,
    pub parts: Vec<Value>,
}

impl ShotRequest {
    /// Gemini `generateContent` request body.
    pub fn to_payload(&self) -> Value {
        json!({
            "contents": [{
                "role": "user",
                "parts": self.parts,
            }],
            "generationConfig": {
                "responseModalities": ["IMAGE"],
                "imageConfig": {
                    "aspectRatio": ASPECT_RATIO,
                    "imageSize": IMAGE_SIZE_TIER,
                },
            },
        })
    }

    /// Concatenated instruction text, used by the dryrun client to
    /// derive a deterministic placeholder.
    pub fn instruction_text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .collect::<Vec<&str>>()
            .join("\n")
    }
}

fn system_instruction() -> String {
    [
        "You are a professional fashion photographer shooting an editorial lookbook.",
        "Requirements:",
        "1. Reproduce the background, pose, lighting and setting of the scene reference image exactly.",
        "2. Reproduce the target garment faithfully, including its color, knit pattern, texture and silhouette.",
        "3. Give the model a distinct, realistic human face; every shot in this series uses a different face.",
        "4. Deliver 4K-quality editorial photography.",
    ]
    .join("\n")
}

fn shot_instruction(shot_index: u32) -> String {
    format!(
        "Shot {} of {}: generate one photograph for this shot with a unique model face not used in any other shot.",
        shot_index + 1,
        SHOTS_PER_TARGET
    )
}

pub fn build_shot_request(
    model: &str,
    shot_index: u32,
    scene_ref: &ImageAsset,
    target: &ImageAsset,
) -> ShotRequest {
    let parts = vec![
        json!({ "text": system_instruction() }),
        json!({ "text": shot_instruction(shot_index) }),
        json!({ "text": "Scene reference (match this background and pose):" }),
        inline_image_part(scene_ref),
        json!({ "text": "Target garment (render this garment on the model):" }),
        inline_image_part(target),
        json!({ "text": "Render the photograph now, with a unique face." }),
    ];
    ShotRequest {
        model: model.to_string(),
        shot_index,
        scene_id: scene_ref.id.clone(),
        target_id: target.id.clone(),
        parts,
    }
}

// ---------------------------------------------------------------------------
// Generation client seam
// ---------------------------------------------------------------------------

/// Images produced by one generation call, base64-encoded PNG, in
/// response-part order. A successful call may yield zero images.
#[derive(Debug, Clone, Default)]
pub struct ShotResponse {
    pub images: Vec<String>,
}

pub trait GenerationClient {
    fn name(&self) -> &str;
    fn generate(&self, request: &ShotRequest) -> Result<ShotResponse, BatchError>;
}

pub struct GeminiClient {
    api_base: String,
    api_key: String,
    http: HttpClient,
}

impl GeminiClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        let api_base = env::var("GEMINI_API_BASE")
            .ok()
            .map(|value| value.trim().trim_end_matches('/').to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| "https://generativelanguage.googleapis.com/v1beta".to_string());
        Self::with_api_base(api_key, api_base)
    }

    pub fn with_api_base(api_key: impl Into<String>, api_base: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into(),
            api_key: api_key.into(),
            http: HttpClient::new(),
        }
    }

    /// Resolves the credential ahead of the batch; absence is a single
    /// precondition failure rather than a per-target error.
    pub fn api_key_from_env() -> Result<String, BatchError> {
        non_empty_env("GEMINI_API_KEY")
            .or_else(|| non_empty_env("GOOGLE_API_KEY"))
            .ok_or_else(|| BatchError::precondition("GEMINI_API_KEY or GOOGLE_API_KEY not set"))
    }

    fn endpoint_for_model(&self, model: &str) -> String {
        let trimmed = model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }
}

impl GenerationClient for GeminiClient {
    fn name(&self) -> &str {
        "gemini"
    }

    fn generate(&self, request: &ShotRequest) -> Result<ShotResponse, BatchError> {
        let endpoint = self.endpoint_for_model(&request.model);
        let response = self
            .http
            .post(&endpoint)
            .query(&[("key", self.api_key.as_str())])
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .json(&request.to_payload())
            .send()
            .map_err(|err| BatchError::remote(format!("Gemini request failed ({endpoint}): {err}")))?;
        let payload = response_json_or_error("Gemini", response)?;
        Ok(ShotResponse {
            images: extract_inline_images(&payload),
        })
    }
}

fn response_json_or_error(provider: &str, response: HttpResponse) -> Result<Value, BatchError> {
    let status = response.status();
    let body = response
        .text()
        .map_err(|err| BatchError::remote(format!("{provider} response read failed: {err}")))?;
    if !status.is_success() {
        return Err(BatchError::remote(format!(
            "{provider} returned status {}: {}",
            status.as_u16(),
            truncate_chars(&body, RESPONSE_ERROR_SNIPPET_MAX_CHARS)
        )));
    }
    serde_json::from_str(&body).map_err(|err| {
        BatchError::remote(format!(
            "{provider} returned non-JSON body ({err}): {}",
            truncate_chars(&body, RESPONSE_ERROR_SNIPPET_MAX_CHARS)
        ))
    })
}

/// Collects every image-bearing part across all candidates, in
/// response order. Accepts both `inlineData` and `inline_data`
/// spellings.
fn extract_inline_images(payload: &Value) -> Vec<String> {
    let candidates = payload
        .get("candidates")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let mut images = Vec::new();

    for candidate in candidates {
        let parts = candidate
            .get("content")
            .and_then(Value::as_object)
            .and_then(|content| content.get("parts"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        for part in parts {
            let data = part
                .get("inlineData")
                .or_else(|| part.get("inline_data"))
                .and_then(Value::as_object)
                .and_then(|inline| inline.get("data"))
                .and_then(Value::as_str)
                .unwrap_or_default();
            if data.is_empty() {
                continue;
            }
            images.push(data.to_string());
        }
    }

    images
}

fn truncate_chars(raw: &str, max_chars: usize) -> String {
    if raw.chars().count() <= max_chars {
        return raw.trim().to_string();
    }
    let truncated: String = raw.chars().take(max_chars).collect();
    format!("{}...", truncated.trim())
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Offline stand-in for the remote service: one deterministic solid
/// color 768x1024 PNG per call, color derived from the instruction
/// text.
pub struct DryrunClient;

impl GenerationClient for DryrunClient {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn generate(&self, request: &ShotRequest) -> Result<ShotResponse, BatchError> {
        let (r, g, b) = color_from_text(&request.instruction_text());
        let mut canvas = RgbImage::new(768, 1024);
        for pixel in canvas.pixels_mut() {
            *pixel = Rgb([r, g, b]);
        }
        let mut bytes = Vec::new();
        canvas
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .map_err(|err| BatchError::remote(format!("dryrun image encode failed: {err}")))?;
        Ok(ShotResponse {
            images: vec![BASE64.encode(bytes)],
        })
    }
}

fn color_from_text(text: &str) -> (u8, u8, u8) {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let digest = hasher.finalize();
    (digest[0], digest[1], digest[2])
}

// ---------------------------------------------------------------------------
// Single-target generator
// ---------------------------------------------------------------------------

/// Drives the shots for one target: scene references cycle round-robin
/// by shot index, shots run strictly one after another, and the first
/// failure aborts the remaining shots. `on_progress` fires once per
/// appended image with the running output count, so a multi-image
/// response advances progress by more than one per shot.
pub fn generate_for_target(
    client: &dyn GenerationClient,
    model: &str,
    target: &ImageAsset,
    scene_refs: &SceneReferenceSet,
    on_progress: &mut dyn FnMut(u32),
) -> Result<Vec<String>, BatchError> {
    let mut outputs = Vec::new();
    for shot_index in 0..SHOTS_PER_TARGET {
        let Some(scene_ref) = scene_refs.for_shot(shot_index) else {
            // Nothing to anchor the shot to; skip it rather than fail.
            continue;
        };
        let request = build_shot_request(model, shot_index, scene_ref, target);
        let response = client.generate(&request)?;
        for image in response.images {
            outputs.push(image);
            on_progress(outputs.len() as u32);
        }
    }
    Ok(outputs)
}

// ---------------------------------------------------------------------------
// Batch orchestrator
// ---------------------------------------------------------------------------

/// Sequential batch pipeline: one target at a time, one shot at a
/// time. Owns the record set for the lifetime of a batch; a failed
/// target never stops the loop.
pub struct BatchRunner {
    client: Box<dyn GenerationClient>,
    events: EventWriter,
    model: String,
    records: Vec<GenerationRecord>,
    active: Option<usize>,
}

impl BatchRunner {
    pub fn new(
        client: Box<dyn GenerationClient>,
        events: EventWriter,
        model: impl Into<String>,
    ) -> Self {
        Self {
            client,
            events,
            model: model.into(),
            records: Vec::new(),
            active: None,
        }
    }

    pub fn records(&self) -> &[GenerationRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<GenerationRecord> {
        self.records
    }

    /// Index of the target currently being processed, for external
    /// observers. `None` outside a batch run.
    pub fn active_index(&self) -> Option<usize> {
        self.active
    }

    /// Runs one full batch. Empty inputs fail the precondition guard
    /// without touching any prior record set; a non-empty run replaces
    /// the record set wholesale and then processes every target in
    /// order, isolating per-target failures. Once the guard passes the
    /// run itself cannot fail; failures live in the records.
    pub fn run(&mut self, targets: &TargetSet, scene_refs: &SceneReferenceSet) -> Result<()> {
        if targets.is_empty() {
            return Err(BatchError::precondition("no target garments supplied").into());
        }
        if scene_refs.is_empty() {
            return Err(BatchError::precondition("no scene references supplied").into());
        }

        self.records = targets.iter().map(GenerationRecord::pending).collect();
        self.emit(
            "batch_started",
            map_object(json!({
                "targets": targets.len(),
                "scene_refs": scene_refs.len(),
                "model": self.model,
                "provider": self.client.name(),
            })),
        );

        for index in 0..self.records.len() {
            let Some(target) = targets.get(index) else {
                break;
            };
            self.active = Some(index);
            self.records[index].begin();
            self.emit(
                "target_started",
                map_object(json!({
                    "index": index,
                    "target": target.label,
                })),
            );

            let outcome = {
                let record = &mut self.records[index];
                let events = &self.events;
                let label = target.label.clone();
                let mut on_progress = |produced: u32| {
                    record.note_progress(produced);
                    let _ = events.emit(
                        "shot_completed",
                        map_object(json!({
                            "target": label,
                            "produced": produced,
                        })),
                    );
                };
                generate_for_target(
                    self.client.as_ref(),
                    &self.model,
                    target,
                    scene_refs,
                    &mut on_progress,
                )
            };

            match outcome {
                Ok(images) => {
                    let produced = images.len();
                    self.records[index].complete(images);
                    self.emit(
                        "target_completed",
                        map_object(json!({
                            "index": index,
                            "target": target.label,
                            "produced": produced,
                        })),
                    );
                }
                Err(err) => {
                    let message = error_text(&err);
                    self.records[index].fail(&message);
                    self.emit(
                        "target_failed",
                        map_object(json!({
                            "index": index,
                            "target": target.label,
                            "error": message,
                        })),
                    );
                }
            }
        }

        self.active = None;
        let completed = self
            .records
            .iter()
            .filter(|record| record.status == RecordStatus::Completed)
            .count();
        let failed = self.records.len() - completed;
        self.emit(
            "batch_finished",
            map_object(json!({
                "completed": completed,
                "failed": failed,
            })),
        );
        Ok(())
    }

    /// Event writes are best effort: an events log that stops being
    /// writable mid-batch must not abort generation, which keeps
    /// failure visibility per-target once the preconditions pass.
    fn emit(&self, event: &str, payload: Map<String, Value>) {
        let _ = self.events.emit(event, payload);
    }
}

/// Flattens an error and its source chain into one message.
fn error_text(err: &BatchError) -> String {
    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        text.push_str(": ");
        text.push_str(&cause.to_string());
        source = cause.source();
    }
    text
}

fn map_object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}
