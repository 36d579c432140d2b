use super::response::parse_annotation;
use super::{Annotation, AnnotationError, AnnotationProvider};
use crate::constants::TRANSPORT_MAX_DIMENSION;
use crate::exif_parser::{apply_exif_orientation, read_exif};
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use image::codecs::jpeg::JpegEncoder;
use image::GenericImageView;
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info};

const JPEG_QUALITY: u8 = 85;

/// Cloud vision-language model speaking the `generateContent` JSON API.
pub struct VisionLanguageProvider {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl VisionLanguageProvider {
    pub fn new(
        endpoint: &str,
        model: &str,
        api_key: Option<String>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key: api_key.filter(|key| !key.trim().is_empty()),
            timeout,
        })
    }

    fn url(&self) -> String {
        format!("{}/{}:generateContent", self.endpoint, self.model)
    }

    async fn send(&self, api_key: &str, body: &Value) -> Result<String, AnnotationError> {
        let response = self
            .client
            .post(self.url())
            .header("x-goog-api-key", api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        match status {
            s if s.is_success() => Ok(text),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(AnnotationError::Unauthorized),
            StatusCode::TOO_MANY_REQUESTS => Err(AnnotationError::RateLimited(error_message(&text))),
            s => Err(AnnotationError::Api {
                status: s.as_u16(),
                message: error_message(&text),
            }),
        }
    }

    fn map_transport_error(&self, e: reqwest::Error) -> AnnotationError {
        if e.is_timeout() {
            AnnotationError::Timeout(self.timeout)
        } else {
            AnnotationError::Transport(e.to_string())
        }
    }
}

#[async_trait]
impl AnnotationProvider for VisionLanguageProvider {
    fn name(&self) -> &str {
        &self.model
    }

    async fn annotate(
        &self,
        image: &[u8],
        place_hint: Option<&str>,
    ) -> Result<Annotation, AnnotationError> {
        let api_key = self.api_key.as_deref().ok_or(AnnotationError::Unauthorized)?;

        let owned = image.to_vec();
        let payload = tokio::task::spawn_blocking(move || encode_for_transport(&owned))
            .await
            .map_err(|e| AnnotationError::Encoding(e.to_string()))??;
        debug!(
            bytes = payload.data.len(),
            mime = payload.mime_type,
            "Encoded image for inference"
        );

        let body = build_request_body(&payload, place_hint);
        let reply = tokio::time::timeout(self.timeout, self.send(api_key, &body))
            .await
            .map_err(|_| AnnotationError::Timeout(self.timeout))??;

        let text = extract_candidate_text(&reply)?;
        let annotation = parse_annotation(&text, place_hint)?;
        info!(
            landmark = %annotation.landmark_name,
            place = ?annotation.place_label,
            "Vision model annotated photo"
        );
        Ok(annotation)
    }
}

/// Image payload as it goes over the wire.
#[derive(Debug, Clone)]
pub struct TransportImage {
    pub mime_type: &'static str,
    pub data: Vec<u8>,
}

/// ISO-BMFF `ftyp` brands used by HEIC/HEIF photos.
fn is_heif(image: &[u8]) -> bool {
    image.len() > 12
        && &image[4..8] == b"ftyp"
        && matches!(&image[8..12], b"heic" | b"heix" | b"heim" | b"heis" | b"mif1" | b"msf1")
}

/// Prepares a photo for inference: an upright JPEG no larger than the transport limit.
/// HEIF photos, which cannot be decoded locally, are passed through untouched.
pub fn encode_for_transport(image: &[u8]) -> Result<TransportImage, AnnotationError> {
    let decoded = match image::load_from_memory(image) {
        Ok(decoded) => decoded,
        Err(_) if is_heif(image) => {
            return Ok(TransportImage {
                mime_type: "image/heic",
                data: image.to_vec(),
            })
        }
        Err(e) => return Err(AnnotationError::Encoding(e.to_string())),
    };
    let exif = read_exif(image);
    let upright = apply_exif_orientation(exif.as_ref(), decoded);

    let (width, height) = upright.dimensions();
    let scaled = if width.max(height) > TRANSPORT_MAX_DIMENSION {
        upright.resize(
            TRANSPORT_MAX_DIMENSION,
            TRANSPORT_MAX_DIMENSION,
            image::imageops::FilterType::Triangle,
        )
    } else {
        upright
    };

    let rgb = scaled.to_rgb8();
    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, JPEG_QUALITY)
        .encode_image(&rgb)
        .map_err(|e| AnnotationError::Encoding(e.to_string()))?;
    Ok(TransportImage {
        mime_type: "image/jpeg",
        data: jpeg,
    })
}

/// Instruction sent with every photo. A known place is declared authoritative so the
/// model only contributes the landmark and the narrative fields.
pub fn build_prompt(place_hint: Option<&str>) -> String {
    let mut prompt = String::from(
        "Identify the landmark, building or scene in this travel photo. \
         Respond with exactly one JSON object and nothing else, using these keys: \
         \"locationName\" (the specific name of the landmark or site), \
         \"location\" (\"City, Country\"), \
         \"caption\" (a short caption), \
         \"description\" (two or three sentences about the place), \
         \"fact1\", \"fact2\", \"fact3\" (one short interesting fact each).",
    );
    if let Some(hint) = place_hint {
        prompt.push_str(&format!(
            " The photo was taken in {hint}. This location is known to be correct: \
             set \"location\" to exactly \"{hint}\" and identify the specific site within it."
        ));
    }
    prompt
}

pub fn build_request_body(image: &TransportImage, place_hint: Option<&str>) -> Value {
    json!({
        "contents": [{
            "parts": [
                { "text": build_prompt(place_hint) },
                {
                    "inline_data": {
                        "mime_type": image.mime_type,
                        "data": general_purpose::STANDARD.encode(&image.data),
                    }
                }
            ]
        }],
        "generationConfig": {
            "temperature": 0.4,
            "responseMimeType": "application/json"
        }
    })
}

/// Text of the first candidate in a `generateContent` reply.
pub fn extract_candidate_text(reply: &str) -> Result<String, AnnotationError> {
    let value: Value =
        serde_json::from_str(reply).map_err(|e| AnnotationError::Malformed(e.to_string()))?;

    let parts = value
        .pointer("/candidates/0/content/parts")
        .and_then(Value::as_array)
        .ok_or_else(|| AnnotationError::Malformed("reply has no candidates".to_string()))?;

    let text: String = parts
        .iter()
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect();

    if text.trim().is_empty() {
        return Err(AnnotationError::Malformed("candidate has no text".to_string()));
    }
    Ok(text)
}

fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.pointer("/error/message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| body.chars().take(200).collect())
}
