//! Inference server client
//!
//! The perception and generation models run behind an HTTP sidecar. Each
//! capability is one JSON endpoint; images travel base64-encoded:
//!
//! | endpoint   | request                              | response                     |
//! |------------|--------------------------------------|------------------------------|
//! | `/detect`  | `{image, query}`                     | `{box: [x1,y1,x2,y2] \| null}` |
//! | `/segment` | `{image, box}`                       | `{mask}`                     |
//! | `/edit`    | `{image, mask?, prompt}`             | `{image}`                    |
//! | `/answer`  | `{image, question}`                  | `{answer}`                   |

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::dispatch::{Answerer, Detector, EditRequest, Editor, Segmenter};
use super::result::{BoundingBox, Image};

#[derive(Debug, Serialize)]
struct DetectRequest<'a> {
    image: String,
    query: &'a str,
}

#[derive(Debug, Deserialize)]
struct DetectResponse {
    #[serde(rename = "box")]
    bbox: Option<BoundingBox>,
}

#[derive(Debug, Serialize)]
struct SegmentRequest {
    image: String,
    #[serde(rename = "box")]
    bbox: BoundingBox,
}

#[derive(Debug, Deserialize)]
struct SegmentResponse {
    mask: String,
}

#[derive(Debug, Serialize)]
struct EditBody<'a> {
    image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    mask: Option<String>,
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct EditResponse {
    image: String,
}

#[derive(Debug, Serialize)]
struct AnswerRequest<'a> {
    image: String,
    question: &'a str,
}

#[derive(Debug, Deserialize)]
struct AnswerResponse {
    answer: String,
}

/// HTTP client for the inference sidecar
pub struct RemoteTools {
    client: Client,
    base_url: String,
}

impl RemoteTools {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build inference HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Build the client and wait until the server reports healthy
    ///
    /// Model servers load weights on start, so this is the expensive part of
    /// bringing tools up and should happen once per process.
    pub async fn connect(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let tools = Self::new(base_url, timeout)?;
        let url = format!("{}/health", tools.base_url);
        let response = tools
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Inference server unreachable at {}", url))?;
        if !response.status().is_success() {
            return Err(anyhow!(
                "Inference server at {} is not healthy ({})",
                url,
                response.status()
            ));
        }
        info!("Connected to inference server at {}", tools.base_url);
        Ok(tools)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post<B: Serialize, R: DeserializeOwned>(&self, path: &str, body: &B) -> Result<R> {
        let url = format!("{}/{}", self.base_url, path);
        debug!("POST {}", url);

        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("Request to {} failed", url))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(anyhow!("{} returned {}: {}", url, status, text));
        }

        response
            .json::<R>()
            .await
            .with_context(|| format!("Failed to decode response from {}", url))
    }
}

fn decode_image(field: &str, encoded: &str) -> Result<Image> {
    Image::from_base64(encoded).with_context(|| format!("'{}' is not valid base64", field))
}

#[async_trait]
impl Detector for RemoteTools {
    async fn detect(&self, image: &Image, query: &str) -> Result<Option<BoundingBox>> {
        let response: DetectResponse = self
            .post(
                "detect",
                &DetectRequest {
                    image: image.to_base64(),
                    query,
                },
            )
            .await?;
        Ok(response.bbox)
    }
}

#[async_trait]
impl Segmenter for RemoteTools {
    async fn segment(&self, image: &Image, bbox: &BoundingBox) -> Result<Image> {
        let response: SegmentResponse = self
            .post(
                "segment",
                &SegmentRequest {
                    image: image.to_base64(),
                    bbox: *bbox,
                },
            )
            .await?;
        decode_image("mask", &response.mask)
    }
}

#[async_trait]
impl Editor for RemoteTools {
    async fn edit(&self, request: EditRequest<'_>) -> Result<Image> {
        let response: EditResponse = self
            .post(
                "edit",
                &EditBody {
                    image: request.image.to_base64(),
                    mask: request.mask.map(Image::to_base64),
                    prompt: request.prompt,
                },
            )
            .await?;
        decode_image("image", &response.image)
    }
}

#[async_trait]
impl Answerer for RemoteTools {
    async fn answer(&self, image: &Image, question: &str) -> Result<String> {
        let response: AnswerResponse = self
            .post(
                "answer",
                &AnswerRequest {
                    image: image.to_base64(),
                    question,
                },
            )
            .await?;
        Ok(response.answer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_base_url_is_normalised() {
        let tools = RemoteTools::new("http://localhost:9000/", Duration::from_secs(5)).unwrap();
        assert_eq!(tools.base_url(), "http://localhost:9000");
    }

    #[test]
    fn test_wire_shapes() {
        let body = EditBody {
            image: "aW1n".to_string(),
            mask: None,
            prompt: "a dog",
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            json!({"image": "aW1n", "prompt": "a dog"})
        );

        let detected: DetectResponse = serde_json::from_value(json!({"box": [1, 2, 3, 4]})).unwrap();
        assert_eq!(detected.bbox, Some(BoundingBox::new(1.0, 2.0, 3.0, 4.0).unwrap()));

        let nothing: DetectResponse = serde_json::from_value(json!({"box": null})).unwrap();
        assert!(nothing.bbox.is_none());
    }
}
