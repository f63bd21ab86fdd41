use crate::config::DetectorConfig;
use crate::error::DetectionError;
use crate::frame::FrameData;
use crate::tracking::Position;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, trace};

/// Axis-aligned box in image pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl BoundingBox {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn center(&self) -> Position {
        Position::new((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    pub fn width(&self) -> f64 {
        (self.x2 - self.x1).abs()
    }

    pub fn height(&self) -> f64 {
        (self.y2 - self.y1).abs()
    }
}

/// One raw detection as reported by the detector/tracker
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    /// Persistent identity assigned by the tracker, absent when tracking failed
    pub track_id: Option<u64>,
    pub label: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

/// A tracked person kept after boundary filtering
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PersonSighting {
    pub track_id: u64,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

/// Opaque detect-and-track capability.
///
/// Implementations own identity persistence: the same physical subject keeps
/// its `track_id` across calls.
#[async_trait]
pub trait Detector: Send {
    async fn detect_and_track(
        &mut self,
        frame: &FrameData,
    ) -> Result<Vec<Detection>, DetectionError>;
}

/// Keep tracked detections whose label matches `label` (case-insensitive)
/// and whose confidence reaches `min_confidence`
pub fn persons(detections: &[Detection], label: &str, min_confidence: f32) -> Vec<PersonSighting> {
    detections
        .iter()
        .filter(|d| d.label.eq_ignore_ascii_case(label))
        .filter(|d| d.confidence >= min_confidence)
        .filter_map(|d| {
            let track_id = d.track_id?;
            Some(PersonSighting {
                track_id,
                confidence: d.confidence,
                bbox: d.bbox,
            })
        })
        .collect()
}

#[derive(Debug, Deserialize)]
struct DetectResponse {
    #[serde(default)]
    detections: Vec<WireDetection>,
}

#[derive(Debug, Deserialize)]
struct WireDetection {
    #[serde(default)]
    track_id: Option<u64>,
    label: String,
    #[serde(default)]
    confidence: f32,
    x1: f64,
    y1: f64,
    x2: f64,
    y2: f64,
}

impl From<WireDetection> for Detection {
    fn from(wire: WireDetection) -> Self {
        Self {
            track_id: wire.track_id,
            label: wire.label,
            confidence: wire.confidence,
            bbox: BoundingBox::new(wire.x1, wire.y1, wire.x2, wire.y2),
        }
    }
}

/// Parse the detector service response body
pub fn parse_response(body: &str) -> Result<Vec<Detection>, DetectionError> {
    let response: DetectResponse =
        serde_json::from_str(body).map_err(|e| DetectionError::Response {
            details: e.to_string(),
        })?;
    Ok(response.detections.into_iter().map(Detection::from).collect())
}

/// Client for an external detect-and-track HTTP service.
///
/// Each frame is posted as a multipart form (`image`, `camera_id`); the
/// service answers with `{"detections": [...]}`.
pub struct HttpDetector {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpDetector {
    pub fn new(config: &DetectorConfig) -> Result<Self, DetectionError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| DetectionError::Request {
                details: e.to_string(),
            })?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
        })
    }
}

#[async_trait]
impl Detector for HttpDetector {
    async fn detect_and_track(
        &mut self,
        frame: &FrameData,
    ) -> Result<Vec<Detection>, DetectionError> {
        let image = reqwest::multipart::Part::bytes(frame.jpeg.as_ref().clone())
            .file_name(format!("frame_{}.jpg", frame.id))
            .mime_str("image/jpeg")
            .map_err(|e| DetectionError::Request {
                details: e.to_string(),
            })?;
        let form = reqwest::multipart::Form::new()
            .text("camera_id", frame.camera_id.clone())
            .part("image", image);

        trace!(frame = frame.id, "Posting frame to detector");

        let response = self
            .client
            .post(&self.endpoint)
            .multipart(form)
            .send()
            .await
            .map_err(|e| DetectionError::Request {
                details: e.to_string(),
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| DetectionError::Response {
            details: e.to_string(),
        })?;

        if !status.is_success() {
            return Err(DetectionError::Response {
                details: format!("HTTP {}: {}", status, body.chars().take(200).collect::<String>()),
            });
        }

        let detections = parse_response(&body)?;
        debug!(frame = frame.id, count = detections.len(), "Detector responded");
        Ok(detections)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detection(track_id: Option<u64>, label: &str, confidence: f32) -> Detection {
        Detection {
            track_id,
            label: label.to_string(),
            confidence,
            bbox: BoundingBox::new(0.0, 0.0, 10.0, 20.0),
        }
    }

    #[test]
    fn test_center() {
        let bbox = BoundingBox::new(80.0, 60.0, 120.0, 140.0);
        assert_eq!(bbox.center(), Position::new(100.0, 100.0));
        assert_eq!(bbox.width(), 40.0);
        assert_eq!(bbox.height(), 80.0);
    }

    #[test]
    fn test_persons_filter() {
        let detections = vec![
            detection(Some(1), "person", 0.9),
            detection(Some(2), "Person", 0.6),
            detection(Some(3), "dog", 0.99),
            detection(None, "person", 0.95),
            detection(Some(4), "person", 0.2),
        ];

        let kept: Vec<u64> = persons(&detections, "person", 0.5)
            .iter()
            .map(|p| p.track_id)
            .collect();
        assert_eq!(kept, vec![1, 2]);

        assert_eq!(persons(&detections, "person", 0.0).len(), 3);
    }

    #[test]
    fn test_parse_response() {
        let body = r#"{"detections":[
            {"track_id":7,"label":"person","confidence":0.91,"x1":10,"y1":20,"x2":30,"y2":60},
            {"label":"car","confidence":0.5,"x1":0,"y1":0,"x2":1,"y2":1}
        ]}"#;

        let detections = parse_response(body).unwrap();
        assert_eq!(detections.len(), 2);
        assert_eq!(detections[0].track_id, Some(7));
        assert_eq!(detections[0].bbox.center(), Position::new(20.0, 40.0));
        assert_eq!(detections[1].track_id, None);

        assert!(parse_response("{}").unwrap().is_empty());
        assert!(matches!(
            parse_response("not json"),
            Err(DetectionError::Response { .. })
        ));
    }
}
