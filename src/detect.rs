//! Region detection: find the diagram clusters in a source image and crop
//! them out for extraction.

use crate::config::DetectorConfig;
use crate::error::{DetectionError, InputError, ServiceError};
use base64::Engine;
use image::{DynamicImage, GenericImageView};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Axis-aligned box in pixel coordinates, corners `(x1, y1)`-`(x2, y2)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn from_xyxy([x1, y1, x2, y2]: [f32; 4]) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Center x, center y, width, height.
    pub fn xywh(&self) -> [f32; 4] {
        let w = self.x2 - self.x1;
        let h = self.y2 - self.y1;
        [self.x1 + w / 2.0, self.y1 + h / 2.0, w, h]
    }

    /// Integer pixel rectangle `(x, y, width, height)` clamped to an image of
    /// the given size. `None` when nothing of the box is left.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
        let clamp = |v: f32, max: u32| -> u32 {
            if v.is_nan() {
                0
            } else {
                (v.max(0.0) as u32).min(max)
            }
        };
        let x1 = clamp(self.x1.min(self.x2).floor(), width);
        let y1 = clamp(self.y1.min(self.y2).floor(), height);
        let x2 = clamp(self.x1.max(self.x2).ceil(), width);
        let y2 = clamp(self.y1.max(self.y2).ceil(), height);
        if x2 <= x1 || y2 <= y1 {
            return None;
        }
        Some((x1, y1, x2 - x1, y2 - y1))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionRegion {
    pub label: String,
    pub confidence: f32,
    pub class_id: u32,
    pub bounding_box: BoundingBox,
}

pub trait RegionDetector {
    fn predict(&self, image_path: &Path) -> Result<Vec<DetectionRegion>, DetectionError>;

    /// Cuts each region out of `image`, in region order. Boxes are clamped to
    /// the image; boxes with no area left are skipped.
    fn crop(&self, image: &DynamicImage, regions: &[DetectionRegion]) -> Vec<DynamicImage> {
        let (width, height) = image.dimensions();
        regions
            .iter()
            .filter_map(|region| {
                let Some((x, y, w, h)) = region.bounding_box.clamp_to(width, height) else {
                    tracing::debug!(label = %region.label, "skipping empty region");
                    return None;
                };
                Some(image.crop_imm(x, y, w, h))
            })
            .collect()
    }
}

impl<T: RegionDetector + ?Sized> RegionDetector for &T {
    fn predict(&self, image_path: &Path) -> Result<Vec<DetectionRegion>, DetectionError> {
        (**self).predict(image_path)
    }

    fn crop(&self, image: &DynamicImage, regions: &[DetectionRegion]) -> Vec<DynamicImage> {
        (**self).crop(image, regions)
    }
}

impl<T: RegionDetector + ?Sized> RegionDetector for Box<T> {
    fn predict(&self, image_path: &Path) -> Result<Vec<DetectionRegion>, DetectionError> {
        (**self).predict(image_path)
    }

    fn crop(&self, image: &DynamicImage, regions: &[DetectionRegion]) -> Vec<DynamicImage> {
        (**self).crop(image, regions)
    }
}

pub fn load_image(path: &Path) -> Result<DynamicImage, InputError> {
    image::open(path).map_err(|source| match source {
        image::ImageError::IoError(io) => InputError::Io {
            path: path.to_path_buf(),
            source: io,
        },
        other => InputError::Image {
            path: path.to_path_buf(),
            source: other,
        },
    })
}

/// Treats the whole image as one region.
#[derive(Debug, Clone, Copy, Default)]
pub struct WholeImageDetector;

impl RegionDetector for WholeImageDetector {
    fn predict(&self, image_path: &Path) -> Result<Vec<DetectionRegion>, DetectionError> {
        let (width, height) = image::image_dimensions(image_path).map_err(|source| {
            InputError::Image {
                path: image_path.to_path_buf(),
                source,
            }
        })?;
        Ok(vec![DetectionRegion {
            label: "diagram".to_string(),
            confidence: 1.0,
            class_id: 0,
            bounding_box: BoundingBox::from_xyxy([0.0, 0.0, width as f32, height as f32]),
        }])
    }
}

#[derive(Debug, Deserialize)]
struct RemoteBox {
    #[serde(default)]
    label: Option<String>,
    confidence: f32,
    #[serde(default)]
    class_id: u32,
    #[serde(alias = "coords")]
    xyxy: [f32; 4],
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RemoteResponse {
    Boxes(Vec<RemoteBox>),
    Wrapped { boxes: Vec<RemoteBox> },
}

/// Client for an HTTP object-detection service.
///
/// Posts `{"image": "<base64>"}` and expects a JSON list of
/// `{label, confidence, class_id, xyxy}` (optionally under `boxes`).
pub struct RemoteDetector {
    client: Client,
    endpoint: String,
    min_confidence: f32,
}

impl RemoteDetector {
    pub fn new(config: &DetectorConfig) -> Result<Self, DetectionError> {
        let endpoint = config
            .endpoint
            .clone()
            .ok_or_else(|| InputError::Config("no detector endpoint configured".to_string()))?;
        let mut builder = Client::builder();
        if let Some(secs) = config.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        let client = builder
            .build()
            .map_err(|e| ServiceError::transport(&endpoint, e))?;
        Ok(Self {
            client,
            endpoint,
            min_confidence: config.min_confidence,
        })
    }

    fn into_regions(&self, boxes: Vec<RemoteBox>) -> Vec<DetectionRegion> {
        let total = boxes.len();
        let regions: Vec<DetectionRegion> = boxes
            .into_iter()
            .filter(|b| b.confidence >= self.min_confidence)
            .map(|b| DetectionRegion {
                label: b.label.unwrap_or_else(|| format!("class-{}", b.class_id)),
                confidence: b.confidence,
                class_id: b.class_id,
                bounding_box: BoundingBox::from_xyxy(b.xyxy),
            })
            .collect();
        tracing::debug!(total, kept = regions.len(), "detector boxes");
        regions
    }
}

impl RegionDetector for RemoteDetector {
    fn predict(&self, image_path: &Path) -> Result<Vec<DetectionRegion>, DetectionError> {
        let bytes = std::fs::read(image_path).map_err(|source| InputError::Io {
            path: image_path.to_path_buf(),
            source,
        })?;
        let encoded = base64::engine::general_purpose::STANDARD.encode(&bytes);
        let response = self
            .client
            .post(&self.endpoint)
            .json(&serde_json::json!({ "image": encoded }))
            .send()
            .map_err(|e| ServiceError::transport(&self.endpoint, e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(ServiceError::Status {
                url: self.endpoint.clone(),
                status: status.as_u16(),
                body: response.text().unwrap_or_default(),
            }
            .into());
        }
        let body = response
            .text()
            .map_err(|e| ServiceError::transport(&self.endpoint, e))?;
        let parsed: RemoteResponse =
            serde_json::from_str(&body).map_err(|e| DetectionError::Malformed(e.to_string()))?;
        let boxes = match parsed {
            RemoteResponse::Boxes(boxes) | RemoteResponse::Wrapped { boxes } => boxes,
        };
        Ok(self.into_regions(boxes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn region(xyxy: [f32; 4]) -> DetectionRegion {
        DetectionRegion {
            label: "cluster".to_string(),
            confidence: 0.9,
            class_id: 0,
            bounding_box: BoundingBox::from_xyxy(xyxy),
        }
    }

    #[test]
    fn xywh_is_center_based() {
        let bbox = BoundingBox::from_xyxy([10.0, 20.0, 30.0, 60.0]);
        assert_eq!(bbox.xywh(), [20.0, 40.0, 20.0, 40.0]);
    }

    #[test]
    fn crop_clamps_and_skips_empty_boxes() {
        let image = DynamicImage::new_rgb8(100, 50);
        let regions = vec![
            region([10.0, 10.0, 40.0, 30.0]),
            region([80.0, -5.0, 140.0, 70.0]),
            region([120.0, 10.0, 150.0, 20.0]),
            region([5.0, 5.0, 5.0, 20.0]),
        ];
        let crops = WholeImageDetector.crop(&image, &regions);
        let sizes: Vec<_> = crops.iter().map(|c| c.dimensions()).collect();
        assert_eq!(sizes, vec![(30, 20), (20, 50)]);
    }

    #[test]
    fn whole_image_detector_covers_image() {
        let dir = std::env::temp_dir().join(format!("ownergraph-detect-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("whole.png");
        DynamicImage::new_rgb8(64, 32).save(&path).unwrap();
        let regions = WholeImageDetector.predict(&path).unwrap();
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].bounding_box.xywh(), [32.0, 16.0, 64.0, 32.0]);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn missing_image_is_input_error() {
        let err = load_image(Path::new("/nonexistent/diagram.png")).unwrap_err();
        assert!(matches!(err, InputError::Io { .. }));
    }

    #[test]
    fn remote_boxes_below_threshold_are_dropped() {
        let detector = RemoteDetector::new(&DetectorConfig {
            endpoint: Some("http://localhost:9/detect".to_string()),
            min_confidence: 0.5,
            timeout_secs: Some(1),
        })
        .unwrap();
        let parsed: RemoteResponse = serde_json::from_str(
            r#"{"boxes": [
                {"label": "cluster", "confidence": 0.8, "class_id": 0, "xyxy": [0, 0, 10, 10]},
                {"confidence": 0.2, "class_id": 1, "coords": [5, 5, 20, 20]}
            ]}"#,
        )
        .unwrap();
        let RemoteResponse::Wrapped { boxes } = parsed else {
            panic!("expected wrapped boxes");
        };
        let regions = detector.into_regions(boxes);
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].label, "cluster");
    }

    #[test]
    fn remote_detector_needs_endpoint() {
        let err = RemoteDetector::new(&DetectorConfig::default())
            .err()
            .expect("must fail");
        assert!(matches!(err, DetectionError::Input(InputError::Config(_))));
    }
}
