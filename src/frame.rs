use crate::error::DecodeError;
use image::codecs::jpeg::JpegEncoder;
use image::{ImageFormat, RgbImage};
use std::sync::Arc;
use std::time::SystemTime;

/// JPEG quality used whenever a frame has to be (re-)encoded
pub const JPEG_QUALITY: u8 = 90;

/// Decoded inbound frame. The payload is always JPEG.
#[derive(Debug, Clone)]
pub struct FrameData {
    /// Node-local sequence number
    pub id: u64,
    /// Time the frame was received from the queue
    pub timestamp: SystemTime,
    /// Camera identity taken from the delivery metadata
    pub camera_id: String,
    /// JPEG bytes (shared between the buffer, the recorder and the detector)
    pub jpeg: Arc<Vec<u8>>,
    pub width: u32,
    pub height: u32,
}

impl FrameData {
    pub fn new(
        id: u64,
        timestamp: SystemTime,
        camera_id: impl Into<String>,
        jpeg: Vec<u8>,
        width: u32,
        height: u32,
    ) -> Self {
        Self {
            id,
            timestamp,
            camera_id: camera_id.into(),
            jpeg: Arc::new(jpeg),
            width,
            height,
        }
    }

    /// Copy of this frame carrying a different JPEG payload
    pub fn with_jpeg(&self, jpeg: Vec<u8>) -> Self {
        Self {
            jpeg: Arc::new(jpeg),
            camera_id: self.camera_id.clone(),
            ..*self
        }
    }

    /// Decode the JPEG payload into an RGB buffer
    pub fn to_rgb(&self) -> Result<RgbImage, DecodeError> {
        image::load_from_memory_with_format(&self.jpeg, ImageFormat::Jpeg)
            .map(|img| img.to_rgb8())
            .map_err(|e| DecodeError::Image {
                details: e.to_string(),
            })
    }

    /// Seconds since the Unix epoch
    pub fn epoch_seconds(&self) -> f64 {
        epoch_seconds(self.timestamp)
    }
}

/// Turn transport bytes into a frame.
///
/// Every payload is fully decoded so truncated or corrupt images are
/// rejected. JPEG payloads are then kept as-is; any other format the `image`
/// crate understands is re-encoded to JPEG.
pub fn decode_frame(
    id: u64,
    bytes: &[u8],
    camera_id: &str,
    received_at: SystemTime,
) -> Result<FrameData, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }

    let format = image::guess_format(bytes).map_err(|e| DecodeError::Image {
        details: e.to_string(),
    })?;

    let decoded = image::load_from_memory_with_format(bytes, format).map_err(|e| {
        DecodeError::Image {
            details: e.to_string(),
        }
    })?;

    // A fully decodable JPEG is kept byte for byte
    if format == ImageFormat::Jpeg {
        return Ok(FrameData::new(
            id,
            received_at,
            camera_id,
            bytes.to_vec(),
            decoded.width(),
            decoded.height(),
        ));
    }

    let decoded = decoded.to_rgb8();
    let jpeg = encode_jpeg(&decoded, JPEG_QUALITY)?;

    Ok(FrameData::new(
        id,
        received_at,
        camera_id,
        jpeg,
        decoded.width(),
        decoded.height(),
    ))
}

pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>, DecodeError> {
    let mut buf = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut buf, quality);
    encoder
        .encode(
            image.as_raw(),
            image.width(),
            image.height(),
            image::ColorType::Rgb8,
        )
        .map_err(|e| DecodeError::Encode {
            details: e.to_string(),
        })?;
    Ok(buf)
}

pub fn epoch_seconds(time: SystemTime) -> f64 {
    time.duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
