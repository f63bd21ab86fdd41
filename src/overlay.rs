use crate::alert::AlertSet;
use crate::config::OverlayConfig;
use crate::detection::PersonSighting;
use crate::error::DecodeError;
use crate::frame::{encode_jpeg, FrameData, JPEG_QUALITY};
use chrono::{DateTime, Local, Utc};
use chrono_tz::Tz;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use rusttype::{Font, Scale};
use std::time::SystemTime;
use tracing::{debug, warn};

const GREEN: Rgb<u8> = Rgb([0, 255, 0]);
const RED: Rgb<u8> = Rgb([255, 0, 0]);
const WHITE: Rgb<u8> = Rgb([255, 255, 255]);

/// Resolve configured timezone, falling back to UTC on parse errors
pub(crate) fn resolve_timezone(tz_name: &str) -> Tz {
    match tz_name.parse::<Tz>() {
        Ok(tz) => tz,
        Err(_) => {
            warn!("Invalid overlay timezone '{}', falling back to UTC", tz_name);
            chrono_tz::UTC
        }
    }
}

/// Draws person boxes, labels and an optional timestamp onto frames
pub struct Annotator {
    enabled: bool,
    timestamp: bool,
    timezone: Option<Tz>,
    font: Option<Font<'static>>,
    scale: Scale,
}

impl Annotator {
    pub fn new(config: &OverlayConfig) -> Self {
        let font = if config.annotate || config.timestamp {
            load_font(&config.font_path)
        } else {
            None
        };

        Self {
            enabled: config.annotate,
            timestamp: config.timestamp,
            timezone: config.timezone.as_deref().map(resolve_timezone),
            font,
            scale: Scale::uniform(config.font_size),
        }
    }

    /// Annotator that leaves frames untouched
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            timestamp: false,
            timezone: None,
            font: None,
            scale: Scale::uniform(18.0),
        }
    }

    pub fn is_active(&self) -> bool {
        self.enabled || (self.timestamp && self.font.is_some())
    }

    /// Annotate `frame`, returning the raw frame when drawing fails
    pub fn annotate_or_raw(
        &self,
        frame: &FrameData,
        persons: &[PersonSighting],
        alerts: &AlertSet,
    ) -> FrameData {
        if !self.is_active() {
            return frame.clone();
        }

        match self.annotate(frame, persons, alerts) {
            Ok(annotated) => annotated,
            Err(e) => {
                warn!(frame = frame.id, "Annotation failed, keeping raw frame: {}", e);
                frame.clone()
            }
        }
    }

    pub fn annotate(
        &self,
        frame: &FrameData,
        persons: &[PersonSighting],
        alerts: &AlertSet,
    ) -> Result<FrameData, DecodeError> {
        let mut img = frame.to_rgb()?;

        if self.enabled {
            for person in persons {
                let flagged = alerts.contains(person.track_id);
                let (color, thickness) = if flagged { (RED, 3) } else { (GREEN, 2) };
                draw_box(&mut img, person, color, thickness);

                if let Some(font) = &self.font {
                    let label = if flagged {
                        format!("Person {} [ALERT]", person.track_id)
                    } else {
                        format!("Person {}", person.track_id)
                    };
                    let (_, text_height) = text_size(self.scale, font, &label);
                    let x = person.bbox.x1.min(person.bbox.x2).max(0.0) as i32;
                    let top = person.bbox.y1.min(person.bbox.y2) as i32;
                    let y = (top - text_height - 4).max(0);
                    draw_text_mut(&mut img, color, x, y, self.scale, font, &label);
                }
            }
        }

        if self.timestamp {
            if let Some(font) = &self.font {
                let text = self.format_timestamp(frame.timestamp);
                draw_text_mut(&mut img, WHITE, 10, 10, self.scale, font, &text);
            }
        }

        let jpeg = encode_jpeg(&img, JPEG_QUALITY)?;
        debug!(frame = frame.id, persons = persons.len(), "Annotated frame");
        Ok(frame.with_jpeg(jpeg))
    }

    fn format_timestamp(&self, timestamp: SystemTime) -> String {
        let utc = DateTime::<Utc>::from(timestamp);
        match self.timezone {
            Some(tz) => utc
                .with_timezone(&tz)
                .format("%Y-%m-%d %H:%M:%S%.3f %Z")
                .to_string(),
            None => utc
                .with_timezone(&Local)
                .format("%Y-%m-%d %H:%M:%S%.3f")
                .to_string(),
        }
    }
}

fn load_font(path: &str) -> Option<Font<'static>> {
    let data = match std::fs::read(path) {
        Ok(data) => data,
        Err(e) => {
            warn!("Failed to read font file '{}', labels disabled: {}", path, e);
            return None;
        }
    };

    let font = Font::try_from_vec(data);
    if font.is_none() {
        warn!("Failed to parse font file '{}', labels disabled", path);
    }
    font
}

/// Hollow rectangle `thickness` pixels wide, clipped to the image
fn draw_box(img: &mut RgbImage, person: &PersonSighting, color: Rgb<u8>, thickness: i32) {
    let (w, h) = (img.width() as f64, img.height() as f64);
    let x1 = person.bbox.x1.min(person.bbox.x2).clamp(0.0, w - 1.0) as i32;
    let y1 = person.bbox.y1.min(person.bbox.y2).clamp(0.0, h - 1.0) as i32;
    let x2 = person.bbox.x1.max(person.bbox.x2).clamp(0.0, w - 1.0) as i32;
    let y2 = person.bbox.y1.max(person.bbox.y2).clamp(0.0, h - 1.0) as i32;

    for inset in 0..thickness {
        let width = x2 - x1 - 2 * inset;
        let height = y2 - y1 - 2 * inset;
        if width <= 0 || height <= 0 {
            break;
        }
        let rect = Rect::at(x1 + inset, y1 + inset).of_size(width as u32, height as u32);
        draw_hollow_rect_mut(img, rect, color);
    }
}
