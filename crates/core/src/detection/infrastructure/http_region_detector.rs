use std::io::Cursor;
use std::time::Duration;

use image::ImageFormat;
use serde::Deserialize;
use thiserror::Error;

use crate::detection::domain::region_detector::RegionDetector;
use crate::shared::frame::Frame;
use crate::shared::polygon::Polygon;
use crate::video::infrastructure::image_sequence_writer::to_image;

#[derive(Error, Debug)]
pub enum HttpDetectorError {
    #[error("cannot encode frame {index} with {channels} channels")]
    UnsupportedChannels { index: usize, channels: u8 },
    #[error("failed to encode frame {index} as PNG: {source}")]
    Encode {
        index: usize,
        #[source]
        source: image::ImageError,
    },
    #[error("detection request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("detection service {url} returned HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("malformed detection response: {0}")]
    Response(#[source] serde_json::Error),
}

#[derive(Deserialize)]
struct DetectionResponse {
    #[serde(default)]
    polygons: Vec<Polygon>,
}

/// Sends each keyframe to a remote detection service.
///
/// The frame is POSTed as `image/png`; the service answers with
/// `{"polygons": [[[x, y], ...], ...]}` in frame pixel coordinates. A failed
/// call is returned as-is, with no retry.
pub struct HttpRegionDetector {
    client: reqwest::blocking::Client,
    url: String,
}

impl HttpRegionDetector {
    pub fn new(url: &str, timeout: Option<Duration>) -> Result<Self, HttpDetectorError> {
        let mut builder = reqwest::blocking::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(|source| HttpDetectorError::Request {
            url: url.to_string(),
            source,
        })?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }

    fn request(&self, png: Vec<u8>) -> Result<Vec<u8>, HttpDetectorError> {
        let request_error = |source| HttpDetectorError::Request {
            url: self.url.clone(),
            source,
        };
        let response = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "image/png")
            .body(png)
            .send()
            .map_err(request_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(HttpDetectorError::Status {
                url: self.url.clone(),
                status: status.as_u16(),
            });
        }
        let body = response.bytes().map_err(request_error)?;
        Ok(body.to_vec())
    }
}

impl RegionDetector for HttpRegionDetector {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Polygon>, Box<dyn std::error::Error>> {
        let png = encode_png(frame)?;
        let body = self.request(png)?;
        let polygons = parse_response(&body)?;
        log::debug!("Frame {}: {} plates detected", frame.index(), polygons.len());
        Ok(polygons)
    }
}

pub(crate) fn encode_png(frame: &Frame) -> Result<Vec<u8>, HttpDetectorError> {
    let index = frame.index();
    let image = to_image(frame).ok_or(HttpDetectorError::UnsupportedChannels {
        index,
        channels: frame.channels(),
    })?;

    let mut png = Cursor::new(Vec::new());
    image
        .write_to(&mut png, ImageFormat::Png)
        .map_err(|source| HttpDetectorError::Encode { index, source })?;
    Ok(png.into_inner())
}

pub(crate) fn parse_response(body: &[u8]) -> Result<Vec<Polygon>, HttpDetectorError> {
    serde_json::from_slice::<DetectionResponse>(body)
        .map(|r| r.polygons)
        .map_err(HttpDetectorError::Response)
}
