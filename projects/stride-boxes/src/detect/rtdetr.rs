use super::tracker::{IouTracker, Observation};
use super::Detector;
use crate::pipeline::types::{BBox, FrameSize, RawDetection};
use anyhow::{anyhow, Result};
use image::imageops::FilterType;
use image::{DynamicImage, Rgb, RgbImage};
use std::collections::BTreeSet;
use usls::models::RTDETR;
use usls::{Config, Image};

const INPUT_SIDE: u32 = 640;
const PAD_VALUE: u8 = 114;

/// USLS RT-DETR model behind a letterboxed square input, followed by the IoU tracker.
pub struct RtDetrDetector {
    model: RTDETR,
    tracker: IouTracker,
    active_classes: BTreeSet<String>,
    min_confidence: f32,
}

impl RtDetrDetector {
    pub fn new(model_path: &str, min_confidence: f32) -> Result<Self> {
        let config = Config::default()
            .with_model_file(model_path)
            .with_class_names(&usls::NAMES_COCO_80);

        #[cfg(target_os = "macos")]
        let config = config.with_model_device(usls::Device::CoreMl);

        let config = config.commit()?;
        let model = RTDETR::new(config)?;
        tracing::info!("Loaded RT-DETR model from {}", model_path);

        Ok(Self {
            model,
            tracker: IouTracker::default(),
            active_classes: BTreeSet::new(),
            min_confidence,
        })
    }

    fn wants(&self, label: &str) -> bool {
        self.active_classes.is_empty() || self.active_classes.contains(label)
    }
}

/// Scale `image` to fit a `side`x`side` canvas and center it on padding.
pub fn letterbox(image: &RgbImage, side: u32) -> RgbImage {
    let (w, h) = image.dimensions();
    let scale = f32::min(side as f32 / w as f32, side as f32 / h as f32);
    let new_w = ((w as f32 * scale).round() as u32).clamp(1, side);
    let new_h = ((h as f32 * scale).round() as u32).clamp(1, side);
    let resized = image::imageops::resize(image, new_w, new_h, FilterType::Triangle);

    let mut canvas = RgbImage::from_pixel(side, side, Rgb([PAD_VALUE; 3]));
    let pad_x = (side - new_w) / 2;
    let pad_y = (side - new_h) / 2;
    image::imageops::replace(&mut canvas, &resized, pad_x.into(), pad_y.into());
    canvas
}

impl Detector for RtDetrDetector {
    fn name(&self) -> &'static str {
        "rtdetr"
    }

    fn input_size(&self) -> FrameSize {
        FrameSize::square(INPUT_SIDE)
    }

    fn detect(&mut self, image: &RgbImage) -> Result<Vec<RawDetection>> {
        if image.width() == 0 || image.height() == 0 {
            return Err(anyhow!("cannot run detection on an empty image"));
        }

        let canvas = letterbox(image, INPUT_SIDE);
        let input = Image::from(DynamicImage::ImageRgb8(canvas));
        let results = self.model.forward(&[input])?;
        let side = INPUT_SIDE as f32;

        let observations: Vec<Observation> = results
            .into_iter()
            .next()
            .map(|y| y.hbbs)
            .unwrap_or_default()
            .into_iter()
            .filter(|hbb| hbb.confidence().unwrap_or(0.0) >= self.min_confidence)
            .filter_map(|hbb| {
                let label = hbb.name()?.to_string();
                if !self.wants(&label) {
                    return None;
                }
                Some(Observation {
                    bbox: BBox {
                        x: hbb.xmin() / side,
                        y: hbb.ymin() / side,
                        w: hbb.width() / side,
                        h: hbb.height() / side,
                    },
                    label,
                    confidence: hbb.confidence().unwrap_or(0.0),
                })
            })
            .collect();

        Ok(self.tracker.update(observations))
    }

    fn reset_tracking(&mut self) {
        self.tracker.reset();
    }

    fn set_active_classes(&mut self, labels: BTreeSet<String>) {
        self.active_classes = labels;
    }

    fn active_classes(&self) -> BTreeSet<String> {
        self.active_classes.clone()
    }
}
