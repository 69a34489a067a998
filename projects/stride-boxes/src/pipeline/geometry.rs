use crate::error::GeometryError;
use crate::pipeline::types::{BBox, FrameSize};

/// Placement of a native frame inside the detector's input canvas.
///
/// The frame is scaled uniformly by `scale` so it fits the canvas, then centered,
/// leaving `offset_x`/`offset_y` pixels of padding on each side.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub native: FrameSize,
    pub model: FrameSize,
    pub scale: f32,
    pub offset_x: f32,
    pub offset_y: f32,
}

impl Letterbox {
    pub fn new(native: FrameSize, model: FrameSize) -> Result<Self, GeometryError> {
        if native.is_degenerate() {
            return Err(GeometryError::DegenerateNativeSize);
        }
        if model.is_degenerate() {
            return Err(GeometryError::DegenerateModelSize);
        }

        let (native_w, native_h) = (native.width as f32, native.height as f32);
        let (model_w, model_h) = (model.width as f32, model.height as f32);

        let scale = (model_w / native_w).min(model_h / native_h);
        let offset_x = (model_w - native_w * scale) / 2.0;
        let offset_y = (model_h - native_h * scale) / 2.0;

        Ok(Self {
            native,
            model,
            scale,
            offset_x,
            offset_y,
        })
    }

    /// Model-normalized box to native-normalized box, clamped into the unit square.
    pub fn to_native(&self, rect: &BBox) -> BBox {
        let (model_w, model_h) = (self.model.width as f32, self.model.height as f32);
        let (native_w, native_h) = (self.native.width as f32, self.native.height as f32);

        let x = (rect.x * model_w - self.offset_x) / self.scale / native_w;
        let y = (rect.y * model_h - self.offset_y) / self.scale / native_h;
        let w = rect.w * model_w / self.scale / native_w;
        let h = rect.h * model_h / self.scale / native_h;

        clamp_unit(BBox { x, y, w, h })
    }

    /// Native-normalized box to model-normalized box; the inverse of `to_native`.
    pub fn to_model(&self, rect: &BBox) -> BBox {
        let (model_w, model_h) = (self.model.width as f32, self.model.height as f32);
        let (native_w, native_h) = (self.native.width as f32, self.native.height as f32);

        BBox {
            x: (rect.x * native_w * self.scale + self.offset_x) / model_w,
            y: (rect.y * native_h * self.scale + self.offset_y) / model_h,
            w: rect.w * native_w * self.scale / model_w,
            h: rect.h * native_h * self.scale / model_h,
        }
    }
}

/// Clamp the origin into [0, 1] first, then the extent against the clamped origin.
/// Each axis is handled on its own. Non-finite input collapses to an empty box.
pub fn clamp_unit(rect: BBox) -> BBox {
    if !rect.is_finite() {
        return BBox::EMPTY;
    }

    let x = rect.x.clamp(0.0, 1.0);
    let y = rect.y.clamp(0.0, 1.0);
    let w = rect.w.clamp(0.0, 1.0 - x);
    let h = rect.h.clamp(0.0, 1.0 - y);

    BBox { x, y, w, h }
}

/// Map a box from the detector's letterboxed input space into the native frame.
pub fn try_remap(rect: &BBox, native: FrameSize, model: FrameSize) -> Result<BBox, GeometryError> {
    Ok(Letterbox::new(native, model)?.to_native(rect))
}

/// Like [`try_remap`], but a degenerate size is a bug: it panics in debug builds and
/// yields an empty box in release builds so no NaN reaches stored results.
pub fn remap(rect: &BBox, native: FrameSize, model: FrameSize) -> BBox {
    match try_remap(rect, native, model) {
        Ok(mapped) => mapped,
        Err(e) => {
            debug_assert!(false, "remap precondition violated: {e}");
            tracing::warn!("remap precondition violated: {}", e);
            BBox::EMPTY
        }
    }
}
