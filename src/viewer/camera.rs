//! Camera over a floor's SVG user space.
//!
//! The floor drawing and the marker overlay share one viewBox, the camera's [`Viewport`], so
//! both layers stay aligned under pan and zoom. Screen mapping follows the floor's
//! `preserveAspectRatio`.

use crate::models::map::ContentBox;
use crate::viewer::geometry::{FitMode, ScreenFit};

/// Button zoom-in and wheel-up factor.
pub const ZOOM_IN: f64 = 0.9;
/// Button zoom-out and wheel-down factor.
pub const ZOOM_OUT: f64 = 1.1;
/// Viewport size limits as fractions of the content box.
pub const MIN_SPAN: f64 = 0.02;
pub const MAX_SPAN: f64 = 3.0;
pub const PAD: f64 = 0.05;
pub const TALL_PAD: f64 = 0.15;
/// Content counts as tall when its h/w exceeds the screen's h/w by this factor.
pub const TALL_ASPECT_FACTOR: f64 = 1.5;

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct ScreenSize {
    pub width: f64,
    pub height: f64,
}

impl ScreenSize {
    pub fn new(width: f64, height: f64) -> Self {
        ScreenSize { width, height }
    }

    fn is_usable(&self) -> bool {
        self.width.is_finite() && self.height.is_finite() && self.width > 0.0 && self.height > 0.0
    }
}

/// Visible window into user space, `{x, y, w, h}`.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Viewport {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

impl Viewport {
    pub fn from_box(b: &ContentBox) -> Self {
        Viewport {
            x: b.min_x,
            y: b.min_y,
            w: b.width,
            h: b.height,
        }
    }

    pub fn center(&self) -> (f64, f64) {
        (self.x + self.w / 2.0, self.y + self.h / 2.0)
    }

    /// Value for a `viewBox` attribute.
    pub fn view_box_attr(&self) -> String {
        format!("{} {} {} {}", self.x, self.y, self.w, self.h)
    }
}

/// Content box grown by the adaptive padding.
pub fn padded_box(content: &ContentBox, screen: ScreenSize) -> ContentBox {
    let pad_x = content.width * PAD;
    let tall = screen.is_usable()
        && content.height / content.width > TALL_ASPECT_FACTOR * (screen.height / screen.width);
    let pad_y = content.height * if tall { TALL_PAD } else { PAD };
    ContentBox::new(
        content.min_x - pad_x,
        content.min_y - pad_y,
        content.width + 2.0 * pad_x,
        content.height + 2.0 * pad_y,
    )
}

/// Per-axis scale and offset from user space to screen pixels.
#[derive(Debug, Copy, Clone, PartialEq)]
struct ScreenTransform {
    sx: f64,
    sy: f64,
    tx: f64,
    ty: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Camera {
    screen: ScreenSize,
    fit: ScreenFit,
    content: ContentBox,
    padded: ContentBox,
    view: Viewport,
}

impl Camera {
    pub fn new(content: ContentBox, screen: ScreenSize, fit: ScreenFit) -> Self {
        let padded = padded_box(&content, screen);
        Camera {
            screen,
            fit,
            content,
            padded,
            view: Viewport::from_box(&padded),
        }
    }

    pub fn view(&self) -> Viewport {
        self.view
    }

    pub fn content_box(&self) -> ContentBox {
        self.content
    }

    pub fn padded_box(&self) -> ContentBox {
        self.padded
    }

    pub fn screen(&self) -> ScreenSize {
        self.screen
    }

    /// Re-target the camera at new content and reset to the padded box.
    pub fn fit_to(&mut self, content: ContentBox) {
        self.content = content;
        self.padded = padded_box(&content, self.screen);
        self.fit();
    }

    pub fn fit(&mut self) {
        self.view = Viewport::from_box(&self.padded);
    }

    /// Keep the current view but recompute padding and limits for a new screen size.
    pub fn resize(&mut self, screen: ScreenSize) {
        self.screen = screen;
        self.padded = padded_box(&self.content, screen);
        self.clamp();
    }

    fn transform(&self) -> ScreenTransform {
        let v = &self.view;
        if !self.screen.is_usable() || v.w <= 0.0 || v.h <= 0.0 {
            return ScreenTransform {
                sx: 1.0,
                sy: 1.0,
                tx: 0.0,
                ty: 0.0,
            };
        }
        let (fx, fy) = (self.screen.width / v.w, self.screen.height / v.h);
        let s = match self.fit.mode {
            FitMode::Stretch => {
                return ScreenTransform {
                    sx: fx,
                    sy: fy,
                    tx: 0.0,
                    ty: 0.0,
                };
            }
            FitMode::Meet => fx.min(fy),
            FitMode::Slice => fx.max(fy),
        };
        ScreenTransform {
            sx: s,
            sy: s,
            tx: (self.screen.width - v.w * s) * self.fit.align_x,
            ty: (self.screen.height - v.h * s) * self.fit.align_y,
        }
    }

    pub fn user_to_screen(&self, x: f64, y: f64) -> (f64, f64) {
        let t = self.transform();
        ((x - self.view.x) * t.sx + t.tx, (y - self.view.y) * t.sy + t.ty)
    }

    pub fn screen_to_user(&self, px: f64, py: f64) -> (f64, f64) {
        let t = self.transform();
        (self.view.x + (px - t.tx) / t.sx, self.view.y + (py - t.ty) / t.sy)
    }

    /// Scale the viewport by `factor`, keeping the user point under `(px, py)` in place.
    pub fn zoom_at(&mut self, factor: f64, px: f64, py: f64) {
        let anchor = self.screen_to_user(px, py);
        self.zoom_about(factor, anchor);
    }

    /// Button zoom around the viewport centre.
    pub fn zoom_center(&mut self, factor: f64) {
        let anchor = self.view.center();
        self.zoom_about(factor, anchor);
    }

    pub fn zoom_in(&mut self) {
        self.zoom_center(ZOOM_IN);
    }

    pub fn zoom_out(&mut self) {
        self.zoom_center(ZOOM_OUT);
    }

    /// Wheel-up (negative delta) zooms in, anything else zooms out.
    pub fn wheel(&mut self, delta_y: f64, px: f64, py: f64) {
        let factor = if delta_y < 0.0 { ZOOM_IN } else { ZOOM_OUT };
        self.zoom_at(factor, px, py);
    }

    fn zoom_about(&mut self, factor: f64, (ax, ay): (f64, f64)) {
        if !factor.is_finite() || factor <= 0.0 {
            return;
        }
        let v = self.view;
        let w = clamp_span(v.w * factor, self.content.width);
        let h = clamp_span(v.h * factor, self.content.height);
        self.view = Viewport {
            x: ax - (ax - v.x) * (w / v.w),
            y: ay - (ay - v.y) * (h / v.h),
            w,
            h,
        };
        self.clamp();
    }

    /// Move the view by a screen-pixel drag delta; content follows the pointer.
    pub fn pan_by(&mut self, dx: f64, dy: f64) {
        let t = self.transform();
        self.view.x -= dx / t.sx;
        self.view.y -= dy / t.sy;
        self.clamp();
    }

    fn clamp(&mut self) {
        self.view.w = clamp_span(self.view.w, self.content.width);
        self.view.h = clamp_span(self.view.h, self.content.height);
        let p = self.padded;
        self.view.x = clamp_origin(self.view.x, self.view.w, p.min_x, p.width);
        self.view.y = clamp_origin(self.view.y, self.view.h, p.min_y, p.height);
    }
}

fn clamp_span(span: f64, base: f64) -> f64 {
    if !(base.is_finite() && base > 0.0) {
        return span;
    }
    span.clamp(base * MIN_SPAN, base * MAX_SPAN)
}

/// Keep `[origin, origin+span]` inside `[min, min+extent]`, centring when it cannot fit.
fn clamp_origin(origin: f64, span: f64, min: f64, extent: f64) -> f64 {
    if !(min.is_finite() && extent.is_finite() && span.is_finite()) {
        origin
    } else if span > extent {
        min - (span - extent) / 2.0
    } else {
        origin.clamp(min, min + extent - span)
    }
}
