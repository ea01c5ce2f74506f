//! Floor-plan SVG analysis: declared viewBox, geometric content bounds, effective box.
//!
//! The geometric box approximates the browser's `getBBox()` on the root element: each drawable
//! shape's local bounds are pushed through its cumulative transform and unioned. Shapes under
//! non-rendered containers do not contribute.

use crate::models::map::ContentBox;
use log::{debug, warn};
use roxmltree::{Document, Node};
use std::error::Error;
use std::fmt::{self, Display, Formatter};
use std::ops::RangeInclusive;
use std::str::FromStr;
use svgtypes::{Align, AspectRatio, Length, LengthUnit, PointsParser, SimplePathSegment, SimplifyingPathParser};

/// Accepted range for `area(geometric) / area(viewBox)`.
pub const SANE_AREA_RATIO: RangeInclusive<f64> = 0.02..=1.10;

/// Used when the root declares neither a viewBox nor a usable width/height.
pub const FALLBACK_VIEW_BOX: ContentBox = ContentBox {
    min_x: 0.0,
    min_y: 0.0,
    width: 100.0,
    height: 100.0,
};

const NON_RENDERED: &[&str] = &["defs", "clipPath", "mask", "marker", "pattern", "symbol"];

#[derive(Debug)]
pub enum SvgError {
    Xml(roxmltree::Error),
    NotSvg(String),
}

impl Display for SvgError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            SvgError::Xml(e) => write!(f, "malformed SVG: {}", e),
            SvgError::NotSvg(root) => write!(f, "root element is <{}>, expected <svg>", root),
        }
    }
}

impl Error for SvgError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            SvgError::Xml(e) => Some(e),
            SvgError::NotSvg(_) => None,
        }
    }
}

impl From<roxmltree::Error> for SvgError {
    fn from(value: roxmltree::Error) -> Self {
        SvgError::Xml(value)
    }
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub enum FitMode {
    /// Whole viewBox visible (`meet`).
    Meet,
    /// Viewport filled, overflow cropped (`slice`).
    Slice,
    /// Independent x/y scale (`none`).
    Stretch,
}

/// How a viewBox is mapped onto a screen rectangle (`preserveAspectRatio`).
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct ScreenFit {
    pub mode: FitMode,
    /// Fraction of the leftover space placed before the content: 0, 0.5 or 1.
    pub align_x: f64,
    pub align_y: f64,
}

impl Default for ScreenFit {
    fn default() -> Self {
        ScreenFit {
            mode: FitMode::Meet,
            align_x: 0.5,
            align_y: 0.5,
        }
    }
}

impl From<AspectRatio> for ScreenFit {
    fn from(value: AspectRatio) -> Self {
        let (align_x, align_y) = match value.align {
            Align::None => return ScreenFit {
                mode: FitMode::Stretch,
                align_x: 0.0,
                align_y: 0.0,
            },
            Align::XMinYMin => (0.0, 0.0),
            Align::XMidYMin => (0.5, 0.0),
            Align::XMaxYMin => (1.0, 0.0),
            Align::XMinYMid => (0.0, 0.5),
            Align::XMidYMid => (0.5, 0.5),
            Align::XMaxYMid => (1.0, 0.5),
            Align::XMinYMax => (0.0, 1.0),
            Align::XMidYMax => (0.5, 1.0),
            Align::XMaxYMax => (1.0, 1.0),
        };
        ScreenFit {
            mode: if value.slice { FitMode::Slice } else { FitMode::Meet },
            align_x,
            align_y,
        }
    }
}

impl FromStr for ScreenFit {
    type Err = svgtypes::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AspectRatio::from_str(s).map(ScreenFit::from)
    }
}

/// What a floor-plan SVG declares and what it actually draws.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct FloorGeometry {
    pub view_box: ContentBox,
    /// Union of drawable shape bounds in root user space; `None` when nothing is drawn.
    pub geometric_box: Option<ContentBox>,
    pub fit: ScreenFit,
}

impl FloorGeometry {
    /// The geometric box if its area ratio to the viewBox is within [`SANE_AREA_RATIO`].
    pub fn sane_geometric_box(&self) -> Option<ContentBox> {
        self.geometric_box.filter(|b| is_sane(b, &self.view_box))
    }

    /// Manual override, else the sane geometric box, else the viewBox.
    pub fn effective_box(&self, manual: Option<ContentBox>) -> ContentBox {
        if let Some(b) = manual {
            if b.is_usable() {
                return b;
            }
            warn!("Ignoring unusable manual content box {:?}", b);
        }
        self.sane_geometric_box().unwrap_or(self.view_box)
    }
}

pub fn is_sane(content: &ContentBox, view_box: &ContentBox) -> bool {
    if !content.is_usable() || !view_box.is_usable() {
        return false;
    }
    SANE_AREA_RATIO.contains(&(content.area() / view_box.area()))
}

pub fn analyze_svg(text: &str) -> Result<FloorGeometry, SvgError> {
    let doc = Document::parse(text)?;
    let root = doc.root_element();
    if root.tag_name().name() != "svg" {
        return Err(SvgError::NotSvg(root.tag_name().name().to_string()));
    }

    let view_box = declared_view_box(&root);
    let fit = root
        .attribute("preserveAspectRatio")
        .and_then(|s| ScreenFit::from_str(s).ok())
        .unwrap_or_default();

    let mut bounds = Bounds::default();
    for child in root.children().filter(Node::is_element) {
        visit(&child, Affine::IDENTITY, &mut bounds);
    }
    let geometric_box = bounds.to_box();
    debug!("SVG viewBox {:?}, geometric box {:?}", view_box, geometric_box);
    Ok(FloorGeometry {
        view_box,
        geometric_box,
        fit,
    })
}

fn declared_view_box(root: &Node) -> ContentBox {
    if let Some(vb) = root.attribute("viewBox").and_then(|s| svgtypes::ViewBox::from_str(s).ok()) {
        return ContentBox::new(vb.x, vb.y, vb.w, vb.h);
    }
    match (number_attr(root, "width"), number_attr(root, "height")) {
        (Some(w), Some(h)) if w > 0.0 && h > 0.0 => ContentBox::new(0.0, 0.0, w, h),
        _ => FALLBACK_VIEW_BOX,
    }
}

/// Absolute user-space number; percentages and font-relative units are not resolved.
fn number_attr(node: &Node, name: &str) -> Option<f64> {
    let length = Length::from_str(node.attribute(name)?).ok()?;
    match length.unit {
        LengthUnit::None | LengthUnit::Px => Some(length.number).filter(|n| n.is_finite()),
        _ => None,
    }
}

fn visit(node: &Node, parent: Affine, bounds: &mut Bounds) {
    let name = node.tag_name().name();
    if NON_RENDERED.contains(&name) {
        return;
    }
    let ctm = match node.attribute("transform").map(svgtypes::Transform::from_str) {
        Some(Ok(t)) => parent.then(Affine::from(t)),
        Some(Err(e)) => {
            debug!("Skipping <{}> with unparseable transform: {}", name, e);
            return;
        }
        None => parent,
    };

    let mut local = Bounds::default();
    match name {
        "rect" => {
            if let (Some(w), Some(h)) = (number_attr(node, "width"), number_attr(node, "height")) {
                if w > 0.0 && h > 0.0 {
                    let x = number_attr(node, "x").unwrap_or(0.0);
                    let y = number_attr(node, "y").unwrap_or(0.0);
                    local.include(x, y);
                    local.include(x + w, y + h);
                }
            }
        }
        "circle" => {
            if let Some(r) = number_attr(node, "r").filter(|r| *r > 0.0) {
                let cx = number_attr(node, "cx").unwrap_or(0.0);
                let cy = number_attr(node, "cy").unwrap_or(0.0);
                local.include(cx - r, cy - r);
                local.include(cx + r, cy + r);
            }
        }
        "ellipse" => {
            if let (Some(rx), Some(ry)) = (number_attr(node, "rx"), number_attr(node, "ry")) {
                if rx > 0.0 && ry > 0.0 {
                    let cx = number_attr(node, "cx").unwrap_or(0.0);
                    let cy = number_attr(node, "cy").unwrap_or(0.0);
                    local.include(cx - rx, cy - ry);
                    local.include(cx + rx, cy + ry);
                }
            }
        }
        "line" => {
            local.include(
                number_attr(node, "x1").unwrap_or(0.0),
                number_attr(node, "y1").unwrap_or(0.0),
            );
            local.include(
                number_attr(node, "x2").unwrap_or(0.0),
                number_attr(node, "y2").unwrap_or(0.0),
            );
        }
        "polyline" | "polygon" => {
            for (x, y) in PointsParser::from(node.attribute("points").unwrap_or_default()) {
                local.include(x, y);
            }
        }
        "path" => path_bounds(node.attribute("d").unwrap_or_default(), &mut local),
        _ => {}
    }
    if let Some(b) = local.to_box_allow_flat() {
        bounds.include_box(&b, ctm);
    }

    for child in node.children().filter(Node::is_element) {
        visit(&child, ctm, bounds);
    }
}

fn path_bounds(d: &str, bounds: &mut Bounds) {
    let (mut cx, mut cy) = (0.0, 0.0);
    let (mut sx, mut sy) = (0.0, 0.0);
    for segment in SimplifyingPathParser::from(d) {
        // Rendering stops at the first error; so do the bounds.
        let Ok(segment) = segment else { break };
        match segment {
            SimplePathSegment::MoveTo { x, y } => {
                (sx, sy) = (x, y);
                (cx, cy) = (x, y);
                bounds.include(x, y);
            }
            SimplePathSegment::LineTo { x, y } => {
                (cx, cy) = (x, y);
                bounds.include(x, y);
            }
            SimplePathSegment::Quadratic { x1, y1, x, y } => {
                bounds.include(x, y);
                for t in quadratic_extrema(cx, x1, x).into_iter().chain(quadratic_extrema(cy, y1, y)) {
                    let mt = 1.0 - t;
                    bounds.include(
                        mt * mt * cx + 2.0 * mt * t * x1 + t * t * x,
                        mt * mt * cy + 2.0 * mt * t * y1 + t * t * y,
                    );
                }
                (cx, cy) = (x, y);
            }
            SimplePathSegment::CurveTo { x1, y1, x2, y2, x, y } => {
                bounds.include(x, y);
                for t in cubic_extrema(cx, x1, x2, x).into_iter().chain(cubic_extrema(cy, y1, y2, y)) {
                    bounds.include(cubic_at(cx, x1, x2, x, t), cubic_at(cy, y1, y2, y, t));
                }
                (cx, cy) = (x, y);
            }
            SimplePathSegment::ClosePath => (cx, cy) = (sx, sy),
        }
    }
}

fn quadratic_extrema(p0: f64, p1: f64, p2: f64) -> Option<f64> {
    let denom = p0 - 2.0 * p1 + p2;
    if denom.abs() < 1e-12 {
        return None;
    }
    Some((p0 - p1) / denom).filter(|t| *t > 0.0 && *t < 1.0)
}

fn cubic_at(p0: f64, p1: f64, p2: f64, p3: f64, t: f64) -> f64 {
    let mt = 1.0 - t;
    mt * mt * mt * p0 + 3.0 * mt * mt * t * p1 + 3.0 * mt * t * t * p2 + t * t * t * p3
}

/// Parameters in (0,1) where the cubic's derivative vanishes.
fn cubic_extrema(p0: f64, p1: f64, p2: f64, p3: f64) -> Vec<f64> {
    const EPS: f64 = 1e-12;
    let (d0, d1, d2) = (p1 - p0, p2 - p1, p3 - p2);
    let a = d0 - 2.0 * d1 + d2;
    let b = 2.0 * (d1 - d0);
    let c = d0;

    let roots = if a.abs() < EPS {
        if b.abs() < EPS { vec![] } else { vec![-c / b] }
    } else {
        let disc = b * b - 4.0 * a * c;
        if disc < 0.0 {
            vec![]
        } else {
            let sq = disc.sqrt();
            vec![(-b + sq) / (2.0 * a), (-b - sq) / (2.0 * a)]
        }
    };
    roots.into_iter().filter(|t| *t > 0.0 && *t < 1.0).collect()
}

/// 2D affine matrix `[a c e; b d f]`.
#[derive(Debug, Copy, Clone, PartialEq)]
struct Affine {
    a: f64,
    b: f64,
    c: f64,
    d: f64,
    e: f64,
    f: f64,
}

impl Affine {
    const IDENTITY: Affine = Affine {
        a: 1.0,
        b: 0.0,
        c: 0.0,
        d: 1.0,
        e: 0.0,
        f: 0.0,
    };

    /// `self` applied after `inner` (parent CTM times child transform).
    fn then(self, inner: Affine) -> Affine {
        Affine {
            a: self.a * inner.a + self.c * inner.b,
            b: self.b * inner.a + self.d * inner.b,
            c: self.a * inner.c + self.c * inner.d,
            d: self.b * inner.c + self.d * inner.d,
            e: self.a * inner.e + self.c * inner.f + self.e,
            f: self.b * inner.e + self.d * inner.f + self.f,
        }
    }

    fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        (self.a * x + self.c * y + self.e, self.b * x + self.d * y + self.f)
    }
}

impl From<svgtypes::Transform> for Affine {
    fn from(t: svgtypes::Transform) -> Self {
        Affine {
            a: t.a,
            b: t.b,
            c: t.c,
            d: t.d,
            e: t.e,
            f: t.f,
        }
    }
}

#[derive(Debug, Copy, Clone)]
struct Bounds {
    min_x: f64,
    min_y: f64,
    max_x: f64,
    max_y: f64,
}

impl Default for Bounds {
    fn default() -> Self {
        Bounds {
            min_x: f64::INFINITY,
            min_y: f64::INFINITY,
            max_x: f64::NEG_INFINITY,
            max_y: f64::NEG_INFINITY,
        }
    }
}

impl Bounds {
    fn include(&mut self, x: f64, y: f64) {
        if !x.is_finite() || !y.is_finite() {
            return;
        }
        self.min_x = self.min_x.min(x);
        self.min_y = self.min_y.min(y);
        self.max_x = self.max_x.max(x);
        self.max_y = self.max_y.max(y);
    }

    /// Include the four corners of `b` mapped through `m`.
    fn include_box(&mut self, b: &ContentBox, m: Affine) {
        for (x, y) in [
            (b.min_x, b.min_y),
            (b.max_x(), b.min_y),
            (b.min_x, b.max_y()),
            (b.max_x(), b.max_y()),
        ] {
            let (tx, ty) = m.apply(x, y);
            self.include(tx, ty);
        }
    }

    fn is_empty(&self) -> bool {
        self.min_x > self.max_x || self.min_y > self.max_y
    }

    /// Bounds of a single shape; a horizontal or vertical line still counts.
    fn to_box_allow_flat(&self) -> Option<ContentBox> {
        if self.is_empty() {
            return None;
        }
        Some(ContentBox::from_corners(self.min_x, self.min_y, self.max_x, self.max_y))
    }

    fn to_box(&self) -> Option<ContentBox> {
        self.to_box_allow_flat().filter(ContentBox::is_usable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OFFICE_FLOOR: &str = include_str!("../../tests/data/office-floor.svg");

    fn svg(body: &str, root_attrs: &str) -> String {
        format!(r#"<svg xmlns="http://www.w3.org/2000/svg" {root_attrs}>{body}</svg>"#)
    }

    #[test]
    fn office_floor_fixture() {
        let geom = analyze_svg(OFFICE_FLOOR).expect("parse fixture");
        assert_eq!(geom.view_box, ContentBox::new(0.0, 0.0, 1000.0, 800.0));
        // walls (translated rect), stairwell circle, archway curve peaking at y=25; defs ignored
        assert_eq!(geom.geometric_box, Some(ContentBox::from_corners(100.0, 25.0, 850.0, 650.0)));
        assert_eq!(geom.sane_geometric_box(), geom.geometric_box);
        assert_eq!(geom.fit, ScreenFit::default());
    }

    #[test]
    fn view_box_falls_back_to_size_then_default() {
        let geom = analyze_svg(&svg("", r#"width="640px" height="480""#)).expect("parse");
        assert_eq!(geom.view_box, ContentBox::new(0.0, 0.0, 640.0, 480.0));
        let geom = analyze_svg(&svg("", r#"width="100%""#)).expect("parse");
        assert_eq!(geom.view_box, FALLBACK_VIEW_BOX);
        assert_eq!(geom.geometric_box, None);
    }

    #[test]
    fn nested_transforms_compose() {
        let body = r#"<g transform="translate(10 20)"><g transform="scale(2)"><rect x="5" y="5" width="10" height="10"/></g></g>"#;
        let geom = analyze_svg(&svg(body, r#"viewBox="0 0 100 100""#)).expect("parse");
        assert_eq!(geom.geometric_box, Some(ContentBox::from_corners(20.0, 30.0, 40.0, 50.0)));
    }

    #[test]
    fn rotated_shape_uses_transformed_corners() {
        let body = r#"<rect x="0" y="0" width="10" height="20" transform="rotate(90)"/>"#;
        let geom = analyze_svg(&svg(body, r#"viewBox="-50 -50 100 100""#)).expect("parse");
        let b = geom.geometric_box.expect("bounds");
        assert!((b.min_x - -20.0).abs() < 1e-9 && (b.max_x() - 0.0).abs() < 1e-9);
        assert!((b.min_y - 0.0).abs() < 1e-9 && (b.max_y() - 10.0).abs() < 1e-9);
    }

    #[test]
    fn polygon_ellipse_and_quadratic_path() {
        let body = r#"<polygon points="10,10 30,10 20,40"/><ellipse cx="60" cy="60" rx="10" ry="5"/><path d="M0 50 Q 25 0 50 50"/>"#;
        let geom = analyze_svg(&svg(body, r#"viewBox="0 0 100 100""#)).expect("parse");
        // quadratic apex at y=25
        assert_eq!(geom.geometric_box, Some(ContentBox::from_corners(0.0, 10.0, 70.0, 65.0)));
    }

    #[test]
    fn insane_boxes_fall_back_to_view_box() {
        let tiny = analyze_svg(&svg(r#"<rect width="10" height="10"/>"#, r#"viewBox="0 0 1000 1000""#)).expect("parse");
        assert!(tiny.geometric_box.is_some());
        assert_eq!(tiny.sane_geometric_box(), None);
        assert_eq!(tiny.effective_box(None), tiny.view_box);

        let huge = analyze_svg(&svg(r#"<rect x="-500" width="2000" height="1000"/>"#, r#"viewBox="0 0 1000 1000""#))
            .expect("parse");
        assert_eq!(huge.effective_box(None), huge.view_box);
    }

    #[test]
    fn manual_box_wins_when_usable() {
        let geom = analyze_svg(OFFICE_FLOOR).expect("parse fixture");
        let manual = ContentBox::new(0.0, 0.0, 500.0, 500.0);
        assert_eq!(geom.effective_box(Some(manual)), manual);
        let flat = ContentBox::new(0.0, 0.0, 0.0, 500.0);
        assert_eq!(geom.effective_box(Some(flat)), geom.geometric_box.expect("geometric"));
    }

    #[test]
    fn reads_preserve_aspect_ratio() {
        let geom = analyze_svg(&svg("", r#"viewBox="0 0 10 10" preserveAspectRatio="none""#)).expect("parse");
        assert_eq!(geom.fit.mode, FitMode::Stretch);
        let geom = analyze_svg(&svg("", r#"viewBox="0 0 10 10" preserveAspectRatio="xMinYMax slice""#)).expect("parse");
        assert_eq!(
            geom.fit,
            ScreenFit {
                mode: FitMode::Slice,
                align_x: 0.0,
                align_y: 1.0
            }
        );
    }

    #[test]
    fn rejects_non_svg_documents() {
        assert!(matches!(analyze_svg("<html/>"), Err(SvgError::NotSvg(_))));
        assert!(matches!(analyze_svg("<svg"), Err(SvgError::Xml(_))));
    }
}
