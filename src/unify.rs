//! Rendered-view to native page-space conversion.
//!
//! Field placements are authored against a page as a viewer paints it at
//! 100% scale: top-left origin, y growing downward, origin at the corner of
//! the CropBox. Glyphs are written in PDF user space: bottom-left origin,
//! y growing upward, CropBox possibly offset inside the MediaBox. The
//! unifier is the only place that converts between the two.

use crate::types::{Pt, Rect, Size};

/// Page boxes as read from the template, inherited attributes resolved.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageGeometry {
    pub media_box: Rect,
    pub crop_box: Rect,
    /// Clockwise page rotation in degrees, normalized to 0, 90, 180 or 270.
    pub rotate: i32,
    pub user_unit: f32,
}

impl PageGeometry {
    pub fn unrotated(media_box: Rect, crop_box: Rect) -> Self {
        Self {
            media_box,
            crop_box,
            rotate: 0,
            user_unit: 1.0,
        }
    }

    /// The CropBox clipped to the MediaBox: the area a viewer paints.
    pub fn visible_box(&self) -> Rect {
        self.crop_box
            .intersect(&self.media_box)
            .unwrap_or(self.media_box)
    }
}

/// A rendering back-end's idea of how large a page is at 100% scale.
pub trait PageViewport {
    fn measure(&self, page: &PageGeometry) -> Option<Size>;
}

/// Measures pages the way a browser-side viewer does: the visible box
/// scaled by UserUnit. Placements are read in the page's unrotated frame,
/// so `/Rotate` does not swap the axes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ViewerViewport;

impl PageViewport for ViewerViewport {
    fn measure(&self, page: &PageGeometry) -> Option<Size> {
        let view = page.visible_box();
        let unit = if page.user_unit.is_finite() && page.user_unit > 0.0 {
            page.user_unit
        } else {
            1.0
        };
        let size = Size::new(view.width.to_f32() * unit, view.height.to_f32() * unit);
        (!size.is_degenerate()).then_some(size)
    }
}

/// Dimensions recorded by the mapping editor's canvas.
#[derive(Debug, Clone, Copy)]
pub struct FixedViewport(pub Size);

impl PageViewport for FixedViewport {
    fn measure(&self, _page: &PageGeometry) -> Option<Size> {
        (!self.0.is_degenerate()).then_some(self.0)
    }
}

/// A field box converted to native page space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NativeBox {
    pub left: Pt,
    pub top: Pt,
    pub bottom: Pt,
    pub width: Pt,
    pub height: Pt,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoordinateUnifier {
    /// The rectangle rendered coordinates are relative to.
    crop_box: Rect,
    scale_x: f32,
    scale_y: f32,
    identity_fallback: bool,
}

impl CoordinateUnifier {
    /// `scale = crop / rendered` per axis. Missing or zero rendered
    /// dimensions fall back to the identity scale.
    pub fn new(crop_box: Rect, rendered: Option<Size>) -> Self {
        match rendered.filter(|size| !size.is_degenerate()) {
            Some(size) => Self {
                crop_box,
                scale_x: crop_box.width.to_f32() / size.width.to_f32(),
                scale_y: crop_box.height.to_f32() / size.height.to_f32(),
                identity_fallback: false,
            },
            None => {
                log::warn!(
                    "viewport measurement unavailable for crop box {:?}; using identity scale",
                    crop_box
                );
                Self {
                    crop_box,
                    scale_x: 1.0,
                    scale_y: 1.0,
                    identity_fallback: true,
                }
            }
        }
    }

    /// Unifies against the same visible box the viewport measures, so the
    /// scale and the origin always describe one rectangle.
    pub fn for_page(page: &PageGeometry, viewport: &dyn PageViewport) -> Self {
        if page.rotate != 0 {
            log::warn!(
                "page is rotated {} degrees; placements are mapped in its unrotated frame",
                page.rotate
            );
        }
        Self::new(page.visible_box(), viewport.measure(page))
    }

    pub fn scale(&self) -> (f32, f32) {
        (self.scale_x, self.scale_y)
    }

    pub fn is_identity_fallback(&self) -> bool {
        self.identity_fallback
    }

    pub fn crop_box(&self) -> Rect {
        self.crop_box
    }

    pub fn scale_x(&self, value: f32) -> Pt {
        Pt::from_f32(value * self.scale_x)
    }

    pub fn scale_y(&self, value: f32) -> Pt {
        Pt::from_f32(value * self.scale_y)
    }

    /// Native x of a rendered-space x coordinate.
    pub fn native_x(&self, x: f32) -> Pt {
        self.crop_box.x + self.scale_x(x)
    }

    /// Native y of a rendered-space (y-down) coordinate.
    pub fn native_y(&self, y: f32) -> Pt {
        self.crop_box.top() - self.scale_y(y)
    }

    pub fn unify_box(&self, x: f32, y: f32, width: f32, height: f32) -> NativeBox {
        let scaled_h = self.scale_y(height);
        let top = self.native_y(y);
        NativeBox {
            left: self.native_x(x),
            top,
            bottom: top - scaled_h,
            width: self.scale_x(width),
            height: scaled_h,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_dimensions_give_unit_scale() {
        let crop = Rect::new(0.0, 0.0, 595.0, 842.0);
        let unifier = CoordinateUnifier::new(crop, Some(Size::new(595.0, 842.0)));
        assert_eq!(unifier.scale(), (1.0, 1.0));
        let b = unifier.unify_box(50.0, 100.0, 120.0, 10.0);
        assert_eq!(b.left, Pt::from_f32(50.0));
        assert_eq!(b.top, Pt::from_f32(742.0));
        assert_eq!(b.bottom, Pt::from_f32(732.0));
    }

    #[test]
    fn half_size_viewport_doubles_coordinates() {
        let crop = Rect::new(0.0, 0.0, 600.0, 850.0);
        let unifier = CoordinateUnifier::new(crop, Some(Size::new(300.0, 425.0)));
        assert_eq!(unifier.scale(), (2.0, 2.0));
        let b = unifier.unify_box(10.0, 20.0, 5.0, 5.0);
        assert_eq!(b.left, Pt::from_f32(20.0));
        assert_eq!(b.top, Pt::from_f32(810.0));
        assert_eq!(b.width, Pt::from_f32(10.0));
        assert_eq!(b.bottom, Pt::from_f32(800.0));
    }

    #[test]
    fn offset_crop_box_shifts_origin() {
        let crop = Rect::new(30.0, 40.0, 500.0, 700.0);
        let unifier = CoordinateUnifier::new(crop, Some(Size::new(500.0, 700.0)));
        let b = unifier.unify_box(0.0, 0.0, 10.0, 10.0);
        assert_eq!(b.left, Pt::from_f32(30.0));
        assert_eq!(b.top, Pt::from_f32(740.0));
    }

    #[test]
    fn degenerate_viewport_falls_back_to_identity() {
        let crop = Rect::new(0.0, 0.0, 600.0, 850.0);
        let unifier = CoordinateUnifier::new(crop, Some(Size::new(0.0, 425.0)));
        assert!(unifier.is_identity_fallback());
        assert_eq!(unifier.scale(), (1.0, 1.0));
        assert!(CoordinateUnifier::new(crop, None).is_identity_fallback());
    }

    #[test]
    fn viewer_viewport_measures_the_clipped_crop() {
        let media = Rect::new(0.0, 0.0, 612.0, 792.0);
        let crop = Rect::new(-10.0, 0.0, 700.0, 500.0);
        let mut page = PageGeometry::unrotated(media, crop);
        assert_eq!(page.visible_box(), Rect::new(0.0, 0.0, 612.0, 500.0));
        assert_eq!(ViewerViewport.measure(&page), Some(Size::new(612.0, 500.0)));
        page.user_unit = 2.0;
        assert_eq!(ViewerViewport.measure(&page), Some(Size::new(1224.0, 1000.0)));
    }

    #[test]
    fn crop_overhanging_the_media_box_keeps_unit_scale() {
        let media = Rect::new(0.0, 0.0, 612.0, 792.0);
        let crop = Rect::new(-10.0, 0.0, 700.0, 500.0);
        let page = PageGeometry::unrotated(media, crop);
        let unifier = CoordinateUnifier::for_page(&page, &ViewerViewport);
        assert_eq!(unifier.scale(), (1.0, 1.0));
        let b = unifier.unify_box(0.0, 0.0, 100.0, 10.0);
        assert_eq!(b.left, Pt::ZERO);
        assert_eq!(b.top, Pt::from_f32(500.0));
        assert_eq!(b.width, Pt::from_f32(100.0));
    }

    #[test]
    fn rotated_page_scales_isotropically() {
        let media = Rect::new(0.0, 0.0, 612.0, 792.0);
        let mut page = PageGeometry::unrotated(media, media);
        page.rotate = 90;
        assert_eq!(ViewerViewport.measure(&page), Some(Size::new(612.0, 792.0)));
        let unifier = CoordinateUnifier::for_page(&page, &ViewerViewport);
        assert_eq!(unifier.scale(), (1.0, 1.0));
    }

    #[test]
    fn user_unit_scales_both_axes_equally() {
        let media = Rect::new(0.0, 0.0, 600.0, 800.0);
        let mut page = PageGeometry::unrotated(media, media);
        page.user_unit = 2.0;
        let unifier = CoordinateUnifier::for_page(&page, &ViewerViewport);
        assert_eq!(unifier.scale(), (0.5, 0.5));
    }

    #[test]
    fn fixed_viewport_ignores_page() {
        let page = PageGeometry::unrotated(
            Rect::new(0.0, 0.0, 600.0, 850.0),
            Rect::new(0.0, 0.0, 600.0, 850.0),
        );
        let fixed = FixedViewport(Size::new(300.0, 425.0));
        let unifier = CoordinateUnifier::for_page(&page, &fixed);
        assert_eq!(unifier.scale(), (2.0, 2.0));
        assert_eq!(FixedViewport(Size::new(0.0, 0.0)).measure(&page), None);
    }
}
