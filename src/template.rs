//! Template documents: loading, page geometry, content plumbing and
//! flattening of interactive form widgets into static page content.

use crate::error::{FormStampError, Result};
use crate::types::Rect;
use crate::unify::PageGeometry;
use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream, dictionary};

/// Longest `/Parent` chain followed when resolving inherited page attributes.
const MAX_INHERITANCE_DEPTH: usize = 32;
/// Annotation flag bit 2: hidden.
const ANNOT_FLAG_HIDDEN: i64 = 1 << 1;

#[derive(Debug, Clone, PartialEq)]
pub struct TemplateInfo {
    pub pdf_version: String,
    pub page_count: usize,
    pub has_form_fields: bool,
    pub byte_len: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlattenSummary {
    /// Widgets whose appearance was painted into page content.
    pub widgets_painted: usize,
    /// Widgets removed without painting (hidden, or no normal appearance).
    pub widgets_dropped: usize,
    pub acroform_removed: bool,
}

/// A loaded template. Owns its document for the length of one render.
#[derive(Debug, Clone)]
pub struct Template {
    pub(crate) doc: Document,
    page_ids: Vec<ObjectId>,
    byte_len: usize,
}

impl Template {
    pub fn load(bytes: &[u8]) -> Result<Self> {
        let doc = Document::load_mem(bytes)
            .map_err(|err| FormStampError::TemplateLoad(err.to_string()))?;
        if doc.is_encrypted() {
            return Err(FormStampError::TemplateEncrypted);
        }
        let page_ids: Vec<ObjectId> = doc.get_pages().values().copied().collect();
        if page_ids.is_empty() {
            return Err(FormStampError::EmptyTemplate);
        }
        Ok(Self {
            doc,
            page_ids,
            byte_len: bytes.len(),
        })
    }

    pub fn page_count(&self) -> usize {
        self.page_ids.len()
    }

    pub fn info(&self) -> TemplateInfo {
        TemplateInfo {
            pdf_version: self.doc.version.clone(),
            page_count: self.page_count(),
            has_form_fields: self.has_form_fields(),
            byte_len: self.byte_len,
        }
    }

    pub(crate) fn page_id(&self, page_index: usize) -> Option<ObjectId> {
        self.page_ids.get(page_index).copied()
    }

    /// Page boxes with `/Parent` inheritance applied. A missing MediaBox
    /// falls back to US Letter, a missing CropBox to the MediaBox.
    pub fn page_geometry(&self, page_index: usize) -> Option<PageGeometry> {
        let page_id = self.page_id(page_index)?;
        let media_box = self
            .inherited(page_id, b"MediaBox")
            .and_then(|obj| self.rect_from(obj))
            .unwrap_or_else(|| Rect::new(0.0, 0.0, 612.0, 792.0));
        let crop_box = self
            .inherited(page_id, b"CropBox")
            .and_then(|obj| self.rect_from(obj))
            .unwrap_or(media_box);
        let rotate = self
            .inherited(page_id, b"Rotate")
            .and_then(|obj| obj.as_i64().ok())
            .map(normalize_rotation)
            .unwrap_or(0);
        let user_unit = self
            .doc
            .get_dictionary(page_id)
            .ok()
            .and_then(|page| page.get(b"UserUnit").ok())
            .map(|obj| self.resolve(obj))
            .and_then(|obj| obj.as_float().ok())
            .filter(|unit| unit.is_finite() && *unit > 0.0)
            .unwrap_or(1.0);
        Some(PageGeometry {
            media_box,
            crop_box,
            rotate,
            user_unit,
        })
    }

    pub fn has_form_fields(&self) -> bool {
        let has_acroform = self
            .catalog()
            .map(|catalog| catalog.has(b"AcroForm"))
            .unwrap_or(false);
        has_acroform
            || self
                .page_ids
                .iter()
                .any(|page_id| !self.widget_refs(*page_id).is_empty())
    }

    fn catalog(&self) -> Option<&Dictionary> {
        let root = self.doc.trailer.get(b"Root").ok()?.as_reference().ok()?;
        self.doc.get_dictionary(root).ok()
    }

    fn resolve<'a>(&'a self, obj: &'a Object) -> &'a Object {
        match obj {
            Object::Reference(id) => self.doc.get_object(*id).unwrap_or(obj),
            _ => obj,
        }
    }

    fn inherited(&self, page_id: ObjectId, key: &[u8]) -> Option<&Object> {
        let mut node = self.doc.get_dictionary(page_id).ok()?;
        for _ in 0..MAX_INHERITANCE_DEPTH {
            if let Ok(value) = node.get(key) {
                return Some(self.resolve(value));
            }
            let parent = node.get(b"Parent").ok()?.as_reference().ok()?;
            node = self.doc.get_dictionary(parent).ok()?;
        }
        None
    }

    fn rect_from(&self, obj: &Object) -> Option<Rect> {
        let values = self.numbers(obj)?;
        match values.as_slice() {
            [x0, y0, x1, y1] => Some(Rect::from_corners(*x0, *y0, *x1, *y1)),
            _ => None,
        }
    }

    fn numbers(&self, obj: &Object) -> Option<Vec<f32>> {
        self.resolve(obj)
            .as_array()
            .ok()?
            .iter()
            .map(|item| self.resolve(item).as_float().ok())
            .collect()
    }

    /// Inherited `/Resources` of a page, dereferenced and cloned.
    pub(crate) fn page_resources(&self, page_id: ObjectId) -> Dictionary {
        self.inherited(page_id, b"Resources")
            .and_then(|obj| obj.as_dict().ok())
            .cloned()
            .unwrap_or_default()
    }

    /// One category (`Font`, `XObject`, ...) of a resource dictionary.
    pub(crate) fn resource_category(&self, resources: &Dictionary, key: &[u8]) -> Dictionary {
        resources
            .get(key)
            .ok()
            .map(|obj| self.resolve(obj))
            .and_then(|obj| obj.as_dict().ok())
            .cloned()
            .unwrap_or_default()
    }

    pub(crate) fn set_page_resources(&mut self, page_id: ObjectId, resources: Dictionary) -> Result<()> {
        self.doc
            .get_object_mut(page_id)
            .and_then(Object::as_dict_mut)?
            .set("Resources", Object::Dictionary(resources));
        Ok(())
    }

    /// References to the page's content streams as a flat list.
    fn content_refs(&self, page_id: ObjectId) -> Vec<Object> {
        let Ok(page) = self.doc.get_dictionary(page_id) else {
            return Vec::new();
        };
        match page.get(b"Contents") {
            Ok(Object::Reference(id)) => match self.doc.get_object(*id) {
                Ok(Object::Array(items)) => items.clone(),
                _ => vec![Object::Reference(*id)],
            },
            Ok(Object::Array(items)) => items.clone(),
            _ => Vec::new(),
        }
    }

    fn set_contents(&mut self, page_id: ObjectId, refs: Vec<Object>) -> Result<()> {
        self.doc
            .get_object_mut(page_id)
            .and_then(Object::as_dict_mut)?
            .set("Contents", Object::Array(refs));
        Ok(())
    }

    /// Brackets the existing content of every page in `q`/`Q` so anything
    /// appended later starts from the default graphics state.
    pub(crate) fn isolate_page_contents(&mut self) -> Result<()> {
        for page_id in self.page_ids.clone() {
            let existing = self.content_refs(page_id);
            if existing.is_empty() {
                continue;
            }
            let open = self.doc.add_object(Stream::new(Dictionary::new(), b"q\n".to_vec()));
            let close = self.doc.add_object(Stream::new(Dictionary::new(), b"\nQ\n".to_vec()));
            let mut refs = Vec::with_capacity(existing.len() + 2);
            refs.push(Object::Reference(open));
            refs.extend(existing);
            refs.push(Object::Reference(close));
            self.set_contents(page_id, refs)?;
        }
        Ok(())
    }

    pub(crate) fn append_page_content(&mut self, page_id: ObjectId, content: Vec<u8>) -> Result<()> {
        let stream_id = self.doc.add_object(Stream::new(Dictionary::new(), content));
        let mut refs = self.content_refs(page_id);
        refs.push(Object::Reference(stream_id));
        self.set_contents(page_id, refs)
    }

    fn annotation_refs(&self, page_id: ObjectId) -> Vec<Object> {
        self.doc
            .get_dictionary(page_id)
            .ok()
            .and_then(|page| page.get(b"Annots").ok())
            .map(|obj| self.resolve(obj))
            .and_then(|obj| obj.as_array().ok())
            .cloned()
            .unwrap_or_default()
    }

    fn is_widget(&self, annot: &Object) -> bool {
        self.resolve(annot)
            .as_dict()
            .ok()
            .and_then(|dict| dict.get(b"Subtype").ok())
            .and_then(|subtype| subtype.as_name().ok())
            .map(|name| name == b"Widget")
            .unwrap_or(false)
    }

    fn widget_refs(&self, page_id: ObjectId) -> Vec<Object> {
        self.annotation_refs(page_id)
            .into_iter()
            .filter(|annot| self.is_widget(annot))
            .collect()
    }

    /// Paints every widget's normal appearance into its page and removes the
    /// interactive form. Works on a copy, so the template is unchanged when
    /// an error is returned.
    pub fn flatten_form_fields(&mut self) -> Result<FlattenSummary> {
        let mut work = self.clone();
        let summary = work.flatten_in_place()?;
        *self = work;
        Ok(summary)
    }

    fn flatten_in_place(&mut self) -> Result<FlattenSummary> {
        let mut summary = FlattenSummary::default();
        for page_id in self.page_ids.clone() {
            let annots = self.annotation_refs(page_id);
            if annots.is_empty() {
                continue;
            }
            let mut kept = Vec::new();
            let mut ops = Vec::new();
            let mut resources = self.page_resources(page_id);
            let mut xobjects = self.resource_category(&resources, b"XObject");

            for annot in annots {
                if !self.is_widget(&annot) {
                    kept.push(annot);
                    continue;
                }
                match self.widget_appearance(&annot)? {
                    Some(appearance) => {
                        let name = format!("FsFlat{}", xobjects.len() + 1);
                        xobjects.set(name.as_bytes().to_vec(), Object::Reference(appearance.stream_id));
                        ops.push(Operation::new("q", vec![]));
                        ops.push(Operation::new(
                            "cm",
                            appearance.matrix.iter().map(|v| Object::Real(*v)).collect(),
                        ));
                        ops.push(Operation::new("Do", vec![Object::Name(name.into_bytes())]));
                        ops.push(Operation::new("Q", vec![]));
                        summary.widgets_painted += 1;
                    }
                    None => summary.widgets_dropped += 1,
                }
            }

            if !ops.is_empty() {
                resources.set("XObject", Object::Dictionary(xobjects));
                self.set_page_resources(page_id, resources)?;
                let content = Content { operations: ops }.encode()?;
                self.append_page_content(page_id, content)?;
            }
            let page = self.doc.get_object_mut(page_id).and_then(Object::as_dict_mut)?;
            if kept.is_empty() {
                page.remove(b"Annots");
            } else {
                page.set("Annots", Object::Array(kept));
            }
        }

        if let Ok(root) = self
            .doc
            .trailer
            .get(b"Root")
            .and_then(Object::as_reference)
        {
            let catalog = self.doc.get_object_mut(root).and_then(Object::as_dict_mut)?;
            summary.acroform_removed = catalog.remove(b"AcroForm").is_some();
        }
        Ok(summary)
    }

    /// The widget's normal appearance stream and the matrix that maps its
    /// transformed bounding box onto the widget rectangle.
    fn widget_appearance(&mut self, annot: &Object) -> Result<Option<WidgetAppearance>> {
        let Ok(widget) = self.resolve(annot).as_dict() else {
            return Ok(None);
        };
        let flags = widget
            .get(b"F")
            .ok()
            .and_then(|obj| obj.as_i64().ok())
            .unwrap_or(0);
        if flags & ANNOT_FLAG_HIDDEN != 0 {
            return Ok(None);
        }
        let Some(rect) = widget.get(b"Rect").ok().and_then(|obj| self.rect_from(obj)) else {
            return Ok(None);
        };
        let state = widget
            .get(b"AS")
            .ok()
            .and_then(|obj| obj.as_name().ok())
            .map(<[u8]>::to_vec);
        let normal = widget
            .get(b"AP")
            .ok()
            .map(|obj| self.resolve(obj))
            .and_then(|obj| obj.as_dict().ok())
            .and_then(|ap| ap.get(b"N").ok());
        let stream_id = match normal {
            Some(Object::Reference(id)) => match self.doc.get_object(*id) {
                Ok(Object::Stream(_)) => Some(*id),
                Ok(Object::Dictionary(states)) => select_state(states, state.as_deref()),
                _ => None,
            },
            Some(Object::Dictionary(states)) => select_state(states, state.as_deref()),
            _ => None,
        };
        let Some(stream_id) = stream_id else {
            return Ok(None);
        };
        let Ok(Object::Stream(stream)) = self.doc.get_object(stream_id) else {
            return Ok(None);
        };
        let bbox = stream
            .dict
            .get(b"BBox")
            .ok()
            .and_then(|obj| self.rect_from(obj))
            .unwrap_or(rect);
        let form_matrix = stream
            .dict
            .get(b"Matrix")
            .ok()
            .and_then(|obj| self.numbers(obj))
            .and_then(|values| <[f32; 6]>::try_from(values).ok())
            .unwrap_or([1.0, 0.0, 0.0, 1.0, 0.0, 0.0]);
        let Some(matrix) = fit_matrix(bbox, form_matrix, rect) else {
            return Ok(None);
        };

        // Appearance streams are not required to carry their XObject type.
        if let Ok(Object::Stream(stream)) = self.doc.get_object_mut(stream_id) {
            stream.dict.set("Type", Object::Name(b"XObject".to_vec()));
            stream.dict.set("Subtype", Object::Name(b"Form".to_vec()));
        }
        Ok(Some(WidgetAppearance { stream_id, matrix }))
    }

    /// Adds a named `/Print` open action so viewers raise the print dialog.
    pub(crate) fn set_auto_print(&mut self) -> Result<()> {
        let action = self.doc.add_object(dictionary! {
            "Type" => "Action",
            "S" => "Named",
            "N" => "Print",
        });
        let root = self.doc.trailer.get(b"Root").and_then(Object::as_reference)?;
        self.doc
            .get_object_mut(root)
            .and_then(Object::as_dict_mut)?
            .set("OpenAction", Object::Reference(action));
        Ok(())
    }

    pub(crate) fn into_bytes(mut self) -> Result<Vec<u8>> {
        self.doc.compress();
        let mut out = Vec::new();
        self.doc.save_to(&mut out)?;
        Ok(out)
    }
}

struct WidgetAppearance {
    stream_id: ObjectId,
    matrix: [f32; 6],
}

fn select_state(states: &Dictionary, state: Option<&[u8]>) -> Option<ObjectId> {
    let chosen = match state {
        Some(name) => states.get(name).ok(),
        None if states.len() == 1 => states.iter().next().map(|(_, value)| value),
        None => None,
    }?;
    chosen.as_reference().ok()
}

/// Matrix placing a form XObject so that its bounding box, transformed by the
/// form's own matrix, exactly covers `rect`.
fn fit_matrix(bbox: Rect, form: [f32; 6], rect: Rect) -> Option<[f32; 6]> {
    let [a, b, c, d, e, f] = form;
    let x0 = bbox.x.to_f32();
    let y0 = bbox.y.to_f32();
    let x1 = bbox.right().to_f32();
    let y1 = bbox.top().to_f32();
    let corners = [(x0, y0), (x1, y0), (x0, y1), (x1, y1)].map(|(x, y)| (a * x + c * y + e, b * x + d * y + f));
    let min_x = corners.iter().map(|p| p.0).fold(f32::INFINITY, f32::min);
    let max_x = corners.iter().map(|p| p.0).fold(f32::NEG_INFINITY, f32::max);
    let min_y = corners.iter().map(|p| p.1).fold(f32::INFINITY, f32::min);
    let max_y = corners.iter().map(|p| p.1).fold(f32::NEG_INFINITY, f32::max);
    let width = max_x - min_x;
    let height = max_y - min_y;
    if width <= 0.0 || height <= 0.0 {
        return None;
    }
    let sx = rect.width.to_f32() / width;
    let sy = rect.height.to_f32() / height;
    Some([
        sx,
        0.0,
        0.0,
        sy,
        rect.x.to_f32() - min_x * sx,
        rect.y.to_f32() - min_y * sy,
    ])
}

fn normalize_rotation(degrees: i64) -> i32 {
    let quarter_turns = (degrees as f64 / 90.0).round() as i64;
    (quarter_turns.rem_euclid(4) * 90) as i32
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Single-page template with optional CropBox and a text field widget.
    pub(crate) fn template_bytes(crop: Option<[f32; 4]>, with_widget: bool) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let content_id = doc.add_object(Stream::new(
            dictionary! {},
            b"0 0 1 rg 10 10 100 100 re f".to_vec(),
        ));
        let mut page = dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => dictionary! {},
        };
        if let Some([x0, y0, x1, y1]) = crop {
            page.set("CropBox", vec![x0.into(), y0.into(), x1.into(), y1.into()]);
        }
        let mut acroform = None;
        if with_widget {
            let appearance = doc.add_object(Stream::new(
                dictionary! {
                    "BBox" => vec![0.into(), 0.into(), 100.into(), 20.into()],
                },
                b"BT /Helv 10 Tf 2 5 Td (Preset) Tj ET".to_vec(),
            ));
            let widget = doc.add_object(dictionary! {
                "Type" => "Annot",
                "Subtype" => "Widget",
                "FT" => "Tx",
                "T" => Object::string_literal("nome"),
                "Rect" => vec![50.into(), 700.into(), 250.into(), 740.into()],
                "AP" => dictionary! { "N" => appearance },
            });
            let link = doc.add_object(dictionary! {
                "Type" => "Annot",
                "Subtype" => "Link",
                "Rect" => vec![0.into(), 0.into(), 10.into(), 10.into()],
            });
            page.set("Annots", vec![widget.into(), link.into()]);
            acroform = Some(dictionary! { "Fields" => vec![widget.into()] });
        }
        let page_id = doc.add_object(page);
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![page_id.into()],
                "Count" => 1,
                "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
            }),
        );
        let mut catalog = dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        };
        if let Some(form) = acroform {
            catalog.set("AcroForm", form);
        }
        let catalog_id = doc.add_object(catalog);
        doc.trailer.set("Root", catalog_id);
        let mut out = Vec::new();
        doc.save_to(&mut out).expect("save");
        out
    }

    #[test]
    fn rejects_non_pdf_bytes() {
        let err = Template::load(b"definitely not a pdf").expect_err("invalid");
        assert!(matches!(err, FormStampError::TemplateLoad(_)));
    }

    #[test]
    fn inherits_media_box_from_page_tree() {
        let template = Template::load(&template_bytes(None, false)).expect("load");
        let geometry = template.page_geometry(0).expect("page 0");
        assert_eq!(geometry.media_box, Rect::new(0.0, 0.0, 595.0, 842.0));
        assert_eq!(geometry.crop_box, geometry.media_box);
        assert_eq!(geometry.rotate, 0);
        assert!(template.page_geometry(1).is_none());
    }

    #[test]
    fn reads_offset_crop_box() {
        let template =
            Template::load(&template_bytes(Some([20.0, 30.0, 520.0, 730.0]), false)).expect("load");
        let geometry = template.page_geometry(0).expect("page 0");
        assert_eq!(geometry.crop_box, Rect::new(20.0, 30.0, 500.0, 700.0));
    }

    #[test]
    fn flattening_paints_widgets_and_drops_the_form() {
        let mut template = Template::load(&template_bytes(None, true)).expect("load");
        assert!(template.has_form_fields());
        let summary = template.flatten_form_fields().expect("flatten");
        assert_eq!(summary.widgets_painted, 1);
        assert!(summary.acroform_removed);
        assert!(!template.has_form_fields());

        let page_id = template.page_id(0).expect("page");
        assert_eq!(template.annotation_refs(page_id).len(), 1);
        let content = template.doc.get_page_content(page_id).expect("content");
        let text = String::from_utf8_lossy(&content);
        assert!(text.contains("/FsFlat1 Do"), "{text}");
        let xobjects = template.resource_category(&template.page_resources(page_id), b"XObject");
        assert!(xobjects.has(b"FsFlat1"));
    }

    #[test]
    fn fit_matrix_maps_bbox_onto_rect() {
        let matrix = fit_matrix(
            Rect::new(0.0, 0.0, 100.0, 20.0),
            [1.0, 0.0, 0.0, 1.0, 0.0, 0.0],
            Rect::new(50.0, 700.0, 200.0, 40.0),
        )
        .expect("matrix");
        assert_eq!(matrix, [2.0, 0.0, 0.0, 2.0, 50.0, 700.0]);
        assert!(fit_matrix(Rect::new(0.0, 0.0, 0.0, 10.0), [1.0, 0.0, 0.0, 1.0, 0.0, 0.0], Rect::new(0.0, 0.0, 1.0, 1.0)).is_none());
    }

    #[test]
    fn isolation_brackets_existing_content() {
        let mut template = Template::load(&template_bytes(None, false)).expect("load");
        template.isolate_page_contents().expect("isolate");
        template
            .append_page_content(template.page_id(0).expect("page"), b"BT ET".to_vec())
            .expect("append");
        let content = template
            .doc
            .get_page_content(template.page_id(0).expect("page"))
            .expect("content");
        let text = String::from_utf8_lossy(&content);
        let q = text.find("q\n").expect("q");
        let close = text.find("\nQ\n").expect("Q");
        let appended = text.find("BT ET").expect("appended");
        assert!(q < close && close < appended, "{text}");
    }

    #[test]
    fn auto_print_survives_serialization() {
        let mut template = Template::load(&template_bytes(None, false)).expect("load");
        template.set_auto_print().expect("auto print");
        let doc = Document::load_mem(&template.into_bytes().expect("bytes")).expect("reload");
        let action = doc
            .catalog()
            .and_then(|catalog| catalog.get(b"OpenAction"))
            .and_then(Object::as_reference)
            .and_then(|id| doc.get_dictionary(id))
            .expect("open action");
        assert_eq!(action.get(b"S").and_then(Object::as_name).expect("S"), b"Named");
        assert_eq!(action.get(b"N").and_then(Object::as_name).expect("N"), b"Print");
    }

    #[test]
    fn rotation_is_normalized_to_quarter_turns() {
        assert_eq!(normalize_rotation(-90), 270);
        assert_eq!(normalize_rotation(450), 90);
        assert_eq!(normalize_rotation(0), 0);
    }
}
