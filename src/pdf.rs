//! Writes recorded canvas commands onto template pages as PDF content.

use crate::canvas::{Canvas, Command};
use crate::error::Result;
use crate::font::{FontProgram, FontRegistry, RegisteredFont, encode_winansi};
use crate::image::PdfImage;
use crate::template::Template;
use crate::types::{Color, Pt};
use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Object, ObjectId, Stream, StringFormat, dictionary};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OverlaySummary {
    pub pages_written: usize,
    pub fonts_used: usize,
    pub images_embedded: usize,
    /// Characters outside WinAnsi that were drawn as `?`.
    pub replaced_chars: usize,
}

struct TextState {
    font_name: String,
    font_size: Pt,
}

/// Document-wide font and image objects, created on first use.
struct ResourcePool<'a> {
    fonts: &'a FontRegistry,
    font_objects: BTreeMap<String, ObjectId>,
    image_objects: BTreeMap<String, ObjectId>,
}

impl<'a> ResourcePool<'a> {
    fn font_object(&mut self, template: &mut Template, name: &str) -> ObjectId {
        if let Some(id) = self.font_objects.get(name) {
            return *id;
        }
        let id = match self.fonts.resolve(name) {
            Some(font) => add_font_objects(template, font),
            None => template.doc.add_object(standard_font_dict(crate::font::DEFAULT_FONT)),
        };
        self.font_objects.insert(name.to_string(), id);
        id
    }
}

pub(crate) fn write_overlay(
    template: &mut Template,
    canvas: Canvas,
    fonts: &FontRegistry,
) -> Result<OverlaySummary> {
    let (pages, images) = canvas.into_parts();
    let mut pool = ResourcePool {
        fonts,
        font_objects: BTreeMap::new(),
        image_objects: BTreeMap::new(),
    };
    for (resource_id, image) in &images {
        let id = add_image_objects(template, image);
        pool.image_objects.insert(resource_id.clone(), id);
    }

    let mut summary = OverlaySummary {
        images_embedded: images.len(),
        ..OverlaySummary::default()
    };
    for (page_index, page) in pages.iter().enumerate() {
        if page.commands.is_empty() {
            continue;
        }
        let Some(page_id) = template.page_id(page_index) else {
            continue;
        };
        let mut resources = template.page_resources(page_id);
        let mut font_dict = template.resource_category(&resources, b"Font");
        let mut xobject_dict = template.resource_category(&resources, b"XObject");
        let mut font_names: BTreeMap<String, String> = BTreeMap::new();

        let mut ops = vec![Operation::new("q", vec![])];
        let mut state = TextState {
            font_name: crate::font::DEFAULT_FONT.to_string(),
            font_size: Pt::from_f32(12.0),
        };
        let mut saved = Vec::new();
        for command in &page.commands {
            match command {
                Command::SaveState => {
                    saved.push((state.font_name.clone(), state.font_size));
                    ops.push(Operation::new("q", vec![]));
                }
                Command::RestoreState => {
                    if let Some((name, size)) = saved.pop() {
                        state.font_name = name;
                        state.font_size = size;
                    }
                    ops.push(Operation::new("Q", vec![]));
                }
                Command::SetFillColor(color) => ops.push(fill_color_op(*color)),
                Command::SetFontName(name) => state.font_name = name.clone(),
                Command::SetFontSize(size) => state.font_size = *size,
                Command::DrawString { x, y, text } => {
                    let resource_name = match font_names.get(&state.font_name) {
                        Some(name) => name.clone(),
                        None => {
                            let object_id = pool.font_object(template, &state.font_name);
                            let name = unused_name(&font_dict, "FsF");
                            font_dict.set(name.as_bytes().to_vec(), Object::Reference(object_id));
                            font_names.insert(state.font_name.clone(), name.clone());
                            name
                        }
                    };
                    let encoded = encode_winansi(text);
                    summary.replaced_chars += encoded.replaced;
                    ops.push(Operation::new("BT", vec![]));
                    ops.push(Operation::new(
                        "Tf",
                        vec![
                            Object::Name(resource_name.into_bytes()),
                            real(state.font_size),
                        ],
                    ));
                    ops.push(Operation::new("Td", vec![real(*x), real(*y)]));
                    ops.push(Operation::new(
                        "Tj",
                        vec![Object::String(encoded.bytes, StringFormat::Literal)],
                    ));
                    ops.push(Operation::new("ET", vec![]));
                }
                Command::DrawImage {
                    x,
                    y,
                    width,
                    height,
                    resource_id,
                } => {
                    let Some(object_id) = pool.image_objects.get(resource_id).copied() else {
                        log::warn!("draw references unknown image {resource_id}");
                        continue;
                    };
                    xobject_dict.set(resource_id.as_bytes().to_vec(), Object::Reference(object_id));
                    ops.push(Operation::new("q", vec![]));
                    ops.push(Operation::new(
                        "cm",
                        vec![real(*width), 0.into(), 0.into(), real(*height), real(*x), real(*y)],
                    ));
                    ops.push(Operation::new(
                        "Do",
                        vec![Object::Name(resource_id.as_bytes().to_vec())],
                    ));
                    ops.push(Operation::new("Q", vec![]));
                }
            }
        }
        ops.push(Operation::new("Q", vec![]));

        if !font_dict.is_empty() {
            resources.set("Font", Object::Dictionary(font_dict));
        }
        if !xobject_dict.is_empty() {
            resources.set("XObject", Object::Dictionary(xobject_dict));
        }
        template.set_page_resources(page_id, resources)?;
        let content = Content { operations: ops }.encode()?;
        template.append_page_content(page_id, content)?;
        summary.pages_written += 1;
    }
    summary.fonts_used = pool.font_objects.len();
    if summary.replaced_chars > 0 {
        log::warn!(
            "{} character(s) have no WinAnsi code and were drawn as '?'",
            summary.replaced_chars
        );
    }
    Ok(summary)
}

fn real(value: Pt) -> Object {
    Object::Real(value.to_f32())
}

fn fill_color_op(color: Color) -> Operation {
    Operation::new(
        "rg",
        vec![
            Object::Real(color.r),
            Object::Real(color.g),
            Object::Real(color.b),
        ],
    )
}

fn unused_name(dict: &Dictionary, prefix: &str) -> String {
    let mut index = dict.len() + 1;
    loop {
        let candidate = format!("{prefix}{index}");
        if !dict.has(candidate.as_bytes()) {
            return candidate;
        }
        index += 1;
    }
}

fn standard_font_dict(base_font: &str) -> Dictionary {
    dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => Object::Name(base_font.as_bytes().to_vec()),
        "Encoding" => "WinAnsiEncoding",
    }
}

fn add_font_objects(template: &mut Template, font: &RegisteredFont) -> ObjectId {
    let FontProgram::TrueType(program) = &font.program else {
        return template.doc.add_object(standard_font_dict(&font.name));
    };
    let base = sanitize_font_name(&font.name);
    let metrics = &font.metrics;

    let file = Stream::new(
        dictionary! { "Length1" => program.len() as i64 },
        program.clone(),
    );
    let file_id = template.doc.add_object(file);

    let mut flags = 32;
    if metrics.is_fixed_pitch {
        flags |= 1;
    }
    let descriptor_id = template.doc.add_object(dictionary! {
        "Type" => "FontDescriptor",
        "FontName" => Object::Name(base.as_bytes().to_vec()),
        "Flags" => flags,
        "FontBBox" => vec![
            metrics.bbox.0.into(),
            metrics.bbox.1.into(),
            metrics.bbox.2.into(),
            metrics.bbox.3.into(),
        ],
        "ItalicAngle" => metrics.italic_angle,
        "Ascent" => metrics.ascent,
        "Descent" => metrics.descent,
        "CapHeight" => metrics.cap_height,
        "StemV" => metrics.stem_v,
        "MissingWidth" => metrics.missing_width as i64,
        "FontFile2" => file_id,
    });
    let widths: Vec<Object> = metrics.widths.iter().map(|w| (*w as i64).into()).collect();
    template.doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "TrueType",
        "BaseFont" => Object::Name(base.into_bytes()),
        "FirstChar" => metrics.first_char as i64,
        "LastChar" => metrics.last_char as i64,
        "Widths" => widths,
        "FontDescriptor" => descriptor_id,
        "Encoding" => "WinAnsiEncoding",
    })
}

fn add_image_objects(template: &mut Template, image: &PdfImage) -> ObjectId {
    let mut dict = dictionary! {
        "Type" => "XObject",
        "Subtype" => "Image",
        "Width" => image.width as i64,
        "Height" => image.height as i64,
        "ColorSpace" => Object::Name(image.color_space.as_bytes().to_vec()),
        "BitsPerComponent" => image.bits_per_component as i64,
    };
    if let Some(alpha) = &image.alpha {
        let smask = Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => image.width as i64,
                "Height" => image.height as i64,
                "ColorSpace" => "DeviceGray",
                "BitsPerComponent" => 8,
            },
            alpha.clone(),
        );
        let smask_id = template.doc.add_object(smask);
        dict.set("SMask", smask_id);
    }
    let stream = match image.filter {
        Some(filter) => {
            dict.set("Filter", Object::Name(filter.as_bytes().to_vec()));
            Stream::new(dict, image.data.clone()).with_compression(false)
        }
        None => Stream::new(dict, image.data.clone()),
    };
    template.doc.add_object(stream)
}

fn sanitize_font_name(name: &str) -> String {
    let out: String = name
        .chars()
        .filter_map(|ch| match ch {
            ch if ch.is_ascii_alphanumeric() || ch == '-' => Some(ch),
            ' ' => Some('-'),
            _ => None,
        })
        .collect();
    if out.is_empty() {
        crate::font::DEFAULT_FONT.to_string()
    } else {
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::tests::template_bytes;

    fn stamped(canvas: Canvas) -> (Template, OverlaySummary) {
        let fonts = FontRegistry::new();
        let mut template = Template::load(&template_bytes(None, false)).expect("load");
        let summary = write_overlay(&mut template, canvas, &fonts).expect("write");
        (template, summary)
    }

    fn page_text(template: &Template) -> String {
        let page_id = template.page_id(0).expect("page");
        String::from_utf8_lossy(&template.doc.get_page_content(page_id).expect("content")).into_owned()
    }

    #[test]
    fn strings_become_text_objects_with_registered_fonts() {
        let mut canvas = Canvas::new(1);
        canvas.set_font_size(Pt::from_f32(9.0));
        canvas.draw_string(Pt::from_f32(50.0), Pt::from_f32(733.863), "Maria Souza");
        canvas.set_font_name("Courier");
        canvas.draw_string(Pt::from_f32(10.0), Pt::from_f32(10.0), "123");
        let (template, summary) = stamped(canvas);

        assert_eq!(summary.pages_written, 1);
        assert_eq!(summary.fonts_used, 2);
        let text = page_text(&template);
        assert!(text.contains("(Maria Souza) Tj"), "{text}");
        assert!(text.contains("/FsF1 9 Tf"), "{text}");
        assert!(text.contains("/FsF2 9 Tf"), "{text}");

        let page_id = template.page_id(0).expect("page");
        let fonts = template.resource_category(&template.page_resources(page_id), b"Font");
        let courier = fonts
            .get(b"FsF2")
            .and_then(Object::as_reference)
            .and_then(|id| template.doc.get_dictionary(id))
            .expect("font dict");
        assert_eq!(courier.get(b"BaseFont").and_then(Object::as_name).ok(), Some(&b"Courier"[..]));
    }

    #[test]
    fn non_latin_characters_are_counted() {
        let mut canvas = Canvas::new(1);
        canvas.draw_string(Pt::ZERO, Pt::ZERO, "São Paulo 東");
        let (_, summary) = stamped(canvas);
        assert_eq!(summary.replaced_chars, 1);
    }

    #[test]
    fn images_are_embedded_with_soft_masks() {
        let mut canvas = Canvas::new(1);
        let id = canvas.register_image(PdfImage {
            width: 1,
            height: 1,
            color_space: "DeviceRGB",
            bits_per_component: 8,
            filter: None,
            data: vec![0, 0, 0],
            alpha: Some(vec![128]),
        });
        canvas.draw_image(Pt::from_f32(10.0), Pt::from_f32(20.0), Pt::from_f32(40.0), Pt::from_f32(10.0), id);
        let (template, summary) = stamped(canvas);
        assert_eq!(summary.images_embedded, 1);
        let text = page_text(&template);
        assert!(text.contains("40 0 0 10 10 20 cm"), "{text}");
        assert!(text.contains("/FsIm1 Do"), "{text}");
        let page_id = template.page_id(0).expect("page");
        let xobjects = template.resource_category(&template.page_resources(page_id), b"XObject");
        let image_id = xobjects.get(b"FsIm1").and_then(Object::as_reference).expect("image ref");
        let Ok(Object::Stream(stream)) = template.doc.get_object(image_id) else {
            panic!("image is not a stream");
        };
        assert!(stream.dict.has(b"SMask"));
    }

    #[test]
    fn empty_pages_are_left_untouched() {
        let (template, summary) = stamped(Canvas::new(1));
        assert_eq!(summary.pages_written, 0);
        assert!(!page_text(&template).contains("BT"));
    }

    #[test]
    fn font_names_are_sanitized() {
        assert_eq!(sanitize_font_name("Open Sans"), "Open-Sans");
        assert_eq!(sanitize_font_name("(){}"), "Helvetica");
    }
}
