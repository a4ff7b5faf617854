//! PDF rendering of scanned pages with `printpdf`: one A4 page per image.

use std::path::PathBuf;

use printpdf::{Mm, Op, PdfDocument, PdfPage, PdfSaveOptions, Pt, RawImage, XObjectTransform};
use tracing::{debug, info, warn};

use crate::contract::PageRenderer;
use crate::error::RenderError;

const A4_WIDTH_MM: f32 = 210.0;
const A4_HEIGHT_MM: f32 = 297.0;
const A4_WIDTH_PT: f32 = 595.276;
const A4_HEIGHT_PT: f32 = 841.89;
const PAGE_DPI: f32 = 300.0;

/// Renders page images into a single PDF document.
#[derive(Debug, Clone)]
pub struct PdfRenderer {
    title: String,
}

impl Default for PdfRenderer {
    fn default() -> Self {
        Self {
            title: "Scanned document".to_string(),
        }
    }
}

/// Scale that fits an image of `width`x`height` pixels onto an A4 page.
fn fit_to_page(width: usize, height: usize) -> f32 {
    if width == 0 || height == 0 {
        return 1.0;
    }
    let natural_w = width as f32 * 72.0 / PAGE_DPI;
    let natural_h = height as f32 * 72.0 / PAGE_DPI;
    (A4_WIDTH_PT / natural_w).min(A4_HEIGHT_PT / natural_h)
}

impl PageRenderer for PdfRenderer {
    fn render(&self, pages: &[PathBuf]) -> Result<Vec<u8>, RenderError> {
        if pages.is_empty() {
            return Err(RenderError::EmptyInput);
        }

        let mut doc = PdfDocument::new(&self.title);
        let mut warnings = Vec::new();
        let mut pdf_pages = Vec::with_capacity(pages.len());

        for path in pages {
            let bytes = std::fs::read(path).map_err(|source| RenderError::Io {
                path: path.clone(),
                source,
            })?;
            let image = RawImage::decode_from_bytes(&bytes, &mut warnings).map_err(|reason| {
                RenderError::Decode {
                    path: path.clone(),
                    reason,
                }
            })?;
            let scale = fit_to_page(image.width, image.height);
            debug!(path = %path.display(), width = image.width, height = image.height, scale, "Adding page image");

            let image_id = doc.add_image(&image);
            let ops = vec![Op::UseXobject {
                id: image_id,
                transform: XObjectTransform {
                    translate_x: Some(Pt(0.0)),
                    translate_y: Some(Pt(0.0)),
                    scale_x: Some(scale),
                    scale_y: Some(scale),
                    dpi: Some(PAGE_DPI),
                    ..Default::default()
                },
            }];
            pdf_pages.push(PdfPage::new(Mm(A4_WIDTH_MM), Mm(A4_HEIGHT_MM), ops));
        }

        let bytes = doc
            .with_pages(pdf_pages)
            .save(&PdfSaveOptions::default(), &mut warnings);
        if !warnings.is_empty() {
            warn!(count = warnings.len(), "PDF generation produced warnings");
        }
        info!(pages = pages.len(), size = bytes.len(), "Rendered PDF document");
        Ok(bytes)
    }
}
