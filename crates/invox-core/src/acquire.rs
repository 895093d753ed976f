//! Text and image acquisition from invoice files
//!
//! Turns an uploaded file into plain text for the text-based extractors and
//! into a page image for the vision extractor. Images go straight to
//! Tesseract; PDFs yield their embedded text layer when one exists, and are
//! otherwise OCR'd page by page from their embedded images.
//!
//! Tesseract is blocking, so OCR runs on the blocking thread pool.

use std::io::Cursor;

use image::DynamicImage;
use lopdf::{Document, Object};
use tracing::{debug, info};

use crate::config::LimitsConfig;
use crate::error::{Error, Result};
use crate::models::{FileType, InvoiceDocument};

/// A PDF text layer shorter than this is treated as absent. Scanned PDFs
/// often carry a few stray glyphs from stamps or metadata.
const MIN_PDF_TEXT_CHARS: usize = 50;

/// Where acquired text came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextSource {
    /// Embedded PDF text layer
    PdfText,
    /// Tesseract OCR over the image(s)
    Ocr,
}

/// Text pulled out of an invoice file
#[derive(Debug, Clone)]
pub struct AcquiredText {
    pub text: String,
    pub source: TextSource,
}

/// A single page rendered as an image, ready for a vision model
#[derive(Debug, Clone)]
pub struct PageImage {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

/// Acquire plain text from an invoice file
///
/// Returns [`Error::NoTextDetected`] for an image that OCRs to nothing,
/// and [`Error::PdfExtraction`] for a PDF where both the text layer and
/// the page-image OCR fallback come up empty.
pub async fn acquire_text(doc: &InvoiceDocument, limits: &LimitsConfig) -> Result<AcquiredText> {
    match doc.file_type {
        FileType::Pdf => acquire_pdf_text(doc, limits).await,
        // Anything that is not a PDF is handed to Tesseract as an image.
        _ => {
            let text = ocr_bytes(doc.bytes.clone(), limits.render_scale).await?;
            finish(text, TextSource::Ocr)
        }
    }
}

async fn acquire_pdf_text(doc: &InvoiceDocument, limits: &LimitsConfig) -> Result<AcquiredText> {
    // A failed text-layer extraction is the same as an absent one; the
    // OCR fallback below still gets its chance.
    let text = match pdf_extract::extract_text_from_mem(&doc.bytes) {
        Ok(text) => text,
        Err(e) => {
            debug!(error = %e, "PDF text layer extraction failed");
            String::new()
        }
    };

    if text.trim().len() >= MIN_PDF_TEXT_CHARS {
        debug!(chars = text.len(), "Using PDF text layer");
        return finish(text, TextSource::PdfText);
    }

    info!(
        file = %doc.file_name,
        "PDF has no usable text layer, falling back to OCR"
    );

    let pages = page_images(&doc.bytes, limits.max_ocr_pages)?;
    if pages.is_empty() {
        return Err(Error::PdfExtraction(
            "PDF has neither a text layer nor page images".into(),
        ));
    }

    let mut combined = String::new();
    for (index, page) in pages.into_iter().enumerate() {
        let png = encode_png(&page)?;
        let page_text = ocr_bytes(png, limits.render_scale).await?;
        debug!(page = index + 1, chars = page_text.len(), "OCR'd PDF page");
        if !page_text.trim().is_empty() {
            if !combined.is_empty() {
                combined.push_str("\n\n");
            }
            combined.push_str(page_text.trim());
        }
    }

    if combined.trim().is_empty() {
        return Err(Error::PdfExtraction(
            "Neither the text layer nor OCR produced any text".into(),
        ));
    }
    Ok(AcquiredText {
        text: combined,
        source: TextSource::Ocr,
    })
}

fn finish(text: String, source: TextSource) -> Result<AcquiredText> {
    if text.trim().is_empty() {
        return Err(Error::NoTextDetected);
    }
    Ok(AcquiredText { text, source })
}

/// Produce the page image handed to the vision extractor
///
/// Image uploads pass through unchanged. For PDFs the first embedded page
/// image is re-encoded as PNG.
pub fn page_image(doc: &InvoiceDocument) -> Result<PageImage> {
    match doc.file_type {
        FileType::Pdf => {
            let pages = page_images(&doc.bytes, 1)?;
            let first = pages
                .into_iter()
                .next()
                .ok_or_else(|| Error::PdfExtraction("PDF contains no page images".into()))?;
            Ok(PageImage {
                bytes: encode_png(&first)?,
                mime_type: "image/png".to_string(),
            })
        }
        _ => Ok(PageImage {
            bytes: doc.bytes.clone(),
            mime_type: doc.mime_type().to_string(),
        }),
    }
}

/// Run Tesseract over image bytes on the blocking pool
///
/// The image is upscaled before recognition; invoice scans are routinely
/// too small for Tesseract at native resolution.
async fn ocr_bytes(bytes: Vec<u8>, scale: f32) -> Result<String> {
    tokio::task::spawn_blocking(move || ocr_blocking(&bytes, scale))
        .await
        .map_err(|e| Error::InvalidData(format!("OCR task panicked: {}", e)))?
}

fn ocr_blocking(bytes: &[u8], scale: f32) -> Result<String> {
    let prepared = upscale(bytes, scale)?;

    let mut engine = leptess::LepTess::new(None, "eng")
        .map_err(|e| Error::InvalidData(format!("Tesseract init failed: {}", e)))?;
    engine
        .set_image_from_mem(&prepared)
        .map_err(|e| Error::InvalidData(format!("Tesseract rejected image: {}", e)))?;
    engine
        .get_utf8_text()
        .map_err(|e| Error::InvalidData(format!("Tesseract recognition failed: {}", e)))
}

fn upscale(bytes: &[u8], scale: f32) -> Result<Vec<u8>> {
    if scale <= 1.0 {
        return Ok(bytes.to_vec());
    }
    let img = image::load_from_memory(bytes)
        .map_err(|e| Error::InvalidData(format!("Unreadable image: {}", e)))?;
    let width = (img.width() as f32 * scale) as u32;
    let height = (img.height() as f32 * scale) as u32;
    let resized = img.resize(width, height, image::imageops::FilterType::Lanczos3);
    encode_png(&resized)
}

fn encode_png(img: &DynamicImage) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    img.write_to(&mut Cursor::new(&mut buffer), image::ImageFormat::Png)
        .map_err(|e| Error::InvalidData(format!("PNG encoding failed: {}", e)))?;
    Ok(buffer)
}

/// Extract embedded page images from a PDF, in page order, up to `max_pages`
fn page_images(data: &[u8], max_pages: usize) -> Result<Vec<DynamicImage>> {
    let mut doc = Document::load_mem(data)
        .map_err(|e| Error::PdfExtraction(format!("Unreadable PDF: {}", e)))?;

    if doc.is_encrypted() {
        doc.decrypt("")
            .map_err(|_| Error::PdfExtraction("PDF is password protected".into()))?;
    }

    let pages = doc.get_pages();
    let mut images = Vec::new();

    for (_, page_id) in pages.iter().take(max_pages) {
        let Ok(page) = doc.get_dictionary(*page_id) else {
            continue;
        };
        let Some(resources) = page
            .get(b"Resources")
            .ok()
            .and_then(|r| doc.dereference(r).ok())
            .and_then(|(_, obj)| obj.as_dict().ok())
        else {
            continue;
        };
        let Some(xobjects) = resources
            .get(b"XObject")
            .ok()
            .and_then(|x| doc.dereference(x).ok())
            .and_then(|(_, obj)| obj.as_dict().ok())
        else {
            continue;
        };

        for (_, obj_ref) in xobjects.iter() {
            if let Ok((_, obj)) = doc.dereference(obj_ref) {
                if let Some(img) = image_from_object(obj) {
                    images.push(img);
                }
            }
        }
    }

    // Some generators stash page scans outside the XObject tree.
    if images.is_empty() {
        debug!("No per-page XObject images, scanning all PDF objects");
        for (_, object) in doc.objects.iter() {
            if images.len() >= max_pages {
                break;
            }
            if let Some(img) = image_from_object(object) {
                images.push(img);
            }
        }
    }

    debug!(images = images.len(), "Extracted embedded PDF images");
    Ok(images)
}

fn image_from_object(obj: &Object) -> Option<DynamicImage> {
    let Object::Stream(stream) = obj else {
        return None;
    };
    let dict = &stream.dict;
    if dict.get(b"Subtype").ok()?.as_name().ok()? != b"Image" {
        return None;
    }

    let width = dict.get(b"Width").ok()?.as_i64().ok()? as u32;
    let height = dict.get(b"Height").ok()?.as_i64().ok()? as u32;

    let filter_name = dict.get(b"Filter").ok().and_then(|f| match f {
        Object::Name(name) => Some(name.as_slice()),
        Object::Array(arr) => arr.first().and_then(|o| o.as_name().ok()),
        _ => None,
    });

    if filter_name == Some(b"DCTDecode") {
        // JPEG stream, stored compressed as-is.
        return image::load_from_memory_with_format(&stream.content, image::ImageFormat::Jpeg)
            .ok();
    }

    let data = stream
        .decompressed_content()
        .unwrap_or_else(|_| stream.content.clone());
    raw_image(&data, width, height)
}

/// Decode uncompressed DeviceRGB/DeviceGray samples (8 bits per component)
fn raw_image(data: &[u8], width: u32, height: u32) -> Option<DynamicImage> {
    let pixels = (width as usize) * (height as usize);
    if data.len() >= pixels * 3 {
        image::RgbImage::from_raw(width, height, data[..pixels * 3].to_vec())
            .map(DynamicImage::ImageRgb8)
    } else if data.len() >= pixels {
        image::GrayImage::from_raw(width, height, data[..pixels].to_vec())
            .map(DynamicImage::ImageLuma8)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finish_rejects_blank_text() {
        assert!(matches!(
            finish("   \n ".to_string(), TextSource::Ocr),
            Err(Error::NoTextDetected)
        ));
    }

    #[test]
    fn test_upscale_noop_at_unit_scale() {
        let bytes = vec![1, 2, 3];
        assert_eq!(upscale(&bytes, 1.0).unwrap(), bytes);
    }

    #[test]
    fn test_upscale_doubles_dimensions() {
        let img = DynamicImage::new_rgb8(10, 8);
        let png = encode_png(&img).unwrap();
        let scaled = upscale(&png, 2.0).unwrap();
        let reloaded = image::load_from_memory(&scaled).unwrap();
        assert_eq!(reloaded.width(), 20);
        assert_eq!(reloaded.height(), 16);
    }

    #[test]
    fn test_raw_image_rgb_and_gray() {
        let rgb = raw_image(&[0u8; 12], 2, 2).unwrap();
        assert_eq!(rgb.width(), 2);
        let gray = raw_image(&[0u8; 4], 2, 2).unwrap();
        assert_eq!(gray.height(), 2);
        assert!(raw_image(&[0u8; 2], 2, 2).is_none());
    }

    #[test]
    fn test_page_images_rejects_garbage() {
        assert!(page_images(b"not a pdf", 3).is_err());
    }

    #[test]
    fn test_page_image_passes_uploads_through() {
        let doc = InvoiceDocument {
            file_name: "invoice.png".into(),
            file_type: FileType::Png,
            bytes: vec![9, 9, 9],
            supplier_hint: None,
        };
        let page = page_image(&doc).unwrap();
        assert_eq!(page.bytes, vec![9, 9, 9]);
        assert_eq!(page.mime_type, "image/png");
    }
}
