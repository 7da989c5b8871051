//! Image optimization
//!
//! - JPEG: lossy re-encode at a high quality setting
//! - PNG: palette quantization (NeuQuant) written as an indexed PNG
//! - SVG: markup minification with `quick_xml` that never touches attributes,
//!   so `viewBox` always survives
//!
//! Anything else is copied as-is. When an optimized file is not smaller than
//! its source, the source bytes are kept.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use color_quant::NeuQuant;
use futures::future::BoxFuture;
use futures::FutureExt;
use image::codecs::jpeg::JpegEncoder;
use image::{ColorType, ImageFormat};
use quick_xml::events::{BytesStart, Event};
use quick_xml::{Reader, Writer};
use tracing::{debug, info};

use crate::error::{PipelineError, Result};
use crate::executor::Task;
use crate::paths::{PathEntry, SourceGlob};

/// Image handling selected by file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Jpeg,
    Png,
    Svg,
    Other,
}

impl ImageKind {
    pub fn from_path(path: &Path) -> Self {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();

        match ext.as_str() {
            "jpg" | "jpeg" => ImageKind::Jpeg,
            "png" => ImageKind::Png,
            "svg" => ImageKind::Svg,
            _ => ImageKind::Other,
        }
    }
}

/// Compression settings
#[derive(Debug, Clone, Copy)]
pub struct ImageOptions {
    pub jpeg_quality: u8,
    /// NeuQuant sampling factor, 1 (best) to 30 (fastest)
    pub png_sample_factor: i32,
}

impl Default for ImageOptions {
    fn default() -> Self {
        Self {
            jpeg_quality: 80,
            png_sample_factor: 10,
        }
    }
}

/// Totals for one image run
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ImageReport {
    pub files: Vec<PathBuf>,
    pub original_bytes: u64,
    pub written_bytes: u64,
}

pub struct ImageTask {
    source: SourceGlob,
    dest: PathBuf,
    options: ImageOptions,
}

impl ImageTask {
    pub fn new(entry: &PathEntry, options: ImageOptions) -> Self {
        Self {
            source: entry.source.clone(),
            dest: entry.dest.clone(),
            options,
        }
    }

    pub async fn build(&self) -> Result<ImageReport> {
        let source = self.source.clone();
        let dest = self.dest.clone();
        let options = self.options;

        tokio::task::spawn_blocking(move || optimize_all(&source, &dest, options)).await?
    }
}

impl Task for ImageTask {
    fn name(&self) -> &str {
        "images"
    }

    fn run(&self) -> BoxFuture<'_, Result<()>> {
        async move {
            let report = self.build().await?;
            let saved = report.original_bytes.saturating_sub(report.written_bytes);
            info!(
                "Minified {} images (saved {} - {:.1}%)",
                report.files.len(),
                format_bytes(saved),
                percent(saved, report.original_bytes)
            );
            Ok(())
        }
        .boxed()
    }
}

fn optimize_all(source: &SourceGlob, dest: &Path, options: ImageOptions) -> Result<ImageReport> {
    let mut report = ImageReport::default();

    for file in source.collect()? {
        let rel = source.relative_to_base(&file);
        let out_path = dest.join(rel);

        let original = std::fs::read(&file).map_err(|e| PipelineError::file_io(&file, e))?;
        let kind = ImageKind::from_path(&file);
        let optimized = optimize(kind, &original, &file, options)?;

        let bytes = if optimized.len() < original.len() {
            optimized
        } else {
            original.clone()
        };

        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| PipelineError::file_io(parent, e))?;
        }
        std::fs::write(&out_path, &bytes).map_err(|e| PipelineError::file_io(&out_path, e))?;

        let saved = (original.len() - bytes.len()) as u64;
        if kind == ImageKind::Other {
            info!("Copied {}", rel.display());
        } else {
            info!(
                "Minified {} (saved {} - {:.1}%)",
                rel.display(),
                format_bytes(saved),
                percent(saved, original.len() as u64)
            );
        }

        report.original_bytes += original.len() as u64;
        report.written_bytes += bytes.len() as u64;
        report.files.push(out_path);
    }

    Ok(report)
}

/// Compress one file's bytes according to its kind
pub fn optimize(
    kind: ImageKind,
    bytes: &[u8],
    path: &Path,
    options: ImageOptions,
) -> Result<Vec<u8>> {
    match kind {
        ImageKind::Jpeg => reencode_jpeg(bytes, path, options.jpeg_quality),
        ImageKind::Png => quantize_png(bytes, path, options.png_sample_factor),
        ImageKind::Svg => Ok(minify_svg(bytes).unwrap_or_else(|| bytes.to_vec())),
        ImageKind::Other => Ok(bytes.to_vec()),
    }
}

fn image_err(path: &Path) -> impl FnOnce(image::ImageError) -> PipelineError + '_ {
    move |source| PipelineError::Image {
        path: path.to_path_buf(),
        source,
    }
}

fn reencode_jpeg(bytes: &[u8], path: &Path, quality: u8) -> Result<Vec<u8>> {
    let img =
        image::load_from_memory_with_format(bytes, ImageFormat::Jpeg).map_err(image_err(path))?;
    let rgb = img.to_rgb8();

    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality)
        .encode(rgb.as_raw(), rgb.width(), rgb.height(), ColorType::Rgb8)
        .map_err(image_err(path))?;
    Ok(out)
}

/// Reduce to at most 256 colours and write an indexed PNG
pub fn quantize_png(bytes: &[u8], path: &Path, sample_factor: i32) -> Result<Vec<u8>> {
    let img =
        image::load_from_memory_with_format(bytes, ImageFormat::Png).map_err(image_err(path))?;
    let rgba = img.to_rgba8();
    let (width, height) = rgba.dimensions();

    let quant = NeuQuant::new(sample_factor, 256, rgba.as_raw());
    let indices: Vec<u8> = rgba
        .as_raw()
        .chunks_exact(4)
        .map(|px| quant.index_of(px) as u8)
        .collect();

    let color_map = quant.color_map_rgba();
    let mut palette = Vec::with_capacity(color_map.len() / 4 * 3);
    let mut alpha = Vec::with_capacity(color_map.len() / 4);
    for entry in color_map.chunks_exact(4) {
        palette.extend_from_slice(&entry[..3]);
        alpha.push(entry[3]);
    }

    let png_err = |source| PipelineError::PngEncode {
        path: path.to_path_buf(),
        source,
    };

    let mut out = Vec::new();
    {
        let mut encoder = png::Encoder::new(Cursor::new(&mut out), width, height);
        encoder.set_color(png::ColorType::Indexed);
        encoder.set_depth(png::BitDepth::Eight);
        encoder.set_compression(png::Compression::Best);
        encoder.set_palette(palette);
        if alpha.iter().any(|a| *a != u8::MAX) {
            encoder.set_trns(alpha);
        }

        let mut writer = encoder.write_header().map_err(png_err)?;
        writer.write_image_data(&indices).map_err(png_err)?;
        writer.finish().map_err(png_err)?;
    }

    Ok(out)
}

/// Elements whose whitespace-only text is rendered and must be kept
const TEXT_CONTENT: &[&[u8]] = &[
    b"text", b"tspan", b"textPath", b"title", b"desc", b"style", b"script",
];

/// Drop the XML declaration, processing instructions, doctype, comments and
/// `<metadata>`, and whitespace-only text outside text content. Tags and their
/// attributes are written back unchanged.
///
/// Returns `None` when the input is not UTF-8, declares another encoding, or
/// does not parse; the caller keeps the source bytes then.
pub fn minify_svg(input: &[u8]) -> Option<Vec<u8>> {
    let text = std::str::from_utf8(input).ok()?;
    let mut reader = Reader::from_str(text);
    let mut writer = Writer::new(Vec::with_capacity(input.len()));

    // One entry per open element: whether whitespace is significant inside it
    let mut preserve: Vec<bool> = Vec::new();
    let mut skip_depth = 0usize;

    loop {
        let event = match reader.read_event() {
            Ok(Event::Eof) => break,
            Ok(event) => event,
            Err(e) => {
                debug!("svg left as-is: {e}");
                return None;
            }
        };

        if skip_depth > 0 {
            match event {
                Event::Start(_) => skip_depth += 1,
                Event::End(_) => skip_depth -= 1,
                _ => {}
            }
            continue;
        }

        match event {
            Event::Decl(decl) => {
                if let Some(Ok(encoding)) = decl.encoding() {
                    if !encoding.eq_ignore_ascii_case(b"utf-8") {
                        return None;
                    }
                }
            }
            Event::PI(_) | Event::Comment(_) | Event::DocType(_) => {}
            Event::Start(start) if start.name().as_ref() == b"metadata" => skip_depth = 1,
            Event::Empty(empty) if empty.name().as_ref() == b"metadata" => {}
            Event::Start(start) => {
                let inherited = preserve.last().copied().unwrap_or(false);
                preserve.push(inherited || keeps_whitespace(&start));
                writer.write_event(Event::Start(start)).ok()?;
            }
            Event::End(end) => {
                preserve.pop();
                writer.write_event(Event::End(end)).ok()?;
            }
            Event::Text(t) => {
                let significant = preserve.last().copied().unwrap_or(false);
                if significant || !t.iter().all(u8::is_ascii_whitespace) {
                    writer.write_event(Event::Text(t)).ok()?;
                }
            }
            other => writer.write_event(other).ok()?,
        }
    }

    Some(writer.into_inner())
}

fn keeps_whitespace(start: &BytesStart<'_>) -> bool {
    let name = start.name();
    if TEXT_CONTENT.iter().any(|n| *n == name.as_ref()) {
        return true;
    }
    matches!(
        start.try_get_attribute("xml:space"),
        Ok(Some(attr)) if attr.value.as_ref() == b"preserve"
    )
}

fn format_bytes(bytes: u64) -> String {
    if bytes >= 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else if bytes >= 1024 {
        format!("{:.1} kB", bytes as f64 / 1024.0)
    } else {
        format!("{bytes} B")
    }
}

fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 * 100.0 / whole as f64
    }
}
