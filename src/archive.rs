//! Zip export of a rendered batch.
//!
//! Pages are stored as `page-<n>.png` (1-based, document order) inside an
//! archive conventionally named [`ARCHIVE_NAME`]. PNG data is already
//! deflated, so entries are stored uncompressed.

use std::io::{Cursor, Write};

use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::config::RenderConfig;
use crate::convert::convert;
use crate::error::CarouselError;
use crate::output::GenerationBatch;
use crate::pipeline::placeholder::PlaceholderMap;

/// File name offered for download.
pub const ARCHIVE_NAME: &str = "xhs-pages.zip";

/// `page-<page_num>.png`.
pub fn page_file_name(page_num: usize) -> String {
    format!("page-{page_num}.png")
}

/// Zip every rendered page of `batch`. Failed pages are left out; their
/// numbers are not reused, so a gap in the names marks a missing page.
pub fn build_archive(batch: &GenerationBatch) -> Result<Vec<u8>, CarouselError> {
    write_entries(
        batch
            .pages
            .iter()
            .filter_map(|p| p.png.as_deref().map(|png| (p.page_num, png))),
    )
}

/// Zip a plain list of PNGs, naming them `page-1.png`, `page-2.png`, ...
pub fn archive_images<I, B>(images: I) -> Result<Vec<u8>, CarouselError>
where
    I: IntoIterator<Item = B>,
    B: AsRef<[u8]>,
{
    let images: Vec<B> = images.into_iter().collect();
    write_entries(
        images
            .iter()
            .enumerate()
            .map(|(i, png)| (i + 1, png.as_ref())),
    )
}

/// Render a document and return the zip archive of its pages.
pub async fn convert_to_archive(
    markdown: &str,
    placeholders: &PlaceholderMap,
    config: &RenderConfig,
) -> Result<(GenerationBatch, Vec<u8>), CarouselError> {
    let batch = convert(markdown, placeholders, config).await?;
    let archive = build_archive(&batch)?;
    Ok((batch, archive))
}

fn write_entries<'a>(
    entries: impl Iterator<Item = (usize, &'a [u8])>,
) -> Result<Vec<u8>, CarouselError> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);

    let mut count = 0usize;
    for (page_num, png) in entries {
        zip.start_file(page_file_name(page_num), options)
            .map_err(|e| CarouselError::Archive(e.to_string()))?;
        zip.write_all(png)
            .map_err(|e| CarouselError::Archive(e.to_string()))?;
        count += 1;
    }

    let cursor = zip
        .finish()
        .map_err(|e| CarouselError::Archive(e.to_string()))?;
    let bytes = cursor.into_inner();
    debug!("Archived {} pages ({} bytes)", count, bytes.len());
    Ok(bytes)
}
