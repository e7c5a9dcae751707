//! PNG encoding of one captured frame.
//!
//! Frames arrive as raw RGBA rows copied out of the shared segment. Rows may
//! carry alignment padding and may be stored bottom row first; both are
//! undone here before the image is handed to the PNG encoder.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::Instant;

use framecap_common::{
    partial_path, Compression, EncodeFailure, EncodeJob, EncodeReport, RowOrder, BYTES_PER_PIXEL,
};
use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{ExtendedColorType, ImageEncoder};

fn compression_type(compression: Compression) -> CompressionType {
    match compression {
        Compression::Fast => CompressionType::Fast,
        Compression::Default => CompressionType::Default,
        Compression::Best => CompressionType::Best,
    }
}

/// Repack `data` into tightly packed, top-down RGBA rows.
pub fn pack_rows(
    data: &[u8],
    width: u32,
    height: u32,
    bytes_per_row: u32,
    row_order: RowOrder,
) -> Result<Vec<u8>, EncodeFailure> {
    let row_bytes = width as usize * BYTES_PER_PIXEL;
    let stride = bytes_per_row as usize;
    let rows = height as usize;

    if stride < row_bytes || data.len() < stride * rows {
        return Err(EncodeFailure::InvalidDimensions(format!(
            "{}x{} with {} bytes per row does not fit {} bytes",
            width,
            height,
            bytes_per_row,
            data.len()
        )));
    }

    let mut out = Vec::with_capacity(row_bytes * rows);
    for y in 0..rows {
        let src = match row_order {
            RowOrder::TopDown => y,
            RowOrder::BottomUp => rows - 1 - y,
        };
        let start = src * stride;
        out.extend_from_slice(&data[start..start + row_bytes]);
    }
    Ok(out)
}

/// Encode tightly packed RGBA pixels as a PNG at `path`.
///
/// Returns the size of the written file. On failure nothing is left at
/// `path` or next to it.
pub fn write_png(
    path: &Path,
    pixels: &[u8],
    width: u32,
    height: u32,
    compression: Compression,
) -> Result<u64, EncodeFailure> {
    let partial = partial_path(path);
    let result = write_partial(&partial, pixels, width, height, compression)
        .and_then(|()| std::fs::rename(&partial, path).map_err(|e| EncodeFailure::Io(e.to_string())));

    if let Err(e) = result {
        let _ = std::fs::remove_file(&partial);
        return Err(e);
    }

    std::fs::metadata(path)
        .map(|m| m.len())
        .map_err(|e| EncodeFailure::Io(e.to_string()))
}

fn write_partial(
    partial: &Path,
    pixels: &[u8],
    width: u32,
    height: u32,
    compression: Compression,
) -> Result<(), EncodeFailure> {
    let file = File::create(partial).map_err(|e| EncodeFailure::Io(e.to_string()))?;
    let mut writer = BufWriter::new(file);

    let encoder =
        PngEncoder::new_with_quality(&mut writer, compression_type(compression), FilterType::Adaptive);
    encoder
        .write_image(pixels, width, height, ExtendedColorType::Rgba8)
        .map_err(|e| match e {
            image::ImageError::IoError(io) => EncodeFailure::Io(io.to_string()),
            other => EncodeFailure::Encode(other.to_string()),
        })?;

    writer.flush().map_err(|e| EncodeFailure::Io(e.to_string()))
}

/// Encode the pixels of `job`, already copied out of its segment.
pub fn encode_job(job: &EncodeJob, data: &[u8]) -> Result<EncodeReport, EncodeFailure> {
    let start = Instant::now();
    let pixels = pack_rows(data, job.width, job.height, job.bytes_per_row, job.row_order)?;
    let bytes_written = write_png(
        &job.output_path,
        &pixels,
        job.width,
        job.height,
        job.compression,
    )?;

    Ok(EncodeReport {
        job_id: job.job_id,
        path: job.output_path.clone(),
        bytes_written,
        encode_us: start.elapsed().as_micros() as u64,
    })
}
