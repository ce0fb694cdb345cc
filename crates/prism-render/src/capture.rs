// SPDX-License-Identifier: CEPL-1.0
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("captured {got} bytes, a {width}x{height} frame needs {needed}")]
    ShortBuffer {
        width: u32,
        height: u32,
        needed: usize,
        got: usize,
    },
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Channel order of a read-back 4-byte pixel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelOrder {
    Bgra,
    Rgba,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RowOrder {
    TopDown,
    BottomUp,
}

/// A frame copied out of device memory, tightly packed 4 bytes per pixel.
#[derive(Clone, Debug)]
pub struct CapturedImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
    pub order: PixelOrder,
    pub rows: RowOrder,
}

impl CapturedImage {
    pub fn to_ppm(&self) -> Result<Vec<u8>, CaptureError> {
        encode_ppm(self.width, self.height, &self.pixels, self.order, self.rows)
    }
}

/// Binary PPM: `P6\n<w> <h>\n255\n` then RGB triples, rows top to bottom.
pub fn encode_ppm(
    width: u32,
    height: u32,
    pixels: &[u8],
    order: PixelOrder,
    rows: RowOrder,
) -> Result<Vec<u8>, CaptureError> {
    let (w, h) = (width as usize, height as usize);
    let needed = w * h * 4;
    if pixels.len() < needed {
        return Err(CaptureError::ShortBuffer {
            width,
            height,
            needed,
            got: pixels.len(),
        });
    }

    let header = format!("P6\n{width} {height}\n255\n");
    let mut out = Vec::with_capacity(header.len() + w * h * 3);
    out.extend_from_slice(header.as_bytes());

    for y in 0..h {
        let src_row = match rows {
            RowOrder::TopDown => y,
            RowOrder::BottomUp => h - 1 - y,
        };
        let row = &pixels[src_row * w * 4..(src_row + 1) * w * 4];
        for px in row.chunks_exact(4) {
            match order {
                PixelOrder::Bgra => out.extend_from_slice(&[px[2], px[1], px[0]]),
                PixelOrder::Rgba => out.extend_from_slice(&px[..3]),
            }
        }
    }
    Ok(out)
}

pub fn write_ppm(path: &Path, image: &CapturedImage) -> Result<(), CaptureError> {
    let bytes = image.to_ppm()?;
    fs::write(path, &bytes).map_err(|source| CaptureError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    info!(
        "saved {}x{} frame to {}",
        image.width,
        image.height,
        path.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // 2x2: top row red, green; bottom row blue, white. Stored BGRA top-down.
    fn bgra_quad() -> Vec<u8> {
        vec![
            0, 0, 255, 255, 0, 255, 0, 255, //
            255, 0, 0, 255, 255, 255, 255, 255,
        ]
    }

    #[test]
    fn swizzles_bgra_to_rgb() {
        let ppm = encode_ppm(2, 2, &bgra_quad(), PixelOrder::Bgra, RowOrder::TopDown).unwrap();
        let header = b"P6\n2 2\n255\n";
        assert_eq!(&ppm[..header.len()], header);
        assert_eq!(
            &ppm[header.len()..],
            &[255, 0, 0, 0, 255, 0, 0, 0, 255, 255, 255, 255]
        );
    }

    #[test]
    fn bottom_up_rows_are_flipped() {
        let ppm = encode_ppm(2, 2, &bgra_quad(), PixelOrder::Bgra, RowOrder::BottomUp).unwrap();
        let body = &ppm[b"P6\n2 2\n255\n".len()..];
        assert_eq!(&body[..6], &[0, 0, 255, 255, 255, 255]);
    }

    #[test]
    fn short_buffer_is_rejected() {
        let err = encode_ppm(4, 4, &[0; 16], PixelOrder::Rgba, RowOrder::TopDown).unwrap_err();
        assert!(matches!(err, CaptureError::ShortBuffer { needed: 64, got: 16, .. }));
    }

    #[test]
    fn writes_file_with_exact_length() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.ppm");
        let image = CapturedImage {
            width: 5,
            height: 3,
            pixels: vec![9; 5 * 3 * 4],
            order: PixelOrder::Rgba,
            rows: RowOrder::TopDown,
        };
        write_ppm(&path, &image).unwrap();
        let bytes = fs::read(&path).unwrap();
        let header = b"P6\n5 3\n255\n";
        assert!(bytes.starts_with(header));
        assert_eq!(bytes.len() - header.len(), 5 * 3 * 3);
    }
}
