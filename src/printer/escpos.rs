//! ESC/POS command encoding for receipt printers.

use image::GrayImage;
use std::io::{self, Write};

const ESC: u8 = 0x1B;
const GS: u8 = 0x1D;

/// Rows per `GS v 0` block; many firmwares reject taller blocks
const RASTER_BAND_ROWS: u32 = 256;
/// Luma below this prints as a black dot
const BLACK_THRESHOLD: u8 = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Align {
    Left,
    Center,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Font {
    /// 12x24
    A,
    /// 9x17
    B,
}

/// Text state applied in one call, like the `set(...)` call of most drivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextStyle {
    pub align: Align,
    pub bold: bool,
    pub double_width: bool,
    pub double_height: bool,
    pub font: Font,
}

impl Default for TextStyle {
    fn default() -> Self {
        Self {
            align: Align::Left,
            bold: false,
            double_width: false,
            double_height: false,
            font: Font::A,
        }
    }
}

impl TextStyle {
    pub fn centered() -> Self {
        Self {
            align: Align::Center,
            ..Self::default()
        }
    }

    pub fn masthead() -> Self {
        Self {
            align: Align::Center,
            bold: true,
            double_width: true,
            double_height: true,
            font: Font::A,
        }
    }

    pub fn small() -> Self {
        Self {
            align: Align::Center,
            font: Font::B,
            ..Self::default()
        }
    }
}

/// Writes ESC/POS commands to any byte sink.
pub struct EscPos<W: Write> {
    out: W,
}

impl<W: Write> EscPos<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    /// `ESC @`: reset to power-on state
    pub fn init(&mut self) -> io::Result<()> {
        self.out.write_all(&[ESC, b'@'])
    }

    pub fn align(&mut self, align: Align) -> io::Result<()> {
        let n = match align {
            Align::Left => 0,
            Align::Center => 1,
            Align::Right => 2,
        };
        self.out.write_all(&[ESC, b'a', n])
    }

    pub fn bold(&mut self, on: bool) -> io::Result<()> {
        self.out.write_all(&[ESC, b'E', u8::from(on)])
    }

    /// `GS !`: character magnification
    pub fn size(&mut self, double_width: bool, double_height: bool) -> io::Result<()> {
        let n = (u8::from(double_width) << 4) | u8::from(double_height);
        self.out.write_all(&[GS, b'!', n])
    }

    pub fn font(&mut self, font: Font) -> io::Result<()> {
        let n = match font {
            Font::A => 0,
            Font::B => 1,
        };
        self.out.write_all(&[ESC, b'M', n])
    }

    pub fn set(&mut self, style: TextStyle) -> io::Result<()> {
        self.align(style.align)?;
        self.font(style.font)?;
        self.bold(style.bold)?;
        self.size(style.double_width, style.double_height)
    }

    pub fn text(&mut self, text: &str) -> io::Result<()> {
        self.out.write_all(text.as_bytes())
    }

    /// Print and feed `lines` lines
    pub fn feed(&mut self, lines: u8) -> io::Result<()> {
        self.out.write_all(&[ESC, b'd', lines])
    }

    /// `GS V 66 0`: feed to the cutter and partial cut
    pub fn cut(&mut self) -> io::Result<()> {
        self.out.write_all(&[GS, b'V', 66, 0])
    }

    /// Raster bit image (`GS v 0`), sent in bands.
    pub fn image(&mut self, image: &GrayImage) -> io::Result<()> {
        let width = image.width();
        let width_bytes = width.div_ceil(8);
        if width == 0 || image.height() == 0 {
            return Ok(());
        }

        let mut top = 0;
        while top < image.height() {
            let rows = RASTER_BAND_ROWS.min(image.height() - top);
            let mut block = Vec::with_capacity(8 + (width_bytes * rows) as usize);
            block.extend_from_slice(&[GS, b'v', b'0', 0]);
            block.extend_from_slice(&(width_bytes as u16).to_le_bytes());
            block.extend_from_slice(&(rows as u16).to_le_bytes());
            for y in top..top + rows {
                block.extend(pack_row(image, y));
            }
            self.out.write_all(&block)?;
            top += rows;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

/// One raster row, MSB first, 1 = black dot.
pub fn pack_row(image: &GrayImage, y: u32) -> Vec<u8> {
    let width = image.width();
    let mut row = vec![0u8; width.div_ceil(8) as usize];
    for x in 0..width {
        if image.get_pixel(x, y).0[0] < BLACK_THRESHOLD {
            row[(x / 8) as usize] |= 0x80 >> (x % 8);
        }
    }
    row
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn test_text_style_bytes() {
        let mut printer = EscPos::new(Vec::new());
        printer.set(TextStyle::masthead()).unwrap();
        assert_eq!(
            printer.into_inner(),
            vec![ESC, b'a', 1, ESC, b'M', 0, ESC, b'E', 1, GS, b'!', 0x11]
        );
    }

    #[test]
    fn test_pack_row_msb_first() {
        let mut img = GrayImage::from_pixel(10, 1, Luma([255]));
        img.put_pixel(0, 0, Luma([0]));
        img.put_pixel(9, 0, Luma([10]));
        assert_eq!(pack_row(&img, 0), vec![0x80, 0x40]);
    }

    #[test]
    fn test_raster_header_and_banding() {
        let img = GrayImage::from_pixel(16, 300, Luma([0]));
        let mut printer = EscPos::new(Vec::new());
        printer.image(&img).unwrap();
        let bytes = printer.into_inner();

        // Two bands: 256 rows then 44 rows, 2 bytes per row
        assert_eq!(&bytes[..8], &[GS, b'v', b'0', 0, 2, 0, 0, 1]);
        let second = 8 + 2 * 256;
        assert_eq!(&bytes[second..second + 8], &[GS, b'v', b'0', 0, 2, 0, 44, 0]);
        assert_eq!(bytes.len(), 8 * 2 + 2 * 300);
        assert!(bytes[8..second].iter().all(|b| *b == 0xFF));
    }

    #[test]
    fn test_empty_image_writes_nothing() {
        let mut printer = EscPos::new(Vec::new());
        printer.image(&GrayImage::new(0, 0)).unwrap();
        assert!(printer.into_inner().is_empty());
    }
}
