//! Color-code identifiers for the visibility pass
//!
//! Every tracked object is drawn in a unique flat RGB color. After the
//! proxy pass the pixel buffer is decoded back into the set of colors seen.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::str::FromStr;

use rayon::prelude::*;

use crate::core::error::Error;
use crate::core::types::Result;

/// Number of distinct 24-bit codes, background included
pub const COLOR_SPACE: u32 = 1 << 24;

/// Pixels per rayon work item when decoding
const DECODE_CHUNK_PIXELS: usize = 16 * 1024;

/// Packed `0xRRGGBB` identifier
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ColorCode(u32);

impl ColorCode {
    /// Cleared framebuffer color, never allocated
    pub const BACKGROUND: ColorCode = ColorCode(0);

    pub fn from_rgb(r: u8, g: u8, b: u8) -> Self {
        Self((r as u32) << 16 | (g as u32) << 8 | b as u32)
    }

    pub fn r(self) -> u8 {
        (self.0 >> 16) as u8
    }

    pub fn g(self) -> u8 {
        (self.0 >> 8) as u8
    }

    pub fn b(self) -> u8 {
        self.0 as u8
    }

    pub fn packed(self) -> u32 {
        self.0
    }

    /// Normalized RGBA for shaders and rasterizers (alpha 1)
    pub fn to_rgba_f32(self) -> [f32; 4] {
        [
            self.r() as f32 / 255.0,
            self.g() as f32 / 255.0,
            self.b() as f32 / 255.0,
            1.0,
        ]
    }
}

impl fmt::Display for ColorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.r(), self.g(), self.b())
    }
}

impl FromStr for ColorCode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.split('-');
        let mut channel = || -> Result<u8> {
            parts
                .next()
                .and_then(|p| p.trim().parse::<u8>().ok())
                .ok_or_else(|| Error::Visibility(format!("invalid color code '{}'", s)))
        };
        let (r, g, b) = (channel()?, channel()?, channel()?);
        if parts.next().is_some() {
            return Err(Error::Visibility(format!("invalid color code '{}'", s)));
        }
        Ok(Self::from_rgb(r, g, b))
    }
}

/// Allocates color codes and decodes pixel buffers
///
/// Fresh codes come from a counter stepping b, then g, then r. Once the
/// counter reaches the end of the 24-bit space, only released codes are
/// handed out again, oldest release first.
#[derive(Debug)]
pub struct ColorCodec {
    /// Next never-used code
    next: u32,
    released: VecDeque<ColorCode>,
    live: HashSet<ColorCode>,
}

impl ColorCodec {
    pub fn new() -> Self {
        Self {
            next: 1,
            released: VecDeque::new(),
            live: HashSet::new(),
        }
    }

    /// Next unused code
    pub fn allocate(&mut self) -> Result<ColorCode> {
        let code = if self.next < COLOR_SPACE {
            let code = ColorCode(self.next);
            self.next += 1;
            code
        } else if let Some(code) = self.released.pop_front() {
            code
        } else {
            return Err(Error::ColorSpaceExhausted(COLOR_SPACE - 1));
        };
        self.live.insert(code);
        Ok(code)
    }

    /// Give a code back once its owner is gone
    pub fn release(&mut self, code: ColorCode) {
        if self.live.remove(&code) {
            self.released.push_back(code);
        }
    }

    pub fn is_live(&self, code: ColorCode) -> bool {
        self.live.contains(&code)
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Distinct codes found in an RGBA8 buffer, alpha ignored
    pub fn decode(pixels: &[u8]) -> HashSet<ColorCode> {
        Self::decode_counts(pixels).into_keys().collect()
    }

    /// Pixel count per code found in an RGBA8 buffer
    pub fn decode_counts(pixels: &[u8]) -> HashMap<ColorCode, u32> {
        pixels
            .par_chunks(DECODE_CHUNK_PIXELS * 4)
            .map(|chunk| {
                let mut counts: HashMap<ColorCode, u32> = HashMap::new();
                for px in chunk.chunks_exact(4) {
                    let code = ColorCode::from_rgb(px[0], px[1], px[2]);
                    if code != ColorCode::BACKGROUND {
                        *counts.entry(code).or_insert(0) += 1;
                    }
                }
                counts
            })
            .reduce(HashMap::new, |mut a, b| {
                for (code, n) in b {
                    *a.entry(code).or_insert(0) += n;
                }
                a
            })
    }

    #[cfg(test)]
    fn jump_to_end(&mut self) {
        self.next = COLOR_SPACE - 2;
    }
}

impl Default for ColorCodec {
    fn default() -> Self {
        Self::new()
    }
}
