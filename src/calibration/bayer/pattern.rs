use std::fmt;

use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::calibration::common::error::{CalibrationError, Result};

/// Colour channels of a Bayer sensor, in RGBG2 stack order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Red = 0,
    Green = 1,
    Blue = 2,
    Green2 = 3,
}

impl Channel {
    pub const ALL: [Channel; 4] = [Channel::Red, Channel::Green, Channel::Blue, Channel::Green2];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: u8) -> Result<Self> {
        match index {
            0 => Ok(Channel::Red),
            1 => Ok(Channel::Green),
            2 => Ok(Channel::Blue),
            3 => Ok(Channel::Green2),
            other => Err(CalibrationError::InvalidPattern(format!(
                "colour index {} is not one of 0..=3",
                other
            ))),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Channel::Red => "R",
            Channel::Green => "G",
            Channel::Blue => "B",
            Channel::Green2 => "G2",
        }
    }
}

/// A 2x2 repeating colour filter tile.
///
/// `tile[row][col]` holds the colour index at that position: 0 = R, 1 = G,
/// 2 = B, 3 = G2. Every index appears exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "[[u8; 2]; 2]", into = "[[u8; 2]; 2]")]
pub struct BayerPattern {
    tile: [[u8; 2]; 2],
}

impl BayerPattern {
    pub const RGGB: BayerPattern = BayerPattern { tile: [[0, 1], [3, 2]] };
    pub const BGGR: BayerPattern = BayerPattern { tile: [[2, 3], [1, 0]] };
    pub const GRBG: BayerPattern = BayerPattern { tile: [[1, 0], [2, 3]] };
    pub const GBRG: BayerPattern = BayerPattern { tile: [[1, 2], [0, 3]] };

    pub fn new(tile: [[u8; 2]; 2]) -> Result<Self> {
        let mut seen = [false; 4];
        for &index in tile.iter().flatten() {
            let channel = Channel::from_index(index)?;
            if seen[channel.index()] {
                return Err(CalibrationError::InvalidPattern(format!(
                    "colour index {} appears twice in {:?}",
                    index, tile
                )));
            }
            seen[channel.index()] = true;
        }
        Ok(Self { tile })
    }

    /// Builds a pattern from a per-pixel colour map, such as `colour.npy`.
    /// Only the top-left tile is read.
    pub fn from_colour_map(colours: ArrayView2<'_, u8>) -> Result<Self> {
        let (height, width) = colours.dim();
        if height < 2 || width < 2 {
            return Err(CalibrationError::InvalidDimensions(width, height));
        }
        Self::new([
            [colours[[0, 0]], colours[[0, 1]]],
            [colours[[1, 0]], colours[[1, 1]]],
        ])
    }

    /// Builds a pattern from a colour layout where both greens share one
    /// index (as RAW decoders report it). The second green met in row-major
    /// order is given index 3.
    pub fn from_rgb_layout(layout: [[usize; 2]; 2]) -> Result<Self> {
        let mut tile = [[0u8; 2]; 2];
        let mut greens = 0;
        for (row, cols) in layout.iter().enumerate() {
            for (col, &colour) in cols.iter().enumerate() {
                tile[row][col] = match colour {
                    0 => 0,
                    1 | 3 => {
                        greens += 1;
                        if greens == 1 { 1 } else { 3 }
                    }
                    2 => 2,
                    other => {
                        return Err(CalibrationError::InvalidPattern(format!(
                            "unsupported CFA colour {}",
                            other
                        )));
                    }
                };
            }
        }
        Self::new(tile)
    }

    pub fn tile(&self) -> [[u8; 2]; 2] {
        self.tile
    }

    pub fn colour_at(&self, row: usize, col: usize) -> Channel {
        match self.tile[row % 2][col % 2] {
            0 => Channel::Red,
            1 => Channel::Green,
            2 => Channel::Blue,
            _ => Channel::Green2,
        }
    }

    /// Position (row, col) of `channel` within the 2x2 tile.
    pub fn offset(&self, channel: Channel) -> (usize, usize) {
        for row in 0..2 {
            for col in 0..2 {
                if self.tile[row][col] == channel as u8 {
                    return (row, col);
                }
            }
        }
        unreachable!("a validated pattern holds every channel")
    }

    /// Offsets of R, G, B, G2 in stack order.
    pub fn offsets(&self) -> [(usize, usize); 4] {
        Channel::ALL.map(|channel| self.offset(channel))
    }

    /// Full-frame colour index map of the given shape.
    pub fn colour_map(&self, height: usize, width: usize) -> Array2<u8> {
        Array2::from_shape_fn((height, width), |(row, col)| self.tile[row % 2][col % 2])
    }

    /// Name in the usual four-letter notation, e.g. "RGGB".
    pub fn name(&self) -> String {
        self.tile
            .iter()
            .flatten()
            .map(|&index| match index {
                0 => 'R',
                2 => 'B',
                _ => 'G',
            })
            .collect()
    }
}

impl Default for BayerPattern {
    fn default() -> Self {
        BayerPattern::RGGB
    }
}

impl fmt::Display for BayerPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl TryFrom<[[u8; 2]; 2]> for BayerPattern {
    type Error = CalibrationError;

    fn try_from(tile: [[u8; 2]; 2]) -> Result<Self> {
        Self::new(tile)
    }
}

impl From<BayerPattern> for [[u8; 2]; 2] {
    fn from(pattern: BayerPattern) -> Self {
        pattern.tile
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_duplicate_colours() {
        assert!(BayerPattern::new([[0, 1], [1, 2]]).is_err());
        assert!(BayerPattern::new([[0, 1], [4, 2]]).is_err());
        assert!(BayerPattern::new([[2, 3], [1, 0]]).is_ok());
    }

    #[test]
    fn test_offsets_and_colour_map() {
        let pattern = BayerPattern::BGGR;
        assert_eq!(pattern.offset(Channel::Red), (1, 1));
        assert_eq!(pattern.offset(Channel::Blue), (0, 0));
        assert_eq!(pattern.offsets(), [(1, 1), (1, 0), (0, 0), (0, 1)]);

        let map = pattern.colour_map(4, 6);
        assert_eq!(map[[0, 0]], 2);
        assert_eq!(map[[3, 5]], 0);
        assert_eq!(map[[2, 1]], 3);
        assert_eq!(pattern.name(), "BGGR");
    }

    #[test]
    fn test_second_green_from_rgb_layout() {
        let pattern = BayerPattern::from_rgb_layout([[1, 0], [2, 1]]).unwrap();
        assert_eq!(pattern, BayerPattern::new([[1, 0], [2, 3]]).unwrap());
        assert!(BayerPattern::from_rgb_layout([[0, 0], [1, 2]]).is_err());
    }

    #[test]
    fn test_serde_as_nested_list() {
        let json = serde_json::to_string(&BayerPattern::RGGB).unwrap();
        assert_eq!(json, "[[0,1],[3,2]]");
        let parsed: BayerPattern = serde_json::from_str("[[1,2],[0,3]]").unwrap();
        assert_eq!(parsed, BayerPattern::GBRG);
        assert!(serde_json::from_str::<BayerPattern>("[[1,1],[0,3]]").is_err());
    }
}
