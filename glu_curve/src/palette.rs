//! Day colours: hex parsing, palettes and the date → colour assignment.

use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::{DateRange, GluError};

/// Colours used by the original multi-day overlay reports, in assignment order.
pub const DEFAULT_PALETTE_HEX: [&str; 40] = [
    "#000000", "#FFFF00", "#0000FF", "#FF0000", "#87CEFA", "#FFD700", "#808080", "#20B2AA",
    "#FF1493", "#000080", "#FFA500", "#00FFFF", "#C71585", "#800080", "#D2691E", "#FF00FF",
    "#C0C0C0", "#2E8B57", "#FF6347", "#BA55D3", "#FF4500", "#8A2BE2", "#008000", "#8B4513",
    "#32CD32", "#40E0D0", "#5F9EA0", "#008080", "#DA70D6", "#228B22", "#A0522D", "#CD5C5C",
    "#FFC0CB", "#FA8072", "#B0C4DE", "#ADD8E6", "#DEB887", "#F5DEB3", "#FFFACD", "#E0FFFF",
];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Parse `#RRGGBB` (the leading `#` is optional).
    pub fn from_hex(input: &str) -> Result<Self, GluError> {
        let trimmed = input.trim();
        let digits = trimmed.strip_prefix('#').unwrap_or(trimmed);
        if digits.len() != 6 || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(GluError::InvalidColor(input.to_string()));
        }
        let channel = |range: std::ops::Range<usize>| {
            u8::from_str_radix(&digits[range], 16)
                .map_err(|_| GluError::InvalidColor(input.to_string()))
        };
        Ok(Self {
            r: channel(0..2)?,
            g: channel(2..4)?,
            b: channel(4..6)?,
        })
    }

    pub fn to_hex(self) -> String {
        format!("#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl TryFrom<String> for Rgb {
    type Error = GluError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Rgb::from_hex(&value)
    }
}

impl From<Rgb> for String {
    fn from(value: Rgb) -> Self {
        value.to_hex()
    }
}

/// Ordered, non-empty list of display colours owned by the caller.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Rgb>", into = "Vec<Rgb>")]
pub struct Palette {
    colors: Vec<Rgb>,
}

impl Palette {
    pub fn new(colors: Vec<Rgb>) -> Result<Self, GluError> {
        if colors.is_empty() {
            return Err(GluError::EmptyPalette);
        }
        Ok(Self { colors })
    }

    pub fn from_hex_list<S: AsRef<str>>(items: &[S]) -> Result<Self, GluError> {
        let colors = items
            .iter()
            .map(|item| Rgb::from_hex(item.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(colors)
    }

    /// Load a palette from a JSON array of hex strings.
    pub fn from_json(text: &str) -> Result<Self, GluError> {
        let items: Vec<String> = serde_json::from_str(text)
            .map_err(|e| GluError::InvalidParameter(format!("palette JSON: {}", e)))?;
        Self::from_hex_list(&items)
    }

    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }

    /// Colour at `index`, wrapping modulo the palette size.
    pub fn color(&self, index: usize) -> Rgb {
        self.colors[index % self.colors.len()]
    }

    pub fn colors(&self) -> &[Rgb] {
        &self.colors
    }
}

impl Default for Palette {
    fn default() -> Self {
        let colors = DEFAULT_PALETTE_HEX
            .iter()
            .filter_map(|hex| Rgb::from_hex(hex).ok())
            .collect();
        Self { colors }
    }
}

impl TryFrom<Vec<Rgb>> for Palette {
    type Error = GluError;

    fn try_from(value: Vec<Rgb>) -> Result<Self, Self::Error> {
        Palette::new(value)
    }
}

impl From<Palette> for Vec<Rgb> {
    fn from(value: Palette) -> Self {
        value.colors
    }
}

/// Stable date → colour mapping for one run. Shared by curve strokes and legend swatches.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorMap {
    entries: BTreeMap<NaiveDate, Rgb>,
}

impl ColorMap {
    pub fn get(&self, date: NaiveDate) -> Option<Rgb> {
        self.entries.get(&date).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in ascending date order.
    pub fn iter(&self) -> impl Iterator<Item = (NaiveDate, Rgb)> + '_ {
        self.entries.iter().map(|(date, color)| (*date, *color))
    }
}

/// Assign each date of `range` the palette colour at its zero-based offset.
///
/// Fails with [`GluError::PaletteExhausted`] before assigning anything when the
/// range has more days than the palette has colours, since two days would then
/// share a legend swatch.
pub fn assign_colors(range: &DateRange, palette: &Palette) -> Result<ColorMap, GluError> {
    let days = range.num_days();
    if palette.len() < days {
        return Err(GluError::PaletteExhausted {
            days,
            colors: palette.len(),
        });
    }
    let entries = range
        .days()
        .enumerate()
        .map(|(idx, date)| (date, palette.color(idx)))
        .collect();
    Ok(ColorMap { entries })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn parses_hex_with_and_without_hash() {
        assert_eq!(Rgb::from_hex("#FF1493").unwrap(), Rgb::new(255, 20, 147));
        assert_eq!(Rgb::from_hex("00ff00").unwrap(), Rgb::new(0, 255, 0));
        assert_eq!(Rgb::new(135, 206, 250).to_hex(), "#87CEFA");
    }

    #[test]
    fn rejects_malformed_hex() {
        for bad in ["", "#12345", "#GG0000", "#1234567", "#ééé", "#+1+2+3"] {
            assert!(
                matches!(Rgb::from_hex(bad), Err(GluError::InvalidColor(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn default_palette_has_forty_distinct_colors() {
        let palette = Palette::default();
        assert_eq!(palette.len(), 40);
        let mut seen = palette.colors().to_vec();
        seen.sort_by_key(|c| (c.r, c.g, c.b));
        seen.dedup();
        assert_eq!(seen.len(), 40);
        assert_eq!(palette.color(0), Rgb::new(0, 0, 0));
        assert_eq!(palette.color(40), palette.color(0));
    }

    #[test]
    fn empty_palette_is_rejected() {
        assert_eq!(Palette::new(Vec::new()), Err(GluError::EmptyPalette));
        assert!(Palette::from_json("[]").is_err());
    }

    #[test]
    fn palette_round_trips_through_json() {
        let palette = Palette::from_json(r##"["#000000", "#ff0000"]"##).unwrap();
        assert_eq!(palette.colors(), &[Rgb::new(0, 0, 0), Rgb::new(255, 0, 0)]);
        let text = serde_json::to_string(&palette).unwrap();
        assert_eq!(text, r##"["#000000","#FF0000"]"##);
    }

    #[test]
    fn assigns_by_offset_within_range() {
        let range = DateRange::new(date(2023, 12, 29), date(2024, 1, 2)).unwrap();
        let palette = Palette::default();
        let colors = assign_colors(&range, &palette).unwrap();
        assert_eq!(colors.len(), 5);
        assert_eq!(colors.get(date(2023, 12, 29)), Some(palette.color(0)));
        assert_eq!(colors.get(date(2024, 1, 1)), Some(palette.color(3)));
        assert_eq!(colors.get(date(2024, 1, 3)), None);
        let ordered: Vec<_> = colors.iter().map(|(d, _)| d).collect();
        assert_eq!(ordered, range.days().collect::<Vec<_>>());
    }

    #[test]
    fn exact_capacity_is_accepted() {
        let range = DateRange::new(date(2024, 1, 1), date(2024, 1, 2)).unwrap();
        let palette = Palette::from_hex_list(&["#000000", "#FFFFFF"]).unwrap();
        let colors = assign_colors(&range, &palette).unwrap();
        assert_ne!(colors.get(date(2024, 1, 1)), colors.get(date(2024, 1, 2)));
    }

    #[test]
    fn three_days_with_two_colors_is_exhausted() {
        let range = DateRange::new(date(2024, 1, 1), date(2024, 1, 3)).unwrap();
        let palette = Palette::from_hex_list(&["#000000", "#FFFFFF"]).unwrap();
        assert_eq!(
            assign_colors(&range, &palette),
            Err(GluError::PaletteExhausted { days: 3, colors: 2 })
        );
    }

    #[test]
    fn assignment_is_stable_across_runs() {
        let range = DateRange::new(date(2023, 11, 12), date(2023, 12, 1)).unwrap();
        let palette = Palette::default();
        let first = assign_colors(&range, &palette).unwrap();
        let second = assign_colors(&range, &palette).unwrap();
        assert_eq!(first, second);
        for (idx, day) in range.days().enumerate() {
            assert_eq!(first.get(day), Some(palette.color(idx % palette.len())));
        }
    }
}
