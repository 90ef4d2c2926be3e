use serde::{Deserialize, Serialize};

/// An RGB triple, serialized as `[r, g, b]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "[u8; 3]", into = "[u8; 3]")]
pub struct Rgb {
  pub r: u8,
  pub g: u8,
  pub b: u8,
}

impl Rgb {
  pub const BLACK: Rgb = Rgb { r: 0, g: 0, b: 0 };

  pub const fn new(r: u8, g: u8, b: u8) -> Self {
    Self { r, g, b }
  }

  /// Parse `#RRGGBB`, `RRGGBB` or the `#RGB` shorthand.
  pub fn from_hex(hex: &str) -> Option<Self> {
    let digits = hex.trim().trim_start_matches('#');
    if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
      return None;
    }
    let expanded: String = match digits.len() {
      3 => digits.chars().flat_map(|c| [c, c]).collect(),
      6 => digits.to_string(),
      _ => return None,
    };
    let channel = |i: usize| u8::from_str_radix(expanded.get(i..i + 2)?, 16).ok();
    Some(Self::new(channel(0)?, channel(2)?, channel(4)?))
  }

  /// Lowercase `#rrggbb`.
  pub fn to_hex(self) -> String {
    format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
  }

  /// Hue in degrees (0-359), saturation and value in percent, all rounded.
  pub fn to_hsv(self) -> [u16; 3] {
    let r = f64::from(self.r) / 255.0;
    let g = f64::from(self.g) / 255.0;
    let b = f64::from(self.b) / 255.0;

    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let hue = if delta == 0.0 {
      0.0
    } else if max == r {
      60.0 * ((g - b) / delta).rem_euclid(6.0)
    } else if max == g {
      60.0 * ((b - r) / delta + 2.0)
    } else {
      60.0 * ((r - g) / delta + 4.0)
    };
    let saturation = if max == 0.0 { 0.0 } else { delta / max };

    [
      (hue.round() as u16) % 360,
      (saturation * 100.0).round() as u16,
      (max * 100.0).round() as u16,
    ]
  }
}

impl From<[u8; 3]> for Rgb {
  fn from([r, g, b]: [u8; 3]) -> Self {
    Self::new(r, g, b)
  }
}

impl From<Rgb> for [u8; 3] {
  fn from(rgb: Rgb) -> Self {
    [rgb.r, rgb.g, rgb.b]
  }
}

/// A single palette color
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Color {
  #[serde(default)]
  pub id: String,
  pub hex: String,
  pub rgb: Rgb,
  #[serde(default)]
  pub name: String,
  /// Index in the owning palette's color list
  #[serde(default)]
  pub position: u32,
}

impl Color {
  pub fn from_rgb(rgb: Rgb) -> Self {
    Self {
      id: String::new(),
      hex: rgb.to_hex(),
      rgb,
      name: String::new(),
      position: 0,
    }
  }

  pub fn from_hex(hex: &str) -> Option<Self> {
    Rgb::from_hex(hex).map(Self::from_rgb)
  }

  /// Stand-in for a color entry that could not be decoded.
  pub fn placeholder() -> Self {
    Self::from_rgb(Rgb::BLACK)
  }
}

/// A named, ordered set of colors derived from an image.
///
/// This is the only shape stored in the cache; wire records are decoded
/// into it by `api_types`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Palette {
  pub id: String,
  pub name: String,
  pub description: String,
  pub image_id: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub image_url: Option<String>,
  pub colors: Vec<Color>,
  pub created_at: String,
  pub updated_at: String,
}

impl Palette {
  /// Empty palette carrying only an id.
  pub fn shell(id: &str) -> Self {
    Self {
      id: id.to_string(),
      ..Self::default()
    }
  }

  /// Replace the color list, renumbering positions.
  pub fn set_colors(&mut self, colors: Vec<Color>) {
    self.colors = colors;
    self.renumber_colors();
  }

  /// Move the color at `from` to `to`. Returns false if either index is out of range.
  pub fn move_color(&mut self, from: usize, to: usize) -> bool {
    if from >= self.colors.len() || to >= self.colors.len() {
      return false;
    }
    let color = self.colors.remove(from);
    self.colors.insert(to, color);
    self.renumber_colors();
    true
  }

  /// Remove and return the color at `index`.
  pub fn remove_color(&mut self, index: usize) -> Option<Color> {
    if index >= self.colors.len() {
      return None;
    }
    let color = self.colors.remove(index);
    self.renumber_colors();
    Some(color)
  }

  /// Positions always form 0..n-1 in list order.
  pub fn renumber_colors(&mut self) {
    for (position, color) in self.colors.iter_mut().enumerate() {
      color.position = position as u32;
    }
  }

  /// Apply the fields present in `update`.
  pub fn apply(&mut self, update: PaletteUpdate) {
    if let Some(name) = update.name {
      self.name = name;
    }
    if let Some(description) = update.description {
      self.description = description;
    }
    if let Some(image_id) = update.image_id {
      self.image_id = image_id;
    }
    if let Some(image_url) = update.image_url {
      self.image_url = Some(image_url);
    }
    if let Some(colors) = update.colors {
      self.set_colors(colors);
    }
  }
}

/// Partial palette fields for `update`. `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PaletteUpdate {
  pub name: Option<String>,
  pub description: Option<String>,
  pub image_id: Option<String>,
  pub image_url: Option<String>,
  pub colors: Option<Vec<Color>>,
}

impl PaletteUpdate {
  pub fn name(name: impl Into<String>) -> Self {
    Self {
      name: Some(name.into()),
      ..Self::default()
    }
  }

  pub fn is_empty(&self) -> bool {
    *self == Self::default()
  }
}

/// Fields for creating a palette
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewPalette {
  pub name: String,
  pub image_id: String,
  pub description: String,
  pub colors: Vec<Color>,
}

#[cfg(test)]
mod tests {
  use super::*;

  fn palette_with(hexes: &[&str]) -> Palette {
    let mut palette = Palette::shell("p1");
    palette.set_colors(hexes.iter().filter_map(|h| Color::from_hex(h)).collect());
    palette
  }

  fn order(palette: &Palette) -> Vec<(String, u32)> {
    palette
      .colors
      .iter()
      .map(|c| (c.hex.clone(), c.position))
      .collect()
  }

  #[test]
  fn test_hex_parsing() {
    assert_eq!(Rgb::from_hex("#FF5733"), Some(Rgb::new(255, 87, 51)));
    assert_eq!(Rgb::from_hex("ff5733"), Some(Rgb::new(255, 87, 51)));
    assert_eq!(Rgb::from_hex("#abc"), Some(Rgb::new(0xaa, 0xbb, 0xcc)));
    assert_eq!(Rgb::from_hex("#12345"), None);
    assert_eq!(Rgb::from_hex("#zzzzzz"), None);
    assert_eq!(Rgb::new(255, 87, 51).to_hex(), "#ff5733");
  }

  #[test]
  fn test_hsv_conversion() {
    assert_eq!(Rgb::new(48, 35, 118).to_hsv(), [249, 70, 46]);
    assert_eq!(Rgb::new(1, 82, 119).to_hsv(), [199, 99, 47]);
    assert_eq!(Rgb::new(142, 172, 205).to_hsv(), [211, 31, 80]);
    assert_eq!(Rgb::new(255, 0, 0).to_hsv(), [0, 100, 100]);
    assert_eq!(Rgb::BLACK.to_hsv(), [0, 0, 0]);
  }

  #[test]
  fn test_rgb_serializes_as_array() {
    let json = serde_json::to_value(Rgb::new(1, 2, 3)).unwrap();
    assert_eq!(json, serde_json::json!([1, 2, 3]));
  }

  #[test]
  fn test_set_colors_renumbers() {
    let palette = palette_with(&["#000000", "#111111", "#222222"]);
    assert_eq!(
      order(&palette),
      vec![
        ("#000000".to_string(), 0),
        ("#111111".to_string(), 1),
        ("#222222".to_string(), 2),
      ]
    );
  }

  #[test]
  fn test_move_color_keeps_positions_dense() {
    let mut palette = palette_with(&["#000000", "#111111", "#222222"]);
    assert!(palette.move_color(0, 2));
    assert_eq!(
      order(&palette),
      vec![
        ("#111111".to_string(), 0),
        ("#222222".to_string(), 1),
        ("#000000".to_string(), 2),
      ]
    );
    assert!(!palette.move_color(0, 3));
  }

  #[test]
  fn test_remove_color_keeps_positions_dense() {
    let mut palette = palette_with(&["#000000", "#111111", "#222222"]);
    let removed = palette.remove_color(1).unwrap();
    assert_eq!(removed.hex, "#111111");
    assert_eq!(
      order(&palette),
      vec![("#000000".to_string(), 0), ("#222222".to_string(), 1)]
    );
    assert!(palette.remove_color(5).is_none());
  }

  #[test]
  fn test_apply_only_touches_present_fields() {
    let mut palette = palette_with(&["#000000"]);
    palette.name = "Old".to_string();
    palette.description = "Keep me".to_string();

    palette.apply(PaletteUpdate::name("New"));

    assert_eq!(palette.name, "New");
    assert_eq!(palette.description, "Keep me");
    assert_eq!(palette.colors.len(), 1);
  }
}
