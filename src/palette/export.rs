//! Export projection of a palette's colors.

use serde::Serialize;

use super::types::Palette;

/// One exported color. Derived on demand, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportedColor {
  #[serde(skip_serializing_if = "String::is_empty")]
  pub id: String,
  pub hex: String,
  pub rgb: [u8; 3],
  pub hsv: [u16; 3],
  pub position: u32,
}

/// Colors of `palette` in palette order.
pub fn export_palette(palette: &Palette) -> Vec<ExportedColor> {
  palette
    .colors
    .iter()
    .map(|color| ExportedColor {
      id: color.id.clone(),
      hex: color.hex.clone(),
      rgb: color.rgb.into(),
      hsv: color.rgb.to_hsv(),
      position: color.position,
    })
    .collect()
}
