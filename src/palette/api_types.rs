//! Decoding of palette records arriving from the API or the local store.
//!
//! The backend mixes snake_case and camelCase field names, and older cache
//! entries may be in either shape. Every record passes through
//! `decode_palette` once, so the rest of the crate only sees `Palette`.
//! Malformed pieces are replaced with defaults instead of failing the record.

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::warn;

use super::types::{Color, Palette, Rgb};

// ============================================================================
// Response envelopes
// ============================================================================

/// List endpoint response. The API has returned all three shapes.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ApiPaletteList {
  Bare(Vec<Value>),
  Wrapped { palettes: Vec<Value> },
  Data { data: Vec<Value> },
}

impl ApiPaletteList {
  pub fn into_records(self) -> Vec<Value> {
    match self {
      Self::Bare(records) | Self::Wrapped { palettes: records } | Self::Data { data: records } => {
        records
      }
    }
  }
}

/// Extract the record list from a list response, or `None` if the shape is unknown.
pub fn decode_palette_list(value: Value) -> Option<Vec<Value>> {
  serde_json::from_value::<ApiPaletteList>(value)
    .ok()
    .map(ApiPaletteList::into_records)
}

/// `GET /health` response
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ApiHealthResponse {
  pub status: String,
  pub version: Option<String>,
  pub database_connection: bool,
}

// ============================================================================
// Palette records
// ============================================================================

/// Field lookup over a wire object that accepts either naming convention.
struct Fields<'a>(&'a Map<String, Value>);

impl<'a> Fields<'a> {
  /// First present, non-null value among `names`.
  fn get(&self, names: &[&str]) -> Option<&'a Value> {
    names
      .iter()
      .filter_map(|name| self.0.get(*name))
      .find(|v| !v.is_null())
  }

  /// First non-empty string among `names`. Numbers are stringified.
  fn string(&self, names: &[&str]) -> Option<String> {
    names
      .iter()
      .filter_map(|name| self.0.get(*name))
      .filter_map(scalar_to_string)
      .find(|s| !s.is_empty())
  }
}

fn scalar_to_string(value: &Value) -> Option<String> {
  match value {
    Value::String(s) => Some(s.clone()),
    Value::Number(n) => Some(n.to_string()),
    _ => None,
  }
}

/// Decode one palette record.
///
/// Returns `None` only when the record is not an object or has no usable id
/// (and no `fallback_id` was given). Everything else gets a default.
pub fn decode_palette(value: &Value, fallback_id: Option<&str>) -> Option<Palette> {
  let Some(obj) = value.as_object() else {
    warn!("Discarding palette record that is not an object");
    return None;
  };
  let f = Fields(obj);

  let id = f
    .string(&["id"])
    .or_else(|| fallback_id.map(String::from))?;

  let colors = decode_colors(f.get(&["colors"]), &id);

  Some(Palette {
    name: f.string(&["name"]).unwrap_or_default(),
    description: f.string(&["description"]).unwrap_or_default(),
    image_id: f.string(&["image_id", "imageId"]).unwrap_or_default(),
    image_url: f.string(&["image_url", "imageUrl"]),
    created_at: f.string(&["created_at", "createdAt"]).unwrap_or_default(),
    updated_at: f.string(&["updated_at", "updatedAt"]).unwrap_or_default(),
    colors,
    id,
  })
}

/// Decode a color list, ordered by incoming position and renumbered 0..n-1.
fn decode_colors(value: Option<&Value>, palette_id: &str) -> Vec<Color> {
  let entries = match value {
    None => return Vec::new(),
    Some(Value::Array(entries)) => entries,
    Some(_) => {
      warn!(palette = palette_id, "Color list is not an array, using empty list");
      return Vec::new();
    }
  };

  let mut decoded: Vec<(Color, Option<u64>)> = entries
    .iter()
    .map(|entry| {
      decode_color(entry).unwrap_or_else(|| {
        warn!(palette = palette_id, "Unreadable color entry, using placeholder");
        (Color::placeholder(), None)
      })
    })
    .collect();

  // Only trust incoming positions when every entry has one
  if decoded.iter().all(|(_, position)| position.is_some()) {
    decoded.sort_by_key(|(_, position)| *position);
  }

  let mut palette = Palette::shell(palette_id);
  palette.set_colors(decoded.into_iter().map(|(color, _)| color).collect());
  palette.colors
}

/// Decode one color. Hex wins when hex and rgb disagree.
fn decode_color(value: &Value) -> Option<(Color, Option<u64>)> {
  let f = Fields(value.as_object()?);

  let from_hex = f.string(&["hex"]).and_then(|h| Rgb::from_hex(&h));
  let rgb = from_hex.or_else(|| f.get(&["rgb"]).and_then(parse_rgb))?;

  let color = Color {
    id: f.string(&["id"]).unwrap_or_default(),
    hex: rgb.to_hex(),
    rgb,
    name: f.string(&["name"]).unwrap_or_default(),
    position: 0,
  };
  let position = f.get(&["position"]).and_then(Value::as_u64);

  Some((color, position))
}

/// Parse rgb given as `"rgb(r, g, b)"`, `"r,g,b"`, `[r, g, b]` or `{r, g, b}`.
fn parse_rgb(value: &Value) -> Option<Rgb> {
  let channel = |v: &Value| v.as_u64().and_then(|n| u8::try_from(n).ok());

  match value {
    Value::String(s) => {
      let inner = s
        .trim()
        .trim_start_matches("rgb(")
        .trim_end_matches(')');
      let parts: Vec<u8> = inner
        .split(',')
        .map(|p| p.trim().parse::<u8>())
        .collect::<Result<_, _>>()
        .ok()?;
      match parts.as_slice() {
        [r, g, b] => Some(Rgb::new(*r, *g, *b)),
        _ => None,
      }
    }
    Value::Array(items) => match items.as_slice() {
      [r, g, b] => Some(Rgb::new(channel(r)?, channel(g)?, channel(b)?)),
      _ => None,
    },
    Value::Object(obj) => Some(Rgb::new(
      channel(obj.get("r")?)?,
      channel(obj.get("g")?)?,
      channel(obj.get("b")?)?,
    )),
    _ => None,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_snake_case_record() {
    let record = json!({
      "id": "p1",
      "name": "Sunset",
      "image_id": "img-1",
      "image_url": "/images/img-1.jpg",
      "created_at": "2024-01-01T00:00:00Z",
      "updated_at": "2024-01-02T00:00:00Z",
      "colors": []
    });

    let palette = decode_palette(&record, None).unwrap();
    assert_eq!(palette.image_id, "img-1");
    assert_eq!(palette.image_url.as_deref(), Some("/images/img-1.jpg"));
    assert_eq!(palette.created_at, "2024-01-01T00:00:00Z");
    assert_eq!(palette.updated_at, "2024-01-02T00:00:00Z");
  }

  #[test]
  fn test_camel_case_record() {
    let record = json!({
      "id": "p1",
      "imageId": "img-2",
      "createdAt": "2024-03-01T00:00:00Z",
      "updatedAt": "2024-03-02T00:00:00Z"
    });

    let palette = decode_palette(&record, None).unwrap();
    assert_eq!(palette.image_id, "img-2");
    assert_eq!(palette.created_at, "2024-03-01T00:00:00Z");
    assert_eq!(palette.image_url, None);
  }

  #[test]
  fn test_both_conventions_present_does_not_fail() {
    let record = json!({ "id": "p1", "image_id": "", "imageId": "img-3" });
    let palette = decode_palette(&record, None).unwrap();
    assert_eq!(palette.image_id, "img-3");
  }

  #[test]
  fn test_canonical_output_round_trips() {
    let record = json!({ "id": 42, "name": "N", "created_at": "2024-01-01T00:00:00Z" });
    let palette = decode_palette(&record, None).unwrap();
    assert_eq!(palette.id, "42");

    let stored = serde_json::to_value(&palette).unwrap();
    assert_eq!(stored["createdAt"], "2024-01-01T00:00:00Z");
    assert!(stored.get("created_at").is_none());
    assert_eq!(decode_palette(&stored, None).unwrap(), palette);
  }

  #[test]
  fn test_non_object_is_rejected() {
    assert!(decode_palette(&json!("nope"), Some("p1")).is_none());
    assert!(decode_palette(&json!([1, 2]), None).is_none());
  }

  #[test]
  fn test_missing_id_uses_fallback() {
    assert!(decode_palette(&json!({ "name": "x" }), None).is_none());
    let palette = decode_palette(&json!({ "name": "x" }), Some("p9")).unwrap();
    assert_eq!(palette.id, "p9");
  }

  #[test]
  fn test_colors_ordered_and_renumbered() {
    let record = json!({
      "id": "p1",
      "colors": [
        { "id": "c2", "hex": "#33FF57", "rgb": "rgb(51, 255, 87)", "name": "Lime", "position": 2 },
        { "id": "c1", "hex": "#FF5733", "rgb": "rgb(255, 87, 51)", "name": "Coral", "position": 1 }
      ]
    });

    let palette = decode_palette(&record, None).unwrap();
    let summary: Vec<(&str, &str, u32)> = palette
      .colors
      .iter()
      .map(|c| (c.id.as_str(), c.hex.as_str(), c.position))
      .collect();
    assert_eq!(summary, vec![("c1", "#ff5733", 0), ("c2", "#33ff57", 1)]);
    assert_eq!(palette.colors[0].rgb, Rgb::new(255, 87, 51));
  }

  #[test]
  fn test_colors_without_positions_keep_array_order() {
    let record = json!({
      "id": "p1",
      "colors": [
        { "hex": "#000001", "position": 5 },
        { "hex": "#000002" }
      ]
    });

    let palette = decode_palette(&record, None).unwrap();
    assert_eq!(palette.colors[0].hex, "#000001");
    assert_eq!(palette.colors[1].position, 1);
  }

  #[test]
  fn test_malformed_colors_get_defaults() {
    let record = json!({
      "id": "p1",
      "colors": [
        "garbage",
        { "rgb": [10, 20, 30] },
        { "rgb": { "r": 1, "g": 2, "b": 3 } },
        { "hex": "not-a-color", "rgb": "rgb(999, 0, 0)" }
      ]
    });

    let palette = decode_palette(&record, None).unwrap();
    let hexes: Vec<&str> = palette.colors.iter().map(|c| c.hex.as_str()).collect();
    assert_eq!(hexes, vec!["#000000", "#0a141e", "#010203", "#000000"]);

    let not_a_list = decode_palette(&json!({ "id": "p1", "colors": "red" }), None).unwrap();
    assert!(not_a_list.colors.is_empty());
  }

  #[test]
  fn test_list_envelopes() {
    let bare = decode_palette_list(json!([{ "id": "a" }])).unwrap();
    assert_eq!(bare.len(), 1);

    let wrapped = decode_palette_list(json!({
      "palettes": [{ "id": "a" }, { "id": "b" }],
      "meta": { "pagination": { "total": 2 } }
    }))
    .unwrap();
    assert_eq!(wrapped.len(), 2);

    let data = decode_palette_list(json!({ "data": [] })).unwrap();
    assert!(data.is_empty());

    assert!(decode_palette_list(json!({ "unexpected": true })).is_none());
  }
}
