//! Palette domain: wire decoding, the HTTP remote and the offline-first cache.

pub mod api_types;
pub mod cache;
pub mod client;
pub mod export;
pub mod types;

#[cfg(test)]
pub mod testing;

pub use cache::{CacheOptions, CacheResult, CacheSource, PaletteCache, SyncReport};
pub use client::{ApiHealth, HttpRemote, PaletteRemote};
pub use export::{export_palette, ExportedColor};
pub use types::{Color, NewPalette, Palette, PaletteUpdate, Rgb};
