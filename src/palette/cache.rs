//! Offline-first palette cache with pending-change sync.
//!
//! 1. Reads are served from the local index first, then the API, then the
//!    index again if the API failed meanwhile
//! 2. Writes land in the key-value store before any network call
//! 3. Ids whose latest edit the API has not confirmed stay in a persisted
//!    pending list until `sync_pending_changes` pushes them
//!
//! Concurrent operations on the same id are last-write-wins.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{SecondsFormat, Utc};
use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::{Config, DEFAULT_KEY_PREFIX};
use crate::store::KvStore;

use super::api_types::{decode_palette, decode_palette_list};
use super::client::PaletteRemote;
use super::export::{export_palette, ExportedColor};
use super::types::{NewPalette, Palette, PaletteUpdate};

/// Ids with this prefix were assigned locally and have never reached the API.
pub const LOCAL_ID_PREFIX: &str = "local-";

pub fn is_local_id(id: &str) -> bool {
  id.starts_with(LOCAL_ID_PREFIX)
}

/// Cache settings
#[derive(Debug, Clone)]
pub struct CacheOptions {
  /// Namespace for every key this cache writes
  pub key_prefix: String,
  /// Initial offline mode
  pub offline: bool,
  /// Whether cached listings for an image only include that image's palettes
  pub filter_by_image: bool,
}

impl Default for CacheOptions {
  fn default() -> Self {
    Self {
      key_prefix: DEFAULT_KEY_PREFIX.to_string(),
      offline: false,
      filter_by_image: true,
    }
  }
}

impl From<&Config> for CacheOptions {
  fn from(config: &Config) -> Self {
    Self {
      key_prefix: config.store.key_prefix.clone(),
      offline: config.offline,
      filter_by_image: config.filter_by_image,
    }
  }
}

/// Result of a cache operation, including where the data came from.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  pub data: T,
  pub source: CacheSource,
  /// Set when the API failed and local data was used instead
  pub warning: Option<String>,
}

impl<T> CacheResult<T> {
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      warning: None,
    }
  }

  pub fn offline(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Offline,
      warning: None,
    }
  }

  pub fn fallback(data: T, warning: String) -> Self {
    Self {
      data,
      source: CacheSource::Fallback,
      warning: Some(warning),
    }
  }
}

/// Indicates where returned data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Confirmed by the API
  Network,
  /// Offline mode, local data only
  Offline,
  /// The API failed, local data served instead
  Fallback,
}

/// Outcome of one `sync_pending_changes` run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
  /// Ids now confirmed by the API (server ids for newly created palettes)
  pub synced: Vec<String>,
  /// Ids still pending, retried on the next sync
  pub failed: Vec<String>,
  /// Pending ids with no stored copy, left pending
  pub skipped: Vec<String>,
}

#[derive(Debug, Default)]
struct CacheState {
  index: BTreeMap<String, Palette>,
  pending: Vec<String>,
  unsaved: HashSet<String>,
  palettes: Vec<Palette>,
  current: Option<Palette>,
  in_flight: usize,
  error: Option<String>,
  offline: bool,
}

/// Counts a network request as in flight until dropped.
struct InFlight<'a> {
  state: &'a Mutex<CacheState>,
}

impl<'a> InFlight<'a> {
  fn start(state: &'a Mutex<CacheState>) -> Self {
    state
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .in_flight += 1;
    Self { state }
  }
}

impl Drop for InFlight<'_> {
  fn drop(&mut self) {
    let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
    state.in_flight = state.in_flight.saturating_sub(1);
  }
}

/// Palette cache mirrored into a key-value store and synced with the API.
pub struct PaletteCache<S: KvStore, R: PaletteRemote> {
  store: Arc<S>,
  remote: R,
  options: CacheOptions,
  state: Mutex<CacheState>,
}

impl<S: KvStore, R: PaletteRemote> PaletteCache<S, R> {
  /// Create a cache over `store`, loading whatever an earlier session left there.
  pub fn new(store: Arc<S>, remote: R, options: CacheOptions) -> Result<Self> {
    let cache = Self {
      store,
      remote,
      options,
      state: Mutex::new(CacheState::default()),
    };
    cache.hydrate()?;
    Ok(cache)
  }

  fn palette_prefix(&self) -> String {
    format!("{}palette:", self.options.key_prefix)
  }

  fn palette_key(&self, id: &str) -> String {
    format!("{}{}", self.palette_prefix(), id)
  }

  fn pending_key(&self) -> String {
    format!("{}pending", self.options.key_prefix)
  }

  fn state(&self) -> Result<MutexGuard<'_, CacheState>> {
    self
      .state
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  /// Read-only view of the state, usable even after a panic elsewhere.
  fn snapshot<T>(&self, f: impl FnOnce(&CacheState) -> T) -> T {
    f(&self.state.lock().unwrap_or_else(PoisonError::into_inner))
  }

  fn hydrate(&self) -> Result<()> {
    let prefix = self.palette_prefix();
    let mut state = self.state()?;
    state.offline = self.options.offline;

    for key in self.store.keys_with_prefix(&prefix)? {
      let id = &key[prefix.len()..];
      let stored = match self.store.get(&key) {
        Ok(Some(value)) => value,
        Ok(None) => continue,
        Err(e) => {
          warn!(%key, error = %e, "Skipping unreadable cache entry");
          continue;
        }
      };

      let Some(mut palette) = decode_palette(&stored, Some(id)) else {
        warn!(%key, "Skipping malformed cache entry");
        continue;
      };
      palette.id = id.to_string();

      // Rewrite sanitized entries so the store matches the index
      let canonical = to_json(&palette)?;
      if canonical != stored {
        debug!(%key, "Rewriting cache entry in canonical form");
        self.store.set(&key, &canonical)?;
      }
      state.index.insert(palette.id.clone(), palette);
    }

    state.pending = match self.store.get(&self.pending_key()) {
      Ok(Some(value)) => serde_json::from_value::<Vec<String>>(value).unwrap_or_else(|e| {
        warn!(error = %e, "Pending list is malformed, starting empty");
        Vec::new()
      }),
      Ok(None) => Vec::new(),
      Err(e) => {
        warn!(error = %e, "Pending list is unreadable, starting empty");
        Vec::new()
      }
    };
    let mut seen = HashSet::new();
    state.pending.retain(|id| seen.insert(id.clone()));

    info!(
      palettes = state.index.len(),
      pending = state.pending.len(),
      "Loaded palette cache"
    );
    Ok(())
  }

  /// Store `palette` in both the key-value store and the index.
  fn write_through(&self, state: &mut CacheState, palette: Palette) -> Result<()> {
    self
      .store
      .set(&self.palette_key(&palette.id), &to_json(&palette)?)?;

    if state.current.as_ref().is_some_and(|c| c.id == palette.id) {
      state.current = Some(palette.clone());
    }
    for listed in state.palettes.iter_mut().filter(|p| p.id == palette.id) {
      *listed = palette.clone();
    }
    state.index.insert(palette.id.clone(), palette);
    Ok(())
  }

  /// Cache a record fetched from the API, unless a local edit is still pending.
  fn absorb_remote(&self, state: &mut CacheState, palette: Palette) -> Result<Palette> {
    if state.pending.contains(&palette.id) {
      if let Some(local) = state.index.get(&palette.id) {
        debug!(id = %palette.id, "Keeping pending local copy over fetched palette");
        return Ok(local.clone());
      }
    }
    self.write_through(state, palette.clone())?;
    Ok(palette)
  }

  fn persist_pending(&self, state: &CacheState) -> Result<()> {
    self
      .store
      .set(&self.pending_key(), &Value::from(state.pending.clone()))
  }

  fn mark_pending(&self, state: &mut CacheState, id: &str) -> Result<()> {
    if !state.pending.iter().any(|p| p == id) {
      state.pending.push(id.to_string());
      debug!(id, pending = state.pending.len(), "Marked palette pending");
    }
    self.persist_pending(state)
  }

  fn clear_pending(&self, state: &mut CacheState, id: &str) -> Result<()> {
    let before = state.pending.len();
    state.pending.retain(|p| p != id);
    if state.pending.len() != before {
      self.persist_pending(state)?;
    }
    Ok(())
  }

  /// Send `palette` to the API: POST for never-synced ids, PUT otherwise.
  async fn push(&self, palette: &Palette) -> Result<Palette> {
    let body = to_json(palette)?;
    let local = is_local_id(&palette.id);
    let (method, path) = if local {
      (Method::POST, "palettes".to_string())
    } else {
      (Method::PUT, format!("palettes/{}", palette.id))
    };

    let _request = InFlight::start(&self.state);
    let value = self.remote.request(method, &path, Some(&body)).await?;

    if value.is_null() && !local {
      return Ok(palette.clone());
    }
    let fallback_id = if local { None } else { Some(palette.id.as_str()) };
    decode_palette(&value, fallback_id)
      .ok_or_else(|| eyre!("API returned an unreadable palette for {}", palette.id))
  }

  /// Replace the local record for `id` with the API's version.
  fn confirm(&self, state: &mut CacheState, id: &str, confirmed: Palette) -> Result<Palette> {
    if confirmed.id != id {
      info!(local_id = id, id = %confirmed.id, "Palette assigned server id");
      self.store.remove(&self.palette_key(id))?;
      state.index.remove(id);
      if state.current.as_ref().is_some_and(|c| c.id == id) {
        state.current = Some(confirmed.clone());
      }
      for listed in state.palettes.iter_mut().filter(|p| p.id == id) {
        *listed = confirmed.clone();
      }
    }

    self.write_through(state, confirmed.clone())?;
    self.clear_pending(state, id)?;
    state.unsaved.remove(id);
    Ok(confirmed)
  }

  /// Write `palette` locally, then push it unless offline.
  async fn save(&self, palette: Palette) -> Result<CacheResult<Palette>> {
    let id = palette.id.clone();
    {
      let mut state = self.state()?;
      self.write_through(&mut state, palette.clone())?;
      state.current = Some(palette.clone());
      state.unsaved.insert(id.clone());

      if state.offline {
        self.mark_pending(&mut state, &id)?;
        // Durable in the store, nothing left for the UI to flag
        state.unsaved.remove(&id);
        info!(%id, "Saved palette offline");
        return Ok(CacheResult::offline(palette));
      }
    }

    let pushed = self.push(&palette).await;

    let mut state = self.state()?;
    match pushed {
      Ok(confirmed) => {
        let confirmed = self.confirm(&mut state, &id, confirmed)?;
        state.error = None;
        Ok(CacheResult::from_network(confirmed))
      }
      Err(e) => {
        warn!(%id, error = %e, "Failed to save palette to API, keeping it pending");
        self.mark_pending(&mut state, &id)?;
        let message = format!("Saved locally, will retry: {}", e);
        state.error = Some(message.clone());
        Ok(CacheResult::fallback(palette, message))
      }
    }
  }

  /// Get a palette by id. `None` means neither the cache nor the API has it.
  pub async fn get(&self, id: &str) -> Result<Option<Palette>> {
    {
      let mut state = self.state()?;
      if let Some(palette) = state.index.get(id).cloned() {
        debug!(id, "Palette cache hit");
        state.current = Some(palette.clone());
        return Ok(Some(palette));
      }
      if state.offline {
        debug!(id, "Palette not cached while offline");
        state.current = None;
        return Ok(None);
      }
    }

    let path = format!("palettes/{}", id);
    let fetched = {
      let _request = InFlight::start(&self.state);
      self.remote.request(Method::GET, &path, None).await
    };

    let mut state = self.state()?;
    let found = match fetched {
      Ok(value) => match decode_palette(&value, Some(id)) {
        Some(palette) if palette.id != id => {
          warn!(id, returned = %palette.id, "API returned a different palette, ignoring it");
          None
        }
        Some(palette) => {
          state.error = None;
          Some(self.absorb_remote(&mut state, palette)?)
        }
        None => {
          warn!(id, "API returned an unreadable palette");
          None
        }
      },
      Err(e) => {
        warn!(id, error = %e, "Failed to fetch palette");
        state.error = Some(format!("Failed to load palette {}: {}", id, e));
        // Another operation may have cached it meanwhile
        state.index.get(id).cloned()
      }
    };

    state.current = found.clone();
    Ok(found)
  }

  /// Cached palette, without touching the API.
  pub fn get_cached(&self, id: &str) -> Option<Palette> {
    self.snapshot(|state| state.index.get(id).cloned())
  }

  /// List all palettes.
  pub async fn list(&self) -> Result<CacheResult<Vec<Palette>>> {
    self.load_list(None).await
  }

  /// List the palettes of one image.
  pub async fn list_by_image(&self, image_id: &str) -> Result<CacheResult<Vec<Palette>>> {
    self.load_list(Some(image_id)).await
  }

  async fn load_list(&self, image_id: Option<&str>) -> Result<CacheResult<Vec<Palette>>> {
    if self.is_offline() {
      return Ok(CacheResult::offline(self.cached_list(image_id)?));
    }

    let path = match image_id {
      Some(image_id) => format!("images/{}/palettes", image_id),
      None => "palettes".to_string(),
    };
    let fetched = {
      let _request = InFlight::start(&self.state);
      self.remote.request(Method::GET, &path, None).await
    };

    let records = match fetched {
      Ok(value) => decode_palette_list(value).ok_or_else(|| "unexpected list response".to_string()),
      Err(e) => Err(e.to_string()),
    };

    match records {
      Ok(records) => {
        let mut state = self.state()?;
        let mut palettes = Vec::with_capacity(records.len());
        for record in &records {
          let Some(mut palette) = decode_palette(record, None) else {
            warn!(%path, "Skipping listed palette without an id");
            continue;
          };
          if palette.image_id.is_empty() {
            if let Some(image_id) = image_id {
              palette.image_id = image_id.to_string();
            }
          }
          palettes.push(self.absorb_remote(&mut state, palette)?);
        }

        debug!(%path, count = palettes.len(), "Listed palettes from API");
        state.palettes = palettes.clone();
        state.error = None;
        Ok(CacheResult::from_network(palettes))
      }
      Err(reason) => {
        warn!(%path, %reason, "Failed to list palettes, serving cache");
        let message = format!("Failed to load palettes: {}", reason);
        let palettes = self.cached_list(image_id)?;
        self.state()?.error = Some(message.clone());
        Ok(CacheResult::fallback(palettes, message))
      }
    }
  }

  /// Cached palettes, newest first.
  fn cached_list(&self, image_id: Option<&str>) -> Result<Vec<Palette>> {
    let mut state = self.state()?;
    let filter = image_id.filter(|_| self.options.filter_by_image);

    let mut palettes: Vec<Palette> = state
      .index
      .values()
      .filter(|p| filter.map_or(true, |image_id| p.image_id == image_id))
      .cloned()
      .collect();
    palettes.sort_by(|a, b| {
      b.updated_at
        .cmp(&a.updated_at)
        .then_with(|| a.id.cmp(&b.id))
    });

    state.palettes = palettes.clone();
    Ok(palettes)
  }

  /// Merge `fields` over the known palette (or an empty one) and save it.
  ///
  /// The merged palette is always stored locally first. API failures are
  /// reported through `warning` and the `error` state, never as `Err`.
  pub async fn update(&self, id: &str, fields: PaletteUpdate) -> Result<CacheResult<Palette>> {
    let mut palette = self
      .state()?
      .index
      .get(id)
      .cloned()
      .unwrap_or_else(|| Palette::shell(id));
    palette.apply(fields);
    palette.updated_at = now();

    self.save(palette).await
  }

  /// Create a palette. Without the API it gets a local id and stays pending.
  pub async fn create(&self, draft: NewPalette) -> Result<CacheResult<Palette>> {
    let created_at = now();
    let id = {
      let state = self.state()?;
      local_id(&state.index)
    };

    let mut palette = Palette {
      id,
      name: draft.name,
      description: draft.description,
      image_id: draft.image_id,
      image_url: None,
      colors: Vec::new(),
      created_at: created_at.clone(),
      updated_at: created_at,
    };
    palette.set_colors(draft.colors);

    self.save(palette).await
  }

  /// Push every pending palette. Failures stay pending for the next run.
  pub async fn sync_pending_changes(&self) -> Result<SyncReport> {
    let pending = {
      let state = self.state()?;
      if state.offline || state.pending.is_empty() {
        return Ok(SyncReport::default());
      }
      state.pending.clone()
    };

    info!(count = pending.len(), "Syncing pending palettes");
    let mut report = SyncReport::default();

    for id in pending {
      let stored = match self.store.get(&self.palette_key(&id)) {
        Ok(Some(value)) => decode_palette(&value, Some(&id)).or_else(|| self.get_cached(&id)),
        Ok(None) => None,
        Err(e) => {
          warn!(%id, error = %e, "Pending palette is unreadable, using cached copy");
          self.get_cached(&id)
        }
      };

      let Some(mut palette) = stored else {
        warn!(%id, "Pending palette has no stored copy, skipping");
        report.skipped.push(id);
        continue;
      };
      palette.id = id.clone();

      let pushed = self.push(&palette).await;

      let mut state = self.state()?;
      match pushed {
        Ok(confirmed) => {
          let confirmed = self.confirm(&mut state, &id, confirmed)?;
          debug!(%id, "Synced pending palette");
          report.synced.push(confirmed.id);
        }
        Err(e) => {
          warn!(%id, error = %e, "Failed to sync palette, will retry");
          report.failed.push(id);
        }
      }
    }

    let mut state = self.state()?;
    state.error = if report.failed.is_empty() {
      None
    } else {
      Some(format!(
        "{} palette(s) could not be synced, will retry",
        report.failed.len()
      ))
    };

    info!(
      synced = report.synced.len(),
      failed = report.failed.len(),
      skipped = report.skipped.len(),
      "Palette sync finished"
    );
    Ok(report)
  }

  /// Wipe every local palette, the pending list and the unsaved flags.
  /// The API is not touched.
  pub fn clear_local_data(&self) -> Result<()> {
    let mut state = self.state()?;
    self.store.clear_prefix(&self.options.key_prefix)?;

    let offline = state.offline;
    *state = CacheState {
      offline,
      ..CacheState::default()
    };

    info!("Cleared local palette data");
    Ok(())
  }

  pub fn set_offline_mode(&self, offline: bool) {
    let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
    if state.offline != offline {
      info!(offline, "Offline mode changed");
    }
    state.offline = offline;
  }

  pub fn is_offline(&self) -> bool {
    self.snapshot(|state| state.offline)
  }

  /// Flag `id` as edited in the UI but not yet saved.
  pub fn mark_unsaved(&self, id: &str) {
    self
      .state
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .unsaved
      .insert(id.to_string());
  }

  pub fn has_unsaved_changes(&self, id: &str) -> bool {
    self.snapshot(|state| state.unsaved.contains(id))
  }

  pub fn has_pending_changes(&self) -> bool {
    self.snapshot(|state| !state.pending.is_empty())
  }

  pub fn pending_ids(&self) -> Vec<String> {
    self.snapshot(|state| state.pending.clone())
  }

  /// Palettes from the most recent listing.
  pub fn palettes(&self) -> Vec<Palette> {
    self.snapshot(|state| state.palettes.clone())
  }

  /// Palette from the most recent `get`, `update` or `create`.
  pub fn current_palette(&self) -> Option<Palette> {
    self.snapshot(|state| state.current.clone())
  }

  pub fn is_loading(&self) -> bool {
    self.snapshot(|state| state.in_flight > 0)
  }

  /// Message from the most recent failed API interaction.
  pub fn error(&self) -> Option<String> {
    self.snapshot(|state| state.error.clone())
  }

  /// Export projection of a cached palette.
  pub fn export(&self, id: &str) -> Option<Vec<ExportedColor>> {
    self.get_cached(id).map(|palette| export_palette(&palette))
  }
}

fn to_json(palette: &Palette) -> Result<Value> {
  serde_json::to_value(palette)
    .map_err(|e| eyre!("Failed to serialize palette {}: {}", palette.id, e))
}

fn now() -> String {
  Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Time-based id not yet present in `index`.
fn local_id(index: &BTreeMap<String, Palette>) -> String {
  let mut stamp = Utc::now()
    .timestamp_nanos_opt()
    .unwrap_or_else(|| Utc::now().timestamp_micros() * 1000);
  loop {
    let id = format!("{}{}", LOCAL_ID_PREFIX, stamp);
    if !index.contains_key(&id) {
      return id;
    }
    stamp += 1;
  }
}
