//! Scripted remote for exercising the cache without a server.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use color_eyre::{eyre::eyre, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use reqwest::Method;
use serde_json::Value;

use super::client::PaletteRemote;

enum Reply {
  Json(Value),
  Echo,
  Fail(String),
}

/// Replays queued replies per `METHOD path` and records every call.
/// Calls with nothing queued fail as if the API were unreachable.
#[derive(Default)]
pub struct ScriptedRemote {
  replies: Mutex<HashMap<String, VecDeque<Reply>>>,
  calls: Mutex<Vec<(String, Option<Value>)>>,
}

impl ScriptedRemote {
  pub fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }

  fn push(&self, method: Method, path: &str, reply: Reply) {
    self
      .replies
      .lock()
      .unwrap()
      .entry(format!("{} {}", method, path))
      .or_default()
      .push_back(reply);
  }

  pub fn respond(&self, method: Method, path: &str, value: Value) {
    self.push(method, path, Reply::Json(value));
  }

  /// Reply with the request body, like an API that accepts writes as-is.
  pub fn echo(&self, method: Method, path: &str) {
    self.push(method, path, Reply::Echo);
  }

  pub fn fail(&self, method: Method, path: &str, message: &str) {
    self.push(method, path, Reply::Fail(message.to_string()));
  }

  /// `METHOD path` of every call so far.
  pub fn calls(&self) -> Vec<String> {
    self
      .calls
      .lock()
      .unwrap()
      .iter()
      .map(|(call, _)| call.clone())
      .collect()
  }

  /// Body sent with the most recent call to `METHOD path`.
  pub fn last_body(&self, method: Method, path: &str) -> Option<Value> {
    let key = format!("{} {}", method, path);
    self
      .calls
      .lock()
      .unwrap()
      .iter()
      .rev()
      .find(|(call, _)| *call == key)
      .and_then(|(_, body)| body.clone())
  }
}

impl PaletteRemote for ScriptedRemote {
  fn request<'a>(
    &'a self,
    method: Method,
    path: &'a str,
    body: Option<&'a Value>,
  ) -> BoxFuture<'a, Result<Value>> {
    let key = format!("{} {}", method, path);
    self
      .calls
      .lock()
      .unwrap()
      .push((key.clone(), body.cloned()));
    let reply = self
      .replies
      .lock()
      .unwrap()
      .get_mut(&key)
      .and_then(VecDeque::pop_front);

    async move {
      match reply {
        Some(Reply::Json(value)) => Ok(value),
        Some(Reply::Echo) => Ok(body.cloned().unwrap_or(Value::Null)),
        Some(Reply::Fail(message)) => Err(eyre!("{}", message)),
        None => Err(eyre!("Failed to reach API for {}", key)),
      }
    }
    .boxed()
  }
}
