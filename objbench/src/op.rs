use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use strum::Display;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Display, Deserialize, Serialize)]
pub enum OpKind {
  #[serde(rename = "PUT")]
  #[strum(serialize = "PUT")]
  Write,
  #[serde(rename = "GET")]
  #[strum(serialize = "GET")]
  Read,
}

/// Outcome of one storage call. A failed operation may still carry the size and timings gathered before it failed.
#[derive(Clone, PartialEq, Eq, Debug, Deserialize, Serialize)]
pub struct Operation {
  pub kind: OpKind,
  pub worker: u16,
  /// Declared size of the object involved, not necessarily what was transferred.
  pub size: u64,
  pub object: String,
  pub objects_per_op: u32,
  pub start: DateTime<Utc>,
  pub end: DateTime<Utc>,
  /// Only set for reads that received at least one byte.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub first_byte: Option<DateTime<Utc>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub error: Option<String>,
}

impl Operation {
  /// A single-object operation starting at `start`; `end` is provisionally `start` until the caller stamps it.
  pub fn new(kind: OpKind, worker: u16, size: u64, object: String, start: DateTime<Utc>) -> Self {
    Self {
      kind,
      worker,
      size,
      object,
      objects_per_op: 1,
      start,
      end: start,
      first_byte: None,
      error: None,
    }
  }

  pub fn is_err(&self) -> bool {
    self.error.is_some()
  }
}
