use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::Deserialize;
use uuid::Uuid;

/// A single observed change to a file.
///
/// Two events refer to the same change target when their `path`s are equal;
/// `hash` (when present) decides whether the content actually changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    /// Absolute path of the changed file.
    pub path: PathBuf,
    /// Content hash, if one was computed.
    pub hash: Option<String>,
}

impl ChangeEvent {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            hash: None,
        }
    }

    pub fn with_hash(path: impl Into<PathBuf>, hash: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            hash: Some(hash.into()),
        }
    }
}

/// Merge `incoming` into `pending`, keeping only the most recent event per path.
///
/// A path that is seen again moves to the position of its latest occurrence.
pub fn merge_changes(pending: &mut Vec<ChangeEvent>, incoming: impl IntoIterator<Item = ChangeEvent>) {
    let before = pending.len();
    pending.extend(incoming);
    if pending.len() == before {
        return;
    }
    *pending = deduplicate_changes(std::mem::take(pending));
}

/// Collapse a burst of events so that exactly one event per path survives,
/// carrying the data of the last event recorded for that path.
pub fn deduplicate_changes(events: Vec<ChangeEvent>) -> Vec<ChangeEvent> {
    let mut seen: HashSet<PathBuf> = HashSet::with_capacity(events.len());
    let mut out: Vec<ChangeEvent> = events
        .into_iter()
        .rev()
        .filter(|event| seen.insert(event.path.clone()))
        .collect();
    out.reverse();
    out
}

/// Short random id used to label task invocations in logs and process output.
pub fn generate_short_id() -> String {
    let id = Uuid::new_v4().simple().to_string();
    id[..8].to_string()
}

/// Which filesystem watcher implementation to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendChoice {
    /// Native recursive watcher when the platform has one, polling otherwise.
    #[default]
    Auto,
    Native,
    Poll,
}

impl FromStr for BackendChoice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(BackendChoice::Auto),
            "native" => Ok(BackendChoice::Native),
            "poll" | "polling" => Ok(BackendChoice::Poll),
            other => Err(format!(
                "invalid backend: {other} (expected \"auto\", \"native\" or \"poll\")"
            )),
        }
    }
}

impl fmt::Display for BackendChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendChoice::Auto => f.write_str("auto"),
            BackendChoice::Native => f.write_str("native"),
            BackendChoice::Poll => f.write_str("poll"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths(events: &[ChangeEvent]) -> Vec<&str> {
        events.iter().map(|e| e.path.to_str().unwrap_or_default()).collect()
    }

    #[test]
    fn merge_moves_repeated_paths_to_their_latest_position() {
        let mut pending = vec![ChangeEvent::new("a"), ChangeEvent::new("b")];
        merge_changes(
            &mut pending,
            [ChangeEvent::new("c"), ChangeEvent::with_hash("a", "h2")],
        );
        assert_eq!(paths(&pending), ["b", "c", "a"]);
        assert_eq!(pending[2].hash.as_deref(), Some("h2"));

        merge_changes(&mut pending, Vec::<ChangeEvent>::new());
        assert_eq!(paths(&pending), ["b", "c", "a"]);
    }

    #[test]
    fn merge_handles_large_overlapping_batches() {
        let mut pending: Vec<ChangeEvent> =
            (0..20_000).map(|i| ChangeEvent::new(format!("f{i}"))).collect();
        let incoming = (10_000..30_000).map(|i| ChangeEvent::new(format!("f{i}")));

        merge_changes(&mut pending, incoming);

        assert_eq!(pending.len(), 30_000);
        assert_eq!(pending[9_999].path, PathBuf::from("f9999"));
        assert_eq!(pending[10_000].path, PathBuf::from("f10000"));
        assert_eq!(pending[29_999].path, PathBuf::from("f29999"));
    }
}
