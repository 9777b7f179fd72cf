use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{TimeZone, Utc};
use replytree::models::{Author, Message, MessageId};
use replytree::store::inmem::InMemStore;
use replytree::{ThreadNode, ThreadView, ViewConfig};
use tracing::{info, warn, Level};
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Load .env automatically only in debug builds.
    if cfg!(debug_assertions) {
        let _ = dotenv::dotenv();
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    let config = ViewConfig::from_env();
    info!(?config, "replytree demo");

    let seed = match std::env::args().nth(1) {
        Some(path) => load_seed(Path::new(&path))?,
        None => sample_thread(),
    };
    let thread_id = seed.first().map(|m| m.thread_id).unwrap_or(1);
    let store = InMemStore::new();
    store.open_thread(thread_id);
    store.seed(seed);

    let view = ThreadView::open(thread_id, Arc::new(store), Author::new("demo", "Demo"), config).await?;
    for anomaly in view.anomalies().iter() {
        warn!(?anomaly, "malformed input");
    }

    let text = std::env::var("REPLYTREE_DEMO_POST").unwrap_or_else(|_| "hello".to_string());
    match view.submit(None, text).await {
        Ok(attempt) => info!(state = ?attempt.state(), "demo post settled"),
        Err(e) => warn!("demo post rejected: {e}"),
    }

    print!("{}", outline(&view.get_tree()));
    Ok(())
}

/// Reads a JSON array of stored messages.
fn load_seed(path: &Path) -> Result<Vec<Message>> {
    let bytes = std::fs::read(path).with_context(|| format!("reading seed file '{}'", path.display()))?;
    serde_json::from_slice(&bytes).with_context(|| format!("parsing seed file '{}'", path.display()))
}

fn sample_thread() -> Vec<Message> {
    let msg = |id, parent, at, text: &str| Message {
        id: MessageId::Stored(id),
        thread_id: 1,
        parent_id: parent,
        author_id: "seed".into(),
        author_name: "Seed".into(),
        author_avatar_ref: None,
        text: text.into(),
        created_at: Utc.timestamp_opt(at, 0).single(),
        attachments: vec![],
    };
    vec![msg(1, None, 10, "root"), msg(2, Some(1), 20, "reply"), msg(3, Some(99), 5, "orphan")]
}

fn outline(roots: &[ThreadNode]) -> String {
    let mut out = String::new();
    let mut stack: Vec<(&ThreadNode, usize)> = roots.iter().rev().map(|n| (n, 0)).collect();
    while let Some((node, depth)) = stack.pop() {
        let m = &node.message;
        out.push_str(&format!("{}[{}] {}: {}\n", "  ".repeat(depth), m.id, m.author_name, m.text));
        stack.extend(node.children.iter().rev().map(|c| (c, depth + 1)));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn seed_file_round_trips_through_loader() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(serde_json::to_string(&sample_thread()).unwrap().as_bytes()).unwrap();
        let loaded = load_seed(file.path()).unwrap();
        assert_eq!(loaded, sample_thread());
    }

    #[test]
    fn bad_seed_file_names_the_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"not json").unwrap();
        let err = load_seed(file.path()).unwrap_err();
        assert!(err.to_string().contains("parsing seed file"));
    }

    #[test]
    fn outline_indents_replies() {
        let text = outline(&replytree::build(&sample_thread()));
        assert_eq!(text, "[3] Seed: orphan\n[1] Seed: root\n  [2] Seed: reply\n");
    }
}
