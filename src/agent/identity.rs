//! Worker identity persistence.
//!
//! The name is loaded from a dotenv-style file; on first launch one is
//! synthesized from the current Unix time and written back so restarts
//! reuse it.

use std::path::Path;

use tracing::info;

use crate::error::Result;
use crate::model::{WorkerIdentity, unix_now};

const NAME_KEY: &str = "WORKER_NAME";

/// Load the persisted worker name, or generate and persist a new one.
pub fn load_or_generate(path: &Path, server_address: &str) -> Result<WorkerIdentity> {
    let existing = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e.into()),
    };

    if let Some(name) = parse_name(&existing) {
        info!(worker = %name, "loaded existing worker identity");
        return Ok(WorkerIdentity {
            name,
            server_address: server_address.to_string(),
        });
    }

    let name = format!("worker_{}", unix_now());
    let mut content = existing;
    if !content.is_empty() && !content.ends_with('\n') {
        content.push('\n');
    }
    content.push_str(&format!("{NAME_KEY}={name}\n"));
    std::fs::write(path, content)?;
    info!(worker = %name, path = %path.display(), "generated new worker identity");

    Ok(WorkerIdentity {
        name,
        server_address: server_address.to_string(),
    })
}

fn parse_name(content: &str) -> Option<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.starts_with('#'))
        .find_map(|line| {
            let (key, value) = line.split_once('=')?;
            if key.trim() == NAME_KEY {
                let value = value.trim();
                (!value.is_empty()).then(|| value.to_string())
            } else {
                None
            }
        })
}
