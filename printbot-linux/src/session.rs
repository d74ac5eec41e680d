//! Session snapshot file: read at startup, written after friend changes and on shutdown.

use std::path::Path;

use anyhow::Context;
use printbot_core::{Keypair, SessionState};
use tracing::info;

/// Read the snapshot at `path`, or start a new identity if there is none.
pub fn load_or_create(path: &Path, name: &str) -> anyhow::Result<SessionState> {
    match std::fs::read(path) {
        Ok(bytes) => {
            let state = SessionState::from_bytes(&bytes)
                .with_context(|| format!("loading session snapshot {}", path.display()))?;
            info!(path = %path.display(), friends = state.friends.len(), "restored session");
            Ok(state)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!(path = %path.display(), "no session snapshot, generating a new identity");
            Ok(SessionState::new(&Keypair::generate(), name))
        }
        Err(e) => Err(e).with_context(|| format!("reading {}", path.display())),
    }
}

/// Write the snapshot next to `path` and rename it into place, so a crash mid-write
/// never leaves a truncated file behind.
pub fn save(path: &Path, state: &SessionState) -> anyhow::Result<()> {
    let bytes = state.to_bytes()?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    std::fs::write(&tmp, bytes).with_context(|| format!("writing {}", Path::new(&tmp).display()))?;
    std::fs::rename(&tmp, path).with_context(|| format!("replacing {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_creates_identity() {
        let dir = tempfile::tempdir().unwrap();
        let state = load_or_create(&dir.path().join("printbot.data"), "PrintBot").unwrap();
        assert_eq!(state.name, "PrintBot");
        assert!(state.friends.is_empty());
    }

    #[test]
    fn saved_state_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("printbot.data");
        let mut state = SessionState::new(&Keypair::generate(), "PrintBot");
        state.add_friend(Keypair::generate().public_key().clone());
        save(&path, &state).unwrap();
        save(&path, &state).unwrap();

        let back = load_or_create(&path, "ignored").unwrap();
        assert_eq!(back.friends, state.friends);
        assert_eq!(back.keypair().public_key(), state.keypair().public_key());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("printbot.data");
        std::fs::write(&path, b"\x07garbage").unwrap();
        assert!(load_or_create(&path, "PrintBot").is_err());
    }
}
