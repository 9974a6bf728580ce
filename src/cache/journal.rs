//! Append-only journal of `CLEAN`/`DIRTY`/`REMOVE`/`READ` operations keyed
//! by cache fingerprint, replayed on open to rebuild the in-memory index.
//! A crash leaves at most a trailing `DIRTY` with no matching `CLEAN`,
//! which replay discards.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex as AsyncMutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JournalOp {
    Clean,
    Dirty,
    Remove,
    Read,
}

impl JournalOp {
    fn as_str(self) -> &'static str {
        match self {
            JournalOp::Clean => "CLEAN",
            JournalOp::Dirty => "DIRTY",
            JournalOp::Remove => "REMOVE",
            JournalOp::Read => "READ",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "CLEAN" => Some(JournalOp::Clean),
            "DIRTY" => Some(JournalOp::Dirty),
            "REMOVE" => Some(JournalOp::Remove),
            "READ" => Some(JournalOp::Read),
            _ => None,
        }
    }
}

pub struct Journal {
    path: PathBuf,
    file: AsyncMutex<tokio::fs::File>,
    op_count: AtomicUsize,
}

impl Journal {
    /// Opens (creating if absent) the journal at `path`, replays it, and
    /// returns the journal plus the set of keys whose last recorded state
    /// was `CLEAN` (i.e. have a complete, usable cache entry on disk).
    pub async fn open(path: PathBuf) -> std::io::Result<(Self, HashSet<String>)> {
        let mut clean = HashSet::new();
        let mut op_count = 0usize;
        if let Ok(contents) = tokio::fs::read_to_string(&path).await {
            for line in contents.lines() {
                op_count += 1;
                let mut parts = line.splitn(2, ' ');
                let Some(op) = parts.next().and_then(JournalOp::parse) else { continue };
                let Some(key) = parts.next() else { continue };
                match op {
                    JournalOp::Clean => {
                        clean.insert(key.to_owned());
                    }
                    JournalOp::Dirty | JournalOp::Remove => {
                        clean.remove(key);
                    }
                    JournalOp::Read => {}
                }
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(&path).await?;
        Ok((Journal { path, file: AsyncMutex::new(file), op_count: AtomicUsize::new(op_count) }, clean))
    }

    pub async fn append(&self, op: JournalOp, key: &str) -> std::io::Result<()> {
        let mut file = self.file.lock().await;
        file.write_all(format!("{} {key}\n", op.as_str()).as_bytes()).await?;
        file.flush().await?;
        self.op_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Whether the journal has accumulated enough redundant entries
    /// (superseded DIRTY/REMOVE lines for keys long gone) to be worth
    /// compacting.
    pub fn is_redundant(&self, live_entry_count: usize) -> bool {
        let ops = self.op_count.load(Ordering::SeqCst);
        ops > 2_000 && ops > live_entry_count.saturating_mul(2)
    }

    /// Replaces the journal with one `CLEAN` line per currently-live key,
    /// committed via fsync-then-rename so a crash mid-rewrite leaves the old
    /// journal intact.
    pub async fn rewrite(&self, live_keys: &[String]) -> std::io::Result<()> {
        let tmp_path = tmp_path_for(&self.path);
        let mut tmp = tokio::fs::File::create(&tmp_path).await?;
        for key in live_keys {
            tmp.write_all(format!("{} {key}\n", JournalOp::Clean.as_str()).as_bytes()).await?;
        }
        tmp.flush().await?;
        tmp.sync_all().await?;
        drop(tmp);
        tokio::fs::rename(&tmp_path, &self.path).await?;

        let mut file = self.file.lock().await;
        *file = OpenOptions::new().append(true).open(&self.path).await?;
        self.op_count.store(live_keys.len(), Ordering::SeqCst);
        Ok(())
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replay_discards_dirty_without_clean() {
        let dir = tempdir();
        let path = dir.join("journal.log");
        tokio::fs::write(&path, b"DIRTY abc\nCLEAN def\nDIRTY ghi\nCLEAN ghi\nREMOVE def\n")
            .await
            .unwrap();
        let (_journal, clean) = Journal::open(path).await.unwrap();
        assert!(!clean.contains("abc"));
        assert!(!clean.contains("def"));
        assert!(clean.contains("ghi"));
    }

    #[tokio::test]
    async fn rewrite_collapses_to_clean_lines_for_live_keys() {
        let dir = tempdir();
        let path = dir.join("journal.log");
        let (journal, _) = Journal::open(path.clone()).await.unwrap();
        journal.append(JournalOp::Dirty, "a").await.unwrap();
        journal.append(JournalOp::Clean, "a").await.unwrap();
        journal.rewrite(&["a".to_owned()]).await.unwrap();
        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(contents, "CLEAN a\n");
    }

    fn tempdir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("vellum-journal-test-{:?}", std::thread::current().id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }
}
