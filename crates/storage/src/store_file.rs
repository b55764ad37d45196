//! JSON file-backed store with atomic writes.

use std::path::PathBuf;

use {
    async_trait::async_trait,
    herald_common::MailerId,
    tokio::fs,
    tracing::{debug, warn},
};

use crate::{
    Error, Result,
    error::Context,
    record::StorageRecord,
    store::MailerStore,
};

/// File-backed store. One `<id>.json` file per mailer inside `dir`.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Create a store under the platform data dir (`.../herald/mailers`).
    pub fn default_path() -> Result<Self> {
        let dirs = directories::ProjectDirs::from("", "", "herald")
            .context("cannot determine data directory")?;
        Ok(Self::new(dirs.data_dir().join("mailers")))
    }

    pub fn dir(&self) -> &PathBuf {
        &self.dir
    }

    fn record_path(&self, id: MailerId) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    /// Atomic write: write to temp, rename over target, keep `.bak`.
    async fn atomic_write(&self, id: MailerId, record: &StorageRecord) -> Result<()> {
        fs::create_dir_all(&self.dir).await?;
        let path = self.record_path(id);
        let json = serde_json::to_string_pretty(record)?;
        let tmp = path.with_extension("json.tmp");

        fs::write(&tmp, json.as_bytes()).await?;

        // Backup existing file.
        if fs::try_exists(&path).await.unwrap_or(false) {
            let bak = path.with_extension("json.bak");
            let _ = fs::rename(&path, &bak).await;
        }

        fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

#[async_trait]
impl MailerStore for FileStore {
    async fn list_ids(&self) -> Result<Vec<MailerId>> {
        if !fs::try_exists(&self.dir).await.unwrap_or(false) {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        let mut entries = fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match stem.parse::<MailerId>() {
                Ok(id) => ids.push(id),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unrecognised file in mailer store");
                },
            }
        }
        ids.sort();
        debug!(count = ids.len(), dir = %self.dir.display(), "listed stored mailers");
        Ok(ids)
    }

    async fn get_record(&self, id: MailerId) -> Result<StorageRecord> {
        let path = self.record_path(id);
        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Err(Error::record_not_found(id));
        }
        let data = fs::read_to_string(&path).await?;
        serde_json::from_str(&data).with_context(|| format!("failed to parse {}", path.display()))
    }

    async fn set_record(&self, id: MailerId, record: &StorageRecord) -> Result<()> {
        self.atomic_write(id, record).await
    }

    async fn delete_record(&self, id: MailerId) -> Result<()> {
        let path = self.record_path(id);
        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Err(Error::record_not_found(id));
        }
        fs::remove_file(&path).await?;
        let bak = path.with_extension("json.bak");
        let _ = fs::remove_file(&bak).await;
        Ok(())
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        herald_common::{ChatSet, ChatState, RecipientId},
        tempfile::TempDir,
    };

    fn make_record() -> StorageRecord {
        StorageRecord {
            chats: ChatSet::from_recipients([RecipientId(1), RecipientId(2)]),
            content: serde_json::json!({ "type": "text", "text": "hi" }),
            settings: Default::default(),
            bot_id: 1,
            context: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_file_store_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let store = FileStore::new(tmp.path());

        store.set_record(MailerId(1), &make_record()).await.unwrap();
        store.set_record(MailerId(2), &make_record()).await.unwrap();

        assert_eq!(
            store.list_ids().await.unwrap(),
            vec![MailerId(1), MailerId(2)]
        );
        assert_eq!(store.get_record(MailerId(1)).await.unwrap(), make_record());
    }

    #[tokio::test]
    async fn test_file_store_backup_created() {
        let tmp = TempDir::new().unwrap();
        let store = FileStore::new(tmp.path());

        store.set_record(MailerId(1), &make_record()).await.unwrap();
        let mut record = make_record();
        record
            .chats
            .transition(RecipientId(1), ChatState::Pending, ChatState::Success)
            .unwrap();
        store.set_record(MailerId(1), &record).await.unwrap();

        assert!(tmp.path().join("1.json.bak").exists());
        // Backups are not listed as mailers.
        assert_eq!(store.list_ids().await.unwrap(), vec![MailerId(1)]);
        assert_eq!(store.get_record(MailerId(1)).await.unwrap(), record);
    }

    #[tokio::test]
    async fn test_file_store_delete() {
        let tmp = TempDir::new().unwrap();
        let store = FileStore::new(tmp.path());

        store.set_record(MailerId(3), &make_record()).await.unwrap();
        store.delete_record(MailerId(3)).await.unwrap();
        assert!(store.list_ids().await.unwrap().is_empty());
        assert!(store.delete_record(MailerId(3)).await.is_err());
    }

    #[tokio::test]
    async fn test_file_store_list_missing_dir() {
        let tmp = TempDir::new().unwrap();
        let store = FileStore::new(tmp.path().join("nope"));
        assert!(store.list_ids().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_file_store_skips_foreign_files() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("notes.json"), "{}").unwrap();
        std::fs::write(tmp.path().join("README"), "x").unwrap();
        let store = FileStore::new(tmp.path());
        store.set_record(MailerId(8), &make_record()).await.unwrap();
        assert_eq!(store.list_ids().await.unwrap(), vec![MailerId(8)]);
    }

    #[tokio::test]
    async fn test_file_store_corrupt_record_is_an_error() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("4.json"), "not json").unwrap();
        let store = FileStore::new(tmp.path());
        let err = store.get_record(MailerId(4)).await.unwrap_err();
        assert!(err.to_string().contains("failed to parse"));
    }
}
