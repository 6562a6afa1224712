use crate::error::{
    Error,
    Result,
};
use async_std::{
    fs,
    io::ErrorKind,
    path::Path as AsyncPath,
};
use std::path::{
    Path,
    PathBuf,
};

/// Remembers the last connected account between runs. Only ever a hint,
/// the wallet's live account list always wins.
#[derive(Clone, Debug)]
pub struct AccountCache {
    path: PathBuf,
}

impl AccountCache {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// `<config dir>/ballot/last-account`
    pub fn open_default() -> Result<Self> {
        let root = dirs::config_dir().ok_or(Error::ConfigDirNotFound)?;
        Ok(Self::new(root.join("ballot").join("last-account")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn file(&self) -> &AsyncPath {
        AsyncPath::new(self.path.as_os_str())
    }

    pub async fn load(&self) -> Result<Option<String>> {
        match fs::read_to_string(self.file()).await {
            Ok(contents) => {
                let account = contents.trim();
                if account.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(account.to_string()))
                }
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn store(&self, account: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(AsyncPath::new(parent.as_os_str())).await?;
        }
        fs::write(self.file(), account).await?;
        Ok(())
    }

    pub async fn clear(&self) -> Result<()> {
        match fs::remove_file(self.file()).await {
            Err(err) if err.kind() != ErrorKind::NotFound => Err(err.into()),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempdir::TempDir;

    #[async_std::test]
    async fn store_load_clear() {
        let tmp = TempDir::new("ballot-cache-").unwrap();
        let cache = AccountCache::new(tmp.path().join("nested").join("last"));
        assert_eq!(cache.load().await.unwrap(), None);
        cache.clear().await.unwrap();

        let account = "0xf39fd6e51aad88f6f4ce6ab8827279cfffb92266";
        cache.store(account).await.unwrap();
        assert_eq!(cache.load().await.unwrap().as_deref(), Some(account));

        cache.clear().await.unwrap();
        assert_eq!(cache.load().await.unwrap(), None);
    }

    #[test]
    fn default_location() {
        if let Ok(cache) = AccountCache::open_default() {
            assert!(cache.path().ends_with("ballot/last-account"));
        }
    }
}
