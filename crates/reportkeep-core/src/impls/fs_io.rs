//! ファイル書き込みの共通処理

use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs;

use crate::domain::StoreError;

/// temp ファイルに書いてから rename する
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    if let Err(e) = fs::write(&tmp, bytes).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(StoreError::from_io(&path.display().to_string(), e));
    }
    fs::rename(&tmp, path)
        .await
        .map_err(|e| StoreError::from_io(&path.display().to_string(), e))
}

/// NotFound は成功扱い
pub(crate) async fn remove_if_present(path: &Path) -> Result<(), StoreError> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == IoErrorKind::NotFound => Ok(()),
        Err(e) => Err(StoreError::from_io(&path.display().to_string(), e)),
    }
}
