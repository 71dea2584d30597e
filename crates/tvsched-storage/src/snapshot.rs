use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::StoreError;

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Reads a JSON snapshot, or the default value when the file does not exist yet.
pub async fn read_json_or_default<T>(path: &Path) -> Result<T, StoreError>
where
    T: DeserializeOwned + Default,
{
    match fs::read(path).await {
        Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| StoreError::Serde {
            path: path.to_path_buf(),
            source,
        }),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
        Err(err) => Err(io_error(path)(err)),
    }
}

/// Writes a JSON snapshot through a temp file and an atomic rename.
pub async fn write_json_atomic<T>(path: &Path, value: &T) -> Result<(), StoreError>
where
    T: Serialize + ?Sized,
{
    let bytes = serde_json::to_vec_pretty(value).map_err(|source| StoreError::Serde {
        path: path.to_path_buf(),
        source,
    })?;

    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => Path::new(".").to_path_buf(),
    };
    fs::create_dir_all(&parent).await.map_err(io_error(&parent))?;

    let temp_path = parent.join(format!(".{}.{}.tmp", Uuid::new_v4(), bytes.len()));
    let mut file = fs::OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(&temp_path)
        .await
        .map_err(io_error(&temp_path))?;
    let written = async {
        file.write_all(&bytes).await?;
        file.flush().await?;
        file.sync_all().await
    }
    .await;
    drop(file);
    if let Err(err) = written {
        let _ = fs::remove_file(&temp_path).await;
        return Err(io_error(&temp_path)(err));
    }

    if let Err(err) = fs::rename(&temp_path, path).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(io_error(path)(err));
    }
    Ok(())
}
