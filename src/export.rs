use serde::Serialize;
use std::path::Path;
use tracing::{debug, info};

use crate::error::{ScrapeKitError, ScrapeKitResult};

fn fs_error(path: &Path, error: std::io::Error) -> ScrapeKitError {
    ScrapeKitError::FileSystem {
        path: path.display().to_string(),
        message: error.to_string(),
    }
}

/// Write a value as pretty-printed JSON, creating parent directories.
/// Returns the number of bytes written.
pub async fn write_json<T: Serialize + ?Sized>(data: &T, output_path: &Path) -> ScrapeKitResult<u64> {
    debug!("Exporting JSON to {}", output_path.display());

    if let Some(parent) = output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| fs_error(parent, e))?;
    }

    let bytes = serde_json::to_vec_pretty(data)?;
    tokio::fs::write(output_path, &bytes)
        .await
        .map_err(|e| fs_error(output_path, e))?;

    info!("JSON export completed: {} bytes to {}", bytes.len(), output_path.display());
    Ok(bytes.len() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_json_export() {
        let data = vec![json!({"name": "John", "age": 30}), json!({"name": "Jane", "age": 25})];
        let temp_dir = TempDir::new().unwrap();
        let output_path = temp_dir.path().join("output").join("output.json");

        let written = write_json(&data, &output_path).await.unwrap();

        let content = tokio::fs::read_to_string(&output_path).await.unwrap();
        assert_eq!(written, content.len() as u64);
        let parsed: Vec<serde_json::Value> = serde_json::from_str(&content).unwrap();
        assert_eq!(parsed, data);
        assert!(content.contains("\n  "));
    }

    #[tokio::test]
    async fn test_export_into_file_path_fails() {
        let temp_dir = TempDir::new().unwrap();
        let blocker = temp_dir.path().join("blocker");
        tokio::fs::write(&blocker, b"x").await.unwrap();

        let err = write_json(&json!({}), &blocker.join("out.json")).await.unwrap_err();
        assert_eq!(err.category(), "system");
    }
}
