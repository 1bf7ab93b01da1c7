use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("failed to prepare output directory `{path}`: {source}")]
    CreateDir { path: PathBuf, source: io::Error },
    #[error("failed to write document `{path}`: {source}")]
    WriteFile { path: PathBuf, source: io::Error },
}

/// Encodes a rendered document as downloadable markdown bytes.
pub fn markdown_bytes(document: &str) -> Vec<u8> {
    let mut bytes = document.trim_end().as_bytes().to_vec();
    bytes.push(b'\n');
    bytes
}

/// Writes the rendered document to `path`, creating parent directories
/// as needed.
pub fn write_markdown(path: impl AsRef<Path>, document: &str) -> Result<(), ExportError> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|source| ExportError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }
    }
    fs::write(path, markdown_bytes(document)).map_err(|source| ExportError::WriteFile {
        path: path.to_path_buf(),
        source,
    })
}
