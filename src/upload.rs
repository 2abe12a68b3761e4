use std::fs;
use std::path::Path;

/// File types the backend can ingest.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["pdf", "txt"];

/// A file on its way to the backend. The contents are opaque.
#[derive(Debug, Clone, PartialEq)]
pub struct FileUpload {
    pub title: String,
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl FileUpload {
    /// The title defaults to the file name.
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        let file_name = file_name.into();
        Self {
            title: file_name.clone(),
            file_name,
            bytes,
        }
    }

    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown")
            .to_string();
        let bytes = fs::read(path)?;
        Ok(Self::new(file_name, bytes))
    }

    pub fn extension(&self) -> String {
        Path::new(&self.file_name)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase()
    }

    pub fn is_supported(&self) -> bool {
        SUPPORTED_EXTENSIONS.contains(&self.extension().as_str())
    }

    pub fn content_type(&self) -> &'static str {
        match self.extension().as_str() {
            "pdf" => "application/pdf",
            "txt" => "text/plain",
            _ => "application/octet-stream",
        }
    }
}
