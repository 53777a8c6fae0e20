use sha2::{Digest, Sha256};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// What a model file is used for in the extraction pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelRole {
    /// SCRFD face detector (boxes + scores).
    Detector,
    /// ArcFace recognizer (512-d descriptor).
    Recognizer,
}

/// One downloadable model: where it comes from and what it must hash to.
#[derive(Debug)]
pub struct ModelFile {
    pub role: ModelRole,
    pub name: &'static str,
    pub url: &'static str,
    pub sha256: &'static str,
    pub size_display: &'static str,
}

impl ModelFile {
    pub fn path_in(&self, dir: &Path) -> PathBuf {
        dir.join(self.name)
    }
}

// Checksums from the InsightFace buffalo_l Git LFS pointers (oid sha256).
pub const MODELS: &[ModelFile] = &[
    ModelFile {
        role: ModelRole::Detector,
        name: "det_10g.onnx",
        url: "https://huggingface.co/public-data/insightface/resolve/main/models/buffalo_l/det_10g.onnx",
        sha256: "5838f7fe053675b1c7a08b633df49e7af5495cee0493c7dcf6697200b85b5b91",
        size_display: "16 MB",
    },
    ModelFile {
        role: ModelRole::Recognizer,
        name: "w600k_r50.onnx",
        url: "https://huggingface.co/public-data/insightface/resolve/main/models/buffalo_l/w600k_r50.onnx",
        sha256: "4c06341c33c2ca1f86781dab0e829f88ad5b64be9fba56e56bc9ebdefc619e43",
        size_display: "166 MB",
    },
];

/// Default model directory.
///
/// Root (the system service) uses `/var/lib/likeness/models`; other users get
/// `$XDG_DATA_HOME/likeness/models` (`~/.local/share/likeness/models`).
pub fn default_model_dir() -> PathBuf {
    if is_root() {
        return PathBuf::from("/var/lib/likeness/models");
    }
    let data_home = std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        });
    data_home.join("likeness/models")
}

fn is_root() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail.
    unsafe { libc::geteuid() == 0 }
}

/// The manifest entry for `role`. Every role has exactly one entry.
pub fn model_for(role: ModelRole) -> &'static ModelFile {
    match role {
        ModelRole::Detector => &MODELS[0],
        ModelRole::Recognizer => &MODELS[1],
    }
}

#[derive(Error, Debug)]
pub enum ModelIntegrityError {
    #[error("model file not found: {name} ({path})")]
    MissingModel { name: &'static str, path: PathBuf },

    #[error("failed to open model file: {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read model file: {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "model checksum mismatch for {name} ({path})\n  expected: {expected}\n  got:      {got}"
    )]
    ChecksumMismatch {
        name: &'static str,
        path: PathBuf,
        expected: String,
        got: String,
    },
}

/// Streaming SHA-256 hex digest of a file.
pub fn sha256_file_hex(path: &Path) -> Result<String, ModelIntegrityError> {
    let mut file = fs::File::open(path).map_err(|source| ModelIntegrityError::Open {
        path: path.to_path_buf(),
        source,
    })?;

    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf).map_err(|source| ModelIntegrityError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

pub fn verify_file_sha256(
    name: &'static str,
    path: &Path,
    expected_sha256: &str,
) -> Result<(), ModelIntegrityError> {
    if !path.exists() {
        return Err(ModelIntegrityError::MissingModel {
            name,
            path: path.to_path_buf(),
        });
    }

    let got = sha256_file_hex(path)?;
    if !got.eq_ignore_ascii_case(expected_sha256) {
        return Err(ModelIntegrityError::ChecksumMismatch {
            name,
            path: path.to_path_buf(),
            expected: expected_sha256.to_string(),
            got,
        });
    }
    Ok(())
}

/// Check every manifest entry in `model_dir`, stopping at the first failure.
pub fn verify_models_dir(model_dir: &Path) -> Result<(), ModelIntegrityError> {
    MODELS
        .iter()
        .try_for_each(|m| verify_file_sha256(m.name, &m.path_in(model_dir), m.sha256))
}

/// Manifest entries with no file present in `model_dir` (checksums not checked).
pub fn missing_models(model_dir: &Path) -> Vec<&'static ModelFile> {
    MODELS
        .iter()
        .filter(|m| !m.path_in(model_dir).exists())
        .collect()
}
