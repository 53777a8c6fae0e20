//! `likeness setup`: download the ONNX models used by the in-process extractor.

use anyhow::{bail, Context, Result};
use likeness_models::{sha256_file_hex, ModelFile, MODELS};
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

/// State of one manifest entry in the target directory.
#[derive(Debug, PartialEq, Eq)]
enum Presence {
    Verified,
    Corrupt,
    Unreadable,
    Absent,
}

fn presence(model: &ModelFile, dest: &Path) -> Presence {
    if !dest.exists() {
        return Presence::Absent;
    }
    match sha256_file_hex(dest) {
        Ok(digest) if digest.eq_ignore_ascii_case(model.sha256) => Presence::Verified,
        Ok(_) => Presence::Corrupt,
        Err(_) => Presence::Unreadable,
    }
}

/// Copy `reader` into `writer`, printing progress every 10% when the total
/// length is known. Returns the number of bytes copied.
fn copy_with_progress(
    reader: &mut impl Read,
    writer: &mut impl Write,
    content_length: Option<u64>,
) -> io::Result<u64> {
    let mut buf = [0u8; 65536];
    let mut total: u64 = 0;
    let mut last_pct: u64 = 0;

    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        writer.write_all(&buf[..n])?;
        total += n as u64;

        if let Some(len) = content_length.filter(|&l| l > 0) {
            let pct = (total * 100) / len;
            if pct / 10 > last_pct / 10 {
                print!("  {pct}%\r");
                io::stdout().flush().ok();
                last_pct = pct;
            }
        }
    }
    writer.flush()?;
    Ok(total)
}

/// Download into `<dest>.part`, verify, then rename into place.
fn download_model(model: &ModelFile, dest: &Path) -> Result<()> {
    let tmp_path = dest.with_extension("onnx.part");

    println!("  downloading {} ({})...", model.name, model.size_display);
    tracing::debug!(url = model.url, "model download started");

    let resp = ureq::get(model.url)
        .call()
        .with_context(|| format!("failed to download {}", model.url))?;

    let content_length = resp
        .headers()
        .get("Content-Length")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());

    let mut reader = resp.into_body().into_reader();
    let mut file = fs::File::create(&tmp_path)
        .with_context(|| format!("failed to create {}", tmp_path.display()))?;
    let total = copy_with_progress(&mut reader, &mut file, content_length)
        .with_context(|| format!("download of {} interrupted", model.name))?;
    drop(file);
    tracing::debug!(bytes = total, name = model.name, "model download finished");

    print!("  verifying checksum... ");
    io::stdout().flush().ok();
    let digest = sha256_file_hex(&tmp_path)?;
    if !digest.eq_ignore_ascii_case(model.sha256) {
        fs::remove_file(&tmp_path).ok();
        bail!(
            "checksum mismatch for {}:\n  expected: {}\n  got:      {}",
            model.name,
            model.sha256,
            digest
        );
    }
    println!("ok");

    fs::rename(&tmp_path, dest).with_context(|| {
        format!(
            "failed to rename {} -> {}",
            tmp_path.display(),
            dest.display()
        )
    })?;
    Ok(())
}

/// Download and verify every model missing from `model_dir`.
pub fn run(model_dir: Option<PathBuf>) -> Result<()> {
    let dir = model_dir.unwrap_or_else(likeness_models::default_model_dir);
    println!("Model directory: {}", dir.display());

    fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create directory {}", dir.display()))?;

    let mut downloaded = 0;
    let mut skipped = 0;

    for model in MODELS {
        let dest = model.path_in(&dir);
        match presence(model, &dest) {
            Presence::Verified => {
                println!("  {} already present (checksum ok)", model.name);
                skipped += 1;
                continue;
            }
            Presence::Corrupt => {
                println!("  {} exists but checksum differs, re-downloading", model.name)
            }
            Presence::Unreadable => {
                println!("  {} exists but unreadable, re-downloading", model.name)
            }
            Presence::Absent => {}
        }

        download_model(model, &dest)?;
        downloaded += 1;
    }

    println!();
    if downloaded > 0 {
        println!("Setup complete: {downloaded} model(s) downloaded, {skipped} already present.");
    } else {
        println!("All models already present. Nothing to download.");
    }
    Ok(())
}

/// `likeness check-models`: report missing or corrupt files without downloading.
pub fn check(model_dir: Option<PathBuf>) -> Result<()> {
    let dir = model_dir.unwrap_or_else(likeness_models::default_model_dir);
    println!("Model directory: {}", dir.display());

    let mut bad = 0;
    for model in MODELS {
        let status = match presence(model, &model.path_in(&dir)) {
            Presence::Verified => "ok",
            Presence::Corrupt => "CHECKSUM MISMATCH",
            Presence::Unreadable => "UNREADABLE",
            Presence::Absent => "MISSING",
        };
        if status != "ok" {
            bad += 1;
        }
        println!("  {:<16} {status}", model.name);
    }

    if bad > 0 {
        bail!("{bad} model file(s) need attention; run `likeness setup`");
    }
    Ok(())
}
