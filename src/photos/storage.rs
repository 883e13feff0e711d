use crate::error::Result;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

pub const METADATA_FILE: &str = "metadata.txt";

/// Extensions that count as "photos already present" for the skip check.
const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "webp"];

const MAX_FILENAME_LENGTH: usize = 200;

static UNSAFE_CHARS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^\w.-]").unwrap());
static UNDERSCORE_RUNS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"_+").unwrap());

/// Hex SHA-256 of the listing link.
pub fn link_key(link: &str) -> String {
    hex::encode(Sha256::digest(link.as_bytes()))
}

/// `<root>/<h[0..2]>/<h[2..4]>/<h>`. Depends only on the link.
pub fn listing_dir(root: &Path, link: &str) -> PathBuf {
    let key = link_key(link);
    root.join(&key[..2]).join(&key[2..4]).join(&key)
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}

/// Image files in `dir`, sorted by name. A missing dir has none.
pub fn photo_paths(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut paths = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file() && is_image(path))
        .collect::<Vec<_>>();
    paths.sort();
    Ok(paths)
}

/// Replace anything outside `[\w.-]` with `_`, collapse runs, cap length.
pub fn sanitize_filename(name: &str) -> String {
    let replaced = UNSAFE_CHARS.replace_all(name, "_");
    let collapsed = UNDERSCORE_RUNS.replace_all(&replaced, "_");
    collapsed.chars().take(MAX_FILENAME_LENGTH).collect()
}

/// `NN_<sanitized basename>`, falling back to `image_N.jpg` when the URL
/// path has no basename.
pub fn photo_filename(url: &str, index: usize) -> String {
    let basename = url::Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
        })
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| format!("image_{index}.jpg"));
    format!("{:02}_{}", index, sanitize_filename(&basename))
}

pub fn write_metadata(dir: &Path, link: &str, name: &str) -> Result<()> {
    std::fs::write(dir.join(METADATA_FILE), format!("Link: {link}\nName: {name}\n"))?;
    Ok(())
}
