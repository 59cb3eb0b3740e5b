use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use std::path::{Component, Path};

const ALLOWED_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp", "mp3", "wav", "mp4", "json"];

/// Lower-cased name with each run of non-alphanumeric characters collapsed to `_`.
pub fn slug(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_sep = false;
    for ch in name.chars() {
        if ch.is_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            out.extend(ch.to_lowercase());
        } else {
            pending_sep = true;
        }
    }
    if out.is_empty() {
        "unnamed".to_string()
    } else {
        out
    }
}

/// A bare file name the file route may serve: no directories, no dotfiles,
/// and one of the media extensions the pipeline writes.
pub fn is_servable_file_name(name: &str) -> bool {
    let path = Path::new(name);
    let mut components = path.components();
    let single_normal = matches!(components.next(), Some(Component::Normal(_))) && components.next().is_none();
    if !single_normal || name.starts_with('.') || name.contains('\\') {
        return false;
    }
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ALLOWED_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

pub fn png_data_uri(bytes: &[u8]) -> String {
    format!("data:image/png;base64,{}", BASE64.encode(bytes))
}
