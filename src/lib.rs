pub mod api;
pub mod backfill;
pub mod chunk;
pub mod collect;
pub mod config;
pub mod dedupe;
pub mod init;
pub mod jsonl;
pub mod metadata;
pub mod record;
pub mod scenes;
pub mod split;
pub mod tokens;
pub mod upload;
pub mod validate;
pub mod video;

pub(crate) fn logv(tag: &str, message: &str) {
    match tag {
        "WARN" => tracing::warn!(tag, "{}", message),
        _ => tracing::info!(tag, "{}", message),
    }
}

pub(crate) fn logi(message: impl AsRef<str>) {
    logv("INFO", message.as_ref());
}

pub(crate) fn logok(message: impl AsRef<str>) {
    logv("OK", message.as_ref());
}

pub(crate) fn logw(message: impl AsRef<str>) {
    logv("WARN", message.as_ref());
}
