use bytes::Bytes;
use std::path::{Component, Path, PathBuf};
use tokio::{
    fs::File,
    io::{self, AsyncReadExt},
    sync::mpsc,
};
use wwtkdr_core::{CorrelationId, proto::ReplyFragment};

/// Maps `entry` onto a path under `root`.
///
/// Returns `None` for entries that would escape `root` (`..`, absolute paths
/// or drive prefixes). Empty segments from doubled slashes are skipped.
pub fn resolve_entry(root: &Path, entry: &str) -> Option<PathBuf> {
    let mut path = root.to_path_buf();
    for component in Path::new(entry).components() {
        match component {
            Component::Normal(part) => path.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(path)
}

/// Guesses a `Content-Type` from the file extension.
pub fn content_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);

    match ext.as_deref() {
        Some("txt" | "text") => "text/plain; charset=utf-8",
        Some("html" | "htm") => "text/html; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("csv") => "text/csv; charset=utf-8",
        Some("js" | "mjs") => "text/javascript; charset=utf-8",
        Some("json") => "application/json",
        Some("xml" | "wtml") => "application/xml",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        Some("webp") => "image/webp",
        Some("fits" | "fit" | "fts") => "application/fits",
        Some("pdf") => "application/pdf",
        Some("gz") => "application/gzip",
        Some("zip") => "application/zip",
        _ => "application/octet-stream",
    }
}

/// Plain-text reply with `status`, in a single fragment.
pub fn text_reply(id: CorrelationId, status: u16, text: &str) -> ReplyFragment {
    ReplyFragment::ok(id, 0)
        .with_http(status, [("Content-Type", "text/plain; charset=utf-8")])
        .with_chunk(Bytes::copy_from_slice(text.as_bytes()))
}

/// Streams `path` to `replies` as fragments of at most `chunk_size` bytes.
///
/// Fragment 0 carries the `200` status and content type. Every fragment but
/// the last has `more: true`; an empty file yields a single fragment with no
/// chunks.
///
/// # Errors
///
/// Returns the I/O error if the file cannot be opened. Read failures after
/// the first fragment are reported to the relay as an error fragment instead.
pub async fn send_file(
    replies: &mpsc::Sender<ReplyFragment>,
    id: CorrelationId,
    path: &Path,
    chunk_size: usize,
) -> io::Result<()> {
    let mut file = File::open(path).await?;
    if file.metadata().await?.is_dir() {
        return Err(io::Error::new(io::ErrorKind::NotFound, "entry is a directory"));
    }

    let mut current = read_chunk(&mut file, chunk_size).await?;
    let mut seq = 0;

    loop {
        let next = if current.is_empty() {
            Bytes::new()
        } else {
            match read_chunk(&mut file, chunk_size).await {
                Ok(next) => next,
                Err(e) => {
                    tracing::warn!(path = %path.display(), "read failed mid-file: {e}");
                    let _ = replies
                        .send(ReplyFragment::error(id, seq, e.to_string()))
                        .await;
                    return Ok(());
                }
            }
        };
        let more = !next.is_empty();

        let mut fragment = if seq == 0 {
            ReplyFragment::ok(id, 0).with_http(200, [("Content-Type", content_type(path))])
        } else {
            ReplyFragment::ok(id, seq)
        }
        .with_more(more);
        if !current.is_empty() {
            fragment = fragment.with_chunk(current);
        }

        if replies.send(fragment).await.is_err() {
            tracing::debug!(%id, "relay went away mid-file");
            return Ok(());
        }

        if !more {
            return Ok(());
        }
        current = next;
        seq += 1;
    }
}

async fn read_chunk(file: &mut File, chunk_size: usize) -> io::Result<Bytes> {
    let mut buf = Vec::with_capacity(chunk_size);
    file.take(chunk_size as u64).read_to_end(&mut buf).await?;
    Ok(Bytes::from(buf))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_escaping_entries() {
        let root = Path::new("/srv/data");
        assert_eq!(
            resolve_entry(root, "a/b.png"),
            Some(PathBuf::from("/srv/data/a/b.png"))
        );
        assert_eq!(
            resolve_entry(root, "a//./b.png"),
            Some(PathBuf::from("/srv/data/a/b.png"))
        );
        assert_eq!(resolve_entry(root, "../etc/passwd"), None);
        assert_eq!(resolve_entry(root, "a/../../x"), None);
        assert_eq!(resolve_entry(root, "/etc/passwd"), None);
    }

    #[test]
    fn guesses_content_types() {
        assert_eq!(content_type(Path::new("x.PNG")), "image/png");
        assert_eq!(content_type(Path::new("index.wtml")), "application/xml");
        assert_eq!(content_type(Path::new("noext")), "application/octet-stream");
    }
}
