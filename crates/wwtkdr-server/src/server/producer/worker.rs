use super::files::{resolve_entry, send_file, text_reply};
use crate::server::config::DemoConfig;
use std::{io::ErrorKind, path::Path, sync::Arc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use wwtkdr_core::{
    directory::{MemoryProducer, MemorySession},
    proto::{RESOURCE_REQUEST, ReplyFragment, RequestMessage},
};

/// Demo producer task.
///
/// Claims `demo.key` and answers every `resource_request` on every session
/// the relay opens, until `shutdown` is cancelled. Dropping the producer on
/// exit removes it from the directory, which retracts its key.
///
/// # Arguments
///
/// - `producer`: Registration in the in-process directory.
/// - `demo`: Key to claim, directory to serve, fragment size.
/// - `shutdown`: Cancelled when the server shuts down.
pub async fn producer_loop(
    mut producer: MemoryProducer,
    demo: DemoConfig,
    shutdown: CancellationToken,
) {
    let observers = producer.claim_key(demo.key.as_str());
    tracing::info!(
        producer = %producer.id(),
        key = %demo.key,
        root = %demo.root.display(),
        observers,
        "Demo producer started"
    );

    let demo = Arc::new(demo);

    loop {
        tokio::select! {
            () = shutdown.cancelled() => {
                tracing::debug!("Demo producer received shutdown signal");
                break;
            }
            session = producer.accept() => match session {
                Some(session) => {
                    tokio::spawn(session_loop(session, Arc::clone(&demo), shutdown.clone()));
                }
                None => break,
            },
        }
    }

    tracing::trace!(producer = %producer.id(), "Demo producer stopped");
}

/// Serves one relay session. Requests are handled concurrently, so their
/// fragments interleave on the shared reply channel.
async fn session_loop(mut session: MemorySession, demo: Arc<DemoConfig>, shutdown: CancellationToken) {
    loop {
        let request = tokio::select! {
            () = shutdown.cancelled() => break,
            request = session.next_request() => match request {
                Some(request) => request,
                None => break,
            },
        };

        let replies = session.replies.clone();
        let demo = Arc::clone(&demo);
        tokio::spawn(async move {
            handle_request(&replies, &request, &demo).await;
        });
    }
}

/// Answers a single request message.
pub async fn handle_request(
    replies: &mpsc::Sender<ReplyFragment>,
    request: &RequestMessage,
    demo: &DemoConfig,
) {
    let id = request.msg_id;
    let content = &request.content;

    if request.msg_type != RESOURCE_REQUEST {
        tracing::debug!(msg_type = %request.msg_type, "ignoring unknown request type");
        let _ = replies
            .send(ReplyFragment::error(id, 0, format!("unsupported request {:?}", request.msg_type)))
            .await;
        return;
    }

    if content.key != demo.key {
        let _ = replies
            .send(ReplyFragment::error(id, 0, format!("key {:?} is not served here", content.key)))
            .await;
        return;
    }

    tracing::debug!(entry = %content.entry, authenticated = content.authenticated, "demo request");

    let Some(path) = resolve_entry(&demo.root, &content.entry) else {
        let _ = replies.send(not_found(id, &content.entry)).await;
        return;
    };

    if let Err(e) = send_file(replies, id, &path, demo.chunk_size).await {
        let fragment = match e.kind() {
            ErrorKind::NotFound | ErrorKind::PermissionDenied => not_found(id, &content.entry),
            _ => ReplyFragment::error(id, 0, format!("failed to read {}: {e}", display(&path))),
        };
        let _ = replies.send(fragment).await;
    }
}

fn not_found(id: wwtkdr_core::CorrelationId, entry: &str) -> ReplyFragment {
    text_reply(id, 404, &format!("no such entry {entry:?}"))
}

fn display(path: &Path) -> String {
    path.display().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use wwtkdr_core::{CorrelationId, proto::ResourceRequest};

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("wwtkdr-{name}-{}", CorrelationId::new()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn demo(root: PathBuf, chunk_size: usize) -> DemoConfig {
        DemoConfig {
            key: "files".to_string(),
            root,
            chunk_size,
        }
    }

    fn request(entry: &str) -> RequestMessage {
        RequestMessage::resource_request(ResourceRequest {
            method: "GET".to_string(),
            url: format!("/wwtkdr/files/{entry}"),
            authenticated: true,
            key: "files".to_string(),
            entry: entry.to_string(),
            context: serde_json::Map::new(),
        })
    }

    async fn replies_for(demo: &DemoConfig, entry: &str) -> Vec<ReplyFragment> {
        let (tx, mut rx) = mpsc::channel(64);
        handle_request(&tx, &request(entry), demo).await;
        drop(tx);

        let mut out = Vec::new();
        while let Some(fragment) = rx.recv().await {
            out.push(fragment);
        }
        out
    }

    #[tokio::test]
    async fn chunks_file_into_fragments() {
        let root = scratch_dir("chunks");
        std::fs::write(root.join("hello.txt"), b"hello world").unwrap();

        let fragments = replies_for(&demo(root.clone(), 4), "hello.txt").await;
        assert_eq!(fragments.len(), 3);
        assert_eq!(fragments[0].content.http_status, Some(200));
        assert_eq!(
            fragments.iter().map(|f| f.seq().unwrap()).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert_eq!(
            fragments.iter().map(|f| f.content.more).collect::<Vec<_>>(),
            vec![true, true, false]
        );
        let body: Vec<u8> = fragments
            .iter()
            .flat_map(|f| f.buffers.iter().flat_map(|b| b.iter().copied()))
            .collect();
        assert_eq!(body, b"hello world");

        std::fs::remove_dir_all(root).unwrap();
    }

    #[tokio::test]
    async fn empty_file_is_one_fragment() {
        let root = scratch_dir("empty");
        std::fs::write(root.join("empty.bin"), b"").unwrap();

        let fragments = replies_for(&demo(root.clone(), 4), "empty.bin").await;
        assert_eq!(fragments.len(), 1);
        assert!(fragments[0].buffers.is_empty());
        assert!(!fragments[0].content.more);

        std::fs::remove_dir_all(root).unwrap();
    }

    #[tokio::test]
    async fn missing_and_escaping_entries_are_404() {
        let root = scratch_dir("missing");

        for entry in ["nope.txt", "../secret"] {
            let fragments = replies_for(&demo(root.clone(), 4), entry).await;
            assert_eq!(fragments.len(), 1);
            assert!(fragments[0].is_ok());
            assert_eq!(fragments[0].content.http_status, Some(404));
        }

        std::fs::remove_dir_all(root).unwrap();
    }
}
