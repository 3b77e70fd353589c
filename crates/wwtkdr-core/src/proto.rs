//! Producer ⇄ relay message contract.
//!
//! These are plain `serde` types; a wire transport (de)serializes them as JSON
//! and carries [`ReplyFragment::buffers`] as raw attachments.
//!
//! - [`Announcement`] - producer → relay, broadcast. Only [`CLAIM_KEY`] is
//!   interpreted; everything else is ignored.
//! - [`RequestMessage`] - relay → producer, one per HTTP request.
//! - [`ReplyFragment`] - producer → relay, one or more per request, ordered by
//!   `seq`. `http_status`/`http_headers` only appear on the first fragment,
//!   which must carry `http_status`.

use crate::common::types::CorrelationId;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Announcement type through which a producer claims a key.
pub const CLAIM_KEY: &str = "claim_key";

/// Request type sent to producers for every relayed HTTP request.
pub const RESOURCE_REQUEST: &str = "resource_request";

/// Reply status meaning "no error".
pub const STATUS_OK: &str = "ok";

/// A message observed on a producer's broadcast channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Announcement {
    pub msg_type: String,
    #[serde(default)]
    pub content: serde_json::Value,
}

impl Announcement {
    /// Builds a [`CLAIM_KEY`] announcement for `key`.
    pub fn claim_key(key: impl Into<String>) -> Self {
        Self {
            msg_type: CLAIM_KEY.to_string(),
            content: serde_json::json!({ "key": key.into() }),
        }
    }
}

/// Payload of a [`CLAIM_KEY`] announcement.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimKey {
    #[serde(default)]
    pub key: Option<String>,
}

/// The resource request relayed to a producer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResourceRequest {
    pub method: String,
    pub url: String,
    pub authenticated: bool,
    pub key: String,
    pub entry: String,
    #[serde(default)]
    pub context: serde_json::Map<String, serde_json::Value>,
}

/// Envelope of an outbound request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RequestMessage {
    pub msg_id: CorrelationId,
    pub msg_type: String,
    pub content: ResourceRequest,
}

impl RequestMessage {
    /// Wraps `content` in a [`RESOURCE_REQUEST`] envelope with a fresh id.
    pub fn resource_request(content: ResourceRequest) -> Self {
        Self {
            msg_id: CorrelationId::new(),
            msg_type: RESOURCE_REQUEST.to_string(),
            content,
        }
    }
}

/// JSON content of a reply fragment.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyContent {
    #[serde(default = "unspecified_status")]
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evalue: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_headers: Option<Vec<(String, String)>>,
    #[serde(default)]
    pub more: bool,
}

fn unspecified_status() -> String {
    "unspecified".to_string()
}

/// One unit of a streamed reply.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyFragment {
    /// Correlation id of the request this fragment answers.
    #[serde(default)]
    pub parent: Option<CorrelationId>,
    pub content: ReplyContent,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub buffers: Vec<Bytes>,
}

impl ReplyFragment {
    /// An `ok` fragment at `seq` answering `parent`.
    pub fn ok(parent: CorrelationId, seq: u64) -> Self {
        Self {
            parent: Some(parent),
            content: ReplyContent {
                status: STATUS_OK.to_string(),
                seq: Some(seq),
                ..ReplyContent::default()
            },
            buffers: Vec::new(),
        }
    }

    /// An error fragment at `seq` carrying `evalue` as its message.
    pub fn error(parent: CorrelationId, seq: u64, evalue: impl Into<String>) -> Self {
        Self {
            parent: Some(parent),
            content: ReplyContent {
                status: "error".to_string(),
                evalue: Some(evalue.into()),
                seq: Some(seq),
                ..ReplyContent::default()
            },
            buffers: Vec::new(),
        }
    }

    /// Attaches the HTTP status and headers (first fragment only).
    #[must_use]
    pub fn with_http<N, V>(mut self, status: u16, headers: impl IntoIterator<Item = (N, V)>) -> Self
    where
        N: Into<String>,
        V: Into<String>,
    {
        self.content.http_status = Some(status);
        self.content.http_headers = Some(
            headers
                .into_iter()
                .map(|(n, v)| (n.into(), v.into()))
                .collect(),
        );
        self
    }

    #[must_use]
    pub fn with_more(mut self, more: bool) -> Self {
        self.content.more = more;
        self
    }

    #[must_use]
    pub fn with_chunk(mut self, chunk: impl Into<Bytes>) -> Self {
        self.buffers.push(chunk.into());
        self
    }

    pub fn seq(&self) -> Option<u64> {
        self.content.seq
    }

    pub fn is_ok(&self) -> bool {
        self.content.status == STATUS_OK
    }

    /// Whether another fragment should be awaited after this one.
    ///
    /// A fragment only continues the stream if it says so *and* it carried
    /// at least one byte chunk.
    pub fn continues(&self) -> bool {
        self.content.more && !self.buffers.is_empty()
    }
}
