use std::error::Error as StdError;
use std::fmt;
use std::pin::Pin;

use futures_util::stream::{self, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::api::{ApiClient, ApiError, CompletionRequest};

/// Markers the model occasionally leaks into its text output.
const CONTROL_MARKERS: [&str; 2] = ["<|im_end|>", "\u{1b}[0m"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    /// The request could not be sent or no response arrived.
    Network(String),
    Status { status: u16, detail: String },
    /// The completion endpoint rejected the bearer token.
    Unauthorized,
    /// The body broke off after the response started.
    Read(String),
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamError::Network(_) => write!(f, "Error contacting the server."),
            StreamError::Status { status, detail } => {
                write!(f, "Server error ({status}): {detail}")
            }
            StreamError::Unauthorized => write!(f, "Session expired. Please log in again."),
            StreamError::Read(message) => write!(f, "Connection lost while streaming: {message}"),
        }
    }
}

impl StdError for StreamError {}

impl From<ApiError> for StreamError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Status { status: 401, .. } => StreamError::Unauthorized,
            ApiError::Status { status, detail } => StreamError::Status {
                status,
                detail: detail.unwrap_or_else(|| "Request failed".to_string()),
            },
            ApiError::Transport(err) => StreamError::Network(err.to_string()),
            ApiError::Decode(message) => StreamError::Network(message),
        }
    }
}

/// Incremental UTF-8 decoder. Multi-byte sequences split across chunks are
/// held back until the rest arrives; genuinely invalid bytes become U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8ChunkDecoder {
    pending: Vec<u8>,
}

impl Utf8ChunkDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut decoded = String::new();

        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    decoded.push_str(text);
                    self.pending.clear();
                    break;
                }
                Err(err) => {
                    let valid = err.valid_up_to();
                    if let Ok(prefix) = std::str::from_utf8(&self.pending[..valid]) {
                        decoded.push_str(prefix);
                    }
                    match err.error_len() {
                        // Incomplete sequence at the end: wait for more bytes.
                        None => {
                            self.pending.drain(..valid);
                            break;
                        }
                        Some(invalid) => {
                            decoded.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + invalid);
                        }
                    }
                }
            }
        }

        decoded
    }

    /// Flush whatever is still held back once the input has ended.
    pub fn finish(&mut self) -> String {
        let tail = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        tail
    }
}

struct DecodeState<S> {
    source: Pin<Box<S>>,
    decoder: Utf8ChunkDecoder,
    finished: bool,
}

/// Turn a byte stream into a lazy stream of text chunks.
///
/// Chunks that decode to nothing are skipped. The first read error is
/// yielded once and ends the stream.
pub fn decode_text_stream<S, B, E>(source: S) -> impl Stream<Item = Result<String, StreamError>>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: fmt::Display,
{
    let state = DecodeState {
        source: Box::pin(source),
        decoder: Utf8ChunkDecoder::new(),
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        if state.finished {
            return None;
        }
        loop {
            match state.source.next().await {
                Some(Ok(bytes)) => {
                    let text = state.decoder.decode(bytes.as_ref());
                    if !text.is_empty() {
                        return Some((Ok(text), state));
                    }
                }
                Some(Err(err)) => {
                    state.finished = true;
                    return Some((Err(StreamError::Read(err.to_string())), state));
                }
                None => {
                    state.finished = true;
                    let tail = state.decoder.finish();
                    if tail.is_empty() {
                        return None;
                    }
                    return Some((Ok(tail), state));
                }
            }
        }
    })
}

/// Hand every decoded chunk to `on_chunk` as soon as it arrives.
pub async fn forward_chunks<S, F>(chunks: S, mut on_chunk: F) -> Result<(), StreamError>
where
    S: Stream<Item = Result<String, StreamError>>,
    F: FnMut(String),
{
    futures_util::pin_mut!(chunks);
    while let Some(chunk) = chunks.next().await {
        on_chunk(chunk?);
    }
    Ok(())
}

pub fn strip_control_markers(text: &str) -> String {
    CONTROL_MARKERS
        .iter()
        .fold(text.to_string(), |acc, marker| acc.replace(marker, ""))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamMessage {
    /// The server accepted the request and the body is being read.
    Started,
    Chunk(String),
    Error(StreamError),
    End,
}

pub struct StreamParams {
    pub api: ApiClient,
    pub token: String,
    pub request: CompletionRequest,
    pub conversation_id: String,
    pub stream_id: u64,
    pub cancel_token: CancellationToken,
}

/// Runs completion requests on background tasks and reports progress over a
/// single channel, tagged with the stream id.
#[derive(Clone)]
pub struct ChatStreamService {
    tx: mpsc::UnboundedSender<(StreamMessage, u64)>,
}

impl ChatStreamService {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(StreamMessage, u64)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn spawn_stream(&self, params: StreamParams) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let StreamParams {
                api,
                token,
                request,
                conversation_id,
                stream_id,
                cancel_token,
            } = params;

            tokio::select! {
                _ = run_stream(&api, &token, &request, stream_id, &tx) => {}
                _ = cancel_token.cancelled() => {
                    debug!(stream_id, conversation = %conversation_id, "Stream cancelled");
                }
            }
        });
    }

    #[cfg(test)]
    pub fn send_for_test(&self, message: StreamMessage, stream_id: u64) {
        let _ = self.tx.send((message, stream_id));
    }
}

async fn run_stream(
    api: &ApiClient,
    token: &str,
    request: &CompletionRequest,
    stream_id: u64,
    tx: &mpsc::UnboundedSender<(StreamMessage, u64)>,
) {
    let response = match api.open_completion(token, request).await {
        Ok(response) => response,
        Err(err) => {
            debug!(stream_id, error = %err, "Completion request failed");
            let _ = tx.send((StreamMessage::Error(err.into()), stream_id));
            return;
        }
    };
    let _ = tx.send((StreamMessage::Started, stream_id));

    let chunks = decode_text_stream(response.bytes_stream());
    let outcome = forward_chunks(chunks, |chunk| {
        let _ = tx.send((StreamMessage::Chunk(chunk), stream_id));
    })
    .await;

    let message = match outcome {
        Ok(()) => StreamMessage::End,
        Err(err) => {
            debug!(stream_id, error = %err, "Stream read failed");
            StreamMessage::Error(err)
        }
    };
    let _ = tx.send((message, stream_id));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::test_utils::{serve_once, unused_local_url, CannedResponse};
    use std::convert::Infallible;

    fn ok_chunks(chunks: &[&'static str]) -> impl Stream<Item = Result<&'static [u8], Infallible>> {
        let items: Vec<_> = chunks.iter().map(|chunk| Ok(chunk.as_bytes())).collect();
        stream::iter(items)
    }

    async fn collect_text<S>(stream: S) -> Vec<Result<String, StreamError>>
    where
        S: Stream<Item = Result<String, StreamError>>,
    {
        stream.collect().await
    }

    #[test]
    fn decoder_carries_split_multibyte_sequences() {
        let mut decoder = Utf8ChunkDecoder::new();
        let bytes = "héllo ✓".as_bytes();
        // Split inside 'é' (2 bytes) and inside '✓' (3 bytes).
        let first = decoder.decode(&bytes[..2]);
        let second = decoder.decode(&bytes[2..8]);
        let third = decoder.decode(&bytes[8..]);

        assert_eq!(first, "h");
        assert_eq!(second, "éllo ");
        assert_eq!(third, "✓");
        assert_eq!(decoder.finish(), "");
    }

    #[test]
    fn decoder_replaces_invalid_bytes() {
        let mut decoder = Utf8ChunkDecoder::new();
        assert_eq!(decoder.decode(b"ab\xffcd"), "ab\u{fffd}cd");
    }

    #[test]
    fn decoder_flushes_truncated_tail_on_finish() {
        let mut decoder = Utf8ChunkDecoder::new();
        assert_eq!(decoder.decode(&[b'o', b'k', 0xe2, 0x9c]), "ok");
        assert_eq!(decoder.finish(), "\u{fffd}");
    }

    #[tokio::test]
    async fn text_stream_yields_each_chunk_in_order() {
        let source = ok_chunks(&["Hel", "lo wor", "ld"]);
        let chunks: Vec<String> = collect_text(decode_text_stream(source))
            .await
            .into_iter()
            .map(|chunk| chunk.expect("chunk"))
            .collect();
        assert_eq!(chunks, vec!["Hel", "lo wor", "ld"]);
    }

    #[tokio::test]
    async fn text_stream_skips_chunks_that_only_hold_partial_characters() {
        let euro = "€".as_bytes();
        let source = stream::iter(vec![
            Ok::<_, Infallible>(euro[..1].to_vec()),
            Ok(euro[1..].to_vec()),
        ]);
        let chunks = collect_text(decode_text_stream(source)).await;
        assert_eq!(chunks, vec![Ok("€".to_string())]);
    }

    #[tokio::test]
    async fn text_stream_stops_after_first_error() {
        let source = stream::iter(vec![
            Ok(b"partial".to_vec()),
            Err("connection reset"),
            Ok(b"never seen".to_vec()),
        ]);
        let chunks = collect_text(decode_text_stream(source)).await;
        assert_eq!(
            chunks,
            vec![
                Ok("partial".to_string()),
                Err(StreamError::Read("connection reset".to_string())),
            ]
        );
    }

    #[tokio::test]
    async fn forward_chunks_reports_error_after_delivering_earlier_text() {
        let source = stream::iter(vec![Ok(b"one ".to_vec()), Err("boom")]);
        let mut seen = Vec::new();
        let result = forward_chunks(decode_text_stream(source), |chunk| seen.push(chunk)).await;

        assert_eq!(seen, vec!["one "]);
        assert_eq!(result, Err(StreamError::Read("boom".to_string())));
    }

    #[test]
    fn control_markers_are_stripped() {
        assert_eq!(
            strip_control_markers("Paris.<|im_end|>\u{1b}[0m"),
            "Paris."
        );
        assert_eq!(strip_control_markers("plain"), "plain");
    }

    #[test]
    fn unauthorized_status_maps_to_session_expiry() {
        let err: StreamError = ApiError::Status {
            status: 401,
            detail: None,
        }
        .into();
        assert_eq!(err, StreamError::Unauthorized);

        let err: StreamError = ApiError::Status {
            status: 500,
            detail: None,
        }
        .into();
        assert_eq!(err.to_string(), "Server error (500): Request failed");
    }

    fn params(api: ApiClient, stream_id: u64) -> StreamParams {
        StreamParams {
            api,
            token: "tok".to_string(),
            request: CompletionRequest {
                message: "Hi".to_string(),
                history: Vec::new(),
            },
            conversation_id: "c1".to_string(),
            stream_id,
            cancel_token: CancellationToken::new(),
        }
    }

    async fn drain(rx: &mut mpsc::UnboundedReceiver<(StreamMessage, u64)>) -> Vec<StreamMessage> {
        let mut messages = Vec::new();
        while let Some((message, _)) = rx.recv().await {
            let terminal = matches!(message, StreamMessage::End | StreamMessage::Error(_));
            messages.push(message);
            if terminal {
                break;
            }
        }
        messages
    }

    #[tokio::test]
    async fn service_streams_server_chunks_then_ends() {
        let server = serve_once(CannedResponse::byte_chunks(
            200,
            vec![b"Bon".to_vec(), vec![b'j', b'o', b'u', b'r', 0xc3], vec![0xa0, b'!']],
        ))
        .await;
        let api = ApiClient::new(server.base_url.clone(), None).expect("client");
        let (service, mut rx) = ChatStreamService::new();

        service.spawn_stream(params(api, 7));
        let messages = drain(&mut rx).await;

        assert_eq!(messages.first(), Some(&StreamMessage::Started));
        assert_eq!(messages.last(), Some(&StreamMessage::End));
        let text: String = messages
            .iter()
            .filter_map(|message| match message {
                StreamMessage::Chunk(chunk) => Some(chunk.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(text, "Bonjourà!");
        server.request().await;
    }

    #[tokio::test]
    async fn service_reports_truncated_body_as_read_error() {
        let server =
            serve_once(CannedResponse::text_chunks(200, &["partial"]).truncated()).await;
        let api = ApiClient::new(server.base_url.clone(), None).expect("client");
        let (service, mut rx) = ChatStreamService::new();

        service.spawn_stream(params(api, 1));
        let messages = drain(&mut rx).await;

        assert!(matches!(
            messages.last(),
            Some(StreamMessage::Error(StreamError::Read(_)))
        ));
        server.request().await;
    }

    #[tokio::test]
    async fn service_reports_unreachable_server_as_network_error() {
        let api = ApiClient::new(unused_local_url().await, None).expect("client");
        let (service, mut rx) = ChatStreamService::new();

        service.spawn_stream(params(api, 3));
        let messages = drain(&mut rx).await;

        assert_eq!(messages.len(), 1);
        assert!(matches!(
            &messages[0],
            StreamMessage::Error(StreamError::Network(_))
        ));
    }

    #[tokio::test]
    async fn service_maps_401_to_unauthorized() {
        let server = serve_once(CannedResponse::json(
            401,
            r#"{"detail":"Invalid authentication credentials"}"#,
        ))
        .await;
        let api = ApiClient::new(server.base_url.clone(), None).expect("client");
        let (service, mut rx) = ChatStreamService::new();

        service.spawn_stream(params(api, 2));
        let messages = drain(&mut rx).await;

        assert_eq!(
            messages,
            vec![StreamMessage::Error(StreamError::Unauthorized)]
        );
        server.request().await;
    }
}
