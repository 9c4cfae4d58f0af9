//! TUI-less "say" command

use std::error::Error;
use std::io::{self, Write};

use tracing::warn;

use crate::api::ApiClient;
use crate::cli::Context;
use crate::core::chat_stream::{ChatStreamService, StreamError};
use crate::core::controller::{ChatController, SendOutcome, SubmitError};

pub async fn run_say(prompt: Vec<String>, context: &Context) -> Result<(), Box<dyn Error>> {
    let prompt = prompt.join(" ");
    if prompt.trim().is_empty() {
        eprintln!("Usage: eesyai say <prompt>");
        std::process::exit(1);
    }

    let mut session = context.session();
    if !session.is_authenticated() {
        eprintln!("❌ Not logged in. Run 'eesyai login' first.");
        std::process::exit(1);
    }

    let mut controller = context.controller();
    let mut stdout = io::stdout();
    let outcome = stream_reply(
        &mut controller,
        &context.api,
        session.token(),
        prompt,
        &mut stdout,
    )
    .await?;

    match outcome {
        SendOutcome::Completed { .. } => Ok(()),
        SendOutcome::Failed { error, .. } => {
            if error == StreamError::Unauthorized {
                if let Err(err) = session.clear() {
                    warn!(error = %err, "Could not remove stored token");
                }
            }
            eprintln!("❌ {error}");
            std::process::exit(1);
        }
    }
}

/// Send `prompt` into a fresh conversation and write the reply to `out` as
/// it arrives. The exchange is saved like any conversation started in the UI.
pub async fn stream_reply<W: Write>(
    controller: &mut ChatController,
    api: &ApiClient,
    token: Option<&str>,
    prompt: String,
    out: &mut W,
) -> Result<SendOutcome, Box<dyn Error>> {
    // Nothing is created unless the send can actually start.
    if prompt.trim().is_empty() {
        return Err(SubmitError::EmptyInput.into());
    }
    if token.is_none() {
        return Err(SubmitError::NotAuthenticated.into());
    }

    let conversation_id = controller.store_mut().create_conversation();
    let mut input = prompt;
    let params = controller.submit(&mut input, api, token)?;

    let (service, mut rx) = ChatStreamService::new();
    service.spawn_stream(params);

    let mut printed = String::new();
    while let Some((message, stream_id)) = rx.recv().await {
        let outcome = controller.handle_stream_message(stream_id, message);
        let content = controller
            .store()
            .get(&conversation_id)
            .and_then(|conversation| conversation.last_message())
            .map(|message| message.content.clone())
            .unwrap_or_default();

        match outcome {
            None => write_delta(out, &mut printed, &content)?,
            Some(outcome @ SendOutcome::Completed { .. }) => {
                write_delta(out, &mut printed, &content)?;
                writeln!(out)?;
                return Ok(outcome);
            }
            Some(outcome @ SendOutcome::Failed { .. }) => {
                if !printed.is_empty() {
                    writeln!(out)?;
                }
                return Ok(outcome);
            }
        }
    }

    Err("Reply stream closed unexpectedly".into())
}

/// Print whatever `content` adds to what was already printed. Content that
/// no longer extends the printed text (a control marker was removed) is held
/// back until it does.
fn write_delta<W: Write>(out: &mut W, printed: &mut String, content: &str) -> io::Result<()> {
    let Some(delta) = content.strip_prefix(printed.as_str()) else {
        return Ok(());
    };
    if delta.is_empty() {
        return Ok(());
    }
    out.write_all(delta.as_bytes())?;
    out.flush()?;
    *printed = content.to_string();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::message::Role;
    use crate::core::persistence::ConversationPersistence;
    use crate::core::storage::MemoryStorage;
    use crate::core::store::ConversationStore;
    use crate::utils::test_utils::{serve_once, unused_local_url, CannedResponse};
    use std::sync::Arc;

    fn controller() -> ChatController {
        let persistence = ConversationPersistence::new(Arc::new(MemoryStorage::new()));
        ChatController::new(ConversationStore::load(persistence))
    }

    #[test]
    fn delta_is_only_the_new_suffix() {
        let mut out: Vec<u8> = Vec::new();
        let mut printed = String::new();
        write_delta(&mut out, &mut printed, "Hel").expect("write");
        write_delta(&mut out, &mut printed, "Hello wor").expect("write");
        write_delta(&mut out, &mut printed, "Hello wor").expect("write");
        write_delta(&mut out, &mut printed, "Hello world").expect("write");
        assert_eq!(String::from_utf8(out).expect("utf8"), "Hello world");
    }

    #[test]
    fn content_that_shrinks_is_held_back() {
        let mut out: Vec<u8> = Vec::new();
        let mut printed = String::from("Hello <|im_");
        write_delta(&mut out, &mut printed, "Hello ").expect("write");
        assert!(out.is_empty());
        assert_eq!(printed, "Hello <|im_");
    }

    #[tokio::test]
    async fn reply_is_streamed_and_saved_in_a_new_conversation() {
        let server = serve_once(CannedResponse::text_chunks(200, &["Hel", "lo wor", "ld"])).await;
        let api = ApiClient::new(server.base_url.clone(), None).expect("client");
        let mut controller = controller();
        let before = controller.store().conversations().len();
        let mut out: Vec<u8> = Vec::new();

        let outcome = stream_reply(
            &mut controller,
            &api,
            Some("tok"),
            "Say hello".to_string(),
            &mut out,
        )
        .await
        .expect("reply");

        assert!(matches!(outcome, SendOutcome::Completed { .. }));
        assert_eq!(String::from_utf8(out).expect("utf8"), "Hello world\n");

        let store = controller.store();
        assert_eq!(store.conversations().len(), before + 1);
        let active = store.active();
        assert_eq!(active.title, "Say hello");
        assert_eq!(active.messages.len(), 2);
        assert_eq!(active.messages[0].role, Role::User);
        assert_eq!(active.messages[1].content, "Hello world");
        assert!(server.request().await.contains("\"message\":\"Say hello\""));
    }

    #[tokio::test]
    async fn unreachable_server_reports_failure() {
        let api = ApiClient::new(unused_local_url().await, None).expect("client");
        let mut controller = controller();
        let mut out: Vec<u8> = Vec::new();

        let outcome = stream_reply(&mut controller, &api, Some("tok"), "Hi".to_string(), &mut out)
            .await
            .expect("outcome");

        match outcome {
            SendOutcome::Failed { error, .. } => {
                assert!(matches!(error, StreamError::Network(_)))
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn missing_token_is_rejected_before_sending() {
        let api = ApiClient::new(unused_local_url().await, None).expect("client");
        let mut controller = controller();
        let mut out: Vec<u8> = Vec::new();
        let before = controller.store().conversations().to_vec();

        let result = stream_reply(&mut controller, &api, None, "Hi".to_string(), &mut out).await;

        assert!(result.is_err());
        assert!(out.is_empty());
        assert_eq!(controller.store().conversations(), before.as_slice());
    }

    #[tokio::test]
    async fn blank_prompt_creates_no_conversation() {
        let api = ApiClient::new(unused_local_url().await, None).expect("client");
        let mut controller = controller();
        let mut out: Vec<u8> = Vec::new();

        let result =
            stream_reply(&mut controller, &api, Some("tok"), "   ".to_string(), &mut out).await;

        assert!(result.is_err());
        assert_eq!(controller.store().conversations().len(), 1);
    }
}
