//! Event loop of the full-screen client.
//!
//! Terminal input is read on a background task and delivered over a
//! channel, next to stream updates and finished auth requests. All state
//! lives in [`ChatApp`] and is only touched from this loop.

use std::error::Error;
use std::time::{Duration, Instant};

use ratatui::crossterm::event::{self, Event, KeyEventKind};
use ratatui::layout::Rect;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::auth;
use crate::core::chat_stream::ChatStreamService;
use crate::ui::app::{AppCommand, AuthResult, ChatApp};
use crate::ui::lifecycle::{restore_terminal, setup_terminal, ChatTerminal};
use crate::ui::render::{draw, update_scroll_bounds};

const MAX_FPS: u64 = 60;
const TICK: Duration = Duration::from_millis(50);

fn spawn_event_reader(event_tx: mpsc::UnboundedSender<Event>) -> tokio::task::JoinHandle<()> {
    tokio::task::spawn_blocking(move || loop {
        match event::poll(Duration::from_millis(50)) {
            Ok(true) => match event::read() {
                Ok(ev) => {
                    if event_tx.send(ev).is_err() {
                        break;
                    }
                }
                Err(_) => continue,
            },
            Ok(false) => {
                if event_tx.is_closed() {
                    break;
                }
            }
            Err(_) => break,
        }
    })
}

fn execute_command(
    command: AppCommand,
    app: &ChatApp,
    stream_service: &ChatStreamService,
    auth_tx: &mpsc::UnboundedSender<AuthResult>,
) {
    match command {
        AppCommand::SpawnStream(params) => {
            debug!(stream_id = params.stream_id, "Spawning stream");
            stream_service.spawn_stream(params);
        }
        AppCommand::Login { username, password } => {
            let api = app.api.clone();
            let tx = auth_tx.clone();
            tokio::spawn(async move {
                let result = auth::login(&api, &username, &password).await;
                let _ = tx.send(AuthResult::LoggedIn(result));
            });
        }
        AppCommand::Signup { username, password } => {
            let api = app.api.clone();
            let tx = auth_tx.clone();
            tokio::spawn(async move {
                let result = auth::signup(&api, &username, &password).await;
                let _ = tx.send(AuthResult::SignedUp(result));
            });
        }
    }
}

fn handle_terminal_event(
    ev: Event,
    app: &mut ChatApp,
    stream_service: &ChatStreamService,
    auth_tx: &mpsc::UnboundedSender<AuthResult>,
) {
    let command = match ev {
        Event::Key(key) if key.kind == KeyEventKind::Press => app.handle_key(&key),
        Event::Paste(text) => app.handle_paste(&text),
        _ => None,
    };
    if let Some(command) = command {
        execute_command(command, app, stream_service, auth_tx);
    }
}

fn try_draw_frame(
    terminal: &mut ChatTerminal,
    app: &mut ChatApp,
    request_redraw: &mut bool,
    last_draw: &mut Instant,
) -> Result<(), Box<dyn Error>> {
    let frame_duration = Duration::from_millis(1000 / MAX_FPS);
    if !*request_redraw || last_draw.elapsed() < frame_duration {
        return Ok(());
    }
    let size = terminal.size()?;
    update_scroll_bounds(app, Rect::new(0, 0, size.width, size.height));
    terminal.draw(|f| draw(f, app))?;
    *last_draw = Instant::now();
    *request_redraw = false;
    Ok(())
}

async fn event_loop(terminal: &mut ChatTerminal, app: &mut ChatApp) -> Result<(), Box<dyn Error>> {
    let (stream_service, mut stream_rx) = ChatStreamService::new();
    let (auth_tx, mut auth_rx) = mpsc::unbounded_channel::<AuthResult>();
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<Event>();
    let _reader = spawn_event_reader(event_tx);

    let mut tick = tokio::time::interval(TICK);
    let mut last_draw = Instant::now() - Duration::from_secs(1);
    let mut request_redraw = true;

    loop {
        if app.exit_requested {
            return Ok(());
        }
        try_draw_frame(terminal, app, &mut request_redraw, &mut last_draw)?;

        tokio::select! {
            Some(ev) = event_rx.recv() => {
                handle_terminal_event(ev, app, &stream_service, &auth_tx);
                while let Ok(ev) = event_rx.try_recv() {
                    handle_terminal_event(ev, app, &stream_service, &auth_tx);
                }
                request_redraw = true;
            }
            Some((message, stream_id)) = stream_rx.recv() => {
                app.handle_stream_message(stream_id, message);
                while let Ok((message, stream_id)) = stream_rx.try_recv() {
                    app.handle_stream_message(stream_id, message);
                }
                request_redraw = true;
            }
            Some(result) = auth_rx.recv() => {
                app.handle_auth_result(result);
                request_redraw = true;
            }
            _ = tick.tick() => {}
        }

        if app.drain_store_events() {
            request_redraw = true;
        }
    }
}

/// Run the interactive client until the user quits.
pub async fn run_chat(mut app: ChatApp) -> Result<(), Box<dyn Error>> {
    info!(base_url = %app.api.base_url(), "Starting chat UI");
    let mut terminal = setup_terminal()?;

    let result = event_loop(&mut terminal, &mut app).await;

    app.shutdown();
    let restored = restore_terminal(&mut terminal);
    result?;
    restored
}
