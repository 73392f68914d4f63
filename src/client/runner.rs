//! Client execution logic: interactive loop, display task, reconnection.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::StreamExt;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::protocol::Message;

use crate::protocol::{ClientEvent, Role, SenderClass, ServerEvent};

use super::error::SessionError;
use super::formatter::MessageFormatter;
use super::retention::RetentionStore;
use super::session::{CrisisSession, MessageTransport, SessionConfig};
use super::transport::{build_ws_url, IdentityParams, WsSource, WsTransport};

/// Options for one client run
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Server WebSocket URL, without identity query parameters
    pub url: String,
    pub participant_id: String,
    pub case_id: String,
    pub role: Role,
    pub display_name: String,
}

/// Redisplay the prompt after printing output over it
fn redisplay_prompt(participant_id: &str) {
    print!("{}> ", participant_id);
    std::io::stdout().flush().ok();
}

/// Run the interactive crisis chat client.
///
/// Connects with the given identity, joins the own room automatically when
/// running as the person in crisis, and reads input lines until exit.
/// Every exit path wipes all locally held message content.
pub async fn run_client(options: ClientOptions) -> Result<(), Box<dyn std::error::Error>> {
    let identity = IdentityParams {
        participant_id: options.participant_id.clone(),
        case_id: options.case_id.clone(),
        role: options.role,
        display_name: options.display_name.clone(),
    };
    let ws_url = build_ws_url(&options.url, &identity);

    let (transport, reader_rx) = WsTransport::new(ws_url);
    let transport = Arc::new(transport);
    transport.reconnect().await?;
    tracing::info!("Connected to crisis chat server");

    let retention = Arc::new(RetentionStore::new());
    let session = CrisisSession::new(
        SessionConfig::new(options.case_id.clone(), options.participant_id.clone()),
        transport.clone(),
        retention,
    );
    session.start().await;

    // The person in crisis lands in their own room right away; helpers
    // pick a room with /join
    if options.role == Role::User {
        transport.send_event(&ClientEvent::JoinOwnRoom).await?;
    }

    println!(
        "\nYou are '{}' ({}). Type messages and press Enter to send.",
        options.participant_id, options.role
    );
    println!("Commands: /join <user-id>, /panic [description], /subscribe, /unsubscribe, /status");
    println!("Press Ctrl+C or Ctrl+D to leave (local messages are wiped on exit).\n");

    let shutting_down = Arc::new(AtomicBool::new(false));
    let (exit_tx, mut exit_rx) = oneshot::channel::<()>();
    let display_task = tokio::spawn(display_loop(
        reader_rx,
        session.clone(),
        options.participant_id.clone(),
        shutting_down.clone(),
        exit_tx,
    ));

    // Rustyline is synchronous; run it on a dedicated thread and bridge
    // lines through a channel
    let (input_tx, mut input_rx) = mpsc::unbounded_channel::<String>();
    let prompt_id = options.participant_id.clone();
    let _readline_handle = std::thread::spawn(move || {
        let mut rl = match DefaultEditor::new() {
            Ok(rl) => rl,
            Err(e) => {
                eprintln!("Failed to initialize readline: {}", e);
                return;
            }
        };

        let prompt = format!("{}> ", prompt_id);
        loop {
            match rl.readline(&prompt) {
                Ok(line) => {
                    let line = line.trim();
                    if !line.is_empty() {
                        rl.add_history_entry(line).ok();
                        if input_tx.send(line.to_string()).is_err() {
                            break;
                        }
                    }
                }
                Err(ReadlineError::Interrupted) => {
                    tracing::info!("Interrupted");
                    break;
                }
                Err(ReadlineError::Eof) => {
                    tracing::info!("EOF");
                    break;
                }
                Err(err) => {
                    tracing::error!("Readline error: {}", err);
                    break;
                }
            }
        }
    });

    // Helpers address the room they joined; the person in crisis always
    // writes to their own room
    let mut current_target: Option<String> = None;
    let sender_class = SenderClass::from_role(options.role);

    loop {
        // Stop reading input once the display loop has ended the session,
        // so no line lands in a torn-down session
        let line = tokio::select! {
            line = input_rx.recv() => match line {
                Some(line) => line,
                None => break,
            },
            _ = &mut exit_rx => break,
        };

        if let Some(command_result) = handle_command(
            &line,
            options.role,
            &transport,
            &session,
            &mut current_target,
        )
        .await
        {
            if let Err(e) = command_result {
                println!("! {}", e);
            }
            redisplay_prompt(&options.participant_id);
            continue;
        }

        match session
            .send_message(&line, sender_class, current_target.as_deref())
            .await
        {
            Ok(message) => match message.status {
                crate::protocol::MessageStatus::Sent => {
                    print!("{}", MessageFormatter::format_sent_confirmation(message.timestamp));
                }
                _ => {
                    println!("! Message not delivered, queued for retry after reconnect");
                }
            },
            Err(SessionError::EmptyMessage) => {}
            Err(e) => println!("! {}", e),
        }
        redisplay_prompt(&options.participant_id);
    }

    // Teardown: every exit path wipes local message content
    shutting_down.store(true, Ordering::SeqCst);
    transport.close().await;
    display_task.abort();
    session.close_session().await;
    session.force_cleanup().await;
    println!("\nSession ended. Local messages wiped.");

    Ok(())
}

/// Interpret a slash command; `None` means the line is a chat message
async fn handle_command<T: MessageTransport + 'static>(
    line: &str,
    role: Role,
    transport: &WsTransport,
    session: &Arc<CrisisSession<T>>,
    current_target: &mut Option<String>,
) -> Option<Result<(), String>> {
    if !line.starts_with('/') {
        return None;
    }

    let mut parts = line.splitn(2, ' ');
    let command = parts.next().unwrap_or_default();
    let argument = parts.next().map(str::trim).filter(|s| !s.is_empty());

    let result = match command {
        "/join" => match argument {
            Some(target) => {
                if role == Role::User {
                    Err("only volunteers and admins can join another room".to_string())
                } else {
                    *current_target = Some(target.to_string());
                    transport
                        .send_event(&ClientEvent::JoinAsHelper {
                            target_user_id: target.to_string(),
                        })
                        .await
                        .map_err(|e| e.to_string())
                }
            }
            None => Err("usage: /join <user-id>".to_string()),
        },
        "/panic" => transport
            .send_event(&ClientEvent::EmergencyTrigger {
                severity: None,
                description: argument.map(str::to_string),
            })
            .await
            .map_err(|e| e.to_string()),
        "/subscribe" => transport
            .send_event(&ClientEvent::AdminSubscribe)
            .await
            .map_err(|e| e.to_string()),
        "/unsubscribe" => transport
            .send_event(&ClientEvent::AdminUnsubscribe)
            .await
            .map_err(|e| e.to_string()),
        "/status" => {
            let snapshot = session.snapshot().await;
            print!(
                "{}",
                MessageFormatter::format_connection_status(
                    snapshot.status,
                    snapshot.error.as_deref()
                )
            );
            println!(
                "{} message(s), {} unsent",
                snapshot.message_count, snapshot.unsent_count
            );
            Ok(())
        }
        _ => Err(format!("unknown command: {}", command)),
    };

    Some(result)
}

/// Consume read halves of successive connections and render server events.
///
/// When a connection drops the session controller reconnects with backoff
/// and re-drives unsent messages; the next read half then arrives on the
/// channel and the loop continues.
async fn display_loop<T: MessageTransport + 'static>(
    mut reader_rx: mpsc::UnboundedReceiver<WsSource>,
    session: Arc<CrisisSession<T>>,
    participant_id: String,
    shutting_down: Arc<AtomicBool>,
    exit_tx: oneshot::Sender<()>,
) {
    while let Some(mut read) = reader_rx.recv().await {
        while let Some(message) = read.next().await {
            match message {
                Ok(Message::Text(text)) => {
                    let event = match serde_json::from_str::<ServerEvent>(&text) {
                        Ok(event) => event,
                        Err(_) => {
                            print!("{}", MessageFormatter::format_raw_message(&text));
                            redisplay_prompt(&participant_id);
                            continue;
                        }
                    };

                    if let ServerEvent::MessageReceive(wire) = &event
                        && wire.user_id != participant_id
                    {
                        session.receive_message(wire).await;
                    }

                    if let Some(formatted) = MessageFormatter::format_event(&event, &participant_id)
                    {
                        print!("{}", formatted);
                        redisplay_prompt(&participant_id);
                    }

                    // The server closes right after an auth error
                    if let ServerEvent::AuthError { .. } = event {
                        shutting_down.store(true, Ordering::SeqCst);
                    }
                }
                Ok(Message::Close(_)) => {
                    tracing::info!("Server closed the connection");
                    break;
                }
                Err(e) => {
                    tracing::warn!("WebSocket read error: {}", e);
                    break;
                }
                _ => {}
            }
        }

        if shutting_down.load(Ordering::SeqCst) {
            break;
        }

        println!("\nConnection lost. Attempting to reconnect...");
        match session.handle_connection_loss().await {
            Ok(()) => {
                println!("Reconnected.");
                redisplay_prompt(&participant_id);
            }
            Err(e) => {
                println!("! {}", e);
                // Terminal state; wipe before giving up
                session.force_cleanup().await;
                break;
            }
        }
    }

    // Whichever way the loop ends, tell the input loop to stop prompting
    let _ = exit_tx.send(());
}
