//! In-process relay speaking enough NIP-01/NIP-42 for client tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::{Sink, SinkExt, StreamExt};
use nostr::{Event, KIND_CLIENT_AUTH, sort_events, verify_event};
use nostr_client::Filter;
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Clone, Default)]
pub struct MockOptions {
    pub events: Vec<Event>,
    /// Send an AUTH challenge on connect and refuse REQ/EVENT until answered.
    pub require_auth: bool,
    /// Record requests but never answer them.
    pub silent: bool,
    /// Answer every EVENT with `OK false`.
    pub reject_publish: bool,
    /// Drop the socket without a close frame on the first REQ ever received.
    pub drop_first_request: bool,
}

#[derive(Default)]
struct MockState {
    url: String,
    options: MockOptions,
    connections: AtomicUsize,
    dropped: AtomicBool,
    requests: Mutex<Vec<Vec<Filter>>>,
    published: Mutex<Vec<Event>>,
    authenticated: Mutex<Vec<String>>,
}

pub struct MockRelay {
    pub url: String,
    state: Arc<MockState>,
    task: JoinHandle<()>,
}

impl MockRelay {
    pub async fn start(options: MockOptions) -> MockRelay {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock relay");
        let url = format!("ws://{}", listener.local_addr().expect("local addr"));
        let state = Arc::new(MockState {
            url: url.clone(),
            options,
            ..MockState::default()
        });

        let accept_state = Arc::clone(&state);
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let state = Arc::clone(&accept_state);
                tokio::spawn(async move {
                    let _ = serve(stream, state).await;
                });
            }
        });

        MockRelay { url, state, task }
    }

    pub async fn with_events(events: Vec<Event>) -> MockRelay {
        Self::start(MockOptions {
            events,
            ..MockOptions::default()
        })
        .await
    }

    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<Vec<Filter>> {
        self.state.requests.lock().expect("requests lock").clone()
    }

    pub fn published(&self) -> Vec<Event> {
        self.state.published.lock().expect("published lock").clone()
    }

    pub fn authenticated(&self) -> Vec<String> {
        self.state
            .authenticated
            .lock()
            .expect("authenticated lock")
            .clone()
    }
}

impl Drop for MockRelay {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(stream: TcpStream, state: Arc<MockState>) -> Result<(), BoxError> {
    let socket = accept_async(stream).await?;
    let connection = state.connections.fetch_add(1, Ordering::SeqCst);
    let (mut writer, mut reader) = socket.split();
    let challenge = format!("challenge-{connection}");
    let mut authed_as: Option<String> = None;

    if state.options.require_auth {
        send(&mut writer, json!(["AUTH", challenge])).await?;
    }

    while let Some(frame) = reader.next().await {
        let Message::Text(text) = frame? else {
            continue;
        };
        let message: Value = serde_json::from_str(&text)?;
        let Some(array) = message.as_array() else {
            continue;
        };

        match array.first().and_then(Value::as_str) {
            Some("REQ") => {
                let subscription_id = array[1].as_str().unwrap_or_default().to_string();
                let filters: Vec<Filter> = array[2..]
                    .iter()
                    .map(|filter| serde_json::from_value(filter.clone()))
                    .collect::<Result<_, _>>()?;
                state.requests.lock().expect("requests lock").push(filters.clone());

                if state.options.drop_first_request && !state.dropped.swap(true, Ordering::SeqCst)
                {
                    return Ok(());
                }
                if state.options.silent {
                    continue;
                }
                if state.options.require_auth && authed_as.is_none() {
                    send(
                        &mut writer,
                        json!(["CLOSED", subscription_id, "auth-required: members only"]),
                    )
                    .await?;
                    continue;
                }

                for event in matching(&state.options.events, &filters) {
                    send(&mut writer, json!(["EVENT", subscription_id, event])).await?;
                }
                send(&mut writer, json!(["EOSE", subscription_id])).await?;
            }
            Some("EVENT") => {
                let event: Event = serde_json::from_value(array[1].clone())?;
                if state.options.silent {
                    continue;
                }
                let (accepted, reason) = if state.options.require_auth && authed_as.is_none() {
                    (false, "auth-required: members only")
                } else if state.options.reject_publish {
                    (false, "blocked: not accepting events")
                } else {
                    state.published.lock().expect("published lock").push(event.clone());
                    (true, "")
                };
                send(&mut writer, json!(["OK", event.id, accepted, reason])).await?;
            }
            Some("AUTH") => {
                let event: Event = serde_json::from_value(array[1].clone())?;
                let has_tag = |name: &str, value: &str| {
                    event
                        .tags
                        .iter()
                        .any(|tag| tag.len() >= 2 && tag[0] == name && tag[1] == value)
                };
                let valid = event.kind == KIND_CLIENT_AUTH
                    && verify_event(&event).unwrap_or(false)
                    && has_tag("challenge", &challenge)
                    && has_tag("relay", &state.url);
                if valid {
                    authed_as = Some(event.pubkey.clone());
                    state
                        .authenticated
                        .lock()
                        .expect("authenticated lock")
                        .push(event.pubkey.clone());
                }
                let reason = if valid { "" } else { "invalid: bad auth event" };
                send(&mut writer, json!(["OK", event.id, valid, reason])).await?;
            }
            _ => {}
        }
    }
    Ok(())
}

fn matching(events: &[Event], filters: &[Filter]) -> Vec<Event> {
    let mut out = Vec::new();
    for filter in filters {
        let mut matched: Vec<Event> = events
            .iter()
            .filter(|event| filter.matches(event))
            .cloned()
            .collect();
        sort_events(&mut matched);
        if let Some(limit) = filter.limit {
            matched.truncate(limit as usize);
        }
        // Relays are not required to send in order.
        matched.reverse();
        out.extend(matched);
    }
    out
}

async fn send<S>(writer: &mut S, value: Value) -> Result<(), BoxError>
where
    S: Sink<Message> + Unpin,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    writer.send(Message::Text(value.to_string())).await?;
    Ok(())
}

/// A signed kind-`kind` event by `secret_key` at `created_at`.
pub fn signed_event(
    secret_key: &[u8; 32],
    kind: u16,
    created_at: u64,
    tags: Vec<Vec<String>>,
    content: &str,
) -> Event {
    nostr::finalize_event(
        &nostr::EventTemplate {
            created_at,
            kind,
            tags,
            content: content.to_string(),
        },
        secret_key,
    )
    .expect("sign fixture event")
}
