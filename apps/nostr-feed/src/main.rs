#![allow(clippy::print_stdout)]
#![cfg_attr(test, allow(clippy::expect_used))]

use std::env;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use nostr::{Event, EventKind, FEED_KINDS, encode_note, encode_npub, nip19};
use nostr_client::{
    CancellationToken, ClientConfig, FeedPaginator, FeedQuery, FollowingResolver,
    FollowingState, Identity, NostrSession, Profile, SecretKeySigner, fetch_author_events,
    fetch_event, fetch_profile,
};
use tracing::{debug, info};

const PUBLISH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(name = "nostr-feed")]
#[command(about = "Read Nostr feeds and publish notes")]
struct Cli {
    /// Relay to read from; overrides NOSTR_RELAY_URL.
    #[arg(long, global = true)]
    relay: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Latest notes and pictures from everyone on the relay.
    Global(PageArgs),
    /// Latest notes and pictures from accounts you follow.
    Following(PageArgs),
    /// An author's profile and recent events.
    Author(AuthorArgs),
    /// A single event by id.
    Event(EventArgs),
    /// Publish a text note.
    Post(PostArgs),
}

#[derive(Args)]
struct PageArgs {
    #[arg(long, default_value_t = 1)]
    pages: usize,
}

#[derive(Args)]
struct AuthorArgs {
    /// Hex pubkey, npub or nprofile.
    author: String,
    #[arg(long, value_delimiter = ',', default_values_t = FEED_KINDS.to_vec())]
    kinds: Vec<u16>,
}

#[derive(Args)]
struct EventArgs {
    /// Hex event id, note or nevent.
    id: String,
}

#[derive(Args)]
struct PostArgs {
    content: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = ClientConfig::from_env().context("load client config")?;
    if let Some(relay) = cli.relay {
        config.relay_url = nostr_client::normalize_relay_url(&relay)?;
    }
    let identity = identity_from_env()?;
    let session = NostrSession::new(&config, identity);
    info!(relay = %config.relay_url, "using relay");

    let signal = CancellationToken::new();
    let ctrl_c = signal.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let result = match cli.command {
        Commands::Global(args) => {
            let query = FeedQuery::global().with_limit(config.feed_page_size);
            print_feed(&session, query, args.pages, &signal).await
        }
        Commands::Following(args) => run_following(&session, &config, args, &signal).await,
        Commands::Author(args) => run_author(&session, args, &signal).await,
        Commands::Event(args) => run_event(&session, args, &signal).await,
        Commands::Post(args) => run_post(&session, args).await,
    };
    session.close().await;
    result
}

/// `NOSTR_SECRET_KEY` (hex or nsec) gives a signing identity, `NOSTR_PUBKEY`
/// (hex or npub) a read-only one.
fn identity_from_env() -> Result<Option<Identity>> {
    if let Some(secret) = env_value("NOSTR_SECRET_KEY") {
        let signer = SecretKeySigner::parse(&secret).context("invalid NOSTR_SECRET_KEY")?;
        return Ok(Some(Identity::with_signer(Arc::new(signer))));
    }
    match env_value("NOSTR_PUBKEY") {
        Some(pubkey) => Ok(Some(Identity::read_only(
            parse_pubkey(&pubkey).context("invalid NOSTR_PUBKEY")?,
        ))),
        None => Ok(None),
    }
}

fn env_value(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_pubkey(input: &str) -> Result<String> {
    let input = input.trim();
    if is_hex_key(input) {
        return Ok(input.to_ascii_lowercase());
    }
    match nip19::decode(input).ok().as_ref().and_then(nip19::Nip19Entity::pubkey) {
        Some(pubkey) => Ok(pubkey.to_string()),
        None => bail!("expected a hex pubkey, npub or nprofile, got {input:?}"),
    }
}

fn parse_event_id(input: &str) -> Result<String> {
    let input = input.trim();
    if is_hex_key(input) {
        return Ok(input.to_ascii_lowercase());
    }
    match nip19::decode(input).ok().as_ref().and_then(nip19::Nip19Entity::event_id) {
        Some(id) => Ok(id.to_string()),
        None => bail!("expected a hex event id, note or nevent, got {input:?}"),
    }
}

fn is_hex_key(input: &str) -> bool {
    input.len() == 64 && input.chars().all(|c| c.is_ascii_hexdigit())
}

async fn print_feed(
    session: &NostrSession,
    query: FeedQuery,
    pages: usize,
    signal: &CancellationToken,
) -> Result<()> {
    let mut feed = FeedPaginator::new(query);
    for _ in 0..pages.max(1) {
        let page = feed.fetch_next(session, signal).await?;
        for event in &page.events {
            print_event(event);
        }
        if !page.has_more() {
            println!("-- end of feed --");
            break;
        }
        debug!(cursor = ?feed.cursor(), "page loaded");
    }
    Ok(())
}

async fn run_following(
    session: &NostrSession,
    config: &ClientConfig,
    args: PageArgs,
    signal: &CancellationToken,
) -> Result<()> {
    let Some(identity) = session.identity() else {
        bail!("set NOSTR_SECRET_KEY or NOSTR_PUBKEY to read your following feed");
    };

    let mut resolver = FollowingResolver::new(Some(identity.pubkey().to_string()));
    if let FollowingState::Failed(message) = resolver.resolve(session, signal).await {
        bail!("could not load who you follow: {message}");
    }
    let Some(query) = resolver.feed_query() else {
        println!("You are not following anyone yet.");
        return Ok(());
    };
    info!(following = resolver.following().len(), "loaded following list");
    print_feed(
        session,
        query.with_limit(config.feed_page_size),
        args.pages,
        signal,
    )
    .await
}

async fn run_author(
    session: &NostrSession,
    args: AuthorArgs,
    signal: &CancellationToken,
) -> Result<()> {
    let pubkey = parse_pubkey(&args.author)?;
    let (profile, events) = tokio::try_join!(
        fetch_profile(session, &pubkey, signal),
        fetch_author_events(session, &pubkey, &args.kinds, signal),
    )?;
    print_profile(&pubkey, profile.as_ref());
    if events.is_empty() {
        println!("No events found.");
    }
    for event in &events {
        print_event(event);
    }
    Ok(())
}

async fn run_event(
    session: &NostrSession,
    args: EventArgs,
    signal: &CancellationToken,
) -> Result<()> {
    let id = parse_event_id(&args.id)?;
    match fetch_event(session, &id, signal).await? {
        Some(event) => print_event(&event),
        None => println!("Event not found."),
    }
    Ok(())
}

async fn run_post(session: &NostrSession, args: PostArgs) -> Result<()> {
    let report = session.publish_note(&args.content, PUBLISH_TIMEOUT).await?;
    println!("Published {}", encode_note(&report.event_id)?);
    for relay in &report.accepted {
        println!("  accepted by {relay}");
    }
    for (relay, reason) in &report.failed {
        println!("  not accepted by {relay}: {reason}");
    }
    Ok(())
}

fn print_profile(pubkey: &str, profile: Option<&Profile>) {
    let npub = encode_npub(pubkey).unwrap_or_else(|_| pubkey.to_string());
    let Some(metadata) = profile.map(|profile| &profile.metadata) else {
        println!("{npub} (no profile)");
        println!();
        return;
    };

    match metadata.preferred_name() {
        Some(name) if metadata.is_bot() => println!("{name} [bot] {npub}"),
        Some(name) => println!("{name} {npub}"),
        None => println!("{npub}"),
    }
    let fields = [
        ("nip05", metadata.nip05()),
        ("website", metadata.website()),
        ("picture", metadata.picture()),
        ("lightning", metadata.lud16()),
    ];
    for (label, value) in fields {
        if let Some(value) = value {
            println!("  {label}: {value}");
        }
    }
    if let Some(about) = metadata.about() {
        for line in about.lines().filter(|line| !line.trim().is_empty()) {
            println!("  {line}");
        }
    }
    println!();
}

fn print_event(event: &Event) {
    let author = encode_npub(&event.pubkey).unwrap_or_else(|_| event.pubkey.clone());
    let kind = event.event_kind();
    println!("[{}] {} {}", kind.label(), event.created_at, author);

    if kind == EventKind::Picture {
        if let Some(title) = nostr::picture::picture_title(event) {
            println!("  {title}");
        }
        for url in nostr::picture::picture_urls(event) {
            println!("  {url}");
        }
        if let Some(alt) = nostr::picture::picture_alt(event) {
            println!("  alt: {alt}");
        }
    }
    for line in event.content.lines().filter(|line| !line.trim().is_empty()) {
        println!("  {line}");
    }
    println!();
}
