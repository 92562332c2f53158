//! Digest Chat - CLI Tool
//!
//! Command-line client: account management, digests, articles and an
//! interactive streaming chat.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use digest_chat::chat::types::{CreateSessionRequest, GenerateRequest, ServerFrame};
use digest_chat::client::{
    ApiClient, ChatSessionClient, ClientError, CredentialStore, SendOutcome, SessionUpdate,
    StoredCredentials,
};
use digest_chat::store::ArticleFilter;
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "digest-chat")]
#[command(about = "CLI for Digest Chat")]
struct Cli {
    /// Digest Chat server URL
    #[arg(
        long,
        env = "DIGEST_SERVER_URL",
        default_value = "http://localhost:8080"
    )]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an account and log in
    Signup {
        #[arg(long)]
        email: String,

        /// Display name
        #[arg(long)]
        name: String,

        #[arg(long, env = "DIGEST_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// Log in and save the tokens locally
    Login {
        #[arg(long)]
        email: String,

        #[arg(long, env = "DIGEST_PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// Revoke the saved refresh token and forget it
    Logout {
        /// Revoke every session of this account
        #[arg(long)]
        all: bool,
    },

    /// Show the logged-in user
    Me,

    /// Digest operations
    Digests {
        #[command(subcommand)]
        action: DigestAction,
    },

    /// List articles
    Articles {
        /// Only articles tagged with this topic
        #[arg(long)]
        topic: Option<String>,

        /// Only articles from this feed
        #[arg(long)]
        feed: Option<Uuid>,

        /// Text to look for in titles and summaries
        #[arg(short, long)]
        search: Option<String>,

        #[arg(short, long, default_value = "20")]
        limit: usize,

        #[arg(long, default_value = "0")]
        offset: usize,
    },

    /// Chat session operations
    Sessions {
        #[command(subcommand)]
        action: SessionAction,
    },

    /// Interactive streaming chat
    Chat {
        /// Resume this session (a new one is created otherwise)
        session: Option<Uuid>,

        /// Ground a new session on this digest
        #[arg(long)]
        digest: Option<Uuid>,
    },

    /// One-shot question, no transcript
    Ask {
        prompt: String,

        /// Ground the answer on this digest
        #[arg(long)]
        digest: Option<Uuid>,
    },
}

#[derive(Subcommand)]
enum DigestAction {
    /// List your digests, newest first
    List {
        #[arg(short, long, default_value = "20")]
        limit: usize,

        #[arg(long, default_value = "0")]
        offset: usize,
    },

    /// Show a digest and its articles
    Show { id: Uuid },
}

#[derive(Subcommand)]
enum SessionAction {
    /// List your chat sessions
    List {
        #[arg(short, long, default_value = "20")]
        limit: usize,

        #[arg(long, default_value = "0")]
        offset: usize,
    },

    /// Create a chat session
    New {
        #[arg(long)]
        digest: Option<Uuid>,

        #[arg(short, long)]
        title: Option<String>,
    },

    /// Print a session transcript
    Show { id: Uuid },

    /// Delete a session and its transcript
    Delete { id: Uuid },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let store = CredentialStore::default_location()?;
    let saved = store.load(&cli.server);

    let mut api = ApiClient::new(&cli.server)?;
    if let Some(ref saved) = saved {
        api = api.with_credentials(saved.tokens.clone());
    }

    let manages_credentials = matches!(
        cli.command,
        Commands::Signup { .. } | Commands::Login { .. } | Commands::Logout { .. }
    );

    let result = match cli.command {
        Commands::Signup {
            email,
            name,
            password,
        } => handle_signup(&api, &store, &email, &name, &password).await,
        Commands::Login { email, password } => {
            handle_login(&api, &store, &email, &password).await
        }
        Commands::Logout { all } => handle_logout(&api, &store, all).await,
        Commands::Me => handle_me(&api).await,
        Commands::Digests { action } => handle_digests(&api, action).await,
        Commands::Articles {
            topic,
            feed,
            search,
            limit,
            offset,
        } => {
            let filter = ArticleFilter {
                topic,
                feed_id: feed,
                search,
            };
            handle_articles(&api, &filter, limit, offset).await
        }
        Commands::Sessions { action } => handle_sessions(&api, action).await,
        Commands::Chat { session, digest } => handle_chat(&api, session, digest).await,
        Commands::Ask { prompt, digest } => handle_ask(&api, prompt, digest).await,
    };

    if !manages_credentials {
        sync_credentials(&api, &store, saved).await?;
    }

    match result {
        Err(e) if matches!(e.downcast_ref::<ClientError>(), Some(ClientError::SessionExpired)) => {
            anyhow::bail!("Session expired. Run `digest-chat login` again.")
        }
        other => other,
    }
}

/// Persist rotated tokens, or forget them once the server dropped the session
async fn sync_credentials(
    api: &ApiClient,
    store: &CredentialStore,
    saved: Option<StoredCredentials>,
) -> Result<()> {
    let Some(saved) = saved else {
        return Ok(());
    };
    match api.credentials().await {
        Some(tokens) if tokens != saved.tokens => store.save(&StoredCredentials { tokens, ..saved }),
        Some(_) => Ok(()),
        None => store.clear(),
    }
}

async fn handle_signup(
    api: &ApiClient,
    store: &CredentialStore,
    email: &str,
    name: &str,
    password: &str,
) -> Result<()> {
    let auth = api.signup(email, password, name).await?;
    store.save(&StoredCredentials {
        server: api.base_url().to_string(),
        email: auth.user.email.clone(),
        tokens: (&auth).into(),
    })?;
    println!("Account created for {} <{}>", auth.user.name, auth.user.email);
    Ok(())
}

async fn handle_login(
    api: &ApiClient,
    store: &CredentialStore,
    email: &str,
    password: &str,
) -> Result<()> {
    let auth = api.login(email, password).await?;
    store.save(&StoredCredentials {
        server: api.base_url().to_string(),
        email: auth.user.email.clone(),
        tokens: (&auth).into(),
    })?;
    println!("Logged in as {} <{}>", auth.user.name, auth.user.email);
    Ok(())
}

async fn handle_logout(api: &ApiClient, store: &CredentialStore, all: bool) -> Result<()> {
    let result = api.logout(all).await;
    store.clear()?;
    result?;
    println!("Logged out");
    Ok(())
}

async fn handle_me(api: &ApiClient) -> Result<()> {
    let user = api.me().await?;
    println!("ID:    {}", user.id);
    println!("Name:  {}", user.name);
    println!("Email: {}", user.email);
    Ok(())
}

async fn handle_digests(api: &ApiClient, action: DigestAction) -> Result<()> {
    match action {
        DigestAction::List { limit, offset } => {
            let page = api.list_digests(limit, offset).await?;
            println!("{:<36} {:<10} {:<8} {}", "ID", "DATE", "ARTICLES", "TITLE");
            println!("{}", "-".repeat(80));
            for digest in &page.items {
                println!(
                    "{:<36} {:<10} {:<8} {}",
                    digest.id,
                    digest.date,
                    digest.article_ids.len(),
                    digest.title
                );
            }
            print_page_footer(page.items.len(), page.total, page.has_more);
        }
        DigestAction::Show { id } => {
            let detail = api.get_digest(id).await?;
            println!("{} ({})", detail.digest.title, detail.digest.date);
            if let Some(ref summary) = detail.digest.summary {
                println!("\n{}", summary);
            }
            println!();
            for (i, article) in detail.articles.iter().enumerate() {
                println!("{:>2}. {} - {}", i + 1, article.title, article.source);
                println!("    {}", article.url);
            }
        }
    }
    Ok(())
}

async fn handle_articles(
    api: &ApiClient,
    filter: &ArticleFilter,
    limit: usize,
    offset: usize,
) -> Result<()> {
    let page = api.list_articles(filter, limit, offset).await?;
    println!("{:<36} {:<16} {:<20} {}", "ID", "PUBLISHED", "SOURCE", "TITLE");
    println!("{}", "-".repeat(100));
    for article in &page.items {
        println!(
            "{:<36} {:<16} {:<20} {}",
            article.id,
            article.published_at.format("%Y-%m-%d %H:%M"),
            truncate(&article.source, 20),
            article.title
        );
    }
    print_page_footer(page.items.len(), page.total, page.has_more);
    Ok(())
}

async fn handle_sessions(api: &ApiClient, action: SessionAction) -> Result<()> {
    match action {
        SessionAction::List { limit, offset } => {
            let page = api.list_sessions(limit, offset).await?;
            println!("{:<36} {:<16} {:<5} {}", "ID", "UPDATED", "MSGS", "TITLE");
            println!("{}", "-".repeat(80));
            for session in &page.items {
                println!(
                    "{:<36} {:<16} {:<5} {}",
                    session.id,
                    session.updated_at.format("%Y-%m-%d %H:%M"),
                    session.message_count,
                    session.title.as_deref().unwrap_or("(untitled)")
                );
            }
            print_page_footer(page.items.len(), page.total, page.has_more);
        }
        SessionAction::New { digest, title } => {
            let created = api
                .create_session(&CreateSessionRequest {
                    digest_id: digest,
                    title,
                })
                .await?;
            println!("Created session: {}", created.session_id);
        }
        SessionAction::Show { id } => {
            for message in api.load_transcript(id).await? {
                println!("[{:?}] {}", message.role, message.content);
                for citation in message.citations.iter().flatten() {
                    println!("    source: {} <{}>", citation.title, citation.url);
                }
            }
        }
        SessionAction::Delete { id } => {
            api.delete_session(id).await?;
            println!("Deleted session: {}", id);
        }
    }
    Ok(())
}

async fn handle_ask(api: &ApiClient, prompt: String, digest: Option<Uuid>) -> Result<()> {
    let resp = api
        .generate(&GenerateRequest {
            prompt,
            session_id: None,
            digest_id: digest,
        })
        .await?;
    println!("{}", resp.text);
    for source in &resp.sources {
        println!("  source: {} <{}>", source.title, source.uri);
    }
    print_follow_ups(&resp.follow_up_questions);
    Ok(())
}

async fn handle_chat(api: &ApiClient, session: Option<Uuid>, digest: Option<Uuid>) -> Result<()> {
    let session_id = match session {
        Some(id) => id,
        None => {
            let created = api
                .create_session(&CreateSessionRequest {
                    digest_id: digest,
                    title: None,
                })
                .await?;
            created.session_id
        }
    };

    let client = ChatSessionClient::connect(api, session_id).await?;
    for message in client.messages().await {
        println!("[{:?}] {}", message.role, message.content);
    }
    println!("Session {} (empty line or Ctrl-D to quit)", session_id);

    let mut updates = client.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush().context("Failed to flush stdout")?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        if line.trim().is_empty() {
            break;
        }

        match client.send_message(&line).await? {
            SendOutcome::Sent => {}
            SendOutcome::RejectedEmpty => continue,
            SendOutcome::NotConnected => {
                eprintln!("Connection closed");
                break;
            }
        }
        if !print_reply(&mut updates).await? {
            eprintln!("Connection closed");
            break;
        }
    }

    client.disconnect().await;
    Ok(())
}

/// Print frames until the reply completes. Returns false if the stream closed.
async fn print_reply(updates: &mut broadcast::Receiver<SessionUpdate>) -> Result<bool> {
    loop {
        let update = match updates.recv().await {
            Ok(update) => update,
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => return Ok(false),
        };
        match update {
            SessionUpdate::Frame(ServerFrame::ContentChunk { content }) => {
                print!("{}", content);
                std::io::stdout().flush().context("Failed to flush stdout")?;
            }
            SessionUpdate::Frame(ServerFrame::MessageComplete {
                citations,
                follow_up_questions,
                ..
            }) => {
                println!();
                for citation in &citations {
                    println!("  source: {} <{}>", citation.title, citation.url);
                }
                print_follow_ups(&follow_up_questions);
                return Ok(true);
            }
            SessionUpdate::Frame(ServerFrame::Error { message }) => {
                eprintln!("\nError: {}", message);
                return Ok(true);
            }
            SessionUpdate::Disconnected(_) => return Ok(false),
            _ => {}
        }
    }
}

fn print_follow_ups(questions: &[String]) {
    if questions.is_empty() {
        return;
    }
    println!("Follow-up questions:");
    for question in questions {
        println!("  - {}", question);
    }
}

fn print_page_footer(shown: usize, total: usize, has_more: bool) {
    if has_more {
        println!("({} of {}, use --offset for more)", shown, total);
    } else {
        println!("({} total)", total);
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{}…", head)
    }
}
