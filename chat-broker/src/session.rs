//! Terminal demo: every configured user gets an inbox whose deliveries are
//! printed as JSON lines, while stdin lines are routed through the broker as
//! one chosen user.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::{
    io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader},
    select,
    task::JoinHandle,
};
use tracing::{info, warn};

use crate::{
    broker::Broker,
    cli::Cli,
    error::BrokerError,
    message::{Inbox, Message, inbox},
    shutdown::Shutdown,
};

/// One parsed line of terminal input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input<'a> {
    /// `@bob hello` sends "hello" to bob only.
    Direct { recipient: &'a str, text: &'a str },
    /// Any other text goes to everyone.
    Broadcast(&'a str),
    /// `/join carol`
    Join(&'a str),
    /// `/leave carol`
    Leave(&'a str),
    /// `/quit`
    Quit,
    Empty,
}

pub fn parse_line(line: &str) -> Input<'_> {
    let line = line.trim();
    if line.is_empty() {
        return Input::Empty;
    }
    if line.eq_ignore_ascii_case("/quit") {
        return Input::Quit;
    }
    if let Some(user) = line.strip_prefix("/join ") {
        return Input::Join(user.trim());
    }
    if let Some(user) = line.strip_prefix("/leave ") {
        return Input::Leave(user.trim());
    }
    if let Some(rest) = line.strip_prefix('@') {
        let (recipient, text) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
        return Input::Direct {
            recipient,
            text: text.trim_start(),
        };
    }
    Input::Broadcast(line)
}

#[derive(Serialize)]
struct Delivery<'a> {
    to: &'a str,
    #[serde(flatten)]
    message: &'a Message,
}

struct Session {
    broker: Arc<Broker>,
    sender: String,
    inbox_capacity: usize,
    printers: Vec<JoinHandle<()>>,
}

pub async fn run(cli: Cli) -> Result<()> {
    let sender = cli
        .sender()
        .context("at least one user must be configured")?
        .to_string();

    let broker = Broker::with_config(Shutdown::new(), cli.broker_config());
    let mut session = Session {
        broker: Arc::clone(&broker),
        sender,
        inbox_capacity: cli.inbox_capacity,
        printers: Vec::new(),
    };

    for user in &cli.users {
        session.join(user).await;
    }

    let event_loop = broker.run()?;
    info!(users = ?cli.users, sender = %session.sender, "broker running");

    let mut stdin = BufReader::new(tokio::io::stdin());
    let mut input = String::new();
    run_input_loop(&mut session, &mut stdin, &mut input).await?;

    broker.close();
    if let Err(error) = event_loop.await {
        warn!(?error, "broker event loop failed");
    }

    // Closing every inbox lets the printers finish.
    for user in broker.registry().user_ids().await {
        broker.unregister_user(&user).await;
    }
    for printer in session.printers.drain(..) {
        if let Err(error) = printer.await {
            warn!(?error, "inbox printer failed");
        }
    }

    let stats = broker.stats();
    info!(
        ?stats,
        failed_deliveries = stats.failed_deliveries(),
        "broker stopped"
    );
    Ok(())
}

async fn run_input_loop(
    session: &mut Session,
    stdin: &mut BufReader<tokio::io::Stdin>,
    input: &mut String,
) -> Result<()> {
    loop {
        input.clear();
        select! {
            bytes_read = stdin.read_line(input) => {
                if !handle_stdin_input(bytes_read, input, session).await? {
                    break;
                }
            }
            ctrl_c = tokio::signal::ctrl_c() => {
                handle_ctrl_c(ctrl_c, session.broker.shutdown());
                break;
            }
        }
    }
    Ok(())
}

async fn handle_stdin_input(
    bytes_read: io::Result<usize>,
    input: &str,
    session: &mut Session,
) -> Result<bool> {
    if bytes_read? == 0 {
        return Ok(false);
    }

    match parse_line(input) {
        Input::Empty => Ok(true),
        Input::Quit => {
            write_stdout("*** leaving chat").await?;
            Ok(false)
        }
        Input::Join(user) => {
            session.join(user).await;
            write_stdout(&format!("*** {user} joined")).await?;
            Ok(true)
        }
        Input::Leave(user) => {
            if session.broker.unregister_user(user).await {
                write_stdout(&format!("*** {user} left")).await?;
            } else {
                write_stderr(&format!("!!! {user} is not registered")).await?;
            }
            Ok(true)
        }
        Input::Direct { recipient, text } => {
            let message = Message::direct(session.sender.as_str(), recipient, text);
            submit(&session.broker, message).await
        }
        Input::Broadcast(text) => {
            let message = Message::broadcast(session.sender.as_str(), text);
            submit(&session.broker, message).await
        }
    }
}

async fn submit(broker: &Broker, message: Message) -> Result<bool> {
    match broker.send(message).await {
        Ok(()) => Ok(true),
        Err(error) => {
            write_stderr(&format!("!!! {error}")).await?;
            Ok(!matches!(error, BrokerError::ShutDown | BrokerError::Closed))
        }
    }
}

impl Session {
    async fn join(&mut self, user: &str) {
        let (tx, rx) = inbox(self.inbox_capacity);
        // A displaced sender handed back under `ReturnPrevious` is dropped here,
        // which lets the old printer drain and exit.
        let _ = self.broker.register_user(user, tx).await;
        self.printers.push(spawn_printer(user.to_string(), rx));
    }
}

fn spawn_printer(user: String, mut rx: Inbox) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if let Err(error) = print_delivery(&user, &message).await {
                warn!(user = %user, ?error, "failed to print delivery");
                break;
            }
        }
    })
}

async fn print_delivery(user: &str, message: &Message) -> Result<()> {
    let line = serde_json::to_string(&Delivery { to: user, message })?;
    write_stdout(&line).await?;
    Ok(())
}

fn handle_ctrl_c(result: io::Result<()>, shutdown: &Shutdown) {
    if let Err(error) = result {
        warn!(?error, "ctrl-c handler failed");
    }
    shutdown.trigger();
}

async fn write_stdout(line: &str) -> io::Result<()> {
    write_line(tokio::io::stdout(), line).await
}

async fn write_stderr(line: &str) -> io::Result<()> {
    write_line(tokio::io::stderr(), line).await
}

async fn write_line<W>(mut writer: W, line: &str) -> io::Result<()>
where
    W: tokio::io::AsyncWrite + Unpin,
{
    // One write per line keeps concurrent printers from interleaving.
    let mut buffer = Vec::with_capacity(line.len() + 1);
    buffer.extend_from_slice(line.as_bytes());
    buffer.push(b'\n');
    writer.write_all(&buffer).await?;
    writer.flush().await
}
