use std::io::{self, Write};

use anyhow::{Context, Result};
use clap::Parser;
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, BufReader},
    sync::mpsc,
};
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Registry};
use transcript::{ChatClient, ChatEvent, ChatState, Effect, DEFAULT_ENDPOINT};

use view::TerminalView;

mod view;

/// Terminal chat against a gemterm relay.
#[derive(Parser, Debug)]
#[command(name = "gemterm", version)]
struct Cli {
    /// Relay chat endpoint
    #[arg(long, env = "GEMTERM_URL", default_value = DEFAULT_ENDPOINT)]
    url: String,
}

enum CliReplActions {
    Submit(String),
    Quit,
    Reprompt,
}

#[tokio::main]
async fn main() -> Result<()> {
    configure_logging()?;
    let cli = Cli::parse();

    let client = ChatClient::new(cli.url);
    let mut view = TerminalView::new(io::stdout());

    println!("Connected to {}", client.endpoint());
    println!("   - Commands available: [ '.quit' ]");
    println!();

    run(BufReader::new(tokio::io::stdin()), &client, &mut view).await
}

/// Feeds `input` lines to the controller until `.quit`, or until the input
/// ends and no reply is still streaming.
async fn run<R, W>(input: R, client: &ChatClient, view: &mut TerminalView<W>) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    let mut state = ChatState::new();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut lines = input.lines();
    let mut input_open = true;

    loop {
        tokio::select! {
            line = lines.next_line(), if input_open => {
                match line.context("failed to read stdin")? {
                    Some(line) => match process_repl_commands(line) {
                        CliReplActions::Submit(prompt) => {
                            if state.is_loading() {
                                view.notice("still streaming; wait for the reply to finish")?;
                            }
                            dispatch(&mut state, ChatEvent::InputChanged(prompt), client, &tx, view)?;
                            dispatch(&mut state, ChatEvent::Submit, client, &tx, view)?;
                        }
                        CliReplActions::Quit => break,
                        CliReplActions::Reprompt => {}
                    },
                    None => input_open = false,
                }
            }
            Some(event) = rx.recv() => {
                dispatch(&mut state, event, client, &tx, view)?;
            }
        }

        if !input_open && !state.is_loading() {
            break;
        }
    }

    Ok(())
}

fn dispatch<W: Write>(
    state: &mut ChatState,
    event: ChatEvent,
    client: &ChatClient,
    tx: &mpsc::UnboundedSender<ChatEvent>,
    view: &mut TerminalView<W>,
) -> Result<()> {
    let was_loading = state.is_loading();
    let mut scroll = false;

    for effect in state.update(event) {
        match effect {
            Effect::SendPrompt { request, prompt } => {
                client.spawn_prompt(request, prompt, tx.clone());
            }
            Effect::ScrollToBottom => scroll = true,
        }
    }

    if scroll || was_loading != state.is_loading() {
        view.render(state).context("failed to write transcript")?;
    }
    Ok(())
}

fn process_repl_commands(input_txt: String) -> CliReplActions {
    match input_txt.trim() {
        ".quit" => CliReplActions::Quit,
        "" => CliReplActions::Reprompt,
        _ => CliReplActions::Submit(input_txt),
    }
}

fn configure_logging() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let subscriber = Registry::default().with(filter).with(
        fmt::layer()
            .compact()
            .with_target(false)
            .with_writer(io::stderr),
    );

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to install tracing subscriber")
}
