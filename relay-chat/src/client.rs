use anyhow::Result;
use tokio::{
    io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader},
    select,
    sync::mpsc::{UnboundedReceiver, UnboundedSender},
};
use tracing::warn;

use crate::{
    cli::ClientArgs,
    connection::{self, Connection},
    conversation::{Change, Conversations},
    event::ChatEvent,
    frame::Frame,
    session::Session,
};

type ChatSession = Session<UnboundedSender<Frame>>;

/// One line typed by the user.
#[derive(Debug, PartialEq, Eq)]
pub enum Input<'a> {
    Public(&'a str),
    Private { peer: &'a str, text: &'a str },
    Peers,
    Quit,
    Usage(&'static str),
}

pub fn parse_input(line: &str) -> Input<'_> {
    let line = line.trim_end_matches(['\r', '\n']);
    let Some(command) = line.strip_prefix('/') else {
        return Input::Public(line);
    };

    let (name, rest) = command.split_once(' ').unwrap_or((command, ""));
    match name.to_ascii_lowercase().as_str() {
        "quit" => Input::Quit,
        "peers" => Input::Peers,
        "msg" => match rest.trim_start().split_once(' ') {
            Some((peer, text)) => Input::Private { peer, text },
            None if !rest.trim().is_empty() => Input::Private {
                peer: rest.trim(),
                text: "",
            },
            None => Input::Usage("usage: /msg <peer> <text>"),
        },
        _ => Input::Usage("commands: /msg <peer> <text>, /peers, /quit"),
    }
}

pub async fn run(args: ClientArgs) -> Result<()> {
    let Connection {
        sender,
        mut receiver,
    } = connection::connect(&args.server).await?;

    let mut session = Session::new(sender);
    session.join(&args.username)?;
    let username = session.username().unwrap_or_default().to_string();
    write_stdout(&format!("*** connected as {username}")).await?;

    let mut stdin = BufReader::new(tokio::io::stdin());
    let mut input = String::new();
    run_client_loop(&mut session, &mut receiver, &mut stdin, &mut input).await
}

async fn run_client_loop(
    session: &mut ChatSession,
    receiver: &mut UnboundedReceiver<Frame>,
    stdin: &mut BufReader<tokio::io::Stdin>,
    input: &mut String,
) -> Result<()> {
    loop {
        input.clear();
        select! {
            frame = receiver.recv() => {
                if !handle_relay_frame(frame, session).await? {
                    break;
                }
            }
            bytes_read = stdin.read_line(input) => {
                if !handle_stdin_input(bytes_read, input, session).await? {
                    break;
                }
            }
            ctrl_c = tokio::signal::ctrl_c() => {
                handle_ctrl_c(ctrl_c);
                break;
            }
        }
    }
    Ok(())
}

async fn handle_relay_frame(frame: Option<Frame>, session: &mut ChatSession) -> Result<bool> {
    match frame {
        Some(frame) => {
            render_change(session.receive(frame)).await?;
            Ok(true)
        }
        None => {
            write_stdout("*** server closed the connection").await?;
            Ok(false)
        }
    }
}

async fn handle_stdin_input(
    bytes_read: io::Result<usize>,
    input: &str,
    session: &mut ChatSession,
) -> Result<bool> {
    if bytes_read? == 0 {
        return Ok(false);
    }

    match parse_input(input) {
        Input::Public(text) => {
            session.send_public(text)?;
        }
        Input::Private { peer, text } => {
            if session.send_private(peer, text)? {
                let me = session.username().unwrap_or_default();
                write_stdout(&format_private(&ChatEvent::private(me, peer, text))).await?;
            }
        }
        Input::Peers => {
            let conversations = session.conversations();
            write_stdout(&format_peers(&conversations, session.username())).await?;
        }
        Input::Quit => {
            write_stdout("*** leaving chat").await?;
            return Ok(false);
        }
        Input::Usage(usage) => write_stderr(usage).await?,
    }
    Ok(true)
}

fn handle_ctrl_c(result: io::Result<()>) {
    if let Err(error) = result {
        warn!(?error, "ctrl-c handler failed");
    }
}

async fn render_change(change: Change) -> io::Result<()> {
    match change {
        Change::PeerAdded(name) => write_stdout(&format!("*** {name} joined the chat")).await,
        Change::Public(event) => {
            write_stdout(&format!("<{}> {}", event.sender_name, event.text())).await
        }
        Change::Private { event, .. } => write_stdout(&format_private(&event)).await,
        Change::Confirmed { .. } | Change::Unchanged => Ok(()),
    }
}

fn format_peers(conversations: &Conversations, me: Option<&str>) -> String {
    let peers: Vec<String> = conversations
        .peers()
        .map(|peer| {
            if Some(peer) == me {
                format!("{peer} (You)")
            } else {
                peer.to_string()
            }
        })
        .collect();
    format!("*** peers: {}", peers.join(", "))
}

fn format_private(event: &ChatEvent) -> String {
    format!(
        "[{} -> {}] {}",
        event.sender_name,
        event.receiver_name.as_deref().unwrap_or_default(),
        event.text()
    )
}

async fn write_stdout(line: &str) -> io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}

async fn write_stderr(line: &str) -> io::Result<()> {
    let mut stderr = tokio::io::stderr();
    stderr.write_all(line.as_bytes()).await?;
    stderr.write_all(b"\n").await?;
    stderr.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_goes_to_public_room() {
        assert_eq!(parse_input("hello there\n"), Input::Public("hello there"));
        assert_eq!(parse_input("\n"), Input::Public(""));
    }

    #[test]
    fn msg_command_splits_peer_and_text() {
        assert_eq!(
            parse_input("/msg bob see you soon\n"),
            Input::Private {
                peer: "bob",
                text: "see you soon"
            }
        );
        assert_eq!(
            parse_input("/msg bob"),
            Input::Private {
                peer: "bob",
                text: ""
            }
        );
        assert!(matches!(parse_input("/msg"), Input::Usage(_)));
    }

    #[test]
    fn recognises_control_commands() {
        assert_eq!(parse_input("/quit\r\n"), Input::Quit);
        assert_eq!(parse_input("/PEERS"), Input::Peers);
        assert!(matches!(parse_input("/dance"), Input::Usage(_)));
    }

    #[test]
    fn peer_list_marks_own_name() {
        use crate::{conversation::Update, event::Channel};

        let joins = ["carol", "alice", "bob"].map(|name| Update::Received {
            channel: Channel::Message,
            event: ChatEvent::join(name),
        });
        let conversations = joins.iter().fold(Conversations::new(), |state, update| {
            state.apply(Some("bob"), update).0
        });

        assert_eq!(
            format_peers(&conversations, Some("bob")),
            "*** peers: alice, bob (You), carol"
        );
        assert_eq!(
            format_peers(&Conversations::new(), Some("bob")),
            "*** peers: "
        );
    }

    #[test]
    fn private_lines_show_both_parties() {
        assert_eq!(
            format_private(&ChatEvent::private("alice", "bob", "hi")),
            "[alice -> bob] hi"
        );
    }
}
