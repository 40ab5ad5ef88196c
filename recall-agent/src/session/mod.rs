use crate::prompts::{build_help_text, render_tool_result};
use crate::tools::{DEFAULT_LIST_COUNT, ToolError, ToolManager};
use colored::Colorize;
use serde_json::json;
use std::future::Future;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Unknown command: {0} (type 'help' for a list)")]
    UnknownCommand(String),
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Convert { amount: f64, from: String, to: String },
    Last,
    List(usize),
    Again(String),
    Help,
    Exit,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Text(String),
    Exit,
    Nothing,
}

/// Why an interactive loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplExit {
    /// The user typed `exit` or `quit`.
    Command,
    EndOfInput,
    /// The shutdown future resolved, e.g. on Ctrl-C.
    Interrupted,
}

fn no_args(usage: &str, args: &[&str]) -> Result<(), SessionError> {
    if args.is_empty() {
        Ok(())
    } else {
        Err(SessionError::InvalidArguments(format!("usage: {}", usage)))
    }
}

/// Parses one line of user input. Blank lines yield `None`.
pub fn parse_command(line: &str) -> Result<Option<Command>, SessionError> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let Some(first) = tokens.first() else {
        return Ok(None);
    };

    let verb = first.to_ascii_lowercase();
    let args = &tokens[1..];

    let command = match verb.as_str() {
        "exit" | "quit" => {
            no_args(&verb, args)?;
            Command::Exit
        }
        "help" | "?" => {
            no_args(&verb, args)?;
            Command::Help
        }
        "last" => {
            no_args("last", args)?;
            Command::Last
        }
        "list" | "history" => match args {
            [] => Command::List(DEFAULT_LIST_COUNT),
            [n] => Command::List(n.parse::<usize>().map_err(|_| {
                SessionError::InvalidArguments(format!("'{}' is not a count", n))
            })?),
            _ => {
                return Err(SessionError::InvalidArguments(
                    "usage: list [n]".to_string(),
                ));
            }
        },
        "again" => match args {
            [to] => Command::Again(to.to_string()),
            _ => {
                return Err(SessionError::InvalidArguments(
                    "usage: again <to_currency>".to_string(),
                ));
            }
        },
        "convert" => parse_conversion(args)?,
        _ if first.parse::<f64>().is_ok() => parse_conversion(&tokens)?,
        _ => return Err(SessionError::UnknownCommand(verb)),
    };

    Ok(Some(command))
}

fn parse_conversion(tokens: &[&str]) -> Result<Command, SessionError> {
    let (amount, from, to) = match tokens {
        [amount, from, to] => (amount, from, to),
        [amount, from, connector, to]
            if matches!(connector.to_ascii_lowercase().as_str(), "to" | "into" | "in") =>
        {
            (amount, from, to)
        }
        _ => {
            return Err(SessionError::InvalidArguments(
                "usage: convert <amount> <from> <to>".to_string(),
            ));
        }
    };

    let amount = amount
        .parse::<f64>()
        .map_err(|_| SessionError::InvalidArguments(format!("'{}' is not an amount", amount)))?;

    Ok(Command::Convert {
        amount,
        from: from.to_string(),
        to: to.to_string(),
    })
}

/// Dispatches parsed commands to the registered tools.
pub struct Session {
    tools: ToolManager,
    help: String,
}

impl Session {
    pub fn new(tools: ToolManager) -> Self {
        let help = build_help_text(&tools.get_definitions(), None);
        Self { tools, help }
    }

    pub fn tools(&self) -> &ToolManager {
        &self.tools
    }

    pub async fn handle_line(&self, line: &str) -> Result<Reply, SessionError> {
        match parse_command(line)? {
            Some(command) => self.execute(command).await,
            None => Ok(Reply::Nothing),
        }
    }

    pub async fn execute(&self, command: Command) -> Result<Reply, SessionError> {
        debug!(?command, "executing command");

        let (tool, arguments) = match command {
            Command::Exit => return Ok(Reply::Exit),
            Command::Help => return Ok(Reply::Text(self.help.clone())),
            Command::Convert { amount, from, to } => (
                "convert_currency",
                json!({ "from_currency": from, "to_currency": to, "amount": amount }),
            ),
            Command::Last => ("recall_last_conversion", json!({})),
            Command::List(n) => ("list_conversions", json!({ "n": n })),
            Command::Again(to) => ("convert_last_to", json!({ "to_currency": to })),
        };

        let result = self.tools.call(tool, arguments).await?;
        Ok(Reply::Text(render_tool_result(&result)))
    }
}

/// Reads commands line by line until `exit`, end of input, an I/O error or
/// `shutdown` resolving. Replies go to `writer`.
pub async fn run_repl<R, W, S>(
    session: &Session,
    mut reader: R,
    mut writer: W,
    shutdown: S,
) -> std::io::Result<ReplExit>
where
    R: AsyncBufRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
    S: Future<Output = ()> + Send,
{
    tokio::pin!(shutdown);
    let mut line = String::new();

    let exit = loop {
        writer.write_all(b"> ").await?;
        writer.flush().await?;

        line.clear();
        let read = tokio::select! {
            biased;
            _ = &mut shutdown => None,
            read = reader.read_line(&mut line) => Some(read?),
        };

        match read {
            None => break ReplExit::Interrupted,
            Some(0) => break ReplExit::EndOfInput,
            Some(_) => {}
        }

        let output = match session.handle_line(&line).await {
            Ok(Reply::Text(text)) => text.as_str().green().to_string(),
            Ok(Reply::Nothing) => continue,
            Ok(Reply::Exit) => break ReplExit::Command,
            Err(e) => format!("Error: {}", e).as_str().red().to_string(),
        };
        writer.write_all(output.as_bytes()).await?;
        writer.write_all(b"\n").await?;
    };

    if exit != ReplExit::Command {
        writer.write_all(b"\n").await?;
    }
    writer.write_all(b"Goodbye.\n").await?;
    writer.flush().await?;

    info!(?exit, "interactive session ended");
    Ok(exit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{BoundedHistory, FlushPolicy, HistoryGuard, SnapshotStore};
    use crate::rates::RateTable;
    use crate::tools::currency_tools;
    use rstest::rstest;
    use std::io;
    use std::num::NonZeroUsize;
    use std::pin::Pin;
    use std::sync::Arc;
    use std::task::{Context, Poll};
    use tempfile::TempDir;
    use tokio::io::{AsyncRead, AsyncReadExt, BufReader, ReadBuf};

    fn session(capacity: usize) -> (HistoryGuard, Session) {
        let history = BoundedHistory::new(NonZeroUsize::new(capacity).unwrap());
        let guard = HistoryGuard::from_history(history);
        let tools = currency_tools(Arc::new(RateTable::default()), guard.handle());
        (guard, Session::new(tools))
    }

    fn persisted_session(dir: &TempDir) -> (SnapshotStore, HistoryGuard, Session) {
        let store = SnapshotStore::new(dir.path().join("history.json"));
        let guard = HistoryGuard::open(
            NonZeroUsize::new(10).unwrap(),
            Some(store.clone()),
            FlushPolicy::OnExit,
        );
        let tools = currency_tools(Arc::new(RateTable::default()), guard.handle());
        (store, guard, Session::new(tools))
    }

    /// Stands in for a terminal that goes away mid-session.
    struct BrokenInput;

    impl AsyncRead for BrokenInput {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "terminal closed")))
        }
    }

    fn convert(amount: f64, from: &str, to: &str) -> Command {
        Command::Convert {
            amount,
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    #[rstest]
    #[case("convert 200 usd eur", convert(200.0, "usd", "eur"))]
    #[case("Convert 12.5 GBP to CAD", convert(12.5, "GBP", "CAD"))]
    #[case("200 USD into JPY", convert(200.0, "USD", "JPY"))]
    #[case("50 eur gbp", convert(50.0, "eur", "gbp"))]
    #[case("last", Command::Last)]
    #[case("list", Command::List(5))]
    #[case("list 3", Command::List(3))]
    #[case("history 0", Command::List(0))]
    #[case("again chf", Command::Again("chf".to_string()))]
    #[case("HELP", Command::Help)]
    #[case("  quit  ", Command::Exit)]
    fn test_parse_command(#[case] line: &str, #[case] expected: Command) {
        assert_eq!(parse_command(line).unwrap(), Some(expected));
    }

    #[test]
    fn test_parse_blank_line() {
        assert_eq!(parse_command("   ").unwrap(), None);
    }

    #[rstest]
    #[case("convert 200 usd")]
    #[case("convert lots usd eur")]
    #[case("convert 1 usd via eur")]
    #[case("list many")]
    #[case("list 3 4")]
    #[case("last 2")]
    #[case("help me")]
    #[case("exit now")]
    #[case("again")]
    #[case("again gbp eur")]
    fn test_parse_invalid_arguments(#[case] line: &str) {
        assert!(matches!(parse_command(line), Err(SessionError::InvalidArguments(_))));
    }

    #[test]
    fn test_parse_unknown_command() {
        assert!(matches!(
            parse_command("teleport home"),
            Err(SessionError::UnknownCommand(verb)) if verb == "teleport"
        ));
    }

    #[tokio::test]
    async fn test_follow_up_conversation() {
        let (guard, session) = session(10);

        assert_eq!(
            session.handle_line("convert 200 usd eur").await.unwrap(),
            Reply::Text("200 USD = 184.00 EUR".to_string())
        );
        assert_eq!(
            session.handle_line("again gbp").await.unwrap(),
            Reply::Text("200 USD = 158.00 GBP".to_string())
        );
        assert_eq!(
            session.handle_line("last").await.unwrap(),
            Reply::Text("For reference only (do NOT reconvert): 200 USD = 158.00 GBP".to_string())
        );
        assert_eq!(
            session.handle_line("list").await.unwrap(),
            Reply::Text("200 USD = 184.00 EUR\n200 USD = 158.00 GBP".to_string())
        );
        assert_eq!(guard.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_help_exit_and_blank() {
        let (_guard, session) = session(10);

        match session.handle_line("help").await.unwrap() {
            Reply::Text(help) => assert!(help.contains("convert_last_to")),
            other => panic!("unexpected reply: {:?}", other),
        }
        assert_eq!(session.handle_line("exit").await.unwrap(), Reply::Exit);
        assert_eq!(session.handle_line("").await.unwrap(), Reply::Nothing);
    }

    #[tokio::test]
    async fn test_tool_errors_surface() {
        let (guard, session) = session(10);

        let result = session.handle_line("convert 5 usd xyz").await;
        assert!(matches!(result, Err(SessionError::Tool(ToolError::Conversion(_)))));
        assert!(guard.lock().is_empty());
    }

    #[tokio::test]
    async fn test_repl_end_of_input_saves_history() {
        let dir = TempDir::new().unwrap();
        let (store, guard, session) = persisted_session(&dir);
        let input: &[u8] = b"convert 200 usd eur\nagain gbp\nteleport\n";
        let mut output = Vec::new();

        let exit = run_repl(&session, input, &mut output, std::future::pending())
            .await
            .unwrap();
        assert_eq!(exit, ReplExit::EndOfInput);

        let output = String::from_utf8(output).unwrap();
        assert!(output.contains("200 USD = 184.00 EUR"));
        assert!(output.contains("Error: Unknown command: teleport"));
        assert!(output.ends_with("Goodbye.\n"));

        drop(session);
        drop(guard);
        assert_eq!(
            store.read().unwrap(),
            vec!["200 USD = 184.00 EUR", "200 USD = 158.00 GBP"]
        );
    }

    #[tokio::test]
    async fn test_repl_shutdown_saves_history() {
        let dir = TempDir::new().unwrap();
        let (store, guard, session) = persisted_session(&dir);
        session.handle_line("convert 10 usd jpy").await.unwrap();

        // Shutdown wins over input that is already waiting.
        let input: &[u8] = b"convert 200 usd eur\n";
        let mut output = Vec::new();
        let exit = run_repl(&session, input, &mut output, std::future::ready(()))
            .await
            .unwrap();
        assert_eq!(exit, ReplExit::Interrupted);
        assert!(String::from_utf8(output).unwrap().contains("Goodbye."));

        drop(session);
        drop(guard);
        assert_eq!(store.read().unwrap(), vec!["10 USD = 1580.00 JPY"]);
    }

    #[tokio::test]
    async fn test_repl_read_error_saves_history() {
        let dir = TempDir::new().unwrap();
        let (store, guard, session) = persisted_session(&dir);
        let input = BufReader::new((&b"convert 200 usd eur\n"[..]).chain(BrokenInput));
        let mut output = Vec::new();

        let result = run_repl(&session, input, &mut output, std::future::pending()).await;
        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::BrokenPipe);

        drop(session);
        drop(guard);
        assert_eq!(store.read().unwrap(), vec!["200 USD = 184.00 EUR"]);
    }

    #[tokio::test]
    async fn test_repl_exit_command_stops_reading() {
        let dir = TempDir::new().unwrap();
        let (store, guard, session) = persisted_session(&dir);
        let input: &[u8] = b"convert 200 usd eur\n\nquit\nconvert 1 usd gbp\n";
        let mut output = Vec::new();

        let exit = run_repl(&session, input, &mut output, std::future::pending())
            .await
            .unwrap();
        assert_eq!(exit, ReplExit::Command);
        assert!(!String::from_utf8(output).unwrap().contains("GBP"));

        drop(session);
        drop(guard);
        assert_eq!(store.read().unwrap(), vec!["200 USD = 184.00 EUR"]);
    }
}
