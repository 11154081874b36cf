//! stdin command stream.
//!
//! Standard input is blocking, so a dedicated OS thread reads it line by
//! line and posts parsed commands into the reactor over the control
//! channel; the channel wakes the select loop directly. Both `\n` and
//! `\r\n` terminators are accepted.

use tokio::sync::mpsc;
use tracing::debug;

/// A parsed stdin command: a name and whitespace-split arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    name: String,
    args: Vec<String>,
    raw: String,
}

impl Command {
    /// Parse one input line into a command.
    pub fn parse(line: &str) -> Self {
        let raw = line.trim_end_matches('\r').trim().to_string();
        let mut parts = raw.split_whitespace().map(str::to_string);
        let name = parts.next().unwrap_or_default();
        let args = parts.collect();
        Self { name, args, raw }
    }

    /// Command name (the first token).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of arguments after the name.
    pub fn argc(&self) -> usize {
        self.args.len()
    }

    /// Argument by index.
    pub fn arg(&self, index: usize) -> &str {
        &self.args[index]
    }

    /// All arguments after the name.
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// The complete trimmed input line.
    pub fn raw(&self) -> &str {
        &self.raw
    }
}

/// Messages delivered over the control channel.
#[derive(Debug)]
pub(crate) enum Control {
    /// A parsed stdin command.
    Command(Command),
    /// Stop the reactor.
    Stop,
}

/// Cross-thread handle used to stop a running server.
#[derive(Clone)]
pub struct ServerHandle {
    pub(crate) tx: mpsc::UnboundedSender<Control>,
}

impl ServerHandle {
    /// Ask the reactor to stop; safe to call from any thread.
    pub fn stop(&self) {
        let _ = self.tx.send(Control::Stop);
    }
}

/// Receiving side of the control channel, consumed by `run_server`.
pub struct ControlReceiver {
    pub(crate) rx: mpsc::UnboundedReceiver<Control>,
    pub(crate) tx: mpsc::UnboundedSender<Control>,
}

/// Create the control channel pair for one server.
pub fn control_channel() -> (ServerHandle, ControlReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        ServerHandle { tx: tx.clone() },
        ControlReceiver { rx, tx },
    )
}

/// Spawn the blocking stdin reader thread.
///
/// The thread exits on EOF or once the server side of the control channel
/// is gone.
pub(crate) fn spawn_stdin_reader(handle: ServerHandle) {
    std::thread::Builder::new()
        .name("protomux-stdin".into())
        .spawn(move || {
            use std::io::BufRead;
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                let cmd = Command::parse(&line);
                if cmd.name().is_empty() {
                    continue;
                }
                debug!("stdin command: {}", cmd.raw());
                if handle.tx.send(Control::Command(cmd)).is_err() {
                    break;
                }
            }
        })
        .expect("failed to spawn stdin reader thread");
}

/// Handle the well-known commands every server understands.
///
/// Returns true when the command asks the server to stop. The module still
/// sees every command afterwards, built-ins included.
pub(crate) fn handle_builtin(cmd: &Command) -> bool {
    match cmd.name() {
        "help" => {
            println!("{:<12} show this message", "help");
            println!("{:<12} terminate server", "exit");
            false
        }
        "exit" => true,
        // reserved
        "die" => false,
        _ => false,
    }
}
