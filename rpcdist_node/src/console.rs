//! Interactive console driving the benchmark from one group member.

use std::io::{self, Write};
use std::str::SplitWhitespace;
use std::sync::Arc;
use std::thread;

use tokio::sync::{mpsc, watch};

use rpcdist::{Coordinator, RpcDistError};

/// Prompt string at the start of line.
const PROMPT: &str = ">>>>> ";

/// Recognizable console commands.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ConsoleCommand {
    /// Run a benchmark on every member.
    Start,

    /// Print the current view.
    View,

    /// Print connections to other members.
    Conns,

    NumThreads(i32),
    NumMsgs(i32),
    MsgSize(i32),
    AnycastCount(i32),

    /// Flip the out-of-band flag group-wide.
    ToggleOob,

    /// Flip the synchronous flag group-wide.
    ToggleSync,

    PrintHelp,

    Quit,

    /// Nothing read.
    Nothing,
}

impl ConsoleCommand {
    /// Expects the next segment to be an integer argument.
    fn expect_int(segs: &mut SplitWhitespace) -> Result<i32, RpcDistError> {
        match segs.next() {
            Some(seg) => Ok(seg.parse::<i32>()?),
            None => Err(RpcDistError::msg("not enough args")),
        }
    }

    /// Parses one input line.
    pub(crate) fn parse(line: &str) -> Result<Self, RpcDistError> {
        let mut segs = line.split_whitespace();
        let cmd_type = match segs.next() {
            Some(seg) => seg.to_lowercase(),
            None => return Ok(ConsoleCommand::Nothing),
        };

        match &cmd_type[..] {
            "start" => Ok(ConsoleCommand::Start),
            "view" => Ok(ConsoleCommand::View),
            "conns" => Ok(ConsoleCommand::Conns),
            "threads" => {
                Ok(ConsoleCommand::NumThreads(Self::expect_int(&mut segs)?))
            }
            "msgs" => Ok(ConsoleCommand::NumMsgs(Self::expect_int(&mut segs)?)),
            "size" => Ok(ConsoleCommand::MsgSize(Self::expect_int(&mut segs)?)),
            "anycast" => {
                Ok(ConsoleCommand::AnycastCount(Self::expect_int(&mut segs)?))
            }
            "oob" => Ok(ConsoleCommand::ToggleOob),
            "sync" => Ok(ConsoleCommand::ToggleSync),
            "help" => Ok(ConsoleCommand::PrintHelp),
            "quit" | "exit" => Ok(ConsoleCommand::Quit),
            _ => Err(RpcDistError::msg(format!(
                "unrecognized command: {}",
                cmd_type
            ))),
        }
    }
}

/// Console loop over a joined coordinator.
pub(crate) struct NodeConsole {
    coordinator: Arc<Coordinator>,
}

impl NodeConsole {
    pub(crate) fn new(coordinator: Arc<Coordinator>) -> Self {
        NodeConsole { coordinator }
    }

    fn print_prompt() {
        print!("{}", PROMPT);
        let _ = io::stdout().flush();
    }

    /// Prints (optionally) an error message and the help message.
    fn print_help(err: Option<&RpcDistError>) {
        if let Some(e) = err {
            println!("✗ {}", e);
        }
        println!("HELP: Supported commands are:");
        println!("          start");
        println!("          view");
        println!("          conns");
        println!("          threads <n>");
        println!("          msgs <n>");
        println!("          size <n>");
        println!("          anycast <n>");
        println!("          oob");
        println!("          sync");
        println!("          help");
        println!("          quit");
        let _ = io::stdout().flush();
    }

    fn print_status(&self) {
        let config = self.coordinator.config();
        println!(
            "# oob={} sync={} threads={} msgs={} size={} anycast={}",
            config.out_of_band,
            config.synchronous,
            config.num_threads,
            config.num_msgs,
            config.msg_size,
            config.anycast_count
        );
    }

    /// Spawns a plain thread feeding stdin lines into a channel, so that the
    /// console loop can also watch for termination.
    fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
        let (tx_line, rx_line) = mpsc::unbounded_channel();
        thread::spawn(move || loop {
            let mut line = String::new();
            match io::stdin().read_line(&mut line) {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    if tx_line.send(line).is_err() {
                        break;
                    }
                }
            }
        });
        rx_line
    }

    /// Executes one command. Returns `Ok(false)` on quit.
    async fn eval_command(
        &mut self,
        cmd: ConsoleCommand,
    ) -> Result<bool, RpcDistError> {
        match cmd {
            ConsoleCommand::Quit => {
                println!("Exitting...");
                return Ok(false);
            }
            ConsoleCommand::Nothing => {}
            ConsoleCommand::PrintHelp => Self::print_help(None),

            ConsoleCommand::Start => {
                let results = self.coordinator.start_benchmark().await?;
                for (addr, result) in results {
                    match result {
                        Ok(r) => println!("✓ {}: {}", addr, r),
                        Err(e) => println!("✗ {}: {}", addr, e),
                    }
                }
            }

            ConsoleCommand::View => {
                println!("# view {}", self.coordinator.view());
                self.print_status();
            }

            ConsoleCommand::Conns => {
                let conns = self.coordinator.connections();
                println!("# {} connections", conns.len());
                for conn in conns {
                    println!("  {}", conn);
                }
            }

            ConsoleCommand::NumThreads(n) => {
                self.coordinator.broadcast_num_threads(n).await?;
                self.print_status();
            }
            ConsoleCommand::NumMsgs(n) => {
                self.coordinator.broadcast_num_msgs(n).await?;
                self.print_status();
            }
            ConsoleCommand::MsgSize(n) => {
                self.coordinator.broadcast_msg_size(n).await?;
                self.print_status();
            }
            ConsoleCommand::AnycastCount(n) => {
                self.coordinator.broadcast_anycast_count(n).await?;
                self.print_status();
            }
            ConsoleCommand::ToggleOob => {
                self.coordinator.toggle_oob().await?;
                self.print_status();
            }
            ConsoleCommand::ToggleSync => {
                self.coordinator.toggle_sync().await?;
                self.print_status();
            }
        }

        let _ = io::stdout().flush();
        Ok(true)
    }

    /// Runs the console loop until `quit`, end of input, or termination.
    pub(crate) async fn run(
        &mut self,
        mut rx_term: watch::Receiver<bool>,
    ) -> Result<(), RpcDistError> {
        let mut rx_line = Self::spawn_stdin_reader();
        Self::print_help(None);

        loop {
            Self::print_prompt();
            let line = tokio::select! {
                line = rx_line.recv() => match line {
                    Some(line) => line,
                    None => break, // end of input
                },
                _ = rx_term.changed() => {
                    println!();
                    break;
                }
            };

            let cmd = match ConsoleCommand::parse(&line) {
                Ok(cmd) => cmd,
                Err(e) => {
                    Self::print_help(Some(&e));
                    continue;
                }
            };
            match self.eval_command(cmd).await {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => println!("✗ {}", e),
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod console_tests {
    use super::*;

    #[test]
    fn parse_commands() -> Result<(), RpcDistError> {
        assert_eq!(ConsoleCommand::parse("start\n")?, ConsoleCommand::Start);
        assert_eq!(ConsoleCommand::parse("  VIEW ")?, ConsoleCommand::View);
        assert_eq!(
            ConsoleCommand::parse("threads 4")?,
            ConsoleCommand::NumThreads(4)
        );
        assert_eq!(
            ConsoleCommand::parse("msgs 100")?,
            ConsoleCommand::NumMsgs(100)
        );
        assert_eq!(
            ConsoleCommand::parse("size 0")?,
            ConsoleCommand::MsgSize(0)
        );
        assert_eq!(
            ConsoleCommand::parse("anycast 2")?,
            ConsoleCommand::AnycastCount(2)
        );
        assert_eq!(ConsoleCommand::parse("conns")?, ConsoleCommand::Conns);
        assert_eq!(ConsoleCommand::parse("oob")?, ConsoleCommand::ToggleOob);
        assert_eq!(ConsoleCommand::parse("sync")?, ConsoleCommand::ToggleSync);
        assert_eq!(ConsoleCommand::parse("quit")?, ConsoleCommand::Quit);
        assert_eq!(ConsoleCommand::parse("")?, ConsoleCommand::Nothing);
        Ok(())
    }

    #[test]
    fn parse_invalid() {
        assert!(ConsoleCommand::parse("threads").is_err());
        assert!(ConsoleCommand::parse("msgs many").is_err());
        assert!(ConsoleCommand::parse("launch").is_err());
    }
}
