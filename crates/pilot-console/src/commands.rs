use pilot_core::StrategyId;
use pilot_orchestrator::Command;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Orchestrator(Command),
    Status,
    Copy,
    Help,
    Quit,
}

pub const HELP: &str = "commands: start <id> | run | stop | retry | hide | show | status | copy | end | quit";

pub fn parse_command_line(line: &str) -> Result<Option<ConsoleCommand>, String> {
    let mut parts = line.split_whitespace();
    let Some(word) = parts.next() else {
        return Ok(None);
    };
    let argument = parts.next();
    if parts.next().is_some() {
        return Err(format!("too many arguments: {}", line.trim()));
    }

    let command = match (word.to_lowercase().as_str(), argument) {
        ("start", Some(raw)) => {
            ConsoleCommand::Orchestrator(Command::Start(raw.parse::<StrategyId>()?))
        }
        ("start", None) => return Err("usage: start <strategy-id>".to_string()),
        ("run", None) => ConsoleCommand::Orchestrator(Command::Run),
        ("stop", None) => ConsoleCommand::Orchestrator(Command::Stop),
        ("retry", None) => ConsoleCommand::Orchestrator(Command::Retry),
        ("hide", None) => ConsoleCommand::Orchestrator(Command::SetDialogVisible(false)),
        ("show", None) => ConsoleCommand::Orchestrator(Command::SetDialogVisible(true)),
        ("end", None) => ConsoleCommand::Orchestrator(Command::EndSession),
        ("status", None) => ConsoleCommand::Status,
        ("copy", None) => ConsoleCommand::Copy,
        ("help" | "?", None) => ConsoleCommand::Help,
        ("quit" | "exit" | "q", None) => ConsoleCommand::Quit,
        (other, Some(_)) if is_known(other) => {
            return Err(format!("{other} takes no argument"))
        }
        (other, _) => return Err(format!("unknown command '{other}'; {HELP}")),
    };
    Ok(Some(command))
}

fn is_known(word: &str) -> bool {
    matches!(
        word,
        "run" | "stop" | "retry" | "hide" | "show" | "end" | "status" | "copy" | "help" | "quit"
    )
}
