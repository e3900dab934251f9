use std::path::PathBuf;

/// One line of user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserCommand {
    Listen,
    StopListening,
    /// Replay the latest assistant message.
    Speak,
    Hush,
    Upload(PathBuf),
    /// A typed question sent over HTTP instead of the realtime channel.
    Ask(String),
    ClearConversation,
    Health,
    Stats,
    /// Drop every indexed document on the backend.
    ForgetDocuments,
    Help,
    Quit,
    /// Plain text: dictation while listening, ignored otherwise.
    Text(String),
    Invalid(String),
}

pub const HELP: &str = "\
Commands:
  /listen          start voice input (type what you say, one line at a time)
  /stop            stop voice input
  /speak           read the latest answer aloud
  /hush            stop reading aloud
  /upload <path>   upload a PDF for questions
  /ask <question>  ask without voice
  /clear           clear the conversation
  /health          show backend health
  /stats           show backend statistics
  /forget          remove all uploaded documents from the backend
  /help            show this help
  /quit            exit";

impl UserCommand {
    /// Parses one input line. Returns `None` for blank lines.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let Some(rest) = line.strip_prefix('/') else {
            return Some(UserCommand::Text(line.to_string()));
        };

        let (name, arg) = match rest.split_once(char::is_whitespace) {
            Some((name, arg)) => (name, arg.trim()),
            None => (rest, ""),
        };
        let command = match name.to_ascii_lowercase().as_str() {
            "listen" => UserCommand::Listen,
            "stop" => UserCommand::StopListening,
            "speak" => UserCommand::Speak,
            "hush" => UserCommand::Hush,
            "upload" if arg.is_empty() => {
                UserCommand::Invalid("usage: /upload <path-to-pdf>".to_string())
            }
            "upload" => UserCommand::Upload(PathBuf::from(arg)),
            "ask" if arg.is_empty() => UserCommand::Invalid("usage: /ask <question>".to_string()),
            "ask" => UserCommand::Ask(arg.to_string()),
            "clear" => UserCommand::ClearConversation,
            "health" => UserCommand::Health,
            "stats" => UserCommand::Stats,
            "forget" => UserCommand::ForgetDocuments,
            "help" | "?" => UserCommand::Help,
            "quit" | "exit" => UserCommand::Quit,
            other => UserCommand::Invalid(format!("unknown command '/{}', try /help", other)),
        };
        Some(command)
    }
}
