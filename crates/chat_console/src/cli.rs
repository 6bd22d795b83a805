use clap::Parser;

pub const DEFAULT_CONVERSATION_ID: &str = "console";
const RESUMED_ANCHOR: &str = "(resumed)";

#[derive(Parser, Debug)]
#[command(name = "chat_console")]
#[command(version, about = "Send one message and stream the reply, or reattach to a run still in flight.")]
#[command(after_help = "Ctrl-C cancels the active run.")]
pub struct Cli {
    /// Conversation the message is sent to.
    #[arg(short, long, default_value = DEFAULT_CONVERSATION_ID, conflicts_with = "attach")]
    pub conversation: String,

    /// Reattach to this conversation's running backend session instead of sending.
    #[arg(long, value_name = "CONVERSATION")]
    pub attach: Option<String>,

    /// Message text; with --attach, the user message the resumed run is anchored on.
    #[arg(required_unless_present = "attach")]
    pub message: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Send {
        conversation_id: String,
        text: String,
    },
    /// Reattach to a running backend session, anchored on `anchor`.
    Attach {
        conversation_id: String,
        anchor: String,
    },
}

impl Cli {
    pub fn into_command(self) -> Command {
        let text = self.message.join(" ").trim().to_string();
        match self.attach {
            Some(conversation_id) => Command::Attach {
                conversation_id,
                anchor: if text.is_empty() {
                    RESUMED_ANCHOR.to_string()
                } else {
                    text
                },
            },
            None => Command::Send {
                conversation_id: self.conversation,
                text,
            },
        }
    }
}
