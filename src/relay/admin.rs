// Slash commands typed into the chat line

/// Prefix that turns a chat line into a command
pub const COMMAND_PREFIX: char = '/';

/// A parsed chat command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatCommand<'a> {
    /// `/users`
    Users,
    /// `/kick <name>`
    Kick(&'a str),
    /// `/root <name>`
    Root(&'a str),
    Unknown(&'a str),
}

impl<'a> ChatCommand<'a> {
    /// Parse a chat line. Returns `None` for ordinary chat.
    pub fn parse(text: &'a str) -> Option<Self> {
        if !text.starts_with(COMMAND_PREFIX) {
            return None;
        }

        let line = text.trim_end();
        let command = if line == "/users" {
            ChatCommand::Users
        } else if let Some(name) = line.strip_prefix("/kick ") {
            ChatCommand::Kick(name.trim())
        } else if let Some(name) = line.strip_prefix("/root ") {
            ChatCommand::Root(name.trim())
        } else {
            ChatCommand::Unknown(line)
        };
        Some(command)
    }

    /// Whether only the root holder may run this command
    pub fn requires_root(&self) -> bool {
        !matches!(self, ChatCommand::Users)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_chat_is_not_a_command() {
        assert_eq!(ChatCommand::parse("hello /kick bob"), None);
        assert_eq!(ChatCommand::parse(""), None);
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(ChatCommand::parse("/users"), Some(ChatCommand::Users));
        assert_eq!(ChatCommand::parse("/users\n"), Some(ChatCommand::Users));
        assert_eq!(ChatCommand::parse("/kick bob"), Some(ChatCommand::Kick("bob")));
        assert_eq!(ChatCommand::parse("/root  carol "), Some(ChatCommand::Root("carol")));
        assert_eq!(ChatCommand::parse("/kick"), Some(ChatCommand::Unknown("/kick")));
        assert_eq!(ChatCommand::parse("/dance"), Some(ChatCommand::Unknown("/dance")));
    }

    #[test]
    fn test_only_users_is_open() {
        assert!(!ChatCommand::Users.requires_root());
        assert!(ChatCommand::Kick("x").requires_root());
        assert!(ChatCommand::Unknown("/x").requires_root());
    }
}
