//! Slash commands

use super::client::Role;
use super::error::ChatError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatCommand {
    Me(String),
    Help,
    Users,
    Nick(String),
    Auth(String),
    /// `/sv`: server announcement
    Announce(String),
    /// `/playing` with no title clears it
    Playing(Option<String>),
    Kick(String),
    Mod(String),
    Unmod(String),
}

const HELP_USER: &str = "/me <action>, /help, /users, /nick <name>, /auth <password>";
const HELP_MODERATOR: &str = "/sv <text>, /playing [title], /kick <name>";
const HELP_ADMIN: &str = "/mod <name>, /unmod <name>";

impl ChatCommand {
    /// Parse `/name args`; `text` must start with '/'
    pub fn parse(text: &str) -> Result<Self, ChatError> {
        let body = text.strip_prefix('/').unwrap_or(text);
        let (name, args) = match body.split_once(char::is_whitespace) {
            Some((name, args)) => (name, args.trim()),
            None => (body, ""),
        };

        let required = |usage: &'static str| {
            if args.is_empty() {
                Err(ChatError::Usage(usage))
            } else {
                Ok(args.to_string())
            }
        };

        let cmd = match name.to_ascii_lowercase().as_str() {
            "me" => ChatCommand::Me(required("/me <action>")?),
            "help" => ChatCommand::Help,
            "users" => ChatCommand::Users,
            "nick" => ChatCommand::Nick(required("/nick <name>")?),
            "auth" => ChatCommand::Auth(required("/auth <password>")?),
            "sv" => ChatCommand::Announce(required("/sv <text>")?),
            "playing" => ChatCommand::Playing((!args.is_empty()).then(|| args.to_string())),
            "kick" => ChatCommand::Kick(required("/kick <name>")?),
            "mod" => ChatCommand::Mod(required("/mod <name>")?),
            "unmod" => ChatCommand::Unmod(required("/unmod <name>")?),
            _ => return Err(ChatError::UnknownCommand(name.to_string())),
        };
        Ok(cmd)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ChatCommand::Me(_) => "me",
            ChatCommand::Help => "help",
            ChatCommand::Users => "users",
            ChatCommand::Nick(_) => "nick",
            ChatCommand::Auth(_) => "auth",
            ChatCommand::Announce(_) => "sv",
            ChatCommand::Playing(_) => "playing",
            ChatCommand::Kick(_) => "kick",
            ChatCommand::Mod(_) => "mod",
            ChatCommand::Unmod(_) => "unmod",
        }
    }

    pub fn required_role(&self) -> Role {
        match self {
            ChatCommand::Me(_)
            | ChatCommand::Help
            | ChatCommand::Users
            | ChatCommand::Nick(_)
            | ChatCommand::Auth(_) => Role::User,
            ChatCommand::Announce(_) | ChatCommand::Playing(_) | ChatCommand::Kick(_) => {
                Role::Moderator
            }
            ChatCommand::Mod(_) | ChatCommand::Unmod(_) => Role::Admin,
        }
    }
}

/// Commands available at `role`
pub fn help_text(role: Role) -> String {
    let mut text = format!("Commands: {HELP_USER}");
    if role >= Role::Moderator {
        text.push_str(", ");
        text.push_str(HELP_MODERATOR);
    }
    if role >= Role::Admin {
        text.push_str(", ");
        text.push_str(HELP_ADMIN);
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            ChatCommand::parse("/me waves hello").unwrap(),
            ChatCommand::Me("waves hello".into())
        );
        assert_eq!(ChatCommand::parse("/HELP").unwrap(), ChatCommand::Help);
        assert_eq!(ChatCommand::parse("/playing").unwrap(), ChatCommand::Playing(None));
        assert_eq!(
            ChatCommand::parse("/playing  The Movie ").unwrap(),
            ChatCommand::Playing(Some("The Movie".into()))
        );
        assert_eq!(
            ChatCommand::parse("/kick bob").unwrap(),
            ChatCommand::Kick("bob".into())
        );
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            ChatCommand::parse("/dance"),
            Err(ChatError::UnknownCommand(name)) if name == "dance"
        ));
        assert!(matches!(ChatCommand::parse("/nick"), Err(ChatError::Usage(_))));
        assert!(matches!(ChatCommand::parse("/sv   "), Err(ChatError::Usage(_))));
    }

    #[test]
    fn test_required_roles() {
        assert_eq!(ChatCommand::Users.required_role(), Role::User);
        assert_eq!(ChatCommand::Kick("x".into()).required_role(), Role::Moderator);
        assert_eq!(ChatCommand::Mod("x".into()).required_role(), Role::Admin);
    }

    #[test]
    fn test_help_grows_with_role() {
        assert!(!help_text(Role::User).contains("/kick"));
        assert!(help_text(Role::Moderator).contains("/kick"));
        assert!(!help_text(Role::Moderator).contains("/unmod"));
        assert!(help_text(Role::Admin).contains("/unmod"));
    }
}
