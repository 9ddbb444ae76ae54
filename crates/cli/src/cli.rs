use clap::{Parser, Subcommand, ValueEnum};

use adminkit_core::{SessionId, UserId};

#[derive(Debug, Parser)]
#[command(name = "adminkit", version, about = "Inspect and revoke sessions and lockouts")]
pub struct Cli {
    /// Output format.
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    /// Overrides ADMINKIT_REDIS_URL.
    #[arg(long, global = true)]
    pub redis_url: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Check that the backing store answers.
    Ping,
    /// Session administration.
    #[command(subcommand)]
    Sessions(SessionsCommand),
    /// Failed-login lockout administration.
    #[command(subcommand)]
    Lockout(LockoutCommand),
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum SessionsCommand {
    /// List a user's live sessions.
    List { user_id: UserId },
    /// End one session.
    Revoke { session_id: SessionId },
    /// End every session of a user.
    RevokeAll { user_id: UserId },
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum LockoutCommand {
    Show { user_id: UserId },
    Clear { user_id: UserId },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nested_commands() {
        let cli = Cli::try_parse_from(["adminkit", "sessions", "revoke-all", "42", "--format", "json"]).unwrap();
        assert_eq!(cli.format, OutputFormat::Json);
        assert_eq!(
            cli.command,
            Command::Sessions(SessionsCommand::RevokeAll { user_id: UserId::new(42) })
        );

        let cli = Cli::try_parse_from(["adminkit", "lockout", "show", "7"]).unwrap();
        assert_eq!(cli.format, OutputFormat::Text);
        assert_eq!(cli.command, Command::Lockout(LockoutCommand::Show { user_id: UserId::new(7) }));
    }

    #[test]
    fn rejects_malformed_ids() {
        assert!(Cli::try_parse_from(["adminkit", "sessions", "list", "bob"]).is_err());
        assert!(Cli::try_parse_from(["adminkit", "sessions", "revoke", ""]).is_err());
    }
}
