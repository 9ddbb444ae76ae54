use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

use adminkit_auth::{LockoutState, LockoutStore, SessionRecord, SessionRepository};
use adminkit_core::{Clock, SessionId, UserId};

use crate::cli::{Command, LockoutCommand, OutputFormat, SessionsCommand};

/// Stores the commands operate on.
#[derive(Clone)]
pub struct Stores {
    pub sessions: Arc<dyn SessionRepository>,
    pub lockouts: Arc<dyn LockoutStore>,
    pub clock: Arc<dyn Clock>,
}

#[derive(Debug, Serialize)]
struct Revoked {
    user_id: Option<UserId>,
    session_id: Option<SessionId>,
    revoked: usize,
}

#[derive(Debug, Serialize)]
struct LockoutView<'a> {
    user_id: UserId,
    locked: bool,
    #[serde(flatten)]
    state: &'a LockoutState,
}

pub async fn execute<W: Write>(command: &Command, stores: &Stores, format: OutputFormat, out: &mut W) -> Result<()> {
    match command {
        Command::Ping => {
            stores.sessions.ping().await.context("backing store did not answer")?;
            emit(out, format, &serde_json::json!({ "status": "ok" }), |out| {
                writeln!(out, "ok")
            })
        }
        Command::Sessions(SessionsCommand::List { user_id }) => {
            let sessions = stores
                .sessions
                .user_sessions(*user_id)
                .await
                .with_context(|| format!("listing sessions of user {user_id}"))?;
            emit(out, format, &sessions, |out| write_sessions(out, &sessions))
        }
        Command::Sessions(SessionsCommand::Revoke { session_id }) => {
            let existing = stores.sessions.get(session_id).await?;
            stores
                .sessions
                .delete(session_id)
                .await
                .with_context(|| format!("revoking session {session_id}"))?;
            let result = Revoked {
                user_id: existing.as_ref().map(|s| s.user_id),
                session_id: Some(session_id.clone()),
                revoked: usize::from(existing.is_some()),
            };
            emit(out, format, &result, |out| match &existing {
                Some(s) => writeln!(out, "revoked session {} of user {}", session_id, s.user_id),
                None => writeln!(out, "no live session {session_id}"),
            })
        }
        Command::Sessions(SessionsCommand::RevokeAll { user_id }) => {
            let revoked = stores
                .sessions
                .delete_all_user_sessions(*user_id)
                .await
                .with_context(|| format!("revoking sessions of user {user_id}"))?;
            let result = Revoked {
                user_id: Some(*user_id),
                session_id: None,
                revoked,
            };
            emit(out, format, &result, |out| {
                writeln!(out, "revoked {revoked} session(s) of user {user_id}")
            })
        }
        Command::Lockout(LockoutCommand::Show { user_id }) => {
            let state = stores.lockouts.load(*user_id).await?;
            let now = stores.clock.now();
            let view = LockoutView {
                user_id: *user_id,
                locked: state.is_locked(now),
                state: &state,
            };
            emit(out, format, &view, |out| write_lockout(out, &view, now))
        }
        Command::Lockout(LockoutCommand::Clear { user_id }) => {
            stores.lockouts.clear(*user_id).await?;
            emit(out, format, &serde_json::json!({ "user_id": user_id, "cleared": true }), |out| {
                writeln!(out, "lockout cleared for user {user_id}")
            })
        }
    }
}

fn emit<W, T, F>(out: &mut W, format: OutputFormat, value: &T, text: F) -> Result<()>
where
    W: Write,
    T: Serialize + ?Sized,
    F: FnOnce(&mut W) -> std::io::Result<()>,
{
    match format {
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut *out, value)?;
            writeln!(out)?;
        }
        OutputFormat::Text => text(out)?,
    }
    Ok(())
}

fn write_sessions<W: Write>(out: &mut W, sessions: &[SessionRecord]) -> std::io::Result<()> {
    if sessions.is_empty() {
        return writeln!(out, "no live sessions");
    }
    for s in sessions {
        writeln!(
            out,
            "{}  created {}  expires {}  {}  {}",
            s.session_id,
            s.created_at.to_rfc3339(),
            s.expires_at.to_rfc3339(),
            s.ip_address,
            s.user_agent
        )?;
    }
    Ok(())
}

fn write_lockout<W: Write>(out: &mut W, view: &LockoutView<'_>, now: DateTime<Utc>) -> std::io::Result<()> {
    let state = view.state;
    match state.locked_at(now) {
        Some(until) => writeln!(out, "user {} locked until {}", view.user_id, until.to_rfc3339())?,
        None => writeln!(out, "user {} not locked", view.user_id)?,
    }
    writeln!(
        out,
        "failed attempts: {}, previous locks: {}",
        state.failed_attempts, state.lockout_count
    )
}
