use std::sync::Arc;
use std::time::Instant;

use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tracing::{debug, info, warn};

use crate::auth::SharedSecret;
use crate::directory::{Actor, Directory};
use crate::engine::Engine;
use crate::limits::MAX_LINE_LEN;
use crate::notify::NotifyHub;
use crate::observability::{self, AUTH_FAILURES_TOTAL, REQUESTS_TOTAL, REQUEST_DURATION_SECONDS};
use crate::protocol::{parse_command, Command, ProtocolError, Response};

/// Everything a connection needs, shared across connections.
pub struct Server {
    pub engine: Arc<Engine>,
    pub hub: Arc<NotifyHub>,
    pub directory: Arc<dyn Directory>,
    pub secret: SharedSecret,
}

/// What the connection loop should do after answering.
enum Next {
    Continue,
    Close,
}

impl Server {
    /// Answer one command for an already signed-in actor.
    pub async fn dispatch(&self, actor: &Actor, cmd: Command) -> Response {
        let engine = &self.engine;
        let result = match cmd {
            Command::Login { .. } => return Response::from(&ProtocolError::AlreadyLoggedIn),
            Command::CreateReservation { reservation } => {
                engine.create_reservation(actor, reservation).await.map(Response::ok)
            }
            Command::CancelReservation { id } => engine.cancel_reservation(actor, id).await.map(Response::ok),
            Command::ApproveReservation { id } => engine.approve_reservation(actor, id).await.map(|a| {
                Response::ok(json!({
                    "reservation": a.reservation,
                    "auto_rejected": a.auto_rejected.len(),
                    "auto_rejected_ids": a.auto_rejected,
                }))
            }),
            Command::RejectReservation { id, reason } => {
                engine.reject_reservation(actor, id, &reason).await.map(Response::ok)
            }
            Command::GetReservation { id } => engine.get_reservation(actor, id).await.map(Response::ok),
            Command::ListReservations { filter } => Ok(Response::ok(engine.list_reservations(actor, &filter).await)),
            Command::PendingCount => engine
                .pending_count(actor)
                .await
                .map(|count| Response::ok(json!({ "count": count }))),
            Command::ListResources => Ok(Response::ok(engine.registry().resources())),
            Command::Notifications => Ok(Response::ok(json!({
                "unread": self.hub.unread_count(&actor.id),
                "items": self.hub.inbox(&actor.id),
            }))),
            Command::MarkNotificationRead { id } => {
                if self.hub.mark_read(&actor.id, id) {
                    Ok(Response::ok(json!({ "updated": 1 })))
                } else {
                    Ok(Response::error("not_found", format!("notification {id} not found")))
                }
            }
            Command::MarkAllNotificationsRead => {
                Ok(Response::ok(json!({ "updated": self.hub.mark_all_read(&actor.id) })))
            }
        };
        result.unwrap_or_else(|err| {
            observability::record_engine_error(&err);
            Response::from(&err)
        })
    }

    fn login(&self, cmd: Command, session: &mut Option<Actor>) -> (Response, Next) {
        let Command::Login { user, password } = cmd else {
            return (Response::error("unauthenticated", "log in first".into()), Next::Continue);
        };
        match self.secret.authenticate(self.directory.as_ref(), &user, &password) {
            Ok(actor) => {
                info!("{} signed in as {:?}", actor.id, actor.role);
                let response = Response::ok(&actor);
                *session = Some(actor);
                (response, Next::Continue)
            }
            Err(e) => {
                warn!("failed login for '{user}': {e}");
                metrics::counter!(AUTH_FAILURES_TOTAL).increment(1);
                (Response::error("unauthenticated", e.to_string()), Next::Close)
            }
        }
    }

    async fn handle_line(&self, line: &str, session: &mut Option<Actor>) -> (Response, Next) {
        let cmd = match parse_command(line) {
            Ok(cmd) => cmd,
            Err(e) => {
                debug!("rejected line: {e}");
                metrics::counter!(REQUESTS_TOTAL, "op" => "unknown", "status" => "error").increment(1);
                return (Response::from(&e), Next::Continue);
            }
        };
        let op = cmd.name();
        let started = Instant::now();
        let (response, next) = match session {
            Some(actor) => (self.dispatch(actor, cmd).await, Next::Continue),
            None => self.login(cmd, session),
        };
        let status = if response.ok { "ok" } else { "error" };
        metrics::counter!(REQUESTS_TOTAL, "op" => op, "status" => status).increment(1);
        metrics::histogram!(REQUEST_DURATION_SECONDS, "op" => op).record(started.elapsed().as_secs_f64());
        debug!("{op} -> {status}");
        (response, next)
    }
}

/// Serve one client until it disconnects or fails to sign in.
pub async fn process_connection(socket: TcpStream, server: Arc<Server>) -> Result<(), LinesCodecError> {
    let mut framed = Framed::new(socket, LinesCodec::new_with_max_length(MAX_LINE_LEN));
    let mut session: Option<Actor> = None;

    while let Some(frame) = framed.next().await {
        let line = match frame {
            Ok(line) => line,
            Err(LinesCodecError::MaxLineLengthExceeded) => {
                let response = Response::from(&ProtocolError::LineTooLong(MAX_LINE_LEN));
                framed.send(response.to_line()).await?;
                continue;
            }
            Err(e) => return Err(e),
        };
        if line.trim().is_empty() {
            continue;
        }
        let (response, next) = server.handle_line(&line, &mut session).await;
        framed.send(response.to_line()).await?;
        if let Next::Close = next {
            break;
        }
    }
    Ok(())
}
