// Authenticated API session
//
// One socket, one login, strictly sequential request/response. The pool
// owns sessions and serializes access; this module only knows how to send
// a sentence and collect the reply up to `!done`.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use tokio::time::Instant;
use tokio_util::codec::Framed;
use tracing::{debug, trace};

use crate::auth::DeviceConnection;
use crate::command::{Command, Record, Reply};
use crate::error::Error;
use crate::protocol::{ReplyKind, Response, SentenceCodec};
use crate::transport::{BoxedIo, TransportConfig};

pub(crate) struct Session {
    framed: Framed<BoxedIo, SentenceCodec>,
    timeout: Duration,
    last_used: Instant,
    /// Set from the moment a command is sent until its `!done` is read.
    /// A caller dropped mid-reply leaves it set and the session unusable.
    in_flight: bool,
}

impl Session {
    /// Connect and log in.
    pub(crate) async fn open(
        connection: &DeviceConnection,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        let io = transport
            .connect(&connection.host, connection.port, connection.tls)
            .await?;
        let mut session = Self::from_io(io, transport.timeout);
        session
            .login(&connection.username, &connection.password)
            .await?;
        debug!(%connection, "session established");
        Ok(session)
    }

    pub(crate) fn from_io(io: BoxedIo, timeout: Duration) -> Self {
        Self {
            framed: Framed::new(io, SentenceCodec),
            timeout,
            last_used: Instant::now(),
            in_flight: false,
        }
    }

    /// Post-6.43 login: credentials in one sentence, empty `!done` on success.
    async fn login(&mut self, username: &str, password: &SecretString) -> Result<(), Error> {
        let command = Command::new("/login")
            .attr("name", username)
            .attr("password", password.expose_secret());
        match self.call(&command).await {
            Ok(reply) if reply.ret().is_some() => Err(Error::Authentication {
                message: "router requested challenge login; RouterOS older than 6.43 is not supported"
                    .into(),
            }),
            Ok(_) => Ok(()),
            Err(Error::Trap { message, .. }) => Err(Error::Authentication { message }),
            Err(e) => Err(e),
        }
    }

    /// Send one command and collect its reply, bounded by the timeout.
    pub(crate) async fn call(&mut self, command: &Command) -> Result<Reply, Error> {
        let limit = self.timeout;
        let result = tokio::time::timeout(limit, self.round_trip(command))
            .await
            .map_err(|_| Error::Timeout {
                timeout_secs: limit.as_secs(),
            })?;
        self.last_used = Instant::now();
        result
    }

    async fn round_trip(&mut self, command: &Command) -> Result<Reply, Error> {
        // Words are not logged: `/login` carries the password.
        trace!(path = command.path(), "sending command");
        self.in_flight = true;
        self.framed.send(command.to_sentence()).await?;

        let mut records = Vec::new();
        let mut trap: Option<(String, Option<u8>)> = None;
        loop {
            let Some(sentence) = self.framed.next().await.transpose()? else {
                // Routers drop the socket right after a rejected login.
                return Err(match trap {
                    Some((message, category)) => trap_error(command, message, category),
                    None => Error::ConnectionClosed,
                });
            };
            let mut response = Response::parse(sentence)?;
            match response.kind {
                ReplyKind::Re => records.push(Record::new(response.attributes)),
                ReplyKind::Empty => {}
                ReplyKind::Trap => {
                    if trap.is_none() {
                        let message = response.attributes.remove("message").unwrap_or_default();
                        let category = response
                            .attributes
                            .get("category")
                            .and_then(|c| c.parse().ok());
                        trap = Some((message, category));
                    }
                }
                ReplyKind::Fatal => {
                    return Err(Error::Fatal {
                        reason: response.text.join(" "),
                    });
                }
                ReplyKind::Done => {
                    self.in_flight = false;
                    if let Some((message, category)) = trap {
                        return Err(trap_error(command, message, category));
                    }
                    let ret = response.attributes.remove("ret");
                    trace!(path = command.path(), rows = records.len(), "reply complete");
                    return Ok(Reply::new(records, ret));
                }
            }
        }
    }

    /// Whether a previous command's reply is still unread on the socket.
    pub(crate) fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    pub(crate) fn idle_for(&self) -> Duration {
        self.last_used.elapsed()
    }
}

fn trap_error(command: &Command, message: String, category: Option<u8>) -> Error {
    Error::Trap {
        command: command.path().to_owned(),
        message,
        category,
    }
}
