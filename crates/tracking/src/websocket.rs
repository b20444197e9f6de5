/// WebSocket actor streaming live updates for one tracking session
///
/// The connection registers a hub subscriber when it starts and unregisters
/// it when it stops. Every payload from the subscriber queue is written to the
/// client as a text frame.
use actix::{Actor, ActorContext, AsyncContext, Handler, Message, StreamHandler};
use actix_web_actors::ws;
use bytes::Bytes;
use futures_util::stream;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::stream::{BroadcastHub, Subscriber, SubscriberKey};

/// Heartbeat ping interval
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Disconnect after two missed heartbeats
const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);

/// Payload delivered from the hub to the connection
#[derive(Message)]
#[rtype(result = "()")]
pub struct LiveUpdate(pub Bytes);

/// WebSocket session actor
pub struct LiveSessionSocket {
    session_id: String,
    hub: Arc<BroadcastHub>,
    key: Option<SubscriberKey>,
    hb: Instant,
}

impl LiveSessionSocket {
    pub fn new(session_id: impl Into<String>, hub: Arc<BroadcastHub>) -> Self {
        Self {
            session_id: session_id.into(),
            hub,
            key: None,
            hb: Instant::now(),
        }
    }

    fn start_heartbeat(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.hb) > CLIENT_TIMEOUT {
                tracing::warn!(
                    session_id = %act.session_id,
                    "Live socket heartbeat timeout, disconnecting"
                );
                ctx.stop();
                return;
            }

            ctx.ping(b"");
        });
    }
}

/// Adapt a subscriber queue into an actor message stream
fn live_updates(subscriber: Subscriber) -> impl futures_util::Stream<Item = LiveUpdate> {
    stream::unfold(subscriber, |mut subscriber| async move {
        subscriber
            .recv()
            .await
            .map(|payload| (LiveUpdate(payload), subscriber))
    })
}

impl Actor for LiveSessionSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        let subscriber = self.hub.register(self.session_id.clone());
        self.key = Some(subscriber.key().clone());

        ctx.add_message_stream(live_updates(subscriber));
        self.start_heartbeat(ctx);

        tracing::info!(session_id = %self.session_id, "Live socket connected");
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        if let Some(key) = self.key.take() {
            self.hub.unregister(&key);
        }

        tracing::info!(session_id = %self.session_id, "Live socket closed");
    }
}

impl Handler<LiveUpdate> for LiveSessionSocket {
    type Result = ();

    fn handle(&mut self, msg: LiveUpdate, ctx: &mut Self::Context) {
        match String::from_utf8(msg.0.to_vec()) {
            Ok(text) => ctx.text(text),
            // relay peers may publish arbitrary bytes
            Err(e) => ctx.binary(e.into_bytes()),
        }
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for LiveSessionSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(msg)) => {
                self.hb = Instant::now();
                ctx.pong(&msg);
            }
            Ok(ws::Message::Pong(_)) => {
                self.hb = Instant::now();
            }
            Ok(ws::Message::Text(_)) | Ok(ws::Message::Binary(_)) => {
                // read-only stream; inbound data only proves liveness
                self.hb = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) | Ok(ws::Message::Nop) => {}
            Err(e) => {
                tracing::warn!(session_id = %self.session_id, error = %e, "Live socket protocol error");
                ctx.stop();
            }
        }
    }
}
