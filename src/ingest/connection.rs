//! Per-connection RTMP handler
//!
//! Drives one socket through its whole life:
//! 1. Handshake (bounded by `handshake_timeout`)
//! 2. `connect`, `createStream`
//! 3. `publish` or `play`, admitted through the [`SessionGate`]
//! 4. Media: publishers feed the relay, viewers drain their queue
//! 5. Disconnect: the publish slot or viewer seat is always released
//!
//! A connection that fails for any reason only takes itself down.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter, ReadHalf, WriteHalf};
use tokio::time::timeout;

use super::config::IngestConfig;
use super::state::SessionState;
use crate::amf::AmfValue;
use crate::error::{Error, Result};
use crate::protocol::constants::*;
use crate::protocol::message::status_info;
use crate::protocol::{
    ChunkDecoder, ChunkEncoder, Command, ConnectParams, DataMessage, Handshake, HandshakeRole,
    RawMessage, RtmpMessage, UserControlEvent,
};
use crate::relay::{
    Admission, MediaPacket, PacketKind, PublishSession, RelayError, RelayEvent, SessionGate,
    StreamRequest, ViewerSession,
};
use crate::shutdown::Shutdown;
use crate::stats::StreamStats;

/// What the connection is doing once a stream is open
enum Role {
    Idle,
    Publishing {
        session: PublishSession,
        stream_id: u32,
    },
    Playing {
        session: ViewerSession,
        stream_id: u32,
    },
}

/// Why the message loop woke up
enum Wake {
    Shutdown,
    Idle,
    Read(std::io::Result<usize>),
    Relay(Option<RelayEvent>),
}

pub struct Connection<G: SessionGate, S> {
    state: SessionState,
    reader: ReadHalf<S>,
    writer: BufWriter<WriteHalf<S>>,
    read_buf: BytesMut,
    write_buf: BytesMut,
    decoder: ChunkDecoder,
    encoder: ChunkEncoder,
    config: IngestConfig,
    gate: Arc<G>,
    stats: Arc<StreamStats>,
    shutdown: Shutdown,
    role: Role,
}

impl<G, S> Connection<G, S>
where
    G: SessionGate,
    S: AsyncRead + AsyncWrite + Send + Unpin,
{
    pub fn new(
        session_id: u64,
        socket: S,
        peer_addr: SocketAddr,
        config: IngestConfig,
        gate: Arc<G>,
        stats: Arc<StreamStats>,
        shutdown: Shutdown,
    ) -> Self {
        let (read_half, write_half) = tokio::io::split(socket);

        Self {
            state: SessionState::new(session_id, peer_addr),
            reader: read_half,
            writer: BufWriter::new(write_half),
            read_buf: BytesMut::with_capacity(config.read_buffer_size),
            write_buf: BytesMut::with_capacity(8 * 1024),
            decoder: ChunkDecoder::new(),
            encoder: ChunkEncoder::new(),
            config,
            gate,
            stats,
            shutdown,
            role: Role::Idle,
        }
    }

    /// Run the connection to completion
    ///
    /// Whatever ends the loop, the relay hears about it before this returns.
    pub async fn run(mut self) -> Result<()> {
        let result = self.serve().await;
        self.release().await;
        self.state.close();

        tracing::debug!(
            session_id = self.state.id,
            peer = %self.state.peer_addr,
            bytes_received = self.state.bytes_received(),
            duration_secs = self.state.duration().as_secs(),
            "Connection finished"
        );
        result
    }

    async fn serve(&mut self) -> Result<()> {
        let mut shutdown = self.shutdown.clone();
        tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            result = timeout(self.config.handshake_timeout, self.do_handshake()) => {
                result.map_err(|_| Error::Timeout)??;
            }
        }

        let chunk_size = self.config.chunk_size;
        self.queue(CSID_PROTOCOL_CONTROL, 0, 0, &RtmpMessage::SetChunkSize(chunk_size));
        self.encoder.set_chunk_size(chunk_size);
        self.flush().await?;

        self.message_loop().await
    }

    async fn do_handshake(&mut self) -> Result<()> {
        let mut handshake = Handshake::new(HandshakeRole::Server);
        self.state.start_handshake();

        while !handshake.is_done() {
            if self.read_buf.len() < handshake.bytes_needed() {
                let n = self.reader.read_buf(&mut self.read_buf).await?;
                if n == 0 {
                    return Err(Error::ConnectionClosed);
                }
                continue;
            }

            let mut input = Bytes::copy_from_slice(&self.read_buf);
            let available = input.len();
            let response = handshake.process(&mut input)?;
            let _ = self.read_buf.split_to(available - input.len());

            if let Some(response) = response {
                self.writer.write_all(&response).await?;
                self.writer.flush().await?;
            }
        }

        self.state.complete_handshake();
        tracing::debug!(session_id = self.state.id, "Handshake complete");
        Ok(())
    }

    async fn message_loop(&mut self) -> Result<()> {
        loop {
            // Whatever is already buffered (the connect command often arrives
            // with C2) is handled before waiting on the socket again
            while let Some(raw) = self.decoder.decode(&mut self.read_buf)? {
                self.handle_message(raw).await?;
            }

            let wake = match &mut self.role {
                Role::Playing { session, .. } => tokio::select! {
                    _ = self.shutdown.cancelled() => Wake::Shutdown,
                    event = session.recv() => Wake::Relay(event),
                    read = self.reader.read_buf(&mut self.read_buf) => Wake::Read(read),
                },
                _ => tokio::select! {
                    _ = self.shutdown.cancelled() => Wake::Shutdown,
                    read = timeout(
                        self.config.idle_timeout,
                        self.reader.read_buf(&mut self.read_buf),
                    ) => match read {
                        Ok(read) => Wake::Read(read),
                        Err(_) => Wake::Idle,
                    },
                },
            };

            match wake {
                Wake::Shutdown => {
                    tracing::debug!(session_id = self.state.id, "Closing for shutdown");
                    return Ok(());
                }
                Wake::Idle => {
                    tracing::debug!(session_id = self.state.id, "Idle timeout");
                    return Err(Error::Timeout);
                }
                Wake::Read(read) => {
                    let n = read?;
                    if n == 0 {
                        return Ok(());
                    }
                    if self.state.add_bytes_received(n as u64) {
                        let sequence = self.state.take_ack_sequence();
                        self.queue(
                            CSID_PROTOCOL_CONTROL,
                            0,
                            0,
                            &RtmpMessage::Acknowledgement(sequence),
                        );
                        self.flush().await?;
                    }
                }
                Wake::Relay(event) => {
                    if !self.deliver(event).await? {
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn handle_message(&mut self, raw: RawMessage) -> Result<()> {
        match RtmpMessage::from_raw(&raw)? {
            RtmpMessage::SetChunkSize(size) => {
                tracing::trace!(session_id = self.state.id, size = size, "Peer chunk size");
                self.decoder.set_chunk_size(size);
            }
            RtmpMessage::Abort { csid } => self.decoder.abort(csid),
            RtmpMessage::WindowAckSize(size) => self.state.window_ack_size = size,
            RtmpMessage::UserControl(UserControlEvent::PingRequest(ts)) => {
                self.queue(
                    CSID_PROTOCOL_CONTROL,
                    0,
                    0,
                    &RtmpMessage::UserControl(UserControlEvent::PingResponse(ts)),
                );
                self.flush().await?;
            }
            RtmpMessage::Command(cmd) => self.handle_command(cmd).await?,
            RtmpMessage::Data(data) => self.handle_data(data).await,
            RtmpMessage::Audio { timestamp, data } => {
                self.publish_packet(MediaPacket::audio(timestamp, data)).await
            }
            RtmpMessage::Video { timestamp, data } => {
                self.publish_packet(MediaPacket::video(timestamp, data)).await
            }
            other => {
                tracing::trace!(session_id = self.state.id, message = ?other, "Ignored message");
            }
        }
        Ok(())
    }

    async fn handle_command(&mut self, cmd: Command) -> Result<()> {
        match cmd.name.as_str() {
            CMD_CONNECT => self.handle_connect(cmd).await,
            CMD_CREATE_STREAM => self.handle_create_stream(cmd).await,
            CMD_RELEASE_STREAM | CMD_FC_UNPUBLISH => Ok(()),
            CMD_FC_PUBLISH => self.handle_fc_publish().await,
            CMD_PUBLISH => self.handle_publish(cmd).await,
            CMD_PLAY => self.handle_play(cmd).await,
            CMD_DELETE_STREAM | CMD_CLOSE_STREAM => {
                self.handle_delete_stream(cmd).await;
                Ok(())
            }
            name => {
                tracing::trace!(session_id = self.state.id, command = name, "Unknown command");
                Ok(())
            }
        }
    }

    async fn handle_connect(&mut self, cmd: Command) -> Result<()> {
        let params = ConnectParams::from_amf(&cmd.command_object);
        tracing::info!(
            session_id = self.state.id,
            peer = %self.state.peer_addr,
            app = %params.app,
            "Connected"
        );

        let object_encoding = params.object_encoding;
        self.state.on_connect(params);

        self.queue(
            CSID_PROTOCOL_CONTROL,
            0,
            0,
            &RtmpMessage::WindowAckSize(self.config.window_ack_size),
        );
        self.queue(
            CSID_PROTOCOL_CONTROL,
            0,
            0,
            &RtmpMessage::SetPeerBandwidth {
                size: self.config.peer_bandwidth,
                limit_type: BANDWIDTH_LIMIT_DYNAMIC,
            },
        );
        self.queue(
            CSID_PROTOCOL_CONTROL,
            0,
            0,
            &RtmpMessage::UserControl(UserControlEvent::StreamBegin(0)),
        );

        let properties = AmfValue::object([
            ("fmsVer", AmfValue::string("FMS/3,0,1,123")),
            ("capabilities", AmfValue::Number(31.0)),
        ]);
        let info = AmfValue::object([
            ("level", AmfValue::string("status")),
            ("code", AmfValue::string(NC_CONNECT_SUCCESS)),
            ("description", AmfValue::string("Connection succeeded.")),
            ("objectEncoding", AmfValue::Number(object_encoding)),
        ]);
        self.queue_command(
            0,
            &Command::result(cmd.transaction_id, properties, info),
        );
        self.flush().await
    }

    async fn handle_create_stream(&mut self, cmd: Command) -> Result<()> {
        let stream_id = self.state.allocate_stream_id();
        self.queue_command(
            0,
            &Command::result(
                cmd.transaction_id,
                AmfValue::Null,
                AmfValue::Number(f64::from(stream_id)),
            ),
        );
        tracing::debug!(session_id = self.state.id, stream_id = stream_id, "Stream created");
        self.flush().await
    }

    /// Twitch-style encoders wait for `onFCPublish` before `publish`
    async fn handle_fc_publish(&mut self) -> Result<()> {
        let reply = Command::new(
            CMD_ON_FC_PUBLISH,
            0.0,
            AmfValue::Null,
            vec![status_info("status", NS_PUBLISH_START, "FCPublish")],
        );
        self.queue_command(0, &reply);
        self.flush().await
    }

    async fn handle_publish(&mut self, cmd: Command) -> Result<()> {
        let stream_id = cmd.stream_id;
        let key = cmd.arg_str(0).unwrap_or_default().to_string();

        if !self.state.can_start_stream() {
            return self
                .refuse(stream_id, NS_PUBLISH_BAD_NAME, "Stream already open on this connection")
                .await;
        }

        let session = match self
            .gate
            .admit(StreamRequest::Publish { key }, self.state.peer_addr)
            .await
        {
            Ok(Admission::Publisher(session)) => session,
            Ok(Admission::Viewer(viewer)) => {
                self.gate.leave_viewer(&viewer).await;
                return Err(Error::Rejected("publish admitted as viewer".into()));
            }
            Err(e) => {
                let code = match e {
                    RelayError::Auth => NS_PUBLISH_UNAUTHORIZED,
                    _ => NS_PUBLISH_BAD_NAME,
                };
                tracing::warn!(
                    session_id = self.state.id,
                    peer = %self.state.peer_addr,
                    error = %e,
                    "Publish rejected"
                );
                return self.refuse(stream_id, code, &e.to_string()).await;
            }
        };

        tracing::info!(
            session_id = self.state.id,
            publish_id = session.id,
            peer = %self.state.peer_addr,
            "Publishing started"
        );
        self.state.start_publishing();
        self.role = Role::Publishing { session, stream_id };

        self.queue(
            CSID_PROTOCOL_CONTROL,
            0,
            0,
            &RtmpMessage::UserControl(UserControlEvent::StreamBegin(stream_id)),
        );
        self.queue_command(
            stream_id,
            &Command::on_status(stream_id, "status", NS_PUBLISH_START, "Publishing live stream"),
        );
        self.flush().await
    }

    async fn handle_play(&mut self, cmd: Command) -> Result<()> {
        let stream_id = cmd.stream_id;
        let name = cmd.arg_str(0).unwrap_or_default().to_string();

        if !self.state.can_start_stream() {
            return self
                .refuse(stream_id, NS_PLAY_STREAM_NOT_FOUND, "Stream already open on this connection")
                .await;
        }

        let mut session = match self
            .gate
            .admit(StreamRequest::Play { name }, self.state.peer_addr)
            .await
        {
            Ok(Admission::Viewer(session)) => session,
            Ok(Admission::Publisher(publisher)) => {
                self.gate.end_publish(&publisher).await;
                return Err(Error::Rejected("play admitted as publisher".into()));
            }
            Err(e) => {
                tracing::debug!(session_id = self.state.id, error = %e, "Play rejected");
                return self.refuse(stream_id, NS_PLAY_STREAM_NOT_FOUND, &e.to_string()).await;
            }
        };

        self.queue(
            CSID_PROTOCOL_CONTROL,
            0,
            0,
            &RtmpMessage::UserControl(UserControlEvent::StreamBegin(stream_id)),
        );
        self.queue_command(
            stream_id,
            &Command::on_status(stream_id, "status", NS_PLAY_RESET, "Playing and resetting"),
        );
        self.queue_command(
            stream_id,
            &Command::on_status(stream_id, "status", NS_PLAY_START, "Started playing live stream"),
        );

        let catch_up = session.take_catch_up();
        let mut sent = 0;
        for packet in &catch_up {
            sent += self.queue_packet(stream_id, packet);
        }
        self.flush().await?;
        session.record_sent(sent);
        self.stats.record_bytes_out(sent as u64);

        tracing::info!(
            session_id = self.state.id,
            viewer_id = session.id,
            catch_up = catch_up.len(),
            "Playing started"
        );
        self.state.start_playing();
        self.role = Role::Playing { session, stream_id };
        Ok(())
    }

    async fn handle_delete_stream(&mut self, cmd: Command) {
        let target = match cmd.arguments.first().and_then(AmfValue::as_number) {
            Some(id) => id as u32,
            None => cmd.stream_id,
        };

        let open = match &self.role {
            Role::Publishing { stream_id, .. } | Role::Playing { stream_id, .. } => {
                Some(*stream_id)
            }
            Role::Idle => None,
        };
        if open == Some(target) {
            self.release().await;
            self.state.finish_stream();
        }
        self.state.remove_stream(target);
    }

    async fn handle_data(&mut self, data: DataMessage) {
        if let Some(payload) = data.metadata() {
            self.publish_packet(MediaPacket::metadata(payload)).await;
        }
    }

    /// Media from anyone but the active publisher is dropped
    async fn publish_packet(&mut self, packet: MediaPacket) {
        if packet.is_empty() {
            return;
        }
        if let Role::Publishing { session, .. } = &self.role {
            self.gate.relay(session, packet).await;
        }
    }

    /// Write one relay event to a viewer; false once the stream is over
    async fn deliver(&mut self, event: Option<RelayEvent>) -> Result<bool> {
        let Role::Playing { stream_id, .. } = self.role else {
            return Ok(false);
        };

        match event {
            Some(RelayEvent::Packet(packet)) => {
                let n = self.queue_packet(stream_id, &packet);
                timeout(self.gate.write_timeout(), self.flush())
                    .await
                    .map_err(|_| Error::Timeout)??;

                if let Role::Playing { session, .. } = &mut self.role {
                    session.record_sent(n);
                }
                self.stats.record_bytes_out(n as u64);
                Ok(true)
            }
            Some(RelayEvent::EndOfStream) => {
                self.queue(
                    CSID_PROTOCOL_CONTROL,
                    0,
                    0,
                    &RtmpMessage::UserControl(UserControlEvent::StreamEof(stream_id)),
                );
                self.queue_command(
                    stream_id,
                    &Command::on_status(stream_id, "status", NS_PLAY_STOP, "Stream ended"),
                );
                timeout(self.gate.write_timeout(), self.flush())
                    .await
                    .map_err(|_| Error::Timeout)??;
                tracing::info!(session_id = self.state.id, "Stream ended, viewer notified");
                Ok(false)
            }
            None => {
                // The relay dropped our queue: too slow, or the stream is gone
                tracing::debug!(session_id = self.state.id, "Viewer queue closed by relay");
                Ok(false)
            }
        }
    }

    /// Tell the peer no, then close
    async fn refuse(&mut self, stream_id: u32, code: &str, description: &str) -> Result<()> {
        self.queue_command(
            stream_id,
            &Command::on_status(stream_id, "error", code, description),
        );
        self.flush().await?;
        Err(Error::Rejected(description.to_string()))
    }

    /// Give back whatever the relay handed this connection
    async fn release(&mut self) {
        match std::mem::replace(&mut self.role, Role::Idle) {
            Role::Publishing { session, .. } => {
                tracing::info!(
                    session_id = self.state.id,
                    bytes = session.bytes_received(),
                    packets = session.packets_received(),
                    "Publisher disconnected"
                );
                self.gate.end_publish(&session).await;
            }
            Role::Playing { session, .. } => {
                tracing::debug!(
                    session_id = self.state.id,
                    bytes_sent = session.bytes_sent(),
                    "Viewer disconnected"
                );
                self.gate.leave_viewer(&session).await;
            }
            Role::Idle => {}
        }
    }

    fn queue(&mut self, csid: u32, stream_id: u32, timestamp: u32, message: &RtmpMessage) {
        let (message_type, payload) = message.encode();
        self.encoder.encode(
            &RawMessage {
                csid,
                timestamp,
                message_type,
                stream_id,
                payload,
            },
            &mut self.write_buf,
        );
    }

    fn queue_command(&mut self, stream_id: u32, cmd: &Command) {
        self.queue(CSID_COMMAND, stream_id, 0, &RtmpMessage::Command(cmd.clone()));
    }

    /// Encode a relayed packet, returning its payload size
    fn queue_packet(&mut self, stream_id: u32, packet: &MediaPacket) -> usize {
        let (csid, message_type) = match packet.kind {
            PacketKind::Video => (CSID_VIDEO, MSG_VIDEO),
            PacketKind::Audio => (CSID_AUDIO, MSG_AUDIO),
            PacketKind::Metadata => (CSID_DATA, MSG_DATA_AMF0),
        };
        self.encoder.encode(
            &RawMessage {
                csid,
                timestamp: packet.timestamp,
                message_type,
                stream_id,
                payload: packet.data.clone(),
            },
            &mut self.write_buf,
        );
        packet.len()
    }

    async fn flush(&mut self) -> Result<()> {
        if !self.write_buf.is_empty() {
            let out = self.write_buf.split();
            self.writer.write_all(&out).await?;
        }
        self.writer.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HandshakeError;
    use crate::relay::{RelayConfig, StreamRegistry};
    use crate::shutdown;
    use std::time::Duration;
    use tokio::io::DuplexStream;

    const KEY: &str = "secret";

    /// Minimal RTMP client over an in-memory pipe
    struct TestClient {
        io: DuplexStream,
        buf: BytesMut,
        decoder: ChunkDecoder,
        encoder: ChunkEncoder,
    }

    impl TestClient {
        async fn handshake(mut io: DuplexStream) -> Self {
            let mut handshake = Handshake::new(HandshakeRole::Client);
            io.write_all(&handshake.client_hello().unwrap()).await.unwrap();

            let mut buf = BytesMut::new();
            while !handshake.is_done() {
                io.read_buf(&mut buf).await.unwrap();
                let mut input = Bytes::copy_from_slice(&buf);
                let available = input.len();
                if let Some(c2) = handshake.process(&mut input).unwrap() {
                    io.write_all(&c2).await.unwrap();
                }
                let _ = buf.split_to(available - input.len());
            }

            Self {
                io,
                buf,
                decoder: ChunkDecoder::new(),
                encoder: ChunkEncoder::new(),
            }
        }

        async fn send(&mut self, csid: u32, stream_id: u32, timestamp: u32, message: RtmpMessage) {
            let (message_type, payload) = message.encode();
            let mut out = BytesMut::new();
            self.encoder.encode(
                &RawMessage {
                    csid,
                    timestamp,
                    message_type,
                    stream_id,
                    payload,
                },
                &mut out,
            );
            self.io.write_all(&out).await.unwrap();
        }

        async fn command(&mut self, stream_id: u32, name: &str, tid: f64, args: Vec<AmfValue>) {
            let mut cmd = Command::new(name, tid, AmfValue::Null, args);
            if name == CMD_CONNECT {
                cmd.command_object = AmfValue::object([("app", AmfValue::string("live"))]);
            }
            cmd.stream_id = stream_id;
            self.send(CSID_COMMAND, stream_id, 0, RtmpMessage::Command(cmd)).await;
        }

        async fn recv(&mut self) -> Option<RtmpMessage> {
            loop {
                if let Some(raw) = self.decoder.decode(&mut self.buf).unwrap() {
                    let message = RtmpMessage::from_raw(&raw).unwrap();
                    if let RtmpMessage::SetChunkSize(size) = message {
                        self.decoder.set_chunk_size(size);
                    }
                    return Some(message);
                }
                let n = tokio::time::timeout(Duration::from_secs(2), self.io.read_buf(&mut self.buf))
                    .await
                    .ok()?
                    .ok()?;
                if n == 0 {
                    return None;
                }
            }
        }

        /// Skip messages until a command named `name` arrives
        async fn expect_command(&mut self, name: &str) -> Command {
            loop {
                match self.recv().await {
                    Some(RtmpMessage::Command(cmd)) if cmd.name == name => return cmd,
                    Some(_) => continue,
                    None => panic!("connection closed waiting for {name}"),
                }
            }
        }

        async fn open_stream(&mut self) -> u32 {
            self.command(0, CMD_CONNECT, 1.0, vec![]).await;
            self.expect_command(CMD_RESULT).await;
            self.command(0, CMD_CREATE_STREAM, 2.0, vec![]).await;
            let reply = self.expect_command(CMD_RESULT).await;
            reply.arguments[0].as_number().unwrap() as u32
        }
    }

    fn status_code(cmd: &Command) -> &str {
        cmd.arguments[0].get("code").and_then(AmfValue::as_str).unwrap()
    }

    struct Harness {
        registry: Arc<StreamRegistry>,
        stats: Arc<StreamStats>,
        trigger: shutdown::ShutdownTrigger,
        token: Shutdown,
    }

    impl Harness {
        fn new() -> Self {
            let stats = Arc::new(StreamStats::new());
            let registry = Arc::new(StreamRegistry::new(
                KEY,
                RelayConfig::default(),
                Arc::clone(&stats),
            ));
            let (trigger, token) = shutdown::channel();
            Self {
                registry,
                stats,
                trigger,
                token,
            }
        }

        async fn connect(&self, id: u64) -> (TestClient, tokio::task::JoinHandle<Result<()>>) {
            let (client_io, server_io) = tokio::io::duplex(256 * 1024);
            let peer: SocketAddr = format!("127.0.0.1:{}", 40000 + id).parse().unwrap();
            let connection = Connection::new(
                id,
                server_io,
                peer,
                IngestConfig::default(),
                Arc::clone(&self.registry),
                Arc::clone(&self.stats),
                self.token.clone(),
            );
            let task = tokio::spawn(connection.run());
            (TestClient::handshake(client_io).await, task)
        }
    }

    fn mock_connection(
        harness: &Harness,
        io: tokio_test::io::Mock,
    ) -> Connection<StreamRegistry, tokio_test::io::Mock> {
        Connection::new(
            1,
            io,
            "127.0.0.1:40000".parse().unwrap(),
            IngestConfig::default(),
            Arc::clone(&harness.registry),
            Arc::clone(&harness.stats),
            harness.token.clone(),
        )
    }

    #[tokio::test]
    async fn test_unsupported_version_is_refused_silently() {
        let harness = Harness::new();
        let mut c0c1 = vec![0u8; 1 + 1536];
        c0c1[0] = 2;
        let io = tokio_test::io::Builder::new().read(&c0c1).build();

        let result = mock_connection(&harness, io).run().await;
        assert!(matches!(
            result,
            Err(Error::Handshake(HandshakeError::InvalidVersion(2)))
        ));
    }

    #[tokio::test]
    async fn test_peer_closing_mid_handshake() {
        let harness = Harness::new();
        let io = tokio_test::io::Builder::new().read(&[3u8; 100]).build();

        let result = mock_connection(&harness, io).run().await;
        assert!(matches!(result, Err(Error::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_connect_and_create_stream() {
        let harness = Harness::new();
        let (mut client, _task) = harness.connect(1).await;

        client.command(0, CMD_CONNECT, 1.0, vec![]).await;
        let result = client.expect_command(CMD_RESULT).await;
        assert_eq!(result.transaction_id, 1.0);
        assert_eq!(status_code(&result), NC_CONNECT_SUCCESS);

        client.command(0, CMD_CREATE_STREAM, 2.0, vec![]).await;
        let result = client.expect_command(CMD_RESULT).await;
        assert_eq!(result.arguments[0].as_number(), Some(1.0));
    }

    #[tokio::test]
    async fn test_publish_with_wrong_key_is_unauthorized() {
        let harness = Harness::new();
        let (mut client, task) = harness.connect(1).await;
        let stream_id = client.open_stream().await;

        client
            .command(stream_id, CMD_PUBLISH, 0.0, vec![AmfValue::string("nope")])
            .await;
        let status = client.expect_command(CMD_ON_STATUS).await;
        assert_eq!(status_code(&status), NS_PUBLISH_UNAUTHORIZED);

        assert!(matches!(task.await.unwrap(), Err(Error::Rejected(_))));
        assert!(!harness.registry.is_live().await);
    }

    #[tokio::test]
    async fn test_play_without_publisher_is_refused() {
        let harness = Harness::new();
        let (mut client, task) = harness.connect(1).await;
        let stream_id = client.open_stream().await;

        client
            .command(stream_id, CMD_PLAY, 0.0, vec![AmfValue::string("anything")])
            .await;
        let status = client.expect_command(CMD_ON_STATUS).await;
        assert_eq!(status_code(&status), NS_PLAY_STREAM_NOT_FOUND);
        assert!(task.await.unwrap().is_err());
        assert_eq!(harness.stats.snapshot().plays_rejected, 1);
    }

    #[tokio::test]
    async fn test_publish_relays_to_viewer_then_ends() {
        let harness = Harness::new();

        let (mut publisher, publisher_task) = harness.connect(1).await;
        let pub_stream = publisher.open_stream().await;
        publisher
            .command(pub_stream, CMD_PUBLISH, 0.0, vec![AmfValue::string("secret?x=1")])
            .await;
        let status = publisher.expect_command(CMD_ON_STATUS).await;
        assert_eq!(status_code(&status), NS_PUBLISH_START);

        // Sequence header before the viewer joins ends up in its catch-up
        let header = Bytes::from_static(&[0x17, 0x00, 0x00, 0x00, 0x00, 0x01]);
        publisher
            .send(CSID_VIDEO, pub_stream, 0, RtmpMessage::Video { timestamp: 0, data: header.clone() })
            .await;

        let (mut viewer, viewer_task) = harness.connect(2).await;
        let view_stream = viewer.open_stream().await;
        // Let the header reach the relay before the viewer asks to play
        tokio::time::sleep(Duration::from_millis(50)).await;
        viewer
            .command(view_stream, CMD_PLAY, 0.0, vec![AmfValue::string("whatever")])
            .await;
        assert_eq!(status_code(&viewer.expect_command(CMD_ON_STATUS).await), NS_PLAY_RESET);
        assert_eq!(status_code(&viewer.expect_command(CMD_ON_STATUS).await), NS_PLAY_START);

        match viewer.recv().await {
            Some(RtmpMessage::Video { data, .. }) => assert_eq!(data, header),
            other => panic!("expected catch-up header, got {other:?}"),
        }

        let frame = Bytes::from_static(&[0x27, 0x01, 0x00, 0x00, 0x00, 0xAA, 0xBB]);
        publisher
            .send(CSID_VIDEO, pub_stream, 40, RtmpMessage::Video { timestamp: 40, data: frame.clone() })
            .await;

        match viewer.recv().await {
            Some(RtmpMessage::Video { timestamp, data }) => {
                assert_eq!(timestamp, 40);
                assert_eq!(data, frame);
            }
            other => panic!("expected relayed frame, got {other:?}"),
        }

        drop(publisher);
        publisher_task.await.unwrap().unwrap();

        let mut saw_eof = false;
        while let Some(message) = viewer.recv().await {
            match message {
                RtmpMessage::UserControl(UserControlEvent::StreamEof(id)) => {
                    assert_eq!(id, view_stream);
                    saw_eof = true;
                }
                RtmpMessage::Command(cmd) if cmd.name == CMD_ON_STATUS => {
                    assert_eq!(status_code(&cmd), NS_PLAY_STOP);
                    break;
                }
                _ => {}
            }
        }
        assert!(saw_eof);
        viewer_task.await.unwrap().unwrap();

        assert!(!harness.registry.is_live().await);
        assert_eq!(harness.registry.viewer_count().await, 0);
        assert!(harness.stats.snapshot().bytes_out >= (header.len() + frame.len()) as u64);
    }

    #[tokio::test]
    async fn test_shutdown_closes_idle_connection() {
        let harness = Harness::new();
        let (mut client, task) = harness.connect(1).await;
        client.open_stream().await;

        harness.trigger.trigger();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_delete_stream_releases_publish_slot() {
        let harness = Harness::new();
        let (mut client, _task) = harness.connect(1).await;
        let stream_id = client.open_stream().await;

        client
            .command(stream_id, CMD_PUBLISH, 0.0, vec![AmfValue::string(KEY)])
            .await;
        client.expect_command(CMD_ON_STATUS).await;
        assert!(harness.registry.is_live().await);

        client
            .command(0, CMD_DELETE_STREAM, 3.0, vec![AmfValue::Number(f64::from(stream_id))])
            .await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!harness.registry.is_live().await);
    }
}
