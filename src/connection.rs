//! The HTTP/2 connection driver: owns one accepted socket end to end — client preface, SETTINGS
//! handshake, the frame read/write loop, per-stream state, and gRPC dispatch, all driven from one
//! `tokio::select!` loop per connection.

use crate::context::ServerContext;
use crate::dispatch;
use crate::error::{ErrorCode, FrameError, Http2Error};
use crate::frame::{local_defaults, peer_defaults, Frame, FrameHeader, SettingsParameter, DEFAULT_INITIAL_WINDOW_SIZE};
use crate::grpc::{self, Metadata, MessageReassembler, Status};
use crate::hpack;
use crate::interceptor::InterceptorChain;
use crate::registry::ServiceRegistry;
use crate::streaming::{RequestStream, ResponseSink};
use bytes::{Buf, Bytes, BytesMut};
use enum_map::EnumMap;
use num_traits::ToPrimitive;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};

pub const CLIENT_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// Matches `frame::settings::DEFAULT_MAX_CONCURRENT_STREAMS` (not itself public — this is the
/// one other place that default belongs).
const DEFAULT_MAX_CONCURRENT_STREAMS: u32 = 100;

/// Knobs the server passes down to every connection it drives.
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    pub max_concurrent_streams: u32,
    pub initial_window_size: u32,
    pub max_message_size: usize,
    pub keepalive_interval: Option<Duration>,
    pub keepalive_timeout: Duration,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            max_concurrent_streams: DEFAULT_MAX_CONCURRENT_STREAMS,
            initial_window_size: DEFAULT_INITIAL_WINDOW_SIZE,
            max_message_size: grpc::DEFAULT_MAX_MESSAGE_SIZE,
            keepalive_interval: None,
            keepalive_timeout: Duration::from_secs(20),
        }
    }
}

/// Everything the connection driver keeps about one stream it is currently serving.
struct StreamRuntime {
    stream: crate::stream::Stream,
    reassembler: MessageReassembler,
    input_tx: Option<mpsc::Sender<Bytes>>,
    cancel_tx: Option<Arc<watch::Sender<bool>>>,
    response_headers_sent: bool,
}

/// A response-direction event a spawned call task hands back to the single connection-writer
/// loop, tagged with the stream it belongs to. The writer owns the socket and the HPACK encoder,
/// so all outbound frames are serialized through this channel rather than written directly by
/// call tasks.
enum StreamEvent {
    ResponseHeaders { stream_id: u32 },
    Message { stream_id: u32, payload: Bytes },
    Trailers { stream_id: u32, status: Status },
}

struct PseudoHeaders {
    method: Option<Bytes>,
    path: Option<Bytes>,
    authority: Option<Bytes>,
    content_type: Option<Bytes>,
    te: Option<Bytes>,
}

/// Split the decoded header list into pseudo-headers the driver itself needs, the gRPC timeout,
/// and the application-visible [`Metadata`].
fn parse_request_headers(pairs: Vec<(Bytes, Bytes)>) -> (PseudoHeaders, Metadata, Option<Duration>) {
    let mut pseudo = PseudoHeaders {
        method: None,
        path: None,
        authority: None,
        content_type: None,
        te: None,
    };
    let mut metadata = Metadata::new();
    let mut timeout = None;

    for (name, value) in pairs {
        match name.as_ref() {
            b":method" => pseudo.method = Some(value),
            b":path" => pseudo.path = Some(value),
            b":authority" => pseudo.authority = Some(value),
            b":scheme" => {}
            b":status" => {}
            b"content-type" => pseudo.content_type = Some(value),
            b"grpc-timeout" => timeout = grpc::parse_grpc_timeout(&value),
            b"te" => pseudo.te = Some(value),
            _ => metadata.insert_wire_header(name, value),
        }
    }
    (pseudo, metadata, timeout)
}

/// Drive one accepted, already-TLS-terminated connection until it closes or is told to stop.
///
/// `peer` is used for [`ServerContext::peer_addr`]; `shutdown` resolves once the server's accept
/// loop has entered graceful shutdown, at which point the driver refuses new streams but lets
/// in-flight ones finish.
pub async fn serve<S>(
    mut socket: S,
    peer: Option<SocketAddr>,
    registry: Arc<ServiceRegistry>,
    chain: InterceptorChain,
    options: ConnectionOptions,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Http2Error>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let mut preface = [0u8; CLIENT_PREFACE.len()];
    socket.read_exact(&mut preface).await?;
    if preface != *CLIENT_PREFACE {
        return Err(Http2Error::BadPreface);
    }

    let local_settings = local_defaults(options.max_concurrent_streams, options.initial_window_size);
    write_frame(
        &mut socket,
        &Frame::Settings {
            ack: false,
            params: local_settings.iter().map(|(k, v)| (k, *v)).collect(),
        },
    )
    .await?;

    let mut peer_settings: EnumMap<SettingsParameter, u32> = peer_defaults();
    let mut encoder = hpack::Encoder::new();
    let mut decoder = hpack::Decoder::new();
    decoder.set_settings_max_size(local_settings[SettingsParameter::HeaderTableSize] as usize);

    let mut connection_send_window: i64 = i64::from(peer_settings[SettingsParameter::InitialWindowSize]);
    let mut connection_recv_window: i64 = i64::from(local_settings[SettingsParameter::InitialWindowSize]);

    let mut streams: HashMap<u32, StreamRuntime> = HashMap::new();
    let mut goaway_sent = false;
    let mut last_peer_stream_id: u32 = 0;

    let (event_tx, mut event_rx) = mpsc::channel::<StreamEvent>(64);

    let mut frame_buf = BytesMut::new();
    let keepalive = tokio::time::sleep(options.keepalive_interval.unwrap_or(Duration::from_secs(3_600)));
    tokio::pin!(keepalive);
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            biased;

            changed = shutdown.changed(), if !goaway_sent => {
                if changed.is_ok() && *shutdown.borrow() {
                    write_frame(&mut socket, &Frame::GoAway {
                        last_stream_id: last_peer_stream_id,
                        error_code: error_code_to_u32(ErrorCode::NoError),
                        debug_data: Bytes::new(),
                    }).await?;
                    goaway_sent = true;
                }
            }

            event = event_rx.recv() => {
                let Some(event) = event else { continue };
                handle_stream_event(&mut socket, &mut streams, &mut encoder, &mut connection_send_window, event).await?;
            }

            frame = read_frame(&mut socket, &mut frame_buf, peer_settings[SettingsParameter::MaxFrameSize]) => {
                let Some(frame) = frame? else { break };
                if options.keepalive_interval.is_some() {
                    keepalive.as_mut().reset(tokio::time::Instant::now() + options.keepalive_interval.unwrap());
                }
                match frame {
                    Frame::Ping { ack: true, .. } => { awaiting_pong = false; }
                    Frame::Ping { ack: false, data } => {
                        write_frame(&mut socket, &Frame::Ping { ack: true, data }).await?;
                    }
                    Frame::Settings { ack: true, .. } => {}
                    Frame::Settings { ack: false, params } => {
                        for (param, value) in params {
                            if param == SettingsParameter::InitialWindowSize {
                                let delta = i64::from(value) - i64::from(peer_settings[param]);
                                for runtime in streams.values_mut() {
                                    runtime.stream.apply_send_window_update(delta)?;
                                }
                            }
                            if param == SettingsParameter::HeaderTableSize {
                                encoder.set_max_size(value as usize);
                            }
                            peer_settings[param] = value;
                        }
                        write_frame(&mut socket, &Frame::Settings { ack: true, params: Vec::new() }).await?;
                    }
                    Frame::WindowUpdate { stream_id: 0, increment } => {
                        connection_send_window += i64::from(increment);
                    }
                    Frame::WindowUpdate { stream_id, increment } => {
                        if let Some(runtime) = streams.get_mut(&stream_id) {
                            runtime.stream.apply_send_window_update(i64::from(increment))?;
                        }
                    }
                    Frame::GoAway { .. } => break,
                    Frame::ResetStream { stream_id, .. } => {
                        if let Some(mut runtime) = streams.remove(&stream_id) {
                            cancel_stream(&mut runtime);
                        }
                    }
                    Frame::Priority { .. } | Frame::Unknown { .. } => {}
                    Frame::PushPromise { .. } => {
                        return Err(Http2Error::Frame(FrameError::PushPromiseRejected));
                    }
                    Frame::Headers { stream_id, end_stream, end_headers, fragment, .. } => {
                        if goaway_sent {
                            continue;
                        }
                        let is_new_stream = !streams.contains_key(&stream_id);
                        if is_new_stream {
                            if stream_id <= last_peer_stream_id {
                                write_frame(&mut socket, &Frame::GoAway {
                                    last_stream_id: last_peer_stream_id,
                                    error_code: error_code_to_u32(ErrorCode::ProtocolError),
                                    debug_data: Bytes::new(),
                                }).await?;
                                return Err(Http2Error::StreamIdOutOfOrder);
                            }
                            if streams.len() >= options.max_concurrent_streams as usize {
                                write_frame(&mut socket, &Frame::ResetStream {
                                    stream_id,
                                    error_code: error_code_to_u32(Http2Error::StreamRefused.error_code()),
                                }).await?;
                                continue;
                            }
                            last_peer_stream_id = stream_id;
                        }
                        let runtime = streams.entry(stream_id).or_insert_with(|| StreamRuntime {
                            stream: crate::stream::Stream::new(
                                stream_id,
                                peer_settings[SettingsParameter::InitialWindowSize],
                                local_settings[SettingsParameter::InitialWindowSize],
                            ),
                            reassembler: MessageReassembler::new(options.max_message_size),
                            input_tx: None,
                            cancel_tx: None,
                            response_headers_sent: false,
                        });
                        if let Some((block, end_stream)) = runtime.stream.receive_request_headers(end_stream, end_headers, fragment)? {
                            let pairs = decoder.decode(&block)?;
                            start_call(
                                stream_id,
                                pairs,
                                end_stream,
                                peer,
                                &registry,
                                &chain,
                                &options,
                                runtime,
                                event_tx.clone(),
                            );
                        }
                    }
                    Frame::Continuation { stream_id, end_headers, fragment } => {
                        if let Some(runtime) = streams.get_mut(&stream_id) {
                            if let Some((block, end_stream)) = runtime.stream.receive_continuation(end_headers, fragment)? {
                                let pairs = decoder.decode(&block)?;
                                start_call(
                                    stream_id,
                                    pairs,
                                    end_stream,
                                    peer,
                                    &registry,
                                    &chain,
                                    &options,
                                    runtime,
                                    event_tx.clone(),
                                );
                            }
                        }
                    }
                    Frame::Data { stream_id, end_stream, wire_length, data } => {
                        connection_recv_window -= i64::from(wire_length);
                        if let Some(runtime) = streams.get_mut(&stream_id) {
                            let data = runtime.stream.receive_data(wire_length, end_stream, data)?;
                            runtime.reassembler.push(&data);
                            match runtime.reassembler.drain_complete() {
                                Ok(messages) => {
                                    if let Some(tx) = &runtime.input_tx {
                                        for (_, message) in messages {
                                            let _ = tx.send(message).await;
                                        }
                                    }
                                }
                                Err(grpc::ReassemblyError::MessageTooLarge { size, max }) => {
                                    runtime.input_tx = None;
                                    let status = Status::resource_exhausted(format!(
                                        "gRPC message of {size} bytes exceeds the configured maximum of {max}"
                                    ));
                                    let _ = event_tx.send(StreamEvent::Trailers { stream_id, status }).await;
                                }
                            }
                            if end_stream {
                                runtime.input_tx = None;
                            }
                        }
                        if connection_recv_window < i64::from(local_settings[SettingsParameter::InitialWindowSize]) / 2 {
                            let increment = local_settings[SettingsParameter::InitialWindowSize] - connection_recv_window.max(0) as u32;
                            write_frame(&mut socket, &Frame::WindowUpdate { stream_id: 0, increment }).await?;
                            connection_recv_window += i64::from(increment);
                        }
                    }
                }
                streams.retain(|_, runtime| !runtime.stream.is_closed());
            }

            () = &mut keepalive, if options.keepalive_interval.is_some() => {
                if awaiting_pong {
                    return Err(Http2Error::Io(std::io::Error::new(std::io::ErrorKind::TimedOut, "keepalive PING unanswered")));
                }
                write_frame(&mut socket, &Frame::Ping { ack: false, data: *b"keepaliv" }).await?;
                awaiting_pong = true;
                keepalive.as_mut().reset(tokio::time::Instant::now() + options.keepalive_timeout);
            }
        }

        if goaway_sent && streams.is_empty() {
            break;
        }
    }

    for runtime in streams.values_mut() {
        cancel_stream(runtime);
    }
    Ok(())
}

fn cancel_stream(runtime: &mut StreamRuntime) {
    runtime.input_tx = None;
    if let Some(tx) = runtime.cancel_tx.take() {
        let _ = tx.send(true);
    }
}

/// Spawn the per-call task once a complete set of request headers has arrived: the method is
/// looked up, a `RequestStream`/`ResponseSink` pair is wired to the stream's runtime state, and
/// the interceptor chain + handler run to completion off the connection's own task so a slow
/// call never blocks the frame loop.
#[allow(clippy::too_many_arguments)]
fn start_call(
    stream_id: u32,
    pairs: Vec<(Bytes, Bytes)>,
    end_stream: bool,
    peer: Option<SocketAddr>,
    registry: &Arc<ServiceRegistry>,
    chain: &InterceptorChain,
    options: &ConnectionOptions,
    runtime: &mut StreamRuntime,
    event_tx: mpsc::Sender<StreamEvent>,
) {
    let (pseudo, metadata, timeout) = parse_request_headers(pairs);

    let path = pseudo.path.map(|p| String::from_utf8_lossy(&p).into_owned());
    let method_ok = pseudo.method.as_deref() == Some(b"POST");
    let content_type_ok = pseudo
        .content_type
        .as_ref()
        .is_some_and(|ct| grpc::content_type_is_grpc(ct));
    let te_ok = pseudo
        .te
        .as_ref()
        .is_some_and(|te| String::from_utf8_lossy(te).split(',').any(|part| part.trim() == "trailers"));
    let _ = pseudo.authority;

    let validation_error = if !method_ok {
        Some(Status::invalid_argument("expected :method POST"))
    } else if !content_type_ok {
        Some(Status::invalid_argument("unsupported content-type"))
    } else if !te_ok {
        Some(Status::invalid_argument("te header must include trailers"))
    } else {
        None
    };

    let (input, input_tx) = RequestStream::channel(8);
    let (output, mut output_rx) = ResponseSink::channel(8);
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let cancel_tx = Arc::new(cancel_tx);
    runtime.input_tx = if end_stream { None } else { Some(input_tx) };
    runtime.cancel_tx = Some(cancel_tx.clone());

    let deadline = timeout.map(|d| Instant::now() + d);
    let ctx = ServerContext::new(
        path.clone().unwrap_or_default(),
        metadata,
        peer,
        deadline,
        cancel_tx,
        cancel_rx,
    );

    let descriptor = path.as_deref().and_then(|p| registry.lookup(p));
    let chain = chain.clone();
    let max_message_size = options.max_message_size;
    let forward_tx = event_tx.clone();

    tokio::spawn(async move {
        if let Some(status) = validation_error {
            let _ = event_tx.send(StreamEvent::Trailers { stream_id, status }).await;
            return;
        }
        let Some(descriptor) = descriptor else {
            let status = dispatch::method_not_found(path.as_deref().unwrap_or(""));
            let _ = event_tx.send(StreamEvent::Trailers { stream_id, status }).await;
            return;
        };
        let _ = event_tx.send(StreamEvent::ResponseHeaders { stream_id }).await;

        let forward = tokio::spawn(async move {
            while let Some(message) = output_rx.recv().await {
                if message.len() > max_message_size {
                    break;
                }
                let framed = grpc::frame_message(&message, false);
                if forward_tx
                    .send(StreamEvent::Message { stream_id, payload: framed })
                    .await
                    .is_err()
                {
                    break;
                }
            }
        });

        let status = dispatch::dispatch(&descriptor, &chain, ctx, input, output).await;
        let _ = forward.await;
        let _ = event_tx.send(StreamEvent::Trailers { stream_id, status }).await;
    });
}

/// Write one queued response-direction event as the corresponding HTTP/2 frame(s). Runs
/// exclusively on the connection's own task, so it is the only writer of HPACK-encoded state.
async fn handle_stream_event<S>(
    socket: &mut S,
    streams: &mut HashMap<u32, StreamRuntime>,
    encoder: &mut hpack::Encoder,
    connection_send_window: &mut i64,
    event: StreamEvent,
) -> Result<(), Http2Error>
where
    S: AsyncWrite + Unpin,
{
    match event {
        StreamEvent::ResponseHeaders { stream_id } => {
            if let Some(runtime) = streams.get_mut(&stream_id) {
                let fragment = encoder.encode(vec![
                    (&b":status"[..], &b"200"[..]),
                    (&b"content-type"[..], grpc::CONTENT_TYPE.as_bytes()),
                ]);
                write_frame(
                    socket,
                    &Frame::Headers {
                        stream_id,
                        end_stream: false,
                        end_headers: true,
                        priority: None,
                        fragment,
                    },
                )
                .await?;
                runtime.response_headers_sent = true;
            }
        }
        StreamEvent::Message { stream_id, payload } => {
            if let Some(runtime) = streams.get_mut(&stream_id) {
                runtime.stream.charge_send_window(payload.len() as u32);
                *connection_send_window -= payload.len() as i64;
                write_frame(
                    socket,
                    &Frame::Data {
                        stream_id,
                        end_stream: false,
                        wire_length: payload.len() as u32,
                        data: payload,
                    },
                )
                .await?;
            }
        }
        StreamEvent::Trailers { stream_id, status } => {
            if let Some(runtime) = streams.get_mut(&stream_id) {
                if !runtime.response_headers_sent {
                    let fragment = encoder.encode(vec![
                        (&b":status"[..], &b"200"[..]),
                        (&b"content-type"[..], grpc::CONTENT_TYPE.as_bytes()),
                        (&b"grpc-status"[..], (status.code as i32).to_string().as_bytes()),
                        (&b"grpc-message"[..], status.encode_message().as_bytes()),
                    ]);
                    write_frame(
                        socket,
                        &Frame::Headers {
                            stream_id,
                            end_stream: true,
                            end_headers: true,
                            priority: None,
                            fragment,
                        },
                    )
                    .await?;
                } else {
                    let fragment = encoder.encode(vec![
                        (&b"grpc-status"[..], (status.code as i32).to_string().as_bytes()),
                        (&b"grpc-message"[..], status.encode_message().as_bytes()),
                    ]);
                    write_frame(
                        socket,
                        &Frame::Headers {
                            stream_id,
                            end_stream: true,
                            end_headers: true,
                            priority: None,
                            fragment,
                        },
                    )
                    .await?;
                }
                runtime.stream.close_local();
            }
        }
    }
    Ok(())
}

async fn write_frame<S>(socket: &mut S, frame: &Frame) -> Result<(), Http2Error>
where
    S: AsyncWrite + Unpin,
{
    let bytes = frame.encode();
    socket.write_all(&bytes).await?;
    Ok(())
}

/// Read exactly one frame, growing `buf` as needed. Returns `Ok(None)` on a clean EOF between
/// frames (the peer closed the connection).
async fn read_frame<S>(
    socket: &mut S,
    buf: &mut BytesMut,
    local_max_frame_size: u32,
) -> Result<Option<Frame>, Http2Error>
where
    S: AsyncRead + Unpin,
{
    while buf.len() < FrameHeader::SIZE {
        let mut chunk = [0u8; 4096];
        let n = socket.read(&mut chunk).await?;
        if n == 0 {
            return if buf.is_empty() {
                Ok(None)
            } else {
                Err(Http2Error::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "connection closed mid-frame",
                )))
            };
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    let mut header_bytes = [0u8; FrameHeader::SIZE];
    header_bytes.copy_from_slice(&buf[..FrameHeader::SIZE]);
    let header = FrameHeader::decode(&header_bytes);

    let total = FrameHeader::SIZE + header.length as usize;
    while buf.len() < total {
        let mut chunk = [0u8; 4096];
        let n = socket.read(&mut chunk).await?;
        if n == 0 {
            return Err(Http2Error::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "connection closed mid-frame",
            )));
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    buf.advance(FrameHeader::SIZE);
    let payload = buf.split_to(header.length as usize).freeze();
    let frame = Frame::decode(header, payload, local_max_frame_size)?;
    Ok(Some(frame))
}

fn error_code_to_u32(code: ErrorCode) -> u32 {
    code.to_u32().unwrap_or(0)
}
