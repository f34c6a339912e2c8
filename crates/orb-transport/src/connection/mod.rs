//! GIOP connections
//!
//! A [`Connection`] wraps one byte stream. It serializes writers behind a
//! FIFO write lock, allocates request ids, reassembles fragmented messages
//! and hands every complete message to the right place: replies to the
//! waiting room, requests to the dispatcher.
//!
//! The read side is owned either by an [`EventMultiplexer`] registration or
//! by a dedicated reader task, never both.

mod state;

pub use state::{ConnectionState, ReadStrategy};

use crate::backoff::BackoffTimer;
use crate::buffer_pool::ByteBufferPool;
use crate::cache::ConnectionOwner;
use crate::config::TransportConfig;
use crate::dispatcher::{target_object_key, RequestDispatcher};
use crate::endpoint::Endpoint;
use crate::error::{Result, TransportError};
use crate::interceptor::{InterceptorChain, InterceptorState, RequestInfo};
use crate::multiplexer::{EventHandler, EventMultiplexer, HandlerOutcome, Interest, Registration};
use crate::waiting_room::{PendingInvocation, ResponseWaitingRoom};
use crate::worker_pool::WorkerPool;
use bytes::Bytes;
use futures::future::BoxFuture;
use giop::{
    CompletionStatus, FragmentAssembler, FragmentGenerator, Frame, GiopError, GiopTransport,
    LocateReplyMessage, LocateRequestMessage, LocateStatus, Message, MsgType, ReplyMessage,
    RequestMessage, SystemException, SystemExceptionKind,
};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Fragmented messages one connection may be reassembling at once
pub const MAX_PENDING_REASSEMBLIES: usize = 64;

/// Settings a connection is created with
#[derive(Clone)]
pub struct ConnectionOptions {
    pub is_server_side: bool,
    pub read_strategy: ReadStrategy,
    pub fragment_size: usize,
    pub max_message_size: usize,
    pub buffer_pool: Arc<ByteBufferPool>,
    /// Serves incoming requests; required on the server side
    pub dispatcher: Option<Arc<dyn RequestDispatcher>>,
    pub interceptors: Arc<InterceptorChain>,
    /// Runs dispatched requests; `tokio::spawn` when absent
    pub worker_pool: Option<Arc<WorkerPool>>,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            is_server_side: false,
            read_strategy: ReadStrategy::Multiplexed,
            fragment_size: 1024,
            max_message_size: giop::DEFAULT_MAX_MESSAGE_SIZE,
            buffer_pool: Arc::new(ByteBufferPool::default()),
            dispatcher: None,
            interceptors: Arc::new(InterceptorChain::new()),
            worker_pool: None,
        }
    }
}

impl ConnectionOptions {
    pub fn client() -> Self {
        Self::default()
    }

    pub fn server(dispatcher: Arc<dyn RequestDispatcher>) -> Self {
        Self {
            is_server_side: true,
            dispatcher: Some(dispatcher),
            ..Self::default()
        }
    }

    pub fn from_config(config: &TransportConfig) -> Self {
        Self {
            read_strategy: config.read_strategy,
            fragment_size: config.fragment_size,
            max_message_size: config.max_message_size,
            ..Self::default()
        }
    }
}

pub struct Connection {
    id: u64,
    peer: Endpoint,
    options: ConnectionOptions,
    state: Mutex<ConnectionState>,
    closed: AtomicBool,
    writer: Arc<AsyncMutex<BoxedWriter>>,
    reader: AsyncMutex<GiopTransport<BoxedReader>>,
    shutdown: watch::Sender<bool>,
    next_request_id: AtomicU32,
    waiting_room: ResponseWaitingRoom,
    fragments: Mutex<HashMap<u32, FragmentAssembler>>,
    /// Server side: requests whose reply has not been written yet
    in_progress: Mutex<HashSet<u32>>,
    /// Server side: requests handed to the dispatcher and not finished
    dispatching: AtomicUsize,
    busy: AtomicBool,
    last_used: Mutex<Instant>,
    registration: Mutex<Option<Registration>>,
    owner: Mutex<Option<Weak<dyn ConnectionOwner>>>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("state", &self.state())
            .field("server_side", &self.options.is_server_side)
            .field("busy", &self.is_busy())
            .field("pending", &self.waiting_room.len())
            .finish()
    }
}

impl Connection {
    /// Wrap an established TCP stream
    pub fn new(stream: TcpStream, peer: Endpoint, options: ConnectionOptions) -> Arc<Self> {
        let (read_half, write_half) = stream.into_split();
        Self::from_parts(read_half, write_half, peer, options)
    }

    /// Wrap any pair of stream halves
    pub fn from_parts<R, W>(reader: R, writer: W, peer: Endpoint, options: ConnectionOptions) -> Arc<Self>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
        let reader: BoxedReader = Box::new(reader);
        let writer: BoxedWriter = Box::new(writer);
        let transport = GiopTransport::new(reader).with_max_message_size(options.max_message_size);
        let (shutdown, _) = watch::channel(false);
        debug!(
            "connection {} created for {} ({})",
            id,
            peer,
            if options.is_server_side { "server" } else { "client" }
        );
        Arc::new(Self {
            id,
            peer,
            options,
            state: Mutex::new(ConnectionState::Opening),
            closed: AtomicBool::new(false),
            writer: Arc::new(AsyncMutex::new(writer)),
            reader: AsyncMutex::new(transport),
            shutdown,
            next_request_id: AtomicU32::new(1),
            waiting_room: ResponseWaitingRoom::new(),
            fragments: Mutex::new(HashMap::new()),
            in_progress: Mutex::new(HashSet::new()),
            dispatching: AtomicUsize::new(0),
            busy: AtomicBool::new(false),
            last_used: Mutex::new(Instant::now()),
            registration: Mutex::new(None),
            owner: Mutex::new(None),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer(&self) -> &Endpoint {
        &self.peer
    }

    pub fn is_server_side(&self) -> bool {
        self.options.is_server_side
    }

    pub fn read_strategy(&self) -> ReadStrategy {
        self.options.read_strategy
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    pub fn is_open(&self) -> bool {
        !self.is_closed() && self.state().is_open()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn open(&self) {
        let mut state = self.state.lock();
        if *state == ConnectionState::Opening {
            *state = ConnectionState::Established;
            info!("connection {} established with {}", self.id, self.peer);
        }
    }

    /// Close the connection. Only the first call has any effect.
    ///
    /// Waiters fail with `ConnectionClosed`. A server-side connection tells
    /// its peer with a `CloseConnection` message first.
    pub fn close(&self) {
        let next = if self.options.is_server_side {
            ConnectionState::CloseSent
        } else {
            ConnectionState::Abort
        };
        if self.terminate(next, TransportError::ConnectionClosed) {
            info!("connection {} to {} closed", self.id, self.peer);
        }
    }

    /// Tear the connection down after a failure; waiters receive `error`
    pub fn abort(&self, error: TransportError) {
        let reason = error.to_string();
        if self.terminate(ConnectionState::Abort, error) {
            warn!("connection {} to {} aborted: {}", self.id, self.peer, reason);
        }
    }

    fn close_received(&self) {
        if self.terminate(ConnectionState::CloseRecvd, TransportError::ClosedByPeer) {
            info!("connection {} closed by {}", self.id, self.peer);
        }
    }

    fn terminate(&self, next: ConnectionState, error: TransportError) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        {
            let mut state = self.state.lock();
            debug!("connection {}: {} -> {}", self.id, *state, next);
            *state = next;
        }

        let failed = self.waiting_room.close(error);
        if failed > 0 {
            debug!("connection {}: failed {} pending requests", self.id, failed);
        }
        self.fragments.lock().clear();
        self.in_progress.lock().clear();

        let registration = self.registration.lock().take();
        if let Some(registration) = registration {
            registration.cancel_nowait();
        }
        self.shutdown.send_replace(true);
        self.release_channel(next == ConnectionState::CloseSent);

        let owner = self.owner.lock().take();
        if let Some(owner) = owner.and_then(|weak| weak.upgrade()) {
            owner.connection_closed(self.id);
        }
        true
    }

    /// Shut the write half down, after any writer holding the lock is done
    fn release_channel(&self, send_close: bool) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let writer = self.writer.clone();
        let id = self.id;
        runtime.spawn(async move {
            let mut writer = writer.lock().await;
            if send_close {
                let close = Message::CloseConnection.encode();
                if let Err(e) = writer.write_all(&close).await {
                    trace!("connection {}: could not send CloseConnection: {}", id, e);
                }
            }
            if let Err(e) = writer.shutdown().await {
                trace!("connection {}: shutdown: {}", id, e);
            }
        });
    }

    async fn closed_signal(&self) {
        let mut rx = self.shutdown.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    pub(crate) fn set_owner(&self, owner: Weak<dyn ConnectionOwner>) {
        *self.owner.lock() = Some(owner);
    }

    // Write path

    /// Take the write lock. Waiters are served in arrival order.
    pub async fn write_lock(&self) -> Result<WriteGuard<'_>> {
        if self.is_closed() {
            return Err(TransportError::ConnectionClosed);
        }
        let writer = self.writer.lock().await;
        if self.is_closed() {
            return Err(TransportError::ConnectionClosed);
        }
        Ok(WriteGuard {
            connection: self,
            writer,
        })
    }

    /// Encode, fragment and write one message under a single write lock
    pub async fn send_message(&self, message: &Message) -> Result<()> {
        let fragment_size = self.options.fragment_size;
        let mut buf = self.options.buffer_pool.acquire(fragment_size);
        message.encode_into(&mut buf);

        let frames = if buf.len() > fragment_size {
            let frames = FragmentGenerator::fragment(Bytes::copy_from_slice(&buf), fragment_size)?;
            trace!(
                "connection {}: {:?} split into {} fragments",
                self.id,
                message.msg_type(),
                frames.len()
            );
            Some(frames)
        } else {
            None
        };

        let mut guard = self.write_lock().await?;
        match &frames {
            None => guard.send_without_lock(&buf).await?,
            Some(frames) => {
                for frame in frames {
                    guard.send_without_lock(frame).await?;
                }
            }
        }
        drop(guard);
        self.options.buffer_pool.release(buf);
        Ok(())
    }

    /// Next request id, starting at 1.
    ///
    /// Ids are never reused on one connection; once the counter wraps the
    /// connection cannot carry more requests.
    pub fn allocate_request_id(&self) -> Result<u32> {
        self.next_request_id
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |id| {
                (id != 0).then(|| id.wrapping_add(1))
            })
            .map_err(|_| {
                error!("connection {}: request ids exhausted", self.id);
                TransportError::RequestIdsExhausted
            })
    }

    #[cfg(test)]
    pub(crate) fn set_next_request_id(&self, id: u32) {
        self.next_request_id.store(id, Ordering::Release);
    }

    /// Send a request whose id came from [`allocate_request_id`].
    ///
    /// When a reply is expected the waiter is registered before the first
    /// byte is written, so the reply can never arrive unclaimed.
    ///
    /// [`allocate_request_id`]: Self::allocate_request_id
    pub async fn send_request(&self, request: RequestMessage) -> Result<Option<PendingInvocation>> {
        let request_id = request.request_id;
        let pending = if request.response_expected {
            Some(self.register_waiter(request_id)?)
        } else {
            None
        };
        trace!(
            "connection {}: sending request {} ({})",
            self.id,
            request_id,
            request.operation
        );
        if let Err(err) = self.send_message(&Message::Request(request)).await {
            self.unregister_waiter(request_id);
            return Err(err);
        }
        Ok(pending)
    }

    pub async fn send_cancel(&self, request_id: u32) -> Result<()> {
        debug!("connection {}: cancelling request {}", self.id, request_id);
        self.send_message(&Message::CancelRequest { request_id }).await
    }

    // Waiting room

    pub fn register_waiter(&self, request_id: u32) -> Result<PendingInvocation> {
        self.waiting_room.register_waiter(request_id)
    }

    pub fn unregister_waiter(&self, request_id: u32) -> bool {
        self.waiting_room.unregister_waiter(request_id)
    }

    pub fn response_received(&self, message: Message) -> bool {
        self.waiting_room.response_received(message)
    }

    pub async fn wait_for_response(&self, invocation: PendingInvocation) -> Result<Message> {
        self.waiting_room.wait_for_response(invocation).await
    }

    pub async fn wait_for_response_timeout(
        &self,
        invocation: PendingInvocation,
        timeout: Duration,
    ) -> Result<Message> {
        self.waiting_room
            .wait_for_response_timeout(invocation, timeout)
            .await
    }

    pub async fn wait_for_response_with_backoff(
        &self,
        invocation: PendingInvocation,
        backoff: &mut BackoffTimer,
    ) -> Result<Message> {
        self.waiting_room
            .wait_for_response_with_backoff(invocation, backoff)
            .await
    }

    pub fn pending_requests(&self) -> usize {
        self.waiting_room.len()
    }

    pub fn is_waiting_for(&self, request_id: u32) -> bool {
        self.waiting_room.is_registered(request_id)
    }

    pub fn pending_fragments(&self) -> usize {
        self.fragments.lock().len()
    }

    // Read path

    /// Read and process one message.
    ///
    /// Returns `true` when the caller may stop reading: always for the
    /// multiplexed strategy, and once the connection is closed for the
    /// dedicated one.
    pub async fn read(self: &Arc<Self>) -> Result<bool> {
        let frame = {
            let mut reader = self.reader.lock().await;
            tokio::select! {
                biased;
                _ = self.closed_signal() => return Ok(true),
                frame = reader.read_frame() => frame,
            }
        };

        match frame {
            Ok(frame) => {
                self.touch();
                if let Err(err) = self.process_frame(frame) {
                    self.abort(err.clone());
                    return Err(err);
                }
            }
            Err(GiopError::ConnectionClosed) => {
                self.abort(TransportError::ClosedByPeer);
                return Ok(true);
            }
            Err(err) => {
                let err = TransportError::from(err);
                self.abort(err.clone());
                return Err(err);
            }
        }

        Ok(match self.options.read_strategy {
            ReadStrategy::Multiplexed => true,
            ReadStrategy::Dedicated => self.is_closed(),
        })
    }

    /// Loop on `read` in a task of its own until the connection closes
    pub fn start_reader(self: &Arc<Self>) -> JoinHandle<()> {
        let conn = self.clone();
        tokio::spawn(async move {
            loop {
                match conn.read().await {
                    Ok(true) => break,
                    Ok(false) => {}
                    Err(err) => {
                        debug!("connection {}: reader stopped: {}", conn.id, err);
                        break;
                    }
                }
            }
            trace!("connection {}: reader task done", conn.id);
        })
    }

    /// Hand the read side to `multiplexer`
    pub fn register_with(self: &Arc<Self>, multiplexer: &EventMultiplexer) -> Result<()> {
        let registration = multiplexer.register(self.clone())?;
        *self.registration.lock() = Some(registration);
        if self.is_closed() {
            let registration = self.registration.lock().take();
            if let Some(registration) = registration {
                registration.cancel_nowait();
            }
        }
        Ok(())
    }

    fn process_frame(self: &Arc<Self>, frame: Frame) -> Result<()> {
        if frame.header.msg_type == MsgType::Fragment {
            let request_id = frame
                .request_id()
                .ok_or_else(|| TransportError::Protocol("fragment without request id".into()))?;
            let mut table = self.fragments.lock();
            let Some(assembler) = table.get_mut(&request_id) else {
                debug!(
                    "connection {}: discarding fragment for unknown request {}",
                    self.id, request_id
                );
                return Ok(());
            };
            let Some(data) = assembler.add_fragment(&frame)? else {
                return Ok(());
            };
            table.remove(&request_id);
            drop(table);
            trace!("connection {}: request {} reassembled", self.id, request_id);
            let message = Message::decode(&data)?;
            return self.handle_message(message);
        }

        if frame.header.flags.has_more_fragments() {
            let assembler = FragmentAssembler::new(&frame, self.options.max_message_size)?;
            let request_id = assembler.request_id();
            let mut table = self.fragments.lock();
            if table.contains_key(&request_id) {
                return Err(TransportError::Protocol(format!(
                    "second initial fragment for request {}",
                    request_id
                )));
            }
            if table.len() >= MAX_PENDING_REASSEMBLIES {
                return Err(TransportError::Protocol(format!(
                    "more than {} fragmented messages in flight",
                    MAX_PENDING_REASSEMBLIES
                )));
            }
            trace!("connection {}: first fragment of {}", self.id, request_id);
            table.insert(request_id, assembler);
            return Ok(());
        }

        let message = frame.decode()?;
        self.handle_message(message)
    }

    fn handle_message(self: &Arc<Self>, message: Message) -> Result<()> {
        match message {
            Message::Reply(_) | Message::LocateReply(_) => {
                self.waiting_room.response_received(message);
            }
            Message::Request(request) => self.dispatch_request(request),
            Message::LocateRequest(locate) => self.dispatch_locate(locate),
            Message::CancelRequest { request_id } => {
                if self.in_progress.lock().remove(&request_id) {
                    debug!(
                        "connection {}: request {} cancelled, reply suppressed",
                        self.id, request_id
                    );
                }
            }
            Message::CloseConnection => self.close_received(),
            Message::MessageError => {
                return Err(TransportError::Protocol(format!(
                    "{} reported a message error",
                    self.peer
                )));
            }
            Message::Fragment(fragment) => {
                debug!(
                    "connection {}: stray fragment for request {}",
                    self.id, fragment.request_id
                );
            }
        }
        Ok(())
    }

    fn dispatch_request(self: &Arc<Self>, request: RequestMessage) {
        let request_id = request.request_id;
        let response_expected = request.response_expected;
        if response_expected {
            self.in_progress.lock().insert(request_id);
        }

        let conn = self.clone();
        let active = ActiveDispatch::new(self.clone());
        let job = async move {
            let _active = active;
            let Some(dispatcher) = conn.options.dispatcher.clone() else {
                warn!(
                    "connection {}: no dispatcher for request {} ({})",
                    conn.id, request_id, request.operation
                );
                let ex = SystemException::new(SystemExceptionKind::NoImplement, 0, CompletionStatus::No);
                conn.send_reply(ReplyMessage::system_exception(request_id, &ex)).await;
                return;
            };

            let interceptors = conn.options.interceptors.clone();
            let mut state = InterceptorState::new();
            let mut info = RequestInfo::new(
                request_id,
                request.operation.clone(),
                target_object_key(&request.target).unwrap_or_default(),
            );
            info.response_expected = response_expected;
            interceptors.receive_request_service_contexts(&mut state, &info);
            interceptors.receive_request(&mut state, &info);

            let reply = dispatcher.dispatch(request).await.into_reply(request_id);
            info.reply_status = Some(reply.status);
            if response_expected && !conn.in_progress.lock().remove(&request_id) {
                debug!(
                    "connection {}: reply to cancelled request {} withheld",
                    conn.id, request_id
                );
                interceptors.send_other(&mut state, &info);
                return;
            }
            interceptors.send_for_status(&mut state, &info, reply.status);

            if response_expected {
                conn.write_reply(reply).await;
            }
        };

        // The pool bounds running jobs only; queued jobs still count as
        // dispatching, so the connection stays busy until they finish.
        match &self.options.worker_pool {
            Some(pool) => {
                pool.spawn(job);
                let queued = pool.queued();
                if queued > pool.size() {
                    debug!(
                        "connection {}: request {} behind {} queued jobs",
                        self.id, request_id, queued
                    );
                }
            }
            None => {
                tokio::spawn(job);
            }
        }
    }

    async fn send_reply(&self, reply: ReplyMessage) {
        if !self.in_progress.lock().remove(&reply.request_id) {
            trace!("connection {}: reply {} dropped", self.id, reply.request_id);
            return;
        }
        self.write_reply(reply).await;
    }

    async fn write_reply(&self, reply: ReplyMessage) {
        let request_id = reply.request_id;
        if let Err(e) = self.send_message(&Message::Reply(reply)).await {
            debug!("connection {}: reply {} not sent: {}", self.id, request_id, e);
        }
    }

    fn dispatch_locate(self: &Arc<Self>, locate: LocateRequestMessage) {
        let reply = match &self.options.dispatcher {
            Some(dispatcher) => dispatcher.locate(&locate),
            None => LocateReplyMessage {
                request_id: locate.request_id,
                status: LocateStatus::UnknownObject,
                body: Bytes::new(),
            },
        };
        let conn = self.clone();
        tokio::spawn(async move {
            if let Err(e) = conn.send_message(&Message::LocateReply(reply)).await {
                debug!("connection {}: locate reply not sent: {}", conn.id, e);
            }
        });
    }

    // Cache bookkeeping

    /// Claim the connection for one caller
    pub fn try_acquire(&self) -> bool {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn release(&self) {
        self.touch();
        self.busy.store(false, Ordering::Release);
    }

    /// Claimed by a caller, serving a request, or waiting for a reply
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire) || self.has_outstanding_work()
    }

    /// Requests in dispatch or registered waiters
    pub fn has_outstanding_work(&self) -> bool {
        self.dispatching.load(Ordering::Acquire) > 0 || !self.waiting_room.is_empty()
    }

    pub fn touch(&self) {
        *self.last_used.lock() = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_used.lock().elapsed()
    }

    #[cfg(test)]
    pub(crate) fn set_last_used(&self, at: Instant) {
        *self.last_used.lock() = at;
    }
}

/// Counts one request as dispatching for as long as it lives
struct ActiveDispatch {
    connection: Arc<Connection>,
}

impl ActiveDispatch {
    fn new(connection: Arc<Connection>) -> Self {
        connection.dispatching.fetch_add(1, Ordering::AcqRel);
        Self { connection }
    }
}

impl Drop for ActiveDispatch {
    fn drop(&mut self) {
        self.connection.touch();
        self.connection.dispatching.fetch_sub(1, Ordering::AcqRel);
    }
}

impl EventHandler for Connection {
    fn name(&self) -> String {
        format!("connection {} ({})", self.id, self.peer)
    }

    fn interest(&self) -> Interest {
        Interest::Readable
    }

    fn ready(self: Arc<Self>) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            let mut reader = self.reader.lock().await;
            tokio::select! {
                biased;
                _ = self.closed_signal() => {}
                // Errors resurface from the `read` that follows
                _ = reader.fill_frame() => {}
            }
        })
    }

    fn handle_event(self: Arc<Self>, registration: Registration) -> BoxFuture<'static, HandlerOutcome> {
        Box::pin(async move {
            if !registration.is_active() || self.is_closed() {
                return HandlerOutcome::Done;
            }
            match self.read().await {
                Ok(_) if self.is_closed() => HandlerOutcome::Done,
                Ok(_) => HandlerOutcome::Rearm,
                Err(err) => {
                    debug!("connection {}: read failed: {}", self.id, err);
                    HandlerOutcome::Done
                }
            }
        })
    }

    fn should_use_worker_thread_for_event(&self) -> bool {
        false
    }
}

/// Exclusive access to a connection's write half; dropping it unlocks
pub struct WriteGuard<'a> {
    connection: &'a Connection,
    writer: AsyncMutexGuard<'a, BoxedWriter>,
}

impl WriteGuard<'_> {
    /// Write already encoded frames. An I/O failure aborts the connection.
    pub async fn send_without_lock(&mut self, data: &[u8]) -> Result<()> {
        let written = match self.writer.write_all(data).await {
            Ok(()) => self.writer.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            let err = TransportError::from(e);
            self.connection.abort(err.clone());
            return Err(err);
        }
        Ok(())
    }
}
