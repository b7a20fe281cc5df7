//! Single-threaded reactor: accepts connections, drives `mio`'s readiness notifications,
//! owns the idle-connection timer list, and is the only thread allowed to mutate the
//! connection table or the timer list.
//!
//! A listening socket and a signal source are registered alongside accepted
//! connections in one `mio::Poll` instance. Socket I/O (`recv`, `writev`) and any
//! timer-list mutation happen only on this thread; everything CPU/DB-bound
//! (`Connection::process`) is handed to the worker pool (`src/worker.rs`).
//! Timer-driven idle disconnection is paired with an `alarm(2)`-style periodic sweep
//! delivered through `signal-hook-mio`'s pipe-backed `mio::event::Source`, registered
//! directly into the same `Poll`, rather than a hand-rolled `pipe(2)` self-pipe plus
//! raw signal handlers.
//!
//! One-shot readiness: `mio` has no native `EPOLLONESHOT` equivalent, so it's reproduced by
//! always deregistering a connection's socket the instant any event fires for it, and only
//! registering it again (a fresh add, not a modify) once a thread has decided the next
//! interest. Between those two calls the fd is absent from the poll set and cannot
//! generate a second event, which is exactly the property one-shot delivery requires.

use std::collections::HashMap;
use std::io::{self, ErrorKind, Write};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use crossbeam_channel::{unbounded, Receiver};
use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Token, Waker};
use signal_hook_mio::v0_8::Signals;
use slab::Slab;

use crate::accounts::Accounts;
use crate::config::Config;
use crate::connection::{Connection, ReadOutcome, WriteOutcome};
use crate::error::StartupError;
use crate::logger::Logger;
use crate::queue::BoundedQueue;
use crate::timer::TimerList;
use crate::worker::{WorkItem, WorkerPool};

const LISTEN_TOKEN: Token = Token(usize::MAX - 1);
const SIGNAL_TOKEN: Token = Token(usize::MAX - 2);
const WAKE_TOKEN: Token = Token(usize::MAX - 3);

/// Hard cap on simultaneously open connections. New connections beyond this are
/// rejected with a short text response rather than accepted and immediately starved.
const MAX_FD: usize = 65536;

const BUSY_RESPONSE: &[u8] = b"HTTP/1.1 503 Service Unavailable\r\nConnection: close\r\nContent-Length: 0\r\n\r\n";

fn now_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

pub struct Reactor {
    poll: Poll,
    listener: TcpListener,
    signals: Signals,

    connections: Slab<Arc<Mutex<Connection>>>,
    timers: TimerList<Token>,
    timer_keys: HashMap<Token, usize>,

    queue: BoundedQueue<WorkItem>,
    close_rx: Receiver<Token>,
    waker: Arc<Waker>,

    worker_pool: Option<WorkerPool>,
    config: Arc<Config>,
    logger: Logger,

    stop: bool,
}

impl Reactor {
    /// Builds the reactor: creates the `Poll` instance, binds and registers the listening
    /// socket, installs the `SIGALRM`/`SIGTERM` signal source, and spawns the worker pool.
    pub fn new(
        listener: std::net::TcpListener,
        config: Arc<Config>,
        accounts: Arc<Accounts>,
        logger: Logger,
    ) -> Result<Self, StartupError> {
        listener.set_nonblocking(true).map_err(StartupError::Bind)?;
        let mut listener = TcpListener::from_std(listener);

        let poll = Poll::new().map_err(StartupError::PollCreate)?;
        poll.registry()
            .register(&mut listener, LISTEN_TOKEN, Interest::READABLE)
            .map_err(StartupError::PollRegister)?;

        let mut signals =
            Signals::new([libc::SIGALRM, libc::SIGTERM]).map_err(StartupError::SignalHandler)?;
        poll.registry()
            .register(&mut signals, SIGNAL_TOKEN, Interest::READABLE)
            .map_err(StartupError::PollRegister)?;

        let waker =
            Arc::new(Waker::new(poll.registry(), WAKE_TOKEN).map_err(StartupError::PollRegister)?);

        let (close_tx, close_rx) = unbounded();
        let queue = BoundedQueue::new(config.queue_capacity);
        let worker_registry = poll.registry().try_clone().map_err(StartupError::PollRegister)?;
        let doc_root = Arc::new(config.doc_root.clone());

        let worker_pool = WorkerPool::spawn(
            config.thread_count,
            queue.clone(),
            worker_registry,
            close_tx,
            Arc::clone(&waker),
            accounts,
            doc_root,
            logger.clone(),
        )
        .map_err(StartupError::WorkerSpawn)?;

        unsafe {
            libc::signal(libc::SIGPIPE, libc::SIG_IGN);
            libc::alarm(config.timeslot_seconds as u32);
        }

        Ok(Reactor {
            poll,
            listener,
            signals,
            connections: Slab::new(),
            timers: TimerList::new(),
            timer_keys: HashMap::new(),
            queue,
            close_rx,
            waker,
            worker_pool: Some(worker_pool),
            config,
            logger,
            stop: false,
        })
    }

    /// Runs the event loop until `SIGTERM` is observed.
    pub fn run(mut self) -> Result<(), StartupError> {
        let mut events = Events::with_capacity(1024);

        while !self.stop {
            match self.poll.poll(&mut events, None) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(StartupError::PollWait(e)),
            }

            let mut alarm_fired = false;

            for event in events.iter() {
                match event.token() {
                    LISTEN_TOKEN => self.accept(),
                    SIGNAL_TOKEN => {
                        for sig in self.signals.pending() {
                            if sig == libc::SIGALRM {
                                alarm_fired = true;
                            } else if sig == libc::SIGTERM {
                                self.stop = true;
                            }
                        }
                    }
                    WAKE_TOKEN => self.drain_closed(),
                    token => self.dispatch(token, event),
                }
            }

            if alarm_fired {
                self.sweep_idle();
                unsafe { libc::alarm(self.config.timeslot_seconds as u32) };
            }
        }

        self.shutdown();
        Ok(())
    }

    fn accept(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((mut stream, peer)) => {
                    if self.connections.len() >= MAX_FD {
                        let _ = stream.write_all(BUSY_RESPONSE);
                        continue;
                    }
                    let entry = self.connections.vacant_entry();
                    let token = Token(entry.key());

                    if let Err(e) = self.poll.registry().register(&mut stream, token, Interest::READABLE) {
                        self.logger.warn(format!("failed to register accepted connection: {e}"));
                        continue;
                    }

                    let conn = Connection::new(token, stream, peer, self.config.read_buf, self.config.write_buf);
                    entry.insert(Arc::new(Mutex::new(conn)));

                    let expire = now_secs() + self.config.inactivity_timeout_secs();
                    let key = self.timers.add(expire, token);
                    self.timer_keys.insert(token, key);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.logger.warn(format!("accept failed: {e}"));
                    break;
                }
            }
        }
    }

    fn dispatch(&mut self, token: Token, event: &mio::event::Event) {
        if !self.connections.contains(token.0) {
            return;
        }

        if event.is_error() || event.is_read_closed() {
            self.close_token(token);
            return;
        }

        if event.is_readable() {
            self.handle_readable(token);
        } else if event.is_writable() {
            self.handle_writable(token);
        }
    }

    fn handle_readable(&mut self, token: Token) {
        let Some(conn) = self.connections.get(token.0).cloned() else { return };
        let _ = self.poll.registry().deregister_connection(&conn);

        let outcome = {
            let mut guard = conn.lock().unwrap();
            guard.read_from_socket()
        };

        match outcome {
            Ok(ReadOutcome::Ok) => {
                self.touch_timer(token);
                if !self.queue.push(WorkItem::Process { token, conn }) {
                    self.logger.warn(format!("work queue full, dropping request for {token:?}"));
                    self.close_token(token);
                }
            }
            Ok(ReadOutcome::Closed) | Err(_) => self.close_token(token),
        }
    }

    fn handle_writable(&mut self, token: Token) {
        let Some(conn) = self.connections.get(token.0).cloned() else { return };
        let _ = self.poll.registry().deregister_connection(&conn);

        let outcome = {
            let mut guard = conn.lock().unwrap();
            guard.write_to_socket()
        };

        match outcome {
            Ok(WriteOutcome::Pending) => {
                let mut guard = conn.lock().unwrap();
                if let Err(e) = guard.register(self.poll.registry(), Interest::WRITABLE) {
                    self.logger.warn(format!("failed to rearm {token:?} for write: {e}"));
                }
            }
            Ok(WriteOutcome::Done { keep_alive: true }) => {
                self.touch_timer(token);
                let mut guard = conn.lock().unwrap();
                if let Err(e) = guard.register(self.poll.registry(), Interest::READABLE) {
                    self.logger.warn(format!("failed to rearm {token:?} for read: {e}"));
                }
            }
            Ok(WriteOutcome::Done { keep_alive: false }) | Err(_) => self.close_token(token),
        }
    }

    fn touch_timer(&mut self, token: Token) {
        if let Some(&key) = self.timer_keys.get(&token) {
            self.timers.adjust(key, now_secs() + self.config.inactivity_timeout_secs());
        }
    }

    /// Drains all expired timers, then closes each connection whose timer fired.
    /// Collecting tokens first instead of closing inline during `tick` keeps list
    /// mutations out of the middle of the walk, matching the deferred-mutation
    /// requirement in the timer list's own invariants.
    fn sweep_idle(&mut self) {
        let now = now_secs();
        let mut expired = Vec::new();
        self.timers.tick(now, |token| expired.push(token));
        for token in expired {
            self.timer_keys.remove(&token);
            self.close_token(token);
        }
    }

    fn drain_closed(&mut self) {
        while let Ok(token) = self.close_rx.try_recv() {
            self.close_token(token);
        }
    }

    fn close_token(&mut self, token: Token) {
        if let Some(conn) = self.connections.try_remove(token.0) {
            let mut guard = conn.lock().unwrap();
            let _ = guard.deregister(self.poll.registry());
        }
        if let Some(key) = self.timer_keys.remove(&token) {
            self.timers.delete(key);
        }
    }

    fn shutdown(mut self) {
        self.drain_closed();
        for _ in 0..self.config.thread_count {
            while !self.queue.push(WorkItem::Shutdown) {
                std::thread::yield_now();
            }
        }
        if let Some(pool) = self.worker_pool.take() {
            pool.join();
        }
    }
}

/// Small extension so `dispatch`'s deregister-before-handling can operate on an
/// `Arc<Mutex<Connection>>` without repeating the lock dance at each call site.
trait RegistryExt {
    fn deregister_connection(&self, conn: &Arc<Mutex<Connection>>) -> io::Result<()>;
}

impl RegistryExt for mio::Registry {
    fn deregister_connection(&self, conn: &Arc<Mutex<Connection>>) -> io::Result<()> {
        conn.lock().unwrap().deregister(self)
    }
}
