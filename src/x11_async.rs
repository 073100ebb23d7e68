//! X11 Event Source
//!
//! Feeds the async main loop. A blocking task watches the connection's
//! socket with mio and wakes the loop when the server has written
//! something; the loop then drains events without blocking.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io;
use std::os::unix::io::AsRawFd;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use mio::unix::SourceFd;
use mio::{Interest, Token};
use tokio::sync::Notify;
use tracing::{debug, warn};
use x11rb::connection::Connection;
use x11rb::protocol::Event;
use x11rb::rust_connection::RustConnection;

/// Events read off the connection out of turn (during a blocking
/// roundtrip), to be handled before anything new
pub type EventQueue = Rc<RefCell<VecDeque<Event>>>;

const SOCKET: Token = Token(0);

/// Upper bound on how long the watcher takes to notice shutdown
const STOP_CHECK_INTERVAL: Duration = Duration::from_millis(100);

pub struct EventSource {
    conn: Arc<RustConnection>,
    deferred: EventQueue,
    readable: Arc<Notify>,
    stop: Arc<AtomicBool>,
}

impl EventSource {
    /// Start watching `conn`. Events already in `deferred` come out first.
    pub fn new(conn: Arc<RustConnection>, deferred: EventQueue) -> Result<Self> {
        let poll = socket_poll(&conn)?;
        let readable = Arc::new(Notify::new());
        let stop = Arc::new(AtomicBool::new(false));

        tokio::task::spawn_blocking({
            let readable = readable.clone();
            let stop = stop.clone();
            move || watch_socket(poll, &readable, &stop)
        });

        Ok(Self {
            conn,
            deferred,
            readable,
            stop,
        })
    }

    /// Next event to handle, or `None` once nothing is buffered
    pub fn next_event(&self) -> Result<Option<Event>> {
        let deferred = self.deferred.borrow_mut().pop_front();
        match deferred {
            Some(event) => Ok(Some(event)),
            None => self.conn.poll_for_event().context("Failed to read from the X server"),
        }
    }

    /// Send the requests made while handling the last batch, then sleep
    /// until the server writes again. Returns at once when a roundtrip
    /// deferred events in the meantime.
    pub async fn flush_and_wait(&self) -> Result<()> {
        self.conn.flush().context("Failed to flush X11 requests")?;
        if self.deferred.borrow().is_empty() {
            self.readable.notified().await;
        }
        Ok(())
    }
}

impl Drop for EventSource {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

fn socket_poll(conn: &RustConnection) -> Result<mio::Poll> {
    let poll = mio::Poll::new().context("Failed to create socket poller")?;
    let fd = conn.stream().as_raw_fd();
    poll.registry()
        .register(&mut SourceFd(&fd), SOCKET, Interest::READABLE)
        .context("Failed to watch the X11 socket")?;
    Ok(poll)
}

fn watch_socket(mut poll: mio::Poll, readable: &Notify, stop: &AtomicBool) {
    let mut events = mio::Events::with_capacity(4);

    while !stop.load(Ordering::Relaxed) {
        match poll.poll(&mut events, Some(STOP_CHECK_INTERVAL)) {
            Ok(()) => {
                if events.iter().any(|event| event.token() == SOCKET) {
                    readable.notify_one();
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => warn!("Polling the X11 socket failed: {}", e),
        }
    }

    debug!("Stopped watching the X11 socket");
}
