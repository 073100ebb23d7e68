//! Signals Module
//!
//! Observer lists: subsystems emit, interested parties connect closures.

/// Handle returned by [`Signal::connect`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

type Handler<A> = Box<dyn FnMut(&A)>;

/// List of callbacks invoked with a borrowed argument on every emission
pub struct Signal<A> {
    handlers: Vec<(HandlerId, Handler<A>)>,
    next_id: u64,
}

impl<A> Signal<A> {
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
            next_id: 1,
        }
    }

    pub fn connect<F>(&mut self, handler: F) -> HandlerId
    where
        F: FnMut(&A) + 'static,
    {
        let id = HandlerId(self.next_id);
        self.next_id += 1;
        self.handlers.push((id, Box::new(handler)));
        id
    }

    /// Returns false if the handler was not connected
    pub fn disconnect(&mut self, id: HandlerId) -> bool {
        let before = self.handlers.len();
        self.handlers.retain(|(handler_id, _)| *handler_id != id);
        self.handlers.len() != before
    }

    /// Invoke handlers in connection order
    pub fn emit(&mut self, arg: &A) {
        for (_, handler) in self.handlers.iter_mut() {
            handler(arg);
        }
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}

impl<A> Default for Signal<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A> std::fmt::Debug for Signal<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signal")
            .field("handlers", &self.handlers.len())
            .finish()
    }
}
