//! The reactor: a single demultiplexing point for readiness events
//!
//! Sockets are registered with an interest and a callback value. Each
//! [`Selector::run_once`] waits for readiness, then hands every ready
//! socket's callback to a [`Dispatch`] implementation, one after the other,
//! on the calling thread.
//!
//! Notifications are edge-triggered: a socket is reported once per change
//! of its readiness. A dispatcher must drain the ready direction until the
//! operation returns `NotReady` (or fails), otherwise the data left in
//! the kernel buffers never triggers another event.

use std::{
    collections::HashMap,
    io::{self, ErrorKind},
    os::fd::{AsRawFd, RawFd},
    sync::Arc,
    time::Duration,
};

use mio::{unix::SourceFd, Events, Poll, Token, Waker};
use slab::Slab;

use crate::ready::Ready;

/// reserved for the waker, slab keys never reach it
const WAKER_TOKEN: Token = Token(usize::MAX);

#[derive(thiserror::Error, Debug)]
pub enum SelectorError {
    #[error("could not create the selector: {0}")]
    Create(io::Error),
    #[error("fd {0} is already registered")]
    AlreadyRegistered(RawFd),
    #[error("fd {0} was never registered")]
    NotRegistered(RawFd),
    #[error("cannot watch fd {0} with an empty interest")]
    EmptyInterest(RawFd),
    #[error("could not {operation} fd {fd}: {error}")]
    Registry {
        operation: &'static str,
        fd: RawFd,
        error: io::Error,
    },
    #[error("error while polling: {0}")]
    Poll(io::Error),
}

/// Receives the callbacks of ready sockets
pub trait Dispatch<C> {
    /// `selector` is handed back so the callback can register, unregister
    /// or change the interest of sockets, including its own.
    fn dispatch(&mut self, selector: &mut Selector<C>, callback: C, ready: Ready);
}

#[derive(Debug)]
struct Registration<C> {
    fd: RawFd,
    interest: Ready,
    callback: C,
    /// tells apart successive registrations reusing the same slab slot
    generation: u64,
}

pub struct Selector<C> {
    poll: Poll,
    events: Events,
    registrations: Slab<Registration<C>>,
    /// socket identity to registration
    tokens: HashMap<RawFd, Token>,
    waker: Arc<Waker>,
    next_generation: u64,
}

impl<C: Clone> Selector<C> {
    pub fn new(events_capacity: usize) -> Result<Self, SelectorError> {
        let poll = Poll::new().map_err(SelectorError::Create)?;
        let waker =
            Waker::new(poll.registry(), WAKER_TOKEN).map_err(SelectorError::Create)?;

        Ok(Selector {
            poll,
            events: Events::with_capacity(events_capacity),
            registrations: Slab::new(),
            tokens: HashMap::new(),
            waker: Arc::new(waker),
            next_generation: 0,
        })
    }

    /// Start watching `socket`. `callback` is dispatched each time it becomes ready.
    pub fn register<S: AsRawFd>(
        &mut self,
        socket: &S,
        interest: Ready,
        callback: C,
    ) -> Result<Token, SelectorError> {
        let fd = socket.as_raw_fd();
        if self.tokens.contains_key(&fd) {
            return Err(SelectorError::AlreadyRegistered(fd));
        }
        let mio_interest = interest
            .to_interest()
            .ok_or(SelectorError::EmptyInterest(fd))?;

        let entry = self.registrations.vacant_entry();
        let token = Token(entry.key());
        self.poll
            .registry()
            .register(&mut SourceFd(&fd), token, mio_interest)
            .map_err(|error| SelectorError::Registry {
                operation: "register",
                fd,
                error,
            })?;

        entry.insert(Registration {
            fd,
            interest,
            callback,
            generation: self.next_generation,
        });
        self.next_generation += 1;
        self.tokens.insert(fd, token);
        trace!("registered fd {} as {:?} with interest {:?}", fd, token, interest);
        Ok(token)
    }

    /// Stop watching `socket`. Must be called before the socket is dropped.
    pub fn unregister<S: AsRawFd>(&mut self, socket: &S) -> Result<(), SelectorError> {
        let fd = socket.as_raw_fd();
        let token = self
            .tokens
            .remove(&fd)
            .ok_or(SelectorError::NotRegistered(fd))?;
        self.registrations.remove(token.0);

        trace!("unregistering fd {} ({:?})", fd, token);
        self.poll
            .registry()
            .deregister(&mut SourceFd(&fd))
            .map_err(|error| SelectorError::Registry {
                operation: "unregister",
                fd,
                error,
            })
    }

    /// Replace the events watched on an already registered socket
    pub fn change_interest<S: AsRawFd>(
        &mut self,
        socket: &S,
        interest: Ready,
    ) -> Result<(), SelectorError> {
        let fd = socket.as_raw_fd();
        let token = *self
            .tokens
            .get(&fd)
            .ok_or(SelectorError::NotRegistered(fd))?;
        let mio_interest = interest
            .to_interest()
            .ok_or(SelectorError::EmptyInterest(fd))?;

        self.poll
            .registry()
            .reregister(&mut SourceFd(&fd), token, mio_interest)
            .map_err(|error| SelectorError::Registry {
                operation: "change the interest of",
                fd,
                error,
            })?;

        if let Some(registration) = self.registrations.get_mut(token.0) {
            registration.interest = interest;
        }
        Ok(())
    }

    pub fn is_registered<S: AsRawFd>(&self, socket: &S) -> bool {
        self.tokens.contains_key(&socket.as_raw_fd())
    }

    pub fn interest<S: AsRawFd>(&self, socket: &S) -> Option<Ready> {
        let token = self.tokens.get(&socket.as_raw_fd())?;
        self.registrations
            .get(token.0)
            .map(|registration| registration.interest)
    }

    /// number of registered sockets
    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    /// A handle to interrupt a blocking [`Selector::run_once`] from another thread
    pub fn waker(&self) -> Arc<Waker> {
        self.waker.clone()
    }

    /// Wait until at least one socket is ready (or the timeout expires, or
    /// the waker fires), then dispatch the ready callbacks in the order the
    /// system reported them. Returns the number of callbacks dispatched.
    pub fn run_once<D: Dispatch<C>>(
        &mut self,
        timeout: Option<Duration>,
        dispatcher: &mut D,
    ) -> Result<usize, SelectorError> {
        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(error) if error.kind() == ErrorKind::Interrupted => return Ok(0),
            Err(error) => return Err(SelectorError::Poll(error)),
        }

        let registrations = &self.registrations;
        let ready_sockets: Vec<(Token, u64, Ready)> = self
            .events
            .iter()
            .filter(|event| event.token() != WAKER_TOKEN)
            .filter_map(|event| {
                let registration = registrations.get(event.token().0)?;
                Some((event.token(), registration.generation, Ready::from(event)))
            })
            .collect();

        let mut dispatched = 0;
        for (token, generation, ready) in ready_sockets {
            // an earlier callback of this pass may have unregistered it,
            // and its slot may since hold another socket
            let callback = match self.registrations.get(token.0) {
                Some(registration) if registration.generation == generation => {
                    trace!("fd {} is ready: {:?}", registration.fd, ready);
                    registration.callback.clone()
                }
                _ => {
                    trace!("dropping stale event for {:?}", token);
                    continue;
                }
            };
            dispatcher.dispatch(self, callback, ready);
            dispatched += 1;
        }
        Ok(dispatched)
    }
}

#[cfg(test)]
mod tests {
    use std::{io::Write, time::Instant};

    use super::*;
    use crate::socket::{tests::accepted_pair, Socket};

    #[derive(Default)]
    struct Recorder {
        calls: Vec<(&'static str, Ready)>,
    }

    impl Dispatch<&'static str> for Recorder {
        fn dispatch(
            &mut self,
            _selector: &mut Selector<&'static str>,
            callback: &'static str,
            ready: Ready,
        ) {
            self.calls.push((callback, ready));
        }
    }

    #[test]
    fn dispatches_readable_sockets() {
        let mut selector = Selector::new(16).unwrap();
        let (mut client, accepted) = accepted_pair();
        let mut recorder = Recorder::default();

        selector
            .register(&accepted, Ready::READABLE, "client")
            .unwrap();
        assert!(selector.is_registered(&accepted));
        assert_eq!(selector.len(), 1);

        client.write_all(b"GET").unwrap();
        let dispatched = selector
            .run_once(Some(Duration::from_secs(5)), &mut recorder)
            .unwrap();

        assert_eq!(dispatched, 1);
        assert_eq!(recorder.calls[0].0, "client");
        assert!(recorder.calls[0].1.is_readable());
    }

    #[test]
    fn notifications_are_edge_triggered() {
        let mut selector = Selector::new(16).unwrap();
        let (mut client, accepted) = accepted_pair();
        let mut recorder = Recorder::default();

        selector
            .register(&accepted, Ready::READABLE, "client")
            .unwrap();
        client.write_all(b"GET http://").unwrap();
        selector
            .run_once(Some(Duration::from_secs(5)), &mut recorder)
            .unwrap();
        assert_eq!(recorder.calls.len(), 1);

        // nothing was read, yet no new notification arrives
        let dispatched = selector
            .run_once(Some(Duration::from_millis(100)), &mut recorder)
            .unwrap();
        assert_eq!(dispatched, 0);
    }

    #[test]
    fn change_interest_to_writable() {
        let mut selector = Selector::new(16).unwrap();
        let (_client, accepted) = accepted_pair();
        let mut recorder = Recorder::default();

        selector
            .register(&accepted, Ready::READABLE, "client")
            .unwrap();
        selector
            .change_interest(&accepted, Ready::WRITABLE)
            .unwrap();
        assert_eq!(selector.interest(&accepted), Some(Ready::WRITABLE));

        selector
            .run_once(Some(Duration::from_secs(5)), &mut recorder)
            .unwrap();
        assert!(recorder.calls[0].1.is_writable());
    }

    #[test]
    fn registration_preconditions() {
        let mut selector = Selector::new(16).unwrap();
        let (_client, accepted) = accepted_pair();

        assert!(matches!(
            selector.unregister(&accepted),
            Err(SelectorError::NotRegistered(_))
        ));
        assert!(matches!(
            selector.change_interest(&accepted, Ready::READABLE),
            Err(SelectorError::NotRegistered(_))
        ));
        assert!(matches!(
            selector.register(&accepted, Ready::HUP, "client"),
            Err(SelectorError::EmptyInterest(_))
        ));

        selector
            .register(&accepted, Ready::READABLE, "client")
            .unwrap();
        assert!(matches!(
            selector.register(&accepted, Ready::READABLE, "again"),
            Err(SelectorError::AlreadyRegistered(_))
        ));

        selector.unregister(&accepted).unwrap();
        assert!(!selector.is_registered(&accepted));
        assert!(selector.is_empty());
    }

    /// on its first callback, unregisters the other socket and registers
    /// a new one, which takes over the freed slot
    struct SlotReuser {
        sockets: Vec<(&'static str, Socket, Token)>,
        newcomer: Option<Socket>,
        newcomer_token: Option<Token>,
        calls: Vec<&'static str>,
    }

    impl Dispatch<&'static str> for SlotReuser {
        fn dispatch(
            &mut self,
            selector: &mut Selector<&'static str>,
            callback: &'static str,
            _ready: Ready,
        ) {
            self.calls.push(callback);
            if let Some(newcomer) = self.newcomer.as_ref() {
                if self.newcomer_token.is_none() {
                    let (_, other, _) = self
                        .sockets
                        .iter()
                        .find(|(name, _, _)| *name != callback)
                        .unwrap();
                    selector.unregister(other).unwrap();
                    self.newcomer_token =
                        Some(selector.register(newcomer, Ready::READABLE, "newcomer").unwrap());
                }
            }
        }
    }

    #[test]
    fn stale_events_of_a_reused_slot_are_dropped() {
        let mut selector = Selector::new(16).unwrap();
        let (mut first_client, first) = accepted_pair();
        let (mut second_client, second) = accepted_pair();
        let (_newcomer_client, newcomer) = accepted_pair();

        let first_token = selector
            .register(&first, Ready::READABLE, "first")
            .unwrap();
        let second_token = selector
            .register(&second, Ready::READABLE, "second")
            .unwrap();

        first_client.write_all(b"GET").unwrap();
        second_client.write_all(b"GET").unwrap();
        std::thread::sleep(Duration::from_millis(50));

        let mut reuser = SlotReuser {
            sockets: vec![("first", first, first_token), ("second", second, second_token)],
            newcomer: Some(newcomer),
            newcomer_token: None,
            calls: Vec::new(),
        };
        let dispatched = selector
            .run_once(Some(Duration::from_secs(5)), &mut reuser)
            .unwrap();

        let dropped_token = reuser
            .sockets
            .iter()
            .find(|(name, _, _)| *name != reuser.calls[0])
            .map(|(_, _, token)| *token);
        assert_eq!(reuser.newcomer_token, dropped_token);
        assert_eq!(dispatched, 1);
        assert_eq!(reuser.calls.len(), 1);
        assert!(!reuser.calls.contains(&"newcomer"));
    }

    #[test]
    fn waker_interrupts_a_blocking_pass() {
        let mut selector: Selector<&'static str> = Selector::new(16).unwrap();
        let waker = selector.waker();
        let mut recorder = Recorder::default();

        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            waker.wake().unwrap();
        });

        let start = Instant::now();
        let dispatched = selector.run_once(None, &mut recorder).unwrap();
        handle.join().unwrap();

        assert_eq!(dispatched, 0);
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
