//! Thread-to-channel registry
//!
//! Maps a thread to the channel it serves. A channel is registered for its
//! reader thread and for the thread that opened it (usually the worker),
//! so code running in either context can find its channel with `get()`.

use super::handle::ChannelHandle;
use super::state::ChannelState;
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Default)]
pub struct Registry {
    channels: Mutex<HashMap<ThreadId, Arc<ChannelState>>>,
    changed: Condvar,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Channel of the calling thread, creating and registering one if needed
    ///
    /// A registration whose link has already closed is replaced by a fresh
    /// channel; a live one is returned as is.
    pub fn create(&self) -> ChannelHandle {
        let id = thread::current().id();
        let mut channels = self.channels.lock();
        let state = match channels.get(&id) {
            Some(state) if state.is_fresh() || !state.is_closed() => state.clone(),
            _ => {
                let state = Arc::new(ChannelState::new());
                channels.insert(id, state.clone());
                state
            }
        };
        self.changed.notify_all();
        ChannelHandle::from_state(state)
    }

    /// Register `channel` for the calling thread
    pub fn bind(&self, channel: &ChannelHandle) {
        let id = thread::current().id();
        self.channels.lock().insert(id, channel.state().clone());
        self.changed.notify_all();
    }

    /// Channel registered for the calling thread
    pub fn get(&self) -> Option<ChannelHandle> {
        self.lookup(thread::current().id())
    }

    /// Channel registered for `thread`
    pub fn lookup(&self, thread: ThreadId) -> Option<ChannelHandle> {
        self.channels
            .lock()
            .get(&thread)
            .cloned()
            .map(ChannelHandle::from_state)
    }

    /// Block until `thread` has a channel registered, or `timeout` passes
    pub fn wait_registered(&self, thread: ThreadId, timeout: Duration) -> Option<ChannelHandle> {
        let deadline = Instant::now() + timeout;
        let mut channels = self.channels.lock();
        loop {
            if let Some(state) = channels.get(&thread) {
                return Some(ChannelHandle::from_state(state.clone()));
            }
            if self.changed.wait_until(&mut channels, deadline).timed_out() {
                return channels
                    .get(&thread)
                    .cloned()
                    .map(ChannelHandle::from_state);
            }
        }
    }

    /// Forget the calling thread's registration
    pub fn unbind_current(&self) {
        self.channels.lock().remove(&thread::current().id());
    }

    /// Drop every registration of `channel`
    ///
    /// The state itself is freed once the last handle goes away.
    pub fn destroy(&self, channel: &ChannelHandle) {
        let mut channels = self.channels.lock();
        let before = channels.len();
        channels.retain(|_, state| !Arc::ptr_eq(state, channel.state()));
        debug!(
            "Channel {} unregistered from {} thread(s)",
            channel.name(),
            before - channels.len()
        );
    }

    pub fn len(&self) -> usize {
        self.channels.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
