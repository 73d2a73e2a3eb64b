//! Reader thread
//!
//! One per channel. Reads lines until the stream ends, routes each one
//! through the channel state, then reports closure.

use super::handle::ChannelHandle;
use super::line_reader::LineReader;
use super::registry::Registry;
use super::state::ChannelState;
use std::io::Read;
use std::sync::Arc;
use std::thread;
use tracing::debug;

pub(crate) fn run(state: Arc<ChannelState>, stream: Box<dyn Read + Send>, registry: Arc<Registry>) {
    state.set_reader_thread(thread::current().id());
    registry.bind(&ChannelHandle::from_state(state.clone()));

    // Name, default flag and rules are fixed for the life of the link.
    let settings = state.settings();
    debug!("AT({}) reader started", settings.name);

    let mut lines = LineReader::new(stream);
    while let Some(line) = lines.next_line() {
        state.stats.set_rx(lines.bytes_read(), lines.overflows());

        if settings.is_default && settings.rules.is_sms_unsolicited(&line) {
            // SMS notifications carry their PDU on the following line.
            state.log_incoming(&settings, &line);
            let Some(pdu) = lines.next_line() else {
                break;
            };
            state.log_incoming(&settings, &pdu);
            state.dispatch_unsolicited(&settings, &line, Some(&pdu));
        } else {
            state.process_line(&line);
        }
    }

    state.stats.set_rx(lines.bytes_read(), lines.overflows());
    state.reader_closed();
    registry.unbind_current();
}
