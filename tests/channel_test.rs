//! End-to-end channel behavior against a scripted modem over loopback TCP

mod common;

use at_channel::channel::{cme_error, ChannelOptions, CmeError, Command, Registry};
use at_channel::config::HandshakeConfig;
use at_channel::error::{AtError, ChannelError};
use at_channel::logging::{Direction, TrafficKind, TrafficLog};
use common::{open_default, open_with, wait_until, Events};
use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

// =============================================================================
// Request/response
// =============================================================================

#[test]
fn test_singleline_roundtrip() {
    let events = Events::new();
    let mut fx = open_default(&events);

    let peer = thread::spawn(move || {
        assert_eq!(fx.modem.expect_command(), "AT+CSQ");
        fx.modem.reply(&["+CSQ: 20,99", "OK"]);
        fx.modem
    });
    let response = fx.channel.send_singleline("AT+CSQ", "+CSQ:").unwrap();
    let _modem = peer.join().unwrap();

    assert!(response.success);
    assert_eq!(response.line(), Some("+CSQ: 20,99"));
    assert_eq!(response.final_line.as_deref(), Some("OK"));

    let stats = fx.channel.stats();
    assert_eq!(stats.commands, 1);
    assert_eq!(stats.tx_bytes, "AT+CSQ\r".len() as u64);
    assert!(stats.rx_bytes > 0);
    assert!(events.lines().is_empty());
}

#[test]
fn test_multiline_keeps_order_and_skips_foreign_lines() {
    let events = Events::new();
    let mut fx = open_default(&events);

    let peer = thread::spawn(move || {
        assert_eq!(fx.modem.expect_command(), "AT+CLCC");
        fx.modem.reply(&[
            "+CLCC: 1,0,0,0,0,\"5551000\",129",
            "RING",
            "+CLCC: 2,1,5,0,0,\"5552000\",129",
            "OK",
        ]);
        fx.modem
    });
    let response = fx.channel.send_multiline("AT+CLCC", "+CLCC:").unwrap();
    let _modem = peer.join().unwrap();

    assert_eq!(
        response.intermediates,
        vec![
            "+CLCC: 1,0,0,0,0,\"5551000\",129".to_string(),
            "+CLCC: 2,1,5,0,0,\"5552000\",129".to_string(),
        ]
    );
    assert_eq!(events.wait_for(1)[0].0, "RING");
}

#[test]
fn test_multiline_no_prefix_routes_known_unsolicited() {
    let events = Events::new();
    let mut fx = open_default(&events);

    let peer = thread::spawn(move || {
        fx.modem.expect_command();
        fx.modem
            .reply(&["Manufacturer: ACME", "+CREG: 1", "Revision: 1.0", "OK"]);
        fx.modem
    });
    let response = fx.channel.send_multiline_no_prefix("ATI").unwrap();
    let _modem = peer.join().unwrap();

    assert_eq!(
        response.intermediates,
        vec!["Manufacturer: ACME".to_string(), "Revision: 1.0".to_string()]
    );
    assert_eq!(events.wait_for(1)[0].0, "+CREG: 1");
}

#[test]
fn test_numeric_response() {
    let events = Events::new();
    let mut fx = open_default(&events);

    let peer = thread::spawn(move || {
        fx.modem.expect_command();
        fx.modem.reply(&["359881234567890", "OK"]);
        fx.modem
    });
    let response = fx.channel.send_numeric("AT+CGSN").unwrap();
    let _modem = peer.join().unwrap();

    assert_eq!(response.line(), Some("359881234567890"));
}

#[test]
fn test_singleline_without_intermediate_is_invalid() {
    let events = Events::new();
    let mut fx = open_default(&events);

    let peer = thread::spawn(move || {
        fx.modem.expect_command();
        fx.modem.reply(&["OK"]);
        fx.modem
    });
    let result = fx.channel.send_singleline("AT+CIMI", "+CIMI:");
    let _modem = peer.join().unwrap();

    assert_eq!(result.unwrap_err(), AtError::InvalidResponse);
}

#[test]
fn test_cme_error_final() {
    let events = Events::new();
    let mut fx = open_default(&events);

    let peer = thread::spawn(move || {
        fx.modem.expect_command();
        fx.modem.reply(&["+CME ERROR: 10"]);
        fx.modem
    });
    let response = fx.channel.send_command("AT+CPIN?").unwrap();
    let _modem = peer.join().unwrap();

    assert!(!response.success);
    assert_eq!(cme_error(&response), CmeError::SimNotInserted);
}

// =============================================================================
// NO CARRIER
// =============================================================================

#[test]
fn test_no_carrier_ends_dial() {
    let events = Events::new();
    let mut fx = open_default(&events);

    let peer = thread::spawn(move || {
        assert_eq!(fx.modem.expect_command(), "ATD5551234;");
        fx.modem.reply(&["NO CARRIER"]);
        fx.modem
    });
    let response = fx.channel.send_command("ATD5551234;").unwrap();
    let _modem = peer.join().unwrap();

    assert!(!response.success);
    assert_eq!(response.final_line.as_deref(), Some("NO CARRIER"));
}

#[test]
fn test_no_carrier_is_unsolicited_for_other_commands() {
    let events = Events::new();
    let mut fx = open_default(&events);

    let peer = thread::spawn(move || {
        fx.modem.expect_command();
        fx.modem.reply(&["NO CARRIER", "OK"]);
        fx.modem
    });
    let response = fx.channel.send_command("AT+CHUP").unwrap();
    let _modem = peer.join().unwrap();

    assert!(response.success);
    assert_eq!(events.wait_for(1)[0].0, "NO CARRIER");
}

// =============================================================================
// Unsolicited delivery
// =============================================================================

#[test]
fn test_sms_notification_delivers_both_lines() {
    let events = Events::new();
    let mut fx = open_default(&events);

    fx.modem.reply(&["+CMT: ,24", "07911326040000F0040B911346610089F60000208062917314080CC8329BFD06"]);
    let seen = events.wait_for(1);

    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].0, "+CMT: ,24");
    assert_eq!(
        seen[0].1.as_deref(),
        Some("07911326040000F0040B911346610089F60000208062917314080CC8329BFD06")
    );
}

#[test]
fn test_non_default_channel_drops_unsolicited() {
    let events = Events::new();
    let mut fx = open_with(
        ChannelOptions::new("aux").default_channel(false),
        Some(events.handler()),
    );

    fx.modem.reply(&["RING"]);
    let peer = thread::spawn(move || {
        fx.modem.expect_command();
        fx.modem.reply(&["OK"]);
        fx.modem
    });
    // The reply arrives after RING, so RING has been routed by now.
    fx.channel.send_command("AT").unwrap();
    let _modem = peer.join().unwrap();

    assert!(events.lines().is_empty());
    assert_eq!(fx.channel.stats().unsolicited, 0);
}

#[test]
fn test_send_from_unsolicited_handler_is_rejected() {
    let results = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let (link, mut modem) = common::connect();
    let registry = Arc::new(Registry::new());

    let seen = results.clone();
    let lookup = registry.clone();
    let handler: at_channel::channel::UnsolicitedFn = Arc::new(move |_line: &str, _: Option<&str>| {
        let outcome = lookup.get().map(|channel| channel.send_command("AT"));
        seen.lock().push(outcome);
    });
    let opened = at_channel::channel::open(
        link,
        Some(handler),
        ChannelOptions::new("test"),
        &registry,
    )
    .unwrap();
    opened.wait_ready(common::WAIT).unwrap();

    modem.reply(&["+CREG: 5"]);
    assert!(wait_until(|| !results.lock().is_empty()));
    let outcome = results.lock().remove(0);
    assert_eq!(outcome.map(|r| r.unwrap_err()), Some(AtError::InvalidThread));
}

#[test]
fn test_second_open_on_same_thread_is_refused() {
    let (link_a, mut modem_a) = common::connect();
    let (link_b, _modem_b) = common::connect();
    let registry = Arc::new(Registry::new());

    let opened_a = at_channel::channel::open(link_a, None, ChannelOptions::new("a"), &registry)
        .unwrap();
    let a = opened_a.wait_ready(common::WAIT).unwrap();

    let err = at_channel::channel::open(link_b, None, ChannelOptions::new("b"), &registry)
        .err()
        .unwrap();
    assert!(matches!(err, ChannelError::AlreadyOpen { ref channel } if channel == "a"));

    // Channel a is untouched and still talks to its own modem.
    assert_eq!(a.name(), "a");
    let peer = thread::spawn(move || {
        assert_eq!(modem_a.expect_command(), "AT+A");
        modem_a.reply(&["OK"]);
        modem_a
    });
    assert!(a.send_command("AT+A").unwrap().success);
    let _modem = peer.join().unwrap();
    opened_a.close();
}

#[test]
fn test_reopen_after_peer_hangup_gets_fresh_channel() {
    let (link_a, modem_a) = common::connect();
    let registry = Arc::new(Registry::new());
    let opened_a = at_channel::channel::open(link_a, None, ChannelOptions::new("a"), &registry)
        .unwrap();
    let a = opened_a.wait_ready(common::WAIT).unwrap();

    modem_a.hang_up();
    assert!(wait_until(|| a.is_closed()));

    let (link_b, mut modem_b) = common::connect();
    let opened_b = at_channel::channel::open(link_b, None, ChannelOptions::new("b"), &registry)
        .unwrap();
    let b = opened_b.wait_ready(common::WAIT).unwrap();
    assert!(!b.same_channel(&a));

    // Tearing down the old channel leaves the new one alone.
    opened_a.close();
    let peer = thread::spawn(move || {
        assert_eq!(modem_b.expect_command(), "AT+B");
        modem_b.reply(&["OK"]);
        modem_b
    });
    assert!(b.send_command("AT+B").unwrap().success);
    let _modem = peer.join().unwrap();
    assert_eq!(b.name(), "b");
}

// =============================================================================
// Concurrency and timeouts
// =============================================================================

#[test]
fn test_second_command_while_pending_is_rejected() {
    let events = Events::new();
    let mut fx = open_default(&events);

    let issuer = fx.channel.clone();
    let first = thread::spawn(move || issuer.send_singleline("AT+COPS?", "+COPS:"));

    assert_eq!(fx.modem.expect_command(), "AT+COPS?");
    assert_eq!(
        fx.channel.send_command("AT").unwrap_err(),
        AtError::CommandPending
    );

    fx.modem.reply(&["+COPS: 0,0,\"ACME\"", "OK"]);
    let response = first.join().unwrap().unwrap();
    assert_eq!(response.line(), Some("+COPS: 0,0,\"ACME\""));
}

#[test]
fn test_timeout_escalates_once_then_fails_fast() {
    let events = Events::new();
    let mut fx = open_default(&events);
    let fired = Arc::new(AtomicUsize::new(0));
    let counter = fired.clone();
    fx.channel.set_on_timeout(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    fx.channel.set_command_timeout(Duration::from_millis(100));

    let result = fx.channel.send_command("AT+COPS=?");
    assert_eq!(fx.modem.expect_command(), "AT+COPS=?");
    assert_eq!(result.unwrap_err(), AtError::Timeout);
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert_eq!(fx.channel.error_recovery(), Some(AtError::Timeout));
    assert!(!fx.channel.is_ready());

    assert_eq!(fx.channel.send_command("AT").unwrap_err(), AtError::Timeout);
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert_eq!(fx.channel.stats().commands, 1);
}

#[test]
fn test_timeout_without_escalation_turns_late_final_unsolicited() {
    let events = Events::new();
    let mut fx = open_default(&events);

    let result = fx
        .channel
        .send(Command::new("AT+CFUN=1").timeout(Duration::from_millis(100)));
    assert_eq!(result.unwrap_err(), AtError::Timeout);
    assert_eq!(fx.modem.expect_command(), "AT+CFUN=1");
    assert!(fx.channel.error_recovery().is_none());

    fx.modem.reply(&["OK"]);
    assert_eq!(events.wait_for(1)[0].0, "OK");

    let peer = thread::spawn(move || {
        fx.modem.expect_command();
        fx.modem.reply(&["OK"]);
        fx.modem
    });
    assert!(fx.channel.send_command("AT").unwrap().success);
    let _modem = peer.join().unwrap();
    assert_eq!(fx.channel.stats().timeouts, 1);
}

// =============================================================================
// Closure
// =============================================================================

#[test]
fn test_close_fails_pending_command_without_callback() {
    let events = Events::new();
    let mut fx = open_default(&events);
    let closed = Arc::new(AtomicUsize::new(0));
    let counter = closed.clone();
    fx.channel.set_on_reader_closed(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let issuer = fx.channel.clone();
    let pending = thread::spawn(move || issuer.send_command("AT+CFUN=1"));
    fx.modem.expect_command();

    fx.opened.close();
    assert_eq!(pending.join().unwrap().unwrap_err(), AtError::ChannelClosed);
    assert_eq!(closed.load(Ordering::SeqCst), 0);
    assert!(fx.channel.is_closed());
    assert!(fx.registry.is_empty());
    assert_eq!(
        fx.channel.send_command("AT").unwrap_err(),
        AtError::ChannelClosed
    );
}

#[test]
fn test_peer_hangup_fails_pending_and_notifies() {
    let events = Events::new();
    let mut fx = open_default(&events);
    let closed = Arc::new(AtomicUsize::new(0));
    let counter = closed.clone();
    fx.channel.set_on_reader_closed(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let issuer = fx.channel.clone();
    let pending = thread::spawn(move || issuer.send_command("AT+CGATT=1"));
    fx.modem.expect_command();
    fx.modem.hang_up();

    assert_eq!(pending.join().unwrap().unwrap_err(), AtError::ChannelClosed);
    assert!(wait_until(|| closed.load(Ordering::SeqCst) == 1));
    assert!(!fx.channel.is_ready());
}

// =============================================================================
// SMS, files, handshake, logging
// =============================================================================

#[test]
fn test_sms_prompt_sends_payload() {
    let events = Events::new();
    let mut fx = open_default(&events);

    let peer = thread::spawn(move || {
        assert_eq!(fx.modem.expect_command(), "AT+CMGS=20");
        fx.modem.raw(b"\r\n> ");
        let payload = fx.modem.expect_payload();
        fx.modem.reply(&["+CMGS: 7", "OK"]);
        payload
    });
    let response = fx
        .channel
        .send_sms("AT+CMGS=20", "0011000B915121551532F40000AA0AE8329BFD4697D9EC37", "+CMGS:")
        .unwrap();

    assert_eq!(
        peer.join().unwrap(),
        "0011000B915121551532F40000AA0AE8329BFD4697D9EC37"
    );
    assert_eq!(response.line(), Some("+CMGS: 7"));
}

#[test]
fn test_to_file_writes_every_line() {
    let events = Events::new();
    let mut fx = open_default(&events);
    let path = std::env::temp_dir().join(format!("atc-to-file-{}.txt", std::process::id()));

    let peer = thread::spawn(move || {
        fx.modem.expect_command();
        fx.modem.reply(&["line one", "+CREG: 1", "line three", "OK"]);
        fx.modem
    });
    let response = fx.channel.send_to_file("AT%IDUMP", &path).unwrap();
    let _modem = peer.join().unwrap();

    assert!(response.success);
    assert!(response.intermediates.is_empty());
    let content = fs::read_to_string(&path).unwrap();
    assert_eq!(content, "line one\n+CREG: 1\nline three\n");
    let _ = fs::remove_file(&path);
}

#[test]
fn test_handshake_retries_until_answer() {
    let events = Events::new();
    let mut fx = open_default(&events);
    let config = HandshakeConfig {
        retries: 3,
        timeout_ms: 200,
        settle_ms: 10,
        ..HandshakeConfig::default()
    };

    let peer = thread::spawn(move || {
        assert_eq!(fx.modem.expect_command(), "ATE0Q0V1");
        assert_eq!(fx.modem.expect_command(), "ATE0Q0V1");
        fx.modem.reply(&["OK"]);
        fx.modem
    });
    fx.channel.handshake(&config).unwrap();
    let _modem = peer.join().unwrap();

    assert!(fx.channel.error_recovery().is_none());
}

#[test]
fn test_handshake_gives_up_without_escalating() {
    let events = Events::new();
    let fx = open_default(&events);
    let fired = Arc::new(AtomicUsize::new(0));
    let counter = fired.clone();
    fx.channel.set_on_timeout(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    let config = HandshakeConfig {
        retries: 2,
        timeout_ms: 50,
        settle_ms: 0,
        ..HandshakeConfig::default()
    };

    assert_eq!(fx.channel.handshake(&config).unwrap_err(), AtError::Timeout);
    assert_eq!(fired.load(Ordering::SeqCst), 0);
    assert!(fx.channel.error_recovery().is_none());
}

#[test]
fn test_secure_command_hides_text_in_traffic_log() {
    let events = Events::new();
    let (log, entries) = TrafficLog::channel(64);
    let mut fx = open_with(
        ChannelOptions::new("test").traffic(Some(log)),
        Some(events.handler()),
    );

    let peer = thread::spawn(move || {
        assert_eq!(fx.modem.expect_command(), "AT+CPIN=\"1234\"");
        fx.modem.reply(&["OK"]);
        fx.modem
    });
    fx.channel
        .send_command_secure("AT+CPIN=\"1234\"", "AT+CPIN=****")
        .unwrap();
    let _modem = peer.join().unwrap();

    let lines: Vec<(Direction, String)> = entries
        .try_iter()
        .filter_map(|entry| match entry.kind {
            TrafficKind::Line { direction, text } => Some((direction, text)),
            _ => None,
        })
        .collect();
    assert!(lines.contains(&(Direction::Out, "AT+CPIN=****".to_string())));
    assert!(lines.contains(&(Direction::In, "OK".to_string())));
    assert!(lines.iter().all(|(_, text)| !text.contains("1234")));
}
