use super::*;
use crate::config::Config;
use crate::state::test_helpers::{self, RecordingSink, TEST_ATTEMPTS, TEST_BACKOFF};

fn session(state: &AppState) -> (Session, Arc<RecordingSink>) {
    let sink = RecordingSink::ready();
    (Session::new(state, sink.clone()), sink)
}

async fn joined(state: &AppState, name: &str, board: &str) -> (Session, Arc<RecordingSink>) {
    let (mut s, sink) = session(state);
    s.handle_frame(name).await.unwrap();
    s.handle_frame(&format!("/join {board}")).await.unwrap();
    (s, sink)
}

fn count(lines: &[String], line: &str) -> usize {
    lines.iter().filter(|l| *l == line).count()
}

// =============================================================================
// end-to-end scenario
// =============================================================================

#[tokio::test]
async fn two_members_chat_then_one_leaves() {
    let (state, _clock) = test_helpers::test_app_state();
    let (mut alice, alice_sink) = joined(&state, "alice", "lobby").await;
    let (_bob, bob_sink) = joined(&state, "bob", "lobby").await;

    alice.handle_frame("hi").await.unwrap();

    assert_eq!(state.registry.members_of("lobby"), vec!["alice".to_owned(), "bob".to_owned()]);
    assert_eq!(count(&alice_sink.lines(), "alice: hi"), 1);
    assert_eq!(count(&bob_sink.lines(), "alice: hi"), 1);

    alice.handle_frame("/leave").await.unwrap();

    assert_eq!(state.registry.members_of("lobby"), vec!["bob".to_owned()]);
    assert_eq!(alice.state(), HandshakeState::Identified);
    assert!(alice_sink.lines().contains(&"Left board: lobby".to_owned()));
    assert!(bob_sink.lines().contains(&"alice left the board".to_owned()));
}

// =============================================================================
// identity
// =============================================================================

#[tokio::test]
async fn first_frame_binds_identity() {
    let (state, _clock) = test_helpers::test_app_state();
    let (mut s, sink) = session(&state);
    assert_eq!(s.state(), HandshakeState::Connecting);

    s.handle_frame("  alice ").await.unwrap();

    assert_eq!(s.identity(), Some("alice"));
    assert_eq!(s.state(), HandshakeState::Identified);
    assert!(s.current_board().is_none());
    assert!(sink.lines().is_empty());
}

#[tokio::test]
async fn identify_twice_is_protocol_violation() {
    let (state, _clock) = test_helpers::test_app_state();
    let (mut s, _sink) = session(&state);
    s.identify("alice").await.unwrap();

    let err = s.identify("mallory").await.unwrap_err();

    assert!(matches!(err, SessionError::ProtocolViolation(_)));
    assert_eq!(s.identity(), Some("alice"));
}

#[tokio::test]
async fn identify_after_join_is_protocol_violation() {
    let (state, _clock) = test_helpers::test_app_state();
    let (mut s, _sink) = joined(&state, "alice", "lobby").await;

    let err = s.identify("alice2").await.unwrap_err();

    assert!(matches!(err, SessionError::ProtocolViolation(_)));
    assert_eq!(s.current_board().as_deref(), Some("lobby"));
}

#[tokio::test]
async fn command_before_identity_is_fatal() {
    let (state, _clock) = test_helpers::test_app_state();
    let (mut s, sink) = session(&state);

    let flow = s.dispatch("/join lobby").await;

    assert_eq!(flow, Flow::Close);
    assert_eq!(s.state(), HandshakeState::Closed);
    assert!(sink.is_closed());
    assert!(sink.lines()[0].starts_with("error [E_NOT_IDENTIFIED]"));
    assert!(state.registry.board_names().is_empty());
}

#[tokio::test]
async fn blank_identity_is_fatal() {
    let (state, _clock) = test_helpers::test_app_state();
    let (mut s, sink) = session(&state);

    assert_eq!(s.dispatch("   ").await, Flow::Close);
    assert_eq!(
        sink.lines(),
        vec!["error [E_NOT_IDENTIFIED]: not identified: display name must not be empty".to_owned()]
    );
}

#[tokio::test]
async fn repeated_identity_reported_then_closed() {
    let (state, _clock) = test_helpers::test_app_state();
    let (mut s, sink) = joined(&state, "alice", "lobby").await;
    let (_bob, bob_sink) = joined(&state, "bob", "lobby").await;

    let err = s.identify("alice").await.unwrap_err();
    assert_eq!(s.fail(&err), Flow::Close);

    assert!(sink.lines().last().unwrap().starts_with("error [E_PROTOCOL_VIOLATION]"));
    assert_eq!(state.registry.members_of("lobby"), vec!["bob".to_owned()]);
    assert!(bob_sink.lines().contains(&"alice left the board".to_owned()));
}

// =============================================================================
// commands
// =============================================================================

#[tokio::test]
async fn join_acks_sender_and_notifies_board() {
    let (state, _clock) = test_helpers::test_app_state();
    let (_alice, alice_sink) = joined(&state, "alice", "lobby").await;
    let (_bob, bob_sink) = joined(&state, "bob", "lobby").await;

    assert_eq!(
        bob_sink.lines(),
        vec!["Joined board: lobby".to_owned(), "bob joined the board".to_owned()]
    );
    assert_eq!(
        alice_sink.lines(),
        vec![
            "Joined board: lobby".to_owned(),
            "alice joined the board".to_owned(),
            "bob joined the board".to_owned(),
        ]
    );
}

#[tokio::test]
async fn join_switch_notifies_old_board() {
    let (state, _clock) = test_helpers::test_app_state();
    let (mut alice, alice_sink) = joined(&state, "alice", "a").await;
    let (_bob, bob_sink) = joined(&state, "bob", "a").await;

    alice.handle_frame("/join b").await.unwrap();

    assert_eq!(state.registry.members_of("a"), vec!["bob".to_owned()]);
    assert_eq!(state.registry.members_of("b"), vec!["alice".to_owned()]);
    assert_eq!(count(&bob_sink.lines(), "alice left the board"), 1);
    assert!(alice_sink.lines().contains(&"Joined board: b".to_owned()));
    assert_eq!(alice.current_board().as_deref(), Some("b"));
}

#[tokio::test]
async fn join_same_board_again_is_acknowledged_only() {
    let (state, _clock) = test_helpers::test_app_state();
    let (mut alice, alice_sink) = joined(&state, "alice", "lobby").await;
    alice_sink.clear();

    alice.handle_frame("/join lobby").await.unwrap();

    assert_eq!(alice_sink.lines(), vec!["Already in board: lobby".to_owned()]);
    assert_eq!(state.registry.members_of("lobby"), vec!["alice".to_owned()]);
}

#[tokio::test]
async fn leave_without_board_replies() {
    let (state, _clock) = test_helpers::test_app_state();
    let (mut s, sink) = session(&state);
    s.handle_frame("alice").await.unwrap();

    s.handle_frame("/leave").await.unwrap();

    assert_eq!(sink.lines(), vec![NOT_IN_BOARD.to_owned()]);
}

#[tokio::test]
async fn message_without_board_is_not_broadcast() {
    let (state, _clock) = test_helpers::test_app_state();
    let (_bob, bob_sink) = joined(&state, "bob", "lobby").await;
    bob_sink.clear();
    let (mut s, sink) = session(&state);
    s.handle_frame("alice").await.unwrap();

    s.handle_frame("anyone here?").await.unwrap();

    assert_eq!(sink.lines(), vec![NOT_IN_BOARD.to_owned()]);
    assert!(bob_sink.lines().is_empty());
}

#[tokio::test]
async fn empty_message_is_dropped_silently() {
    let (state, _clock) = test_helpers::test_app_state();
    let (mut alice, alice_sink) = joined(&state, "alice", "lobby").await;
    alice_sink.clear();

    assert_eq!(alice.dispatch("   ").await, Flow::Continue);
    assert!(alice_sink.lines().is_empty());
}

#[tokio::test]
async fn list_replies_with_sorted_boards() {
    let (state, _clock) = test_helpers::test_app_state();
    let (_a, _) = joined(&state, "alice", "zeta").await;
    let (mut b, b_sink) = joined(&state, "bob", "alpha").await;
    b_sink.clear();

    b.handle_frame("/list").await.unwrap();

    assert_eq!(b_sink.lines(), vec!["Available boards: alpha, zeta".to_owned()]);
}

#[tokio::test]
async fn malformed_command_reported_to_sender_only() {
    let (state, _clock) = test_helpers::test_app_state();
    let (mut alice, alice_sink) = joined(&state, "alice", "lobby").await;
    let (_bob, bob_sink) = joined(&state, "bob", "lobby").await;
    alice_sink.clear();
    bob_sink.clear();

    let flow = alice.dispatch("/foo bar").await;

    assert_eq!(flow, Flow::Continue);
    assert_eq!(
        alice_sink.lines(),
        vec!["error [E_MALFORMED_COMMAND]: unknown command: /foo".to_owned()]
    );
    assert!(bob_sink.lines().is_empty());
    assert_eq!(alice.state(), HandshakeState::Joined);
    assert_eq!(state.registry.members_of("lobby"), vec!["alice".to_owned(), "bob".to_owned()]);
}

#[tokio::test]
async fn join_without_board_is_malformed() {
    let (state, _clock) = test_helpers::test_app_state();
    let (mut s, _sink) = session(&state);
    s.handle_frame("alice").await.unwrap();

    let err = s.handle_frame("/join   ").await.unwrap_err();

    assert_eq!(err, SessionError::MalformedCommand(ParseError::MissingBoardName));
    assert!(!err.is_fatal());
}

#[tokio::test]
async fn own_delivery_failure_prunes_sender() {
    let (state, _clock) = test_helpers::test_app_state();
    let (mut alice, alice_sink) = joined(&state, "alice", "lobby").await;
    let (_bob, bob_sink) = joined(&state, "bob", "lobby").await;
    alice_sink.fail_deliveries();

    alice.handle_frame("hi").await.unwrap();

    assert!(bob_sink.lines().contains(&"alice: hi".to_owned()));
    assert_eq!(state.registry.members_of("lobby"), vec!["bob".to_owned()]);
    assert_eq!(alice.state(), HandshakeState::Identified);
}

// =============================================================================
// readiness handshake
// =============================================================================

#[tokio::test]
async fn identify_retries_until_sink_ready() {
    let (state, clock) = test_helpers::test_app_state();
    let sink = RecordingSink::not_ready_for(2);
    let mut s = Session::new(&state, sink.clone());

    s.handle_frame("alice").await.unwrap();

    assert_eq!(clock.sleeps(), vec![TEST_BACKOFF; 2]);
    assert_eq!(s.identity(), Some("alice"));
    assert_eq!(s.state(), HandshakeState::Identified);
}

#[tokio::test]
async fn ready_sink_needs_no_retry() {
    let (state, clock) = test_helpers::test_app_state();
    let (_s, _sink) = joined(&state, "alice", "lobby").await;
    assert!(clock.sleeps().is_empty());
}

#[tokio::test]
async fn identify_gives_up_after_max_attempts() {
    let (state, clock) = test_helpers::test_app_state();
    let sink = RecordingSink::not_ready_for(usize::MAX);
    let mut s = Session::new(&state, sink.clone());

    let err = s.handle_frame("alice").await.unwrap_err();
    assert_eq!(err, SessionError::HandshakeTimeout { attempts: TEST_ATTEMPTS });
    assert_eq!(clock.sleeps().len(), TEST_ATTEMPTS as usize);
    assert!(s.identity().is_none());

    assert_eq!(s.fail(&err), Flow::Close);
    assert_eq!(s.state(), HandshakeState::Closed);
    assert!(sink.is_closed());
}

#[tokio::test]
async fn join_timeout_closes_without_joining() {
    let (state, clock) = test_helpers::test_app_state();
    let (mut s, sink) = session(&state);
    s.handle_frame("alice").await.unwrap();
    sink.stall_readiness(usize::MAX);

    let flow = s.dispatch("/join lobby").await;

    assert_eq!(flow, Flow::Close);
    assert_eq!(clock.sleeps(), vec![TEST_BACKOFF; TEST_ATTEMPTS as usize]);
    assert!(state.registry.board_names().is_empty());
    assert_eq!(s.state(), HandshakeState::Closed);
}

#[tokio::test]
async fn join_retry_recovers() {
    let (state, clock) = test_helpers::test_app_state();
    let (mut s, sink) = session(&state);
    s.handle_frame("alice").await.unwrap();
    sink.stall_readiness(2);

    s.handle_frame("/join lobby").await.unwrap();

    assert_eq!(clock.sleeps().len(), 2);
    assert_eq!(s.state(), HandshakeState::Joined);
}

#[tokio::test]
async fn greet_sends_prompt_once() {
    let (state, _clock) = test_helpers::test_app_state();
    let (mut s, sink) = session(&state);

    s.greet().await.unwrap();
    s.handle_frame("alice").await.unwrap();
    s.greet().await.unwrap();

    assert_eq!(sink.lines(), vec![PROMPT.to_owned()]);
}

// =============================================================================
// teardown
// =============================================================================

#[tokio::test]
async fn close_is_idempotent_and_notifies_once() {
    let (state, _clock) = test_helpers::test_app_state();
    let (mut alice, alice_sink) = joined(&state, "alice", "lobby").await;
    let (_bob, bob_sink) = joined(&state, "bob", "lobby").await;

    alice.close();
    alice.close();

    assert!(alice_sink.is_closed());
    assert_eq!(state.registry.members_of("lobby"), vec!["bob".to_owned()]);
    assert_eq!(count(&bob_sink.lines(), "alice left the board"), 1);
}

#[tokio::test]
async fn drop_removes_from_board() {
    let (state, _clock) = test_helpers::test_app_state();
    let (alice, alice_sink) = joined(&state, "alice", "lobby").await;

    drop(alice);

    assert!(alice_sink.is_closed());
    assert!(state.registry.members_of("lobby").is_empty());
    assert_eq!(state.registry.board_names(), vec!["lobby".to_owned()]);
}

#[tokio::test]
async fn closed_session_rejects_frames() {
    let (state, _clock) = test_helpers::test_app_state();
    let (mut s, _sink) = joined(&state, "alice", "lobby").await;
    s.close();

    let err = s.handle_frame("/join other").await.unwrap_err();

    assert!(matches!(err, SessionError::ProtocolViolation(_)));
    assert!(state.registry.members_of("other").is_empty());
}

#[tokio::test]
async fn auto_join_board_after_identity() {
    let config = Config { auto_join_board: Some("public".into()), ..test_helpers::test_config() };
    let (state, _clock) = test_helpers::test_app_state_with_config(config);
    let (mut s, sink) = session(&state);

    s.handle_frame("alice").await.unwrap();

    assert_eq!(s.current_board().as_deref(), Some("public"));
    assert_eq!(state.registry.members_of("public"), vec!["alice".to_owned()]);
    assert_eq!(sink.lines()[0], "Joined board: public");
}

// =============================================================================
// event loop
// =============================================================================

#[tokio::test]
async fn run_processes_events_in_order() {
    let (state, _clock) = test_helpers::test_app_state();
    let (_bob, bob_sink) = joined(&state, "bob", "lobby").await;
    bob_sink.clear();

    let (alice, alice_sink) = session(&state);
    let (tx, rx) = mpsc::channel(16);
    for event in [
        TransportEvent::Open,
        TransportEvent::Frame("alice".into()),
        TransportEvent::Frame("/join lobby".into()),
        TransportEvent::Frame("hello".into()),
        TransportEvent::Frame("world".into()),
        TransportEvent::Closed,
    ] {
        tx.send(event).await.unwrap();
    }

    alice.run(rx).await;

    assert_eq!(
        bob_sink.lines(),
        vec![
            "alice joined the board".to_owned(),
            "alice: hello".to_owned(),
            "alice: world".to_owned(),
            "alice left the board".to_owned(),
        ]
    );
    assert_eq!(alice_sink.lines()[0], PROMPT);
    assert!(alice_sink.is_closed());
    assert_eq!(state.registry.members_of("lobby"), vec!["bob".to_owned()]);
}

#[tokio::test]
async fn run_stops_on_fatal_error() {
    let (state, _clock) = test_helpers::test_app_state();
    let (s, sink) = session(&state);
    let (tx, rx) = mpsc::channel(16);
    tx.send(TransportEvent::Frame("/leave".into())).await.unwrap();
    tx.send(TransportEvent::Frame("alice".into())).await.unwrap();

    s.run(rx).await;

    assert_eq!(sink.lines().len(), 1);
    assert!(sink.is_closed());
}

#[tokio::test]
async fn run_ends_when_transport_drops() {
    let (state, _clock) = test_helpers::test_app_state();
    let (s, sink) = session(&state);
    let (tx, rx) = mpsc::channel(16);
    tx.send(TransportEvent::Frame("alice".into())).await.unwrap();
    tx.send(TransportEvent::Frame("/join lobby".into())).await.unwrap();
    drop(tx);

    s.run(rx).await;

    assert!(sink.is_closed());
    assert!(state.registry.members_of("lobby").is_empty());
}

#[tokio::test]
async fn run_closes_on_transport_error() {
    let (state, _clock) = test_helpers::test_app_state();
    let (s, sink) = session(&state);
    let (tx, rx) = mpsc::channel(16);
    tx.send(TransportEvent::Frame("alice".into())).await.unwrap();
    tx.send(TransportEvent::Error("connection reset".into())).await.unwrap();
    tx.send(TransportEvent::Frame("/join lobby".into())).await.unwrap();

    s.run(rx).await;

    assert!(sink.is_closed());
    assert!(state.registry.board_names().is_empty());
}

#[test]
fn error_codes_and_fatality() {
    let cases = [
        (SessionError::NotIdentified("x".into()), "E_NOT_IDENTIFIED", true),
        (SessionError::ProtocolViolation("x".into()), "E_PROTOCOL_VIOLATION", true),
        (SessionError::MalformedCommand(ParseError::MissingBoardName), "E_MALFORMED_COMMAND", false),
        (SessionError::HandshakeTimeout { attempts: 5 }, "E_HANDSHAKE_TIMEOUT", true),
    ];
    for (err, code, fatal) in cases {
        assert_eq!(err.error_code(), code);
        assert_eq!(err.is_fatal(), fatal, "{err}");
    }
}
