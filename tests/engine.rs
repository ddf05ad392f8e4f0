//! Engine integration tests over the in-memory transport

use serialwatch_core::{
    ActionKind, ConfigChange, Engine, EngineConfig, EngineError, EngineEvent, EngineState,
    MemoryPeer, MemoryTransport, Submission,
};
use std::io::Write;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

const READ_TIMEOUT: Duration = Duration::from_millis(20);

fn config() -> EngineConfig {
    let mut config = EngineConfig::new("loop0", 115_200);
    config.read_timeout = READ_TIMEOUT;
    config.delay_unit = Duration::from_millis(10);
    config
}

async fn running(config: EngineConfig) -> (Engine, MemoryPeer, broadcast::Receiver<EngineEvent>) {
    let (transport, peer) = MemoryTransport::pair(&config.port, config.baud_rate);
    let engine = Engine::new(config, Box::new(transport.read_timeout(READ_TIMEOUT)));
    engine.open().await.unwrap();
    let events = engine.subscribe();
    engine.run().unwrap();
    (engine, peer, events)
}

async fn next_event(events: &mut broadcast::Receiver<EngineEvent>) -> EngineEvent {
    tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("no event within 2s")
        .expect("event channel closed")
}

async fn next_line(events: &mut broadcast::Receiver<EngineEvent>) -> (String, bool) {
    loop {
        if let EngineEvent::LineReceived { text, matched } = next_event(events).await {
            return (text, matched);
        }
    }
}

#[tokio::test]
async fn empty_rules_report_every_line_unmatched() {
    let (engine, peer, mut events) = running(config()).await;

    peer.inject(b"first\r\nsecond\n");
    peer.inject_line("third");

    for expected in ["first", "second", "third"] {
        assert_eq!(
            next_event(&mut events).await,
            EngineEvent::LineReceived {
                text: expected.to_string(),
                matched: false
            }
        );
    }

    engine.stop().await.unwrap();
    assert!(peer.written().is_empty());
}

#[tokio::test]
async fn patterns_flag_lines_containing_them() {
    let (engine, peer, mut events) = running(config()).await;
    assert!(engine.add_pattern("ERROR"));
    assert!(!engine.add_pattern("ERROR"));
    assert!(!engine.add_pattern(""));
    assert_eq!(engine.patterns(), vec!["ERROR".to_string()]);

    peer.inject_line("boot ok");
    peer.inject_line("fs: ERROR 5");

    assert_eq!(next_line(&mut events).await, ("boot ok".to_string(), false));
    assert_eq!(next_line(&mut events).await, ("fs: ERROR 5".to_string(), true));

    engine.stop().await.unwrap();
}

#[tokio::test]
async fn conditions_reply_and_raise_events() {
    let (engine, peer, mut events) = running(config()).await;
    engine.add_condition(1, "ERR", "notify-err", ActionKind::Event);
    engine.add_condition(2, "ERR", "log-err", ActionKind::Command);

    peer.inject_line("ERR: disk full");

    assert_eq!(
        next_event(&mut events).await,
        EngineEvent::PatternDetected {
            condition_id: 1,
            payload: "notify-err".to_string()
        }
    );
    assert_eq!(next_line(&mut events).await, ("ERR: disk full".to_string(), true));
    assert_eq!(peer.written_text(), vec!["log-err\r".to_string()]);

    engine.stop().await.unwrap();
}

#[tokio::test]
async fn condition_replacement_keeps_one_entry() {
    let engine = Engine::new(config(), Box::new(MemoryTransport::pair("loop0", 115_200).0));
    engine.add_condition(1, "A", "cmd1", ActionKind::Command);
    let replaced = engine.add_condition(1, "B", "cmd2", ActionKind::Event);

    assert_eq!(replaced.unwrap().pattern, "A");
    let conditions = engine.conditions();
    assert_eq!(conditions.len(), 1);
    assert_eq!(conditions[0].0, 1);
    assert_eq!(conditions[0].1.pattern, "B");
    assert_eq!(conditions[0].1.kind, ActionKind::Event);

    assert!(engine.remove_condition(9).is_none());
    engine.clear_conditions();
    assert!(engine.condition(1).is_none());
}

#[tokio::test]
async fn read_faults_and_bad_bytes_do_not_stop_the_loop() {
    let (engine, peer, mut events) = running(config()).await;

    peer.inject_read_error("framing error");
    peer.inject(&[0xc3, 0x28, b'\n']);
    peer.inject_line("still alive");

    assert_eq!(next_line(&mut events).await, ("still alive".to_string(), false));
    assert_eq!(engine.state(), EngineState::Running);

    engine.stop().await.unwrap();
}

#[tokio::test]
async fn unterminated_prompt_is_flushed_when_idle() {
    let (engine, peer, mut events) = running(config()).await;

    peer.inject(b"login: ");
    assert_eq!(next_line(&mut events).await, ("login: ".to_string(), false));

    engine.stop().await.unwrap();
}

#[tokio::test]
async fn open_failure_is_reported_and_terminal() {
    let (transport, peer) = MemoryTransport::pair("loop9", 115_200);
    peer.set_fail_connect(true);
    let engine = Engine::new(config(), Box::new(transport));

    match engine.open().await {
        Err(EngineError::Open { port, .. }) => assert_eq!(port, "loop0"),
        other => panic!("unexpected open result: {other:?}"),
    }
    assert_eq!(engine.state(), EngineState::Failed);
    assert!(engine.run().is_err());
    assert!(matches!(
        engine.send_command("AT").await,
        Err(EngineError::InvalidState { .. })
    ));
}

#[tokio::test]
async fn stop_returns_within_a_read_timeout() {
    let (engine, peer, _events) = running(config()).await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    let started = Instant::now();
    engine.stop().await.unwrap();

    assert!(started.elapsed() < READ_TIMEOUT * 10);
    assert_eq!(engine.state(), EngineState::Closed);
    assert!(!peer.is_connected());

    // Idempotent
    engine.stop().await.unwrap();
}

#[tokio::test]
async fn reopened_engine_reads_again() {
    let (engine, peer, mut events) = running(config()).await;
    engine.stop().await.unwrap();
    assert_eq!(engine.state(), EngineState::Closed);

    engine.open().await.unwrap();
    engine.run().unwrap();
    assert_eq!(engine.state(), EngineState::Running);

    peer.inject_line("hello again");
    assert_eq!(next_line(&mut events).await, ("hello again".to_string(), false));

    engine.stop().await.unwrap();
    assert_eq!(engine.state(), EngineState::Closed);
}

#[tokio::test]
async fn lagging_subscriber_is_told_how_many_it_missed() {
    let mut config = config();
    config.event_capacity = 2;
    let (engine, _peer, mut events) = running(config).await;

    for i in 0..4 {
        engine.process_line(format!("line {i}")).await;
    }

    assert!(matches!(
        events.recv().await,
        Err(broadcast::error::RecvError::Lagged(2))
    ));
    assert_eq!(next_line(&mut events).await, ("line 2".to_string(), false));
    assert_eq!(engine.history().len(), 4);

    engine.stop().await.unwrap();
}

#[tokio::test]
async fn write_failure_reaches_caller_only() {
    let (engine, peer, mut events) = running(config()).await;
    engine.add_condition(1, "Password:", "hunter2", ActionKind::Command);
    peer.set_fail_writes(true);

    assert!(matches!(
        engine.send_command("AT").await,
        Err(EngineError::Transport(_))
    ));

    peer.inject_line("Password:");
    assert_eq!(next_line(&mut events).await, ("Password:".to_string(), true));

    peer.set_fail_writes(false);
    peer.inject_line("Password:");
    assert_eq!(next_line(&mut events).await, ("Password:".to_string(), true));
    assert_eq!(peer.written_text(), vec!["hunter2\r".to_string()]);

    engine.stop().await.unwrap();
}

#[tokio::test]
async fn script_plays_in_order_while_reader_runs() {
    let (engine, peer, mut events) = running(config()).await;

    let started = Instant::now();
    let report = engine
        .play_script(["delay 2", "PING", "delay 0", "PONG"])
        .await
        .unwrap();

    assert!(started.elapsed() >= Duration::from_millis(20));
    assert!(report.is_clean());
    assert_eq!(peer.written_text(), vec!["PING\r".to_string(), "PONG\r".to_string()]);

    peer.inject_line("PONG ok");
    assert_eq!(next_line(&mut events).await, ("PONG ok".to_string(), false));

    engine.stop().await.unwrap();
}

#[tokio::test]
async fn submit_plays_script_files_and_clears() {
    let (engine, peer, mut events) = running(config()).await;

    let mut script = tempfile::Builder::new().suffix(".sh").tempfile().unwrap();
    writeln!(script, "reset").unwrap();
    writeln!(script, "delay nope").unwrap();
    writeln!(script, "version").unwrap();

    let path = script.path().to_string_lossy().into_owned();
    match engine.submit(&path).await.unwrap() {
        Submission::Script(report) => {
            assert_eq!(report.sent, vec!["reset".to_string(), "version".to_string()]);
            assert_eq!(report.failures.len(), 1);
        }
        other => panic!("unexpected submission: {other:?}"),
    }
    assert_eq!(next_event(&mut events).await, EngineEvent::CommandAreaShouldClear);

    assert!(matches!(engine.submit("   ").await.unwrap(), Submission::Ignored));
    assert!(matches!(engine.submit("uptime").await.unwrap(), Submission::Command));
    assert_eq!(
        peer.written_text(),
        vec!["reset\r".to_string(), "version\r".to_string(), "uptime\r".to_string()]
    );

    engine.stop().await.unwrap();
}

#[tokio::test]
async fn baud_and_port_changes_apply_once() {
    let (engine, peer, _events) = running(config()).await;

    assert_eq!(engine.change_baudrate(115_200).await.unwrap(), ConfigChange::Unchanged);
    assert_eq!(peer.reconfigurations(), 0);

    assert_eq!(engine.change_baudrate(57_600).await.unwrap(), ConfigChange::Changed);
    assert_eq!(engine.baud_rate(), 57_600);
    assert_eq!(engine.session().status_line(), "Connected to loop0 ; Baudrate 57600");

    assert_eq!(engine.change_port("loop1").await.unwrap(), ConfigChange::Changed);
    assert_eq!(engine.port_name(), "loop1");
    assert_eq!(engine.connection_info(), "loop1 @ 57600 baud (memory)");

    engine.stop().await.unwrap();
}

#[tokio::test]
async fn stored_commands_seeded_from_config() {
    let mut config = config();
    config.commands = vec!["reset".to_string(), "delay 1".to_string(), "status".to_string()];
    let (engine, peer, _events) = running(config).await;

    assert_eq!(engine.commands().len(), 3);
    let report = engine.send_stored_commands().await.unwrap();

    assert_eq!(report.delayed_units, 1);
    assert!(engine.commands().is_empty());
    assert_eq!(peer.written_text(), vec!["reset\r".to_string(), "status\r".to_string()]);

    engine.stop().await.unwrap();
}

#[tokio::test]
async fn traces_are_saved_with_match_marks() {
    let (engine, peer, mut events) = running(config()).await;
    engine.set_patterns(["FAIL"]);

    peer.inject_line("test 1 ok");
    peer.inject_line("test 2 FAIL");
    next_line(&mut events).await;
    next_line(&mut events).await;
    engine.stop().await.unwrap();

    assert_eq!(engine.history().len(), 2);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("traces.txt");
    engine.save_traces(&path, false).unwrap();

    let saved = std::fs::read_to_string(&path).unwrap();
    assert_eq!(saved, "  test 1 ok\n* test 2 FAIL\n");
}
