//! Network lifecycle, dispatcher, journal, and mocker behavior.

use chunkmesh_simulation::{
    Journal, Mocker, MockerConfig, NetConfig, NetError, PeerEvent, ServiceFixture, SimAction,
    SimEvent, SimNetwork,
};
use chunkmesh_types::NodeId;
use crossbeam::channel::unbounded;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

fn id(byte: u8) -> NodeId {
    NodeId::from_bytes(&[byte; 32])
}

fn network_with(fixture: &Arc<ServiceFixture>, ids: &[NodeId]) -> Arc<SimNetwork> {
    let network = SimNetwork::new(NetConfig::default(), fixture.factory());
    for node_id in ids {
        network.new_node_with_id(*node_id).unwrap();
    }
    network
}

fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    check()
}

#[test]
fn test_duplicate_connect_has_no_side_effect() {
    let dir = TempDir::new().unwrap();
    let fixture = ServiceFixture::new(dir.path().to_path_buf());
    let network = network_with(&fixture, &[id(1), id(2)]);
    network.start(&id(1)).unwrap();
    network.start(&id(2)).unwrap();

    network.connect(&id(1), &id(2)).unwrap();
    let before = network.conn(&id(1), &id(2)).unwrap();
    assert!(before.up);

    assert!(matches!(
        network.connect(&id(1), &id(2)),
        Err(NetError::Duplicate(_))
    ));
    // Also duplicate when dialed from the other side.
    assert!(matches!(
        network.connect(&id(2), &id(1)),
        Err(NetError::Duplicate(_))
    ));
    assert_eq!(network.conn(&id(1), &id(2)).unwrap(), before);

    network.shutdown();
}

#[test]
fn test_connect_requires_both_nodes_up() {
    let dir = TempDir::new().unwrap();
    let fixture = ServiceFixture::new(dir.path().to_path_buf());
    let network = network_with(&fixture, &[id(1), id(2)]);
    network.start(&id(1)).unwrap();

    assert!(matches!(
        network.connect(&id(1), &id(2)),
        Err(NetError::Unavailable(_))
    ));
    network.shutdown();
}

#[test]
fn test_start_stop_are_duplicate_checked() {
    let dir = TempDir::new().unwrap();
    let fixture = ServiceFixture::new(dir.path().to_path_buf());
    let network = network_with(&fixture, &[id(1)]);

    network.start(&id(1)).unwrap();
    assert!(matches!(network.start(&id(1)), Err(NetError::Duplicate(_))));
    network.stop(&id(1)).unwrap();
    assert!(matches!(network.stop(&id(1)), Err(NetError::Duplicate(_))));
    assert!(matches!(
        network.start(&id(9)),
        Err(NetError::UnknownNode(_))
    ));
    network.shutdown();
}

#[test]
fn test_stop_downs_connections_and_drops_peers() {
    let dir = TempDir::new().unwrap();
    let fixture = ServiceFixture::new(dir.path().to_path_buf());
    let network = network_with(&fixture, &[id(1), id(2)]);
    network.start(&id(1)).unwrap();
    network.start(&id(2)).unwrap();

    let peer_events = network.get_node(&id(1)).unwrap().peer_events().subscribe();
    network.connect(&id(1), &id(2)).unwrap();
    assert!(wait_until(Duration::from_secs(5), || {
        matches!(peer_events.try_recv(), Ok(PeerEvent::Add(_)))
    }));

    network.stop(&id(2)).unwrap();
    assert!(!network.conn(&id(1), &id(2)).unwrap().up);
    // Node 1's runner observes the closed pipe and drops the peer.
    assert!(wait_until(Duration::from_secs(5), || {
        matches!(peer_events.try_recv(), Ok(PeerEvent::Drop(_)))
    }));
    assert!(wait_until(Duration::from_secs(5), || {
        network.get_node(&id(1)).unwrap().peer_count() == 0
    }));

    network.shutdown();
}

#[test]
fn test_connection_survives_down_up_cycle() {
    let dir = TempDir::new().unwrap();
    let fixture = ServiceFixture::new(dir.path().to_path_buf());
    let network = network_with(&fixture, &[id(1), id(2)]);
    network.start(&id(1)).unwrap();
    network.start(&id(2)).unwrap();

    network.connect(&id(1), &id(2)).unwrap();
    network.disconnect(&id(1), &id(2)).unwrap();
    // The conn entry is retained, down.
    assert!(!network.conn(&id(1), &id(2)).unwrap().up);

    // Wait for both sides to forget the pipe before reconnecting.
    assert!(wait_until(Duration::from_secs(5), || {
        network.get_node(&id(1)).unwrap().peer_count() == 0
            && network.get_node(&id(2)).unwrap().peer_count() == 0
    }));
    network.connect(&id(2), &id(1)).unwrap();
    let conn = network.conn(&id(1), &id(2)).unwrap();
    assert!(conn.up);
    assert!(conn.reverse);

    network.shutdown();
}

#[test]
fn test_dispatcher_executes_actions_and_survives_errors() {
    let dir = TempDir::new().unwrap();
    let fixture = ServiceFixture::new(dir.path().to_path_buf());
    let network = network_with(&fixture, &[id(1), id(2)]);

    let (actions, action_rx) = unbounded();
    let dispatcher = network.subscribe_actions(action_rx);

    actions.send(SimAction::NodeUp(id(1))).unwrap();
    // Unknown node: logged, dispatch continues.
    actions.send(SimAction::NodeDown(id(9))).unwrap();
    actions.send(SimAction::NodeUp(id(2))).unwrap();
    actions.send(SimAction::ConnUp(id(1), id(2))).unwrap();

    assert!(wait_until(Duration::from_secs(5), || {
        network.conn(&id(1), &id(2)).is_some_and(|conn| conn.up)
    }));

    drop(actions);
    dispatcher.join().unwrap();
    network.shutdown();
}

#[test]
fn test_output_events_describe_structural_changes() {
    let dir = TempDir::new().unwrap();
    let fixture = ServiceFixture::new(dir.path().to_path_buf());
    let network = network_with(&fixture, &[id(1), id(2)]);
    let events = network.events().subscribe();

    network.start(&id(1)).unwrap();
    network.start(&id(2)).unwrap();
    network.connect(&id(1), &id(2)).unwrap();

    assert_eq!(events.recv().unwrap(), SimEvent::Node { id: id(1), up: true });
    assert_eq!(events.recv().unwrap(), SimEvent::Node { id: id(2), up: true });
    assert_eq!(
        events.recv().unwrap(),
        SimEvent::Conn {
            one: id(1),
            other: id(2),
            up: true,
            reverse: false,
        }
    );
    network.shutdown();
}

#[test]
fn test_journal_replay_rebuilds_topology() {
    let dir = TempDir::new().unwrap();
    let fixture = ServiceFixture::new(dir.path().to_path_buf());
    let network = network_with(&fixture, &[id(1), id(2)]);

    let journal = Journal::new();
    let collector = journal.attach(network.events());

    network.start(&id(1)).unwrap();
    network.start(&id(2)).unwrap();
    network.connect(&id(1), &id(2)).unwrap();
    // Cut the journal before shutdown so the teardown events are not
    // part of the recorded run.
    network.events().close();
    collector.join().unwrap();
    network.shutdown();
    assert!(!journal.is_empty());

    // Replay the recorded run against a fresh network.
    let replay_dir = TempDir::new().unwrap();
    let replay_fixture = ServiceFixture::new(replay_dir.path().to_path_buf());
    let replayed = network_with(&replay_fixture, &[id(1), id(2)]);
    let (actions, action_rx) = unbounded();
    let dispatcher = replayed.subscribe_actions(action_rx);
    journal.replay(&actions);
    drop(actions);
    dispatcher.join().unwrap();

    assert!(replayed.get_node(&id(1)).unwrap().is_up());
    assert!(replayed.get_node(&id(2)).unwrap().is_up());
    assert!(replayed.conn(&id(1), &id(2)).unwrap().up);
    replayed.shutdown();
}

#[test]
fn test_mocker_drives_network_without_halting_dispatch() {
    let dir = TempDir::new().unwrap();
    let fixture = ServiceFixture::new(dir.path().to_path_buf());
    let ids = [id(1), id(2), id(3)];
    let network = network_with(&fixture, &ids);

    let journal = Journal::new();
    let collector = journal.attach(network.events());

    let (actions, action_rx) = unbounded();
    let dispatcher = network.subscribe_actions(action_rx);
    let mocker = Mocker::new(MockerConfig {
        seed: 42,
        steps: 60,
        interval: Duration::ZERO,
    });
    let posted = mocker.run(&ids, &actions);
    assert_eq!(posted, 60);

    drop(actions);
    dispatcher.join().unwrap();
    network.shutdown();
    collector.join().unwrap();
    // Random streams always hit at least one valid transition.
    assert!(!journal.is_empty());
}
