//! End-to-end scenarios over the loopback engine: discovery, group
//! membership, whisper/shout delivery, directory queries, and teardown
//! ordering, exercised through the public handle API only.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use lanmesh_core::{Engine, LoopbackMesh, Node, NodeError};

fn started(mesh: &Arc<LoopbackMesh>, name: &str) -> Node {
    let n = Node::new(mesh.clone() as Arc<dyn Engine>, Some(name)).unwrap();
    n.start().unwrap();
    n
}

#[test]
fn two_nodes_discover_join_and_exchange_group_messages() {
    let mesh = LoopbackMesh::new_shared();
    let alice = started(&mesh, "alice");
    let bob = started(&mesh, "bob");

    alice.join("CHAT").unwrap();
    bob.join("CHAT").unwrap();

    assert_eq!(alice.peers().unwrap(), vec![bob.uuid().unwrap()]);
    assert_eq!(alice.own_groups().unwrap(), vec!["CHAT".to_string()]);
    assert_eq!(alice.peer_groups().unwrap(), vec!["CHAT".to_string()]);
    assert_eq!(
        alice.peers_by_group("CHAT").unwrap(),
        Some(vec![bob.uuid().unwrap()])
    );

    bob.shout("CHAT", &[b"hello".as_ref()]).unwrap();
    assert_eq!(alice.recv().unwrap(), vec![b"hello".to_vec()]);

    alice.destroy();
    bob.destroy();
    assert_eq!(mesh.node_count(), 0);
    assert_eq!(mesh.outstanding_resources(), 0);
}

#[test]
fn whisper_preserves_frame_order_and_empty_frames() {
    let mesh = LoopbackMesh::new_shared();
    let sender = started(&mesh, "sender");
    let receiver = started(&mesh, "receiver");

    sender
        .whisper(
            &receiver.uuid().unwrap(),
            &[b"first".as_ref(), b"", b"third"],
        )
        .unwrap();

    assert_eq!(
        receiver.recv().unwrap(),
        vec![b"first".to_vec(), Vec::new(), b"third".to_vec()]
    );
    assert_eq!(mesh.outstanding_resources(), 0);
}

#[test]
fn shout_reaches_members_only_and_never_echoes() {
    let mesh = LoopbackMesh::new_shared();
    let speaker = started(&mesh, "speaker");
    let member = started(&mesh, "member");
    let outsider = started(&mesh, "outsider");

    speaker.join("FLOOR").unwrap();
    member.join("FLOOR").unwrap();

    speaker.shout("FLOOR", &[b"announcement".as_ref()]).unwrap();
    assert_eq!(member.recv().unwrap(), vec![b"announcement".to_vec()]);

    // The outsider saw nothing; its first receive is the close signal.
    outsider.stop().unwrap();
    assert!(matches!(
        outsider.recv().unwrap_err(),
        NodeError::ReceiveFailed { .. }
    ));
    // Neither does the speaker hear itself.
    speaker.stop().unwrap();
    assert!(matches!(
        speaker.recv().unwrap_err(),
        NodeError::ReceiveFailed { .. }
    ));
}

#[test]
fn stop_unblocks_a_pending_recv_on_another_thread() {
    let mesh = LoopbackMesh::new_shared();
    let node = Arc::new(started(&mesh, "listener"));

    let waiter = {
        let node = Arc::clone(&node);
        thread::spawn(move || node.recv())
    };
    thread::sleep(Duration::from_millis(50));
    node.stop().unwrap();

    let outcome = waiter.join().unwrap();
    assert!(matches!(
        outcome.unwrap_err(),
        NodeError::ReceiveFailed { .. }
    ));
}

#[test]
fn queued_messages_drain_before_stop_takes_effect() {
    let mesh = LoopbackMesh::new_shared();
    let sender = started(&mesh, "sender");
    let receiver = started(&mesh, "receiver");

    sender
        .whisper(&receiver.uuid().unwrap(), &[b"queued".as_ref()])
        .unwrap();
    receiver.stop().unwrap();

    assert_eq!(receiver.recv().unwrap(), vec![b"queued".to_vec()]);
    assert!(receiver.recv().is_err());
}

#[test]
fn empty_directory_on_a_lone_node() {
    let mesh = LoopbackMesh::new_shared();
    let loner = started(&mesh, "loner");

    assert!(loner.peers().unwrap().is_empty());
    assert!(loner.own_groups().unwrap().is_empty());
    assert!(loner.peer_groups().unwrap().is_empty());
    assert_eq!(loner.peers_by_group("ghost-town").unwrap(), None);
    assert_eq!(mesh.outstanding_resources(), 0);
}

#[test]
fn header_lookup_has_three_distinct_outcomes() {
    let mesh = LoopbackMesh::new_shared();
    let tagged = Node::new(mesh.clone() as Arc<dyn Engine>, Some("tagged")).unwrap();
    tagged.set_header("X-ROLE", "gateway").unwrap();
    tagged.start().unwrap();
    let prober = started(&mesh, "prober");
    let uuid = tagged.uuid().unwrap();

    assert_eq!(
        prober.peer_header_value(&uuid, "X-ROLE").unwrap(),
        Some("gateway".to_string())
    );
    assert_eq!(prober.peer_header_value(&uuid, "X-MISSING").unwrap(), None);
    assert!(matches!(
        prober.peer_header_value("no-such-peer", "X-ROLE").unwrap_err(),
        NodeError::LookupFailed {
            op: "peer_header_value",
            ..
        }
    ));
    assert_eq!(mesh.outstanding_resources(), 0);
}

#[test]
fn address_lookup_for_unknown_peer_fails() {
    let mesh = LoopbackMesh::new_shared();
    let prober = started(&mesh, "prober");
    assert!(matches!(
        prober.peer_address("no-such-peer").unwrap_err(),
        NodeError::LookupFailed {
            op: "peer_address",
            ..
        }
    ));
}

#[test]
fn leave_removes_the_node_from_delivery() {
    let mesh = LoopbackMesh::new_shared();
    let speaker = started(&mesh, "speaker");
    let fickle = started(&mesh, "fickle");

    fickle.join("ROOM").unwrap();
    fickle.leave("ROOM").unwrap();

    speaker.shout("ROOM", &[b"anyone?".as_ref()]).unwrap();
    fickle.stop().unwrap();
    assert!(fickle.recv().is_err());
    assert_eq!(speaker.peers_by_group("ROOM").unwrap(), None);
}

#[test]
fn teardown_leaves_no_native_state_behind() {
    let mesh = LoopbackMesh::new_shared();
    {
        let a = started(&mesh, "a");
        let b = started(&mesh, "b");
        a.join("ROOM").unwrap();
        b.join("ROOM").unwrap();
        a.shout("ROOM", &[b"bye".as_ref()]).unwrap();
        assert_eq!(b.recv().unwrap(), vec![b"bye".to_vec()]);
        let _ = a.peers().unwrap();
        let _ = b.peer_groups().unwrap();
    }
    assert_eq!(mesh.node_count(), 0);
    assert_eq!(mesh.outstanding_resources(), 0);
}
