//! Two in-process nodes exchanging group messages over the loopback engine.
//!
//! Run with: cargo run --example holler

use std::sync::Arc;

use lanmesh_core::{Engine, LoopbackMesh, Node};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let mesh = LoopbackMesh::new_shared();

    let alice = Node::new(mesh.clone() as Arc<dyn Engine>, Some("alice"))?;
    alice.set_header("X-ROLE", "initiator")?;
    alice.start()?;
    alice.join("HOLLER")?;

    let bob = Node::new(mesh.clone() as Arc<dyn Engine>, Some("bob"))?;
    bob.start()?;
    bob.join("HOLLER")?;

    alice.shout("HOLLER", &[b"hello room".as_ref()])?;
    let heard = bob.recv()?;
    println!(
        "bob heard: {:?}",
        heard.iter().map(|f| String::from_utf8_lossy(f)).collect::<Vec<_>>()
    );

    bob.whisper(&alice.uuid()?, &[b"hi alice".as_ref(), b"from bob"])?;
    let reply = alice.recv()?;
    println!(
        "alice heard: {:?}",
        reply.iter().map(|f| String::from_utf8_lossy(f)).collect::<Vec<_>>()
    );

    println!(
        "alice sees role header: {:?}",
        bob.peer_header_value(&alice.uuid()?, "X-ROLE")?
    );

    alice.destroy();
    bob.destroy();
    Ok(())
}
