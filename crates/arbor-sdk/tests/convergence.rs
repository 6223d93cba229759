//! End-to-end synchronization through the in-memory authority.

use arbor_core::schema::{Classifier, Feature, Language, PropertyType};
use arbor_core::{MetaPointer, NodeId, NodeKey, SchemaRegistry};
use arbor_protocol::{serialize_subtree, SerializationChunk};
use arbor_sdk::{quick, Client, ClientConfigBuilder, Delivery, MemoryAuthority, MemoryTransport};
use std::sync::Arc;
use std::time::Duration;

fn registry() -> (Arc<SchemaRegistry>, MetaPointer) {
    let language = Language::builder("board", "1")
        .classifier(
            Classifier::concept("Note")
                .partition()
                .feature(Feature::property("text", PropertyType::String).optional())
                .feature(Feature::containment("replies", "Note").optional().multiple()),
        )
        .build()
        .unwrap();
    let note = language.pointer("Note");
    (Arc::new(SchemaRegistry::new().with_language(language).unwrap()), note)
}

fn snapshot(client: &Client<MemoryTransport>, partition: &str) -> SerializationChunk {
    client.read(|replica| {
        let key = replica.mapping().try_from_id(&NodeId::new(partition)).unwrap();
        serialize_subtree(replica.forest(), key).unwrap()
    })
}

fn key_of(client: &Client<MemoryTransport>, id: &str) -> NodeKey {
    client.read(|replica| replica.mapping().try_from_id(&NodeId::new(id)).unwrap())
}

async fn settle(authority: &MemoryAuthority, clients: &[&Client<MemoryTransport>]) {
    let next = authority.next_sequence();
    for client in clients {
        client.caught_up(next, Duration::from_secs(2)).await.unwrap();
    }
}

/// A partition "board" holding two empty columns.
async fn setup_board(client: &Client<MemoryTransport>, note: &MetaPointer) {
    client
        .edit(|forest| {
            let board = forest.create_node(note, "board")?;
            forest.add_partition(board)?;
            for column in ["left", "right"] {
                let node = forest.create_node(note, column)?;
                forest.containment(board, "replies")?.add(node)?;
            }
            Ok(())
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn test_two_participants_converge() {
    let (registry, note) = registry();
    let authority = MemoryAuthority::new(registry.clone());
    let clients = quick::connect_participants(&authority, registry, &["alice", "bob"]).await.unwrap();
    let (alice, bob) = (&clients[0], &clients[1]);

    setup_board(alice, &note).await;
    settle(&authority, &[alice, bob]).await;

    let left = key_of(bob, "left");
    bob.edit(|forest| {
        let card = forest.create_node(&note, "card")?;
        forest.property(card, "text")?.set_value("todo")?;
        forest.containment(left, "replies")?.add(card)
    })
    .await
    .unwrap();
    settle(&authority, &[alice, bob]).await;

    let right = key_of(alice, "right");
    let card = key_of(alice, "card");
    alice
        .edit(|forest| {
            forest.containment(right, "replies")?.add(card)?;
            forest.property(card, "text")?.set_value("doing")
        })
        .await
        .unwrap();
    settle(&authority, &[alice, bob]).await;

    let expected = authority.snapshot(&NodeId::new("board")).unwrap();
    assert_eq!(snapshot(alice, "board"), expected);
    assert_eq!(snapshot(bob, "board"), expected);
    assert_eq!(expected.nodes.len(), 4);
}

#[tokio::test]
async fn test_own_events_are_not_applied_twice() {
    let (registry, note) = registry();
    let authority = MemoryAuthority::new(registry.clone());
    let clients = quick::connect_participants(&authority, registry, &["alice", "bob"]).await.unwrap();
    let (alice, bob) = (&clients[0], &clients[1]);

    setup_board(alice, &note).await;
    settle(&authority, &[alice, bob]).await;

    let alice_stats = alice.stats();
    assert_eq!(alice_stats.commands_sent, 3);
    assert_eq!(alice_stats.own_events, 3);
    assert_eq!(alice_stats.events_applied, 0);

    let bob_stats = bob.stats();
    assert_eq!(bob_stats.events_applied, 3);
    assert_eq!(bob_stats.failed, 0);
    assert_eq!(bob.read(|r| r.pending_commands()), 0);
}

#[tokio::test]
async fn test_shuffled_and_duplicated_events_are_reordered() {
    let (registry, note) = registry();
    let authority = MemoryAuthority::new(registry.clone()).with_delivery(Delivery::Shuffled {
        window: 4,
        duplicate_ratio: 0.5,
        seed: 11,
    });
    let clients = quick::connect_participants(&authority, registry, &["alice", "bob"]).await.unwrap();
    let (alice, bob) = (&clients[0], &clients[1]);

    setup_board(alice, &note).await;
    let left = key_of(alice, "left");
    for i in 0..10 {
        alice
            .edit(|forest| {
                let card = forest.create_node(&note, format!("card-{}", i))?;
                forest.containment(left, "replies")?.insert_at(0, card)
            })
            .await
            .unwrap();
    }
    authority.flush();
    settle(&authority, &[alice, bob]).await;

    let expected = authority.snapshot(&NodeId::new("board")).unwrap();
    assert_eq!(snapshot(bob, "board"), expected);
    let stats = bob.stats();
    assert_eq!(stats.events_applied, 13);
    assert_eq!(stats.failed, 0);
}

#[tokio::test]
async fn test_offline_edits_are_sent_after_reconnect() {
    let (registry, note) = registry();
    let authority = MemoryAuthority::new(registry.clone());
    let alice = Client::connect_memory(
        &authority,
        registry.clone(),
        ClientConfigBuilder::new().client_id("alice").build(),
    )
    .unwrap();
    let mut bob = Client::connect_memory(
        &authority,
        registry,
        ClientConfigBuilder::new().client_id("bob").build(),
    )
    .unwrap();
    alice.sign_on().await.unwrap();
    bob.sign_on().await.unwrap();

    setup_board(&alice, &note).await;
    settle(&authority, &[&alice, &bob]).await;

    bob.transport().close();
    let right = key_of(&bob, "right");
    bob.edit(|forest| {
        let card = forest.create_node(&note, "from-bob")?;
        forest.containment(right, "replies")?.add(card)
    })
    .await
    .unwrap();
    assert_eq!(bob.read(|r| r.pending_commands()), 1);

    let left = key_of(&alice, "left");
    alice
        .edit(|forest| {
            let card = forest.create_node(&note, "from-alice")?;
            forest.containment(left, "replies")?.add(card)
        })
        .await
        .unwrap();

    bob.reconnect(authority.connect()).await.unwrap();
    assert!(bob.is_connected());
    assert_eq!(bob.read(|r| r.pending_commands()), 0);
    settle(&authority, &[&alice, &bob]).await;

    let expected = authority.snapshot(&NodeId::new("board")).unwrap();
    assert_eq!(snapshot(&alice, "board"), expected);
    assert_eq!(snapshot(&bob, "board"), expected);
    assert_eq!(expected.nodes.len(), 5);
}

#[tokio::test]
async fn test_conflicting_offline_edit_is_rejected() {
    let (registry, note) = registry();
    let authority = MemoryAuthority::new(registry.clone());
    let alice = Client::connect_memory(
        &authority,
        registry.clone(),
        ClientConfigBuilder::new().client_id("alice").build(),
    )
    .unwrap();
    let mut bob = Client::connect_memory(
        &authority,
        registry,
        ClientConfigBuilder::new().client_id("bob").build(),
    )
    .unwrap();
    alice.sign_on().await.unwrap();
    bob.sign_on().await.unwrap();

    setup_board(&alice, &note).await;
    settle(&authority, &[&alice, &bob]).await;

    bob.transport().close();
    let board = key_of(&bob, "board");
    bob.edit(|forest| forest.containment(board, "replies")?.remove_at(0).map(|_| ()))
        .await
        .unwrap();

    let board = key_of(&alice, "board");
    alice
        .edit(|forest| forest.containment(board, "replies")?.remove_at(0).map(|_| ()))
        .await
        .unwrap();

    bob.reconnect(authority.connect()).await.unwrap();
    settle(&authority, &[&alice, &bob]).await;

    let stats = bob.stats();
    assert_eq!(stats.rejected, 1);
    assert_eq!(stats.failed, 1);
    assert_eq!(bob.read(|r| r.in_flight()), 0);

    let expected = authority.snapshot(&NodeId::new("board")).unwrap();
    assert_eq!(snapshot(&alice, "board"), expected);
    assert_eq!(snapshot(&bob, "board"), expected);
}

#[test]
fn test_partition_contents_are_loaded_on_subscribe() {
    tokio_test::block_on(async {
        let (registry, note) = registry();
        let authority = MemoryAuthority::new(registry.clone());
        let alice = Client::connect_memory(
            &authority,
            registry.clone(),
            ClientConfigBuilder::new().client_id("alice").build(),
        )
        .unwrap();
        alice.sign_on().await.unwrap();
        setup_board(&alice, &note).await;

        let carol = Client::connect_memory(
            &authority,
            registry,
            ClientConfigBuilder::new().client_id("carol").build(),
        )
        .unwrap();
        carol.sign_on().await.unwrap();
        let partitions = carol.list_partitions().await.unwrap();
        assert_eq!(partitions, vec![NodeId::new("board")]);

        let keys = carol.subscribe_to_partitions(&partitions).await.unwrap();
        assert_eq!(keys.len(), 1);
        assert!(carol.read(|r| r.forest().is_partition(keys[0])));
        assert_eq!(snapshot(&carol, "board"), authority.snapshot(&NodeId::new("board")).unwrap());
        assert_eq!(carol.expected_sequence(), 3);
    });
}
