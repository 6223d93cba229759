use arbor_core::schema::{Classifier, Feature, Language, PropertyType};
use arbor_core::{MetaPointer, NodeId, NodeKey, SchemaRegistry};
use arbor_protocol::serialize_subtree;
use arbor_sdk::{quick, Client, Delivery, MemoryAuthority, MemoryTransport};
use async_stream::stream;
use futures::stream::Stream;
use futures::stream::StreamExt;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub type SimResult<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// Parameters of one simulation run.
#[derive(Clone, Debug)]
pub struct SimulationConfig {
    pub participants: usize,
    pub operations_per_participant: usize,
    pub delivery: Delivery,
    pub seed: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            participants: 3,
            operations_per_participant: 100,
            delivery: Delivery::InOrder,
            seed: 42,
        }
    }
}

/// Statistics collected during a simulation
#[derive(Clone, Debug)]
pub struct SimulationStats {
    pub participants: usize,
    pub operations: usize,
    pub events: u64,
    pub commands_sent: u64,
    pub events_applied: u64,
    pub own_events: u64,
    pub rejected: u64,
    pub failed: u64,
    pub redelivered: u64,
    pub total_time: Duration,
    pub avg_edit_time: Duration,
    pub ops_per_second: f64,
    pub converged: bool,
}

impl SimulationStats {
    pub fn print(&self) {
        println!("\n╔════════════════════════════════════════════════════════════╗");
        println!("║              Simulation Statistics                         ║");
        println!("╠════════════════════════════════════════════════════════════╣");
        println!("║  Participants:              {:>30} ║", self.participants);
        println!("║  Edits performed:           {:>30} ║", self.operations);
        println!("║  Events sequenced:          {:>30} ║", self.events);
        println!("║  Commands sent:             {:>30} ║", self.commands_sent);
        println!("║  Remote events applied:     {:>30} ║", self.events_applied);
        println!("║  Own events suppressed:     {:>30} ║", self.own_events);
        println!("║  Rejected / failed:         {:>30} ║", format!("{} / {}", self.rejected, self.failed));
        println!("║  Stale or duplicate:        {:>30} ║", self.redelivered);
        println!("║  Total Time:                {:>29}s ║", format!("{:.3}", self.total_time.as_secs_f64()));
        println!("║  Average Edit Time:         {:>28}µs ║", format!("{:.2}", self.avg_edit_time.as_micros()));
        println!("║  Edits/Second:              {:>30.0} ║", self.ops_per_second);
        println!("║  Converged:                 {:>30} ║", if self.converged { "yes" } else { "NO" });
        println!("╚════════════════════════════════════════════════════════════╝");
    }
}

#[derive(Clone, Copy, Debug)]
enum Operation {
    AddCard,
    EditCard,
    MoveCard,
    DeleteCard,
}

/// Kanban-style schema: a board partition holding columns of cards.
struct BoardSchema {
    registry: Arc<SchemaRegistry>,
    board: MetaPointer,
    column: MetaPointer,
    card: MetaPointer,
}

fn board_schema() -> SimResult<BoardSchema> {
    let language = Language::builder("kanban", "1")
        .classifier(
            Classifier::concept("Board")
                .partition()
                .feature(Feature::containment("columns", "Column").optional().multiple()),
        )
        .classifier(
            Classifier::concept("Column")
                .feature(Feature::property("title", PropertyType::String).optional())
                .feature(Feature::containment("cards", "Card").optional().multiple()),
        )
        .classifier(
            Classifier::concept("Card")
                .feature(Feature::property("text", PropertyType::String).optional())
                .feature(Feature::property("votes", PropertyType::Integer).optional()),
        )
        .build()?;
    Ok(BoardSchema {
        board: language.pointer("Board"),
        column: language.pointer("Column"),
        card: language.pointer("Card"),
        registry: Arc::new(SchemaRegistry::new().with_language(language)?),
    })
}

/// Generator that yields the edits one participant performs
fn operation_generator(operations: usize, seed: u64) -> impl Stream<Item = (Operation, u64)> {
    stream! {
        let mut rng = StdRng::seed_from_u64(seed);
        for _ in 0..operations {
            let operation = match rng.gen_range(0..10) {
                0..=3 => Operation::AddCard,
                4..=6 => Operation::EditCard,
                7..=8 => Operation::MoveCard,
                _ => Operation::DeleteCard,
            };
            yield (operation, rng.gen::<u64>());
        }
    }
}

/// Perform one edit inside the participant's own column. Returns false when
/// the column is too small for the operation.
async fn perform(
    client: &Client<MemoryTransport>,
    column: NodeKey,
    card: &MetaPointer,
    operation: Operation,
    salt: u64,
) -> arbor_sdk::Result<bool> {
    let cards = client.read(|replica| replica.forest().children(column))?;
    let pick = salt as usize;

    match operation {
        Operation::AddCard => {
            let index = pick % (cards.len() + 1);
            client
                .edit(|forest| {
                    let node = forest.create_node(card, NodeId::generate())?;
                    forest.property(node, "text")?.set_value(format!("card {}", salt % 1000))?;
                    forest.containment(column, "cards")?.insert_at(index, node)
                })
                .await?;
        }
        Operation::EditCard if !cards.is_empty() => {
            let target = cards[pick % cards.len()];
            client
                .edit(|forest| forest.property(target, "votes")?.set_value((salt % 100) as i64))
                .await?;
        }
        Operation::MoveCard if cards.len() > 1 => {
            let from = pick % cards.len();
            let to = (pick / 7) % cards.len();
            client
                .edit(|forest| forest.containment(column, "cards")?.move_to(from, to))
                .await?;
        }
        Operation::DeleteCard if !cards.is_empty() => {
            let index = pick % cards.len();
            client
                .edit(|forest| forest.containment(column, "cards")?.remove_at(index).map(|_| ()))
                .await?;
        }
        _ => return Ok(false),
    }
    Ok(true)
}

fn key_of(client: &Client<MemoryTransport>, id: &str) -> SimResult<NodeKey> {
    client
        .read(|replica| replica.mapping().try_from_id(&NodeId::new(id)))
        .ok_or_else(|| format!("{} does not know {}", client.client_id(), id).into())
}

async fn settle(authority: &MemoryAuthority, clients: &[Arc<Client<MemoryTransport>>]) -> SimResult<()> {
    authority.flush();
    let next = authority.next_sequence();
    for client in clients {
        client.caught_up(next, Duration::from_secs(10)).await?;
    }
    Ok(())
}

/// Run participants editing disjoint columns of one shared board, then check
/// that every replica matches the authority.
pub async fn run_simulation(config: SimulationConfig) -> SimResult<SimulationStats> {
    println!("\n╔════════════════════════════════════════════════════════════╗");
    println!("║        Board Simulation                                    ║");
    println!(
        "║  Participants: {} | Edits/Participant: {} | {:?}",
        config.participants, config.operations_per_participant, config.delivery
    );
    println!("╚════════════════════════════════════════════════════════════╝");

    let start = Instant::now();
    let schema = board_schema()?;
    let authority = MemoryAuthority::new(schema.registry.clone()).with_delivery(config.delivery.clone());

    let names: Vec<String> = (0..config.participants).map(|i| format!("participant-{}", i)).collect();
    let names: Vec<&str> = names.iter().map(String::as_str).collect();
    let clients: Vec<Arc<Client<MemoryTransport>>> =
        quick::connect_participants(&authority, schema.registry.clone(), &names)
            .await?
            .into_iter()
            .map(Arc::new)
            .collect();

    println!("\n[Phase 1/3] Setting up the board...");
    let participants = config.participants;
    let (board, column) = (schema.board.clone(), schema.column.clone());
    clients[0]
        .edit(|forest| {
            let root = forest.create_node(&board, "board")?;
            forest.add_partition(root)?;
            for i in 0..participants {
                let node = forest.create_node(&column, format!("column-{}", i))?;
                forest.property(node, "title")?.set_value(format!("Column {}", i))?;
                forest.containment(root, "columns")?.add(node)?;
            }
            Ok(())
        })
        .await?;
    settle(&authority, &clients).await?;
    println!("[Phase 1/3] ✓ Completed");

    println!("[Phase 2/3] Editing concurrently...");
    let mut handles = Vec::with_capacity(clients.len());
    for (idx, client) in clients.iter().enumerate() {
        let client = Arc::clone(client);
        let column = key_of(&client, &format!("column-{}", idx))?;
        let card = schema.card.clone();
        let operations = config.operations_per_participant;
        let seed = config.seed.wrapping_add(idx as u64);
        handles.push(tokio::spawn(async move {
            let mut edit_times = Vec::with_capacity(operations);
            let mut ops = Box::pin(operation_generator(operations, seed));
            while let Some((operation, salt)) = ops.next().await {
                let edit_start = Instant::now();
                if perform(&client, column, &card, operation, salt).await? {
                    edit_times.push(edit_start.elapsed());
                }
                if edit_times.len() % 50 == 0 {
                    tokio::task::yield_now().await;
                }
            }
            Ok::<_, arbor_sdk::SdkError>(edit_times)
        }));
    }

    let mut edit_times = Vec::new();
    for handle in handles {
        edit_times.extend(handle.await??);
    }
    println!("[Phase 2/3] ✓ Completed");

    println!("[Phase 3/3] Waiting for every replica to catch up...");
    settle(&authority, &clients).await?;

    let expected = authority
        .snapshot(&NodeId::new("board"))
        .ok_or("the authority lost the board")?;
    let mut converged = true;
    for client in &clients {
        let board = key_of(client, "board")?;
        let actual = client.read(|replica| serialize_subtree(replica.forest(), board))?;
        if actual != expected {
            tracing::warn!(client = client.client_id(), "replica diverged from the authority");
            converged = false;
        }
    }
    println!("[Phase 3/3] ✓ Completed");

    let total_time = start.elapsed();
    let avg_edit_time = if !edit_times.is_empty() {
        edit_times.iter().sum::<Duration>() / edit_times.len() as u32
    } else {
        Duration::ZERO
    };

    let mut stats = SimulationStats {
        participants: config.participants,
        operations: edit_times.len(),
        events: authority.next_sequence(),
        commands_sent: 0,
        events_applied: 0,
        own_events: 0,
        rejected: 0,
        failed: 0,
        redelivered: 0,
        total_time,
        avg_edit_time,
        ops_per_second: edit_times.len() as f64 / total_time.as_secs_f64(),
        converged,
    };
    for client in &clients {
        let replica = client.stats();
        stats.commands_sent += replica.commands_sent;
        stats.events_applied += replica.events_applied;
        stats.own_events += replica.own_events;
        stats.rejected += replica.rejected;
        stats.failed += replica.failed;
        stats.redelivered += replica.stale + replica.duplicates;
    }
    Ok(stats)
}

/// Run the same workload with a growing number of participants.
pub async fn run_scaling(max_participants: usize, step: usize) -> SimResult<()> {
    println!("\nParticipants | Edits | Events | Time (ms) | Edits/s | Converged");
    println!("-------------|-------|--------|-----------|---------|----------");

    for participants in (step..=max_participants).step_by(step.max(1)) {
        let stats = run_simulation(SimulationConfig {
            participants,
            operations_per_participant: 100,
            delivery: Delivery::InOrder,
            seed: participants as u64,
        })
        .await?;
        println!(
            "{:>12} | {:>5} | {:>6} | {:>9.2} | {:>7.0} | {}",
            participants,
            stats.operations,
            stats.events,
            stats.total_time.as_secs_f64() * 1000.0,
            stats.ops_per_second,
            stats.converged
        );
    }
    Ok(())
}
