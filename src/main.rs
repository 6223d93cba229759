use arbor_sdk::Delivery;
use simulation::{run_scaling, run_simulation, SimulationConfig, SimResult};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
pub mod simulation;

fn main() -> SimResult<()> {
    let filter = EnvFilter::try_from_env("ARBOR_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async_main())
}

async fn async_main() -> SimResult<()> {
    println!("\n\n╔════════════════════════════════════════════════════════════╗");
    println!("║            REPLICA SIMULATIONS                             ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    // Run 1: few participants, ordered delivery
    let stats = run_simulation(SimulationConfig::default()).await?;
    stats.print();

    // Run 2: shuffled delivery with duplicates
    let stats = run_simulation(SimulationConfig {
        participants: 5,
        operations_per_participant: 200,
        delivery: Delivery::Shuffled {
            window: 8,
            duplicate_ratio: 0.2,
            seed: 7,
        },
        seed: 7,
    })
    .await?;
    stats.print();

    // Run 3: scaling analysis
    println!("\n\n╔════════════════════════════════════════════════════════════╗");
    println!("║          SCALING ANALYSIS                                  ║");
    println!("╚════════════════════════════════════════════════════════════╝");
    run_scaling(10, 2).await?;

    println!("\n✓ All simulations completed successfully!");
    Ok(())
}
