//! roomcast demo driver
//!
//! Wires the chat pipeline with in-memory collaborators (or Redis for the
//! distributed tier when `ROOMCAST_REDIS_URL` is set), runs a synthetic load
//! and prints the pipeline statistics.
//!
//! Usage:
//!   cargo run -- demo                              # 4 rooms, 8 users, 50 messages each
//!   cargo run -- demo --rooms 2 --users 20         # custom load

use std::env;
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use roomcast::transport::ConnectionCommand;
use roomcast::{
    ChatService, ConnectionRegistry, ListCache, MemoryListCache, MemoryMessageStore,
    MemoryRoomDirectory, PipelineConfig, RedisListCache, UserInfo,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_usage();
        return Ok(());
    }

    match args[1].as_str() {
        "demo" => {
            let load = DemoLoad {
                rooms: parse_flag(&args, "--rooms", 4),
                users: parse_flag(&args, "--users", 8),
                messages: parse_flag(&args, "--messages", 50),
            };
            run_demo(load).await?;
        }
        "help" | "--help" | "-h" => {
            print_usage();
        }
        _ => {
            eprintln!("Unknown command: {}", args[1]);
            print_usage();
        }
    }

    Ok(())
}

fn print_usage() {
    println!("roomcast - chat message pipeline");
    println!();
    println!("USAGE:");
    println!("    cargo run -- demo [OPTIONS]");
    println!();
    println!("COMMANDS:");
    println!("    demo                Run a synthetic chat load through the pipeline");
    println!("    help                Show this help message");
    println!();
    println!("OPTIONS:");
    println!("    --rooms <NUM>       Number of rooms (default: 4)");
    println!("    --users <NUM>       Users per room (default: 8)");
    println!("    --messages <NUM>    Messages per user (default: 50)");
    println!();
    println!("ENVIRONMENT:");
    println!("    ROOMCAST_REDIS_URL      Use Redis for the distributed cache tier");
    println!("    ROOMCAST_NUM_SHARDS     Shards per room (default: 2)");
    println!("    ROOMCAST_BATCH_SIZE     Initial batch size (default: 50)");
    println!("    RUST_LOG                Log filter (default: info)");
    println!();
    println!("EXAMPLES:");
    println!("    cargo run -- demo");
    println!("    RUST_LOG=roomcast=debug cargo run -- demo --rooms 1 --users 3");
}

fn parse_flag(args: &[String], flag: &str, default: usize) -> usize {
    for i in 0..args.len() {
        if args[i] == flag && i + 1 < args.len() {
            if let Ok(value) = args[i + 1].parse() {
                return value;
            }
        }
    }
    default
}

#[derive(Debug, Clone, Copy)]
struct DemoLoad {
    rooms: usize,
    users: usize,
    messages: usize,
}

async fn distributed_tier(config: &PipelineConfig) -> Arc<dyn ListCache> {
    if let Some(url) = &config.redis_url {
        match RedisListCache::connect(url).await {
            Ok(cache) => return Arc::new(cache),
            Err(e) => warn!(url = %url, error = %e, "Redis unavailable, using in-memory tier"),
        }
    }
    Arc::new(MemoryListCache::new())
}

async fn run_demo(load: DemoLoad) -> anyhow::Result<()> {
    let config = PipelineConfig::from_env();
    config.validate()?;

    info!(
        rooms = load.rooms,
        users = load.users,
        messages = load.messages,
        num_shards = config.shards.num_shards,
        "Starting demo"
    );

    let rooms = Arc::new(MemoryRoomDirectory::new());
    let store = Arc::new(MemoryMessageStore::new());
    let registry = Arc::new(ConnectionRegistry::new());
    let service = Arc::new(ChatService::new(
        &config,
        rooms.clone(),
        store.clone(),
        distributed_tier(&config).await,
        registry.clone(),
    ));
    service.start().await;

    let room_ids: Vec<String> = (0..load.rooms).map(|r| format!("room-{}", r)).collect();
    for room_id in &room_ids {
        rooms.create_room(room_id.as_str(), format!("Demo {}", room_id), load.users);
    }

    // One receiving task per user connection, counting deliveries until closed
    let mut receivers = Vec::new();
    let mut users = Vec::new();
    for (r, room_id) in room_ids.iter().enumerate() {
        for u in 0..load.users {
            let user = UserInfo::new(format!("user-{}-{}", r, u), format!("User {}.{}", r, u));
            let mut handle = registry.register(&user.user_id).await;
            receivers.push(tokio::spawn(async move {
                let mut delivered = 0usize;
                while let Some(command) = handle.commands.recv().await {
                    match command {
                        ConnectionCommand::Deliver(_) => delivered += 1,
                        ConnectionCommand::Close(_) => break,
                    }
                }
                delivered
            }));
            service.on_join(room_id, &user).await?;
            users.push((room_id.clone(), user));
        }
    }

    let started = Instant::now();
    let senders = users.iter().map(|(room_id, user)| {
        let service = service.clone();
        async move {
            for n in 0..load.messages {
                let body = format!("message {} from {}", n, user.display_name);
                match service.on_message(room_id, user, &body).await {
                    Ok(published) => {
                        published.delivery.wait().await;
                    }
                    Err(e) => warn!(user_id = %user.user_id, error = %e, "Message rejected"),
                }
            }
        }
    });
    join_all(senders).await;
    let elapsed = started.elapsed();

    // Half of every room leaves for good
    for (room_id, user) in users.iter().filter(|(_, user)| user.user_id.ends_with(['0', '2', '4', '6', '8'])) {
        if let Err(e) = service.on_leave(room_id, user).await {
            warn!(user_id = %user.user_id, error = %e, "Leave failed");
        }
    }

    for room_id in &room_ids {
        service.shards().log_shard_balance(room_id);
    }

    service.shutdown().await;
    registry.close_all("demo finished").await;
    let delivered: usize = join_all(receivers)
        .await
        .into_iter()
        .filter_map(|r| r.ok())
        .sum();

    let total = load.rooms * load.users * load.messages;
    println!();
    println!("Demo complete in {:.2?}", elapsed);
    println!("  messages sent:      {}", total);
    println!("  events delivered:   {}", delivered);
    println!("  events stored:      {}", store.len().await);
    println!();
    println!("{}", serde_json::to_string_pretty(&service.stats())?);

    Ok(())
}
