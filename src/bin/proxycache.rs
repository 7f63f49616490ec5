//! Thin command-line entry point: one proxied fetch against a running
//! Redis. The demo fetcher sleeps before answering, so lock coalescing
//! and timeouts can be observed by running several copies side by side.

use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use proxycache::{BoxError, CallPolicy, RedisProxyCache};

#[derive(Debug, Parser)]
#[command(name = "proxycache", about = "Proxy a read through a Redis-backed cache")]
struct Args {
    /// Key to fetch (stored as "<prefix>.<key>")
    #[arg(default_value = "key")]
    key: String,

    /// Redis connection URL
    #[arg(long, default_value = "redis://127.0.0.1:6379")]
    redis_url: String,

    /// Key prefix bound to the cache
    #[arg(long, default_value = "test")]
    prefix: String,

    /// Value the demo fetcher returns
    #[arg(long, default_value = "abc")]
    value: String,

    /// Seconds the demo fetcher sleeps before returning
    #[arg(long, default_value_t = 3)]
    fetch_delay: u64,

    /// Storage TTL in seconds (0 persists without a TTL)
    #[arg(long, default_value_t = 10)]
    expire: u64,

    /// Staleness window in seconds
    #[arg(long, default_value_t = 3)]
    staleness: u64,

    /// Throttle window in seconds
    #[arg(long, default_value_t = 1)]
    throttle: u64,

    /// Call timeout in seconds
    #[arg(long, default_value_t = 6)]
    timeout: u64,
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    let args = Args::parse();

    let policy = CallPolicy {
        expire: Duration::from_secs(args.expire),
        staleness: Duration::from_secs(args.staleness),
        throttle: Duration::from_secs(args.throttle),
        timeout: Duration::from_secs(args.timeout),
    };
    let cache: RedisProxyCache<String> =
        RedisProxyCache::connect(&args.redis_url, &args.prefix, policy).await?;

    let delay = Duration::from_secs(args.fetch_delay);
    let value = args.value.clone();
    let result = cache
        .call(
            &args.key,
            move || {
                let value = value.clone();
                async move {
                    tokio::time::sleep(delay).await;
                    Ok::<_, BoxError>(value)
                }
            },
            None,
        )
        .await;

    match result {
        Ok(item) => {
            let ttl = cache.store().ttl(&cache.storage_key(&args.key)).await;
            println!("item: {}, ttl: {:?}", item, ttl);
        }
        Err(err) => println!("err: {}", err),
    }
    Ok(())
}
