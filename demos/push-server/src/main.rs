//! Local push endpoint for trying the notification client by hand.
//!
//! Serves `/ws/notification?userId=<id>`, answers `ping` with `pong`, and
//! pushes whatever the operator types on stdin:
//!
//!   Loan due | Return the camera by Friday        (to everyone)
//!   @1024 !BORROW_UPDATE Loan due | Return it    (to one user, with a sub-type)
//!   !SYSTEM Restarting at 22:00                  (a system message)
//!   close 1001                                   (close every socket with a code)
//!
//! Run:
//!   cargo run -p lendnotify-push-server -- --port 29578

mod protocol;
mod server;

use std::net::SocketAddr;
use tracing_subscriber::EnvFilter;

const DEFAULT_PORT: u16 = 29578;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("lendnotify_push_server=info".parse()?),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();
    let port = parse_arg(&args, "--port").unwrap_or(DEFAULT_PORT);
    let addr: SocketAddr = ([127, 0, 0, 1], port).into();

    tracing::info!("Starting push server on {}", addr);
    server::run(addr).await
}

fn parse_arg(args: &[String], flag: &str) -> Option<u16> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|v| v.parse().ok())
}
