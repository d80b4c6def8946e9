//! Stand-in Hoverfly binary accepting `-ap` / `-pp` like the real one

use tokio::net::TcpListener;
use workspace_tests::{admin_router, proxy_router, StubArgs, StubState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_ansi(false).init();

    let args = StubArgs::from_args(std::env::args().skip(1))?;
    let state = StubState::new(args.options());

    let admin = TcpListener::bind(("0.0.0.0", args.admin_port)).await?;
    let proxy = TcpListener::bind(("0.0.0.0", args.proxy_port)).await?;
    println!(
        "Hoverfly stub listening: admin={} proxy={}",
        args.admin_port, args.proxy_port
    );

    let admin_app = admin_router(state.clone());
    let proxy_app = proxy_router(state);
    tokio::try_join!(
        async move { axum::serve(admin, admin_app).await },
        async move { axum::serve(proxy, proxy_app).await },
    )?;
    Ok(())
}
