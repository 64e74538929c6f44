//! Serves the working directory plus one `/callback` route.
//!
//! Configure with `PTTH_PORT`, `PTTH_BASE_DIR` and friends; stop with Ctrl-C.

use ptth::{ConnectionInfo, Request, Response, Routes, Server, ServerConfig};

const CALLBACK_RESPONSE: &str = "<h1>callback success!</h1>";

/// Logs the query string and answers with a fixed page.
fn handle_callback(connection: &ConnectionInfo, request: &Request) -> Response {
    log::info!(
        "Handling /callback for {}, query string: {}",
        connection.peer_addr(),
        request.query().unwrap_or("")
    );
    Response::ok(CALLBACK_RESPONSE)
}

fn main() {
    let log_env = env_logger::Env::default().default_filter_or("info");
    env_logger::init_from_env(log_env);

    let config = match ServerConfig::new() {
        Ok(config) => config,
        Err(err) => {
            log::error!("Invalid configuration: {}", err);
            std::process::exit(1);
        }
    };

    let mut routes = Routes::new();
    if let Err(err) = routes.get("/callback", handle_callback) {
        log::error!("{}", err);
        std::process::exit(1);
    }

    let server = match Server::init(&config, routes) {
        Ok(server) => server,
        Err(err) => {
            log::error!("Could not start server: {}", err);
            std::process::exit(1);
        }
    };

    if let Err(err) = ptth::signal::install(server.shutdown_handle()) {
        log::warn!("Signal handling unavailable: {}", err);
    }

    server.run();
}
