//! A small HTTP/1.1 server: one reactor thread drives `mio` readiness events and owns the
//! idle-connection timer list; a bounded pool of worker threads parses requests, talks to
//! MySQL for login/registration, and assembles responses. See `SPEC_FULL.md` and
//! `DESIGN.md` for the full design and its grounding.

pub mod accounts;
pub mod config;
pub mod connection;
pub mod dbpool;
pub mod error;
pub mod logger;
pub mod queue;
pub mod reactor;
pub mod sync;
pub mod timer;
pub mod worker;

use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;

use config::Config;
use error::StartupError;

/// Wires together logging, the database pool, the account store, and the reactor, then
/// runs until `SIGTERM`. Resources open in order; any failure is fatal and aborts
/// before a single connection is accepted.
pub fn run(config: Config) -> Result<(), StartupError> {
    let config = Arc::new(config);

    let logger = logger::Logger::init(
        config.log_dir.clone(),
        config.log_stem.clone(),
        config.log_buf,
        config.log_queue_cap,
        config.split_lines,
    )
    .map_err(|source| StartupError::LogFileOpen { path: config.log_dir.clone(), source })?;

    logger.info(format!(
        "starting on {}:{} with {} worker thread(s)",
        config.bind_address, config.listen_port, config.thread_count
    ));

    let db_config = dbpool::DbConfig::from(config.as_ref());
    let db_pool = dbpool::connect(&db_config)
        .map_err(|(index, source)| StartupError::DbConnect { index, total: config.db_max_conn, source })?;

    let initial_users = accounts::Accounts::load(&db_pool).map_err(StartupError::AccountsLoad)?;
    let accounts = accounts::Accounts::new(db_pool, initial_users);

    let addr = SocketAddr::new(config.bind_address, config.listen_port);
    let listener = StdTcpListener::bind(addr).map_err(StartupError::Bind)?;

    let reactor = reactor::Reactor::new(listener, Arc::clone(&config), accounts, logger.clone())?;

    logger.info("accepting connections");
    let result = reactor.run();
    logger.info("shut down");
    result
}
