//! The query server.
//!
//! A pool of W worker threads shares one listening socket; a process-wide
//! mutex serialises `accept`, and each worker then owns the connection
//! with blocking I/O until the response is written. Workers share the
//! immutable engine and keep a private scratch allocation.

pub mod api;
pub mod http;
pub mod response;

use crate::config::Config;
use crate::engine::{Engine, SearchAllocation};
use crate::result::IndexError;
use parking_lot::Mutex;
use std::io;
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const SOCKET_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    #[error("could not bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("could not open indexes: {0}")]
    Index(#[from] IndexError),
}

/// Open the indexes, bind the socket, run the worker pool until the
/// listener fails. Returns only on shutdown.
pub fn serve(config: Config) -> Result<(), ServeError> {
    let worker_count = config.worker_count;
    let listen = config.listen.clone();

    let engine = Arc::new(Engine::open(config)?);
    let listener = TcpListener::bind(&listen).map_err(|source| ServeError::Bind {
        addr: listen.clone(),
        source,
    })?;
    let accept_lock = Mutex::new(());

    log::info!("server has started on {} with {} workers", listen, worker_count);

    thread::scope(|scope| {
        for worker_id in 0..worker_count {
            let engine = Arc::clone(&engine);
            let listener = &listener;
            let accept_lock = &accept_lock;
            scope.spawn(move || worker_loop(worker_id, engine, listener, accept_lock));
        }
    });
    Ok(())
}

fn worker_loop(
    worker_id: usize,
    engine: Arc<Engine>,
    listener: &TcpListener,
    accept_lock: &Mutex<()>,
) {
    let mut alloc = SearchAllocation::new();
    log::debug!("worker {} ready", worker_id);

    loop {
        let accepted = {
            let _guard = accept_lock.lock();
            listener.accept()
        };
        match accepted {
            Ok((stream, _)) => {
                if let Err(e) = handle_connection(&engine, &mut alloc, stream) {
                    log::debug!("worker {}: connection error: {}", worker_id, e);
                }
            }
            Err(e) => {
                log::error!("worker {}: accept failed: {}", worker_id, e);
                break;
            }
        }
    }
}

fn handle_connection(
    engine: &Engine,
    alloc: &mut SearchAllocation,
    mut stream: TcpStream,
) -> io::Result<()> {
    stream.set_read_timeout(Some(SOCKET_TIMEOUT))?;
    stream.set_write_timeout(Some(SOCKET_TIMEOUT))?;

    let request = match http::read_request(&mut stream)? {
        Some(request) => request,
        None => {
            // malformed framing: close and move on
            log::warn!("dropping malformed request");
            return Ok(());
        }
    };
    log::info!("serving request: {}", request.target);

    match api::handle(engine, alloc, &request) {
        api::Reply::Json(body) => http::write_json(&mut stream, &body),
        api::Reply::Binary(body) => http::write_binary(&mut stream, &body),
        api::Reply::BadRequest(body) => http::write_bad_request(&mut stream, &body),
    }
}
