use sg_reactor::EventLoop;
use std::{
    cell::RefCell,
    collections::HashMap,
    io::{ErrorKind, Read, Write},
    net::{TcpListener, TcpStream},
    os::fd::{AsRawFd, RawFd},
    rc::Rc,
    time::Duration,
};

type ConnectionMap = Rc<RefCell<HashMap<RawFd, TcpStream>>>;

fn echo_callback(connections: ConnectionMap) -> sg_reactor::StreamCallback {
    Box::new(move |ev, fd| {
        let mut buffer = [0u8; 1024];
        let mut open = true;

        loop {
            let mut streams = connections.borrow_mut();
            let Some(stream) = streams.get_mut(&fd) else {
                return;
            };

            match stream.read(&mut buffer) {
                Ok(0) => {
                    open = false;
                    break;
                }
                Ok(n) => {
                    if let Err(e) = stream.write_all(&buffer[..n]) {
                        tracing::error!("echo write to fd={} failed. {}", fd, e);
                        open = false;
                        break;
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => {
                    tracing::error!("read from fd={} failed. {}", fd, e);
                    open = false;
                    break;
                }
            }
        }

        if !open {
            tracing::info!("closing connection fd={}", fd);
            ev.remove_stream(fd);
            connections.borrow_mut().remove(&fd);
        }
    })
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    sg_logging::setup_logger();

    let listener = TcpListener::bind("127.0.0.1:8080")?;
    listener.set_nonblocking(true)?;
    tracing::info!("echoing on {}", listener.local_addr()?);

    let mut event_loop = EventLoop::new()?;
    let connections: ConnectionMap = Rc::new(RefCell::new(HashMap::new()));

    let accept_connections = connections.clone();
    let listener_fd = listener.as_raw_fd();
    event_loop.add_read_stream(
        listener_fd,
        Box::new(move |ev, _| loop {
            match listener.accept() {
                Ok((stream, peer)) => {
                    if let Err(e) = stream.set_nonblocking(true) {
                        tracing::error!("failed to set nonblocking for {}. {}", peer, e);
                        continue;
                    }

                    let fd = stream.as_raw_fd();
                    accept_connections.borrow_mut().insert(fd, stream);
                    tracing::info!("accepted connection fd={} from {}", fd, peer);

                    if let Err(e) =
                        ev.add_read_stream(fd, echo_callback(accept_connections.clone()))
                    {
                        tracing::error!("failed to register fd={}. {}", fd, e);
                        accept_connections.borrow_mut().remove(&fd);
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => {
                    tracing::error!("accept failed. {}", e);
                    break;
                }
            }
        }),
    )?;

    // connections whose read interest was dropped on end-of-stream linger in
    // the map until this sweep observes the closed socket
    let prune_connections = connections.clone();
    event_loop.add_periodic_timer(
        Duration::from_secs(5),
        Box::new(move |_, _| {
            let mut streams = prune_connections.borrow_mut();
            let before = streams.len();
            streams.retain(|_, stream| {
                let mut probe = [0u8; 1];
                match stream.peek(&mut probe) {
                    Ok(0) => false,
                    Ok(_) => true,
                    Err(e) if e.kind() == ErrorKind::WouldBlock => true,
                    Err(_) => false,
                }
            });
            if streams.len() != before {
                tracing::info!("pruned {} closed connections", before - streams.len());
            }
            tracing::info!("active connections: {}", streams.len());
        }),
    );

    event_loop.run()?;

    Ok(())
}
