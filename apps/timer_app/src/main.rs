use sg_reactor::{EventLoop, ReactorError};
use std::time::Duration;

fn main() -> Result<(), ReactorError> {
    sg_logging::setup_logger();

    let mut event_loop = EventLoop::new()?;

    let heartbeat = event_loop.add_periodic_timer(
        Duration::from_millis(500),
        Box::new(|_, id| {
            tracing::info!("heartbeat timer-id={} fired", id);
        }),
    );

    event_loop.add_timer(
        Duration::from_secs(3),
        Box::new(move |ev, _| {
            tracing::info!("shutdown timer fired. stopping event loop");
            ev.cancel_timer(heartbeat);
            ev.stop();
        }),
    );

    event_loop.run()
}
