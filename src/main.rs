use log::{info, warn};
use std::sync::Arc;

use boardio::{Board, BoardConfig, EventBroadcaster, InterruptListener, SlotStore};

#[cfg(feature = "hardware-gpio")]
use boardio::{LibgpiodBackend, SysfsSlotStore};
#[cfg(not(feature = "hardware-gpio"))]
use boardio::{MockGpioBackend, MockSlotStore};

#[tokio::main]
async fn main() -> std::io::Result<()> {
    env_logger::init();

    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("BOARDIO_CONFIG").ok())
        .unwrap_or_else(|| "board.json".to_string());
    let config = BoardConfig::load_from_file(&config_path)
        .unwrap_or_else(|e| panic!("Failed to load config: {e}"));

    #[cfg(feature = "hardware-gpio")]
    let backend =
        LibgpiodBackend::new().unwrap_or_else(|e| panic!("Failed to init libgpiod backend: {e}"));
    #[cfg(feature = "hardware-gpio")]
    let slots: Arc<dyn SlotStore> = Arc::new(SysfsSlotStore::new(&config.slots_path));

    #[cfg(not(feature = "hardware-gpio"))]
    let backend = MockGpioBackend::default();
    #[cfg(not(feature = "hardware-gpio"))]
    let slots: Arc<dyn SlotStore> = Arc::new(MockSlotStore::default());

    let board = Board::new(&config, &backend, slots)
        .unwrap_or_else(|e| panic!("Failed to build board: {e}"));

    let broadcaster =
        EventBroadcaster::new(config.broadcast_capacity, config.event_history_capacity);
    for input in board.digital_inputs() {
        input.add_interrupt_listener(broadcaster.clone() as Arc<dyn InterruptListener>);
    }

    for port in board.uarts() {
        if let Err(e) = port.open() {
            warn!("Failed to open UART {}: {e}", port.name());
        }
    }

    let mut events = broadcaster.subscribe();
    info!("Watching interrupts from {config_path}...");
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => info!("{} {:?} at {}", event.pin, event.edge, event.timestamp_ms),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Event stream lagged by {n} messages");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    for port in board.uarts().filter(|p| p.is_open()) {
        if let Err(e) = port.close() {
            warn!("Failed to close UART {}: {e}", port.name());
        }
    }
    Ok(())
}
