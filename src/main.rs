use std::net::{TcpListener, UdpSocket};
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;

use commcore::config::CommConfig;
use commcore::erq::ErqClient;
use commcore::errors::CommResult;
use commcore::host::EchoHost;
use commcore::scheduler::{Scheduler, HEARTBEAT_DUE, URGENT_DATA_PENDING};
use commcore::{log_info, log_warn};

const CONFIG_PATH_DEFAULT: &str = "comm.conf";
const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(2000);

fn main() -> CommResult<()> {
    let config_path = std::env::args().nth(1).unwrap_or_else(|| CONFIG_PATH_DEFAULT.to_string());
    let config = match CommConfig::load_from_file(&config_path) {
        Ok(config) => {
            log_info!("configuration loaded from {}", config_path);
            config
        }
        Err(e) => {
            log_warn!("config error: {}; using defaults", e);
            CommConfig::default()
        }
    };

    commcore::sys::ignore_lifecycle_signals();
    install_urgent_signal_handler();
    spawn_heartbeat_timer();

    let bind_addr = format!("{}:{}", config.server.bind_address, config.server.telnet_port);
    let listener = TcpListener::bind(&bind_addr)?;
    listener.set_nonblocking(true)?;

    let udp = match config.server.udp_port {
        Some(port) => {
            let udp_addr = format!("{}:{}", config.server.bind_address, port);
            let socket = UdpSocket::bind(&udp_addr)?;
            socket.set_nonblocking(true)?;
            Some(socket)
        }
        None => None,
    };

    log_info!("commcore listening on {}", bind_addr);
    log_info!("max sessions: {}", config.server.max_sessions);

    let mut scheduler = Scheduler::new(config.clone(), vec![listener], udp);

    if let Some(path) = &config.erq.path {
        match ErqClient::spawn(path, config.erq.max_message_size) {
            Ok(client) => {
                scheduler.attach_erq(client);
                log_info!("ERQ co-process attached: {}", path);
            }
            Err(e) => {
                log_warn!("ERQ unavailable ({}): {}", path, e);
            }
        }
    } else {
        log_info!("ERQ disabled (no erq.path configured)");
    }

    let mut host = EchoHost::new();
    loop {
        let now = jiff::Timestamp::now();
        if !scheduler.run_pass(&mut host, now) {
            log_info!("scheduler requested shutdown");
            break;
        }
    }

    Ok(())
}

/// Flip a flag the scheduler checks at the top of each pass; the handler
/// itself does nothing beyond that, since only async-signal-safe work is
/// allowed inside it.
extern "C" fn on_sigurg(_signum: libc::c_int) {
    URGENT_DATA_PENDING.store(true, Ordering::SeqCst);
}

fn install_urgent_signal_handler() {
    unsafe {
        libc::signal(libc::SIGURG, on_sigurg as libc::sighandler_t);
    }
}

/// A real LPMud driver reprograms `alarm()`; a background thread flipping
/// an atomic on a fixed interval gets the scheduler the same wakeup
/// contract without needing a second signal handler.
fn spawn_heartbeat_timer() {
    thread::spawn(|| loop {
        thread::sleep(HEARTBEAT_INTERVAL);
        HEARTBEAT_DUE.store(true, Ordering::SeqCst);
    });
}
